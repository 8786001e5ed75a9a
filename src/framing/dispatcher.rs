use std::mem;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, span, trace, warn, Level};

use crate::{
    bits::CorrectedBits,
    config::Reclassification,
    dibit::Dibit,
    logging::LogSuppressor,
    nid::Nid,
    timing::DibitSink,
};

use super::{
    is_status_position, FrameAssembler, FrameType, FramedMessage, Message, PayloadParser,
    Unparsed, HEADER_DIBITS, SYMBOL_RATE,
};

/// Unaccounted dibits reported per periodic sync loss report.
const SYNC_LOSS_REPORT_DIBITS: usize = 4800;
/// Unaccounted dibits allowed to build up before a periodic report.
const SYNC_LOSS_REPORT_THRESHOLD: usize = SYNC_LOSS_REPORT_DIBITS + 64;

/// Running counts of where received dibits went.
///
/// Every dibit received ends up as header, status, suppressed padding, frame bits or sync
/// loss bits, apart from those still pending in an unfinished frame (see
/// [FramerDispatcher::pending_bits]).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FramingStats {
    pub dibits: u64,
    pub header_dibits: u64,
    pub status_dibits: u64,
    pub suppressed_dibits: u64,
    pub frame_bits: u64,
    pub sync_loss_bits: u64,
    pub frames: u64,
    pub sync_losses: u64,
}

/// Reference time advanced by received dibits.
#[derive(Debug, Clone)]
struct Clock {
    reference: DateTime<Utc>,
    dibits: u64,
}

impl Clock {
    fn now(&self) -> DateTime<Utc> {
        let nanos = u128::from(self.dibits) * 1_000_000_000 / u128::from(SYMBOL_RATE);
        self.reference + Duration::nanoseconds(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy)]
struct PacketContext {
    blocks_to_follow: usize,
    confirmed: bool,
}

/// A frame being assembled.
#[derive(Debug)]
struct Assembly {
    assembler: FrameAssembler,
    /// Sync and NID dibits still to be skipped.
    header_remaining: usize,
    /// Frame relative position of the next dibit, for locating status dibits.
    position: usize,
    /// Last stripped status dibit and the frame bit count when it was stripped.
    last_status: Option<(usize, Dibit)>,
    packet: Option<PacketContext>,
}

#[derive(Debug)]
enum State {
    Idle,
    Assembling(Assembly),
}

type Listener = Box<dyn FnMut(Message) + Send>;

/// Assembles dibits into frames between syncs and dispatches them.
///
/// Sync events arrive before the sync and NID dibits themselves, which are skipped once
/// they arrive. Frames are sized by their NID's DUID. When the NID could not be decoded a
/// placeholder is assembled and classified by its length once the next sync closes it.
///
/// Every received dibit is accounted for: bits that do not make it into a frame are
/// reported as [Message::SyncLoss] when the next sync arrives, or periodically while no sync
/// is found.
pub struct FramerDispatcher {
    state: State,
    previous: FrameType,
    /// Idle dibits that are not in any frame.
    unaccounted_dibits: usize,
    /// Bits dropped from frames, reported with the next sync loss.
    dropped_bits: usize,
    /// Idle padding dibits still expected after the last frame.
    suppress: usize,
    clock: Clock,
    reclassification: Reclassification,
    parser: Box<dyn PayloadParser>,
    listener: Option<Listener>,
    stats: FramingStats,
    suppressor: LogSuppressor,
}

impl Default for FramerDispatcher {
    fn default() -> Self {
        Self::new(Reclassification::default())
    }
}

impl FramerDispatcher {
    #[must_use]
    pub fn new(reclassification: Reclassification) -> Self {
        FramerDispatcher {
            state: State::Idle,
            previous: FrameType::TerminatorDataUnit,
            unaccounted_dibits: 0,
            dropped_bits: 0,
            suppress: 0,
            clock: Clock {
                reference: Utc::now(),
                dibits: 0,
            },
            reclassification,
            parser: Box::new(Unparsed),
            listener: None,
            stats: FramingStats::default(),
            suppressor: LogSuppressor::default(),
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Box<dyn PayloadParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn set_parser(&mut self, parser: Box<dyn PayloadParser>) {
        self.parser = parser;
    }

    /// Register the consumer of framed messages, replacing any previous one.
    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Set the time of the next received dibit. Message timestamps advance from it at the
    /// symbol rate.
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.clock = Clock {
            reference: timestamp,
            dibits: 0,
        };
    }

    #[must_use]
    pub fn stats(&self) -> &FramingStats {
        &self.stats
    }

    /// Bits received but not yet counted in [FramingStats]: the unfinished frame, idle bits
    /// since the last sync loss report and bits dropped from frames.
    #[must_use]
    pub fn pending_bits(&self) -> usize {
        let assembling = match &self.state {
            State::Assembling(assembly) => assembly.assembler.bits().len(),
            State::Idle => 0,
        };
        assembling + self.unaccounted_dibits * 2 + self.dropped_bits
    }

    /// True while a frame is being assembled.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        matches!(self.state, State::Assembling(_))
    }

    fn emit(&mut self, message: Message) {
        if let Some(listener) = self.listener.as_mut() {
            listener(message);
        }
    }

    fn emit_frame(&mut self, frame_type: FrameType, nac: u16, bits: CorrectedBits) {
        let timestamp = self.clock.now();
        debug!(
            %frame_type,
            nac,
            bits = bits.len(),
            corrected = bits.corrected(),
            "frame"
        );
        self.stats.frames += 1;
        self.stats.frame_bits += bits.len() as u64;
        self.emit(Message::Frame(FramedMessage {
            frame_type,
            nac,
            bits,
            timestamp,
        }));
    }

    fn emit_sync_loss(&mut self, bits: usize) {
        let timestamp = self.clock.now();
        debug!(bits, "sync loss");
        self.stats.sync_losses += 1;
        self.stats.sync_loss_bits += bits as u64;
        self.emit(Message::SyncLoss { bits, timestamp });
    }

    fn start(&mut self, nac: u16, frame_type: FrameType, corrected: u32, slip: i8) {
        let forced = match mem::replace(&mut self.state, State::Idle) {
            State::Assembling(assembly) => {
                self.force_completion(assembly, frame_type);
                true
            }
            State::Idle => false,
        };

        let bits = self.unaccounted_dibits * 2 + self.dropped_bits;
        self.unaccounted_dibits = 0;
        self.dropped_bits = 0;
        self.suppress = 0;
        if forced || bits > 0 {
            self.emit_sync_loss(bits);
        }

        trace!(%frame_type, nac, slip, "start frame");
        self.state = State::Assembling(Assembly {
            assembler: FrameAssembler::new(nac, frame_type, corrected),
            header_remaining: HEADER_DIBITS.saturating_add_signed(isize::from(slip)),
            position: HEADER_DIBITS,
            last_status: None,
            packet: None,
        });
    }

    /// Close the in-flight frame because a sync for `next` arrived.
    fn force_completion(&mut self, mut assembly: Assembly, next: FrameType) {
        if assembly.header_remaining > 0 {
            trace!("sync during header; nothing assembled");
            return;
        }
        let span = span!(Level::TRACE, "forced", frame_type = %assembly.assembler.frame_type());
        let _guard = span.enter();

        let placeholder = assembly.assembler.frame_type() == FrameType::Placeholder;
        self.dropped_bits +=
            assembly
                .assembler
                .force_completion(self.previous, next, &self.reclassification);
        if placeholder {
            self.restore_trailing_status(&mut assembly);
        }
        if assembly.assembler.is_constructible() {
            self.dispatch(assembly);
        } else {
            debug!(
                frame_type = %assembly.assembler.frame_type(),
                bits = assembly.assembler.bits().len(),
                "incomplete frame closed by sync"
            );
            self.dropped_bits += assembly.assembler.bits().len();
        }
    }

    /// Hand a completed buffer to the parser and emit it, continuing with the next block of
    /// multi-block frames.
    fn dispatch(&mut self, mut assembly: Assembly) {
        let frame_type = assembly.assembler.frame_type();
        let nac = assembly.assembler.nac();
        self.previous = frame_type;

        if frame_type.is_signaling_block() {
            let Some(block) = self.parser.signaling_block(assembly.assembler.bits()) else {
                let bits = assembly.assembler.into_bits();
                self.emit_sync_loss(bits.len());
                return;
            };
            match frame_type.next_signaling_block() {
                Some(next) if !block.last_block => {
                    let bits = assembly.assembler.reconfigure(next);
                    self.emit_frame(frame_type, nac, bits);
                    self.state = State::Assembling(assembly);
                }
                _ => {
                    self.emit_frame(frame_type, nac, assembly.assembler.into_bits());
                    self.suppress = frame_type.trailing_suppression();
                }
            }
            return;
        }

        if frame_type == FrameType::PacketHeaderDataUnit {
            let Some(header) = self.parser.packet_header(assembly.assembler.bits()) else {
                let bits = assembly.assembler.into_bits();
                self.emit_sync_loss(bits.len());
                return;
            };
            match header.blocks_to_follow {
                0 => {
                    self.emit_frame(frame_type, nac, assembly.assembler.into_bits());
                    self.suppress = frame_type.trailing_suppression();
                }
                blocks if blocks <= FrameType::MAX_PACKET_BLOCKS => {
                    let bits = assembly.assembler.reconfigure(FrameType::PacketDataUnit1);
                    self.emit_frame(frame_type, nac, bits);
                    assembly.packet = Some(PacketContext {
                        blocks_to_follow: blocks,
                        confirmed: header.confirmed,
                    });
                    self.state = State::Assembling(assembly);
                }
                blocks => {
                    if let Some(count) = self.suppressor.allow("packet-blocks") {
                        warn!(blocks, count, "packet header announces too many blocks");
                    }
                    self.emit_frame(frame_type, nac, assembly.assembler.into_bits());
                }
            }
            return;
        }

        if let Some(number) = frame_type.packet_block_number() {
            let Some(packet) = assembly.packet else {
                // a packet block is only reached from a packet header
                let bits = assembly.assembler.into_bits();
                self.emit_sync_loss(bits.len());
                return;
            };
            let valid = self
                .parser
                .packet_block(assembly.assembler.bits(), packet.confirmed);
            let next = FrameType::packet_block(number + 1)
                .filter(|_| number < packet.blocks_to_follow);
            let (bits, assembly) = match next {
                Some(next) => (assembly.assembler.reconfigure(next), Some(assembly)),
                None => {
                    self.suppress =
                        FrameType::packet_suppression(packet.blocks_to_follow).unwrap_or(0);
                    (assembly.assembler.into_bits(), None)
                }
            };
            if valid {
                self.emit_frame(frame_type, nac, bits);
            } else {
                self.emit_sync_loss(bits.len());
            }
            if let Some(assembly) = assembly {
                self.state = State::Assembling(assembly);
            }
            return;
        }

        let bits = assembly.assembler.into_bits();
        if self.parser.validate(frame_type, &bits) {
            self.emit_frame(frame_type, nac, bits);
            self.suppress = frame_type.trailing_suppression();
        } else {
            self.emit_sync_loss(bits.len());
        }
    }

    /// A frame filled up without being interrupted by a sync.
    fn complete(&mut self, mut assembly: Assembly) {
        if assembly.assembler.frame_type() == FrameType::Placeholder {
            self.dropped_bits += assembly.assembler.force_completion(
                self.previous,
                FrameType::Placeholder,
                &self.reclassification,
            );
            self.restore_trailing_status(&mut assembly);
        }
        self.dispatch(assembly);
    }

    /// Move a reclassified frame's trailing status back from the status count into the
    /// frame when it was stripped right after the frame's data.
    fn restore_trailing_status(&mut self, assembly: &mut Assembly) {
        let Some((at, dibit)) = assembly.last_status else {
            return;
        };
        if at == assembly.assembler.bits().len() && assembly.assembler.restore_trailing_status(dibit)
        {
            self.stats.status_dibits -= 1;
        }
    }

    fn receive_idle(&mut self) {
        if self.suppress > 0 {
            self.suppress -= 1;
            self.stats.suppressed_dibits += 1;
            return;
        }
        self.unaccounted_dibits += 1;
        if self.unaccounted_dibits > SYNC_LOSS_REPORT_THRESHOLD {
            self.unaccounted_dibits -= SYNC_LOSS_REPORT_DIBITS;
            self.emit_sync_loss(SYNC_LOSS_REPORT_DIBITS * 2);
        }
    }
}

impl DibitSink for FramerDispatcher {
    fn receive(&mut self, dibit: Dibit) {
        self.stats.dibits += 1;
        self.clock.dibits += 1;

        if !self.is_assembling() {
            self.receive_idle();
            return;
        }
        let State::Assembling(assembly) = &mut self.state else {
            return;
        };

        if assembly.header_remaining > 0 {
            assembly.header_remaining -= 1;
            self.stats.header_dibits += 1;
            return;
        }

        let status = is_status_position(assembly.position);
        assembly.position += 1;
        let trailing = assembly.assembler.remaining() == 2
            && assembly.assembler.frame_type().has_trailing_status();
        if status && !trailing {
            assembly.last_status = Some((assembly.assembler.bits().len(), dibit));
            self.stats.status_dibits += 1;
            return;
        }

        if !assembly.assembler.receive(dibit) {
            self.dropped_bits += 2;
            if let Some(count) = self.suppressor.allow("assembler-full") {
                warn!(
                    frame_type = %assembly.assembler.frame_type(),
                    count,
                    "assembler full; dibit dropped"
                );
            }
            return;
        }

        if assembly.assembler.is_complete() {
            if let State::Assembling(assembly) = mem::replace(&mut self.state, State::Idle) {
                self.complete(assembly);
            }
        }
    }

    fn sync_detected(&mut self, nid: &Nid) {
        let frame_type = nid.frame_type().unwrap_or(FrameType::Placeholder);
        self.start(nid.nac, frame_type, nid.corrected, nid.slip);
    }

    fn sync_detected_uncertain(&mut self, nac: u16) {
        self.start(nac, FrameType::Placeholder, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{PacketHeader, SignalingBlock};
    use crossbeam::channel::{unbounded, Receiver};

    fn dispatcher() -> (FramerDispatcher, Receiver<Message>) {
        let (tx, rx) = unbounded();
        let mut dispatcher = FramerDispatcher::default();
        dispatcher.set_listener(move |message| {
            tx.send(message).unwrap();
        });
        (dispatcher, rx)
    }

    fn nid(nac: u16, frame_type: FrameType) -> Nid {
        Nid {
            nac,
            duid: frame_type.duid().unwrap(),
            corrected: 0,
            slip: 0,
        }
    }

    /// Feed a header and `data` data dibits, inserting status dibits where they belong.
    /// Returns the number of dibits fed after the header.
    fn feed_frame(dispatcher: &mut FramerDispatcher, data: usize) -> usize {
        for _ in 0..HEADER_DIBITS {
            dispatcher.receive(Dibit::D01Plus3);
        }
        let mut position = HEADER_DIBITS;
        let mut fed = 0;
        while fed < data {
            if !is_status_position(position) {
                fed += 1;
            }
            dispatcher.receive(Dibit::D10Minus1);
            position += 1;
        }
        position - HEADER_DIBITS
    }

    fn feed(dispatcher: &mut FramerDispatcher, dibits: usize) {
        for _ in 0..dibits {
            dispatcher.receive(Dibit::D00Plus1);
        }
    }

    fn assert_accounted(dispatcher: &FramerDispatcher) {
        let stats = dispatcher.stats();
        let accounted = 2
            * (stats.header_dibits + stats.status_dibits + stats.suppressed_dibits)
            + stats.frame_bits
            + stats.sync_loss_bits
            + dispatcher.pending_bits() as u64;
        assert_eq!(accounted, stats.dibits * 2, "{stats:?}");
    }

    fn frames(rx: &Receiver<Message>) -> Vec<FramedMessage> {
        rx.try_iter().filter_map(|m| m.frame().cloned()).collect()
    }

    #[test]
    fn ldu_includes_trailing_status() {
        let (mut dispatcher, rx) = dispatcher();
        dispatcher.sync_detected(&nid(0x293, FrameType::LogicalLinkDataUnit1));
        // 784 data dibits then the trailing status dibit
        feed_frame(&mut dispatcher, 784);
        assert!(dispatcher.is_assembling());
        dispatcher.receive(Dibit::D11Minus3);
        assert!(!dispatcher.is_assembling());

        let frames = frames(&rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::LogicalLinkDataUnit1);
        assert_eq!(frames[0].bits.len(), 1570);
        assert_eq!(frames[0].nac, 0x293);
        assert_accounted(&dispatcher);
    }

    #[test]
    fn resync_yields_one_frame_regardless_of_prior_state() {
        let (mut dispatcher, rx) = dispatcher();
        // mid-frame garbage from an earlier sync
        dispatcher.sync_detected(&nid(0x293, FrameType::LogicalLinkDataUnit2));
        feed(&mut dispatcher, 300);
        rx.try_iter().count();

        dispatcher.sync_detected(&nid(0x293, FrameType::TerminatorDataUnitLinkControl));
        feed_frame(&mut dispatcher, 144);

        let messages: Vec<Message> = rx.try_iter().collect();
        let frames: Vec<&FramedMessage> = messages.iter().filter_map(Message::frame).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::TerminatorDataUnitLinkControl);
        assert_eq!(frames[0].bits.len(), 288);
        assert_accounted(&dispatcher);
    }

    #[test]
    fn forced_placeholder_becomes_hdu() {
        let (mut dispatcher, rx) = dispatcher();
        dispatcher.sync_detected_uncertain(0x293);
        let after_header = feed_frame(&mut dispatcher, 329);
        // HDU trailing status
        dispatcher.receive(Dibit::D11Minus3);
        assert_eq!(after_header, 338);

        dispatcher.sync_detected(&nid(0x293, FrameType::LogicalLinkDataUnit1));

        let messages: Vec<Message> = rx.try_iter().collect();
        assert_eq!(messages.len(), 2, "{messages:?}");
        let Message::Frame(frame) = &messages[0] else {
            panic!("expected frame, got {:?}", messages[0]);
        };
        assert_eq!(frame.frame_type, FrameType::HeaderDataUnit);
        assert_eq!(frame.bits.len(), FrameType::HeaderDataUnit.capacity());
        assert_eq!(frame.bits.get_u64(656, 4), Some(0b1011), "trailing status restored");
        assert!(matches!(messages[1], Message::SyncLoss { bits: 0, .. }));
        assert_accounted(&dispatcher);
    }

    #[test]
    fn idle_bits_reported_at_next_sync() {
        let (mut dispatcher, rx) = dispatcher();
        feed(&mut dispatcher, 40);
        dispatcher.sync_detected(&nid(0x293, FrameType::TerminatorDataUnit));
        let messages: Vec<Message> = rx.try_iter().collect();
        assert!(matches!(
            messages.as_slice(),
            [Message::SyncLoss { bits: 80, .. }]
        ));
        assert!(!messages[0].is_stuffing());
        assert_accounted(&dispatcher);
    }

    #[test]
    fn periodic_sync_loss_while_idle() {
        let (mut dispatcher, rx) = dispatcher();
        feed(&mut dispatcher, 10_000);
        let losses: Vec<Message> = rx.try_iter().collect();
        assert_eq!(losses.len(), 2);
        for loss in &losses {
            assert!(matches!(loss, Message::SyncLoss { bits: 9600, .. }));
        }
        assert_accounted(&dispatcher);
    }

    #[test]
    fn terminator_link_control_suppresses_padding() {
        let (mut dispatcher, rx) = dispatcher();
        dispatcher.sync_detected(&nid(0x293, FrameType::TerminatorDataUnitLinkControl));
        feed_frame(&mut dispatcher, 144);
        feed(&mut dispatcher, 11);
        assert_eq!(dispatcher.stats().suppressed_dibits, 11);

        dispatcher.sync_detected(&nid(0x293, FrameType::TerminatorDataUnit));
        let messages: Vec<Message> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1, "no sync loss for suppressed padding");
        assert_accounted(&dispatcher);
    }

    struct ScriptedParser {
        signaling_last: Vec<bool>,
        packet_blocks: usize,
    }

    impl PayloadParser for ScriptedParser {
        fn validate(&mut self, _frame_type: FrameType, _bits: &CorrectedBits) -> bool {
            true
        }

        fn signaling_block(&mut self, _bits: &CorrectedBits) -> Option<SignalingBlock> {
            if self.signaling_last.is_empty() {
                return None;
            }
            Some(SignalingBlock {
                last_block: self.signaling_last.remove(0),
            })
        }

        fn packet_header(&mut self, _bits: &CorrectedBits) -> Option<PacketHeader> {
            Some(PacketHeader {
                blocks_to_follow: self.packet_blocks,
                confirmed: true,
            })
        }

        fn packet_block(&mut self, _bits: &CorrectedBits, confirmed: bool) -> bool {
            confirmed
        }
    }

    #[test]
    fn signaling_blocks_chain_until_last() {
        let (dispatcher, rx) = dispatcher();
        let mut dispatcher = dispatcher.with_parser(Box::new(ScriptedParser {
            signaling_last: vec![false, false, true],
            packet_blocks: 0,
        }));
        dispatcher.sync_detected(&nid(0x293, FrameType::TrunkingSignalingBlock1));
        feed_frame(&mut dispatcher, 98 * 3);
        feed(&mut dispatcher, 1);

        let types: Vec<FrameType> = frames(&rx).iter().map(|f| f.frame_type).collect();
        assert_eq!(
            types,
            vec![
                FrameType::TrunkingSignalingBlock1,
                FrameType::TrunkingSignalingBlock2,
                FrameType::TrunkingSignalingBlock3
            ]
        );
        assert_eq!(dispatcher.stats().suppressed_dibits, 1);
        assert_accounted(&dispatcher);
    }

    #[test]
    fn undecodable_signaling_block_is_sync_loss() {
        let (dispatcher, rx) = dispatcher();
        let mut dispatcher = dispatcher.with_parser(Box::new(ScriptedParser {
            signaling_last: vec![false],
            packet_blocks: 0,
        }));
        dispatcher.sync_detected(&nid(0x293, FrameType::TrunkingSignalingBlock1));
        feed_frame(&mut dispatcher, 98 * 2);

        let messages: Vec<Message> = rx.try_iter().collect();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[1], Message::SyncLoss { bits: 196, .. }));
        assert!(!dispatcher.is_assembling());
        assert_accounted(&dispatcher);
    }

    #[test]
    fn packet_blocks_follow_header() {
        let (dispatcher, rx) = dispatcher();
        let mut dispatcher = dispatcher.with_parser(Box::new(ScriptedParser {
            signaling_last: vec![],
            packet_blocks: 3,
        }));
        dispatcher.sync_detected(&nid(0x293, FrameType::PacketHeaderDataUnit));
        feed_frame(&mut dispatcher, 98 * 4);
        feed(&mut dispatcher, 8);

        let types: Vec<FrameType> = frames(&rx).iter().map(|f| f.frame_type).collect();
        assert_eq!(
            types,
            vec![
                FrameType::PacketHeaderDataUnit,
                FrameType::PacketDataUnit1,
                FrameType::PacketDataUnit2,
                FrameType::PacketDataUnit3
            ]
        );
        assert_eq!(dispatcher.stats().suppressed_dibits, 8);
        assert_accounted(&dispatcher);
    }

    #[test]
    fn timestamps_follow_symbol_rate() {
        let (mut dispatcher, rx) = dispatcher();
        let start = Utc::now();
        dispatcher.set_timestamp(start);
        feed(&mut dispatcher, 4800);
        dispatcher.sync_detected(&nid(0x293, FrameType::TerminatorDataUnit));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.timestamp() - start, Duration::seconds(1));
    }
}
