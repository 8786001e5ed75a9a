//! BCH(63,16,23) forward error correction for the P25 network identifier.
//!
//! Codewords are carried in the low 63 bits of a `u64` with bit `k` the coefficient of `x^k`.
//! The first transmitted bit is `x^62`, so the 16 data bits occupy bits 62..47 and the parity
//! bits 46..0.
//!
//! Decoding computes syndromes over GF(2^6), finds the error locator with Berlekamp-Massey and
//! locates errors with a Chien search.

/// Outcome of a decode attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrity {
    /// Data did not require correction.
    Ok,
    /// Data was corrected; the number of bits flipped.
    Corrected(u32),
    Uncorrectable,
}

impl Integrity {
    /// Number of corrected bits, or `None` when uncorrectable.
    #[must_use]
    pub fn corrected_bits(&self) -> Option<u32> {
        match self {
            Integrity::Ok => Some(0),
            Integrity::Corrected(num) => Some(*num),
            Integrity::Uncorrectable => None,
        }
    }
}

// GF(2^6) field order
const Q: usize = 63;
// x^6 + x + 1
const PRIMITIVE: u16 = 0x43;

/// GF(2^6) exponent and log tables.
struct Field {
    exp: [u8; Q * 2],
    log: [u8; Q + 1],
}

impl Field {
    const fn new() -> Self {
        let mut exp = [0u8; Q * 2];
        let mut log = [0u8; Q + 1];
        let mut x: u16 = 1;
        let mut i = 0;
        while i < Q {
            exp[i] = x as u8;
            exp[i + Q] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x40 != 0 {
                x ^= PRIMITIVE;
            }
            i += 1;
        }
        Field { exp, log }
    }

    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] as usize + self.log[b as usize] as usize]
    }

    fn div(&self, a: u8, b: u8) -> u8 {
        debug_assert!(b != 0, "division by zero in GF(64)");
        if a == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] as usize + Q - self.log[b as usize] as usize]
    }

    /// alpha^power for any non-negative power.
    fn pow(&self, power: usize) -> u8 {
        self.exp[power % Q]
    }
}

static FIELD: Field = Field::new();

/// The P25 NID BCH code.
#[derive(Clone, Debug, Default)]
pub struct Bch63_16_23;

impl Bch63_16_23 {
    /// Codeword length in bits.
    pub const N: usize = 63;
    /// Data bits per codeword.
    pub const K: usize = 16;
    /// Correctable bit errors.
    pub const T: usize = 11;
    /// Generator polynomial, degree 47 (octal 6331141367235453).
    pub const GENERATOR: u64 = 0xcd93_0bdd_3b2b;

    const PARITY_BITS: usize = Self::N - Self::K;
    const CODEWORD_MASK: u64 = (1 << Self::N) - 1;

    /// Systematically encode 16 data bits.
    #[must_use]
    pub fn encode(data: u16) -> u64 {
        let shifted = u64::from(data) << Self::PARITY_BITS;
        shifted | Self::remainder(shifted)
    }

    // Polynomial remainder of `word` modulo the generator.
    fn remainder(word: u64) -> u64 {
        let mut rem = word;
        for deg in (Self::PARITY_BITS..Self::N).rev() {
            if rem & (1 << deg) != 0 {
                rem ^= Self::GENERATOR << (deg - Self::PARITY_BITS);
            }
        }
        rem
    }

    /// Decode a received codeword, returning the integrity status and the corrected
    /// codeword. An uncorrectable word is returned unchanged.
    #[must_use]
    pub fn decode(&self, word: u64) -> (Integrity, u64) {
        let word = word & Self::CODEWORD_MASK;
        let syndromes = Self::syndromes(word);
        if syndromes.iter().all(|s| *s == 0) {
            return (Integrity::Ok, word);
        }

        let (locator, degree) = Self::berlekamp_massey(&syndromes);
        if degree > Self::T {
            return (Integrity::Uncorrectable, word);
        }

        // Chien search: position k is in error when locator(alpha^-k) == 0
        let mut corrected = word;
        let mut roots = 0;
        for k in 0..Self::N {
            let inverse = (Q - k) % Q;
            let mut sum = 0u8;
            for (i, coef) in locator.iter().enumerate().take(degree + 1) {
                sum ^= FIELD.mul(*coef, FIELD.pow(inverse * i));
            }
            if sum == 0 {
                corrected ^= 1 << k;
                roots += 1;
            }
        }
        if roots != degree || Self::remainder(corrected) != 0 {
            return (Integrity::Uncorrectable, word);
        }

        (Integrity::Corrected(roots as u32), corrected)
    }

    fn syndromes(word: u64) -> [u8; 2 * Self::T] {
        let mut syndromes = [0u8; 2 * Self::T];
        for (j, syndrome) in syndromes.iter_mut().enumerate() {
            for k in 0..Self::N {
                if word & (1 << k) != 0 {
                    *syndrome ^= FIELD.pow((j + 1) * k);
                }
            }
        }
        syndromes
    }

    /// Error locator polynomial coefficients (lowest degree first) and its degree.
    fn berlekamp_massey(syndromes: &[u8; 2 * Self::T]) -> ([u8; 2 * Self::T + 1], usize) {
        let mut current = [0u8; 2 * Self::T + 1];
        let mut previous = [0u8; 2 * Self::T + 1];
        current[0] = 1;
        previous[0] = 1;
        let mut degree = 0;
        let mut shift = 1;
        let mut last_discrepancy = 1u8;

        for n in 0..syndromes.len() {
            let mut discrepancy = syndromes[n];
            for i in 1..=degree {
                discrepancy ^= FIELD.mul(current[i], syndromes[n - i]);
            }
            if discrepancy == 0 {
                shift += 1;
                continue;
            }

            let scale = FIELD.div(discrepancy, last_discrepancy);
            let saved = current;
            for i in shift..current.len() {
                current[i] ^= FIELD.mul(scale, previous[i - shift]);
            }
            if 2 * degree <= n {
                degree = n + 1 - degree;
                previous = saved;
                last_discrepancy = discrepancy;
                shift = 1;
            } else {
                shift += 1;
            }
        }

        (current, degree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{seq::index::sample, Rng, SeedableRng};
    use test_case::test_case;

    #[test]
    fn field_tables_are_consistent() {
        for x in 1..=63u8 {
            assert_eq!(FIELD.exp[FIELD.log[x as usize] as usize], x);
            assert_eq!(FIELD.div(FIELD.mul(x, 0x2b), 0x2b), x);
        }
    }

    #[test]
    fn encode_is_systematic() {
        assert_eq!(Bch63_16_23::encode(0), 0);
        let word = Bch63_16_23::encode((0x293 << 4) | 0x5);
        assert_eq!(Bch63_16_23::remainder(word), 0);
        assert_eq!(word >> 47, 0x2935);
    }

    #[test]
    fn clean_word_is_ok() {
        let word = Bch63_16_23::encode(0xabcd);
        let (integrity, decoded) = Bch63_16_23.decode(word);
        assert_eq!(integrity, Integrity::Ok);
        assert_eq!(decoded, word);
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(5)]
    #[test_case(10)]
    #[test_case(11)]
    fn corrects_up_to_t_errors(num_errors: usize) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(num_errors as u64);
        for _ in 0..50 {
            let data: u16 = rng.gen();
            let word = Bch63_16_23::encode(data);
            let mut received = word;
            for pos in sample(&mut rng, 63, num_errors).into_iter() {
                received ^= 1 << pos;
            }

            let (integrity, decoded) = Bch63_16_23.decode(received);
            assert_eq!(
                integrity,
                Integrity::Corrected(num_errors as u32),
                "data={data:#06x} received={received:#x}"
            );
            assert_eq!(decoded, word);
        }
    }

    #[test]
    fn never_silently_returns_a_non_codeword() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1234);
        for _ in 0..200 {
            let word = Bch63_16_23::encode(rng.gen());
            let mut received = word;
            for pos in sample(&mut rng, 63, 16).into_iter() {
                received ^= 1 << pos;
            }
            let (integrity, decoded) = Bch63_16_23.decode(received);
            match integrity {
                Integrity::Uncorrectable => assert_eq!(decoded, received),
                _ => assert_eq!(Bch63_16_23::remainder(decoded), 0),
            }
        }
    }
}
