use std::collections::HashMap;

/// Rate limits repeated diagnostics.
///
/// A key is allowed through for its first `limit` occurrences and then once every
/// `every` occurrences, so a persistent fault still shows up in logs without flooding them.
#[derive(Debug, Clone)]
pub(crate) struct LogSuppressor {
    limit: u64,
    every: u64,
    counts: HashMap<&'static str, u64>,
}

impl Default for LogSuppressor {
    fn default() -> Self {
        Self::new(3, 1000)
    }
}

impl LogSuppressor {
    pub(crate) fn new(limit: u64, every: u64) -> Self {
        LogSuppressor {
            limit,
            every: every.max(1),
            counts: HashMap::new(),
        }
    }

    /// Record an occurrence of `key`, returning its total count if it should be logged.
    pub(crate) fn allow(&mut self, key: &'static str) -> Option<u64> {
        let count = self.counts.entry(key).or_default();
        *count += 1;
        if *count <= self.limit || *count % self.every == 0 {
            Some(*count)
        } else {
            None
        }
    }
}
