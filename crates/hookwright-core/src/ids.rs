use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

const RANDOM_SUFFIX_LEN: usize = 6;

/// Issues hook ids for one session.
///
/// Ids look like `hook-<unix_ms>-<index>-<counter>-<random>`. Only the
/// counter is relied on for uniqueness; the backend reuses `index` across
/// batches and several hooks can finalize in the same millisecond.
#[derive(Debug, Default)]
pub struct HookIdGenerator {
    counter: AtomicU64,
}

impl HookIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, index: u64) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("hook-{}-{index}-{n}-{suffix}", Utc::now().timestamp_millis())
    }

    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
