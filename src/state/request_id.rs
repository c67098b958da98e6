use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::{format_id_hex, mix_u64};

/// Process-wide source of request sequence numbers and `msg_<hex>` ids.
///
/// The random seed keeps ids distinct across restarts; mixing keeps
/// consecutive ids from looking sequential.
pub(crate) struct RequestIdGenerator {
    seed: u64,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::with_seed(fastrand::u64(..))
    }

    #[must_use]
    pub(crate) fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn message_id(&self, request_seq: u64) -> String {
        format_id_hex("msg_", mix_u64(self.seed ^ request_seq))
    }
}
