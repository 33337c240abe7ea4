//! Correlation counters for NMP sequence numbers and CoAP tokens.
//!
//! Counters are injected into a session at construction time. A fresh
//! [`Correlators`] gives per-session uniqueness, which is all the protocol
//! requires; cloning one and handing the clones to several sessions makes them
//! draw from the same counters.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Length of generated CoAP tokens in bytes.
pub const TOKEN_LEN: usize = 8;

/// Single-byte NMP sequence number generator.
#[derive(Debug, Default)]
pub struct SeqCounter {
    next: AtomicU8,
}

impl SeqCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter whose first value is `seq`.
    pub fn starting_at(seq: u8) -> Self {
        Self {
            next: AtomicU8::new(seq),
        }
    }

    /// Returns the next sequence number, wrapping after 255.
    pub fn next(&self) -> u8 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Monotonic CoAP token generator.
///
/// Tokens are the big-endian encoding of a 64-bit counter, so two tokens from
/// the same generator never collide.
#[derive(Debug)]
pub struct TokenCounter {
    next: AtomicU64,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(value: u64) -> Self {
        Self {
            next: AtomicU64::new(value),
        }
    }

    pub fn next(&self) -> Vec<u8> {
        self.next.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The pair of counters a session draws correlators from. Clones share the
/// underlying counters.
#[derive(Debug, Clone, Default)]
pub struct Correlators {
    pub seq: Arc<SeqCounter>,
    pub token: Arc<TokenCounter>,
}

impl Correlators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seq(mut self, seq: SeqCounter) -> Self {
        self.seq = Arc::new(seq);
        self
    }

    pub fn with_token(mut self, token: TokenCounter) -> Self {
        self.token = Arc::new(token);
        self
    }
}
