//! Nonce-conflict classification and backoff for sponsored submission.
//!
//! Concurrent settlements share one facilitator signer, so raw submissions
//! can collide on the account nonce. Recovery needs no in-process nonce
//! counter: every attempt refetches the count from the chain ("pending" for
//! submission, "latest" for too-high recovery) and waits a classified
//! backoff before retrying.

use std::time::Duration;

/// Default number of submission attempts before giving up.
pub const DEFAULT_NONCE_RETRY_ATTEMPTS: u32 = 5;

/// The kinds of nonce trouble an RPC node reports on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceConflict {
    /// Another transaction consumed the nonce first.
    TooLow,
    /// A gap opened below our nonce; the chain view must be refreshed.
    TooHigh,
    /// The exact transaction (or nonce) is already in the pool.
    AlreadyUsed,
    /// Some other nonce-related complaint.
    Other,
}

impl NonceConflict {
    /// Classifies an RPC submission error. `None` means the error is not
    /// nonce-related and must abort the retry loop.
    pub fn classify(message: &str) -> Option<Self> {
        let msg = message.to_ascii_lowercase();
        if msg.contains("nonce too low") {
            return Some(Self::TooLow);
        }
        if msg.contains("nonce too high") {
            return Some(Self::TooHigh);
        }
        if msg.contains("already used") || msg.contains("already known") {
            return Some(Self::AlreadyUsed);
        }
        if msg.contains("nonce") {
            return Some(Self::Other);
        }
        None
    }

    /// How long to wait before the given retry attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self {
            Self::TooLow => Duration::from_millis(2000) * attempt,
            Self::TooHigh => Duration::from_millis(1000),
            Self::AlreadyUsed => Duration::from_millis(1500) * attempt,
            Self::Other => Duration::from_millis(1000) * attempt,
        }
    }
}
