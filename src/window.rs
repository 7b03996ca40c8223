//! Flow-control accounting (RFC 9113 Section 5.2).
//!
//! A [`Window`] is pure arithmetic. It never sends anything itself: when
//! inbound credit runs low, [`Window::consume`] returns the increment the
//! caller must announce in a WINDOW_UPDATE frame.

use crate::settings::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowControlError {
    /// The peer sent more than our receive window allowed.
    #[error("received {requested} bytes with only {available} bytes of window left")]
    WindowExceeded { requested: u32, available: i64 },

    /// We tried to send more than the peer granted.
    #[error("cannot spend {requested} bytes with {available} bytes of send credit")]
    InsufficientCredit { requested: u32, available: i64 },

    #[error("window increment of {increment} overflows the 2^31-1 limit")]
    Overflow { increment: u32 },

    #[error("window increment of 0")]
    ZeroIncrement,

    #[error("SETTINGS_INITIAL_WINDOW_SIZE {0} exceeds 65535")]
    InitialWindowTooLarge(u32),
}

/// Credit account for one direction pair: what the peer may still send us
/// (`current_size`) and what we may still send the peer (`peer_current_size`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    initial_size: i64,
    current_size: i64,
    peer_initial_size: i64,
    peer_current_size: i64,
    threshold: i64,
}

impl Default for Window {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_WINDOW_SIZE)
    }
}

impl Window {
    /// `initial_size` is the receive window we announced; `peer_initial_size`
    /// is the one the peer announced. The replenish threshold is half of the
    /// receive window.
    pub fn new(initial_size: u32, peer_initial_size: u32) -> Self {
        Self::with_threshold(initial_size, peer_initial_size, initial_size / 2)
    }

    pub fn with_threshold(initial_size: u32, peer_initial_size: u32, threshold: u32) -> Self {
        Self {
            initial_size: initial_size as i64,
            current_size: initial_size as i64,
            peer_initial_size: peer_initial_size as i64,
            peer_current_size: peer_initial_size as i64,
            threshold: threshold.min(initial_size) as i64,
        }
    }

    pub fn initial_size(&self) -> i64 {
        self.initial_size
    }

    pub fn current_size(&self) -> i64 {
        self.current_size
    }

    pub fn peer_initial_size(&self) -> i64 {
        self.peer_initial_size
    }

    /// Send credit left. May be negative after the peer shrank its initial
    /// window below what we had already sent.
    pub fn peer_current_size(&self) -> i64 {
        self.peer_current_size
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Account for `n` received flow-controlled bytes.
    ///
    /// Returns the increment to announce when the window fell below the
    /// threshold; that increment has already been added back.
    pub fn consume(&mut self, n: u32) -> Result<Option<u32>, FlowControlError> {
        if n as i64 > self.current_size {
            return Err(FlowControlError::WindowExceeded {
                requested: n,
                available: self.current_size,
            });
        }
        self.current_size -= n as i64;

        if self.current_size < self.threshold {
            let update = self.initial_size - self.current_size;
            self.current_size += update;
            return Ok(Some(update as u32));
        }
        Ok(None)
    }

    /// Spend `n` bytes of send credit.
    pub fn spend_peer(&mut self, n: u32) -> Result<(), FlowControlError> {
        if n as i64 > self.peer_current_size {
            return Err(FlowControlError::InsufficientCredit {
                requested: n,
                available: self.peer_current_size,
            });
        }
        self.peer_current_size -= n as i64;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE received from the peer.
    pub fn credit_peer(&mut self, increment: u32) -> Result<(), FlowControlError> {
        if increment == 0 {
            return Err(FlowControlError::ZeroIncrement);
        }
        let credited = self.peer_current_size + increment as i64;
        if credited > MAX_WINDOW_SIZE as i64 {
            return Err(FlowControlError::Overflow { increment });
        }
        self.peer_current_size = credited;
        Ok(())
    }

    /// Move send credit from one peer initial window size to another.
    pub fn rebase(&mut self, old_initial: u32, new_initial: u32) {
        self.peer_current_size += new_initial as i64 - old_initial as i64;
        self.peer_initial_size = new_initial as i64;
    }
}
