//! Per-connection configuration.

use crate::h2_codec::MAX_HEADER_BLOCK_SIZE;
use crate::settings::{SettingId, Settings};

/// Default cap on frames drained by a single `recv_response`/`recv_request`.
pub const DEFAULT_MAX_RECV_FRAMES: usize = 1024;

/// Values a [`Connection`](crate::Connection) is created with.
///
/// Each connection takes its own copy; changing a config after
/// `establish` has no effect on live connections.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// SETTINGS announced to the peer in our first frame.
    pub settings: Settings,
    /// Upper bound on frames a receive adapter drains before giving up on
    /// a peer that never sends END_STREAM.
    pub max_recv_frames: usize,
    /// Upper bound on an assembled HEADERS + CONTINUATION block.
    pub max_header_block_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let mut settings = Settings::defaults();
        settings.set(SettingId::EnablePush, 0);
        Self {
            settings,
            max_recv_frames: DEFAULT_MAX_RECV_FRAMES,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_initial_window_size(mut self, size: u32) -> Self {
        self.settings.set(SettingId::InitialWindowSize, size);
        self
    }

    pub fn with_max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.set(SettingId::MaxConcurrentStreams, max);
        self
    }

    pub fn with_max_recv_frames(mut self, max: usize) -> Self {
        self.max_recv_frames = max;
        self
    }

    pub fn with_max_header_block_size(mut self, max: usize) -> Self {
        self.max_header_block_size = max;
        self
    }
}
