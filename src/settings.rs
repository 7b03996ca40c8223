//! SETTINGS parameters (RFC 9113 Section 6.5.2) and protocol defaults.
//!
//! Every connection owns its own [`Settings`] values, seeded from
//! [`Settings::defaults`]. Nothing here is global or shared by reference.

use std::collections::BTreeMap;

/// Initial flow-control window for streams and the connection.
pub const DEFAULT_WINDOW_SIZE: u32 = 65535;
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest SETTINGS_INITIAL_WINDOW_SIZE a peer may announce to us.
pub const MAX_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Largest SETTINGS_MAX_FRAME_SIZE either side may announce (2^24 - 1).
pub const MAX_MAX_FRAME_SIZE: u32 = 0xFF_FFFF;

/// Largest value any flow-control window may reach (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SettingId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingId {
    /// Map a wire identifier. Unknown identifiers must be ignored by the
    /// receiver, so they map to `None`.
    pub fn from_u16(id: u16) -> Option<Self> {
        match id {
            0x1 => Some(Self::HeaderTableSize),
            0x2 => Some(Self::EnablePush),
            0x3 => Some(Self::MaxConcurrentStreams),
            0x4 => Some(Self::InitialWindowSize),
            0x5 => Some(Self::MaxFrameSize),
            0x6 => Some(Self::MaxHeaderListSize),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Value a peer is assumed to use when it has not sent this parameter.
    pub fn default_value(self) -> Option<u32> {
        match self {
            Self::HeaderTableSize => Some(DEFAULT_HEADER_TABLE_SIZE),
            Self::EnablePush => Some(1),
            Self::MaxConcurrentStreams => Some(DEFAULT_MAX_CONCURRENT_STREAMS),
            Self::InitialWindowSize => Some(DEFAULT_WINDOW_SIZE),
            Self::MaxFrameSize => Some(DEFAULT_MAX_FRAME_SIZE),
            Self::MaxHeaderListSize => None,
        }
    }
}

/// A table of SETTINGS parameters, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<SettingId, u32>,
}

impl Settings {
    /// An empty table, as carried by a SETTINGS ACK.
    pub fn new() -> Self {
        Self::default()
    }

    /// The well-known values in effect before any negotiation.
    pub fn defaults() -> Self {
        let mut settings = Self::new();
        settings
            .set(SettingId::HeaderTableSize, DEFAULT_HEADER_TABLE_SIZE)
            .set(SettingId::MaxConcurrentStreams, DEFAULT_MAX_CONCURRENT_STREAMS)
            .set(SettingId::InitialWindowSize, DEFAULT_WINDOW_SIZE);
        settings
    }

    /// Build a table from raw wire pairs, dropping unknown identifiers.
    /// A repeated identifier keeps its last value.
    pub fn from_wire<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u16, u32)>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|(id, value)| SettingId::from_u16(id).map(|id| (id, value)))
            .collect();
        Self { values }
    }

    pub fn get(&self, id: SettingId) -> Option<u32> {
        self.values.get(&id).copied()
    }

    pub fn set(&mut self, id: SettingId, value: u32) -> &mut Self {
        self.values.insert(id, value);
        self
    }

    pub fn remove(&mut self, id: SettingId) -> Option<u32> {
        self.values.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingId, u32)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn initial_window_size(&self) -> u32 {
        self.get_or_default(SettingId::InitialWindowSize)
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.get_or_default(SettingId::MaxConcurrentStreams)
    }

    pub fn max_frame_size(&self) -> u32 {
        self.get_or_default(SettingId::MaxFrameSize)
    }

    pub fn header_table_size(&self) -> u32 {
        self.get_or_default(SettingId::HeaderTableSize)
    }

    fn get_or_default(&self, id: SettingId) -> u32 {
        self.get(id)
            .or_else(|| id.default_value())
            .unwrap_or(u32::MAX)
    }
}
