//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5.1).
//!
//! This is the decoded, typed view handed over by the framing layer.
//! Absent fields were not present in the SETTINGS frame; the multiplexer
//! only reacts to the parameters it cares about and leaves its defaults
//! untouched for the rest.

/// Default initial flow-control window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

/// Maximum flow-control window size: 2^31 - 1.
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// A set of HTTP/2 SETTINGS parameters.
///
/// Every field is optional: a SETTINGS frame carries only the parameters
/// the peer chose to include.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1).
    pub header_table_size: Option<u32>,
    /// SETTINGS_ENABLE_PUSH (0x2).
    pub enable_push: Option<bool>,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3).
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4).
    pub initial_window_size: Option<u32>,
    /// SETTINGS_MAX_FRAME_SIZE (0x5).
    pub max_frame_size: Option<u32>,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6).
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// A settings set carrying only an initial window size.
    pub fn with_initial_window_size(size: u32) -> Self {
        debug_assert!(size <= MAX_WINDOW_SIZE);
        Self {
            initial_window_size: Some(size),
            ..Default::default()
        }
    }
}
