//! Error types for the multiplexer.

use thiserror::Error;

use crate::stream::FrameStream;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

/// Errors returned synchronously to the caller of the multiplexer API.
///
/// These cover attachment-time misconfiguration and outbound-write misuse.
/// The offending message has already been consumed (and thereby released)
/// when one of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A locally-initiated stream tried to open with something other than
    /// a HEADERS frame.
    #[error("the first frame must be a HEADERS frame, was: {0}")]
    FirstFrameNotHeaders(&'static str),
    /// The channel only accepts stream frames and GOAWAY frames outbound.
    #[error("message must be an HTTP/2 stream frame or GOAWAY frame")]
    UnsupportedMessage,
    /// The application pre-bound the frame; the channel owns the binding.
    #[error("stream must not be set on the frame")]
    StreamAlreadySet,
    /// The multiplexer was attached from outside the parent's event loop.
    #[error("executor must be the event loop of the parent channel")]
    NotOnEventLoop,
    /// The bootstrap arrived with its parent channel slot already bound.
    #[error("parent channel must not be set on the bootstrap")]
    ParentAlreadySet,
    /// A stream channel was connected before the multiplexer was attached,
    /// so it could not be registered on the parent's event loop.
    #[error("bootstrap has no parent channel; attach the multiplexer first")]
    NotAttached,
    /// The stream channel is closed (or was never registered).
    #[error("stream channel is closed")]
    ChannelClosed,
    /// The parent context rejected a write synchronously.
    #[error("parent write failed: {0}")]
    Write(String),
}

/// An exception surfaced by the framing layer.
///
/// May carry a stream identity; stream-scoped causes are routed to the
/// affected child channel, everything else propagates up the parent
/// pipeline.
#[derive(Debug, Clone)]
pub struct ProtocolException {
    stream: Option<FrameStream>,
    pub code: ErrorCode,
    pub message: String,
}

impl ProtocolException {
    /// A cause scoped to a single stream.
    pub fn stream_scoped(stream: FrameStream, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            code,
            message: message.into(),
        }
    }

    /// A connection-scoped cause.
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream: None,
            code,
            message: message.into(),
        }
    }

    /// The stream this cause is scoped to, if any.
    pub fn stream(&self) -> Option<&FrameStream> {
        self.stream.as_ref()
    }
}

impl std::fmt::Display for ProtocolException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stream {
            Some(stream) => match stream.id() {
                Some(id) => write!(f, "stream {id} {:?}: {}", self.code, self.message),
                None => write!(f, "stream <unassigned> {:?}: {}", self.code, self.message),
            },
            None => write!(f, "connection {:?}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ProtocolException {}
