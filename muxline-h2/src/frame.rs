//! Typed HTTP/2 frame model.
//!
//! Frames arrive from and leave toward the framing layer fully decoded;
//! this crate never touches wire bytes. A *stream frame* carries a
//! binding to the [`FrameStream`] it belongs to. The framing layer sets
//! the binding on inbound frames before delivery; outbound frames must
//! arrive from the application with the binding unset, and the stream
//! channel binds them exactly once before submission.

use bytes::Bytes;

use crate::error::ErrorCode;
use crate::settings::Settings;
use crate::stream::FrameStream;

/// A single header name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// HEADERS: a complete decoded header block for a stream.
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub headers: Vec<HeaderField>,
    pub end_stream: bool,
}

/// DATA: a chunk of body bytes for a stream.
///
/// The payload is reference-counted; cloning the frame shares the bytes.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub payload: Bytes,
    pub end_stream: bool,
}

/// RST_STREAM: abnormal termination of a stream.
#[derive(Debug, Clone, Copy)]
pub struct ResetFrame {
    pub error_code: ErrorCode,
}

/// WINDOW_UPDATE: a flow-control window increment for a stream.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub increment: u32,
}

/// PUSH_PROMISE: a stream reservation announced by the server.
#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    pub promised_stream_id: u32,
    pub headers: Vec<HeaderField>,
}

/// The stream-scoped frame kinds.
#[derive(Debug, Clone)]
pub enum StreamFramePayload {
    Headers(HeadersFrame),
    Data(DataFrame),
    Reset(ResetFrame),
    WindowUpdate(WindowUpdateFrame),
    PushPromise(PushPromiseFrame),
}

/// A frame whose semantics are scoped to a single stream.
///
/// The stream binding starts unset for application-constructed frames.
/// It is set exactly once: by the framing layer for inbound frames, by
/// the owning stream channel for outbound frames.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    stream: Option<FrameStream>,
    pub payload: StreamFramePayload,
}

impl StreamFrame {
    pub fn headers(headers: Vec<HeaderField>, end_stream: bool) -> Self {
        Self {
            stream: None,
            payload: StreamFramePayload::Headers(HeadersFrame {
                headers,
                end_stream,
            }),
        }
    }

    pub fn data(payload: Bytes, end_stream: bool) -> Self {
        Self {
            stream: None,
            payload: StreamFramePayload::Data(DataFrame {
                payload,
                end_stream,
            }),
        }
    }

    pub fn reset(error_code: ErrorCode) -> Self {
        Self {
            stream: None,
            payload: StreamFramePayload::Reset(ResetFrame { error_code }),
        }
    }

    pub fn window_update(increment: u32) -> Self {
        Self {
            stream: None,
            payload: StreamFramePayload::WindowUpdate(WindowUpdateFrame { increment }),
        }
    }

    pub fn push_promise(promised_stream_id: u32, headers: Vec<HeaderField>) -> Self {
        Self {
            stream: None,
            payload: StreamFramePayload::PushPromise(PushPromiseFrame {
                promised_stream_id,
                headers,
            }),
        }
    }

    /// The stream this frame is bound to, if the binding has been set.
    pub fn stream(&self) -> Option<&FrameStream> {
        self.stream.as_ref()
    }

    /// Bind this frame to a stream.
    ///
    /// The binding may be set at most once; a second call is a
    /// programming error in the framing layer or the channel.
    pub fn set_stream(&mut self, stream: FrameStream) {
        debug_assert!(self.stream.is_none(), "stream binding already set");
        self.stream = Some(stream);
    }

    /// Wire name of the frame kind, for diagnostics.
    pub fn name(&self) -> &'static str {
        match &self.payload {
            StreamFramePayload::Headers(_) => "HEADERS",
            StreamFramePayload::Data(_) => "DATA",
            StreamFramePayload::Reset(_) => "RST_STREAM",
            StreamFramePayload::WindowUpdate(_) => "WINDOW_UPDATE",
            StreamFramePayload::PushPromise(_) => "PUSH_PROMISE",
        }
    }
}

/// GOAWAY: connection-scoped shutdown notice.
///
/// Cloning shares the debug-data bytes; the fan-out to affected child
/// channels hands each recipient its own clone and drops the original
/// once afterwards.
#[derive(Debug, Clone)]
pub struct GoAwayFrame {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

/// PING: connection liveness probe. Not handled here; passed through.
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    pub ack: bool,
    pub opaque_data: [u8; 8],
}

/// A typed HTTP/2 frame as delivered by the framing layer.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A frame scoped to a single stream.
    Stream(StreamFrame),
    /// Connection-scoped shutdown notice; fanned out to affected streams.
    GoAway(GoAwayFrame),
    /// Peer settings; may update the default stream window.
    Settings(Settings),
    /// Liveness probe; forwarded upstream unchanged.
    Ping(PingFrame),
    /// A frame kind this layer does not know; forwarded upstream unchanged.
    Unknown {
        frame_type: u8,
        flags: u8,
        payload: Bytes,
    },
}

impl Frame {
    /// Wire name of the frame kind, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Stream(frame) => frame.name(),
            Frame::GoAway(_) => "GOAWAY",
            Frame::Settings(_) => "SETTINGS",
            Frame::Ping(_) => "PING",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}
