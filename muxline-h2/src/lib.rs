//! muxline-h2 — HTTP/2 stream multiplexer.
//!
//! This crate sits on top of a single HTTP/2 framing connection and
//! presents each stream as an independent, bidirectional logical
//! channel. It is sans-IO: the framing layer feeds typed frames and
//! lifecycle events in, and the multiplexer writes typed frames back
//! out through a [`ParentContext`]. Wire parsing, HPACK, the transport,
//! and the event loop all live outside.
//!
//! # Architecture
//!
//! ```text
//!        frames / stream events / exceptions
//!              |
//!   +----------v-----------+
//!   |    MultiplexCodec    |  registry: stream -> channel
//!   |                      |  read-complete batching
//!   +--+-------+--------+--+  outbound serialization
//!      |       |        |
//!   channel  channel  channel   per-stream: read queue, window,
//!      |       |        |       lifecycle flags
//!   handler  handler  handler   application callbacks
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use muxline_h2::{MultiplexCodec, StreamChannelBootstrap, StreamHandler};
//!
//! let bootstrap = StreamChannelBootstrap::new(|| Box::new(MyHandler::new()));
//! let mut mux = MultiplexCodec::new(true, bootstrap)?;
//! mux.attach(framer_ctx)?;
//!
//! // The framing layer drives the multiplexer:
//! mux.deliver_stream_event(&stream, StreamState::Active);
//! mux.deliver_frame(frame);
//! mux.read_batch_complete();
//! ```
//!
//! # Threading
//!
//! Single-threaded per connection: every type here is `!Send` and all
//! calls must happen on the connection's event loop. Handlers that hand
//! work to other executors must re-enter through that loop.

// ── Internal modules ────────────────────────────────────────────────
pub(crate) mod channel;
pub(crate) mod metrics;

// ── Public modules ──────────────────────────────────────────────────
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod handler;
pub mod promise;
pub mod settings;
pub mod stream;

// ── Re-exports: core ────────────────────────────────────────────────

/// The stream multiplexer.
pub use codec::MultiplexCodec;
/// Builder for stream channels (handler template, options, attributes).
pub use bootstrap::StreamChannelBootstrap;

// ── Re-exports: application contract ────────────────────────────────

/// Per-stream application handler.
pub use handler::StreamHandler;
/// Callback context for a stream channel.
pub use handler::StreamCtx;
/// The multiplexer's handle to the parent framing pipeline.
pub use handler::ParentContext;
/// Connection-scoped events surfaced to a stream's handler.
pub use handler::UserEvent;

// ── Re-exports: data model ──────────────────────────────────────────

/// A typed HTTP/2 frame.
pub use frame::Frame;
/// A frame scoped to a single stream, with its stream binding.
pub use frame::StreamFrame;
/// The stream-scoped frame kinds.
pub use frame::StreamFramePayload;
/// A single header name-value pair.
pub use frame::HeaderField;
/// Connection-scoped shutdown notice.
pub use frame::GoAwayFrame;
/// Protocol-level stream handle with identity semantics.
pub use stream::FrameStream;
/// Lifecycle state of a protocol-level stream.
pub use stream::StreamState;
/// HTTP/2 SETTINGS parameters.
pub use settings::Settings;

// ── Re-exports: support types ───────────────────────────────────────

/// Per-channel configuration.
pub use config::ChannelConfig;
/// A channel option value.
pub use config::OptionValue;
/// HTTP/2 error codes (RFC 7540 Section 7).
pub use error::ErrorCode;
/// Synchronous API errors.
pub use error::Error;
/// An exception surfaced by the framing layer.
pub use error::ProtocolException;
/// One-shot completion handle for a submitted write.
pub use promise::WritePromise;
