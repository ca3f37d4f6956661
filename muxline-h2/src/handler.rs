//! The application handler contract and its callback context.

use std::any::Any;
use std::rc::Rc;

use crate::channel::StreamChannel;
use crate::codec::TaskQueue;
use crate::config::ChannelConfig;
use crate::error::{Error, ProtocolException};
use crate::frame::{Frame, GoAwayFrame, ResetFrame, StreamFrame};
use crate::promise::WritePromise;
use crate::stream::FrameStream;

/// The multiplexer's handle to the parent framing pipeline.
///
/// Implemented by the integration that glues the multiplexer to a frame
/// codec. All methods are invoked on the connection's event loop.
pub trait ParentContext {
    /// Queue `frame` for writing on the parent channel.
    ///
    /// A synchronous failure is returned; the caller maps it onto the
    /// promise. Asynchronous completion is reported by completing
    /// `promise` once the write succeeds or fails on the wire.
    fn write(&mut self, frame: Frame, promise: WritePromise) -> Result<(), Error>;

    /// Flush pending writes to the transport.
    fn flush(&mut self);

    /// Pass a message the multiplexer does not handle further upstream.
    fn forward(&mut self, frame: Frame);

    /// Propagate a connection-scoped exception up the parent pipeline.
    fn fire_exception(&mut self, cause: ProtocolException);

    /// Whether the caller is currently on the parent channel's event loop.
    ///
    /// Single-threaded integrations can rely on the default.
    fn in_event_loop(&self) -> bool {
        true
    }
}

/// Connection-scoped events surfaced to a stream channel's handler.
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// The peer announced shutdown and this locally-initiated stream will
    /// not be processed. Each affected channel receives its own clone.
    GoAway(GoAwayFrame),
    /// The framing layer observed a reset for this stream.
    Reset(ResetFrame),
}

/// Per-stream application handler.
///
/// One handler instance is installed on each stream channel. Callbacks
/// run on the connection's event loop; the [`StreamCtx`] grants access
/// to the channel's verbs for the duration of the callback.
pub trait StreamHandler {
    /// An inbound frame for this stream.
    fn on_frame(&mut self, ctx: &mut StreamCtx<'_>, frame: StreamFrame);

    /// The current inbound read batch for this stream is complete.
    fn on_read_complete(&mut self, _ctx: &mut StreamCtx<'_>) {}

    /// The channel's writability flipped (outbound window zero/non-zero).
    fn on_writability_changed(&mut self, _ctx: &mut StreamCtx<'_>) {}

    /// A connection-scoped event affecting this stream.
    fn on_user_event(&mut self, _ctx: &mut StreamCtx<'_>, _event: UserEvent) {}

    /// A stream-scoped exception from the framing layer. The channel is
    /// closed after this returns.
    fn on_exception(&mut self, _ctx: &mut StreamCtx<'_>, _cause: ProtocolException) {}

    /// The channel finished closing.
    fn on_close(&mut self, _ctx: &mut StreamCtx<'_>) {}
}

/// Callback context for a stream channel.
///
/// Borrows the channel's state and the parent context for the duration
/// of a handler callback.
pub struct StreamCtx<'a> {
    pub(crate) channel: &'a mut StreamChannel,
    pub(crate) parent: &'a mut dyn ParentContext,
    pub(crate) tasks: &'a TaskQueue,
}

impl StreamCtx<'_> {
    /// The stream this channel is bound to.
    pub fn stream(&self) -> FrameStream {
        self.channel.stream().clone()
    }

    /// Submit an outbound frame on this channel.
    ///
    /// Accepts stream frames (bound to this stream automatically) and
    /// GOAWAY frames. The returned promise completes when the parent
    /// write does. The write is not flushed; call [`flush`](Self::flush).
    pub fn write(&mut self, frame: Frame) -> Result<WritePromise, Error> {
        self.channel.do_write(self.parent, self.tasks, frame)
    }

    /// Flush writes queued on the parent channel.
    pub fn flush(&mut self) {
        self.parent.flush();
    }

    /// Request delivery of queued inbound frames.
    ///
    /// Delivery happens after the current callback returns.
    pub fn read(&mut self) {
        self.channel.begin_read();
    }

    /// Close this channel. Sends RESET(CANCEL) unless the stream was
    /// already closed by the protocol. Idempotent.
    pub fn close(&mut self) {
        self.channel.do_close(self.parent);
    }

    /// Report `bytes` of a DATA frame consumed by the application.
    /// Emits a WINDOW_UPDATE for this stream (not flushed).
    pub fn consume_bytes(&mut self, bytes: u32) {
        self.channel.bytes_consumed(self.parent, bytes);
    }

    /// Whether the outbound window currently admits data.
    pub fn is_writable(&self) -> bool {
        self.channel.is_writable()
    }

    /// The remaining outbound flow-control window.
    pub fn window(&self) -> u32 {
        self.channel.window()
    }

    /// This channel's configuration.
    pub fn config(&self) -> &ChannelConfig {
        self.channel.config()
    }

    /// A typed attribute installed by the bootstrap.
    pub fn attr<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        self.channel
            .attr(name)
            .and_then(|any| Rc::downcast::<T>(any).ok())
    }
}

impl std::fmt::Debug for StreamCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCtx")
            .field("stream", self.channel.stream())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Any-downcast plumbing for channel attributes.
    #[test]
    fn attr_downcast() {
        let value: Rc<dyn Any> = Rc::new(7u32);
        let n = Rc::downcast::<u32>(value).unwrap();
        assert_eq!(*n, 7);
    }
}
