//! The stream multiplexer core.
//!
//! [`MultiplexCodec`] sits between a parent framing pipeline and the
//! per-stream channels. Inbound, it demultiplexes typed frames by their
//! stream binding, routes connection-scoped events (GOAWAY, SETTINGS) to
//! the right subset of streams, and batches read-complete notifications.
//! Outbound, it serializes every child channel's writes onto the parent
//! context.
//!
//! All state lives on the connection's event loop. The codec's types are
//! `!Send`; cross-thread access is impossible by construction, and write
//! submission additionally debug-asserts `ParentContext::in_event_loop`.
//! Completion listeners that need the codec re-enter it through a
//! deferred task queue drained by [`MultiplexCodec::run_pending_tasks`],
//! which every public entry point drains before returning.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::bootstrap::StreamChannelBootstrap;
use crate::channel::{InboundItem, StreamChannel};
use crate::error::{Error, ErrorCode, ProtocolException};
use crate::frame::{Frame, GoAwayFrame, StreamFrame, StreamFramePayload};
use crate::handler::{ParentContext, StreamCtx, StreamHandler, UserEvent};
use crate::metrics;
use crate::promise::WritePromise;
use crate::settings::DEFAULT_WINDOW_SIZE;
use crate::stream::{FrameStream, StreamState};

/// Deferred work queued by completion listeners and callback-context
/// operations that cannot re-enter the codec inline.
pub(crate) enum Task {
    /// The first HEADERS write of a locally-initiated stream completed.
    FirstWriteComplete {
        stream: FrameStream,
        result: Result<(), Error>,
    },
    /// A channel's outbound window crossed the zero boundary.
    WritabilityChanged { stream: FrameStream },
}

pub(crate) type TaskQueue = Rc<RefCell<VecDeque<Task>>>;

/// HTTP/2 stream multiplexer.
///
/// Demultiplexes inbound frames to per-stream channels, routes
/// connection events, serializes outbound writes, and batches
/// read-complete notifications. Generic over the [`ParentContext`]
/// supplied by the framing-layer integration.
pub struct MultiplexCodec<P> {
    server: bool,
    parent: Option<P>,
    bootstrap: StreamChannelBootstrap,
    /// Stream handle → channel. An entry exists iff the stream is not
    /// yet fully closed from the channel's perspective.
    channels: HashMap<FrameStream, StreamChannel>,
    /// Channels that received at least one frame this inbound batch.
    read_complete_batch: Vec<FrameStream>,
    /// Window credited to each stream at activation; updated by the
    /// peer's SETTINGS.
    initial_outbound_stream_window: u32,
    tasks: TaskQueue,
}

impl<P: ParentContext> MultiplexCodec<P> {
    /// Construct a multiplexer.
    ///
    /// `server` selects which stream-id parity counts as locally
    /// initiated. The bootstrap must arrive with its parent channel slot
    /// unbound.
    pub fn new(server: bool, bootstrap: StreamChannelBootstrap) -> Result<Self, Error> {
        if bootstrap.parent_bound() {
            return Err(Error::ParentAlreadySet);
        }
        Ok(Self {
            server,
            parent: None,
            bootstrap,
            channels: HashMap::new(),
            read_complete_batch: Vec::new(),
            initial_outbound_stream_window: DEFAULT_WINDOW_SIZE,
            tasks: Rc::new(RefCell::new(VecDeque::new())),
        })
    }

    /// Attach to the parent framing pipeline.
    ///
    /// Fails when the caller is not on the parent channel's event loop.
    /// Binds the bootstrap's parent channel slot.
    pub fn attach(&mut self, parent: P) -> Result<(), Error> {
        if !parent.in_event_loop() {
            return Err(Error::NotOnEventLoop);
        }
        self.bootstrap.bind_parent();
        self.parent = Some(parent);
        Ok(())
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    pub fn parent(&self) -> Option<&P> {
        self.parent.as_ref()
    }

    pub fn parent_mut(&mut self) -> Option<&mut P> {
        self.parent.as_mut()
    }

    /// The window each newly-activated stream will be credited with.
    pub fn initial_outbound_stream_window(&self) -> u32 {
        self.initial_outbound_stream_window
    }

    /// Number of registered stream channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn contains_stream(&self, stream: &FrameStream) -> bool {
        self.channels.contains_key(stream)
    }

    // ── Upstream interface (framing layer → codec) ──────────────────

    /// Deliver one inbound message.
    ///
    /// Stream frames are dispatched to their channel; GOAWAY fans out to
    /// affected locally-initiated streams; SETTINGS may update the
    /// default stream window; everything else is forwarded upstream
    /// unchanged.
    pub fn deliver_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Stream(frame) => self.read_stream_frame(frame),
            Frame::GoAway(frame) => self.read_goaway(frame),
            Frame::Settings(settings) => {
                if let Some(size) = settings.initial_window_size {
                    // Future activations only; live channels keep their
                    // window.
                    self.initial_outbound_stream_window = size;
                }
            }
            other => {
                if let Some(parent) = self.parent.as_mut() {
                    parent.forward(other);
                }
            }
        }
        self.run_pending_tasks();
    }

    /// Deliver a stream lifecycle transition.
    ///
    /// The framing layer emits only ACTIVE and CLOSED at this layer;
    /// anything else is a programming error.
    pub fn deliver_stream_event(&mut self, stream: &FrameStream, state: StreamState) {
        match state {
            StreamState::Active => {
                if let Err(err) = self.on_stream_active(stream) {
                    warn!("stream activation failed: {err}");
                }
            }
            StreamState::Closed => {
                stream.set_state(StreamState::Closed);
                self.on_stream_closed(stream);
            }
            StreamState::Idle => panic!("stream lifecycle event must be ACTIVE or CLOSED"),
        }
        self.run_pending_tasks();
    }

    /// Deliver an exception from the framing layer.
    ///
    /// A cause carrying a stream identity is fired on that stream's
    /// channel, which is then closed; anything else propagates up the
    /// parent pipeline.
    pub fn deliver_exception(&mut self, cause: ProtocolException) {
        match cause.stream().cloned() {
            Some(stream) if self.channels.contains_key(&stream) => {
                let fired = cause.clone();
                self.dispatch(&stream, move |handler, ctx| {
                    handler.on_exception(ctx, fired);
                });
                self.close_channel(&stream);
            }
            _ => {
                if let Some(parent) = self.parent.as_mut() {
                    parent.fire_exception(cause);
                }
            }
        }
        self.run_pending_tasks();
    }

    /// The current inbound batch ended: fire one read-complete per
    /// channel that received a frame during the batch.
    pub fn read_batch_complete(&mut self) {
        let batch = std::mem::take(&mut self.read_complete_batch);
        for stream in batch {
            {
                let Some(channel) = self.channels.get_mut(&stream) else {
                    continue;
                };
                // Clear before firing so a callback that enqueues more
                // inbound work re-queues the channel for the next batch.
                channel.in_read_complete_batch = false;
            }
            self.dispatch(&stream, |handler, ctx| handler.on_read_complete(ctx));
            if let Some(channel) = self.channels.get_mut(&stream) {
                channel.finish_read_burst();
            }
            self.deliver_pending(&stream);
            // Anything left beyond the read budget re-queues the channel
            // for the next batch.
            if let Some(channel) = self.channels.get_mut(&stream) {
                if !channel.read_queue.is_empty()
                    && channel.read_allowed()
                    && !channel.in_read_complete_batch
                {
                    channel.in_read_complete_batch = true;
                    self.read_complete_batch.push(stream.clone());
                }
            }
        }
        self.run_pending_tasks();
    }

    /// Connection-level flush: pass-through to the parent context.
    pub fn flush(&mut self) {
        if let Some(parent) = self.parent.as_mut() {
            parent.flush();
        }
    }

    /// Drain deferred completions (first-write activation, writability
    /// flips). Every public entry point drains before returning; the
    /// framing layer calls this after completing promises outside a
    /// delivery call.
    pub fn run_pending_tasks(&mut self) {
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else { break };
            match task {
                Task::FirstWriteComplete {
                    stream,
                    result: Ok(()),
                } => {
                    if let Err(err) = self.on_stream_active(&stream) {
                        warn!("activation after first write failed: {err}");
                    }
                }
                Task::FirstWriteComplete {
                    stream,
                    result: Err(cause),
                } => {
                    let exception = ProtocolException::stream_scoped(
                        stream.clone(),
                        ErrorCode::InternalError,
                        cause.to_string(),
                    );
                    self.dispatch(&stream, move |handler, ctx| {
                        handler.on_exception(ctx, exception);
                    });
                    self.close_channel(&stream);
                }
                Task::WritabilityChanged { stream } => {
                    self.dispatch(&stream, |handler, ctx| handler.on_writability_changed(ctx));
                }
            }
        }
    }

    // ── Channel creation ────────────────────────────────────────────

    /// Create a stream channel bound to `stream` through the bootstrap.
    ///
    /// Applies the bootstrap's options and attributes and registers the
    /// channel. Fails when the multiplexer is not attached; the
    /// half-constructed channel is then force-closed.
    pub fn connect(&mut self, stream: FrameStream) -> Result<(), Error> {
        let result = self.connect_inner(stream);
        self.run_pending_tasks();
        result
    }

    /// Create a channel for a new locally-initiated stream with no id
    /// yet. The stream opens on the wire when its first HEADERS write
    /// succeeds.
    pub fn create_outbound_channel(&mut self) -> Result<FrameStream, Error> {
        let stream = FrameStream::new();
        self.connect(stream.clone())?;
        Ok(stream)
    }

    fn connect_inner(&mut self, stream: FrameStream) -> Result<(), Error> {
        if self.channels.contains_key(&stream) {
            return Ok(());
        }
        let channel = self.bootstrap.build_channel(stream.clone());
        // The channel self-inserts at construction, before registration.
        self.channels.insert(stream.clone(), channel);
        metrics::STREAMS_ACTIVE.increment();

        // Register on the parent's event loop. The only synchronous
        // failure mode is connecting before attach; the channel never
        // reached registered state, so it is closed forcibly.
        if self.parent.is_none() || !self.bootstrap.parent_bound() {
            if let Some(mut channel) = self.channels.remove(&stream) {
                channel.close_forcibly();
            }
            metrics::STREAMS_ACTIVE.decrement();
            return Err(Error::NotAttached);
        }
        Ok(())
    }

    // ── Application interface (channel contract by stream) ──────────

    /// Submit an outbound frame on `stream`'s channel. See
    /// [`StreamCtx::write`] for the accepted messages; the write is not
    /// flushed.
    pub fn channel_write(&mut self, stream: &FrameStream, frame: Frame) -> Result<WritePromise, Error> {
        let result = {
            let Some(parent) = self.parent.as_mut() else {
                return Err(Error::NotAttached);
            };
            let Some(channel) = self.channels.get_mut(stream) else {
                return Err(Error::ChannelClosed);
            };
            channel.do_write(parent, &self.tasks, frame)
        };
        self.run_pending_tasks();
        result
    }

    /// Request delivery of queued inbound frames on `stream`'s channel.
    pub fn channel_read(&mut self, stream: &FrameStream) {
        if let Some(channel) = self.channels.get_mut(stream) {
            channel.begin_read();
        }
        self.deliver_pending(stream);
        self.run_pending_tasks();
    }

    /// Close `stream`'s channel. Sends RESET(CANCEL) unless the protocol
    /// already closed the stream. Idempotent.
    pub fn channel_close(&mut self, stream: &FrameStream) {
        self.close_channel(stream);
        self.run_pending_tasks();
    }

    /// Report DATA bytes consumed by the application on `stream`'s
    /// channel; emits a WINDOW_UPDATE (not flushed).
    pub fn channel_bytes_consumed(&mut self, stream: &FrameStream, bytes: u32) {
        let (Some(parent), Some(channel)) = (self.parent.as_mut(), self.channels.get_mut(stream))
        else {
            return;
        };
        channel.bytes_consumed(parent, bytes);
        self.run_pending_tasks();
    }

    /// Whether `stream`'s channel currently admits outbound data.
    pub fn is_writable(&self, stream: &FrameStream) -> bool {
        self.channels
            .get(stream)
            .map(StreamChannel::is_writable)
            .unwrap_or(false)
    }

    // ── Inbound dispatch ────────────────────────────────────────────

    fn read_stream_frame(&mut self, frame: StreamFrame) {
        let stream = frame
            .stream()
            .cloned()
            .expect("stream frame delivered without a stream binding");

        if !self.channels.contains_key(&stream) {
            // The framing layer should have emitted ACTIVE already.
            debug!(stream_id = ?stream.id(), "stream frame for unregistered stream, activating");
            if let Err(err) = self.on_stream_active(&stream) {
                warn!("dropping frame for stream that failed to activate: {err}");
                return;
            }
        }

        metrics::FRAMES_INBOUND.increment();

        // A WINDOW_UPDATE replenishes the outbound window before it is
        // delivered like any other stream frame.
        if let StreamFramePayload::WindowUpdate(update) = &frame.payload {
            if let Some(channel) = self.channels.get_mut(&stream) {
                if channel.credit_window(update.increment) {
                    self.tasks.borrow_mut().push_back(Task::WritabilityChanged {
                        stream: stream.clone(),
                    });
                }
            }
        }

        self.fire_child_read(&stream, frame);
    }

    fn fire_child_read(&mut self, stream: &FrameStream, frame: StreamFrame) {
        {
            let Some(channel) = self.channels.get_mut(stream) else {
                return;
            };
            channel.read_queue.push_back(InboundItem::Frame(frame));
            if !channel.in_read_complete_batch {
                channel.in_read_complete_batch = true;
                self.read_complete_batch.push(stream.clone());
            }
        }
        self.deliver_pending(stream);
    }

    fn read_goaway(&mut self, frame: GoAwayFrame) {
        let server = self.server;
        let mut affected: Vec<FrameStream> = self
            .channels
            .keys()
            .filter(|stream| stream.state() == StreamState::Active)
            .filter(|stream| {
                stream.id().is_some_and(|id| {
                    id > frame.last_stream_id && FrameStream::is_outbound(server, id)
                })
            })
            .cloned()
            .collect();
        affected.sort_by_key(FrameStream::id);

        for stream in affected {
            metrics::GOAWAY_NOTIFIED.increment();
            // Each recipient owns its own duplicate of the frame.
            let event = UserEvent::GoAway(frame.clone());
            self.dispatch(&stream, move |handler, ctx| {
                handler.on_user_event(ctx, event);
            });
        }
        // The source frame is released exactly once, here.
        drop(frame);
    }

    // ── Stream lifecycle ────────────────────────────────────────────

    /// Activate `stream`: create its channel if needed, credit the
    /// outbound window, and announce writability.
    ///
    /// Idempotent: an inbound frame can race the completion of the first
    /// HEADERS write, so both orders of activation collapse to one
    /// credit.
    fn on_stream_active(&mut self, stream: &FrameStream) -> Result<(), Error> {
        if !self.channels.contains_key(stream) {
            self.connect_inner(stream.clone())?;
        }
        stream.set_state(StreamState::Active);

        let Some(channel) = self.channels.get_mut(stream) else {
            return Ok(());
        };
        if !channel.activated {
            channel.activated = true;
            debug_assert!(!channel.is_writable());
            channel.credit_window(self.initial_outbound_stream_window);
            metrics::STREAMS_ACTIVATED.increment();
            // Credit first, then announce: a new channel starts
            // non-writable and activation is the first moment it can
            // become writable.
            self.dispatch(stream, |handler, ctx| handler.on_writability_changed(ctx));
        }
        Ok(())
    }

    fn on_stream_closed(&mut self, stream: &FrameStream) {
        let Some(channel) = self.channels.get_mut(stream) else {
            return;
        };
        channel.stream_closed();
        self.deliver_pending(stream);
    }

    fn close_channel(&mut self, stream: &FrameStream) {
        {
            let (Some(parent), Some(channel)) =
                (self.parent.as_mut(), self.channels.get_mut(stream))
            else {
                return;
            };
            channel.do_close(parent);
        }
        self.finalize_close(stream);
    }

    /// Fire the close notification and drop the registry entry once a
    /// channel has fully closed.
    fn finalize_close(&mut self, stream: &FrameStream) {
        {
            let Some(channel) = self.channels.get_mut(stream) else {
                return;
            };
            if !channel.is_closed() || channel.close_notified {
                return;
            }
            channel.close_notified = true;
        }
        self.dispatch(stream, |handler, ctx| handler.on_close(ctx));
        if self.channels.remove(stream).is_some() {
            metrics::STREAMS_CLOSED.increment();
            metrics::STREAMS_ACTIVE.decrement();
        }
    }

    // ── Handler dispatch ────────────────────────────────────────────

    /// Run a handler callback with a borrow-split context, then apply
    /// any follow-ups the callback requested (close, further reads).
    fn dispatch<F>(&mut self, stream: &FrameStream, callback: F) -> bool
    where
        F: FnOnce(&mut dyn StreamHandler, &mut StreamCtx<'_>),
    {
        let Some(parent) = self.parent.as_mut() else {
            return false;
        };
        let Some(channel) = self.channels.get_mut(stream) else {
            return false;
        };
        let Some(mut handler) = channel.take_handler() else {
            return false;
        };
        let mut ctx = StreamCtx {
            channel,
            parent,
            tasks: &self.tasks,
        };
        callback(handler.as_mut(), &mut ctx);

        if let Some(channel) = self.channels.get_mut(stream) {
            channel.put_handler(handler);
        }
        self.finalize_close(stream);
        self.deliver_pending(stream);
        true
    }

    /// Drain `stream`'s read queue to its handler, within the read-burst
    /// budget, while reads are allowed.
    fn deliver_pending(&mut self, stream: &FrameStream) {
        loop {
            let Some(parent) = self.parent.as_mut() else {
                return;
            };
            let Some(channel) = self.channels.get_mut(stream) else {
                return;
            };
            if channel.delivering
                || channel.is_closed()
                || !channel.read_allowed()
                || channel.burst_exhausted()
            {
                return;
            }
            let Some(item) = channel.read_queue.pop_front() else {
                return;
            };
            channel.note_delivered();
            match item {
                InboundItem::Frame(frame) => {
                    channel.delivering = true;
                    self.dispatch(stream, move |handler, ctx| handler.on_frame(ctx, frame));
                    match self.channels.get_mut(stream) {
                        Some(channel) => channel.delivering = false,
                        None => return,
                    }
                }
                InboundItem::EndOfStream => {
                    // Graceful close: the protocol already closed the
                    // stream, so no RESET goes out.
                    channel.do_close(parent);
                    self.finalize_close(stream);
                    return;
                }
            }
        }
    }
}

impl<P> std::fmt::Debug for MultiplexCodec<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexCodec")
            .field("server", &self.server)
            .field("channels", &self.channels.len())
            .field("batch", &self.read_complete_batch.len())
            .field(
                "initial_outbound_stream_window",
                &self.initial_outbound_stream_window,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionValue;
    use crate::settings::Settings;

    struct NoopHandler;
    impl StreamHandler for NoopHandler {
        fn on_frame(&mut self, _ctx: &mut StreamCtx<'_>, _frame: StreamFrame) {}
    }

    #[derive(Default)]
    struct Parent {
        in_loop: bool,
    }

    impl ParentContext for Parent {
        fn write(&mut self, _frame: Frame, promise: WritePromise) -> Result<(), Error> {
            promise.try_succeed();
            Ok(())
        }
        fn flush(&mut self) {}
        fn forward(&mut self, _frame: Frame) {}
        fn fire_exception(&mut self, _cause: ProtocolException) {}
        fn in_event_loop(&self) -> bool {
            self.in_loop
        }
    }

    fn bootstrap() -> StreamChannelBootstrap {
        StreamChannelBootstrap::new(|| Box::new(NoopHandler))
    }

    #[test]
    fn rejects_pre_bound_bootstrap() {
        // A bootstrap that already went through an attach is refused.
        let mut reused = bootstrap().option("auto_read", OptionValue::Bool(true));
        reused.bind_parent();
        assert_eq!(
            MultiplexCodec::<Parent>::new(false, reused).unwrap_err(),
            Error::ParentAlreadySet
        );
    }

    #[test]
    fn attach_requires_the_event_loop() {
        let mut codec = MultiplexCodec::new(false, bootstrap()).unwrap();
        let err = codec.attach(Parent::default()).unwrap_err();
        assert_eq!(err, Error::NotOnEventLoop);
    }

    #[test]
    fn connect_before_attach_fails_and_leaves_no_channel() {
        let mut codec = MultiplexCodec::<Parent>::new(false, bootstrap()).unwrap();
        let err = codec.create_outbound_channel().unwrap_err();
        assert_eq!(err, Error::NotAttached);
        assert_eq!(codec.channel_count(), 0);
    }

    #[test]
    fn settings_updates_the_default_window() {
        let mut codec = MultiplexCodec::new(false, bootstrap()).unwrap();
        codec
            .attach(Parent { in_loop: true })
            .unwrap();
        assert_eq!(codec.initial_outbound_stream_window(), DEFAULT_WINDOW_SIZE);
        codec.deliver_frame(Frame::Settings(Settings::with_initial_window_size(1_000_000)));
        assert_eq!(codec.initial_outbound_stream_window(), 1_000_000);
        // A SETTINGS without the parameter leaves it unchanged.
        codec.deliver_frame(Frame::Settings(Settings::default()));
        assert_eq!(codec.initial_outbound_stream_window(), 1_000_000);
    }

    #[test]
    #[should_panic(expected = "ACTIVE or CLOSED")]
    fn idle_lifecycle_event_is_a_programming_error() {
        let mut codec = MultiplexCodec::new(false, bootstrap()).unwrap();
        codec
            .attach(Parent { in_loop: true })
            .unwrap();
        codec.deliver_stream_event(&FrameStream::with_id(1), StreamState::Idle);
    }
}
