//! Per-stream logical channel state.
//!
//! A [`StreamChannel`] holds everything the multiplexer tracks for one
//! stream: the bound stream handle, the application handler, the inbound
//! read queue, the outbound flow-control window, and the lifecycle flags.
//! All outbound submissions funnel through [`StreamChannel::do_write`];
//! all closes through [`StreamChannel::do_close`].

use std::any::Any;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::codec::{Task, TaskQueue};
use crate::config::ChannelConfig;
use crate::error::{Error, ErrorCode};
use crate::frame::{Frame, StreamFrame, StreamFramePayload};
use crate::handler::{ParentContext, StreamHandler};
use crate::metrics;
use crate::promise::WritePromise;
use crate::settings::MAX_WINDOW_SIZE;
use crate::stream::FrameStream;

/// An entry on a channel's inbound read queue.
pub(crate) enum InboundItem {
    /// A stream frame delivered by the framing layer.
    Frame(StreamFrame),
    /// End-of-stream sentinel: the protocol closed the stream. Once the
    /// application drains this, the channel closes.
    EndOfStream,
}

pub(crate) struct StreamChannel {
    stream: FrameStream,
    handler: Option<Box<dyn StreamHandler>>,
    config: ChannelConfig,
    attrs: HashMap<String, Rc<dyn Any>>,
    pub(crate) read_queue: VecDeque<InboundItem>,
    /// Outbound flow-control window. Writable while > 0.
    window: u32,
    /// Window credited and writability announced; guards re-activation.
    pub(crate) activated: bool,
    first_frame_written: bool,
    stream_closed_without_error: bool,
    /// Set while the channel sits on the core's read-complete batch list.
    pub(crate) in_read_complete_batch: bool,
    /// An explicit `read()` was requested and not yet completed.
    read_pending: bool,
    /// Re-entrancy guard for the delivery loop.
    pub(crate) delivering: bool,
    delivered_in_burst: usize,
    closed: bool,
    /// The close notification has been fired; the registry entry is
    /// about to be dropped.
    pub(crate) close_notified: bool,
}

impl StreamChannel {
    pub(crate) fn new(
        stream: FrameStream,
        handler: Box<dyn StreamHandler>,
        config: ChannelConfig,
        attrs: HashMap<String, Rc<dyn Any>>,
    ) -> Self {
        Self {
            stream,
            handler: Some(handler),
            config,
            attrs,
            read_queue: VecDeque::new(),
            window: 0,
            activated: false,
            first_frame_written: false,
            stream_closed_without_error: false,
            in_read_complete_batch: false,
            read_pending: false,
            delivering: false,
            delivered_in_burst: 0,
            closed: false,
            close_notified: false,
        }
    }

    pub(crate) fn stream(&self) -> &FrameStream {
        &self.stream
    }

    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub(crate) fn attr(&self, name: &str) -> Option<Rc<dyn Any>> {
        self.attrs.get(name).cloned()
    }

    pub(crate) fn take_handler(&mut self) -> Option<Box<dyn StreamHandler>> {
        self.handler.take()
    }

    pub(crate) fn put_handler(&mut self, handler: Box<dyn StreamHandler>) {
        debug_assert!(self.handler.is_none());
        self.handler = Some(handler);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    // ── Read-side state ─────────────────────────────────────────────

    /// Whether queued frames may be dispatched to the handler right now.
    pub(crate) fn read_allowed(&self) -> bool {
        self.config.auto_read || self.read_pending
    }

    /// An explicit read request from the application.
    pub(crate) fn begin_read(&mut self) {
        self.read_pending = true;
        self.delivered_in_burst = 0;
    }

    /// Reset per-burst accounting after a read-complete fires.
    pub(crate) fn finish_read_burst(&mut self) {
        self.read_pending = false;
        self.delivered_in_burst = 0;
    }

    pub(crate) fn burst_exhausted(&self) -> bool {
        self.delivered_in_burst >= self.config.max_messages_per_read
    }

    pub(crate) fn note_delivered(&mut self) {
        self.delivered_in_burst += 1;
    }

    // ── Outbound flow-control window ────────────────────────────────

    pub(crate) fn is_writable(&self) -> bool {
        self.window > 0
    }

    pub(crate) fn window(&self) -> u32 {
        self.window
    }

    /// Add `increment` to the outbound window, clamped to 2^31 - 1.
    /// Returns true when the channel just became writable.
    pub(crate) fn credit_window(&mut self, increment: u32) -> bool {
        let was_writable = self.is_writable();
        self.window = self.window.saturating_add(increment).min(MAX_WINDOW_SIZE);
        !was_writable && self.is_writable()
    }

    /// Debit the window for an outbound DATA payload, saturating at zero.
    /// Returns true when the channel just became non-writable.
    fn debit_window(&mut self, bytes: usize) -> bool {
        let was_writable = self.is_writable();
        let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
        self.window = self.window.saturating_sub(bytes);
        was_writable && !self.is_writable()
    }

    // ── Protocol-side lifecycle ─────────────────────────────────────

    /// The protocol closed this stream without an error. Enqueues the
    /// end-of-stream sentinel; the channel closes once it is drained.
    pub(crate) fn stream_closed(&mut self) {
        self.stream_closed_without_error = true;
        self.read_queue.push_back(InboundItem::EndOfStream);
    }

    // ── Outbound path ───────────────────────────────────────────────

    /// Submit an outbound message on this channel.
    ///
    /// Accepts stream frames and GOAWAY frames. Stream frames must
    /// arrive with the stream binding unset; the first frame of a
    /// locally-initiated stream must be HEADERS. Rejected messages are
    /// consumed. The write is not flushed.
    pub(crate) fn do_write(
        &mut self,
        parent: &mut dyn ParentContext,
        tasks: &TaskQueue,
        msg: Frame,
    ) -> Result<WritePromise, Error> {
        if self.closed {
            return Err(Error::ChannelClosed);
        }
        match msg {
            Frame::Stream(mut frame) => {
                if frame.stream().is_some() {
                    return Err(Error::StreamAlreadySet);
                }
                let child_promise = WritePromise::new();
                if !self.first_frame_written && !self.stream.has_id() {
                    if !matches!(frame.payload, StreamFramePayload::Headers(_)) {
                        return Err(Error::FirstFrameNotHeaders(frame.name()));
                    }
                    // One-shot: activation on success, exception + close
                    // on failure. Runs via the core's deferred task queue
                    // so completion from within a callback is safe.
                    let stream = self.stream.clone();
                    let queue = Rc::clone(tasks);
                    child_promise.add_listener(move |result| {
                        queue.borrow_mut().push_back(Task::FirstWriteComplete {
                            stream,
                            result: result.clone(),
                        });
                    });
                    self.first_frame_written = true;
                }
                frame.set_stream(self.stream.clone());
                if let StreamFramePayload::Data(data) = &frame.payload {
                    if self.debit_window(data.payload.len()) {
                        tasks.borrow_mut().push_back(Task::WritabilityChanged {
                            stream: self.stream.clone(),
                        });
                    }
                }
                // Wrap the child promise in a fresh parent promise so the
                // parent write's completion propagates to the child. The
                // child promise is non-cancellable by construction.
                let parent_promise = WritePromise::new();
                parent_promise.forward_to(&child_promise);
                Self::write_to_parent(parent, Frame::Stream(frame), parent_promise, false);
                Ok(child_promise)
            }
            msg @ Frame::GoAway(_) => {
                let child_promise = WritePromise::new();
                let parent_promise = WritePromise::new();
                parent_promise.forward_to(&child_promise);
                Self::write_to_parent(parent, msg, parent_promise, false);
                Ok(child_promise)
            }
            _ => Err(Error::UnsupportedMessage),
        }
    }

    /// Report application-consumed DATA bytes: emit a WINDOW_UPDATE for
    /// this stream on the parent (not flushed).
    pub(crate) fn bytes_consumed(&mut self, parent: &mut dyn ParentContext, bytes: u32) {
        if bytes == 0 {
            return;
        }
        let mut frame = StreamFrame::window_update(bytes);
        frame.set_stream(self.stream.clone());
        Self::write_to_parent(parent, Frame::Stream(frame), WritePromise::new(), false);
    }

    /// Close this channel.
    ///
    /// If the close was not initiated by the protocol and the stream is
    /// open on the wire, a RESET(CANCEL) is written and flushed first.
    /// Idempotent.
    pub(crate) fn do_close(&mut self, parent: &mut dyn ParentContext) {
        if self.closed {
            return;
        }
        if !self.stream_closed_without_error && self.stream.has_id() {
            let mut reset = StreamFrame::reset(ErrorCode::Cancel);
            reset.set_stream(self.stream.clone());
            Self::write_to_parent(parent, Frame::Stream(reset), WritePromise::new(), true);
        }
        self.closed = true;
    }

    /// Force-close without touching the wire: registration never
    /// completed, so there is nothing to cancel.
    pub(crate) fn close_forcibly(&mut self) {
        self.closed = true;
    }

    /// Perform a write on the parent context, mapping a synchronous
    /// failure onto the promise.
    pub(crate) fn write_to_parent(
        parent: &mut dyn ParentContext,
        frame: Frame,
        promise: WritePromise,
        flush: bool,
    ) {
        debug_assert!(parent.in_event_loop());
        metrics::FRAMES_OUTBOUND.increment();
        if let Err(cause) = parent.write(frame, promise.clone()) {
            promise.try_fail(cause);
        }
        if flush {
            parent.flush();
        }
    }
}
