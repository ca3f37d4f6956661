//! Integration tests: drive the multiplexer the way a framing layer
//! would and observe what reaches the parent context and the per-stream
//! handlers.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use muxline_h2::error::ErrorCode;
use muxline_h2::{
    Error, Frame, FrameStream, HeaderField, MultiplexCodec, OptionValue, ParentContext,
    ProtocolException, Settings, StreamChannelBootstrap, StreamCtx, StreamFrame,
    StreamFramePayload, StreamHandler, StreamState, UserEvent, WritePromise,
};

// ── Recording parent: plays the framing layer ───────────────────────

#[derive(Default)]
struct ParentLog {
    writes: Vec<Frame>,
    flushes: usize,
    forwarded: Vec<Frame>,
    exceptions: Vec<ProtocolException>,
}

/// Completes every write immediately and, like a real framer, assigns
/// the next stream id when an unopened stream's HEADERS hits the wire.
struct FramerParent {
    log: Rc<RefCell<ParentLog>>,
    next_stream_id: u32,
}

impl ParentContext for FramerParent {
    fn write(&mut self, frame: Frame, promise: WritePromise) -> Result<(), Error> {
        if let Frame::Stream(stream_frame) = &frame {
            if let Some(stream) = stream_frame.stream() {
                if !stream.has_id()
                    && matches!(stream_frame.payload, StreamFramePayload::Headers(_))
                {
                    stream.set_id(self.next_stream_id);
                    self.next_stream_id += 2;
                }
            }
        }
        self.log.borrow_mut().writes.push(frame);
        promise.try_succeed();
        Ok(())
    }

    fn flush(&mut self) {
        self.log.borrow_mut().flushes += 1;
    }

    fn forward(&mut self, frame: Frame) {
        self.log.borrow_mut().forwarded.push(frame);
    }

    fn fire_exception(&mut self, cause: ProtocolException) {
        self.log.borrow_mut().exceptions.push(cause);
    }
}

// ── Recording handler ───────────────────────────────────────────────

#[derive(Default)]
struct Events {
    stream_id: Option<u32>,
    frames: Vec<StreamFrame>,
    read_completes: usize,
    /// (is_writable, window) at each writability notification.
    writability: Vec<(bool, u32)>,
    user_events: Vec<UserEvent>,
    exceptions: Vec<ProtocolException>,
    closed: bool,
}

struct Recorder {
    events: Rc<RefCell<Events>>,
}

impl StreamHandler for Recorder {
    fn on_frame(&mut self, ctx: &mut StreamCtx<'_>, frame: StreamFrame) {
        let mut events = self.events.borrow_mut();
        events.stream_id = ctx.stream().id();
        events.frames.push(frame);
    }

    fn on_read_complete(&mut self, _ctx: &mut StreamCtx<'_>) {
        self.events.borrow_mut().read_completes += 1;
    }

    fn on_writability_changed(&mut self, ctx: &mut StreamCtx<'_>) {
        let mut events = self.events.borrow_mut();
        events.stream_id = ctx.stream().id();
        events.writability.push((ctx.is_writable(), ctx.window()));
    }

    fn on_user_event(&mut self, _ctx: &mut StreamCtx<'_>, event: UserEvent) {
        self.events.borrow_mut().user_events.push(event);
    }

    fn on_exception(&mut self, _ctx: &mut StreamCtx<'_>, cause: ProtocolException) {
        self.events.borrow_mut().exceptions.push(cause);
    }

    fn on_close(&mut self, _ctx: &mut StreamCtx<'_>) {
        self.events.borrow_mut().closed = true;
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

type HandlerLogs = Rc<RefCell<Vec<Rc<RefCell<Events>>>>>;

struct Fixture {
    codec: MultiplexCodec<FramerParent>,
    parent: Rc<RefCell<ParentLog>>,
    /// One entry per created channel, in creation order.
    handlers: HandlerLogs,
}

fn fixture_with(server: bool, configure: impl FnOnce(StreamChannelBootstrap) -> StreamChannelBootstrap) -> Fixture {
    let parent = Rc::new(RefCell::new(ParentLog::default()));
    let handlers: HandlerLogs = Rc::default();
    let logs = Rc::clone(&handlers);
    let bootstrap = configure(StreamChannelBootstrap::new(move || {
        let events = Rc::new(RefCell::new(Events::default()));
        logs.borrow_mut().push(Rc::clone(&events));
        Box::new(Recorder { events })
    }));
    let mut codec = MultiplexCodec::new(server, bootstrap).unwrap();
    codec
        .attach(FramerParent {
            log: Rc::clone(&parent),
            next_stream_id: if server { 2 } else { 1 },
        })
        .unwrap();
    Fixture {
        codec,
        parent,
        handlers,
    }
}

fn fixture(server: bool) -> Fixture {
    fixture_with(server, |bootstrap| bootstrap)
}

impl Fixture {
    fn events(&self, index: usize) -> Rc<RefCell<Events>> {
        Rc::clone(&self.handlers.borrow()[index])
    }

    fn activate(&mut self, id: u32) -> FrameStream {
        let stream = FrameStream::with_id(id);
        self.codec.deliver_stream_event(&stream, StreamState::Active);
        stream
    }
}

/// Bind a frame to `stream` the way the framer does before delivery.
fn inbound(stream: &FrameStream, mut frame: StreamFrame) -> Frame {
    frame.set_stream(stream.clone());
    Frame::Stream(frame)
}

fn request_headers() -> Vec<HeaderField> {
    vec![
        HeaderField::new(b":method".as_slice(), b"GET".as_slice()),
        HeaderField::new(b":path".as_slice(), b"/".as_slice()),
    ]
}

// ── Scenario A: inbound request (server role) ───────────────────────

#[test]
fn inbound_request_reaches_one_child_and_batches_read_complete() {
    let mut fx = fixture(true);

    let stream = fx.activate(1);
    assert_eq!(fx.codec.channel_count(), 1);

    fx.codec
        .deliver_frame(inbound(&stream, StreamFrame::headers(request_headers(), false)));
    fx.codec.deliver_frame(inbound(
        &stream,
        StreamFrame::data(Bytes::from_static(b"ping"), true),
    ));
    fx.codec.read_batch_complete();

    let events = fx.events(0);
    let events = events.borrow();
    assert_eq!(events.stream_id, Some(1));
    assert_eq!(events.frames.len(), 2);
    assert_eq!(events.frames[0].name(), "HEADERS");
    assert_eq!(events.frames[1].name(), "DATA");
    assert_eq!(events.read_completes, 1);
    drop(events);

    // Application consumed the body: one WINDOW_UPDATE(stream=1, 4).
    fx.codec.channel_bytes_consumed(&stream, 4);
    let parent = fx.parent.borrow();
    let update = parent
        .writes
        .iter()
        .find_map(|frame| match frame {
            Frame::Stream(sf) => match &sf.payload {
                StreamFramePayload::WindowUpdate(wu) => Some((sf.stream().unwrap().id(), wu.increment)),
                _ => None,
            },
            _ => None,
        })
        .expect("WINDOW_UPDATE written");
    assert_eq!(update, (Some(1), 4));
}

// ── Scenario B: outbound request (client role) ──────────────────────

#[test]
fn first_headers_write_opens_and_activates_the_stream() {
    let mut fx = fixture(false);

    let stream = fx.codec.create_outbound_channel().unwrap();
    assert!(!stream.has_id());
    assert!(!fx.codec.is_writable(&stream));

    let promise = fx
        .codec
        .channel_write(
            &stream,
            Frame::Stream(StreamFrame::headers(request_headers(), false)),
        )
        .unwrap();
    assert_eq!(promise.result(), Some(Ok(())));

    // The framer assigned the id on the wire; write success activated
    // the stream and credited the default window.
    assert_eq!(stream.id(), Some(1));
    assert_eq!(stream.state(), StreamState::Active);
    assert!(fx.codec.is_writable(&stream));

    let events = fx.events(0);
    let events = events.borrow();
    assert_eq!(events.writability, vec![(true, 65_535)]);
    drop(events);

    let parent = fx.parent.borrow();
    assert_eq!(parent.writes.len(), 1);
    match &parent.writes[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.name(), "HEADERS");
            assert_eq!(frame.stream().unwrap().id(), Some(1));
        }
        other => panic!("expected HEADERS on the parent, got {}", other.name()),
    }
}

// ── Scenario C: GOAWAY fan-out ──────────────────────────────────────

#[test]
fn goaway_notifies_only_local_streams_past_the_threshold() {
    let mut fx = fixture(false);
    fx.activate(1);
    fx.activate(3);
    fx.activate(5);

    fx.codec.deliver_frame(Frame::GoAway(muxline_h2::GoAwayFrame {
        last_stream_id: 3,
        error_code: ErrorCode::NoError,
        debug_data: Bytes::from_static(b"shutting down"),
    }));

    for (index, expected) in [(0, 0), (1, 0), (2, 1)] {
        let events = fx.events(index);
        let events = events.borrow();
        assert_eq!(
            events.user_events.len(),
            expected,
            "channel {index} notification count"
        );
    }
    let events = fx.events(2);
    let events = events.borrow();
    match &events.user_events[0] {
        UserEvent::GoAway(goaway) => {
            assert_eq!(goaway.last_stream_id, 3);
            assert_eq!(&goaway.debug_data[..], b"shutting down");
        }
        other => panic!("expected GOAWAY event, got {other:?}"),
    }
}

#[test]
fn goaway_at_zero_notifies_every_local_stream() {
    let mut fx = fixture(false);
    fx.activate(1);
    fx.activate(3);

    fx.codec.deliver_frame(Frame::GoAway(muxline_h2::GoAwayFrame {
        last_stream_id: 0,
        error_code: ErrorCode::NoError,
        debug_data: Bytes::new(),
    }));

    for index in 0..2 {
        assert_eq!(fx.events(index).borrow().user_events.len(), 1);
    }
}

#[test]
fn goaway_skips_remotely_initiated_streams() {
    // Server role: odd ids are the peer's, even ids are ours.
    let mut fx = fixture(true);
    fx.activate(1);
    fx.activate(2);

    fx.codec.deliver_frame(Frame::GoAway(muxline_h2::GoAwayFrame {
        last_stream_id: 0,
        error_code: ErrorCode::NoError,
        debug_data: Bytes::new(),
    }));

    assert_eq!(fx.events(0).borrow().user_events.len(), 0);
    assert_eq!(fx.events(1).borrow().user_events.len(), 1);
}

// ── Scenario D: application close before stream-CLOSED ──────────────

#[test]
fn application_close_sends_reset_cancel() {
    let mut fx = fixture(false);
    let stream = fx.activate(7);

    fx.codec.channel_close(&stream);

    let parent = fx.parent.borrow();
    let reset = parent
        .writes
        .iter()
        .find_map(|frame| match frame {
            Frame::Stream(sf) => match &sf.payload {
                StreamFramePayload::Reset(reset) => {
                    Some((sf.stream().unwrap().id(), reset.error_code))
                }
                _ => None,
            },
            _ => None,
        })
        .expect("RST_STREAM written");
    assert_eq!(reset, (Some(7), ErrorCode::Cancel));
    assert!(parent.flushes >= 1, "reset must be flushed");
    drop(parent);

    assert_eq!(fx.codec.channel_count(), 0);
    assert!(fx.events(0).borrow().closed);
}

#[test]
fn double_close_is_a_no_op() {
    let mut fx = fixture(false);
    let stream = fx.activate(7);

    fx.codec.channel_close(&stream);
    fx.codec.channel_close(&stream);

    let parent = fx.parent.borrow();
    let resets = parent
        .writes
        .iter()
        .filter(|frame| matches!(
            frame,
            Frame::Stream(sf) if matches!(sf.payload, StreamFramePayload::Reset(_))
        ))
        .count();
    assert_eq!(resets, 1);
}

// ── Scenario E: graceful close from the peer ────────────────────────

#[test]
fn protocol_close_drains_then_closes_without_reset() {
    let mut fx = fixture(true);
    let stream = fx.activate(9);

    fx.codec.deliver_stream_event(&stream, StreamState::Closed);

    // Auto-read drained the end-of-stream sentinel immediately.
    assert_eq!(fx.codec.channel_count(), 0);
    assert!(fx.events(0).borrow().closed);
    let parent = fx.parent.borrow();
    assert!(
        !parent.writes.iter().any(|frame| matches!(
            frame,
            Frame::Stream(sf) if matches!(sf.payload, StreamFramePayload::Reset(_))
        )),
        "graceful close must not emit RST_STREAM"
    );
}

#[test]
fn protocol_close_waits_for_the_application_to_drain() {
    let mut fx = fixture_with(true, |bootstrap| {
        bootstrap.option("auto_read", OptionValue::Bool(false))
    });
    let stream = fx.activate(9);

    fx.codec.deliver_stream_event(&stream, StreamState::Closed);
    // Nothing drained yet: the channel stays registered.
    assert_eq!(fx.codec.channel_count(), 1);

    fx.codec.channel_read(&stream);
    assert_eq!(fx.codec.channel_count(), 0);
    assert!(fx.events(0).borrow().closed);
}

// ── Scenario F: per-stream exception ────────────────────────────────

#[test]
fn stream_exception_fires_on_that_child_and_closes_it() {
    let mut fx = fixture(false);
    let eleven = fx.activate(11);
    let thirteen = fx.activate(13);

    fx.codec.deliver_exception(ProtocolException::stream_scoped(
        eleven.clone(),
        ErrorCode::ProtocolError,
        "bad continuation",
    ));

    let events = fx.events(0);
    let events = events.borrow();
    assert_eq!(events.exceptions.len(), 1);
    assert_eq!(events.exceptions[0].code, ErrorCode::ProtocolError);
    assert!(events.closed);
    drop(events);

    assert!(!fx.codec.contains_stream(&eleven));
    assert!(fx.codec.contains_stream(&thirteen));
    let sibling = fx.events(1);
    let sibling = sibling.borrow();
    assert!(sibling.exceptions.is_empty());
    assert!(!sibling.closed);
}

#[test]
fn connection_exception_propagates_up_the_parent() {
    let mut fx = fixture(false);
    fx.activate(1);

    fx.codec.deliver_exception(ProtocolException::connection(
        ErrorCode::InternalError,
        "framer hiccup",
    ));

    assert_eq!(fx.parent.borrow().exceptions.len(), 1);
    assert!(fx.events(0).borrow().exceptions.is_empty());
}

// ── Boundary behaviors ──────────────────────────────────────────────

#[test]
fn first_write_must_be_headers_and_releases_the_frame() {
    let mut fx = fixture(false);
    let stream = fx.codec.create_outbound_channel().unwrap();

    let err = fx
        .codec
        .channel_write(
            &stream,
            Frame::Stream(StreamFrame::data(Bytes::from_static(b"nope"), false)),
        )
        .unwrap_err();
    assert_eq!(err, Error::FirstFrameNotHeaders("DATA"));
    assert!(fx.parent.borrow().writes.is_empty());
}

#[test]
fn pre_bound_frame_is_rejected() {
    let mut fx = fixture(false);
    let stream = fx.activate(1);

    let mut frame = StreamFrame::headers(request_headers(), false);
    frame.set_stream(stream.clone());
    let err = fx
        .codec
        .channel_write(&stream, Frame::Stream(frame))
        .unwrap_err();
    assert_eq!(err, Error::StreamAlreadySet);
    assert!(fx.parent.borrow().writes.is_empty());
}

#[test]
fn non_frame_messages_are_rejected_with_a_typed_error() {
    let mut fx = fixture(false);
    let stream = fx.activate(1);

    let err = fx
        .codec
        .channel_write(&stream, Frame::Settings(Settings::default()))
        .unwrap_err();
    assert_eq!(err, Error::UnsupportedMessage);
}

#[test]
fn repeated_active_event_neither_duplicates_nor_recredits() {
    let mut fx = fixture(false);
    let stream = fx.activate(5);
    fx.codec.deliver_stream_event(&stream, StreamState::Active);

    assert_eq!(fx.codec.channel_count(), 1);
    assert_eq!(fx.handlers.borrow().len(), 1);
    // One credit, one notification: window is exactly the default.
    let events = fx.events(0);
    assert_eq!(events.borrow().writability, vec![(true, 65_535)]);
}

#[test]
fn settings_change_applies_to_future_activations_only() {
    let mut fx = fixture(false);
    let before = fx.activate(1);

    fx.codec
        .deliver_frame(Frame::Settings(Settings::with_initial_window_size(1_000)));
    let after = fx.activate(3);

    assert_eq!(fx.events(0).borrow().writability, vec![(true, 65_535)]);
    assert_eq!(fx.events(1).borrow().writability, vec![(true, 1_000)]);
    assert!(fx.codec.is_writable(&before));
    assert!(fx.codec.is_writable(&after));
}

#[test]
fn window_update_replenishes_and_reannounces_writability() {
    let mut fx = fixture(false);
    let stream = fx.activate(1);

    // Exhaust the window.
    let payload = Bytes::from(vec![0u8; 65_535]);
    fx.codec
        .channel_write(&stream, Frame::Stream(StreamFrame::data(payload, false)))
        .unwrap();
    assert!(!fx.codec.is_writable(&stream));

    fx.codec
        .deliver_frame(inbound(&stream, StreamFrame::window_update(1_000)));
    assert!(fx.codec.is_writable(&stream));

    let events = fx.events(0);
    let events = events.borrow();
    // activation(+), exhaustion(-), replenishment(+)
    assert_eq!(
        events.writability,
        vec![(true, 65_535), (false, 0), (true, 1_000)]
    );
    // The WINDOW_UPDATE was also observed as a frame.
    assert_eq!(events.frames.last().unwrap().name(), "WINDOW_UPDATE");
}

#[test]
fn unhandled_frames_are_forwarded_upstream() {
    let mut fx = fixture(false);
    fx.codec.deliver_frame(Frame::Ping(muxline_h2::frame::PingFrame {
        ack: false,
        opaque_data: [0; 8],
    }));
    fx.codec.deliver_frame(Frame::Unknown {
        frame_type: 0xfa,
        flags: 0,
        payload: Bytes::from_static(b"altsvc"),
    });

    let parent = fx.parent.borrow();
    assert_eq!(parent.forwarded.len(), 2);
    assert_eq!(parent.forwarded[0].name(), "PING");
    assert_eq!(parent.forwarded[1].name(), "UNKNOWN");
}

#[test]
fn read_budget_defers_excess_frames_to_the_next_batch() {
    let mut fx = fixture_with(true, |bootstrap| {
        bootstrap.option("max_messages_per_read", OptionValue::Number(2))
    });
    let stream = fx.activate(1);

    for _ in 0..3 {
        fx.codec.deliver_frame(inbound(
            &stream,
            StreamFrame::data(Bytes::from_static(b"x"), false),
        ));
    }
    // Budget of two: the third frame waits for the batch boundary.
    assert_eq!(fx.events(0).borrow().frames.len(), 2);

    fx.codec.read_batch_complete();
    let events = fx.events(0);
    let events = events.borrow();
    assert_eq!(events.frames.len(), 3);
    assert_eq!(events.read_completes, 1);
}

#[test]
fn read_complete_fires_once_per_batch_per_channel() {
    let mut fx = fixture(true);
    let one = fx.activate(1);
    let three = fx.activate(3);

    for stream in [&one, &three, &one] {
        fx.codec.deliver_frame(inbound(
            stream,
            StreamFrame::data(Bytes::from_static(b"x"), false),
        ));
    }
    fx.codec.read_batch_complete();

    assert_eq!(fx.events(0).borrow().read_completes, 1);
    assert_eq!(fx.events(1).borrow().read_completes, 1);

    // A quiet channel gets no read-complete on the next batch.
    fx.codec.deliver_frame(inbound(
        &three,
        StreamFrame::data(Bytes::from_static(b"y"), false),
    ));
    fx.codec.read_batch_complete();
    assert_eq!(fx.events(0).borrow().read_completes, 1);
    assert_eq!(fx.events(1).borrow().read_completes, 2);
}

#[test]
fn synthesized_activation_for_an_unannounced_stream() {
    let mut fx = fixture(true);
    let stream = FrameStream::with_id(1);

    // Frame arrives with no prior ACTIVE event: the codec activates the
    // stream itself.
    fx.codec
        .deliver_frame(inbound(&stream, StreamFrame::headers(request_headers(), true)));

    assert_eq!(fx.codec.channel_count(), 1);
    let events = fx.events(0);
    let events = events.borrow();
    assert_eq!(events.frames.len(), 1);
    assert_eq!(events.writability.len(), 1);
}

#[test]
fn writes_from_the_handler_are_serialized_onto_the_parent() {
    // An echoing handler: respond to HEADERS with HEADERS from within
    // the callback.
    struct Echo;
    impl StreamHandler for Echo {
        fn on_frame(&mut self, ctx: &mut StreamCtx<'_>, frame: StreamFrame) {
            if frame.name() == "HEADERS" {
                ctx.write(Frame::Stream(StreamFrame::headers(
                    vec![HeaderField::new(b":status".as_slice(), b"200".as_slice())],
                    true,
                )))
                .unwrap();
                ctx.flush();
            }
        }
    }

    let parent = Rc::new(RefCell::new(ParentLog::default()));
    let bootstrap = StreamChannelBootstrap::new(|| Box::new(Echo));
    let mut codec = MultiplexCodec::new(true, bootstrap).unwrap();
    codec
        .attach(FramerParent {
            log: Rc::clone(&parent),
            next_stream_id: 2,
        })
        .unwrap();

    let stream = FrameStream::with_id(1);
    codec.deliver_stream_event(&stream, StreamState::Active);
    codec.deliver_frame(inbound(&stream, StreamFrame::headers(request_headers(), true)));

    let parent = parent.borrow();
    assert_eq!(parent.writes.len(), 1);
    match &parent.writes[0] {
        Frame::Stream(frame) => {
            assert_eq!(frame.name(), "HEADERS");
            assert_eq!(frame.stream().unwrap().id(), Some(1));
        }
        other => panic!("expected HEADERS, got {}", other.name()),
    }
    assert_eq!(parent.flushes, 1);
}
