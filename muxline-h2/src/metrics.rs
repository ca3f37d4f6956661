//! Multiplexer metrics.
//!
//! Connection-wide counters for stream and frame activity, exposed
//! through the metriken registry.

use metriken::{metric, Counter, Gauge};

// ── Stream lifecycle ─────────────────────────────────────────────

#[metric(
    name = "muxline/streams/activated",
    description = "Total stream channels activated"
)]
pub static STREAMS_ACTIVATED: Counter = Counter::new();

#[metric(
    name = "muxline/streams/closed",
    description = "Total stream channels closed"
)]
pub static STREAMS_CLOSED: Counter = Counter::new();

#[metric(
    name = "muxline/streams/active",
    description = "Currently registered stream channels"
)]
pub static STREAMS_ACTIVE: Gauge = Gauge::new();

// ── Frames ───────────────────────────────────────────────────────

#[metric(
    name = "muxline/frames/inbound",
    description = "Stream frames dispatched to child channels"
)]
pub static FRAMES_INBOUND: Counter = Counter::new();

#[metric(
    name = "muxline/frames/outbound",
    description = "Frames written to the parent channel"
)]
pub static FRAMES_OUTBOUND: Counter = Counter::new();

// ── Connection events ────────────────────────────────────────────

#[metric(
    name = "muxline/goaway/notified",
    description = "Child channels notified by a GOAWAY fan-out"
)]
pub static GOAWAY_NOTIFIED: Counter = Counter::new();
