//! Shared types for the herald workspace: OneBot message segments,
//! notification event kinds, and small formatting helpers.

pub mod event;
pub mod segment;
pub mod time;

pub use {
    event::EventKind,
    segment::Segment,
    time::format_duration,
};
