//! Timeline storage for speech synthesis voices.
//!
//! Voice-building tools append audio frames or parameter vectors to a
//! [`TimelineWriter`]; synthesis opens the finished file once per voice with a
//! [`TimelineReader`] and serves time-window queries from it.

pub mod timeline;

pub use timeline::{
    Cursor, Datagram, RangeRead, Result, TimelineConfig, TimelineError, TimelineReader,
    TimelineWriter,
};
