//! Call-stack capture at failure time.
//!
//! A [`FrameSource`] yields the raw frames of a failure (outermost first);
//! [`snapshot_frames`] turns them into immutable, serializable
//! [`FrameSnapshot`]s with source context and size-bounded local values.

mod render;
mod snapshot;
mod source;

pub use render::{panic_message, render_value, truncate, MAX_VALUE_LEN};
pub use snapshot::{snapshot_frames, FrameSnapshot};
pub use source::{CapturedBacktrace, FrameSource, Local, ManualFrames, RawFrame};
