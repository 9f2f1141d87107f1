//! V4L2 Motion-JPEG capture published over HTTP.
//!
//! Two engines meet at one hand-off: the [`capture::CaptureEngine`] runs the
//! V4L2 dequeue loop on its own thread and posts every frame into a
//! [`capture::FrameSink`]; the [`streaming::StreamServer`] implements that
//! sink and fans each frame out to up to five connected browsers as a
//! `multipart/x-mixed-replace` stream, newest frame winning per client.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod streaming;

// Re-export common types at the crate root
pub use buffer::FrameBuffer;
pub use capture::{CaptureEngine, FrameSink};
pub use config::{AppConfig, CaptureConfig, ServerConfig};
pub use error::{CaptureError, Error, Result, ServerError};
pub use mailbox::{FrameMailbox, WakeEvent};
pub use streaming::StreamServer;
