//! MJPEG-over-HTTP fan-out server.
//!
//! A poll-driven reactor thread accepts connections and supervises up to
//! [`MAX_CLIENTS`] per-client worker threads. Each worker parses a minimal
//! HTTP request and then pushes multipart JPEG parts as frames arrive in its
//! mailbox; the capture thread feeds every streaming client through
//! [`StreamServer::post`], newest frame winning per client.

mod client;
mod http;
mod net;
mod server;


pub use server::StreamServer;

/// Multipart boundary used by every streaming response.
pub const BOUNDARY: &str = "mjpeg-over-http-boundary";

/// Upper bound on simultaneously connected clients. Admitting one more
/// evicts the oldest connection.
pub const MAX_CLIENTS: usize = 5;
