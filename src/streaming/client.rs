//! Per-client connection state and the worker thread that drives it.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::Arc;
use std::{env, fs};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::http::{self, HttpVersion};
use super::net;
use super::BOUNDARY;
use crate::buffer::FrameBuffer;
use crate::mailbox::{FrameMailbox, WakeEvent};

/// Receive chunk size for the request read path.
const RECV_CHUNK: usize = 512;

/// Connection lifecycle. Slots are created in `ReadingRequest` on accept and
/// parked back in `Idle` by the reactor's reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientState {
    Idle,
    ReadingRequest,
    ReadingHeaders,
    Streaming,
    ServingFavicon,
}

/// Mutable request/response state, guarded by the slot's control mutex.
#[derive(Debug)]
pub(crate) struct ClientCtl {
    pub state: ClientState,
    pub version: HttpVersion,
    pub response_code: u16,
    pub request_path: String,
}

/// One connected client.
///
/// Shared between the reactor (admission, reaping), the worker thread
/// (socket I/O) and the capture thread (frame fan-out via the mailbox).
/// The mailbox cell doubles as the request accumulation buffer until the
/// client enters streaming, at which point it is cleared and becomes the
/// pending-frame cell.
pub(crate) struct ClientSlot {
    pub id: u64,
    socket: TcpStream,
    pub stop: WakeEvent,
    pub mailbox: FrameMailbox,
    pub ctl: Mutex<ClientCtl>,
}

impl ClientSlot {
    pub fn new(id: u64, socket: TcpStream) -> io::Result<Self> {
        Ok(Self {
            id,
            socket,
            stop: WakeEvent::new()?,
            mailbox: FrameMailbox::new()?,
            ctl: Mutex::new(ClientCtl {
                state: ClientState::ReadingRequest,
                version: HttpVersion::V1_0,
                response_code: 200,
                request_path: String::new(),
            }),
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.ctl.lock().state == ClientState::Streaming
    }

    /// Closing convention: whichever side gives up on the connection shuts
    /// the socket down; the descriptor itself closes once the slot drops.
    pub fn shutdown_socket(&self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

enum Flow {
    Continue,
    Closed,
}

/// Worker thread body: multiplex over stop event, data event and socket.
pub(crate) fn client_worker(slot: Arc<ClientSlot>) {
    debug!(id = slot.id, "client worker started");
    let mut scratch = FrameBuffer::new();
    let mut chunk = [0u8; RECV_CHUNK];

    loop {
        let mut fds = [
            PollFd::new(slot.stop.as_fd(), PollFlags::POLLIN),
            PollFd::new(slot.mailbox.signal_fd(), PollFlags::POLLIN),
            PollFd::new(slot.socket.as_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(id = slot.id, "client poll failed: {}", e);
                break;
            }
        }
        let stop_ready = ready(&fds[0]);
        let data_ready = ready(&fds[1]);
        let socket_ready = ready(&fds[2]);

        if stop_ready {
            // Reactor wants this slot back; it drains and reaps.
            break;
        }

        if socket_ready {
            match handle_socket_readable(&slot, &mut chunk) {
                Flow::Continue => {}
                Flow::Closed => {
                    slot.shutdown_socket();
                    slot.stop.raise();
                    break;
                }
            }
        }

        if data_ready {
            slot.mailbox.consume_signal();
            if slot.is_streaming() && slot.mailbox.drain_into(&mut scratch) {
                if let Err(e) = send_part(&slot.socket, scratch.as_slice()) {
                    debug!(id = slot.id, "frame send failed: {}", e);
                    slot.shutdown_socket();
                    slot.stop.raise();
                    break;
                }
            }
        }
    }
    debug!(id = slot.id, "client worker exit");
}

fn ready(fd: &PollFd) -> bool {
    fd.revents().map(|r| !r.is_empty()).unwrap_or(false)
}

fn handle_socket_readable(slot: &ClientSlot, chunk: &mut [u8]) -> Flow {
    let received = match net::recv_some(&slot.socket, chunk) {
        Ok(0) => {
            debug!(id = slot.id, "client hung up");
            return Flow::Closed;
        }
        Ok(n) => n,
        Err(e) => {
            debug!(id = slot.id, "client recv failed: {}", e);
            return Flow::Closed;
        }
    };

    let state = slot.ctl.lock().state;
    match state {
        ClientState::ReadingRequest | ClientState::ReadingHeaders => {
            feed_parser(slot, &chunk[..received])
        }
        // A streaming browser normally never talks back; whatever this is,
        // it is not part of the protocol.
        _ => {
            debug!(id = slot.id, bytes = received, "ignoring client data");
            Flow::Continue
        }
    }
}

/// Advance the request state machine with freshly received bytes.
fn feed_parser(slot: &ClientSlot, data: &[u8]) -> Flow {
    let mut ctl = slot.ctl.lock();
    let mut cell = slot.mailbox.lock_cell();
    cell.extend_from_slice(data);

    if ctl.state == ClientState::ReadingRequest {
        match http::parse_request_line(cell.as_slice()) {
            Some(line) => {
                ctl.response_code = if is_known_path(&line.path) { 200 } else { 404 };
                ctl.version = line.version;
                info!(
                    id = slot.id,
                    method = %line.method,
                    path = %line.path,
                    code = ctl.response_code,
                    "request"
                );
                ctl.request_path = line.path;
                ctl.state = ClientState::ReadingHeaders;
            }
            // First line absent or unparseable so far: keep accumulating.
            None => return Flow::Continue,
        }
    }

    if ctl.state == ClientState::ReadingHeaders && http::headers_complete(cell.as_slice()) {
        // From here on the cell is the pending-frame mailbox.
        cell.clear();
        let version = ctl.version;
        let not_found = ctl.response_code != 200;
        let favicon = ctl.request_path == "/favicon.ico";

        if not_found {
            drop(cell);
            drop(ctl);
            let _ = net::send_all(&slot.socket, not_found_response(version).as_bytes());
            return Flow::Closed;
        }
        if favicon {
            ctl.state = ClientState::ServingFavicon;
            drop(cell);
            drop(ctl);
            serve_favicon(slot, version);
            return Flow::Closed;
        }

        drop(cell);
        drop(ctl);
        if net::send_all(&slot.socket, streaming_response(version).as_bytes()).is_err() {
            return Flow::Closed;
        }
        slot.ctl.lock().state = ClientState::Streaming;
        info!(id = slot.id, "client streaming");
    }
    Flow::Continue
}

fn is_known_path(path: &str) -> bool {
    matches!(path, "/" | "/video.mjpeg" | "/favicon.ico")
}

fn serve_favicon(slot: &ClientSlot, version: HttpVersion) {
    match load_favicon() {
        Some(icon) => {
            let header = favicon_response(version, icon.len());
            if net::send_all(&slot.socket, header.as_bytes()).is_ok() {
                let _ = net::send_all(&slot.socket, &icon);
            }
        }
        None => {
            let _ = net::send_all(&slot.socket, not_found_response(version).as_bytes());
        }
    }
}

/// The icon lives next to the executable, when it exists at all.
fn load_favicon() -> Option<Vec<u8>> {
    let exe = env::current_exe().ok()?;
    load_favicon_from(exe.parent()?)
}

fn load_favicon_from(dir: &Path) -> Option<Vec<u8>> {
    fs::read(dir.join("favicon.ico")).ok()
}

/// One multipart body part: headers, JPEG payload, boundary for the next.
fn send_part(socket: &TcpStream, frame: &[u8]) -> io::Result<()> {
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    net::send_all(socket, header.as_bytes())?;
    net::send_all(socket, frame)?;
    net::send_all(socket, format!("\r\n--{}\r\n", BOUNDARY).as_bytes())
}

fn streaming_response(version: HttpVersion) -> String {
    format!(
        "HTTP/{} 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\n\r\n--{}\r\n",
        version.as_str(),
        BOUNDARY,
        BOUNDARY
    )
}

fn not_found_response(version: HttpVersion) -> String {
    format!(
        "HTTP/{} 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n",
        version.as_str()
    )
}

fn favicon_response(version: HttpVersion, length: usize) -> String {
    format!(
        "HTTP/{} 200 OK\r\nContent-Type: image/x-icon\r\nContent-Length: {}\r\n\r\n",
        version.as_str(),
        length
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_table() {
        assert!(is_known_path("/"));
        assert!(is_known_path("/video.mjpeg"));
        assert!(is_known_path("/favicon.ico"));
        assert!(!is_known_path("/video"));
        assert!(!is_known_path("/no"));
    }

    #[test]
    fn streaming_response_is_bit_exact() {
        assert_eq!(
            streaming_response(HttpVersion::V1_1),
            "HTTP/1.1 200 OK\r\n\
             Content-Type: multipart/x-mixed-replace; boundary=mjpeg-over-http-boundary\r\n\
             \r\n\
             --mjpeg-over-http-boundary\r\n"
        );
        assert!(streaming_response(HttpVersion::V1_0).starts_with("HTTP/1.0 200 OK\r\n"));
    }

    #[test]
    fn not_found_response_is_bit_exact() {
        assert_eq!(
            not_found_response(HttpVersion::V1_1),
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn favicon_lookup_reads_the_file_or_misses() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_favicon_from(dir.path()).is_none());

        fs::write(dir.path().join("favicon.ico"), b"\x00\x00\x01\x00icon").unwrap();
        assert_eq!(
            load_favicon_from(dir.path()).unwrap(),
            b"\x00\x00\x01\x00icon"
        );
    }
}
