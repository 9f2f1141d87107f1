//! The fan-out server: accept loop, client supervision, frame distribution.

use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::client::{client_worker, ClientSlot, ClientState};
use super::net;
use super::MAX_CLIENTS;
use crate::buffer::FrameBuffer;
use crate::capture::FrameSink;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::mailbox::WakeEvent;

/// A live slot plus the worker thread serving it. Records stay ordered by
/// admission: index 0 is always the oldest connection.
struct ClientRecord {
    slot: Arc<ClientSlot>,
    worker: Option<JoinHandle<()>>,
}

/// State shared between the reactor thread, the client workers and whoever
/// posts frames (normally the capture thread).
struct ServerShared {
    shutdown: WakeEvent,
    latest: Mutex<FrameBuffer>,
    slots: Mutex<Vec<ClientRecord>>,
    next_client_id: AtomicU64,
}

impl ServerShared {
    /// Copy a frame into the latest-frame cell and push it to every
    /// streaming client. Runs on the caller's thread; the slot list lock is
    /// held only while copying and signalling, never across a socket send.
    fn fan_out(&self, frame: &[u8]) {
        if frame.is_empty() {
            return;
        }
        let mut latest = self.latest.lock();
        latest.assign(frame);

        let slots = self.slots.lock();
        for record in slots.iter() {
            if record.slot.is_streaming() {
                record.slot.mailbox.post(latest.as_slice());
            }
        }
    }
}

impl FrameSink for ServerShared {
    fn post(&self, frame: &[u8]) {
        self.fan_out(frame);
    }
}

/// MJPEG streaming server.
///
/// `start` binds the listener and spawns the reactor; `post` (or the
/// [`FrameSink`] handle from [`StreamServer::sink`]) feeds frames to all
/// connected viewers; `stop` shuts the whole thing down and joins every
/// thread the server owns.
pub struct StreamServer {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    reactor: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl StreamServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let shutdown = WakeEvent::new().map_err(|source| ServerError::EventSetup { source })?;
        Ok(Self {
            config,
            shared: Arc::new(ServerShared {
                shutdown,
                latest: Mutex::new(FrameBuffer::new()),
                slots: Mutex::new(Vec::with_capacity(MAX_CLIENTS)),
                next_client_id: AtomicU64::new(0),
            }),
            reactor: None,
            local_addr: None,
        })
    }

    /// Bind the listening socket and start the reactor thread.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.reactor.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddrV4::new(self.config.bind, self.config.port);
        let listener = net::bind_listener(addr).map_err(|source| ServerError::BindFailed {
            address: addr.to_string(),
            source,
        })?;
        self.local_addr = listener.local_addr().ok();

        let shared = Arc::clone(&self.shared);
        let reactor = thread::Builder::new()
            .name("mjpeg-reactor".into())
            .spawn(move || reactor_loop(shared, listener))
            .map_err(|source| ServerError::ThreadSpawn { source })?;
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Stop the reactor and every client worker. Idempotent; when this
    /// returns, no thread owned by the server is still running.
    pub fn stop(&mut self) {
        if let Some(reactor) = self.reactor.take() {
            self.shared.shutdown.raise();
            let _ = reactor.join();
        }
    }

    /// Publish a frame to all streaming clients (newest wins per client).
    pub fn post(&self, frame: &[u8]) {
        self.shared.fan_out(frame);
    }

    /// Frame sink handle for the capture engine.
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::clone(&self.shared) as Arc<dyn FrameSink>
    }

    /// Actual bound address, useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reactor thread body: poll the shutdown event, the listener and every live
/// client's stop event.
fn reactor_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    if let Ok(addr) = listener.local_addr() {
        info!("mjpeg server listening on {}", addr);
    }

    loop {
        let snapshot: Vec<Arc<ClientSlot>> = shared
            .slots
            .lock()
            .iter()
            .map(|record| Arc::clone(&record.slot))
            .collect();

        let mut fds = Vec::with_capacity(2 + snapshot.len());
        fds.push(PollFd::new(shared.shutdown.as_fd(), PollFlags::POLLIN));
        fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        for slot in &snapshot {
            fds.push(PollFd::new(slot.stop.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("reactor poll failed: {}", e);
                break;
            }
        }
        let ready: Vec<bool> = fds
            .iter()
            .map(|fd| fd.revents().map(|r| !r.is_empty()).unwrap_or(false))
            .collect();
        drop(fds);

        if ready[0] {
            shared.shutdown.drain();
            break;
        }

        // Reap finished workers before admitting, so a dead slot never
        // forces a live one out.
        for (i, slot) in snapshot.iter().enumerate() {
            if ready[2 + i] {
                reap_client(&shared, slot.id);
            }
        }

        if ready[1] {
            admit_client(&shared, &listener);
        }
    }

    // Orderly teardown: wake every worker, then join them all.
    let records: Vec<ClientRecord> = {
        let mut slots = shared.slots.lock();
        slots.drain(..).collect()
    };
    for record in &records {
        record.slot.stop.raise();
    }
    for record in records {
        finish_reap(record);
    }
    info!("mjpeg server stopped");
}

/// Accept one connection, evicting the oldest client when the house is full.
fn admit_client(shared: &ServerShared, listener: &TcpListener) {
    let (socket, peer) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) => {
            warn!("accept failed: {}", e);
            return;
        }
    };

    let evicted = {
        let mut slots = shared.slots.lock();
        if slots.len() >= MAX_CLIENTS {
            Some(slots.remove(0))
        } else {
            None
        }
    };
    if let Some(record) = evicted {
        info!(id = record.slot.id, "evicting oldest client");
        finish_reap(record);
    }

    let id = shared.next_client_id.fetch_add(1, Ordering::Relaxed);
    let slot = match ClientSlot::new(id, socket) {
        Ok(slot) => Arc::new(slot),
        Err(e) => {
            warn!("failed to set up client slot: {}", e);
            return;
        }
    };

    let worker = thread::Builder::new()
        .name(format!("mjpeg-client-{}", id))
        .spawn({
            let slot = Arc::clone(&slot);
            move || client_worker(slot)
        });
    match worker {
        Ok(handle) => {
            shared.slots.lock().push(ClientRecord {
                slot,
                worker: Some(handle),
            });
            info!(id, peer = %peer, "client connected");
        }
        Err(e) => {
            warn!(id, "failed to spawn client worker: {}", e);
            slot.shutdown_socket();
        }
    }
}

/// Remove the slot from the table (compacting it) and finish tearing the
/// client down.
fn reap_client(shared: &ServerShared, id: u64) {
    let record = {
        let mut slots = shared.slots.lock();
        match slots.iter().position(|record| record.slot.id == id) {
            Some(i) => slots.remove(i),
            None => return,
        }
    };
    finish_reap(record);
}

fn finish_reap(mut record: ClientRecord) {
    record.slot.stop.raise();
    if let Some(worker) = record.worker.take() {
        let _ = worker.join();
    }
    record.slot.shutdown_socket();
    record.slot.ctl.lock().state = ClientState::Idle;
    debug!(id = record.slot.id, "client slot reaped");
}
