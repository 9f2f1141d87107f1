use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use nix::errno::Errno;
use nix::sys::eventfd::EventFd;
use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::buffer::FrameBuffer;

/// Level-triggered wake primitive backed by an eventfd counter.
///
/// `raise` increments the counter; the fd polls readable while the counter is
/// nonzero; `drain` reads the counter back to zero. This is the wake
/// mechanism for the shutdown path, per-client stop signalling and frame
/// delivery.
#[derive(Debug)]
pub struct WakeEvent {
    event: EventFd,
}

impl WakeEvent {
    pub fn new() -> io::Result<Self> {
        let event = EventFd::new().map_err(io::Error::from)?;
        Ok(Self { event })
    }

    /// Increment the counter, waking any poller. Never blocks.
    pub fn raise(&self) {
        if let Err(e) = self.event.arm() {
            warn!("failed to raise wake event: {}", e);
        }
    }

    /// Reset the counter. Only call after poll reported the fd readable,
    /// otherwise this blocks until the next `raise`.
    pub fn drain(&self) -> u64 {
        loop {
            match self.event.read() {
                Ok(count) => return count,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("failed to drain wake event: {}", e);
                    return 0;
                }
            }
        }
    }

    /// Block until the event is raised, then reset it.
    pub fn wait(&self) {
        self.drain();
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

/// Single-cell frame mailbox: one producer overwrites, one consumer drains.
///
/// There is no queue. A post that arrives before the previous frame was read
/// overwrites it and signals again, so the consumer always observes the
/// newest frame and the producer never blocks on a slow consumer.
#[derive(Debug)]
pub struct FrameMailbox {
    cell: Mutex<FrameBuffer>,
    signal: WakeEvent,
}

impl FrameMailbox {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            cell: Mutex::new(FrameBuffer::new()),
            signal: WakeEvent::new()?,
        })
    }

    /// Deposit a frame, overwriting any pending one, and signal exactly once.
    pub fn post(&self, src: &[u8]) {
        let mut cell = self.cell.lock();
        cell.assign(src);
        self.signal.raise();
    }

    /// Move the pending frame into `dst` (growing it, never shrinking).
    /// Returns false when no frame is pending.
    pub fn drain_into(&self, dst: &mut FrameBuffer) -> bool {
        let mut cell = self.cell.lock();
        if cell.is_empty() {
            return false;
        }
        dst.assign(cell.as_slice());
        cell.clear();
        true
    }

    /// Reset the wake counter after poll reported it readable.
    pub fn consume_signal(&self) -> u64 {
        self.signal.drain()
    }

    /// Direct access to the cell, used to reuse it as the request
    /// accumulation buffer before a client enters streaming.
    pub fn lock_cell(&self) -> MutexGuard<'_, FrameBuffer> {
        self.cell.lock()
    }

    pub fn signal_fd(&self) -> BorrowedFd<'_> {
        self.signal.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    fn readable(event: &WakeEvent) -> bool {
        let mut fds = [PollFd::new(event.as_fd(), PollFlags::POLLIN)];
        poll(&mut fds, PollTimeout::ZERO).expect("poll");
        fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false)
    }

    #[test]
    fn wake_event_levels_until_drained() {
        let event = WakeEvent::new().unwrap();
        assert!(!readable(&event));

        event.raise();
        event.raise();
        assert!(readable(&event));

        assert_eq!(event.drain(), 2);
        assert!(!readable(&event));
    }

    #[test]
    fn empty_mailbox_yields_nothing() {
        let mailbox = FrameMailbox::new().unwrap();
        let mut dst = FrameBuffer::new();
        assert!(!mailbox.drain_into(&mut dst));
    }

    #[test]
    fn post_then_drain_round_trips() {
        let mailbox = FrameMailbox::new().unwrap();
        let mut dst = FrameBuffer::new();

        mailbox.post(b"\xFF\xD8\xFF\xD9");
        assert_eq!(mailbox.consume_signal(), 1);
        assert!(mailbox.drain_into(&mut dst));
        assert_eq!(dst.as_slice(), b"\xFF\xD8\xFF\xD9");

        // drained cell is empty until the next post
        assert!(!mailbox.drain_into(&mut dst));
    }

    #[test]
    fn newest_post_wins() {
        let mailbox = FrameMailbox::new().unwrap();
        let mut dst = FrameBuffer::new();

        for n in 0..100u8 {
            mailbox.post(&[0xFF, 0xD8, n, 0xFF, 0xD9]);
        }
        assert_eq!(mailbox.consume_signal(), 100);
        assert!(mailbox.drain_into(&mut dst));
        assert_eq!(dst.as_slice(), &[0xFF, 0xD8, 99, 0xFF, 0xD9]);
    }

    #[test]
    fn drain_target_capacity_is_monotone() {
        let mailbox = FrameMailbox::new().unwrap();
        let mut dst = FrameBuffer::new();

        mailbox.post(&[0u8; 8192]);
        mailbox.drain_into(&mut dst);
        let cap = dst.capacity();

        mailbox.post(&[0u8; 16]);
        mailbox.drain_into(&mut dst);
        assert_eq!(dst.len(), 16);
        assert_eq!(dst.capacity(), cap);
    }
}
