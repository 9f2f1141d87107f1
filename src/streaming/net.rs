//! Raw socket plumbing the standard library has no lever for: a listener
//! with SO_REUSEADDR applied before bind and the original's backlog of 1,
//! plus send/recv wrappers that keep SIGPIPE away from the process.

use std::io;
use std::mem;
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

pub(crate) fn bind_listener(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&one as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        },
        sin_zero: [0; 8],
    };
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&sin as *const libc::sockaddr_in).cast(),
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // A backlog of one is all an MJPEG endpoint needs; browsers retry.
    if unsafe { libc::listen(fd.as_raw_fd(), 1) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(TcpListener::from(fd))
}

/// Write the whole buffer, looping over short sends. MSG_NOSIGNAL turns a
/// dead peer into an EPIPE error instead of a process-killing SIGPIPE.
pub(crate) fn send_all(socket: &TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let written = unsafe {
            libc::send(
                socket.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if written < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        buf = &buf[written as usize..];
    }
    Ok(())
}

/// Read once into `buf`. Returns `Ok(0)` on orderly peer shutdown.
pub(crate) fn recv_some(socket: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let received =
            unsafe { libc::recv(socket.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0) };
        if received < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        return Ok(received as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::Ipv4Addr;

    #[test]
    fn listener_binds_an_ephemeral_port() {
        let listener =
            bind_listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).expect("bind_listener");
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() != 0);
    }

    #[test]
    fn send_all_round_trips_through_a_socket() {
        let listener = bind_listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        send_all(&server_side, b"hello over the wire").unwrap();
        drop(server_side);

        let mut received = Vec::new();
        let mut reader = client;
        reader.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello over the wire");
    }

    #[test]
    fn recv_some_sees_peer_shutdown_as_zero() {
        let listener = bind_listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        drop(client);

        let mut buf = [0u8; 64];
        assert_eq!(recv_some(&server_side, &mut buf).unwrap(), 0);
    }
}
