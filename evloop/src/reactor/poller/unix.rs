use libc::{
    AF_INET, AF_INET6, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, SO_ERROR,
    SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, accept, bind, c_int, connect, fcntl, getsockname,
    getsockopt, listen, pipe, read, setsockopt, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socket, socklen_t, write,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::{io, mem};

/// Backlog passed to `listen(2)`.
const LISTEN_BACKLOG: c_int = 128;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written, or a negative value on error.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

/// Writes the buffer to a descriptor without raising `SIGPIPE`.
///
/// Sockets use `send(2)` with `MSG_NOSIGNAL` where available; anything
/// else (pipes, ttys) falls back to `write(2)`.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> isize {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        let n = unsafe {
            libc::send(
                fd,
                buffer.as_ptr() as *const _,
                buffer.len(),
                libc::MSG_NOSIGNAL,
            )
        };

        if n >= 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ENOTSOCK) {
            return n;
        }
    }

    sys_write(fd, buffer)
}

/// Whether `fd` refers to an open descriptor.
pub(crate) fn sys_fd_is_valid(fd: RawFd) -> bool {
    fd >= 0 && unsafe { fcntl(fd, F_GETFD) } >= 0
}

/// Sets `O_NONBLOCK` and returns the flags that were in place before.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<c_int> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if flags & O_NONBLOCK != 0 {
        return Ok(flags);
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(flags)
}

pub(crate) fn sys_restore_flags(fd: RawFd, flags: c_int) -> io::Result<()> {
    let rc = unsafe { fcntl(fd, F_SETFL, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking, close-on-exec pipe.
///
/// Returns `(reader, writer)`.
pub(crate) fn sys_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    let rc = unsafe { pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let reader = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let writer = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    for fd in [&reader, &writer] {
        sys_set_nonblocking(fd.as_raw_fd())?;
        sys_set_cloexec(fd.as_raw_fd())?;
    }

    Ok((reader, writer))
}

/// Creates a non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<OwnedFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    sys_set_nonblocking(fd.as_raw_fd())?;
    sys_set_cloexec(fd.as_raw_fd())?;

    Ok(fd)
}

/// Returns the socket domain matching `addr`.
pub(crate) fn domain_of(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { bind(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { listen(fd, LISTEN_BACKLOG) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is automatically set to non-blocking mode.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(OwnedFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let client = unsafe { OwnedFd::from_raw_fd(client_fd) };

    sys_set_nonblocking(client.as_raw_fd())?;
    sys_set_cloexec(client.as_raw_fd())?;

    let addr = sockaddr_storage_to_socketaddr(&storage)?;

    Ok((client, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Initiates a non-blocking connection.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Whether a `connect(2)` error means the connection is still in progress.
pub(crate) fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Reads and clears the pending error of a socket (`SO_ERROR`).
///
/// Used to learn the outcome of a non-blocking connect once the socket
/// reports writable.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else if value != 0 {
        Err(io::Error::from_raw_os_error(value))
    } else {
        Ok(())
    }
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_conversion_preserves_v4_and_v6() {
        for addr in ["127.0.0.1:8080", "[::1]:9090"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let (storage, _) = socketaddr_to_storage(&addr);
            assert_eq!(sockaddr_storage_to_socketaddr(&storage).unwrap(), addr);
        }
    }

    #[test]
    fn pipe_is_nonblocking() {
        let (reader, _writer) = sys_pipe().unwrap();
        let mut buf = [0u8; 4];

        assert!(sys_read(reader.as_raw_fd(), &mut buf) < 0);
        assert_eq!(
            io::Error::last_os_error().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn closed_descriptors_are_invalid() {
        let (reader, writer) = sys_pipe().unwrap();
        let raw = writer.as_raw_fd();

        assert!(sys_fd_is_valid(raw));
        drop(writer);
        assert!(!sys_fd_is_valid(raw));
        assert!(!sys_fd_is_valid(-1));
        drop(reader);
    }
}
