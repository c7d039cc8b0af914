use crate::error::{Error, Result};

use libc::{
    AF_INET, AF_INET6, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, SO_REUSEADDR,
    SOL_SOCKET, c_int, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t,
};
use log::error;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{mem, ptr};

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read, or a negative value on error.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written, or a negative value on error.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { libc::write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

/// Writes a single wake byte, ignoring the outcome. The pipe is
/// non-blocking, so a full pipe drops the byte; an earlier byte is then
/// already in flight and will break the poll.
pub(crate) fn wake(fd: RawFd, byte: u8) {
    let _ = sys_write(fd, &[byte]);
}

/// Creates an anonymous pipe.
pub(crate) fn sys_pipe() -> Result<[RawFd; 2]> {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(Error::last_os("pipe"));
    }
    Ok(fds)
}

/// Sets a file descriptor to non-blocking mode.
pub fn set_nonblock(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os("F_GETFL"));
    }

    let rc = unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(Error::last_os("O_NONBLOCK"));
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub fn set_close_on_exec(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(Error::last_os("F_GETFD"));
    }

    let rc = unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(Error::last_os("FD_CLOEXEC"));
    }

    Ok(())
}

/// Closes a file descriptor, retrying on interruption.
///
/// Close has no useful recovery path, so failures other than `EINTR` are
/// logged and swallowed.
pub fn really_close(fd: RawFd) {
    loop {
        if unsafe { libc::close(fd) } == 0 {
            return;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            error!("really_close({fd}): {err}");
            return;
        }
    }
}

/// Creates a stream socket for the given address family and protocol.
pub(crate) fn sys_socket(domain: c_int, socktype: c_int, protocol: c_int) -> Result<RawFd> {
    let fd = unsafe { libc::socket(domain, socktype, protocol) };
    if fd < 0 {
        return Err(Error::last_os("socket"));
    }
    Ok(fd)
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(Error::last_os("SO_REUSEADDR"))
    } else {
        Ok(())
    }
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: *const sockaddr, len: socklen_t) -> Result<()> {
    let rc = unsafe { libc::bind(fd, addr, len) };
    if rc < 0 {
        Err(Error::last_os("bind"))
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> Result<()> {
    let rc = unsafe { libc::listen(fd, backlog) };
    if rc < 0 {
        Err(Error::last_os("listen"))
    } else {
        Ok(())
    }
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { libc::getsockname(fd, ptr::addr_of_mut!(storage) as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(Error::last_os("getsockname"))
    } else {
        storage_to_socketaddr(&storage)
    }
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn storage_to_socketaddr(storage: &sockaddr_storage) -> Result<SocketAddr> {
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

        _ => Err(Error::Sys(
            "getsockname",
            io::Error::new(io::ErrorKind::InvalidData, "unsupported address family"),
        )),
    }
}
