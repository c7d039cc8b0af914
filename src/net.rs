//! Address resolution and TCP socket helpers.
//!
//! These produce plain descriptors for transport code to drive through the
//! pollset. Resolution failures carry their own error category
//! ([`Error::Dns`]) so callers can tell them from socket errors.

use crate::error::{Error, Result};
use crate::sys;

use libc::{AI_ADDRCONFIG, AI_PASSIVE, SOCK_STREAM, addrinfo, c_int};
use std::ffi::{CStr, CString};
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::{mem, ptr};

/// An owned socket descriptor, closed on drop.
pub struct Sock(RawFd);

impl Sock {
    pub fn as_raw(&self) -> RawFd {
        self.0
    }

    /// Releases ownership without closing the descriptor.
    pub fn into_raw(self) -> RawFd {
        let fd = self.0;
        mem::forget(self);
        fd
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        sys::sys_sockname(self.0)
    }
}

impl Drop for Sock {
    fn drop(&mut self) {
        sys::really_close(self.0);
    }
}

/// Result list of a `getaddrinfo` lookup, freed on drop.
#[derive(Debug)]
pub struct AddrInfo {
    head: *mut addrinfo,
}

impl AddrInfo {
    /// Iterates the resolved addresses in resolver order.
    pub fn iter(&self) -> AddrInfoIter<'_> {
        AddrInfoIter {
            cur: self.head,
            _list: PhantomData,
        }
    }
}

impl Drop for AddrInfo {
    fn drop(&mut self) {
        if !self.head.is_null() {
            unsafe { libc::freeaddrinfo(self.head) };
        }
    }
}

pub struct AddrInfoIter<'a> {
    cur: *const addrinfo,
    _list: PhantomData<&'a AddrInfo>,
}

impl<'a> Iterator for AddrInfoIter<'a> {
    type Item = &'a addrinfo;

    fn next(&mut self) -> Option<&'a addrinfo> {
        if self.cur.is_null() {
            return None;
        }
        let ai = unsafe { &*self.cur };
        self.cur = ai.ai_next;
        Some(ai)
    }
}

/// Renders the lookup target for error messages, bracketing hosts that
/// contain colons.
fn target_name(host: Option<&str>, service: Option<&str>) -> String {
    let mut target = match host {
        Some(h) if h.contains(':') => format!("[{h}]"),
        Some(h) => h.to_string(),
        None => String::from("*"),
    };
    if let Some(service) = service {
        target.push(':');
        target.push_str(service);
    }
    target
}

fn gai_error(target: String, code: c_int) -> Error {
    let message = unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
        .to_string_lossy()
        .into_owned();
    Error::Dns(target, message)
}

fn c_string(target: &str, s: Option<&str>) -> Result<Option<CString>> {
    match s {
        None => Ok(None),
        Some(s) => CString::new(s)
            .map(Some)
            .map_err(|_| Error::Dns(target.to_string(), String::from("embedded NUL"))),
    }
}

/// Resolves `host` and `service` for stream sockets.
///
/// A `None` host resolves to the loopback/wildcard per `getaddrinfo`
/// conventions; `AI_ADDRCONFIG` filters families the host has no address
/// for. `family` is an `AF_*` constant, or `AF_UNSPEC` for either.
pub fn get_addrinfo(host: Option<&str>, service: Option<&str>, family: c_int) -> Result<AddrInfo> {
    get_addrinfo_flags(host, service, family, AI_ADDRCONFIG)
}

fn get_addrinfo_flags(
    host: Option<&str>,
    service: Option<&str>,
    family: c_int,
    flags: c_int,
) -> Result<AddrInfo> {
    let target = target_name(host, service);
    let chost = c_string(&target, host)?;
    let cservice = c_string(&target, service)?;

    let mut hints: addrinfo = unsafe { mem::zeroed() };
    hints.ai_socktype = SOCK_STREAM;
    hints.ai_family = family;
    hints.ai_flags = flags;

    let mut head: *mut addrinfo = ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(
            chost.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            cservice.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            &hints,
            &mut head,
        )
    };
    if rc != 0 {
        return Err(gai_error(target, rc));
    }
    Ok(AddrInfo { head })
}

fn tcp_connect1(ai: &addrinfo) -> Result<Sock> {
    let sock = Sock(sys::sys_socket(ai.ai_family, ai.ai_socktype, ai.ai_protocol)?);
    if unsafe { libc::connect(sock.as_raw(), ai.ai_addr, ai.ai_addrlen) } == -1 {
        return Err(Error::last_os("connect"));
    }
    Ok(sock)
}

/// Connects a stream socket to the first address of `host:service` that
/// accepts.
pub fn tcp_connect(host: &str, service: &str, family: c_int) -> Result<Sock> {
    let ai = get_addrinfo(Some(host), Some(service), family)?;
    let mut last = Error::Sys(
        "connect",
        io::Error::from_raw_os_error(libc::EADDRNOTAVAIL),
    );
    for addr in ai.iter() {
        match tcp_connect1(addr) {
            Ok(sock) => return Ok(sock),
            Err(err) => last = err,
        }
    }
    Err(last)
}

/// Binds and listens on `service`; `None` picks an ephemeral port. The
/// returned socket has `SO_REUSEADDR` set.
pub fn tcp_listen(service: Option<&str>, family: c_int, backlog: c_int) -> Result<Sock> {
    let ai = get_addrinfo_flags(None, service.or(Some("0")), family, AI_ADDRCONFIG | AI_PASSIVE)?;
    let first = ai
        .iter()
        .next()
        .ok_or_else(|| Error::Dns(target_name(None, service), String::from("no addresses")))?;

    let sock = Sock(sys::sys_socket(
        first.ai_family,
        first.ai_socktype,
        first.ai_protocol,
    )?);
    sys::sys_set_reuseaddr(sock.as_raw())?;
    sys::sys_bind(sock.as_raw(), first.ai_addr, first.ai_addrlen)?;
    sys::sys_listen(sock.as_raw(), backlog)?;
    Ok(sock)
}
