//! Socket primitives over raw descriptors
//!
//! Every function performs exactly one attempt and reports `WouldBlock`
//! unchanged; retrying is the reactor's job.

use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use socket2::{Domain, Socket, Type};

use crate::address::{TipcAddr, AF_TIPC, SOCKADDR_LEN};

#[repr(C, align(4))]
#[derive(Clone, Copy)]
struct Storage([u8; SOCKADDR_LEN]);

/// A `sockaddr_tipc`-sized buffer handed to the kernel
#[derive(Clone, Copy)]
pub(crate) struct SockaddrBuf {
    storage: Storage,
    len: libc::socklen_t,
}

impl SockaddrBuf {
    fn empty() -> Self {
        Self {
            storage: Storage([0; SOCKADDR_LEN]),
            len: SOCKADDR_LEN as libc::socklen_t,
        }
    }

    fn from_addr(addr: &TipcAddr) -> Self {
        Self {
            storage: Storage(addr.encode()),
            len: SOCKADDR_LEN as libc::socklen_t,
        }
    }

    fn as_ptr(&self) -> *const libc::sockaddr {
        (&self.storage as *const Storage).cast()
    }

    fn as_mut_parts(&mut self) -> (*mut libc::sockaddr, *mut libc::socklen_t) {
        (
            (&mut self.storage as *mut Storage).cast(),
            &mut self.len as *mut libc::socklen_t,
        )
    }

    /// The bytes the kernel filled in, clamped to the buffer size
    pub(crate) fn bytes(&self) -> &[u8] {
        let len = (self.len as usize).min(SOCKADDR_LEN);
        &self.storage.0[..len]
    }
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn tipc_domain() -> Domain {
    Domain::from(libc::c_int::from(AF_TIPC))
}

/// Create a nonblocking close-on-exec TIPC socket of type `ty`
pub(crate) fn socket(ty: libc::c_int) -> io::Result<OwnedFd> {
    let socket = Socket::new(tipc_domain(), Type::from(ty), None)?;
    socket.set_nonblocking(true)?;
    Ok(OwnedFd::from(socket))
}

/// Create two TIPC sockets connected to each other, both nonblocking
pub(crate) fn socket_pair(ty: libc::c_int) -> io::Result<(OwnedFd, OwnedFd)> {
    let (a, b) = Socket::pair(tipc_domain(), Type::from(ty), None)?;
    a.set_nonblocking(true)?;
    b.set_nonblocking(true)?;
    Ok((OwnedFd::from(a), OwnedFd::from(b)))
}

pub(crate) fn bind(fd: RawFd, addr: &TipcAddr) -> io::Result<()> {
    let raw = SockaddrBuf::from_addr(addr);
    cvt(unsafe { libc::bind(fd, raw.as_ptr(), raw.len) })?;
    Ok(())
}

pub(crate) fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, backlog) })?;
    Ok(())
}

/// Start a connect; a nonblocking stream socket reports `EINPROGRESS`
pub(crate) fn connect(fd: RawFd, addr: &TipcAddr) -> io::Result<()> {
    let raw = SockaddrBuf::from_addr(addr);
    cvt(unsafe { libc::connect(fd, raw.as_ptr(), raw.len) })?;
    Ok(())
}

/// Check whether a pending connect has completed.
///
/// A pending socket error fails the connect; a socket that has no peer yet
/// reports `WouldBlock` so the write-readiness wait resumes.
pub(crate) fn finish_connect(fd: RawFd) -> io::Result<()> {
    if let Some(err) = take_error(fd)? {
        return Err(err);
    }
    match peername(fd) {
        Ok(_) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => {
            Err(io::ErrorKind::WouldBlock.into())
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn accept(fd: RawFd) -> io::Result<(OwnedFd, SockaddrBuf)> {
    let mut raw = SockaddrBuf::empty();
    let (addr, len) = raw.as_mut_parts();
    let accepted = cvt(unsafe {
        libc::accept4(fd, addr, len, libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC)
    })?;
    Ok((unsafe { OwnedFd::from_raw_fd(accepted) }, raw))
}

pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL) })
}

pub(crate) fn recv_from(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, SockaddrBuf)> {
    let mut raw = SockaddrBuf::empty();
    let (addr, len) = raw.as_mut_parts();
    let n = cvt_size(unsafe {
        libc::recvfrom(fd, buf.as_mut_ptr().cast(), buf.len(), 0, addr, len)
    })?;
    Ok((n, raw))
}

pub(crate) fn send_to(fd: RawFd, buf: &[u8], addr: &TipcAddr) -> io::Result<usize> {
    let raw = SockaddrBuf::from_addr(addr);
    cvt_size(unsafe {
        libc::sendto(
            fd,
            buf.as_ptr().cast(),
            buf.len(),
            libc::MSG_NOSIGNAL,
            raw.as_ptr(),
            raw.len,
        )
    })
}

pub(crate) fn sockname(fd: RawFd) -> io::Result<SockaddrBuf> {
    let mut raw = SockaddrBuf::empty();
    let (addr, len) = raw.as_mut_parts();
    cvt(unsafe { libc::getsockname(fd, addr, len) })?;
    Ok(raw)
}

pub(crate) fn peername(fd: RawFd) -> io::Result<SockaddrBuf> {
    let mut raw = SockaddrBuf::empty();
    let (addr, len) = raw.as_mut_parts();
    cvt(unsafe { libc::getpeername(fd, addr, len) })?;
    Ok(raw)
}

pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut err as *mut libc::c_int).cast(),
            &mut len,
        )
    })?;
    Ok((err != 0).then(|| io::Error::from_raw_os_error(err)))
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> io::Result<()> {
    cvt(unsafe { libc::shutdown(fd, how) })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_would_block_passes_through() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 8];
        let err = read(a.as_raw_fd(), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_send_then_read() {
        let (a, b) = UnixStream::pair().unwrap();
        assert_eq!(send(a.as_raw_fd(), b"tipc").unwrap(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(read(b.as_raw_fd(), &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"tipc");
    }

    #[test]
    fn test_query_results_on_foreign_sockets() {
        let (a, _b) = UnixStream::pair().unwrap();

        let raw = sockname(a.as_raw_fd()).unwrap();
        assert!(raw.bytes().len() < SOCKADDR_LEN);
        assert!(take_error(a.as_raw_fd()).unwrap().is_none());
        assert!(finish_connect(a.as_raw_fd()).is_ok());
    }

    #[test]
    fn test_finish_connect_without_peer_would_block() {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();

        let err = finish_connect(socket.as_raw_fd()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
