//! Readiness reactor adapter
//!
//! Turns nonblocking socket primitives into suspending operations. An
//! operation is attempted whenever the descriptor is reported ready for its
//! direction; `WouldBlock` re-arms the wait and any other outcome is handed
//! back to the caller. Waits are bounded by a per-direction deadline and end
//! with [`Error::Closed`] as soon as the descriptor is closed.
//!
//! The readiness source is injected through the [`Readiness`] trait. The
//! production implementation is [`PollEvented`] (tokio's `AsyncFd`); tests
//! can substitute [`ManualReadiness`].

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::task::{ready, Context, Poll, Waker};

use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{Error, Result};

#[cfg(any(test, feature = "test-util"))]
mod manual;
#[cfg(any(test, feature = "test-util"))]
pub use manual::ManualReadiness;

/// I/O direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

/// A source of readiness notifications for one descriptor.
///
/// `poll_io` runs `op` each time the descriptor is reported ready for
/// `direction`. When `op` fails with `WouldBlock` the readiness is cleared and
/// the wait resumes; any other result completes the poll.
pub trait Readiness: AsRawFd + Send + Sync {
    fn poll_io(
        &self,
        cx: &mut Context<'_>,
        direction: Direction,
        op: &mut dyn FnMut() -> io::Result<usize>,
    ) -> Poll<io::Result<usize>>;
}

/// Readiness backed by the tokio I/O driver
pub struct PollEvented {
    fd: AsyncFd<OwnedFd>,
}

impl PollEvented {
    /// Register a nonblocking descriptor with the current tokio runtime
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        let fd = AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self { fd })
    }
}

impl AsRawFd for PollEvented {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl Readiness for PollEvented {
    fn poll_io(
        &self,
        cx: &mut Context<'_>,
        direction: Direction,
        op: &mut dyn FnMut() -> io::Result<usize>,
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = match direction {
                Direction::Read => ready!(self.fd.poll_read_ready(cx))?,
                Direction::Write => ready!(self.fd.poll_write_ready(cx))?,
            };

            match guard.try_io(|_| op()) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}

struct State {
    readiness: Option<Arc<dyn Readiness>>,
    waiters: [Option<Waker>; 2],
    deadlines: [Option<Instant>; 2],
}

/// A descriptor registered with the reactor.
///
/// Owns the readiness source exclusively. Closing drops the reactor's
/// reference; the descriptor itself is released when the last in-flight poll
/// lets go of it, which happens right after parked waiters observe
/// [`Error::Closed`].
pub struct ReactorFd {
    fd: RawFd,
    state: Mutex<State>,
}

impl ReactorFd {
    /// Wrap an injected readiness source
    pub fn new(readiness: Arc<dyn Readiness>) -> Self {
        Self {
            fd: readiness.as_raw_fd(),
            state: Mutex::new(State {
                readiness: Some(readiness),
                waiters: [None, None],
                deadlines: [None, None],
            }),
        }
    }

    /// Register an owned nonblocking descriptor with the tokio driver
    pub fn register(fd: OwnedFd) -> Result<Self> {
        let readiness = PollEvented::new(fd).map_err(|e| Error::os("register", e))?;
        Ok(Self::new(Arc::new(readiness)))
    }

    /// The descriptor number; stays valid for logging after close
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().readiness.is_none()
    }

    /// Deadline consulted by the next operation in `direction`
    pub fn deadline(&self, direction: Direction) -> Option<Instant> {
        self.state.lock().deadlines[direction.index()]
    }

    /// Set both the read and the write deadline; `None` waits indefinitely
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().deadlines = [deadline, deadline];
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().deadlines[Direction::Read.index()] = deadline;
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().deadlines[Direction::Write.index()] = deadline;
    }

    fn acquire(&self) -> Result<Arc<dyn Readiness>> {
        self.state.lock().readiness.clone().ok_or(Error::Closed)
    }

    /// Run a primitive that never waits (address queries, connect start,
    /// shutdown). The descriptor stays open for the duration of `op`.
    pub fn with_fd<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(RawFd) -> R,
    {
        let readiness = self.acquire()?;
        Ok(op(readiness.as_raw_fd()))
    }

    /// Poll `op` once against the readiness source.
    ///
    /// The outer result carries reactor failures (`Closed`); the inner one is
    /// the operation's own outcome, `WouldBlock` excluded.
    pub fn poll_io<R, F>(
        &self,
        cx: &mut Context<'_>,
        direction: Direction,
        op: &mut F,
    ) -> Poll<Result<io::Result<R>>>
    where
        F: FnMut(RawFd) -> io::Result<R>,
    {
        let readiness = match self.acquire() {
            Ok(readiness) => readiness,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let fd = readiness.as_raw_fd();
        let mut output = None;
        let mut attempt = || -> io::Result<usize> {
            let value = op(fd)?;
            output = Some(value);
            Ok(0)
        };

        match readiness.poll_io(cx, direction, &mut attempt) {
            Poll::Ready(Ok(_)) => Poll::Ready(match output {
                Some(value) => Ok(Ok(value)),
                None => Err(Error::Internal(
                    "readiness reported success without running the operation".to_string(),
                )),
            }),
            Poll::Ready(Err(e)) => Poll::Ready(Ok(Err(e))),
            Poll::Pending => {
                let mut state = self.state.lock();
                if state.readiness.is_none() {
                    return Poll::Ready(Err(Error::Closed));
                }
                let waker = cx.waker();
                let slot = &mut state.waiters[direction.index()];
                if !slot.as_ref().map_or(false, |parked| parked.will_wake(waker)) {
                    *slot = Some(waker.clone());
                }
                Poll::Pending
            }
        }
    }

    /// Drive `op` to completion, bounded by the stored deadline for `direction`
    pub async fn io<R, F>(&self, direction: Direction, op: F) -> Result<io::Result<R>>
    where
        F: FnMut(RawFd) -> io::Result<R>,
    {
        self.io_until(direction, self.deadline(direction), op).await
    }

    /// Drive `op` to completion, bounded by an explicit deadline
    pub async fn io_until<R, F>(
        &self,
        direction: Direction,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<io::Result<R>>
    where
        F: FnMut(RawFd) -> io::Result<R>,
    {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if let Some(deadline) = deadline {
            if deadline <= Instant::now() {
                trace!(fd = self.fd, ?direction, "deadline already expired");
                return Err(Error::Timeout);
            }
        }

        let attempt = std::future::poll_fn(|cx| self.poll_io(cx, direction, &mut op));
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, attempt)
                .await
                .map_err(|_| Error::Timeout)?,
            None => attempt.await,
        }
    }

    /// Close the descriptor. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        let (readiness, waiters) = {
            let mut state = self.state.lock();
            match state.readiness.take() {
                Some(readiness) => (readiness, std::mem::take(&mut state.waiters)),
                None => return false,
            }
        };

        for waker in waiters.into_iter().flatten() {
            waker.wake();
        }
        drop(readiness);

        debug!(fd = self.fd, "descriptor closed");
        true
    }
}

impl fmt::Debug for ReactorFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorFd")
            .field("fd", &self.fd)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ReactorFd {
    fn drop(&mut self) {
        self.close();
    }
}
