use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use super::{Direction, Readiness};

#[derive(Default)]
struct Slot {
    ready: bool,
    tick: u64,
    attempts: usize,
    waker: Option<Waker>,
}

/// Readiness source driven by hand.
///
/// Nothing is ready until [`set_ready`](Self::set_ready) is called for a
/// direction; an operation returning `WouldBlock` clears it again. The
/// descriptor number is only reported, never touched.
pub struct ManualReadiness {
    fd: RawFd,
    slots: Mutex<[Slot; 2]>,
}

impl ManualReadiness {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            slots: Mutex::new(Default::default()),
        }
    }

    /// Mark `direction` ready and wake its waiter
    pub fn set_ready(&self, direction: Direction) {
        let waker = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[direction.index()];
            slot.ready = true;
            slot.tick += 1;
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// How many times an operation ran in `direction`
    pub fn attempts(&self, direction: Direction) -> usize {
        self.slots.lock()[direction.index()].attempts
    }
}

impl AsRawFd for ManualReadiness {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Readiness for ManualReadiness {
    fn poll_io(
        &self,
        cx: &mut Context<'_>,
        direction: Direction,
        op: &mut dyn FnMut() -> io::Result<usize>,
    ) -> Poll<io::Result<usize>> {
        let index = direction.index();
        loop {
            let tick = {
                let mut slots = self.slots.lock();
                let slot = &mut slots[index];
                if !slot.ready {
                    slot.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                slot.attempts += 1;
                slot.tick
            };

            match op() {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let mut slots = self.slots.lock();
                    // a set_ready that raced with the attempt keeps the flag
                    if slots[index].tick == tick {
                        slots[index].ready = false;
                    }
                }
                result => return Poll::Ready(result),
            }
        }
    }
}
