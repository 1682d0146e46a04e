//! Thin wrapper around the OS readiness facility.
//!
//! Backed by `mio`, which multiplexes epoll (Linux), kqueue, and IOCP
//! behind one API; this reactor only targets the epoll-shaped readiness
//! model the rest of the design assumes. Registration is tracked by fd
//! (used directly as the `mio::Token`) so the reactor can recover which
//! connection an event belongs to without a side table.

use mio::event::Event;
use mio::{Events, Interest, Poll, Token};
use std::io;

pub const DEFAULT_CAPACITY: usize = 1024;

pub struct Readiness {
    pub fd: usize,
    pub readable: bool,
    pub writable: bool,
    pub error_or_hup: bool,
}

impl From<&Event> for Readiness {
    fn from(ev: &Event) -> Self {
        Readiness {
            fd: ev.token().0,
            readable: ev.is_readable(),
            writable: ev.is_writable(),
            error_or_hup: ev.is_error() || ev.is_read_closed() || ev.is_write_closed(),
        }
    }
}

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Poller {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    /// Registers `source` for `interest` under token `fd`. The poller
    /// contract reports success as `true` — callers must not treat a
    /// falsy/zero return as success, the mistake the reactor this project
    /// is modeled on makes against its own poller.
    pub fn add<S: mio::event::Source>(&mut self, fd: usize, source: &mut S, interest: Interest) -> bool {
        self.poll.registry().register(source, Token(fd), interest).is_ok()
    }

    pub fn modify<S: mio::event::Source>(&mut self, fd: usize, source: &mut S, interest: Interest) -> bool {
        self.poll.registry().reregister(source, Token(fd), interest).is_ok()
    }

    pub fn remove<S: mio::event::Source>(&mut self, source: &mut S) -> bool {
        self.poll.registry().deregister(source).is_ok()
    }

    /// Blocks until at least one event is ready or `timeout_ms` elapses.
    /// `timeout_ms < 0` blocks indefinitely.
    pub fn wait(&mut self, timeout_ms: i64) -> io::Result<usize> {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(timeout_ms as u64))
        };
        self.poll.poll(&mut self.events, timeout)?;
        Ok(self.events.iter().count())
    }

    pub fn readiness_events(&self) -> impl Iterator<Item = Readiness> + '_ {
        self.events.iter().map(Readiness::from)
    }
}
