// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Poll-based descriptor dispatcher bound to one thread.
//!
//! Uses mio's poll-based event loop over borrowed descriptors
//! ([`mio::unix::SourceFd`]) plus a [`mio::Waker`] so registrations added or
//! removed from other threads take effect without waiting out the timeout.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------+
//! |                      EventLoop                          |
//! |  +--------------------------------------------------+  |
//! |  |                   mio::Poll                       |  |
//! |  |  - channel fds (token = fd)                       |  |
//! |  |  - Waker (add/remove/wake from other threads)     |  |
//! |  +--------------------------------------------------+  |
//! |                         |                               |
//! |                         v                               |
//! |  +--------------------------------------------------+  |
//! |  |  registrations: fd -> Arc<dyn FdHandler>         |  |
//! |  |  handler returns false -> registration dropped   |  |
//! |  +--------------------------------------------------+  |
//! +--------------------------------------------------------+
//! ```
//!
//! The loop never closes descriptors; their owners do, after removing them.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

/// Token for the waker; never a valid descriptor.
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Pause after a failed poll before retrying.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Readiness reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            hangup: event.is_read_closed(),
            error: event.is_error(),
        }
    }
}

/// Callback + context of one registration.
pub trait FdHandler: Send + Sync {
    /// Called on the loop thread when `fd` is ready. Return `false` to drop
    /// the registration.
    fn on_ready(&self, fd: RawFd, readiness: Readiness) -> bool;
}

struct Registration {
    handler: Arc<dyn FdHandler>,
    seq: u64,
}

struct PollState {
    poll: Poll,
    events: Events,
}

enum LoopThread {
    Idle,
    Running(JoinHandle<()>),
    Finished,
}

/// Single-threaded readiness dispatcher with dynamic registration.
pub struct EventLoop {
    name: String,
    state: Mutex<PollState>,
    registry: Registry,
    waker: Waker,
    registrations: Mutex<HashMap<RawFd, Registration>>,
    next_seq: AtomicU64,
    stop: Arc<AtomicBool>,
    thread: Mutex<LoopThread>,
}

impl EventLoop {
    /// Create a loop whose thread (once started) runs until `stop` is set.
    pub fn new(name: impl Into<String>, max_events: usize, stop: Arc<AtomicBool>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        Ok(Self {
            name: name.into(),
            state: Mutex::new(PollState {
                poll,
                events: Events::with_capacity(max_events.max(1)),
            }),
            registry,
            waker,
            registrations: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            stop,
            thread: Mutex::new(LoopThread::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `fd`, replacing any existing registration for it.
    pub fn add_fd(&self, fd: RawFd, interest: Interest, handler: Arc<dyn FdHandler>) -> io::Result<()> {
        let token = usize::try_from(fd)
            .map(Token)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "negative descriptor"))?;

        {
            let mut registrations = self.registrations.lock();
            if registrations.contains_key(&fd) {
                self.registry.reregister(&mut SourceFd(&fd), token, interest)?;
            } else {
                self.registry.register(&mut SourceFd(&fd), token, interest)?;
            }
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            registrations.insert(fd, Registration { handler, seq });
        }

        log::debug!("[looper] {}: added fd {}", self.name, fd);
        self.wake();
        Ok(())
    }

    /// Drop the registration for `fd`. Returns `false` if there was none.
    pub fn remove_fd(&self, fd: RawFd) -> bool {
        let removed = {
            let mut registrations = self.registrations.lock();
            let removed = registrations.remove(&fd);
            if removed.is_some() {
                self.deregister(fd);
            }
            removed
        };

        if removed.is_some() {
            log::debug!("[looper] {}: removed fd {}", self.name, fd);
            self.wake();
        }
        removed.is_some()
    }

    /// Interrupt a blocked [`EventLoop::poll_all`].
    pub fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            log::warn!("[looper] {}: wake failed: {}", self.name, err);
        }
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registrations.lock().contains_key(&fd)
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Block until a registered descriptor is ready, the loop is woken, or
    /// `timeout` elapses; then run the ready callbacks. Returns how many
    /// callbacks ran.
    pub fn poll_all(&self, timeout: Duration) -> io::Result<usize> {
        let mut state = self.state.lock();
        let PollState { poll, events } = &mut *state;

        match poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }

        let mut dispatched = 0;
        for event in events.iter() {
            // Waker token does not fit a RawFd.
            let Ok(fd) = RawFd::try_from(event.token().0) else {
                continue;
            };
            let Some((handler, seq)) = self
                .registrations
                .lock()
                .get(&fd)
                .map(|reg| (Arc::clone(&reg.handler), reg.seq))
            else {
                continue;
            };

            dispatched += 1;
            if !handler.on_ready(fd, Readiness::from_event(event)) {
                self.remove_if_current(fd, seq);
            }
        }
        Ok(dispatched)
    }

    /// Spawn the loop thread unless it was spawned before. Returns `true`
    /// when this call spawned it. Fails once the loop has been stopped.
    pub fn ensure_started(self: &Arc<Self>, timeout: Duration) -> io::Result<bool> {
        let mut thread = self.thread.lock();
        match *thread {
            LoopThread::Running(_) => return Ok(false),
            LoopThread::Finished => return Err(self.stopped_error()),
            LoopThread::Idle if self.stop.load(Ordering::Acquire) => {
                return Err(self.stopped_error());
            }
            LoopThread::Idle => {}
        }

        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || this.run(timeout))?;
        *thread = LoopThread::Running(handle);
        log::info!("[looper] {}: thread started", self.name);
        Ok(true)
    }

    fn stopped_error(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("event loop {} is stopped", self.name),
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.thread.lock(), LoopThread::Running(_))
    }

    /// Wait for the loop thread to exit. The stop flag must be set first.
    pub fn join(&self) {
        let handle = match std::mem::replace(&mut *self.thread.lock(), LoopThread::Finished) {
            LoopThread::Running(handle) => handle,
            LoopThread::Idle | LoopThread::Finished => return,
        };

        self.wake();
        if handle.join().is_err() {
            log::error!("[looper] {}: thread panicked", self.name);
        }
    }

    fn run(&self, timeout: Duration) {
        while !self.stop.load(Ordering::Acquire) {
            if let Err(err) = self.poll_all(timeout) {
                log::error!("[looper] {}: poll error: {}", self.name, err);
                thread::sleep(POLL_ERROR_BACKOFF);
            }
        }
        log::info!("[looper] {}: thread exiting", self.name);
    }

    fn remove_if_current(&self, fd: RawFd, seq: u64) {
        let mut registrations = self.registrations.lock();
        if registrations.get(&fd).is_some_and(|reg| reg.seq == seq) {
            registrations.remove(&fd);
            self.deregister(fd);
            log::debug!("[looper] {}: callback dropped fd {}", self.name, fd);
        }
    }

    fn deregister(&self, fd: RawFd) {
        if let Err(err) = self.registry.deregister(&mut SourceFd(&fd)) {
            log::debug!("[looper] {}: deregister fd {} failed: {}", self.name, fd, err);
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("registered", &self.registered_count())
            .field("running", &self.is_running())
            .finish()
    }
}
