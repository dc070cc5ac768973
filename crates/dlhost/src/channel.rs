// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kernel channels and the non-blocking drain primitive.
//!
//! A loader instance owns two readable descriptors:
//!
//! - `cmd`: pending reads (a consumer is blocked on a region not yet written)
//! - `logs`: page reads (telemetry of pages actually read)
//!
//! Both deliver fixed-size [`ReadInfo`] records. [`ChannelReader::drain`]
//! reads as many whole records as are available, bounded by its capacity,
//! and never splits a record.

use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::filesystem::FileId;

/// Sentinel for an absent descriptor.
pub const ABSENT_FD: RawFd = -1;

/// Size of one record on the wire.
pub const READ_INFO_SIZE: usize = 32;

/// One pending-read or page-read record.
///
/// Layout (native endian): `file_id[16] | timestamp_us u64 | block u32 | serial u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadInfo {
    pub file_id: FileId,
    pub timestamp_us: u64,
    pub block: u32,
    pub serial: u32,
}

impl ReadInfo {
    /// Decode one record; `None` unless `raw` holds at least a full record.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let mut file_id = [0u8; FileId::SIZE];
        file_id.copy_from_slice(raw.get(0..16)?);
        Some(Self {
            file_id: FileId::new(file_id),
            timestamp_us: u64::from_ne_bytes(raw.get(16..24)?.try_into().ok()?),
            block: u32::from_ne_bytes(raw.get(24..28)?.try_into().ok()?),
            serial: u32::from_ne_bytes(raw.get(28..32)?.try_into().ok()?),
        })
    }

    pub fn encode(&self) -> [u8; READ_INFO_SIZE] {
        let mut raw = [0u8; READ_INFO_SIZE];
        raw[0..16].copy_from_slice(self.file_id.as_bytes());
        raw[16..24].copy_from_slice(&self.timestamp_us.to_ne_bytes());
        raw[24..28].copy_from_slice(&self.block.to_ne_bytes());
        raw[28..32].copy_from_slice(&self.serial.to_ne_bytes());
        raw
    }
}

/// Which of the two channels a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    PendingReads,
    PageReads,
}

impl ChannelKind {
    pub const fn name(self) -> &'static str {
        match self {
            ChannelKind::PendingReads => "pending-reads",
            ChannelKind::PageReads => "page-reads",
        }
    }
}

/// Outcome of one [`ChannelReader::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    HaveData,
    NoData,
    Error,
}

/// The two channel descriptors of a loader instance.
///
/// Either may be absent. Descriptors are closed when the pair is dropped,
/// which happens once the owning instance is gone.
#[derive(Default)]
pub struct ChannelPair {
    cmd: Option<OwnedFd>,
    logs: Option<OwnedFd>,
}

impl ChannelPair {
    pub fn new(cmd: Option<OwnedFd>, logs: Option<OwnedFd>) -> Self {
        Self { cmd, logs }
    }

    /// Take ownership of raw descriptors; [`ABSENT_FD`] (or any negative
    /// value) marks a missing channel.
    ///
    /// # Safety
    ///
    /// Each non-negative descriptor must be open and not owned elsewhere.
    pub unsafe fn from_raw_fds(cmd: RawFd, logs: RawFd) -> Self {
        // SAFETY: caller transfers ownership of every non-negative descriptor.
        let adopt = |fd: RawFd| (fd >= 0).then(|| unsafe { OwnedFd::from_raw_fd(fd) });
        Self {
            cmd: adopt(cmd),
            logs: adopt(logs),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> Option<BorrowedFd<'_>> {
        let fd = match kind {
            ChannelKind::PendingReads => self.cmd.as_ref(),
            ChannelKind::PageReads => self.logs.as_ref(),
        };
        fd.map(|fd| fd.as_fd())
    }

    pub fn cmd(&self) -> Option<BorrowedFd<'_>> {
        self.get(ChannelKind::PendingReads)
    }

    pub fn logs(&self) -> Option<BorrowedFd<'_>> {
        self.get(ChannelKind::PageReads)
    }

    /// Raw descriptor number, or `None` when absent.
    pub fn raw(&self, kind: ChannelKind) -> Option<RawFd> {
        self.get(kind).map(|fd| fd.as_raw_fd())
    }
}

impl fmt::Debug for ChannelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPair")
            .field("cmd", &self.raw(ChannelKind::PendingReads).unwrap_or(ABSENT_FD))
            .field("logs", &self.raw(ChannelKind::PageReads).unwrap_or(ABSENT_FD))
            .finish()
    }
}

/// Filesystem path behind a descriptor, empty when it cannot be resolved.
pub fn fd_path(fd: RawFd) -> String {
    if fd < 0 {
        return String::new();
    }
    std::fs::read_link(format!("/proc/self/fd/{}", fd))
        .map(|path| path.display().to_string())
        .unwrap_or_default()
}

/// Reusable drain buffer for one channel kind.
pub struct ChannelReader {
    capacity: usize,
    raw: Vec<u8>,
    /// Bytes of an incomplete record kept at the front of `raw`.
    carry: usize,
    records: Vec<ReadInfo>,
}

impl ChannelReader {
    /// Reader returning at most `capacity` records per drain (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            raw: Vec::with_capacity(capacity * READ_INFO_SIZE),
            carry: 0,
            records: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records produced by the last successful drain.
    pub fn records(&self) -> &[ReadInfo] {
        &self.records
    }

    /// Wait up to `timeout` for `fd` to become readable, then read whole records.
    ///
    /// With a zero timeout this is a single non-blocking poll-and-read.
    /// Returns [`WaitResult::HaveData`] as soon as at least one record was
    /// read. Errors are logged and reported as [`WaitResult::Error`].
    pub fn drain(&mut self, fd: BorrowedFd<'_>, timeout: Duration) -> WaitResult {
        match self.fill(fd, timeout) {
            Ok(0) => WaitResult::NoData,
            Ok(_) => WaitResult::HaveData,
            Err(err) => {
                log::warn!("[channel] read from fd {} failed: {}", fd.as_raw_fd(), err);
                WaitResult::Error
            }
        }
    }

    fn fill(&mut self, fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<usize> {
        self.records.clear();
        if !platform::wait_readable(fd, timeout)? {
            return Ok(0);
        }
        self.ingest(platform::bytes_available(fd), |buf| platform::read(fd, buf))
    }

    /// Read up to a batch of records with `read`.
    ///
    /// With `available` known, only whole records are requested. Without it
    /// a full batch is requested and a trailing partial record is kept for
    /// the next call, so record boundaries survive short reads.
    fn ingest(
        &mut self,
        available: Option<usize>,
        read: impl FnOnce(&mut [u8]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.records.clear();
        let wanted = match available {
            Some(available) => {
                ((self.carry + available) / READ_INFO_SIZE).min(self.capacity) * READ_INFO_SIZE
            }
            None => self.capacity * READ_INFO_SIZE,
        };
        if wanted <= self.carry {
            return Ok(0);
        }

        self.raw.resize(wanted, 0);
        let read = read(&mut self.raw[self.carry..wanted])?;
        let total = self.carry + read;
        let whole = total / READ_INFO_SIZE * READ_INFO_SIZE;

        self.records.extend(
            self.raw[..whole]
                .chunks_exact(READ_INFO_SIZE)
                .filter_map(ReadInfo::decode),
        );
        self.raw.copy_within(whole..total, 0);
        self.carry = total - whole;
        Ok(self.records.len())
    }
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("capacity", &self.capacity)
            .field("buffered", &self.records.len())
            .field("carry", &self.carry)
            .finish()
    }
}

mod platform {
    use std::io;
    use std::os::fd::{AsRawFd, BorrowedFd};
    use std::time::Duration;

    /// `Ok(true)` when readable (or hung up), `Ok(false)` on timeout.
    pub fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: pollfd is a valid stack-allocated structure and nfds is 1.
            let res = unsafe { libc::poll(std::ptr::addr_of_mut!(pollfd), 1, timeout_ms) };
            if res == 0 {
                return Ok(false);
            }
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            break;
        }

        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if pollfd.revents & libc::POLLERR != 0 {
            return Err(io::Error::other("channel reported POLLERR"));
        }
        Ok(pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0)
    }

    /// Bytes ready to read, or `None` when the descriptor has no FIONREAD.
    pub fn bytes_available(fd: BorrowedFd<'_>) -> Option<usize> {
        let mut available: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int into `available`.
        let ret = unsafe {
            libc::ioctl(
                fd.as_raw_fd(),
                libc::FIONREAD,
                std::ptr::addr_of_mut!(available),
            )
        };
        if ret < 0 {
            return None;
        }
        usize::try_from(available).ok()
    }

    pub fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: buf is a valid writable slice of buf.len() bytes.
            let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if ret >= 0 {
                return Ok(ret.unsigned_abs());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(0),
                _ => return Err(err),
            }
        }
    }
}
