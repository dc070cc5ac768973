// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Filesystem pass-through handed to each loader.
//!
//! The host does not implement the backing store. A loader fills it through
//! its [`FilesystemConnector`], which forwards verbatim either to the
//! per-instance [`FilesystemCallback`] (bulk data streamed by the installer
//! session) or to the host-wide [`IncFs`] backend (block writes, metadata).

use std::fmt;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;

use crate::channel::ChannelPair;
use crate::StorageId;

/// 16-byte identifier of a file inside the backing store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileId(pub [u8; 16]);

impl FileId {
    pub const SIZE: usize = 16;

    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Data,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
}

/// One block destined for a file opened with [`FilesystemConnector::open_write`].
#[derive(Debug, Clone)]
pub struct DataBlock<'a> {
    pub file: BorrowedFd<'a>,
    pub page_index: u32,
    pub kind: BlockKind,
    pub compression: Compression,
    pub data: &'a [u8],
}

/// Backing-store operations shared by every loader of a host.
pub trait IncFs: Send + Sync {
    /// Open `file_id` for block writes.
    fn open_write(&self, control: &ChannelPair, file_id: FileId) -> io::Result<OwnedFd>;

    /// Write blocks; returns how many were written.
    fn write_blocks(&self, blocks: &[DataBlock<'_>]) -> io::Result<usize>;

    /// Copy the file's metadata into `buffer`; returns its size.
    fn get_metadata(
        &self,
        control: &ChannelPair,
        file_id: FileId,
        buffer: &mut [u8],
    ) -> io::Result<usize>;
}

/// Backend used when the host was built without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncFs;

impl IncFs for NoIncFs {
    fn open_write(&self, _control: &ChannelPair, _file_id: FileId) -> io::Result<OwnedFd> {
        Err(unsupported())
    }

    fn write_blocks(&self, _blocks: &[DataBlock<'_>]) -> io::Result<usize> {
        Err(unsupported())
    }

    fn get_metadata(
        &self,
        _control: &ChannelPair,
        _file_id: FileId,
        _buffer: &mut [u8],
    ) -> io::Result<usize> {
        Err(unsupported())
    }
}

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "no filesystem backend")
}

/// Per-instance sink for bulk file data (the installer session side).
pub trait FilesystemCallback: Send + Sync {
    fn write_data(
        &self,
        name: &str,
        offset: i64,
        length: i64,
        source: BorrowedFd<'_>,
    ) -> io::Result<()>;
}

/// Filesystem surface of one loader instance.
#[derive(Clone)]
pub struct FilesystemConnector {
    id: StorageId,
    control: Arc<ChannelPair>,
    callback: Option<Arc<dyn FilesystemCallback>>,
    incfs: Arc<dyn IncFs>,
}

impl FilesystemConnector {
    pub fn new(
        id: StorageId,
        control: Arc<ChannelPair>,
        callback: Option<Arc<dyn FilesystemCallback>>,
        incfs: Arc<dyn IncFs>,
    ) -> Self {
        Self {
            id,
            control,
            callback,
            incfs,
        }
    }

    pub fn storage_id(&self) -> StorageId {
        self.id
    }

    pub fn write_data(
        &self,
        name: &str,
        offset: i64,
        length: i64,
        source: BorrowedFd<'_>,
    ) -> io::Result<()> {
        match &self.callback {
            Some(callback) => callback.write_data(name, offset, length, source),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no filesystem callback for this loader",
            )),
        }
    }

    pub fn open_write(&self, file_id: FileId) -> io::Result<OwnedFd> {
        self.incfs.open_write(&self.control, file_id)
    }

    pub fn write_blocks(&self, blocks: &[DataBlock<'_>]) -> io::Result<usize> {
        self.incfs.write_blocks(blocks)
    }

    pub fn get_metadata(&self, file_id: FileId, buffer: &mut [u8]) -> io::Result<usize> {
        self.incfs.get_metadata(&self.control, file_id, buffer)
    }
}

impl fmt::Debug for FilesystemConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemConnector")
            .field("id", &self.id)
            .field("control", &self.control)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
