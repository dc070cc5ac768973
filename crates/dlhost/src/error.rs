// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for lifecycle operations.
//!
//! Every public lifecycle call on [`crate::DataLoaderHost`] returns
//! [`Result`]; `Ok(())` is the success boolean, any `Err` is failure. None of
//! these errors is fatal to the process: hook failures are absorbed at the
//! lifecycle boundary and channel faults only end the current drain cycle.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::config::ConfigError;
use crate::StorageId;

/// Errors returned by host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// No loader instance is registered under this storage id.
    #[error("Data loader id({0}) not found")]
    NotFound(StorageId),

    /// A loader instance is already registered under this storage id.
    #[error("Data loader id({0}) already exists")]
    DuplicateId(StorageId),

    /// The host has been shut down and accepts no lifecycle calls.
    #[error("Data loader host is shut down")]
    ShutDown,

    /// The instance's own hook returned failure or panicked.
    #[error("Data loader id({id}): {hook} failed")]
    HookFailure {
        /// Storage id of the failing instance.
        id: StorageId,
        /// Hook name (`onCreate`, `onStart`, ...).
        hook: &'static str,
    },

    /// A channel descriptor could not be polled, registered or read.
    #[error("Channel fault on fd {fd}: {source}")]
    ChannelFault {
        /// Offending descriptor.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// I/O error outside a specific channel (thread spawn, poller setup).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Host configuration rejected at build time.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HostError {
    /// Build a [`HostError::HookFailure`].
    pub fn hook(id: StorageId, hook: &'static str) -> Self {
        HostError::HookFailure { id, hook }
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
