// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # dlhost
//!
//! Host runtime for on-demand data loaders.
//!
//! Each hosted loader is identified by a [`StorageId`] and owns two control
//! channels: a pending-reads channel (consumers blocked on data that is not
//! there yet) and a page-log channel (read telemetry). The host keeps a
//! registry of instances, drives their lifecycle and dispatches channel
//! records to them from two dedicated poll threads.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dlhost::{
//!     ChannelPair, DataLoader, DataLoaderHost, DataLoaderParams, DataLoaderStatus,
//!     DataLoaderType, FilesystemConnector, InstallationFile, ReadInfo, StatusListener,
//!     StatusReporter,
//! };
//!
//! struct Prefetcher;
//!
//! impl DataLoader for Prefetcher {
//!     fn on_start(&self) -> bool { true }
//!     fn on_prepare_image(&self, _: &[InstallationFile], _: &[String]) -> bool { true }
//!     fn on_pending_reads(&self, reads: &[ReadInfo]) {
//!         for read in reads {
//!             println!("fetch {} block {}", read.file_id, read.block);
//!         }
//!     }
//! }
//!
//! fn main() -> dlhost::Result<()> {
//!     let host = DataLoaderHost::new(
//!         |_: &DataLoaderParams, _: FilesystemConnector, _: StatusReporter| {
//!             Some(Box::new(Prefetcher) as Box<dyn DataLoader>)
//!         },
//!     )?;
//!
//!     let listener: Arc<dyn StatusListener> =
//!         Arc::new(|id: i32, status: DataLoaderStatus| println!("id({id}) -> {status}"));
//!     let params = DataLoaderParams::new(DataLoaderType::Incremental, "com.example.app");
//!     host.create(7, ChannelPair::default(), None, Some(listener), params)?;
//!     host.start(7)?;
//!     host.destroy(7)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`status`]: status codes, listener interface, one-report guard
//! - [`channel`]: descriptor pair and batched record reader
//! - [`looper`]: poll-based dispatcher thread
//! - [`registry`]: storage id to instance map
//! - [`connector`]: one hosted instance and its lifecycle state
//! - [`host`]: the lifecycle operations

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod filesystem;
pub mod host;
pub mod loader;
pub mod looper;
pub mod registry;
pub mod status;

/// Identifier of a hosted loader instance, chosen by the caller.
pub type StorageId = i32;

pub use channel::{ChannelKind, ChannelPair, ChannelReader, ReadInfo, WaitResult};
pub use config::{ConfigError, HostConfig};
pub use connector::{DataLoaderConnector, LifecycleState};
pub use error::{HostError, Result};
pub use filesystem::{
    BlockKind, Compression, DataBlock, FileId, FilesystemCallback, FilesystemConnector, IncFs,
    NoIncFs,
};
pub use host::{DataLoaderHost, HostBuilder};
pub use loader::{
    DataLoader, DataLoaderFactory, DataLoaderParams, DataLoaderType, InstallationFile, NamedFd,
};
pub use looper::{EventLoop, FdHandler, Readiness};
pub use registry::LoaderRegistry;
pub use status::{DataLoaderStatus, ReportGuard, StatusListener, StatusReporter};
