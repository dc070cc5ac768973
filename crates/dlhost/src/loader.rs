// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loader capability interface.
//!
//! A concrete data loader implements [`DataLoader`]; the host only ever holds
//! it as `Box<dyn DataLoader>` and drives it through the lifecycle hooks.
//! Loaders are built by a [`DataLoaderFactory`] from [`DataLoaderParams`].
//!
//! # Thread Safety
//!
//! Lifecycle hooks run on the caller's thread; `on_pending_reads` runs on the
//! pending-reads loop thread and `on_page_reads` on the page-log loop thread,
//! possibly at the same time as a lifecycle hook. Hooks must return promptly
//! and must not call back into the host.

use std::fmt;
use std::os::fd::OwnedFd;

use crate::channel::ReadInfo;
use crate::filesystem::FilesystemConnector;
use crate::status::StatusReporter;

/// Hooks of one loader instance.
pub trait DataLoader: Send + Sync {
    /// Begin serving. `false` keeps the instance stopped.
    fn on_start(&self) -> bool;

    fn on_stop(&self) {}

    fn on_destroy(&self) {}

    /// Prepare the image for the given file changes. `false` means not ready.
    fn on_prepare_image(&self, added: &[InstallationFile], removed: &[String]) -> bool;

    /// A batch of pending reads (consumers blocked on missing data).
    fn on_pending_reads(&self, reads: &[ReadInfo]);

    /// A batch of page-read telemetry.
    fn on_page_reads(&self, _reads: &[ReadInfo]) {}
}

/// Builds loaders. Returning `None` rejects the parameters.
pub trait DataLoaderFactory: Send + Sync {
    fn create(
        &self,
        params: &DataLoaderParams,
        filesystem: FilesystemConnector,
        status: StatusReporter,
    ) -> Option<Box<dyn DataLoader>>;
}

impl<F> DataLoaderFactory for F
where
    F: Fn(&DataLoaderParams, FilesystemConnector, StatusReporter) -> Option<Box<dyn DataLoader>>
        + Send
        + Sync,
{
    fn create(
        &self,
        params: &DataLoaderParams,
        filesystem: FilesystemConnector,
        status: StatusReporter,
    ) -> Option<Box<dyn DataLoader>> {
        self(params, filesystem, status)
    }
}

/// How the installation is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLoaderType {
    #[default]
    None,
    Streaming,
    Incremental,
}

/// Descriptor passed to the loader under a name.
#[derive(Debug)]
pub struct NamedFd {
    pub name: String,
    pub fd: OwnedFd,
}

/// Creation parameters, forwarded to the factory verbatim.
#[derive(Debug, Default)]
pub struct DataLoaderParams {
    pub kind: DataLoaderType,
    pub package_name: String,
    pub class_name: String,
    pub arguments: String,
    pub dynamic_args: Vec<NamedFd>,
}

impl DataLoaderParams {
    pub fn new(kind: DataLoaderType, package_name: impl Into<String>) -> Self {
        Self {
            kind,
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_dynamic_arg(mut self, name: impl Into<String>, fd: OwnedFd) -> Self {
        self.dynamic_args.push(NamedFd {
            name: name.into(),
            fd,
        });
        self
    }
}

impl fmt::Display for DataLoaderParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{}/{}/{}/{}",
            self.kind,
            self.package_name,
            self.class_name,
            self.arguments,
            self.dynamic_args.len()
        )
    }
}

/// File added to the image by a prepare request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallationFile {
    pub name: String,
    pub length_bytes: u64,
    pub metadata: Vec<u8>,
}
