// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle status reporting.
//!
//! A loader instance is observed by an optional [`StatusListener`]. Each
//! lifecycle operation emits exactly one status for its instance; the
//! [`ReportGuard`] makes that hold on early returns by reporting a default
//! status when it goes out of scope without having been finished.
//!
//! ```ignore
//! let mut guard = ReportGuard::new(DataLoaderStatus::Stopped);
//! let connector = host.lookup(id)?;          // unknown id: nothing reported
//! guard.arm(connector.reporter().clone());
//! if !connector.on_start() {
//!     return Err(..);                        // guard reports STOPPED
//! }
//! guard.finish(DataLoaderStatus::Started);   // reports STARTED, disarms
//! ```

use std::fmt;
use std::sync::Arc;

use crate::StorageId;

/// Status codes delivered to a [`StatusListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataLoaderStatus {
    Created = 0,
    Destroyed = 1,
    Started = 2,
    Stopped = 3,
    ImageReady = 4,
    ImageNotReady = 5,
    /// Reported by the loader itself: backing connection degraded.
    SlowConnection = 6,
    /// Reported by the loader itself: backing connection lost.
    NoConnection = 7,
    /// Reported by the loader itself: backing connection healthy again.
    ConnectionOk = 8,
}

impl DataLoaderStatus {
    /// Lowest defined status code.
    pub const FIRST: Self = Self::Created;
    /// Highest defined status code.
    pub const LAST: Self = Self::ConnectionOk;

    pub const ALL: [Self; 9] = [
        Self::Created,
        Self::Destroyed,
        Self::Started,
        Self::Stopped,
        Self::ImageReady,
        Self::ImageNotReady,
        Self::SlowConnection,
        Self::NoConnection,
        Self::ConnectionOk,
    ];

    /// Integer code of this status.
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Destroyed => "DESTROYED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::ImageReady => "IMAGE_READY",
            Self::ImageNotReady => "IMAGE_NOT_READY",
            Self::SlowConnection => "SLOW_CONNECTION",
            Self::NoConnection => "NO_CONNECTION",
            Self::ConnectionOk => "CONNECTION_OK",
        }
    }
}

impl TryFrom<i32> for DataLoaderStatus {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        if code < Self::FIRST.code() || Self::LAST.code() < code {
            return Err(code);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.code() == code)
            .ok_or(code)
    }
}

impl fmt::Display for DataLoaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// Observer of a loader instance's lifecycle.
///
/// Called synchronously from whichever thread runs the lifecycle operation
/// (or from a loader reporting connection quality). Must not block.
pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, id: StorageId, status: DataLoaderStatus);
}

impl<F> StatusListener for F
where
    F: Fn(StorageId, DataLoaderStatus) + Send + Sync,
{
    fn on_status_changed(&self, id: StorageId, status: DataLoaderStatus) {
        self(id, status);
    }
}

/// Deliver `status` for `id` to `listener`.
///
/// Returns `false` without side effect when the code is outside
/// [`DataLoaderStatus::FIRST`]..=[`DataLoaderStatus::LAST`] or when there is no
/// listener to talk to.
pub fn report_status(listener: Option<&dyn StatusListener>, id: StorageId, status: i32) -> bool {
    let status = match DataLoaderStatus::try_from(status) {
        Ok(status) => status,
        Err(code) => {
            log::error!("[status] Unable to report invalid status. id={} status={}", id, code);
            return false;
        }
    };

    let Some(listener) = listener else {
        log::warn!(
            "[status] No listener object to report to. id={} status={}",
            id,
            status
        );
        return false;
    };

    listener.on_status_changed(id, status);
    log::info!("[status] Reported status. id={} status={}", id, status);
    true
}

/// Status channel of one loader instance (storage id + optional listener).
#[derive(Clone)]
pub struct StatusReporter {
    id: StorageId,
    listener: Option<Arc<dyn StatusListener>>,
}

impl StatusReporter {
    pub fn new(id: StorageId, listener: Option<Arc<dyn StatusListener>>) -> Self {
        Self { id, listener }
    }

    pub fn storage_id(&self) -> StorageId {
        self.id
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Report a typed status.
    pub fn report(&self, status: DataLoaderStatus) -> bool {
        self.report_raw(status.code())
    }

    /// Report a raw status code; out-of-range codes are rejected.
    pub fn report_raw(&self, code: i32) -> bool {
        report_status(self.listener.as_deref(), self.id, code)
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("id", &self.id)
            .field("has_listener", &self.has_listener())
            .finish()
    }
}

/// Reports a default status on drop unless finished or disarmed.
///
/// Starts unarmed when the listener is not known yet (lookup pending); an
/// unarmed guard reports nothing.
#[must_use = "dropping the guard immediately reports its default status"]
pub struct ReportGuard {
    reporter: Option<StatusReporter>,
    default: DataLoaderStatus,
}

impl ReportGuard {
    /// Unarmed guard.
    pub fn new(default: DataLoaderStatus) -> Self {
        Self {
            reporter: None,
            default,
        }
    }

    /// Guard armed from the start.
    pub fn armed(reporter: StatusReporter, default: DataLoaderStatus) -> Self {
        Self {
            reporter: Some(reporter),
            default,
        }
    }

    pub fn arm(&mut self, reporter: StatusReporter) {
        self.reporter = Some(reporter);
    }

    pub fn is_armed(&self) -> bool {
        self.reporter.is_some()
    }

    /// Cancel the default report.
    pub fn disarm(&mut self) -> Option<StatusReporter> {
        self.reporter.take()
    }

    /// Cancel the default report and emit `status` instead.
    pub fn finish(mut self, status: DataLoaderStatus) -> bool {
        match self.disarm() {
            Some(reporter) => reporter.report(status),
            None => false,
        }
    }
}

impl Drop for ReportGuard {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter.take() {
            reporter.report(self.default);
        }
    }
}
