// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One hosted loader instance: channels, hooks, listener and lifecycle state.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::channel::{ChannelKind, ChannelPair, ChannelReader, WaitResult};
use crate::loader::{DataLoader, InstallationFile};
use crate::status::StatusReporter;
use crate::StorageId;

/// Lifecycle of a loader instance.
///
/// ```text
/// Created --start--> Started --stop--> Stopped --start--> Started
///    |                  |                 |
///    +-----------------destroy------------+--> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Started = 1,
    Stopped = 2,
    Destroyed = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Stopped,
            _ => Self::Destroyed,
        }
    }
}

/// A registered loader instance.
///
/// Descriptors, listener and loader are fixed at construction. The state
/// changes only while the transition lock is held, which serializes
/// lifecycle operations on this instance without touching other ids.
pub struct DataLoaderConnector {
    id: StorageId,
    control: Arc<ChannelPair>,
    reporter: StatusReporter,
    loader: Box<dyn DataLoader>,
    state: AtomicU8,
    transitions: Mutex<()>,
}

impl DataLoaderConnector {
    pub fn new(
        id: StorageId,
        control: Arc<ChannelPair>,
        reporter: StatusReporter,
        loader: Box<dyn DataLoader>,
    ) -> Self {
        Self {
            id,
            control,
            reporter,
            loader,
            state: AtomicU8::new(LifecycleState::Created as u8),
            transitions: Mutex::new(()),
        }
    }

    pub fn storage_id(&self) -> StorageId {
        self.id
    }

    pub fn control(&self) -> &ChannelPair {
        &self.control
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, _held: &TransitionGuard<'_>, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Serialize a lifecycle transition on this instance.
    pub(crate) fn lock_transitions(&self) -> TransitionGuard<'_> {
        TransitionGuard(self.transitions.lock())
    }

    pub(crate) fn on_start(&self) -> bool {
        invoke_hook(self.id, "onStart", || self.loader.on_start()).unwrap_or(false)
    }

    pub(crate) fn on_stop(&self) {
        invoke_hook(self.id, "onStop", || self.loader.on_stop());
    }

    pub(crate) fn on_destroy(&self) {
        invoke_hook(self.id, "onDestroy", || self.loader.on_destroy());
    }

    pub(crate) fn on_prepare_image(&self, added: &[InstallationFile], removed: &[String]) -> bool {
        invoke_hook(self.id, "onPrepareImage", || {
            self.loader.on_prepare_image(added, removed)
        })
        .unwrap_or(false)
    }

    /// Drain the pending-reads channel into `onPendingReads` until empty.
    pub fn on_pending_reads_ready(&self, reader: &mut ChannelReader) -> usize {
        self.on_channel_ready(ChannelKind::PendingReads, reader)
    }

    /// Drain the page-log channel into `onPageReads` until empty.
    pub fn on_page_reads_ready(&self, reader: &mut ChannelReader) -> usize {
        self.on_channel_ready(ChannelKind::PageReads, reader)
    }

    /// Forward batches until the channel reports no data (or an error, which
    /// ends this cycle). A batch whose hook panics is dropped and draining
    /// continues. Returns the number of batches delivered.
    pub fn on_channel_ready(&self, kind: ChannelKind, reader: &mut ChannelReader) -> usize {
        let Some(fd) = self.control.get(kind) else {
            return 0;
        };

        let mut batches = 0;
        let mut dropped = 0;
        while reader.drain(fd, Duration::ZERO) == WaitResult::HaveData {
            let reads = reader.records();
            let delivered = match kind {
                ChannelKind::PendingReads => {
                    invoke_hook(self.id, "onPendingReads", || self.loader.on_pending_reads(reads))
                }
                ChannelKind::PageReads => {
                    invoke_hook(self.id, "onPageReads", || self.loader.on_page_reads(reads))
                }
            };
            match delivered {
                Some(()) => batches += 1,
                None => dropped += reads.len(),
            }
        }

        if dropped > 0 {
            log::warn!(
                "[dlhost] id({}) {}: {} record(s) dropped after hook failure",
                self.id,
                kind.name(),
                dropped
            );
        }
        if batches > 0 {
            log::debug!(
                "[dlhost] id({}) {}: {} batch(es) delivered",
                self.id,
                kind.name(),
                batches
            );
        }
        batches
    }
}

impl fmt::Debug for DataLoaderConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoaderConnector")
            .field("id", &self.id)
            .field("control", &self.control)
            .field("state", &self.state())
            .finish()
    }
}

/// Proof that the instance's transition lock is held.
pub(crate) struct TransitionGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// Run a loader hook, converting a panic into `None`.
pub(crate) fn invoke_hook<R>(id: StorageId, hook: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(payload) => {
            log::error!(
                "[dlhost] id({}) panic during DataLoader::{}: {}",
                id,
                hook,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic>"
    }
}
