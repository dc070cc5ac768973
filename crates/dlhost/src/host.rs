// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data loader host: registry, dual event loops and lifecycle operations.
//!
//! # Architecture
//!
//! ```text
//!  create/start/stop/destroy/prepare_image   (any thread)
//!                    |
//!                    v
//!  +-----------------------------------+
//!  | LoaderRegistry  id -> Connector   |   lock: lookup/insert/remove only
//!  +-----------------------------------+
//!            | start registers        | stop removes
//!            v                        v
//!  +------------------+      +------------------+
//!  | cmd EventLoop    |      | log EventLoop    |   one thread each,
//!  | (pending reads)  |      | (page reads)     |   spawned on first use
//!  +------------------+      +------------------+
//!            |                        |
//!            v                        v
//!     on_pending_reads           on_page_reads
//! ```
//!
//! # Status reports
//!
//! Every public lifecycle call on a known id emits exactly one status to the
//! instance's listener, on success and on every failure path:
//!
//! | Operation       | Success        | Failure           |
//! |-----------------|----------------|-------------------|
//! | `create`        | `CREATED`      | `DESTROYED`       |
//! | `start`         | `STARTED`      | `STOPPED`         |
//! | `stop`          | `STOPPED`      | `STOPPED`         |
//! | `destroy`       | `DESTROYED`    | `DESTROYED`       |
//! | `prepare_image` | `IMAGE_READY`  | `IMAGE_NOT_READY` |
//!
//! Unknown ids are reported to nobody: there is no listener to reach. After
//! [`DataLoaderHost::shutdown`] every call fails with `ShutDown` and reports
//! nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Interest;
use parking_lot::Mutex;

use crate::channel::{fd_path, ChannelKind, ChannelPair, ChannelReader, ABSENT_FD};
use crate::config::HostConfig;
use crate::connector::{invoke_hook, DataLoaderConnector, LifecycleState, TransitionGuard};
use crate::error::{HostError, Result};
use crate::filesystem::{FilesystemCallback, FilesystemConnector, IncFs, NoIncFs};
use crate::loader::{DataLoaderFactory, DataLoaderParams, InstallationFile};
use crate::looper::{EventLoop, FdHandler, Readiness};
use crate::registry::LoaderRegistry;
use crate::status::{DataLoaderStatus, ReportGuard, StatusListener, StatusReporter};
use crate::StorageId;

/// Builder for [`DataLoaderHost`].
pub struct HostBuilder {
    factory: Arc<dyn DataLoaderFactory>,
    config: HostConfig,
    incfs: Arc<dyn IncFs>,
}

impl HostBuilder {
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn incfs(mut self, incfs: Arc<dyn IncFs>) -> Self {
        self.incfs = incfs;
        self
    }

    pub fn build(self) -> Result<DataLoaderHost> {
        self.config.validate()?;

        let stopped = Arc::new(AtomicBool::new(false));
        let cmd_looper = Arc::new(EventLoop::new(
            self.config.cmd_thread_name.clone(),
            self.config.max_events,
            Arc::clone(&stopped),
        )?);
        let log_looper = Arc::new(EventLoop::new(
            self.config.log_thread_name.clone(),
            self.config.max_events,
            Arc::clone(&stopped),
        )?);

        Ok(DataLoaderHost {
            pending_reads: Arc::new(Mutex::new(ChannelReader::new(self.config.pending_reads_batch))),
            page_reads: Arc::new(Mutex::new(ChannelReader::new(self.config.page_reads_batch))),
            config: self.config,
            factory: self.factory,
            incfs: self.incfs,
            registry: LoaderRegistry::new(),
            cmd_looper,
            log_looper,
            stopped,
        })
    }
}

/// Hosts loader instances keyed by storage id.
///
/// Share it across threads behind an `Arc`; every operation takes `&self`.
pub struct DataLoaderHost {
    config: HostConfig,
    factory: Arc<dyn DataLoaderFactory>,
    incfs: Arc<dyn IncFs>,
    registry: LoaderRegistry<DataLoaderConnector>,
    cmd_looper: Arc<EventLoop>,
    log_looper: Arc<EventLoop>,
    stopped: Arc<AtomicBool>,
    pending_reads: Arc<Mutex<ChannelReader>>,
    page_reads: Arc<Mutex<ChannelReader>>,
}

impl DataLoaderHost {
    pub fn builder(factory: impl DataLoaderFactory + 'static) -> HostBuilder {
        HostBuilder {
            factory: Arc::new(factory),
            config: HostConfig::default(),
            incfs: Arc::new(NoIncFs),
        }
    }

    /// Host with default configuration and no filesystem backend.
    pub fn new(factory: impl DataLoaderFactory + 'static) -> Result<Self> {
        Self::builder(factory).build()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Build an instance and register it under `id`.
    ///
    /// Fails without leaving a trace if the id is taken, or if the factory
    /// rejects the parameters.
    pub fn create(
        &self,
        id: StorageId,
        control: ChannelPair,
        callback: Option<Arc<dyn FilesystemCallback>>,
        listener: Option<Arc<dyn StatusListener>>,
        params: DataLoaderParams,
    ) -> Result<()> {
        self.ensure_accepting(id, "create")?;
        let reporter = StatusReporter::new(id, listener);
        let guard = ReportGuard::armed(reporter.clone(), DataLoaderStatus::Destroyed);

        let cmd = control.raw(ChannelKind::PendingReads).unwrap_or(ABSENT_FD);
        let logs = control.raw(ChannelKind::PageReads).unwrap_or(ABSENT_FD);
        log::info!("[dlhost] create id({}) cmd: {}/{}", id, cmd, fd_path(cmd));
        log::info!("[dlhost] create id({}) log: {}/{}", id, logs, fd_path(logs));
        log::info!("[dlhost] create id({}) params: {}", id, params);

        let Some(reservation) = self.registry.reserve(id) else {
            log::error!("[dlhost] Failed to insert id({}): already exists", id);
            return Err(HostError::DuplicateId(id));
        };

        let control = Arc::new(control);
        let filesystem = FilesystemConnector::new(
            id,
            Arc::clone(&control),
            callback,
            Arc::clone(&self.incfs),
        );
        let loader = invoke_hook(id, "onCreate", || {
            self.factory.create(&params, filesystem, reporter.clone())
        })
        .flatten()
        .ok_or_else(|| {
            log::error!("[dlhost] Failed to create id({}): factory rejected params", id);
            HostError::hook(id, "onCreate")
        })?;

        let connector = Arc::new(DataLoaderConnector::new(id, control, reporter, loader));
        if !reservation.commit(Arc::clone(&connector)) {
            log::error!("[dlhost] Failed to insert id({}): already exists", id);
            connector.on_destroy();
            return Err(HostError::DuplicateId(id));
        }

        guard.finish(DataLoaderStatus::Created);
        Ok(())
    }

    /// Invoke the start hook, then register the instance's channels with
    /// their loops (spawning the loop threads on first use).
    pub fn start(&self, id: StorageId) -> Result<()> {
        self.ensure_accepting(id, "start")?;
        let mut guard = ReportGuard::new(DataLoaderStatus::Stopped);
        let connector = self.lookup(id, "start")?;
        guard.arm(connector.reporter().clone());

        let held = connector.lock_transitions();
        match connector.state() {
            LifecycleState::Destroyed => {
                guard.disarm();
                return Err(self.not_found(id, "start"));
            }
            LifecycleState::Started => {
                log::debug!("[dlhost] id({}) already started", id);
                guard.finish(DataLoaderStatus::Started);
                return Ok(());
            }
            LifecycleState::Created | LifecycleState::Stopped => {}
        }

        if !connector.on_start() {
            log::error!("[dlhost] Failed to start id({}): onStart returned false", id);
            return Err(HostError::hook(id, "onStart"));
        }

        if let Err(err) = self.register_channels(&connector) {
            log::error!("[dlhost] Failed to start id({}): {}", id, err);
            self.unregister_channels(&connector);
            connector.on_stop();
            return Err(err);
        }

        connector.set_state(&held, LifecycleState::Started);
        drop(held);

        log::info!("[dlhost] id({}) started", id);
        guard.finish(DataLoaderStatus::Started);
        Ok(())
    }

    /// Unregister the instance's channels, then invoke its stop hook.
    ///
    /// Idempotent: stopping a stopped (or never started) instance only
    /// reports `STOPPED` again.
    pub fn stop(&self, id: StorageId) -> Result<()> {
        self.ensure_accepting(id, "stop")?;
        let mut guard = ReportGuard::new(DataLoaderStatus::Stopped);
        let connector = self.lookup(id, "stop")?;
        guard.arm(connector.reporter().clone());

        let held = connector.lock_transitions();
        if connector.state() == LifecycleState::Destroyed {
            guard.disarm();
            return Err(self.not_found(id, "stop"));
        }
        self.stop_locked(&connector, &held);
        drop(held);

        guard.finish(DataLoaderStatus::Stopped);
        Ok(())
    }

    /// Stop if needed, invoke the destroy hook and unregister the id.
    ///
    /// Channels close once the last reference to the instance is gone, which
    /// is after both loops dropped their registrations.
    pub fn destroy(&self, id: StorageId) -> Result<()> {
        self.ensure_accepting(id, "destroy")?;
        self.destroy_instance(id)
    }

    fn destroy_instance(&self, id: StorageId) -> Result<()> {
        let mut guard = ReportGuard::new(DataLoaderStatus::Destroyed);
        let connector = self.lookup(id, "destroy")?;
        guard.arm(connector.reporter().clone());

        let held = connector.lock_transitions();
        if connector.state() == LifecycleState::Destroyed {
            guard.disarm();
            return Err(self.not_found(id, "destroy"));
        }

        self.stop_locked(&connector, &held);
        connector.on_destroy();
        connector.set_state(&held, LifecycleState::Destroyed);
        self.registry.remove_if_same(id, &connector);
        drop(held);

        log::info!("[dlhost] id({}) destroyed", id);
        guard.finish(DataLoaderStatus::Destroyed);
        Ok(())
    }

    /// Run the prepare hook; reports `IMAGE_READY` or `IMAGE_NOT_READY`.
    /// Does not change the lifecycle state.
    pub fn prepare_image(
        &self,
        id: StorageId,
        added: &[InstallationFile],
        removed: &[String],
    ) -> Result<()> {
        self.ensure_accepting(id, "prepareImage")?;
        let mut guard = ReportGuard::new(DataLoaderStatus::ImageNotReady);
        let connector = self.lookup(id, "prepareImage")?;
        guard.arm(connector.reporter().clone());

        let held = connector.lock_transitions();
        if connector.state() == LifecycleState::Destroyed {
            guard.disarm();
            return Err(self.not_found(id, "prepareImage"));
        }
        let ready = connector.on_prepare_image(added, removed);
        drop(held);

        if !ready {
            log::warn!("[dlhost] id({}) image not ready", id);
            return Err(HostError::hook(id, "onPrepareImage"));
        }
        guard.finish(DataLoaderStatus::ImageReady);
        Ok(())
    }

    /// Stop both loops and destroy every remaining instance.
    ///
    /// Dispatches already running finish; no new ones start. Afterwards every
    /// lifecycle call fails with [`HostError::ShutDown`]. Also run on drop.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[dlhost] shutting down ({} instance(s))", self.registry.len());

        for looper in [&self.cmd_looper, &self.log_looper] {
            looper.wake();
            looper.join();
        }
        for id in self.registry.ids() {
            if let Err(err) = self.destroy_instance(id) {
                log::debug!("[dlhost] shutdown: destroy id({}) skipped: {}", id, err);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn contains(&self, id: StorageId) -> bool {
        self.registry.contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn ids(&self) -> Vec<StorageId> {
        self.registry.ids()
    }

    pub fn state(&self, id: StorageId) -> Option<LifecycleState> {
        self.registry.find(id).map(|connector| connector.state())
    }

    /// Loop serving pending-read channels.
    pub fn cmd_looper(&self) -> &EventLoop {
        &self.cmd_looper
    }

    /// Loop serving page-log channels.
    pub fn log_looper(&self) -> &EventLoop {
        &self.log_looper
    }

    fn ensure_accepting(&self, id: StorageId, op: &str) -> Result<()> {
        if self.is_shut_down() {
            log::error!("[dlhost] Failed to {} id({}): host is shut down", op, id);
            return Err(HostError::ShutDown);
        }
        Ok(())
    }

    fn lookup(&self, id: StorageId, op: &str) -> Result<Arc<DataLoaderConnector>> {
        self.registry
            .find(id)
            .ok_or_else(|| self.not_found(id, op))
    }

    fn not_found(&self, id: StorageId, op: &str) -> HostError {
        log::error!("[dlhost] Failed to {} id({}): not found", op, id);
        HostError::NotFound(id)
    }

    fn looper(&self, kind: ChannelKind) -> (&Arc<EventLoop>, &Arc<Mutex<ChannelReader>>) {
        match kind {
            ChannelKind::PendingReads => (&self.cmd_looper, &self.pending_reads),
            ChannelKind::PageReads => (&self.log_looper, &self.page_reads),
        }
    }

    fn register_channels(&self, connector: &Arc<DataLoaderConnector>) -> Result<()> {
        for kind in [ChannelKind::PendingReads, ChannelKind::PageReads] {
            let Some(fd) = connector.control().raw(kind) else {
                continue;
            };
            let (looper, reader) = self.looper(kind);
            if let Err(err) = looper.ensure_started(self.config.poll_timeout()) {
                return Err(if self.is_shut_down() {
                    HostError::ShutDown
                } else {
                    HostError::Io(err)
                });
            }

            let dispatch = Arc::new(ChannelDispatch {
                connector: Arc::clone(connector),
                kind,
                reader: Arc::clone(reader),
                stopped: Arc::clone(&self.stopped),
            });
            looper
                .add_fd(fd, Interest::READABLE, dispatch)
                .map_err(|source| HostError::ChannelFault { fd, source })?;
        }
        Ok(())
    }

    fn unregister_channels(&self, connector: &DataLoaderConnector) {
        for kind in [ChannelKind::PendingReads, ChannelKind::PageReads] {
            if let Some(fd) = connector.control().raw(kind) {
                self.looper(kind).0.remove_fd(fd);
            }
        }
    }

    fn stop_locked(&self, connector: &DataLoaderConnector, held: &TransitionGuard<'_>) {
        self.unregister_channels(connector);
        if connector.state() == LifecycleState::Started {
            connector.on_stop();
            connector.set_state(held, LifecycleState::Stopped);
            log::info!("[dlhost] id({}) stopped", connector.storage_id());
        }
    }
}

impl Drop for DataLoaderHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registration context: forwards readiness of one channel to its instance.
struct ChannelDispatch {
    connector: Arc<DataLoaderConnector>,
    kind: ChannelKind,
    reader: Arc<Mutex<ChannelReader>>,
    stopped: Arc<AtomicBool>,
}

impl FdHandler for ChannelDispatch {
    fn on_ready(&self, _fd: std::os::fd::RawFd, _readiness: Readiness) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            // No more listeners.
            return false;
        }
        let mut reader = self.reader.lock();
        self.connector.on_channel_ready(self.kind, &mut reader);
        true
    }
}
