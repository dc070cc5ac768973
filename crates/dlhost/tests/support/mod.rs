// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: recording listener, scripted loader, channel helpers.

#![allow(dead_code)]

use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dlhost::{
    ChannelPair, DataLoader, DataLoaderHost, DataLoaderParams, DataLoaderStatus, DataLoaderType,
    FilesystemConnector, HostConfig, InstallationFile, ReadInfo, StatusListener, StatusReporter, StorageId,
};
use parking_lot::Mutex;

/// Listener recording every `(id, status)` it receives.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(StorageId, DataLoaderStatus)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(StorageId, DataLoaderStatus)> {
        self.events.lock().clone()
    }

    pub fn statuses(&self) -> Vec<DataLoaderStatus> {
        self.events.lock().iter().map(|(_, status)| *status).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn last(&self) -> Option<DataLoaderStatus> {
        self.events.lock().last().map(|(_, status)| *status)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StatusListener for Recorder {
    fn on_status_changed(&self, id: StorageId, status: DataLoaderStatus) {
        self.events.lock().push((id, status));
    }
}

/// Per-hook call counters plus switches to make hooks fail or panic.
#[derive(Default)]
pub struct Script {
    pub creates: AtomicUsize,
    /// Milliseconds the factory sleeps before building a loader.
    pub create_delay_ms: AtomicU64,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub destroys: AtomicUsize,
    pub prepares: AtomicUsize,
    pub fail_start: AtomicBool,
    pub panic_start: AtomicBool,
    pub fail_prepare: AtomicBool,
    pub panic_prepare: AtomicBool,
    pub panic_stop: AtomicBool,
    pub panic_destroy: AtomicBool,
    /// Panic in the next read hook (either channel), then behave.
    pub panic_next_batch: AtomicBool,
    pub pending: Mutex<Vec<ReadInfo>>,
    pub pages: Mutex<Vec<ReadInfo>>,
    pub batches: AtomicUsize,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn pending_serials(&self) -> Vec<u32> {
        self.pending.lock().iter().map(|read| read.serial).collect()
    }

    pub fn page_serials(&self) -> Vec<u32> {
        self.pages.lock().iter().map(|read| read.serial).collect()
    }
}

/// Loader whose behavior is driven by a shared [`Script`].
pub struct ScriptedLoader {
    script: Arc<Script>,
}

impl DataLoader for ScriptedLoader {
    fn on_start(&self) -> bool {
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_start.load(Ordering::SeqCst) {
            panic!("scripted start panic");
        }
        !self.script.fail_start.load(Ordering::SeqCst)
    }

    fn on_stop(&self) {
        self.script.stops.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_stop.load(Ordering::SeqCst) {
            panic!("scripted stop panic");
        }
    }

    fn on_destroy(&self) {
        self.script.destroys.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_destroy.load(Ordering::SeqCst) {
            panic!("scripted destroy panic");
        }
    }

    fn on_prepare_image(&self, _added: &[InstallationFile], _removed: &[String]) -> bool {
        self.script.prepares.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_prepare.load(Ordering::SeqCst) {
            panic!("scripted prepare panic");
        }
        !self.script.fail_prepare.load(Ordering::SeqCst)
    }

    fn on_pending_reads(&self, reads: &[ReadInfo]) {
        if self.script.panic_next_batch.swap(false, Ordering::SeqCst) {
            panic!("scripted pending reads panic");
        }
        self.script.batches.fetch_add(1, Ordering::SeqCst);
        self.script.pending.lock().extend_from_slice(reads);
    }

    fn on_page_reads(&self, reads: &[ReadInfo]) {
        if self.script.panic_next_batch.swap(false, Ordering::SeqCst) {
            panic!("scripted page reads panic");
        }
        self.script.batches.fetch_add(1, Ordering::SeqCst);
        self.script.pages.lock().extend_from_slice(reads);
    }
}

/// Host whose factory hands every instance the same script. Params with
/// `DataLoaderType::None` are rejected.
pub fn scripted_host(script: &Arc<Script>) -> DataLoaderHost {
    scripted_host_with(script, HostConfig::default())
}

pub fn scripted_host_with(script: &Arc<Script>, config: HostConfig) -> DataLoaderHost {
    let script = Arc::clone(script);
    DataLoaderHost::builder(
        move |params: &DataLoaderParams, _fs: FilesystemConnector, _status: StatusReporter| {
            if params.kind == DataLoaderType::None {
                return None;
            }
            let delay = script.create_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            script.creates.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(ScriptedLoader {
                script: Arc::clone(&script),
            }) as Box<dyn DataLoader>)
        },
    )
    .config(config)
    .build()
    .expect("host")
}

pub fn params() -> DataLoaderParams {
    DataLoaderParams::new(DataLoaderType::Incremental, "com.example.app")
}

pub fn listener(recorder: &Arc<Recorder>) -> Option<Arc<dyn StatusListener>> {
    Some(Arc::clone(recorder) as Arc<dyn StatusListener>)
}

/// Channel pair backed by socket pairs; returns the peer ends to write to.
pub fn socket_channels() -> (ChannelPair, UnixStream, UnixStream) {
    let (cmd, cmd_peer) = UnixStream::pair().expect("cmd pair");
    let (logs, logs_peer) = UnixStream::pair().expect("log pair");
    let pair = ChannelPair::new(Some(OwnedFd::from(cmd)), Some(OwnedFd::from(logs)));
    (pair, cmd_peer, logs_peer)
}

pub fn send_reads(peer: &mut UnixStream, serials: impl IntoIterator<Item = u32>) {
    for serial in serials {
        let info = ReadInfo {
            serial,
            block: serial * 2,
            ..Default::default()
        };
        peer.write_all(&info.encode()).expect("write record");
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
