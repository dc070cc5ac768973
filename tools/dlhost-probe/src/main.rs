// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dlhost-probe - End-to-end probe for the data loader host
//!
//! Hosts N loaders over socket-pair channels, feeds synthetic read records
//! through both loops and walks every instance through its lifecycle.

use clap::{Parser, Subcommand};
use dlhost::{
    ChannelPair, DataLoader, DataLoaderHost, DataLoaderParams, DataLoaderStatus, DataLoaderType,
    FilesystemConnector, HostConfig, InstallationFile, ReadInfo, StatusListener, StatusReporter,
    StorageId,
};
use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// dlhost probe tool
#[derive(Parser, Debug)]
#[command(name = "dlhost-probe")]
#[command(version = "0.1.0")]
#[command(about = "Drive a data loader host end to end")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Create, start, feed, stop and destroy a set of loaders
    Run {
        /// Number of loader instances
        #[arg(short = 'n', long, default_value = "4")]
        loaders: usize,

        /// Pending-read records sent to each instance
        #[arg(short, long, default_value = "1000")]
        records: u32,

        /// Page-read records sent to each instance
        #[arg(short, long, default_value = "100")]
        pages: u32,

        /// Host configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds to wait for delivery
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Print the default configuration (or write it to a file)
    GenConfig {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.mode {
        Mode::Run {
            loaders,
            records,
            pages,
            config,
            timeout,
        } => {
            let config = match config {
                Some(path) => HostConfig::from_file(path)?,
                None => HostConfig::default(),
            };
            run_probe(config, *loaders, *records, *pages, Duration::from_secs(*timeout))
        }
        Mode::GenConfig { output } => {
            let toml = HostConfig::default().to_toml()?;
            match output {
                Some(path) => {
                    std::fs::write(path, toml)?;
                    println!("Wrote default configuration to {}", path.display());
                }
                None => print!("{}", toml),
            }
            Ok(())
        }
    }
}

/// Per-instance delivery counters.
#[derive(Default)]
struct Counters {
    pending: AtomicU64,
    pages: AtomicU64,
    batches: AtomicU64,
}

struct ProbeLoader {
    counters: Arc<Counters>,
    status: StatusReporter,
}

impl DataLoader for ProbeLoader {
    fn on_start(&self) -> bool {
        self.status.report(DataLoaderStatus::ConnectionOk);
        true
    }

    fn on_prepare_image(&self, added: &[InstallationFile], _removed: &[String]) -> bool {
        added.iter().all(|file| file.length_bytes > 0)
    }

    fn on_pending_reads(&self, reads: &[ReadInfo]) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .pending
            .fetch_add(reads.len() as u64, Ordering::Relaxed);
    }

    fn on_page_reads(&self, reads: &[ReadInfo]) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .pages
            .fetch_add(reads.len() as u64, Ordering::Relaxed);
    }
}

/// Status counts indexed by code.
#[derive(Default)]
struct StatusTally([AtomicU64; DataLoaderStatus::ALL.len()]);

impl StatusTally {
    fn record(&self, status: DataLoaderStatus) {
        if let Some(slot) = usize::try_from(status.code())
            .ok()
            .and_then(|code| self.0.get(code))
        {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn get(&self, status: DataLoaderStatus) -> u64 {
        usize::try_from(status.code())
            .ok()
            .and_then(|code| self.0.get(code))
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }
}

struct Peers {
    cmd: UnixStream,
    logs: UnixStream,
}

fn run_probe(
    config: HostConfig,
    loaders: usize,
    records: u32,
    pages: u32,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== dlhost probe: {} loader(s) ===\n", loaders);
    let start = Instant::now();

    let counters: Arc<Vec<Arc<Counters>>> =
        Arc::new((0..loaders).map(|_| Arc::default()).collect());
    let factory_counters = Arc::clone(&counters);
    let host = DataLoaderHost::builder(
        move |params: &DataLoaderParams, _fs: FilesystemConnector, status: StatusReporter| {
            let slot = usize::try_from(status.storage_id()).ok()?;
            let counters = Arc::clone(factory_counters.get(slot)?);
            log::debug!("probe factory: {}", params);
            Some(Box::new(ProbeLoader { counters, status }) as Box<dyn DataLoader>)
        },
    )
    .config(config)
    .build()?;

    let tally = Arc::new(StatusTally::default());
    let listener_tally = Arc::clone(&tally);
    let listener: Arc<dyn StatusListener> = Arc::new(move |_id: StorageId, status: DataLoaderStatus| {
        listener_tally.record(status);
    });

    println!("[1/4] Creating and starting loaders...");
    let mut peers = Vec::with_capacity(loaders);
    for slot in 0..loaders {
        let id = StorageId::try_from(slot)?;
        let (cmd, cmd_peer) = UnixStream::pair()?;
        let (logs, logs_peer) = UnixStream::pair()?;
        let channels = ChannelPair::new(Some(OwnedFd::from(cmd)), Some(OwnedFd::from(logs)));
        let params = DataLoaderParams::new(DataLoaderType::Incremental, format!("probe.app{}", slot))
            .with_arguments(format!("slot={}", slot));

        host.create(id, channels, None, Some(Arc::clone(&listener)), params)?;
        host.start(id)?;
        peers.push(Peers {
            cmd: cmd_peer,
            logs: logs_peer,
        });
    }
    println!("      Done in {:?}", start.elapsed());

    println!("[2/4] Feeding {} pending / {} page records each...", records, pages);
    let feed_start = Instant::now();
    for peer in &mut peers {
        for serial in 0..records {
            write_record(&mut peer.cmd, serial)?;
        }
        for serial in 0..pages {
            write_record(&mut peer.logs, serial)?;
        }
    }

    let deadline = Instant::now() + timeout;
    let delivered = loop {
        let done = counters.iter().all(|c| {
            c.pending.load(Ordering::Relaxed) == u64::from(records)
                && c.pages.load(Ordering::Relaxed) == u64::from(pages)
        });
        if done || Instant::now() >= deadline {
            break done;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    let feed_elapsed = feed_start.elapsed();
    println!(
        "      {} in {:?}",
        if delivered { "Delivered" } else { "TIMED OUT" },
        feed_elapsed
    );

    println!("[3/4] Preparing images...");
    let files = [InstallationFile {
        name: "base.apk".into(),
        length_bytes: 4096,
        metadata: Vec::new(),
    }];
    for id in host.ids() {
        host.prepare_image(id, &files, &[])?;
    }

    println!("[4/4] Stopping and destroying...");
    for id in host.ids() {
        host.stop(id)?;
        host.destroy(id)?;
    }
    host.shutdown();

    let total_records = u64::from(records + pages) * loaders as u64;
    println!("\n=== Results ===");
    for (slot, c) in counters.iter().enumerate() {
        println!(
            "  id({}): pending={} pages={} batches={}",
            slot,
            c.pending.load(Ordering::Relaxed),
            c.pages.load(Ordering::Relaxed),
            c.batches.load(Ordering::Relaxed)
        );
    }
    for status in DataLoaderStatus::ALL {
        let count = tally.get(status);
        if count > 0 {
            println!("  {:<16} {}", status.name(), count);
        }
    }
    println!("  Total time: {:?}", start.elapsed());
    println!(
        "  Records/sec: {:.0}",
        total_records as f64 / feed_elapsed.as_secs_f64()
    );

    if delivered {
        Ok(())
    } else {
        Err("not every record was delivered before the timeout".into())
    }
}

fn write_record(peer: &mut UnixStream, serial: u32) -> std::io::Result<()> {
    let info = ReadInfo {
        serial,
        block: serial,
        ..Default::default()
    };
    peer.write_all(&info.encode())
}
