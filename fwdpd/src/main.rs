use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context as _};
use clap::Parser;
use fwdp_common::FaceId;
use fwdp_core::{wrap_rx_cb, Pcct, PktmbufPool, RxLooper};
use log::{info, warn};
use parking_lot::Mutex;
use tokio::signal;
use tokio::time::{self, Duration, Instant};

mod config;
mod face;
mod forwarder;
mod ndn;
mod stats;
mod traffic;

use config::Config;
use face::FaceTable;
use forwarder::{Clock, FwdWorker, HashNameResolver, WorkerConfig};
use stats::{display_statistics, Snapshot, StatsManager};
use traffic::{TrafficConfig, TrafficGen};

const CONSUMER_A: FaceId = FaceId(1);
const CONSUMER_B: FaceId = FaceId(2);
const PRODUCER: FaceId = FaceId(3);

/// How often synthetic traffic is generated
const TRAFFIC_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Parser)]
#[clap(name = "fwdpd", about = "FWDP forwarding daemon over in-memory faces")]
struct Opt {
    #[clap(short, long, default_value = "/etc/fwdp/fwdpd.toml")]
    config: PathBuf,
    #[clap(short, long, default_value = "5")]
    stats_interval: u64,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[clap(short, long)]
    duration: Option<u64>,
    /// Interests generated per second
    #[clap(short, long, default_value = "10000")]
    rate: usize,
    /// Write the effective configuration to FILE and exit
    #[clap(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let config = Config::load(&opt.config)
        .with_context(|| format!("failed to load configuration from {}", opt.config.display()))?;
    init_logging(&config.logging.level);

    if let Some(path) = &opt.write_config {
        config
            .save(path)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    info!("Starting FWDP daemon");
    info!("Config file: {}", opt.config.display());
    fwdp_core::init();

    let mp = &config.mempool;
    let cs_pool = PktmbufPool::new("cs-indirect", mp.indirect_capacity, mp.dataroom)
        .context("failed to create indirect CS pool")?;
    let rx_pool =
        PktmbufPool::new("rx", mp.rx_capacity, mp.dataroom).context("failed to create RX pool")?;
    let pcct = Pcct::new(config.pcct_config(), cs_pool).context("failed to create PCCT")?;
    info!("{}", pcct);

    let faces = Arc::new(FaceTable::new([CONSUMER_A, CONSUMER_B, PRODUCER]));
    let worker = Arc::new(Mutex::new(FwdWorker::new(
        pcct,
        HashNameResolver,
        Arc::clone(&faces),
        rx_pool.clone(),
        Clock::new(),
        WorkerConfig {
            upstream: PRODUCER,
            pit_lifetime_ms: config.worker.pit_lifetime_ms,
            expire_interval_ms: config.worker.expire_interval_ms,
        },
    )));

    let handler = Arc::clone(&worker);
    let (cb, cbarg) = wrap_rx_cb(move |face, burst| handler.lock().on_burst(face, burst));
    let looper = Arc::clone(&faces);
    let burst_size = config.worker.burst_size;
    let rx_thread = thread::Builder::new()
        .name("fwdp-rx".to_string())
        .spawn(move || looper.rx_loop(burst_size, cb, cbarg))
        .context("failed to spawn RX thread")?;

    let mut traffic = TrafficGen::new(
        TrafficConfig {
            consumers: vec![CONSUMER_A, CONSUMER_B],
            producer: PRODUCER,
            n_names: config.worker.n_names,
            lifetime_ms: config.worker.pit_lifetime_ms,
            freshness_ms: 1_000,
        },
        rx_pool,
        fastrand::u64(..),
    );
    let per_tick = (opt.rate / (1_000 / TRAFFIC_TICK.as_millis() as usize)).max(1);

    println!("FWDP daemon is running. Press Ctrl-C to stop.");
    println!("Statistics will be displayed every {} seconds.\n", opt.stats_interval);

    let snapshot = |traffic: &TrafficGen| {
        let w = worker.lock();
        Snapshot {
            fwd: w.stats(),
            pcct: w.pcct_stats(),
            traffic: traffic.stats(),
        }
    };

    let mut stats_manager = StatsManager::new();
    let mut stats_tick = time::interval(Duration::from_secs(opt.stats_interval.max(1)));
    let mut traffic_tick = time::interval(TRAFFIC_TICK);
    let mut ctrl_c = Box::pin(signal::ctrl_c());
    let stop_at = opt.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut stop = Box::pin(async move {
        match stop_at {
            Some(at) => time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    });

    loop {
        tokio::select! {
            _ = traffic_tick.tick() => {
                traffic.send_interests(&faces, per_tick);
                traffic.serve(&faces, usize::MAX);
                traffic.collect(&faces, usize::MAX);
            }
            _ = stats_tick.tick() => {
                let snap = snapshot(&traffic);
                display_statistics(&snap);
                println!("Rates: {}", stats_manager.update(snap).format());
            }
            res = &mut ctrl_c => {
                res.context("failed to listen for Ctrl-C")?;
                println!("Received Ctrl-C, shutting down...");
                break;
            }
            _ = &mut stop => {
                info!("Run duration elapsed, shutting down");
                break;
            }
        }
    }

    faces.stop_rx_loop();
    rx_thread
        .join()
        .map_err(|_| anyhow!("RX thread panicked"))?;

    for id in faces.list_faces() {
        if let Some(face) = faces.face(id) {
            info!("{}: rx={} tx={}", face.id(), face.count_rx(), face.count_tx());
        }
    }
    let pending = worker.lock().pcct().count_pending();
    if pending > 0 {
        warn!("{} Interests still pending at shutdown", pending);
    }
    info!("{}", worker.lock().pcct());

    let snap = snapshot(&traffic);
    println!("\nFinal Statistics:");
    display_statistics(&snap);
    println!("\nStatistics JSON:");
    println!("{}", StatsManager::to_json(&snap));

    Ok(())
}
