//! Albor Space 5G Cell Scheduler Application
//!
//! Runs the MAC common-channel scheduler of one cell in real time, fed by a
//! synthetic PHY and upper layer.

mod config;
mod traffic;

use anyhow::{Context, Result};
use clap::Parser;
use common::utils::time;
use common::SlotPoint;
use layers::mac::CellScheduler;
use std::fs::File;
use std::io::{BufWriter, Write};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::GnbConfig;
use traffic::TrafficGenerator;

/// Albor Space 5G cell scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file; built-in defaults when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many slots
    #[arg(short, long)]
    nof_slots: Option<u64>,

    /// Write every non-empty slot result as one JSON line to this file
    #[arg(long)]
    dump_results: Option<String>,

    /// Run slots back to back instead of at the slot rate
    #[arg(long, default_value_t = false)]
    no_realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GnbConfig::from_yaml_file(path).with_context(|| format!("loading {}", path))?,
        None => GnbConfig::default(),
    };

    // Initialize logging
    let directives = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.filter_directives());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space 5G cell scheduler");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }

    let scs = config.cell.scs;
    let mut sched = CellScheduler::new(config.cell.clone())?;
    let mut traffic = TrafficGenerator::new(config.traffic.clone(), sched.handle());
    let mut dump = match &args.dump_results {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path))?,
        )),
        None => None,
    };

    let slot_duration = Duration::from_micros(time::slot_duration_us(scs) as u64);
    let mut ticker = interval(if args.no_realtime { Duration::from_micros(1) } else { slot_duration });
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    info!("Slot duration {} us, numerology {}", slot_duration.as_micros(), scs.numerology());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut slot = SlotPoint::new(scs.numerology(), 0, 0);
    let mut nof_slots: u64 = 0;
    let stats_period = config.log.stats_period_slots;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {}
        }

        traffic.before_slot(slot);
        let result = sched.run_slot(slot);
        traffic.after_slot(result);
        if let Some(out) = dump.as_mut() {
            if !result.is_empty() {
                serde_json::to_writer(&mut *out, result)?;
                out.write_all(b"\n")?;
            }
        }
        let receptions = sched.take_msg3_receptions();
        traffic.handle_msg3(receptions);

        nof_slots += 1;
        slot = slot + 1;
        if stats_period > 0 && nof_slots % stats_period == 0 {
            report(&sched, &traffic)?;
        }
        if args.nof_slots.map_or(false, |n| nof_slots >= n) {
            info!("Ran {} slots", nof_slots);
            break;
        }
    }

    if let Some(mut out) = dump {
        if let Err(e) = out.flush() {
            warn!("Error flushing slot results: {}", e);
        }
    }
    report(&sched, &traffic)?;
    info!("Cell scheduler shutdown complete");
    Ok(())
}

fn report(sched: &CellScheduler, traffic: &TrafficGenerator) -> Result<()> {
    let stats = sched.stats();
    let t = traffic.stats();
    info!("Scheduler statistics after {} slots:", stats.nof_slots);
    info!(
        "  RA: {} preambles, {} RARs, {} Msg3 ok, {} Msg3 failed, {} windows expired",
        stats.ra.nof_preambles, stats.ra.nof_rars, stats.ra.nof_msg3_ok, stats.ra.nof_msg3_failed,
        stats.ra.nof_rar_windows_expired
    );
    info!(
        "  Fallback: {} UEs added, {} ConRes resolved, {} expired, {} DL newtx, {} DL retx",
        stats.fallback.nof_ues_added,
        stats.fallback.nof_conres_resolved,
        stats.fallback.nof_conres_expired,
        stats.fallback.nof_dl_newtx,
        stats.fallback.nof_dl_retx
    );
    info!(
        "  Paging: {} records, {} expired; SIB1: {} tx, {} misses",
        stats.paging.nof_records, stats.paging.nof_expired, stats.sib1.nof_tx, stats.sib1.nof_misses
    );
    info!(
        "  Traffic: {} PRACH, {} UEs created, {} exited, {} paging requests, {} indications dropped",
        t.nof_prach, t.nof_ues_created, t.nof_ues_exited, t.nof_paging_requests, t.nof_dropped
    );
    info!("  Full: {}", serde_json::to_string(&stats)?);
    Ok(())
}
