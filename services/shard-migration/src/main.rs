// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Shard Migration Worker
//!
//! Runs copy jobs against an in-memory shard topology:
//!
//! - Loads the topology (shards, busy-states and table rows) from a file
//! - Queues the copy job payloads listed in the jobs file
//! - Executes jobs, and the successors they queue, on a worker pool
//! - Reports failed jobs and final shard busy-states on exit

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use shard_migration::config::WorkerConfig;
use shard_migration::jobs::copy::CopyJobParser;
use shard_migration::memory::{MemoryNameServer, MemoryShard, TableCursor, Topology};
use shard_migration::metrics;
use shard_migration::nameserver::NameServer;
use shard_migration::scheduler::{JobQueue, JobScheduler};
use shard_migration_types::{JobPayload, payload::COUNT};

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

fn print_usage(program: &str) {
    print_version();
    println!("Usage: {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  --drain          Exit once every queued job and successor has run");
    println!("  -h, --help       Display this information");
    println!("  -V, --version    Display the program's version number");
    println!();
    println!("Environment variables:");
    println!("  TOPOLOGY_FILE    JSON file describing shards and their rows (required)");
    println!("  JOBS_FILE        Copy job payloads, one JSON document per line");
    println!("  WORKER_THREADS   Jobs executed concurrently (default: 4)");
    println!("  MIN_COPY         Smallest batch a shard timeout may shrink to (default: 500)");
    println!("  COPY_COUNT       Batch size for payloads without a count (default: 1000)");
    println!("  METRICS_ENABLED  Print Prometheus metrics on exit (default: false)");
    println!("  CONFIG_FILE      JSON file overriding the copy tuning fields (optional)");
    println!("  RUST_LOG         Log filter (default: shard_migration=info)");
}

/// Parse one line of the jobs file, filling in the batch size when the
/// payload leaves it out.
fn parse_job_line(line: &str, default_count: usize) -> Result<JobPayload> {
    let mut value: Value = serde_json::from_str(line).context("Malformed JSON")?;

    if let Some(Value::Object(copy)) = value.get_mut("Copy") {
        copy.entry(COUNT)
            .or_insert_with(|| Value::from(default_count as u64));
    }

    Ok(JobPayload::from_json(value)?)
}

async fn queue_jobs(
    path: &Path,
    config: &WorkerConfig,
    parser: &CopyJobParser<MemoryShard, TableCursor>,
    queue: &JobQueue,
) -> Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read jobs file: {}", path.display()))?;

    let mut queued = 0;
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let payload = parse_job_line(line, config.copy_count)
            .with_context(|| format!("Invalid job on line {} of {}", n + 1, path.display()))?;
        let job = parser
            .parse(payload)
            .with_context(|| format!("Invalid job on line {} of {}", n + 1, path.display()))?;

        info!(
            source = %job.source_shard_id(),
            destination = %job.destination_shard_id(),
            count = job.count(),
            "Queueing copy job"
        );
        queue.put(Box::new(job)).await?;
        queued += 1;
    }

    Ok(queued)
}

async fn report(queue: &JobQueue, name_server: &MemoryNameServer<MemoryShard>) -> Result<usize> {
    println!("Shards:");
    for info in name_server.list_shards().await {
        let rows = match name_server.find_shard_by_id(&info.id).await {
            Ok(node) => node.len().await,
            Err(_) => 0,
        };
        println!(
            "  {:<48} {:<10} {} rows",
            info.id.to_string(),
            info.busy.to_string(),
            rows
        );
    }

    let failures = queue.failed_jobs().await;
    if !failures.is_empty() {
        println!();
        println!("Failed jobs:");
        for failed in &failures {
            println!("  {}", serde_json::to_string(failed)?);
        }
    }

    Ok(failures.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("shard-migrationd");
    let mut drain = false;
    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_usage(program);
                return Ok(());
            }
            "--drain" => drain = true,
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "shard_migration=info".to_string()),
        ))
        .init();

    print_version();

    let config = WorkerConfig::from_env()
        .await
        .context("Failed to load configuration")?;
    info!(
        worker_threads = config.worker_threads,
        min_copy = config.min_copy,
        copy_count = config.copy_count,
        "Configuration loaded"
    );

    if config.metrics_enabled {
        metrics::register_metrics();
    }

    let topology_file = config
        .topology_file
        .as_deref()
        .ok_or_else(|| anyhow!("TOPOLOGY_FILE environment variable required"))?;
    let topology = Topology::from_file(topology_file).await?;
    info!(shards = topology.shards.len(), "Topology loaded");

    let name_server = Arc::new(topology.into_name_server().await);
    let queue = JobQueue::new(config.worker_threads);

    let ns: Arc<dyn NameServer<MemoryShard>> = name_server.clone();
    let scheduler: Arc<dyn JobScheduler> = queue.clone();
    let parser = CopyJobParser::new(ns, scheduler).with_min_copy(config.min_copy);

    match config.jobs_file.as_deref() {
        Some(path) => {
            let queued = queue_jobs(path, &config, &parser, &queue).await?;
            info!(queued, "Jobs queued");
        }
        None => warn!("JOBS_FILE not set, no jobs queued"),
    }

    let executed = if drain {
        queue.drain().await
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for interrupt"),
            }
            let _ = shutdown_tx.send(true);
        });
        queue.run(shutdown_rx).await
    };
    info!(executed, pending = queue.pending(), "Worker finished");

    let failed = report(&queue, &name_server).await?;

    if config.metrics_enabled {
        println!();
        print!("{}", metrics::gather_metrics());
    }

    if failed > 0 {
        bail!("{} job(s) failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_parse_job_line_fills_count() {
        let line = r#"{"Copy": {"source_shard_hostname": "a", "source_shard_table_prefix": "t",
            "destination_shard_hostname": "b", "destination_shard_table_prefix": "t"}}"#;

        let JobPayload::Copy(copy) = parse_job_line(line, 250).unwrap();
        assert_eq!(copy.count, 250);
        assert!(copy.cursor.is_empty());
    }

    #[test]
    fn test_parse_job_line_keeps_count() {
        let line = r#"{"Copy": {"source_shard_hostname": "a", "source_shard_table_prefix": "t",
            "destination_shard_hostname": "b", "destination_shard_table_prefix": "t",
            "count": 10, "cursor": 5}}"#;

        let JobPayload::Copy(copy) = parse_job_line(line, 250).unwrap();
        assert_eq!(copy.count, 10);
        assert_eq!(copy.cursor["cursor"], 5);
    }

    #[test]
    fn test_parse_job_line_rejects_garbage() {
        assert!(parse_job_line("{", 1).is_err());
        assert!(parse_job_line(r#"{"Copy": {}}"#, 1).is_err());
    }
}
