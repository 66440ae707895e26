// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shard migration administration CLI
//!
//! Builds copy job payloads for the worker's jobs file and decodes payloads
//! taken from the job queue's failure list.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use shard_migration_types::{CopyJobPayload, JobPayload, ShardId};

#[derive(Parser)]
#[command(name = "shard-migration-adm")]
#[command(about = "Shard migration job utility", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the structured-text payload of a copy job
    Encode {
        /// Shard to copy from, as HOSTNAME/TABLE_PREFIX
        #[arg(short, long)]
        source: ShardId,

        /// Shard to copy to, as HOSTNAME/TABLE_PREFIX
        #[arg(short, long)]
        destination: ShardId,

        /// Rows copied per increment
        #[arg(short, long, default_value_t = 1000)]
        count: usize,

        /// Cursor state as a JSON object (e.g., '{"cursor": 42}')
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Decode a job payload
    Inspect {
        /// File holding the payload; stdin when omitted
        file: Option<PathBuf>,

        /// Print the flat map projection as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_cursor(cursor: Option<&str>) -> Result<Map<String, Value>> {
    let Some(text) = cursor else {
        return Ok(Map::new());
    };

    match serde_json::from_str(text).context("Cursor is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Cursor must be a JSON object, got: {}", other),
    }
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn print_copy(copy: &CopyJobPayload) {
    println!("Copy Job");
    println!("{}", "=".repeat(50));
    println!("  Source:      {}", copy.source_shard_id);
    println!("  Destination: {}", copy.destination_shard_id);
    println!("  Count:       {}", copy.count);
    println!();

    println!("Cursor:");
    println!("{}", "-".repeat(50));
    if copy.cursor.is_empty() {
        println!("  (start)");
    } else {
        for (key, value) in &copy.cursor {
            println!("  {:<20} {}", key, value);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            source,
            destination,
            count,
            cursor,
        } => {
            if count == 0 {
                bail!("--count must be at least 1");
            }

            let payload = CopyJobPayload {
                source_shard_id: source,
                destination_shard_id: destination,
                count,
                cursor: parse_cursor(cursor.as_deref())?,
            };

            payload
                .check_cursor()
                .context("Cursor cannot be carried by a copy payload")?;

            println!("{}", JobPayload::Copy(payload).to_json_string()?);
        }

        Commands::Inspect { file, json } => {
            let input = read_input(file.as_ref())?;
            let payload =
                JobPayload::from_json_str(input.trim()).context("Failed to decode job payload")?;

            match payload {
                JobPayload::Copy(copy) if json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&Value::Object(copy.to_map()))?
                    );
                }
                JobPayload::Copy(copy) => print_copy(&copy),
            }
        }
    }

    Ok(())
}
