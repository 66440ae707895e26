// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Basic CLI tests - help, version, encode and inspect.

// Allow deprecated - cargo_bin is standard for CLI testing
#![allow(deprecated)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

const PAYLOAD: &str = r#"{"Copy":{"source_shard_hostname":"1.moray.example.com","source_shard_table_prefix":"manta_0001","destination_shard_hostname":"2.moray.example.com","destination_shard_table_prefix":"manta_0001","count":750,"cursor":42}}"#;

fn adm_cmd() -> Command {
    Command::cargo_bin("shard-migration-adm").expect("Failed to find shard-migration-adm binary")
}

#[test]
fn test_version() {
    adm_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shard-migration-adm"));
}

#[test]
fn test_help() {
    adm_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("encode"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_encode() {
    adm_cmd()
        .args([
            "encode",
            "--source",
            "1.moray.example.com/manta_0001",
            "--destination",
            "2.moray.example.com/manta_0001",
            "--count",
            "750",
            "--cursor",
            r#"{"cursor": 42}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"Copy":{"#))
        .stdout(predicate::str::contains(
            r#""destination_shard_hostname":"2.moray.example.com""#,
        ))
        .stdout(predicate::str::contains(r#""count":750"#))
        .stdout(predicate::str::contains(r#""cursor":42"#));
}

#[test]
fn test_encode_rejects_bad_input() {
    adm_cmd()
        .args(["encode", "--source", "no-prefix", "--destination", "a/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HOSTNAME/TABLE_PREFIX"));

    adm_cmd()
        .args(["encode", "-s", "a/b", "-d", "c/d", "--count", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));

    adm_cmd()
        .args(["encode", "-s", "a/b", "-d", "c/d", "--cursor", "[1, 2]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}

#[test]
fn test_encode_rejects_reserved_cursor_keys() {
    adm_cmd()
        .args([
            "encode",
            "-s",
            "a/b",
            "-d",
            "c/d",
            "--count",
            "5",
            "--cursor",
            r#"{"count": 99}"#,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reserved payload key: count"))
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_inspect_stdin() {
    adm_cmd()
        .arg("inspect")
        .write_stdin(PAYLOAD)
        .assert()
        .success()
        .stdout(predicate::str::contains("1.moray.example.com/manta_0001"))
        .stdout(predicate::str::contains("Count:       750"))
        .stdout(predicate::str::contains("cursor"));
}

#[test]
fn test_inspect_file_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", PAYLOAD).unwrap();

    let output = adm_cmd()
        .args(["inspect", "--json"])
        .arg(file.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let map: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(map["source_shard_table_prefix"], "manta_0001");
    assert_eq!(map["count"], 750);
    assert_eq!(map["cursor"], 42);
}

#[test]
fn test_inspect_rejects_garbage() {
    adm_cmd()
        .arg("inspect")
        .write_stdin(r#"{"Move": {}}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decode job payload"));
}
