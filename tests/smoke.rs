//! Smoke tests -- verify the binary runs and the subcommands are wired.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("trendscope")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Anomaly detection and correlation"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("trendscope")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("trendscope"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "import", "analyze", "correlate", "status"] {
        Command::cargo_bin("trendscope")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_import_rejects_unknown_dataset() {
    Command::cargo_bin("trendscope")
        .unwrap()
        .args(["import", "--dataset", "network", "--file", "x.csv"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"));
}

#[test]
fn test_import_then_status() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("trendscope.toml");
    let db = dir.path().join("db").join("metrics.db");
    std::fs::write(
        &config,
        format!("[storage]\ndb_path = \"{}\"\n", db.display()),
    )
    .unwrap();

    let csv = dir.path().join("server.csv");
    std::fs::write(
        &csv,
        "node_name,timestamp,cpu_util_pct,mem_util_pct,net_packet_count_per_s\n\
         db01,2024-05-01 10:00:00,10,20,30\n\
         db01,2024-05-01 10:01:00,11,21,31\n",
    )
    .unwrap();

    Command::cargo_bin("trendscope")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["import", "--dataset", "server", "--file"])
        .arg(&csv)
        .assert()
        .success()
        .stdout(predicates::str::contains("Imported 2 of 2 rows"));

    Command::cargo_bin("trendscope")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("2024-05-01 10:01:00"));
}
