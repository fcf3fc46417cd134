use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const INVOICE: &str = "发票号码：12345678\n开票日期：2024年03月15日\n\
                       购买方名称：Globex\n销售方名称：Acme\n价税合计：¥113.00\n";

fn invex(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("invex").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, "{}").unwrap();
    let input = dir.path().join("in");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("inv.txt"), INVOICE).unwrap();
    (dir, config)
}

#[test]
fn test_run_writes_reports_and_resumes() {
    let (dir, config) = setup();
    let input = dir.path().join("in");
    let out = dir.path().join("out");

    invex(&config)
        .args(["run", "--mode", "regex", "--quiet", "-o"])
        .arg(&out)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 documents"));

    assert!(out.join("summary.csv").exists());
    assert!(out.join(".invex-progress.jsonl").exists());
    assert!(out.join("Acme").join("Globex").join("inv.txt").exists());
    let records = fs::read_to_string(out.join("records.json")).unwrap();
    assert!(records.contains("12345678"));

    invex(&config)
        .args(["run", "--mode", "regex", "--quiet", "-o"])
        .arg(&out)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 resumed"));
}

#[test]
fn test_process_prints_records() {
    let (dir, config) = setup();

    invex(&config)
        .args(["process", "--mode", "regex"])
        .arg(dir.path().join("in").join("*.txt"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"invoice_number\": \"12345678\""));
}

#[test]
fn test_config_get() {
    let (_dir, config) = setup();

    invex(&config)
        .args(["config", "get", "batch.workers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));

    invex(&config)
        .args(["config", "get", "batch.nope"])
        .assert()
        .failure();
}
