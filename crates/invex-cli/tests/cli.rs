use std::fs;
use std::path::Path;

use assert_cmd::Command;
use image::{GrayImage, Luma};
use predicates::prelude::*;
use tempfile::TempDir;

/// `invex` with config and data directories isolated in `home`.
fn invex(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("invex").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_scan(path: &Path) {
    GrayImage::from_fn(300, 200, |x, y| {
        if (y % 20) < 6 && (20..280).contains(&x) { Luma([20]) } else { Luma([235]) }
    })
    .save(path)
    .unwrap();
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    invex(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("health"))
        .stdout(predicate::str::contains("models"));
}

#[test]
fn test_config_init_set_get() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("invex.json");

    invex(home.path())
        .args(["config", "init", "--output"])
        .arg(&config)
        .assert()
        .success();
    assert!(config.exists());

    invex(home.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "set", "runtime.workers", "3"])
        .assert()
        .success();

    invex(home.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "runtime.workers"])
        .assert()
        .success()
        .stdout(predicate::str::diff("3\n"));

    invex(home.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "runtime.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration key not found"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("invex.json");
    fs::write(&config, "{}").unwrap();

    invex(home.path())
        .args(["config", "init", "--output"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_config_path_uses_config_dir() {
    let home = TempDir::new().unwrap();
    invex(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("invex/config.json"))
        .stdout(predicate::str::contains("not created"));
}

#[test]
fn test_process_missing_file() {
    let home = TempDir::new().unwrap();
    invex(home.path())
        .args(["process", "does-not-exist.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_process_unsupported_format() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("invoice.txt");
    fs::write(&input, "Facture N° 1").unwrap();

    invex(home.path())
        .arg("process")
        .arg(&input)
        .arg("--model-dir")
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("INVALID_FILE_FORMAT"));
}

#[test]
fn test_process_corrupt_pdf() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("broken.pdf");
    fs::write(&input, b"%PDF-1.4\n\x00").unwrap();

    invex(home.path())
        .arg("process")
        .arg(&input)
        .arg("--model-dir")
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CORRUPT_DOCUMENT"));
}

#[test]
fn test_process_without_models_reports_unavailable() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("scan.png");
    write_scan(&input);

    invex(home.path())
        .arg("process")
        .arg(&input)
        .arg("--model-dir")
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("OCR_UNAVAILABLE"));
}

#[test]
fn test_process_rejects_unknown_field() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("scan.png");
    write_scan(&input);

    invex(home.path())
        .arg("process")
        .arg(&input)
        .args(["--fields", "invoice.number,invoice.colour"])
        .arg("--model-dir")
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown field: invoice.colour"));
}

#[test]
fn test_health_json_without_models() {
    let home = TempDir::new().unwrap();
    invex(home.path())
        .args(["health", "--json", "--model-dir"])
        .arg(home.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ocr_backend_reachable\": false"))
        .stdout(predicate::str::contains("\"queue_depth\": 16"));
}

#[test]
fn test_batch_continue_on_error_writes_summary() {
    let home = TempDir::new().unwrap();
    let inputs = home.path().join("in");
    let out = home.path().join("out");
    fs::create_dir_all(&inputs).unwrap();
    write_scan(&inputs.join("a.png"));
    fs::write(inputs.join("b.pdf"), b"%PDF-1.4\n\x00").unwrap();

    invex(home.path())
        .arg("batch")
        .arg(format!("{}/*", inputs.display()))
        .arg("--output-dir")
        .arg(&out)
        .args(["--summary", "--continue-on-error", "--model-dir"])
        .arg(home.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 successful, 2 failed"));

    let summary = fs::read_to_string(out.join("summary.csv")).unwrap();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("a.png,error"));
    assert!(lines[1].contains("OCR_UNAVAILABLE"));
    assert!(lines[2].starts_with("b.pdf,error"));
    assert!(lines[2].contains("CORRUPT_DOCUMENT"));
}

#[test]
fn test_batch_stops_on_first_error() {
    let home = TempDir::new().unwrap();
    let input = home.path().join("broken.pdf");
    fs::write(&input, b"%PDF-1.4\n\x00").unwrap();

    invex(home.path())
        .arg("batch")
        .arg(input.display().to_string())
        .arg("--model-dir")
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CORRUPT_DOCUMENT"));
}

#[test]
fn test_models_list() {
    let home = TempDir::new().unwrap();
    invex(home.path())
        .args(["models", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mobile"))
        .stdout(predicate::str::contains("latin_rec.onnx"));
}
