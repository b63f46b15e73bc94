use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn blobtally_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_blobtally"))
}

fn run_cli(home: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(blobtally_bin());
    cmd.args(args);
    for var in ["FILE_LIST_DIR", "LOG_FILE_DIR", "DESTINATION_URL", "SOURCE_ROOT", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd.env("BLOBTALLY_HOME", home);
    cmd.output().expect("failed to execute blobtally CLI")
}

fn parse_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        write(&source.join("alpha/logs/2024/01/app.log"), "line one\n");
        write(&source.join("alpha/logs/2024/02/app.log"), "line two\n");
        write(&source.join("alpha/data/report.csv"), "a,b\n1,2\n");
        write(
            &source.join("beta/account.json"),
            r#"{"id": "/subscriptions/s1/resourceGroups/rg-beta/providers/Microsoft.Storage/storageAccounts/beta"}"#,
        );
        write(&source.join("beta/archive/old.bin"), "xyz");
        Self { temp }
    }

    fn path(&self, name: &str) -> String {
        self.temp.path().join(name).to_string_lossy().to_string()
    }

    fn home(&self) -> &Path {
        self.temp.path()
    }
}

fn scan_args<'a>(fixture: &'a Fixture, extra: &[&'a str]) -> Vec<String> {
    let mut args = vec![
        "scan".to_string(),
        "--source-root".to_string(),
        fixture.path("source"),
        "--file-list-dir".to_string(),
        fixture.path("out"),
        "--log-file-dir".to_string(),
        fixture.path("logs"),
        "--json".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

fn run(fixture: &Fixture, args: &[String]) -> Output {
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_cli(fixture.home(), &refs)
}

#[test]
fn test_scan_writes_and_publishes_manifests() {
    let fixture = Fixture::new();
    let dest = fixture.path("dest");
    let output = run(&fixture, &scan_args(&fixture, &["-u", "--destination-url", &dest]));
    assert!(
        output.status.success(),
        "scan failed\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary = parse_json(&output);
    assert_eq!(summary["accounts_scanned"], 2);
    assert_eq!(summary["containers_scanned"], 3);
    assert_eq!(summary["objects"], 4);
    assert_eq!(summary["chunks_created"], 3);

    let logs_dir = Path::new(&dest).join("alpha").join("logs");
    let published: Vec<_> = fs::read_dir(&logs_dir).unwrap().collect();
    assert_eq!(published.len(), 1);
    let manifest = fs::read_to_string(published[0].as_ref().unwrap().path()).unwrap();
    assert!(manifest.contains("2024/01/app.log,alpha,logs,"));
    assert!(manifest.contains("2024/02/app.log,alpha,logs,"));

    let log_files: Vec<_> = fs::read_dir(fixture.path("logs")).unwrap().collect();
    assert!(!log_files.is_empty());
}

#[test]
fn test_rerun_skips_completed_accounts() {
    let fixture = Fixture::new();
    let first = run(&fixture, &scan_args(&fixture, &[]));
    assert!(first.status.success());

    let second = run(&fixture, &scan_args(&fixture, &[]));
    assert!(second.status.success());
    let summary = parse_json(&second);
    assert_eq!(summary["accounts_already_complete"], 2);
    assert_eq!(summary["objects"], 0);
}

#[test]
fn test_filter_file_limits_crawl() {
    let fixture = Fixture::new();
    let filter = fixture.temp.path().join("filter.yaml");
    write(&filter, "accounts:\n  - name: alpha\n    containers: [data]\n");
    let filter = filter.to_string_lossy().to_string();

    let output = run(&fixture, &scan_args(&fixture, &["-i", &filter]));
    assert!(output.status.success());
    let summary = parse_json(&output);
    assert_eq!(summary["accounts_filtered"], 1);
    assert_eq!(summary["containers_filtered"], 1);
    assert_eq!(summary["objects"], 1);
    assert!(!Path::new(&fixture.path("out")).join("alpha").join("logs").exists());
}

#[test]
fn test_status_reports_progress() {
    let fixture = Fixture::new();
    assert!(run(&fixture, &scan_args(&fixture, &[])).status.success());

    let output = run_cli(
        fixture.home(),
        &["status", "--file-list-dir", &fixture.path("out"), "--json"],
    );
    assert!(output.status.success());
    let progress = parse_json(&output);
    assert_eq!(progress["alpha"]["status"], "complete");
    assert_eq!(progress["alpha/logs"]["status"], "complete");
    assert_eq!(progress["beta/archive"]["chunk"]["volume"], 0);
}

#[test]
fn test_upload_without_destination_fails() {
    let fixture = Fixture::new();
    let output = run(&fixture, &scan_args(&fixture, &["-u"]));
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no destination configured"));
}

#[test]
fn test_missing_source_root_fails() {
    let fixture = Fixture::new();
    let output = run_cli(
        fixture.home(),
        &["scan", "--source-root", &fixture.path("nowhere")],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Source root not found"));
}

#[test]
fn test_upload_after_local_scan_publishes_manifests() {
    let fixture = Fixture::new();
    assert!(run(&fixture, &scan_args(&fixture, &[])).status.success());

    let dest = fixture.path("dest");
    let output = run(&fixture, &scan_args(&fixture, &["-u", "--destination-url", &dest]));
    assert!(
        output.status.success(),
        "upload scan failed\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary = parse_json(&output);
    assert_eq!(summary["accounts_already_complete"], 0);
    assert_eq!(summary["objects"], 0);
    assert_eq!(summary["chunks_created"], 3);
    assert!(Path::new(&dest).join("beta").join("archive").exists());
}
