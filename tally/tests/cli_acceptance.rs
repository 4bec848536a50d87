use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tally_core::{AnalyticsStore, Event};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.xdg_data.join("tally")
    }

    fn write_config(&self, contents: &str) {
        let dir = self.xdg_config.join("tally");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), contents).expect("failed to write config");
    }

    fn seed_live_store(&self, store: &AnalyticsStore) {
        fs::create_dir_all(self.data_dir()).expect("failed to create data dir");
        let body = serde_json::to_vec_pretty(store).expect("failed to encode store");
        fs::write(self.data_dir().join("live.json"), body).expect("failed to seed live store");
    }

    fn read_live_store(&self) -> AnalyticsStore {
        let path = self.data_dir().join("live.json");
        let bytes = fs::read(path).expect("failed to read live store");
        serde_json::from_slice(&bytes).expect("failed to decode live store")
    }
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "tally-track" => PathBuf::from(assert_cmd::cargo::cargo_bin!("tally-track")),
        "tally-report" => PathBuf::from(assert_cmd::cargo::cargo_bin!("tally-report")),
        "tally-archive" => PathBuf::from(assert_cmd::cargo::cargo_bin!("tally-archive")),
        "tally-apps" => PathBuf::from(assert_cmd::cargo::cargo_bin!("tally-apps")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    let mut command = Command::new(bin_path);

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> String {
    let output = run_bin(env, bin_name, args);
    assert_success(bin_name, args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn event(user: &str, ts: &str) -> Event {
    Event {
        user_id: user.to_string(),
        timestamp: ts.to_string(),
        endpoint: None,
        metadata: None,
    }
}

fn june_july_store() -> AnalyticsStore {
    let mut store = AnalyticsStore::new();
    store.push("geogame", event("a", "2024-06-03T10:00:00.000Z"));
    store.push("geogame", event("b", "2024-06-30T23:59:59.000Z"));
    store.push("geogame", event("a", "2024-07-01T08:00:00.000Z"));
    store.push("pikamed", event("c", "2024-06-15T12:00:00.000Z"));
    store
}

#[test]
fn track_then_report_counts_events() {
    let env = CliTestEnv::new();

    for user in ["u1", "u2", "u1"] {
        let args = ["--app", "geogame", "--user", user, "--endpoint", "/game/start"];
        let stdout = run_ok(&env, "tally-track", &args);
        assert!(stdout.contains("Recorded event for geogame"), "got:\n{stdout}");
    }

    let args = ["--app", "geogame", "--range", "monthly", "--format", "json"];
    let stdout = run_ok(&env, "tally-report", &args);
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("report is JSON");

    assert_eq!(report["uniqueUsers"], 2);
    assert_eq!(report["totalRequests"], 3);
    let monthly = report["monthlyData"].as_array().expect("monthlyData array");
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly[0]["requests"], 3);

    assert!(env.data_dir().join("live.json").exists());
}

#[test]
fn track_stores_endpoint_and_metadata() {
    let env = CliTestEnv::new();

    let args = [
        "--app", "geogame", "--user", "u1", "--meta", "level=3", "--meta", "mode=hard",
    ];
    run_ok(&env, "tally-track", &args);

    let store = env.read_live_store();
    let events = store.get("geogame").expect("geogame bucket").events();
    assert_eq!(events.len(), 1);
    let metadata = events[0].metadata.as_ref().expect("metadata");
    assert_eq!(metadata.get("level").map(String::as_str), Some("3"));
    assert_eq!(metadata.get("mode").map(String::as_str), Some("hard"));
}

#[test]
fn track_rejects_bad_metadata() {
    let env = CliTestEnv::new();
    let args = ["--app", "geogame", "--user", "u1", "--meta", "novalue"];
    let output = run_bin(&env, "tally-track", &args);
    assert!(!output.status.success());
}

#[test]
fn report_text_for_seeded_store() {
    let env = CliTestEnv::new();
    env.seed_live_store(&june_july_store());

    let args = [
        "--app", "geogame", "--range", "weekly", "--from", "2024-06-01", "--to", "2024-06-30",
    ];
    let stdout = run_ok(&env, "tally-report", &args);

    assert!(stdout.contains("geogame (weekly, file)"), "got:\n{stdout}");
    assert!(stdout.contains("Unique users:   2"));
    assert!(stdout.contains("Total requests: 2"));
    assert!(stdout.contains("2024-06-03"));
    assert!(stdout.contains("2024-06-24"));
}

#[test]
fn report_rejects_unknown_range() {
    let env = CliTestEnv::new();
    let output = run_bin(&env, "tally-report", &["--app", "geogame", "--range", "hourly"]);
    assert!(!output.status.success());
}

#[test]
fn archive_moves_previous_month_out_of_live_store() {
    let env = CliTestEnv::new();
    env.seed_live_store(&june_july_store());

    let args = ["--now", "2024-07-02T06:00:00Z"];
    let stdout = run_ok(&env, "tally-archive", &args);
    assert!(stdout.contains("Archived geogame 2024-06"), "got:\n{stdout}");
    assert!(stdout.contains("Archived pikamed 2024-06"), "got:\n{stdout}");

    let archive_path = env.data_dir().join("archive/geogame/2024-06.json");
    assert!(archive_path.exists(), "missing {}", archive_path.display());
    let record: serde_json::Value =
        serde_json::from_slice(&fs::read(&archive_path).unwrap()).unwrap();
    assert_eq!(record["totalRequests"], 2);
    assert_eq!(record["uniqueUsers"], serde_json::json!(["a", "b"]));

    let live = env.read_live_store();
    let geogame = live.get("geogame").expect("geogame bucket");
    assert_eq!(geogame.events().len(), 1);
    assert_eq!(geogame.events()[0].timestamp, "2024-07-01T08:00:00.000Z");

    // Running again the same day has nothing left to do.
    let stdout = run_ok(&env, "tally-archive", &args);
    assert!(stdout.contains("Nothing to archive for 2024-06"), "got:\n{stdout}");

    let stdout = run_ok(&env, "tally-archive", &["--list", "geogame"]);
    assert!(stdout.contains("2024-06  users=2 requests=2"), "got:\n{stdout}");
}

#[test]
fn archive_dry_run_writes_nothing() {
    let env = CliTestEnv::new();
    let seeded = june_july_store();
    env.seed_live_store(&seeded);

    let args = ["--now", "2024-07-01T00:00:00Z", "--dry-run"];
    let stdout = run_ok(&env, "tally-archive", &args);
    assert!(stdout.contains("Would archive geogame 2024-06"), "got:\n{stdout}");
    assert!(stdout.contains("Dry run"));

    assert!(!env.data_dir().join("archive/geogame").exists());
    assert_eq!(env.read_live_store(), seeded);
}

#[test]
fn archive_dry_run_reports_collision_with_existing_archive() {
    let env = CliTestEnv::new();
    env.seed_live_store(&june_july_store());
    run_ok(&env, "tally-archive", &["--now", "2024-07-01T06:00:00Z"]);
    let archive_path = env.data_dir().join("archive/geogame/2024-06.json");
    let archived = fs::read(&archive_path).expect("June archive written");

    // A June event arriving after June was archived
    let mut live = env.read_live_store();
    live.push("geogame", event("late", "2024-06-30T23:30:00.000Z"));
    env.seed_live_store(&live);

    let args = ["--now", "2024-07-02T06:00:00Z", "--dry-run"];
    let stdout = run_ok(&env, "tally-archive", &args);
    assert!(stdout.contains("Would fail geogame"), "got:\n{stdout}");
    assert!(!stdout.contains("Would archive geogame"), "got:\n{stdout}");
    assert!(!stdout.contains("Nothing to archive"), "got:\n{stdout}");

    assert_eq!(fs::read(&archive_path).unwrap(), archived);
    assert_eq!(env.read_live_store(), live);
}

#[test]
fn archive_outside_grace_window_is_noop() {
    let env = CliTestEnv::new();
    let seeded = june_july_store();
    env.seed_live_store(&seeded);

    let stdout = run_ok(&env, "tally-archive", &["--now", "2024-07-10T00:00:00Z"]);
    assert!(stdout.contains("Archive not due"), "got:\n{stdout}");
    assert_eq!(env.read_live_store(), seeded);
}

#[test]
fn archive_grace_window_comes_from_config() {
    let env = CliTestEnv::new();
    env.write_config("[archive]\ngrace_days = 10\n");
    env.seed_live_store(&june_july_store());

    let stdout = run_ok(&env, "tally-archive", &["--now", "2024-07-10T00:00:00Z"]);
    assert!(stdout.contains("Archived geogame 2024-06"), "got:\n{stdout}");
}

#[test]
fn sqlite_backend_tracks_and_skips_rollover() {
    let env = CliTestEnv::new();
    env.write_config("[storage]\nbackend = \"sqlite\"\n");

    run_ok(&env, "tally-track", &["--app", "geogame", "--user", "u1"]);
    run_ok(&env, "tally-track", &["--app", "geogame", "--user", "u2"]);
    assert!(env.data_dir().join("tally.db").exists());

    let stdout = run_ok(&env, "tally-report", &["--app", "geogame", "--format", "json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("report is JSON");
    assert_eq!(report["uniqueUsers"], 2);
    assert_eq!(report["dailyData"][0]["requests"], 2);

    let stdout = run_ok(&env, "tally-archive", &[]);
    assert!(stdout.contains("keeps events indefinitely"), "got:\n{stdout}");
}

#[test]
fn apps_add_and_list() {
    let env = CliTestEnv::new();

    let stdout = run_ok(&env, "tally-apps", &["list"]);
    assert!(stdout.contains("No apps registered."));

    let stdout = run_ok(
        &env,
        "tally-apps",
        &["add", "--name", "Discord Storage", "--description", "File storage"],
    );
    assert!(stdout.contains("Registered discordstorage (Discord Storage)"), "got:\n{stdout}");

    let output = run_bin(&env, "tally-apps", &["add", "--name", "Discord Storage"]);
    assert!(!output.status.success(), "duplicate app should be rejected");

    let stdout = run_ok(&env, "tally-apps", &["list", "--json"]);
    let apps: serde_json::Value = serde_json::from_str(&stdout).expect("apps are JSON");
    assert_eq!(apps[0]["id"], "discordstorage");
    assert_eq!(apps[0]["status"], "active");
    assert_eq!(apps[0]["description"], "File storage");
}
