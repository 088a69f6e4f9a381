use std::fs;
use std::path::PathBuf;
use std::process::Output;

/// Helper to create a temp directory that is cleaned up on drop.
struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("entity_store_cli_test_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("failed to create temp dir");
        Self { path }
    }

    fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Path of the test database as a `--db` argument.
    fn db(&self) -> String {
        self.join("db.sqlite3").to_str().unwrap().to_string()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Runs the binary with `args`, returning its output.
fn run(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_entity-store"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run entity-store")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// migrate / plan / status / history
// ---------------------------------------------------------------------------

#[test]
fn plan_lists_steps_without_applying() {
    let dir = TempDir::new("plan");
    let db = dir.db();

    let out = run(&["--db", &db, "plan"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("create table Blogs"), "unexpected plan: {text}");
    assert!(text.contains("create table PostCategories"));

    let out = run(&["--db", &db, "plan", "--format", "json"]);
    assert!(out.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(plan["steps"].as_array().unwrap().len(), 6);
    assert_eq!(plan["steps"][0]["op"], "create_table");

    let out = run(&["--db", &db, "status", "--format", "json"]);
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["tables_exist"], false);
}

#[test]
fn migrate_is_idempotent() {
    let dir = TempDir::new("migrate");
    let db = dir.db();

    let first = run(&["--db", &db, "migrate"]);
    assert!(first.status.success());
    assert!(stdout(&first).contains("Migration applied"));

    let second = run(&["--db", &db, "migrate"]);
    assert!(second.status.success());
    assert!(stdout(&second).contains("up to date"));

    let out = run(&["--db", &db, "history", "--format", "json"]);
    let history: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["version"], 1);
    assert_eq!(history[0]["provider"], "rusqlite");
}

// ---------------------------------------------------------------------------
// seed / demo / query / related
// ---------------------------------------------------------------------------

#[test]
fn demo_runs_startup_flow() {
    let dir = TempDir::new("demo");
    let db = dir.db();

    let out = run(&["--db", &db, "demo"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("Blogs with id >= 1: 4"));
    assert!(text.contains("Blog with id = 2: Dummy2"));
    assert!(text.contains("Posts with id <= 2: PostDummy1, PostDummy2"));
    assert!(text.contains("Posts of blog Dummy1: PostDummy1, PostDummy2, PostDummy3"));
    assert!(text.contains("Posts in category C++: PostDummy1, PostDummy3, PostDummy4, PostDummy5, PostDummy6"));

    // Seeding again is a no-op.
    let out = run(&["--db", &db, "seed"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("nothing seeded"));
}

#[test]
fn demo_refuses_drift_without_auto_migrate() {
    let dir = TempDir::new("demo_drift");
    let config = dir.join("store.yaml");
    fs::write(&config, "auto_migrate: false\n").unwrap();

    let out = run(&["--config", config.to_str().unwrap(), "--db", &dir.db(), "demo"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("auto_migrate is off"));
}

#[test]
fn fresh_start_config_only_applies_to_demo() {
    let dir = TempDir::new("fresh_start");
    let db = dir.db();
    assert!(run(&["--db", &db, "demo"]).status.success());

    let config = dir.join("store.yaml");
    fs::write(&config, "fresh_start: true\n").unwrap();
    let config = config.to_str().unwrap();

    let out = run(&["--config", config, "--db", &db, "status", "--format", "json"]);
    assert!(out.status.success());
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["tables_exist"], true);
    assert_eq!(status["current_version"], 1);

    let out = run(&["--config", config, "--db", &db, "query", "blog"]);
    assert!(out.status.success());
    let blogs: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(blogs.as_array().unwrap().len(), 4);

    // demo still starts over, then reseeds
    let out = run(&["--config", config, "--db", &db, "demo"]);
    assert!(out.status.success());
    let out = run(&["--db", &db, "history", "--format", "json"]);
    let history: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[test]
fn query_and_related_print_json() {
    let dir = TempDir::new("query");
    let db = dir.db();
    assert!(run(&["--db", &db, "demo"]).status.success());

    let out = run(&["--db", &db, "query", "post", "--max-id", "2"]);
    assert!(out.status.success());
    let posts: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let ids: Vec<i64> = posts
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);

    let out = run(&["--db", &db, "related", "category", "3", "posts"]);
    assert!(out.status.success());
    let posts: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(posts.as_array().unwrap().len(), 2);

    let out = run(&["--db", &db, "related", "post", "4", "blog"]);
    let blogs: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(blogs[0]["name"], "Dummy2");

    let out = run(&["--db", &db, "related", "blog", "1", "categories"]);
    assert!(!out.status.success());

    let out = run(&["--db", &db, "related", "blog", "99", "posts"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

// ---------------------------------------------------------------------------
// reset
// ---------------------------------------------------------------------------

#[test]
fn reset_requires_confirmation() {
    let dir = TempDir::new("reset");
    let db = dir.db();
    assert!(run(&["--db", &db, "demo"]).status.success());

    assert!(!run(&["--db", &db, "reset"]).status.success());
    assert!(run(&["--db", &db, "reset", "--yes"]).status.success());

    let out = run(&["--db", &db, "status", "--format", "json"]);
    let status: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(status["tables_exist"], false);
    assert!(status["current_version"].is_null());
}
