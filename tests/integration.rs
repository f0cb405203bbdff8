use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ph_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ph");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ph.sqlite"

[storage]
artifact_root = "{root}/data/artifacts"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ph.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ph(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ph_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ph binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Pull the id out of a "Created ... name (id)" line.
fn created_id(stdout: &str) -> String {
    let line = stdout
        .lines()
        .find(|l| l.starts_with("Created"))
        .unwrap_or_else(|| panic!("no Created line in: {}", stdout));
    let start = line.rfind('(').unwrap() + 1;
    let end = line.rfind(')').unwrap();
    line[start..end].to_string()
}

fn write_plan(dir: &Path, file: &str, timestamp: &str, actions: &[&str]) -> PathBuf {
    let plan = serde_json::json!({
        "format_version": "1.2",
        "terraform_version": "1.6.0",
        "timestamp": timestamp,
        "variables": {"dns_zone": {"value": "shared-dns.example.com"}},
        "resource_changes": [{
            "address": "azurerm_virtual_network.main",
            "type": "azurerm_virtual_network",
            "name": "main",
            "change": {
                "actions": actions,
                "after": {"resource_group_name": "rg-network", "address_space": ["10.0.0.0/16"]}
            }
        }],
        "configuration": {
            "provider_config": {"azurerm": {"name": "azurerm"}},
            "root_module": {
                "resources": [{
                    "address": "azurerm_virtual_network.main",
                    "type": "azurerm_virtual_network",
                    "name": "main"
                }]
            }
        }
    });
    let path = dir.join(file);
    fs::write(&path, serde_json::to_string(&plan).unwrap()).unwrap();
    path
}

struct Fixture {
    _tmp: TempDir,
    config: PathBuf,
    root: PathBuf,
    project: String,
    network: String,
}

fn setup_project() -> Fixture {
    let (tmp, config) = setup_test_env();
    let root = tmp.path().to_path_buf();

    let (_, stderr, ok) = run_ph(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);

    let (stdout, stderr, ok) = run_ph(
        &config,
        &["project", "create", "platform", "--env", "dev", "--env", "prod"],
    );
    assert!(ok, "project create failed: {}", stderr);
    let project = created_id(&stdout);

    let (stdout, stderr, ok) = run_ph(&config, &["component", "create", &project, "network"]);
    assert!(ok, "component create failed: {}", stderr);
    let network = created_id(&stdout);

    let (_, stderr, ok) = run_ph(&config, &["component", "create", &project, "shared-dns"]);
    assert!(ok, "component create failed: {}", stderr);

    Fixture {
        _tmp: tmp,
        config,
        root,
        project,
        network,
    }
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_ph(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_ph(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, ok) = run_ph(Path::new("/nonexistent/ph.toml"), &["init"]);
    assert!(!ok, "init should fail without config: {}", stdout);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_ingest_then_list_and_report() {
    let fx = setup_project();
    let plan = write_plan(&fx.root, "plan1.json", "2024-03-01T10:00:00Z", &["update"]);

    let (stdout, stderr, ok) = run_ph(
        &fx.config,
        &[
            "ingest",
            plan.to_str().unwrap(),
            "--component",
            &fx.network,
            "--env",
            "prod",
            "--branch",
            "main",
        ],
    );
    assert!(ok, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Plan uploaded successfully"));
    assert!(stdout.contains("+0 ~1 -0"));
    assert!(stdout.contains("links:"), "expected a component link: {}", stdout);

    let artifacts = fx.root.join("data/artifacts").join(&fx.project).join(&fx.network).join("prod");
    assert_eq!(fs::read_dir(&artifacts).unwrap().count(), 1);

    let (stdout, _, ok) = run_ph(&fx.config, &["plans", "list", "--project", &fx.project]);
    assert!(ok);
    assert!(stdout.contains("network/prod"));

    let (stdout, _, ok) = run_ph(&fx.config, &["report", &fx.project]);
    assert!(ok);
    assert!(stdout.contains("Drifted"));
    assert!(stdout.contains("No State"));
    assert!(stdout.contains("1 drifted"));
}

#[test]
fn test_stale_plan_rejected() {
    let fx = setup_project();
    let first = write_plan(&fx.root, "a.json", "2024-03-01T10:00:00Z", &["no-op"]);
    let older = write_plan(&fx.root, "b.json", "2024-02-01T10:00:00Z", &["no-op"]);

    let args = |p: &Path| {
        vec![
            "ingest".to_string(),
            p.to_str().unwrap().to_string(),
            "--component".to_string(),
            fx.network.clone(),
            "--env".to_string(),
            "dev".to_string(),
        ]
    };

    let a = args(&first);
    let (_, stderr, ok) = run_ph(&fx.config, &a.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(ok, "first ingest failed: {}", stderr);

    let b = args(&older);
    let (_, stderr, ok) = run_ph(&fx.config, &b.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(!ok, "older plan should be rejected");
    assert!(stderr.contains("stale plan"), "stderr: {}", stderr);

    let (_, stderr, ok) = run_ph(&fx.config, &a.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(!ok, "equal timestamp should be rejected");
    assert!(stderr.contains("stale plan"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_by_name_requires_project() {
    let fx = setup_project();
    let plan = write_plan(&fx.root, "plan.json", "2024-03-01T10:00:00Z", &["create"]);

    let (stdout, stderr, ok) = run_ph(
        &fx.config,
        &[
            "ingest",
            plan.to_str().unwrap(),
            "--component-name",
            "network",
            "--project",
            &fx.project,
            "--env",
            "dev",
        ],
    );
    assert!(ok, "ingest by name failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains(&fx.network));

    let (_, _, ok) = run_ph(
        &fx.config,
        &["ingest", plan.to_str().unwrap(), "--component-name", "network", "--env", "dev"],
    );
    assert!(!ok, "--component-name without --project should be rejected");
}

#[test]
fn test_component_delete_cascades() {
    let fx = setup_project();
    let plan = write_plan(&fx.root, "plan.json", "2024-03-01T10:00:00Z", &["create"]);
    let (_, stderr, ok) = run_ph(
        &fx.config,
        &["ingest", plan.to_str().unwrap(), "--component", &fx.network, "--env", "dev"],
    );
    assert!(ok, "ingest failed: {}", stderr);

    let (stdout, stderr, ok) = run_ph(&fx.config, &["component", "delete", &fx.network]);
    assert!(ok, "delete failed: {}", stderr);
    assert!(stdout.contains("1 plans removed"));

    let (stdout, _, ok) = run_ph(&fx.config, &["plans", "list"]);
    assert!(ok);
    assert!(stdout.contains("No plans found"));

    let artifacts = fx.root.join("data/artifacts").join(&fx.project).join(&fx.network).join("dev");
    let left = fs::read_dir(&artifacts).map(|d| d.count()).unwrap_or(0);
    assert_eq!(left, 0);
}

#[test]
fn test_unregistered_environment_is_pending() {
    let fx = setup_project();
    let plan = write_plan(&fx.root, "plan.json", "2024-03-01T10:00:00Z", &["create"]);
    let (stdout, stderr, ok) = run_ph(
        &fx.config,
        &["ingest", plan.to_str().unwrap(), "--component", &fx.network, "--env", "qa"],
    );
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("pending approval"));

    let (stdout, _, ok) = run_ph(&fx.config, &["plans", "list", "--env", "qa"]);
    assert!(ok);
    assert!(stdout.contains("[pending]"));

    let (stdout, stderr, ok) = run_ph(&fx.config, &["project", "delete-env", &fx.project, "qa"]);
    assert!(ok, "delete-env failed: {}", stderr);
    assert!(stdout.contains("1 plans removed"));
}

#[test]
fn test_analyze_without_config() {
    let tmp = TempDir::new().unwrap();
    let plan = write_plan(tmp.path(), "plan.json", "2024-03-01T10:00:00Z", &["delete", "create"]);

    let (stdout, stderr, ok) = run_ph(
        Path::new("/nonexistent/ph.toml"),
        &["analyze", plan.to_str().unwrap(), "--component", "shared-dns", "--json"],
    );
    assert!(ok, "analyze failed: {}", stderr);

    let analysis: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(analysis["cloud_platform"], "Azure");
    assert_eq!(analysis["drift"]["replace"], 1);
    assert_eq!(analysis["links"], serde_json::json!(["shared-dns"]));
    assert_eq!(analysis["resource_graph"]["nodes"].as_array().unwrap().len(), 1);
}

#[test]
fn test_token_lifecycle() {
    let fx = setup_project();

    let (stdout, stderr, ok) = run_ph(&fx.config, &["token", "create", &fx.project, "--name", "ci"]);
    assert!(ok, "token create failed: {}", stderr);
    let token = stdout.trim().to_string();
    assert!(token.starts_with(&format!("tdp_{}_", fx.project)));

    let (stdout, _, ok) = run_ph(&fx.config, &["token", "list", &fx.project]);
    assert!(ok);
    assert!(stdout.contains("ci"));
    assert!(!stdout.contains(&token), "token secret must not be listed");
    let token_id = stdout.split_whitespace().next().unwrap().to_string();

    let (_, stderr, ok) = run_ph(&fx.config, &["token", "revoke", &fx.project, &token_id]);
    assert!(ok, "revoke failed: {}", stderr);
    let (stdout, _, _) = run_ph(&fx.config, &["token", "list", &fx.project]);
    assert!(stdout.contains("No tokens."));
}

#[test]
fn test_component_exclusion_hides_report_row() {
    let fx = setup_project();

    let (stdout, stderr, ok) = run_ph(
        &fx.config,
        &["component", "update", &fx.network, "--name", "vnet", "--exclude-env", "dev"],
    );
    assert!(ok, "component update failed: {}", stderr);
    assert!(stdout.contains("Updated component vnet"));

    let (stdout, _, ok) = run_ph(&fx.config, &["component", "list", &fx.project]);
    assert!(ok);
    assert!(stdout.contains("excludes [dev]"));

    let (stdout, _, ok) = run_ph(&fx.config, &["report", &fx.project, "--json"]);
    assert!(ok);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let rows = report["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(!rows
        .iter()
        .any(|r| r["component"] == "vnet" && r["environment"] == "dev"));

    let (_, stderr, ok) = run_ph(&fx.config, &["component", "update", &fx.network, "--clear-excluded"]);
    assert!(ok, "clear failed: {}", stderr);
    let (stdout, _, _) = run_ph(&fx.config, &["report", &fx.project, "--json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["rows"].as_array().unwrap().len(), 4);

    let (_, _, ok) = run_ph(&fx.config, &["component", "update", &fx.network]);
    assert!(!ok, "update without fields should be rejected");
}

#[test]
fn test_project_update_settings() {
    let fx = setup_project();

    let (stdout, stderr, ok) = run_ph(
        &fx.config,
        &[
            "project",
            "update",
            &fx.project,
            "--description",
            "Shared network",
            "--slack-webhook",
            "https://hooks.example/p",
        ],
    );
    assert!(ok, "project update failed: {}", stderr);
    assert!(stdout.contains("description:   Shared network"));
    assert!(stdout.contains("slack webhook: set"));

    let (stdout, stderr, ok) = run_ph(&fx.config, &["project", "update", &fx.project, "--slack-webhook", ""]);
    assert!(ok, "clearing webhook failed: {}", stderr);
    assert!(stdout.contains("slack webhook: none"));

    let (_, stderr, ok) = run_ph(
        &fx.config,
        &["project", "update", &fx.project, "--slack-webhook", "not-a-url"],
    );
    assert!(!ok);
    assert!(stderr.contains("http(s)"));
}
