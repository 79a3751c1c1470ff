//! End-to-end tests for the stage pipeline
//!
//! Each test builds a throwaway container layout in a temp dir (os-release,
//! hostname, a bin dir, candidate dirs and a suite tree), points the runner
//! at it and checks the verdicts plus the proof tree left behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use container_runner::events::EventRecord;
use container_runner::report::{list_members, HARNESS_POLICY};
use container_runner::suites::Expect;
use container_runner::{Error, HarnessConfig, Pipeline, RunContext, RunSummary, Stage, Status};
use tempfile::TempDir;

/// Test context with paths and cleanup
struct TestContext {
    tmp: TempDir,
    config: HarnessConfig,
}

impl TestContext {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let root = tmp.path();
        for dir in ["project/tests", "bin", "candidates", "var/log"] {
            fs::create_dir_all(root.join(dir)).expect("Failed to create layout dir");
        }
        fs::write(root.join("os-release"), "ID=arch\nVERSION_ID=rolling\n").unwrap();
        fs::write(root.join("hostname"), "3f2a9c1d7b4e\n").unwrap();
        fs::write(root.join("tracked.txt"), "").unwrap();

        let mut config = HarnessConfig::default();
        config.paths.project_dir = root.join("project");
        config.paths.tests_dir = Some(root.join("project/tests"));
        config.paths.proof_root = Some(root.join("project/.proof"));
        config.paths.tracked_names_file = Some(root.join("tracked.txt"));
        config.paths.event_log = root.join("var/log/runner.jsonl");
        config.paths.os_release = root.join("os-release");
        config.paths.hostname_file = root.join("hostname");
        config.paths.cgroup_file = root.join("cgroup");
        config.paths.product_audit_log = root.join("var/log/product-audit.log");
        config.paths.bin_dir = root.join("bin");
        config.product.candidate_dirs = vec![root.join("candidates")];
        config.product.preserved = Vec::new();
        config.suites.script_locale = None;
        config.timeouts.suite_secs = 30;

        // Trivial stage commands that exist everywhere
        config.preflight.required_tools = vec!["sh".to_string()];
        config.preflight.version_probes = vec![argv(&["sh", "-c", "echo probe-ok"])];
        config.preflight.check_command = argv(&["true"]);
        config.preflight.package_db_dir = None;
        config.deps.query_command = argv(&["true"]);
        config.deps.packages = argv(&["base-devel", "git"]);
        config.build.toolchain_command = Vec::new();
        config.build.provenance_probes = Vec::new();
        config.build.build_command = argv(&["true"]);

        Self { tmp, config }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn proof(&self) -> PathBuf {
        self.config.paths.proof_root()
    }

    fn bin(&self) -> PathBuf {
        self.config.paths.bin_dir.clone()
    }

    fn candidates(&self) -> PathBuf {
        self.root().join("candidates")
    }

    fn write_suite(&self, name: &str, descriptor: &str) {
        let dir = self.config.paths.tests_dir().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("task.yaml"), descriptor).unwrap();
    }

    fn track(&self, names: &[&str]) {
        fs::write(self.root().join("tracked.txt"), names.join("\n")).unwrap();
    }

    fn pipeline(&self) -> Pipeline {
        let run_id = "run-test-1".to_string();
        Pipeline::new(
            self.config.clone(),
            RunContext::from_lookup(move |k| (k == "RUN_ID").then(|| run_id.clone())),
        )
    }

    fn events(&self) -> Vec<EventRecord> {
        fs::read_to_string(&self.config.paths.event_log)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).expect("event line is one JSON object"))
            .collect()
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_passing_suite_leaves_full_proof_tree() {
    let ctx = TestContext::new();
    ctx.write_suite(
        "smoke",
        "summary: trivial\nexecute: |\n  echo hello from suite\n  exit 0\nexpect: pass\n",
    );

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    assert!(!outcome.failed);
    assert_eq!(outcome.exit_code(), 0);

    let result = &outcome.results[0];
    assert_eq!(result.name, "smoke");
    assert_eq!(result.status, Status::Pass);
    assert_eq!(result.rc, 0);
    assert_eq!(result.restore_rc, 0);
    assert!(result.presence_ok);

    let proof = ctx.proof();
    let stdout = fs::read_to_string(proof.join("logs/smoke/execute.stdout.log")).unwrap();
    assert!(stdout.contains("hello from suite"));
    assert!(proof.join("logs/smoke/execute.stderr.log").exists());
    assert!(proof.join("snapshots/smoke/before.json").exists());
    assert!(proof.join("snapshots/smoke/after.json").exists());
    assert!(proof.join("results/smoke/result.json").exists());
    assert!(proof.join("tmp/suites_results.json").exists());
    // Nothing touched the tracked set, so presence was never evaluated
    assert!(!proof.join("results/smoke/presence.json").exists());
}

#[tokio::test]
async fn test_expected_failure_counts_as_pass() {
    let ctx = TestContext::new();
    ctx.write_suite("xfail", "execute: exit 3\nexpect: xfail\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.rc, 3);
    assert_eq!(result.expect, Expect::Xfail);
    assert_eq!(result.status, Status::Pass);
}

#[tokio::test]
async fn test_incompatible_suite_never_runs() {
    let ctx = TestContext::new();
    let executed = ctx.marker("executed");
    let restored = ctx.marker("restored");
    ctx.write_suite(
        "debian-only",
        &format!(
            "execute: touch {}\nrestore: touch {}\ndistro-check: [debian]\n",
            executed.display(),
            restored.display()
        ),
    );

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.status, Status::Fail);
    assert_eq!(result.rc, 125);
    assert_eq!(result.duration_ms, 0);
    assert!(result.message.as_deref().unwrap().contains("incompatible"));
    assert!(!executed.exists());
    assert!(!restored.exists());
    assert!(outcome.failed);

    let events = ctx.events();
    assert!(events
        .iter()
        .any(|e| e.event.as_deref() == Some("suite_incompatible")));
    assert!(!events
        .iter()
        .any(|e| e.event.as_deref() == Some("restore_start")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_enable_without_symlink_fails_presence() {
    let ctx = TestContext::new();
    ctx.track(&["ls"]);
    fs::write(ctx.candidates().join("ls"), "").unwrap();
    fs::write(ctx.bin().join("ls"), "").unwrap();
    // Classified as an enable without running the product
    ctx.write_suite("enable-ls", "execute: 'true # oxidizr-arch --assume-yes enable'\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.rc, 0);
    assert!(!result.presence_ok);
    assert_eq!(result.status, Status::Fail);

    let presence: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(ctx.proof().join("results/enable-ls/presence.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(presence["expect_symlink"], true);
    assert!(presence["failures"][0]
        .as_str()
        .unwrap()
        .starts_with("expected symlink for ls"));
    assert!(ctx
        .events()
        .iter()
        .any(|e| e.event.as_deref() == Some("assert_fail")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_enable_with_symlink_passes_presence() {
    let ctx = TestContext::new();
    ctx.track(&["ls"]);
    fs::write(ctx.candidates().join("ls"), "").unwrap();
    std::os::unix::fs::symlink(ctx.candidates().join("ls"), ctx.bin().join("ls")).unwrap();
    ctx.write_suite("enable-ls", "execute: 'true # oxidizr-arch enable'\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    assert_eq!(outcome.results[0].status, Status::Pass);

    // The observed path shows up as a symlink in the after snapshot
    let after: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(ctx.proof().join("snapshots/enable-ls/after.json")).unwrap(),
    )
    .unwrap();
    let ls = after
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["path"].as_str().unwrap().ends_with("/bin/ls"))
        .unwrap();
    assert_eq!(ls["is_symlink"], true);
}

#[tokio::test]
async fn test_missing_candidate_tolerated_when_product_warned() {
    let ctx = TestContext::new();
    ctx.track(&["ls"]);
    ctx.write_suite(
        "enable-warned",
        "execute: |\n  echo 'WARN: no replacement for ls' # oxidizr-arch enable\n",
    );

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    assert!(outcome.results[0].presence_ok);
    assert_eq!(outcome.results[0].status, Status::Pass);
}

#[tokio::test]
async fn test_failed_restore_fails_suite() {
    let ctx = TestContext::new();
    ctx.write_suite("bad-restore", "execute: 'true'\nrestore: exit 4\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.rc, 0);
    assert_eq!(result.restore_rc, 4);
    assert_eq!(result.status, Status::Fail);
    assert!(ctx.proof().join("logs/bad-restore/restore.stdout.log").exists());
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_rest() {
    let ctx = TestContext::new();
    ctx.write_suite("a-fails", "execute: exit 1\n");
    ctx.write_suite("b-broken", "expect: sometimes\n");
    ctx.write_suite("c-passes", "execute: 'true'\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let verdicts: Vec<_> = outcome
        .results
        .iter()
        .map(|r| (r.name.as_str(), r.status, r.rc))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            ("a-fails", Status::Fail, 1),
            ("b-broken", Status::Fail, 2),
            ("c-passes", Status::Pass, 0),
        ]
    );
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_duplicate_suite_name_keeps_first_artifacts() {
    let ctx = TestContext::new();
    ctx.write_suite("a/smoke", "execute: echo FIRST\n");
    ctx.write_suite("b/smoke", "execute: |\n  echo SECOND\n  exit 1\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let verdicts: Vec<_> = outcome
        .results
        .iter()
        .map(|r| (r.name.as_str(), r.status, r.rc))
        .collect();
    assert_eq!(
        verdicts,
        vec![("smoke", Status::Pass, 0), ("smoke", Status::Fail, 2)]
    );
    let duplicate = outcome.results[1].message.as_deref().unwrap();
    assert!(duplicate.contains("suite name already used by"));

    // The second descriptor never ran and never wrote into the first one's dirs
    let proof = ctx.proof();
    let stdout = fs::read_to_string(proof.join("logs/smoke/execute.stdout.log")).unwrap();
    assert_eq!(stdout, "FIRST\n");
    let result: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(proof.join("results/smoke/result.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(result["status"], "pass");

    assert!(ctx
        .events()
        .iter()
        .any(|e| e.event.as_deref() == Some("suite_malformed")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_product_output_is_teed_across_suites() {
    use std::os::unix::fs::PermissionsExt;

    let mut ctx = TestContext::new();
    ctx.track(&["ls"]);
    ctx.config.product.command = "fakeprod".to_string();
    ctx.config.product.warning_token = "warn".to_string();

    let fake_bin = ctx.root().join("fakebin");
    fs::create_dir_all(&fake_bin).unwrap();
    let fake = fake_bin.join("fakeprod");
    fs::write(
        &fake,
        "#!/bin/sh\necho \"prod-out $2\"\necho 'WARN ls missing' >&2\n",
    )
    .unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

    for suite in ["s1", "s2"] {
        ctx.write_suite(
            suite,
            &format!(
                "execute: |\n  export PATH={}:$PATH\n  fakeprod --tag {} enable\n",
                fake_bin.display(),
                suite
            ),
        );
    }

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    for result in &outcome.results {
        assert_eq!(result.rc, 0, "{}", result.name);
        // No candidate for ls, but the product warned about it
        assert!(result.presence_ok, "{}", result.name);
        assert_eq!(result.status, Status::Pass);
    }

    let logs = ctx.proof().join("logs");
    assert_eq!(
        fs::read_to_string(logs.join("fakeprod.stdout.log")).unwrap(),
        "prod-out s1\nprod-out s2\n"
    );
    assert_eq!(
        fs::read_to_string(logs.join("fakeprod.stderr.log")).unwrap(),
        "WARN ls missing\nWARN ls missing\n"
    );
    let s1_stdout = fs::read_to_string(logs.join("s1/execute.stdout.log")).unwrap();
    assert!(s1_stdout.contains("prod-out s1"));
    let s1_stderr = fs::read_to_string(logs.join("s1/execute.stderr.log")).unwrap();
    assert!(s1_stderr.contains("WARN ls missing"));
}

#[tokio::test]
async fn test_script_timeout_is_recorded() {
    let mut ctx = TestContext::new();
    ctx.config.timeouts.suite_secs = 1;
    ctx.write_suite("sleepy", "execute: sleep 10\n");

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    let result = &outcome.results[0];
    assert_eq!(result.rc, 124);
    assert_eq!(result.status, Status::Fail);
    assert!(result.message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_unmatched_filter_aborts_before_any_stage() {
    let mut ctx = TestContext::new();
    ctx.write_suite("smoke", "execute: 'true'\n");
    ctx.config.suites.filter = "nope".to_string();

    let err = ctx.pipeline().run(Stage::All).await.unwrap_err();
    assert!(matches!(err, Error::NoSuitesMatched { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(!ctx.proof().exists());
    assert!(ctx.events().is_empty());
}

#[tokio::test]
async fn test_filter_runs_single_suite() {
    let mut ctx = TestContext::new();
    ctx.write_suite("one", "execute: 'true'\n");
    ctx.write_suite("two", "execute: exit 1\n");
    ctx.config.suites.filter = "one".to_string();

    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(!outcome.failed);
}

#[tokio::test]
async fn test_deps_reports_missing_packages() {
    let mut ctx = TestContext::new();
    ctx.pipeline().run(Stage::Deps).await.unwrap();
    let verified = ctx
        .events()
        .iter()
        .filter(|e| e.event.as_deref() == Some("verify_pkg"))
        .count();
    assert_eq!(verified, 2);

    ctx.config.deps.query_command = argv(&["false"]);
    let err = ctx.pipeline().run(Stage::Deps).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("base-devel, git"));
}

#[tokio::test]
async fn test_preflight_requires_tools() {
    let mut ctx = TestContext::new();
    ctx.pipeline().run(Stage::Preflight).await.unwrap();

    ctx.config.preflight.required_tools = vec!["definitely-not-installed-tool".to_string()];
    let err = ctx.pipeline().run(Stage::Preflight).await.unwrap_err();
    assert_eq!(err.exit_code(), 127);
}

#[tokio::test]
async fn test_build_failure_keeps_build_rc() {
    let mut ctx = TestContext::new();
    ctx.pipeline().run(Stage::Build).await.unwrap();
    assert!(ctx.proof().join("results/build_meta.json").exists());

    // The profile is appended as $1
    ctx.config.build.build_command = argv(&["sh", "-c", "exit 101", "sh"]);
    let err = ctx.pipeline().run(Stage::Build).await.unwrap_err();
    assert_eq!(err.exit_code(), 101);
    assert!(ctx
        .events()
        .iter()
        .any(|e| e.event.as_deref() == Some("stage_fail") && e.rc == Some(101)));
}

#[tokio::test]
async fn test_collect_reads_persisted_handoff() {
    let ctx = TestContext::new();
    ctx.write_suite("fails", "execute: exit 1\n");
    fs::write(&ctx.config.paths.product_audit_log, "audit line\n").unwrap();

    ctx.pipeline().run(Stage::RunSuites).await.unwrap();

    // Separate invocation, as a standalone `collect` would be
    let outcome = ctx.pipeline().run(Stage::Collect).await.unwrap();
    assert!(outcome.failed);
    assert_eq!(outcome.results.len(), 1);

    let proof = ctx.proof();
    let summary: RunSummary =
        serde_json::from_str(&fs::read_to_string(proof.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary.distro, "arch");
    assert_eq!(summary.container_id, "3f2a9c1d7b4e");
    assert_eq!(summary.harness_policy, HARNESS_POLICY);
    assert_eq!(summary.suites[0].name, "fails");
    assert!(summary.started_at.is_none());

    assert!(proof.join("logs/product-audit.log").exists());

    // The archived event log already holds the end of the collect stage
    let archived_events = fs::read_to_string(proof.join("logs/runner.jsonl")).unwrap();
    let last: EventRecord =
        serde_json::from_str(archived_events.lines().last().unwrap()).unwrap();
    assert_eq!(last.stage, "collect");
    assert_eq!(last.event.as_deref(), Some("stage_done"));
    assert!(archived_events.contains("\"packaging\""));

    let members = list_members(&proof.join("proofs.tar.gz")).unwrap();
    assert!(members.iter().any(|m| m == "summary.json"));
    assert!(members.iter().any(|m| m == "results/fails/result.json"));
    assert!(members.iter().any(|m| m == "logs/runner.jsonl"));
}

#[tokio::test]
async fn test_all_runs_every_stage() {
    let ctx = TestContext::new();
    ctx.write_suite("smoke", "execute: 'true'\n");

    let outcome = ctx.pipeline().run(Stage::All).await.unwrap();
    assert!(!outcome.failed);

    let summary: RunSummary = serde_json::from_str(
        &fs::read_to_string(ctx.proof().join("summary.json")).unwrap(),
    )
    .unwrap();
    assert!(summary.started_at.is_some());

    let events = ctx.events();
    let stages: Vec<&str> = events
        .iter()
        .filter(|e| e.event.as_deref() == Some("stage_start"))
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(stages, vec!["preflight", "deps", "build", "run_suites", "collect"]);
    assert!(events
        .iter()
        .all(|e| e.run_id.as_deref() == Some("run-test-1") && e.distro.as_deref() == Some("arch")));
}

#[tokio::test]
async fn test_empty_suite_tree_is_not_a_failure() {
    let ctx = TestContext::new();
    let outcome = ctx.pipeline().run(Stage::RunSuites).await.unwrap();
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.exit_code(), 0);
}

/// Render the test layout as a config file for the binary
fn write_config_file(ctx: &TestContext) -> PathBuf {
    let p = &ctx.config.paths;
    let toml = format!(
        r#"
[paths]
project_dir = "{project}"
tests_dir = "{tests}"
proof_root = "{proof}"
tracked_names_file = "{tracked}"
event_log = "{events}"
os_release = "{os_release}"
hostname_file = "{hostname}"
cgroup_file = "{cgroup}"
product_audit_log = "{audit}"
bin_dir = "{bin}"

[suites]
filter = ""
"#,
        project = p.project_dir.display(),
        tests = p.tests_dir().display(),
        proof = p.proof_root().display(),
        tracked = p.tracked_names_file().display(),
        events = p.event_log.display(),
        os_release = p.os_release.display(),
        hostname = p.hostname_file.display(),
        cgroup = p.cgroup_file.display(),
        audit = p.product_audit_log.display(),
        bin = p.bin_dir.display(),
    );
    let path = ctx.root().join("runner.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[test]
fn test_cli_exit_codes() {
    let ctx = TestContext::new();
    ctx.write_suite("fails", "execute: exit 1\n");
    let config = write_config_file(&ctx);
    let bin = env!("CARGO_BIN_EXE_container-runner");

    let output = Command::new(bin)
        .args(["internal-runner", "run-suites", "--config"])
        .arg(&config)
        .env_remove("TEST_FILTER")
        .env_remove("SUITE_TIMEOUT_SEC")
        .output()
        .expect("Failed to run container-runner");
    assert_eq!(output.status.code(), Some(1));

    let output = Command::new(bin)
        .args(["run-suites", "--config"])
        .arg(&config)
        .env("TEST_FILTER", "missing")
        .output()
        .expect("Failed to run container-runner");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("run-suites failed"));
    assert!(stderr.contains("missing"));
}
