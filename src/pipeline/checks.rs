//! The fail-fast stages: preflight, deps and build

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::common::Result;
use crate::events::{Event, Level};
use crate::exec::{self, ExecOptions, ExecutionResult, UNRUNNABLE_RC};
use crate::report::write_json;

use super::{Pipeline, Stage};

/// Probe output kept in event messages
const PROBE_EXCERPT: usize = 200;

/// Written to `results/build_meta.json` after a successful build
#[derive(Debug, Serialize)]
struct BuildMeta<'a> {
    profile: &'a str,
    toolchain: &'a str,
    command: String,
    duration_ms: u64,
    finished_at: String,
}

impl Pipeline {
    /// Report the environment, require the configured tools and run the
    /// quick build check
    pub async fn preflight(&self) -> Result<()> {
        let stage = Stage::Preflight;
        let started = self.stage_started(stage);
        let cfg = &self.config.preflight;

        let os_release = &self.host.os_release;
        println!(
            "  os-release: ID={} VERSION_ID={}",
            os_release.get("ID").unwrap_or("?"),
            os_release.get("VERSION_ID").unwrap_or("?")
        );
        let info = os_info::get();
        let arch = info.architecture().unwrap_or("unknown");
        println!(
            "  host: {} {} ({})",
            info.os_type(),
            info.version(),
            arch
        );
        tracing::info!(os = %info.os_type(), version = %info.version(), arch, "host operating system");

        if let Some(dir) = &cfg.package_db_dir {
            self.report_package_dbs(dir);
        }

        for tool in &cfg.required_tools {
            match which::which(tool) {
                Ok(path) => println!(
                    "  {} {} {}",
                    "✓".green(),
                    tool,
                    path.display().to_string().dimmed()
                ),
                Err(_) => {
                    return Err(self.fail(
                        stage,
                        UNRUNNABLE_RC,
                        format!("required tool '{}' not found on PATH", tool),
                    ))
                }
            }
        }

        for probe in &cfg.version_probes {
            self.probe(stage, probe.clone()).await;
        }

        if !cfg.check_command.is_empty() {
            let opts = ExecOptions::default()
                .in_dir(&self.config.paths.project_dir)
                .with_timeout_secs(self.config.timeouts.check_secs);
            let res = exec::run(cfg.check_command.clone(), &opts).await;
            self.events
                .emit(Event::command(stage.label(), "cmd_exec", &res));
            if !res.success() {
                return Err(self.fail(
                    stage,
                    res.rc,
                    format!("build check '{}' failed", res.display),
                ));
            }
            println!("  {} {}", "✓".green(), res.display.dimmed());
        }

        self.stage_done(stage, started);
        Ok(())
    }

    /// Verify every required package is already installed. Nothing is
    /// installed here; the image must carry them.
    pub async fn deps(&self) -> Result<()> {
        let stage = Stage::Deps;
        let started = self.stage_started(stage);
        let cfg = &self.config.deps;
        let opts =
            ExecOptions::default().with_timeout_secs(self.config.timeouts.package_query_secs);

        let mut missing = Vec::new();
        for package in &cfg.packages {
            let mut argv = cfg.query_command.clone();
            argv.push(package.clone());
            let res = exec::run(argv, &opts).await;

            let mut event = Event::command(stage.label(), "verify_pkg", &res).message(package.clone());
            if res.success() {
                println!("  {} {}", "✓".green(), package);
            } else {
                println!("  {} {}", "✗".red(), package);
                event = event.level(Level::Error);
                missing.push(package.clone());
            }
            self.events.emit(event);
        }

        if !missing.is_empty() {
            return Err(self.fail(
                stage,
                1,
                format!("missing packages (bake them into the image): {}", missing.join(", ")),
            ));
        }

        self.stage_done(stage, started);
        Ok(())
    }

    /// Select the toolchain, record provenance and build the product
    pub async fn build(&self) -> Result<()> {
        let stage = Stage::Build;
        let started = self.stage_started(stage);
        let cfg = &self.config.build;
        let project_dir = &self.config.paths.project_dir;

        if !cfg.toolchain_command.is_empty() {
            let mut argv = cfg.toolchain_command.clone();
            argv.push(cfg.toolchain.clone());
            let opts = ExecOptions::default()
                .in_dir(project_dir)
                .with_timeout_secs(self.config.timeouts.toolchain_secs);
            let res = exec::run(argv, &opts).await;
            self.events
                .emit(Event::command(stage.label(), "cmd_exec", &res));
            if !res.success() {
                return Err(self.fail(
                    stage,
                    res.rc,
                    format!("toolchain selection '{}' failed", res.display),
                ));
            }
        }

        for probe in &cfg.provenance_probes {
            self.probe(stage, probe.clone()).await;
        }

        let mut argv = cfg.build_command.clone();
        argv.push(cfg.profile.clone());
        let opts = ExecOptions::default()
            .in_dir(project_dir)
            .with_timeout_secs(self.config.timeouts.build_secs);
        println!("  $ {}", exec::display_command(&argv).dimmed());
        let res = exec::run(argv, &opts).await;
        self.events
            .emit(Event::command(stage.label(), "cmd_exec", &res));
        if !res.success() {
            if !res.stderr.is_empty() {
                eprintln!("{}", res.stderr.trim_end());
            }
            return Err(self.fail(
                stage,
                res.rc,
                format!("build '{}' failed", res.display),
            ));
        }

        self.write_build_meta(&res);
        self.stage_done(stage, started);
        Ok(())
    }

    /// Run a non-fatal informational command and log an excerpt of its output
    async fn probe(&self, stage: Stage, argv: Vec<String>) -> ExecutionResult {
        let opts = ExecOptions::default().with_timeout_secs(self.config.timeouts.probe_secs);
        let res = exec::run(argv, &opts).await;
        let excerpt: String = res.stdout.trim().chars().take(PROBE_EXCERPT).collect();
        if res.success() {
            println!("  {} {}", res.display.dimmed(), excerpt.lines().next().unwrap_or(""));
        } else {
            println!("  {} {} (rc={})", "!".yellow(), res.display.dimmed(), res.rc);
        }
        self.events.emit(
            Event::command(stage.label(), "cmd_exec", &res)
                .level(if res.success() { Level::Info } else { Level::Warn })
                .message(excerpt),
        );
        res
    }

    /// Print the modification time of every `*.db` in the package database dir
    fn report_package_dbs(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "no package databases to report");
                return;
            }
        };
        let mut dbs: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "db"))
            .collect();
        dbs.sort();

        for db in dbs {
            let modified = std::fs::metadata(&db)
                .and_then(|m| m.modified())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_else(|_| "?".to_string());
            println!("  package db {} updated {}", db.display(), modified);
        }
    }

    fn write_build_meta(&self, res: &ExecutionResult) {
        let meta = BuildMeta {
            profile: &self.config.build.profile,
            toolchain: &self.config.build.toolchain,
            command: res.display.clone(),
            duration_ms: res.elapsed_ms,
            finished_at: Utc::now().to_rfc3339(),
        };
        let path = self.layout.results_dir().join("build_meta.json");
        if let Err(e) = write_json(&path, &meta) {
            self.soft_failure(
                Stage::Build,
                None,
                format!("cannot write {}: {}", path.display(), e),
            );
        }
    }
}
