//! Subcommand implementations. Each returns whether the outcome was healthy,
//! which becomes the exit status.

use std::time::Duration;

use engine_control::{ControlHealth, ServiceHealth};
use ownership::{EngineProcess, Ownership};
use readiness::{PermissionSnapshot, ValidationReport, ValidationState};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::{
    app::App,
    cli::TokenAction,
    error::{Error, Result},
};

/// Budget for reload and restart requests.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Print a report as text or JSON.
fn print_report(report: &ValidationReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    match report.state {
        ValidationState::Checking => println!("state: checking"),
        ValidationState::Success => println!("state: ready"),
        ValidationState::Failed { blocking, total } => {
            println!("state: failed ({blocking} blocking of {total} issues)")
        }
    }
    if let Some(engine) = report.engine {
        println!("engine: {engine:?}");
    }
    for issue in &report.issues {
        let mark = if issue.is_blocking() { "!" } else { "-" };
        println!("  {mark} {issue}");
    }
    Ok(())
}

/// One forced validation, waiting out any warm-up hold.
pub async fn status(app: &App, as_json: bool) -> Result<bool> {
    let orch = &app.orchestrator;
    let mut rx = orch.subscribe();
    orch.perform_validation(true).await;
    let cfg = app.settings.orchestrator_cfg();
    let settle = cfg.warmup_window + cfg.readiness_timeout * 2;
    let settled = timeout(settle, async {
        while rx.borrow_and_update().state == ValidationState::Checking {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if settled.is_err() {
        warn!(?settle, "validation did not settle");
    }
    orch.cancel();
    let report = orch.report();
    print_report(&report, as_json)?;
    Ok(report.state == ValidationState::Success)
}

/// Validate on an interval, printing each published report.
pub async fn watch(app: &App, interval: Duration, as_json: bool) -> Result<bool> {
    let orch = app.orchestrator.clone();
    orch.set_startup_mode(true);
    let mut rx = orch.subscribe();
    let driver = tokio::spawn({
        let orch = orch.clone();
        async move {
            loop {
                orch.perform_validation(false).await;
                sleep(interval).await;
            }
        }
    });
    let mut last: Option<ValidationState> = None;
    while rx.changed().await.is_ok() {
        let report = rx.borrow_and_update().clone();
        if as_json || last != Some(report.state) || !report.issues.is_empty() {
            print_report(&report, as_json)?;
        }
        last = Some(report.state);
    }
    driver.abort();
    Ok(true)
}

/// Print one subject's permission line.
fn print_snapshot(snap: &PermissionSnapshot, as_json: bool) -> Result<()> {
    if as_json {
        let subjects: Vec<_> = snap
            .subjects()
            .map(|(subject, set)| {
                json!({
                    "subject": subject,
                    "accessibility": set.accessibility,
                    "input_monitoring": set.input_monitoring,
                    "source": set.source,
                    "confidence": set.confidence,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&subjects)?);
        return Ok(());
    }
    for (subject, set) in snap.subjects() {
        println!(
            "{subject}: accessibility={} input_monitoring={} (source {}, {:?} confidence)",
            set.accessibility, set.input_monitoring, set.source, set.confidence
        );
    }
    Ok(())
}

/// Print the permission snapshot.
pub async fn permissions(app: &App, refresh: bool, as_json: bool) -> Result<bool> {
    let snap = if refresh {
        app.oracle.force_refresh().await
    } else {
        app.oracle.current_snapshot().await
    };
    print_snapshot(&snap, as_json)?;
    Ok(snap.is_system_ready())
}

/// Print ownership and conflicts.
pub fn ownership(app: &App, as_json: bool) -> Result<bool> {
    let own = app.tracker.check_ownership()?;
    let conflicts = app.tracker.detect_conflicts()?;
    let record = app.tracker.record()?;
    if as_json {
        let (owned, pid) = own.as_pair();
        let value = json!({
            "owned": owned,
            "pid": pid,
            "orphaned": matches!(own, Ownership::Orphaned(_)),
            "command": record.as_ref().map(|r| r.command.clone()),
            "conflicts": conflicts
                .conflicts
                .iter()
                .map(|p| json!({ "pid": p.pid, "command": p.command }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        match own {
            Ownership::Absent => println!("no engine owned"),
            Ownership::Owned(pid) => println!("owned engine: pid {pid}"),
            Ownership::Orphaned(pid) => {
                println!("orphaned engine: pid {pid} (run `keygate reclaim`)")
            }
        }
        if let Some(rec) = &record {
            println!("  command: {}", rec.command);
            println!("  owner: {}", rec.owner);
        }
        for p in &conflicts.conflicts {
            println!("conflict: pid {} {}", p.pid, p.command);
        }
    }
    Ok(!matches!(own, Ownership::Orphaned(_)) && !conflicts.has_conflicts())
}

/// Reclaim an orphaned engine.
pub async fn reclaim(app: &App) -> Result<bool> {
    match app.tracker.kill_orphaned_process().await? {
        Some(r) if r.forced => println!("killed orphaned engine {} (SIGKILL)", r.pid),
        Some(r) => println!("terminated orphaned engine {}", r.pid),
        None => println!("nothing to reclaim"),
    }
    Ok(true)
}

/// Launch the engine unless we already own one.
pub async fn start(app: &App, no_wait: bool) -> Result<bool> {
    if let Ownership::Owned(pid) = app.tracker.check_ownership()? {
        println!("engine already running: pid {pid}");
        return Ok(true);
    }
    let launch = app.settings.launch_cfg().ok_or(Error::NoEngine)?;
    // The engine authenticates clients with this token.
    app.tokens.ensure_token()?;
    let mut engine = EngineProcess::new(launch);
    let pid = engine.start(&app.tracker)?;
    // Ownership now lives in the PID record, not in this process.
    engine.detach();
    println!("engine started: pid {pid}");
    if no_wait {
        return Ok(true);
    }
    let wait = app.settings.orchestrator_cfg().readiness_timeout;
    let ready = ControlHealth::new(app.control.clone())
        .wait_for_service_ready(wait)
        .await;
    if ready {
        app.oracle.invalidate_cache().await;
        println!("engine control endpoint ready");
    } else {
        println!("engine control endpoint not ready after {wait:?}");
    }
    Ok(ready)
}

/// Stop the engine we own.
pub async fn stop(app: &App) -> Result<bool> {
    match app.tracker.stop_owned_process().await? {
        Some(pid) => {
            app.oracle.invalidate_cache().await;
            println!("engine {pid} stopped");
            Ok(true)
        }
        None => {
            println!("no owned engine to stop");
            Ok(false)
        }
    }
}

/// Token management.
pub fn token(app: &App, action: TokenAction) -> Result<bool> {
    let tokens = &app.tokens;
    match action {
        TokenAction::Ensure => {
            tokens.ensure_token()?;
            println!("token present at {}", tokens.cfg().token_file.display());
            Ok(true)
        }
        TokenAction::Show => match tokens.current_token()? {
            Some(t) => {
                println!("{t}");
                Ok(true)
            }
            None => {
                println!("no token");
                Ok(false)
            }
        },
        TokenAction::Set { token } => {
            tokens.set_token(token.trim())?;
            info!("token replaced");
            Ok(true)
        }
        TokenAction::Clear => {
            tokens.clear_token()?;
            println!("token cleared");
            Ok(true)
        }
    }
}

/// Ask the engine to reload its configuration.
pub async fn reload(app: &App) -> Result<bool> {
    app.control.reload_config(COMMAND_TIMEOUT).await?;
    println!("engine configuration reloaded");
    Ok(true)
}

/// Ask the engine to restart and refresh permissions afterwards.
pub async fn restart(app: &App, as_json: bool) -> Result<bool> {
    let accepted = app.control.restart(COMMAND_TIMEOUT).await?;
    if !accepted {
        println!("engine refused to restart");
        return Ok(false);
    }
    let wait = app.settings.orchestrator_cfg().readiness_timeout;
    let ready = ControlHealth::new(app.control.clone())
        .wait_for_service_ready(wait)
        .await;
    let snap = app.oracle.force_refresh().await;
    print_snapshot(&snap, as_json)?;
    Ok(ready && snap.is_system_ready())
}
