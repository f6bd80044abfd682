//! The `gradebook report` and `gradebook sweep` commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::MissedTickBehavior;

use gradebook_core::model::{ReportKind, StudentId};
use gradebook_report::ArtifactCache;

use super::context::{display_path, Context};

pub async fn execute(
    level: String,
    year: String,
    student: Option<u64>,
    kind: String,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let kind: ReportKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let ctx = Context::load(config_path)?;
    let level = ctx.engine.require_level(&level).await?;
    let year = ctx.engine.require_academic_year(&year).await?;
    let generator = ctx.report_generator()?;

    tracing::info!(level = %level.name, year = %year.name, %kind, "generating report");
    let outcome = generator
        .generate_report(level.id, student.map(StudentId), year.id, kind)
        .await?;
    ctx.save()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let suffix = if outcome.cached { " (cached)" } else { "" };
    println!("Report: {}{suffix}", display_path(&outcome.artifact.path));
    println!("URL: {}", outcome.url);
    if !outcome.cached {
        println!("Students: {}", outcome.students);
    }
    for failure in &outcome.failures {
        eprintln!("  student {}: {}", failure.student_id, failure.message);
    }

    Ok(())
}

pub async fn sweep(
    retention_days: Option<u32>,
    every: Option<Duration>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let ctx = Context::load(config_path)?;
    let retention_days = retention_days.unwrap_or(ctx.config.retention_days);
    let cache = ArtifactCache::new(ctx.store.clone());

    if let Some(every) = every {
        println!(
            "Sweeping reports older than {retention_days} day(s) every {}s; Ctrl-C to stop",
            every.as_secs()
        );
        let sweeper = cache.spawn_sweeper(retention_days, every);
        // The sweeper edits the in-memory store; persist it on the same cadence.
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stopped: Result<()> = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = ctx.save() {
                        break Err(e);
                    }
                }
                signal = tokio::signal::ctrl_c() => break signal.map_err(Into::into),
            }
        };
        sweeper.abort();
        ctx.save()?;
        return stopped;
    }

    let report = cache
        .sweep_expired_artifacts(retention_days, Utc::now())
        .await?;
    ctx.save()?;

    println!(
        "Removed {} expired report(s), deleted {} file(s) (retention {} day(s))",
        report.removed.len(),
        report.files_deleted,
        retention_days
    );
    Ok(())
}
