//! `shifty program`: write a JEDEC file into a MachXO2's configuration flash.

use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use color_eyre::{Result, eyre::WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use protocol_host::{JedecFile, ProgramPlan, ProgressTracker, Stage, machxo2};
use tracing::info;

use crate::session::Session;

/// Erasing a large part leaves the device quiet for seconds.
pub const MIN_RESPONSE_GAP: Duration = Duration::from_secs(10);

pub fn load(file: &Path) -> Result<ProgramPlan> {
    let text = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let jed = JedecFile::parse(&text)
        .wrap_err_with(|| format!("{} is not a usable JEDEC file", file.display()))?;
    let plan = machxo2::program(&jed)?;
    info!(
        "{} rows, {} packets, {} checkpoints",
        jed.num_rows(),
        plan.batch.packets.len(),
        plan.checkpoints.len()
    );
    Ok(plan)
}

pub async fn run(session: &mut Session, plan: &ProgramPlan) -> Result<()> {
    let pb = ProgressBar::new(plan.total_rows() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(Stage::Prepare.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut tracker = ProgressTracker::new(plan);
    let result = session
        .stream(&plan.batch, |byte| {
            let reached = tracker.feed(byte)?;
            pb.inc(reached.rows as u64);
            if let Some(stage) = tracker.next_stage() {
                pb.set_message(stage.to_string());
            }
            Ok(if tracker.is_done() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .await;

    match &result {
        Ok(()) => pb.finish_with_message("done"),
        Err(_) => pb.abandon(),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_files_are_reported() {
        let err = load(Path::new("/nonexistent/blinky.jed")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn files_without_fuse_rows_are_rejected() {
        let path = std::env::temp_dir().join(format!("shifty-empty-{}.jed", std::process::id()));
        std::fs::write(&path, "\x02QF0*\x03").unwrap();
        let err = load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("not a usable JEDEC file"));
    }
}
