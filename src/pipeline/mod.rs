//! The seven-stage script-to-scene pipeline.
//!
//! The stage runner drives stages in order, skipping any stage whose
//! output sheet already holds a complete artifact, so an interrupted run
//! resumes from its last checkpoint. No stage runs concurrently with
//! another; parallelism exists only inside a stage via the batch
//! executor. Sheets are only written after the stage's validator has
//! accepted the data, which together with atomic sheet replacement keeps
//! the workbook consistent under arbitrary interruption.

mod analysis;
mod director;
mod entities;
mod planning;
mod prompts;
mod segmentation;
mod synth;

pub use synth::{FallbackContext, PromptPair, SceneSynthesizer};

use crate::config::PipelineConfig;
use crate::coverage::Span;
use crate::llm::CompletionDriver;
use crate::progress::ProgressLog;
use crate::project::ProjectPaths;
use crate::srt::{self, SrtEntry};
use crate::workbook::{WorkbookStats, WorkbookStore};
use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};

/// Inputs shared by every stage.
pub struct StageContext<'a> {
    pub entries: &'a [SrtEntry],
    pub config: &'a PipelineConfig,
    pub progress: &'a ProgressLog,
}

impl StageContext<'_> {
    /// N: the highest SRT index.
    pub fn total(&self) -> u32 {
        self.entries.len() as u32
    }
}

/// How the runner handled one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Output sheet already complete, nothing executed
    Skipped,
    /// Stage executed and its output was accepted
    Completed,
}

/// Per-stage record in the run report.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: &'static str,
    pub outcome: StageOutcome,
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub stats: WorkbookStats,
}

impl RunReport {
    /// One-paragraph human summary for the CLI.
    pub fn summary(&self) -> String {
        let executed = self
            .stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Completed)
            .count();
        format!(
            "{} stages executed, {} skipped; {} segments, {} characters, {} locations, {}/{} scenes prompted",
            executed,
            self.stages.len() - executed,
            self.stats.segments,
            self.stats.characters,
            self.stats.locations,
            self.stats.scenes_prompted,
            self.stats.scenes_total,
        )
    }
}

/// Run the full pipeline for one project.
///
/// # Errors
///
/// `InputInvalid` for a missing or malformed SRT; stage errors propagate
/// after whatever the stage produced has been persisted, so a rerun
/// resumes from the last accepted sheet.
pub async fn run_project<D: CompletionDriver>(
    driver: &D,
    config: &PipelineConfig,
    project: &ProjectPaths,
) -> StoryboardResult<RunReport> {
    let srt_path = project.srt_path();
    let raw = std::fs::read_to_string(&srt_path).map_err(|e| {
        StoryboardError::new(StoryboardErrorKind::InputInvalid(format!(
            "cannot read {}: {e}",
            srt_path.display()
        )))
    })?;
    let entries = srt::parse_srt(&raw)?;

    let progress = ProgressLog::new(project.progress_log_path());
    let mut store = WorkbookStore::open(project.workbook_path())?;

    progress.info(&format!(
        "pipeline start: project {} with {} SRT entries",
        project.code,
        entries.len()
    ));

    let ctx = StageContext {
        entries: &entries,
        config,
        progress: &progress,
    };

    let mut stages = Vec::new();

    if analysis::is_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "story_analysis");
    } else {
        begin(&ctx, "story_analysis");
        let result = analysis::run(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "story_analysis", result)?;
    }

    if segmentation::is_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "segmentation");
    } else {
        begin(&ctx, "segmentation");
        let result = segmentation::run(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "segmentation", result)?;
    }

    if entities::characters_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "characters");
    } else {
        begin(&ctx, "characters");
        let result = entities::run_characters(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "characters", result)?;
    }

    if entities::locations_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "locations");
    } else {
        begin(&ctx, "locations");
        let result = entities::run_locations(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "locations", result)?;
    }

    if director::is_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "director_plan");
    } else {
        begin(&ctx, "director_plan");
        let result = director::run(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "director_plan", result)?;
    }

    if planning::is_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "scene_planning");
    } else {
        begin(&ctx, "scene_planning");
        let result = planning::run(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "scene_planning", result)?;
    }

    if prompts::is_complete(&store, &ctx) {
        skip(&ctx, &mut stages, "scene_prompts");
    } else {
        begin(&ctx, "scene_prompts");
        let result = prompts::run(driver, &ctx, &mut store).await;
        finish(&ctx, &mut stages, "scene_prompts", result)?;
    }

    let report = RunReport {
        stages,
        stats: store.stats(),
    };
    progress.info(&format!("pipeline done: {}", report.summary()));
    Ok(report)
}

fn skip(ctx: &StageContext<'_>, reports: &mut Vec<StageReport>, name: &'static str) {
    ctx.progress
        .info(&format!("[{name}] SKIPPED (already complete)"));
    reports.push(StageReport {
        name,
        outcome: StageOutcome::Skipped,
    });
}

fn begin(ctx: &StageContext<'_>, name: &'static str) {
    ctx.progress.info(&format!("[{name}] started"));
}

fn finish(
    ctx: &StageContext<'_>,
    reports: &mut Vec<StageReport>,
    name: &'static str,
    result: StoryboardResult<()>,
) -> StoryboardResult<()> {
    match result {
        Ok(()) => {
            ctx.progress.info(&format!("[{name}] done"));
            reports.push(StageReport {
                name,
                outcome: StageOutcome::Completed,
            });
            Ok(())
        }
        Err(e) => {
            let last_ok = reports.last().map(|r| r.name).unwrap_or("none");
            ctx.progress.error(&format!(
                "[{name}] failed after stage '{last_ok}': {e}"
            ));
            Err(e)
        }
    }
}

/// Spans of the director-plan entries, for coverage checks.
pub(crate) fn plan_spans(entries: &[crate::workbook::DirectorPlanEntry]) -> Vec<Span> {
    entries
        .iter()
        .map(|e| Span::new(e.srt_start_index, e.srt_end_index))
        .collect()
}

/// Spans of the segments, for coverage checks.
pub(crate) fn segment_spans(segments: &[crate::workbook::Segment]) -> Vec<Span> {
    segments
        .iter()
        .map(|s| Span::new(s.srt_start_index, s.srt_end_index))
        .collect()
}
