//! storyboard: the script-to-scene pipeline.
//!
//! Consumes a subtitle (SRT) file and produces a fully populated
//! workbook describing every scene needed for downstream image/video
//! generation. The pipeline runs seven stages over an untrusted LLM
//! endpoint and guarantees, regardless of what the LLM returns:
//!
//! - **Complete SRT coverage**: every subtitle index belongs to exactly
//!   one segment and exactly one director-plan entry.
//! - **Consistent cross-references**: character/location IDs in a scene
//!   prompt match the scene's recorded metadata.
//! - **Idempotent resumability**: the workbook is the only checkpoint;
//!   rerunning a finished or interrupted project never redoes finished
//!   work.
//! - **Bounded concurrency**: fan-out within a stage is capped; stages
//!   never overlap.

#![forbid(unsafe_code)]

mod cli;
mod config;
mod coverage;
mod error;
mod llm;
mod pipeline;
mod progress;
mod project;
mod refs;
mod srt;
mod workbook;

pub use cli::Cli;
pub use config::{PipelineConfig, VideoMode};
pub use coverage::{analyze, chunk_span, CoverageReport, Span};
pub use error::{StoryboardError, StoryboardErrorKind, StoryboardResult};
pub use llm::{
    extract_and_parse, extract_json, parse_json, run_batch, BatchOutcome, CompletionDriver,
    CompletionRequest, HttpCompletionClient, TaskFailure,
};
pub use pipeline::{
    run_project, FallbackContext, PromptPair, RunReport, SceneSynthesizer, StageOutcome,
    StageReport,
};
pub use progress::ProgressLog;
pub use project::{import_project, remove_inbox_copy, scan_inbox, ProjectPaths};
pub use refs::{ExtractedRefs, RefResolver};
pub use srt::{numbered_script, parse_srt, render_srt, slice_text, SrtEntry};
pub use workbook::{
    Character, DirectorPlanEntry, Location, PlanStatus, Scene, ScenePlan, Segment, StoryAnalysis,
    WorkbookStats, WorkbookStore, DIRECTOR_PLAN_COLUMNS, SCENE_COLUMNS, SHEET_CHARACTERS,
    SHEET_DIRECTOR_PLAN, SHEET_LOCATIONS, SHEET_META, SHEET_SCENES, SHEET_SCENE_PLANNING,
    SHEET_SEGMENTS, SHEET_STORY_ANALYSIS,
};
