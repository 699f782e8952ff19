//! Stage 1: story analysis.
//!
//! One LLM call over the full script; the result seeds every later
//! prompt with genre, mood, and style context.

use crate::llm::{extract_and_parse, CompletionDriver, CompletionRequest};
use crate::pipeline::StageContext;
use crate::srt;
use crate::workbook::{StoryAnalysis, WorkbookStore, SHEET_STORY_ANALYSIS};
use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 2048;

/// Complete iff the sheet holds exactly one non-empty row.
pub fn is_complete(store: &WorkbookStore, _ctx: &StageContext<'_>) -> bool {
    let rows = store.read_sheet(SHEET_STORY_ANALYSIS);
    rows.len() == 1
}

/// Run the stage. A failed call is terminal: nothing downstream can
/// proceed without the analysis.
pub async fn run<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let script = srt::slice_text(ctx.entries, 1, ctx.total());
    let request = CompletionRequest::new(prompt(&script), TEMPERATURE, MAX_TOKENS)
        .with_system("You are a story analyst working for a visual production team.");

    let response = driver.complete(&request).await.map_err(|e| {
        StoryboardError::new(StoryboardErrorKind::StageFailed {
            stage: "story_analysis",
            message: e.to_string(),
        })
    })?;

    let analysis: StoryAnalysis = extract_and_parse(&response).map_err(|e| {
        StoryboardError::new(StoryboardErrorKind::StageFailed {
            stage: "story_analysis",
            message: format!("unusable analysis response: {e}"),
        })
    })?;

    store.write_story_analysis(&analysis)?;
    ctx.progress.info(&format!(
        "story analysis: genre '{}', mood '{}'",
        analysis.genre, analysis.mood
    ));
    Ok(())
}

fn prompt(script: &str) -> String {
    format!(
        "Read the following narration script and describe it for the \
         production team.\n\n\
         Script:\n{script}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"genre\": \"...\", \"mood\": \"...\", \"style\": \"...\", \"summary\": \"...\"}}\n\
         - genre: one or two words\n\
         - mood: the emotional tone\n\
         - style: a visual style suited to the story\n\
         - summary: 2-3 sentences covering the full arc"
    )
}
