//! Stage 6: scene planning.
//!
//! Director entries go out in batches; each call returns per-scene
//! camera/lighting/composition detail. A failed batch still yields rows
//! (with empty fields) so every director `scene_id` has a planning row
//! and the stage reads as complete on resume.

use crate::llm::{extract_and_parse, run_batch, CompletionDriver, CompletionRequest};
use crate::pipeline::StageContext;
use crate::srt;
use crate::workbook::{
    DirectorPlanEntry, PlanStatus, ScenePlan, WorkbookStore, SHEET_SCENE_PLANNING,
};
use crate::StoryboardResult;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Deserialize)]
struct RawScenePlan {
    #[serde(default)]
    scene_id: String,
    #[serde(default)]
    camera: String,
    #[serde(default)]
    lighting: String,
    #[serde(default)]
    composition: String,
}

/// Complete iff every director `scene_id` has a planning row.
pub fn is_complete(store: &WorkbookStore, _ctx: &StageContext<'_>) -> bool {
    if !store.sheet_exists(SHEET_SCENE_PLANNING) {
        return false;
    }
    let planned: HashSet<String> = store
        .scene_planning()
        .into_iter()
        .map(|p| p.scene_id)
        .collect();
    let plan = store.director_plan();
    !plan.is_empty() && plan.iter().all(|d| planned.contains(&d.scene_id))
}

pub async fn run<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let mut plan = store.director_plan();
    let batches: Vec<Vec<DirectorPlanEntry>> = plan
        .chunks(ctx.config.stage6_batch_size.max(1))
        .map(<[DirectorPlanEntry]>::to_vec)
        .collect();

    let outcome = run_batch(
        batches.clone(),
        ctx.config.max_parallel_api,
        |_index, batch| {
            let prompt = batch_prompt(&batch, ctx.entries);
            async move {
                let request = CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS);
                let response = driver.complete(&request).await?;
                let raw: Vec<RawScenePlan> = extract_and_parse(&response)?;
                Ok(raw)
            }
        },
    )
    .await;

    for failure in &outcome.failures {
        ctx.progress.warn(&format!(
            "scene planning batch {} failed, its scenes keep empty detail: {}",
            failure.index, failure.error
        ));
    }

    let mut by_scene: HashMap<String, RawScenePlan> = HashMap::new();
    for raw in outcome.results.into_iter().flatten().flatten() {
        if !raw.scene_id.trim().is_empty() {
            by_scene.insert(raw.scene_id.trim().to_string(), raw);
        }
    }

    // One row per director entry, empty detail where the LLM gave none.
    let rows: Vec<ScenePlan> = plan
        .iter()
        .map(|entry| match by_scene.get(&entry.scene_id) {
            Some(raw) => ScenePlan {
                scene_id: entry.scene_id.clone(),
                camera: raw.camera.trim().to_string(),
                lighting: raw.lighting.trim().to_string(),
                composition: raw.composition.trim().to_string(),
            },
            None => ScenePlan {
                scene_id: entry.scene_id.clone(),
                ..ScenePlan::default()
            },
        })
        .collect();

    store.write_scene_planning(&rows)?;

    for entry in &mut plan {
        entry.status = entry.status.advanced_to(PlanStatus::Planned);
    }
    store.write_director_plan(&plan)?;

    ctx.progress.info(&format!(
        "scene planning: {} of {} scenes detailed",
        by_scene.len(),
        rows.len()
    ));
    Ok(())
}

fn batch_prompt(batch: &[DirectorPlanEntry], entries: &[crate::srt::SrtEntry]) -> String {
    let scene_lines = batch
        .iter()
        .map(|d| {
            format!(
                "{}: moment \"{}\", text: {}",
                d.scene_id,
                d.visual_moment,
                srt::slice_text(entries, d.srt_start_index, d.srt_end_index)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a cinematographer. For each scene below, give camera, \
         lighting, and composition notes.\n\n\
         Scenes:\n{scene_lines}\n\n\
         Respond with ONLY a JSON array; one element per scene, same scene_id:\n\
         [{{\"scene_id\": \"...\", \"camera\": \"...\", \"lighting\": \"...\", \
         \"composition\": \"...\"}}]"
    )
}
