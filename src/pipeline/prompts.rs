//! Stage 7: scene prompts.
//!
//! Director entries without a scene row yet go out in batches; every
//! batch that returns (or fails) is synthesized into full scene rows and
//! persisted immediately, so a killed run resumes with only the
//! remaining scenes and preserves prior rows byte for byte. The
//! synthesizer guarantees a row per entry even when a whole batch fails.

use crate::llm::{extract_and_parse, CompletionDriver, CompletionRequest};
use crate::pipeline::synth::{PromptPair, SceneSynthesizer};
use crate::pipeline::StageContext;
use crate::srt;
use crate::workbook::{
    Character, DirectorPlanEntry, Location, PlanStatus, Segment, WorkbookStore,
};
use crate::StoryboardResult;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Deserialize)]
struct RawScenePrompt {
    #[serde(default)]
    scene_id: String,
    #[serde(default)]
    img_prompt: String,
    #[serde(default)]
    video_prompt: String,
}

/// Complete iff the scenes sheet holds one row per director entry.
pub fn is_complete(store: &WorkbookStore, _ctx: &StageContext<'_>) -> bool {
    let plan = store.director_plan();
    if plan.is_empty() {
        return false;
    }
    let present: HashSet<String> = store.scenes().into_iter().map(|s| s.scene_id).collect();
    plan.len() == present.len() && plan.iter().all(|d| present.contains(&d.scene_id))
}

pub async fn run<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let mut plan = store.director_plan();
    let segments: HashMap<u32, Segment> = store
        .segments()
        .into_iter()
        .map(|s| (s.segment_id, s))
        .collect();
    let characters = store.characters();
    let locations = store.locations();

    let mut scenes = store.scenes();
    let present: HashSet<String> = scenes.iter().map(|s| s.scene_id.clone()).collect();

    // Resume point: only entries without a scene row are processed.
    let remaining: Vec<DirectorPlanEntry> = plan
        .iter()
        .filter(|d| !present.contains(&d.scene_id))
        .cloned()
        .collect();
    if remaining.is_empty() {
        scenes.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        store.write_scenes(&scenes)?;
        return Ok(());
    }
    ctx.progress.info(&format!(
        "scene prompts: {} of {} scenes still needed",
        remaining.len(),
        plan.len()
    ));

    let synthesizer = SceneSynthesizer::new(
        ctx.config.video_mode,
        ctx.config.fallback_duplicate_ratio,
    );
    let character_table = character_table(&characters);
    let location_table = location_table(&locations);

    let batches: Vec<Vec<DirectorPlanEntry>> = remaining
        .chunks(ctx.config.stage7_batch_size.max(1))
        .map(<[DirectorPlanEntry]>::to_vec)
        .collect();
    let total_batches = batches.len();

    let mut completions = stream::iter(batches.iter().enumerate().map(|(index, batch)| {
        let prompt = batch_prompt(batch, ctx.entries, &character_table, &location_table);
        async move {
            let request = CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS);
            let outcome = match driver.complete(&request).await {
                Ok(response) => extract_and_parse::<Vec<RawScenePrompt>>(&response),
                Err(e) => Err(e),
            };
            (index, outcome)
        }
    }))
    .buffer_unordered(ctx.config.max_parallel_api.max(1));

    let mut done_batches = 0usize;
    while let Some((index, outcome)) = completions.next().await {
        let batch = &batches[index];
        let prompt_map = match outcome {
            Ok(raw) => collect_prompts(raw),
            Err(e) => {
                // The synthesizer fills every scene with fallbacks.
                ctx.progress.warn(&format!(
                    "scene prompt batch {index} failed ({e}); using fallback prompts"
                ));
                HashMap::new()
            }
        };

        let new_scenes =
            synthesizer.synthesize_batch(batch, &prompt_map, &segments, ctx.entries);
        let prompted: HashSet<String> =
            new_scenes.iter().map(|s| s.scene_id.clone()).collect();
        scenes.extend(new_scenes);
        scenes.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));
        store.write_scenes(&scenes)?;

        for entry in &mut plan {
            if prompted.contains(&entry.scene_id) {
                entry.status = entry.status.advanced_to(PlanStatus::Prompted);
            }
        }
        store.write_director_plan(&plan)?;

        done_batches += 1;
        ctx.progress.info(&format!(
            "scene prompts: batch {}/{} persisted ({} scenes total)",
            done_batches,
            total_batches,
            scenes.len()
        ));
    }

    Ok(())
}

fn collect_prompts(raw: Vec<RawScenePrompt>) -> HashMap<String, PromptPair> {
    raw.into_iter()
        .filter(|r| !r.scene_id.trim().is_empty())
        .map(|r| {
            (
                r.scene_id.trim().to_string(),
                PromptPair {
                    img_prompt: r.img_prompt,
                    video_prompt: r.video_prompt,
                },
            )
        })
        .collect()
}

fn character_table(characters: &[Character]) -> String {
    if characters.is_empty() {
        return "(none)".to_string();
    }
    characters
        .iter()
        .map(|c| format!("{} ({}.png): {}, {}", c.character_id, c.character_id, c.name, c.appearance))
        .collect::<Vec<_>>()
        .join("\n")
}

fn location_table(locations: &[Location]) -> String {
    if locations.is_empty() {
        return "(none)".to_string();
    }
    locations
        .iter()
        .map(|l| format!("{} ({}.png): {}, {}", l.location_id, l.location_id, l.name, l.atmosphere))
        .collect::<Vec<_>>()
        .join("\n")
}

fn batch_prompt(
    batch: &[DirectorPlanEntry],
    entries: &[crate::srt::SrtEntry],
    character_table: &str,
    location_table: &str,
) -> String {
    let scene_lines = batch
        .iter()
        .map(|d| {
            format!(
                "{}: moment \"{}\", characters {:?}, location \"{}\", text: {}",
                d.scene_id,
                d.visual_moment,
                d.characters_used,
                d.location_used,
                srt::slice_text(entries, d.srt_start_index, d.srt_end_index)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You write image and video generation prompts for story scenes.\n\n\
         Character references:\n{character_table}\n\n\
         Location references:\n{location_table}\n\n\
         Scenes:\n{scene_lines}\n\n\
         Respond with ONLY a JSON array; one element per scene, same scene_id:\n\
         [{{\"scene_id\": \"...\", \"img_prompt\": \"...\", \"video_prompt\": \"...\"}}]\n\
         Rules:\n\
         - Each img_prompt must be distinct and describe one still image.\n\
         - Reference characters and locations inline by their image file in \
         parentheses, e.g. \"A tired sailor (nv1.png) on the pier (loc1.png)\".\n\
         - video_prompt describes subtle motion for animating that image."
    )
}
