//! Scene synthesis: from director entries and raw LLM prompts to final
//! scene rows.
//!
//! The synthesizer is the last line of defense against LLM misbehavior:
//! empty prompts and batch-wide duplicate floods are replaced with
//! deterministic fallbacks, reference tokens in the prompt text are
//! reconciled with the scene's metadata (in both directions), and every
//! field of the row is populated here rather than left to defaults.

use crate::config::VideoMode;
use crate::refs::RefResolver;
use crate::srt::{self, SrtEntry};
use crate::workbook::{DirectorPlanEntry, Scene, Segment};
use std::collections::HashMap;

/// Raw prompt pair for one scene, as returned by Stage 7's LLM calls.
#[derive(Debug, Clone, Default)]
pub struct PromptPair {
    pub img_prompt: String,
    pub video_prompt: String,
}

/// Per-scene fallback inputs.
#[derive(Debug, Clone, Copy)]
pub struct FallbackContext<'a> {
    pub scene_id: &'a str,
    pub segment_name: &'a str,
    pub srt_text: &'a str,
}

/// Builds final [`Scene`] rows (C7) with deterministic fallbacks (C9).
pub struct SceneSynthesizer {
    resolver: RefResolver,
    mode: VideoMode,
    duplicate_ratio: f64,
}

impl SceneSynthesizer {
    pub fn new(mode: VideoMode, duplicate_ratio: f64) -> Self {
        Self {
            resolver: RefResolver::new(),
            mode,
            duplicate_ratio,
        }
    }

    /// Synthesize one batch of scenes.
    ///
    /// `prompts` maps scene_id to the LLM's output; absent or empty
    /// prompts take the fallback path, as do duplicates when the
    /// batch-wide duplicate rate exceeds the configured ratio.
    pub fn synthesize_batch(
        &self,
        batch: &[DirectorPlanEntry],
        prompts: &HashMap<String, PromptPair>,
        segments: &HashMap<u32, Segment>,
        entries: &[SrtEntry],
    ) -> Vec<Scene> {
        let duplicates = self.duplicate_prompts(batch, prompts);

        batch
            .iter()
            .map(|director| {
                let pair = prompts.get(&director.scene_id).cloned().unwrap_or_default();
                let segment_name = segments
                    .get(&director.segment_id)
                    .map(|s| s.name.as_str())
                    .unwrap_or("");
                let srt_text =
                    srt::slice_text(entries, director.srt_start_index, director.srt_end_index);

                let needs_fallback = pair.img_prompt.trim().is_empty()
                    || duplicates.contains(&normalize_prompt(&pair.img_prompt));

                let img_prompt = if needs_fallback {
                    fallback_prompt(&FallbackContext {
                        scene_id: &director.scene_id,
                        segment_name,
                        srt_text: &srt_text,
                    })
                } else {
                    pair.img_prompt.trim().to_string()
                };

                self.build_scene(director, img_prompt, pair.video_prompt, srt_text, entries)
            })
            .collect()
    }

    /// Normalized prompts that should be replaced: only populated when
    /// the batch-wide duplicate rate exceeds the threshold.
    fn duplicate_prompts(
        &self,
        batch: &[DirectorPlanEntry],
        prompts: &HashMap<String, PromptPair>,
    ) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for director in batch {
            if let Some(pair) = prompts.get(&director.scene_id) {
                if !pair.img_prompt.trim().is_empty() {
                    *counts.entry(normalize_prompt(&pair.img_prompt)).or_default() += 1;
                }
            }
        }

        let duplicate_count: usize = counts.values().filter(|&&c| c > 1).sum();
        let rate = duplicate_count as f64 / batch.len() as f64;
        if rate > self.duplicate_ratio {
            counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(prompt, _)| prompt)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Reference resolution plus row assembly. Every field the entity
    /// defines is set here.
    fn build_scene(
        &self,
        director: &DirectorPlanEntry,
        img_prompt: String,
        video_prompt: String,
        srt_text: String,
        entries: &[SrtEntry],
    ) -> Scene {
        // IDs in the prompt are authoritative; the director plan is the
        // fallback when the prompt references nothing.
        let extracted = self.resolver.extract(&img_prompt);
        let characters_used = if extracted.characters.is_empty() {
            director.characters_used.clone()
        } else {
            extracted.characters
        };
        let location_used = extracted
            .location
            .unwrap_or_else(|| director.location_used.clone());

        // Metadata must be visible in the prompt text itself, so the
        // downstream generator uploads the same references we record.
        let img_prompt = self.resolver.annotate(
            &img_prompt,
            characters_used
                .iter()
                .map(String::as_str)
                .chain(non_empty(&location_used)),
        );

        let reference_files: Vec<String> = characters_used
            .iter()
            .map(String::as_str)
            .chain(non_empty(&location_used))
            .map(|id| format!("{id}.png"))
            .collect();

        let video_note = match self.mode {
            VideoMode::Basic if director.segment_id > 1 => "SKIP".to_string(),
            _ => String::new(),
        };

        let start_entry = &entries[(director.srt_start_index.max(1) - 1) as usize];
        let end_entry = &entries[(director.srt_end_index.max(1) - 1) as usize];

        Scene {
            scene_id: director.scene_id.clone(),
            srt_start_ms: start_entry.start_ms,
            srt_end_ms: end_entry.end_ms,
            planned_duration_ms: director.planned_duration_ms,
            srt_text,
            img_prompt,
            video_prompt: video_prompt.trim().to_string(),
            characters_used,
            location_used,
            reference_files,
            status_img: "pending".to_string(),
            status_vid: "pending".to_string(),
            video_note,
            segment_id: director.segment_id,
        }
    }
}

/// Deterministic unique prompt for a scene the LLM failed.
fn fallback_prompt(ctx: &FallbackContext<'_>) -> String {
    let excerpt: String = ctx.srt_text.chars().take(120).collect();
    format!(
        "Cinematic illustration for {} in segment \"{}\": {}",
        ctx.scene_id, ctx.segment_name, excerpt
    )
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Duplicate detection compares prompts case-insensitively with
/// collapsed whitespace.
fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
