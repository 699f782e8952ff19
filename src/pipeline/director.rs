//! Stage 5: director plan.
//!
//! One LLM call per segment, fanned out through the batch executor. A
//! failed or unusable segment response is tolerated: after all calls
//! return, GAP-FILL synthesizes entries for every uncovered run so the
//! plan always partitions `[1..N]`. Scene IDs are assigned only after
//! every entry exists, by stable start-index order.

use crate::coverage::{self, chunk_span, Span};
use crate::llm::{
    extract_and_parse, lenient_string_list, lenient_u32, run_batch, CompletionDriver,
    CompletionRequest,
};
use crate::pipeline::{plan_spans, StageContext};
use crate::srt::{self, SrtEntry};
use crate::workbook::{
    Character, DirectorPlanEntry, Location, PlanStatus, Segment, WorkbookStore,
    SHEET_DIRECTOR_PLAN,
};
use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use serde::Deserialize;
use std::collections::HashMap;

const TEMPERATURE: f32 = 0.6;
const MAX_TOKENS: u32 = 4096;

/// Hard cap on SRT indices per director entry.
const MAX_ENTRY_SPAN: u32 = 10;

#[derive(Debug, Deserialize)]
struct RawDirectorEntry {
    #[serde(default)]
    visual_moment: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    srt_start_index: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    srt_end_index: u32,
    #[serde(default, deserialize_with = "lenient_string_list")]
    characters_used: Vec<String>,
    #[serde(default)]
    location_used: String,
}

/// Entry before scene IDs exist.
#[derive(Debug, Clone)]
struct PlanDraft {
    segment_id: u32,
    visual_moment: String,
    span: Span,
    characters: Vec<String>,
    location: String,
}

/// Complete iff entries cover `[1..N]` without gap or overlap.
pub fn is_complete(store: &WorkbookStore, ctx: &StageContext<'_>) -> bool {
    if !store.sheet_exists(SHEET_DIRECTOR_PLAN) {
        return false;
    }
    let plan = store.director_plan();
    !plan.is_empty() && coverage::analyze(ctx.total(), &plan_spans(&plan)).is_partition()
}

pub async fn run<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let segments = store.segments();
    let characters = store.characters();
    let locations = store.locations();

    let character_table = character_table(&characters);
    let location_table = location_table(&locations);

    let outcome = run_batch(
        segments.clone(),
        ctx.config.max_parallel_api,
        |_index, segment| {
            let prompt = segment_prompt(&segment, ctx.entries, &character_table, &location_table);
            async move {
                let request = CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS);
                let response = driver.complete(&request).await?;
                let raw: Vec<RawDirectorEntry> = extract_and_parse(&response)?;
                Ok(raw)
            }
        },
    )
    .await;

    for failure in &outcome.failures {
        let segment = &segments[failure.index];
        ctx.progress.warn(&format!(
            "director call for segment {} ({}..{}) failed: {}; GAP-FILL will cover it",
            segment.segment_id,
            segment.srt_start_index,
            segment.srt_end_index,
            failure.error
        ));
    }

    let mut drafts = Vec::new();
    for (segment, result) in segments.iter().zip(outcome.results.into_iter()) {
        if let Some(raw) = result {
            drafts.extend(sanitize(raw, segment));
        }
    }

    drafts = trim_overlaps(drafts);
    let filled = gap_fill(ctx, &segments, drafts)?;

    let plan = assign_scene_ids(filled, ctx.entries);
    store.write_director_plan(&plan)?;
    ctx.progress.info(&format!(
        "director plan: {} entries covering 1..{}",
        plan.len(),
        ctx.total()
    ));
    Ok(())
}

/// Clamp raw entries into the segment's range, normalize entity IDs, and
/// split anything spanning more than ten SRT indices.
fn sanitize(raw: Vec<RawDirectorEntry>, segment: &Segment) -> Vec<PlanDraft> {
    let lo = segment.srt_start_index;
    let hi = segment.srt_end_index;
    let mut drafts = Vec::new();

    for entry in raw {
        if entry.srt_start_index > hi || entry.srt_end_index < lo {
            continue;
        }
        let start = entry.srt_start_index.clamp(lo, hi);
        let end = entry.srt_end_index.clamp(lo, hi);
        if end < start {
            continue;
        }

        let characters: Vec<String> = {
            let mut seen = Vec::new();
            for raw_id in &entry.characters_used {
                if let Some(id) = canonical_id(raw_id, "nv") {
                    if !seen.contains(&id) {
                        seen.push(id);
                    }
                }
            }
            seen
        };
        let location = canonical_id(&entry.location_used, "loc").unwrap_or_default();

        for span in chunk_span(Span::new(start, end), MAX_ENTRY_SPAN) {
            drafts.push(PlanDraft {
                segment_id: segment.segment_id,
                visual_moment: entry.visual_moment.trim().to_string(),
                span,
                characters: characters.clone(),
                location: location.clone(),
            });
        }
    }
    drafts
}

/// Sort by start and cut away parts already covered; earlier entry wins.
fn trim_overlaps(mut drafts: Vec<PlanDraft>) -> Vec<PlanDraft> {
    drafts.sort_by_key(|d| (d.span.start, d.span.end));
    let mut out: Vec<PlanDraft> = Vec::with_capacity(drafts.len());

    for mut draft in drafts {
        if let Some(prev) = out.last() {
            if draft.span.end <= prev.span.end {
                continue;
            }
            if draft.span.start <= prev.span.end {
                draft.span = Span::new(prev.span.end + 1, draft.span.end);
            }
        }
        out.push(draft);
    }
    out
}

/// Synthesize entries for every uncovered run: at most ten indices each,
/// assigned to the containing segment, with that segment's dominant
/// entities as defaults and an empty visual moment.
fn gap_fill(
    ctx: &StageContext<'_>,
    segments: &[Segment],
    mut drafts: Vec<PlanDraft>,
) -> StoryboardResult<Vec<PlanDraft>> {
    let total = ctx.total();
    let spans: Vec<Span> = drafts.iter().map(|d| d.span).collect();
    let report = coverage::analyze(total, &spans);

    if !report.gaps.is_empty() {
        let dominant = dominant_entities(&drafts);
        for gap in &report.gaps {
            ctx.progress.warn(&format!(
                "director plan gap {}..{}, filling",
                gap.start, gap.end
            ));
            for piece in split_at_segment_bounds(*gap, segments) {
                let (segment_id, span) = piece;
                let (characters, location) = dominant
                    .get(&segment_id)
                    .cloned()
                    .unwrap_or_default();
                for chunk in chunk_span(span, MAX_ENTRY_SPAN) {
                    drafts.push(PlanDraft {
                        segment_id,
                        visual_moment: String::new(),
                        span: chunk,
                        characters: characters.clone(),
                        location: location.clone(),
                    });
                }
            }
        }
        drafts = trim_overlaps(drafts);
    }

    let spans: Vec<Span> = drafts.iter().map(|d| d.span).collect();
    let report = coverage::analyze(total, &spans);
    if report.is_partition() {
        Ok(drafts)
    } else {
        Err(StoryboardError::new(
            StoryboardErrorKind::CoverageIrreparable(format!(
                "director plan still broken after GAP-FILL: gaps {:?}, overlaps {:?}",
                report.gaps, report.overlaps
            )),
        ))
    }
}

/// Most frequent (characters, location) pair per segment, from the
/// entries the LLM produced for it.
fn dominant_entities(drafts: &[PlanDraft]) -> HashMap<u32, (Vec<String>, String)> {
    let mut votes: HashMap<u32, HashMap<String, (u32, (Vec<String>, String))>> = HashMap::new();
    for draft in drafts {
        let key = format!("{:?}|{}", draft.characters, draft.location);
        let entry = votes
            .entry(draft.segment_id)
            .or_default()
            .entry(key)
            .or_insert_with(|| (0, (draft.characters.clone(), draft.location.clone())));
        entry.0 += 1;
    }

    votes
        .into_iter()
        .map(|(segment_id, options)| {
            let best = options
                .into_values()
                .max_by_key(|(count, _)| *count)
                .map(|(_, value)| value)
                .unwrap_or_default();
            (segment_id, best)
        })
        .collect()
}

/// Split a gap at segment boundaries; each piece belongs to exactly one
/// segment. Indices outside every segment cannot occur once Stage 2 has
/// validated its partition.
fn split_at_segment_bounds(gap: Span, segments: &[Segment]) -> Vec<(u32, Span)> {
    let mut pieces = Vec::new();
    for segment in segments {
        let start = gap.start.max(segment.srt_start_index);
        let end = gap.end.min(segment.srt_end_index);
        if start <= end {
            pieces.push((segment.segment_id, Span::new(start, end)));
        }
    }
    pieces
}

/// Sort by start index and hand out `scene_001, scene_002, ...`,
/// zero-padded to at least three digits.
fn assign_scene_ids(mut drafts: Vec<PlanDraft>, entries: &[SrtEntry]) -> Vec<DirectorPlanEntry> {
    drafts.sort_by_key(|d| d.span.start);
    let width = drafts.len().to_string().len().max(3);

    drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let start_entry = &entries[(d.span.start - 1) as usize];
            let end_entry = &entries[(d.span.end - 1) as usize];
            DirectorPlanEntry {
                scene_id: format!("scene_{:0width$}", i + 1, width = width),
                segment_id: d.segment_id,
                visual_moment: d.visual_moment,
                srt_start_index: d.span.start,
                srt_end_index: d.span.end,
                planned_duration_ms: end_entry.end_ms.saturating_sub(start_entry.start_ms),
                characters_used: d.characters,
                location_used: d.location,
                status: PlanStatus::Pending,
            }
        })
        .collect()
}

/// Lowercase, strip underscores, and keep only well-formed IDs.
fn canonical_id(raw: &str, prefix: &str) -> Option<String> {
    let id = raw.trim().to_ascii_lowercase().replace('_', "");
    let digits = id.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id)
}

fn character_table(characters: &[Character]) -> String {
    if characters.is_empty() {
        return "(none)".to_string();
    }
    characters
        .iter()
        .map(|c| format!("{}: {} - {}", c.character_id, c.name, c.appearance))
        .collect::<Vec<_>>()
        .join("\n")
}

fn location_table(locations: &[Location]) -> String {
    if locations.is_empty() {
        return "(none)".to_string();
    }
    locations
        .iter()
        .map(|l| format!("{}: {} - {}", l.location_id, l.name, l.atmosphere))
        .collect::<Vec<_>>()
        .join("\n")
}

fn segment_prompt(
    segment: &Segment,
    entries: &[SrtEntry],
    character_table: &str,
    location_table: &str,
) -> String {
    let slice: Vec<SrtEntry> = entries
        .iter()
        .filter(|e| e.index >= segment.srt_start_index && e.index <= segment.srt_end_index)
        .cloned()
        .collect();
    format!(
        "You are a film director planning shots for the segment \"{}\".\n\n\
         Known characters:\n{}\n\nKnown locations:\n{}\n\n\
         Script lines (index: text):\n{}\n\n\
         Plan exactly {} shots. Respond with ONLY a JSON array; each element:\n\
         {{\"visual_moment\": \"short phrase\", \"srt_start_index\": <int>, \
         \"srt_end_index\": <int>, \"characters_used\": [\"nv1\"], \
         \"location_used\": \"loc1\"}}\n\
         Rules:\n\
         - Use only indices between {} and {}; cover all of them in order, \
         no gaps, no overlap.\n\
         - No shot may span more than 10 lines.\n\
         - characters_used and location_used must use the IDs listed above, \
         or be empty.",
        segment.name,
        character_table,
        location_table,
        srt::numbered_script(&slice),
        segment.image_count.max(1),
        segment.srt_start_index,
        segment.srt_end_index,
    )
}
