//! Stage 2: segmentation.
//!
//! One LLM call proposes segments over the whole script; two validators
//! then repair what came back. Validation A fixes disproportionate
//! segments (too many SRT lines per planned image) by local splitting or
//! a scoped re-ask. Validation B fixes coverage gaps with scoped re-asks.
//! The stage only writes a segment sheet that exactly partitions `[1..N]`.

use crate::coverage::{self, Span};
use crate::llm::{extract_and_parse, lenient_u32, CompletionDriver, CompletionRequest};
use crate::pipeline::{segment_spans, StageContext};
use crate::srt;
use crate::workbook::{Segment, StoryAnalysis, WorkbookStore, SHEET_SEGMENTS};
use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::warn;

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 8192;

/// Accept a segment when entries-per-image is at or below this.
const RATIO_ACCEPT: f64 = 15.0;
/// Split locally up to this ratio; above it, re-ask the LLM.
const RATIO_LOCAL_SPLIT: f64 = 30.0;
/// Bound on scoped re-asks per original segment (Validation A) and on
/// gap-repair rounds (Validation B).
const REPAIR_DEPTH: u32 = 3;
/// Target SRT entries per planned image.
const ENTRIES_PER_IMAGE: u32 = 10;

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    srt_start_index: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    srt_end_index: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    image_count: u32,
}

/// Complete iff the sheet exists and its segments partition `[1..N]`.
pub fn is_complete(store: &WorkbookStore, ctx: &StageContext<'_>) -> bool {
    if !store.sheet_exists(SHEET_SEGMENTS) {
        return false;
    }
    let segments = store.segments();
    !segments.is_empty()
        && coverage::analyze(ctx.total(), &segment_spans(&segments)).is_partition()
}

pub async fn run<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let analysis = store.story_analysis().unwrap_or_default();
    let total = ctx.total();

    let request = CompletionRequest::new(
        full_prompt(&analysis, ctx.entries),
        TEMPERATURE,
        MAX_TOKENS,
    );
    let response = driver.complete(&request).await.map_err(|e| {
        StoryboardError::new(StoryboardErrorKind::StageFailed {
            stage: "segmentation",
            message: e.to_string(),
        })
    })?;
    let raw: Vec<RawSegment> = match extract_and_parse(&response) {
        Ok(raw) => raw,
        Err(e) => {
            ctx.progress
                .warn(&format!("segmentation response unusable ({e})"));
            Vec::new()
        }
    };

    let mut drafts = sanitize(raw, 1, total);
    if drafts.is_empty() {
        // Nothing usable at all: treat the whole script as one segment
        // and let Validation A break it down.
        drafts.push(draft_for(Span::new(1, total)));
    }

    drafts = repair_disproportion(driver, ctx, &analysis, drafts).await;
    drafts = repair_gaps(driver, ctx, &analysis, drafts).await?;

    let segments = finalize(drafts);
    store.write_segments(&segments)?;
    ctx.progress.info(&format!(
        "segmentation: {} segments covering 1..{}",
        segments.len(),
        total
    ));
    Ok(())
}

/// A segment before numbering.
#[derive(Debug, Clone)]
struct Draft {
    name: String,
    span: Span,
    image_count: u32,
}

impl Draft {
    fn ratio(&self) -> f64 {
        f64::from(self.span.len()) / f64::from(self.image_count.max(1))
    }
}

fn draft_for(span: Span) -> Draft {
    Draft {
        name: String::new(),
        span,
        image_count: span.len().div_ceil(ENTRIES_PER_IMAGE),
    }
}

/// Clamp raw LLM segments into `[lo..hi]`, dropping unusable ones.
fn sanitize(raw: Vec<RawSegment>, lo: u32, hi: u32) -> Vec<Draft> {
    let mut drafts: Vec<Draft> = raw
        .into_iter()
        .filter_map(|r| {
            let start = r.srt_start_index.clamp(lo, hi);
            let end = r.srt_end_index.clamp(lo, hi);
            if r.srt_start_index > hi || r.srt_end_index < lo || end < start {
                return None;
            }
            Some(Draft {
                name: r.name.trim().to_string(),
                span: Span::new(start, end),
                image_count: r.image_count.max(1),
            })
        })
        .collect();
    drafts.sort_by_key(|d| (d.span.start, d.span.end));
    drafts
}

/// Validation A: accept, split locally, or re-ask per segment.
async fn repair_disproportion<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    analysis: &StoryAnalysis,
    drafts: Vec<Draft>,
) -> Vec<Draft> {
    let mut queue: VecDeque<(Draft, u32)> = drafts.into_iter().map(|d| (d, 0)).collect();
    let mut accepted = Vec::new();

    while let Some((draft, depth)) = queue.pop_front() {
        let ratio = draft.ratio();
        if ratio <= RATIO_ACCEPT {
            accepted.push(draft);
        } else if ratio <= RATIO_LOCAL_SPLIT || depth >= REPAIR_DEPTH {
            if depth >= REPAIR_DEPTH {
                ctx.progress.warn(&format!(
                    "segment {}..{} still disproportionate after {} re-asks, splitting locally",
                    draft.span.start, draft.span.end, depth
                ));
            }
            accepted.extend(local_split(&draft));
        } else {
            match refetch_segments(driver, ctx, analysis, draft.span).await {
                Ok(sub) if !sub.is_empty() => {
                    for d in sub {
                        queue.push_back((d, depth + 1));
                    }
                }
                Ok(_) | Err(_) => {
                    warn!(
                        start = draft.span.start,
                        end = draft.span.end,
                        "scoped segmentation re-ask unusable, splitting locally"
                    );
                    accepted.extend(local_split(&draft));
                }
            }
        }
    }

    accepted.sort_by_key(|d| (d.span.start, d.span.end));
    accepted
}

/// Split into `ceil(ratio / 10)` equal sub-segments, each targeting one
/// image per ten entries.
fn local_split(draft: &Draft) -> Vec<Draft> {
    let parts = (draft.ratio() / f64::from(ENTRIES_PER_IMAGE)).ceil() as u32;
    let parts = parts.clamp(1, draft.span.len());
    let len = draft.span.len();
    let base = len / parts;
    let remainder = len % parts;

    let mut out = Vec::with_capacity(parts as usize);
    let mut cursor = draft.span.start;
    for part in 0..parts {
        let this_len = base + u32::from(part < remainder);
        let span = Span::new(cursor, cursor + this_len - 1);
        let mut piece = draft_for(span);
        piece.name = draft.name.clone();
        out.push(piece);
        cursor += this_len;
    }
    out
}

/// Validation B: re-ask the LLM for every uncovered run, bounded rounds.
///
/// Overlaps are trimmed deterministically first (earlier segment wins),
/// so only genuine gaps reach the LLM.
async fn repair_gaps<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    analysis: &StoryAnalysis,
    drafts: Vec<Draft>,
) -> StoryboardResult<Vec<Draft>> {
    let total = ctx.total();
    let mut drafts = trim_overlaps(drafts);

    for _round in 0..REPAIR_DEPTH {
        let spans: Vec<Span> = drafts.iter().map(|d| d.span).collect();
        let report = coverage::analyze(total, &spans);
        if report.is_partition() {
            return Ok(drafts);
        }

        for gap in &report.gaps {
            ctx.progress
                .warn(&format!("segment gap {}..{}, re-asking", gap.start, gap.end));
            match refetch_segments(driver, ctx, analysis, *gap).await {
                Ok(sub) if !sub.is_empty() => drafts.extend(sub),
                Ok(_) | Err(_) => {
                    warn!(start = gap.start, end = gap.end, "gap re-ask unusable");
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
                "segmentation gaps remain after {REPAIR_DEPTH} repair rounds: {:?}",
                report.gaps
            )),
        ))
    }
}

/// Sort by start and cut away any part already covered by an earlier
/// segment. Image counts are recomputed for trimmed segments.
fn trim_overlaps(mut drafts: Vec<Draft>) -> Vec<Draft> {
    drafts.sort_by_key(|d| (d.span.start, d.span.end));
    let mut out: Vec<Draft> = Vec::with_capacity(drafts.len());

    for mut draft in drafts {
        if let Some(prev) = out.last() {
            if draft.span.end <= prev.span.end {
                continue;
            }
            if draft.span.start <= prev.span.end {
                let trimmed = Span::new(prev.span.end + 1, draft.span.end);
                draft.image_count = trimmed.len().div_ceil(ENTRIES_PER_IMAGE);
                draft.span = trimmed;
            }
        }
        out.push(draft);
    }
    out
}

/// Scoped re-ask over one index range, with image counts recomputed from
/// length rather than trusted from the response.
async fn refetch_segments<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    analysis: &StoryAnalysis,
    span: Span,
) -> StoryboardResult<Vec<Draft>> {
    let request = CompletionRequest::new(
        scoped_prompt(analysis, ctx.entries, span),
        TEMPERATURE,
        MAX_TOKENS,
    );
    let response = driver.complete(&request).await?;
    let raw: Vec<RawSegment> = extract_and_parse(&response)?;

    let mut drafts = sanitize(raw, span.start, span.end);
    for draft in &mut drafts {
        draft.image_count = draft.span.len().div_ceil(ENTRIES_PER_IMAGE);
    }
    Ok(drafts)
}

/// Number densely by start order and give unnamed segments a fallback.
fn finalize(mut drafts: Vec<Draft>) -> Vec<Segment> {
    drafts.sort_by_key(|d| d.span.start);
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let segment_id = i as u32 + 1;
            Segment {
                segment_id,
                name: if d.name.is_empty() {
                    format!("part {segment_id}")
                } else {
                    d.name
                },
                srt_start_index: d.span.start,
                srt_end_index: d.span.end,
                image_count: d.image_count.max(1),
            }
        })
        .collect()
}

fn full_prompt(analysis: &StoryAnalysis, entries: &[crate::srt::SrtEntry]) -> String {
    format!(
        "You are a film editor. Split this narration script into story segments.\n\
         Story context: genre {}, mood {}, summary: {}\n\n\
         Script lines (index: text):\n{}\n\n\
         Respond with ONLY a JSON array. Each element:\n\
         {{\"name\": \"...\", \"srt_start_index\": <int>, \"srt_end_index\": <int>, \"image_count\": <int>}}\n\
         Rules:\n\
         - Cover every line from 1 to {} exactly once, in order, no gaps, no overlap.\n\
         - image_count is the number of distinct images for the segment, about one per 10 lines.",
        analysis.genre,
        analysis.mood,
        analysis.summary,
        srt::numbered_script(entries),
        entries.len()
    )
}

fn scoped_prompt(
    analysis: &StoryAnalysis,
    entries: &[crate::srt::SrtEntry],
    span: Span,
) -> String {
    let slice: Vec<crate::srt::SrtEntry> = entries
        .iter()
        .filter(|e| span.contains(e.index))
        .cloned()
        .collect();
    format!(
        "You are a film editor. Split this part of a narration script into \
         smaller story segments.\n\
         Story context: genre {}, mood {}\n\n\
         Script lines (index: text):\n{}\n\n\
         Respond with ONLY a JSON array. Each element:\n\
         {{\"name\": \"...\", \"srt_start_index\": <int>, \"srt_end_index\": <int>, \"image_count\": <int>}}\n\
         Rules:\n\
         - Use only indices between {} and {}, covering all of them exactly once.\n\
         - Keep segments short: roughly 10 to 30 lines each.",
        analysis.genre,
        analysis.mood,
        srt::numbered_script(&slice),
        span.start,
        span.end
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(start: u32, end: u32, image_count: u32) -> Draft {
        Draft {
            name: String::new(),
            span: Span::new(start, end),
            image_count,
        }
    }

    #[test]
    fn local_split_bounds_ratio() {
        // 200 entries against 8 images: ratio 25, split into 3 parts.
        let parts = local_split(&draft(1, 200, 8));
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].span.start, 1);
        assert_eq!(parts.last().unwrap().span.end, 200);
        for (prev, next) in parts.iter().zip(parts.iter().skip(1)) {
            assert_eq!(prev.span.end + 1, next.span.start);
        }
        for part in &parts {
            assert!(part.ratio() <= RATIO_ACCEPT);
        }
    }

    #[test]
    fn trim_overlaps_keeps_earlier_segment() {
        let trimmed = trim_overlaps(vec![draft(1, 10, 1), draft(8, 20, 2)]);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[1].span, Span::new(11, 20));
    }

    #[test]
    fn trim_overlaps_drops_contained_segment() {
        let trimmed = trim_overlaps(vec![draft(1, 20, 2), draft(5, 15, 1)]);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].span, Span::new(1, 20));
    }

    #[test]
    fn sanitize_clamps_and_drops() {
        let raw = vec![
            RawSegment {
                name: "ok".into(),
                srt_start_index: 0,
                srt_end_index: 5,
                image_count: 0,
            },
            RawSegment {
                name: "outside".into(),
                srt_start_index: 50,
                srt_end_index: 60,
                image_count: 1,
            },
        ];
        let drafts = sanitize(raw, 1, 10);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].span, Span::new(1, 5));
        assert_eq!(drafts[0].image_count, 1);
    }

    #[test]
    fn finalize_numbers_densely() {
        let segments = finalize(vec![draft(6, 10, 1), draft(1, 5, 1)]);
        assert_eq!(segments[0].segment_id, 1);
        assert_eq!(segments[0].srt_start_index, 1);
        assert_eq!(segments[1].segment_id, 2);
        assert_eq!(segments[1].name, "part 2");
    }
}
