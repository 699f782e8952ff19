//! Typed rows for every workbook sheet.
//!
//! Column orderings are contractual with downstream consumers. Two rules
//! keep old workbooks readable forever:
//!
//! 1. New columns are appended at the end of a column list, never
//!    inserted. (`segment_id` on the scenes sheet is the worked example:
//!    it arrived late, so it is last.)
//! 2. `from_row` tolerates rows shorter than the column list (missing
//!    trailing cells take the typed default) and longer (extra trailing
//!    cells are ignored). A stored empty cell and a missing cell decode
//!    identically.

use serde::{Deserialize, Serialize};

/// `story_analysis` sheet columns.
pub const STORY_ANALYSIS_COLUMNS: &[&str] = &["genre", "mood", "style", "summary"];

/// `segments` sheet columns.
pub const SEGMENT_COLUMNS: &[&str] = &[
    "segment_id",
    "name",
    "srt_start_index",
    "srt_end_index",
    "image_count",
];

/// `characters` sheet columns.
pub const CHARACTER_COLUMNS: &[&str] = &["character_id", "name", "description", "appearance"];

/// `locations` sheet columns.
pub const LOCATION_COLUMNS: &[&str] = &["location_id", "name", "description", "atmosphere"];

/// `director_plan` sheet columns. `segment_id` second, status last.
pub const DIRECTOR_PLAN_COLUMNS: &[&str] = &[
    "scene_id",
    "segment_id",
    "visual_moment",
    "srt_start_index",
    "srt_end_index",
    "planned_duration_ms",
    "characters_used",
    "location_used",
    "status",
];

/// `scene_planning` sheet columns.
pub const SCENE_PLANNING_COLUMNS: &[&str] = &["scene_id", "camera", "lighting", "composition"];

/// `scenes` sheet columns. `segment_id` was appended and stays last.
pub const SCENE_COLUMNS: &[&str] = &[
    "scene_id",
    "srt_start_ms",
    "srt_end_ms",
    "planned_duration_ms",
    "srt_text",
    "img_prompt",
    "video_prompt",
    "characters_used",
    "location_used",
    "reference_files",
    "status_img",
    "status_vid",
    "video_note",
    "segment_id",
];

/// One-per-project story analysis, produced by Stage 1.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct StoryAnalysis {
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub summary: String,
}

impl StoryAnalysis {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.genre.clone(),
            self.mood.clone(),
            self.style.clone(),
            self.summary.clone(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            genre: cell(row, 0),
            mood: cell(row, 1),
            style: cell(row, 2),
            summary: cell(row, 3),
        }
    }
}

/// Named contiguous run of SRT indices with a target scene count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub segment_id: u32,
    pub name: String,
    /// First SRT index, 1-based inclusive
    pub srt_start_index: u32,
    /// Last SRT index, inclusive
    pub srt_end_index: u32,
    /// Target number of scenes
    pub image_count: u32,
}

impl Segment {
    /// Number of SRT indices covered.
    pub fn len(&self) -> u32 {
        self.srt_end_index.saturating_sub(self.srt_start_index) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.srt_end_index < self.srt_start_index
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.segment_id.to_string(),
            self.name.clone(),
            self.srt_start_index.to_string(),
            self.srt_end_index.to_string(),
            self.image_count.to_string(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            segment_id: int_cell(row, 0),
            name: cell(row, 1),
            srt_start_index: int_cell(row, 2),
            srt_end_index: int_cell(row, 3),
            image_count: int_cell(row, 4),
        }
    }
}

/// Canonical character record, produced by Stage 3. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Character {
    /// `nv1`, `nv2`, ... in returned order
    pub character_id: String,
    pub name: String,
    pub description: String,
    pub appearance: String,
}

impl Character {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.character_id.clone(),
            self.name.clone(),
            self.description.clone(),
            self.appearance.clone(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            character_id: cell(row, 0),
            name: cell(row, 1),
            description: cell(row, 2),
            appearance: cell(row, 3),
        }
    }
}

/// Canonical location record, produced by Stage 4. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    /// `loc1`, `loc2`, ... in returned order
    pub location_id: String,
    pub name: String,
    pub description: String,
    pub atmosphere: String,
}

impl Location {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.location_id.clone(),
            self.name.clone(),
            self.description.clone(),
            self.atmosphere.clone(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            location_id: cell(row, 0),
            name: cell(row, 1),
            description: cell(row, 2),
            atmosphere: cell(row, 3),
        }
    }
}

/// Lifecycle of a director-plan entry. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, derive_more::Display)]
pub enum PlanStatus {
    #[default]
    #[display("pending")]
    Pending,
    #[display("planned")]
    Planned,
    #[display("prompted")]
    Prompted,
    #[display("done")]
    Done,
}

impl PlanStatus {
    /// Decode a stored cell; unknown or empty values read as pending.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "planned" => PlanStatus::Planned,
            "prompted" => PlanStatus::Prompted,
            "done" => PlanStatus::Done,
            _ => PlanStatus::Pending,
        }
    }

    /// The later of two states; used to keep stored status monotonic.
    pub fn advanced_to(self, next: PlanStatus) -> Self {
        self.max(next)
    }
}

/// Per-scene structural record produced before prompts exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorPlanEntry {
    /// Project-unique, stable across runs
    pub scene_id: String,
    pub segment_id: u32,
    /// Short phrase; empty for gap-filled entries
    pub visual_moment: String,
    pub srt_start_index: u32,
    pub srt_end_index: u32,
    pub planned_duration_ms: u64,
    pub characters_used: Vec<String>,
    /// Location ID or empty
    pub location_used: String,
    pub status: PlanStatus,
}

impl DirectorPlanEntry {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.scene_id.clone(),
            self.segment_id.to_string(),
            self.visual_moment.clone(),
            self.srt_start_index.to_string(),
            self.srt_end_index.to_string(),
            self.planned_duration_ms.to_string(),
            encode_list(&self.characters_used),
            self.location_used.clone(),
            self.status.to_string(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            scene_id: cell(row, 0),
            segment_id: int_cell(row, 1),
            visual_moment: cell(row, 2),
            srt_start_index: int_cell(row, 3),
            srt_end_index: int_cell(row, 4),
            planned_duration_ms: int_cell(row, 5) as u64,
            characters_used: decode_list(&cell(row, 6)),
            location_used: cell(row, 7),
            status: PlanStatus::parse(&cell(row, 8)),
        }
    }
}

/// Auxiliary per-scene detail produced by Stage 6.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScenePlan {
    pub scene_id: String,
    pub camera: String,
    pub lighting: String,
    pub composition: String,
}

impl ScenePlan {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.scene_id.clone(),
            self.camera.clone(),
            self.lighting.clone(),
            self.composition.clone(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            scene_id: cell(row, 0),
            camera: cell(row, 1),
            lighting: cell(row, 2),
            composition: cell(row, 3),
        }
    }
}

/// Final output row coupling a director-plan entry with its prompts and
/// reference metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scene {
    pub scene_id: String,
    pub srt_start_ms: u64,
    pub srt_end_ms: u64,
    pub planned_duration_ms: u64,
    pub srt_text: String,
    pub img_prompt: String,
    pub video_prompt: String,
    pub characters_used: Vec<String>,
    pub location_used: String,
    /// Reference image filenames uploaded alongside the prompt
    pub reference_files: Vec<String>,
    pub status_img: String,
    pub status_vid: String,
    /// `""` or `"SKIP"`
    pub video_note: String,
    pub segment_id: u32,
}

impl Scene {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.scene_id.clone(),
            self.srt_start_ms.to_string(),
            self.srt_end_ms.to_string(),
            self.planned_duration_ms.to_string(),
            self.srt_text.clone(),
            self.img_prompt.clone(),
            self.video_prompt.clone(),
            encode_list(&self.characters_used),
            self.location_used.clone(),
            encode_list(&self.reference_files),
            self.status_img.clone(),
            self.status_vid.clone(),
            self.video_note.clone(),
            self.segment_id.to_string(),
        ]
    }

    pub fn from_row(row: &[String]) -> Self {
        Self {
            scene_id: cell(row, 0),
            srt_start_ms: int_cell(row, 1) as u64,
            srt_end_ms: int_cell(row, 2) as u64,
            planned_duration_ms: int_cell(row, 3) as u64,
            srt_text: cell(row, 4),
            img_prompt: cell(row, 5),
            video_prompt: cell(row, 6),
            characters_used: decode_list(&cell(row, 7)),
            location_used: cell(row, 8),
            reference_files: decode_list(&cell(row, 9)),
            status_img: cell(row, 10),
            status_vid: cell(row, 11),
            video_note: cell(row, 12),
            segment_id: int_cell(row, 13),
        }
    }
}

/// Cell at `index`, empty string when the row is short.
fn cell(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

/// Integer cell at `index`; empty or unparseable reads as 0.
fn int_cell(row: &[String], index: usize) -> u32 {
    row.get(index)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Lists are stored as JSON arrays so downstream tools can parse cells
/// without knowing our delimiter conventions.
fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Vec::new();
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| {
        // Legacy cells may hold a bare comma-separated list.
        trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_default_missing_trailing_cells() {
        let scene = Scene::from_row(&["scene_001".to_string(), "1000".to_string()]);
        assert_eq!(scene.scene_id, "scene_001");
        assert_eq!(scene.srt_start_ms, 1000);
        assert_eq!(scene.img_prompt, "");
        assert!(scene.characters_used.is_empty());
        assert_eq!(scene.segment_id, 0);
    }

    #[test]
    fn long_rows_ignore_extra_trailing_cells() {
        let mut row: Vec<String> = vec![String::new(); SEGMENT_COLUMNS.len()];
        row[0] = "2".into();
        row[2] = "5".into();
        row[3] = "9".into();
        row.push("unexpected future column".into());
        let segment = Segment::from_row(&row);
        assert_eq!(segment.segment_id, 2);
        assert_eq!(segment.srt_start_index, 5);
        assert_eq!(segment.srt_end_index, 9);
    }

    #[test]
    fn row_round_trip() {
        let entry = DirectorPlanEntry {
            scene_id: "scene_007".into(),
            segment_id: 3,
            visual_moment: "the door opens".into(),
            srt_start_index: 41,
            srt_end_index: 50,
            planned_duration_ms: 12_000,
            characters_used: vec!["nv1".into(), "nv2".into()],
            location_used: "loc1".into(),
            status: PlanStatus::Planned,
        };
        assert_eq!(DirectorPlanEntry::from_row(&entry.to_row()), entry);
    }

    #[test]
    fn status_parse_is_lenient_and_monotonic() {
        assert_eq!(PlanStatus::parse("done"), PlanStatus::Done);
        assert_eq!(PlanStatus::parse(""), PlanStatus::Pending);
        assert_eq!(PlanStatus::parse("garbage"), PlanStatus::Pending);
        assert_eq!(
            PlanStatus::Prompted.advanced_to(PlanStatus::Planned),
            PlanStatus::Prompted
        );
        assert_eq!(
            PlanStatus::Pending.advanced_to(PlanStatus::Planned),
            PlanStatus::Planned
        );
    }

    #[test]
    fn list_decoding_guards_empty_cells() {
        assert!(decode_list("").is_empty());
        assert!(decode_list("[]").is_empty());
        assert_eq!(decode_list("[\"nv1\"]"), vec!["nv1"]);
        assert_eq!(decode_list("nv1, nv2"), vec!["nv1", "nv2"]);
    }
}
