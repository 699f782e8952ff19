//! Workbook store: typed, checkpointed persistence of pipeline artifacts.
//!
//! The workbook file is the single source of truth for a project. Every
//! write is a whole-sheet replacement followed by an atomic file swap
//! (write to a sibling temp file, then rename), so a run killed at any
//! point leaves either the previous sheet or the new one, never a torn
//! mix. Checkpoint state is encoded by sheet existence: a stage's sheet
//! exists iff that stage produced output.

mod records;

pub use records::{
    Character, DirectorPlanEntry, Location, PlanStatus, Scene, ScenePlan, Segment, StoryAnalysis,
    CHARACTER_COLUMNS, DIRECTOR_PLAN_COLUMNS, LOCATION_COLUMNS, SCENE_COLUMNS,
    SCENE_PLANNING_COLUMNS, SEGMENT_COLUMNS, STORY_ANALYSIS_COLUMNS,
};

use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use std::path::{Path, PathBuf};
use tracing::debug;
use umya_spreadsheet::{reader, writer, Spreadsheet};

/// Sheet names are contractual; downstream collaborators read them.
pub const SHEET_STORY_ANALYSIS: &str = "story_analysis";
pub const SHEET_SEGMENTS: &str = "segments";
pub const SHEET_CHARACTERS: &str = "characters";
pub const SHEET_LOCATIONS: &str = "locations";
pub const SHEET_DIRECTOR_PLAN: &str = "director_plan";
pub const SHEET_SCENE_PLANNING: &str = "scene_planning";
pub const SHEET_SCENES: &str = "scenes";
pub const SHEET_META: &str = "meta";

/// Current workbook schema version, stored in the `meta` sheet.
pub const SCHEMA_VERSION: u32 = 1;

/// Row counts used by the end-of-run report and continuous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkbookStats {
    pub segments: usize,
    pub characters: usize,
    pub locations: usize,
    /// Director-plan rows: the number of scenes the project will have
    pub scenes_total: usize,
    /// Scene rows already carrying prompts
    pub scenes_prompted: usize,
}

/// Typed persistence for one project workbook.
pub struct WorkbookStore {
    path: PathBuf,
    book: Spreadsheet,
}

impl std::fmt::Debug for WorkbookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl WorkbookStore {
    /// Load the workbook at `path`, creating a fresh one if absent.
    pub fn open(path: impl Into<PathBuf>) -> StoryboardResult<Self> {
        let path = path.into();
        if path.exists() {
            Self::load(path)
        } else {
            Self::create(path)
        }
    }

    /// Load an existing workbook and check its schema version.
    ///
    /// # Errors
    ///
    /// `InputInvalid` for a workbook written by a newer schema;
    /// `Workbook` for unreadable files.
    pub fn load(path: impl Into<PathBuf>) -> StoryboardResult<Self> {
        let path = path.into();
        let book = reader::xlsx::read(&path).map_err(|e| {
            StoryboardError::new(StoryboardErrorKind::Workbook(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        })?;
        let store = Self { path, book };

        let version = store.schema_version();
        if version > SCHEMA_VERSION {
            return Err(StoryboardError::new(StoryboardErrorKind::InputInvalid(
                format!("workbook schema version {version} is newer than supported {SCHEMA_VERSION}"),
            )));
        }
        Ok(store)
    }

    /// Create a new workbook containing only the `meta` sheet.
    ///
    /// Stage sheets are created by the stages themselves, so that sheet
    /// existence keeps meaning "this stage produced output".
    pub fn create(path: impl Into<PathBuf>) -> StoryboardResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let book = umya_spreadsheet::new_file();
        let mut store = Self { path, book };
        store.write_sheet(
            SHEET_META,
            &["key", "value"],
            vec![vec!["schema_version".to_string(), SCHEMA_VERSION.to_string()]],
        )?;
        // Drop the default sheet the library seeds new files with.
        let _ = store.book.remove_sheet_by_name("Sheet1");
        store.save()?;
        Ok(store)
    }

    /// Path the store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a sheet exists at all (independent of row count).
    pub fn sheet_exists(&self, name: &str) -> bool {
        self.book.get_sheet_by_name(name).is_some()
    }

    /// Read all data rows of a sheet (header excluded, empty rows
    /// skipped). A missing sheet reads as no rows.
    pub fn read_sheet(&self, name: &str) -> Vec<Vec<String>> {
        let Some(sheet) = self.book.get_sheet_by_name(name) else {
            return Vec::new();
        };

        let highest_row = sheet.get_highest_row();
        let highest_col = sheet.get_highest_column();
        let mut rows = Vec::new();

        for row_idx in 2..=highest_row {
            let mut row = Vec::with_capacity(highest_col as usize);
            for col_idx in 1..=highest_col {
                row.push(sheet.get_value((col_idx, row_idx)));
            }
            if row.iter().any(|cell| !cell.is_empty()) {
                rows.push(row);
            }
        }
        rows
    }

    /// Replace a sheet wholesale and persist the workbook atomically.
    pub fn write_sheet(
        &mut self,
        name: &str,
        columns: &[&str],
        rows: Vec<Vec<String>>,
    ) -> StoryboardResult<()> {
        let _ = self.book.remove_sheet_by_name(name);
        let sheet = self
            .book
            .new_sheet(name)
            .map_err(|e| StoryboardError::new(StoryboardErrorKind::Workbook(e.to_string())))?;

        for (col_idx, column) in columns.iter().enumerate() {
            sheet
                .get_cell_mut((col_idx as u32 + 1, 1))
                .set_value(column.to_string());
        }
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet
                        .get_cell_mut((col_idx as u32 + 1, row_idx as u32 + 2))
                        .set_value(value.clone());
                }
            }
        }

        self.save()?;
        debug!(sheet = name, rows = rows.len(), "sheet written");
        Ok(())
    }

    /// Write to a sibling temp file, then rename over the target.
    fn save(&self) -> StoryboardResult<()> {
        let tmp = self.path.with_extension("xlsx.tmp");
        writer::xlsx::write(&self.book, &tmp).map_err(|e| {
            StoryboardError::new(StoryboardErrorKind::Workbook(format!(
                "failed to write {}: {e}",
                tmp.display()
            )))
        })?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Stored schema version; a missing meta sheet reads as version 1.
    pub fn schema_version(&self) -> u32 {
        self.read_sheet(SHEET_META)
            .iter()
            .find(|row| row.first().map(String::as_str) == Some("schema_version"))
            .and_then(|row| row.get(1))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1)
    }

    //
    // ─── TYPED ACCESSORS ────────────────────────────────────────────────
    //

    pub fn story_analysis(&self) -> Option<StoryAnalysis> {
        self.read_sheet(SHEET_STORY_ANALYSIS)
            .first()
            .map(|row| StoryAnalysis::from_row(row))
    }

    pub fn write_story_analysis(&mut self, analysis: &StoryAnalysis) -> StoryboardResult<()> {
        self.write_sheet(
            SHEET_STORY_ANALYSIS,
            STORY_ANALYSIS_COLUMNS,
            vec![analysis.to_row()],
        )
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.read_sheet(SHEET_SEGMENTS)
            .iter()
            .map(|row| Segment::from_row(row))
            .collect()
    }

    pub fn write_segments(&mut self, segments: &[Segment]) -> StoryboardResult<()> {
        let rows = segments.iter().map(Segment::to_row).collect();
        self.write_sheet(SHEET_SEGMENTS, SEGMENT_COLUMNS, rows)
    }

    pub fn characters(&self) -> Vec<Character> {
        self.read_sheet(SHEET_CHARACTERS)
            .iter()
            .map(|row| Character::from_row(row))
            .collect()
    }

    pub fn write_characters(&mut self, characters: &[Character]) -> StoryboardResult<()> {
        let rows = characters.iter().map(Character::to_row).collect();
        self.write_sheet(SHEET_CHARACTERS, CHARACTER_COLUMNS, rows)
    }

    pub fn locations(&self) -> Vec<Location> {
        self.read_sheet(SHEET_LOCATIONS)
            .iter()
            .map(|row| Location::from_row(row))
            .collect()
    }

    pub fn write_locations(&mut self, locations: &[Location]) -> StoryboardResult<()> {
        let rows = locations.iter().map(Location::to_row).collect();
        self.write_sheet(SHEET_LOCATIONS, LOCATION_COLUMNS, rows)
    }

    pub fn director_plan(&self) -> Vec<DirectorPlanEntry> {
        self.read_sheet(SHEET_DIRECTOR_PLAN)
            .iter()
            .map(|row| DirectorPlanEntry::from_row(row))
            .collect()
    }

    pub fn write_director_plan(&mut self, entries: &[DirectorPlanEntry]) -> StoryboardResult<()> {
        let rows = entries.iter().map(DirectorPlanEntry::to_row).collect();
        self.write_sheet(SHEET_DIRECTOR_PLAN, DIRECTOR_PLAN_COLUMNS, rows)
    }

    pub fn scene_planning(&self) -> Vec<ScenePlan> {
        self.read_sheet(SHEET_SCENE_PLANNING)
            .iter()
            .map(|row| ScenePlan::from_row(row))
            .collect()
    }

    pub fn write_scene_planning(&mut self, plans: &[ScenePlan]) -> StoryboardResult<()> {
        let rows = plans.iter().map(ScenePlan::to_row).collect();
        self.write_sheet(SHEET_SCENE_PLANNING, SCENE_PLANNING_COLUMNS, rows)
    }

    pub fn scenes(&self) -> Vec<Scene> {
        self.read_sheet(SHEET_SCENES)
            .iter()
            .map(|row| Scene::from_row(row))
            .collect()
    }

    pub fn write_scenes(&mut self, scenes: &[Scene]) -> StoryboardResult<()> {
        let rows = scenes.iter().map(Scene::to_row).collect();
        self.write_sheet(SHEET_SCENES, SCENE_COLUMNS, rows)
    }

    /// Row counts for reporting.
    pub fn stats(&self) -> WorkbookStats {
        WorkbookStats {
            segments: self.read_sheet(SHEET_SEGMENTS).len(),
            characters: self.read_sheet(SHEET_CHARACTERS).len(),
            locations: self.read_sheet(SHEET_LOCATIONS).len(),
            scenes_total: self.read_sheet(SHEET_DIRECTOR_PLAN).len(),
            scenes_prompted: self.read_sheet(SHEET_SCENES).len(),
        }
    }
}
