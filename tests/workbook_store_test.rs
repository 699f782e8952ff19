//! Workbook store round-trips, schema tolerance, and checkpoint shape.

use storyboard::{
    Character, DirectorPlanEntry, PlanStatus, Scene, Segment, StoryAnalysis, StoryboardErrorKind,
    WorkbookStore, SCENE_COLUMNS, SHEET_CHARACTERS, SHEET_META, SHEET_SCENES, SHEET_SEGMENTS,
};

fn workbook_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("T1_prompts.xlsx")
}

#[test]
fn create_then_load_keeps_meta_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    assert!(store.sheet_exists(SHEET_META));
    assert_eq!(store.schema_version(), 1);
    // Stage sheets do not exist until their stage writes them.
    assert!(!store.sheet_exists(SHEET_SEGMENTS));
    assert!(!store.sheet_exists(SHEET_CHARACTERS));

    drop(store);
    let reloaded = WorkbookStore::open(workbook_path(&dir)).unwrap();
    assert_eq!(reloaded.schema_version(), 1);
    assert!(!reloaded.sheet_exists(SHEET_SEGMENTS));
}

#[test]
fn typed_sheets_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    let analysis = StoryAnalysis {
        genre: "mystery".into(),
        mood: "tense".into(),
        style: "noir".into(),
        summary: "A detective chases a ghost.".into(),
    };
    store.write_story_analysis(&analysis).unwrap();

    let segments = vec![
        Segment {
            segment_id: 1,
            name: "open".into(),
            srt_start_index: 1,
            srt_end_index: 5,
            image_count: 1,
        },
        Segment {
            segment_id: 2,
            name: "close".into(),
            srt_start_index: 6,
            srt_end_index: 10,
            image_count: 1,
        },
    ];
    store.write_segments(&segments).unwrap();

    let characters = vec![Character {
        character_id: "nv1".into(),
        name: "Mara".into(),
        description: "the detective".into(),
        appearance: "gray coat, tired eyes".into(),
    }];
    store.write_characters(&characters).unwrap();

    let plan = vec![DirectorPlanEntry {
        scene_id: "scene_001".into(),
        segment_id: 1,
        visual_moment: "rain on glass".into(),
        srt_start_index: 1,
        srt_end_index: 5,
        planned_duration_ms: 5000,
        characters_used: vec!["nv1".into()],
        location_used: "loc1".into(),
        status: PlanStatus::Pending,
    }];
    store.write_director_plan(&plan).unwrap();

    // Reload from disk and compare.
    let reloaded = WorkbookStore::load(workbook_path(&dir)).unwrap();
    assert_eq!(reloaded.story_analysis().unwrap(), analysis);
    assert_eq!(reloaded.segments(), segments);
    assert_eq!(reloaded.characters(), characters);
    assert_eq!(reloaded.director_plan(), plan);
}

#[test]
fn scene_rows_survive_reload_bit_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    let scene = Scene {
        scene_id: "scene_001".into(),
        srt_start_ms: 1000,
        srt_end_ms: 6000,
        planned_duration_ms: 5000,
        srt_text: "It was raining.".into(),
        img_prompt: "A figure (nv1.png) stands in rain".into(),
        video_prompt: "slow push in".into(),
        characters_used: vec!["nv1".into()],
        location_used: "".into(),
        reference_files: vec!["nv1.png".into()],
        status_img: "pending".into(),
        status_vid: "pending".into(),
        video_note: "".into(),
        segment_id: 1,
    };
    store.write_scenes(std::slice::from_ref(&scene)).unwrap();

    let first = WorkbookStore::load(workbook_path(&dir)).unwrap().scenes();
    assert_eq!(first, vec![scene.clone()]);

    // Rewrite and reload: rows must not drift.
    let mut store = WorkbookStore::load(workbook_path(&dir)).unwrap();
    store.write_scenes(&first).unwrap();
    let second = WorkbookStore::load(workbook_path(&dir)).unwrap().scenes();
    assert_eq!(second, first);
}

#[test]
fn readers_tolerate_short_and_long_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    // A short row (old workbook, fewer columns) and a long row (newer
    // workbook, extra appended column we don't know about).
    let short = vec!["scene_001".to_string(), "1000".to_string()];
    let mut long: Vec<String> = vec![String::new(); SCENE_COLUMNS.len()];
    long[0] = "scene_002".into();
    long[13] = "2".into();
    long.push("from-the-future".into());
    store
        .write_sheet(SHEET_SCENES, SCENE_COLUMNS, vec![short, long])
        .unwrap();

    let scenes = store.scenes();
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].scene_id, "scene_001");
    assert_eq!(scenes[0].srt_start_ms, 1000);
    // Missing trailing cells read as typed defaults, not as errors.
    assert_eq!(scenes[0].img_prompt, "");
    assert_eq!(scenes[0].segment_id, 0);
    assert!(scenes[0].characters_used.is_empty());
    assert_eq!(scenes[1].segment_id, 2);
}

#[test]
fn empty_sheet_reads_as_no_rows_but_exists() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    store.write_characters(&[]).unwrap();
    assert!(store.sheet_exists(SHEET_CHARACTERS));
    assert!(store.characters().is_empty());

    let reloaded = WorkbookStore::load(workbook_path(&dir)).unwrap();
    assert!(reloaded.sheet_exists(SHEET_CHARACTERS));
    assert!(reloaded.characters().is_empty());
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();
    store
        .write_sheet(
            SHEET_META,
            &["key", "value"],
            vec![vec!["schema_version".to_string(), "99".to_string()]],
        )
        .unwrap();
    drop(store);

    let err = WorkbookStore::load(workbook_path(&dir)).unwrap_err();
    assert!(matches!(err.kind(), StoryboardErrorKind::InputInvalid(_)));
}

#[test]
fn stats_count_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = WorkbookStore::open(workbook_path(&dir)).unwrap();

    store
        .write_segments(&[Segment {
            segment_id: 1,
            name: "only".into(),
            srt_start_index: 1,
            srt_end_index: 3,
            image_count: 1,
        }])
        .unwrap();
    store
        .write_director_plan(&[DirectorPlanEntry {
            scene_id: "scene_001".into(),
            segment_id: 1,
            visual_moment: String::new(),
            srt_start_index: 1,
            srt_end_index: 3,
            planned_duration_ms: 3000,
            characters_used: vec![],
            location_used: String::new(),
            status: PlanStatus::Pending,
        }])
        .unwrap();

    let stats = store.stats();
    assert_eq!(stats.segments, 1);
    assert_eq!(stats.scenes_total, 1);
    assert_eq!(stats.scenes_prompted, 0);
}
