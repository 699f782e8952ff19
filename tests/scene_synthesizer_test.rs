//! Scene synthesizer: fallback prompts, duplicate floods, reference
//! reconciliation, and the video note policy.

use std::collections::HashMap;
use storyboard::{
    DirectorPlanEntry, PlanStatus, PromptPair, RefResolver, SceneSynthesizer, Segment, SrtEntry,
    VideoMode,
};

fn entries(n: u32) -> Vec<SrtEntry> {
    (1..=n)
        .map(|i| SrtEntry {
            index: i,
            start_ms: u64::from(i - 1) * 2000,
            end_ms: u64::from(i) * 2000 - 100,
            text: format!("line {i} of the story"),
        })
        .collect()
}

fn director(scene_id: &str, segment_id: u32, start: u32, end: u32) -> DirectorPlanEntry {
    DirectorPlanEntry {
        scene_id: scene_id.to_string(),
        segment_id,
        visual_moment: "a quiet beat".to_string(),
        srt_start_index: start,
        srt_end_index: end,
        planned_duration_ms: 4000,
        characters_used: vec!["nv1".to_string()],
        location_used: "loc1".to_string(),
        status: PlanStatus::Planned,
    }
}

fn segments() -> HashMap<u32, Segment> {
    [
        (
            1,
            Segment {
                segment_id: 1,
                name: "opening".into(),
                srt_start_index: 1,
                srt_end_index: 5,
                image_count: 1,
            },
        ),
        (
            2,
            Segment {
                segment_id: 2,
                name: "ending".into(),
                srt_start_index: 6,
                srt_end_index: 10,
                image_count: 1,
            },
        ),
    ]
    .into_iter()
    .collect()
}

#[test]
fn prompt_tokens_are_authoritative_metadata() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![director("scene_001", 1, 1, 5)];
    let mut prompts = HashMap::new();
    prompts.insert(
        "scene_001".to_string(),
        PromptPair {
            img_prompt: "A sailor (NV_2.png) waves from the pier (loc2.png)".to_string(),
            video_prompt: "gentle waves".to_string(),
        },
    );

    let scenes = synth.synthesize_batch(&batch, &prompts, &segments(), &entries(10));
    let scene = &scenes[0];

    // Extracted IDs win over the director plan's nv1/loc1.
    assert_eq!(scene.characters_used, vec!["nv2"]);
    assert_eq!(scene.location_used, "loc2");
    assert_eq!(scene.reference_files, vec!["nv2.png", "loc2.png"]);

    // The prompt text and the metadata agree exactly.
    let resolver = RefResolver::new();
    let extracted = resolver.extract(&scene.img_prompt);
    assert_eq!(extracted.characters, scene.characters_used);
    assert_eq!(extracted.location.as_deref(), Some("loc2"));
}

#[test]
fn missing_tokens_fall_back_to_director_metadata_and_annotate() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![director("scene_001", 1, 1, 5)];
    let mut prompts = HashMap::new();
    prompts.insert(
        "scene_001".to_string(),
        PromptPair {
            img_prompt: "A man alone in the rain".to_string(),
            video_prompt: String::new(),
        },
    );

    let scenes = synth.synthesize_batch(&batch, &prompts, &segments(), &entries(10));
    let scene = &scenes[0];

    assert_eq!(scene.characters_used, vec!["nv1"]);
    assert_eq!(scene.location_used, "loc1");
    // The annotation keeps prompt and metadata in lockstep.
    assert!(scene.img_prompt.contains("(nv1.png)"));
    assert!(scene.img_prompt.contains("(loc1.png)"));

    let resolver = RefResolver::new();
    let extracted = resolver.extract(&scene.img_prompt);
    assert_eq!(extracted.characters, scene.characters_used);
    assert_eq!(extracted.location.as_deref(), Some("loc1"));
}

#[test]
fn empty_prompt_takes_unique_fallback() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![
        director("scene_001", 1, 1, 5),
        director("scene_002", 2, 6, 10),
    ];
    // No prompts at all: the whole batch failed.
    let scenes = synth.synthesize_batch(&batch, &HashMap::new(), &segments(), &entries(10));

    assert_eq!(scenes.len(), 2);
    assert!(!scenes[0].img_prompt.is_empty());
    assert!(!scenes[1].img_prompt.is_empty());
    assert_ne!(scenes[0].img_prompt, scenes[1].img_prompt);
    assert!(scenes[0].img_prompt.contains("scene_001"));
    assert!(scenes[0].img_prompt.contains("opening"));
    // Fallback metadata still comes from the director plan.
    assert_eq!(scenes[0].characters_used, vec!["nv1"]);
}

#[test]
fn duplicate_flood_replaces_duplicates_only() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let mut batch = Vec::new();
    let mut prompts = HashMap::new();
    for i in 1..=10u32 {
        let scene_id = format!("scene_{i:03}");
        batch.push(director(&scene_id, 1, i.min(5), i.min(5)));
        let prompt = if i == 10 {
            "A unique closing shot (nv1.png)".to_string()
        } else {
            "The same image again (nv1.png)".to_string()
        };
        prompts.insert(
            scene_id,
            PromptPair {
                img_prompt: prompt,
                video_prompt: String::new(),
            },
        );
    }

    let scenes = synth.synthesize_batch(&batch, &prompts, &segments(), &entries(10));

    // 9 of 10 duplicated exceeds the 0.8 threshold: each duplicate gets a
    // unique fallback, the distinct prompt survives.
    assert_eq!(scenes.len(), 10);
    let mut seen = std::collections::HashSet::new();
    for scene in &scenes {
        assert!(!scene.img_prompt.is_empty());
        assert!(seen.insert(scene.img_prompt.clone()), "duplicate prompt survived");
    }
    assert!(scenes[9].img_prompt.contains("A unique closing shot"));
    assert!(scenes[0].img_prompt.contains("scene_001"));
}

#[test]
fn below_threshold_duplicates_are_left_alone() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![
        director("scene_001", 1, 1, 5),
        director("scene_002", 2, 6, 10),
        director("scene_003", 2, 6, 10),
        director("scene_004", 2, 6, 10),
    ];
    let mut prompts = HashMap::new();
    for (i, text) in ["same (nv1.png)", "same (nv1.png)", "other (nv1.png)", "third (nv1.png)"]
        .iter()
        .enumerate()
    {
        prompts.insert(
            format!("scene_{:03}", i + 1),
            PromptPair {
                img_prompt: text.to_string(),
                video_prompt: String::new(),
            },
        );
    }

    // Duplicate rate 2/4 = 0.5: taste is not corrected.
    let scenes = synth.synthesize_batch(&batch, &prompts, &segments(), &entries(10));
    assert_eq!(scenes[0].img_prompt, scenes[1].img_prompt);
}

#[test]
fn video_note_basic_skips_segments_after_the_first() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![
        director("scene_001", 1, 1, 5),
        director("scene_002", 2, 6, 10),
    ];
    let scenes = synth.synthesize_batch(&batch, &HashMap::new(), &segments(), &entries(10));

    assert_eq!(scenes[0].video_note, "");
    assert_eq!(scenes[1].video_note, "SKIP");
}

#[test]
fn video_note_full_never_skips() {
    let synth = SceneSynthesizer::new(VideoMode::Full, 0.8);
    let batch = vec![
        director("scene_001", 1, 1, 5),
        director("scene_002", 2, 6, 10),
    ];
    let scenes = synth.synthesize_batch(&batch, &HashMap::new(), &segments(), &entries(10));

    assert_eq!(scenes[0].video_note, "");
    assert_eq!(scenes[1].video_note, "");
}

#[test]
fn every_field_is_populated() {
    let synth = SceneSynthesizer::new(VideoMode::Basic, 0.8);
    let batch = vec![director("scene_001", 1, 2, 4)];
    let scenes = synth.synthesize_batch(&batch, &HashMap::new(), &segments(), &entries(10));
    let scene = &scenes[0];

    assert_eq!(scene.scene_id, "scene_001");
    assert_eq!(scene.segment_id, 1);
    assert_eq!(scene.srt_start_ms, 2000);
    assert_eq!(scene.srt_end_ms, 8000 - 100);
    assert_eq!(scene.planned_duration_ms, 4000);
    assert!(scene.srt_text.contains("line 2"));
    assert!(scene.srt_text.contains("line 4"));
    assert_eq!(scene.status_img, "pending");
    assert_eq!(scene.status_vid, "pending");
}
