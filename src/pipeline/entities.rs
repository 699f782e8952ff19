//! Stages 3 and 4: character and location tables.
//!
//! Same shape: one LLM call over the full script, IDs assigned in
//! returned order (`nv1, nv2, ...` / `loc1, loc2, ...`). Empty results
//! are acceptable; even an unusable response still writes the (empty)
//! sheet so the stage reads as complete on resume.

use crate::llm::{extract_and_parse, CompletionDriver, CompletionRequest};
use crate::pipeline::StageContext;
use crate::srt;
use crate::workbook::{
    Character, Location, StoryAnalysis, WorkbookStore, SHEET_CHARACTERS, SHEET_LOCATIONS,
};
use crate::StoryboardResult;
use serde::Deserialize;

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Deserialize)]
struct RawCharacter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    appearance: String,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    atmosphere: String,
}

/// Sheet existence is the checkpoint: the sheet may legitimately be empty.
pub fn characters_complete(store: &WorkbookStore, _ctx: &StageContext<'_>) -> bool {
    store.sheet_exists(SHEET_CHARACTERS)
}

pub fn locations_complete(store: &WorkbookStore, _ctx: &StageContext<'_>) -> bool {
    store.sheet_exists(SHEET_LOCATIONS)
}

pub async fn run_characters<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let analysis = store.story_analysis().unwrap_or_default();
    let script = srt::slice_text(ctx.entries, 1, ctx.total());
    let request =
        CompletionRequest::new(character_prompt(&analysis, &script), TEMPERATURE, MAX_TOKENS);

    let raw = match call(driver, &request).await {
        Ok(raw) => raw,
        Err(message) => {
            ctx.progress
                .warn(&format!("character extraction unusable ({message}), continuing with none"));
            Vec::new()
        }
    };

    let characters: Vec<Character> = raw
        .into_iter()
        .filter(|r: &RawCharacter| !r.name.trim().is_empty())
        .enumerate()
        .map(|(i, r)| Character {
            character_id: format!("nv{}", i + 1),
            name: r.name.trim().to_string(),
            description: r.description.trim().to_string(),
            appearance: r.appearance.trim().to_string(),
        })
        .collect();

    store.write_characters(&characters)?;
    ctx.progress
        .info(&format!("characters: {} found", characters.len()));
    Ok(())
}

pub async fn run_locations<D: CompletionDriver>(
    driver: &D,
    ctx: &StageContext<'_>,
    store: &mut WorkbookStore,
) -> StoryboardResult<()> {
    let analysis = store.story_analysis().unwrap_or_default();
    let script = srt::slice_text(ctx.entries, 1, ctx.total());
    let request =
        CompletionRequest::new(location_prompt(&analysis, &script), TEMPERATURE, MAX_TOKENS);

    let raw = match call(driver, &request).await {
        Ok(raw) => raw,
        Err(message) => {
            ctx.progress
                .warn(&format!("location extraction unusable ({message}), continuing with none"));
            Vec::new()
        }
    };

    let locations: Vec<Location> = raw
        .into_iter()
        .filter(|r: &RawLocation| !r.name.trim().is_empty())
        .enumerate()
        .map(|(i, r)| Location {
            location_id: format!("loc{}", i + 1),
            name: r.name.trim().to_string(),
            description: r.description.trim().to_string(),
            atmosphere: r.atmosphere.trim().to_string(),
        })
        .collect();

    store.write_locations(&locations)?;
    ctx.progress
        .info(&format!("locations: {} found", locations.len()));
    Ok(())
}

async fn call<D, T>(driver: &D, request: &CompletionRequest) -> Result<Vec<T>, String>
where
    D: CompletionDriver,
    T: serde::de::DeserializeOwned,
{
    let response = driver.complete(request).await.map_err(|e| e.to_string())?;
    extract_and_parse(&response).map_err(|e| e.to_string())
}

fn character_prompt(analysis: &StoryAnalysis, script: &str) -> String {
    format!(
        "You are a casting director. List the distinct recurring characters \
         in this {} story.\n\n\
         Script:\n{script}\n\n\
         Respond with ONLY a JSON array, main character first:\n\
         [{{\"name\": \"...\", \"description\": \"role in the story\", \
         \"appearance\": \"physical appearance for an illustrator\"}}]\n\
         Return [] if the story has no recurring characters.",
        analysis.genre
    )
}

fn location_prompt(analysis: &StoryAnalysis, script: &str) -> String {
    format!(
        "You are a production designer. List the distinct recurring settings \
         in this {} story.\n\n\
         Script:\n{script}\n\n\
         Respond with ONLY a JSON array, most prominent first:\n\
         [{{\"name\": \"...\", \"description\": \"what the place is\", \
         \"atmosphere\": \"look and light for an illustrator\"}}]\n\
         Return [] if no setting recurs.",
        analysis.genre
    )
}
