//! Reference resolution for scene prompts.
//!
//! Prompts address reference images inline as `(nv1.png)` / `(loc2.png)`
//! tokens. The IDs extracted here become the scene's authoritative
//! character/location metadata, so extraction is deliberately liberal in
//! what it accepts (case, optional underscore) and strict in what it
//! emits (lowercase canonical `nv<N>` / `loc<N>`).

use regex::Regex;

/// IDs extracted from a prompt, in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedRefs {
    /// Unique character IDs, canonical form
    pub characters: Vec<String>,
    /// First matched location ID, canonical form
    pub location: Option<String>,
}

impl ExtractedRefs {
    /// `{id}.png` filenames for the union of character and location IDs.
    pub fn reference_files(&self) -> Vec<String> {
        self.characters
            .iter()
            .chain(self.location.iter())
            .map(|id| format!("{id}.png"))
            .collect()
    }
}

/// Parses character/location tokens out of prompt text.
#[derive(Debug)]
pub struct RefResolver {
    character_pattern: Regex,
    location_pattern: Regex,
}

impl RefResolver {
    /// Build the resolver with its token patterns.
    pub fn new() -> Self {
        Self {
            character_pattern: Regex::new(r"\(([nN][vV]_?\d+)\.png\)")
                .expect("character token pattern is valid"),
            location_pattern: Regex::new(r"\(([lL][oO][cC]_?\d+)\.png\)")
                .expect("location token pattern is valid"),
        }
    }

    /// Extract reference IDs from prompt text.
    ///
    /// Characters are deduplicated preserving first-occurrence order;
    /// only the first location token counts.
    pub fn extract(&self, prompt: &str) -> ExtractedRefs {
        let mut characters = Vec::new();
        for capture in self.character_pattern.captures_iter(prompt) {
            let id = canonicalize(&capture[1]);
            if !characters.contains(&id) {
                characters.push(id);
            }
        }

        let location = self
            .location_pattern
            .captures(prompt)
            .map(|capture| canonicalize(&capture[1]));

        ExtractedRefs {
            characters,
            location,
        }
    }

    /// Append `(id.png)` annotations for any of `ids` the prompt does not
    /// already reference, so prompt text and metadata stay in lockstep.
    pub fn annotate<'a>(&self, prompt: &str, ids: impl Iterator<Item = &'a str>) -> String {
        let present = self.extract(prompt);
        let missing: Vec<String> = ids
            .map(canonicalize)
            .filter(|id| {
                !present.characters.iter().any(|c| c == id)
                    && present.location.as_deref() != Some(id.as_str())
            })
            .map(|id| format!("({id}.png)"))
            .collect();

        if missing.is_empty() {
            prompt.to_string()
        } else {
            format!("{} Reference: {}", prompt.trim_end(), missing.join(", "))
        }
    }
}

impl Default for RefResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and strip the optional underscore: `NV_3` becomes `nv3`.
fn canonicalize(raw: &str) -> String {
    raw.to_ascii_lowercase().replace('_', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_first_occurrence_order() {
        let resolver = RefResolver::new();
        let refs =
            resolver.extract("A woman (nv2.png) hands a letter to a man (nv1.png) (nv2.png).");
        assert_eq!(refs.characters, vec!["nv2", "nv1"]);
        assert_eq!(refs.location, None);
    }

    #[test]
    fn normalizes_case_and_underscores() {
        let resolver = RefResolver::new();
        let refs = resolver.extract("Figure (NV_3.png) by a lake (Loc_2.png) then (loc1.png).");
        assert_eq!(refs.characters, vec!["nv3"]);
        assert_eq!(refs.location.as_deref(), Some("loc2"));
    }

    #[test]
    fn reference_files_union() {
        let refs = ExtractedRefs {
            characters: vec!["nv1".into(), "nv2".into()],
            location: Some("loc1".into()),
        };
        assert_eq!(refs.reference_files(), vec!["nv1.png", "nv2.png", "loc1.png"]);
    }

    #[test]
    fn annotate_appends_only_missing() {
        let resolver = RefResolver::new();
        let ids = ["nv1".to_string(), "loc1".to_string()];
        let annotated = resolver.annotate(
            "A figure (nv1.png) stands.",
            ids.iter().map(String::as_str),
        );
        assert_eq!(annotated, "A figure (nv1.png) stands. Reference: (loc1.png)");

        let already = resolver.annotate(&annotated, ids.iter().map(String::as_str));
        assert_eq!(already, annotated);
    }
}
