//! Prompt composition: five fixed templates rendered from a derived
//! attribute set, persisted as sidecar text files per series.

use std::sync::Arc;

use super::{Attribute, PromptSet};
use crate::config::Config;

/// Renders prompt variants and manages their sidecar files.
///
/// Rendering is pure with respect to the attribute set; sidecar writes are
/// best-effort side effects and never fail the pipeline.
pub struct PromptComposer {
    config: Arc<Config>,
}

impl PromptComposer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Render the data, title, terse and base variants.
    ///
    /// The enhanced variant starts empty; it is filled by the enhancement
    /// adapter or loaded back from its sidecar.
    pub fn render(attributes: &[Attribute]) -> PromptSet {
        let data = attributes
            .iter()
            .map(|a| {
                format!(
                    "{}: {} ({} {}/{}, chunk {}, factor {:.6})",
                    a.name, a.selected, a.database, a.selected_index, a.item_count, a.chunk,
                    a.factor
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let adjective = pick(attributes, "adjective");
        let subject = pick(attributes, "subject");
        let title = format!("The {} {}", title_case(adjective), title_case(subject));

        let terse = format!(
            "{} {} {}",
            display(pick(attributes, "primary_color")),
            display(pick(attributes, "material")),
            display(subject),
        );

        let base = format!(
            "A {} {} of a {} {}, {} with {} accents, set in a {} under {}, \
             in the {} manner of the {} period, {} mood, a recurring motif of {}, \
             textures of {}, undertones of {}, composed {}.",
            display(pick(attributes, "mood")),
            display(pick(attributes, "medium")),
            display(adjective),
            display(subject),
            display(pick(attributes, "primary_color")),
            display(pick(attributes, "accent_color")),
            display(pick(attributes, "setting")),
            display(pick(attributes, "lighting")),
            display(pick(attributes, "style")),
            display(pick(attributes, "era")),
            display(pick(attributes, "mood")),
            display(pick(attributes, "motif")),
            display(pick(attributes, "texture")),
            display(pick(attributes, "undertone")),
            display(pick(attributes, "adverb")),
        );

        PromptSet {
            data,
            title,
            terse,
            base,
            enhanced: None,
        }
    }

    /// The author-persona template, used as the enhancement system message.
    pub fn persona(attributes: &[Attribute]) -> String {
        format!(
            "You are a {} artist of the {} period working in {}. Rewrite the \
             image prompt you are given in your own voice. Keep every concrete \
             detail, sharpen the composition, and answer with the prompt alone.",
            display(pick(attributes, "style")),
            display(pick(attributes, "era")),
            display(pick(attributes, "medium")),
        )
    }

    /// Write the data/title/terse/prompt sidecars for `file`.
    ///
    /// Failures are logged and swallowed; a missing sidecar only costs a
    /// re-render later.
    pub fn write_sidecars(&self, series: &str, file: &str, prompts: &PromptSet) {
        let variants = [
            ("data", prompts.data.as_str()),
            ("title", prompts.title.as_str()),
            ("terse", prompts.terse.as_str()),
            ("prompt", prompts.base.as_str()),
        ];
        for (kind, text) in variants {
            self.write_one(series, kind, file, text);
        }
    }

    /// The persisted enhanced prompt, if an earlier run produced one.
    pub fn load_enhanced(&self, series: &str, file: &str) -> Option<String> {
        let path = self.config.sidecar_path(series, "enhanced", file);
        std::fs::read_to_string(path)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn store_enhanced(&self, series: &str, file: &str, text: &str) {
        self.write_one(series, "enhanced", file, text);
    }

    fn write_one(&self, series: &str, kind: &str, file: &str, text: &str) {
        let path = self.config.sidecar_path(series, kind, file);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(kind, error = %e, "failed to create sidecar directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, text) {
            tracing::warn!(kind, path = %path.display(), error = %e, "failed to write sidecar");
        }
    }
}

fn pick<'a>(attributes: &'a [Attribute], name: &str) -> &'a str {
    attributes
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.selected.as_str())
        .unwrap_or("plain")
}

/// Word-pack keys use hyphens; prose uses spaces.
fn display(word: &str) -> String {
    word.replace('-', " ")
}

fn title_case(word: &str) -> String {
    word.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attr(name: &str, database: &str, selected: &str) -> Attribute {
        Attribute {
            database: database.to_string(),
            name: name.to_string(),
            chunk: "0a1b2c".to_string(),
            value: 0x0a1b2c,
            factor: 0.039,
            item_count: 10,
            selected_index: 3,
            selected: selected.to_string(),
        }
    }

    fn sample_attributes() -> Vec<Attribute> {
        vec![
            attr("adverb", "adverbs", "swiftly"),
            attr("adjective", "adjectives", "gilded"),
            attr("subject", "nouns", "lighthouse"),
            attr("primary_color", "colors", "wine-dark"),
            attr("material", "materials", "cast-iron"),
            attr("style", "styles", "tonalist"),
            attr("accent_color", "colors", "amber"),
            attr("mood", "moods", "wistful"),
            attr("setting", "settings", "night-harbour"),
            attr("lighting", "lighting", "moonlight"),
            attr("era", "eras", "age-of-sail"),
            attr("medium", "mediums", "oil-painting"),
            attr("motif", "motifs", "paper-boats"),
            attr("texture", "materials", "driftwood"),
            attr("undertone", "colors", "slate"),
        ]
    }

    #[test]
    fn test_render_is_pure_and_deterministic() {
        let attrs = sample_attributes();
        let a = PromptComposer::render(&attrs);
        let b = PromptComposer::render(&attrs);
        assert_eq!(a.base, b.base);
        assert_eq!(a.data, b.data);
        assert_eq!(a.title, b.title);
        assert_eq!(a.terse, b.terse);
        assert!(a.enhanced.is_none());
    }

    #[test]
    fn test_title_is_title_cased_without_hyphens() {
        let prompts = PromptComposer::render(&sample_attributes());
        assert_eq!(prompts.title, "The Gilded Lighthouse");
    }

    #[test]
    fn test_terse_is_color_material_subject() {
        let prompts = PromptComposer::render(&sample_attributes());
        assert_eq!(prompts.terse, "wine dark cast iron lighthouse");
    }

    #[test]
    fn test_base_prompt_weaves_in_every_slot() {
        let prompts = PromptComposer::render(&sample_attributes());
        for word in [
            "wistful", "oil painting", "gilded", "lighthouse", "wine dark", "amber",
            "night harbour", "moonlight", "tonalist", "age of sail", "paper boats",
            "driftwood", "slate", "swiftly",
        ] {
            assert!(prompts.base.contains(word), "base prompt missing {word:?}");
        }
    }

    #[test]
    fn test_data_variant_carries_the_derivation_trail() {
        let prompts = PromptComposer::render(&sample_attributes());
        assert_eq!(prompts.data.lines().count(), 15);
        assert!(prompts.data.contains("chunk 0a1b2c"));
        assert!(prompts.data.contains("3/10"));
    }

    #[test]
    fn test_missing_slot_falls_back_to_plain() {
        let prompts = PromptComposer::render(&[]);
        assert_eq!(prompts.title, "The Plain Plain");
    }

    #[test]
    fn test_persona_references_style_and_medium() {
        let persona = PromptComposer::persona(&sample_attributes());
        assert!(persona.contains("tonalist"));
        assert!(persona.contains("oil painting"));
    }

    #[test]
    fn test_sidecars_written_under_series_tree() {
        let dir = tempdir().unwrap();
        let config = Arc::new(Config::with_data_root(dir.path()));
        let composer = PromptComposer::new(config.clone());
        let prompts = PromptComposer::render(&sample_attributes());
        composer.write_sidecars("wild", "0xabc", &prompts);

        for kind in ["data", "title", "terse", "prompt"] {
            let path = config.sidecar_path("wild", kind, "0xabc");
            assert!(path.exists(), "missing sidecar {kind}");
        }
        let stored = std::fs::read_to_string(config.sidecar_path("wild", "terse", "0xabc")).unwrap();
        assert_eq!(stored, prompts.terse);
    }

    #[test]
    fn test_enhanced_sidecar_roundtrip() {
        let dir = tempdir().unwrap();
        let config = Arc::new(Config::with_data_root(dir.path()));
        let composer = PromptComposer::new(config);
        assert!(composer.load_enhanced("wild", "0xabc").is_none());

        composer.store_enhanced("wild", "0xabc", "a finer prompt");
        assert_eq!(
            composer.load_enhanced("wild", "0xabc").as_deref(),
            Some("a finer prompt")
        );
    }

    #[test]
    fn test_blank_enhanced_sidecar_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let config = Arc::new(Config::with_data_root(dir.path()));
        let composer = PromptComposer::new(config);
        composer.store_enhanced("wild", "0xabc", "   \n");
        assert!(composer.load_enhanced("wild", "0xabc").is_none());
    }
}
