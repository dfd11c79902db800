//! Prompt text for the generation-backed stages.
//!
//! Each prompt can be overridden from the `[prompts]` config section; an
//! empty override falls back to the built-in text.

use paperpipe_shared::PromptsConfig;

/// Appended after the section keys sent to the chunk selector.
pub const SELECTION_SUFFIX: &str = "\n\nSection keys:\n";

/// Appended after each section body sent to the summarizer.
pub const SUMMARY_SUFFIX: &str = "\n\nSummarized text:\n";

/// Appended after each abstract sent for keyword extraction.
pub const ABSTRACT_KEYWORDS_SUFFIX: &str = "\nOutput List:\n";

/// Marker stored for a section whose summary could not be generated.
pub const SUMMARY_FAILED: &str = "Summary generation failed.";

/// Whether a stored summary is the failure marker, before or after
/// normalization.
pub fn is_failed_summary(summary: &str) -> bool {
    summary == SUMMARY_FAILED || summary == paperpipe_markdown::normalize_text(SUMMARY_FAILED)
}

const DEFAULT_SELECTION: &str = "\
You are given the section keys of a scientific paper as a JSON list. \
Return a JSON list containing only the keys of sections with descriptive \
content (abstract, introduction, method, experiments, results, discussion, \
conclusion). Drop references, acknowledgements, appendices and author notes. \
Return the keys exactly as given and nothing else.";

const DEFAULT_KEYWORDS: &str = "\
Extract the main technical keywords and key phrases from the following text. \
Return a JSON list of short lower-case strings and nothing else.\n";

const DEFAULT_REFERENCES: &str = "\
The following text is the reference list of a scientific paper. Return a JSON \
list with the title of every cited work, one string per reference, and \
nothing else.\n";

const DEFAULT_SUMMARY: &str = "\
Summarize the following section of a scientific paper in a few sentences. \
Keep technical terms, numbers and named methods. Do not add information \
that is not in the text.";

const DEFAULT_SCHEMA: &str = "\
Analyze the HTML of a search results page below and produce a CSS extraction \
schema for the repeated result items as a JSON object of the form \
{\"name\": string, \"baseSelector\": string, \"fields\": [{\"name\": string, \
\"selector\": string, \"type\": \"text\" | \"attribute\" | \"html\", \
\"attribute\": string}]}. Include at least the fields \"title\" and \"url\" \
(the result link's href). Selectors in fields are relative to baseSelector. \
Return only the JSON object.\n\nHTML:\n";

/// Resolved prompt set.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub selection: String,
    pub keywords: String,
    pub references: String,
    pub summary: String,
    pub schema: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::from_config(&PromptsConfig::default())
    }
}

impl Prompts {
    pub fn from_config(config: &PromptsConfig) -> Self {
        Self {
            selection: pick(&config.selection, DEFAULT_SELECTION),
            keywords: pick(&config.keywords, DEFAULT_KEYWORDS),
            references: pick(&config.references, DEFAULT_REFERENCES),
            summary: pick(&config.summary, DEFAULT_SUMMARY),
            schema: pick(&config.schema, DEFAULT_SCHEMA),
        }
    }
}

fn pick(configured: &str, default: &str) -> String {
    if configured.trim().is_empty() {
        default.to_string()
    } else {
        configured.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overrides_fall_back() {
        let config = PromptsConfig {
            summary: "Summarize briefly.".into(),
            keywords: "   ".into(),
            ..Default::default()
        };
        let prompts = Prompts::from_config(&config);
        assert_eq!(prompts.summary, "Summarize briefly.");
        assert_eq!(prompts.keywords, DEFAULT_KEYWORDS);
        assert!(prompts.schema.contains("baseSelector"));
    }
}
