// src/core/extractor.rs — Pull the playable pattern out of a model reply

use regex::Regex;

/// Fence tags recognized when no `[extractor] languages` is configured.
pub const DEFAULT_LANGUAGES: &[&str] = &["strudel", "js", "javascript"];

/// Finds fenced code blocks tagged with one of a fixed set of languages.
///
/// Rules:
/// - the opening fence must carry a recognized tag followed by a line break;
///   bare fences never match,
/// - the block ends at the next triple backtick, wherever it appears,
/// - blocks that are empty or whitespace-only are skipped,
/// - an opening fence with no closing fence is ignored.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    /// `None` when no usable tag was configured: nothing ever matches.
    fence: Option<Regex>,
}

impl PatternExtractor {
    pub fn new<S: AsRef<str>>(languages: &[S]) -> Self {
        let tags: Vec<String> = languages
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .map(regex::escape)
            .collect();
        if tags.is_empty() {
            return Self { fence: None };
        }

        let source = format!(r"(?s)```(?:{})\s*\n(.*?)```", tags.join("|"));
        match Regex::new(&source) {
            Ok(fence) => Self { fence: Some(fence) },
            Err(e) => {
                tracing::warn!(error = %e, "Unusable extractor languages; no patterns will match");
                Self { fence: None }
            }
        }
    }

    /// Contents of the last non-empty matching block, trimmed.
    pub fn extract(&self, text: &str) -> Option<String> {
        let fence = self.fence.as_ref()?;
        fence
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|body| body.as_str().trim())
            .filter(|code| !code.is_empty())
            .last()
            .map(str::to_string)
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGES)
    }
}

/// One-shot form of [`PatternExtractor::extract`].
pub fn extract_pattern<S: AsRef<str>>(text: &str, languages: &[S]) -> Option<String> {
    PatternExtractor::new(languages).extract(text)
}
