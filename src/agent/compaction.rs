//! History compaction for model context.
//!
//! Scores every history item, keeps the best `max_history_count`, restores
//! chronological order and shortens each kept item on its own:
//!
//! ```text
//! score = decay^age_minutes × position_weight^position × keyword × type
//! ```
//!
//! `position` counts from 0 at the oldest item, so later items weigh more.
//! The raw buffer is never mutated; callers get a [`CompactionResult`].

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::CompactionConfig;
use crate::error::{GateError, Result};
use crate::utils::text::is_cjk;

/// Files that always survive [`summarize_project_files`].
static IMPORTANT_FILES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"package\.json$",
        r"tsconfig\.json$",
        r"vite\.config\.",
        r"main\.[jt]sx?$",
        r"App\.[jt]sx?$",
        r"index\.[jt]sx?$",
        r"README\.md$",
        r"\.env$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const SENTENCE_BREAKS: &[char] = &['。', '.', '!', '！', '?', '？', '\n'];

/// Lower and upper bound of the retention estimate.
const RETENTION_FLOOR: f64 = 0.7;
const RETENTION_CEILING: f64 = 0.9;

/// Who produced a history item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    User,
    Ai,
    System,
}

impl HistoryKind {
    fn weight(&self) -> f64 {
        match self {
            HistoryKind::System => 1.5,
            HistoryKind::User => 1.2,
            HistoryKind::Ai => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::User => "user",
            HistoryKind::Ai => "ai",
            HistoryKind::System => "system",
        }
    }
}

/// One entry of the conversation buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Score from the last compaction pass. Informational only.
    #[serde(default)]
    pub importance: f64,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
}

impl HistoryItem {
    pub fn new(kind: HistoryKind, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            timestamp,
            importance: 0.0,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionResult {
    /// One `[type] content` line per kept item, oldest first.
    pub summary: String,
    /// Kept items with compressed content and their score as `importance`.
    pub items: Vec<HistoryItem>,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    /// `compressed_tokens / original_tokens`, capped at 1. Empty history gives
    /// 0; non-empty history without countable tokens gives 1.
    pub compression_ratio: f64,
    /// Estimated share of information kept, within [0.7, 0.9].
    pub info_retention: f64,
}

/// Estimate tokens without a tokenizer.
///
/// CJK ideographs weigh 1.5, each run of ASCII letters 1.3 and every other
/// non-whitespace character 0.5.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut words = 0usize;
    let mut symbols = 0usize;
    let mut in_word = false;

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            if !in_word {
                words += 1;
            }
            in_word = true;
            continue;
        }
        in_word = false;
        if is_cjk(c) {
            cjk += 1;
        } else if !c.is_whitespace() {
            symbols += 1;
        }
    }

    (cjk as f64 * 1.5 + words as f64 * 1.3 + symbols as f64 * 0.5).ceil() as usize
}

/// Trim a project file list to `max_files` entries.
///
/// Configuration and entry-point files come first and are never dropped;
/// remaining slots are filled in input order. A trailing
/// `... and N more files` marker reports what was left out.
pub fn summarize_project_files(files: &[String], max_files: usize) -> Vec<String> {
    if files.len() <= max_files {
        return files.to_vec();
    }

    let (important, others): (Vec<&String>, Vec<&String>) = files
        .iter()
        .partition(|f| IMPORTANT_FILES.iter().any(|re| re.is_match(f)));

    let slots = max_files.saturating_sub(important.len());
    let mut out: Vec<String> = important
        .into_iter()
        .chain(others.into_iter().take(slots))
        .cloned()
        .collect();
    let omitted = files.len() - out.len();
    if omitted > 0 {
        out.push(format!("... and {} more files", omitted));
    }
    out
}

pub struct ContextCompactor {
    config: CompactionConfig,
    keywords: AhoCorasick,
}

impl ContextCompactor {
    pub fn new(config: CompactionConfig) -> Result<Self> {
        let keywords = build_matcher(&config.keywords)?;
        Ok(Self { config, keywords })
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Replace the configuration. The old one stays active on error.
    pub fn update_config(&mut self, config: CompactionConfig) -> Result<()> {
        if config.keywords != self.config.keywords {
            self.keywords = build_matcher(&config.keywords)?;
        }
        self.config = config;
        Ok(())
    }

    /// Compact `history` as seen at `now` (unix milliseconds).
    pub fn compact(&self, history: &[HistoryItem], now: i64) -> CompactionResult {
        let mut scored: Vec<(usize, f64)> = history
            .iter()
            .enumerate()
            .map(|(position, item)| (position, self.score(item, position, now)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.max_history_count);
        scored.sort_by(|a, b| {
            history[a.0]
                .timestamp
                .cmp(&history[b.0].timestamp)
                .then(a.0.cmp(&b.0))
        });

        let items: Vec<HistoryItem> = scored
            .iter()
            .map(|(idx, score)| {
                let item = &history[*idx];
                HistoryItem {
                    content: self.compress(&item.content),
                    timestamp: item.timestamp,
                    importance: *score,
                    kind: item.kind,
                }
            })
            .collect();

        let summary = items
            .iter()
            .map(|item| format!("[{}] {}", item.kind.as_str(), item.content))
            .collect::<Vec<_>>()
            .join("\n");

        let original_tokens = estimate_tokens(&join_contents(history));
        let compressed_tokens = estimate_tokens(&join_contents(&items));
        let compression_ratio = if history.is_empty() {
            0.0
        } else if original_tokens == 0 {
            1.0
        } else {
            (compressed_tokens as f64 / original_tokens as f64).min(1.0)
        };

        let keep_ratio = if history.is_empty() {
            1.0
        } else {
            items.len() as f64 / history.len() as f64
        };

        CompactionResult {
            summary,
            items,
            original_tokens,
            compressed_tokens,
            compression_ratio,
            info_retention: (keep_ratio * 1.5).clamp(RETENTION_FLOOR, RETENTION_CEILING),
        }
    }

    fn score(&self, item: &HistoryItem, position: usize, now: i64) -> f64 {
        let age_minutes = (now - item.timestamp).max(0) as f64 / 60_000.0;
        let time = self.config.time_decay_factor.powf(age_minutes)
            * self.config.position_weight.powi(position as i32);
        time * self.keyword_score(&item.content) * item.kind.weight()
    }

    fn keyword_score(&self, content: &str) -> f64 {
        let mut seen = vec![false; self.keywords.patterns_len()];
        for m in self.keywords.find_overlapping_iter(content) {
            seen[m.pattern().as_usize()] = true;
        }
        let matches = seen.iter().filter(|hit| **hit).count();
        self.config
            .keyword_weight
            .powi(matches as i32)
            .min(self.config.keyword_cap)
    }

    fn has_keyword(&self, text: &str) -> bool {
        self.keywords.is_match(text)
    }

    /// Shorten one item's content.
    fn compress(&self, content: &str) -> String {
        let content = content.trim();
        if content.chars().count() <= self.config.min_retain_length {
            return content.to_string();
        }

        let sentences: Vec<&str> = content
            .split(SENTENCE_BREAKS)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if sentences.len() <= 2 {
            return content.to_string();
        }

        let important: Vec<&str> = sentences
            .iter()
            .copied()
            .filter(|s| self.has_keyword(s))
            .take(2)
            .collect();
        if !important.is_empty() {
            return important.join("。");
        }

        format!("{}...{}", sentences[0], sentences[sentences.len() - 1])
    }
}

fn build_matcher(keywords: &[String]) -> Result<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(keywords)
        .map_err(|e| GateError::Config(format!("invalid compaction keywords: {}", e)))
}

fn join_contents(items: &[HistoryItem]) -> String {
    items
        .iter()
        .map(|i| i.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
