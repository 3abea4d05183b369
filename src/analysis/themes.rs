//! Theme extraction with two modes selected by corpus size.
//!
//! Corpora up to [`SINGLE_PASS_MAX_CHARS`] characters go through one model
//! call. Larger corpora stream through overlapping windows; each window
//! sees the accumulated theme names as context and its output is merged
//! into the accumulator (same-name themes extend their statements and keep
//! the max frequency). Enhanced themes are only produced in single-pass
//! mode.

use serde::Deserialize;

use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, TaskKind};
use crate::types::Theme;

use super::AnalysisContext;

/// Largest corpus (in characters) still analysed in a single pass.
pub const SINGLE_PASS_MAX_CHARS: usize = 50_000;
/// Streaming window size in characters.
pub const WINDOW_SIZE: usize = 50_000;
/// Overlap between consecutive windows in characters.
pub const WINDOW_OVERLAP: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ThemesOut {
    #[serde(default)]
    pub themes: Vec<Theme>,
    #[serde(default)]
    pub enhanced_themes: Vec<Theme>,
}

/// Whether a corpus of `chars` characters uses streaming extraction.
pub fn uses_streaming(chars: usize) -> bool {
    chars > SINGLE_PASS_MAX_CHARS
}

/// Window spans `(start, end)` in character offsets for a corpus of `chars`.
pub fn window_spans(chars: usize) -> Vec<(usize, usize)> {
    let step = WINDOW_SIZE - WINDOW_OVERLAP;
    let mut spans = Vec::new();
    let mut start = 0;
    while start < chars {
        spans.push((start, (start + WINDOW_SIZE).min(chars)));
        start += step;
    }
    spans
}

/// Character-offset slice that is safe on multi-byte text.
fn slice_chars(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Merge window output into the accumulator.
pub(super) fn merge_themes(accumulated: &mut Vec<Theme>, new_themes: Vec<Theme>) {
    for theme in new_themes {
        match accumulated.iter_mut().find(|t| t.name == theme.name) {
            Some(existing) => {
                existing.statements.extend(theme.statements);
                existing.frequency = existing.frequency.max(theme.frequency);
            }
            None => accumulated.push(theme),
        }
    }
}

pub(super) async fn extract(
    gateway: &LlmGateway,
    corpus: &str,
    ctx: &mut AnalysisContext,
) -> Result<ThemesOut> {
    let chars = corpus.chars().count();
    if uses_streaming(chars) {
        extract_streaming(gateway, corpus, chars, ctx).await
    } else {
        extract_single_pass(gateway, corpus, ctx).await
    }
}

async fn extract_single_pass(
    gateway: &LlmGateway,
    corpus: &str,
    ctx: &mut AnalysisContext,
) -> Result<ThemesOut> {
    let prompt = format!(
        r#"Extract comprehensive themes from simulation data with stakeholder attribution.

SIMULATION DATA:
{corpus}

REQUIREMENTS:
1. Identify 5-12 key themes
2. Extract authentic quotes (never generate fake quotes)
3. Calculate frequency and sentiment scores in [0,1] and [-1,1]

Return JSON: {{"themes": [{{"name": "...", "frequency": 0.8, "sentiment": -0.2, "statements": ["quote"], "keywords": ["kw"], "definition": "one sentence"}}], "enhanced_themes": [ ... same shape ... ]}}"#
    );

    ctx.record_exchange();
    gateway
        .invoke(TaskKind::ThemeExtraction, &prompt, &CallOptions::default())
        .await
}

async fn extract_streaming(
    gateway: &LlmGateway,
    corpus: &str,
    chars: usize,
    ctx: &mut AnalysisContext,
) -> Result<ThemesOut> {
    tracing::info!(chars, "streaming theme extraction for large corpus");

    let mut accumulated: Vec<Theme> = Vec::new();
    for (start, end) in window_spans(chars) {
        gateway.check_cancelled()?;
        let window_text = slice_chars(corpus, start, end);
        let known: Vec<&str> = accumulated.iter().map(|t| t.name.as_str()).collect();

        let prompt = format!(
            r#"Continue theme extraction from simulation data.

ACCUMULATED THEMES SO FAR: [{known}]

CURRENT DATA WINDOW ({start}-{end}):
{window_text}

Extract themes from this window and merge with accumulated themes. Reuse an accumulated theme name when the window supports it.

Return JSON: {{"themes": [{{"name": "...", "frequency": 0.8, "sentiment": -0.2, "statements": ["quote"], "keywords": ["kw"], "definition": "one sentence"}}]}}"#,
            known = known.join(", "),
        );

        ctx.record_exchange();
        let window: ThemesOut = gateway
            .invoke(TaskKind::ThemeExtraction, &prompt, &CallOptions::default())
            .await?;
        merge_themes(&mut accumulated, window.themes);
    }

    Ok(ThemesOut {
        themes: accumulated,
        enhanced_themes: Vec::new(),
    })
}
