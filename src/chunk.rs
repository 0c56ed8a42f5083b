//! Token-window text chunker.
//!
//! Text is tokenized with the `cl100k_base` byte-pair encoding, so token
//! counts match what OpenAI-compatible embedding endpoints bill and truncate
//! against. The encoder is built once per process.
//!
//! Windows hold up to `max_tokens` tokens. Each next window starts
//! `overlap_tokens` before the previous one ended, until a window reaches
//! the end of the token sequence. A window boundary can fall inside a
//! multi-byte character; the partial character at that edge is dropped from
//! the window text, while `token_count` still reports the full window.

use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::{Error, Result};

/// Tokens a single character can spread over at a window edge.
const MAX_EDGE_TRIM: usize = 3;

static ENCODER: OnceLock<CoreBPE> = OnceLock::new();

/// One emitted window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub text: String,
    pub token_count: usize,
    /// Token offset of the window start (inclusive).
    pub start_token: usize,
    /// Token offset of the window end (exclusive).
    pub end_token: usize,
}

fn encoder() -> Result<&'static CoreBPE> {
    if let Some(bpe) = ENCODER.get() {
        return Ok(bpe);
    }
    let bpe = cl100k_base().map_err(|e| Error::Tokenizer(e.to_string()))?;
    Ok(ENCODER.get_or_init(|| bpe))
}

pub fn count_tokens(text: &str) -> Result<usize> {
    Ok(encoder()?.encode_ordinary(text).len())
}

/// Split text into overlapping token windows.
///
/// Returns an empty vector for empty input. Fails with
/// [`Error::InvalidChunking`] when `overlap_tokens >= max_tokens`, since the
/// window start could then never advance.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<TextWindow>> {
    if max_tokens == 0 || overlap_tokens >= max_tokens {
        return Err(Error::InvalidChunking {
            max_tokens,
            overlap: overlap_tokens,
        });
    }

    let bpe = encoder()?;
    let tokens = bpe.encode_ordinary(text);

    // Decode a token range, shaving edge tokens that carry only part of a
    // UTF-8 sequence.
    let decode = |start: usize, end: usize| -> String {
        for trim in 0..=2 * MAX_EDGE_TRIM {
            for head in 0..=trim.min(MAX_EDGE_TRIM) {
                let tail = trim - head;
                if tail > MAX_EDGE_TRIM || start + head >= end.saturating_sub(tail) {
                    continue;
                }
                if let Ok(text) = bpe.decode(tokens[start + head..end - tail].to_vec()) {
                    return text;
                }
            }
        }
        String::new()
    };

    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < tokens.len() {
        let end = (start + max_tokens).min(tokens.len());
        windows.push(TextWindow {
            text: decode(start, end),
            token_count: end - start,
            start_token: start,
            end_token: end,
        });

        if end == tokens.len() {
            break;
        }
        start = end.saturating_sub(overlap_tokens);
    }

    Ok(windows)
}
