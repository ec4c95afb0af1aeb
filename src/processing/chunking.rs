//! Token windowing.
//!
//! Page text is tokenized once, then a fixed window of `max_tokens` ids slides over the
//! sequence with stride `max_tokens - overlap`. Each window is decoded back to text and becomes
//! one chunk. Highlights:
//!
//! - Clamping: the requested window is clamped to the embedding model's input limit before any
//!   document is read, so the embedder never truncates silently.
//! - Forward progress: `overlap < max_tokens` is validated after clamping.
//! - No silent loss: when windowing yields nothing for non-blank text, the trimmed page text is
//!   emitted as a single chunk.

use std::ops::Range;

use super::tokenizer::TokenCodec;
use super::types::{ChunkRecord, ChunkingError};

/// Extra tokens a window may borrow on each side to finish a multi-byte character.
const MAX_BOUNDARY_WIDEN: usize = 3;

/// Validated window parameters for one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPlan {
    max_tokens: usize,
    overlap: usize,
    clamped_from: Option<usize>,
}

impl ChunkingPlan {
    /// Clamp `max_tokens` to `model_limit`, then check that the window can advance.
    pub fn new(
        max_tokens: usize,
        overlap: usize,
        model_limit: usize,
    ) -> Result<Self, ChunkingError> {
        if max_tokens == 0 || model_limit == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }

        let (effective, clamped_from) = if max_tokens > model_limit {
            tracing::warn!(
                requested = max_tokens,
                limit = model_limit,
                "Reducing max_tokens to the embedding model limit"
            );
            (model_limit, Some(max_tokens))
        } else {
            (max_tokens, None)
        };

        if overlap >= effective {
            return Err(ChunkingError::InvalidOverlap {
                max_tokens: effective,
                overlap,
            });
        }

        Ok(Self {
            max_tokens: effective,
            overlap,
            clamped_from,
        })
    }

    /// Effective window size in tokens.
    pub const fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tokens shared by consecutive windows.
    pub const fn overlap(&self) -> usize {
        self.overlap
    }

    /// Original request when clamping kicked in.
    pub const fn clamped_from(&self) -> Option<usize> {
        self.clamped_from
    }

    /// Distance between the starts of consecutive windows.
    pub const fn stride(&self) -> usize {
        self.max_tokens - self.overlap
    }

    /// Token ranges covered by each window over a sequence of `len` tokens.
    pub fn windows(&self, len: usize) -> Vec<Range<usize>> {
        token_windows(len, self.max_tokens, self.overlap)
    }
}

/// Token ranges of a sliding window over `len` tokens.
///
/// Windows start at `0, stride, 2 * stride, ...` and stop after the first window that reaches
/// the end of the sequence; the last window may be shorter than `max_tokens`.
pub fn token_windows(len: usize, max_tokens: usize, overlap: usize) -> Vec<Range<usize>> {
    if len == 0 || max_tokens == 0 || overlap >= max_tokens {
        return Vec::new();
    }

    let stride = max_tokens - overlap;
    let mut windows = Vec::with_capacity(len.saturating_sub(max_tokens) / stride + 2);
    let mut start = 0;
    loop {
        let end = (start + max_tokens).min(len);
        windows.push(start..end);
        if end >= len {
            break;
        }
        start += stride;
    }
    windows
}

/// Split one page into window texts.
///
/// Blank input yields no chunks. Tokenizer failures degrade to the single-chunk fallback rather
/// than dropping the page.
pub fn chunk_page_text(text: &str, codec: &dyn TokenCodec, plan: &ChunkingPlan) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunks = match codec.encode(text) {
        Ok(ids) => plan
            .windows(ids.len())
            .into_iter()
            .filter_map(|range| match decode_window(codec, &ids, range.clone()) {
                Ok(decoded) if !decoded.trim().is_empty() => Some(decoded),
                Ok(_) => None,
                Err(error) => {
                    tracing::warn!(
                        tokenizer = codec.name(),
                        start = range.start,
                        end = range.end,
                        error = %error,
                        "Dropping undecodable token window"
                    );
                    None
                }
            })
            .collect(),
        Err(error) => {
            tracing::warn!(
                tokenizer = codec.name(),
                error = %error,
                "Tokenization failed; keeping page text as a single chunk"
            );
            Vec::new()
        }
    };

    if chunks.is_empty() {
        tracing::debug!("Windowing produced no chunks; emitting raw page text");
        return vec![text.trim().to_string()];
    }
    chunks
}

/// Chunk one page into records with ids `#c1`, `#c2`, ... in window order.
pub fn chunk_page(
    source: &str,
    page: u32,
    text: &str,
    codec: &dyn TokenCodec,
    plan: &ChunkingPlan,
) -> Vec<ChunkRecord> {
    chunk_page_text(text, codec, plan)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| ChunkRecord {
            id: ChunkRecord::make_id(source, page, index + 1),
            text: chunk,
            source: source.to_string(),
            page,
        })
        .collect()
}

/// Decode a window, widening it outward when its edges split a multi-byte character.
fn decode_window(
    codec: &dyn TokenCodec,
    ids: &[u32],
    range: Range<usize>,
) -> Result<String, ChunkingError> {
    let mut last_error = match codec.decode(&ids[range.clone()]) {
        Ok(text) => return Ok(text),
        Err(error) => error,
    };

    for widen in 1..=MAX_BOUNDARY_WIDEN {
        let start = range.start.saturating_sub(widen);
        let end = (range.end + widen).min(ids.len());
        match codec.decode(&ids[start..end]) {
            Ok(text) => {
                tracing::trace!(start, end, "Widened token window to a character boundary");
                return Ok(text);
            }
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::processing::tokenizer::TiktokenCodec;
    use std::collections::HashSet;

    /// One token per character; ids are code points.
    pub(crate) struct CharCodec;

    impl TokenCodec for CharCodec {
        fn name(&self) -> &str {
            "chars"
        }

        fn encode(&self, text: &str) -> Result<Vec<u32>, ChunkingError> {
            Ok(text.chars().map(u32::from).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String, ChunkingError> {
            ids.iter()
                .map(|id| char::from_u32(*id).ok_or_else(|| ChunkingError::Decode(id.to_string())))
                .collect()
        }
    }

    struct SilentCodec;

    impl TokenCodec for SilentCodec {
        fn name(&self) -> &str {
            "silent"
        }

        fn encode(&self, _text: &str) -> Result<Vec<u32>, ChunkingError> {
            Ok(Vec::new())
        }

        fn decode(&self, _ids: &[u32]) -> Result<String, ChunkingError> {
            Ok(String::new())
        }
    }

    fn expected_count(len: usize, max_tokens: usize, overlap: usize) -> usize {
        if len <= max_tokens {
            1
        } else {
            (len - max_tokens).div_ceil(max_tokens - overlap) + 1
        }
    }

    #[test]
    fn fifteen_hundred_tokens_split_into_three_windows() {
        let plan = ChunkingPlan::new(700, 100, 8192).expect("plan");
        assert_eq!(plan.windows(1500), vec![0..700, 600..1300, 1200..1500]);
    }

    #[test]
    fn windows_cover_every_token_and_match_count_formula() {
        for (max_tokens, overlap) in [(1, 0), (4, 1), (7, 3), (10, 9), (700, 100)] {
            for len in [1, 2, 3, 9, 10, 11, 64, 701, 1500] {
                let windows = token_windows(len, max_tokens, overlap);
                assert_eq!(
                    windows.len(),
                    expected_count(len, max_tokens, overlap),
                    "len={len} max={max_tokens} overlap={overlap}"
                );

                let mut covered = vec![false; len];
                for window in &windows {
                    assert!(window.end - window.start <= max_tokens);
                    covered[window.clone()].iter_mut().for_each(|slot| *slot = true);
                }
                assert!(covered.iter().all(|slot| *slot), "gap for len={len}");
                assert_eq!(windows.last().map(|window| window.end), Some(len));
            }
        }
    }

    #[test]
    fn empty_sequence_has_no_windows() {
        assert!(token_windows(0, 10, 2).is_empty());
    }

    #[test]
    fn plan_clamps_to_model_limit() {
        let plan = ChunkingPlan::new(700, 100, 512).expect("plan");
        assert_eq!(plan.max_tokens(), 512);
        assert_eq!(plan.clamped_from(), Some(700));
        assert_eq!(plan.stride(), 412);

        let unclamped = ChunkingPlan::new(256, 32, 512).expect("plan");
        assert_eq!(unclamped.clamped_from(), None);
    }

    #[test]
    fn plan_rejects_overlap_that_stalls_the_window() {
        let error = ChunkingPlan::new(700, 600, 512).unwrap_err();
        assert!(matches!(
            error,
            ChunkingError::InvalidOverlap {
                max_tokens: 512,
                overlap: 600
            }
        ));
        assert!(matches!(
            ChunkingPlan::new(0, 0, 512).unwrap_err(),
            ChunkingError::InvalidChunkSize
        ));
    }

    #[test]
    fn chunk_page_assigns_sequential_ids() {
        let plan = ChunkingPlan::new(4, 1, 512).expect("plan");
        let records = chunk_page("cs/notes.pdf", 3, "abcdefghij", &CharCodec, &plan);
        let texts: Vec<_> = records.iter().map(|record| record.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        let ids: Vec<_> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "cs/notes.pdf#p3#c1",
                "cs/notes.pdf#p3#c2",
                "cs/notes.pdf#p3#c3"
            ]
        );
        assert!(records.iter().all(|record| record.page == 3));
    }

    #[test]
    fn blank_page_yields_no_chunks() {
        let plan = ChunkingPlan::new(4, 1, 512).expect("plan");
        assert!(chunk_page_text(" \n\t ", &CharCodec, &plan).is_empty());
    }

    #[test]
    fn falls_back_to_raw_text_when_windowing_yields_nothing() {
        let plan = ChunkingPlan::new(4, 1, 512).expect("plan");
        let chunks = chunk_page_text("  keep me  ", &SilentCodec, &plan);
        assert_eq!(chunks, vec!["keep me".to_string()]);
    }

    #[test]
    fn blank_windows_are_skipped() {
        let plan = ChunkingPlan::new(3, 0, 512).expect("plan");
        let chunks = chunk_page_text("abc      def", &CharCodec, &plan);
        assert_eq!(chunks, vec!["abc", "def"]);
    }

    #[test]
    fn ids_are_unique_across_pages_and_sources() {
        let plan = ChunkingPlan::new(4, 2, 512).expect("plan");
        let mut ids = HashSet::new();
        for source in ["a.pdf", "b/a.pdf", "deck.pptx"] {
            for page in 1..=3 {
                for record in chunk_page(source, page, "lorem ipsum dolor sit", &CharCodec, &plan) {
                    assert!(ids.insert(record.id), "duplicate id");
                }
            }
        }
    }

    #[test]
    fn tiktoken_windows_preserve_multibyte_text() {
        let codec = TiktokenCodec::for_model("cl100k_base").expect("codec");
        let plan = ChunkingPlan::new(5, 1, 8192).expect("plan");
        let text = "Größenordnung – naïve café 東京は日本の首都です。";
        let chunks = chunk_page_text(text, &codec, &plan);
        assert!(!chunks.is_empty());
        let joined: String = chunks.concat();
        for ch in text.chars().filter(|ch| !ch.is_whitespace()) {
            assert!(joined.contains(ch), "lost {ch}");
        }
    }
}
