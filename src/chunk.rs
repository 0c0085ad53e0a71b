//! Overlapping-window text chunker.
//!
//! Splits document text into [`Chunk`]s no longer than a configurable
//! window, cutting on natural boundaries (paragraph, sentence, newline,
//! space) where one exists inside the window. Each chunk after the first
//! starts exactly `overlap` characters before the previous chunk's end, so
//! consecutive chunks share that much boundary context.
//!
//! Chunking is deterministic: the same text and parameters always produce
//! the identical chunk sequence, which is what makes re-ingestion of an
//! unchanged document overwrite rather than duplicate its vectors.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Split `text` into chunks of at most `window_size` characters with
/// `overlap` shared characters between consecutive chunks.
///
/// Indices are contiguous starting at 0. Empty text yields no chunks.
pub fn chunk_text(
    text: &str,
    window_size: usize,
    overlap: usize,
    source_metadata: &BTreeMap<String, String>,
) -> Result<Vec<Chunk>> {
    if window_size == 0 {
        return Err(Error::InvalidInput("window_size must be > 0".to_string()));
    }
    if overlap >= window_size {
        return Err(Error::InvalidInput(format!(
            "overlap ({}) must be < window_size ({})",
            overlap, window_size
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    loop {
        let hard_end = (start + window_size).min(chars.len());

        let end = if hard_end < chars.len() {
            // The cut must land past the overlap region or the next window
            // would not advance.
            natural_cut(&chars[start..hard_end], overlap)
                .map(|rel| start + rel)
                .unwrap_or(hard_end)
        } else {
            chars.len()
        };

        chunks.push(Chunk {
            content: chars[start..end].iter().collect(),
            source_metadata: source_metadata.clone(),
            chunk_index,
        });
        chunk_index += 1;

        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Find the best natural cut position inside one window, as an exclusive
/// end offset relative to the window start. Preference order: paragraph
/// break, sentence end, newline, space. Returns `None` when no boundary
/// lands beyond `min_end`, in which case the caller hard-cuts at the window.
fn natural_cut(window: &[char], min_end: usize) -> Option<usize> {
    let mut paragraph = None;
    let mut sentence = None;
    let mut newline = None;
    let mut space = None;

    for i in (0..window.len()).rev() {
        if paragraph.is_none()
            && window[i] == '\n'
            && i + 1 < window.len()
            && window[i + 1] == '\n'
        {
            paragraph = Some(i + 2);
        }
        if sentence.is_none()
            && window[i] == '.'
            && i + 1 < window.len()
            && window[i + 1].is_whitespace()
        {
            sentence = Some(i + 2);
        }
        if newline.is_none() && window[i] == '\n' {
            newline = Some(i + 1);
        }
        if space.is_none() && window[i] == ' ' {
            space = Some(i + 1);
        }
    }

    [paragraph, sentence, newline, space]
        .into_iter()
        .flatten()
        .find(|&end| end > min_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("filename".to_string(), "doc.txt".to_string());
        m
    }

    fn join_indices(chunks: &[Chunk]) -> Vec<usize> {
        chunks.iter().map(|c| c.chunk_index).collect()
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1024, 100, &meta()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].source_metadata.get("filename").unwrap(), "doc.txt");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let chunks = chunk_text("", 1024, 100, &meta()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(chunk_text("abc", 0, 0, &meta()).is_err());
        assert!(chunk_text("abc", 10, 10, &meta()).is_err());
        assert!(chunk_text("abc", 10, 11, &meta()).is_err());
    }

    #[test]
    fn test_no_chunk_exceeds_window() {
        let text = "word ".repeat(500);
        for (w, o) in [(64, 10), (100, 0), (37, 12), (1024, 100)] {
            let chunks = chunk_text(&text, w, o, &meta()).unwrap();
            for c in &chunks {
                assert!(
                    c.content.chars().count() <= w,
                    "chunk of {} chars exceeds window {}",
                    c.content.chars().count(),
                    w
                );
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_share_exact_overlap() {
        let text = "alpha beta gamma delta ".repeat(40);
        let overlap = 16;
        let chunks = chunk_text(&text, 80, overlap, &meta()).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].content.chars().collect();
            let next: Vec<char> = pair[1].content.chars().collect();
            let tail: String = prev[prev.len() - overlap..].iter().collect();
            let head: String = next[..overlap].iter().collect();
            assert_eq!(tail, head, "overlap mismatch between chunks {} and {}", pair[0].chunk_index, pair[1].chunk_index);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = (0..60)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 90, 20, &meta()).unwrap();
        let expected: Vec<usize> = (0..chunks.len()).collect();
        assert_eq!(join_indices(&chunks), expected);
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(100));
        let chunks = chunk_text(&text, 80, 10, &meta()).unwrap();
        assert!(chunks[0].content.ends_with("\n\n"));
        assert!(chunks[0].content.starts_with('a'));
    }

    #[test]
    fn test_prefers_sentence_over_space() {
        let text = format!("One sentence here. {}", "wordy ".repeat(30));
        let chunks = chunk_text(&text, 40, 5, &meta()).unwrap();
        assert!(chunks[0].content.ends_with(". "));
    }

    #[test]
    fn test_unbroken_text_hard_cuts() {
        let text = "x".repeat(300);
        let chunks = chunk_text(&text, 100, 25, &meta()).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.chars().count() <= 100);
        }
        // Hard cuts still share the exact overlap.
        let first: Vec<char> = chunks[0].content.chars().collect();
        let second: Vec<char> = chunks[1].content.chars().collect();
        assert_eq!(&first[first.len() - 25..], &second[..25]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta.\n\nGamma delta epsilon. Zeta eta theta.\n\nIota kappa.".repeat(8);
        let a = chunk_text(&text, 64, 12, &meta()).unwrap();
        let b = chunk_text(&text, 64, 12, &meta()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_multibyte_text_cuts_on_char_boundaries() {
        let text = "héllo wörld ünïcode tèxt ".repeat(20);
        let chunks = chunk_text(&text, 30, 8, &meta()).unwrap();
        // Reaching here without a panic means no cut split a code point;
        // also verify windows hold in characters, not bytes.
        for c in &chunks {
            assert!(c.content.chars().count() <= 30);
        }
    }
}
