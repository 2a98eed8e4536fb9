//! Recursive character chunker with overlap.
//!
//! Splits the pages of a loaded document into [`Chunk`]s of at most
//! `chunk_size` characters, repeating up to `chunk_overlap` characters of
//! trailing context at the start of each following chunk. Every chunk is
//! tagged with metadata from [`infer_metadata`] plus its page number.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from [`SEPARATORS`] that occurs in the text
//!    (paragraph break, line break, sentence end, full stop, space, and
//!    finally single characters).
//! 2. Split on it, keeping the separator at the start of the next piece.
//! 3. Pieces shorter than `chunk_size` are accumulated greedily into a
//!    window; when the next piece would overflow the window, the window is
//!    emitted and pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain.
//! 4. Pieces that are too long on their own are split recursively with the
//!    remaining separators.
//! 5. Emitted chunks are trimmed; whitespace-only chunks are dropped.
//!
//! `chunk_index` runs across the whole document, while `chunk` restarts at
//! zero on every page.
//!
//! # Example
//!
//! ```rust
//! use dayscope_core::chunk::{chunk_pages, ChunkOptions};
//! use dayscope_core::metadata::MonthVocabulary;
//! use dayscope_core::models::LoadedPage;
//!
//! let pages = vec![LoadedPage::new("Boiler stable.\n\nNPHR 2450.", Some(1))];
//! let chunks = chunk_pages(
//!     &pages,
//!     "uploads/Unit 7 - 1 Maret 2025.txt",
//!     &ChunkOptions::default(),
//!     &MonthVocabulary::default(),
//! );
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.date.as_deref(), Some("2025-03-01"));
//! ```

use std::collections::VecDeque;

use uuid::Uuid;

use crate::metadata::{infer_metadata, MonthVocabulary};
use crate::models::{Chunk, ChunkMetadata, LoadedPage};

/// Separator preference, coarsest first. The empty separator splits into
/// single characters and guarantees the size bound.
pub const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", ".", " ", ""];

/// Character-based chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Chunks every page of one document.
///
/// Returns an empty vector when there are no pages or every page is blank.
pub fn chunk_pages(
    pages: &[LoadedPage],
    source_path: &str,
    opts: &ChunkOptions,
    vocab: &MonthVocabulary,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;

    for page in pages {
        let inferred = infer_metadata(source_path, &page.text, vocab);

        for (local, text) in split_text(&page.text, opts).into_iter().enumerate() {
            let mut metadata = ChunkMetadata {
                source_file: inferred.source_file.clone(),
                source_path: inferred.source_path.clone(),
                page: page.page,
                date: inferred.date.clone(),
                unit: inferred.unit.clone(),
                chunk_index,
                chunk: local,
                extra: Default::default(),
            };
            apply_page_metadata(&mut metadata, page);

            chunks.push(Chunk {
                id: chunk_id(source_path, chunk_index),
                text,
                metadata,
            });
            chunk_index += 1;
        }
    }

    chunks
}

/// Deterministic chunk id, so re-ingesting a document overwrites its points.
pub fn chunk_id(source_path: &str, chunk_index: usize) -> String {
    let name = format!("{}#{}", source_path, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Loader-supplied metadata overrides inferred fields, except the
/// positional ones.
fn apply_page_metadata(metadata: &mut ChunkMetadata, page: &LoadedPage) {
    for (key, value) in &page.metadata {
        match key.as_str() {
            "page" | "chunk" | "chunk_index" => {}
            "source_file" | "source_path" | "date" | "unit" => {
                let Some(s) = value.as_str() else {
                    continue;
                };
                let s = s.to_string();
                match key.as_str() {
                    "source_file" => metadata.source_file = s,
                    "source_path" => metadata.source_path = s,
                    "date" => metadata.date = Some(s),
                    _ => metadata.unit = Some(s),
                }
            }
            _ => {
                metadata.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Splits one text into trimmed, non-empty pieces.
pub fn split_text(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let mut out = Vec::new();
    if text.trim().is_empty() {
        return out;
    }
    split_recursive(text, &SEPARATORS, opts, &mut out);
    out
}

fn split_recursive(text: &str, separators: &[&str], opts: &ChunkOptions, out: &mut Vec<String>) {
    let mut separator = separators.last().copied().unwrap_or("");
    let mut remaining: &[&str] = &[];
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            separator = sep;
            break;
        }
        if text.contains(sep) {
            separator = sep;
            remaining = &separators[i + 1..];
            break;
        }
    }

    let mut fitting: Vec<&str> = Vec::new();
    for piece in split_keep_separator(text, separator) {
        if char_len(piece) < opts.chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            merge_pieces(&fitting, opts, out);
            fitting.clear();
        }
        if remaining.is_empty() {
            push_trimmed(piece, out);
        } else {
            split_recursive(piece, remaining, opts, out);
        }
    }
    if !fitting.is_empty() {
        merge_pieces(&fitting, opts, out);
    }
}

/// Splits on `sep`, attaching each separator to the piece that follows it.
fn split_keep_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedy window merge with overlap.
fn merge_pieces(pieces: &[&str], opts: &ChunkOptions, out: &mut Vec<String>) {
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > opts.chunk_size && !window.is_empty() {
            push_trimmed(&window.iter().copied().collect::<String>(), out);
            while total > opts.chunk_overlap || (total + len > opts.chunk_size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }

    if !window.is_empty() {
        push_trimmed(&window.iter().copied().collect::<String>(), out);
    }
}

fn push_trimmed(text: &str, out: &mut Vec<String>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(size: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    fn report_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "Shift {} notes. Boiler load was {} MW and NPHR stayed near {}.",
                    i,
                    500 + i,
                    2400 + i
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", &ChunkOptions::default());
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_pages_yield_no_chunks() {
        let vocab = MonthVocabulary::default();
        assert!(chunk_pages(&[], "a.txt", &ChunkOptions::default(), &vocab).is_empty());
        let blank = vec![LoadedPage::new("  \n\n ", Some(1))];
        assert!(chunk_pages(&blank, "a.txt", &ChunkOptions::default(), &vocab).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = report_text(40);
        for c in split_text(&text, &opts(200, 50)) {
            assert!(c.chars().count() <= 200, "chunk too long: {}", c.len());
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_context() {
        let text = report_text(10);
        let chunks = split_text(&text, &opts(150, 80));
        assert!(chunks.len() > 2);
        let repeated = chunks
            .windows(2)
            .filter(|w| {
                let chars: Vec<char> = w[0].chars().collect();
                let tail: String = chars[chars.len().saturating_sub(20)..].iter().collect();
                w[1].contains(tail.trim())
            })
            .count();
        assert!(repeated > 0, "no overlap between consecutive chunks");
    }

    #[test]
    fn test_chunk_indices_contiguous_across_pages() {
        let pages: Vec<LoadedPage> = (1..=3)
            .map(|p| LoadedPage::new(report_text(8), Some(p)))
            .collect();
        let chunks = chunk_pages(&pages, "r.txt", &opts(180, 40), &MonthVocabulary::default());
        assert!(chunks.len() > 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_index, i, "gap at position {}", i);
        }
        let first_of_page_2 = chunks
            .iter()
            .find(|c| c.metadata.page == Some(2))
            .unwrap();
        assert_eq!(first_of_page_2.metadata.chunk, 0);
        assert!(first_of_page_2.metadata.chunk_index > 0);
    }

    #[test]
    fn test_chunks_cover_original_words() {
        let text = report_text(12);
        let chunks = split_text(&text, &opts(120, 30));
        let joined = chunks.join(" ");
        for word in text.split_whitespace() {
            assert!(joined.contains(word), "lost word {:?}", word);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "First paragraph is here.\n\nSecond paragraph is here.";
        let chunks = split_text(text, &opts(30, 0));
        assert_eq!(
            chunks,
            vec![
                "First paragraph is here.".to_string(),
                "Second paragraph is here.".to_string()
            ]
        );
    }

    #[test]
    fn test_oversized_word_is_hard_split() {
        let text = "x".repeat(45);
        let chunks = split_text(&text, &opts(10, 0));
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Halo dunia       │\n└──────────────────┘";
        let chunks = split_text(text, &opts(8, 2));
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 8));
    }

    #[test]
    fn test_metadata_inferred_and_page_overrides() {
        let mut page = LoadedPage::new("Unit 3 trip at 02:00.", Some(4));
        page.metadata
            .insert("unit".into(), serde_json::json!("Unit 9"));
        page.metadata
            .insert("page".into(), serde_json::json!(99));
        page.metadata
            .insert("sheet".into(), serde_json::json!("Shift A"));

        let chunks = chunk_pages(
            &[page],
            "/data/u3_2025-03-02.xlsx",
            &ChunkOptions::default(),
            &MonthVocabulary::default(),
        );
        assert_eq!(chunks.len(), 1);
        let m = &chunks[0].metadata;
        assert_eq!(m.source_file, "u3_2025-03-02.xlsx");
        assert_eq!(m.date.as_deref(), Some("2025-03-02"));
        assert_eq!(m.unit.as_deref(), Some("Unit 9"));
        assert_eq!(m.page, Some(4));
        assert_eq!(m.extra["sheet"], "Shift A");
    }

    #[test]
    fn test_deterministic_ids() {
        let pages = vec![LoadedPage::new(report_text(6), Some(1))];
        let a = chunk_pages(&pages, "r.txt", &opts(100, 20), &MonthVocabulary::default());
        let b = chunk_pages(&pages, "r.txt", &opts(100, 20), &MonthVocabulary::default());
        assert_eq!(a, b);
        let ids: std::collections::HashSet<_> = a.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), a.len());
    }
}
