//! Sentence-aware chunking of record text.
//!
//! Text is split on `". "` and sentences are packed into chunks of at most
//! `chunk_size` characters. Each new chunk starts with the trailing
//! `chunk_overlap` words of the previous one so context carries across the
//! boundary. A single sentence longer than `chunk_size` becomes its own
//! oversized chunk rather than being cut.

use crate::types::{KnowledgeRecord, TextChunk};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_MIN_RECORD_CHARS: usize = 10;

const SENTENCE_SEPARATOR: &str = ". ";

/// Chunk sizing. Sizes are in characters, overlap in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Records shorter than this after trimming produce no chunks
    pub min_record_chars: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            min_record_chars: DEFAULT_MIN_RECORD_CHARS,
        }
    }
}

/// Chunks every record, preserving record order.
pub fn chunk_records(records: &[KnowledgeRecord], options: &ChunkingOptions) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    for record in records {
        let bodies = chunk_text(&record.combined_text(), options);
        if bodies.is_empty() {
            tracing::debug!(source = %record.source, "record too short, skipped");
        }
        chunks.extend(
            bodies
                .into_iter()
                .map(|body| TextChunk::new(record.source.clone(), body)),
        );
    }
    chunks
}

/// Splits one text into chunk bodies.
pub fn chunk_text(text: &str, options: &ChunkingOptions) -> Vec<String> {
    let text = text.trim();
    let text_len = char_len(text);
    if text_len < options.min_record_chars || text.is_empty() {
        return Vec::new();
    }
    if text_len <= options.chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split(SENTENCE_SEPARATOR) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current.is_empty() {
            current.push_str(sentence);
        } else if char_len(&current) + char_len(sentence) + 2 > options.chunk_size {
            let seed = overlap_seed(&current, sentence, options);
            chunks.push(current.trim().to_string());
            current = seed;
        } else {
            current.push_str(SENTENCE_SEPARATOR);
            current.push_str(sentence);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Start of the chunk after `previous`: its trailing overlap words, then
/// `sentence`. Leading overlap words are dropped until the seed fits.
fn overlap_seed(previous: &str, sentence: &str, options: &ChunkingOptions) -> String {
    let words: Vec<&str> = previous.split_whitespace().collect();
    let mut start = words.len().saturating_sub(options.chunk_overlap);
    let sentence_len = char_len(sentence);

    let mut overlap_len: usize = words[start..].iter().map(|w| char_len(w) + 1).sum();
    while start < words.len() && overlap_len + sentence_len > options.chunk_size {
        overlap_len -= char_len(words[start]) + 1;
        start += 1;
    }

    if start == words.len() {
        sentence.to_string()
    } else {
        format!("{} {sentence}", words[start..].join(" "))
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(chunk_size: usize, chunk_overlap: usize) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size,
            chunk_overlap,
            min_record_chars: DEFAULT_MIN_RECORD_CHARS,
        }
    }

    fn long_text() -> String {
        (1..=30)
            .map(|i| format!("Sentence number {i} talks about tomato leaf curl and whiteflies"))
            .collect::<Vec<_>>()
            .join(". ")
    }

    #[test]
    fn test_short_text_is_one_trimmed_chunk() {
        let chunks = chunk_text("  Leaf curl is caused by a virus.  ", &ChunkingOptions::default());
        assert_eq!(chunks, vec!["Leaf curl is caused by a virus.".to_string()]);
    }

    #[test]
    fn test_tiny_text_produces_nothing() {
        assert!(chunk_text("   rust  ", &ChunkingOptions::default()).is_empty());
        assert!(chunk_text("", &ChunkingOptions::default()).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let opts = options(200, 5);
        let chunks = chunk_text(&long_text(), &opts);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 200, "chunk too long: {}", char_len(chunk));
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let opts = options(200, 4);
        let chunks = chunk_text(&long_text(), &opts);

        for pair in chunks.windows(2) {
            let tail: Vec<&str> = pair[0].split_whitespace().rev().take(4).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            assert!(
                pair[1].starts_with(&tail.join(" ")),
                "{:?} does not start with {:?}",
                pair[1],
                tail
            );
        }
    }

    #[test]
    fn test_zero_overlap_starts_with_sentence() {
        let opts = options(200, 0);
        let chunks = chunk_text(&long_text(), &opts);

        for chunk in chunks.iter().skip(1) {
            assert!(chunk.starts_with("Sentence number"));
        }
    }

    #[test]
    fn test_oversized_sentence_kept_intact() {
        let giant = "word ".repeat(80);
        let text = format!("Short intro here. {}. Short outro here", giant.trim());
        let chunks = chunk_text(&text, &options(100, 3));

        assert!(chunks.iter().any(|c| c.contains(giant.trim())));
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_overlap_trimmed_to_fit() {
        // Large overlap must not push the seeded chunk past the size
        let opts = options(120, 100);
        for chunk in chunk_text(&long_text(), &opts) {
            assert!(char_len(&chunk) <= 120);
        }
    }

    #[test]
    fn test_chunk_records_tags_source() {
        let records = vec![
            KnowledgeRecord::new("Row 1").with_field("text", "Early blight shows concentric rings"),
            KnowledgeRecord::new("Row 2").with_field("text", "tiny"),
            KnowledgeRecord::new("Row 3").with_field("text", "Powdery mildew looks like white dust"),
        ];
        let chunks = chunk_records(&records, &ChunkingOptions::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source, "Row 1");
        assert_eq!(chunks[1].source, "Row 3");
        assert!(chunks[1].tagged_text().starts_with("[Source: Row 3] "));
    }
}
