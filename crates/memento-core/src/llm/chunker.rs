//! Sentence-boundary chunker.
//!
//! Token counts are estimated at four characters per token. Over-long
//! content splits on sentence boundaries as close to the target size as
//! possible without exceeding it, with each chunk seeded by the tail of the
//! previous one for context overlap. Identical chunks deduplicate in
//! first-seen order.

/// Estimated token count: `ceil(len / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_tokens: usize,
    overlap_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(512, 50)
    }
}

impl Chunker {
    pub fn new(max_chunk_tokens: usize, overlap_tokens: usize) -> Self {
        let max_chunk_tokens = max_chunk_tokens.max(1);
        // Overlap must leave room for new content in each chunk.
        let overlap_tokens = overlap_tokens.min(max_chunk_tokens / 2);
        Self {
            max_chunk_tokens,
            overlap_tokens,
        }
    }

    /// Chunk a body of text. Whitespace-only input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }
        if estimate_tokens(text) <= self.max_chunk_tokens {
            return vec![text.to_string()];
        }

        let max_chars = self.max_chunk_tokens * 4;
        let overlap_chars = self.overlap_tokens * 4;

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for sentence in split_sentences(text) {
            for piece in split_oversize(sentence, max_chars) {
                let needed = if current.is_empty() {
                    piece.len()
                } else {
                    current.len() + 1 + piece.len()
                };
                if !current.is_empty() && needed > max_chars {
                    let tail = tail_chars(&current, overlap_chars);
                    chunks.push(std::mem::replace(&mut current, tail));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(piece);
            }
        }
        if !current.trim().is_empty() {
            chunks.push(current);
        }

        dedup_preserving_order(chunks)
    }
}

/// Split on sentence-ending punctuation followed by whitespace, keeping the
/// punctuation with the sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = idx + ch.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        sentences.push(last);
    }
    sentences
}

/// Hard-split a sentence longer than the chunk budget at char boundaries.
fn split_oversize(sentence: &str, max_chars: usize) -> Vec<&str> {
    if sentence.len() <= max_chars {
        return vec![sentence];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < sentence.len() {
        let mut end = (start + max_chars).min(sentence.len());
        while end < sentence.len() && !sentence.is_char_boundary(end) {
            end -= 1;
        }
        pieces.push(&sentence[start..end]);
        start = end;
    }
    pieces
}

/// The last ~`overlap_chars` of a chunk, cut at a char boundary.
fn tail_chars(chunk: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || chunk.len() <= overlap_chars {
        return if overlap_chars == 0 {
            String::new()
        } else {
            chunk.to_string()
        };
    }
    let mut start = chunk.len() - overlap_chars;
    while start < chunk.len() && !chunk.is_char_boundary(start) {
        start += 1;
    }
    chunk[start..].to_string()
}

fn dedup_preserving_order(chunks: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
