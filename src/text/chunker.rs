//! Boundary-aware text chunking
//!
//! Splits text into bounded-size pieces, preferring paragraph breaks and
//! falling back to sentence-ending punctuation inside paragraphs that are too
//! long on their own. Delimiters stay attached to the segment they terminate,
//! so concatenating the produced chunks yields the input byte for byte.
//!
//! Sizes are measured in characters, not bytes.

use std::iter::FusedIterator;

/// Separator used between paragraphs, and when joining processed chunks back together
pub const PARAGRAPH_BREAK: &str = "\n\n";

/// Sentence-ending punctuation, the second-priority boundary
const SENTENCE_ENDINGS: [char; 3] = ['.', '?', '!'];

/// A contiguous span of the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub text: &'a str,
    /// Length of `text` in characters
    pub len: usize,
}

impl<'a> Chunk<'a> {
    pub fn as_str(&self) -> &'a str {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Lazy iterator over the chunks of a text, in document order.
///
/// The iterator is cheap to clone; a clone taken before iteration restarts
/// the sequence from the beginning.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    target: usize,
    pos: usize,
    /// End (exclusive, byte offset) of the paragraph currently being split at
    /// sentence boundaries because it exceeds the target on its own
    oversized_end: usize,
    emitted: bool,
}

/// Split `text` into chunks of at most `target_chunk_size` characters.
///
/// Segments are accumulated greedily. A single segment longer than the target
/// is emitted as its own oversized chunk rather than being cut. Empty input
/// yields exactly one empty chunk. A target of zero is treated as one.
pub fn split(text: &str, target_chunk_size: usize) -> Chunks<'_> {
    Chunks {
        text,
        target: target_chunk_size.max(1),
        pos: 0,
        oversized_end: 0,
        emitted: false,
    }
}

/// Convenience wrapper collecting the chunk texts into owned strings
pub fn split_owned(text: &str, target_chunk_size: usize) -> Vec<String> {
    split(text, target_chunk_size)
        .map(|chunk| chunk.text.to_string())
        .collect()
}

impl<'a> Chunks<'a> {
    /// Byte offset where the segment starting at `start` ends
    fn segment_end(&mut self, start: usize) -> usize {
        let rest = &self.text[start..];

        if start >= self.oversized_end {
            match fitting_paragraph_end(rest, self.target) {
                Some(end) => return start + end,
                None => {
                    let paragraph_len = rest
                        .find(PARAGRAPH_BREAK)
                        .map(|i| i + PARAGRAPH_BREAK.len())
                        .unwrap_or(rest.len());
                    self.oversized_end = start + paragraph_len;
                }
            }
        }

        let paragraph = &self.text[start..self.oversized_end];
        match paragraph.find(&SENTENCE_ENDINGS[..]) {
            // sentence endings are single-byte characters
            Some(i) => start + i + 1,
            None => self.oversized_end,
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            if self.emitted {
                return None;
            }
            self.emitted = true;
            return Some(Chunk { text: "", len: 0 });
        }
        self.emitted = true;

        let start = self.pos;
        let mut end = start;
        let mut len = 0;

        while end < self.text.len() {
            let segment_end = self.segment_end(end);
            let segment_len = self.text[end..segment_end].chars().count();

            if len > 0 && len + segment_len > self.target {
                break;
            }

            end = segment_end;
            len += segment_len;
        }

        self.pos = end;
        Some(Chunk {
            text: &self.text[start..end],
            len,
        })
    }
}

impl FusedIterator for Chunks<'_> {}

/// If the paragraph at the start of `rest` (including its trailing break)
/// fits in `target` characters, return its byte length.
fn fitting_paragraph_end(rest: &str, target: usize) -> Option<usize> {
    let mut previous_newline = false;

    for (count, (i, c)) in rest.char_indices().enumerate() {
        if count >= target {
            return None;
        }
        if c == '\n' {
            if previous_newline {
                return Some(i + 1);
            }
            previous_newline = true;
        } else {
            previous_newline = false;
        }
    }

    Some(rest.len())
}
