use crate::error::ConfigError;

/// Validated chunking parameters. Sizes are measured in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

/// A chunk before embedding: text span plus byte offsets into the source,
/// so `source[start..end] == text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split `text` into overlapping drafts without materializing them all.
///
/// Cuts land on the last paragraph break inside the window when one exists,
/// then on the last sentence end, and only fall back to a hard character cut
/// when a single sentence exceeds the chunk size. Identical input and config
/// always produce identical drafts.
pub fn split_text(text: &str, config: ChunkingConfig) -> ChunkSplitter<'_> {
    ChunkSplitter {
        text,
        config,
        pos: 0,
        next_index: 0,
    }
}

pub struct ChunkSplitter<'a> {
    text: &'a str,
    config: ChunkingConfig,
    pos: usize,
    next_index: usize,
}

impl Iterator for ChunkSplitter<'_> {
    type Item = ChunkDraft;

    fn next(&mut self) -> Option<ChunkDraft> {
        self.skip_whitespace();
        if self.pos >= self.text.len() {
            return None;
        }

        // Byte offsets of the next `chunk_size` characters. `window_end`
        // stays at text end when the remainder fits in one chunk.
        let mut char_offsets = Vec::with_capacity(self.config.chunk_size);
        let mut window_end = self.text.len();
        for (seen, (offset, _)) in self.text[self.pos..].char_indices().enumerate() {
            if seen == self.config.chunk_size {
                window_end = self.pos + offset;
                break;
            }
            char_offsets.push(self.pos + offset);
        }

        let start = self.pos;
        let end = if window_end == self.text.len() {
            window_end
        } else {
            let window = &self.text[start..window_end];
            match paragraph_cut(window).or_else(|| sentence_cut(window)) {
                Some(relative) => start + relative,
                None => window_end,
            }
        };

        let draft = ChunkDraft {
            index: self.next_index,
            text: self.text[start..end].to_string(),
            start,
            end,
        };
        self.next_index += 1;
        self.advance(end, &char_offsets);
        Some(draft)
    }
}

impl ChunkSplitter<'_> {
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.text[self.pos..].chars().next() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    /// Move `pos` to `overlap` characters before the cut so consecutive
    /// chunks share context, while always making at least one character of
    /// progress.
    fn advance(&mut self, end: usize, char_offsets: &[usize]) {
        if end >= self.text.len() {
            self.pos = self.text.len();
            return;
        }
        let emitted_chars = char_offsets.iter().take_while(|&&o| o < end).count();
        let back = self.config.overlap.min(emitted_chars.saturating_sub(1));
        self.pos = char_offsets
            .get(emitted_chars - back)
            .copied()
            .unwrap_or(end);
    }
}

/// Last paragraph break in the window, if the cut leaves a non-empty chunk.
fn paragraph_cut(window: &str) -> Option<usize> {
    match window.rfind("\n\n") {
        Some(0) | None => None,
        Some(offset) => Some(offset),
    }
}

/// End of the last complete sentence in the window.
fn sentence_cut(window: &str) -> Option<usize> {
    let mut cut = None;
    let mut chars = window.char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        let terminates = matches!(ch, '.' | '!' | '?' | '\n');
        if !terminates {
            continue;
        }
        let followed_by_space = chars
            .peek()
            .map(|(_, next)| next.is_whitespace())
            .unwrap_or(false);
        let candidate = offset + ch.len_utf8();
        if followed_by_space && candidate < window.len() {
            cut = Some(candidate);
        }
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(chunk_size, overlap).unwrap()
    }

    #[test]
    fn overlap_equal_to_chunk_size_is_rejected() {
        assert!(matches!(
            ChunkingConfig::new(100, 100),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
        assert!(matches!(
            ChunkingConfig::new(0, 0),
            Err(ConfigError::ZeroChunkSize)
        ));
    }

    #[test]
    fn empty_and_whitespace_text_yield_no_chunks() {
        assert_eq!(split_text("", config(100, 10)).count(), 0);
        assert_eq!(split_text("  \n\n  ", config(100, 10)).count(), 0);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let drafts: Vec<_> = split_text("Cells divide by mitosis.", config(100, 10)).collect();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "Cells divide by mitosis.");
        assert_eq!(drafts[0].index, 0);
    }

    #[test]
    fn identical_input_chunks_identically() {
        let text = "First paragraph about photosynthesis.\n\nSecond paragraph about \
                    respiration. It continues with more detail.\n\nThird paragraph."
            .repeat(4);
        let first: Vec<_> = split_text(&text, config(120, 30)).collect();
        let second: Vec<_> = split_text(&text, config(120, 30)).collect();
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }

    #[test]
    fn offsets_slice_back_into_the_source() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota kappa. \
                    Lambda mu nu xi omicron pi rho sigma tau."
            .repeat(3);
        for draft in split_text(&text, config(60, 15)) {
            assert_eq!(&text[draft.start..draft.end], draft.text);
        }
    }

    #[test]
    fn paragraph_boundary_is_preferred_over_mid_sentence() {
        let text = "Short opening paragraph.\n\nA much longer second paragraph that keeps \
                    going well past the point where the window closes on it.";
        let drafts: Vec<_> = split_text(text, config(40, 5)).collect();
        assert_eq!(drafts[0].text, "Short opening paragraph.");
    }

    #[test]
    fn unbroken_text_falls_back_to_hard_cuts_with_overlap() {
        let text = "x".repeat(250);
        let drafts: Vec<_> = split_text(&text, config(100, 20)).collect();
        assert!(drafts.len() > 2);
        assert_eq!(drafts[0].text.len(), 100);
        // consecutive hard cuts share `overlap` characters
        assert_eq!(drafts[1].start, drafts[0].end - 20);
        // ordinals are contiguous
        for (expected, draft) in drafts.iter().enumerate() {
            assert_eq!(draft.index, expected);
        }
    }

    #[test]
    fn chunks_never_exceed_chunk_size_in_chars() {
        let text = "One sentence here. Another sentence there. ".repeat(40);
        for draft in split_text(&text, config(80, 10)) {
            assert!(draft.text.chars().count() <= 80);
        }
    }

    #[test]
    fn multibyte_text_cuts_on_char_boundaries() {
        let text = "καλημέρα κόσμε ".repeat(30);
        let drafts: Vec<_> = split_text(&text, config(50, 10)).collect();
        assert!(drafts.len() > 1);
        for draft in drafts {
            assert_eq!(&text[draft.start..draft.end], draft.text);
        }
    }
}
