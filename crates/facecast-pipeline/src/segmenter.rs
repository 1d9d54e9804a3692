//! Incremental sentence segmentation of a token stream.

/// Characters that end a sentence.
const TERMINALS: &[char] = &['.', '!', '?', ';', '…', '。', '！', '？', '；', '\n'];

/// Accumulates text fragments and cuts them into sentences.
///
/// A sentence ends at a terminal mark or when the buffer reaches
/// `max_chars` characters, whichever comes first. Emitted sentences are
/// trimmed and always contain something besides punctuation.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    chars: usize,
    max_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            chars: 0,
            max_chars: max_chars.max(1),
        }
    }

    /// Appends a fragment and returns every sentence it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        for c in fragment.chars() {
            self.buffer.push(c);
            self.chars += 1;
            if TERMINALS.contains(&c) || self.chars >= self.max_chars {
                if let Some(sentence) = self.take() {
                    sentences.push(sentence);
                }
            }
        }
        sentences
    }

    /// Flushes whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let sentence = self.buffer.trim().to_string();
        self.buffer.clear();
        self.chars = 0;
        // A run of marks after a cut ("...", "?!") carries no speech.
        let speakable = sentence.chars().any(|c| !TERMINALS.contains(&c) && !c.is_whitespace());
        speakable.then_some(sentence)
    }
}
