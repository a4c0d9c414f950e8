//! Code-fence-aware splitting of a reply into platform-sized messages.
//!
//! Text is packed line by line. When a split lands inside a fenced block the
//! outgoing chunk gets a bare closing marker and the next chunk starts by
//! repeating the opening line (language tag included), so every chunk renders
//! as a self-contained message. Room for that closing marker is reserved
//! while a block is open, which keeps each chunk within `max_len`.

use parley_core::config::OverflowPolicy;

use crate::fence::{FenceEvent, FenceTracker, CLOSE_FENCE};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("line {line} is {len} characters, over the {max} character message limit")]
    LineTooLong { line: usize, len: usize, max: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_len: usize,
    overflow: OverflowPolicy,
}

impl Chunker {
    pub fn new(max_len: usize, overflow: OverflowPolicy) -> Self {
        Self { max_len, overflow }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split `text` into ordered chunks of at most `max_len` characters each.
    ///
    /// Every line keeps its trailing newline. A line that cannot fit in a
    /// chunk of its own is broken on character boundaries under
    /// [`OverflowPolicy::Split`] and rejected under [`OverflowPolicy::Reject`].
    /// Fence lines are never broken.
    pub fn split(&self, text: &str) -> Result<Vec<String>, ChunkError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let body = text.strip_suffix('\n').unwrap_or(text);

        let mut builder = Builder::new(self.max_len);
        for (index, line) in body.split('\n').enumerate() {
            let reopen = builder.fence.opening_line().map(str::to_owned);
            let is_fence = builder.fence.observe(line) != FenceEvent::None;
            let reserve = if builder.fence.is_open() {
                char_len(CLOSE_FENCE)
            } else {
                0
            };

            let header = reopen.as_deref().map(|l| char_len(l) + 1).unwrap_or(0);
            let capacity = self.max_len.saturating_sub(header + reserve + 1).max(1);
            let len = char_len(line);

            if len <= capacity || is_fence {
                builder.push_line(line, reopen.as_deref(), reserve);
                continue;
            }

            match self.overflow {
                OverflowPolicy::Reject => {
                    return Err(ChunkError::LineTooLong {
                        line: index + 1,
                        len,
                        max: self.max_len,
                    });
                }
                OverflowPolicy::Split => {
                    for piece in split_chars(line, capacity) {
                        builder.push_line(piece, reopen.as_deref(), reserve);
                    }
                }
            }
        }

        Ok(builder.finish())
    }
}

struct Builder {
    max_len: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
    /// Lines in `current` that came from the input (not a reopened fence).
    body_lines: usize,
    reopened: bool,
    fence: FenceTracker,
}

impl Builder {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
            body_lines: 0,
            reopened: false,
            fence: FenceTracker::new(),
        }
    }

    /// Append one line, flushing first if it would not fit.
    ///
    /// `reopen` is the fence that was open before this line; `reserve` is the
    /// room that must stay free afterwards for a synthetic closing marker.
    fn push_line(&mut self, line: &str, reopen: Option<&str>, reserve: usize) {
        let cost = char_len(line) + 1;
        if self.body_lines > 0 && self.current_len + cost + reserve > self.max_len {
            self.flush(reopen);
        }
        self.current.push_str(line);
        self.current.push('\n');
        self.current_len += cost;
        self.body_lines += 1;
    }

    fn flush(&mut self, reopen: Option<&str>) {
        if reopen.is_some() {
            self.current.push_str(CLOSE_FENCE);
        }
        self.chunks.push(std::mem::take(&mut self.current));
        self.current_len = 0;
        self.body_lines = 0;
        self.reopened = false;

        if let Some(open) = reopen {
            self.current.push_str(open);
            self.current.push('\n');
            self.current_len = char_len(open) + 1;
            self.reopened = true;
        }
    }

    fn finish(mut self) -> Vec<String> {
        // The input left a block open; close the continuation we started.
        if self.reopened && self.fence.is_open() {
            self.current.push_str(CLOSE_FENCE);
        }
        if self.body_lines > 0 {
            self.chunks.push(self.current);
        }
        self.chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Break `s` into pieces of at most `n` characters.
fn split_chars(s: &str, n: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in s.char_indices() {
        if count == n {
            pieces.push(&s[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&s[start..]);
    pieces
}
