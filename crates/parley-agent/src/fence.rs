//! Markdown code-fence state for line-by-line scanning.
//!
//! Fences do not nest: every fence line toggles between open and closed, so
//! the tracker only needs to remember the line that opened the current block.

pub const FENCE_MARKER: &str = "```";

/// A bare closing marker plus its newline.
pub const CLOSE_FENCE: &str = "```\n";

/// What a scanned line did to the fence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceEvent {
    Opened,
    Closed,
    None,
}

#[derive(Debug, Default, Clone)]
pub struct FenceTracker {
    open: Option<String>,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `line` is a fence delimiter (ignoring trailing spaces).
    pub fn is_fence(line: &str) -> bool {
        line.trim_end_matches(' ').starts_with(FENCE_MARKER)
    }

    /// Feed the next line and update the open/closed state.
    pub fn observe(&mut self, line: &str) -> FenceEvent {
        if !Self::is_fence(line) {
            return FenceEvent::None;
        }
        if self.open.take().is_some() {
            FenceEvent::Closed
        } else {
            self.open = Some(line.trim_end_matches(' ').to_string());
            FenceEvent::Opened
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// The line that opened the current block, language tag included.
    pub fn opening_line(&self) -> Option<&str> {
        self.open.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_on_each_fence_line() {
        let mut fence = FenceTracker::new();
        assert_eq!(fence.observe("text"), FenceEvent::None);
        assert!(!fence.is_open());

        assert_eq!(fence.observe("```rust"), FenceEvent::Opened);
        assert_eq!(fence.opening_line(), Some("```rust"));

        // A fence line with a tag inside an open block still closes it.
        assert_eq!(fence.observe("```python"), FenceEvent::Closed);
        assert!(fence.opening_line().is_none());
    }

    #[test]
    fn trailing_spaces_are_ignored() {
        let mut fence = FenceTracker::new();
        assert_eq!(fence.observe("```go   "), FenceEvent::Opened);
        assert_eq!(fence.opening_line(), Some("```go"));
        assert_eq!(fence.observe("```  "), FenceEvent::Closed);
    }

    #[test]
    fn indented_or_inline_backticks_are_not_fences() {
        assert!(!FenceTracker::is_fence("  ```"));
        assert!(!FenceTracker::is_fence("use `code` inline"));
        assert!(!FenceTracker::is_fence("``"));
        assert!(FenceTracker::is_fence("````"));
    }
}
