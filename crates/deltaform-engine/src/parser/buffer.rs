//! Cross-chunk ring buffer with incremental balance tracking.
//!
//! Bytes append at the tail; the head only ever advances at safe split
//! points (committed parses or overflow trimming), so the buffer always
//! holds a suffix of the logical stream that is parseable given the
//! recorded reopen frame. Balance counters are updated with a single
//! forward pass over new bytes only.
//!
//! Safe split points:
//! - after a byte at which the bracket and quote stacks return to depth
//!   zero (a complete top-level value), or
//! - after a `,` at stack depth 1 outside any string literal.

use deltaform_core::errors::CoreError;

/// A `,` split point at depth 1, with the single enclosing frame byte
/// (`b'{'` or `b'['`) needed to reopen the container after trimming.
#[derive(Clone, Copy, Debug)]
struct CommaPoint {
    offset: usize,
    frame: u8,
}

#[derive(Debug)]
pub(crate) struct ChunkBuffer {
    data: Vec<u8>,
    capacity: usize,

    // Scan state at the tail of `data`, maintained incrementally.
    frames: Vec<u8>,
    in_string: bool,
    escape: bool,

    /// Offsets (into `data`) just past a complete top-level value.
    depth0_points: Vec<usize>,
    /// Offsets just past a depth-1 comma, with the enclosing frame.
    comma_points: Vec<CommaPoint>,

    /// Synthesized opening tokens for frames that were trimmed off the
    /// head; prepended to the parse window.
    reopen_prefix: String,
}

/// What an append did to the buffer.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AppendOutcome {
    /// Bytes discarded from the head by overflow trimming.
    pub dropped: usize,
}

impl ChunkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            frames: Vec::new(),
            in_string: false,
            escape: false,
            depth0_points: Vec::new(),
            comma_points: Vec::new(),
            reopen_prefix: String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn in_string(&self) -> bool {
        self.in_string
    }

    pub fn has_reopen_prefix(&self) -> bool {
        !self.reopen_prefix.is_empty()
    }

    /// Append a chunk, trimming the head at a safe split point if the
    /// buffer would overflow. Fails with `CapacityExceeded` when no safe
    /// point frees enough room.
    pub fn append(&mut self, chunk: &[u8]) -> Result<AppendOutcome, CoreError> {
        let mut outcome = AppendOutcome::default();
        let needed = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        if needed > 0 {
            let split = self.best_split_at_least(needed).ok_or_else(|| {
                CoreError::CapacityExceeded(format!(
                    "chunk of {} bytes cannot fit in a {}-byte buffer without an unsafe split",
                    chunk.len(),
                    self.capacity
                ))
            })?;
            outcome.dropped = split;
            self.trim_head(split);
        }
        self.scan(chunk);
        self.data.extend_from_slice(chunk);
        Ok(outcome)
    }

    /// The smallest safe split offset that frees at least `needed` bytes.
    fn best_split_at_least(&self, needed: usize) -> Option<usize> {
        let depth0 = self
            .depth0_points
            .iter()
            .copied()
            .find(|&p| p >= needed);
        let comma = self
            .comma_points
            .iter()
            .map(|c| c.offset)
            .find(|&p| p >= needed);
        match (depth0, comma) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop `split` bytes from the head. The split must be one of the
    /// recorded safe points.
    fn trim_head(&mut self, split: usize) {
        // Reopen frame for a comma split; a depth0 split starts clean.
        let comma = self.comma_points.iter().find(|c| c.offset == split);
        self.reopen_prefix = match comma {
            Some(point) => (point.frame as char).to_string(),
            None => String::new(),
        };
        let _ = self.data.drain(..split);
        self.rebase(split);
    }

    /// Consume fully-parsed bytes from the head (a committed top-level
    /// value); clears the reopen prefix.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.data.len());
        let _ = self.data.drain(..count);
        self.rebase(count);
        self.reopen_prefix.clear();
    }

    fn rebase(&mut self, by: usize) {
        self.depth0_points.retain(|&p| p > by);
        for p in &mut self.depth0_points {
            *p -= by;
        }
        self.comma_points.retain(|c| c.offset > by);
        for c in &mut self.comma_points {
            c.offset -= by;
        }
    }

    /// Single forward pass over new bytes. Quotes and brackets are ASCII,
    /// so byte-wise scanning is UTF-8 safe.
    fn scan(&mut self, chunk: &[u8]) {
        let base = self.data.len();
        for (i, &b) in chunk.iter().enumerate() {
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if b == b'\\' {
                    self.escape = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.frames.is_empty() {
                        self.depth0_points.push(base + i + 1);
                    }
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.frames.push(b),
                b'}' | b']' => {
                    let open = if b == b'}' { b'{' } else { b'[' };
                    if self.frames.last() == Some(&open) {
                        let _ = self.frames.pop();
                        if self.frames.is_empty() {
                            self.depth0_points.push(base + i + 1);
                        }
                    }
                    // An unmatched closer is the completer's problem; the
                    // balance scan just never records a safe point for it.
                }
                b',' => {
                    if self.frames.len() == 1 {
                        self.comma_points.push(CommaPoint {
                            offset: base + i + 1,
                            frame: self.frames[0],
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// The parse window: reopen prefix plus the longest UTF-8-valid
    /// prefix of the buffered bytes. A trailing incomplete multi-byte
    /// sequence stays in the buffer and is never decoded.
    pub fn window(&self) -> String {
        let valid = match std::str::from_utf8(&self.data) {
            Ok(s) => s,
            Err(e) => {
                // Interior invalid bytes also stop the window; later
                // chunks may complete a split code point at the tail.
                let valid_up_to = e.valid_up_to();
                // Safe: valid_up_to is a proven boundary.
                std::str::from_utf8(&self.data[..valid_up_to]).unwrap_or("")
            }
        };
        let mut window = String::with_capacity(self.reopen_prefix.len() + valid.len());
        window.push_str(&self.reopen_prefix);
        window.push_str(valid);
        window
    }

    /// The longest prefix of the buffered bytes that is a complete
    /// top-level value, when the buffer starts at a clean stream position.
    pub fn closed_prefix(&self) -> Option<usize> {
        if !self.reopen_prefix.is_empty() {
            return None;
        }
        self.depth0_points.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_depth_across_chunks() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"{\"a\": [1,").unwrap();
        assert_eq!(buf.depth(), 2);
        let _ = buf.append(b" 2]}").unwrap();
        assert_eq!(buf.depth(), 0);
        assert_eq!(buf.closed_prefix(), Some(14));
    }

    #[test]
    fn string_state_suppresses_structural_bytes() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"{\"a\": \"}[{\\\"\"").unwrap();
        assert_eq!(buf.depth(), 1);
        assert!(!buf.in_string());
    }

    #[test]
    fn split_string_across_chunks() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"{\"a\": \"hel").unwrap();
        assert!(buf.in_string());
        let _ = buf.append(b"lo\"}").unwrap();
        assert!(!buf.in_string());
        assert_eq!(buf.closed_prefix(), Some(buf.len()));
    }

    #[test]
    fn window_holds_back_incomplete_utf8() {
        let mut buf = ChunkBuffer::new(1024);
        // "é" is 0xC3 0xA9; split it across chunks.
        let _ = buf.append(b"{\"a\": \"x\xc3").unwrap();
        let window = buf.window();
        assert!(window.ends_with('x'), "window {window:?}");
        assert!(!window.contains('\u{fffd}'));

        let _ = buf.append(b"\xa9\"}").unwrap();
        assert_eq!(buf.window(), "{\"a\": \"x\u{e9}\"}");
    }

    #[test]
    fn consume_advances_and_rebases() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"{\"a\": 1}").unwrap();
        let prefix = buf.closed_prefix().unwrap();
        buf.consume(prefix);
        assert!(buf.is_empty());
        assert_eq!(buf.closed_prefix(), None);
    }

    #[test]
    fn overflow_trims_at_comma_point() {
        let mut buf = ChunkBuffer::new(24);
        let _ = buf.append(b"[{\"id\": 111},").unwrap();
        // 13 bytes in; appending 16 more requires dropping >= 5.
        let outcome = buf.append(b"{\"id\": 222},abcd").unwrap();
        assert_eq!(outcome.dropped, 13);
        assert!(buf.has_reopen_prefix());
        assert!(buf.window().starts_with('['));
    }

    #[test]
    fn overflow_without_safe_point_fails() {
        let mut buf = ChunkBuffer::new(16);
        let _ = buf.append(b"{\"key\": \"abc").unwrap();
        let err = buf.append(b"defghijklm\"").unwrap_err();
        assert_eq!(err.error_kind(), "capacity_exceeded");
    }

    #[test]
    fn comma_points_only_at_depth_one() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"[[1,2],").unwrap();
        assert_eq!(buf.comma_points.len(), 1);
        assert_eq!(buf.comma_points[0].offset, 7);
        assert_eq!(buf.comma_points[0].frame, b'[');
    }

    #[test]
    fn top_level_string_records_depth0() {
        let mut buf = ChunkBuffer::new(1024);
        let _ = buf.append(b"\"hello\"").unwrap();
        assert_eq!(buf.closed_prefix(), Some(7));
    }
}
