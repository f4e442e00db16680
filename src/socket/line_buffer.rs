//! The fragmentation-handling half of the socket's line-oriented read
//! contract (spec.md §4.1, §8 scenarios 1-2), isolated from actual I/O so it
//! can be tested against hand-fed byte chunks.

use std::collections::VecDeque;

/// An ordered queue of lines assembled from successive reads, plus a flag
/// tracking whether the last queued entry is a partial trailing line.
///
/// Mirrors the `read_buf` + `status.fragmented` pair from the original
/// socket implementation: the fragmentation flag describes only the tail
/// element (is it a dangling fragment?), so complete lines queued ahead of
/// a trailing fragment are still poppable immediately (spec.md §8 scenario
/// 2: `\n` is the only splitter, and each complete line is delivered as
/// soon as it's seen, independent of anything still pending after it).
#[derive(Debug, Default)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    fragmented: bool,
}

impl LineBuffer {
    /// An empty, non-fragmented buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            fragmented: false,
        }
    }

    /// `true` once a complete leading line can be shifted without reading
    /// more data. `fragmented` only describes the *tail* element, so a
    /// queued complete line ahead of a trailing fragment is still ready.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.lines.len() > 1 || (self.lines.len() == 1 && !self.fragmented)
    }

    /// `true` if the buffer's tail element is a dangling, un-terminated
    /// fragment.
    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    /// `true` if the buffer holds nothing at all (no lines, no fragment).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Shift the first queued entry out, if any. The caller decides whether
    /// it was appropriate to call this (normally only after `ready()`, or
    /// once the connection has closed and no more data will ever arrive).
    pub fn pop(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Feed a freshly read chunk of text into the buffer.
    ///
    /// `scratch` is split on `\n`; every segment up to and including the
    /// last `\n` in `scratch` becomes a complete, `\n`-terminated line.
    /// Whatever follows the last `\n` (or all of `scratch`, if it contains
    /// none) becomes the new trailing fragment. If the buffer was already
    /// fragmented, the first new segment is concatenated onto the existing
    /// tail before anything else happens, exactly as spec.md §4.1 describes.
    pub fn ingest(&mut self, scratch: &str) {
        let mut parts: Vec<&str> = scratch.split('\n').collect();
        let new_fragment = parts.pop().unwrap_or("");
        let mut parts = parts.into_iter();

        if self.fragmented {
            match parts.next() {
                Some(first) => {
                    if let Some(tail) = self.lines.back_mut() {
                        tail.push_str(first);
                        tail.push('\n');
                    }
                    self.fragmented = false;
                }
                None => {
                    // `scratch` contained no `\n` at all: it's all more
                    // fragment, merge it in and stop.
                    if let Some(tail) = self.lines.back_mut() {
                        tail.push_str(new_fragment);
                    }
                    return;
                }
            }
        }

        for part in parts {
            self.lines.push_back(format!("{part}\n"));
        }

        if new_fragment.is_empty() {
            self.fragmented = false;
        } else {
            self.lines.push_back(new_fragment.to_string());
            self.fragmented = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LineBuffer;

    /// Scenario 1 (spec.md §8): reads split mid-stream at arbitrary byte
    /// offsets still yield exactly the three intended lines.
    #[test]
    fn fragmentation_across_read_boundaries() {
        let mut buf = LineBuffer::new();
        buf.ingest("HELO a\nDAT");
        assert!(buf.is_fragmented());
        assert!(buf.ready(), "the complete leading line is already poppable");
        assert_eq!(buf.pop().as_deref(), Some("HELO a\n"));
        assert!(!buf.ready(), "only the fragment remains");

        buf.ingest("A\nTo: You\n");
        assert!(!buf.is_fragmented());
        assert_eq!(buf.pop().as_deref(), Some("DATA\n"));
        assert_eq!(buf.pop().as_deref(), Some("To: You\n"));
        assert!(buf.is_empty());
        assert!(!buf.is_fragmented());
    }

    /// Scenario 2 (spec.md §8): complete leading lines are delivered
    /// immediately; only the trailing fragment itself is withheld until a
    /// later chunk completes it.
    #[test]
    fn trailing_fragment_completes_later() {
        let mut buf = LineBuffer::new();
        buf.ingest("GET / HTTP/1.0\nUser-Agent: X\npartial");
        assert!(buf.ready());
        assert_eq!(buf.pop().as_deref(), Some("GET / HTTP/1.0\n"));
        assert!(buf.ready());
        assert_eq!(buf.pop().as_deref(), Some("User-Agent: X\n"));
        assert!(!buf.ready(), "only the fragment remains");
        assert!(buf.is_fragmented());

        buf.ingest(" tail\n");
        assert!(buf.ready());
        assert_eq!(buf.pop().as_deref(), Some("partial tail\n"));
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new();
        buf.ingest("one\ntwo\nthree\n");
        assert_eq!(buf.pop().as_deref(), Some("one\n"));
        assert_eq!(buf.pop().as_deref(), Some("two\n"));
        assert_eq!(buf.pop().as_deref(), Some("three\n"));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut buf = LineBuffer::new();
        buf.ingest("");
        assert!(buf.is_empty());
        assert!(!buf.is_fragmented());
    }
}
