//! Bounded output accumulator for the evaluator.
//!
//! The original engine wrote through raw pointers into a fixed buffer and
//! spliced a scratch buffer near the tail to avoid overruns. Here the
//! buffer grows freely up to a hard cap; appends past the cap are dropped
//! and the overflow recorded, which subsumes the scratch-splice dance.
//! Storage is bytes — markup sentinels and ANSI escapes are not UTF-8 —
//! and the final result is decoded lossily.

/// A growable output buffer with a hard byte cap.
#[derive(Debug)]
pub struct OutBuf {
    buf: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl OutBuf {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            overflowed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether an append was ever truncated by the cap.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn push_byte(&mut self, b: u8) {
        if self.buf.len() >= self.cap {
            self.overflowed = true;
            return;
        }
        self.buf.push(b);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let room = self.cap.saturating_sub(self.buf.len());
        if bytes.len() <= room {
            self.buf.extend_from_slice(bytes);
        } else {
            self.overflowed = true;
            self.buf.extend_from_slice(&bytes[..room]);
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Roll the write position back to `pos` (erasing a provisional
    /// function name before dispatch).
    pub fn truncate(&mut self, pos: usize) {
        self.buf.truncate(pos);
    }

    /// Text written since `pos`, decoded lossily.
    pub fn since(&self, pos: usize) -> String {
        String::from_utf8_lossy(&self.buf[pos..]).into_owned()
    }

    /// Whether the buffer currently ends with `s` (marker deduplication).
    pub fn ends_with(&self, s: &str) -> bool {
        self.buf.ends_with(s.as_bytes())
    }

    /// Drop a single trailing space, if present.
    pub fn trim_one_trailing_space(&mut self) {
        if self.buf.last() == Some(&b' ') {
            self.buf.pop();
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_drops_excess() {
        let mut b = OutBuf::new(4);
        b.push_str("abcdef");
        assert_eq!(b.into_string(), "abcd");
    }

    #[test]
    fn cap_marks_overflow() {
        let mut b = OutBuf::new(2);
        b.push_str("abc");
        assert!(b.overflowed());
    }

    #[test]
    fn truncate_and_since() {
        let mut b = OutBuf::new(64);
        b.push_str("add");
        assert_eq!(b.since(0), "add");
        b.truncate(0);
        assert!(b.is_empty());
    }

    #[test]
    fn trim_one_trailing_space_only_pops_one() {
        let mut b = OutBuf::new(64);
        b.push_str("x  ");
        b.trim_one_trailing_space();
        assert_eq!(b.into_string(), "x ");
    }
}
