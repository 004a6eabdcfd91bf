//! Byte cursor over an input span.
//!
//! Softcode is a byte-oriented language (markup sentinels and ANSI
//! escapes are raw bytes, not necessarily valid UTF-8 boundaries), so the
//! scanner works on `&[u8]` with an in-place position. Consecutive parses
//! over the same string (argument lists, semicolon-separated statements)
//! share one cursor.

/// A cursor into an input byte string.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    /// Current byte, or `None` at end of input.
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Byte at `offset` past the current position.
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advance one byte and return it.
    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Advance `n` bytes (clamped to end of input).
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The unconsumed remainder, lossily decoded.
    pub fn rest(&self) -> String {
        String::from_utf8_lossy(&self.input[self.pos..]).into_owned()
    }

    /// Bytes between two recorded positions, lossily decoded.
    pub fn slice(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.input[start..end]).into_owned()
    }

    /// Consume `n` bytes (clamped) and return them as a slice of the
    /// original input.
    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let start = self.pos;
        self.pos = (self.pos + n).min(self.input.len());
        &self.input[start..self.pos]
    }

    /// Length of the run starting at the cursor for which `pred` holds.
    pub fn run_while(&self, pred: impl Fn(u8) -> bool) -> usize {
        self.input[self.pos..]
            .iter()
            .take_while(|&&b| pred(b))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_peek() {
        let mut c = Cursor::new("ab");
        assert_eq!(c.peek(), Some(b'a'));
        assert_eq!(c.bump(), Some(b'a'));
        assert_eq!(c.bump(), Some(b'b'));
        assert_eq!(c.bump(), None);
        assert!(c.at_end());
    }

    #[test]
    fn run_while_counts_prefix() {
        let c = Cursor::new("   x");
        assert_eq!(c.run_while(|b| b == b' '), 3);
    }
}
