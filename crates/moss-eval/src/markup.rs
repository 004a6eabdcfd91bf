//! Out-of-band markup and ANSI span handling.
//!
//! Markup spans (tag-start sentinel through tag-end sentinel) and ANSI
//! escapes (ESC through the terminating letter) are formatting, not
//! language syntax: the scanner copies them through verbatim, and a
//! function flagged `STRIP_ANSI` has them removed from its arguments
//! before dispatch.

/// Markup span opener (out-of-band tag start).
pub const TAG_START: u8 = 0x02;
/// Markup span closer.
pub const TAG_END: u8 = 0x03;
/// ANSI escape introducer; the span runs through the terminating `m`.
pub const ESC: u8 = 0x1b;

/// Remove markup and ANSI spans from a string.
pub fn strip_markup(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            TAG_START => {
                while i < bytes.len() && bytes[i] != TAG_END {
                    i += 1;
                }
                i += 1; // past TAG_END
            }
            ESC => {
                while i < bytes.len() && bytes[i] != b'm' {
                    i += 1;
                }
                i += 1; // past 'm'
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_and_tags() {
        let s = format!(
            "a{}31m{}b{}tag{}c",
            ESC as char, "", TAG_START as char, TAG_END as char
        );
        assert_eq!(strip_markup(&s), "abc");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_markup("hello world"), "hello world");
    }
}
