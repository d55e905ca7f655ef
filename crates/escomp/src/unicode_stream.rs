//! Decodes source bytes into a push-backable cursor of Unicode code points.
//!
//! Construction sniffs a byte-order mark to pick the source encoding; the
//! lexer never has to think about bytes again, only `char` (really: `u32`
//! code points, since lone surrogates in `UTF-16` input must still round
//! trip through the lexer without panicking).

/// Sentinel returned by [`UnicodeStream::next`] once the stream is exhausted.
pub const END_OF_INPUT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

fn detect_encoding(bytes: &[u8]) -> (Encoding, usize) {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        (Encoding::Utf8, 3)
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        (Encoding::Utf16Be, 2)
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        (Encoding::Utf16Le, 2)
    } else {
        (Encoding::Utf8, 0)
    }
}

fn decode_code_points(bytes: &[u8], encoding: Encoding) -> Vec<u32> {
    match encoding {
        Encoding::Utf8 => {
            let text = String::from_utf8_lossy(bytes);
            text.chars().map(|c| c as u32).collect()
        }
        Encoding::Utf16Le | Encoding::Utf16Be => {
            let mut units = Vec::with_capacity(bytes.len() / 2);
            let mut chunks = bytes.chunks_exact(2);
            for pair in &mut chunks {
                let unit = match encoding {
                    Encoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                    Encoding::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
                    Encoding::Utf8 => unreachable!(),
                };
                units.push(unit);
            }
            // char::decode_utf16 merges surrogate pairs but yields a
            // replacement character for unpaired surrogates rather than
            // panicking, which is what we want for "illegal source".
            char::decode_utf16(units)
                .map(|r| r.unwrap_or('\u{FFFD}') as u32)
                .collect()
        }
    }
}

/// A push-backable cursor over the code points of a source file.
///
/// `push` supports unlimited push-back in practice: the lexer speculatively
/// re-lexes a `/` as a regex body, and the parser re-lexes a skipped
/// directive-prologue string, both of which can require rewinding more than
/// one character.
pub struct UnicodeStream {
    points: Vec<u32>,
    position: usize,
}

impl UnicodeStream {
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        let (encoding, bom_len) = detect_encoding(bytes);
        let points = decode_code_points(&bytes[bom_len..], encoding);
        Self { points, position: 0 }
    }

    #[must_use]
    pub fn from_str(text: &str) -> Self {
        Self {
            points: text.chars().map(|c| c as u32).collect(),
            position: 0,
        }
    }

    /// Returns the next code point, advancing the cursor, or
    /// [`END_OF_INPUT`] if the stream is exhausted.
    pub fn next(&mut self) -> u32 {
        if self.position >= self.points.len() {
            return END_OF_INPUT;
        }
        let c = self.points[self.position];
        self.position += 1;
        c
    }

    /// Pushes one character back onto the stream. Calling this past the end
    /// of input simply decrements the position without storing anything,
    /// since `next()` will reread from `points` directly.
    pub fn push(&mut self) {
        if self.position > 0 {
            self.position -= 1;
        }
    }

    /// Skips `n` characters, clamping at the end of input.
    pub fn skip(&mut self, n: usize) {
        self.position = (self.position + n).min(self.points.len());
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Sets the cursor to an absolute position, used to rewind to a saved
    /// mark (e.g. re-lexing a directive prologue).
    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.points.len());
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.position >= self.points.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_without_bom_round_trips() {
        let mut s = UnicodeStream::new("let x = 1;".as_bytes());
        assert_eq!(s.next(), 'l' as u32);
        assert_eq!(s.next(), 'e' as u32);
        s.push();
        assert_eq!(s.next(), 'e' as u32);
    }

    #[test]
    fn utf8_bom_is_skipped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"x");
        let mut s = UnicodeStream::new(&bytes);
        assert_eq!(s.next(), 'x' as u32);
        assert_eq!(s.next(), END_OF_INPUT);
    }

    #[test]
    fn utf16le_bom_decodes_code_points() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "ab".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let mut s = UnicodeStream::new(&bytes);
        assert_eq!(s.next(), 'a' as u32);
        assert_eq!(s.next(), 'b' as u32);
    }

    #[test]
    fn utf16be_bom_decodes_code_points() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "ab".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let mut s = UnicodeStream::new(&bytes);
        assert_eq!(s.next(), 'a' as u32);
        assert_eq!(s.next(), 'b' as u32);
    }

    #[test]
    fn skip_past_end_clamps() {
        let mut s = UnicodeStream::from_str("ab");
        s.skip(100);
        assert!(s.is_at_end());
        assert_eq!(s.next(), END_OF_INPUT);
    }

    #[test]
    fn push_after_end_decrements_without_storing() {
        let mut s = UnicodeStream::from_str("a");
        assert_eq!(s.next(), 'a' as u32);
        assert_eq!(s.next(), END_OF_INPUT);
        s.push();
        assert_eq!(s.position(), 1);
    }
}
