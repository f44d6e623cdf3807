//! Incremental decoding of raw terminal bytes into matchable text.

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

/// Turns a stream of PTY reads into clean UTF-8 text.
///
/// Reads can end anywhere: inside a multi-byte character or halfway through
/// an escape sequence. Incomplete tails are held back until the next push.
/// Carriage returns are dropped, so `\r\n` line endings fold to `\n`.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Raw bytes carried over from the previous push.
    pending: Vec<u8>,

    /// Remove CSI/OSC/two-byte escape sequences.
    strip_ansi: bool,
}

impl StreamDecoder {
    pub fn new(strip_ansi: bool) -> Self {
        Self {
            pending: Vec::new(),
            strip_ansi,
        }
    }

    /// Decode the next read. May return an empty string when everything was
    /// either escape codes or an incomplete tail.
    pub fn push(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let data = std::mem::take(&mut self.pending);

        let (clean, consumed) = strip(&data, self.strip_ansi);
        let mut carry = data[consumed..].to_vec();

        let (mut text, tail) = decode_lossy(&clean);
        if !tail.is_empty() {
            if carry.is_empty() {
                // Truncated character at the very end: wait for the rest.
                carry = tail.to_vec();
            } else {
                text.push(char::REPLACEMENT_CHARACTER);
            }
        }

        self.pending = carry;
        text
    }

    /// Flush whatever is still held back, e.g. at end of stream.
    pub fn finish(&mut self) -> String {
        let data = std::mem::take(&mut self.pending);
        let (clean, _) = strip(&data, self.strip_ansi);
        String::from_utf8_lossy(&clean).into_owned()
    }

    /// Number of bytes waiting for more input.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode `bytes`, replacing each invalid sequence with U+FFFD.
///
/// A character cut off at the very end is not replaced but returned as the
/// second element.
fn decode_lossy(bytes: &[u8]) -> (String, &[u8]) {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                return (out, &[]);
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => return (out, after),
                }
            }
        }
    }
}

/// Strip escapes and carriage returns.
///
/// Returns the cleaned bytes and how much of `input` was consumed. Anything
/// after `consumed` is an escape sequence that has not terminated yet.
fn strip(input: &[u8], strip_ansi: bool) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            ESC if strip_ansi => match escape_len(&input[i..]) {
                Some(len) => i += len,
                None => return (out, i),
            },
            b'\r' => i += 1,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    (out, input.len())
}

/// Length of the escape sequence at the start of `seq`, or `None` if the
/// sequence is cut off.
fn escape_len(seq: &[u8]) -> Option<usize> {
    debug_assert_eq!(seq.first(), Some(&ESC));
    let kind = *seq.get(1)?;

    match kind {
        // CSI: ESC [ params intermediates final
        b'[' => {
            let mut j = 2;
            while j < seq.len() && (0x20..=0x3F).contains(&seq[j]) {
                j += 1;
            }
            let last = *seq.get(j)?;
            if (0x40..=0x7E).contains(&last) {
                Some(j + 1)
            } else {
                // Malformed; drop the introducer and keep going.
                Some(j)
            }
        }
        // OSC: ESC ] ... (BEL | ESC \)
        b']' => {
            let mut j = 2;
            while j < seq.len() {
                if seq[j] == BEL {
                    return Some(j + 1);
                }
                if seq[j] == ESC {
                    let next = *seq.get(j + 1)?;
                    return Some(if next == b'\\' { j + 2 } else { j });
                }
                j += 1;
            }
            None
        }
        // Charset designation: ESC ( B
        b'(' | b')' => {
            seq.get(2)?;
            Some(3)
        }
        // Two-byte escape (ESC 7, ESC M, ESC =, ...)
        _ => Some(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"hello world\n"), "hello world\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_strips_colors_and_crlf() {
        let mut decoder = StreamDecoder::new(true);
        let text = decoder.push(b"\x1b[1;31merror\x1b[0m: boom\r\n");
        assert_eq!(text, "error: boom\n");
    }

    #[test]
    fn test_strips_osc_title() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"\x1b]0;claude\x07> "), "> ");
        assert_eq!(decoder.push(b"\x1b]0;title\x1b\\rest"), "rest");
    }

    #[test]
    fn test_escape_split_across_reads() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"abc\x1b[3"), "abc");
        assert!(decoder.pending_len() > 0);
        assert_eq!(decoder.push(b"2mgreen\x1b[0m"), "green");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let mut decoder = StreamDecoder::new(true);
        // "│" is E2 94 82
        assert_eq!(decoder.push(b"\xe2\x94"), "");
        assert_eq!(decoder.push(b"\x82 > "), "│ > ");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = StreamDecoder::new(true);
        let text = decoder.push(b"a\xffb");
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_split_character_after_invalid_byte() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"a\xff\xe2\x94"), "a\u{FFFD}");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.push(b"\x82 > "), "\u{2502} > ");
    }

    #[test]
    fn test_truncated_character_before_escape_is_replaced() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"x\xe2\x94\x1b["), "x\u{FFFD}");
        assert_eq!(decoder.push(b"0m"), "");
    }

    #[test]
    fn test_keeps_escapes_when_not_stripping() {
        let mut decoder = StreamDecoder::new(false);
        assert_eq!(decoder.push(b"\x1b[1mbold\r\n"), "\x1b[1mbold\n");
    }

    #[test]
    fn test_finish_flushes_truncated_escape() {
        let mut decoder = StreamDecoder::new(true);
        assert_eq!(decoder.push(b"tail\x1b"), "tail");
        assert_eq!(decoder.finish(), "");
        assert_eq!(decoder.pending_len(), 0);
    }
}
