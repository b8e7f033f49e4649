//! Byte-level escape sequence scanning.
//!
//! Both the relay and the classifier see the agent's output in arbitrary
//! chunks, so an escape sequence or a multi-byte character can be cut in
//! half at a chunk boundary. These helpers find such unfinished tails.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Longest unterminated sequence we are willing to wait for. Anything
/// longer is treated as finished so a stray ESC cannot stall the scanner.
pub const MAX_PENDING_ESCAPE: usize = 512;

/// Offset of the unfinished escape sequence or truncated UTF-8 character
/// at the end of `bytes`, if there is one.
pub fn incomplete_tail(bytes: &[u8]) -> Option<usize> {
    unterminated_escape(bytes).or_else(|| truncated_utf8(bytes))
}

/// Offset of an escape sequence at the end of `bytes` that has not seen
/// its final byte yet.
pub fn unterminated_escape(bytes: &[u8]) -> Option<usize> {
    let floor = bytes.len().saturating_sub(MAX_PENDING_ESCAPE);
    let start = floor + bytes[floor..].iter().rposition(|&b| b == ESC)?;
    if is_complete(&bytes[start..]) {
        None
    } else {
        Some(start)
    }
}

/// `seq` starts with ESC and holds no other ESC byte.
fn is_complete(seq: &[u8]) -> bool {
    let body = &seq[1..];
    match body.first() {
        None => false,
        // CSI: parameters and intermediates, then a final byte
        Some(b'[') => body[1..].iter().any(|b| (0x40..=0x7e).contains(b)),
        // OSC ends with BEL here; an ESC \ terminator would be the last ESC
        Some(b']') => body[1..].contains(&BEL),
        // DCS, APC and PM only end with ESC \
        Some(b'P') | Some(b'_') | Some(b'^') => false,
        // Character set designation and friends need one more byte
        Some(0x20..=0x2f) => body.len() >= 2,
        Some(_) => true,
    }
}

/// Offset of a UTF-8 lead byte at the end of `bytes` whose continuation
/// bytes have not arrived yet.
pub fn truncated_utf8(bytes: &[u8]) -> Option<usize> {
    let len = bytes.len();
    for i in (len.saturating_sub(4)..len).rev() {
        let b = bytes[i];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xf0..=0xf7 => 4,
            0xe0..=0xef => 3,
            0xc0..=0xdf => 2,
            _ => 1,
        };
        return (len - i < needed).then_some(i);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_complete() {
        assert_eq!(incomplete_tail(b"hello world"), None);
        assert_eq!(incomplete_tail(b""), None);
    }

    #[test]
    fn test_lone_escape() {
        assert_eq!(unterminated_escape(b"abc\x1b"), Some(3));
    }

    #[test]
    fn test_csi_waits_for_final_byte() {
        assert_eq!(unterminated_escape(b"x\x1b[1;3"), Some(1));
        assert_eq!(unterminated_escape(b"x\x1b[1;31m"), None);
    }

    #[test]
    fn test_osc_terminators() {
        assert_eq!(unterminated_escape(b"\x1b]2;my title"), Some(0));
        assert_eq!(unterminated_escape(b"\x1b]2;my title\x07"), None);
        assert_eq!(unterminated_escape(b"\x1b]2;my title\x1b\\"), None);
        assert_eq!(unterminated_escape(b"\x1b]2;my title\x1b"), Some(12));
    }

    #[test]
    fn test_two_byte_and_charset_escapes() {
        assert_eq!(unterminated_escape(b"\x1b7"), None);
        assert_eq!(unterminated_escape(b"\x1b("), Some(0));
        assert_eq!(unterminated_escape(b"\x1b(B"), None);
    }

    #[test]
    fn test_truncated_utf8() {
        let spinner = "⠋".as_bytes();
        assert_eq!(truncated_utf8(&spinner[..2]), Some(0));
        assert_eq!(truncated_utf8(spinner), None);

        let mut bytes = b"ok ".to_vec();
        bytes.extend_from_slice(&"🟢".as_bytes()[..3]);
        assert_eq!(truncated_utf8(&bytes), Some(3));
    }

    #[test]
    fn test_overlong_sequence_is_given_up() {
        let mut bytes = b"\x1b]2;".to_vec();
        bytes.extend(std::iter::repeat(b'a').take(MAX_PENDING_ESCAPE));
        assert_eq!(unterminated_escape(&bytes), None);
    }
}
