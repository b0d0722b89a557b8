/// Which byte-framing the helper uses to delimit JSON objects on its
/// pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON object per `\n`-terminated line. This is what every known
    /// helper build (`oftr --rpc`) actually speaks.
    #[default]
    LineDelimited,
    /// A big-endian `u32` byte length followed by that many bytes of JSON.
    /// Wired through the same `Driver` codepath but currently unexercised
    /// by any known helper build.
    LengthPrefixed,
}

/// Big-endian u32 length prefix, matching the wire convention used by the
/// length-prefixed framing strategy.
pub fn encode_length_prefixed(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Attempts to split one length-prefixed frame off the front of `buffer`.
/// Returns the frame payload and the number of bytes consumed, or `None` if
/// `buffer` does not yet contain a complete frame.
pub fn decode_length_prefixed(buffer: &[u8]) -> Option<(&[u8], usize)> {
    if buffer.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    let total = 4 + len;
    if buffer.len() < total {
        return None;
    }
    Some((&buffer[4..total], total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_length_prefixed_frame() {
        let payload = br#"{"id":1}"#;
        let framed = encode_length_prefixed(payload);
        let (decoded, consumed) = decode_length_prefixed(&framed).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, framed.len());
    }

    #[test]
    fn reports_incomplete_frame() {
        let payload = br#"{"id":1}"#;
        let framed = encode_length_prefixed(payload);
        assert!(decode_length_prefixed(&framed[..framed.len() - 2]).is_none());
    }

    #[test]
    fn default_is_line_delimited() {
        assert_eq!(Framing::default(), Framing::LineDelimited);
    }
}
