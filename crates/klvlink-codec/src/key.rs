//! The UAS Local Set universal key.

/// Universal key length in bytes.
pub const KEY_LEN: usize = 16;

/// MISB ST0601 UAS Datalink Local Set universal key.
pub const UNIVERSAL_KEY: [u8; KEY_LEN] = [
    0x06, 0x0E, 0x2B, 0x34, // SMPTE designator
    0x02, 0x0B, 0x01, 0x01, // registry category + designation
    0x0E, 0x01, 0x03, 0x01, // organization (MISB)
    0x01, 0x00, 0x00, 0x00, // ST0601 local set
];

/// Returns true if the 16 bytes at `offset` are the universal key.
pub fn matches_at(buf: &[u8], offset: usize) -> bool {
    buf.get(offset..)
        .and_then(|rest| rest.get(..KEY_LEN))
        .is_some_and(|candidate| candidate == UNIVERSAL_KEY)
}

/// Offsets of every universal key occurrence found by plain substring search.
///
/// Independent of the packet framer: key bytes inside payloads are counted too.
pub fn key_offsets(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
    data.windows(KEY_LEN)
        .enumerate()
        .filter(|(_, window)| *window == UNIVERSAL_KEY)
        .map(|(offset, _)| offset)
}

/// Count universal key occurrences by plain substring search.
pub fn count_key_occurrences(data: &[u8]) -> usize {
    key_offsets(data).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_starts_with_smpte_designator() {
        assert_eq!(&UNIVERSAL_KEY[..4], &[0x06, 0x0E, 0x2B, 0x34]);
    }

    #[test]
    fn matches_at_checks_bounds() {
        let mut buf = vec![0xFF, 0xFF];
        buf.extend_from_slice(&UNIVERSAL_KEY);
        assert!(matches_at(&buf, 2));
        assert!(!matches_at(&buf, 0));
        assert!(!matches_at(&buf, 3));
        assert!(!matches_at(&buf, 100));
        assert!(!matches_at(&UNIVERSAL_KEY[..15], 0));
    }

    #[test]
    fn substring_count_includes_keys_anywhere() {
        let mut data = b"garbage".to_vec();
        data.extend_from_slice(&UNIVERSAL_KEY);
        data.extend_from_slice(&[0x01, 0x02]);
        data.extend_from_slice(&UNIVERSAL_KEY);
        data.extend_from_slice(&UNIVERSAL_KEY[..8]);

        let offsets: Vec<usize> = key_offsets(&data).collect();
        assert_eq!(offsets, vec![7, 25]);
        assert_eq!(count_key_occurrences(&data), 2);
        assert_eq!(count_key_occurrences(b"short"), 0);
    }
}
