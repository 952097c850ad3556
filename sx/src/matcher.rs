//! Response header matching
//!
//! Inbound frames are classified by prefix against an ordered table of known
//! reply headers. The first pattern that is a prefix of the frame wins;
//! trailing payload bytes after the header are ignored.

use serde::Serialize;

/// Status byte opening every system-exclusive frame
pub const SYSEX_START: u8 = 0xF0;

/// Status byte closing every system-exclusive frame
pub const SYSEX_END: u8 = 0xF7;

/// Whether `frame` is a system-exclusive frame
pub fn is_sysex(frame: &[u8]) -> bool {
    frame.first() == Some(&SYSEX_START)
}

/// A required byte prefix identifying one category of reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderPattern {
    label: &'static str,
    bytes: Vec<u8>,
}

impl HeaderPattern {
    pub fn new(label: &'static str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            label,
            bytes: bytes.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Prefix match; a frame shorter than the pattern never matches
    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.starts_with(&self.bytes)
    }
}

/// Ordered, immutable set of reply headers
///
/// Order is match priority. Patterns need not be prefix-disjoint; when two
/// overlap the earlier one is reported.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseTable {
    patterns: Vec<HeaderPattern>,
}

impl ResponseTable {
    pub fn new(patterns: Vec<HeaderPattern>) -> Self {
        Self { patterns }
    }

    /// First pattern matching `frame`, in table order
    pub fn classify(&self, frame: &[u8]) -> Option<&HeaderPattern> {
        self.patterns.iter().find(|pattern| pattern.matches(frame))
    }

    pub fn patterns(&self) -> &[HeaderPattern] {
        &self.patterns
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Length of the shortest pattern (0 for an empty table)
    pub fn shortest(&self) -> usize {
        self.patterns.iter().map(HeaderPattern::len).min().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table() -> ResponseTable {
        ResponseTable::new(vec![
            HeaderPattern::new("single", [0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A, 0x00, 0x00]),
            HeaderPattern::new("drum", [0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A, 0x11]),
        ])
    }

    #[test]
    fn test_is_sysex() {
        assert!(is_sysex(&[SYSEX_START, 0x40, SYSEX_END]));
        assert!(!is_sysex(&[0x90, 0x3C, 0x7F]));
        assert!(!is_sysex(&[]));
    }

    #[test]
    fn test_exact_frame_matches() {
        let table = table();
        let frame = [0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A, 0x00, 0x00];
        assert_eq!(table.classify(&frame).map(HeaderPattern::label), Some("single"));
    }

    #[test]
    fn test_frame_with_trailer_matches() {
        let table = table();
        let frame = [0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A, 0x11, 0x05, 0x7F, 0x12, SYSEX_END];
        assert_eq!(table.classify(&frame).map(HeaderPattern::label), Some("drum"));
    }

    #[test]
    fn test_short_frame_never_matches() {
        let table = table();
        assert!(table.classify(&[]).is_none());
        assert!(table.classify(&[0xF0]).is_none());
        assert!(table.classify(&[0xF0, 0x40, 0x00, 0x20, 0x00, 0x0A]).is_none());
    }

    #[test]
    fn test_table_order_decides_overlapping_prefixes() {
        let short = HeaderPattern::new("short", [0xF0, 0x40, 0x00, 0x21, 0x00, 0x0A]);
        let long = HeaderPattern::new("long", [0xF0, 0x40, 0x00, 0x21, 0x00, 0x0A, 0x00, 0x02]);
        let frame = [0xF0, 0x40, 0x00, 0x21, 0x00, 0x0A, 0x00, 0x02, 0x01, SYSEX_END];

        let short_first = ResponseTable::new(vec![short.clone(), long.clone()]);
        assert_eq!(short_first.classify(&frame).map(HeaderPattern::label), Some("short"));

        let long_first = ResponseTable::new(vec![long, short]);
        assert_eq!(long_first.classify(&frame).map(HeaderPattern::label), Some("long"));
    }

    #[test]
    fn test_shortest() {
        assert_eq!(table().shortest(), 7);
        assert_eq!(ResponseTable::default().shortest(), 0);
    }

    proptest! {
        #[test]
        fn prop_pattern_plus_trailer_matches(trailer in proptest::collection::vec(any::<u8>(), 0..64)) {
            let pattern = HeaderPattern::new("p", [0xF0, 0x40, 0x03, 0x20, 0x00, 0x0A, 0x00, 0x04]);
            let mut frame = pattern.bytes().to_vec();
            frame.extend_from_slice(&trailer);
            prop_assert!(pattern.matches(&frame));
        }

        #[test]
        fn prop_any_differing_byte_breaks_match(index in 0usize..8, flip in 1u8..=255) {
            let pattern = HeaderPattern::new("p", [0xF0, 0x40, 0x03, 0x20, 0x00, 0x0A, 0x00, 0x04]);
            let mut frame = pattern.bytes().to_vec();
            frame[index] ^= flip;
            frame.push(SYSEX_END);
            prop_assert!(!pattern.matches(&frame));
        }

        #[test]
        fn prop_truncated_frames_never_match(len in 0usize..7, junk in any::<u8>()) {
            let table = table();
            let frame = table.patterns()[1].bytes()[..len].to_vec();
            prop_assert!(table.classify(&frame).is_none());
            // Arbitrary short garbage is equally harmless
            prop_assert!(table.classify(&vec![junk; len]).is_none());
        }
    }
}
