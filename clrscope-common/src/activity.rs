//! # Activity Path Codec
//!
//! The runtime tags nested logical operations (an HTTP request, the DNS lookup it
//! triggers, the socket connect after that) with 128-bit activity identifiers. When
//! the producer builds them as *activity paths*, the identifier encodes the whole
//! chain of ancestors as a list of small integers:
//!
//! ```text
//!  byte  0 ............................ 11 | 12 .......... 15
//!       [ nibble-coded segment list, 0-end ] [ checksum (u32 LE) ]
//!
//!  nibble 1..=10   immediate value
//!  nibble 11       prefix: next value is an overflow segment ('$')
//!  nibble 12..=15  value follows in 1..=4 little-endian bytes
//!
//!  checksum = (w0 + w1 + w2 + 0x599D99AD) ^ process_id
//! ```
//!
//! A multi-byte length nibble that lands in the high half of a byte leaves the low
//! half free. For values below 4096 the encoder stores the top four bits there and
//! still writes the full byte count, so values in `256..4096` are followed by one
//! spare zero byte. [`decode`] skips that byte.
//!
//! Identifiers that fail the checksum are opaque random values; callers fall back
//! to the GUID string form ([`activity_key`]).

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};
use core::str::FromStr;

const CHECKSUM_SEED: u32 = 0x599D_99AD;

/// Bytes available for the segment list
const PATH_BYTES: usize = 12;

/// Returned by the segment writer when a value does not fit
const NO_ROOM: usize = PATH_BYTES + 1;

const NIBBLE_END: u8 = 0;
const NIBBLE_LAST_IMMEDIATE: u8 = 10;
const NIBBLE_PREFIX: u8 = 11;
const NIBBLE_MULTI_BYTE_1: u8 = 12;
const NIBBLE_MULTI_BYTE_4: u8 = 15;

// ============================================================================
// ActivityId
// ============================================================================

/// Opaque 128-bit activity identifier, stored in memory (wire) byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ActivityId(pub [u8; 16]);

impl ActivityId {
    /// The all-zero identifier (no activity)
    pub const NIL: ActivityId = ActivityId([0; 16]);

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        ActivityId(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 16]
    }

    fn word(&self, index: usize) -> u32 {
        let b = &self.0[index * 4..index * 4 + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Checksum of the segment bytes, before the process id is folded in
    fn checksum_base(&self) -> u32 {
        self.word(0)
            .wrapping_add(self.word(1))
            .wrapping_add(self.word(2))
            .wrapping_add(CHECKSUM_SEED)
    }
}

/// GUID string form: the first three groups are little-endian fields
impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

impl fmt::Debug for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivityId({self})")
    }
}

/// Error returned when a string is not a GUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseActivityIdError;

impl fmt::Display for ParseActivityIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected a GUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")
    }
}

impl FromStr for ActivityId {
    type Err = ParseActivityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('{').and_then(|t| t.strip_suffix('}')).unwrap_or(s);
        let text = s.as_bytes();
        if text.len() != 36 || [8, 13, 18, 23].iter().any(|&i| text[i] != b'-') {
            return Err(ParseActivityIdError);
        }

        // Textual order first, then swap the little-endian groups
        let mut textual = [0u8; 16];
        let mut digits = 0usize;
        for &c in text.iter().filter(|&&c| c != b'-') {
            let nibble = char::from(c).to_digit(16).ok_or(ParseActivityIdError)?;
            if digits >= 32 {
                return Err(ParseActivityIdError);
            }
            #[allow(clippy::cast_possible_truncation)]
            let nibble = nibble as u8;
            textual[digits / 2] |= if digits % 2 == 0 { nibble << 4 } else { nibble };
            digits += 1;
        }
        if digits != 32 {
            return Err(ParseActivityIdError);
        }

        let mut bytes = textual;
        bytes[0..4].reverse();
        bytes[4..6].reverse();
        bytes[6..8].reverse();
        Ok(ActivityId(bytes))
    }
}

#[cfg(feature = "user")]
mod serde_impl {
    use super::ActivityId;
    use core::fmt;
    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for ActivityId {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    struct ActivityIdVisitor;

    impl Visitor<'_> for ActivityIdVisitor {
        type Value = ActivityId;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an activity id in GUID form")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<ActivityId, E> {
            v.parse().map_err(E::custom)
        }
    }

    impl<'de> Deserialize<'de> for ActivityId {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_str(ActivityIdVisitor)
        }
    }
}

// ============================================================================
// ActivityPath
// ============================================================================

/// One element of an activity path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub value: u32,
    /// Overflow segments render with `$` instead of `/`
    pub overflow: bool,
}

impl Segment {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Segment { value, overflow: false }
    }

    #[must_use]
    pub const fn overflow(value: u32) -> Self {
        Segment { value, overflow: true }
    }
}

/// Decoded activity path, most significant (outermost) segment first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivityPath {
    /// Process id folded into the checksum, if any
    pub process_id: Option<u32>,
    pub segments: Vec<Segment>,
}

impl ActivityPath {
    /// Path of plain (non-overflow) segments
    #[must_use]
    pub fn from_values(values: &[u32]) -> Self {
        let segments = values.iter().copied().map(Segment::new).collect();
        ActivityPath { process_id: None, segments }
    }

    /// Segment values without the overflow markers
    #[must_use]
    pub fn values(&self) -> Vec<u32> {
        self.segments.iter().map(|s| s.value).collect()
    }

    /// The enclosing activity, or `None` for an empty path
    #[must_use]
    pub fn parent(&self) -> Option<ActivityPath> {
        let (_, rest) = self.segments.split_last()?;
        Some(ActivityPath { process_id: self.process_id, segments: rest.to_vec() })
    }

    /// Encode into an identifier; `None` when the segments need more than 12 bytes
    #[must_use]
    pub fn encode(&self) -> Option<ActivityId> {
        let mut bytes = [0u8; 16];
        let mut pos = 0;
        for segment in &self.segments {
            pos = add_segment(&mut bytes, pos, segment.value, segment.overflow);
            if pos > PATH_BYTES {
                return None;
            }
        }

        let mut id = ActivityId(bytes);
        let checksum = id.checksum_base() ^ self.process_id.unwrap_or(0);
        id.0[PATH_BYTES..].copy_from_slice(&checksum.to_le_bytes());
        Some(id)
    }

    /// Render as `1/2/3` (`$` before overflow segments), optionally prefixed with `#pid/`
    #[must_use]
    pub fn render(&self, include_process_id: bool) -> String {
        let mut out = String::new();
        if include_process_id {
            if let Some(pid) = self.process_id {
                let _ = write!(out, "#{pid}/");
            }
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.overflow {
                out.push('$');
            } else if i > 0 {
                out.push('/');
            }
            let _ = write!(out, "{}", segment.value);
        }
        out
    }
}

impl fmt::Display for ActivityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Write `value` into the high half of `bytes[*pos]` if that byte is empty,
/// otherwise into its low half and move to the next byte.
fn write_nibble(bytes: &mut [u8; 16], pos: &mut usize, value: u8) {
    if bytes[*pos] == 0 {
        bytes[*pos] = value << 4;
    } else {
        bytes[*pos] |= value;
        *pos += 1;
    }
}

/// Append one segment starting at byte `pos`. Returns the next write position,
/// which exceeds [`PATH_BYTES`] when the segment did not fit.
fn add_segment(bytes: &mut [u8; 16], mut pos: usize, mut value: u32, overflow: bool) -> usize {
    if pos >= PATH_BYTES {
        return NO_ROOM;
    }

    if (1..=u32::from(NIBBLE_LAST_IMMEDIATE)).contains(&value) && !overflow {
        #[allow(clippy::cast_possible_truncation)]
        let immediate = value as u8;
        write_nibble(bytes, &mut pos, immediate);
        return pos;
    }

    let mut len: u8 = match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    };

    if overflow {
        if pos + 2 >= PATH_BYTES {
            return NO_ROOM;
        }
        write_nibble(bytes, &mut pos, NIBBLE_PREFIX);
    }
    write_nibble(bytes, &mut pos, NIBBLE_MULTI_BYTE_1 + (len - 1));

    // Length nibble went into a high half: the low half is free
    if pos < PATH_BYTES && bytes[pos] != 0 {
        if value < 4096 {
            #[allow(clippy::cast_possible_truncation)]
            let high_bits = (value >> 8) as u8;
            bytes[pos] = (NIBBLE_MULTI_BYTE_1 << 4) | high_bits;
            value &= 0xFF;
        }
        pos += 1;
    }

    while len > 0 {
        if pos >= PATH_BYTES {
            return NO_ROOM;
        }
        #[allow(clippy::cast_possible_truncation)]
        let low = value as u8;
        bytes[pos] = low;
        pos += 1;
        value >>= 8;
        len -= 1;
    }
    pos
}

/// Encode plain segments with no embedded process id
#[must_use]
pub fn encode(values: &[u32]) -> Option<ActivityId> {
    ActivityPath::from_values(values).encode()
}

/// Encode plain segments and fold `process_id` into the checksum
#[must_use]
pub fn encode_with_process_id(values: &[u32], process_id: u32) -> Option<ActivityId> {
    let mut path = ActivityPath::from_values(values);
    path.process_id = (process_id != 0).then_some(process_id);
    path.encode()
}

// ============================================================================
// Decoder
// ============================================================================

/// Position of the next nibble: byte index plus which half
struct NibbleCursor<'a> {
    bytes: &'a [u8; 16],
    pos: usize,
    low_half: bool,
}

impl NibbleCursor<'_> {
    fn peek(&self) -> Option<u8> {
        if self.pos >= PATH_BYTES {
            return None;
        }
        let byte = self.bytes[self.pos];
        Some(if self.low_half { byte & 0x0F } else { byte >> 4 })
    }

    fn advance(&mut self) {
        if self.low_half {
            self.pos += 1;
            self.low_half = false;
        } else {
            self.low_half = true;
        }
    }

    /// Consume a length nibble and its byte run
    fn read_multi_byte(&mut self, length_nibble: u8) -> Option<u32> {
        let byte_count = usize::from(length_nibble - NIBBLE_MULTI_BYTE_1) + 1;
        let mut value = if self.low_half { 0 } else { u32::from(self.bytes[self.pos] & 0x0F) };
        self.pos += 1;
        self.low_half = false;

        if self.pos + byte_count > PATH_BYTES {
            return None;
        }
        for i in (0..byte_count).rev() {
            value = (value << 8) | u32::from(self.bytes[self.pos + i]);
        }
        self.pos += byte_count;

        // Spare zero byte after a nibble-plus-one-byte value in 256..4096
        if (0x100..=0xFFF).contains(&value)
            && self.pos + 1 < PATH_BYTES
            && self.bytes[self.pos] == 0
            && self.bytes[self.pos + 1] != 0
        {
            self.pos += 1;
        }
        Some(value)
    }
}

/// Checksum test. With `expected_process_id == 0` only the high 12 bits of
/// the checksum word are compared, which also admits ids carrying a small pid.
#[must_use]
pub fn is_path_shaped(id: &ActivityId, expected_process_id: u32) -> bool {
    let base = id.checksum_base();
    let stored = id.word(3);
    if expected_process_id == 0 {
        return (stored & 0xFFF0_0000) == (base & 0xFFF0_0000);
    }
    stored == base ^ expected_process_id || stored == base
}

/// Decode an identifier into its path, or `None` if it is not an activity path
#[must_use]
pub fn decode(id: &ActivityId) -> Option<ActivityPath> {
    if !is_path_shaped(id, 0) {
        return None;
    }

    let mut cursor = NibbleCursor { bytes: &id.0, pos: 0, low_half: false };
    let mut segments = Vec::new();

    while let Some(nibble) = cursor.peek() {
        match nibble {
            NIBBLE_END => break,
            1..=NIBBLE_LAST_IMMEDIATE => {
                segments.push(Segment::new(u32::from(nibble)));
                cursor.advance();
            }
            NIBBLE_PREFIX => {
                cursor.advance();
                let length = cursor.peek()?;
                if !(NIBBLE_MULTI_BYTE_1..=NIBBLE_MULTI_BYTE_4).contains(&length) {
                    return None;
                }
                segments.push(Segment::overflow(cursor.read_multi_byte(length)?));
            }
            _ => segments.push(Segment::new(cursor.read_multi_byte(nibble)?)),
        }
    }

    let process_id = id.word(3) ^ id.checksum_base();
    Some(ActivityPath { process_id: (process_id != 0).then_some(process_id), segments })
}

/// Correlation key of the activity itself: the rendered path, or the GUID string
#[must_use]
pub fn activity_key(id: &ActivityId) -> String {
    match decode(id) {
        Some(path) => path.render(false),
        None => {
            let mut out = String::new();
            let _ = write!(out, "{id}");
            out
        }
    }
}

/// Correlation key of the enclosing activity (the path minus its last segment)
#[must_use]
pub fn parent_key(id: &ActivityId) -> Option<String> {
    decode(id)?.parent().map(|p| p.render(false))
}
