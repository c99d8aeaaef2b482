//! Sequential little-endian reader over an event payload
//!
//! Fields carry no length prefix; their order is the contract. Every read
//! returns `None` once the buffer is exhausted so that trailing fields added by
//! newer runtimes read as absent on older ones.

pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left after the cursor
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes: [u8; N] = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }

    /// Booleans are serialized as 32-bit integers
    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_u32().map(|v| v != 0)
    }

    /// UTF-16LE string up to (and consuming) a null character. A string cut
    /// off by the end of the buffer returns what was read.
    pub fn read_utf16_string(&mut self) -> Option<String> {
        if self.remaining() < 2 {
            return None;
        }
        let mut units = Vec::new();
        while let Some(bytes) = self.take::<2>() {
            let unit = u16::from_le_bytes(bytes);
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Some(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Test helper mirroring the producer side of the grammar
    #[derive(Default)]
    pub(crate) struct PayloadBuilder(pub Vec<u8>);

    impl PayloadBuilder {
        pub(crate) fn u8(mut self, v: u8) -> Self {
            self.0.push(v);
            self
        }

        pub(crate) fn u32(mut self, v: u32) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub(crate) fn i64(mut self, v: i64) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub(crate) fn f64(mut self, v: f64) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub(crate) fn str(mut self, s: &str) -> Self {
            for unit in s.encode_utf16() {
                self.0.extend_from_slice(&unit.to_le_bytes());
            }
            self.0.extend_from_slice(&[0, 0]);
            self
        }
    }

    #[test]
    fn test_reads_fields_in_order() {
        let data = PayloadBuilder::default().str("https").u32(443).u8(2).i64(-5).f64(1.5).0;
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_utf16_string().as_deref(), Some("https"));
        assert_eq!(reader.read_u32(), Some(443));
        assert_eq!(reader.read_u8(), Some(2));
        assert_eq!(reader.read_i64(), Some(-5));
        assert_eq!(reader.read_f64(), Some(1.5));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_buffer_reads_as_absent() {
        let data = [1u8, 2, 3];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_u32(), None);
        // failed read does not consume
        assert_eq!(reader.read_u8(), Some(1));
        assert_eq!(reader.read_i64(), None);
        assert_eq!(reader.read_utf16_string().as_deref(), Some("\u{0302}"));
        assert_eq!(reader.read_utf16_string(), None);
    }

    #[test]
    fn test_unterminated_string_returns_prefix() {
        let data = [b'h', 0, b'i', 0];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_utf16_string().as_deref(), Some("hi"));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_empty_string_is_present() {
        let data = PayloadBuilder::default().str("").u32(7).0;
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_utf16_string().as_deref(), Some(""));
        assert_eq!(reader.read_bool(), Some(true));
    }
}
