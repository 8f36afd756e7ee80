//! Tagged values carried in command bodies.
//!
//! Wire format:
//! ```text
//! integer: 0x02 │ width (1..=4) │ value (width bytes, BE)
//! string:  0x55/0x56/0x57 │ valid length │ 02 04 count (BE) │ 02 04 padding (BE) │ data │ padding
//! ```
//!
//! The string marker selects the element width (1, 2 or 4 bytes). The valid
//! length counts elements and is either one byte below `0x80`, or `0x80 | n`
//! followed by `n` little-endian bytes. Count and padding are byte counts.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ValueError;

type Result<T> = std::result::Result<T, ValueError>;

/// Integer marker.
pub const INT_TAG: u8 = 0x02;
/// String marker for 1-byte elements.
pub const STRING_U8_TAG: u8 = 0x55;
/// String marker for 2-byte elements.
pub const STRING_U16_TAG: u8 = 0x56;
/// String marker for 4-byte elements.
pub const STRING_U32_TAG: u8 = 0x57;

const LONG_FORM: u8 = 0x80;

/// A decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(u32),
    String { width: u8, data: Bytes },
}

impl Value {
    pub fn as_int(&self) -> Option<u32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::String { .. } => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Int(_) => None,
            Value::String { data, .. } => Some(data),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v:#x}"),
            Value::String { width, data } => {
                write!(f, "s{width}:")?;
                for b in data.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Encode an integer of `width` bytes.
pub fn encode_int(width: u8, value: u32) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(2 + width as usize);
    encode_int_into(width, value, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode an integer of `width` bytes into `dst`.
pub fn encode_int_into(width: u8, value: u32, dst: &mut BytesMut) -> Result<()> {
    if !(1..=4).contains(&width) {
        return Err(ValueError::InvalidWidth(width));
    }
    if width < 4 && value >> (8 * u32::from(width)) != 0 {
        return Err(ValueError::IntegerOverflow { value, width });
    }
    dst.put_u8(INT_TAG);
    dst.put_u8(width);
    dst.put_slice(&value.to_be_bytes()[4 - width as usize..]);
    Ok(())
}

/// Encode `data` as a string of at most `max_length` elements of
/// `element_width` bytes. Unused elements are sent as zero padding.
pub fn encode_string(max_length: usize, element_width: u8, data: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(16 + max_length * element_width as usize);
    encode_string_into(max_length, element_width, data, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode a string into `dst`. See [`encode_string`].
pub fn encode_string_into(
    max_length: usize,
    element_width: u8,
    data: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let marker = string_marker(element_width)?;
    let width = element_width as usize;
    if data.len() % width != 0 {
        return Err(ValueError::UnalignedString {
            len: data.len(),
            width: element_width,
        });
    }

    let elements = data.len() / width;
    if elements > max_length {
        return Err(ValueError::ValueTooLong {
            len: elements,
            max: max_length,
        });
    }

    let too_long = || ValueError::ValueTooLong {
        len: elements,
        max: max_length,
    };
    let count = max_length.checked_mul(width).ok_or_else(too_long)?;
    let padding = count - data.len();
    let count_word = u32::try_from(count).map_err(|_| too_long())?;

    dst.reserve(16 + count);
    dst.put_u8(marker);
    put_length(elements, dst);
    encode_int_into(4, count_word, dst)?;
    encode_int_into(4, padding as u32, dst)?;
    dst.put_slice(data);
    dst.put_bytes(0, padding);
    Ok(())
}

fn string_marker(width: u8) -> Result<u8> {
    match width {
        1 => Ok(STRING_U8_TAG),
        2 => Ok(STRING_U16_TAG),
        4 => Ok(STRING_U32_TAG),
        other => Err(ValueError::InvalidWidth(other)),
    }
}

fn put_length(len: usize, dst: &mut BytesMut) {
    if len < LONG_FORM as usize {
        dst.put_u8(len as u8);
        return;
    }
    let le = (len as u64).to_le_bytes();
    let n = 8 - (len as u64).leading_zeros() as usize / 8;
    dst.put_u8(LONG_FORM | n as u8);
    dst.put_slice(&le[..n]);
}

/// Sequential reader over an encoded body.
#[derive(Debug, Clone)]
pub struct ValueCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ValueCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode an integer value.
    pub fn decode_int(&mut self) -> Result<u32> {
        let offset = self.pos;
        let tag = self.take_u8()?;
        if tag != INT_TAG {
            return Err(self.tag_error("integer", tag, offset));
        }
        let width = self.take_u8()?;
        if !(1..=4).contains(&width) {
            return Err(ValueError::InvalidWidth(width));
        }
        let bytes = self.take(width as usize)?;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Decode a string value and return its valid bytes.
    pub fn decode_string(&mut self) -> Result<Bytes> {
        self.decode_string_with_width().map(|(_, data)| data)
    }

    /// Decode a string value, returning its element width and valid bytes.
    pub fn decode_string_with_width(&mut self) -> Result<(u8, Bytes)> {
        let offset = self.pos;
        let tag = self.take_u8()?;
        let width = match tag {
            STRING_U8_TAG => 1u8,
            STRING_U16_TAG => 2,
            STRING_U32_TAG => 4,
            other => return Err(self.tag_error("string", other, offset)),
        };

        let valid = self.read_length()?.saturating_mul(width as usize);
        let count = self.decode_int()? as usize;
        let padding = self.decode_int()? as usize;
        if count != 0 && count != valid.saturating_add(padding) {
            return Err(ValueError::LengthMismatch {
                count,
                valid,
                padding,
            });
        }

        let data = Bytes::copy_from_slice(self.take(valid)?);
        self.take(padding)?;
        Ok((width, data))
    }

    /// Decode whatever value comes next.
    pub fn decode_value(&mut self) -> Result<Value> {
        match self.peek_u8()? {
            INT_TAG => self.decode_int().map(Value::Int),
            STRING_U8_TAG | STRING_U16_TAG | STRING_U32_TAG => self
                .decode_string_with_width()
                .map(|(width, data)| Value::String { width, data }),
            tag => Err(ValueError::UnknownValueTag {
                tag,
                offset: self.pos,
            }),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = self.take_u8()?;
        if first & LONG_FORM == 0 {
            return Ok(first as usize);
        }
        let n = first & 0x0f;
        if n == 0 || n > 4 {
            return Err(ValueError::InvalidWidth(n));
        }
        let bytes = self.take(n as usize)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }

    fn tag_error(&self, expected: &'static str, tag: u8, offset: usize) -> ValueError {
        match tag {
            INT_TAG | STRING_U8_TAG | STRING_U16_TAG | STRING_U32_TAG => {
                ValueError::UnexpectedValue {
                    expected,
                    tag,
                    offset,
                }
            }
            _ => ValueError::UnknownValueTag { tag, offset },
        }
    }

    fn peek_u8(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(ValueError::TruncatedValue {
                offset: self.pos,
                needed: 1,
                available: 0,
            })
    }

    fn take_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(ValueError::TruncatedValue {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Decode a body of unknown layout into its values.
pub fn decode_unknown(buf: &[u8]) -> Result<Vec<Value>> {
    let mut cursor = ValueCursor::new(buf);
    let mut values = Vec::new();
    while !cursor.is_empty() {
        values.push(cursor.decode_value()?);
    }
    Ok(values)
}

/// Builds a command body from a fixed sequence of fields.
#[derive(Debug, Default)]
pub struct BodyBuilder {
    buf: BytesMut,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-byte integer.
    pub fn byte(&mut self, value: u8) -> &mut Self {
        self.put_int(1, u32::from(value))
    }

    /// 2-byte integer.
    pub fn word(&mut self, value: u16) -> &mut Self {
        self.put_int(2, u32::from(value))
    }

    /// 4-byte integer.
    pub fn dword(&mut self, value: u32) -> &mut Self {
        self.put_int(4, value)
    }

    /// String of at most `max_length` elements.
    pub fn string(&mut self, max_length: usize, element_width: u8, data: &[u8]) -> Result<&mut Self> {
        encode_string_into(max_length, element_width, data, &mut self.buf)?;
        Ok(self)
    }

    /// Byte string of `len` zero bytes, all valid.
    pub fn zeros(&mut self, len: usize) -> &mut Self {
        self.buf.put_u8(STRING_U8_TAG);
        put_length(len, &mut self.buf);
        self.put_int(4, len as u32);
        self.put_int(4, 0);
        self.buf.put_bytes(0, len);
        self
    }

    /// Pre-encoded bytes, copied verbatim.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn put_int(&mut self, width: usize, value: u32) -> &mut Self {
        self.buf.put_u8(INT_TAG);
        self.buf.put_u8(width as u8);
        self.buf.put_slice(&value.to_be_bytes()[4 - width..]);
        self
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn int_encodings() {
        assert_eq!(encode_int(1, 0x7f).unwrap().as_ref(), &[0x02, 0x01, 0x7f]);
        assert_eq!(encode_int(2, 0x1234).unwrap().as_ref(), &[0x02, 0x02, 0x12, 0x34]);
        assert_eq!(
            encode_int(4, 0xdead_beef).unwrap().as_ref(),
            &[0x02, 0x04, 0xde, 0xad, 0xbe, 0xef]
        );
    }

    #[test]
    fn int_width_and_range_checked() {
        assert!(matches!(encode_int(0, 1), Err(ValueError::InvalidWidth(0))));
        assert!(matches!(encode_int(5, 1), Err(ValueError::InvalidWidth(5))));
        assert!(matches!(
            encode_int(1, 0x100),
            Err(ValueError::IntegerOverflow { value: 0x100, width: 1 })
        ));
    }

    #[test]
    fn int_decodes_any_width() {
        let mut cursor = ValueCursor::new(&[0x02, 0x03, 0x01, 0x02, 0x03, 0x02, 0x01, 0xff]);
        assert_eq!(cursor.decode_int().unwrap(), 0x010203);
        assert_eq!(cursor.decode_int().unwrap(), 0xff);
        assert!(cursor.is_empty());
    }

    #[test]
    fn short_string_layout() {
        let wire = encode_string(4, 1, b"ab").unwrap();
        assert_eq!(
            wire.as_ref(),
            &[
                0x55, 0x02, // marker, valid
                0x02, 0x04, 0, 0, 0, 4, // count
                0x02, 0x04, 0, 0, 0, 2, // padding
                b'a', b'b', 0, 0,
            ]
        );
    }

    #[test]
    fn wide_string_counts_bytes() {
        let wire = encode_string(3, 2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(wire[0], STRING_U16_TAG);
        assert_eq!(wire[1], 2);
        assert_eq!(&wire[2..8], &[0x02, 0x04, 0, 0, 0, 6]);
        assert_eq!(&wire[8..14], &[0x02, 0x04, 0, 0, 0, 2]);
        assert_eq!(&wire[14..], &[1, 2, 3, 4, 0, 0]);

        let mut cursor = ValueCursor::new(&wire);
        assert_eq!(
            cursor.decode_string_with_width().unwrap(),
            (2, Bytes::from_static(&[1, 2, 3, 4]))
        );
        assert!(cursor.is_empty());
    }

    #[test]
    fn long_form_length() {
        let data = vec![0xaa; 200];
        let wire = encode_string(300, 1, &data).unwrap();
        assert_eq!(&wire[..3], &[0x55, 0x81, 200]);

        let mut cursor = ValueCursor::new(&wire);
        assert_eq!(cursor.decode_string().unwrap().as_ref(), data.as_slice());
        assert!(cursor.is_empty());

        let data = vec![0x11; 0x1234];
        let wire = encode_string(0x1234, 1, &data).unwrap();
        assert_eq!(&wire[..4], &[0x55, 0x82, 0x34, 0x12]);
        assert_eq!(decode_unknown(&wire).unwrap()[0].as_bytes().unwrap().len(), 0x1234);
    }

    #[test]
    fn string_limits() {
        assert!(matches!(
            encode_string(2, 1, b"abc"),
            Err(ValueError::ValueTooLong { len: 3, max: 2 })
        ));
        assert!(matches!(
            encode_string(4, 4, &[1, 2, 3]),
            Err(ValueError::UnalignedString { len: 3, width: 4 })
        ));
        assert!(matches!(
            encode_string(4, 3, b"abc"),
            Err(ValueError::InvalidWidth(3))
        ));
    }

    #[test]
    fn declared_count_must_match() {
        let mut wire = encode_string(4, 1, b"ab").unwrap().to_vec();
        wire[7] = 5;
        assert!(matches!(
            ValueCursor::new(&wire).decode_string(),
            Err(ValueError::LengthMismatch {
                count: 5,
                valid: 2,
                padding: 2
            })
        ));
    }

    #[test]
    fn zero_count_skips_check_but_not_padding() {
        let mut wire = encode_string(4, 1, b"ab").unwrap().to_vec();
        wire[7] = 0;
        wire.extend_from_slice(&[0x02, 0x01, 0x09]);

        let mut cursor = ValueCursor::new(&wire);
        assert_eq!(cursor.decode_string().unwrap().as_ref(), b"ab");
        assert_eq!(cursor.decode_int().unwrap(), 9);
    }

    #[test]
    fn truncated_values() {
        assert!(matches!(
            ValueCursor::new(&[0x02, 0x04, 0x00]).decode_int(),
            Err(ValueError::TruncatedValue {
                offset: 2,
                needed: 4,
                available: 1
            })
        ));

        let wire = encode_string(8, 1, b"abc").unwrap();
        assert!(matches!(
            ValueCursor::new(&wire[..wire.len() - 1]).decode_string(),
            Err(ValueError::TruncatedValue { .. })
        ));
        assert!(matches!(
            ValueCursor::new(&[]).decode_int(),
            Err(ValueError::TruncatedValue { .. })
        ));
    }

    #[test]
    fn tag_errors() {
        assert!(matches!(
            decode_unknown(&[0x02, 0x01, 0x00, 0x31]),
            Err(ValueError::UnknownValueTag { tag: 0x31, offset: 3 })
        ));
        let wire = encode_string(1, 1, b"x").unwrap();
        assert!(matches!(
            ValueCursor::new(&wire).decode_int(),
            Err(ValueError::UnexpectedValue {
                expected: "integer",
                ..
            })
        ));
        assert!(matches!(
            ValueCursor::new(&[0x02, 0x00]).decode_int(),
            Err(ValueError::InvalidWidth(0))
        ));
    }

    #[test]
    fn decode_unknown_mixed_body() {
        let body = BodyBuilder::new()
            .byte(1)
            .string(4, 4, &[0, 0, 0, 7])
            .unwrap()
            .dword(0xffff_ffff)
            .zeros(3)
            .finish();

        let values = decode_unknown(&body).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Int(1),
                Value::String {
                    width: 4,
                    data: Bytes::from_static(&[0, 0, 0, 7])
                },
                Value::Int(0xffff_ffff),
                Value::String {
                    width: 1,
                    data: Bytes::from_static(&[0, 0, 0])
                },
            ]
        );
        assert_eq!(values[2].to_string(), "0xffffffff");
        assert_eq!(values[1].to_string(), "s4:00000007");
    }

    #[test]
    fn body_builder_matches_free_functions() {
        let mut builder = BodyBuilder::new();
        builder.byte(0).word(0xffff).dword(5);
        assert_eq!(builder.len(), 3 + 4 + 6);

        let mut expected = BytesMut::new();
        encode_int_into(1, 0, &mut expected).unwrap();
        encode_int_into(2, 0xffff, &mut expected).unwrap();
        encode_int_into(4, 5, &mut expected).unwrap();
        assert_eq!(builder.finish(), expected.freeze());
        assert!(builder.is_empty());
    }

    proptest! {
        #[test]
        fn string_round_trip(
            width in prop::sample::select(vec![1u8, 2, 4]),
            elements in proptest::collection::vec(any::<u32>(), 0..300),
            spare in 0usize..40,
        ) {
            let w = width as usize;
            let data: Vec<u8> = elements
                .iter()
                .flat_map(|e| e.to_le_bytes()[..w].to_vec())
                .collect();
            let max = elements.len() + spare;

            let wire = encode_string(max, width, &data).unwrap();
            let mut cursor = ValueCursor::new(&wire);
            let (got_width, got) = cursor.decode_string_with_width().unwrap();

            prop_assert_eq!(got_width, width);
            prop_assert_eq!(got.as_ref(), data.as_slice());
            prop_assert!(cursor.is_empty());
        }

        #[test]
        fn int_round_trip(width in 1u8..=4, raw in any::<u32>()) {
            let value = if width == 4 { raw } else { raw & ((1u32 << (8 * width)) - 1) };
            let wire = encode_int(width, value).unwrap();
            prop_assert_eq!(ValueCursor::new(&wire).decode_int().unwrap(), value);
        }
    }
}
