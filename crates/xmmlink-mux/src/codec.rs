use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::tag::TagId;

/// First tag header: id (4) + reserved (2) + sequence (2) + length (2) +
/// extra (2) + next (4) = 16 bytes.
pub const FIRST_HEADER_SIZE: usize = 16;

/// Header of every following tag: id (4) + length (2) + extra (2) + next (4).
pub const TAG_HEADER_SIZE: usize = 12;

/// Default maximum frame size: one device page.
pub const DEFAULT_MAX_FRAME: usize = 4096;

/// The frame length overlays the first tag's length and extra slots.
const FRAME_LENGTH_OFFSET: usize = 8;
const FIRST_SEQUENCE_OFFSET: usize = 6;
const FIRST_NEXT_OFFSET: usize = 12;
const MAX_TAG_LEN: usize = u16::MAX as usize;
const INITIAL_BUFFER_CAPACITY: usize = 2 * 1024;

/// A single decoded tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag identifier.
    pub id: TagId,
    /// The 16-bit "extra" field. Always 0 for the first tag, whose slot
    /// carries the upper half of the frame length.
    pub extra: u16,
    /// Byte offset of the tag header within the frame.
    pub offset: usize,
    /// Tag payload.
    pub payload: Bytes,
}

/// A decoded mux frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number carried by the first tag.
    pub sequence: u16,
    /// Tags in chain order.
    pub tags: Vec<Tag>,
    /// Total frame length as declared on the wire.
    pub wire_len: usize,
}

impl Frame {
    /// Decode a received frame.
    ///
    /// Pointers and lengths embedded in the frame are never trusted: every
    /// offset is checked against the declared frame length, which is itself
    /// checked against the buffer. The first tag has no length of its own,
    /// so its payload runs up to the next tag and includes any alignment
    /// padding that preceded it.
    pub fn parse(buf: &[u8]) -> Result<Frame> {
        let _ = slice_at(buf, 0, FIRST_HEADER_SIZE)?;

        let wire_len = read_u32_le(buf, FRAME_LENGTH_OFFSET)? as usize;
        if wire_len < FIRST_HEADER_SIZE || wire_len > buf.len() {
            return Err(FrameError::MalformedFrame {
                offset: FRAME_LENGTH_OFFSET,
                len: buf.len(),
                reason: "frame length out of range",
            });
        }
        let buf = &buf[..wire_len];

        let sequence = read_u16_le(buf, FIRST_SEQUENCE_OFFSET)?;
        let first_next = read_u32_le(buf, FIRST_NEXT_OFFSET)? as usize;
        let first_end = if first_next == 0 { wire_len } else { first_next };
        if first_end < FIRST_HEADER_SIZE {
            return Err(FrameError::MalformedFrame {
                offset: FIRST_NEXT_OFFSET,
                len: wire_len,
                reason: "forward pointer inside first tag header",
            });
        }

        let mut tags = vec![Tag {
            id: read_tag_id(buf, 0)?,
            extra: 0,
            offset: 0,
            payload: Bytes::copy_from_slice(slice_at(
                buf,
                FIRST_HEADER_SIZE,
                first_end - FIRST_HEADER_SIZE,
            )?),
        }];

        let mut next = first_next;
        let mut prev_end = first_end;
        while next != 0 {
            let offset = next;
            if offset < prev_end {
                return Err(FrameError::MalformedFrame {
                    offset,
                    len: wire_len,
                    reason: "forward pointer goes backwards",
                });
            }

            let id = read_tag_id(buf, offset)?;
            let tag_len = read_u16_le(buf, offset + 4)? as usize;
            let extra = read_u16_le(buf, offset + 6)?;
            let following = read_u32_le(buf, offset + 8)? as usize;

            if tag_len < TAG_HEADER_SIZE {
                return Err(FrameError::MalformedFrame {
                    offset: offset + 4,
                    len: wire_len,
                    reason: "tag length shorter than its header",
                });
            }

            let payload = slice_at(buf, offset + TAG_HEADER_SIZE, tag_len - TAG_HEADER_SIZE)?;
            tags.push(Tag {
                id,
                extra,
                offset,
                payload: Bytes::copy_from_slice(payload),
            });

            prev_end = offset + tag_len;
            next = following;
        }

        Ok(Frame {
            sequence,
            tags,
            wire_len,
        })
    }

    /// First tag with the given identifier.
    pub fn tag(&self, id: TagId) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == id)
    }

    /// The tag at `index`, which must carry identifier `id`.
    pub fn expect_tag(&self, index: usize, id: TagId) -> Result<&Tag> {
        let tag = self
            .tags
            .get(index)
            .ok_or(FrameError::MissingTag { expected: id })?;
        if tag.id != id {
            return Err(FrameError::UnexpectedTag {
                expected: id,
                found: tag.id,
                offset: tag.offset,
            });
        }
        Ok(tag)
    }
}

/// Incrementally builds a frame, patching forward pointers as tags arrive.
///
/// ```text
/// ┌──────┬──────┬─────┬───────────┬───────┬──────┬─────────┬─────┬──────┬─────┬───────┬──────┬─────────┐
/// │ ADBH │ 0000 │ seq │ frame len (4B LE)  │ next │ payload │ pad │ ADTH │ len │ extra │ next │ payload │
/// └──────┴──────┴─────┴───────────┴───────┴──────┴─────────┴─────┴──────┴─────┴───────┴──────┴─────────┘
/// ```
#[derive(Debug)]
pub struct FrameBuilder {
    buf: BytesMut,
    sequence: u16,
    /// Offset of the last tag's forward-pointer slot.
    next_slot: Option<usize>,
    /// Offset of the last tag's length slot.
    len_slot: Option<usize>,
    tags: usize,
}

impl FrameBuilder {
    /// Start a frame carrying sequence number `sequence`.
    pub fn new(sequence: u16) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            sequence,
            next_slot: None,
            len_slot: None,
            tags: 0,
        }
    }

    /// Start a frame whose first tag is already in place.
    ///
    /// The first tag's length is replaced by the frame length, so it has no
    /// size limit and cannot fail.
    pub fn with_first_tag(sequence: u16, id: TagId, payload: &[u8], extra: u16) -> Self {
        let mut builder = Self::new(sequence);
        builder.put_first_header(id, payload.len(), extra);
        builder.buf.put_slice(payload);
        builder.tags = 1;
        builder
    }

    fn put_first_header(&mut self, id: TagId, payload_len: usize, extra: u16) {
        let tag_len = FIRST_HEADER_SIZE + payload_len;
        self.buf.put_slice(id.as_bytes());
        self.buf.put_u16_le(0);
        self.buf.put_u16_le(self.sequence);
        self.buf.put_u16_le(u16::try_from(tag_len).unwrap_or(u16::MAX));
        self.buf.put_u16_le(extra);
        self.len_slot = Some(FRAME_LENGTH_OFFSET);
        self.next_slot = Some(FIRST_NEXT_OFFSET);
        self.buf.put_u32_le(0);
    }

    /// Append a tag to the frame.
    pub fn append_tag(&mut self, id: TagId, payload: &[u8], extra: u16) -> Result<&mut Self> {
        if self.tags == 0 {
            self.put_first_header(id, payload.len(), extra);
        } else {
            let tag_len = TAG_HEADER_SIZE + payload.len();
            if tag_len > MAX_TAG_LEN {
                return Err(FrameError::TagTooLarge {
                    size: payload.len(),
                    max: MAX_TAG_LEN - TAG_HEADER_SIZE,
                });
            }

            let pad = (4 - self.buf.len() % 4) % 4;
            self.buf.put_bytes(0, pad);

            let offset = self.buf.len();
            self.patch_next(offset)?;

            self.buf.put_slice(id.as_bytes());
            self.len_slot = Some(offset + 4);
            self.buf.put_u16_le(tag_len as u16);
            self.buf.put_u16_le(extra);
            self.next_slot = Some(offset + 8);
            self.buf.put_u32_le(0);
        }

        self.buf.put_slice(payload);
        self.tags += 1;
        Ok(self)
    }

    /// Grow the payload of the most recently appended tag.
    pub fn extend_last_tag(&mut self, data: &[u8]) -> Result<()> {
        let slot = self.len_slot.ok_or(FrameError::EmptyFrame)?;
        let current = u16::from_le_bytes([self.buf[slot], self.buf[slot + 1]]) as usize;
        let grown = current + data.len();

        let value = if self.tags == 1 {
            // Overwritten by the frame length in `finish`.
            u16::try_from(grown).unwrap_or(u16::MAX)
        } else {
            u16::try_from(grown).map_err(|_| FrameError::TagTooLarge {
                size: grown - TAG_HEADER_SIZE,
                max: MAX_TAG_LEN - TAG_HEADER_SIZE,
            })?
        };

        self.buf[slot..slot + 2].copy_from_slice(&value.to_le_bytes());
        self.buf.put_slice(data);
        Ok(())
    }

    /// Patch in the total length and return the encoded frame.
    pub fn finish(mut self) -> Result<Bytes> {
        if self.tags == 0 {
            return Err(FrameError::EmptyFrame);
        }
        let total = u32::try_from(self.buf.len()).map_err(|_| FrameError::FrameTooLarge {
            size: self.buf.len(),
            max: u32::MAX as usize,
        })?;
        self.buf[FRAME_LENGTH_OFFSET..FRAME_LENGTH_OFFSET + 4].copy_from_slice(&total.to_le_bytes());
        Ok(self.buf.freeze())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no tag has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.tags == 0
    }

    /// Number of tags appended so far.
    pub fn tag_count(&self) -> usize {
        self.tags
    }

    /// Sequence number this frame carries.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    fn patch_next(&mut self, offset: usize) -> Result<()> {
        let Some(slot) = self.next_slot else {
            return Ok(());
        };
        let pointer = u32::try_from(offset).map_err(|_| FrameError::FrameTooLarge {
            size: offset,
            max: u32::MAX as usize,
        })?;
        self.buf[slot..slot + 4].copy_from_slice(&pointer.to_le_bytes());
        Ok(())
    }
}

/// Configuration for the mux channel.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Largest frame the device accepts or delivers. Default: one page.
    pub max_frame_size: usize,
    /// Most packets coalesced into one outbound frame.
    pub max_packets_per_frame: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            max_packets_per_frame: DEFAULT_MAX_FRAME / 1024,
        }
    }
}

pub(crate) fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or(FrameError::MalformedFrame {
            offset,
            len: buf.len(),
            reason: "read past end of buffer",
        })
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice_at(buf, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice_at(buf, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_tag_id(buf: &[u8], offset: usize) -> Result<TagId> {
    let bytes = slice_at(buf, offset, 4)?;
    Ok(TagId::from_slice(bytes).unwrap_or(TagId([0; 4])))
}

#[cfg(test)]
pub(crate) fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// A data frame captured from the modem: one IPv6 router solicitation.
    const CAPTURED_FRAME: &str = "414442480000010088000000700000006000000000383AFFFE800000000000000000000000000001FE80000000000000D438C1FD077C00C38600248840005550000000000000000005010000000005DC03044040FFFFFFFFFFFFFFFF0000000020018004142021F50000000000000000414454481800000000000000000000001000000060000000";
    const CAPTURED_PACKET: &str = "6000000000383AFFFE800000000000000000000000000001FE80000000000000D438C1FD077C00C38600248840005550000000000000000005010000000005DC03044040FFFFFFFFFFFFFFFF0000000020018004142021F50000000000000000";

    fn trailer(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn reproduces_captured_frame() {
        let mut builder = FrameBuilder::new(1);
        builder
            .append_tag(TagId::ADBH, &unhex(CAPTURED_PACKET), 0)
            .unwrap()
            .append_tag(TagId::ADTH, &trailer(&[0, 0x10, 0x60]), 0)
            .unwrap();

        assert_eq!(builder.finish().unwrap().as_ref(), unhex(CAPTURED_FRAME).as_slice());
    }

    #[test]
    fn first_tag_constructor_matches_append() {
        let mut built = FrameBuilder::with_first_tag(1, TagId::ADBH, &unhex(CAPTURED_PACKET), 0);
        built
            .append_tag(TagId::ADTH, &trailer(&[0, 0x10, 0x60]), 0)
            .unwrap();
        assert_eq!(built.finish().unwrap().as_ref(), unhex(CAPTURED_FRAME).as_slice());

        let empty = FrameBuilder::with_first_tag(3, TagId::ADBH, &[], 0)
            .finish()
            .unwrap();
        let frame = Frame::parse(&empty).unwrap();
        assert_eq!(frame.sequence, 3);
        assert!(frame.tags[0].payload.is_empty());
    }

    #[test]
    fn forward_pointers_chain_aligned_tags() {
        let mut builder = FrameBuilder::new(7);
        builder
            .append_tag(TagId::ACBH, b"abc", 0)
            .unwrap()
            .append_tag(TagId::CMDH, b"12345", 9)
            .unwrap()
            .append_tag(TagId::ADTH, b"z", 0)
            .unwrap();
        let wire = builder.finish().unwrap();

        // first tag: 16 + 3 bytes, padded to 20
        assert_eq!(read_u32_le(&wire, FIRST_NEXT_OFFSET).unwrap(), 20);
        assert_eq!(&wire[20..24], b"CMDH");
        // second tag: 20 + 12 + 5 = 37, padded to 40
        assert_eq!(read_u32_le(&wire, 28).unwrap(), 40);
        assert_eq!(read_u16_le(&wire, 26).unwrap(), 9);
        assert_eq!(&wire[40..44], b"ADTH");
        assert_eq!(read_u32_le(&wire, 48).unwrap(), 0);
        assert_eq!(read_u32_le(&wire, FRAME_LENGTH_OFFSET).unwrap() as usize, wire.len());
        assert_eq!(wire.len(), 40 + 12 + 1);
    }

    #[test]
    fn parse_captured_frame() {
        let frame = Frame::parse(&unhex(CAPTURED_FRAME)).unwrap();

        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.wire_len, 0x88);
        assert_eq!(frame.tags.len(), 2);
        assert_eq!(frame.tags[0].id, TagId::ADBH);
        assert_eq!(frame.tags[0].payload.as_ref(), unhex(CAPTURED_PACKET).as_slice());
        assert_eq!(frame.tags[1].offset, 0x70);
        assert_eq!(frame.tags[1].payload.as_ref(), trailer(&[0, 0x10, 0x60]).as_slice());
    }

    #[test]
    fn first_payload_keeps_alignment_padding() {
        let mut builder = FrameBuilder::new(0);
        builder
            .append_tag(TagId::ACBH, b"xy", 0)
            .unwrap()
            .append_tag(TagId::CMDH, b"", 0)
            .unwrap();
        let frame = Frame::parse(&builder.finish().unwrap()).unwrap();

        assert_eq!(frame.tags[0].payload.as_ref(), b"xy\0\0");
        assert!(frame.tags[1].payload.is_empty());
    }

    #[test]
    fn extend_last_tag_updates_length() {
        let mut builder = FrameBuilder::new(0);
        builder.append_tag(TagId::ADBH, b"", 0).unwrap();
        builder.append_tag(TagId::ADTH, b"1234", 0).unwrap();
        builder.extend_last_tag(b"5678").unwrap();
        let frame = Frame::parse(&builder.finish().unwrap()).unwrap();

        assert_eq!(frame.tags[1].payload.as_ref(), b"12345678");
    }

    #[test]
    fn extend_without_tags_is_rejected() {
        let mut builder = FrameBuilder::new(0);
        assert!(matches!(
            builder.extend_last_tag(b"x"),
            Err(FrameError::EmptyFrame)
        ));
        assert!(builder.is_empty());
        assert!(matches!(builder.finish(), Err(FrameError::EmptyFrame)));
    }

    #[test]
    fn oversized_tag_rejected() {
        let mut builder = FrameBuilder::new(0);
        builder.append_tag(TagId::ADBH, b"", 0).unwrap();
        let big = vec![0u8; MAX_TAG_LEN];
        assert!(matches!(
            builder.append_tag(TagId::ADTH, &big, 0),
            Err(FrameError::TagTooLarge { .. })
        ));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let err = Frame::parse(&[0x41, 0x44, 0x42, 0x48, 0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { .. }));
    }

    #[test]
    fn frame_length_beyond_buffer_is_malformed() {
        let mut wire = unhex(CAPTURED_FRAME);
        wire.truncate(0x80);
        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::MalformedFrame { offset: 8, .. })
        ));
    }

    #[test]
    fn pointer_past_end_is_malformed() {
        let mut wire = unhex(CAPTURED_FRAME);
        wire[12..16].copy_from_slice(&0x84u32.to_le_bytes());
        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn backwards_pointer_is_malformed() {
        let mut builder = FrameBuilder::new(0);
        builder
            .append_tag(TagId::ACBH, b"", 0)
            .unwrap()
            .append_tag(TagId::CMDH, b"", 0)
            .unwrap();
        let mut wire = builder.finish().unwrap().to_vec();
        // point the second tag back at the first
        wire[24..28].copy_from_slice(&16u32.to_le_bytes());

        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::MalformedFrame {
                reason: "forward pointer goes backwards",
                ..
            })
        ));
    }

    #[test]
    fn short_tag_length_is_malformed() {
        let mut wire = unhex(CAPTURED_FRAME);
        wire[0x74..0x76].copy_from_slice(&4u16.to_le_bytes());
        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::MalformedFrame { .. })
        ));
    }

    #[test]
    fn expect_tag_reports_mismatch() {
        let frame = Frame::parse(&unhex(CAPTURED_FRAME)).unwrap();

        assert!(frame.expect_tag(1, TagId::ADTH).is_ok());
        assert!(matches!(
            frame.expect_tag(1, TagId::CMDH),
            Err(FrameError::UnexpectedTag { found, offset: 0x70, .. }) if found == TagId::ADTH
        ));
        assert!(matches!(
            frame.expect_tag(2, TagId::ADTH),
            Err(FrameError::MissingTag { expected }) if expected == TagId::ADTH
        ));
        assert!(frame.tag(TagId::ADTH).is_some());
        assert!(frame.tag(TagId::CMDH).is_none());
    }

    #[test]
    fn trailing_bytes_after_frame_are_ignored() {
        let mut wire = unhex(CAPTURED_FRAME);
        wire.extend_from_slice(&[0xEE; 32]);
        let frame = Frame::parse(&wire).unwrap();
        assert_eq!(frame.wire_len, 0x88);
        assert_eq!(frame.tags.len(), 2);
    }

    proptest! {
        #[test]
        fn parse_reproduces_appended_tags(
            sequence in any::<u16>(),
            first_id in any::<[u8; 4]>(),
            first_words in proptest::collection::vec(any::<[u8; 4]>(), 0..32),
            rest in proptest::collection::vec(
                (any::<[u8; 4]>(), proptest::collection::vec(any::<u8>(), 0..300)),
                0..6,
            ),
        ) {
            // whole words only: the first tag's padding is indistinguishable from data
            let first_payload = first_words.concat();
            let mut builder = FrameBuilder::new(sequence);
            builder.append_tag(TagId(first_id), &first_payload, 0).unwrap();
            for (id, payload) in &rest {
                builder.append_tag(TagId(*id), payload, 0).unwrap();
            }
            let wire = builder.finish().unwrap();
            let frame = Frame::parse(&wire).unwrap();

            prop_assert_eq!(frame.sequence, sequence);
            prop_assert_eq!(frame.wire_len, wire.len());
            prop_assert_eq!(frame.tags.len(), rest.len() + 1);
            prop_assert_eq!(frame.tags[0].id, TagId(first_id));
            prop_assert_eq!(frame.tags[0].payload.as_ref(), first_payload.as_slice());
            for (tag, (id, payload)) in frame.tags[1..].iter().zip(&rest) {
                prop_assert_eq!(tag.id, TagId(*id));
                prop_assert_eq!(tag.payload.as_ref(), payload.as_slice());
                prop_assert_eq!(tag.offset % 4, 0);
            }
        }
    }
}
