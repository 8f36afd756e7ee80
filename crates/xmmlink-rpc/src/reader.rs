use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::error::{Result, RpcError};
use crate::message::{decode_message, Message, DEFAULT_MAX_MESSAGE};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally, so it works over device nodes (one
/// message per read) and byte streams alike.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    max_message: usize,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_message(inner, DEFAULT_MAX_MESSAGE)
    }

    pub fn with_max_message(inner: T, max_message: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_message,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(RpcError::ChannelClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.max_message)? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(RpcError::Io(err)),
            };

            if read == 0 {
                return Err(RpcError::ChannelClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drop any buffered partial message.
    pub fn discard_buffered(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::message::{encode_message, SYNC_WORD};

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn reads_messages_in_order() {
        let mut wire = BytesMut::new();
        encode_message(0x10, None, b"one", &mut wire).unwrap();
        encode_message(0x11, Some(4), b"two", &mut wire).unwrap();

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let first = reader.read_message().unwrap();
        let second = reader.read_message().unwrap();

        assert_eq!((first.command, first.word), (0x10, SYNC_WORD));
        assert_eq!(first.body.as_ref(), b"one");
        assert_eq!(second.command, 0x11);
        assert!(matches!(
            reader.read_message(),
            Err(RpcError::ChannelClosed)
        ));
    }

    #[test]
    fn partial_reads_are_reassembled() {
        let mut wire = BytesMut::new();
        encode_message(0x10, None, b"slow", &mut wire).unwrap();

        let mut reader = MessageReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });
        assert_eq!(reader.read_message().unwrap().body.as_ref(), b"slow");
    }

    #[test]
    fn closed_mid_message() {
        let mut wire = BytesMut::new();
        encode_message(0x10, None, b"truncated", &mut wire).unwrap();
        wire.truncate(wire.len() - 3);

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        assert!(matches!(
            reader.read_message(),
            Err(RpcError::ChannelClosed)
        ));
        assert_eq!(reader.discard_buffered(), wire.len());
    }

    #[test]
    fn oversized_message_rejected() {
        let mut wire = BytesMut::new();
        encode_message(0x10, None, &[0u8; 256], &mut wire).unwrap();

        let mut reader = MessageReader::with_max_message(Cursor::new(wire.to_vec()), 64);
        assert!(matches!(
            reader.read_message(),
            Err(RpcError::MessageTooLarge { max: 64, .. })
        ));
    }
}
