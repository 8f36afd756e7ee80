use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::error::{Result, RpcError};
use crate::message::{encode_message, DEFAULT_MAX_MESSAGE};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete messages to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    max_message: usize,
}

impl<T: Write> MessageWriter<T> {
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

    /// Encode and send one message (blocking).
    pub fn send(&mut self, command: u32, txid: Option<u8>, body: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_message(command, txid, body, &mut self.buf)?;
        if self.buf.len() > self.max_message {
            return Err(RpcError::MessageTooLarge {
                size: self.buf.len(),
                max: self.max_message,
            });
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(RpcError::ChannelClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(RpcError::ChannelClosed)
                }
                Err(err) => return Err(RpcError::Io(err)),
            }
        }

        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(RpcError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
