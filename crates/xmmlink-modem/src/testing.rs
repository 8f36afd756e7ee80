//! Scripted modem for exercising the bring-up calls over a socket pair.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use xmmlink_rpc::{
    async_id, strip_txid, BodyBuilder, CallId, MessageReader, RpcClient, RpcConfig,
    UnsolicitedId, SYNC_WORD,
};

pub(crate) const LONG: Duration = Duration::from_secs(5);

/// Body made of 4-byte integers.
pub(crate) fn ints(values: &[u32]) -> Bytes {
    let mut body = BodyBuilder::new();
    for &value in values {
        body.dword(value);
    }
    body.finish()
}

/// A call as seen by the modem, echoed ID removed.
pub(crate) struct Request {
    pub command: u32,
    pub word: u32,
    pub id: Option<u8>,
    pub body: Bytes,
}

pub(crate) struct FakeModem {
    reader: MessageReader<UnixStream>,
    writer: UnixStream,
}

impl FakeModem {
    pub fn recv(&mut self) -> Request {
        let message = self.reader.read_message().unwrap();
        let id = async_id(message.word);
        let body = match id {
            Some(_) => strip_txid(&message.body).unwrap().1,
            None => message.body,
        };
        Request {
            command: message.command,
            word: message.word,
            id,
            body,
        }
    }

    pub fn expect(&mut self, call: CallId) -> Request {
        let request = self.recv();
        assert_eq!(
            CallId::from_code(request.command),
            Some(call),
            "unexpected command {:#x}",
            request.command
        );
        request
    }

    pub fn reply_sync(&mut self, request: &Request, body: &[u8]) {
        assert_eq!(request.word, SYNC_WORD);
        self.send(request.command, SYNC_WORD, body);
    }

    /// Acknowledge, then complete with `result`.
    pub fn reply_async(&mut self, request: &Request, result: &[u8]) {
        let id = request.id.expect("async request");
        let mut echoed = vec![0x02, 0x04, 0, 0, 0, id];
        self.send(request.command, request.word, &echoed);
        echoed.extend_from_slice(result);
        self.send(request.command, request.word, &echoed);
    }

    pub fn push(&mut self, id: UnsolicitedId, body: &[u8]) {
        self.send(id.code(), 0, body);
    }

    fn send(&mut self, command: u32, word: u32, body: &[u8]) {
        let length = (16 + body.len()) as u32;
        let mut wire = BytesMut::new();
        wire.put_u32_le(length);
        wire.put_slice(&[0x02, 0x04]);
        wire.put_u32(length);
        wire.put_slice(&[0x02, 0x04]);
        wire.put_u32(command);
        wire.put_u32(word);
        wire.put_slice(body);
        self.writer.write_all(&wire).unwrap();
    }
}

pub(crate) fn pair() -> (RpcClient, FakeModem) {
    let (host, modem) = UnixStream::pair().unwrap();
    let client = RpcClient::new(host.try_clone().unwrap(), host, RpcConfig::default()).unwrap();
    let fake = FakeModem {
        reader: MessageReader::new(modem.try_clone().unwrap()),
        writer: modem,
    };
    (client, fake)
}
