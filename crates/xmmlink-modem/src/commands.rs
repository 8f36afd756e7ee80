//! Request bodies and reply accessors for the bring-up calls.
//!
//! The modem expects fixed layouts: every field is present even when unused,
//! and strings are sent at their full declared size.

use bytes::{BufMut, Bytes, BytesMut};
use xmmlink_rpc::{decode_unknown, BodyBuilder, CallId, Value, ValueError};

use crate::error::{ModemError, Result};

/// Longest APN the attach configuration can carry.
pub const APN_MAX_LEN: usize = 101;

/// Trailing value dropped from the connect reply before it is echoed back.
const CONNECT_TRAILER_LEN: usize = 6;

/// Terminator appended to the connect-setup body.
const SETUP_TRAILER: [u8; 6] = [0x02, 0x04, 0, 0, 0, 0];

/// Transaction tag the firmware expects in mode-set requests.
const MODE_SET_TAG: u32 = 15;

/// Radio on.
pub const MODE_ONLINE: u32 = 1;

/// Mode-set request: `L 0, L tag, L mode`.
pub fn mode_set_body(mode: u32) -> Bytes {
    BodyBuilder::new().dword(0).dword(MODE_SET_TAG).dword(mode).finish()
}

/// Attach configuration for `apn`.
///
/// The APN is written twice, once for the attach context and once for the
/// default bearer, each time as a zero-filled field of [`APN_MAX_LEN`] bytes.
pub fn apn_config_body(apn: &str) -> Result<Bytes> {
    if !apn.is_ascii() {
        return Err(ModemError::InvalidApn(format!("{apn:?} is not ASCII")));
    }
    if apn.len() > APN_MAX_LEN {
        return Err(ValueError::ValueTooLong {
            len: apn.len(),
            max: APN_MAX_LEN,
        }
        .into());
    }
    let mut field = [0u8; APN_MAX_LEN];
    field[..apn.len()].copy_from_slice(apn.as_bytes());

    let mut body = BodyBuilder::new();
    body.byte(0).zeros(257).dword(0);
    for _ in 0..2 {
        body.zeros(65).zeros(65).zeros(250).dword(0).zeros(250).dword(0);
    }
    body.dword(0x404)
        .dword(1)
        .dword(0)
        .dword(1)
        .dword(0)
        .dword(0)
        .dword(0)
        .dword(0)
        .zeros(20);
    for _ in 0..2 {
        // IPv4v6 context
        body.byte(3).string(APN_MAX_LEN, 1, &field)?.dword(0);
        body.zeros(20).byte(0).byte(0);
    }
    body.dword(0).dword(0);
    Ok(body.finish())
}

/// Network attach: `B, L×4, H 0xffff, H 0xffff, L, L`.
pub fn net_attach_body() -> Bytes {
    BodyBuilder::new()
        .byte(0)
        .dword(0)
        .dword(0)
        .dword(0)
        .dword(0)
        .word(0xffff)
        .word(0xffff)
        .dword(0)
        .dword(0)
        .finish()
}

/// Body shared by the address and DNS queries: `B, L, L`.
pub fn ip_query_body() -> Bytes {
    BodyBuilder::new().byte(0).dword(0).dword(0).finish()
}

/// Packet-service connect: `B, L, L, L`.
pub fn ps_connect_body() -> Bytes {
    BodyBuilder::new()
        .byte(0)
        .dword(0)
        .dword(0)
        .dword(0)
        .finish()
}

/// Connect-to-datachannel: the channel path as a NUL-terminated string.
pub fn datachannel_body(path: &str) -> Result<Bytes> {
    let mut data = Vec::with_capacity(path.len() + 1);
    data.extend_from_slice(path.as_bytes());
    data.push(0);
    let mut body = BodyBuilder::new();
    body.string(data.len(), 1, &data)?;
    Ok(body.finish())
}

/// Connect-setup body: the connect reply minus its trailing value, the
/// datachannel reply, then a zero terminator.
pub fn connect_setup_body(connect_reply: &[u8], datachannel_reply: &[u8]) -> Result<Bytes> {
    let keep = connect_reply
        .len()
        .checked_sub(CONNECT_TRAILER_LEN)
        .ok_or_else(|| ModemError::BadReply {
            call: CallId::UtaMsCallPsConnectReq,
            reason: format!("reply of {} bytes is too short", connect_reply.len()),
        })?;
    let mut body =
        BytesMut::with_capacity(keep + datachannel_reply.len() + SETUP_TRAILER.len());
    body.put_slice(&connect_reply[..keep]);
    body.put_slice(datachannel_reply);
    body.put_slice(&SETUP_TRAILER);
    Ok(body.freeze())
}

/// Decoded reply values of `call`.
pub(crate) fn reply_values(call: CallId, body: &[u8]) -> Result<Vec<Value>> {
    decode_unknown(body).map_err(|err| ModemError::BadReply {
        call,
        reason: err.to_string(),
    })
}

pub(crate) fn int_at(call: CallId, values: &[Value], index: usize) -> Result<u32> {
    values
        .get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| ModemError::BadReply {
            call,
            reason: format!("value {index} is missing or not an integer"),
        })
}

pub(crate) fn bytes_at(call: CallId, values: &[Value], index: usize) -> Result<Bytes> {
    values
        .get(index)
        .and_then(Value::as_bytes)
        .cloned()
        .ok_or_else(|| ModemError::BadReply {
            call,
            reason: format!("value {index} is missing or not a string"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn mode_set_layout() {
        assert_eq!(
            mode_set_body(MODE_ONLINE).as_ref(),
            &[2, 4, 0, 0, 0, 0, 2, 4, 0, 0, 0, 15, 2, 4, 0, 0, 0, 1]
        );
    }

    #[test]
    fn net_attach_layout() {
        let values = decode_unknown(&net_attach_body()).unwrap();
        let ints: Vec<u32> = values.iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(ints, [0, 0, 0, 0, 0, 0xffff, 0xffff, 0, 0]);
        assert_eq!(&net_attach_body()[..3], &[2, 1, 0]);
    }

    #[test]
    fn apn_appears_in_both_contexts() {
        let body = apn_config_body("example.apn").unwrap();
        assert_eq!(count(&body, b"example.apn"), 2);

        let values = decode_unknown(&body).unwrap();
        let apn_fields: Vec<_> = values
            .iter()
            .filter_map(Value::as_bytes)
            .filter(|data| data.starts_with(b"example.apn"))
            .collect();
        assert_eq!(apn_fields.len(), 2);
        assert!(apn_fields.iter().all(|data| data.len() == APN_MAX_LEN));
    }

    #[test]
    fn apn_limits() {
        let longest = "a".repeat(APN_MAX_LEN);
        assert!(apn_config_body(&longest).is_ok());

        let too_long = "a".repeat(APN_MAX_LEN + 1);
        assert!(matches!(
            apn_config_body(&too_long),
            Err(ModemError::Value(ValueError::ValueTooLong { len: 102, max: 101 }))
        ));
        assert!(matches!(
            apn_config_body("carrier\u{e9}"),
            Err(ModemError::InvalidApn(_))
        ));
    }

    #[test]
    fn datachannel_path_is_nul_terminated() {
        let body = datachannel_body("/sioscc/PCIE/IOSM/IPS/0").unwrap();
        let values = decode_unknown(&body).unwrap();
        assert_eq!(
            values[0].as_bytes().unwrap().as_ref(),
            b"/sioscc/PCIE/IOSM/IPS/0\0"
        );
        assert_eq!(&body[..2], &[0x55, 24]);
    }

    #[test]
    fn connect_setup_concatenation() {
        let body = connect_setup_body(b"abcdef\x02\x04\x00\x00\x00\x09", b"XY").unwrap();
        assert_eq!(body.as_ref(), b"abcdefXY\x02\x04\x00\x00\x00\x00");

        assert!(matches!(
            connect_setup_body(b"abc", b"XY"),
            Err(ModemError::BadReply { .. })
        ));
    }

    #[test]
    fn reply_accessors() {
        let body = BodyBuilder::new().dword(0).dword(7).finish();
        let values = reply_values(CallId::UtaMsNetAttachReq, &body).unwrap();
        assert_eq!(int_at(CallId::UtaMsNetAttachReq, &values, 1).unwrap(), 7);
        assert!(int_at(CallId::UtaMsNetAttachReq, &values, 2).is_err());
        assert!(bytes_at(CallId::UtaMsNetAttachReq, &values, 0).is_err());
        assert!(reply_values(CallId::UtaMsNetAttachReq, &[0x99]).is_err());
    }
}
