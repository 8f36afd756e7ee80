//! Negotiated address and name servers.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Serialize;
use xmmlink_rpc::{CallId, Value};

use crate::commands::bytes_at;
use crate::error::Result;

/// Address slots in the address reply.
const ADDRESS_SLOTS: usize = 3;

/// Server entries in the DNS reply.
const DNS_SLOTS: usize = 16;

const DNS_TYPE_V4: u32 = 1;
const DNS_TYPE_V6: u32 = 2;

/// Addresses assigned by the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    pub address: Ipv4Addr,
    pub dns_v4: Vec<Ipv4Addr>,
    pub dns_v6: Vec<Ipv6Addr>,
}

impl NetworkConfig {
    /// All name servers, IPv4 first.
    pub fn dns_servers(&self) -> Vec<String> {
        self.dns_v4
            .iter()
            .map(ToString::to_string)
            .chain(self.dns_v6.iter().map(ToString::to_string))
            .collect()
    }
}

/// Pick the address out of the address reply's slot field.
///
/// The modem reports several IPv4 slots; the last non-zero one is the
/// assigned address.
pub fn select_address(slots: &[u8]) -> Option<Ipv4Addr> {
    slots
        .chunks_exact(4)
        .take(ADDRESS_SLOTS)
        .map(|slot| Ipv4Addr::new(slot[0], slot[1], slot[2], slot[3]))
        .rev()
        .find(|addr| !addr.is_unspecified())
}

/// Address from the decoded address reply.
pub fn address_from_reply(values: &[Value]) -> Result<Option<Ipv4Addr>> {
    let slots = bytes_at(CallId::UtaMsCallPsGetNegIpAddrReq, values, 1)?;
    Ok(select_address(&slots))
}

/// Name servers from the decoded DNS reply.
///
/// Entries are (address, type) value pairs starting at index 1. Unused
/// entries have type zero. A short reply ends the scan.
pub fn dns_from_reply(values: &[Value]) -> (Vec<Ipv4Addr>, Vec<Ipv6Addr>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for slot in 0..DNS_SLOTS {
        let (Some(addr), Some(kind)) = (values.get(2 * slot + 1), values.get(2 * slot + 2)) else {
            break;
        };
        let (Some(addr), Some(kind)) = (addr.as_bytes(), kind.as_int()) else {
            continue;
        };
        match kind {
            DNS_TYPE_V4 if addr.len() >= 4 => {
                v4.push(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]));
            }
            DNS_TYPE_V6 if addr.len() >= 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&addr[..16]);
                v6.push(Ipv6Addr::from(octets));
            }
            _ => {}
        }
    }
    (v4, v6)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn string(data: &[u8]) -> Value {
        Value::String {
            width: 1,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn last_nonzero_slot_wins() {
        let slots = [0, 0, 0, 0, 0, 0, 0, 0, 203, 0, 113, 7];
        assert_eq!(select_address(&slots), Some(Ipv4Addr::new(203, 0, 113, 7)));

        let slots = [10, 0, 0, 1, 10, 0, 0, 2, 0, 0, 0, 0];
        assert_eq!(select_address(&slots), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn all_zero_slots_mean_no_address() {
        assert_eq!(select_address(&[0; 12]), None);
        assert_eq!(select_address(&[]), None);
    }

    #[test]
    fn address_reply_needs_slot_string() {
        let values = vec![Value::Int(0), string(&[0, 0, 0, 0, 0, 0, 0, 0, 192, 0, 2, 1])];
        assert_eq!(
            address_from_reply(&values).unwrap(),
            Some(Ipv4Addr::new(192, 0, 2, 1))
        );
        assert!(address_from_reply(&[Value::Int(0), Value::Int(1)]).is_err());
    }

    #[test]
    fn dns_entries_by_type() {
        let mut v6 = [0u8; 16];
        v6[0] = 0x20;
        v6[1] = 0x01;
        v6[2] = 0x0d;
        v6[3] = 0xb8;
        v6[15] = 0x53;

        let values = vec![
            Value::Int(0),
            string(&[8, 8, 8, 8, 0, 0, 0, 0]),
            Value::Int(1),
            string(&v6),
            Value::Int(2),
            string(&[0; 16]),
            Value::Int(0),
            string(&[1, 1, 1, 1]),
            Value::Int(1),
        ];
        let (dns_v4, dns_v6) = dns_from_reply(&values);
        assert_eq!(dns_v4, [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(dns_v6, ["2001:db8::53".parse::<Ipv6Addr>().unwrap()]);

        let config = NetworkConfig {
            address: Ipv4Addr::new(192, 0, 2, 1),
            dns_v4,
            dns_v6,
        };
        assert_eq!(config.dns_servers(), ["8.8.8.8", "1.1.1.1", "2001:db8::53"]);
    }
}
