//! Device MAC addresses.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Root devices are identified by their MAC: the manager compares parsed
/// addresses to reject duplicates, and the logical device built on a root
/// device takes its datapath id from it.
///
/// ```
/// use rw_types::MacAddress;
///
/// let olt: MacAddress = "00:0C:E2:31:40:00".parse().unwrap();
/// assert_eq!(olt.to_string(), "00:0c:e2:31:40:00");
/// assert_eq!(olt, "00-0c-e2-31-40-00".parse::<MacAddress>().unwrap());
/// assert_eq!(olt.to_u64(), 0x000c_e231_4000);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The address as a datapath id: big-endian in the low 48 bits.
    pub fn to_u64(&self) -> u64 {
        let mut wide = [0u8; 8];
        wide[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(wide)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Accepts six two-digit hex octets separated by `:` or `-`, in any case.
impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMacAddress(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().filter(|p| p.len() == 2).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_case_and_separator_do_not_matter() {
        let upper: MacAddress = "AA:BB:CC:DD:EE:0F".parse().unwrap();
        let lower: MacAddress = "aa-bb-cc-dd-ee-0f".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0f]);
    }

    #[test]
    fn test_datapath_id() {
        assert_eq!(MacAddress::new([0, 0, 0, 0, 0x01, 0x02]).to_u64(), 0x0102);
        assert_eq!(MacAddress::new([0xff; 6]).to_u64(), 0xffff_ffff_ffff);
        assert_eq!(MacAddress::default().to_u64(), 0);
    }

    #[test]
    fn test_serde_as_string() {
        let mac = MacAddress::new([0, 0x0c, 0xe2, 0x31, 0x40, 0]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:0c:e2:31:40:00\"");
        assert_eq!(serde_json::from_str::<MacAddress>(&json).unwrap(), mac);
        assert!(serde_json::from_str::<MacAddress>("\"not-a-mac\"").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "0:11:22:33:44:55", "gg:11:22:33:44:55"] {
            assert!(bad.parse::<MacAddress>().is_err(), "{bad} should not parse");
        }
    }
}
