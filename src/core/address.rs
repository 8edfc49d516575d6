//! An address with type (public / random), used to key ranging peers

use std::{fmt, str::FromStr};

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[repr(C)]
/// The type of an LE address (see: 5.3 Vol 6B 1.3 Device Address)
pub enum AddressType {
    /// A public address
    Public = 0x0,
    /// A random address (either random static or private)
    Random = 0x1,
}

/// An LE address
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct AddressWithType {
    /// The 6 address bytes stored in little-endian format
    pub address: [u8; 6],
    /// The address type, either public or random
    pub address_type: AddressType,
}

impl AddressWithType {
    /// An empty/invalid address
    pub const EMPTY: Self = Self { address: [0, 0, 0, 0, 0, 0], address_type: AddressType::Public };

    /// A public address from its little-endian bytes
    pub const fn public(address: [u8; 6]) -> Self {
        Self { address, address_type: AddressType::Public }
    }
}

/// Printed most-significant byte first, e.g. `00:11:22:33:44:55`
impl fmt::Display for AddressWithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a[5], a[4], a[3], a[2], a[1], a[0])
    }
}

/// Error returned when parsing a malformed address string
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed address {0:?}")]
pub struct AddressParseError(String);

/// Parses the textual form; the result is always a public address.
impl FromStr for AddressWithType {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets = s
            .split(':')
            .map(|octet| u8::from_str_radix(octet, 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AddressParseError(s.to_owned()))?;
        let mut address: [u8; 6] = octets.try_into().map_err(|_| AddressParseError(s.to_owned()))?;
        address.reverse();
        Ok(Self::public(address))
    }
}
