//! A UUID (See Core Spec 5.3 Vol 1E 2.9.1. Basic Types)

use std::fmt;

/// A UUID (See Core Spec 5.3 Vol 1E 2.9.1. Basic Types)
///
/// Note that the underlying storage is BIG-ENDIAN, matching the textual form.
/// Anything that goes on the air (attribute values, declarations) uses
/// [Uuid::to_att_bytes], which is LITTLE-ENDIAN.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
#[repr(transparent)]
pub struct Uuid([u8; 16]);

const BASE_UUID: u128 = 0x00000000_0000_1000_8000_0080_5F9B_34FB;

impl Uuid {
    /// Constructor from a u32 (covers both 16-bit and 32-bit assigned numbers).
    pub const fn new(val: u32) -> Self {
        Self((BASE_UUID + ((val as u128) << 96)).to_be_bytes())
    }

    /// Constructor from a full 128-bit value
    pub const fn from_u128(val: u128) -> Self {
        Self(val.to_be_bytes())
    }

    /// Constructor from on-air (little-endian) bytes. Accepts 2, 4 or 16 bytes.
    pub fn from_att_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Self::new(u16::from_le_bytes([bytes[0], bytes[1]]) as u32)),
            4 => Some(Self::new(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))),
            16 => {
                let mut be: [u8; 16] = bytes.try_into().ok()?;
                be.reverse();
                Some(Self(be))
            }
            _ => None,
        }
    }

    /// The 16-bit short form, if this UUID is derived from the base UUID and
    /// fits in 16 bits
    pub fn as_u16(&self) -> Option<u16> {
        let backing = u128::from_be_bytes(self.0);
        if backing & ((1u128 << 96) - 1) != BASE_UUID {
            return None;
        }
        u16::try_from(backing >> 96).ok()
    }

    /// The on-air encoding: compressed to 2 bytes when possible, otherwise
    /// the full 16 bytes, in little-endian order.
    pub fn to_att_bytes(&self) -> Vec<u8> {
        if let Some(short) = self.as_u16() {
            return short.to_le_bytes().to_vec();
        }
        let mut out = self.0;
        out.reverse();
        out.to_vec()
    }
}

impl From<u16> for Uuid {
    fn from(value: u16) -> Self {
        Self::new(value as u32)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(short) => write!(f, "Uuid(0x{short:04X})"),
            None => write!(f, "Uuid({self})"),
        }
    }
}
