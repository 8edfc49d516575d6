//! These are strongly-typed identifiers representing the various objects
//! interacted with, mostly across the transport boundary

/// The handle of a given ATT attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttHandle(pub u16);

impl AttHandle {
    /// The lowest valid handle (0x0000 is reserved)
    pub const MIN: Self = Self(0x0001);
    /// The highest valid handle
    pub const MAX: Self = Self(0xFFFF);
}

/// An identifier for an ATT bearer, supplied by the native stack. It
/// represents an underlying ACL-LE connection and is what sessions are
/// deduplicated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportIndex(pub u8);

/// An id handed out by a transport for any registration made with it (idle
/// callbacks, notification handlers, disconnect callbacks, in-flight
/// requests). Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u32);
