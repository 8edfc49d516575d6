//! The attribute-database seam: the operations the ranging engine needs from
//! whatever stores attributes (a local server database, or the cache a GATT
//! client fills in while discovering a peer), plus the shared attribute types.

use std::rc::Rc;

use bitflags::bitflags;

use crate::{core::uuid::Uuid, gatt::ids::AttHandle};

use super::callbacks::GattDatastore;

// UUIDs from Bluetooth Assigned Numbers Sec 3.6
pub const PRIMARY_SERVICE_DECLARATION_UUID: Uuid = Uuid::new(0x2800);
pub const SECONDARY_SERVICE_DECLARATION_UUID: Uuid = Uuid::new(0x2801);
pub const CHARACTERISTIC_UUID: Uuid = Uuid::new(0x2803);
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid = Uuid::new(0x2902);

/// An ATT error code (Core Spec 5.3 Vol 3F 3.4.1.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttErrorCode(pub u8);

#[allow(missing_docs)]
impl AttErrorCode {
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    pub const ATTRIBUTE_NOT_LONG: Self = Self(0x0B);
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: Self = Self(0x0D);
    pub const UNLIKELY_ERROR: Self = Self(0x0E);
    pub const WRITE_REQUEST_REJECTED: Self = Self(0xFC);
}

bitflags! {
    /// The access permissions of an attribute, as enforced by the local
    /// database
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttPermissions: u8 {
        /// Readable without security requirements
        const READABLE = 1 << 0;
        /// Writable (using ATT_WRITE_REQ / ATT_WRITE_CMD)
        const WRITABLE = 1 << 1;
        /// Reads require an encrypted link
        const READ_ENCRYPT = 1 << 2;
        /// Writes require an encrypted link
        const WRITE_ENCRYPT = 1 << 3;
    }
}

impl AttPermissions {
    /// Whether an attribute is readable
    pub fn readable(&self) -> bool {
        self.intersects(AttPermissions::READABLE | AttPermissions::READ_ENCRYPT)
    }

    /// Whether an attribute is writable
    pub fn writable(&self) -> bool {
        self.intersects(AttPermissions::WRITABLE | AttPermissions::WRITE_ENCRYPT)
    }
}

bitflags! {
    /// Characteristic properties (Core Spec 5.3 Vol 3G 3.3.1.1), as they
    /// appear in the characteristic declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        #[allow(missing_docs)]
        const BROADCAST = 0x01;
        #[allow(missing_docs)]
        const READ = 0x02;
        #[allow(missing_docs)]
        const WRITE_WITHOUT_RESPONSE = 0x04;
        #[allow(missing_docs)]
        const WRITE = 0x08;
        #[allow(missing_docs)]
        const NOTIFY = 0x10;
        #[allow(missing_docs)]
        const INDICATE = 0x20;
    }
}

/// A single attribute, as listed by a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttAttribute {
    pub handle: AttHandle,
    pub type_: Uuid,
    pub permissions: AttPermissions,
}

/// A service declaration and the handle range it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// The handle of the service declaration
    pub handle: AttHandle,
    /// The last handle reserved for this service
    pub end_handle: AttHandle,
    /// The type of the service
    pub uuid: Uuid,
    /// Primary or secondary service
    pub primary: bool,
    /// Whether the service is exposed to peers
    pub active: bool,
    /// Whether a profile already took ownership of this service
    pub claimed: bool,
}

impl GattService {
    /// Number of handles reserved for the service, declaration included
    pub fn num_handles(&self) -> u16 {
        self.end_handle.0 - self.handle.0 + 1
    }
}

/// A characteristic: declaration handle, value handle, type and properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// The handle of the characteristic declaration
    pub declaration_handle: AttHandle,
    /// The handle of the characteristic value attribute, always one after
    /// the declaration
    pub value_handle: AttHandle,
    /// The UUID representing the type of the characteristic value
    pub uuid: Uuid,
    /// The properties advertised in the declaration
    pub properties: CharacteristicProperties,
    /// The permissions of the value attribute
    pub permissions: AttPermissions,
}

/// A characteristic descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    /// The handle of the descriptor
    pub handle: AttHandle,
    /// The UUID representing the type of the descriptor
    pub uuid: Uuid,
    /// The permissions (read/write) indicate what operations can be performed
    pub permissions: AttPermissions,
}

/// The attribute-database collaborator. Registration methods return `None`
/// when the database rejects the request (e.g. no handle space left). All
/// enumeration methods return snapshots, so callers may mutate the database
/// while walking the result.
pub trait AttributeDatabase {
    /// Reserve `num_handles` handles for a new service and add its declaration
    fn add_service(&self, uuid: Uuid, primary: bool, num_handles: u16) -> Option<GattService>;

    /// Add a characteristic (declaration + value) to a service. Reads and
    /// writes of the value are routed to `datastore`; without one the value
    /// cannot be read or written.
    fn add_characteristic(
        &self,
        service: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        datastore: Option<Rc<dyn GattDatastore>>,
    ) -> Option<GattCharacteristic>;

    /// Add a descriptor after the last characteristic of a service
    fn add_descriptor(
        &self,
        service: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
    ) -> Option<GattDescriptor>;

    /// Add a Client Characteristic Configuration descriptor
    fn add_ccc(&self, service: AttHandle, permissions: AttPermissions) -> Option<GattDescriptor> {
        self.add_descriptor(service, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, permissions)
    }

    /// Expose (or hide) a service. Returns false if the service is unknown.
    fn set_active(&self, service: AttHandle, active: bool) -> bool;

    /// Mark a service as owned by a profile. Returns false if unknown.
    fn set_claimed(&self, service: AttHandle, claimed: bool) -> bool;

    /// Remove a service and every attribute in its range
    fn remove_service(&self, service: AttHandle) -> bool;

    /// All services, in handle order, optionally filtered by type
    fn services_by_uuid(&self, uuid: Option<Uuid>) -> Vec<GattService>;

    /// The characteristics of a service, in handle order
    fn characteristics(&self, service: AttHandle) -> Vec<GattCharacteristic>;
}
