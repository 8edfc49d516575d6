//! An in-memory attribute database. Services get a contiguous handle range
//! when they are added; characteristics and descriptors are allocated from
//! that range in order. Characteristic values are proxied to a GattDatastore,
//! declarations are served from their static encodings.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use anyhow::{anyhow, bail, Result};
use log::{trace, warn};

use crate::{
    core::uuid::Uuid,
    gatt::{
        callbacks::{AttributeBackingType, GattDatastore},
        ids::{AttHandle, TransportIndex},
    },
};

use super::att_database::{
    AttAttribute, AttErrorCode, AttPermissions, AttributeDatabase, CharacteristicProperties,
    GattCharacteristic, GattDescriptor, GattService, CHARACTERISTIC_UUID,
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, PRIMARY_SERVICE_DECLARATION_UUID,
    SECONDARY_SERVICE_DECLARATION_UUID,
};

/// The GattDatabase implements AttributeDatabase, and converts attribute
/// reads/writes into calls on the datastores backing each characteristic
pub struct GattDatabase {
    schema: RefCell<GattDatabaseSchema>,
    handle_limit: AttHandle,
}

#[derive(Default)]
struct GattDatabaseSchema {
    services: BTreeMap<AttHandle, ServiceEntry>,
    attributes: BTreeMap<AttHandle, AttAttributeWithBackingValue>,
}

struct ServiceEntry {
    service: GattService,
    // next unallocated handle inside the service range
    next_handle: u32,
}

#[derive(Clone)]
enum AttAttributeBackingValue {
    ServiceDeclaration(Uuid),
    CharacteristicDeclaration(GattCharacteristic),
    Dynamic(Option<Rc<dyn GattDatastore>>),
    // one value for all peers
    ClientConfiguration(u16),
}

#[derive(Clone)]
struct AttAttributeWithBackingValue {
    attribute: AttAttribute,
    value: AttAttributeBackingValue,
}

impl Default for GattDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl GattDatabase {
    /// Constructor, with the whole handle space available
    pub fn new() -> Self {
        Self::with_handle_limit(AttHandle::MAX)
    }

    /// Constructor, refusing to allocate handles above `handle_limit`
    pub fn with_handle_limit(handle_limit: AttHandle) -> Self {
        Self { schema: Default::default(), handle_limit }
    }

    /// List all the attributes in this database, in handle order.
    pub fn list_attributes(&self) -> Vec<AttAttribute> {
        self.schema.borrow().attributes.values().map(|attr| attr.attribute.clone()).collect()
    }

    /// The descriptors of a service, in handle order
    pub fn descriptors(&self, service: AttHandle) -> Vec<GattDescriptor> {
        let schema = self.schema.borrow();
        let Some(entry) = schema.services.get(&service) else {
            return vec![];
        };
        schema
            .attributes
            .range(service..=entry.service.end_handle)
            .filter(|(handle, attr)| {
                matches!(
                    attr.value,
                    AttAttributeBackingValue::Dynamic(_)
                        | AttAttributeBackingValue::ClientConfiguration(_)
                ) && handle_is_descriptor(&schema, **handle)
            })
            .map(|(_, attr)| GattDescriptor {
                handle: attr.attribute.handle,
                uuid: attr.attribute.type_,
                permissions: attr.attribute.permissions,
            })
            .collect()
    }

    /// Read an attribute by handle on behalf of the peer on `tcb_idx`
    pub async fn read_attribute(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
    ) -> Result<Vec<u8>, AttErrorCode> {
        let value = {
            let schema = self.schema.borrow();
            let attr = schema.exposed_attribute(handle)?;
            if !attr.attribute.permissions.readable() {
                return Err(AttErrorCode::READ_NOT_PERMITTED);
            }
            attr.value.clone()
        };

        match value {
            AttAttributeBackingValue::ServiceDeclaration(uuid) => Ok(uuid.to_att_bytes()),
            AttAttributeBackingValue::CharacteristicDeclaration(characteristic) => {
                let mut value = vec![characteristic.properties.bits()];
                value.extend_from_slice(&characteristic.value_handle.0.to_le_bytes());
                value.extend(characteristic.uuid.to_att_bytes());
                Ok(value)
            }
            AttAttributeBackingValue::Dynamic(Some(datastore)) => {
                let attr_type = if handle_is_descriptor(&self.schema.borrow(), handle) {
                    AttributeBackingType::Descriptor
                } else {
                    AttributeBackingType::Characteristic
                };
                datastore.read(tcb_idx, handle, attr_type).await
            }
            AttAttributeBackingValue::Dynamic(None) => Err(AttErrorCode::REQUEST_NOT_SUPPORTED),
            AttAttributeBackingValue::ClientConfiguration(value) => Ok(value.to_le_bytes().to_vec()),
        }
    }

    /// Write an attribute by handle on behalf of the peer on `tcb_idx`
    pub async fn write_attribute(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        let value = {
            let schema = self.schema.borrow();
            let attr = schema.exposed_attribute(handle)?;
            if !attr.attribute.permissions.writable() {
                return Err(AttErrorCode::WRITE_NOT_PERMITTED);
            }
            attr.value.clone()
        };

        match value {
            AttAttributeBackingValue::Dynamic(Some(datastore)) => {
                let attr_type = if handle_is_descriptor(&self.schema.borrow(), handle) {
                    AttributeBackingType::Descriptor
                } else {
                    AttributeBackingType::Characteristic
                };
                datastore.write(tcb_idx, handle, attr_type, data).await
            }
            AttAttributeBackingValue::ClientConfiguration(_) => {
                let Ok(bytes) = <[u8; 2]>::try_from(data) else {
                    return Err(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH);
                };
                let mut schema = self.schema.borrow_mut();
                if let Some(attr) = schema.attributes.get_mut(&handle) {
                    attr.value =
                        AttAttributeBackingValue::ClientConfiguration(u16::from_le_bytes(bytes));
                }
                trace!("CCC {handle:?} set to {bytes:?}");
                Ok(())
            }
            AttAttributeBackingValue::Dynamic(None) => Err(AttErrorCode::REQUEST_NOT_SUPPORTED),
            _ => {
                warn!("declaration {handle:?} is marked as writable - rejecting the write");
                Err(AttErrorCode::WRITE_NOT_PERMITTED)
            }
        }
    }

    fn allocate_in_service(&self, service: AttHandle, count: u32) -> Result<AttHandle> {
        let mut schema = self.schema.borrow_mut();
        let entry = schema
            .services
            .get_mut(&service)
            .ok_or_else(|| anyhow!("service {service:?} does not exist"))?;
        let first = entry.next_handle;
        if first + count - 1 > entry.service.end_handle.0 as u32 {
            bail!("service {service:?} has no room for {count} more handles");
        }
        entry.next_handle += count;
        Ok(AttHandle(first as u16))
    }

    fn insert(&self, attribute: AttAttribute, value: AttAttributeBackingValue) {
        self.schema
            .borrow_mut()
            .attributes
            .insert(attribute.handle, AttAttributeWithBackingValue { attribute, value });
    }

    fn try_add_service(&self, uuid: Uuid, primary: bool, num_handles: u16) -> Result<GattService> {
        if num_handles == 0 {
            bail!("a service needs at least one handle");
        }
        let mut schema = self.schema.borrow_mut();
        let start = schema
            .services
            .values()
            .map(|entry| entry.service.end_handle.0 as u32 + 1)
            .max()
            .unwrap_or(AttHandle::MIN.0 as u32);
        let end = start + num_handles as u32 - 1;
        if end > self.handle_limit.0 as u32 {
            bail!("no room for {num_handles} handles after {start:#06x}");
        }

        let service = GattService {
            handle: AttHandle(start as u16),
            end_handle: AttHandle(end as u16),
            uuid,
            primary,
            active: false,
            claimed: false,
        };
        schema
            .services
            .insert(service.handle, ServiceEntry { service: service.clone(), next_handle: start + 1 });
        schema.attributes.insert(
            service.handle,
            AttAttributeWithBackingValue {
                attribute: AttAttribute {
                    handle: service.handle,
                    type_: if primary {
                        PRIMARY_SERVICE_DECLARATION_UUID
                    } else {
                        SECONDARY_SERVICE_DECLARATION_UUID
                    },
                    permissions: AttPermissions::READABLE,
                },
                value: AttAttributeBackingValue::ServiceDeclaration(uuid),
            },
        );
        Ok(service)
    }

    fn update_service(&self, service: AttHandle, f: impl FnOnce(&mut GattService)) -> bool {
        match self.schema.borrow_mut().services.get_mut(&service) {
            Some(entry) => {
                f(&mut entry.service);
                true
            }
            None => false,
        }
    }
}

impl GattDatabaseSchema {
    fn service_containing(&self, handle: AttHandle) -> Option<&ServiceEntry> {
        self.services
            .range(..=handle)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| handle <= entry.service.end_handle)
    }

    // attributes of inactive services are invisible to peers
    fn exposed_attribute(
        &self,
        handle: AttHandle,
    ) -> Result<&AttAttributeWithBackingValue, AttErrorCode> {
        let attr = self.attributes.get(&handle).ok_or(AttErrorCode::INVALID_HANDLE)?;
        match self.service_containing(handle) {
            Some(entry) if entry.service.active => Ok(attr),
            _ => Err(AttErrorCode::INVALID_HANDLE),
        }
    }
}

fn handle_is_descriptor(schema: &GattDatabaseSchema, handle: AttHandle) -> bool {
    // a value attribute always directly follows its declaration
    let Some(previous) = handle.0.checked_sub(1) else {
        return false;
    };
    !matches!(
        schema.attributes.get(&AttHandle(previous)).map(|attr| &attr.value),
        Some(AttAttributeBackingValue::CharacteristicDeclaration(_))
    )
}

impl AttributeDatabase for GattDatabase {
    fn add_service(&self, uuid: Uuid, primary: bool, num_handles: u16) -> Option<GattService> {
        self.try_add_service(uuid, primary, num_handles)
            .map_err(|err| warn!("failed to add service {uuid:?}: {err}"))
            .ok()
    }

    fn add_characteristic(
        &self,
        service: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
        properties: CharacteristicProperties,
        datastore: Option<Rc<dyn GattDatastore>>,
    ) -> Option<GattCharacteristic> {
        let declaration_handle = self
            .allocate_in_service(service, 2)
            .map_err(|err| warn!("failed to add characteristic {uuid:?}: {err}"))
            .ok()?;
        let characteristic = GattCharacteristic {
            declaration_handle,
            value_handle: AttHandle(declaration_handle.0 + 1),
            uuid,
            properties,
            permissions,
        };

        self.insert(
            AttAttribute {
                handle: characteristic.declaration_handle,
                type_: CHARACTERISTIC_UUID,
                permissions: AttPermissions::READABLE,
            },
            AttAttributeBackingValue::CharacteristicDeclaration(characteristic.clone()),
        );
        self.insert(
            AttAttribute { handle: characteristic.value_handle, type_: uuid, permissions },
            AttAttributeBackingValue::Dynamic(datastore),
        );
        Some(characteristic)
    }

    fn add_descriptor(
        &self,
        service: AttHandle,
        uuid: Uuid,
        permissions: AttPermissions,
    ) -> Option<GattDescriptor> {
        let handle = self
            .allocate_in_service(service, 1)
            .map_err(|err| warn!("failed to add descriptor {uuid:?}: {err}"))
            .ok()?;
        let value = if uuid == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID {
            AttAttributeBackingValue::ClientConfiguration(0)
        } else {
            AttAttributeBackingValue::Dynamic(None)
        };
        self.insert(AttAttribute { handle, type_: uuid, permissions }, value);
        Some(GattDescriptor { handle, uuid, permissions })
    }

    fn set_active(&self, service: AttHandle, active: bool) -> bool {
        self.update_service(service, |service| service.active = active)
    }

    fn set_claimed(&self, service: AttHandle, claimed: bool) -> bool {
        self.update_service(service, |service| service.claimed = claimed)
    }

    fn remove_service(&self, service: AttHandle) -> bool {
        let mut schema = self.schema.borrow_mut();
        let Some(entry) = schema.services.remove(&service) else {
            return false;
        };
        let end_handle = entry.service.end_handle;
        schema.attributes.retain(|handle, _| !(service <= *handle && *handle <= end_handle));
        true
    }

    fn services_by_uuid(&self, uuid: Option<Uuid>) -> Vec<GattService> {
        self.schema
            .borrow()
            .services
            .values()
            .map(|entry| &entry.service)
            .filter(|service| uuid.map(|uuid| service.uuid == uuid).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn characteristics(&self, service: AttHandle) -> Vec<GattCharacteristic> {
        let schema = self.schema.borrow();
        let Some(entry) = schema.services.get(&service) else {
            return vec![];
        };
        schema
            .attributes
            .range(service..=entry.service.end_handle)
            .filter_map(|(_, attr)| match &attr.value {
                AttAttributeBackingValue::CharacteristicDeclaration(characteristic) => {
                    Some(characteristic.clone())
                }
                _ => None,
            })
            .collect()
    }
}
