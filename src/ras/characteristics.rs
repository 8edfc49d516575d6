//! The attribute layout of one Ranging Service instance, how it is registered
//! against a local database, and how it is found again in a peer's database.

use std::rc::Rc;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    core::uuid::Uuid,
    gatt::{
        att_database::{
            AttPermissions, AttributeDatabase, CharacteristicProperties, GattCharacteristic,
            GattDescriptor, GattService,
        },
        ids::AttHandle,
    },
};

use super::server::RasCharacteristicDatastore;

pub const RAS_SERVICE_UUID: Uuid = Uuid::new(0x185B);
pub const RAS_FEATURES_UUID: Uuid = Uuid::new(0x2C14);
pub const RAS_REAL_TIME_DATA_UUID: Uuid = Uuid::new(0x2C15);
pub const RAS_ON_DEMAND_DATA_UUID: Uuid = Uuid::new(0x2C16);
pub const RAS_CONTROL_POINT_UUID: Uuid = Uuid::new(0x2C17);
pub const RAS_DATA_READY_UUID: Uuid = Uuid::new(0x2C18);
pub const RAS_DATA_OVERWRITTEN_UUID: Uuid = Uuid::new(0x2C19);

/// Handles reserved for the service: the declaration, two per characteristic,
/// and one CCC for each of the five characteristics that can notify
pub const RAS_NUM_HANDLES: u16 = 18;

/// The six characteristics of the service, in registration order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RasCharacteristic {
    Features,
    RealTimeData,
    OnDemandData,
    ControlPoint,
    DataReady,
    DataOverwritten,
}

impl RasCharacteristic {
    pub const ALL: [Self; 6] = [
        Self::Features,
        Self::RealTimeData,
        Self::OnDemandData,
        Self::ControlPoint,
        Self::DataReady,
        Self::DataOverwritten,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            Self::Features => RAS_FEATURES_UUID,
            Self::RealTimeData => RAS_REAL_TIME_DATA_UUID,
            Self::OnDemandData => RAS_ON_DEMAND_DATA_UUID,
            Self::ControlPoint => RAS_CONTROL_POINT_UUID,
            Self::DataReady => RAS_DATA_READY_UUID,
            Self::DataOverwritten => RAS_DATA_OVERWRITTEN_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }

    /// Permissions of the value attribute
    pub fn permissions(self) -> AttPermissions {
        match self {
            Self::ControlPoint => AttPermissions::WRITABLE | AttPermissions::WRITE_ENCRYPT,
            _ => AttPermissions::READABLE | AttPermissions::READ_ENCRYPT,
        }
    }

    pub fn properties(self) -> CharacteristicProperties {
        match self {
            Self::Features => CharacteristicProperties::READ,
            Self::RealTimeData | Self::OnDemandData => {
                CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE
            }
            Self::ControlPoint => {
                CharacteristicProperties::WRITE_WITHOUT_RESPONSE
                    | CharacteristicProperties::INDICATE
            }
            Self::DataReady | Self::DataOverwritten => {
                CharacteristicProperties::READ
                    | CharacteristicProperties::NOTIFY
                    | CharacteristicProperties::INDICATE
            }
        }
    }

    /// Whether the characteristic is followed by a CCC descriptor
    pub fn has_ccc(self) -> bool {
        self != Self::Features
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// The handles of one service instance. Every field is assigned at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CharacteristicSet {
    service: Option<GattService>,
    characteristics: [Option<GattCharacteristic>; 6],
    ccc: [Option<GattDescriptor>; 6],
}

impl CharacteristicSet {
    pub fn service(&self) -> Option<&GattService> {
        self.service.as_ref()
    }

    pub fn get(&self, kind: RasCharacteristic) -> Option<&GattCharacteristic> {
        self.characteristics[kind.index()].as_ref()
    }

    pub fn value_handle(&self, kind: RasCharacteristic) -> Option<AttHandle> {
        self.get(kind).map(|characteristic| characteristic.value_handle)
    }

    pub fn ccc(&self, kind: RasCharacteristic) -> Option<&GattDescriptor> {
        self.ccc[kind.index()].as_ref()
    }

    /// The number of characteristics found so far
    pub fn len(&self) -> usize {
        self.characteristics.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.len() == 0
    }

    /// Whether the service and all six characteristics are known
    pub fn is_complete(&self) -> bool {
        self.service.is_some() && self.len() == RasCharacteristic::ALL.len()
    }

    /// Returns false, leaving the set unchanged, if the service is already known
    pub fn assign_service(&mut self, service: GattService) -> bool {
        if self.service.is_some() {
            return false;
        }
        self.service = Some(service);
        true
    }

    /// Returns false, leaving the set unchanged, if `kind` is already assigned
    pub fn assign(&mut self, kind: RasCharacteristic, characteristic: GattCharacteristic) -> bool {
        let slot = &mut self.characteristics[kind.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(characteristic);
        true
    }

    fn assign_ccc(&mut self, kind: RasCharacteristic, descriptor: GattDescriptor) -> bool {
        let slot = &mut self.ccc[kind.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(descriptor);
        true
    }
}

/// Register the service layout against `db` and activate it. On failure the
/// partially registered service is removed again.
pub fn register_ras_service(db: &dyn AttributeDatabase, features: u32) -> Result<CharacteristicSet> {
    let service = db
        .add_service(RAS_SERVICE_UUID, true, RAS_NUM_HANDLES)
        .context("no room for the ranging service")?;

    match populate_service(db, &service, features) {
        Ok(set) => {
            info!(
                "registered ranging service at {:?}..={:?}",
                service.handle, service.end_handle
            );
            Ok(set)
        }
        Err(err) => {
            if !db.remove_service(service.handle) {
                warn!("failed to roll back ranging service at {:?}", service.handle);
            }
            Err(err)
        }
    }
}

fn populate_service(
    db: &dyn AttributeDatabase,
    service: &GattService,
    features: u32,
) -> Result<CharacteristicSet> {
    let mut set = CharacteristicSet::default();
    for kind in RasCharacteristic::ALL {
        let characteristic = db
            .add_characteristic(
                service.handle,
                kind.uuid(),
                kind.permissions(),
                kind.properties(),
                Some(Rc::new(RasCharacteristicDatastore::new(kind, features))),
            )
            .with_context(|| format!("failed to add {kind:?}"))?;
        set.assign(kind, characteristic);

        if kind.has_ccc() {
            let ccc = db
                .add_ccc(service.handle, AttPermissions::READABLE | AttPermissions::WRITABLE)
                .with_context(|| format!("failed to add the CCC of {kind:?}"))?;
            set.assign_ccc(kind, ccc);
        }
    }

    anyhow::ensure!(db.set_active(service.handle, true), "service {:?} vanished", service.handle);

    let mut service = service.clone();
    service.active = true;
    set.assign_service(service);
    Ok(set)
}

/// Walk every ranging service in `db`, claim it, and fill the unassigned
/// fields of `set` with the characteristics found. Returns how many fields
/// were newly assigned.
pub fn discover(db: &dyn AttributeDatabase, set: &mut CharacteristicSet) -> usize {
    let mut assigned = 0;
    for service in db.services_by_uuid(Some(RAS_SERVICE_UUID)) {
        db.set_claimed(service.handle, true);
        let characteristics = db.characteristics(service.handle);
        if set.assign_service(GattService { claimed: true, ..service }) {
            assigned += 1;
        }

        for characteristic in characteristics {
            let Some(kind) = RasCharacteristic::from_uuid(characteristic.uuid) else {
                continue;
            };
            debug!("{kind:?} characteristic found: handle {:?}", characteristic.value_handle);
            if set.assign(kind, characteristic) {
                assigned += 1;
            }
        }
    }
    assigned
}
