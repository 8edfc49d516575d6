//! Backing values for the characteristics of a locally registered ranging
//! service. Measurement payloads are not produced here: the data
//! characteristics read back empty and Control Point writes are only logged.

use async_trait::async_trait;
use log::{debug, warn};

use crate::gatt::{
    att_database::AttErrorCode,
    callbacks::{AttributeBackingType, GattDatastore},
    ids::{AttHandle, TransportIndex},
};

use super::characteristics::RasCharacteristic;

/// Serves one characteristic of the ranging service
pub struct RasCharacteristicDatastore {
    kind: RasCharacteristic,
    features: u32,
}

impl RasCharacteristicDatastore {
    /// Constructor. `features` is the bitmask returned from the Features
    /// characteristic.
    pub fn new(kind: RasCharacteristic, features: u32) -> Self {
        Self { kind, features }
    }
}

#[async_trait(?Send)]
impl GattDatastore for RasCharacteristicDatastore {
    async fn read(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
        attr_type: AttributeBackingType,
    ) -> Result<Vec<u8>, AttErrorCode> {
        debug!("read of {:?} ({handle:?}) from {tcb_idx:?}", self.kind);
        if attr_type != AttributeBackingType::Characteristic {
            return Err(AttErrorCode::READ_NOT_PERMITTED);
        }
        match self.kind {
            RasCharacteristic::Features => Ok(self.features.to_le_bytes().to_vec()),
            RasCharacteristic::RealTimeData | RasCharacteristic::OnDemandData => Ok(vec![]),
            RasCharacteristic::DataReady => {
                let counter: u16 = 0;
                Ok(counter.to_le_bytes().to_vec())
            }
            RasCharacteristic::DataOverwritten => Ok(vec![0x00, 0x00]),
            RasCharacteristic::ControlPoint => Err(AttErrorCode::READ_NOT_PERMITTED),
        }
    }

    async fn write(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
        attr_type: AttributeBackingType,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        match (self.kind, attr_type) {
            (RasCharacteristic::ControlPoint, AttributeBackingType::Characteristic) => {
                debug!("control point write {data:02x?} from {tcb_idx:?}");
                Ok(())
            }
            _ => {
                warn!("rejecting write to {:?} ({handle:?}) from {tcb_idx:?}", self.kind);
                Err(AttErrorCode::WRITE_NOT_PERMITTED)
            }
        }
    }
}
