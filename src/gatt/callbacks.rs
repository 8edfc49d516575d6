//! The interface between an attribute database and the code backing the
//! values of its characteristics.

use async_trait::async_trait;

use super::{
    att_database::AttErrorCode,
    ids::{AttHandle, TransportIndex},
};

/// What kind of attribute a read/write is targeting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeBackingType {
    /// A characteristic value
    Characteristic,
    /// A descriptor
    Descriptor,
}

/// Backs the values of one or more characteristics. Reads and writes are
/// asynchronous so an implementation may wait on the upper layers.
#[async_trait(?Send)]
pub trait GattDatastore {
    /// Read a characteristic from the specified transport at the given handle.
    async fn read(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
        attr_type: AttributeBackingType,
    ) -> Result<Vec<u8>, AttErrorCode>;

    /// Write data to a given characteristic on the specified transport.
    async fn write(
        &self,
        tcb_idx: TransportIndex,
        handle: AttHandle,
        attr_type: AttributeBackingType,
        data: &[u8],
    ) -> Result<(), AttErrorCode>;
}
