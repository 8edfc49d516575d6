//! The transport side of a ranging session: the ATT bearer a peer is
//! connected over, and the GATT client used to reach the peer's database.
//! Both are mocked in test and linked to the native stack in production.

use std::rc::Rc;

use super::{
    att_database::{AttErrorCode, AttributeDatabase},
    ids::{AttHandle, RegistrationId, TransportIndex},
};
use crate::core::address::AddressWithType;

/// The reason reported by the native stack when a bearer goes away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisconnectReason(pub i32);

/// Invoked once, when the bearer disconnects
pub type DisconnectCallback = Box<dyn FnOnce(DisconnectReason)>;
/// Invoked once, when the client has no outstanding requests
pub type IdleCallback = Box<dyn FnOnce()>;
/// Invoked once, when a notification registration is acknowledged (or not)
pub type NotifyRegisteredCallback = Box<dyn FnOnce(Result<(), AttErrorCode>)>;
/// Invoked for each incoming notification/indication on a value handle
pub type NotifyCallback = Box<dyn FnMut(AttHandle, &[u8])>;
/// Invoked once, when a read request completes
pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, AttErrorCode>)>;

/// An ATT bearer to one peer
pub trait AttBearer {
    /// The identity of this bearer. Two handles to the same bearer return
    /// the same index.
    fn transport_index(&self) -> TransportIndex;

    /// The address of the connected peer
    fn peer_address(&self) -> AddressWithType;

    /// Register a callback for link loss. Returns None if the bearer is
    /// already disconnected.
    fn register_disconnect(&self, callback: DisconnectCallback) -> Option<RegistrationId>;

    /// Drop a disconnect registration. Returns false if it was unknown.
    fn unregister_disconnect(&self, id: RegistrationId) -> bool;
}

/// A GATT client bound to one peer. Handles are cheap to clone: every clone
/// shares the same underlying client, but registrations made through one
/// clone are owned by it.
pub trait GattClient {
    /// The bearer this client runs over
    fn bearer(&self) -> Rc<dyn AttBearer>;

    /// The client's cache of the peer's attribute database
    fn database(&self) -> Rc<dyn AttributeDatabase>;

    /// Produce an independently-owned handle to the same client. Returns None
    /// if the client is shutting down.
    fn clone_client(&self) -> Option<Rc<dyn GattClient>>;

    /// Register a one-shot callback for when no requests are in flight.
    fn register_idle(&self, callback: IdleCallback) -> Option<RegistrationId>;

    /// Drop an idle registration. Returns false if it was unknown or already fired.
    fn unregister_idle(&self, id: RegistrationId) -> bool;

    /// Register for notifications on a value handle. Returns None if the
    /// client rejects the registration outright; `on_registered` reports the
    /// outcome of writing the peer's CCC.
    fn register_notify(
        &self,
        handle: AttHandle,
        on_registered: NotifyRegisteredCallback,
        on_notify: NotifyCallback,
    ) -> Option<RegistrationId>;

    /// Drop a notification registration. Returns false if it was unknown.
    fn unregister_notify(&self, id: RegistrationId) -> bool;

    /// Start reading a remote value. Returns None if the request could not
    /// be queued.
    fn read_value(&self, handle: AttHandle, callback: ReadCallback) -> Option<RegistrationId>;

    /// Cancel an in-flight request; its callback will not be invoked.
    fn cancel_request(&self, id: RegistrationId) -> bool;
}
