//! Mocked implementations of GattClient and AttBearer for use in test. Calls
//! from the code under test are routed into a channel of MockClientEvents;
//! the test drives the transport side through the trigger methods.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use log::info;
use tokio::sync::mpsc::{self, unbounded_channel, UnboundedReceiver};

use crate::{
    core::address::AddressWithType,
    gatt::{
        att_database::{AttErrorCode, AttributeDatabase},
        channel::{
            AttBearer, DisconnectCallback, DisconnectReason, GattClient, IdleCallback,
            NotifyCallback, NotifyRegisteredCallback, ReadCallback,
        },
        ids::{AttHandle, RegistrationId, TransportIndex},
    },
};

/// Events representing calls made on a MockGattClient or MockAttBearer
#[derive(Debug, PartialEq, Eq)]
pub enum MockClientEvents {
    /// The client was cloned
    Cloned,
    /// A client handle was dropped
    Released,
    /// An idle callback was registered
    IdleRegistered(RegistrationId),
    /// An idle callback was unregistered
    IdleUnregistered(RegistrationId),
    /// A notification handler was registered on a value handle
    NotifyRegistered(RegistrationId, AttHandle),
    /// A notification handler was unregistered
    NotifyUnregistered(RegistrationId),
    /// A read was issued
    ReadIssued(RegistrationId, AttHandle),
    /// An in-flight request was cancelled
    RequestCancelled(RegistrationId),
    /// A disconnect callback was registered on the bearer
    DisconnectRegistered(RegistrationId),
    /// A disconnect callback was unregistered from the bearer
    DisconnectUnregistered(RegistrationId),
}

fn allocate_id(next_id: &mut u32) -> RegistrationId {
    *next_id = next_id.checked_add(1).unwrap_or(1);
    RegistrationId(*next_id)
}

struct BearerState {
    connected: bool,
    next_id: u32,
    disconnect: BTreeMap<RegistrationId, DisconnectCallback>,
}

/// A fake ATT bearer to one peer
pub struct MockAttBearer {
    tcb_idx: TransportIndex,
    peer: AddressWithType,
    state: RefCell<BearerState>,
    events: mpsc::UnboundedSender<MockClientEvents>,
}

impl MockAttBearer {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new(
        tcb_idx: TransportIndex,
        peer: AddressWithType,
    ) -> (Rc<Self>, UnboundedReceiver<MockClientEvents>) {
        let (tx, rx) = unbounded_channel();
        (Self::with_sender(tcb_idx, peer, tx), rx)
    }

    fn with_sender(
        tcb_idx: TransportIndex,
        peer: AddressWithType,
        events: mpsc::UnboundedSender<MockClientEvents>,
    ) -> Rc<Self> {
        Rc::new(Self {
            tcb_idx,
            peer,
            state: RefCell::new(BearerState {
                connected: true,
                next_id: 0,
                disconnect: BTreeMap::new(),
            }),
            events,
        })
    }

    /// Simulate link loss: every disconnect callback fires once, in
    /// registration order.
    pub fn disconnect(&self, reason: DisconnectReason) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            state.connected = false;
            std::mem::take(&mut state.disconnect)
        };
        info!("disconnecting {:?} with {reason:?}", self.tcb_idx);
        for callback in callbacks.into_values() {
            callback(reason);
        }
    }

    /// The number of live disconnect registrations
    pub fn disconnect_registrations(&self) -> usize {
        self.state.borrow().disconnect.len()
    }

    fn send(&self, event: MockClientEvents) {
        // the receiver may already be gone at the end of a test
        let _ = self.events.send(event);
    }
}

impl AttBearer for MockAttBearer {
    fn transport_index(&self) -> TransportIndex {
        self.tcb_idx
    }

    fn peer_address(&self) -> AddressWithType {
        self.peer
    }

    fn register_disconnect(&self, callback: DisconnectCallback) -> Option<RegistrationId> {
        let id = {
            let mut state = self.state.borrow_mut();
            if !state.connected {
                return None;
            }
            let id = allocate_id(&mut state.next_id);
            state.disconnect.insert(id, callback);
            id
        };
        self.send(MockClientEvents::DisconnectRegistered(id));
        Some(id)
    }

    fn unregister_disconnect(&self, id: RegistrationId) -> bool {
        let removed = self.state.borrow_mut().disconnect.remove(&id).is_some();
        if removed {
            self.send(MockClientEvents::DisconnectUnregistered(id));
        }
        removed
    }
}

struct ClientState {
    next_id: u32,
    live_handles: usize,
    fail_clone: bool,
    reject_notify: bool,
    notify_ack: Result<(), AttErrorCode>,
    idle: BTreeMap<RegistrationId, IdleCallback>,
    notify: BTreeMap<RegistrationId, (AttHandle, Rc<RefCell<NotifyCallback>>)>,
    reads: BTreeMap<RegistrationId, (AttHandle, ReadCallback)>,
}

struct ClientShared {
    bearer: Rc<MockAttBearer>,
    database: Rc<dyn AttributeDatabase>,
    state: RefCell<ClientState>,
}

/// A fake GATT client. Every handle (the one returned by the constructor and
/// every clone) shares one set of registrations, which the test side can
/// trigger.
pub struct MockGattClient(Rc<ClientShared>);

impl MockGattClient {
    /// Constructor. The client runs over a fresh MockAttBearer and exposes
    /// `database` as its cache of the peer's attributes. Returns self and the
    /// RX side of the channel shared by the client and its bearer.
    pub fn new(
        tcb_idx: TransportIndex,
        peer: AddressWithType,
        database: Rc<dyn AttributeDatabase>,
    ) -> (Rc<Self>, UnboundedReceiver<MockClientEvents>) {
        let (tx, rx) = unbounded_channel();
        let bearer = MockAttBearer::with_sender(tcb_idx, peer, tx);
        let shared = Rc::new(ClientShared {
            bearer,
            database,
            state: RefCell::new(ClientState {
                next_id: 0,
                live_handles: 1,
                fail_clone: false,
                reject_notify: false,
                notify_ack: Ok(()),
                idle: BTreeMap::new(),
                notify: BTreeMap::new(),
                reads: BTreeMap::new(),
            }),
        });
        (Rc::new(Self(shared)), rx)
    }

    /// The concrete bearer, for triggering disconnects
    pub fn mock_bearer(&self) -> Rc<MockAttBearer> {
        self.0.bearer.clone()
    }

    /// Make the next clones fail
    pub fn set_fail_clone(&self, fail: bool) {
        self.0.state.borrow_mut().fail_clone = fail;
    }

    /// Make notification registrations get rejected outright
    pub fn set_reject_notify(&self, reject: bool) {
        self.0.state.borrow_mut().reject_notify = reject;
    }

    /// The acknowledgement delivered to future notification registrations
    pub fn set_notify_ack(&self, ack: Result<(), AttErrorCode>) {
        self.0.state.borrow_mut().notify_ack = ack;
    }

    /// Fire every pending idle callback once, in registration order.
    pub fn fire_idle(&self) {
        let callbacks = std::mem::take(&mut self.0.state.borrow_mut().idle);
        for callback in callbacks.into_values() {
            callback();
        }
    }

    /// Deliver a notification to every handler registered on `handle`.
    /// Returns the number of handlers reached.
    pub fn notify(&self, handle: AttHandle, value: &[u8]) -> usize {
        let callbacks = self
            .0
            .state
            .borrow()
            .notify
            .iter()
            .filter(|(_, (registered, _))| *registered == handle)
            .map(|(id, (_, callback))| (*id, callback.clone()))
            .collect::<Vec<_>>();
        let mut reached = 0;
        for (id, callback) in callbacks {
            // a handler may unregister a later one
            if !self.0.state.borrow().notify.contains_key(&id) {
                continue;
            }
            (&mut *callback.borrow_mut())(handle, value);
            reached += 1;
        }
        reached
    }

    /// Complete an in-flight read. Returns false if it was unknown or cancelled.
    pub fn complete_read(&self, id: RegistrationId, result: Result<Vec<u8>, AttErrorCode>) -> bool {
        let Some((_, callback)) = self.0.state.borrow_mut().reads.remove(&id) else {
            return false;
        };
        callback(result);
        true
    }

    /// The number of live idle registrations
    pub fn idle_registrations(&self) -> usize {
        self.0.state.borrow().idle.len()
    }

    /// The number of live notification registrations
    pub fn notify_registrations(&self) -> usize {
        self.0.state.borrow().notify.len()
    }

    /// The number of in-flight reads
    pub fn pending_reads(&self) -> usize {
        self.0.state.borrow().reads.len()
    }

    /// The number of client handles alive, the constructor's included
    pub fn live_handles(&self) -> usize {
        self.0.state.borrow().live_handles
    }

    fn allocate_id(&self) -> RegistrationId {
        allocate_id(&mut self.0.state.borrow_mut().next_id)
    }
}

impl Drop for MockGattClient {
    fn drop(&mut self) {
        let mut state = self.0.state.borrow_mut();
        state.live_handles = state.live_handles.saturating_sub(1);
        drop(state);
        self.0.bearer.send(MockClientEvents::Released);
    }
}

impl GattClient for MockGattClient {
    fn bearer(&self) -> Rc<dyn AttBearer> {
        self.0.bearer.clone()
    }

    fn database(&self) -> Rc<dyn AttributeDatabase> {
        self.0.database.clone()
    }

    fn clone_client(&self) -> Option<Rc<dyn GattClient>> {
        {
            let mut state = self.0.state.borrow_mut();
            if state.fail_clone {
                return None;
            }
            state.live_handles += 1;
        }
        self.0.bearer.send(MockClientEvents::Cloned);
        Some(Rc::new(Self(self.0.clone())))
    }

    fn register_idle(&self, callback: IdleCallback) -> Option<RegistrationId> {
        let id = self.allocate_id();
        self.0.state.borrow_mut().idle.insert(id, callback);
        self.0.bearer.send(MockClientEvents::IdleRegistered(id));
        Some(id)
    }

    fn unregister_idle(&self, id: RegistrationId) -> bool {
        let removed = self.0.state.borrow_mut().idle.remove(&id).is_some();
        if removed {
            self.0.bearer.send(MockClientEvents::IdleUnregistered(id));
        }
        removed
    }

    fn register_notify(
        &self,
        handle: AttHandle,
        on_registered: NotifyRegisteredCallback,
        on_notify: NotifyCallback,
    ) -> Option<RegistrationId> {
        if self.0.state.borrow().reject_notify {
            return None;
        }
        let id = self.allocate_id();
        let ack = {
            let mut state = self.0.state.borrow_mut();
            state.notify.insert(id, (handle, Rc::new(RefCell::new(on_notify))));
            state.notify_ack
        };
        self.0.bearer.send(MockClientEvents::NotifyRegistered(id, handle));
        on_registered(ack);
        Some(id)
    }

    fn unregister_notify(&self, id: RegistrationId) -> bool {
        let removed = self.0.state.borrow_mut().notify.remove(&id).is_some();
        if removed {
            self.0.bearer.send(MockClientEvents::NotifyUnregistered(id));
        }
        removed
    }

    fn read_value(&self, handle: AttHandle, callback: ReadCallback) -> Option<RegistrationId> {
        let id = self.allocate_id();
        self.0.state.borrow_mut().reads.insert(id, (handle, callback));
        self.0.bearer.send(MockClientEvents::ReadIssued(id, handle));
        Some(id)
    }

    fn cancel_request(&self, id: RegistrationId) -> bool {
        let removed = self.0.state.borrow_mut().reads.remove(&id).is_some();
        if removed {
            self.0.bearer.send(MockClientEvents::RequestCancelled(id));
        }
        removed
    }
}
