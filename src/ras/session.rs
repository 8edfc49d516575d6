//! Ranging sessions live in a slot arena owned by the engine. Handles carry
//! the generation of their slot, so a handle to a destroyed session can never
//! reach whatever reuses the slot.

use std::{any::Any, fmt, rc::Rc};

use crate::gatt::{
    att_database::AttErrorCode,
    channel::{AttBearer, GattClient},
    ids::{AttHandle, RegistrationId},
};

use super::{
    database::RangingDatabase,
    engine::RasEngine,
    observers::{ObserverList, ReadyObserverId, RequestId, SubscriptionId},
};

/// A counted handle to a ranging session. Copying the handle does not take a
/// reference; use [RasEngine::ref_session] for that.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasSession {
    index: u32,
    generation: u32,
}

impl fmt::Debug for RasSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RasSession({}v{})", self.index, self.generation)
    }
}

/// Invoked with the engine and the session concerned
pub type SessionCallback = Rc<dyn Fn(&RasEngine, RasSession)>;
/// Invoked for each notification of a subscription, with the value handle and
/// payload
pub type NotificationCallback = Rc<dyn Fn(&RasEngine, RasSession, AttHandle, &[u8])>;
/// Invoked once when a pending read completes
pub type ReadCompleteCallback =
    Box<dyn FnOnce(&RasEngine, RasSession, Result<Vec<u8>, AttErrorCode>)>;
/// Invoked when a readiness observer is released
pub type DestroyCallback = Box<dyn FnOnce()>;

pub(crate) struct ReadyObserver {
    pub callback: SessionCallback,
    pub destroy: Option<DestroyCallback>,
}

pub(crate) struct Subscription {
    pub handle: AttHandle,
    pub transport_id: RegistrationId,
}

pub(crate) struct PendingRequest {
    pub handle: AttHandle,
    // the client the request was issued on, for cancellation
    pub client: Rc<dyn GattClient>,
    // None until the client has queued the request
    pub transport_id: Option<RegistrationId>,
    pub callback: ReadCompleteCallback,
}

pub(crate) struct SessionState {
    pub ref_count: u32,
    pub local: Rc<RangingDatabase>,
    pub remote: Option<Rc<RangingDatabase>>,
    pub client: Option<Rc<dyn GattClient>>,
    // bearer recorded for sessions created from server-side traffic
    pub att: Option<Rc<dyn AttBearer>>,
    pub idle_id: Option<RegistrationId>,
    // released on the bearer that issued it
    pub disconnect: Option<(Rc<dyn AttBearer>, RegistrationId)>,
    // released by the engine once the transport goes away
    pub engine_owned: bool,
    pub user_data: Option<Rc<dyn Any>>,
    pub subscriptions: ObserverList<SubscriptionId, Subscription>,
    pub pending: ObserverList<RequestId, PendingRequest>,
    pub ready: ObserverList<ReadyObserverId, ReadyObserver>,
}

impl SessionState {
    pub fn new(local: Rc<RangingDatabase>, remote: Option<Rc<RangingDatabase>>) -> Self {
        Self {
            ref_count: 1,
            local,
            remote,
            client: None,
            att: None,
            idle_id: None,
            disconnect: None,
            engine_owned: false,
            user_data: None,
            subscriptions: Default::default(),
            pending: Default::default(),
            ready: Default::default(),
        }
    }

    /// The bearer the session runs over, if any
    pub fn bearer(&self) -> Option<Rc<dyn AttBearer>> {
        self.att.clone().or_else(|| self.client.as_ref().map(|client| client.bearer()))
    }
}

struct Slot {
    generation: u32,
    state: Option<SessionState>,
}

#[derive(Default)]
pub(crate) struct SessionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl SessionArena {
    pub fn insert(&mut self, state: SessionState) -> RasSession {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = Some(state);
            return RasSession { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, state: Some(state) });
        RasSession { index, generation: 0 }
    }

    pub fn get(&self, session: RasSession) -> Option<&SessionState> {
        self.slots
            .get(session.index as usize)
            .filter(|slot| slot.generation == session.generation)
            .and_then(|slot| slot.state.as_ref())
    }

    pub fn get_mut(&mut self, session: RasSession) -> Option<&mut SessionState> {
        self.slots
            .get_mut(session.index as usize)
            .filter(|slot| slot.generation == session.generation)
            .and_then(|slot| slot.state.as_mut())
    }

    /// Free the slot. Every outstanding handle to it goes stale.
    pub fn remove(&mut self, session: RasSession) -> Option<SessionState> {
        let slot = self
            .slots
            .get_mut(session.index as usize)
            .filter(|slot| slot.generation == session.generation)?;
        let state = slot.state.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(session.index);
        Some(state)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.state.is_some()).count()
    }
}
