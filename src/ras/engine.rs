//! The ranging session engine: owns the database registry, the session arena,
//! the Session Directory and the attachment observers.
//!
//! Every callback handed to a transport captures a WeakBox to the engine and
//! the session handle. Observer callbacks are never invoked while an engine
//! borrow is held, so they may call straight back into the engine.

use std::{any::Any, cell::RefCell, rc::Rc};

use log::{debug, error, info, warn};

use crate::{
    config::RangingConfig,
    core::shared_box::{SharedBox, WeakBox},
    gatt::{
        att_database::{AttErrorCode, AttributeDatabase},
        channel::{AttBearer, DisconnectReason, GattClient, NotifyCallback},
        ids::{AttHandle, RegistrationId},
    },
};

use super::{
    characteristics::CharacteristicSet,
    database::{DatabaseRegistry, RangingDatabase},
    error::RasError,
    observers::{ObserverId, ObserverList, ReadyObserverId, RequestId, SubscriptionId},
    session::{
        DestroyCallback, NotificationCallback, PendingRequest, RasSession, ReadCompleteCallback,
        ReadyObserver, SessionArena, SessionCallback, SessionState, Subscription,
    },
};

struct AttachmentObserver {
    attached: Option<SessionCallback>,
    detached: Option<SessionCallback>,
}

/// Owns every registry of the ranging service. Confined to one thread.
pub struct RasEngine {
    this: WeakBox<RasEngine>,
    features: u32,
    databases: DatabaseRegistry,
    sessions: RefCell<SessionArena>,
    // None until the first attach, and again once the last session detaches
    directory: RefCell<Option<Vec<RasSession>>>,
    observers: RefCell<ObserverList<ObserverId, AttachmentObserver>>,
}

impl RasEngine {
    /// Constructor
    pub fn new(config: &RangingConfig) -> SharedBox<Self> {
        SharedBox::new_cyclic(|this| Self {
            this,
            features: config.features,
            databases: Default::default(),
            sessions: Default::default(),
            directory: Default::default(),
            observers: Default::default(),
        })
    }

    /// Register the ranging service against a local database, once per
    /// database. Failures are logged.
    pub fn add_db(&self, db: Rc<dyn AttributeDatabase>) {
        if let Err(err) = self.databases.get_or_create(db, self.features) {
            error!("failed to add ranging database: {err}");
        }
    }

    /// Look up (or register) the ranging database for a local database
    pub fn get_or_create_database(
        &self,
        db: Rc<dyn AttributeDatabase>,
    ) -> Result<Rc<RangingDatabase>, RasError> {
        self.databases.get_or_create(db, self.features)
    }

    /// The number of registered local databases
    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Create a session holding one reference. The local database is
    /// registered if needed; a remote database is wrapped as-is.
    pub fn create(
        &self,
        local_db: Rc<dyn AttributeDatabase>,
        remote_db: Option<Rc<dyn AttributeDatabase>>,
    ) -> Result<RasSession, RasError> {
        let local = self.databases.get_or_create(local_db, self.features)?;
        let remote = remote_db.map(|db| Rc::new(RangingDatabase::remote(db)));
        let session = self.sessions.borrow_mut().insert(SessionState::new(local, remote));
        debug!("created {session:?}");
        Ok(session)
    }

    /// Take a reference. Fails on stale handles and sessions being destroyed.
    pub fn ref_session(&self, session: RasSession) -> bool {
        match self.sessions.borrow_mut().get_mut(session) {
            Some(state) if state.ref_count > 0 => {
                state.ref_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop a reference, destroying the session when the last one goes
    pub fn unref_session(&self, session: RasSession) -> bool {
        let last = {
            let mut sessions = self.sessions.borrow_mut();
            let Some(state) = sessions.get_mut(session) else {
                return false;
            };
            if state.ref_count == 0 {
                return false;
            }
            state.ref_count -= 1;
            state.ref_count == 0
        };
        if last {
            self.destroy(session);
        }
        true
    }

    fn destroy(&self, session: RasSession) {
        debug!("destroying {session:?}");
        self.detach(session);

        let Some(mut state) = self.sessions.borrow_mut().remove(session) else {
            return;
        };
        let pending = state.pending.drain();
        let ready = state.ready.drain();
        drop(state);

        for (id, request) in pending {
            if let Some(transport_id) = request.transport_id {
                debug!("cancelling {id:?} of {session:?} on {:?}", request.handle);
                request.client.cancel_request(transport_id);
            }
        }
        for (_, observer) in ready {
            if let Some(destroy) = observer.destroy {
                destroy();
            }
        }
    }

    /// Enter the Session Directory and, with a client, attach it: the client
    /// is cloned, idle and disconnect callbacks are registered, and the
    /// remote database is searched for the ranging service.
    pub fn attach(
        &self,
        session: RasSession,
        client: Option<Rc<dyn GattClient>>,
    ) -> Result<(), RasError> {
        let has_disconnect = {
            let sessions = self.sessions.borrow();
            let state = sessions.get(session).ok_or(RasError::InvalidSession(session))?;
            if client.is_some() && state.client.is_some() {
                return Err(RasError::AlreadyAttached(session));
            }
            state.disconnect.is_some()
        };

        self.directory_insert(session);
        let Some(client) = client else {
            return Ok(());
        };
        let client = client.clone_client().ok_or(RasError::TransportUnavailable)?;

        let this = self.this.clone();
        let idle_id = client.register_idle(Box::new(move || {
            this.with(|engine| {
                if let Some(engine) = engine {
                    engine.on_idle(session)
                }
            })
        }));
        let bearer = client.bearer();
        // a server-side session already watches its recorded bearer
        let disconnect = if has_disconnect {
            None
        } else {
            self.register_disconnect(session, bearer.as_ref()).map(|id| (bearer.clone(), id))
        };

        let remote = {
            let mut sessions = self.sessions.borrow_mut();
            let Some(state) = sessions.get_mut(session) else {
                return Err(RasError::InvalidSession(session));
            };
            state.client = Some(client.clone());
            state.idle_id = idle_id;
            if disconnect.is_some() {
                state.disconnect = disconnect;
            }
            state
                .remote
                .get_or_insert_with(|| Rc::new(RangingDatabase::remote(client.database())))
                .clone()
        };
        remote.discover();

        info!("{session:?} attached to {:?}", bearer.transport_index());
        self.notify_attached(session);
        Ok(())
    }

    /// Leave the Session Directory, releasing the transport and every
    /// notification registration, and tell the attachment observers.
    /// Returns false if the session was not in the directory.
    pub fn detach(&self, session: RasSession) -> bool {
        if !self.directory_remove(session) {
            return false;
        }

        let (client, idle_id, disconnect, subscriptions, engine_owned) = {
            let mut sessions = self.sessions.borrow_mut();
            let Some(state) = sessions.get_mut(session) else {
                return true;
            };
            let engine_owned = std::mem::replace(&mut state.engine_owned, false);
            (
                state.client.take(),
                state.idle_id.take(),
                state.disconnect.take(),
                state.subscriptions.drain(),
                engine_owned,
            )
        };

        if let Some(client) = &client {
            for (_, subscription) in &subscriptions {
                client.unregister_notify(subscription.transport_id);
            }
            if let Some(idle_id) = idle_id {
                client.unregister_idle(idle_id);
            }
        }
        if let Some((bearer, disconnect_id)) = disconnect {
            bearer.unregister_disconnect(disconnect_id);
        }
        drop(subscriptions);
        drop(client);

        info!("{session:?} detached");
        self.notify_detached(session);

        if engine_owned {
            self.unref_session(session);
        }
        true
    }

    /// The directory session running over `bearer`
    pub fn lookup_by_transport(&self, bearer: &dyn AttBearer) -> Option<RasSession> {
        let tcb_idx = bearer.transport_index();
        let directory = self.directory.borrow().clone().unwrap_or_default();
        let sessions = self.sessions.borrow();
        directory.into_iter().find(|session| {
            sessions
                .get(*session)
                .and_then(|state| state.bearer())
                .map(|bearer| bearer.transport_index() == tcb_idx)
                .unwrap_or(false)
        })
    }

    /// The session for a peer seen on the server side. A session is created
    /// for unknown bearers; it belongs to the engine and is released once the
    /// bearer disconnects. Fails with TransportUnavailable, creating nothing,
    /// if the bearer is already down.
    pub fn session_for_transport(
        &self,
        local_db: Rc<dyn AttributeDatabase>,
        bearer: Rc<dyn AttBearer>,
    ) -> Result<RasSession, RasError> {
        if let Some(session) = self.lookup_by_transport(bearer.as_ref()) {
            return Ok(session);
        }

        let session = self.create(local_db, None)?;
        let Some(disconnect_id) = self.register_disconnect(session, bearer.as_ref()) else {
            self.unref_session(session);
            return Err(RasError::TransportUnavailable);
        };
        if let Some(state) = self.sessions.borrow_mut().get_mut(session) {
            state.att = Some(bearer.clone());
            state.disconnect = Some((bearer.clone(), disconnect_id));
            state.engine_owned = true;
        }
        info!("{session:?} created for {:?}", bearer.transport_index());
        self.notify_attached(session);

        self.attach(session, None)?;
        Ok(session)
    }

    fn register_disconnect(
        &self,
        session: RasSession,
        bearer: &dyn AttBearer,
    ) -> Option<RegistrationId> {
        let this = self.this.clone();
        let id = bearer.register_disconnect(Box::new(move |reason| {
            this.with(|engine| {
                if let Some(engine) = engine {
                    engine.on_disconnect(session, reason)
                }
            })
        }));
        if id.is_none() {
            warn!("{:?} is already disconnected", bearer.transport_index());
        }
        id
    }

    fn on_disconnect(&self, session: RasSession, reason: DisconnectReason) {
        info!("{session:?} disconnected with {reason:?}");
        if let Some(state) = self.sessions.borrow_mut().get_mut(session) {
            // the registration is consumed
            state.disconnect = None;
        }
        self.detach(session);
    }

    /// Register engine-wide attach/detach callbacks. Returns None if both
    /// are absent. A disconnect detaches the session once, so `detached`
    /// runs once per disconnect, not a second time after the detach.
    pub fn register(
        &self,
        attached: Option<SessionCallback>,
        detached: Option<SessionCallback>,
    ) -> Option<ObserverId> {
        if attached.is_none() && detached.is_none() {
            return None;
        }
        Some(self.observers.borrow_mut().push(AttachmentObserver { attached, detached }))
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        self.observers.borrow_mut().remove(id).is_some()
    }

    pub fn attachment_observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    fn notify_attached(&self, session: RasSession) {
        self.notify_observers(session, |observer| observer.attached.clone());
    }

    fn notify_detached(&self, session: RasSession) {
        self.notify_observers(session, |observer| observer.detached.clone());
    }

    fn notify_observers(
        &self,
        session: RasSession,
        pick: impl Fn(&AttachmentObserver) -> Option<SessionCallback>,
    ) {
        let snapshot = self
            .observers
            .borrow()
            .iter()
            .filter_map(|(id, observer)| pick(observer).map(|callback| (id, callback)))
            .collect::<Vec<_>>();
        for (id, callback) in snapshot {
            // skip observers unregistered by an earlier callback
            if self.observers.borrow().contains(id) {
                callback(self, session);
            }
        }
    }

    /// Register for notifications on a value handle of the peer. Requires an
    /// attached client.
    pub fn subscribe(
        &self,
        session: RasSession,
        handle: AttHandle,
        callback: NotificationCallback,
    ) -> Result<SubscriptionId, RasError> {
        let client = self.client(session)?;

        let this = self.this.clone();
        let on_notify: NotifyCallback = Box::new(move |handle, value| {
            this.with(|engine| {
                if let Some(engine) = engine {
                    engine.dispatch_notification(session, &callback, handle, value)
                }
            })
        });
        let on_registered = Box::new(move |result: Result<(), AttErrorCode>| {
            if let Err(err) = result {
                warn!("{session:?}: registering for {handle:?} failed with {err:?}");
            }
        });
        let Some(transport_id) = client.register_notify(handle, on_registered, on_notify) else {
            warn!("{session:?}: notification registration for {handle:?} rejected");
            return Err(RasError::SubscriptionFailed);
        };

        let id = self
            .sessions
            .borrow_mut()
            .get_mut(session)
            .map(|state| state.subscriptions.push(Subscription { handle, transport_id }));
        match id {
            Some(id) => {
                debug!("{session:?}: {id:?} on {handle:?}");
                Ok(id)
            }
            None => {
                client.unregister_notify(transport_id);
                Err(RasError::InvalidSession(session))
            }
        }
    }

    /// Drop a subscription, releasing its transport registration
    pub fn unsubscribe(&self, session: RasSession, id: SubscriptionId) -> bool {
        let (subscription, client) = {
            let mut sessions = self.sessions.borrow_mut();
            let Some(state) = sessions.get_mut(session) else {
                return false;
            };
            let Some(subscription) = state.subscriptions.remove(id) else {
                return false;
            };
            (subscription, state.client.clone())
        };
        if let Some(client) = client {
            client.unregister_notify(subscription.transport_id);
        }
        debug!("{session:?}: {id:?} on {:?} released", subscription.handle);
        true
    }

    fn dispatch_notification(
        &self,
        session: RasSession,
        callback: &NotificationCallback,
        handle: AttHandle,
        value: &[u8],
    ) {
        if self.sessions.borrow().get(session).is_none() {
            return;
        }
        callback(self, session, handle, value);
    }

    /// Read a value from the peer. The callback runs when the read completes,
    /// unless the session is destroyed first.
    pub fn read_characteristic(
        &self,
        session: RasSession,
        handle: AttHandle,
        callback: ReadCompleteCallback,
    ) -> Result<RequestId, RasError> {
        let client = self.client(session)?;

        let id = self
            .sessions
            .borrow_mut()
            .get_mut(session)
            .map(|state| {
                state.pending.push(PendingRequest {
                    handle,
                    client: client.clone(),
                    transport_id: None,
                    callback,
                })
            })
            .ok_or(RasError::InvalidSession(session))?;

        let this = self.this.clone();
        let transport_id = client.read_value(
            handle,
            Box::new(move |result| {
                this.with(|engine| {
                    if let Some(engine) = engine {
                        engine.on_read_complete(session, id, result)
                    }
                })
            }),
        );

        let mut sessions = self.sessions.borrow_mut();
        let Some(state) = sessions.get_mut(session) else {
            return Err(RasError::InvalidSession(session));
        };
        match transport_id {
            Some(transport_id) => {
                if let Some(request) = state.pending.get_mut(id) {
                    request.transport_id = Some(transport_id);
                }
                Ok(id)
            }
            None => {
                let request = state.pending.remove(id);
                drop(sessions);
                drop(request);
                Err(RasError::RequestFailed)
            }
        }
    }

    fn on_read_complete(
        &self,
        session: RasSession,
        id: RequestId,
        result: Result<Vec<u8>, AttErrorCode>,
    ) {
        let request =
            self.sessions.borrow_mut().get_mut(session).and_then(|state| state.pending.remove(id));
        let Some(request) = request else {
            return;
        };
        debug!("{session:?}: {id:?} on {:?} completed", request.handle);
        (request.callback)(self, session, result);
    }

    fn client(&self, session: RasSession) -> Result<Rc<dyn GattClient>, RasError> {
        let sessions = self.sessions.borrow();
        let state = sessions.get(session).ok_or(RasError::InvalidSession(session))?;
        state.client.clone().ok_or(RasError::NotAttached(session))
    }

    /// Register a callback for each time the session's client goes idle
    pub fn register_ready_observer(
        &self,
        session: RasSession,
        callback: SessionCallback,
        destroy: Option<DestroyCallback>,
    ) -> Result<ReadyObserverId, RasError> {
        let mut sessions = self.sessions.borrow_mut();
        let state = sessions.get_mut(session).ok_or(RasError::InvalidSession(session))?;
        Ok(state.ready.push(ReadyObserver { callback, destroy }))
    }

    /// Remove a readiness observer, running its destroy callback. Returns
    /// false if the id is unknown.
    pub fn unregister_ready_observer(&self, session: RasSession, id: ReadyObserverId) -> bool {
        let observer =
            self.sessions.borrow_mut().get_mut(session).and_then(|state| state.ready.remove(id));
        let Some(observer) = observer else {
            return false;
        };
        if let Some(destroy) = observer.destroy {
            destroy();
        }
        true
    }

    fn on_idle(&self, session: RasSession) {
        match self.sessions.borrow_mut().get_mut(session) {
            Some(state) => state.idle_id = None,
            None => return,
        }
        debug!("{session:?} idle");
        self.notify_ready(session);
    }

    fn notify_ready(&self, session: RasSession) {
        // held for the whole walk, so an observer cannot destroy the session
        if !self.ref_session(session) {
            return;
        }

        let snapshot: Vec<(ReadyObserverId, SessionCallback)> = self
            .sessions
            .borrow()
            .get(session)
            .map(|state| {
                state.ready.iter().map(|(id, observer)| (id, observer.callback.clone())).collect()
            })
            .unwrap_or_else(Vec::new);
        for (id, callback) in snapshot {
            let registered =
                self.sessions.borrow().get(session).is_some_and(|state| state.ready.contains(id));
            if registered {
                callback(self, session);
            }
        }

        self.unref_session(session);
    }

    pub fn set_user_data(&self, session: RasSession, data: Option<Rc<dyn Any>>) -> bool {
        let previous = match self.sessions.borrow_mut().get_mut(session) {
            Some(state) => std::mem::replace(&mut state.user_data, data),
            None => return false,
        };
        drop(previous);
        true
    }

    pub fn user_data(&self, session: RasSession) -> Option<Rc<dyn Any>> {
        self.sessions.borrow().get(session).and_then(|state| state.user_data.clone())
    }

    /// The bearer the session runs over: the recorded one, else the client's
    pub fn get_att(&self, session: RasSession) -> Option<Rc<dyn AttBearer>> {
        self.sessions.borrow().get(session).and_then(|state| state.bearer())
    }

    pub fn get_client(&self, session: RasSession) -> Option<Rc<dyn GattClient>> {
        self.sessions.borrow().get(session).and_then(|state| state.client.clone())
    }

    pub fn ref_count(&self, session: RasSession) -> Option<u32> {
        self.sessions.borrow().get(session).map(|state| state.ref_count)
    }

    /// Whether a client is attached
    pub fn is_attached(&self, session: RasSession) -> bool {
        self.sessions.borrow().get(session).is_some_and(|state| state.client.is_some())
    }

    pub fn local_characteristics(&self, session: RasSession) -> Option<CharacteristicSet> {
        self.sessions.borrow().get(session).map(|state| state.local.characteristics())
    }

    pub fn remote_characteristics(&self, session: RasSession) -> Option<CharacteristicSet> {
        let remote = self.sessions.borrow().get(session).and_then(|state| state.remote.clone());
        remote.map(|remote| remote.characteristics())
    }

    /// The number of live sessions, attached or not
    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// The sessions in the Session Directory, in attach order
    pub fn active_sessions(&self) -> Vec<RasSession> {
        self.directory.borrow().clone().unwrap_or_default()
    }

    /// Whether the Session Directory currently exists
    pub fn has_directory(&self) -> bool {
        self.directory.borrow().is_some()
    }

    pub fn ready_observer_count(&self, session: RasSession) -> usize {
        self.sessions.borrow().get(session).map_or(0, |state| state.ready.len())
    }

    pub fn subscription_count(&self, session: RasSession) -> usize {
        self.sessions.borrow().get(session).map_or(0, |state| state.subscriptions.len())
    }

    pub fn pending_request_count(&self, session: RasSession) -> usize {
        self.sessions.borrow().get(session).map_or(0, |state| state.pending.len())
    }

    fn directory_insert(&self, session: RasSession) {
        let mut directory = self.directory.borrow_mut();
        let sessions = directory.get_or_insert_with(Vec::new);
        if !sessions.contains(&session) {
            sessions.push(session);
        }
    }

    fn directory_remove(&self, session: RasSession) -> bool {
        let mut directory = self.directory.borrow_mut();
        let Some(sessions) = directory.as_mut() else {
            return false;
        };
        let Some(pos) = sessions.iter().position(|s| *s == session) else {
            return false;
        };
        sessions.remove(pos);
        if sessions.is_empty() {
            *directory = None;
        }
        true
    }
}
