//! Binds the ranging engine into the host's profile lifecycle. Peers are
//! tracked by address: a device probed by the host gets a client-role
//! session, and a peer that shows up on the server side first is tracked
//! from its attach.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use log::{debug, error, info};

use crate::{
    config::RangingConfig,
    core::{
        address::AddressWithType,
        shared_box::{SharedBox, WeakBox},
    },
    gatt::{att_database::AttributeDatabase, channel::GattClient},
    ras::{
        observers::{ObserverId, ReadyObserverId},
        RasEngine, RasError, RasSession,
    },
    utils::logging::init_logging,
};

struct DeviceEntry {
    device: AddressWithType,
    session: RasSession,
    ready_id: Option<ReadyObserverId>,
    // created by device_probe rather than by a server-side attach
    probed: bool,
}

/// The ranging profile
pub struct RangingProfile {
    observer_id: Cell<Option<ObserverId>>,
    entries: RefCell<Vec<DeviceEntry>>,
}

impl RangingProfile {
    /// Start the profile and subscribe to session attach/detach. Fails
    /// unless experimental features are enabled. Logging runs at
    /// `config.log_level` from here on.
    pub fn start(engine: &RasEngine, config: &RangingConfig) -> Result<SharedBox<Self>, RasError> {
        init_logging(config.log_level);
        if !config.experimental {
            debug!("experimental features not enabled");
            return Err(RasError::NotSupported);
        }

        let profile: SharedBox<Self> =
            Self { observer_id: Cell::new(None), entries: RefCell::new(vec![]) }.into();

        let this = profile.downgrade();
        let attached = Rc::new(move |engine: &RasEngine, session: RasSession| {
            Self::with(&this, |profile| profile.on_attached(engine, session))
        });
        let this = profile.downgrade();
        let detached = Rc::new(move |engine: &RasEngine, session: RasSession| {
            Self::with(&this, |profile| profile.on_detached(engine, session))
        });
        profile.observer_id.set(engine.register(Some(attached), Some(detached)));

        info!("ranging profile started");
        Ok(profile)
    }

    fn with(this: &WeakBox<Self>, f: impl FnOnce(&Self)) {
        this.with(|profile| {
            if let Some(profile) = profile {
                f(&profile)
            }
        })
    }

    /// Stop observing the engine
    pub fn stop(&self, engine: &RasEngine) {
        if let Some(id) = self.observer_id.take() {
            engine.unregister(id);
        }
        info!("ranging profile stopped");
    }

    /// An adapter came up: register the service in its local database
    pub fn adapter_probe(&self, engine: &RasEngine, local_db: Rc<dyn AttributeDatabase>) {
        info!("ranging server probe");
        engine.add_db(local_db);
    }

    pub fn adapter_remove(&self) {
        info!("ranging server remove");
    }

    /// A device offering the service was found
    pub fn device_probe(
        &self,
        engine: &RasEngine,
        device: AddressWithType,
        local_db: Rc<dyn AttributeDatabase>,
        remote_db: Rc<dyn AttributeDatabase>,
    ) -> Result<(), RasError> {
        info!("probing {device}");
        if self.find(|entry| entry.probed && entry.device == device).is_some() {
            error!("profile probed twice for {device}");
            return Err(RasError::AlreadyProbed);
        }

        let session = engine.create(local_db, Some(remote_db)).inspect_err(|err| {
            error!("unable to create ranging session for {device}: {err}");
        })?;
        let ready_id = engine
            .register_ready_observer(
                session,
                Rc::new(move |_: &RasEngine, session: RasSession| {
                    debug!("{session:?} ready for {device}")
                }),
                None,
            )
            .ok();
        engine.set_user_data(session, Some(Rc::new(device)));

        self.entries.borrow_mut().push(DeviceEntry { device, session, ready_id, probed: true });
        Ok(())
    }

    /// The device went away
    pub fn device_remove(&self, engine: &RasEngine, device: AddressWithType) -> Result<(), RasError> {
        info!("removing {device}");
        let entry = self.take(|entry| entry.probed && entry.device == device).ok_or_else(|| {
            error!("{device} not handled by the ranging profile");
            RasError::NotFound
        })?;
        self.release(engine, entry);
        Ok(())
    }

    /// The device connected: attach its client to the probed session
    pub fn accept(
        &self,
        engine: &RasEngine,
        device: AddressWithType,
        client: Rc<dyn GattClient>,
    ) -> Result<(), RasError> {
        info!("accepting {device}");
        let session = self.find(|entry| entry.probed && entry.device == device).ok_or_else(|| {
            error!("{device} not handled by the ranging profile");
            RasError::NotFound
        })?;
        engine.attach(session, Some(client)).inspect_err(|err| {
            error!("unable to attach {device}: {err}");
        })
    }

    pub fn connect(&self, device: AddressWithType) -> Result<(), RasError> {
        info!("connecting {device}");
        Ok(())
    }

    pub fn disconnect(&self, device: AddressWithType) -> Result<(), RasError> {
        info!("disconnecting {device}");
        Ok(())
    }

    /// The session tracked for a device, if any
    pub fn session(&self, device: AddressWithType) -> Option<RasSession> {
        self.find(|entry| entry.device == device)
    }

    /// The devices tracked, in the order they were added
    pub fn devices(&self) -> Vec<AddressWithType> {
        self.entries.borrow().iter().map(|entry| entry.device).collect()
    }

    fn find(&self, pred: impl Fn(&DeviceEntry) -> bool) -> Option<RasSession> {
        self.entries.borrow().iter().find(|entry| pred(entry)).map(|entry| entry.session)
    }

    fn take(&self, pred: impl Fn(&DeviceEntry) -> bool) -> Option<DeviceEntry> {
        let mut entries = self.entries.borrow_mut();
        let pos = entries.iter().position(pred)?;
        Some(entries.remove(pos))
    }

    fn release(&self, engine: &RasEngine, entry: DeviceEntry) {
        if entry.probed {
            engine.set_user_data(entry.session, None);
        }
        if let Some(ready_id) = entry.ready_id {
            engine.unregister_ready_observer(entry.session, ready_id);
        }
        engine.unref_session(entry.session);
    }

    fn on_attached(&self, engine: &RasEngine, session: RasSession) {
        if self.find(|entry| entry.session == session).is_some() {
            return;
        }
        let Some(att) = engine.get_att(session) else {
            return;
        };
        let device = att.peer_address();
        if !engine.ref_session(session) {
            return;
        }
        debug!("tracking {session:?} for {device}");
        self.entries.borrow_mut().push(DeviceEntry {
            device,
            session,
            ready_id: None,
            probed: false,
        });
    }

    fn on_detached(&self, engine: &RasEngine, session: RasSession) {
        let Some(entry) = self.take(|entry| entry.session == session) else {
            debug!("{session:?} not tracked");
            return;
        };
        debug!("{session:?} of {} detached", entry.device);
        self.release(engine, entry);
    }
}
