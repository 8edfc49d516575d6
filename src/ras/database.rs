//! Ranging databases and the registry that deduplicates them by identity

use std::{cell::RefCell, rc::Rc};

use log::{debug, info};

use crate::gatt::att_database::AttributeDatabase;

use super::{
    characteristics::{discover, register_ras_service, CharacteristicSet},
    error::RasError,
};

/// An attribute database plus the ranging characteristics known in it
pub struct RangingDatabase {
    db: Rc<dyn AttributeDatabase>,
    characteristics: RefCell<CharacteristicSet>,
}

impl RangingDatabase {
    /// Register the service layout against a local database
    pub fn register(db: Rc<dyn AttributeDatabase>, features: u32) -> anyhow::Result<Self> {
        let characteristics = register_ras_service(db.as_ref(), features)?;
        Ok(Self { db, characteristics: RefCell::new(characteristics) })
    }

    /// Wrap a peer's database; its characteristics are filled in by discovery
    pub fn remote(db: Rc<dyn AttributeDatabase>) -> Self {
        Self { db, characteristics: Default::default() }
    }

    pub fn database(&self) -> Rc<dyn AttributeDatabase> {
        self.db.clone()
    }

    /// Whether this wraps exactly `db` (identity, not contents)
    pub fn is(&self, db: &Rc<dyn AttributeDatabase>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.db), Rc::as_ptr(db))
    }

    /// A snapshot of the characteristics known so far
    pub fn characteristics(&self) -> CharacteristicSet {
        self.characteristics.borrow().clone()
    }

    /// Map the ranging service of the wrapped database. Fields already
    /// assigned are kept.
    pub fn discover(&self) -> usize {
        let assigned = discover(self.db.as_ref(), &mut self.characteristics.borrow_mut());
        debug!("discovery assigned {assigned} new fields");
        assigned
    }
}

/// Maps each distinct local database to the one RangingDatabase registered
/// against it
#[derive(Default)]
pub struct DatabaseRegistry {
    entries: RefCell<Vec<Rc<RangingDatabase>>>,
}

impl DatabaseRegistry {
    /// Look `db` up by identity, registering the service layout against it on
    /// first use. Nothing is kept if registration fails.
    pub fn get_or_create(
        &self,
        db: Rc<dyn AttributeDatabase>,
        features: u32,
    ) -> Result<Rc<RangingDatabase>, RasError> {
        if let Some(existing) = self.find(&db) {
            return Ok(existing);
        }
        let entry =
            Rc::new(RangingDatabase::register(db, features).map_err(RasError::RegistrationFailed)?);
        self.entries.borrow_mut().push(entry.clone());
        info!("ranging database added, {} registered", self.len());
        Ok(entry)
    }

    pub fn find(&self, db: &Rc<dyn AttributeDatabase>) -> Option<Rc<RangingDatabase>> {
        self.entries.borrow().iter().find(|entry| entry.is(db)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
