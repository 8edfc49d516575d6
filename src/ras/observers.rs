//! FIFO registries keyed by non-zero ids. Every registry the engine owns
//! (attachment observers, readiness observers, notification subscriptions,
//! pending requests) is one of these.

use std::fmt::Debug;

/// An id handed out by an [ObserverList]
pub trait ListId: Copy + Eq + Debug {
    /// Wrap a raw, non-zero id
    fn from_raw(raw: u32) -> Self;
}

macro_rules! list_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl ListId for $name {
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

list_id!(
    /// Identifies an engine-wide attachment observer
    ObserverId
);
list_id!(
    /// Identifies a readiness observer of one session
    ReadyObserverId
);
list_id!(
    /// Identifies a notification subscription of one session
    SubscriptionId
);
list_id!(
    /// Identifies a pending request of one session
    RequestId
);

/// An ordered registry. Entries keep their registration order; ids are never
/// zero and not reused until the counter wraps.
pub struct ObserverList<I, T> {
    last_id: u32,
    entries: Vec<(I, T)>,
}

impl<I: ListId, T> Default for ObserverList<I, T> {
    fn default() -> Self {
        Self { last_id: 0, entries: vec![] }
    }
}

impl<I: ListId, T> ObserverList<I, T> {
    /// Append an entry, returning its id
    pub fn push(&mut self, entry: T) -> I {
        self.last_id = self.last_id.checked_add(1).unwrap_or(1);
        let id = I::from_raw(self.last_id);
        self.entries.push((id, entry));
        id
    }

    /// Remove an entry. Returns None (and changes nothing) if the id is unknown.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let pos = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.entries.iter().find(|(entry_id, _)| *entry_id == id).map(|(_, entry)| entry)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// The ids, in registration order
    pub fn ids(&self) -> Vec<I> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Remove every entry, in registration order
    pub fn drain(&mut self) -> Vec<(I, T)> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
