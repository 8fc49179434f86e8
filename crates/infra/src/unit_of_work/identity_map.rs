use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use super::change_set::{EntityChangeSet, Snapshot, snapshot};
use crate::entity::EntityKey;
use crate::store::Versioned;

/// Lifecycle state of a managed entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Persisted in this transaction; scheduled for insert.
    New,
    /// Loaded from the store; updated if its fields change.
    Managed,
    /// Loaded from the store and scheduled for delete.
    Removed,
}

#[derive(Debug)]
pub(crate) struct Tracked<T> {
    pub(crate) entity: T,
    /// Snapshot taken at load time; `None` for new entities.
    pub(crate) original: Option<Snapshot>,
    /// Store version at load time; `None` for new entities.
    pub(crate) version: Option<u64>,
    pub(crate) state: EntityState,
}

impl<T: Serialize> Tracked<T> {
    pub(crate) fn change_set(&self, key: EntityKey) -> Result<Option<EntityChangeSet>, serde_json::Error> {
        match (self.state, &self.original) {
            (EntityState::New, _) => Ok(Some(EntityChangeSet::insert(key, &snapshot(&self.entity)?))),
            (EntityState::Removed, Some(original)) => Ok(Some(EntityChangeSet::delete(key, original))),
            (EntityState::Managed, Some(original)) => {
                Ok(EntityChangeSet::update(key, original, &snapshot(&self.entity)?))
            }
            (_, None) => Ok(None),
        }
    }
}

/// One managed instance per identifier for a single entity kind.
#[derive(Debug)]
pub(crate) struct IdentityMap<Id, T> {
    rows: HashMap<Id, Tracked<T>>,
}

impl<Id, T> Default for IdentityMap<Id, T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }
}

impl<Id, T> IdentityMap<Id, T>
where
    Id: Copy + Eq + Hash,
    T: Serialize,
{
    pub(crate) fn contains(&self, id: &Id) -> bool {
        self.rows.contains_key(id)
    }

    pub(crate) fn tracked(&self, id: &Id) -> Option<&Tracked<T>> {
        self.rows.get(id)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Tracked<T>> {
        self.rows.values()
    }

    /// `false` if the identifier is already managed.
    pub(crate) fn schedule_insert(&mut self, id: Id, entity: T) -> bool {
        if self.rows.contains_key(&id) {
            return false;
        }
        self.rows.insert(
            id,
            Tracked {
                entity,
                original: None,
                version: None,
                state: EntityState::New,
            },
        );
        true
    }

    pub(crate) fn manage_loaded(&mut self, id: Id, row: Versioned<T>) -> Result<(), serde_json::Error> {
        let original = snapshot(&row.entity)?;
        self.rows.insert(
            id,
            Tracked {
                entity: row.entity,
                original: Some(original),
                version: Some(row.version),
                state: EntityState::Managed,
            },
        );
        Ok(())
    }

    /// Visible (not removed) entity.
    pub(crate) fn get(&self, id: &Id) -> Option<&T> {
        self.rows
            .get(id)
            .filter(|t| t.state != EntityState::Removed)
            .map(|t| &t.entity)
    }

    pub(crate) fn get_mut(&mut self, id: &Id) -> Option<&mut T> {
        self.rows
            .get_mut(id)
            .filter(|t| t.state != EntityState::Removed)
            .map(|t| &mut t.entity)
    }

    /// Schedule a delete. New entities are forgotten instead.
    ///
    /// Returns the state the entity had, or `None` if it is not managed.
    pub(crate) fn remove(&mut self, id: &Id) -> Option<EntityState> {
        let state = self.rows.get(id)?.state;
        match state {
            EntityState::New => {
                self.rows.remove(id);
            }
            EntityState::Managed => {
                if let Some(tracked) = self.rows.get_mut(id) {
                    tracked.state = EntityState::Removed;
                }
            }
            EntityState::Removed => {}
        }
        Some(state)
    }
}
