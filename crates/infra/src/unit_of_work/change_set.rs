//! Field-level change sets computed from serde snapshots.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::entity::EntityKey;

/// Serialized field values of an entity at one point in time.
pub(crate) type Snapshot = Map<String, JsonValue>;

/// Operation an entity is scheduled for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PendingOp {
    Insert,
    Update,
    Delete,
}

/// Old and new value of one field. Missing sides are `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub old: JsonValue,
    pub new: JsonValue,
}

/// Pending operation of one entity plus its field diff.
///
/// - `Insert`: every field, `old` is `null`.
/// - `Update`: only the fields that differ from the loaded snapshot.
/// - `Delete`: every field of the loaded snapshot, `new` is `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChangeSet {
    key: EntityKey,
    op: PendingOp,
    fields: BTreeMap<String, FieldChange>,
}

impl EntityChangeSet {
    pub(crate) fn insert(key: EntityKey, current: &Snapshot) -> Self {
        let fields = current
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    FieldChange {
                        old: JsonValue::Null,
                        new: value.clone(),
                    },
                )
            })
            .collect();
        Self {
            key,
            op: PendingOp::Insert,
            fields,
        }
    }

    /// `None` when nothing changed.
    pub(crate) fn update(key: EntityKey, original: &Snapshot, current: &Snapshot) -> Option<Self> {
        let mut fields = BTreeMap::new();
        for (name, new) in current {
            let old = original.get(name).cloned().unwrap_or(JsonValue::Null);
            if &old != new {
                fields.insert(
                    name.clone(),
                    FieldChange {
                        old,
                        new: new.clone(),
                    },
                );
            }
        }
        for (name, old) in original {
            if !current.contains_key(name) {
                fields.insert(
                    name.clone(),
                    FieldChange {
                        old: old.clone(),
                        new: JsonValue::Null,
                    },
                );
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some(Self {
                key,
                op: PendingOp::Update,
                fields,
            })
        }
    }

    /// Update without field changes. Still written, so the row's version is checked
    /// and bumped.
    pub(crate) fn touch(key: EntityKey) -> Self {
        Self {
            key,
            op: PendingOp::Update,
            fields: BTreeMap::new(),
        }
    }

    pub(crate) fn delete(key: EntityKey, original: &Snapshot) -> Self {
        let fields = original
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    FieldChange {
                        old: value.clone(),
                        new: JsonValue::Null,
                    },
                )
            })
            .collect();
        Self {
            key,
            op: PendingOp::Delete,
            fields,
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn op(&self) -> PendingOp {
        self.op
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldChange> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldChange> {
        self.fields.get(name)
    }

    pub fn changes(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Original snapshot with this change set's new values applied.
    pub(crate) fn apply_to(&self, original: Option<&Snapshot>) -> Snapshot {
        let mut row = original.cloned().unwrap_or_default();
        for (name, change) in &self.fields {
            row.insert(name.clone(), change.new.clone());
        }
        row
    }
}

pub(crate) fn snapshot<T: Serialize>(entity: &T) -> Result<Snapshot, serde_json::Error> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(<serde_json::Error as serde::ser::Error>::custom(
            "managed entities must serialize to an object",
        )),
    }
}

pub(crate) fn materialize<T: DeserializeOwned>(row: Snapshot) -> Result<T, serde_json::Error> {
    serde_json::from_value(JsonValue::Object(row))
}
