//! Saving and loading a registry.
//!
//! The persisted form is a nested JSON document:
//!
//! ```text
//! { "endpoints": { <type id>: { <owner uuid>: { <effect uuid>: EntryDoc } } } }
//! ```
//!
//! Dead entries are pruned before every save, so a document never contains
//! one. Loading is forgiving: a key or entry that cannot be read is skipped
//! and reported in the [`LoadReport`], and loading carries on with the rest.
//! Nothing is resolved at load time; owners and effects are looked up the
//! first time an entry is used.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::Entry;
use crate::identity::{EffectTypeId, EntryKey};
use crate::reference::{EntityReference, EntityValues};
use crate::registry::{Registry, RegistryConfig};
use crate::traits::WorldView;
use crate::EtherError;

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// Persisted state of one entry.
///
/// The owner snapshot is flattened into the entry. Only the owner `uuid` is
/// required; everything else defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDoc {
    #[serde(flatten)]
    pub owner: EntityValues,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub radius: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spell_id: Option<Uuid>,
    #[serde(default)]
    pub claimants: Vec<Uuid>,
}

/// Entries of one type, by owner then effect.
pub type OwnerMap = BTreeMap<Uuid, BTreeMap<Uuid, EntryDoc>>;

/// The persisted registry. `BTreeMap`s keep the output order stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtherDocument {
    #[serde(default)]
    pub endpoints: BTreeMap<EffectTypeId, OwnerMap>,
}

impl EtherDocument {
    /// Total number of entries in the document.
    pub fn entry_count(&self) -> usize {
        self.endpoints
            .values()
            .flat_map(|owners| owners.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn to_json(&self) -> Result<serde_json::Value, EtherError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// An entry (or subtree) that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// `type/owner/effect` path of what was skipped, as far as it was read.
    pub path: String,
    pub reason: String,
}

/// Outcome of [`Registry::deserialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Entries persisted as dead. Not an error, just not worth loading.
    pub dropped_dead: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadReport {
    fn skip(&mut self, path: String, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(path = %path, reason = %reason, "skipping persisted entry");
        self.skipped.push(SkippedEntry { path, reason });
    }
}

// ---------------------------------------------------------------------------
// Registry save/load
// ---------------------------------------------------------------------------

impl Registry {
    /// Prune dead entries, then capture every remaining entry.
    ///
    /// Liveness is probed during the prune, which is why the world is
    /// needed. Does not clear the dirty flag; call
    /// [`mark_saved`](Registry::mark_saved) once the document is stored.
    pub fn serialize(&self, world: &dyn WorldView) -> EtherDocument {
        let mut guard = self.lock(world);
        guard.prune();

        let mut document = EtherDocument::default();
        for effect_type in guard.effect_types() {
            for id in guard.entries_of_type(&effect_type) {
                let Some(entry) = guard.entry(id) else {
                    continue;
                };
                let key = entry.key().clone();
                let Some(doc) = entry_doc(entry) else {
                    tracing::warn!(key = %key, "entry has no owner snapshot -- not saved");
                    continue;
                };
                document
                    .endpoints
                    .entry(key.effect_type)
                    .or_default()
                    .entry(key.owner)
                    .or_default()
                    .insert(key.effect, doc);
            }
        }
        document
    }

    /// Build a registry from a persisted document.
    ///
    /// The root must be an object; an absent `endpoints` field means an
    /// empty registry. Below that, anything unreadable is skipped and
    /// reported rather than failing the load.
    ///
    /// # Errors
    ///
    /// Returns [`EtherError::MalformedDocument`] if the root or `endpoints`
    /// is not a JSON object.
    pub fn deserialize(
        config: RegistryConfig,
        document: &serde_json::Value,
    ) -> Result<(Registry, LoadReport), EtherError> {
        let root = document.as_object().ok_or_else(|| EtherError::MalformedDocument {
            details: "root is not an object".to_owned(),
        })?;
        let registry = Registry::new(config);
        let mut report = LoadReport::default();

        let endpoints = match root.get("endpoints") {
            None => return Ok((registry, report)),
            Some(value) => value.as_object().ok_or_else(|| EtherError::MalformedDocument {
                details: "endpoints is not an object".to_owned(),
            })?,
        };

        {
            let mut guard = registry.state_lock();
            let state = &mut *guard;
            for (raw_type, owners) in endpoints {
                let Ok(effect_type) = EffectTypeId::parse(raw_type) else {
                    report.skip(raw_type.clone(), "invalid effect type id");
                    continue;
                };
                let Some(owners) = owners.as_object() else {
                    report.skip(raw_type.clone(), "expected an object of owners");
                    continue;
                };
                for (raw_owner, effects) in owners {
                    let path = format!("{raw_type}/{raw_owner}");
                    let Ok(owner) = Uuid::parse_str(raw_owner) else {
                        report.skip(path, "invalid owner uuid");
                        continue;
                    };
                    let Some(effects) = effects.as_object() else {
                        report.skip(path, "expected an object of effects");
                        continue;
                    };
                    for (raw_effect, value) in effects {
                        let path = format!("{raw_type}/{raw_owner}/{raw_effect}");
                        let Ok(effect) = Uuid::parse_str(raw_effect) else {
                            report.skip(path, "invalid effect uuid");
                            continue;
                        };
                        let doc: EntryDoc = match serde_json::from_value(value.clone()) {
                            Ok(doc) => doc,
                            Err(e) => {
                                report.skip(path, e.to_string());
                                continue;
                            }
                        };
                        if doc.owner.uuid != owner {
                            report.skip(path, "owner uuid does not match key");
                            continue;
                        }
                        if doc.removed {
                            report.dropped_dead += 1;
                            continue;
                        }
                        let key = EntryKey::new(effect_type.clone(), owner, effect);
                        let entry = Entry::restored(
                            key.clone(),
                            EntityReference::from_values(doc.owner),
                            doc.spell_id,
                            (doc.pitch, doc.yaw, doc.radius),
                            doc.claimants.into_iter().collect::<BTreeSet<Uuid>>(),
                        );
                        let id = state.entries.insert(entry);
                        state.index.insert(key, id);
                        if let Some(entry) = state.entries.get(id) {
                            state.spatial.update(id, entry);
                        }
                        report.loaded += 1;
                    }
                }
            }
        }

        tracing::debug!(
            loaded = report.loaded,
            skipped = report.skipped.len(),
            dropped_dead = report.dropped_dead,
            "registry loaded"
        );
        Ok((registry, report))
    }
}

fn entry_doc(entry: &Entry) -> Option<EntryDoc> {
    Some(EntryDoc {
        owner: entry.owner().values()?.clone(),
        removed: entry.is_removed(),
        pitch: entry.pitch(),
        yaw: entry.yaw(),
        radius: entry.radius(),
        spell_id: entry.effect_id(),
        claimants: entry.claimants().collect(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(n: u128) -> String {
        Uuid::from_u128(n).to_string()
    }

    fn owner_fields(n: u128) -> serde_json::Value {
        json!({ "uuid": Uuid::from_u128(n), "pos": [17.5, 64.0, -3.2] })
    }

    #[test]
    fn missing_endpoints_is_empty_registry() {
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &json!({})).unwrap();
        assert!(registry.is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn non_object_root_is_an_error() {
        assert!(Registry::deserialize(RegistryConfig::default(), &json!([1, 2])).is_err());
        assert!(Registry::deserialize(RegistryConfig::default(), &json!({ "endpoints": 3 })).is_err());
    }

    #[test]
    fn missing_owner_uuid_skips_only_that_entry() {
        let good = owner_fields(1);
        let document = json!({
            "endpoints": {
                "ether:portal": {
                    (key(1)): {
                        (key(10)): good,
                        (key(11)): { "pitch": 3.0 },
                    }
                }
            }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with(&Uuid::from_u128(11).to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bad_keys_are_skipped() {
        let document = json!({
            "endpoints": {
                "not a type": {},
                "ether:portal": {
                    "not-a-uuid": {},
                    (key(1)): {
                        "also-not-a-uuid": owner_fields(1),
                    }
                }
            }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert!(registry.is_empty());
        assert_eq!(report.skipped.len(), 3);
    }

    #[test]
    fn snapshot_of_another_owner_is_skipped() {
        let document = json!({
            "endpoints": {
                "ether:ward": {
                    (key(1)): {
                        (key(2)): owner_fields(1),
                        (key(3)): owner_fields(9),
                    }
                }
            }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "owner uuid does not match key");
        assert!(report.skipped[0].path.ends_with(&key(3)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn pose_and_claims_survive_a_reload() {
        let mut fields = owner_fields(1);
        fields["pitch"] = json!(-42.5);
        fields["yaw"] = json!(170.25);
        fields["radius"] = json!(6.0);
        fields["spellId"] = json!(Uuid::from_u128(2));
        fields["claimants"] = json!([Uuid::from_u128(7), Uuid::from_u128(8)]);
        let document = json!({
            "endpoints": { "ether:portal": { (key(1)): { (key(2)): fields } } }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert_eq!(report.loaded, 1);

        let state = registry.state_lock();
        let id = *state.index.values().next().unwrap();
        let entry = state.entries.get(id).unwrap();
        assert_eq!(entry.pitch(), -42.5);
        assert_eq!(entry.yaw(), 170.25);
        assert_eq!(entry.radius(), 6.0);
        assert_eq!(entry.effect_id(), Some(Uuid::from_u128(2)));
        assert!(entry.is_claimed_by(Uuid::from_u128(7)));
        assert!(entry.is_claimed_by(Uuid::from_u128(8)));

        let doc = entry_doc(entry).unwrap();
        assert_eq!(doc.pitch, -42.5);
        assert_eq!(doc.yaw, 170.25);
        assert_eq!(doc.claimants, vec![Uuid::from_u128(7), Uuid::from_u128(8)]);
    }

    #[test]
    fn optional_fields_default() {
        let document = json!({
            "endpoints": {
                "ether:ward": {
                    (key(1)): {
                        (key(2)): { "uuid": Uuid::from_u128(1) },
                    }
                }
            }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert_eq!(report.loaded, 1);
        let state = registry.state_lock();
        let id = *state.index.values().next().unwrap();
        let entry = state.entries.get(id).unwrap();
        assert_eq!(entry.radius(), 0.0);
        assert_eq!(entry.effect_id(), None);
        assert!(!entry.has_claimant());
    }

    #[test]
    fn persisted_dead_entries_are_dropped() {
        let mut fields = owner_fields(1);
        fields["removed"] = json!(true);
        let document = json!({
            "endpoints": {
                "ether:portal": {
                    (key(1)): { (key(2)): fields }
                }
            }
        });
        let (registry, report) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        assert!(registry.is_empty());
        assert_eq!(report.dropped_dead, 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn loaded_entries_are_filed_at_last_known_position() {
        let document = json!({
            "endpoints": {
                "ether:portal": {
                    (key(1)): {
                        (key(2)): owner_fields(1),
                    }
                }
            }
        });
        let (registry, _) = Registry::deserialize(RegistryConfig::default(), &document).unwrap();
        let state = registry.state_lock();
        let id = *state.index.values().next().unwrap();
        assert!(state
            .spatial
            .get_state(crate::math::BlockPos::new(17, 64, -4))
            .contains(&id));
    }

    #[test]
    fn entry_doc_uses_camel_case_field_names() {
        let doc = EntryDoc {
            owner: serde_json::from_value(owner_fields(1)).unwrap(),
            removed: false,
            pitch: 1.0,
            yaw: 2.0,
            radius: 3.0,
            spell_id: Some(Uuid::from_u128(5)),
            claimants: vec![Uuid::from_u128(6)],
        };
        let value = serde_json::to_value(&doc).unwrap();
        for field in ["uuid", "pos", "clientId", "isPlayer", "isDead", "level", "corruption", "spellId", "claimants"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
