//! Identity of tracked effects.
//!
//! Every entry in the registry is identified by three ids, from coarsest to
//! finest:
//!
//! - [`EffectTypeId`]: which kind of effect (`"ether:portal"`).
//! - The owner's [`Uuid`]: which actor cast it.
//! - The effect's [`Uuid`]: which instance of that effect.
//!
//! [`EntryKey`] bundles the three. It orders by type, then owner, then
//! effect, so "every entry of one type" and "every entry of one type for one
//! owner" are both contiguous ranges of an ordered map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EtherError;

const UUID_MAX: Uuid = Uuid::from_u128(u128::MAX);

// ---------------------------------------------------------------------------
// EffectTypeId
// ---------------------------------------------------------------------------

/// A namespaced effect type id of the form `namespace:path`.
///
/// Both halves are restricted to lowercase ASCII letters, digits, `_`, `-`,
/// `.` and (in the path only) `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EffectTypeId(String);

impl EffectTypeId {
    /// Parse a type id, rejecting empty or malformed input.
    pub fn parse(raw: &str) -> Result<Self, EtherError> {
        let invalid = || EtherError::InvalidTypeId {
            raw: raw.to_owned(),
        };
        let (namespace, path) = raw.split_once(':').ok_or_else(invalid)?;
        let plain = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-.".contains(c);
        if namespace.is_empty() || path.is_empty() {
            return Err(invalid());
        }
        if !namespace.chars().all(plain) || !path.chars().all(|c| plain(c) || c == '/') {
            return Err(invalid());
        }
        Ok(Self(raw.to_owned()))
    }

    /// Build a type id from a compile-time literal.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is not a valid type id.
    pub fn from_static(raw: &'static str) -> Self {
        match Self::parse(raw) {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }

    pub fn path(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, path)| path)
    }
}

impl FromStr for EffectTypeId {
    type Err = EtherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EffectTypeId {
    type Error = EtherError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EffectTypeId> for String {
    fn from(id: EffectTypeId) -> Self {
        id.0
    }
}

impl fmt::Display for EffectTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// EntryKey
// ---------------------------------------------------------------------------

/// The composite identity of one entry: `(type, owner, effect)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub effect_type: EffectTypeId,
    pub owner: Uuid,
    pub effect: Uuid,
}

impl EntryKey {
    pub fn new(effect_type: EffectTypeId, owner: Uuid, effect: Uuid) -> Self {
        Self {
            effect_type,
            owner,
            effect,
        }
    }

    /// Inclusive key bounds covering every entry of `effect_type`.
    pub(crate) fn type_bounds(effect_type: &EffectTypeId) -> (EntryKey, EntryKey) {
        (
            EntryKey::new(effect_type.clone(), Uuid::nil(), Uuid::nil()),
            EntryKey::new(effect_type.clone(), UUID_MAX, UUID_MAX),
        )
    }

    /// Inclusive key bounds covering every entry of `effect_type` owned by
    /// `owner`.
    pub(crate) fn owner_bounds(effect_type: &EffectTypeId, owner: Uuid) -> (EntryKey, EntryKey) {
        (
            EntryKey::new(effect_type.clone(), owner, Uuid::nil()),
            EntryKey::new(effect_type.clone(), owner, UUID_MAX),
        )
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.effect_type, self.owner, self.effect)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_namespaced_ids() {
        let id = EffectTypeId::parse("ether:portal").unwrap();
        assert_eq!(id.namespace(), "ether");
        assert_eq!(id.path(), "portal");
        assert!(EffectTypeId::parse("ether:spells/ward_2").is_ok());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        for raw in ["", "portal", ":portal", "ether:", "Ether:portal", "a/b:c", "a:b c"] {
            assert!(EffectTypeId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn type_id_serializes_as_plain_string() {
        let id = EffectTypeId::parse("ether:hydrophobic").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ether:hydrophobic\"");
        assert!(serde_json::from_str::<EffectTypeId>("\"bogus\"").is_err());
    }

    #[test]
    fn owner_bounds_contain_only_that_owner() {
        let ty = EffectTypeId::parse("ether:portal").unwrap();
        let owner = Uuid::from_u128(7);
        let (lo, hi) = EntryKey::owner_bounds(&ty, owner);
        let inside = EntryKey::new(ty.clone(), owner, Uuid::from_u128(99));
        let other_owner = EntryKey::new(ty.clone(), Uuid::from_u128(8), Uuid::nil());
        assert!(lo <= inside && inside <= hi);
        assert!(other_owner > hi);
    }

    #[test]
    fn type_bounds_exclude_other_types() {
        let portal = EffectTypeId::parse("ether:portal").unwrap();
        let ward = EffectTypeId::parse("ether:ward").unwrap();
        let (lo, hi) = EntryKey::type_bounds(&portal);
        let key = EntryKey::new(ward, Uuid::nil(), Uuid::nil());
        assert!(!(lo <= key && key <= hi));
    }
}
