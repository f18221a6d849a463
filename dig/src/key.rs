//! Canonical identity of a dependency slot.
//!
//! A [`Key`] is either the sole producer of an exact `(type, name)` pair, or
//! one contributor to a named collection of a type. Keys are structural:
//! equality and hashing never consider anything but the type and the slot.

use std::any::{type_name, TypeId};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

/// Which shape of slot a [`Key`] addresses.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Slot {
    /// The single producer of this exact `(type, name)` pair.
    Value(Option<&'static str>),
    /// One of potentially many contributors to a named group.
    Group(&'static str),
}

/// Identifies a dependency slot: a single named value, or a member of a
/// named group. Two `Key`s are equal iff they share a type and slot.
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    slot: Slot,
}

impl Key {
    /// The key for the sole, unnamed producer of `T`.
    pub fn value<T: 'static>() -> Self {
        Self { type_id: TypeId::of::<T>(), type_name: type_name::<T>(), slot: Slot::Value(None) }
    }

    /// The key for the sole producer of `T` registered under `name`.
    pub fn named<T: 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            slot: Slot::Value(Some(name)),
        }
    }

    /// The key for a contributor to the `group` collection of `T`.
    pub fn group<T: 'static>(group: &'static str) -> Self {
        Self { type_id: TypeId::of::<T>(), type_name: type_name::<T>(), slot: Slot::Group(group) }
    }

    /// `true` if this key addresses a group rather than a single value.
    pub fn is_group(&self) -> bool {
        matches!(self.slot, Slot::Group(_))
    }

    /// The `name` directive this key was pinned with, if any.
    pub fn name(&self) -> Option<&'static str> {
        match self.slot {
            Slot::Value(n) => n,
            Slot::Group(_) => None,
        }
    }

    /// The group name this key belongs to, if any.
    pub fn group_name(&self) -> Option<&'static str> {
        match self.slot {
            Slot::Value(_) => None,
            Slot::Group(g) => Some(g),
        }
    }

    /// The `TypeId` of the produced type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The `std::any::type_name` of the produced type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// A stable, human-readable form used in diagnostics: `T`,
    /// `T[name="n"]`, or `T[group="g"]`.
    pub fn display_name(&self) -> String {
        format!("{}", self)
    }

    /// The same type, re-pinned to the named value slot. Used when a result
    /// override (e.g. `ProvideOptions::name`) needs to rename an already
    /// type-erased key without recovering the concrete type.
    pub fn with_name(&self, name: &'static str) -> Self {
        Self { type_id: self.type_id, type_name: self.type_name, slot: Slot::Value(Some(name)) }
    }

    /// The same type, re-pinned to a group slot.
    pub fn with_group(&self, group: &'static str) -> Self {
        Self { type_id: self.type_id, type_name: self.type_name, slot: Slot::Group(group) }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.slot == other.slot
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.slot.hash(state);
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.slot {
            Slot::Value(None) => write!(f, "{}", self.type_name),
            Slot::Value(Some(name)) => write!(f, "{}[name=\"{}\"]", self.type_name, name),
            Slot::Group(group) => write!(f, "{}[group=\"{}\"]", self.type_name, group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_keys_compare_by_type_only() {
        assert_eq!(Key::value::<u8>(), Key::value::<u8>());
        assert_ne!(Key::value::<u8>(), Key::value::<u16>());
    }

    #[test]
    fn named_keys_are_distinct_from_unnamed() {
        assert_ne!(Key::value::<u8>(), Key::named::<u8>("x"));
        assert_eq!(Key::named::<u8>("x"), Key::named::<u8>("x"));
        assert_ne!(Key::named::<u8>("x"), Key::named::<u8>("y"));
    }

    #[test]
    fn group_keys_are_distinct_from_value_keys() {
        assert_ne!(Key::value::<u8>(), Key::group::<u8>("g"));
        assert_eq!(Key::group::<u8>("g"), Key::group::<u8>("g"));
    }

    #[test]
    fn display_forms_are_readable() {
        assert_eq!(Key::value::<u8>().display_name(), "u8");
        assert_eq!(Key::named::<u8>("primary").display_name(), "u8[name=\"primary\"]");
        assert_eq!(Key::group::<u8>("nums").display_name(), "u8[group=\"nums\"]");
    }

    #[test]
    fn with_name_and_with_group_preserve_type_identity() {
        let value = Key::value::<u8>();
        assert_eq!(value.with_name("x"), Key::named::<u8>("x"));
        assert_eq!(value.with_group("g"), Key::group::<u8>("g"));
    }
}
