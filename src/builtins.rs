//! Lazy built-in property instantiation (spec.md §4.5).
//!
//! Grounded directly on `ecma_builtin_try_to_instantiate_property` /
//! `ecma_builtin_list_lazy_property_names` in
//! `examples/original_source/jerry-core/ecma/builtin-objects/ecma-builtins.c`.
//! A built-in object (`Math`, `Object.prototype`, ...) is described once as
//! a static list of property descriptors; instead of eagerly creating every
//! property when the object is built, each built-in carries a 64-bit
//! "already instantiated" bitmap (split across two `u32`s, mirroring the
//! source's two internal properties) and a property is materialized the
//! first time it is looked up and never again.
//!
//! This crate has no heap/object model of its own (spec.md's Non-goals
//! exclude a VM), so `BuiltinObject` owns its instantiated properties
//! directly in a small map rather than installing them onto a shared
//! `ecma_object_t`; the bitmap-gated lazy-instantiation *algorithm* is what
//! this module exists to carry over; where it would live in a host's
//! object graph is the host's concern.

use ahash::AHashMap;
use bitflags::bitflags;

bitflags! {
    /// Per-property attribute bits (ECMA-262 v5 §8.6.1), carried on each
    /// descriptor exactly as the source's `ecma_property_descriptor_t`
    /// does.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropertyAttributes: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

/// A materialized property value. `Routine` carries the information needed
/// to build a callable wrapper (spec.md §4.5's "packed routine descriptor"):
/// the routine's own id within its built-in and its declared `.length`.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(&'static str),
    /// Another built-in object, referenced by id (e.g. `Object.prototype`).
    Object(BuiltinId),
    Routine { routine_id: u8, length: u8 },
}

/// How a descriptor's stored value should be interpreted into a
/// [`PropertyValue`] at instantiation time (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Simple,
    Number,
    String,
    Object,
    Routine,
}

/// One static, never-mutated entry in a built-in's property list.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: PropertyKind,
    /// Meaning depends on `kind`: a `SimpleValue` discriminant, a
    /// `NumberSlot` index, a magic string id, a `BuiltinId`, or — for
    /// `Routine` — a packed `(routine_id, length)` pair built by
    /// [`pack_routine`] and decoded by [`unpack_routine`].
    pub value: u32,
    pub attributes: PropertyAttributes,
}

/// A handful of well-known numeric constants too irregular to pack into a
/// descriptor's `value` field directly, indexed by `PropertyDescriptor`'s
/// `value` when `kind == Number` (spec.md §4.5, grounded on the source's
/// `builtin_number_list`).
pub const NUMBER_SLOTS: &[f64] = &[f64::MAX, f64::MIN_POSITIVE, std::f64::consts::E, std::f64::consts::PI];

pub const NUMBER_SLOT_MAX_VALUE: u32 = 0;
pub const NUMBER_SLOT_MIN_VALUE: u32 = 1;
pub const NUMBER_SLOT_E: u32 = 2;
pub const NUMBER_SLOT_PI: u32 = 3;

/// Identifies which static descriptor list (and, transitively, prototype
/// chain) a [`BuiltinObject`] was constructed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinId {
    Math,
    ObjectPrototype,
}

fn descriptor_list(id: BuiltinId) -> &'static [PropertyDescriptor] {
    match id {
        BuiltinId::Math => MATH_PROPERTIES,
        BuiltinId::ObjectPrototype => OBJECT_PROTOTYPE_PROPERTIES,
    }
}

/// Packs a `Routine`-kind descriptor's `value` field: low byte is the
/// routine id, next byte is the routine's declared `.length` (spec.md
/// §4.5's "packed routine descriptor").
const fn pack_routine(routine_id: u8, length: u8) -> u32 {
    (routine_id as u32) | ((length as u32) << 8)
}

/// Inverse of [`pack_routine`].
fn unpack_routine(value: u32) -> (u8, u8) {
    (value as u8, (value >> 8) as u8)
}

const READ_ONLY: PropertyAttributes = PropertyAttributes::empty();
const WRITABLE_CONFIGURABLE: PropertyAttributes =
    PropertyAttributes::from_bits_truncate(PropertyAttributes::WRITABLE.bits() | PropertyAttributes::CONFIGURABLE.bits());

/// `Math`'s own properties (spec.md §8 scenario 5's `Math.PI`).
pub static MATH_PROPERTIES: &[PropertyDescriptor] = &[
    PropertyDescriptor {
        name: "E",
        kind: PropertyKind::Number,
        value: NUMBER_SLOT_E,
        attributes: READ_ONLY,
    },
    PropertyDescriptor {
        name: "PI",
        kind: PropertyKind::Number,
        value: NUMBER_SLOT_PI,
        attributes: READ_ONLY,
    },
    PropertyDescriptor {
        name: "abs",
        kind: PropertyKind::Routine,
        // Math.abs.length === 1 (ECMA-262 v5 §15.8.2.1).
        value: pack_routine(0, 1),
        attributes: WRITABLE_CONFIGURABLE,
    },
    PropertyDescriptor {
        name: "floor",
        kind: PropertyKind::Routine,
        // Math.floor.length === 1 (ECMA-262 v5 §15.8.2.9).
        value: pack_routine(1, 1),
        attributes: WRITABLE_CONFIGURABLE,
    },
];

/// A minimal `Object.prototype` (enough to exercise the object/routine
/// descriptor kinds; a complete ES5 property list is outside this crate's
/// scope, which ends at compilation, not execution).
pub static OBJECT_PROTOTYPE_PROPERTIES: &[PropertyDescriptor] = &[PropertyDescriptor {
    name: "toString",
    kind: PropertyKind::Routine,
    // Object.prototype.toString.length === 0 (ECMA-262 v5 §15.2.4.2).
    value: pack_routine(0, 0),
    attributes: WRITABLE_CONFIGURABLE,
}];

/// A built-in object's lazily materialized property set: the 64-bit
/// instantiation bitmap (as two `u32`s, spec.md §4.5) plus whichever
/// properties have actually been instantiated so far.
#[derive(Debug)]
pub struct BuiltinObject {
    id: BuiltinId,
    mask_0_31: u32,
    mask_32_63: u32,
    instantiated: AHashMap<&'static str, PropertyValue>,
}

impl BuiltinObject {
    #[must_use]
    pub fn new(id: BuiltinId) -> Self {
        Self {
            id,
            mask_0_31: 0,
            mask_32_63: 0,
            instantiated: AHashMap::new(),
        }
    }

    fn bit_for_index(index: usize) -> (bool, u32) {
        if index < 32 {
            (true, 1u32 << index)
        } else {
            (false, 1u32 << (index - 32))
        }
    }

    /// Looks up `name`, materializing it on first access (spec.md §4.5).
    /// Returns `None` both when no such property exists on this built-in
    /// and when it was already instantiated (the caller is expected to
    /// have a regular property already installed in that case, exactly as
    /// the source's "this property was instantiated before" comment
    /// describes).
    pub fn try_instantiate(&mut self, name: &str) -> Option<&PropertyValue> {
        if let Some(value) = self.instantiated.get(name) {
            return Some(value);
        }

        let list = descriptor_list(self.id);
        let index = list.iter().position(|d| d.name == name)?;
        let descriptor = list[index];

        let (is_low, bit) = Self::bit_for_index(index);
        let mask = if is_low { &mut self.mask_0_31 } else { &mut self.mask_32_63 };
        if *mask & bit != 0 {
            return None;
        }
        *mask |= bit;

        let value = match descriptor.kind {
            PropertyKind::Simple => match descriptor.value {
                0 => PropertyValue::Undefined,
                1 => PropertyValue::Null,
                2 => PropertyValue::Bool(false),
                3 => PropertyValue::Bool(true),
                other => unreachable!("unknown simple value discriminant {other}"),
            },
            PropertyKind::Number => PropertyValue::Number(NUMBER_SLOTS[descriptor.value as usize]),
            PropertyKind::String => PropertyValue::String(descriptor.name),
            PropertyKind::Object => PropertyValue::Object(self.id),
            PropertyKind::Routine => {
                let (routine_id, length) = unpack_routine(descriptor.value);
                PropertyValue::Routine { routine_id, length }
            }
        };

        self.instantiated.insert(descriptor.name, value);
        self.instantiated.get(descriptor.name)
    }

    /// Enumerates every lazy property name, bucketing each into `main`
    /// (still lazy and enumerable) or `non_enumerable` (already instantiated,
    /// or lazy but declared non-enumerable). When `separate_enumerable` is
    /// `false` the two buckets are merged back into `main` before returning,
    /// so the caller gets one flat list — mirroring
    /// `ecma_builtin_list_lazy_property_names`'s `main`/`non_enum` collection
    /// split, which is always computed and only kept apart when the caller
    /// asked to tell enumerable properties from non-enumerable ones.
    ///
    /// Grounded line-for-line on the source's index==32 caching: the
    /// high-word mask is looked up once, the first time `index` crosses
    /// into the upper half, and reused for every later index rather than
    /// re-fetched on each iteration.
    #[must_use]
    pub fn list_lazy_property_names(&self, separate_enumerable: bool) -> (Vec<&'static str>, Vec<&'static str>) {
        let list = descriptor_list(self.id);
        let mut main = Vec::new();
        let mut non_enumerable = Vec::new();

        let mut cached_high_mask: Option<u32> = None;
        for (index, descriptor) in list.iter().enumerate() {
            let mask = if index < 32 {
                self.mask_0_31
            } else {
                *cached_high_mask.get_or_insert(self.mask_32_63)
            };
            let (_, bit) = Self::bit_for_index(index);
            let was_instantiated = mask & bit != 0;

            let goes_to_non_enumerable =
                !was_instantiated || !descriptor.attributes.contains(PropertyAttributes::ENUMERABLE);

            if goes_to_non_enumerable {
                non_enumerable.push(descriptor.name);
            } else {
                main.push(descriptor.name);
            }
        }

        if !separate_enumerable {
            main.append(&mut non_enumerable);
        }
        (main, non_enumerable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn instantiates_math_pi_once() {
        let mut math = BuiltinObject::new(BuiltinId::Math);
        let first = math.try_instantiate("PI").cloned();
        assert_eq!(first, Some(PropertyValue::Number(std::f64::consts::PI)));
        assert_eq!(math.mask_0_31 & (1 << 1), 1 << 1);
    }

    #[test]
    fn second_lookup_finds_cached_entry_rather_than_recreating() {
        let mut math = BuiltinObject::new(BuiltinId::Math);
        math.try_instantiate("E");
        let mask_before = math.mask_0_31;
        let value = math.try_instantiate("E").cloned();
        assert_eq!(mask_before, math.mask_0_31);
        assert_eq!(value, Some(PropertyValue::Number(std::f64::consts::E)));
    }

    #[test]
    fn unknown_property_name_instantiates_nothing() {
        let mut math = BuiltinObject::new(BuiltinId::Math);
        assert!(math.try_instantiate("doesNotExist").is_none());
    }

    #[test]
    fn routine_descriptor_packs_id_and_length() {
        assert_eq!(unpack_routine(pack_routine(7, 3)), (7, 3));

        let mut math = BuiltinObject::new(BuiltinId::Math);
        let abs = math.try_instantiate("abs").cloned().unwrap();
        assert_eq!(abs, PropertyValue::Routine { routine_id: 0, length: 1 });

        let mut object_proto = BuiltinObject::new(BuiltinId::ObjectPrototype);
        let to_string = object_proto.try_instantiate("toString").cloned().unwrap();
        assert_eq!(to_string, PropertyValue::Routine { routine_id: 0, length: 0 });
    }

    #[test]
    fn lazy_listing_reports_instantiated_properties_as_non_enumerable_own() {
        let mut math = BuiltinObject::new(BuiltinId::Math);
        math.try_instantiate("PI");
        let (main, non_enum) = math.list_lazy_property_names(true);
        assert!(non_enum.contains(&"PI"));
        assert!(!main.contains(&"PI"));
    }
}
