//! Structural fingerprints of serializable values.
//!
//! A value is hashed by driving its `Serialize` impl into a hashing
//! serializer, so the included members are exactly the members the store
//! would persist. Struct fields contribute in declaration order together with
//! their names. Maps are combined order-independently; sequences keep their
//! order unless the field opts in with [`unordered`] or is an
//! [`UnorderedSet`].
//!
//! A plain `HashSet` serializes as a sequence in iteration order, and that
//! order changes between instances holding the same elements (a set that was
//! reloaded from the store, for example). Such fields hash differently
//! although nothing changed, so entities should declare them as
//! [`UnorderedSet`] or mark them with [`unordered`].

use crate::error::{DriverError, Result};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{self, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};

/// Maximum nesting depth before a value is treated as cyclic.
pub const MAX_DEPTH: usize = 128;

const UNORDERED_TOKEN: &str = "$docpad::hash::Unordered";

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_CHAR: u8 = 5;
const TAG_STR: u8 = 6;
const TAG_BYTES: u8 = 7;
const TAG_NONE: u8 = 8;
const TAG_SOME: u8 = 9;
const TAG_UNIT: u8 = 10;
const TAG_VARIANT: u8 = 11;
const TAG_SEQ: u8 = 12;
const TAG_MAP: u8 = 13;
const TAG_STRUCT: u8 = 14;

/// Opaque snapshot of an entity's persisted field values.
///
/// Only meaningful when compared with another fingerprint of the same type
/// taken in the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the structural fingerprint of `value`.
///
/// Fails with [`DriverError::CyclicStructure`] when the value nests deeper
/// than [`MAX_DEPTH`], which is how a self-referencing value shows up.
///
/// Sequences are hashed in the order they serialize. Use [`UnorderedSet`] or
/// [`unordered`] for hash-ordered containers, see the module docs.
pub fn deep_hash<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint> {
    let mut hasher = StructuralHasher::new();
    value.serialize(&mut hasher)?;
    Ok(Fingerprint(hasher.finish()))
}

/// `serialize_with` helper for fields backed by an unordered container such
/// as `HashSet`. Other serializers see the inner value unchanged.
///
/// ```
/// use std::collections::HashSet;
///
/// #[derive(serde::Serialize)]
/// struct Post {
///     #[serde(serialize_with = "docpad::hash::unordered")]
///     tags: HashSet<String>,
/// }
/// ```
pub fn unordered<T, S>(value: &T, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: Serialize + ?Sized,
    S: ser::Serializer,
{
    serializer.serialize_newtype_struct(UNORDERED_TOKEN, value)
}

/// A `HashSet` whose fingerprint does not depend on iteration order.
///
/// Serializes and deserializes exactly like the wrapped set for every other
/// serializer, so stored documents are unchanged.
///
/// ```
/// use docpad::hash::{deep_hash, UnorderedSet};
///
/// let a: UnorderedSet<&str> = ["red", "green", "blue"].into_iter().collect();
/// let b: UnorderedSet<&str> = ["blue", "green", "red"].into_iter().collect();
/// assert_eq!(deep_hash(&a).unwrap(), deep_hash(&b).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct UnorderedSet<T>(pub HashSet<T>);

impl<T: Eq + Hash> PartialEq for UnorderedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Eq + Hash> Eq for UnorderedSet<T> {}

impl<T> UnorderedSet<T> {
    pub fn new() -> Self {
        Self(HashSet::new())
    }

    pub fn into_inner(self) -> HashSet<T> {
        self.0
    }
}

impl<T> Default for UnorderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for UnorderedSet<T> {
    type Target = HashSet<T>;

    fn deref(&self) -> &HashSet<T> {
        &self.0
    }
}

impl<T> DerefMut for UnorderedSet<T> {
    fn deref_mut(&mut self) -> &mut HashSet<T> {
        &mut self.0
    }
}

impl<T> From<HashSet<T>> for UnorderedSet<T> {
    fn from(set: HashSet<T>) -> Self {
        Self(set)
    }
}

impl<T: Eq + Hash> FromIterator<T> for UnorderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Serialize> Serialize for UnorderedSet<T> {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        unordered(&self.0, serializer)
    }
}

impl<'de, T> Deserialize<'de> for UnorderedSet<T>
where
    T: Deserialize<'de> + Eq + Hash,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        HashSet::deserialize(deserializer).map(Self)
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HashError {
    #[error("nesting exceeded {0} levels")]
    TooDeep(usize),
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for HashError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        HashError::Custom(msg.to_string())
    }
}

impl From<HashError> for DriverError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::TooDeep(limit) => DriverError::CyclicStructure { limit },
            HashError::Custom(msg) => DriverError::Serialization(msg),
        }
    }
}

type HashResult = std::result::Result<(), HashError>;

pub(crate) struct StructuralHasher {
    state: DefaultHasher,
    depth: usize,
    unordered_next: bool,
}

impl StructuralHasher {
    fn new() -> Self {
        Self {
            state: DefaultHasher::new(),
            depth: 0,
            unordered_next: false,
        }
    }

    /// A fresh hasher for one entry of an order-independent combination.
    /// It inherits the current depth so cycles through maps are still caught.
    fn child(&self) -> Self {
        Self {
            state: DefaultHasher::new(),
            depth: self.depth,
            unordered_next: false,
        }
    }

    fn finish(&self) -> u64 {
        self.state.finish()
    }

    fn tag(&mut self, tag: u8) {
        self.state.write_u8(tag);
    }

    fn write_name(&mut self, name: &str) {
        self.state.write(name.as_bytes());
        self.state.write_u8(0xff);
    }

    fn enter(&mut self) -> HashResult {
        if self.depth >= MAX_DEPTH {
            return Err(HashError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn take_unordered(&mut self) -> bool {
        std::mem::take(&mut self.unordered_next)
    }

    fn nested<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.enter()?;
        value.serialize(&mut *self)?;
        self.leave();
        Ok(())
    }
}

pub(crate) struct Compound<'a> {
    hasher: &'a mut StructuralHasher,
    /// Running commutative sum when element order must not matter.
    combined: Option<u64>,
    /// Map key whose value has not arrived yet.
    pending: Option<StructuralHasher>,
    len: u64,
}

impl<'a> Compound<'a> {
    fn open(hasher: &'a mut StructuralHasher, tag: u8, unordered: bool) -> std::result::Result<Self, HashError> {
        hasher.enter()?;
        hasher.tag(tag);
        Ok(Self {
            hasher,
            combined: unordered.then_some(0),
            pending: None,
            len: 0,
        })
    }

    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.len += 1;
        match &mut self.combined {
            None => value.serialize(&mut *self.hasher),
            Some(acc) => {
                let mut entry = self.hasher.child();
                value.serialize(&mut entry)?;
                *acc = acc.wrapping_add(entry.finish());
                Ok(())
            }
        }
    }

    fn field<T: Serialize + ?Sized>(&mut self, name: &'static str, value: &T) -> HashResult {
        self.hasher.write_name(name);
        self.element(value)
    }

    fn close(self) -> HashResult {
        if let Some(acc) = self.combined {
            self.hasher.state.write_u64(acc);
        }
        self.hasher.state.write_u64(self.len);
        self.hasher.leave();
        Ok(())
    }
}

impl<'a> ser::Serializer for &'a mut StructuralHasher {
    type Ok = ();
    type Error = HashError;

    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = Compound<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    fn serialize_bool(self, v: bool) -> HashResult {
        self.tag(TAG_BOOL);
        self.state.write_u8(v as u8);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> HashResult {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> HashResult {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> HashResult {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> HashResult {
        self.tag(TAG_INT);
        self.state.write_i64(v);
        Ok(())
    }

    fn serialize_i128(self, v: i128) -> HashResult {
        self.tag(TAG_INT);
        self.state.write_i128(v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> HashResult {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> HashResult {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> HashResult {
        self.serialize_u64(v as u64)
    }

    fn serialize_u64(self, v: u64) -> HashResult {
        self.tag(TAG_UINT);
        self.state.write_u64(v);
        Ok(())
    }

    fn serialize_u128(self, v: u128) -> HashResult {
        self.tag(TAG_UINT);
        self.state.write_u128(v);
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> HashResult {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> HashResult {
        // All NaNs compare as one value.
        let bits = if v.is_nan() { f64::NAN.to_bits() } else { v.to_bits() };
        self.tag(TAG_FLOAT);
        self.state.write_u64(bits);
        Ok(())
    }

    fn serialize_char(self, v: char) -> HashResult {
        self.tag(TAG_CHAR);
        self.state.write_u32(v as u32);
        Ok(())
    }

    fn serialize_str(self, v: &str) -> HashResult {
        self.tag(TAG_STR);
        self.write_name(v);
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> HashResult {
        self.tag(TAG_BYTES);
        self.state.write_usize(v.len());
        self.state.write(v);
        Ok(())
    }

    fn serialize_none(self) -> HashResult {
        self.tag(TAG_NONE);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> HashResult {
        self.tag(TAG_SOME);
        self.nested(value)
    }

    fn serialize_unit(self) -> HashResult {
        self.tag(TAG_UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, name: &'static str) -> HashResult {
        self.tag(TAG_UNIT);
        self.write_name(name);
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> HashResult {
        self.tag(TAG_VARIANT);
        self.state.write_u32(variant_index);
        self.write_name(variant);
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> HashResult {
        if name == UNORDERED_TOKEN {
            self.unordered_next = true;
            let result = value.serialize(&mut *self);
            self.unordered_next = false;
            return result;
        }
        self.take_unordered();
        self.nested(value)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> HashResult {
        self.take_unordered();
        self.tag(TAG_VARIANT);
        self.state.write_u32(variant_index);
        self.write_name(variant);
        self.nested(value)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Compound<'a>, HashError> {
        let unordered = self.take_unordered();
        Compound::open(self, TAG_SEQ, unordered)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Compound<'a>, HashError> {
        let unordered = self.take_unordered();
        Compound::open(self, TAG_SEQ, unordered)
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> std::result::Result<Compound<'a>, HashError> {
        self.take_unordered();
        self.write_name(name);
        Compound::open(self, TAG_SEQ, false)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Compound<'a>, HashError> {
        self.take_unordered();
        self.tag(TAG_VARIANT);
        self.state.write_u32(variant_index);
        self.write_name(variant);
        Compound::open(self, TAG_SEQ, false)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Compound<'a>, HashError> {
        self.take_unordered();
        Compound::open(self, TAG_MAP, true)
    }

    fn serialize_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> std::result::Result<Compound<'a>, HashError> {
        self.take_unordered();
        self.write_name(name);
        Compound::open(self, TAG_STRUCT, false)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Compound<'a>, HashError> {
        self.take_unordered();
        self.tag(TAG_VARIANT);
        self.state.write_u32(variant_index);
        self.write_name(variant);
        Compound::open(self, TAG_STRUCT, false)
    }
}

impl ser::SerializeSeq for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.element(value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeTuple for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.element(value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeTupleStruct for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.element(value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeTupleVariant for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        self.element(value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeMap for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> HashResult {
        let mut entry = self.hasher.child();
        key.serialize(&mut entry)?;
        entry.state.write_u8(0xfe);
        self.pending = Some(entry);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> HashResult {
        let mut entry = self
            .pending
            .take()
            .ok_or_else(|| HashError::Custom("map value serialized without a key".into()))?;
        value.serialize(&mut entry)?;
        self.len += 1;
        if let Some(acc) = &mut self.combined {
            *acc = acc.wrapping_add(entry.finish());
        }
        Ok(())
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeStruct for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> HashResult {
        self.field(key, value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}

impl ser::SerializeStructVariant for Compound<'_> {
    type Ok = ();
    type Error = HashError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> HashResult {
        self.field(key, value)
    }

    fn end(self) -> HashResult {
        self.close()
    }
}
