//! Identity extraction: finds the member serialized under `_id`.

use crate::error::{DriverError, Result};
use serde::ser::{self, Impossible, Serialize};
use serde_json::Value;
use std::fmt;

/// Key the store uses for a document's identity.
pub const ID_FIELD: &str = "_id";

/// Rendered identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render a stored identity value. Extended JSON object ids
    /// (`{"$oid": "..."}`) collapse to their hex string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self(s.clone())),
            Value::Object(map) => match map.get("$oid") {
                Some(Value::String(oid)) if map.len() == 1 => Some(Self(oid.clone())),
                _ => Some(Self(value.to_string())),
            },
            other => Some(Self(other.to_string())),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identifier {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Extract the identity of `entity`.
///
/// Only the identity member itself is converted; the rest of the value is
/// never walked, so this is safe on values the hasher would reject.
pub fn identify<T: Serialize + ?Sized>(entity: &T) -> Result<Identifier> {
    let missing = || DriverError::MissingIdentity {
        type_name: std::any::type_name::<T>().to_string(),
    };
    match entity.serialize(IdentityProbe) {
        Ok(Some(value)) => Identifier::from_value(&value).ok_or_else(missing),
        Ok(None) | Err(ProbeError::NotADocument) => Err(missing()),
        Err(ProbeError::Custom(msg)) => Err(DriverError::Serialization(msg)),
    }
}

#[derive(Debug)]
enum ProbeError {
    NotADocument,
    Custom(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::NotADocument => f.write_str("value does not serialize as a document"),
            ProbeError::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for ProbeError {}

impl ser::Error for ProbeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ProbeError::Custom(msg.to_string())
    }
}

type Probed = std::result::Result<Option<Value>, ProbeError>;

/// Serializer that only looks at the top-level members of a struct or map.
struct IdentityProbe;

struct FieldScan {
    found: Option<Value>,
    key_is_id: bool,
}

fn capture<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Value, ProbeError> {
    serde_json::to_value(value).map_err(|e| ProbeError::Custom(e.to_string()))
}

impl ser::Serializer for IdentityProbe {
    type Ok = Option<Value>;
    type Error = ProbeError;

    type SerializeSeq = Impossible<Option<Value>, ProbeError>;
    type SerializeTuple = Impossible<Option<Value>, ProbeError>;
    type SerializeTupleStruct = Impossible<Option<Value>, ProbeError>;
    type SerializeTupleVariant = Impossible<Option<Value>, ProbeError>;
    type SerializeMap = FieldScan;
    type SerializeStruct = FieldScan;
    type SerializeStructVariant = Impossible<Option<Value>, ProbeError>;

    fn serialize_bool(self, _v: bool) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_i64(self, _v: i64) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_i8(self, v: i8) -> Probed {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> Probed {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> Probed {
        self.serialize_i64(v as i64)
    }

    fn serialize_u64(self, _v: u64) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_u8(self, v: u8) -> Probed {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> Probed {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> Probed {
        self.serialize_u64(v as u64)
    }

    fn serialize_f32(self, _v: f32) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_f64(self, _v: f64) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_char(self, _v: char) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_str(self, _v: &str) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_none(self) -> Probed {
        Ok(None)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Probed {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Probed {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Probed {
        Err(ProbeError::NotADocument)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self::SerializeSeq, ProbeError> {
        Err(ProbeError::NotADocument)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self::SerializeTuple, ProbeError> {
        Err(ProbeError::NotADocument)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, ProbeError> {
        Err(ProbeError::NotADocument)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, ProbeError> {
        Err(ProbeError::NotADocument)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<FieldScan, ProbeError> {
        Ok(FieldScan {
            found: None,
            key_is_id: false,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<FieldScan, ProbeError> {
        Ok(FieldScan {
            found: None,
            key_is_id: false,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, ProbeError> {
        Err(ProbeError::NotADocument)
    }
}

impl ser::SerializeStruct for FieldScan {
    type Ok = Option<Value>;
    type Error = ProbeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), ProbeError> {
        if key == ID_FIELD {
            self.found = Some(capture(value)?);
        }
        Ok(())
    }

    fn end(self) -> Probed {
        Ok(self.found)
    }
}

impl ser::SerializeMap for FieldScan {
    type Ok = Option<Value>;
    type Error = ProbeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> std::result::Result<(), ProbeError> {
        self.key_is_id = matches!(capture(key)?, Value::String(ref k) if k == ID_FIELD);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), ProbeError> {
        if std::mem::take(&mut self.key_is_id) {
            self.found = Some(capture(value)?);
        }
        Ok(())
    }

    fn end(self) -> Probed {
        Ok(self.found)
    }
}
