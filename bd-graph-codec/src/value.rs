// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! The dynamic object model operations run over.
//!
//! Objects and lists are held behind `Rc<RefCell<_>>`: the `Rc` address is
//! the object identity the reference tracker keys on, and the interior
//! mutability is what lets a shell instance be registered before its fields
//! are filled, which is how cycles survive a round trip. Values are scoped
//! to one operation and are deliberately not `Send`; the type model itself
//! is the shared, thread-safe piece.

#[cfg(test)]
#[path = "./value_test.rs"]
mod value_test;

use crate::schema::TypeId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Shared, identity-bearing handle to a message instance.
pub type ObjRef = Rc<RefCell<Instance>>;

/// Shared, identity-bearing handle to a collection.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

//
// Value
//

/// One dynamically-typed value. Comparing values compares structure; do not
/// compare graphs that contain cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  I32(i32),
  I64(i64),
  U32(u32),
  U64(u64),
  F32(f32),
  F64(f64),
  String(String),
  Bytes(Vec<u8>),
  Guid(Uuid),
  Decimal(Decimal),
  DateTime(OffsetDateTime),
  Duration(Duration),
  Enum(i32),
  List(ListRef),
  Object(ObjRef),
}

impl Value {
  /// Wrap an instance into a freshly-allocated shared handle.
  #[must_use]
  pub fn object(instance: Instance) -> Self {
    Self::Object(Rc::new(RefCell::new(instance)))
  }

  /// Wrap items into a freshly-allocated shared list handle.
  #[must_use]
  pub fn list(items: Vec<Self>) -> Self {
    Self::List(Rc::new(RefCell::new(items)))
  }

  /// True for the wire default of each shape: zero numbers, empty
  /// strings/bytes/collections, the nil guid, the epoch. `Null` is absence,
  /// which also never hits the wire. Objects are never defaulted.
  #[must_use]
  pub fn is_default(&self) -> bool {
    match self {
      Self::Null => true,
      Self::Bool(v) => !v,
      Self::I32(v) | Self::Enum(v) => *v == 0,
      Self::I64(v) => *v == 0,
      Self::U32(v) => *v == 0,
      Self::U64(v) => *v == 0,
      Self::F32(v) => *v == 0.0,
      Self::F64(v) => *v == 0.0,
      Self::String(v) => v.is_empty(),
      Self::Bytes(v) => v.is_empty(),
      Self::Guid(v) => v.is_nil(),
      Self::Decimal(v) => v.is_zero(),
      Self::DateTime(v) => *v == OffsetDateTime::UNIX_EPOCH,
      Self::Duration(v) => v.is_zero(),
      Self::List(v) => v.borrow().is_empty(),
      Self::Object(_) => false,
    }
  }

  /// Short shape name for error context.
  #[must_use]
  pub const fn shape(&self) -> &'static str {
    match self {
      Self::Null => "null",
      Self::Bool(_) => "bool",
      Self::I32(_) => "i32",
      Self::I64(_) => "i64",
      Self::U32(_) => "u32",
      Self::U64(_) => "u64",
      Self::F32(_) => "f32",
      Self::F64(_) => "f64",
      Self::String(_) => "string",
      Self::Bytes(_) => "bytes",
      Self::Guid(_) => "guid",
      Self::Decimal(_) => "decimal",
      Self::DateTime(_) => "datetime",
      Self::Duration(_) => "duration",
      Self::Enum(_) => "enum",
      Self::List(_) => "list",
      Self::Object(_) => "object",
    }
  }

  #[must_use]
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(v) => Some(*v),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_i32(&self) -> Option<i32> {
    match self {
      Self::I32(v) => Some(*v),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::I64(v) => Some(*v),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(v) => Some(v),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_list(&self) -> Option<&ListRef> {
    match self {
      Self::List(v) => Some(v),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_object(&self) -> Option<&ObjRef> {
    match self {
      Self::Object(v) => Some(v),
      _ => None,
    }
  }

  #[must_use]
  pub fn is_null(&self) -> bool {
    matches!(self, Self::Null)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Self::Bool(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Self::I32(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Self::I64(v)
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Self::U32(v)
  }
}

impl From<u64> for Value {
  fn from(v: u64) -> Self {
    Self::U64(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Self::F64(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Self::String(v.to_string())
  }
}

//
// Instance
//

/// One message instance: its runtime type plus its fields keyed by field
/// number. Unknown fields read from the wire are retained per declared
/// inheritance level when the type is extension-capable.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
  pub type_id: TypeId,
  pub fields: BTreeMap<u32, Value>,
  pub extensions: Vec<(TypeId, Vec<u8>)>,
}

impl Instance {
  #[must_use]
  pub fn new(type_id: TypeId) -> Self {
    Self {
      type_id,
      fields: BTreeMap::new(),
      extensions: Vec::new(),
    }
  }

  #[must_use]
  pub fn with_fields(type_id: TypeId, fields: impl IntoIterator<Item = (u32, Value)>) -> Self {
    Self {
      type_id,
      fields: fields.into_iter().collect(),
      extensions: Vec::new(),
    }
  }

  #[must_use]
  pub fn field(&self, field_number: u32) -> Option<&Value> {
    self.fields.get(&field_number)
  }

  pub fn set_field(&mut self, field_number: u32, value: Value) {
    self.fields.insert(field_number, value);
  }
}

//
// Decimal
//

/// 128-bit decimal held as raw wire parts: a 128-bit unsigned mantissa in
/// two halves, a base-10 scale (0..=28) and a sign. Kept raw so values
/// round-trip byte-for-byte without re-deriving decimal arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decimal {
  pub lo: u64,
  pub hi: u64,
  pub scale: u8,
  pub negative: bool,
}

impl Decimal {
  pub const ZERO: Self = Self {
    lo: 0,
    hi: 0,
    scale: 0,
    negative: false,
  };

  #[must_use]
  pub const fn is_zero(&self) -> bool {
    self.lo == 0 && self.hi == 0 && self.scale == 0 && !self.negative
  }
}
