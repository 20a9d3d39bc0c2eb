// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! The model input contract: plain-data descriptions of each type's
//! members, inheritance, instantiation and conversions.
//!
//! This is the boundary with whatever discovers serializable shapes:
//! attribute scanning, config files, hand registration. The engine never
//! introspects; it consumes these descriptions and nothing else.

use crate::value::{Instance, Value};
use bd_graph_wire::WireType;
use std::sync::Arc;

/// Identity of a registered type within one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
  #[must_use]
  pub(crate) const fn index(self) -> usize {
    self.0 as usize
  }
}

//
// ScalarKind
//

/// Leaf value kinds. `SI*` use zigzag varints, `Fixed*`/`SFixed*` use
/// fixed-width encoding; `Guid`/`Decimal`/`DateTime`/`Duration` are
/// composite leaves with a fixed sub-message layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
  Bool,
  I32,
  SI32,
  U32,
  I64,
  SI64,
  U64,
  F32,
  F64,
  Fixed32,
  SFixed32,
  Fixed64,
  SFixed64,
  String,
  Bytes,
  Guid,
  Decimal,
  DateTime,
  Duration,
}

impl ScalarKind {
  /// The wire type this kind encodes with.
  #[must_use]
  pub const fn wire_type(self) -> WireType {
    match self {
      Self::Bool | Self::I32 | Self::SI32 | Self::U32 | Self::I64 | Self::SI64 | Self::U64 => {
        WireType::Varint
      },
      Self::F32 | Self::Fixed32 | Self::SFixed32 => WireType::Fixed32,
      Self::F64 | Self::Fixed64 | Self::SFixed64 => WireType::Fixed64,
      Self::String | Self::Bytes | Self::Guid | Self::Decimal | Self::DateTime | Self::Duration => {
        WireType::LengthDelimited
      },
    }
  }

  /// Whether repeated values of this kind may be packed into one
  /// length-delimited blob. Only fixed-size-payload kinds qualify.
  #[must_use]
  pub const fn packable(self) -> bool {
    !matches!(self.wire_type(), WireType::LengthDelimited)
  }
}

//
// FieldType
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
  Scalar(ScalarKind),
  Enum(TypeId),
  Message(TypeId),
}

/// Collection adaptation of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeated {
  #[default]
  Single,
  /// Plain repeated field, protobuf-compatible encoding.
  List,
  /// Framed collection with a length pre-announcement, so the destination
  /// exists (and is registered) before elements are read.
  Array,
}

/// What an absent or defaulted value means for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbsentPolicy {
  /// Implicit zero defaults: defaulted values are elided on write and
  /// absent fields read back as the default (collections as empty).
  #[default]
  ZeroDefault,
  /// Write the value even when defaulted.
  Always,
  /// Optional-absent: absence round-trips as null, presence is meaningful.
  Null,
}

//
// MemberSchema
//

#[derive(Clone)]
pub struct MemberSchema {
  pub field_number: u32,
  pub ty: FieldType,
  pub repeated: Repeated,
  pub packed: bool,
  /// Track object identity: repeated occurrences of one instance encode as
  /// a token instead of re-encoding the value.
  pub as_reference: bool,
  /// Reference a message that may not be constructed yet at the point the
  /// field is read; the definition travels in the root envelope trailer.
  pub late_reference: bool,
  /// Replace an existing collection on read instead of appending to it.
  pub overwrite_collection: bool,
  pub absent: AbsentPolicy,
  /// Frame a nested-message member with start/end group markers instead of
  /// a length prefix.
  pub group_framed: bool,
}

impl MemberSchema {
  #[must_use]
  pub fn new(field_number: u32, ty: FieldType) -> Self {
    Self {
      field_number,
      ty,
      repeated: Repeated::Single,
      packed: false,
      as_reference: false,
      late_reference: false,
      overwrite_collection: false,
      absent: AbsentPolicy::ZeroDefault,
      group_framed: false,
    }
  }

  #[must_use]
  pub fn scalar(field_number: u32, kind: ScalarKind) -> Self {
    Self::new(field_number, FieldType::Scalar(kind))
  }

  #[must_use]
  pub fn message(field_number: u32, type_id: TypeId) -> Self {
    Self::new(field_number, FieldType::Message(type_id))
  }

  #[must_use]
  pub fn enumeration(field_number: u32, type_id: TypeId) -> Self {
    Self::new(field_number, FieldType::Enum(type_id))
  }
}

//
// Instantiation
//

/// How the engine obtains a fresh instance when one is first needed during
/// a read.
#[derive(Clone, Default)]
pub enum InstantiationStrategy {
  /// An all-defaults instance of the type.
  #[default]
  Empty,
  /// Caller-provided factory.
  Factory(Arc<dyn Fn(TypeId) -> Instance + Send + Sync>),
  /// The type cannot be instantiated directly (abstract base); a sub-type
  /// discriminator or surrogate must supply the concrete shape.
  Unconstructible,
}

/// Lifecycle hooks around serialization, mirroring the classic
/// before/after callback pairs.
pub type InstanceCallback = Arc<dyn Fn(&mut Instance) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Callbacks {
  pub before_serialize: Option<InstanceCallback>,
  pub after_serialize: Option<InstanceCallback>,
  pub before_deserialize: Option<InstanceCallback>,
  pub after_deserialize: Option<InstanceCallback>,
}

//
// Surrogate
//

/// Pure bidirectional conversion between a declared type and the proxy
/// type that actually hits the wire.
pub type ConvertFn = Arc<dyn Fn(Value) -> crate::Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct SurrogateSchema {
  pub surrogate: TypeId,
  pub to_surrogate: ConvertFn,
  pub from_surrogate: ConvertFn,
}

//
// MessageSchema
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTypeSchema {
  pub field_number: u32,
  pub type_id: TypeId,
}

#[derive(Clone, Default)]
pub struct MessageSchema {
  /// Members in any order; the model sorts and validates by field number.
  pub members: Vec<MemberSchema>,
  pub base: Option<TypeId>,
  /// Declared derived types, one dispatch field number each.
  pub sub_types: Vec<SubTypeSchema>,
  pub strategy: InstantiationStrategy,
  pub callbacks: Callbacks,
  /// Retain unknown fields read from the wire and replay them on write.
  pub extension_data: bool,
  pub surrogate: Option<SurrogateSchema>,
  /// Track identity for values of this type even where the member does not
  /// ask for it (root values included).
  pub as_reference_default: bool,
}

//
// EnumSchema
//

#[derive(Debug, Clone, Default)]
pub struct EnumSchema {
  /// Declared members as (name, wire value).
  pub members: Vec<(String, i32)>,
  /// Permit undeclared wire values instead of failing with an
  /// unsupported-conversion error.
  pub pass_through: bool,
}

//
// TypeSchema
//

#[derive(Clone)]
pub enum TypeKind {
  Message(MessageSchema),
  Enum(EnumSchema),
}

#[derive(Clone)]
pub struct TypeSchema {
  pub name: String,
  pub kind: TypeKind,
}
