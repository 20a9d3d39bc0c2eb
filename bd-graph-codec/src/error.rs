// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//
// Error
//

/// Errors surfaced by serialize/deserialize operations. Wire-level failures
/// abort the operation with no partial result; the wrapped wire error
/// carries the byte offset.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("framing error: {0}")]
  Wire(#[from] bd_graph_wire::Error),
  #[error("model build error: {0}")]
  Model(#[from] ModelBuildError),
  #[error("runtime type {actual} is not a declared sub-type of {declared}")]
  UnexpectedSubtype { declared: String, actual: String },
  #[error("cannot construct an instance of {type_name}")]
  Unconstructible { type_name: String },
  #[error("reference token {token} was never fulfilled")]
  UnresolvedReference { token: u32 },
  #[error("announced collection length {declared} exceeds the configured limit {limit}")]
  LengthLimitExceeded { declared: u64, limit: u64 },
  #[error("value {value} has no declared member in enum {enum_type}")]
  UnsupportedConversion { enum_type: String, value: i32 },
  #[error("stream format version {found} is not supported (expected {supported})")]
  VersionMismatch { found: u64, supported: u64 },
  #[error("object graph nesting exceeds {limit} levels; mark a field as-reference to break cycles")]
  RecursionLimitExceeded { limit: usize },
  #[error("expected {expected}, found {found}")]
  TypeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("field {field_number} arrived with the wrong wire type (expected {expected})")]
  WireTypeMismatch {
    field_number: u32,
    expected: &'static str,
  },
  #[error("malformed root envelope: {reason}")]
  MalformedEnvelope { reason: &'static str },
  #[error("reference frame carried neither a token nor a definition")]
  EmptyReference,
  #[error("invalid UTF-8 in string field")]
  InvalidUtf8,
  #[error("{what} is out of the representable range")]
  ValueOutOfRange { what: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

//
// ModelBuildError
//

/// Errors detected when a type's serializer tree is first built. The
/// offending type (and member, where applicable) is always named. A failed
/// build is cached and reported identically on every later resolve of the
/// same type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelBuildError {
  #[error("type {name} was reserved but never defined")]
  UndefinedType { name: String },
  #[error("{type_name} is not a message type")]
  NotAMessage { type_name: String },
  #[error("{type_name} is not an enum type")]
  NotAnEnum { type_name: String },
  #[error("{type_name} declares a member with field number zero")]
  FieldNumberZero { type_name: String },
  #[error("{type_name} declares member field number {field_number} outside the protobuf range")]
  FieldNumberOutOfRange { type_name: String, field_number: u32 },
  #[error("{type_name} declares field number {field_number} more than once")]
  DuplicateFieldNumber { type_name: String, field_number: u32 },
  #[error(
    "{type_name} uses field number {field_number} for sub-type dispatch but it is already a \
     member field somewhere in the inheritance chain"
  )]
  SubTypeFieldClash { type_name: String, field_number: u32 },
  #[error("{type_name} declares sub-type field number {field_number} more than once")]
  DuplicateSubType { type_name: String, field_number: u32 },
  #[error("the sub-type or base-type chain through {type_name} forms a cycle")]
  SubTypeCycle { type_name: String },
  #[error("{type_name} field {field_number} is packed but its element type cannot be packed")]
  PackedNotScalar { type_name: String, field_number: u32 },
  #[error("{type_name} field {field_number} is a late reference to a non-message type")]
  LateReferenceNotMessage { type_name: String, field_number: u32 },
  #[error("{type_name} field {field_number} cannot carry reference semantics for its type")]
  ReferenceNotSupported { type_name: String, field_number: u32 },
  #[error("{type_name} field {field_number} is invalid: {reason}")]
  InvalidMember {
    type_name: String,
    field_number: u32,
    reason: &'static str,
  },
  #[error("{type_name} has no instantiation strategy, no sub-types and no surrogate")]
  Unconstructible { type_name: String },
  #[error("surrogate declared on {type_name} is invalid: {reason}")]
  InvalidSurrogate {
    type_name: String,
    reason: &'static str,
  },
  #[error("enum {type_name} declares wire value {value} more than once")]
  DuplicateEnumValue { type_name: String, value: i32 },
}
