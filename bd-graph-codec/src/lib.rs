// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Reference-preserving object-graph serialization over the protobuf wire
//! format.
//!
//! A `TypeModel` maps registered type schemas to cached serializer trees;
//! serialize/deserialize operations traverse those trees against a dynamic
//! `Value` object model. On top of plain protobuf framing the codec layers
//! a private convention for object identity (reference tokens), cycles
//! (late references fulfilled by an envelope trailer), sub-type dispatch
//! (one field number per declared derived type) and framed arrays with
//! length pre-announcement. A graph-unaware protobuf reader sees those
//! extension fields as ordinary unknown fields it can skip.
//!
//! ```rust
//! use bd_graph_codec::{
//!   CodecOptions, MemberSchema, MessageSchema, ScalarKind, TypeModelBuilder, Value, Instance,
//! };
//!
//! let mut builder = TypeModelBuilder::new();
//! let point = builder.message("Point", MessageSchema {
//!   members: vec![
//!     MemberSchema::scalar(1, ScalarKind::String),
//!     MemberSchema::scalar(2, ScalarKind::I32),
//!   ],
//!   ..MessageSchema::default()
//! });
//! let model = builder.build()?;
//!
//! let value = Value::object(Instance::with_fields(point, [
//!   (1, Value::from("abc")),
//!   (2, Value::from(12)),
//! ]));
//! let options = CodecOptions::default();
//! let bytes = model.serialize_message(&value, point, &options)?;
//! let back = model.deserialize_message(&bytes, point, &options)?;
//! # Ok::<(), bd_graph_codec::Error>(())
//! ```

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

mod envelope;
mod error;
mod message;
mod model;
mod node;
mod scalar;
mod schema;
mod tracker;
mod value;


pub use crate::envelope::{CodecOptions, FORMAT_VERSION};
pub use crate::error::{Error, ModelBuildError, Result};
pub use crate::model::{MemberDescriptor, TypeDescriptor, TypeModel, TypeModelBuilder};
pub use crate::node::{CollectionNode, Node};
pub use crate::schema::{
  AbsentPolicy, Callbacks, ConvertFn, EnumSchema, FieldType, InstanceCallback,
  InstantiationStrategy, MemberSchema, MessageSchema, Repeated, ScalarKind, SubTypeSchema,
  SurrogateSchema, TypeId, TypeKind, TypeSchema,
};
pub use crate::value::{Decimal, Instance, ListRef, ObjRef, Value};
