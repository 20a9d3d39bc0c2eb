// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Protobuf wire primitives plus sub-item framing.
//!
//! This crate owns the byte-level half of the object-graph codec: varints,
//! zigzag, fixed-width values, field tags, and self-delimited regions
//! (length-prefixed or group-framed). Everything above the byte level
//! (the object model, serializer trees, reference tracking) lives in
//! `bd-graph-codec`.

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

pub mod varint;

mod reader;
mod tag;
mod writer;

pub use crate::reader::{FrameMark, FrameReader};
pub use crate::tag::{FieldHeader, MAX_FIELD_NUMBER, WireType};
pub use crate::writer::{FrameStyle, FrameToken, FrameWriter};

/// Nesting cap for framed regions. A stream announcing deeper nesting is
/// treated as corrupt rather than allowed to exhaust the stack.
pub const MAX_FRAME_DEPTH: usize = 128;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("input truncated at offset {offset}")]
  Truncated { offset: usize },
  #[error("malformed varint at offset {offset}")]
  MalformedVarint { offset: usize },
  #[error("invalid wire type {value} at offset {offset}")]
  InvalidWireType { value: u8, offset: usize },
  #[error("field number zero at offset {offset}")]
  ZeroFieldNumber { offset: usize },
  #[error("field number out of range at offset {offset}")]
  FieldNumberOutOfRange { offset: usize },
  #[error("length-delimited region of {len} bytes overruns enclosing region at offset {offset}")]
  FrameOverrun { len: u64, offset: usize },
  #[error(
    "group end for field {found} does not match open group for field {expected} at offset \
     {offset}"
  )]
  GroupEndMismatch {
    expected: u32,
    found: u32,
    offset: usize,
  },
  #[error("group end for field {field_number} with no open group at offset {offset}")]
  UnexpectedEndGroup { field_number: u32, offset: usize },
  #[error("{remaining} unconsumed bytes before region boundary at offset {offset}")]
  TrailingFrameData { remaining: usize, offset: usize },
  #[error("frame nesting exceeds {limit} levels")]
  DepthLimitExceeded { limit: usize },
  #[error("unbalanced frame operation: {context}")]
  UnbalancedFrame { context: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
