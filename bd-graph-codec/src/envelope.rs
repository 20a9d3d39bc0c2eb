// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Top-level operations and the root envelope.
//!
//! Envelope layout, one group-framed region per stream:
//! ```text
//! [group 1] {
//!   2: varint format version          // header
//!   3: <root value>                   // absent for a null root
//!   4*: { 1: varint token, 2: <definition> }   // late-reference trailer
//!   2: varint format version          // footer, must echo the header
//! }
//! ```
//! Group framing is deliberate: the trailer grows while it is written, so
//! the region length cannot be known up front. The version pair lets a
//! reader reject protocol drift independent of payload schema changes.
//!
//! `serialize_message`/`deserialize_message` are the envelope-free pair:
//! fields written with no outer wrapper, interoperable with plain protobuf
//! readers for members that stay inside the standard wire format.

#[cfg(test)]
#[path = "./envelope_test.rs"]
mod envelope_test;

use crate::message;
use crate::model::TypeModel;
use crate::node::{ReadCtx, WriteCtx, read_node, write_member};
use crate::schema::TypeId;
use crate::value::{Instance, ObjRef, Value};
use crate::{Error, Result};
use bd_graph_wire::{FieldHeader, FrameStyle, WireType};
use std::cell::RefCell;
use std::rc::Rc;

/// Wire format version this build writes and accepts.
pub const FORMAT_VERSION: u64 = 1;

const ROOT_FIELD: u32 = 1;
const VERSION_FIELD: u32 = 2;
const PAYLOAD_FIELD: u32 = 3;
const TRAILER_FIELD: u32 = 4;

const TRAILER_TOKEN_FIELD: u32 = 1;
const TRAILER_VALUE_FIELD: u32 = 2;

//
// CodecOptions
//

/// Per-operation configuration. No globals: callers pass one of these into
/// each call, and independently-configured models can coexist.
#[derive(Debug, Clone)]
pub struct CodecOptions {
  /// Cap on any pre-announced collection length, enforced before
  /// allocation.
  pub max_collection_length: u64,
  /// Write-side recursion cap; graphs deeper than this without reference
  /// tracking fail instead of overflowing the stack.
  pub max_depth: usize,
  /// Format version stamped into the envelope.
  pub version: u64,
}

impl Default for CodecOptions {
  fn default() -> Self {
    Self {
      max_collection_length: 1 << 20,
      max_depth: 64,
      version: FORMAT_VERSION,
    }
  }
}

impl TypeModel {
  /// Serialize a root value with the full envelope: version header/footer,
  /// reference tracking and the late-reference trailer.
  pub fn serialize(&self, value: &Value, declared: TypeId, options: &CodecOptions) -> Result<Vec<u8>> {
    let mut ctx = WriteCtx::new(self, options);

    let frame = ctx.writer.start_frame(ROOT_FIELD, FrameStyle::Group);
    ctx.writer.write_field_header(VERSION_FIELD, WireType::Varint);
    ctx.writer.write_varint(options.version);

    let root = self.root_member(declared, PAYLOAD_FIELD)?;
    write_member(&mut ctx, &root, Some(value))?;

    while let Some((token, obj, deferred_type)) = ctx.tracker.pop_deferred() {
      log::trace!("writing deferred definition for token {token}");
      let record = ctx.writer.start_frame(TRAILER_FIELD, FrameStyle::LengthPrefixed);
      ctx
        .writer
        .write_field_header(TRAILER_TOKEN_FIELD, WireType::Varint);
      ctx.writer.write_varint(u64::from(token));
      message::write_message_field(&mut ctx, TRAILER_VALUE_FIELD, deferred_type, false, &obj)?;
      ctx.writer.end_frame(record)?;
    }

    ctx.writer.write_field_header(VERSION_FIELD, WireType::Varint);
    ctx.writer.write_varint(options.version);
    ctx.writer.end_frame(frame)?;
    ctx.writer.into_bytes().map_err(Error::Wire)
  }

  /// Deserialize an envelope produced by `serialize`.
  pub fn deserialize(&self, bytes: &[u8], declared: TypeId, options: &CodecOptions) -> Result<Value> {
    let mut ctx = ReadCtx::new(self, bytes, options);

    let Some(header) = ctx.reader.read_field_header()? else {
      return Err(Error::MalformedEnvelope {
        reason: "empty input",
      });
    };
    if header.field_number != ROOT_FIELD || header.wire_type != WireType::StartGroup {
      return Err(Error::MalformedEnvelope {
        reason: "missing root frame",
      });
    }
    let mark = ctx.reader.start_frame(header)?;

    let root_member = self.root_member(declared, PAYLOAD_FIELD)?;
    let mut version: Option<u64> = None;
    let mut footer_seen = false;
    let mut root = Value::Null;

    while let Some(field) = ctx.reader.read_field_header()? {
      match field.field_number {
        VERSION_FIELD if field.wire_type == WireType::Varint => {
          let found = ctx.reader.read_varint()?;
          match version {
            None => {
              if found != FORMAT_VERSION {
                return Err(Error::VersionMismatch {
                  found,
                  supported: FORMAT_VERSION,
                });
              }
              version = Some(found);
            },
            Some(header_version) => {
              if found != header_version {
                return Err(Error::MalformedEnvelope {
                  reason: "footer version does not echo the header",
                });
              }
              footer_seen = true;
            },
          }
        },
        PAYLOAD_FIELD => {
          if version.is_none() {
            return Err(Error::MalformedEnvelope {
              reason: "payload before version header",
            });
          }
          root = read_node(&mut ctx, &root_member.node, field, None, true)?;
        },
        TRAILER_FIELD if field.wire_type == WireType::LengthDelimited => {
          if version.is_none() {
            return Err(Error::MalformedEnvelope {
              reason: "trailer before version header",
            });
          }
          read_trailer_record(&mut ctx, field)?;
        },
        _ => ctx.reader.skip_field(field)?,
      }
    }
    ctx.reader.end_frame(mark)?;

    if !footer_seen {
      return Err(Error::MalformedEnvelope {
        reason: "missing version footer",
      });
    }
    if !ctx.reader.at_end() {
      return Err(Error::Wire(bd_graph_wire::Error::TrailingFrameData {
        remaining: ctx.reader.remaining(),
        offset: ctx.reader.position(),
      }));
    }
    if let Some(token) = ctx.tracker.first_unresolved() {
      return Err(Error::UnresolvedReference { token });
    }
    Ok(root)
  }

  /// Serialize a message's fields with no outer wrapper. This is the
  /// protobuf-interoperable surface; late references need the envelope and
  /// fail here.
  pub fn serialize_message(
    &self,
    value: &Value,
    declared: TypeId,
    options: &CodecOptions,
  ) -> Result<Vec<u8>> {
    let Some(obj) = value.as_object() else {
      return Err(Error::TypeMismatch {
        expected: "object",
        found: value.shape().to_string(),
      });
    };
    let mut ctx = WriteCtx::new(self, options);

    if let Some(surrogate) = self.maybe_surrogate(declared) {
      let convert = surrogate.to_surrogate.clone();
      let surrogate_type = surrogate.surrogate;
      let converted = convert(value.clone())?;
      let Some(converted_obj) = converted.as_object() else {
        return Err(Error::TypeMismatch {
          expected: "object",
          found: converted.shape().to_string(),
        });
      };
      message::write_message(&mut ctx, surrogate_type, converted_obj)?;
    } else {
      message::write_message(&mut ctx, declared, obj)?;
    }

    if let Some(token) = ctx.tracker.first_deferred_token() {
      return Err(Error::UnresolvedReference { token });
    }
    ctx.writer.into_bytes().map_err(Error::Wire)
  }

  /// Deserialize a message produced by `serialize_message`, consuming the
  /// whole input.
  pub fn deserialize_message(
    &self,
    bytes: &[u8],
    declared: TypeId,
    options: &CodecOptions,
  ) -> Result<Value> {
    let mut ctx = ReadCtx::new(self, bytes, options);

    let value = if let Some(surrogate) = self.maybe_surrogate(declared) {
      let convert = surrogate.from_surrogate.clone();
      let raw = read_toplevel_message(&mut ctx, surrogate.surrogate)?;
      convert(raw)?
    } else {
      read_toplevel_message(&mut ctx, declared)?
    };

    if let Some(token) = ctx.tracker.first_unresolved() {
      return Err(Error::UnresolvedReference { token });
    }
    Ok(value)
  }
}

fn read_toplevel_message(ctx: &mut ReadCtx<'_>, declared: TypeId) -> Result<Value> {
  let shell: ObjRef = Rc::new(RefCell::new(Instance::new(declared)));
  let mut materialized = false;
  message::read_message_into(ctx, declared, &shell, &mut materialized)?;
  message::run_after_deserialize(ctx, &shell)?;
  Ok(Value::Object(shell))
}

fn read_trailer_record(ctx: &mut ReadCtx<'_>, header: FieldHeader) -> Result<()> {
  let mark = ctx.reader.start_frame(header)?;
  let mut token: Option<u32> = None;
  while let Some(field) = ctx.reader.read_field_header()? {
    match field.field_number {
      TRAILER_TOKEN_FIELD if field.wire_type == WireType::Varint => {
        token = Some(u32::try_from(ctx.reader.read_varint()?).map_err(|_| {
          Error::ValueOutOfRange {
            what: "reference token",
          }
        })?);
      },
      TRAILER_VALUE_FIELD => {
        let Some(token) = token else {
          return Err(Error::MalformedEnvelope {
            reason: "trailer definition before its token",
          });
        };
        let (shell, deferred_type) = ctx.tracker.take_pending(token)?;
        message::read_message_field(ctx, field, deferred_type, Some((shell, false)))?;
      },
      _ => ctx.reader.skip_field(field)?,
    }
  }
  ctx.reader.end_frame(mark)?;
  Ok(())
}
