// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! The serializer tree and its interpretive traversal.
//!
//! A type's wire behavior is a small tree of `Node` variants assembled once
//! by the model and then pattern-match dispatched on every operation. The
//! tree is acyclic even for recursive types: a `Message` node re-enters
//! through the model's descriptor cache at traversal time instead of
//! holding a child tree.

use crate::envelope::CodecOptions;
use crate::message;
use crate::model::{MemberDescriptor, TypeModel};
use crate::scalar;
use crate::schema::{AbsentPolicy, ScalarKind, TypeId};
use crate::tracker::{ReadTracker, WriteTracker};
use crate::value::{Instance, ListRef, Value};
use crate::{Error, Result};
use bd_graph_wire::{FieldHeader, FrameReader, FrameStyle, FrameWriter, WireType};
use std::cell::RefCell;
use std::rc::Rc;

// Field numbers inside a reference frame: a token for an already-tracked
// object, or the inline definition on first sighting.
pub(crate) const REF_TOKEN_FIELD: u32 = 1;
pub(crate) const REF_DEFINITION_FIELD: u32 = 2;

// Field numbers inside an array frame: the element-count pre-announcement,
// one field per element, or one packed blob.
pub(crate) const ARRAY_LENGTH_FIELD: u32 = 1;
pub(crate) const ARRAY_ITEM_FIELD: u32 = 2;
pub(crate) const ARRAY_PACKED_FIELD: u32 = 3;

//
// Node
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
  Scalar(ScalarKind),
  Enum(TypeId),
  Message { type_id: TypeId, group_framed: bool },
  Collection(Box<CollectionNode>),
  /// Conversion through a proxy type; `inner` is the surrogate's message
  /// node, conversions are looked up on the declared type's schema.
  Surrogate { declared: TypeId, inner: Box<Node> },
  Reference(Box<Node>),
  LateReference { declared: TypeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNode {
  pub item: Node,
  /// Framed encoding with a length pre-announcement.
  pub array: bool,
  pub packed: bool,
  /// Read merge policy: append into an existing collection instead of
  /// replacing it.
  pub append: bool,
}

impl Node {
  /// The wire type a single occurrence of this node produces.
  pub(crate) fn natural_wire_type(&self) -> WireType {
    match self {
      Self::Scalar(kind) => kind.wire_type(),
      Self::Enum(_) => WireType::Varint,
      Self::Message { group_framed, .. } => {
        if *group_framed {
          WireType::StartGroup
        } else {
          WireType::LengthDelimited
        }
      },
      _ => WireType::LengthDelimited,
    }
  }
}

//
// WriteCtx / ReadCtx
//

/// Per-operation write state: the wire writer, the identity tracker and
/// the recursion guard.
pub(crate) struct WriteCtx<'a> {
  pub model: &'a TypeModel,
  pub options: &'a CodecOptions,
  pub writer: FrameWriter,
  pub tracker: WriteTracker,
  depth: usize,
}

impl<'a> WriteCtx<'a> {
  pub fn new(model: &'a TypeModel, options: &'a CodecOptions) -> Self {
    Self {
      model,
      options,
      writer: FrameWriter::new(),
      tracker: WriteTracker::new(),
      depth: 0,
    }
  }

  /// Guard against unbounded recursion through graphs that carry cycles
  /// without reference tracking.
  pub fn enter(&mut self) -> Result<()> {
    self.depth += 1;
    if self.depth > self.options.max_depth {
      return Err(Error::RecursionLimitExceeded {
        limit: self.options.max_depth,
      });
    }
    Ok(())
  }

  pub fn leave(&mut self) {
    self.depth -= 1;
  }
}

/// Per-operation read state.
pub(crate) struct ReadCtx<'a> {
  pub model: &'a TypeModel,
  pub options: &'a CodecOptions,
  pub reader: FrameReader<'a>,
  pub tracker: ReadTracker,
}

impl<'a> ReadCtx<'a> {
  pub fn new(model: &'a TypeModel, data: &'a [u8], options: &'a CodecOptions) -> Self {
    Self {
      model,
      options,
      reader: FrameReader::new(data),
      tracker: ReadTracker::new(),
    }
  }
}

fn type_mismatch(expected: &'static str, value: &Value) -> Error {
  Error::TypeMismatch {
    expected,
    found: value.shape().to_string(),
  }
}

//
// Write path
//

/// Write one member, honoring its absence policy. `None` means the host
/// instance does not carry the field at all.
pub(crate) fn write_member(
  ctx: &mut WriteCtx<'_>,
  member: &MemberDescriptor,
  value: Option<&Value>,
) -> Result<()> {
  let synthesized;
  let value = match (value, member.absent) {
    (None | Some(Value::Null), AbsentPolicy::Always) => match default_value(&member.node) {
      Some(v) => {
        synthesized = v;
        &synthesized
      },
      None => return Ok(()),
    },
    (None | Some(Value::Null), _) => return Ok(()),
    (Some(v), AbsentPolicy::ZeroDefault) if v.is_default() => return Ok(()),
    (Some(v), _) => v,
  };
  write_node(ctx, &member.node, member.field_number, value)
}

fn default_value(node: &Node) -> Option<Value> {
  match node {
    Node::Scalar(kind) => Some(match kind {
      ScalarKind::Bool => Value::Bool(false),
      ScalarKind::I32 | ScalarKind::SI32 | ScalarKind::SFixed32 => Value::I32(0),
      ScalarKind::U32 | ScalarKind::Fixed32 => Value::U32(0),
      ScalarKind::I64 | ScalarKind::SI64 | ScalarKind::SFixed64 => Value::I64(0),
      ScalarKind::U64 | ScalarKind::Fixed64 => Value::U64(0),
      ScalarKind::F32 => Value::F32(0.0),
      ScalarKind::F64 => Value::F64(0.0),
      ScalarKind::String => Value::String(String::new()),
      ScalarKind::Bytes => Value::Bytes(Vec::new()),
      ScalarKind::Guid => Value::Guid(uuid::Uuid::nil()),
      ScalarKind::Decimal => Value::Decimal(crate::value::Decimal::ZERO),
      ScalarKind::DateTime => Value::DateTime(time::OffsetDateTime::UNIX_EPOCH),
      ScalarKind::Duration => Value::Duration(time::Duration::ZERO),
    }),
    Node::Enum(_) => Some(Value::Enum(0)),
    Node::Collection(_) => Some(Value::list(Vec::new())),
    _ => None,
  }
}

pub(crate) fn write_node(
  ctx: &mut WriteCtx<'_>,
  node: &Node,
  field_number: u32,
  value: &Value,
) -> Result<()> {
  match node {
    Node::Scalar(kind) => scalar::write_scalar(&mut ctx.writer, field_number, *kind, value),
    Node::Enum(type_id) => write_enum(ctx, *type_id, field_number, value),
    Node::Message {
      type_id,
      group_framed,
    } => {
      let Some(obj) = value.as_object() else {
        return Err(type_mismatch("object", value));
      };
      message::write_message_field(ctx, field_number, *type_id, *group_framed, obj)
    },
    Node::Collection(collection) => write_collection(ctx, collection, field_number, value),
    Node::Surrogate { declared, inner } => {
      let convert = ctx.model.surrogate_for(*declared)?.to_surrogate.clone();
      let converted = convert(value.clone())?;
      write_node(ctx, inner, field_number, &converted)
    },
    Node::Reference(inner) => write_reference(ctx, inner, field_number, value),
    Node::LateReference { declared } => write_late_reference(ctx, *declared, field_number, value),
  }
}

fn write_enum(ctx: &mut WriteCtx<'_>, type_id: TypeId, field_number: u32, value: &Value) -> Result<()> {
  let Value::Enum(v) = value else {
    return Err(type_mismatch("enum", value));
  };
  check_enum_value(ctx.model, type_id, *v)?;
  ctx.writer.write_field_header(field_number, WireType::Varint);
  #[allow(clippy::cast_sign_loss)]
  ctx.writer.write_varint(i64::from(*v) as u64);
  Ok(())
}

fn check_enum_value(model: &TypeModel, type_id: TypeId, value: i32) -> Result<()> {
  let schema = model.enum_schema(type_id)?;
  if !schema.pass_through && !schema.members.iter().any(|(_, v)| *v == value) {
    return Err(Error::UnsupportedConversion {
      enum_type: model.type_name(type_id).to_string(),
      value,
    });
  }
  Ok(())
}

fn write_collection(
  ctx: &mut WriteCtx<'_>,
  collection: &CollectionNode,
  field_number: u32,
  value: &Value,
) -> Result<()> {
  let Value::List(list) = value else {
    return Err(type_mismatch("list", value));
  };
  // Clone the items out so no borrow is held while elements recurse; an
  // element may reference the collection itself.
  let items = list.borrow().clone();

  if collection.array {
    ctx.enter()?;
    let frame = ctx.writer.start_frame(field_number, FrameStyle::LengthPrefixed);
    ctx
      .writer
      .write_field_header(ARRAY_LENGTH_FIELD, WireType::Varint);
    ctx.writer.write_varint(items.len() as u64);
    if collection.packed {
      write_packed(ctx, &collection.item, ARRAY_PACKED_FIELD, &items)?;
    } else {
      for item in &items {
        write_node(ctx, &collection.item, ARRAY_ITEM_FIELD, item)?;
      }
    }
    ctx.writer.end_frame(frame)?;
    ctx.leave();
  } else if collection.packed {
    write_packed(ctx, &collection.item, field_number, &items)?;
  } else {
    for item in &items {
      write_node(ctx, &collection.item, field_number, item)?;
    }
  }
  Ok(())
}

fn write_packed(
  ctx: &mut WriteCtx<'_>,
  item: &Node,
  field_number: u32,
  items: &[Value],
) -> Result<()> {
  let frame = ctx.writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  for value in items {
    match item {
      Node::Scalar(kind) => scalar::write_scalar_payload(&mut ctx.writer, *kind, value)?,
      Node::Enum(type_id) => {
        let Value::Enum(v) = value else {
          return Err(type_mismatch("enum", value));
        };
        check_enum_value(ctx.model, *type_id, *v)?;
        #[allow(clippy::cast_sign_loss)]
        ctx.writer.write_varint(i64::from(*v) as u64);
      },
      _ => {
        return Err(Error::TypeMismatch {
          expected: "packable element",
          found: "nested node".to_string(),
        });
      },
    }
  }
  ctx.writer.end_frame(frame)?;
  Ok(())
}

fn write_reference(
  ctx: &mut WriteCtx<'_>,
  inner: &Node,
  field_number: u32,
  value: &Value,
) -> Result<()> {
  let (token, first) = match value {
    Value::Object(obj) => ctx.tracker.token_for_object(obj),
    Value::List(list) => ctx.tracker.token_for_list(list),
    _ => return Err(type_mismatch("object or list", value)),
  };

  let frame = ctx.writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  if first {
    // The token is implicit in write order; only the definition travels.
    write_node(ctx, inner, REF_DEFINITION_FIELD, value)?;
  } else {
    ctx
      .writer
      .write_field_header(REF_TOKEN_FIELD, WireType::Varint);
    ctx.writer.write_varint(u64::from(token));
  }
  ctx.writer.end_frame(frame)?;
  Ok(())
}

fn write_late_reference(
  ctx: &mut WriteCtx<'_>,
  declared: TypeId,
  field_number: u32,
  value: &Value,
) -> Result<()> {
  let Some(obj) = value.as_object() else {
    return Err(type_mismatch("object", value));
  };
  let (token, first) = ctx.tracker.token_for_object(obj);
  if first {
    // The definition travels in the root envelope trailer.
    ctx.tracker.defer(token, obj.clone(), declared);
  }
  let frame = ctx.writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  ctx
    .writer
    .write_field_header(REF_TOKEN_FIELD, WireType::Varint);
  ctx.writer.write_varint(u64::from(token));
  ctx.writer.end_frame(frame)?;
  Ok(())
}

//
// Read path
//

/// Read one occurrence of a node. `existing` is the host field's current
/// value (the merge target); `first` is false when an earlier occurrence in
/// this operation already touched the field.
pub(crate) fn read_node(
  ctx: &mut ReadCtx<'_>,
  node: &Node,
  header: FieldHeader,
  existing: Option<Value>,
  first: bool,
) -> Result<Value> {
  match node {
    Node::Scalar(kind) => scalar::read_scalar(&mut ctx.reader, *kind, header),
    Node::Enum(type_id) => read_enum(ctx, *type_id, header),
    Node::Message { type_id, .. } => {
      let into = existing
        .as_ref()
        .and_then(Value::as_object)
        .map(|obj| (obj.clone(), true));
      message::read_message_field(ctx, header, *type_id, into)
    },
    Node::Collection(collection) => {
      let target = collection_target(collection, existing, first);
      read_collection_into(ctx, collection, header, &target)?;
      Ok(Value::List(target))
    },
    Node::Surrogate { declared, inner } => {
      let raw = read_node(ctx, inner, header, None, true)?;
      let convert = ctx.model.surrogate_for(*declared)?.from_surrogate.clone();
      convert(raw)
    },
    Node::Reference(inner) => read_reference(ctx, inner, header),
    Node::LateReference { declared } => read_late_reference(ctx, *declared, header),
  }
}

fn read_enum(ctx: &mut ReadCtx<'_>, type_id: TypeId, header: FieldHeader) -> Result<Value> {
  if header.wire_type != WireType::Varint {
    return Err(Error::WireTypeMismatch {
      field_number: header.field_number,
      expected: "varint",
    });
  }
  let raw = ctx.reader.read_varint()?;
  decode_enum(ctx.model, type_id, raw)
}

fn decode_enum(model: &TypeModel, type_id: TypeId, raw: u64) -> Result<Value> {
  // Truncating cast is protobuf enum (int32) semantics.
  #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
  let value = raw as i64 as i32;
  check_enum_value(model, type_id, value)?;
  Ok(Value::Enum(value))
}

fn collection_target(collection: &CollectionNode, existing: Option<Value>, first: bool) -> ListRef {
  if let Some(Value::List(list)) = existing {
    // The first occurrence under overwrite policy starts fresh; later
    // occurrences in the same operation keep accumulating.
    if collection.append || !first {
      return list;
    }
  }
  Rc::new(RefCell::new(Vec::new()))
}

fn read_collection_into(
  ctx: &mut ReadCtx<'_>,
  collection: &CollectionNode,
  header: FieldHeader,
  list: &ListRef,
) -> Result<()> {
  if collection.array {
    let mark = ctx.reader.start_frame(header)?;
    while let Some(field) = ctx.reader.read_field_header()? {
      match field.field_number {
        ARRAY_LENGTH_FIELD if field.wire_type == WireType::Varint => {
          let declared = ctx.reader.read_varint()?;
          if declared > ctx.options.max_collection_length {
            return Err(Error::LengthLimitExceeded {
              declared,
              limit: ctx.options.max_collection_length,
            });
          }
          // Pre-size the destination; it exists (and is registered) before
          // any element is read, so elements may reference it.
          #[allow(clippy::cast_possible_truncation)]
          list.borrow_mut().reserve(declared as usize);
        },
        ARRAY_ITEM_FIELD => {
          let value = read_node(ctx, &collection.item, field, None, true)?;
          list.borrow_mut().push(value);
        },
        ARRAY_PACKED_FIELD if field.wire_type == WireType::LengthDelimited => {
          read_packed(ctx, &collection.item, field, list)?;
        },
        _ => ctx.reader.skip_field(field)?,
      }
    }
    ctx.reader.end_frame(mark)?;
    Ok(())
  } else if header.wire_type == WireType::LengthDelimited
    && matches!(&collection.item, Node::Scalar(_) | Node::Enum(_))
    && collection.item.natural_wire_type() != WireType::LengthDelimited
  {
    // Packed blob for a scalar element, regardless of the declared flag.
    read_packed(ctx, &collection.item, header, list)
  } else {
    let value = read_node(ctx, &collection.item, header, None, true)?;
    list.borrow_mut().push(value);
    Ok(())
  }
}

fn read_packed(
  ctx: &mut ReadCtx<'_>,
  item: &Node,
  header: FieldHeader,
  list: &ListRef,
) -> Result<()> {
  let mark = ctx.reader.start_frame(header)?;
  while !ctx.reader.region_exhausted() {
    let value = match item {
      Node::Scalar(kind) => scalar::read_scalar_payload(&mut ctx.reader, *kind)?,
      Node::Enum(type_id) => {
        let raw = ctx.reader.read_varint()?;
        decode_enum(ctx.model, *type_id, raw)?
      },
      _ => {
        return Err(Error::TypeMismatch {
          expected: "packable element",
          found: "nested node".to_string(),
        });
      },
    };
    list.borrow_mut().push(value);
  }
  ctx.reader.end_frame(mark)?;
  Ok(())
}

fn read_reference(ctx: &mut ReadCtx<'_>, inner: &Node, header: FieldHeader) -> Result<Value> {
  let mark = ctx.reader.start_frame(header)?;
  let mut result: Option<Value> = None;
  let mut list_shell: Option<ListRef> = None;

  while let Some(field) = ctx.reader.read_field_header()? {
    match field.field_number {
      REF_TOKEN_FIELD if field.wire_type == WireType::Varint => {
        let token = read_token(ctx)?;
        result = Some(ctx.tracker.resolve_backward(token)?);
      },
      REF_DEFINITION_FIELD => {
        result = Some(read_reference_definition(ctx, inner, field, &mut list_shell)?);
      },
      _ => ctx.reader.skip_field(field)?,
    }
  }
  ctx.reader.end_frame(mark)?;
  result.ok_or(Error::EmptyReference)
}

/// Inline first-sighting definition: register the shell under the next
/// token before its content is read, so nested back-references resolve.
fn read_reference_definition(
  ctx: &mut ReadCtx<'_>,
  inner: &Node,
  field: FieldHeader,
  list_shell: &mut Option<ListRef>,
) -> Result<Value> {
  match inner {
    Node::Message { type_id, .. } => {
      let shell: crate::value::ObjRef = Rc::new(RefCell::new(Instance::new(*type_id)));
      ctx.tracker.note(Value::Object(shell.clone()));
      message::read_message_field(ctx, field, *type_id, Some((shell, false)))
    },
    Node::Collection(collection) => {
      // Unpacked list definitions repeat the field; register the shell on
      // the first entry only.
      let list = if let Some(list) = list_shell {
        list.clone()
      } else {
        let list: ListRef = Rc::new(RefCell::new(Vec::new()));
        ctx.tracker.note(Value::List(list.clone()));
        *list_shell = Some(list.clone());
        list
      };
      read_collection_into(ctx, collection, field, &list)?;
      Ok(Value::List(list))
    },
    Node::Surrogate { .. } => {
      // The converted value exists only after the content is read; hold
      // the token's position with a placeholder. Cycles through surrogates
      // are not supported.
      let token = ctx.tracker.note(Value::Null);
      let value = read_node(ctx, inner, field, None, true)?;
      ctx.tracker.replace(token, value.clone());
      Ok(value)
    },
    _ => Err(Error::TypeMismatch {
      expected: "reference-capable node",
      found: "scalar".to_string(),
    }),
  }
}

fn read_late_reference(ctx: &mut ReadCtx<'_>, declared: TypeId, header: FieldHeader) -> Result<Value> {
  let mark = ctx.reader.start_frame(header)?;
  let mut result: Option<Value> = None;
  while let Some(field) = ctx.reader.read_field_header()? {
    match field.field_number {
      REF_TOKEN_FIELD if field.wire_type == WireType::Varint => {
        let token = read_token(ctx)?;
        result = Some(ctx.tracker.resolve_or_reserve(token, declared));
      },
      _ => ctx.reader.skip_field(field)?,
    }
  }
  ctx.reader.end_frame(mark)?;
  result.ok_or(Error::EmptyReference)
}

fn read_token(ctx: &mut ReadCtx<'_>) -> Result<u32> {
  u32::try_from(ctx.reader.read_varint()?).map_err(|_| Error::ValueOutOfRange {
    what: "reference token",
  })
}
