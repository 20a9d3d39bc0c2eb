// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! The message-level state machine.
//!
//! Writing emits, in order: the sub-type discriminator field when the
//! runtime type is a declared derived type (nested recursively, deepest
//! first), own members ascending by field number with defaulted values
//! elided per policy, then retained unknown-field bytes verbatim.
//!
//! Reading loops over field headers, dispatching to the sub-type table or
//! the member table, materializing the instance lazily so the sub-type
//! discriminator can pick the concrete type before construction. Unknown
//! fields are retained when the type is extension-capable and skipped
//! otherwise.

use crate::model::TypeDescriptor;
use crate::node::{ReadCtx, WriteCtx, read_node, write_member};
use crate::schema::{AbsentPolicy, InstantiationStrategy, TypeId};
use crate::value::{Instance, ObjRef, Value};
use crate::{Error, Result};
use bd_graph_wire::{FieldHeader, FrameStyle};
use std::cell::RefCell;
use std::rc::Rc;

/// Write one message-typed field: framing plus the message body.
pub(crate) fn write_message_field(
  ctx: &mut WriteCtx<'_>,
  field_number: u32,
  declared: TypeId,
  group_framed: bool,
  obj: &ObjRef,
) -> Result<()> {
  ctx.enter()?;
  let style = if group_framed {
    FrameStyle::Group
  } else {
    FrameStyle::LengthPrefixed
  };
  let frame = ctx.writer.start_frame(field_number, style);
  write_message(ctx, declared, obj)?;
  ctx.writer.end_frame(frame)?;
  ctx.leave();
  Ok(())
}

/// Write a message body (no framing) as seen from the `declared` level of
/// the inheritance chain.
pub(crate) fn write_message(ctx: &mut WriteCtx<'_>, declared: TypeId, obj: &ObjRef) -> Result<()> {
  let descriptor = ctx.model.resolve(declared)?;

  if let Some(callback) = &descriptor.callbacks.before_serialize {
    callback(&mut obj.borrow_mut());
  }

  let runtime = obj.borrow().type_id;
  if runtime != declared {
    let Some((sub_field, sub_id)) = ctx.model.dispatch_sub_type(declared, runtime)? else {
      return Err(Error::UnexpectedSubtype {
        declared: ctx.model.type_name(declared).to_string(),
        actual: ctx.model.type_name(runtime).to_string(),
      });
    };
    let frame = ctx.writer.start_frame(sub_field, FrameStyle::LengthPrefixed);
    write_message(ctx, sub_id, obj)?;
    ctx.writer.end_frame(frame)?;
  }

  for member in &descriptor.members {
    // Clone the value out so no borrow is held across recursion; the graph
    // may lead back to this instance.
    let value = obj.borrow().field(member.field_number).cloned();
    write_member(ctx, member, value.as_ref())?;
  }

  if descriptor.extension_data {
    let retained: Vec<Vec<u8>> = obj
      .borrow()
      .extensions
      .iter()
      .filter(|(level, _)| *level == declared)
      .map(|(_, bytes)| bytes.clone())
      .collect();
    for bytes in retained {
      ctx.writer.write_raw(&bytes);
    }
  }

  if let Some(callback) = &descriptor.callbacks.after_serialize {
    callback(&mut obj.borrow_mut());
  }
  Ok(())
}

/// Read one message-typed field into `into` (a merge target or a
/// pre-registered reference shell) or a fresh instance.
pub(crate) fn read_message_field(
  ctx: &mut ReadCtx<'_>,
  header: FieldHeader,
  declared: TypeId,
  into: Option<(ObjRef, bool)>,
) -> Result<Value> {
  let (shell, mut materialized) =
    into.unwrap_or_else(|| (Rc::new(RefCell::new(Instance::new(declared))), false));

  let mark = ctx.reader.start_frame(header)?;
  read_message_into(ctx, declared, &shell, &mut materialized)?;
  ctx.reader.end_frame(mark)?;

  run_after_deserialize(ctx, &shell)?;
  Ok(Value::Object(shell))
}

/// Run the runtime type's after-deserialize hook once the whole instance
/// is in place.
pub(crate) fn run_after_deserialize(ctx: &mut ReadCtx<'_>, shell: &ObjRef) -> Result<()> {
  let runtime = shell.borrow().type_id;
  let descriptor = ctx.model.resolve(runtime)?;
  if let Some(callback) = &descriptor.callbacks.after_deserialize {
    callback(&mut shell.borrow_mut());
  }
  Ok(())
}

/// The field loop for one level of the inheritance chain, inside an
/// already-opened frame.
pub(crate) fn read_message_into(
  ctx: &mut ReadCtx<'_>,
  declared: TypeId,
  shell: &ObjRef,
  materialized: &mut bool,
) -> Result<()> {
  let descriptor = ctx.model.resolve(declared)?;
  let mut seen = vec![false; descriptor.members.len()];

  loop {
    let field_start = ctx.reader.position();
    let Some(header) = ctx.reader.read_field_header()? else {
      break;
    };

    if let Some(sub_id) = descriptor.sub_type(header.field_number) {
      if *materialized {
        // The discriminator must come before any field that forces
        // construction; losing it would silently flatten the type.
        return Err(Error::UnexpectedSubtype {
          declared: ctx.model.type_name(declared).to_string(),
          actual: ctx.model.type_name(sub_id).to_string(),
        });
      }
      let mark = ctx.reader.start_frame(header)?;
      read_message_into(ctx, sub_id, shell, materialized)?;
      ctx.reader.end_frame(mark)?;
      continue;
    }

    if let Some(index) = descriptor.member_index(header.field_number) {
      if !*materialized {
        materialize(&descriptor, shell)?;
        *materialized = true;
      }
      let member = &descriptor.members[index];
      let existing = shell.borrow().field(member.field_number).cloned();
      let value = read_node(ctx, &member.node, header, existing, !seen[index])?;
      shell.borrow_mut().set_field(member.field_number, value);
      seen[index] = true;
      continue;
    }

    // Unknown field: retain or skip (forward compatible either way).
    ctx.reader.skip_field(header)?;
    if descriptor.extension_data {
      let bytes = ctx.reader.bytes_since(field_start).to_vec();
      shell.borrow_mut().extensions.push((declared, bytes));
    }
  }

  if !*materialized {
    // A fully-empty message still yields an instance.
    materialize(&descriptor, shell)?;
    *materialized = true;
  }

  // Implicit-default collections read back as empty rather than missing;
  // optional-absent ones stay absent.
  for (index, member) in descriptor.members.iter().enumerate() {
    if !seen[index]
      && member.is_collection()
      && matches!(member.absent, AbsentPolicy::ZeroDefault)
    {
      let mut instance = shell.borrow_mut();
      if instance.field(member.field_number).is_none() {
        instance.set_field(member.field_number, Value::list(Vec::new()));
      }
    }
  }
  Ok(())
}

/// Replace the shell's contents with a fresh instance of the descriptor's
/// type, preserving the shell's identity.
fn materialize(descriptor: &TypeDescriptor, shell: &ObjRef) -> Result<()> {
  let mut instance = match &descriptor.strategy {
    InstantiationStrategy::Empty => Instance::new(descriptor.type_id),
    InstantiationStrategy::Factory(factory) => factory(descriptor.type_id),
    InstantiationStrategy::Unconstructible => {
      return Err(Error::Unconstructible {
        type_name: descriptor.name.clone(),
      });
    },
  };
  instance.type_id = descriptor.type_id;
  *shell.borrow_mut() = instance;

  if let Some(callback) = &descriptor.callbacks.before_deserialize {
    callback(&mut shell.borrow_mut());
  }
  Ok(())
}
