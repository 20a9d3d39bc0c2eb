// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Per-operation reference tracking.
//!
//! Tokens are assigned in first-sighting order on write, which equals
//! first-sighting order on read, so reference fields only ever carry a
//! compact token index. The read side is an index arena of resolved values
//! and pending shells: a forward (late) reference reserves an empty shell
//! that every holder of the token shares, and the trailer definition later
//! fills that same shell in place.

#[cfg(test)]
#[path = "./tracker_test.rs"]
mod tracker_test;

use crate::schema::TypeId;
use crate::value::{Instance, ListRef, ObjRef, Value};
use crate::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

//
// WriteTracker
//

/// Write-side identity table: `Rc` address to token, plus the queue of
/// late-referenced objects whose definitions go into the envelope trailer.
#[derive(Default)]
pub struct WriteTracker {
  tokens: ahash::AHashMap<usize, u32>,
  deferred: VecDeque<(u32, ObjRef, TypeId)>,
}

impl WriteTracker {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Token for an object, assigning the next sequential one on first
  /// sighting. The table is always consulted first, so one instance can
  /// never receive two tokens.
  pub fn token_for_object(&mut self, obj: &ObjRef) -> (u32, bool) {
    self.token_for_address(Rc::as_ptr(obj) as usize)
  }

  /// Token for a collection instance.
  pub fn token_for_list(&mut self, list: &ListRef) -> (u32, bool) {
    self.token_for_address(Rc::as_ptr(list) as usize)
  }

  fn token_for_address(&mut self, address: usize) -> (u32, bool) {
    #[allow(clippy::cast_possible_truncation)]
    let next = self.tokens.len() as u32;
    match self.tokens.entry(address) {
      std::collections::hash_map::Entry::Occupied(entry) => (*entry.get(), false),
      std::collections::hash_map::Entry::Vacant(entry) => {
        entry.insert(next);
        (next, true)
      },
    }
  }

  /// Queue a late-referenced object for the envelope trailer. `declared`
  /// is the member's declared type, which the reader derives the same way.
  pub fn defer(&mut self, token: u32, obj: ObjRef, declared: TypeId) {
    self.deferred.push_back((token, obj, declared));
  }

  pub fn pop_deferred(&mut self) -> Option<(u32, ObjRef, TypeId)> {
    self.deferred.pop_front()
  }

  #[must_use]
  pub fn first_deferred_token(&self) -> Option<u32> {
    self.deferred.front().map(|(token, ..)| *token)
  }
}

//
// ReadTracker
//

enum Slot {
  Resolved(Value),
  Pending { shell: ObjRef, declared: TypeId },
}

/// Read-side slot arena. Slots are appended in token order; a late
/// reference to a not-yet-seen token reserves pending shells up to it.
#[derive(Default)]
pub struct ReadTracker {
  slots: Vec<Slot>,
}

impl ReadTracker {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly-materialized value under the next sequential token.
  /// Must be called before the value's content is read so nested
  /// back-references resolve.
  pub fn note(&mut self, value: Value) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let token = self.slots.len() as u32;
    self.slots.push(Slot::Resolved(value));
    token
  }

  /// Replace a previously-noted placeholder once the real value exists
  /// (surrogate conversions produce their value only after the content is
  /// read).
  pub fn replace(&mut self, token: u32, value: Value) {
    if let Some(slot) = self.slots.get_mut(token as usize) {
      *slot = Slot::Resolved(value);
    }
  }

  /// Resolve a token that must already have been sighted. Both resolved
  /// values and pending shells qualify; a token beyond the high-water mark
  /// means the stream references something it never announced.
  pub fn resolve_backward(&self, token: u32) -> Result<Value> {
    match self.slots.get(token as usize) {
      Some(Slot::Resolved(value)) => Ok(value.clone()),
      Some(Slot::Pending { shell, .. }) => Ok(Value::Object(shell.clone())),
      None => Err(Error::UnresolvedReference { token }),
    }
  }

  /// Resolve a late-reference token, reserving pending shells through it
  /// on first sighting. Holders all share the shell, which the envelope
  /// trailer fulfills in place.
  pub fn resolve_or_reserve(&mut self, token: u32, declared: TypeId) -> Value {
    while self.slots.len() <= token as usize {
      self.slots.push(Slot::Pending {
        shell: Rc::new(RefCell::new(Instance::new(declared))),
        declared,
      });
    }
    match &self.slots[token as usize] {
      Slot::Resolved(value) => value.clone(),
      Slot::Pending { shell, .. } => Value::Object(shell.clone()),
    }
  }

  /// Hand out the pending shell for a trailer record so its definition can
  /// be read into it, marking the slot resolved.
  pub fn take_pending(&mut self, token: u32) -> Result<(ObjRef, TypeId)> {
    let index = token as usize;
    if !matches!(self.slots.get(index), Some(Slot::Pending { .. })) {
      return Err(Error::UnresolvedReference { token });
    }
    let Slot::Pending { shell, declared } =
      std::mem::replace(&mut self.slots[index], Slot::Resolved(Value::Null))
    else {
      return Err(Error::UnresolvedReference { token });
    };
    self.slots[index] = Slot::Resolved(Value::Object(shell.clone()));
    Ok((shell, declared))
  }

  /// First token whose definition never arrived, if any. Checked at the
  /// end of every operation.
  #[must_use]
  pub fn first_unresolved(&self) -> Option<u32> {
    let index = self
      .slots
      .iter()
      .position(|slot| matches!(slot, Slot::Pending { .. }))?;
    #[allow(clippy::cast_possible_truncation)]
    let token = index as u32;
    Some(token)
  }
}
