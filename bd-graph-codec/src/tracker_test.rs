// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use pretty_assertions::assert_eq;

const TYPE_A: TypeId = TypeId(0);
const TYPE_B: TypeId = TypeId(1);

fn shell(type_id: TypeId) -> ObjRef {
  Rc::new(RefCell::new(Instance::new(type_id)))
}

#[test]
fn write_tokens_are_sequential_and_stable() {
  let mut tracker = WriteTracker::new();
  let a = shell(TYPE_A);
  let b = shell(TYPE_B);

  assert_eq!(tracker.token_for_object(&a), (0, true));
  assert_eq!(tracker.token_for_object(&b), (1, true));
  // Re-sighting the same instance yields the same token, never a new one.
  assert_eq!(tracker.token_for_object(&a), (0, false));
  assert_eq!(tracker.token_for_object(&b), (1, false));

  let list: ListRef = Rc::new(RefCell::new(vec![Value::I32(1)]));
  assert_eq!(tracker.token_for_list(&list), (2, true));
  assert_eq!(tracker.token_for_list(&list), (2, false));
}

#[test]
fn clones_share_identity() {
  let mut tracker = WriteTracker::new();
  let a = shell(TYPE_A);
  let alias = a.clone();

  assert_eq!(tracker.token_for_object(&a), (0, true));
  assert_eq!(tracker.token_for_object(&alias), (0, false));
}

#[test]
fn deferred_queue_is_fifo() {
  let mut tracker = WriteTracker::new();
  let a = shell(TYPE_A);
  let b = shell(TYPE_B);
  let (token_a, _) = tracker.token_for_object(&a);
  let (token_b, _) = tracker.token_for_object(&b);

  tracker.defer(token_a, a.clone(), TYPE_A);
  tracker.defer(token_b, b.clone(), TYPE_B);
  assert_eq!(tracker.first_deferred_token(), Some(token_a));

  let (token, obj, declared) = tracker.pop_deferred().unwrap();
  assert_eq!((token, declared), (token_a, TYPE_A));
  assert!(Rc::ptr_eq(&obj, &a));
  let (token, ..) = tracker.pop_deferred().unwrap();
  assert_eq!(token, token_b);
  assert!(tracker.pop_deferred().is_none());
}

#[test]
fn read_note_and_resolve() {
  let mut tracker = ReadTracker::new();
  let a = shell(TYPE_A);

  let token = tracker.note(Value::Object(a.clone()));
  assert_eq!(token, 0);

  let resolved = tracker.resolve_backward(0).unwrap();
  assert!(Rc::ptr_eq(resolved.as_object().unwrap(), &a));

  // A token the stream never announced is a protocol error.
  assert_eq!(
    tracker.resolve_backward(1),
    Err(Error::UnresolvedReference { token: 1 })
  );
}

#[test]
fn forward_reference_reserves_and_fulfills() {
  let mut tracker = ReadTracker::new();
  tracker.note(Value::Object(shell(TYPE_A)));

  // Token 1 has not been defined yet; every holder shares the shell.
  let first = tracker.resolve_or_reserve(1, TYPE_B);
  let second = tracker.resolve_or_reserve(1, TYPE_B);
  assert!(Rc::ptr_eq(
    first.as_object().unwrap(),
    second.as_object().unwrap()
  ));
  assert_eq!(tracker.first_unresolved(), Some(1));

  let (pending, declared) = tracker.take_pending(1).unwrap();
  assert_eq!(declared, TYPE_B);
  assert!(Rc::ptr_eq(&pending, first.as_object().unwrap()));
  pending.borrow_mut().set_field(1, Value::I32(42));

  // The earlier holder observes the fulfillment in place.
  assert_eq!(
    first.as_object().unwrap().borrow().field(1),
    Some(&Value::I32(42))
  );
  assert_eq!(tracker.first_unresolved(), None);

  // A second definition for the same token is a protocol error.
  assert_eq!(
    tracker.take_pending(1).map(|_| ()),
    Err(Error::UnresolvedReference { token: 1 })
  );
}

#[test]
fn placeholder_replacement() {
  let mut tracker = ReadTracker::new();
  let token = tracker.note(Value::Null);
  tracker.replace(token, Value::I32(9));
  assert_eq!(tracker.resolve_backward(token), Ok(Value::I32(9)));
}
