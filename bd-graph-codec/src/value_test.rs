// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use pretty_assertions::assert_eq;

const SOME_TYPE: TypeId = TypeId(0);

#[test]
fn defaults() {
  let defaulted = vec![
    Value::Null,
    Value::Bool(false),
    Value::I32(0),
    Value::I64(0),
    Value::U32(0),
    Value::U64(0),
    Value::F32(0.0),
    Value::F64(0.0),
    Value::String(String::new()),
    Value::Bytes(Vec::new()),
    Value::Guid(Uuid::nil()),
    Value::Decimal(Decimal::ZERO),
    Value::DateTime(OffsetDateTime::UNIX_EPOCH),
    Value::Duration(Duration::ZERO),
    Value::Enum(0),
    Value::list(Vec::new()),
  ];
  for value in defaulted {
    assert!(value.is_default(), "{value:?} should be default");
  }

  let not_defaulted = vec![
    Value::Bool(true),
    Value::I32(-1),
    Value::String("x".to_string()),
    Value::list(vec![Value::I32(0)]),
    Value::object(Instance::new(SOME_TYPE)),
  ];
  for value in not_defaulted {
    assert!(!value.is_default(), "{value:?} should not be default");
  }
}

#[test]
fn accessors() {
  assert_eq!(Value::Bool(true).as_bool(), Some(true));
  assert_eq!(Value::I32(7).as_i32(), Some(7));
  assert_eq!(Value::I64(-7).as_i64(), Some(-7));
  assert_eq!(Value::from("hi").as_str(), Some("hi"));
  assert_eq!(Value::I32(7).as_str(), None);
  assert!(Value::Null.is_null());

  let list = Value::list(vec![Value::I32(1)]);
  assert_eq!(list.as_list().unwrap().borrow().len(), 1);
}

#[test]
fn instance_fields() {
  let mut instance = Instance::with_fields(SOME_TYPE, [(1, Value::from("abc")), (2, Value::from(12))]);
  assert_eq!(instance.field(1), Some(&Value::from("abc")));
  assert_eq!(instance.field(3), None);

  instance.set_field(3, Value::Bool(true));
  assert_eq!(instance.field(3), Some(&Value::Bool(true)));

  // Fields iterate in ascending field-number order.
  let numbers: Vec<u32> = instance.fields.keys().copied().collect();
  assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn shared_handles_compare_structurally() {
  let a = Value::object(Instance::with_fields(SOME_TYPE, [(1, Value::I32(5))]));
  let b = Value::object(Instance::with_fields(SOME_TYPE, [(1, Value::I32(5))]));
  assert_eq!(a, b);

  let left = a.as_object().unwrap();
  let right = b.as_object().unwrap();
  assert!(!Rc::ptr_eq(left, right));
}
