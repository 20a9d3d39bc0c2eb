// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use crate::schema::{ScalarKind, SubTypeSchema};
use crate::value::{Instance, Value};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

fn simple_member(field_number: u32) -> MemberSchema {
  MemberSchema::scalar(field_number, ScalarKind::I32)
}

#[test]
fn build_fails_on_undefined_type() {
  let mut builder = TypeModelBuilder::new();
  builder.reserve("Ghost");
  assert_matches!(
    builder.build(),
    Err(ModelBuildError::UndefinedType { name }) if name == "Ghost"
  );
}

#[test]
fn duplicate_field_numbers_rejected() {
  let mut builder = TypeModelBuilder::new();
  let id = builder.message("Dup", MessageSchema {
    members: vec![simple_member(1), simple_member(1)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(id),
    Err(Error::Model(ModelBuildError::DuplicateFieldNumber {
      field_number: 1,
      ..
    }))
  );
}

#[test]
fn zero_and_oversized_field_numbers_rejected() {
  let mut builder = TypeModelBuilder::new();
  let zero = builder.message("Zero", MessageSchema {
    members: vec![simple_member(0)],
    ..MessageSchema::default()
  });
  let big = builder.message("Big", MessageSchema {
    members: vec![simple_member(1 << 29)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(zero),
    Err(Error::Model(ModelBuildError::FieldNumberZero { .. }))
  );
  assert_matches!(
    model.resolve(big),
    Err(Error::Model(ModelBuildError::FieldNumberOutOfRange { .. }))
  );
}

#[test]
fn packed_requires_packable_repeated_elements() {
  let mut builder = TypeModelBuilder::new();

  let mut packed_string = MemberSchema::scalar(1, ScalarKind::String);
  packed_string.repeated = Repeated::List;
  packed_string.packed = true;
  let strings = builder.message("PackedStrings", MessageSchema {
    members: vec![packed_string],
    ..MessageSchema::default()
  });

  let mut packed_single = MemberSchema::scalar(1, ScalarKind::I32);
  packed_single.packed = true;
  let single = builder.message("PackedSingle", MessageSchema {
    members: vec![packed_single],
    ..MessageSchema::default()
  });

  let model = builder.build().unwrap();
  assert_matches!(
    model.resolve(strings),
    Err(Error::Model(ModelBuildError::PackedNotScalar { .. }))
  );
  assert_matches!(
    model.resolve(single),
    Err(Error::Model(ModelBuildError::PackedNotScalar { .. }))
  );
}

#[test]
fn reference_semantics_require_identity() {
  let mut builder = TypeModelBuilder::new();
  let mut member = MemberSchema::scalar(1, ScalarKind::String);
  member.as_reference = true;
  let id = builder.message("StringRef", MessageSchema {
    members: vec![member],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(id),
    Err(Error::Model(ModelBuildError::ReferenceNotSupported {
      field_number: 1,
      ..
    }))
  );
}

#[test]
fn late_reference_requires_singular_message() {
  let mut builder = TypeModelBuilder::new();
  let mut member = MemberSchema::scalar(1, ScalarKind::I32);
  member.late_reference = true;
  let id = builder.message("LateScalar", MessageSchema {
    members: vec![member],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(id),
    Err(Error::Model(ModelBuildError::LateReferenceNotMessage { .. }))
  );
}

#[test]
fn sub_type_dispatch_numbers_cannot_collide_with_members() {
  let mut builder = TypeModelBuilder::new();
  let base = builder.reserve("Base");
  let derived = builder.reserve("Derived");
  builder.define_message(base, MessageSchema {
    members: vec![simple_member(1)],
    sub_types: vec![SubTypeSchema {
      field_number: 2,
      type_id: derived,
    }],
    ..MessageSchema::default()
  });
  builder.define_message(derived, MessageSchema {
    // Field 2 is taken by the base's dispatch table.
    members: vec![simple_member(2)],
    base: Some(base),
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(base),
    Err(Error::Model(ModelBuildError::SubTypeFieldClash {
      field_number: 2,
      ..
    }))
  );
}

#[test]
fn sub_type_cycles_rejected() {
  let mut builder = TypeModelBuilder::new();
  let a = builder.reserve("A");
  let b = builder.reserve("B");
  builder.define_message(a, MessageSchema {
    sub_types: vec![SubTypeSchema {
      field_number: 1,
      type_id: b,
    }],
    ..MessageSchema::default()
  });
  builder.define_message(b, MessageSchema {
    sub_types: vec![SubTypeSchema {
      field_number: 1,
      type_id: a,
    }],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(a),
    Err(Error::Model(ModelBuildError::SubTypeCycle { .. }))
  );
}

#[test]
fn unconstructible_types_need_an_escape_hatch() {
  let mut builder = TypeModelBuilder::new();
  let id = builder.message("Abstract", MessageSchema {
    strategy: InstantiationStrategy::Unconstructible,
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(id),
    Err(Error::Model(ModelBuildError::Unconstructible { .. }))
  );
}

#[test]
fn enum_duplicate_values_rejected() {
  let mut builder = TypeModelBuilder::new();
  let color = builder.enumeration("Color", EnumSchema {
    members: vec![("Red".to_string(), 1), ("Crimson".to_string(), 1)],
    pass_through: false,
  });
  let host = builder.message("Host", MessageSchema {
    members: vec![MemberSchema::enumeration(1, color)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(host),
    Err(Error::Model(ModelBuildError::DuplicateEnumValue { value: 1, .. }))
  );
}

#[test]
fn surrogate_must_target_a_message() {
  let mut builder = TypeModelBuilder::new();
  let color = builder.enumeration("Color", EnumSchema::default());
  let id = builder.message("Proxied", MessageSchema {
    surrogate: Some(SurrogateSchema {
      surrogate: color,
      to_surrogate: std::sync::Arc::new(Ok),
      from_surrogate: std::sync::Arc::new(Ok),
    }),
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(id),
    Err(Error::Model(ModelBuildError::InvalidSurrogate { .. }))
  );
}

#[test]
fn resolving_an_enum_directly_fails() {
  let mut builder = TypeModelBuilder::new();
  let color = builder.enumeration("Color", EnumSchema::default());
  let model = builder.build().unwrap();

  assert_matches!(
    model.resolve(color),
    Err(Error::Model(ModelBuildError::NotAMessage { .. }))
  );
}

#[test]
fn descriptors_build_once_and_cache() {
  let mut builder = TypeModelBuilder::new();
  let id = builder.message("Cached", MessageSchema {
    members: vec![simple_member(1)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  let first = model.resolve(id).unwrap();
  let second = model.resolve(id).unwrap();
  assert!(std::sync::Arc::ptr_eq(&first, &second));
  assert_eq!(model.build_count(), 1);
}

#[test]
fn build_failures_are_cached_permanently() {
  let mut builder = TypeModelBuilder::new();
  let id = builder.message("Broken", MessageSchema {
    members: vec![simple_member(1), simple_member(1)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  let first = model.resolve(id).unwrap_err();
  let second = model.resolve(id).unwrap_err();
  assert_eq!(first, second);
  assert_eq!(model.build_count(), 1);
}

// Concurrent first use of one type must run exactly one build; unrelated
// types must not serialize behind it.
#[test]
fn concurrent_first_use_builds_once() {
  let mut builder = TypeModelBuilder::new();
  let shared = builder.message("Shared", MessageSchema {
    members: vec![simple_member(1)],
    ..MessageSchema::default()
  });
  let other = builder.message("Other", MessageSchema {
    members: vec![simple_member(1)],
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  std::thread::scope(|scope| {
    for _ in 0 .. 8 {
      scope.spawn(|| {
        model.resolve(shared).unwrap();
        model.resolve(other).unwrap();
      });
    }
  });

  assert_eq!(model.build_count(), 2);
}

#[test]
fn factory_strategy_constructs_instances() {
  let mut builder = TypeModelBuilder::new();
  let id = builder.message("WithFactory", MessageSchema {
    members: vec![simple_member(1)],
    strategy: InstantiationStrategy::Factory(std::sync::Arc::new(|type_id| {
      Instance::with_fields(type_id, [(1, Value::I32(41))])
    })),
    ..MessageSchema::default()
  });
  let model = builder.build().unwrap();

  let descriptor = model.resolve(id).unwrap();
  assert_eq!(descriptor.name, "WithFactory");
  assert_eq!(descriptor.members.len(), 1);
}
