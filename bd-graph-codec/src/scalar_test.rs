// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![allow(clippy::unwrap_used)]

use super::*;
use pretty_assertions::assert_eq;
use time::macros::datetime;

fn roundtrip(kind: ScalarKind, value: &Value) -> Value {
  let mut writer = FrameWriter::new();
  write_scalar(&mut writer, 1, kind, value).unwrap();
  let bytes = writer.into_bytes().unwrap();

  let mut reader = FrameReader::new(&bytes);
  let header = reader.read_field_header().unwrap().unwrap();
  let decoded = read_scalar(&mut reader, kind, header).unwrap();
  assert!(reader.at_end(), "trailing bytes for {kind:?}");
  decoded
}

#[test]
fn numeric_roundtrips() {
  let cases = vec![
    (ScalarKind::Bool, Value::Bool(true)),
    (ScalarKind::I32, Value::I32(-123_456)),
    (ScalarKind::I32, Value::I32(i32::MIN)),
    (ScalarKind::SI32, Value::I32(-1)),
    (ScalarKind::U32, Value::U32(u32::MAX)),
    (ScalarKind::I64, Value::I64(i64::MIN)),
    (ScalarKind::SI64, Value::I64(-987_654_321)),
    (ScalarKind::U64, Value::U64(u64::MAX)),
    (ScalarKind::F32, Value::F32(1.5)),
    (ScalarKind::F64, Value::F64(-2.25)),
    (ScalarKind::Fixed32, Value::U32(0xDEAD_BEEF)),
    (ScalarKind::SFixed32, Value::I32(-42)),
    (ScalarKind::Fixed64, Value::U64(u64::MAX - 1)),
    (ScalarKind::SFixed64, Value::I64(i64::MIN + 1)),
    (ScalarKind::String, Value::from("héllo")),
    (ScalarKind::Bytes, Value::Bytes(vec![0, 1, 2, 255])),
  ];
  for (kind, value) in cases {
    assert_eq!(roundtrip(kind, &value), value, "failed for {kind:?}");
  }
}

// Negative int32 values sign-extend to ten wire bytes, same as protobuf.
#[test]
fn negative_int32_sign_extends() {
  let mut writer = FrameWriter::new();
  write_scalar(&mut writer, 1, ScalarKind::I32, &Value::I32(-1)).unwrap();
  let bytes = writer.into_bytes().unwrap();
  assert_eq!(
    bytes,
    vec![0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]
  );
}

#[test]
fn guid_layout() {
  let uuid = Uuid::from_bytes([
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, //
    0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
  ]);

  let mut writer = FrameWriter::new();
  write_scalar(&mut writer, 1, ScalarKind::Guid, &Value::Guid(uuid)).unwrap();
  let bytes = writer.into_bytes().unwrap();

  // Two fixed64 halves, little endian, 18 payload bytes.
  assert_eq!(
    bytes,
    vec![
      0x0A, 18, // field 1, length 18
      0x09, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // half 1
      0x11, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, // half 2
    ]
  );
  assert_eq!(roundtrip(ScalarKind::Guid, &Value::Guid(uuid)), Value::Guid(uuid));
}

#[test]
fn decimal_layout() {
  let value = Decimal {
    lo: 12_345,
    hi: 0,
    scale: 2,
    negative: true,
  };

  let mut writer = FrameWriter::new();
  write_scalar(&mut writer, 1, ScalarKind::Decimal, &Value::Decimal(value)).unwrap();
  let bytes = writer.into_bytes().unwrap();

  assert_eq!(
    bytes,
    vec![
      0x0A, 11, // field 1, length 11
      0x09, 0x39, 0x30, 0, 0, 0, 0, 0, 0, // lo = 12345 fixed64
      0x18, 0x05, // sign_scale = (2 << 1) | 1
    ]
  );
  assert_eq!(
    roundtrip(ScalarKind::Decimal, &Value::Decimal(value)),
    Value::Decimal(value)
  );
}

#[test]
fn decimal_roundtrips() {
  let cases = vec![
    Decimal::ZERO,
    Decimal {
      lo: u64::MAX,
      hi: u64::MAX,
      scale: 28,
      negative: false,
    },
    Decimal {
      lo: 1,
      hi: 0,
      scale: 0,
      negative: true,
    },
  ];
  for value in cases {
    assert_eq!(
      roundtrip(ScalarKind::Decimal, &Value::Decimal(value)),
      Value::Decimal(value)
    );
  }
}

#[test]
fn decimal_scale_cap() {
  // sign_scale announcing scale 29.
  let bytes = vec![0x0A, 2, 0x18, 29 << 1];
  let mut reader = FrameReader::new(&bytes);
  let header = reader.read_field_header().unwrap().unwrap();
  assert_eq!(
    read_scalar(&mut reader, ScalarKind::Decimal, header),
    Err(Error::ValueOutOfRange {
      what: "decimal scale"
    })
  );
}

#[test]
fn datetime_roundtrips() {
  let cases = vec![
    datetime!(1970-01-01 00:00:00 UTC),
    datetime!(2024-02-29 00:00:00 UTC),          // whole days
    datetime!(2024-02-29 13:00:00 UTC),          // whole hours
    datetime!(2024-02-29 13:07:11 UTC),          // whole seconds
    datetime!(2024-02-29 13:07:11.250 UTC),      // milliseconds
    datetime!(2024-02-29 13:07:11.250_000_1 UTC), // ticks
    datetime!(1944-06-06 06:30:00 UTC),          // pre-epoch
  ];
  for value in cases {
    assert_eq!(
      roundtrip(ScalarKind::DateTime, &Value::DateTime(value)),
      Value::DateTime(value),
      "failed for {value}"
    );
  }
}

#[test]
fn whole_days_use_the_day_scale() {
  // 2 days after the epoch: value 2, scale omitted (days is the default).
  let mut writer = FrameWriter::new();
  write_scalar(
    &mut writer,
    1,
    ScalarKind::DateTime,
    &Value::DateTime(datetime!(1970-01-03 00:00:00 UTC)),
  )
  .unwrap();
  assert_eq!(writer.into_bytes().unwrap(), vec![0x0A, 2, 0x08, 0x04]); // zigzag(2)
}

#[test]
fn duration_roundtrips() {
  let cases = vec![
    Duration::ZERO,
    Duration::days(-3),
    Duration::seconds(90),
    Duration::milliseconds(1),
    Duration::nanoseconds(100), // one tick
  ];
  for value in cases {
    assert_eq!(
      roundtrip(ScalarKind::Duration, &Value::Duration(value)),
      Value::Duration(value),
      "failed for {value}"
    );
  }
}

#[test]
fn unknown_time_scale_rejected() {
  let bytes = vec![0x0A, 4, 0x08, 0x02, 0x10, 0x09]; // scale 9
  let mut reader = FrameReader::new(&bytes);
  let header = reader.read_field_header().unwrap().unwrap();
  assert_eq!(
    read_scalar(&mut reader, ScalarKind::DateTime, header),
    Err(Error::ValueOutOfRange { what: "time scale" })
  );
}

#[test]
fn wire_type_checked() {
  // field 1 as fixed32 where a varint kind is expected.
  let bytes = vec![0x0D, 1, 0, 0, 0];
  let mut reader = FrameReader::new(&bytes);
  let header = reader.read_field_header().unwrap().unwrap();
  assert_eq!(
    read_scalar(&mut reader, ScalarKind::I32, header),
    Err(Error::WireTypeMismatch {
      field_number: 1,
      expected: "varint"
    })
  );
}

#[test]
fn value_shape_checked() {
  let mut writer = FrameWriter::new();
  assert_eq!(
    write_scalar(&mut writer, 1, ScalarKind::I32, &Value::from("nope")),
    Err(Error::TypeMismatch {
      expected: "i32",
      found: "string".to_string()
    })
  );
}

#[test]
fn invalid_utf8_rejected() {
  let bytes = vec![0x0A, 2, 0xFF, 0xFE];
  let mut reader = FrameReader::new(&bytes);
  let header = reader.read_field_header().unwrap().unwrap();
  assert_eq!(
    read_scalar(&mut reader, ScalarKind::String, header),
    Err(Error::InvalidUtf8)
  );
}
