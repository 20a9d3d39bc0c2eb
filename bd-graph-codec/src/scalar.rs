// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Leaf value codec.
//!
//! Plain numerics map straight onto varint/zigzag/fixed wire encodings
//! with protobuf truncation semantics. Guid, decimal, date-time and
//! duration are composite leaves: small sub-messages with a fixed layout
//! that is an interop contract, verified by round-trip tests rather than
//! derived from anything.
//!
//! Composite layouts:
//! ```text
//! guid     { 1: fixed64 bytes[0..8] LE, 2: fixed64 bytes[8..16] LE }
//! decimal  { 1: fixed64 mantissa lo, 2: fixed64 mantissa hi,
//!            3: varint (scale << 1) | negative }
//! datetime { 1: zigzag value, 2: varint scale }   // from the Unix epoch
//! duration { 1: zigzag value, 2: varint scale }
//! ```
//! Time scales: 0 days, 1 hours, 2 minutes, 3 seconds, 4 milliseconds,
//! 5 ticks (100 ns). The writer picks the coarsest lossless scale;
//! sub-tick precision truncates.

#[cfg(test)]
#[path = "./scalar_test.rs"]
mod scalar_test;

use crate::schema::ScalarKind;
use crate::value::{Decimal, Value};
use crate::{Error, Result};
use bd_graph_wire::{FieldHeader, FrameReader, FrameStyle, FrameWriter, WireType};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const TICKS_PER_MILLISECOND: i64 = 10_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;
const TICKS_PER_HOUR: i64 = 60 * TICKS_PER_MINUTE;
const TICKS_PER_DAY: i64 = 24 * TICKS_PER_HOUR;

const SCALE_DAYS: u64 = 0;
const SCALE_HOURS: u64 = 1;
const SCALE_MINUTES: u64 = 2;
const SCALE_SECONDS: u64 = 3;
const SCALE_MILLISECONDS: u64 = 4;
const SCALE_TICKS: u64 = 5;

fn type_mismatch(kind: ScalarKind, value: &Value) -> Error {
  Error::TypeMismatch {
    expected: match kind {
      ScalarKind::Bool => "bool",
      ScalarKind::I32 | ScalarKind::SI32 | ScalarKind::SFixed32 => "i32",
      ScalarKind::U32 | ScalarKind::Fixed32 => "u32",
      ScalarKind::I64 | ScalarKind::SI64 | ScalarKind::SFixed64 => "i64",
      ScalarKind::U64 | ScalarKind::Fixed64 => "u64",
      ScalarKind::F32 => "f32",
      ScalarKind::F64 => "f64",
      ScalarKind::String => "string",
      ScalarKind::Bytes => "bytes",
      ScalarKind::Guid => "guid",
      ScalarKind::Decimal => "decimal",
      ScalarKind::DateTime => "datetime",
      ScalarKind::Duration => "duration",
    },
    found: value.shape().to_string(),
  }
}

/// Write one scalar field, header included.
pub(crate) fn write_scalar(
  writer: &mut FrameWriter,
  field_number: u32,
  kind: ScalarKind,
  value: &Value,
) -> Result<()> {
  match kind {
    ScalarKind::String => {
      let Value::String(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      writer.write_field_header(field_number, WireType::LengthDelimited);
      writer.write_length_delimited(v.as_bytes());
      Ok(())
    },
    ScalarKind::Bytes => {
      let Value::Bytes(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      writer.write_field_header(field_number, WireType::LengthDelimited);
      writer.write_length_delimited(v);
      Ok(())
    },
    ScalarKind::Guid => {
      let Value::Guid(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      write_guid(writer, field_number, *v)
    },
    ScalarKind::Decimal => {
      let Value::Decimal(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      write_decimal(writer, field_number, *v)
    },
    ScalarKind::DateTime => {
      let Value::DateTime(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      let ticks = datetime_ticks(*v)?;
      write_scaled_ticks(writer, field_number, ticks)
    },
    ScalarKind::Duration => {
      let Value::Duration(v) = value else {
        return Err(type_mismatch(kind, value));
      };
      let ticks = duration_ticks(*v)?;
      write_scaled_ticks(writer, field_number, ticks)
    },
    _ => {
      writer.write_field_header(field_number, kind.wire_type());
      write_scalar_payload(writer, kind, value)
    },
  }
}

/// Write a numeric scalar's payload without a header (packed encoding).
pub(crate) fn write_scalar_payload(
  writer: &mut FrameWriter,
  kind: ScalarKind,
  value: &Value,
) -> Result<()> {
  match (kind, value) {
    (ScalarKind::Bool, Value::Bool(v)) => writer.write_varint(u64::from(*v)),
    // int32 is sign-extended to 64 bits on the wire, per protobuf.
    #[allow(clippy::cast_sign_loss)]
    (ScalarKind::I32, Value::I32(v)) => writer.write_varint(i64::from(*v) as u64),
    (ScalarKind::SI32, Value::I32(v)) => writer.write_zigzag32(*v),
    (ScalarKind::U32, Value::U32(v)) => writer.write_varint(u64::from(*v)),
    #[allow(clippy::cast_sign_loss)]
    (ScalarKind::I64, Value::I64(v)) => writer.write_varint(*v as u64),
    (ScalarKind::SI64, Value::I64(v)) => writer.write_zigzag64(*v),
    (ScalarKind::U64, Value::U64(v)) => writer.write_varint(*v),
    (ScalarKind::F32, Value::F32(v)) => writer.write_fixed32(v.to_bits()),
    (ScalarKind::F64, Value::F64(v)) => writer.write_fixed64(v.to_bits()),
    (ScalarKind::Fixed32, Value::U32(v)) => writer.write_fixed32(*v),
    #[allow(clippy::cast_sign_loss)]
    (ScalarKind::SFixed32, Value::I32(v)) => writer.write_fixed32(*v as u32),
    (ScalarKind::Fixed64, Value::U64(v)) => writer.write_fixed64(*v),
    #[allow(clippy::cast_sign_loss)]
    (ScalarKind::SFixed64, Value::I64(v)) => writer.write_fixed64(*v as u64),
    _ => return Err(type_mismatch(kind, value)),
  }
  Ok(())
}

/// Read one scalar field. The header has been consumed and must carry the
/// kind's wire type.
pub(crate) fn read_scalar(
  reader: &mut FrameReader<'_>,
  kind: ScalarKind,
  header: FieldHeader,
) -> Result<Value> {
  if header.wire_type != kind.wire_type() {
    return Err(Error::WireTypeMismatch {
      field_number: header.field_number,
      expected: match kind.wire_type() {
        WireType::Varint => "varint",
        WireType::Fixed64 => "fixed64",
        WireType::Fixed32 => "fixed32",
        _ => "length-delimited",
      },
    });
  }

  match kind {
    ScalarKind::String => {
      let bytes = reader.read_length_delimited()?;
      let text = std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)?;
      Ok(Value::String(text.to_string()))
    },
    ScalarKind::Bytes => Ok(Value::Bytes(reader.read_length_delimited()?.to_vec())),
    ScalarKind::Guid => read_guid(reader, header),
    ScalarKind::Decimal => read_decimal(reader, header),
    ScalarKind::DateTime => {
      let ticks = read_scaled_ticks(reader, header)?;
      let nanos = i128::from(ticks) * 100;
      let value = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| Error::ValueOutOfRange { what: "datetime" })?;
      Ok(Value::DateTime(value))
    },
    ScalarKind::Duration => {
      let ticks = read_scaled_ticks(reader, header)?;
      let nanos = ticks
        .checked_mul(100)
        .ok_or(Error::ValueOutOfRange { what: "duration" })?;
      Ok(Value::Duration(Duration::nanoseconds(nanos)))
    },
    _ => read_scalar_payload(reader, kind),
  }
}

/// Read a numeric scalar's payload without a header (packed encoding).
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn read_scalar_payload(reader: &mut FrameReader<'_>, kind: ScalarKind) -> Result<Value> {
  Ok(match kind {
    ScalarKind::Bool => Value::Bool(reader.read_varint()? != 0),
    // Truncating casts below are protobuf int32/uint32 semantics.
    ScalarKind::I32 => Value::I32(reader.read_varint()? as i64 as i32),
    ScalarKind::SI32 => Value::I32(reader.read_zigzag32()?),
    ScalarKind::U32 => Value::U32(reader.read_varint()? as u32),
    ScalarKind::I64 => Value::I64(reader.read_varint()? as i64),
    ScalarKind::SI64 => Value::I64(reader.read_zigzag64()?),
    ScalarKind::U64 => Value::U64(reader.read_varint()?),
    ScalarKind::F32 => Value::F32(f32::from_bits(reader.read_fixed32()?)),
    ScalarKind::F64 => Value::F64(f64::from_bits(reader.read_fixed64()?)),
    ScalarKind::Fixed32 => Value::U32(reader.read_fixed32()?),
    ScalarKind::SFixed32 => Value::I32(reader.read_fixed32()? as i32),
    ScalarKind::Fixed64 => Value::U64(reader.read_fixed64()?),
    ScalarKind::SFixed64 => Value::I64(reader.read_fixed64()? as i64),
    _ => {
      return Err(Error::TypeMismatch {
        expected: "packable scalar",
        found: "length-delimited kind".to_string(),
      });
    },
  })
}

fn write_guid(writer: &mut FrameWriter, field_number: u32, value: Uuid) -> Result<()> {
  let bytes = value.as_bytes();
  let mut half = [0u8; 8];

  let frame = writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  half.copy_from_slice(&bytes[.. 8]);
  writer.write_field_header(1, WireType::Fixed64);
  writer.write_fixed64(u64::from_le_bytes(half));
  half.copy_from_slice(&bytes[8 ..]);
  writer.write_field_header(2, WireType::Fixed64);
  writer.write_fixed64(u64::from_le_bytes(half));
  writer.end_frame(frame)?;
  Ok(())
}

fn read_guid(reader: &mut FrameReader<'_>, header: FieldHeader) -> Result<Value> {
  let mark = reader.start_frame(header)?;
  let mut lo = 0u64;
  let mut hi = 0u64;
  while let Some(field) = reader.read_field_header()? {
    match (field.field_number, field.wire_type) {
      (1, WireType::Fixed64) => lo = reader.read_fixed64()?,
      (2, WireType::Fixed64) => hi = reader.read_fixed64()?,
      _ => reader.skip_field(field)?,
    }
  }
  reader.end_frame(mark)?;

  let mut bytes = [0u8; 16];
  bytes[.. 8].copy_from_slice(&lo.to_le_bytes());
  bytes[8 ..].copy_from_slice(&hi.to_le_bytes());
  Ok(Value::Guid(Uuid::from_bytes(bytes)))
}

fn write_decimal(writer: &mut FrameWriter, field_number: u32, value: Decimal) -> Result<()> {
  if value.scale > 28 {
    return Err(Error::ValueOutOfRange {
      what: "decimal scale",
    });
  }
  let sign_scale = (u64::from(value.scale) << 1) | u64::from(value.negative);

  let frame = writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  if value.lo != 0 {
    writer.write_field_header(1, WireType::Fixed64);
    writer.write_fixed64(value.lo);
  }
  if value.hi != 0 {
    writer.write_field_header(2, WireType::Fixed64);
    writer.write_fixed64(value.hi);
  }
  if sign_scale != 0 {
    writer.write_field_header(3, WireType::Varint);
    writer.write_varint(sign_scale);
  }
  writer.end_frame(frame)?;
  Ok(())
}

fn read_decimal(reader: &mut FrameReader<'_>, header: FieldHeader) -> Result<Value> {
  let mark = reader.start_frame(header)?;
  let mut value = Decimal::ZERO;
  while let Some(field) = reader.read_field_header()? {
    match (field.field_number, field.wire_type) {
      (1, WireType::Fixed64) => value.lo = reader.read_fixed64()?,
      (2, WireType::Fixed64) => value.hi = reader.read_fixed64()?,
      (3, WireType::Varint) => {
        let sign_scale = reader.read_varint()?;
        value.negative = sign_scale & 1 != 0;
        let scale = sign_scale >> 1;
        if scale > 28 {
          return Err(Error::ValueOutOfRange {
            what: "decimal scale",
          });
        }
        #[allow(clippy::cast_possible_truncation)]
        {
          value.scale = scale as u8;
        }
      },
      _ => reader.skip_field(field)?,
    }
  }
  reader.end_frame(mark)?;
  Ok(Value::Decimal(value))
}

fn datetime_ticks(value: OffsetDateTime) -> Result<i64> {
  // Sub-tick precision truncates; 100 ns ticks are the wire granularity.
  let ticks = value.unix_timestamp_nanos() / 100;
  i64::try_from(ticks).map_err(|_| Error::ValueOutOfRange { what: "datetime" })
}

fn duration_ticks(value: Duration) -> Result<i64> {
  let ticks = value.whole_nanoseconds() / 100;
  i64::try_from(ticks).map_err(|_| Error::ValueOutOfRange { what: "duration" })
}

/// Split ticks into the coarsest lossless (value, scale) pair.
const fn pick_scale(ticks: i64) -> (i64, u64) {
  if ticks == 0 {
    (0, SCALE_DAYS)
  } else if ticks % TICKS_PER_DAY == 0 {
    (ticks / TICKS_PER_DAY, SCALE_DAYS)
  } else if ticks % TICKS_PER_HOUR == 0 {
    (ticks / TICKS_PER_HOUR, SCALE_HOURS)
  } else if ticks % TICKS_PER_MINUTE == 0 {
    (ticks / TICKS_PER_MINUTE, SCALE_MINUTES)
  } else if ticks % TICKS_PER_SECOND == 0 {
    (ticks / TICKS_PER_SECOND, SCALE_SECONDS)
  } else if ticks % TICKS_PER_MILLISECOND == 0 {
    (ticks / TICKS_PER_MILLISECOND, SCALE_MILLISECONDS)
  } else {
    (ticks, SCALE_TICKS)
  }
}

fn write_scaled_ticks(writer: &mut FrameWriter, field_number: u32, ticks: i64) -> Result<()> {
  let (value, scale) = pick_scale(ticks);

  let frame = writer.start_frame(field_number, FrameStyle::LengthPrefixed);
  if value != 0 {
    writer.write_field_header(1, WireType::Varint);
    writer.write_zigzag64(value);
  }
  if scale != SCALE_DAYS {
    writer.write_field_header(2, WireType::Varint);
    writer.write_varint(scale);
  }
  writer.end_frame(frame)?;
  Ok(())
}

fn read_scaled_ticks(reader: &mut FrameReader<'_>, header: FieldHeader) -> Result<i64> {
  let mark = reader.start_frame(header)?;
  let mut value = 0i64;
  let mut scale = SCALE_DAYS;
  while let Some(field) = reader.read_field_header()? {
    match (field.field_number, field.wire_type) {
      (1, WireType::Varint) => value = reader.read_zigzag64()?,
      (2, WireType::Varint) => scale = reader.read_varint()?,
      _ => reader.skip_field(field)?,
    }
  }
  reader.end_frame(mark)?;

  let per_unit = match scale {
    SCALE_DAYS => TICKS_PER_DAY,
    SCALE_HOURS => TICKS_PER_HOUR,
    SCALE_MINUTES => TICKS_PER_MINUTE,
    SCALE_SECONDS => TICKS_PER_SECOND,
    SCALE_MILLISECONDS => TICKS_PER_MILLISECOND,
    SCALE_TICKS => 1,
    _ => {
      return Err(Error::ValueOutOfRange { what: "time scale" });
    },
  };
  value
    .checked_mul(per_unit)
    .ok_or(Error::ValueOutOfRange { what: "time value" })
}
