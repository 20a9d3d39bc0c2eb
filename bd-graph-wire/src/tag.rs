// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./tag_test.rs"]
mod tag_test;

use crate::{Error, Result};

// Protobuf caps field numbers at 2^29 - 1 so the tag key fits a u32.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

//
// WireType
//

/// The low-level encoding category of a field's payload. Values match the
/// protobuf wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
  Varint = 0,
  Fixed64 = 1,
  LengthDelimited = 2,
  StartGroup = 3,
  EndGroup = 4,
  Fixed32 = 5,
}

impl WireType {
  #[must_use]
  pub const fn from_raw(value: u8) -> Option<Self> {
    match value {
      0 => Some(Self::Varint),
      1 => Some(Self::Fixed64),
      2 => Some(Self::LengthDelimited),
      3 => Some(Self::StartGroup),
      4 => Some(Self::EndGroup),
      5 => Some(Self::Fixed32),
      _ => None,
    }
  }
}

//
// FieldHeader
//

/// A decoded field tag: the field number plus the wire type of the payload
/// that follows. Encodes as the varint `(field_number << 3) | wire_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
  pub field_number: u32,
  pub wire_type: WireType,
}

impl FieldHeader {
  #[must_use]
  pub const fn new(field_number: u32, wire_type: WireType) -> Self {
    Self {
      field_number,
      wire_type,
    }
  }

  /// The varint key this header encodes to.
  #[must_use]
  pub const fn key(self) -> u64 {
    ((self.field_number as u64) << 3) | self.wire_type as u64
  }

  /// Decode a header from its varint key. `offset` is only used for error
  /// context.
  pub fn from_key(key: u64, offset: usize) -> Result<Self> {
    #[allow(clippy::cast_possible_truncation)]
    let raw_wire_type = (key & 0x7) as u8;
    let wire_type = WireType::from_raw(raw_wire_type).ok_or(Error::InvalidWireType {
      value: raw_wire_type,
      offset,
    })?;

    let field_number = key >> 3;
    if field_number == 0 {
      return Err(Error::ZeroFieldNumber { offset });
    }
    let field_number =
      u32::try_from(field_number).map_err(|_| Error::FieldNumberOutOfRange { offset })?;
    if field_number > MAX_FIELD_NUMBER {
      return Err(Error::FieldNumberOutOfRange { offset });
    }

    Ok(Self {
      field_number,
      wire_type,
    })
  }
}
