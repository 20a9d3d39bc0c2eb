// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Slice-backed wire reader with sub-item framing.
//!
//! The reader walks a byte slice with a cursor and a stack of open regions.
//! `read_field_header` returns `None` exactly at a region boundary: either
//! the declared length of a length-prefixed region is exhausted, or the
//! matching EndGroup tag is next. `end_frame` then verifies and consumes
//! the boundary, so a stream that closes a group early or carries garbage
//! past a declared length fails instead of desynchronizing.

#[cfg(test)]
#[path = "./reader_test.rs"]
mod reader_test;

use crate::tag::{FieldHeader, WireType};
use crate::{Error, MAX_FRAME_DEPTH, Result, varint};

#[derive(Debug)]
enum Region {
  // End offset of a length-prefixed region.
  Length { end: usize },
  // Open group; `end` is inherited from the enclosing region.
  Group { field_number: u32, end: usize },
}

impl Region {
  const fn end(&self) -> usize {
    match self {
      Self::Length { end } | Self::Group { end, .. } => *end,
    }
  }
}

/// Marker for one open read region, consumed by `end_frame`.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct FrameMark {
  depth: usize,
}

//
// FrameReader
//

#[derive(Debug)]
pub struct FrameReader<'a> {
  data: &'a [u8],
  pos: usize,
  regions: Vec<Region>,
}

impl<'a> FrameReader<'a> {
  #[must_use]
  pub fn new(data: &'a [u8]) -> Self {
    Self {
      data,
      pos: 0,
      regions: Vec::new(),
    }
  }

  /// Current byte offset, for error context and raw-byte capture.
  #[must_use]
  pub const fn position(&self) -> usize {
    self.pos
  }

  /// Raw bytes from `start` to the current position.
  #[must_use]
  pub fn bytes_since(&self, start: usize) -> &'a [u8] {
    &self.data[start .. self.pos]
  }

  /// True once the cursor sits at the end of the whole input with no open
  /// regions.
  #[must_use]
  pub fn at_end(&self) -> bool {
    self.regions.is_empty() && self.pos == self.data.len()
  }

  /// True when the cursor sits exactly at the end of the innermost open
  /// region (payload-only regions such as packed blobs have no headers to
  /// signal their end).
  #[must_use]
  pub fn region_exhausted(&self) -> bool {
    self.pos == self.current_end()
  }

  /// Bytes left in the whole input.
  #[must_use]
  pub const fn remaining(&self) -> usize {
    self.data.len() - self.pos
  }

  fn current_end(&self) -> usize {
    self.regions.last().map_or(self.data.len(), Region::end)
  }

  pub fn read_varint(&mut self) -> Result<u64> {
    let end = self.current_end();
    let slice = &self.data[self.pos .. end];
    match varint::decode(slice) {
      Some((value, len)) => {
        self.pos += len;
        Ok(value)
      },
      None if slice.len() < varint::MAX_SIZE => Err(Error::Truncated { offset: self.pos }),
      None => Err(Error::MalformedVarint { offset: self.pos }),
    }
  }

  pub fn read_zigzag32(&mut self) -> Result<i32> {
    #[allow(clippy::cast_possible_truncation)]
    let raw = self.read_varint()? as u32;
    Ok(varint::unzigzag32(raw))
  }

  pub fn read_zigzag64(&mut self) -> Result<i64> {
    Ok(varint::unzigzag64(self.read_varint()?))
  }

  pub fn read_fixed32(&mut self) -> Result<u32> {
    let bytes = self.take(4)?;
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(out))
  }

  pub fn read_fixed64(&mut self) -> Result<u64> {
    let bytes = self.take(8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(out))
  }

  pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
    let offset = self.pos;
    let len = self.read_varint()?;
    let end = self.current_end();
    if len > (end - self.pos) as u64 {
      return Err(Error::FrameOverrun { len, offset });
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = len as usize;
    self.take(len)
  }

  /// Read the next field header inside the current region. Returns `None`
  /// at the region boundary (declared length exhausted, matching EndGroup
  /// next, or end of input at top level). The boundary itself is consumed
  /// by `end_frame`, not here.
  pub fn read_field_header(&mut self) -> Result<Option<FieldHeader>> {
    let end = self.current_end();
    if self.pos == end {
      return Ok(None);
    }

    let offset = self.pos;
    let slice = &self.data[self.pos .. end];
    let Some((key, len)) = varint::decode(slice) else {
      return if slice.len() < varint::MAX_SIZE {
        Err(Error::Truncated { offset })
      } else {
        Err(Error::MalformedVarint { offset })
      };
    };
    let header = FieldHeader::from_key(key, offset)?;

    if header.wire_type == WireType::EndGroup {
      return match self.regions.last() {
        Some(Region::Group { field_number, .. }) if *field_number == header.field_number => {
          // Leave the tag for end_frame to consume.
          Ok(None)
        },
        Some(Region::Group { field_number, .. }) => Err(Error::GroupEndMismatch {
          expected: *field_number,
          found: header.field_number,
          offset,
        }),
        _ => Err(Error::UnexpectedEndGroup {
          field_number: header.field_number,
          offset,
        }),
      };
    }

    self.pos += len;
    Ok(Some(header))
  }

  /// Enter the sub-item region announced by `header`, which must be a
  /// `LengthDelimited` or `StartGroup` field.
  pub fn start_frame(&mut self, header: FieldHeader) -> Result<FrameMark> {
    if self.regions.len() >= MAX_FRAME_DEPTH {
      return Err(Error::DepthLimitExceeded {
        limit: MAX_FRAME_DEPTH,
      });
    }

    match header.wire_type {
      WireType::LengthDelimited => {
        let offset = self.pos;
        let len = self.read_varint()?;
        let outer_end = self.current_end();
        if len > (outer_end - self.pos) as u64 {
          return Err(Error::FrameOverrun { len, offset });
        }
        #[allow(clippy::cast_possible_truncation)]
        let end = self.pos + len as usize;
        self.regions.push(Region::Length { end });
      },
      WireType::StartGroup => {
        self.regions.push(Region::Group {
          field_number: header.field_number,
          end: self.current_end(),
        });
      },
      _ => {
        return Err(Error::UnbalancedFrame {
          context: "start_frame requires a length-delimited or group field",
        });
      },
    }
    Ok(FrameMark {
      depth: self.regions.len(),
    })
  }

  /// Leave the current region, verifying the boundary.
  pub fn end_frame(&mut self, mark: FrameMark) -> Result<()> {
    if mark.depth != self.regions.len() {
      return Err(Error::UnbalancedFrame {
        context: "regions must close in LIFO order",
      });
    }
    let Some(region) = self.regions.pop() else {
      return Err(Error::UnbalancedFrame {
        context: "no open region",
      });
    };

    match region {
      Region::Length { end } => {
        if self.pos != end {
          return Err(Error::TrailingFrameData {
            remaining: end - self.pos,
            offset: self.pos,
          });
        }
      },
      Region::Group { field_number, .. } => {
        let offset = self.pos;
        let key = self.read_varint()?;
        let header = FieldHeader::from_key(key, offset)?;
        if header.wire_type != WireType::EndGroup || header.field_number != field_number {
          return Err(Error::GroupEndMismatch {
            expected: field_number,
            found: header.field_number,
            offset,
          });
        }
      },
    }
    Ok(())
  }

  /// Skip one field's payload by wire type, recursing through nested
  /// groups. The header has already been consumed; use `position` before
  /// reading it and `bytes_since` afterwards to capture the raw field.
  pub fn skip_field(&mut self, header: FieldHeader) -> Result<()> {
    match header.wire_type {
      WireType::Varint => {
        self.read_varint()?;
      },
      WireType::Fixed64 => {
        self.read_fixed64()?;
      },
      WireType::Fixed32 => {
        self.read_fixed32()?;
      },
      WireType::LengthDelimited => {
        self.read_length_delimited()?;
      },
      WireType::StartGroup => {
        let mark = self.start_frame(header)?;
        while let Some(nested) = self.read_field_header()? {
          self.skip_field(nested)?;
        }
        self.end_frame(mark)?;
      },
      WireType::EndGroup => {
        return Err(Error::UnexpectedEndGroup {
          field_number: header.field_number,
          offset: self.pos,
        });
      },
    }
    Ok(())
  }

  fn take(&mut self, len: usize) -> Result<&'a [u8]> {
    let end = self.current_end();
    if len > end - self.pos {
      return Err(Error::Truncated { offset: self.pos });
    }
    let slice = &self.data[self.pos .. self.pos + len];
    self.pos += len;
    Ok(slice)
  }
}
