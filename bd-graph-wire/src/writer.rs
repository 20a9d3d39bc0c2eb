// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Buffer-owning wire writer with sub-item framing.
//!
//! Length-prefixed frames are back-patched: content is written first, then
//! the varint length is spliced in front of it when the frame closes. Group
//! frames bracket content with StartGroup/EndGroup tags instead, which is
//! what a caller wants when the region length cannot be known up front.

#[cfg(test)]
#[path = "./writer_test.rs"]
mod writer_test;

use crate::tag::{FieldHeader, WireType};
use crate::{Error, Result, varint};

/// How a sub-item delimits itself on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStyle {
  LengthPrefixed,
  Group,
}

/// Marker for one open frame. Must be closed in LIFO order by the writer
/// that produced it; scoped to a single write operation.
#[derive(Debug)]
#[must_use]
pub struct FrameToken {
  depth: usize,
}

#[derive(Debug)]
struct OpenFrame {
  style: FrameStyle,
  field_number: u32,
  // For length-prefixed frames, the buffer offset where the length varint
  // will be inserted. Unused for groups.
  content_start: usize,
}

//
// FrameWriter
//

#[derive(Debug, Default)]
pub struct FrameWriter {
  buf: Vec<u8>,
  open: Vec<OpenFrame>,
}

impl FrameWriter {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.buf.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  pub fn write_varint(&mut self, value: u64) {
    let mut scratch = [0u8; varint::MAX_SIZE];
    let len = varint::encode(value, &mut scratch);
    self.buf.extend_from_slice(&scratch[.. len]);
  }

  pub fn write_zigzag32(&mut self, value: i32) {
    self.write_varint(u64::from(varint::zigzag32(value)));
  }

  pub fn write_zigzag64(&mut self, value: i64) {
    self.write_varint(varint::zigzag64(value));
  }

  pub fn write_fixed32(&mut self, value: u32) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_fixed64(&mut self, value: u64) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_length_delimited(&mut self, bytes: &[u8]) {
    self.write_varint(bytes.len() as u64);
    self.buf.extend_from_slice(bytes);
  }

  /// Append pre-encoded wire data verbatim (retained unknown fields).
  pub fn write_raw(&mut self, bytes: &[u8]) {
    self.buf.extend_from_slice(bytes);
  }

  pub fn write_field_header(&mut self, field_number: u32, wire_type: WireType) {
    self.write_varint(FieldHeader::new(field_number, wire_type).key());
  }

  /// Open a sub-item region for `field_number`. The matching `end_frame`
  /// closes it with the strategy chosen here.
  pub fn start_frame(&mut self, field_number: u32, style: FrameStyle) -> FrameToken {
    match style {
      FrameStyle::LengthPrefixed => {
        self.write_field_header(field_number, WireType::LengthDelimited);
      },
      FrameStyle::Group => {
        self.write_field_header(field_number, WireType::StartGroup);
      },
    }
    self.open.push(OpenFrame {
      style,
      field_number,
      content_start: self.buf.len(),
    });
    FrameToken {
      depth: self.open.len(),
    }
  }

  pub fn end_frame(&mut self, token: FrameToken) -> Result<()> {
    if token.depth != self.open.len() {
      return Err(Error::UnbalancedFrame {
        context: "frames must close in LIFO order",
      });
    }
    let Some(frame) = self.open.pop() else {
      return Err(Error::UnbalancedFrame {
        context: "no open frame",
      });
    };

    match frame.style {
      FrameStyle::LengthPrefixed => {
        let content_len = self.buf.len() - frame.content_start;
        let mut scratch = [0u8; varint::MAX_SIZE];
        let len = varint::encode(content_len as u64, &mut scratch);
        // Move the content up and patch the varint length in front of it.
        let mut content = self.buf.split_off(frame.content_start);
        self.buf.extend_from_slice(&scratch[.. len]);
        self.buf.append(&mut content);
      },
      FrameStyle::Group => {
        self.write_field_header(frame.field_number, WireType::EndGroup);
      },
    }
    Ok(())
  }

  /// Consume the writer and return the encoded bytes. Fails if a frame was
  /// left open.
  pub fn into_bytes(self) -> Result<Vec<u8>> {
    if !self.open.is_empty() {
      return Err(Error::UnbalancedFrame {
        context: "frame left open at end of write",
      });
    }
    Ok(self.buf)
  }
}
