// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! The type model: schema registry plus the lazy, validated, cached
//! serializer trees.
//!
//! A model is built once from schemas and is immutable and lock-free in
//! use. Each type's descriptor and node tree is assembled at most once,
//! even under concurrent first use: the cache map hands out one
//! `OnceLock` per type, so threads racing on the same type block on a
//! single build while unrelated types proceed. Build failures are cached
//! permanently and reported identically on every later resolve.

#[cfg(test)]
#[path = "./model_test.rs"]
mod model_test;

use crate::node::Node;
use crate::schema::{
  AbsentPolicy, Callbacks, EnumSchema, FieldType, InstantiationStrategy, MemberSchema,
  MessageSchema, Repeated, SurrogateSchema, TypeId, TypeKind, TypeSchema,
};
use crate::{Error, ModelBuildError, Result};
use bd_graph_wire::MAX_FIELD_NUMBER;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

//
// MemberDescriptor
//

/// One built member: the field binding around its node tree.
#[derive(Debug)]
pub struct MemberDescriptor {
  pub field_number: u32,
  pub node: Node,
  pub absent: AbsentPolicy,
}

impl MemberDescriptor {
  /// True when the member's value is a collection, through any reference
  /// wrapping.
  pub(crate) fn is_collection(&self) -> bool {
    fn peel(node: &Node) -> bool {
      match node {
        Node::Collection(_) => true,
        Node::Reference(inner) => peel(inner),
        _ => false,
      }
    }
    peel(&self.node)
  }
}

//
// TypeDescriptor
//

/// One built message type: validated members sorted by field number, the
/// sub-type dispatch table and the instantiation/callback hooks.
pub struct TypeDescriptor {
  pub type_id: TypeId,
  pub name: String,
  pub members: Vec<MemberDescriptor>,
  pub sub_types: Vec<(u32, TypeId)>,
  pub strategy: InstantiationStrategy,
  pub callbacks: Callbacks,
  pub extension_data: bool,
  pub as_reference_default: bool,
}

impl std::fmt::Debug for TypeDescriptor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TypeDescriptor")
      .field("type_id", &self.type_id)
      .field("name", &self.name)
      .field("members", &self.members)
      .field("sub_types", &self.sub_types)
      .field("extension_data", &self.extension_data)
      .field("as_reference_default", &self.as_reference_default)
      .finish_non_exhaustive()
  }
}

impl TypeDescriptor {
  pub(crate) fn member_index(&self, field_number: u32) -> Option<usize> {
    self
      .members
      .binary_search_by_key(&field_number, |member| member.field_number)
      .ok()
  }

  pub(crate) fn sub_type(&self, field_number: u32) -> Option<TypeId> {
    self
      .sub_types
      .iter()
      .find(|(number, _)| *number == field_number)
      .map(|(_, id)| *id)
  }
}

type BuildOutcome = std::result::Result<Arc<TypeDescriptor>, ModelBuildError>;

//
// TypeModelBuilder
//

/// Registers type schemas and produces an immutable `TypeModel`. Reserving
/// first and defining later is what lets mutually-recursive types refer to
/// each other.
#[derive(Default)]
pub struct TypeModelBuilder {
  types: Vec<(String, Option<TypeKind>)>,
}

impl TypeModelBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Reserve an identity for a type whose definition comes later.
  pub fn reserve(&mut self, name: &str) -> TypeId {
    #[allow(clippy::cast_possible_truncation)]
    let id = TypeId(self.types.len() as u32);
    self.types.push((name.to_string(), None));
    id
  }

  pub fn define_message(&mut self, id: TypeId, schema: MessageSchema) {
    self.types[id.index()].1 = Some(TypeKind::Message(schema));
  }

  pub fn define_enum(&mut self, id: TypeId, schema: EnumSchema) {
    self.types[id.index()].1 = Some(TypeKind::Enum(schema));
  }

  /// Reserve and define in one step.
  pub fn message(&mut self, name: &str, schema: MessageSchema) -> TypeId {
    let id = self.reserve(name);
    self.define_message(id, schema);
    id
  }

  pub fn enumeration(&mut self, name: &str, schema: EnumSchema) -> TypeId {
    let id = self.reserve(name);
    self.define_enum(id, schema);
    id
  }

  pub fn build(self) -> std::result::Result<TypeModel, ModelBuildError> {
    let mut types = Vec::with_capacity(self.types.len());
    for (name, kind) in self.types {
      let Some(kind) = kind else {
        return Err(ModelBuildError::UndefinedType { name });
      };
      types.push(TypeSchema { name, kind });
    }
    Ok(TypeModel {
      types,
      cache: RwLock::new(HashMap::new()),
      builds: AtomicU64::new(0),
    })
  }
}

//
// TypeModel
//

pub struct TypeModel {
  types: Vec<TypeSchema>,
  cache: RwLock<HashMap<TypeId, Arc<OnceLock<BuildOutcome>>>>,
  builds: AtomicU64,
}

impl std::fmt::Debug for TypeModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TypeModel")
      .field("types", &self.types.iter().map(|t| &t.name).collect::<Vec<_>>())
      .field("builds", &self.builds)
      .finish_non_exhaustive()
  }
}

impl TypeModel {
  /// Resolve a type to its built descriptor, building it on first use.
  pub fn resolve(&self, id: TypeId) -> Result<Arc<TypeDescriptor>> {
    let entry = self.cache_entry(id);
    let outcome = entry.get_or_init(|| {
      self.builds.fetch_add(1, Ordering::Relaxed);
      log::debug!("building serializer tree for {}", self.type_name(id));
      self.build_descriptor(id)
    });
    outcome.clone().map_err(Error::Model)
  }

  /// How many descriptor builds have run; each type builds at most once.
  #[must_use]
  pub fn build_count(&self) -> u64 {
    self.builds.load(Ordering::Relaxed)
  }

  fn cache_entry(&self, id: TypeId) -> Arc<OnceLock<BuildOutcome>> {
    if let Some(entry) = self.cache.read().get(&id) {
      return entry.clone();
    }
    self.cache.write().entry(id).or_default().clone()
  }

  #[must_use]
  pub fn type_name(&self, id: TypeId) -> &str {
    &self.types[id.index()].name
  }

  fn kind(&self, id: TypeId) -> &TypeKind {
    &self.types[id.index()].kind
  }

  pub(crate) fn message_schema(
    &self,
    id: TypeId,
  ) -> std::result::Result<&MessageSchema, ModelBuildError> {
    match self.kind(id) {
      TypeKind::Message(schema) => Ok(schema),
      TypeKind::Enum(_) => Err(ModelBuildError::NotAMessage {
        type_name: self.type_name(id).to_string(),
      }),
    }
  }

  pub(crate) fn enum_schema(&self, id: TypeId) -> Result<&EnumSchema> {
    match self.kind(id) {
      TypeKind::Enum(schema) => Ok(schema),
      TypeKind::Message(_) => Err(Error::Model(ModelBuildError::NotAnEnum {
        type_name: self.type_name(id).to_string(),
      })),
    }
  }

  /// The surrogate declared on a message type, if any.
  pub(crate) fn maybe_surrogate(&self, id: TypeId) -> Option<&SurrogateSchema> {
    match self.kind(id) {
      TypeKind::Message(schema) => schema.surrogate.as_ref(),
      TypeKind::Enum(_) => None,
    }
  }

  pub(crate) fn surrogate_for(&self, id: TypeId) -> Result<&SurrogateSchema> {
    self
      .maybe_surrogate(id)
      .ok_or_else(|| {
        Error::Model(ModelBuildError::InvalidSurrogate {
          type_name: self.type_name(id).to_string(),
          reason: "no surrogate declared",
        })
      })
  }

  /// Find the immediate declared sub-type of `from` whose subtree contains
  /// `target`.
  pub(crate) fn dispatch_sub_type(
    &self,
    from: TypeId,
    target: TypeId,
  ) -> Result<Option<(u32, TypeId)>> {
    let schema = self.message_schema(from).map_err(Error::Model)?;
    for sub in &schema.sub_types {
      if sub.type_id == target || self.sub_type_contains(sub.type_id, target)? {
        return Ok(Some((sub.field_number, sub.type_id)));
      }
    }
    Ok(None)
  }

  fn sub_type_contains(&self, root: TypeId, target: TypeId) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
      if !visited.insert(id) {
        continue;
      }
      if id == target {
        return Ok(true);
      }
      let schema = self.message_schema(id).map_err(Error::Model)?;
      stack.extend(schema.sub_types.iter().map(|sub| sub.type_id));
    }
    Ok(false)
  }

  /// Synthesize the member descriptor used for a root value (the envelope
  /// payload field).
  pub(crate) fn root_member(
    &self,
    declared: TypeId,
    field_number: u32,
  ) -> Result<MemberDescriptor> {
    self.message_schema(declared).map_err(Error::Model)?;
    let mut member = MemberSchema::message(field_number, declared);
    member.absent = AbsentPolicy::Null;
    let node = self
      .build_member_node(self.type_name(declared), &member)
      .map_err(Error::Model)?;
    Ok(MemberDescriptor {
      field_number,
      node,
      absent: AbsentPolicy::Null,
    })
  }

  fn build_descriptor(&self, id: TypeId) -> BuildOutcome {
    let type_name = self.type_name(id).to_string();
    let schema = self.message_schema(id)?;

    if let Some(surrogate) = &schema.surrogate {
      self.validate_surrogate(&type_name, surrogate)?;
    }

    // Members sorted and unique by field number.
    let mut ordered: Vec<&MemberSchema> = schema.members.iter().collect();
    ordered.sort_by_key(|member| member.field_number);
    for pair in ordered.windows(2) {
      if pair[0].field_number == pair[1].field_number {
        return Err(ModelBuildError::DuplicateFieldNumber {
          type_name,
          field_number: pair[0].field_number,
        });
      }
    }

    let mut members = Vec::with_capacity(ordered.len());
    for member in ordered {
      let node = self.build_member_node(&type_name, member)?;
      members.push(MemberDescriptor {
        field_number: member.field_number,
        node,
        absent: member.absent,
      });
    }

    let sub_types = self.validate_sub_types(id, &type_name, schema)?;

    if matches!(schema.strategy, InstantiationStrategy::Unconstructible)
      && sub_types.is_empty()
      && schema.surrogate.is_none()
    {
      return Err(ModelBuildError::Unconstructible { type_name });
    }

    Ok(Arc::new(TypeDescriptor {
      type_id: id,
      name: type_name,
      members,
      sub_types,
      strategy: schema.strategy.clone(),
      callbacks: schema.callbacks.clone(),
      extension_data: schema.extension_data,
      as_reference_default: schema.as_reference_default,
    }))
  }

  /// Validate one member and assemble its node tree, leaves first.
  pub(crate) fn build_member_node(
    &self,
    type_name: &str,
    member: &MemberSchema,
  ) -> std::result::Result<Node, ModelBuildError> {
    if member.field_number == 0 {
      return Err(ModelBuildError::FieldNumberZero {
        type_name: type_name.to_string(),
      });
    }
    if member.field_number > MAX_FIELD_NUMBER {
      return Err(ModelBuildError::FieldNumberOutOfRange {
        type_name: type_name.to_string(),
        field_number: member.field_number,
      });
    }

    if member.late_reference {
      let FieldType::Message(target) = member.ty else {
        return Err(ModelBuildError::LateReferenceNotMessage {
          type_name: type_name.to_string(),
          field_number: member.field_number,
        });
      };
      if !matches!(member.repeated, Repeated::Single) {
        return Err(ModelBuildError::LateReferenceNotMessage {
          type_name: type_name.to_string(),
          field_number: member.field_number,
        });
      }
      self.message_schema(target)?;
      if self.maybe_surrogate(target).is_some() {
        return Err(ModelBuildError::InvalidMember {
          type_name: type_name.to_string(),
          field_number: member.field_number,
          reason: "late references cannot target surrogate-converted types",
        });
      }
      return Ok(Node::LateReference { declared: target });
    }

    // Leaf node, with element-level reference wrapping when the target
    // type defaults to identity tracking.
    let mut leaf = match member.ty {
      FieldType::Scalar(kind) => Node::Scalar(kind),
      FieldType::Enum(target) => {
        let schema = match self.kind(target) {
          TypeKind::Enum(schema) => schema,
          TypeKind::Message(_) => {
            return Err(ModelBuildError::NotAnEnum {
              type_name: self.type_name(target).to_string(),
            });
          },
        };
        let mut values = HashSet::new();
        for (_, value) in &schema.members {
          if !values.insert(*value) {
            return Err(ModelBuildError::DuplicateEnumValue {
              type_name: self.type_name(target).to_string(),
              value: *value,
            });
          }
        }
        Node::Enum(target)
      },
      FieldType::Message(target) => {
        let target_schema = self.message_schema(target)?;
        let message = Node::Message {
          type_id: target,
          group_framed: member.group_framed,
        };
        if let Some(surrogate) = &target_schema.surrogate {
          self.validate_surrogate(self.type_name(target), surrogate)?;
          Node::Surrogate {
            declared: target,
            inner: Box::new(Node::Message {
              type_id: surrogate.surrogate,
              group_framed: member.group_framed,
            }),
          }
        } else {
          message
        }
      },
    };

    let packable = match &leaf {
      Node::Scalar(kind) => kind.packable(),
      Node::Enum(_) => true,
      _ => false,
    };
    if member.packed && (matches!(member.repeated, Repeated::Single) || !packable) {
      return Err(ModelBuildError::PackedNotScalar {
        type_name: type_name.to_string(),
        field_number: member.field_number,
      });
    }

    let type_default_ref = matches!(
      member.ty,
      FieldType::Message(target)
        if self.message_schema(target).is_ok_and(|schema| schema.as_reference_default)
    );
    if type_default_ref {
      leaf = Node::Reference(Box::new(leaf));
    }

    match member.repeated {
      Repeated::Single => {
        if member.as_reference && !type_default_ref {
          if !matches!(member.ty, FieldType::Message(_)) {
            return Err(ModelBuildError::ReferenceNotSupported {
              type_name: type_name.to_string(),
              field_number: member.field_number,
            });
          }
          leaf = Node::Reference(Box::new(leaf));
        }
        Ok(leaf)
      },
      Repeated::List | Repeated::Array => {
        // A reference-tracked collection is always framed: its definition
        // must occupy one region even when it is empty, and the length
        // pre-announcement registers the instance before its elements.
        let mut node = Node::Collection(Box::new(crate::node::CollectionNode {
          item: leaf,
          array: matches!(member.repeated, Repeated::Array) || member.as_reference,
          packed: member.packed,
          append: !member.overwrite_collection,
        }));
        if member.as_reference {
          node = Node::Reference(Box::new(node));
        }
        Ok(node)
      },
    }
  }

  fn validate_surrogate(
    &self,
    type_name: &str,
    surrogate: &SurrogateSchema,
  ) -> std::result::Result<(), ModelBuildError> {
    let target = surrogate.surrogate;
    let Ok(schema) = self.message_schema(target) else {
      return Err(ModelBuildError::InvalidSurrogate {
        type_name: type_name.to_string(),
        reason: "surrogate target is not a message type",
      });
    };
    if schema.surrogate.is_some() {
      return Err(ModelBuildError::InvalidSurrogate {
        type_name: type_name.to_string(),
        reason: "surrogate target itself declares a surrogate",
      });
    }
    Ok(())
  }

  /// Validate the sub-type table and the field-number space across the
  /// whole ancestor/descendant chain.
  fn validate_sub_types(
    &self,
    id: TypeId,
    type_name: &str,
    schema: &MessageSchema,
  ) -> std::result::Result<Vec<(u32, TypeId)>, ModelBuildError> {
    let mut numbers = HashSet::new();
    for sub in &schema.sub_types {
      if sub.field_number == 0 {
        return Err(ModelBuildError::FieldNumberZero {
          type_name: type_name.to_string(),
        });
      }
      if !numbers.insert(sub.field_number) {
        return Err(ModelBuildError::DuplicateSubType {
          type_name: type_name.to_string(),
          field_number: sub.field_number,
        });
      }
      self.message_schema(sub.type_id)?;
    }

    // Every member field number anywhere in the chain is off limits for
    // dispatch.
    let chain = self.inheritance_chain(id, type_name)?;
    let mut member_numbers = HashSet::new();
    for chain_id in &chain {
      let chain_schema = self.message_schema(*chain_id)?;
      member_numbers.extend(chain_schema.members.iter().map(|member| member.field_number));
    }
    for sub in &schema.sub_types {
      if member_numbers.contains(&sub.field_number) {
        return Err(ModelBuildError::SubTypeFieldClash {
          type_name: type_name.to_string(),
          field_number: sub.field_number,
        });
      }
    }

    Ok(
      schema
        .sub_types
        .iter()
        .map(|sub| (sub.field_number, sub.type_id))
        .collect(),
    )
  }

  /// Ancestors (via base links), self, and the transitive sub-type
  /// closure. A revisit on either walk means the declared hierarchy loops.
  fn inheritance_chain(
    &self,
    id: TypeId,
    type_name: &str,
  ) -> std::result::Result<Vec<TypeId>, ModelBuildError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();

    let mut current = Some(id);
    while let Some(ancestor) = current {
      if !visited.insert(ancestor) {
        return Err(ModelBuildError::SubTypeCycle {
          type_name: type_name.to_string(),
        });
      }
      chain.push(ancestor);
      current = self.message_schema(ancestor)?.base;
    }

    let mut stack = vec![id];
    while let Some(descendant) = stack.pop() {
      for sub in &self.message_schema(descendant)?.sub_types {
        if !visited.insert(sub.type_id) {
          return Err(ModelBuildError::SubTypeCycle {
            type_name: type_name.to_string(),
          });
        }
        chain.push(sub.type_id);
        stack.push(sub.type_id);
      }
    }

    Ok(chain)
  }
}
