//! Shared data model for the kongctl declarative configuration engine:
//! resource kinds, the [`ResourceSet`], the reference graph, the
//! managed-label protocol, and canonical hashing (`spec.md` §3).

pub mod hash;
pub mod kind;
pub mod labels;
pub mod namespace;
pub mod refs;
pub mod resource;

pub use kind::Kind;
pub use refs::{ExternalSpec, NodeId, ReferenceGraph, RefToken};
pub use resource::{ParentRef, Resource, ResourceBuilder, ResourceSet};

/// Errors raised while building or validating the data model.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("namespace {0:?} is not a valid namespace")]
    InvalidNamespace(String),

    #[error("duplicate ref: {kind} {resource_ref:?} already declared in namespace {namespace:?}")]
    DuplicateRef { kind: Kind, resource_ref: String, namespace: String },

    #[error("{kind} {resource_ref:?} references unknown parent {parent_kind} {parent_ref:?}")]
    UnresolvedParent {
        kind: Kind,
        resource_ref: String,
        parent_kind: Kind,
        parent_ref: String,
    },

    #[error("{kind} {resource_ref:?} has no parent, but {kind} requires one")]
    MissingParent { kind: Kind, resource_ref: String },

    #[error(
        "{kind} {resource_ref:?} is in namespace {namespace:?} but its parent is in namespace {parent_namespace:?}"
    )]
    NamespaceMismatch {
        kind: Kind,
        resource_ref: String,
        namespace: String,
        parent_namespace: String,
    },

    #[error("{kind} {resource_ref:?} is in namespace {namespace:?}, which is not the required namespace")]
    NamespaceGateViolation { kind: Kind, resource_ref: String, namespace: String },

    #[error("label {label:?} on {resource_ref:?} is reserved for engine use")]
    ReservedLabel { resource_ref: String, label: String },

    #[error("circular reference: {0}")]
    CycleDetected(String),

    #[error("value is not canonical (contains a non-integer float): {0}")]
    NonCanonicalNumber(String),

    #[error("{} validation errors", .0.len())]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Flattens nested [`Error::Aggregate`] values and returns every leaf
    /// error, preserving the "aggregate, fail before planning" policy
    /// (`spec.md` §7) even when errors are collected across components.
    pub fn into_leaves(self) -> Vec<Error> {
        match self {
            Error::Aggregate(errors) => errors.into_iter().flat_map(Error::into_leaves).collect(),
            other => vec![other],
        }
    }
}
