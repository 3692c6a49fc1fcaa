//! The Loader: multi-source ingestion, `!file`/`!ref` tag resolution, and
//! namespace validation of desired state (`spec.md` §4.1).

pub mod build;
pub mod merge;
pub mod source;
pub mod tags;

use kongctl_model::{Kind, ResourceSet};

pub use source::Source;

/// Loads a full [`ResourceSet`] from the given CLI-style inputs: `-f`
/// paths (files, directories when `recursive`, or `-` for stdin) plus an
/// optional `--require-namespace` gate.
pub fn load(paths: &[String], recursive: bool, require_namespace: Option<&str>) -> Result<ResourceSet, Error> {
    let sources = source::collect_sources(paths, recursive)?;
    let merged = merge::read_and_merge(&sources)?;
    let set = build::build_resource_set(merged)?;
    if let Some(namespace) = require_namespace {
        set.require_namespace(namespace).map_err(Error::Model)?;
    }
    Ok(set)
}

/// Errors raised while loading desired state. Parse/IO/validation errors
/// are aggregated and reported together before planning ever starts
/// (`spec.md` §7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("path not found: {}", .0.display())]
    PathNotFound(std::path::PathBuf),

    #[error("{} is a directory; pass -R to recurse into it", .0.display())]
    DirectoryRequiresRecursive(std::path::PathBuf),

    #[error("error walking {}: {1}", .0.display())]
    Walk(std::path::PathBuf, String),

    #[error("error reading {}: {1}", .0.display())]
    Read(std::path::PathBuf, std::io::Error),

    #[error("error reading file referenced by !file: {}: {1}", .0.display())]
    FileTag(std::path::PathBuf, std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown yaml tag: {0}")]
    UnknownTag(String),

    #[error("unknown kind in !ref: {0}")]
    UnknownRefKind(String),

    #[error("unknown resource kind: {0:?}")]
    UnknownKind(String),

    #[error("{kind} entry is missing required field {field:?}")]
    MissingField { kind: Kind, field: String },

    #[error("{kind} entry is missing required parent field {field:?}")]
    MissingParentField { kind: Kind, field: String },

    #[error("{kind} entry has unknown field {field:?}")]
    UnknownField { kind: Kind, field: String },

    #[error("{kind} {resource_ref:?} declares `_external` alongside writable field(s): {fields}")]
    ExternalWithWritableFields { kind: Kind, resource_ref: String, fields: String },

    #[error(transparent)]
    Model(#[from] kongctl_model::Error),

    #[error("{} errors while loading", .0.len())]
    Aggregate(Vec<Error>),
}
