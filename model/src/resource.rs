use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    hash::canonical_hash,
    labels,
    namespace::{self, DEFAULT_NAMESPACE},
    refs::{ExternalSpec, NodeId},
    Error, Kind,
};

/// A reference to a resource's parent, by kind and ref (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: Kind,
    pub r#ref: String,
}

impl ParentRef {
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.kind, self.r#ref.clone())
    }
}

/// A single user-declared entity: a portal, an API, an auth strategy, etc.
///
/// `fields` holds every authoring field the kind accepts *except* the
/// identity fields (`ref`, `name` is kept out separately for convenience,
/// `namespace`, `labels`, parent linkage, `_external`) — i.e. exactly the
/// fields the canonical hash is computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: Kind,
    pub r#ref: String,
    pub name: String,
    pub namespace: String,
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub external: Option<ExternalSpec>,
}

impl Resource {
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.kind, self.r#ref.clone())
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// Canonical hash over authoring fields (`name` included, since it is
    /// user-authored) plus user labels. System labels are never part of
    /// this input (`spec.md` §4.2 step 1).
    pub fn canonical_hash(&self) -> Result<String, Error> {
        let mut fields = self.fields.clone();
        fields.insert("name".to_string(), Value::String(self.name.clone()));
        canonical_hash(&fields, &self.labels)
    }

    /// Validates that no user label collides with a system label key
    /// (`spec.md` §3: system labels are "read/write by the engine, never
    /// authored by users").
    pub fn validate_labels(&self) -> Result<(), Error> {
        for key in self.labels.keys() {
            if labels::is_system_label(key) {
                return Err(Error::ReservedLabel {
                    resource_ref: self.r#ref.clone(),
                    label: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Builder used by loaders to construct a [`Resource`] while normalizing
/// the namespace and validating labels in one place.
pub struct ResourceBuilder {
    kind: Kind,
    r#ref: String,
    name: String,
    namespace: Option<String>,
    parent: Option<ParentRef>,
    labels: BTreeMap<String, String>,
    fields: Map<String, Value>,
    external: Option<ExternalSpec>,
}

impl ResourceBuilder {
    pub fn new(kind: Kind, r#ref: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            r#ref: r#ref.into(),
            name: name.into(),
            namespace: None,
            parent: None,
            labels: BTreeMap::new(),
            fields: Map::new(),
            external: None,
        }
    }

    pub fn namespace(mut self, ns: Option<String>) -> Self {
        self.namespace = ns;
        self
    }

    pub fn parent(mut self, parent: Option<ParentRef>) -> Self {
        self.parent = parent;
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    pub fn external(mut self, external: Option<ExternalSpec>) -> Self {
        self.external = external;
        self
    }

    pub fn build(self) -> Result<Resource, Error> {
        let namespace = namespace::normalize(self.namespace.as_deref())?;
        let resource = Resource {
            kind: self.kind,
            r#ref: self.r#ref,
            name: self.name,
            namespace,
            parent: self.parent,
            labels: self.labels,
            fields: self.fields,
            external: self.external,
        };
        resource.validate_labels()?;
        Ok(resource)
    }
}

/// The loaded, validated set of resources for one or more namespaces
/// (`spec.md` §3). Indexed by `(kind, ref)` within `(kind, namespace)`.
#[derive(Debug, Default, Clone)]
pub struct ResourceSet {
    resources: Vec<Resource>,
    index: BTreeMap<(Kind, String, String), usize>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource, enforcing ref uniqueness within `(kind,
    /// namespace)` (`spec.md` §3 invariant).
    pub fn insert(&mut self, resource: Resource) -> Result<(), Error> {
        let key = (resource.kind, resource.namespace.clone(), resource.r#ref.clone());
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateRef {
                kind: resource.kind,
                resource_ref: resource.r#ref,
                namespace: resource.namespace,
            });
        }
        let idx = self.resources.len();
        self.index.insert(key, idx);
        self.resources.push(resource);
        Ok(())
    }

    pub fn get(&self, kind: Kind, namespace: &str, r#ref: &str) -> Option<&Resource> {
        self.index
            .get(&(kind, namespace.to_string(), r#ref.to_string()))
            .map(|idx| &self.resources[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn iter_kind(&self, kind: Kind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn namespaces(&self) -> std::collections::BTreeSet<&str> {
        self.resources.iter().map(|r| r.namespace.as_str()).collect()
    }

    /// Validates cross-cutting invariants that require the whole set:
    /// resolvable parents, matching parent/child namespaces, and (unless
    /// marked `_external`) resolvable `!ref` targets embedded in fields.
    /// Circularity is checked separately via [`crate::refs::ReferenceGraph`].
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        for resource in &self.resources {
            if let Some(parent) = &resource.parent {
                match self.get(parent.kind, &resource.namespace, &parent.r#ref) {
                    None => errors.push(Error::UnresolvedParent {
                        kind: resource.kind,
                        resource_ref: resource.r#ref.clone(),
                        parent_kind: parent.kind,
                        parent_ref: parent.r#ref.clone(),
                    }),
                    Some(parent_resource) => {
                        if parent_resource.namespace != resource.namespace {
                            errors.push(Error::NamespaceMismatch {
                                kind: resource.kind,
                                resource_ref: resource.r#ref.clone(),
                                namespace: resource.namespace.clone(),
                                parent_namespace: parent_resource.namespace.clone(),
                            });
                        }
                    }
                }
            } else if resource.kind.parent_kind().is_some() {
                errors.push(Error::MissingParent {
                    kind: resource.kind,
                    resource_ref: resource.r#ref.clone(),
                });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(errors))
        }
    }

    /// Requires every resource to live in `namespace` (`--require-namespace`
    /// gate, `spec.md` §4.1).
    pub fn require_namespace(&self, namespace: &str) -> Result<(), Error> {
        let offenders: Vec<_> = self
            .resources
            .iter()
            .filter(|r| r.namespace != namespace)
            .map(|r| (r.kind, r.r#ref.clone(), r.namespace.clone()))
            .collect();
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(
                offenders
                    .into_iter()
                    .map(|(kind, resource_ref, namespace)| Error::NamespaceGateViolation {
                        kind,
                        resource_ref,
                        namespace,
                    })
                    .collect(),
            ))
        }
    }
}

pub fn default_namespace() -> &'static str {
    DEFAULT_NAMESPACE
}
