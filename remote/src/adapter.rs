//! The adapter capability set (`spec.md` §9, `SPEC_FULL.md` §9): the
//! single per-kind extension point the Planner and Executor call through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kongctl_model::Kind;
use serde_json::Value;

use crate::client::RemoteClient;
use crate::Error;

/// Which field on the remote object identifies it for ref-matching
/// (`spec.md` §4.2 step 2: "a ref-identifying field (name, slug, or a
/// dedicated `ref` label, kind-specific)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefField {
    Name,
    Slug,
    Label,
}

/// A fetched remote object, normalized for the Planner's diff step.
#[derive(Debug, Clone)]
pub struct CurrentObject {
    pub remote_id: String,
    pub kind: Kind,
    /// The value of the kind's ref-identifying field (name/slug/label).
    pub ref_key: String,
    pub labels: BTreeMap<String, String>,
    pub config_hash: Option<String>,
    pub parent_id: Option<String>,
    /// Full collection-relative path to this object, e.g.
    /// `portals/<id>`. Children compose their own path by appending
    /// their collection name to their parent's `path`.
    pub path: String,
    pub raw: Value,
}

/// Declarative per-kind adapter configuration. This table *is* the
/// per-kind extension point `spec.md` §9 calls for: to add a kind, add a
/// row here (and, if its remote shape is unusual, a bespoke [`Adapter`]
/// impl instead of [`RestAdapter`]).
#[derive(Debug, Clone, Copy)]
pub struct AdapterSpec {
    pub kind: Kind,
    /// Path segment of this kind's collection, relative to its parent's
    /// object path (or to the API root, for root kinds).
    pub collection: &'static str,
    pub ref_field: RefField,
    pub supports_update: bool,
    pub is_singleton: bool,
}

pub const ADAPTERS: &[AdapterSpec] = &[
    AdapterSpec {
        kind: Kind::ApplicationAuthStrategy,
        collection: "application-auth-strategies",
        ref_field: RefField::Name,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::ControlPlane,
        collection: "control-planes",
        ref_field: RefField::Name,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::Portal,
        collection: "portals",
        ref_field: RefField::Name,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::PortalPage,
        collection: "pages",
        ref_field: RefField::Slug,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::PortalSnippet,
        collection: "snippets",
        ref_field: RefField::Name,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::PortalCustomization,
        collection: "customization",
        ref_field: RefField::Label,
        supports_update: true,
        is_singleton: true,
    },
    AdapterSpec {
        kind: Kind::PortalCustomDomain,
        collection: "custom-domains",
        ref_field: RefField::Label,
        supports_update: false,
        is_singleton: true,
    },
    AdapterSpec {
        kind: Kind::Api,
        collection: "apis",
        ref_field: RefField::Name,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::ApiVersion,
        collection: "versions",
        ref_field: RefField::Label,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::ApiPublication,
        collection: "publications",
        ref_field: RefField::Label,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::ApiDocument,
        collection: "documents",
        ref_field: RefField::Slug,
        supports_update: true,
        is_singleton: false,
    },
    AdapterSpec {
        kind: Kind::ApiImplementation,
        collection: "implementations",
        ref_field: RefField::Label,
        supports_update: true,
        is_singleton: false,
    },
];

pub fn spec_for(kind: Kind) -> &'static AdapterSpec {
    ADAPTERS.iter().find(|a| a.kind == kind).expect("every Kind has an AdapterSpec row")
}

/// `{create, update, delete, get_by_name}` plus the static capability
/// fields the Planner consults (`supports_update`, ref-field strategy).
#[async_trait]
pub trait Adapter: Send + Sync {
    fn spec(&self) -> &'static AdapterSpec;

    async fn get_by_name(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CurrentObject>, Error>;

    /// Lists every object in this kind's collection under `parent_path`
    /// (or the API root, for root kinds), following pagination to
    /// exhaustion. Namespace filtering happens by inspecting each
    /// object's `KONGCTL-namespace` label, not server-side.
    async fn list(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        namespace: &str,
    ) -> Result<Vec<CurrentObject>, Error>;

    /// Lists every object in this kind's collection regardless of managed
    /// status, for `adopt` (`spec.md` §3, "Adoption") which must be able to
    /// find objects the engine does not yet manage.
    async fn list_unfiltered(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
    ) -> Result<Vec<CurrentObject>, Error>;

    async fn create(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        fields: &Value,
    ) -> Result<CurrentObject, Error>;

    /// `path` is the object's full path, as stored on [`CurrentObject::path`].
    async fn update(&self, client: &RemoteClient, path: &str, fields: &Value) -> Result<(), Error>;

    /// Returns `true` if the object was deleted, `false` if it was already
    /// gone (404 on delete is idempotent success, `spec.md` §4.3 step 4).
    async fn delete(&self, client: &RemoteClient, path: &str) -> Result<bool, Error>;

    /// Writes `KONGCTL-*` labels (and, for kinds with no natural unique
    /// field, `KONGCTL-ref`) onto the object at `path`.
    async fn write_labels(
        &self,
        client: &RemoteClient,
        path: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}
