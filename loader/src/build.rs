//! Turns merged raw JSON documents into a validated
//! [`kongctl_model::ResourceSet`] (`spec.md` §4.1).

use std::collections::BTreeMap;

use kongctl_model::{ExternalSpec, Kind, ParentRef, Resource, ResourceBuilder, ResourceSet};
use serde_json::{Map, Value};

use crate::{merge::Merged, Error};

const RESERVED_KEYS: &[&str] = &["ref", "name", "namespace", "labels", "_external"];

pub fn build_resource_set(merged: Merged) -> Result<ResourceSet, Error> {
    let mut set = ResourceSet::new();
    let mut errors = Vec::new();

    for kind in Kind::ALL.iter().copied().filter(|k| k.parent_kind().is_none()) {
        let Some(entries) = merged.get(&kind) else { continue };
        for entry in entries {
            if let Err(e) = extract_one(entry, kind, None, &mut set) {
                errors.push(e);
            }
        }
    }

    // Child kinds declared at the top level (flat form) require an
    // explicit parent reference field named after the parent kind's
    // singular doc key (e.g. `portal: !ref p1` on a flat `api_documents`
    // entry). Nested declarations are handled inside `extract_one` while
    // walking each parent's own entry.
    for kind in Kind::ALL.iter().copied().filter(|k| k.parent_kind().is_some()) {
        let Some(entries) = merged.get(&kind) else { continue };
        for entry in entries {
            let parent_kind = kind.parent_kind().unwrap();
            let parent = match entry.get(parent_field_name(parent_kind)).and_then(RefToken::from_field) {
                Some(r#ref) => ParentRef { kind: parent_kind, r#ref },
                None => {
                    errors.push(Error::MissingParentField {
                        kind,
                        field: parent_field_name(parent_kind).to_string(),
                    });
                    continue;
                }
            };
            if let Err(e) = extract_one(entry, kind, Some(parent), &mut set) {
                errors.push(e);
            }
        }
    }

    if !errors.is_empty() {
        return Err(Error::Aggregate(errors));
    }

    set.validate().map_err(Error::Model)?;
    Ok(set)
}

fn parent_field_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Portal => "portal",
        Kind::Api => "api",
        other => other.doc_key(),
    }
}

/// Thin wrapper so we can pull a bare ref string out of a `!ref`-tagged
/// field without pulling in the full [`kongctl_model::RefToken`] API at
/// every call site.
struct RefToken;
impl RefToken {
    fn from_field(value: &Value) -> Option<String> {
        kongctl_model::RefToken::from_json(value).map(|t| t.r#ref)
    }
}

fn extract_one(
    entry: &Value,
    kind: Kind,
    parent: Option<ParentRef>,
    set: &mut ResourceSet,
) -> Result<(), Error> {
    let Value::Object(obj) = entry else {
        return Err(Error::Parse(format!("{kind} entries must be mappings")));
    };

    let r#ref = obj
        .get("ref")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField { kind, field: "ref".into() })?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField { kind, field: "name".into() })?;
    let namespace = obj.get("namespace").and_then(Value::as_str).map(str::to_string);
    let labels = obj
        .get("labels")
        .map(|v| serde_json::from_value::<BTreeMap<String, String>>(v.clone()))
        .transpose()
        .map_err(|e| Error::Parse(format!("invalid labels on {kind} {ref:?}: {e}", r#ref = r#ref)))?
        .unwrap_or_default();
    let external = obj
        .get("_external")
        .map(parse_external)
        .transpose()?;

    if external.is_some() {
        let writable: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|k| !RESERVED_KEYS.contains(k) && !is_child_key(kind, k))
            .collect();
        if !writable.is_empty() {
            return Err(Error::ExternalWithWritableFields {
                kind,
                resource_ref: r#ref,
                fields: writable.join(", "),
            });
        }
    }

    let mut fields = Map::new();
    for (key, value) in obj {
        if RESERVED_KEYS.contains(&key.as_str()) || is_child_key(kind, key) {
            continue;
        }
        if !known_fields(kind).contains(&key.as_str()) {
            return Err(Error::UnknownField { kind, field: key.clone() });
        }
        fields.insert(key.clone(), value.clone());
    }

    let resource: Resource = ResourceBuilder::new(kind, r#ref.clone(), name)
        .namespace(namespace)
        .parent(parent)
        .labels(labels)
        .fields(fields)
        .external(external)
        .build()
        .map_err(Error::Model)?;

    let resource_namespace = resource.namespace.clone();
    set.insert(resource).map_err(Error::Model)?;

    // Walk nested children: arrays for plural child kinds, a single object
    // for singleton children (`spec.md` §6: "portal → ... customization,
    // custom_domain").
    for child_kind in Kind::ALL.iter().copied().filter(|k| k.parent_kind() == Some(kind)) {
        let Some(value) = obj.get(child_kind.doc_key()) else { continue };
        let parent_ref = ParentRef { kind, r#ref: r#ref.clone() };
        if child_kind.is_singleton_child() {
            if value.is_null() {
                continue;
            }
            let mut child = value.clone();
            if let Value::Object(child_obj) = &mut child {
                child_obj
                    .entry("ref".to_string())
                    .or_insert_with(|| Value::String(format!("{r#ref}::{}", child_kind.doc_key())));
                child_obj
                    .entry("name".to_string())
                    .or_insert_with(|| Value::String(child_kind.doc_key().to_string()));
                child_obj
                    .entry("namespace".to_string())
                    .or_insert_with(|| Value::String(resource_namespace.clone()));
            }
            extract_one(&child, child_kind, Some(parent_ref), set)?;
        } else {
            let Value::Array(items) = value else {
                return Err(Error::Parse(format!("{} must be a list", child_kind.doc_key())));
            };
            for item in items {
                let mut child = item.clone();
                if let Value::Object(child_obj) = &mut child {
                    child_obj
                        .entry("namespace".to_string())
                        .or_insert_with(|| Value::String(resource_namespace.clone()));
                }
                extract_one(&child, child_kind, Some(parent_ref.clone()), set)?;
            }
        }
    }

    Ok(())
}

/// The writable, kind-specific field names strict mode accepts on top of
/// `RESERVED_KEYS` and nested child-kind keys (`spec.md` §4.1, §6). Modeled
/// on Kong's own Dev Portal / API Platform resource shapes, the same
/// product surface `kongctl_remote::adapter::ADAPTERS` names its REST
/// collections against.
fn known_fields(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::ApplicationAuthStrategy => &["display_name", "strategy_type", "configs"],
        Kind::ControlPlane => &["description", "cluster_type", "auth_type", "proxy_urls"],
        Kind::Portal => &[
            "description",
            "display_name",
            "authentication_enabled",
            "rbac_enabled",
            "auto_approve_applications",
            "auto_approve_developers",
            "default_api_visibility",
            "default_page_visibility",
        ],
        Kind::PortalPage => &["title", "content", "visibility", "status", "slug", "description"],
        Kind::PortalSnippet => &["title", "content", "visibility", "status"],
        Kind::PortalCustomization => &["css", "js", "theme", "menu"],
        Kind::PortalCustomDomain => &["hostname", "enabled", "ssl"],
        Kind::Api => &["description", "version", "deprecated"],
        Kind::ApiVersion => &["spec", "deprecated"],
        Kind::ApiPublication => &["portal", "visibility", "auto_approve_registrations"],
        Kind::ApiDocument => &["title", "content", "slug", "status"],
        Kind::ApiImplementation => &["service", "protocol", "control_plane"],
    }
}

fn is_child_key(kind: Kind, key: &str) -> bool {
    Kind::ALL
        .iter()
        .any(|k| k.parent_kind() == Some(kind) && k.doc_key() == key)
}

fn parse_external(value: &Value) -> Result<ExternalSpec, Error> {
    let Value::Object(obj) = value else {
        return Err(Error::Parse("_external must be a mapping".into()));
    };
    if let Some(id) = obj.get("id").and_then(Value::as_str) {
        return Ok(ExternalSpec::Id(id.to_string()));
    }
    if let Some(selector) = obj.get("selector") {
        return Ok(ExternalSpec::Selector(selector.clone()));
    }
    Err(Error::Parse("_external requires `id` or `selector`".into()))
}
