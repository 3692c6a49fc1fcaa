//! A single generic [`Adapter`] implementation driven by an
//! [`AdapterSpec`] row, instead of one hand-written file per kind
//! (`spec.md` §9: "the adapter table is the single per-kind extension
//! point"). Kinds whose remote shape genuinely diverges from this plain
//! CRUD-plus-pagination contract get a bespoke `Adapter` impl instead;
//! none currently do.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kongctl_model::labels;
use serde_json::Value;

use crate::adapter::{spec_for, Adapter, AdapterSpec, CurrentObject, RefField};
use crate::client::RemoteClient;
use crate::Error;

pub struct RestAdapter {
    spec: &'static AdapterSpec,
}

impl RestAdapter {
    pub fn new(kind: kongctl_model::Kind) -> Self {
        Self { spec: spec_for(kind) }
    }

    fn collection_path(&self, parent_path: Option<&str>) -> String {
        match parent_path {
            Some(parent) => format!("{}/{}", parent.trim_end_matches('/'), self.spec.collection),
            None => self.spec.collection.to_string(),
        }
    }

    fn ref_key_of(&self, raw: &Value) -> Option<String> {
        match self.spec.ref_field {
            RefField::Name => raw.get("name").and_then(Value::as_str).map(str::to_string),
            RefField::Slug => raw.get("slug").and_then(Value::as_str).map(str::to_string),
            RefField::Label => raw
                .get("labels")
                .and_then(|l| l.get(labels::REF))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Builds a [`CurrentObject`] from a raw JSON representation fetched
    /// from `collection_path`. Public so [`crate::state::StateClient`] can
    /// reuse it when refreshing a listed object's full detail.
    pub fn parse_object(&self, raw: &Value, collection_path: &str) -> Result<CurrentObject, Error> {
        let remote_id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingRemoteField {
                kind: self.spec.kind,
                remote_id: String::new(),
                field: "id",
            })?
            .to_string();
        let ref_key = self.ref_key_of(raw).unwrap_or_default();
        let label_map: BTreeMap<String, String> = raw
            .get("labels")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let config_hash = label_map.get(labels::CONFIG_HASH).cloned();
        let parent_id = raw.get("parent_id").and_then(Value::as_str).map(str::to_string);
        Ok(CurrentObject {
            path: format!("{collection_path}/{remote_id}"),
            remote_id,
            kind: self.spec.kind,
            ref_key,
            labels: label_map,
            config_hash,
            parent_id,
            raw: raw.clone(),
        })
    }

    async fn list_page_by_page(
        &self,
        client: &RemoteClient,
        collection_path: &str,
    ) -> Result<Vec<Value>, Error> {
        // List-page fetches run at concurrency 1 to preserve cursor
        // semantics (`spec.md` §5): one page in flight at a time.
        let mut items = Vec::new();
        let mut path = collection_path.to_string();
        loop {
            let resp = client.get(&path).await?;
            let page = resp.body;
            let data = page.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
            items.extend(data);
            match page.get("next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => path = next.to_string(),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl Adapter for RestAdapter {
    fn spec(&self) -> &'static AdapterSpec {
        self.spec
    }

    async fn list(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        namespace: &str,
    ) -> Result<Vec<CurrentObject>, Error> {
        let objects = self.list_unfiltered(client, parent_path).await?;
        Ok(objects.into_iter().filter(|obj| labels::is_managed(&obj.labels, namespace)).collect())
    }

    async fn list_unfiltered(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
    ) -> Result<Vec<CurrentObject>, Error> {
        let collection_path = self.collection_path(parent_path);
        let raws = self.list_page_by_page(client, &collection_path).await?;
        raws.iter().map(|raw| self.parse_object(raw, &collection_path)).collect()
    }

    async fn get_by_name(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CurrentObject>, Error> {
        let objects = self.list(client, parent_path, namespace).await?;
        Ok(objects.into_iter().find(|o| o.ref_key == name))
    }

    async fn create(
        &self,
        client: &RemoteClient,
        parent_path: Option<&str>,
        fields: &Value,
    ) -> Result<CurrentObject, Error> {
        let collection_path = self.collection_path(parent_path);
        let resp = client.post(&collection_path, fields).await?;
        if resp.status < 200 || resp.status >= 300 {
            return Err(Error::UnexpectedStatus { status: resp.status, path: collection_path, body: resp.body });
        }
        self.parse_object(&resp.body, &collection_path)
    }

    async fn update(&self, client: &RemoteClient, path: &str, fields: &Value) -> Result<(), Error> {
        let resp = client.patch(path, fields).await?;
        if resp.status < 200 || resp.status >= 300 {
            return Err(Error::UnexpectedStatus { status: resp.status, path: path.to_string(), body: resp.body });
        }
        Ok(())
    }

    async fn delete(&self, client: &RemoteClient, path: &str) -> Result<bool, Error> {
        let resp = client.delete(path).await?;
        match crate::client::classify(resp.status) {
            crate::client::Disposition::Success => Ok(true),
            crate::client::Disposition::NotFound => Ok(false),
            _ => Err(Error::UnexpectedStatus { status: resp.status, path: path.to_string(), body: resp.body }),
        }
    }

    async fn write_labels(
        &self,
        client: &RemoteClient,
        path: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let body = serde_json::json!({ "labels": labels });
        self.update(client, path, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kongctl_model::Kind;

    #[test]
    fn collection_path_nests_under_parent() {
        let adapter = RestAdapter::new(Kind::ApiVersion);
        assert_eq!(adapter.collection_path(Some("apis/abc")), "apis/abc/versions");
        assert_eq!(RestAdapter::new(Kind::Portal).collection_path(None), "portals");
    }

    #[test]
    fn ref_key_reads_label_for_label_backed_kinds() {
        let adapter = RestAdapter::new(Kind::ApiVersion);
        let raw = serde_json::json!({ "id": "x", "labels": { labels::REF: "v1" } });
        assert_eq!(adapter.ref_key_of(&raw), Some("v1".to_string()));
    }
}
