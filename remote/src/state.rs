//! The State Client (`spec.md` §4.2, "State Client (read path)"): builds a
//! [`CurrentState`] snapshot for one namespace by walking every kind's
//! adapter, depth-first from root kinds into their children.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use kongctl_model::Kind;
use tracing::instrument;

use crate::adapter::CurrentObject;
use crate::client::RemoteClient;
use crate::rest_adapter::RestAdapter;
use crate::Error;

/// A snapshot of remote state for one namespace, keyed by `(kind,
/// ref_key)` to mirror the Loader's `ResourceSet` index (`spec.md` §3).
#[derive(Debug, Default, Clone)]
pub struct CurrentState {
    objects: BTreeMap<(Kind, String), CurrentObject>,
}

impl CurrentState {
    /// Builds a snapshot directly from already-fetched objects. Used by
    /// the Planner's tests, which exercise the diff algorithm against
    /// hand-built fixtures rather than a live (or mocked) remote.
    pub fn from_objects(objects: impl IntoIterator<Item = CurrentObject>) -> Self {
        let mut state = Self::default();
        for object in objects {
            state.insert(object);
        }
        state
    }

    pub fn get(&self, kind: Kind, ref_key: &str) -> Option<&CurrentObject> {
        self.objects.get(&(kind, ref_key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurrentObject> {
        self.objects.values()
    }

    pub fn iter_kind(&self, kind: Kind) -> impl Iterator<Item = &CurrentObject> {
        self.objects.values().filter(move |o| o.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn insert(&mut self, object: CurrentObject) {
        self.objects.insert((object.kind, object.ref_key.clone()), object);
    }
}

pub struct StateClient {
    client: RemoteClient,
}

impl StateClient {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    /// Fetches every managed object for `namespace`, root kinds first and
    /// each kind's children fetched under their parent's `path`
    /// (`spec.md` §3, "child sub-snapshots where relevant").
    #[instrument(skip(self))]
    pub async fn fetch_current_state(&self, namespace: &str) -> Result<CurrentState, Error> {
        let mut state = CurrentState::default();
        for kind in Kind::ALL.iter().copied().filter(|k| k.parent_kind().is_none()) {
            self.fetch_kind(&mut state, kind, None, namespace).await?;
        }
        Ok(state)
    }

    async fn fetch_kind(
        &self,
        state: &mut CurrentState,
        kind: Kind,
        parent_path: Option<&str>,
        namespace: &str,
    ) -> Result<(), Error> {
        let adapter = RestAdapter::new(kind);
        let listed = adapter.list(&self.client, parent_path, namespace).await?;

        // Object fetches parallelize up to `object_fetch_concurrency`
        // (`spec.md` §5), refreshing each listed summary to its full
        // detail record.
        let concurrency = self.client.config().object_fetch_concurrency.max(1);
        let refreshed: Vec<Result<CurrentObject, Error>> = stream::iter(listed.into_iter())
            .map(|obj| {
                let client = &self.client;
                let adapter = RestAdapter::new(kind);
                async move {
                    let resp = client.get(&obj.path).await?;
                    let collection_path = obj.path.rsplit_once('/').map(|(prefix, _)| prefix).unwrap_or(&obj.path);
                    adapter.parse_object(&resp.body, collection_path)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut child_paths = Vec::new();
        for result in refreshed {
            let object = result?;
            child_paths.push(object.path.clone());
            state.insert(object);
        }

        for child_kind in Kind::ALL.iter().copied().filter(|k| k.parent_kind() == Some(kind)) {
            for path in &child_paths {
                Box::pin(self.fetch_kind(state, child_kind, Some(path), namespace)).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use kongctl_model::labels;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn labeled(namespace: &str) -> serde_json::Value {
        serde_json::json!({
            labels::MANAGED: "true",
            labels::NAMESPACE: namespace,
            labels::CONFIG_HASH: "abc123",
        })
    }

    #[tokio::test]
    async fn fetches_root_and_child_objects() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/portals"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "id": "portal-1", "name": "p1", "labels": labeled("default") }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portals/portal-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "portal-1", "name": "p1", "labels": labeled("default")
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portals/portal-1/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "id": "page-1", "slug": "home", "labels": labeled("default") }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portals/portal-1/pages/page-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "page-1", "slug": "home", "labels": labeled("default")
            })))
            .mount(&server)
            .await;
        for other_collection in [
            "application-auth-strategies",
            "control-planes",
            "apis",
            "portals/portal-1/snippets",
            "portals/portal-1/customization",
            "portals/portal-1/custom-domains",
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/{other_collection}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
                .mount(&server)
                .await;
        }

        let client = RemoteClient::new(ClientConfig {
            base_url: server.uri(),
            bearer_token: "t".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        let state_client = StateClient::new(client);
        let state = state_client.fetch_current_state("default").await.unwrap();

        assert_eq!(state.len(), 2);
        assert!(state.get(Kind::Portal, "p1").is_some());
        assert!(state.get(Kind::PortalPage, "home").is_some());
    }
}
