//! The Remote crate: the REST transport, the per-kind Adapter table, and
//! the State Client that builds current-state snapshots for the Planner
//! (`spec.md` §4.2, §5, §6).

pub mod adapter;
pub mod client;
pub mod rest_adapter;
pub mod state;

pub use adapter::{spec_for, Adapter, AdapterSpec, CurrentObject, RefField, ADAPTERS};
pub use client::{ClientConfig, Disposition, RawResponse, RemoteClient};
pub use state::{CurrentState, StateClient};

/// Errors raised while talking to the remote API. These are always
/// candidates for the Executor's retry policy (`spec.md` §4.3 step 4);
/// this crate only classifies, it never retries on its own.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unexpected status {status} from {path}: {body}")]
    UnexpectedStatus { status: u16, path: String, body: serde_json::Value },

    #[error("{kind} object {remote_id:?} has no {field:?} field")]
    MissingRemoteField { kind: kongctl_model::Kind, remote_id: String, field: &'static str },
}
