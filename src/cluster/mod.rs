use async_trait::async_trait;
use chrono::offset::Utc;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

use crate::deployer::Error;

mod client;
#[cfg(test)]
pub mod fake;
pub mod kinds;

pub use client::KubeCluster;
pub use kinds::ResourceKind;

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "maas-deployer";

/// Every cluster interaction the deployer needs.
///
/// Nothing behind this trait caches: each call reflects the API server at the
/// time it is made, so pollers can rely on fresh state on every attempt.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Fetches a single object, `None` when it does not exist.
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Lists objects of a kind, optionally restricted to a namespace and a label selector.
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Server-side applies an object, forcing field ownership.
    async fn apply(&self, object: &DynamicObject) -> Result<(), Error>;

    /// Applies an RFC 6902 patch given as a JSON array of operations.
    async fn patch_json(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error>;

    /// Applies an RFC 7386 merge patch.
    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error>;

    /// Deletes an object. Returns false when it was already gone.
    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error>;

    /// Creates a namespace. Returns false when it already existed.
    async fn create_namespace(&self, name: &str) -> Result<bool, Error>;

    /// Requests a short-lived token for a service account.
    async fn mint_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String, Error>;
}

pub fn convert<T: DeserializeOwned>(object: &DynamicObject) -> Result<T, Error> {
    let value = serde_json::to_value(object)?;
    Ok(serde_json::from_value(value)?)
}

pub async fn get_typed<T: DeserializeOwned>(
    cluster: &dyn Cluster,
    kind: &ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<T>, Error> {
    match cluster.get(kind, namespace, name).await? {
        Some(object) => Ok(Some(convert(&object)?)),
        None => Ok(None),
    }
}

pub async fn list_typed<T: DeserializeOwned>(
    cluster: &dyn Cluster,
    kind: &ResourceKind,
    namespace: Option<&str>,
    selector: Option<&str>,
) -> Result<Vec<T>, Error> {
    let objects = cluster.list(kind, namespace, selector).await?;
    objects.iter().map(convert).collect()
}

/// Returns the `status` of the condition with the given type, if the object reports it.
pub fn condition_status(object: &DynamicObject, condition: &str) -> Option<String> {
    object
        .data
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition))
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Same mechanism as `kubectl rollout restart`: bump a pod template annotation.
pub async fn rollout_restart(cluster: &dyn Cluster, namespace: &str, name: &str) -> Result<(), Error> {
    let restart: Value = json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        "kubectl.kubernetes.io/restartedAt": Utc::now().to_rfc3339()
                    }
                }
            }
        }
    });
    cluster
        .patch_merge(&kinds::DEPLOYMENT, Some(namespace), name, restart)
        .await?;
    info!("Restarted deployment {}/{}", namespace, name);
    Ok(())
}
