use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use kube::api::{
    DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::ObjectMeta;
use kube::discovery::{self, Scope};
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

use super::{Cluster, ResourceKind, FIELD_MANAGER};
use crate::deployer::Error;

/// `Cluster` backed by a live API server.
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub async fn try_default() -> Result<KubeCluster, Error> {
        let client = Client::try_default().await?;
        Ok(KubeCluster { client })
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn is_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == code)
}

fn not_found(kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Error {
    match namespace {
        Some(ns) => Error::ObjectNotFound(format!("{} {}/{}", kind, ns, name)),
        None => Error::ObjectNotFound(format!("{} {}", kind, name)),
    }
}

fn group_version_kind(object: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = object.types.as_ref().ok_or_else(|| {
        Error::InvalidManifest(format!(
            "object {} has no apiVersion/kind",
            object.metadata.name.clone().unwrap_or_default()
        ))
    })?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let result = self.api(kind, namespace).get_opt(name).await?;
        Ok(result)
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut lp = ListParams::default();
        if let Some(selector) = selector {
            lp = lp.labels(selector);
        }
        let result = self.api(kind, namespace).list(&lp).await?;
        Ok(result.items)
    }

    async fn apply(&self, object: &DynamicObject) -> Result<(), Error> {
        let gvk = group_version_kind(object)?;
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidManifest(format!("{} without metadata.name", gvk.kind)))?;

        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        let api: Api<DynamicObject> = match caps.scope {
            Scope::Namespaced => {
                let namespace = object.metadata.namespace.as_deref().unwrap_or("default");
                Api::namespaced_with(self.client.clone(), namespace, &ar)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &ar),
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(object)).await?;
        debug!("Applied {} {}", gvk.kind, name);
        Ok(())
    }

    async fn patch_json(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error> {
        let operations: json_patch::Patch =
            serde_json::from_value(patch).map_err(|e| Error::InvalidPatch(e.to_string()))?;
        match self
            .api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(operations))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(not_found(kind, namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error> {
        match self
            .api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(not_found(kind, namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 409) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mint_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            ..Default::default()
        };
        let data: Vec<u8> = serde_json::to_vec(&request)?;
        let response: TokenRequest = api
            .create_subresource("token", service_account, &PostParams::default(), data)
            .await?;
        response.status.map(|s| s.token).ok_or_else(|| {
            Error::TokenUnavailable(format!(
                "token request for {}/{} returned no status",
                namespace, service_account
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::TypeMeta;

    #[test]
    fn splits_grouped_and_core_api_versions() {
        let mut object = DynamicObject {
            types: Some(TypeMeta {
                api_version: "kuadrant.io/v1beta1".into(),
                kind: "Kuadrant".into(),
            }),
            metadata: ObjectMeta::default(),
            data: Value::Null,
        };
        let gvk = group_version_kind(&object).unwrap();
        assert_eq!((gvk.group.as_str(), gvk.version.as_str()), ("kuadrant.io", "v1beta1"));

        object.types = Some(TypeMeta {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
        });
        let gvk = group_version_kind(&object).unwrap();
        assert_eq!((gvk.group.as_str(), gvk.version.as_str()), ("", "v1"));
    }

    #[test]
    fn rejects_objects_without_type_meta() {
        let object = DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: Value::Null,
        };
        assert!(matches!(
            group_version_kind(&object),
            Err(Error::InvalidManifest(_))
        ));
    }
}
