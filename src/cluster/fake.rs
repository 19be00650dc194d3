//! In-memory `Cluster` for tests.
//!
//! Objects are kept on a timeline measured from the moment the fake was created,
//! so a test running under a paused tokio clock can script "this CRD appears after
//! 40 seconds" and have pollers observe exactly that.

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{kinds, Cluster, ResourceKind};
use crate::deployer::Error;

type Key = (String, String, String);

pub struct FakeCluster {
    epoch: Instant,
    objects: Mutex<BTreeMap<Key, Vec<(Duration, Option<DynamicObject>)>>>,
    applied: Mutex<Vec<String>>,
    patches: Mutex<Vec<(String, Value)>>,
    deleted: Mutex<Vec<String>>,
    token: Mutex<Option<String>>,
    failing_lists: Mutex<Vec<(String, String)>>,
}

fn key_of(kind: &str, namespace: Option<&str>, name: &str) -> Key {
    (
        kind.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn object_key(object: &DynamicObject) -> Key {
    let kind = object
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    key_of(
        &kind,
        object.metadata.namespace.as_deref(),
        object.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn scoped<'a>(kind: &ResourceKind, namespace: Option<&'a str>) -> Option<&'a str> {
    if kind.namespaced {
        namespace
    } else {
        None
    }
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster {
            epoch: Instant::now(),
            objects: Mutex::new(BTreeMap::new()),
            applied: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            token: Mutex::new(None),
            failing_lists: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, object: DynamicObject) {
        self.insert_at(Duration::ZERO, object);
    }

    /// Makes `object` the visible state once `after` has elapsed.
    pub fn insert_at(&self, after: Duration, object: DynamicObject) {
        self.record(object_key(&object), after, Some(object));
    }

    pub fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn patches(&self) -> Vec<(String, Value)> {
        self.patches.lock().unwrap().clone()
    }

    /// Makes every later `list` of `kind` in `namespace` fail.
    pub fn fail_list(&self, kind: &ResourceKind, namespace: &str) {
        self.failing_lists
            .lock()
            .unwrap()
            .push((kind.kind.to_string(), namespace.to_string()));
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn record(&self, key: Key, after: Duration, object: Option<DynamicObject>) {
        let mut objects = self.objects.lock().unwrap();
        let timeline = objects.entry(key).or_default();
        timeline.push((after, object));
        timeline.sort_by_key(|(at, _)| *at);
    }

    fn current(&self, key: &Key) -> Option<DynamicObject> {
        let now = self.epoch.elapsed();
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)?
            .iter()
            .filter(|(at, _)| *at <= now)
            .last()
            .and_then(|(_, object)| object.clone())
    }

    fn update(&self, key: Key, update: impl FnOnce(&mut Value) -> Result<(), Error>) -> Result<(), Error> {
        let object = self
            .current(&key)
            .ok_or_else(|| Error::ObjectNotFound(format!("{}/{}/{}", key.0, key.1, key.2)))?;
        let mut value = serde_json::to_value(&object)?;
        update(&mut value)?;
        let updated: DynamicObject = serde_json::from_value(value)?;
        let now = self.epoch.elapsed();
        self.record(key, now, Some(updated));
        Ok(())
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.current(&key_of(kind.kind, scoped(kind, namespace), name)))
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let namespace = scoped(kind, namespace);
        let failing = self
            .failing_lists
            .lock()
            .unwrap()
            .iter()
            .any(|(k, ns)| k == kind.kind && Some(ns.as_str()) == namespace);
        if failing {
            return Err(Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".into(),
                message: format!("{} is forbidden in {}", kind.kind, namespace.unwrap_or_default()),
                reason: "Forbidden".into(),
                code: 403,
            })));
        }
        let keys: Vec<Key> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, ns, _)| k == kind.kind && namespace.map_or(true, |n| n == ns))
            .cloned()
            .collect();
        Ok(keys
            .iter()
            .filter_map(|key| self.current(key))
            .filter(|o| selector.map_or(true, |s| matches_selector(o, s)))
            .collect())
    }

    async fn apply(&self, object: &DynamicObject) -> Result<(), Error> {
        let key = object_key(object);
        self.applied
            .lock()
            .unwrap()
            .push(format!("{}/{}", key.0, key.2));
        let now = self.epoch.elapsed();
        self.record(key, now, Some(object.clone()));
        Ok(())
    }

    async fn patch_json(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error> {
        let key = key_of(kind.kind, scoped(kind, namespace), name);
        let operations: json_patch::Patch = serde_json::from_value(patch.clone())?;
        self.update(key, |value| {
            json_patch::patch(value, &operations).map_err(|e| Error::InvalidPatch(e.to_string()))
        })?;
        self.patches
            .lock()
            .unwrap()
            .push((format!("{}/{}", kind.kind, name), patch));
        Ok(())
    }

    async fn patch_merge(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
    ) -> Result<(), Error> {
        let key = key_of(kind.kind, scoped(kind, namespace), name);
        self.update(key, |value| {
            json_patch::merge(value, &patch);
            Ok(())
        })?;
        self.patches
            .lock()
            .unwrap()
            .push((format!("{}/{}", kind.kind, name), patch));
        Ok(())
    }

    async fn delete(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error> {
        let key = key_of(kind.kind, scoped(kind, namespace), name);
        if self.current(&key).is_none() {
            return Ok(false);
        }
        self.deleted
            .lock()
            .unwrap()
            .push(format!("{}/{}", kind.kind, name));
        let now = self.epoch.elapsed();
        self.record(key, now, None);
        Ok(true)
    }

    async fn create_namespace(&self, name: &str) -> Result<bool, Error> {
        if self.get(&kinds::NAMESPACE, None, name).await?.is_some() {
            return Ok(false);
        }
        self.insert_at(self.epoch.elapsed(), namespace(name));
        Ok(true)
    }

    async fn mint_token(
        &self,
        namespace: &str,
        service_account: &str,
        _expiration_seconds: i64,
    ) -> Result<String, Error> {
        self.token.lock().unwrap().clone().ok_or_else(|| {
            Error::TokenUnavailable(format!("no token for {}/{}", namespace, service_account))
        })
    }
}

pub fn object(value: Value) -> DynamicObject {
    serde_json::from_value(value).expect("valid test object")
}

pub fn namespace(name: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    }))
}

pub fn crd(name: &str, established: bool) -> DynamicObject {
    let (plural, group) = name.split_once('.').unwrap_or((name, "example.com"));
    object(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": name },
        "spec": {
            "group": group,
            "names": { "kind": "Thing", "plural": plural },
            "scope": "Namespaced",
            "versions": [{ "name": "v1", "served": true, "storage": true }]
        },
        "status": {
            "acceptedNames": { "kind": "Thing", "plural": plural },
            "storedVersions": ["v1"],
            "conditions": [{
                "type": "Established",
                "status": if established { "True" } else { "False" }
            }]
        }
    }))
}

pub fn csv(namespace: &str, name: &str, phase: &str, message: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "operators.coreos.com/v1alpha1",
        "kind": "ClusterServiceVersion",
        "metadata": { "name": name, "namespace": namespace },
        "status": { "phase": phase, "message": message }
    }))
}

pub fn pod(namespace: &str, name: &str, phase: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace },
        "status": { "phase": phase }
    }))
}

pub fn crashing_pod(namespace: &str, name: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace },
        "status": {
            "phase": "Running",
            "containerStatuses": [{
                "name": "main",
                "image": "registry.example.com/main:1",
                "imageID": "",
                "ready": false,
                "restartCount": 4,
                "state": { "waiting": { "reason": "CrashLoopBackOff" } }
            }]
        }
    }))
}

pub fn deployment(namespace: &str, name: &str, replicas: i32, ready: i32) -> DynamicObject {
    object(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": namespace, "generation": 2 },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": name, "image": "registry.example.com/app:1" }] }
            }
        },
        "status": {
            "observedGeneration": 2,
            "replicas": replicas,
            "updatedReplicas": ready,
            "readyReplicas": ready,
            "availableReplicas": ready
        }
    }))
}

pub fn endpoints(namespace: &str, name: &str, addresses: &[&str]) -> DynamicObject {
    let subsets = if addresses.is_empty() {
        json!([])
    } else {
        let addresses: Vec<Value> = addresses.iter().map(|ip| json!({ "ip": ip })).collect();
        json!([{ "addresses": addresses }])
    };
    object(json!({
        "apiVersion": "v1",
        "kind": "Endpoints",
        "metadata": { "name": name, "namespace": namespace },
        "subsets": subsets
    }))
}

pub fn validating_webhook(name: &str, services: &[(&str, &str)]) -> DynamicObject {
    let webhooks: Vec<Value> = services
        .iter()
        .enumerate()
        .map(|(i, (namespace, service))| {
            json!({
                "name": format!("hook-{}.example.com", i),
                "admissionReviewVersions": ["v1"],
                "sideEffects": "None",
                "clientConfig": { "service": { "namespace": namespace, "name": service } }
            })
        })
        .collect();
    object(json!({
        "apiVersion": "admissionregistration.k8s.io/v1",
        "kind": "ValidatingWebhookConfiguration",
        "metadata": { "name": name },
        "webhooks": webhooks
    }))
}

pub fn gateway(namespace: &str, name: &str, programmed: Option<&str>) -> DynamicObject {
    let conditions = match programmed {
        Some(status) => json!([{ "type": "Programmed", "status": status }]),
        None => json!([]),
    };
    object(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": { "name": name, "namespace": namespace },
        "status": { "conditions": conditions }
    }))
}

pub fn cluster_version(version: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "config.openshift.io/v1",
        "kind": "ClusterVersion",
        "metadata": { "name": "version" },
        "status": { "desired": { "version": version } }
    }))
}

pub fn ingress_config(domain: &str) -> DynamicObject {
    object(json!({
        "apiVersion": "config.openshift.io/v1",
        "kind": "Ingress",
        "metadata": { "name": "cluster" },
        "spec": { "domain": domain }
    }))
}

pub fn policy(kind: &ResourceKind, namespace: &str, name: &str, spec: Value, conditions: Value) -> DynamicObject {
    object(json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind,
        "metadata": { "name": name, "namespace": namespace },
        "spec": spec,
        "status": { "conditions": conditions }
    }))
}
