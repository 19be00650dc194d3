//! Turns manifest bundles on disk into objects ready for server-side apply.
//!
//! A bundle is a directory below the manifests root. Directories with a
//! `kustomization.yaml` are rendered by `kubectl kustomize`; anything else is read
//! as plain YAML files in name order. `${VAR}` and `$VAR` references are then
//! replaced with values from the run context.

use kube::api::DynamicObject;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deployer::Error;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("variable pattern is valid")
    })
}

/// Replaces known variables; unknown references are left as written.
pub fn substitute(template: &str, variables: &BTreeMap<String, String>) -> String {
    variable_pattern()
        .replace_all(template, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    debug!("Leaving unknown variable {} unsubstituted", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Splits a multi-document YAML stream into objects, skipping empty documents.
pub fn parse_documents(text: &str) -> Result<Vec<DynamicObject>, Error> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value)?;
        if object.types.is_none() {
            return Err(Error::InvalidManifest(
                "document without apiVersion/kind".into(),
            ));
        }
        if object.metadata.name.is_none() {
            return Err(Error::InvalidManifest(format!(
                "{} without metadata.name",
                object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
            )));
        }
        objects.push(object);
    }
    Ok(objects)
}

async fn kustomize(dir: &Path) -> Result<String, Error> {
    let output = Command::new("kubectl")
        .arg("kustomize")
        .arg(dir)
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::RendererFailed(format!(
            "kubectl kustomize {}: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn read_yaml_files(dir: &Path) -> Result<String, Error> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == "yaml" || e == "yml");
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        documents.push(tokio::fs::read_to_string(path).await?);
    }
    if documents.is_empty() {
        warn!("Bundle {} contains no YAML files", dir.display());
    }
    Ok(documents.join("\n---\n"))
}

/// Renders the bundle `root/bundle` with `variables` substituted.
pub async fn render_bundle(
    root: &Path,
    bundle: &str,
    variables: &BTreeMap<String, String>,
) -> Result<Vec<DynamicObject>, Error> {
    let dir = root.join(bundle);
    if !dir.is_dir() {
        return Err(Error::InvalidManifest(format!(
            "bundle {} not found at {}",
            bundle,
            dir.display()
        )));
    }

    let raw = if dir.join("kustomization.yaml").is_file() {
        kustomize(&dir).await?
    } else {
        read_yaml_files(&dir).await?
    };
    parse_documents(&substitute(&raw, variables))
}
