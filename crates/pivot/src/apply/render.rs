//! Rendering of a component directory into a flat list of resources.
//!
//! Covers what the bootstrap itself writes into `kustomization.yaml`:
//! `namespace` and `resources` (files or nested component directories).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::kinds;
use crate::error::{Error, Result};
use crate::store::{Kustomization, KUSTOMIZATION_FILE};

/// Kinds applied before everything else, in this order.
const ORDER_FIRST: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "StorageClass",
    "CustomResourceDefinition",
    "ServiceAccount",
    "PodSecurityPolicy",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
    "ConfigMap",
    "Secret",
    "Endpoints",
    "Service",
    "LimitRange",
    "PriorityClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "Deployment",
    "StatefulSet",
    "CronJob",
    "PodDisruptionBudget",
];

/// Kinds applied after everything else, in this order.
const ORDER_LAST: &[&str] = &[
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Turns a component directory into the resources to apply.
pub trait ManifestRenderer: Send + Sync {
    /// Render the component rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor or a resource cannot be read or
    /// parsed.
    fn render(&self, dir: &Path) -> Result<Vec<Value>>;
}

/// Built-in renderer for the kustomization subset this tool emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct KustomizeRenderer;

impl KustomizeRenderer {
    fn render_dir(&self, dir: &Path) -> Result<Vec<Value>> {
        let descriptor = dir.join(KUSTOMIZATION_FILE);
        let raw = std::fs::read_to_string(&descriptor).map_err(|e| Error::io(&descriptor, e))?;
        let kustomization: Kustomization = serde_yaml::from_str(&raw)
            .map_err(|e| Error::parse(descriptor.display().to_string(), e))?;

        let mut resources = Vec::new();
        for entry in &kustomization.resources {
            let path = resolve_entry(dir, entry)?;
            if path.is_dir() {
                resources.extend(self.render_dir(&path)?);
            } else {
                resources.extend(split_documents(&path)?);
            }
        }

        if let Some(namespace) = kustomization.namespace.as_deref() {
            set_namespace(&mut resources, namespace);
        }
        debug!(dir = %dir.display(), count = resources.len(), "Rendered component");
        Ok(resources)
    }
}

impl ManifestRenderer for KustomizeRenderer {
    fn render(&self, dir: &Path) -> Result<Vec<Value>> {
        let mut resources = self.render_dir(dir)?;
        sort_legacy(&mut resources);
        Ok(resources)
    }
}

fn resolve_entry(dir: &Path, entry: &str) -> Result<PathBuf> {
    let relative = Path::new(entry);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::PathEscapesTree(relative.to_path_buf()));
    }
    Ok(dir.join(relative))
}

/// Split a multi-document YAML file, dropping empty documents.
fn split_documents(path: &Path) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut out = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&raw) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::parse(path.display().to_string(), e))?;
        if !value.is_null() {
            out.push(value);
        }
    }
    Ok(out)
}

fn kind_of(resource: &Value) -> &str {
    resource.get("kind").and_then(Value::as_str).unwrap_or_default()
}

fn name_of(resource: &Value) -> Option<&str> {
    resource.pointer("/metadata/name").and_then(Value::as_str)
}

fn set_metadata_field(resource: &mut Value, field: &str, value: &str) {
    let Some(object) = resource.as_object_mut() else {
        return;
    };
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert(field.to_string(), Value::String(value.to_string()));
    }
}

/// Move every namespaced resource into `namespace`.
fn set_namespace(resources: &mut [Value], namespace: &str) {
    let service_accounts: HashSet<String> = resources
        .iter()
        .filter(|r| kind_of(r) == "ServiceAccount")
        .filter_map(|r| name_of(r).map(ToString::to_string))
        .collect();

    for resource in resources.iter_mut() {
        let kind = kind_of(resource).to_string();
        if kind == "Namespace" {
            set_metadata_field(resource, "name", namespace);
            continue;
        }
        if !kinds::is_cluster_scoped(&kind) {
            set_metadata_field(resource, "namespace", namespace);
        }
        if kind == "RoleBinding" || kind == "ClusterRoleBinding" {
            fix_subjects(resource, &service_accounts, namespace);
        }
    }
}

fn fix_subjects(binding: &mut Value, service_accounts: &HashSet<String>, namespace: &str) {
    let Some(subjects) = binding.get_mut("subjects").and_then(Value::as_array_mut) else {
        return;
    };
    for subject in subjects {
        let is_local_sa = subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount")
            && subject
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| service_accounts.contains(n));
        if let (true, Some(subject)) = (is_local_sa, subject.as_object_mut()) {
            subject.insert("namespace".into(), Value::String(namespace.to_string()));
        }
    }
}

fn rank(kind: &str) -> usize {
    if let Some(i) = ORDER_FIRST.iter().position(|k| *k == kind) {
        return i;
    }
    if let Some(i) = ORDER_LAST.iter().position(|k| *k == kind) {
        return ORDER_FIRST.len() + 1 + i;
    }
    ORDER_FIRST.len()
}

/// Stable sort by kind rank; unlisted kinds sit in the middle, grouped by kind.
fn sort_legacy(resources: &mut [Value]) {
    resources.sort_by(|a, b| {
        let (ka, kb) = (kind_of(a), kind_of(b));
        rank(ka).cmp(&rank(kb)).then_with(|| {
            if rank(ka) == ORDER_FIRST.len() {
                ka.cmp(kb)
            } else {
                std::cmp::Ordering::Equal
            }
        })
    });
}
