//! Per-component descriptors: `kustomization.yaml` and `namespace.yaml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of the kustomization descriptor inside a component.
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Name of the synthesized namespace manifest inside a component.
pub const NAMESPACE_FILE: &str = "namespace.yaml";

/// The subset of a kustomization this tool writes and renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kustomization {
    /// Namespace applied to every namespaced resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Files (or nested component directories) making up the component.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Kustomization {
    /// Build the descriptor for a component directory.
    ///
    /// `resources` lists every regular file in `dir` except the descriptor
    /// itself, in name order, with the namespace file (if any) first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn for_component(dir: &Path, namespace: impl Into<String>) -> std::io::Result<Self> {
        let mut files = Vec::new();
        let mut has_namespace = false;

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match name.as_str() {
                KUSTOMIZATION_FILE => {}
                NAMESPACE_FILE => has_namespace = true,
                _ => files.push(name),
            }
        }
        files.sort();

        let mut resources = Vec::with_capacity(files.len() + 1);
        if has_namespace {
            resources.push(NAMESPACE_FILE.to_string());
        }
        resources.extend(files);

        Ok(Self {
            namespace: Some(namespace.into()),
            resources,
        })
    }

    /// Render as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Single-document Namespace manifest named `name`.
#[must_use]
pub fn namespace_manifest(name: &str) -> String {
    format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n")
}
