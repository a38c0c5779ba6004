//! Kind table: resource name and scope for every kind the bootstrap applies.
//!
//! English pluralization is not derivable from the kind, so the mapping is
//! spelled out. Kinds missing from the table are refused.

use kube::discovery::ApiResource;

use crate::error::{Error, Result};

/// Whether a kind lives in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Created through the cluster-wide endpoint.
    Cluster,
    /// Created inside a namespace.
    Namespaced,
}

/// A resolved entry of the kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    /// Lowercase plural used in the REST path.
    pub plural: &'static str,
    /// Placement of objects of this kind.
    pub scope: Scope,
}

use Scope::{Cluster, Namespaced};

const KINDS: &[(&str, &str, Scope)] = &[
    // core
    ("Namespace", "namespaces", Cluster),
    ("ServiceAccount", "serviceaccounts", Namespaced),
    ("ConfigMap", "configmaps", Namespaced),
    ("Secret", "secrets", Namespaced),
    ("Service", "services", Namespaced),
    ("Endpoints", "endpoints", Namespaced),
    ("PersistentVolumeClaim", "persistentvolumeclaims", Namespaced),
    ("PersistentVolume", "persistentvolumes", Cluster),
    ("Pod", "pods", Namespaced),
    ("LimitRange", "limitranges", Namespaced),
    ("ResourceQuota", "resourcequotas", Namespaced),
    // workloads
    ("Deployment", "deployments", Namespaced),
    ("StatefulSet", "statefulsets", Namespaced),
    ("DaemonSet", "daemonsets", Namespaced),
    ("Job", "jobs", Namespaced),
    ("CronJob", "cronjobs", Namespaced),
    ("PodDisruptionBudget", "poddisruptionbudgets", Namespaced),
    // rbac
    ("Role", "roles", Namespaced),
    ("RoleBinding", "rolebindings", Namespaced),
    ("ClusterRole", "clusterroles", Cluster),
    ("ClusterRoleBinding", "clusterrolebindings", Cluster),
    // networking and storage
    ("NetworkPolicy", "networkpolicies", Namespaced),
    ("Ingress", "ingresses", Namespaced),
    ("IngressClass", "ingressclasses", Cluster),
    ("StorageClass", "storageclasses", Cluster),
    ("PriorityClass", "priorityclasses", Cluster),
    // api machinery
    ("CustomResourceDefinition", "customresourcedefinitions", Cluster),
    ("APIService", "apiservices", Cluster),
    (
        "MutatingWebhookConfiguration",
        "mutatingwebhookconfigurations",
        Cluster,
    ),
    (
        "ValidatingWebhookConfiguration",
        "validatingwebhookconfigurations",
        Cluster,
    ),
    // cert-manager
    ("Certificate", "certificates", Namespaced),
    ("Issuer", "issuers", Namespaced),
    ("ClusterIssuer", "clusterissuers", Cluster),
    // argo-cd
    ("Application", "applications", Namespaced),
    ("ApplicationSet", "applicationsets", Namespaced),
    ("AppProject", "appprojects", Namespaced),
    // postgres-operator
    ("OperatorConfiguration", "operatorconfigurations", Namespaced),
    ("PostgresTeam", "postgresteams", Namespaced),
    ("postgresql", "postgresqls", Namespaced),
    // valkey-operator
    ("Valkey", "valkeys", Namespaced),
    // gitea-operator
    ("Gitea", "giteas", Namespaced),
    ("User", "users", Namespaced),
    ("Org", "orgs", Namespaced),
    ("Repo", "repoes", Namespaced),
];

/// Look up `kind` in the table.
#[must_use]
pub fn lookup(kind: &str) -> Option<KindInfo> {
    KINDS
        .iter()
        .find(|(k, _, _)| *k == kind)
        .map(|&(_, plural, scope)| KindInfo { plural, scope })
}

/// Check whether objects of `kind` are cluster-scoped.
#[must_use]
pub fn is_cluster_scoped(kind: &str) -> bool {
    lookup(kind).is_some_and(|info| info.scope == Scope::Cluster)
}

/// Build the API descriptor for an object's `apiVersion` and `kind`.
///
/// # Errors
///
/// Returns [`Error::UnknownKind`] when the kind has no table entry.
pub fn api_resource(api_version: &str, kind: &str) -> Result<(ApiResource, Scope)> {
    let info = lookup(kind).ok_or_else(|| Error::UnknownKind {
        kind: kind.to_string(),
        api_version: api_version.to_string(),
    })?;

    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };

    let resource = ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: info.plural.to_string(),
    };
    Ok((resource, info.scope))
}
