//! Idempotent creation of resources in the target cluster.
//!
//! The applier only ever creates. An object that is already present counts
//! as applied, so a partially completed run can simply be repeated.

pub mod kinds;
pub mod render;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use kinds::Scope;
pub use render::{KustomizeRenderer, ManifestRenderer};

/// Where an object is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Cluster-wide endpoint.
    Cluster,
    /// The named namespace.
    Namespace(String),
    /// The client's default namespace.
    DefaultNamespace,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "<cluster>"),
            Self::Namespace(ns) => write!(f, "{ns}"),
            Self::DefaultNamespace => write!(f, "<default>"),
        }
    }
}

/// Result of applying a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object was created.
    Created,
    /// The object was already present.
    AlreadyExists,
    /// Dry-run: nothing was sent.
    DryRun,
}

/// The single cluster call the applier needs.
#[async_trait]
pub trait ResourceCreator: Send + Sync {
    /// Create `object` as `resource` at `placement`.
    async fn create(
        &self,
        resource: &ApiResource,
        placement: &Placement,
        object: &DynamicObject,
    ) -> std::result::Result<(), kube::Error>;
}

/// [`ResourceCreator`] backed by a live cluster client.
#[derive(Clone)]
pub struct KubeCreator {
    client: Client,
}

impl KubeCreator {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceCreator for KubeCreator {
    async fn create(
        &self,
        resource: &ApiResource,
        placement: &Placement,
        object: &DynamicObject,
    ) -> std::result::Result<(), kube::Error> {
        let api: Api<DynamicObject> = match placement {
            Placement::Cluster => Api::all_with(self.client.clone(), resource),
            Placement::Namespace(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            Placement::DefaultNamespace => {
                Api::default_namespaced_with(self.client.clone(), resource)
            }
        };
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }
}

fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.reason == "AlreadyExists")
}

/// Creates rendered and synthesized objects, tolerating ones already present.
#[derive(Clone)]
pub struct ClusterApplier {
    creator: Option<Arc<dyn ResourceCreator>>,
    dry_run: bool,
}

impl fmt::Debug for ClusterApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterApplier")
            .field("connected", &self.creator.is_some())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl ClusterApplier {
    /// Applier that creates through `creator`.
    #[must_use]
    pub fn new(creator: Arc<dyn ResourceCreator>) -> Self {
        Self {
            creator: Some(creator),
            dry_run: false,
        }
    }

    /// Applier with no cluster behind it; every apply is a dry run.
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            creator: None,
            dry_run: true,
        }
    }

    /// Toggle dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Whether creates are short-circuited.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply rendered documents in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by [`Self::apply_one`].
    pub async fn apply_rendered(&self, resources: Vec<Value>) -> Result<Vec<ApplyOutcome>> {
        let mut outcomes = Vec::with_capacity(resources.len());
        for resource in resources {
            outcomes.push(self.apply_one(resource).await?);
        }
        Ok(outcomes)
    }

    /// Decode one rendered document and create it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the document is not a resource, plus any
    /// error from [`Self::apply_object`].
    pub async fn apply_one(&self, resource: Value) -> Result<ApplyOutcome> {
        let object: DynamicObject =
            serde_json::from_value(resource).map_err(|e| Error::Decode(e.to_string()))?;
        self.apply_object(&object).await
    }

    /// Create one object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKind`] for kinds missing from the kind table
    /// and [`Error::Apply`] when the cluster refuses the create.
    pub async fn apply_object(&self, object: &DynamicObject) -> Result<ApplyOutcome> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| Error::Decode(format!("{} has no apiVersion/kind", object.name_any())))?;
        let (resource, scope) = kinds::api_resource(&types.api_version, &types.kind)?;

        let placement = match (scope, object.metadata.namespace.as_deref()) {
            (Scope::Cluster, _) => Placement::Cluster,
            (Scope::Namespaced, Some(ns)) if !ns.is_empty() => Placement::Namespace(ns.to_string()),
            (Scope::Namespaced, _) => Placement::DefaultNamespace,
        };
        let name = object.name_any();

        if self.dry_run {
            info!(
                kind = %types.kind,
                namespace = %placement,
                name = %name,
                "Dry run, not creating"
            );
            return Ok(ApplyOutcome::DryRun);
        }
        let creator = self.creator.as_ref().ok_or(Error::NoCluster)?;

        match creator.create(&resource, &placement, object).await {
            Ok(()) => {
                info!(kind = %types.kind, namespace = %placement, name = %name, "Created");
                Ok(ApplyOutcome::Created)
            }
            Err(e) if is_already_exists(&e) => {
                debug!(kind = %types.kind, namespace = %placement, name = %name, "Already exists");
                Ok(ApplyOutcome::AlreadyExists)
            }
            Err(source) => Err(Error::Apply {
                kind: types.kind.clone(),
                namespace: placement.to_string(),
                name,
                source,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake for the cluster seam.

    use std::sync::Mutex;

    use super::*;

    /// What the fake answers to a create call.
    #[derive(Debug, Clone, Copy)]
    pub enum Reply {
        Ok,
        AlreadyExists,
        Forbidden,
    }

    /// Records every create call.
    #[derive(Debug)]
    pub struct FakeCreator {
        pub reply: Reply,
        pub calls: Mutex<Vec<(String, Placement, String)>>,
    }

    impl FakeCreator {
        pub fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<(String, Placement, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: format!("fake {reason}"),
            reason: reason.into(),
            code,
        })
    }

    #[async_trait]
    impl ResourceCreator for FakeCreator {
        async fn create(
            &self,
            resource: &ApiResource,
            placement: &Placement,
            object: &DynamicObject,
        ) -> std::result::Result<(), kube::Error> {
            self.calls.lock().unwrap().push((
                resource.plural.clone(),
                placement.clone(),
                object.name_any(),
            ));
            match self.reply {
                Reply::Ok => Ok(()),
                Reply::AlreadyExists => Err(api_error(409, "AlreadyExists")),
                Reply::Forbidden => Err(api_error(403, "Forbidden")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeCreator, Reply};
    use super::*;
    use serde_json::json;

    fn deployment(namespace: Option<&str>) -> Value {
        let mut v = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "gitea-operator" },
            "spec": {}
        });
        if let Some(ns) = namespace {
            v["metadata"]["namespace"] = json!(ns);
        }
        v
    }

    #[tokio::test]
    async fn test_created_in_object_namespace() {
        let fake = FakeCreator::new(Reply::Ok);
        let applier = ClusterApplier::new(fake.clone());

        let outcome = applier.apply_one(deployment(Some("gitea-operator"))).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(
            fake.calls(),
            vec![(
                "deployments".to_string(),
                Placement::Namespace("gitea-operator".into()),
                "gitea-operator".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_missing_namespace_uses_client_default() {
        let fake = FakeCreator::new(Reply::Ok);
        let applier = ClusterApplier::new(fake.clone());
        applier.apply_one(deployment(None)).await.unwrap();
        assert_eq!(fake.calls()[0].1, Placement::DefaultNamespace);
    }

    #[tokio::test]
    async fn test_cluster_scoped_ignores_namespace() {
        let fake = FakeCreator::new(Reply::Ok);
        let applier = ClusterApplier::new(fake.clone());
        applier
            .apply_one(json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "ClusterRole",
                "metadata": { "name": "reader", "namespace": "ignored" }
            }))
            .await
            .unwrap();
        assert_eq!(fake.calls()[0].1, Placement::Cluster);
    }

    #[tokio::test]
    async fn test_already_exists_is_success() {
        let fake = FakeCreator::new(Reply::AlreadyExists);
        let applier = ClusterApplier::new(fake);
        let outcome = applier.apply_one(deployment(Some("default"))).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_other_failures_name_kind_and_namespace() {
        let fake = FakeCreator::new(Reply::Forbidden);
        let applier = ClusterApplier::new(fake);
        let err = applier
            .apply_one(deployment(Some("cert-manager")))
            .await
            .unwrap_err();
        match err {
            Error::Apply {
                kind,
                namespace,
                name,
                ..
            } => {
                assert_eq!(kind, "Deployment");
                assert_eq!(namespace, "cert-manager");
                assert_eq!(name, "gitea-operator");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_create() {
        let fake = FakeCreator::new(Reply::Ok);
        let applier = ClusterApplier::new(fake.clone()).with_dry_run(true);
        let outcomes = applier
            .apply_rendered(vec![deployment(Some("a")), deployment(Some("b"))])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![ApplyOutcome::DryRun, ApplyOutcome::DryRun]);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_create() {
        let fake = FakeCreator::new(Reply::Ok);
        let applier = ClusterApplier::new(fake.clone());
        let err = applier
            .apply_one(json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": { "name": "w" }
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownKind { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_resource_document_is_decode_error() {
        let applier = ClusterApplier::dry_run();
        let err = applier.apply_one(json!(["not", "an", "object"])).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_apply_rendered_stops_at_first_failure() {
        let fake = FakeCreator::new(Reply::Forbidden);
        let applier = ClusterApplier::new(fake.clone());
        let result = applier
            .apply_rendered(vec![deployment(Some("a")), deployment(Some("b"))])
            .await;
        assert!(result.is_err());
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_cluster_outside_dry_run() {
        let applier = ClusterApplier::dry_run().with_dry_run(false);
        let err = applier.apply_one(deployment(Some("a"))).await.unwrap_err();
        assert!(matches!(err, Error::NoCluster));
    }
}
