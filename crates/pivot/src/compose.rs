//! Initial composition of the manifest tree from upstream releases.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::release::ReleaseResolver;
use crate::store::{self, ManifestStore, KUSTOMIZATION_FILE};

/// A top-level directory of the manifest tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// CD bootstrap objects (Application and ApplicationSet).
    Init,
    /// Git server resources.
    Gitea,
    /// Continuous-deployment controller.
    ArgoCd,
    /// Certificate issuance.
    CertManager,
    /// Database operator.
    PostgresOperator,
    /// Cache operator.
    ValkeyOperator,
    /// Git server operator.
    GiteaOperator,
}

impl Component {
    /// Every component, in the order the ApplicationSet lists them.
    pub const ALL: [Self; 7] = [
        Self::Init,
        Self::Gitea,
        Self::ArgoCd,
        Self::CertManager,
        Self::PostgresOperator,
        Self::ValkeyOperator,
        Self::GiteaOperator,
    ];

    /// Operator components, in the order they are applied.
    pub const OPERATORS: [Self; 5] = [
        Self::CertManager,
        Self::ArgoCd,
        Self::PostgresOperator,
        Self::ValkeyOperator,
        Self::GiteaOperator,
    ];

    /// Directory name inside the tree.
    #[must_use]
    pub const fn dir(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Gitea => "gitea",
            Self::ArgoCd => "argocd",
            Self::CertManager => "cert-manager",
            Self::PostgresOperator => "postgres-operator",
            Self::ValkeyOperator => "valkey-operator",
            Self::GiteaOperator => "gitea-operator",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Components filled from upstream, in composition order.
const UPSTREAM_ORDER: [Component; 5] = [
    Component::ArgoCd,
    Component::CertManager,
    Component::ValkeyOperator,
    Component::PostgresOperator,
    Component::GiteaOperator,
];

/// Files taken from the postgres-operator checkout, in concatenation order.
pub const POSTGRES_OPERATOR_MANIFESTS: [&str; 4] = [
    "manifests/configmap.yaml",
    "manifests/operator-service-account-rbac.yaml",
    "manifests/postgres-operator.yaml",
    "manifests/api-service.yaml",
];

/// Where upstream manifests come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSources {
    /// GitHub REST API root.
    pub api_base: String,
    /// GitHub web root, used for release assets.
    pub download_base: String,
    /// Argo CD install manifest (tracks upstream master).
    pub argocd_install: String,
    /// Git URL of the postgres-operator project.
    pub postgres_operator_git: String,
}

impl Default for UpstreamSources {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            download_base: "https://github.com".into(),
            argocd_install: "https://raw.githubusercontent.com/argoproj/argo-cd/refs/heads/master/manifests/install.yaml".into(),
            postgres_operator_git: "https://github.com/zalando/postgres-operator".into(),
        }
    }
}

impl UpstreamSources {
    fn latest_url(&self, project: &str) -> String {
        format!("{}/repos/{project}/releases/latest", self.api_base)
    }

    fn asset_url(&self, project: &str, tag: &str, asset: &str) -> String {
        format!("{}/{project}/releases/download/{tag}/{asset}", self.download_base)
    }
}

/// Fills a freshly initialized tree with the operator components.
pub struct TreeComposer<'a> {
    store: &'a ManifestStore,
    resolver: ReleaseResolver,
    sources: UpstreamSources,
    scratch: PathBuf,
}

impl<'a> TreeComposer<'a> {
    /// Composer writing into `store`. Upstream checkouts go under `scratch`,
    /// which must be outside the tree.
    #[must_use]
    pub fn new(
        store: &'a ManifestStore,
        resolver: ReleaseResolver,
        sources: UpstreamSources,
        scratch: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            resolver,
            sources,
            scratch: scratch.into(),
        }
    }

    /// Add argocd, cert-manager, valkey-operator, postgres-operator and
    /// gitea-operator, each followed by its kustomization.
    ///
    /// A component whose kustomization is already committed is complete and
    /// skipped, so a tree left behind by an interrupted run is finished
    /// rather than rebuilt.
    ///
    /// # Errors
    ///
    /// Stops at the first failed lookup, download, clone or commit.
    pub async fn compose(&self) -> Result<()> {
        for component in UPSTREAM_ORDER {
            if self.is_composed(component) {
                info!(component = %component, "Already composed, skipping");
                continue;
            }
            match component {
                Component::ArgoCd => self.add_argocd().await?,
                Component::CertManager => {
                    self.add_release_asset(
                        component,
                        "cert-manager/cert-manager",
                        "cert-manager.yaml",
                    )
                    .await?;
                }
                Component::ValkeyOperator => {
                    self.add_release_asset(
                        component,
                        "hyperspike/valkey-operator",
                        "install.yaml",
                    )
                    .await?;
                }
                Component::PostgresOperator => self.add_postgres_operator().await?,
                Component::GiteaOperator => {
                    self.add_release_asset(component, "hyperspike/gitea-operator", "install.yaml")
                        .await?;
                }
                Component::Init | Component::Gitea => {}
            }
        }
        info!(path = %self.store.root().display(), "Composed manifest tree");
        Ok(())
    }

    fn is_composed(&self, component: Component) -> bool {
        self.store
            .is_committed(Path::new(component.dir()).join(KUSTOMIZATION_FILE))
    }

    async fn add_argocd(&self) -> Result<()> {
        let component = Component::ArgoCd;
        self.store
            .add_fetched_content(
                &self.sources.argocd_install,
                &manifest_path(component),
                &format!("adding {component}"),
            )
            .await?;
        self.store
            .synthesize_namespace(component.dir(), &format!("adding {component} namespace"))?;
        self.kustomize(component)
    }

    async fn add_release_asset(
        &self,
        component: Component,
        project: &str,
        asset: &str,
    ) -> Result<()> {
        let tag = self
            .resolver
            .latest_tag(&self.sources.latest_url(project))
            .await?;
        self.store
            .add_fetched_content(
                &self.sources.asset_url(project, &tag, asset),
                &manifest_path(component),
                &format!("adding {component} {tag}"),
            )
            .await?;
        self.kustomize(component)
    }

    async fn add_postgres_operator(&self) -> Result<()> {
        let component = Component::PostgresOperator;
        let tag = self
            .resolver
            .latest_tag(&self.sources.latest_url("zalando/postgres-operator"))
            .await?;

        let checkout = self.scratch.join(component.dir());
        store::clone_tag(&self.sources.postgres_operator_git, &checkout, &tag)?;

        let sources: Vec<PathBuf> = POSTGRES_OPERATOR_MANIFESTS
            .iter()
            .map(|m| checkout.join(m))
            .collect();
        self.store.concatenate(
            &sources,
            &manifest_path(component),
            "---\n",
            &format!("adding {component} {tag}"),
        )?;
        self.store
            .synthesize_namespace(component.dir(), &format!("adding {component} namespace"))?;
        self.kustomize(component)
    }

    fn kustomize(&self, component: Component) -> Result<()> {
        self.store.synthesize_kustomization(
            component.dir(),
            None,
            &format!("adding {component} kustomization"),
        )
    }
}

/// `<component>/<component>.yaml`
#[must_use]
pub fn manifest_path(component: Component) -> String {
    format!("{0}/{0}.yaml", component.dir())
}
