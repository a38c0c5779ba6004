//! The bootstrap pipeline.
//!
//! Steps run strictly in order and the first fatal error aborts the run.
//! Nothing is rolled back: every step tolerates the leftovers of an earlier,
//! partial run, so recovering means running again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::apply::{ClusterApplier, KustomizeRenderer, ManifestRenderer};
use crate::compose::{Component, TreeComposer, UpstreamSources};
use crate::config::{generate_password, BootstrapConfig};
use crate::error::{Error, Result};
use crate::release::{self, ReleaseResolver};
use crate::retry::{retry_fixed, RetryBudget};
use crate::store::{self, ManifestStore};
use crate::synth::{ArgoParams, GiteaParams, ManifestGroup, Synthesizer, ARGOCD_NAMESPACE};
use crate::tunnel::{PodGateway, Tunnel, TunnelHandle};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry budgets of the two network waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    pub reachability: RetryBudget,
    pub push: RetryBudget,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            reachability: RetryBudget::reachability(),
            push: RetryBudget::push(),
        }
    }
}

/// Git server addresses used to hand the tree over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Polled until it answers before the first push.
    pub health_url: String,
    /// Bound to the push remote.
    pub repo_url: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Whether the manifest tree was created by this run.
    pub tree_created: bool,
    /// Password in use for the Git server user.
    pub password: String,
    /// Whether the password was generated by this run.
    pub password_generated: bool,
    /// Number of pushes that succeeded.
    pub pushes: u32,
}

/// Drives a cluster from empty to self-managing.
pub struct Bootstrapper {
    config: BootstrapConfig,
    applier: ClusterApplier,
    renderer: Box<dyn ManifestRenderer>,
    pods: Option<Arc<dyn PodGateway>>,
    sources: UpstreamSources,
    budgets: Budgets,
    endpoints: Option<Endpoints>,
}

impl Bootstrapper {
    /// Pipeline over `applier`. `pods` is needed unless the run is a dry run
    /// or pushes go straight to the external host.
    #[must_use]
    pub fn new(
        config: BootstrapConfig,
        applier: ClusterApplier,
        pods: Option<Arc<dyn PodGateway>>,
    ) -> Self {
        let applier = applier.with_dry_run(config.dry_run);
        Self {
            config,
            applier,
            renderer: Box::new(KustomizeRenderer),
            pods,
            sources: UpstreamSources::default(),
            budgets: Budgets::default(),
            endpoints: None,
        }
    }

    /// Fetch upstream manifests from `sources`.
    #[must_use]
    pub fn with_sources(mut self, sources: UpstreamSources) -> Self {
        self.sources = sources;
        self
    }

    /// Override the wait budgets.
    #[must_use]
    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Hand off to fixed endpoints instead of the tunnel or external host.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Render components with `renderer`.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Box<dyn ManifestRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run the whole pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; see [`Error`] for the taxonomy.
    pub async fn run(&self) -> Result<BootstrapReport> {
        let (store, tree_created) = self.prepare_tree().await?;
        self.apply_operators().await?;

        let (password, password_generated) = match self.config.password.as_deref() {
            Some(p) if !p.is_empty() => (p.to_string(), false),
            _ => (generate_password(), true),
        };

        let mut synth = Synthesizer::new();
        self.install_git_server(&store, &mut synth, &password).await?;

        store.add_remote("local", &self.config.local_repo_url())?;
        store.add_remote("origin", &self.config.origin_repo_url())?;

        let mut report = BootstrapReport {
            tree_created,
            password,
            password_generated,
            pushes: 0,
        };

        if self.config.dry_run {
            self.install_cd_bootstrap(&store, &mut synth, &report.password)
                .await?;
            info!("Dry run complete, nothing pushed");
            return Ok(report);
        }

        let tunnel = self.open_tunnel().await?;
        let endpoints = self.endpoints(tunnel.as_ref().map(|(_, addr)| *addr));
        let result = self
            .hand_off(&store, &mut synth, &mut report, &endpoints)
            .await;
        if let Some((tunnel, _)) = tunnel {
            tunnel.stop().await;
        }
        result?;
        Ok(report)
    }

    /// Where the Git server answers during hand-off.
    fn endpoints(&self, tunnel_addr: Option<SocketAddr>) -> Endpoints {
        if let Some(endpoints) = &self.endpoints {
            return endpoints.clone();
        }
        match tunnel_addr {
            Some(addr) => Endpoints {
                health_url: self.config.local_health_url(addr.port()),
                repo_url: self.config.local_repo_url_on(addr.port()),
            },
            None => Endpoints {
                health_url: self.config.remote_health_url(),
                repo_url: self.config.origin_repo_url(),
            },
        }
    }

    async fn hand_off(
        &self,
        store: &ManifestStore,
        synth: &mut Synthesizer,
        report: &mut BootstrapReport,
        endpoints: &Endpoints,
    ) -> Result<()> {
        store.add_remote(self.config.push_remote(), &endpoints.repo_url)?;
        wait_reachable(&endpoints.health_url, &self.budgets.reachability).await?;
        self.push(store, &report.password).await?;
        report.pushes += 1;

        self.install_cd_bootstrap(store, synth, &report.password)
            .await?;
        self.push(store, &report.password).await?;
        report.pushes += 1;
        Ok(())
    }

    /// Open the existing tree, or create a new one, and compose whatever is
    /// still missing from it.
    async fn prepare_tree(&self) -> Result<(ManifestStore, bool)> {
        let path = &self.config.repo_path;
        let (store, created) = if store::repo_exists(path) {
            info!(path = %path.display(), "Manifest tree exists, reusing it");
            (ManifestStore::open(path)?, false)
        } else {
            (ManifestStore::initialize(path)?, true)
        };

        let resolver = ReleaseResolver::new(release::http_client()?);
        TreeComposer::new(
            &store,
            resolver,
            self.sources.clone(),
            &self.config.scratch_path,
        )
        .compose()
        .await?;
        Ok((store, created))
    }

    async fn apply_operators(&self) -> Result<()> {
        for component in Component::OPERATORS {
            self.apply_component(component).await?;
        }
        Ok(())
    }

    async fn apply_component(&self, component: Component) -> Result<()> {
        let dir = self.config.repo_path.join(component.dir());
        let resources = self.renderer.render(&dir)?;
        info!(component = %component, count = resources.len(), "Applying component");
        self.applier.apply_rendered(resources).await?;
        Ok(())
    }

    async fn install_git_server(
        &self,
        store: &ManifestStore,
        synth: &mut Synthesizer,
        password: &str,
    ) -> Result<()> {
        let objects = synth.gitea(&GiteaParams {
            user: self.config.user.clone(),
            password: password.to_string(),
            domain: self.config.remote.clone(),
            namespace: self.config.namespace.clone(),
            valkey: self.config.valkey,
        })?;
        for object in &objects {
            self.applier.apply_object(object).await?;
        }
        self.record_group(
            store,
            synth,
            ManifestGroup::Gitea,
            Component::Gitea,
            &self.config.namespace,
        )
    }

    async fn install_cd_bootstrap(
        &self,
        store: &ManifestStore,
        synth: &mut Synthesizer,
        password: &str,
    ) -> Result<()> {
        let objects = synth.argocd(&ArgoParams {
            user: self.config.user.clone(),
            password: password.to_string(),
            gitea_namespace: self.config.namespace.clone(),
        })?;
        for object in &objects {
            self.applier.apply_object(object).await?;
        }
        self.record_group(
            store,
            synth,
            ManifestGroup::ArgoCd,
            Component::Init,
            ARGOCD_NAMESPACE,
        )
    }

    /// Write a synthesized group into its component and commit it with its
    /// kustomization.
    fn record_group(
        &self,
        store: &ManifestStore,
        synth: &Synthesizer,
        group: ManifestGroup,
        component: Component,
        namespace: &str,
    ) -> Result<()> {
        let relative = crate::compose::manifest_path(component);
        synth.write_group(group, &store.resolve(&relative)?)?;
        store.add_synthesized_content(&relative, &format!("adding {component}"))?;
        store.synthesize_kustomization(
            component.dir(),
            Some(namespace),
            &format!("adding {component} kustomization"),
        )
    }

    async fn open_tunnel(&self) -> Result<Option<(TunnelHandle, SocketAddr)>> {
        if self.config.direct {
            info!(remote = %self.config.remote, "Pushing directly, no tunnel");
            return Ok(None);
        }
        let pods = self
            .pods
            .clone()
            .ok_or_else(|| Error::Tunnel("no pod gateway configured".into()))?;
        let mut handle = Tunnel::spawn(pods, self.config.tunnel.clone());
        let addr = handle.wait_ready().await?;
        Ok(Some((handle, addr)))
    }

    async fn push(&self, store: &ManifestStore, password: &str) -> Result<()> {
        push_with_retry(
            store,
            self.config.push_remote(),
            &self.config.user,
            password,
            &self.budgets.push,
        )
        .await
    }
}

/// Poll `url` until it answers with a success status.
///
/// Certificates are not verified: the server is minutes old and self-signed.
///
/// # Errors
///
/// Returns [`Error::ReachabilityTimeout`] when the budget runs out.
pub async fn wait_reachable(url: &str, budget: &RetryBudget) -> Result<()> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(HEALTH_TIMEOUT)
        .user_agent(release::USER_AGENT)
        .build()
        .map_err(|source| Error::Fetch {
            url: url.to_string(),
            source,
        })?;

    info!(url, "Waiting for git server");
    retry_fixed(budget, "health check", || {
        let client = client.clone();
        async move {
            client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map(|_| ())
        }
    })
    .await
    .map_err(|exhausted| Error::ReachabilityTimeout {
        url: url.to_string(),
        attempts: exhausted.attempts,
        last_error: exhausted.last_error.to_string(),
    })?;
    info!(url, "Git server is reachable");
    Ok(())
}

/// Push the tree to `remote` until it succeeds or the budget runs out.
///
/// Must run on a multi-threaded runtime: the push itself is blocking.
///
/// # Errors
///
/// Returns [`Error::PushExhausted`] with the last push error.
pub async fn push_with_retry(
    store: &ManifestStore,
    remote: &str,
    user: &str,
    password: &str,
    budget: &RetryBudget,
) -> Result<()> {
    retry_fixed(budget, "push", || async move {
        tokio::task::block_in_place(|| store.push(remote, user, password))
    })
    .await
    .map_err(|exhausted| {
        warn!(remote, attempts = exhausted.attempts, "Giving up on push");
        Error::PushExhausted {
            remote: remote.to_string(),
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reachable_on_fifth_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/healthz"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(4)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&server)
            .await;

        let budget = RetryBudget::new(10, Duration::from_millis(20));
        let start = std::time::Instant::now();
        wait_reachable(&format!("{}/api/healthz", server.uri()), &budget)
            .await
            .unwrap();

        assert_eq!(server.received_requests().await.unwrap().len(), 5);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_reachability_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let budget = RetryBudget::new(3, Duration::from_millis(1));
        let err = wait_reachable(&format!("{}/api/healthz", server.uri()), &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReachabilityTimeout { attempts: 3, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_exhausts_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        let missing = tmp.path().join("missing.git");
        store.add_remote("local", missing.to_str().unwrap()).unwrap();

        let budget = RetryBudget::new(4, Duration::from_millis(1));
        let err = push_with_retry(&store, "local", "pivot", "pw", &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PushExhausted { attempts: 4, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_with_retry_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let bare = tmp.path().join("remote.git");
        git2::Repository::init_bare(&bare).unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        store.add_remote("local", bare.to_str().unwrap()).unwrap();

        let budget = RetryBudget::new(2, Duration::from_millis(1));
        push_with_retry(&store, "local", "pivot", "pw", &budget)
            .await
            .unwrap();
    }

    #[test]
    fn test_hand_off_uses_bound_tunnel_port() {
        let bootstrapper = Bootstrapper::new(
            BootstrapConfig::default(),
            ClusterApplier::dry_run(),
            None,
        );
        let addr: SocketAddr = "127.0.0.1:41234".parse().unwrap();
        assert_eq!(
            bootstrapper.endpoints(Some(addr)),
            Endpoints {
                health_url: "https://localhost:41234/api/healthz".into(),
                repo_url: "https://localhost:41234/infra/infra.git".into(),
            }
        );
        assert_eq!(
            bootstrapper.endpoints(None).health_url,
            "https://git.local.net/api/healthz"
        );
    }
}
