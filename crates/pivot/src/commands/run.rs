use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use pivot::apply::{ClusterApplier, KubeCreator};
use pivot::config::{
    BootstrapConfig, DEFAULT_NAMESPACE, DEFAULT_REMOTE, DEFAULT_REPO_PATH, DEFAULT_SCRATCH_PATH,
    DEFAULT_USER,
};
use pivot::kubeconfig::KubeTarget;
use pivot::orchestrator::Bootstrapper;
use pivot::store;
use pivot::tunnel::{KubePods, PodGateway, TunnelSpec};
use pivot::ui;

use super::password::read_password;

/// Bootstrap the cluster into a self-managing GitOps state
#[derive(Args, Debug)]
pub struct RunCommand {
    /// External host name of the Git server
    #[arg(short, long, env = "PIVOT_REMOTE", default_value = DEFAULT_REMOTE)]
    remote: String,

    /// Git server user
    #[arg(short, long, env = "PIVOT_USER", default_value = DEFAULT_USER)]
    user: String,

    /// Git server password (generated if not set)
    #[arg(short, long, env = "PIVOT_PASSWD", hide_env_values = true)]
    password: Option<String>,

    /// Build the tree and render everything, but change nothing in the cluster
    #[arg(short, long, env = "PIVOT_DRY_RUN")]
    dry_run: bool,

    /// Namespace to deploy the Git server to
    #[arg(short, long, env = "PIVOT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Location of the manifest tree
    #[arg(long, env = "PIVOT_REPO", default_value = DEFAULT_REPO_PATH)]
    repo: PathBuf,

    /// Where upstream checkouts are kept
    #[arg(long, env = "PIVOT_SCRATCH", default_value = DEFAULT_SCRATCH_PATH)]
    scratch: PathBuf,

    /// Push to the remote host directly instead of through a pod tunnel
    #[arg(long, env = "PIVOT_DIRECT")]
    direct: bool,

    /// Back the Git server with a Valkey cache
    #[arg(long, env = "PIVOT_VALKEY")]
    valkey: bool,
}

impl RunCommand {
    fn config(&self) -> BootstrapConfig {
        BootstrapConfig {
            repo_path: self.repo.clone(),
            scratch_path: self.scratch.clone(),
            remote: self.remote.clone(),
            user: self.user.clone(),
            password: self.password.clone().filter(|p| !p.is_empty()),
            namespace: self.namespace.clone(),
            dry_run: self.dry_run,
            direct: self.direct,
            valkey: self.valkey,
            // The tunnel must reach the pod where the Git server was deployed.
            tunnel: TunnelSpec {
                namespace: self.namespace.clone(),
                ..TunnelSpec::default()
            },
            ..BootstrapConfig::default()
        }
    }

    pub async fn run(&self, target: &KubeTarget) -> Result<()> {
        ui::print_banner("Pivot GitOps bootstrap");
        let mut config = self.config();

        let (applier, pods) = if config.dry_run {
            ui::print_warning("Dry run: nothing will be created or pushed");
            (ClusterApplier::dry_run(), None)
        } else {
            let client = super::connect(target).await?;

            // A re-run must reuse the password the Git server was created with.
            if config.password.is_none() && store::repo_exists(&config.repo_path) {
                if let Some(existing) =
                    read_password(client.clone(), &config.namespace, &config.user).await?
                {
                    info!(user = %config.user, "Reusing password from previous run");
                    config.password = Some(existing);
                }
            }

            let pods: Arc<dyn PodGateway> = Arc::new(KubePods::new(client.clone()));
            (
                ClusterApplier::new(Arc::new(KubeCreator::new(client))),
                Some(pods),
            )
        };

        ui::print_step(&format!("Manifest tree: {}", config.repo_path.display()));
        let bootstrapper = Bootstrapper::new(config, applier, pods);
        let report = bootstrapper.run().await.context("Bootstrap failed")?;

        let config = bootstrapper.config();
        ui::print_report(
            &report,
            self.dry_run,
            config.push_remote(),
            &config.origin_repo_url(),
        );
        ui::print_field("User", &self.user);
        Ok(())
    }
}
