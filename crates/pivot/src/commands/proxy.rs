use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use pivot::kubeconfig::KubeTarget;
use pivot::retry::RetryBudget;
use pivot::tunnel::{KubePods, Tunnel, TunnelSpec, DEFAULT_NAMESPACE, DEFAULT_POD, DEFAULT_PORT};
use pivot::ui;

/// Forward a pod port to localhost until interrupted
#[derive(Args, Debug)]
pub struct ProxyCommand {
    /// Pod to forward
    #[arg(long, env = "POD_NAME", default_value = DEFAULT_POD)]
    name: String,

    /// Namespace of the pod
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Port in the pod, also used locally
    #[arg(long, env = "POD_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl ProxyCommand {
    pub async fn run(&self, target: &KubeTarget) -> Result<()> {
        let client = super::connect(target).await?;
        let spec = TunnelSpec {
            namespace: self.namespace.clone(),
            pod: self.name.clone(),
            pod_port: self.port,
            local_port: self.port,
            budget: RetryBudget::pod_ready(),
        };

        let mut handle = Tunnel::spawn(Arc::new(KubePods::new(client)), spec);
        let addr = handle
            .wait_ready()
            .await
            .with_context(|| format!("Failed to forward {}/{}", self.namespace, self.name))?;
        ui::print_success(&format!(
            "Forwarding {addr} -> {}/{}:{}",
            self.namespace, self.name, self.port
        ));
        ui::print_info("Press Ctrl-C to stop");

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
            }
            error = handle.closed() => {
                anyhow::bail!(
                    "Tunnel closed: {}",
                    error.unwrap_or_else(|| "listener stopped".into())
                );
            }
        }
        handle.stop().await;
        ui::print_info("Tunnel stopped");
        Ok(())
    }
}
