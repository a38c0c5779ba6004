//! CLI subcommands.

pub mod password;
pub mod proxy;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use kube::Client;

use pivot::kubeconfig::{self, KubeTarget};

/// Connect to the cluster named by `target`.
pub(crate) async fn connect(target: &KubeTarget) -> Result<Client> {
    let context = target.context.as_deref().unwrap_or("<current>");
    kubeconfig::client_for(target)
        .await
        .with_context(|| format!("Failed to connect to cluster (context {context})"))
}
