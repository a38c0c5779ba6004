use anyhow::{Context, Result};
use clap::Args;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tracing::debug;

use pivot::config::{DEFAULT_NAMESPACE, DEFAULT_USER};
use pivot::kubeconfig::KubeTarget;
use pivot::synth::password_secret_name;

/// Print the Git server password stored in the cluster
#[derive(Args, Debug)]
pub struct PasswordCommand {
    /// Git server user whose password to read
    #[arg(short, long, env = "PIVOT_USER", default_value = DEFAULT_USER)]
    user: String,

    /// Namespace of the Git server
    #[arg(short, long, env = "PIVOT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
}

impl PasswordCommand {
    pub async fn run(&self, target: &KubeTarget) -> Result<()> {
        let client = super::connect(target).await?;
        let password = read_password(client, &self.namespace, &self.user)
            .await?
            .with_context(|| {
                format!(
                    "Secret {}/{} not found, has `pivot run` completed?",
                    self.namespace,
                    password_secret_name(&self.user)
                )
            })?;
        println!("{password}");
        Ok(())
    }
}

/// Read the password of `user` from its Secret, `None` if it does not exist.
pub(crate) async fn read_password(
    client: Client,
    namespace: &str,
    user: &str,
) -> Result<Option<String>> {
    let name = password_secret_name(user);
    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let Some(secret) = secrets
        .get_opt(&name)
        .await
        .with_context(|| format!("Failed to read secret {namespace}/{name}"))?
    else {
        return Ok(None);
    };

    let value = secret
        .data
        .as_ref()
        .and_then(|d| d.get("password"))
        .with_context(|| format!("Secret {namespace}/{name} has no password key"))?;
    debug!(secret = %name, namespace, "Read password secret");
    let password =
        String::from_utf8(value.0.clone()).context("Password is not valid UTF-8")?;
    Ok(Some(password))
}
