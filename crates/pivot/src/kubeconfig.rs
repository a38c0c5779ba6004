//! Cluster selection from the user's kubeconfig.
//!
//! The context to use travels as a [`KubeTarget`] value through every
//! constructor that needs a client.

use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Which cluster to talk to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeTarget {
    /// Context name; `None` or empty keeps the kubeconfig's current context.
    pub context: Option<String>,
    /// Explicit kubeconfig file; defaults to `$KUBECONFIG` or `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
}

impl KubeTarget {
    #[must_use]
    pub fn with_context(context: Option<String>) -> Self {
        Self {
            context,
            kubeconfig: None,
        }
    }
}

/// Get the default kubeconfig path: `$KUBECONFIG` if set, else `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    match std::env::var_os("KUBECONFIG") {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::home_dir().map(|h| h.join(".kube").join("config")),
    }
}

/// Make `context` the current context of `config`.
///
/// `None` or an empty name leaves the current context untouched.
///
/// # Errors
///
/// Returns [`Error::ContextNotFound`] if no context has that name.
pub fn select_context(config: &mut Kubeconfig, context: Option<&str>) -> Result<()> {
    let Some(name) = context.filter(|c| !c.is_empty()) else {
        return Ok(());
    };
    if !config.contexts.iter().any(|c| c.name == name) {
        return Err(Error::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    debug!(context = name, "Selected kubeconfig context");
    Ok(())
}

/// Load the kubeconfig for `target` with its context selected.
///
/// # Errors
///
/// Returns [`Error::Kubeconfig`] if the file cannot be read and
/// [`Error::ContextNotFound`] for an unknown context.
pub fn load(target: &KubeTarget) -> Result<Kubeconfig> {
    let path = target
        .kubeconfig
        .clone()
        .or_else(default_kubeconfig_path)
        .ok_or_else(|| Error::Kubeconfig("could not determine kubeconfig location".into()))?;

    let mut config = Kubeconfig::read_from(&path)
        .map_err(|e| Error::Kubeconfig(format!("failed to read {}: {e}", path.display())))?;
    select_context(&mut config, target.context.as_deref())?;
    Ok(config)
}

/// Client configuration for an already loaded kubeconfig.
///
/// # Errors
///
/// Returns [`Error::Kubeconfig`] if the selected context is incomplete.
pub async fn config_from(kubeconfig: Kubeconfig) -> Result<Config> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Kubeconfig(e.to_string()))
}

/// Build a client for `target`.
///
/// # Errors
///
/// Returns an error if the kubeconfig cannot be loaded or the client built.
pub async fn client_for(target: &KubeTarget) -> Result<Client> {
    let config = config_from(load(target)?).await?;
    info!(
        cluster = %config.cluster_url,
        namespace = %config.default_namespace,
        "Connecting to cluster"
    );
    Client::try_from(config).map_err(|e| Error::Kubeconfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KUBECONFIG: &str = r"
apiVersion: v1
kind: Config
current-context: kind-dev
clusters:
- name: kind-dev
  cluster:
    server: https://127.0.0.1:6443
- name: minikube
  cluster:
    server: https://minikube:8443
contexts:
- name: kind-dev
  context:
    cluster: kind-dev
    user: kind-dev
- name: minikube
  context:
    cluster: minikube
    user: minikube
    namespace: tools
users:
- name: kind-dev
  user: {}
- name: minikube
  user: {}
";

    fn parsed() -> Kubeconfig {
        Kubeconfig::from_yaml(KUBECONFIG).unwrap()
    }

    #[test]
    fn test_missing_context_is_reported() {
        let mut config = parsed();
        let err = select_context(&mut config, Some("does-not-exist")).unwrap_err();
        assert!(matches!(err, Error::ContextNotFound(ref c) if c == "does-not-exist"));
        assert_eq!(config.current_context.as_deref(), Some("kind-dev"));
    }

    #[test]
    fn test_empty_context_keeps_current() {
        let mut config = parsed();
        select_context(&mut config, Some("")).unwrap();
        assert_eq!(config.current_context.as_deref(), Some("kind-dev"));
        select_context(&mut config, None).unwrap();
        assert_eq!(config.current_context.as_deref(), Some("kind-dev"));
    }

    #[tokio::test]
    async fn test_selected_context_drives_client_config() {
        let mut config = parsed();
        select_context(&mut config, Some("minikube")).unwrap();
        let client_config = config_from(config).await.unwrap();
        assert_eq!(client_config.cluster_url.host(), Some("minikube"));
        assert_eq!(client_config.cluster_url.port_u16(), Some(8443));
        assert_eq!(client_config.default_namespace, "tools");
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, KUBECONFIG).unwrap();

        let target = KubeTarget {
            context: Some("minikube".into()),
            kubeconfig: Some(path),
        };
        let config = load(&target).unwrap();
        assert_eq!(config.current_context.as_deref(), Some("minikube"));
    }

    #[test]
    fn test_load_unreadable_file() {
        let target = KubeTarget {
            context: None,
            kubeconfig: Some(PathBuf::from("/nonexistent/kubeconfig")),
        };
        assert!(matches!(load(&target), Err(Error::Kubeconfig(_))));
    }

    #[test]
    #[serial]
    fn test_kubeconfig_env_wins() {
        let previous = std::env::var_os("KUBECONFIG");
        std::env::set_var("KUBECONFIG", "/tmp/pivot-test-kubeconfig");
        assert_eq!(
            default_kubeconfig_path(),
            Some(PathBuf::from("/tmp/pivot-test-kubeconfig"))
        );
        match previous {
            Some(v) => std::env::set_var("KUBECONFIG", v),
            None => std::env::remove_var("KUBECONFIG"),
        }
    }
}
