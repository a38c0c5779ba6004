//! Bootstrap configuration.
//!
//! Built from command-line flags (each with an environment fallback) or from
//! [`BootstrapConfig::default`] in tests.

use std::path::PathBuf;

use rand::Rng;

use crate::tunnel::TunnelSpec;

/// Default external host of the Git server.
pub const DEFAULT_REMOTE: &str = "git.local.net";
/// Default Git server user.
pub const DEFAULT_USER: &str = "pivot";
/// Default Git server namespace.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default manifest tree location.
pub const DEFAULT_REPO_PATH: &str = "infra";
/// Default location of upstream checkouts.
pub const DEFAULT_SCRATCH_PATH: &str = ".pivot-upstream";

/// Length of generated passwords.
pub const PASSWORD_LEN: usize = 16;
const PASSWORD_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-";

/// Generate a password of [`PASSWORD_LEN`] characters from `[0-9A-Za-z-]`.
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// Everything a bootstrap run needs to know.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Manifest tree location.
    pub repo_path: PathBuf,
    /// Where upstream checkouts are made; outside the tree.
    pub scratch_path: PathBuf,
    /// External host of the Git server.
    pub remote: String,
    pub user: String,
    /// Git server password; generated when absent.
    pub password: Option<String>,
    /// Namespace the Git server is deployed to.
    pub namespace: String,
    /// Skip every cluster write, tunnel and push.
    pub dry_run: bool,
    /// Push straight to `remote` instead of through a pod tunnel.
    pub direct: bool,
    /// Back the Git server with Valkey.
    pub valkey: bool,
    /// Tunnel used to reach the Git server.
    pub tunnel: TunnelSpec,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from(DEFAULT_REPO_PATH),
            scratch_path: PathBuf::from(DEFAULT_SCRATCH_PATH),
            remote: DEFAULT_REMOTE.into(),
            user: DEFAULT_USER.into(),
            password: None,
            namespace: DEFAULT_NAMESPACE.into(),
            dry_run: false,
            direct: false,
            valkey: false,
            tunnel: TunnelSpec::default(),
        }
    }
}

impl BootstrapConfig {
    /// URL of the repository through the configured tunnel port.
    #[must_use]
    pub fn local_repo_url(&self) -> String {
        self.local_repo_url_on(self.tunnel.local_port)
    }

    /// URL of the repository through a tunnel bound to `port`.
    #[must_use]
    pub fn local_repo_url_on(&self, port: u16) -> String {
        format!("https://localhost:{port}/infra/infra.git")
    }

    /// URL of the repository at its external host.
    #[must_use]
    pub fn origin_repo_url(&self) -> String {
        format!("https://{}/infra/infra.git", self.remote)
    }

    /// Health endpoint through a tunnel bound to `port`.
    #[must_use]
    pub fn local_health_url(&self, port: u16) -> String {
        format!("https://localhost:{port}/api/healthz")
    }

    /// Health endpoint at the external host.
    #[must_use]
    pub fn remote_health_url(&self) -> String {
        format!("https://{}/api/healthz", self.remote)
    }

    /// Remote the pipeline pushes to.
    #[must_use]
    pub fn push_remote(&self) -> &'static str {
        if self.direct {
            "origin"
        } else {
            "local"
        }
    }
}
