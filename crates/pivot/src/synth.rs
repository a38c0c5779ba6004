//! In-memory construction of the Git server and CD bootstrap resources.
//!
//! Every synthesized object is returned for applying. Objects meant to land
//! in the manifest tree are also recorded in their [`ManifestGroup`];
//! Secrets never are.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::compose::Component;
use crate::error::{Error, Result};

/// Name of the Git server instance, organisation and repository.
pub const GITEA_INSTANCE: &str = "gitea";
/// Organisation and repository holding the manifest tree.
pub const INFRA: &str = "infra";
/// Namespace of the CD controller.
pub const ARGOCD_NAMESPACE: &str = "argocd";
/// In-cluster API endpoint used as Application destination.
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

/// Output buckets for synthesized objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestGroup {
    /// Git server, user, org and repo.
    Gitea,
    /// Bootstrap Application and ApplicationSet.
    ArgoCd,
}

impl ManifestGroup {
    fn label(self) -> &'static str {
        match self {
            Self::Gitea => "gitea",
            Self::ArgoCd => "argocd",
        }
    }
}

/// Inputs for the Git server resources.
#[derive(Debug, Clone)]
pub struct GiteaParams {
    pub user: String,
    pub password: String,
    /// External host name of the Git server.
    pub domain: String,
    /// Namespace the Git server runs in.
    pub namespace: String,
    /// Back the server with a Valkey cache.
    pub valkey: bool,
}

/// Inputs for the CD bootstrap resources.
#[derive(Debug, Clone)]
pub struct ArgoParams {
    pub user: String,
    pub password: String,
    /// Namespace the Git server runs in, used to build the in-cluster URL.
    pub gitea_namespace: String,
}

impl ArgoParams {
    /// In-cluster URL of the infra repository.
    #[must_use]
    pub fn repo_url(&self) -> String {
        format!(
            "https://{GITEA_INSTANCE}.{}.svc/{INFRA}/{INFRA}",
            self.gitea_namespace
        )
    }
}

/// Secret name holding the password of `user`.
#[must_use]
pub fn password_secret_name(user: &str) -> String {
    format!("{user}-password")
}

fn b64(value: &str) -> String {
    STANDARD.encode(value)
}

fn object(value: Value) -> Result<DynamicObject> {
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}

/// Builds synthesized resources and remembers what belongs in the tree.
#[derive(Debug, Default)]
pub struct Synthesizer {
    groups: BTreeMap<ManifestGroup, Vec<DynamicObject>>,
}

impl Synthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects currently recorded for `group`.
    #[must_use]
    pub fn group(&self, group: ManifestGroup) -> &[DynamicObject] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or_default()
    }

    /// Build the Git server, password Secret, user, org and repo.
    ///
    /// Returns them in apply order and resets the [`ManifestGroup::Gitea`]
    /// group to everything but the Secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if an object cannot be built.
    pub fn gitea(&mut self, params: &GiteaParams) -> Result<Vec<DynamicObject>> {
        let ns = params.namespace.as_str();
        let user = params.user.as_str();
        let secret_name = password_secret_name(user);

        let server = object(json!({
            "apiVersion": "hyperspike.io/v1",
            "kind": "Gitea",
            "metadata": { "name": GITEA_INSTANCE, "namespace": ns },
            "spec": {
                "tls": true,
                "valkey": params.valkey,
                "certIssuer": "selfsigned",
                "ingress": { "host": params.domain }
            }
        }))?;
        let secret = object(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": secret_name, "namespace": ns },
            "type": "Opaque",
            "data": { "password": b64(&params.password) }
        }))?;
        let gitea_user = object(json!({
            "apiVersion": "hyperspike.io/v1",
            "kind": "User",
            "metadata": { "name": user, "namespace": ns },
            "spec": {
                "email": format!("{user}@{}", params.domain),
                "password": { "name": secret_name, "key": "password" },
                "instance": { "name": GITEA_INSTANCE }
            }
        }))?;
        let org = object(json!({
            "apiVersion": "hyperspike.io/v1",
            "kind": "Org",
            "metadata": { "name": INFRA, "namespace": ns },
            "spec": {
                "description": "Infrastructure team",
                "instance": { "name": GITEA_INSTANCE },
                "teams": [{
                    "name": "admin",
                    "permission": "admin",
                    "includeAllRepos": true,
                    "createOrgRepo": true,
                    "members": [user]
                }]
            }
        }))?;
        let repo = object(json!({
            "apiVersion": "hyperspike.io/v1",
            "kind": "Repo",
            "metadata": { "name": INFRA, "namespace": ns },
            "spec": {
                "org": { "name": INFRA },
                "private": true
            }
        }))?;

        self.groups.insert(
            ManifestGroup::Gitea,
            vec![server.clone(), gitea_user.clone(), org.clone(), repo.clone()],
        );
        debug!(namespace = ns, user, "Synthesized git server resources");
        Ok(vec![server, secret, gitea_user, org, repo])
    }

    /// Build the repository Secret, the `init` Application and the `init`
    /// ApplicationSet.
    ///
    /// Resets the [`ManifestGroup::ArgoCd`] group to the Application and
    /// ApplicationSet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if an object cannot be built.
    pub fn argocd(&mut self, params: &ArgoParams) -> Result<Vec<DynamicObject>> {
        let repo_url = params.repo_url();

        let repo_secret = object(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": "infra-repo",
                "namespace": ARGOCD_NAMESPACE,
                "annotations": { "managed-by": "argocd.argoproj.io" },
                "labels": { "argocd.argoproj.io/secret-type": "repository" }
            },
            "type": "Opaque",
            "data": {
                "insecure": b64("true"),
                "name": b64(INFRA),
                "username": b64(&params.user),
                "password": b64(&params.password),
                "project": b64("default"),
                "type": b64("git"),
                "url": b64(&repo_url)
            }
        }))?;

        let application = object(json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {
                "name": "init",
                "namespace": ARGOCD_NAMESPACE,
                "labels": {
                    "app.kubernetes.io/managed-by": "argocd.argoproj.io",
                    "app.kubernetes.io/instance": "init"
                },
                "annotations": { "argocd.argoproj.io/manifest-generate-paths": "." }
            },
            "spec": application_spec(Component::Init.dir(), &repo_url)
        }))?;

        let elements: Vec<Value> = Component::ALL
            .iter()
            .map(|c| json!({ "path": c.dir() }))
            .collect();
        let application_set = object(json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "ApplicationSet",
            "metadata": { "name": "init", "namespace": ARGOCD_NAMESPACE },
            "spec": {
                "goTemplate": true,
                "goTemplateOptions": ["missingkey=error"],
                "generators": [{ "list": { "elements": elements } }],
                "template": {
                    "metadata": {
                        "name": "{{.path}}",
                        "labels": {
                            "app.kubernetes.io/managed-by": "argocd.argoproj.io",
                            "app.kubernetes.io/instance": "{{.path}}"
                        },
                        "annotations": { "argocd.argoproj.io/manifest-generate-paths": "." }
                    },
                    "spec": application_spec("{{.path}}", &repo_url)
                }
            }
        }))?;

        self.groups.insert(
            ManifestGroup::ArgoCd,
            vec![application.clone(), application_set.clone()],
        );
        debug!(repo_url = %repo_url, "Synthesized CD bootstrap resources");
        Ok(vec![repo_secret, application, application_set])
    }

    /// Write `group` to `path`, each object preceded by `---`.
    ///
    /// The file is rewritten, not appended to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyGroup`] if nothing was synthesized for `group`,
    /// or an IO error.
    pub fn write_group(&self, group: ManifestGroup, path: &Path) -> Result<()> {
        let objects = self.group(group);
        if objects.is_empty() {
            return Err(Error::EmptyGroup(group.label().to_string()));
        }

        let mut out = String::new();
        for object in objects {
            let yaml = serde_yaml::to_string(object)
                .map_err(|e| Error::parse(format!("{} group", group.label()), e))?;
            out.push_str("---\n");
            out.push_str(&yaml);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        file.write_all(out.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        info!(
            group = group.label(),
            path = %path.display(),
            count = objects.len(),
            "Wrote synthesized resources"
        );
        Ok(())
    }
}

fn application_spec(path: &str, repo_url: &str) -> Value {
    json!({
        "destination": { "namespace": ARGOCD_NAMESPACE, "server": IN_CLUSTER_SERVER },
        "project": "default",
        "source": { "path": path, "repoURL": repo_url, "targetRevision": "HEAD" },
        "syncPolicy": { "automated": {} }
    })
}
