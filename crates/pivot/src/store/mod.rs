//! The manifest tree: one Git working copy holding every component.
//!
//! Every mutation writes its file(s) and commits them as a single step, so an
//! interrupted run leaves a valid repository with a readable history.

pub mod kustomization;

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    AutotagOption, CertificateCheckStatus, Cred, ErrorClass, ErrorCode, FetchOptions, Oid,
    PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions, Signature,
};
use tracing::{debug, info, warn};

use crate::error::{Error, PushFailure, Result};
use crate::release;

pub use kustomization::{namespace_manifest, Kustomization, KUSTOMIZATION_FILE, NAMESPACE_FILE};

/// Author name on every commit.
pub const AUTHOR_NAME: &str = "Pivot GitOps";
/// Author email on every commit.
pub const AUTHOR_EMAIL: &str = "pivot@hyperspike.io";
/// Default branch of the tree.
pub const DEFAULT_BRANCH: &str = "main";

const README: &str = "README.md";
const README_CONTENT: &str = "# Pivot GitOps";

/// Check whether `path` already holds a Git repository.
#[must_use]
pub fn repo_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Shallow-clone a single tag into `dest`.
///
/// Does nothing when `dest` already holds a repository. A failed clone
/// removes what it created so the next run starts clean.
///
/// # Errors
///
/// Returns [`Error::Git`] if the fetch or checkout fails.
pub fn clone_tag(url: &str, dest: &Path, tag: &str) -> Result<()> {
    if repo_exists(dest) {
        info!(dest = %dest.display(), tag, "Already cloned, skipping");
        return Ok(());
    }

    info!(url, dest = %dest.display(), tag, "Cloning tag");
    let created = !dest.exists();
    let result = shallow_fetch_tag(url, dest, tag);
    if result.is_err() && created {
        if let Err(e) = std::fs::remove_dir_all(dest) {
            warn!(dest = %dest.display(), error = %e, "Failed to clean up partial clone");
        }
    }
    result
}

fn shallow_fetch_tag(url: &str, dest: &Path, tag: &str) -> Result<()> {
    let repo = Repository::init(dest).map_err(|e| Error::git("init", e))?;
    let mut remote = repo
        .remote("origin", url)
        .map_err(|e| Error::git("remote add", e))?;

    let tag_ref = format!("refs/tags/{tag}");
    let refspec = format!("+{tag_ref}:{tag_ref}");
    let mut fetch = FetchOptions::new();
    fetch.depth(1).download_tags(AutotagOption::None);
    remote
        .fetch(&[refspec.as_str()], Some(&mut fetch), None)
        .map_err(|e| Error::git("fetch", e))?;

    let commit = repo
        .find_reference(&tag_ref)
        .and_then(|r| r.peel_to_commit())
        .map_err(|e| Error::git("resolve tag", e))?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
        .map_err(|e| Error::git("checkout", e))?;
    repo.set_head_detached(commit.id())
        .map_err(|e| Error::git("set head", e))?;
    Ok(())
}

fn classify_push_error(e: &git2::Error) -> PushFailure {
    if e.code() == ErrorCode::Auth {
        return PushFailure::Auth;
    }
    match e.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Os => {
            PushFailure::Network
        }
        _ if e.code() == ErrorCode::Certificate => PushFailure::Network,
        _ => PushFailure::Rejected,
    }
}

/// A Git working copy that owns the manifest tree.
pub struct ManifestStore {
    root: PathBuf,
    repo: Repository,
    http: reqwest::Client,
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ManifestStore {
    /// Create a new working copy at `path` with a README as first commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if a repository is already present.
    pub fn initialize(path: impl Into<PathBuf>) -> Result<Self> {
        let root = path.into();
        if repo_exists(&root) {
            return Err(Error::AlreadyExists(root));
        }

        std::fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(DEFAULT_BRANCH);
        let repo = Repository::init_opts(&root, &opts).map_err(|e| Error::git("init", e))?;
        info!(path = %root.display(), "Initialized manifest tree");

        let store = Self {
            root,
            repo,
            http: release::http_client()?,
        };
        store.write_file(README, README_CONTENT.as_bytes())?;
        store.stage(Path::new(README))?;
        store.commit("Initial commit")?;
        Ok(store)
    }

    /// Open an existing working copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] if `path` is not a repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let root = path.into();
        let repo = Repository::open(&root).map_err(|e| Error::git("open", e))?;
        debug!(path = %root.display(), "Opened manifest tree");
        Ok(Self {
            root,
            repo,
            http: release::http_client()?,
        })
    }

    /// Root of the working copy.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` under the tree root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathEscapesTree`] for empty or absolute paths and for
    /// paths containing `..`.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(normalize(relative.as_ref())?))
    }

    /// Download `url` into `relative_path` and commit it.
    ///
    /// The download completes before anything touches the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] if the download fails, leaving the tree as it
    /// was.
    pub async fn add_fetched_content(
        &self,
        url: &str,
        relative_path: &str,
        message: &str,
    ) -> Result<()> {
        let relative = normalize(Path::new(relative_path))?;
        let fetch_err = |source| Error::Fetch {
            url: url.to_string(),
            source,
        };

        debug!(url, path = relative_path, "Downloading manifest");
        let body = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?
            .bytes()
            .await
            .map_err(fetch_err)?;

        self.write_file(&relative, &body)?;
        info!(url, path = relative_path, bytes = body.len(), "Added file");
        self.stage(&relative)?;
        self.commit(message)?;
        Ok(())
    }

    /// Commit a file another component has already written into the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is outside the tree or cannot be staged.
    pub fn add_synthesized_content(&self, relative_path: &str, message: &str) -> Result<()> {
        let relative = normalize(Path::new(relative_path))?;
        self.stage(&relative)?;
        self.commit(message)?;
        Ok(())
    }

    /// Concatenate `sources` into `dest_path`, each preceded by `separator`.
    ///
    /// Sources may live anywhere; the destination must be inside the tree and
    /// is rewritten from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result not written.
    pub fn concatenate<P: AsRef<Path>>(
        &self,
        sources: &[P],
        dest_path: &str,
        separator: &str,
        message: &str,
    ) -> Result<()> {
        let relative = normalize(Path::new(dest_path))?;
        let mut out = Vec::new();
        for source in sources {
            let source = source.as_ref();
            let body = std::fs::read(source).map_err(|e| Error::io(source, e))?;
            out.extend_from_slice(separator.as_bytes());
            out.extend_from_slice(&body);
        }

        self.write_file(&relative, &out)?;
        info!(path = dest_path, sources = sources.len(), "Concatenated manifests");
        self.stage(&relative)?;
        self.commit(message)?;
        Ok(())
    }

    /// Write `namespace.yaml` for `component` and commit it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or committed.
    pub fn synthesize_namespace(&self, component: &str, message: &str) -> Result<()> {
        let relative = normalize(&Path::new(component).join(NAMESPACE_FILE))?;
        self.write_file(&relative, namespace_manifest(component).as_bytes())?;
        self.stage(&relative)?;
        self.commit(message)?;
        Ok(())
    }

    /// Regenerate `kustomization.yaml` for `component` and commit it.
    ///
    /// The target namespace is `namespace_override` or, when absent, the
    /// component name.
    ///
    /// # Errors
    ///
    /// Returns an error if the component cannot be listed or the descriptor
    /// written.
    pub fn synthesize_kustomization(
        &self,
        component: &str,
        namespace_override: Option<&str>,
        message: &str,
    ) -> Result<()> {
        let dir = normalize(Path::new(component))?;
        let abs_dir = self.root.join(&dir);
        let kustomization =
            Kustomization::for_component(&abs_dir, namespace_override.unwrap_or(component))
                .map_err(|e| Error::io(&abs_dir, e))?;
        let yaml = kustomization
            .to_yaml()
            .map_err(|e| Error::parse("kustomization", e))?;

        let relative = dir.join(KUSTOMIZATION_FILE);
        self.write_file(&relative, yaml.as_bytes())?;
        debug!(component, resources = ?kustomization.resources, "Generated kustomization");
        self.stage(&relative)?;
        self.commit(message)?;
        Ok(())
    }

    /// Bind `name` to `url`, replacing an existing binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Git`] if the remote cannot be written.
    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        if self.repo.find_remote(name).is_ok() {
            self.repo
                .remote_set_url(name, url)
                .map_err(|e| Error::git("remote set-url", e))?;
        } else {
            self.repo
                .remote(name, url)
                .map_err(|e| Error::git("remote add", e))?;
        }
        info!(remote = name, url, "Bound remote");
        Ok(())
    }

    /// URL bound to `name`, if any.
    #[must_use]
    pub fn remote_url(&self, name: &str) -> Option<String> {
        self.repo
            .find_remote(name)
            .ok()
            .and_then(|r| r.url().map(ToString::to_string))
    }

    /// Push the default branch to `remote` with HTTP Basic credentials.
    ///
    /// Server certificates are not verified: the target is a freshly
    /// self-signed in-cluster service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Push`] classified as auth, network or rejection.
    pub fn push(&self, remote_name: &str, username: &str, password: &str) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .map_err(|e| Error::git("find remote", e))?;
        info!(remote = remote_name, url = remote.url().unwrap_or_default(), "Pushing");

        let push_err = |reason, message: String| Error::Push {
            remote: remote_name.to_string(),
            reason,
            message,
        };

        let asked_for_credentials = Cell::new(false);
        let rejected = RefCell::new(None::<String>);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, _username_from_url, _allowed| {
            if asked_for_credentials.replace(true) {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Callback,
                    "credentials rejected",
                ));
            }
            Cred::userpass_plaintext(username, password)
        });
        callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejected.borrow_mut() = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });

        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{DEFAULT_BRANCH}:refs/heads/{DEFAULT_BRANCH}");
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(|e| push_err(classify_push_error(&e), e.message().to_string()))?;
        drop(opts);

        if let Some(message) = rejected.into_inner() {
            return Err(push_err(PushFailure::Rejected, message));
        }
        info!(remote = remote_name, "Push complete");
        Ok(())
    }

    /// Whether `relative` is part of the last commit.
    #[must_use]
    pub fn is_committed(&self, relative: impl AsRef<Path>) -> bool {
        let Ok(relative) = normalize(relative.as_ref()) else {
            return false;
        };
        self.repo
            .head()
            .and_then(|h| h.peel_to_tree())
            .and_then(|tree| tree.get_path(&relative))
            .is_ok()
    }

    /// Commit id at the tip of the default branch.
    #[must_use]
    pub fn head(&self) -> Option<Oid> {
        self.repo.head().ok().and_then(|h| h.target())
    }

    fn write_file(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
        let path = self.root.join(relative.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut file = std::fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
        file.write_all(contents).map_err(|e| Error::io(&path, e))?;
        file.sync_all().map_err(|e| Error::io(&path, e))
    }

    fn stage(&self, relative: &Path) -> Result<()> {
        let mut index = self.repo.index().map_err(|e| Error::git("index", e))?;
        index
            .add_path(relative)
            .map_err(|e| Error::git("add", e))?;
        index.write().map_err(|e| Error::git("index write", e))
    }

    /// Commit the index. Returns `None` when nothing changed since HEAD.
    fn commit(&self, message: &str) -> Result<Option<Oid>> {
        let mut index = self.repo.index().map_err(|e| Error::git("index", e))?;
        let tree_id = index.write_tree().map_err(|e| Error::git("write tree", e))?;
        let tree = self
            .repo
            .find_tree(tree_id)
            .map_err(|e| Error::git("find tree", e))?;

        let parent = match self.repo.head() {
            Ok(head) => Some(
                head.peel_to_commit()
                    .map_err(|e| Error::git("resolve head", e))?,
            ),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(Error::git("resolve head", e)),
        };

        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            info!(message, "Nothing changed, skipping commit");
            return Ok(None);
        }

        let signature =
            Signature::now(AUTHOR_NAME, AUTHOR_EMAIL).map_err(|e| Error::git("signature", e))?;
        let parents: Vec<_> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(|e| Error::git("commit", e))?;
        info!(message, commit = %oid, "Committed");
        Ok(Some(oid))
    }
}

/// Reduce `path` to its normal components, rejecting anything that could
/// leave the tree.
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathEscapesTree(path.to_path_buf()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::PathEscapesTree(path.to_path_buf()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn commit_count(store: &ManifestStore) -> usize {
        let mut walk = store.repo.revwalk().unwrap();
        walk.push_head().unwrap();
        walk.count()
    }

    fn head_files(store: &ManifestStore) -> Vec<String> {
        let tree = store.repo.head().unwrap().peel_to_tree().unwrap();
        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                files.push(format!("{dir}{}", entry.name().unwrap()));
            }
            git2::TreeWalkResult::Ok
        })
        .unwrap();
        files.sort();
        files
    }

    #[test]
    fn test_initialize_commits_only_readme() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();

        assert_eq!(commit_count(&store), 1);
        assert_eq!(head_files(&store), vec!["README.md"]);

        let head = store.repo.head().unwrap();
        assert_eq!(head.shorthand(), Some(DEFAULT_BRANCH));
        let commit = head.peel_to_commit().unwrap();
        assert_eq!(commit.message(), Some("Initial commit"));
        assert_eq!(commit.author().name(), Some(AUTHOR_NAME));
        assert_eq!(commit.author().email(), Some(AUTHOR_EMAIL));
    }

    #[test]
    fn test_initialize_refuses_existing_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("infra");
        ManifestStore::initialize(&path).unwrap();

        let err = ManifestStore::initialize(&path).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert!(ManifestStore::open(&path).is_ok());
    }

    #[test]
    fn test_resolve_rejects_paths_leaving_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();

        assert!(store.resolve("gitea/gitea.yaml").is_ok());
        assert_eq!(
            store.resolve("./gitea/gitea.yaml").unwrap(),
            store.root().join("gitea/gitea.yaml")
        );
        for bad in ["../escape.yaml", "gitea/../../x", "/etc/passwd", ""] {
            assert!(
                matches!(store.resolve(bad), Err(Error::PathEscapesTree(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_add_fetched_content_commits_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/install.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("kind: Deployment\n"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        store
            .add_fetched_content(
                &format!("{}/install.yaml", server.uri()),
                "gitea-operator/gitea-operator.yaml",
                "adding gitea-operator",
            )
            .await
            .unwrap();

        assert_eq!(commit_count(&store), 2);
        assert_eq!(
            std::fs::read_to_string(store.root().join("gitea-operator/gitea-operator.yaml"))
                .unwrap(),
            "kind: Deployment\n"
        );
        assert!(head_files(&store).contains(&"gitea-operator/gitea-operator.yaml".to_string()));
    }

    #[tokio::test]
    async fn test_add_fetched_content_unreachable_leaves_tree_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        let head_before = store.head();

        let err = store
            .add_fetched_content(
                "http://127.0.0.1:1/install.yaml",
                "argocd/argocd.yaml",
                "adding argo-cd",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch { .. }));
        assert!(!store.root().join("argocd").exists());
        assert_eq!(store.head(), head_before);
        assert_eq!(commit_count(&store), 1);
    }

    #[tokio::test]
    async fn test_add_fetched_content_http_error_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        let err = store
            .add_fetched_content(&server.uri(), "x/x.yaml", "adding x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(!store.root().join("x/x.yaml").exists());
    }

    #[test]
    fn test_concatenate_prefixes_each_source() {
        let tmp = tempfile::tempdir().unwrap();
        let upstream = tmp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        std::fs::write(upstream.join("a.yaml"), "kind: ConfigMap\n").unwrap();
        std::fs::write(upstream.join("b.yaml"), "kind: Service\n").unwrap();

        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        let sources = [upstream.join("a.yaml"), upstream.join("b.yaml")];
        store
            .concatenate(
                &sources,
                "postgres-operator/postgres-operator.yaml",
                "---\n",
                "adding postgres-operator",
            )
            .unwrap();
        // Rewriting yields the same content and no new commit.
        store
            .concatenate(
                &sources,
                "postgres-operator/postgres-operator.yaml",
                "---\n",
                "adding postgres-operator",
            )
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(store.root().join("postgres-operator/postgres-operator.yaml"))
                .unwrap(),
            "---\nkind: ConfigMap\n---\nkind: Service\n"
        );
        assert_eq!(commit_count(&store), 2);
    }

    #[test]
    fn test_concatenate_missing_source_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        let err = store
            .concatenate(&[tmp.path().join("missing.yaml")], "x/x.yaml", "---\n", "x")
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_component_descriptors_are_committed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        std::fs::create_dir_all(store.root().join("argocd")).unwrap();
        std::fs::write(store.root().join("argocd/argocd.yaml"), "kind: Service\n").unwrap();
        store
            .add_synthesized_content("argocd/argocd.yaml", "adding argo-cd")
            .unwrap();
        store
            .synthesize_namespace("argocd", "adding argo-cd namespace")
            .unwrap();
        store
            .synthesize_kustomization("argocd", None, "adding argo-cd kustomization")
            .unwrap();

        let kustomization: Kustomization = serde_yaml::from_str(
            &std::fs::read_to_string(store.root().join("argocd/kustomization.yaml")).unwrap(),
        )
        .unwrap();
        assert_eq!(kustomization.namespace.as_deref(), Some("argocd"));
        assert_eq!(kustomization.resources, vec!["namespace.yaml", "argocd.yaml"]);
        assert_eq!(commit_count(&store), 4);
        assert_eq!(
            head_files(&store),
            vec![
                "README.md",
                "argocd/argocd.yaml",
                "argocd/kustomization.yaml",
                "argocd/namespace.yaml"
            ]
        );
    }

    #[test]
    fn test_kustomization_regeneration_does_not_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        std::fs::create_dir_all(store.root().join("gitea")).unwrap();
        std::fs::write(store.root().join("gitea/gitea.yaml"), "---\n").unwrap();

        store
            .synthesize_kustomization("gitea", Some("default"), "adding gitea kustomization")
            .unwrap();
        store
            .synthesize_kustomization("gitea", Some("default"), "adding gitea kustomization")
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(store.root().join("gitea/kustomization.yaml")).unwrap(),
            "namespace: default\nresources:\n- gitea.yaml\n"
        );
    }

    #[test]
    fn test_is_committed_tracks_head() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        std::fs::create_dir_all(store.root().join("gitea")).unwrap();
        std::fs::write(store.root().join("gitea/gitea.yaml"), "---\n").unwrap();

        assert!(store.is_committed("README.md"));
        assert!(!store.is_committed("gitea/gitea.yaml"));
        store
            .add_synthesized_content("gitea/gitea.yaml", "adding gitea")
            .unwrap();
        assert!(store.is_committed("gitea/gitea.yaml"));
        assert!(!store.is_committed("../gitea/gitea.yaml"));
    }

    #[test]
    fn test_add_remote_replaces_existing_binding() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();

        store.add_remote("origin", "https://git.local.net/infra/infra.git").unwrap();
        store.add_remote("origin", "https://git.example.com/infra/infra.git").unwrap();

        assert_eq!(
            store.remote_url("origin").as_deref(),
            Some("https://git.example.com/infra/infra.git")
        );
        assert_eq!(store.repo.remotes().unwrap().len(), 1);
    }

    #[test]
    fn test_push_to_local_bare_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let bare_path = tmp.path().join("remote.git");
        let bare = Repository::init_bare(&bare_path).unwrap();

        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        store
            .add_remote("local", bare_path.to_str().unwrap())
            .unwrap();
        store.push("local", "pivot", "secret").unwrap();

        let pushed = bare
            .find_reference("refs/heads/main")
            .unwrap()
            .target()
            .unwrap();
        assert_eq!(Some(pushed), store.head());
    }

    #[test]
    fn test_push_to_unknown_remote_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::initialize(tmp.path().join("infra")).unwrap();
        assert!(store.push("nowhere", "pivot", "secret").is_err());
    }

    #[test]
    fn test_clone_tag_is_noop_for_existing_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("postgres-operator");
        Repository::init(&dest).unwrap();
        std::fs::write(dest.join("marker"), "keep").unwrap();

        clone_tag("https://invalid.invalid/nothing.git", &dest, "v0.0.0").unwrap();
        clone_tag("https://invalid.invalid/nothing.git", &dest, "v0.0.0").unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("marker")).unwrap(), "keep");
    }

    #[test]
    fn test_failed_clone_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("postgres-operator");
        let missing = tmp.path().join("no-such-source");

        let err = clone_tag(missing.to_str().unwrap(), &dest, "v1.0.0").unwrap_err();
        assert!(matches!(err, Error::Git { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_classify_push_errors() {
        let auth = git2::Error::new(ErrorCode::Auth, ErrorClass::Callback, "nope");
        assert_eq!(classify_push_error(&auth), PushFailure::Auth);
        let net = git2::Error::new(ErrorCode::GenericError, ErrorClass::Net, "refused");
        assert_eq!(classify_push_error(&net), PushFailure::Network);
        let other = git2::Error::new(ErrorCode::NotFastForward, ErrorClass::Reference, "nff");
        assert_eq!(classify_push_error(&other), PushFailure::Rejected);
    }
}
