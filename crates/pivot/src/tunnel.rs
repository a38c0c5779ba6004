//! Local listener bridged to a pod port.
//!
//! [`Tunnel::spawn`] starts a background task that waits for the pod to be
//! `Running`, binds `127.0.0.1:<local_port>` and forwards every accepted
//! connection over its own port-forward stream. The caller observes and stops
//! it through a [`TunnelHandle`].

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::retry::{retry_fixed, RetryBudget};

/// Pod name forwarded by default.
pub const DEFAULT_POD: &str = "gitea-0";
/// Pod namespace forwarded by default.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Port forwarded by default, both in the pod and locally.
pub const DEFAULT_PORT: u16 = 3000;

const RUNNING: &str = "Running";

/// A byte stream into a pod port.
pub trait PodStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PodStream for T {}

/// Cluster calls the tunnel needs.
#[async_trait]
pub trait PodGateway: Send + Sync {
    /// Current phase of the pod, `None` if it does not exist yet.
    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<Option<String>>;

    /// Open a fresh stream to `port` inside the pod.
    async fn open_stream(&self, namespace: &str, name: &str, port: u16)
        -> Result<Box<dyn PodStream>>;
}

/// [`PodGateway`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePods {
    client: Client,
}

impl KubePods {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodGateway for KubePods {
    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get_opt(name).await.map_err(|source| Error::Kube {
            operation: format!("get pod {namespace}/{name}"),
            source,
        })?;
        Ok(pod.and_then(|p| p.status).and_then(|s| s.phase))
    }

    async fn open_stream(
        &self,
        namespace: &str,
        name: &str,
        port: u16,
    ) -> Result<Box<dyn PodStream>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut forwarder = pods
            .portforward(name, &[port])
            .await
            .map_err(|source| Error::Kube {
                operation: format!("portforward {namespace}/{name}:{port}"),
                source,
            })?;
        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| Error::Tunnel(format!("no stream for port {port}")))?;

        let pod = format!("{namespace}/{name}");
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!(pod = %pod, error = %e, "Port-forward ended with error");
            }
        });
        Ok(Box::new(stream))
    }
}

/// What to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub namespace: String,
    pub pod: String,
    pub pod_port: u16,
    /// Local port on 127.0.0.1; 0 picks a free one.
    pub local_port: u16,
    /// Budget for the pod to reach `Running`.
    pub budget: RetryBudget,
}

impl Default for TunnelSpec {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            pod: DEFAULT_POD.into(),
            pod_port: DEFAULT_PORT,
            local_port: DEFAULT_PORT,
            budget: RetryBudget::pod_ready(),
        }
    }
}

/// Lifecycle of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    WaitingForPod,
    Tunneling { local_addr: SocketAddr },
    Closed { error: Option<String> },
}

/// Starts tunnels.
pub struct Tunnel;

impl Tunnel {
    /// Start forwarding in the background.
    #[must_use]
    pub fn spawn(gateway: Arc<dyn PodGateway>, spec: TunnelSpec) -> TunnelHandle {
        let (tx, rx) = watch::channel(TunnelState::WaitingForPod);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(gateway, spec, tx, cancel.clone()));
        TunnelHandle {
            state: rx,
            cancel,
            task,
        }
    }
}

/// Observes and stops a running tunnel. Not reusable once closed.
pub struct TunnelHandle {
    state: watch::Receiver<TunnelState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    /// Wait until the listener is bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tunnel`] carrying the reason the tunnel closed.
    pub async fn wait_ready(&mut self) -> Result<SocketAddr> {
        let state = self
            .state
            .wait_for(|s| !matches!(s, TunnelState::WaitingForPod))
            .await
            .map_err(|_| Error::Tunnel("tunnel task exited".into()))?
            .clone();
        match state {
            TunnelState::Tunneling { local_addr } => Ok(local_addr),
            TunnelState::Closed { error: Some(e) } => Err(Error::Tunnel(e)),
            TunnelState::Closed { error: None } | TunnelState::WaitingForPod => {
                Err(Error::Tunnel("tunnel closed".into()))
            }
        }
    }

    /// Wait until the tunnel closes on its own and return its error, if any.
    pub async fn closed(&mut self) -> Option<String> {
        let state = self
            .state
            .wait_for(|s| matches!(s, TunnelState::Closed { .. }))
            .await
            .ok()?;
        match &*state {
            TunnelState::Closed { error } => error.clone(),
            _ => None,
        }
    }

    /// Signal the tunnel to stop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Tunnel task did not finish cleanly");
        }
    }
}

async fn run(
    gateway: Arc<dyn PodGateway>,
    spec: TunnelSpec,
    state: watch::Sender<TunnelState>,
    cancel: CancellationToken,
) {
    let result = tokio::select! {
        () = cancel.cancelled() => Ok(()),
        r = serve(gateway, &spec, &state, &cancel) => r,
    };
    let error = match result {
        Ok(()) => None,
        Err(e) => {
            warn!(pod = %spec.pod, error = %e, "Tunnel closed with error");
            Some(e.to_string())
        }
    };
    state.send_replace(TunnelState::Closed { error });
    info!(pod = %spec.pod, "Tunnel closed");
}

async fn serve(
    gateway: Arc<dyn PodGateway>,
    spec: &TunnelSpec,
    state: &watch::Sender<TunnelState>,
    cancel: &CancellationToken,
) -> Result<()> {
    wait_for_pod(gateway.as_ref(), spec).await?;

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, spec.local_port))
        .await
        .map_err(|e| Error::Tunnel(format!("failed to bind 127.0.0.1:{}: {e}", spec.local_port)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::Tunnel(e.to_string()))?;
    info!(
        local = %local_addr,
        pod = %spec.pod,
        namespace = %spec.namespace,
        port = spec.pod_port,
        "Forwarding"
    );
    state.send_replace(TunnelState::Tunneling { local_addr });

    loop {
        let (conn, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::Tunnel(format!("accept failed: {e}")))?;
        debug!(peer = %peer, "Accepted connection");
        let gateway = gateway.clone();
        let spec = spec.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                r = bridge(gateway.as_ref(), &spec, conn) => {
                    if let Err(e) = r {
                        warn!(peer = %peer, error = %e, "Forwarded connection failed");
                    }
                }
            }
        });
    }
}

async fn wait_for_pod(gateway: &dyn PodGateway, spec: &TunnelSpec) -> Result<()> {
    info!(pod = %spec.pod, namespace = %spec.namespace, "Waiting for pod to run");
    retry_fixed(&spec.budget, "pod readiness", || async move {
        match gateway.pod_phase(&spec.namespace, &spec.pod).await {
            Ok(Some(phase)) if phase == RUNNING => Ok(()),
            Ok(Some(phase)) => Err(phase),
            Ok(None) => Err(String::from("NotFound")),
            Err(e) => Err(e.to_string()),
        }
    })
    .await
    .map_err(|exhausted| Error::PodNotReady {
        namespace: spec.namespace.clone(),
        name: spec.pod.clone(),
        attempts: exhausted.attempts,
        phase: exhausted.last_error,
    })
}

async fn bridge(gateway: &dyn PodGateway, spec: &TunnelSpec, mut conn: TcpStream) -> Result<()> {
    let mut upstream = gateway
        .open_stream(&spec.namespace, &spec.pod, spec.pod_port)
        .await?;
    let (sent, received) = tokio::io::copy_bidirectional(&mut conn, &mut upstream)
        .await
        .map_err(|e| Error::Tunnel(e.to_string()))?;
    debug!(sent, received, "Connection closed");
    Ok(())
}
