//! Pivot: bootstrap an empty Kubernetes cluster into a self-hosting GitOps
//! state.
//!
//! The pipeline builds a local Git tree of operator manifests, applies the
//! operators, stands up an in-cluster Git server, pushes the tree into it and
//! hands control to Argo CD.
//!
//! # Example
//!
//! ```ignore
//! use pivot::{BootstrapConfig, Bootstrapper, ClusterApplier};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BootstrapConfig { dry_run: true, ..BootstrapConfig::default() };
//!     let report = Bootstrapper::new(config, ClusterApplier::dry_run(), None).run().await?;
//!     println!("tree created: {}", report.tree_created);
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod apply;
pub mod compose;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod orchestrator;
pub mod release;
pub mod retry;
pub mod store;
pub mod synth;
pub mod tunnel;
pub mod ui;

// Re-export commonly used types at the crate root
pub use apply::{ApplyOutcome, ClusterApplier};
pub use config::BootstrapConfig;
pub use error::{Error, Result};
pub use orchestrator::{BootstrapReport, Bootstrapper};
pub use store::ManifestStore;
