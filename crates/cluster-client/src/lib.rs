//! Cluster Client
//!
//! Dynamic access to the Kubernetes object store for the hyperconverged
//! engine. Every managed child is handled as a `DynamicObject` addressed by
//! its GroupVersionKind, which lets one client serve core kinds, sibling
//! operator CRs and platform kinds that may not even be installed.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient};
//! use kube::api::GroupVersionKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let gvk = GroupVersionKind::gvk("kubevirt.io", "v1", "KubeVirt");
//! if client.has_api(&gvk).await? {
//!     let kv = client.get(&gvk, Some("kubevirt-hyperconverged"), "kubevirt-kubevirt-hyperconverged").await?;
//!     println!("found: {}", kv.is_some());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod typed;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClient;
pub use error::ClientError;
pub use typed::{api_version, from_dynamic, get_typed, gvk_of, list_typed, to_dynamic, update_status_typed, update_typed};
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockFailure, MockOp};
