//! Mock Kubernetes API server for testing.
//!
//! Serves discovery, version and a small in-memory object store over HTTP so
//! real kubeconfig-based clients can talk to it.

pub mod discovery;
pub mod http;
mod store;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
