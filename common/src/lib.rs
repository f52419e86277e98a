use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Elapsed wait error: {0}")]
    Elapsed(#[from] tokio::time::error::Elapsed),

    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Url parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("{0} query failed: {1} {2}")]
    MethodFailed(String, u16, String),

    #[error("UTF8 error {0}")]
    UTF8(#[from] std::string::FromUtf8Error),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("No supported cluster backend found on this host (tried: kind, minikube)")]
    NoBackendAvailable,

    #[error("Cluster provisioning failed: {0}")]
    ClusterProvisionFailed(String),

    #[error("Registry bridge failed: {0}")]
    RegistryBridgeFailed(String),

    #[error("Manifest apply failed for {resource}: {reason}")]
    ManifestApplyFailed { resource: String, reason: String },

    #[error("Health check failed for {0}: {1}")]
    HealthCheckFailed(String, String),

    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// True when the deploy flow may keep going past this error on explicit
    /// operator request. Everything else aborts the remaining stages.
    pub fn is_continuable(&self) -> bool {
        matches!(self, Error::RegistryBridgeFailed(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod backend;
pub mod cluster;
pub mod health;
pub mod httphandler;
pub mod manifests;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod shellhandler;
pub mod shellmock;
pub mod workload;

/// Field manager name used for server-side apply.
pub static MANAGER: &str = "agent.kindling.dev";

/// Fixed wiring between the host, the registry container and the cluster.
/// The kind node maps HTTP_HOST_PORT to the workload service NodePort, and
/// containerd inside the node mirrors localhost:REGISTRY_HOST_PORT to the
/// registry container over the cluster network.
pub static REGISTRY_NAME: &str = "kind-registry";
pub const REGISTRY_HOST_PORT: u16 = 5001;
pub const REGISTRY_INTERNAL_PORT: u16 = 5000;
pub static KIND_NETWORK: &str = "kind";
pub const HTTP_HOST_PORT: u16 = 8080;
pub const SERVICE_NODE_PORT: u16 = 30080;
