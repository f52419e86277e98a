use crate::{shellhandler::CommandRunner, Error, Result};
use serde::{Deserialize, Serialize};

/// Which local cluster tool drives this run. Fixed once selected; the
/// handle's kind is never switched mid-run.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// kind: Kubernetes nodes as containers on the local docker daemon.
    Kind,
    /// minikube: a full VM as the cluster's single node.
    Minikube,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BackendKind::Kind => write!(f, "kind"),
            BackendKind::Minikube => write!(f, "minikube"),
        }
    }
}

/// Identity of a provisioned cluster. Created by the provisioner, consulted
/// (never mutated) by every later stage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHandle {
    pub name: String,
    pub backend: BackendKind,
    /// true when the cluster predated this run
    pub existed: bool,
    /// container network the nodes sit on; None for the VM backend
    pub network: Option<String>,
}

/// Pure detection of the available backend, in fixed preference order:
/// kind first, minikube second. No side effect on the host.
pub fn detect<R: CommandRunner>(runner: &R) -> Result<BackendKind> {
    if runner
        .run("kind", &["version"])
        .map(|o| o.success)
        .unwrap_or(false)
    {
        tracing::info!("selected backend: kind");
        return Ok(BackendKind::Kind);
    }
    if runner
        .run("minikube", &["version"])
        .map(|o| o.success)
        .unwrap_or(false)
    {
        tracing::info!("selected backend: minikube");
        return Ok(BackendKind::Minikube);
    }
    Err(Error::NoBackendAvailable)
}
