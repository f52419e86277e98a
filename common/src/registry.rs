use crate::{
    backend::{BackendKind, ClusterHandle},
    shellhandler::CommandRunner,
    Error, Result, REGISTRY_HOST_PORT, REGISTRY_INTERNAL_PORT, REGISTRY_NAME,
};
use serde::{Deserialize, Serialize};

/// State of the registry container relative to the cluster network.
/// Attachment is monotonic: once attached, further bridge calls are no-ops.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryBinding {
    pub container: String,
    pub network: Option<String>,
    pub running: bool,
    pub attached: bool,
}

fn registry_running<R: CommandRunner>(runner: &R) -> Result<bool> {
    // docker inspect fails when the container does not exist at all
    let out = runner.run(
        "docker",
        &["inspect", "-f", "{{.State.Running}}", REGISTRY_NAME],
    )?;
    Ok(out.success && out.stdout.trim() == "true")
}

fn start_registry<R: CommandRunner>(runner: &R) -> Result<()> {
    tracing::info!("starting registry container '{REGISTRY_NAME}'");
    let publish = format!("127.0.0.1:{REGISTRY_HOST_PORT}:{REGISTRY_INTERNAL_PORT}");
    let out = runner.run(
        "docker",
        &[
            "run",
            "-d",
            "--restart=always",
            "-p",
            &publish,
            "--name",
            REGISTRY_NAME,
            "registry:2",
        ],
    )?;
    if !out.success {
        return Err(Error::RegistryBridgeFailed(out.failure_text("docker run")));
    }
    Ok(())
}

fn connect_network<R: CommandRunner>(runner: &R, network: &str) -> Result<()> {
    let out = runner.run("docker", &["network", "connect", network, REGISTRY_NAME])?;
    if out.success {
        return Ok(());
    }
    // the runtime reports re-attachment as an error; for us it is success
    if out.stderr.contains("already exists in network") {
        tracing::debug!("registry already attached to network '{network}'");
        return Ok(());
    }
    Err(Error::RegistryBridgeFailed(
        out.failure_text("docker network connect"),
    ))
}

/// Make sure every node in the cluster can pull from the local registry by
/// its network-local name. Only meaningful for the kind backend; minikube
/// relies on its insecure-registry allowance instead.
pub fn ensure_registry_reachable<R: CommandRunner>(
    runner: &R,
    handle: &ClusterHandle,
) -> Result<RegistryBinding> {
    let network = match (&handle.backend, &handle.network) {
        (BackendKind::Minikube, _) | (_, None) => {
            tracing::debug!("registry bridge skipped for backend {}", handle.backend);
            return Ok(RegistryBinding {
                container: REGISTRY_NAME.to_string(),
                network: None,
                running: false,
                attached: false,
            });
        }
        (BackendKind::Kind, Some(net)) => net.clone(),
    };
    if !registry_running(runner)? {
        start_registry(runner)?;
    }
    connect_network(runner, &network)?;
    Ok(RegistryBinding {
        container: REGISTRY_NAME.to_string(),
        network: Some(network),
        running: true,
        attached: true,
    })
}
