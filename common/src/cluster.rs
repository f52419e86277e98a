use crate::{
    backend::{BackendKind, ClusterHandle},
    shellhandler::CommandRunner,
    Error, Result, HTTP_HOST_PORT, KIND_NETWORK, REGISTRY_HOST_PORT, REGISTRY_INTERNAL_PORT,
    REGISTRY_NAME, SERVICE_NODE_PORT,
};

/// kind node config: one control-plane node with the fixed host-port to
/// NodePort mapping, and a containerd mirror so in-cluster pulls of
/// localhost:5001/* images resolve to the registry container.
fn kind_config() -> String {
    format!(
        r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
- role: control-plane
  extraPortMappings:
  - containerPort: {SERVICE_NODE_PORT}
    hostPort: {HTTP_HOST_PORT}
    protocol: TCP
containerdConfigPatches:
- |-
  [plugins."io.containerd.grpc.v1.cri".registry.mirrors."localhost:{REGISTRY_HOST_PORT}"]
    endpoint = ["http://{REGISTRY_NAME}:{REGISTRY_INTERNAL_PORT}"]
"#
    )
}

fn kind_cluster_exists<R: CommandRunner>(runner: &R, name: &str) -> Result<bool> {
    let out = runner.run("kind", &["get", "clusters"])?;
    if !out.success {
        return Err(Error::ClusterProvisionFailed(out.failure_text("kind")));
    }
    Ok(out.stdout.lines().any(|l| l.trim() == name))
}

fn minikube_cluster_running<R: CommandRunner>(runner: &R, name: &str) -> Result<bool> {
    // non-zero exit covers both "profile not found" and "stopped"; either
    // way `minikube start` below is the converging operation
    let out = runner.run("minikube", &["status", "-p", name, "--format", "{{.Host}}"])?;
    Ok(out.success && out.stdout.trim() == "Running")
}

/// Idempotently create or reuse the named cluster. On success exactly one
/// cluster with this name exists and is reachable; a pre-existing cluster is
/// success, not an error.
pub fn ensure_cluster<R: CommandRunner>(
    runner: &R,
    name: &str,
    backend: BackendKind,
) -> Result<ClusterHandle> {
    match backend {
        BackendKind::Kind => {
            if kind_cluster_exists(runner, name)? {
                tracing::info!("kind cluster '{name}' already exists, reusing it");
                return Ok(ClusterHandle {
                    name: name.to_string(),
                    backend,
                    existed: true,
                    network: Some(KIND_NETWORK.to_string()),
                });
            }
            tracing::info!("creating kind cluster '{name}'");
            let out = runner.run_with_stdin(
                "kind",
                &["create", "cluster", "--name", name, "--config", "-"],
                &kind_config(),
            )?;
            if !out.success {
                return Err(Error::ClusterProvisionFailed(out.failure_text("kind")));
            }
            Ok(ClusterHandle {
                name: name.to_string(),
                backend,
                existed: false,
                network: Some(KIND_NETWORK.to_string()),
            })
        }
        BackendKind::Minikube => {
            if minikube_cluster_running(runner, name)? {
                tracing::info!("minikube profile '{name}' already running, reusing it");
                return Ok(ClusterHandle {
                    name: name.to_string(),
                    backend,
                    existed: true,
                    network: None,
                });
            }
            tracing::info!("starting minikube profile '{name}'");
            let insecure = format!("--insecure-registry=localhost:{REGISTRY_HOST_PORT}");
            let out = runner.run("minikube", &["start", "-p", name, &insecure])?;
            if !out.success {
                return Err(Error::ClusterProvisionFailed(out.failure_text("minikube")));
            }
            Ok(ClusterHandle {
                name: name.to_string(),
                backend,
                existed: false,
                network: None,
            })
        }
    }
}

/// Delete the named cluster. Explicit external operation, never part of the
/// deploy flow.
pub fn delete_cluster<R: CommandRunner>(runner: &R, name: &str, backend: BackendKind) -> Result<()> {
    let out = match backend {
        BackendKind::Kind => runner.run("kind", &["delete", "cluster", "--name", name])?,
        BackendKind::Minikube => runner.run("minikube", &["delete", "-p", name])?,
    };
    if !out.success {
        return Err(Error::Other(out.failure_text(&backend.to_string())));
    }
    Ok(())
}
