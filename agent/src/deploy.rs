use clap::Args;
use common::{
    backend, cluster,
    httphandler::RestClient,
    manifests::{KubeApplier, Manifest, ManifestSet},
    pipeline::{self, DeployOptions, ImageOverride},
    report::{RunReport, Stage},
    shellhandler::HostRunner,
    workload::DeploymentProbe,
    Error, Result,
};
use std::{fs, path::PathBuf, time::Duration};

#[derive(Args, Debug)]
pub struct Parameters {
    /// Name of the local cluster to create or reuse
    #[arg(short, long, env = "CLUSTER_NAME", value_name = "NAME", default_value = "kindling")]
    cluster_name: String,
    /// Target namespace
    #[arg(short, long, env = "NAMESPACE", value_name = "NAMESPACE", default_value = "demo")]
    namespace: String,
    /// Manifest file or directory ({namespace, deployment, service}, applied
    /// in filename order)
    #[arg(short, long, env = "MANIFEST_PATH", value_name = "PATH", default_value = "deploy/k8s")]
    manifests: PathBuf,
    /// Continue past a registry bridge failure instead of aborting
    #[arg(long, env = "KEEP_GOING", default_value_t = false)]
    keep_going: bool,
    /// Rollout wait bound in seconds
    #[arg(long, env = "ROLLOUT_TIMEOUT", value_name = "SECONDS", default_value_t = 300)]
    rollout_timeout: u64,
    /// Health probe attempts before giving up (advisory only)
    #[arg(long, env = "HEALTH_ATTEMPTS", value_name = "COUNT", default_value_t = 5)]
    health_attempts: u32,
    /// Override the workload image after apply, as CONTAINER=IMAGE
    #[arg(long, env = "SET_IMAGE", value_name = "CONTAINER=IMAGE")]
    set_image: Option<String>,
}

fn load_manifest_set(path: &PathBuf) -> Result<ManifestSet> {
    let mut manifests = Vec::new();
    if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .map_err(Error::Stdio)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|x| x.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        files.sort();
        for file in files {
            let content = fs::read_to_string(&file).map_err(Error::Stdio)?;
            manifests.extend(Manifest::parse_all(&content)?);
        }
    } else {
        let content = fs::read_to_string(path).map_err(Error::Stdio)?;
        manifests.extend(Manifest::parse_all(&content)?);
    }
    ManifestSet::new(manifests)
}

fn parse_image_override(raw: &str) -> Result<ImageOverride> {
    let (container, image) = raw
        .split_once('=')
        .ok_or_else(|| Error::Other(format!("expected CONTAINER=IMAGE, got '{raw}'")))?;
    Ok(ImageOverride {
        container: container.to_string(),
        image: image.to_string(),
    })
}

async fn run_deploy(args: &Parameters, report: &mut RunReport) -> Result<()> {
    let runner = HostRunner;

    let backend = backend::detect(&runner)?;
    report.backend = Some(backend);
    report.complete(Stage::BackendSelected);

    let handle = cluster::ensure_cluster(&runner, &args.cluster_name, backend)?;
    report.cluster = Some(handle.clone());
    report.complete(Stage::ClusterProvisioned);

    pipeline::bridge_registry(&runner, &handle, args.keep_going, report)?;

    let set = load_manifest_set(&args.manifests)?;
    let target = set.target(&args.namespace)?;

    let client = kube::Client::try_default().await?;
    let applier = KubeApplier::new(client.clone(), &args.namespace);
    let mut probe = DeploymentProbe::new(client, target);
    let fetcher = RestClient::new();
    let opts = DeployOptions {
        rollout_budget: Duration::from_secs(args.rollout_timeout),
        health_attempts: args.health_attempts,
        image: args
            .set_image
            .as_deref()
            .map(parse_image_override)
            .transpose()?,
        ..DeployOptions::default()
    };
    pipeline::deploy_workload(
        &runner,
        &handle,
        &applier,
        &mut probe,
        &fetcher,
        &args.namespace,
        &set,
        &opts,
        report,
    )
    .await
}

/// The report is the contract: it is emitted whatever happened, reflecting
/// the last stage that completed, and its exit code is the process code.
pub async fn run(args: &Parameters) -> i32 {
    let mut report = RunReport::new();
    if let Err(e) = run_deploy(args, &mut report).await {
        tracing::error!("Deploy failed with: {e:}");
        report.error = Some(e.to_string());
    }
    match report.to_yaml() {
        Ok(yaml) => println!("{yaml}"),
        Err(e) => tracing::error!("Could not render the run report: {e:}"),
    }
    tracing::info!("{}", report.summary());
    report.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_override() {
        let o = parse_image_override("api=localhost:5001/pipeline-demo:42").unwrap();
        assert_eq!(o.container, "api");
        assert_eq!(o.image, "localhost:5001/pipeline-demo:42");
        assert!(parse_image_override("just-an-image").is_err());
    }

    #[test]
    fn test_load_manifest_set_from_directory_in_filename_order() {
        let dir = std::env::temp_dir().join(format!("kindling-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("00-namespace.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n",
        )
        .unwrap();
        fs::write(
            dir.join("10-deployment.yaml"),
            r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: pipeline-demo
spec:
  replicas: 1
  selector:
    matchLabels:
      app: pipeline-demo
  template:
    metadata:
      labels:
        app: pipeline-demo
    spec:
      containers:
      - name: api
        image: localhost:5001/pipeline-demo:latest
"#,
        )
        .unwrap();
        fs::write(
            dir.join("20-service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: pipeline-demo\nspec:\n  type: NodePort\n",
        )
        .unwrap();
        let set = load_manifest_set(&dir).unwrap();
        let kinds: Vec<&str> = set.iter().map(|m| m.kind_name()).collect();
        assert_eq!(kinds, vec!["Namespace", "Deployment", "Service"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_manifest_set_rejects_out_of_order_files() {
        let dir = std::env::temp_dir().join(format!("kindling-order-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("00-service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: pipeline-demo\n",
        )
        .unwrap();
        fs::write(
            dir.join("10-deployment.yaml"),
            r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: pipeline-demo
spec:
  selector:
    matchLabels:
      app: pipeline-demo
  template:
    metadata:
      labels:
        app: pipeline-demo
    spec:
      containers:
      - name: api
        image: localhost:5001/pipeline-demo:latest
"#,
        )
        .unwrap();
        let err = load_manifest_set(&dir).unwrap_err();
        assert!(matches!(err, Error::ManifestApplyFailed { .. }));
        fs::remove_dir_all(&dir).unwrap();
    }
}
