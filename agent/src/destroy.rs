use clap::Args;
use common::{backend, cluster, shellhandler::HostRunner, Result};

#[derive(Args, Debug)]
pub struct Parameters {
    /// Name of the local cluster to delete
    #[arg(short, long, env = "CLUSTER_NAME", value_name = "NAME", default_value = "kindling")]
    cluster_name: String,
}

/// Explicit teardown, never part of the deploy flow. The registry container
/// is intentionally left running: it survives cluster recreation so image
/// pushes do not have to be repeated.
pub async fn run(args: &Parameters) -> Result<()> {
    let runner = HostRunner;
    let backend = backend::detect(&runner)?;
    cluster::delete_cluster(&runner, &args.cluster_name, backend)?;
    tracing::info!("cluster '{}' deleted", args.cluster_name);
    Ok(())
}
