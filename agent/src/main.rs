mod deploy;
mod destroy;
mod version;

use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Parameters {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the local cluster, deploy the workload and verify it
    Deploy(deploy::Parameters),
    /// Delete the local cluster
    Destroy(destroy::Parameters),
    /// Print the version
    Version(version::Parameters),
}

#[tokio::main]
async fn main() {
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).unwrap();

    let args = Parameters::parse();
    match &args.command {
        Commands::Deploy(args) => {
            process::exit(deploy::run(args).await);
        }
        Commands::Destroy(args) => match destroy::run(args).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Destroy failed with: {e:}");
                process::exit(1)
            }
        },
        Commands::Version(args) => match version::run(args).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Version failed with: {e:}");
                process::exit(1)
            }
        },
    }
}
