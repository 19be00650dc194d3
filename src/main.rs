use clap::{Args, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cluster;
mod deployer;
mod manifest;
mod poll;
mod sequence;
mod stage;
mod verify;
mod version;

use deployer::DeployContext;

#[derive(Parser)]
#[command(name = "maas-deployer")]
#[command(bin_name = "maas-deployer")]
enum MaasDeployerCli {
    Deploy(DeployArgs),
    Status(StatusArgs),
}

/// Install the MaaS platform and wait for each stage to converge
#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct DeployArgs {
    /// Directory holding one sub-directory per manifest bundle
    #[arg(short, long, default_value = "deployment")]
    manifests: PathBuf,
    /// Externally visible application domain; read from the cluster ingress config when unset
    #[arg(long, env = "CLUSTER_DOMAIN")]
    cluster_domain: Option<String>,
    /// Limitador image to pin; a tag is resolved to the digest the cluster pulled when possible
    #[arg(long, default_value = verify::DEFAULT_LIMITADOR_IMAGE)]
    limitador_image: String,
    #[arg(long)]
    skip_post_deploy: bool,
}

/// Print pod counts, policy conditions and the gateway URL
#[derive(Args)]
#[command(author, version, about, long_about = None)]
struct StatusArgs {
    #[arg(long, env = "CLUSTER_DOMAIN")]
    cluster_domain: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match MaasDeployerCli::parse() {
        MaasDeployerCli::Deploy(args) => {
            let ctx = DeployContext::new(
                args.manifests,
                args.cluster_domain,
                args.limitador_image,
                !args.skip_post_deploy,
            );
            let outcome = deployer::deploy(ctx).await?;
            println!("{}", outcome);
        }
        MaasDeployerCli::Status(args) => {
            let ctx = DeployContext::new(
                PathBuf::new(),
                args.cluster_domain,
                verify::DEFAULT_LIMITADOR_IMAGE.to_string(),
                false,
            );
            let report = deployer::status(ctx).await?;
            println!("{}", report);
        }
    };

    Ok(())
}
