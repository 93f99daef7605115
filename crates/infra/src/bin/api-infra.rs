//! api-infra - synthesize the network, database and cluster stacks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use api_infra::config::env;
use api_infra::{AppConfig, Plan, SecretSource};

/// Synthesize the infrastructure plan for the API service.
#[derive(Parser)]
#[command(name = "api-infra")]
#[command(about = "Synthesize the VPC, RDS and EKS stacks for the API service")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// JSON file with static secrets (`{"Secrets":[{"name":..,"value":..}]}`).
    #[arg(long, global = true)]
    secrets: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the cloud assembly (manifest plus one template per stack).
    Synth {
        /// Output directory.
        #[arg(long, short, default_value = "cdk.out")]
        out: PathBuf,
    },

    /// List stacks in deployment order.
    List,

    /// Print the Kubernetes manifests applied to the cluster.
    Manifests {
        /// Output format.
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

/// Configuration flags. Each falls back to its environment variable and then
/// to the defaults applied by [`AppConfig::from_lookup`].
#[derive(Args)]
struct ConfigArgs {
    /// Application name; prefixes every stack.
    #[arg(long, env = env::APP_NAME)]
    app_name: Option<String>,

    /// Region every stack is deployed to.
    #[arg(long, env = env::DEPLOY_REGION)]
    deploy_region: Option<String>,

    /// Default schema of the database cluster.
    #[arg(long, env = env::DB_NAME)]
    db_name: Option<String>,

    /// Database master username.
    #[arg(long, env = env::DB_USERNAME)]
    db_username: Option<String>,

    /// Database master password.
    #[arg(long, env = env::DB_PASSWORD, hide_env_values = true)]
    db_password: Option<String>,

    /// GitHub owner of the application repository.
    #[arg(long, env = env::GITHUB_OWNER)]
    github_owner: Option<String>,

    /// GitHub repository name.
    #[arg(long, env = env::GITHUB_REPO)]
    github_repo: Option<String>,

    /// Branch the pipeline tracks.
    #[arg(long, env = env::GITHUB_BRANCH)]
    github_branch: Option<String>,

    /// Access key injected into the workload secret.
    #[arg(long, env = env::AWS_ACCESS_KEY_ID, hide_env_values = true)]
    aws_access_key_id: Option<String>,

    /// Secret key injected into the workload secret.
    #[arg(long, env = env::AWS_SECRET_ACCESS_KEY, hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    /// Region injected into the workload secret.
    #[arg(long, env = env::AWS_REGION)]
    aws_region: Option<String>,

    /// ACM certificate for the service load balancer.
    #[arg(long, env = env::ACM_CERTIFICATE_ARN)]
    acm_certificate_arn: Option<String>,

    /// IAM users mapped to cluster administrators (comma-separated).
    #[arg(long, env = env::MASTER_USERS)]
    master_users: Option<String>,

    /// Worker instance type.
    #[arg(long, env = env::INSTANCE_TYPE)]
    instance_type: Option<String>,

    /// Minimum worker count.
    #[arg(long, env = env::MIN_CAPACITY)]
    min_capacity: Option<String>,

    /// Maximum worker count.
    #[arg(long, env = env::MAX_CAPACITY)]
    max_capacity: Option<String>,
}

impl ConfigArgs {
    /// The value given for an environment variable name, by flag or by env.
    fn lookup(&self, key: &str) -> Option<String> {
        let value = match key {
            env::APP_NAME => &self.app_name,
            env::DEPLOY_REGION => &self.deploy_region,
            env::DB_NAME => &self.db_name,
            env::DB_USERNAME => &self.db_username,
            env::DB_PASSWORD => &self.db_password,
            env::GITHUB_OWNER => &self.github_owner,
            env::GITHUB_REPO => &self.github_repo,
            env::GITHUB_BRANCH => &self.github_branch,
            env::AWS_ACCESS_KEY_ID => &self.aws_access_key_id,
            env::AWS_SECRET_ACCESS_KEY => &self.aws_secret_access_key,
            env::AWS_REGION => &self.aws_region,
            env::ACM_CERTIFICATE_ARN => &self.acm_certificate_arn,
            env::MASTER_USERS => &self.master_users,
            env::INSTANCE_TYPE => &self.instance_type,
            env::MIN_CAPACITY => &self.min_capacity,
            env::MAX_CAPACITY => &self.max_capacity,
            _ => return None,
        };
        value.clone()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,api_infra=debug,cfn_template=debug")
    } else {
        EnvFilter::new("warn,api_infra=info,cfn_template=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config =
        AppConfig::from_lookup(|key| cli.config.lookup(key)).context("Invalid configuration")?;
    let secrets = SecretSource::load_optional(cli.secrets.as_deref())
        .context("Failed to load secret source")?;

    let plan = Plan::build(&config, &secrets).context("Failed to build plan")?;

    match cli.command {
        Commands::Synth { out } => {
            let assembly = plan.synth().context("Failed to synthesize templates")?;
            let written = assembly
                .write_to(&out)
                .with_context(|| format!("Failed to write cloud assembly to {}", out.display()))?;
            info!(files = written.len(), out = %out.display(), "Synthesized cloud assembly");
            println!(
                "{} {}",
                "✓".green().bold(),
                format!("Wrote {} files to {}", written.len(), out.display()).green()
            );
        }
        Commands::List => {
            for stack in plan.stacks() {
                let dependencies: Vec<&str> =
                    stack.dependencies().iter().map(String::as_str).collect();
                if dependencies.is_empty() {
                    println!("{}", stack.name().bold());
                } else {
                    println!(
                        "{} {}",
                        stack.name().bold(),
                        format!("(after {})", dependencies.join(", ")).bright_black()
                    );
                }
            }
        }
        Commands::Manifests { format } => {
            let manifests = &plan.cluster.workload;
            let rendered = match format {
                Format::Yaml => manifests.to_yaml()?,
                Format::Json => serde_json::to_string_pretty(&manifests.to_values()?)?,
            };
            print!("{rendered}");
            if matches!(format, Format::Json) {
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_feed_config_lookup() {
        let cli = Cli::try_parse_from([
            "api-infra",
            "--app-name",
            "shop",
            "--master-users",
            "alice,bob",
            "--max-capacity",
            "4",
            "list",
        ])
        .unwrap();

        let config = AppConfig::from_lookup(|key| cli.config.lookup(key)).unwrap();
        assert_eq!(config.app_name, "shop");
        assert_eq!(config.master_users, ["alice", "bob"]);
        assert_eq!(config.max_capacity, 4);
        assert_eq!(cli.config.lookup("UNKNOWN"), None);
    }

    #[test]
    fn test_bad_capacity_flag_rejected() {
        let cli =
            Cli::try_parse_from(["api-infra", "--min-capacity", "many", "list"]).unwrap();
        assert!(AppConfig::from_lookup(|key| cli.config.lookup(key)).is_err());
    }
}
