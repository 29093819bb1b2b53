use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubebind::config::{default_config_path, Config};
use kubebind::query::{FieldPath, Query, Shape};
use kubebind::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kubebind")]
#[command(about = "Resolve kubeconfig contexts and query the cluster API")]
struct Cli {
    /// Path to kubeconfig (defaults to $KUBECONFIG, then ~/.kube/config)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Context to use instead of the current context
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List contexts, marking the current one
    Contexts,

    /// Show what a context resolves to (no secrets)
    Show,

    /// Fetch a resource and print it as JSON
    Get {
        /// Resource type, e.g. pods, nodes, deployments
        resource_type: String,

        /// Resource name; lists the type when omitted
        name: Option<String>,

        /// Namespace (defaults to the context's namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Label selector requirement, may be repeated
        #[arg(short = 'l', long = "label", value_name = "KEY=VALUE")]
        labels: Vec<String>,

        /// Print only the value at this path, e.g. '$.items[*].metadata.name'
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();

    let cli = Cli::parse();

    let path = cli.kubeconfig.clone().unwrap_or_else(default_config_path);
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load kubeconfig: {}", path.display()))?;

    match cli.command {
        Command::Contexts => {
            for named in &config.contexts {
                let marker = if named.name == config.current_context { "*" } else { " " };
                println!("{marker} {}", named.name);
            }
        }
        Command::Show => {
            let resolved = resolve(&config, cli.context.as_deref())?;
            let output = serde_json::json!({
                "context": resolved.name(),
                "cluster": resolved.cluster_name(),
                "server": resolved.cluster().server,
                "user": resolved.user_name(),
                "auth": resolved.user().auth_kind(),
                "namespace": resolved.namespace(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Get {
            resource_type,
            name,
            namespace,
            labels,
            path,
        } => {
            let resolved = resolve(&config, cli.context.as_deref())?;
            let client = Client::from_context(&resolved).context("Failed to create client")?;

            let mut query = Query::new().resource(resource_type, name.unwrap_or_default());
            if let Some(namespace) = namespace.as_deref().or(resolved.namespace()) {
                query = query.namespace(namespace);
            }
            for label in &labels {
                let (key, value) = label
                    .split_once('=')
                    .with_context(|| format!("Invalid label {label:?}, expected KEY=VALUE"))?;
                query = query.label(key, value);
            }

            let result = client.query(&query).await?;
            let output = match path {
                Some(expr) => {
                    let path = FieldPath::parse(&expr, Shape::Any)?;
                    result.extract(&path)?.into_value()
                }
                None => result.into_value(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn resolve(config: &Config, context: Option<&str>) -> Result<kubebind::ResolvedContext> {
    let resolved = match context {
        Some(name) => config.resolve(name),
        None => config.resolve_current(),
    };
    resolved.context("Failed to resolve context")
}
