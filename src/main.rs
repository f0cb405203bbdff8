//! # Plan Harness CLI (`ph`)
//!
//! The `ph` binary administers projects, submits and inspects Terraform
//! plans, prints drift reports, and runs the HTTP ingestion server.
//!
//! ## Usage
//!
//! ```bash
//! ph --config ./config/ph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ph init` | Create the SQLite database and artifact directory |
//! | `ph project create\|update\|list\|add-env\|delete-env` | Manage projects and their environments |
//! | `ph component create\|list\|update\|delete` | Manage components |
//! | `ph token create\|list\|revoke` | Manage project access tokens |
//! | `ph ingest <file>` | Submit a plan file |
//! | `ph analyze <file>` | Analyze a plan file without storing it |
//! | `ph plans list\|get\|delete` | Inspect stored plans |
//! | `ph report <project>` | Per-environment drift report |
//! | `ph serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use plan_harness::{config, ingest, migrate, plans, registry, report, server};
use plan_harness_core::graph::DEFAULT_MAX_DEPTH;
use plan_harness_core::ingest::ComponentRef;
use plan_harness_core::store::PlanFilter;

/// Plan Harness CLI: Terraform plan ingestion, drift tracking, and
/// dependency analysis.
///
/// All commands except `analyze` read a TOML configuration file given by
/// `--config`. See `config/ph.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ph",
    about = "Plan Harness: Terraform plan ingestion, drift tracking, and dependency analysis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and artifact directory.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage components.
    Component {
        #[command(subcommand)]
        action: ComponentAction,
    },

    /// Manage project access tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Submit a Terraform plan (`terraform show -json` output).
    #[command(group(ArgGroup::new("target").required(true).args(["component", "component_name"])))]
    Ingest {
        /// Path to the plan JSON file.
        file: PathBuf,

        /// Component id.
        #[arg(long)]
        component: Option<String>,

        /// Component name, resolved within `--project`.
        #[arg(long, requires = "project")]
        component_name: Option<String>,

        /// Project the submission is scoped to.
        #[arg(long)]
        project: Option<String>,

        /// Target environment (e.g. `dev`, `prod`).
        #[arg(long = "env")]
        environment: String,

        /// Source branch of the plan.
        #[arg(long)]
        branch: Option<String>,
    },

    /// Analyze a plan file without storing it.
    ///
    /// Prints platform, providers, drift counts, and resource graph size.
    Analyze {
        /// Path to the plan JSON file.
        file: PathBuf,

        /// Component names to look for in the plan (repeatable).
        #[arg(long = "component")]
        components: Vec<String>,

        /// Maximum configuration nesting depth.
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// Print the full analysis as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored plans.
    Plans {
        #[command(subcommand)]
        action: PlansAction,
    },

    /// Print the drift report of a project.
    Report {
        /// Project id.
        project: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project.
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Registered environment (repeatable). Defaults to `dev`.
        #[arg(long = "env")]
        environments: Vec<String>,
        /// Slack incoming-webhook URL for this project's drift alerts.
        #[arg(long)]
        slack_webhook: Option<String>,
    },
    /// Update a project's description or Slack webhook.
    #[command(group(ArgGroup::new("fields").required(true).multiple(true).args(["description", "slack_webhook"])))]
    Update {
        project: String,
        #[arg(long)]
        description: Option<String>,
        /// Slack incoming-webhook URL; an empty value removes it.
        #[arg(long)]
        slack_webhook: Option<String>,
    },
    /// List projects.
    List,
    /// Register an environment.
    AddEnv { project: String, environment: String },
    /// Remove an environment and all of its plans.
    DeleteEnv { project: String, environment: String },
}

#[derive(Subcommand)]
enum ComponentAction {
    /// Create a component in a project.
    Create { project: String, name: String },
    /// List a project's components.
    List { project: String },
    /// Rename a component or set the environments it is excluded from.
    #[command(group(ArgGroup::new("fields").required(true).multiple(true).args(["name", "exclude_env", "clear_excluded"])))]
    Update {
        component: String,
        #[arg(long)]
        name: Option<String>,
        /// Environment the component is not deployed to (repeatable).
        /// Replaces the current list.
        #[arg(long = "exclude-env", conflicts_with = "clear_excluded")]
        exclude_env: Vec<String>,
        /// Remove every exclusion.
        #[arg(long)]
        clear_excluded: bool,
    },
    /// Delete a component and all of its plans.
    Delete { component: String },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a token. The token is printed once.
    Create {
        project: String,
        #[arg(long, default_value = "default")]
        name: String,
    },
    /// List a project's tokens.
    List { project: String },
    /// Revoke a token.
    Revoke { project: String, token: String },
}

#[derive(Subcommand)]
enum PlansAction {
    /// List plans, newest first.
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        component: Option<String>,
        #[arg(long = "env")]
        environment: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a plan document as JSON.
    Get { id: String },
    /// Delete a plan and its artifact.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Analyze {
        file,
        components,
        max_depth,
        json,
    } = &cli.command
    {
        return ingest::run_analyze(file, components, *max_depth, *json);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.artifact_root)?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Create {
                name,
                description,
                environments,
                slack_webhook,
            } => {
                registry::run_project_create(
                    &cfg,
                    &name,
                    description.as_deref(),
                    &environments,
                    slack_webhook.as_deref(),
                )
                .await?;
            }
            ProjectAction::Update {
                project,
                description,
                slack_webhook,
            } => {
                registry::run_project_update(
                    &cfg,
                    &project,
                    description.as_deref(),
                    slack_webhook.as_deref(),
                )
                .await?
            }
            ProjectAction::List => registry::run_project_list(&cfg).await?,
            ProjectAction::AddEnv {
                project,
                environment,
            } => registry::run_add_environment(&cfg, &project, &environment).await?,
            ProjectAction::DeleteEnv {
                project,
                environment,
            } => registry::run_delete_environment(&cfg, &project, &environment).await?,
        },
        Commands::Component { action } => match action {
            ComponentAction::Create { project, name } => {
                registry::run_component_create(&cfg, &project, &name).await?
            }
            ComponentAction::List { project } => {
                registry::run_component_list(&cfg, &project).await?
            }
            ComponentAction::Update {
                component,
                name,
                exclude_env,
                clear_excluded,
            } => {
                let excluded = if clear_excluded || !exclude_env.is_empty() {
                    Some(exclude_env.as_slice())
                } else {
                    None
                };
                registry::run_component_update(&cfg, &component, name.as_deref(), excluded).await?
            }
            ComponentAction::Delete { component } => {
                registry::run_component_delete(&cfg, &component).await?
            }
        },
        Commands::Token { action } => match action {
            TokenAction::Create { project, name } => {
                registry::run_token_create(&cfg, &project, &name).await?
            }
            TokenAction::List { project } => registry::run_token_list(&cfg, &project).await?,
            TokenAction::Revoke { project, token } => {
                registry::run_token_revoke(&cfg, &project, &token).await?
            }
        },
        Commands::Ingest {
            file,
            component,
            component_name,
            project,
            environment,
            branch,
        } => {
            let component = match (component, component_name) {
                (Some(id), _) => ComponentRef::Id(id),
                (None, Some(name)) => ComponentRef::Name(name),
                (None, None) => anyhow::bail!("--component or --component-name is required"),
            };
            ingest::run_ingest(
                &cfg,
                ingest::IngestArgs {
                    file: &file,
                    component,
                    project,
                    environment,
                    branch,
                },
            )
            .await?;
        }
        Commands::Analyze { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Plans { action } => match action {
            PlansAction::List {
                project,
                component,
                environment,
                limit,
            } => {
                plans::run_list(
                    &cfg,
                    PlanFilter {
                        project_id: project,
                        component_id: component,
                        environment,
                        limit,
                    },
                )
                .await?
            }
            PlansAction::Get { id } => plans::run_get(&cfg, &id).await?,
            PlansAction::Delete { id } => plans::run_delete(&cfg, &id).await?,
        },
        Commands::Report { project, json } => report::run_report(&cfg, &project, json).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
