//! # charm-recipe-sync CLI interface
//!
//! This module implements the full CLI surface: command parsing, argument
//! validation and the async entrypoint. All reconciliation logic lives in
//! the [`charm-recipe-core`] crate; this module is strictly CLI glue,
//! ergonomic argument exposure and orchestration.
//!
//! - Entry struct [`Cli`] defines all user-facing options and subcommands.
//! - The async entrypoint [`run`] exists for programmatic invocation and
//!   integration testing as well as `main()`.
//!
//! When adding a subcommand, extend [`Commands`] here and keep all
//! non-trivial business logic inside `charm-recipe-core`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use charm_recipe_core::builds;
use charm_recipe_core::config::CharmProject;
use charm_recipe_core::sync::{self, RecipeNotFound, SyncOptions};

use crate::client::LaunchpadClient;
use crate::load_config;
use crate::output;

/// CLI for charm-recipe-sync: configure launchpad projects for charms.
#[derive(Parser)]
#[clap(
    name = "charm-recipe-sync",
    version,
    about = "Configure and manage launchpad repositories and build recipes for charms"
)]
pub struct Cli {
    /// Directory containing the group configuration files (default: the
    /// current working directory, or `config_dir` from the user config)
    #[clap(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Loglevel
    #[clap(long = "log", global = true, value_enum)]
    pub log: Option<LogLevel>,

    /// Project group configurations to process. If no project groups are
    /// specified, all groups found in the config-dir will be loaded.
    #[clap(short = 'p', long = "group", global = true, value_name = "PROJECT-GROUP")]
    pub groups: Vec<String>,

    /// Choose a specific charm name from the configured set. May be
    /// repeated for multiple charms.
    #[clap(short = 'c', long = "charm", global = true, value_name = "CHARM")]
    pub charms: Vec<String>,

    /// Specify the output format
    #[clap(short = 'f', long, global = true, value_enum, default_value = "plain")]
    pub format: Format,

    /// Ignore errors and try to carry on
    #[clap(short = 'i', long, global = true)]
    pub ignore_errors: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse the spellings the user config file historically accepted.
    pub fn parse_name(name: &str) -> Option<LogLevel> {
        match name.to_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" | "CRITICAL" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Plain,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current configuration for the charm recipes as defined in
    /// launchpad
    Show,
    /// List the charms defined in the configuration passed
    List,
    /// Diff the declared config with the actual config in launchpad,
    /// highlighting missing or extra configuration
    Diff {
        /// Add detail to the output
        #[clap(long)]
        detail: bool,
    },
    /// Sync the config to launchpad, creating or updating recipes as
    /// required
    Sync {
        /// This flag must be supplied to indicate that the sync/apply
        /// command really should be used
        #[clap(long = "i-really-mean-it")]
        confirmed: bool,
        /// Delete any recipes that are not in the config for a charm, so
        /// renamed recipes don't leave stale ones writing to the target
        /// track
        #[clap(long)]
        remove_unknown: bool,
        /// Only set up the git mirroring, not the recipes
        #[clap(long)]
        git_mirror_only: bool,
        /// Git branch name to sync recipes for. Can be used multiple times;
        /// default is all branches of the charm.
        #[clap(short = 'b', long = "git-branch", value_name = "GIT_BRANCH")]
        git_branches: Vec<String>,
    },
    /// Delete a recipe from launchpad by name or by track and branch. Note
    /// it does not remove revisions from the charmhub; this purely manages
    /// the recipes in launchpad.
    Delete {
        /// Name the recipe fully that you want to delete
        #[clap(long, conflicts_with_all = ["track", "branch"])]
        name: Option<String>,
        /// The track to target, e.g. latest
        #[clap(short = 't', long)]
        track: Option<String>,
        /// The branch to target, e.g. stable/xena
        #[clap(short = 'b', long = "git-branch")]
        branch: Option<String>,
        /// This flag must be supplied to indicate that the delete recipe
        /// command really should be used
        #[clap(long = "i-really-mean-it")]
        confirmed: bool,
    },
    /// Check the state of the builds available at launchpad
    CheckBuilds {
        /// Filter builds by architecture tag (e.g. arm64)
        #[clap(long = "arch", value_name = "ARCH")]
        arch_tag: Option<String>,
        /// Filter the builds by channel (e.g. latest/edge)
        #[clap(long)]
        channel: Option<String>,
        /// Look for errors in the build log
        #[clap(long)]
        detect_error: bool,
    },
    /// Authorize recipes to upload to the charmhub store
    Authorize {
        /// Git branch name to authorize recipes for. Can be used multiple
        /// times; default is all branches of the charm.
        #[clap(short = 'b', long = "git-branch", value_name = "GIT_BRANCH")]
        git_branches: Vec<String>,
        /// Do the authorization even if launchpad thinks it is already
        /// authorized
        #[clap(long)]
        force: bool,
    },
    /// Request builds for the recipes associated with the given branches
    RequestBuild {
        /// Git branch name to request builds for. Can be used multiple
        /// times; default is all branches of the charm.
        #[clap(short = 'b', long = "git-branch", value_name = "GIT_BRANCH")]
        git_branches: Vec<String>,
        /// Request the build even if there is a valid build already
        #[clap(long)]
        force: bool,
        /// Print the build requests instead of submitting them
        #[clap(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct CharmAuthorizations {
    charm: String,
    recipes: Vec<sync::AuthorizeOutcome>,
}

#[derive(Serialize)]
struct CharmBuildRequests {
    charm: String,
    builds: Vec<builds::RequestedBuild>,
}

fn branch_filter(git_branches: &[String]) -> Option<Vec<String>> {
    if git_branches.is_empty() {
        None
    } else {
        Some(git_branches.to_vec())
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    let file_config = load_config::file_config();
    let ignore_errors = cli.ignore_errors || file_config.ignore_errors;

    let config_dir = match cli.config_dir.clone().or_else(|| file_config.config_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to determine the working directory")?,
    };
    if !config_dir.is_dir() {
        bail!("configuration directory {:?} does not exist", config_dir);
    }
    let config_dir = config_dir
        .canonicalize()
        .with_context(|| format!("failed to resolve config dir {config_dir:?}"))?;
    tracing::info!(config_dir = %config_dir.display(), "using config dir");

    let files = load_config::group_config_files(&config_dir, &cli.groups)?;
    let group_config = load_config::load_group_config(&files)?;
    if group_config.is_empty() {
        bail!(
            "no projects found; are you sure the path is correct?: {}",
            config_dir.display()
        );
    }
    let select = if cli.charms.is_empty() {
        None
    } else {
        Some(cli.charms.as_slice())
    };
    if group_config.projects(select).next().is_none() {
        bail!("no charms found; are you sure the arguments are correct?");
    }

    match &cli.command {
        Commands::List => {
            let projects: Vec<&CharmProject> = group_config.projects(select).collect();
            match cli.format {
                Format::Plain => output::print_list(&projects),
                Format::Json => output::print_json(&projects)?,
            }
        }

        Commands::Show => {
            let lp = launchpad_client()?;
            let mut diffs = Vec::new();
            for project in group_config.projects(select) {
                let diff = sync::inspect_project(&lp, project, None)
                    .await
                    .map_err(|e| {
                        anyhow::Error::msg(format!("inspect failed for {}: {e}", project.name))
                    })?;
                diffs.push(diff);
            }
            match cli.format {
                Format::Plain => output::print_show(&diffs),
                Format::Json => output::print_json(&diffs)?,
            }
        }

        Commands::Diff { detail } => {
            let lp = launchpad_client()?;
            let mut diffs = Vec::new();
            for project in group_config.projects(select) {
                let diff = sync::inspect_project(&lp, project, None)
                    .await
                    .map_err(|e| {
                        anyhow::Error::msg(format!("inspect failed for {}: {e}", project.name))
                    })?;
                diffs.push(diff);
            }
            match cli.format {
                Format::Plain => output::print_diff(&diffs, *detail),
                Format::Json => output::print_json(&diffs)?,
            }
        }

        Commands::Sync {
            confirmed,
            remove_unknown,
            git_mirror_only,
            git_branches,
        } => {
            if !confirmed {
                bail!("'sync' command issued, but --i-really-mean-it flag not used. Abandoning.");
            }
            if *git_mirror_only {
                tracing::info!("only ensuring mirroring of git repositories");
            }
            let lp = launchpad_client()?;
            let opts = SyncOptions {
                dry_run: false,
                remove_unknown: *remove_unknown,
                git_mirror_only: *git_mirror_only,
                branches: branch_filter(git_branches),
            };
            let mut outcomes = Vec::new();
            for project in group_config.projects(select) {
                match sync::sync_project(&lp, project, &opts).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        tracing::error!(charm = %project.name, error = %e, "sync failed");
                        if !ignore_errors {
                            bail!("sync failed for {}: {e}", project.name);
                        }
                    }
                }
            }
            match cli.format {
                Format::Plain => output::print_sync(&outcomes),
                Format::Json => output::print_json(&outcomes)?,
            }
        }

        Commands::Delete {
            name,
            track,
            branch,
            confirmed,
        } => {
            if !confirmed {
                bail!("'delete' command issued, but --i-really-mean-it flag not used. Abandoning.");
            }
            #[derive(Clone, Copy)]
            enum Target<'a> {
                Name(&'a str),
                Track { branch: &'a str, track: &'a str },
            }
            let target = match (name, track, branch) {
                (Some(name), _, _) => Target::Name(name.as_str()),
                (None, Some(track), Some(branch)) => Target::Track {
                    branch: branch.as_str(),
                    track: track.as_str(),
                },
                _ => bail!(
                    "'delete' command: must supply either --name or both --track and \
                     --git-branch. See --help for the command."
                ),
            };
            let lp = launchpad_client()?;
            for project in group_config.projects(select) {
                let result = match target {
                    Target::Name(name) => {
                        sync::delete_recipe_by_name(&lp, project, name, false).await
                    }
                    Target::Track { branch, track } => {
                        sync::delete_recipe_by_track(&lp, project, branch, track, false).await
                    }
                };
                match result {
                    Ok(deleted) => println!("Deleted recipe: {deleted}"),
                    Err(e) if e.downcast_ref::<RecipeNotFound>().is_some() => {
                        tracing::warn!(
                            charm = %project.name,
                            error = %e,
                            "delete failed as recipe not found"
                        );
                        if !ignore_errors {
                            bail!("delete failed for {}: {e}", project.name);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(charm = %project.charmhub_name, error = %e, "error deleting recipe");
                        if !ignore_errors {
                            bail!("delete failed for {}: {e}", project.name);
                        }
                    }
                }
            }
        }

        Commands::CheckBuilds {
            arch_tag,
            channel,
            detect_error,
        } => {
            let lp = launchpad_client()?;
            let channels = channel.as_ref().map(|c| vec![c.clone()]);
            let mut rows = Vec::new();
            for project in group_config.projects(select) {
                let project_rows = builds::collect_builds(
                    &lp,
                    project,
                    channels.as_deref(),
                    arch_tag.as_deref(),
                    *detect_error,
                )
                .await
                .map_err(|e| {
                    anyhow::Error::msg(format!("check-builds failed for {}: {e}", project.name))
                })?;
                rows.extend(project_rows);
            }
            match cli.format {
                Format::Plain => output::print_builds(&rows, *detect_error),
                Format::Json => output::print_json(&rows)?,
            }
        }

        Commands::Authorize {
            git_branches,
            force,
        } => {
            let lp = launchpad_client()?;
            let branches = branch_filter(git_branches);
            let mut reports = Vec::new();
            for project in group_config.projects(select) {
                let recipes =
                    sync::authorize_recipes(&lp, project, branches.as_deref(), *force)
                        .await
                        .map_err(|e| {
                            anyhow::Error::msg(format!(
                                "authorize failed for {}: {e}",
                                project.name
                            ))
                        })?;
                reports.push(CharmAuthorizations {
                    charm: project.charmhub_name.clone(),
                    recipes,
                });
            }
            match cli.format {
                Format::Plain => {
                    for report in &reports {
                        output::print_authorizations(&report.charm, &report.recipes);
                    }
                }
                Format::Json => output::print_json(&reports)?,
            }
        }

        Commands::RequestBuild {
            git_branches,
            force,
            dry_run,
        } => {
            let lp = launchpad_client()?;
            let branches = branch_filter(git_branches);
            let mut reports = Vec::new();
            for project in group_config.projects(select) {
                let requested = builds::request_builds_for_branches(
                    &lp,
                    project,
                    branches.as_deref(),
                    *force,
                    *dry_run,
                )
                .await
                .map_err(|e| {
                    anyhow::Error::msg(format!("request-build failed for {}: {e}", project.name))
                })?;
                reports.push(CharmBuildRequests {
                    charm: project.charmhub_name.clone(),
                    builds: requested,
                });
            }
            match cli.format {
                Format::Plain => {
                    for report in &reports {
                        output::print_build_requests(&report.charm, &report.builds);
                    }
                }
                Format::Json => output::print_json(&reports)?,
            }
        }
    }

    Ok(())
}

fn launchpad_client() -> Result<LaunchpadClient> {
    LaunchpadClient::new_from_env()
        .map_err(|e| anyhow::Error::msg(format!("failed to construct launchpad client: {e}")))
}
