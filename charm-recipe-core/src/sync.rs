//! High-level pipeline: fetch remote state, diff against config, converge.
//!
//! This module provides the orchestration for reconciling one configured
//! charm project against the remote service:
//!   - [`inspect_project`] fetches the live state and returns the computed
//!     [`RecipePlan`] for the diff/show commands
//!   - [`sync_project`] applies a plan: ensures the git mirror exists and is
//!     the project default, then creates/updates/deletes recipes
//!   - [`delete_recipe_by_name`] and [`delete_recipe_by_track`] back the
//!     delete command
//!   - [`authorize_recipes`] starts store-upload authorization for recipes
//!
//! All functions are generic over the [`Launchpad`] trait so tests can drive
//! them with a mock client. Nothing here prints: callers receive structured
//! outcomes (serializable for JSON output) and render them.

use std::fmt;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::{format_recipe_name, CharmProject, DEFAULT_RECIPE_FORMAT};
use crate::contract::{GitRepository, Launchpad, LpError, NewCharmRecipe, Person, Project};
use crate::plan::{plan_recipes, RecipeAction, RecipePlan};

/// Raised when a delete targets a recipe the service does not have.
#[derive(Debug)]
pub struct RecipeNotFound {
    pub recipe: String,
    pub project: String,
}

impl fmt::Display for RecipeNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recipe {:?} not found for project {:?}",
            self.recipe, self.project
        )
    }
}

impl std::error::Error for RecipeNotFound {}

/// Options steering [`sync_project`].
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Report what would happen without touching the service.
    pub dry_run: bool,
    /// Delete fetched recipes the config knows nothing about.
    pub remove_unknown: bool,
    /// Stop after ensuring the git mirror; leave recipes alone.
    pub git_mirror_only: bool,
    /// Restrict recipe changes to these short branch names.
    pub branches: Option<Vec<String>>,
}

/// One applied (or planned, under dry-run) remote mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    ImportRepository { url: String },
    SetDefaultRepository { repository: String },
    SetProjectVcs { project: String },
    CreateRecipe { name: String },
    UpdateRecipe { name: String, changes: Vec<String> },
    DeleteRecipe { name: String },
}

/// Report of a [`sync_project`] run for one charm.
#[derive(Debug, Default, Serialize)]
pub struct SyncOutcome {
    pub charm: String,
    pub dry_run: bool,
    pub actions: Vec<SyncAction>,
    pub missing_branches: Vec<String>,
    pub no_changes: bool,
}

/// Live state of one configured project, for diff/show rendering.
#[derive(Debug, Serialize)]
pub struct ProjectDiff {
    pub charm: String,
    pub launchpad_project: String,
    pub repository: String,
    pub state: ProjectState,
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProjectState {
    /// The launchpad project does not exist.
    NoProject,
    /// The project exists but has no repository owned by the team.
    NoRepository,
    Ready { plan: RecipePlan },
}

/// Fetch the remote state for one project and compute its plan.
pub async fn inspect_project<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    filter_branches: Option<&[String]>,
) -> Result<ProjectDiff, LpError> {
    info!(charm = %project.name, "inspecting launchpad state");
    let team = lp.get_team(&project.team).await?;
    let lp_project = match lp.get_project(&project.launchpad_project).await? {
        Some(p) => p,
        None => {
            return Ok(ProjectDiff {
                charm: project.name.clone(),
                launchpad_project: project.launchpad_project.clone(),
                repository: project.repository.clone(),
                state: ProjectState::NoProject,
            })
        }
    };
    let repo = match lp.get_git_repository(&team, &lp_project).await? {
        Some(r) => r,
        None => {
            return Ok(ProjectDiff {
                charm: project.name.clone(),
                launchpad_project: project.launchpad_project.clone(),
                repository: project.repository.clone(),
                state: ProjectState::NoRepository,
            })
        }
    };
    let refs = lp.get_git_refs(&repo).await?;
    let recipes = lp.get_charm_recipes(&team, &lp_project).await?;
    Ok(ProjectDiff {
        charm: project.name.clone(),
        launchpad_project: project.launchpad_project.clone(),
        repository: project.repository.clone(),
        state: ProjectState::Ready {
            plan: plan_recipes(project, &refs, recipes, filter_branches),
        },
    })
}

/// Ensure the project's git repository is mirrored, default and Git-backed.
async fn ensure_git_repository<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    team: &Person,
    lp_project: &Project,
    dry_run: bool,
    actions: &mut Vec<SyncAction>,
) -> Result<Option<GitRepository>, LpError> {
    info!(charm = %project.name, "checking launchpad git repositories");

    if lp_project.owner_link != team.self_link {
        error!(
            project = %lp_project.name,
            team = %team.name,
            "project owner does not match the configured team"
        );
        return Err(format!("unexpected project owner for {}", lp_project.name).into());
    }

    let repo = match lp.get_git_repository(team, lp_project).await? {
        Some(repo) => {
            debug!(project = %lp_project.name, team = %team.name, "git repository already exists");
            repo
        }
        None => {
            info!(
                project = %lp_project.name,
                team = %team.name,
                url = %project.repository,
                "git repository does not exist, importing"
            );
            actions.push(SyncAction::ImportRepository {
                url: project.repository.clone(),
            });
            if dry_run {
                return Ok(None);
            }
            lp.import_repository(team, lp_project, &project.repository)
                .await?
        }
    };

    if !repo.target_default {
        info!(
            project = %lp_project.name,
            repository = %repo.git_https_url,
            "setting default repository"
        );
        actions.push(SyncAction::SetDefaultRepository {
            repository: repo.unique_name.clone(),
        });
        if !dry_run {
            // Not fatal. Typically means the team does not own the project.
            if let Err(e) = lp.set_default_repository(lp_project, &repo).await {
                error!(
                    error = %e,
                    project = %lp_project.name,
                    "failed to set the default repository"
                );
            }
        }
    }

    if lp_project.vcs.as_deref() != Some("Git") {
        info!(project = %lp_project.name, "setting project vcs to Git");
        actions.push(SyncAction::SetProjectVcs {
            project: lp_project.name.clone(),
        });
        if !dry_run {
            lp.set_project_vcs_git(lp_project).await?;
        }
    }

    Ok(Some(repo))
}

/// Converge one project: git mirror first, then the recipe plan.
pub async fn sync_project<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    opts: &SyncOptions,
) -> Result<SyncOutcome, LpError> {
    let mut outcome = SyncOutcome {
        charm: project.name.clone(),
        dry_run: opts.dry_run,
        ..SyncOutcome::default()
    };

    let team = lp.get_team(&project.team).await?;
    let lp_project = match lp.get_project(&project.launchpad_project).await? {
        Some(p) => p,
        None => {
            error!(project = %project.launchpad_project, "no such project in launchpad");
            return Err(format!(
                "no project in launchpad called {:?}",
                project.launchpad_project
            )
            .into());
        }
    };

    let repo = ensure_git_repository(
        lp,
        project,
        &team,
        &lp_project,
        opts.dry_run,
        &mut outcome.actions,
    )
    .await?;
    let repo = match repo {
        Some(repo) => repo,
        // dry-run bailed before the import; recipes can't be planned yet
        None => return Ok(outcome),
    };
    if opts.git_mirror_only {
        info!(charm = %project.name, "only ensuring mirroring of the git repository");
        return Ok(outcome);
    }

    let refs = lp.get_git_refs(&repo).await?;
    let recipes = lp.get_charm_recipes(&team, &lp_project).await?;
    let plan = plan_recipes(project, &refs, recipes, opts.branches.as_deref());
    outcome.missing_branches = plan.missing_branches.clone();

    if plan.is_noop() {
        info!(charm = %project.name, "no recipe changes needed");
        outcome.no_changes = outcome.actions.is_empty();
        return Ok(outcome);
    }

    for planned in &plan.recipes {
        match &planned.action {
            RecipeAction::Create => {
                info!(recipe = %planned.desired.name, dry_run = opts.dry_run, "creating charm recipe");
                outcome.actions.push(SyncAction::CreateRecipe {
                    name: planned.desired.name.clone(),
                });
                if !opts.dry_run {
                    lp.create_recipe(NewCharmRecipe {
                        name: &planned.desired.name,
                        owner: &team,
                        project: &lp_project,
                        git_ref: &planned.desired.git_ref,
                        store_name: &project.charmhub_name,
                        auto_build: planned.desired.auto_build,
                        auto_build_channels: &planned.desired.auto_build_channels,
                        build_path: planned.desired.build_path.as_deref(),
                        store_upload: planned.desired.store_upload,
                        store_channels: &planned.desired.store_channels,
                    })
                    .await?;
                }
            }
            RecipeAction::Update { patch, changes } => {
                info!(
                    recipe = %planned.desired.name,
                    changes = ?changes,
                    dry_run = opts.dry_run,
                    "charm recipe has changes, saving"
                );
                outcome.actions.push(SyncAction::UpdateRecipe {
                    name: planned.desired.name.clone(),
                    changes: changes.clone(),
                });
                if !opts.dry_run {
                    if let Some(current) = &planned.current {
                        lp.update_recipe(current, patch).await?;
                    }
                }
            }
            RecipeAction::Unchanged => {
                debug!(recipe = %planned.desired.name, "no changes needed for charm recipe");
            }
        }
    }

    if opts.remove_unknown && !plan.unknown.is_empty() {
        for recipe in &plan.unknown {
            info!(recipe = %recipe.name, dry_run = opts.dry_run, "deleting unknown recipe");
            outcome.actions.push(SyncAction::DeleteRecipe {
                name: recipe.name.clone(),
            });
        }
        if !opts.dry_run {
            let deletions = plan.unknown.iter().map(|recipe| lp.delete_recipe(recipe));
            try_join_all(deletions).await?;
        }
    }

    Ok(outcome)
}

/// Delete a recipe by its full name, returning the name on success.
pub async fn delete_recipe_by_name<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    recipe_name: &str,
    dry_run: bool,
) -> Result<String, LpError> {
    let team = lp.get_team(&project.team).await?;
    let lp_project = match lp.get_project(&project.launchpad_project).await? {
        Some(p) => p,
        None => {
            return Err(format!(
                "no project in launchpad called {:?}",
                project.launchpad_project
            )
            .into())
        }
    };
    let recipes = lp.get_charm_recipes(&team, &lp_project).await?;
    match recipes.iter().find(|r| r.name == recipe_name) {
        Some(recipe) => {
            if dry_run {
                info!(recipe = %recipe_name, "would delete recipe (dry-run)");
            } else {
                lp.delete_recipe(recipe).await?;
                info!(recipe = %recipe_name, "deleted recipe");
            }
            Ok(recipe.name.clone())
        }
        None => Err(Box::new(RecipeNotFound {
            recipe: recipe_name.to_string(),
            project: lp_project.name,
        })),
    }
}

/// Delete the recipe named by the default format for a branch and track.
pub async fn delete_recipe_by_track<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    branch: &str,
    track: &str,
    dry_run: bool,
) -> Result<String, LpError> {
    let recipe_name = format_recipe_name(
        DEFAULT_RECIPE_FORMAT,
        &project.launchpad_project,
        branch,
        track,
    );
    delete_recipe_by_name(lp, project, &recipe_name, dry_run).await
}

/// Outcome of a store-upload authorization attempt for one recipe.
#[derive(Debug, Serialize)]
pub struct AuthorizeOutcome {
    pub recipe: String,
    pub branch: String,
    pub state: AuthorizeState,
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthorizeState {
    AlreadyAuthorized,
    /// Authorization started; the operator finishes it in a browser.
    Started { authorize_url: String },
    /// The config wants this recipe but launchpad has no such recipe yet.
    MissingRecipe,
    Failed { reason: String },
}

/// Begin store-upload authorization for a project's recipes.
///
/// Recipes already authorized are skipped unless `force` is set. Failures
/// are recorded per-recipe rather than aborting: this is one of several
/// attempts, and if all fail it will be obvious.
pub async fn authorize_recipes<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    branches: Option<&[String]>,
    force: bool,
) -> Result<Vec<AuthorizeOutcome>, LpError> {
    let diff = inspect_project(lp, project, branches).await?;
    let plan = match diff.state {
        ProjectState::Ready { plan } => plan,
        ProjectState::NoProject => {
            return Err(format!(
                "no project in launchpad called {:?}",
                project.launchpad_project
            )
            .into())
        }
        ProjectState::NoRepository => {
            return Err(format!("no repository defined for {}", project.launchpad_project).into())
        }
    };

    let mut outcomes = Vec::new();
    for planned in &plan.recipes {
        let branch = crate::config::branch_short_name(&planned.desired.ref_path).to_string();
        let state = match &planned.current {
            None => AuthorizeState::MissingRecipe,
            Some(recipe) if recipe.can_upload_to_store && !force => {
                debug!(recipe = %recipe.name, "recipe is already authorized");
                AuthorizeState::AlreadyAuthorized
            }
            Some(recipe) => match lp.begin_authorization(recipe).await {
                Ok(_macaroon) => {
                    info!(recipe = %recipe.name, "authorization started");
                    AuthorizeState::Started {
                        authorize_url: format!("{}/+authorize", recipe.web_link),
                    }
                }
                Err(e) => {
                    error!(recipe = %recipe.name, error = %e, "failed authorizing for upload");
                    AuthorizeState::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };
        outcomes.push(AuthorizeOutcome {
            recipe: planned.desired.name.clone(),
            branch,
            state,
        });
    }
    Ok(outcomes)
}
