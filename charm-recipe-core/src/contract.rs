//! # launchpad contract: client interface for recipe reconciliation
//!
//! This module defines a single trait ([`Launchpad`]) and the concrete
//! supporting types for everything the tool asks of the remote service:
//! resolving teams and projects, inspecting git repositories and refs, and
//! CRUD on charm recipes and their builds.
//!
//! ## Interface & Extensibility
//! - Implement the [`Launchpad`] trait to create new clients (the real REST
//!   client lives in the CLI crate; tests use the generated mock).
//! - All methods are async, returning results and using boxed error types.
//! - Error handling is uniform: transport and API errors are surfaced as
//!   boxed trait objects and contextualised by the caller.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall` so consumers can generate
//!   deterministic mocks for unit/integration tests.
//!
//! ## Type Sources
//! - Entity types (`Person`, `Project`, `GitRepository`, `GitRef`,
//!   `CharmRecipe`, `Build`) are plain data mirroring the service's JSON
//!   representations; the client adapts wire entries into them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Uniform boxed error for all remote operations.
pub type LpError = Box<dyn std::error::Error + Send + Sync>;

/// A launchpad person or team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub self_link: String,
}

/// A launchpad project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub owner_link: String,
    /// Version control system of the project, `"Git"` once configured.
    pub vcs: Option<String>,
    pub self_link: String,
}

/// A git repository hosted (or mirrored) on launchpad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepository {
    pub unique_name: String,
    pub git_https_url: String,
    pub owner_link: String,
    /// Whether this repository is the default for its target project.
    pub target_default: bool,
    pub self_link: String,
}

/// A ref (branch) in a launchpad git repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    /// Full ref path, e.g. `refs/heads/main`.
    pub path: String,
    pub commit_sha1: String,
    pub self_link: String,
}

/// A charm build recipe as it exists on launchpad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharmRecipe {
    pub name: String,
    pub owner_link: String,
    pub project_link: String,
    pub git_ref_link: Option<String>,
    /// Ref path the recipe builds from, e.g. `refs/heads/main`.
    pub git_path: Option<String>,
    pub auto_build: bool,
    #[serde(default)]
    pub auto_build_channels: BTreeMap<String, String>,
    pub build_path: Option<String>,
    pub store_upload: bool,
    pub store_name: Option<String>,
    #[serde(default)]
    pub store_channels: Vec<String>,
    /// Whether the recipe holds a valid store upload authorization.
    pub can_upload_to_store: bool,
    /// Set by launchpad when the branch changed since the last build.
    pub is_stale: bool,
    pub web_link: String,
    pub self_link: String,
}

/// The data needed to create a new charm recipe.
pub struct NewCharmRecipe<'a> {
    pub name: &'a str,
    pub owner: &'a Person,
    pub project: &'a Project,
    pub git_ref: &'a GitRef,
    /// Name of the charm in the store.
    pub store_name: &'a str,
    pub auto_build: bool,
    pub auto_build_channels: &'a BTreeMap<String, String>,
    pub build_path: Option<&'a str>,
    pub store_upload: bool,
    /// Channels to release to; empty when `store_upload` is off.
    pub store_channels: &'a [String],
}

/// A partial update for an existing recipe; unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecipePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_build: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_build_channels: Option<BTreeMap<String, String>>,
    /// `Some(None)` clears the build path on the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_path: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_upload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_channels: Option<Vec<String>>,
}

impl RecipePatch {
    pub fn is_empty(&self) -> bool {
        *self == RecipePatch::default()
    }
}

/// One build of a recipe on a distro series/architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Architecture tag, e.g. `amd64`.
    pub arch_tag: String,
    /// Distro series name, e.g. `jammy`.
    pub series_name: String,
    /// Human-readable state, e.g. `Successfully built`.
    pub buildstate: String,
    pub datebuilt: Option<DateTime<Utc>>,
    /// Git commit the build was made from.
    pub revision_id: Option<String>,
    pub store_upload_status: Option<String>,
    pub store_upload_revision: Option<i64>,
    pub store_upload_error_message: Option<String>,
    pub build_log_url: Option<String>,
    pub web_link: String,
    pub self_link: String,
}

/// Acknowledgement of an asynchronous build request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub status: Option<String>,
    pub error_message: Option<String>,
    pub web_link: String,
    pub self_link: String,
}

/// Client operations against the remote service.
///
/// Recipe names are unique per (owner, project); that invariant is enforced
/// remotely and surfaced here only as operation errors. Implemented by the
/// real REST client and by test mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Launchpad: Send + Sync {
    /// Resolve a team by name.
    async fn get_team(&self, name: &str) -> Result<Person, LpError>;

    /// Resolve a project by name; `None` when it does not exist.
    async fn get_project(&self, name: &str) -> Result<Option<Project>, LpError>;

    /// First git repository targeting `project` owned by `owner`, if any.
    async fn get_git_repository(
        &self,
        owner: &Person,
        project: &Project,
    ) -> Result<Option<GitRepository>, LpError>;

    /// All refs of a repository.
    async fn get_git_refs(&self, repo: &GitRepository) -> Result<Vec<GitRef>, LpError>;

    /// Request a new code import mirroring `url` into the project, returning
    /// the backing git repository.
    async fn import_repository(
        &self,
        owner: &Person,
        project: &Project,
        url: &str,
    ) -> Result<GitRepository, LpError>;

    /// Make `repo` the default repository for `project`.
    async fn set_default_repository(
        &self,
        project: &Project,
        repo: &GitRepository,
    ) -> Result<(), LpError>;

    /// Set the project's VCS to Git.
    async fn set_project_vcs_git(&self, project: &Project) -> Result<(), LpError>;

    /// All charm recipes owned by `owner` for `project`.
    async fn get_charm_recipes(
        &self,
        owner: &Person,
        project: &Project,
    ) -> Result<Vec<CharmRecipe>, LpError>;

    /// Create a recipe.
    async fn create_recipe<'a>(&self, req: NewCharmRecipe<'a>) -> Result<CharmRecipe, LpError>;

    /// Apply a partial update to a recipe.
    async fn update_recipe(
        &self,
        recipe: &CharmRecipe,
        patch: &RecipePatch,
    ) -> Result<CharmRecipe, LpError>;

    /// Delete a recipe.
    async fn delete_recipe(&self, recipe: &CharmRecipe) -> Result<(), LpError>;

    /// Builds of a recipe, most recent first.
    async fn get_builds(&self, recipe: &CharmRecipe) -> Result<Vec<Build>, LpError>;

    /// Request new builds of a recipe with the given builder channels.
    async fn request_builds(
        &self,
        recipe: &CharmRecipe,
        channels: &BTreeMap<String, String>,
    ) -> Result<BuildRequest, LpError>;

    /// Start the store-upload authorization flow, returning the serialized
    /// macaroon the service hands back.
    async fn begin_authorization(&self, recipe: &CharmRecipe) -> Result<String, LpError>;

    /// Finish the store-upload authorization flow with a discharge macaroon.
    async fn complete_authorization(
        &self,
        recipe: &CharmRecipe,
        discharge_macaroon: &str,
    ) -> Result<(), LpError>;

    /// Fetch a build log as text.
    async fn fetch_build_log(&self, url: &str) -> Result<String, LpError>;
}
