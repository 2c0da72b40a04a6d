//! Build inspection and build requesting for charm recipes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{branch_short_name, CharmProject};
use crate::contract::{Build, CharmRecipe, Launchpad, LpError};
use crate::sync::{inspect_project, ProjectState};

// build states as the service reports them
pub const BUILD_SUCCESSFUL: &str = "Successfully built";
pub const CURRENTLY_BUILDING: &str = "Currently building";
pub const UPLOADING_BUILD: &str = "Uploading build";
pub const NEEDS_BUILDING: &str = "Needs building";
pub const FAILED_TO_BUILD: &str = "Failed to build";
pub const FAILED_TO_UPLOAD: &str = "Failed to upload";

pub const STORE_UPLOADED: &str = "Uploaded";

const ERROR_PATTERNS: &str = "(ERROR|ModuleNotFoundError)";

/// One reportable build: the newest build of a recipe on a series/arch.
#[derive(Debug, Clone, Serialize)]
pub struct BuildRow {
    pub recipe: String,
    pub store_channels: Vec<String>,
    pub series_arch: String,
    pub arch_tag: String,
    pub buildstate: String,
    pub datebuilt: Option<DateTime<Utc>>,
    pub revision_id: Option<String>,
    pub store_upload_status: Option<String>,
    pub store_upload_revision: Option<i64>,
    pub store_upload_error_message: Option<String>,
    pub build_log_url: Option<String>,
    pub errors_detected: Vec<String>,
}

/// Collect the builds of interest for one project.
///
/// Only builds of each recipe's newest revision are considered: the build
/// list arrives newest first, so the walk stops at the first revision
/// change. Per series/arch only the newest build is kept.
pub async fn collect_builds<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    channel_filter: Option<&[String]>,
    arch_tag: Option<&str>,
    detect_error: bool,
) -> Result<Vec<BuildRow>, LpError> {
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
    let mut recipes = lp.get_charm_recipes(&team, &lp_project).await?;
    recipes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut rows = Vec::new();
    for recipe in &recipes {
        if let Some(filter) = channel_filter {
            if !filter.iter().any(|c| recipe.store_channels.contains(c)) {
                debug!(
                    recipe = %recipe.name,
                    channels = ?recipe.store_channels,
                    "skipping recipe, no channel filter match"
                );
                continue;
            }
        }

        debug!(recipe = %recipe.name, "getting builds for recipe");
        let builds = lp.get_builds(recipe).await?;
        let mut newest_revision: Option<String> = None;
        let mut per_arch: BTreeMap<String, Build> = BTreeMap::new();
        for build in builds {
            if let Some(arch) = arch_tag {
                if arch != build.arch_tag {
                    debug!(
                        recipe = %recipe.name,
                        arch = %build.arch_tag,
                        "skipping build, architecture filtered"
                    );
                    continue;
                }
            }
            // newer commits supersede everything after them in the list
            if let Some(prev) = newest_revision.as_deref() {
                if build.revision_id.as_deref() != Some(prev) {
                    debug!(
                        recipe = %recipe.name,
                        previous = %prev,
                        "stopping walk, revision changed"
                    );
                    break;
                }
            }
            newest_revision = build.revision_id.clone();

            let series_arch = format!("{}/{}", build.series_name, build.arch_tag);
            info!(
                recipe = %recipe.name,
                series_arch = %series_arch,
                channels = ?recipe.store_channels,
                "found build"
            );
            let supersedes = match per_arch.get(&series_arch) {
                Some(existing) => build.datebuilt.is_some() && existing.datebuilt < build.datebuilt,
                None => true,
            };
            if supersedes {
                per_arch.insert(series_arch, build);
            }
        }

        for (series_arch, build) in per_arch {
            let errors_detected = if detect_error && build.buildstate != BUILD_SUCCESSFUL {
                match &build.build_log_url {
                    Some(url) => detect_build_errors(lp, url).await?,
                    None => Vec::new(),
                }
            } else {
                Vec::new()
            };
            rows.push(BuildRow {
                recipe: recipe.name.clone(),
                store_channels: recipe.store_channels.clone(),
                series_arch,
                arch_tag: build.arch_tag,
                buildstate: build.buildstate,
                datebuilt: build.datebuilt,
                revision_id: build.revision_id,
                store_upload_status: build.store_upload_status,
                store_upload_revision: build.store_upload_revision,
                store_upload_error_message: build.store_upload_error_message,
                build_log_url: build.build_log_url,
                errors_detected,
            });
        }
    }
    Ok(rows)
}

/// Scan a build log for error markers.
async fn detect_build_errors<L: Launchpad>(lp: &L, url: &str) -> Result<Vec<String>, LpError> {
    let pattern = Regex::new(ERROR_PATTERNS).expect("static pattern");
    let log = lp.fetch_build_log(url).await?;
    Ok(log
        .lines()
        .filter(|line| pattern.is_match(line))
        .map(|line| line.to_string())
        .collect())
}

/// Whether a recipe's latest build still counts.
///
/// A build is invalid when the recipe is authorized for store uploads but
/// the build never produced a store revision and is not in progress, when
/// the build outright failed, or when the recipe is stale (the branch moved
/// since the build).
pub fn is_build_valid(build: &Build, recipe: &CharmRecipe) -> bool {
    debug!(
        can_upload = recipe.can_upload_to_store,
        store_revision = ?build.store_upload_revision,
        state = %build.buildstate,
        stale = recipe.is_stale,
        "checking build validity"
    );
    let in_progress = matches!(
        build.buildstate.as_str(),
        CURRENTLY_BUILDING | UPLOADING_BUILD | NEEDS_BUILDING
    );
    if recipe.can_upload_to_store && build.store_upload_revision.is_none() && !in_progress {
        false
    } else if matches!(
        build.buildstate.as_str(),
        FAILED_TO_BUILD | FAILED_TO_UPLOAD
    ) {
        false
    } else {
        !recipe.is_stale
    }
}

/// Result of a build request attempt for one recipe.
#[derive(Debug, Serialize)]
pub struct RequestedBuild {
    pub recipe: String,
    pub branch: String,
    pub dry_run: bool,
    pub web_link: Option<String>,
}

/// Request builds for the recipes built from the given branches.
///
/// Without `force`, a build is only requested when the recipe's latest
/// build is no longer valid (see [`is_build_valid`]); a recipe with no
/// builds at all always qualifies.
pub async fn request_builds_for_branches<L: Launchpad>(
    lp: &L,
    project: &CharmProject,
    branches: Option<&[String]>,
    force: bool,
    dry_run: bool,
) -> Result<Vec<RequestedBuild>, LpError> {
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

    let mut requested = Vec::new();
    for planned in &plan.recipes {
        let recipe = match &planned.current {
            Some(recipe) => recipe,
            None => {
                debug!(recipe = %planned.desired.name, "recipe does not exist, nothing to build");
                continue;
            }
        };
        let do_build = if force {
            debug!(recipe = %recipe.name, "forcing build of recipe");
            true
        } else {
            let builds = lp.get_builds(recipe).await?;
            match builds.first() {
                Some(latest) => !is_build_valid(latest, recipe),
                None => true,
            }
        };
        if !do_build {
            debug!(recipe = %recipe.name, "not required to build");
            continue;
        }

        let branch = branch_short_name(&planned.desired.ref_path).to_string();
        if dry_run {
            info!(recipe = %recipe.name, "new build needed (dry-run)");
            requested.push(RequestedBuild {
                recipe: recipe.name.clone(),
                branch,
                dry_run: true,
                web_link: None,
            });
        } else {
            // pass the recipe's own builder channels or the overrides are lost
            let request = lp
                .request_builds(recipe, &recipe.auto_build_channels)
                .await?;
            info!(recipe = %recipe.name, request = %request.web_link, "new build requested");
            requested.push(RequestedBuild {
                recipe: recipe.name.clone(),
                branch,
                dry_run: false,
                web_link: Some(request.web_link),
            });
        }
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(state: &str, store_revision: Option<i64>) -> Build {
        Build {
            arch_tag: "amd64".to_string(),
            series_name: "jammy".to_string(),
            buildstate: state.to_string(),
            datebuilt: None,
            revision_id: Some("deadbeef".to_string()),
            store_upload_status: None,
            store_upload_revision: store_revision,
            store_upload_error_message: None,
            build_log_url: None,
            web_link: "https://example.test/build/1".to_string(),
            self_link: "https://api.example.test/build/1".to_string(),
        }
    }

    fn recipe(can_upload: bool, stale: bool) -> CharmRecipe {
        CharmRecipe {
            name: "charm-awesome.main.latest".to_string(),
            owner_link: String::new(),
            project_link: String::new(),
            git_ref_link: None,
            git_path: Some("refs/heads/main".to_string()),
            auto_build: true,
            auto_build_channels: BTreeMap::new(),
            build_path: None,
            store_upload: true,
            store_name: Some("awesome".to_string()),
            store_channels: vec!["latest/edge".to_string()],
            can_upload_to_store: can_upload,
            is_stale: stale,
            web_link: String::new(),
            self_link: String::new(),
        }
    }

    #[test]
    fn uploaded_build_of_fresh_recipe_is_valid() {
        assert!(is_build_valid(
            &build(BUILD_SUCCESSFUL, Some(42)),
            &recipe(true, false)
        ));
    }

    #[test]
    fn authorized_recipe_without_store_revision_is_invalid() {
        assert!(!is_build_valid(
            &build(BUILD_SUCCESSFUL, None),
            &recipe(true, false)
        ));
    }

    #[test]
    fn in_progress_build_is_still_valid() {
        assert!(is_build_valid(
            &build(CURRENTLY_BUILDING, None),
            &recipe(true, false)
        ));
    }

    #[test]
    fn failed_build_is_invalid() {
        assert!(!is_build_valid(
            &build(FAILED_TO_BUILD, Some(42)),
            &recipe(false, false)
        ));
        assert!(!is_build_valid(
            &build(FAILED_TO_UPLOAD, Some(42)),
            &recipe(false, false)
        ));
    }

    #[test]
    fn stale_recipe_invalidates_its_build() {
        assert!(!is_build_valid(
            &build(BUILD_SUCCESSFUL, Some(42)),
            &recipe(true, true)
        ));
    }

    #[test]
    fn unauthorized_recipe_build_without_revision_is_valid() {
        assert!(is_build_valid(
            &build(BUILD_SUCCESSFUL, None),
            &recipe(false, false)
        ));
    }
}
