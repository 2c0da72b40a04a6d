//! Pure diff engine: desired recipes versus fetched recipes.
//!
//! [`plan_recipes`] computes, entirely from in-memory inputs, which recipes
//! must be created, updated or deleted to converge the remote state to the
//! configuration. The sync layer applies a plan; the diff/show commands only
//! render it.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::channel::group_by_track;
use crate::config::{branch_short_name, format_recipe_name, CharmProject};
use crate::contract::{CharmRecipe, GitRef, RecipePatch};

/// A recipe the configuration says should exist.
#[derive(Debug, Clone, Serialize)]
pub struct DesiredRecipe {
    pub name: String,
    /// Full ref path of the branch the recipe builds from.
    pub ref_path: String,
    pub git_ref: GitRef,
    /// The single track this recipe targets.
    pub track: String,
    pub store_channels: Vec<String>,
    pub auto_build: bool,
    pub auto_build_channels: BTreeMap<String, String>,
    pub build_path: Option<String>,
    pub store_upload: bool,
}

/// What has to happen to one desired recipe.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecipeAction {
    Create,
    Update {
        patch: RecipePatch,
        changes: Vec<String>,
    },
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedRecipe {
    pub desired: DesiredRecipe,
    /// The recipe as fetched, when one of the desired name exists.
    pub current: Option<CharmRecipe>,
    pub action: RecipeAction,
}

/// The full reconciliation plan for one project's repository.
#[derive(Debug, Default, Serialize)]
pub struct RecipePlan {
    pub recipes: Vec<PlannedRecipe>,
    /// Fetched recipes no desired recipe claimed; deletion candidates.
    pub unknown: Vec<CharmRecipe>,
    /// Config branches with no matching ref in the repository (sorted).
    pub missing_branches: Vec<String>,
    /// Repository refs the config says nothing about.
    pub unmanaged_refs: Vec<String>,
}

impl RecipePlan {
    /// True when any recipe needs creating or updating.
    pub fn has_changes(&self) -> bool {
        self.recipes
            .iter()
            .any(|r| !matches!(r.action, RecipeAction::Unchanged))
    }

    /// True when converged: nothing to create, update or delete.
    pub fn is_noop(&self) -> bool {
        !self.has_changes() && self.unknown.is_empty()
    }
}

/// Field-by-field diff of a fetched recipe against its desired state.
///
/// Returns the patch to apply plus human-readable change descriptions.
pub fn diff_recipe(current: &CharmRecipe, desired: &DesiredRecipe) -> (RecipePatch, Vec<String>) {
    let mut patch = RecipePatch::default();
    let mut changes = Vec::new();

    if current.auto_build != desired.auto_build {
        changes.push(format!("recipe.auto_build = {}", desired.auto_build));
        patch.auto_build = Some(desired.auto_build);
    }
    if current.auto_build_channels != desired.auto_build_channels {
        changes.push(format!(
            "recipe.auto_build_channels = {:?}",
            desired.auto_build_channels
        ));
        patch.auto_build_channels = Some(desired.auto_build_channels.clone());
    }
    if current.build_path != desired.build_path {
        changes.push(format!("recipe.build_path = {:?}", desired.build_path));
        patch.build_path = Some(desired.build_path.clone());
    }
    if current.store_upload != desired.store_upload {
        changes.push(format!("recipe.store_upload = {}", desired.store_upload));
        patch.store_upload = Some(desired.store_upload);
    }
    if current.store_channels != desired.store_channels {
        changes.push(format!(
            "recipe.store_channels = {:?}",
            desired.store_channels
        ));
        patch.store_channels = Some(desired.store_channels.clone());
    }

    (patch, changes)
}

/// Compute the reconciliation plan for one project.
///
/// `filter_branches` narrows the planned recipes to the given short branch
/// names. Matching happens before filtering so a filtered-out recipe is
/// never misclassified as unknown.
pub fn plan_recipes(
    project: &CharmProject,
    refs: &[GitRef],
    recipes: Vec<CharmRecipe>,
    filter_branches: Option<&[String]>,
) -> RecipePlan {
    let mut by_name: BTreeMap<String, CharmRecipe> =
        recipes.into_iter().map(|r| (r.name.clone(), r)).collect();
    let mut plan = RecipePlan::default();
    let mut mentioned: HashSet<&str> = HashSet::new();

    for git_ref in refs {
        mentioned.insert(git_ref.path.as_str());
        let spec = match project.branches.get(&git_ref.path) {
            Some(spec) => spec,
            None => {
                info!(branch = %git_ref.path, "no channels configured for branch, continuing");
                plan.unmanaged_refs.push(git_ref.path.clone());
                continue;
            }
        };
        let branch_name = branch_short_name(&git_ref.path);
        let filtered = match filter_branches {
            Some(filter) => !filter.iter().any(|b| b == branch_name),
            None => false,
        };

        // One recipe per track; a branch that doesn't upload still gets a
        // single recipe on the notional 'latest' track.
        let tracks: Vec<(String, Vec<String>)> = if spec.upload && !spec.channels.is_empty() {
            group_by_track(&spec.channels)
        } else {
            vec![("latest".to_string(), Vec::new())]
        };

        for (track, track_channels) in tracks {
            let name = format_recipe_name(
                &spec.recipe_name,
                &project.launchpad_project,
                branch_name,
                &track,
            );
            // Claiming the fetched recipe must precede filtering so it does
            // not end up in the unknown set.
            let current = by_name.remove(&name);
            if filtered {
                debug!(recipe = %name, branch = %branch_name, "skipping recipe, branch filtered");
                continue;
            }
            let desired = DesiredRecipe {
                name,
                ref_path: git_ref.path.clone(),
                git_ref: git_ref.clone(),
                track,
                store_channels: track_channels,
                auto_build: spec.auto_build,
                auto_build_channels: spec.build_channels.clone(),
                build_path: spec.build_path.clone(),
                store_upload: spec.upload,
            };
            let action = match &current {
                Some(current) => {
                    let (patch, changes) = diff_recipe(current, &desired);
                    if patch.is_empty() {
                        RecipeAction::Unchanged
                    } else {
                        RecipeAction::Update { patch, changes }
                    }
                }
                None => RecipeAction::Create,
            };
            plan.recipes.push(PlannedRecipe {
                desired,
                current,
                action,
            });
        }
    }

    // BTreeMap keys keep both lists deterministically ordered.
    plan.missing_branches = project
        .branches
        .keys()
        .filter(|path| !mentioned.contains(path.as_str()))
        .cloned()
        .collect();
    plan.unknown = by_name.into_values().collect();

    debug!(
        project = %project.name,
        planned = plan.recipes.len(),
        unknown = plan.unknown.len(),
        missing = plan.missing_branches.len(),
        "computed recipe plan"
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::config::{BranchSpec, DEFAULT_RECIPE_FORMAT};

    fn project_with_branches(branches: Vec<(&str, BranchSpec)>) -> CharmProject {
        CharmProject {
            name: "Awesome Charm".to_string(),
            team: "awesome-charmers".to_string(),
            charmhub_name: "awesome".to_string(),
            launchpad_project: "charm-awesome".to_string(),
            repository: "https://github.com/example/charm-awesome".to_string(),
            project_group: "testing".to_string(),
            branches: branches
                .into_iter()
                .map(|(b, spec)| (format!("refs/heads/{b}"), spec))
                .collect(),
        }
    }

    fn spec_with_channels(channels: &[&str]) -> BranchSpec {
        BranchSpec {
            channels: channels.iter().map(|c| Channel::parse(c).unwrap()).collect(),
            ..BranchSpec::default()
        }
    }

    fn git_ref(branch: &str) -> GitRef {
        GitRef {
            path: format!("refs/heads/{branch}"),
            commit_sha1: "deadbeef".to_string(),
            self_link: format!("https://api.example.test/repo/+ref/{branch}"),
        }
    }

    fn recipe(name: &str, channels: &[&str]) -> CharmRecipe {
        CharmRecipe {
            name: name.to_string(),
            owner_link: "https://api.example.test/~awesome-charmers".to_string(),
            project_link: "https://api.example.test/charm-awesome".to_string(),
            git_ref_link: None,
            git_path: Some("refs/heads/main".to_string()),
            auto_build: true,
            auto_build_channels: BTreeMap::new(),
            build_path: None,
            store_upload: true,
            store_name: Some("awesome".to_string()),
            store_channels: channels.iter().map(|c| c.to_string()).collect(),
            can_upload_to_store: true,
            is_stale: false,
            web_link: format!("https://example.test/{name}"),
            self_link: format!("https://api.example.test/+charm-recipes/{name}"),
        }
    }

    #[test]
    fn missing_recipe_is_planned_for_creation() {
        let project =
            project_with_branches(vec![("main", spec_with_channels(&["latest/edge"]))]);
        let plan = plan_recipes(&project, &[git_ref("main")], Vec::new(), None);
        assert_eq!(plan.recipes.len(), 1);
        assert!(matches!(plan.recipes[0].action, RecipeAction::Create));
        assert_eq!(plan.recipes[0].desired.name, "charm-awesome.main.latest");
        assert!(plan.has_changes());
    }

    #[test]
    fn plan_is_noop_when_fetched_state_matches_desired() {
        let project =
            project_with_branches(vec![("main", spec_with_channels(&["latest/edge"]))]);
        let existing = recipe("charm-awesome.main.latest", &["latest/edge"]);
        let plan = plan_recipes(&project, &[git_ref("main")], vec![existing], None);
        assert!(plan.is_noop());
        assert!(matches!(plan.recipes[0].action, RecipeAction::Unchanged));
        assert!(plan.unknown.is_empty());
        assert!(plan.missing_branches.is_empty());
    }

    #[test]
    fn changed_channels_produce_an_update_with_descriptions() {
        let project =
            project_with_branches(vec![("main", spec_with_channels(&["latest/edge"]))]);
        let existing = recipe("charm-awesome.main.latest", &["latest/beta"]);
        let plan = plan_recipes(&project, &[git_ref("main")], vec![existing], None);
        match &plan.recipes[0].action {
            RecipeAction::Update { patch, changes } => {
                assert_eq!(
                    patch.store_channels,
                    Some(vec!["latest/edge".to_string()])
                );
                assert!(changes[0].contains("store_channels"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn multi_track_branch_yields_one_recipe_per_track() {
        let project = project_with_branches(vec![(
            "main",
            spec_with_channels(&["yoga/edge", "latest/edge"]),
        )]);
        let plan = plan_recipes(&project, &[git_ref("main")], Vec::new(), None);
        let names: Vec<_> = plan.recipes.iter().map(|r| r.desired.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["charm-awesome.main.yoga", "charm-awesome.main.latest"]
        );
        assert_eq!(plan.recipes[0].desired.store_channels, vec!["yoga/edge"]);
    }

    #[test]
    fn non_uploading_branch_gets_single_recipe_without_channels() {
        let mut spec = spec_with_channels(&["latest/edge"]);
        spec.upload = false;
        let project = project_with_branches(vec![("main", spec)]);
        let plan = plan_recipes(&project, &[git_ref("main")], Vec::new(), None);
        assert_eq!(plan.recipes.len(), 1);
        assert_eq!(plan.recipes[0].desired.track, "latest");
        assert!(plan.recipes[0].desired.store_channels.is_empty());
        assert!(!plan.recipes[0].desired.store_upload);
    }

    #[test]
    fn unclaimed_recipes_are_unknown() {
        let project =
            project_with_branches(vec![("main", spec_with_channels(&["latest/edge"]))]);
        let stray = recipe("charm-awesome.old-branch.latest", &["latest/edge"]);
        let plan = plan_recipes(&project, &[git_ref("main")], vec![stray], None);
        assert_eq!(plan.unknown.len(), 1);
        assert_eq!(plan.unknown[0].name, "charm-awesome.old-branch.latest");
        assert!(!plan.is_noop());
    }

    #[test]
    fn filtered_branches_still_claim_their_recipes() {
        let project = project_with_branches(vec![
            ("main", spec_with_channels(&["latest/edge"])),
            ("stable/xena", spec_with_channels(&["xena/edge"])),
        ]);
        let refs = [git_ref("main"), git_ref("stable/xena")];
        let existing = recipe("charm-awesome.stable-xena.xena", &["xena/edge"]);
        let filter = vec!["main".to_string()];
        let plan = plan_recipes(&project, &refs, vec![existing], Some(&filter));
        // only main is planned, but the xena recipe must not look deletable
        assert_eq!(plan.recipes.len(), 1);
        assert_eq!(plan.recipes[0].desired.ref_path, "refs/heads/main");
        assert!(plan.unknown.is_empty());
    }

    #[test]
    fn config_branches_absent_from_repo_are_missing() {
        let project = project_with_branches(vec![
            ("main", spec_with_channels(&["latest/edge"])),
            ("stable/zed", spec_with_channels(&["zed/edge"])),
        ]);
        let plan = plan_recipes(&project, &[git_ref("main")], Vec::new(), None);
        assert_eq!(plan.missing_branches, vec!["refs/heads/stable/zed"]);
    }

    #[test]
    fn unmanaged_refs_are_reported() {
        let project =
            project_with_branches(vec![("main", spec_with_channels(&["latest/edge"]))]);
        let refs = [git_ref("main"), git_ref("feature/wip")];
        let plan = plan_recipes(&project, &refs, Vec::new(), None);
        assert_eq!(plan.unmanaged_refs, vec!["refs/heads/feature/wip"]);
    }

    #[test]
    fn custom_recipe_name_format_is_honoured() {
        let mut spec = spec_with_channels(&["latest/edge"]);
        spec.recipe_name = "{project}-{branch}".to_string();
        let project = project_with_branches(vec![("main", spec)]);
        let plan = plan_recipes(&project, &[git_ref("main")], Vec::new(), None);
        assert_eq!(plan.recipes[0].desired.name, "charm-awesome-main");
    }

    #[test]
    fn default_recipe_format_names_project_branch_and_track() {
        let project =
            project_with_branches(vec![("stable/xena", spec_with_channels(&["xena/edge"]))]);
        let plan = plan_recipes(&project, &[git_ref("stable/xena")], Vec::new(), None);
        assert_eq!(DEFAULT_RECIPE_FORMAT, "{project}.{branch}.{track}");
        assert_eq!(plan.recipes[0].desired.name, "charm-awesome.stable-xena.xena");
    }
}
