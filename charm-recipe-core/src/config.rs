//! Declarative configuration model for charm projects.
//!
//! A *group config* YAML file declares a set of charm projects: which team
//! owns them, where the upstream git repository lives, and which branches
//! should have build recipes publishing to which channels. The YAML-side
//! types here (`ProjectGroupFile`, `ProjectEntry`, `BranchSpec`) deserialize
//! the files; `CharmProject` and `GroupConfig` are the validated runtime
//! model the rest of the crate works from.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::Channel;

pub const DEFAULT_RECIPE_FORMAT: &str = "{project}.{branch}.{track}";

const GIT_REF_PREFIX: &str = "refs/heads/";

/// charmhub and launchpad project names share the same shape.
const NAME_PATTERN: &str = r"^[a-z][a-z0-9_\-]+$";

#[derive(Debug)]
pub enum ConfigError {
    InvalidName { field: &'static str, value: String },
    MissingTeam { project: String },
    DuplicateProject { name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidName { field, value } => {
                write!(f, "invalid {field} name: {value:?}")
            }
            ConfigError::MissingTeam { project } => {
                write!(f, "project {project:?} has no team (set one or a defaults.team)")
            }
            ConfigError::DuplicateProject { name } => {
                write!(f, "project config for {name:?} already exists")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Recipe settings for a single git branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct BranchSpec {
    /// Channels the built charm is published to, e.g. `latest/edge`.
    pub channels: Vec<Channel>,
    /// Subdirectory within the branch containing metadata.yaml.
    pub build_path: Option<String>,
    /// Format string for the recipe name; `{project}`, `{branch}` and
    /// `{track}` are substituted.
    pub recipe_name: String,
    /// Build automatically when the branch changes.
    pub auto_build: bool,
    /// Upload the built charm to the store.
    pub upload: bool,
    /// Channels the launchpad builder itself uses (key is a snap or base
    /// name such as `charmcraft` or `core22`).
    pub build_channels: BTreeMap<String, String>,
}

impl Default for BranchSpec {
    fn default() -> Self {
        BranchSpec {
            channels: Vec::new(),
            build_path: None,
            recipe_name: DEFAULT_RECIPE_FORMAT.to_string(),
            auto_build: true,
            upload: true,
            build_channels: BTreeMap::new(),
        }
    }
}

/// The `defaults` section of a group config file, merged into every project.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupDefaults {
    pub team: Option<String>,
    pub branches: Option<BTreeMap<String, BranchSpec>>,
}

/// One project as declared in a group config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub charmhub: String,
    pub launchpad: String,
    pub repository: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub branches: Option<BTreeMap<String, BranchSpec>>,
}

/// Top-level shape of a group config YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectGroupFile {
    #[serde(default)]
    pub defaults: GroupDefaults,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// A validated charm project: the desired state for one charm.
#[derive(Debug, Clone, Serialize)]
pub struct CharmProject {
    /// Human-friendly name.
    pub name: String,
    /// Launchpad team owning the repository and recipes.
    pub team: String,
    /// Name in the charmhub store.
    pub charmhub_name: String,
    /// Launchpad project name.
    pub launchpad_project: String,
    /// Upstream repository URL mirrored into launchpad.
    pub repository: String,
    /// Stem of the group config file this project came from.
    pub project_group: String,
    /// Branch specs keyed by full git ref path (`refs/heads/<branch>`).
    pub branches: BTreeMap<String, BranchSpec>,
}

impl CharmProject {
    /// Build a validated project from a YAML entry plus the group defaults.
    pub fn from_entry(
        entry: ProjectEntry,
        defaults: &GroupDefaults,
        project_group: &str,
    ) -> Result<CharmProject, ConfigError> {
        let name_re = Regex::new(NAME_PATTERN).expect("static pattern");
        if !name_re.is_match(&entry.charmhub) {
            return Err(ConfigError::InvalidName {
                field: "charmhub",
                value: entry.charmhub,
            });
        }
        if !name_re.is_match(&entry.launchpad) {
            return Err(ConfigError::InvalidName {
                field: "launchpad",
                value: entry.launchpad,
            });
        }
        let team = entry
            .team
            .or_else(|| defaults.team.clone())
            .ok_or_else(|| ConfigError::MissingTeam {
                project: entry.name.clone(),
            })?;
        let branches = entry
            .branches
            .or_else(|| defaults.branches.clone())
            .unwrap_or_default();
        debug!(project = %entry.name, branches = branches.len(), "loaded project entry");
        Ok(CharmProject {
            name: entry.name,
            team,
            charmhub_name: entry.charmhub,
            launchpad_project: entry.launchpad,
            repository: entry.repository,
            project_group: project_group.to_string(),
            branches: branches
                .into_iter()
                .map(|(branch, spec)| (git_ref_path(&branch), spec))
                .collect(),
        })
    }

    /// Overwrite this project's fields with another definition of the same
    /// project and fold in its branches.
    pub fn merge(&mut self, other: CharmProject) {
        self.name = other.name;
        self.team = other.team;
        self.charmhub_name = other.charmhub_name;
        self.launchpad_project = other.launchpad_project;
        self.repository = other.repository;
        self.branches.extend(other.branches);
    }

    fn matches(&self, select: &[String]) -> bool {
        select
            .iter()
            .any(|s| *s == self.launchpad_project || *s == self.charmhub_name)
    }
}

/// All charm projects loaded from one or more group config files, in file
/// order.
#[derive(Debug, Default)]
pub struct GroupConfig {
    projects: Vec<CharmProject>,
}

impl GroupConfig {
    /// Add a project, or merge it into an existing one of the same name when
    /// `merge` is set.
    pub fn add_project(&mut self, project: CharmProject, merge: bool) -> Result<(), ConfigError> {
        match self.projects.iter_mut().find(|p| p.name == project.name) {
            Some(existing) => {
                if merge {
                    existing.merge(project);
                    Ok(())
                } else {
                    Err(ConfigError::DuplicateProject { name: project.name })
                }
            }
            None => {
                self.projects.push(project);
                Ok(())
            }
        }
    }

    /// Iterate projects, optionally narrowed to those whose charmhub or
    /// launchpad name appears in `select`.
    pub fn projects<'a>(
        &'a self,
        select: Option<&'a [String]>,
    ) -> impl Iterator<Item = &'a CharmProject> {
        self.projects.iter().filter(move |p| match select {
            Some(names) if !names.is_empty() => p.matches(names),
            _ => true,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Normalise a branch name to its full git ref path.
pub fn git_ref_path(branch: &str) -> String {
    if branch.starts_with(GIT_REF_PREFIX) {
        branch.to_string()
    } else {
        format!("{GIT_REF_PREFIX}{branch}")
    }
}

/// Short branch name from a full git ref path.
pub fn branch_short_name(ref_path: &str) -> &str {
    ref_path.strip_prefix(GIT_REF_PREFIX).unwrap_or(ref_path)
}

/// Expand a recipe-name format string. Slashes in the branch name are
/// replaced as launchpad forbids them in recipe names.
pub fn format_recipe_name(format: &str, project: &str, branch: &str, track: &str) -> String {
    format
        .replace("{project}", project)
        .replace("{branch}", &branch.replace('/', "-"))
        .replace("{track}", track)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> ProjectEntry {
        ProjectEntry {
            name: name.to_string(),
            charmhub: "awesome".to_string(),
            launchpad: "charm-awesome".to_string(),
            repository: "https://github.com/example/charm-awesome".to_string(),
            team: None,
            branches: None,
        }
    }

    fn defaults_with_team() -> GroupDefaults {
        GroupDefaults {
            team: Some("awesome-charmers".to_string()),
            branches: None,
        }
    }

    #[test]
    fn team_falls_back_to_defaults() {
        let project = CharmProject::from_entry(entry("Awesome"), &defaults_with_team(), "group")
            .expect("valid entry");
        assert_eq!(project.team, "awesome-charmers");
        assert_eq!(project.project_group, "group");
    }

    #[test]
    fn missing_team_is_an_error() {
        let err = CharmProject::from_entry(entry("Awesome"), &GroupDefaults::default(), "group")
            .unwrap_err();
        assert!(err.to_string().contains("no team"));
    }

    #[test]
    fn branch_keys_are_normalised_to_ref_paths() {
        let mut e = entry("Awesome");
        let mut branches = BTreeMap::new();
        branches.insert(
            "stable/xena".to_string(),
            BranchSpec {
                channels: vec![Channel::parse("xena/edge").unwrap()],
                ..BranchSpec::default()
            },
        );
        e.branches = Some(branches);
        let project =
            CharmProject::from_entry(e, &defaults_with_team(), "group").expect("valid entry");
        assert!(project.branches.contains_key("refs/heads/stable/xena"));
    }

    #[test]
    fn invalid_charmhub_name_is_rejected() {
        let mut e = entry("Awesome");
        e.charmhub = "Not Valid".to_string();
        let err = CharmProject::from_entry(e, &defaults_with_team(), "group").unwrap_err();
        assert!(err.to_string().contains("charmhub"));
    }

    #[test]
    fn duplicate_project_requires_merge() {
        let mut gc = GroupConfig::default();
        let project = CharmProject::from_entry(entry("Awesome"), &defaults_with_team(), "group")
            .expect("valid entry");
        gc.add_project(project.clone(), false).expect("first add");
        assert!(gc.add_project(project.clone(), false).is_err());
        gc.add_project(project, true).expect("merge add");
        assert_eq!(gc.projects(None).count(), 1);
    }

    #[test]
    fn selector_matches_charmhub_or_launchpad_name() {
        let mut gc = GroupConfig::default();
        let project = CharmProject::from_entry(entry("Awesome"), &defaults_with_team(), "group")
            .expect("valid entry");
        gc.add_project(project, false).expect("add");
        let select = vec!["awesome".to_string()];
        assert_eq!(gc.projects(Some(&select)).count(), 1);
        let select = vec!["charm-awesome".to_string()];
        assert_eq!(gc.projects(Some(&select)).count(), 1);
        let select = vec!["other".to_string()];
        assert_eq!(gc.projects(Some(&select)).count(), 0);
    }

    #[test]
    fn recipe_name_formatting_replaces_slashes() {
        let name = format_recipe_name(DEFAULT_RECIPE_FORMAT, "charm-awesome", "stable/xena", "xena");
        assert_eq!(name, "charm-awesome.stable-xena.xena");
    }

    #[test]
    fn branch_spec_defaults() {
        let spec = BranchSpec::default();
        assert!(spec.auto_build);
        assert!(spec.upload);
        assert_eq!(spec.recipe_name, DEFAULT_RECIPE_FORMAT);
    }
}
