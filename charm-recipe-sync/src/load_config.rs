//! `load_config` module: loads the per-user file config and the group config
//! YAML files into the typed model from `charm-recipe-core`.
//!
//! This is the only place where untrusted YAML is parsed and mapped to rich,
//! strongly-typed internal structs. Any failure in loading must result in
//! clear diagnostics, so all errors use `anyhow` for context and are
//! surfaced at the CLI boundary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use charm_recipe_core::config::{CharmProject, GroupConfig, ProjectGroupFile};

const APP_DIR: &str = "charm-recipe-sync";
const GROUP_EXTENSION: &str = "yaml";

/// Defaults from the per-user config file, all optional.
#[derive(Debug, Default)]
pub struct FileConfig {
    pub config_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub ignore_errors: bool,
}

fn user_config_file() -> Option<PathBuf> {
    let root = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()?,
    };
    Some(root.join(APP_DIR).join("config.yaml"))
}

/// Read the user config file, if it exists, and return any set items.
///
/// A broken file is logged and ignored; it must never stop the CLI.
pub fn file_config() -> FileConfig {
    #[derive(Debug, Default, Deserialize)]
    struct RawFileConfig {
        config_dir: Option<PathBuf>,
        log_level: Option<String>,
        #[serde(default)]
        ignore_errors: bool,
    }

    let path = match user_config_file() {
        Some(path) if path.is_file() => path,
        _ => return FileConfig::default(),
    };
    let raw: RawFileConfig = match fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_yaml::from_str(&content).map_err(anyhow::Error::from))
    {
        Ok(raw) => raw,
        Err(e) => {
            error!(config_path = ?path, error = %e, "couldn't read user config file");
            return FileConfig::default();
        }
    };
    info!(config_path = ?path, "loaded user config file");
    FileConfig {
        config_dir: raw.config_dir,
        log_level: raw.log_level,
        ignore_errors: raw.ignore_errors,
    }
}

/// Fetch the list of group config files to load.
///
/// With no group names, every `*.yaml` in the config dir is used; named
/// groups must exist as `<name>.yaml` files.
pub fn group_config_files(config_dir: &Path, group_names: &[String]) -> Result<Vec<PathBuf>> {
    if group_names.is_empty() {
        let mut files: Vec<PathBuf> = fs::read_dir(config_dir)
            .with_context(|| format!("failed to list config dir {config_dir:?}"))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().map(|e| e == GROUP_EXTENSION).unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    } else {
        let mut files = Vec::new();
        for group in group_names {
            let file = config_dir.join(format!("{group}.{GROUP_EXTENSION}"));
            if !file.is_file() {
                bail!("the group config file {file:?} wasn't found");
            }
            files.push(file);
        }
        Ok(files)
    }
}

/// Load the group config files into a [`GroupConfig`].
///
/// `defaults` entries are folded into every project of the same file; a
/// project declared twice is an error (per-file merge never happens
/// implicitly).
pub fn load_group_config(files: &[PathBuf]) -> Result<GroupConfig> {
    let mut group_config = GroupConfig::default();
    for file in files {
        info!(config_path = ?file, "loading group configuration from file");
        let content = fs::read_to_string(file)
            .with_context(|| format!("failed to read config file {file:?}"))?;
        let parsed: ProjectGroupFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config YAML {file:?}"))?;
        let group = file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("default");
        let ProjectGroupFile { defaults, projects } = parsed;
        for entry in projects {
            let name = entry.name.clone();
            let project = CharmProject::from_entry(entry, &defaults, group)
                .with_context(|| format!("invalid project {name:?} in {file:?}"))?;
            group_config
                .add_project(project, false)
                .with_context(|| format!("while loading {file:?}"))?;
        }
    }
    Ok(group_config)
}
