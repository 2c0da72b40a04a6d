use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use charm_recipe_sync::load_config::{file_config, group_config_files, load_group_config};

const GROUP_YAML: &str = r#"
defaults:
  team: openstack-charmers
  branches:
    main:
      channels:
        - latest/edge
projects:
  - name: Awesome Charm
    charmhub: awesome
    launchpad: charm-awesome
    repository: "https://github.com/openstack/charm-awesome"
  - name: Other Charm
    charmhub: other
    launchpad: charm-other
    team: other-charmers
    repository: "https://github.com/openstack/charm-other"
    branches:
      stable/xena:
        channels:
          - xena/edge
        build-path: charms/other
        auto-build: false
"#;

#[test]
fn load_group_config_applies_defaults() {
    let dir = tempdir().expect("temp dir");
    fs::write(dir.path().join("openstack.yaml"), GROUP_YAML).expect("write config");

    let files = group_config_files(dir.path(), &[]).expect("files discovered");
    assert_eq!(files.len(), 1);
    let config = load_group_config(&files).expect("config loads");

    let projects: Vec<_> = config.projects(None).collect();
    assert_eq!(projects.len(), 2);

    let awesome = &projects[0];
    assert_eq!(awesome.charmhub_name, "awesome");
    assert_eq!(awesome.team, "openstack-charmers", "team from defaults");
    assert_eq!(awesome.project_group, "openstack");
    let main = awesome
        .branches
        .get("refs/heads/main")
        .expect("default branches applied");
    assert_eq!(main.channels[0].to_string(), "latest/edge");
    assert!(main.auto_build);

    let other = &projects[1];
    assert_eq!(other.team, "other-charmers", "own team wins over defaults");
    let xena = other
        .branches
        .get("refs/heads/stable/xena")
        .expect("own branches win over defaults");
    assert_eq!(xena.build_path.as_deref(), Some("charms/other"));
    assert!(!xena.auto_build);
    assert!(other.branches.get("refs/heads/main").is_none());
}

#[test]
fn named_group_files_must_exist() {
    let dir = tempdir().expect("temp dir");
    fs::write(dir.path().join("openstack.yaml"), GROUP_YAML).expect("write config");

    let err = group_config_files(dir.path(), &["ceph".to_string()]).unwrap_err();
    assert!(err.to_string().contains("wasn't found"), "got: {err}");

    let files = group_config_files(dir.path(), &["openstack".to_string()]).expect("named group");
    assert_eq!(files.len(), 1);
}

#[test]
fn invalid_yaml_is_a_parse_error() {
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("broken.yaml");
    fs::write(&file, "not-yaml: [:::").expect("write config");

    let err = load_group_config(&[file]).unwrap_err();
    assert!(
        format!("{err:#}").contains("parse"),
        "parse error expected, got: {err:#}"
    );
}

#[test]
fn invalid_channel_risk_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let file = dir.path().join("group.yaml");
    fs::write(
        &file,
        r#"
defaults:
  team: openstack-charmers
projects:
  - name: Awesome Charm
    charmhub: awesome
    launchpad: charm-awesome
    repository: "https://github.com/openstack/charm-awesome"
    branches:
      main:
        channels:
          - latest/bogus
"#,
    )
    .expect("write config");

    let err = load_group_config(&[file]).unwrap_err();
    assert!(
        format!("{err:#}").contains("invalid risk"),
        "got: {err:#}"
    );
}

#[test]
fn duplicate_projects_across_files_are_rejected() {
    let dir = tempdir().expect("temp dir");
    let first = dir.path().join("a.yaml");
    let second = dir.path().join("b.yaml");
    fs::write(&first, GROUP_YAML).expect("write config");
    fs::write(&second, GROUP_YAML).expect("write config");

    let err = load_group_config(&[first, second]).unwrap_err();
    assert!(
        format!("{err:#}").contains("already exists"),
        "got: {err:#}"
    );
}

#[test]
#[serial]
fn file_config_reads_the_xdg_location() {
    let dir = tempdir().expect("temp dir");
    let app_dir = dir.path().join("charm-recipe-sync");
    fs::create_dir_all(&app_dir).expect("config dir");
    fs::write(
        app_dir.join("config.yaml"),
        "config_dir: /srv/lp-builder-config\nlog_level: DEBUG\nignore_errors: true\n",
    )
    .expect("write config");

    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    let config = file_config();
    std::env::remove_var("XDG_CONFIG_HOME");

    assert_eq!(
        config.config_dir.as_deref(),
        Some(std::path::Path::new("/srv/lp-builder-config"))
    );
    assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
    assert!(config.ignore_errors);
}

#[test]
#[serial]
fn missing_file_config_yields_defaults() {
    let dir = tempdir().expect("temp dir");
    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    let config = file_config();
    std::env::remove_var("XDG_CONFIG_HOME");

    assert!(config.config_dir.is_none());
    assert!(config.log_level.is_none());
    assert!(!config.ignore_errors);
}
