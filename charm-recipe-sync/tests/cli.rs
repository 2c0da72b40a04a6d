use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

/// Creates a minimal group config for the CLI to read.
fn write_group_config(dir: &Path) {
    fs::write(
        dir.join("openstack.yaml"),
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
          - latest/edge
"#,
    )
    .expect("writing group config failed");
}

fn cli(config_dir: &Path, xdg_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("charm-recipe-sync").expect("binary exists");
    // isolate from any real user config
    cmd.env("XDG_CONFIG_HOME", xdg_home.path());
    cmd.arg("--config-dir").arg(config_dir);
    cmd
}

#[test]
fn list_shows_configured_charms() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .arg("list")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("awesome")
                .and(predicate::str::contains("openstack-charmers"))
                .and(predicate::str::contains("Charmhub name")),
        );
}

#[test]
fn list_json_serialises_the_projects() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .args(["--format", "json", "list"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"charmhub_name\": \"awesome\"")
                .and(predicate::str::contains("refs/heads/main")),
        );
}

#[test]
fn sync_requires_the_confirmation_flag() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--i-really-mean-it"));
}

#[test]
fn delete_requires_the_confirmation_flag() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .args(["delete", "--name", "charm-awesome.main.latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--i-really-mean-it"));
}

#[test]
fn missing_config_dir_is_an_error() {
    let home = tempdir().expect("temp dir");
    let mut cmd = Command::cargo_bin("charm-recipe-sync").expect("binary exists");
    cmd.env("XDG_CONFIG_HOME", home.path());
    cmd.args(["--config-dir", "/nonexistent/lp-builder-config", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn unknown_charm_selector_is_an_error() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .args(["--charm", "no-such-charm", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no charms found"));
}

#[test]
fn unknown_group_is_an_error() {
    let config = tempdir().expect("temp dir");
    let home = tempdir().expect("temp dir");
    write_group_config(config.path());

    cli(config.path(), &home)
        .args(["--group", "ceph", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wasn't found"));
}

#[test]
fn help_lists_all_subcommands() {
    let mut cmd = Command::cargo_bin("charm-recipe-sync").expect("binary exists");
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("show")
            .and(predicate::str::contains("diff"))
            .and(predicate::str::contains("sync"))
            .and(predicate::str::contains("check-builds"))
            .and(predicate::str::contains("request-build"))
            .and(predicate::str::contains("authorize")),
    );
}
