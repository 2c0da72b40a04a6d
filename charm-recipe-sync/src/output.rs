//! User-facing rendering: plain-text tables and JSON for every command.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use charm_recipe_core::builds::{BuildRow, RequestedBuild, BUILD_SUCCESSFUL, STORE_UPLOADED};
use charm_recipe_core::config::{branch_short_name, CharmProject};
use charm_recipe_core::plan::RecipeAction;
use charm_recipe_core::sync::{
    AuthorizeOutcome, AuthorizeState, ProjectDiff, ProjectState, SyncAction, SyncOutcome,
};

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// List the configured charms, re-printing the heading every screenful.
pub fn print_list(projects: &[&CharmProject]) {
    fn heading() {
        let rule = format!("{} {} {} {}", "-".repeat(20), "-".repeat(30), "-".repeat(40), "-".repeat(10));
        println!("{rule}");
        println!(
            "{:20} {:30} {:40} {}",
            "Team", "Charmhub name", "LP Project Name", "Repository"
        );
        println!("{rule}");
    }

    for (i, project) in projects.iter().enumerate() {
        if i % 30 == 0 {
            heading();
        }
        println!(
            "{:20} {:30} {:40} {}",
            project.team,
            truncate(&project.charmhub_name, 30),
            truncate(&project.launchpad_project, 40),
            project.repository
        );
    }
}

/// Show the launchpad configuration for each charm, if any.
pub fn print_show(diffs: &[ProjectDiff]) {
    for diff in diffs {
        let plan = match &diff.state {
            ProjectState::NoProject => {
                println!(
                    "{:35} -- Project doesn't exist!!: {}",
                    truncate(&diff.charm, 35),
                    diff.launchpad_project
                );
                continue;
            }
            ProjectState::NoRepository => {
                println!("{:35} -- No repo configured!", truncate(&diff.charm, 35));
                continue;
            }
            ProjectState::Ready { plan } => plan,
        };
        println!("{}:", diff.charm);
        println!(" * launchpad project: {}", diff.launchpad_project);
        println!(" * repo: {}", diff.repository);
        let existing: Vec<_> = plan
            .recipes
            .iter()
            .filter_map(|p| p.current.as_ref())
            .collect();
        if !existing.is_empty() {
            println!(" * Recipes configured in launchpad matching channels:");
            for recipe in existing {
                let branch = recipe
                    .git_path
                    .as_deref()
                    .map(branch_short_name)
                    .unwrap_or("");
                println!(
                    "   - {:40} - git branch: {:20} channels: {}",
                    truncate(&recipe.name, 40),
                    truncate(branch, 20),
                    recipe.store_channels.join(", ")
                );
            }
        }
    }
}

/// One summary line per charm; `--detail` expands every pending change.
pub fn print_diff(diffs: &[ProjectDiff], detail: bool) {
    for diff in diffs {
        let plan = match &diff.state {
            ProjectState::NoProject => {
                println!(
                    "{:35} -- Project doesn't exist!!: {}",
                    truncate(&diff.charm, 35),
                    diff.launchpad_project
                );
                continue;
            }
            ProjectState::NoRepository => {
                println!("{:35} -- No repo configured!", truncate(&diff.charm, 35));
                continue;
            }
            ProjectState::Ready { plan } => plan,
        };
        let any_changes = plan.has_changes();
        let change_text = if any_changes || !plan.missing_branches.is_empty() {
            "Changes required"
        } else {
            "No changes needed"
        };
        let extra_text = if plan.unknown.is_empty() {
            String::new()
        } else {
            format!(" - {} extra config recipes", plan.unknown.len())
        };
        println!(
            "{:35} {:20}{}",
            truncate(&diff.charm, 35),
            change_text,
            extra_text
        );
        if !detail {
            continue;
        }
        if !plan.unknown.is_empty() {
            println!(" * Recipes that have no corresponding config:");
            for recipe in &plan.unknown {
                println!("   - {}", recipe.name);
            }
        }
        if any_changes {
            println!(" * recipes that require changes:");
            for planned in &plan.recipes {
                match &planned.action {
                    RecipeAction::Create => {
                        println!("    - {:35} : Needs creating.", planned.desired.name)
                    }
                    RecipeAction::Update { changes, .. } => println!(
                        "    - {:35} : {}",
                        planned.desired.name,
                        changes.join(",")
                    ),
                    RecipeAction::Unchanged => {}
                }
            }
        }
        if !plan.missing_branches.is_empty() {
            println!(" * missing branches in config but not in repo:");
            for branch in &plan.missing_branches {
                println!("    - {}", branch_short_name(branch));
            }
        }
    }
}

/// Render what sync did (or would do) per charm.
pub fn print_sync(outcomes: &[SyncOutcome]) {
    for outcome in outcomes {
        if outcome.no_changes {
            println!("{}: No changes needed.", outcome.charm);
            continue;
        }
        println!("{}:", outcome.charm);
        if !outcome.missing_branches.is_empty() {
            println!(" * branches configured for recipes but missing from the repository:");
            for branch in &outcome.missing_branches {
                println!("   - {}", branch_short_name(branch));
            }
        }
        let prefix = if outcome.dry_run { "would " } else { "" };
        for action in &outcome.actions {
            match action {
                SyncAction::ImportRepository { url } => {
                    println!(" - {prefix}import git repository from {url}")
                }
                SyncAction::SetDefaultRepository { repository } => {
                    println!(" - {prefix}set default repository to {repository}")
                }
                SyncAction::SetProjectVcs { project } => {
                    println!(" - {prefix}set project {project} vcs to Git")
                }
                SyncAction::CreateRecipe { name } => {
                    println!(" - {prefix}create charm recipe {name}")
                }
                SyncAction::UpdateRecipe { name, changes } => {
                    println!(" - {prefix}update charm recipe {name}: {}", changes.join(", "))
                }
                SyncAction::DeleteRecipe { name } => {
                    println!(" - {prefix}delete charm recipe {name}")
                }
            }
        }
    }
}

/// check-builds table, one row per recipe and series/arch.
pub fn print_builds(rows: &[BuildRow], detect_error: bool) {
    let now = Utc::now();
    let mut headers = vec![
        "Recipe Name",
        "Channels",
        "Arch",
        "State",
        "Age",
        "Revision",
        "Store Rev",
        "Build Log",
    ];
    if detect_error {
        headers.push("Error");
    }

    let mut sorted: Vec<&BuildRow> = rows.iter().collect();
    sorted.sort_by(|a, b| (&a.recipe, &a.series_arch).cmp(&(&b.recipe, &b.series_arch)));

    let table: Vec<Vec<String>> = sorted
        .iter()
        .map(|row| {
            let age = row
                .datebuilt
                .map(|date| humanize_age(date, now))
                .unwrap_or_default();
            let revision = row
                .revision_id
                .as_deref()
                .map(|rev| truncate(rev, 7))
                .unwrap_or_default();
            let store_rev = if row.store_upload_status.as_deref() == Some(STORE_UPLOADED) {
                row.store_upload_revision
                    .map(|rev| rev.to_string())
                    .unwrap_or_default()
            } else {
                row.store_upload_error_message.clone().unwrap_or_default()
            };
            let build_log = if row.buildstate != BUILD_SUCCESSFUL {
                row.build_log_url.clone().unwrap_or_default()
            } else {
                String::new()
            };
            let mut cells = vec![
                row.recipe.clone(),
                row.store_channels.join(", "),
                row.arch_tag.clone(),
                row.buildstate.clone(),
                age,
                revision,
                store_rev,
                build_log,
            ];
            if detect_error {
                cells.push(row.errors_detected.join("; "));
            }
            cells
        })
        .collect();

    render_table(&headers, &table);
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }
    let line = |cells: &[String]| {
        let rendered: Vec<String> = cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        println!("{}", rendered.join("  ").trim_end());
    };
    line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    line(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>());
    for row in rows {
        line(row);
    }
}

pub fn print_authorizations(charm: &str, outcomes: &[AuthorizeOutcome]) {
    println!("Authorizing recipes for {charm}");
    for outcome in outcomes {
        match &outcome.state {
            AuthorizeState::AlreadyAuthorized => {
                println!(" - {}: already authorized.", outcome.recipe)
            }
            AuthorizeState::Started { authorize_url } => println!(
                " - {}: authorization started on branch {}; finish it at {}",
                outcome.recipe, outcome.branch, authorize_url
            ),
            AuthorizeState::MissingRecipe => println!(
                " - {}: does not exist in launchpad for this charm.",
                outcome.recipe
            ),
            AuthorizeState::Failed { reason } => {
                println!(" - {}: authorization failed: {}", outcome.recipe, reason)
            }
        }
    }
}

pub fn print_build_requests(charm: &str, requests: &[RequestedBuild]) {
    if requests.is_empty() {
        println!("{charm}: no builds needed");
        return;
    }
    for request in requests {
        if request.dry_run {
            println!("{charm}: New build needed (dry-run)");
        } else {
            match &request.web_link {
                Some(link) => println!("{charm}: New build requested {link}"),
                None => println!("{charm}: New build requested for {}", request.recipe),
            }
        }
    }
}

/// Coarse "3 days ago" style rendering of a build timestamp.
pub fn humanize_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds();
    if seconds < 0 {
        return "in the future".to_string();
    }
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    if seconds < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 30 {
        plural(days, "day")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("a {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}
