//! Administrative edits.
//!
//! An edit never touches the live snapshot. It loads a scratch snapshot
//! from the route file, applies the command, re-runs fixup, writes the file
//! back and then reloads the engine from the file. Any failure on the way
//! leaves both the live snapshot and (except for a failed reload) the file
//! as they were.
//!
//! Within a rule group the edit works on a copy of the rule list and
//! replaces the group's list in one step when done.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::options::{AdminCommand, AdminOptions};
use crate::error::{AdminError, AdminErrorCode, ReloadError};
use crate::routing::{BackupLink, RouteEngine, RouteSnapshot, RouteSpec, Rule, RuleGroup};
use crate::source::SourceKind;

/// Result of a successful edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOutcome {
    /// Command applied.
    pub command: AdminCommand,
    /// Number of rules added or changed.
    pub updated: usize,
    /// Generation published by the follow-up reload.
    pub generation: u64,
}

/// Applies administrative edits to the engine's route file.
#[derive(Debug, Clone, Copy)]
pub struct AdminMutator<'a> {
    engine: &'a RouteEngine,
}

impl<'a> AdminMutator<'a> {
    /// Mutator for `engine`.
    #[must_use]
    pub const fn new(engine: &'a RouteEngine) -> Self {
        Self { engine }
    }

    /// Apply one command: load, edit, fix up, store, reload.
    ///
    /// # Errors
    ///
    /// `NotFileMode` unless the engine reads a route file, `LoadConfig` if
    /// the scratch snapshot cannot be loaded, any edit error, `RuleFixup`,
    /// `SaveConfig`, or `LoadConfig` if the final reload fails.
    pub fn apply(&self, opts: &AdminOptions) -> Result<AdminOutcome, AdminError> {
        let source = self.engine.source();
        if source.kind() != SourceKind::File {
            return Err(AdminError::validation(
                AdminErrorCode::NotFileMode,
                "Not running in config file mode, cannot modify route from command line",
            ));
        }

        let mut scratch = self
            .engine
            .load_snapshot()
            .map_err(|source| AdminError::Reload {
                code: AdminErrorCode::LoadConfig,
                context: "Could not load config from file".to_string(),
                source,
            })?;

        let updated = edit_snapshot(&mut scratch, opts)?;

        scratch.fixup().map_err(|e| AdminError::Reload {
            code: AdminErrorCode::RuleFixup,
            context: "Could not fixup rules".to_string(),
            source: ReloadError::Fixup(e),
        })?;

        source.store(&scratch).map_err(AdminError::Save)?;

        let report = self.engine.reload().map_err(|source| AdminError::Reload {
            code: AdminErrorCode::LoadConfig,
            context: "Could not load config from file".to_string(),
            source,
        })?;

        info!(
            command = %opts.command,
            updated,
            generation = report.generation,
            "administrative edit applied"
        );
        Ok(AdminOutcome {
            command: opts.command,
            updated,
            generation: report.generation,
        })
    }
}

/// Apply a command to a loaded snapshot without fixing it up.
///
/// Returns the number of rules added or changed.
///
/// # Errors
///
/// `UnknownDomain` or `WrongOption` for an add, the backup errors of a
/// deactivate, `BackupInUse`, or `NoUpdate` if nothing matched.
pub fn edit_snapshot(snapshot: &mut RouteSnapshot, opts: &AdminOptions) -> Result<usize, AdminError> {
    let updated = match opts.command {
        AdminCommand::Add => add_rule(snapshot, opts)?,
        _ => update_rules(snapshot, opts)?,
    };
    if updated == 0 {
        return Err(AdminError::edit(AdminErrorCode::NoUpdate, "No match for update found"));
    }
    Ok(updated)
}

fn add_rule(snapshot: &mut RouteSnapshot, opts: &AdminOptions) -> Result<usize, AdminError> {
    let domain_name = opts.domain.as_deref().unwrap_or_default();
    let domain = snapshot.domain_names().id_of(domain_name).ok_or_else(|| {
        AdminError::validation(
            AdminErrorCode::UnknownDomain,
            format!("cannot find id for domain '{domain_name}'"),
        )
    })?;
    let carrier = snapshot.default_carrier_id().ok_or_else(|| {
        AdminError::edit(AdminErrorCode::LoadConfig, "Could not load config from file: no carrier")
    })?;

    let spec = RouteSpec::new(
        carrier,
        domain,
        opts.prefix.clone().unwrap_or_default(),
        opts.host.clone().unwrap_or_default(),
    )
    .with_weight(opts.weight.unwrap_or(1.0))
    .with_rewrite(
        opts.rewrite_prefix.clone().unwrap_or_default(),
        opts.rewrite_suffix.clone().unwrap_or_default(),
    )
    .with_hash_index(opts.hash_index.unwrap_or(0));

    debug!(domain = domain_name, prefix = %spec.prefix, host = %spec.host, "adding route");
    snapshot.insert_route(spec).map_err(|e| {
        AdminError::validation(AdminErrorCode::WrongOption, format!("Bad parameter: {e}"))
    })?;
    Ok(1)
}

fn wildcard_matches(filter: Option<&str>, value: &str) -> bool {
    filter.map_or(true, |f| f.is_empty() || f == "*" || f == value)
}

fn update_rules(snapshot: &mut RouteSnapshot, opts: &AdminOptions) -> Result<usize, AdminError> {
    let mut updated = 0;
    // an absent prefix filter selects the empty prefix only
    let prefix_filter = opts.prefix.as_deref().unwrap_or_default();

    for carrier in snapshot.carriers_mut().iter_mut() {
        for domain in carrier.domains_mut() {
            if !wildcard_matches(opts.domain.as_deref(), &domain.name) {
                continue;
            }

            let mut emptied = Vec::new();
            domain.routes.try_walk_mut(|prefix, set| {
                if prefix_filter != "*" && prefix_filter != prefix {
                    return Ok(());
                }
                for group in set.groups_mut().iter_mut() {
                    updated += edit_group(group, prefix, opts)?;
                }
                set.groups_mut().retain(|g| !g.is_empty());
                if set.is_empty() {
                    emptied.push(prefix.to_string());
                }
                Ok::<(), AdminError>(())
            })?;
            for prefix in emptied {
                domain.routes.remove(&prefix);
            }
        }
    }
    Ok(updated)
}

fn rule_matches(rule: &Rule, opts: &AdminOptions) -> bool {
    let host = opts.host.as_deref().unwrap_or_default();
    (host == "*" || host == rule.host)
        && opts
            .weight
            .map_or(true, |w| (rule.orig_weight - w).abs() < f64::EPSILON)
}

fn edit_group(group: &mut RuleGroup, prefix: &str, opts: &AdminOptions) -> Result<usize, AdminError> {
    let mut rules = group.rules().to_vec();
    let mut count = 0;
    let mut i = 0;

    while i < rules.len() {
        if !rule_matches(&rules[i], opts) {
            i += 1;
            continue;
        }
        count += 1;
        info!(
            command = %opts.command,
            prefix,
            host = %rules[i].host,
            hash_index = rules[i].hash_index,
            "updating route"
        );

        match opts.command {
            AdminCommand::Replace => {
                rules[i].host = opts.target.clone().unwrap_or_default();
                rules[i].active = true;
            }
            AdminCommand::Activate => {
                rules[i].backup = None;
                rules[i].active = true;
            }
            AdminCommand::Deactivate => deactivate(&mut rules, i, opts.target.as_deref())?,
            AdminCommand::Delete => {
                if has_dependents(&rules, rules[i].hash_index) {
                    return Err(backup_in_use());
                }
                rules.remove(i);
                continue;
            }
            AdminCommand::Add => {}
        }
        i += 1;
    }

    if count > 0 {
        if opts.command == AdminCommand::Delete {
            compact_hash_indices(&mut rules);
        }
        mirror_backups(&mut rules);
        let n = rules.len();
        group.replace_rules(rules, n);
    }
    Ok(count)
}

fn backup_in_use() -> AdminError {
    AdminError::edit(
        AdminErrorCode::BackupInUse,
        "Could not delete or deactivate route, it is backup for other routes",
    )
}

fn has_dependents(rules: &[Rule], hash_index: u32) -> bool {
    rules
        .iter()
        .any(|r| r.hash_index != hash_index && r.backup.is_some_and(|b| b.hash_index == hash_index))
}

fn deactivate(rules: &mut [Rule], slot: usize, target: Option<&str>) -> Result<(), AdminError> {
    rules[slot].backup = None;

    match target {
        Some(target) => {
            if target == rules[slot].host {
                return Err(AdminError::validation(
                    AdminErrorCode::WrongOption,
                    "Bad parameter: backup host is the deactivated host",
                ));
            }
            let backup = find_backup(rules, slot, target)?;
            set_backup(rules, slot, backup)?;
        }
        None => {
            if has_dependents(rules, rules[slot].hash_index) {
                return Err(backup_in_use());
            }
        }
    }

    rules[slot].active = false;
    Ok(())
}

fn find_backup(rules: &[Rule], slot: usize, target: &str) -> Result<usize, AdminError> {
    let me = rules[slot].hash_index;
    if target == "a" {
        return rules
            .iter()
            .enumerate()
            .filter(|(s, r)| *s != slot && r.active && !has_dependents(rules, r.hash_index))
            .min_by_key(|(_, r)| r.hash_index)
            .map(|(s, _)| s)
            .ok_or_else(|| AdminError::edit(AdminErrorCode::NoAutoBackup, "No auto backup route found"));
    }
    if let Ok(hash_index) = target.parse::<u32>() {
        return rules
            .iter()
            .position(|r| r.hash_index == hash_index && hash_index != me)
            .ok_or_else(|| {
                AdminError::edit(
                    AdminErrorCode::NoHashBackup,
                    "No backup route for given hash found",
                )
            });
    }
    rules
        .iter()
        .enumerate()
        .find(|(s, r)| *s != slot && r.host == target)
        .map(|(s, _)| s)
        .ok_or_else(|| {
            AdminError::edit(
                AdminErrorCode::NoHostBackup,
                "No backup route for given host found",
            )
        })
}

/// Make `backup` the backup of `slot` and move `slot`'s dependents onto it.
fn set_backup(rules: &mut [Rule], slot: usize, backup: usize) -> Result<(), AdminError> {
    if !rules[backup].active {
        return Err(AdminError::edit(AdminErrorCode::AddBackup, "Could not set backup route"));
    }
    let from = rules[slot].hash_index;
    let to = rules[backup].hash_index;
    rules[slot].backup = Some(BackupLink::new(to));

    for (s, rule) in rules.iter_mut().enumerate() {
        if s != slot && rule.backup.is_some_and(|b| b.hash_index == from) {
            rule.backup = (s != backup).then_some(BackupLink::new(to));
        }
    }
    debug!(rule = from, backup = to, "backup route set");
    Ok(())
}

/// Renumber hash indices to `1..=n` keeping their order, rewriting backup
/// references.
fn compact_hash_indices(rules: &mut [Rule]) {
    let mut order: Vec<(u32, usize)> = rules.iter().enumerate().map(|(s, r)| (r.hash_index, s)).collect();
    order.sort_unstable();

    let mut renumber = Vec::with_capacity(order.len());
    for (new, (old, slot)) in (1u32..).zip(order) {
        renumber.push((old, new));
        rules[slot].hash_index = new;
    }
    let lookup = |old: u32| renumber.iter().find(|(o, _)| *o == old).map(|(_, n)| *n);
    for rule in rules.iter_mut() {
        rule.backup = rule.backup.and_then(|b| lookup(b.hash_index)).map(BackupLink::new);
    }
}

/// Rebuild every `backed_up_by` list from the `backup` references.
fn mirror_backups(rules: &mut [Rule]) {
    let links: Vec<(u32, u32)> = rules
        .iter()
        .filter_map(|r| r.backup.map(|b| (b.hash_index, r.hash_index)))
        .collect();
    for rule in rules.iter_mut() {
        rule.backed_up_by.clear();
    }
    for (target, dependent) in links {
        if let Some(rule) = rules.iter_mut().find(|r| r.hash_index == target) {
            rule.backed_up_by.push(BackupLink::new(dependent));
        }
    }
}
