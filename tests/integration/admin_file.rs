//! Administrative edit tests
//!
//! Every edit loads the route file into a scratch snapshot, edits it, writes
//! it back (keeping a `.bak` copy) and reloads. These tests check both the
//! live routes and what ends up on disk.

use std::sync::Arc;

use carrier_router::admin::{AdminCommand, AdminMutator, AdminOptions};
use carrier_router::error::AdminErrorCode;
use carrier_router::routing::{
    crc32, HashInputs, HashSource, RouteEngine, RouteRequest, RouteSnapshot, RuleGroup, SelectionMode,
};
use carrier_router::source::{parse_route_file, FileSource, FnSource};

use super::{write_routes, ROUTES};

fn engine_for(path: &std::path::Path) -> RouteEngine {
    let engine = RouteEngine::new(Arc::new(FileSource::new(path)));
    engine.reload().unwrap();
    engine
}

fn apply(engine: &RouteEngine, command: AdminCommand, line: &str) -> Result<usize, AdminErrorCode> {
    let opts = AdminOptions::parse_line(command, line).map_err(|e| e.code())?;
    AdminMutator::new(engine)
        .apply(&opts)
        .map(|outcome| outcome.updated)
        .map_err(|e| e.code())
}

fn group_of<'a>(snapshot: &'a RouteSnapshot, prefix: &str) -> &'a RuleGroup {
    let carrier = snapshot.default_carrier().unwrap();
    let domain = carrier.domain(1).unwrap();
    &domain.routes().get(prefix).unwrap().groups()[0]
}

/// Every backup link must be mirrored by the backup's dependents list
fn assert_mirrored(group: &RuleGroup) {
    for rule in group.rules() {
        if let Some(backup) = group.backup_of(rule) {
            assert!(
                backup.backed_up_by.iter().any(|l| l.hash_index == rule.hash_index),
                "rule {} not listed by its backup {}",
                rule.hash_index,
                backup.hash_index
            );
        }
        for dependent in &rule.backed_up_by {
            let dep = group.rule_by_hash(dependent.hash_index).unwrap();
            assert_eq!(dep.backup.map(|b| b.hash_index), Some(rule.hash_index));
        }
    }
}

#[test]
fn test_deactivate_with_auto_backup_persists() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let updated = apply(
        &engine,
        AdminCommand::Deactivate,
        "-d proxy -p 49 -h gw2.example.net -t a",
    )
    .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(engine.generation(), 2);

    let guard = engine.acquire().unwrap();
    let group = group_of(&guard, "49");
    let gw2 = group.rule_by_hash(2).unwrap();
    assert!(!gw2.active);
    // lowest active hash index that backs up nobody
    assert_eq!(group.backup_of(gw2).unwrap().host, "gw1.example.net");
    assert_mirrored(group);

    let file = parse_route_file(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let prefix = file.domains[0]
        .prefixes
        .iter()
        .find(|p| p.prefix == "49")
        .unwrap();
    let gw2 = prefix.targets.iter().find(|t| t.host == "gw2.example.net").unwrap();
    assert!(!gw2.status);
    assert_eq!(gw2.backup, Some(1));
    let gw1 = prefix.targets.iter().find(|t| t.host == "gw1.example.net").unwrap();
    assert_eq!(gw1.backed_up, vec![2]);

    let backup_copy = std::fs::read_to_string(path.with_extension("conf.bak")).unwrap();
    assert_eq!(backup_copy, ROUTES);
}

#[test]
fn test_deactivated_rule_routes_through_backup() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let err = apply(
        &engine,
        AdminCommand::Deactivate,
        "-d proxy -p 49 -h gw4.example.net -t gw4.example.net",
    )
    .unwrap_err();
    assert_eq!(err, AdminErrorCode::WrongOption);

    apply(
        &engine,
        AdminCommand::Deactivate,
        "-d proxy -p 49 -h gw3.example.net -t 4",
    )
    .unwrap();

    for call_id in ["a", "b", "c", "d", "e", "f", "g", "h"] {
        let request = RouteRequest::new(0, "proxy", "4912345")
            .with_hash(HashSource::CallId, HashInputs::with_call_id(call_id))
            .with_mode(SelectionMode::StrictHash);
        let decision = engine.route(&request).unwrap();
        assert_ne!(decision.host, "gw3.example.net");
        if crc32(call_id) % 4 + 1 == 3 {
            assert_eq!(decision.host, "gw4.example.net");
            assert!(decision.via_backup);
        }
    }
}

#[test]
fn test_activate_clears_backup() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    apply(
        &engine,
        AdminCommand::Activate,
        "-d proxy -p 4930 -h berlin-a.example.net",
    )
    .unwrap();

    let guard = engine.acquire().unwrap();
    let group = group_of(&guard, "4930");
    let berlin_a = group.rule_by_hash(1).unwrap();
    assert!(berlin_a.active);
    assert!(berlin_a.backup.is_none());
    assert!(group.rule_by_hash(2).unwrap().backed_up_by.is_empty());
}

#[test]
fn test_delete_backup_in_use_rejected() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let err = apply(
        &engine,
        AdminCommand::Delete,
        "-d proxy -p 4930 -h berlin-b.example.net",
    )
    .unwrap_err();
    assert_eq!(err, AdminErrorCode::BackupInUse);
    assert_eq!(engine.generation(), 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROUTES);
}

#[test]
fn test_delete_renumbers_and_updates_file() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    apply(&engine, AdminCommand::Delete, "-d proxy -p 49 -h gw2.example.net").unwrap();

    let guard = engine.acquire().unwrap();
    let group = group_of(&guard, "49");
    assert_eq!(group.len(), 3);
    let mut indices: Vec<u32> = group.rules().iter().map(|r| r.hash_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(group.rule_by_hash(3).unwrap().host, "gw4.example.net");

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("gw2.example.net"));
    assert!(text.contains("max_targets = 3"));
}

#[test]
fn test_add_host_to_existing_and_new_prefix() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    apply(
        &engine,
        AdminCommand::Add,
        "-d emergency -p 11 -h psap-backup.example.net -w 0",
    )
    .unwrap();
    apply(
        &engine,
        AdminCommand::Add,
        "-d proxy -p 44 -h gw-uk.example.net -w 1 -P 0044 -i 1",
    )
    .unwrap();

    let decision = engine
        .route(
            &RouteRequest::new(0, "proxy", "4420")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
        )
        .unwrap();
    assert_eq!(decision.uri, "sip:00444420@gw-uk.example.net");

    let stats = engine.stats().unwrap();
    assert_eq!(stats.rules, 10);
}

#[test]
fn test_add_to_unknown_domain_leaves_file_untouched() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let err = apply(
        &engine,
        AdminCommand::Add,
        "-d nowhere -p 1 -h gw.example.net -w 1",
    )
    .unwrap_err();
    assert_eq!(err, AdminErrorCode::UnknownDomain);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), ROUTES);
    assert!(!path.with_extension("conf.bak").exists());
}

#[test]
fn test_replace_without_match_fails() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let err = apply(
        &engine,
        AdminCommand::Replace,
        "-d proxy -p 49 -h nothing.example.net -t other.example.net",
    )
    .unwrap_err();
    assert_eq!(err, AdminErrorCode::NoUpdate);
    assert_eq!(engine.generation(), 1);
}

#[test]
fn test_replace_host_everywhere() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = engine_for(&path);

    let updated = apply(
        &engine,
        AdminCommand::Replace,
        "-d * -p * -h gw1.example.net -t gw1-new.example.net",
    )
    .unwrap();
    assert_eq!(updated, 1);
    assert!(std::fs::read_to_string(&path)
        .unwrap()
        .contains("gw1-new.example.net"));
}

#[test]
fn test_edits_require_file_source() {
    let source = FnSource::new(|b| {
        b.add_carrier("default");
        Ok(())
    });
    let engine = RouteEngine::new(Arc::new(source));
    engine.reload().unwrap();

    let err = apply(&engine, AdminCommand::Activate, "-d proxy -p 49 -h gw1").unwrap_err();
    assert_eq!(err, AdminErrorCode::NotFileMode);
}
