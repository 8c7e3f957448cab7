//! Hot reload tests
//!
//! Verifies that reloads publish new generations from the route file, that
//! failed reloads keep serving the previous routes, and that readers holding
//! a snapshot across a reload keep seeing it until they let go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use carrier_router::admin::AdminCommand;
use carrier_router::error::{FixupError, LoadError, ReloadError};
use carrier_router::ipc::{IpcCommand, IpcHandler, IpcResponse};
use carrier_router::routing::{
    DrainOutcome, DrainPolicy, HashInputs, HashSource, RouteEngine, RouteRequest, SnapshotState,
};
use carrier_router::source::FileSource;

use super::{write_routes, ROUTES};

fn lookup_host(engine: &RouteEngine, number: &str) -> String {
    let request = RouteRequest::new(0, "proxy", number)
        .with_hash(HashSource::CallId, HashInputs::with_call_id("reload-call"));
    engine.route(&request).map(|d| d.host).unwrap_or_default()
}

#[test]
fn test_reload_picks_up_file_changes() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = RouteEngine::new(Arc::new(FileSource::new(&path)));

    let report = engine.reload().unwrap();
    assert_eq!(report.generation, 1);
    assert_eq!(report.drain, DrainOutcome::NothingToDrain);
    assert_eq!(report.stats.domains, 2);
    assert_eq!(lookup_host(&engine, "3300"), "catchall.example.net");

    let updated = ROUTES.replace("catchall.example.net", "catchall2.example.net");
    std::fs::write(&path, updated).unwrap();

    let report = engine.reload().unwrap();
    assert_eq!(report.generation, 2);
    assert_eq!(report.drain, DrainOutcome::Drained);
    assert_eq!(engine.generation(), 2);
    assert_eq!(lookup_host(&engine, "3300"), "catchall2.example.net");
}

#[test]
fn test_broken_file_keeps_previous_routes() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = RouteEngine::new(Arc::new(FileSource::new(&path)));
    engine.reload().unwrap();

    std::fs::write(&path, "domain proxy { prefix 49 { bogus = 1 } }").unwrap();
    let err = engine.reload().unwrap_err();
    assert!(matches!(err, ReloadError::Load(LoadError::Parse { .. })));

    let broken = ROUTES.replace("max_targets = 4", "max_targets = 5");
    std::fs::write(&path, broken).unwrap();
    let err = engine.reload().unwrap_err();
    assert!(matches!(
        err,
        ReloadError::Fixup(FixupError::TargetCountMismatch { .. })
    ));

    std::fs::remove_file(&path).unwrap();
    assert!(engine.reload().is_err());

    assert_eq!(engine.generation(), 1);
    assert_eq!(lookup_host(&engine, "3300"), "catchall.example.net");
}

#[test]
fn test_reader_keeps_old_snapshot_across_reload() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = Arc::new(
        RouteEngine::new(Arc::new(FileSource::new(&path)))
            .with_drain_policy(DrainPolicy::default().with_give_up_after(Duration::from_secs(5))),
    );
    engine.reload().unwrap();

    let guard = engine.acquire().unwrap();
    let old = Arc::clone(guard.snapshot());

    std::fs::write(&path, ROUTES.replace("psap.example.net", "psap2.example.net")).unwrap();

    let reloader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.reload())
    };

    // new lookups see generation 2 while the reload still waits for us
    while engine.generation() < 2 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(old.state(), SnapshotState::Superseded);
    assert_eq!(guard.generation(), 1);
    let request = RouteRequest::new(0, "emergency", "112")
        .with_hash(HashSource::CallId, HashInputs::with_call_id("c1"));
    let options = *engine.options();
    assert_eq!(guard.route(&request, &options).unwrap().host, "psap.example.net");
    assert_eq!(engine.route(&request).unwrap().host, "psap2.example.net");

    drop(guard);
    let report = reloader.join().unwrap().unwrap();
    assert_eq!(report.drain, DrainOutcome::Drained);
    assert_eq!(old.state(), SnapshotState::Reclaimed);
}

#[test]
fn test_lookups_never_fail_during_reloads() {
    let (_dir, path) = write_routes(ROUTES);
    let engine = Arc::new(RouteEngine::new(Arc::new(FileSource::new(&path))));
    engine.reload().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut lookups = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let request = RouteRequest::new(0, "proxy", "4930")
                        .with_hash(HashSource::CallId, HashInputs::with_call_id(format!("r{i}")));
                    let decision = engine.route(&request).expect("lookup during reload");
                    assert_eq!(decision.host, "berlin-b.example.net");
                    lookups += 1;
                }
                lookups
            })
        })
        .collect();

    for _ in 0..25 {
        engine.reload().unwrap();
    }
    stop.store(true, Ordering::Relaxed);

    let total: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(engine.generation(), 26);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reload_and_admin_edit_are_serialized() {
    for _ in 0..20 {
        let (_dir, path) = write_routes(ROUTES);
        let engine = Arc::new(RouteEngine::new(Arc::new(FileSource::new(&path))));
        engine.reload().unwrap();
        let handler = Arc::new(IpcHandler::new(Arc::clone(&engine)));

        let reload = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.reload().await })
        };
        let edit = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler
                    .handle(IpcCommand::admin_line(
                        AdminCommand::Replace,
                        "-d emergency -p 11 -h psap.example.net -t psap2.example.net",
                    ))
                    .await
            })
        };

        assert!(matches!(reload.await.unwrap(), IpcResponse::Reloaded(_)));
        assert!(matches!(edit.await.unwrap(), IpcResponse::Admin(_)));

        // whichever ran first, the published routes match the edited file
        assert_eq!(engine.generation(), 3);
        let request = RouteRequest::new(0, "emergency", "112")
            .with_hash(HashSource::CallId, HashInputs::with_call_id("c1"));
        assert_eq!(engine.route(&request).unwrap().host, "psap2.example.net");
    }
}
