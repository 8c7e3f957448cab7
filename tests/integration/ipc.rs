//! Control socket tests
//!
//! Runs a real `IpcServer` on a temporary Unix socket over a route file and
//! drives it with `IpcClient`, the way `carrier-router ctl` does.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use carrier_router::admin::AdminCommand;
use carrier_router::config::IpcConfig;
use carrier_router::error::AdminErrorCode;
use carrier_router::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use carrier_router::routing::{
    HashInputs, HashSource, NextDomainRequest, RouteEngine, RouteRequest, SelectionMode,
};
use carrier_router::source::FileSource;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::{write_routes, ROUTES};

struct Running {
    _dir: TempDir,
    routes: PathBuf,
    socket: PathBuf,
    server: JoinHandle<()>,
}

/// Start a server over a fresh route file, stopping it when the handler
/// receives a shutdown command.
async fn start() -> Running {
    let (dir, routes) = write_routes(ROUTES);
    let socket = dir.path().join("ctl.sock");

    let engine = RouteEngine::new(Arc::new(FileSource::new(&routes)));
    engine.reload().expect("initial load");
    let handler = Arc::new(IpcHandler::new(Arc::new(engine)));
    let mut shutdown_rx = handler.subscribe_shutdown();

    let config = IpcConfig {
        socket_path: socket.clone(),
        socket_mode: 0o600,
        enabled: true,
        max_message_size: 64 * 1024,
    };
    let server = IpcServer::new(config, handler);
    let stop = server.shutdown_sender();

    let server = tokio::spawn(async move {
        let run = server.run();
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result.expect("server failed"),
            _ = shutdown_rx.recv() => {
                let _ = stop.send(());
                run.await.expect("server failed");
            }
        }
    });

    for _ in 0..50 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        _dir: dir,
        routes,
        socket,
        server,
    }
}

fn route_request(number: &str, call_id: &str) -> RouteRequest {
    RouteRequest::new("default", "proxy", number)
        .with_hash(HashSource::CallId, HashInputs::with_call_id(call_id))
        .with_mode(SelectionMode::StrictHash)
}

#[tokio::test]
async fn test_status_and_lookups_over_socket() {
    let running = start().await;
    let client = IpcClient::new(&running.socket);

    assert!(client.ping().await.unwrap());

    let IpcResponse::Status(status) = client.send(IpcCommand::Status).await.unwrap() else {
        panic!("expected status");
    };
    assert_eq!(status.generation, 1);
    assert!(status.source.contains("routes.conf"));
    let stats = status.stats.unwrap();
    assert_eq!(stats.domains, 2);
    assert_eq!(stats.rules, 8);

    let response = client
        .send(IpcCommand::TestRoute {
            request: route_request("4930100", "c1"),
        })
        .await
        .unwrap();
    let IpcResponse::Route(decision) = response else {
        panic!("expected route, got {response:?}");
    };
    assert_eq!(decision.host, "berlin-b.example.net");
    assert!(decision.via_backup);

    let response = client
        .send(IpcCommand::TestRoute {
            request: RouteRequest::new("default", "nowhere", "49")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
        })
        .await
        .unwrap();
    let IpcResponse::Error(body) = response else {
        panic!("expected error");
    };
    assert_eq!(body.code, ErrorCode::NoRoute);
    assert_eq!(body.status, 400);

    let response = client
        .send(IpcCommand::TestNextDomain {
            request: NextDomainRequest::new("default", "proxy", "49", "gw1.example.net", "503"),
        })
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Error(ref e) if e.code == ErrorCode::NoRoute));

    client.send(IpcCommand::Shutdown).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), running.server)
        .await
        .unwrap()
        .unwrap();
    assert!(!running.socket.exists());
}

#[tokio::test]
async fn test_reload_and_dump_over_socket() {
    let running = start().await;
    let client = IpcClient::new(&running.socket);

    std::fs::write(
        &running.routes,
        ROUTES.replace("psap.example.net", "psap-new.example.net"),
    )
    .unwrap();

    let IpcResponse::Reloaded(report) = client.send(IpcCommand::ReloadRoutes).await.unwrap() else {
        panic!("expected reload report");
    };
    assert_eq!(report.generation, 2);

    let IpcResponse::Dump { dump, text } = client.send(IpcCommand::DumpRoutes).await.unwrap() else {
        panic!("expected dump");
    };
    assert_eq!(dump.generation, 2);
    assert!(text.contains("psap-new.example.net"));
    let emergency = dump.carriers[0]
        .domains
        .iter()
        .find(|d| d.name == "emergency")
        .unwrap();
    assert_eq!(emergency.entries[0].host, "psap-new.example.net");

    std::fs::write(&running.routes, "domain {").unwrap();
    let response = client.send(IpcCommand::ReloadRoutes).await.unwrap();
    assert!(matches!(response, IpcResponse::Error(ref e) if e.code == ErrorCode::ReloadFailed));

    let IpcResponse::Status(status) = client.send(IpcCommand::Status).await.unwrap() else {
        panic!("expected status");
    };
    assert_eq!(status.generation, 2);

    running.server.abort();
}

#[tokio::test]
async fn test_admin_edits_over_socket() {
    let running = start().await;
    let client = IpcClient::new(&running.socket);

    let response = client
        .admin(
            AdminCommand::Deactivate,
            "-d proxy -p 49 -h gw1.example.net -t gw2.example.net",
        )
        .await
        .unwrap();
    let IpcResponse::Admin(outcome) = response else {
        panic!("expected admin outcome, got {response:?}");
    };
    assert_eq!(outcome.command, AdminCommand::Deactivate);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.generation, 2);

    let on_disk = std::fs::read_to_string(&running.routes).unwrap();
    assert!(on_disk.contains("backup = 2"));

    let response = client
        .admin(AdminCommand::Delete, "-d proxy -p 49 -h gw2.example.net")
        .await
        .unwrap();
    let IpcResponse::Error(body) = response else {
        panic!("expected error");
    };
    assert_eq!(body.code, ErrorCode::AdminFailed);
    assert_eq!(body.admin_code, Some(AdminErrorCode::BackupInUse));

    let response = client
        .admin(AdminCommand::Add, "-d proxy -p 49 -h gw5.example.net")
        .await
        .unwrap();
    let IpcResponse::Error(body) = response else {
        panic!("expected error");
    };
    assert_eq!(body.admin_code, Some(AdminErrorCode::MissingOption));
    assert_eq!(body.status, 400);

    client.send(IpcCommand::Shutdown).await.unwrap();
    let response = client
        .admin(AdminCommand::Activate, "-d proxy -p 49 -h gw1.example.net")
        .await;
    // the server may already be gone; if it answered, it refused the write
    if let Ok(response) = response {
        assert!(matches!(response, IpcResponse::Error(ref e) if e.code == ErrorCode::ShuttingDown));
    }

    tokio::time::timeout(Duration::from_secs(2), running.server)
        .await
        .unwrap()
        .unwrap();
}
