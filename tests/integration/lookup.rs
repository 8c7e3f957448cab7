//! End-to-end routing tests
//!
//! Routes are loaded from a route file (or built in code for features the
//! file format does not carry, such as failure routes) and looked up through
//! the engine the way a SIP proxy would.

use std::sync::Arc;

use carrier_router::error::LookupError;
use carrier_router::routing::{
    crc32, FailureRouteSpec, HashInputs, HashSource, LookupOptions, MatchMode, NextDomainRequest,
    RouteEngine, RouteRequest, RouteSpec, SelectionMode,
};
use carrier_router::source::{FileSource, FnSource};

use super::{write_routes, ROUTES};

fn file_engine(options: LookupOptions) -> (tempfile::TempDir, RouteEngine) {
    let (dir, path) = write_routes(ROUTES);
    let engine = RouteEngine::new(Arc::new(FileSource::new(path))).with_options(options);
    engine.reload().expect("initial load");
    (dir, engine)
}

fn request(number: &str, call_id: &str) -> RouteRequest {
    RouteRequest::new("default", "proxy", number)
        .with_hash(HashSource::CallId, HashInputs::with_call_id(call_id))
}

// ============================================================================
// Normal routing
// ============================================================================

#[test]
fn test_strict_hash_follows_crc32_of_call_id() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    for call_id in ["a84b4c76e66710", "call-1", "call-2", "1@10.0.0.7", "xyz"] {
        let decision = engine
            .route(&request("4912345", call_id).with_mode(SelectionMode::StrictHash))
            .unwrap();
        let expected = crc32(call_id) % 4 + 1;
        assert_eq!(decision.hash_index, expected, "call id {call_id}");
        assert_eq!(decision.host, format!("gw{expected}.example.net"));
        assert_eq!(decision.matched_prefix, "49");

        let user = if expected <= 2 { "012345" } else { "4912345" };
        assert_eq!(decision.uri, format!("sip:{user}@gw{expected}.example.net"));
    }
}

#[test]
fn test_weighted_pick_is_stable_per_call() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    let first = engine.route(&request("4912345", "stable-call")).unwrap();
    for _ in 0..10 {
        let again = engine.route(&request("4912345", "stable-call")).unwrap();
        assert_eq!(again.host, first.host);
    }
}

#[test]
fn test_longest_prefix_and_backup() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    let decision = engine.route(&request("4930555", "c1")).unwrap();
    assert_eq!(decision.matched_prefix, "4930");
    assert_eq!(decision.host, "berlin-b.example.net");
    assert!(decision.via_backup);
}

#[test]
fn test_empty_prefix_catches_everything_else() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    let decision = engine.route(&request("3312345", "c1")).unwrap();
    assert_eq!(decision.matched_prefix, "");
    assert_eq!(decision.host, "catchall.example.net");
}

#[test]
fn test_numeric_selectors_and_secure_uri() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    // carrier 0 is the default carrier; domains are numbered from 1
    let decision = engine
        .route(
            &RouteRequest::new(0, 2, "112")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1"))
                .secure(),
        )
        .unwrap();
    assert_eq!(decision.uri, "sips:112@psap.example.net");
}

#[test]
fn test_misses_are_not_system_errors() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    let err = engine
        .route(
            &RouteRequest::new("default", "nope", "4912")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
        )
        .unwrap_err();
    assert!(matches!(err, LookupError::UnknownDomain { .. }));
    assert!(err.is_miss());

    let err = engine
        .route(
            &RouteRequest::new(7, "proxy", "4912")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
        )
        .unwrap_err();
    assert!(err.is_miss());

    let err = engine
        .route(&RouteRequest::new("default", "emergency", "999"))
        .unwrap_err();
    assert!(err.is_miss(), "no prefix matches before hashing: {err}");

    let err = engine.route(&RouteRequest::new("default", "proxy", "4912")).unwrap_err();
    assert!(matches!(err, LookupError::MissingHashInput("call_id")));
    assert!(!err.is_miss());
}

#[test]
fn test_unknown_carrier_falls_back_to_default() {
    let options = LookupOptions {
        fallback_default: true,
        ..LookupOptions::default()
    };
    let (_dir, engine) = file_engine(options);

    let decision = engine
        .route(
            &RouteRequest::new(7, "emergency", "112")
                .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
        )
        .unwrap();
    assert_eq!(decision.host, "psap.example.net");
}

// ============================================================================
// Used destinations
// ============================================================================

#[test]
fn test_used_destinations_skipped_in_weighted_mode() {
    let options = LookupOptions {
        avoid_failed_destinations: true,
        ..LookupOptions::default()
    };
    let (_dir, engine) = file_engine(options);

    let tried: Vec<String> = (1..=3).map(|i| format!("gw{i}.example.net")).collect();
    for call_id in ["c1", "c2", "c3", "c4", "c5", "c6"] {
        let decision = engine
            .route(&request("4912345", call_id).with_used_destinations(tried.clone()))
            .unwrap();
        assert_eq!(decision.host, "gw4.example.net");
    }

    let all: Vec<String> = (1..=4).map(|i| format!("gw{i}.example.net")).collect();
    let err = engine
        .route(&request("4912345", "c1").with_used_destinations(all))
        .unwrap_err();
    assert_eq!(err, LookupError::AllDestinationsUsed);
}

#[test]
fn test_used_destinations_ignored_without_option() {
    let (_dir, engine) = file_engine(LookupOptions::default());

    let all: Vec<String> = (1..=4).map(|i| format!("gw{i}.example.net")).collect();
    assert!(engine
        .route(&request("4912345", "c1").with_used_destinations(all))
        .is_ok());
}

#[test]
fn test_used_destinations_ignored_in_strict_hash_mode() {
    let options = LookupOptions {
        avoid_failed_destinations: true,
        ..LookupOptions::default()
    };
    let (_dir, engine) = file_engine(options);

    let all: Vec<String> = (1..=4).map(|i| format!("gw{i}.example.net")).collect();
    let decision = engine
        .route(
            &request("4912345", "c1")
                .with_mode(SelectionMode::StrictHash)
                .with_used_destinations(all),
        )
        .unwrap();
    assert_eq!(decision.hash_index, crc32("c1") % 4 + 1);
}

// ============================================================================
// Failure routing and byte tries
// ============================================================================

#[test]
fn test_failure_route_prefers_specific_host() {
    let source = FnSource::new(|b| {
        let carrier = b.add_carrier("default");
        let proxy = b.add_domain(carrier, "proxy")?;
        let retry = b.domain_id("retry");
        let busy = b.domain_id("busy");
        b.add_route(RouteSpec::new(carrier, proxy, "1", "10.0.0.1"))?;
        b.add_failure_route(
            FailureRouteSpec::new(carrier, proxy, "1", retry).with_reply_code("4.."),
        )?;
        b.add_failure_route(
            FailureRouteSpec::new(carrier, proxy, "1", busy)
                .with_host("10.0.0.1")
                .with_reply_code("486"),
        )
    });
    let engine = RouteEngine::new(Arc::new(source));
    engine.reload().unwrap();

    let next = engine
        .next_domain(&NextDomainRequest::new(0, "proxy", "1555", "10.0.0.1", "486"))
        .unwrap();
    assert_eq!(next.domain.as_deref(), Some("busy"));

    let next = engine
        .next_domain(&NextDomainRequest::new(0, "proxy", "1555", "10.0.0.9", "404"))
        .unwrap();
    assert_eq!(next.domain.as_deref(), Some("retry"));

    let err = engine
        .next_domain(&NextDomainRequest::new(0, "proxy", "1555", "10.0.0.1", "503"))
        .unwrap_err();
    assert!(matches!(err, LookupError::NoFailureRule { .. }));
}

#[test]
fn test_byte_mode_routes_alphanumeric_prefixes() {
    let source = FnSource::new(|b| {
        let carrier = b.add_carrier("default");
        let domain = b.add_domain(carrier, "users")?;
        b.add_route(RouteSpec::new(carrier, domain, "alice", "pbx-a"))?;
        b.add_route(RouteSpec::new(carrier, domain, "al", "pbx-b"))
    });
    let engine = RouteEngine::new(Arc::new(source)).with_match_mode(MatchMode::Bytes);
    engine.reload().unwrap();

    let route = |user: &str| {
        engine
            .route(
                &RouteRequest::new(0, "users", user)
                    .with_hash(HashSource::CallId, HashInputs::with_call_id("c1")),
            )
            .map(|d| d.host)
    };
    assert_eq!(route("alice").unwrap(), "pbx-a");
    assert_eq!(route("albert").unwrap(), "pbx-b");
    assert!(route("bob").unwrap_err().is_miss());
}
