//! In-memory routing data and route selection.
//!
//! This module provides:
//! - Name interning for carriers and domains ([`NameMap`])
//! - Digit and byte prefix tries with longest-prefix match ([`PrefixTrie`])
//! - Rule groups with weighted and strict-hash selection ([`RuleGroup`])
//! - Failure routing to a follow-up domain ([`FailureRuleList`])
//! - Immutable snapshots and the hot-reloadable [`RouteEngine`]
//!
//! # Architecture
//!
//! ```text
//! RouteSnapshot
//!   └── Carrier (by id)
//!         └── Domain (by id)
//!               ├── PrefixTrie<RuleSet>          normal routing
//!               │     └── RuleGroup (flags, mask)
//!               │           └── Rule ...         index by hash, dice thresholds
//!               └── PrefixTrie<FailureRuleList>  failure routing
//! ```
//!
//! A lookup pins the live snapshot, selects carrier and domain, runs a
//! longest-prefix match on the dialed number, picks the first rule group
//! whose mask selects the request flags and finally a rule within it.
//!
//! # Example
//!
//! ```
//! use carrier_router::routing::{
//!     HashInputs, HashSource, LookupOptions, MatchMode, RouteRequest, RouteSpec, SnapshotBuilder,
//! };
//!
//! let mut builder = SnapshotBuilder::new(MatchMode::Digits);
//! let carrier = builder.add_carrier("default");
//! let domain = builder.add_domain(carrier, "proxy").unwrap();
//! builder
//!     .add_route(RouteSpec::new(carrier, domain, "49", "gw-de").with_strip(2).with_rewrite("0", ""))
//!     .unwrap();
//! let snapshot = builder.build().unwrap();
//!
//! let request = RouteRequest::new(0, "proxy", "4930123")
//!     .with_hash(HashSource::CallId, HashInputs::with_call_id("c1"));
//! let decision = snapshot.route(&request, &LookupOptions::default()).unwrap();
//! assert_eq!(decision.uri, "sip:030123@gw-de");
//! ```

pub mod carrier;
pub mod dump;
pub mod engine;
pub mod failure;
pub mod hash;
pub mod lookup;
pub mod name_map;
pub mod rule;
pub mod snapshot;
pub mod trie;

pub use carrier::{Carrier, CarrierTable, Domain};
pub use dump::{CarrierDump, DomainDump, DumpEntry, RouteDump};
pub use engine::{DrainOutcome, DrainPolicy, ReloadReport, RouteEngine, SnapshotGuard};
pub use failure::{
    reply_code_matches, FailureRouteSpec, FailureRule, FailureRuleList, ANY_REPLY_CODE,
};
pub use hash::{crc32, HashInputs, HashSource, SelectionMode};
pub use lookup::{
    LookupOptions, NextDomain, NextDomainRequest, RouteDecision, RouteRequest, Selector, MAX_URI_SIZE,
};
pub use name_map::{NameEntry, NameMap};
pub use rule::{
    weight_to_dice, BackupLink, RouteSpec, Rule, RuleGroup, RuleSet, Selection, DICE_SCALE,
    MAX_USED_DESTINATIONS,
};
pub use snapshot::{RouteSnapshot, SnapshotBuilder, SnapshotState, SnapshotStats};
pub use trie::{MatchMode, PrefixTrie};
