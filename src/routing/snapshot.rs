//! Routing snapshots.
//!
//! A [`RouteSnapshot`] is one complete generation of routing data: the
//! carrier table with every domain's tries, the carrier and domain name
//! maps and the resolved default carrier. It is built by a
//! [`SnapshotBuilder`] (the target a route source fills in), fixed up once
//! and then only read. The only mutable part of a published snapshot is its
//! reader count and lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::carrier::{Carrier, CarrierTable, Domain};
use super::failure::{FailureRouteSpec, FailureRuleList};
use super::hash::SelectionMode;
use super::lookup::{LookupOptions, NextDomain, NextDomainRequest, RouteDecision, RouteRequest, Selector};
use super::name_map::NameMap;
use super::rule::{RouteSpec, RuleSet};
use super::trie::MatchMode;
use crate::error::{FixupError, LoadError, LookupError};

/// Lifecycle of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SnapshotState {
    /// Built but not published.
    Staged = 0,
    /// Current snapshot; new lookups see it.
    Live = 1,
    /// Replaced by a newer snapshot; readers may still hold it.
    Superseded = 2,
    /// Superseded and drained; no reader holds it any more.
    Reclaimed = 3,
}

impl SnapshotState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Live,
            2 => Self::Superseded,
            3 => Self::Reclaimed,
            _ => Self::Staged,
        }
    }
}

/// Counts reported by the `status` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Snapshot generation.
    pub generation: u64,
    /// Number of carriers.
    pub carriers: usize,
    /// Number of domains over all carriers.
    pub domains: usize,
    /// Number of trie nodes carrying normal rules.
    pub prefixes: usize,
    /// Number of normal rules.
    pub rules: usize,
    /// Number of failure rules.
    pub failure_rules: usize,
}

/// One immutable generation of routing data.
#[derive(Debug)]
pub struct RouteSnapshot {
    carriers: CarrierTable,
    carrier_names: NameMap,
    domain_names: NameMap,
    default_carrier_name: Option<String>,
    default_carrier: Option<u32>,
    mode: MatchMode,
    generation: u64,
    readers: Mutex<usize>,
    state: AtomicU8,
}

impl RouteSnapshot {
    /// Carrier table.
    #[must_use]
    pub const fn carriers(&self) -> &CarrierTable {
        &self.carriers
    }

    pub(crate) fn carriers_mut(&mut self) -> &mut CarrierTable {
        &mut self.carriers
    }

    /// Carrier names.
    #[must_use]
    pub const fn carrier_names(&self) -> &NameMap {
        &self.carrier_names
    }

    /// Domain names.
    #[must_use]
    pub const fn domain_names(&self) -> &NameMap {
        &self.domain_names
    }

    /// Default carrier, if any carrier is loaded.
    #[must_use]
    pub fn default_carrier(&self) -> Option<&Carrier> {
        self.default_carrier.and_then(|id| self.carriers.get(id))
    }

    /// Default carrier id.
    #[must_use]
    pub const fn default_carrier_id(&self) -> Option<u32> {
        self.default_carrier
    }

    /// Trie alphabet.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Generation number, assigned when the snapshot is published.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SnapshotState {
        SnapshotState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SnapshotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Number of readers currently pinning this snapshot.
    #[must_use]
    pub fn readers(&self) -> usize {
        *self.readers.lock()
    }

    pub(crate) fn pin(&self) {
        *self.readers.lock() += 1;
    }

    pub(crate) fn unpin(&self) {
        let mut readers = self.readers.lock();
        *readers = readers.saturating_sub(1);
    }

    /// Re-run the fixup pass over every rule group and resolve the default
    /// carrier.
    ///
    /// # Errors
    ///
    /// The first `FixupError` found.
    pub fn fixup(&mut self) -> Result<(), FixupError> {
        for carrier in self.carriers.iter_mut() {
            for domain in carrier.domains_mut() {
                domain.routes.try_walk_mut(|prefix, set| set.fixup(prefix))?;
            }
        }

        self.default_carrier = match &self.default_carrier_name {
            Some(name) => {
                let id = self
                    .carrier_names
                    .id_of(name)
                    .filter(|id| self.carriers.get(*id).is_some())
                    .ok_or_else(|| FixupError::UnknownDefaultCarrier(name.clone()))?;
                Some(id)
            }
            None => self.carriers.iter().next().map(|c| c.id),
        };
        Ok(())
    }

    /// Append a rule to a loaded snapshot, creating its domain in the carrier
    /// if needed. Run [`RouteSnapshot::fixup`] afterwards.
    pub(crate) fn insert_route(&mut self, spec: RouteSpec) -> Result<(), LoadError> {
        let mode = self.mode;
        let name = self
            .domain_names
            .name_of(spec.domain)
            .ok_or(LoadError::UnknownDomain(spec.domain))?;
        let carrier = self
            .carriers
            .get_mut(spec.carrier)
            .ok_or(LoadError::UnknownCarrier(spec.carrier))?;
        let domain = carrier.domain_or_insert(spec.domain, &name, mode);
        domain.routes.insert(&spec.prefix, RuleSet::new)?.append(spec)
    }

    /// Aggregate counts.
    #[must_use]
    pub fn stats(&self) -> SnapshotStats {
        let mut stats = SnapshotStats {
            generation: self.generation,
            carriers: self.carriers.len(),
            ..SnapshotStats::default()
        };
        for carrier in &self.carriers {
            stats.domains += carrier.domains().len();
            for domain in carrier.domains() {
                stats.prefixes += domain.routes.len();
                domain.routes.walk(|_, set| stats.rules += set.rule_count());
                domain
                    .failures
                    .walk(|_, list| stats.failure_rules += list.len());
            }
        }
        stats
    }

    /// Resolve a carrier selector.
    ///
    /// Id 0 selects the default carrier. An unknown carrier falls back to the
    /// default carrier when `fallback_default` is set.
    ///
    /// # Errors
    ///
    /// `UnknownCarrier` if nothing resolves.
    pub fn select_carrier(
        &self,
        selector: &Selector,
        fallback_default: bool,
    ) -> Result<&Carrier, LookupError> {
        let found = match selector {
            Selector::Id(0) => self.default_carrier(),
            Selector::Id(id) => self.carriers.get(*id),
            Selector::Name(name) => self
                .carrier_names
                .id_of(name)
                .and_then(|id| self.carriers.get(id)),
        };
        match found {
            Some(carrier) => Ok(carrier),
            None if fallback_default => {
                info!(carrier = %selector, "invalid carrier specified, using default carrier");
                self.default_carrier()
                    .ok_or_else(|| LookupError::UnknownCarrier(selector.to_string()))
            }
            None => Err(LookupError::UnknownCarrier(selector.to_string())),
        }
    }

    /// Resolve a domain selector within a carrier.
    ///
    /// # Errors
    ///
    /// `UnknownDomain` if the domain does not exist in the carrier.
    pub fn select_domain<'a>(
        &self,
        carrier: &'a Carrier,
        selector: &Selector,
    ) -> Result<&'a Domain, LookupError> {
        let id = match selector {
            Selector::Id(id) => Some(*id),
            Selector::Name(name) => self.domain_names.id_of(name),
        };
        id.and_then(|id| carrier.domain(id))
            .ok_or_else(|| LookupError::UnknownDomain {
                carrier: carrier.id,
                domain: selector.to_string(),
            })
    }

    /// Route a request against this snapshot.
    ///
    /// # Errors
    ///
    /// A `LookupError`; see [`LookupError::is_miss`] for telling "no route"
    /// apart from system errors.
    pub fn route(
        &self,
        request: &RouteRequest,
        options: &LookupOptions,
    ) -> Result<RouteDecision, LookupError> {
        let carrier = self.select_carrier(&request.carrier, options.fallback_default)?;
        let domain = self.select_domain(carrier, &request.domain)?;

        let rules = domain
            .routes
            .longest_match(&request.prefix_matching, true)
            .ok_or_else(|| LookupError::NoPrefixMatch(request.prefix_matching.clone()))?;
        let group = rules
            .find(request.flags)
            .ok_or(LookupError::NoMatchingRuleset(request.flags))?;
        if group.is_empty() {
            return Err(LookupError::EmptyRuleList);
        }

        let selection = match request.mode {
            SelectionMode::Weighted => {
                if group.dice_max() == 0 {
                    return Err(LookupError::ZeroProbability);
                }
                let dice = request
                    .hash_source
                    .hash(&request.inputs, group.dice_max())?;
                let used = if options.avoid_failed_destinations {
                    request.used_destinations.as_deref()
                } else {
                    None
                };
                group.select_weighted(dice, used)?
            }
            SelectionMode::StrictHash => {
                let targets = u32::try_from(group.max_targets()).unwrap_or(u32::MAX);
                let hash = request.hash_source.hash(&request.inputs, targets)?;
                group.select_by_hash(hash)?
            }
        };

        let decision = RouteDecision::from_rule(
            carrier.id,
            domain.id,
            selection.rule,
            selection.via_backup,
            &request.rewrite_user,
            request.secure,
        )?;
        debug!(
            user = %request.rewrite_user,
            uri = %decision.uri,
            carrier = carrier.id,
            domain = domain.id,
            "uri rewritten"
        );
        Ok(decision)
    }

    /// Find the domain to continue in after a failed attempt.
    ///
    /// # Errors
    ///
    /// `NoPrefixMatch` if the failure trie has nothing for the number,
    /// `NoFailureRule` if no rule accepts the failure, or a selector error.
    pub fn next_domain(
        &self,
        request: &NextDomainRequest,
        options: &LookupOptions,
    ) -> Result<NextDomain, LookupError> {
        let carrier = self.select_carrier(&request.carrier, options.fallback_default)?;
        let domain = self.select_domain(carrier, &request.domain)?;

        let list = domain
            .failures
            .longest_match(&request.prefix_matching, true)
            .ok_or_else(|| LookupError::NoPrefixMatch(request.prefix_matching.clone()))?;
        let rule = list
            .find(request.flags, &request.host, &request.reply_code)
            .ok_or_else(|| LookupError::NoFailureRule {
                flags: request.flags,
                host: request.host.clone(),
                reply_code: request.reply_code.clone(),
            })?;

        debug!(next_domain = rule.next_domain, "failure route matched");
        Ok(NextDomain {
            domain_id: rule.next_domain,
            domain: self
                .domain_names
                .name_of(rule.next_domain)
                .map(|n| n.to_string()),
            matched_prefix: rule.prefix.clone(),
            comment: rule.comment.clone(),
        })
    }
}

/// Snapshot under construction; the target a route source populates.
///
/// Sources register carriers and domains, then add rules by id. Nothing is
/// resolved until [`SnapshotBuilder::build`] runs the fixup pass.
///
/// # Example
///
/// ```
/// use carrier_router::routing::{MatchMode, RouteSpec, SnapshotBuilder};
///
/// let mut builder = SnapshotBuilder::new(MatchMode::Digits);
/// let carrier = builder.add_carrier("default");
/// let domain = builder.add_domain(carrier, "proxy").unwrap();
/// builder
///     .add_route(RouteSpec::new(carrier, domain, "49", "gw1").with_weight(0.5))
///     .unwrap();
/// builder
///     .add_route(RouteSpec::new(carrier, domain, "49", "gw2").with_weight(0.5))
///     .unwrap();
///
/// let snapshot = builder.build().unwrap();
/// assert_eq!(snapshot.stats().rules, 2);
/// ```
#[derive(Debug)]
pub struct SnapshotBuilder {
    mode: MatchMode,
    carriers: CarrierTable,
    carrier_names: NameMap,
    domain_names: NameMap,
    default_carrier: Option<String>,
}

impl SnapshotBuilder {
    /// Empty builder for the given trie alphabet.
    #[must_use]
    pub const fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            carriers: CarrierTable::new(),
            carrier_names: NameMap::new(),
            domain_names: NameMap::new(),
            default_carrier: None,
        }
    }

    /// Trie alphabet.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Name of the default carrier, resolved at build time.
    ///
    /// Without one, the carrier with the lowest id is the default.
    pub fn set_default_carrier(&mut self, name: impl Into<String>) -> &mut Self {
        self.default_carrier = Some(name.into());
        self
    }

    /// Register a carrier, returning its id.
    pub fn add_carrier(&mut self, name: &str) -> u32 {
        let id = self.carrier_names.intern(name);
        let name = self.carrier_names.name_of(id).unwrap_or_else(|| Arc::from(name));
        self.carriers.get_or_insert(id, &name);
        id
    }

    /// Id of a domain name, interning it if new.
    ///
    /// Used for failure rules naming a next domain that no carrier holds.
    pub fn domain_id(&mut self, name: &str) -> u32 {
        self.domain_names.intern(name)
    }

    /// Register a domain in a carrier, returning its id.
    ///
    /// # Errors
    ///
    /// `UnknownCarrier` if the carrier was not registered.
    pub fn add_domain(&mut self, carrier: u32, name: &str) -> Result<u32, LoadError> {
        let id = self.domain_names.intern(name);
        let name = self
            .domain_names
            .name_of(id)
            .unwrap_or_else(|| Arc::from(name));
        let mode = self.mode;
        self.carriers
            .get_mut(carrier)
            .ok_or(LoadError::UnknownCarrier(carrier))?
            .domain_or_insert(id, &name, mode);
        Ok(id)
    }

    fn domain_mut(&mut self, carrier: u32, domain: u32) -> Result<&mut Domain, LoadError> {
        self.carriers
            .get_mut(carrier)
            .ok_or(LoadError::UnknownCarrier(carrier))?
            .domain_mut(domain)
            .ok_or(LoadError::UnknownDomain(domain))
    }

    /// Add a normal routing rule.
    ///
    /// # Errors
    ///
    /// Unknown carrier or domain, an invalid prefix or an invalid weight.
    pub fn add_route(&mut self, spec: RouteSpec) -> Result<(), LoadError> {
        let domain = self.domain_mut(spec.carrier, spec.domain)?;
        domain.routes.insert(&spec.prefix, RuleSet::new)?.add(spec)
    }

    /// Add a failure routing rule.
    ///
    /// # Errors
    ///
    /// Unknown carrier or domain, an invalid prefix or an invalid reply code.
    pub fn add_failure_route(&mut self, spec: FailureRouteSpec) -> Result<(), LoadError> {
        let domain = self.domain_mut(spec.carrier, spec.domain)?;
        domain
            .failures
            .insert(&spec.prefix, FailureRuleList::new)?
            .insert(spec)
    }

    /// Run the fixup pass and produce a staged snapshot.
    ///
    /// # Errors
    ///
    /// The first `FixupError`; the partial data is dropped.
    pub fn build(self) -> Result<RouteSnapshot, FixupError> {
        let mut snapshot = RouteSnapshot {
            carriers: self.carriers,
            carrier_names: self.carrier_names,
            domain_names: self.domain_names,
            default_carrier_name: self.default_carrier,
            default_carrier: None,
            mode: self.mode,
            generation: 0,
            readers: Mutex::new(0),
            state: AtomicU8::new(SnapshotState::Staged as u8),
        };
        snapshot.fixup()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::hash::{HashInputs, HashSource};

    fn sample() -> RouteSnapshot {
        let mut b = SnapshotBuilder::new(MatchMode::Digits);
        let c = b.add_carrier("default");
        let premium = b.add_carrier("premium");
        let proxy = b.add_domain(c, "proxy").unwrap();
        let fallback = b.add_domain(c, "fallback").unwrap();
        b.add_domain(premium, "proxy").unwrap();

        b.add_route(RouteSpec::new(c, proxy, "49", "gw-de").with_hash_index(1))
            .unwrap();
        b.add_route(RouteSpec::new(c, proxy, "4930", "gw-berlin")).unwrap();
        b.add_route(
            RouteSpec::new(c, proxy, "4930", "gw-flagged").with_flags(1, 1),
        )
        .unwrap();
        b.add_route(RouteSpec::new(c, proxy, "", "gw-default")).unwrap();
        b.add_route(RouteSpec::new(premium, proxy, "", "gw-premium"))
            .unwrap();
        b.add_route(RouteSpec::new(c, fallback, "1", "gw-fb").with_strip(1))
            .unwrap();

        b.add_failure_route(
            crate::routing::FailureRouteSpec::new(c, proxy, "49", fallback)
                .with_reply_code("5.."),
        )
        .unwrap();
        b.set_default_carrier("default");
        b.build().unwrap()
    }

    fn request(carrier: impl Into<Selector>, number: &str) -> RouteRequest {
        RouteRequest::new(carrier, "proxy", number)
            .with_hash(HashSource::CallId, HashInputs::with_call_id("call-1"))
    }

    #[test]
    fn test_longest_prefix_routing() {
        let snap = sample();
        let opts = LookupOptions::default();

        let d = snap.route(&request(0, "+49301234"), &opts).unwrap();
        assert_eq!(d.host, "gw-berlin");
        assert_eq!(d.matched_prefix, "4930");
        assert_eq!(d.uri, "sip:+49301234@gw-berlin");

        let d = snap.route(&request(0, "4989"), &opts).unwrap();
        assert_eq!(d.host, "gw-de");

        let d = snap.route(&request(0, "1555"), &opts).unwrap();
        assert_eq!(d.host, "gw-default");
    }

    #[test]
    fn test_flag_groups() {
        let snap = sample();
        let opts = LookupOptions::default();
        let d = snap
            .route(&request(0, "4930").with_flags(3), &opts)
            .unwrap();
        assert_eq!(d.host, "gw-flagged");
    }

    #[test]
    fn test_carrier_selection() {
        let snap = sample();
        let opts = LookupOptions::default();

        assert_eq!(snap.route(&request("premium", "49"), &opts).unwrap().host, "gw-premium");
        assert_eq!(snap.route(&request(2, "49"), &opts).unwrap().host, "gw-premium");
        assert_eq!(
            snap.route(&request(9, "49"), &opts).unwrap_err(),
            LookupError::UnknownCarrier("9".into())
        );

        let fallback = LookupOptions {
            fallback_default: true,
            ..LookupOptions::default()
        };
        assert_eq!(snap.route(&request(9, "49"), &fallback).unwrap().host, "gw-de");
        assert_eq!(
            snap.route(&request("nope", "49"), &fallback).unwrap().carrier_id,
            1
        );
    }

    #[test]
    fn test_unknown_domain() {
        let snap = sample();
        let req = RouteRequest::new(0, "fax", "49");
        let err = snap.route(&req, &LookupOptions::default()).unwrap_err();
        assert!(matches!(err, LookupError::UnknownDomain { carrier: 1, .. }));
        assert!(err.is_miss());
    }

    #[test]
    fn test_no_prefix_match() {
        let snap = sample();
        let req = RouteRequest::new(0, "fallback", "2");
        assert_eq!(
            snap.route(&req, &LookupOptions::default()).unwrap_err(),
            LookupError::NoPrefixMatch("2".into())
        );
    }

    #[test]
    fn test_missing_hash_input_is_system_error() {
        let snap = sample();
        let req = RouteRequest::new(0, "proxy", "49");
        let err = snap.route(&req, &LookupOptions::default()).unwrap_err();
        assert!(!err.is_miss());
    }

    #[test]
    fn test_next_domain() {
        let snap = sample();
        let opts = LookupOptions::default();
        let req = NextDomainRequest::new(0, "proxy", "4930", "gw-berlin", "503");
        let next = snap.next_domain(&req, &opts).unwrap();
        assert_eq!(next.domain.as_deref(), Some("fallback"));

        let req = NextDomainRequest::new(0, "proxy", "4930", "gw-berlin", "486");
        assert!(matches!(
            snap.next_domain(&req, &opts).unwrap_err(),
            LookupError::NoFailureRule { .. }
        ));
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.carriers, 2);
        assert_eq!(stats.domains, 3);
        assert_eq!(stats.prefixes, 5);
        assert_eq!(stats.rules, 6);
        assert_eq!(stats.failure_rules, 1);
    }

    #[test]
    fn test_default_carrier_resolution() {
        let mut b = SnapshotBuilder::new(MatchMode::Digits);
        b.add_carrier("a");
        b.add_carrier("b");
        b.set_default_carrier("b");
        assert_eq!(b.build().unwrap().default_carrier_id(), Some(2));

        let mut b = SnapshotBuilder::new(MatchMode::Digits);
        b.add_carrier("a");
        assert_eq!(b.build().unwrap().default_carrier_id(), Some(1));

        let mut b = SnapshotBuilder::new(MatchMode::Digits);
        b.add_carrier("a");
        b.set_default_carrier("zzz");
        assert!(matches!(
            b.build(),
            Err(FixupError::UnknownDefaultCarrier(_))
        ));
    }

    #[test]
    fn test_builder_rejects_unknown_ids() {
        let mut b = SnapshotBuilder::new(MatchMode::Digits);
        let c = b.add_carrier("default");
        assert!(matches!(
            b.add_domain(5, "proxy"),
            Err(LoadError::UnknownCarrier(5))
        ));
        assert!(matches!(
            b.add_route(RouteSpec::new(c, 3, "1", "h")),
            Err(LoadError::UnknownDomain(3))
        ));
    }

    #[test]
    fn test_reader_pinning() {
        let snap = sample();
        assert_eq!(snap.state(), SnapshotState::Staged);
        snap.pin();
        snap.pin();
        assert_eq!(snap.readers(), 2);
        snap.unpin();
        snap.unpin();
        snap.unpin();
        assert_eq!(snap.readers(), 0);
        snap.set_state(SnapshotState::Live);
        assert_eq!(snap.state(), SnapshotState::Live);
    }
}
