//! Carrier and domain tables.
//!
//! Both tables are vectors kept sorted by id; lookups are binary searches and
//! inserts shift the tail to keep the order.

use std::sync::Arc;

use super::failure::FailureRuleList;
use super::rule::RuleSet;
use super::trie::{MatchMode, PrefixTrie};

/// A routing domain: one normal and one failure prefix trie.
#[derive(Debug, Clone)]
pub struct Domain {
    /// Domain id.
    pub id: u32,
    /// Interned domain name.
    pub name: Arc<str>,
    pub(crate) routes: PrefixTrie<RuleSet>,
    pub(crate) failures: PrefixTrie<FailureRuleList>,
}

impl Domain {
    /// Create an empty domain.
    #[must_use]
    pub const fn new(id: u32, name: Arc<str>, mode: MatchMode) -> Self {
        Self {
            id,
            name,
            routes: PrefixTrie::new(mode),
            failures: PrefixTrie::new(mode),
        }
    }

    /// Normal routing trie.
    #[must_use]
    pub const fn routes(&self) -> &PrefixTrie<RuleSet> {
        &self.routes
    }

    /// Failure routing trie.
    #[must_use]
    pub const fn failures(&self) -> &PrefixTrie<FailureRuleList> {
        &self.failures
    }
}

/// A carrier: a sorted table of domains.
#[derive(Debug, Clone)]
pub struct Carrier {
    /// Carrier id.
    pub id: u32,
    /// Interned carrier name.
    pub name: Arc<str>,
    domains: Vec<Domain>,
}

impl Carrier {
    /// Create a carrier without domains.
    #[must_use]
    pub const fn new(id: u32, name: Arc<str>) -> Self {
        Self {
            id,
            name,
            domains: Vec::new(),
        }
    }

    /// Domains in id order.
    #[must_use]
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub(crate) fn domains_mut(&mut self) -> &mut [Domain] {
        &mut self.domains
    }

    /// Domain by id.
    #[must_use]
    pub fn domain(&self, id: u32) -> Option<&Domain> {
        self.domains
            .binary_search_by_key(&id, |d| d.id)
            .ok()
            .map(|pos| &self.domains[pos])
    }

    /// Mutable domain by id.
    pub fn domain_mut(&mut self, id: u32) -> Option<&mut Domain> {
        self.domains
            .binary_search_by_key(&id, |d| d.id)
            .ok()
            .map(|pos| &mut self.domains[pos])
    }

    /// Domain by id, inserted at its sorted position if absent.
    pub fn domain_or_insert(&mut self, id: u32, name: &Arc<str>, mode: MatchMode) -> &mut Domain {
        let pos = match self.domains.binary_search_by_key(&id, |d| d.id) {
            Ok(pos) => pos,
            Err(pos) => {
                self.domains
                    .insert(pos, Domain::new(id, Arc::clone(name), mode));
                pos
            }
        };
        &mut self.domains[pos]
    }
}

/// Sorted table of carriers.
#[derive(Debug, Clone, Default)]
pub struct CarrierTable {
    carriers: Vec<Carrier>,
}

impl CarrierTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            carriers: Vec::new(),
        }
    }

    /// Carriers in id order.
    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Carrier> {
        self.carriers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Carrier> {
        self.carriers.iter_mut()
    }

    /// Number of carriers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    /// True if there are no carriers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }

    /// Carrier by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Carrier> {
        self.carriers
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|pos| &self.carriers[pos])
    }

    /// Mutable carrier by id.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Carrier> {
        self.carriers
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|pos| &mut self.carriers[pos])
    }

    /// Carrier by id, inserted at its sorted position if absent.
    pub fn get_or_insert(&mut self, id: u32, name: &Arc<str>) -> &mut Carrier {
        let pos = match self.carriers.binary_search_by_key(&id, |c| c.id) {
            Ok(pos) => pos,
            Err(pos) => {
                self.carriers.insert(pos, Carrier::new(id, Arc::clone(name)));
                pos
            }
        };
        &mut self.carriers[pos]
    }
}

impl<'a> IntoIterator for &'a CarrierTable {
    type Item = &'a Carrier;
    type IntoIter = std::slice::Iter<'a, Carrier>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
