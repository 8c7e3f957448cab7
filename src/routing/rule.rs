//! Routing rules, rule groups and rule selection.
//!
//! A trie node carries a [`RuleSet`]: rule groups keyed by a `(flags, mask)`
//! selector, ordered by descending mask so the most specific selector is
//! tried first. Each [`RuleGroup`] holds its alternative [`Rule`]s in list
//! order (zero-weight rules first, then by hash index) plus a direct-access
//! index from hash index to list slot.
//!
//! # Fixup
//!
//! Loaders insert rules without resolving anything. [`RuleGroup::fixup`]
//! then checks the declared target count, assigns missing hash indices,
//! computes the cumulative dice thresholds and resolves backup links in both
//! directions. Fixup is idempotent.
//!
//! # Selection
//!
//! Two modes are supported:
//!
//! - weighted: `dice = hash % dice_max`, the first rule whose `dice_to`
//!   exceeds `dice` wins (the last rule catches everything else);
//! - strict hash: `index[hash % max_targets]`, no scan and no retry.
//!
//! In both modes an inactive pick is replaced by its backup if that backup
//! is active, otherwise the lookup fails.

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{FixupError, LoadError, LookupError};

/// Fixed-point scale of rule weights.
pub const DICE_SCALE: u32 = 1000;

/// Maximum number of already tried destinations considered by weighted
/// selection.
pub const MAX_USED_DESTINATIONS: usize = 64;

/// Reference from one rule to another by hash index.
///
/// The hash index is the identity of the relation; `slot` is a cache of the
/// target's list position, rebuilt by every fixup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackupLink {
    /// Hash index of the referenced rule.
    pub hash_index: u32,
    slot: Option<usize>,
}

impl BackupLink {
    /// Unresolved reference to `hash_index`.
    #[must_use]
    pub const fn new(hash_index: u32) -> Self {
        Self {
            hash_index,
            slot: None,
        }
    }

    pub(crate) const fn resolved(hash_index: u32, slot: usize) -> Self {
        Self {
            hash_index,
            slot: Some(slot),
        }
    }

    /// List slot of the referenced rule, once resolved.
    #[must_use]
    pub const fn slot(&self) -> Option<usize> {
        self.slot
    }
}

/// One rewrite alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Full prefix the rule was registered under.
    pub prefix: String,
    /// Rewrite host. Empty means "blocklisted destination".
    pub host: String,
    /// Number of leading characters stripped from the user part.
    pub strip: u32,
    /// Prepended to the (stripped) user part.
    pub local_prefix: String,
    /// Appended to the user part.
    pub local_suffix: String,
    /// Probability weight, `0.0..=1.0`.
    pub weight: f64,
    /// Weight as loaded, used when writing the rule back.
    pub orig_weight: f64,
    /// Cumulative dice threshold, set by fixup.
    pub dice_to: u32,
    /// 1-based position in the group's index, 0 until fixup assigns one.
    pub hash_index: u32,
    /// Active (ON) or inactive (OFF).
    pub active: bool,
    /// Free-form comment.
    pub comment: String,
    /// Rule used instead of this one while this one is inactive.
    pub backup: Option<BackupLink>,
    /// Rules using this one as their backup.
    pub backed_up_by: Vec<BackupLink>,
}

impl Rule {
    fn from_spec(spec: RouteSpec) -> Self {
        Self {
            prefix: spec.prefix,
            host: spec.host,
            strip: spec.strip,
            local_prefix: spec.local_prefix,
            local_suffix: spec.local_suffix,
            weight: spec.weight,
            orig_weight: spec.weight,
            dice_to: 0,
            hash_index: spec.hash_index,
            active: spec.active,
            comment: spec.comment,
            backup: spec.backup.map(BackupLink::new),
            backed_up_by: spec.backed_up.into_iter().map(BackupLink::new).collect(),
        }
    }

    /// List ordering key: zero-weight rules first, then by hash index,
    /// unassigned indices last.
    fn order_key(&self) -> (bool, u32) {
        let index = if self.hash_index == 0 {
            u32::MAX
        } else {
            self.hash_index
        };
        (self.weight > 0.0, index)
    }
}

/// Loader input for one normal routing rule.
///
/// # Example
///
/// ```
/// use carrier_router::routing::RouteSpec;
///
/// let spec = RouteSpec::new(1, 1, "49", "gw1.example.net")
///     .with_weight(0.7)
///     .with_strip(2)
///     .with_rewrite("0", "")
///     .with_hash_index(1);
///
/// assert_eq!(spec.weight, 0.7);
/// assert!(spec.active);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    /// Carrier id.
    pub carrier: u32,
    /// Domain id.
    pub domain: u32,
    /// Prefix the rule is registered under.
    pub prefix: String,
    /// Group selector flags.
    pub flags: u32,
    /// Group selector mask.
    pub mask: u32,
    /// Declared number of rules of the group, checked by fixup.
    pub max_targets: Option<usize>,
    /// Rewrite host.
    pub host: String,
    /// Characters to strip from the user part.
    pub strip: u32,
    /// Local prefix.
    pub local_prefix: String,
    /// Local suffix.
    pub local_suffix: String,
    /// Probability weight.
    pub weight: f64,
    /// Explicit hash index, 0 for "assign at fixup".
    pub hash_index: u32,
    /// Status.
    pub active: bool,
    /// Backup hash index.
    pub backup: Option<u32>,
    /// Hash indices of rules backed up by this one.
    pub backed_up: Vec<u32>,
    /// Comment.
    pub comment: String,
}

impl RouteSpec {
    /// Active rule with weight 1 and no rewrite.
    pub fn new(carrier: u32, domain: u32, prefix: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            carrier,
            domain,
            prefix: prefix.into(),
            flags: 0,
            mask: 0,
            max_targets: None,
            host: host.into(),
            strip: 0,
            local_prefix: String::new(),
            local_suffix: String::new(),
            weight: 1.0,
            hash_index: 0,
            active: true,
            backup: None,
            backed_up: Vec::new(),
            comment: String::new(),
        }
    }

    /// Set the group selector.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32, mask: u32) -> Self {
        self.flags = flags;
        self.mask = mask;
        self
    }

    /// Set the weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the explicit hash index.
    #[must_use]
    pub const fn with_hash_index(mut self, hash_index: u32) -> Self {
        self.hash_index = hash_index;
        self
    }

    /// Set the strip count.
    #[must_use]
    pub const fn with_strip(mut self, strip: u32) -> Self {
        self.strip = strip;
        self
    }

    /// Set local prefix and suffix.
    #[must_use]
    pub fn with_rewrite(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.local_prefix = prefix.into();
        self.local_suffix = suffix.into();
        self
    }

    /// Mark the rule inactive.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Set the backup hash index.
    #[must_use]
    pub const fn with_backup(mut self, hash_index: u32) -> Self {
        self.backup = Some(hash_index);
        self
    }

    /// Set the backed-up hash indices.
    #[must_use]
    pub fn with_backed_up(mut self, indices: Vec<u32>) -> Self {
        self.backed_up = indices;
        self
    }

    /// Declare the group's target count.
    #[must_use]
    pub const fn with_max_targets(mut self, max_targets: usize) -> Self {
        self.max_targets = Some(max_targets);
        self
    }

    /// Set the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

/// Outcome of rule selection.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// The rule to rewrite with.
    pub rule: &'a Rule,
    /// True if the picked rule was inactive and its backup was taken.
    pub via_backup: bool,
}

/// Alternative rules for one `(flags, mask)` selector at one trie node.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleGroup {
    flags: u32,
    mask: u32,
    rules: Vec<Rule>,
    index: Vec<usize>,
    dice_max: u32,
    declared_targets: Option<usize>,
}

impl RuleGroup {
    /// Create an empty group.
    #[must_use]
    pub const fn new(flags: u32, mask: u32) -> Self {
        Self {
            flags,
            mask,
            rules: Vec::new(),
            index: Vec::new(),
            dice_max: 0,
            declared_targets: None,
        }
    }

    /// Selector flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Selector mask.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.mask
    }

    /// True if request flags select this group.
    #[inline]
    #[must_use]
    pub const fn matches(&self, flags: u32) -> bool {
        flags & self.mask == self.flags
    }

    /// Rules in list order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the group has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Sum of all scaled weights.
    #[must_use]
    pub const fn dice_max(&self) -> u32 {
        self.dice_max
    }

    /// Declared target count (the rule count once fixed up).
    #[must_use]
    pub fn max_targets(&self) -> usize {
        self.declared_targets.unwrap_or(self.rules.len())
    }

    /// Rule with the given 1-based hash index.
    #[must_use]
    pub fn rule_by_hash(&self, hash_index: u32) -> Option<&Rule> {
        self.slot_of_hash(hash_index).map(|slot| &self.rules[slot])
    }

    /// List slot of the given 1-based hash index.
    #[must_use]
    pub fn slot_of_hash(&self, hash_index: u32) -> Option<usize> {
        let pos = usize::try_from(hash_index).ok()?.checked_sub(1)?;
        self.index.get(pos).copied()
    }

    /// Resolved backup of a rule.
    #[must_use]
    pub fn backup_of(&self, rule: &Rule) -> Option<&Rule> {
        rule.backup
            .and_then(|b| b.slot)
            .and_then(|slot| self.rules.get(slot))
    }

    pub(crate) fn declare_targets(&mut self, max_targets: usize) {
        if self.declared_targets.is_none() {
            self.declared_targets = Some(max_targets);
        }
    }

    /// Insert a rule keeping list order; equal keys keep insertion order.
    pub(crate) fn insert(&mut self, rule: Rule) {
        let key = rule.order_key();
        let pos = self.rules.partition_point(|r| r.order_key() <= key);
        self.rules.insert(pos, rule);
    }

    /// Replace the whole rule list in one step. Slots and thresholds are
    /// stale until the next fixup.
    pub(crate) fn replace_rules(&mut self, rules: Vec<Rule>, max_targets: usize) {
        self.rules = rules;
        self.declared_targets = Some(max_targets);
    }

    /// Validate the group and resolve indices, thresholds and backup links.
    ///
    /// # Errors
    ///
    /// Returns a `FixupError` if the rule count differs from the declared
    /// target count, an explicit hash index is out of range or duplicated, or
    /// a backup reference cannot be resolved.
    pub fn fixup(&mut self, prefix: &str) -> Result<(), FixupError> {
        let n = self.rules.len();
        if let Some(declared) = self.declared_targets {
            if declared != n {
                return Err(FixupError::TargetCountMismatch {
                    prefix: prefix.to_string(),
                    rules: n,
                    declared,
                });
            }
        }

        self.assign_hash_indices(prefix)?;

        self.rules.sort_by_key(Rule::order_key);
        self.index = vec![0; n];
        for (slot, rule) in self.rules.iter().enumerate() {
            self.index[rule.hash_index as usize - 1] = slot;
        }

        let mut dice = 0u32;
        for rule in &mut self.rules {
            dice = dice.saturating_add(weight_to_dice(rule.weight));
            rule.dice_to = dice;
        }
        self.dice_max = dice;

        self.link_backups(prefix)?;
        self.declared_targets = Some(n);
        Ok(())
    }

    fn assign_hash_indices(&mut self, prefix: &str) -> Result<(), FixupError> {
        let n = self.rules.len();
        let mut taken = vec![false; n];
        for rule in self.rules.iter().filter(|r| r.hash_index > 0) {
            let pos = rule.hash_index as usize;
            if pos > n {
                return Err(FixupError::HashIndexTooLarge {
                    prefix: prefix.to_string(),
                    index: rule.hash_index,
                    max: n,
                });
            }
            if taken[pos - 1] {
                return Err(FixupError::DuplicateHashIndex {
                    prefix: prefix.to_string(),
                    index: rule.hash_index,
                });
            }
            taken[pos - 1] = true;
        }

        let mut free = taken
            .iter()
            .enumerate()
            .filter(|(_, t)| !**t)
            .map(|(pos, _)| pos + 1);
        for rule in self.rules.iter_mut().filter(|r| r.hash_index == 0) {
            if let Some(pos) = free.next() {
                // pos <= n, which fits in u32 for any group a loader can build
                #[allow(clippy::cast_possible_truncation)]
                let index = pos as u32;
                rule.hash_index = index;
            }
        }
        Ok(())
    }

    fn link_backups(&mut self, prefix: &str) -> Result<(), FixupError> {
        let mut backups: Vec<Option<u32>> = self
            .rules
            .iter()
            .map(|r| r.backup.map(|b| b.hash_index))
            .collect();

        // Declarations on the backup side fill in or confirm the dependent side.
        for rule in &self.rules {
            for dep in &rule.backed_up_by {
                let Some(dep_slot) = self.slot_of_hash(dep.hash_index) else {
                    return Err(FixupError::MissingBackedUp {
                        prefix: prefix.to_string(),
                        host: rule.host.clone(),
                        index: dep.hash_index,
                    });
                };
                match backups[dep_slot] {
                    None => backups[dep_slot] = Some(rule.hash_index),
                    Some(b) if b == rule.hash_index => {}
                    Some(b) => {
                        return Err(FixupError::InconsistentBackup {
                            prefix: prefix.to_string(),
                            index: dep.hash_index,
                            backup: rule.hash_index,
                            actual: Some(b),
                        })
                    }
                }
            }
        }

        let mut resolved = Vec::with_capacity(backups.len());
        for (slot, backup) in backups.iter().enumerate() {
            let link = match backup {
                None => None,
                Some(b) => {
                    let Some(target) = self.slot_of_hash(*b) else {
                        return Err(FixupError::MissingBackup {
                            prefix: prefix.to_string(),
                            host: self.rules[slot].host.clone(),
                            index: *b,
                        });
                    };
                    Some(BackupLink::resolved(*b, target))
                }
            };
            resolved.push(link);
        }

        for rule in &mut self.rules {
            rule.backed_up_by.clear();
        }
        for (slot, link) in resolved.into_iter().enumerate() {
            self.rules[slot].backup = link;
            if let Some(link) = link {
                let dep = BackupLink::resolved(self.rules[slot].hash_index, slot);
                if let Some(target) = link.slot {
                    self.rules[target].backed_up_by.push(dep);
                }
            }
        }
        for rule in &mut self.rules {
            rule.backed_up_by.sort_by_key(|l| l.hash_index);
        }
        Ok(())
    }

    /// Weighted selection.
    ///
    /// `dice` must be `hash % dice_max`. When `used` is given, a pick whose
    /// host was already tried is replaced by a uniformly random untried rule.
    ///
    /// # Errors
    ///
    /// `EmptyRuleList`, `ZeroProbability`, `AllDestinationsUsed` or
    /// `AllRoutesOff`.
    pub fn select_weighted(
        &self,
        dice: u32,
        used: Option<&[String]>,
    ) -> Result<Selection<'_>, LookupError> {
        if self.rules.is_empty() {
            return Err(LookupError::EmptyRuleList);
        }
        if self.dice_max == 0 {
            return Err(LookupError::ZeroProbability);
        }

        // first rule whose threshold exceeds the dice, the last rule otherwise
        let mut slot = self
            .rules
            .iter()
            .position(|r| r.dice_to > dice)
            .unwrap_or(self.rules.len() - 1);

        if let Some(used) = used {
            let used = if used.len() > MAX_USED_DESTINATIONS {
                warn!(
                    count = used.len(),
                    "used destination list too long, only the first {MAX_USED_DESTINATIONS} entries are considered"
                );
                &used[..MAX_USED_DESTINATIONS]
            } else {
                used
            };
            let is_used = |r: &Rule| used.iter().any(|h| *h == r.host);
            if is_used(&self.rules[slot]) {
                let untried: Vec<usize> = (0..self.rules.len())
                    .filter(|&s| !is_used(&self.rules[s]))
                    .collect();
                if untried.is_empty() {
                    return Err(LookupError::AllDestinationsUsed);
                }
                slot = untried[rand::thread_rng().gen_range(0..untried.len())];
                debug!(host = %self.rules[slot].host, "picked untried destination");
            }
        }

        self.resolve_active(slot).ok_or(LookupError::AllRoutesOff)
    }

    /// Strict-hash selection.
    ///
    /// `hash` must be `hash % max_targets`; it selects the rule with hash
    /// index `hash + 1`. An inactive rule is replaced by its backup once.
    ///
    /// # Errors
    ///
    /// `EmptyRuleList` or `NoRouteForHash`.
    pub fn select_by_hash(&self, hash: u32) -> Result<Selection<'_>, LookupError> {
        if self.rules.is_empty() {
            return Err(LookupError::EmptyRuleList);
        }
        let wanted = hash.saturating_add(1);
        let slot = match self.slot_of_hash(wanted) {
            Some(slot) => slot,
            None => {
                warn!(wanted, rules = self.rules.len(), "too large desired hash, taking highest");
                self.index.last().copied().unwrap_or(self.rules.len() - 1)
            }
        };
        let selection = self.resolve_active(slot);
        debug!(
            wanted,
            selected = selection.map(|s| s.rule.hash_index),
            "strict hash selection"
        );
        selection.ok_or(LookupError::NoRouteForHash(wanted))
    }

    fn resolve_active(&self, slot: usize) -> Option<Selection<'_>> {
        let rule = &self.rules[slot];
        if rule.active {
            return Some(Selection {
                rule,
                via_backup: false,
            });
        }
        self.backup_of(rule)
            .filter(|b| b.active)
            .map(|backup| Selection {
                rule: backup,
                via_backup: true,
            })
    }
}

/// Scale a weight to dice units, rounding to the nearest unit.
#[must_use]
pub fn weight_to_dice(weight: f64) -> u32 {
    let scaled = (weight * f64::from(DICE_SCALE)).round();
    if scaled <= 0.0 {
        0
    } else {
        // weights are validated to 0..=1 on load
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dice = scaled as u32;
        dice
    }
}

/// Validate a loader-supplied weight.
pub(crate) fn check_weight(host: &str, weight: f64) -> Result<(), LoadError> {
    if weight.is_finite() && (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(LoadError::InvalidWeight {
            host: host.to_string(),
            weight,
        })
    }
}

/// All rule groups of one trie node, most specific mask first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    groups: Vec<RuleGroup>,
}

impl RuleSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Groups in match order.
    #[must_use]
    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut Vec<RuleGroup> {
        &mut self.groups
    }

    /// First group selected by `flags`.
    #[must_use]
    pub fn find(&self, flags: u32) -> Option<&RuleGroup> {
        self.groups.iter().find(|g| g.matches(flags))
    }

    /// Total number of rules in all groups.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(RuleGroup::len).sum()
    }

    /// True if there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group with exactly this selector, created (in mask order) if absent.
    pub(crate) fn group_or_insert(&mut self, flags: u32, mask: u32) -> &mut RuleGroup {
        if let Some(pos) = self
            .groups
            .iter()
            .position(|g| g.flags == flags && g.mask == mask)
        {
            return &mut self.groups[pos];
        }
        let pos = self.groups.partition_point(|g| g.mask >= mask);
        self.groups.insert(pos, RuleGroup::new(flags, mask));
        &mut self.groups[pos]
    }

    /// Insert a loader-supplied rule.
    pub(crate) fn add(&mut self, spec: RouteSpec) -> Result<(), LoadError> {
        check_weight(&spec.host, spec.weight)?;
        let group = self.group_or_insert(spec.flags, spec.mask);
        if let Some(max_targets) = spec.max_targets {
            group.declare_targets(max_targets);
        }
        group.insert(Rule::from_spec(spec));
        Ok(())
    }

    /// Insert one more rule into a fixed-up group, growing its declared
    /// target count with it.
    pub(crate) fn append(&mut self, spec: RouteSpec) -> Result<(), LoadError> {
        check_weight(&spec.host, spec.weight)?;
        let group = self.group_or_insert(spec.flags, spec.mask);
        group.insert(Rule::from_spec(spec));
        group.declared_targets = Some(group.rules.len());
        Ok(())
    }

    /// Fix up every group.
    ///
    /// # Errors
    ///
    /// The first group error.
    pub fn fixup(&mut self, prefix: &str) -> Result<(), FixupError> {
        self.groups.iter_mut().try_for_each(|g| g.fixup(prefix))
    }
}
