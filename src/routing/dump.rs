//! Route dumps for the `dump_routes` command.
//!
//! A [`RouteDump`] is plain data (serializable for the IPC reply); its
//! `Display` impl renders the classic text listing, one line per rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::carrier::Domain;
use super::rule::{RuleGroup, DICE_SCALE};
use super::snapshot::RouteSnapshot;

/// One rule in a dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpEntry {
    /// Prefix, `NULL` for the empty prefix.
    pub prefix: String,
    /// Share of the group's total weight, in percent.
    pub probability: f64,
    /// Rewrite host.
    pub host: String,
    /// ON/OFF.
    pub active: bool,
    /// Strip count.
    pub strip: u32,
    /// Local prefix.
    pub local_prefix: String,
    /// Local suffix.
    pub local_suffix: String,
    /// Comment.
    pub comment: String,
    /// Host of the backup, for inactive rules with a resolved backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backed_up_by: Option<String>,
    /// Hosts of the rules this one is a backup for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_for: Vec<String>,
}

impl DumpEntry {
    fn from_group(group: &RuleGroup) -> Vec<Self> {
        group
            .rules()
            .iter()
            .map(|rule| {
                let share = if group.dice_max() > 0 {
                    rule.weight * f64::from(DICE_SCALE) / f64::from(group.dice_max())
                } else {
                    rule.weight
                };
                let probability = share * 100.0;
                let backed_up_by = if rule.active {
                    None
                } else {
                    group.backup_of(rule).map(|b| b.host.clone())
                };
                let backup_for = rule
                    .backed_up_by
                    .iter()
                    .filter_map(|l| l.slot())
                    .filter_map(|slot| group.rules().get(slot))
                    .map(|r| r.host.clone())
                    .collect();
                Self {
                    prefix: if rule.prefix.is_empty() {
                        "NULL".to_string()
                    } else {
                        rule.prefix.clone()
                    },
                    probability,
                    host: rule.host.clone(),
                    active: rule.active,
                    strip: rule.strip,
                    local_prefix: rule.local_prefix.clone(),
                    local_suffix: rule.local_suffix.clone(),
                    comment: rule.comment.clone(),
                    backed_up_by,
                    backup_for,
                }
            })
            .collect()
    }
}

impl fmt::Display for DumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>10}: {:.3} %, '{}': {}, '{}', '{}', '{}', '{}'",
            self.prefix,
            self.probability,
            self.host,
            if self.active { "ON" } else { "OFF" },
            self.strip,
            self.local_prefix,
            self.local_suffix,
            self.comment
        )?;
        if let Some(backup) = &self.backed_up_by {
            writeln!(f, "            Rule is backed up by: {backup}")?;
        }
        for host in &self.backup_for {
            writeln!(f, "            Rule is backup for: {host}")?;
        }
        Ok(())
    }
}

/// All rules of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDump {
    /// Domain id.
    pub id: u32,
    /// Domain name.
    pub name: String,
    /// Rules in trie order.
    pub entries: Vec<DumpEntry>,
}

impl DomainDump {
    fn new(domain: &Domain) -> Self {
        let mut entries = Vec::new();
        domain.routes().walk(|_, set| {
            for group in set.groups() {
                entries.extend(DumpEntry::from_group(group));
            }
        });
        Self {
            id: domain.id,
            name: domain.name.to_string(),
            entries,
        }
    }
}

/// All domains of one carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierDump {
    /// Carrier id.
    pub id: u32,
    /// Carrier name.
    pub name: String,
    /// Domains in id order.
    pub domains: Vec<DomainDump>,
}

/// Dump of a whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDump {
    /// Generation the dump was taken from.
    pub generation: u64,
    /// Carriers in id order.
    pub carriers: Vec<CarrierDump>,
}

impl RouteDump {
    /// Dump a snapshot.
    #[must_use]
    pub fn new(snapshot: &RouteSnapshot) -> Self {
        let carriers = snapshot
            .carriers()
            .iter()
            .map(|carrier| CarrierDump {
                id: carrier.id,
                name: carrier.name.to_string(),
                domains: carrier.domains().iter().map(DomainDump::new).collect(),
            })
            .collect();
        Self {
            generation: snapshot.generation(),
            carriers,
        }
    }
}

impl fmt::Display for RouteDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Printing routing information:")?;
        for carrier in &self.carriers {
            writeln!(f, "Printing tree for carrier '{}' ({})", carrier.name, carrier.id)?;
            for domain in &carrier.domains {
                writeln!(f, "Printing tree for domain '{}' ({})", domain.name, domain.id)?;
                for entry in &domain.entries {
                    write!(f, "{entry}")?;
                }
            }
        }
        Ok(())
    }
}
