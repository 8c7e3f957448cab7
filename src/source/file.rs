//! Flat route file source.
//!
//! The file holds a single carrier named `default`; every `domain` block
//! becomes a domain of that carrier. Writing the file back renders the
//! default carrier of a snapshot, keeping a `.bak` copy of the previous
//! version when backups are enabled.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::format::{parse_route_file, render_route_file, DomainBlock, PrefixBlock, RouteFile, TargetBlock};
use super::{RouteSource, SourceKind};
use crate::error::LoadError;
use crate::routing::{RouteSnapshot, RouteSpec, SnapshotBuilder};

/// Name of the only carrier a route file defines.
pub const FILE_CARRIER: &str = "default";

/// Route source reading and writing a flat route file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    backup: bool,
}

impl FileSource {
    /// Source for the file at `path`, with backups on store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup: true,
        }
    }

    /// Enable or disable the `.bak` copy on store.
    #[must_use]
    pub const fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Path of the route file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(extension);
        PathBuf::from(name)
    }

    /// Path of the backup copy.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".bak")
    }

    /// Read and parse the file without building a snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound`, an I/O error or a parse error.
    pub fn read(&self) -> Result<RouteFile, LoadError> {
        if !self.path.exists() {
            return Err(LoadError::NotFound {
                path: self.path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(&self.path)?;
        parse_route_file(&contents)
    }
}

/// Render the default carrier of a snapshot as a route file.
#[must_use]
pub fn snapshot_to_file(snapshot: &RouteSnapshot) -> RouteFile {
    let Some(carrier) = snapshot.default_carrier() else {
        return RouteFile::default();
    };

    let domains = carrier
        .domains()
        .iter()
        .map(|domain| {
            let mut prefixes = Vec::new();
            domain.routes().walk(|prefix, set| {
                let targets: Vec<TargetBlock> = set
                    .groups()
                    .iter()
                    .flat_map(|g| g.rules())
                    .map(|rule| TargetBlock {
                        host: rule.host.clone(),
                        prob: rule.orig_weight,
                        hash_index: rule.hash_index,
                        status: rule.active,
                        strip: rule.strip,
                        rewrite_prefix: rule.local_prefix.clone(),
                        rewrite_suffix: rule.local_suffix.clone(),
                        comment: rule.comment.clone(),
                        backup: rule.backup.map(|b| b.hash_index),
                        backed_up: rule.backed_up_by.iter().map(|b| b.hash_index).collect(),
                    })
                    .collect();
                if !targets.is_empty() {
                    prefixes.push(PrefixBlock {
                        prefix: prefix.to_string(),
                        max_targets: Some(targets.len()),
                        targets,
                    });
                }
            });
            DomainBlock {
                name: domain.name.to_string(),
                prefixes,
            }
        })
        .collect();

    RouteFile { domains }
}

impl RouteSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn describe(&self) -> String {
        format!("route file {}", self.path.display())
    }

    fn load(&self, builder: &mut SnapshotBuilder) -> Result<(), LoadError> {
        let file = self.read()?;

        let carrier = builder.add_carrier(FILE_CARRIER);
        builder.set_default_carrier(FILE_CARRIER);

        let mut rules = 0usize;
        for domain in &file.domains {
            let domain_id = builder.add_domain(carrier, &domain.name)?;
            for prefix in &domain.prefixes {
                for target in &prefix.targets {
                    let mut spec = RouteSpec::new(carrier, domain_id, prefix.prefix.as_str(), target.host.as_str())
                        .with_weight(target.prob)
                        .with_hash_index(target.hash_index)
                        .with_strip(target.strip)
                        .with_rewrite(target.rewrite_prefix.as_str(), target.rewrite_suffix.as_str())
                        .with_backed_up(target.backed_up.clone())
                        .with_comment(target.comment.as_str());
                    if let Some(max_targets) = prefix.max_targets {
                        spec = spec.with_max_targets(max_targets);
                    }
                    if let Some(backup) = target.backup {
                        spec = spec.with_backup(backup);
                    }
                    if !target.status {
                        spec = spec.inactive();
                    }
                    builder.add_route(spec)?;
                    rules += 1;
                }
            }
        }

        debug!(
            path = %self.path.display(),
            domains = file.domains.len(),
            rules,
            "route file loaded"
        );
        Ok(())
    }

    fn store(&self, snapshot: &RouteSnapshot) -> Result<(), LoadError> {
        let text = render_route_file(&snapshot_to_file(snapshot));

        if self.backup && self.path.exists() {
            std::fs::copy(&self.path, self.backup_path())?;
        }

        let tmp = self.sibling(".tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), "route file written");
        Ok(())
    }
}
