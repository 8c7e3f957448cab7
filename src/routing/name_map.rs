//! Name ↔ id interning for carriers and domains.
//!
//! Names are interned once at load time so that the lookup hot path works
//! with small integers. Ids are handed out sequentially in first-seen order,
//! starting at 1; id 0 is reserved (it selects the default carrier).

use std::sync::Arc;

/// A single interned name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Assigned id (>= 1).
    pub id: u32,
    /// Interned name, shared with the carrier/domain records.
    pub name: Arc<str>,
}

/// Bidirectional name ↔ id map.
///
/// Entries are kept sorted by id (ids are assigned in ascending order), so
/// `name_of` is a binary search. `id_of` is a linear scan; it is only used
/// while loading and for admin selectors.
///
/// # Example
///
/// ```
/// use carrier_router::routing::NameMap;
///
/// let mut map = NameMap::new();
/// let voip = map.intern("voip");
/// let pstn = map.intern("pstn");
///
/// assert_eq!(voip, 1);
/// assert_eq!(pstn, 2);
/// assert_eq!(map.intern("voip"), 1);
/// assert_eq!(map.name_of(2).as_deref(), Some("pstn"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    entries: Vec<NameEntry>,
}

impl NameMap {
    /// Create an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Return the id of `name`, assigning the next free id if it is new.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.id_of(name) {
            return id;
        }
        let id = self.next_id();
        self.entries.push(NameEntry {
            id,
            name: Arc::from(name),
        });
        id
    }

    /// Look up the id of a name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| &*e.name == name)
            .map(|e| e.id)
    }

    /// Look up the name of an id.
    #[must_use]
    pub fn name_of(&self, id: u32) -> Option<Arc<str>> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|pos| Arc::clone(&self.entries[pos].name))
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &NameEntry> {
        self.entries.iter()
    }

    fn next_id(&self) -> u32 {
        self.entries.last().map_or(1, |e| e.id + 1)
    }
}
