//! Fixed fan-out prefix trie keyed by dialed-number prefixes.
//!
//! Each node has one child slot per symbol of the alphabet (10 decimal digits
//! or 128 ASCII bytes) and an optional payload. Lookups return the payload of
//! the deepest node along the key that carries one, so a rule for `"49"` wins
//! over a rule for `"4"` when routing `"4930..."`.
//!
//! # Example
//!
//! ```
//! use carrier_router::routing::{MatchMode, PrefixTrie};
//!
//! let mut trie: PrefixTrie<&str> = PrefixTrie::new(MatchMode::Digits);
//! *trie.insert("4", || "").unwrap() = "germany";
//! *trie.insert("4930", || "").unwrap() = "berlin";
//!
//! assert_eq!(trie.longest_match("+49301234", true), Some(&"berlin"));
//! assert_eq!(trie.longest_match("4989", true), Some(&"germany"));
//! assert_eq!(trie.longest_match("1555", true), None);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Trie alphabet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Decimal digits only (branching factor 10).
    #[default]
    Digits,
    /// 7-bit ASCII bytes (branching factor 128).
    Bytes,
}

impl MatchMode {
    /// Build from a branching factor (10 or 128).
    #[must_use]
    pub const fn from_width(width: u32) -> Option<Self> {
        match width {
            10 => Some(Self::Digits),
            128 => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Branching factor of the alphabet.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Digits => 10,
            Self::Bytes => 128,
        }
    }

    /// Child slot for a key byte, if the byte belongs to the alphabet.
    #[inline]
    #[must_use]
    pub const fn slot(self, byte: u8) -> Option<usize> {
        match self {
            Self::Digits if byte.is_ascii_digit() => Some((byte - b'0') as usize),
            Self::Bytes if byte < 128 => Some(byte as usize),
            _ => None,
        }
    }

    /// Key byte of a child slot.
    #[inline]
    const fn symbol(self, slot: usize) -> u8 {
        match self {
            // slot < 10 here
            #[allow(clippy::cast_possible_truncation)]
            Self::Digits => b'0' + slot as u8,
            #[allow(clippy::cast_possible_truncation)]
            Self::Bytes => slot as u8,
        }
    }
}

struct TrieNode<T> {
    children: Vec<Option<Box<TrieNode<T>>>>,
    payload: Option<T>,
}

impl<T> TrieNode<T> {
    const fn new() -> Self {
        Self {
            children: Vec::new(),
            payload: None,
        }
    }

    fn child(&self, slot: usize) -> Option<&Self> {
        self.children.get(slot).and_then(|c| c.as_deref())
    }

    fn child_or_insert(&mut self, slot: usize, width: usize) -> &mut Self {
        if self.children.is_empty() {
            self.children.resize_with(width, || None);
        }
        self.children[slot].get_or_insert_with(|| Box::new(Self::new()))
    }

    fn is_empty(&self) -> bool {
        self.payload.is_none() && self.children.iter().all(Option::is_none)
    }
}

/// Prefix trie with an optional payload per node.
///
/// The trie owns its nodes and payloads; dropping it frees everything.
pub struct PrefixTrie<T> {
    mode: MatchMode,
    root: TrieNode<T>,
    len: usize,
}

impl<T> PrefixTrie<T> {
    /// Create an empty trie for the given alphabet.
    #[must_use]
    pub const fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            root: TrieNode::new(),
            len: 0,
        }
    }

    /// Alphabet of this trie.
    #[must_use]
    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Number of nodes carrying a payload.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if no node carries a payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the payload stored at exactly `prefix`, creating the path and
    /// the payload (via `factory`) if absent.
    ///
    /// The empty prefix addresses the root.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidPrefix` if `prefix` contains a symbol outside
    /// the alphabet.
    pub fn insert<F>(&mut self, prefix: &str, factory: F) -> Result<&mut T, LoadError>
    where
        F: FnOnce() -> T,
    {
        let mode = self.mode;
        let slots = prefix
            .bytes()
            .map(|b| {
                mode.slot(b).ok_or_else(|| {
                    LoadError::invalid_prefix(
                        prefix,
                        format!("symbol {:?} outside {mode:?} alphabet", char::from(b)),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let width = mode.width();
        let mut node = &mut self.root;
        for slot in slots {
            node = node.child_or_insert(slot, width);
        }
        if node.payload.is_none() {
            self.len += 1;
        }
        Ok(node.payload.get_or_insert_with(factory))
    }

    /// Payload stored at exactly `prefix`.
    #[must_use]
    pub fn get(&self, prefix: &str) -> Option<&T> {
        let mut node = &self.root;
        for b in prefix.bytes() {
            node = node.child(self.mode.slot(b)?)?;
        }
        node.payload.as_ref()
    }

    /// Mutable payload stored at exactly `prefix`.
    pub fn get_mut(&mut self, prefix: &str) -> Option<&mut T> {
        let mode = self.mode;
        let mut node = &mut self.root;
        for b in prefix.bytes() {
            let slot = mode.slot(b)?;
            node = node.children.get_mut(slot)?.as_deref_mut()?;
        }
        node.payload.as_mut()
    }

    /// Remove and return the payload at exactly `prefix`, pruning nodes that
    /// become empty.
    pub fn remove(&mut self, prefix: &str) -> Option<T> {
        let slots: Option<Vec<usize>> = prefix.bytes().map(|b| self.mode.slot(b)).collect();
        let removed = Self::remove_at(&mut self.root, &slots?)?;
        self.len -= 1;
        Some(removed)
    }

    fn remove_at(node: &mut TrieNode<T>, slots: &[usize]) -> Option<T> {
        let Some((&first, rest)) = slots.split_first() else {
            return node.payload.take();
        };
        let child = node.children.get_mut(first)?.as_deref_mut()?;
        let removed = Self::remove_at(child, rest)?;
        if child.is_empty() {
            node.children[first] = None;
        }
        Some(removed)
    }

    /// Longest-prefix match.
    ///
    /// Descends greedily along `key` and returns the payload of the deepest
    /// node that has one; descent stops at the first symbol without a child.
    /// When `skip_non_digits` is set and the trie is in digit mode, leading
    /// non-digit characters (e.g. `+`) are skipped first.
    #[must_use]
    pub fn longest_match(&self, key: &str, skip_non_digits: bool) -> Option<&T> {
        self.longest_match_with_len(key, skip_non_digits)
            .map(|(payload, _)| payload)
    }

    /// Longest-prefix match that also reports the matched prefix length
    /// (in bytes of the key after skipping).
    #[must_use]
    pub fn longest_match_with_len(&self, key: &str, skip_non_digits: bool) -> Option<(&T, usize)> {
        let mut bytes = key.as_bytes();
        if skip_non_digits && self.mode == MatchMode::Digits {
            let skip = bytes.iter().take_while(|b| !b.is_ascii_digit()).count();
            bytes = &bytes[skip..];
        }

        let mut node = &self.root;
        let mut best = node.payload.as_ref().map(|p| (p, 0));
        for (depth, &b) in bytes.iter().enumerate() {
            let Some(child) = self.mode.slot(b).and_then(|slot| node.child(slot)) else {
                break;
            };
            node = child;
            if let Some(payload) = node.payload.as_ref() {
                best = Some((payload, depth + 1));
            }
        }
        best
    }

    /// Visit every payload in depth-first, symbol order with its full prefix.
    pub fn walk<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&str, &'a T),
    {
        let mut prefix = Vec::new();
        Self::walk_node(&self.root, self.mode, &mut prefix, &mut visit);
    }

    fn walk_node<'a, F>(node: &'a TrieNode<T>, mode: MatchMode, prefix: &mut Vec<u8>, visit: &mut F)
    where
        F: FnMut(&str, &'a T),
    {
        if let Some(payload) = node.payload.as_ref() {
            // alphabet is ASCII, prefix is always valid UTF-8
            visit(std::str::from_utf8(prefix).unwrap_or_default(), payload);
        }
        for (slot, child) in node.children.iter().enumerate() {
            if let Some(child) = child {
                prefix.push(mode.symbol(slot));
                Self::walk_node(child, mode, prefix, visit);
                prefix.pop();
            }
        }
    }

    /// Visit every payload mutably; stops at the first error.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `visit`.
    pub fn try_walk_mut<E, F>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&str, &mut T) -> Result<(), E>,
    {
        let mut prefix = Vec::new();
        Self::walk_node_mut(&mut self.root, self.mode, &mut prefix, &mut visit)
    }

    fn walk_node_mut<E, F>(
        node: &mut TrieNode<T>,
        mode: MatchMode,
        prefix: &mut Vec<u8>,
        visit: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(&str, &mut T) -> Result<(), E>,
    {
        if let Some(payload) = node.payload.as_mut() {
            visit(std::str::from_utf8(prefix).unwrap_or_default(), payload)?;
        }
        for (slot, child) in node.children.iter_mut().enumerate() {
            if let Some(child) = child {
                prefix.push(mode.symbol(slot));
                Self::walk_node_mut(child, mode, prefix, visit)?;
                prefix.pop();
            }
        }
        Ok(())
    }
}

impl<T: Clone> Clone for TrieNode<T> {
    fn clone(&self) -> Self {
        Self {
            children: self.children.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl<T: Clone> Clone for PrefixTrie<T> {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<T> std::fmt::Debug for PrefixTrie<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixTrie")
            .field("mode", &self.mode)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
