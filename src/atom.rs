/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Parser atoms.
//!
//! During Building, every name or string the stencil needs is interned into
//! a `ParserAtomsTable` and referenced by `TaggedParserAtomIndex`. At
//! instantiation time a `CompilationAtomCache` maps those indices to the
//! target context's own string cells.
//!
//! A tagged atom index shares its bit layout with `TaggedScriptThingIndex`:
//!
//! ```text
//!   0x0000_0000  Null
//!   0x1YYY_YYYY  28-bit parser atom index
//!   0x2YYY_YYYY  well-known atom id
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, StencilError};
use crate::heap::Heap;
use crate::index::ParserAtomIndex;
use crate::u32_from_usize;
use crate::utf16::Utf16String;

pub const TAG_SHIFT: u32 = 28;
pub const TAG_MASK: u32 = 0xF000_0000;
pub const INDEX_MASK: u32 = 0x0FFF_FFFF;
pub const INDEX_LIMIT: u32 = 1 << TAG_SHIFT;

/// Tag values shared with `ScriptThingKind`.
pub(crate) const NULL_TAG: u32 = 0;
pub(crate) const PARSER_ATOM_TAG: u32 = 1 << TAG_SHIFT;
pub(crate) const WELL_KNOWN_TAG: u32 = 2 << TAG_SHIFT;

/// Names every context has interned up front.
///
/// Interning one of these never touches the parser atoms table; the tagged
/// index carries the id directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum WellKnownAtom {
    Empty = 0,
    Default = 1,
    StarDefault = 2,
    Star = 3,
    Arguments = 4,
    Length = 5,
    Name = 6,
    Prototype = 7,
    Constructor = 8,
    DotThis = 9,
    DotGenerator = 10,
    Async = 11,
    Get = 12,
    Set = 13,
    Static = 14,
    Meta = 15,
}

impl WellKnownAtom {
    pub const COUNT: usize = 16;

    const ALL: [WellKnownAtom; Self::COUNT] = [
        Self::Empty,
        Self::Default,
        Self::StarDefault,
        Self::Star,
        Self::Arguments,
        Self::Length,
        Self::Name,
        Self::Prototype,
        Self::Constructor,
        Self::DotThis,
        Self::DotGenerator,
        Self::Async,
        Self::Get,
        Self::Set,
        Self::Static,
        Self::Meta,
    ];

    pub fn chars(self) -> &'static [u16] {
        match self {
            Self::Empty => utf16!(""),
            Self::Default => utf16!("default"),
            Self::StarDefault => utf16!("*default*"),
            Self::Star => utf16!("*"),
            Self::Arguments => utf16!("arguments"),
            Self::Length => utf16!("length"),
            Self::Name => utf16!("name"),
            Self::Prototype => utf16!("prototype"),
            Self::Constructor => utf16!("constructor"),
            Self::DotThis => utf16!(".this"),
            Self::DotGenerator => utf16!(".generator"),
            Self::Async => utf16!("async"),
            Self::Get => utf16!("get"),
            Self::Set => utf16!("set"),
            Self::Static => utf16!("static"),
            Self::Meta => utf16!("meta"),
        }
    }

    pub fn lookup(chars: &[u16]) -> Option<Self> {
        Self::ALL.into_iter().find(|atom| atom.chars() == chars)
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomKind {
    Null,
    ParserAtom,
    WellKnown,
}

/// Reference to an interned string: null, a parser atom, or a well-known atom.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaggedParserAtomIndex(u32);

impl Default for TaggedParserAtomIndex {
    fn default() -> Self {
        Self::null()
    }
}

impl TaggedParserAtomIndex {
    pub const fn null() -> Self {
        Self(NULL_TAG)
    }

    pub fn parser_atom(index: ParserAtomIndex) -> Self {
        assert!(
            index.0 < INDEX_LIMIT,
            "parser atom index {} exceeds the index limit",
            index.0
        );
        Self(PARSER_ATOM_TAG | index.0)
    }

    pub fn well_known(atom: WellKnownAtom) -> Self {
        Self(WELL_KNOWN_TAG | atom as u32)
    }

    /// Reinterpret a raw word, rejecting tags and ids that no atom uses.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let index = raw & INDEX_MASK;
        match raw & TAG_MASK {
            NULL_TAG if raw == 0 => Some(Self(raw)),
            PARSER_ATOM_TAG => Some(Self(raw)),
            WELL_KNOWN_TAG if WellKnownAtom::from_id(index).is_some() => Some(Self(raw)),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> AtomKind {
        match self.0 & TAG_MASK {
            PARSER_ATOM_TAG => AtomKind::ParserAtom,
            WELL_KNOWN_TAG => AtomKind::WellKnown,
            _ => AtomKind::Null,
        }
    }

    pub fn is_null(self) -> bool {
        self.0 == NULL_TAG
    }

    pub fn is_parser_atom_index(self) -> bool {
        self.0 & TAG_MASK == PARSER_ATOM_TAG
    }

    pub fn is_well_known_atom_id(self) -> bool {
        self.0 & TAG_MASK == WELL_KNOWN_TAG
    }

    pub fn to_parser_atom_index(self) -> ParserAtomIndex {
        debug_assert!(self.is_parser_atom_index());
        ParserAtomIndex(self.0 & INDEX_MASK)
    }

    pub fn to_well_known_atom_id(self) -> WellKnownAtom {
        debug_assert!(self.is_well_known_atom_id());
        WellKnownAtom::from_id(self.0 & INDEX_MASK).expect("well-known atom id out of range")
    }
}

impl std::fmt::Debug for TaggedParserAtomIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            AtomKind::Null => write!(f, "NullAtom"),
            AtomKind::ParserAtom => write!(f, "Atom({})", self.0 & INDEX_MASK),
            AtomKind::WellKnown => write!(f, "WellKnown({:?})", self.to_well_known_atom_id()),
        }
    }
}

/// Interning table for the text of every atom a compilation references.
///
/// Entries are appended and never removed, so a `ParserAtomIndex` stays
/// valid for the lifetime of the table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ParserAtomsTable {
    entries: Vec<Utf16String>,
    #[serde(skip)]
    lookup: HashMap<Utf16String, ParserAtomIndex>,
}

impl ParserAtomsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, chars: &[u16]) -> Result<TaggedParserAtomIndex> {
        if let Some(atom) = WellKnownAtom::lookup(chars) {
            return Ok(TaggedParserAtomIndex::well_known(atom));
        }
        if let Some(&index) = self.lookup.get(chars) {
            return Ok(TaggedParserAtomIndex::parser_atom(index));
        }
        if u32_from_usize(self.entries.len()) >= INDEX_LIMIT {
            return Err(StencilError::IndexLimitExceeded {
                what: "parser atoms",
                limit: INDEX_LIMIT,
            });
        }
        let index = ParserAtomIndex(u32_from_usize(self.entries.len()));
        let text = Utf16String::from(chars);
        self.lookup.insert(text.clone(), index);
        self.entries.push(text);
        Ok(TaggedParserAtomIndex::parser_atom(index))
    }

    pub fn intern_str(&mut self, s: &str) -> Result<TaggedParserAtomIndex> {
        let chars: Vec<u16> = s.encode_utf16().collect();
        self.intern(&chars)
    }

    pub fn get(&self, index: ParserAtomIndex) -> Option<&[u16]> {
        self.entries.get(index.index()).map(|s| s.as_slice())
    }

    /// Text of any non-null atom.
    pub fn chars(&self, atom: TaggedParserAtomIndex) -> Option<&[u16]> {
        match atom.kind() {
            AtomKind::Null => None,
            AtomKind::ParserAtom => self.get(atom.to_parser_atom_index()),
            AtomKind::WellKnown => Some(atom.to_well_known_atom_id().chars()),
        }
    }

    /// True if `atom` is null, well-known, or a parser atom this table holds.
    pub fn contains(&self, atom: TaggedParserAtomIndex) -> bool {
        !atom.is_parser_atom_index() || atom.to_parser_atom_index().index() < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the dedup map after deserialization.
    pub(crate) fn rebuild_lookup(&mut self) {
        self.lookup = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, text)| (text.clone(), ParserAtomIndex(u32_from_usize(i))))
            .collect();
    }
}

/// Maps parser atoms to the string cells of one instantiation target.
///
/// A cache belongs to exactly one target context. Instantiating the same
/// stencil into another context requires a fresh cache. The first heap with
/// an id that fills the cache owns it.
#[derive(Debug)]
pub struct CompilationAtomCache<P> {
    atoms: Vec<Option<P>>,
    well_known: [Option<P>; WellKnownAtom::COUNT],
    heap_id: Option<u32>,
}

impl<P: Copy> Default for CompilationAtomCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Copy> CompilationAtomCache<P> {
    pub fn new() -> Self {
        Self {
            atoms: Vec::new(),
            well_known: [None; WellKnownAtom::COUNT],
            heap_id: None,
        }
    }

    /// Tie this cache to `heap`, or fail if it already holds cells of
    /// another heap.
    pub fn bind<H: Heap<Ptr = P>>(&mut self, heap: &H) -> Result<()> {
        match (self.heap_id, heap.id()) {
            (Some(cache), Some(id)) if cache != id => {
                Err(StencilError::ForeignAtomCache { cache, heap: id })
            }
            (None, Some(id)) => {
                self.heap_id = Some(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Cached cell for `atom`. Null atoms and atoms never instantiated
    /// into this cache yield `None`.
    pub fn get(&self, atom: TaggedParserAtomIndex) -> Option<P> {
        match atom.kind() {
            AtomKind::Null => None,
            AtomKind::ParserAtom => self
                .atoms
                .get(atom.to_parser_atom_index().index())
                .copied()
                .flatten(),
            AtomKind::WellKnown => self.well_known[atom.to_well_known_atom_id() as usize],
        }
    }

    /// Like `get`, but a missing non-null atom is an error.
    pub fn get_existing(&self, atom: TaggedParserAtomIndex) -> Result<P> {
        self.get(atom)
            .ok_or(StencilError::AtomNotInstantiated(atom.raw()))
    }

    /// Resolve an optional name: null stays `None`, anything else must exist.
    pub fn get_optional(&self, atom: TaggedParserAtomIndex) -> Result<Option<P>> {
        if atom.is_null() {
            return Ok(None);
        }
        self.get_existing(atom).map(Some)
    }

    /// Instantiate `atom` into `heap` if this cache doesn't have it yet.
    pub fn ensure<H: Heap<Ptr = P>>(
        &mut self,
        atom: TaggedParserAtomIndex,
        table: &ParserAtomsTable,
        heap: &mut H,
    ) -> Result<P> {
        self.bind(heap)?;
        if let Some(cell) = self.get(atom) {
            return Ok(cell);
        }
        match atom.kind() {
            AtomKind::Null => Err(StencilError::AtomNotInstantiated(atom.raw())),
            AtomKind::ParserAtom => {
                let index = atom.to_parser_atom_index();
                let chars = table.get(index).ok_or(StencilError::DanglingIndex {
                    kind: "parser atom",
                    index: index.0,
                })?;
                let cell = heap.atomize(chars)?;
                if self.atoms.len() <= index.index() {
                    self.atoms.resize(index.index() + 1, None);
                }
                self.atoms[index.index()] = Some(cell);
                Ok(cell)
            }
            AtomKind::WellKnown => {
                let id = atom.to_well_known_atom_id();
                let cell = heap.well_known_atom(id)?;
                self.well_known[id as usize] = Some(cell);
                Ok(cell)
            }
        }
    }

    /// Instantiate every atom of `table`. Well-known atoms are resolved on
    /// first use.
    pub fn instantiate_all<H: Heap<Ptr = P>>(
        &mut self,
        table: &ParserAtomsTable,
        heap: &mut H,
    ) -> Result<()> {
        self.bind(heap)?;
        self.atoms.resize(table.len().max(self.atoms.len()), None);
        for (i, chars) in table.entries.iter().enumerate() {
            if self.atoms[i].is_none() {
                self.atoms[i] = Some(heap.atomize(chars)?);
            }
        }
        trace!(count = table.len(), "parser atoms instantiated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut table = ParserAtomsTable::new();
        let a = table.intern_str("foo").unwrap();
        let b = table.intern_str("bar").unwrap();
        let c = table.intern_str("foo").unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.chars(b), Some(utf16!("bar")));
    }

    #[test]
    fn well_known_names_bypass_the_table() {
        let mut table = ParserAtomsTable::new();
        let atom = table.intern_str("default").unwrap();
        assert!(atom.is_well_known_atom_id());
        assert_eq!(atom.to_well_known_atom_id(), WellKnownAtom::Default);
        assert!(table.is_empty());
        assert_eq!(table.chars(atom), Some(utf16!("default")));
    }

    #[test]
    fn raw_words_are_validated() {
        assert_eq!(TaggedParserAtomIndex::from_raw(0), Some(TaggedParserAtomIndex::null()));
        assert!(TaggedParserAtomIndex::from_raw(0x1000_0005).is_some());
        assert!(TaggedParserAtomIndex::from_raw(0x2000_0000 + WellKnownAtom::COUNT as u32).is_none());
        assert!(TaggedParserAtomIndex::from_raw(0x3000_0000).is_none());
        assert!(TaggedParserAtomIndex::from_raw(0x0000_0001).is_none());
    }

    #[test]
    #[should_panic]
    fn parser_atom_index_above_limit_is_rejected() {
        TaggedParserAtomIndex::parser_atom(ParserAtomIndex(INDEX_LIMIT));
    }

    #[test]
    fn cache_refuses_a_second_heap() {
        use crate::heap::ObjectHeap;

        let mut table = ParserAtomsTable::new();
        let x = table.intern_str("x").unwrap();
        let mut cache = CompilationAtomCache::new();
        let mut first = ObjectHeap::default();
        let mut second = ObjectHeap::default();

        cache.instantiate_all(&table, &mut first).unwrap();
        assert!(matches!(
            cache.instantiate_all(&table, &mut second),
            Err(StencilError::ForeignAtomCache { .. })
        ));
        assert!(matches!(
            cache.ensure(x, &table, &mut second),
            Err(StencilError::ForeignAtomCache { .. })
        ));
        assert!(second.is_empty());
        assert_eq!(cache.ensure(x, &table, &mut first).unwrap(), cache.get(x).unwrap());
    }
}
