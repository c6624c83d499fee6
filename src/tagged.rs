/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Tagged references to stencil things.
//!
//! Encoded as a single `u32` with a 4-bit kind tag in the top 4 bits and a
//! 28-bit index in the lower 28 bits:
//!
//!   `raw = (kind << 28) | index`
//!
//! ```text
//!   0x0000_0000  Null
//!   0x1YYY_YYYY  parser atom
//!   0x2YYY_YYYY  well-known atom
//!   0x3YYY_YYYY  BigInt
//!   0x4YYY_YYYY  object literal
//!   0x5YYY_YYYY  RegExp
//!   0x6YYY_YYYY  scope
//!   0x7YYY_YYYY  function
//!   0x8000_0000  empty global scope
//! ```
//!
//! The atom kinds reuse `TaggedParserAtomIndex`'s encoding bit for bit. This
//! layout is part of the serialized format; changing it requires a
//! `STENCIL_FORMAT_VERSION` bump.

use serde::{Deserialize, Serialize};

use crate::atom::{INDEX_LIMIT, INDEX_MASK, TAG_MASK, TAG_SHIFT, TaggedParserAtomIndex};
use crate::index::{BigIntIndex, ObjLiteralIndex, RegExpIndex, ScopeIndex, ScriptIndex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ScriptThingKind {
    Null = 0,
    ParserAtomIndex = 1,
    WellKnown = 2,
    BigInt = 3,
    ObjLiteral = 4,
    RegExp = 5,
    Scope = 6,
    Function = 7,
    EmptyGlobalScope = 8,
}

impl ScriptThingKind {
    fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => Self::Null,
            1 => Self::ParserAtomIndex,
            2 => Self::WellKnown,
            3 => Self::BigInt,
            4 => Self::ObjLiteral,
            5 => Self::RegExp,
            6 => Self::Scope,
            7 => Self::Function,
            8 => Self::EmptyGlobalScope,
            _ => return None,
        })
    }

    const fn tag(self) -> u32 {
        (self as u32) << TAG_SHIFT
    }
}

/// A reference to anything a script's gc things span can hold.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaggedScriptThingIndex(u32);

impl Default for TaggedScriptThingIndex {
    fn default() -> Self {
        Self::null()
    }
}

impl From<TaggedParserAtomIndex> for TaggedScriptThingIndex {
    fn from(atom: TaggedParserAtomIndex) -> Self {
        Self(atom.raw())
    }
}

impl TaggedScriptThingIndex {
    pub const INDEX_LIMIT: u32 = INDEX_LIMIT;

    fn tagged(kind: ScriptThingKind, index: u32) -> Self {
        assert!(
            index < INDEX_LIMIT,
            "{kind:?} index {index} exceeds the index limit"
        );
        Self(kind.tag() | index)
    }

    pub const fn null() -> Self {
        Self(ScriptThingKind::Null.tag())
    }

    pub fn atom(atom: TaggedParserAtomIndex) -> Self {
        Self::from(atom)
    }

    pub fn bigint(index: BigIntIndex) -> Self {
        Self::tagged(ScriptThingKind::BigInt, index.0)
    }

    pub fn obj_literal(index: ObjLiteralIndex) -> Self {
        Self::tagged(ScriptThingKind::ObjLiteral, index.0)
    }

    pub fn regexp(index: RegExpIndex) -> Self {
        Self::tagged(ScriptThingKind::RegExp, index.0)
    }

    pub fn scope(index: ScopeIndex) -> Self {
        Self::tagged(ScriptThingKind::Scope, index.0)
    }

    pub fn function(index: ScriptIndex) -> Self {
        Self::tagged(ScriptThingKind::Function, index.0)
    }

    pub const fn empty_global_scope() -> Self {
        Self(ScriptThingKind::EmptyGlobalScope.tag())
    }

    /// Reinterpret a raw word, rejecting unknown tags and payloads on the
    /// payload-free kinds.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let kind = ScriptThingKind::from_tag((raw & TAG_MASK) >> TAG_SHIFT)?;
        match kind {
            ScriptThingKind::Null | ScriptThingKind::EmptyGlobalScope if raw & INDEX_MASK != 0 => {
                None
            }
            ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
                TaggedParserAtomIndex::from_raw(raw).map(Self::from)
            }
            _ => Some(Self(raw)),
        }
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn tag(self) -> ScriptThingKind {
        ScriptThingKind::from_tag((self.0 & TAG_MASK) >> TAG_SHIFT)
            .expect("tagged script thing index holds an unknown kind")
    }

    fn has_tag(self, kind: ScriptThingKind) -> bool {
        self.0 & TAG_MASK == kind.tag()
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn is_atom(self) -> bool {
        self.has_tag(ScriptThingKind::ParserAtomIndex) || self.has_tag(ScriptThingKind::WellKnown)
    }

    pub fn is_bigint(self) -> bool {
        self.has_tag(ScriptThingKind::BigInt)
    }

    pub fn is_obj_literal(self) -> bool {
        self.has_tag(ScriptThingKind::ObjLiteral)
    }

    pub fn is_regexp(self) -> bool {
        self.has_tag(ScriptThingKind::RegExp)
    }

    pub fn is_scope(self) -> bool {
        self.has_tag(ScriptThingKind::Scope)
    }

    pub fn is_function(self) -> bool {
        self.has_tag(ScriptThingKind::Function)
    }

    pub fn is_empty_global_scope(self) -> bool {
        self.has_tag(ScriptThingKind::EmptyGlobalScope)
    }

    pub fn to_atom(self) -> TaggedParserAtomIndex {
        debug_assert!(self.is_atom());
        TaggedParserAtomIndex::from_raw(self.0).expect("to_atom() called on a non-atom thing")
    }

    pub fn to_bigint(self) -> BigIntIndex {
        debug_assert!(self.is_bigint());
        BigIntIndex(self.0 & INDEX_MASK)
    }

    pub fn to_obj_literal(self) -> ObjLiteralIndex {
        debug_assert!(self.is_obj_literal());
        ObjLiteralIndex(self.0 & INDEX_MASK)
    }

    pub fn to_regexp(self) -> RegExpIndex {
        debug_assert!(self.is_regexp());
        RegExpIndex(self.0 & INDEX_MASK)
    }

    pub fn to_scope(self) -> ScopeIndex {
        debug_assert!(self.is_scope());
        ScopeIndex(self.0 & INDEX_MASK)
    }

    pub fn to_function(self) -> ScriptIndex {
        debug_assert!(self.is_function());
        ScriptIndex(self.0 & INDEX_MASK)
    }
}

impl std::fmt::Debug for TaggedScriptThingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.0 & INDEX_MASK;
        match self.tag() {
            ScriptThingKind::Null => write!(f, "Null"),
            ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
                write!(f, "{:?}", self.to_atom())
            }
            ScriptThingKind::BigInt => write!(f, "BigInt({index})"),
            ScriptThingKind::ObjLiteral => write!(f, "ObjLiteral({index})"),
            ScriptThingKind::RegExp => write!(f, "RegExp({index})"),
            ScriptThingKind::Scope => write!(f, "Scope({index})"),
            ScriptThingKind::Function => write!(f, "Function({index})"),
            ScriptThingKind::EmptyGlobalScope => write!(f, "EmptyGlobalScope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::WellKnownAtom;
    use crate::index::ParserAtomIndex;

    fn predicates(thing: TaggedScriptThingIndex) -> [bool; 8] {
        [
            thing.is_null(),
            thing.is_atom(),
            thing.is_bigint(),
            thing.is_obj_literal(),
            thing.is_regexp(),
            thing.is_scope(),
            thing.is_function(),
            thing.is_empty_global_scope(),
        ]
    }

    #[test]
    fn every_kind_round_trips_and_matches_exactly_one_predicate() {
        for payload in [0, 1, 7, 0x1234, INDEX_LIMIT - 1] {
            let things = [
                TaggedScriptThingIndex::atom(TaggedParserAtomIndex::parser_atom(ParserAtomIndex(
                    payload,
                ))),
                TaggedScriptThingIndex::bigint(BigIntIndex(payload)),
                TaggedScriptThingIndex::obj_literal(ObjLiteralIndex(payload)),
                TaggedScriptThingIndex::regexp(RegExpIndex(payload)),
                TaggedScriptThingIndex::scope(ScopeIndex(payload)),
                TaggedScriptThingIndex::function(ScriptIndex(payload)),
            ];
            assert_eq!(things[0].to_atom().to_parser_atom_index(), ParserAtomIndex(payload));
            assert_eq!(things[1].to_bigint(), BigIntIndex(payload));
            assert_eq!(things[2].to_obj_literal(), ObjLiteralIndex(payload));
            assert_eq!(things[3].to_regexp(), RegExpIndex(payload));
            assert_eq!(things[4].to_scope(), ScopeIndex(payload));
            assert_eq!(things[5].to_function(), ScriptIndex(payload));
            for thing in things {
                assert_eq!(predicates(thing).iter().filter(|&&p| p).count(), 1);
                assert_eq!(TaggedScriptThingIndex::from_raw(thing.raw()), Some(thing));
            }
        }

        for thing in [
            TaggedScriptThingIndex::null(),
            TaggedScriptThingIndex::empty_global_scope(),
            TaggedScriptThingIndex::atom(TaggedParserAtomIndex::well_known(WellKnownAtom::Star)),
        ] {
            assert_eq!(predicates(thing).iter().filter(|&&p| p).count(), 1);
        }
    }

    #[test]
    fn equality_is_by_raw_word() {
        assert_eq!(
            TaggedScriptThingIndex::scope(ScopeIndex(3)),
            TaggedScriptThingIndex::scope(ScopeIndex(3))
        );
        assert_ne!(
            TaggedScriptThingIndex::scope(ScopeIndex(3)),
            TaggedScriptThingIndex::function(ScriptIndex(3))
        );
    }

    #[test]
    #[should_panic(expected = "exceeds the index limit")]
    fn scope_payload_at_limit_is_rejected() {
        TaggedScriptThingIndex::scope(ScopeIndex(INDEX_LIMIT));
    }

    #[test]
    #[should_panic(expected = "exceeds the index limit")]
    fn function_payload_above_limit_is_rejected() {
        TaggedScriptThingIndex::function(ScriptIndex(u32::MAX));
    }

    #[test]
    fn raw_words_with_bad_tags_are_rejected() {
        assert!(TaggedScriptThingIndex::from_raw(0x9000_0000).is_none());
        assert!(TaggedScriptThingIndex::from_raw(0x8000_0001).is_none());
        assert!(TaggedScriptThingIndex::from_raw(0x0000_0002).is_none());
        assert_eq!(
            TaggedScriptThingIndex::from_raw(0x8000_0000),
            Some(TaggedScriptThingIndex::empty_global_scope())
        );
    }
}
