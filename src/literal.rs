/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Literal stencils: RegExp, BigInt and object literals.
//!
//! Each keeps just enough source data to build the runtime value later,
//! so parsing never allocates on the managed heap.

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::atom::{CompilationAtomCache, TaggedParserAtomIndex};
use crate::compilation::CompilationStencil;
use crate::error::{Result, StencilError};
use crate::heap::{Heap, LiteralValue, ObjectLiteral, PropertyKey};
use crate::utf16::Utf16String;

flag_set! {
    /// Flags of a regular expression literal.
    pub struct RegExpFlags(u8) {
        const IGNORE_CASE = 1 << 0;
        const GLOBAL = 1 << 1;
        const MULTILINE = 1 << 2;
        const STICKY = 1 << 3;
        const UNICODE = 1 << 4;
        const DOT_ALL = 1 << 5;
        const HAS_INDICES = 1 << 6;
    }
}

impl RegExpFlags {
    /// Flag characters in the order `RegExp.prototype.flags` prints them.
    const CHARS: [(char, RegExpFlags); 7] = [
        ('d', Self::HAS_INDICES),
        ('g', Self::GLOBAL),
        ('i', Self::IGNORE_CASE),
        ('m', Self::MULTILINE),
        ('s', Self::DOT_ALL),
        ('u', Self::UNICODE),
        ('y', Self::STICKY),
    ];

    /// Parse the flags part of a literal such as `/x/gi`. Unknown and
    /// repeated flags are rejected.
    pub fn parse(chars: &[u16]) -> Result<Self> {
        let mut flags = Self::EMPTY;
        for &unit in chars {
            let flag = char::from_u32(unit as u32).and_then(|c| {
                Self::CHARS
                    .iter()
                    .find(|(flag_char, _)| *flag_char == c)
                    .map(|&(_, flag)| flag)
            });
            match flag {
                Some(flag) if !flags.contains(flag) => flags.insert(flag),
                _ => {
                    return Err(StencilError::InvalidRegExpFlags(
                        String::from_utf16_lossy(chars),
                    ));
                }
            }
        }
        Ok(flags)
    }

    pub fn to_flag_string(self) -> String {
        Self::CHARS
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(c, _)| *c)
            .collect()
    }
}

/// A syntax-checked regular expression literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpStencil {
    atom: TaggedParserAtomIndex,
    // Widened to u32 so the stencil has no padding.
    flags: u32,
}

impl RegExpStencil {
    pub fn new(atom: TaggedParserAtomIndex, flags: RegExpFlags) -> Self {
        Self {
            atom,
            flags: flags.raw() as u32,
        }
    }

    pub fn atom(&self) -> TaggedParserAtomIndex {
        self.atom
    }

    pub fn flags(&self) -> RegExpFlags {
        RegExpFlags::from_raw(self.flags as u8)
    }

    /// Create the RegExp object. The pattern atom must already be in
    /// `atom_cache`, which is the case during a full instantiation.
    pub fn create_regexp<H: Heap>(
        &self,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
    ) -> Result<H::Ptr> {
        let source = atom_cache.get_existing(self.atom)?;
        Ok(heap.new_regexp(source, self.flags())?)
    }

    /// Create the RegExp object outside of a full instantiation, interning
    /// the pattern atom from `stencil` into `atom_cache` first.
    pub fn create_regexp_and_ensure_atom<H: Heap>(
        &self,
        atom_cache: &mut CompilationAtomCache<H::Ptr>,
        heap: &mut H,
        stencil: &CompilationStencil,
    ) -> Result<H::Ptr> {
        atom_cache.ensure(self.atom, stencil.parser_atoms(), heap)?;
        self.create_regexp(atom_cache, heap)
    }
}

/// Owns the digits of a BigInt literal, without numeric separators.
///
/// Construction guarantees the digits parse, so `create_bigint` can only
/// fail on allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigIntStencil {
    digits: Utf16String,
}

impl BigIntStencil {
    pub fn new(chars: &[u16]) -> Result<Self> {
        let (radix, digits) = split_radix(chars);
        let well_formed = !digits.is_empty()
            && digits.iter().all(|&unit| {
                char::from_u32(unit as u32).is_some_and(|c| c.is_digit(radix))
            });
        if !well_formed {
            return Err(StencilError::InvalidBigIntLiteral(
                String::from_utf16_lossy(chars),
            ));
        }
        Ok(Self {
            digits: Utf16String::from(chars),
        })
    }

    pub fn digits(&self) -> &[u16] {
        &self.digits
    }

    /// Decided from the digits alone; nothing is allocated.
    pub fn is_zero(&self) -> bool {
        let (_, digits) = split_radix(&self.digits);
        digits.iter().all(|&unit| unit == b'0' as u16)
    }

    pub fn value(&self) -> Result<BigInt> {
        let text = self.digits.to_string_lossy();
        parse_bigint(&text).ok_or(StencilError::InvalidBigIntLiteral(text))
    }

    pub fn create_bigint<H: Heap>(&self, heap: &mut H) -> Result<H::Ptr> {
        let value = self.value()?;
        debug_assert_eq!(value.is_zero(), self.is_zero());
        Ok(heap.new_bigint(value)?)
    }
}

/// Split a `0x`/`0o`/`0b` prefix off a literal, returning its radix.
fn split_radix(chars: &[u16]) -> (u32, &[u16]) {
    if chars.len() > 2 && chars[0] == b'0' as u16 {
        let radix = match char::from_u32(chars[1] as u32) {
            Some('x' | 'X') => Some(16),
            Some('o' | 'O') => Some(8),
            Some('b' | 'B') => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            return (radix, &chars[2..]);
        }
    }
    (10, chars)
}

/// Parse a BigInt string to an arbitrary-precision BigInt.
/// Handles decimal, 0b binary, 0o octal, and 0x hex prefixes.
fn parse_bigint(s: &str) -> Option<BigInt> {
    if s.len() > 2 {
        let (prefix, rest) = s.split_at(2);
        match prefix {
            "0b" | "0B" => return BigInt::parse_bytes(rest.as_bytes(), 2),
            "0o" | "0O" => return BigInt::parse_bytes(rest.as_bytes(), 8),
            "0x" | "0X" => return BigInt::parse_bytes(rest.as_bytes(), 16),
            _ => {}
        }
    }
    s.parse::<BigInt>().ok()
}

flag_set! {
    pub struct ObjLiteralFlags(u8) {
        const ARRAY = 1 << 0;
        /// The object is created once per script run.
        const SINGLETON = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObjLiteralKey {
    Atom(TaggedParserAtomIndex),
    ArrayIndex(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ObjLiteralValue {
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Double(f64),
    Atom(TaggedParserAtomIndex),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjLiteralProperty {
    pub key: ObjLiteralKey,
    pub value: ObjLiteralValue,
}

/// An object or array literal whose properties are all constants.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjLiteralStencil {
    flags: ObjLiteralFlags,
    properties: Vec<ObjLiteralProperty>,
}

impl ObjLiteralStencil {
    pub fn new(flags: ObjLiteralFlags) -> Self {
        Self {
            flags,
            properties: Vec::new(),
        }
    }

    pub fn push(&mut self, key: ObjLiteralKey, value: ObjLiteralValue) {
        self.properties.push(ObjLiteralProperty { key, value });
    }

    pub fn flags(&self) -> ObjLiteralFlags {
        self.flags
    }

    pub fn properties(&self) -> &[ObjLiteralProperty] {
        &self.properties
    }

    /// Every atom this literal refers to, keys first.
    pub fn atoms(&self) -> impl Iterator<Item = TaggedParserAtomIndex> + '_ {
        self.properties.iter().flat_map(|property| {
            let key = match property.key {
                ObjLiteralKey::Atom(atom) => Some(atom),
                ObjLiteralKey::ArrayIndex(_) => None,
            };
            let value = match property.value {
                ObjLiteralValue::Atom(atom) => Some(atom),
                _ => None,
            };
            key.into_iter().chain(value)
        })
    }

    pub fn create_object<H: Heap>(
        &self,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
    ) -> Result<H::Ptr> {
        let mut properties = Vec::with_capacity(self.properties.len());
        for property in &self.properties {
            let key = match property.key {
                ObjLiteralKey::Atom(atom) => PropertyKey::Atom(atom_cache.get_existing(atom)?),
                ObjLiteralKey::ArrayIndex(index) => PropertyKey::Index(index),
            };
            let value = match property.value {
                ObjLiteralValue::Undefined => LiteralValue::Undefined,
                ObjLiteralValue::Null => LiteralValue::Null,
                ObjLiteralValue::Bool(b) => LiteralValue::Bool(b),
                ObjLiteralValue::Int32(i) => LiteralValue::Int32(i),
                ObjLiteralValue::Double(d) => LiteralValue::Double(d),
                ObjLiteralValue::Atom(atom) => LiteralValue::String(atom_cache.get_existing(atom)?),
            };
            properties.push((key, value));
        }
        Ok(heap.new_object_literal(ObjectLiteral {
            is_array: self.flags.contains(ObjLiteralFlags::ARRAY),
            is_singleton: self.flags.contains(ObjLiteralFlags::SINGLETON),
            properties,
        })?)
    }
}
