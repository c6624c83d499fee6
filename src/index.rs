/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Typed indices into the arenas of a compilation.
//!
//! Each index is a plain `u32` newtype so that a scope index can never be
//! used where a script index is expected. None of them carries a tag; the
//! tagged forms live in `atom.rs` and `tagged.rs`.

use serde::{Deserialize, Serialize};

macro_rules! typed_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<$name> for u32 {
            fn from(index: $name) -> u32 {
                index.0
            }
        }
    };
}

typed_index!(
    /// Index into `ParserAtomsTable`.
    ParserAtomIndex
);
typed_index!(
    /// Index into the scope stencil arena.
    ScopeIndex
);
typed_index!(
    /// Index into the script stencil arena. Index 0 is the top-level script.
    ScriptIndex
);
typed_index!(
    /// Index into the regexp stencil arena.
    RegExpIndex
);
typed_index!(
    /// Index into the BigInt stencil arena.
    BigIntIndex
);
typed_index!(
    /// Index into the object literal stencil arena.
    ObjLiteralIndex
);
typed_index!(
    /// Index into the shared "gc things" table, or into one script's span of it.
    GcThingIndex
);

impl ScriptIndex {
    pub const TOP_LEVEL: ScriptIndex = ScriptIndex(0);
}
