/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Script stencils: one per top-level script, eval, module or function.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::atom::TaggedParserAtomIndex;
use crate::index::{GcThingIndex, ScopeIndex};

flag_set! {
    /// Flags fixed at parse time and copied verbatim onto the runtime script.
    pub struct ImmutableScriptFlags(u32) {
        const IS_FOR_EVAL = 1 << 0;
        const IS_MODULE = 1 << 1;
        const IS_FUNCTION = 1 << 2;
        const SELF_HOSTED = 1 << 3;
        const FORCE_STRICT = 1 << 4;
        const HAS_NON_SYNTACTIC_SCOPE = 1 << 5;
        const NO_SCRIPT_RVAL = 1 << 6;
        const TREAT_AS_RUN_ONCE = 1 << 7;
        const STRICT = 1 << 8;
        const HAS_MODULE_GOAL = 1 << 9;
        const HAS_INNER_FUNCTIONS = 1 << 10;
        const HAS_DIRECT_EVAL = 1 << 11;
        const BINDINGS_ACCESSED_DYNAMICALLY = 1 << 12;
        const HAS_CALL_SITE_OBJ = 1 << 13;
        const IS_ASYNC = 1 << 14;
        const IS_GENERATOR = 1 << 15;
        const FUN_HAS_EXTENSIBLE_SCOPE = 1 << 16;
        const FUNCTION_HAS_THIS_BINDING = 1 << 17;
        const NEEDS_HOME_OBJECT = 1 << 18;
        const IS_DERIVED_CLASS_CONSTRUCTOR = 1 << 19;
        const IS_FIELD_INITIALIZER = 1 << 20;
        const HAS_REST = 1 << 21;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum FunctionKind {
    NormalFunction = 0,
    Arrow = 1,
    Method = 2,
    ClassConstructor = 3,
    Getter = 4,
    Setter = 5,
    AsmJS = 6,
}

impl FunctionKind {
    fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::NormalFunction,
            1 => Self::Arrow,
            2 => Self::Method,
            3 => Self::ClassConstructor,
            4 => Self::Getter,
            5 => Self::Setter,
            6 => Self::AsmJS,
            _ => return None,
        })
    }
}

flag_set! {
    /// Function kind (low three bits) plus the flags of the runtime function.
    pub struct FunctionFlags(u16) {
        const EXTENDED = 1 << 3;
        const SELF_HOSTED = 1 << 4;
        const BASESCRIPT = 1 << 5;
        const SELFHOSTLAZY = 1 << 6;
        const CONSTRUCTOR = 1 << 7;
        const BOUND_FUN = 1 << 8;
        const LAMBDA = 1 << 9;
        const HAS_INFERRED_NAME = 1 << 11;
        const HAS_GUESSED_ATOM = 1 << 12;
    }
}

impl FunctionFlags {
    const KIND_MASK: u16 = 0x0007;

    const fn with_kind(kind: FunctionKind, flags: u16) -> Self {
        Self::from_raw(kind as u16 | flags)
    }

    pub const ASMJS_CTOR: Self =
        Self::with_kind(FunctionKind::AsmJS, Self::CONSTRUCTOR.raw());
    pub const ASMJS_LAMBDA_CTOR: Self = Self::with_kind(
        FunctionKind::AsmJS,
        Self::CONSTRUCTOR.raw() | Self::LAMBDA.raw(),
    );
    pub const INTERPRETED_NORMAL: Self = Self::with_kind(
        FunctionKind::NormalFunction,
        Self::BASESCRIPT.raw() | Self::CONSTRUCTOR.raw(),
    );
    pub const INTERPRETED_GENERATOR_OR_ASYNC: Self =
        Self::with_kind(FunctionKind::NormalFunction, Self::BASESCRIPT.raw());
    pub const INTERPRETED_LAMBDA: Self = Self::with_kind(
        FunctionKind::NormalFunction,
        Self::BASESCRIPT.raw() | Self::LAMBDA.raw() | Self::CONSTRUCTOR.raw(),
    );
    pub const INTERPRETED_LAMBDA_GENERATOR_OR_ASYNC: Self = Self::with_kind(
        FunctionKind::NormalFunction,
        Self::BASESCRIPT.raw() | Self::LAMBDA.raw(),
    );
    pub const INTERPRETED_LAMBDA_ARROW: Self = Self::with_kind(
        FunctionKind::Arrow,
        Self::BASESCRIPT.raw() | Self::LAMBDA.raw(),
    );
    pub const INTERPRETED_METHOD: Self =
        Self::with_kind(FunctionKind::Method, Self::BASESCRIPT.raw());
    pub const INTERPRETED_CLASS_CONSTRUCTOR: Self = Self::with_kind(
        FunctionKind::ClassConstructor,
        Self::BASESCRIPT.raw() | Self::CONSTRUCTOR.raw(),
    );
    pub const INTERPRETED_GETTER: Self =
        Self::with_kind(FunctionKind::Getter, Self::BASESCRIPT.raw());
    pub const INTERPRETED_SETTER: Self =
        Self::with_kind(FunctionKind::Setter, Self::BASESCRIPT.raw());

    pub fn kind(self) -> Option<FunctionKind> {
        FunctionKind::from_raw(self.raw() & Self::KIND_MASK)
    }

    pub fn is_asmjs_native(self) -> bool {
        self.kind() == Some(FunctionKind::AsmJS)
    }

    pub fn has_base_script(self) -> bool {
        self.contains(Self::BASESCRIPT)
    }

    pub fn is_interpreted(self) -> bool {
        self.intersects(Self::BASESCRIPT | Self::SELFHOSTLAZY)
    }

    pub fn is_arrow(self) -> bool {
        self.kind() == Some(FunctionKind::Arrow)
    }

    pub fn is_constructor(self) -> bool {
        self.contains(Self::CONSTRUCTOR)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionSyntaxKind {
    Expression,
    Statement,
    Arrow,
    Method,
    FieldInitializer,
    ClassConstructor,
    DerivedClassConstructor,
    Getter,
    Setter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorKind {
    NotGenerator,
    Generator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionAsyncKind {
    SyncFunction,
    AsyncFunction,
}

/// Flags of a freshly parsed function, before the runtime adds its own.
pub fn initial_function_flags(
    syntax_kind: FunctionSyntaxKind,
    generator_kind: GeneratorKind,
    async_kind: FunctionAsyncKind,
    is_self_hosting: bool,
    has_uncloned_name: bool,
) -> FunctionFlags {
    let is_plain = generator_kind == GeneratorKind::NotGenerator
        && async_kind == FunctionAsyncKind::SyncFunction;
    let (mut flags, mut extended) = match syntax_kind {
        FunctionSyntaxKind::Expression if is_plain => (FunctionFlags::INTERPRETED_LAMBDA, false),
        FunctionSyntaxKind::Expression => (FunctionFlags::INTERPRETED_LAMBDA_GENERATOR_OR_ASYNC, false),
        FunctionSyntaxKind::Arrow => (FunctionFlags::INTERPRETED_LAMBDA_ARROW, true),
        FunctionSyntaxKind::Method | FunctionSyntaxKind::FieldInitializer => {
            (FunctionFlags::INTERPRETED_METHOD, true)
        }
        FunctionSyntaxKind::ClassConstructor | FunctionSyntaxKind::DerivedClassConstructor => {
            (FunctionFlags::INTERPRETED_CLASS_CONSTRUCTOR, true)
        }
        FunctionSyntaxKind::Getter => (FunctionFlags::INTERPRETED_GETTER, true),
        FunctionSyntaxKind::Setter => (FunctionFlags::INTERPRETED_SETTER, true),
        FunctionSyntaxKind::Statement if is_plain => (FunctionFlags::INTERPRETED_NORMAL, false),
        FunctionSyntaxKind::Statement => (FunctionFlags::INTERPRETED_GENERATOR_OR_ASYNC, false),
    };
    if is_self_hosting {
        flags.insert(FunctionFlags::SELF_HOSTED);
        // Self-hosted functions keep their uncloned name in an extended slot.
        extended |= has_uncloned_name;
    }
    if extended {
        flags.insert(FunctionFlags::EXTENDED);
    }
    flags
}

/// Number of class field initializers a constructor runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInitializers {
    pub num_member_initializers: u32,
}

/// Position of a script in its source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExtent {
    pub source_start: u32,
    pub source_end: u32,
    pub to_string_start: u32,
    pub to_string_end: u32,
    pub lineno: u32,
    pub column: u32,
}

/// Bytecode produced for a non-lazy script.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedScriptData {
    pub bytecode: Vec<u8>,
    /// Number of fixed frame slots the bytecode uses.
    pub nfixed: u32,
}

flag_set! {
    pub struct ScriptStencilFlags(u32) {
        /// Set by the enclosing script's emitter once a closure of this
        /// function is produced.
        const WAS_FUNCTION_EMITTED = 1 << 0;
        /// For the root of a delazification: whether the resulting script
        /// may be discarded and recompiled later.
        const ALLOW_RELAZIFY = 1 << 1;
        const HAS_SHARED_DATA = 1 << 2;
        /// The gc things span has been written, possibly empty.
        const GC_THINGS_ASSIGNED = 1 << 3;
    }
}

/// Metadata of one script or function, bridging parse results to the
/// runtime script and function fields.
///
/// Gc things are not owned: the stencil records a span of the
/// compilation's shared gc things table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStencil {
    pub immutable_flags: ImmutableScriptFlags,
    member_initializers: Option<MemberInitializers>,

    gc_things_offset: GcThingIndex,
    gc_things_length: u32,

    /// The explicit or inferred name of the function.
    pub function_atom: TaggedParserAtomIndex,
    pub function_flags: FunctionFlags,
    pub nargs: u16,

    /// For a lazy inner function: its immediately enclosing scope. Stored on
    /// the runtime function only after the whole unit instantiated.
    lazy_function_enclosing_scope_index: Option<ScopeIndex>,

    flags: ScriptStencilFlags,
    pub extent: SourceExtent,
}

impl ScriptStencil {
    /// A top-level script, eval or module.
    pub fn top_level(immutable_flags: ImmutableScriptFlags, extent: SourceExtent) -> Self {
        Self {
            immutable_flags,
            extent,
            ..Self::default()
        }
    }

    pub fn function(
        function_atom: TaggedParserAtomIndex,
        function_flags: FunctionFlags,
        nargs: u16,
        immutable_flags: ImmutableScriptFlags,
        extent: SourceExtent,
    ) -> Self {
        Self {
            immutable_flags: immutable_flags | ImmutableScriptFlags::IS_FUNCTION,
            function_atom,
            function_flags,
            nargs,
            extent,
            ..Self::default()
        }
    }

    pub fn is_function(&self) -> bool {
        let result = !self.function_flags.is_empty();
        debug_assert!(
            !result
                || self.function_flags.is_asmjs_native()
                || self.function_flags.has_base_script()
        );
        result
    }

    pub fn is_module(&self) -> bool {
        let result = self.immutable_flags.contains(ImmutableScriptFlags::IS_MODULE);
        debug_assert!(!result || !self.is_function());
        result
    }

    pub fn has_gc_things(&self) -> bool {
        self.gc_things_length != 0
    }

    /// Range of this script's things in the compilation's gc things table.
    pub fn gc_things_range(&self) -> Range<usize> {
        let start = self.gc_things_offset.index();
        start..start + self.gc_things_length as usize
    }

    pub fn gc_things_assigned(&self) -> bool {
        self.flags.contains(ScriptStencilFlags::GC_THINGS_ASSIGNED)
    }

    pub(crate) fn set_gc_things_span(&mut self, offset: GcThingIndex, length: u32) {
        debug_assert!(!self.gc_things_assigned());
        self.gc_things_offset = offset;
        self.gc_things_length = length;
        self.flags.insert(ScriptStencilFlags::GC_THINGS_ASSIGNED);
    }

    pub fn flags(&self) -> ScriptStencilFlags {
        self.flags
    }

    pub fn was_function_emitted(&self) -> bool {
        self.flags.contains(ScriptStencilFlags::WAS_FUNCTION_EMITTED)
    }

    pub fn set_was_function_emitted(&mut self) {
        self.flags.insert(ScriptStencilFlags::WAS_FUNCTION_EMITTED);
    }

    pub fn allow_relazify(&self) -> bool {
        self.flags.contains(ScriptStencilFlags::ALLOW_RELAZIFY)
    }

    pub fn set_allow_relazify(&mut self) {
        self.flags.insert(ScriptStencilFlags::ALLOW_RELAZIFY);
    }

    pub fn has_shared_data(&self) -> bool {
        self.flags.contains(ScriptStencilFlags::HAS_SHARED_DATA)
    }

    pub(crate) fn set_has_shared_data(&mut self) {
        self.flags.insert(ScriptStencilFlags::HAS_SHARED_DATA);
    }

    pub fn has_member_initializers(&self) -> bool {
        self.member_initializers.is_some()
    }

    pub fn set_member_initializers(&mut self, member_initializers: MemberInitializers) {
        self.member_initializers = Some(member_initializers);
    }

    pub fn member_initializers(&self) -> MemberInitializers {
        self.member_initializers
            .expect("member_initializers() called on a script without member initializers")
    }

    pub fn has_lazy_function_enclosing_scope_index(&self) -> bool {
        self.lazy_function_enclosing_scope_index.is_some()
    }

    pub fn set_lazy_function_enclosing_scope_index(&mut self, index: ScopeIndex) {
        self.lazy_function_enclosing_scope_index = Some(index);
    }

    pub fn lazy_function_enclosing_scope_index(&self) -> ScopeIndex {
        self.lazy_function_enclosing_scope_index
            .expect("script has no lazy function enclosing scope")
    }

    /// Raw optional accessors for the dumper and the decoder's validation.
    pub(crate) fn member_initializers_opt(&self) -> Option<MemberInitializers> {
        self.member_initializers
    }

    pub(crate) fn lazy_function_enclosing_scope_opt(&self) -> Option<ScopeIndex> {
        self.lazy_function_enclosing_scope_index
    }
}
