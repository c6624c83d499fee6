/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Scope stencils.
//!
//! A `ScopeStencil` describes the shape of one scope: which bindings it
//! has, where each binding lives at runtime, and which scope encloses it.
//! It never refers to a runtime scope object; `create_scope` builds that
//! object during instantiation.
//!
//! Creating a scope resolves every binding to a location:
//!
//! ```text
//!   closed over            → Environment(slot)   slots start after the
//!                                                reserved environment slots
//!   positional formal      → Argument(index)
//!   global / sloppy eval   → Global
//!   module import          → Import
//!   named lambda callee    → NamedLambdaCallee
//!   anything else          → Frame(slot)         from first_frame_slot
//! ```

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::atom::{CompilationAtomCache, TaggedParserAtomIndex};
use crate::compilation::{CompilationGcOutput, CompilationState};
use crate::error::{Result, StencilError};
use crate::heap::{Heap, RuntimeBinding, RuntimeScope};
use crate::index::{ScopeIndex, ScriptIndex};
use crate::u32_from_usize;

/// Slots every environment object reserves before its first binding.
pub const ENVIRONMENT_RESERVED_SLOTS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    Function,
    FunctionBodyVar,
    Lexical,
    ClassBody,
    SimpleCatch,
    Catch,
    NamedLambda,
    StrictNamedLambda,
    FunctionLexical,
    With,
    Eval,
    StrictEval,
    Global,
    NonSyntactic,
    Module,
    WasmInstance,
    WasmFunction,
}

/// The scope stencil type a `ScopeKind` is created as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeClass {
    Function,
    Lexical,
    Var,
    Global,
    Eval,
    Module,
    With,
}

impl ScopeClass {
    /// Wasm scopes have no stencil form and map to `None`.
    pub const fn for_kind(kind: ScopeKind) -> Option<Self> {
        Some(match kind {
            ScopeKind::Function => Self::Function,
            ScopeKind::Lexical
            | ScopeKind::SimpleCatch
            | ScopeKind::Catch
            | ScopeKind::NamedLambda
            | ScopeKind::StrictNamedLambda
            | ScopeKind::FunctionLexical
            | ScopeKind::ClassBody => Self::Lexical,
            ScopeKind::FunctionBodyVar => Self::Var,
            ScopeKind::Global | ScopeKind::NonSyntactic => Self::Global,
            ScopeKind::Eval | ScopeKind::StrictEval => Self::Eval,
            ScopeKind::Module => Self::Module,
            ScopeKind::With => Self::With,
            ScopeKind::WasmInstance | ScopeKind::WasmFunction => return None,
        })
    }

    pub fn matches(self, kind: ScopeKind) -> bool {
        Self::for_kind(kind) == Some(self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Lexical => "lexical",
            Self::Var => "var",
            Self::Global => "global",
            Self::Eval => "eval",
            Self::Module => "module",
            Self::With => "with",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    Import,
    FormalParameter,
    Var,
    Let,
    Const,
    NamedLambdaCallee,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingLocation {
    Global,
    Argument(u16),
    Frame(u32),
    Environment(u32),
    Import,
    NamedLambdaCallee,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingName {
    pub name: TaggedParserAtomIndex,
    pub closed_over: bool,
    pub is_top_level_function: bool,
}

impl BindingName {
    pub fn new(name: TaggedParserAtomIndex) -> Self {
        Self {
            name,
            closed_over: false,
            is_top_level_function: false,
        }
    }

    pub fn closed_over(name: TaggedParserAtomIndex) -> Self {
        Self {
            closed_over: true,
            ..Self::new(name)
        }
    }
}

/// Where each binding kind starts in a scope's binding list. Ranges run
/// from one start to the next, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingLayout {
    /// `[0, non_positional_formal_start)` positional formals,
    /// `[non_positional_formal_start, var_start)` other formals, then vars.
    Function {
        has_parameter_exprs: bool,
        non_positional_formal_start: u32,
        var_start: u32,
    },
    /// Lets, then consts from `const_start`.
    Lexical { const_start: u32 },
    Var,
    /// Vars and top-level functions, lets from `let_start`, consts from
    /// `const_start`.
    Global { let_start: u32, const_start: u32 },
    Eval,
    /// Imports, vars from `var_start`, lets from `let_start`, consts from
    /// `const_start`.
    Module {
        var_start: u32,
        let_start: u32,
        const_start: u32,
    },
    With,
}

impl BindingLayout {
    fn class(self) -> ScopeClass {
        match self {
            Self::Function { .. } => ScopeClass::Function,
            Self::Lexical { .. } => ScopeClass::Lexical,
            Self::Var => ScopeClass::Var,
            Self::Global { .. } => ScopeClass::Global,
            Self::Eval => ScopeClass::Eval,
            Self::Module { .. } => ScopeClass::Module,
            Self::With => ScopeClass::With,
        }
    }

    fn starts(self) -> Vec<u32> {
        match self {
            Self::Function {
                non_positional_formal_start,
                var_start,
                ..
            } => vec![non_positional_formal_start, var_start],
            Self::Lexical { const_start } => vec![const_start],
            Self::Global {
                let_start,
                const_start,
            } => vec![let_start, const_start],
            Self::Module {
                var_start,
                let_start,
                const_start,
            } => vec![var_start, let_start, const_start],
            Self::Var | Self::Eval | Self::With => Vec::new(),
        }
    }

    fn binding_kind(self, scope_kind: ScopeKind, i: u32) -> BindingKind {
        match self {
            Self::Function { var_start, .. } if i < var_start => BindingKind::FormalParameter,
            Self::Function { .. } | Self::Var | Self::Eval => BindingKind::Var,
            Self::Lexical { .. }
                if matches!(scope_kind, ScopeKind::NamedLambda | ScopeKind::StrictNamedLambda) =>
            {
                BindingKind::NamedLambdaCallee
            }
            Self::Lexical { const_start } if i < const_start => BindingKind::Let,
            Self::Lexical { .. } => BindingKind::Const,
            Self::Global { let_start, .. } if i < let_start => BindingKind::Var,
            Self::Module { var_start, .. } if i < var_start => BindingKind::Import,
            Self::Module { let_start, .. } if i < let_start => BindingKind::Var,
            Self::Global { const_start, .. } | Self::Module { const_start, .. }
                if i < const_start =>
            {
                BindingKind::Let
            }
            Self::Global { .. } | Self::Module { .. } => BindingKind::Const,
            Self::With => unreachable!("with scopes have no bindings"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBinding {
    pub kind: BindingKind,
    pub location: BindingLocation,
}

/// Per-kind binding data the parser hands to a scope creation operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserScopeData {
    pub layout: BindingLayout,
    pub bindings: Vec<BindingName>,
    // Filled in when the scope stencil is created.
    resolved: Vec<ResolvedBinding>,
    next_frame_slot: u32,
}

impl ParserScopeData {
    pub fn new(layout: BindingLayout, bindings: Vec<BindingName>) -> Self {
        Self {
            layout,
            bindings,
            resolved: Vec::new(),
            next_frame_slot: 0,
        }
    }

    pub fn with_scope() -> Self {
        Self::new(BindingLayout::With, Vec::new())
    }

    /// Kind and location of each binding, in binding order. Empty until the
    /// scope stencil owning this data has been created.
    pub fn resolved(&self) -> &[ResolvedBinding] {
        &self.resolved
    }

    pub(crate) fn layout_class(&self) -> ScopeClass {
        self.layout.class()
    }

    /// First frame slot not used by this scope's bindings.
    pub fn next_frame_slot(&self) -> u32 {
        self.next_frame_slot
    }

    fn validate(&self, kind: ScopeKind, state: &CompilationState) -> Result<()> {
        if ScopeClass::for_kind(kind) != Some(self.layout.class()) {
            return Err(StencilError::InvalidScopeData(
                "binding layout does not match the scope kind",
            ));
        }
        let len = u32_from_usize(self.bindings.len());
        let starts = self.layout.starts();
        if starts.windows(2).any(|w| w[0] > w[1]) || starts.iter().any(|&s| s > len) {
            return Err(StencilError::InvalidScopeData(
                "binding ranges are out of order",
            ));
        }
        if self.layout == BindingLayout::With && len != 0 {
            return Err(StencilError::InvalidScopeData("with scopes have no bindings"));
        }
        for binding in &self.bindings {
            if binding.name.is_null() {
                return Err(StencilError::InvalidScopeData("binding name is null"));
            }
            if !state.parser_atoms().contains(binding.name) {
                return Err(StencilError::DanglingIndex {
                    kind: "parser atom",
                    index: binding.name.raw(),
                });
            }
        }
        Ok(())
    }

    /// Assign every binding a location and return the number of environment
    /// slots used.
    fn resolve(&mut self, kind: ScopeKind, first_frame_slot: u32) -> Result<u32> {
        let mut next_frame_slot = first_frame_slot;
        let mut next_environment_slot = ENVIRONMENT_RESERVED_SLOTS;
        let mut resolved = Vec::with_capacity(self.bindings.len());

        for (i, binding) in self.bindings.iter().enumerate() {
            let i = u32_from_usize(i);
            let binding_kind = self.layout.binding_kind(kind, i);
            let location = match (self.layout, binding_kind) {
                (BindingLayout::Global { .. }, _) => BindingLocation::Global,
                (BindingLayout::Eval, _) if kind == ScopeKind::Eval => BindingLocation::Global,
                (_, BindingKind::Import) => BindingLocation::Import,
                _ if binding.closed_over => {
                    let slot = next_environment_slot;
                    next_environment_slot += 1;
                    BindingLocation::Environment(slot)
                }
                (_, BindingKind::NamedLambdaCallee) => BindingLocation::NamedLambdaCallee,
                (
                    BindingLayout::Function {
                        non_positional_formal_start,
                        ..
                    },
                    BindingKind::FormalParameter,
                ) if i < non_positional_formal_start => {
                    let index = u16::try_from(i).map_err(|_| StencilError::IndexLimitExceeded {
                        what: "positional formal parameters",
                        limit: u16::MAX as u32,
                    })?;
                    BindingLocation::Argument(index)
                }
                _ => {
                    let slot = next_frame_slot;
                    next_frame_slot = next_frame_slot.checked_add(1).ok_or(
                        StencilError::IndexLimitExceeded {
                            what: "frame slots",
                            limit: u32::MAX,
                        },
                    )?;
                    BindingLocation::Frame(slot)
                }
            };
            resolved.push(ResolvedBinding {
                kind: binding_kind,
                location,
            });
        }

        self.resolved = resolved;
        self.next_frame_slot = next_frame_slot;
        Ok(next_environment_slot - ENVIRONMENT_RESERVED_SLOTS)
    }

    fn has_closed_over_bindings(&self) -> bool {
        self.resolved
            .iter()
            .any(|binding| matches!(binding.location, BindingLocation::Environment(_)))
    }
}

/// The shape of one scope, independent of any runtime object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStencil {
    enclosing: Option<ScopeIndex>,
    first_frame_slot: u32,
    num_environment_slots: Option<u32>,
    /// Present exactly when `kind` is `ScopeKind::Function`.
    function_index: Option<ScriptIndex>,
    kind: ScopeKind,
    is_arrow: bool,
}

impl ScopeStencil {
    pub fn new(
        kind: ScopeKind,
        enclosing: Option<ScopeIndex>,
        first_frame_slot: u32,
        num_environment_slots: Option<u32>,
        function_index: Option<ScriptIndex>,
        is_arrow: bool,
    ) -> Result<Self> {
        if (kind == ScopeKind::Function) != function_index.is_some() {
            return Err(StencilError::FunctionIndexMismatch { kind });
        }
        Ok(Self {
            enclosing,
            first_frame_slot,
            num_environment_slots,
            function_index,
            kind,
            is_arrow,
        })
    }

    pub fn create_for_function_scope(
        state: &mut CompilationState,
        data: ParserScopeData,
        needs_environment: bool,
        function_index: ScriptIndex,
        is_arrow: bool,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        let Some(script) = state.scripts().get(function_index.index()) else {
            return Err(StencilError::DanglingIndex {
                kind: "script",
                index: function_index.0,
            });
        };
        if !script.is_function() {
            return Err(StencilError::NotAFunction(function_index.0));
        }
        Self::append(
            state,
            ScopeKind::Function,
            ScopeClass::Function,
            data,
            0,
            enclosing,
            |data| needs_environment || data.has_closed_over_bindings(),
            Some(function_index),
            is_arrow,
        )
    }

    pub fn create_for_lexical_scope(
        state: &mut CompilationState,
        kind: ScopeKind,
        data: ParserScopeData,
        first_frame_slot: u32,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        Self::append(
            state,
            kind,
            ScopeClass::Lexical,
            data,
            first_frame_slot,
            enclosing,
            ParserScopeData::has_closed_over_bindings,
            None,
            false,
        )
    }

    pub fn create_for_var_scope(
        state: &mut CompilationState,
        kind: ScopeKind,
        data: ParserScopeData,
        first_frame_slot: u32,
        needs_environment: bool,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        Self::append(
            state,
            kind,
            ScopeClass::Var,
            data,
            first_frame_slot,
            enclosing,
            |data| needs_environment || data.has_closed_over_bindings(),
            None,
            false,
        )
    }

    /// Global scopes are roots: they never have an enclosing scope.
    pub fn create_for_global_scope(
        state: &mut CompilationState,
        kind: ScopeKind,
        data: ParserScopeData,
    ) -> Result<ScopeIndex> {
        Self::append(state, kind, ScopeClass::Global, data, 0, None, |_| false, None, false)
    }

    /// Strict eval code gets its own variable environment; sloppy eval vars
    /// land in the enclosing var scope.
    pub fn create_for_eval_scope(
        state: &mut CompilationState,
        kind: ScopeKind,
        data: ParserScopeData,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        Self::append(
            state,
            kind,
            ScopeClass::Eval,
            data,
            0,
            enclosing,
            |_| kind == ScopeKind::StrictEval,
            None,
            false,
        )
    }

    pub fn create_for_module_scope(
        state: &mut CompilationState,
        data: ParserScopeData,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        Self::append(
            state,
            ScopeKind::Module,
            ScopeClass::Module,
            data,
            0,
            enclosing,
            |_| true,
            None,
            false,
        )
    }

    pub fn create_for_with_scope(
        state: &mut CompilationState,
        enclosing: Option<ScopeIndex>,
    ) -> Result<ScopeIndex> {
        Self::append(
            state,
            ScopeKind::With,
            ScopeClass::With,
            ParserScopeData::with_scope(),
            0,
            enclosing,
            |_| false,
            None,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        state: &mut CompilationState,
        kind: ScopeKind,
        class: ScopeClass,
        mut data: ParserScopeData,
        first_frame_slot: u32,
        enclosing: Option<ScopeIndex>,
        needs_environment: impl FnOnce(&ParserScopeData) -> bool,
        function_index: Option<ScriptIndex>,
        is_arrow: bool,
    ) -> Result<ScopeIndex> {
        if !class.matches(kind) {
            return Err(StencilError::ScopeKindMismatch {
                kind,
                expected: class.name(),
            });
        }
        data.validate(kind, state)?;

        let index = u32_from_usize(state.scopes().len());
        if let Some(enclosing) = enclosing
            && enclosing.0 >= index
        {
            return Err(StencilError::EnclosingScopeOutOfOrder {
                scope: index,
                enclosing: enclosing.0,
            });
        }

        let num_slots = data.resolve(kind, first_frame_slot)?;
        let num_environment_slots = needs_environment(&data).then_some(num_slots);
        let stencil = Self::new(
            kind,
            enclosing,
            first_frame_slot,
            num_environment_slots,
            function_index,
            is_arrow,
        )?;
        let index = state.append_scope(stencil, data)?;
        trace!(index = index.0, ?kind, ?enclosing, ?num_environment_slots, "scope stencil created");
        Ok(index)
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn has_enclosing(&self) -> bool {
        self.enclosing.is_some()
    }

    pub fn enclosing(&self) -> ScopeIndex {
        self.enclosing
            .expect("enclosing() called on a scope without an enclosing scope")
    }

    pub(crate) fn enclosing_opt(&self) -> Option<ScopeIndex> {
        self.enclosing
    }

    pub fn first_frame_slot(&self) -> u32 {
        self.first_frame_slot
    }

    pub fn has_environment_shape(&self) -> bool {
        self.num_environment_slots.is_some()
    }

    pub fn num_environment_slots(&self) -> u32 {
        self.num_environment_slots
            .expect("num_environment_slots() called on a scope without an environment shape")
    }

    pub(crate) fn num_environment_slots_opt(&self) -> Option<u32> {
        self.num_environment_slots
    }

    pub fn is_function(&self) -> bool {
        self.kind == ScopeKind::Function
    }

    pub fn function_index(&self) -> Option<ScriptIndex> {
        self.function_index
    }

    /// With and global scopes always have an environment; other kinds only
    /// when an environment shape is created for them.
    pub fn has_environment(&self) -> bool {
        match self.kind {
            ScopeKind::With | ScopeKind::Global | ScopeKind::NonSyntactic => true,
            _ => self.has_environment_shape(),
        }
    }

    pub fn is_arrow(&self) -> bool {
        self.is_arrow
    }

    /// Create the runtime scope for this stencil.
    ///
    /// Scopes are instantiated in creation order, so the enclosing scope (if
    /// any) is already in `output`. A scope without one is enclosed by
    /// `input_enclosing`, or by the empty global scope when the target has
    /// no enclosing scope of its own.
    pub fn create_scope<H: Heap>(
        &self,
        data: &ParserScopeData,
        input_enclosing: Option<H::Ptr>,
        output: &CompilationGcOutput<H::Ptr>,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
    ) -> Result<H::Ptr> {
        let Some(class) = ScopeClass::for_kind(self.kind) else {
            unreachable!("{:?} scopes are never created from a stencil", self.kind);
        };
        debug_assert_eq!(data.layout.class(), class);
        debug_assert_eq!(data.resolved.len(), data.bindings.len());

        let enclosing = match self.enclosing {
            Some(index) => Some(*output.scopes.get(index.index()).ok_or(
                StencilError::DanglingIndex {
                    kind: "scope",
                    index: index.0,
                },
            )?),
            None if class == ScopeClass::Global => None,
            None => Some(match input_enclosing {
                Some(scope) => scope,
                None => heap.empty_global_scope()?,
            }),
        };

        let function = match self.function_index {
            Some(index) => Some(output.functions.get(index.index()).copied().flatten().ok_or(
                StencilError::DanglingIndex {
                    kind: "function",
                    index: index.0,
                },
            )?),
            None => None,
        };

        let mut bindings = Vec::with_capacity(data.bindings.len());
        for (binding, resolved) in data.bindings.iter().zip(&data.resolved) {
            bindings.push(RuntimeBinding {
                name: atom_cache.get_existing(binding.name)?,
                kind: resolved.kind,
                location: resolved.location,
            });
        }

        let environment_shape = match self.num_environment_slots {
            Some(num_slots) => Some(heap.new_environment_shape(self.kind, num_slots)?),
            None => None,
        };

        Ok(heap.new_scope(RuntimeScope {
            kind: self.kind,
            enclosing,
            environment_shape,
            function,
            first_frame_slot: self.first_frame_slot,
            bindings,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::CompilationState;
    use crate::script::{FunctionFlags, ImmutableScriptFlags, ScriptStencil, SourceExtent};

    fn atom(state: &mut CompilationState, name: &str) -> TaggedParserAtomIndex {
        state.parser_atoms_mut().intern_str(name).unwrap()
    }

    fn state_with_function() -> (CompilationState, ScriptIndex) {
        let mut state = CompilationState::new();
        state
            .push_script(ScriptStencil::top_level(
                ImmutableScriptFlags::EMPTY,
                SourceExtent::default(),
            ))
            .unwrap();
        let function = state
            .push_script(ScriptStencil::function(
                TaggedParserAtomIndex::null(),
                FunctionFlags::INTERPRETED_NORMAL,
                2,
                ImmutableScriptFlags::EMPTY,
                SourceExtent::default(),
            ))
            .unwrap();
        (state, function)
    }

    #[test]
    fn kind_matcher_covers_every_kind() {
        use ScopeKind::*;
        let expected = [
            (Function, Some(ScopeClass::Function)),
            (Lexical, Some(ScopeClass::Lexical)),
            (SimpleCatch, Some(ScopeClass::Lexical)),
            (Catch, Some(ScopeClass::Lexical)),
            (NamedLambda, Some(ScopeClass::Lexical)),
            (StrictNamedLambda, Some(ScopeClass::Lexical)),
            (FunctionLexical, Some(ScopeClass::Lexical)),
            (ClassBody, Some(ScopeClass::Lexical)),
            (FunctionBodyVar, Some(ScopeClass::Var)),
            (Global, Some(ScopeClass::Global)),
            (NonSyntactic, Some(ScopeClass::Global)),
            (Eval, Some(ScopeClass::Eval)),
            (StrictEval, Some(ScopeClass::Eval)),
            (Module, Some(ScopeClass::Module)),
            (With, Some(ScopeClass::With)),
            (WasmInstance, None),
            (WasmFunction, None),
        ];
        for (kind, class) in expected {
            assert_eq!(ScopeClass::for_kind(kind), class, "{kind:?}");
        }
    }

    #[test]
    fn function_index_is_required_exactly_for_function_scopes() {
        assert!(matches!(
            ScopeStencil::new(ScopeKind::Function, None, 0, None, None, false),
            Err(StencilError::FunctionIndexMismatch { .. })
        ));
        assert!(matches!(
            ScopeStencil::new(ScopeKind::Lexical, None, 0, None, Some(ScriptIndex(1)), false),
            Err(StencilError::FunctionIndexMismatch { .. })
        ));
        assert!(ScopeStencil::new(ScopeKind::Function, None, 0, None, Some(ScriptIndex(1)), true).is_ok());
    }

    #[test]
    fn scope_without_enclosing_reports_it() {
        let mut state = CompilationState::new();
        let global = ScopeStencil::create_for_global_scope(
            &mut state,
            ScopeKind::Global,
            ParserScopeData::new(BindingLayout::Global { let_start: 0, const_start: 0 }, Vec::new()),
        )
        .unwrap();
        let scope = &state.scopes()[global.index()];
        assert!(!scope.has_enclosing());
        assert!(scope.has_environment());
        assert!(!scope.has_environment_shape());
    }

    #[test]
    #[should_panic(expected = "without an enclosing scope")]
    fn reading_a_missing_enclosing_scope_panics() {
        let stencil = ScopeStencil::new(ScopeKind::Lexical, None, 0, None, None, false).unwrap();
        stencil.enclosing();
    }

    #[test]
    fn function_scope_assigns_argument_frame_and_environment_slots() {
        let (mut state, function) = state_with_function();
        let a = atom(&mut state, "a");
        let b = atom(&mut state, "b");
        let v = atom(&mut state, "v");
        let w = atom(&mut state, "w");
        let data = ParserScopeData::new(
            BindingLayout::Function {
                has_parameter_exprs: false,
                non_positional_formal_start: 2,
                var_start: 2,
            },
            vec![
                BindingName::new(a),
                BindingName::closed_over(b),
                BindingName::new(v),
                BindingName::closed_over(w),
            ],
        );
        let index =
            ScopeStencil::create_for_function_scope(&mut state, data, false, function, false, None)
                .unwrap();

        let scope = &state.scopes()[index.index()];
        assert_eq!(scope.function_index(), Some(function));
        assert_eq!(scope.num_environment_slots(), 2);

        let locations: Vec<_> = state.scope_data()[index.index()]
            .resolved()
            .iter()
            .map(|b| b.location)
            .collect();
        assert_eq!(
            locations,
            vec![
                BindingLocation::Argument(0),
                BindingLocation::Environment(ENVIRONMENT_RESERVED_SLOTS),
                BindingLocation::Frame(0),
                BindingLocation::Environment(ENVIRONMENT_RESERVED_SLOTS + 1),
            ]
        );
        assert_eq!(state.scope_data()[index.index()].next_frame_slot(), 1);
    }

    #[test]
    fn lexical_scope_without_closed_over_bindings_has_no_environment() {
        let mut state = CompilationState::new();
        let x = atom(&mut state, "x");
        let y = atom(&mut state, "y");
        let data = ParserScopeData::new(
            BindingLayout::Lexical { const_start: 1 },
            vec![BindingName::new(x), BindingName::new(y)],
        );
        let index =
            ScopeStencil::create_for_lexical_scope(&mut state, ScopeKind::Lexical, data, 4, None)
                .unwrap();
        let scope = &state.scopes()[index.index()];
        assert!(!scope.has_environment());
        assert_eq!(scope.first_frame_slot(), 4);

        let resolved = state.scope_data()[index.index()].resolved();
        assert_eq!(resolved[0].kind, BindingKind::Let);
        assert_eq!(resolved[1].kind, BindingKind::Const);
        assert_eq!(resolved[1].location, BindingLocation::Frame(5));
    }

    #[test]
    fn creation_rejects_wrong_kinds_and_forward_references() {
        let mut state = CompilationState::new();
        assert!(matches!(
            ScopeStencil::create_for_lexical_scope(
                &mut state,
                ScopeKind::FunctionBodyVar,
                ParserScopeData::new(BindingLayout::Lexical { const_start: 0 }, Vec::new()),
                0,
                None,
            ),
            Err(StencilError::ScopeKindMismatch { .. })
        ));
        assert!(matches!(
            ScopeStencil::create_for_with_scope(&mut state, Some(ScopeIndex(0))),
            Err(StencilError::EnclosingScopeOutOfOrder { scope: 0, enclosing: 0 })
        ));
        assert!(matches!(
            ScopeStencil::create_for_var_scope(
                &mut state,
                ScopeKind::FunctionBodyVar,
                ParserScopeData::new(BindingLayout::Lexical { const_start: 0 }, Vec::new()),
                0,
                false,
                None,
            ),
            Err(StencilError::InvalidScopeData(_))
        ));
        assert!(matches!(
            ScopeStencil::create_for_function_scope(
                &mut state,
                ParserScopeData::new(
                    BindingLayout::Function {
                        has_parameter_exprs: false,
                        non_positional_formal_start: 0,
                        var_start: 0,
                    },
                    Vec::new(),
                ),
                false,
                ScriptIndex(7),
                false,
                None,
            ),
            Err(StencilError::DanglingIndex { kind: "script", .. })
        ));
        assert!(state.scopes().is_empty());
    }

    #[test]
    fn eval_scopes_get_an_environment_only_when_strict() {
        let mut state = CompilationState::new();
        let x = atom(&mut state, "x");
        let sloppy = ScopeStencil::create_for_eval_scope(
            &mut state,
            ScopeKind::Eval,
            ParserScopeData::new(BindingLayout::Eval, vec![BindingName::new(x)]),
            None,
        )
        .unwrap();
        let strict = ScopeStencil::create_for_eval_scope(
            &mut state,
            ScopeKind::StrictEval,
            ParserScopeData::new(BindingLayout::Eval, vec![BindingName::new(x)]),
            Some(sloppy),
        )
        .unwrap();
        assert!(!state.scopes()[sloppy.index()].has_environment());
        assert_eq!(
            state.scope_data()[sloppy.index()].resolved()[0].location,
            BindingLocation::Global
        );
        assert!(state.scopes()[strict.index()].has_environment());
        assert_eq!(state.scopes()[strict.index()].enclosing(), sloppy);
    }
}
