/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! The compilation container and the instantiation driver.
//!
//! A compilation unit moves through three states:
//!
//! ```text
//!   CompilationState ──freeze()──▶ CompilationStencil ──instantiate()──▶ CompilationGcOutput
//!      (Building)                       (Frozen)                            (Instantiated)
//!   append-only arenas              read-only, Send + Sync              runtime handles
//! ```
//!
//! `freeze` consumes the state, so no creation operation can run on a
//! frozen unit. A stencil may be instantiated any number of times, each
//! time with its own atom cache and target context.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::atom::{CompilationAtomCache, INDEX_LIMIT, ParserAtomsTable, TaggedParserAtomIndex};
use crate::error::{Result, StencilError};
use crate::heap::{Heap, RuntimeFunction, RuntimeScript};
use crate::index::{BigIntIndex, GcThingIndex, ObjLiteralIndex, RegExpIndex, ScopeIndex, ScriptIndex};
use crate::literal::{BigIntStencil, ObjLiteralStencil, RegExpStencil};
use crate::module::StencilModuleMetadata;
use crate::scope::{ParserScopeData, ScopeClass, ScopeStencil};
use crate::script::{ImmutableScriptFlags, ScriptStencil, SharedScriptData, SourceExtent};
use crate::tagged::{ScriptThingKind, TaggedScriptThingIndex};
use crate::u32_from_usize;

/// Options that shape the top-level script of a compilation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompilationOptions {
    pub self_hosting_mode: bool,
    pub force_strict: bool,
    pub non_syntactic_scope: bool,
    pub is_run_once: bool,
    pub no_script_rval: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopLevelKind {
    Script,
    Eval,
    Module,
}

impl CompilationOptions {
    pub fn top_level_flags(&self, kind: TopLevelKind) -> ImmutableScriptFlags {
        let mut flags = ImmutableScriptFlags::EMPTY;
        if self.self_hosting_mode {
            flags |= ImmutableScriptFlags::SELF_HOSTED;
        }
        if self.force_strict {
            flags |= ImmutableScriptFlags::FORCE_STRICT | ImmutableScriptFlags::STRICT;
        }
        if self.non_syntactic_scope {
            flags |= ImmutableScriptFlags::HAS_NON_SYNTACTIC_SCOPE;
        }
        if self.is_run_once {
            flags |= ImmutableScriptFlags::TREAT_AS_RUN_ONCE;
        }
        if self.no_script_rval {
            flags |= ImmutableScriptFlags::NO_SCRIPT_RVAL;
        }
        match kind {
            TopLevelKind::Script => {}
            TopLevelKind::Eval => flags |= ImmutableScriptFlags::IS_FOR_EVAL,
            TopLevelKind::Module => {
                flags |= ImmutableScriptFlags::IS_MODULE
                    | ImmutableScriptFlags::HAS_MODULE_GOAL
                    | ImmutableScriptFlags::STRICT
            }
        }
        flags
    }
}

fn check_limit(len: usize, what: &'static str) -> Result<u32> {
    let index = u32_from_usize(len);
    if index >= INDEX_LIMIT {
        return Err(StencilError::IndexLimitExceeded {
            what,
            limit: INDEX_LIMIT,
        });
    }
    Ok(index)
}

fn check_script_flags(index: u32, script: &ScriptStencil) -> Result<()> {
    let flags = script.function_flags;
    if flags.is_empty() {
        return Ok(());
    }
    if !flags.is_asmjs_native() && !flags.has_base_script() {
        return Err(StencilError::InvalidFunctionFlags(flags.raw()));
    }
    if script.immutable_flags.contains(ImmutableScriptFlags::IS_MODULE) {
        return Err(StencilError::FunctionAndModule(index));
    }
    Ok(())
}

/// A compilation unit while it is being built.
///
/// Everything is appended to flat arenas and refers to other entries by
/// index only, so the whole state can be moved to another thread.
#[derive(Debug, Default)]
pub struct CompilationState {
    parser_atoms: ParserAtomsTable,
    scripts: Vec<ScriptStencil>,
    shared_data: Vec<Option<SharedScriptData>>,
    scopes: Vec<ScopeStencil>,
    scope_data: Vec<ParserScopeData>,
    regexps: Vec<RegExpStencil>,
    bigints: Vec<BigIntStencil>,
    obj_literals: Vec<ObjLiteralStencil>,
    gc_things: Vec<TaggedScriptThingIndex>,
    module_metadata: Option<StencilModuleMetadata>,
}

impl CompilationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parser_atoms(&self) -> &ParserAtomsTable {
        &self.parser_atoms
    }

    pub fn parser_atoms_mut(&mut self) -> &mut ParserAtomsTable {
        &mut self.parser_atoms
    }

    pub fn scripts(&self) -> &[ScriptStencil] {
        &self.scripts
    }

    pub fn scopes(&self) -> &[ScopeStencil] {
        &self.scopes
    }

    pub fn scope_data(&self) -> &[ParserScopeData] {
        &self.scope_data
    }

    pub fn gc_things(&self) -> &[TaggedScriptThingIndex] {
        &self.gc_things
    }

    fn check_atom(&self, atom: TaggedParserAtomIndex) -> Result<()> {
        if !self.parser_atoms.contains(atom) {
            return Err(StencilError::DanglingIndex {
                kind: "parser atom",
                index: atom.raw(),
            });
        }
        Ok(())
    }

    /// Push the top-level script, which must be the first script.
    pub fn push_top_level_script(
        &mut self,
        options: &CompilationOptions,
        kind: TopLevelKind,
        extent: SourceExtent,
    ) -> Result<ScriptIndex> {
        if !self.scripts.is_empty() {
            return Err(StencilError::InvalidStencil(
                "the top-level script must be the first script".to_string(),
            ));
        }
        self.push_script(ScriptStencil::top_level(options.top_level_flags(kind), extent))
    }

    pub fn push_script(&mut self, script: ScriptStencil) -> Result<ScriptIndex> {
        let index = check_limit(self.scripts.len(), "scripts")?;
        check_script_flags(index, &script)?;
        self.check_atom(script.function_atom)?;
        self.scripts.push(script);
        self.shared_data.push(None);
        Ok(ScriptIndex(index))
    }

    pub fn script_mut(&mut self, index: ScriptIndex) -> Result<&mut ScriptStencil> {
        self.scripts
            .get_mut(index.index())
            .ok_or(StencilError::DanglingIndex {
                kind: "script",
                index: index.0,
            })
    }

    /// Write the gc things span of `script`. Each span is written once, in
    /// one piece, after every thing it refers to exists.
    pub fn set_gc_things(
        &mut self,
        script: ScriptIndex,
        things: &[TaggedScriptThingIndex],
    ) -> Result<()> {
        if self.script_mut(script)?.gc_things_assigned() {
            return Err(StencilError::GcThingsAlreadySet(script.0));
        }
        for &thing in things {
            self.check_thing(thing)?;
        }
        let offset = GcThingIndex(u32_from_usize(self.gc_things.len()));
        check_limit(self.gc_things.len() + things.len(), "gc things")?;
        self.gc_things.extend_from_slice(things);
        self.scripts[script.index()].set_gc_things_span(offset, u32_from_usize(things.len()));
        Ok(())
    }

    fn check_thing(&self, thing: TaggedScriptThingIndex) -> Result<()> {
        let (kind, len) = match thing.tag() {
            ScriptThingKind::Null | ScriptThingKind::EmptyGlobalScope => return Ok(()),
            ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
                return self.check_atom(thing.to_atom());
            }
            ScriptThingKind::BigInt => ("bigint", self.bigints.len()),
            ScriptThingKind::ObjLiteral => ("object literal", self.obj_literals.len()),
            ScriptThingKind::RegExp => ("regexp", self.regexps.len()),
            ScriptThingKind::Scope => ("scope", self.scopes.len()),
            ScriptThingKind::Function => ("function", self.scripts.len()),
        };
        let index = thing.raw() & crate::atom::INDEX_MASK;
        if index as usize >= len {
            return Err(StencilError::DanglingIndex { kind, index });
        }
        Ok(())
    }

    pub fn set_shared_data(&mut self, script: ScriptIndex, data: SharedScriptData) -> Result<()> {
        self.script_mut(script)?.set_has_shared_data();
        self.shared_data[script.index()] = Some(data);
        Ok(())
    }

    pub fn push_regexp(&mut self, regexp: RegExpStencil) -> Result<RegExpIndex> {
        let index = check_limit(self.regexps.len(), "regexps")?;
        self.check_atom(regexp.atom())?;
        self.regexps.push(regexp);
        Ok(RegExpIndex(index))
    }

    pub fn push_bigint(&mut self, bigint: BigIntStencil) -> Result<BigIntIndex> {
        let index = check_limit(self.bigints.len(), "bigints")?;
        self.bigints.push(bigint);
        Ok(BigIntIndex(index))
    }

    pub fn push_obj_literal(&mut self, literal: ObjLiteralStencil) -> Result<ObjLiteralIndex> {
        let index = check_limit(self.obj_literals.len(), "object literals")?;
        for atom in literal.atoms() {
            self.check_atom(atom)?;
        }
        self.obj_literals.push(literal);
        Ok(ObjLiteralIndex(index))
    }

    pub(crate) fn append_scope(
        &mut self,
        scope: ScopeStencil,
        data: ParserScopeData,
    ) -> Result<ScopeIndex> {
        let index = check_limit(self.scopes.len(), "scopes")?;
        self.scopes.push(scope);
        self.scope_data.push(data);
        Ok(ScopeIndex(index))
    }

    pub fn set_module_metadata(&mut self, metadata: StencilModuleMetadata) -> Result<()> {
        for entry in metadata.entries() {
            for atom in entry.atoms() {
                self.check_atom(atom)?;
            }
        }
        self.module_metadata = Some(metadata);
        Ok(())
    }

    /// Finish building. The returned stencil is read-only.
    ///
    /// ```compile_fail
    /// use libjs_stencil::compilation::CompilationState;
    ///
    /// let mut state = CompilationState::new();
    /// let stencil = state.freeze();
    /// state.parser_atoms_mut().intern_str("too late");
    /// ```
    pub fn freeze(self) -> Result<CompilationStencil> {
        let stencil = CompilationStencil {
            parser_atoms: self.parser_atoms,
            scripts: self.scripts,
            shared_data: self.shared_data,
            scopes: self.scopes,
            scope_data: self.scope_data,
            regexps: self.regexps,
            bigints: self.bigints,
            obj_literals: self.obj_literals,
            gc_things: self.gc_things,
            module_metadata: self.module_metadata,
        };
        stencil.validate()?;
        debug!(
            scripts = stencil.scripts.len(),
            scopes = stencil.scopes.len(),
            atoms = stencil.parser_atoms.len(),
            gc_things = stencil.gc_things.len(),
            "compilation frozen"
        );
        Ok(stencil)
    }
}

/// Where an instantiation puts the compiled unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetContext<P> {
    Global,
    Eval { enclosing_scope: P },
    Module,
    /// Compile the body of an existing lazy function. The stencil's
    /// top-level script is that function.
    Delazification { function: P, enclosing_scope: P },
}

impl<P: Copy> TargetContext<P> {
    pub fn enclosing_scope(&self) -> Option<P> {
        match *self {
            Self::Eval { enclosing_scope } | Self::Delazification { enclosing_scope, .. } => {
                Some(enclosing_scope)
            }
            Self::Global | Self::Module => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Eval { .. } => "eval",
            Self::Module => "module",
            Self::Delazification { .. } => "delazification",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompilationInput<P> {
    pub target: TargetContext<P>,
}

impl<P: Copy> CompilationInput<P> {
    pub fn global() -> Self {
        Self {
            target: TargetContext::Global,
        }
    }

    pub fn eval(enclosing_scope: P) -> Self {
        Self {
            target: TargetContext::Eval { enclosing_scope },
        }
    }

    pub fn module() -> Self {
        Self {
            target: TargetContext::Module,
        }
    }

    pub fn delazification(function: P, enclosing_scope: P) -> Self {
        Self {
            target: TargetContext::Delazification {
                function,
                enclosing_scope,
            },
        }
    }
}

/// Runtime handles produced by one instantiation, indexed like the
/// stencil's arenas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilationGcOutput<P> {
    /// The top-level script. Always set once instantiation succeeded.
    pub script: Option<P>,
    pub module: Option<P>,
    /// One entry per script stencil; `None` for non-functions.
    pub functions: Vec<Option<P>>,
    pub scopes: Vec<P>,
    /// One entry per script stencil; `None` for asm.js natives.
    pub scripts: Vec<Option<P>>,
}

impl<P> CompilationGcOutput<P> {
    fn with_capacity(scripts: usize, scopes: usize) -> Self {
        Self {
            script: None,
            module: None,
            functions: Vec::with_capacity(scripts),
            scopes: Vec::with_capacity(scopes),
            scripts: Vec::with_capacity(scripts),
        }
    }
}

/// A frozen compilation unit.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompilationStencil {
    pub(crate) parser_atoms: ParserAtomsTable,
    pub(crate) scripts: Vec<ScriptStencil>,
    pub(crate) shared_data: Vec<Option<SharedScriptData>>,
    pub(crate) scopes: Vec<ScopeStencil>,
    pub(crate) scope_data: Vec<ParserScopeData>,
    pub(crate) regexps: Vec<RegExpStencil>,
    pub(crate) bigints: Vec<BigIntStencil>,
    pub(crate) obj_literals: Vec<ObjLiteralStencil>,
    pub(crate) gc_things: Vec<TaggedScriptThingIndex>,
    pub(crate) module_metadata: Option<StencilModuleMetadata>,
}

impl CompilationStencil {
    pub fn parser_atoms(&self) -> &ParserAtomsTable {
        &self.parser_atoms
    }

    pub fn scripts(&self) -> &[ScriptStencil] {
        &self.scripts
    }

    pub fn top_level(&self) -> &ScriptStencil {
        &self.scripts[ScriptIndex::TOP_LEVEL.index()]
    }

    pub fn shared_data(&self, script: ScriptIndex) -> Option<&SharedScriptData> {
        self.shared_data.get(script.index())?.as_ref()
    }

    pub fn scopes(&self) -> &[ScopeStencil] {
        &self.scopes
    }

    pub fn scope_data(&self) -> &[ParserScopeData] {
        &self.scope_data
    }

    pub fn regexps(&self) -> &[RegExpStencil] {
        &self.regexps
    }

    pub fn bigints(&self) -> &[BigIntStencil] {
        &self.bigints
    }

    pub fn obj_literals(&self) -> &[ObjLiteralStencil] {
        &self.obj_literals
    }

    pub fn gc_things(&self) -> &[TaggedScriptThingIndex] {
        &self.gc_things
    }

    pub fn gc_things_for(&self, script: ScriptIndex) -> &[TaggedScriptThingIndex] {
        &self.gc_things[self.scripts[script.index()].gc_things_range()]
    }

    pub fn module_metadata(&self) -> Option<&StencilModuleMetadata> {
        self.module_metadata.as_ref()
    }

    fn invalid(message: impl Into<String>) -> StencilError {
        StencilError::InvalidStencil(message.into())
    }

    fn validate_atom(&self, atom: TaggedParserAtomIndex) -> Result<()> {
        if TaggedParserAtomIndex::from_raw(atom.raw()).is_none() || !self.parser_atoms.contains(atom) {
            return Err(StencilError::DanglingIndex {
                kind: "parser atom",
                index: atom.raw(),
            });
        }
        Ok(())
    }

    /// Check every cross-reference of the stencil. Runs on freeze and on
    /// every decoded stencil, so it must not trust any field.
    pub(crate) fn validate(&self) -> Result<()> {
        let Some(top_level) = self.scripts.first() else {
            return Err(StencilError::MissingTopLevelScript);
        };
        if self.shared_data.len() != self.scripts.len() || self.scope_data.len() != self.scopes.len() {
            return Err(Self::invalid("parallel arenas differ in length"));
        }

        for (i, script) in self.scripts.iter().enumerate() {
            let index = u32_from_usize(i);
            check_script_flags(index, script)?;
            self.validate_atom(script.function_atom)?;
            if script.has_gc_things() && !script.gc_things_assigned() {
                return Err(Self::invalid(format!("gc things of script {index} were never assigned")));
            }
            let range = script.gc_things_range();
            if range.end > self.gc_things.len() {
                return Err(Self::invalid(format!("gc things of script {index} are out of range")));
            }
            if script.has_shared_data() != self.shared_data[i].is_some() {
                return Err(Self::invalid(format!("shared data flag of script {index} is wrong")));
            }
            if let Some(scope) = script.lazy_function_enclosing_scope_opt()
                && scope.index() >= self.scopes.len()
            {
                return Err(StencilError::DanglingIndex {
                    kind: "scope",
                    index: scope.0,
                });
            }
        }

        for &thing in &self.gc_things {
            let Some(thing) = TaggedScriptThingIndex::from_raw(thing.raw()) else {
                return Err(Self::invalid(format!("bad gc thing {:#010x}", thing.raw())));
            };
            let (kind, index, len) = match thing.tag() {
                ScriptThingKind::Null | ScriptThingKind::EmptyGlobalScope => continue,
                ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
                    self.validate_atom(thing.to_atom())?;
                    continue;
                }
                ScriptThingKind::BigInt => ("bigint", thing.to_bigint().0, self.bigints.len()),
                ScriptThingKind::ObjLiteral => {
                    ("object literal", thing.to_obj_literal().0, self.obj_literals.len())
                }
                ScriptThingKind::RegExp => ("regexp", thing.to_regexp().0, self.regexps.len()),
                ScriptThingKind::Scope => ("scope", thing.to_scope().0, self.scopes.len()),
                ScriptThingKind::Function => ("function", thing.to_function().0, self.scripts.len()),
            };
            if index as usize >= len {
                return Err(StencilError::DanglingIndex { kind, index });
            }
        }

        for (i, (scope, data)) in self.scopes.iter().zip(&self.scope_data).enumerate() {
            let index = u32_from_usize(i);
            if ScopeClass::for_kind(scope.kind()).is_none() {
                return Err(Self::invalid(format!("scope {index} has kind {:?}", scope.kind())));
            }
            if scope.is_function() != scope.function_index().is_some() {
                return Err(StencilError::FunctionIndexMismatch { kind: scope.kind() });
            }
            if let Some(function) = scope.function_index() {
                let Some(script) = self.scripts.get(function.index()) else {
                    return Err(StencilError::DanglingIndex {
                        kind: "script",
                        index: function.0,
                    });
                };
                if !script.is_function() {
                    return Err(StencilError::NotAFunction(function.0));
                }
            }
            if let Some(enclosing) = scope.enclosing_opt()
                && enclosing.0 >= index
            {
                return Err(StencilError::EnclosingScopeOutOfOrder {
                    scope: index,
                    enclosing: enclosing.0,
                });
            }
            if ScopeClass::for_kind(scope.kind()) != Some(data.layout_class())
                || data.resolved().len() != data.bindings.len()
            {
                return Err(Self::invalid(format!("binding data of scope {index} is inconsistent")));
            }
            for binding in &data.bindings {
                self.validate_atom(binding.name)?;
            }
        }

        for regexp in &self.regexps {
            self.validate_atom(regexp.atom())?;
        }
        for bigint in &self.bigints {
            BigIntStencil::new(bigint.digits())?;
        }
        for literal in &self.obj_literals {
            for atom in literal.atoms() {
                self.validate_atom(atom)?;
            }
        }

        let is_module = top_level.immutable_flags.contains(ImmutableScriptFlags::IS_MODULE);
        match (&self.module_metadata, is_module) {
            (Some(metadata), true) => {
                for entry in metadata.entries() {
                    for atom in entry.atoms() {
                        self.validate_atom(atom)?;
                    }
                }
                let things = &self.gc_things[top_level.gc_things_range()];
                for decl in &metadata.function_decls {
                    if !things.get(decl.index()).is_some_and(|thing| thing.is_function()) {
                        return Err(Self::invalid(format!(
                            "module function declaration {} is not a function",
                            decl.0
                        )));
                    }
                }
            }
            (None, false) => {}
            _ => return Err(StencilError::ModuleMetadataMismatch),
        }
        Ok(())
    }

    fn check_target<P: Copy>(&self, target: &TargetContext<P>) -> Result<()> {
        let top_level = self.top_level();
        let is_module = top_level.is_module();
        let is_eval = top_level.immutable_flags.contains(ImmutableScriptFlags::IS_FOR_EVAL);
        let is_function = top_level.is_function();
        match target {
            TargetContext::Module if !is_module => {
                Err(StencilError::TargetMismatch("only module stencils can be instantiated as modules"))
            }
            TargetContext::Eval { .. } if !is_eval => {
                Err(StencilError::TargetMismatch("eval targets need an eval stencil"))
            }
            TargetContext::Delazification { .. }
                if !is_function || !top_level.function_flags.has_base_script() =>
            {
                Err(StencilError::TargetMismatch("delazification needs a function with a base script"))
            }
            TargetContext::Global | TargetContext::Eval { .. } | TargetContext::Module
                if is_function =>
            {
                Err(StencilError::TargetMismatch("function stencils can only be delazified"))
            }
            TargetContext::Global if is_module || is_eval => {
                Err(StencilError::TargetMismatch("global targets need a plain script stencil"))
            }
            _ => Ok(()),
        }
    }

    /// Materialize the whole unit into `heap`.
    ///
    /// Order: atoms, functions, scopes (in creation order, so every enclosing
    /// scope exists before the scopes it encloses), scripts with their gc
    /// things, lazy enclosing scopes of emitted inner functions, the module
    /// tables, and finally the function to script links. Any failure
    /// abandons the whole unit.
    ///
    /// The only pre-existing cell this touches is the delazified function,
    /// and it is linked to its new script in the very last step, so a failed
    /// delazification leaves it exactly as it was.
    pub fn instantiate<H: Heap>(
        &self,
        input: &CompilationInput<H::Ptr>,
        atom_cache: &mut CompilationAtomCache<H::Ptr>,
        heap: &mut H,
    ) -> Result<CompilationGcOutput<H::Ptr>> {
        self.check_target(&input.target)?;
        debug!(
            target = input.target.name(),
            scripts = self.scripts.len(),
            scopes = self.scopes.len(),
            "instantiating stencil"
        );

        atom_cache.instantiate_all(&self.parser_atoms, heap)?;
        for atom in self.atom_references().filter(|atom| atom.is_well_known_atom_id()) {
            atom_cache.ensure(atom, &self.parser_atoms, heap)?;
        }

        let mut output = CompilationGcOutput::with_capacity(self.scripts.len(), self.scopes.len());
        self.instantiate_functions(input, atom_cache, heap, &mut output)?;
        trace!(count = output.functions.iter().flatten().count(), "functions instantiated");

        let input_enclosing = input.target.enclosing_scope();
        for (scope, data) in self.scopes.iter().zip(&self.scope_data) {
            let ptr = scope.create_scope(data, input_enclosing, &output, atom_cache, heap)?;
            output.scopes.push(ptr);
        }
        trace!(count = output.scopes.len(), "scopes instantiated");

        self.instantiate_scripts(atom_cache, heap, &mut output)?;
        self.link_lazy_enclosing_scopes(heap, &output)?;

        if let Some(metadata) = &self.module_metadata {
            let module = heap.new_module()?;
            let top_level_things = self.gc_things_for(ScriptIndex::TOP_LEVEL);
            let function_decls = metadata
                .function_decls
                .iter()
                .map(|decl| {
                    let thing = top_level_things[decl.index()];
                    debug_assert!(thing.is_function());
                    output.functions[thing.to_function().index()].ok_or(
                        StencilError::DanglingIndex {
                            kind: "function",
                            index: thing.to_function().0,
                        },
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            metadata.init_module(atom_cache, heap, module, function_decls)?;
            output.module = Some(module);
        }

        output.script = output.scripts[ScriptIndex::TOP_LEVEL.index()];
        self.attach_function_scripts(heap, &output)?;
        debug!(target = input.target.name(), "stencil instantiated");
        Ok(output)
    }

    /// Every atom the stencil refers to, with repeats.
    fn atom_references(&self) -> impl Iterator<Item = TaggedParserAtomIndex> + '_ {
        let scripts = self.scripts.iter().map(|script| script.function_atom);
        let things = self
            .gc_things
            .iter()
            .filter(|thing| thing.is_atom())
            .map(|thing| thing.to_atom());
        let bindings = self
            .scope_data
            .iter()
            .flat_map(|data| data.bindings.iter().map(|binding| binding.name));
        let regexps = self.regexps.iter().map(|regexp| regexp.atom());
        let literals = self.obj_literals.iter().flat_map(|literal| literal.atoms());
        let module = self
            .module_metadata
            .iter()
            .flat_map(|metadata| metadata.entries())
            .flat_map(|entry| entry.atoms());
        scripts
            .chain(things)
            .chain(bindings)
            .chain(regexps)
            .chain(literals)
            .chain(module)
    }

    fn instantiate_functions<H: Heap>(
        &self,
        input: &CompilationInput<H::Ptr>,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
        output: &mut CompilationGcOutput<H::Ptr>,
    ) -> Result<()> {
        for (i, script) in self.scripts.iter().enumerate() {
            let function = match input.target {
                TargetContext::Delazification { function, .. } if i == ScriptIndex::TOP_LEVEL.index() => {
                    Some(function)
                }
                _ if script.is_function() => Some(heap.new_function(RuntimeFunction {
                    name: atom_cache.get_optional(script.function_atom)?,
                    flags: script.function_flags,
                    nargs: script.nargs,
                })?),
                _ => None,
            };
            output.functions.push(function);
        }
        Ok(())
    }

    fn instantiate_scripts<H: Heap>(
        &self,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
        output: &mut CompilationGcOutput<H::Ptr>,
    ) -> Result<()> {
        for (i, script) in self.scripts.iter().enumerate() {
            if script.is_function() && !script.function_flags.has_base_script() {
                output.scripts.push(None);
                continue;
            }

            let things = &self.gc_things[script.gc_things_range()];
            let mut gc_things = Vec::with_capacity(things.len());
            for &thing in things {
                gc_things.push(self.materialize_thing(thing, atom_cache, heap, output)?);
            }

            let shared_data = self.shared_data[i].as_ref();
            let ptr = heap.new_script(RuntimeScript {
                function: output.functions[i],
                immutable_flags: script.immutable_flags,
                extent: script.extent,
                gc_things,
                bytecode: shared_data.map(|data| data.bytecode.clone()),
                nfixed: shared_data.map_or(0, |data| data.nfixed),
                member_initializers: script
                    .member_initializers_opt()
                    .map(|m| m.num_member_initializers),
                allow_relazify: script.allow_relazify(),
            })?;
            output.scripts.push(Some(ptr));
        }
        trace!(count = output.scripts.iter().flatten().count(), "scripts instantiated");
        Ok(())
    }

    fn materialize_thing<H: Heap>(
        &self,
        thing: TaggedScriptThingIndex,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
        output: &CompilationGcOutput<H::Ptr>,
    ) -> Result<Option<H::Ptr>> {
        let ptr = match thing.tag() {
            ScriptThingKind::Null => return Ok(None),
            ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
                atom_cache.get_existing(thing.to_atom())?
            }
            ScriptThingKind::BigInt => self.bigints[thing.to_bigint().index()].create_bigint(heap)?,
            ScriptThingKind::ObjLiteral => {
                self.obj_literals[thing.to_obj_literal().index()].create_object(atom_cache, heap)?
            }
            ScriptThingKind::RegExp => {
                self.regexps[thing.to_regexp().index()].create_regexp(atom_cache, heap)?
            }
            ScriptThingKind::Scope => output.scopes[thing.to_scope().index()],
            ScriptThingKind::Function => {
                let index = thing.to_function();
                output.functions[index.index()].ok_or(StencilError::DanglingIndex {
                    kind: "function",
                    index: index.0,
                })?
            }
            ScriptThingKind::EmptyGlobalScope => heap.empty_global_scope()?,
        };
        Ok(Some(ptr))
    }

    /// Give every function its script, inner functions first. The top-level
    /// function of a delazification is the last one linked.
    fn attach_function_scripts<H: Heap>(
        &self,
        heap: &mut H,
        output: &CompilationGcOutput<H::Ptr>,
    ) -> Result<()> {
        for (function, script) in output.functions.iter().zip(&output.scripts).rev() {
            if let (Some(function), Some(script)) = (function, script) {
                heap.set_function_script(*function, *script)?;
            }
        }
        Ok(())
    }

    /// Lazy inner functions learn their enclosing scope only after the whole
    /// unit exists. Functions no closure was emitted for stay unlinked.
    fn link_lazy_enclosing_scopes<H: Heap>(
        &self,
        heap: &mut H,
        output: &CompilationGcOutput<H::Ptr>,
    ) -> Result<()> {
        let mut linked = 0usize;
        for (i, script) in self.scripts.iter().enumerate().skip(1) {
            let Some(scope) = script.lazy_function_enclosing_scope_opt() else {
                continue;
            };
            if !script.was_function_emitted() {
                continue;
            }
            if let Some(function) = output.functions[i] {
                heap.set_lazy_enclosing_scope(function, output.scopes[scope.index()])?;
                linked += 1;
            }
        }
        trace!(linked, "lazy enclosing scopes linked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::WellKnownAtom;
    use crate::heap::{Cell, HeapLimits, ObjectHeap};
    use crate::literal::{ObjLiteralFlags, ObjLiteralKey, ObjLiteralValue, RegExpFlags};
    use crate::scope::{BindingLayout, BindingName, ScopeKind};
    use crate::script::FunctionFlags;

    fn global_state() -> CompilationState {
        let mut state = CompilationState::new();
        state
            .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Script, SourceExtent::default())
            .unwrap();
        state
    }

    fn function_script(state: &mut CompilationState, name: &str) -> ScriptIndex {
        let atom = state.parser_atoms_mut().intern_str(name).unwrap();
        state
            .push_script(ScriptStencil::function(
                atom,
                FunctionFlags::INTERPRETED_NORMAL,
                0,
                ImmutableScriptFlags::EMPTY,
                SourceExtent::default(),
            ))
            .unwrap()
    }

    #[test]
    fn frozen_stencils_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompilationStencil>();
        assert_send_sync::<CompilationState>();
    }

    #[test]
    fn options_shape_top_level_flags() {
        let options = CompilationOptions {
            force_strict: true,
            is_run_once: true,
            ..Default::default()
        };
        let flags = options.top_level_flags(TopLevelKind::Eval);
        assert!(flags.contains(ImmutableScriptFlags::IS_FOR_EVAL | ImmutableScriptFlags::STRICT));
        assert!(flags.contains(ImmutableScriptFlags::TREAT_AS_RUN_ONCE));
        assert!(!flags.contains(ImmutableScriptFlags::IS_MODULE));
        assert!(
            CompilationOptions::default()
                .top_level_flags(TopLevelKind::Module)
                .contains(ImmutableScriptFlags::IS_MODULE)
        );
    }

    #[test]
    fn freeze_requires_a_top_level_script() {
        assert!(matches!(
            CompilationState::new().freeze(),
            Err(StencilError::MissingTopLevelScript)
        ));
    }

    #[test]
    fn module_metadata_must_match_the_top_level_script() {
        let mut state = global_state();
        state.set_module_metadata(StencilModuleMetadata::default()).unwrap();
        assert!(matches!(state.freeze(), Err(StencilError::ModuleMetadataMismatch)));

        let mut state = CompilationState::new();
        state
            .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Module, SourceExtent::default())
            .unwrap();
        assert!(matches!(state.freeze(), Err(StencilError::ModuleMetadataMismatch)));
    }

    #[test]
    fn scripts_cannot_be_functions_and_modules() {
        let mut state = global_state();
        let result = state.push_script(ScriptStencil::function(
            TaggedParserAtomIndex::null(),
            FunctionFlags::INTERPRETED_NORMAL,
            0,
            ImmutableScriptFlags::IS_MODULE,
            SourceExtent::default(),
        ));
        assert!(matches!(result, Err(StencilError::FunctionAndModule(1))));

        let result = state.push_script(ScriptStencil::function(
            TaggedParserAtomIndex::null(),
            FunctionFlags::LAMBDA,
            0,
            ImmutableScriptFlags::EMPTY,
            SourceExtent::default(),
        ));
        assert!(matches!(result, Err(StencilError::InvalidFunctionFlags(_))));
    }

    #[test]
    fn gc_things_are_written_once_and_must_exist() {
        let mut state = global_state();
        let function = function_script(&mut state, "f");
        assert!(matches!(
            state.set_gc_things(ScriptIndex::TOP_LEVEL, &[TaggedScriptThingIndex::scope(ScopeIndex(0))]),
            Err(StencilError::DanglingIndex { kind: "scope", .. })
        ));
        state
            .set_gc_things(ScriptIndex::TOP_LEVEL, &[TaggedScriptThingIndex::function(function)])
            .unwrap();
        assert!(matches!(
            state.set_gc_things(ScriptIndex::TOP_LEVEL, &[TaggedScriptThingIndex::null()]),
            Err(StencilError::GcThingsAlreadySet(0))
        ));
        let stencil = state.freeze().unwrap();
        assert_eq!(
            stencil.gc_things_for(ScriptIndex::TOP_LEVEL),
            &[TaggedScriptThingIndex::function(function)]
        );
    }

    #[test]
    fn an_empty_gc_things_span_is_still_written_once() {
        let mut state = global_state();
        state.set_gc_things(ScriptIndex::TOP_LEVEL, &[]).unwrap();
        assert!(!state.scripts()[0].has_gc_things());
        assert!(state.scripts()[0].gc_things_assigned());
        assert!(matches!(
            state.set_gc_things(ScriptIndex::TOP_LEVEL, &[TaggedScriptThingIndex::null()]),
            Err(StencilError::GcThingsAlreadySet(0))
        ));
        let stencil = state.freeze().unwrap();
        assert!(stencil.gc_things_for(ScriptIndex::TOP_LEVEL).is_empty());
    }

    #[test]
    fn function_scopes_must_belong_to_function_scripts() {
        let function_data = || {
            ParserScopeData::new(
                BindingLayout::Function {
                    has_parameter_exprs: false,
                    non_positional_formal_start: 0,
                    var_start: 0,
                },
                Vec::new(),
            )
        };

        let mut state = global_state();
        assert!(matches!(
            crate::scope::ScopeStencil::create_for_function_scope(
                &mut state,
                function_data(),
                false,
                ScriptIndex::TOP_LEVEL,
                false,
                None,
            ),
            Err(StencilError::NotAFunction(0))
        ));
        assert!(state.scopes().is_empty());

        // Scopes appended without going through the creation functions are
        // caught on freeze.
        let scope = crate::scope::ScopeStencil::new(
            ScopeKind::Function,
            None,
            0,
            None,
            Some(ScriptIndex::TOP_LEVEL),
            false,
        )
        .unwrap();
        state.append_scope(scope, function_data()).unwrap();
        assert!(matches!(state.freeze(), Err(StencilError::NotAFunction(0))));
    }

    #[test]
    fn literals_are_materialized_into_the_script() {
        let mut state = global_state();
        let pattern = state.parser_atoms_mut().intern_str("a+b").unwrap();
        let key = state.parser_atoms_mut().intern_str("k").unwrap();
        let regexp = state.push_regexp(RegExpStencil::new(pattern, RegExpFlags::GLOBAL)).unwrap();
        let bigint = state
            .push_bigint(BigIntStencil::new(utf16!("0x10")).unwrap())
            .unwrap();
        let mut literal = ObjLiteralStencil::new(ObjLiteralFlags::EMPTY);
        literal.push(ObjLiteralKey::Atom(key), ObjLiteralValue::Int32(7));
        let literal = state.push_obj_literal(literal).unwrap();
        state
            .set_gc_things(
                ScriptIndex::TOP_LEVEL,
                &[
                    TaggedScriptThingIndex::regexp(regexp),
                    TaggedScriptThingIndex::bigint(bigint),
                    TaggedScriptThingIndex::obj_literal(literal),
                    TaggedScriptThingIndex::null(),
                    TaggedScriptThingIndex::atom(pattern),
                ],
            )
            .unwrap();
        let stencil = state.freeze().unwrap();

        let mut heap = ObjectHeap::default();
        let output = stencil
            .instantiate(&CompilationInput::global(), &mut CompilationAtomCache::new(), &mut heap)
            .unwrap();
        let Some(Cell::Script(script)) = output.script.and_then(|s| heap.get(s)) else {
            panic!("top-level script missing");
        };
        assert_eq!(script.gc_things.len(), 5);
        assert!(matches!(
            heap.get(script.gc_things[0].unwrap()),
            Some(Cell::RegExp { flags, .. }) if *flags == RegExpFlags::GLOBAL
        ));
        assert_eq!(
            heap.get(script.gc_things[1].unwrap()),
            Some(&Cell::BigInt(num_bigint::BigInt::from(16)))
        );
        assert!(matches!(heap.get(script.gc_things[2].unwrap()), Some(Cell::Object(_))));
        assert_eq!(script.gc_things[3], None);
        assert_eq!(heap.atom_chars(script.gc_things[4].unwrap()), Some(utf16!("a+b")));
    }

    #[test]
    fn allocation_failure_aborts_the_whole_instantiation() {
        let mut state = global_state();
        function_script(&mut state, "f");
        let stencil = state.freeze().unwrap();
        for max_cells in 0..3 {
            let mut heap = ObjectHeap::new(HeapLimits { max_cells });
            let result = stencil.instantiate(
                &CompilationInput::global(),
                &mut CompilationAtomCache::new(),
                &mut heap,
            );
            assert!(matches!(result, Err(StencilError::Alloc(_))), "max_cells {max_cells}");
        }
    }

    #[test]
    fn targets_must_fit_the_stencil() {
        let stencil = global_state().freeze().unwrap();
        let mut heap = ObjectHeap::default();
        let scope = heap.empty_global_scope().unwrap();
        for input in [CompilationInput::module(), CompilationInput::eval(scope)] {
            assert!(matches!(
                stencil.instantiate(&input, &mut CompilationAtomCache::new(), &mut heap),
                Err(StencilError::TargetMismatch(_))
            ));
        }
    }

    #[test]
    fn well_known_atoms_resolve_during_instantiation() {
        let mut state = global_state();
        let constructor = TaggedParserAtomIndex::well_known(WellKnownAtom::Constructor);
        let length = TaggedParserAtomIndex::well_known(WellKnownAtom::Length);
        let function = state
            .push_script(ScriptStencil::function(
                constructor,
                FunctionFlags::INTERPRETED_CLASS_CONSTRUCTOR,
                0,
                ImmutableScriptFlags::EMPTY,
                SourceExtent::default(),
            ))
            .unwrap();
        state
            .set_gc_things(
                ScriptIndex::TOP_LEVEL,
                &[
                    TaggedScriptThingIndex::function(function),
                    TaggedScriptThingIndex::atom(length),
                ],
            )
            .unwrap();
        let stencil = state.freeze().unwrap();

        let mut heap = ObjectHeap::default();
        let output = stencil
            .instantiate(&CompilationInput::global(), &mut CompilationAtomCache::new(), &mut heap)
            .unwrap();
        let Some(Cell::Script(top)) = heap.get(output.script.unwrap()) else {
            panic!("top-level script missing");
        };
        assert_eq!(heap.atom_chars(top.gc_things[1].unwrap()), Some(utf16!("length")));
        let Some(Cell::Function { function, .. }) = heap.get(output.functions[function.index()].unwrap())
        else {
            panic!("constructor missing");
        };
        assert_eq!(heap.atom_chars(function.name.unwrap()), Some(utf16!("constructor")));
    }

    #[test]
    fn only_emitted_lazy_functions_are_linked_to_their_scope() {
        let mut state = global_state();
        let emitted = function_script(&mut state, "emitted");
        let dropped = function_script(&mut state, "dropped");
        let name = state.scripts()[emitted.index()].function_atom;
        let global = crate::scope::ScopeStencil::create_for_global_scope(
            &mut state,
            ScopeKind::Global,
            ParserScopeData::new(
                BindingLayout::Global { let_start: 1, const_start: 1 },
                vec![BindingName::new(name)],
            ),
        )
        .unwrap();
        for index in [emitted, dropped] {
            state
                .script_mut(index)
                .unwrap()
                .set_lazy_function_enclosing_scope_index(global);
        }
        state.script_mut(emitted).unwrap().set_was_function_emitted();
        let stencil = state.freeze().unwrap();

        let mut heap = ObjectHeap::default();
        let output = stencil
            .instantiate(&CompilationInput::global(), &mut CompilationAtomCache::new(), &mut heap)
            .unwrap();
        let lazy_scope = |index: ScriptIndex| match heap.get(output.functions[index.index()].unwrap()) {
            Some(Cell::Function { lazy_enclosing_scope, .. }) => *lazy_enclosing_scope,
            other => panic!("expected a function, got {other:?}"),
        };
        assert_eq!(lazy_scope(emitted), Some(output.scopes[global.index()]));
        assert_eq!(lazy_scope(dropped), None);
    }
}
