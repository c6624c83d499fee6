/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Stencil builders shared by the integration tests.

#![allow(dead_code)]

use libjs_stencil::index::GcThingIndex;
use libjs_stencil::module::{StencilModuleEntry, StencilModuleMetadata};
use libjs_stencil::scope::{BindingLayout, BindingName, ParserScopeData, ScopeKind, ScopeStencil};
use libjs_stencil::script::{
    FunctionFlags, ImmutableScriptFlags, ScriptStencil, SharedScriptData, SourceExtent,
};
use libjs_stencil::{
    CompilationOptions, CompilationState, CompilationStencil, TaggedParserAtomIndex,
    TaggedScriptThingIndex, TopLevelKind,
};
use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness. Use `RUST_LOG` to see them.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn extent(start: u32, end: u32) -> SourceExtent {
    SourceExtent {
        source_start: start,
        source_end: end,
        to_string_start: start,
        to_string_end: end,
        lineno: 1,
        column: start,
    }
}

fn atom(state: &mut CompilationState, name: &str) -> TaggedParserAtomIndex {
    state.parser_atoms_mut().intern_str(name).unwrap()
}

/// ```js
/// function f(x) { var y; return () => x; }
/// ```
///
/// Script 0 is the top level, script 1 is `f`, script 2 is the lazy arrow.
/// Scope 0 is the global scope, scope 1 the function scope of `f`.
pub fn global_script() -> CompilationStencil {
    let mut state = CompilationState::new();
    let top = state
        .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Script, extent(0, 64))
        .unwrap();
    let f = atom(&mut state, "f");
    let g = atom(&mut state, "g");
    let x = atom(&mut state, "x");
    let y = atom(&mut state, "y");

    let global = ScopeStencil::create_for_global_scope(
        &mut state,
        ScopeKind::Global,
        ParserScopeData::new(
            BindingLayout::Global {
                let_start: 1,
                const_start: 1,
            },
            vec![BindingName {
                is_top_level_function: true,
                ..BindingName::new(f)
            }],
        ),
    )
    .unwrap();

    let outer = state
        .push_script(ScriptStencil::function(
            f,
            FunctionFlags::INTERPRETED_NORMAL,
            1,
            ImmutableScriptFlags::HAS_INNER_FUNCTIONS,
            extent(0, 60),
        ))
        .unwrap();
    let function_scope = ScopeStencil::create_for_function_scope(
        &mut state,
        ParserScopeData::new(
            BindingLayout::Function {
                has_parameter_exprs: false,
                non_positional_formal_start: 1,
                var_start: 1,
            },
            vec![BindingName::closed_over(x), BindingName::new(y)],
        ),
        false,
        outer,
        false,
        Some(global),
    )
    .unwrap();

    let inner = state
        .push_script(ScriptStencil::function(
            g,
            FunctionFlags::INTERPRETED_LAMBDA_ARROW,
            0,
            ImmutableScriptFlags::EMPTY,
            extent(30, 50),
        ))
        .unwrap();
    let arrow = state.script_mut(inner).unwrap();
    arrow.set_lazy_function_enclosing_scope_index(function_scope);
    arrow.set_was_function_emitted();
    state.script_mut(outer).unwrap().set_was_function_emitted();

    state
        .set_gc_things(
            top,
            &[
                TaggedScriptThingIndex::function(outer),
                TaggedScriptThingIndex::scope(global),
            ],
        )
        .unwrap();
    state
        .set_gc_things(
            outer,
            &[
                TaggedScriptThingIndex::scope(function_scope),
                TaggedScriptThingIndex::function(inner),
                TaggedScriptThingIndex::atom(y),
            ],
        )
        .unwrap();
    state
        .set_shared_data(
            top,
            SharedScriptData {
                bytecode: vec![0x10, 0x20],
                nfixed: 0,
            },
        )
        .unwrap();
    state
        .set_shared_data(
            outer,
            SharedScriptData {
                bytecode: vec![0x30],
                nfixed: 1,
            },
        )
        .unwrap();
    state.freeze().unwrap()
}

/// The body of `function lazy(a) { ... }`, compiled on first call.
pub fn lazy_function_body() -> CompilationStencil {
    let mut state = CompilationState::new();
    let name = atom(&mut state, "lazy");
    let a = atom(&mut state, "a");
    let top = state
        .push_script(ScriptStencil::function(
            name,
            FunctionFlags::INTERPRETED_NORMAL,
            1,
            ImmutableScriptFlags::EMPTY,
            extent(0, 20),
        ))
        .unwrap();
    state.script_mut(top).unwrap().set_allow_relazify();
    let scope = ScopeStencil::create_for_function_scope(
        &mut state,
        ParserScopeData::new(
            BindingLayout::Function {
                has_parameter_exprs: false,
                non_positional_formal_start: 1,
                var_start: 1,
            },
            vec![BindingName::new(a)],
        ),
        false,
        top,
        false,
        None,
    )
    .unwrap();
    state
        .set_gc_things(top, &[TaggedScriptThingIndex::scope(scope)])
        .unwrap();
    state
        .set_shared_data(
            top,
            SharedScriptData {
                bytecode: vec![0x01],
                nfixed: 0,
            },
        )
        .unwrap();
    state.freeze().unwrap()
}

/// ```js
/// import { y as x } from "./dep.js";
/// export function f() {}
/// ```
pub fn module_script() -> CompilationStencil {
    let mut state = CompilationState::new();
    let top = state
        .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Module, extent(0, 60))
        .unwrap();
    let specifier = atom(&mut state, "./dep.js");
    let x = atom(&mut state, "x");
    let y = atom(&mut state, "y");
    let f = atom(&mut state, "f");

    let module_scope = ScopeStencil::create_for_module_scope(
        &mut state,
        ParserScopeData::new(
            BindingLayout::Module {
                var_start: 1,
                let_start: 2,
                const_start: 2,
            },
            vec![BindingName::new(x), BindingName::new(f)],
        ),
        None,
    )
    .unwrap();
    let function = state
        .push_script(ScriptStencil::function(
            f,
            FunctionFlags::INTERPRETED_NORMAL,
            0,
            ImmutableScriptFlags::STRICT,
            extent(36, 58),
        ))
        .unwrap();
    state
        .set_gc_things(
            top,
            &[
                TaggedScriptThingIndex::function(function),
                TaggedScriptThingIndex::scope(module_scope),
            ],
        )
        .unwrap();

    state
        .set_module_metadata(StencilModuleMetadata {
            requested_modules: vec![StencilModuleEntry::module_request(specifier, 1, 20).unwrap()],
            import_entries: vec![StencilModuleEntry::import_entry(specifier, x, y, 1, 9).unwrap()],
            local_export_entries: vec![StencilModuleEntry::export_as_entry(f, f, 0, 0).unwrap()],
            function_decls: vec![GcThingIndex(0)],
            ..Default::default()
        })
        .unwrap();
    state.freeze().unwrap()
}

/// `"use strict"; var v;` run through a direct eval.
pub fn strict_eval_script() -> CompilationStencil {
    let options = CompilationOptions {
        force_strict: true,
        ..Default::default()
    };
    let mut state = CompilationState::new();
    let top = state
        .push_top_level_script(&options, TopLevelKind::Eval, extent(0, 20))
        .unwrap();
    let v = atom(&mut state, "v");
    let scope = ScopeStencil::create_for_eval_scope(
        &mut state,
        ScopeKind::StrictEval,
        ParserScopeData::new(BindingLayout::Eval, vec![BindingName::new(v)]),
        None,
    )
    .unwrap();
    state
        .set_gc_things(top, &[TaggedScriptThingIndex::scope(scope)])
        .unwrap();
    state.freeze().unwrap()
}

/// ```js
/// function f(a) {}
/// ```
///
/// The smallest unit with a function scope: script 1 is `f`, and its gc
/// things are exactly its own scope, which the global scope encloses.
pub fn function_in_global_scope() -> CompilationStencil {
    let mut state = CompilationState::new();
    let top = state
        .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Script, extent(0, 16))
        .unwrap();
    let f = atom(&mut state, "f");
    let a = atom(&mut state, "a");

    let global = ScopeStencil::create_for_global_scope(
        &mut state,
        ScopeKind::Global,
        ParserScopeData::new(
            BindingLayout::Global {
                let_start: 1,
                const_start: 1,
            },
            vec![BindingName {
                is_top_level_function: true,
                ..BindingName::new(f)
            }],
        ),
    )
    .unwrap();
    let function = state
        .push_script(ScriptStencil::function(
            f,
            FunctionFlags::INTERPRETED_NORMAL,
            1,
            ImmutableScriptFlags::EMPTY,
            extent(0, 16),
        ))
        .unwrap();
    let function_scope = ScopeStencil::create_for_function_scope(
        &mut state,
        ParserScopeData::new(
            BindingLayout::Function {
                has_parameter_exprs: false,
                non_positional_formal_start: 1,
                var_start: 1,
            },
            vec![BindingName::new(a)],
        ),
        false,
        function,
        false,
        Some(global),
    )
    .unwrap();
    state.script_mut(function).unwrap().set_was_function_emitted();

    state
        .set_gc_things(
            top,
            &[
                TaggedScriptThingIndex::function(function),
                TaggedScriptThingIndex::scope(global),
            ],
        )
        .unwrap();
    state
        .set_gc_things(function, &[TaggedScriptThingIndex::scope(function_scope)])
        .unwrap();
    state.freeze().unwrap()
}

/// The body of `function outer(a) { function inner() {} }`, compiled on
/// first call with `inner` compiled eagerly alongside it.
pub fn lazy_function_with_inner() -> CompilationStencil {
    let mut state = CompilationState::new();
    let outer_name = atom(&mut state, "outer");
    let inner_name = atom(&mut state, "inner");
    let a = atom(&mut state, "a");
    let outer = state
        .push_script(ScriptStencil::function(
            outer_name,
            FunctionFlags::INTERPRETED_NORMAL,
            1,
            ImmutableScriptFlags::HAS_INNER_FUNCTIONS,
            extent(0, 40),
        ))
        .unwrap();
    let inner = state
        .push_script(ScriptStencil::function(
            inner_name,
            FunctionFlags::INTERPRETED_NORMAL,
            0,
            ImmutableScriptFlags::EMPTY,
            extent(20, 38),
        ))
        .unwrap();
    state.script_mut(inner).unwrap().set_was_function_emitted();
    let scope = ScopeStencil::create_for_function_scope(
        &mut state,
        ParserScopeData::new(
            BindingLayout::Function {
                has_parameter_exprs: false,
                non_positional_formal_start: 1,
                var_start: 1,
            },
            vec![BindingName::new(a)],
        ),
        false,
        outer,
        false,
        None,
    )
    .unwrap();
    state
        .set_gc_things(
            outer,
            &[
                TaggedScriptThingIndex::scope(scope),
                TaggedScriptThingIndex::function(inner),
            ],
        )
        .unwrap();
    state
        .set_shared_data(
            outer,
            SharedScriptData {
                bytecode: vec![0x01, 0x02],
                nfixed: 0,
            },
        )
        .unwrap();
    state
        .set_shared_data(
            inner,
            SharedScriptData {
                bytecode: vec![0x03],
                nfixed: 0,
            },
        )
        .unwrap();
    state.freeze().unwrap()
}
