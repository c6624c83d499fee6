/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Tree dump of a frozen stencil, for debugging the front end.
//!
//! Output goes to stdout via `println!`, or into a string for tests.

use crate::atom::TaggedParserAtomIndex;
use crate::compilation::CompilationStencil;
use crate::index::{ScopeIndex, ScriptIndex};
use crate::literal::{ObjLiteralKey, ObjLiteralStencil, ObjLiteralValue};
use crate::module::{StencilModuleEntry, StencilModuleMetadata};
use crate::scope::{BindingLocation, ParserScopeData, ScopeStencil};
use crate::script::ScriptStencil;
use crate::tagged::{ScriptThingKind, TaggedScriptThingIndex};
use std::cell::RefCell;
use std::fmt::Write;

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const MAGENTA: &str = "\x1b[35m";
const WHITE_BOLD: &str = "\x1b[1;37m";

/// Where the next line of the stencil tree goes: its indentation, whether it
/// closes its parent's list of entries, and the stencil that index
/// references in the line are resolved against.
struct DumpState<'a> {
    prefix: String,
    is_last: bool,
    is_root: bool,
    use_color: bool,
    output: Option<&'a RefCell<String>>,
    stencil: &'a CompilationStencil,
}

/// Emit one entry line, with the branch connector unless it is the
/// `CompilationStencil` root.
fn emit_line(state: &DumpState, text: &str) {
    let line = if state.is_root {
        text.to_string()
    } else {
        let connector = if state.is_last { "\u{2514}\u{2500} " } else { "\u{251c}\u{2500} " };
        format!("{}{}{}", state.prefix, paint(state, DIM, connector), text)
    };
    match state.output {
        Some(output) => {
            let _ = writeln!(output.borrow_mut(), "{line}");
        }
        None => println!("{line}"),
    }
}

/// State for the entries nested under the current one, e.g. the gc things
/// of a script or the bindings of a scope.
fn nested<'a>(state: &DumpState<'a>, is_last: bool) -> DumpState<'a> {
    let prefix = if state.is_root {
        String::new()
    } else {
        let rail = if state.is_last { "   " } else { "\u{2502}  " };
        format!("{}{}", state.prefix, paint(state, DIM, rail))
    };
    DumpState {
        prefix,
        is_last,
        is_root: false,
        use_color: state.use_color,
        output: state.output,
        stencil: state.stencil,
    }
}

fn paint(state: &DumpState, color: &str, text: &str) -> String {
    if state.use_color {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Section and entry titles ("Scripts", "Scopes", ...).
fn color_node_name(state: &DumpState, name: &str) -> String {
    paint(state, WHITE_BOLD, name)
}

/// Atom text, always quoted.
fn color_string(state: &DumpState, value: &str) -> String {
    paint(state, GREEN, &format!("\"{value}\""))
}

fn color_number_str(state: &DumpState, value: &str) -> String {
    paint(state, MAGENTA, value)
}

fn color_label(state: &DumpState, label: &str) -> String {
    paint(state, DIM, label)
}

/// A reference into one of the stencil's arenas, such as `[scope:2]`.
fn color_index(state: &DumpState, kind: &str, index: u32) -> String {
    paint(state, CYAN, &format!("[{kind}:{index}]"))
}

fn color_flag(state: &DumpState, flag: &str) -> String {
    paint(state, DIM, &format!("[{flag}]"))
}

/// Scope, binding and function kinds, such as `(Let)`.
fn color_kind(state: &DumpState, kind: &str) -> String {
    format!("({})", paint(state, YELLOW, kind))
}

fn flags_string<'a>(state: &DumpState, names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|name| color_flag(state, &name.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn atom_string(state: &DumpState, atom: TaggedParserAtomIndex) -> String {
    match state.stencil.parser_atoms().chars(atom) {
        Some(chars) => color_string(state, &String::from_utf16_lossy(chars)),
        None if atom.is_null() => color_label(state, "<null>"),
        None => color_label(state, &format!("<bad atom {:#010x}>", atom.raw())),
    }
}

/// Prints a `name (count)` header followed by one child per item.
fn dump_section<T>(
    state: &DumpState,
    name: &str,
    items: &[T],
    mut dump_item: impl FnMut(usize, &T, &DumpState),
) {
    emit_line(
        state,
        &format!(
            "{} {}",
            color_node_name(state, name),
            color_label(state, &format!("({})", items.len()))
        ),
    );
    for (i, item) in items.iter().enumerate() {
        dump_item(i, item, &nested(state, i + 1 == items.len()));
    }
}

// ============================================================================
// Entry point
// ============================================================================

pub fn dump_stencil(stencil: &CompilationStencil, use_color: bool) {
    let state = DumpState {
        prefix: String::new(),
        is_last: false,
        is_root: true,
        use_color,
        output: None,
        stencil,
    };
    dump_root(&state);
    println!();
}

pub fn dump_stencil_to_string(stencil: &CompilationStencil) -> String {
    let output = RefCell::new(String::new());
    let state = DumpState {
        prefix: String::new(),
        is_last: false,
        is_root: true,
        use_color: false,
        output: Some(&output),
        stencil,
    };
    dump_root(&state);
    output.into_inner()
}

fn dump_root(state: &DumpState) {
    let stencil = state.stencil;
    emit_line(state, &color_node_name(state, "CompilationStencil"));

    let has_module = stencil.module_metadata().is_some();

    let atoms_state = nested(state, false);
    let atoms: Vec<TaggedParserAtomIndex> = (0..stencil.parser_atoms().len())
        .map(|i| TaggedParserAtomIndex::parser_atom(crate::index::ParserAtomIndex(i as u32)))
        .collect();
    dump_section(&atoms_state, "Atoms", &atoms, |i, atom, s| {
        emit_line(
            s,
            &format!("{} {}", color_index(s, "atom", i as u32), atom_string(s, *atom)),
        );
    });

    dump_section(&nested(state, false), "Scripts", stencil.scripts(), |i, script, s| {
        dump_script(ScriptIndex(i as u32), script, s);
    });

    dump_section(&nested(state, false), "Scopes", stencil.scopes(), |i, scope, s| {
        dump_scope(ScopeIndex(i as u32), scope, &stencil.scope_data()[i], s);
    });

    dump_section(&nested(state, false), "RegExps", stencil.regexps(), |i, regexp, s| {
        emit_line(
            s,
            &format!(
                "{} /{}/{}",
                color_index(s, "regexp", i as u32),
                atom_string(s, regexp.atom()),
                regexp.flags().to_flag_string()
            ),
        );
    });

    dump_section(&nested(state, false), "BigInts", stencil.bigints(), |i, bigint, s| {
        emit_line(
            s,
            &format!(
                "{} {}n",
                color_index(s, "bigint", i as u32),
                color_number_str(s, &String::from_utf16_lossy(bigint.digits()))
            ),
        );
    });

    dump_section(
        &nested(state, !has_module),
        "ObjLiterals",
        stencil.obj_literals(),
        |i, literal, s| dump_obj_literal(i as u32, literal, s),
    );

    if let Some(metadata) = stencil.module_metadata() {
        dump_module(metadata, &nested(state, true));
    }
}

// ============================================================================
// Scripts
// ============================================================================

fn dump_script(index: ScriptIndex, script: &ScriptStencil, state: &DumpState) {
    let stencil = state.stencil;
    let mut header = format!(
        "{} {}",
        color_index(state, "script", index.0),
        color_node_name(state, if script.is_function() { "Function" } else { "TopLevel" })
    );
    if script.is_function() {
        let _ = write!(header, " {}", atom_string(state, script.function_atom));
        if let Some(kind) = script.function_flags.kind() {
            let _ = write!(header, " {}", color_kind(state, &format!("{:?}", kind)));
        }
        let _ = write!(header, " nargs={}", color_number_str(state, &script.nargs.to_string()));
    }
    let flags = flags_string(state, script.flags().names());
    if !flags.is_empty() {
        let _ = write!(header, " {}", flags);
    }
    emit_line(state, &header);

    let extent = script.extent;
    let shared_data = stencil.shared_data(index);
    let gc_things = stencil.gc_things_for(index);

    let mut lines = Vec::new();
    if !script.immutable_flags.is_empty() {
        lines.push(format!(
            "{} {}",
            color_label(state, "immutable"),
            flags_string(state, script.immutable_flags.names())
        ));
    }
    if script.is_function() {
        lines.push(format!(
            "{} {}",
            color_label(state, "function flags"),
            flags_string(state, script.function_flags.names())
        ));
    }
    lines.push(format!(
        "{} {}..{} {}..{} @{}:{}",
        color_label(state, "extent"),
        extent.source_start,
        extent.source_end,
        extent.to_string_start,
        extent.to_string_end,
        extent.lineno,
        extent.column
    ));
    if let Some(data) = shared_data {
        lines.push(format!(
            "{} {} bytes, nfixed={}",
            color_label(state, "bytecode"),
            color_number_str(state, &data.bytecode.len().to_string()),
            color_number_str(state, &data.nfixed.to_string())
        ));
    }
    if let Some(member_initializers) = script.member_initializers_opt() {
        lines.push(format!(
            "{} {}",
            color_label(state, "member initializers"),
            color_number_str(state, &member_initializers.num_member_initializers.to_string())
        ));
    }
    if let Some(scope) = script.lazy_function_enclosing_scope_opt() {
        lines.push(format!(
            "{} {}",
            color_label(state, "lazy enclosing scope"),
            color_index(state, "scope", scope.0)
        ));
    }

    let count = lines.len();
    for (i, line) in lines.iter().enumerate() {
        emit_line(&nested(state, i + 1 == count && gc_things.is_empty()), line);
    }
    if !gc_things.is_empty() {
        dump_section(&nested(state, true), "GcThings", gc_things, |_, thing, s| {
            dump_gc_thing(*thing, s);
        });
    }
}

fn dump_gc_thing(thing: TaggedScriptThingIndex, state: &DumpState) {
    let text = match thing.tag() {
        ScriptThingKind::Null => color_label(state, "null"),
        ScriptThingKind::ParserAtomIndex | ScriptThingKind::WellKnown => {
            atom_string(state, thing.to_atom())
        }
        ScriptThingKind::BigInt => color_index(state, "bigint", thing.to_bigint().0),
        ScriptThingKind::ObjLiteral => color_index(state, "object", thing.to_obj_literal().0),
        ScriptThingKind::RegExp => color_index(state, "regexp", thing.to_regexp().0),
        ScriptThingKind::Scope => color_index(state, "scope", thing.to_scope().0),
        ScriptThingKind::Function => color_index(state, "script", thing.to_function().0),
        ScriptThingKind::EmptyGlobalScope => color_label(state, "empty global scope"),
    };
    emit_line(state, &text);
}

// ============================================================================
// Scopes
// ============================================================================

fn dump_scope(index: ScopeIndex, scope: &ScopeStencil, data: &ParserScopeData, state: &DumpState) {
    let mut header = format!(
        "{} {}",
        color_index(state, "scope", index.0),
        color_node_name(state, &format!("{:?}", scope.kind()))
    );
    match scope.enclosing_opt() {
        Some(enclosing) => {
            let _ = write!(header, " in {}", color_index(state, "scope", enclosing.0));
        }
        None => {
            let _ = write!(header, " {}", color_flag(state, "outermost"));
        }
    }
    if let Some(function) = scope.function_index() {
        let _ = write!(header, " of {}", color_index(state, "script", function.0));
    }
    if scope.is_arrow() {
        let _ = write!(header, " {}", color_flag(state, "arrow"));
    }
    let _ = write!(
        header,
        " first_frame_slot={}",
        color_number_str(state, &scope.first_frame_slot().to_string())
    );
    if let Some(slots) = scope.num_environment_slots_opt() {
        let _ = write!(
            header,
            " environment_slots={}",
            color_number_str(state, &slots.to_string())
        );
    }
    emit_line(state, &header);

    let resolved = data.resolved();
    let count = data.bindings.len();
    for (i, binding) in data.bindings.iter().enumerate() {
        let s = nested(state, i + 1 == count);
        let mut text = atom_string(&s, binding.name);
        if let Some(resolved) = resolved.get(i) {
            let _ = write!(
                text,
                " {} {}",
                color_kind(&s, &format!("{:?}", resolved.kind)),
                location_string(&s, resolved.location)
            );
        }
        if binding.closed_over {
            let _ = write!(text, " {}", color_flag(&s, "closed over"));
        }
        if binding.is_top_level_function {
            let _ = write!(text, " {}", color_flag(&s, "top-level function"));
        }
        emit_line(&s, &text);
    }
}

fn location_string(state: &DumpState, location: BindingLocation) -> String {
    match location {
        BindingLocation::Global => color_flag(state, "global"),
        BindingLocation::Argument(slot) => color_index(state, "argument", u32::from(slot)),
        BindingLocation::Frame(slot) => color_index(state, "frame", slot),
        BindingLocation::Environment(slot) => color_index(state, "environment", slot),
        BindingLocation::Import => color_flag(state, "import"),
        BindingLocation::NamedLambdaCallee => color_flag(state, "callee"),
    }
}

// ============================================================================
// Literals and modules
// ============================================================================

fn dump_obj_literal(index: u32, literal: &ObjLiteralStencil, state: &DumpState) {
    let mut header = color_index(state, "object", index);
    let flags = flags_string(state, literal.flags().names());
    if !flags.is_empty() {
        let _ = write!(header, " {}", flags);
    }
    emit_line(state, &header);

    let count = literal.properties().len();
    for (i, property) in literal.properties().iter().enumerate() {
        let s = nested(state, i + 1 == count);
        let key = match property.key {
            ObjLiteralKey::Atom(atom) => atom_string(&s, atom),
            ObjLiteralKey::ArrayIndex(index) => color_number_str(&s, &index.to_string()),
        };
        let value = match property.value {
            ObjLiteralValue::Undefined => color_label(&s, "undefined"),
            ObjLiteralValue::Null => color_label(&s, "null"),
            ObjLiteralValue::Bool(value) => color_number_str(&s, &value.to_string()),
            ObjLiteralValue::Int32(value) => color_number_str(&s, &value.to_string()),
            ObjLiteralValue::Double(value) => color_number_str(&s, &value.to_string()),
            ObjLiteralValue::Atom(atom) => atom_string(&s, atom),
        };
        emit_line(&s, &format!("{}: {}", key, value));
    }
}

fn dump_module(metadata: &StencilModuleMetadata, state: &DumpState) {
    let mut header = color_node_name(state, "Module");
    if metadata.is_async {
        let _ = write!(header, " {}", color_flag(state, "async"));
    }
    emit_line(state, &header);

    let tables: [(&str, &[StencilModuleEntry]); 5] = [
        ("RequestedModules", &metadata.requested_modules),
        ("ImportEntries", &metadata.import_entries),
        ("LocalExportEntries", &metadata.local_export_entries),
        ("IndirectExportEntries", &metadata.indirect_export_entries),
        ("StarExportEntries", &metadata.star_export_entries),
    ];
    for (name, entries) in tables {
        dump_section(&nested(state, false), name, entries, |_, entry, s| {
            dump_module_entry(entry, s);
        });
    }
    let decls: Vec<u32> = metadata.function_decls.iter().map(|decl| decl.0).collect();
    dump_section(&nested(state, true), "FunctionDecls", &decls, |_, decl, s| {
        emit_line(s, &color_index(s, "gc thing", *decl));
    });
}

fn dump_module_entry(entry: &StencilModuleEntry, state: &DumpState) {
    let fields = [
        ("specifier", entry.specifier),
        ("local", entry.local_name),
        ("import", entry.import_name),
        ("export", entry.export_name),
    ];
    let mut text = fields
        .iter()
        .filter(|(_, atom)| !atom.is_null())
        .map(|(label, atom)| format!("{}={}", color_label(state, label), atom_string(state, *atom)))
        .collect::<Vec<_>>()
        .join(" ");
    if entry.line != 0 {
        let _ = write!(text, " @{}:{}", entry.line, entry.column);
    }
    emit_line(state, &text);
}
