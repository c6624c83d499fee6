/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! FFI bridge between stencil instantiation and the C++ heap.
//!
//! The C++ side hands Rust a table of allocation callbacks
//! (`HeapCallbacks`) plus an opaque context pointer. `FfiHeap` wraps that
//! table in the `Heap` trait so instantiation never knows which heap it is
//! talking to. Every callback that allocates returns the new cell as a
//! `void*`; nullptr means the allocation failed.
//!
//! ## FFI types
//!
//! All `FFI*` structs are `#[repr(C)]` and must match their counterparts
//! in `StencilHeap.h`. Changes to field order or types here require
//! corresponding changes on the C++ side.

use std::ffi::c_void;
use std::ptr::NonNull;

use num_bigint::BigInt;

use crate::atom::WellKnownAtom;
use crate::error::AllocError;
use crate::heap::{
    AllocResult, Heap, LiteralValue, ModuleTables, ObjectLiteral, PropertyKey, RuntimeFunction,
    RuntimeModuleEntry, RuntimeScope, RuntimeScript,
};
use crate::literal::RegExpFlags;
use crate::scope::{BindingLocation, ScopeKind};
use crate::script::SourceExtent;

/// A borrowed UTF-16 string slice for passing across FFI.
/// Points into Rust-owned memory; valid only for the duration of the FFI call.
#[repr(C)]
pub struct FFIUtf16Slice {
    pub data: *const u16,
    pub length: usize,
}

impl From<&[u16]> for FFIUtf16Slice {
    fn from(slice: &[u16]) -> Self {
        Self {
            data: slice.as_ptr(),
            length: slice.len(),
        }
    }
}

/// C-compatible `Optional<u32>` (C++ doesn't have a standard Optional ABI).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FFIOptionalU32 {
    pub value: u32,
    pub has_value: bool,
}

impl FFIOptionalU32 {
    pub fn none() -> Self {
        Self {
            value: 0,
            has_value: false,
        }
    }

    pub fn some(value: u32) -> Self {
        Self {
            value,
            has_value: true,
        }
    }
}

impl From<Option<u32>> for FFIOptionalU32 {
    fn from(opt: Option<u32>) -> Self {
        match opt {
            Some(value) => Self::some(value),
            None => Self::none(),
        }
    }
}

/// A heap cell handed out by the C++ side. Never null.
pub type CellPtr = NonNull<c_void>;

fn raw(cell: Option<CellPtr>) -> *mut c_void {
    cell.map_or(std::ptr::null_mut(), NonNull::as_ptr)
}

fn cell(ptr: *mut c_void) -> AllocResult<CellPtr> {
    NonNull::new(ptr).ok_or(AllocError)
}

fn status(ok: bool) -> AllocResult<()> {
    if ok { Ok(()) } else { Err(AllocError) }
}

// Values of `FFILiteralValue::kind`.
pub const LITERAL_UNDEFINED: u8 = 0;
pub const LITERAL_NULL: u8 = 1;
pub const LITERAL_BOOL: u8 = 2;
pub const LITERAL_INT32: u8 = 3;
pub const LITERAL_DOUBLE: u8 = 4;
pub const LITERAL_STRING: u8 = 5;

/// A constant property value (C++ `StencilHeap::LiteralValue`).
#[repr(C)]
pub struct FFILiteralValue {
    pub kind: u8,
    pub bool_value: bool,
    pub int32_value: i32,
    pub double_value: f64,
    pub string: *mut c_void,
}

impl From<LiteralValue<CellPtr>> for FFILiteralValue {
    fn from(value: LiteralValue<CellPtr>) -> Self {
        let mut ffi = Self {
            kind: LITERAL_UNDEFINED,
            bool_value: false,
            int32_value: 0,
            double_value: 0.0,
            string: std::ptr::null_mut(),
        };
        match value {
            LiteralValue::Undefined => {}
            LiteralValue::Null => ffi.kind = LITERAL_NULL,
            LiteralValue::Bool(value) => {
                ffi.kind = LITERAL_BOOL;
                ffi.bool_value = value;
            }
            LiteralValue::Int32(value) => {
                ffi.kind = LITERAL_INT32;
                ffi.int32_value = value;
            }
            LiteralValue::Double(value) => {
                ffi.kind = LITERAL_DOUBLE;
                ffi.double_value = value;
            }
            LiteralValue::String(string) => {
                ffi.kind = LITERAL_STRING;
                ffi.string = string.as_ptr();
            }
        }
        ffi
    }
}

/// One property of an object literal. `key_atom` is nullptr for an
/// element, in which case `key_index` holds the array index.
#[repr(C)]
pub struct FFIObjectProperty {
    pub key_atom: *mut c_void,
    pub key_index: u32,
    pub value: FFILiteralValue,
}

// Values of `FFIBinding::location_kind`.
pub const LOCATION_GLOBAL: u8 = 0;
pub const LOCATION_ARGUMENT: u8 = 1;
pub const LOCATION_FRAME: u8 = 2;
pub const LOCATION_ENVIRONMENT: u8 = 3;
pub const LOCATION_IMPORT: u8 = 4;
pub const LOCATION_NAMED_LAMBDA_CALLEE: u8 = 5;

#[repr(C)]
pub struct FFIBinding {
    pub name: *mut c_void,
    pub kind: u8, // BindingKind
    pub location_kind: u8,
    pub slot: u32,
}

fn location_parts(location: BindingLocation) -> (u8, u32) {
    match location {
        BindingLocation::Global => (LOCATION_GLOBAL, 0),
        BindingLocation::Argument(slot) => (LOCATION_ARGUMENT, u32::from(slot)),
        BindingLocation::Frame(slot) => (LOCATION_FRAME, slot),
        BindingLocation::Environment(slot) => (LOCATION_ENVIRONMENT, slot),
        BindingLocation::Import => (LOCATION_IMPORT, 0),
        BindingLocation::NamedLambdaCallee => (LOCATION_NAMED_LAMBDA_CALLEE, 0),
    }
}

/// Data for creating a runtime scope (C++ `StencilHeap::ScopeData`).
#[repr(C)]
pub struct FFIScope {
    pub kind: u8, // ScopeKind
    pub enclosing: *mut c_void,
    pub environment_shape: *mut c_void,
    pub function: *mut c_void,
    pub first_frame_slot: u32,
    pub bindings: *const FFIBinding,
    pub bindings_len: usize,
}

#[repr(C)]
pub struct FFISourceExtent {
    pub source_start: u32,
    pub source_end: u32,
    pub to_string_start: u32,
    pub to_string_end: u32,
    pub lineno: u32,
    pub column: u32,
}

impl From<SourceExtent> for FFISourceExtent {
    fn from(extent: SourceExtent) -> Self {
        Self {
            source_start: extent.source_start,
            source_end: extent.source_end,
            to_string_start: extent.to_string_start,
            to_string_end: extent.to_string_end,
            lineno: extent.lineno,
            column: extent.column,
        }
    }
}

/// Data for creating a runtime script (C++ `StencilHeap::ScriptData`).
/// Null gc things are passed as nullptr.
#[repr(C)]
pub struct FFIScript {
    pub function: *mut c_void,
    pub immutable_flags: u32,
    pub extent: FFISourceExtent,
    pub gc_things: *const *mut c_void,
    pub gc_things_len: usize,
    pub has_bytecode: bool,
    pub bytecode: *const u8,
    pub bytecode_len: usize,
    pub nfixed: u32,
    pub member_initializers: FFIOptionalU32,
    pub allow_relazify: bool,
}

/// One import/export/request record. Absent names are nullptr.
#[repr(C)]
pub struct FFIModuleEntry {
    pub specifier: *mut c_void,
    pub local_name: *mut c_void,
    pub import_name: *mut c_void,
    pub export_name: *mut c_void,
    pub line: u32,
    pub column: u32,
}

impl From<&RuntimeModuleEntry<CellPtr>> for FFIModuleEntry {
    fn from(entry: &RuntimeModuleEntry<CellPtr>) -> Self {
        Self {
            specifier: raw(entry.specifier),
            local_name: raw(entry.local_name),
            import_name: raw(entry.import_name),
            export_name: raw(entry.export_name),
            line: entry.line,
            column: entry.column,
        }
    }
}

#[repr(C)]
pub struct FFIModuleEntries {
    pub data: *const FFIModuleEntry,
    pub length: usize,
}

impl From<&[FFIModuleEntry]> for FFIModuleEntries {
    fn from(entries: &[FFIModuleEntry]) -> Self {
        Self {
            data: entries.as_ptr(),
            length: entries.len(),
        }
    }
}

#[repr(C)]
pub struct FFIModuleTables {
    pub requested_modules: FFIModuleEntries,
    pub import_entries: FFIModuleEntries,
    pub local_export_entries: FFIModuleEntries,
    pub indirect_export_entries: FFIModuleEntries,
    pub star_export_entries: FFIModuleEntries,
    pub function_decls: *const *mut c_void,
    pub function_decls_len: usize,
    pub is_async: bool,
}

/// Allocation callbacks implemented by the C++ heap. `ctx` is passed back
/// unchanged as the first argument of every call.
#[repr(C)]
pub struct HeapCallbacks {
    pub ctx: *mut c_void,
    pub atomize: unsafe extern "C" fn(ctx: *mut c_void, chars: FFIUtf16Slice) -> *mut c_void,
    pub well_known_atom: unsafe extern "C" fn(ctx: *mut c_void, id: u32) -> *mut c_void,
    /// `digits` is the decimal text of the value, with a leading `-` if
    /// negative.
    pub new_bigint: unsafe extern "C" fn(ctx: *mut c_void, digits: FFIUtf16Slice) -> *mut c_void,
    pub new_regexp:
        unsafe extern "C" fn(ctx: *mut c_void, source: *mut c_void, flags: u8) -> *mut c_void,
    pub new_object_literal: unsafe extern "C" fn(
        ctx: *mut c_void,
        is_array: bool,
        is_singleton: bool,
        properties: *const FFIObjectProperty,
        properties_len: usize,
    ) -> *mut c_void,
    pub new_environment_shape:
        unsafe extern "C" fn(ctx: *mut c_void, kind: u8, num_slots: u32) -> *mut c_void,
    pub new_scope: unsafe extern "C" fn(ctx: *mut c_void, scope: *const FFIScope) -> *mut c_void,
    pub empty_global_scope: unsafe extern "C" fn(ctx: *mut c_void) -> *mut c_void,
    pub new_function: unsafe extern "C" fn(
        ctx: *mut c_void,
        name: *mut c_void,
        flags: u16,
        nargs: u16,
    ) -> *mut c_void,
    pub new_script: unsafe extern "C" fn(ctx: *mut c_void, script: *const FFIScript) -> *mut c_void,
    /// Called after every other callback of an instantiation has succeeded.
    pub set_function_script:
        unsafe extern "C" fn(ctx: *mut c_void, function: *mut c_void, script: *mut c_void) -> bool,
    pub set_lazy_enclosing_scope:
        unsafe extern "C" fn(ctx: *mut c_void, function: *mut c_void, scope: *mut c_void) -> bool,
    pub new_module: unsafe extern "C" fn(ctx: *mut c_void) -> *mut c_void,
    pub init_module: unsafe extern "C" fn(
        ctx: *mut c_void,
        module: *mut c_void,
        tables: *const FFIModuleTables,
    ) -> bool,
}

/// `Heap` implementation forwarding to `HeapCallbacks`.
pub struct FfiHeap<'a> {
    callbacks: &'a HeapCallbacks,
}

impl<'a> FfiHeap<'a> {
    /// # Safety
    /// Every callback in `callbacks` must be safe to call with
    /// `callbacks.ctx` for as long as the returned heap is alive.
    pub unsafe fn new(callbacks: &'a HeapCallbacks) -> Self {
        Self { callbacks }
    }
}

impl Heap for FfiHeap<'_> {
    type Ptr = CellPtr;

    fn atomize(&mut self, chars: &[u16]) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.atomize)(c.ctx, chars.into()) })
    }

    fn well_known_atom(&mut self, atom: WellKnownAtom) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.well_known_atom)(c.ctx, atom as u32) })
    }

    fn new_bigint(&mut self, value: BigInt) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        let digits: Vec<u16> = value.to_string().encode_utf16().collect();
        cell(unsafe { (c.new_bigint)(c.ctx, digits.as_slice().into()) })
    }

    fn new_regexp(&mut self, source: CellPtr, flags: RegExpFlags) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.new_regexp)(c.ctx, source.as_ptr(), flags.raw()) })
    }

    fn new_object_literal(&mut self, literal: ObjectLiteral<CellPtr>) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        let properties: Vec<FFIObjectProperty> = literal
            .properties
            .into_iter()
            .map(|(key, value)| {
                let (key_atom, key_index) = match key {
                    PropertyKey::Atom(atom) => (atom.as_ptr(), 0),
                    PropertyKey::Index(index) => (std::ptr::null_mut(), index),
                };
                FFIObjectProperty {
                    key_atom,
                    key_index,
                    value: value.into(),
                }
            })
            .collect();
        cell(unsafe {
            (c.new_object_literal)(
                c.ctx,
                literal.is_array,
                literal.is_singleton,
                properties.as_ptr(),
                properties.len(),
            )
        })
    }

    fn new_environment_shape(&mut self, kind: ScopeKind, num_slots: u32) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.new_environment_shape)(c.ctx, kind as u8, num_slots) })
    }

    fn new_scope(&mut self, scope: RuntimeScope<CellPtr>) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        let bindings: Vec<FFIBinding> = scope
            .bindings
            .iter()
            .map(|binding| {
                let (location_kind, slot) = location_parts(binding.location);
                FFIBinding {
                    name: binding.name.as_ptr(),
                    kind: binding.kind as u8,
                    location_kind,
                    slot,
                }
            })
            .collect();
        let ffi_scope = FFIScope {
            kind: scope.kind as u8,
            enclosing: raw(scope.enclosing),
            environment_shape: raw(scope.environment_shape),
            function: raw(scope.function),
            first_frame_slot: scope.first_frame_slot,
            bindings: bindings.as_ptr(),
            bindings_len: bindings.len(),
        };
        cell(unsafe { (c.new_scope)(c.ctx, &ffi_scope) })
    }

    fn empty_global_scope(&mut self) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.empty_global_scope)(c.ctx) })
    }

    fn new_function(&mut self, function: RuntimeFunction<CellPtr>) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe {
            (c.new_function)(c.ctx, raw(function.name), function.flags.raw(), function.nargs)
        })
    }

    fn new_script(&mut self, script: RuntimeScript<CellPtr>) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        let gc_things: Vec<*mut c_void> = script.gc_things.iter().map(|&thing| raw(thing)).collect();
        let bytecode = script.bytecode.as_deref().unwrap_or(&[]);
        let ffi_script = FFIScript {
            function: raw(script.function),
            immutable_flags: script.immutable_flags.raw(),
            extent: script.extent.into(),
            gc_things: gc_things.as_ptr(),
            gc_things_len: gc_things.len(),
            has_bytecode: script.bytecode.is_some(),
            bytecode: bytecode.as_ptr(),
            bytecode_len: bytecode.len(),
            nfixed: script.nfixed,
            member_initializers: script.member_initializers.into(),
            allow_relazify: script.allow_relazify,
        };
        cell(unsafe { (c.new_script)(c.ctx, &ffi_script) })
    }

    fn set_function_script(&mut self, function: CellPtr, script: CellPtr) -> AllocResult<()> {
        let c = self.callbacks;
        status(unsafe { (c.set_function_script)(c.ctx, function.as_ptr(), script.as_ptr()) })
    }

    fn set_lazy_enclosing_scope(&mut self, function: CellPtr, scope: CellPtr) -> AllocResult<()> {
        let c = self.callbacks;
        status(unsafe { (c.set_lazy_enclosing_scope)(c.ctx, function.as_ptr(), scope.as_ptr()) })
    }

    fn new_module(&mut self) -> AllocResult<CellPtr> {
        let c = self.callbacks;
        cell(unsafe { (c.new_module)(c.ctx) })
    }

    fn init_module(&mut self, module: CellPtr, tables: ModuleTables<CellPtr>) -> AllocResult<()> {
        let c = self.callbacks;
        let convert = |entries: &[RuntimeModuleEntry<CellPtr>]| -> Vec<FFIModuleEntry> {
            entries.iter().map(FFIModuleEntry::from).collect()
        };
        let requested_modules = convert(&tables.requested_modules);
        let import_entries = convert(&tables.import_entries);
        let local_export_entries = convert(&tables.local_export_entries);
        let indirect_export_entries = convert(&tables.indirect_export_entries);
        let star_export_entries = convert(&tables.star_export_entries);
        let function_decls: Vec<*mut c_void> =
            tables.function_decls.iter().map(|decl| decl.as_ptr()).collect();
        let ffi_tables = FFIModuleTables {
            requested_modules: requested_modules.as_slice().into(),
            import_entries: import_entries.as_slice().into(),
            local_export_entries: local_export_entries.as_slice().into(),
            indirect_export_entries: indirect_export_entries.as_slice().into(),
            star_export_entries: star_export_entries.as_slice().into(),
            function_decls: function_decls.as_ptr(),
            function_decls_len: function_decls.len(),
            is_async: tables.is_async,
        };
        status(unsafe { (c.init_module)(c.ctx, module.as_ptr(), &ffi_tables) })
    }
}
