/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! # LibJS Stencil
//!
//! A GC-free representation of compiled JavaScript, and the protocol that
//! turns it into runtime heap objects.
//!
//! ## Architecture
//!
//! ```text
//! Parser / bytecode emitter
//!     │ creation operations
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  CompilationState (compilation.rs)                  │
//! │  Append-only arenas: atoms, scripts, scopes,        │
//! │  literals, gc things, module metadata               │
//! └──────────────────────┬──────────────────────────────┘
//!                        │ freeze()
//!                        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  CompilationStencil                                 │
//! │  Immutable, Send + Sync, encodable (xdr.rs)         │
//! └──────────────────────┬──────────────────────────────┘
//!                        │ instantiate(input, atom cache, heap)
//!                        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  Heap (heap.rs, ffi.rs → StencilHeap.cpp)           │
//! │  Allocates strings, scopes, functions, scripts      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module overview
//!
//! - `atom`: parser atoms, tagged atom indices, per-instantiation atom cache
//! - `tagged`: tagged references to a script's gc things
//! - `script`, `scope`, `literal`, `module`: the stencil records
//! - `compilation`: the building state, the frozen stencil and `instantiate`
//! - `heap`: the allocation capability plus an in-memory heap
//! - `xdr`: binary encoding of frozen stencils
//! - `stencil_dump`: tree dump for debugging
//! - `ffi`: C-compatible heap callbacks

/// Create a `&'static [u16]` from an ASCII string literal at compile time.
macro_rules! utf16 {
    ($s:literal) => {{
        const VALUE: &[u16; $s.len()] = &{
            let bytes = $s.as_bytes();
            let mut arr = [0u16; $s.len()];
            let mut i = 0;
            while i < bytes.len() {
                assert!(bytes[i] < 128, "utf16! only supports ASCII literals");
                arr[i] = bytes[i] as u16;
                i += 1;
            }
            arr
        };
        VALUE.as_slice()
    }};
}

/// Defines a transparent bit set over an integer, with named constants.
/// `Debug` prints the names of the set flags.
macro_rules! flag_set {
    (
        $(#[$outer:meta])*
        $vis:vis struct $name:ident($ty:ty) {
            $(
                $(#[$inner:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        $vis struct $name($ty);

        #[allow(dead_code)]
        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: Self = Self($value);
            )*

            pub const EMPTY: Self = Self(0);

            const NAMED: &'static [(&'static str, Self)] = &[$((stringify!($flag), Self::$flag)),*];

            pub const fn from_raw(raw: $ty) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> $ty {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Names of the set flags, in declaration order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                Self::NAMED
                    .iter()
                    .filter(move |(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut named = Self::EMPTY;
                let mut parts: Vec<String> = Vec::new();
                for (name, flag) in Self::NAMED {
                    if self.contains(*flag) {
                        named.insert(*flag);
                        parts.push((*name).to_string());
                    }
                }
                let rest = self.0 & !named.0;
                if rest != 0 {
                    parts.push(format!("{:#x}", rest));
                }
                write!(f, "{}({})", stringify!($name), parts.join(" | "))
            }
        }
    };
}

pub mod atom;
pub mod compilation;
pub mod error;
pub mod ffi;
pub mod heap;
pub mod index;
pub mod literal;
pub mod module;
pub mod scope;
pub mod script;
pub mod stencil_dump;
pub mod tagged;
pub mod utf16;
pub mod xdr;

pub use atom::{CompilationAtomCache, ParserAtomsTable, TaggedParserAtomIndex, WellKnownAtom};
pub use compilation::{
    CompilationGcOutput, CompilationInput, CompilationOptions, CompilationState,
    CompilationStencil, TargetContext, TopLevelKind,
};
pub use error::{AllocError, Result, StencilError};
pub use heap::{Heap, ObjectHeap};
pub use tagged::TaggedScriptThingIndex;

pub(crate) fn u32_from_usize(value: usize) -> u32 {
    u32::try_from(value).expect("value exceeds u32::MAX")
}

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use ffi::{CellPtr, FfiHeap, HeapCallbacks};

/// Run `f`, aborting the process if it panics. Unwinding into C++ is
/// undefined behavior.
fn abort_on_panic<F: FnOnce() -> R, R>(f: F) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            eprintln!("Rust panic at FFI boundary: {msg}");
            std::process::abort();
        }
    }
}

unsafe fn bytes_from_raw<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    unsafe {
        if len == 0 {
            return Some(&[]);
        }
        if data.is_null() {
            eprintln!("bytes_from_raw: null pointer with non-zero length {len}");
            return None;
        }
        Some(std::slice::from_raw_parts(data, len))
    }
}

unsafe fn write_output(bytes: Vec<u8>, output_ptr: *mut *mut u8, output_len: *mut usize) -> bool {
    unsafe {
        if output_ptr.is_null() || output_len.is_null() {
            return false;
        }
        let mut boxed = bytes.into_boxed_slice();
        *output_ptr = boxed.as_mut_ptr();
        *output_len = boxed.len();
        // NB: Caller must free via rust_stencil_free_buffer(ptr, len).
        std::mem::forget(boxed);
        true
    }
}

// =============================================================================
// FFI entry points: stencil lifetime and encoding
// =============================================================================

/// Decode a stencil previously produced by `rust_stencil_encode`.
///
/// Returns an owned `CompilationStencil*` as `void*`, or nullptr if the
/// buffer is not a valid stencil for this build.
///
/// # Safety
/// `data` must point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_decode(data: *const u8, len: usize) -> *mut c_void {
    unsafe {
        abort_on_panic(|| {
            let Some(bytes) = bytes_from_raw(data, len) else {
                return std::ptr::null_mut();
            };
            match xdr::decode_stencil(bytes) {
                Ok(stencil) => Box::into_raw(Box::new(stencil)) as *mut c_void,
                Err(error) => {
                    warn!(%error, "failed to decode stencil");
                    std::ptr::null_mut()
                }
            }
        })
    }
}

/// Encode a stencil into a Rust-allocated buffer.
///
/// Returns false on failure, leaving the outputs untouched.
///
/// # Safety
/// - `stencil` must be a pointer returned by `rust_stencil_decode`.
/// - `output_ptr` and `output_len` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_encode(
    stencil: *const c_void,
    output_ptr: *mut *mut u8,
    output_len: *mut usize,
) -> bool {
    unsafe {
        abort_on_panic(|| {
            let Some(stencil) = (stencil as *const CompilationStencil).as_ref() else {
                return false;
            };
            match xdr::encode_stencil(stencil) {
                Ok(bytes) => write_output(bytes, output_ptr, output_len),
                Err(error) => {
                    warn!(%error, "failed to encode stencil");
                    false
                }
            }
        })
    }
}

/// Free a buffer allocated by Rust (encoded stencils and dumps).
///
/// # Safety
/// `ptr` and `len` must correspond to a `Box<[u8]>` previously leaked via `std::mem::forget`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_free_buffer(ptr: *mut u8, len: usize) {
    unsafe {
        abort_on_panic(|| {
            if !ptr.is_null() {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
            }
        });
    }
}

/// Free a stencil.
///
/// # Safety
/// `stencil` must be nullptr or a pointer returned by `rust_stencil_decode`
/// that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_free(stencil: *mut c_void) {
    unsafe {
        abort_on_panic(|| {
            if !stencil.is_null() {
                drop(Box::from_raw(stencil as *mut CompilationStencil));
            }
        });
    }
}

/// Write a tree dump of the stencil into a Rust-allocated UTF-8 buffer.
///
/// # Safety
/// - `stencil` must be a pointer returned by `rust_stencil_decode`.
/// - `output_ptr` and `output_len` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_dump(
    stencil: *const c_void,
    output_ptr: *mut *mut u8,
    output_len: *mut usize,
) -> bool {
    unsafe {
        abort_on_panic(|| {
            let Some(stencil) = (stencil as *const CompilationStencil).as_ref() else {
                return false;
            };
            let dump = stencil_dump::dump_stencil_to_string(stencil);
            write_output(dump.into_bytes(), output_ptr, output_len)
        })
    }
}

// =============================================================================
// FFI entry points: instantiation
// =============================================================================

// Values of the `target_kind` argument of `rust_stencil_instantiate`.
pub const TARGET_GLOBAL: u8 = 0;
pub const TARGET_EVAL: u8 = 1;
pub const TARGET_MODULE: u8 = 2;
pub const TARGET_DELAZIFICATION: u8 = 3;

fn target_from_ffi(
    target_kind: u8,
    enclosing_scope: *mut c_void,
    function: *mut c_void,
) -> Option<CompilationInput<CellPtr>> {
    let enclosing_scope = std::ptr::NonNull::new(enclosing_scope);
    let function = std::ptr::NonNull::new(function);
    match target_kind {
        TARGET_GLOBAL => Some(CompilationInput::global()),
        TARGET_EVAL => Some(CompilationInput::eval(enclosing_scope?)),
        TARGET_MODULE => Some(CompilationInput::module()),
        TARGET_DELAZIFICATION => Some(CompilationInput::delazification(function?, enclosing_scope?)),
        _ => None,
    }
}

/// Instantiate a stencil into the C++ heap described by `callbacks`.
///
/// `enclosing_scope` is required for eval and delazification targets, and
/// `function` for delazification. Each call uses a fresh atom cache.
///
/// Returns the top-level script cell, or nullptr on failure. For module
/// targets the module cell is written to `module_out` if it is non-null.
///
/// # Safety
/// - `stencil` must be a pointer returned by `rust_stencil_decode`.
/// - `callbacks` must point to a valid `HeapCallbacks` whose callbacks are
///   safe to call with its `ctx` for the duration of this call.
/// - `module_out` must be nullptr or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_stencil_instantiate(
    stencil: *const c_void,
    callbacks: *const HeapCallbacks,
    target_kind: u8,
    enclosing_scope: *mut c_void,
    function: *mut c_void,
    module_out: *mut *mut c_void,
) -> *mut c_void {
    unsafe {
        abort_on_panic(|| {
            let Some(stencil) = (stencil as *const CompilationStencil).as_ref() else {
                return std::ptr::null_mut();
            };
            let Some(callbacks) = callbacks.as_ref() else {
                return std::ptr::null_mut();
            };
            let Some(input) = target_from_ffi(target_kind, enclosing_scope, function) else {
                warn!(target_kind, "invalid instantiation target");
                return std::ptr::null_mut();
            };

            let mut heap = FfiHeap::new(callbacks);
            let mut atom_cache = CompilationAtomCache::new();
            match stencil.instantiate(&input, &mut atom_cache, &mut heap) {
                Ok(output) => {
                    if !module_out.is_null()
                        && let Some(module) = output.module
                    {
                        *module_out = module.as_ptr();
                    }
                    output.script.map_or(std::ptr::null_mut(), |script| script.as_ptr())
                }
                Err(error) => {
                    warn!(%error, "stencil instantiation failed");
                    std::ptr::null_mut()
                }
            }
        })
    }
}
