/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! The heap capability stencils are instantiated against.
//!
//! A `Heap` hands out opaque `Ptr` handles for the cells it allocates. The
//! stencil never looks inside a handle; it only passes handles back to the
//! heap when linking cells together. Every allocation can fail with
//! `AllocError`, which aborts the instantiation.
//!
//! `ObjectHeap` is a plain in-memory implementation used by tests, dumps and
//! hosts that don't bring their own runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use num_bigint::BigInt;
use tracing::warn;

use crate::atom::WellKnownAtom;
use crate::error::AllocError;
use crate::literal::RegExpFlags;
use crate::scope::{BindingKind, BindingLocation, ScopeKind};
use crate::script::{FunctionFlags, ImmutableScriptFlags, SourceExtent};
use crate::u32_from_usize;
use crate::utf16::Utf16String;

pub type AllocResult<T> = std::result::Result<T, AllocError>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PropertyKey<P> {
    Atom(P),
    Index(u32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LiteralValue<P> {
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Double(f64),
    String(P),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectLiteral<P> {
    pub is_array: bool,
    pub is_singleton: bool,
    pub properties: Vec<(PropertyKey<P>, LiteralValue<P>)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeBinding<P> {
    pub name: P,
    pub kind: BindingKind,
    pub location: BindingLocation,
}

/// Everything needed to allocate one runtime scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeScope<P> {
    pub kind: ScopeKind,
    /// `None` only for a global scope, which terminates every chain.
    pub enclosing: Option<P>,
    pub environment_shape: Option<P>,
    pub function: Option<P>,
    pub first_frame_slot: u32,
    pub bindings: Vec<RuntimeBinding<P>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeFunction<P> {
    pub name: Option<P>,
    pub flags: FunctionFlags,
    pub nargs: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeScript<P> {
    /// The function this script is the body of, if any.
    pub function: Option<P>,
    pub immutable_flags: ImmutableScriptFlags,
    pub extent: SourceExtent,
    /// Materialized gc things in span order. Null things stay `None`.
    pub gc_things: Vec<Option<P>>,
    pub bytecode: Option<Vec<u8>>,
    pub nfixed: u32,
    pub member_initializers: Option<u32>,
    pub allow_relazify: bool,
}

/// One import/export/request record, with the same shape as
/// `StencilModuleEntry` but resolved to heap strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeModuleEntry<P> {
    pub specifier: Option<P>,
    pub local_name: Option<P>,
    pub import_name: Option<P>,
    pub export_name: Option<P>,
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleTables<P> {
    pub requested_modules: Vec<RuntimeModuleEntry<P>>,
    pub import_entries: Vec<RuntimeModuleEntry<P>>,
    pub local_export_entries: Vec<RuntimeModuleEntry<P>>,
    pub indirect_export_entries: Vec<RuntimeModuleEntry<P>>,
    pub star_export_entries: Vec<RuntimeModuleEntry<P>>,
    pub function_decls: Vec<P>,
    pub is_async: bool,
}

pub trait Heap {
    type Ptr: Copy + Eq + std::fmt::Debug;

    /// Identity of this heap, if it has one. Handles of two heaps with
    /// different ids must never be mixed.
    fn id(&self) -> Option<u32> {
        None
    }

    /// Return the context's string cell for `chars`, creating it if needed.
    fn atomize(&mut self, chars: &[u16]) -> AllocResult<Self::Ptr>;
    fn well_known_atom(&mut self, atom: WellKnownAtom) -> AllocResult<Self::Ptr>;

    fn new_bigint(&mut self, value: BigInt) -> AllocResult<Self::Ptr>;
    fn new_regexp(&mut self, source: Self::Ptr, flags: RegExpFlags) -> AllocResult<Self::Ptr>;
    fn new_object_literal(&mut self, literal: ObjectLiteral<Self::Ptr>) -> AllocResult<Self::Ptr>;

    fn new_environment_shape(&mut self, kind: ScopeKind, num_slots: u32)
    -> AllocResult<Self::Ptr>;
    fn new_scope(&mut self, scope: RuntimeScope<Self::Ptr>) -> AllocResult<Self::Ptr>;
    /// The context's pre-existing empty global scope.
    fn empty_global_scope(&mut self) -> AllocResult<Self::Ptr>;

    fn new_function(&mut self, function: RuntimeFunction<Self::Ptr>) -> AllocResult<Self::Ptr>;
    /// Allocate a script. The script's `function` is not linked back to it
    /// until `set_function_script`.
    fn new_script(&mut self, script: RuntimeScript<Self::Ptr>) -> AllocResult<Self::Ptr>;
    /// Make `script` the body of `function`. Called only once the whole
    /// compilation unit has been instantiated.
    fn set_function_script(&mut self, function: Self::Ptr, script: Self::Ptr) -> AllocResult<()>;
    /// Record the enclosing scope of a lazy function once its whole
    /// compilation unit has been instantiated.
    fn set_lazy_enclosing_scope(&mut self, function: Self::Ptr, scope: Self::Ptr)
    -> AllocResult<()>;

    fn new_module(&mut self) -> AllocResult<Self::Ptr>;
    fn init_module(&mut self, module: Self::Ptr, tables: ModuleTables<Self::Ptr>)
    -> AllocResult<()>;
}

// =============================================================================
// In-memory heap
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapLimits {
    /// Allocation fails once this many cells exist.
    pub max_cells: usize,
}

impl Default for HeapLimits {
    fn default() -> Self {
        Self {
            max_cells: usize::MAX,
        }
    }
}

/// Handle to a cell of one `ObjectHeap`. The zone id keeps handles of two
/// heaps from ever comparing equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId {
    zone: u32,
    index: u32,
}

impl CellId {
    pub fn zone(self) -> u32 {
        self.zone
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Atom(Utf16String),
    BigInt(BigInt),
    RegExp {
        source: CellId,
        flags: RegExpFlags,
    },
    Object(ObjectLiteral<CellId>),
    EnvironmentShape {
        kind: ScopeKind,
        num_slots: u32,
    },
    Scope(RuntimeScope<CellId>),
    EmptyGlobalScope,
    Function {
        function: RuntimeFunction<CellId>,
        script: Option<CellId>,
        lazy_enclosing_scope: Option<CellId>,
    },
    Script(RuntimeScript<CellId>),
    Module(Option<ModuleTables<CellId>>),
}

static NEXT_ZONE: AtomicU32 = AtomicU32::new(1);

pub struct ObjectHeap {
    zone: u32,
    limits: HeapLimits,
    cells: Vec<Cell>,
    atoms: HashMap<Utf16String, CellId>,
    empty_global_scope: Option<CellId>,
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new(HeapLimits::default())
    }
}

impl ObjectHeap {
    pub fn new(limits: HeapLimits) -> Self {
        Self {
            zone: NEXT_ZONE.fetch_add(1, Ordering::Relaxed),
            limits,
            cells: Vec::new(),
            atoms: HashMap::new(),
            empty_global_scope: None,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, id: CellId) -> Option<&Cell> {
        if id.zone != self.zone {
            return None;
        }
        self.cells.get(id.index as usize)
    }

    fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        if id.zone != self.zone {
            return None;
        }
        self.cells.get_mut(id.index as usize)
    }

    pub fn atom_chars(&self, id: CellId) -> Option<&[u16]> {
        match self.get(id)? {
            Cell::Atom(chars) => Some(chars),
            _ => None,
        }
    }

    /// Kinds of the scopes from `scope` outwards, ending with the global
    /// scope (or the empty global scope).
    pub fn scope_chain(&self, scope: CellId) -> Vec<ScopeKind> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.get(id) {
                Some(Cell::Scope(scope)) => {
                    chain.push(scope.kind);
                    current = scope.enclosing;
                }
                Some(Cell::EmptyGlobalScope) => {
                    chain.push(ScopeKind::Global);
                    current = None;
                }
                _ => current = None,
            }
        }
        chain
    }

    fn alloc(&mut self, cell: Cell) -> AllocResult<CellId> {
        if self.cells.len() >= self.limits.max_cells {
            warn!(
                zone = self.zone,
                max_cells = self.limits.max_cells,
                "object heap is full"
            );
            return Err(AllocError);
        }
        let id = CellId {
            zone: self.zone,
            index: u32_from_usize(self.cells.len()),
        };
        self.cells.push(cell);
        Ok(id)
    }
}

impl Heap for ObjectHeap {
    type Ptr = CellId;

    fn id(&self) -> Option<u32> {
        Some(self.zone)
    }

    fn atomize(&mut self, chars: &[u16]) -> AllocResult<CellId> {
        if let Some(&id) = self.atoms.get(chars) {
            return Ok(id);
        }
        let text = Utf16String::from(chars);
        let id = self.alloc(Cell::Atom(text.clone()))?;
        self.atoms.insert(text, id);
        Ok(id)
    }

    fn well_known_atom(&mut self, atom: WellKnownAtom) -> AllocResult<CellId> {
        self.atomize(atom.chars())
    }

    fn new_bigint(&mut self, value: BigInt) -> AllocResult<CellId> {
        self.alloc(Cell::BigInt(value))
    }

    fn new_regexp(&mut self, source: CellId, flags: RegExpFlags) -> AllocResult<CellId> {
        self.alloc(Cell::RegExp { source, flags })
    }

    fn new_object_literal(&mut self, literal: ObjectLiteral<CellId>) -> AllocResult<CellId> {
        self.alloc(Cell::Object(literal))
    }

    fn new_environment_shape(&mut self, kind: ScopeKind, num_slots: u32) -> AllocResult<CellId> {
        self.alloc(Cell::EnvironmentShape { kind, num_slots })
    }

    fn new_scope(&mut self, scope: RuntimeScope<CellId>) -> AllocResult<CellId> {
        self.alloc(Cell::Scope(scope))
    }

    fn empty_global_scope(&mut self) -> AllocResult<CellId> {
        if let Some(id) = self.empty_global_scope {
            return Ok(id);
        }
        let id = self.alloc(Cell::EmptyGlobalScope)?;
        self.empty_global_scope = Some(id);
        Ok(id)
    }

    fn new_function(&mut self, function: RuntimeFunction<CellId>) -> AllocResult<CellId> {
        self.alloc(Cell::Function {
            function,
            script: None,
            lazy_enclosing_scope: None,
        })
    }

    fn new_script(&mut self, script: RuntimeScript<CellId>) -> AllocResult<CellId> {
        self.alloc(Cell::Script(script))
    }

    fn set_function_script(&mut self, function: CellId, script: CellId) -> AllocResult<()> {
        if let Some(Cell::Function { script: slot, .. }) = self.get_mut(function) {
            *slot = Some(script);
        }
        Ok(())
    }

    fn set_lazy_enclosing_scope(&mut self, function: CellId, scope: CellId) -> AllocResult<()> {
        if let Some(Cell::Function {
            lazy_enclosing_scope,
            ..
        }) = self.get_mut(function)
        {
            *lazy_enclosing_scope = Some(scope);
        }
        Ok(())
    }

    fn new_module(&mut self) -> AllocResult<CellId> {
        self.alloc(Cell::Module(None))
    }

    fn init_module(&mut self, module: CellId, tables: ModuleTables<CellId>) -> AllocResult<()> {
        if let Some(Cell::Module(slot)) = self.get_mut(module) {
            *slot = Some(tables);
        }
        Ok(())
    }
}
