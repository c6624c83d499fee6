/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Errors for stencil construction, instantiation and serialization.
//!
//! Every creation and instantiation operation returns a `Result`. A failed
//! operation leaves nothing half-linked: the caller abandons the whole
//! compilation unit.

use thiserror::Error;

use crate::scope::ScopeKind;

pub type Result<T> = std::result::Result<T, StencilError>;

/// Failure reported by a heap capability when it cannot allocate a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of memory")]
pub struct AllocError;

#[derive(Debug, Error)]
pub enum StencilError {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// An arena grew past what a tagged index can address.
    #[error("too many {what} (index limit is {limit})")]
    IndexLimitExceeded { what: &'static str, limit: u32 },

    #[error("scope kind {kind:?} cannot be created as a {expected} scope")]
    ScopeKindMismatch {
        kind: ScopeKind,
        expected: &'static str,
    },

    #[error("function index must be present exactly when the scope kind is Function (kind {kind:?})")]
    FunctionIndexMismatch { kind: ScopeKind },

    #[error("invalid scope data: {0}")]
    InvalidScopeData(&'static str),

    /// Scopes must be created in topological order of the enclosing DAG.
    #[error("scope {scope} refers to enclosing scope {enclosing} which does not exist yet")]
    EnclosingScopeOutOfOrder { scope: u32, enclosing: u32 },

    #[error("{kind} index {index} is out of range")]
    DanglingIndex { kind: &'static str, index: u32 },

    #[error("gc things of script {0} were already written")]
    GcThingsAlreadySet(u32),

    #[error("script {0} is marked as both a function and a module")]
    FunctionAndModule(u32),

    #[error("function flags {0:#06x} have neither a base script nor an asm.js native")]
    InvalidFunctionFlags(u16),

    #[error("{entry} entry requires a {field}")]
    MissingModuleEntryField {
        entry: &'static str,
        field: &'static str,
    },

    #[error("malformed BigInt literal '{0}'")]
    InvalidBigIntLiteral(String),

    #[error("invalid regular expression flags '{0}'")]
    InvalidRegExpFlags(String),

    #[error("atom {0:#010x} has not been instantiated in this atom cache")]
    AtomNotInstantiated(u32),

    #[error("atom cache holds cells of heap {cache} and cannot be used with heap {heap}")]
    ForeignAtomCache { cache: u32, heap: u32 },

    /// A function scope must belong to a function script.
    #[error("script {0} is not a function")]
    NotAFunction(u32),

    #[error("compilation has no top-level script")]
    MissingTopLevelScript,

    #[error("module metadata must be present exactly when the top-level script is a module")]
    ModuleMetadataMismatch,

    #[error("instantiation target does not fit this stencil: {0}")]
    TargetMismatch(&'static str),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("not a stencil: bad magic")]
    BadMagic,

    #[error("stencil format version {found} is not supported (expected {expected})")]
    FormatVersionMismatch { found: u32, expected: u32 },

    #[error("stencil was written with a different tagged index layout")]
    IndexLayoutMismatch,

    #[error("invalid stencil: {0}")]
    InvalidStencil(String),
}
