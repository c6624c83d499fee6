/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Binary encoding of frozen stencils, for caching compiled code across
//! runs.
//!
//! ```text
//!   ┌──────────────────────────── header ─────────────────────────────┐
//!   │ magic "JSST" │ format version │ tag shift │ index limit         │
//!   └─────────────────────────────────────────────────────────────────┘
//!   ┌──────────────────────────── body ───────────────────────────────┐
//!   │ bincode-encoded CompilationStencil                              │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tagged indices are stored as raw words, so the tagged index layout is
//! part of the header. Decoded stencils are validated in full before they
//! are handed out.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::atom::{INDEX_LIMIT, TAG_SHIFT};
use crate::compilation::CompilationStencil;
use crate::error::{Result, StencilError};

/// Bump whenever the encoding of any stencil type changes.
pub const STENCIL_FORMAT_VERSION: u32 = 2;

pub const STENCIL_MAGIC: [u8; 4] = *b"JSST";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
    tag_shift: u32,
    index_limit: u32,
}

impl Header {
    fn current() -> Self {
        Self {
            magic: STENCIL_MAGIC,
            version: STENCIL_FORMAT_VERSION,
            tag_shift: TAG_SHIFT,
            index_limit: INDEX_LIMIT,
        }
    }
}

pub fn encode_stencil(stencil: &CompilationStencil) -> Result<Vec<u8>> {
    let mut buffer = bincode::serialize(&Header::current())
        .map_err(|e| StencilError::Serialization(e.to_string()))?;
    bincode::serialize_into(&mut buffer, stencil)
        .map_err(|e| StencilError::Serialization(e.to_string()))?;
    debug!(bytes = buffer.len(), scripts = stencil.scripts().len(), "stencil encoded");
    Ok(buffer)
}

pub fn decode_stencil(bytes: &[u8]) -> Result<CompilationStencil> {
    let mut cursor = Cursor::new(bytes);
    let header: Header = bincode::deserialize_from(&mut cursor)
        .map_err(|e| StencilError::Deserialization(e.to_string()))?;

    if header.magic != STENCIL_MAGIC {
        warn!(magic = ?header.magic, "rejecting stencil with bad magic");
        return Err(StencilError::BadMagic);
    }
    if header.version != STENCIL_FORMAT_VERSION {
        warn!(
            found = header.version,
            expected = STENCIL_FORMAT_VERSION,
            "rejecting stencil from another format version"
        );
        return Err(StencilError::FormatVersionMismatch {
            found: header.version,
            expected: STENCIL_FORMAT_VERSION,
        });
    }
    if header.tag_shift != TAG_SHIFT || header.index_limit != INDEX_LIMIT {
        warn!(
            tag_shift = header.tag_shift,
            index_limit = header.index_limit,
            "rejecting stencil with a different tagged index layout"
        );
        return Err(StencilError::IndexLayoutMismatch);
    }

    let mut stencil: CompilationStencil = bincode::deserialize_from(&mut cursor)
        .map_err(|e| StencilError::Deserialization(e.to_string()))?;
    if cursor.position() as usize != bytes.len() {
        return Err(StencilError::InvalidStencil(format!(
            "{} trailing bytes",
            bytes.len() - cursor.position() as usize
        )));
    }

    stencil.parser_atoms.rebuild_lookup();
    stencil.validate().map_err(|e| match e {
        StencilError::InvalidStencil(_) => e,
        other => StencilError::InvalidStencil(other.to_string()),
    })?;
    debug!(bytes = bytes.len(), scripts = stencil.scripts().len(), "stencil decoded");
    Ok(stencil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::{CompilationOptions, CompilationState, TopLevelKind};
    use crate::script::SourceExtent;

    fn encoded() -> Vec<u8> {
        let mut state = CompilationState::new();
        state
            .push_top_level_script(&CompilationOptions::default(), TopLevelKind::Script, SourceExtent::default())
            .unwrap();
        state.parser_atoms_mut().intern_str("x").unwrap();
        encode_stencil(&state.freeze().unwrap()).unwrap()
    }

    #[test]
    fn header_is_checked_field_by_field() {
        let bytes = encoded();
        assert!(decode_stencil(&bytes).is_ok());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(decode_stencil(&bad_magic), Err(StencilError::BadMagic)));

        let mut bad_version = bytes.clone();
        bad_version[4] = 0xFF;
        assert!(matches!(
            decode_stencil(&bad_version),
            Err(StencilError::FormatVersionMismatch { expected: STENCIL_FORMAT_VERSION, .. })
        ));

        let mut bad_layout = bytes.clone();
        bad_layout[8] = 24;
        assert!(matches!(decode_stencil(&bad_layout), Err(StencilError::IndexLayoutMismatch)));
    }

    #[test]
    fn truncated_and_padded_input_is_rejected() {
        let bytes = encoded();
        assert!(matches!(decode_stencil(&bytes[..10]), Err(StencilError::Deserialization(_))));
        assert!(decode_stencil(&bytes[..bytes.len() - 1]).is_err());

        let mut padded = bytes;
        padded.push(0);
        assert!(matches!(decode_stencil(&padded), Err(StencilError::InvalidStencil(_))));
    }

    #[test]
    fn decoded_stencil_keeps_its_atoms() {
        let stencil = decode_stencil(&encoded()).unwrap();
        assert_eq!(stencil.parser_atoms().len(), 1);
        assert!(stencil.parser_atoms().get(crate::index::ParserAtomIndex(0)).is_some());
    }
}
