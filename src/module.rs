/*
 * Copyright (c) 2026-present, the Ladybird developers.
 *
 * SPDX-License-Identifier: BSD-2-Clause
 */

//! Module metadata: the import, export and request tables of a module.
//!
//! All four record shapes share one physical layout. Which fields each
//! shape requires:
//!
//! ```text
//!                 │ request  │ import   │ export-as │ export-from │
//!   ──────────────┼──────────┼──────────┼───────────┼─────────────┤
//!   specifier     │ required │ required │ null      │ required    │
//!   local_name    │ null     │ required │ required  │ null        │
//!   import_name   │ null     │ required │ null      │ required    │
//!   export_name   │ null     │ null     │ required  │ optional    │
//! ```

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::atom::{CompilationAtomCache, TaggedParserAtomIndex};
use crate::error::{Result, StencilError};
use crate::heap::{Heap, ModuleTables, RuntimeModuleEntry};
use crate::index::GcThingIndex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilModuleEntry {
    pub specifier: TaggedParserAtomIndex,
    pub local_name: TaggedParserAtomIndex,
    pub import_name: TaggedParserAtomIndex,
    pub export_name: TaggedParserAtomIndex,
    /// Location for error messages. Exports that can't fail, such as
    /// `export let x;`, leave these zero.
    pub line: u32,
    pub column: u32,
}

fn require(
    atom: TaggedParserAtomIndex,
    entry: &'static str,
    field: &'static str,
) -> Result<TaggedParserAtomIndex> {
    if atom.is_null() {
        return Err(StencilError::MissingModuleEntryField { entry, field });
    }
    Ok(atom)
}

impl StencilModuleEntry {
    fn at(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            ..Self::default()
        }
    }

    pub fn module_request(specifier: TaggedParserAtomIndex, line: u32, column: u32) -> Result<Self> {
        Ok(Self {
            specifier: require(specifier, "module request", "specifier")?,
            ..Self::at(line, column)
        })
    }

    pub fn import_entry(
        specifier: TaggedParserAtomIndex,
        local_name: TaggedParserAtomIndex,
        import_name: TaggedParserAtomIndex,
        line: u32,
        column: u32,
    ) -> Result<Self> {
        Ok(Self {
            specifier: require(specifier, "import", "specifier")?,
            local_name: require(local_name, "import", "local name")?,
            import_name: require(import_name, "import", "import name")?,
            ..Self::at(line, column)
        })
    }

    pub fn export_as_entry(
        local_name: TaggedParserAtomIndex,
        export_name: TaggedParserAtomIndex,
        line: u32,
        column: u32,
    ) -> Result<Self> {
        Ok(Self {
            local_name: require(local_name, "export-as", "local name")?,
            export_name: require(export_name, "export-as", "export name")?,
            ..Self::at(line, column)
        })
    }

    /// `export * from "mod"` has no export name.
    pub fn export_from_entry(
        specifier: TaggedParserAtomIndex,
        import_name: TaggedParserAtomIndex,
        export_name: TaggedParserAtomIndex,
        line: u32,
        column: u32,
    ) -> Result<Self> {
        Ok(Self {
            specifier: require(specifier, "export-from", "specifier")?,
            import_name: require(import_name, "export-from", "import name")?,
            export_name,
            ..Self::at(line, column)
        })
    }

    pub fn atoms(&self) -> [TaggedParserAtomIndex; 4] {
        [
            self.specifier,
            self.local_name,
            self.import_name,
            self.export_name,
        ]
    }

    fn to_runtime<P: Copy>(&self, atom_cache: &CompilationAtomCache<P>) -> Result<RuntimeModuleEntry<P>> {
        Ok(RuntimeModuleEntry {
            specifier: atom_cache.get_optional(self.specifier)?,
            local_name: atom_cache.get_optional(self.local_name)?,
            import_name: atom_cache.get_optional(self.import_name)?,
            export_name: atom_cache.get_optional(self.export_name)?,
            line: self.line,
            column: self.column,
        })
    }
}

/// Tables produced by parsing a module. Every sequence is in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StencilModuleMetadata {
    pub requested_modules: Vec<StencilModuleEntry>,
    pub import_entries: Vec<StencilModuleEntry>,
    pub local_export_entries: Vec<StencilModuleEntry>,
    pub indirect_export_entries: Vec<StencilModuleEntry>,
    pub star_export_entries: Vec<StencilModuleEntry>,
    /// Indices into the module script's gc things, each naming a function.
    pub function_decls: Vec<GcThingIndex>,
    /// The module has a top-level `await`.
    pub is_async: bool,
}

impl StencilModuleMetadata {
    pub fn entries(&self) -> impl Iterator<Item = &StencilModuleEntry> {
        self.requested_modules
            .iter()
            .chain(&self.import_entries)
            .chain(&self.local_export_entries)
            .chain(&self.indirect_export_entries)
            .chain(&self.star_export_entries)
    }

    /// Populate `module` with this metadata's tables. `function_decls`
    /// receives the already created functions named by `function_decls`.
    pub fn init_module<H: Heap>(
        &self,
        atom_cache: &CompilationAtomCache<H::Ptr>,
        heap: &mut H,
        module: H::Ptr,
        function_decls: Vec<H::Ptr>,
    ) -> Result<()> {
        let convert = |entries: &[StencilModuleEntry]| -> Result<Vec<RuntimeModuleEntry<H::Ptr>>> {
            entries
                .iter()
                .map(|entry| entry.to_runtime(atom_cache))
                .collect()
        };
        let tables = ModuleTables {
            requested_modules: convert(&self.requested_modules)?,
            import_entries: convert(&self.import_entries)?,
            local_export_entries: convert(&self.local_export_entries)?,
            indirect_export_entries: convert(&self.indirect_export_entries)?,
            star_export_entries: convert(&self.star_export_entries)?,
            function_decls,
            is_async: self.is_async,
        };
        trace!(
            requested = tables.requested_modules.len(),
            imports = tables.import_entries.len(),
            local_exports = tables.local_export_entries.len(),
            indirect_exports = tables.indirect_export_entries.len(),
            star_exports = tables.star_export_entries.len(),
            "initializing module tables"
        );
        heap.init_module(module, tables)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::ParserAtomsTable;
    use crate::heap::{Cell, ObjectHeap};

    fn names() -> (ParserAtomsTable, [TaggedParserAtomIndex; 3]) {
        let mut table = ParserAtomsTable::new();
        let spec = table.intern_str("./dep.js").unwrap();
        let local = table.intern_str("x").unwrap();
        let import = table.intern_str("y").unwrap();
        (table, [spec, local, import])
    }

    #[test]
    fn export_as_requires_local_and_export_names() {
        let (_, [_, local, export]) = names();
        let null = TaggedParserAtomIndex::null();
        assert!(matches!(
            StencilModuleEntry::export_as_entry(null, export, 1, 1),
            Err(StencilError::MissingModuleEntryField {
                entry: "export-as",
                field: "local name"
            })
        ));
        assert!(matches!(
            StencilModuleEntry::export_as_entry(local, null, 1, 1),
            Err(StencilError::MissingModuleEntryField {
                field: "export name",
                ..
            })
        ));
        let entry = StencilModuleEntry::export_as_entry(local, export, 1, 8).unwrap();
        assert!(entry.specifier.is_null());
        assert!(entry.import_name.is_null());
    }

    #[test]
    fn import_requires_specifier_local_and_import_names() {
        let (_, [spec, local, import]) = names();
        let null = TaggedParserAtomIndex::null();
        for (s, l, i) in [(null, local, import), (spec, null, import), (spec, local, null)] {
            assert!(StencilModuleEntry::import_entry(s, l, i, 0, 0).is_err());
        }
        assert!(StencilModuleEntry::import_entry(spec, local, import, 0, 0).is_ok());
    }

    #[test]
    fn export_from_allows_a_missing_export_name() {
        let (_, [spec, _, import]) = names();
        let entry =
            StencilModuleEntry::export_from_entry(spec, import, TaggedParserAtomIndex::null(), 3, 1)
                .unwrap();
        assert!(entry.export_name.is_null());
        assert!(StencilModuleEntry::module_request(TaggedParserAtomIndex::null(), 0, 0).is_err());
    }

    #[test]
    fn init_module_preserves_source_order() {
        let (table, [spec, local, import]) = names();
        let mut heap = ObjectHeap::default();
        let mut cache = CompilationAtomCache::new();
        cache.instantiate_all(&table, &mut heap).unwrap();

        let metadata = StencilModuleMetadata {
            requested_modules: vec![
                StencilModuleEntry::module_request(spec, 1, 0).unwrap(),
                StencilModuleEntry::module_request(local, 2, 0).unwrap(),
            ],
            import_entries: vec![StencilModuleEntry::import_entry(spec, local, import, 1, 0).unwrap()],
            is_async: true,
            ..Default::default()
        };
        let module = heap.new_module().unwrap();
        metadata.init_module(&cache, &mut heap, module, Vec::new()).unwrap();

        let Some(Cell::Module(Some(tables))) = heap.get(module) else {
            panic!("module was not initialized");
        };
        assert!(tables.is_async);
        let lines: Vec<u32> = tables.requested_modules.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2]);
        let import_entry = tables.import_entries[0];
        assert_eq!(heap.atom_chars(import_entry.import_name.unwrap()), Some(utf16!("y")));
        assert_eq!(import_entry.export_name, None);
    }
}
