//! Program cache.
//!
//! Pipelines that are not related through the graph can still generate the
//! same fragment shader. The cache keys a template pipeline on exactly the
//! state that affects code generation, so the fragment backend can find an
//! already generated shader for any equivalent pipeline.

mod hash_table;

pub use hash_table::{CacheEntry, CacheEntryKey, PipelineHashTable, TemplateLookup};

use crate::errors::Result;
use crate::fragend::{codegen_layer_state, codegen_pipeline_state};
use crate::pipeline::{PipelineGraph, PipelineHandle};
use crate::settings::FragendSettings;

pub struct PipelineCache {
    fragment_hash: PipelineHashTable,
}

impl PipelineCache {
    #[must_use]
    pub fn new(settings: &FragendSettings) -> Self {
        Self {
            fragment_hash: PipelineHashTable::new(
                "fragment shaders",
                codegen_pipeline_state(&settings.caps),
                codegen_layer_state(&settings.caps),
                settings.cache,
            ),
        }
    }

    /// Returns the entry whose template generates the same fragment shader
    /// as `key_pipeline`.
    pub fn get_fragment_template(
        &mut self,
        graph: &mut PipelineGraph,
        key_pipeline: PipelineHandle,
    ) -> Result<TemplateLookup> {
        self.fragment_hash.get(graph, key_pipeline)
    }

    #[must_use]
    pub fn fragment_entry(&self, key: CacheEntryKey) -> Option<&CacheEntry> {
        self.fragment_hash.entry(key)
    }

    pub fn fragment_entry_mut(&mut self, key: CacheEntryKey) -> Option<&mut CacheEntry> {
        self.fragment_hash.entry_mut(key)
    }

    #[must_use]
    pub fn fragment_templates(&self) -> &PipelineHashTable {
        &self.fragment_hash
    }
}
