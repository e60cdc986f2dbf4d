//! GLSL fragment backend.
//!
//! Shader states live in a side table keyed by pipeline handle. When a
//! pipeline is flushed for the first time its *shader authority* is looked
//! up: the oldest ancestor that would generate the same code. The state is
//! attached to that ancestor, to the pipeline, and to the program cache
//! template, so later flushes of any equivalent pipeline reuse the compiled
//! shader.
//!
//! Attachments are dropped when a pipeline changes code-relevant state or is
//! destroyed. A state whose last attachment goes away queues its shader
//! object for deletion; deletion happens on the next call that has access to
//! the [`ShaderCompiler`].

use std::rc::Rc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use xxhash_rust::xxh3::xxh3_128;

use super::assembler::{CodegenContext, SourceAssembler};
use super::shader_state::{CompiledShader, ShaderPhase, ShaderState, ShaderStateKey};
use super::{Fragend, FragendStats, codegen_layer_state, codegen_pipeline_state};
use crate::cache::PipelineCache;
use crate::driver::{ShaderCompiler, ShaderHandle, ShaderStage};
use crate::errors::Result;
use crate::pipeline::{
    LayerHandle, LayerState, PipelineGraph, PipelineHandle, PipelineState, StateObserver,
};
use crate::settings::{DebugFlags, FragendSettings};

pub struct GlslFragend {
    settings: FragendSettings,
    pipeline_state: PipelineState,
    layer_state: LayerState,

    cache: PipelineCache,
    states: SlotMap<ShaderStateKey, ShaderState>,
    attachments: FxHashMap<PipelineHandle, ShaderStateKey>,
    pending_deletes: Vec<ShaderHandle>,

    stats: FragendStats,
}

impl GlslFragend {
    #[must_use]
    pub fn new(settings: FragendSettings) -> Self {
        Self {
            pipeline_state: codegen_pipeline_state(&settings.caps),
            layer_state: codegen_layer_state(&settings.caps),
            cache: PipelineCache::new(&settings),
            settings,
            states: SlotMap::with_key(),
            attachments: FxHashMap::default(),
            pending_deletes: Vec::new(),
            stats: FragendStats::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &FragendSettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// Number of pipelines (user or template) sharing the shader state of
    /// `pipeline`.
    #[must_use]
    pub fn shader_state_refs(&self, pipeline: PipelineHandle) -> Option<usize> {
        self.state_of(pipeline).map(|s| s.ref_count)
    }

    /// Usage count of the cache entry behind the shader state of `pipeline`.
    #[must_use]
    pub fn cache_usage(&self, pipeline: PipelineHandle) -> Option<usize> {
        let entry = self.state_of(pipeline)?.cache_entry?;
        self.cache.fragment_entry(entry).map(|e| e.usage_count)
    }

    fn state_of(&self, pipeline: PipelineHandle) -> Option<&ShaderState> {
        self.attachments
            .get(&pipeline)
            .and_then(|&key| self.states.get(key))
    }

    /// Finds or creates the shader state for a pipeline that has none yet.
    fn find_shader_state(
        &mut self,
        graph: &mut PipelineGraph,
        pipeline: PipelineHandle,
    ) -> Result<ShaderStateKey> {
        // LAYERS is always part of the comparison; leaving it out of the
        // mask only keeps it from shortening the ancestor walk.
        let authority = graph.find_equivalent_parent(
            pipeline,
            self.pipeline_state.difference(PipelineState::LAYERS),
            self.layer_state,
        )?;

        let key = if let Some(&key) = self.attachments.get(&authority) {
            key
        } else {
            let mut cache_entry = None;
            let mut template = None;
            let mut shared = None;

            if !self
                .settings
                .debug
                .contains(DebugFlags::DISABLE_PROGRAM_CACHES)
            {
                let lookup = self.cache.get_fragment_template(graph, authority)?;
                for &pruned in &lookup.pruned {
                    self.detach(pruned);
                }
                if lookup.created {
                    self.stats.cache_misses += 1;
                } else {
                    self.stats.cache_hits += 1;
                }
                shared = self.attachments.get(&lookup.template).copied();
                cache_entry = Some(lookup.entry);
                template = Some(lookup.template);
            }

            let key = shared.unwrap_or_else(|| self.states.insert(ShaderState::new(cache_entry)));
            self.attach(authority, key);
            if let Some(template) = template {
                self.attach(template, key);
            }
            key
        };

        if authority != pipeline {
            self.attach(pipeline, key);
        }
        Ok(key)
    }

    fn attach(&mut self, pipeline: PipelineHandle, key: ShaderStateKey) {
        if self.attachments.get(&pipeline) == Some(&key) {
            return;
        }
        self.detach(pipeline);

        let Some(state) = self.states.get_mut(key) else {
            return;
        };
        state.ref_count += 1;
        if let Some(entry) = state
            .cache_entry
            .and_then(|k| self.cache.fragment_entry_mut(k))
            .filter(|e| e.template != pipeline)
        {
            entry.usage_count += 1;
        }
        self.attachments.insert(pipeline, key);
    }

    fn detach(&mut self, pipeline: PipelineHandle) {
        let Some(key) = self.attachments.remove(&pipeline) else {
            return;
        };
        let Some(state) = self.states.get_mut(key) else {
            return;
        };

        if let Some(entry) = state
            .cache_entry
            .and_then(|k| self.cache.fragment_entry_mut(k))
            .filter(|e| e.template != pipeline)
        {
            entry.usage_count = entry.usage_count.saturating_sub(1);
        }

        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count > 0 {
            return;
        }

        let compiled = self.states.remove(key).and_then(|s| match s.phase {
            ShaderPhase::Compiled(compiled) => Some(compiled),
            _ => None,
        });
        if let Some(compiled) = compiled {
            log::debug!("Releasing fragment shader {:?}", compiled.shader);
            self.pending_deletes.push(compiled.shader);
        }
    }
}

impl StateObserver for GlslFragend {
    fn pipeline_pre_change(&mut self, pipeline: PipelineHandle, change: PipelineState) {
        if change.intersects(self.pipeline_state) {
            self.detach(pipeline);
        }
    }

    fn layer_pre_change(&mut self, owner: PipelineHandle, _layer: LayerHandle, change: LayerState) {
        if change.intersects(self.layer_state) {
            self.detach(owner);
        }
    }

    fn pipeline_destroyed(&mut self, pipeline: PipelineHandle) {
        self.detach(pipeline);
    }
}

impl Fragend for GlslFragend {
    fn start(
        &mut self,
        graph: &mut PipelineGraph,
        compiler: &mut dyn ShaderCompiler,
        pipeline: PipelineHandle,
    ) -> Result<()> {
        self.collect_garbage(compiler);

        let key = match self.attachments.get(&pipeline) {
            Some(&key) => key,
            None => self.find_shader_state(graph, pipeline)?,
        };
        let Some(state) = self.states.get_mut(key) else {
            return Ok(());
        };
        if matches!(state.phase, ShaderPhase::Compiled(_)) {
            return Ok(());
        }

        let cx = CodegenContext {
            graph,
            pipeline,
            settings: &self.settings,
        };
        state.phase = ShaderPhase::Generating(Box::new(SourceAssembler::begin(cx)?));
        Ok(())
    }

    fn add_layer(
        &mut self,
        graph: &PipelineGraph,
        pipeline: PipelineHandle,
        layer: LayerHandle,
    ) -> Result<()> {
        let Some(state) = self
            .attachments
            .get(&pipeline)
            .and_then(|&key| self.states.get_mut(key))
        else {
            return Ok(());
        };
        if let ShaderPhase::Generating(asm) = &mut state.phase {
            asm.add_layer(graph, layer)?;
        }
        Ok(())
    }

    fn end(
        &mut self,
        graph: &PipelineGraph,
        compiler: &mut dyn ShaderCompiler,
        pipeline: PipelineHandle,
    ) -> Result<()> {
        let Some(state) = self
            .attachments
            .get(&pipeline)
            .and_then(|&key| self.states.get_mut(key))
        else {
            return Ok(());
        };
        let asm = match std::mem::take(&mut state.phase) {
            ShaderPhase::Generating(asm) => asm,
            other => {
                state.phase = other;
                return Ok(());
            }
        };

        let cx = CodegenContext {
            graph,
            pipeline,
            settings: &self.settings,
        };
        let source = asm.finish(cx)?;
        let source_hash = xxh3_128(source.as_bytes());

        if self.settings.debug.contains(DebugFlags::SHOW_SOURCE) {
            log::info!("Fragment shader for {pipeline:?}:\n{source}");
        }

        let shader = compiler.create_shader(ShaderStage::Fragment)?;
        self.stats.shaders_generated += 1;

        // Compile failures are not fatal; the pipeline keeps the shader and
        // renders whatever the driver makes of it.
        let compiled = match compiler.compile(shader, &source) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("{err}\n{source}");
                self.stats.compile_failures += 1;
                false
            }
        };

        log::debug!("Generated fragment shader {shader:?} for {pipeline:?} ({source_hash:032x})");

        state.phase = ShaderPhase::Compiled(CompiledShader {
            shader,
            source: Rc::from(source),
            source_hash,
            compiled,
        });
        Ok(())
    }

    fn shader(&self, pipeline: PipelineHandle) -> Option<ShaderHandle> {
        self.state_of(pipeline)?.compiled().map(|c| c.shader)
    }

    fn source(&self, pipeline: PipelineHandle) -> Option<Rc<str>> {
        self.state_of(pipeline)?
            .compiled()
            .map(|c| Rc::clone(&c.source))
    }

    fn source_hash(&self, pipeline: PipelineHandle) -> Option<u128> {
        self.state_of(pipeline)?.compiled().map(|c| c.source_hash)
    }

    fn compile_succeeded(&self, pipeline: PipelineHandle) -> Option<bool> {
        self.state_of(pipeline)?.compiled().map(|c| c.compiled)
    }

    fn stats(&self) -> FragendStats {
        FragendStats {
            live_shader_states: self.states.len(),
            cache_entries: self.cache.fragment_templates().len(),
            ..self.stats
        }
    }

    fn collect_garbage(&mut self, compiler: &mut dyn ShaderCompiler) {
        for shader in self.pending_deletes.drain(..) {
            compiler.delete_shader(shader);
        }
    }

    fn release_all(&mut self, compiler: &mut dyn ShaderCompiler) {
        self.attachments.clear();
        for (_, state) in self.states.drain() {
            if let ShaderPhase::Compiled(compiled) = state.phase {
                self.pending_deletes.push(compiled.shader);
            }
        }
        self.collect_garbage(compiler);
    }

    fn as_observer(&mut self) -> &mut dyn StateObserver {
        self
    }
}
