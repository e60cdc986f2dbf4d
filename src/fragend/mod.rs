//! Fragment shader backends.
//!
//! A [`Fragend`] turns the fragment-relevant state of a pipeline into a
//! compiled shader. Generation is driven in three steps so a backend can
//! build the source incrementally:
//!
//! 1. [`Fragend::start`] finds or creates the pipeline's shader state. If a
//!    compiled shader can be reused nothing else happens.
//! 2. [`Fragend::add_layer`] is called for every layer in unit order.
//! 3. [`Fragend::end`] finishes the source and compiles it.
//!
//! [`Fragend::flush`] runs the whole sequence. Backends also observe graph
//! mutations (see [`StateObserver`]) to drop shaders that no longer match
//! their pipelines.

mod assembler;
mod boilerplate;
mod combine_codegen;
pub mod glsl;
mod shader_state;
mod snippet_codegen;

pub use glsl::GlslFragend;

use std::rc::Rc;

use crate::driver::{ShaderCompiler, ShaderHandle};
use crate::errors::Result;
use crate::pipeline::{LayerHandle, LayerState, PipelineGraph, PipelineHandle, PipelineState, StateObserver};
use crate::settings::{DeviceCaps, FragendSettings};

/// Counters describing the work done by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragendStats {
    /// Shaders generated and handed to the compiler.
    pub shaders_generated: usize,
    /// Of those, how many the driver rejected.
    pub compile_failures: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Shader states currently alive.
    pub live_shader_states: usize,
    /// Templates currently held by the program cache.
    pub cache_entries: usize,
}

pub trait Fragend: StateObserver {
    fn start(
        &mut self,
        graph: &mut PipelineGraph,
        compiler: &mut dyn ShaderCompiler,
        pipeline: PipelineHandle,
    ) -> Result<()>;

    fn add_layer(
        &mut self,
        graph: &PipelineGraph,
        pipeline: PipelineHandle,
        layer: LayerHandle,
    ) -> Result<()>;

    fn end(
        &mut self,
        graph: &PipelineGraph,
        compiler: &mut dyn ShaderCompiler,
        pipeline: PipelineHandle,
    ) -> Result<()>;

    /// Compiled shader of `pipeline`, if it has been flushed since its last
    /// code-relevant change.
    fn shader(&self, pipeline: PipelineHandle) -> Option<ShaderHandle>;

    /// Complete source of the shader returned by [`shader`](Self::shader).
    fn source(&self, pipeline: PipelineHandle) -> Option<Rc<str>>;

    /// xxh3-128 of [`source`](Self::source).
    fn source_hash(&self, pipeline: PipelineHandle) -> Option<u128>;

    /// Whether the driver accepted the shader.
    fn compile_succeeded(&self, pipeline: PipelineHandle) -> Option<bool>;

    fn stats(&self) -> FragendStats;

    /// Deletes shader objects no pipeline refers to any more.
    fn collect_garbage(&mut self, compiler: &mut dyn ShaderCompiler);

    /// Drops every shader state and deletes every shader object.
    fn release_all(&mut self, compiler: &mut dyn ShaderCompiler);

    fn as_observer(&mut self) -> &mut dyn StateObserver;

    /// Makes sure `pipeline` has a compiled fragment shader and returns it.
    fn flush(
        &mut self,
        graph: &mut PipelineGraph,
        compiler: &mut dyn ShaderCompiler,
        pipeline: PipelineHandle,
    ) -> Result<Option<ShaderHandle>> {
        self.start(graph, compiler, pipeline)?;
        for layer in graph.layers(pipeline)? {
            self.add_layer(graph, pipeline, layer)?;
        }
        self.end(graph, compiler, pipeline)?;
        Ok(self.shader(pipeline))
    }
}

/// Picks the backend for the device.
///
/// GLSL is the only backend; every supported device runs programmable
/// fragment processing.
#[must_use]
pub fn select_fragend(settings: FragendSettings) -> Box<dyn Fragend> {
    log::debug!(
        "Using GLSL fragment backend, GLSL {}{}",
        settings.caps.glsl.number,
        if settings.caps.glsl.es { " ES" } else { "" }
    );
    Box::new(GlslFragend::new(settings))
}

/// Pipeline state that affects the generated fragment shader.
#[must_use]
pub fn codegen_pipeline_state(caps: &DeviceCaps) -> PipelineState {
    let mut state = PipelineState::LAYERS | PipelineState::FRAGMENT_SNIPPETS;
    // The reference value is a uniform and never affects the code.
    if !caps.fixed_function_alpha_test {
        state |= PipelineState::ALPHA_FUNC;
    }
    state
}

/// Layer state that affects the generated fragment shader.
#[must_use]
pub fn codegen_layer_state(caps: &DeviceCaps) -> LayerState {
    let mut state = LayerState::COMBINE
        | LayerState::TEXTURE_TYPE
        | LayerState::UNIT
        | LayerState::FRAGMENT_SNIPPETS
        | LayerState::POINT_SPRITE_COORDS;
    if !caps.alpha_textures || !caps.texture_rg {
        state |= LayerState::TEXTURE_COMPONENTS;
    }
    state
}
