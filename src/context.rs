//! The [`Context`] ties the pipeline graph, the fragment backend and the
//! shader compiler together.
//!
//! All mutations go through the context so the backend observes them and
//! drops shaders that no longer match their pipeline.
//!
//! ```rust,ignore
//! use cg_pipeline::{Color, Context, FragendSettings};
//!
//! let mut ctx = Context::new(FragendSettings::default(), compiler);
//! let p = ctx.new_pipeline();
//! ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1)))?;
//! ctx.set_layer_combine_string(p, 0, "RGBA = MODULATE(PREVIOUS, TEXTURE)")?;
//! let shader = ctx.flush_fragment_shader(p)?;
//! ```

use std::rc::Rc;

use crate::driver::{ShaderCompiler, ShaderHandle};
use crate::errors::Result;
use crate::fragend::{Fragend, FragendStats, select_fragend};
use crate::pipeline::{
    AlphaFunc, BlendState, Color, DepthState, Filters, LayerCombine, LayerHandle, PipelineGraph,
    PipelineHandle, Snippet, Texture, TextureType,
};
use crate::settings::FragendSettings;

pub struct Context {
    settings: FragendSettings,
    graph: PipelineGraph,
    fragend: Box<dyn Fragend>,
    compiler: Box<dyn ShaderCompiler>,
}

impl Context {
    pub fn new(settings: FragendSettings, compiler: impl ShaderCompiler + 'static) -> Self {
        log::info!(
            "Creating pipeline context: GLSL {} (es: {}), debug flags {:?}",
            settings.caps.glsl.number,
            settings.caps.glsl.es,
            settings.debug
        );
        Self {
            settings,
            graph: PipelineGraph::new(),
            fragend: select_fragend(settings),
            compiler: Box::new(compiler),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &FragendSettings {
        &self.settings
    }

    /// Read access to the graph for queries.
    #[must_use]
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    #[must_use]
    pub fn stats(&self) -> FragendStats {
        self.fragend.stats()
    }

    // ========================================================================
    // Pipeline lifetime
    // ========================================================================

    /// Creates a pipeline with default state.
    pub fn new_pipeline(&mut self) -> PipelineHandle {
        self.graph.new_pipeline()
    }

    /// Creates a pipeline that inherits all state from `parent`.
    pub fn copy(&mut self, parent: PipelineHandle) -> Result<PipelineHandle> {
        self.graph.copy(parent)
    }

    pub fn free_pipeline(&mut self, pipeline: PipelineHandle) -> Result<()> {
        self.graph.free_pipeline(pipeline, self.fragend.as_observer())?;
        self.fragend.collect_garbage(&mut *self.compiler);
        Ok(())
    }

    // ========================================================================
    // Pipeline state
    // ========================================================================

    pub fn set_color(&mut self, pipeline: PipelineHandle, color: Color) -> Result<()> {
        self.graph.set_color(pipeline, color, self.fragend.as_observer())
    }

    pub fn set_blend(&mut self, pipeline: PipelineHandle, blend: BlendState) -> Result<()> {
        self.graph.set_blend(pipeline, blend, self.fragend.as_observer())
    }

    pub fn set_depth(&mut self, pipeline: PipelineHandle, depth: DepthState) -> Result<()> {
        self.graph.set_depth(pipeline, depth, self.fragend.as_observer())
    }

    pub fn set_alpha_test(
        &mut self,
        pipeline: PipelineHandle,
        func: AlphaFunc,
        reference: f32,
    ) -> Result<()> {
        self.graph
            .set_alpha_test(pipeline, func, reference, self.fragend.as_observer())
    }

    pub fn set_point_size(&mut self, pipeline: PipelineHandle, size: f32) -> Result<()> {
        self.graph
            .set_point_size(pipeline, size, self.fragend.as_observer())
    }

    pub fn add_snippet(&mut self, pipeline: PipelineHandle, snippet: Snippet) -> Result<()> {
        self.graph
            .add_snippet(pipeline, snippet, self.fragend.as_observer())
    }

    // ========================================================================
    // Layer state
    // ========================================================================

    /// Returns the layer with `index`, creating it with default state.
    pub fn ensure_layer(&mut self, pipeline: PipelineHandle, index: u32) -> Result<LayerHandle> {
        self.graph
            .ensure_layer(pipeline, index, self.fragend.as_observer())
    }

    pub fn remove_layer(&mut self, pipeline: PipelineHandle, index: u32) -> Result<()> {
        self.graph
            .remove_layer(pipeline, index, self.fragend.as_observer())
    }

    pub fn set_layer_texture(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        texture: Option<Texture>,
    ) -> Result<()> {
        self.graph
            .set_layer_texture(pipeline, index, texture, self.fragend.as_observer())
    }

    pub fn set_layer_texture_type(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        ty: TextureType,
    ) -> Result<()> {
        self.graph
            .set_layer_texture_type(pipeline, index, ty, self.fragend.as_observer())
    }

    pub fn set_layer_filters(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        filters: Filters,
    ) -> Result<()> {
        self.graph
            .set_layer_filters(pipeline, index, filters, self.fragend.as_observer())
    }

    pub fn set_layer_combine(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        combine: LayerCombine,
    ) -> Result<()> {
        self.graph
            .set_layer_combine(pipeline, index, combine, self.fragend.as_observer())
    }

    /// Parses `description` and sets it as the layer's combine state. On a
    /// parse error the pipeline is left untouched.
    pub fn set_layer_combine_string(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        description: &str,
    ) -> Result<()> {
        self.graph.set_layer_combine_string(
            pipeline,
            index,
            description,
            self.fragend.as_observer(),
        )
    }

    pub fn set_layer_combine_constant(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        constant: Color,
    ) -> Result<()> {
        self.graph.set_layer_combine_constant(
            pipeline,
            index,
            constant,
            self.fragend.as_observer(),
        )
    }

    pub fn set_layer_point_sprite_coords(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        enable: bool,
    ) -> Result<()> {
        self.graph.set_layer_point_sprite_coords(
            pipeline,
            index,
            enable,
            self.fragend.as_observer(),
        )
    }

    pub fn add_layer_snippet(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        snippet: Snippet,
    ) -> Result<()> {
        self.graph
            .add_layer_snippet(pipeline, index, snippet, self.fragend.as_observer())
    }

    // ========================================================================
    // Fragment shaders
    // ========================================================================

    /// Generates and compiles the fragment shader of `pipeline` unless an
    /// equivalent one already exists.
    ///
    /// Returns `None` only when the backend produced no shader object.
    /// Compilation failures are logged, not returned.
    pub fn flush_fragment_shader(
        &mut self,
        pipeline: PipelineHandle,
    ) -> Result<Option<ShaderHandle>> {
        self.fragend
            .flush(&mut self.graph, &mut *self.compiler, pipeline)
    }

    /// Shader from the last flush, or `None` if the pipeline changed since.
    #[must_use]
    pub fn fragment_shader(&self, pipeline: PipelineHandle) -> Option<ShaderHandle> {
        self.fragend.shader(pipeline)
    }

    #[must_use]
    pub fn fragment_source(&self, pipeline: PipelineHandle) -> Option<Rc<str>> {
        self.fragend.source(pipeline)
    }

    #[must_use]
    pub fn fragment_source_hash(&self, pipeline: PipelineHandle) -> Option<u128> {
        self.fragend.source_hash(pipeline)
    }

    #[must_use]
    pub fn fragment_compile_succeeded(&self, pipeline: PipelineHandle) -> Option<bool> {
        self.fragend.compile_succeeded(pipeline)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.fragend.release_all(&mut *self.compiler);
    }
}
