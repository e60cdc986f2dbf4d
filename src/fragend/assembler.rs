//! Incremental fragment source generation.
//!
//! The source is built in two buffers. The *header* collects global
//! declarations and helper functions; the *body* is the `cg_generated_source`
//! function that runs them. Layers are only generated when something reads
//! them: [`SourceAssembler::finish`] pulls the last layer, which pulls the
//! layers and texture lookups its combine arguments reference. Unreferenced
//! layers cost nothing.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use super::boilerplate::fragment_prelude;
use super::combine_codegen::write_masked_combine;
use super::snippet_codegen::{HookFunction, write_declarations};
use crate::errors::Result;
use crate::pipeline::snippet::has_replace_hook;
use crate::pipeline::{
    AlphaFunc, CombineChannel, CombineFunc, CombineSource, LayerHandle, PipelineGraph,
    PipelineHandle, SnippetHook, TextureComponents,
};
use crate::settings::{DebugFlags, FragendSettings};

static MISSING_LAYER_WARNED: AtomicBool = AtomicBool::new(false);

/// What the generator reads while assembling one shader.
#[derive(Clone, Copy)]
pub(crate) struct CodegenContext<'a> {
    pub graph: &'a PipelineGraph,
    pub pipeline: PipelineHandle,
    pub settings: &'a FragendSettings,
}

#[derive(Debug, Clone, Copy, Default)]
struct UnitState {
    sampled: bool,
    combine_constant_used: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingLayer {
    layer: LayerHandle,
    index: u32,
    /// Layer index of the layer added before this one.
    previous: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct SourceAssembler {
    header: String,
    source: String,
    pending: Vec<PendingLayer>,
    unit_state: Vec<UnitState>,
}

impl SourceAssembler {
    /// Emits the per-layer declarations and global snippets and opens the
    /// generated function.
    pub(crate) fn begin(cx: CodegenContext<'_>) -> Result<Self> {
        let layers = cx.graph.layers(cx.pipeline)?;
        let mut asm = Self {
            header: String::with_capacity(1024),
            source: String::with_capacity(512),
            pending: Vec::with_capacity(layers.len()),
            unit_state: vec![UnitState::default(); layers.len()],
        };

        let input = cx.settings.caps.input_keyword();
        for &layer in &layers {
            let index = cx.graph.layer_index(layer)?;
            let ty = cx.graph.layer_texture_type(layer)?;
            let _ = writeln!(asm.header, "{input} vec4 cg_tex_coord{index}_in;");
            let _ = writeln!(
                asm.header,
                "uniform sampler{} cg_sampler{index};",
                ty.target_suffix()
            );
        }

        write_declarations(
            &mut asm.header,
            SnippetHook::FragmentGlobals,
            cx.graph.snippets(cx.pipeline)?,
        );

        asm.source.push_str("void\ncg_generated_source ()\n{\n");
        Ok(asm)
    }

    /// Queues `layer`. Layers must be added in unit order.
    pub(crate) fn add_layer(&mut self, graph: &PipelineGraph, layer: LayerHandle) -> Result<()> {
        let index = graph.layer_index(layer)?;
        let previous = self.pending.last().map(|l| l.index);
        self.pending.push(PendingLayer {
            layer,
            index,
            previous,
        });
        Ok(())
    }

    /// Generates the code for the last layer and everything it depends on,
    /// then returns the complete shader source.
    pub(crate) fn finish(mut self, cx: CodegenContext<'_>) -> Result<String> {
        let snippets = cx.graph.snippets(cx.pipeline)?;

        if !has_replace_hook(snippets, SnippetHook::Fragment) {
            if let Some(last) = self.pending.last().map(|l| l.index) {
                self.ensure_layer_generated(cx, last)?;
                let _ = writeln!(self.source, "  cg_color_out = cg_layer{last};");
            } else {
                self.source.push_str("  cg_color_out = cg_color_in;\n");
            }

            if !cx.settings.caps.fixed_function_alpha_test {
                self.add_alpha_test(cx)?;
            }
        }

        self.source.push_str("}\n");

        HookFunction {
            hook: SnippetHook::Fragment,
            chain_function: "cg_generated_source",
            final_name: "main",
            function_prefix: "cg_fragment_hook",
            return_type: None,
            return_variable: "",
            arguments: "",
            argument_declarations: "",
        }
        .write(&mut self.source, snippets);

        let prelude = fragment_prelude(&cx.settings.caps)?;
        let mut full = String::with_capacity(prelude.len() + self.header.len() + self.source.len() + 1);
        full.push_str(&prelude);
        full.push('\n');
        full.push_str(&self.header);
        full.push_str(&self.source);
        Ok(full)
    }

    fn ensure_layer_generated(&mut self, cx: CodegenContext<'_>, index: u32) -> Result<()> {
        // Already generated when it is no longer pending.
        let Some(pos) = self.pending.iter().position(|l| l.index == index) else {
            return Ok(());
        };
        let pending = self.pending.remove(pos);
        let graph = cx.graph;

        let combine = graph.layer_combine(pending.layer)?;
        let snippets = graph.layer_snippets(pending.layer)?;

        let _ = writeln!(self.header, "vec4 cg_layer{index};");

        // A replaced layer must not pull in other layers: their globals
        // would stay uninitialised if nothing calls their generators.
        if !has_replace_hook(snippets, SnippetHook::LayerFragment) {
            self.ensure_args_for_channel(cx, pending, &combine.rgb)?;
            self.ensure_args_for_channel(cx, pending, &combine.alpha)?;

            let _ = write!(
                self.header,
                "vec4\ncg_real_generate_layer{index} ()\n{{\n  vec4 cg_layer;\n"
            );

            // DOT3_RGBA overrides the alpha function too.
            if !combine.needs_separate_channels() || combine.rgb.func == CombineFunc::Dot3Rgba {
                self.append_masked_combine(cx, pending, "rgba", &combine.rgb)?;
            } else {
                self.append_masked_combine(cx, pending, "rgb", &combine.rgb)?;
                self.append_masked_combine(cx, pending, "a", &combine.alpha)?;
            }

            self.header.push_str("  return cg_layer;\n}\n");
        }

        let chain_function = format!("cg_real_generate_layer{index}");
        let final_name = format!("cg_generate_layer{index}");
        HookFunction {
            hook: SnippetHook::LayerFragment,
            chain_function: &chain_function,
            final_name: &final_name,
            function_prefix: &final_name,
            return_type: Some("vec4"),
            return_variable: "cg_layer",
            arguments: "",
            argument_declarations: "",
        }
        .write(&mut self.header, snippets);

        let _ = writeln!(self.source, "  cg_layer{index} = cg_generate_layer{index} ();");
        Ok(())
    }

    fn ensure_args_for_channel(
        &mut self,
        cx: CodegenContext<'_>,
        pending: PendingLayer,
        channel: &CombineChannel,
    ) -> Result<()> {
        for (source, _) in channel.args() {
            self.ensure_arg_generated(cx, pending, source)?;
        }
        Ok(())
    }

    fn ensure_arg_generated(
        &mut self,
        cx: CodegenContext<'_>,
        pending: PendingLayer,
        source: CombineSource,
    ) -> Result<()> {
        match source {
            CombineSource::PrimaryColor => {}
            CombineSource::Constant => {
                let unit = cx.graph.layer_unit(pending.layer)?;
                match self.unit_state.get_mut(unit) {
                    Some(state) if !state.combine_constant_used => {
                        state.combine_constant_used = true;
                    }
                    _ => return Ok(()),
                }
                let _ = writeln!(
                    self.header,
                    "uniform vec4 _cg_layer_constant_{};",
                    pending.index
                );
            }
            CombineSource::Previous => {
                if let Some(previous) = pending.previous {
                    self.ensure_layer_generated(cx, previous)?;
                }
            }
            CombineSource::Texture => self.ensure_texture_lookup_generated(cx, pending.layer)?,
            CombineSource::TextureLayer(n) => {
                if let Some(other) = cx.graph.layer(cx.pipeline, n)? {
                    self.ensure_texture_lookup_generated(cx, other)?;
                }
            }
        }
        Ok(())
    }

    fn ensure_texture_lookup_generated(
        &mut self,
        cx: CodegenContext<'_>,
        layer: LayerHandle,
    ) -> Result<()> {
        let graph = cx.graph;
        let caps = &cx.settings.caps;
        let unit = graph.layer_unit(layer)?;
        match self.unit_state.get_mut(unit) {
            Some(state) if !state.sampled => state.sampled = true,
            _ => return Ok(()),
        }

        let index = graph.layer_index(layer)?;
        let ty = graph.layer_texture_type(layer)?;
        let target = ty.target_suffix();

        let _ = writeln!(self.header, "vec4 cg_texel{index};");

        let _ = write!(
            self.source,
            "  cg_texel{index} = cg_texture_lookup{index} (cg_sampler{index}, "
        );
        if graph.layer_point_sprite_coords(layer)? {
            self.source.push_str("vec4 (cg_point_coord, 0.0, 1.0)");
        } else {
            let _ = write!(self.source, "cg_tex_coord{index}_in");
        }
        self.source.push_str(");\n");

        let snippets = graph.layer_snippets(layer)?;

        // No need for the real lookup when a snippet replaces it.
        if !has_replace_hook(snippets, SnippetHook::TextureLookup) {
            let _ = write!(
                self.header,
                "vec4\ncg_real_texture_lookup{index} (sampler{target} tex,\n\
                 {:indent$}vec4 coords)\n{{\n",
                "",
                indent = "cg_real_texture_lookup (".len() + index.to_string().len(),
            );

            if cx.settings.debug.contains(DebugFlags::DISABLE_TEXTURING) {
                self.header.push_str("  return vec4 (1.0, 1.0, 1.0, 1.0);\n");
            } else {
                let lookup = format!(
                    "{} (tex, coords.{})",
                    caps.texture_function(ty),
                    ty.coord_swizzle()
                );
                match graph.layer_texture_components(layer)? {
                    // Stored in the red channel.
                    TextureComponents::Alpha if !caps.alpha_textures => {
                        let _ = writeln!(self.header, "  return vec4 (0.0, 0.0, 0.0, {lookup}.r);");
                    }
                    // Stored as RGBA with undefined blue and alpha.
                    TextureComponents::Rg if !caps.texture_rg => {
                        let _ = writeln!(self.header, "  return vec4 ({lookup}.rg, 0.0, 1.0);");
                    }
                    _ => {
                        let _ = writeln!(self.header, "  return {lookup};");
                    }
                }
            }

            self.header.push_str("}\n");
        }

        let chain_function = format!("cg_real_texture_lookup{index}");
        let final_name = format!("cg_texture_lookup{index}");
        let function_prefix = format!("cg_texture_lookup_hook{index}");
        let argument_declarations = format!("sampler{target} cg_sampler, vec4 cg_tex_coord");
        HookFunction {
            hook: SnippetHook::TextureLookup,
            chain_function: &chain_function,
            final_name: &final_name,
            function_prefix: &function_prefix,
            return_type: Some("vec4"),
            return_variable: "cg_texel",
            arguments: "cg_sampler, cg_tex_coord",
            argument_declarations: &argument_declarations,
        }
        .write(&mut self.header, snippets);

        Ok(())
    }

    fn append_masked_combine(
        &mut self,
        cx: CodegenContext<'_>,
        pending: PendingLayer,
        swizzle: &str,
        channel: &CombineChannel,
    ) -> Result<()> {
        let mut bases: [String; 3] = Default::default();
        for (i, (source, _)) in channel.args().enumerate() {
            bases[i] = self.arg_base(cx, pending, source)?;
        }
        write_masked_combine(&mut self.header, swizzle, channel, &bases);
        Ok(())
    }

    /// The `vec4` expression a combine source reads.
    fn arg_base(
        &self,
        cx: CodegenContext<'_>,
        pending: PendingLayer,
        source: CombineSource,
    ) -> Result<String> {
        Ok(match source {
            CombineSource::Texture => format!("cg_texel{}", pending.index),
            CombineSource::Constant => format!("_cg_layer_constant_{}", pending.index),
            CombineSource::Previous => match pending.previous {
                Some(previous) => format!("cg_layer{previous}"),
                None => "cg_color_in".to_string(),
            },
            CombineSource::PrimaryColor => "cg_color_in".to_string(),
            CombineSource::TextureLayer(n) => match cx.graph.layer(cx.pipeline, n)? {
                Some(other) => format!("cg_texel{}", cx.graph.layer_index(other)?),
                None => {
                    if !MISSING_LAYER_WARNED.swap(true, Ordering::Relaxed) {
                        log::warn!(
                            "The application is trying to use a texture combine with a layer \
                             number that does not exist"
                        );
                    }
                    "vec4 (1.0, 1.0, 1.0, 1.0)".to_string()
                }
            },
        })
    }

    fn add_alpha_test(&mut self, cx: CodegenContext<'_>) -> Result<()> {
        // Inverted: the fragment is discarded when the test fails.
        let discard_if = match cx.graph.alpha_func(cx.pipeline)? {
            AlphaFunc::Always => return Ok(()),
            AlphaFunc::Never => {
                self.source.push_str("  discard;\n");
                return Ok(());
            }
            AlphaFunc::Less => ">=",
            AlphaFunc::Equal => "!=",
            AlphaFunc::Lequal => ">",
            AlphaFunc::Greater => "<=",
            AlphaFunc::Notequal => "==",
            AlphaFunc::Gequal => "<",
        };

        self.header.push_str("uniform float _cg_alpha_test_ref;\n");
        let _ = write!(
            self.source,
            "  if (cg_color_out.a {discard_if} _cg_alpha_test_ref)\n    discard;\n"
        );
        Ok(())
    }
}
