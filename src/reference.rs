//! CPU evaluation of a pipeline's fragment stage.
//!
//! Computes the color the generated shader would write for one fragment,
//! given the interpolated primary color and the texel each layer samples.
//! Useful for checking generated code against expected output without a GPU.

use rustc_hash::FxHashMap;

use crate::errors::{PipelineError, Result};
use crate::pipeline::{
    CombineChannel, CombineFunc, CombineSource, PipelineGraph, PipelineHandle,
};

type Vec4 = [f32; 4];

const WHITE: Vec4 = [1.0; 4];

/// Per-fragment inputs.
#[derive(Debug, Clone, Default)]
pub struct FragmentInputs {
    pub primary_color: Vec4,
    /// Sampled texel per layer index. Layers without an entry sample opaque
    /// white.
    pub texels: FxHashMap<u32, Vec4>,
}

impl FragmentInputs {
    #[must_use]
    pub fn new(primary_color: Vec4) -> Self {
        Self {
            primary_color,
            texels: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_texel(mut self, layer_index: u32, texel: Vec4) -> Self {
        self.texels.insert(layer_index, texel);
        self
    }

    fn texel(&self, layer_index: u32) -> Vec4 {
        self.texels.get(&layer_index).copied().unwrap_or(WHITE)
    }
}

/// Returns the clamped output color, or `None` when the alpha test on the
/// unclamped alpha discards the fragment.
///
/// Snippets hold arbitrary GLSL, so pipelines using any are rejected.
pub fn evaluate(
    graph: &PipelineGraph,
    pipeline: PipelineHandle,
    inputs: &FragmentInputs,
) -> Result<Option<Vec4>> {
    if !graph.snippets(pipeline)?.is_empty() {
        return Err(PipelineError::SnippetsNotEvaluable);
    }

    let layers = graph.layers(pipeline)?;
    let mut previous: Option<Vec4> = None;

    for &layer in &layers {
        if !graph.layer_snippets(layer)?.is_empty() {
            return Err(PipelineError::SnippetsNotEvaluable);
        }

        let index = graph.layer_index(layer)?;
        let constant = graph.layer_combine_constant(layer)?.0;
        let combine = graph.layer_combine(layer)?;

        let source_value = |source: CombineSource| -> Result<Vec4> {
            Ok(match source {
                CombineSource::Texture => inputs.texel(index),
                CombineSource::Constant => constant,
                CombineSource::PrimaryColor => inputs.primary_color,
                CombineSource::Previous => previous.unwrap_or(inputs.primary_color),
                CombineSource::TextureLayer(n) => match graph.layer(pipeline, n)? {
                    Some(_) => inputs.texel(n),
                    None => WHITE,
                },
            })
        };

        let result = if !combine.needs_separate_channels()
            || combine.rgb.func == CombineFunc::Dot3Rgba
        {
            eval_channel(&combine.rgb, &source_value)?
        } else {
            let rgb = eval_channel(&combine.rgb, &source_value)?;
            let alpha = eval_channel(&combine.alpha, &source_value)?;
            [rgb[0], rgb[1], rgb[2], alpha[3]]
        };
        previous = Some(result);
    }

    let color = previous.unwrap_or(inputs.primary_color);

    // The test sees the unclamped output, clamping happens on write.
    let func = graph.alpha_func(pipeline)?;
    let reference = graph.alpha_func_reference(pipeline)?;
    if !func.passes(color[3], reference) {
        return Ok(None);
    }
    Ok(Some(color.map(|c| c.clamp(0.0, 1.0))))
}

/// Evaluates `channel` on all four components; the caller picks the ones it
/// needs.
fn eval_channel(
    channel: &CombineChannel,
    source_value: &dyn Fn(CombineSource) -> Result<Vec4>,
) -> Result<Vec4> {
    let mut args = [[0.0; 4]; 3];
    for (i, (source, op)) in channel.args().enumerate() {
        let mut value = source_value(source)?;
        if op.reads_alpha() {
            value = [value[3]; 4];
        }
        if op.is_one_minus() {
            value = value.map(|c| 1.0 - c);
        }
        args[i] = value;
    }
    let [a, b, c] = args;

    let out = match channel.func {
        CombineFunc::Replace => a,
        CombineFunc::Modulate => std::array::from_fn(|i| a[i] * b[i]),
        CombineFunc::Add => std::array::from_fn(|i| a[i] + b[i]),
        CombineFunc::AddSigned => std::array::from_fn(|i| a[i] + b[i] - 0.5),
        CombineFunc::Subtract => std::array::from_fn(|i| a[i] - b[i]),
        CombineFunc::Interpolate => std::array::from_fn(|i| a[i] * c[i] + b[i] * (1.0 - c[i])),
        CombineFunc::Dot3Rgb | CombineFunc::Dot3Rgba => {
            let dot = (0..3).map(|i| (a[i] - 0.5) * (b[i] - 0.5)).sum::<f32>();
            [4.0 * dot; 4]
        }
    };
    Ok(out)
}
