//! Texture combine description of a layer.
//!
//! A layer computes its output color with one [`CombineChannel`] for RGB and
//! one for alpha, in the style of the GL texture-environment combiner. Each
//! channel applies a [`CombineFunc`] to up to three arguments; every argument
//! names a [`CombineSource`] and an operand modifier ([`CombineOp`]).

use super::combine_string::{CombineStringError, parse_combine_string};

/// Arithmetic rule applied to the combine arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineFunc {
    /// `arg0`
    Replace,
    /// `arg0 * arg1`
    Modulate,
    /// `arg0 + arg1`
    Add,
    /// `arg0 + arg1 - 0.5`
    AddSigned,
    /// `arg0 - arg1`
    Subtract,
    /// `arg0 * arg2 + arg1 * (1 - arg2)`
    Interpolate,
    /// `4 * dot(arg0.rgb - 0.5, arg1.rgb - 0.5)` broadcast to RGB.
    Dot3Rgb,
    /// Like [`Dot3Rgb`](Self::Dot3Rgb) but also overrides the alpha channel.
    Dot3Rgba,
}

impl CombineFunc {
    /// Number of arguments the function reads.
    #[must_use]
    pub fn n_args(self) -> usize {
        match self {
            Self::Replace => 1,
            Self::Modulate
            | Self::Add
            | Self::AddSigned
            | Self::Subtract
            | Self::Dot3Rgb
            | Self::Dot3Rgba => 2,
            Self::Interpolate => 3,
        }
    }

    #[must_use]
    pub fn is_dot3(self) -> bool {
        matches!(self, Self::Dot3Rgb | Self::Dot3Rgba)
    }
}

/// Where a combine argument reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineSource {
    /// The layer's own sampled texel.
    Texture,
    /// The layer's combine constant.
    Constant,
    /// The interpolated vertex color.
    PrimaryColor,
    /// The result of the previous layer, or the primary color for the first
    /// layer.
    Previous,
    /// The texel sampled by the layer with the given layer index.
    TextureLayer(u32),
}

/// Operand modifier applied to a combine argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineOp {
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl CombineOp {
    #[must_use]
    pub fn is_one_minus(self) -> bool {
        matches!(self, Self::OneMinusSrcColor | Self::OneMinusSrcAlpha)
    }

    #[must_use]
    pub fn reads_alpha(self) -> bool {
        matches!(self, Self::SrcAlpha | Self::OneMinusSrcAlpha)
    }
}

/// Combine function plus its arguments for one channel group.
///
/// Only the first [`CombineFunc::n_args`] entries of `sources` and `ops`
/// are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CombineChannel {
    pub func: CombineFunc,
    pub sources: [CombineSource; 3],
    pub ops: [CombineOp; 3],
}

impl CombineChannel {
    /// Builds a channel from the used arguments only; unused slots are
    /// normalised so that structurally identical channels compare equal.
    #[must_use]
    pub fn new(func: CombineFunc, args: &[(CombineSource, CombineOp)]) -> Self {
        let mut sources = [CombineSource::Previous; 3];
        let mut ops = [CombineOp::SrcColor; 3];
        for (i, &(src, op)) in args.iter().take(func.n_args()).enumerate() {
            sources[i] = src;
            ops[i] = op;
        }
        Self { func, sources, ops }
    }

    /// The used `(source, op)` pairs.
    pub fn args(&self) -> impl Iterator<Item = (CombineSource, CombineOp)> + '_ {
        self.sources
            .iter()
            .copied()
            .zip(self.ops.iter().copied())
            .take(self.func.n_args())
    }
}

/// Full combine state of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerCombine {
    pub rgb: CombineChannel,
    pub alpha: CombineChannel,
}

impl Default for LayerCombine {
    /// `RGBA = MODULATE(PREVIOUS, TEXTURE)`
    fn default() -> Self {
        Self {
            rgb: CombineChannel::new(
                CombineFunc::Modulate,
                &[
                    (CombineSource::Previous, CombineOp::SrcColor),
                    (CombineSource::Texture, CombineOp::SrcColor),
                ],
            ),
            alpha: CombineChannel::new(
                CombineFunc::Modulate,
                &[
                    (CombineSource::Previous, CombineOp::SrcAlpha),
                    (CombineSource::Texture, CombineOp::SrcAlpha),
                ],
            ),
        }
    }
}

impl LayerCombine {
    /// Parses a combine description such as
    /// `"RGBA = MODULATE(PREVIOUS, TEXTURE)"` or
    /// `"RGB = ADD(TEXTURE, PREVIOUS[A])  A = REPLACE(PREVIOUS)"`.
    pub fn parse(description: &str) -> Result<Self, CombineStringError> {
        parse_combine_string(description)
    }

    /// Returns true when the RGB and alpha channels cannot be evaluated as a
    /// single `rgba` expression.
    #[must_use]
    pub fn needs_separate_channels(&self) -> bool {
        if self.rgb.func != self.alpha.func {
            return true;
        }

        for i in 0..self.rgb.func.n_args() {
            if self.rgb.sources[i] != self.alpha.sources[i] {
                return true;
            }
            // Reading the color or the alpha of a source is the same thing
            // for the alpha channel, so only the one-minus part must agree.
            if self.rgb.ops[i].is_one_minus() != self.alpha.ops[i].is_one_minus() {
                return true;
            }
            if !self.alpha.ops[i].reads_alpha() {
                return true;
            }
        }

        false
    }

    /// Every source referenced by either channel.
    pub fn sources(&self) -> impl Iterator<Item = CombineSource> + '_ {
        self.rgb
            .args()
            .chain(self.alpha.args())
            .map(|(src, _)| src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_combine_is_unseparated() {
        assert!(!LayerCombine::default().needs_separate_channels());
    }

    #[test]
    fn different_functions_need_separation() {
        let mut combine = LayerCombine::default();
        combine.alpha = CombineChannel::new(
            CombineFunc::Replace,
            &[(CombineSource::Previous, CombineOp::SrcAlpha)],
        );
        assert!(combine.needs_separate_channels());
    }

    #[test]
    fn one_minus_mismatch_needs_separation() {
        let mut combine = LayerCombine::default();
        combine.rgb.ops[1] = CombineOp::OneMinusSrcColor;
        assert!(combine.needs_separate_channels());
    }

    #[test]
    fn rgb_reading_alpha_does_not_need_separation() {
        let mut combine = LayerCombine::default();
        combine.rgb.ops[0] = CombineOp::SrcAlpha;
        assert!(!combine.needs_separate_channels());
    }

    #[test]
    fn unused_arguments_are_normalised() {
        let a = CombineChannel::new(
            CombineFunc::Replace,
            &[
                (CombineSource::Texture, CombineOp::SrcColor),
                (CombineSource::Constant, CombineOp::SrcAlpha),
            ],
        );
        let b = CombineChannel::new(
            CombineFunc::Replace,
            &[(CombineSource::Texture, CombineOp::SrcColor)],
        );
        assert_eq!(a, b);
    }
}
