//! GLSL expressions for layer combine functions.
//!
//! The caller resolves each argument source to a `vec4` expression (a texel
//! variable, the previous layer, a constant uniform); this module applies the
//! operand and the function for one channel mask.

use std::fmt::Write;

use crate::pipeline::{CombineChannel, CombineFunc, CombineOp};

/// Writes one parenthesised combine argument.
///
/// Alpha operands replicate the alpha channel to as many components as
/// `swizzle` selects; one-minus operands subtract from white.
pub(crate) fn write_arg(out: &mut String, base: &str, op: CombineOp, swizzle: &str) {
    out.push('(');

    if op.is_one_minus() {
        let _ = write!(out, "vec4(1.0, 1.0, 1.0, 1.0).{swizzle} - ");
    }

    let swizzle = if op.reads_alpha() {
        &"aaaa"[..swizzle.len().min(4)]
    } else {
        swizzle
    };
    let _ = write!(out, "{base}.{swizzle}");

    out.push(')');
}

/// Writes `  cg_layer.<swizzle> = <expression>;` for `channel`.
///
/// `bases[i]` is the expression of argument `i`.
pub(crate) fn write_masked_combine(
    out: &mut String,
    swizzle: &str,
    channel: &CombineChannel,
    bases: &[String; 3],
) {
    let _ = write!(out, "  cg_layer.{swizzle} = ");

    let arg = |out: &mut String, i: usize, swizzle: &str| {
        write_arg(out, &bases[i], channel.ops[i], swizzle);
    };

    match channel.func {
        CombineFunc::Replace => arg(out, 0, swizzle),
        CombineFunc::Modulate => {
            arg(out, 0, swizzle);
            out.push_str(" * ");
            arg(out, 1, swizzle);
        }
        CombineFunc::Add => {
            arg(out, 0, swizzle);
            out.push_str(" + ");
            arg(out, 1, swizzle);
        }
        CombineFunc::AddSigned => {
            arg(out, 0, swizzle);
            out.push_str(" + ");
            arg(out, 1, swizzle);
            let _ = write!(out, " - vec4(0.5, 0.5, 0.5, 0.5).{swizzle}");
        }
        CombineFunc::Subtract => {
            arg(out, 0, swizzle);
            out.push_str(" - ");
            arg(out, 1, swizzle);
        }
        CombineFunc::Interpolate => {
            arg(out, 0, swizzle);
            out.push_str(" * ");
            arg(out, 2, swizzle);
            out.push_str(" + ");
            arg(out, 1, swizzle);
            let _ = write!(out, " * (vec4(1.0, 1.0, 1.0, 1.0).{swizzle} - ");
            arg(out, 2, swizzle);
            out.push(')');
        }
        CombineFunc::Dot3Rgb | CombineFunc::Dot3Rgba => {
            out.push_str("vec4(4.0 * ((");
            for (i, component) in ["r", "g", "b"].into_iter().enumerate() {
                if i > 0 {
                    out.push_str(" - 0.5) + (");
                }
                arg(out, 0, component);
                out.push_str(" - 0.5) * (");
                arg(out, 1, component);
            }
            let _ = write!(out, " - 0.5))).{swizzle}");
        }
    }

    out.push_str(";\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CombineSource;

    fn bases() -> [String; 3] {
        ["A".to_string(), "B".to_string(), "C".to_string()]
    }

    fn channel(func: CombineFunc, n: usize) -> CombineChannel {
        let args = [
            (CombineSource::Texture, CombineOp::SrcColor),
            (CombineSource::Previous, CombineOp::SrcColor),
            (CombineSource::Constant, CombineOp::SrcColor),
        ];
        CombineChannel::new(func, &args[..n])
    }

    fn combine(func: CombineFunc, n: usize, swizzle: &str) -> String {
        let mut out = String::new();
        write_masked_combine(&mut out, swizzle, &channel(func, n), &bases());
        out
    }

    #[test]
    fn operands() {
        let mut out = String::new();
        write_arg(&mut out, "cg_texel0", CombineOp::OneMinusSrcAlpha, "rgb");
        assert_eq!(out, "(vec4(1.0, 1.0, 1.0, 1.0).rgb - cg_texel0.aaa)");

        out.clear();
        write_arg(&mut out, "cg_color_in", CombineOp::SrcAlpha, "a");
        assert_eq!(out, "(cg_color_in.a)");

        out.clear();
        write_arg(&mut out, "cg_layer1", CombineOp::OneMinusSrcColor, "rgba");
        assert_eq!(out, "(vec4(1.0, 1.0, 1.0, 1.0).rgba - cg_layer1.rgba)");
    }

    #[test]
    fn simple_functions() {
        assert_eq!(combine(CombineFunc::Replace, 1, "rgba"), "  cg_layer.rgba = (A.rgba);\n");
        assert_eq!(
            combine(CombineFunc::Modulate, 2, "rgb"),
            "  cg_layer.rgb = (A.rgb) * (B.rgb);\n"
        );
        assert_eq!(combine(CombineFunc::Add, 2, "a"), "  cg_layer.a = (A.a) + (B.a);\n");
        assert_eq!(
            combine(CombineFunc::Subtract, 2, "a"),
            "  cg_layer.a = (A.a) - (B.a);\n"
        );
    }

    #[test]
    fn add_signed() {
        assert_eq!(
            combine(CombineFunc::AddSigned, 2, "rgba"),
            "  cg_layer.rgba = (A.rgba) + (B.rgba) - vec4(0.5, 0.5, 0.5, 0.5).rgba;\n"
        );
    }

    #[test]
    fn interpolate() {
        assert_eq!(
            combine(CombineFunc::Interpolate, 3, "rgb"),
            "  cg_layer.rgb = (A.rgb) * (C.rgb) + (B.rgb) * (vec4(1.0, 1.0, 1.0, 1.0).rgb - (C.rgb));\n"
        );
    }

    #[test]
    fn dot3() {
        assert_eq!(
            combine(CombineFunc::Dot3Rgba, 2, "rgba"),
            "  cg_layer.rgba = vec4(4.0 * (((A.r) - 0.5) * ((B.r) - 0.5) + \
             ((A.g) - 0.5) * ((B.g) - 0.5) + ((A.b) - 0.5) * ((B.b) - 0.5))).rgba;\n"
        );
    }
}
