//! Version pragma and standard definitions prepended to every generated
//! fragment shader.

use std::sync::OnceLock;

use minijinja::{Environment, syntax::SyntaxConfig};
use serde::Serialize;

use crate::errors::Result;
use crate::settings::DeviceCaps;

static PRELUDE_ENV: OnceLock<Environment<'static>> = OnceLock::new();

const PRELUDE_TEMPLATE: &str = "fragment_prelude";

fn get_env() -> &'static Environment<'static> {
    PRELUDE_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure template syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

        env.add_template(
            PRELUDE_TEMPLATE,
            include_str!("shaders/fragment_prelude.glsl"),
        )
        .expect("Failed to parse fragment prelude");

        env
    })
}

#[derive(Serialize)]
struct PreludeContext {
    version: u32,
    es: bool,
    es_suffix: bool,
    modern: bool,
    sampler3d_precision: bool,
    extensions: Vec<&'static str>,
}

impl PreludeContext {
    fn new(caps: &DeviceCaps) -> Self {
        let mut extensions = Vec::new();
        if caps.glsl.es && !caps.modern_glsl() && caps.texture_3d {
            extensions.push("GL_OES_texture_3D");
        }
        // `sampler2DRect` is core from GLSL 1.40.
        if !caps.glsl.es && caps.glsl.number < 140 && caps.texture_rectangle {
            extensions.push("GL_ARB_texture_rectangle");
        }

        Self {
            version: caps.glsl.number,
            es: caps.glsl.es,
            // GLSL ES 1.00 has no profile suffix.
            es_suffix: caps.glsl.es && caps.glsl.number >= 300,
            modern: caps.modern_glsl(),
            // GLSL ES has no default precision for sampler3D.
            sampler3d_precision: caps.glsl.es && caps.texture_3d,
            extensions,
        }
    }
}

/// Renders the prelude for `caps`.
pub(crate) fn fragment_prelude(caps: &DeviceCaps) -> Result<String> {
    let template = get_env().get_template(PRELUDE_TEMPLATE)?;
    Ok(template.render(PreludeContext::new(caps))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_core_prelude() {
        let prelude = fragment_prelude(&DeviceCaps::default()).unwrap();
        assert!(prelude.starts_with("#version 150\n"));
        assert!(prelude.contains("out vec4 _cg_frag_color;"));
        assert!(prelude.contains("#define cg_color_in _cg_color"));
        assert!(!prelude.contains("precision"));
        assert!(!prelude.contains("#extension"));
    }

    #[test]
    fn gles2_prelude() {
        let caps = DeviceCaps {
            texture_3d: true,
            ..DeviceCaps::gles2()
        };
        let prelude = fragment_prelude(&caps).unwrap();
        assert!(prelude.starts_with("#version 100\n"));
        assert!(prelude.contains("#extension GL_OES_texture_3D : enable"));
        assert!(prelude.contains("precision highp float;"));
        assert!(prelude.contains("#define cg_color_out gl_FragColor"));
    }

    #[test]
    fn gles3_prelude_has_profile_suffix() {
        let caps = DeviceCaps {
            glsl: crate::settings::GlslVersion::GLSL_ES_300,
            ..DeviceCaps::gles2()
        };
        let prelude = fragment_prelude(&caps).unwrap();
        assert!(prelude.starts_with("#version 300 es\n"));
        assert!(prelude.contains("in vec4 _cg_color;"));
        assert!(!prelude.contains("sampler3D"));
    }

    #[test]
    fn gles3_declares_sampler3d_precision() {
        let caps = DeviceCaps {
            glsl: crate::settings::GlslVersion::GLSL_ES_300,
            texture_3d: true,
            ..DeviceCaps::gles2()
        };
        let prelude = fragment_prelude(&caps).unwrap();
        assert!(prelude.contains("precision highp float;\nprecision highp sampler3D;\n"));
        assert!(!prelude.contains("#extension"));
    }

    #[test]
    fn legacy_desktop_enables_rectangle_extension() {
        let prelude = fragment_prelude(&DeviceCaps::gl21()).unwrap();
        assert!(prelude.contains("#extension GL_ARB_texture_rectangle : enable\n"));
        assert!(!prelude.contains("precision"));

        let without = DeviceCaps {
            texture_rectangle: false,
            ..DeviceCaps::gl21()
        };
        assert!(!fragment_prelude(&without).unwrap().contains("GL_ARB_texture_rectangle"));
        assert!(!fragment_prelude(&DeviceCaps::default()).unwrap().contains("GL_ARB_texture_rectangle"));
    }
}
