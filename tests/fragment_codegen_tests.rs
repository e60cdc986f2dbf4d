//! Fragment Shader Generation Tests
//!
//! Tests for:
//! - Source layout (prelude, declarations, generated function, main)
//! - Combine expressions for every function and operand
//! - Lazy layer generation driven by combine references
//! - Alpha test emission and device capabilities
//! - Snippet hooks at global, fragment, layer and texture lookup level

mod common;

use std::rc::Rc;

use cg_pipeline::{
    AlphaFunc, Context, DebugFlags, DeviceCaps, FragendSettings, GlslVersion, PipelineHandle, Snippet,
    SnippetHook, Texture, TextureComponents, TextureType,
};

use common::{context, context_for, context_with};

fn flush_source(ctx: &mut Context, p: PipelineHandle) -> Rc<str> {
    ctx.flush_fragment_shader(p).unwrap().expect("shader");
    ctx.fragment_source(p).expect("source")
}

fn position(source: &str, needle: &str) -> usize {
    source
        .find(needle)
        .unwrap_or_else(|| panic!("'{needle}' not found in:\n{source}"))
}

// ============================================================================
// Source layout
// ============================================================================

#[test]
fn empty_pipeline_forwards_primary_color() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    let source = flush_source(&mut ctx, p);

    assert!(source.starts_with("#version 150\n"));
    assert!(source.contains("void\ncg_generated_source ()\n{\n  cg_color_out = cg_color_in;\n}\n"));
    assert!(source.ends_with("\nvoid\nmain ()\n{\n  cg_generated_source ();\n}\n"));
    assert!(!source.contains("discard"));
}

#[test]
fn single_texture_layer() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(7))).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("in vec4 cg_tex_coord0_in;\n"));
    assert!(source.contains("uniform sampler2D cg_sampler0;\n"));
    assert!(source.contains("vec4 cg_texel0;\n"));
    assert!(source.contains("vec4 cg_layer0;\n"));
    assert!(source.contains("  return texture (tex, coords.st);\n"));
    assert!(source.contains(
        "\nvec4\ncg_texture_lookup0 (sampler2D cg_sampler, vec4 cg_tex_coord)\n{\n  \
         return cg_real_texture_lookup0 (cg_sampler, cg_tex_coord);\n}\n"
    ));
    assert!(source.contains("  cg_layer.rgba = (cg_color_in.rgba) * (cg_texel0.rgba);\n"));

    let lookup = position(&source, "  cg_texel0 = cg_texture_lookup0 (cg_sampler0, cg_tex_coord0_in);\n");
    let layer = position(&source, "  cg_layer0 = cg_generate_layer0 ();\n");
    let out = position(&source, "  cg_color_out = cg_layer0;\n");
    assert!(lookup < layer && layer < out);
}

#[test]
fn legacy_glsl_uses_suffixed_lookup() {
    let (mut ctx, _) = context_for(DeviceCaps::gl21());
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.starts_with("#version 120\n"));
    assert!(source.contains("varying vec4 cg_tex_coord0_in;\n"));
    assert!(source.contains("  return texture2D (tex, coords.st);\n"));
    assert!(source.contains("#define cg_color_out gl_FragColor"));
}

#[test]
fn texture_type_selects_sampler_and_coordinates() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1).with_type(TextureType::Cube)))
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("uniform samplerCube cg_sampler0;\n"));
    assert!(source.contains("cg_real_texture_lookup0 (samplerCube tex,"));
    assert!(source.contains("  return texture (tex, coords.stp);\n"));
}

#[test]
fn rectangle_layer_on_legacy_glsl_enables_extension() {
    let (mut ctx, _) = context_for(DeviceCaps::gl21());
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1).with_type(TextureType::Rectangle)))
        .unwrap();
    let source = flush_source(&mut ctx, p);

    let extension = position(&source, "#extension GL_ARB_texture_rectangle : enable\n");
    let sampler = position(&source, "uniform sampler2DRect cg_sampler0;\n");
    assert!(extension < sampler);
    assert!(source.contains("  return texture2DRect (tex, coords.st);\n"));
}

#[test]
fn gles3_3d_layer_declares_sampler_precision() {
    let caps = DeviceCaps {
        glsl: GlslVersion::GLSL_ES_300,
        texture_rg: true,
        texture_3d: true,
        ..DeviceCaps::gles2()
    };
    let (mut ctx, _) = context_for(caps);
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1).with_type(TextureType::Texture3D)))
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.starts_with("#version 300 es\n"));
    let precision = position(&source, "precision highp sampler3D;\n");
    let sampler = position(&source, "uniform sampler3D cg_sampler0;\n");
    assert!(precision < sampler);
}

// ============================================================================
// Combine expressions
// ============================================================================

#[test]
fn separate_channels_get_separate_statements() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGB = MODULATE(PREVIOUS, TEXTURE) A = REPLACE(PREVIOUS)")
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  cg_layer.rgb = (cg_color_in.rgb) * (cg_texel0.rgb);\n"));
    assert!(source.contains("  cg_layer.a = (cg_color_in.a);\n"));
    assert!(!source.contains("cg_layer.rgba ="));
}

#[test]
fn operands_in_generated_code() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(
        p,
        0,
        "RGB = ADD_SIGNED(1 - TEXTURE, PREVIOUS[A]) A = SUBTRACT(1 - PRIMARY, TEXTURE)",
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains(
        "  cg_layer.rgb = (vec4(1.0, 1.0, 1.0, 1.0).rgb - cg_texel0.rgb) + (cg_color_in.aaa) \
         - vec4(0.5, 0.5, 0.5, 0.5).rgb;\n"
    ));
    assert!(source.contains(
        "  cg_layer.a = (vec4(1.0, 1.0, 1.0, 1.0).a - cg_color_in.a) - (cg_texel0.a);\n"
    ));
}

#[test]
fn interpolate_with_constant() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGBA = INTERPOLATE(TEXTURE, PREVIOUS, CONSTANT[A])")
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("uniform vec4 _cg_layer_constant_0;\n"));
    assert!(source.contains(
        "  cg_layer.rgba = (cg_texel0.rgba) * (_cg_layer_constant_0.aaaa) + (cg_color_in.rgba) * \
         (vec4(1.0, 1.0, 1.0, 1.0).rgba - (_cg_layer_constant_0.aaaa));\n"
    ));
}

#[test]
fn constant_uniform_declared_once() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGB = MODULATE(CONSTANT, TEXTURE) A = ADD(CONSTANT, PREVIOUS)")
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert_eq!(source.matches("uniform vec4 _cg_layer_constant_0;").count(), 1);
}

#[test]
fn dot3_rgba_overrides_alpha() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGB = DOT3_RGBA(TEXTURE, PREVIOUS) A = REPLACE(PRIMARY)")
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains(
        "  cg_layer.rgba = vec4(4.0 * (((cg_texel0.r) - 0.5) * ((cg_color_in.r) - 0.5) + "
    ));
    assert!(source.contains(" - 0.5))).rgba;\n"));
    assert!(!source.contains("cg_layer.a ="));
}

#[test]
fn dot3_rgb_keeps_alpha_statement() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGB = DOT3_RGB(TEXTURE, PREVIOUS) A = REPLACE(PRIMARY)")
        .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains(" - 0.5))).rgb;\n"));
    assert!(source.contains("  cg_layer.a = (cg_color_in.a);\n"));
}

// ============================================================================
// Layer dependencies
// ============================================================================

#[test]
fn previous_chains_layers_in_order() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.set_layer_texture(p, 1, Some(Texture::new_2d(2))).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  cg_layer.rgba = (cg_layer0.rgba) * (cg_texel1.rgba);\n"));

    let texel0 = position(&source, "  cg_texel0 = ");
    let layer0 = position(&source, "  cg_layer0 = cg_generate_layer0 ();");
    let texel1 = position(&source, "  cg_texel1 = ");
    let layer1 = position(&source, "  cg_layer1 = cg_generate_layer1 ();");
    let out = position(&source, "  cg_color_out = cg_layer1;");
    assert!(texel0 < layer0 && layer0 < texel1 && texel1 < layer1 && layer1 < out);
}

#[test]
fn unreferenced_layers_are_not_generated() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.set_layer_combine_string(p, 1, "RGBA = REPLACE(PRIMARY)").unwrap();
    let source = flush_source(&mut ctx, p);

    // Declarations exist for every layer.
    assert!(source.contains("uniform sampler2D cg_sampler0;\n"));
    assert!(source.contains("uniform sampler2D cg_sampler1;\n"));

    assert!(!source.contains("cg_generate_layer0"));
    assert!(!source.contains("cg_texel0"));
    assert!(!source.contains("cg_texel1"));
    assert!(source.contains("  cg_layer.rgba = (cg_color_in.rgba);\n"));
    assert!(source.contains("  cg_color_out = cg_layer1;\n"));
}

#[test]
fn texture_n_samples_other_layer_only() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.set_layer_combine_string(p, 1, "RGBA = REPLACE(TEXTURE_0)").unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  cg_layer.rgba = (cg_texel0.rgba);\n"));
    assert!(source.contains("  cg_texel0 = cg_texture_lookup0 (cg_sampler0, cg_tex_coord0_in);\n"));
    assert_eq!(source.matches("vec4 cg_texel0;").count(), 1);
    assert!(!source.contains("cg_generate_layer0"));
}

#[test]
fn missing_texture_layer_reads_white() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_combine_string(p, 0, "RGBA = MODULATE(PREVIOUS, TEXTURE_7)").unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("(cg_color_in.rgba) * (vec4 (1.0, 1.0, 1.0, 1.0).rgba)"));
    assert!(!source.contains("cg_texel7"));
}

#[test]
fn removed_layer_is_not_generated() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.set_layer_texture(p, 1, Some(Texture::new_2d(2))).unwrap();
    ctx.remove_layer(p, 1).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(!source.contains("cg_sampler1"));
    assert!(source.contains("  cg_color_out = cg_layer0;\n"));
}

// ============================================================================
// Alpha test
// ============================================================================

#[test]
fn alpha_test_discards_with_inverted_comparison() {
    let cases = [
        (AlphaFunc::Less, ">="),
        (AlphaFunc::Equal, "!="),
        (AlphaFunc::Lequal, ">"),
        (AlphaFunc::Greater, "<="),
        (AlphaFunc::Notequal, "=="),
        (AlphaFunc::Gequal, "<"),
    ];

    for (func, op) in cases {
        let (mut ctx, _) = context();
        let p = ctx.new_pipeline();
        ctx.set_alpha_test(p, func, 0.5).unwrap();
        let source = flush_source(&mut ctx, p);

        assert!(source.contains("uniform float _cg_alpha_test_ref;\n"), "{func:?}");
        assert!(
            source.contains(&format!(
                "  cg_color_out = cg_color_in;\n  if (cg_color_out.a {op} _cg_alpha_test_ref)\n    discard;\n}}\n"
            )),
            "{func:?}:\n{source}"
        );
    }
}

#[test]
fn alpha_test_never_always_discards() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_alpha_test(p, AlphaFunc::Never, 0.0).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  cg_color_out = cg_color_in;\n  discard;\n}\n"));
    assert!(!source.contains("_cg_alpha_test_ref"));
}

#[test]
fn fixed_function_alpha_test_is_left_to_the_driver() {
    let (mut ctx, _) = context_for(DeviceCaps::gl21());
    let p = ctx.new_pipeline();
    ctx.set_alpha_test(p, AlphaFunc::Less, 0.5).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(!source.contains("discard"));
}

// ============================================================================
// Device capabilities & debug flags
// ============================================================================

#[test]
fn point_sprite_coordinates() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_point_sprite_coords(p, 0, true).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains(
        "  cg_texel0 = cg_texture_lookup0 (cg_sampler0, vec4 (cg_point_coord, 0.0, 1.0));\n"
    ));
}

#[test]
fn disabled_texturing_samples_white() {
    let (mut ctx, _) = context_with(FragendSettings {
        debug: DebugFlags::DISABLE_TEXTURING,
        ..Default::default()
    });
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  return vec4 (1.0, 1.0, 1.0, 1.0);\n"));
    assert!(!source.contains("texture (tex"));
}

#[test]
fn alpha_only_texture_is_swizzled_without_native_support() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(
        p,
        0,
        Some(Texture::new_2d(1).with_components(TextureComponents::Alpha)),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("  return vec4 (0.0, 0.0, 0.0, texture (tex, coords.st).r);\n"));
}

#[test]
fn rg_texture_is_masked_without_native_support() {
    let (mut ctx, _) = context_for(DeviceCaps::gles2());
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(
        p,
        0,
        Some(Texture::new_2d(1).with_components(TextureComponents::Rg)),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.starts_with("#version 100\n"));
    assert!(source.contains("precision highp float;"));
    assert!(source.contains("  return vec4 (texture2D (tex, coords.st).rg, 0.0, 1.0);\n"));
}

// ============================================================================
// Snippets
// ============================================================================

#[test]
fn global_snippet_declarations_precede_generated_code() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.add_snippet(
        p,
        Snippet::new(SnippetHook::FragmentGlobals, Some("uniform float tint;\n"), None),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(position(&source, "uniform float tint;\n") < position(&source, "cg_generated_source ()"));
}

#[test]
fn fragment_snippet_wraps_main() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.add_snippet(
        p,
        Snippet::new(SnippetHook::Fragment, None, Some("  cg_color_out.r = 1.0;\n"))
            .with_pre("  float unused = 0.0;\n"),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.ends_with(
        "\nvoid\nmain ()\n{\n  float unused = 0.0;\n  cg_generated_source ();\n  cg_color_out.r = 1.0;\n}\n"
    ));
}

#[test]
fn fragment_replace_skips_layer_and_alpha_code() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.set_alpha_test(p, AlphaFunc::Greater, 0.5).unwrap();
    ctx.add_snippet(
        p,
        Snippet::new(SnippetHook::Fragment, None, None).with_replace("  cg_color_out = vec4 (1.0);\n"),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains("void\ncg_generated_source ()\n{\n}\n"));
    assert!(!source.contains("cg_generate_layer0"));
    assert!(!source.contains("discard"));
    assert!(source.contains("main ()\n{\n  cg_color_out = vec4 (1.0);\n}\n"));
}

#[test]
fn layer_replace_skips_combine_dependencies() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.add_layer_snippet(
        p,
        0,
        Snippet::new(SnippetHook::LayerFragment, None, None)
            .with_replace("  cg_layer = vec4 (0.5);\n"),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(!source.contains("cg_real_generate_layer0"));
    assert!(!source.contains("cg_texel0 ="));
    assert!(source.contains(
        "\nvec4\ncg_generate_layer0 ()\n{\n  vec4 cg_layer;\n\n  cg_layer = vec4 (0.5);\n  return cg_layer;\n}\n"
    ));
    assert!(source.contains("  cg_layer0 = cg_generate_layer0 ();\n"));
}

#[test]
fn texture_lookup_snippet_chains_real_lookup() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    ctx.set_layer_texture(p, 0, Some(Texture::new_2d(1))).unwrap();
    ctx.add_layer_snippet(
        p,
        0,
        Snippet::new(SnippetHook::TextureLookup, None, Some("  cg_texel.rgb *= 2.0;\n")),
    )
    .unwrap();
    let source = flush_source(&mut ctx, p);

    assert!(source.contains(
        "cg_texture_lookup0 (sampler2D cg_sampler, vec4 cg_tex_coord)\n{\n  vec4 cg_texel;\n\n  \
         cg_texel = cg_real_texture_lookup0 (cg_sampler, cg_tex_coord);\n  cg_texel.rgb *= 2.0;\n  \
         return cg_texel;\n}\n"
    ));
}

#[test]
fn snippet_hooks_are_validated() {
    let (mut ctx, _) = context();
    let p = ctx.new_pipeline();
    assert!(ctx
        .add_snippet(p, Snippet::new(SnippetHook::TextureLookup, None, None))
        .is_err());
    assert!(ctx
        .add_layer_snippet(p, 0, Snippet::new(SnippetHook::Fragment, None, None))
        .is_err());
}
