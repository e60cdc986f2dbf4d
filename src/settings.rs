//! Fragment Backend Settings & Device Capabilities
//!
//! Everything the shader generator needs to know about its environment is
//! gathered in [`FragendSettings`]: what the device can do ([`DeviceCaps`]),
//! which diagnostics are enabled ([`DebugFlags`]) and how the program cache
//! is sized ([`CacheSettings`]).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cg_pipeline::settings::{DebugFlags, DeviceCaps, FragendSettings, GlslVersion};
//!
//! // Desktop GL 3.2 core profile, debug flags from `CG_DEBUG`.
//! let settings = FragendSettings {
//!     caps: DeviceCaps::default(),
//!     debug: DebugFlags::from_env(),
//!     ..Default::default()
//! };
//!
//! // OpenGL ES 2.0 device.
//! let settings = FragendSettings {
//!     caps: DeviceCaps::gles2(),
//!     ..Default::default()
//! };
//! ```

use bitflags::bitflags;

use crate::pipeline::TextureType;

// ---------------------------------------------------------------------------
// GlslVersion
// ---------------------------------------------------------------------------

/// Shading language version targeted by generated shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlslVersion {
    /// Version number as written in the `#version` pragma (`100`, `150`, `300`).
    pub number: u32,
    /// `true` for GLSL ES.
    pub es: bool,
}

impl Default for GlslVersion {
    #[inline]
    fn default() -> Self {
        Self::GLSL_150
    }
}

impl GlslVersion {
    pub const GLSL_120: Self = Self { number: 120, es: false };
    pub const GLSL_130: Self = Self { number: 130, es: false };
    pub const GLSL_150: Self = Self { number: 150, es: false };
    pub const GLSL_ES_100: Self = Self { number: 100, es: true };
    pub const GLSL_ES_300: Self = Self { number: 300, es: true };

    /// Parses the string reported for `GL_SHADING_LANGUAGE_VERSION`.
    ///
    /// Accepts desktop strings such as `"4.60 NVIDIA"` or `"1.30"` and ES
    /// strings such as `"OpenGL ES GLSL ES 3.00"`.
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let es = version.contains("GLSL ES");
        let numeric = version
            .split_whitespace()
            .find(|word| word.starts_with(|c: char| c.is_ascii_digit()))?;

        let mut parts = numeric.split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor_str: String = parts
            .next()
            .unwrap_or("0")
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        // "1.3" means 1.30, "4.60" means 4.60.
        let minor: u32 = match minor_str.len() {
            0 => 0,
            1 => minor_str.parse::<u32>().ok()? * 10,
            _ => minor_str[..2].parse().ok()?,
        };

        Some(Self {
            number: major.checked_mul(100)?.checked_add(minor)?,
            es,
        })
    }

    /// Whether the version uses `in`/`out` and the overloaded `texture()`
    /// lookup instead of `varying` and `texture2D()`.
    #[inline]
    #[must_use]
    pub fn is_modern(&self) -> bool {
        if self.es {
            self.number >= 300
        } else {
            self.number >= 130
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceCaps
// ---------------------------------------------------------------------------

/// Capabilities of the device the shaders are generated for.
///
/// Detected once when the context is created; see
/// `GlShaderCompiler::detect_caps` for the GL implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Language version of generated shaders.
    pub glsl: GlslVersion,

    /// The driver performs the alpha test in fixed function, so it is left
    /// out of generated shaders.
    pub fixed_function_alpha_test: bool,

    /// Alpha-only textures are supported natively. Otherwise they are stored
    /// in the red channel and the sampled value must be swizzled.
    pub alpha_textures: bool,

    /// Two-channel textures are supported natively. Otherwise they are stored
    /// as RGBA and the sampled value must be masked.
    pub texture_rg: bool,

    /// 3D textures are available. On GLSL ES 1.00 this requires
    /// `GL_OES_texture_3D`.
    pub texture_3d: bool,

    /// Rectangle textures are available. GLSL before 1.40 needs
    /// `GL_ARB_texture_rectangle` for `sampler2DRect`.
    pub texture_rectangle: bool,
}

impl Default for DeviceCaps {
    /// Desktop GL 3.2 core profile.
    fn default() -> Self {
        Self {
            glsl: GlslVersion::GLSL_150,
            fixed_function_alpha_test: false,
            alpha_textures: false,
            texture_rg: true,
            texture_3d: true,
            texture_rectangle: true,
        }
    }
}

impl DeviceCaps {
    /// Desktop GL 2.1 compatibility profile.
    #[must_use]
    pub fn gl21() -> Self {
        Self {
            glsl: GlslVersion::GLSL_120,
            fixed_function_alpha_test: true,
            alpha_textures: true,
            texture_rg: false,
            texture_3d: true,
            texture_rectangle: true,
        }
    }

    /// OpenGL ES 2.0.
    #[must_use]
    pub fn gles2() -> Self {
        Self {
            glsl: GlslVersion::GLSL_ES_100,
            fixed_function_alpha_test: false,
            alpha_textures: true,
            texture_rg: false,
            texture_3d: false,
            texture_rectangle: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn modern_glsl(&self) -> bool {
        self.glsl.is_modern()
    }

    /// Name of the texture sampling function for `ty`.
    #[must_use]
    pub fn texture_function(&self, ty: TextureType) -> String {
        if self.modern_glsl() {
            "texture".to_string()
        } else {
            format!("texture{}", ty.target_suffix())
        }
    }

    /// Storage qualifier of interpolated fragment inputs.
    #[inline]
    #[must_use]
    pub fn input_keyword(&self) -> &'static str {
        if self.modern_glsl() { "in" } else { "varying" }
    }
}

// ---------------------------------------------------------------------------
// DebugFlags
// ---------------------------------------------------------------------------

bitflags! {
    /// Diagnostics switches.
    ///
    /// Usually read from the `CG_DEBUG` environment variable, a comma
    /// separated list such as `disable-program-caches,show-source`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Every pipeline generates its own shader; nothing is shared.
        const DISABLE_PROGRAM_CACHES = 1 << 0;
        /// Texture lookups return opaque white.
        const DISABLE_TEXTURING      = 1 << 1;
        /// Log every generated fragment shader.
        const SHOW_SOURCE            = 1 << 2;
    }
}

impl DebugFlags {
    /// Name of the environment variable read by [`from_env`](Self::from_env).
    pub const ENV_VAR: &'static str = "CG_DEBUG";

    /// Parses a list of flag names separated by commas, colons or spaces.
    ///
    /// Unknown names are logged and ignored. `all` enables every flag.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let mut flags = Self::empty();
        for name in list
            .split([',', ':', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            match name.to_ascii_lowercase().replace('_', "-").as_str() {
                "disable-program-caches" => flags |= Self::DISABLE_PROGRAM_CACHES,
                "disable-texturing" => flags |= Self::DISABLE_TEXTURING,
                "show-source" => flags |= Self::SHOW_SOURCE,
                "all" => flags = Self::all(),
                _ => log::warn!("Unknown {} flag '{name}'", Self::ENV_VAR),
            }
        }
        flags
    }

    /// Reads the flags from `CG_DEBUG`; empty when the variable is unset.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(Self::ENV_VAR)
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// CacheSettings
// ---------------------------------------------------------------------------

/// Sizing of the program cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// The table is never pruned below this many entries.
    pub min_size: usize,

    /// A warning is logged once the number of unique templates reaches this
    /// value; it usually means the application creates pipelines that differ
    /// in code-relevant state every frame.
    pub unique_warning_threshold: usize,

    /// Evict templates no pipeline uses any more when the table doubles past
    /// its expected size. When disabled the cache only grows.
    pub prune_unused: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            min_size: 16,
            unique_warning_threshold: 50,
            prune_unused: true,
        }
    }
}

// ---------------------------------------------------------------------------
// FragendSettings
// ---------------------------------------------------------------------------

/// Configuration of the fragment shader backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragendSettings {
    pub caps: DeviceCaps,
    pub debug: DebugFlags,
    pub cache: CacheSettings,
}
