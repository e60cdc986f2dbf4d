//! Pipeline and layer state groups.
//!
//! Every piece of pipeline state belongs to exactly one [`PipelineState`]
//! group and every piece of layer state to one [`LayerState`] group. A node
//! in the delta chain records which groups it is the *authority* for in its
//! `differences` mask; lookups walk up the chain until they reach the first
//! node whose mask contains the requested group.
//!
//! The code generators only care about a subset of these groups. Which subset
//! depends on the device, see [`crate::fragend::codegen_pipeline_state`].

use bitflags::bitflags;

bitflags! {
    /// Pipeline-level state groups.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PipelineState: u32 {
        const COLOR                = 1 << 0;
        const BLEND                = 1 << 1;
        const DEPTH                = 1 << 2;
        const ALPHA_FUNC           = 1 << 3;
        const ALPHA_FUNC_REFERENCE = 1 << 4;
        const POINT_SIZE           = 1 << 5;
        const LAYERS               = 1 << 6;
        const FRAGMENT_SNIPPETS    = 1 << 7;
    }
}

bitflags! {
    /// Layer-level state groups.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct LayerState: u32 {
        /// Texture unit (position of the layer within its pipeline).
        const UNIT                = 1 << 0;
        const TEXTURE_TYPE        = 1 << 1;
        const TEXTURE_DATA        = 1 << 2;
        const TEXTURE_COMPONENTS  = 1 << 3;
        const FILTERS             = 1 << 4;
        const COMBINE             = 1 << 5;
        const COMBINE_CONSTANT    = 1 << 6;
        const POINT_SPRITE_COORDS = 1 << 7;
        const FRAGMENT_SNIPPETS   = 1 << 8;
    }
}

/// Alpha test comparison.
///
/// A fragment passes the test when `fragment_alpha <op> reference` holds;
/// failing fragments are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaFunc {
    Never,
    Less,
    Equal,
    Lequal,
    Greater,
    Notequal,
    Gequal,
    #[default]
    Always,
}

impl AlphaFunc {
    /// Returns whether `alpha` passes the test against `reference`.
    ///
    /// Compares exactly, like the generated shader.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn passes(self, alpha: f32, reference: f32) -> bool {
        match self {
            Self::Never => false,
            Self::Less => alpha < reference,
            Self::Equal => alpha == reference,
            Self::Lequal => alpha <= reference,
            Self::Greater => alpha > reference,
            Self::Notequal => alpha != reference,
            Self::Gequal => alpha >= reference,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Fixed-function blending. Never affects fragment code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            src: BlendFactor::One,
            dst: BlendFactor::OneMinusSrcAlpha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
}

/// Texture target of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
    Cube,
    Rectangle,
}

impl TextureType {
    /// Suffix used for sampler types and legacy lookup functions
    /// (`sampler2D`, `texture2D`).
    #[must_use]
    pub fn target_suffix(self) -> &'static str {
        match self {
            Self::Texture1D => "1D",
            Self::Texture2D => "2D",
            Self::Texture3D => "3D",
            Self::Cube => "Cube",
            Self::Rectangle => "2DRect",
        }
    }

    /// Swizzle selecting the lookup coordinates from a `vec4` texture
    /// coordinate.
    #[must_use]
    pub fn coord_swizzle(self) -> &'static str {
        match self {
            Self::Texture1D => "s",
            Self::Texture2D | Self::Rectangle => "st",
            Self::Texture3D | Self::Cube => "stp",
        }
    }
}

/// Which channels the bound texture actually stores.
///
/// Only matters for code generation on devices that cannot express alpha-only
/// or two-channel textures natively, see
/// [`DeviceCaps`](crate::settings::DeviceCaps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureComponents {
    #[default]
    Rgba,
    Rg,
    Alpha,
}

/// Opaque identifier of a texture object owned by the texture subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Everything a layer needs to know about the texture bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture {
    pub id: TextureId,
    pub ty: TextureType,
    pub components: TextureComponents,
}

impl Texture {
    #[must_use]
    pub fn new_2d(id: u32) -> Self {
        Self {
            id: TextureId(id),
            ty: TextureType::Texture2D,
            components: TextureComponents::Rgba,
        }
    }

    #[must_use]
    pub fn with_type(mut self, ty: TextureType) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn with_components(mut self, components: TextureComponents) -> Self {
        self.components = components;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
    LinearMipmapLinear,
}

/// Sampler filters of a layer. Never affects fragment code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Filters {
    pub min: Filter,
    pub mag: Filter,
}

/// RGBA color with `f32` channels, hashed and compared bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color(pub [f32; 4]);

impl Color {
    pub const WHITE: Self = Self([1.0, 1.0, 1.0, 1.0]);
    pub const TRANSPARENT: Self = Self([0.0, 0.0, 0.0, 0.0]);

    #[must_use]
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }
}

impl Eq for Color {}

impl std::hash::Hash for Color {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for c in self.0 {
            c.to_bits().hash(state);
        }
    }
}
