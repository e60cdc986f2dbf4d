#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod context;
pub mod driver;
pub mod errors;
pub mod fragend;
pub mod pipeline;
pub mod reference;
pub mod settings;

pub use context::Context;
pub use driver::{ShaderCompiler, ShaderHandle, ShaderStage};
#[cfg(feature = "gl")]
pub use driver::GlShaderCompiler;
pub use errors::{PipelineError, Result};
pub use fragend::{Fragend, FragendStats, GlslFragend};
pub use pipeline::{
    AlphaFunc, BlendFactor, BlendState, Color, CombineChannel, CombineFunc, CombineOp,
    CombineSource, DepthState, Filter, Filters, LayerCombine, LayerHandle, LayerState,
    PipelineGraph, PipelineHandle, PipelineState, Snippet, SnippetHook, StateObserver, Texture,
    TextureComponents, TextureId, TextureType,
};
pub use reference::{FragmentInputs, evaluate};
pub use settings::{CacheSettings, DebugFlags, DeviceCaps, FragendSettings, GlslVersion};
