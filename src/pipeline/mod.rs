//! Pipeline and layer state model.
//!
//! A pipeline describes how a primitive is rendered: fixed-function state
//! (color, blending, depth, alpha test) plus an ordered list of layers. Each
//! layer samples one texture and combines it with the output of the previous
//! layer using a [`LayerCombine`] description. Snippets let users inject
//! their own GLSL at well-defined points of the generated shader.
//!
//! All pipelines and layers live in a [`PipelineGraph`], see [`graph`] for
//! how state is shared between related pipelines.

pub mod combine;
pub mod combine_string;
pub mod compare;
pub mod graph;
pub mod snippet;
pub mod state;

pub use combine::{CombineChannel, CombineFunc, CombineOp, CombineSource, LayerCombine};
pub use combine_string::CombineStringError;
pub use graph::{LayerHandle, LayerList, PipelineGraph, PipelineHandle, StateObserver};
pub use snippet::{Snippet, SnippetHook, SnippetList};
pub use state::{
    AlphaFunc, BlendFactor, BlendState, Color, DepthState, Filter, Filters, LayerState,
    PipelineState, Texture, TextureComponents, TextureId, TextureType,
};
