//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`PipelineError`] covers API misuse of the pipeline
//! graph, invalid combine descriptions and failures of the shader tooling
//! around the fragment backend.
//!
//! Shader compilation failures and references to missing layers are *not*
//! reported through this type on the draw path: they are logged and the
//! pipeline keeps rendering with visibly wrong output.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cg_pipeline::errors::{PipelineError, Result};
//!
//! fn configure(ctx: &mut Context, p: PipelineHandle) -> Result<()> {
//!     ctx.set_layer_combine_string(p, 0, "RGBA = REPLACE(TEXTURE)")?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::pipeline::combine_string::CombineStringError;
use crate::pipeline::snippet::SnippetHook;
use crate::pipeline::{LayerHandle, PipelineHandle};

/// The main error type of the crate.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========================================================================
    // Pipeline Graph Errors
    // ========================================================================
    /// The pipeline handle does not refer to a live pipeline.
    #[error("Unknown pipeline handle: {0:?}")]
    UnknownPipeline(PipelineHandle),

    /// The layer handle does not refer to a live layer.
    #[error("Unknown layer handle: {0:?}")]
    UnknownLayer(LayerHandle),

    /// The root pipeline holds the defaults for every state and is immutable.
    #[error("The root pipeline cannot be modified")]
    RootPipeline,

    /// A snippet was attached to an object that does not provide its hook.
    #[error("Snippet hook '{}' cannot be attached to a {target}", .hook.name())]
    SnippetHookMismatch {
        /// Hook of the rejected snippet
        hook: SnippetHook,
        /// `"pipeline"` or `"layer"`
        target: &'static str,
    },

    // ========================================================================
    // Combine Errors
    // ========================================================================
    /// The combine description could not be parsed.
    #[error("Invalid combine string: {0}")]
    CombineString(#[from] CombineStringError),

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// The shader driver rejected the source. Carries the info log.
    #[error("Shader compilation failed: {0}")]
    ShaderCompile(String),

    /// The prelude template failed to render.
    #[error("Shader template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Reference Evaluation Errors
    // ========================================================================
    /// User snippets carry arbitrary GLSL and cannot be evaluated on the CPU.
    #[error("Pipelines with snippets cannot be evaluated in software")]
    SnippetsNotEvaluable,
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
