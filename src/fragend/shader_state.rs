//! Generated shader shared between equivalent pipelines.

use std::rc::Rc;

use slotmap::new_key_type;

use super::assembler::SourceAssembler;
use crate::cache::CacheEntryKey;
use crate::driver::ShaderHandle;

new_key_type! {
    pub struct ShaderStateKey;
}

/// Lifecycle of a shader state.
///
/// `Uninitialized -> Generating -> Compiled`. A state never goes back: a
/// pipeline whose code-relevant state changes drops its reference and gets
/// a new state on the next flush.
#[derive(Debug, Default)]
pub(crate) enum ShaderPhase {
    #[default]
    Uninitialized,
    Generating(Box<SourceAssembler>),
    Compiled(CompiledShader),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledShader {
    pub shader: ShaderHandle,
    pub source: Rc<str>,
    pub source_hash: u128,
    /// `false` when the driver rejected the source.
    pub compiled: bool,
}

#[derive(Debug)]
pub(crate) struct ShaderState {
    /// Pipelines (user or template) the state is attached to.
    pub ref_count: usize,
    /// Cache entry whose template shares this state.
    pub cache_entry: Option<CacheEntryKey>,
    pub phase: ShaderPhase,
}

impl ShaderState {
    pub(crate) fn new(cache_entry: Option<CacheEntryKey>) -> Self {
        Self {
            ref_count: 0,
            cache_entry,
            phase: ShaderPhase::Uninitialized,
        }
    }

    pub(crate) fn compiled(&self) -> Option<&CompiledShader> {
        match &self.phase {
            ShaderPhase::Compiled(compiled) => Some(compiled),
            _ => None,
        }
    }
}
