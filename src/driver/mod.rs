//! Shader object driver seam.
//!
//! The fragment backend never talks to GL directly. It creates, compiles and
//! deletes shader objects through [`ShaderCompiler`], which keeps code
//! generation testable without a GL context. [`GlShaderCompiler`] is the
//! implementation over the `gl` crate.

#[cfg(feature = "gl")]
mod gl_backend;

#[cfg(feature = "gl")]
pub use gl_backend::GlShaderCompiler;

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Driver-side name of a shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u32);

/// Creates and compiles shader objects.
pub trait ShaderCompiler {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderHandle>;

    /// Uploads `source` into `shader` and compiles it.
    ///
    /// On failure the error carries the driver's info log. The shader object
    /// stays allocated either way; deleting it is up to the caller.
    fn compile(&mut self, shader: ShaderHandle, source: &str) -> Result<()>;

    fn delete_shader(&mut self, shader: ShaderHandle);
}

impl<C: ShaderCompiler + ?Sized> ShaderCompiler for &mut C {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderHandle> {
        (**self).create_shader(stage)
    }

    fn compile(&mut self, shader: ShaderHandle, source: &str) -> Result<()> {
        (**self).compile(shader, source)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        (**self).delete_shader(shader);
    }
}

impl<C: ShaderCompiler + ?Sized> ShaderCompiler for Box<C> {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderHandle> {
        (**self).create_shader(stage)
    }

    fn compile(&mut self, shader: ShaderHandle, source: &str) -> Result<()> {
        (**self).compile(shader, source)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        (**self).delete_shader(shader);
    }
}
