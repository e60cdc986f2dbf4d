//! Shader compilation through the raw `gl` bindings.

use std::ffi::CStr;
use std::ptr::null_mut;

use gl::types::{GLchar, GLenum, GLint, GLuint};

use super::{ShaderCompiler, ShaderHandle, ShaderStage};
use crate::errors::{PipelineError, Result};
use crate::settings::{DeviceCaps, GlslVersion};

fn gl_shader_type(stage: ShaderStage) -> GLenum {
    match stage {
        ShaderStage::Vertex => gl::VERTEX_SHADER,
        ShaderStage::Fragment => gl::FRAGMENT_SHADER,
    }
}

/// [`ShaderCompiler`] over the current GL context.
#[derive(Debug)]
pub struct GlShaderCompiler {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl GlShaderCompiler {
    /// # Safety
    ///
    /// The GL function pointers must be loaded (`gl::load_with`) and the
    /// context they belong to must stay current on this thread for as long as
    /// the compiler is used.
    #[must_use]
    pub unsafe fn new() -> Self {
        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    /// Queries the capabilities of the current context.
    ///
    /// Falls back to [`DeviceCaps::default`] for anything the driver does not
    /// report.
    #[must_use]
    pub fn detect_caps(&self) -> DeviceCaps {
        // SAFETY: `new` requires a current context with loaded pointers.
        let (version, glsl, extensions) = unsafe {
            (
                gl_string(gl::VERSION),
                gl_string(gl::SHADING_LANGUAGE_VERSION),
                gl_extensions(),
            )
        };

        let es = version.starts_with("OpenGL ES");
        let major = version
            .split_whitespace()
            .find(|w| w.starts_with(|c: char| c.is_ascii_digit()))
            .and_then(|w| w.split('.').next())
            .and_then(|m| m.parse::<u32>().ok())
            .unwrap_or(0);
        let has = |name: &str| extensions.iter().any(|e| e == name);

        let mut caps = DeviceCaps {
            glsl: GlslVersion::parse(&glsl).unwrap_or_default(),
            ..DeviceCaps::default()
        };
        if es {
            caps.glsl.es = true;
            caps.fixed_function_alpha_test = false;
            caps.alpha_textures = true;
            caps.texture_rg = major >= 3 || has("GL_EXT_texture_rg");
            caps.texture_3d = major >= 3 || has("GL_OES_texture_3D");
            caps.texture_rectangle = false;
        } else {
            let core = major >= 3 && !has("GL_ARB_compatibility");
            caps.fixed_function_alpha_test = !core;
            caps.alpha_textures = !core;
            caps.texture_rg = major >= 3 || has("GL_ARB_texture_rg");
            caps.texture_3d = true;
            caps.texture_rectangle = major >= 3 || has("GL_ARB_texture_rectangle");
        }

        log::debug!("Detected GL '{version}', GLSL '{glsl}': {caps:?}");
        caps
    }
}

unsafe fn gl_string(name: GLenum) -> String {
    let ptr = unsafe { gl::GetString(name) };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr.cast()) }
        .to_string_lossy()
        .into_owned()
}

unsafe fn gl_extensions() -> Vec<String> {
    let mut count: GLint = 0;
    unsafe { gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut count) };
    if count > 0 {
        return (0..count as GLuint)
            .filter_map(|i| {
                let ptr = unsafe { gl::GetStringi(gl::EXTENSIONS, i) };
                (!ptr.is_null())
                    .then(|| unsafe { CStr::from_ptr(ptr.cast()) }.to_string_lossy().into_owned())
            })
            .collect();
    }

    unsafe { gl_string(gl::EXTENSIONS) }
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

impl ShaderCompiler for GlShaderCompiler {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderHandle> {
        // SAFETY: see `GlShaderCompiler::new`.
        let handle = unsafe { gl::CreateShader(gl_shader_type(stage)) };
        if handle == 0 {
            return Err(PipelineError::ShaderCompile(
                "unable to create shader object".to_string(),
            ));
        }
        log::debug!("Created {stage:?} shader {handle}");
        Ok(ShaderHandle(handle))
    }

    fn compile(&mut self, shader: ShaderHandle, source: &str) -> Result<()> {
        let ptr = source.as_ptr().cast::<GLchar>();
        let len = source.len() as GLint;

        // SAFETY: see `GlShaderCompiler::new`. The source is passed with an
        // explicit length, so it does not need to be NUL terminated.
        unsafe {
            gl::ShaderSource(shader.0, 1, &raw const ptr, &raw const len);
            gl::CompileShader(shader.0);

            let mut compiled: GLint = gl::FALSE.into();
            gl::GetShaderiv(shader.0, gl::COMPILE_STATUS, &mut compiled);
            if compiled == GLint::from(gl::TRUE) {
                return Ok(());
            }

            let mut log_len: GLint = 0;
            gl::GetShaderiv(shader.0, gl::INFO_LOG_LENGTH, &mut log_len);
            let mut log: Vec<u8> = vec![0; log_len.max(0) as usize];
            gl::GetShaderInfoLog(shader.0, log_len, null_mut(), log.as_mut_ptr().cast());
            if let Some(end) = log.iter().position(|&b| b == 0) {
                log.truncate(end);
            }

            Err(PipelineError::ShaderCompile(
                String::from_utf8_lossy(&log).into_owned(),
            ))
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        // SAFETY: see `GlShaderCompiler::new`.
        unsafe { gl::DeleteShader(shader.0) };
        log::debug!("Deleted shader {}", shader.0);
    }
}
