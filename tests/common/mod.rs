//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use cg_pipeline::errors::{PipelineError, Result};
use cg_pipeline::{
    Context, DeviceCaps, FragendSettings, ShaderCompiler, ShaderHandle, ShaderStage,
};

/// Everything the recording compiler saw.
#[derive(Debug, Default)]
pub struct CompilerLog {
    pub created: Vec<ShaderHandle>,
    pub compiled: Vec<(ShaderHandle, String)>,
    pub deleted: Vec<ShaderHandle>,
    /// Sources containing this text fail to compile.
    pub fail_on: Option<String>,
}

impl CompilerLog {
    pub fn live_shaders(&self) -> usize {
        self.created.len() - self.deleted.len()
    }
}

/// [`ShaderCompiler`] double that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingCompiler {
    pub log: Rc<RefCell<CompilerLog>>,
    next: Rc<RefCell<u32>>,
}

impl ShaderCompiler for RecordingCompiler {
    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderHandle> {
        assert_eq!(stage, ShaderStage::Fragment);
        let mut next = self.next.borrow_mut();
        *next += 1;
        let handle = ShaderHandle(*next);
        self.log.borrow_mut().created.push(handle);
        Ok(handle)
    }

    fn compile(&mut self, shader: ShaderHandle, source: &str) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.compiled.push((shader, source.to_string()));
        match &log.fail_on {
            Some(needle) if source.contains(needle.as_str()) => Err(
                PipelineError::ShaderCompile(format!("0:1(1): error: rejected '{needle}'")),
            ),
            _ => Ok(()),
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.log.borrow_mut().deleted.push(shader);
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context_with(settings: FragendSettings) -> (Context, Rc<RefCell<CompilerLog>>) {
    init_logger();
    let compiler = RecordingCompiler::default();
    let log = Rc::clone(&compiler.log);
    (Context::new(settings, compiler), log)
}

/// Context for a desktop GL 3.2 core device.
pub fn context() -> (Context, Rc<RefCell<CompilerLog>>) {
    context_with(FragendSettings::default())
}

pub fn context_for(caps: DeviceCaps) -> (Context, Rc<RefCell<CompilerLog>>) {
    context_with(FragendSettings {
        caps,
        ..Default::default()
    })
}
