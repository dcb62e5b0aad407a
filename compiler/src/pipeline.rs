// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::path::PathBuf;

use log::{info, warn};
use thiserror::Error;

use carbide::{CompileError, Diagnostic, Elaborator, Name};

use crate::backend::Riscv64;
use crate::compiler::Compiler;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("stack size must be a positive integer")]
    InvalidStackSize,

    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Interface-level options of one compiler invocation. The front end must
/// be obtained through [`Pipeline::new_elaborator`] so the diagnostics
/// policy (`warnings_as_errors`) configured here is the one the compile
/// actually runs under. The export list only matters to module-format
/// back-ends; the assembly back-end warns when one is given.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub output_path: Option<PathBuf>,
    pub exports: Vec<Name>,
    pub stack_size: usize,
    pub warnings_as_errors: bool,
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output_path: None,
            exports: Vec::new(),
            stack_size: 8192,
            warnings_as_errors: false,
            verbose: false,
        }
    }
}

/// The result of compiling one translation unit. The exit code is derived
/// from the recorded diagnostics, never from a process exit inside the
/// engine.
#[derive(Debug)]
pub struct CompiledUnit {
    pub asm: String,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
}

impl CompiledUnit {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// Front door of the back end: takes an elaborated translation unit and
/// produces assembly text for the external assembler.
#[derive(Debug, Default)]
pub struct Pipeline {
    pub options: CompileOptions,
}

impl Pipeline {
    #[must_use]
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// The front end configured by these options; the external parser
    /// builds the translation unit through it and hands it back to
    /// [`Pipeline::compile`].
    #[must_use]
    pub fn new_elaborator(&self) -> Elaborator {
        Elaborator::new(self.options.warnings_as_errors)
    }

    pub fn compile(&self, elaborator: Elaborator) -> Result<CompiledUnit, PipelineError> {
        if self.options.stack_size == 0 {
            return Err(PipelineError::InvalidStackSize);
        }
        if !self.options.exports.is_empty() {
            warn!("export list is only honored by module-format back ends");
        }

        let (unit, mut names, mut diagnostics) = elaborator.into_parts();
        let compiler = Compiler::new(Box::new(Riscv64));
        let asm = compiler.compile(&unit, &mut names, &mut diagnostics)?;

        if self.options.verbose {
            info!(
                "compiled {} function(s), {} diagnostic(s)",
                unit.functions.len(),
                diagnostics.as_slice().len()
            );
        }

        if let Some(path) = &self.options.output_path {
            std::fs::write(path, &asm)?;
        }

        let success = !diagnostics.has_errors();
        Ok(CompiledUnit {
            asm,
            diagnostics: diagnostics.to_vec(),
            success,
        })
    }
}
