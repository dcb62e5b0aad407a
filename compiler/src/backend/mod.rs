// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod data_section;
pub mod register_allocation;
pub mod riscv64;

pub use self::{
    data_section::DataEmitter,
    register_allocation::{
        LifeAnalysis, LifeAnalysisResult, RaFlags, RegAllocSettings, RegisterAllocator,
        RegisterLifetime,
    },
    riscv64::{Riscv64, Riscv64CodeGenerator},
};

use carbide::NameGen;

use crate::ir::{FuncBackend, TargetLowering};

/// Assembly text being accumulated, one buffer per output section.
#[derive(Debug, Default)]
pub struct AsmOutput {
    pub text: Vec<String>,
    pub rodata: Vec<String>,
    pub data: Vec<String>,
    pub bss: Vec<String>,
}

impl AsmOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate the sections in emission order.
    #[must_use]
    pub fn finish(self) -> String {
        let mut result = String::new();
        for (header, lines) in [
            (None, &self.text),
            (Some("\t.section\t.rodata"), &self.rodata),
            (Some("\t.data"), &self.data),
            (Some("\t.bss"), &self.bss),
        ] {
            if lines.is_empty() {
                continue;
            }
            if let Some(header) = header {
                result.push_str(header);
                result.push('\n');
            }
            for line in lines {
                result.push_str(line);
                result.push('\n');
            }
        }
        result
    }
}

/// Everything the core needs from a target architecture: the allocation
/// tables, the IR legalization pass, and the per-opcode emitters. Chosen
/// as a trait object at function-emission time so adding a target does not
/// branch the core.
pub trait Target {
    fn name(&self) -> &'static str;
    fn lowering(&self) -> TargetLowering;
    fn reg_alloc_settings(&self) -> RegAllocSettings;
    /// Legalize immediates and operand forms before allocation.
    fn tweak(&self, fnbe: &mut FuncBackend);
    fn emit_function(&self, fnbe: &FuncBackend, names: &mut NameGen, out: &mut AsmOutput);
}
