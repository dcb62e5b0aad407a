// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod code_generator;
pub mod register;
mod tweak;

pub use self::{code_generator::Riscv64CodeGenerator, tweak::tweak_irs};

use carbide::NameGen;

use crate::backend::{AsmOutput, RaFlags, RegAllocSettings, RegisterAllocator, Target};
use crate::ir::{FuncBackend, Ir, TargetLowering};

use self::register::{
    CALLEE_SAVE_FREGS, CALLEE_SAVE_REGS, CALLER_SAVE_FREGS, CALLER_SAVE_REGS, FP_INDEX,
    MAX_FREG_ARGS, MAX_REG_ARGS, PHYSICAL_FREG_MAX, PHYSICAL_FREG_TEMPORARY, PHYSICAL_REG_MAX,
    PHYSICAL_REG_TEMPORARY, REG_PARAM_MAPPING, WORD_SIZE,
};

/// The RV64 target description: register tables, calling-convention
/// limits, and the per-opcode emitters.
#[derive(Debug, Default)]
pub struct Riscv64;

fn detect_extra_occupied(ra: &RegisterAllocator, _ir: &Ir) -> u64 {
    // The frame pointer is unavailable whenever a stack frame exists.
    if ra.flags.contains(RaFlags::STACK_FRAME) {
        1u64 << FP_INDEX
    } else {
        0
    }
}

impl Target for Riscv64 {
    fn name(&self) -> &'static str {
        "riscv64"
    }

    fn lowering(&self) -> TargetLowering {
        TargetLowering {
            max_reg_args: MAX_REG_ARGS,
            max_freg_args: MAX_FREG_ARGS,
            vaarg_fp_as_gp: true,
            word_size: WORD_SIZE,
        }
    }

    fn reg_alloc_settings(&self) -> RegAllocSettings {
        RegAllocSettings {
            phys_max: PHYSICAL_REG_MAX,
            temporary_count: PHYSICAL_REG_TEMPORARY,
            fphys_max: PHYSICAL_FREG_MAX,
            ftemporary_count: PHYSICAL_FREG_TEMPORARY,
            reg_param_mapping: REG_PARAM_MAPPING,
            callee_save: CALLEE_SAVE_REGS,
            caller_save: CALLER_SAVE_REGS,
            fcallee_save: CALLEE_SAVE_FREGS,
            fcaller_save: CALLER_SAVE_FREGS,
            fp_index: FP_INDEX,
            detect_extra_occupied,
        }
    }

    fn tweak(&self, fnbe: &mut FuncBackend) {
        tweak_irs(fnbe);
    }

    fn emit_function(&self, fnbe: &FuncBackend, names: &mut NameGen, out: &mut AsmOutput) {
        Riscv64CodeGenerator::emit(fnbe, names, out);
    }
}
