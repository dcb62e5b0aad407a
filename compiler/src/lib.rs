// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod backend;
mod compiler;
mod ir;
mod pipeline;

pub use self::{
    backend::{
        AsmOutput, DataEmitter, LifeAnalysis, LifeAnalysisResult, RaFlags, RegAllocSettings,
        RegisterAllocator, RegisterLifetime, Riscv64, Riscv64CodeGenerator, Target,
    },
    compiler::Compiler,
    ir::{
        BBContainer, BBId, CondKind, FrameSlotId, FuncBackend, FuncLowerer, Ir, IrKind,
        ParamDest, ParamInfo, PrecallId, PrecallInfo, TargetLowering, VReg, VRegFlags, VRegId,
        VRegSize, BB,
    },
    pipeline::{CompileOptions, CompiledUnit, Pipeline, PipelineError},
};
