// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use log::debug;

use carbide::{CompileResult, DiagnosticsList, NameGen, TranslationUnit, VarInfo};

use crate::backend::{AsmOutput, DataEmitter, Target};
use crate::ir::{FuncLowerer, ParamDest, VRegId};

/// Drives one translation unit through the back end: per function
/// lowering, target legalization, register allocation, frame layout and
/// emission; then the global data sections.
pub struct Compiler {
    target: Box<dyn Target>,
}

impl Compiler {
    #[must_use]
    pub fn new(target: Box<dyn Target>) -> Self {
        Self { target }
    }

    pub fn compile(
        &self,
        unit: &TranslationUnit,
        names: &mut NameGen,
        diagnostics: &mut DiagnosticsList,
    ) -> CompileResult<String> {
        let mut out = AsmOutput::new();
        let mut extra_globals: Vec<VarInfo> = Vec::new();
        let lowering = self.target.lowering();

        for func in unit.functions.iter().filter(|f| f.body.is_some()) {
            debug!("compiling function `{}` for {}", func.name, self.target.name());
            let lowerer =
                FuncLowerer::new(unit, func, names, diagnostics, &mut extra_globals, lowering);
            let mut fnbe = lowerer.lower()?;

            self.target.tweak(&mut fnbe);

            let settings = self.target.reg_alloc_settings();
            let param_vregs: Vec<VRegId> = fnbe
                .params
                .iter()
                .filter_map(|p| match p.dest {
                    ParamDest::Reg(vreg) => Some(vreg),
                    ParamDest::Slot(_) => None,
                })
                .collect();
            {
                let crate::ir::FuncBackend {
                    ra,
                    bbcon,
                    precalls,
                    ..
                } = &mut fnbe;
                ra.allocate(bbcon, &settings, &param_vregs, precalls);
            }
            fnbe.layout_frame();

            self.target.emit_function(&fnbe, names, &mut out);
        }

        DataEmitter::emit_globals(unit, &extra_globals, diagnostics, &mut out)?;
        Ok(out.finish())
    }
}
