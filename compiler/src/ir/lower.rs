// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashMap;

use carbide::{
    BinOp, CompileResult, DiagnosticKind, DiagnosticsList, Expr, ExprKind, Function, Initializer,
    Name, NameGen, Qualifiers, ScopeId, StmtId, StmtKind, Storage, TranslationUnit, Type,
    TypeKind, UnOp, VarInfo, GLOBAL_SCOPE,
};

use super::{
    BBId, CondKind, FrameSlotId, FuncBackend, Ir, IrKind, ParamDest, ParamInfo, PrecallId,
    PrecallInfo, VRegFlags, VRegId, VRegSize,
};

/// Placeholder for the function-exit block, patched once lowering is done.
const EXIT_BB: BBId = BBId(u32::MAX);

/// The slice of the target description the IR builder needs.
#[derive(Debug, Clone, Copy)]
pub struct TargetLowering {
    pub max_reg_args: usize,
    pub max_freg_args: usize,
    /// Variadic flonum arguments travel in integer registers.
    pub vaarg_fp_as_gp: bool,
    pub word_size: usize,
}

#[derive(Debug, Clone, Copy)]
struct InlineCtx {
    result: Option<VRegId>,
    end_bb: BBId,
}

/// Lowers one function's statement tree to virtual-register IR organized
/// as a basic-block graph.
pub struct FuncLowerer<'a> {
    unit: &'a TranslationUnit,
    func: &'a Function,
    names: &'a mut NameGen,
    diagnostics: &'a mut DiagnosticsList,
    /// Globals synthesized during lowering (string literals).
    extra_globals: &'a mut Vec<VarInfo>,
    target: TargetLowering,
    fnbe: FuncBackend,
    curbb: BBId,
    var_regs: HashMap<(ScopeId, Name), VRegId>,
    var_slots: HashMap<(ScopeId, Name), FrameSlotId>,
    break_bbs: HashMap<StmtId, BBId>,
    continue_bbs: HashMap<StmtId, BBId>,
    case_bbs: HashMap<StmtId, BBId>,
    label_bbs: HashMap<Name, BBId>,
    inline_stack: Vec<InlineCtx>,
    /// Some return jumped to the exit block, so the epilogue is live even
    /// when no path falls off the end.
    has_return_jump: bool,
}

impl<'a> FuncLowerer<'a> {
    pub fn new(
        unit: &'a TranslationUnit,
        func: &'a Function,
        names: &'a mut NameGen,
        diagnostics: &'a mut DiagnosticsList,
        extra_globals: &'a mut Vec<VarInfo>,
        target: TargetLowering,
    ) -> Self {
        let global = unit
            .scopes
            .find_var_here(GLOBAL_SCOPE, &func.name)
            .map(|v| !v.storage.contains(Storage::STATIC))
            .unwrap_or(true);
        let mut fnbe = FuncBackend::new(func.name.clone(), global);
        let entry = fnbe.bbcon.add(Name::new(format!(".L_{}_entry", func.name)));
        fnbe.bbcon.activate(entry);
        Self {
            unit,
            func,
            names,
            diagnostics,
            extra_globals,
            target,
            fnbe,
            curbb: entry,
            var_regs: HashMap::new(),
            var_slots: HashMap::new(),
            break_bbs: HashMap::new(),
            continue_bbs: HashMap::new(),
            case_bbs: HashMap::new(),
            label_bbs: HashMap::new(),
            inline_stack: Vec::new(),
            has_return_jump: false,
        }
    }

    pub fn lower(mut self) -> CompileResult<FuncBackend> {
        self.prepare_locals();
        self.fnbe.body_reach = self.func.body_reach;

        let mut ends_with_funcend_return = false;
        if let Some(body) = self.func.body {
            let unit = self.unit;
            if let StmtKind::Block { stmts, .. } = &unit.stmts.get(body).kind {
                self.fnbe.no_stmt = stmts.iter().all(|&s| {
                    matches!(unit.stmts.get(s).kind, StmtKind::Asm { .. })
                });
                if let Some(&last) = stmts.last() {
                    ends_with_funcend_return = matches!(
                        unit.stmts.get(last).kind,
                        StmtKind::Return { func_end: true, .. }
                    );
                }
            }
            self.gen_stmt(body)?;
        }

        // The exit block carries the epilogue; it is reached by explicit
        // return jumps and by falling off the end.
        let exit = self.fnbe.bbcon.add(self.names.alloc_label());
        self.fnbe.bbcon.activate(exit);
        let layout = self.fnbe.bbcon.layout.clone();
        for id in layout {
            for ir in &mut self.fnbe.bbcon.get_mut(id).irs {
                if let IrKind::Jmp { bb, .. } = &mut ir.kind {
                    if *bb == EXIT_BB {
                        *bb = exit;
                    }
                }
            }
        }
        self.fnbe.bbcon.finalize();

        self.fnbe.falls_to_epilogue = !self.func.body_reach.stops()
            || ends_with_funcend_return
            || self.has_return_jump;
        Ok(self.fnbe)
    }

    //
    // Locals
    //

    fn prepare_locals(&mut self) {
        let unit = self.unit;
        let mut iparam = 0usize;
        let mut fparam = 0usize;
        for (scope_index, &scope) in self.func.scopes.iter().enumerate() {
            for var in &unit.scopes.get(scope).vars {
                if var.storage.contains(Storage::STATIC)
                    || var.storage.contains(Storage::EXTERN)
                    || var.storage.contains(Storage::ENUM_MEMBER)
                    || var.ty.is_func()
                {
                    continue;
                }
                let in_memory = var.ty.is_array()
                    || var.ty.is_struct()
                    || var.storage.contains(Storage::REF_TAKEN);
                let key = (scope, var.name.clone());
                let dest;
                if in_memory {
                    let size = unit.structs.size_of(&var.ty);
                    let align = unit.structs.align_of(&var.ty);
                    let slot = self.fnbe.add_frame_slot(size, align);
                    self.var_slots.insert(key, slot);
                    dest = ParamDest::Slot(slot);
                } else {
                    let (size, flags) = self.vtype(&var.ty);
                    let vreg = self.fnbe.ra.spawn(size, flags);
                    self.var_regs.insert(key, vreg);
                    dest = ParamDest::Reg(vreg);
                }
                if scope_index == 0 && var.storage.contains(Storage::PARAM) {
                    let flonum = var.ty.is_flonum();
                    let index = if flonum {
                        let i = fparam;
                        fparam += 1;
                        i
                    } else {
                        let i = iparam;
                        iparam += 1;
                        i
                    };
                    let limit = if flonum {
                        self.target.max_freg_args
                    } else {
                        self.target.max_reg_args
                    };
                    if index < limit {
                        self.fnbe.params.push(ParamInfo {
                            index,
                            flonum,
                            size: VRegSize::from_size(unit.structs.size_of(&var.ty)),
                            dest,
                        });
                    }
                }
            }
        }
    }

    //
    // Small helpers
    //

    fn vtype(&self, ty: &Type) -> (VRegSize, VRegFlags) {
        let size = VRegSize::from_size(self.unit.structs.size_of(ty));
        let mut flags = VRegFlags::NONE;
        if ty.is_flonum() {
            flags.insert(VRegFlags::FLONUM);
        }
        // Everything that is not a signed fixnum loads zero-extended.
        let unsigned = match ty.fixnum_kind() {
            Some((_, unsigned)) => unsigned,
            None => true,
        };
        if unsigned {
            flags.insert(VRegFlags::UNSIGNED);
        }
        (size, flags)
    }

    fn spawn(&mut self, ty: &Type) -> VRegId {
        let (size, flags) = self.vtype(ty);
        self.fnbe.ra.spawn(size, flags)
    }

    fn spawn_const(&mut self, value: i64, ty: &Type) -> VRegId {
        let (size, flags) = self.vtype(ty);
        self.fnbe
            .ra
            .spawn_const(value, size, flags.contains(VRegFlags::UNSIGNED))
    }

    fn push(&mut self, ir: Ir) {
        self.fnbe.bbcon.push_ir(self.curbb, ir);
    }

    fn new_bb(&mut self) -> BBId {
        let label = self.names.alloc_label();
        self.fnbe.bbcon.add(label)
    }

    fn set_curbb(&mut self, bb: BBId) {
        self.fnbe.bbcon.activate(bb);
        self.curbb = bb;
    }

    fn size_of(&self, ty: &Type) -> usize {
        self.unit.structs.size_of(ty)
    }

    fn jmp(&mut self, cond: CondKind, bb: BBId) {
        self.push(Ir::new(IrKind::Jmp { cond, bb }));
    }

    fn mov(&mut self, dst: VRegId, src: VRegId) {
        self.push(Ir::new(IrKind::Mov).with_dst(dst).with_opr1(src));
    }

    //
    // Statements
    //

    fn gen_stmt(&mut self, stmt: StmtId) -> CompileResult<()> {
        let unit = self.unit;
        match &unit.stmts.get(stmt).kind {
            StmtKind::Expr(expr) => {
                self.gen_expr(expr)?;
            }

            StmtKind::Block { stmts, .. } => {
                let stmts = stmts.clone();
                self.gen_block_stmts(&stmts)?;
            }

            StmtKind::If { cond, then_stmt, else_stmt } => {
                let cond = cond.clone();
                let then_stmt = *then_stmt;
                let else_stmt = *else_stmt;
                let tbb = self.new_bb();
                let fbb = self.new_bb();
                self.gen_cond_jmp(&cond, false, fbb)?;
                self.set_curbb(tbb);
                self.gen_stmt(then_stmt)?;
                if let Some(else_stmt) = else_stmt {
                    let next = self.new_bb();
                    self.jmp(CondKind::Any, next);
                    self.set_curbb(fbb);
                    self.gen_stmt(else_stmt)?;
                    self.set_curbb(next);
                } else {
                    self.set_curbb(fbb);
                }
            }

            StmtKind::Switch { .. } => {
                self.gen_switch(stmt)?;
            }

            StmtKind::Case { .. } => {
                let bb = self.case_bbs[&stmt];
                self.set_curbb(bb);
            }

            StmtKind::While { cond, body } => {
                let cond = cond.clone();
                let body = *body;
                let cond_bb = self.new_bb();
                let body_bb = self.new_bb();
                let next_bb = self.new_bb();
                self.break_bbs.insert(stmt, next_bb);
                self.continue_bbs.insert(stmt, cond_bb);

                self.set_curbb(cond_bb);
                self.gen_cond_jmp(&cond, false, next_bb)?;
                self.set_curbb(body_bb);
                self.gen_stmt(body)?;
                self.jmp(CondKind::Any, cond_bb);
                self.set_curbb(next_bb);
            }

            StmtKind::DoWhile { body, cond } => {
                let cond = cond.clone();
                let body = *body;
                let body_bb = self.new_bb();
                let cond_bb = self.new_bb();
                let next_bb = self.new_bb();
                self.break_bbs.insert(stmt, next_bb);
                self.continue_bbs.insert(stmt, cond_bb);

                self.set_curbb(body_bb);
                self.gen_stmt(body)?;
                self.set_curbb(cond_bb);
                self.gen_cond_jmp(&cond, true, body_bb)?;
                self.set_curbb(next_bb);
            }

            StmtKind::For { pre, cond, post, body } => {
                let pre = pre.clone();
                let cond = cond.clone();
                let post = post.clone();
                let body = *body;
                if let Some(pre) = &pre {
                    self.gen_expr(pre)?;
                }
                let cond_bb = self.new_bb();
                let body_bb = self.new_bb();
                let cont_bb = self.new_bb();
                let next_bb = self.new_bb();
                self.break_bbs.insert(stmt, next_bb);
                self.continue_bbs.insert(stmt, cont_bb);

                self.set_curbb(cond_bb);
                if let Some(cond) = &cond {
                    self.gen_cond_jmp(cond, false, next_bb)?;
                }
                self.set_curbb(body_bb);
                self.gen_stmt(body)?;
                self.set_curbb(cont_bb);
                if let Some(post) = &post {
                    self.gen_expr(post)?;
                }
                self.jmp(CondKind::Any, cond_bb);
                self.set_curbb(next_bb);
            }

            StmtKind::Return { value, func_end } => {
                let value = value.clone();
                let func_end = *func_end;
                self.gen_return(value.as_ref(), func_end)?;
            }

            StmtKind::Break { parent } => {
                let bb = self.break_bbs[parent];
                self.jmp(CondKind::Any, bb);
            }

            StmtKind::Continue { parent } => {
                let bb = self.continue_bbs[parent];
                self.jmp(CondKind::Any, bb);
            }

            StmtKind::Goto { label } => {
                let label = label.clone();
                let bb = self.label_bb(&label);
                self.jmp(CondKind::Any, bb);
            }

            StmtKind::Label { name, stmt: inner, .. } => {
                let name = name.clone();
                let inner = *inner;
                let bb = self.label_bb(&name);
                self.set_curbb(bb);
                self.gen_stmt(inner)?;
            }

            StmtKind::VarDecl { decls } => {
                let inits: Vec<StmtId> = decls.iter().filter_map(|d| d.init).collect();
                for init in inits {
                    self.gen_stmt(init)?;
                }
            }

            StmtKind::Asm { text } => {
                let text = text.clone();
                self.push(Ir::new(IrKind::Asm { text }));
            }
        }
        Ok(())
    }

    fn label_bb(&mut self, name: &Name) -> BBId {
        if let Some(&bb) = self.label_bbs.get(name) {
            return bb;
        }
        let bb = self.new_bb();
        self.label_bbs.insert(name.clone(), bb);
        bb
    }

    /// Statements after a stopping one are skipped unless they are labels,
    /// cases, or a `for` whose pre-expression has a side effect.
    fn gen_block_stmts(&mut self, stmts: &[StmtId]) -> CompileResult<()> {
        let unit = self.unit;
        let mut dead = false;
        for &stmt in stmts {
            if dead {
                match &unit.stmts.get(stmt).kind {
                    StmtKind::Label { .. } | StmtKind::Case { .. } => dead = false,
                    StmtKind::For { pre: Some(_), .. } => dead = false,
                    _ => continue,
                }
            }
            self.gen_stmt(stmt)?;
            if unit.stmts.get(stmt).reach.stops() {
                dead = true;
            }
        }
        Ok(())
    }

    fn gen_return(&mut self, value: Option<&Expr>, func_end: bool) -> CompileResult<()> {
        if let Some(ctx) = self.inline_stack.last().copied() {
            if let Some(value) = value {
                let reg = self.gen_expr(value)?;
                if let Some(result) = ctx.result {
                    self.mov(result, reg);
                }
            }
            self.jmp(CondKind::Any, ctx.end_bb);
            return Ok(());
        }

        if let Some(value) = value {
            let reg = self.gen_expr(value)?;
            let unsigned = value.ty.is_unsigned();
            self.push(Ir::new(IrKind::Result).with_opr1(reg).with_unsigned(unsigned));
        }
        if !func_end {
            self.jmp(CondKind::Any, EXIT_BB);
            self.has_return_jump = true;
        }
        Ok(())
    }

    //
    // Switch
    //

    fn gen_switch(&mut self, stmt: StmtId) -> CompileResult<()> {
        let unit = self.unit;
        let StmtKind::Switch { value, body, cases, .. } = &unit.stmts.get(stmt).kind else {
            unreachable!();
        };
        let value = value.clone();
        let body = *body;
        let cases = cases.clone();

        let value_ty = value.ty.clone();
        let value_reg = self.gen_expr(&value)?;

        let break_bb = self.new_bb();
        self.break_bbs.insert(stmt, break_bb);

        // One block per case, in case-vector order.
        let mut case_values: Vec<(i64, BBId)> = Vec::new();
        let mut default_bb = break_bb;
        for &case in &cases {
            let bb = self.new_bb();
            self.case_bbs.insert(case, bb);
            match &unit.stmts.get(case).kind {
                StmtKind::Case { value: Some(v), .. } => case_values.push((*v, bb)),
                StmtKind::Case { value: None, .. } => default_bb = bb,
                _ => unreachable!("switch case vector holds only cases"),
            }
        }

        let contiguous = case_values.len() > 1
            && case_values
                .windows(2)
                .all(|w| w[1].0 == w[0].0 + 1);

        if case_values.is_empty() {
            self.jmp(CondKind::Any, default_bb);
        } else if contiguous {
            // Dense dispatch: normalize to zero, bounds-check, table jump.
            let min = case_values[0].0;
            let n = case_values.len() as i64;
            let index_reg = if min != 0 {
                let min_reg = self.spawn_const(min, &value_ty);
                let dst = self.spawn(&value_ty);
                self.push(
                    Ir::new(IrKind::Sub)
                        .with_dst(dst)
                        .with_opr1(value_reg)
                        .with_opr2(min_reg),
                );
                dst
            } else {
                value_reg
            };
            let bound = self.spawn_const(n, &value_ty);
            self.push(
                Ir::new(IrKind::Jmp {
                    cond: CondKind::UGe,
                    bb: default_bb,
                })
                .with_opr1(index_reg)
                .with_opr2(bound),
            );
            let bbs: Vec<BBId> = case_values.iter().map(|&(_, bb)| bb).collect();
            self.push(Ir::new(IrKind::TJmp { bbs }).with_opr1(index_reg));
        } else {
            for &(case_value, bb) in &case_values {
                let cmp = self.spawn_const(case_value, &value_ty);
                self.push(
                    Ir::new(IrKind::Jmp { cond: CondKind::Eq, bb })
                        .with_opr1(value_reg)
                        .with_opr2(cmp),
                );
            }
            self.jmp(CondKind::Any, default_bb);
        }

        if let Some(body) = body {
            self.gen_stmt(body)?;
        }
        self.set_curbb(break_bb);
        Ok(())
    }

    //
    // Conditional jumps
    //

    fn cond_of(op: BinOp) -> CondKind {
        match op {
            BinOp::Eq => CondKind::Eq,
            BinOp::Ne => CondKind::Ne,
            BinOp::Lt => CondKind::Lt,
            BinOp::Le => CondKind::Le,
            BinOp::Ge => CondKind::Ge,
            BinOp::Gt => CondKind::Gt,
            _ => unreachable!("not a comparison"),
        }
    }

    /// Lower a comparison into (condition, lhs, rhs); the caller turns it
    /// into either a conditional jump or a materialized boolean.
    fn gen_compare(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> CompileResult<(CondKind, VRegId, VRegId)> {
        let mut cond = Self::cond_of(op);
        let (lhs, rhs) = if rhs.as_fixnum().is_none() && lhs.as_fixnum().is_some() {
            cond = cond.swap();
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        if !matches!(cond, CondKind::Eq | CondKind::Ne)
            && (!lhs.ty.is_fixnum() || lhs.ty.is_unsigned())
        {
            cond = cond.to_unsigned();
        }

        let mut lhs_reg = self.gen_expr(lhs)?;
        let rhs_reg = if let Some(value) = rhs.as_fixnum() {
            self.spawn_const(value, &rhs.ty)
        } else {
            let rhs_reg = self.gen_expr(rhs)?;
            // Avoid comparing two spilled registers.
            let tmp = self.spawn(&lhs.ty);
            self.mov(tmp, lhs_reg);
            lhs_reg = tmp;
            rhs_reg
        };
        Ok((cond, lhs_reg, rhs_reg))
    }

    /// Compile `cond` into branches; comparisons branch on their flags
    /// directly, short-circuit operators split blocks.
    fn gen_cond_jmp(&mut self, cond: &Expr, tf: bool, bb: BBId) -> CompileResult<()> {
        match &cond.kind {
            ExprKind::Fixnum(value) => {
                let mut tf = tf;
                if *value == 0 {
                    tf = !tf;
                }
                if tf {
                    self.jmp(CondKind::Any, bb);
                }
                Ok(())
            }

            ExprKind::Bin { op, lhs, rhs } if op.is_comparison() => {
                let (mut kind, l, r) = self.gen_compare(*op, lhs, rhs)?;
                if !tf {
                    kind = kind.negate();
                }
                self.push(Ir::new(IrKind::Jmp { cond: kind, bb }).with_opr1(l).with_opr2(r));
                Ok(())
            }

            ExprKind::Bin { op: BinOp::LogAnd, lhs, rhs } => {
                if !tf {
                    let bb1 = self.new_bb();
                    let bb2 = self.new_bb();
                    self.gen_cond_jmp(lhs, false, bb)?;
                    self.set_curbb(bb1);
                    self.gen_cond_jmp(rhs, false, bb)?;
                    self.set_curbb(bb2);
                } else {
                    let bb1 = self.new_bb();
                    let bb2 = self.new_bb();
                    self.gen_cond_jmp(lhs, false, bb2)?;
                    self.set_curbb(bb1);
                    self.gen_cond_jmp(rhs, true, bb)?;
                    self.set_curbb(bb2);
                }
                Ok(())
            }

            ExprKind::Bin { op: BinOp::LogOr, lhs, rhs } => {
                if tf {
                    let bb1 = self.new_bb();
                    let bb2 = self.new_bb();
                    self.gen_cond_jmp(lhs, true, bb)?;
                    self.set_curbb(bb1);
                    self.gen_cond_jmp(rhs, true, bb)?;
                    self.set_curbb(bb2);
                } else {
                    let bb1 = self.new_bb();
                    let bb2 = self.new_bb();
                    self.gen_cond_jmp(lhs, true, bb2)?;
                    self.set_curbb(bb1);
                    self.gen_cond_jmp(rhs, false, bb)?;
                    self.set_curbb(bb2);
                }
                Ok(())
            }

            ExprKind::Unary { op: UnOp::Not, sub } => self.gen_cond_jmp(sub, !tf, bb),
            ExprKind::Unary { op: UnOp::Group, sub } => self.gen_cond_jmp(sub, tf, bb),

            _ => {
                let reg = self.gen_expr(cond)?;
                let zero = self.spawn_const(0, &cond.ty);
                let kind = if tf { CondKind::Ne } else { CondKind::Eq };
                self.push(Ir::new(IrKind::Jmp { cond: kind, bb }).with_opr1(reg).with_opr2(zero));
                Ok(())
            }
        }
    }

    //
    // Expressions
    //

    pub fn gen_expr(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        match &expr.kind {
            ExprKind::Fixnum(value) => Ok(self.spawn_const(*value, &expr.ty)),

            ExprKind::Flonum(value) => {
                let label = self.names.alloc_label();
                let size = VRegSize::from_size(self.size_of(&expr.ty));
                self.fnbe.float_literals.push((label.clone(), *value, size));
                let addr = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                self.push(
                    Ir::new(IrKind::Iofs { label, global: false }).with_dst(addr),
                );
                let (vsize, flags) = self.vtype(&expr.ty);
                let dst = self.fnbe.ra.spawn(vsize, flags);
                self.push(Ir::new(IrKind::Load).with_dst(dst).with_opr1(addr).with_unsigned(false));
                Ok(dst)
            }

            ExprKind::Str(_) => {
                let addr = self.gen_str_literal(expr);
                Ok(addr)
            }

            ExprKind::Variable { .. } => self.gen_variable(expr),

            ExprKind::Unary { op: UnOp::Ref, sub } => self.gen_lval(sub),

            ExprKind::Unary { op: UnOp::Deref, sub } => {
                let reg = self.gen_expr(sub)?;
                match expr.ty.kind {
                    TypeKind::Fixnum { .. } | TypeKind::Flonum { .. } | TypeKind::Ptr { .. } => {
                        let (size, flags) = self.vtype(&expr.ty);
                        let dst = self.fnbe.ra.spawn(size, flags);
                        let unsigned = expr.ty.is_unsigned();
                        self.push(
                            Ir::new(IrKind::Load)
                                .with_dst(dst)
                                .with_opr1(reg)
                                .with_unsigned(unsigned),
                        );
                        Ok(dst)
                    }
                    // Arrays, structs and functions are handled as their
                    // address.
                    _ => Ok(reg),
                }
            }

            ExprKind::Unary { op: UnOp::Group | UnOp::Pos, sub } => self.gen_expr(sub),

            ExprKind::Unary { op: UnOp::Cast, sub } => {
                let reg = self.gen_expr(sub)?;
                Ok(self.gen_cast(reg, &expr.ty))
            }

            ExprKind::Unary { op: UnOp::Neg, sub } => {
                let reg = self.gen_expr(sub)?;
                if self.fnbe.ra.vreg(reg).is_const() {
                    let value = -self.fnbe.ra.vreg(reg).fixnum;
                    return Ok(self.spawn_const(value, &expr.ty));
                }
                let dst = self.spawn(&expr.ty);
                self.push(Ir::new(IrKind::Neg).with_dst(dst).with_opr1(reg));
                Ok(dst)
            }

            ExprKind::Unary { op: UnOp::BitNot, sub } => {
                let reg = self.gen_expr(sub)?;
                if self.fnbe.ra.vreg(reg).is_const() {
                    let value = !self.fnbe.ra.vreg(reg).fixnum;
                    return Ok(self.spawn_const(value, &expr.ty));
                }
                let dst = self.spawn(&expr.ty);
                self.push(Ir::new(IrKind::BitNot).with_dst(dst).with_opr1(reg));
                Ok(dst)
            }

            ExprKind::Unary { op: UnOp::Not, sub } => {
                let reg = self.gen_expr(sub)?;
                let zero = self.spawn_const(0, &sub.ty);
                let dst = self.spawn(&expr.ty);
                self.push(
                    Ir::new(IrKind::Cond { cond: CondKind::Eq })
                        .with_dst(dst)
                        .with_opr1(reg)
                        .with_opr2(zero),
                );
                Ok(dst)
            }

            ExprKind::Unary {
                op: op @ (UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec),
                sub,
            } => self.gen_incdec(*op, sub, &expr.ty),

            ExprKind::Member { .. } => {
                let addr = self.gen_lval(expr)?;
                match expr.ty.kind {
                    TypeKind::Fixnum { .. } | TypeKind::Flonum { .. } | TypeKind::Ptr { .. } => {
                        let (size, flags) = self.vtype(&expr.ty);
                        let dst = self.fnbe.ra.spawn(size, flags);
                        let unsigned = expr.ty.is_unsigned();
                        self.push(
                            Ir::new(IrKind::Load)
                                .with_dst(dst)
                                .with_opr1(addr)
                                .with_unsigned(unsigned),
                        );
                        Ok(dst)
                    }
                    _ => Ok(addr),
                }
            }

            ExprKind::Bin { op: BinOp::Comma, lhs, rhs } => {
                self.gen_expr(lhs)?;
                self.gen_expr(rhs)
            }

            ExprKind::Ternary { .. } => self.gen_ternary(expr),

            ExprKind::Bin { op: BinOp::Assign, lhs, rhs } => self.gen_assign(lhs, rhs),

            ExprKind::Bin { op, lhs, rhs } if op.is_comparison() => {
                let (cond, l, r) = self.gen_compare(*op, lhs, rhs)?;
                let dst = self.spawn(&expr.ty);
                self.push(
                    Ir::new(IrKind::Cond { cond })
                        .with_dst(dst)
                        .with_opr1(l)
                        .with_opr2(r),
                );
                Ok(dst)
            }

            ExprKind::Bin { op: BinOp::LogAnd, lhs, rhs } => {
                let bb1 = self.new_bb();
                let bb2 = self.new_bb();
                let false_bb = self.new_bb();
                let next_bb = self.new_bb();
                let dst = self.spawn(&expr.ty);
                self.gen_cond_jmp(lhs, false, false_bb)?;
                self.set_curbb(bb1);
                self.gen_cond_jmp(rhs, false, false_bb)?;
                self.set_curbb(bb2);
                let one = self.spawn_const(1, &expr.ty);
                self.mov(dst, one);
                self.jmp(CondKind::Any, next_bb);
                self.set_curbb(false_bb);
                let zero = self.spawn_const(0, &expr.ty);
                self.mov(dst, zero);
                self.set_curbb(next_bb);
                Ok(dst)
            }

            ExprKind::Bin { op: BinOp::LogOr, lhs, rhs } => {
                let bb1 = self.new_bb();
                let bb2 = self.new_bb();
                let true_bb = self.new_bb();
                let next_bb = self.new_bb();
                let dst = self.spawn(&expr.ty);
                self.gen_cond_jmp(lhs, true, true_bb)?;
                self.set_curbb(bb1);
                self.gen_cond_jmp(rhs, true, true_bb)?;
                self.set_curbb(bb2);
                let zero = self.spawn_const(0, &expr.ty);
                self.mov(dst, zero);
                self.jmp(CondKind::Any, next_bb);
                self.set_curbb(true_bb);
                let one = self.spawn_const(1, &expr.ty);
                self.mov(dst, one);
                self.set_curbb(next_bb);
                Ok(dst)
            }

            ExprKind::Bin { op: op @ (BinOp::PtrAdd | BinOp::PtrSub), lhs, rhs } => {
                let lreg = self.gen_expr(lhs)?;
                self.gen_ptradd(*op, &expr.ty, lreg, rhs)
            }

            ExprKind::Bin { op, lhs, rhs } => {
                let op = *op;
                let lreg = self.gen_expr(lhs)?;
                let rreg = self.gen_expr(rhs)?;
                Ok(self.gen_arith(op, &expr.ty, lreg, rreg))
            }

            ExprKind::Call { .. } => self.gen_funcall(expr),

            ExprKind::Inlined { .. } => self.gen_inlined(expr),

            ExprKind::CompoundLiteral { var, inits } => {
                let inits = inits.clone();
                let var = (**var).clone();
                for init in inits {
                    self.gen_stmt(init)?;
                }
                self.gen_expr(&var)
            }

            ExprKind::Block(stmt) => {
                let stmt = *stmt;
                self.gen_stmt(stmt)?;
                Ok(self.spawn_const(0, &Type::int()))
            }
        }
    }

    fn gen_arith(&mut self, op: BinOp, ty: &Type, lhs: VRegId, rhs: VRegId) -> VRegId {
        let kind = match op {
            BinOp::Add => IrKind::Add,
            BinOp::Sub => IrKind::Sub,
            BinOp::Mul => IrKind::Mul,
            BinOp::Div => IrKind::Div,
            BinOp::Mod => IrKind::Mod,
            BinOp::BitAnd => IrKind::BitAnd,
            BinOp::BitOr => IrKind::BitOr,
            BinOp::BitXor => IrKind::BitXor,
            BinOp::LShift => IrKind::LShift,
            BinOp::RShift => IrKind::RShift,
            _ => unreachable!("not an arithmetic operator"),
        };
        let unsigned = ty.is_unsigned();
        let dst = self.spawn(ty);
        self.push(
            Ir::new(kind)
                .with_dst(dst)
                .with_opr1(lhs)
                .with_opr2(rhs)
                .with_unsigned(unsigned),
        );
        dst
    }

    /// `ptr ± int` through the scaled `ptradd` opcode; non-power-of-two
    /// scales materialize the multiplication.
    fn gen_ptradd(
        &mut self,
        op: BinOp,
        ty: &Type,
        lreg: VRegId,
        rhs: &Expr,
    ) -> CompileResult<VRegId> {
        let scale = self.size_of(ty.pointee().expect("pointer arithmetic on non-pointer"));

        let raw = rhs.strip_casts();
        if let Some(mut rval) = raw.as_fixnum() {
            if op == BinOp::PtrSub {
                rval = -rval;
            }
            let dst = self.spawn(ty);
            self.push(
                Ir::new(IrKind::PtrAdd {
                    scale: 1,
                    offset: rval * scale as i64,
                })
                .with_dst(dst)
                .with_opr1(lreg),
            );
            return Ok(dst);
        }

        let mut rreg = self.gen_expr(rhs)?;
        if op == BinOp::PtrSub {
            let neg = self.spawn(&rhs.ty);
            self.push(Ir::new(IrKind::Neg).with_dst(neg).with_opr1(rreg));
            rreg = neg;
        } else {
            // Avoid a spilled base and a spilled index at once.
            let tmp = self.spawn(&rhs.ty);
            self.mov(tmp, rreg);
            rreg = tmp;
        }

        let mut scale = scale;
        if scale > 8 || !scale.is_power_of_two() {
            let scale_reg = self.spawn_const(scale as i64, &rhs.ty);
            rreg = self.gen_arith(BinOp::Mul, &rhs.ty, rreg, scale_reg);
            scale = 1;
        }
        let rreg = self.gen_cast(rreg, &Type::ssize_type());
        let dst = self.spawn(ty);
        self.push(
            Ir::new(IrKind::PtrAdd { scale, offset: 0 })
                .with_dst(dst)
                .with_opr1(lreg)
                .with_opr2(rreg),
        );
        Ok(dst)
    }

    fn gen_cast(&mut self, reg: VRegId, dst_ty: &Type) -> VRegId {
        let (dst_size, dst_flags) = self.vtype(dst_ty);
        let src = self.fnbe.ra.vreg(reg).clone();

        if src.is_const() && !src.is_flonum() && !dst_ty.is_flonum() {
            let value = carbide::wrap_value(
                src.fixnum,
                dst_size.bytes(),
                dst_flags.contains(VRegFlags::UNSIGNED),
            );
            return self.spawn_const(value, dst_ty);
        }

        let src_flonum = src.is_flonum();
        let dst_flonum = dst_flags.contains(VRegFlags::FLONUM);
        if src_flonum == dst_flonum
            && src.size == dst_size
            && src.is_unsigned() == dst_flags.contains(VRegFlags::UNSIGNED)
        {
            return reg;
        }

        let dst = self.fnbe.ra.spawn(dst_size, dst_flags);
        // The conversion flavor follows the source's sign.
        let unsigned = src.is_unsigned();
        self.push(
            Ir::new(IrKind::Cast)
                .with_dst(dst)
                .with_opr1(reg)
                .with_unsigned(unsigned),
        );
        dst
    }

    fn gen_ternary(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        let ExprKind::Ternary { cond, tval, fval } = &expr.kind else {
            unreachable!();
        };
        let tbb = self.new_bb();
        let fbb = self.new_bb();
        let nbb = self.new_bb();
        let result = self.spawn(&expr.ty);

        self.gen_cond_jmp(cond, false, fbb)?;
        self.set_curbb(tbb);
        let treg = self.gen_expr(tval)?;
        if !expr.ty.is_void() {
            self.mov(result, treg);
        }
        self.jmp(CondKind::Any, nbb);
        self.set_curbb(fbb);
        let freg = self.gen_expr(fval)?;
        if !expr.ty.is_void() {
            self.mov(result, freg);
        }
        self.set_curbb(nbb);
        Ok(result)
    }

    fn gen_incdec(&mut self, op: UnOp, sub: &Expr, ty: &Type) -> CompileResult<VRegId> {
        let step = match &ty.kind {
            TypeKind::Ptr { pointee } => self.size_of(pointee) as i64,
            _ => 1,
        };
        let arith = if op.is_dec() { IrKind::Sub } else { IrKind::Add };
        let sub = sub.unwrap_group();

        if let ExprKind::Variable { name, scope } = &sub.kind {
            if let Some((owner, _)) = self.unit.scopes.find_var(*scope, name) {
                if let Some(&vreg) = self.var_regs.get(&(owner, name.clone())) {
                    let step_reg = self.spawn_const(step, ty);
                    if op.is_post() {
                        let org = self.spawn(ty);
                        self.mov(org, vreg);
                        let result = self.spawn(ty);
                        self.push(
                            Ir::new(arith)
                                .with_dst(result)
                                .with_opr1(vreg)
                                .with_opr2(step_reg),
                        );
                        self.mov(vreg, result);
                        return Ok(org);
                    }
                    let result = self.spawn(ty);
                    self.push(
                        Ir::new(arith)
                            .with_dst(result)
                            .with_opr1(vreg)
                            .with_opr2(step_reg),
                    );
                    self.mov(vreg, result);
                    return Ok(result);
                }
            }
        }

        // Memory lvalue: load, bump, store.
        let lval = self.gen_lval(sub)?;
        let (size, flags) = self.vtype(ty);
        let loaded = self.fnbe.ra.spawn(size, flags);
        let unsigned = ty.is_unsigned();
        self.push(
            Ir::new(IrKind::Load)
                .with_dst(loaded)
                .with_opr1(lval)
                .with_unsigned(unsigned),
        );
        let step_reg = self.spawn_const(step, ty);
        let bumped = self.spawn(ty);
        self.push(
            Ir::new(arith)
                .with_dst(bumped)
                .with_opr1(loaded)
                .with_opr2(step_reg),
        );
        let tmp = self.spawn(ty);
        self.mov(tmp, bumped);
        self.push(Ir::new(IrKind::Store).with_opr1(tmp).with_opr2(lval));
        Ok(if op.is_post() { loaded } else { bumped })
    }

    fn gen_assign(&mut self, lhs: &Expr, rhs: &Expr) -> CompileResult<VRegId> {
        let src = self.gen_expr(rhs)?;

        if let ExprKind::Variable { name, scope } = &lhs.kind {
            if lhs.ty.is_prim() {
                if let Some((owner, _)) = self.unit.scopes.find_var(*scope, name) {
                    if let Some(&vreg) = self.var_regs.get(&(owner, name.clone())) {
                        self.mov(vreg, src);
                        return Ok(src);
                    }
                }
            }
        }

        let dst = self.gen_lval(lhs)?;
        match &lhs.ty.kind {
            TypeKind::Struct { .. } => {
                let size = self.size_of(&lhs.ty);
                self.push(
                    Ir::new(IrKind::Memcpy { size })
                        .with_opr1(dst)
                        .with_opr2(src),
                );
            }
            _ => {
                // Avoid a spilled source and a spilled target at once.
                let tmp = self.spawn(&lhs.ty);
                self.mov(tmp, src);
                self.push(Ir::new(IrKind::Store).with_opr1(tmp).with_opr2(dst));
            }
        }
        Ok(src)
    }

    fn gen_variable(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        let ExprKind::Variable { name, scope } = &expr.kind else {
            unreachable!();
        };
        let Some((owner, var)) = self.unit.scopes.find_var(*scope, name) else {
            // Undeclared; an error has been reported already.
            return Ok(self.spawn_const(0, &Type::int()));
        };
        if var.storage.contains(Storage::ENUM_MEMBER) {
            let value = var.enum_value;
            return Ok(self.spawn_const(value, &Type::int()));
        }

        match expr.ty.kind {
            TypeKind::Fixnum { .. } | TypeKind::Flonum { .. } | TypeKind::Ptr { .. } => {
                if let Some(&vreg) = self.var_regs.get(&(owner, name.clone())) {
                    return Ok(vreg);
                }
                let addr = self.gen_lval(expr)?;
                let (size, flags) = self.vtype(&expr.ty);
                let dst = self.fnbe.ra.spawn(size, flags);
                let unsigned = expr.ty.is_unsigned();
                self.push(
                    Ir::new(IrKind::Load)
                        .with_dst(dst)
                        .with_opr1(addr)
                        .with_unsigned(unsigned),
                );
                Ok(dst)
            }
            // Arrays, structs and functions are used by address.
            _ => self.gen_lval(expr),
        }
    }

    fn gen_lval(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        let expr = expr.unwrap_group();
        match &expr.kind {
            ExprKind::Variable { name, scope } => {
                let Some((owner, var)) = self.unit.scopes.find_var(*scope, name) else {
                    return Ok(self.spawn_const(0, &Type::int()));
                };
                if owner.is_global() {
                    let global = !var.storage.contains(Storage::STATIC);
                    let label = name.clone();
                    let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                    self.push(Ir::new(IrKind::Iofs { label, global }).with_dst(dst));
                    return Ok(dst);
                }
                if var.storage.contains(Storage::STATIC) {
                    let label = var
                        .static_gvar
                        .clone()
                        .expect("local static must have a global twin");
                    let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                    self.push(Ir::new(IrKind::Iofs { label, global: false }).with_dst(dst));
                    return Ok(dst);
                }
                if var.storage.contains(Storage::EXTERN) {
                    let label = name.clone();
                    let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                    self.push(Ir::new(IrKind::Iofs { label, global: true }).with_dst(dst));
                    return Ok(dst);
                }
                let slot = *self
                    .var_slots
                    .get(&(owner, name.clone()))
                    .expect("register-resident variable has no address");
                let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                self.push(Ir::new(IrKind::Bofs { slot }).with_dst(dst));
                Ok(dst)
            }

            ExprKind::Unary { op: UnOp::Deref, sub } => self.gen_expr(sub),

            ExprKind::Member { target, index, .. } => {
                let struct_ty = if target.ty.is_ptr() || target.ty.is_array() {
                    target.ty.pointee().unwrap()
                } else {
                    &target.ty
                };
                let TypeKind::Struct { name } = &struct_ty.kind else {
                    unreachable!("member access into a non-struct");
                };
                let offset = self
                    .unit
                    .structs
                    .lookup(name)
                    .map(|info| info.members[*index].offset)
                    .unwrap_or(0);

                let base = if target.ty.is_ptr() {
                    self.gen_expr(target)?
                } else {
                    self.gen_lval(target)?
                };
                if offset == 0 {
                    return Ok(base);
                }
                let offset_reg = self.spawn_const(offset as i64, &Type::size_type());
                let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                self.push(
                    Ir::new(IrKind::Add)
                        .with_dst(dst)
                        .with_opr1(base)
                        .with_opr2(offset_reg)
                        .with_unsigned(true),
                );
                Ok(dst)
            }

            ExprKind::CompoundLiteral { var, inits } => {
                let inits = inits.clone();
                let var = (**var).clone();
                for init in inits {
                    self.gen_stmt(init)?;
                }
                self.gen_lval(&var)
            }

            ExprKind::Str(_) => Ok(self.gen_str_literal(expr)),

            _ => unreachable!("not an lvalue"),
        }
    }

    /// A string literal becomes a synthetic const char-array global; its
    /// address is the value.
    fn gen_str_literal(&mut self, expr: &Expr) -> VRegId {
        let ExprKind::Str(bytes) = &expr.kind else {
            unreachable!();
        };
        let ty = Type::array(
            Type::char_().with_qualifier(Qualifiers::CONST),
            Some(bytes.len()),
        )
        .with_qualifier(Qualifiers::CONST);
        let label = self.names.alloc_label();
        let mut var = VarInfo::new(label.clone(), ty.clone(), Storage::STATIC);
        var.init = Some(Initializer::Single(Expr::str(
            ty,
            expr.token.clone(),
            bytes.clone(),
        )));
        self.extra_globals.push(var);

        let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
        self.push(Ir::new(IrKind::Iofs { label, global: false }).with_dst(dst));
        dst
    }

    //
    // Calls
    //

    fn gen_funcall(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        let ExprKind::Call { func, args } = &expr.kind else {
            unreachable!();
        };

        let functype = match &func.ty.kind {
            TypeKind::Ptr { pointee } if pointee.is_func() => (**pointee).clone(),
            _ => func.ty.clone(),
        };
        let (paramc, vaargs) = match &functype.kind {
            TypeKind::Func { params, vaargs, .. } => {
                (params.as_ref().map(Vec::len).unwrap_or(0), *vaargs)
            }
            _ => (0, false),
        };

        // Classify arguments before anything is evaluated.
        struct ArgInfo {
            reg_index: Option<usize>,
            offset: Option<usize>,
            fp_as_gp: bool,
            stack_struct: bool,
            size: usize,
        }
        let mut infos = Vec::with_capacity(args.len());
        let mut iarg = 0usize;
        let mut farg = 0usize;
        let mut offset = 0usize;
        for (i, arg) in args.iter().enumerate() {
            let size = self.size_of(&arg.ty);
            let is_struct = arg.ty.is_struct();
            let flonum = arg.ty.is_flonum();
            let fp_as_gp = flonum && vaargs && i >= paramc && self.target.vaarg_fp_as_gp;

            let mut info = ArgInfo {
                reg_index: None,
                offset: None,
                fp_as_gp,
                stack_struct: is_struct,
                size,
            };
            let reg_avail = if flonum && !fp_as_gp {
                farg < self.target.max_freg_args
            } else {
                iarg < self.target.max_reg_args
            };
            if is_struct || !reg_avail {
                if !reg_avail && vaargs {
                    self.diagnostics.error(
                        arg.token.clone(),
                        DiagnosticKind::RegisterParamCountExceeded {
                            max: self.target.max_reg_args,
                        },
                    )?;
                }
                let align = self.unit.structs.align_of(&arg.ty);
                offset = carbide::align_up(offset, align.max(1));
                info.offset = Some(offset);
                offset += size;
            } else if flonum && !fp_as_gp {
                info.reg_index = Some(farg);
                farg += 1;
            } else {
                info.reg_index = Some(iarg);
                iarg += 1;
            }
            infos.push(info);
        }
        let stack_args_size = carbide::align_up(offset, 8);

        let precall = PrecallId(self.fnbe.precalls.len() as u32);
        self.fnbe.precalls.push(PrecallInfo {
            stack_args_size,
            living_pregs: 0,
        });
        self.push(Ir::new(IrKind::Precall { precall }));

        if stack_args_size > 0 {
            let amount = self.spawn_const(stack_args_size as i64, &Type::size_type());
            self.push(Ir::new(IrKind::SubSp).with_opr1(amount));
        }

        // Arguments are evaluated right to left.
        let mut reg_arg_count = 0usize;
        for (arg, info) in args.iter().zip(&infos).rev() {
            let reg = self.gen_expr(arg)?;
            match info.reg_index {
                Some(index) => {
                    let mut pusharg = Ir::new(IrKind::PushArg {
                        index,
                        fp_as_gp: info.fp_as_gp,
                    })
                    .with_opr1(reg);
                    pusharg.unsigned = arg.ty.is_unsigned();
                    self.push(pusharg);
                    reg_arg_count += 1;
                }
                None => {
                    let sp_offset =
                        self.spawn_const(info.offset.unwrap() as i64, &Type::size_type());
                    let dst = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                    self.push(Ir::new(IrKind::Sofs).with_dst(dst).with_opr1(sp_offset));
                    if info.stack_struct {
                        self.push(
                            Ir::new(IrKind::Memcpy { size: info.size })
                                .with_opr1(dst)
                                .with_opr2(reg),
                        );
                    } else {
                        // Constants cannot be stored directly.
                        let mut value = reg;
                        if self.fnbe.ra.vreg(reg).is_const() {
                            let tmp = self.spawn(&arg.ty);
                            self.mov(tmp, reg);
                            value = tmp;
                        }
                        self.push(Ir::new(IrKind::Store).with_opr1(value).with_opr2(dst));
                    }
                }
            }
        }

        // Direct call through a label, or indirect through a register.
        let mut label = None;
        let mut global = false;
        if let ExprKind::Variable { name, scope } = &func.kind {
            if let Some((owner, var)) = self.unit.scopes.find_var(*scope, name) {
                if var.ty.is_func() {
                    label = Some(name.clone());
                    global = owner.is_global() && !var.storage.contains(Storage::STATIC);
                }
            }
        }
        let freg = if label.is_none() {
            Some(self.gen_expr(func)?)
        } else {
            None
        };

        let dst = if expr.ty.is_void() {
            None
        } else {
            Some(self.spawn(&expr.ty))
        };
        let mut call = Ir::new(IrKind::Call {
            label,
            global,
            precall,
            reg_arg_count,
        });
        if let Some(dst) = dst {
            call = call.with_dst(dst);
        }
        if let Some(freg) = freg {
            call = call.with_opr1(freg);
        }
        self.push(call);
        self.fnbe.has_funcall = true;

        Ok(dst.unwrap_or_else(|| self.spawn_const(0, &Type::int())))
    }

    /// An inline-expanded call: bind arguments to the clone's parameters,
    /// then generate the duplicated body in place. Returns inside the body
    /// route through a result register and an end block.
    fn gen_inlined(&mut self, expr: &Expr) -> CompileResult<VRegId> {
        let ExprKind::Inlined { args, body, .. } = &expr.kind else {
            unreachable!();
        };
        let body = *body;
        let unit = self.unit;

        let StmtKind::Block { scope, .. } = &unit.stmts.get(body).kind else {
            unreachable!("inlined body is a block");
        };
        let param_scope = scope.expect("inlined body has a parameter scope");

        for (i, arg) in args.iter().enumerate() {
            let reg = self.gen_expr(arg)?;
            let param = &unit.scopes.get(param_scope).vars[i];
            let key = (param_scope, param.name.clone());
            if let Some(&vreg) = self.var_regs.get(&key) {
                self.mov(vreg, reg);
            } else if let Some(&slot) = self.var_slots.get(&key) {
                let addr = self.fnbe.ra.spawn(VRegSize::B8, VRegFlags::UNSIGNED);
                self.push(Ir::new(IrKind::Bofs { slot }).with_dst(addr));
                if param.ty.is_struct() {
                    let size = self.size_of(&param.ty);
                    self.push(
                        Ir::new(IrKind::Memcpy { size })
                            .with_opr1(addr)
                            .with_opr2(reg),
                    );
                } else {
                    let tmp = self.spawn(&param.ty);
                    self.mov(tmp, reg);
                    self.push(Ir::new(IrKind::Store).with_opr1(tmp).with_opr2(addr));
                }
            }
        }

        let result = if expr.ty.is_void() {
            None
        } else {
            Some(self.spawn(&expr.ty))
        };
        let end_bb = self.new_bb();
        self.inline_stack.push(InlineCtx { result, end_bb });
        self.gen_stmt(body)?;
        self.inline_stack.pop();
        self.set_curbb(end_bb);

        Ok(result.unwrap_or_else(|| self.spawn_const(0, &Type::int())))
    }
}
