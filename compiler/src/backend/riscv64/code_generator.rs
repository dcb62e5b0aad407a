// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{align_up, Name, NameGen};

use crate::backend::register_allocation::SPILLED_PHYS;
use crate::backend::{AsmOutput, RaFlags};
use crate::ir::{
    CondKind, FuncBackend, Ir, IrKind, ParamDest, PrecallId, VRegId, VRegSize,
};

use super::register::{
    is_im12, CALLEE_SAVE_FREGS, CALLEE_SAVE_REGS, CALLER_SAVE_FREGS, CALLER_SAVE_REGS, FA0_INDEX,
    FP_INDEX, FREG64S, PHYSICAL_REG_MAX, REG64S, TMP_REG, WORD_SIZE,
};

/// Scratch for spilled flonum operands, kept out of the float pool.
const FTMP_REG: &str = "ft11";

#[derive(Debug, Default, Clone)]
struct PrecallState {
    saves: Vec<&'static str>,
    saves_area: usize,
    align_stack: usize,
}

/// Emits one function's allocated IR as RV64 assembly text, one handler
/// per opcode.
pub struct Riscv64CodeGenerator<'a> {
    fnbe: &'a FuncBackend,
    names: &'a mut NameGen,
    out: &'a mut AsmOutput,
    precall_states: Vec<PrecallState>,
}

impl<'a> Riscv64CodeGenerator<'a> {
    pub fn emit(fnbe: &'a FuncBackend, names: &'a mut NameGen, out: &'a mut AsmOutput) {
        let mut this = Self {
            precall_states: vec![PrecallState::default(); fnbe.precalls.len()],
            fnbe,
            names,
            out,
        };
        this.emit_defun();
        this.emit_float_literals();
    }

    fn text(&mut self, line: impl Into<String>) {
        self.out.text.push(line.into());
    }

    fn inst(&mut self, s: String) {
        self.out.text.push(format!("\t{s}"));
    }

    //
    // Operand helpers
    //

    /// Integer source operand; spilled registers are loaded into the
    /// dedicated temporary first.
    fn int_src(&mut self, id: VRegId) -> &'static str {
        let vreg = self.fnbe.ra.vreg(id);
        debug_assert!(!vreg.is_const(), "constant operand must be legalized");
        if vreg.is_spilled() {
            let offset = vreg.frame_offset;
            let operand = self.fp_operand(offset);
            self.inst(format!("ld\t{TMP_REG}, {operand}"));
            return TMP_REG;
        }
        REG64S[vreg.phys]
    }

    fn float_src(&mut self, id: VRegId) -> &'static str {
        let vreg = self.fnbe.ra.vreg(id);
        if vreg.is_spilled() {
            let offset = vreg.frame_offset;
            let operand = self.fp_operand(offset);
            self.inst(format!("fld\t{FTMP_REG}, {operand}"));
            return FTMP_REG;
        }
        FREG64S[vreg.phys]
    }

    /// Destination register; spilled destinations compute into the
    /// temporary and are flushed afterwards.
    fn int_dst(&self, id: VRegId) -> &'static str {
        let vreg = self.fnbe.ra.vreg(id);
        if vreg.is_spilled() {
            TMP_REG
        } else {
            REG64S[vreg.phys]
        }
    }

    fn float_dst(&self, id: VRegId) -> &'static str {
        let vreg = self.fnbe.ra.vreg(id);
        if vreg.is_spilled() {
            FTMP_REG
        } else {
            FREG64S[vreg.phys]
        }
    }

    fn flush_dst(&mut self, id: VRegId) {
        let vreg = self.fnbe.ra.vreg(id);
        if !vreg.is_spilled() {
            return;
        }
        let flonum = vreg.is_flonum();
        let offset = vreg.frame_offset;
        let operand = self.fp_operand(offset);
        if flonum {
            self.inst(format!("fsd\t{FTMP_REG}, {operand}"));
        } else {
            self.inst(format!("sd\t{TMP_REG}, {operand}"));
        }
    }

    /// Frame-pointer addressing, falling back to the temporary when the
    /// offset leaves the immediate range.
    fn fp_operand(&mut self, offset: i32) -> String {
        if is_im12(offset as i64) {
            format!("{offset}(fp)")
        } else {
            self.inst(format!("li\t{TMP_REG}, {offset}"));
            self.inst(format!("add\t{TMP_REG}, {TMP_REG}, fp"));
            format!("0({TMP_REG})")
        }
    }

    fn mov_immediate(&mut self, dst: &str, value: i64) {
        self.inst(format!("li\t{dst}, {value}"));
    }

    fn bb_label(&self, bb: crate::ir::BBId) -> Name {
        self.fnbe.bbcon.get(bb).label.clone()
    }

    //
    // Function shell
    //

    fn emit_defun(&mut self) {
        let name = self.fnbe.name.clone();
        self.text("\t.text".to_string());
        self.inst(".p2align\t2".to_string());
        if self.fnbe.global {
            self.inst(format!(".globl\t{name}"));
        } else {
            self.inst(format!(".local\t{name}"));
        }
        self.text(format!("{name}:"));

        let no_stmt = self.fnbe.no_stmt;
        let frame_size = self.fnbe.frame_size;
        let fp_saved = frame_size > 0 || self.fnbe.ra.flags.contains(RaFlags::STACK_FRAME);
        let lr_saved = self.fnbe.has_funcall;
        let mut used_reg_bits = self.fnbe.ra.used_reg_bits;

        if !no_stmt {
            if fp_saved || lr_saved {
                self.inst("addi\tsp, sp, -16".to_string());
                self.inst("sd\tra, 8(sp)".to_string());
                self.inst("sd\tfp, 0(sp)".to_string());
                // The frame pointer is saved here, not with the callee saves.
                used_reg_bits &= !(1u64 << FP_INDEX);
            }

            self.push_callee_save_regs(used_reg_bits, self.fnbe.ra.used_freg_bits);

            if fp_saved {
                self.inst("mv\tfp, sp".to_string());
                if frame_size > 0 {
                    if is_im12(frame_size as i64) {
                        self.inst(format!("addi\tsp, sp, -{frame_size}"));
                    } else {
                        self.mov_immediate(TMP_REG, frame_size as i64);
                        self.inst(format!("sub\tsp, sp, {TMP_REG}"));
                    }
                }
            }

            self.move_params_to_assigned();
        }

        let layout = self.fnbe.bbcon.layout.clone();
        for bb in layout {
            let label = self.bb_label(bb);
            self.text(format!("{label}:"));
            let irs: Vec<Ir> = self.fnbe.bbcon.get(bb).irs.clone();
            for ir in &irs {
                self.emit_ir(ir);
            }
        }

        if self.fnbe.falls_to_epilogue {
            if !no_stmt {
                if fp_saved {
                    self.inst("mv\tsp, fp".to_string());
                }
                self.pop_callee_save_regs(used_reg_bits, self.fnbe.ra.used_freg_bits);
                if fp_saved || lr_saved {
                    self.inst("ld\tfp, 0(sp)".to_string());
                    self.inst("ld\tra, 8(sp)".to_string());
                    self.inst("addi\tsp, sp, 16".to_string());
                }
            }
            self.inst("ret".to_string());
        }
    }

    fn callee_saves(used: u64, fused: u64) -> Vec<&'static str> {
        let mut saves = Vec::new();
        for &i in CALLEE_SAVE_REGS {
            if used & (1u64 << i) != 0 {
                saves.push(REG64S[i]);
            }
        }
        for &i in CALLEE_SAVE_FREGS {
            if fused & (1u64 << i) != 0 {
                saves.push(FREG64S[i]);
            }
        }
        saves
    }

    fn push_callee_save_regs(&mut self, used: u64, fused: u64) {
        let saves = Self::callee_saves(used, fused);
        let total = saves.len();
        let total_aligned = align_up(total, 2);
        if total_aligned == 0 {
            return;
        }
        self.inst(format!("addi\tsp, sp, -{}", WORD_SIZE * total_aligned));
        for (i, reg) in saves.iter().enumerate() {
            let offset = (total - 1 - i) * WORD_SIZE;
            if is_freg(reg) {
                self.inst(format!("fsd\t{reg}, {offset}(sp)"));
            } else {
                self.inst(format!("sd\t{reg}, {offset}(sp)"));
            }
        }
    }

    fn pop_callee_save_regs(&mut self, used: u64, fused: u64) {
        let saves = Self::callee_saves(used, fused);
        let total = saves.len();
        if total == 0 {
            return;
        }
        for (i, reg) in saves.iter().enumerate().rev() {
            let offset = (total - 1 - i) * WORD_SIZE;
            if is_freg(reg) {
                self.inst(format!("fld\t{reg}, {offset}(sp)"));
            } else {
                self.inst(format!("ld\t{reg}, {offset}(sp)"));
            }
        }
        self.inst(format!("addi\tsp, sp, {}", WORD_SIZE * align_up(total, 2)));
    }

    /// Incoming arguments sit in a0../fa0..; move each into its assigned
    /// register or store it into its frame slot.
    fn move_params_to_assigned(&mut self) {
        let params = self.fnbe.params.clone();
        for param in &params {
            let src: &'static str = if param.flonum {
                FREG64S[param.index]
            } else {
                REG64S[param.index]
            };
            match param.dest {
                ParamDest::Reg(vreg) => {
                    let v = self.fnbe.ra.vreg(vreg);
                    if v.is_spilled() {
                        let offset = v.frame_offset;
                        let operand = self.fp_operand(offset);
                        if param.flonum {
                            self.inst(format!("fsd\t{src}, {operand}"));
                        } else {
                            self.inst(format!("sd\t{src}, {operand}"));
                        }
                    } else if v.phys != SPILLED_PHYS {
                        if param.flonum {
                            let dst = FREG64S[v.phys];
                            if dst != src {
                                self.inst(format!("fmv.d\t{dst}, {src}"));
                            }
                        } else {
                            let dst = REG64S[v.phys];
                            if dst != src {
                                self.inst(format!("mv\t{dst}, {src}"));
                            }
                        }
                    }
                }
                ParamDest::Slot(slot) => {
                    let offset = self.fnbe.frame_slot(slot).offset;
                    let operand = self.fp_operand(offset);
                    if param.flonum {
                        self.inst(format!("fsd\t{src}, {operand}"));
                    } else {
                        let op = match param.size {
                            VRegSize::B1 => "sb",
                            VRegSize::B2 => "sh",
                            VRegSize::B4 => "sw",
                            VRegSize::B8 => "sd",
                        };
                        self.inst(format!("{op}\t{src}, {operand}"));
                    }
                }
            }
        }
    }

    fn emit_float_literals(&mut self) {
        for (label, value, size) in &self.fnbe.float_literals {
            self.out.rodata.push(format!("\t.p2align\t{}", size.pow()));
            self.out.rodata.push(format!("{label}:"));
            match size {
                VRegSize::B4 => self
                    .out
                    .rodata
                    .push(format!("\t.word\t{:#010x}", (*value as f32).to_bits())),
                _ => self
                    .out
                    .rodata
                    .push(format!("\t.quad\t{:#018x}", value.to_bits())),
            }
        }
    }

    //
    // Per-opcode emitters
    //

    fn emit_ir(&mut self, ir: &Ir) {
        match &ir.kind {
            IrKind::Bofs { slot } => {
                let offset = self.fnbe.frame_slot(*slot).offset;
                let dst = self.int_dst(ir.dst.unwrap());
                if is_im12(offset as i64) {
                    self.inst(format!("addi\t{dst}, fp, {offset}"));
                } else {
                    self.mov_immediate(dst, offset as i64);
                    self.inst(format!("add\t{dst}, {dst}, fp"));
                }
                self.flush_dst(ir.dst.unwrap());
            }

            IrKind::Iofs { label, global } => {
                _ = global;
                let dst = self.int_dst(ir.dst.unwrap());
                self.inst(format!("lui\t{dst}, %hi({label})"));
                self.inst(format!("addi\t{dst}, {dst}, %lo({label})"));
                self.flush_dst(ir.dst.unwrap());
            }

            IrKind::Sofs => {
                let offset = self.fnbe.ra.vreg(ir.opr1.unwrap()).fixnum;
                let dst = self.int_dst(ir.dst.unwrap());
                self.inst(format!("addi\t{dst}, sp, {offset}"));
                self.flush_dst(ir.dst.unwrap());
            }

            IrKind::Load => self.emit_load(ir, false),
            IrKind::LoadSpilled => self.emit_load(ir, true),
            IrKind::Store => self.emit_store(ir),
            IrKind::StoreSpilled => self.emit_store_spilled(ir),

            IrKind::Add => self.emit_addsub(ir, false),
            IrKind::Sub => self.emit_addsub(ir, true),
            IrKind::Mul => self.emit_mul_div_mod(ir, "mul", "mul"),
            IrKind::Div => {
                if ir.unsigned {
                    self.emit_mul_div_mod(ir, "divu", "divuw");
                } else {
                    self.emit_mul_div_mod(ir, "div", "divw");
                }
            }
            IrKind::Mod => {
                if ir.unsigned {
                    self.emit_mul_div_mod(ir, "remu", "remuw");
                } else {
                    self.emit_mul_div_mod(ir, "rem", "remw");
                }
            }

            IrKind::BitAnd => self.emit_logical(ir, "and"),
            IrKind::BitOr => self.emit_logical(ir, "or"),
            IrKind::BitXor => self.emit_logical(ir, "xor"),
            IrKind::LShift => self.emit_shift(ir, "sll", "slli"),
            IrKind::RShift => {
                if ir.unsigned {
                    self.emit_shift(ir, "srl", "srli");
                } else {
                    self.emit_shift(ir, "sra", "srai");
                }
            }

            IrKind::PtrAdd { scale, offset } => self.emit_ptradd(ir, *scale, *offset),
            IrKind::Neg => {
                let src = self.int_src(ir.opr1.unwrap());
                let dst = self.int_dst(ir.dst.unwrap());
                self.inst(format!("neg\t{dst}, {src}"));
                self.flush_dst(ir.dst.unwrap());
            }
            IrKind::BitNot => {
                let src = self.int_src(ir.opr1.unwrap());
                let dst = self.int_dst(ir.dst.unwrap());
                self.inst(format!("not\t{dst}, {src}"));
                self.flush_dst(ir.dst.unwrap());
            }

            IrKind::Cond { cond } => self.emit_cond(ir, *cond),
            IrKind::Jmp { cond, bb } => self.emit_jmp(ir, *cond, *bb),
            IrKind::TJmp { bbs } => self.emit_tjmp(ir, bbs),
            IrKind::Precall { precall } => self.emit_precall(ir, *precall),
            IrKind::PushArg { index, fp_as_gp } => self.emit_pusharg(ir, *index, *fp_as_gp),
            IrKind::Call { label, global, precall, .. } => {
                self.emit_call(ir, label.as_ref(), *global, *precall);
            }
            IrKind::Result => self.emit_result(ir),
            IrKind::SubSp => self.emit_subsp(ir),
            IrKind::Cast => self.emit_cast(ir),
            IrKind::Mov => self.emit_mov(ir),
            IrKind::Memcpy { size } => self.emit_memcpy(ir, *size),
            IrKind::Asm { text } => self.inst(text.clone()),
        }
    }

    fn emit_load(&mut self, ir: &Ir, spilled: bool) {
        let src_operand = if spilled {
            let offset = self.fnbe.ra.vreg(ir.opr1.unwrap()).frame_offset;
            self.fp_operand(offset)
        } else {
            let addr = self.int_src(ir.opr1.unwrap());
            format!("0({addr})")
        };

        let dst_id = ir.dst.unwrap();
        let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
        if dst_vreg.is_flonum() {
            let dst = self.float_dst(dst_id);
            match dst_vreg.size {
                VRegSize::B4 => self.inst(format!("flw\t{dst}, {src_operand}")),
                _ => self.inst(format!("fld\t{dst}, {src_operand}")),
            }
            self.flush_dst(dst_id);
            return;
        }

        let dst = self.int_dst(dst_id);
        let op = match (dst_vreg.size, ir.unsigned) {
            (VRegSize::B1, true) => "lbu",
            (VRegSize::B1, false) => "lb",
            (VRegSize::B2, true) => "lhu",
            (VRegSize::B2, false) => "lh",
            (VRegSize::B4, true) => "lwu",
            (VRegSize::B4, false) => "lw",
            (VRegSize::B8, _) => "ld",
        };
        self.inst(format!("{op}\t{dst}, {src_operand}"));
        self.flush_dst(dst_id);
    }

    fn emit_store(&mut self, ir: &Ir) {
        let addr = self.int_src(ir.opr2.unwrap());
        let target = format!("0({addr})");
        self.emit_store_to(ir, target);
    }

    fn emit_store_spilled(&mut self, ir: &Ir) {
        let offset = self.fnbe.ra.vreg(ir.dst.unwrap()).frame_offset;
        let target = self.fp_operand(offset);
        self.emit_store_to(ir, target);
    }

    fn emit_store_to(&mut self, ir: &Ir, target: String) {
        let value_id = ir.opr1.unwrap();
        let value = self.fnbe.ra.vreg(value_id).clone();
        if value.is_flonum() {
            let src = self.float_src(value_id);
            match value.size {
                VRegSize::B4 => self.inst(format!("fsw\t{src}, {target}")),
                _ => self.inst(format!("fsd\t{src}, {target}")),
            }
            return;
        }
        let src = if value.is_const() {
            if value.fixnum == 0 {
                "zero"
            } else {
                self.mov_immediate(TMP_REG, value.fixnum);
                TMP_REG
            }
        } else {
            self.int_src(value_id)
        };
        let op = match value.size {
            VRegSize::B1 => "sb",
            VRegSize::B2 => "sh",
            VRegSize::B4 => "sw",
            VRegSize::B8 => "sd",
        };
        self.inst(format!("{op}\t{src}, {target}"));
    }

    fn emit_addsub(&mut self, ir: &Ir, sub: bool) {
        let dst_id = ir.dst.unwrap();
        let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
        if dst_vreg.is_flonum() {
            let o1 = self.float_src(ir.opr1.unwrap());
            let o2 = self.float_src(ir.opr2.unwrap());
            let dst = self.float_dst(dst_id);
            let op = match (sub, dst_vreg.size) {
                (false, VRegSize::B4) => "fadd.s",
                (false, _) => "fadd.d",
                (true, VRegSize::B4) => "fsub.s",
                (true, _) => "fsub.d",
            };
            self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
            self.flush_dst(dst_id);
            return;
        }

        let narrow = dst_vreg.size <= VRegSize::B4 && !ir.unsigned;
        let o1 = self.int_src(ir.opr1.unwrap());
        let opr2 = self.fnbe.ra.vreg(ir.opr2.unwrap()).clone();
        let dst = self.int_dst(dst_id);
        if opr2.is_const() {
            let imm = if sub { -opr2.fixnum } else { opr2.fixnum };
            let op = if narrow { "addiw" } else { "addi" };
            self.inst(format!("{op}\t{dst}, {o1}, {imm}"));
        } else {
            let o2 = self.int_src(ir.opr2.unwrap());
            let op = match (sub, narrow) {
                (false, true) => "addw",
                (false, false) => "add",
                (true, true) => "subw",
                (true, false) => "sub",
            };
            self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
        }
        self.flush_dst(dst_id);
    }

    fn emit_mul_div_mod(&mut self, ir: &Ir, wide: &str, narrow_op: &str) {
        let dst_id = ir.dst.unwrap();
        let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
        if dst_vreg.is_flonum() {
            let o1 = self.float_src(ir.opr1.unwrap());
            let o2 = self.float_src(ir.opr2.unwrap());
            let dst = self.float_dst(dst_id);
            let op = match (wide, dst_vreg.size) {
                ("mul", VRegSize::B4) => "fmul.s",
                ("mul", _) => "fmul.d",
                (_, VRegSize::B4) => "fdiv.s",
                (_, _) => "fdiv.d",
            };
            self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
            self.flush_dst(dst_id);
            return;
        }
        let o1 = self.int_src(ir.opr1.unwrap());
        let o2 = self.int_src(ir.opr2.unwrap());
        let dst = self.int_dst(dst_id);
        let narrow = dst_vreg.size <= VRegSize::B4 && !ir.unsigned;
        let op = if narrow && wide == "mul" {
            "mulw"
        } else if narrow {
            narrow_op
        } else {
            wide
        };
        self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
        self.flush_dst(dst_id);
    }

    fn emit_logical(&mut self, ir: &Ir, op: &str) {
        let o1 = self.int_src(ir.opr1.unwrap());
        let opr2 = self.fnbe.ra.vreg(ir.opr2.unwrap()).clone();
        let dst = self.int_dst(ir.dst.unwrap());
        if opr2.is_const() {
            self.inst(format!("{op}i\t{dst}, {o1}, {}", opr2.fixnum));
        } else {
            let o2 = self.int_src(ir.opr2.unwrap());
            self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
        }
        self.flush_dst(ir.dst.unwrap());
    }

    fn emit_shift(&mut self, ir: &Ir, op: &str, imm_op: &str) {
        let o1 = self.int_src(ir.opr1.unwrap());
        let opr2 = self.fnbe.ra.vreg(ir.opr2.unwrap()).clone();
        let dst = self.int_dst(ir.dst.unwrap());
        if opr2.is_const() {
            self.inst(format!("{imm_op}\t{dst}, {o1}, {}", opr2.fixnum));
        } else {
            let o2 = self.int_src(ir.opr2.unwrap());
            self.inst(format!("{op}\t{dst}, {o1}, {o2}"));
        }
        self.flush_dst(ir.dst.unwrap());
    }

    fn emit_ptradd(&mut self, ir: &Ir, scale: usize, offset: i64) {
        let base = self.int_src(ir.opr1.unwrap());
        let dst = self.int_dst(ir.dst.unwrap());

        let mut cur: &str = base;
        if let Some(index) = ir.opr2 {
            let idx = self.int_src(index);
            if scale > 1 {
                let shift = scale.trailing_zeros();
                // Shift into the destination unless that would clobber the
                // base first.
                let scratch = if dst != base { dst } else { TMP_REG };
                self.inst(format!("slli\t{scratch}, {idx}, {shift}"));
                self.inst(format!("add\t{dst}, {cur}, {scratch}"));
            } else {
                self.inst(format!("add\t{dst}, {cur}, {idx}"));
            }
            cur = dst;
        }
        if offset != 0 {
            if is_im12(offset) {
                self.inst(format!("addi\t{dst}, {cur}, {offset}"));
            } else {
                self.mov_immediate(TMP_REG, offset);
                self.inst(format!("add\t{dst}, {cur}, {TMP_REG}"));
            }
            cur = dst;
        }
        if cur != dst {
            self.inst(format!("mv\t{dst}, {cur}"));
        }
        self.flush_dst(ir.dst.unwrap());
    }

    fn emit_cond(&mut self, ir: &Ir, cond: CondKind) {
        let opr1_id = ir.opr1.unwrap();
        let opr2_id = ir.opr2.unwrap();
        let dst = self.int_dst(ir.dst.unwrap());

        if self.fnbe.ra.vreg(opr1_id).is_flonum() {
            let single = self.fnbe.ra.vreg(opr1_id).size == VRegSize::B4;
            let (mut o1, mut o2) = (self.float_src(opr1_id), self.float_src(opr2_id));
            let base = match cond {
                CondKind::Eq | CondKind::Ne => {
                    if single { "feq.s" } else { "feq.d" }
                }
                CondKind::Lt | CondKind::ULt | CondKind::Gt | CondKind::UGt => {
                    if matches!(cond, CondKind::Gt | CondKind::UGt) {
                        std::mem::swap(&mut o1, &mut o2);
                    }
                    if single { "flt.s" } else { "flt.d" }
                }
                CondKind::Le | CondKind::ULe | CondKind::Ge | CondKind::UGe => {
                    if matches!(cond, CondKind::Ge | CondKind::UGe) {
                        std::mem::swap(&mut o1, &mut o2);
                    }
                    if single { "fle.s" } else { "fle.d" }
                }
                _ => unreachable!("unconditional cond materialization"),
            };
            self.inst(format!("{base}\t{dst}, {o1}, {o2}"));
            if matches!(cond, CondKind::Ne) {
                self.inst(format!("seqz\t{dst}, {dst}"));
            }
            self.flush_dst(ir.dst.unwrap());
            return;
        }

        match cond {
            CondKind::Eq | CondKind::Ne => {
                let opr2 = self.fnbe.ra.vreg(opr2_id);
                debug_assert!(opr2.is_const() && opr2.fixnum == 0);
                let o1 = self.int_src(opr1_id);
                if cond == CondKind::Eq {
                    self.inst(format!("seqz\t{dst}, {o1}"));
                } else {
                    self.inst(format!("snez\t{dst}, {o1}"));
                }
            }
            CondKind::Lt | CondKind::ULt | CondKind::Gt | CondKind::UGt => {
                let (a, b) = if matches!(cond, CondKind::Gt | CondKind::UGt) {
                    (opr2_id, opr1_id)
                } else {
                    (opr1_id, opr2_id)
                };
                let o1 = self.int_src(a);
                let opr2 = self.fnbe.ra.vreg(b).clone();
                let slt = if cond.is_unsigned() { "sltu" } else { "slt" };
                let slti = if cond.is_unsigned() { "sltiu" } else { "slti" };
                if opr2.is_const() {
                    self.inst(format!("{slti}\t{dst}, {o1}, {}", opr2.fixnum));
                } else {
                    let o2 = self.int_src(b);
                    self.inst(format!("{slt}\t{dst}, {o1}, {o2}"));
                }
            }
            CondKind::Le | CondKind::ULe | CondKind::Ge | CondKind::UGe => {
                // lhs <= rhs is 1 - (rhs < lhs).
                let (a, b) = if matches!(cond, CondKind::Ge | CondKind::UGe) {
                    (opr1_id, opr2_id)
                } else {
                    (opr2_id, opr1_id)
                };
                let o2 = self.int_src(a);
                let opr1 = self.fnbe.ra.vreg(b).clone();
                let slt = if cond.is_unsigned() { "sltu" } else { "slt" };
                let slti = if cond.is_unsigned() { "sltiu" } else { "slti" };
                if opr1.is_const() {
                    self.inst(format!("{slti}\t{dst}, {o2}, {}", opr1.fixnum));
                } else {
                    let o1 = self.int_src(b);
                    self.inst(format!("{slt}\t{dst}, {o2}, {o1}"));
                }
                self.inst(format!("neg\t{dst}, {dst}"));
                self.inst(format!("addi\t{dst}, {dst}, 1"));
            }
            _ => unreachable!("unconditional cond materialization"),
        }
        self.flush_dst(ir.dst.unwrap());
    }

    fn emit_jmp(&mut self, ir: &Ir, cond: CondKind, bb: crate::ir::BBId) {
        let label = self.bb_label(bb);
        match cond {
            CondKind::Any => {
                self.inst(format!("j\t{label}"));
                return;
            }
            CondKind::None => return,
            _ => {}
        }

        let o1 = self.int_src(ir.opr1.unwrap());
        let opr2 = self.fnbe.ra.vreg(ir.opr2.unwrap()).clone();
        let o2: &str = if opr2.is_const() {
            debug_assert_eq!(opr2.fixnum, 0);
            "zero"
        } else {
            self.int_src(ir.opr2.unwrap())
        };

        let line = match cond {
            CondKind::Eq => format!("beq\t{o1}, {o2}, {label}"),
            CondKind::Ne => format!("bne\t{o1}, {o2}, {label}"),
            CondKind::Lt => format!("blt\t{o1}, {o2}, {label}"),
            CondKind::Gt => format!("blt\t{o2}, {o1}, {label}"),
            CondKind::Le => format!("bge\t{o2}, {o1}, {label}"),
            CondKind::Ge => format!("bge\t{o1}, {o2}, {label}"),
            CondKind::ULt => format!("bltu\t{o1}, {o2}, {label}"),
            CondKind::UGt => format!("bltu\t{o2}, {o1}, {label}"),
            CondKind::ULe => format!("bgeu\t{o2}, {o1}, {label}"),
            CondKind::UGe => format!("bgeu\t{o1}, {o2}, {label}"),
            _ => unreachable!(),
        };
        self.inst(line);
    }

    fn emit_tjmp(&mut self, ir: &Ir, bbs: &[crate::ir::BBId]) {
        let table = self.names.alloc_label();
        self.inst(format!("lui\t{TMP_REG}, %hi({table})"));
        self.inst(format!("addi\t{TMP_REG}, {TMP_REG}, %lo({table})"));
        // index register may be broken; the tweak pass copied it.
        let opr1 = self.int_src(ir.opr1.unwrap());
        self.inst(format!("slli\t{opr1}, {opr1}, 3"));
        self.inst(format!("add\t{TMP_REG}, {TMP_REG}, {opr1}"));
        self.inst(format!("ld\t{TMP_REG}, 0({TMP_REG})"));
        self.inst(format!("jr\t{TMP_REG}"));

        self.out.rodata.push("\t.p2align\t3".to_string());
        self.out.rodata.push(format!("{table}:"));
        for &bb in bbs {
            let label = self.bb_label(bb);
            self.out.rodata.push(format!("\t.quad\t{label}"));
        }
    }

    fn emit_precall(&mut self, _ir: &Ir, precall: PrecallId) {
        let info = &self.fnbe.precalls[precall.0 as usize];
        let living = info.living_pregs;
        let stack_args_size = info.stack_args_size;

        // Living registers are not modified while arguments are prepared,
        // so they can be saved before computing the argument values.
        let mut saves: Vec<&'static str> = Vec::new();
        for &i in CALLER_SAVE_REGS {
            if living & (1u64 << i) != 0 {
                saves.push(REG64S[i]);
            }
        }
        for &i in CALLER_SAVE_FREGS {
            if living & (1u64 << (i + PHYSICAL_REG_MAX)) != 0 {
                saves.push(FREG64S[i]);
            }
        }
        let saves_area = align_up(saves.len() * WORD_SIZE, 16);
        if saves_area > 0 {
            self.inst(format!("addi\tsp, sp, -{saves_area}"));
            for (i, reg) in saves.iter().enumerate() {
                let offset = (saves.len() - 1 - i) * WORD_SIZE;
                if is_freg(reg) {
                    self.inst(format!("fsd\t{reg}, {offset}(sp)"));
                } else {
                    self.inst(format!("sd\t{reg}, {offset}(sp)"));
                }
            }
        }

        let align_stack = (16 - (stack_args_size & 15)) & 15;
        if align_stack > 0 {
            self.inst(format!("addi\tsp, sp, -{align_stack}"));
        }

        self.precall_states[precall.0 as usize] = PrecallState {
            saves,
            saves_area,
            align_stack,
        };
    }

    fn emit_pusharg(&mut self, ir: &Ir, index: usize, fp_as_gp: bool) {
        let opr1_id = ir.opr1.unwrap();
        let opr1 = self.fnbe.ra.vreg(opr1_id).clone();
        if opr1.is_flonum() {
            let src = self.float_src(opr1_id);
            if fp_as_gp {
                let dst = REG64S[index];
                match opr1.size {
                    VRegSize::B4 => self.inst(format!("fmv.x.w\t{dst}, {src}")),
                    _ => self.inst(format!("fmv.x.d\t{dst}, {src}")),
                }
                return;
            }
            let dst = FREG64S[index];
            if dst != src {
                self.inst(format!("fmv.d\t{dst}, {src}"));
            }
        } else {
            let src = self.int_src(opr1_id);
            let dst = REG64S[index];
            if dst != src {
                self.inst(format!("mv\t{dst}, {src}"));
            }
        }
    }

    fn emit_call(&mut self, ir: &Ir, label: Option<&Name>, global: bool, precall: PrecallId) {
        _ = global;
        match label {
            Some(label) => self.inst(format!("call\t{label}")),
            None => {
                let target = self.int_src(ir.opr1.unwrap());
                self.inst(format!("jalr\t{target}"));
            }
        }

        let state = self.precall_states[precall.0 as usize].clone();
        let info = &self.fnbe.precalls[precall.0 as usize];
        let rebalance = state.align_stack + info.stack_args_size;
        if rebalance != 0 {
            self.inst(format!("addi\tsp, sp, {rebalance}"));
        }

        // Restore caller-saved registers.
        if state.saves_area > 0 {
            for (i, reg) in state.saves.iter().enumerate().rev() {
                let offset = (state.saves.len() - 1 - i) * WORD_SIZE;
                if is_freg(reg) {
                    self.inst(format!("fld\t{reg}, {offset}(sp)"));
                } else {
                    self.inst(format!("ld\t{reg}, {offset}(sp)"));
                }
            }
            self.inst(format!("addi\tsp, sp, {}", state.saves_area));
        }

        if let Some(dst_id) = ir.dst {
            let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
            if dst_vreg.is_flonum() {
                let dst = self.float_dst(dst_id);
                if dst != FREG64S[FA0_INDEX] {
                    self.inst(format!("fmv.d\t{dst}, {}", FREG64S[FA0_INDEX]));
                }
            } else {
                let dst = self.int_dst(dst_id);
                if dst != REG64S[super::register::A0_INDEX] {
                    self.inst(format!("mv\t{dst}, {}", REG64S[super::register::A0_INDEX]));
                }
            }
            self.flush_dst(dst_id);
        }
    }

    fn emit_result(&mut self, ir: &Ir) {
        let opr1_id = ir.opr1.unwrap();
        let opr1 = self.fnbe.ra.vreg(opr1_id).clone();
        if opr1.is_flonum() {
            let dst = match ir.dst {
                Some(dst) => self.float_dst(dst),
                None => FREG64S[FA0_INDEX],
            };
            let src = self.float_src(opr1_id);
            if src != dst {
                self.inst(format!("fmv.d\t{dst}, {src}"));
            }
            return;
        }

        let dst = match ir.dst {
            Some(dst) => self.int_dst(dst),
            None => REG64S[super::register::A0_INDEX],
        };
        if opr1.is_const() {
            self.mov_immediate(dst, opr1.fixnum);
        } else {
            let src = self.int_src(opr1_id);
            if src != dst {
                self.inst(format!("mv\t{dst}, {src}"));
            }
        }
    }

    fn emit_subsp(&mut self, ir: &Ir) {
        let opr1_id = ir.opr1.unwrap();
        let opr1 = self.fnbe.ra.vreg(opr1_id).clone();
        if opr1.is_const() {
            if opr1.fixnum != 0 {
                if is_im12(opr1.fixnum) {
                    self.inst(format!("addi\tsp, sp, -{}", opr1.fixnum));
                } else {
                    self.mov_immediate(TMP_REG, opr1.fixnum);
                    self.inst(format!("sub\tsp, sp, {TMP_REG}"));
                }
            }
        } else {
            let src = self.int_src(opr1_id);
            self.inst(format!("sub\tsp, sp, {src}"));
        }
        if let Some(dst_id) = ir.dst {
            let dst = self.int_dst(dst_id);
            self.inst(format!("mv\t{dst}, sp"));
            self.flush_dst(dst_id);
        }
    }

    fn emit_cast(&mut self, ir: &Ir) {
        let dst_id = ir.dst.unwrap();
        let src_id = ir.opr1.unwrap();
        let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
        let src_vreg = self.fnbe.ra.vreg(src_id).clone();

        if dst_vreg.is_flonum() {
            if src_vreg.is_flonum() {
                let src = self.float_src(src_id);
                let dst = self.float_dst(dst_id);
                match dst_vreg.size {
                    VRegSize::B4 => self.inst(format!("fcvt.s.d\t{dst}, {src}")),
                    _ => self.inst(format!("fcvt.d.s\t{dst}, {src}")),
                }
            } else {
                let src = self.int_src(src_id);
                let dst = self.float_dst(dst_id);
                let op = match (dst_vreg.size, ir.unsigned) {
                    (VRegSize::B4, true) => "fcvt.s.wu",
                    (VRegSize::B4, false) => "fcvt.s.w",
                    (_, true) => "fcvt.d.wu",
                    (_, false) => "fcvt.d.w",
                };
                self.inst(format!("{op}\t{dst}, {src}"));
            }
            self.flush_dst(dst_id);
            return;
        }

        if src_vreg.is_flonum() {
            let src = self.float_src(src_id);
            let dst = self.int_dst(dst_id);
            match src_vreg.size {
                VRegSize::B4 => self.inst(format!("fcvt.w.s\t{dst}, {src}, rtz")),
                _ => self.inst(format!("fcvt.w.d\t{dst}, {src}, rtz")),
            }
            self.flush_dst(dst_id);
            return;
        }

        // Fixnum narrowing/widening: the shift width comes from the
        // smaller of the two sizes.
        let src = self.int_src(src_id);
        let dst = self.int_dst(dst_id);
        let pow = dst_vreg.size.pow().min(src_vreg.size.pow());
        if ir.unsigned {
            let shift = (8 - (1usize << pow)) * 8;
            self.inst(format!("slli\t{dst}, {src}, {shift}"));
            self.inst(format!("srli\t{dst}, {dst}, {shift}"));
        } else if pow < 2 {
            let shift = (4 - (1usize << pow)) * 8;
            self.inst(format!("slliw\t{dst}, {src}, {shift}"));
            self.inst(format!("sraiw\t{dst}, {dst}, {shift}"));
        } else {
            self.inst(format!("sext.w\t{dst}, {src}"));
        }
        self.flush_dst(dst_id);
    }

    fn emit_mov(&mut self, ir: &Ir) {
        let dst_id = ir.dst.unwrap();
        let src_id = ir.opr1.unwrap();
        let dst_vreg = self.fnbe.ra.vreg(dst_id).clone();
        let src_vreg = self.fnbe.ra.vreg(src_id).clone();

        if dst_vreg.is_flonum() {
            let src = self.float_src(src_id);
            let dst = self.float_dst(dst_id);
            if src != dst {
                self.inst(format!("fmv.d\t{dst}, {src}"));
            }
            self.flush_dst(dst_id);
            return;
        }

        let dst = self.int_dst(dst_id);
        if src_vreg.is_const() {
            self.mov_immediate(dst, src_vreg.fixnum);
        } else {
            let src = self.int_src(src_id);
            if src != dst {
                self.inst(format!("mv\t{dst}, {src}"));
            }
        }
        self.flush_dst(dst_id);
    }

    /// Unrolled word-at-a-time copy through the temporary.
    fn emit_memcpy(&mut self, ir: &Ir, size: usize) {
        let dst = self.int_src(ir.opr1.unwrap());
        debug_assert_ne!(dst, TMP_REG, "memcpy destination clobbers the temporary");
        let src = self.int_src(ir.opr2.unwrap());
        let mut offset = 0usize;
        let mut remaining = size;
        while remaining > 0 {
            let (chunk, load, store) = if remaining >= 8 {
                (8, "ld", "sd")
            } else if remaining >= 4 {
                (4, "lw", "sw")
            } else if remaining >= 2 {
                (2, "lh", "sh")
            } else {
                (1, "lb", "sb")
            };
            self.inst(format!("{load}\t{TMP_REG}, {offset}({src})"));
            self.inst(format!("{store}\t{TMP_REG}, {offset}({dst})"));
            offset += chunk;
            remaining -= chunk;
        }
    }
}

fn is_freg(reg: &str) -> bool {
    reg.starts_with('f') && !reg.starts_with("fp")
}
