// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::backend::RegisterAllocator;
use crate::ir::{CondKind, FuncBackend, Ir, IrKind, VRegFlags, VRegId, VRegSize};

use super::register::is_im12;

/// Rewrite the IR in place so every instruction fits an RV64 encoding:
/// constants move into registers where the instruction form has no
/// immediate, subtraction from zero becomes negation, equality against a
/// non-zero constant becomes subtract-then-compare-zero, and flonum
/// conditional jumps are materialized as set-then-branch because there is
/// no flag register to branch on.
pub fn tweak_irs(fnbe: &mut FuncBackend) {
    let layout = fnbe.bbcon.layout.clone();
    for bb in layout {
        let mut irs = std::mem::take(&mut fnbe.bbcon.get_mut(bb).irs);
        let mut j = 0;
        while j < irs.len() {
            match irs[j].kind {
                IrKind::Load => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                }
                IrKind::Store => {
                    if is_const(&fnbe.ra, irs[j].opr2) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::Add | IrKind::PtrAdd { .. } => {
                    if is_const(&fnbe.ra, irs[j].opr1) && !is_const(&fnbe.ra, irs[j].opr2) {
                        if matches!(irs[j].kind, IrKind::Add) {
                            let ir = &mut irs[j];
                            std::mem::swap(&mut ir.opr1, &mut ir.opr2);
                        } else {
                            insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                            j += 1;
                        }
                    } else if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                    if matches!(irs[j].kind, IrKind::Add)
                        && is_const(&fnbe.ra, irs[j].opr2)
                        && !is_im12(const_value(&fnbe.ra, irs[j].opr2))
                    {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::Sub => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        if const_value(&fnbe.ra, irs[j].opr1) == 0 {
                            let ir = &mut irs[j];
                            ir.kind = IrKind::Neg;
                            ir.opr1 = ir.opr2.take();
                        } else {
                            insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                            j += 1;
                        }
                    }
                    if matches!(irs[j].kind, IrKind::Sub)
                        && is_const(&fnbe.ra, irs[j].opr2)
                        && !is_im12(const_value(&fnbe.ra, irs[j].opr2))
                    {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::Mul | IrKind::Div | IrKind::Mod => {
                    // Multiply and divide have no immediate forms at all.
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                    if is_const(&fnbe.ra, irs[j].opr2) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::BitAnd | IrKind::BitOr | IrKind::BitXor => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                    if is_const(&fnbe.ra, irs[j].opr2)
                        && !is_im12(const_value(&fnbe.ra, irs[j].opr2))
                    {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::LShift | IrKind::RShift => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                }
                IrKind::Cond { cond } => match cond {
                    CondKind::Eq | CondKind::Ne => {
                        // Equality materialization only knows seqz/snez;
                        // fold the operands through a subtraction first.
                        let opr2_zero = is_const(&fnbe.ra, irs[j].opr2)
                            && const_value(&fnbe.ra, irs[j].opr2) == 0;
                        if !opr2_zero {
                            let ir = irs[j].clone();
                            let sub = Ir {
                                kind: IrKind::Sub,
                                dst: ir.dst,
                                opr1: ir.opr1,
                                opr2: ir.opr2,
                                unsigned: ir.unsigned,
                            };
                            let dst_size = fnbe.ra.vreg(ir.dst.unwrap()).size;
                            let zero = fnbe.ra.spawn_const(0, dst_size, false);
                            irs.insert(j, sub);
                            j += 1;
                            let ir = &mut irs[j];
                            ir.opr1 = ir.dst;
                            ir.opr2 = Some(zero);
                        }
                        if is_const(&fnbe.ra, irs[j].opr2)
                            && const_value(&fnbe.ra, irs[j].opr2) != 0
                        {
                            insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                            j += 1;
                        }
                    }
                    CondKind::Le | CondKind::Gt | CondKind::ULe | CondKind::UGt => {
                        if is_const(&fnbe.ra, irs[j].opr2) {
                            insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                            j += 1;
                        }
                    }
                    CondKind::Lt | CondKind::Ge | CondKind::ULt | CondKind::UGe => {
                        if is_const(&fnbe.ra, irs[j].opr2)
                            && !is_im12(const_value(&fnbe.ra, irs[j].opr2))
                        {
                            insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                            j += 1;
                        }
                    }
                    _ => {}
                },
                IrKind::Jmp { cond, bb: target } => {
                    let flonum = irs[j]
                        .opr1
                        .map(|o| fnbe.ra.vreg(o).is_flonum())
                        .unwrap_or(false);
                    if flonum {
                        // No flag register: set a temporary with the float
                        // comparison, then branch on it.
                        let (c1, c2) = if cond == CondKind::Ne {
                            (CondKind::Eq, CondKind::Eq)
                        } else {
                            (cond, CondKind::Ne)
                        };
                        let tmp = fnbe.ra.spawn(VRegSize::B4, VRegFlags::NONE);
                        let cond_ir = Ir {
                            kind: IrKind::Cond { cond: c1 },
                            dst: Some(tmp),
                            opr1: irs[j].opr1,
                            opr2: irs[j].opr2,
                            unsigned: false,
                        };
                        irs.insert(j, cond_ir);
                        j += 1;
                        let zero = fnbe.ra.spawn_const(0, VRegSize::B4, false);
                        let ir = &mut irs[j];
                        ir.kind = IrKind::Jmp { cond: c2, bb: target };
                        ir.opr1 = Some(tmp);
                        ir.opr2 = Some(zero);
                    } else if is_const(&fnbe.ra, irs[j].opr2)
                        && const_value(&fnbe.ra, irs[j].opr2) != 0
                    {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                IrKind::TJmp { .. } => {
                    // The jump sequence shifts its index in place; give it
                    // a register it may break.
                    insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                    j += 1;
                }
                IrKind::PushArg { .. } => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                }
                IrKind::Memcpy { .. } => {
                    if is_const(&fnbe.ra, irs[j].opr1) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr1);
                        j += 1;
                    }
                    if is_const(&fnbe.ra, irs[j].opr2) {
                        insert_const_mov(&mut fnbe.ra, &mut irs, j, Operand::Opr2);
                        j += 1;
                    }
                }
                _ => {}
            }
            j += 1;
        }
        fnbe.bbcon.get_mut(bb).irs = irs;
    }
}

#[derive(Clone, Copy)]
enum Operand {
    Opr1,
    Opr2,
}

fn is_const(ra: &RegisterAllocator, opr: Option<VRegId>) -> bool {
    opr.map(|o| ra.vreg(o).is_const()).unwrap_or(false)
}

fn const_value(ra: &RegisterAllocator, opr: Option<VRegId>) -> i64 {
    opr.map(|o| ra.vreg(o).fixnum).unwrap_or(0)
}

/// Copy a constant (or to-be-broken) operand into a fresh register by
/// inserting a `mov` right before instruction `j`.
fn insert_const_mov(
    ra: &mut RegisterAllocator,
    irs: &mut Vec<Ir>,
    j: usize,
    which: Operand,
) -> VRegId {
    let old = match which {
        Operand::Opr1 => irs[j].opr1,
        Operand::Opr2 => irs[j].opr2,
    }
    .expect("operand to legalize must exist");
    let size = ra.vreg(old).size;
    let flonum = ra.vreg(old).is_flonum();
    let mut flags = VRegFlags::NONE;
    if flonum {
        flags.insert(VRegFlags::FLONUM);
    }
    let tmp = ra.spawn(size, flags);
    let mov = Ir {
        kind: IrKind::Mov,
        dst: Some(tmp),
        opr1: Some(old),
        opr2: None,
        unsigned: irs[j].unsigned,
    };
    irs.insert(j, mov);
    match which {
        Operand::Opr1 => irs[j + 1].opr1 = Some(tmp),
        Operand::Opr2 => irs[j + 1].opr2 = Some(tmp),
    }
    tmp
}
