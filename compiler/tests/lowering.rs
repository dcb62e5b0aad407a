// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{
    BinOp, Elaborator, Expr, FuncId, LoopScope, Name, Storage, Token, Type, VarInfo, GLOBAL_SCOPE,
};
use carbide_compiler::{
    FuncBackend, FuncLowerer, Ir, IrKind, Riscv64, Target, VRegId,
};

fn tok() -> Token {
    Token::synthetic("t")
}

fn int_lit(value: i64) -> Expr {
    Expr::fixnum(Type::int(), tok(), value)
}

/// Lower the first function of the elaborated unit, without tweak or
/// allocation, so tests can inspect the raw IR.
fn lower_first(ela: Elaborator) -> FuncBackend {
    let (unit, mut names, mut diagnostics) = ela.into_parts();
    let mut extra_globals: Vec<VarInfo> = Vec::new();
    let target = Riscv64;
    let lowerer = FuncLowerer::new(
        &unit,
        &unit.functions[0],
        &mut names,
        &mut diagnostics,
        &mut extra_globals,
        target.lowering(),
    );
    lowerer.lower().unwrap()
}

fn all_irs(fnbe: &FuncBackend) -> Vec<Ir> {
    fnbe.bbcon
        .iter()
        .flat_map(|(_, bb)| bb.irs.iter().cloned())
        .collect()
}

fn begin_int_function(ela: &mut Elaborator, name: &str) -> FuncId {
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    ela.begin_function(&tok(), Name::new(name), fty, Vec::new(), Storage::NONE)
        .unwrap()
}

/// `int f(void) { return 2*3+4; }` folds down to a single constant result;
/// no multiply survives to the IR.
#[test]
fn test_constant_body_lowers_to_single_result() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let product = ela
        .new_num_bop(BinOp::Mul, &tok(), int_lit(2), int_lit(3))
        .unwrap();
    let sum = ela
        .new_addsub(BinOp::Add, &tok(), product, int_lit(4))
        .unwrap();
    let ret = ela.stmt_return(tok(), Some(sum)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    assert!(!irs.iter().any(|ir| matches!(ir.kind, IrKind::Mul)));
    let results: Vec<&Ir> = irs
        .iter()
        .filter(|ir| matches!(ir.kind, IrKind::Result))
        .collect();
    assert_eq!(results.len(), 1);
    let value = fnbe.ra.vreg(results[0].opr1.unwrap());
    assert!(value.is_const());
    assert_eq!(value.fixnum, 10);
    // The trailing return falls into the epilogue.
    assert!(fnbe.falls_to_epilogue);
}

#[test]
fn test_pointer_index_uses_scaled_ptradd() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("f"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let scope = ela.current_scope();
    ela.define_var(&tok(), Name::new("p"), carbide::ptrof(&Type::int()), Storage::NONE)
        .unwrap();
    ela.define_var(&tok(), Name::new("i"), Type::long(), Storage::NONE)
        .unwrap();
    let p = Expr::variable(Name::new("p"), carbide::ptrof(&Type::int()), tok(), scope);
    let i = Expr::variable(Name::new("i"), Type::long(), tok(), scope);
    let sum = ela.new_addsub(BinOp::Add, &tok(), p, i).unwrap();
    let deref = ela.new_deref(&tok(), sum).unwrap();
    let ret = ela.stmt_return(tok(), Some(deref)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    let ptradds: Vec<&Ir> = irs
        .iter()
        .filter(|ir| matches!(ir.kind, IrKind::PtrAdd { .. }))
        .collect();
    assert_eq!(ptradds.len(), 1);
    let IrKind::PtrAdd { scale, offset } = ptradds[0].kind else {
        unreachable!()
    };
    assert_eq!(scale, 4);
    assert_eq!(offset, 0);
    // Power-of-two scale: no multiply materialized.
    assert!(!irs.iter().any(|ir| matches!(ir.kind, IrKind::Mul)));
}

#[test]
fn test_constant_pointer_index_folds_into_offset() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("f"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let scope = ela.current_scope();
    ela.define_var(&tok(), Name::new("p"), carbide::ptrof(&Type::int()), Storage::NONE)
        .unwrap();
    let p = Expr::variable(Name::new("p"), carbide::ptrof(&Type::int()), tok(), scope);
    let sum = ela.new_addsub(BinOp::Add, &tok(), p, int_lit(3)).unwrap();
    let deref = ela.new_deref(&tok(), sum).unwrap();
    let ret = ela.stmt_return(tok(), Some(deref)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    let IrKind::PtrAdd { scale, offset } = irs
        .iter()
        .find_map(|ir| match ir.kind {
            IrKind::PtrAdd { .. } => Some(ir.kind.clone()),
            _ => None,
        })
        .expect("expected a ptradd")
    else {
        unreachable!()
    };
    assert_eq!(scale, 1);
    assert_eq!(offset, 12);
}

#[test]
fn test_non_power_of_two_scale_materializes_multiply() {
    let mut ela = Elaborator::new(false);
    ela.unit.structs.define(Name::new("T"), MemberDeclList::triple(), false);
    let sty = Type::struct_(Name::new("T"));
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("f"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let scope = ela.current_scope();
    ela.define_var(&tok(), Name::new("p"), carbide::ptrof(&sty), Storage::NONE)
        .unwrap();
    ela.define_var(&tok(), Name::new("i"), Type::long(), Storage::NONE)
        .unwrap();
    let p = Expr::variable(Name::new("p"), carbide::ptrof(&sty), tok(), scope);
    let i = Expr::variable(Name::new("i"), Type::long(), tok(), scope);
    let sum = ela.new_addsub(BinOp::Add, &tok(), p, i).unwrap();
    let stmt = ela.stmt_expr(sum);
    let ret = ela.stmt_return(tok(), Some(int_lit(0))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![stmt, ret]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    assert!(irs.iter().any(|ir| matches!(ir.kind, IrKind::Mul)));
    let IrKind::PtrAdd { scale, .. } = irs
        .iter()
        .find_map(|ir| match ir.kind {
            IrKind::PtrAdd { .. } => Some(ir.kind.clone()),
            _ => None,
        })
        .expect("expected a ptradd")
    else {
        unreachable!()
    };
    assert_eq!(scale, 1);
}

// A 12-byte struct: scaling by 12 cannot use an addressing shift.
struct MemberDeclList;

impl MemberDeclList {
    fn triple() -> Vec<carbide::MemberDecl> {
        vec![
            carbide::MemberDecl::new(Name::new("a"), Type::int()),
            carbide::MemberDecl::new(Name::new("b"), Type::int()),
            carbide::MemberDecl::new(Name::new("c"), Type::int()),
        ]
    }
}

#[test]
fn test_contiguous_switch_lowers_to_table_jump() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("h"),
            fty,
            vec![(Name::new("n"), Type::int())],
            Storage::NONE,
        )
        .unwrap();
    let scope = ela.current_scope();
    let n = Expr::variable(Name::new("n"), Type::int(), tok(), scope);

    let switch = ela.stmt_switch(tok(), n);
    let saved = ela.replace_loop_scope(LoopScope {
        break_target: Some(switch),
        continue_target: None,
        switch: Some(switch),
    });
    let mut stmts = Vec::new();
    for v in 0..3 {
        let case = ela.stmt_case(tok(), Some(v));
        let ret = ela.stmt_return(tok(), Some(int_lit(v * 10))).unwrap();
        stmts.push(case);
        stmts.push(ret);
    }
    let switch_body = ela.stmt_block(tok(), None, stmts);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);

    let after = ela.stmt_return(tok(), Some(int_lit(-1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, after]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    let tjmp = irs
        .iter()
        .find(|ir| matches!(ir.kind, IrKind::TJmp { .. }))
        .expect("expected a table jump");
    let IrKind::TJmp { bbs } = &tjmp.kind else { unreachable!() };
    // Table length equals the case count.
    assert_eq!(bbs.len(), 3);
    // A bounds check guards the table.
    assert!(irs.iter().any(|ir| matches!(
        ir.kind,
        IrKind::Jmp { cond: carbide_compiler::CondKind::UGe, .. }
    )));
}

#[test]
fn test_sparse_switch_compares_case_by_case() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("h"),
            fty,
            vec![(Name::new("n"), Type::int())],
            Storage::NONE,
        )
        .unwrap();
    let scope = ela.current_scope();
    let n = Expr::variable(Name::new("n"), Type::int(), tok(), scope);

    let switch = ela.stmt_switch(tok(), n);
    let saved = ela.replace_loop_scope(LoopScope {
        break_target: Some(switch),
        continue_target: None,
        switch: Some(switch),
    });
    let mut stmts = Vec::new();
    for v in [1i64, 100] {
        let case = ela.stmt_case(tok(), Some(v));
        let ret = ela.stmt_return(tok(), Some(int_lit(v))).unwrap();
        stmts.push(case);
        stmts.push(ret);
    }
    let switch_body = ela.stmt_block(tok(), None, stmts);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);

    let after = ela.stmt_return(tok(), Some(int_lit(-1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, after]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    let irs = all_irs(&fnbe);
    assert!(!irs.iter().any(|ir| matches!(ir.kind, IrKind::TJmp { .. })));
    let eq_jumps = irs
        .iter()
        .filter(|ir| matches!(ir.kind, IrKind::Jmp { cond: carbide_compiler::CondKind::Eq, .. }))
        .count();
    assert_eq!(eq_jumps, 2);
}

#[test]
fn test_call_marshalling_emits_precall_and_pushargs() {
    let mut ela = Elaborator::new(false);
    let callee_ty = Type::func(Type::int(), Some(vec![Type::int(), Type::int()]), false);
    ela.define_var(&tok(), Name::new("callee"), callee_ty.clone(), Storage::EXTERN)
        .unwrap();
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let callee = Expr::variable(Name::new("callee"), callee_ty, tok(), GLOBAL_SCOPE);
    let call = ela
        .new_funcall(&tok(), callee, vec![int_lit(1), int_lit(2)])
        .unwrap();
    let ret = ela.stmt_return(tok(), Some(call)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let fnbe = lower_first(ela);
    assert!(fnbe.has_funcall);
    let irs = all_irs(&fnbe);

    let precall_pos = irs
        .iter()
        .position(|ir| matches!(ir.kind, IrKind::Precall { .. }))
        .expect("expected a precall");
    let call_pos = irs
        .iter()
        .position(|ir| matches!(ir.kind, IrKind::Call { .. }))
        .expect("expected a call");
    assert!(precall_pos < call_pos);

    // Arguments are evaluated right to left: the pusharg for index 1
    // comes first.
    let pusharg_indices: Vec<usize> = irs
        .iter()
        .filter_map(|ir| match ir.kind {
            IrKind::PushArg { index, .. } => Some(index),
            _ => None,
        })
        .collect();
    assert_eq!(pusharg_indices, vec![1, 0]);

    let IrKind::Call { label, global, reg_arg_count, .. } = &irs[call_pos].kind else {
        unreachable!()
    };
    assert_eq!(label.as_ref().map(Name::as_str), Some("callee"));
    assert!(*global);
    assert_eq!(*reg_arg_count, 2);
}

#[test]
fn test_inline_body_lowers_without_call() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let inc = ela
        .begin_function(
            &tok(),
            Name::new("inc"),
            fty,
            vec![(Name::new("x"), Type::int())],
            Storage::INLINE,
        )
        .unwrap();
    let inc_scope = ela.current_scope();
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), inc_scope);
    let sum = ela.new_addsub(BinOp::Add, &tok(), x, int_lit(1)).unwrap();
    let ret = ela.stmt_return(tok(), Some(sum)).unwrap();
    let inc_body = ela.stmt_block(tok(), Some(inc_scope), vec![ret]);
    ela.end_function(inc, inc_body).unwrap();

    let gty = Type::func(Type::int(), Some(Vec::new()), false);
    let g = ela
        .begin_function(&tok(), Name::new("g"), gty, Vec::new(), Storage::NONE)
        .unwrap();
    let g_scope = ela.current_scope();
    let inc_ref = Expr::variable(
        Name::new("inc"),
        Type::func(Type::int(), Some(vec![Type::int()]), false),
        tok(),
        GLOBAL_SCOPE,
    );
    let inner = ela.new_funcall(&tok(), inc_ref.clone(), vec![int_lit(41)]).unwrap();
    let outer = ela.new_funcall(&tok(), inc_ref, vec![inner]).unwrap();
    let ret = ela.stmt_return(tok(), Some(outer)).unwrap();
    let g_body = ela.stmt_block(tok(), Some(g_scope), vec![ret]);
    ela.end_function(g, g_body).unwrap();

    let (unit, mut names, mut diagnostics) = ela.into_parts();
    let mut extra_globals: Vec<VarInfo> = Vec::new();
    let target = Riscv64;
    let g_func = unit
        .functions
        .iter()
        .find(|f| f.name.as_str() == "g")
        .unwrap();
    let lowerer = FuncLowerer::new(
        &unit,
        g_func,
        &mut names,
        &mut diagnostics,
        &mut extra_globals,
        target.lowering(),
    );
    let fnbe = lowerer.lower().unwrap();
    let irs = all_irs(&fnbe);
    // Both expansions lowered in place; no call remains.
    assert!(!irs.iter().any(|ir| ir.is_call()));
    assert!(!fnbe.has_funcall);
    // Two additions, one per clone.
    let adds = irs.iter().filter(|ir| matches!(ir.kind, IrKind::Add)).count();
    assert_eq!(adds, 2);
}

#[test]
fn test_register_allocation_keeps_call_crossing_value_callee_saved() {
    use carbide_compiler::ParamDest;

    let mut ela = Elaborator::new(false);
    let callee_ty = Type::func(Type::int(), Some(Vec::new()), false);
    ela.define_var(&tok(), Name::new("callee"), callee_ty.clone(), Storage::EXTERN)
        .unwrap();
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    ela.define_var(&tok(), Name::new("a"), Type::int(), Storage::NONE)
        .unwrap();

    let callee = Expr::variable(Name::new("callee"), callee_ty, tok(), GLOBAL_SCOPE);
    let first = ela.new_funcall(&tok(), callee.clone(), Vec::new()).unwrap();
    let a = Expr::variable(Name::new("a"), Type::int(), tok(), scope);
    let assign = ela.new_assign(&tok(), a.clone(), first).unwrap();
    let assign_stmt = ela.stmt_expr(assign);

    let second = ela.new_funcall(&tok(), callee, Vec::new()).unwrap();
    let sum = ela.new_addsub(BinOp::Add, &tok(), second, a).unwrap();
    let ret = ela.stmt_return(tok(), Some(sum)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![assign_stmt, ret]);
    ela.end_function(func, body).unwrap();

    let (unit, mut names, mut diagnostics) = ela.into_parts();
    let mut extra_globals: Vec<VarInfo> = Vec::new();
    let target = Riscv64;
    let lowerer = FuncLowerer::new(
        &unit,
        &unit.functions[0],
        &mut names,
        &mut diagnostics,
        &mut extra_globals,
        target.lowering(),
    );
    let mut fnbe = lowerer.lower().unwrap();
    target.tweak(&mut fnbe);
    let settings = target.reg_alloc_settings();
    let param_vregs: Vec<VRegId> = fnbe
        .params
        .iter()
        .filter_map(|p| match p.dest {
            ParamDest::Reg(v) => Some(v),
            ParamDest::Slot(_) => None,
        })
        .collect();
    {
        let FuncBackend { ra, bbcon, precalls, .. } = &mut fnbe;
        ra.allocate(bbcon, &settings, &param_vregs, precalls);
    }
    fnbe.layout_frame();

    // The register holding `a` across the second call must be callee-saved
    // (or spilled); either way some callee-saved register or frame usage
    // shows up.
    let uses_callee_save = settings
        .callee_save
        .iter()
        .any(|&i| fnbe.ra.used_reg_bits & (1u64 << i) != 0);
    assert!(uses_callee_save || fnbe.frame_size > 0);
}
