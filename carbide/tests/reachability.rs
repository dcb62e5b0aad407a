// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{
    BinOp, Elaborator, Expr, FuncId, LoopScope, Name, Reach, StmtId, StmtKind, Storage, Token,
    Type,
};

fn tok() -> Token {
    Token::synthetic("t")
}

fn int_lit(value: i64) -> Expr {
    Expr::fixnum(Type::int(), tok(), value)
}

fn begin_int_function(ela: &mut Elaborator, name: &str) -> FuncId {
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    ela.begin_function(&tok(), Name::new(name), fty, Vec::new(), Storage::NONE)
        .unwrap()
}

fn reach(ela: &Elaborator, stmt: StmtId) -> Reach {
    ela.unit.stmts.get(stmt).reach
}

#[test]
fn test_return_stops_and_returns() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    assert!(reach(&ela, ret).contains(Reach::RETURN));
    assert!(reach(&ela, ret).stops());
    assert!(reach(&ela, body).contains(Reach::RETURN));
}

#[test]
fn test_statement_after_return_warns() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let dead = ela.stmt_expr(int_lit(2));
    let body = ela.stmt_block(tok(), Some(scope), vec![ret, dead]);
    ela.end_function(func, body).unwrap();
    assert_eq!(ela.diagnostics.warning_count(), 1);
}

#[test]
fn test_label_after_return_does_not_warn() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let target = ela.stmt_return(tok(), Some(int_lit(2))).unwrap();
    let label = ela.stmt_label(tok(), Name::new("out"), target);
    let body = ela.stmt_block(tok(), Some(scope), vec![ret, label]);
    ela.end_function(func, body).unwrap();
    assert_eq!(ela.diagnostics.warning_count(), 0);
}

#[test]
fn test_if_reach_is_intersection_of_arms() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();

    let cond = Expr::variable(Name::new("c"), Type::int(), tok(), scope);
    let then_ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let else_expr = ela.stmt_expr(int_lit(0));
    let branch = ela.stmt_if(tok(), cond, then_ret, Some(else_expr));
    let final_ret = ela.stmt_return(tok(), Some(int_lit(2))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![branch, final_ret]);
    ela.end_function(func, body).unwrap();

    // Only one arm stops, so the if does not.
    assert!(!reach(&ela, branch).stops());
    assert_eq!(ela.diagnostics.warning_count(), 0);
}

#[test]
fn test_if_with_constant_condition_uses_surviving_arm() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();

    let then_ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let else_expr = ela.stmt_expr(int_lit(0));
    let branch = ela.stmt_if(tok(), int_lit(1), then_ret, Some(else_expr));
    let final_ret = ela.stmt_return(tok(), Some(int_lit(2))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![branch, final_ret]);
    ela.end_function(func, body).unwrap();

    assert!(reach(&ela, branch).stops());
}

#[test]
fn test_endless_while_stops_unless_broken() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();

    let w = ela.stmt_while(tok(), int_lit(1));
    let saved = ela.replace_loop_scope(LoopScope {
        break_target: Some(w),
        continue_target: Some(w),
        switch: None,
    });
    let inner = ela.stmt_expr(int_lit(0));
    let loop_body = ela.stmt_block(tok(), None, vec![inner]);
    ela.set_loop_body(w, loop_body);
    ela.restore_loop_scope(saved);

    let ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![w, ret]);
    ela.end_function(func, body).unwrap();

    assert!(reach(&ela, w).stops());
}

#[test]
fn test_break_escapes_endless_while() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();

    let w = ela.stmt_while(tok(), int_lit(1));
    let saved = ela.replace_loop_scope(LoopScope {
        break_target: Some(w),
        continue_target: Some(w),
        switch: None,
    });
    let brk = ela.stmt_break(tok());
    let loop_body = ela.stmt_block(tok(), None, vec![brk]);
    ela.set_loop_body(w, loop_body);
    ela.restore_loop_scope(saved);

    let ret = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![w, ret]);
    ela.end_function(func, body).unwrap();

    assert!(!reach(&ela, w).stops());
    assert_eq!(ela.diagnostics.warning_count(), 0);
}

/// `int h(int n) { switch (n) { case 1: return 10; default: return 20; } ... }`
#[test]
fn test_switch_with_default_and_stopping_cases_stops() {
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
    let case1 = ela.stmt_case(tok(), Some(1));
    let ret10 = ela.stmt_return(tok(), Some(int_lit(10))).unwrap();
    let default = ela.stmt_case(tok(), None);
    let ret20 = ela.stmt_return(tok(), Some(int_lit(20))).unwrap();
    let switch_body = ela.stmt_block(tok(), None, vec![case1, ret10, default, ret20]);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);

    let dead = ela.stmt_expr(int_lit(0));
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, dead]);
    ela.end_function(func, body).unwrap();

    assert!(reach(&ela, switch).stops());
    // The statement following the switch is unreachable.
    assert_eq!(ela.diagnostics.warning_count(), 1);
}

#[test]
fn test_switch_without_default_falls_through() {
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
    let case1 = ela.stmt_case(tok(), Some(1));
    let ret10 = ela.stmt_return(tok(), Some(int_lit(10))).unwrap();
    let switch_body = ela.stmt_block(tok(), None, vec![case1, ret10]);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);

    let after = ela.stmt_return(tok(), Some(int_lit(0))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, after]);
    ela.end_function(func, body).unwrap();

    assert!(!reach(&ela, switch).stops());
    assert_eq!(ela.diagnostics.warning_count(), 0);
}

#[test]
fn test_funcend_return_is_marked() {
    let mut ela = Elaborator::new(false);
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    let early = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let cond = Expr::variable(Name::new("c"), Type::int(), tok(), scope);
    let nop = ela.stmt_expr(int_lit(0));
    let branch = ela.stmt_if(tok(), cond, early, Some(nop));
    let last = ela.stmt_return(tok(), Some(int_lit(2))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![branch, last]);
    ela.end_function(func, body).unwrap();

    assert!(matches!(
        ela.unit.stmts.get(last).kind,
        StmtKind::Return { func_end: true, .. }
    ));
    // The early return inside the if keeps its jump.
    assert!(matches!(
        ela.unit.stmts.get(early).kind,
        StmtKind::Return { func_end: false, .. }
    ));
}

/// Bit-field assignment expands to the masked read-modify-write comma
/// sequence of `(ptr = &s.b, val = 7, *ptr = ..., val)`.
#[test]
fn test_bitfield_store_expansion() {
    use carbide::MemberDecl;

    let mut ela = Elaborator::new(false);
    ela.unit.structs.define(
        Name::new("S"),
        vec![
            MemberDecl::bitfield(Name::new("a"), Type::int(), 3),
            MemberDecl::bitfield(Name::new("b"), Type::int(), 5),
        ],
        false,
    );
    let func = begin_int_function(&mut ela, "f");
    let scope = ela.current_scope();
    ela.define_var(&tok(), Name::new("s"), Type::struct_(Name::new("S")), Storage::NONE)
        .unwrap();
    let s = Expr::variable(Name::new("s"), Type::struct_(Name::new("S")), tok(), scope);
    let member = ela.new_member(&tok(), s, &Name::new("b"), false).unwrap();
    let assigned = ela.new_assign(&tok(), member, int_lit(7)).unwrap();

    // Overall value is the stored field value, typed as the source.
    assert!(matches!(
        &assigned.kind,
        carbide::ExprKind::Bin { op: BinOp::Comma, .. }
    ));
    assert!(carbide::same_type(&assigned.ty, &Type::int()));

    // The mask constants of `b` appear in the tree: 0x1f and ~(0x1f << 3).
    let mut constants = Vec::new();
    collect_fixnums(&assigned, &mut constants);
    assert!(constants.contains(&0x1f));
    assert!(constants.contains(&!(0x1f << 3)));

    // Two temporaries (pointer and value) were introduced.
    let tmp_count = ela
        .unit
        .scopes
        .get(scope)
        .vars
        .iter()
        .filter(|v| v.name.as_str().starts_with(".t"))
        .count();
    assert_eq!(tmp_count, 2);

    let ret = ela.stmt_expr(assigned);
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();
}

fn collect_fixnums(expr: &Expr, out: &mut Vec<i64>) {
    use carbide::ExprKind;
    match &expr.kind {
        ExprKind::Fixnum(v) => out.push(*v),
        ExprKind::Bin { lhs, rhs, .. } => {
            collect_fixnums(lhs, out);
            collect_fixnums(rhs, out);
        }
        ExprKind::Unary { sub, .. } => collect_fixnums(sub, out),
        ExprKind::Ternary { cond, tval, fval } => {
            collect_fixnums(cond, out);
            collect_fixnums(tval, out);
            collect_fixnums(fval, out);
        }
        ExprKind::Member { target, .. } => collect_fixnums(target, out),
        _ => {}
    }
}
