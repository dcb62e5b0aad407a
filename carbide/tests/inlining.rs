// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{
    BinOp, Elaborator, Expr, ExprKind, FuncId, Name, ScopeId, StmtKind, Storage, Token, Type,
    GLOBAL_SCOPE,
};

fn tok() -> Token {
    Token::synthetic("t")
}

fn int_lit(value: i64) -> Expr {
    Expr::fixnum(Type::int(), tok(), value)
}

/// `static inline int inc(int x) { return x + 1; }`
fn define_inc(ela: &mut Elaborator) -> FuncId {
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("inc"),
            fty,
            vec![(Name::new("x"), Type::int())],
            Storage::STATIC.union(Storage::INLINE),
        )
        .unwrap();
    let scope = ela.current_scope();
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), scope);
    let sum = ela.new_addsub(BinOp::Add, &tok(), x, int_lit(1)).unwrap();
    let ret = ela.stmt_return(tok(), Some(sum)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();
    func
}

fn inc_ref() -> Expr {
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    Expr::variable(Name::new("inc"), fty, tok(), GLOBAL_SCOPE)
}

fn body_scope(ela: &Elaborator, expr: &Expr) -> ScopeId {
    let ExprKind::Inlined { body, .. } = &expr.kind else {
        panic!("expected an inline-expanded call");
    };
    let StmtKind::Block { scope, .. } = &ela.unit.stmts.get(*body).kind else {
        panic!("inlined body must be a block");
    };
    scope.expect("inlined body must own a scope")
}

#[test]
fn test_qualifying_call_expands_inline() {
    let mut ela = Elaborator::new(false);
    define_inc(&mut ela);

    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let _g = ela
        .begin_function(&tok(), Name::new("g"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let call = ela.new_funcall(&tok(), inc_ref(), vec![int_lit(41)]).unwrap();
    assert!(matches!(&call.kind, ExprKind::Inlined { .. }));
}

#[test]
fn test_non_inline_function_stays_a_call() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    ela.define_var(&tok(), Name::new("f"), fty.clone(), Storage::EXTERN)
        .unwrap();
    let gty = Type::func(Type::int(), Some(Vec::new()), false);
    let _g = ela
        .begin_function(&tok(), Name::new("g"), gty, Vec::new(), Storage::NONE)
        .unwrap();
    let f = Expr::variable(Name::new("f"), fty, tok(), GLOBAL_SCOPE);
    let call = ela.new_funcall(&tok(), f, vec![int_lit(1)]).unwrap();
    assert!(matches!(&call.kind, ExprKind::Call { .. }));
}

#[test]
fn test_variadic_function_never_inlines() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), true);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("v"),
            fty,
            vec![(Name::new("x"), Type::int())],
            Storage::INLINE,
        )
        .unwrap();
    let scope = ela.current_scope();
    let ret = ela.stmt_return(tok(), Some(int_lit(0))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();
    assert!(!ela.satisfies_inline_criteria(&Name::new("v")));
}

#[test]
fn test_function_with_label_never_inlines() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("l"), fty, Vec::new(), Storage::INLINE)
        .unwrap();
    let scope = ela.current_scope();
    let ret = ela.stmt_return(tok(), Some(int_lit(0))).unwrap();
    let labeled = ela.stmt_label(tok(), Name::new("out"), ret);
    let body = ela.stmt_block(tok(), Some(scope), vec![labeled]);
    ela.end_function(func, body).unwrap();
    assert!(!ela.satisfies_inline_criteria(&Name::new("l")));
}

#[test]
fn test_repeated_expansion_has_disjoint_locals() {
    // inc(inc(41)): both clones carry their own renamed parameter.
    let mut ela = Elaborator::new(false);
    define_inc(&mut ela);

    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let _g = ela
        .begin_function(&tok(), Name::new("g"), fty, Vec::new(), Storage::NONE)
        .unwrap();

    let inner = ela.new_funcall(&tok(), inc_ref(), vec![int_lit(41)]).unwrap();
    let outer = ela.new_funcall(&tok(), inc_ref(), vec![inner]).unwrap();

    let outer_scope = body_scope(&ela, &outer);
    let ExprKind::Inlined { args, .. } = &outer.kind else {
        panic!("expected an inline expansion");
    };
    let inner_scope = body_scope(&ela, &args[0]);

    assert_ne!(outer_scope, inner_scope);
    let outer_param = &ela.unit.scopes.get(outer_scope).vars[0].name;
    let inner_param = &ela.unit.scopes.get(inner_scope).vars[0].name;
    assert_ne!(outer_param, inner_param);
    // Neither clone kept the original parameter name.
    assert_ne!(outer_param.as_str(), "x");
    assert_ne!(inner_param.as_str(), "x");
}

#[test]
fn test_clone_body_references_renamed_parameter() {
    let mut ela = Elaborator::new(false);
    define_inc(&mut ela);

    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let _g = ela
        .begin_function(&tok(), Name::new("g"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let call = ela.new_funcall(&tok(), inc_ref(), vec![int_lit(5)]).unwrap();

    let scope = body_scope(&ela, &call);
    let renamed = ela.unit.scopes.get(scope).vars[0].name.clone();

    let ExprKind::Inlined { body, .. } = &call.kind else { unreachable!() };
    let StmtKind::Block { stmts, .. } = &ela.unit.stmts.get(*body).kind else {
        unreachable!()
    };
    let StmtKind::Return { value: Some(value), .. } = &ela.unit.stmts.get(stmts[0]).kind else {
        panic!("clone body should return");
    };
    // return (renamed) + 1
    let ExprKind::Bin { lhs, .. } = &value.kind else {
        panic!("expected the addition");
    };
    assert!(
        matches!(&lhs.kind, ExprKind::Variable { name, scope: s } if name == &renamed && *s == scope)
    );
}

#[test]
fn test_switch_clone_preserves_case_indices() {
    // inline int pick(int n) { switch (n) { case 7: return 1; default: return 2; } return 0; }
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("pick"),
            fty,
            vec![(Name::new("n"), Type::int())],
            Storage::INLINE,
        )
        .unwrap();
    let scope = ela.current_scope();
    let n = Expr::variable(Name::new("n"), Type::int(), tok(), scope);

    let switch = ela.stmt_switch(tok(), n);
    let saved = ela.replace_loop_scope(carbide::LoopScope {
        break_target: Some(switch),
        continue_target: None,
        switch: Some(switch),
    });
    let case7 = ela.stmt_case(tok(), Some(7));
    let ret1 = ela.stmt_return(tok(), Some(int_lit(1))).unwrap();
    let default = ela.stmt_case(tok(), None);
    let ret2 = ela.stmt_return(tok(), Some(int_lit(2))).unwrap();
    let switch_body = ela.stmt_block(tok(), None, vec![case7, ret1, default, ret2]);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);

    let ret0 = ela.stmt_return(tok(), Some(int_lit(0))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, ret0]);
    ela.end_function(func, body).unwrap();

    let gty = Type::func(Type::int(), Some(Vec::new()), false);
    let _g = ela
        .begin_function(&tok(), Name::new("g"), gty, Vec::new(), Storage::NONE)
        .unwrap();
    let pick = Expr::variable(
        Name::new("pick"),
        Type::func(Type::int(), Some(vec![Type::int()]), false),
        tok(),
        GLOBAL_SCOPE,
    );
    let call = ela.new_funcall(&tok(), pick, vec![int_lit(7)]).unwrap();

    let ExprKind::Inlined { body, .. } = &call.kind else {
        panic!("expected an inline expansion");
    };
    let StmtKind::Block { stmts, .. } = &ela.unit.stmts.get(*body).kind else {
        unreachable!()
    };
    let cloned_switch = stmts[0];
    let StmtKind::Switch { cases, default, .. } = &ela.unit.stmts.get(cloned_switch).kind else {
        panic!("clone should start with the switch");
    };
    assert_eq!(cases.len(), 2);
    // Case 0 kept its index, the default landed in slot 1.
    assert!(matches!(
        &ela.unit.stmts.get(cases[0]).kind,
        StmtKind::Case { value: Some(7), .. }
    ));
    assert_eq!(default, &Some(cases[1]));
    // Both rebound to the clone, not the original.
    for &case in cases {
        let StmtKind::Case { switch, .. } = &ela.unit.stmts.get(case).kind else {
            unreachable!()
        };
        assert_eq!(*switch, cloned_switch);
    }
}
