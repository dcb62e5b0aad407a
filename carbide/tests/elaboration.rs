// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use rstest::rstest;

use carbide::{
    ptrof, same_type, BinOp, Elaborator, Expr, ExprKind, FixnumKind, MemberDecl, Name, Qualifiers,
    Storage, Token, Type,
};

fn tok() -> Token {
    Token::synthetic("t")
}

fn int_lit(value: i64) -> Expr {
    Expr::fixnum(Type::int(), tok(), value)
}

fn lit(ty: Type, value: i64) -> Expr {
    Expr::fixnum(ty, tok(), value)
}

/// An elaborator positioned inside a function body, the way most
/// expression rules expect to run.
fn in_function(ela: &mut Elaborator) -> carbide::FuncId {
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    ela.begin_function(&tok(), Name::new("test_fn"), fty, Vec::new(), Storage::NONE)
        .unwrap()
}

#[test]
fn test_constant_fold_mul_add() {
    let mut ela = Elaborator::new(false);
    let product = ela
        .new_num_bop(BinOp::Mul, &tok(), int_lit(2), int_lit(3))
        .unwrap();
    let sum = ela
        .new_addsub(BinOp::Add, &tok(), product, int_lit(4))
        .unwrap();
    assert_eq!(sum.as_fixnum(), Some(10));
    assert!(same_type(&sum.ty, &Type::int()));
}

#[test]
fn test_promotion_prevents_char_wrap() {
    // unsigned char c = 200; c + 100 folds to 300, not 44.
    let mut ela = Elaborator::new(false);
    let c = lit(Type::fixnum(FixnumKind::Char, true), 200);
    let sum = ela
        .new_addsub(BinOp::Add, &tok(), c, int_lit(100))
        .unwrap();
    assert_eq!(sum.as_fixnum(), Some(300));
    assert!(sum.ty.is_fixnum());
    assert_eq!(sum.ty.fixnum_kind().unwrap().0, FixnumKind::Int);
}

#[test]
fn test_cast_narrowing_wraps() {
    let mut ela = Elaborator::new(false);
    let narrowed = ela
        .make_cast(&Type::fixnum(FixnumKind::Char, true), &tok(), int_lit(300), true)
        .unwrap();
    assert_eq!(narrowed.as_fixnum(), Some(44));
}

#[test]
fn test_divide_by_constant_zero_is_fatal() {
    let mut ela = Elaborator::new(false);
    let result = ela.new_num_bop(BinOp::Div, &tok(), int_lit(1), int_lit(0));
    assert!(result.is_err());
}

#[test]
fn test_divide_by_zero_nonconst_site_warns() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), ela.current_scope());
    ela.new_num_bop(BinOp::Div, &tok(), x, int_lit(0)).unwrap();
    assert_eq!(ela.diagnostics.warning_count(), 1);
}

#[test]
fn test_pointer_diff_constant_fold() {
    // (int*)40 - (int*)24 == 4, of signed size type.
    let mut ela = Elaborator::new(false);
    let ty = ptrof(&Type::int());
    let q = Expr::fixnum(ty.clone(), tok(), 40);
    let p = Expr::fixnum(ty, tok(), 24);
    let diff = ela.new_addsub(BinOp::Sub, &tok(), q, p).unwrap();
    assert_eq!(diff.as_fixnum(), Some(4));
    assert!(same_type(&diff.ty, &Type::ssize_type()));
}

#[test]
fn test_pointer_diff_requires_same_pointee_modulo_qualifiers() {
    let mut ela = Elaborator::new(false);
    let cp = Expr::fixnum(ptrof(&Type::int().with_qualifier(Qualifiers::CONST)), tok(), 8);
    let p = Expr::fixnum(ptrof(&Type::int()), tok(), 4);
    assert!(ela.new_addsub(BinOp::Sub, &tok(), cp, p).is_ok());

    let lp = Expr::fixnum(ptrof(&Type::long()), tok(), 8);
    let ip = Expr::fixnum(ptrof(&Type::int()), tok(), 0);
    assert!(ela.new_addsub(BinOp::Sub, &tok(), lp, ip).is_err());
}

#[test]
fn test_int_plus_pointer_canonicalizes_by_swap() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let sum = ela.new_addsub(BinOp::Add, &tok(), int_lit(3), p).unwrap();
    let ExprKind::Bin { op, lhs, rhs } = &sum.kind else {
        panic!("expected a binary node");
    };
    assert_eq!(*op, BinOp::PtrAdd);
    assert!(lhs.ty.is_ptr());
    // The index stays unscaled; it is converted to the signed size type.
    assert!(same_type(&rhs.ty, &Type::ssize_type()));
}

#[test]
fn test_comparison_constant_folds_to_bool() {
    let mut ela = Elaborator::new(false);
    let cmp = ela
        .new_cmp(BinOp::Lt, &tok(), int_lit(1), int_lit(2))
        .unwrap();
    assert_eq!(cmp.as_fixnum(), Some(1));
    assert!(same_type(&cmp.ty, &Type::bool_()));
}

#[rstest]
#[case(BinOp::Lt, BinOp::Gt)]
#[case(BinOp::Le, BinOp::Ge)]
#[case(BinOp::Ge, BinOp::Le)]
#[case(BinOp::Gt, BinOp::Lt)]
fn test_comparison_mirrors_when_pointer_moves_left(#[case] op: BinOp, #[case] mirrored: BinOp) {
    // `0 < p` swaps to `p > 0` so the pointer is on the left.
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let cmp = ela.new_cmp(op, &tok(), int_lit(0), p).unwrap();
    let ExprKind::Bin { op: actual, lhs, .. } = &cmp.kind else {
        panic!("expected a binary node");
    };
    assert_eq!(*actual, mirrored);
    assert!(lhs.ty.is_ptr());
}

#[test]
fn test_incompatible_pointer_comparison_is_fatal() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let q = Expr::variable(Name::new("q"), ptrof(&Type::long()), tok(), ela.current_scope());
    assert!(ela.new_cmp(BinOp::Eq, &tok(), p, q).is_err());
}

#[test]
fn test_void_pointer_and_zero_compare_fine() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let vp = Expr::variable(Name::new("v"), ptrof(&Type::void()), tok(), ela.current_scope());
    assert!(ela.new_cmp(BinOp::Eq, &tok(), p.clone(), vp).is_ok());
    assert!(ela.new_cmp(BinOp::Ne, &tok(), p, int_lit(0)).is_ok());
}

#[test]
fn test_make_cond_wraps_values_in_nonzero_test() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), ela.current_scope());
    let cond = ela.make_cond(x).unwrap();
    let ExprKind::Bin { op, .. } = &cond.kind else {
        panic!("expected a comparison");
    };
    assert_eq!(*op, BinOp::Ne);
    assert!(same_type(&cond.ty, &Type::bool_()));
}

#[test]
fn test_make_cond_folds_constants() {
    let mut ela = Elaborator::new(false);
    assert_eq!(ela.make_cond(int_lit(7)).unwrap().as_fixnum(), Some(1));
    assert_eq!(ela.make_cond(int_lit(0)).unwrap().as_fixnum(), Some(0));
}

#[test]
fn test_double_negation_is_boolean_identity() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), ela.current_scope());
    let cond = ela.make_cond(x.clone()).unwrap();
    let once = ela.make_not_expr(x).unwrap();
    let twice = ela.make_not_expr(once).unwrap();
    // not(not(x)) and bool(x) are the same comparison.
    let (ExprKind::Bin { op: a, .. }, ExprKind::Bin { op: b, .. }) = (&twice.kind, &cond.kind)
    else {
        panic!("expected comparisons");
    };
    assert_eq!(a, b);
}

#[test]
fn test_negation_distributes_over_logical_and() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let a = Expr::variable(Name::new("a"), Type::int(), tok(), ela.current_scope());
    let b = Expr::variable(Name::new("b"), Type::int(), tok(), ela.current_scope());
    let a = ela.make_cond(a).unwrap();
    let b = ela.make_cond(b).unwrap();
    let conj = Expr::bin(BinOp::LogAnd, Type::bool_(), tok(), a, b);
    let negated = ela.make_not_expr(conj).unwrap();
    let ExprKind::Bin { op, lhs, rhs } = &negated.kind else {
        panic!("expected a binary node");
    };
    assert_eq!(*op, BinOp::LogOr);
    // Both children flipped from Ne to Eq.
    for child in [lhs, rhs] {
        let ExprKind::Bin { op, .. } = &child.kind else {
            panic!("expected comparisons below");
        };
        assert_eq!(*op, BinOp::Eq);
    }
}

#[test]
fn test_address_of_involution() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());

    // &*p collapses to p.
    let deref = ela.new_deref(&tok(), p.clone()).unwrap();
    let refer = ela.make_refer(&tok(), deref).unwrap();
    assert!(matches!(&refer.kind, ExprKind::Variable { name, .. } if name.as_str() == "p"));

    // *&v collapses to v.
    let v = Expr::variable(Name::new("v"), Type::int(), tok(), ela.current_scope());
    ela.define_var(&tok(), Name::new("v"), Type::int(), Storage::NONE)
        .unwrap();
    let refer = ela.make_refer(&tok(), v).unwrap();
    let deref = ela.new_deref(&tok(), refer).unwrap();
    assert!(matches!(&deref.kind, ExprKind::Variable { name, .. } if name.as_str() == "v"));
}

#[test]
fn test_address_of_marks_ref_taken() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    ela.define_var(&tok(), Name::new("v"), Type::int(), Storage::NONE)
        .unwrap();
    let v = Expr::variable(Name::new("v"), Type::int(), tok(), ela.current_scope());
    ela.make_refer(&tok(), v).unwrap();
    let (_, var) = ela
        .unit
        .scopes
        .find_var(ela.current_scope(), &Name::new("v"))
        .unwrap();
    assert!(var.storage.contains(Storage::REF_TAKEN));
}

#[test]
fn test_address_of_local_static_marks_global_twin() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    ela.define_var(&tok(), Name::new("s"), Type::int(), Storage::STATIC)
        .unwrap();
    let s = Expr::variable(Name::new("s"), Type::int(), tok(), ela.current_scope());
    ela.make_refer(&tok(), s).unwrap();

    let (_, var) = ela
        .unit
        .scopes
        .find_var(ela.current_scope(), &Name::new("s"))
        .unwrap();
    let twin = var.static_gvar.clone().unwrap();
    let twin_var = ela
        .unit
        .scopes
        .find_var(carbide::GLOBAL_SCOPE, &twin)
        .unwrap()
        .1;
    assert!(twin_var.storage.contains(Storage::REF_TAKEN));
}

#[test]
fn test_member_address_of_constant_base_folds() {
    let mut ela = Elaborator::new(false);
    ela.unit.structs.define(
        Name::new("S"),
        vec![
            MemberDecl::new(Name::new("a"), Type::long()),
            MemberDecl::new(Name::new("b"), Type::int()),
        ],
        false,
    );
    let base = Expr::fixnum(ptrof(&Type::struct_(Name::new("S"))), tok(), 0x1000);
    let member = ela
        .new_member(&tok(), base, &Name::new("b"), true)
        .unwrap();
    let refer = ela.make_refer(&tok(), member).unwrap();
    assert_eq!(refer.as_fixnum(), Some(0x1008));
    assert!(refer.ty.is_ptr());
}

#[test]
fn test_compound_assign_through_temporary_pointer() {
    // (*p) += 3 with a non-variable destination introduces a pointer
    // temporary so the lvalue is evaluated once.
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let lhs = ela.new_deref(&tok(), p).unwrap();
    let result = ela
        .transform_assign_with(&tok(), BinOp::Add, lhs, int_lit(3))
        .unwrap();
    let ExprKind::Bin { op: BinOp::Comma, lhs: setup, rhs: assign } = &result.kind else {
        panic!("expected (tmp = &lhs, assignment)");
    };
    assert!(matches!(
        &setup.kind,
        ExprKind::Bin { op: BinOp::Assign, .. }
    ));
    assert!(matches!(
        &assign.kind,
        ExprKind::Bin { op: BinOp::Assign, .. }
    ));
}

#[test]
fn test_compound_assign_on_variable_stays_simple() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    ela.define_var(&tok(), Name::new("x"), Type::int(), Storage::NONE)
        .unwrap();
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), ela.current_scope());
    let result = ela
        .transform_assign_with(&tok(), BinOp::Mul, x, int_lit(2))
        .unwrap();
    assert!(matches!(
        &result.kind,
        ExprKind::Bin { op: BinOp::Assign, .. }
    ));
}

#[test]
fn test_call_arity_is_checked() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![Type::int(), Type::int()]), false);
    ela.define_var(&tok(), Name::new("f"), fty.clone(), Storage::EXTERN)
        .unwrap();
    let _fid = in_function(&mut ela);
    let f = Expr::variable(Name::new("f"), fty, tok(), carbide::GLOBAL_SCOPE);
    ela.new_funcall(&tok(), f, vec![int_lit(1)]).unwrap();
    assert_eq!(ela.diagnostics.error_count(), 1);
}

#[test]
fn test_variadic_tail_promotions() {
    let mut ela = Elaborator::new(false);
    let fty = Type::func(Type::int(), Some(vec![ptrof(&Type::char_())]), true);
    ela.define_var(&tok(), Name::new("printf_like"), fty.clone(), Storage::EXTERN)
        .unwrap();
    let _fid = in_function(&mut ela);
    let f = Expr::variable(Name::new("printf_like"), fty, tok(), carbide::GLOBAL_SCOPE);
    let fmt = Expr::fixnum(ptrof(&Type::char_()), tok(), 0);
    let small = lit(Type::char_(), 7);
    let single = Expr::flonum(Type::flonum(carbide::FlonumKind::Float), tok(), 1.5);
    let call = ela
        .new_funcall(&tok(), f, vec![fmt, small, single])
        .unwrap();
    let ExprKind::Call { args, .. } = &call.kind else {
        panic!("expected a call");
    };
    assert!(same_type(&args[1].ty, &Type::int()));
    assert!(same_type(&args[2].ty, &Type::double()));
}

#[test]
fn test_ternary_pointer_result_types() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let cond = Expr::variable(Name::new("c"), Type::int(), tok(), ela.current_scope());
    let p = Expr::variable(Name::new("p"), ptrof(&Type::int()), tok(), ela.current_scope());
    let vp = Expr::variable(Name::new("v"), ptrof(&Type::void()), tok(), ela.current_scope());

    // void* defers to the concrete pointer type.
    let ternary = ela.new_ternary(&tok(), cond.clone(), p.clone(), vp).unwrap();
    assert!(same_type(&ternary.ty, &ptrof(&Type::int())));

    // A literal zero adopts the pointer type.
    let ternary = ela.new_ternary(&tok(), cond.clone(), p, int_lit(0)).unwrap();
    assert!(same_type(&ternary.ty, &ptrof(&Type::int())));

    // Numeric arms pick the higher rank.
    let ternary = ela
        .new_ternary(&tok(), cond, int_lit(1), lit(Type::long(), 2))
        .unwrap();
    assert!(same_type(&ternary.ty, &Type::long()));
}

#[test]
fn test_void_arm_makes_ternary_void() {
    let mut ela = Elaborator::new(false);
    let _fid = in_function(&mut ela);
    let cond = Expr::variable(Name::new("c"), Type::int(), tok(), ela.current_scope());
    let void_call = Expr::new(Type::void(), tok(), ExprKind::Fixnum(0));
    let ternary = ela
        .new_ternary(&tok(), cond, void_call, int_lit(1))
        .unwrap();
    assert!(ternary.ty.is_void());
}

#[test]
fn test_anonymous_member_lookup_descends() {
    let mut ela = Elaborator::new(false);
    ela.unit.structs.define(
        Name::new("Inner"),
        vec![MemberDecl::new(Name::new("x"), Type::int())],
        false,
    );
    ela.unit.structs.define(
        Name::new("Outer"),
        vec![
            MemberDecl::new(Name::new("before"), Type::int()),
            MemberDecl::new(None, Type::struct_(Name::new("Inner"))),
        ],
        false,
    );
    let _fid = in_function(&mut ela);
    let outer = Expr::variable(
        Name::new("o"),
        Type::struct_(Name::new("Outer")),
        tok(),
        ela.current_scope(),
    );
    let member = ela.new_member(&tok(), outer, &Name::new("x"), false).unwrap();
    // o.x resolves through the anonymous member as o.<1>.x.
    let ExprKind::Member { target, index, .. } = &member.kind else {
        panic!("expected a member access");
    };
    assert_eq!(*index, 0);
    assert!(matches!(&target.kind, ExprKind::Member { index: 1, .. }));
    assert!(same_type(&member.ty, &Type::int()));
}

#[test]
fn test_incomplete_struct_is_fatal() {
    let mut ela = Elaborator::new(false);
    let ty = Type::struct_(Name::new("Missing"));
    assert!(ela.ensure_struct(&ty, &tok()).is_err());
}
