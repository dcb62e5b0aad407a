// Copyright (C) 2024 - 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{
    BinOp, Elaborator, Expr, Initializer, LoopScope, MemberDecl, Name, Qualifiers, Storage, Token,
    Type, GLOBAL_SCOPE,
};
use carbide_compiler::{CompileOptions, Pipeline, PipelineError};

fn tok() -> Token {
    Token::synthetic("t")
}

fn int_lit(value: i64) -> Expr {
    Expr::fixnum(Type::int(), tok(), value)
}

fn new_pipeline() -> Pipeline {
    Pipeline::new(CompileOptions::default())
}

fn compile(pipeline: &Pipeline, ela: Elaborator) -> String {
    let compiled = pipeline.compile(ela).unwrap();
    assert_eq!(compiled.exit_code(), 0, "diagnostics: {:?}", compiled.diagnostics);
    compiled.asm
}

#[test]
fn test_constant_function_emits_immediate_result() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("ten"), fty, Vec::new(), Storage::NONE)
        .unwrap();
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

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("\t.globl\tten"));
    assert!(asm.contains("ten:"));
    assert!(asm.contains("li\ta0, 10"));
    assert!(asm.contains("\tret"));
    assert!(!asm.contains("mul"));
}

#[test]
fn test_function_with_call_saves_link_register() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let callee_ty = Type::func(Type::int(), Some(Vec::new()), false);
    ela.define_var(&tok(), Name::new("other"), callee_ty.clone(), Storage::EXTERN)
        .unwrap();
    let fty = Type::func(Type::int(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("caller"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let scope = ela.current_scope();
    let other = Expr::variable(Name::new("other"), callee_ty, tok(), GLOBAL_SCOPE);
    let call = ela.new_funcall(&tok(), other, Vec::new()).unwrap();
    let ret = ela.stmt_return(tok(), Some(call)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("call\tother"));
    assert!(asm.contains("sd\tra, 8(sp)"));
    assert!(asm.contains("ld\tra, 8(sp)"));
}

#[test]
fn test_static_function_stays_local() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let fty = Type::func(Type::void(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("helper"), fty, Vec::new(), Storage::STATIC)
        .unwrap();
    let scope = ela.current_scope();
    let nop = ela.stmt_expr(int_lit(0));
    let body = ela.stmt_block(tok(), Some(scope), vec![nop]);
    ela.end_function(func, body).unwrap();

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("\t.local\thelper"));
    assert!(!asm.contains(".globl\thelper"));
}

#[test]
fn test_noreturn_body_omits_epilogue() {
    // void spin(void) { for (;;) {} }
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let fty = Type::func(Type::void(), Some(Vec::new()), false);
    let func = ela
        .begin_function(&tok(), Name::new("spin"), fty, Vec::new(), Storage::NONE)
        .unwrap();
    let scope = ela.current_scope();
    let f = ela.stmt_for(tok(), None, None, None);
    let saved = ela.replace_loop_scope(LoopScope {
        break_target: Some(f),
        continue_target: Some(f),
        switch: None,
    });
    let empty = ela.stmt_block(tok(), None, Vec::new());
    ela.set_loop_body(f, empty);
    ela.restore_loop_scope(saved);
    let body = ela.stmt_block(tok(), Some(scope), vec![f]);
    ela.end_function(func, body).unwrap();

    let asm = compile(&pipeline, ela);
    // Reachability proved every path loops; there is no epilogue at all.
    assert!(!asm.contains("\tret"));
    assert!(asm.contains("spin:"));
}

#[test]
fn test_switch_table_lands_in_rodata() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("dispatch"),
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
    for v in 0..4 {
        let case = ela.stmt_case(tok(), Some(v));
        let ret = ela.stmt_return(tok(), Some(int_lit(v + 100))).unwrap();
        stmts.push(case);
        stmts.push(ret);
    }
    let switch_body = ela.stmt_block(tok(), None, stmts);
    ela.set_switch_body(switch, switch_body);
    ela.restore_loop_scope(saved);
    let after = ela.stmt_return(tok(), Some(int_lit(-1))).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![switch, after]);
    ela.end_function(func, body).unwrap();

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("jr\ts1"));
    assert!(asm.contains("slli\t"));
    assert!(asm.contains("\t.section\t.rodata"));
    // Four table entries.
    assert_eq!(asm.matches("\t.quad\t.L").count(), 4);
}

#[test]
fn test_global_data_sections() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();

    // int answer = 42;  (.data)
    ela.define_var(&tok(), Name::new("answer"), Type::int(), Storage::NONE)
        .unwrap();
    ela.define_global_init(&Name::new("answer"), Initializer::Single(int_lit(42)));

    // const long big = 1; (.rodata)
    let const_long = Type::long().with_qualifier(Qualifiers::CONST);
    ela.define_var(&tok(), Name::new("big"), const_long.clone(), Storage::NONE)
        .unwrap();
    ela.define_global_init(
        &Name::new("big"),
        Initializer::Single(Expr::fixnum(const_long, tok(), 1)),
    );

    // int blank[4]; (.bss)
    ela.define_var(
        &tok(),
        Name::new("blank"),
        Type::array(Type::int(), Some(4)),
        Storage::NONE,
    )
    .unwrap();

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("\t.data"));
    assert!(asm.contains("answer:"));
    assert!(asm.contains("\t.word\t42"));
    assert!(asm.contains("\t.section\t.rodata"));
    assert!(asm.contains("big:"));
    assert!(asm.contains("\t.quad\t1"));
    assert!(asm.contains("\t.bss"));
    assert!(asm.contains("blank:"));
    assert!(asm.contains("\t.zero\t16"));
}

#[test]
fn test_char_array_initializer_escapes_and_pads() {
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    let ty = Type::array(Type::char_(), Some(8));
    ela.define_var(&tok(), Name::new("greeting"), ty.clone(), Storage::NONE)
        .unwrap();
    ela.define_global_init(
        &Name::new("greeting"),
        Initializer::Single(Expr::str(ty, tok(), b"hi\n\0".to_vec())),
    );

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("greeting:"));
    // Escaped bytes plus zero padding to the full array size.
    assert!(asm.contains("\t.ascii\t\"hi\\n\\000\\000\\000\\000\\000\""));
}

#[test]
fn test_struct_initializer_packs_bitfields() {
    // struct S { int a:3, b:5; } s = { 1, 7 }; coalesces to 1 | 7<<3.
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    ela.unit.structs.define(
        Name::new("S"),
        vec![
            MemberDecl::bitfield(Name::new("a"), Type::int(), 3),
            MemberDecl::bitfield(Name::new("b"), Type::int(), 5),
        ],
        false,
    );
    let sty = Type::struct_(Name::new("S"));
    ela.define_var(&tok(), Name::new("s"), sty, Storage::NONE)
        .unwrap();
    ela.define_global_init(
        &Name::new("s"),
        Initializer::Multi(vec![
            Some(Initializer::Single(int_lit(1))),
            Some(Initializer::Single(int_lit(7))),
        ]),
    );

    let asm = compile(&pipeline, ela);
    assert!(asm.contains(&format!("\t.word\t{}", 1 | (7 << 3))));
}

#[test]
fn test_relocation_emits_label_plus_offset() {
    // long *p = &arr[2];
    let pipeline = new_pipeline();
    let mut ela = pipeline.new_elaborator();
    ela.define_var(
        &tok(),
        Name::new("arr"),
        Type::array(Type::long(), Some(4)),
        Storage::NONE,
    )
    .unwrap();
    let pty = carbide::ptrof(&Type::long());
    ela.define_var(&tok(), Name::new("p"), pty.clone(), Storage::NONE)
        .unwrap();

    let arr = Expr::variable(
        Name::new("arr"),
        Type::array(Type::long(), Some(4)),
        tok(),
        GLOBAL_SCOPE,
    );
    let elem = ela
        .new_addsub(BinOp::Add, &tok(), arr, int_lit(2))
        .unwrap();
    ela.define_global_init(&Name::new("p"), Initializer::Single(elem));

    let asm = compile(&pipeline, ela);
    assert!(asm.contains("\t.quad\tarr + 16"));
}

#[test]
fn test_empty_translation_unit_compiles_empty() {
    let pipeline = new_pipeline();
    let ela = pipeline.new_elaborator();
    let compiled = pipeline.compile(ela).unwrap();
    assert_eq!(compiled.exit_code(), 0);
    assert!(compiled.asm.is_empty());
}

/// The warnings-as-errors flag configured on the options reaches the
/// elaborator the pipeline hands out, so promoted warnings fail the
/// compile.
#[test]
fn test_warnings_as_errors_threads_through_options() {
    let pipeline = Pipeline::new(CompileOptions {
        warnings_as_errors: true,
        ..CompileOptions::default()
    });
    let mut ela = pipeline.new_elaborator();
    let fty = Type::func(Type::int(), Some(vec![Type::int()]), false);
    let func = ela
        .begin_function(
            &tok(),
            Name::new("f"),
            fty,
            vec![(Name::new("x"), Type::int())],
            Storage::NONE,
        )
        .unwrap();
    let scope = ela.current_scope();
    // x / 0 at a non-constant site is normally only a warning.
    let x = Expr::variable(Name::new("x"), Type::int(), tok(), scope);
    let quotient = ela
        .new_num_bop(BinOp::Div, &tok(), x, int_lit(0))
        .unwrap();
    let ret = ela.stmt_return(tok(), Some(quotient)).unwrap();
    let body = ela.stmt_block(tok(), Some(scope), vec![ret]);
    ela.end_function(func, body).unwrap();

    let compiled = pipeline.compile(ela).unwrap();
    assert!(!compiled.success);
    assert_eq!(compiled.exit_code(), 1);
}

#[test]
fn test_zero_stack_size_is_rejected() {
    let pipeline = Pipeline::new(CompileOptions {
        stack_size: 0,
        ..CompileOptions::default()
    });
    let ela = pipeline.new_elaborator();
    assert!(matches!(
        pipeline.compile(ela),
        Err(PipelineError::InvalidStackSize)
    ));
}
