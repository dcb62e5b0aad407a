// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod expression;
mod function;
mod scope;
mod semantics;
mod statement;
mod structure;
mod token;
mod tree;
mod type_;

pub use self::{
    expression::{BinOp, Expr, ExprKind, Initializer, UnOp},
    function::Function,
    scope::{FuncId, Scope, ScopeId, Scopes, Storage, VarInfo, GLOBAL_SCOPE},
    semantics::{
        BitfieldMember, CompileError, CompileResult, Diagnostic, DiagnosticKind, DiagnosticsList,
        Elaborator, LoopScope, Severity, MAX_ERROR_COUNT,
    },
    statement::{Reach, Stmt, StmtArena, StmtId, StmtKind, VarDecl},
    structure::{align_up, Bitfield, MemberDecl, MemberInfo, StructInfo, StructRegistry},
    token::{Name, NameGen, SourcePosition, Token, TokenKind},
    tree::TranslationUnit,
    type_::{
        array_to_ptr, can_cast, get_fixnum_type, ptrof, same_type, same_type_without_qualifier,
        wrap_value, FixnumKind, FlonumKind, Qualifiers, Type, TypeKind, MIN_REG_SIZE,
        POINTER_SIZE, TARGET_CHAR_BIT,
    },
};
