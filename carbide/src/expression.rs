// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{Name, ScopeId, StmtId, Token, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    Eq,
    Ne,
    Lt,
    Le,
    Ge,
    Gt,
    LogAnd,
    LogOr,
    Assign,
    Comma,
    /// Pointer + integer; the right operand is unscaled, scaling by the
    /// pointee size happens during lowering.
    PtrAdd,
    PtrSub,
}

impl BinOp {
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Ge | Self::Gt)
    }

    /// Mirror a comparison when its operands are swapped.
    #[must_use]
    pub const fn swap_comparison(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Ge => Self::Le,
            Self::Gt => Self::Lt,
            other => other,
        }
    }

    /// Logical negation of a comparison.
    #[must_use]
    pub const fn negate_comparison(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Pos,
    Neg,
    /// Logical `!`.
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    /// Address-of.
    Ref,
    Deref,
    Cast,
    /// Parenthesized group; transparent for value purposes.
    Group,
}

impl UnOp {
    #[must_use]
    pub const fn is_dec(self) -> bool {
        matches!(self, Self::PreDec | Self::PostDec)
    }

    #[must_use]
    pub const fn is_post(self) -> bool {
        matches!(self, Self::PostInc | Self::PostDec)
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Fixnum(i64),
    Flonum(f64),
    Str(Vec<u8>),
    Variable {
        name: Name,
        scope: ScopeId,
    },
    Bin {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        sub: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        tval: Box<Expr>,
        fval: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        /// Member index inside the target's struct info.
        index: usize,
        /// Access was written with `->`.
        arrow: bool,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// An inline-expanded call: the callee's body has already been
    /// duplicated into the caller.
    Inlined {
        name: Name,
        args: Vec<Expr>,
        body: StmtId,
    },
    CompoundLiteral {
        var: Box<Expr>,
        inits: Vec<StmtId>,
    },
    Block(StmtId),
}

/// A typed expression node. Every node carries its result type and the
/// source token it originated from.
#[derive(Debug, Clone)]
pub struct Expr {
    pub ty: Type,
    pub token: Token,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(ty: Type, token: Token, kind: ExprKind) -> Self {
        Self { ty, token, kind }
    }

    #[must_use]
    pub fn fixnum(ty: Type, token: Token, value: i64) -> Self {
        Self::new(ty, token, ExprKind::Fixnum(value))
    }

    #[must_use]
    pub fn flonum(ty: Type, token: Token, value: f64) -> Self {
        Self::new(ty, token, ExprKind::Flonum(value))
    }

    #[must_use]
    pub fn str(ty: Type, token: Token, bytes: Vec<u8>) -> Self {
        Self::new(ty, token, ExprKind::Str(bytes))
    }

    #[must_use]
    pub fn variable(name: Name, ty: Type, token: Token, scope: ScopeId) -> Self {
        Self::new(ty, token, ExprKind::Variable { name, scope })
    }

    #[must_use]
    pub fn bin(op: BinOp, ty: Type, token: Token, lhs: Expr, rhs: Expr) -> Self {
        Self::new(
            ty,
            token,
            ExprKind::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    #[must_use]
    pub fn unary(op: UnOp, ty: Type, token: Token, sub: Expr) -> Self {
        Self::new(ty, token, ExprKind::Unary { op, sub: Box::new(sub) })
    }

    #[must_use]
    pub fn ternary(ty: Type, token: Token, cond: Expr, tval: Expr, fval: Expr) -> Self {
        Self::new(
            ty,
            token,
            ExprKind::Ternary {
                cond: Box::new(cond),
                tval: Box::new(tval),
                fval: Box::new(fval),
            },
        )
    }

    #[must_use]
    pub fn member(ty: Type, token: Token, target: Expr, index: usize, arrow: bool) -> Self {
        Self::new(
            ty,
            token,
            ExprKind::Member {
                target: Box::new(target),
                index,
                arrow,
            },
        )
    }

    #[must_use]
    pub fn call(ty: Type, token: Token, func: Expr, args: Vec<Expr>) -> Self {
        Self::new(
            ty,
            token,
            ExprKind::Call {
                func: Box::new(func),
                args,
            },
        )
    }

    /// Strip parenthesized groups.
    #[must_use]
    pub fn unwrap_group(&self) -> &Expr {
        match &self.kind {
            ExprKind::Unary { op: UnOp::Group, sub } => sub.unwrap_group(),
            _ => self,
        }
    }

    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Fixnum(_) | ExprKind::Flonum(_) | ExprKind::Str(_)
        )
    }

    /// A literal integer zero; relaxes pointer conversion rules.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        matches!(self.kind, ExprKind::Fixnum(0))
    }

    #[must_use]
    pub fn is_const_truthy(&self) -> bool {
        match self.kind {
            ExprKind::Fixnum(v) => v != 0,
            ExprKind::Flonum(v) => v != 0.0,
            ExprKind::Str(_) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_const_falsy(&self) -> bool {
        match self.kind {
            ExprKind::Fixnum(v) => v == 0,
            ExprKind::Flonum(v) => v == 0.0,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_fixnum(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Fixnum(v) => Some(v),
            _ => None,
        }
    }

    /// The constant behind any number of casts, used by pointer-arithmetic
    /// scaling.
    #[must_use]
    pub fn strip_casts(&self) -> &Expr {
        match &self.kind {
            ExprKind::Unary { op: UnOp::Cast | UnOp::Group, sub } => sub.strip_casts(),
            _ => self,
        }
    }
}

/// Initializer tree of a global variable.
#[derive(Debug, Clone)]
pub enum Initializer {
    Single(Expr),
    /// One entry per member/element; `None` leaves the slot zeroed.
    Multi(Vec<Option<Initializer>>),
}
