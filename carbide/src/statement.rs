// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::{Expr, Name, ScopeId, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

impl Display for StmtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stmt{}", self.0)
    }
}

/// Reachability bitset computed by the reachability pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reach(u8);

impl Reach {
    pub const NONE: Self = Self(0);
    pub const RETURN: Self = Self(1 << 0);
    pub const STOP: Self = Self(1 << 1);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn stops(self) -> bool {
        self.contains(Self::STOP)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: Name,
    /// Initialization rewritten as an assignment statement.
    pub init: Option<StmtId>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Block {
        scope: Option<ScopeId>,
        stmts: Vec<StmtId>,
    },
    If {
        cond: Expr,
        then_stmt: StmtId,
        else_stmt: Option<StmtId>,
    },
    Switch {
        value: Expr,
        body: Option<StmtId>,
        cases: Vec<StmtId>,
        default: Option<StmtId>,
    },
    While {
        cond: Expr,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        cond: Expr,
    },
    For {
        pre: Option<Expr>,
        cond: Option<Expr>,
        post: Option<Expr>,
        body: StmtId,
    },
    Return {
        value: Option<Expr>,
        /// Set by the function finisher for the last statement of a body so
        /// the emitter can fall into the epilogue without an extra jump.
        func_end: bool,
    },
    Break {
        parent: StmtId,
    },
    Continue {
        parent: StmtId,
    },
    Goto {
        label: Name,
    },
    Label {
        name: Name,
        stmt: StmtId,
        used: bool,
    },
    Case {
        switch: StmtId,
        /// `None` marks the `default` case.
        value: Option<i64>,
    },
    VarDecl {
        decls: Vec<VarDecl>,
    },
    Asm {
        text: String,
    },
}

#[derive(Debug)]
pub struct Stmt {
    pub token: Token,
    pub reach: Reach,
    pub kind: StmtKind,
}

impl Stmt {
    #[must_use]
    pub fn new(token: Token, kind: StmtKind) -> Self {
        Self {
            token,
            reach: Reach::NONE,
            kind,
        }
    }
}

/// Arena owning all statements of a translation unit. Statements address
/// each other by `StmtId` so `break`/`continue`/`case` can carry parent
/// links without a pointer graph.
#[derive(Debug, Default)]
pub struct StmtArena {
    stmts: Vec<Stmt>,
}

impl StmtArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    #[must_use]
    pub fn get(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    #[must_use]
    pub fn get_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.0 as usize]
    }

    /// Register a case statement with its owning switch.
    pub fn push_case(&mut self, switch: StmtId, case: StmtId) {
        let is_default = matches!(self.get(case).kind, StmtKind::Case { value: None, .. });
        match &mut self.get_mut(switch).kind {
            StmtKind::Switch { cases, default, .. } => {
                cases.push(case);
                if is_default {
                    *default = Some(case);
                }
            }
            _ => panic!("push_case on a non-switch statement"),
        }
    }

    pub fn set_switch_body(&mut self, switch: StmtId, body: StmtId) {
        match &mut self.get_mut(switch).kind {
            StmtKind::Switch { body: slot, .. } => *slot = Some(body),
            _ => panic!("set_switch_body on a non-switch statement"),
        }
    }
}
