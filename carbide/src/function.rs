// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashMap;

use crate::{Name, Reach, ScopeId, StmtId, Type};

/// A function definition. Parameters live in `scopes[0]`, in declaration
/// order.
#[derive(Debug)]
pub struct Function {
    pub name: Name,
    pub ty: Type,
    pub params: Vec<Name>,
    /// All scopes of the body, in creation order.
    pub scopes: Vec<ScopeId>,
    pub body: Option<StmtId>,
    pub gotos: Vec<StmtId>,
    pub label_table: HashMap<Name, StmtId>,
    /// Reachability of the whole body; when it stops, the emitter omits the
    /// epilogue.
    pub body_reach: Reach,
}

impl Function {
    #[must_use]
    pub fn new(name: Name, ty: Type) -> Self {
        Self {
            name,
            ty,
            params: Vec::new(),
            scopes: Vec::new(),
            body: None,
            gotos: Vec::new(),
            label_table: HashMap::new(),
            body_reach: Reach::NONE,
        }
    }

    #[must_use]
    pub fn param_scope(&self) -> Option<ScopeId> {
        self.scopes.first().copied()
    }

    #[must_use]
    pub fn return_type(&self) -> &Type {
        self.ty.func_ret().expect("function must have function type")
    }
}
