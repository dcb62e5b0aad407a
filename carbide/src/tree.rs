// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{FuncId, Function, Scopes, StmtArena, StructRegistry};

/// Everything the semantic passes produce for one translation unit; the
/// back end consumes this.
#[derive(Debug)]
pub struct TranslationUnit {
    pub stmts: StmtArena,
    pub scopes: Scopes,
    pub structs: StructRegistry,
    pub functions: Vec<Function>,
}

impl Default for TranslationUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationUnit {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stmts: StmtArena::new(),
            scopes: Scopes::new(),
            structs: StructRegistry::new(),
            functions: Vec::new(),
        }
    }

    #[must_use]
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    #[must_use]
    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }
}
