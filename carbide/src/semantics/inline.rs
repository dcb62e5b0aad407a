// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use log::debug;

use crate::{
    CompileResult, Expr, ExprKind, FuncId, Name, ScopeId, Stmt, StmtId, StmtKind, Storage, Type,
    TypeKind, VarDecl, GLOBAL_SCOPE,
};

use super::{Elaborator, LoopScope};

impl Elaborator {
    /// A function can be expanded inline iff it is `inline`, non-variadic,
    /// returns a primitive or void, has a body, and contains neither labels
    /// nor gotos (labels would collide on repeated expansion).
    #[must_use]
    pub fn satisfies_inline_criteria(&self, name: &Name) -> bool {
        let Some(var) = self.unit.scopes.find_var_here(GLOBAL_SCOPE, name) else {
            return false;
        };
        let TypeKind::Func { ret, vaargs, .. } = &var.ty.kind else {
            return false;
        };
        if !var.storage.contains(Storage::INLINE) || *vaargs {
            return false;
        }
        if !(ret.is_prim() || ret.is_void()) {
            return false;
        }
        let Some(func) = var.func else { return false };
        let function = self.unit.function(func);
        function.body.is_some() && function.label_table.is_empty() && function.gotos.is_empty()
    }

    /// Duplicate the callee's whole body into the current function.
    pub fn embed_inline_funcall(&mut self, name: &Name) -> CompileResult<StmtId> {
        debug!("expanding `{name}` inline");
        let func = self
            .find_function(name)
            .expect("inline candidate must have a definition");
        let body = self.unit.function(func).body.unwrap();
        self.duplicate_stmt(func, None, None, body)
    }

    fn duplicate_expr(
        &mut self,
        target_func: FuncId,
        target_scope: Option<ScopeId>,
        expr: &Expr,
    ) -> CompileResult<Expr> {
        match &expr.kind {
            ExprKind::Fixnum(_) | ExprKind::Flonum(_) | ExprKind::Str(_) => Ok(expr.clone()),

            ExprKind::Variable { name, scope } => {
                if scope.is_global() {
                    return Ok(expr.clone());
                }
                let Some((_, var)) = self.unit.scopes.find_var(*scope, name) else {
                    return Ok(expr.clone());
                };
                if var.storage.contains(Storage::EXTERN)
                    || var.storage.contains(Storage::ENUM_MEMBER)
                {
                    return Ok(expr.clone());
                }
                if var.storage.contains(Storage::STATIC) {
                    // Statics live in their global twin; no duplication.
                    let gvar = var.static_gvar.clone().unwrap_or_else(|| name.clone());
                    let ty = var.ty.clone();
                    return Ok(Expr::variable(gvar, ty, expr.token.clone(), GLOBAL_SCOPE));
                }
                let is_param = var.storage.contains(Storage::PARAM);
                let ty = var.ty.clone();

                // Map the original scope onto the corresponding freshly
                // entered caller scope by walking both chains in parallel.
                let mut mapped = self.current_scope();
                let mut p = target_scope;
                while let Some(cur) = p {
                    if cur.is_global() || cur == *scope {
                        break;
                    }
                    p = self.unit.scopes.parent(cur);
                    if let Some(parent) = self.unit.scopes.parent(mapped) {
                        mapped = parent;
                    }
                }

                let mut new_name = name.clone();
                if is_param {
                    // Parameters are stored in the callee's top scope in
                    // order; the clone renamed them positionally.
                    let param_scope = self.unit.function(target_func).param_scope();
                    if let Some(param_scope) = param_scope {
                        let index = self
                            .unit
                            .scopes
                            .get(param_scope)
                            .vars
                            .iter()
                            .position(|v| &v.name == name);
                        if let Some(index) = index {
                            let vars = &self.unit.scopes.get(mapped).vars;
                            if let Some(renamed) = vars.get(index) {
                                new_name = renamed.name.clone();
                            }
                        }
                    }
                }
                Ok(Expr::variable(new_name, ty, expr.token.clone(), mapped))
            }

            ExprKind::Bin { op, lhs, rhs } => {
                let lhs = self.duplicate_expr(target_func, target_scope, lhs)?;
                let rhs = self.duplicate_expr(target_func, target_scope, rhs)?;
                Ok(Expr::bin(*op, expr.ty.clone(), expr.token.clone(), lhs, rhs))
            }

            ExprKind::Unary { op, sub } => {
                let sub = self.duplicate_expr(target_func, target_scope, sub)?;
                Ok(Expr::unary(*op, expr.ty.clone(), expr.token.clone(), sub))
            }

            ExprKind::Ternary { cond, tval, fval } => {
                let cond = self.duplicate_expr(target_func, target_scope, cond)?;
                let tval = self.duplicate_expr(target_func, target_scope, tval)?;
                let fval = self.duplicate_expr(target_func, target_scope, fval)?;
                Ok(Expr::ternary(
                    expr.ty.clone(),
                    expr.token.clone(),
                    cond,
                    tval,
                    fval,
                ))
            }

            ExprKind::Member { target, index, arrow } => {
                let target = self.duplicate_expr(target_func, target_scope, target)?;
                Ok(Expr::member(
                    expr.ty.clone(),
                    expr.token.clone(),
                    target,
                    *index,
                    *arrow,
                ))
            }

            ExprKind::Call { func, args } => {
                let func = self.duplicate_expr(target_func, target_scope, func)?;
                let args = args
                    .iter()
                    .map(|arg| self.duplicate_expr(target_func, target_scope, arg))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Expr::call(expr.ty.clone(), expr.token.clone(), func, args))
            }

            ExprKind::Inlined { name, args, .. } => {
                let args = args
                    .iter()
                    .map(|arg| self.duplicate_expr(target_func, target_scope, arg))
                    .collect::<CompileResult<Vec<_>>>()?;
                // Re-expand from the original definition so every
                // instantiation gets fresh locals.
                debug_assert!(self.satisfies_inline_criteria(name));
                let name = name.clone();
                let body = self.embed_inline_funcall(&name)?;
                Ok(Expr::new(
                    expr.ty.clone(),
                    expr.token.clone(),
                    ExprKind::Inlined { name, args, body },
                ))
            }

            ExprKind::CompoundLiteral { var, inits } => {
                let var = self.duplicate_expr(target_func, target_scope, var)?;
                let inits = inits
                    .iter()
                    .map(|&init| self.duplicate_stmt(target_func, target_scope, None, init))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Expr::new(
                    expr.ty.clone(),
                    expr.token.clone(),
                    ExprKind::CompoundLiteral {
                        var: Box::new(var),
                        inits,
                    },
                ))
            }

            ExprKind::Block(stmt) => {
                let stmt = self.duplicate_stmt(target_func, target_scope, None, *stmt)?;
                Ok(Expr::new(
                    expr.ty.clone(),
                    expr.token.clone(),
                    ExprKind::Block(stmt),
                ))
            }
        }
    }

    fn duplicate_stmt(
        &mut self,
        target_func: FuncId,
        target_scope: Option<ScopeId>,
        original_scope: Option<ScopeId>,
        stmt: StmtId,
    ) -> CompileResult<StmtId> {
        let token = self.unit.stmts.get(stmt).token.clone();
        match &self.unit.stmts.get(stmt).kind {
            StmtKind::Expr(expr) => {
                let expr = expr.clone();
                let expr = self.duplicate_expr(target_func, target_scope, &expr)?;
                Ok(self.unit.stmts.alloc(Stmt::new(token, StmtKind::Expr(expr))))
            }

            StmtKind::Block { scope, stmts } => {
                let orig_block_scope = *scope;
                let stmts = stmts.clone();
                let reach = self.unit.stmts.get(stmt).reach;

                let mut new_scope = None;
                let mut inner_target = target_scope;
                let mut inner_original = original_scope;
                if let Some(orig) = orig_block_scope {
                    let vars: Vec<(Name, Type, Storage)> = self
                        .unit
                        .scopes
                        .get(orig)
                        .vars
                        .iter()
                        .map(|v| (v.name.clone(), v.ty.clone(), v.storage))
                        .collect();
                    let entered = self.enter_scope();
                    for (name, ty, storage) in vars {
                        if storage.contains(Storage::STATIC) {
                            continue;
                        }
                        // Parameters get fresh unique names; the clone is
                        // no longer a parameter.
                        let name = if storage.contains(Storage::PARAM) {
                            self.names.alloc_label()
                        } else {
                            name
                        };
                        self.unit.scopes.add_var(
                            entered,
                            crate::VarInfo::new(name, ty, storage.without(Storage::PARAM)),
                        );
                    }
                    new_scope = Some(entered);
                    inner_target = Some(orig);
                    inner_original = Some(orig);
                }

                let mut dup_stmts = Vec::with_capacity(stmts.len());
                for inner in stmts {
                    let dup =
                        self.duplicate_stmt(target_func, inner_target, inner_original, inner)?;
                    dup_stmts.push(dup);
                }

                if orig_block_scope.is_some() {
                    self.exit_scope();
                }
                let id = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::Block {
                        scope: new_scope,
                        stmts: dup_stmts,
                    },
                ));
                self.unit.stmts.get_mut(id).reach = reach;
                Ok(id)
            }

            StmtKind::If { cond, then_stmt, else_stmt } => {
                let cond = cond.clone();
                let then_stmt = *then_stmt;
                let else_stmt = *else_stmt;
                let cond = self.duplicate_expr(target_func, target_scope, &cond)?;
                let then_stmt =
                    self.duplicate_stmt(target_func, target_scope, original_scope, then_stmt)?;
                let else_stmt = match else_stmt {
                    Some(els) => Some(self.duplicate_stmt(
                        target_func,
                        target_scope,
                        original_scope,
                        els,
                    )?),
                    None => None,
                };
                Ok(self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::If {
                        cond,
                        then_stmt,
                        else_stmt,
                    },
                )))
            }

            StmtKind::Switch { value, body, cases, .. } => {
                let value = value.clone();
                let body = *body;
                let case_count = cases.len();
                let value = self.duplicate_expr(target_func, target_scope, &value)?;
                // Case slots are pre-sized so clones can keep their
                // original index for positional dispatch.
                let dup = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::Switch {
                        value,
                        body: None,
                        cases: vec![StmtId(u32::MAX); case_count],
                        default: None,
                    },
                ));

                let saved = self.replace_loop_scope(LoopScope {
                    break_target: Some(dup),
                    continue_target: self.loop_scope().continue_target,
                    switch: Some(dup),
                });
                if let Some(body) = body {
                    let body =
                        self.duplicate_stmt(target_func, target_scope, original_scope, body)?;
                    self.unit.stmts.set_switch_body(dup, body);
                }
                self.restore_loop_scope(saved);
                Ok(dup)
            }

            StmtKind::While { cond, body } => {
                let cond = cond.clone();
                let body = *body;
                let cond = self.duplicate_expr(target_func, target_scope, &cond)?;
                let dup = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::While {
                        cond,
                        body: StmtId(u32::MAX),
                    },
                ));
                let saved = self.replace_loop_scope(LoopScope {
                    break_target: Some(dup),
                    continue_target: Some(dup),
                    switch: self.loop_scope().switch,
                });
                let body = self.duplicate_stmt(target_func, target_scope, original_scope, body)?;
                self.restore_loop_scope(saved);
                self.set_loop_body(dup, body);
                Ok(dup)
            }

            StmtKind::DoWhile { body, cond } => {
                let cond = cond.clone();
                let body = *body;
                let cond = self.duplicate_expr(target_func, target_scope, &cond)?;
                let dup = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::DoWhile {
                        body: StmtId(u32::MAX),
                        cond,
                    },
                ));
                let saved = self.replace_loop_scope(LoopScope {
                    break_target: Some(dup),
                    continue_target: Some(dup),
                    switch: self.loop_scope().switch,
                });
                let body = self.duplicate_stmt(target_func, target_scope, original_scope, body)?;
                self.restore_loop_scope(saved);
                self.set_loop_body(dup, body);
                Ok(dup)
            }

            StmtKind::For { pre, cond, post, body } => {
                let pre = pre.clone();
                let cond = cond.clone();
                let post = post.clone();
                let body = *body;
                let pre = pre
                    .map(|e| self.duplicate_expr(target_func, target_scope, &e))
                    .transpose()?;
                let cond = cond
                    .map(|e| self.duplicate_expr(target_func, target_scope, &e))
                    .transpose()?;
                let post = post
                    .map(|e| self.duplicate_expr(target_func, target_scope, &e))
                    .transpose()?;
                let dup = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::For {
                        pre,
                        cond,
                        post,
                        body: StmtId(u32::MAX),
                    },
                ));
                let saved = self.replace_loop_scope(LoopScope {
                    break_target: Some(dup),
                    continue_target: Some(dup),
                    switch: self.loop_scope().switch,
                });
                let body = self.duplicate_stmt(target_func, target_scope, original_scope, body)?;
                self.restore_loop_scope(saved);
                self.set_loop_body(dup, body);
                Ok(dup)
            }

            StmtKind::Break { .. } => {
                let parent = self
                    .loop_scope()
                    .break_target
                    .expect("break clone outside of loop or switch");
                Ok(self
                    .unit
                    .stmts
                    .alloc(Stmt::new(token, StmtKind::Break { parent })))
            }

            StmtKind::Continue { .. } => {
                let parent = self
                    .loop_scope()
                    .continue_target
                    .expect("continue clone outside of loop");
                Ok(self
                    .unit
                    .stmts
                    .alloc(Stmt::new(token, StmtKind::Continue { parent })))
            }

            StmtKind::Return { value, func_end } => {
                let value = value.clone();
                let func_end = *func_end;
                let value = value
                    .map(|e| self.duplicate_expr(target_func, target_scope, &e))
                    .transpose()?;
                Ok(self
                    .unit
                    .stmts
                    .alloc(Stmt::new(token, StmtKind::Return { value, func_end })))
            }

            StmtKind::Case { switch, value } => {
                let orig_switch = *switch;
                let value = *value;
                let new_switch = self
                    .loop_scope()
                    .switch
                    .expect("case clone outside of switch");
                let dup = self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::Case {
                        switch: new_switch,
                        value,
                    },
                ));
                // Recover the original case index so dispatch stays
                // positional.
                let index = match &self.unit.stmts.get(orig_switch).kind {
                    StmtKind::Switch { cases, .. } => {
                        cases.iter().position(|&c| c == stmt).unwrap()
                    }
                    _ => unreachable!("case parent must be a switch"),
                };
                match &mut self.unit.stmts.get_mut(new_switch).kind {
                    StmtKind::Switch { cases, default, .. } => {
                        cases[index] = dup;
                        if value.is_none() {
                            *default = Some(dup);
                        }
                    }
                    _ => unreachable!(),
                }
                Ok(dup)
            }

            StmtKind::Label { name, stmt: inner, used } => {
                let name = name.clone();
                let inner = *inner;
                let used = *used;
                let follow =
                    self.duplicate_stmt(target_func, target_scope, original_scope, inner)?;
                Ok(self.unit.stmts.alloc(Stmt::new(
                    token,
                    StmtKind::Label {
                        name,
                        stmt: follow,
                        used,
                    },
                )))
            }

            StmtKind::VarDecl { decls } => {
                let decls = decls.clone();
                let mut dup_decls = Vec::with_capacity(decls.len());
                for decl in decls {
                    if let Some(orig) = original_scope {
                        if let Some(var) = self.unit.scopes.find_var_here(orig, &decl.name) {
                            if var.storage.contains(Storage::STATIC) {
                                continue;
                            }
                        }
                    }
                    let init = decl
                        .init
                        .map(|init| {
                            self.duplicate_stmt(target_func, target_scope, original_scope, init)
                        })
                        .transpose()?;
                    dup_decls.push(VarDecl {
                        name: decl.name,
                        init,
                    });
                }
                Ok(self
                    .unit
                    .stmts
                    .alloc(Stmt::new(token, StmtKind::VarDecl { decls: dup_decls })))
            }

            StmtKind::Goto { .. } | StmtKind::Asm { .. } => Ok(stmt),
        }
    }
}
