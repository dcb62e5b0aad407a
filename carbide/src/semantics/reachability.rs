// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{CompileResult, DiagnosticKind, FuncId, Reach, StmtId, StmtKind};

use super::Elaborator;

impl Elaborator {
    /// Compute the reachability bitset of `stmt` and everything below it,
    /// warning about unreachable statements along the way.
    pub fn check_reachability(&mut self, stmt: StmtId) -> CompileResult<()> {
        match &self.unit.stmts.get(stmt).kind {
            StmtKind::If { cond, then_stmt, else_stmt } => {
                let truthy = cond.is_const_truthy();
                let falsy = cond.is_const_falsy();
                let then_stmt = *then_stmt;
                let else_stmt = *else_stmt;
                self.check_reachability(then_stmt)?;
                if let Some(else_stmt) = else_stmt {
                    self.check_reachability(else_stmt)?;
                }
                let then_reach = self.unit.stmts.get(then_stmt).reach;
                let else_reach = else_stmt
                    .map(|s| self.unit.stmts.get(s).reach)
                    .unwrap_or(Reach::NONE);
                self.unit.stmts.get_mut(stmt).reach = if truthy {
                    then_reach
                } else if falsy {
                    else_reach
                } else {
                    then_reach.intersect(else_reach)
                };
            }

            StmtKind::Switch { body, default, .. } => {
                let body = *body;
                let has_default = default.is_some();
                {
                    let reach = &mut self.unit.stmts.get_mut(stmt).reach;
                    reach.remove(Reach::STOP);
                    if has_default {
                        reach.insert(Reach::STOP);
                    }
                }
                if let Some(body) = body {
                    // Breaks inside clear the STOP bit set above.
                    self.check_reachability(body)?;
                    let body_reach = self.unit.stmts.get(body).reach;
                    let reach = self.unit.stmts.get_mut(stmt).reach;
                    self.unit.stmts.get_mut(stmt).reach = reach.intersect(body_reach);
                }
            }

            StmtKind::While { cond, body } => {
                let truthy = cond.is_const_truthy();
                let falsy = cond.is_const_falsy();
                let body = *body;
                if truthy {
                    self.unit.stmts.get_mut(stmt).reach.insert(Reach::STOP);
                } else {
                    self.unit.stmts.get_mut(stmt).reach = Reach::NONE;
                }
                if !falsy {
                    self.check_reachability(body)?;
                }
            }

            StmtKind::DoWhile { body, cond } => {
                let truthy = cond.is_const_truthy();
                let body = *body;
                self.unit.stmts.get_mut(stmt).reach.insert(Reach::STOP);
                self.check_reachability(body)?;
                if !truthy {
                    let body_reach = self.unit.stmts.get(body).reach;
                    let reach = self.unit.stmts.get(stmt).reach;
                    self.unit.stmts.get_mut(stmt).reach = reach.intersect(body_reach);
                }
            }

            StmtKind::For { cond, body, .. } => {
                let falsy = cond.as_ref().map(|c| c.is_const_falsy()).unwrap_or(false);
                let endless = cond.as_ref().map(|c| c.is_const_truthy()).unwrap_or(true);
                let body = *body;
                if falsy {
                    self.unit.stmts.get_mut(stmt).reach.remove(Reach::STOP);
                } else {
                    {
                        let reach = &mut self.unit.stmts.get_mut(stmt).reach;
                        reach.remove(Reach::STOP);
                        if endless {
                            reach.insert(Reach::STOP);
                        }
                    }
                    self.check_reachability(body)?;
                }
            }

            StmtKind::Block { stmts, .. } => {
                let stmts = stmts.clone();
                let reach = self.check_reachability_stmts(&stmts)?;
                self.unit.stmts.get_mut(stmt).reach = reach;
            }

            StmtKind::Label { stmt: inner, .. } => {
                let inner = *inner;
                self.check_reachability(inner)?;
                self.unit.stmts.get_mut(stmt).reach = self.unit.stmts.get(inner).reach;
            }

            StmtKind::Return { .. } => {
                let reach = &mut self.unit.stmts.get_mut(stmt).reach;
                reach.insert(Reach::RETURN);
                reach.insert(Reach::STOP);
            }

            StmtKind::Break { parent } => {
                let parent = *parent;
                self.unit.stmts.get_mut(parent).reach.remove(Reach::STOP);
                self.unit.stmts.get_mut(stmt).reach.insert(Reach::STOP);
            }

            StmtKind::Continue { .. } | StmtKind::Goto { .. } => {
                self.unit.stmts.get_mut(stmt).reach.insert(Reach::STOP);
            }

            _ => {
                self.unit.stmts.get_mut(stmt).reach = Reach::NONE;
            }
        }
        Ok(())
    }

    fn check_reachability_stmts(&mut self, stmts: &[StmtId]) -> CompileResult<Reach> {
        let mut reach = Reach::NONE;
        for (i, &stmt) in stmts.iter().enumerate() {
            if reach.stops() {
                let resumes = matches!(
                    self.unit.stmts.get(stmt).kind,
                    StmtKind::Label { .. } | StmtKind::Case { .. }
                );
                if !resumes {
                    continue;
                }
                reach = Reach::NONE;
            }
            self.check_reachability(stmt)?;
            reach = reach.union(self.unit.stmts.get(stmt).reach);

            if reach.stops() {
                self.warn_unreachable_tail(stmt, &stmts[i + 1..])?;
            }
        }
        Ok(reach)
    }

    /// Warn about the first statement following a stopping one, with the
    /// carve-outs for labels, cases, loops enterable through `goto`, and
    /// `for` loops whose `pre` has a side effect.
    fn warn_unreachable_tail(&mut self, stopped: StmtId, tail: &[StmtId]) -> CompileResult<()> {
        for &next in tail {
            // A `break` out of a switch after a case body that flowed into
            // another case is ordinary; keep scanning.
            if let StmtKind::Break { parent } = &self.unit.stmts.get(next).kind {
                let parent_is_switch =
                    matches!(self.unit.stmts.get(*parent).kind, StmtKind::Switch { .. });
                let stopped_kind = &self.unit.stmts.get(stopped).kind;
                if parent_is_switch
                    && !matches!(stopped_kind, StmtKind::Return { .. } | StmtKind::Break { .. })
                {
                    continue;
                }
            }
            match &self.unit.stmts.get(next).kind {
                StmtKind::Label { .. } | StmtKind::Case { .. } => {}
                StmtKind::While { .. } | StmtKind::DoWhile { .. } => {}
                StmtKind::For { pre: Some(_), .. } => {}
                _ => {
                    let token = self.unit.stmts.get(next).token.clone();
                    self.diagnostics.warn(token, DiagnosticKind::Unreachable)?;
                }
            }
            break;
        }
        Ok(())
    }

    /// Mark a trailing `return` as the function-end return so the emitter
    /// can fall into the epilogue without a jump.
    pub fn check_funcend_return(&mut self, func: FuncId) {
        let function = self.unit.function(func);
        if function.return_type().is_void() {
            return;
        }
        let Some(body) = function.body else { return };
        let StmtKind::Block { stmts, .. } = &self.unit.stmts.get(body).kind else {
            return;
        };
        let Some(&last) = stmts.last() else { return };
        if let StmtKind::Return { func_end, .. } = &mut self.unit.stmts.get_mut(last).kind {
            *func_end = true;
        }
    }
}
