// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    CompileResult, DiagnosticKind, DiagnosticsList, Expr, FuncId, Function, Initializer, Name,
    NameGen, Qualifiers, ScopeId, Stmt, StmtId, StmtKind, Storage, Token, TranslationUnit, Type,
    TypeKind, VarDecl, VarInfo, GLOBAL_SCOPE,
};

/// The nearest enclosing `break` target, `continue` target and `switch`,
/// saved and restored explicitly around nested traversals.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopScope {
    pub break_target: Option<StmtId>,
    pub continue_target: Option<StmtId>,
    pub switch: Option<StmtId>,
}

/// Owns the translation unit under construction together with the cursor
/// state of the semantic passes: current scope, current function, the
/// loop/switch context and the diagnostics list.
#[derive(Debug)]
pub struct Elaborator {
    pub unit: TranslationUnit,
    pub diagnostics: DiagnosticsList,
    pub names: NameGen,
    cur_scope: ScopeId,
    cur_func: Option<FuncId>,
    loop_scope: LoopScope,
}

impl Elaborator {
    #[must_use]
    pub fn new(warnings_as_errors: bool) -> Self {
        Self {
            unit: TranslationUnit::new(),
            diagnostics: DiagnosticsList::new(warnings_as_errors),
            names: NameGen::new(),
            cur_scope: GLOBAL_SCOPE,
            cur_func: None,
            loop_scope: LoopScope::default(),
        }
    }

    /// Hand the finished unit (plus the name generator and diagnostics, so
    /// the back end can keep allocating labels) over to the next stage.
    #[must_use]
    pub fn into_parts(self) -> (TranslationUnit, NameGen, DiagnosticsList) {
        (self.unit, self.names, self.diagnostics)
    }

    #[must_use]
    pub fn current_scope(&self) -> ScopeId {
        self.cur_scope
    }

    #[must_use]
    pub fn current_function(&self) -> Option<FuncId> {
        self.cur_func
    }

    #[must_use]
    pub fn loop_scope(&self) -> LoopScope {
        self.loop_scope
    }

    /// Swap in a new loop/switch context, returning the previous one for
    /// the caller to restore.
    pub fn replace_loop_scope(&mut self, scope: LoopScope) -> LoopScope {
        std::mem::replace(&mut self.loop_scope, scope)
    }

    pub fn restore_loop_scope(&mut self, saved: LoopScope) {
        self.loop_scope = saved;
    }

    //
    // Scopes and variables
    //

    pub fn enter_scope(&mut self) -> ScopeId {
        let scope = self.unit.scopes.create(self.cur_scope);
        self.cur_scope = scope;
        if let Some(func) = self.cur_func {
            self.unit.function_mut(func).scopes.push(scope);
        }
        scope
    }

    pub fn exit_scope(&mut self) {
        debug_assert!(!self.cur_scope.is_global());
        self.cur_scope = self
            .unit
            .scopes
            .parent(self.cur_scope)
            .unwrap_or(GLOBAL_SCOPE);
    }

    /// Used by the inline expander to continue in an already-created scope.
    pub fn set_current_scope(&mut self, scope: ScopeId) {
        self.cur_scope = scope;
    }

    /// Declare a variable in `scope`, diagnosing redefinitions and type
    /// conflicts the way repeated declarations allow.
    pub fn add_var_to_scope(
        &mut self,
        scope: ScopeId,
        ident: &Token,
        name: Name,
        ty: Type,
        storage: Storage,
    ) -> CompileResult<()> {
        if let Some(existing) = self.unit.scopes.find_var_here(scope, &name) {
            if !crate::same_type(&existing.ty, &ty) {
                self.diagnostics
                    .error(ident.clone(), DiagnosticKind::TypeConflict { name })?;
            } else if !storage.contains(Storage::EXTERN) {
                if existing.storage.contains(Storage::EXTERN) {
                    let var = self.unit.scopes.find_var_here_mut(scope, &name).unwrap();
                    var.storage.remove(Storage::EXTERN);
                } else if scope.is_global() && existing.init.is_none() {
                    // Tentative definition; the later one wins.
                } else {
                    self.diagnostics
                        .error(ident.clone(), DiagnosticKind::AlreadyDefined { name })?;
                }
            }
            return Ok(());
        }

        let mut var = VarInfo::new(name.clone(), ty.clone(), storage);
        if storage.contains(Storage::STATIC) && !scope.is_global() {
            // Function-local static: synthesize the global twin it is
            // actually stored in.
            let gvar_name = Name::new(format!("{}{}", name, self.names.alloc_label()));
            var.static_gvar = Some(gvar_name.clone());
            self.unit.scopes.add_var(
                GLOBAL_SCOPE,
                VarInfo::new(gvar_name, ty, Storage::STATIC),
            );
        }
        self.unit.scopes.add_var(scope, var);
        Ok(())
    }

    pub fn define_var(
        &mut self,
        ident: &Token,
        name: Name,
        ty: Type,
        storage: Storage,
    ) -> CompileResult<()> {
        self.add_var_to_scope(self.cur_scope, ident, name, ty, storage)
    }

    pub fn define_global_init(&mut self, name: &Name, init: Initializer) {
        if let Some(var) = self.unit.scopes.find_var_here_mut(GLOBAL_SCOPE, name) {
            var.init = Some(init);
        }
    }

    pub fn define_enum_member(&mut self, ident: &Token, name: Name, ty: Type, value: i64) {
        _ = self.add_var_to_scope(self.cur_scope, ident, name.clone(), ty, Storage::ENUM_MEMBER);
        if let Some((_, var)) = self.unit.scopes.find_var_mut(self.cur_scope, &name) {
            var.enum_value = value;
        }
    }

    /// A compiler-introduced temporary in `scope`; the generated name
    /// cannot collide, so no duplicate check is needed.
    #[must_use]
    pub fn alloc_tmp_var(&mut self, scope: ScopeId, ty: Type) -> Expr {
        let name = self.names.alloc_tmp();
        self.unit
            .scopes
            .add_var(scope, VarInfo::new(name.clone(), ty.clone(), Storage::NONE));
        Expr::variable(name, ty, Token::synthetic("tmp"), scope)
    }

    /// Resolve a struct type, failing on an undefined name; recurses into
    /// members so nested incompleteness surfaces too.
    pub fn ensure_struct(&mut self, ty: &Type, token: &Token) -> CompileResult<()> {
        match &ty.kind {
            TypeKind::Struct { name } => {
                let Some(info) = self.unit.structs.lookup(name) else {
                    return self.diagnostics.fatal(
                        token.clone(),
                        DiagnosticKind::IncompleteStruct { name: name.clone() },
                    );
                };
                let member_types: Vec<Type> = info
                    .members
                    .iter()
                    .filter(|m| m.ty.is_struct())
                    .map(|m| m.ty.clone())
                    .collect();
                for member_ty in member_types {
                    self.ensure_struct(&member_ty, token)?;
                }
                Ok(())
            }
            TypeKind::Array { element, .. } => self.ensure_struct(element, token),
            _ => Ok(()),
        }
    }

    //
    // Functions
    //

    /// Open a function definition: registers the global, creates the
    /// parameter scope and enters it.
    pub fn begin_function(
        &mut self,
        ident: &Token,
        name: Name,
        ty: Type,
        params: Vec<(Name, Type)>,
        storage: Storage,
    ) -> CompileResult<FuncId> {
        debug_assert!(ty.is_func());
        self.add_var_to_scope(GLOBAL_SCOPE, ident, name.clone(), ty.clone(), storage)?;

        let id = FuncId(self.unit.functions.len() as u32);
        let mut function = Function::new(name.clone(), ty);
        function.params = params.iter().map(|(name, _)| name.clone()).collect();
        self.unit.functions.push(function);

        if let Some(var) = self.unit.scopes.find_var_here_mut(GLOBAL_SCOPE, &name) {
            var.func = Some(id);
        }

        self.cur_func = Some(id);
        self.enter_scope();
        for (param_name, param_ty) in params {
            self.define_var(
                ident,
                param_name,
                param_ty,
                Storage::PARAM,
            )?;
        }
        Ok(id)
    }

    /// Close the function opened by `begin_function`, then run the
    /// reachability pass and the func-end return marking over its body.
    pub fn end_function(&mut self, id: FuncId, body: StmtId) -> CompileResult<()> {
        self.exit_scope();
        self.unit.function_mut(id).body = Some(body);
        self.check_reachability(body)?;
        let reach = self.unit.stmts.get(body).reach;
        self.unit.function_mut(id).body_reach = reach;
        self.check_funcend_return(id);
        self.cur_func = None;
        Ok(())
    }

    #[must_use]
    pub fn find_function(&self, name: &Name) -> Option<FuncId> {
        self.unit
            .scopes
            .find_var_here(GLOBAL_SCOPE, name)
            .and_then(|var| var.func)
    }

    //
    // Statement builders
    //

    pub fn stmt_expr(&mut self, expr: Expr) -> StmtId {
        let token = expr.token.clone();
        self.unit.stmts.alloc(Stmt::new(token, StmtKind::Expr(expr)))
    }

    pub fn stmt_block(&mut self, token: Token, scope: Option<ScopeId>, stmts: Vec<StmtId>) -> StmtId {
        self.unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Block { scope, stmts }))
    }

    pub fn stmt_if(
        &mut self,
        token: Token,
        cond: Expr,
        then_stmt: StmtId,
        else_stmt: Option<StmtId>,
    ) -> StmtId {
        self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::If {
                cond,
                then_stmt,
                else_stmt,
            },
        ))
    }

    /// Allocates the switch with an empty body; cases register themselves
    /// through `stmt_case`, and `set_switch_body` closes it.
    pub fn stmt_switch(&mut self, token: Token, value: Expr) -> StmtId {
        self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::Switch {
                value,
                body: None,
                cases: Vec::new(),
                default: None,
            },
        ))
    }

    pub fn set_switch_body(&mut self, switch: StmtId, body: StmtId) {
        self.unit.stmts.set_switch_body(switch, body);
    }

    pub fn stmt_case(&mut self, token: Token, value: Option<i64>) -> StmtId {
        let switch = self
            .loop_scope
            .switch
            .expect("case outside of switch");
        let case = self
            .unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Case { switch, value }));
        self.unit.stmts.push_case(switch, case);
        case
    }

    /// Allocates a loop statement with a placeholder body, so `break` and
    /// `continue` built inside the body can point at it already.
    pub fn stmt_while(&mut self, token: Token, cond: Expr) -> StmtId {
        let id = self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::While {
                cond,
                body: StmtId(u32::MAX),
            },
        ));
        id
    }

    pub fn stmt_do_while(&mut self, token: Token, cond: Expr) -> StmtId {
        self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::DoWhile {
                body: StmtId(u32::MAX),
                cond,
            },
        ))
    }

    pub fn stmt_for(
        &mut self,
        token: Token,
        pre: Option<Expr>,
        cond: Option<Expr>,
        post: Option<Expr>,
    ) -> StmtId {
        self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::For {
                pre,
                cond,
                post,
                body: StmtId(u32::MAX),
            },
        ))
    }

    pub fn set_loop_body(&mut self, loop_stmt: StmtId, body: StmtId) {
        match &mut self.unit.stmts.get_mut(loop_stmt).kind {
            StmtKind::While { body: slot, .. }
            | StmtKind::DoWhile { body: slot, .. }
            | StmtKind::For { body: slot, .. } => *slot = body,
            _ => panic!("set_loop_body on a non-loop statement"),
        }
    }

    /// Builds a `return`, casting the value to the function's return type.
    pub fn stmt_return(&mut self, token: Token, value: Option<Expr>) -> CompileResult<StmtId> {
        let value = match (value, self.cur_func) {
            (Some(value), Some(func)) => {
                let ret = self.unit.function(func).return_type().clone();
                if ret.is_void() {
                    Some(value)
                } else {
                    Some(self.make_cast(&ret, &token, value, false)?)
                }
            }
            (value, _) => value,
        };
        Ok(self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::Return {
                value,
                func_end: false,
            },
        )))
    }

    pub fn stmt_break(&mut self, token: Token) -> StmtId {
        let parent = self
            .loop_scope
            .break_target
            .expect("break outside of loop or switch");
        self.unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Break { parent }))
    }

    pub fn stmt_continue(&mut self, token: Token) -> StmtId {
        let parent = self
            .loop_scope
            .continue_target
            .expect("continue outside of loop");
        self.unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Continue { parent }))
    }

    pub fn stmt_goto(&mut self, token: Token, label: Name) -> StmtId {
        let id = self
            .unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Goto { label }));
        if let Some(func) = self.cur_func {
            self.unit.function_mut(func).gotos.push(id);
        }
        id
    }

    pub fn stmt_label(&mut self, token: Token, name: Name, stmt: StmtId) -> StmtId {
        let id = self.unit.stmts.alloc(Stmt::new(
            token,
            StmtKind::Label {
                name: name.clone(),
                stmt,
                used: false,
            },
        ));
        if let Some(func) = self.cur_func {
            self.unit.function_mut(func).label_table.insert(name, id);
        }
        id
    }

    pub fn stmt_vardecl(&mut self, token: Token, decls: Vec<VarDecl>) -> StmtId {
        self.unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::VarDecl { decls }))
    }

    pub fn stmt_asm(&mut self, token: Token, text: String) -> StmtId {
        self.unit
            .stmts
            .alloc(Stmt::new(token, StmtKind::Asm { text }))
    }

    //
    // Literals
    //

    /// Turn a string literal into a synthetic const char-array global so
    /// address arithmetic and lowering see an ordinary variable.
    pub fn str_to_char_array_var(&mut self, expr: Expr) -> Expr {
        let crate::ExprKind::Str(bytes) = &expr.kind else {
            return expr;
        };
        let bytes = bytes.clone();
        let ty = Type::array(
            Type::char_().with_qualifier(Qualifiers::CONST),
            Some(bytes.len()),
        )
        .with_qualifier(Qualifiers::CONST);
        let name = self.names.alloc_label();
        let mut var = VarInfo::new(name.clone(), ty.clone(), Storage::STATIC);
        var.init = Some(Initializer::Single(Expr::str(
            ty.clone(),
            expr.token.clone(),
            bytes,
        )));
        self.unit.scopes.add_var(GLOBAL_SCOPE, var);
        Expr::variable(name, ty, expr.token, GLOBAL_SCOPE)
    }
}
