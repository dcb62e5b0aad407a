// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    array_to_ptr, can_cast, ptrof, same_type, same_type_without_qualifier, wrap_value, BinOp,
    CompileResult, DiagnosticKind, Expr, ExprKind, FixnumKind, Name, Severity, Storage, Token,
    Type, TypeKind, UnOp,
};

use super::Elaborator;

impl Elaborator {
    //
    // Casting
    //

    /// Diagnose an illegal conversion; the walk continues either way.
    pub fn check_cast(
        &mut self,
        dst: &Type,
        src: &Type,
        zero: bool,
        is_explicit: bool,
        token: &Token,
    ) -> CompileResult<bool> {
        let ok = can_cast(dst, src, zero, is_explicit);
        if ok && !dst.is_array() {
            return Ok(true);
        }

        let kind = if dst.is_array() {
            DiagnosticKind::CannotConvertToArray {
                dst: dst.to_string(),
                src: src.to_string(),
            }
        } else {
            DiagnosticKind::CannotConvert {
                dst: dst.to_string(),
                src: src.to_string(),
            }
        };
        let severity = if dst.is_array()
            || !dst.is_prim()
            || !(src.is_prim() || (src.is_array() && dst.is_ptr()))
        {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.diagnostics.report(token.clone(), kind, severity)?;
        Ok(false)
    }

    /// Insert a conversion to `ty`, folding constants in place.
    pub fn make_cast(
        &mut self,
        ty: &Type,
        token: &Token,
        sub: Expr,
        is_explicit: bool,
    ) -> CompileResult<Expr> {
        self.check_cast(ty, &sub.ty, sub.is_zero(), is_explicit, token)?;
        if same_type(ty, &sub.ty) {
            return Ok(sub);
        }

        if sub.is_const() && !matches!(sub.kind, ExprKind::Str(_)) {
            match sub.kind {
                ExprKind::Flonum(value) => {
                    if ty.is_fixnum() {
                        let fixnum = value as i64;
                        let (_, unsigned) = ty.fixnum_kind().unwrap();
                        let size = ty.fixed_size().unwrap_or(8);
                        return Ok(Expr::fixnum(
                            ty.clone(),
                            sub.token,
                            wrap_value(fixnum, size, unsigned),
                        ));
                    }
                    debug_assert!(ty.is_flonum());
                    return Ok(Expr::flonum(ty.clone(), sub.token, value));
                }
                ExprKind::Fixnum(value) => {
                    if ty.is_flonum() {
                        let flonum = if sub.ty.is_unsigned() {
                            value as u64 as f64
                        } else {
                            value as f64
                        };
                        return Ok(Expr::flonum(ty.clone(), sub.token, flonum));
                    }
                    let size = ty.fixed_size().unwrap_or(8);
                    let unsigned = ty.is_unsigned();
                    return Ok(Expr::fixnum(
                        ty.clone(),
                        sub.token,
                        wrap_value(value, size, unsigned),
                    ));
                }
                _ => {}
            }
        }

        Ok(Expr::unary(UnOp::Cast, ty.clone(), token.clone(), sub))
    }

    /// Integer promotion: anything below `int` widens to `int`.
    pub fn promote_to_int(&mut self, expr: Expr) -> CompileResult<Expr> {
        let Some((kind, unsigned)) = expr.ty.fixnum_kind() else {
            return Ok(expr);
        };
        if kind.rank() >= FixnumKind::Int.rank() {
            return Ok(expr);
        }
        let ty = crate::get_fixnum_type(FixnumKind::Int, unsigned, expr.ty.qualifier);
        let token = expr.token.clone();
        self.make_cast(&ty, &token, expr, false)
    }

    /// The usual arithmetic conversions: flonum dominates, otherwise the
    /// higher `(rank << 1 | unsigned)` ordering wins. With `make_int`, two
    /// sub-`int` operands are both promoted to `int` instead.
    pub fn cast_numbers(
        &mut self,
        lhs: Expr,
        rhs: Expr,
        make_int: bool,
    ) -> CompileResult<(Expr, Expr)> {
        if !lhs.ty.is_number() {
            return self
                .diagnostics
                .fatal(lhs.token.clone(), DiagnosticKind::NumberTypeExpected);
        }
        if !rhs.ty.is_number() {
            return self
                .diagnostics
                .fatal(rhs.token.clone(), DiagnosticKind::NumberTypeExpected);
        }

        let lflo = lhs.ty.is_flonum();
        let rflo = rhs.ty.is_flonum();
        if lflo || rflo {
            let dir = if !lflo {
                1
            } else if !rflo {
                -1
            } else {
                rhs.ty.flonum_kind().unwrap() as i32 - lhs.ty.flonum_kind().unwrap() as i32
            };
            return Ok(match dir {
                d if d < 0 => {
                    let ty = lhs.ty.clone();
                    let token = rhs.token.clone();
                    let rhs = self.make_cast(&ty, &token, rhs, false)?;
                    (lhs, rhs)
                }
                d if d > 0 => {
                    let ty = rhs.ty.clone();
                    let token = lhs.token.clone();
                    let lhs = self.make_cast(&ty, &token, lhs, false)?;
                    (lhs, rhs)
                }
                _ => (lhs, rhs),
            });
        }

        let (lkind, lunsigned) = lhs.ty.fixnum_kind().unwrap();
        let (rkind, runsigned) = rhs.ty.fixnum_kind().unwrap();
        // Enums take part as plain ints.
        let ltype = if lkind == FixnumKind::Enum { Type::int() } else { lhs.ty.clone() };
        let rtype = if rkind == FixnumKind::Enum { Type::int() } else { rhs.ty.clone() };

        if make_int && lkind.rank() < FixnumKind::Int.rank() && rkind.rank() < FixnumKind::Int.rank()
        {
            let lhs = self.promote_to_int(lhs)?;
            let rhs = self.promote_to_int(rhs)?;
            return Ok((lhs, rhs));
        }

        let l = (lkind.rank() << 1) | u32::from(lunsigned);
        let r = (rkind.rank() << 1) | u32::from(runsigned);
        Ok(if l > r {
            let token = rhs.token.clone();
            let rhs = self.make_cast(&ltype, &token, rhs, false)?;
            (lhs, rhs)
        } else if l < r {
            let token = lhs.token.clone();
            let lhs = self.make_cast(&rtype, &token, lhs, false)?;
            (lhs, rhs)
        } else {
            (lhs, rhs)
        })
    }

    //
    // Numeric binary operators
    //

    fn fold_flonum_bop(op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<Expr> {
        let lval = match lhs.kind {
            ExprKind::Flonum(v) => v,
            ExprKind::Fixnum(v) => v as f64,
            _ => return None,
        };
        let rval = match rhs.kind {
            ExprKind::Flonum(v) => v,
            ExprKind::Fixnum(v) => v as f64,
            _ => return None,
        };
        let value = match op {
            BinOp::Mul => lval * rval,
            BinOp::Div => lval / rval,
            BinOp::Add => lval + rval,
            BinOp::Sub => lval - rval,
            _ => return None,
        };
        let ty = if rhs.ty.is_flonum() { rhs.ty.clone() } else { lhs.ty.clone() };
        Some(if ty.is_flonum() {
            Expr::flonum(ty, lhs.token.clone(), value)
        } else {
            Expr::fixnum(ty, lhs.token.clone(), value as i64)
        })
    }

    /// The promoted result type of folding two integer constants: the
    /// higher-ranked operand type, but never smaller than `int`.
    fn fold_result_type(lhs: &Expr, rhs: &Expr) -> Type {
        let (lkind, _) = lhs.ty.fixnum_kind().unwrap();
        let (rkind, _) = rhs.ty.fixnum_kind().unwrap();
        let ty = if lkind.rank() >= rkind.rank() { lhs.ty.clone() } else { rhs.ty.clone() };
        match ty.fixnum_kind() {
            Some((kind, _)) if kind.rank() < FixnumKind::Int.rank() => Type::int(),
            Some((FixnumKind::Enum, _)) => Type::int(),
            _ => ty,
        }
    }

    /// `*`, `/`, `%`, `&`, `|`, `^` over numbers, folding constants with
    /// wrap-around semantics.
    pub fn new_num_bop(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        if lhs.is_const() && lhs.ty.is_number() && rhs.is_const() && rhs.ty.is_number() {
            if lhs.ty.is_flonum() || rhs.ty.is_flonum() {
                if let Some(folded) = Self::fold_flonum_bop(op, &lhs, &rhs) {
                    return Ok(folded);
                }
            }

            if matches!(op, BinOp::Div | BinOp::Mod) && rhs.as_fixnum() == Some(0) {
                return self
                    .diagnostics
                    .fatal(token.clone(), DiagnosticKind::DivideByZero);
            }

            let l = lhs.as_fixnum().unwrap();
            let r = rhs.as_fixnum().unwrap();
            let value = if lhs.ty.is_unsigned() {
                let l = l as u64;
                let r = r as u64;
                let v = match op {
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::Div => l / r,
                    BinOp::Mod => l % r,
                    BinOp::BitAnd => l & r,
                    BinOp::BitOr => l | r,
                    BinOp::BitXor => l ^ r,
                    _ => unreachable!("not a numeric binary operator"),
                };
                v as i64
            } else {
                match op {
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::Div => l.wrapping_div(r),
                    BinOp::Mod => l.wrapping_rem(r),
                    BinOp::BitAnd => l & r,
                    BinOp::BitOr => l | r,
                    BinOp::BitXor => l ^ r,
                    _ => unreachable!("not a numeric binary operator"),
                }
            };
            let ty = Self::fold_result_type(&lhs, &rhs);
            let size = ty.fixed_size().unwrap_or(8);
            let unsigned = ty.is_unsigned();
            return Ok(Expr::fixnum(
                ty,
                lhs.token.clone(),
                wrap_value(value, size, unsigned),
            ));
        }

        if matches!(op, BinOp::Div | BinOp::Mod)
            && rhs.is_const()
            && rhs.ty.is_fixnum()
            && rhs.as_fixnum() == Some(0)
        {
            self.diagnostics
                .warn(token.clone(), DiagnosticKind::DivideByZero)?;
        }

        let (lhs, rhs) = self.cast_numbers(lhs, rhs, true)?;
        let ty = lhs.ty.clone();
        Ok(Expr::bin(op, ty, token.clone(), lhs, rhs))
    }

    /// Integer-only binary operators (`%`, `&`, `|`, `^`, shifts go through
    /// their own path).
    pub fn new_int_bop(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        if !lhs.ty.is_fixnum() {
            return self
                .diagnostics
                .fatal(lhs.token.clone(), DiagnosticKind::IntTypeExpected);
        }
        if !rhs.ty.is_fixnum() {
            return self
                .diagnostics
                .fatal(rhs.token.clone(), DiagnosticKind::IntTypeExpected);
        }
        self.new_num_bop(op, token, lhs, rhs)
    }

    /// `<<` and `>>`; the result keeps the left operand's type.
    pub fn new_shift(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        if !lhs.ty.is_fixnum() || !rhs.ty.is_fixnum() {
            return self.diagnostics.fatal(
                token.clone(),
                DiagnosticKind::CannotApply {
                    op: token.text.to_string(),
                },
            );
        }
        if let (Some(l), Some(r)) = (lhs.as_fixnum(), rhs.as_fixnum()) {
            // A shift keeps the (promoted) type of its left operand.
            let unsigned = lhs.ty.is_unsigned();
            let ty = match lhs.ty.fixnum_kind() {
                Some((kind, _)) if kind.rank() < FixnumKind::Int.rank() => {
                    Type::fixnum(FixnumKind::Int, unsigned)
                }
                _ => lhs.ty.clone(),
            };
            let size = ty.fixed_size().unwrap_or(8);
            let value = match op {
                BinOp::LShift => l.wrapping_shl(r as u32),
                BinOp::RShift if unsigned => ((l as u64) >> (r as u32 & 63)) as i64,
                BinOp::RShift => l.wrapping_shr(r as u32),
                _ => unreachable!("not a shift operator"),
            };
            return Ok(Expr::fixnum(ty, lhs.token.clone(), wrap_value(value, size, unsigned)));
        }
        let ty = lhs.ty.clone();
        Ok(Expr::bin(op, ty, token.clone(), lhs, rhs))
    }

    //
    // Additive operators, including pointer arithmetic
    //

    pub fn new_addsub(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        debug_assert!(matches!(op, BinOp::Add | BinOp::Sub));
        let lhs = self.str_to_char_array_var(lhs);
        let rhs = self.str_to_char_array_var(rhs);

        if lhs.ty.is_number() && rhs.ty.is_number() {
            if lhs.is_const() && rhs.is_const() {
                if lhs.ty.is_flonum() || rhs.ty.is_flonum() {
                    if let Some(folded) = Self::fold_flonum_bop(op, &lhs, &rhs) {
                        return Ok(folded);
                    }
                }
                let l = lhs.as_fixnum().unwrap();
                let r = rhs.as_fixnum().unwrap();
                let value = match op {
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    _ => unreachable!(),
                };
                let ty = Self::fold_result_type(&lhs, &rhs);
                let size = ty.fixed_size().unwrap_or(8);
                let unsigned = ty.is_unsigned();
                return Ok(Expr::fixnum(
                    ty,
                    lhs.token.clone(),
                    wrap_value(value, size, unsigned),
                ));
            }
            let (lhs, rhs) = self.cast_numbers(lhs, rhs, true)?;
            let ty = lhs.ty.clone();
            return Ok(Expr::bin(op, ty, token.clone(), lhs, rhs));
        }

        if lhs.ty.ptr_or_array() && rhs.ty.is_fixnum() {
            let ty = if lhs.ty.is_array() { array_to_ptr(&lhs.ty) } else { lhs.ty.clone() };
            let pointee = ty.pointee().unwrap().clone();
            self.ensure_struct(&pointee, token)?;
            return self.make_ptr_arith(op, token, ty, lhs, rhs);
        }

        if op == BinOp::Sub && lhs.ty.ptr_or_array() && rhs.ty.ptr_or_array() {
            return self.new_ptr_diff(token, lhs, rhs);
        }

        if op == BinOp::Add && lhs.ty.is_fixnum() && rhs.ty.ptr_or_array() {
            // Canonicalize integer + pointer by swapping.
            let ty = if rhs.ty.is_array() { array_to_ptr(&rhs.ty) } else { rhs.ty.clone() };
            let pointee = ty.pointee().unwrap().clone();
            self.ensure_struct(&pointee, token)?;
            return self.make_ptr_arith(BinOp::Add, token, ty, rhs, lhs);
        }

        self.diagnostics.error(
            token.clone(),
            DiagnosticKind::CannotApply {
                op: token.text.to_string(),
            },
        )?;
        let ty = lhs.ty.clone();
        Ok(Expr::bin(op, ty, token.clone(), lhs, rhs))
    }

    /// Pointer ± integer. The integer operand stays unscaled in the tree;
    /// the IR builder applies the pointee-size scale. Constant bases fold.
    fn make_ptr_arith(
        &mut self,
        op: BinOp,
        token: &Token,
        ty: Type,
        ptr: Expr,
        index: Expr,
    ) -> CompileResult<Expr> {
        let kind = if op == BinOp::Add { BinOp::PtrAdd } else { BinOp::PtrSub };

        if ptr.is_const() && index.is_const() {
            let scale = self.unit.structs.size_of(ty.pointee().unwrap()) as i64;
            let base = ptr.as_fixnum().unwrap();
            let offset = index.as_fixnum().unwrap() * scale;
            let value = if kind == BinOp::PtrAdd { base + offset } else { base - offset };
            return Ok(Expr::fixnum(ty, ptr.token.clone(), value));
        }

        let index_token = index.token.clone();
        let index = self.make_cast(&Type::ssize_type(), &index_token, index, false)?;
        Ok(Expr::bin(kind, ty, token.clone(), ptr, index))
    }

    /// Pointer − pointer: `((ssize)lhs - (ssize)rhs) / sizeof(*lhs)`.
    fn new_ptr_diff(&mut self, token: &Token, lhs: Expr, rhs: Expr) -> CompileResult<Expr> {
        let ltype = if lhs.ty.is_array() { array_to_ptr(&lhs.ty) } else { lhs.ty.clone() };
        let rtype = if rhs.ty.is_array() { array_to_ptr(&rhs.ty) } else { rhs.ty.clone() };
        if !same_type_without_qualifier(&ltype, &rtype, true) {
            return self
                .diagnostics
                .fatal(token.clone(), DiagnosticKind::DifferentPointerDiff);
        }
        let pointee = ltype.pointee().unwrap().clone();
        self.ensure_struct(&pointee, token)?;
        let elem_size = self.unit.structs.size_of(&pointee) as i64;

        if lhs.is_const() && rhs.is_const() {
            let l = lhs.as_fixnum().unwrap();
            let r = rhs.as_fixnum().unwrap();
            return Ok(Expr::fixnum(
                Type::ssize_type(),
                token.clone(),
                (l - r) / elem_size,
            ));
        }

        let diff = Expr::bin(BinOp::Sub, Type::size_type(), token.clone(), lhs, rhs);
        let diff = self.make_cast(&Type::ssize_type(), token, diff, false)?;
        Ok(Expr::bin(
            BinOp::Div,
            Type::ssize_type(),
            token.clone(),
            diff,
            Expr::fixnum(Type::ssize_type(), token.clone(), elem_size),
        ))
    }

    //
    // Comparisons
    //

    pub fn new_cmp(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        debug_assert!(op.is_comparison());
        // Function values compare as their address.
        let mut lhs = if lhs.ty.is_func() {
            let ty = ptrof(&lhs.ty);
            let token = lhs.token.clone();
            Expr::unary(UnOp::Ref, ty, token, lhs)
        } else {
            lhs
        };
        let mut rhs = if rhs.ty.is_func() {
            let ty = ptrof(&rhs.ty);
            let token = rhs.token.clone();
            Expr::unary(UnOp::Ref, ty, token, rhs)
        } else {
            rhs
        };
        let mut op = op;

        if lhs.ty.ptr_or_array() || rhs.ty.ptr_or_array() {
            if lhs.ty.is_array() {
                let ty = array_to_ptr(&lhs.ty);
                let token = lhs.token.clone();
                lhs = self.make_cast(&ty, &token, lhs, false)?;
            }
            if rhs.ty.is_array() {
                let ty = array_to_ptr(&rhs.ty);
                let token = rhs.token.clone();
                rhs = self.make_cast(&ty, &token, rhs, false)?;
            }
            if !lhs.ty.is_ptr() {
                // Pointer ends up on the left for the zero comparison.
                std::mem::swap(&mut lhs, &mut rhs);
                op = op.swap_comparison();
            }
            let compatible = same_type_without_qualifier(&lhs.ty, &rhs.ty, true)
                || lhs.ty.is_void_ptr()
                || rhs.ty.is_void_ptr()
                || rhs.is_zero();
            if !compatible {
                return self.diagnostics.fatal(
                    token.clone(),
                    DiagnosticKind::IncompatiblePointerComparison,
                );
            }
            if !rhs.ty.is_ptr() {
                let ty = lhs.ty.clone();
                let rtoken = rhs.token.clone();
                rhs = self.make_cast(&ty, &rtoken, rhs, false)?;
            }
        } else {
            let casted = self.cast_numbers(lhs, rhs, false);
            match casted {
                Ok((l, r)) => {
                    lhs = l;
                    rhs = r;
                }
                Err(e) => return Err(e),
            }
        }

        if lhs.is_const() && rhs.is_const() {
            let result = match (&lhs.kind, &rhs.kind) {
                (ExprKind::Fixnum(l), ExprKind::Fixnum(r)) => {
                    if lhs.ty.is_unsigned() {
                        let l = *l as u64;
                        let r = *r as u64;
                        compare(op, &l, &r)
                    } else {
                        compare(op, l, r)
                    }
                }
                (ExprKind::Flonum(l), ExprKind::Flonum(r)) => compare(op, l, r),
                _ => return Ok(Expr::bin(op, Type::bool_(), token.clone(), lhs, rhs)),
            };
            return Ok(Expr::fixnum(Type::bool_(), token.clone(), i64::from(result)));
        }

        Ok(Expr::bin(op, Type::bool_(), token.clone(), lhs, rhs))
    }

    //
    // Logical normalization
    //

    /// Rewrite `expr` into a boolean-producing node.
    pub fn make_cond(&mut self, expr: Expr) -> CompileResult<Expr> {
        Ok(match &expr.kind {
            ExprKind::Fixnum(v) => {
                let v = *v;
                Expr::fixnum(Type::bool_(), expr.token, i64::from(v != 0))
            }
            ExprKind::Flonum(v) => {
                let v = *v;
                Expr::fixnum(Type::bool_(), expr.token, i64::from(v != 0.0))
            }
            ExprKind::Str(_) => Expr::fixnum(Type::bool_(), expr.token, 1),
            ExprKind::Bin { op, .. } if op.is_comparison() => expr,
            ExprKind::Bin { op: BinOp::LogAnd | BinOp::LogOr, .. } => expr,
            ExprKind::Bin { op: BinOp::Comma, .. } => {
                let ExprKind::Bin { op, lhs, rhs } = expr.kind else { unreachable!() };
                let rhs = self.make_cond(*rhs)?;
                let ty = rhs.ty.clone();
                Expr::bin(op, ty, expr.token, *lhs, rhs)
            }
            _ => match expr.ty.kind {
                TypeKind::Array { .. } | TypeKind::Func { .. } => {
                    Expr::fixnum(Type::bool_(), expr.token, 1)
                }
                _ => {
                    let token = expr.token.clone();
                    let zero = Expr::fixnum(Type::int(), token.clone(), 0);
                    let zero = self.make_cast(&expr.ty.clone(), &token, zero, false)?;
                    self.new_cmp(BinOp::Ne, &token, expr, zero)?
                }
            },
        })
    }

    /// Build `!expr`, pushing the negation inward algebraically.
    pub fn make_not_expr(&mut self, expr: Expr) -> CompileResult<Expr> {
        let cond = self.make_cond(expr)?;
        Ok(match cond.kind {
            ExprKind::Fixnum(v) => Expr::fixnum(cond.ty, cond.token, i64::from(v == 0)),
            ExprKind::Bin { op, lhs, rhs } if op.is_comparison() => Expr::new(
                cond.ty,
                cond.token,
                ExprKind::Bin {
                    op: op.negate_comparison(),
                    lhs,
                    rhs,
                },
            ),
            ExprKind::Bin { op: op @ (BinOp::LogAnd | BinOp::LogOr), lhs, rhs } => {
                let flipped = if op == BinOp::LogAnd { BinOp::LogOr } else { BinOp::LogAnd };
                let lhs = self.make_not_expr(*lhs)?;
                let rhs = self.make_not_expr(*rhs)?;
                Expr::bin(flipped, Type::bool_(), cond.token, lhs, rhs)
            }
            ExprKind::Bin { op: BinOp::Comma, lhs, rhs } => {
                let rhs = self.make_not_expr(*rhs)?;
                let ty = rhs.ty.clone();
                Expr::new(
                    ty,
                    cond.token,
                    ExprKind::Bin {
                        op: BinOp::Comma,
                        lhs,
                        rhs: Box::new(rhs),
                    },
                )
            }
            _ => unreachable!("make_cond produces only negatable nodes"),
        })
    }

    //
    // Lvalues, address-of, inc/dec
    //

    pub fn check_lval(&mut self, token: &Token, expr: &Expr, kind: DiagnosticKind) -> CompileResult<()> {
        match expr.kind {
            ExprKind::Variable { .. }
            | ExprKind::Unary { op: UnOp::Deref, .. }
            | ExprKind::Member { .. } => Ok(()),
            _ => self.diagnostics.error(token.clone(), kind),
        }
    }

    fn check_referable(&mut self, token: &Token, expr: &Expr, kind: DiagnosticKind) -> CompileResult<()> {
        if matches!(expr.kind, ExprKind::CompoundLiteral { .. }) {
            return Ok(());
        }
        self.check_lval(token, expr, kind)
    }

    /// `&expr`, with the folds and the ref-taken bookkeeping.
    pub fn make_refer(&mut self, token: &Token, expr: Expr) -> CompileResult<Expr> {
        self.check_referable(token, &expr, DiagnosticKind::CannotTakeReference)?;

        // `&((S*)N)->m` folds to a constant pointer.
        if let ExprKind::Member { target, index, arrow: true } = &expr.kind {
            if let (ExprKind::Fixnum(base), Some(stype)) = (&target.kind, target.ty.pointee()) {
                let base = *base;
                if let TypeKind::Struct { name } = &stype.kind {
                    if let Some(info) = self.unit.structs.lookup(name) {
                        let member = &info.members[*index];
                        let ty = ptrof(&member.ty);
                        let value = base + member.offset as i64;
                        return Ok(Expr::fixnum(ty, token.clone(), value));
                    }
                }
            }
        }

        // `&*e` collapses to `e`.
        if let ExprKind::Unary { op: UnOp::Deref, .. } = &expr.kind {
            let ExprKind::Unary { sub, .. } = expr.kind else { unreachable!() };
            return Ok(*sub);
        }

        let referand = match &expr.kind {
            ExprKind::CompoundLiteral { var, .. } => var,
            _ => &expr,
        };
        if let ExprKind::Variable { name, scope } = &referand.kind {
            let scope = *scope;
            let name = name.clone();
            let mut gvar = None;
            if let Some((owner, var)) = self.unit.scopes.find_var_mut(scope, &name) {
                var.storage.insert(Storage::REF_TAKEN);
                if var.storage.contains(Storage::STATIC) && !owner.is_global() {
                    gvar = var.static_gvar.clone();
                }
            }
            if let Some(gvar) = gvar {
                if let Some((_, var)) = self.unit.scopes.find_var_mut(crate::GLOBAL_SCOPE, &gvar) {
                    var.storage.insert(Storage::REF_TAKEN);
                }
            }
        }

        let ty = ptrof(&expr.ty);
        Ok(Expr::unary(UnOp::Ref, ty, token.clone(), expr))
    }

    /// `*expr`; dereferencing a just-taken address collapses back to the
    /// original lvalue.
    pub fn new_deref(&mut self, token: &Token, expr: Expr) -> CompileResult<Expr> {
        if let ExprKind::Unary { op: UnOp::Ref, .. } = &expr.kind {
            let ExprKind::Unary { sub, .. } = expr.kind else { unreachable!() };
            return Ok(*sub);
        }
        let Some(pointee) = expr.ty.pointee().cloned() else {
            self.diagnostics.error(
                token.clone(),
                DiagnosticKind::CannotApply {
                    op: "*".to_string(),
                },
            )?;
            return Ok(expr);
        };
        Ok(Expr::unary(UnOp::Deref, pointee, token.clone(), expr))
    }

    pub fn incdec_of(&mut self, op: UnOp, target: Expr, token: &Token) -> CompileResult<Expr> {
        debug_assert!(matches!(
            op,
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec
        ));
        self.check_referable(token, &target, DiagnosticKind::LvalueExpected)?;
        if let ExprKind::Member { .. } = &target.kind {
            if let Some(bitfield) = self.member_bitfield(&target) {
                return self.transform_incdec_of_bitfield(op, target, token, bitfield);
            }
        }
        let ty = target.ty.clone();
        Ok(Expr::unary(op, ty, token.clone(), target))
    }

    //
    // Assignment
    //

    /// Plain assignment; bit-field destinations expand to the masked
    /// read-modify-write sequence.
    pub fn new_assign(&mut self, token: &Token, lhs: Expr, rhs: Expr) -> CompileResult<Expr> {
        self.check_lval(token, &lhs, DiagnosticKind::LvalueExpected)?;
        if lhs.ty.qualifier.is_const() {
            self.diagnostics
                .error(token.clone(), DiagnosticKind::CannotModifyConst)?;
        }

        if let Some(bitfield) = self.member_bitfield(&lhs) {
            return self.assign_to_bitfield(token, lhs, rhs, bitfield);
        }

        let ty = lhs.ty.clone();
        let rhs = self.make_cast(&ty, token, rhs, false)?;
        Ok(Expr::bin(BinOp::Assign, ty, token.clone(), lhs, rhs))
    }

    pub(super) fn calc_assign_with(
        &mut self,
        op: BinOp,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        match op {
            BinOp::Add | BinOp::Sub => self.new_addsub(op, token, lhs, rhs),
            BinOp::Mul | BinOp::Div => self.new_num_bop(op, token, lhs, rhs),
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                self.new_int_bop(op, token, lhs, rhs)
            }
            BinOp::LShift | BinOp::RShift => self.new_shift(op, token, lhs, rhs),
            _ => unreachable!("not a compound-assignment operator"),
        }
    }

    /// `lhs op= rhs` becomes `lhs = lhs op rhs`; a non-variable `lhs` is
    /// evaluated once through a temporary pointer:
    /// `(ptr = &lhs, *ptr = *ptr op rhs)`.
    pub fn transform_assign_with(
        &mut self,
        token: &Token,
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
    ) -> CompileResult<Expr> {
        let mut tmp_assign = None;
        let lhs = if matches!(lhs.kind, ExprKind::Variable { .. }) {
            lhs
        } else {
            if let Some(bitfield) = self.member_bitfield(&lhs) {
                return self.transform_assign_with_bitfield(token, op, lhs, rhs, bitfield);
            }

            let ptype = ptrof(&lhs.ty);
            debug_assert!(!self.current_scope().is_global());
            let ptr = self.alloc_tmp_var(self.current_scope(), ptype.clone());
            let lhs_ty = lhs.ty.clone();
            let lhs_token = lhs.token.clone();
            let refer = Expr::unary(UnOp::Ref, ptype.clone(), lhs_token.clone(), lhs);
            tmp_assign = Some(Expr::bin(
                BinOp::Assign,
                ptype,
                token.clone(),
                ptr.clone(),
                refer,
            ));
            Expr::unary(UnOp::Deref, lhs_ty, lhs_token, ptr)
        };

        let lhs_ty = lhs.ty.clone();
        let bop = self.calc_assign_with(op, token, lhs.clone(), rhs)?;
        let bop = self.make_cast(&lhs_ty, token, bop, false)?;
        let result = Expr::bin(BinOp::Assign, lhs_ty, token.clone(), lhs, bop);

        Ok(match tmp_assign {
            None => result,
            Some(tmp_assign) => {
                let ty = result.ty.clone();
                Expr::bin(BinOp::Comma, ty, token.clone(), tmp_assign, result)
            }
        })
    }

    //
    // Calls
    //

    /// Check and convert call arguments against the callee's parameter
    /// list, then build the call node; callees satisfying the inline
    /// criteria are expanded in place.
    pub fn new_funcall(
        &mut self,
        token: &Token,
        func: Expr,
        mut args: Vec<Expr>,
    ) -> CompileResult<Expr> {
        let functype = match &func.ty.kind {
            TypeKind::Func { .. } => Some(func.ty.clone()),
            TypeKind::Ptr { pointee } if pointee.is_func() => Some((**pointee).clone()),
            _ => None,
        };
        let Some(functype) = functype else {
            self.diagnostics
                .error(token.clone(), DiagnosticKind::NotCallable)?;
            return Ok(Expr::fixnum(Type::int(), token.clone(), 0));
        };
        let TypeKind::Func { ret, params, vaargs } = &functype.kind else {
            unreachable!();
        };
        let ret = (**ret).clone();
        let params = params.clone();
        let vaargs = *vaargs;

        if let Some(params) = &params {
            let argc = args.len();
            let paramc = params.len();
            if !(argc == paramc || (vaargs && argc >= paramc)) {
                let name = match &func.kind {
                    ExprKind::Variable { name, .. } => name.clone(),
                    _ => Name::new("(indirect)"),
                };
                self.diagnostics.error(
                    func.token.clone(),
                    DiagnosticKind::ArgumentCountMismatch {
                        name,
                        expected: paramc,
                        actual: argc,
                    },
                )?;
                let ty = ret;
                return Ok(Expr::call(ty, token.clone(), func, args));
            }
        }

        let paramc = params.as_ref().map(Vec::len).unwrap_or(0);
        for i in 0..args.len() {
            let mut arg = std::mem::replace(&mut args[i], Expr::fixnum(Type::int(), Token::default(), 0));
            arg = self.str_to_char_array_var(arg);
            if arg.ty.is_array() {
                let ty = array_to_ptr(&arg.ty);
                let arg_token = arg.token.clone();
                arg = self.make_cast(&ty, &arg_token, arg, false)?;
            }
            if let Some(params) = &params {
                if i < paramc {
                    let param_ty = params[i].clone();
                    self.ensure_struct(&param_ty, token)?;
                    let arg_token = arg.token.clone();
                    arg = self.make_cast(&param_ty, &arg_token, arg, false)?;

                    if let TypeKind::Struct { name } = &param_ty.kind {
                        if self
                            .unit
                            .structs
                            .lookup(name)
                            .map(|info| info.is_flexible)
                            .unwrap_or(false)
                        {
                            self.diagnostics.error(
                                arg.token.clone(),
                                DiagnosticKind::FlexibleArrayArgument,
                            )?;
                        }
                    }
                }
            }
            if vaargs && i >= paramc {
                // Default argument promotions for the variadic tail.
                match arg.ty.kind {
                    TypeKind::Fixnum { .. } => arg = self.promote_to_int(arg)?,
                    TypeKind::Flonum { kind } if kind < crate::FlonumKind::Double => {
                        let arg_token = arg.token.clone();
                        arg = self.make_cast(&Type::double(), &arg_token, arg, false)?;
                    }
                    _ => {}
                }
            }
            args[i] = arg;
        }

        // Inline expansion when the callee qualifies.
        if let ExprKind::Variable { name, scope } = &func.kind {
            if scope.is_global() && self.satisfies_inline_criteria(name) {
                let name = name.clone();
                let body = self.embed_inline_funcall(&name)?;
                return Ok(Expr::new(
                    ret,
                    token.clone(),
                    ExprKind::Inlined { name, args, body },
                ));
            }
        }

        Ok(Expr::call(ret, token.clone(), func, args))
    }

    //
    // Ternary
    //

    fn to_ptr_type(ty: &Type) -> Type {
        match &ty.kind {
            TypeKind::Array { .. } => array_to_ptr(ty),
            TypeKind::Func { .. } => ptrof(ty),
            _ => ty.clone(),
        }
    }

    fn choose_ternary_result_type(&self, tval: &Expr, fval: &Expr) -> Option<Type> {
        let ttype = &tval.ty;
        let ftype = &fval.ty;
        if ttype.is_void() || ftype.is_void() {
            return Some(Type::void());
        }

        let ttype = Self::to_ptr_type(ttype);
        let ftype = Self::to_ptr_type(ftype);
        if same_type(&ttype, &ftype) {
            return Some(ttype);
        }
        if ttype.is_ptr() {
            if ftype.is_ptr() {
                if ttype.is_void_ptr() {
                    return Some(ftype);
                }
                if ftype.is_void_ptr() || same_type_without_qualifier(&ttype, &ftype, true) {
                    return Some(ttype);
                }
                return None;
            }
            if can_cast(&ttype, &ftype, fval.is_zero(), false) {
                return Some(ttype);
            }
            return None;
        }
        if ftype.is_ptr() {
            return self.choose_ternary_result_type(fval, tval);
        }
        if ttype.is_number() && ftype.is_number() {
            if ttype.is_flonum() {
                return Some(ttype);
            }
            if ftype.is_flonum() {
                return Some(ftype);
            }
            let (tkind, _) = ttype.fixnum_kind().unwrap();
            let (fkind, _) = ftype.fixnum_kind().unwrap();
            return Some(if tkind.rank() > fkind.rank() { ttype } else { ftype });
        }
        None
    }

    pub fn new_ternary(
        &mut self,
        token: &Token,
        cond: Expr,
        tval: Expr,
        fval: Expr,
    ) -> CompileResult<Expr> {
        let cond = self.make_cond(cond)?;
        let Some(ty) = self.choose_ternary_result_type(&tval, &fval) else {
            self.diagnostics
                .error(token.clone(), DiagnosticKind::IncompatibleTernary)?;
            let ty = tval.ty.clone();
            return Ok(Expr::ternary(ty, token.clone(), cond, tval, fval));
        };
        let (tval, fval) = if ty.is_void() {
            (tval, fval)
        } else {
            let ttoken = tval.token.clone();
            let ftoken = fval.token.clone();
            (
                self.make_cast(&ty, &ttoken, tval, false)?,
                self.make_cast(&ty, &ftoken, fval, false)?,
            )
        };
        Ok(Expr::ternary(ty, token.clone(), cond, tval, fval))
    }

    //
    // Member access
    //

    /// Resolve `target.name` / `target->name`, descending through anonymous
    /// members. Returns the raw lvalue node; value reads of bit-field
    /// members go through `read_bitfield_member`.
    pub fn new_member(
        &mut self,
        token: &Token,
        target: Expr,
        name: &Name,
        arrow: bool,
    ) -> CompileResult<Expr> {
        let struct_ty = if arrow {
            target.ty.pointee().cloned().unwrap_or_else(|| target.ty.clone())
        } else {
            target.ty.clone()
        };
        self.ensure_struct(&struct_ty, token)?;
        let TypeKind::Struct { name: struct_name } = &struct_ty.kind else {
            self.diagnostics
                .error(token.clone(), DiagnosticKind::MemberNotFound { name: name.clone() })?;
            return Ok(target);
        };

        let Some(path) = self.search_member(struct_name, name) else {
            self.diagnostics
                .error(token.clone(), DiagnosticKind::MemberNotFound { name: name.clone() })?;
            return Ok(target);
        };

        let mut expr = target;
        let mut cur_struct = struct_name.clone();
        let mut arrow = arrow;
        for index in path {
            let info = self.unit.structs.lookup(&cur_struct).unwrap();
            let member = &info.members[index];
            let member_ty = member.ty.clone();
            if let TypeKind::Struct { name } = &member_ty.kind {
                cur_struct = name.clone();
            }
            expr = Expr::member(member_ty, token.clone(), expr, index, arrow);
            arrow = false;
        }
        Ok(expr)
    }

    /// Member-index path to `name`, descending anonymous struct members.
    fn search_member(&self, struct_name: &Name, name: &Name) -> Option<Vec<usize>> {
        let info = self.unit.structs.lookup(struct_name)?;
        for (i, member) in info.members.iter().enumerate() {
            match &member.name {
                Some(member_name) if member_name == name => return Some(vec![i]),
                Some(_) => {}
                None => {
                    if let TypeKind::Struct { name: inner } = &member.ty.kind {
                        if let Some(mut path) = self.search_member(inner, name) {
                            let mut full = vec![i];
                            full.append(&mut path);
                            return Some(full);
                        }
                    }
                }
            }
        }
        None
    }
}

fn compare<T: PartialOrd>(op: BinOp, l: &T, r: &T) -> bool {
    match op {
        BinOp::Eq => l == r,
        BinOp::Ne => l != r,
        BinOp::Lt => l < r,
        BinOp::Le => l <= r,
        BinOp::Ge => l >= r,
        BinOp::Gt => l > r,
        _ => unreachable!("not a comparison operator"),
    }
}
