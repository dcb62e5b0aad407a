// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    get_fixnum_type, ptrof, BinOp, Bitfield, CompileResult, DiagnosticKind, Expr, ExprKind,
    Qualifiers, Token, Type, TypeKind, UnOp, MIN_REG_SIZE, TARGET_CHAR_BIT,
};

use super::Elaborator;

/// A resolved bit-field member: its placement plus its declared type.
#[derive(Debug, Clone)]
pub struct BitfieldMember {
    pub bitfield: Bitfield,
    pub ty: Type,
}

impl Elaborator {
    /// The bit-field info behind a member-access node, if the member is one.
    #[must_use]
    pub fn member_bitfield(&self, expr: &Expr) -> Option<BitfieldMember> {
        let ExprKind::Member { target, index, arrow } = &expr.kind else {
            return None;
        };
        let struct_ty = if *arrow { target.ty.pointee()? } else { &target.ty };
        let TypeKind::Struct { name } = &struct_ty.kind else {
            return None;
        };
        let info = self.unit.structs.lookup(name)?;
        let member = info.members.get(*index)?;
        member.bitfield.map(|bitfield| BitfieldMember {
            bitfield,
            ty: member.ty.clone(),
        })
    }

    /// `sizeof` cannot apply to a bit-field member.
    pub fn not_bitfield_member(&mut self, expr: &Expr) -> CompileResult<()> {
        if self.member_bitfield(expr).is_some() {
            self.diagnostics
                .error(expr.token.clone(), DiagnosticKind::BitfieldSize)?;
        }
        Ok(())
    }

    /// Value read of a bit-field member: load the backing integer, then
    /// shift and mask the field out of it.
    pub fn read_bitfield_member(&mut self, member: Expr) -> CompileResult<Expr> {
        let Some(bm) = self.member_bitfield(&member) else {
            return Ok(member);
        };
        let backing = get_fixnum_type(bm.bitfield.base_kind, bm.ty.is_unsigned(), Qualifiers::NONE);
        let mut src = member;
        src.ty = backing;
        self.extract_bitfield_value(src, &bm)
    }

    /// Shift/mask extraction out of `src` (typed as the backing integer).
    /// Signed fields sign-extend with a shift pair sized to the target's
    /// minimum register width.
    pub(super) fn extract_bitfield_value(
        &mut self,
        src: Expr,
        bm: &BitfieldMember,
    ) -> CompileResult<Expr> {
        let bitfield = bm.bitfield;
        let ty = src.ty.clone();
        let token = src.token.clone();
        let mut tmp = src;

        if ty.is_unsigned() {
            if bitfield.position > 0 {
                let shift = Expr::fixnum(ty.clone(), token.clone(), i64::from(bitfield.position));
                tmp = Expr::bin(BinOp::RShift, ty.clone(), token.clone(), tmp, shift);
            }
            let mask = ((1u64 << bitfield.width) - 1) as i64;
            let mask = Expr::fixnum(ty.clone(), token.clone(), mask);
            tmp = Expr::bin(BinOp::BitAnd, ty.clone(), token.clone(), tmp, mask);
        } else {
            let size = ty.fixed_size().unwrap_or(MIN_REG_SIZE).max(MIN_REG_SIZE);
            let w = (size * TARGET_CHAR_BIT) as u32;
            let l = w - (bitfield.position + bitfield.width);
            if l > 0 {
                let shift = Expr::fixnum(ty.clone(), token.clone(), i64::from(l));
                tmp = Expr::bin(BinOp::LShift, ty.clone(), token.clone(), tmp, shift);
            }
            if bitfield.width < w {
                let shift = Expr::fixnum(ty.clone(), token.clone(), i64::from(w - bitfield.width));
                tmp = Expr::bin(BinOp::RShift, ty.clone(), token.clone(), tmp, shift);
            }
        }
        self.make_cast(&bm.ty.clone(), &token, tmp, false)
    }

    /// `*dst = (src & ~(mask << pos)) | ((val & mask) << pos)`.
    fn assign_bitfield_member(
        &mut self,
        token: &Token,
        dst: Expr,
        src: Expr,
        val: Expr,
        bm: &BitfieldMember,
    ) -> CompileResult<Expr> {
        let bitfield = bm.bitfield;
        let ty = dst.ty.clone();
        let vtype = val.ty.clone();

        let mask = ((1u64 << bitfield.width) - 1) as i64;
        let mut val_masked = Expr::bin(
            BinOp::BitAnd,
            vtype.clone(),
            token.clone(),
            val,
            Expr::fixnum(vtype.clone(), token.clone(), mask),
        );
        val_masked = self.make_cast(&ty, token, val_masked, false)?;
        if bitfield.position > 0 {
            val_masked = Expr::bin(
                BinOp::LShift,
                ty.clone(),
                token.clone(),
                val_masked,
                Expr::fixnum(vtype, token.clone(), i64::from(bitfield.position)),
            );
        }
        let val_masked = self.make_cast(&ty, token, val_masked, false)?;

        let clear = !(mask << bitfield.position);
        let src_masked = Expr::bin(
            BinOp::BitAnd,
            ty.clone(),
            token.clone(),
            src,
            Expr::fixnum(ty.clone(), token.clone(), clear),
        );
        let combined = Expr::bin(BinOp::BitOr, ty.clone(), token.clone(), val_masked, src_masked);
        Ok(Expr::bin(BinOp::Assign, ty, token.clone(), dst, combined))
    }

    /// Assignment to a bit-field member expands to
    /// `(ptr = &lhs, val = rhs,
    ///   *ptr = (*ptr & ~(mask << pos)) | ((val & mask) << pos), val)`.
    pub fn assign_to_bitfield(
        &mut self,
        token: &Token,
        lhs: Expr,
        rhs: Expr,
        bm: BitfieldMember,
    ) -> CompileResult<Expr> {
        let ty = get_fixnum_type(bm.bitfield.base_kind, bm.ty.is_unsigned(), Qualifiers::NONE);
        let ptype = ptrof(&ty);
        debug_assert!(!self.current_scope().is_global());

        let ptr = self.alloc_tmp_var(self.current_scope(), ptype.clone());
        let refer = Expr::unary(UnOp::Ref, ptype.clone(), lhs.token.clone(), lhs);
        let ptr_assign = Expr::bin(BinOp::Assign, ptype, token.clone(), ptr.clone(), refer);

        let vtype = rhs.ty.clone();
        let val = self.alloc_tmp_var(self.current_scope(), vtype.clone());
        let val_assign = Expr::bin(BinOp::Assign, vtype.clone(), token.clone(), val.clone(), rhs);

        let dst = Expr::unary(UnOp::Deref, ty, token.clone(), ptr);
        let assign = self.assign_bitfield_member(token, dst.clone(), dst, val.clone(), &bm)?;

        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), assign, val);
        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), val_assign, inner);
        Ok(Expr::bin(BinOp::Comma, vtype, token.clone(), ptr_assign, inner))
    }

    /// Compound assignment to a bit-field: read-modify-write through a
    /// temporary pointer, yielding the stored field value.
    pub(super) fn transform_assign_with_bitfield(
        &mut self,
        token: &Token,
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
        bm: BitfieldMember,
    ) -> CompileResult<Expr> {
        let ty = get_fixnum_type(bm.bitfield.base_kind, lhs.ty.is_unsigned(), Qualifiers::NONE);
        let ptype = ptrof(&ty);
        debug_assert!(!self.current_scope().is_global());

        let ptr = self.alloc_tmp_var(self.current_scope(), ptype.clone());
        let refer = Expr::unary(UnOp::Ref, ptype.clone(), lhs.token.clone(), lhs);
        let ptr_assign = Expr::bin(BinOp::Assign, ptype, token.clone(), ptr.clone(), refer);
        let dst = Expr::unary(UnOp::Deref, ty.clone(), token.clone(), ptr);

        let src = self.alloc_tmp_var(self.current_scope(), ty.clone());
        let src_assign = Expr::bin(BinOp::Assign, ty, token.clone(), src.clone(), dst.clone());

        let tmp = self.extract_bitfield_value(src.clone(), &bm)?;
        let tmp = self.calc_assign_with(op, token, tmp, rhs.clone())?;
        let store = self.assign_bitfield_member(token, dst.clone(), src, tmp, &bm)?;

        let vtype = rhs.ty;
        let result_value = self.extract_bitfield_value(dst, &bm)?;
        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), src_assign, store);
        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), ptr_assign, inner);
        Ok(Expr::bin(BinOp::Comma, vtype, token.clone(), inner, result_value))
    }

    /// Inc/dec of a bit-field member; the overall value is the new (pre) or
    /// old (post) field value.
    pub(super) fn transform_incdec_of_bitfield(
        &mut self,
        op: UnOp,
        target: Expr,
        token: &Token,
        bm: BitfieldMember,
    ) -> CompileResult<Expr> {
        let dec = op.is_dec();
        let post = op.is_post();
        let arith = if dec { BinOp::Sub } else { BinOp::Add };

        let ty = get_fixnum_type(bm.bitfield.base_kind, target.ty.is_unsigned(), Qualifiers::NONE);
        let ptype = ptrof(&ty);
        debug_assert!(!self.current_scope().is_global());

        let ptr = self.alloc_tmp_var(self.current_scope(), ptype.clone());
        let refer = Expr::unary(UnOp::Ref, ptype.clone(), target.token.clone(), target);
        let ptr_assign = Expr::bin(BinOp::Assign, ptype, token.clone(), ptr.clone(), refer);
        let dst = Expr::unary(UnOp::Deref, ty.clone(), token.clone(), ptr);

        let src = self.alloc_tmp_var(self.current_scope(), ty.clone());
        let src_assign = Expr::bin(
            BinOp::Assign,
            ty.clone(),
            token.clone(),
            src.clone(),
            dst.clone(),
        );

        let vtype = bm.ty.clone();
        let val = self.alloc_tmp_var(self.current_scope(), vtype.clone());

        let (val_assign, after) = if post {
            let before = self.extract_bitfield_value(src.clone(), &bm)?;
            let val_assign = Expr::bin(
                BinOp::Assign,
                ty.clone(),
                token.clone(),
                val.clone(),
                before.clone(),
            );
            let one = Expr::fixnum(ty.clone(), token.clone(), 1);
            let after = Expr::bin(arith, ty.clone(), token.clone(), before, one);
            (val_assign, after)
        } else {
            let step = Expr::fixnum(
                ty.clone(),
                token.clone(),
                1i64 << bm.bitfield.position,
            );
            let bumped = Expr::bin(arith, ty.clone(), token.clone(), src.clone(), step);
            let extracted = self.extract_bitfield_value(bumped, &bm)?;
            let val_assign = Expr::bin(
                BinOp::Assign,
                ty.clone(),
                token.clone(),
                val.clone(),
                extracted,
            );
            (val_assign, val.clone())
        };

        let store = self.assign_bitfield_member(token, dst, src, after, &bm)?;

        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), val_assign, store);
        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), src_assign, inner);
        let inner = Expr::bin(BinOp::Comma, vtype.clone(), token.clone(), ptr_assign, inner);
        Ok(Expr::bin(BinOp::Comma, vtype, token.clone(), inner, val))
    }
}
