// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use carbide::{
    BinOp, CompileResult, DiagnosticKind, DiagnosticsList, Expr, ExprKind, FixnumKind, Initializer,
    Name, Storage, StructInfo, TranslationUnit, Type, TypeKind, UnOp, VarInfo,
};

use super::AsmOutput;

/// Encodes global variables into .rodata/.data/.bss directives, descending
/// initializer trees: arrays element-wise, structs member-wise with
/// alignment padding, unions by their first initialized member, bit-fields
/// coalesced per backing integer, and string literals as escaped bytes.
pub struct DataEmitter<'a> {
    unit: &'a TranslationUnit,
    diagnostics: &'a mut DiagnosticsList,
    lines: Vec<String>,
}

impl<'a> DataEmitter<'a> {
    pub fn emit_globals(
        unit: &'a TranslationUnit,
        extra_globals: &[VarInfo],
        diagnostics: &'a mut DiagnosticsList,
        out: &mut AsmOutput,
    ) -> CompileResult<()> {
        let mut emitter = Self {
            unit,
            diagnostics,
            lines: Vec::new(),
        };
        for var in unit.scopes.globals() {
            emitter.emit_one(var, out)?;
        }
        for var in extra_globals {
            emitter.emit_one(var, out)?;
        }
        Ok(())
    }

    fn emit_one(&mut self, var: &VarInfo, out: &mut AsmOutput) -> CompileResult<()> {
        if var.storage.contains(Storage::EXTERN)
            || var.storage.contains(Storage::ENUM_MEMBER)
            || var.ty.is_func()
            || var.func.is_some()
        {
            return Ok(());
        }
        self.lines.clear();
        self.emit_varinfo(var)?;
        let lines = std::mem::take(&mut self.lines);
        match &var.init {
            None => out.bss.extend(lines),
            Some(_) if var.ty.qualifier.is_const() => out.rodata.extend(lines),
            Some(_) => out.data.extend(lines),
        }
        Ok(())
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn emit_varinfo(&mut self, var: &VarInfo) -> CompileResult<()> {
        let label = &var.name;
        if var.storage.contains(Storage::STATIC) {
            self.push(format!("\t.local\t{label}"));
        } else {
            self.push(format!("\t.globl\t{label}"));
        }

        let align = self.unit.structs.align_of(&var.ty).max(1);
        match &var.init {
            Some(init) => {
                self.push(format!("\t.p2align\t{}", align.trailing_zeros()));
                self.push(format!("{label}:"));
                let init = init.clone();
                self.construct_initial_value(&var.ty, Some(&init))?;
            }
            None => {
                let size = self.unit.structs.size_of(&var.ty).max(1);
                self.push(format!("\t.p2align\t{}", align.trailing_zeros()));
                self.push(format!("{label}:"));
                self.push(format!("\t.zero\t{size}"));
            }
        }
        Ok(())
    }

    fn fixnum_directive(kind: FixnumKind) -> &'static str {
        match kind {
            FixnumKind::Char => ".byte",
            FixnumKind::Short => ".half",
            FixnumKind::Int | FixnumKind::Enum => ".word",
            FixnumKind::Long | FixnumKind::LongLong => ".quad",
        }
    }

    fn construct_initial_value(
        &mut self,
        ty: &Type,
        init: Option<&Initializer>,
    ) -> CompileResult<()> {
        match &ty.kind {
            TypeKind::Flonum { kind } => {
                let mut value = 0.0f64;
                if let Some(init) = init {
                    match init {
                        Initializer::Single(expr) => match expr.kind {
                            ExprKind::Flonum(v) => value = v,
                            ExprKind::Fixnum(v) => value = v as f64,
                            _ => {
                                self.diagnostics.error(
                                    expr.token.clone(),
                                    DiagnosticKind::IllegalInitializer,
                                )?;
                            }
                        },
                        Initializer::Multi(_) => {
                            self.diagnostics
                                .error(None, DiagnosticKind::IllegalInitializer)?;
                        }
                    }
                }
                if matches!(kind, carbide::FlonumKind::Float) {
                    self.push(format!("\t.word\t{:#010x}", (value as f32).to_bits()));
                } else {
                    self.push(format!("\t.quad\t{:#018x}", value.to_bits()));
                }
            }

            TypeKind::Fixnum { .. } | TypeKind::Ptr { .. } => {
                let mut var = None;
                let mut offset = 0i64;
                if let Some(Initializer::Single(expr)) = init {
                    self.eval_initial_value(expr, &mut var, &mut offset)?;
                } else if init.is_some() {
                    self.diagnostics
                        .error(None, DiagnosticKind::IllegalInitializer)?;
                }
                let output = match var {
                    None => format!("{offset}"),
                    Some(label) if offset == 0 => format!("{label}"),
                    Some(label) => format!("{label} + {offset}"),
                };
                let directive = match &ty.kind {
                    TypeKind::Ptr { .. } => ".quad",
                    TypeKind::Fixnum { kind, .. } => Self::fixnum_directive(*kind),
                    _ => unreachable!(),
                };
                self.push(format!("\t{directive}\t{output}"));
            }

            TypeKind::Array { element, length } => {
                if let Some(Initializer::Single(expr)) = init {
                    if let ExprKind::Str(bytes) = &expr.kind {
                        let total = length.unwrap_or(bytes.len());
                        let used = bytes.len().min(total);
                        let mut escaped = escape_string(&bytes[..used]);
                        for _ in used..total {
                            escaped.push_str("\\000");
                        }
                        self.push(format!("\t.ascii\t\"{escaped}\""));
                        return Ok(());
                    }
                    self.diagnostics
                        .error(expr.token.clone(), DiagnosticKind::IllegalInitializer)?;
                    return Ok(());
                }

                let elems: &[Option<Initializer>] = match init {
                    Some(Initializer::Multi(elems)) => elems,
                    _ => &[],
                };
                let mut index = 0usize;
                for elem in elems {
                    self.construct_initial_value(element, elem.as_ref())?;
                    index += 1;
                }
                for _ in index..length.unwrap_or(index) {
                    self.construct_initial_value(element, None)?;
                }
            }

            TypeKind::Struct { name } => {
                let Some(info) = self.unit.structs.lookup(name) else {
                    self.diagnostics
                        .error(None, DiagnosticKind::IncompleteStruct { name: name.clone() })?;
                    return Ok(());
                };
                let info = info.clone();
                self.construct_struct_value(&info, init)?;
            }

            TypeKind::Func { .. } | TypeKind::Void => {
                self.diagnostics
                    .error(None, DiagnosticKind::IllegalInitializer)?;
            }
        }
        Ok(())
    }

    fn construct_struct_value(
        &mut self,
        info: &StructInfo,
        init: Option<&Initializer>,
    ) -> CompileResult<()> {
        let members = match init {
            Some(Initializer::Multi(members)) => Some(members),
            Some(Initializer::Single(expr)) => {
                self.diagnostics
                    .error(expr.token.clone(), DiagnosticKind::IllegalInitializer)?;
                None
            }
            None => None,
        };

        let mut count = 0usize;
        let mut offset = 0usize;
        let mut i = 0usize;
        while i < info.members.len() {
            let member = &info.members[i];
            if member.bitfield.is_some() {
                i = self.construct_bitfield_value(info, members, i, &mut offset)?;
                count += 1;
                continue;
            }

            let member_init = match members {
                None => {
                    if info.is_union {
                        i += 1;
                        continue;
                    }
                    None
                }
                Some(members) => members.get(i).and_then(|m| m.as_ref()),
            };
            if member_init.is_some() || !info.is_union {
                let align = self.unit.structs.align_of(&member.ty);
                if offset % align != 0 {
                    self.push(format!("\t.p2align\t{}", align.trailing_zeros()));
                    offset = carbide::align_up(offset, align);
                }
                let member_ty = member.ty.clone();
                self.construct_initial_value(&member_ty, member_init)?;
                count += 1;
                offset += self.unit.structs.size_of(&member_ty);
            }
            i += 1;
        }

        if info.is_union && count == 0 {
            if let Some(member) = info.members.first() {
                let member_ty = member.ty.clone();
                self.construct_initial_value(&member_ty, None)?;
                offset += self.unit.structs.size_of(&member_ty);
            }
        }

        // Trailing padding up to the full struct size.
        if info.size > offset {
            let d = info.size - offset;
            match d {
                1 => self.push("\t.byte\t0"),
                2 => self.push("\t.half\t0"),
                4 => self.push("\t.word\t0"),
                8 => self.push("\t.quad\t0"),
                _ => self.push(format!("\t.zero\t{d}")),
            }
        }
        Ok(())
    }

    /// Coalesce the run of bit-field members sharing one backing integer
    /// into a single constant, and emit it with the backing directive.
    fn construct_bitfield_value(
        &mut self,
        info: &StructInfo,
        members: Option<&Vec<Option<Initializer>>>,
        start: usize,
        offset: &mut usize,
    ) -> CompileResult<usize> {
        let first = &info.members[start];
        let bitfield = first.bitfield.unwrap();
        let base_kind = bitfield.base_kind;
        let unit_offset = first.offset;
        let unit_size = base_kind.size();

        if *offset % unit_size != 0 {
            self.push(format!("\t.p2align\t{}", unit_size.trailing_zeros()));
            *offset = carbide::align_up(*offset, unit_size);
        }

        let mut x = 0i64;
        let mut i = start;
        while i < info.members.len() {
            let member = &info.members[i];
            let Some(bf) = member.bitfield else { break };
            if member.offset != unit_offset {
                break;
            }
            let value = match members.and_then(|m| m.get(i)).and_then(|m| m.as_ref()) {
                Some(Initializer::Single(expr)) => match expr.kind {
                    ExprKind::Fixnum(v) => v,
                    _ => {
                        self.diagnostics
                            .error(expr.token.clone(), DiagnosticKind::IllegalInitializer)?;
                        0
                    }
                },
                Some(Initializer::Multi(_)) => {
                    self.diagnostics
                        .error(None, DiagnosticKind::IllegalInitializer)?;
                    0
                }
                None => 0,
            };
            let mask = (1i64 << bf.width) - 1;
            x |= (value & mask) << bf.position;
            i += 1;
        }

        self.push(format!("\t{}\t{x}", Self::fixnum_directive(base_kind)));
        *offset += unit_size;
        Ok(i)
    }

    /// Reduce a constant address expression to `label + offset` form.
    fn eval_initial_value(
        &mut self,
        expr: &Expr,
        var: &mut Option<Name>,
        offset: &mut i64,
    ) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Fixnum(v) => *offset = *v,
            ExprKind::Variable { name, scope } => {
                debug_assert!(var.is_none());
                let label = match self.unit.scopes.find_var(*scope, name) {
                    Some((owner, info)) if !owner.is_global() => {
                        // Local statics relocate against their global twin.
                        info.static_gvar.clone().unwrap_or_else(|| name.clone())
                    }
                    _ => name.clone(),
                };
                *var = Some(label);
            }
            ExprKind::Bin { op, lhs, rhs } if matches!(op, BinOp::Add | BinOp::Sub) => {
                let mut var1 = None;
                let mut var2 = None;
                let mut offset1 = 0i64;
                let mut offset2 = 0i64;
                self.eval_initial_value(lhs, &mut var1, &mut offset1)?;
                self.eval_initial_value(rhs, &mut var2, &mut offset2)?;
                if let Some(v) = var1 {
                    *var = Some(v);
                } else if let Some(v) = var2 {
                    debug_assert!(matches!(op, BinOp::Add));
                    *var = Some(v);
                }
                if matches!(op, BinOp::Sub) {
                    offset2 = -offset2;
                }
                *offset = offset1 + offset2;
            }
            ExprKind::Bin { op: op @ (BinOp::PtrAdd | BinOp::PtrSub), lhs, rhs } => {
                let op = *op;
                let mut var1 = None;
                let mut offset1 = 0i64;
                let mut offset2 = 0i64;
                self.eval_initial_value(lhs, &mut var1, &mut offset1)?;
                let mut none = None;
                self.eval_initial_value(rhs, &mut none, &mut offset2)?;
                let scale = self
                    .unit
                    .structs
                    .size_of(expr.ty.pointee().unwrap_or(&Type::char_()))
                    as i64;
                if op == BinOp::PtrSub {
                    offset2 = -offset2;
                }
                *var = var1;
                *offset = offset1 + offset2 * scale;
            }
            ExprKind::Unary {
                op: UnOp::Ref | UnOp::Deref | UnOp::Cast | UnOp::Group,
                sub,
            } => {
                self.eval_initial_value(sub, var, offset)?;
            }
            ExprKind::Member { target, index, .. } => {
                self.eval_initial_value(target, var, offset)?;
                let struct_ty = if target.ty.is_ptr() || target.ty.is_array() {
                    target.ty.pointee().cloned()
                } else {
                    Some(target.ty.clone())
                };
                if let Some(TypeKind::Struct { name }) = struct_ty.map(|t| t.kind) {
                    if let Some(info) = self.unit.structs.lookup(&name) {
                        *offset += info.members[*index].offset as i64;
                    }
                }
            }
            ExprKind::CompoundLiteral { var: lit_var, .. } => {
                self.eval_initial_value(lit_var, var, offset)?;
            }
            _ => {
                self.diagnostics
                    .error(expr.token.clone(), DiagnosticKind::IllegalInitializer)?;
            }
        }
        Ok(())
    }
}

/// Escape bytes for an `.ascii` directive.
#[must_use]
pub fn escape_string(bytes: &[u8]) -> String {
    let mut result = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => result.push_str("\\\""),
            b'\\' => result.push_str("\\\\"),
            b'\n' => result.push_str("\\n"),
            b'\t' => result.push_str("\\t"),
            b'\r' => result.push_str("\\r"),
            0x20..=0x7e => result.push(b as char),
            _ => result.push_str(&format!("\\{:03o}", b)),
        }
    }
    result
}
