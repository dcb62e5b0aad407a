// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::HashMap;

use crate::{FixnumKind, Name, Type, TypeKind, POINTER_SIZE};

/// Placement of a bit-field member inside its backing integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    pub base_kind: FixnumKind,
    pub position: u32,
    pub width: u32,
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// `None` for an anonymous struct/union member.
    pub name: Option<Name>,
    pub ty: Type,
    pub offset: usize,
    pub bitfield: Option<Bitfield>,
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub members: Vec<MemberInfo>,
    pub is_union: bool,
    pub size: usize,
    pub align: usize,
    /// Last member is a flexible array.
    pub is_flexible: bool,
}

/// A member declaration as handed over by the parser, before layout.
#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub name: Option<Name>,
    pub ty: Type,
    pub bitfield_width: Option<u32>,
}

impl MemberDecl {
    #[must_use]
    pub fn new(name: impl Into<Option<Name>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            bitfield_width: None,
        }
    }

    #[must_use]
    pub fn bitfield(name: impl Into<Option<Name>>, ty: Type, width: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            bitfield_width: Some(width),
        }
    }
}

/// Name-keyed registry of struct layouts. A `Type::Struct` only carries its
/// name; resolving it here is the `ensure_struct` step, and a missing entry
/// is the incomplete-type state.
#[derive(Debug, Default)]
pub struct StructRegistry {
    map: HashMap<Name, StructInfo>,
}

impl StructRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: Name, members: Vec<MemberDecl>, is_union: bool) -> &StructInfo {
        let info = self.layout(members, is_union);
        self.map.entry(name.clone()).or_insert(info);
        &self.map[&name]
    }

    #[must_use]
    pub fn lookup(&self, name: &Name) -> Option<&StructInfo> {
        self.map.get(name)
    }

    fn layout(&self, members: Vec<MemberDecl>, is_union: bool) -> StructInfo {
        let mut laid_out = Vec::with_capacity(members.len());
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut bit_cursor: Option<(usize, FixnumKind, u32)> = None; // (unit offset, kind, next bit)
        let mut is_flexible = false;

        let count = members.len();
        for (i, member) in members.into_iter().enumerate() {
            let member_align = self.align_of(&member.ty);
            max_align = max_align.max(member_align);

            if is_union {
                let size = self.size_of(&member.ty);
                offset = offset.max(size);
                laid_out.push(MemberInfo {
                    name: member.name,
                    ty: member.ty,
                    offset: 0,
                    bitfield: member.bitfield_width.map(|width| Bitfield {
                        base_kind: FixnumKind::Int,
                        position: 0,
                        width,
                    }),
                });
                continue;
            }

            if let Some(width) = member.bitfield_width {
                let (kind, _) = member
                    .ty
                    .fixnum_kind()
                    .expect("bit-field member must have integer type");
                let unit_bits = (kind.size() * 8) as u32;
                let fits = match bit_cursor {
                    Some((_, cur_kind, next_bit)) => {
                        width != 0 && cur_kind == kind && next_bit + width <= unit_bits
                    }
                    None => false,
                };
                if !fits {
                    // Start a fresh backing unit.
                    offset = align_up(offset, kind.size());
                    bit_cursor = Some((offset, kind, 0));
                    offset += kind.size();
                }
                let (unit_offset, _, next_bit) = bit_cursor.unwrap();
                laid_out.push(MemberInfo {
                    name: member.name,
                    ty: member.ty,
                    offset: unit_offset,
                    bitfield: Some(Bitfield {
                        base_kind: kind,
                        position: next_bit,
                        width,
                    }),
                });
                bit_cursor = Some((unit_offset, kind, next_bit + width));
                continue;
            }

            bit_cursor = None;
            let flexible = matches!(&member.ty.kind, TypeKind::Array { length: None, .. });
            if flexible && i == count - 1 {
                is_flexible = true;
            }
            offset = align_up(offset, member_align);
            let size = self.size_of(&member.ty);
            laid_out.push(MemberInfo {
                name: member.name,
                ty: member.ty,
                offset,
                bitfield: None,
            });
            offset += size;
        }

        StructInfo {
            members: laid_out,
            is_union,
            size: align_up(offset, max_align),
            align: max_align,
            is_flexible,
        }
    }

    /// Size in bytes. Unresolved structs report zero size; `ensure_struct`
    /// is expected to have run before sizes matter.
    #[must_use]
    pub fn size_of(&self, ty: &Type) -> usize {
        match &ty.kind {
            TypeKind::Struct { name } => self.lookup(name).map(|info| info.size).unwrap_or(0),
            TypeKind::Array { element, length } => {
                self.size_of(element) * length.unwrap_or(0)
            }
            TypeKind::Func { .. } => POINTER_SIZE,
            _ => ty.fixed_size().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn align_of(&self, ty: &Type) -> usize {
        match &ty.kind {
            TypeKind::Struct { name } => self.lookup(name).map(|info| info.align).unwrap_or(1),
            TypeKind::Array { element, .. } => self.align_of(element),
            _ => ty.fixed_size().unwrap_or(1).max(1),
        }
    }
}

#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
