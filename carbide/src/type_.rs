// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::Name;

/// Qualifier bitset carried by every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Qualifiers(u8);

impl Qualifiers {
    pub const NONE: Self = Self(0);
    pub const CONST: Self = Self(1 << 0);
    pub const VOLATILE: Self = Self(1 << 1);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn is_const(self) -> bool {
        self.contains(Self::CONST)
    }
}

/// Integer kinds, ordered by conversion rank. `Enum` ranks as `Int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixnumKind {
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Enum,
}

impl FixnumKind {
    /// Conversion rank; an enum behaves as `int`.
    #[must_use]
    pub const fn rank(self) -> u32 {
        match self {
            Self::Char => 0,
            Self::Short => 1,
            Self::Int | Self::Enum => 2,
            Self::Long => 3,
            Self::LongLong => 4,
        }
    }

    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Char => 1,
            Self::Short => 2,
            Self::Int | Self::Enum => 4,
            Self::Long | Self::LongLong => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlonumKind {
    Float,
    Double,
    /// Same representation as `double` on this implementation.
    LongDouble,
}

impl FlonumKind {
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Float => 4,
            Self::Double | Self::LongDouble => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Fixnum {
        kind: FixnumKind,
        unsigned: bool,
    },
    Flonum {
        kind: FlonumKind,
    },
    Ptr {
        pointee: Box<Type>,
    },
    Array {
        element: Box<Type>,
        /// `None` for an incomplete (flexible) array.
        length: Option<usize>,
    },
    /// Layout is resolved through the name-keyed struct registry; an
    /// unresolvable name is the incomplete-type state.
    Struct {
        name: Name,
    },
    Func {
        ret: Box<Type>,
        /// `None` when the declaration carries no parameter list.
        params: Option<Vec<Type>>,
        vaargs: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub kind: TypeKind,
    pub qualifier: Qualifiers,
}

impl Type {
    #[must_use]
    pub const fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            qualifier: Qualifiers::NONE,
        }
    }

    #[must_use]
    pub const fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    #[must_use]
    pub const fn fixnum(kind: FixnumKind, unsigned: bool) -> Self {
        Self::new(TypeKind::Fixnum { kind, unsigned })
    }

    #[must_use]
    pub const fn char_() -> Self {
        Self::fixnum(FixnumKind::Char, false)
    }

    #[must_use]
    pub const fn int() -> Self {
        Self::fixnum(FixnumKind::Int, false)
    }

    #[must_use]
    pub const fn unsigned_int() -> Self {
        Self::fixnum(FixnumKind::Int, true)
    }

    #[must_use]
    pub const fn long() -> Self {
        Self::fixnum(FixnumKind::Long, false)
    }

    /// The result type of comparisons and logical operators.
    #[must_use]
    pub const fn bool_() -> Self {
        Self::fixnum(FixnumKind::Int, false)
    }

    /// `size_t` of the target.
    #[must_use]
    pub const fn size_type() -> Self {
        Self::fixnum(FixnumKind::Long, true)
    }

    /// `ptrdiff_t` of the target.
    #[must_use]
    pub const fn ssize_type() -> Self {
        Self::fixnum(FixnumKind::Long, false)
    }

    #[must_use]
    pub const fn flonum(kind: FlonumKind) -> Self {
        Self::new(TypeKind::Flonum { kind })
    }

    #[must_use]
    pub const fn double() -> Self {
        Self::flonum(FlonumKind::Double)
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: Qualifiers) -> Self {
        self.qualifier = self.qualifier.union(qualifier);
        self
    }

    #[must_use]
    pub fn func(ret: Type, params: Option<Vec<Type>>, vaargs: bool) -> Self {
        Self::new(TypeKind::Func {
            ret: Box::new(ret),
            params,
            vaargs,
        })
    }

    #[must_use]
    pub fn struct_(name: Name) -> Self {
        Self::new(TypeKind::Struct { name })
    }

    #[must_use]
    pub fn array(element: Type, length: Option<usize>) -> Self {
        Self::new(TypeKind::Array {
            element: Box::new(element),
            length,
        })
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    #[must_use]
    pub fn is_fixnum(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { .. })
    }

    #[must_use]
    pub fn is_flonum(&self) -> bool {
        matches!(self.kind, TypeKind::Flonum { .. })
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        self.is_fixnum() || self.is_flonum()
    }

    #[must_use]
    pub fn is_ptr(&self) -> bool {
        matches!(self.kind, TypeKind::Ptr { .. })
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    #[must_use]
    pub fn is_func(&self) -> bool {
        matches!(self.kind, TypeKind::Func { .. })
    }

    #[must_use]
    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. })
    }

    #[must_use]
    pub fn ptr_or_array(&self) -> bool {
        self.is_ptr() || self.is_array()
    }

    /// Primitive means directly representable in a register.
    #[must_use]
    pub fn is_prim(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Fixnum { .. } | TypeKind::Flonum { .. } | TypeKind::Ptr { .. }
        )
    }

    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { unsigned: true, .. })
    }

    #[must_use]
    pub fn is_void_ptr(&self) -> bool {
        match &self.kind {
            TypeKind::Ptr { pointee } => pointee.is_void(),
            _ => false,
        }
    }

    #[must_use]
    pub fn fixnum_kind(&self) -> Option<(FixnumKind, bool)> {
        match self.kind {
            TypeKind::Fixnum { kind, unsigned } => Some((kind, unsigned)),
            _ => None,
        }
    }

    #[must_use]
    pub fn flonum_kind(&self) -> Option<FlonumKind> {
        match self.kind {
            TypeKind::Flonum { kind } => Some(kind),
            _ => None,
        }
    }

    /// The pointee of a pointer, or the element of an array.
    #[must_use]
    pub fn pointee(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Ptr { pointee } => Some(pointee),
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    #[must_use]
    pub fn func_ret(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Func { ret, .. } => Some(ret),
            _ => None,
        }
    }

    /// Size in bytes, for every kind whose size is layout-independent.
    /// Struct sizes go through the registry.
    #[must_use]
    pub fn fixed_size(&self) -> Option<usize> {
        match &self.kind {
            TypeKind::Void => Some(1),
            TypeKind::Fixnum { kind, .. } => Some(kind.size()),
            TypeKind::Flonum { kind } => Some(kind.size()),
            TypeKind::Ptr { .. } | TypeKind::Func { .. } => Some(POINTER_SIZE),
            TypeKind::Array { element, length } => {
                Some(element.fixed_size()? * length.unwrap_or(0))
            }
            TypeKind::Struct { .. } => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.qualifier.is_const() {
            f.write_str("const ")?;
        }
        match &self.kind {
            TypeKind::Void => f.write_str("void"),
            TypeKind::Fixnum { kind, unsigned } => {
                if *unsigned {
                    f.write_str("unsigned ")?;
                }
                match kind {
                    FixnumKind::Char => f.write_str("char"),
                    FixnumKind::Short => f.write_str("short"),
                    FixnumKind::Int => f.write_str("int"),
                    FixnumKind::Long => f.write_str("long"),
                    FixnumKind::LongLong => f.write_str("long long"),
                    FixnumKind::Enum => f.write_str("enum"),
                }
            }
            TypeKind::Flonum { kind } => match kind {
                FlonumKind::Float => f.write_str("float"),
                FlonumKind::Double => f.write_str("double"),
                FlonumKind::LongDouble => f.write_str("long double"),
            },
            TypeKind::Ptr { pointee } => write!(f, "{pointee}*"),
            TypeKind::Array { element, length } => match length {
                Some(length) => write!(f, "{element}[{length}]"),
                None => write!(f, "{element}[]"),
            },
            TypeKind::Struct { name } => write!(f, "struct {name}"),
            TypeKind::Func { ret, .. } => write!(f, "{ret}()"),
        }
    }
}

pub const POINTER_SIZE: usize = 8;

/// Minimum register width of the target, in bytes. Signed bit-field
/// extraction shifts within `max(backing size, MIN_REG_SIZE)` bytes.
pub const MIN_REG_SIZE: usize = 4;

pub const TARGET_CHAR_BIT: usize = 8;

#[must_use]
pub fn ptrof(ty: &Type) -> Type {
    Type::new(TypeKind::Ptr {
        pointee: Box::new(ty.clone()),
    })
}

/// Array-of-T decays to pointer-to-T; the element keeps its qualifiers.
#[must_use]
pub fn array_to_ptr(ty: &Type) -> Type {
    match &ty.kind {
        TypeKind::Array { element, .. } => ptrof(element),
        _ => ty.clone(),
    }
}

#[must_use]
pub fn get_fixnum_type(kind: FixnumKind, unsigned: bool, qualifier: Qualifiers) -> Type {
    Type::fixnum(kind, unsigned).with_qualifier(qualifier)
}

#[must_use]
pub fn same_type(a: &Type, b: &Type) -> bool {
    a.qualifier == b.qualifier && same_type_without_qualifier(a, b, false)
}

/// Structural equality ignoring top-level qualifiers; with `strip_all`,
/// qualifiers are ignored at every level (the rule used for pointer
/// arithmetic and comparison compatibility).
#[must_use]
pub fn same_type_without_qualifier(a: &Type, b: &Type, strip_all: bool) -> bool {
    match (&a.kind, &b.kind) {
        (TypeKind::Void, TypeKind::Void) => true,
        (
            TypeKind::Fixnum { kind: ka, unsigned: ua },
            TypeKind::Fixnum { kind: kb, unsigned: ub },
        ) => ka == kb && ua == ub,
        (TypeKind::Flonum { kind: ka }, TypeKind::Flonum { kind: kb }) => ka == kb,
        (TypeKind::Ptr { pointee: pa }, TypeKind::Ptr { pointee: pb }) => {
            if !strip_all && pa.qualifier != pb.qualifier {
                return false;
            }
            same_type_without_qualifier(pa, pb, strip_all)
        }
        (
            TypeKind::Array { element: ea, length: la },
            TypeKind::Array { element: eb, length: lb },
        ) => {
            la == lb
                && (strip_all || ea.qualifier == eb.qualifier)
                && same_type_without_qualifier(ea, eb, strip_all)
        }
        (TypeKind::Struct { name: na }, TypeKind::Struct { name: nb }) => na == nb,
        (
            TypeKind::Func { ret: ra, params: pa, vaargs: va },
            TypeKind::Func { ret: rb, params: pb, vaargs: vb },
        ) => {
            if va != vb || !same_type_without_qualifier(ra, rb, strip_all) {
                return false;
            }
            match (pa, pb) {
                (None, None) => true,
                (Some(pa), Some(pb)) => {
                    pa.len() == pb.len()
                        && pa
                            .iter()
                            .zip(pb)
                            .all(|(a, b)| same_type_without_qualifier(a, b, strip_all))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// The condensed cast legality table. `zero` marks a literal-zero source,
/// `is_explicit` a cast written in the source.
#[must_use]
pub fn can_cast(dst: &Type, src: &Type, zero: bool, is_explicit: bool) -> bool {
    if same_type_without_qualifier(dst, src, false) {
        return true;
    }
    match (&dst.kind, &src.kind) {
        // Anything can be discarded.
        (TypeKind::Void, _) => true,
        (_, TypeKind::Void) => false,
        // An array is never a destination type.
        (TypeKind::Array { .. }, _) => false,
        (TypeKind::Fixnum { .. }, TypeKind::Fixnum { .. } | TypeKind::Flonum { .. }) => true,
        (TypeKind::Fixnum { .. }, TypeKind::Ptr { .. }) => is_explicit,
        (TypeKind::Flonum { .. }, TypeKind::Fixnum { .. } | TypeKind::Flonum { .. }) => true,
        (TypeKind::Ptr { .. }, TypeKind::Fixnum { .. }) => is_explicit || zero,
        (TypeKind::Ptr { .. }, TypeKind::Ptr { .. }) => true,
        (TypeKind::Ptr { pointee }, TypeKind::Array { element, .. }) => {
            is_explicit
                || same_type_without_qualifier(pointee, element, true)
                || pointee.is_void()
        }
        (TypeKind::Ptr { pointee }, TypeKind::Func { .. }) => {
            same_type_without_qualifier(pointee, src, true) || pointee.is_void() || is_explicit
        }
        _ => false,
    }
}

/// Narrows `value` to `size` bytes under two's complement, re-extending by
/// the signedness of the destination.
#[must_use]
pub fn wrap_value(value: i64, size: usize, unsigned: bool) -> i64 {
    if size >= 8 {
        return value;
    }
    let bits = size * TARGET_CHAR_BIT;
    if unsigned {
        let mask = (1u64 << bits) - 1;
        (value as u64 & mask) as i64
    } else {
        let shift = 64 - bits;
        (value << shift) >> shift
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(200 + 100, 1, true, 44)]
    #[case(200 + 100, 1, false, 44)]
    #[case(-1, 1, true, 255)]
    #[case(255, 1, false, -1)]
    #[case(0x1_0000_0001, 4, false, 1)]
    #[case(0x8000_0000, 4, false, -0x8000_0000)]
    #[case(0x8000_0000, 4, true, 0x8000_0000)]
    #[case(-1, 8, true, -1)]
    fn test_wrap_value(
        #[case] value: i64,
        #[case] size: usize,
        #[case] unsigned: bool,
        #[case] expected: i64,
    ) {
        assert_eq!(wrap_value(value, size, unsigned), expected);
    }

    #[test]
    fn test_cast_table() {
        let void_ptr = ptrof(&Type::void());
        let int_ptr = ptrof(&Type::int());
        let arr = Type::array(Type::int(), Some(4));

        assert!(can_cast(&Type::int(), &Type::double(), false, false));
        assert!(can_cast(&void_ptr, &int_ptr, false, false));
        assert!(can_cast(&int_ptr, &Type::int(), true, false));
        assert!(!can_cast(&int_ptr, &Type::int(), false, false));
        assert!(can_cast(&int_ptr, &arr, false, false));
        assert!(!can_cast(&arr, &int_ptr, false, true));
        assert!(can_cast(&Type::void(), &Type::int(), false, false));
        assert!(!can_cast(&Type::int(), &Type::void(), false, true));
    }

    #[test]
    fn test_qualifier_stripped_equality() {
        let cip = ptrof(&Type::int().with_qualifier(Qualifiers::CONST));
        let ip = ptrof(&Type::int());
        assert!(!same_type(&cip, &ip));
        assert!(same_type_without_qualifier(&cip, &ip, true));
        assert!(!same_type_without_qualifier(&cip, &ip, false));
    }
}
