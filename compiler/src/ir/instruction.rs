// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use carbide::Name;

use super::{BBId, VRegId};

/// Branch/compare condition. The unsigned variants order by magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    /// Unconditional.
    Any,
    /// Never taken; produced when a conditional jump folds away.
    None,
    Eq,
    Ne,
    Lt,
    Le,
    Ge,
    Gt,
    ULt,
    ULe,
    UGe,
    UGt,
}

impl CondKind {
    /// Mirror the condition when the operands are swapped.
    #[must_use]
    pub const fn swap(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Ge => Self::Le,
            Self::Gt => Self::Lt,
            Self::ULt => Self::UGt,
            Self::ULe => Self::UGe,
            Self::UGe => Self::ULe,
            Self::UGt => Self::ULt,
            other => other,
        }
    }

    /// Logical negation.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Self::Any => Self::None,
            Self::None => Self::Any,
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::ULt => Self::UGe,
            Self::ULe => Self::UGt,
            Self::UGe => Self::ULt,
            Self::UGt => Self::ULe,
        }
    }

    /// The magnitude-ordered variant of an ordering condition.
    #[must_use]
    pub const fn to_unsigned(self) -> Self {
        match self {
            Self::Lt => Self::ULt,
            Self::Le => Self::ULe,
            Self::Ge => Self::UGe,
            Self::Gt => Self::UGt,
            other => other,
        }
    }

    #[must_use]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::ULt | Self::ULe | Self::UGe | Self::UGt)
    }
}

/// Index of a local variable's stack-frame slot; offsets are assigned once
/// the frame is laid out after register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlotId(pub u32);

/// Index into the per-function precall side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrecallId(pub u32);

#[derive(Debug, Clone)]
pub enum IrKind {
    /// Frame-base offset of a local variable.
    Bofs { slot: FrameSlotId },
    /// Address of a labeled (global/static) symbol.
    Iofs { label: Name, global: bool },
    /// Stack-pointer offset into the outgoing argument area; opr1 holds
    /// the constant byte offset.
    Sofs,
    Load,
    /// Load through the frame pointer from a spilled register.
    LoadSpilled,
    Store,
    /// Store through the frame pointer into a spilled register.
    StoreSpilled,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    /// Scaled pointer arithmetic: `dst = opr1 + opr2 * scale + offset`.
    PtrAdd { scale: usize, offset: i64 },
    Neg,
    BitNot,
    /// Materialize a condition over (opr1, opr2) into dst.
    Cond { cond: CondKind },
    Jmp { cond: CondKind, bb: BBId },
    /// Table jump through rodata; opr1 is the index.
    TJmp { bbs: Vec<BBId> },
    Precall { precall: PrecallId },
    /// Move a register argument into parameter position `index` of its
    /// register class; `fp_as_gp` packs a variadic flonum into an integer
    /// register instead.
    PushArg { index: usize, fp_as_gp: bool },
    Call {
        label: Option<Name>,
        global: bool,
        precall: PrecallId,
        reg_arg_count: usize,
    },
    /// Route opr1 into the return register (or dst when present).
    Result,
    /// Adjust the stack pointer downwards by opr1.
    SubSp,
    Cast,
    Mov,
    /// Copy `size` bytes from the address in opr2 to the address in opr1.
    Memcpy { size: usize },
    Asm { text: String },
}

/// One three-address instruction: an opcode with up to two sources, one
/// destination, and opcode-specific payload.
#[derive(Debug, Clone)]
pub struct Ir {
    pub kind: IrKind,
    pub dst: Option<VRegId>,
    pub opr1: Option<VRegId>,
    pub opr2: Option<VRegId>,
    /// Unsigned flavor for loads, divisions, shifts and casts.
    pub unsigned: bool,
}

impl Ir {
    #[must_use]
    pub fn new(kind: IrKind) -> Self {
        Self {
            kind,
            dst: None,
            opr1: None,
            opr2: None,
            unsigned: false,
        }
    }

    #[must_use]
    pub fn with_dst(mut self, dst: VRegId) -> Self {
        self.dst = Some(dst);
        self
    }

    #[must_use]
    pub fn with_opr1(mut self, opr1: VRegId) -> Self {
        self.opr1 = Some(opr1);
        self
    }

    #[must_use]
    pub fn with_opr2(mut self, opr2: VRegId) -> Self {
        self.opr2 = Some(opr2);
        self
    }

    #[must_use]
    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }

    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.kind, IrKind::Call { .. })
    }
}

impl Display for Ir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.kind {
            IrKind::Bofs { .. } => "bofs",
            IrKind::Iofs { .. } => "iofs",
            IrKind::Sofs => "sofs",
            IrKind::Load => "load",
            IrKind::LoadSpilled => "load_s",
            IrKind::Store => "store",
            IrKind::StoreSpilled => "store_s",
            IrKind::Add => "add",
            IrKind::Sub => "sub",
            IrKind::Mul => "mul",
            IrKind::Div => "div",
            IrKind::Mod => "mod",
            IrKind::BitAnd => "bitand",
            IrKind::BitOr => "bitor",
            IrKind::BitXor => "bitxor",
            IrKind::LShift => "lshift",
            IrKind::RShift => "rshift",
            IrKind::PtrAdd { .. } => "ptradd",
            IrKind::Neg => "neg",
            IrKind::BitNot => "bitnot",
            IrKind::Cond { .. } => "cond",
            IrKind::Jmp { .. } => "jmp",
            IrKind::TJmp { .. } => "tjmp",
            IrKind::Precall { .. } => "precall",
            IrKind::PushArg { .. } => "pusharg",
            IrKind::Call { .. } => "call",
            IrKind::Result => "result",
            IrKind::SubSp => "subsp",
            IrKind::Cast => "cast",
            IrKind::Mov => "mov",
            IrKind::Memcpy { .. } => "memcpy",
            IrKind::Asm { .. } => "asm",
        };
        write!(f, "{name}")?;
        if let Some(dst) = self.dst {
            write!(f, " {dst}")?;
        }
        if let Some(opr1) = self.opr1 {
            write!(f, " {opr1}")?;
        }
        if let Some(opr2) = self.opr2 {
            write!(f, " {opr2}")?;
        }
        Ok(())
    }
}
