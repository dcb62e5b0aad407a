// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod basic_block;
mod instruction;
mod lower;
mod vreg;

pub use self::{
    basic_block::{BBContainer, BBId, BB},
    instruction::{CondKind, FrameSlotId, Ir, IrKind, PrecallId},
    lower::{FuncLowerer, TargetLowering},
    vreg::{VReg, VRegFlags, VRegId, VRegSize},
};

use carbide::{align_up, Name, Reach};

use crate::backend::RegisterAllocator;

/// Side-table entry of a `precall` marker: the size of the outgoing stack
/// argument area, and (after allocation) the caller-saved registers live
/// across the matching call.
#[derive(Debug, Clone, Default)]
pub struct PrecallInfo {
    pub stack_args_size: usize,
    pub living_pregs: u64,
}

/// A stack-frame slot of a local variable; the offset is frame-pointer
/// relative, assigned by `FuncBackend::layout_frame`.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    pub size: usize,
    pub align: usize,
    pub offset: i32,
}

/// Where an incoming parameter must end up after the prologue.
#[derive(Debug, Clone, Copy)]
pub enum ParamDest {
    Reg(VRegId),
    Slot(FrameSlotId),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    /// Index within its register class (integer or floating).
    pub index: usize,
    pub flonum: bool,
    pub size: VRegSize,
    pub dest: ParamDest,
}

/// Everything the back end accumulates for one function: the block graph,
/// the allocator state, frame layout, and the emission hints computed by
/// the front end.
#[derive(Debug)]
pub struct FuncBackend {
    pub name: Name,
    pub global: bool,
    pub bbcon: BBContainer,
    pub ra: RegisterAllocator,
    pub precalls: Vec<PrecallInfo>,
    pub frame_slots: Vec<FrameSlot>,
    pub frame_size: usize,
    pub params: Vec<ParamInfo>,
    pub body_reach: Reach,
    /// Control falls off the end into the epilogue.
    pub falls_to_epilogue: bool,
    pub has_funcall: bool,
    /// Body contains no statements besides inline asm.
    pub no_stmt: bool,
    /// Flonum literals to append to rodata.
    pub float_literals: Vec<(Name, f64, VRegSize)>,
}

impl FuncBackend {
    #[must_use]
    pub fn new(name: Name, global: bool) -> Self {
        Self {
            name,
            global,
            bbcon: BBContainer::new(),
            ra: RegisterAllocator::new(),
            precalls: Vec::new(),
            frame_slots: Vec::new(),
            frame_size: 0,
            params: Vec::new(),
            body_reach: Reach::NONE,
            falls_to_epilogue: true,
            has_funcall: false,
            no_stmt: true,
            float_literals: Vec::new(),
        }
    }

    pub fn add_frame_slot(&mut self, size: usize, align: usize) -> FrameSlotId {
        let id = FrameSlotId(self.frame_slots.len() as u32);
        self.frame_slots.push(FrameSlot {
            size,
            align,
            offset: 0,
        });
        // Locals in memory are addressed through the frame pointer; the
        // allocator must know before it hands registers out.
        self.ra
            .flags
            .insert(crate::backend::RaFlags::STACK_FRAME);
        id
    }

    #[must_use]
    pub fn frame_slot(&self, id: FrameSlotId) -> &FrameSlot {
        &self.frame_slots[id.0 as usize]
    }

    /// Assign frame-pointer-relative offsets to local slots and spilled
    /// registers, and settle the final frame size (16-byte aligned).
    pub fn layout_frame(&mut self) {
        let mut offset = 0i64;
        for slot in &mut self.frame_slots {
            offset -= slot.size.max(1) as i64;
            offset = -(align_up((-offset) as usize, slot.align.max(1)) as i64);
            slot.offset = offset as i32;
        }
        for id in self.ra.vreg_ids().collect::<Vec<_>>() {
            let vreg = self.ra.vreg(id);
            if !vreg.is_spilled() || vreg.frame_offset != 0 {
                continue;
            }
            let size = vreg.size.bytes();
            offset -= size as i64;
            offset = -(align_up((-offset) as usize, size) as i64);
            self.ra.vreg_mut(id).frame_offset = offset as i32;
        }
        self.frame_size = align_up((-offset) as usize, 16);
        if self.frame_size > 0 {
            self.ra
                .flags
                .insert(crate::backend::RaFlags::STACK_FRAME);
        }
    }
}
