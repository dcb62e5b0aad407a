// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeSet;
use std::fmt::Display;

use carbide::Name;

use super::{CondKind, Ir, IrKind, VRegId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BBId(pub u32);

impl Display for BBId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A maximal straight-line instruction sequence. Blocks join `layout` when
/// they become the current block, so layout order is emission order;
/// liveness sets are filled in by the register allocator.
#[derive(Debug)]
pub struct BB {
    pub label: Name,
    pub irs: Vec<Ir>,
    /// Fallthrough successor in layout order, set by `finalize`.
    pub next: Option<BBId>,
    pub in_regs: BTreeSet<VRegId>,
    pub out_regs: BTreeSet<VRegId>,
}

impl BB {
    #[must_use]
    pub fn new(label: Name) -> Self {
        Self {
            label,
            irs: Vec::new(),
            next: None,
            in_regs: BTreeSet::new(),
            out_regs: BTreeSet::new(),
        }
    }

    /// All control-flow successors: explicit jump targets plus the
    /// fallthrough edge unless the block ends unconditionally.
    #[must_use]
    pub fn successors(&self) -> Vec<BBId> {
        let mut successors = Vec::new();
        let mut falls_through = true;
        if let Some(last) = self.irs.last() {
            match &last.kind {
                IrKind::Jmp { cond, bb } => {
                    successors.push(*bb);
                    if matches!(cond, CondKind::Any) {
                        falls_through = false;
                    }
                }
                IrKind::TJmp { bbs } => {
                    successors.extend(bbs.iter().copied());
                    falls_through = false;
                }
                _ => {}
            }
        }
        if falls_through {
            if let Some(next) = self.next {
                successors.push(next);
            }
        }
        successors
    }
}

/// Basic-block container of one function.
#[derive(Debug, Default)]
pub struct BBContainer {
    bbs: Vec<BB>,
    /// Emission order; a block appears here once it has been made current.
    pub layout: Vec<BBId>,
}

impl BBContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached block; it enters the layout via `activate`.
    pub fn add(&mut self, label: Name) -> BBId {
        let id = BBId(self.bbs.len() as u32);
        self.bbs.push(BB::new(label));
        id
    }

    pub fn activate(&mut self, bb: BBId) {
        debug_assert!(!self.layout.contains(&bb), "block activated twice");
        self.layout.push(bb);
    }

    /// Chain fallthrough links along the layout.
    pub fn finalize(&mut self) {
        for i in 0..self.layout.len() {
            let next = self.layout.get(i + 1).copied();
            let id = self.layout[i];
            self.get_mut(id).next = next;
        }
    }

    #[must_use]
    pub fn get(&self, id: BBId) -> &BB {
        &self.bbs[id.0 as usize]
    }

    #[must_use]
    pub fn get_mut(&mut self, id: BBId) -> &mut BB {
        &mut self.bbs[id.0 as usize]
    }

    pub fn push_ir(&mut self, bb: BBId, ir: Ir) {
        self.get_mut(bb).irs.push(ir);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Blocks in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (BBId, &BB)> + '_ {
        self.layout.iter().map(move |&id| (id, self.get(id)))
    }

    pub fn dump(&self) {
        for (id, bb) in self.iter() {
            log::debug!("{id} {}:", bb.label);
            for ir in &bb.irs {
                log::debug!("  {ir}");
            }
        }
    }
}
