// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::ir::{BBContainer, IrKind, VRegId};

use super::RegisterAllocator;

/// Live interval of one virtual register, in global instruction numbering.
/// `start` is inclusive, `end` exclusive.
#[derive(Debug, Clone)]
pub struct RegisterLifetime {
    pub start: usize,
    pub end: usize,
    pub use_count: usize,
    /// A call instruction sits strictly inside the interval.
    pub spans_call: bool,
}

impl RegisterLifetime {
    fn at(position: usize) -> Self {
        Self {
            start: position,
            end: position + 1,
            use_count: 1,
            spans_call: false,
        }
    }

    fn extend(&mut self, position: usize) {
        self.start = self.start.min(position);
        self.end = self.end.max(position + 1);
        self.use_count += 1;
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Cheap spill ranking: short, busy intervals are expensive to spill.
    #[must_use]
    pub fn spill_cost(&self) -> f64 {
        self.use_count as f64 / (self.end - self.start).max(1) as f64
    }
}

#[derive(Debug, Default)]
pub struct LifeAnalysisResult {
    pub lifetimes: BTreeMap<VRegId, RegisterLifetime>,
    /// Global indices of call instructions.
    pub call_positions: Vec<usize>,
}

/// Block-level liveness by backward worklist iteration to a fixed point,
/// refined into per-register intervals for the linear scan.
pub struct LifeAnalysis;

impl LifeAnalysis {
    #[must_use]
    pub fn analyze(
        ra: &RegisterAllocator,
        bbcon: &mut BBContainer,
        param_vregs: &[VRegId],
    ) -> LifeAnalysisResult {
        let layout = bbcon.layout.clone();
        let tracked = |id: VRegId| !ra.vreg(id).is_const();

        let mut use_sets: BTreeMap<crate::ir::BBId, BTreeSet<VRegId>> = BTreeMap::new();
        let mut def_sets: BTreeMap<crate::ir::BBId, BTreeSet<VRegId>> = BTreeMap::new();
        for &id in &layout {
            let mut uses = BTreeSet::new();
            let mut defs = BTreeSet::new();
            for ir in &bbcon.get(id).irs {
                for opr in [ir.opr1, ir.opr2].into_iter().flatten() {
                    if tracked(opr) && !defs.contains(&opr) {
                        uses.insert(opr);
                    }
                }
                if let Some(dst) = ir.dst {
                    if tracked(dst) {
                        defs.insert(dst);
                    }
                }
            }
            use_sets.insert(id, uses);
            def_sets.insert(id, defs);
        }

        // Worklist until the in/out sets stop changing.
        let mut changed = true;
        while changed {
            changed = false;
            for &id in layout.iter().rev() {
                let mut out: BTreeSet<VRegId> = BTreeSet::new();
                for succ in bbcon.get(id).successors() {
                    out.extend(bbcon.get(succ).in_regs.iter().copied());
                }
                let mut in_set = use_sets[&id].clone();
                for &v in &out {
                    if !def_sets[&id].contains(&v) {
                        in_set.insert(v);
                    }
                }
                let bb = bbcon.get_mut(id);
                if out != bb.out_regs || in_set != bb.in_regs {
                    bb.out_regs = out;
                    bb.in_regs = in_set;
                    changed = true;
                }
            }
        }

        // Intervals in global instruction numbering.
        let mut result = LifeAnalysisResult::default();
        let mut position = 0usize;
        let mut extend = |map: &mut BTreeMap<VRegId, RegisterLifetime>, v: VRegId, at: usize| {
            map.entry(v)
                .and_modify(|l| l.extend(at))
                .or_insert_with(|| RegisterLifetime::at(at));
        };

        for &v in param_vregs {
            if tracked(v) {
                extend(&mut result.lifetimes, v, 0);
            }
        }

        for &id in &layout {
            let bb_start = position;
            let bb = bbcon.get(id);
            for v in &bb.in_regs {
                extend(&mut result.lifetimes, *v, bb_start);
            }
            for ir in &bb.irs {
                for opr in [ir.dst, ir.opr1, ir.opr2].into_iter().flatten() {
                    if tracked(opr) {
                        extend(&mut result.lifetimes, opr, position);
                    }
                }
                if matches!(ir.kind, IrKind::Call { .. }) {
                    result.call_positions.push(position);
                }
                position += 1;
            }
            let bb_end = position.saturating_sub(1).max(bb_start);
            for v in &bb.out_regs {
                extend(&mut result.lifetimes, *v, bb_end);
            }
        }

        for lifetime in result.lifetimes.values_mut() {
            lifetime.spans_call = result
                .call_positions
                .iter()
                .any(|&call| lifetime.start < call && call + 1 < lifetime.end);
        }

        for (reg, lifetime) in &result.lifetimes {
            debug!(
                "{reg}: [{}, {}) uses={} spans_call={}",
                lifetime.start, lifetime.end, lifetime.use_count, lifetime.spans_call
            );
        }

        result
    }
}
