// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeMap;

use log::debug;

use crate::ir::{BBContainer, IrKind, PrecallInfo, VRegFlags, VRegId};

use super::{LifeAnalysis, LifeAnalysisResult, RegAllocSettings, RegisterAllocator, RegisterLifetime};

/// Sentinel physical index of a spilled register; the emitter routes these
/// through the target's dedicated temporary.
pub const SPILLED_PHYS: usize = usize::MAX - 1;

struct PhysSchedule {
    assigned: Vec<RegisterLifetime>,
}

impl PhysSchedule {
    fn new() -> Self {
        Self { assigned: Vec::new() }
    }

    fn is_free_for(&self, lifetime: &RegisterLifetime) -> bool {
        self.assigned.iter().all(|l| !l.overlaps(lifetime))
    }
}

impl RegisterAllocator {
    /// Assign physical registers (two pools: integer and floating) to the
    /// virtual registers of `bbcon`, spilling by cost when a pool runs dry.
    pub fn allocate(
        &mut self,
        bbcon: &mut BBContainer,
        settings: &RegAllocSettings,
        param_vregs: &[VRegId],
        precalls: &mut [PrecallInfo],
    ) -> LifeAnalysisResult {
        let analysis = LifeAnalysis::analyze(self, bbcon, param_vregs);

        // Address-taken registers live in memory from the start; that
        // commits the function to a stack frame before register handout.
        for id in self.vreg_ids().collect::<Vec<_>>() {
            if self.vreg(id).flags.contains(VRegFlags::REF_TAKEN) {
                self.vreg_mut(id).flags.insert(VRegFlags::SPILLED);
                self.vreg_mut(id).phys = SPILLED_PHYS;
                self.flags.insert(super::RaFlags::STACK_FRAME);
            }
        }

        // Implicit uses reported by the target remove registers from the
        // pools wholesale.
        let mut extra_occupied = 0u64;
        for (_, bb) in bbcon.iter() {
            for ir in &bb.irs {
                extra_occupied |= (settings.detect_extra_occupied)(self, ir);
            }
        }

        let mut int_pool: Vec<PhysSchedule> =
            (0..settings.phys_max).map(|_| PhysSchedule::new()).collect();
        let mut float_pool: Vec<PhysSchedule> =
            (0..settings.fphys_max).map(|_| PhysSchedule::new()).collect();

        let mut order: Vec<(VRegId, RegisterLifetime)> = analysis
            .lifetimes
            .iter()
            .filter(|(id, _)| {
                let vreg = self.vreg(**id);
                !vreg.is_const() && !vreg.is_spilled()
            })
            .map(|(id, lifetime)| (*id, lifetime.clone()))
            .collect();
        order.sort_by_key(|(_, lifetime)| lifetime.start);

        for (id, lifetime) in &order {
            let flonum = self.vreg(*id).is_flonum();
            let (pool, callee_save, temp_count) = if flonum {
                (&mut float_pool, settings.fcallee_save, settings.ftemporary_count)
            } else {
                (&mut int_pool, settings.callee_save, settings.temporary_count)
            };

            // Call-spanning values must survive in callee-saved registers;
            // everything else prefers the temporaries.
            let candidates: Vec<usize> = if lifetime.spans_call {
                callee_save.to_vec()
            } else {
                let mut order: Vec<usize> = (0..temp_count).collect();
                order.extend(callee_save.iter().copied());
                order.extend((temp_count..pool.len()).filter(|i| !callee_save.contains(i)));
                order
            };

            let mut assigned = false;
            for phys in candidates {
                if !flonum && extra_occupied & (1u64 << phys) != 0 {
                    continue;
                }
                if pool[phys].is_free_for(lifetime) {
                    pool[phys].assigned.push(lifetime.clone());
                    let vreg = self.vreg_mut(*id);
                    vreg.phys = phys;
                    if flonum {
                        self.used_freg_bits |= 1u64 << phys;
                    } else {
                        self.used_reg_bits |= 1u64 << phys;
                    }
                    assigned = true;
                    break;
                }
            }

            if !assigned {
                debug!("spilling {id} (cost {:.3})", lifetime.spill_cost());
                let vreg = self.vreg_mut(*id);
                vreg.flags.insert(VRegFlags::SPILLED);
                vreg.phys = SPILLED_PHYS;
            }
        }

        self.fill_precall_liveness(&analysis, bbcon, settings, precalls);
        self.rewrite_spilled_moves(bbcon);
        analysis
    }

    /// Record, for every precall, the caller-saved physical registers that
    /// are live across the matching call.
    fn fill_precall_liveness(
        &self,
        analysis: &LifeAnalysisResult,
        bbcon: &BBContainer,
        settings: &RegAllocSettings,
        precalls: &mut [PrecallInfo],
    ) {
        let mut call_precalls: BTreeMap<usize, usize> = BTreeMap::new();
        let mut position = 0usize;
        for (_, bb) in bbcon.iter() {
            for ir in &bb.irs {
                if let IrKind::Call { precall, .. } = &ir.kind {
                    call_precalls.insert(position, precall.0 as usize);
                }
                position += 1;
            }
        }

        for (&call_position, &precall) in &call_precalls {
            let mut living = 0u64;
            for (id, lifetime) in &analysis.lifetimes {
                if !(lifetime.start < call_position && call_position + 1 < lifetime.end) {
                    continue;
                }
                let vreg = self.vreg(*id);
                if vreg.is_spilled() || vreg.phys == usize::MAX {
                    continue;
                }
                if vreg.is_flonum() {
                    if settings.fcaller_save.contains(&vreg.phys) {
                        living |= 1u64 << (vreg.phys + settings.phys_max);
                    }
                } else if settings.caller_save.contains(&vreg.phys) {
                    living |= 1u64 << vreg.phys;
                }
            }
            precalls[precall].living_pregs = living;
        }
    }

    /// `mov` to or from a spilled register becomes the dedicated spill
    /// load/store opcode, addressed off the frame pointer.
    fn rewrite_spilled_moves(&mut self, bbcon: &mut BBContainer) {
        let mut needs_frame = false;
        let layout = bbcon.layout.clone();
        for id in layout {
            for ir in &mut bbcon.get_mut(id).irs {
                if !matches!(ir.kind, IrKind::Mov) {
                    continue;
                }
                let dst_spilled = ir.dst.map(|d| self.vreg(d).is_spilled()).unwrap_or(false);
                let src_spilled = ir.opr1.map(|s| self.vreg(s).is_spilled()).unwrap_or(false);
                if src_spilled && !dst_spilled {
                    ir.kind = IrKind::LoadSpilled;
                    needs_frame = true;
                } else if dst_spilled && !src_spilled {
                    ir.kind = IrKind::StoreSpilled;
                    needs_frame = true;
                } else if dst_spilled && src_spilled {
                    // Routed through the dedicated temporary in two steps.
                    ir.kind = IrKind::LoadSpilled;
                    needs_frame = true;
                }
            }
        }
        if needs_frame {
            self.flags.insert(super::RaFlags::STACK_FRAME);
        }
    }
}
