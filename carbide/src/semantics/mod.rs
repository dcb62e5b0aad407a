// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod bitfield;
mod context;
mod diagnostic;
mod elaborate;
mod inline;
mod reachability;

pub use self::{
    bitfield::BitfieldMember,
    context::{Elaborator, LoopScope},
    diagnostic::{
        CompileError, CompileResult, Diagnostic, DiagnosticKind, DiagnosticsList, Severity,
        MAX_ERROR_COUNT,
    },
};
