// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use strum::AsRefStr;
use thiserror::Error;

use crate::{Name, Token};

/// Errors beyond this count abort the compilation.
pub const MAX_ERROR_COUNT: usize = 25;

#[derive(Debug, Clone, Error, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DiagnosticKind {
    #[error("`void' not allowed")]
    VoidNotAllowed,

    #[error("cannot modify `const'")]
    CannotModifyConst,

    #[error("`{name}' type conflict")]
    TypeConflict { name: Name },

    #[error("`{name}' already defined")]
    AlreadyDefined { name: Name },

    #[error("incomplete struct: `{name}'")]
    IncompleteStruct { name: Name },

    #[error("member `{name}' not found")]
    MemberNotFound { name: Name },

    #[error("cannot convert value from type `{src}' to `{dst}'")]
    CannotConvert { dst: String, src: String },

    #[error("cannot convert value from type `{src}' to array type `{dst}'")]
    CannotConvertToArray { dst: String, src: String },

    #[error("number type expected")]
    NumberTypeExpected,

    #[error("int type expected")]
    IntTypeExpected,

    #[error("divide by 0")]
    DivideByZero,

    #[error("different pointer diff")]
    DifferentPointerDiff,

    #[error("cannot apply `{op}'")]
    CannotApply { op: String },

    #[error("lvalue expected")]
    LvalueExpected,

    #[error("cannot take reference")]
    CannotTakeReference,

    #[error("cannot compare pointer to other types")]
    IncompatiblePointerComparison,

    #[error("cannot compare except numbers")]
    CompareNonNumbers,

    #[error("function `{name}' expect {expected} arguments, but {actual}")]
    ArgumentCountMismatch {
        name: Name,
        expected: usize,
        actual: usize,
    },

    #[error("flexible array as an argument not allowed")]
    FlexibleArrayArgument,

    #[error("cannot get size for bitfield")]
    BitfieldSize,

    #[error("unreachable")]
    Unreachable,

    #[error("param count exceeds {max}")]
    RegisterParamCountExceeded { max: usize },

    #[error("illegal initializer: constant number expected")]
    IllegalInitializer,

    #[error("cannot call a non-function value")]
    NotCallable,

    #[error("ternary operands have incompatible types")]
    IncompatibleTernary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub token: Option<Token>,
    pub kind: DiagnosticKind,
    pub severity: Severity,
}

impl Diagnostic {
    #[must_use]
    pub fn new(token: impl Into<Option<Token>>, kind: DiagnosticKind, severity: Severity) -> Self {
        Self {
            token: token.into(),
            kind,
            severity,
        }
    }
}

impl Display for Diagnostic {
    /// Renders as `file(line): [warning:] message` followed by the source
    /// line with a caret under the offending token.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(token) = &self.token {
            if !token.is_synthetic() {
                write!(f, "{}({}): ", token.position.file, token.position.line)?;
            }
        }
        if self.severity == Severity::Warning {
            f.write_str("warning: ")?;
        }
        write!(f, "{}", self.kind)?;

        if let Some(token) = &self.token {
            if let Some(line) = &token.source_line {
                writeln!(f)?;
                writeln!(f, "{line}")?;
                let column = token.position.column.saturating_sub(1) as usize;
                let width = token.text.chars().count().max(1);
                write!(f, "{}{}", " ".repeat(column), "^".repeat(width))?;
            }
        }
        Ok(())
    }
}

/// A condition the engine cannot continue past. The driver converts this to
/// a non-zero process exit; the library itself never exits.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Fatal(Diagnostic),

    #[error("too many errors")]
    TooManyErrors,
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Collects diagnostics and enforces the error threshold.
#[derive(Debug, Default)]
pub struct DiagnosticsList {
    contents: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    warnings_as_errors: bool,
}

impl DiagnosticsList {
    #[must_use]
    pub fn new(warnings_as_errors: bool) -> Self {
        Self {
            warnings_as_errors,
            ..Self::default()
        }
    }

    /// Record a diagnostic. Fatal diagnostics and the error threshold
    /// surface as `Err`; everything else lets the caller continue with a
    /// dummy node.
    pub fn report(
        &mut self,
        token: impl Into<Option<Token>>,
        kind: DiagnosticKind,
        severity: Severity,
    ) -> CompileResult<()> {
        let severity = if severity == Severity::Warning && self.warnings_as_errors {
            Severity::Error
        } else {
            severity
        };
        let diagnostic = Diagnostic::new(token, kind, severity);
        self.contents.push(diagnostic.clone());

        match severity {
            Severity::Warning => {
                self.warning_count += 1;
                Ok(())
            }
            Severity::Error => {
                self.error_count += 1;
                if self.error_count >= MAX_ERROR_COUNT {
                    Err(CompileError::TooManyErrors)
                } else {
                    Ok(())
                }
            }
            Severity::Fatal => {
                self.error_count += 1;
                Err(CompileError::Fatal(diagnostic))
            }
        }
    }

    pub fn warn(&mut self, token: impl Into<Option<Token>>, kind: DiagnosticKind) -> CompileResult<()> {
        self.report(token, kind, Severity::Warning)
    }

    pub fn error(&mut self, token: impl Into<Option<Token>>, kind: DiagnosticKind) -> CompileResult<()> {
        self.report(token, kind, Severity::Error)
    }

    /// Always returns `Err`; `?` at the call site keeps control flow honest.
    pub fn fatal<T>(&mut self, token: impl Into<Option<Token>>, kind: DiagnosticKind) -> CompileResult<T> {
        match self.report(token, kind, Severity::Fatal) {
            Err(e) => Err(e),
            Ok(()) => unreachable!("fatal diagnostics never continue"),
        }
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.contents
    }

    #[must_use]
    pub fn to_vec(self) -> Vec<Diagnostic> {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SourcePosition, TokenKind};

    #[test]
    fn test_threshold_aborts() {
        let mut list = DiagnosticsList::new(false);
        for _ in 0..MAX_ERROR_COUNT - 1 {
            list.error(None, DiagnosticKind::LvalueExpected).unwrap();
        }
        assert!(matches!(
            list.error(None, DiagnosticKind::LvalueExpected),
            Err(CompileError::TooManyErrors)
        ));
    }

    #[test]
    fn test_warnings_count_against_threshold_when_promoted() {
        let mut list = DiagnosticsList::new(true);
        list.warn(None, DiagnosticKind::Unreachable).unwrap();
        assert_eq!(list.error_count(), 1);
        assert_eq!(list.warning_count(), 0);
    }

    #[test]
    fn test_render_with_caret() {
        let token = Token::new(
            TokenKind::Identifier,
            SourcePosition {
                file: "a.c".into(),
                line: 3,
                column: 5,
            },
            "x",
        )
        .with_source_line("int x = y;");
        let diagnostic = Diagnostic::new(token, DiagnosticKind::LvalueExpected, Severity::Error);
        let rendered = diagnostic.to_string();
        assert!(rendered.starts_with("a.c(3): lvalue expected"));
        assert!(rendered.contains("int x = y;"));
        assert!(rendered.ends_with("    ^"));
    }
}
