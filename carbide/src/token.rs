// Copyright (C) 2024 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;
use std::rc::Rc;

/// Interned identifier. Cheap to clone, compared by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Rc<str>);

impl Name {
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Rc::from(s.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Generates names that cannot collide with source identifiers.
#[derive(Debug, Default)]
pub struct NameGen {
    counter: usize,
}

impl NameGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh internal label, usable for data labels and renamed parameters.
    #[must_use]
    pub fn alloc_label(&mut self) -> Name {
        self.counter += 1;
        Name::new(format!(".L{}", self.counter))
    }

    /// A fresh name for a compiler-introduced temporary variable.
    #[must_use]
    pub fn alloc_tmp(&mut self) -> Name {
        self.counter += 1;
        Name::new(format!(".t{}", self.counter))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self {
            file: Rc::from(""),
            line: 0,
            column: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Literal,
    /// The `->` punctuator; member accesses remember it for the
    /// constant-base address fold.
    Arrow,
    Punctuator,
    /// Compiler-generated, carries no real source position.
    Synthetic,
}

/// Source token attached to every AST node for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: SourcePosition,
    pub text: Rc<str>,
    /// The full source line, when the lexer preserved it; used for the
    /// caret line underneath diagnostics.
    pub source_line: Option<Rc<str>>,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, position: SourcePosition, text: impl AsRef<str>) -> Self {
        Self {
            kind,
            position,
            text: Rc::from(text.as_ref()),
            source_line: None,
        }
    }

    #[must_use]
    pub fn synthetic(text: impl AsRef<str>) -> Self {
        Self::new(TokenKind::Synthetic, SourcePosition::default(), text)
    }

    #[must_use]
    pub fn with_source_line(mut self, line: impl AsRef<str>) -> Self {
        self.source_line = Some(Rc::from(line.as_ref()));
        self
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.kind == TokenKind::Synthetic
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::synthetic("")
    }
}
