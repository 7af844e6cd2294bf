//! Parsed compilation unit: lossless tokens plus the resolution tables the
//! rewriting stages consume.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::syntax::parser::{self, ParseMode};
use crate::syntax::token::Token;

/// `package <name>` clause of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageClause {
    pub name: String,
    pub token: usize,
    /// `// import "path"` comment that pins the canonical import path.
    pub import_comment: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    /// Explicit local name (`.`, `_` or an identifier).
    pub alias: Option<String>,
    pub path: String,
    pub path_token: usize,
}

impl ImportSpec {
    pub fn is_dot(&self) -> bool {
        self.alias.as_deref() == Some(".")
    }

    pub fn is_blank(&self) -> bool {
        self.alias.as_deref() == Some("_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    Func,
    Method { receiver: String },
    Type,
    Var,
    Const,
}

/// A declaration at package scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelDecl {
    pub name: String,
    pub kind: DeclKind,
    pub token: usize,
}

/// Syntactic shape of a type expression, as far as composite literal keys care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named { qualifier: Option<String>, name: String, local: bool },
    Struct,
    Map { key: Box<TypeExpr>, value: Box<TypeExpr> },
    Slice(Box<TypeExpr>),
    Array(Box<TypeExpr>),
    Pointer(Box<TypeExpr>),
    /// Element type of an enclosing composite literal (elided `{...}` element).
    Element(Box<TypeExpr>),
    Other,
}

impl TypeExpr {
    pub fn is_plain_string(&self) -> bool {
        matches!(self, TypeExpr::Named { qualifier: None, name, local: false } if name == "string")
    }

    /// True for a named type other than the predeclared `string`.
    pub fn is_named_non_string(&self) -> bool {
        matches!(self, TypeExpr::Named { .. }) && !self.is_plain_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub underlying: TypeExpr,
}

/// A type embedded as an anonymous struct field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedType {
    pub qualifier: Option<String>,
    pub name: String,
}

/// What an identifier token is, as resolved by the parser's scope walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentRole {
    /// Declared at package scope.
    PackageDecl,
    /// Declared in a function, signature or local block.
    LocalDecl,
    /// Reference bound to an enclosing local scope.
    Local,
    /// Reference not bound by any local scope: package scope, import, or universe.
    Free,
    /// `x.Name`; `base` is the occurrence index of `x` when it is a plain identifier.
    Selector { base: Option<usize> },
    /// Struct field, method or interface method name at its declaration.
    MemberDecl,
    /// `Name:` key inside a composite literal of the given type (`None` if unknown).
    Key { literal: Option<TypeExpr>, local: bool },
    Label,
    /// Package clause name or import alias.
    PackageName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentOccurrence {
    pub token: usize,
    pub name: String,
    pub role: IdentRole,
}

/// Syntactic context of a string literal; everything but `Expression` must stay literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringContext {
    Expression,
    Import,
    Tag,
    Constant,
    ArrayLength,
    CaseClause,
    /// Direct initializer of a value whose declared type is a named type.
    TypedInitializer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringSite {
    pub token: usize,
    pub context: StringContext,
}

/// One `.go` file of the workspace.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub tokens: Vec<Token>,
    pub package: PackageClause,
    pub imports: Vec<ImportSpec>,
    pub decls: Vec<TopLevelDecl>,
    pub types: Vec<TypeDecl>,
    pub local_types: Vec<TypeDecl>,
    pub embedded: Vec<EmbeddedType>,
    pub idents: Vec<IdentOccurrence>,
    pub strings: Vec<StringSite>,
    trailer: String,
    dirty: bool,
}

impl SourceUnit {
    pub(crate) fn from_parts(path: PathBuf, tokens: Vec<Token>, parts: parser::Parsed) -> Self {
        Self {
            path,
            tokens,
            package: parts.package,
            imports: parts.imports,
            decls: parts.decls,
            types: parts.types,
            local_types: parts.local_types,
            embedded: parts.embedded,
            idents: parts.idents,
            strings: parts.strings,
            trailer: String::new(),
            dirty: false,
        }
    }

    /// Parse a complete unit (declarations, bodies and scopes).
    pub fn parse(path: impl Into<PathBuf>, src: &str) -> ObfuscateResult<Self> {
        parser::parse(path.into(), src, ParseMode::Full)
    }

    /// Parse only the package clause and the import block.
    pub fn parse_header(path: impl Into<PathBuf>, src: &str) -> ObfuscateResult<Self> {
        parser::parse(path.into(), src, ParseMode::Header)
    }

    pub fn read(path: &Path) -> ObfuscateResult<Self> {
        let src = fs::read_to_string(path).map_err(|e| ObfuscateError::io(path, e))?;
        Self::parse(path, &src)
    }

    pub fn read_header(path: &Path) -> ObfuscateResult<Self> {
        let src = fs::read_to_string(path).map_err(|e| ObfuscateError::io(path, e))?;
        Self::parse_header(path, &src)
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    pub fn is_test(&self) -> bool {
        self.file_name().ends_with("_test.go")
    }

    pub fn has_cgo(&self) -> bool {
        self.imports.iter().any(|imp| imp.path == "C")
    }

    pub fn position(&self, token: usize) -> (u32, u32) {
        self.tokens.get(token).map(|t| (t.line, t.column)).unwrap_or((0, 0))
    }

    pub fn token_text(&self, token: usize) -> &str {
        self.tokens.get(token).map(|t| t.text.as_str()).unwrap_or_default()
    }

    pub fn replace_token(&mut self, token: usize, text: impl Into<String>) {
        if let Some(t) = self.tokens.get_mut(token) {
            t.text = text.into();
            self.dirty = true;
        }
    }

    /// Append source text after the last token.
    pub fn append(&mut self, text: &str) {
        self.trailer.push_str(text);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn render(&self) -> String {
        let mut out: String = self.tokens.iter().map(|t| t.text.as_str()).collect();
        if !self.trailer.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.trailer);
        }
        out
    }

    /// Write the rendered text to `path` (which may differ from the source path
    /// when the unit is being moved).
    pub fn write_to(&self, path: &Path) -> ObfuscateResult<()> {
        fs::write(path, self.render()).map_err(|e| ObfuscateError::io(path, e))
    }
}
