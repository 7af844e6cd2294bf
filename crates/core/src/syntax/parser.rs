//! Recursive-descent Go parser that records identifier roles and string sites.
//!
//! The parser does not build an AST. It walks the significant tokens once,
//! keeps a stack of local scopes, and emits the tables in [`Parsed`]. Anything
//! it cannot classify is left as `Free` so the renamer can decide.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{ObfuscateError, ObfuscateResult};
use crate::syntax::token::{tokenize, unquote, Token, TokenKind};
use crate::syntax::unit::{
    DeclKind, EmbeddedType, IdentOccurrence, IdentRole, ImportSpec, PackageClause, SourceUnit,
    StringContext, StringSite, TopLevelDecl, TypeDecl, TypeExpr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Package clause and imports only.
    Header,
    Full,
}

#[derive(Debug, Default)]
pub(crate) struct Parsed {
    pub(crate) package: PackageClause,
    pub(crate) imports: Vec<ImportSpec>,
    pub(crate) decls: Vec<TopLevelDecl>,
    pub(crate) types: Vec<TypeDecl>,
    pub(crate) local_types: Vec<TypeDecl>,
    pub(crate) embedded: Vec<EmbeddedType>,
    pub(crate) idents: Vec<IdentOccurrence>,
    pub(crate) strings: Vec<StringSite>,
}

/// Tokenize and parse `src`.
pub fn parse(path: PathBuf, src: &str, mode: ParseMode) -> ObfuscateResult<SourceUnit> {
    let tokens = tokenize(src).map_err(|e| ObfuscateError::Parse {
        path: path.clone(),
        line: e.line,
        column: e.column,
        message: e.message,
    })?;
    let parsed = {
        let mut parser = Parser::new(path.clone(), &tokens);
        parser.file(mode)?;
        parser.out
    };
    Ok(SourceUnit::from_parts(path, tokens, parsed))
}

/// A significant token, an inserted semicolon (`tok == None`), or end of input.
#[derive(Debug, Clone, Copy)]
struct Sig {
    tok: Option<usize>,
    kind: TokenKind,
    eof: bool,
}

impl Sig {
    const SEMI: Sig = Sig { tok: None, kind: TokenKind::Op, eof: false };
    const EOF: Sig = Sig { tok: None, kind: TokenKind::Whitespace, eof: true };
}

fn needs_semicolon(t: &Token) -> bool {
    match t.kind {
        TokenKind::Ident
        | TokenKind::Number
        | TokenKind::Rune
        | TokenKind::String
        | TokenKind::RawString => true,
        TokenKind::Keyword => {
            matches!(t.text.as_str(), "break" | "continue" | "fallthrough" | "return")
        }
        TokenKind::Op => matches!(t.text.as_str(), "++" | "--" | ")" | "]" | "}"),
        _ => false,
    }
}

fn significant(tokens: &[Token]) -> Vec<Sig> {
    let mut out = Vec::new();
    let mut pending = false;
    for (i, t) in tokens.iter().enumerate() {
        if t.kind.is_trivia() {
            if pending && t.contains_newline() {
                out.push(Sig::SEMI);
                pending = false;
            }
            continue;
        }
        pending = needs_semicolon(t);
        out.push(Sig { tok: Some(i), kind: t.kind, eof: false });
    }
    if pending {
        out.push(Sig::SEMI);
    }
    out.push(Sig::EOF);
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// Plain identifier; the occurrence index.
    Ident(usize),
    /// `x.Name` where `x` is a plain identifier.
    Qualified { base: usize, sel: usize },
    /// Generic instantiation or index of a name.
    Instance(Box<Expr>),
    Type(TypeExpr),
    StringLit(usize),
    TypeSwitchGuard,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Simple {
    Plain,
    Range,
    TypeSwitch,
}

const ASSIGN_OPS: &[&str] =
    &["=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=", "&^="];

struct Parser<'a> {
    path: PathBuf,
    tokens: &'a [Token],
    sig: Vec<Sig>,
    pos: usize,
    scopes: Vec<HashSet<String>>,
    /// < 0 in control clause headers, where `{` opens the body rather than a literal.
    expr_lev: i32,
    string_ctx: StringContext,
    out: Parsed,
}

impl<'a> Parser<'a> {
    fn new(path: PathBuf, tokens: &'a [Token]) -> Self {
        Self {
            path,
            tokens,
            sig: significant(tokens),
            pos: 0,
            scopes: Vec::new(),
            expr_lev: 0,
            string_ctx: StringContext::Expression,
            out: Parsed::default(),
        }
    }

    // ---- cursor ----

    fn peek_n(&self, n: usize) -> Sig {
        self.sig.get(self.pos + n).copied().unwrap_or(Sig::EOF)
    }

    fn peek(&self) -> Sig {
        self.peek_n(0)
    }

    fn text_n(&self, n: usize) -> &'a str {
        let s = self.peek_n(n);
        match s.tok {
            Some(i) => self.tokens[i].text.as_str(),
            None if s.eof => "",
            None => ";",
        }
    }

    fn text(&self) -> &'a str {
        self.text_n(0)
    }

    fn at_op_n(&self, n: usize, op: &str) -> bool {
        self.peek_n(n).kind == TokenKind::Op && self.text_n(n) == op
    }

    fn at_op(&self, op: &str) -> bool {
        self.at_op_n(0, op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.peek().kind == TokenKind::Keyword && self.text() == kw
    }

    fn at_ident_n(&self, n: usize) -> bool {
        self.peek_n(n).kind == TokenKind::Ident
    }

    fn at_ident(&self) -> bool {
        self.at_ident_n(0)
    }

    fn at_eof(&self) -> bool {
        self.peek().eof
    }

    fn at_stmt_end(&self) -> bool {
        self.at_op(";") || self.at_op("}") || self.at_eof()
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.sig.len() {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ObfuscateError {
        let tok = self
            .peek()
            .tok
            .or_else(|| self.sig[..self.pos.min(self.sig.len())].iter().rev().find_map(|s| s.tok));
        let (line, column) = tok.map(|i| (self.tokens[i].line, self.tokens[i].column)).unwrap_or((1, 1));
        ObfuscateError::Parse { path: self.path.clone(), line, column, message: message.into() }
    }

    fn expect_op(&mut self, op: &str) -> ObfuscateResult<()> {
        if self.at_op(op) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected `{op}`, found `{}`", self.text())))
        }
    }

    fn expect_ident(&mut self) -> ObfuscateResult<usize> {
        match self.peek() {
            Sig { tok: Some(i), kind: TokenKind::Ident, .. } => {
                self.advance();
                Ok(i)
            }
            _ => Err(self.error(format!("expected identifier, found `{}`", self.text()))),
        }
    }

    fn expect_semi(&mut self) -> ObfuscateResult<()> {
        if self.at_op(";") {
            self.advance();
            Ok(())
        } else if self.at_op(")") || self.at_op("}") || self.at_eof() {
            Ok(())
        } else {
            Err(self.error(format!("expected `;`, found `{}`", self.text())))
        }
    }

    /// Offset of the `]` matching the `[` at offset `open`.
    fn matching_bracket(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut n = open;
        loop {
            let s = self.peek_n(n);
            if s.eof {
                return None;
            }
            if s.kind == TokenKind::Op {
                match self.text_n(n) {
                    "[" | "(" | "{" => depth += 1,
                    "]" | ")" | "}" => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return Some(n);
                        }
                    }
                    _ => {}
                }
            }
            n += 1;
        }
    }

    // ---- tables ----

    fn open(&mut self) {
        self.scopes.push(HashSet::new());
    }

    fn close(&mut self) {
        self.scopes.pop();
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn declare(&mut self, name: &str) {
        if name == "_" {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn declare_token(&mut self, tok: usize) {
        let tokens = self.tokens;
        self.declare(&tokens[tok].text);
    }

    fn record(&mut self, token: usize, role: IdentRole) -> usize {
        let name = self.tokens[token].text.clone();
        self.out.idents.push(IdentOccurrence { token, name, role });
        self.out.idents.len() - 1
    }

    fn reference(&mut self, token: usize) -> usize {
        let role =
            if self.is_local(&self.tokens[token].text) { IdentRole::Local } else { IdentRole::Free };
        self.record(token, role)
    }

    fn string_site(&mut self, token: usize, context: StringContext) -> usize {
        self.out.strings.push(StringSite { token, context });
        self.out.strings.len() - 1
    }

    /// Run `f` with `ctx` as the string context unless an outer one already applies.
    fn with_ctx<T>(
        &mut self,
        ctx: StringContext,
        f: impl FnOnce(&mut Self) -> ObfuscateResult<T>,
    ) -> ObfuscateResult<T> {
        let old = self.string_ctx;
        if old == StringContext::Expression {
            self.string_ctx = ctx;
        }
        let result = f(self);
        self.string_ctx = old;
        result
    }

    fn mark_typed(&mut self, expr: &Expr, ty: Option<&TypeExpr>) {
        if let (Expr::StringLit(site), Some(ty)) = (expr, ty) {
            let site = &mut self.out.strings[*site];
            if ty.is_named_non_string() && site.context == StringContext::Expression {
                site.context = StringContext::TypedInitializer;
            }
        }
    }

    fn type_of(&self, expr: &Expr) -> TypeExpr {
        match expr {
            Expr::Ident(occ) => {
                let o = &self.out.idents[*occ];
                TypeExpr::Named {
                    qualifier: None,
                    name: o.name.clone(),
                    local: o.role == IdentRole::Local,
                }
            }
            Expr::Qualified { base, sel } => TypeExpr::Named {
                qualifier: Some(self.out.idents[*base].name.clone()),
                name: self.out.idents[*sel].name.clone(),
                local: false,
            },
            Expr::Instance(inner) => self.type_of(inner),
            Expr::Type(ty) => ty.clone(),
            _ => TypeExpr::Other,
        }
    }

    // ---- file ----

    fn file(&mut self, mode: ParseMode) -> ObfuscateResult<()> {
        if !self.at_kw("package") {
            return Err(self.error("expected package clause"));
        }
        self.advance();
        let name_tok = self.expect_ident()?;
        self.record(name_tok, IdentRole::PackageName);
        self.out.package = PackageClause {
            name: self.tokens[name_tok].text.clone(),
            token: name_tok,
            import_comment: self.import_comment_after(name_tok),
        };
        self.expect_semi()?;

        while self.at_kw("import") {
            self.advance();
            if self.at_op("(") {
                self.advance();
                while !self.at_op(")") && !self.at_eof() {
                    self.import_spec()?;
                    self.expect_semi()?;
                }
                self.expect_op(")")?;
            } else {
                self.import_spec()?;
            }
            self.expect_semi()?;
        }
        if mode == ParseMode::Header {
            return Ok(());
        }

        while !self.at_eof() {
            if self.at_op(";") {
                self.advance();
                continue;
            }
            if self.at_kw("func") {
                self.func_decl()?;
            } else if self.at_kw("var") || self.at_kw("const") || self.at_kw("type") {
                self.gen_decl(true)?;
            } else {
                return Err(self.error(format!("expected declaration, found `{}`", self.text())));
            }
            if !self.at_eof() {
                self.expect_semi()?;
            }
        }
        Ok(())
    }

    /// `// import "path"` comment on the same line as the package clause.
    fn import_comment_after(&self, tok: usize) -> Option<usize> {
        for (i, t) in self.tokens.iter().enumerate().skip(tok + 1) {
            match t.kind {
                TokenKind::Whitespace if t.text.contains('\n') => return None,
                TokenKind::Whitespace => {}
                TokenKind::Comment => {
                    let body = t.text.trim_start_matches("//").trim_start_matches("/*").trim_start();
                    let is_import = body
                        .strip_prefix("import")
                        .is_some_and(|rest| rest.trim_start().starts_with('"'));
                    return is_import.then_some(i);
                }
                _ => return None,
            }
        }
        None
    }

    fn import_spec(&mut self) -> ObfuscateResult<()> {
        let alias = if self.at_ident() {
            let tok = self.expect_ident()?;
            self.record(tok, IdentRole::PackageName);
            Some(self.tokens[tok].text.clone())
        } else if self.at_op(".") {
            self.advance();
            Some(".".to_string())
        } else {
            None
        };
        let s = self.peek();
        let tok = match s.tok {
            Some(i) if s.kind.is_string() => i,
            _ => return Err(self.error("expected import path")),
        };
        self.string_site(tok, StringContext::Import);
        let raw = unquote(&self.tokens[tok].text).ok_or_else(|| self.error("malformed import path"))?;
        self.out.imports.push(ImportSpec {
            alias,
            path: String::from_utf8_lossy(&raw).into_owned(),
            path_token: tok,
        });
        self.advance();
        Ok(())
    }

    // ---- declarations ----

    fn gen_decl(&mut self, top: bool) -> ObfuscateResult<()> {
        let kw = self.text();
        self.advance();
        if self.at_op("(") {
            self.advance();
            while !self.at_op(")") && !self.at_eof() {
                self.spec(kw, top)?;
                self.expect_semi()?;
            }
            self.expect_op(")")
        } else {
            self.spec(kw, top)
        }
    }

    fn spec(&mut self, kw: &str, top: bool) -> ObfuscateResult<()> {
        match kw {
            "type" => self.type_spec(top),
            "const" => self.with_ctx(StringContext::Constant, |p| p.value_spec(top, DeclKind::Const)),
            _ => self.value_spec(top, DeclKind::Var),
        }
    }

    fn value_spec(&mut self, top: bool, kind: DeclKind) -> ObfuscateResult<()> {
        let role = if top { IdentRole::PackageDecl } else { IdentRole::LocalDecl };
        let mut names = Vec::new();
        loop {
            let tok = self.expect_ident()?;
            self.record(tok, role.clone());
            names.push(tok);
            if self.at_op(",") {
                self.advance();
            } else {
                break;
            }
        }

        let declared = if !self.at_op("=") && !self.at_op(";") && !self.at_op(")") && !self.at_eof() {
            Some(self.type_()?)
        } else {
            None
        };
        if self.at_op("=") {
            self.advance();
            loop {
                let value = self.expr()?;
                if let Some(ty) = declared.as_ref().filter(|ty| !ty.is_plain_string()) {
                    self.mark_typed(&value, Some(ty));
                }
                if self.at_op(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        for tok in names {
            if top {
                let name = self.tokens[tok].text.clone();
                self.out.decls.push(TopLevelDecl { name, kind: kind.clone(), token: tok });
            } else {
                self.declare_token(tok);
            }
        }
        Ok(())
    }

    fn type_spec(&mut self, top: bool) -> ObfuscateResult<()> {
        let tok = self.expect_ident()?;
        let name = self.tokens[tok].text.clone();
        self.record(tok, if top { IdentRole::PackageDecl } else { IdentRole::LocalDecl });
        if !top {
            self.declare(&name);
        }

        let generic = self.at_op("[")
            && self.at_ident_n(1)
            && (self.at_ident_n(2)
                || self.peek_n(2).kind == TokenKind::Keyword
                || self.at_op_n(2, ",")
                || self.at_op_n(2, "~")
                || self.at_op_n(2, "[")
                || (self.at_op_n(2, "*") && self.comma_before_close()));
        if generic {
            self.open();
            self.type_params()?;
        }
        if self.at_op("=") {
            self.advance();
        }
        let underlying = self.type_()?;
        if generic {
            self.close();
        }

        let decl = TypeDecl { name: name.clone(), underlying };
        if top {
            self.out.decls.push(TopLevelDecl { name, kind: DeclKind::Type, token: tok });
            self.out.types.push(decl);
        } else {
            self.out.local_types.push(decl);
        }
        Ok(())
    }

    /// After `[`: whether a top-level `,` comes before the matching `]`.
    /// `[P *C,]` is a type parameter list, `[N * M]` an array length.
    fn comma_before_close(&self) -> bool {
        let mut depth = 0usize;
        let mut n = 1;
        loop {
            let sig = self.peek_n(n);
            if sig.eof {
                return false;
            }
            if sig.kind == TokenKind::Op {
                match self.text_n(n) {
                    "(" | "[" | "{" => depth += 1,
                    "]" if depth == 0 => return false,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    "," if depth == 0 => return true,
                    _ => {}
                }
            }
            n += 1;
        }
    }

    fn type_params(&mut self) -> ObfuscateResult<()> {
        self.expect_op("[")?;
        while !self.at_op("]") && !self.at_eof() {
            loop {
                let tok = self.expect_ident()?;
                self.record(tok, IdentRole::LocalDecl);
                self.declare_token(tok);
                if self.at_op(",") && self.at_ident_n(1) && !self.at_op_n(2, "]") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.constraint()?;
            if self.at_op(",") {
                self.advance();
            }
        }
        self.expect_op("]")
    }

    fn constraint(&mut self) -> ObfuscateResult<()> {
        loop {
            if self.at_op("~") {
                self.advance();
            }
            self.type_()?;
            if self.at_op("|") {
                self.advance();
            } else {
                return Ok(());
            }
        }
    }

    fn func_decl(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.open();
        let receiver = if self.at_op("(") { Some(self.receiver()?) } else { None };
        let tok = self.expect_ident()?;
        let name = self.tokens[tok].text.clone();
        match receiver {
            Some(receiver) => {
                self.record(tok, IdentRole::MemberDecl);
                self.out.decls.push(TopLevelDecl { name, kind: DeclKind::Method { receiver }, token: tok });
            }
            None => {
                self.record(tok, IdentRole::PackageDecl);
                self.out.decls.push(TopLevelDecl { name, kind: DeclKind::Func, token: tok });
            }
        }
        if self.at_op("[") {
            self.type_params()?;
        }
        self.signature()?;
        if self.at_op("{") {
            self.body()?;
        }
        self.close();
        Ok(())
    }

    /// `(r *T[A, B])`; returns the receiver base type name.
    fn receiver(&mut self) -> ObfuscateResult<String> {
        self.expect_op("(")?;
        let mut name_tok = None;
        if self.at_ident() && (self.at_ident_n(1) || self.at_op_n(1, "*")) {
            let tok = self.expect_ident()?;
            self.record(tok, IdentRole::LocalDecl);
            name_tok = Some(tok);
        }
        if self.at_op("*") {
            self.advance();
        }
        let base = self.expect_ident()?;
        self.reference(base);
        if self.at_op("[") {
            self.advance();
            while !self.at_op("]") && !self.at_eof() {
                let tok = self.expect_ident()?;
                self.record(tok, IdentRole::LocalDecl);
                self.declare_token(tok);
                if self.at_op(",") {
                    self.advance();
                }
            }
            self.expect_op("]")?;
        }
        self.expect_op(")")?;
        if let Some(tok) = name_tok {
            self.declare_token(tok);
        }
        Ok(self.tokens[base].text.clone())
    }

    fn starts_type(&self) -> bool {
        self.at_ident()
            || self.at_op("*")
            || self.at_op("[")
            || self.at_op("<-")
            || ["func", "map", "chan", "struct", "interface"].iter().any(|kw| self.at_kw(kw))
    }

    fn signature(&mut self) -> ObfuscateResult<()> {
        self.params()?;
        if self.at_op("(") {
            self.params()?;
        } else if self.starts_type() {
            self.type_()?;
        }
        Ok(())
    }

    /// Whether the identifier at the cursor names a parameter (rather than being its type).
    fn param_has_name(&self) -> bool {
        let next = self.peek_n(1);
        match next.kind {
            TokenKind::Ident => true,
            TokenKind::Keyword => {
                matches!(self.text_n(1), "func" | "map" | "chan" | "struct" | "interface")
            }
            TokenKind::Op => match self.text_n(1) {
                "*" | "..." | "<-" | "(" => true,
                "[" => match self.matching_bracket(1) {
                    Some(close) => !(self.at_op_n(close + 1, ",") || self.at_op_n(close + 1, ")")),
                    None => false,
                },
                _ => false,
            },
            _ => false,
        }
    }

    fn params(&mut self) -> ObfuscateResult<()> {
        self.expect_op("(")?;
        let mut names = Vec::new();
        let mut lone = Vec::new();
        let mut named = false;
        while !self.at_op(")") && !self.at_eof() {
            if self.at_ident() && self.param_has_name() {
                let tok = self.expect_ident()?;
                self.record(tok, IdentRole::LocalDecl);
                names.push(tok);
                named = true;
                if self.at_op("...") {
                    self.advance();
                }
                self.type_()?;
            } else {
                if self.at_op("...") {
                    self.advance();
                }
                let start = self.pos;
                let before = self.out.idents.len();
                self.type_()?;
                if self.pos == start + 1 && self.out.idents.len() == before + 1 {
                    lone.push(before);
                }
            }
            if self.at_op(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.expect_op(")")?;

        if named {
            for occ in lone {
                self.out.idents[occ].role = IdentRole::LocalDecl;
                names.push(self.out.idents[occ].token);
            }
        }
        for tok in names {
            self.declare_token(tok);
        }
        Ok(())
    }

    // ---- types ----

    fn type_(&mut self) -> ObfuscateResult<TypeExpr> {
        if self.at_ident() {
            return self.type_name();
        }
        match self.text() {
            "*" => {
                self.advance();
                Ok(TypeExpr::Pointer(Box::new(self.type_()?)))
            }
            "[" => {
                self.advance();
                if self.at_op("]") {
                    self.advance();
                    return Ok(TypeExpr::Slice(Box::new(self.type_()?)));
                }
                if self.at_op("...") {
                    self.advance();
                } else {
                    self.expr_lev += 1;
                    self.with_ctx(StringContext::ArrayLength, |p| p.expr())?;
                    self.expr_lev -= 1;
                }
                self.expect_op("]")?;
                Ok(TypeExpr::Array(Box::new(self.type_()?)))
            }
            "(" => {
                self.advance();
                let ty = self.type_()?;
                self.expect_op(")")?;
                Ok(ty)
            }
            "~" => {
                self.advance();
                self.type_()
            }
            "<-" => {
                self.advance();
                if !self.at_kw("chan") {
                    return Err(self.error("expected `chan`"));
                }
                self.advance();
                self.type_()?;
                Ok(TypeExpr::Other)
            }
            "map" if self.at_kw("map") => {
                self.advance();
                self.expect_op("[")?;
                let key = self.type_()?;
                self.expect_op("]")?;
                let value = self.type_()?;
                Ok(TypeExpr::Map { key: Box::new(key), value: Box::new(value) })
            }
            "chan" if self.at_kw("chan") => {
                self.advance();
                if self.at_op("<-") {
                    self.advance();
                }
                self.type_()?;
                Ok(TypeExpr::Other)
            }
            "func" if self.at_kw("func") => {
                self.advance();
                self.open();
                self.signature()?;
                self.close();
                Ok(TypeExpr::Other)
            }
            "struct" if self.at_kw("struct") => {
                self.struct_type()?;
                Ok(TypeExpr::Struct)
            }
            "interface" if self.at_kw("interface") => {
                self.interface_type()?;
                Ok(TypeExpr::Other)
            }
            other => Err(self.error(format!("expected type, found `{other}`"))),
        }
    }

    fn type_name(&mut self) -> ObfuscateResult<TypeExpr> {
        let tok = self.expect_ident()?;
        let first = self.tokens[tok].text.clone();
        let local = self.is_local(&first);
        let occ = self.reference(tok);
        let (qualifier, name) = if self.at_op(".") && self.at_ident_n(1) {
            self.advance();
            let sel = self.expect_ident()?;
            self.record(sel, IdentRole::Selector { base: Some(occ) });
            (Some(first), self.tokens[sel].text.clone())
        } else {
            (None, first)
        };
        if self.at_op("[") {
            self.type_args()?;
        }
        let local = local && qualifier.is_none();
        Ok(TypeExpr::Named { qualifier, name, local })
    }

    fn type_args(&mut self) -> ObfuscateResult<()> {
        self.expect_op("[")?;
        self.expr_lev += 1;
        while !self.at_op("]") && !self.at_eof() {
            self.type_()?;
            if self.at_op(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.expr_lev -= 1;
        self.expect_op("]")
    }

    fn struct_type(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.expect_op("{")?;
        while !self.at_op("}") && !self.at_eof() {
            self.field_decl()?;
            self.expect_semi()?;
        }
        self.expect_op("}")
    }

    fn field_decl(&mut self) -> ObfuscateResult<()> {
        if self.at_op("*") {
            self.advance();
            self.embedded()?;
        } else if self.at_ident() {
            let next = self.peek_n(1);
            let embedded = next.kind.is_string()
                || self.at_op_n(1, ".")
                || self.at_op_n(1, ";")
                || self.at_op_n(1, "}")
                || (self.at_op_n(1, "[")
                    && self.matching_bracket(1).is_some_and(|close| {
                        self.at_op_n(close + 1, ";")
                            || self.at_op_n(close + 1, "}")
                            || self.peek_n(close + 1).kind.is_string()
                    }));
            if embedded {
                self.embedded()?;
            } else {
                loop {
                    let tok = self.expect_ident()?;
                    self.record(tok, IdentRole::MemberDecl);
                    if self.at_op(",") {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.type_()?;
            }
        } else {
            return Err(self.error(format!("expected field declaration, found `{}`", self.text())));
        }

        let s = self.peek();
        if let (Some(tok), true) = (s.tok, s.kind.is_string()) {
            self.string_site(tok, StringContext::Tag);
            self.advance();
        }
        Ok(())
    }

    fn embedded(&mut self) -> ObfuscateResult<()> {
        let tok = self.expect_ident()?;
        let first = self.tokens[tok].text.clone();
        let occ = self.reference(tok);
        let (qualifier, name) = if self.at_op(".") {
            self.advance();
            let sel = self.expect_ident()?;
            self.record(sel, IdentRole::Selector { base: Some(occ) });
            (Some(first), self.tokens[sel].text.clone())
        } else {
            (None, first)
        };
        if self.at_op("[") {
            self.type_args()?;
        }
        self.out.embedded.push(EmbeddedType { qualifier, name });
        Ok(())
    }

    fn interface_type(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.expect_op("{")?;
        while !self.at_op("}") && !self.at_eof() {
            if self.at_ident() && self.at_op_n(1, "(") {
                let tok = self.expect_ident()?;
                self.record(tok, IdentRole::MemberDecl);
                self.open();
                self.signature()?;
                self.close();
            } else {
                self.constraint()?;
            }
            self.expect_semi()?;
        }
        self.expect_op("}")
    }

    // ---- expressions ----

    fn expr(&mut self) -> ObfuscateResult<Expr> {
        self.binary_expr(1)
    }

    fn expr_list(&mut self) -> ObfuscateResult<Vec<Expr>> {
        let mut list = vec![self.expr()?];
        while self.at_op(",") {
            self.advance();
            list.push(self.expr()?);
        }
        Ok(list)
    }

    fn binary_prec(&self) -> Option<u8> {
        let s = self.peek();
        if s.kind != TokenKind::Op || s.tok.is_none() {
            return None;
        }
        match self.text() {
            "||" => Some(1),
            "&&" => Some(2),
            "==" | "!=" | "<" | "<=" | ">" | ">=" => Some(3),
            "+" | "-" | "|" | "^" => Some(4),
            "*" | "/" | "%" | "<<" | ">>" | "&" | "&^" => Some(5),
            _ => None,
        }
    }

    fn binary_expr(&mut self, min_prec: u8) -> ObfuscateResult<Expr> {
        let mut x = self.unary_expr()?;
        while let Some(prec) = self.binary_prec() {
            if prec < min_prec {
                break;
            }
            self.advance();
            self.binary_expr(prec + 1)?;
            x = Expr::Other;
        }
        Ok(x)
    }

    fn unary_expr(&mut self) -> ObfuscateResult<Expr> {
        if self.peek().kind == TokenKind::Op
            && matches!(self.text(), "+" | "-" | "!" | "^" | "&" | "*" | "~" | "<-")
        {
            self.advance();
            self.unary_expr()?;
            return Ok(Expr::Other);
        }
        self.primary_expr()
    }

    fn is_literal_type(&self, x: &Expr) -> bool {
        match x {
            Expr::Ident(_) | Expr::Qualified { .. } | Expr::Instance(_) => true,
            Expr::Type(ty) => !matches!(ty, TypeExpr::Other),
            _ => false,
        }
    }

    fn primary_expr(&mut self) -> ObfuscateResult<Expr> {
        let mut x = self.operand()?;
        loop {
            if self.at_op(".") {
                self.advance();
                if self.at_ident() {
                    let tok = self.expect_ident()?;
                    let base = match x {
                        Expr::Ident(occ) => Some(occ),
                        _ => None,
                    };
                    let sel = self.record(tok, IdentRole::Selector { base });
                    x = match base {
                        Some(base) => Expr::Qualified { base, sel },
                        None => Expr::Other,
                    };
                } else if self.at_op("(") {
                    self.advance();
                    if self.at_kw("type") {
                        self.advance();
                        self.expect_op(")")?;
                        x = Expr::TypeSwitchGuard;
                    } else {
                        self.expr_lev += 1;
                        self.type_()?;
                        self.expr_lev -= 1;
                        self.expect_op(")")?;
                        x = Expr::Other;
                    }
                } else {
                    return Err(self.error("expected selector or type assertion"));
                }
            } else if self.at_op("[") {
                self.advance();
                self.expr_lev += 1;
                if !self.at_op(":") {
                    self.expr()?;
                }
                let sliced = self.at_op(":");
                if sliced {
                    self.advance();
                    if !self.at_op("]") && !self.at_op(":") {
                        self.expr()?;
                    }
                    if self.at_op(":") {
                        self.advance();
                        self.expr()?;
                    }
                } else {
                    while self.at_op(",") {
                        self.advance();
                        if self.at_op("]") {
                            break;
                        }
                        self.expr()?;
                    }
                }
                self.expr_lev -= 1;
                self.expect_op("]")?;
                x = match x {
                    Expr::Ident(_) | Expr::Qualified { .. } if !sliced => Expr::Instance(Box::new(x)),
                    Expr::Instance(_) if !sliced => x,
                    _ => Expr::Other,
                };
            } else if self.at_op("(") {
                self.advance();
                self.expr_lev += 1;
                while !self.at_op(")") && !self.at_eof() {
                    self.expr()?;
                    if self.at_op("...") {
                        self.advance();
                    }
                    if self.at_op(",") {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expr_lev -= 1;
                self.expect_op(")")?;
                x = Expr::Other;
            } else if self.at_op("{")
                && self.is_literal_type(&x)
                && (self.expr_lev >= 0 || matches!(x, Expr::Type(_)))
            {
                let lit = self.type_of(&x);
                self.composite_lit(Some(lit))?;
                x = Expr::Other;
            } else {
                return Ok(x);
            }
        }
    }

    fn operand(&mut self) -> ObfuscateResult<Expr> {
        let s = self.peek();
        match (s.kind, s.tok) {
            (TokenKind::Ident, Some(tok)) => {
                self.advance();
                Ok(Expr::Ident(self.reference(tok)))
            }
            (TokenKind::Number | TokenKind::Rune, _) => {
                self.advance();
                Ok(Expr::Other)
            }
            (TokenKind::String | TokenKind::RawString, Some(tok)) => {
                self.advance();
                Ok(Expr::StringLit(self.string_site(tok, self.string_ctx)))
            }
            (TokenKind::Op, _) if self.at_op("(") => {
                self.advance();
                self.expr_lev += 1;
                self.expr()?;
                self.expr_lev -= 1;
                self.expect_op(")")?;
                Ok(Expr::Other)
            }
            (TokenKind::Op, _) if self.at_op("[") => Ok(Expr::Type(self.type_()?)),
            (TokenKind::Keyword, _) if self.at_kw("func") => {
                self.advance();
                self.open();
                self.signature()?;
                if self.at_op("{") {
                    self.body()?;
                }
                self.close();
                Ok(Expr::Other)
            }
            (TokenKind::Keyword, _)
                if ["map", "chan", "struct", "interface"].iter().any(|kw| self.at_kw(kw)) =>
            {
                Ok(Expr::Type(self.type_()?))
            }
            _ => Err(self.error(format!("expected operand, found `{}`", self.text()))),
        }
    }

    fn composite_lit(&mut self, lit: Option<TypeExpr>) -> ObfuscateResult<()> {
        self.expect_op("{")?;
        let old = self.expr_lev;
        self.expr_lev = 1;

        let (key_ty, elem_ty) = match &lit {
            Some(TypeExpr::Map { key, value }) => (Some((**key).clone()), Some((**value).clone())),
            Some(TypeExpr::Slice(elem)) | Some(TypeExpr::Array(elem)) => (None, Some((**elem).clone())),
            _ => (None, None),
        };
        let element = lit.as_ref().map(|ty| TypeExpr::Element(Box::new(ty.clone())));

        while !self.at_op("}") && !self.at_eof() {
            let first = self.element_part(&lit, &element)?;
            if self.at_op(":") {
                self.mark_typed(&first, key_ty.as_ref());
                self.advance();
                let value = if self.at_op("{") {
                    self.composite_lit(element.clone())?;
                    Expr::Other
                } else {
                    self.expr()?
                };
                self.mark_typed(&value, elem_ty.as_ref());
            } else {
                self.mark_typed(&first, elem_ty.as_ref());
            }
            if self.at_op(",") {
                self.advance();
            } else {
                break;
            }
        }

        self.expr_lev = old;
        self.expect_op("}")
    }

    fn element_part(&mut self, lit: &Option<TypeExpr>, element: &Option<TypeExpr>) -> ObfuscateResult<Expr> {
        if self.at_op("{") {
            self.composite_lit(element.clone())?;
            return Ok(Expr::Other);
        }
        if self.at_ident() && self.at_op_n(1, ":") {
            let tok = self.expect_ident()?;
            let local = self.is_local(&self.tokens[tok].text);
            self.record(tok, IdentRole::Key { literal: lit.clone(), local });
            return Ok(Expr::Other);
        }
        self.expr()
    }

    // ---- statements ----

    /// Function body: statements share the scope opened for the signature.
    fn body(&mut self) -> ObfuscateResult<()> {
        self.expect_op("{")?;
        let old = self.expr_lev;
        self.expr_lev = 0;
        self.stmt_list()?;
        self.expr_lev = old;
        self.expect_op("}")
    }

    fn block(&mut self) -> ObfuscateResult<()> {
        self.open();
        let result = self.body();
        self.close();
        result
    }

    fn at_clause_end(&self) -> bool {
        self.at_op("}") || self.at_kw("case") || self.at_kw("default") || self.at_eof()
    }

    fn stmt_list(&mut self) -> ObfuscateResult<()> {
        while !self.at_clause_end() {
            self.stmt()?;
            if self.at_clause_end() {
                break;
            }
            self.expect_semi()?;
        }
        Ok(())
    }

    fn stmt(&mut self) -> ObfuscateResult<()> {
        if self.peek().kind == TokenKind::Keyword {
            match self.text() {
                "var" | "const" | "type" => return self.gen_decl(false),
                "return" => {
                    self.advance();
                    if !self.at_stmt_end() {
                        self.expr_list()?;
                    }
                }
                "break" | "continue" | "goto" => {
                    self.advance();
                    if self.at_ident() {
                        let tok = self.expect_ident()?;
                        self.record(tok, IdentRole::Label);
                    }
                }
                "fallthrough" => self.advance(),
                "go" | "defer" => {
                    self.advance();
                    self.expr()?;
                }
                "if" => return self.if_stmt(),
                "for" => return self.for_stmt(),
                "switch" => return self.switch_stmt(),
                "select" => return self.select_stmt(),
                "func" | "map" | "chan" | "struct" | "interface" => {
                    self.simple_stmt(false)?;
                }
                other => return Err(self.error(format!("unexpected `{other}`"))),
            }
            return Ok(());
        }
        if self.at_op("{") {
            return self.block();
        }
        if self.at_op(";") {
            return Ok(());
        }
        if self.at_ident() && self.at_op_n(1, ":") {
            let tok = self.expect_ident()?;
            self.record(tok, IdentRole::Label);
            self.advance();
            if self.at_clause_end() || self.at_op(";") {
                return Ok(());
            }
            return self.stmt();
        }
        self.simple_stmt(false)?;
        Ok(())
    }

    fn declare_lhs(&mut self, lhs: &[Expr]) {
        for expr in lhs {
            if let Expr::Ident(occ) = expr {
                self.out.idents[*occ].role = IdentRole::LocalDecl;
                let tok = self.out.idents[*occ].token;
                self.declare_token(tok);
            }
        }
    }

    fn simple_stmt(&mut self, range_ok: bool) -> ObfuscateResult<Simple> {
        if range_ok && self.at_kw("range") {
            self.advance();
            self.expr()?;
            return Ok(Simple::Range);
        }
        let lhs = self.expr_list()?;

        if self.at_op(":=") {
            self.advance();
            if range_ok && self.at_kw("range") {
                self.advance();
                self.expr()?;
                self.declare_lhs(&lhs);
                return Ok(Simple::Range);
            }
            let rhs = self.expr_list()?;
            self.declare_lhs(&lhs);
            return Ok(if rhs == [Expr::TypeSwitchGuard] { Simple::TypeSwitch } else { Simple::Plain });
        }
        if self.peek().kind == TokenKind::Op && ASSIGN_OPS.contains(&self.text()) {
            self.advance();
            if range_ok && self.at_kw("range") {
                self.advance();
                self.expr()?;
                return Ok(Simple::Range);
            }
            self.expr_list()?;
            return Ok(Simple::Plain);
        }
        if self.at_op("++") || self.at_op("--") {
            self.advance();
            return Ok(Simple::Plain);
        }
        if self.at_op("<-") {
            self.advance();
            self.expr()?;
            return Ok(Simple::Plain);
        }
        Ok(if lhs == [Expr::TypeSwitchGuard] { Simple::TypeSwitch } else { Simple::Plain })
    }

    fn if_stmt(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.open();
        let old = self.expr_lev;
        self.expr_lev = -1;
        if !self.at_op("{") {
            self.simple_stmt(false)?;
            if self.at_op(";") {
                self.advance();
                self.simple_stmt(false)?;
            }
        }
        self.expr_lev = old;
        self.block()?;
        if self.at_kw("else") {
            self.advance();
            if self.at_kw("if") {
                self.if_stmt()?;
            } else {
                self.block()?;
            }
        }
        self.close();
        Ok(())
    }

    fn for_stmt(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.open();
        let old = self.expr_lev;
        self.expr_lev = -1;
        if !self.at_op("{") {
            let kind = if self.at_op(";") { Simple::Plain } else { self.simple_stmt(true)? };
            if kind != Simple::Range && self.at_op(";") {
                self.advance();
                if !self.at_op(";") {
                    self.simple_stmt(false)?;
                }
                self.expect_op(";")?;
                if !self.at_op("{") {
                    self.simple_stmt(false)?;
                }
            }
        }
        self.expr_lev = old;
        self.block()?;
        self.close();
        Ok(())
    }

    fn switch_stmt(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.open();
        let old = self.expr_lev;
        self.expr_lev = -1;
        let mut kind = Simple::Plain;
        let mut tagged = false;
        if !self.at_op("{") {
            if !self.at_op(";") {
                kind = self.simple_stmt(false)?;
                tagged = true;
            }
            if self.at_op(";") {
                self.advance();
                tagged = false;
                if !self.at_op("{") {
                    kind = self.simple_stmt(false)?;
                    tagged = true;
                }
            }
        }
        self.expr_lev = old;
        let type_switch = kind == Simple::TypeSwitch;

        self.expect_op("{")?;
        while !self.at_op("}") && !self.at_eof() {
            self.open();
            if self.at_kw("case") {
                self.advance();
                if type_switch {
                    self.with_ctx(StringContext::CaseClause, |p| loop {
                        p.type_()?;
                        if p.at_op(",") {
                            p.advance();
                        } else {
                            return Ok(());
                        }
                    })?;
                } else if tagged {
                    // Compared against the tag, whose type may be a named string type.
                    self.with_ctx(StringContext::CaseClause, |p| p.expr_list().map(|_| ()))?;
                } else {
                    self.expr_list()?;
                }
            } else if self.at_kw("default") {
                self.advance();
            } else {
                return Err(self.error("expected `case` or `default`"));
            }
            self.expect_op(":")?;
            self.stmt_list()?;
            self.close();
        }
        self.expect_op("}")?;
        self.close();
        Ok(())
    }

    fn select_stmt(&mut self) -> ObfuscateResult<()> {
        self.advance();
        self.expect_op("{")?;
        while !self.at_op("}") && !self.at_eof() {
            self.open();
            if self.at_kw("case") {
                self.advance();
                self.simple_stmt(false)?;
            } else if self.at_kw("default") {
                self.advance();
            } else {
                return Err(self.error("expected `case` or `default`"));
            }
            self.expect_op(":")?;
            self.stmt_list()?;
            self.close();
        }
        self.expect_op("}")
    }
}
