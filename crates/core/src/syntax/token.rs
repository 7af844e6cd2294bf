//! Lossless Go tokenizer.
//!
//! Every byte of the input ends up in exactly one token (whitespace and comments
//! included), so concatenating token texts reproduces the original file. The
//! parser works on the significant subset and inserts semicolons itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    Ident,
    Keyword,
    Number,
    Rune,
    String,
    RawString,
    Op,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_string(self) -> bool {
        matches!(self, TokenKind::String | TokenKind::RawString)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == kw
    }

    /// True when the token text spans a line break (needed for semicolon insertion).
    pub fn contains_newline(&self) -> bool {
        self.kind.is_trivia() && self.text.contains('\n')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

pub const KEYWORDS: &[&str] = &[
    "break",
    "case",
    "chan",
    "const",
    "continue",
    "default",
    "defer",
    "else",
    "fallthrough",
    "for",
    "func",
    "go",
    "goto",
    "if",
    "import",
    "interface",
    "map",
    "package",
    "range",
    "return",
    "select",
    "struct",
    "switch",
    "type",
    "var",
];

const OPS3: &[&str] = &["<<=", ">>=", "&^=", "..."];
const OPS2: &[&str] = &[
    "&&", "||", "<-", "++", "--", "==", "!=", "<=", ">=", ":=", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "<<", ">>", "&^",
];
const OPS1: &str = "+-*/%&|^<>=!()[]{},;.:~";

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError { line: self.line, column: self.column, message: message.into() }
    }

    fn number(&mut self) {
        let first = self.bump();
        let hex = first == Some('0') && matches!(self.peek(), Some('x' | 'X'));
        if hex {
            self.bump();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
                let exponent = if hex { matches!(c, 'p' | 'P') } else { matches!(c, 'e' | 'E') };
                if exponent && matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
            } else if c == '.' && self.peek_at(1) != Some('.') {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn quoted(&mut self, quote: char) -> Result<(), LexError> {
        self.bump();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("unterminated literal")),
                Some('\\') => {
                    self.bump();
                    if self.bump().is_none() {
                        return Err(self.error("unterminated escape sequence"));
                    }
                }
                Some(c) => {
                    self.bump();
                    if c == quote {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn raw_string(&mut self) -> Result<(), LexError> {
        self.bump();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated raw string")),
                Some('`') => return Ok(()),
                Some(_) => {}
            }
        }
    }

    fn block_comment(&mut self) -> Result<(), LexError> {
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated comment")),
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    fn operator(&mut self) -> Result<(), LexError> {
        let rest = &self.src[self.pos..];
        let len = OPS3
            .iter()
            .chain(OPS2.iter())
            .find(|op| rest.starts_with(**op))
            .map(|op| op.len())
            .or_else(|| rest.chars().next().filter(|c| OPS1.contains(*c)).map(|_| 1));
        match len {
            Some(n) => {
                for _ in 0..n {
                    self.bump();
                }
                Ok(())
            }
            None => Err(self.error(format!("unexpected character {:?}", self.peek().unwrap_or(' ')))),
        }
    }
}

/// Split Go source into a lossless token sequence.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let mut lx = Lexer { src, pos: 0, line: 1, column: 1 };
    let mut tokens = Vec::new();

    while let Some(c) = lx.peek() {
        let start = lx.pos;
        let (line, column) = (lx.line, lx.column);
        let kind = if c.is_whitespace() || c == '\u{feff}' {
            while lx.peek().is_some_and(|c| c.is_whitespace() || c == '\u{feff}') {
                lx.bump();
            }
            TokenKind::Whitespace
        } else if c == '/' && lx.peek_at(1) == Some('/') {
            while lx.peek().is_some_and(|c| c != '\n') {
                lx.bump();
            }
            TokenKind::Comment
        } else if c == '/' && lx.peek_at(1) == Some('*') {
            lx.block_comment()?;
            TokenKind::Comment
        } else if is_ident_start(c) {
            while lx.peek().is_some_and(is_ident_continue) {
                lx.bump();
            }
            if is_keyword(&src[start..lx.pos]) {
                TokenKind::Keyword
            } else {
                TokenKind::Ident
            }
        } else if c.is_ascii_digit() || (c == '.' && lx.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            lx.number();
            TokenKind::Number
        } else if c == '"' {
            lx.quoted('"')?;
            TokenKind::String
        } else if c == '\'' {
            lx.quoted('\'')?;
            TokenKind::Rune
        } else if c == '`' {
            lx.raw_string()?;
            TokenKind::RawString
        } else {
            lx.operator()?;
            TokenKind::Op
        };
        tokens.push(Token { kind, text: src[start..lx.pos].to_string(), line, column });
    }

    Ok(tokens)
}

/// Decode the value of a Go string literal (interpreted or raw) into bytes.
///
/// Returns `None` for malformed escapes; the tokenizer has already guaranteed the
/// literal is terminated.
pub fn unquote(literal: &str) -> Option<Vec<u8>> {
    if literal.len() >= 2 && literal.starts_with('`') && literal.ends_with('`') {
        let body = &literal[1..literal.len() - 1];
        return Some(body.bytes().filter(|b| *b != b'\r').collect());
    }
    if literal.len() < 2 || !literal.starts_with('"') || !literal.ends_with('"') {
        return None;
    }

    let body = &literal[1..literal.len() - 1];
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => {
                let hex: String = (0..2).filter_map(|_| chars.next()).collect();
                out.push(u8::from_str_radix(&hex, 16).ok()?);
            }
            d @ '0'..='7' => {
                let mut oct = String::from(d);
                oct.extend((0..2).filter_map(|_| chars.next()));
                let value = u32::from_str_radix(&oct, 8).ok()?;
                out.push(u8::try_from(value).ok()?);
            }
            u @ ('u' | 'U') => {
                let width = if u == 'u' { 4 } else { 8 };
                let hex: String = (0..width).filter_map(|_| chars.next()).collect();
                let ch = char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            _ => return None,
        }
    }
    Some(out)
}
