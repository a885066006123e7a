//! The token-level scanner.
//!
//! Produces a lazy token stream over a UTF-8 buffer (optional BOM). Tokens
//! carry their verbatim text: strings keep their quotes, symbols their
//! leading marker, quoted paths their surrounding `'`. Lexical errors yield
//! an [`TokenKind::Invalid`] token whose text is the diagnostic message;
//! the caller decides how to unwind.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};

use crate::unicode::{decode_utf8, is_digit, is_forbidden_fs_char, is_letter, is_space};

/// Source position; `row` is 1-based, `col` 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCol {
    pub row: u32,
    pub col: u32,
}

impl RowCol {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for RowCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// Token kinds; the `strum` serializations double as the keyword table and
/// as the display form used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum TokenKind {
    #[strum(serialize = "<invalid>")]
    Invalid,

    // punctuation
    #[strum(serialize = "!")]
    Bang,
    #[strum(serialize = "!=")]
    BangEq,
    #[strum(serialize = "#")]
    Hash,
    #[strum(serialize = "##")]
    Hash2,
    #[strum(serialize = "$")]
    Dollar,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "&")]
    Amp,
    #[strum(serialize = "&&")]
    Amp2,
    #[strum(serialize = "(")]
    Lpar,
    #[strum(serialize = ")")]
    Rpar,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "*/")]
    Rcmt,
    #[strum(serialize = "*=")]
    StarEq,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "+=")]
    PlusEq,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "-=")]
    MinusEq,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "/*")]
    Lcmt,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = ":=")]
    ColonEq,
    #[strum(serialize = ";")]
    Semi,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Leq,
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "==")]
    Eq2,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Geq,
    #[strum(serialize = "?")]
    Qmark,
    #[strum(serialize = "[")]
    Lbrack,
    #[strum(serialize = "[]")]
    LbrackRbrack,
    #[strum(serialize = "]")]
    Rbrack,
    #[strum(serialize = "^")]
    Hat,
    #[strum(serialize = "`")]
    Backtick,
    #[strum(serialize = "{", to_string = "{{")]
    Lbrace,
    #[strum(serialize = "||")]
    Bar2,
    #[strum(serialize = "}", to_string = "}}")]
    Rbrace,

    // keywords
    #[strum(serialize = "begin")]
    KwBegin,
    #[strum(serialize = "class")]
    KwClass,
    #[strum(serialize = "define")]
    KwDefine,
    #[strum(serialize = "else")]
    KwElse,
    #[strum(serialize = "elsif")]
    KwElsif,
    #[strum(serialize = "end")]
    KwEnd,
    #[strum(serialize = "false")]
    KwFalse,
    #[strum(serialize = "if")]
    KwIf,
    #[strum(serialize = "import")]
    KwImport,
    #[strum(serialize = "in")]
    KwIn,
    #[strum(serialize = "include")]
    KwInclude,
    #[strum(serialize = "let")]
    KwLet,
    #[strum(serialize = "param")]
    KwParam,
    #[strum(serialize = "subdir")]
    KwSubdir,
    #[strum(serialize = "submod")]
    KwSubmod,
    #[strum(serialize = "submodule")]
    KwSubmodule,
    #[strum(serialize = "then")]
    KwThen,
    #[strum(serialize = "true")]
    KwTrue,
    #[strum(serialize = "type")]
    KwType,
    #[strum(serialize = "var")]
    KwVar,

    // literal categories
    #[strum(serialize = "ident")]
    Ident,
    #[strum(serialize = "string")]
    LitString,
    #[strum(serialize = "integer")]
    LitInteger,
    #[strum(serialize = "real")]
    LitReal,
    #[strum(serialize = "path")]
    LitPath,
    #[strum(serialize = "symbol")]
    LitSymbol,

    #[strum(serialize = "<eof>")]
    Eof,
}

impl TokenKind {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            Self::KwBegin
                | Self::KwClass
                | Self::KwDefine
                | Self::KwElse
                | Self::KwElsif
                | Self::KwEnd
                | Self::KwFalse
                | Self::KwIf
                | Self::KwImport
                | Self::KwIn
                | Self::KwInclude
                | Self::KwLet
                | Self::KwParam
                | Self::KwSubdir
                | Self::KwSubmod
                | Self::KwSubmodule
                | Self::KwThen
                | Self::KwTrue
                | Self::KwType
                | Self::KwVar
        )
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Verbatim text, including quotes and symbol markers. For `Invalid`
    /// tokens this is the diagnostic message.
    pub text: String,
    pub loc: RowCol,
    /// Byte offset of the token's first character in its buffer; used to
    /// slice verbatim macro bodies out of the source.
    pub offset: usize,
    pub source: Rc<str>,
}

impl Token {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

pub struct Lexer {
    buf: Vec<u8>,
    /// byte offset of the current character
    pos: usize,
    /// decoded current character, 0 at end of input
    ch: u32,
    /// byte width of the current character
    width: usize,
    loc: RowCol,
    source: Rc<str>,
    queue: VecDeque<Token>,
}

impl Lexer {
    pub fn new(text: &str, source: Rc<str>) -> Self {
        let mut buf = text.as_bytes().to_vec();
        if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            buf.drain(..3);
        }
        let mut lexer = Self {
            buf,
            pos: 0,
            ch: 0,
            width: 0,
            loc: RowCol::new(1, 1),
            source,
            queue: VecDeque::new(),
        };
        lexer.load_char();
        lexer
    }

    pub fn source(&self) -> &Rc<str> {
        &self.source
    }

    fn load_char(&mut self) {
        if self.pos >= self.buf.len() {
            self.ch = 0;
            self.width = 0;
        } else {
            let (cp, n) = decode_utf8(&self.buf[self.pos..]);
            // ill-formed input surfaces as an invalid token downstream
            if n == 0 {
                self.ch = u32::from(self.buf[self.pos]);
                self.width = 1;
            } else {
                self.ch = cp;
                self.width = n;
            }
        }
    }

    fn advance(&mut self) {
        if self.width > 0 {
            self.pos += self.width;
            self.loc.col += 1;
        }
        self.load_char();
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn text_from(&self, start: usize) -> String {
        String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned()
    }

    fn token(&self, kind: TokenKind, start: usize, loc: RowCol) -> Token {
        Token { kind, text: self.text_from(start), loc, offset: start, source: self.source.clone() }
    }

    fn invalid(&self, loc: RowCol, message: impl Into<String>) -> Token {
        Token { kind: TokenKind::Invalid, text: message.into(), loc, offset: self.pos, source: self.source.clone() }
    }

    /// Verbatim buffer slice; used to capture macro bodies.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        std::str::from_utf8(&self.buf[start.min(self.buf.len())..end.min(self.buf.len())]).unwrap_or("")
    }

    fn skip_whitespace(&mut self) {
        while !self.at_end() && is_space(self.ch) {
            if self.ch == u32::from(b'\n') {
                self.loc.row += 1;
                self.loc.col = 0;
            }
            self.advance();
        }
    }

    /// Consumes the next token straight from the buffer, bypassing the
    /// peek queue.
    fn scan(&mut self) -> Token {
        self.skip_whitespace();
        let loc = self.loc;
        let start = self.pos;

        if self.at_end() {
            return Token { kind: TokenKind::Eof, text: String::new(), loc, offset: self.pos, source: self.source.clone() };
        }

        if is_letter(self.ch) || self.ch == u32::from(b'_') {
            return self.ident(start, loc);
        }
        if is_digit(self.ch) {
            return self.number(start, loc);
        }
        match self.ch {
            0x27 => self.path(start, loc, true), // '
            0x2E => {
                // '.'
                self.advance();
                match self.ch {
                    0x2E => {
                        self.advance();
                        if self.ch == u32::from(b'/') {
                            self.advance();
                            self.path(start, loc, false)
                        } else if is_space(self.ch) {
                            self.token(TokenKind::LitPath, start, loc)
                        } else {
                            self.invalid(loc, "expecting '/' after '..'")
                        }
                    }
                    0x2F => {
                        self.advance();
                        self.path(start, loc, false)
                    }
                    _ => {
                        if is_space(self.ch) {
                            self.token(TokenKind::LitPath, start, loc)
                        } else {
                            self.token(TokenKind::Dot, start, loc)
                        }
                    }
                }
            }
            0x2F => {
                // '/'
                self.advance();
                if self.ch == u32::from(b'/') {
                    self.advance();
                    self.path(start, loc, false)
                } else if self.ch == u32::from(b'*') {
                    self.advance();
                    if let Some(err) = self.block_comment() {
                        return self.invalid(loc, err);
                    }
                    self.scan()
                } else {
                    self.token(TokenKind::Slash, start, loc)
                }
            }
            0x23 => {
                // '#' line comment
                while !self.at_end() && self.ch != u32::from(b'\n') {
                    self.advance();
                }
                self.scan()
            }
            0x22 => self.string(start, loc),
            0x60 | 0x24 => self.symbol(start, loc), // ` or $
            _ => self.punct(start, loc),
        }
    }

    fn ident(&mut self, start: usize, loc: RowCol) -> Token {
        self.advance();
        while is_letter(self.ch) || is_digit(self.ch) || self.ch == u32::from(b'_') {
            self.advance();
        }
        let mut tok = self.token(TokenKind::Ident, start, loc);
        if let Ok(kw) = TokenKind::from_str(&tok.text) {
            if kw.is_keyword() {
                tok.kind = kw;
            }
        }
        tok
    }

    fn symbol(&mut self, start: usize, loc: RowCol) -> Token {
        self.advance();
        while is_letter(self.ch) || is_digit(self.ch) || self.ch == u32::from(b'_') {
            self.advance();
        }
        self.token(TokenKind::LitSymbol, start, loc)
    }

    fn number(&mut self, start: usize, loc: RowCol) -> Token {
        let first = self.ch;
        self.advance();
        if first == u32::from(b'0') && (self.ch == u32::from(b'x') || self.ch == u32::from(b'X')) {
            self.advance();
            while char::from_u32(self.ch).is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            return self.token(TokenKind::LitInteger, start, loc);
        }
        while is_digit(self.ch) {
            self.advance();
        }
        if self.ch == u32::from(b'.') || self.ch == u32::from(b'e') || self.ch == u32::from(b'E') {
            if self.ch == u32::from(b'.') {
                self.advance();
                if !is_digit(self.ch) {
                    return self.invalid(self.loc, "expecting a digit after '.'");
                }
                while is_digit(self.ch) {
                    self.advance();
                }
            }
            if self.ch == u32::from(b'e') || self.ch == u32::from(b'E') {
                self.advance();
                if self.ch == u32::from(b'+') || self.ch == u32::from(b'-') {
                    self.advance();
                }
                if !is_digit(self.ch) {
                    return self.invalid(self.loc, "expecting a digit after exponent");
                }
                while is_digit(self.ch) {
                    self.advance();
                }
            }
            self.token(TokenKind::LitReal, start, loc)
        } else {
            self.token(TokenKind::LitInteger, start, loc)
        }
    }

    fn string(&mut self, start: usize, loc: RowCol) -> Token {
        loop {
            self.advance();
            if self.at_end() {
                break;
            }
            if self.ch == u32::from(b'\n') {
                self.loc.row += 1;
                self.loc.col = 0;
            } else if self.ch == u32::from(b'\\') {
                let next = self.buf.get(self.pos + 1).copied();
                if next == Some(b'"') || next == Some(b'\\') {
                    self.advance();
                }
            } else if self.ch == u32::from(b'"') {
                break;
            }
        }
        if self.ch != u32::from(b'"') {
            return self.invalid(loc, "non-terminated string");
        }
        self.advance();
        self.token(TokenKind::LitString, start, loc)
    }

    fn block_comment(&mut self) -> Option<&'static str> {
        // "/*" already consumed; comments nest
        let mut level = 1;
        while !self.at_end() {
            self.advance();
            if self.ch == u32::from(b'*') {
                self.advance();
                if self.ch == u32::from(b'/') {
                    level -= 1;
                }
            } else if self.ch == u32::from(b'/') {
                self.advance();
                if self.ch == u32::from(b'*') {
                    level += 1;
                }
            }
            if self.ch == u32::from(b'\n') {
                self.loc.row += 1;
                self.loc.col = 0;
            }
            if level == 0 {
                break;
            }
        }
        self.advance();
        if level != 0 { Some("non-terminated comment") } else { None }
    }

    /// Scans a path token. For quoted paths the cursor sits on the opening
    /// `'`; otherwise the root (`//`, `./`, `../…/`) or bare prefix has
    /// already been consumed.
    fn path(&mut self, start: usize, loc: RowCol, quoted: bool) -> Token {
        if quoted {
            self.advance(); // opening quote
            if self.ch == u32::from(b'.') {
                self.advance();
                if self.ch == u32::from(b'.') {
                    self.advance();
                    if self.ch != u32::from(b'/') && self.ch != 0x27 {
                        return self.invalid(loc, "expecting '..' or '../path'");
                    }
                } else if self.ch != u32::from(b'/') && self.ch != 0x27 {
                    return self.invalid(loc, "expecting '.' or './path'");
                }
            } else if self.ch == u32::from(b'/') {
                self.advance();
                if self.ch != u32::from(b'/') {
                    return self.invalid(loc, "expecting '//' in the root of an absolute path");
                }
            } else if self.ch == 0x27 {
                return self.invalid(loc, "empty paths not allowed");
            }
        }

        let body_start = if quoted { start + 1 } else { start };
        let mut dotdot_prefix = self.buf[body_start..].starts_with(b"../");

        let mut last_slash: Option<usize> = self.buf[start..self.pos].iter().rposition(|&b| b == b'/').map(|i| start + i);
        let mut last_dot: Option<usize> = None;

        while !self.at_end() {
            if quoted && self.ch == u32::from(b'\\') && self.buf.get(self.pos + 1) == Some(&b'\'') {
                self.advance(); // skip over the escape marker
            } else if is_forbidden_fs_char(self.ch) {
                let c = char::from_u32(self.ch).unwrap_or('?');
                return self.invalid(self.loc, format!("cannot use '{c}' in a path"));
            } else if self.ch == u32::from(b':') {
                let diff = self.pos - body_start;
                let next = self.buf.get(self.pos + 1).copied();
                let next_ok = match next {
                    Some(b'/') => true,
                    Some(b) => b.is_ascii_whitespace() || (quoted && b == b'\''),
                    None => false,
                };
                let rooted = diff == 3
                    && self.buf[body_start] == b'/'
                    && self.buf[body_start + 1] == b'/'
                    && self.buf[body_start + 2].is_ascii_alphabetic();
                if !(rooted && next_ok) {
                    return self.invalid(self.loc, "':' can only be used in the root of an absolute path like //c:");
                }
            } else if self.ch == u32::from(b'/') {
                if let Some(ls) = last_slash {
                    match self.pos - ls {
                        1 => return self.invalid(self.loc, "'//' only allowed at the beginning of an absolute path"),
                        2 => {
                            if &self.buf[ls..=ls + 2] == b"/./" {
                                return self.invalid(self.loc, "'/./' not allowed in a path");
                            }
                        }
                        3 => {
                            if &self.buf[ls..=ls + 3] == b"/../" && !dotdot_prefix {
                                return self.invalid(self.loc, "'/../' not allowed in a path");
                            }
                        }
                        _ => {}
                    }
                }
                last_slash = Some(self.pos);
            } else if self.ch == u32::from(b'.') {
                if !dotdot_prefix && last_dot.is_some_and(|ld| self.pos - ld == 1) {
                    return self.invalid(self.loc, "pairs of '..' not allowed in a path");
                }
                last_dot = Some(self.pos);
            } else if !quoted && is_space(self.ch) {
                break;
            } else if quoted && self.ch == 0x27 {
                self.advance();
                break;
            } else {
                dotdot_prefix = false;
            }
            self.advance();
        }

        let tail = if quoted { 2 } else { 1 };
        if let Some(ls) = last_slash {
            if self.pos - ls == tail && self.pos - start > tail + 1 {
                return self.invalid(loc, "trailing '/' not allowed");
            }
        }
        self.token(TokenKind::LitPath, start, loc)
    }

    fn punct(&mut self, start: usize, loc: RowCol) -> Token {
        let one = char::from_u32(self.ch).unwrap_or('\u{FFFD}');
        let two_kind = self
            .buf
            .get(self.pos..self.pos + 2)
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| TokenKind::from_str(s).ok())
            .filter(|k| !k.is_keyword() && *k != TokenKind::Ident);
        if let Some(kind) = two_kind {
            self.advance();
            self.advance();
            return self.token(kind, start, loc);
        }
        let mut tmp = [0u8; 4];
        let one_kind = TokenKind::from_str(one.encode_utf8(&mut tmp)).ok().filter(|k| !k.is_keyword());
        match one_kind {
            Some(kind) => {
                self.advance();
                self.token(kind, start, loc)
            }
            None => {
                self.advance();
                self.invalid(loc, format!("unexpected symbol: {one}"))
            }
        }
    }

    /// Returns the next token, draining the peek queue first.
    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.queue.pop_front() {
            return tok;
        }
        self.scan()
    }

    /// Looks ahead `off` tokens (1-based) without consuming them.
    pub fn peek(&mut self, off: usize) -> Token {
        debug_assert!(off >= 1);
        while self.queue.len() < off {
            let tok = self.scan();
            let stop = tok.is(TokenKind::Invalid);
            self.queue.push_back(tok);
            if stop {
                break;
            }
        }
        self.queue.get(off - 1).cloned().unwrap_or_else(|| self.queue.back().cloned().expect("queue non-empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(text: &str) -> Vec<(TokenKind, String)> {
        let mut l = Lexer::new(text, Rc::from("test"));
        let mut out = Vec::new();
        loop {
            let t = l.next_token();
            if t.is(TokenKind::Eof) {
                break;
            }
            let stop = t.is(TokenKind::Invalid);
            out.push((t.kind, t.text));
            if stop {
                break;
            }
        }
        out
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex_all(text).into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("let x begin end submod foo_2"),
            vec![
                TokenKind::KwLet,
                TokenKind::Ident,
                TokenKind::KwBegin,
                TokenKind::KwEnd,
                TokenKind::KwSubmod,
                TokenKind::Ident
            ]
        );
    }

    #[test]
    fn numbers() {
        let toks = lex_all("12 0x1F 3.25 1.0e-4");
        assert_eq!(
            toks,
            vec![
                (TokenKind::LitInteger, "12".to_string()),
                (TokenKind::LitInteger, "0x1F".to_string()),
                (TokenKind::LitReal, "3.25".to_string()),
                (TokenKind::LitReal, "1.0e-4".to_string()),
            ]
        );
    }

    #[test]
    fn strings_keep_quotes_and_escapes() {
        let toks = lex_all(r#""a\"b" "x\\y""#);
        assert_eq!(toks[0], (TokenKind::LitString, r#""a\"b""#.to_string()));
        assert_eq!(toks[1], (TokenKind::LitString, r#""x\\y""#.to_string()));
    }

    #[test]
    fn symbols_keep_marker() {
        let toks = lex_all("`static $shared");
        assert_eq!(toks[0], (TokenKind::LitSymbol, "`static".to_string()));
        assert_eq!(toks[1], (TokenKind::LitSymbol, "$shared".to_string()));
    }

    #[test]
    fn paths() {
        let toks = lex_all("./a/b.c //usr/lib ../x .. . 'a b/c'");
        assert_eq!(
            toks,
            vec![
                (TokenKind::LitPath, "./a/b.c".to_string()),
                (TokenKind::LitPath, "//usr/lib".to_string()),
                (TokenKind::LitPath, "../x".to_string()),
                (TokenKind::LitPath, "..".to_string()),
                (TokenKind::LitPath, ".".to_string()),
                (TokenKind::LitPath, "'a b/c'".to_string()),
            ]
        );
    }

    #[test]
    fn path_validation() {
        assert_eq!(kinds("./a//b").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("./a/./b").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("./a/../b").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("./a..b").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("./a/ ").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("./a|b").last(), Some(&TokenKind::Invalid));
        assert_eq!(kinds("''").last(), Some(&TokenKind::Invalid));
        // windows drive root
        assert_eq!(kinds("//c:/x"), vec![TokenKind::LitPath]);
    }

    #[test]
    fn comments() {
        assert_eq!(kinds("a /* x /* nested */ y */ b # line\nc"), vec![TokenKind::Ident; 3]);
        assert_eq!(kinds("/* open").last(), Some(&TokenKind::Invalid));
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            kinds("= == := += -= *= != <= >= && || [ [] ] ? ^"),
            vec![
                TokenKind::Eq,
                TokenKind::Eq2,
                TokenKind::ColonEq,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::BangEq,
                TokenKind::Leq,
                TokenKind::Geq,
                TokenKind::Amp2,
                TokenKind::Bar2,
                TokenKind::Lbrack,
                TokenKind::LbrackRbrack,
                TokenKind::Rbrack,
                TokenKind::Qmark,
                TokenKind::Hat,
            ]
        );
    }

    #[test]
    fn dot_vs_path() {
        // 'a.b' is a designator: ident dot ident
        assert_eq!(kinds("a.b"), vec![TokenKind::Ident, TokenKind::Dot, TokenKind::Ident]);
    }

    #[test]
    fn peek_is_idempotent() {
        let mut l = Lexer::new("let x = 1", Rc::from("test"));
        let p = l.peek(1);
        let n = l.next_token();
        assert_eq!(p.kind, n.kind);
        assert_eq!(p.text, n.text);
        assert_eq!(p.loc, n.loc);
        let p3 = l.peek(3);
        assert_eq!(p3.kind, TokenKind::LitInteger);
        assert_eq!(l.next_token().kind, TokenKind::Ident);
        assert_eq!(l.next_token().kind, TokenKind::Eq);
        assert_eq!(l.next_token().kind, TokenKind::LitInteger);
        assert_eq!(l.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn positions() {
        let mut l = Lexer::new("let\n  x", Rc::from("test"));
        let t1 = l.next_token();
        assert_eq!(t1.loc, RowCol::new(1, 1));
        let t2 = l.next_token();
        assert_eq!(t2.loc, RowCol::new(2, 3));
    }

    #[test]
    fn bom_is_skipped() {
        let mut l = Lexer::new("\u{FEFF}let", Rc::from("test"));
        assert_eq!(l.next_token().kind, TokenKind::KwLet);
    }
}
