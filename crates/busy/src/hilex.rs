//! The macro-expansion lexer stack.
//!
//! Wraps [`Lexer`] with a push-down stack of scanners. Macro bodies and
//! argument substitutions are re-lexed as nested frames; every frame owns
//! its expansion text, records where that text sits in its parent
//! (`origin`), and carries the argument bindings installed for it. The
//! identifier-concatenation operator `a & b` is folded during look-ahead so
//! the parser only ever sees the fused identifier.

use std::collections::VecDeque;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::{Error, Frame as ErrorFrame, Result};
use crate::lexer::{Lexer, RowCol, Token, TokenKind};

/// Nesting bound for macro expansion.
pub const MAX_LEVEL: usize = 20;

/// A captured actual-argument: the tokens between two argument separators,
/// plus the location of the separator that opened it (used as the logical
/// origin of the substitution).
#[derive(Debug, Clone)]
pub struct TokenChain {
    pub source: Rc<str>,
    pub origin: RowCol,
    pub tokens: Vec<Token>,
}

impl TokenChain {
    /// Renders the chain as re-lexable text, tokens separated by single
    /// spaces.
    fn to_text(&self) -> String {
        let mut out = String::new();
        for tok in &self.tokens {
            out.push_str(&tok.text);
            out.push(' ');
        }
        out
    }
}

struct Frame {
    lexer: Lexer,
    /// Where this frame's text is located in its parent; `None` for the
    /// base frame.
    origin: Option<RowCol>,
    /// The parent-frame token that triggered the innermost nested frame;
    /// listed as "instantiated from here" when an error unwinds.
    reference: Option<Token>,
    args: Vec<(String, TokenChain)>,
}

pub struct HiLex {
    frames: SmallVec<[Frame; 4]>,
    queue: VecDeque<Token>,
    cur: Option<Token>,
}

impl HiLex {
    pub fn new(text: &str, source: Rc<str>) -> Self {
        let frame = Frame { lexer: Lexer::new(text, source), origin: None, reference: None, args: Vec::new() };
        Self { frames: SmallVec::from_iter([frame]), queue: VecDeque::new(), cur: None }
    }

    /// The source name of the innermost active frame.
    pub fn source(&self) -> Rc<str> {
        self.frames.last().expect("at least the base frame").lexer.source().clone()
    }

    /// Verbatim text of the innermost frame's buffer between two byte
    /// offsets; used to capture macro bodies.
    pub fn slice_top(&self, start: usize, end: usize) -> String {
        self.frames.last().expect("at least the base frame").lexer.slice(start, end).to_string()
    }

    pub fn level_count(&self) -> usize {
        self.frames.len()
    }

    /// Pushes a nested scanner over `text`, which logically originates at
    /// `origin` in `source`.
    pub fn open(&mut self, text: &str, source: Rc<str>, origin: RowCol) -> Result<()> {
        if self.frames.len() >= MAX_LEVEL {
            return Err(Error::new(
                Some(source),
                origin,
                format!("lexer stack: maximum levels reached ({MAX_LEVEL} levels)"),
            ));
        }
        let top = self.frames.last_mut().expect("at least the base frame");
        if top.reference.is_none() {
            top.reference = self.cur.clone();
        }
        self.frames.push(Frame {
            lexer: Lexer::new(text, source),
            origin: Some(origin),
            reference: None,
            args: Vec::new(),
        });
        Ok(())
    }

    /// Installs an argument substitution in the innermost frame.
    pub fn add_arg(&mut self, name: impl Into<String>, chain: TokenChain) {
        self.frames.last_mut().expect("at least the base frame").args.push((name.into(), chain));
    }

    /// Pins the current token as the innermost frame's instantiation
    /// reference.
    pub fn set_cur_ref(&mut self) {
        let top = self.frames.last_mut().expect("at least the base frame");
        top.reference = self.cur.clone();
    }

    /// The "instantiated from here" trail, innermost call site first.
    pub fn instantiation_frames(&self) -> Vec<ErrorFrame> {
        let mut frames = Vec::new();
        for frame in self.frames.iter().rev().skip(1) {
            if let Some(reference) = &frame.reference {
                frames.push(ErrorFrame { source: reference.source.clone(), loc: reference.loc });
            }
        }
        frames
    }

    /// Attaches the instantiation trail to an error.
    pub fn trail(&self, mut err: Error) -> Error {
        err.frames = self.instantiation_frames();
        err
    }

    /// Pulls one raw token: pops exhausted frames, applies argument
    /// substitution, and translates locations back to the frame origin.
    fn pull(&mut self) -> Token {
        let mut tok = self.frames.last_mut().expect("at least the base frame").lexer.next_token();
        while tok.is(TokenKind::Eof) && self.frames.len() > 1 {
            self.frames.pop();
            tok = self.frames.last_mut().expect("at least the base frame").lexer.next_token();
        }

        if tok.is(TokenKind::Ident) {
            let top = self.frames.last().expect("at least the base frame");
            let binding = top.args.iter().find(|(name, _)| *name == tok.text).map(|(_, chain)| chain.clone());
            if let Some(chain) = binding {
                let text = chain.to_text();
                // the substitution text reports the call-site location
                if let Err(err) = self.open(&text, chain.source.clone(), chain.origin) {
                    return Token {
                        kind: TokenKind::Invalid,
                        text: err.message,
                        loc: chain.origin,
                        offset: 0,
                        source: chain.source,
                    };
                }
                tok = self.frames.last_mut().expect("frame just pushed").lexer.next_token();
            }
        }

        let top = self.frames.last().expect("at least the base frame");
        if let Some(origin) = top.origin {
            if tok.loc.row == 1 && origin.col > 0 {
                tok.loc.col = origin.col + tok.loc.col - 1;
            }
            if origin.row > 0 {
                tok.loc.row += origin.row - 1;
            }
        }
        tok
    }

    /// Fills the look-ahead queue up to `len`, folding `ident & ident`.
    fn fill(&mut self, len: usize) {
        while self.queue.len() < len {
            if self.queue.back().is_some_and(|t| t.is(TokenKind::Invalid)) {
                return;
            }
            let tok = self.pull();
            match tok.kind {
                TokenKind::Invalid => {
                    self.queue.push_back(tok);
                    return;
                }
                TokenKind::Ident => {
                    let next = self.pull();
                    if next.is(TokenKind::Amp) {
                        let right = self.pull();
                        if right.is(TokenKind::Ident) {
                            let mut fused = tok;
                            fused.text.push_str(&right.text);
                            self.queue.push_back(fused);
                        } else {
                            self.queue.push_back(Token {
                                kind: TokenKind::Invalid,
                                text: "operator '&' requires an identifier on left and right side".to_string(),
                                loc: next.loc,
                                offset: next.offset,
                                source: next.source,
                            });
                            return;
                        }
                    } else {
                        let stop = next.is(TokenKind::Invalid);
                        self.queue.push_back(tok);
                        self.queue.push_back(next);
                        if stop {
                            return;
                        }
                    }
                }
                _ => self.queue.push_back(tok),
            }
        }
    }

    /// Looks ahead `off` tokens (1-based) without consuming.
    pub fn peek(&mut self, off: usize) -> Token {
        debug_assert!(off >= 1);
        self.fill(off);
        self.queue
            .get(off - 1)
            .or_else(|| self.queue.back())
            .cloned()
            .expect("fill produces at least one token")
    }

    /// Consumes and returns the next token. An `Invalid` token is returned
    /// without being consumed, so repeated calls keep reporting it.
    pub fn next_token(&mut self) -> Token {
        let tok = self.peek(1);
        if tok.is(TokenKind::Invalid) {
            return tok;
        }
        let tok = self.queue.pop_front().expect("peeked token is queued");
        self.cur = Some(tok.clone());
        tok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hilex(text: &str) -> HiLex {
        HiLex::new(text, Rc::from("test"))
    }

    fn chain_of(text: &str, origin: RowCol) -> TokenChain {
        let mut lexer = Lexer::new(text, Rc::from("call-site"));
        let mut tokens = Vec::new();
        loop {
            let t = lexer.next_token();
            if t.is(TokenKind::Eof) {
                break;
            }
            tokens.push(t);
        }
        TokenChain { source: Rc::from("call-site"), origin, tokens }
    }

    #[test]
    fn plain_stream_passes_through() {
        let mut hl = hilex("let x = 1");
        assert_eq!(hl.next_token().kind, TokenKind::KwLet);
        assert_eq!(hl.next_token().kind, TokenKind::Ident);
        assert_eq!(hl.next_token().kind, TokenKind::Eq);
        assert_eq!(hl.next_token().kind, TokenKind::LitInteger);
        assert_eq!(hl.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn nested_frame_reports_origin_location() {
        let mut hl = hilex("outer");
        hl.open("a b", Rc::from("macro"), RowCol::new(7, 3)).unwrap();
        let a = hl.next_token();
        assert_eq!(a.loc, RowCol::new(7, 3));
        let b = hl.next_token();
        assert_eq!(b.loc, RowCol::new(7, 5));
        // after the frame drains, the outer stream continues
        let outer = hl.next_token();
        assert_eq!(outer.text, "outer");
        assert_eq!(outer.loc.row, 1);
    }

    #[test]
    fn argument_substitution() {
        let mut hl = hilex("");
        hl.open("x + x", Rc::from("macro"), RowCol::new(1, 1)).unwrap();
        hl.add_arg("x", chain_of("42", RowCol::new(9, 2)));
        let a = hl.next_token();
        assert_eq!(a.kind, TokenKind::LitInteger);
        assert_eq!(a.text, "42");
        assert_eq!(a.loc, RowCol::new(9, 2));
        assert_eq!(hl.next_token().kind, TokenKind::Plus);
        let b = hl.next_token();
        assert_eq!(b.text, "42");
    }

    #[test]
    fn ident_concat_folds() {
        let mut hl = hilex("foo & bar rest");
        let t = hl.next_token();
        assert_eq!(t.kind, TokenKind::Ident);
        assert_eq!(t.text, "foobar");
        assert_eq!(hl.next_token().text, "rest");
    }

    #[test]
    fn concat_with_substituted_argument() {
        let mut hl = hilex("");
        hl.open("x&_v", Rc::from("macro"), RowCol::new(1, 1)).unwrap();
        hl.add_arg("x", chain_of("foo", RowCol::new(2, 4)));
        let t = hl.next_token();
        assert_eq!(t.kind, TokenKind::Ident);
        assert_eq!(t.text, "foo_v");
    }

    #[test]
    fn stray_amp_is_lexical_error() {
        let mut hl = hilex("foo & 1");
        let t = hl.next_token();
        assert_eq!(t.kind, TokenKind::Invalid);
        // invalid tokens stay current
        assert_eq!(hl.next_token().kind, TokenKind::Invalid);
    }

    #[test]
    fn depth_limit_enforced() {
        let mut hl = hilex("");
        for i in 0..MAX_LEVEL - 1 {
            hl.open("x", Rc::from(format!("level{i}").as_str()), RowCol::new(1, 1)).unwrap();
        }
        assert!(hl.open("x", Rc::from("deep"), RowCol::new(1, 1)).is_err());
    }

    #[test]
    fn instantiation_trail_lists_call_sites() {
        let mut hl = hilex("call1 call2");
        let c1 = hl.next_token();
        assert_eq!(c1.text, "call1");
        hl.open("inner1", Rc::from("m1"), RowCol::new(3, 1)).unwrap();
        let i1 = hl.next_token();
        assert_eq!(i1.text, "inner1");
        hl.open("inner2", Rc::from("m2"), RowCol::new(5, 1)).unwrap();
        let frames = hl.instantiation_frames();
        assert_eq!(frames.len(), 2);
        // innermost call site first
        assert_eq!(frames[0].loc.row, 3);
        assert_eq!(frames[1].loc.row, 1);
    }

    #[test]
    fn peek_then_next_sees_same_token() {
        let mut hl = hilex("a & b c");
        let p = hl.peek(1);
        assert_eq!(p.text, "ab");
        let n = hl.next_token();
        assert_eq!(n.text, "ab");
        assert_eq!(p.loc, n.loc);
        assert_eq!(hl.peek(1).text, "c");
    }
}
