//! Lexical analysis of a single input line.
//!
//! A line is split into whitespace-delimited lexemes. A lexeme that starts with a
//! quote character runs until the matching closing quote and loses both quotes; any
//! other lexeme is a maximal run of non-whitespace characters taken verbatim.

use crate::error::ParseError;

/// A lexeme of the input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Text of the lexeme with enclosing quotes removed.
    pub text: String,
    /// Whether the lexeme was written in quotes. Quoted lexemes are never operators.
    pub quoted: bool,
}

impl Token {
    pub fn word(text: impl Into<String>) -> Self {
        Token {
            text: text.into(),
            quoted: false,
        }
    }

    pub fn quoted(text: impl Into<String>) -> Self {
        Token {
            text: text.into(),
            quoted: true,
        }
    }

    /// Unquoted lexeme equal to `op`.
    pub fn is_op(&self, op: &str) -> bool {
        !self.quoted && self.text == op
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingQuote(char),
}

pub(crate) fn is_blank(ch: char) -> bool {
    matches!(ch, ' ' | '\t')
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    // Position of the opening quote of the lexeme being read, for error reports.
    quote_start: usize,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.trim_matches(is_blank).chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            quote_start: 0,
        }
    }

    /// Runs the machine over the whole input.
    ///
    /// Fails with [`ParseError::MalformedQuote`] when the input ends inside a quoted
    /// lexeme.
    fn make_tokens(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingQuote(quote) => self.handle_quote(ch, quote, &mut out),
            }
        }

        match self.state {
            LexingState::ReadingQuote(_) => {
                let unterminated: String = self.input[self.quote_start..].iter().collect();
                Err(ParseError::MalformedQuote(unterminated))
            }
            LexingState::ReadingWord => {
                out.push(Token::word(std::mem::take(&mut self.buffer)));
                Ok(out)
            }
            LexingState::Start => Ok(out),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_start(&mut self, ch: char) {
        match ch {
            c if is_blank(c) => {}
            '"' | '\'' => {
                self.quote_start = self.pos - 1;
                self.state = LexingState::ReadingQuote(ch);
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        if is_blank(ch) {
            out.push(Token::word(std::mem::take(&mut self.buffer)));
            self.state = LexingState::Start;
        } else {
            self.buffer.push(ch);
        }
    }

    fn handle_quote(&mut self, ch: char, quote: char, out: &mut Vec<Token>) {
        if ch == quote {
            out.push(Token::quoted(std::mem::take(&mut self.buffer)));
            self.state = LexingState::Start;
        } else {
            self.buffer.push(ch);
        }
    }
}

/// Splits `line` into tokens.
///
/// Leading and trailing blanks (space, tab) are ignored and an empty line produces no
/// tokens. A quoted lexeme ends at its closing quote, so `"a"b` yields two tokens.
pub fn split_into_tokens(line: &str) -> Result<Vec<Token>, ParseError> {
    LexingFSM::new(line).make_tokens()
}
