// Heavily inspired and referenced from `rustc_lexer` and adapted to suit the project.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

/// Peekable iterator over a char sequence.
#[derive(Clone)]
pub struct Cursor<'a> {
    /// Byte length of the full input
    input_len: usize,
    /// Bytes remaining when the current token started
    len_at_token_start: usize,
    /// Iterator over chars in a &str
    chars: Chars<'a>,
}

pub(crate) const EOF_CHAR: char = '\0';

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            input_len: input.len(),
            len_at_token_start: input.len(),
            chars: input.chars(),
        }
    }

    /// Peek the next char without consuming it. Returns `EOF_CHAR` at end of input.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// File is finished parsing
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Advance by one character
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Eat characters while predicate holds or until end of input.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }

    /// Byte offset of the start of the current token.
    pub fn token_start(&self) -> usize {
        self.input_len - self.len_at_token_start
    }

    /// Bytes consumed since the current token started.
    pub fn pos_in_token(&self) -> usize {
        self.len_at_token_start - self.chars.as_str().len()
    }

    /// Begin a new token at the current position.
    pub fn reset_pos(&mut self) {
        self.len_at_token_start = self.chars.as_str().len();
    }
}
