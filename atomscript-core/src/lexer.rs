//! Character-level lexer for script source.
//!
//! Produces a stream of [`Lexeme`]s. Meaning (keyword, command, variable,
//! operator) is decided later by table lookup in the statement compiler;
//! the lexer only classifies shape.
//!
//! # Lexeme production rules
//!
//! | Input                   | Lexeme produced                          |
//! |-------------------------|------------------------------------------|
//! | `123`, `3.14`, `1e-5`   | `Integer` / `Decimal`                    |
//! | `"hi"`, `'hi'`          | `Str` (C-style escapes processed)        |
//! | `1.ca`                  | `Integer(1)`, then `.` and `ca`          |
//! | `abc`, `x_1`            | `Symbolic`                               |
//! | `<=`, `**`, `+=`, `..`  | `Symbolic` (greedy two-char match)       |
//! | `12^A`, `-5^B`, `*^C`   | `SeqCode` (residue sequence code)        |
//! | `({1 3:5})`, `({null})` | `BitsetLit`                              |
//! | `$name`, `$dr*`         | `ObjectId`                               |
//! | `# …`, `/* … */`        | skipped                                  |
//! | `\` + newline           | spliced (no lexeme)                      |
//! | newline                 | `Newline` (statement boundary candidate) |
//!
//! The only lexical *errors* are unterminated strings and unterminated
//! block comments; everything else falls back to symbolic text.
//!
//! # Embedded scripts
//!
//! A document containing the sentinel line `**** Begin Script ****`
//! carries a single script fragment ending at `**** End Script ****`;
//! everything outside that region is treated as comment. The first region
//! wins and regions do not nest.

use crate::bitset::Bitset;
use crate::error::CompileErrorKind;
use crate::token::Span;

/// Sentinel opening an embedded script region.
pub const BEGIN_SCRIPT: &str = "**** Begin Script ****";
/// Sentinel closing an embedded script region.
pub const END_SCRIPT: &str = "**** End Script ****";

// ---------------------------------------------------------------------------
// Lexemes
// ---------------------------------------------------------------------------

/// The shape of one lexeme.
#[derive(Debug, Clone, PartialEq)]
pub enum LexKind {
    /// An identifier, keyword, or operator: resolved by table lookup.
    Symbolic(String),
    /// Integer literal.
    Integer(i64),
    /// Decimal literal.
    Decimal(f64),
    /// Quoted string (escapes already processed).
    Str(String),
    /// Residue sequence code `nnn^X`; `seqnum` is `None` for the `*^X`
    /// wildcard form.
    SeqCode {
        seqnum: Option<i32>,
        inscode: char,
    },
    /// Bitset literal `({…})`.
    BitsetLit(Bitset),
    /// Object id `$name`.
    ObjectId(String),
    /// Unquoted free-text argument (only in implied-string mode).
    ImpliedString(String),
    /// End of a source line.
    Newline,
    /// End of input.
    Eof,
}

/// A lexeme with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    /// Shape and payload.
    pub kind: LexKind,
    /// Source byte span.
    pub span: Span,
    /// 1-based source line.
    pub line: u32,
}

impl Lexeme {
    /// Whether this is a symbolic lexeme with the given text.
    #[must_use]
    pub fn is_sym(&self, text: &str) -> bool {
        matches!(&self.kind, LexKind::Symbolic(s) if s == text)
    }
}

/// How an implied-string argument terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpliedMode {
    /// One whitespace-delimited word (filenames, color names).
    Word,
    /// Everything up to end of line or `;` (echo/message text).
    Line,
}

// ---------------------------------------------------------------------------
// Lexical errors
// ---------------------------------------------------------------------------

/// An error encountered during lexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// Machine-readable kind (always a lexical kind).
    pub kind: CompileErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Location of the error.
    pub span: Span,
    /// 1-based source line.
    pub line: u32,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Two-character operators, matched greedily before single characters.
const TWO_CHAR_OPS: &[&str] = &[
    "==", "!=", ">=", "<=", "&&", "||", "+=", "-=", "*=", "/=", "++", "--", "%%", "**", "..",
];

/// The character-level lexer.
pub struct Lexer {
    src: Vec<u8>,
    pos: usize,
    line: u32,
    /// Tolerate unterminated strings (take the rest of the line).
    tolerant: bool,
    /// End of the active region (for embedded scripts).
    region_end: usize,
}

impl Lexer {
    /// Create a lexer over the whole source.
    ///
    /// If the source carries an embedded-script sentinel, the lexer is
    /// restricted to the embedded region.
    #[must_use]
    pub fn new(source: &str, tolerant: bool) -> Self {
        let (start, end, line) = Self::embedded_region(source);
        Self {
            src: source.as_bytes().to_vec(),
            pos: start,
            line,
            tolerant,
            region_end: end,
        }
    }

    /// Locate the embedded script region, if any: `(start, end, start_line)`.
    fn embedded_region(source: &str) -> (usize, usize, u32) {
        let Some(tag) = source.find(BEGIN_SCRIPT) else {
            return (0, source.len(), 1);
        };
        let start = source[tag..]
            .find('\n')
            .map_or(source.len(), |nl| tag + nl + 1);
        let end = source[start..]
            .find(END_SCRIPT)
            .map_or(source.len(), |e| start + e);
        let start_line = source[..start].bytes().filter(|b| *b == b'\n').count() as u32 + 1;
        (start, end, start_line)
    }

    /// Current 1-based line number.
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    /// Current byte position.
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.region_end
    }

    fn peek(&self) -> u8 {
        if self.at_end() {
            0
        } else {
            self.src[self.pos]
        }
    }

    fn peek_at(&self, off: usize) -> u8 {
        if self.pos + off >= self.region_end {
            0
        } else {
            self.src[self.pos + off]
        }
    }

    fn lexeme(&self, kind: LexKind, start: usize) -> Lexeme {
        Lexeme {
            kind,
            span: Span::new(start, self.pos),
            line: self.line,
        }
    }

    fn error(&self, kind: CompileErrorKind, message: impl Into<String>, start: usize) -> LexError {
        LexError {
            kind,
            message: message.into(),
            span: Span::new(start, self.pos),
            line: self.line,
        }
    }

    // -- skipping --

    /// Skip spaces, comments, and line splices. Stops before newlines.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | 0x0C => self.pos += 1,
                // line splice: backslash at end of line
                b'\\' if self.peek_at(1) == b'\n' => {
                    self.pos += 2;
                    self.line += 1;
                }
                b'\\' if self.peek_at(1) == b'\r' && self.peek_at(2) == b'\n' => {
                    self.pos += 3;
                    self.line += 1;
                }
                b'#' => {
                    while !self.at_end() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    // block or doc comment: skip to the first `*/`
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.at_end() {
                            return Err(self.error(
                                CompileErrorKind::UnterminatedComment,
                                "unterminated block comment",
                                start,
                            ));
                        }
                        if self.peek() == b'\n' {
                            self.line += 1;
                        }
                        if self.peek() == b'*' && self.peek_at(1) == b'/' {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // -- public scanning interface --

    /// Scan the next lexeme in normal mode.
    pub fn next(&mut self) -> Result<Lexeme, LexError> {
        self.skip_trivia()?;

        let start = self.pos;
        if self.at_end() {
            return Ok(self.lexeme(LexKind::Eof, start));
        }

        let c = self.peek();
        match c {
            b'\n' => {
                self.pos += 1;
                let lx = Lexeme {
                    kind: LexKind::Newline,
                    span: Span::new(start, self.pos),
                    line: self.line,
                };
                self.line += 1;
                Ok(lx)
            }
            b'0'..=b'9' => Ok(self.scan_number(start)),
            b'.' if self.peek_at(1).is_ascii_digit() => Ok(self.scan_number(start)),
            b'"' | b'\'' => self.scan_string(start),
            b'$' => Ok(self.scan_object_id(start)),
            b'(' if self.peek_at(1) == b'{' => Ok(self.scan_bitset(start)),
            b'*' if self.peek_at(1) == b'^' && is_inscode(self.peek_at(2)) => {
                self.pos += 3;
                Ok(self.lexeme(
                    LexKind::SeqCode {
                        seqnum: None,
                        inscode: char::from(self.src[self.pos - 1]),
                    },
                    start,
                ))
            }
            b'-' if self.peek_at(1).is_ascii_digit() => {
                // look ahead for a negative sequence code `-nnn^X`
                if let Some(lx) = self.try_negative_seqcode(start) {
                    Ok(lx)
                } else {
                    self.pos += 1;
                    Ok(self.lexeme(LexKind::Symbolic("-".to_owned()), start))
                }
            }
            c if c.is_ascii_alphabetic() || c == b'_' => Ok(self.scan_identifier(start)),
            _ => Ok(self.scan_operator(start)),
        }
    }

    /// Scan an implied-string argument (free text for the current command).
    ///
    /// A quoted string, newline, `;`, or end of input still produce their
    /// normal lexemes.
    pub fn next_implied(&mut self, mode: ImpliedMode) -> Result<Lexeme, LexError> {
        self.skip_trivia()?;

        let start = self.pos;
        if self.at_end() {
            return Ok(self.lexeme(LexKind::Eof, start));
        }
        match self.peek() {
            b'\n' => self.next(),
            b';' => {
                self.pos += 1;
                Ok(self.lexeme(LexKind::Symbolic(";".to_owned()), start))
            }
            b'"' | b'\'' => self.scan_string(start),
            _ => {
                let mut text = Vec::new();
                while !self.at_end() {
                    let c = self.peek();
                    let stop = match mode {
                        ImpliedMode::Word => {
                            c == b'\n' || c == b';' || c == b' ' || c == b'\t' || c == b'\r'
                        }
                        ImpliedMode::Line => c == b'\n' || c == b';',
                    };
                    if stop {
                        break;
                    }
                    text.push(c);
                    self.pos += 1;
                }
                // trailing spaces are not part of a line-mode argument
                while text.last().is_some_and(|b| *b == b' ' || *b == b'\t' || *b == b'\r') {
                    text.pop();
                }
                let text = String::from_utf8_lossy(&text).into_owned();
                Ok(self.lexeme(LexKind::ImpliedString(text), start))
            }
        }
    }

    // -- scanners --

    /// Numbers: `123`, `3.14`, `.5`, `1e-5`, `2.5E3`; `12^A` sequence
    /// codes. A trailing dot followed by a letter is *not* part of the
    /// number, so `1.ca` scans as `1`.
    fn scan_number(&mut self, start: usize) -> Lexeme {
        let mut is_decimal = false;

        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            is_decimal = true;
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        } else if self.peek() == b'.' && !self.peek_at(1).is_ascii_alphabetic() && self.peek_at(1) != b'.' {
            // `1.` with nothing meaningful after the dot: take it
            is_decimal = true;
            self.pos += 1;
        }
        // exponent
        if matches!(self.peek(), b'e' | b'E') {
            let mut off = 1;
            if matches!(self.peek_at(1), b'+' | b'-') {
                off = 2;
            }
            if self.peek_at(off).is_ascii_digit() {
                is_decimal = true;
                self.pos += off;
                while self.peek().is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }
        // sequence code `nnn^X`
        if !is_decimal && self.peek() == b'^' && is_inscode(self.peek_at(1)) {
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0");
            let seqnum = text.parse::<i32>().unwrap_or(0);
            let inscode = char::from(self.peek_at(1));
            self.pos += 2;
            return self.lexeme(
                LexKind::SeqCode {
                    seqnum: Some(seqnum),
                    inscode,
                },
                start,
            );
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0");
        if is_decimal {
            self.lexeme(LexKind::Decimal(text.parse().unwrap_or(0.0)), start)
        } else {
            self.lexeme(LexKind::Integer(text.parse().unwrap_or(0)), start)
        }
    }

    /// `-nnn^X` negative sequence codes. Returns `None` when the digits
    /// are not followed by a caret (plain minus).
    fn try_negative_seqcode(&mut self, start: usize) -> Option<Lexeme> {
        let mut off = 1;
        while self.peek_at(off).is_ascii_digit() {
            off += 1;
        }
        if self.peek_at(off) != b'^' || !is_inscode(self.peek_at(off + 1)) {
            return None;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos + off]).unwrap_or("0");
        let seqnum = text.parse::<i32>().unwrap_or(0);
        let inscode = char::from(self.peek_at(off + 1));
        self.pos += off + 2;
        Some(self.lexeme(
            LexKind::SeqCode {
                seqnum: Some(seqnum),
                inscode,
            },
            start,
        ))
    }

    /// Quoted strings with C-style escapes.
    fn scan_string(&mut self, start: usize) -> Result<Lexeme, LexError> {
        let quote = self.peek();
        self.pos += 1;
        let mut out = String::new();

        loop {
            if self.at_end() || self.peek() == b'\n' {
                if self.tolerant {
                    return Ok(self.lexeme(LexKind::Str(out), start));
                }
                return Err(self.error(
                    CompileErrorKind::UnterminatedString,
                    "unterminated string literal",
                    start,
                ));
            }
            let c = self.peek();
            self.pos += 1;
            if c == quote {
                return Ok(self.lexeme(LexKind::Str(out), start));
            }
            if c != b'\\' {
                out.push(char::from(c));
                continue;
            }
            // escape sequence
            let e = self.peek();
            self.pos += 1;
            match e {
                b'n' => out.push('\n'),
                b't' => out.push('\t'),
                b'r' => out.push('\r'),
                b'"' => out.push('"'),
                b'\'' => out.push('\''),
                b'\\' => out.push('\\'),
                b'x' => out.push(self.scan_hex_escape(2)),
                b'u' => out.push(self.scan_hex_escape(4)),
                0 => {}
                other => out.push(char::from(other)),
            }
        }
    }

    /// `\xNN` / `\uNNNN`: short or invalid digits fall back to `?`.
    fn scan_hex_escape(&mut self, digits: usize) -> char {
        let mut code: u32 = 0;
        for _ in 0..digits {
            let c = self.peek();
            let Some(d) = char::from(c).to_digit(16) else {
                return '?';
            };
            code = code * 16 + d;
            self.pos += 1;
        }
        char::from_u32(code).unwrap_or('?')
    }

    /// `$name` object ids: alphanumerics, `_`, `~`, and `*` wildcards.
    fn scan_object_id(&mut self, start: usize) -> Lexeme {
        self.pos += 1; // `$`
        let name_start = self.pos;
        while !self.at_end() {
            let c = self.peek();
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'~' || c == b'*' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name = String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned();
        self.lexeme(LexKind::ObjectId(name), start)
    }

    /// `({…})` bitset literals. Falls back to a lone `(` when the content
    /// is not bitset syntax.
    fn scan_bitset(&mut self, start: usize) -> Lexeme {
        // find the closing `})`
        let mut end = self.pos + 2;
        while end + 1 < self.region_end {
            if self.src[end] == b'}' && self.src[end + 1] == b')' {
                let body = String::from_utf8_lossy(&self.src[self.pos + 2..end]);
                if let Some(bs) = Bitset::parse_literal(&body) {
                    self.pos = end + 2;
                    return self.lexeme(LexKind::BitsetLit(bs), start);
                }
                break;
            }
            if self.src[end] == b'\n' {
                break;
            }
            end += 1;
        }
        // not a bitset literal: just the parenthesis
        self.pos += 1;
        self.lexeme(LexKind::Symbolic("(".to_owned()), start)
    }

    /// Identifiers: letters, digits, underscores.
    fn scan_identifier(&mut self, start: usize) -> Lexeme {
        while !self.at_end() {
            let c = self.peek();
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.lexeme(LexKind::Symbolic(text), start)
    }

    /// Operators and punctuation, greedy two-character match first.
    fn scan_operator(&mut self, start: usize) -> Lexeme {
        if self.pos + 1 < self.region_end {
            let two = &self.src[self.pos..self.pos + 2];
            for op in TWO_CHAR_OPS {
                if op.as_bytes() == two {
                    self.pos += 2;
                    return self.lexeme(LexKind::Symbolic((*op).to_owned()), start);
                }
            }
        }
        let c = self.peek();
        self.pos += 1;
        self.lexeme(LexKind::Symbolic(String::from(char::from(c))), start)
    }

    /// Scan everything (for tests).
    #[cfg(test)]
    fn scan_all(&mut self) -> Vec<LexKind> {
        let mut out = Vec::new();
        loop {
            let lx = self.next().expect("lex error");
            let done = lx.kind == LexKind::Eof;
            out.push(lx.kind);
            if done {
                break;
            }
        }
        out
    }
}

/// Insertion-code characters: letters or the `*` wildcard.
const fn is_inscode(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'*'
}

/// Encode a sequence code the way compiled tokens carry it.
#[must_use]
pub const fn encode_seqcode(seqnum: i32, inscode: char) -> i64 {
    ((seqnum as i64) << 8) | (inscode as i64 & 0xFF)
}

/// Decode a compiled sequence code into `(seqnum, inscode)`.
#[must_use]
pub const fn decode_seqcode(code: i64) -> (i32, char) {
    let seqnum = (code >> 8) as i32;
    let ins = (code & 0xFF) as u8;
    (seqnum, ins as char)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<LexKind> {
        Lexer::new(input, false).scan_all()
    }

    fn sym(s: &str) -> LexKind {
        LexKind::Symbolic(s.to_owned())
    }

    // -- whitespace, comments, continuations --

    #[test]
    fn empty_input() {
        assert_eq!(kinds(""), vec![LexKind::Eof]);
    }

    #[test]
    fn hash_comment_runs_to_eol() {
        assert_eq!(
            kinds("a # comment ** { \nb"),
            vec![sym("a"), LexKind::Newline, sym("b"), LexKind::Eof]
        );
    }

    #[test]
    fn block_comment_skipped() {
        assert_eq!(
            kinds("a /* x\ny */ b"),
            vec![sym("a"), sym("b"), LexKind::Eof]
        );
    }

    #[test]
    fn doc_comment_skipped() {
        assert_eq!(kinds("/** doc **/ a"), vec![sym("a"), LexKind::Eof]);
    }

    #[test]
    fn unterminated_block_comment_is_error() {
        let mut lx = Lexer::new("a /* never", false);
        assert!(lx.next().is_ok());
        let err = lx.next().unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnterminatedComment);
    }

    #[test]
    fn backslash_newline_splices() {
        assert_eq!(kinds("a \\\n b"), vec![sym("a"), sym("b"), LexKind::Eof]);
    }

    #[test]
    fn newline_is_a_lexeme() {
        assert_eq!(
            kinds("a\nb"),
            vec![sym("a"), LexKind::Newline, sym("b"), LexKind::Eof]
        );
    }

    #[test]
    fn line_numbers_advance() {
        let mut lx = Lexer::new("a\nb", false);
        assert_eq!(lx.next().unwrap().line, 1);
        assert_eq!(lx.next().unwrap().line, 1); // the newline itself
        assert_eq!(lx.next().unwrap().line, 2);
    }

    // -- numbers --

    #[test]
    fn integers_and_decimals() {
        assert_eq!(
            kinds("42 3.14 .5 1e3 2.5E-2"),
            vec![
                LexKind::Integer(42),
                LexKind::Decimal(3.14),
                LexKind::Decimal(0.5),
                LexKind::Decimal(1000.0),
                LexKind::Decimal(0.025),
                LexKind::Eof
            ]
        );
    }

    #[test]
    fn trailing_dot_before_letter_is_not_part_of_number() {
        // `1.ca` scans as integer 1, then `.`, then identifier `ca`
        assert_eq!(
            kinds("1.ca"),
            vec![LexKind::Integer(1), sym("."), sym("ca"), LexKind::Eof]
        );
    }

    #[test]
    fn number_then_exponent_like_identifier() {
        // `12eggs` is 12 then the identifier
        assert_eq!(
            kinds("12eggs"),
            vec![LexKind::Integer(12), sym("eggs"), LexKind::Eof]
        );
    }

    // -- strings --

    #[test]
    fn quoted_strings_and_escapes() {
        assert_eq!(
            kinds("\"a\\tb\" 'c\\n' \"\\x41\\u0042\""),
            vec![
                LexKind::Str("a\tb".to_owned()),
                LexKind::Str("c\n".to_owned()),
                LexKind::Str("AB".to_owned()),
                LexKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_error() {
        let mut lx = Lexer::new("\"abc\ndef", false);
        let err = lx.next().unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnterminatedString);
    }

    #[test]
    fn tolerant_mode_takes_rest_of_line() {
        let mut lx = Lexer::new("\"abc\ndef", true);
        let lx1 = lx.next().unwrap();
        assert_eq!(lx1.kind, LexKind::Str("abc".to_owned()));
    }

    // -- sequence codes --

    #[test]
    fn sequence_codes() {
        assert_eq!(
            kinds("12^A -5^B *^C"),
            vec![
                LexKind::SeqCode {
                    seqnum: Some(12),
                    inscode: 'A'
                },
                LexKind::SeqCode {
                    seqnum: Some(-5),
                    inscode: 'B'
                },
                LexKind::SeqCode {
                    seqnum: None,
                    inscode: 'C'
                },
                LexKind::Eof
            ]
        );
    }

    #[test]
    fn minus_without_caret_stays_minus() {
        assert_eq!(
            kinds("a-1"),
            vec![sym("a"), sym("-"), LexKind::Integer(1), LexKind::Eof]
        );
    }

    #[test]
    fn seqcode_encoding_roundtrip() {
        let code = encode_seqcode(42, 'B');
        assert_eq!(decode_seqcode(code), (42, 'B'));
        let code = encode_seqcode(-3, 'z');
        assert_eq!(decode_seqcode(code), (-3, 'z'));
    }

    // -- bitset literals --

    #[test]
    fn bitset_literal() {
        let out = kinds("({1 3:5})");
        let LexKind::BitsetLit(bs) = &out[0] else {
            panic!("expected bitset, got {out:?}");
        };
        assert_eq!(format!("{bs}"), "({1 3:5})");
    }

    #[test]
    fn null_bitset_literal() {
        let out = kinds("({null})");
        assert!(matches!(&out[0], LexKind::BitsetLit(bs) if bs.is_empty()));
    }

    #[test]
    fn non_bitset_paren_brace_falls_back() {
        // `({x})` is not bitset syntax: plain delimiters
        assert_eq!(
            kinds("({x})"),
            vec![sym("("), sym("{"), sym("x"), sym("}"), sym(")"), LexKind::Eof]
        );
    }

    // -- object ids --

    #[test]
    fn object_ids() {
        assert_eq!(
            kinds("$axis1 $dr*"),
            vec![
                LexKind::ObjectId("axis1".to_owned()),
                LexKind::ObjectId("dr*".to_owned()),
                LexKind::Eof
            ]
        );
    }

    // -- operators --

    #[test]
    fn greedy_two_char_operators() {
        assert_eq!(
            kinds("a<=b==c**2"),
            vec![
                sym("a"),
                sym("<="),
                sym("b"),
                sym("=="),
                sym("c"),
                sym("**"),
                LexKind::Integer(2),
                LexKind::Eof
            ]
        );
    }

    #[test]
    fn dots_and_ranges() {
        assert_eq!(
            kinds("a.b a..b"),
            vec![
                sym("a"),
                sym("."),
                sym("b"),
                sym("a"),
                sym(".."),
                sym("b"),
                LexKind::Eof
            ]
        );
    }

    // -- implied strings --

    #[test]
    fn implied_word_stops_at_space() {
        let mut lx = Lexer::new("model.pdb rest", false);
        let w = lx.next_implied(ImpliedMode::Word).unwrap();
        assert_eq!(w.kind, LexKind::ImpliedString("model.pdb".to_owned()));
        let w = lx.next_implied(ImpliedMode::Word).unwrap();
        assert_eq!(w.kind, LexKind::ImpliedString("rest".to_owned()));
    }

    #[test]
    fn implied_line_runs_to_eol() {
        let mut lx = Lexer::new("hello brave world\nnext", false);
        let w = lx.next_implied(ImpliedMode::Line).unwrap();
        assert_eq!(w.kind, LexKind::ImpliedString("hello brave world".to_owned()));
        assert_eq!(lx.next().unwrap().kind, LexKind::Newline);
    }

    #[test]
    fn implied_quoted_string_still_lexes() {
        let mut lx = Lexer::new("\"two words\"", false);
        let w = lx.next_implied(ImpliedMode::Word).unwrap();
        assert_eq!(w.kind, LexKind::Str("two words".to_owned()));
    }

    #[test]
    fn implied_stops_at_semicolon() {
        let mut lx = Lexer::new("text here; print 1", false);
        let w = lx.next_implied(ImpliedMode::Line).unwrap();
        assert_eq!(w.kind, LexKind::ImpliedString("text here".to_owned()));
        assert!(lx.next_implied(ImpliedMode::Line).unwrap().is_sym(";"));
    }

    // -- embedded scripts --

    #[test]
    fn embedded_script_extraction() {
        let doc = "REMARK stuff\n**** Begin Script ****\nprint 1\n**** End Script ****\nmore";
        let out = kinds(doc);
        assert_eq!(
            out,
            vec![
                sym("print"),
                LexKind::Integer(1),
                LexKind::Newline,
                LexKind::Eof
            ]
        );
    }

    #[test]
    fn embedded_script_line_numbers() {
        let doc = "junk\n**** Begin Script ****\nprint 1\n**** End Script ****";
        let mut lx = Lexer::new(doc, false);
        let first = lx.next().unwrap();
        assert_eq!(first.line, 3);
    }

    #[test]
    fn no_sentinel_means_whole_input() {
        assert_eq!(kinds("print"), vec![sym("print"), LexKind::Eof]);
    }
}
