//! Compiled token model.
//!
//! Every element of a compiled statement is a [`Token`]:
//! `{ kind, intval, value }`. The kind selects behavior; `intval` is
//! overloaded for integer literals, encoded sequence codes, and argument
//! counts; `value` carries literal payloads and names. Control-flow
//! linkage is *not* stored here: each compiled statement carries an
//! explicit [`crate::program::Link`].
//!
//! The kind list is grouped by syntactic role; the expression machine
//! keys off [`TokenKind::precedence`] exactly as the compiler did, so the
//! two sides can never disagree about operator binding.

use crate::value::Value;

// ---------------------------------------------------------------------------
// Source location
// ---------------------------------------------------------------------------

/// A byte-offset span in the source input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A zero-length span at the given position.
    #[must_use]
    pub const fn at(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Merge two spans into one covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ---------------------------------------------------------------------------
// Token kinds
// ---------------------------------------------------------------------------

/// The syntactic kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // -- Literal operands --
    /// Integer literal (`intval`).
    Integer,
    /// Decimal literal (`value` = Float).
    Decimal,
    /// Boolean literal (`intval` 0/1); `true`/`false`/`on`/`off`.
    BoolConst,
    /// Quoted string literal (`value` = Str).
    StringLit,
    /// Implied (unquoted) string argument (`value` = Str).
    ImpliedString,
    /// Constant 3-component point literal (`value` = Point3).
    PointConst3,
    /// Constant 4-component point literal (`value` = Point4).
    PointConst4,
    /// Bitset literal `({…})` (`value` = Bitset).
    BitsetConst,
    /// An unresolved name (`value` = Str).
    Identifier,
    /// A model property keyword inside a selection (`value` = Str).
    PropertyName,
    /// A predefined named selection set (`value` = Str).
    NamedSet,
    /// Object id `$name` (`value` = Str).
    ObjectId,

    // -- Structural delimiters --
    /// `(` grouping / argument list.
    LeftParen,
    /// `)`.
    RightParen,
    /// `[` opening an array literal.
    ArrayOpen,
    /// `]` closing an array literal (followed by [`Self::ArrayBuild`]).
    ArrayClose,
    /// `[` applying an index to the preceding operand.
    IndexOpen,
    /// `]` closing an index (`intval` = 1 single, 2 range).
    IndexClose,
    /// `{` opening an atom-selection expression.
    SelectOpen,
    /// `}` closing an atom-selection expression.
    SelectClose,
    /// `{` opening a hash literal.
    MapOpen,
    /// `}` closing a hash literal (followed by [`Self::MapBuild`]).
    MapClose,
    /// `{` opening a non-constant point constructor.
    PointOpen,
    /// `}` closing a point constructor (followed by [`Self::PointBuild`]).
    PointClose,
    /// `,`.
    Comma,
    /// `:` between hash key and value.
    MapColon,
    /// `:` inside an index range `[lo:hi]`.
    RangeColon,

    // -- Raw punctuation (pre-expression-compilation only) --
    /// `.` selector (rewritten to [`Self::PropGet`]/[`Self::MethodCall`]).
    Dot,
    /// `..` all-elements selector.
    DotDot,
    /// `{` before context is known.
    LeftBrace,
    /// `}` before context is known.
    RightBrace,
    /// `[` before context is known.
    LeftSquare,
    /// `]` before context is known.
    RightSquare,
    /// `%` (altloc specifier inside selections).
    Percent,
    /// `:` before context is known.
    Colon,
    /// `;` (retained inside `for(…)` headers as the clause separator).
    Semicolon,

    // -- Operators --
    /// `!` / `not`.
    Not,
    /// Unary `-`.
    UnaryMinus,
    /// `**`.
    Power,
    /// `*`.
    Times,
    /// `/`.
    Divide,
    /// `%%` (modulo).
    Modulo,
    /// `cross` (vector cross product).
    Cross,
    /// `+`.
    Plus,
    /// `-`.
    Minus,
    /// `==`.
    EqEq,
    /// `!=`.
    NotEq,
    /// `>`.
    Gt,
    /// `<`.
    Lt,
    /// `>=`.
    GtEq,
    /// `<=`.
    LtEq,
    /// `and` / `&` / `&&`.
    And,
    /// `or` / `|` / `||`.
    Or,
    /// `xor`.
    Xor,
    /// `toggle` (bitset add-or-remove).
    ToggleOp,
    /// `?` (ternary test).
    Question,
    /// `:` (ternary alternate).
    TernaryColon,
    /// `=` (statement-level assignment).
    Assign,

    // -- Compound assignment (statement head only; expanded away) --
    /// `+=`.
    PlusAssign,
    /// `-=`.
    MinusAssign,
    /// `*=`.
    TimesAssign,
    /// `/=`.
    DivideAssign,
    /// `++`.
    PlusPlus,
    /// `--`.
    MinusMinus,

    // -- Apply operations (emitted by the expression compiler) --
    /// `x.name` property get (`value` = Str; `intval` = 1 for `..name`).
    PropGet,
    /// `x.name(…)` method call (`value` = Str, `intval` = argc).
    MethodCall,
    /// `name(…)` function call (`value` = Str, `intval` = argc).
    FuncCall,
    /// Collect the top `intval` operands into an array.
    ArrayBuild,
    /// Collect the top `2·intval` operands into a hash.
    MapBuild,
    /// Collect the top `intval` (2–4) numbers into a point.
    PointBuild,

    // -- Selection specifiers --
    /// Residue name pattern (`value` = Str, `*`/`?` wildcards).
    SpecResName,
    /// Residue number (`intval`).
    SpecResNum,
    /// Residue sequence code (`intval` = `(seqnum << 8) | inscode`).
    SpecSeqCode,
    /// Residue number range (`intval` = lo, `value` = Int(hi)).
    SpecSeqRange,
    /// Chain id (`value` = Str).
    SpecChain,
    /// Atom name pattern (`value` = Str).
    SpecAtom,
    /// Alternate-location code (`value` = Str).
    SpecAltLoc,
    /// Model/frame number (`intval`).
    SpecModel,
    /// `*`: every entity.
    SpecAll,

    // -- Flow commands --
    If,
    ElseIf,
    Else,
    For,
    While,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    /// `end <kind>` (`value` = Str naming the construct).
    End,
    Function,
    Parallel,
    Try,
    Catch,
    Return,

    // -- Core commands --
    /// `set` (also the canonical form of implicit assignments).
    Set,
    /// `var`: declare a local.
    VarDecl,
    /// `print`.
    Print,
    /// `echo`.
    Echo,
    /// `message` (free-text argument).
    Message,
    /// Internal: an expression evaluated for effect (function-call
    /// statements).
    ExprCommand,

    // -- Domain commands (compiled generically, executed externally) --
    Select,
    Display,
    Hide,
    Color,
    Load,
    Zoom,
    Center,
    Rotate,
    Translate,
    Delete,
}

impl TokenKind {
    /// Operator precedence; higher binds tighter. `None` for non-operators.
    ///
    /// unary > power > mul/div/mod/cross > add/sub > comparison > and >
    /// or/xor/toggle > ternary > assignment.
    #[must_use]
    pub const fn precedence(self) -> Option<u8> {
        Some(match self {
            Self::Assign => 1,
            Self::Question | Self::TernaryColon => 2,
            Self::Or | Self::Xor | Self::ToggleOp => 3,
            Self::And => 4,
            Self::EqEq | Self::NotEq | Self::Gt | Self::Lt | Self::GtEq | Self::LtEq => 5,
            Self::Plus | Self::Minus => 6,
            Self::Times | Self::Divide | Self::Modulo | Self::Cross => 7,
            Self::Power => 8,
            Self::Not | Self::UnaryMinus => 9,
            Self::PropGet | Self::MethodCall | Self::FuncCall => 10,
            _ => return None,
        })
    }

    /// Prefix operators take their operand on the right.
    #[must_use]
    pub const fn is_prefix(self) -> bool {
        matches!(self, Self::Not | Self::UnaryMinus)
    }

    /// Right-associative operators do not reduce equal precedence.
    #[must_use]
    pub const fn is_right_assoc(self) -> bool {
        matches!(self, Self::Power | Self::Not | Self::UnaryMinus)
    }

    /// Binary comparison operators.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::EqEq | Self::NotEq | Self::Gt | Self::Lt | Self::GtEq | Self::LtEq
        )
    }

    /// Tokens that push an operand when evaluated.
    #[must_use]
    pub const fn is_operand(self) -> bool {
        matches!(
            self,
            Self::Integer
                | Self::Decimal
                | Self::BoolConst
                | Self::StringLit
                | Self::ImpliedString
                | Self::PointConst3
                | Self::PointConst4
                | Self::BitsetConst
                | Self::Identifier
                | Self::PropertyName
                | Self::NamedSet
                | Self::ObjectId
                | Self::SpecResName
                | Self::SpecResNum
                | Self::SpecSeqCode
                | Self::SpecSeqRange
                | Self::SpecChain
                | Self::SpecAtom
                | Self::SpecAltLoc
                | Self::SpecModel
                | Self::SpecAll
        )
    }

    /// Statement-leading command keywords.
    #[must_use]
    pub const fn is_command(self) -> bool {
        self.is_flow_command()
            || matches!(
                self,
                Self::Set
                    | Self::VarDecl
                    | Self::Print
                    | Self::Echo
                    | Self::Message
                    | Self::ExprCommand
                    | Self::Select
                    | Self::Display
                    | Self::Hide
                    | Self::Color
                    | Self::Load
                    | Self::Zoom
                    | Self::Center
                    | Self::Rotate
                    | Self::Translate
                    | Self::Delete
            )
    }

    /// Flow-control command keywords.
    #[must_use]
    pub const fn is_flow_command(self) -> bool {
        matches!(
            self,
            Self::If
                | Self::ElseIf
                | Self::Else
                | Self::For
                | Self::While
                | Self::Switch
                | Self::Case
                | Self::Default
                | Self::Break
                | Self::Continue
                | Self::End
                | Self::Function
                | Self::Parallel
                | Self::Try
                | Self::Catch
                | Self::Return
        )
    }

    /// Surface symbol for operators and punctuation (used by the source
    /// renderer).
    #[must_use]
    pub const fn symbol(self) -> Option<&'static str> {
        Some(match self {
            Self::LeftParen => "(",
            Self::RightParen => ")",
            Self::ArrayOpen | Self::IndexOpen | Self::LeftSquare => "[",
            Self::ArrayClose | Self::IndexClose | Self::RightSquare => "]",
            Self::SelectOpen | Self::MapOpen | Self::PointOpen | Self::LeftBrace => "{",
            Self::SelectClose | Self::MapClose | Self::PointClose | Self::RightBrace => "}",
            Self::Comma => ",",
            Self::MapColon | Self::RangeColon | Self::TernaryColon | Self::Colon => ":",
            Self::Dot => ".",
            Self::DotDot => "..",
            Self::Percent => "%",
            Self::Semicolon => ";",
            Self::Not => "!",
            Self::UnaryMinus | Self::Minus => "-",
            Self::Power => "**",
            Self::Times => "*",
            Self::Divide => "/",
            Self::Modulo => "%%",
            Self::Cross => "cross",
            Self::Plus => "+",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::ToggleOp => "toggle",
            Self::Question => "?",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::TimesAssign => "*=",
            Self::DivideAssign => "/=",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::SpecAll => "*",
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// One compiled token.
#[derive(Debug, Clone)]
pub struct Token {
    /// The syntactic kind.
    pub kind: TokenKind,
    /// Overloaded integer payload (literal value, encoded sequence code,
    /// argument count).
    pub intval: i64,
    /// Value payload, if any.
    pub value: Option<Value>,
}

impl Token {
    /// A bare token with no payload.
    #[must_use]
    pub const fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            intval: 0,
            value: None,
        }
    }

    /// A token with an integer payload.
    #[must_use]
    pub const fn int(kind: TokenKind, intval: i64) -> Self {
        Self {
            kind,
            intval,
            value: None,
        }
    }

    /// A token with a value payload.
    #[must_use]
    pub const fn val(kind: TokenKind, value: Value) -> Self {
        Self {
            kind,
            intval: 0,
            value: Some(value),
        }
    }

    /// A token with both payloads.
    #[must_use]
    pub const fn int_val(kind: TokenKind, intval: i64, value: Value) -> Self {
        Self {
            kind,
            intval,
            value: Some(value),
        }
    }

    /// An identifier token.
    #[must_use]
    pub fn ident(name: impl AsRef<str>) -> Self {
        Self::val(TokenKind::Identifier, Value::str(name))
    }

    /// The string payload, if the value is a string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_ordering() {
        let p = |k: TokenKind| k.precedence().unwrap();
        assert!(p(TokenKind::UnaryMinus) > p(TokenKind::Power));
        assert!(p(TokenKind::Power) > p(TokenKind::Times));
        assert!(p(TokenKind::Times) > p(TokenKind::Plus));
        assert!(p(TokenKind::Plus) > p(TokenKind::EqEq));
        assert!(p(TokenKind::EqEq) > p(TokenKind::And));
        assert!(p(TokenKind::And) > p(TokenKind::Or));
        assert!(p(TokenKind::Or) > p(TokenKind::Question));
        assert!(p(TokenKind::Question) > p(TokenKind::Assign));
        assert_eq!(TokenKind::Comma.precedence(), None);
        assert_eq!(TokenKind::Integer.precedence(), None);
    }

    #[test]
    fn associativity_flags() {
        assert!(TokenKind::Power.is_right_assoc());
        assert!(TokenKind::UnaryMinus.is_right_assoc());
        assert!(!TokenKind::Plus.is_right_assoc());
        assert!(TokenKind::Not.is_prefix());
        assert!(!TokenKind::Minus.is_prefix());
    }

    #[test]
    fn command_classification() {
        assert!(TokenKind::Set.is_command());
        assert!(TokenKind::If.is_flow_command());
        assert!(TokenKind::If.is_command());
        assert!(!TokenKind::Plus.is_command());
        assert!(!TokenKind::Identifier.is_command());
    }

    #[test]
    fn operand_classification() {
        assert!(TokenKind::Integer.is_operand());
        assert!(TokenKind::SpecChain.is_operand());
        assert!(!TokenKind::Plus.is_operand());
        assert!(!TokenKind::LeftParen.is_operand());
    }

    #[test]
    fn token_payloads() {
        let t = Token::int(TokenKind::Integer, 42);
        assert_eq!(t.intval, 42);
        let t = Token::ident("foo");
        assert_eq!(t.text(), Some("foo"));
    }

    #[test]
    fn symbols_render() {
        assert_eq!(TokenKind::Power.symbol(), Some("**"));
        assert_eq!(TokenKind::And.symbol(), Some("and"));
        assert_eq!(TokenKind::Identifier.symbol(), None);
    }
}
