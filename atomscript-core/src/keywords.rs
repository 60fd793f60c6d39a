//! The keyword table: script names to token kinds and attributes.
//!
//! Every identifier the lexer produces is looked up here (case-
//! insensitively) to decide its meaning. The attribute flags drive the
//! statement compiler: is this a flow keyword? does the command carry a
//! math expression? does it take a free-text implied-string argument?
//!
//! The table is process-scoped and immutable; construction happens once.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::token::TokenKind;

// ---------------------------------------------------------------------------
// Attribute flags
// ---------------------------------------------------------------------------

/// Keyword attribute bits.
pub mod attr {
    /// Opens/continues/closes a control-flow construct.
    pub const FLOW: u16 = 1 << 0;
    /// The command's tail is a math/selection expression.
    pub const MATH: u16 = 1 << 1;
    /// The command's argument is a free-text implied string.
    pub const IMPLIED: u16 = 1 << 2;
    /// The keyword may also appear as an assignment target
    /// (`zoom = 200`).
    pub const SETTABLE: u16 = 1 << 3;
    /// A model property keyword usable in selection comparisons.
    pub const PROPERTY: u16 = 1 << 4;
    /// A predefined named selection set.
    pub const NAMED_SET: u16 = 1 << 5;
}

/// One keyword entry.
#[derive(Debug, Clone, Copy)]
pub struct Keyword {
    /// Canonical (lowercase) name.
    pub name: &'static str,
    /// Token kind emitted for this keyword.
    pub kind: TokenKind,
    /// Attribute bits (see [`attr`]).
    pub flags: u16,
}

impl Keyword {
    /// Test one attribute bit.
    #[must_use]
    pub const fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

// ---------------------------------------------------------------------------
// The table
// ---------------------------------------------------------------------------

use attr::{FLOW, IMPLIED, MATH, NAMED_SET, PROPERTY, SETTABLE};

const fn kw(name: &'static str, kind: TokenKind, flags: u16) -> Keyword {
    Keyword { name, kind, flags }
}

/// All registered keywords.
pub const KEYWORDS: &[Keyword] = &[
    // -- Flow --
    kw("if", TokenKind::If, FLOW | MATH),
    kw("elseif", TokenKind::ElseIf, FLOW | MATH),
    kw("else", TokenKind::Else, FLOW),
    kw("for", TokenKind::For, FLOW | MATH),
    kw("while", TokenKind::While, FLOW | MATH),
    kw("switch", TokenKind::Switch, FLOW | MATH),
    kw("case", TokenKind::Case, FLOW | MATH),
    kw("default", TokenKind::Default, FLOW),
    kw("break", TokenKind::Break, FLOW),
    kw("continue", TokenKind::Continue, FLOW),
    kw("end", TokenKind::End, FLOW),
    kw("function", TokenKind::Function, FLOW),
    kw("parallel", TokenKind::Parallel, FLOW),
    kw("try", TokenKind::Try, FLOW),
    kw("catch", TokenKind::Catch, FLOW),
    kw("return", TokenKind::Return, FLOW | MATH),
    // -- Core commands --
    kw("set", TokenKind::Set, MATH),
    kw("var", TokenKind::VarDecl, MATH),
    kw("print", TokenKind::Print, MATH),
    kw("echo", TokenKind::Echo, IMPLIED),
    kw("message", TokenKind::Message, IMPLIED),
    // -- Domain commands --
    kw("select", TokenKind::Select, MATH),
    kw("display", TokenKind::Display, MATH),
    kw("hide", TokenKind::Hide, MATH),
    kw("delete", TokenKind::Delete, MATH),
    kw("color", TokenKind::Color, IMPLIED | SETTABLE),
    kw("load", TokenKind::Load, IMPLIED),
    kw("zoom", TokenKind::Zoom, MATH | SETTABLE),
    kw("center", TokenKind::Center, MATH | SETTABLE),
    kw("rotate", TokenKind::Rotate, MATH),
    kw("translate", TokenKind::Translate, MATH),
    // -- Word operators --
    kw("and", TokenKind::And, 0),
    kw("or", TokenKind::Or, 0),
    kw("xor", TokenKind::Xor, 0),
    kw("toggle", TokenKind::ToggleOp, 0),
    kw("not", TokenKind::Not, 0),
    kw("cross", TokenKind::Cross, 0),
    // -- Boolean literals --
    kw("true", TokenKind::BoolConst, 0),
    kw("false", TokenKind::BoolConst, 0),
    kw("on", TokenKind::BoolConst, 0),
    kw("off", TokenKind::BoolConst, 0),
    // -- Model properties --
    kw("atomno", TokenKind::PropertyName, PROPERTY),
    kw("elemno", TokenKind::PropertyName, PROPERTY),
    kw("element", TokenKind::PropertyName, PROPERTY),
    kw("atomname", TokenKind::PropertyName, PROPERTY),
    kw("resno", TokenKind::PropertyName, PROPERTY),
    kw("resname", TokenKind::PropertyName, PROPERTY),
    kw("chain", TokenKind::PropertyName, PROPERTY),
    kw("altloc", TokenKind::PropertyName, PROPERTY),
    kw("model", TokenKind::PropertyName, PROPERTY),
    kw("occupancy", TokenKind::PropertyName, PROPERTY),
    kw("temperature", TokenKind::PropertyName, PROPERTY),
    kw("mass", TokenKind::PropertyName, PROPERTY),
    kw("charge", TokenKind::PropertyName, PROPERTY),
    kw("radius", TokenKind::PropertyName, PROPERTY),
    kw("x", TokenKind::PropertyName, PROPERTY),
    kw("y", TokenKind::PropertyName, PROPERTY),
    kw("z", TokenKind::PropertyName, PROPERTY),
    // -- Predefined sets --
    kw("all", TokenKind::NamedSet, NAMED_SET),
    kw("none", TokenKind::NamedSet, NAMED_SET),
    kw("selected", TokenKind::NamedSet, NAMED_SET),
    kw("protein", TokenKind::NamedSet, NAMED_SET),
    kw("nucleic", TokenKind::NamedSet, NAMED_SET),
    kw("water", TokenKind::NamedSet, NAMED_SET),
    kw("solvent", TokenKind::NamedSet, NAMED_SET),
    kw("hetero", TokenKind::NamedSet, NAMED_SET),
    kw("backbone", TokenKind::NamedSet, NAMED_SET),
    kw("sidechain", TokenKind::NamedSet, NAMED_SET),
    kw("hydrogen", TokenKind::NamedSet, NAMED_SET),
    kw("metal", TokenKind::NamedSet, NAMED_SET),
];

static BY_NAME: LazyLock<HashMap<&'static str, &'static Keyword>> = LazyLock::new(|| {
    let mut map = HashMap::with_capacity(KEYWORDS.len());
    for k in KEYWORDS {
        map.insert(k.name, k);
    }
    map
});

/// Look up a keyword by name, case-insensitively.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Keyword> {
    if let Some(k) = BY_NAME.get(name) {
        return Some(*k);
    }
    let lower = name.to_ascii_lowercase();
    BY_NAME.get(lower.as_str()).copied()
}

/// Model properties whose values are strings; ordering comparators do
/// not apply to them.
pub const STRING_PROPERTIES: &[&str] = &[
    "resname", "chain", "altloc", "atomname", "element", "inscode",
];

/// Whether a property keyword is string-valued.
#[must_use]
pub fn is_string_property(name: &str) -> bool {
    STRING_PROPERTIES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

/// Map a punctuation/operator symbol to its token kind.
#[must_use]
pub fn symbol_kind(sym: &str) -> Option<TokenKind> {
    Some(match sym {
        "(" => TokenKind::LeftParen,
        ")" => TokenKind::RightParen,
        "[" => TokenKind::LeftSquare,
        "]" => TokenKind::RightSquare,
        "{" => TokenKind::LeftBrace,
        "}" => TokenKind::RightBrace,
        "," => TokenKind::Comma,
        ";" => TokenKind::Semicolon,
        ":" => TokenKind::Colon,
        "." => TokenKind::Dot,
        ".." => TokenKind::DotDot,
        "+" => TokenKind::Plus,
        "-" => TokenKind::Minus,
        "*" => TokenKind::Times,
        "/" => TokenKind::Divide,
        "%" => TokenKind::Percent,
        "%%" => TokenKind::Modulo,
        "**" => TokenKind::Power,
        "==" => TokenKind::EqEq,
        "!=" => TokenKind::NotEq,
        ">" => TokenKind::Gt,
        "<" => TokenKind::Lt,
        ">=" => TokenKind::GtEq,
        "<=" => TokenKind::LtEq,
        "=" => TokenKind::Assign,
        "!" => TokenKind::Not,
        "?" => TokenKind::Question,
        "&" | "&&" => TokenKind::And,
        "|" | "||" => TokenKind::Or,
        "+=" => TokenKind::PlusAssign,
        "-=" => TokenKind::MinusAssign,
        "*=" => TokenKind::TimesAssign,
        "/=" => TokenKind::DivideAssign,
        "++" => TokenKind::PlusPlus,
        "--" => TokenKind::MinusMinus,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
