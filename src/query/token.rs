//! Token types produced by the q-filter lexer.

use std::fmt;

/// Classification of a lexed token.
///
/// The checker's state machine and its error messages work on kinds only;
/// payloads live in [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Open,
    Close,
    Variable,
    NotExists,
    And,
    Or,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Match,
    NoMatch,
    Comma,
    Range,
    StringValue,
    IntegerValue,
    FloatValue,
    TrueValue,
    FalseValue,
    RegexValue,
}

impl TokenKind {
    /// Name used in validation error details.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Close => "Close",
            Self::Variable => "Variable",
            Self::NotExists => "NotExists",
            Self::And => "And",
            Self::Or => "Or",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Ge => "GE",
            Self::Gt => "GT",
            Self::Le => "LE",
            Self::Lt => "LT",
            Self::Match => "Match",
            Self::NoMatch => "NoMatch",
            Self::Comma => "Comma",
            Self::Range => "Range",
            Self::StringValue => "StringValue",
            Self::IntegerValue => "IntegerValue",
            Self::FloatValue => "FloatValue",
            Self::TrueValue => "TrueValue",
            Self::FalseValue => "FalseValue",
            Self::RegexValue => "RegexpValue",
        }
    }

    /// `==`, `!=`, `>=`, `>`, `<=`, `<`
    #[inline]
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Ge | Self::Gt | Self::Le | Self::Lt)
    }

    /// Any value literal except a regex.
    #[inline]
    #[must_use]
    pub fn is_plain_value(self) -> bool {
        matches!(
            self,
            Self::StringValue
                | Self::IntegerValue
                | Self::FloatValue
                | Self::TrueValue
                | Self::FalseValue
        )
    }

    /// Tokens that switch the lexer into value context.
    #[inline]
    #[must_use]
    pub(crate) fn expects_value(self) -> bool {
        self.is_comparison()
            || matches!(self, Self::Match | Self::NoMatch | Self::Comma | Self::Range)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lexed token with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Open,
    Close,
    /// Attribute name as written, escapes still in place
    Variable(String),
    NotExists,
    And,
    Or,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Match,
    NoMatch,
    Comma,
    Range,
    Str(String),
    Integer(i64),
    Float(f64),
    True,
    False,
    /// Regex source between the slashes, `\/` already unescaped
    Regex(String),
}

impl Token {
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::Open => TokenKind::Open,
            Self::Close => TokenKind::Close,
            Self::Variable(_) => TokenKind::Variable,
            Self::NotExists => TokenKind::NotExists,
            Self::And => TokenKind::And,
            Self::Or => TokenKind::Or,
            Self::Eq => TokenKind::Eq,
            Self::Ne => TokenKind::Ne,
            Self::Ge => TokenKind::Ge,
            Self::Gt => TokenKind::Gt,
            Self::Le => TokenKind::Le,
            Self::Lt => TokenKind::Lt,
            Self::Match => TokenKind::Match,
            Self::NoMatch => TokenKind::NoMatch,
            Self::Comma => TokenKind::Comma,
            Self::Range => TokenKind::Range,
            Self::Str(_) => TokenKind::StringValue,
            Self::Integer(_) => TokenKind::IntegerValue,
            Self::Float(_) => TokenKind::FloatValue,
            Self::True => TokenKind::TrueValue,
            Self::False => TokenKind::FalseValue,
            Self::Regex(_) => TokenKind::RegexValue,
        }
    }
}

/// A token plus the byte offset where it starts in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

impl SpannedToken {
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.token.kind()
    }
}
