//! Structural validation of a lexed q-filter.
//!
//! A small state machine over the token stream. Each state records what
//! the previous token was, which fixes what may come next. A parenthesis
//! depth counter catches unbalanced input as soon as a `)` closes more
//! than was opened, and at the end of the sequence.

use super::token::{SpannedToken, Token, TokenKind};
use super::QueryError;

const MISMATCHED: &str = "ngsi-ld query language: mismatched parenthesis";

/// Deepest parenthesis nesting accepted. The parser recurses once per level.
pub const MAX_NESTING_DEPTH: i64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    AfterOpen,
    AfterAnd,
    AfterOr,
    AfterNot,
    AfterVariable,
    AfterNegatedVariable,
    AfterComparison,
    AfterMatch,
    AfterComma,
    AfterRange,
    AfterValue,
    AfterRegex,
    AfterClose,
}

impl State {
    /// Error title used when the next token is not allowed here.
    fn title(self) -> &'static str {
        match self {
            Self::Start => "ngsi-ld query language: invalid start token",
            Self::AfterOpen => "ngsi-ld query language: invalid token after '('",
            Self::AfterAnd => "ngsi-ld query language: invalid token after ';'",
            Self::AfterOr => "ngsi-ld query language: invalid token after '|'",
            Self::AfterNot => {
                "ngsi-ld query language: invalid token - after unary operator '!' must come a variable"
            }
            Self::AfterVariable => "ngsi-ld query language: invalid token after variable",
            Self::AfterNegatedVariable => "ngsi-ld query language: invalid token after 'negated variable'",
            Self::AfterComparison => {
                "ngsi-ld query language: after non-regexp comparison operator must come a non-regexp Value"
            }
            Self::AfterMatch => "ngsi-ld query language: after match operator must come a RegExp",
            Self::AfterComma => "ngsi-ld query language: after comma operator must come a Value",
            Self::AfterRange => "ngsi-ld query language: after range operator must come a Value",
            Self::AfterValue => "ngsi-ld query language: invalid token after value",
            Self::AfterRegex => "ngsi-ld query language: invalid token after regex",
            Self::AfterClose => "ngsi-ld query language: invalid token after ')'",
        }
    }

    /// Next state if `kind` may follow, `None` otherwise.
    fn next(self, kind: TokenKind) -> Option<State> {
        use TokenKind as K;
        match self {
            Self::Start | Self::AfterOpen | Self::AfterAnd | Self::AfterOr => match kind {
                K::Open => Some(Self::AfterOpen),
                K::Variable => Some(Self::AfterVariable),
                K::NotExists => Some(Self::AfterNot),
                _ => None,
            },
            Self::AfterNot => (kind == K::Variable).then_some(Self::AfterNegatedVariable),
            Self::AfterVariable => match kind {
                k if k.is_comparison() => Some(Self::AfterComparison),
                K::Match | K::NoMatch => Some(Self::AfterMatch),
                k => Self::after_operand(k),
            },
            Self::AfterNegatedVariable | Self::AfterRegex | Self::AfterClose => Self::after_operand(kind),
            Self::AfterComparison | Self::AfterComma | Self::AfterRange => {
                kind.is_plain_value().then_some(Self::AfterValue)
            }
            Self::AfterMatch => (kind == K::RegexValue).then_some(Self::AfterRegex),
            Self::AfterValue => match kind {
                K::Comma => Some(Self::AfterComma),
                K::Range => Some(Self::AfterRange),
                k => Self::after_operand(k),
            },
        }
    }

    /// `)`, `;` or `|` after a complete operand.
    fn after_operand(kind: TokenKind) -> Option<State> {
        match kind {
            TokenKind::Close => Some(Self::AfterClose),
            TokenKind::And => Some(Self::AfterAnd),
            TokenKind::Or => Some(Self::AfterOr),
            _ => None,
        }
    }

    /// Whether the expression may end in this state.
    fn accepting(self) -> bool {
        matches!(
            self,
            Self::AfterVariable | Self::AfterNegatedVariable | Self::AfterValue | Self::AfterRegex | Self::AfterClose
        )
    }
}

/// Validate a token sequence, returning the first violation found.
///
/// Pure: the tokens are not modified.
pub fn check(tokens: &[SpannedToken]) -> Result<(), QueryError> {
    if tokens.is_empty() {
        return Err(QueryError::new(
            "ngsi-ld query language: empty expression",
            "the expression contains no tokens",
        ));
    }

    let mut state = State::Start;
    let mut depth: i64 = 0;

    for spanned in tokens {
        let kind = spanned.kind();
        state = state
            .next(kind)
            .ok_or_else(|| QueryError::new(state.title(), kind.name()))?;

        match &spanned.token {
            Token::Variable(name) => check_variable_chars(name, spanned.position)?,
            Token::Open => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(QueryError::new(
                        MISMATCHED,
                        format!("too deeply nested: more than {MAX_NESTING_DEPTH} levels of '('"),
                    ));
                }
            }
            Token::Close => {
                depth -= 1;
                if depth < 0 {
                    return Err(QueryError::new(MISMATCHED, "Excess of END Tokens ')'"));
                }
            }
            _ => {}
        }
    }

    if state == State::AfterOpen {
        return Err(QueryError::new(MISMATCHED, "expression can't end in a '('"));
    }
    if !state.accepting() {
        return Err(QueryError::new(state.title(), "end of expression"));
    }
    if depth > 0 {
        return Err(QueryError::new(MISMATCHED, "Excess of START Tokens '('"));
    }
    Ok(())
}

/// Variable names allow ASCII alphanumerics, `[`, `]`, `_`, `.`, `:` and
/// backslash-escaped characters.
fn check_variable_chars(name: &str, position: usize) -> Result<(), QueryError> {
    let mut chars = name.char_indices();
    while let Some((offset, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '[' | ']' | '_' | '.' | ':') {
            continue;
        }
        return Err(QueryError::new(
            "ngsi-ld query language: invalid character in variable name",
            format!("'{c}' at position {}", position + offset),
        ));
    }
    Ok(())
}
