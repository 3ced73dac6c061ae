//! q-filter lexer.
//!
//! Turns filter text such as `(!P1;A>12)|(A<4)` into a flat token sequence.
//! The lexer only fails on text it cannot tokenize at all (unterminated
//! literals, lone `=`/`~`). Grammar violations and bad characters inside
//! variable names are left to [`super::check`], which reports them with
//! positions.

use super::token::{SpannedToken, Token};
use super::QueryError;

/// Tokenize a q-filter expression.
///
/// Whitespace between tokens is ignored. An input consisting only of
/// whitespace yields an empty sequence.
pub fn lex(text: &str) -> Result<Vec<SpannedToken>, QueryError> {
    let mut lexer = Lexer {
        chars: text.char_indices().collect(),
        cursor: 0,
        end: text.len(),
    };
    let mut tokens: Vec<SpannedToken> = Vec::new();

    while let Some((position, c)) = lexer.peek() {
        if c.is_whitespace() {
            lexer.cursor += 1;
            continue;
        }

        let value_context = tokens.last().is_some_and(|t| t.kind().expects_value());
        let token = match c {
            '(' => lexer.single(Token::Open),
            ')' => lexer.single(Token::Close),
            ';' | '&' => lexer.single(Token::And),
            '|' => lexer.single(Token::Or),
            ',' => lexer.single(Token::Comma),
            '"' => lexer.string(position)?,
            '/' => lexer.regex(position)?,
            '.' if lexer.peek_at(1) == Some('.') => {
                lexer.cursor += 2;
                Token::Range
            }
            '!' => match (lexer.peek_at(1), lexer.peek_at(2)) {
                (Some('='), _) => lexer.advance(2, Token::Ne),
                (Some('~'), Some('=')) => lexer.advance(3, Token::NoMatch),
                _ => lexer.single(Token::NotExists),
            },
            '=' => match lexer.peek_at(1) {
                Some('=') => lexer.advance(2, Token::Eq),
                _ => return Err(invalid_operator('=', position)),
            },
            '~' => match lexer.peek_at(1) {
                Some('=') => lexer.advance(2, Token::Match),
                _ => return Err(invalid_operator('~', position)),
            },
            '>' => match lexer.peek_at(1) {
                Some('=') => lexer.advance(2, Token::Ge),
                _ => lexer.single(Token::Gt),
            },
            '<' => match lexer.peek_at(1) {
                Some('=') => lexer.advance(2, Token::Le),
                _ => lexer.single(Token::Lt),
            },
            _ if value_context => classify_word(&lexer.word(false)?),
            _ => Token::Variable(lexer.word(true)?),
        };

        tokens.push(SpannedToken { token, position });
    }

    Ok(tokens)
}

struct Lexer {
    chars: Vec<(usize, char)>,
    cursor: usize,
    end: usize,
}

impl Lexer {
    #[inline]
    fn peek(&self) -> Option<(usize, char)> {
        self.chars.get(self.cursor).copied()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.cursor + offset).map(|&(_, c)| c)
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance(1, token)
    }

    fn advance(&mut self, n: usize, token: Token) -> Token {
        self.cursor += n;
        token
    }

    /// Double-quoted string; `\x` yields `x`.
    fn string(&mut self, start: usize) -> Result<Token, QueryError> {
        self.cursor += 1;
        let mut out = String::new();
        while let Some((_, c)) = self.peek() {
            self.cursor += 1;
            match c {
                '"' => return Ok(Token::Str(out)),
                '\\' => match self.peek() {
                    Some((_, escaped)) => {
                        self.cursor += 1;
                        out.push(escaped);
                    }
                    None => break,
                },
                _ => out.push(c),
            }
        }
        Err(QueryError::new(
            "ngsi-ld query language: unterminated string",
            format!("'\"' at position {start}"),
        ))
    }

    /// Slash-delimited regex; `\/` yields `/`, other escapes stay for the
    /// regex engine.
    fn regex(&mut self, start: usize) -> Result<Token, QueryError> {
        self.cursor += 1;
        let mut out = String::new();
        while let Some((_, c)) = self.peek() {
            self.cursor += 1;
            match c {
                '/' => return Ok(Token::Regex(out)),
                '\\' => match self.peek() {
                    Some((_, '/')) => {
                        self.cursor += 1;
                        out.push('/');
                    }
                    Some((_, escaped)) => {
                        self.cursor += 1;
                        out.push('\\');
                        out.push(escaped);
                    }
                    None => break,
                },
                _ => out.push(c),
            }
        }
        Err(QueryError::new(
            "ngsi-ld query language: unterminated regular expression",
            format!("'/' at position {start}"),
        ))
    }

    /// Bare word up to the next delimiter.
    ///
    /// Variables keep their backslash escapes verbatim so the checker can
    /// validate them. Value words stop at `..` so `1..5` lexes as a range.
    fn word(&mut self, variable: bool) -> Result<String, QueryError> {
        let mut out = String::new();
        while let Some((_, c)) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            if !variable && c == '.' && self.peek_at(1) == Some('.') {
                break;
            }
            if variable && c == '\\' {
                match self.peek_at(1) {
                    Some(escaped) => {
                        out.push('\\');
                        out.push(escaped);
                        self.cursor += 2;
                        continue;
                    }
                    None => {
                        return Err(QueryError::new(
                            "ngsi-ld query language: invalid escape",
                            format!("'\\' at position {}", self.end - 1),
                        ))
                    }
                }
            }
            out.push(c);
            self.cursor += 1;
        }
        Ok(out)
    }
}

#[inline]
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | ';' | '&' | '|' | ',' | '=' | '<' | '>' | '!' | '~')
}

fn invalid_operator(c: char, position: usize) -> QueryError {
    QueryError::new(
        "ngsi-ld query language: invalid operator",
        format!("'{c}' at position {position}"),
    )
}

/// `true`/`false`, then integer, then float, then plain string.
fn classify_word(word: &str) -> Token {
    match word {
        "true" => return Token::True,
        "false" => return Token::False,
        _ => {}
    }
    if let Ok(i) = word.parse::<i64>() {
        return Token::Integer(i);
    }
    let numeric_start = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric_start {
        if let Ok(f) = word.parse::<f64>() {
            if f.is_finite() {
                return Token::Float(f);
            }
        }
    }
    Token::Str(word.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::token::TokenKind;

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(text).unwrap().iter().map(SpannedToken::kind).collect()
    }

    #[test]
    fn test_lex_simple_comparison() {
        let tokens = lex("A>12").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].token, Token::Variable("A".into()));
        assert_eq!(tokens[1].token, Token::Gt);
        assert_eq!(tokens[2].token, Token::Integer(12));
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn test_lex_compound_expression() {
        use TokenKind::*;
        assert_eq!(
            kinds("(!P1&A>12)|(A<4)"),
            vec![Open, NotExists, Variable, And, Variable, Gt, IntegerValue, Close, Or, Open, Variable, Lt, IntegerValue, Close]
        );
    }

    #[test]
    fn test_lex_semicolon_is_and() {
        assert_eq!(kinds("A;B"), vec![TokenKind::Variable, TokenKind::And, TokenKind::Variable]);
    }

    #[test]
    fn test_lex_operators() {
        use TokenKind::*;
        assert_eq!(kinds("A==1"), vec![Variable, Eq, IntegerValue]);
        assert_eq!(kinds("A!=1"), vec![Variable, Ne, IntegerValue]);
        assert_eq!(kinds("A>=1"), vec![Variable, Ge, IntegerValue]);
        assert_eq!(kinds("A<=1"), vec![Variable, Le, IntegerValue]);
        assert_eq!(kinds("A~=/x/"), vec![Variable, Match, RegexValue]);
        assert_eq!(kinds("A!~=/x/"), vec![Variable, NoMatch, RegexValue]);
    }

    #[test]
    fn test_lex_value_classification() {
        let tokens = lex("A==true,false,7,2.5,-3,1e3,abc,2024-01-01T00:00:00Z").unwrap();
        let values: Vec<&Token> = tokens.iter().map(|t| &t.token).filter(|t| t.kind() != TokenKind::Comma).collect();
        assert_eq!(values[2], &Token::True);
        assert_eq!(values[3], &Token::False);
        assert_eq!(values[4], &Token::Integer(7));
        assert_eq!(values[5], &Token::Float(2.5));
        assert_eq!(values[6], &Token::Integer(-3));
        assert_eq!(values[7], &Token::Float(1000.0));
        assert_eq!(values[8], &Token::Str("abc".into()));
        assert_eq!(values[9], &Token::Str("2024-01-01T00:00:00Z".into()));
    }

    #[test]
    fn test_lex_range() {
        use TokenKind::*;
        assert_eq!(kinds("A==1..5"), vec![Variable, Eq, IntegerValue, Range, IntegerValue]);
        assert_eq!(kinds("A==1.5..2.5"), vec![Variable, Eq, FloatValue, Range, FloatValue]);
    }

    #[test]
    fn test_lex_quoted_string_with_escape() {
        let tokens = lex(r#"name=="a \"b\" c""#).unwrap();
        assert_eq!(tokens[2].token, Token::Str(r#"a "b" c"#.into()));
    }

    #[test]
    fn test_lex_regex_with_escaped_slash() {
        let tokens = lex(r"path~=/a\/b\d+/").unwrap();
        assert_eq!(tokens[2].token, Token::Regex(r"a/b\d+".into()));
    }

    #[test]
    fn test_lex_variable_keeps_escapes_and_brackets() {
        let tokens = lex(r"a.b[c]:d\ e==1").unwrap();
        assert_eq!(tokens[0].token, Token::Variable(r"a.b[c]:d\ e".into()));
    }

    #[test]
    fn test_lex_variable_with_bad_char_is_left_to_checker() {
        let tokens = lex("A#B>1").unwrap();
        assert_eq!(tokens[0].token, Token::Variable("A#B".into()));
    }

    #[test]
    fn test_lex_whitespace_only_is_empty() {
        assert!(lex("   ").unwrap().is_empty());
        assert!(lex("").unwrap().is_empty());
    }

    #[test]
    fn test_lex_single_equals_rejected() {
        let err = lex("A=1").unwrap_err();
        assert_eq!(err.title, "ngsi-ld query language: invalid operator");
        assert_eq!(err.detail, "'=' at position 1");
    }

    #[test]
    fn test_lex_unterminated_literals() {
        assert!(lex(r#"A=="abc"#).unwrap_err().title.contains("unterminated string"));
        assert!(lex("A~=/abc").unwrap_err().title.contains("unterminated regular expression"));
    }

    #[test]
    fn test_lex_whitespace_between_tokens() {
        use TokenKind::*;
        assert_eq!(kinds(" ( A > 1 ) | B "), vec![Open, Variable, Gt, IntegerValue, Close, Or, Variable]);
    }
}
