//! Tokenizer for guard expressions

use super::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Dot,
    LParen,
    RParen,
    Not,
    Minus,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Token with its byte offset in the source expression
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let two = |token: Token| Spanned { token, pos };

        let token = match (c, peek) {
            ('&', Some('&')) => {
                i += 2;
                two(Token::And)
            }
            ('|', Some('|')) => {
                i += 2;
                two(Token::Or)
            }
            ('=', Some('=')) => {
                i += 2;
                two(Token::Eq)
            }
            ('!', Some('=')) => {
                i += 2;
                two(Token::Ne)
            }
            ('<', Some('=')) => {
                i += 2;
                two(Token::Le)
            }
            ('>', Some('=')) => {
                i += 2;
                two(Token::Ge)
            }
            ('<', _) => {
                i += 1;
                two(Token::Lt)
            }
            ('>', _) => {
                i += 1;
                two(Token::Gt)
            }
            ('!', _) => {
                i += 1;
                two(Token::Not)
            }
            ('-', _) => {
                i += 1;
                two(Token::Minus)
            }
            ('.', _) => {
                i += 1;
                two(Token::Dot)
            }
            ('(', _) => {
                i += 1;
                two(Token::LParen)
            }
            (')', _) => {
                i += 1;
                two(Token::RParen)
            }
            ('\'' | '"', _) => {
                let (value, next) = lex_string(&chars, i)?;
                i = next;
                two(Token::Str(value))
            }
            (c, _) if c.is_ascii_digit() => {
                // Directly after a dot we are inside a path, so only an index is valid
                let in_path = matches!(tokens.last(), Some(Spanned { token: Token::Dot, .. }));
                let (value, next) = lex_number(src, &chars, i, !in_path)?;
                i = next;
                two(Token::Num(value))
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                two(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                })
            }
            (c, _) => return Err(ConditionError::UnexpectedChar { ch: c, pos }),
        };

        tokens.push(token);
    }

    Ok(tokens)
}

fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ConditionError> {
    let (pos, quote) = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' {
            let escaped = chars
                .get(i + 1)
                .map(|(_, c)| *c)
                .ok_or(ConditionError::UnterminatedString { pos })?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }

    Err(ConditionError::UnterminatedString { pos })
}

fn lex_number(
    src: &str,
    chars: &[(usize, char)],
    start: usize,
    allow_fraction: bool,
) -> Result<(f64, usize), ConditionError> {
    let mut i = start;
    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }

    let has_fraction = allow_fraction
        && chars.get(i).map(|(_, c)| *c) == Some('.')
        && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit());
    if has_fraction {
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    let begin = chars[start].0;
    let end = chars.get(i).map(|(p, _)| *p).unwrap_or(src.len());
    let text = &src[begin..end];
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| ConditionError::InvalidNumber {
            text: text.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(
            kinds("output.score >= 0.5"),
            vec![
                Token::Ident("output".into()),
                Token::Dot,
                Token::Ident("score".into()),
                Token::Ge,
                Token::Num(0.5),
            ]
        );
    }

    #[test]
    fn test_path_index_is_not_a_fraction() {
        assert_eq!(
            kinds("output.items.0.1"),
            vec![
                Token::Ident("output".into()),
                Token::Dot,
                Token::Ident("items".into()),
                Token::Dot,
                Token::Num(0.0),
                Token::Dot,
                Token::Num(1.0),
            ]
        );
    }

    #[test]
    fn test_strings_and_keywords() {
        assert_eq!(
            kinds(r#"'it\'s' != "x" && !true || null"#),
            vec![
                Token::Str("it's".into()),
                Token::Ne,
                Token::Str("x".into()),
                Token::And,
                Token::Not,
                Token::True,
                Token::Or,
                Token::Null,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("output.name == 'abc"),
            Err(ConditionError::UnterminatedString { pos: 15 })
        ));
    }

    #[test]
    fn test_rejects_single_ampersand() {
        assert!(matches!(
            tokenize("a & b"),
            Err(ConditionError::UnexpectedChar { ch: '&', .. })
        ));
    }
}
