//! Tokenizer for expression source text.
//!
//! Keywords win over identifiers, an identifier glued to `(` opens a
//! call, and `for $x in` is consumed as a single token so the parser
//! never has to re-interpret its parts.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Error, ParseResult, Span};
use crate::name::Name;

use super::token::{SpannedToken, Token};

const TWO_CHAR_OPS: [&str; 8] = ["**", "<=", ">=", "==", "!=", "&&", "||", "??"];

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn skip_whitespace(&mut self) {
        while let Some((_, c)) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>, offset: usize, length: usize) -> Error {
        Error::syntax(message).with_span(Span::at_offset(offset, length))
    }

    /// Scan an identifier starting at the current position; the caller
    /// has checked the first character is alphabetic.
    fn scan_ident(&mut self) -> (usize, usize) {
        let start = match self.peek() {
            Some((i, _)) => i,
            None => self.input.len(),
        };
        let mut end = start;
        while let Some((i, c)) = self.peek() {
            if c.is_ascii_alphanumeric() {
                end = i + c.len_utf8();
                self.bump();
            } else {
                break;
            }
        }
        (start, end)
    }

    fn ident_name(&self, start: usize, end: usize) -> ParseResult<Name> {
        Name::new(&self.input[start..end])
            .map_err(|e| e.with_span(Span::at_offset(start, end - start)))
    }

    fn scan_number(&mut self) -> ParseResult<SpannedToken> {
        let start = match self.peek() {
            Some((i, _)) => i,
            None => self.input.len(),
        };
        let mut end = start;
        let mut is_float = false;
        while let Some((i, c)) = self.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                end = i + 1;
                self.bump();
                while let Some((j, d)) = self.peek() {
                    if d.is_ascii_digit() {
                        end = j + 1;
                        self.bump();
                    } else {
                        break;
                    }
                }
                break;
            } else {
                break;
            }
        }
        let text = &self.input[start..end];
        let token = if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid number `{}`", text), start, end - start))?;
            Token::Float(v)
        } else {
            let v: u64 = text.parse().map_err(|_| {
                self.error(
                    format!("integer literal `{}` is out of range", text),
                    start,
                    end - start,
                )
            })?;
            Token::Int(v)
        };
        Ok(SpannedToken::new(token, start, end - start))
    }

    fn scan_string(&mut self) -> ParseResult<SpannedToken> {
        let (start, _) = self.bump().unwrap_or((0, '"'));
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal", start, 1)),
                Some((_, '"')) => break,
                Some((i, '\\')) => match self.bump() {
                    None => return Err(self.error("unterminated string literal", start, 1)),
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, '"')) => text.push('"'),
                    Some((_, '\\')) => text.push('\\'),
                    Some((_, 'u')) => text.push(self.scan_unicode(i, 4)?),
                    Some((_, 'U')) => text.push(self.scan_unicode(i, 8)?),
                    Some((j, other)) => {
                        return Err(self.error(
                            format!("unknown escape `\\{}`", other),
                            j - 1,
                            2,
                        ))
                    }
                },
                Some((_, c)) => text.push(c),
            }
        }
        let end = self
            .peek()
            .map(|(i, _)| i)
            .unwrap_or(self.input.len());
        Ok(SpannedToken::new(Token::Str(text), start, end - start))
    }

    fn scan_unicode(&mut self, escape_start: usize, digits: usize) -> ParseResult<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            match self.bump() {
                Some((_, c)) if c.is_ascii_hexdigit() => {
                    code = code * 16 + c.to_digit(16).unwrap_or(0);
                }
                _ => {
                    return Err(self.error(
                        format!("unicode escape needs {} hex digits", digits),
                        escape_start,
                        2,
                    ))
                }
            }
        }
        char::from_u32(code).ok_or_else(|| {
            self.error(
                format!("U+{:04X} is not a valid character", code),
                escape_start,
                2 + digits,
            )
        })
    }

    /// Consume the rest of a `for $x in` group; `for` itself is already
    /// scanned and spans `start..for_end`.
    fn scan_for_group(&mut self, start: usize) -> ParseResult<SpannedToken> {
        self.skip_whitespace();
        if let Some((_, '$')) = self.peek() {
            self.bump();
        }
        match self.peek() {
            Some((_, c)) if c.is_ascii_alphabetic() => {}
            _ => return Err(self.error("expected a loop variable after `for`", start, 3)),
        }
        let (vs, ve) = self.scan_ident();
        let var = self.ident_name(vs, ve)?;
        self.skip_whitespace();
        match self.peek() {
            Some((_, c)) if c.is_ascii_alphabetic() => {}
            _ => return Err(self.error("expected `in` after the loop variable", start, 3)),
        }
        let (ks, ke) = self.scan_ident();
        if !self.input[ks..ke].eq_ignore_ascii_case("in") {
            return Err(self.error("expected `in` after the loop variable", ks, ke - ks));
        }
        Ok(SpannedToken::new(Token::For(var), start, ke - start))
    }

    fn next_token(&mut self) -> ParseResult<Option<SpannedToken>> {
        self.skip_whitespace();
        let (i, c) = match self.peek() {
            Some(p) => p,
            None => return Ok(None),
        };

        if c == '"' {
            return self.scan_string().map(Some);
        }
        if c.is_ascii_digit() {
            return self.scan_number().map(Some);
        }
        if c == '$' {
            self.bump();
            match self.peek() {
                Some((_, a)) if a.is_ascii_alphabetic() => {
                    let (s, e) = self.scan_ident();
                    let name = self.ident_name(s, e)?;
                    return Ok(Some(SpannedToken::new(Token::Ref(name), i, e - i)));
                }
                _ => return Err(self.error("expected an identifier after `$`", i, 1)),
            }
        }
        if c.is_ascii_alphabetic() {
            let (s, e) = self.scan_ident();
            let word = &self.input[s..e];
            if word.eq_ignore_ascii_case("for") {
                return self.scan_for_group(s).map(Some);
            }
            if word.eq_ignore_ascii_case("if") {
                return Ok(Some(SpannedToken::new(Token::If, s, e - s)));
            }
            if word.eq_ignore_ascii_case("and") {
                return Ok(Some(SpannedToken::new(Token::Op("and"), s, e - s)));
            }
            if word.eq_ignore_ascii_case("or") {
                return Ok(Some(SpannedToken::new(Token::Op("or"), s, e - s)));
            }
            if word.eq_ignore_ascii_case("true") {
                return Ok(Some(SpannedToken::new(Token::Bool(true), s, e - s)));
            }
            if word.eq_ignore_ascii_case("false") {
                return Ok(Some(SpannedToken::new(Token::Bool(false), s, e - s)));
            }
            let name = self.ident_name(s, e)?;
            // a call opens only when the paren is glued to the name
            if let Some((_, '(')) = self.peek() {
                self.bump();
                return Ok(Some(SpannedToken::new(Token::FuncOpen(name), s, e - s + 1)));
            }
            return Ok(Some(SpannedToken::new(Token::Ref(name), s, e - s)));
        }
        if c == '.' {
            self.bump();
            match self.peek() {
                Some((_, a)) if a.is_ascii_alphabetic() => {
                    let (s, e) = self.scan_ident();
                    let name = self.ident_name(s, e)?;
                    return Ok(Some(SpannedToken::new(Token::Field(name), i, e - i)));
                }
                _ => return Err(self.error("expected a field name after `.`", i, 1)),
            }
        }

        let rest = &self.input[i..];
        for op in TWO_CHAR_OPS {
            if rest.starts_with(op) {
                self.bump();
                self.bump();
                return Ok(Some(SpannedToken::new(Token::Op(op), i, 2)));
            }
        }

        self.bump();
        let single = |t: Token| Ok(Some(SpannedToken::new(t, i, 1)));
        match c {
            '*' => single(Token::Op("*")),
            '/' => single(Token::Op("/")),
            '%' => single(Token::Op("%")),
            '+' => single(Token::Op("+")),
            '-' => single(Token::Op("-")),
            '<' => single(Token::Op("<")),
            '>' => single(Token::Op(">")),
            '&' => single(Token::Op("&")),
            '^' => single(Token::Op("^")),
            '|' => single(Token::Op("|")),
            '!' => single(Token::Op("!")),
            '?' => single(Token::Question),
            ':' => single(Token::Colon),
            ',' => single(Token::Comma),
            '(' => single(Token::OpenParen),
            ')' => single(Token::CloseParen),
            '[' => single(Token::OpenBracket),
            ']' => single(Token::CloseBracket),
            '{' => single(Token::OpenBrace),
            '}' => single(Token::CloseBrace),
            other => Err(self.error(format!("unexpected character `{}`", other), i, 1)),
        }
    }
}

/// Tokenize a complete expression source string.
pub fn tokenize(input: &str) -> ParseResult<Vec<SpannedToken>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("3"), vec![Token::Int(3)]);
        assert_eq!(kinds("3.25"), vec![Token::Float(3.25)]);
        assert_eq!(kinds("12."), vec![Token::Float(12.0)]);
        assert!(tokenize("99999999999999999999999").is_err());
    }

    #[test]
    fn test_refs_and_calls() {
        let name = Name::new("foo").unwrap();
        assert_eq!(kinds("$foo"), vec![Token::Ref(name.clone())]);
        assert_eq!(kinds("foo"), vec![Token::Ref(name.clone())]);
        assert_eq!(
            kinds("foo(1)"),
            vec![Token::FuncOpen(name), Token::Int(1), Token::CloseParen]
        );
        // a space between the name and the paren is not a call
        assert_eq!(
            kinds("foo (1)"),
            vec![
                Token::Ref(Name::new("foo").unwrap()),
                Token::OpenParen,
                Token::Int(1),
                Token::CloseParen
            ]
        );
    }

    #[test]
    fn test_keywords_beat_identifiers() {
        assert_eq!(kinds("true"), vec![Token::Bool(true)]);
        assert_eq!(kinds("and"), vec![Token::Op("and")]);
        assert_eq!(kinds("IF"), vec![Token::If]);
        // but only on word boundaries
        assert_eq!(kinds("android"), vec![Token::Ref(Name::new("android").unwrap())]);
        assert_eq!(kinds("iffy"), vec![Token::Ref(Name::new("iffy").unwrap())]);
    }

    #[test]
    fn test_for_group() {
        assert_eq!(
            kinds("$x for $x in $items"),
            vec![
                Token::Ref(Name::new("x").unwrap()),
                Token::For(Name::new("x").unwrap()),
                Token::Ref(Name::new("items").unwrap()),
            ]
        );
        assert_eq!(kinds("for i in s")[0], Token::For(Name::new("i").unwrap()));
        assert!(tokenize("1 for in x").is_err());
        assert!(tokenize("1 for $x of y").is_err());
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(kinds("**"), vec![Token::Op("**")]);
        assert_eq!(kinds("*"), vec![Token::Op("*")]);
        assert_eq!(kinds("<="), vec![Token::Op("<=")]);
        assert_eq!(kinds("??"), vec![Token::Op("??")]);
        assert_eq!(kinds("?"), vec![Token::Question]);
        assert_eq!(
            kinds("a&&b"),
            vec![
                Token::Ref(Name::new("a").unwrap()),
                Token::Op("&&"),
                Token::Ref(Name::new("b").unwrap())
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#""hi""#), vec![Token::Str("hi".into())]);
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![Token::Str("a\"b\n".into())]
        );
        assert_eq!(kinds(r#""A""#), vec![Token::Str("A".into())]);
        assert!(tokenize(r#""open"#).is_err());
        assert!(tokenize(r#""\q""#).is_err());
    }

    #[test]
    fn test_field_access() {
        assert_eq!(
            kinds("$c.r"),
            vec![
                Token::Ref(Name::new("c").unwrap()),
                Token::Field(Name::new("r").unwrap())
            ]
        );
        assert!(tokenize("$c. ").is_err());
    }

    #[test]
    fn test_spans() {
        let tokens = tokenize("1 + foo").unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 2);
        assert_eq!(tokens[2].offset, 4);
        assert_eq!(tokens[2].length, 3);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("1 @ 2").unwrap_err();
        assert_eq!(err.span().map(|s| s.column), Some(3));
    }
}
