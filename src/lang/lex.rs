use super::token::{Ident, Literal, Operator, Sigil, Token, TokenKind, Word};
use super::{Diagnostic, Span};
use crate::diag;
use std::iter::Peekable;
use std::str::CharIndices;

/// Tokenize a whole source buffer. Diagnostics are collected, not fatal;
/// the token stream is always produced so later stages can keep going.
pub fn lex(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    (tokens, lexer.into_diagnostics())
}

/// A restartable token producer over a source buffer.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    line_start: usize,
    at_line_start: bool,
    diagnostics: Vec<Diagnostic>,
}

fn is_space(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic()
}

fn is_ident_part(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            line_start: 0,
            at_line_start: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn pos(&mut self) -> usize {
        match self.chars.peek() {
            Some((i, _)) => *i,
            None => self.source.len(),
        }
    }

    fn span_from(&mut self, start: usize) -> Span {
        let end = self.pos();
        Span::new(
            start,
            end,
            self.line,
            (start - self.line_start) as u32 + 1,
        )
    }

    fn slice(&self, span: &Span) -> String {
        self.source[span.start..span.end].to_string()
    }

    fn token(&mut self, start: usize, kind: TokenKind) -> Token {
        let span = self.span_from(start);
        let text = self.slice(&span);
        Token { kind, text, span }
    }

    /// Consume one line terminator; any of LF, CRLF, CR.
    fn newline(&mut self) {
        if let Some((_, ch)) = self.chars.next() {
            if ch == '\r' {
                if let Some((_, '\n')) = self.chars.peek() {
                    self.chars.next();
                }
            }
        }
        self.line += 1;
        self.line_start = self.pos();
        self.at_line_start = true;
    }

    fn skip_to_eol(&mut self) {
        while let Some((_, ch)) = self.chars.peek() {
            if *ch == '\n' || *ch == '\r' {
                break;
            }
            self.chars.next();
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        loop {
            let (start, ch) = match self.chars.peek() {
                Some(&(i, c)) => (i, c),
                None => return None,
            };
            if is_space(ch) {
                self.chars.next();
                continue;
            }
            if ch == '\n' || ch == '\r' {
                let token = {
                    self.newline_token(start)
                };
                return Some(token);
            }
            if ch == '\'' {
                self.skip_to_eol();
                continue;
            }
            let at_line_start = self.at_line_start;
            self.at_line_start = false;
            if ch == '"' {
                return Some(self.string(start));
            }
            if ch.is_ascii_digit() || (ch == '.' && self.peek_second_is_digit()) {
                return Some(self.number(start));
            }
            if ch == '&' {
                return Some(self.ampersand(start));
            }
            if ch == '$' && at_line_start {
                return Some(self.metacommand(start));
            }
            if is_ident_start(ch) || ch == '_' {
                match self.word(start) {
                    Some(token) => return Some(token),
                    None => continue, // line continuation
                }
            }
            return Some(self.minutia(start));
        }
    }

    fn newline_token(&mut self, start: usize) -> Token {
        let line = self.line;
        let col = (start - self.line_start) as u32 + 1;
        self.newline();
        let end = self.pos();
        Token {
            kind: TokenKind::Eol,
            text: self.source[start..end].to_string(),
            span: Span::new(start, end, line, col),
        }
    }

    fn peek_second_is_digit(&self) -> bool {
        let mut it = self.chars.clone();
        it.next();
        matches!(it.peek(), Some((_, c)) if c.is_ascii_digit())
    }

    fn string(&mut self, start: usize) -> Token {
        self.chars.next(); // opening quote
        let mut value = String::new();
        loop {
            match self.chars.peek() {
                None | Some((_, '\n')) | Some((_, '\r')) => {
                    let span = self.span_from(start);
                    self.diagnostics.push(diag!(UnterminatedString, span));
                    break;
                }
                Some((_, '"')) => {
                    self.chars.next();
                    // "" inside a string is a single quote character
                    if let Some((_, '"')) = self.chars.peek() {
                        self.chars.next();
                        value.push('"');
                        continue;
                    }
                    break;
                }
                Some((_, ch)) => {
                    value.push(*ch);
                    self.chars.next();
                }
            }
        }
        self.token(start, TokenKind::Literal(Literal::Str(value)))
    }

    fn number(&mut self, start: usize) -> Token {
        let mut digits = 0usize;
        let mut seen_point = false;
        let mut exponent = None::<char>;
        let mut body = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            let up = ch.to_ascii_uppercase();
            if ch.is_ascii_digit() {
                if exponent.is_none() {
                    digits += 1;
                }
                body.push(ch);
                self.chars.next();
            } else if ch == '.' && !seen_point && exponent.is_none() {
                seen_point = true;
                body.push(ch);
                self.chars.next();
            } else if (up == 'E' || up == 'D') && exponent.is_none() && self.exponent_follows() {
                exponent = Some(up);
                body.push('E');
                self.chars.next();
                if let Some(&(_, sign)) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        body.push(sign);
                        self.chars.next();
                    }
                }
            } else {
                break;
            }
        }
        // Optional sigil suffix binds to the literal.
        let sigil = self.take_sigil();
        let span = self.span_from(start);
        let lit = self.classify_number(&body, digits, seen_point, exponent, sigil, &span);
        Token {
            kind: TokenKind::Literal(lit),
            text: self.slice(&span),
            span,
        }
    }

    /// An E or D only starts an exponent when a digit (or signed digit)
    /// follows; `10DAY` must not eat the D.
    fn exponent_follows(&self) -> bool {
        let mut it = self.chars.clone();
        it.next();
        match it.peek() {
            Some((_, c)) if c.is_ascii_digit() => true,
            Some((_, '+')) | Some((_, '-')) => {
                it.next();
                matches!(it.peek(), Some((_, c)) if c.is_ascii_digit())
            }
            _ => false,
        }
    }

    fn take_sigil(&mut self) -> Option<Sigil> {
        let ch = self.chars.peek().map(|&(_, c)| c)?;
        if ch == '&' {
            let mut it = self.chars.clone();
            it.next();
            if matches!(it.peek(), Some((_, '&'))) {
                self.chars.next();
                self.chars.next();
                return Some(Sigil::Integer64);
            }
            self.chars.next();
            return Some(Sigil::Long);
        }
        let sigil = Sigil::from_char(ch)?;
        self.chars.next();
        Some(sigil)
    }

    fn classify_number(
        &mut self,
        body: &str,
        digits: usize,
        seen_point: bool,
        exponent: Option<char>,
        sigil: Option<Sigil>,
        span: &Span,
    ) -> Literal {
        let invalid = |this: &mut Self| {
            this.diagnostics.push(diag!(InvalidNumber, span));
            Literal::Int(0)
        };
        match sigil {
            Some(Sigil::Integer) => match body.parse::<i64>() {
                Ok(n) if (i16::MIN as i64..=i16::MAX as i64).contains(&n) => Literal::Int(n as i16),
                _ => invalid(self),
            },
            Some(Sigil::Long) => match body.parse::<i64>() {
                Ok(n) if (i32::MIN as i64..=i32::MAX as i64).contains(&n) => {
                    Literal::Long(n as i32)
                }
                _ => invalid(self),
            },
            Some(Sigil::Integer64) => match body.parse::<i64>() {
                Ok(n) => Literal::Int64(n),
                Err(_) => invalid(self),
            },
            Some(Sigil::Single) => match body.parse::<f32>() {
                Ok(n) => Literal::Single(n),
                Err(_) => invalid(self),
            },
            Some(Sigil::Double) => match body.parse::<f64>() {
                Ok(n) => Literal::Double(n),
                Err(_) => invalid(self),
            },
            Some(Sigil::Text) => invalid(self),
            None => {
                let float = seen_point || exponent.is_some();
                if exponent == Some('D') || (float && digits > 7) {
                    match body.parse::<f64>() {
                        Ok(n) => Literal::Double(n),
                        Err(_) => invalid(self),
                    }
                } else if float {
                    match body.parse::<f32>() {
                        Ok(n) => Literal::Single(n),
                        Err(_) => invalid(self),
                    }
                } else if let Ok(n) = body.parse::<i16>() {
                    Literal::Int(n)
                } else if let Ok(n) = body.parse::<i32>() {
                    Literal::Long(n)
                } else {
                    match body.parse::<f64>() {
                        Ok(n) => Literal::Double(n),
                        Err(_) => invalid(self),
                    }
                }
            }
        }
    }

    /// `&H` hex, `&O` octal, or bare `&` octal. The value takes the width
    /// of its bit pattern: 16 bits gives INTEGER, 32 gives LONG.
    fn ampersand(&mut self, start: usize) -> Token {
        self.chars.next();
        let radix = match self.chars.peek() {
            Some((_, 'H')) | Some((_, 'h')) => {
                self.chars.next();
                16
            }
            Some((_, 'O')) | Some((_, 'o')) => {
                self.chars.next();
                8
            }
            Some((_, c)) if c.is_digit(8) => 8,
            _ => {
                let span = self.span_from(start);
                self.diagnostics.push(diag!(IllegalCharacter, span));
                return self.token(start, TokenKind::Literal(Literal::Int(0)));
            }
        };
        let mut body = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_digit(radix) {
                body.push(ch);
                self.chars.next();
            } else {
                break;
            }
        }
        let span = self.span_from(start);
        let lit = match u32::from_str_radix(&body, radix) {
            Ok(bits) if bits <= u16::MAX as u32 => Literal::Int(bits as u16 as i16),
            Ok(bits) => Literal::Long(bits as i32),
            Err(_) => {
                self.diagnostics.push(diag!(InvalidNumber, span));
                Literal::Int(0)
            }
        };
        Token {
            kind: TokenKind::Literal(lit),
            text: self.slice(&span),
            span,
        }
    }

    fn metacommand(&mut self, start: usize) -> Token {
        self.chars.next(); // $
        let mut name = String::from("$");
        while let Some(&(_, ch)) = self.chars.peek() {
            if is_ident_part(ch) {
                name.push(ch.to_ascii_uppercase());
                self.chars.next();
            } else {
                break;
            }
        }
        // $INCLUDE:"file" carries its argument in the same token.
        if let Some((_, ':')) = self.chars.peek() {
            let mut it = self.chars.clone();
            it.next();
            if matches!(it.peek(), Some((_, '"'))) {
                self.chars.next();
                self.chars.next();
                while let Some(&(_, ch)) = self.chars.peek() {
                    self.chars.next();
                    if ch == '"' {
                        break;
                    }
                }
            }
        }
        self.token(start, TokenKind::Meta(name))
    }

    /// Keywords, identifiers, and the `_` line continuation.
    fn word(&mut self, start: usize) -> Option<Token> {
        let (_, first) = *self.chars.peek().unwrap();
        if first == '_' && !self.continuation_is_word() {
            // Trailing underscore joins this line to the next.
            self.chars.next();
            while let Some(&(_, ch)) = self.chars.peek() {
                if is_space(ch) {
                    self.chars.next();
                } else {
                    break;
                }
            }
            match self.chars.peek() {
                Some((_, '\n')) | Some((_, '\r')) => {
                    self.newline();
                    self.at_line_start = false;
                }
                None => {}
                _ => {
                    let span = self.span_from(start);
                    self.diagnostics.push(diag!(IllegalCharacter, span));
                }
            }
            return None;
        }
        let mut word = String::new();
        self.chars.next();
        word.push(first.to_ascii_uppercase());
        while let Some(&(_, ch)) = self.chars.peek() {
            if is_ident_part(ch) {
                word.push(ch.to_ascii_uppercase());
                self.chars.next();
            } else {
                break;
            }
        }
        let sigil = self.take_sigil();
        let kind = if sigil.is_none() {
            if let Some(op) = Operator::from_word(&word) {
                Some(TokenKind::Operator(op))
            } else if word == "REM" {
                self.skip_to_eol();
                Some(TokenKind::Word(Word::Rem))
            } else {
                Word::from_str(&word).map(TokenKind::Word)
            }
        } else {
            None
        };
        let kind = kind.unwrap_or(TokenKind::Ident(Ident::new(word, sigil)));
        Some(self.token(start, kind))
    }

    fn continuation_is_word(&self) -> bool {
        let mut it = self.chars.clone();
        it.next();
        matches!(it.peek(), Some((_, c)) if is_ident_start(*c))
    }

    fn minutia(&mut self, start: usize) -> Token {
        let (_, ch) = self.chars.next().unwrap();
        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '#' => TokenKind::Hash,
            '.' => TokenKind::Period,
            '?' => TokenKind::Word(Word::Print),
            '^' => TokenKind::Operator(Operator::Caret),
            '*' => TokenKind::Operator(Operator::Multiply),
            '/' => TokenKind::Operator(Operator::Divide),
            '\\' => TokenKind::Operator(Operator::DivideInt),
            '+' => TokenKind::Operator(Operator::Plus),
            '-' => TokenKind::Operator(Operator::Minus),
            '=' => match self.chars.peek() {
                Some((_, '<')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::LessEqual)
                }
                Some((_, '>')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::GreaterEqual)
                }
                _ => TokenKind::Operator(Operator::Equal),
            },
            '<' => match self.chars.peek() {
                Some((_, '=')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::LessEqual)
                }
                Some((_, '>')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::NotEqual)
                }
                _ => TokenKind::Operator(Operator::Less),
            },
            '>' => match self.chars.peek() {
                Some((_, '=')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::GreaterEqual)
                }
                Some((_, '<')) => {
                    self.chars.next();
                    TokenKind::Operator(Operator::NotEqual)
                }
                _ => TokenKind::Operator(Operator::Greater),
            },
            '$' => {
                let span = self.span_from(start);
                self.diagnostics
                    .push(diag!(IllegalCharacter, span; "metacommands must start a line"));
                TokenKind::Meta("$".to_string())
            }
            _ => {
                let span = self.span_from(start);
                self.diagnostics.push(diag!(IllegalCharacter, span));
                TokenKind::Colon
            }
        };
        self.token(start, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diagnostics) = lex(source);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            kinds("print Print PRINT"),
            vec![
                TokenKind::Word(Word::Print),
                TokenKind::Word(Word::Print),
                TokenKind::Word(Word::Print),
            ]
        );
    }

    #[test]
    fn test_sigils() {
        assert_eq!(
            kinds("a% b&& c$"),
            vec![
                TokenKind::Ident(Ident::new("A", Some(Sigil::Integer))),
                TokenKind::Ident(Ident::new("B", Some(Sigil::Integer64))),
                TokenKind::Ident(Ident::new("C", Some(Sigil::Text))),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 40000 1.5 1D2 &HFF &o17 9223372036854775807&&"),
            vec![
                TokenKind::Literal(Literal::Int(1)),
                TokenKind::Literal(Literal::Long(40000)),
                TokenKind::Literal(Literal::Single(1.5)),
                TokenKind::Literal(Literal::Double(100.0)),
                TokenKind::Literal(Literal::Int(255)),
                TokenKind::Literal(Literal::Int(15)),
                TokenKind::Literal(Literal::Int64(i64::MAX)),
            ]
        );
    }

    #[test]
    fn test_string_escape() {
        assert_eq!(
            kinds(r#""say ""hi""""#),
            vec![TokenKind::Literal(Literal::Str("say \"hi\"".to_string()))]
        );
    }

    #[test]
    fn test_comment_and_eol() {
        let k = kinds("PRINT 'comment\nEND");
        assert_eq!(
            k,
            vec![
                TokenKind::Word(Word::Print),
                TokenKind::Eol,
                TokenKind::Word(Word::End),
            ]
        );
    }

    #[test]
    fn test_continuation() {
        let k = kinds("PRINT _\n1");
        assert_eq!(
            k,
            vec![
                TokenKind::Word(Word::Print),
                TokenKind::Literal(Literal::Int(1)),
            ]
        );
    }

    #[test]
    fn test_metacommand() {
        let (tokens, diagnostics) = lex("$CONSOLE\nPRINT");
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Meta("$CONSOLE".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let (_, diagnostics) = lex("PRINT \"oops");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].code,
            crate::lang::DiagnosticCode::UnterminatedString
        );
    }
}
