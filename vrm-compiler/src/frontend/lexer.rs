//! Tokenizer for the source language, built on `logos`.
//!
//! Whitespace and `#` line comments are skipped. Identifiers are
//! lowercase-and-underscore only; numbers are non-negative decimal
//! literals.

use logos::Logos;
use std::fmt;

#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // --- Keywords ---
    #[token("PROCEDURE")]
    Procedure,
    #[token("PROGRAM")]
    Program,
    #[token("IS")]
    Is,
    #[token("IN")]
    In,
    #[token("END")]
    End,
    #[token("IF")]
    If,
    #[token("THEN")]
    Then,
    #[token("ELSE")]
    Else,
    #[token("ENDIF")]
    EndIf,
    #[token("WHILE")]
    While,
    #[token("DO")]
    Do,
    #[token("ENDWHILE")]
    EndWhile,
    #[token("REPEAT")]
    Repeat,
    #[token("UNTIL")]
    Until,
    #[token("READ")]
    Read,
    #[token("WRITE")]
    Write,
    /// Marks an array parameter in a procedure head.
    #[token("T")]
    ArrayMark,

    // --- Identifiers and numbers ---
    #[regex(r"[_a-z]+", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    Number(u64),

    // --- Operators ---
    #[token(":=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Eq,
    #[token("!=")]
    Neq,
    #[token(">=")]
    Ge,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token("<")]
    Lt,

    // --- Punctuation ---
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Procedure => write!(f, "PROCEDURE"),
            Token::Program => write!(f, "PROGRAM"),
            Token::Is => write!(f, "IS"),
            Token::In => write!(f, "IN"),
            Token::End => write!(f, "END"),
            Token::If => write!(f, "IF"),
            Token::Then => write!(f, "THEN"),
            Token::Else => write!(f, "ELSE"),
            Token::EndIf => write!(f, "ENDIF"),
            Token::While => write!(f, "WHILE"),
            Token::Do => write!(f, "DO"),
            Token::EndWhile => write!(f, "ENDWHILE"),
            Token::Repeat => write!(f, "REPEAT"),
            Token::Until => write!(f, "UNTIL"),
            Token::Read => write!(f, "READ"),
            Token::Write => write!(f, "WRITE"),
            Token::ArrayMark => write!(f, "T"),
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Assign => write!(f, ":="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Eq => write!(f, "="),
            Token::Neq => write!(f, "!="),
            Token::Ge => write!(f, ">="),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Lt => write!(f, "<"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

/// A lexical error with 1-based source coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalError {
    pub line: usize,
    pub column: usize,
    pub unexpected: char,
}

impl fmt::Display for LexicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected character '{}' at line {}, column {}",
            self.unexpected, self.line, self.column
        )
    }
}

impl std::error::Error for LexicalError {}

/// Convert a byte position to 1-based line and column numbers.
pub fn position_to_line_col(source: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= position {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// A token together with the 1-based source line it starts on.
pub type SpannedToken = (Token, usize);

/// Tokenize the whole source up front, attaching line numbers.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexicalError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = position_to_line_col(source, span.start);
        match result {
            Ok(token) => tokens.push((token, line)),
            Err(()) => {
                return Err(LexicalError {
                    line,
                    column,
                    unexpected: source[span.start..].chars().next().unwrap_or('\0'),
                })
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_win_over_identifiers() {
        let tokens = tokenize("WHILE x DO").unwrap();
        assert_eq!(
            tokens.iter().map(|(t, _)| t.clone()).collect::<Vec<_>>(),
            vec![Token::While, Token::Ident("x".to_string()), Token::Do]
        );
    }

    #[test]
    fn comments_and_lines_are_tracked() {
        let tokens = tokenize("READ x;\n# nothing here\nWRITE x;").unwrap();
        assert_eq!(tokens[0].1, 1);
        assert_eq!(tokens[3].1, 3);
    }

    #[test]
    fn stray_characters_are_reported_with_position() {
        let err = tokenize("READ x;\n@").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.unexpected, '@');
    }
}
