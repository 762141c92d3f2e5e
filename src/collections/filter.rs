//! Filter expression grammar for collection list requests.
//!
//! ```text
//! expr       := term ( OR term )*
//! term       := factor ( AND factor )*
//! factor     := '(' expr ')' | comparison
//! comparison := column op value | column IN '(' value ( ',' value )* ')'
//! op         := '=' | '!=' | '<' | '<=' | '>' | '>=' | LIKE | ILIKE
//! value      := JSON string | JSON number | true | false | null
//! ```
//!
//! Keywords are case-insensitive. Columns are bare identifiers matched against
//! the schema cache at SQL-build time; values always bind as parameters.
//! Errors carry the byte offset of the offending token and, when known, the
//! column being compared.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub column: Option<String>,
}

impl ParseError {
    fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
            column: None,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)?;
        if let Some(column) = &self.column {
            write!(f, " (column {column})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ILike,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
            CmpOp::ILike => "ILIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Cmp { column: String, op: CmpOp, value: Value },
    In { column: String, values: Vec<Value> },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

impl FilterExpr {
    /// All column names referenced by the expression, in filter order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::Cmp { column, .. } | FilterExpr::In { column, .. } => out.push(column),
            FilterExpr::And(a, b) | FilterExpr::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Symbol(CmpOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(&c) = self.input.get(self.pos) else { break };
            let kind = match c {
                b'(' => {
                    self.pos += 1;
                    TokenKind::LParen
                }
                b')' => {
                    self.pos += 1;
                    TokenKind::RParen
                }
                b',' => {
                    self.pos += 1;
                    TokenKind::Comma
                }
                b'=' => {
                    self.pos += 1;
                    TokenKind::Symbol(CmpOp::Eq)
                }
                b'!' => {
                    if self.input.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        TokenKind::Symbol(CmpOp::Ne)
                    } else {
                        return Err(ParseError::at(start, "expected '=' after '!'"));
                    }
                }
                b'<' => {
                    if self.input.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        TokenKind::Symbol(CmpOp::Le)
                    } else {
                        self.pos += 1;
                        TokenKind::Symbol(CmpOp::Lt)
                    }
                }
                b'>' => {
                    if self.input.get(self.pos + 1) == Some(&b'=') {
                        self.pos += 2;
                        TokenKind::Symbol(CmpOp::Ge)
                    } else {
                        self.pos += 1;
                        TokenKind::Symbol(CmpOp::Gt)
                    }
                }
                b'"' => TokenKind::Str(self.string_literal()?),
                b'-' | b'0'..=b'9' => TokenKind::Num(self.number_literal()?),
                c if c == b'_' || c.is_ascii_alphabetic() => TokenKind::Ident(self.identifier()),
                _ => {
                    return Err(ParseError::at(start, format!("unexpected character '{}'", self.input[start] as char)));
                }
            };
            tokens.push(Token { kind, offset: start });
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while self.input.get(self.pos).is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .input
            .get(self.pos)
            .is_some_and(|c| *c == b'_' || c.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn string_literal(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.input.get(self.pos) {
                None => return Err(ParseError::at(start, "unterminated string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    let escape_at = self.pos;
                    self.pos += 1;
                    match self.input.get(self.pos) {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'r') => out.push('\r'),
                        Some(b'u') => {
                            let hex = self
                                .input
                                .get(self.pos + 1..self.pos + 5)
                                .ok_or_else(|| ParseError::at(escape_at, "truncated unicode escape"))?;
                            let hex = std::str::from_utf8(hex).map_err(|_| ParseError::at(escape_at, "invalid unicode escape"))?;
                            let code = u32::from_str_radix(hex, 16).map_err(|_| ParseError::at(escape_at, "invalid unicode escape"))?;
                            out.push(char::from_u32(code).ok_or_else(|| ParseError::at(escape_at, "invalid unicode escape"))?);
                            self.pos += 4;
                        }
                        _ => return Err(ParseError::at(escape_at, "invalid escape sequence")),
                    }
                    self.pos += 1;
                }
                Some(&c) => {
                    // Multi-byte UTF-8 passes through unchanged.
                    let char_start = self.pos;
                    let mut end = self.pos + 1;
                    while end < self.input.len() && (self.input[end] & 0xC0) == 0x80 {
                        end += 1;
                    }
                    if c < 0x80 {
                        out.push(c as char);
                        self.pos += 1;
                    } else {
                        out.push_str(&String::from_utf8_lossy(&self.input[char_start..end]));
                        self.pos = end;
                    }
                }
            }
        }
    }

    fn number_literal(&mut self) -> Result<serde_json::Number, ParseError> {
        let start = self.pos;
        if self.input.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while self.input.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.input.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            while self.input.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.input.get(self.pos), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.input.get(self.pos), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.input.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).expect("ascii number");
        // Going through serde_json keeps integers integral, so "5" binds as
        // "5" and not "5.0".
        serde_json::from_str::<serde_json::Number>(text).map_err(|_| ParseError::at(start, "invalid number literal"))
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

/// Parse a filter expression. Empty input is an error; callers treat an absent
/// `filter` query parameter as "no filter" before getting here.
pub fn parse_filter(input: &str) -> Result<FilterExpr, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    if tokens.is_empty() {
        return Err(ParseError::at(0, "empty filter expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError::at(extra.offset, "unexpected trailing input"));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_offset(&self) -> usize {
        self.input_len
    }

    fn keyword(&self, token: &Token) -> Option<String> {
        match &token.kind {
            TokenKind::Ident(word) => Some(word.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_and()?;
        while let Some(token) = self.peek() {
            if self.keyword(token).as_deref() == Some("OR") {
                self.pos += 1;
                let right = self.parse_and()?;
                left = FilterExpr::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_factor()?;
        while let Some(token) = self.peek() {
            if self.keyword(token).as_deref() == Some("AND") {
                self.pos += 1;
                let right = self.parse_factor()?;
                left = FilterExpr::And(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<FilterExpr, ParseError> {
        let Some(token) = self.next() else {
            return Err(ParseError::at(self.end_offset(), "expected expression"));
        };
        match token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen, ..
                    }) => Ok(inner),
                    Some(other) => Err(ParseError::at(other.offset, "expected ')'")),
                    None => Err(ParseError::at(self.end_offset(), "expected ')'")),
                }
            }
            TokenKind::Ident(column) => self.parse_comparison(column, token.offset),
            _ => Err(ParseError::at(token.offset, "expected column name or '('")),
        }
    }

    fn parse_comparison(&mut self, column: String, column_offset: usize) -> Result<FilterExpr, ParseError> {
        let with_column = |mut e: ParseError, column: &str| {
            e.column = Some(column.to_string());
            e
        };

        let Some(op_token) = self.next() else {
            return Err(with_column(ParseError::at(self.end_offset(), "expected operator"), &column));
        };

        match &op_token.kind {
            TokenKind::Symbol(op) => {
                let value = self.parse_value().map_err(|e| with_column(e, &column))?;
                Ok(FilterExpr::Cmp { column, op: *op, value })
            }
            TokenKind::Ident(_) => match self.keyword(&op_token).as_deref() {
                Some("LIKE") => {
                    let value = self.parse_value().map_err(|e| with_column(e, &column))?;
                    Ok(FilterExpr::Cmp {
                        column,
                        op: CmpOp::Like,
                        value,
                    })
                }
                Some("ILIKE") => {
                    let value = self.parse_value().map_err(|e| with_column(e, &column))?;
                    Ok(FilterExpr::Cmp {
                        column,
                        op: CmpOp::ILike,
                        value,
                    })
                }
                Some("IN") => {
                    let values = self.parse_value_list().map_err(|e| with_column(e, &column))?;
                    Ok(FilterExpr::In { column, values })
                }
                _ => Err(with_column(ParseError::at(op_token.offset, "expected comparison operator"), &column)),
            },
            _ => Err(with_column(
                ParseError::at(op_token.offset.max(column_offset), "expected comparison operator"),
                &column,
            )),
        }
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let Some(token) = self.next() else {
            return Err(ParseError::at(self.end_offset(), "expected value"));
        };
        match token.kind {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Num(n) => Ok(Value::Number(n)),
            TokenKind::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(ParseError::at(token.offset, "expected JSON value")),
            },
            _ => Err(ParseError::at(token.offset, "expected JSON value")),
        }
    }

    fn parse_value_list(&mut self) -> Result<Vec<Value>, ParseError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::LParen, ..
            }) => {}
            Some(other) => return Err(ParseError::at(other.offset, "expected '(' after IN")),
            None => return Err(ParseError::at(self.end_offset(), "expected '(' after IN")),
        }

        let mut values = vec![self.parse_value()?];
        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::Comma, ..
                }) => values.push(self.parse_value()?),
                Some(Token {
                    kind: TokenKind::RParen, ..
                }) => return Ok(values),
                Some(other) => return Err(ParseError::at(other.offset, "expected ',' or ')'")),
                None => return Err(ParseError::at(self.end_offset(), "unterminated IN list")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_simple_equality() {
        let expr = parse_filter(r#"status = "open""#).unwrap();
        assert_eq!(
            expr,
            FilterExpr::Cmp {
                column: "status".to_string(),
                op: CmpOp::Eq,
                value: json!("open"),
            }
        );
    }

    #[test]
    fn parses_all_comparison_operators() {
        for (text, op) in [
            ("=", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<", CmpOp::Lt),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            (">=", CmpOp::Ge),
            ("LIKE", CmpOp::Like),
            ("ilike", CmpOp::ILike),
        ] {
            let expr = parse_filter(&format!(r#"n {text} 5"#)).unwrap();
            match expr {
                FilterExpr::Cmp { op: parsed, .. } => assert_eq!(parsed, op, "operator {text}"),
                other => panic!("expected comparison, got {other:?}"),
            }
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_filter(r#"a = 1 OR b = 2 AND c = 3"#).unwrap();
        match expr {
            FilterExpr::Or(left, right) => {
                assert!(matches!(*left, FilterExpr::Cmp { .. }));
                assert!(matches!(*right, FilterExpr::And(_, _)));
            }
            other => panic!("expected OR at the top, got {other:?}"),
        }
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = parse_filter(r#"(a = 1 OR b = 2) AND c = 3"#).unwrap();
        match expr {
            FilterExpr::And(left, _) => assert!(matches!(*left, FilterExpr::Or(_, _))),
            other => panic!("expected AND at the top, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_lists() {
        let expr = parse_filter(r#"state IN ("queued", "running")"#).unwrap();
        assert_eq!(
            expr,
            FilterExpr::In {
                column: "state".to_string(),
                values: vec![json!("queued"), json!("running")],
            }
        );
    }

    #[test]
    fn parses_json_scalar_values() {
        assert!(matches!(
            parse_filter("deleted = null").unwrap(),
            FilterExpr::Cmp { value: Value::Null, .. }
        ));
        assert!(matches!(
            parse_filter("active = true").unwrap(),
            FilterExpr::Cmp {
                value: Value::Bool(true),
                ..
            }
        ));
        let expr = parse_filter("score >= -1.5e2").unwrap();
        match expr {
            FilterExpr::Cmp { value, .. } => assert_eq!(value.as_f64(), Some(-150.0)),
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn integer_literals_stay_integral() {
        let expr = parse_filter("n = 5").unwrap();
        match expr {
            FilterExpr::Cmp { value, .. } => {
                assert!(value.is_i64());
                assert_eq!(value.to_string(), "5");
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes_are_decoded() {
        let expr = parse_filter(r#"name = "a\"b\nc""#).unwrap();
        match expr {
            FilterExpr::Cmp { value, .. } => assert_eq!(value, json!("a\"b\nc")),
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn errors_report_offset_and_column() {
        let err = parse_filter("status ~ 1").unwrap_err();
        assert_eq!(err.offset, 7);

        let err = parse_filter("status =").unwrap_err();
        assert_eq!(err.column.as_deref(), Some("status"));
        assert_eq!(err.offset, 8);

        let err = parse_filter(r#"a = 1 banana"#).unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = parse_filter(r#"name = "oops"#).unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn empty_filter_is_an_error() {
        assert!(parse_filter("").is_err());
        assert!(parse_filter("   ").is_err());
    }

    #[test]
    fn collects_referenced_columns_in_order() {
        let expr = parse_filter(r#"a = 1 AND (b = 2 OR c IN (3))"#).unwrap();
        assert_eq!(expr.columns(), vec!["a", "b", "c"]);
    }
}
