// Formula parser - converts formula strings into AST
// Supports: numbers, strings, booleans, cell refs (A1, $A$1, Sheet2!A1), ranges (A1:B5),
// functions (SUM), arithmetic (+ - * / ^ %), comparison (< > = <= >= <>), concatenation (&)

use thiserror::Error;

use crate::cell_id::{col_to_letters, quote_sheet_name};
use crate::sheet::{SheetId, SheetRef, UnboundSheetRef};

use super::functions::lookup_function;

/// Generic expression AST, parameterized over sheet reference type.
/// - Parser outputs `ParsedExpr = Expr<UnboundSheetRef>` (sheet names unresolved)
/// - After binding, becomes `BoundExpr = Expr<SheetRef>` (sheet IDs resolved)
///
/// Ranges keep their corners as written; expansion to concrete cells happens
/// at evaluation and dependency-extraction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<S> {
    Number(f64),
    Text(String),
    Boolean(bool),
    CellRef {
        sheet: S,
        col: usize,
        row: usize,
        col_abs: bool,
        row_abs: bool,
    },
    Range {
        sheet: S,
        start_col: usize,
        start_row: usize,
        end_col: usize,
        end_row: usize,
        start_col_abs: bool,
        start_row_abs: bool,
        end_col_abs: bool,
        end_row_abs: bool,
    },
    Function {
        name: String,
        args: Vec<Expr<S>>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr<S>>,
        right: Box<Expr<S>>,
    },
    /// Empty/omitted argument (e.g. the trailing slot in `=IF(a,b,)`)
    Empty,
}

/// Parser output: sheet references are unresolved names
pub type ParsedExpr = Expr<UnboundSheetRef>;

/// Bound expression: sheet references resolved to stable IDs
pub type BoundExpr = Expr<SheetRef>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    // Comparison
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    // String
    Concat,
}

impl Op {
    fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Pow => "^",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::NotEq => "<>",
            Op::Concat => "&",
        }
    }
}

/// Why a formula failed to parse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("formula must start with =")]
    MissingMarker,
    #[error("empty formula")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated sheet name")]
    UnterminatedSheetName,
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("invalid cell reference: {0}")]
    InvalidReference(String),
    #[error("unbalanced range reference")]
    UnbalancedRange,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("wrong number of arguments to {name}: {got}")]
    ArgumentCount { name: String, got: usize },
    #[error("unknown name: {0}")]
    UnknownName(String),
    #[error("unexpected token at position {0}")]
    UnexpectedToken(usize),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("missing closing parenthesis")]
    MissingParen,
}

/// Parse a formula string into an unbound AST (sheet names not yet resolved to IDs).
/// Call `bind_expr()` with workbook context to resolve sheet references before evaluation.
pub fn parse(formula: &str) -> Result<ParsedExpr, ParseError> {
    let formula = formula.trim();
    let input = formula.strip_prefix('=').ok_or(ParseError::MissingMarker)?;

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let (expr, pos) = parse_comparison(&tokens, 0)?;
    if pos < tokens.len() {
        return Err(match tokens[pos] {
            Token::Colon => ParseError::UnbalancedRange,
            _ => ParseError::UnexpectedToken(pos),
        });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef {
        col: usize,
        row: usize,
        col_abs: bool,
        row_abs: bool,
    },
    /// Sheet name prefix (e.g., "Sheet1" from "Sheet1!A1")
    SheetPrefix(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ':' => { tokens.push(Token::Colon); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                // "" inside a string is an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(ParseError::UnterminatedString),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '\'' => {
                // Quoted sheet name: 'My Sheet'!A1, 'Bob''s Sheet'!A1
                chars.next();
                let mut sheet_name = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            sheet_name.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => sheet_name.push(ch),
                        None => return Err(ParseError::UnterminatedSheetName),
                    }
                }
                if chars.next() != Some('!') {
                    return Err(ParseError::InvalidReference(format!("'{}'", sheet_name)));
                }
                tokens.push(Token::SheetPrefix(sheet_name));
            }
            'A'..='Z' | 'a'..='z' | '_' => {
                // Cell reference (A1), function name (SUM), or sheet prefix (Sheet1!)
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if chars.peek() == Some(&'!') {
                    chars.next();
                    tokens.push(Token::SheetPrefix(ident));
                    continue;
                }

                if let Some(token) = try_parse_cell_ref(&ident) {
                    tokens.push(token);
                } else if ident.contains('$') {
                    return Err(ParseError::InvalidReference(ident));
                } else {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                }
            }
            '$' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match try_parse_cell_ref(&ident) {
                    Some(token) => tokens.push(token),
                    None => return Err(ParseError::InvalidReference(ident)),
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Scientific notation: 1e5, 2.5E-3
                if matches!(chars.peek(), Some('e') | Some('E')) {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let signed = matches!(lookahead.peek(), Some('+') | Some('-'));
                    if signed {
                        lookahead.next();
                    }
                    if lookahead.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                        num_str.push('e');
                        chars.next();
                        if signed {
                            if let Some(sign) = chars.next() {
                                num_str.push(sign);
                            }
                        }
                        while let Some(&d) = chars.peek() {
                            if d.is_ascii_digit() {
                                num_str.push(d);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(num_str.clone()))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(ParseError::UnexpectedChar(c)),
        }
    }

    Ok(tokens)
}

fn try_parse_cell_ref(s: &str) -> Option<Token> {
    let s = s.to_uppercase();
    let mut chars = s.chars().peekable();

    let col_abs = if chars.peek() == Some(&'$') {
        chars.next();
        true
    } else {
        false
    };

    let mut col_str = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_uppercase() {
            col_str.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if col_str.is_empty() || col_str.len() > crate::cell_id::MAX_COL_LETTERS {
        return None;
    }

    let row_abs = if chars.peek() == Some(&'$') {
        chars.next();
        true
    } else {
        false
    };

    let row_str: String = chars.collect();
    if row_str.is_empty() || !row_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = row_str.parse().ok()?;
    if row == 0 {
        return None;
    }

    let col = crate::cell_id::letters_to_col(&col_str)?;
    Some(Token::CellRef { col, row: row - 1, col_abs, row_abs })
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_concat(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() && tokens[pos] == Token::Ampersand {
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = binary(Op::Concat, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative, higher precedence than * /
fn parse_power(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if pos < tokens.len() && tokens[pos] == Token::Caret {
        let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

// Percent postfix (%) desugars to * 0.01
fn parse_percent(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let (mut expr, mut pos) = parse_primary(tokens, pos)?;

    while pos < tokens.len() && tokens[pos] == Token::Percent {
        expr = binary(Op::Mul, expr, Expr::Number(0.01));
        pos += 1;
    }

    Ok((expr, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(ParsedExpr, usize), ParseError> {
    let Some(token) = tokens.get(pos) else {
        return Err(ParseError::UnexpectedEnd);
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::SheetPrefix(sheet_name) => match tokens.get(pos + 1) {
            Some(Token::CellRef { .. }) => {
                parse_reference(tokens, pos + 1, UnboundSheetRef::Named(sheet_name.clone()))
            }
            _ => Err(ParseError::InvalidReference(format!("{}!", sheet_name))),
        },
        Token::CellRef { .. } => parse_reference(tokens, pos, UnboundSheetRef::Current),
        Token::Ident(name) => {
            if name == "TRUE" {
                return Ok((Expr::Boolean(true), pos + 1));
            }
            if name == "FALSE" {
                return Ok((Expr::Boolean(false), pos + 1));
            }
            if tokens.get(pos + 1) == Some(&Token::LParen) {
                let spec = lookup_function(name)
                    .ok_or_else(|| ParseError::UnknownFunction(name.clone()))?;
                let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                if !spec.accepts(args.len()) {
                    return Err(ParseError::ArgumentCount { name: name.clone(), got: args.len() });
                }
                return Ok((Expr::Function { name: name.clone(), args }, new_pos));
            }
            Err(ParseError::UnknownName(name.clone()))
        }
        Token::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                Some(_) => Err(ParseError::UnexpectedToken(pos)),
                None => Err(ParseError::MissingParen),
            }
        }
        Token::Plus => parse_percent(tokens, pos + 1),
        Token::Minus => {
            // Unary minus binds tighter than ^ (-2^2 = 4)
            let (expr, pos) = parse_percent(tokens, pos + 1)?;
            Ok((binary(Op::Sub, Expr::Number(0.0), expr), pos))
        }
        Token::Colon => Err(ParseError::UnbalancedRange),
        _ => Err(ParseError::UnexpectedToken(pos)),
    }
}

/// Parse a cell reference at `pos`, extending it to a range if followed by `:`.
fn parse_reference(
    tokens: &[Token],
    pos: usize,
    sheet: UnboundSheetRef,
) -> Result<(ParsedExpr, usize), ParseError> {
    let Some(Token::CellRef { col, row, col_abs, row_abs }) = tokens.get(pos) else {
        return Err(ParseError::UnexpectedToken(pos));
    };

    if tokens.get(pos + 1) != Some(&Token::Colon) {
        return Ok((
            Expr::CellRef { sheet, col: *col, row: *row, col_abs: *col_abs, row_abs: *row_abs },
            pos + 1,
        ));
    }

    match tokens.get(pos + 2) {
        Some(Token::CellRef { col: end_col, row: end_row, col_abs: end_col_abs, row_abs: end_row_abs }) => Ok((
            Expr::Range {
                sheet,
                start_col: *col,
                start_row: *row,
                end_col: *end_col,
                end_row: *end_row,
                start_col_abs: *col_abs,
                start_row_abs: *row_abs,
                end_col_abs: *end_col_abs,
                end_row_abs: *end_row_abs,
            },
            pos + 3,
        )),
        _ => Err(ParseError::UnbalancedRange),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<ParsedExpr>, usize), ParseError> {
    let mut args = Vec::new();
    let mut pos = pos;

    if tokens.get(pos) == Some(&Token::RParen) {
        return Ok((args, pos + 1));
    }

    loop {
        // Empty argument: next token is , or ) immediately
        match tokens.get(pos) {
            Some(Token::RParen) => {
                args.push(Expr::Empty);
                return Ok((args, pos + 1));
            }
            Some(Token::Comma) => {
                args.push(Expr::Empty);
                pos += 1;
                continue;
            }
            None => return Err(ParseError::MissingParen),
            _ => {}
        }

        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(Token::Colon) => return Err(ParseError::UnbalancedRange),
            Some(_) => return Err(ParseError::UnexpectedToken(pos)),
            None => return Err(ParseError::MissingParen),
        }
    }
}

fn binary(op: Op, left: ParsedExpr, right: ParsedExpr) -> ParsedExpr {
    Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
}

// =============================================================================
// Expression Binding - Convert ParsedExpr to BoundExpr
// =============================================================================

/// Bind a parsed expression by resolving sheet names to SheetIds.
///
/// The resolver takes a sheet name and returns `Some(SheetId)` if the sheet
/// exists; unknown sheets become `SheetRef::RefError` and evaluate to #REF!.
pub fn bind_expr<F>(expr: &ParsedExpr, resolver: F) -> BoundExpr
where
    F: Fn(&str) -> Option<SheetId> + Copy,
{
    match expr {
        Expr::Empty => Expr::Empty,
        Expr::Number(n) => Expr::Number(*n),
        Expr::Text(s) => Expr::Text(s.clone()),
        Expr::Boolean(b) => Expr::Boolean(*b),
        Expr::CellRef { sheet, col, row, col_abs, row_abs } => Expr::CellRef {
            sheet: bind_sheet_ref(sheet, resolver),
            col: *col,
            row: *row,
            col_abs: *col_abs,
            row_abs: *row_abs,
        },
        Expr::Range { sheet, start_col, start_row, end_col, end_row, start_col_abs, start_row_abs, end_col_abs, end_row_abs } => Expr::Range {
            sheet: bind_sheet_ref(sheet, resolver),
            start_col: *start_col,
            start_row: *start_row,
            end_col: *end_col,
            end_row: *end_row,
            start_col_abs: *start_col_abs,
            start_row_abs: *start_row_abs,
            end_col_abs: *end_col_abs,
            end_row_abs: *end_row_abs,
        },
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: args.iter().map(|arg| bind_expr(arg, resolver)).collect(),
        },
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(bind_expr(left, resolver)),
            right: Box::new(bind_expr(right, resolver)),
        },
    }
}

fn bind_sheet_ref<F>(sheet: &UnboundSheetRef, resolver: F) -> SheetRef
where
    F: Fn(&str) -> Option<SheetId>,
{
    match sheet {
        UnboundSheetRef::Current => SheetRef::Current,
        UnboundSheetRef::Named(name) => match resolver(name) {
            Some(id) => SheetRef::Id(id),
            None => SheetRef::RefError { last_known_name: name.clone() },
        },
    }
}

/// True if the expression names `sheet_name` in any sheet-qualified reference.
pub fn references_sheet_name(expr: &ParsedExpr, sheet_name: &str) -> bool {
    let matches = |sheet: &UnboundSheetRef| match sheet {
        UnboundSheetRef::Named(name) => name.eq_ignore_ascii_case(sheet_name),
        UnboundSheetRef::Current => false,
    };
    match expr {
        Expr::CellRef { sheet, .. } | Expr::Range { sheet, .. } => matches(sheet),
        Expr::Function { args, .. } => args.iter().any(|a| references_sheet_name(a, sheet_name)),
        Expr::BinaryOp { left, right, .. } => {
            references_sheet_name(left, sheet_name) || references_sheet_name(right, sheet_name)
        }
        _ => false,
    }
}

// =============================================================================
// Formula Printing - Convert BoundExpr back to string
// =============================================================================

/// Format a bound expression as canonical formula text (with leading '=').
///
/// `name_resolver` maps a SheetId to its current name.
pub fn format_expr<F>(expr: &BoundExpr, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String> + Copy,
{
    format!("={}", format_expr_inner(expr, name_resolver))
}

fn format_expr_inner<F>(expr: &BoundExpr, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String> + Copy,
{
    match expr {
        Expr::Empty => String::new(),
        Expr::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Expr::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        Expr::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Expr::CellRef { sheet, col, row, col_abs, row_abs } => {
            format!("{}{}", format_sheet_prefix(sheet, name_resolver), format_cell_addr(*col, *row, *col_abs, *row_abs))
        }
        Expr::Range { sheet, start_col, start_row, end_col, end_row, start_col_abs, start_row_abs, end_col_abs, end_row_abs } => {
            format!(
                "{}{}:{}",
                format_sheet_prefix(sheet, name_resolver),
                format_cell_addr(*start_col, *start_row, *start_col_abs, *start_row_abs),
                format_cell_addr(*end_col, *end_row, *end_col_abs, *end_row_abs),
            )
        }
        Expr::Function { name, args } => {
            let args_str: Vec<String> = args.iter()
                .map(|arg| format_expr_inner(arg, name_resolver))
                .collect();
            format!("{}({})", name, args_str.join(","))
        }
        Expr::BinaryOp { op: Op::Sub, left, right } if **left == Expr::Number(0.0) => {
            format!("-{}", format_operand(right, name_resolver))
        }
        Expr::BinaryOp { op, left, right } => {
            format!(
                "{}{}{}",
                format_operand(left, name_resolver),
                op.symbol(),
                format_operand(right, name_resolver),
            )
        }
    }
}

fn format_operand<F>(expr: &BoundExpr, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String> + Copy,
{
    match expr {
        Expr::BinaryOp { .. } => format!("({})", format_expr_inner(expr, name_resolver)),
        _ => format_expr_inner(expr, name_resolver),
    }
}

fn format_sheet_prefix<F>(sheet: &SheetRef, name_resolver: F) -> String
where
    F: Fn(SheetId) -> Option<String>,
{
    match sheet {
        SheetRef::Current => String::new(),
        SheetRef::Id(id) => match name_resolver(*id) {
            Some(name) => format!("{}!", quote_sheet_name(&name)),
            None => "#REF!".to_string(),
        },
        SheetRef::RefError { last_known_name } => format!("{}!", quote_sheet_name(last_known_name)),
    }
}

fn format_cell_addr(col: usize, row: usize, col_abs: bool, row_abs: bool) -> String {
    format!(
        "{}{}{}{}",
        if col_abs { "$" } else { "" },
        col_to_letters(col),
        if row_abs { "$" } else { "" },
        row + 1
    )
}
