// Formula evaluator - evaluates bound expressions (after sheet name resolution)
//
// Evaluation reads only the *stored* values of referenced cells. The recalc
// scheduler guarantees those are current by evaluating in topological order.

use std::cmp::Ordering;
use std::fmt;

use crate::sheet::{SheetId, SheetRef};
use super::parser::{BoundExpr, Expr, Op};

/// Read access to stored cell values during evaluation.
pub trait CellLookup {
    /// Value of a cell on the sheet holding the formula.
    fn get_value(&self, row: usize, col: usize) -> Value;

    /// Get a cell's value from another sheet by SheetId.
    /// Default implementation returns #REF! (cross-sheet not supported).
    fn get_value_sheet(&self, _sheet_id: SheetId, _row: usize, _col: usize) -> Value {
        Value::Error(ErrorKind::Ref)
    }

    /// Non-blank values of a block in row-major order; `sheet` is None for
    /// the formula's own sheet. The default reads every cell, sparse stores
    /// visit only the populated ones.
    fn area_values(&self, sheet: Option<SheetId>, top: usize, left: usize, bottom: usize, right: usize) -> Vec<Value> {
        let mut out = Vec::new();
        for row in top..=bottom {
            for col in left..=right {
                let value = match sheet {
                    None => self.get_value(row, col),
                    Some(id) => self.get_value_sheet(id, row, col),
                };
                if !value.is_empty() {
                    out.push(value);
                }
            }
        }
        out
    }
}

// =============================================================================
// ErrorKind: spreadsheet error values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Division by zero
    Div0,
    /// Reference to a sheet that does not exist
    Ref,
    /// Wrong operand type, or a non-finite numeric result
    Value,
    Name,
    /// Lookup found no match
    NotAvailable,
    /// Formula source failed to parse
    Parse,
    /// Cell is part of a circular reference
    Cycle,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::NotAvailable => "#N/A",
            ErrorKind::Parse => "#ERROR!",
            ErrorKind::Cycle => "#CYCLE!",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "#DIV/0!" => ErrorKind::Div0,
            "#REF!" => ErrorKind::Ref,
            "#VALUE!" => ErrorKind::Value,
            "#NAME?" => ErrorKind::Name,
            "#N/A" => ErrorKind::NotAvailable,
            "#ERROR!" => ErrorKind::Parse,
            "#CYCLE!" => ErrorKind::Cycle,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Value: The scalar primitive for all cell values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorKind),
}

impl Value {
    /// Numeric coercion: empty is 0, booleans are 1/0, numeric text parses.
    pub fn to_number(&self) -> Result<f64, ErrorKind> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Empty => Ok(0.0),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or(ErrorKind::Value),
            Value::Error(e) => Err(*e),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            Value::Empty => String::new(),
            Value::Error(e) => e.code().to_string(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, ErrorKind> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) => {
                let upper = s.to_uppercase();
                if upper == "TRUE" { Ok(true) }
                else if upper == "FALSE" { Ok(false) }
                else { Err(ErrorKind::Value) }
            }
            Value::Empty => Ok(false),
            Value::Error(e) => Err(*e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn number(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Error(ErrorKind::Value)
    }
}

// =============================================================================
// Evaluation
// =============================================================================

pub fn evaluate<L: CellLookup>(expr: &BoundExpr, lookup: &L) -> Value {
    match expr {
        Expr::Empty => Value::Empty,
        Expr::Number(n) => Value::Number(*n),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Boolean(b) => Value::Boolean(*b),
        Expr::CellRef { sheet, col, row, .. } => read_cell(lookup, sheet, *row, *col),
        // Ranges only make sense as function arguments
        Expr::Range { .. } => Value::Error(ErrorKind::Value),
        Expr::Function { name, args } => evaluate_function(name, args, lookup),
        Expr::BinaryOp { op, left, right } => {
            let left = evaluate(left, lookup);
            let right = evaluate(right, lookup);

            if let Value::Error(e) = left {
                return Value::Error(e);
            }
            if let Value::Error(e) = right {
                return Value::Error(e);
            }

            match op {
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                    let (a, b) = match (left.to_number(), right.to_number()) {
                        (Ok(a), Ok(b)) => (a, b),
                        (Err(e), _) | (_, Err(e)) => return Value::Error(e),
                    };
                    match op {
                        Op::Add => number(a + b),
                        Op::Sub => number(a - b),
                        Op::Mul => number(a * b),
                        Op::Div if b == 0.0 => Value::Error(ErrorKind::Div0),
                        Op::Div => number(a / b),
                        _ => number(a.powf(b)),
                    }
                }
                Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
                    let ord = compare_values(&left, &right);
                    Value::Boolean(match op {
                        Op::Lt => ord == Ordering::Less,
                        Op::Gt => ord == Ordering::Greater,
                        Op::Eq => ord == Ordering::Equal,
                        Op::LtEq => ord != Ordering::Greater,
                        Op::GtEq => ord != Ordering::Less,
                        _ => ord != Ordering::Equal,
                    })
                }
                Op::Concat => Value::Text(format!("{}{}", left.to_text(), right.to_text())),
            }
        }
    }
}

fn read_cell<L: CellLookup>(lookup: &L, sheet: &SheetRef, row: usize, col: usize) -> Value {
    match sheet {
        SheetRef::Current => lookup.get_value(row, col),
        SheetRef::Id(id) => lookup.get_value_sheet(*id, row, col),
        SheetRef::RefError { .. } => Value::Error(ErrorKind::Ref),
    }
}

/// Compare two non-error scalars. Empty takes the zero value of the other
/// side's type; across types, numbers < text < booleans.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn type_rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) | Value::Empty => 0,
            Value::Text(_) => 1,
            Value::Boolean(_) => 2,
            Value::Error(_) => 3,
        }
    }

    match (a, b) {
        (Value::Empty, Value::Text(t)) => "".cmp(t.to_lowercase().as_str()),
        (Value::Text(t), Value::Empty) => t.to_lowercase().as_str().cmp(""),
        (Value::Empty, Value::Boolean(x)) => false.cmp(x),
        (Value::Boolean(x), Value::Empty) => x.cmp(&false),
        (Value::Text(x), Value::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        _ if type_rank(a) == 0 && type_rank(b) == 0 => {
            let x = a.to_number().unwrap_or(0.0);
            let y = b.to_number().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// A flattened function argument. References (cells and ranges) are
/// aggregated more leniently than values written directly in the call.
enum Arg {
    Reference(Value),
    Direct(Value),
}

impl Arg {
    fn value(&self) -> &Value {
        match self {
            Arg::Reference(v) | Arg::Direct(v) => v,
        }
    }
}

/// Corners of a rectangular area, normalized so start <= end.
#[derive(Debug, Clone, Copy)]
struct Area {
    top: usize,
    left: usize,
    bottom: usize,
    right: usize,
}

impl Area {
    fn new(start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Self {
        Self {
            top: start_row.min(end_row),
            left: start_col.min(end_col),
            bottom: start_row.max(end_row),
            right: start_col.max(end_col),
        }
    }

    fn height(&self) -> usize {
        self.bottom - self.top + 1
    }

    fn width(&self) -> usize {
        self.right - self.left + 1
    }
}

/// Resolve a range-like argument (a range or a single cell reference).
fn area_arg(expr: &BoundExpr) -> Option<(&SheetRef, Area)> {
    match expr {
        Expr::Range { sheet, start_col, start_row, end_col, end_row, .. } => {
            Some((sheet, Area::new(*start_row, *start_col, *end_row, *end_col)))
        }
        Expr::CellRef { sheet, col, row, .. } => Some((sheet, Area::new(*row, *col, *row, *col))),
        _ => None,
    }
}

fn flatten_args<L: CellLookup>(args: &[BoundExpr], lookup: &L) -> Vec<Arg> {
    let mut out = Vec::new();
    for arg in args {
        match area_arg(arg) {
            Some((sheet, area)) => {
                // Blank referenced cells never count, so only populated ones are read
                let sheet_id = match sheet {
                    SheetRef::Current => None,
                    SheetRef::Id(id) => Some(*id),
                    SheetRef::RefError { .. } => {
                        out.push(Arg::Reference(Value::Error(ErrorKind::Ref)));
                        continue;
                    }
                };
                let values = lookup.area_values(sheet_id, area.top, area.left, area.bottom, area.right);
                out.extend(values.into_iter().map(Arg::Reference));
            }
            None => out.push(Arg::Direct(evaluate(arg, lookup))),
        }
    }
    out
}

/// Numbers for SUM-style aggregates. Referenced text, booleans and blanks are
/// skipped; direct arguments are coerced. Any error short-circuits.
fn collect_numbers(args: &[Arg]) -> Result<Vec<f64>, ErrorKind> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Arg::Reference(Value::Number(n)) => values.push(*n),
            Arg::Reference(Value::Error(e)) => return Err(*e),
            Arg::Reference(_) => {}
            Arg::Direct(Value::Empty) => {}
            Arg::Direct(v) => values.push(v.to_number()?),
        }
    }
    Ok(values)
}

/// Booleans for AND/OR. Referenced text and blanks are skipped.
fn collect_bools(args: &[Arg]) -> Result<Vec<bool>, ErrorKind> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Arg::Reference(Value::Text(_) | Value::Empty) => {}
            other => values.push(other.value().to_bool()?),
        }
    }
    if values.is_empty() {
        return Err(ErrorKind::Value);
    }
    Ok(values)
}

macro_rules! try_value {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(kind) => return Value::Error(kind),
        }
    };
}

fn evaluate_function<L: CellLookup>(name: &str, args: &[BoundExpr], lookup: &L) -> Value {
    match name {
        // =====================
        // AGGREGATES
        // =====================
        "SUM" => {
            let nums = try_value!(collect_numbers(&flatten_args(args, lookup)));
            number(nums.iter().sum())
        }
        "AVERAGE" => {
            let nums = try_value!(collect_numbers(&flatten_args(args, lookup)));
            if nums.is_empty() {
                Value::Error(ErrorKind::Div0)
            } else {
                number(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "MIN" => {
            let nums = try_value!(collect_numbers(&flatten_args(args, lookup)));
            Value::Number(nums.iter().copied().reduce(f64::min).unwrap_or(0.0))
        }
        "MAX" => {
            let nums = try_value!(collect_numbers(&flatten_args(args, lookup)));
            Value::Number(nums.iter().copied().reduce(f64::max).unwrap_or(0.0))
        }
        "PRODUCT" => {
            let nums = try_value!(collect_numbers(&flatten_args(args, lookup)));
            if nums.is_empty() {
                Value::Number(0.0)
            } else {
                number(nums.iter().product())
            }
        }
        "COUNT" => {
            // Errors and non-numeric values are not counted, never propagated
            let count = flatten_args(args, lookup)
                .iter()
                .filter(|arg| match arg {
                    Arg::Reference(v) => matches!(v, Value::Number(_)),
                    Arg::Direct(v) => !v.is_empty() && v.to_number().is_ok(),
                })
                .count();
            Value::Number(count as f64)
        }
        "COUNTA" => {
            let count = flatten_args(args, lookup)
                .iter()
                .filter(|arg| !arg.value().is_empty())
                .count();
            Value::Number(count as f64)
        }

        // =====================
        // MATH
        // =====================
        "ABS" => {
            let n = try_value!(evaluate(&args[0], lookup).to_number());
            Value::Number(n.abs())
        }
        "ROUND" => {
            let n = try_value!(evaluate(&args[0], lookup).to_number());
            let digits = match args.get(1) {
                Some(arg) => try_value!(evaluate(arg, lookup).to_number()).trunc() as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            number((n * factor).round() / factor)
        }

        // =====================
        // LOGIC
        // =====================
        "IF" => {
            let cond = try_value!(evaluate(&args[0], lookup).to_bool());
            let branch = if cond { args.get(1) } else { args.get(2) };
            match branch {
                Some(Expr::Empty) => Value::Number(0.0),
                Some(expr) => evaluate(expr, lookup),
                None => Value::Boolean(false),
            }
        }
        "IFERROR" => match evaluate(&args[0], lookup) {
            Value::Error(_) => evaluate(&args[1], lookup),
            v => v,
        },
        "AND" => {
            let values = try_value!(collect_bools(&flatten_args(args, lookup)));
            Value::Boolean(values.iter().all(|b| *b))
        }
        "OR" => {
            let values = try_value!(collect_bools(&flatten_args(args, lookup)));
            Value::Boolean(values.iter().any(|b| *b))
        }
        "NOT" => {
            let b = try_value!(evaluate(&args[0], lookup).to_bool());
            Value::Boolean(!b)
        }

        // =====================
        // INFORMATION
        // =====================
        "ISERROR" => Value::Boolean(evaluate(&args[0], lookup).is_error()),
        "ISBLANK" => Value::Boolean(evaluate(&args[0], lookup).is_empty()),

        // =====================
        // TEXT
        // =====================
        "CONCAT" => {
            let mut out = String::new();
            for arg in flatten_args(args, lookup) {
                if let Value::Error(e) = arg.value() {
                    return Value::Error(*e);
                }
                out.push_str(&arg.value().to_text());
            }
            Value::Text(out)
        }

        // =====================
        // LOOKUP
        // =====================
        "VLOOKUP" => lookup_in_table(args, lookup, Orientation::Vertical),
        "HLOOKUP" => lookup_in_table(args, lookup, Orientation::Horizontal),

        // The parser only admits known functions
        _ => Value::Error(ErrorKind::Name),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    /// Search the first column, return from a column (VLOOKUP)
    Vertical,
    /// Search the first row, return from a row (HLOOKUP)
    Horizontal,
}

/// VLOOKUP/HLOOKUP(search_key, range, index, [is_sorted=TRUE])
fn lookup_in_table<L: CellLookup>(args: &[BoundExpr], lookup: &L, orientation: Orientation) -> Value {
    let key = evaluate(&args[0], lookup);
    if let Value::Error(e) = key {
        return Value::Error(e);
    }

    let Some((sheet, area)) = area_arg(&args[1]) else {
        return Value::Error(ErrorKind::Value);
    };
    if let SheetRef::RefError { .. } = sheet {
        return Value::Error(ErrorKind::Ref);
    }

    let index = try_value!(evaluate(&args[2], lookup).to_number()).trunc();
    if index < 1.0 {
        return Value::Error(ErrorKind::Value);
    }
    let index = index as usize;

    let is_sorted = match args.get(3) {
        Some(arg) => try_value!(evaluate(arg, lookup).to_bool()),
        None => true,
    };

    let (span, len) = match orientation {
        Orientation::Vertical => (area.width(), area.height()),
        Orientation::Horizontal => (area.height(), area.width()),
    };
    if index > span {
        return Value::Error(ErrorKind::Ref);
    }

    // (row, col) of the i-th candidate key and of the cell returned for it
    let key_at = |i: usize| match orientation {
        Orientation::Vertical => (area.top + i, area.left),
        Orientation::Horizontal => (area.top, area.left + i),
    };
    let result_at = |i: usize| match orientation {
        Orientation::Vertical => (area.top + i, area.left + index - 1),
        Orientation::Horizontal => (area.top + index - 1, area.left + i),
    };

    let mut found: Option<usize> = None;
    for i in 0..len {
        let (r, c) = key_at(i);
        let candidate = read_cell(lookup, sheet, r, c);
        if candidate.is_error() || candidate.is_empty() {
            continue;
        }
        let same_type = std::mem::discriminant(&candidate) == std::mem::discriminant(&key);
        if !same_type {
            continue;
        }
        match compare_values(&candidate, &key) {
            Ordering::Equal => {
                found = Some(i);
                if !is_sorted {
                    break;
                }
            }
            // Approximate match: last key <= search key
            Ordering::Less if is_sorted => found = Some(i),
            Ordering::Greater if is_sorted => break,
            _ => {}
        }
    }

    match found {
        Some(i) => {
            let (r, c) = result_at(i);
            read_cell(lookup, sheet, r, c)
        }
        None => Value::Error(ErrorKind::NotAvailable),
    }
}
