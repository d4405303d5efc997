use crate::formula::eval::{ErrorKind, Value};
use crate::formula::parser::{self, ParseError, ParsedExpr};

/// Raw input of a cell: a literal or formula source.
#[derive(Debug, Clone, Default)]
pub enum CellInput {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Formula source with its parse result. A failed parse is kept so the
    /// source survives and the cell shows a formula-error marker.
    Formula {
        source: String,
        ast: Result<ParsedExpr, ParseError>,
    },
}

impl CellInput {
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellInput::Empty;
        }

        if trimmed.starts_with('=') {
            return CellInput::Formula {
                source: trimmed.to_string(),
                ast: parser::parse(trimmed),
            };
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return CellInput::Number(num);
            }
        }

        match trimmed.to_ascii_uppercase().as_str() {
            "TRUE" => CellInput::Boolean(true),
            "FALSE" => CellInput::Boolean(false),
            _ => CellInput::Text(trimmed.to_string()),
        }
    }

    /// The raw text a user would see in the edit bar.
    pub fn raw_display(&self) -> String {
        match self {
            CellInput::Empty => String::new(),
            CellInput::Number(n) => Value::Number(*n).to_text(),
            CellInput::Text(s) => s.clone(),
            CellInput::Boolean(b) => Value::Boolean(*b).to_text(),
            CellInput::Formula { source, .. } => source.clone(),
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellInput::Formula { .. })
    }

    /// Parsed AST, if this is a formula that parsed.
    pub fn formula_ast(&self) -> Option<&ParsedExpr> {
        match self {
            CellInput::Formula { ast: Ok(ast), .. } => Some(ast),
            _ => None,
        }
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            CellInput::Formula { ast: Err(e), .. } => Some(e),
            _ => None,
        }
    }

    /// Value of a non-formula input. Formulas need the evaluator.
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            CellInput::Empty => Some(Value::Empty),
            CellInput::Number(n) => Some(Value::Number(*n)),
            CellInput::Text(s) => Some(Value::Text(s.clone())),
            CellInput::Boolean(b) => Some(Value::Boolean(*b)),
            CellInput::Formula { ast: Err(_), .. } => Some(Value::Error(ErrorKind::Parse)),
            CellInput::Formula { ast: Ok(_), .. } => None,
        }
    }
}

/// A stored cell: raw input, computed value, write version and dirty flag.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub input: CellInput,
    pub value: Value,
    /// Workbook version of the last write to this cell (edit or recomputed value).
    pub version: u64,
    /// Pending recalculation. Only ever true inside a recalc batch.
    pub dirty: bool,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self) -> String {
        self.input.raw_display()
    }
}
