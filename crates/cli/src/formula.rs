//! Formula inspection for `cogrid parse`.

use cogrid_engine::formula::parser::{bind_expr, format_expr, parse, Expr, ParseError, ParsedExpr};

/// Canonical text and references of one formula.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaInfo {
    pub canonical: String,
    /// References as written (ranges unexpanded), first occurrence order.
    pub references: Vec<String>,
    pub functions: Vec<String>,
}

pub fn describe(formula: &str) -> Result<FormulaInfo, ParseError> {
    let ast = parse(formula)?;
    let mut info = FormulaInfo {
        canonical: canonical(&ast),
        references: Vec::new(),
        functions: Vec::new(),
    };
    collect(&ast, &mut info);
    Ok(info)
}

fn canonical(expr: &ParsedExpr) -> String {
    // Unresolved sheet names print as written
    format_expr(&bind_expr(expr, |_| None), |_| None)
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn collect(expr: &ParsedExpr, info: &mut FormulaInfo) {
    match expr {
        Expr::CellRef { .. } | Expr::Range { .. } => {
            let text = canonical(expr);
            push_unique(&mut info.references, text.trim_start_matches('=').to_string());
        }
        Expr::Function { name, args } => {
            push_unique(&mut info.functions, name.clone());
            for arg in args {
                collect(arg, info);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect(left, info);
            collect(right, info);
        }
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Empty => {}
    }
}
