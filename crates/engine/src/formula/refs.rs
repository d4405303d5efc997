//! Reference extraction from formula AST.
//!
//! Extracts the cells and ranges a bound expression reads, for dependency
//! graph construction.

use rustc_hash::FxHashSet;

use crate::cell_id::{CellId, CellRange};
use crate::sheet::{SheetId, SheetRef};

use super::parser::{BoundExpr, Expr};

/// Everything a formula reads: single cells plus whole ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormulaRefs {
    /// Single-cell references, sorted by `(sheet, row, col)`.
    pub cells: Vec<CellId>,
    /// Multi-cell ranges, sorted, corners normalized.
    pub ranges: Vec<CellRange>,
}

impl FormulaRefs {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.ranges.is_empty()
    }

    /// True if the formula reads `cell`, directly or through a range.
    pub fn reads(&self, cell: CellId) -> bool {
        self.cells.binary_search(&cell).is_ok() || self.ranges.iter().any(|r| r.contains(cell))
    }
}

/// Extract all references from a bound expression.
///
/// Ranges are kept whole, whichever corner was written first; a range
/// covering a single cell is recorded as that cell.
///
/// References to sheets that do not exist (`SheetRef::RefError`) contribute
/// nothing; they evaluate to #REF! and are re-bound when the sheet appears.
pub fn extract_refs(expr: &BoundExpr, context_sheet: SheetId) -> FormulaRefs {
    let mut cells = FxHashSet::default();
    let mut ranges = FxHashSet::default();
    collect_refs(expr, context_sheet, &mut cells, &mut ranges);

    let mut refs = FormulaRefs {
        cells: cells.into_iter().collect(),
        ranges: ranges.into_iter().collect(),
    };
    refs.cells.sort_unstable();
    refs.ranges.sort_unstable();
    refs
}

fn collect_refs(
    expr: &BoundExpr,
    context_sheet: SheetId,
    cells: &mut FxHashSet<CellId>,
    ranges: &mut FxHashSet<CellRange>,
) {
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Empty => {}

        Expr::CellRef { sheet, row, col, .. } => {
            if let Some(sheet_id) = resolve_sheet_ref(sheet, context_sheet) {
                cells.insert(CellId::new(sheet_id, *row, *col));
            }
        }

        Expr::Range { sheet, start_row, start_col, end_row, end_col, .. } => {
            if let Some(sheet_id) = resolve_sheet_ref(sheet, context_sheet) {
                let range = CellRange::new(sheet_id, (*start_row, *start_col), (*end_row, *end_col));
                if range.area() == 1 {
                    cells.insert(CellId::new(sheet_id, range.top, range.left));
                } else {
                    ranges.insert(range);
                }
            }
        }

        Expr::Function { args, .. } => {
            for arg in args {
                collect_refs(arg, context_sheet, cells, ranges);
            }
        }

        Expr::BinaryOp { left, right, .. } => {
            collect_refs(left, context_sheet, cells, ranges);
            collect_refs(right, context_sheet, cells, ranges);
        }
    }
}

/// Resolve a SheetRef to a SheetId.
///
/// Returns None for RefError (missing sheet).
fn resolve_sheet_ref(sheet_ref: &SheetRef, context_sheet: SheetId) -> Option<SheetId> {
    match sheet_ref {
        SheetRef::Current => Some(context_sheet),
        SheetRef::Id(id) => Some(*id),
        SheetRef::RefError { .. } => None,
    }
}
