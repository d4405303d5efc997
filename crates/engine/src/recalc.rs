//! Incremental recalculation.
//!
//! Given the directly edited cells, recompute exactly their dependency
//! closure in topological order, reading only already-recomputed upstream
//! values, and report what changed.

use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_id::CellId;
use crate::dep_graph::DepGraph;
use crate::formula::eval::{evaluate, ErrorKind, Value};
use crate::formula::parser::BoundExpr;
use crate::sheet::{SheetLookup, Sheets};

/// Errors recorded per report are truncated to this many.
const MAX_REPORTED_ERRORS: usize = 100;

/// Report from one incremental recompute batch.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Time taken for the batch in microseconds.
    pub duration_us: u64,

    /// Number of cells that were recomputed (the whole closure).
    pub cells_recomputed: usize,

    /// Maximum dependency depth encountered within the batch.
    /// An edited root has depth 0; a formula reading it has depth 1.
    pub max_depth: usize,

    /// Evaluation order actually used.
    pub order: Vec<CellId>,

    /// Cells whose stored value differs after the batch, in evaluation order.
    pub changed: Vec<CellId>,

    /// True if a cycle was found in the closure. Members are marked #CYCLE!.
    pub had_cycles: bool,

    /// Cells that ended the batch holding an error value (truncated to first 100).
    pub errors: Vec<RecalcError>,
}

impl RecalcReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as a concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}us, depth={}, changed={}, errors={}, cycles={}",
            self.cells_recomputed,
            self.duration_us,
            self.max_depth,
            self.changed.len(),
            self.errors.len(),
            self.had_cycles,
        )
    }
}

/// A cell that evaluated to an error during recomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcError {
    /// The cell where the error occurred.
    pub cell: CellId,

    pub error: ErrorKind,
}

impl RecalcError {
    pub fn new(cell: CellId, error: ErrorKind) -> Self {
        Self { cell, error }
    }
}

/// Report when cycle detection finds a circular reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Cells participating in the cycle, starting at the cell being edited.
    pub cells: Vec<CellId>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: CellId) -> Self {
        Self {
            cells: vec![cell],
            message: format!("Cell {} references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<CellId>) -> Self {
        let cell_list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = match (cell_list.first(), cell_list.last()) {
            (Some(first), Some(last)) if cells.len() > 5 => format!(
                "Circular reference involving {} cells: {} → ... → {}",
                cells.len(),
                first,
                last
            ),
            _ => format!("Circular reference: {}", cell_list.join(" → ")),
        };
        Self { cells, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}

/// Recompute the closure of `roots`.
///
/// `formulas` holds the bound expression of every formula cell that parsed;
/// every other cell takes its literal value (parse failures read #ERROR!).
/// Each cell whose value changes is stamped with `version`.
pub fn recompute(
    graph: &DepGraph,
    formulas: &FxHashMap<CellId, BoundExpr>,
    sheets: &mut Sheets,
    roots: &[CellId],
    version: u64,
) -> RecalcReport {
    let started = Instant::now();
    let mut report = RecalcReport::new();

    let closure = graph.closure(roots);
    for cell in &closure {
        if let Some(c) = sheets.cell_mut(*cell) {
            c.dirty = true;
        }
    }

    let (order, stuck) = match graph.topo_order(&closure) {
        Ok(order) => (order, Vec::new()),
        Err(cycle) => {
            log::warn!("cycle inside recalc closure: {}", cycle);
            let stuck: FxHashSet<CellId> = cycle.cells.iter().copied().collect();
            let rest: Vec<CellId> = closure.iter().copied().filter(|c| !stuck.contains(c)).collect();
            // Everything downstream of a cycle is stuck too, so the rest orders cleanly
            let order = graph.topo_order(&rest).unwrap_or(rest);
            (order, cycle.cells)
        }
    };

    let members: FxHashSet<CellId> = closure.iter().copied().collect();
    let mut depth: FxHashMap<CellId, usize> = FxHashMap::default();

    for &cell in &order {
        let value = match formulas.get(&cell) {
            // A formula never displays as blank: a bare reference to an empty cell reads 0
            Some(expr) => match evaluate(expr, &SheetLookup::new(sheets, cell.sheet)) {
                Value::Empty => Value::Number(0.0),
                value => value,
            },
            None => sheets
                .cell(cell)
                .and_then(|c| c.input.literal_value())
                .unwrap_or(Value::Empty),
        };

        let d = graph
            .precedents_within(cell, &members)
            .iter()
            .filter_map(|p| depth.get(p))
            .max()
            .map_or(0, |d| d + 1);
        depth.insert(cell, d);
        report.max_depth = report.max_depth.max(d);

        store(sheets, cell, value, version, &mut report);
    }

    if !stuck.is_empty() {
        report.had_cycles = true;
        for &cell in &stuck {
            store(sheets, cell, Value::Error(ErrorKind::Cycle), version, &mut report);
        }
    }

    report.cells_recomputed = order.len() + stuck.len();
    report.order = order;
    report.order.extend(stuck);
    report.duration_us = started.elapsed().as_micros() as u64;

    log::debug!("recalc v{}: {}", version, report.summary());
    report
}

fn store(sheets: &mut Sheets, cell: CellId, value: Value, version: u64, report: &mut RecalcReport) {
    let Some(slot) = sheets.get_mut(cell.sheet).map(|s| s.entry(cell.row, cell.col)) else {
        return;
    };
    slot.dirty = false;

    if let Value::Error(kind) = &value {
        if report.errors.len() < MAX_REPORTED_ERRORS {
            report.errors.push(RecalcError::new(cell, *kind));
        }
    }

    if slot.value != value {
        slot.value = value;
        slot.version = version;
        report.changed.push(cell);
    }
}
