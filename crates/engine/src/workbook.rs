//! The workbook store.
//!
//! A `Workbook` owns its sheets, the bound formulas, the dependency graph and
//! the operation log, and applies operations one at a time. Every accepted
//! operation consumes exactly one version; a rejected one changes nothing.

use std::fmt;

use chrono::Utc;
use rustc_hash::FxHashMap;

use crate::cell::CellInput;
use crate::cell_id::{parse_a1, quote_sheet_name, CellId};
use crate::conflict::{detect_conflict, ConflictPolicy, LastWriterWins, Resolution};
use crate::dep_graph::DepGraph;
use crate::error::OperationError;
use crate::events::{CellChange, Notice, ValueChangeSet};
use crate::formula::eval::Value;
use crate::formula::parser::{bind_expr, references_sheet_name, BoundExpr, Expr, ParsedExpr};
use crate::formula::refs::{extract_refs, FormulaRefs};
use crate::oplog::{EntryKind, LogEntry, LogError, Operation, OperationLog, SessionId, DEFAULT_RETENTION};
use crate::recalc::{recompute, RecalcReport};
use crate::sheet::{is_valid_sheet_name, SheetId, SheetRef, Sheets, Worksheet};

pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Grid bounds. Addresses outside are rejected; formula references outside
/// evaluate to #REF!.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkbookLimits {
    pub max_rows: usize,
    pub max_cols: usize,
}

impl Default for WorkbookLimits {
    fn default() -> Self {
        Self {
            max_rows: 1_048_576,
            max_cols: 16_384,
        }
    }
}

impl WorkbookLimits {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.max_rows && col < self.max_cols
    }
}

/// Construction parameters for a workbook.
#[derive(Debug)]
pub struct WorkbookOptions {
    pub default_sheet: String,
    pub retention: usize,
    pub limits: WorkbookLimits,
    pub policy: Box<dyn ConflictPolicy>,
}

impl Default for WorkbookOptions {
    fn default() -> Self {
        Self {
            default_sheet: DEFAULT_SHEET_NAME.to_string(),
            retention: DEFAULT_RETENTION,
            limits: WorkbookLimits::default(),
            policy: Box::new(LastWriterWins),
        }
    }
}

/// Read-only view of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub cell: CellId,
    /// Sheet-qualified A1 address.
    pub address: String,
    pub raw: String,
    pub value: Value,
    /// Version of the last write to this cell (0 = never written).
    pub version: u64,
    pub is_formula: bool,
}

/// Immutable copy of the workbook at one version.
///
/// Sheets are shared with the live workbook until it next writes them.
#[derive(Debug, Clone)]
pub struct WorkbookSnapshot {
    version: u64,
    sheets: Sheets,
    limits: WorkbookLimits,
}

impl WorkbookSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn get_cell(&self, address: &str) -> Result<CellView, OperationError> {
        let cell = resolve_address(&self.sheets, &self.limits, address)?;
        Ok(cell_view(&self.sheets, cell))
    }

    /// Non-blank cells of one sheet in row-major order.
    pub fn worksheet(&self, name: &str) -> Result<Vec<CellView>, OperationError> {
        let sheet = self
            .sheets
            .by_name(name)
            .ok_or_else(|| OperationError::UnknownSheet(name.to_string()))?;
        Ok(sheet_cells(&self.sheets, sheet))
    }

    /// Non-blank cells of every sheet, sheet by sheet.
    pub fn cells(&self) -> Vec<CellView> {
        self.sheets
            .iter()
            .flat_map(|sheet| sheet_cells(&self.sheets, sheet))
            .collect()
    }
}

/// How to bring a session from an older version up to date.
#[derive(Debug, Clone)]
pub enum Resync {
    /// Latest value of every cell changed in `(from, to]`.
    Delta { from: u64, to: u64, changes: Vec<CellChange> },
    /// The log no longer covers the gap.
    Full(WorkbookSnapshot),
}

pub struct Workbook {
    sheets: Sheets,
    /// Next ID to assign to a new sheet. Monotonically increasing, never reused.
    next_sheet_id: u64,
    graph: DepGraph,
    /// Bound expression of every formula cell that parsed.
    formulas: FxHashMap<CellId, BoundExpr>,
    log: OperationLog,
    version: u64,
    limits: WorkbookLimits,
    policy: Box<dyn ConflictPolicy>,
    last_recalc: RecalcReport,
}

impl fmt::Debug for Workbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workbook")
            .field("version", &self.version)
            .field("sheets", &self.sheet_names())
            .field("formulas", &self.formulas.len())
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    /// Create a workbook with one default sheet.
    pub fn new() -> Self {
        Self::with_options(WorkbookOptions::default())
    }

    pub fn with_options(options: WorkbookOptions) -> Self {
        let name = if is_valid_sheet_name(&options.default_sheet) {
            options.default_sheet.trim().to_string()
        } else {
            log::warn!("invalid default sheet name {:?}, using {}", options.default_sheet, DEFAULT_SHEET_NAME);
            DEFAULT_SHEET_NAME.to_string()
        };

        let mut sheets = Sheets::new();
        sheets.push(Worksheet::new(SheetId(1), name));

        Self {
            sheets,
            next_sheet_id: 2,
            graph: DepGraph::new(),
            formulas: FxHashMap::default(),
            log: OperationLog::new(options.retention),
            version: 0,
            limits: options.limits,
            policy: options.policy,
            last_recalc: RecalcReport::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn limits(&self) -> WorkbookLimits {
        self.limits
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn sheet_id_by_name(&self, name: &str) -> Option<SheetId> {
        self.sheets.by_name(name).map(|s| s.id())
    }

    pub fn dep_graph(&self) -> &DepGraph {
        &self.graph
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Report from the most recent recalculation batch.
    pub fn last_recalc(&self) -> &RecalcReport {
        &self.last_recalc
    }

    pub fn get_cell(&self, address: &str) -> Result<CellView, OperationError> {
        let cell = resolve_address(&self.sheets, &self.limits, address)?;
        Ok(cell_view(&self.sheets, cell))
    }

    pub fn worksheet(&self, name: &str) -> Result<Vec<CellView>, OperationError> {
        let sheet = self
            .sheets
            .by_name(name)
            .ok_or_else(|| OperationError::UnknownSheet(name.to_string()))?;
        Ok(sheet_cells(&self.sheets, sheet))
    }

    pub fn snapshot(&self) -> WorkbookSnapshot {
        WorkbookSnapshot {
            version: self.version,
            sheets: self.sheets.clone(),
            limits: self.limits,
        }
    }

    /// Changes after `since`, compacted to the latest value per cell.
    pub fn changes_since(&self, since: u64) -> Result<Vec<CellChange>, LogError> {
        self.log.compact_changes_since(since)
    }

    /// Delta from the log if it still covers `since`, otherwise a snapshot.
    pub fn resync(&self, since: u64) -> Resync {
        match self.log.compact_changes_since(since) {
            Ok(changes) => Resync::Delta {
                from: since,
                to: self.version,
                changes,
            },
            Err(err) => {
                log::info!("full snapshot resync at version {}: {}", self.version, err);
                Resync::Full(self.snapshot())
            }
        }
    }

    /// Apply one edit.
    ///
    /// On error nothing changes, except for `OperationError::Fatal`, after
    /// which the workbook must not be written again.
    pub fn apply_operation(&mut self, op: Operation) -> Result<ValueChangeSet, OperationError> {
        if op.base_version > self.version {
            return Err(OperationError::FutureBase {
                base: op.base_version,
                current: self.version,
            });
        }

        let cell = resolve_address(&self.sheets, &self.limits, &op.address)?;
        let address = qualified_address(&self.sheets, cell);
        let version = self.version + 1;
        let mut notices = Vec::new();

        if let Some(conflict) = detect_conflict(&self.log, cell, &op, self.version) {
            match self.policy.resolve(&conflict, &op, self.version) {
                Resolution::Apply => notices.push(Notice::ConflictOverride {
                    session: conflict.superseded_session,
                    address: address.clone(),
                    superseded_version: conflict.superseded_version,
                    winning_session: op.session,
                    winning_version: version,
                }),
                Resolution::Reject(err) => {
                    log::warn!("rejected edit to {} from session {}: {}", address, op.session, err);
                    return Err(err);
                }
            }
        }

        let input = CellInput::from_input(&op.raw);
        let bound = input
            .formula_ast()
            .map(|ast| bind_in_grid(ast, &self.sheets, &self.limits, cell.sheet));

        match &bound {
            Some(expr) => {
                let refs = extract_refs(expr, cell.sheet);
                if let Err(err) = self.graph.set_references(cell, &refs) {
                    log::warn!("rejected edit to {} from session {}: {}", address, op.session, err);
                    return Err(err.into());
                }
            }
            None => self.graph.clear_cell(cell),
        }

        if let Some(err) = input.parse_error() {
            notices.push(Notice::FormulaError {
                session: op.session,
                address: address.clone(),
                message: err.to_string(),
            });
        }

        let raw = input.raw_display();
        let raw_changed = self.sheets.cell(cell).map(|c| c.raw()).unwrap_or_default() != raw;
        match bound {
            Some(expr) => {
                self.formulas.insert(cell, expr);
            }
            None => {
                self.formulas.remove(&cell);
            }
        }
        if let Some(sheet) = self.sheets.get_mut(cell.sheet) {
            let slot = sheet.entry(cell.row, cell.col);
            slot.input = input;
            slot.version = version;
        }

        let report = recompute(&self.graph, &self.formulas, &mut self.sheets, &[cell], version);
        let mut changes = self.collect_changes(&report);
        match changes.iter_mut().find(|c| c.cell == cell) {
            Some(change) => change.raw = Some(raw),
            None if raw_changed => changes.insert(
                0,
                CellChange {
                    cell,
                    address,
                    raw: Some(raw),
                    value: self.sheets.value(cell),
                },
            ),
            None => {}
        }
        self.last_recalc = report;

        let origin = op.session;
        self.commit(version, EntryKind::Edit { op, cell }, changes, notices, Some(origin))
    }

    /// Create a worksheet.
    ///
    /// Formulas that already named it (and read #REF!) are re-bound and
    /// recomputed; their new values are the change set.
    pub fn add_sheet(&mut self, name: &str) -> Result<ValueChangeSet, OperationError> {
        let name = name.trim();
        if !is_valid_sheet_name(name) {
            return Err(OperationError::InvalidSheetName(name.to_string()));
        }
        if self.sheets.by_name(name).is_some() {
            return Err(OperationError::DuplicateSheet(name.to_string()));
        }

        // Staged on a copy of the sheet table until the graph has room
        let id = SheetId(self.next_sheet_id);
        let mut sheets = self.sheets.clone();
        sheets.push(Worksheet::new(id, name));

        let rebound: Vec<(CellId, BoundExpr, FormulaRefs)> = sheets
            .iter()
            .flat_map(|sheet| {
                sheet.cells_iter().filter_map(move |(&(row, col), c)| {
                    let ast = c.input.formula_ast()?;
                    references_sheet_name(ast, name).then(|| (CellId::new(sheet.id(), row, col), ast))
                })
            })
            .map(|(cell, ast)| {
                let expr = bind_in_grid(ast, &sheets, &self.limits, cell.sheet);
                let refs = extract_refs(&expr, cell.sheet);
                (cell, expr, refs)
            })
            .collect();

        // Upper bound: every rebound formula and each of its cells is new
        let new_nodes: usize = rebound.iter().map(|(_, _, refs)| refs.cells.len() + 1).sum();
        if !self.graph.has_room_for(new_nodes) {
            let err = OperationError::GraphFull { limit: self.graph.node_limit() };
            log::warn!("rejected sheet {:?}: {}", name, err);
            return Err(err);
        }

        self.sheets = sheets;
        self.next_sheet_id += 1;
        log::info!("added sheet {:?} (id {})", name, id.raw());

        // The new sheet is empty, so edges into it cannot close a cycle
        let mut roots = Vec::with_capacity(rebound.len());
        for (cell, expr, refs) in rebound {
            self.graph
                .replace_references(cell, refs.cells.into_iter().collect(), refs.ranges)?;
            self.formulas.insert(cell, expr);
            roots.push(cell);
        }

        let version = self.version + 1;
        let report = recompute(&self.graph, &self.formulas, &mut self.sheets, &roots, version);
        let changes = self.collect_changes(&report);
        self.last_recalc = report;

        self.commit(
            version,
            EntryKind::AddSheet { name: name.to_string() },
            changes,
            Vec::new(),
            None,
        )
    }

    fn collect_changes(&self, report: &RecalcReport) -> Vec<CellChange> {
        report
            .changed
            .iter()
            .map(|&cell| CellChange {
                cell,
                address: qualified_address(&self.sheets, cell),
                raw: None,
                value: self.sheets.value(cell),
            })
            .collect()
    }

    fn commit(
        &mut self,
        version: u64,
        kind: EntryKind,
        changes: Vec<CellChange>,
        notices: Vec<Notice>,
        origin: Option<SessionId>,
    ) -> Result<ValueChangeSet, OperationError> {
        let entry = LogEntry {
            version,
            kind,
            changes: changes.clone(),
            notices: notices.clone(),
            applied_at: Utc::now(),
        };
        if let Err(err) = self.log.append(entry) {
            log::error!("operation log rejected version {}: {}", version, err);
            return Err(OperationError::Fatal(err));
        }
        self.version = version;

        Ok(ValueChangeSet {
            version,
            origin,
            changes,
            notices,
        })
    }
}

fn sheet_resolver(sheets: &Sheets) -> impl Fn(&str) -> Option<SheetId> + Copy + '_ {
    move |name| sheets.by_name(name).map(|s| s.id())
}

/// Bind a formula against the current sheets, with references that leave the
/// grid turned into #REF!.
fn bind_in_grid(ast: &ParsedExpr, sheets: &Sheets, limits: &WorkbookLimits, context: SheetId) -> BoundExpr {
    let mut expr = bind_expr(ast, sheet_resolver(sheets));
    restrict_to_grid(&mut expr, sheets, limits, context);
    expr
}

fn restrict_to_grid(expr: &mut BoundExpr, sheets: &Sheets, limits: &WorkbookLimits, context: SheetId) {
    let invalidate = |sheet: &mut SheetRef| {
        let id = match sheet {
            SheetRef::Current => context,
            SheetRef::Id(id) => *id,
            SheetRef::RefError { .. } => return,
        };
        let last_known_name = sheets.get(id).map(|s| s.name().to_string()).unwrap_or_default();
        *sheet = SheetRef::RefError { last_known_name };
    };

    match expr {
        Expr::CellRef { sheet, row, col, .. } => {
            if !limits.contains(*row, *col) {
                invalidate(sheet);
            }
        }
        Expr::Range { sheet, start_row, start_col, end_row, end_col, .. } => {
            if !limits.contains((*start_row).max(*end_row), (*start_col).max(*end_col)) {
                invalidate(sheet);
            }
        }
        Expr::Function { args, .. } => {
            for arg in args {
                restrict_to_grid(arg, sheets, limits, context);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            restrict_to_grid(left, sheets, limits, context);
            restrict_to_grid(right, sheets, limits, context);
        }
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Empty => {}
    }
}

/// Resolve an A1 address; unqualified addresses refer to the first sheet.
fn resolve_address(sheets: &Sheets, limits: &WorkbookLimits, address: &str) -> Result<CellId, OperationError> {
    let parsed = parse_a1(address).map_err(|e| OperationError::address(address, e))?;
    let sheet = match &parsed.sheet {
        Some(name) => sheets.by_name(name),
        None => sheets.first(),
    }
    .ok_or_else(|| OperationError::UnknownSheet(parsed.sheet.clone().unwrap_or_default()))?;

    if !limits.contains(parsed.row, parsed.col) {
        return Err(OperationError::InvalidAddress {
            address: address.to_string(),
            reason: format!("outside the {}x{} grid", limits.max_rows, limits.max_cols),
        });
    }
    Ok(CellId::new(sheet.id(), parsed.row, parsed.col))
}

fn qualified_address(sheets: &Sheets, cell: CellId) -> String {
    match sheets.get(cell.sheet) {
        Some(sheet) => format!("{}!{}", quote_sheet_name(sheet.name()), cell.a1()),
        None => cell.to_string(),
    }
}

fn cell_view(sheets: &Sheets, cell: CellId) -> CellView {
    let stored = sheets.cell(cell);
    CellView {
        cell,
        address: qualified_address(sheets, cell),
        raw: stored.map(|c| c.raw()).unwrap_or_default(),
        value: stored.map(|c| c.value.clone()).unwrap_or_default(),
        version: stored.map_or(0, |c| c.version),
        is_formula: stored.is_some_and(|c| c.input.is_formula()),
    }
}

fn sheet_cells(sheets: &Sheets, sheet: &Worksheet) -> Vec<CellView> {
    sheet
        .cells_iter()
        .filter(|(_, c)| !c.raw().is_empty() || !c.value.is_empty())
        .map(|(&(row, col), _)| cell_view(sheets, CellId::new(sheet.id(), row, col)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::RejectStale;
    use crate::formula::eval::ErrorKind;

    fn edit(wb: &mut Workbook, session: SessionId, address: &str, raw: &str) -> Result<ValueChangeSet, OperationError> {
        let base = wb.version();
        wb.apply_operation(Operation::new(address, raw, session, base))
    }

    fn value(wb: &Workbook, address: &str) -> Value {
        wb.get_cell(address).unwrap().value
    }

    #[test]
    fn test_new_workbook_has_default_sheet() {
        let wb = Workbook::new();
        assert_eq!(wb.sheet_names(), vec!["Sheet1"]);
        assert_eq!(wb.version(), 0);
        assert_eq!(value(&wb, "A1"), Value::Empty);
        assert_eq!(wb.get_cell("Sheet1!Z99").unwrap().version, 0);
    }

    #[test]
    fn test_propagation_through_sum() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "10").unwrap();
        edit(&mut wb, s, "A2", "20").unwrap();
        let set = edit(&mut wb, s, "A3", "=SUM(A1:A2)").unwrap();
        assert_eq!(set.version, 3);
        assert_eq!(set.changes.len(), 1);
        assert_eq!(set.changes[0].raw.as_deref(), Some("=SUM(A1:A2)"));
        assert_eq!(value(&wb, "A3"), Value::Number(30.0));

        edit(&mut wb, s, "B1", "=A3*2").unwrap();
        edit(&mut wb, s, "C5", "=7").unwrap();

        let set = edit(&mut wb, s, "A1", "100").unwrap();
        let addresses: Vec<&str> = set.changes.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(addresses, vec!["Sheet1!A1", "Sheet1!A3", "Sheet1!B1"]);
        assert_eq!(value(&wb, "A3"), Value::Number(120.0));
        assert_eq!(value(&wb, "B1"), Value::Number(240.0));
        // Only the closure of A1 was recomputed
        assert_eq!(wb.last_recalc().cells_recomputed, 3);
    }

    #[test]
    fn test_change_set_raw_only_on_edited_cell() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "B1", "=A1+1").unwrap();
        let set = edit(&mut wb, s, "A1", "4").unwrap();

        assert_eq!(set.change_for("Sheet1!A1").unwrap().raw.as_deref(), Some("4"));
        assert_eq!(set.change_for("Sheet1!B1").unwrap().raw, None);
        assert_eq!(set.change_for("Sheet1!B1").unwrap().value, Value::Number(5.0));
        assert_eq!(set.origin, Some(s));
    }

    #[test]
    fn test_reapplying_identical_operation_is_empty_but_versioned() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "5").unwrap();
        edit(&mut wb, s, "A2", "=A1*2").unwrap();

        let set = edit(&mut wb, s, "A2", "=A1*2").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.version, 3);
        assert_eq!(wb.version(), 3);
        assert_eq!(wb.log().head(), 3);
        assert_eq!(value(&wb, "A2"), Value::Number(10.0));
    }

    #[test]
    fn test_same_value_different_raw_reports_raw() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "2").unwrap();
        let set = edit(&mut wb, s, "A1", "=1+1").unwrap();
        assert_eq!(set.changes.len(), 1);
        assert_eq!(set.changes[0].raw.as_deref(), Some("=1+1"));
        assert_eq!(set.changes[0].value, Value::Number(2.0));
    }

    #[test]
    fn test_cycle_rejected_and_state_kept() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "B1", "7").unwrap();
        edit(&mut wb, s, "A1", "=B1").unwrap();

        let err = edit(&mut wb, s, "B1", "=A1").unwrap_err();
        assert!(matches!(err, OperationError::Cycle(_)));
        assert_eq!(wb.version(), 2);
        assert_eq!(wb.log().head(), 2);
        let b1 = wb.get_cell("B1").unwrap();
        assert_eq!(b1.raw, "7");
        assert_eq!(b1.value, Value::Number(7.0));
        assert!(wb.dep_graph().precedents(b1.cell).is_empty());
        wb.dep_graph().assert_consistent();
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut wb = Workbook::new();
        let err = edit(&mut wb, SessionId::new(), "C3", "=C3+1").unwrap_err();
        match err {
            OperationError::Cycle(report) => assert_eq!(report.cells.len(), 1),
            other => panic!("expected cycle, got {:?}", other),
        }
        assert_eq!(wb.version(), 0);
    }

    #[test]
    fn test_division_by_zero_propagates() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "B1", "=A1+1").unwrap();
        edit(&mut wb, s, "C1", "=SUM(B1, 2)").unwrap();
        edit(&mut wb, s, "A1", "=1/0").unwrap();

        assert_eq!(value(&wb, "A1"), Value::Error(ErrorKind::Div0));
        assert_eq!(value(&wb, "B1"), Value::Error(ErrorKind::Div0));
        assert_eq!(value(&wb, "C1"), Value::Error(ErrorKind::Div0));
    }

    #[test]
    fn test_parse_error_accepted_with_notice() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "3").unwrap();
        edit(&mut wb, s, "B1", "=A1*2").unwrap();
        edit(&mut wb, s, "C1", "=B1+1").unwrap();

        let set = edit(&mut wb, s, "B1", "=A1*").unwrap();
        assert_eq!(set.version, 4);
        assert_eq!(set.notices.len(), 1);
        assert!(matches!(&set.notices[0], Notice::FormulaError { session, address, .. }
            if *session == s && address == "Sheet1!B1"));

        let b1 = wb.get_cell("B1").unwrap();
        assert_eq!(b1.raw, "=A1*");
        assert_eq!(b1.value, Value::Error(ErrorKind::Parse));
        assert!(wb.dep_graph().precedents(b1.cell).is_empty());
        assert_eq!(value(&wb, "C1"), Value::Error(ErrorKind::Parse));

        // Editing A1 no longer touches B1
        let set = edit(&mut wb, s, "A1", "4").unwrap();
        assert_eq!(set.changes.len(), 1);
    }

    #[test]
    fn test_clearing_a_cell() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "3").unwrap();
        edit(&mut wb, s, "B1", "=A1").unwrap();
        let set = edit(&mut wb, s, "A1", "").unwrap();

        assert_eq!(set.change_for("Sheet1!A1").unwrap().value, Value::Empty);
        assert_eq!(set.change_for("Sheet1!A1").unwrap().raw.as_deref(), Some(""));
        assert_eq!(value(&wb, "B1"), Value::Number(0.0));
        assert_eq!(wb.worksheet("Sheet1").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_addresses() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        assert!(matches!(edit(&mut wb, s, "A0", "1"), Err(OperationError::InvalidAddress { .. })));
        assert!(matches!(edit(&mut wb, s, "Nope!A1", "1"), Err(OperationError::UnknownSheet(name)) if name == "Nope"));
        assert!(matches!(edit(&mut wb, s, "A1048577", "1"), Err(OperationError::InvalidAddress { .. })));
        assert!(edit(&mut wb, s, "XFD1048576", "1").is_ok());
        assert_eq!(wb.version(), 1);
    }

    #[test]
    fn test_custom_limits() {
        let mut wb = Workbook::with_options(WorkbookOptions {
            limits: WorkbookLimits { max_rows: 10, max_cols: 2 },
            ..WorkbookOptions::default()
        });
        let s = SessionId::new();
        assert!(edit(&mut wb, s, "B10", "1").is_ok());
        assert!(edit(&mut wb, s, "C1", "1").is_err());
        assert!(edit(&mut wb, s, "A11", "1").is_err());
    }

    #[test]
    fn test_full_column_sum_is_one_graph_node() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "B1", "=SUM(A1:A1048576)").unwrap();
        assert_eq!(wb.dep_graph().interned_count(), 1);
        assert_eq!(value(&wb, "B1"), Value::Number(0.0));

        let set = edit(&mut wb, s, "A500000", "5").unwrap();
        let addresses: Vec<&str> = set.changes.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(addresses, vec!["Sheet1!A500000", "Sheet1!B1"]);
        edit(&mut wb, s, "A1048576", "=A500000*2").unwrap();
        assert_eq!(value(&wb, "B1"), Value::Number(15.0));
        assert_eq!(wb.last_recalc().cells_recomputed, 2);

        // The range covers the tail cell, so pointing it back at B1 is a cycle
        let err = edit(&mut wb, s, "A1048576", "=B1").unwrap_err();
        assert!(matches!(err, OperationError::Cycle(_)));
        wb.dep_graph().assert_consistent();
    }

    #[test]
    fn test_references_outside_grid_read_ref_error() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        let set = edit(&mut wb, s, "D1", "=A99999999").unwrap();
        assert_eq!(set.changes[0].value, Value::Error(ErrorKind::Ref));
        assert_eq!(wb.get_cell("D1").unwrap().raw, "=A99999999");
        edit(&mut wb, s, "D2", "=SUM(A1:XFE1)").unwrap();
        assert_eq!(value(&wb, "D2"), Value::Error(ErrorKind::Ref));

        assert!(!wb.dep_graph().is_formula_cell(wb.get_cell("D1").unwrap().cell));
        assert_eq!(wb.dep_graph().interned_count(), 0);
    }

    #[test]
    fn test_future_base_rejected() {
        let mut wb = Workbook::new();
        let err = wb
            .apply_operation(Operation::new("A1", "1", SessionId::new(), 5))
            .unwrap_err();
        assert_eq!(err, OperationError::FutureBase { base: 5, current: 0 });
    }

    #[test]
    fn test_last_writer_wins_notifies_superseded_session() {
        let mut wb = Workbook::new();
        let (alice, bob) = (SessionId::new(), SessionId::new());

        wb.apply_operation(Operation::new("A1", "1", alice, 0)).unwrap();
        let set = wb.apply_operation(Operation::new("A1", "2", bob, 0)).unwrap();

        assert_eq!(value(&wb, "A1"), Value::Number(2.0));
        assert_eq!(
            set.notices,
            vec![Notice::ConflictOverride {
                session: alice,
                address: "Sheet1!A1".into(),
                superseded_version: 1,
                winning_session: bob,
                winning_version: 2,
            }]
        );
        // The superseded write stays in the log
        assert_eq!(wb.log().len(), 2);
    }

    #[test]
    fn test_concurrent_writes_to_different_cells_do_not_conflict() {
        let mut wb = Workbook::new();
        let (alice, bob) = (SessionId::new(), SessionId::new());
        wb.apply_operation(Operation::new("A1", "1", alice, 0)).unwrap();
        let set = wb.apply_operation(Operation::new("A2", "2", bob, 0)).unwrap();
        assert!(set.notices.is_empty());
    }

    #[test]
    fn test_reject_stale_policy() {
        let mut wb = Workbook::with_options(WorkbookOptions {
            policy: Box::new(RejectStale),
            ..WorkbookOptions::default()
        });
        let (alice, bob) = (SessionId::new(), SessionId::new());
        wb.apply_operation(Operation::new("A1", "1", alice, 0)).unwrap();

        let err = wb.apply_operation(Operation::new("A1", "2", bob, 0)).unwrap_err();
        assert_eq!(err, OperationError::StaleBase { expected: 0, actual: 1 });
        assert_eq!(value(&wb, "A1"), Value::Number(1.0));
        assert_eq!(wb.version(), 1);
        assert_eq!(wb.policy_name(), "reject_stale");
    }

    #[test]
    fn test_add_sheet_rebinds_formulas() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "=Data!B2*2").unwrap();
        assert_eq!(value(&wb, "A1"), Value::Error(ErrorKind::Ref));

        let set = wb.add_sheet("Data").unwrap();
        assert_eq!(set.version, 2);
        assert_eq!(set.origin, None);
        assert_eq!(set.change_for("Sheet1!A1").unwrap().value, Value::Number(0.0));

        edit(&mut wb, s, "Data!B2", "21").unwrap();
        assert_eq!(value(&wb, "A1"), Value::Number(42.0));
        assert_eq!(wb.sheet_names(), vec!["Sheet1", "Data"]);
    }

    #[test]
    fn test_add_sheet_validates_name() {
        let mut wb = Workbook::new();
        assert_eq!(wb.add_sheet("sheet1").unwrap_err(), OperationError::DuplicateSheet("sheet1".into()));
        assert_eq!(wb.add_sheet("a/b").unwrap_err(), OperationError::InvalidSheetName("a/b".into()));
        assert_eq!(wb.add_sheet("  ").unwrap_err(), OperationError::InvalidSheetName("".into()));
        assert_eq!(wb.version(), 0);
    }

    #[test]
    fn test_quoted_sheet_addresses() {
        let mut wb = Workbook::new();
        wb.add_sheet("Q1 Budget").unwrap();
        let set = edit(&mut wb, SessionId::new(), "'Q1 Budget'!C4", "9").unwrap();
        assert_eq!(set.changes[0].address, "'Q1 Budget'!C4");
        edit(&mut wb, SessionId::new(), "A1", "='Q1 Budget'!C4+1").unwrap();
        assert_eq!(value(&wb, "A1"), Value::Number(10.0));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "1").unwrap();
        let snap = wb.snapshot();
        edit(&mut wb, s, "A1", "2").unwrap();

        assert_eq!(snap.version(), 1);
        assert_eq!(snap.get_cell("A1").unwrap().value, Value::Number(1.0));
        assert_eq!(value(&wb, "A1"), Value::Number(2.0));
    }

    #[test]
    fn test_worksheet_is_row_major() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        edit(&mut wb, s, "B2", "x").unwrap();
        edit(&mut wb, s, "A2", "y").unwrap();
        edit(&mut wb, s, "C1", "z").unwrap();

        let cells: Vec<String> = wb.worksheet("sheet1").unwrap().into_iter().map(|c| c.address).collect();
        assert_eq!(cells, vec!["Sheet1!C1", "Sheet1!A2", "Sheet1!B2"]);
        assert!(matches!(wb.worksheet("Missing"), Err(OperationError::UnknownSheet(_))));
    }

    #[test]
    fn test_resync_delta_and_full() {
        let mut wb = Workbook::with_options(WorkbookOptions {
            retention: 3,
            ..WorkbookOptions::default()
        });
        let s = SessionId::new();
        edit(&mut wb, s, "A1", "1").unwrap();
        edit(&mut wb, s, "B1", "=A1*10").unwrap();
        edit(&mut wb, s, "A1", "2").unwrap();
        edit(&mut wb, s, "A1", "3").unwrap();

        match wb.resync(2) {
            Resync::Delta { from, to, changes } => {
                assert_eq!((from, to), (2, 4));
                let a1 = changes.iter().find(|c| c.address == "Sheet1!A1").unwrap();
                assert_eq!(a1.value, Value::Number(3.0));
                let b1 = changes.iter().find(|c| c.address == "Sheet1!B1").unwrap();
                assert_eq!(b1.value, Value::Number(30.0));
                assert_eq!(changes.len(), 2);
            }
            Resync::Full(_) => panic!("expected delta"),
        }

        match wb.resync(0) {
            Resync::Full(snap) => {
                assert_eq!(snap.version(), 4);
                assert_eq!(snap.cells().len(), 2);
            }
            Resync::Delta { .. } => panic!("expected full snapshot"),
        }

        assert!(matches!(wb.changes_since(0), Err(LogError::VersionGapExceeded { .. })));
    }

    #[test]
    fn test_corrupted_sequence_is_fatal() {
        let mut wb = Workbook::new();
        wb.version = 7;
        let err = edit(&mut wb, SessionId::new(), "A1", "1").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err, OperationError::Fatal(LogError::OutOfSequence { expected: 1, got: 8 }));
    }

    #[test]
    fn test_cross_sheet_dependency() {
        let mut wb = Workbook::new();
        let s = SessionId::new();
        wb.add_sheet("Other").unwrap();
        edit(&mut wb, s, "Other!A1", "5").unwrap();
        edit(&mut wb, s, "A1", "=Other!A1+Other!A2").unwrap();
        let set = edit(&mut wb, s, "Other!A2", "6").unwrap();
        assert_eq!(set.change_for("Sheet1!A1").unwrap().value, Value::Number(11.0));
    }
}
