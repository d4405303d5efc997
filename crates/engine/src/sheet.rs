//! Worksheets: sparse, row-major ordered cell storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::cell_id::CellId;
use crate::formula::eval::{CellLookup, ErrorKind, Value};

/// Stable sheet identity. Monotonically assigned by the workbook, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(pub u64);

impl SheetId {
    pub fn from_raw(raw: u64) -> Self {
        SheetId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Sheet reference as written in a formula, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum UnboundSheetRef {
    /// No prefix: the sheet holding the formula.
    Current,
    /// `Name!A1` - resolved against the workbook at bind time.
    Named(String),
}

/// Sheet reference after binding against a workbook.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetRef {
    Current,
    Id(SheetId),
    /// Named sheet that does not exist. Evaluates to #REF!.
    RefError { last_known_name: String },
}

/// Normalize a sheet name for case-insensitive comparison.
pub fn normalize_sheet_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Sheet names must be non-empty, at most 31 chars, and free of `[]:*?/\`.
pub fn is_valid_sheet_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed.chars().count() <= 31
        && !trimmed.contains(['[', ']', ':', '*', '?', '/', '\\'])
}

/// Rows per copy-on-write block of a worksheet.
pub const BLOCK_ROWS: usize = 64;

type Block = BTreeMap<(usize, usize), Cell>;

/// A named worksheet. Cells are created implicitly on first write and never
/// removed; unset cells read as `Value::Empty`.
///
/// Cells are grouped into blocks of `BLOCK_ROWS` rows, each behind its own
/// `Arc`. Cloning a worksheet copies only the block table, and writing to a
/// shared worksheet copies only the block being written, so the cost of an
/// edit after a snapshot is bounded by the block size, not the sheet size.
#[derive(Debug, Clone)]
pub struct Worksheet {
    id: SheetId,
    name: String,
    blocks: BTreeMap<usize, Arc<Block>>,
}

impl Worksheet {
    pub fn new(id: SheetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            blocks: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        self.blocks.get(&(row / BLOCK_ROWS))?.get(&(row, col))
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut Cell> {
        let block = self.blocks.get_mut(&(row / BLOCK_ROWS))?;
        if !block.contains_key(&(row, col)) {
            return None;
        }
        Arc::make_mut(block).get_mut(&(row, col))
    }

    /// Get a cell for writing, creating the entry if it does not exist yet.
    pub fn entry(&mut self, row: usize, col: usize) -> &mut Cell {
        let block = self.blocks.entry(row / BLOCK_ROWS).or_default();
        Arc::make_mut(block).entry((row, col)).or_default()
    }

    /// Computed value of a cell (Empty if unset).
    pub fn value(&self, row: usize, col: usize) -> Value {
        self.get(row, col).map(|c| c.value.clone()).unwrap_or(Value::Empty)
    }

    /// Non-blank values inside a block of cells, row-major. Visits only
    /// populated cells.
    pub fn values_in(&self, top: usize, left: usize, bottom: usize, right: usize) -> Vec<Value> {
        let (top, bottom) = (top.min(bottom), top.max(bottom));
        let (left, right) = (left.min(right), left.max(right));
        let mut out = Vec::new();
        for block in self.blocks.range(top / BLOCK_ROWS..=bottom / BLOCK_ROWS).map(|(_, b)| b) {
            for (&(_, col), cell) in block.range((top, left)..=(bottom, right)) {
                if (left..=right).contains(&col) && !cell.value.is_empty() {
                    out.push(cell.value.clone());
                }
            }
        }
        out
    }

    /// Cells in row-major order.
    pub fn cells_iter(&self) -> impl Iterator<Item = (&(usize, usize), &Cell)> {
        self.blocks.values().flat_map(|block| block.iter())
    }

    pub fn cell_count(&self) -> usize {
        self.blocks.values().map(|block| block.len()).sum()
    }
}

/// The worksheets of a workbook, in creation order.
///
/// Each sheet sits behind an `Arc` so a snapshot is a cheap clone; the first
/// write after a snapshot copies the written sheet's block table and the one
/// block holding the cell.
#[derive(Debug, Clone, Default)]
pub struct Sheets {
    sheets: Vec<Arc<Worksheet>>,
}

impl Sheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sheet: Worksheet) {
        self.sheets.push(Arc::new(sheet));
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn first(&self) -> Option<&Worksheet> {
        self.sheets.first().map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worksheet> {
        self.sheets.iter().map(|s| s.as_ref())
    }

    pub fn get(&self, id: SheetId) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.id() == id).map(|s| s.as_ref())
    }

    /// Mutable access, copying the sheet first if a snapshot still shares it.
    pub fn get_mut(&mut self, id: SheetId) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.id() == id).map(Arc::make_mut)
    }

    /// Case-insensitive lookup by name.
    pub fn by_name(&self, name: &str) -> Option<&Worksheet> {
        let key = normalize_sheet_name(name);
        self.iter().find(|s| normalize_sheet_name(s.name()) == key)
    }

    pub fn cell(&self, cell: CellId) -> Option<&Cell> {
        self.get(cell.sheet)?.get(cell.row, cell.col)
    }

    pub fn cell_mut(&mut self, cell: CellId) -> Option<&mut Cell> {
        self.get_mut(cell.sheet)?.get_mut(cell.row, cell.col)
    }

    /// Stored value of a cell; #REF! if its sheet does not exist.
    pub fn value(&self, cell: CellId) -> Value {
        match self.get(cell.sheet) {
            Some(sheet) => sheet.value(cell.row, cell.col),
            None => Value::Error(ErrorKind::Ref),
        }
    }

    /// Shared handles to every sheet, for publishing a snapshot.
    pub fn shared(&self) -> Vec<Arc<Worksheet>> {
        self.sheets.clone()
    }
}

/// Evaluation view of the workbook from one sheet's perspective.
pub struct SheetLookup<'a> {
    sheets: &'a Sheets,
    current: SheetId,
}

impl<'a> SheetLookup<'a> {
    pub fn new(sheets: &'a Sheets, current: SheetId) -> Self {
        Self { sheets, current }
    }
}

impl CellLookup for SheetLookup<'_> {
    fn get_value(&self, row: usize, col: usize) -> Value {
        self.sheets.value(CellId::new(self.current, row, col))
    }

    fn get_value_sheet(&self, sheet_id: SheetId, row: usize, col: usize) -> Value {
        self.sheets.value(CellId::new(sheet_id, row, col))
    }

    fn area_values(&self, sheet: Option<SheetId>, top: usize, left: usize, bottom: usize, right: usize) -> Vec<Value> {
        match self.sheets.get(sheet.unwrap_or(self.current)) {
            Some(worksheet) => worksheet.values_in(top, left, bottom, right),
            None => vec![Value::Error(ErrorKind::Ref)],
        }
    }
}
