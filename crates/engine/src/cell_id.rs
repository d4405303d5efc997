//! Cell identity and A1 addressing.
//!
//! A `CellId` uniquely identifies a cell across all sheets in a workbook.
//! Addresses on the wire are A1 strings, optionally sheet-qualified
//! (`Sheet2!B3`, `'Q1 Budget'!C4`).

use thiserror::Error;

use crate::sheet::SheetId;

/// Largest column index accepted by the address parser (XFD).
pub const MAX_COL_LETTERS: usize = 3;

/// Unique identifier for a cell in a workbook.
///
/// Combines sheet identity with row/column coordinates.
/// Used as graph nodes in the dependency graph.
///
/// Ordering is `(sheet, row, col)` ascending; every deterministic tie-break
/// in the engine uses it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    /// The sheet this cell belongs to (stable, never reused)
    pub sheet: SheetId,
    /// Row index (0-based)
    pub row: usize,
    /// Column index (0-based)
    pub col: usize,
}

impl CellId {
    /// Create a new CellId.
    #[inline]
    pub fn new(sheet: SheetId, row: usize, col: usize) -> Self {
        Self { sheet, row, col }
    }

    /// The unqualified A1 form of this cell (`B3`).
    pub fn a1(&self) -> String {
        format_a1(self.row, self.col)
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sheet{}!{}{}", self.sheet.raw(), col_to_letters(self.col), self.row + 1)
    }
}

/// A rectangular block of cells on one sheet, corners normalized.
///
/// Formulas depend on ranges as a whole; the cells a range covers are never
/// enumerated into the dependency graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRange {
    pub sheet: SheetId,
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl CellRange {
    /// Build a range from two corners given in either order.
    pub fn new(sheet: SheetId, (r1, c1): (usize, usize), (r2, c2): (usize, usize)) -> Self {
        Self {
            sheet,
            top: r1.min(r2),
            left: c1.min(c2),
            bottom: r1.max(r2),
            right: c1.max(c2),
        }
    }

    #[inline]
    pub fn contains(&self, cell: CellId) -> bool {
        cell.sheet == self.sheet
            && (self.top..=self.bottom).contains(&cell.row)
            && (self.left..=self.right).contains(&cell.col)
    }

    /// Number of cells covered.
    pub fn area(&self) -> u64 {
        let rows = (self.bottom - self.top) as u64 + 1;
        let cols = (self.right - self.left) as u64 + 1;
        rows.saturating_mul(cols)
    }

    /// Covered cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        (self.top..=self.bottom)
            .flat_map(move |row| (self.left..=self.right).map(move |col| CellId::new(self.sheet, row, col)))
    }
}

impl std::fmt::Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sheet{}!{}:{}", self.sheet.raw(), format_a1(self.top, self.left), format_a1(self.bottom, self.right))
    }
}

/// Errors from parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("invalid cell address: {0}")]
    Invalid(String),
    #[error("unterminated quoted sheet name in {0}")]
    UnterminatedSheet(String),
}

/// A parsed, not yet resolved, A1 reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Ref {
    /// Sheet prefix as written (without quotes), if any.
    pub sheet: Option<String>,
    pub row: usize,
    pub col: usize,
}

/// Parse an address such as `A1`, `$B$2`, `Sheet2!C3` or `'My Sheet'!D4`.
pub fn parse_a1(input: &str) -> Result<A1Ref, AddressError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressError::Empty);
    }

    let (sheet, cell_part) = split_sheet_prefix(input)?;
    let (row, col) = parse_cell_part(cell_part)
        .ok_or_else(|| AddressError::Invalid(input.to_string()))?;

    Ok(A1Ref { sheet, row, col })
}

fn split_sheet_prefix(input: &str) -> Result<(Option<String>, &str), AddressError> {
    if let Some(rest) = input.strip_prefix('\'') {
        // 'Bob''s Sheet'!A1 - doubled quotes escape a single quote
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    name.push('\'');
                    continue;
                }
                let after = &rest[idx + 1..];
                return match after.strip_prefix('!') {
                    Some(cell) => Ok((Some(name), cell)),
                    None => Err(AddressError::Invalid(input.to_string())),
                };
            }
            name.push(ch);
        }
        return Err(AddressError::UnterminatedSheet(input.to_string()));
    }

    match input.rfind('!') {
        Some(idx) => {
            let name = &input[..idx];
            if name.is_empty() {
                return Err(AddressError::Invalid(input.to_string()));
            }
            Ok((Some(name.to_string()), &input[idx + 1..]))
        }
        None => Ok((None, input)),
    }
}

/// Parse the `$A$1` part of an address into 0-based (row, col).
pub(crate) fn parse_cell_part(s: &str) -> Option<(usize, usize)> {
    let s = s.to_ascii_uppercase();
    let mut chars = s.chars().peekable();

    if chars.peek() == Some(&'$') {
        chars.next();
    }

    let mut col_str = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_uppercase() {
            col_str.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if col_str.is_empty() || col_str.len() > MAX_COL_LETTERS {
        return None;
    }

    if chars.peek() == Some(&'$') {
        chars.next();
    }

    let row_str: String = chars.collect();
    if row_str.is_empty() || !row_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row: usize = row_str.parse().ok()?;
    if row == 0 {
        return None;
    }

    Some((row - 1, letters_to_col(&col_str)?))
}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert Excel-style column letters to a 0-based index (A=0, AA=26).
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut acc = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
    }
    Some(acc - 1)
}

/// Format 0-based (row, col) as `A1`.
pub fn format_a1(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Quote a sheet name for use as an address prefix when needed.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_equality() {
        let a = CellId::new(SheetId::from_raw(1), 0, 0);
        let b = CellId::new(SheetId::from_raw(1), 0, 0);
        let c = CellId::new(SheetId::from_raw(2), 0, 0);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cell_id_ordering_is_sheet_row_col() {
        let s1 = SheetId::from_raw(1);
        let mut cells = vec![
            CellId::new(s1, 1, 0),
            CellId::new(SheetId::from_raw(2), 0, 0),
            CellId::new(s1, 0, 5),
            CellId::new(s1, 0, 1),
        ];
        cells.sort();
        assert_eq!(
            cells,
            vec![
                CellId::new(s1, 0, 1),
                CellId::new(s1, 0, 5),
                CellId::new(s1, 1, 0),
                CellId::new(SheetId::from_raw(2), 0, 0),
            ]
        );
    }

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
    }

    #[test]
    fn test_letters_to_col() {
        assert_eq!(letters_to_col("A"), Some(0));
        assert_eq!(letters_to_col("z"), Some(25));
        assert_eq!(letters_to_col("AA"), Some(26));
        assert_eq!(letters_to_col("XFD"), Some(16383));
        assert_eq!(letters_to_col(""), None);
        assert_eq!(letters_to_col("A1"), None);
    }

    #[test]
    fn test_display() {
        let cell = CellId::new(SheetId::from_raw(2), 9, 26);
        assert_eq!(format!("{}", cell), "Sheet2!AA10");
        assert_eq!(cell.a1(), "AA10");
    }

    #[test]
    fn test_range_normalizes_corners() {
        let sheet = SheetId::from_raw(1);
        let range = CellRange::new(sheet, (4, 2), (1, 0));
        assert_eq!((range.top, range.left, range.bottom, range.right), (1, 0, 4, 2));
        assert_eq!(range.area(), 12);
        assert!(range.contains(CellId::new(sheet, 4, 0)));
        assert!(!range.contains(CellId::new(sheet, 5, 0)));
        assert!(!range.contains(CellId::new(SheetId::from_raw(2), 1, 1)));
        assert_eq!(range.to_string(), "Sheet1!A2:C5");
    }

    #[test]
    fn test_range_cells_row_major() {
        let sheet = SheetId::from_raw(1);
        let cells: Vec<_> = CellRange::new(sheet, (0, 0), (1, 1)).cells().collect();
        assert_eq!(
            cells,
            vec![
                CellId::new(sheet, 0, 0),
                CellId::new(sheet, 0, 1),
                CellId::new(sheet, 1, 0),
                CellId::new(sheet, 1, 1),
            ]
        );
    }

    #[test]
    fn test_parse_plain_address() {
        let r = parse_a1("B3").unwrap();
        assert_eq!(r, A1Ref { sheet: None, row: 2, col: 1 });

        let r = parse_a1("$c$10").unwrap();
        assert_eq!(r, A1Ref { sheet: None, row: 9, col: 2 });
    }

    #[test]
    fn test_parse_qualified_address() {
        let r = parse_a1("Sheet2!A1").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Sheet2"));

        let r = parse_a1("'Bob''s Sheet'!D4").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Bob's Sheet"));
        assert_eq!((r.row, r.col), (3, 3));
    }

    #[test]
    fn test_parse_invalid_addresses() {
        assert_eq!(parse_a1(""), Err(AddressError::Empty));
        assert!(matches!(parse_a1("A0"), Err(AddressError::Invalid(_))));
        assert!(matches!(parse_a1("1A"), Err(AddressError::Invalid(_))));
        assert!(matches!(parse_a1("ABCD1"), Err(AddressError::Invalid(_))));
        assert!(matches!(parse_a1("!A1"), Err(AddressError::Invalid(_))));
        assert!(matches!(parse_a1("'Open!A1"), Err(AddressError::UnterminatedSheet(_))));
    }

    #[test]
    fn test_quote_sheet_name() {
        assert_eq!(quote_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(quote_sheet_name("Q1 Budget"), "'Q1 Budget'");
        assert_eq!(quote_sheet_name("Bob's"), "'Bob''s'");
        assert_eq!(quote_sheet_name("2024"), "'2024'");
    }
}
