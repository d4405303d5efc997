// Property-based tests for incremental recalculation and the operation log.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashMap;

use proptest::prelude::*;

use cogrid_engine::cell_id::format_a1;
use cogrid_engine::formula::eval::{evaluate, CellLookup};
use cogrid_engine::formula::parser::{bind_expr, parse};
use cogrid_engine::*;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

const ROWS: usize = 4;
const COLS: usize = 4;

fn arb_address() -> impl Strategy<Value = String> {
    (0..ROWS, 0..COLS).prop_map(|(r, c)| format_a1(r, c))
}

/// Raw cell input: mostly numbers and small formulas over the grid.
fn arb_raw() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => (-50i32..50).prop_map(|n| n.to_string()),
        2 => (arb_address(), arb_address()).prop_map(|(a, b)| format!("={}+{}", a, b)),
        2 => (arb_address(), arb_address()).prop_map(|(a, b)| format!("=SUM({}:{})", a, b)),
        1 => (arb_address(), 0i32..3).prop_map(|(a, d)| format!("={}/{}", a, d)),
        1 => Just("label".to_string()),
        1 => Just(String::new()),
        1 => Just("=1+".to_string()),
    ]
}

fn arb_ops(max: usize) -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec((arb_address(), arb_raw()), 1..max)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reads values straight from a snapshot of the default sheet.
struct SnapshotLookup<'a>(&'a WorkbookSnapshot);

impl CellLookup for SnapshotLookup<'_> {
    fn get_value(&self, row: usize, col: usize) -> Value {
        self.0
            .get_cell(&format_a1(row, col))
            .map(|c| c.value)
            .unwrap_or(Value::Error(ErrorKind::Ref))
    }
}

fn run(ops: &[(String, String)]) -> (Workbook, Vec<ValueChangeSet>) {
    let mut wb = Workbook::new();
    let session = SessionId::new();
    let mut sets = Vec::new();
    for (address, raw) in ops {
        let op = Operation::new(address.as_str(), raw.as_str(), session, wb.version());
        match wb.apply_operation(op) {
            Ok(set) => sets.push(set),
            Err(OperationError::Cycle(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    (wb, sets)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn values_match_fresh_evaluation(ops in arb_ops(30)) {
        let (wb, _) = run(&ops);
        let snap = wb.snapshot();
        let lookup = SnapshotLookup(&snap);

        for view in snap.cells() {
            if !view.is_formula {
                continue;
            }
            let expected = match parse(&view.raw) {
                Ok(ast) => {
                    let bound = bind_expr(&ast, |name| wb.sheet_id_by_name(name));
                    match evaluate(&bound, &lookup) {
                        Value::Empty => Value::Number(0.0),
                        v => v,
                    }
                }
                Err(_) => Value::Error(ErrorKind::Parse),
            };
            prop_assert_eq!(&view.value, &expected, "cell {}", view.address);
        }
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn recalc_order_is_topological(ops in arb_ops(30)) {
        let (wb, _) = run(&ops);
        let order = &wb.last_recalc().order;
        let position: HashMap<CellId, usize> = order.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        for (i, cell) in order.iter().enumerate() {
            let graph = wb.dep_graph();
            let in_ranges = order
                .iter()
                .filter(|c| graph.range_precedents(*cell).iter().any(|r| r.contains(**c)));
            for pred in graph.precedents(*cell).into_iter().chain(in_ranges.copied()) {
                if let Some(&p) = position.get(&pred) {
                    prop_assert!(p < i, "{} evaluated before its precedent {}", cell, pred);
                }
            }
        }
        prop_assert!(wb.dep_graph().find_cycle_members().is_empty());
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn reapplying_last_operation_changes_nothing(ops in arb_ops(20)) {
        let (mut wb, sets) = run(&ops);
        prop_assume!(!sets.is_empty());

        // Re-submit whatever the last edited cell currently holds
        let address = &ops[ops.len() - 1].0;
        let raw = wb.get_cell(address).unwrap().raw;
        let base = wb.version();

        let set = wb
            .apply_operation(Operation::new(address.as_str(), raw.as_str(), SessionId::new(), base))
            .unwrap();
        prop_assert!(set.is_empty(), "re-apply of {}={} changed {:?}", address, raw, set.changes);
        prop_assert_eq!(set.version, base + 1);
    }
}

proptest! {
    #![proptest_config(config_256())]
    #[test]
    fn replaying_change_sets_converges(ops in arb_ops(30)) {
        let (wb, sets) = run(&ops);

        // A client that applies every broadcast in order
        let mut mirror: HashMap<String, Value> = HashMap::new();
        for set in &sets {
            for change in &set.changes {
                mirror.insert(change.address.clone(), change.value.clone());
            }
        }
        for (address, value) in &mirror {
            prop_assert_eq!(&wb.get_cell(address).unwrap().value, value, "cell {}", address);
        }

        // The compacted log agrees with the mirror
        let compacted = wb.changes_since(0).unwrap();
        prop_assert_eq!(compacted.len(), mirror.len());
        for change in compacted {
            prop_assert_eq!(Some(&change.value), mirror.get(&change.address));
        }
    }
}
