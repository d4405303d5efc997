//! Dependency graph for formula cells.
//!
//! Tracks precedents (cells a formula depends on) and dependents (cells that
//! depend on a given cell) for cycle rejection and minimal recomputation.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! This makes "what breaks if I change X?" trivial: follow outgoing edges.
//!
//! # Storage
//!
//! Cells are interned into an arena of dense `NodeId`s the first time they
//! take part in a single-cell edge. Adjacency is stored as index sets; the
//! public API speaks `CellId` only. Interned nodes are never freed, matching
//! the cell lifecycle (cells are never destroyed).
//!
//! Range references (`SUM(A1:A1048576)`) are stored whole against the formula
//! that reads them and are never expanded into per-cell edges. The dependents
//! of a cell are its single-cell successors plus every formula holding a
//! range that contains it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::cell_id::{CellId, CellRange};
use crate::formula::refs::FormulaRefs;
use crate::recalc::CycleReport;

/// Most cells the arena can intern (`NodeId` is a `u32`).
pub const MAX_NODES: usize = u32::MAX as usize + 1;

/// Dense arena index of an interned cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Why an edge set was refused. The graph is unchanged in both cases.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DependencyError {
    #[error(transparent)]
    Cycle(#[from] CycleReport),
    #[error("dependency graph is full ({limit} cells)")]
    Capacity { limit: usize },
}

/// Persistent dependency graph for formula cells.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = cells that B depends on (precedents)
/// - `succs[A]` = cells that depend on A (dependents)
/// - `ranges[B]` = ranges that B reads as a whole
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
/// 4. **Acyclic:** `set_references` refuses any edge set that closes a cycle.
#[derive(Debug, Clone)]
pub struct DepGraph {
    /// Arena: NodeId -> CellId
    nodes: Vec<CellId>,
    /// Interning table: CellId -> NodeId
    ids: FxHashMap<CellId, NodeId>,
    node_limit: usize,

    /// Precedents: for each formula cell B, the cells A it depends on.
    preds: FxHashMap<NodeId, FxHashSet<NodeId>>,

    /// Dependents: for each referenced cell A, the formula cells B that depend on it.
    succs: FxHashMap<NodeId, FxHashSet<NodeId>>,

    /// Range precedents: for each formula cell B, the ranges it reads.
    ranges: FxHashMap<NodeId, Vec<CellRange>>,
}

impl Default for DepGraph {
    fn default() -> Self {
        Self::with_node_limit(MAX_NODES)
    }
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph that interns at most `limit` cells.
    pub fn with_node_limit(limit: usize) -> Self {
        Self {
            nodes: Vec::new(),
            ids: FxHashMap::default(),
            node_limit: limit.min(MAX_NODES),
            preds: FxHashMap::default(),
            succs: FxHashMap::default(),
            ranges: FxHashMap::default(),
        }
    }

    fn intern(&mut self, cell: CellId) -> Option<NodeId> {
        if let Some(id) = self.ids.get(&cell) {
            return Some(*id);
        }
        if self.nodes.len() >= self.node_limit {
            return None;
        }
        let id = NodeId(u32::try_from(self.nodes.len()).ok()?);
        self.nodes.push(cell);
        self.ids.insert(cell, id);
        Some(id)
    }

    fn node(&self, cell: CellId) -> Option<NodeId> {
        self.ids.get(&cell).copied()
    }

    fn cell(&self, id: NodeId) -> CellId {
        self.nodes[id.index()]
    }

    fn is_formula_node(&self, id: NodeId) -> bool {
        self.preds.contains_key(&id) || self.ranges.contains_key(&id)
    }

    /// Cells behind a set of node ids, in canonical order.
    fn sorted_cells<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<CellId> {
        let mut cells: Vec<CellId> = ids.into_iter().map(|id| self.cell(*id)).collect();
        cells.sort_unstable();
        cells
    }

    /// Returns the single cells this formula cell depends on, in canonical
    /// order. Ranges are reported by `range_precedents`.
    pub fn precedents(&self, cell: CellId) -> Vec<CellId> {
        match self.node(cell).and_then(|id| self.preds.get(&id)) {
            Some(set) => self.sorted_cells(set),
            None => Vec::new(),
        }
    }

    /// Ranges this formula cell reads, sorted.
    pub fn range_precedents(&self, cell: CellId) -> &[CellRange] {
        self.node(cell)
            .and_then(|id| self.ranges.get(&id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Precedents of `cell` that are in `members`, through single-cell
    /// references or ranges, in canonical order.
    pub fn precedents_within(&self, cell: CellId, members: &FxHashSet<CellId>) -> Vec<CellId> {
        let Some(id) = self.node(cell) else {
            return Vec::new();
        };
        let mut found: FxHashSet<CellId> = self
            .preds
            .get(&id)
            .into_iter()
            .flatten()
            .map(|p| self.cell(*p))
            .filter(|p| members.contains(p))
            .collect();

        for range in self.ranges.get(&id).into_iter().flatten() {
            // Walk whichever side is smaller
            if range.area() <= members.len() as u64 {
                found.extend(range.cells().filter(|c| members.contains(c)));
            } else {
                found.extend(members.iter().copied().filter(|c| range.contains(*c)));
            }
        }

        let mut found: Vec<CellId> = found.into_iter().collect();
        found.sort_unstable();
        found
    }

    /// Formula cells that read `cell` directly or through a range.
    fn direct_dependents(&self, cell: CellId) -> FxHashSet<CellId> {
        let mut found: FxHashSet<CellId> = self
            .node(cell)
            .and_then(|id| self.succs.get(&id))
            .into_iter()
            .flatten()
            .map(|id| self.cell(*id))
            .collect();
        for (formula, ranges) in &self.ranges {
            if ranges.iter().any(|r| r.contains(cell)) {
                found.insert(self.cell(*formula));
            }
        }
        found
    }

    /// Returns the cells that directly depend on this cell (dependents),
    /// in canonical order.
    pub fn dependents(&self, cell: CellId) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self.direct_dependents(cell).into_iter().collect();
        cells.sort_unstable();
        cells
    }

    /// Returns true if this cell has formula dependencies tracked in the graph.
    pub fn is_formula_cell(&self, cell: CellId) -> bool {
        self.node(cell).is_some_and(|id| self.is_formula_node(id))
    }

    /// Returns the number of formula cells (cells with precedents) in the graph.
    pub fn formula_cell_count(&self) -> usize {
        self.preds.len() + self.ranges.keys().filter(|id| !self.preds.contains_key(id)).count()
    }

    /// Returns the number of cells referenced singly by at least one formula.
    pub fn referenced_cell_count(&self) -> usize {
        self.succs.len()
    }

    /// Number of cells ever interned.
    pub fn interned_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_limit(&self) -> usize {
        self.node_limit
    }

    /// True if `additional` more cells can still be interned.
    pub fn has_room_for(&self, additional: usize) -> bool {
        self.nodes.len().saturating_add(additional) <= self.node_limit
    }

    /// Cells not yet interned among a formula cell and its references.
    fn missing_nodes(&self, formula_cell: CellId, preds: &FxHashSet<CellId>) -> usize {
        let formula = usize::from(self.node(formula_cell).is_none() && !preds.contains(&formula_cell));
        formula + preds.iter().filter(|c| self.node(**c).is_none()).count()
    }

    /// Replace all precedents of `cell` with the references of its formula.
    ///
    /// Fails if the new edge set would make `cell` (transitively) depend on
    /// itself, or if the arena has no room for the new cells; the graph is
    /// unchanged in either case.
    pub fn set_references(&mut self, cell: CellId, refs: &FormulaRefs) -> Result<(), DependencyError> {
        if let Some(report) = self.would_create_cycle(cell, &refs.cells, &refs.ranges) {
            return Err(report.into());
        }
        self.replace_references(cell, refs.cells.iter().copied().collect(), refs.ranges.clone())
    }

    /// `set_references` for a formula with single-cell references only.
    pub fn set_dependencies(&mut self, cell: CellId, referenced: &[CellId]) -> Result<(), DependencyError> {
        let mut cells = referenced.to_vec();
        cells.sort_unstable();
        cells.dedup();
        self.set_references(cell, &FormulaRefs { cells, ranges: Vec::new() })
    }

    /// Replace all edges for a formula cell atomically.
    ///
    /// 1. Checks the arena has room for every cell not yet interned
    /// 2. Removes the cell's old single-cell and range edges
    /// 3. Adds the cell to all new precedents' successor sets
    /// 4. Stores the new precedent set and ranges
    ///
    /// No cycle check; callers go through `set_references`.
    pub(crate) fn replace_references(
        &mut self,
        formula_cell: CellId,
        new_preds: FxHashSet<CellId>,
        new_ranges: Vec<CellRange>,
    ) -> Result<(), DependencyError> {
        let capacity = DependencyError::Capacity { limit: self.node_limit };
        if !self.has_room_for(self.missing_nodes(formula_cell, &new_preds)) {
            return Err(capacity);
        }

        let formula_id = match (self.node(formula_cell), new_preds.is_empty() && new_ranges.is_empty()) {
            (Some(id), _) => id,
            // Never interned and nothing to add: no edges exist to remove
            (None, true) => return Ok(()),
            (None, false) => self.intern(formula_cell).ok_or(capacity.clone())?,
        };

        // Step 2: Remove old edges
        self.remove_edges(formula_id);

        if !new_ranges.is_empty() {
            self.ranges.insert(formula_id, new_ranges);
        }
        if new_preds.is_empty() {
            return Ok(());
        }

        // Step 3: Add new edges
        let mut pred_ids = FxHashSet::default();
        for pred in new_preds {
            let pred_id = self.intern(pred).ok_or(capacity.clone())?;
            self.succs.entry(pred_id).or_default().insert(formula_id);
            pred_ids.insert(pred_id);
        }

        // Step 4: Store new precedents
        self.preds.insert(formula_id, pred_ids);
        Ok(())
    }

    /// Single-cell edges only, no cycle check. Lets tests build graphs the
    /// public API refuses.
    #[cfg(test)]
    pub(crate) fn replace_edges(&mut self, formula_cell: CellId, new_preds: FxHashSet<CellId>) {
        self.replace_references(formula_cell, new_preds, Vec::new())
            .expect("test graph within node limit");
    }

    fn remove_edges(&mut self, formula_id: NodeId) {
        self.ranges.remove(&formula_id);
        if let Some(old_preds) = self.preds.remove(&formula_id) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(&formula_id);
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }
    }

    /// Clear all edges for a cell (formula removed or replaced by a literal).
    pub fn clear_cell(&mut self, cell: CellId) {
        if let Some(id) = self.node(cell) {
            self.remove_edges(id);
        }
    }

    /// Check whether making `cell` read `new_preds` and `new_ranges` would
    /// create a cycle.
    ///
    /// Breadth-first search from `cell` over dependent edges: reaching a cell
    /// the formula would read means that cell already (transitively) depends
    /// on `cell`. The report lists the shortest such path, starting at `cell`.
    pub fn would_create_cycle(
        &self,
        cell: CellId,
        new_preds: &[CellId],
        new_ranges: &[CellRange],
    ) -> Option<CycleReport> {
        let targets: FxHashSet<CellId> = new_preds.iter().copied().collect();
        let reads = |c: CellId| targets.contains(&c) || new_ranges.iter().any(|r| r.contains(c));

        if reads(cell) {
            return Some(CycleReport::self_reference(cell));
        }
        if targets.is_empty() && new_ranges.is_empty() {
            return None;
        }

        let mut parent: FxHashMap<CellId, CellId> = FxHashMap::default();
        let mut queue = VecDeque::from([cell]);
        let mut visited = FxHashSet::default();
        visited.insert(cell);

        while let Some(current) = queue.pop_front() {
            // Canonical neighbour order keeps the reported path deterministic
            for dep in self.dependents(current) {
                if !visited.insert(dep) {
                    continue;
                }
                parent.insert(dep, current);
                if reads(dep) {
                    let mut path = vec![dep];
                    let mut at = dep;
                    while let Some(&p) = parent.get(&at) {
                        path.push(p);
                        at = p;
                    }
                    path.reverse();
                    return Some(CycleReport::cycle(path));
                }
                queue.push_back(dep);
            }
        }

        None
    }

    /// All cells that transitively depend on `cell` (not including `cell`),
    /// in canonical order. This is the dirty frontier of an edit.
    pub fn dependents_of(&self, cell: CellId) -> Vec<CellId> {
        let mut closure = self.closure(&[cell]);
        closure.retain(|c| *c != cell);
        closure
    }

    /// Roots plus every transitive dependent, in canonical order.
    pub fn closure(&self, roots: &[CellId]) -> Vec<CellId> {
        let mut seen: FxHashSet<CellId> = roots.iter().copied().collect();
        let mut stack: Vec<CellId> = roots.to_vec();

        while let Some(current) = stack.pop() {
            for dep in self.direct_dependents(current) {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        let mut cells: Vec<CellId> = seen.into_iter().collect();
        cells.sort_unstable();
        cells
    }

    /// Topological order over exactly the given cells.
    ///
    /// Kahn's algorithm restricted to the subgraph induced by `cells`: only
    /// edges whose both ends are in the set count. Among cells that are ready
    /// at the same time, the smallest `CellId` goes first.
    ///
    /// Returns `Err(CycleReport)` listing the cells that could not be ordered.
    pub fn topo_order(&self, cells: &[CellId]) -> Result<Vec<CellId>, CycleReport> {
        let members: FxHashSet<CellId> = cells.iter().copied().collect();
        let mut in_degree: FxHashMap<CellId, usize> = FxHashMap::default();

        for &cell in &members {
            in_degree.insert(cell, self.precedents_within(cell, &members).len());
        }

        let mut ready: BinaryHeap<Reverse<CellId>> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| Reverse(cell))
            .collect();

        let mut result = Vec::with_capacity(members.len());

        while let Some(Reverse(cell)) = ready.pop() {
            result.push(cell);

            for dep in self.direct_dependents(cell) {
                if let Some(deg) = in_degree.get_mut(&dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push(Reverse(dep));
                    }
                }
            }
        }

        if result.len() < members.len() {
            let ordered: FxHashSet<CellId> = result.iter().copied().collect();
            let mut stuck: Vec<CellId> = members.difference(&ordered).copied().collect();
            stuck.sort_unstable();
            return Err(CycleReport::cycle(stuck));
        }

        Ok(result)
    }

    // =========================================================================
    // Cycle Membership (Tarjan's SCC)
    // =========================================================================

    /// Find all cells that are members of true cycles (SCC size > 1 or self-loop).
    ///
    /// Diagnostics only: `set_references` keeps the graph acyclic, so this is
    /// empty in a healthy workbook. Iterates nodes in canonical order for
    /// deterministic output.
    pub fn find_cycle_members(&self) -> FxHashSet<CellId> {
        if self.preds.is_empty() && self.ranges.is_empty() {
            return FxHashSet::default();
        }

        let mut formulas: Vec<NodeId> = self.preds.keys().chain(self.ranges.keys()).copied().collect();
        formulas.sort_unstable_by_key(|id| self.cell(*id));
        formulas.dedup();

        // Helper: sorted neighbours (formula cells read singly or through a range)
        let sorted_neighbours = |id: NodeId| -> Vec<NodeId> {
            let mut neighbours: FxHashSet<NodeId> = self
                .preds
                .get(&id)
                .into_iter()
                .flat_map(|s| s.iter().copied())
                .filter(|p| self.is_formula_node(*p))
                .collect();
            if let Some(ranges) = self.ranges.get(&id) {
                neighbours.extend(formulas.iter().copied().filter(|f| {
                    let at = self.cell(*f);
                    ranges.iter().any(|r| r.contains(at))
                }));
            }
            let mut neighbours: Vec<NodeId> = neighbours.into_iter().collect();
            neighbours.sort_unstable_by_key(|n| self.cell(*n));
            neighbours
        };

        // Iterative Tarjan's to avoid stack overflow on deep graphs.
        struct DfsFrame {
            node: NodeId,
            neighbours: Vec<NodeId>,
            next_idx: usize,
        }

        let mut index_counter: u32 = 0;
        let mut stack: Vec<NodeId> = Vec::new();
        let mut on_stack: FxHashSet<NodeId> = FxHashSet::default();
        let mut indices: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut lowlinks: FxHashMap<NodeId, u32> = FxHashMap::default();
        let mut result: FxHashSet<CellId> = FxHashSet::default();

        for &root in &formulas {
            if indices.contains_key(&root) {
                continue;
            }

            indices.insert(root, index_counter);
            lowlinks.insert(root, index_counter);
            index_counter += 1;
            stack.push(root);
            on_stack.insert(root);

            let mut dfs_stack = vec![DfsFrame {
                node: root,
                neighbours: sorted_neighbours(root),
                next_idx: 0,
            }];

            while let Some(frame) = dfs_stack.last_mut() {
                if frame.next_idx < frame.neighbours.len() {
                    let w = frame.neighbours[frame.next_idx];
                    frame.next_idx += 1;
                    let v = frame.node;

                    if !indices.contains_key(&w) {
                        indices.insert(w, index_counter);
                        lowlinks.insert(w, index_counter);
                        index_counter += 1;
                        stack.push(w);
                        on_stack.insert(w);

                        dfs_stack.push(DfsFrame {
                            node: w,
                            neighbours: sorted_neighbours(w),
                            next_idx: 0,
                        });
                    } else if on_stack.contains(&w) {
                        let w_idx = indices[&w];
                        if let Some(v_low) = lowlinks.get_mut(&v) {
                            *v_low = (*v_low).min(w_idx);
                        }
                    }
                    continue;
                }

                // All neighbours explored: pop and propagate lowlink
                let v = frame.node;
                dfs_stack.pop();
                let v_low = lowlinks[&v];

                if let Some(parent) = dfs_stack.last() {
                    if let Some(parent_low) = lowlinks.get_mut(&parent.node) {
                        *parent_low = (*parent_low).min(v_low);
                    }
                }

                // SCC root check
                if v_low == indices[&v] {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack.remove(&w);
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }

                    let self_loop = scc.len() == 1
                        && (self.preds.get(&v).is_some_and(|p| p.contains(&v))
                            || self.range_precedents(self.cell(v)).iter().any(|r| r.contains(self.cell(v))));
                    if scc.len() > 1 || self_loop {
                        result.extend(scc.into_iter().map(|id| self.cell(id)));
                    }
                }
            }
        }

        result
    }

    /// Verify all graph invariants. Panics on violation.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        assert_eq!(self.nodes.len(), self.ids.len(), "arena and interning table disagree");
        for (cell, id) in &self.ids {
            assert_eq!(self.nodes[id.index()], *cell, "interning table points at wrong node");
        }

        // Invariant 1: Bidirectional consistency (preds → succs)
        for (formula, preds) in &self.preds {
            for pred in preds {
                assert!(
                    self.succs.get(pred).is_some_and(|s| s.contains(formula)),
                    "Missing succ edge: {} should have {} in dependents",
                    self.cell(*pred),
                    self.cell(*formula)
                );
            }
        }

        // Invariant 1: Bidirectional consistency (succs → preds)
        for (cell, dependents) in &self.succs {
            for dep in dependents {
                assert!(
                    self.preds.get(dep).is_some_and(|s| s.contains(cell)),
                    "Missing pred edge: {} should have {} in precedents",
                    self.cell(*dep),
                    self.cell(*cell)
                );
            }
        }

        // Invariant 2: No empty sets stored
        assert!(self.preds.values().all(|s| !s.is_empty()), "Empty preds set stored");
        assert!(self.succs.values().all(|s| !s.is_empty()), "Empty succs set stored");
        assert!(self.ranges.values().all(|r| !r.is_empty()), "Empty range list stored");
        assert!(self.nodes.len() <= self.node_limit, "arena over its node limit");

        // Invariant 4: Acyclic
        assert!(self.find_cycle_members().is_empty(), "graph contains a cycle");
    }
}
