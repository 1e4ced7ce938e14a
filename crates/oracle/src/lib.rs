//! # The Oracle: GC Root Reachability
//!
//! Answers "why is this object still alive?" by walking the object-reference
//! graph from every GC root until the target address turns up.
//!
//! The graph is never materialized: edges are pulled from the
//! [`HeapProvider`] as each object is entered. Each root gets a fresh visited
//! set and path stack, so two roots reaching the target through the same
//! objects are both reported.

pub mod path;

pub use path::{render_paths, PathStep, SearchPath};

use common::{HeapAddress, HeapProvider, ObjectHandle, RootEntry, RootKind};
use rayon::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Depth-first reference path finder over a heap provider.
pub struct ReferencePathFinder<'h, H: ?Sized> {
    heap: &'h H,
}

impl<H: ?Sized> Clone for ReferencePathFinder<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for ReferencePathFinder<'_, H> {}

/// One object on the DFS path stack, with its not-yet-examined edges.
struct Frame {
    step: PathStep,
    edges: std::vec::IntoIter<HeapAddress>,
}

impl<'h, H: HeapProvider + ?Sized> ReferencePathFinder<'h, H> {
    pub fn new(heap: &'h H) -> Self {
        Self { heap }
    }

    /// Lazily yields one [`SearchPath`] per (root, referencing slot) that reaches `target`.
    ///
    /// Roots are searched one at a time as the iterator is pulled; dropping the
    /// iterator abandons the remaining roots.
    ///
    /// The sequence is empty if the target's type cannot be resolved, if no root
    /// reaches it, or for roots whose object is the target itself.
    pub fn find_paths(&self, target: HeapAddress) -> Paths<'h, H> {
        let target = self.target_step(target);
        let roots = if target.is_some() {
            self.heap.roots()
        } else {
            Vec::new()
        };
        Paths {
            finder: *self,
            target,
            roots: roots.into_iter(),
            pending: VecDeque::new(),
            cancel: None,
        }
    }

    /// Runs every root's search on the rayon pool.
    ///
    /// Each worker owns its visited set and path stack. Results come back in
    /// root order, identical to collecting [`find_paths`](Self::find_paths).
    pub fn par_find_paths(&self, target: HeapAddress) -> Vec<SearchPath>
    where
        H: Sync,
    {
        let Some(target) = self.target_step(target) else {
            return Vec::new();
        };
        let roots = self.heap.roots();
        let per_root: Vec<Vec<SearchPath>> = roots
            .par_iter()
            .map(|root| self.search(root, &target, None))
            .collect();
        per_root.into_iter().flatten().collect()
    }

    /// Searches a single root for `target`.
    pub fn search_root(&self, root: &RootEntry, target: HeapAddress) -> Vec<SearchPath> {
        match self.target_step(target) {
            Some(target) => self.search(root, &target, None),
            None => Vec::new(),
        }
    }

    fn target_step(&self, target: HeapAddress) -> Option<PathStep> {
        match self.heap.resolve(target) {
            Ok(object) => Some(PathStep::from(object)),
            Err(e) => {
                tracing::debug!(error = %e, "nothing to report");
                None
            }
        }
    }

    fn enter(&self, object: ObjectHandle) -> Frame {
        let edges = self.heap.references(&object).into_iter();
        Frame {
            step: PathStep::from(object),
            edges,
        }
    }

    /// Iterative DFS from one root.
    ///
    /// Invariant: `stack` holds the current root-to-object path; every address
    /// on it is in `visited`. The target is never entered, so it is reported
    /// once per referencing slot encountered.
    fn search(
        &self,
        root: &RootEntry,
        target: &PathStep,
        cancel: Option<&AtomicBool>,
    ) -> Vec<SearchPath> {
        let mut found = Vec::new();
        if root.object.address == target.address {
            tracing::debug!(root = %root.object.address, "target is itself a root; skipping");
            return found;
        }

        let mut visited: HashSet<HeapAddress> = HashSet::new();
        visited.insert(root.object.address);
        let mut stack = vec![self.enter(root.object.clone())];

        loop {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                tracing::debug!(root = %root.object.address, "search cancelled");
                return Vec::new();
            }

            let next = match stack.last_mut() {
                Some(frame) => frame.edges.next(),
                None => break,
            };

            let Some(next) = next else {
                stack.pop();
                continue;
            };

            if next == target.address {
                found.push(record_path(root.kind, &stack, target));
                continue;
            }

            if !visited.insert(next) {
                continue;
            }

            match self.heap.resolve(next) {
                Ok(object) => stack.push(self.enter(object)),
                Err(e) => tracing::trace!(error = %e, "dead end"),
            }
        }

        tracing::debug!(
            root = %root.object.address,
            kind = ?root.kind,
            visited = visited.len(),
            paths = found.len(),
            "root search complete"
        );
        found
    }
}

fn record_path(root_kind: RootKind, stack: &[Frame], target: &PathStep) -> SearchPath {
    let mut steps: Vec<PathStep> = stack.iter().map(|f| f.step.clone()).collect();
    steps.push(target.clone());
    SearchPath { root_kind, steps }
}

/// Lazy sequence of paths produced by [`ReferencePathFinder::find_paths`].
pub struct Paths<'h, H: ?Sized> {
    finder: ReferencePathFinder<'h, H>,
    target: Option<PathStep>,
    roots: std::vec::IntoIter<RootEntry>,
    pending: VecDeque<SearchPath>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<H: ?Sized> Paths<'_, H> {
    /// Aborts the search once `flag` is set. Paths already yielded stay valid;
    /// the root being searched when the flag flips contributes nothing.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

impl<H: HeapProvider + ?Sized> Iterator for Paths<'_, H> {
    type Item = SearchPath;

    fn next(&mut self) -> Option<SearchPath> {
        loop {
            if self.cancelled() {
                return None;
            }
            if let Some(path) = self.pending.pop_front() {
                return Some(path);
            }
            let target = self.target.as_ref()?;
            let root = self.roots.next()?;
            let found = self
                .finder
                .search(&root, target, self.cancel.as_deref());
            self.pending.extend(found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FieldValue;
    use petgraph::graph::{DiGraph, NodeIndex};
    use petgraph::Direction;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Synthetic heap: node weight = (address, declared type or `None`).
    struct GraphHeap {
        graph: DiGraph<(u64, Option<&'static str>), ()>,
        nodes: HashMap<u64, NodeIndex>,
        roots: Vec<u64>,
    }

    impl GraphHeap {
        fn new() -> Self {
            Self {
                graph: DiGraph::new(),
                nodes: HashMap::new(),
                roots: Vec::new(),
            }
        }

        fn object(&mut self, address: u64, type_name: &'static str) -> &mut Self {
            let idx = self.graph.add_node((address, Some(type_name)));
            self.nodes.insert(address, idx);
            self
        }

        fn untyped(&mut self, address: u64) -> &mut Self {
            let idx = self.graph.add_node((address, None));
            self.nodes.insert(address, idx);
            self
        }

        fn edge(&mut self, from: u64, to: u64) -> &mut Self {
            self.graph.add_edge(self.nodes[&from], self.nodes[&to], ());
            self
        }

        fn root(&mut self, address: u64) -> &mut Self {
            self.roots.push(address);
            self
        }
    }

    impl HeapProvider for GraphHeap {
        fn objects(&self) -> Box<dyn Iterator<Item = ObjectHandle> + '_> {
            Box::new(self.graph.node_weights().filter_map(|&(address, ty)| {
                ty.map(|t| ObjectHandle::new(HeapAddress(address), t))
            }))
        }

        fn read_field(&self, _object: &ObjectHandle, _field: &str) -> Option<FieldValue> {
            None
        }

        fn roots(&self) -> Vec<RootEntry> {
            self.roots
                .iter()
                .filter_map(|&a| self.handle(HeapAddress(a)))
                .map(|object| RootEntry {
                    object,
                    kind: RootKind::Stack,
                })
                .collect()
        }

        fn references(&self, object: &ObjectHandle) -> Vec<HeapAddress> {
            let Some(&idx) = self.nodes.get(&object.address.get()) else {
                return Vec::new();
            };
            let mut refs: Vec<HeapAddress> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|n| HeapAddress(self.graph[n].0))
                .collect();
            // petgraph walks adjacency lists newest-first; restore insertion order.
            refs.reverse();
            refs
        }

        fn resolve_type(&self, address: HeapAddress) -> Option<String> {
            let idx = self.nodes.get(&address.get())?;
            self.graph[*idx].1.map(str::to_string)
        }
    }

    /// Counts how many objects had their edges pulled.
    struct CountingHeap<'a> {
        inner: &'a GraphHeap,
        expanded: Cell<usize>,
    }

    impl HeapProvider for CountingHeap<'_> {
        fn objects(&self) -> Box<dyn Iterator<Item = ObjectHandle> + '_> {
            self.inner.objects()
        }

        fn read_field(&self, object: &ObjectHandle, field: &str) -> Option<FieldValue> {
            self.inner.read_field(object, field)
        }

        fn roots(&self) -> Vec<RootEntry> {
            self.inner.roots()
        }

        fn references(&self, object: &ObjectHandle) -> Vec<HeapAddress> {
            self.expanded.set(self.expanded.get() + 1);
            self.inner.references(object)
        }

        fn resolve_type(&self, address: HeapAddress) -> Option<String> {
            self.inner.resolve_type(address)
        }
    }

    const T_ADDR: u64 = 900;

    fn chains(heap: &GraphHeap, target: u64) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = ReferencePathFinder::new(heap)
            .find_paths(HeapAddress(target))
            .map(|p| p.type_names().map(str::to_string).collect())
            .collect();
        out.sort();
        out
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_simple_chain() {
        let mut heap = GraphHeap::new();
        heap.object(1, "App.Root")
            .object(2, "App.Holder")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, T_ADDR)
            .root(1);

        assert_eq!(
            chains(&heap, T_ADDR),
            vec![names(&["App.Root", "App.Holder", "Task"])]
        );
    }

    #[test]
    fn test_cycle_through_target_reports_once() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "Parent")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, T_ADDR)
            .edge(T_ADDR, 2)
            .edge(2, 1)
            .root(1);

        assert_eq!(chains(&heap, T_ADDR), vec![names(&["Root", "Parent", "Task"])]);
    }

    #[test]
    fn test_cycle_away_from_target_terminates() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "A")
            .object(3, "B")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, 3)
            .edge(3, 2)
            .edge(3, 1)
            .root(1);

        assert!(chains(&heap, T_ADDR).is_empty());
    }

    #[test]
    fn test_unreachable_target() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "A")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(T_ADDR, 2)
            .root(1);

        assert!(chains(&heap, T_ADDR).is_empty());
    }

    #[test]
    fn test_two_fields_referencing_target() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "Continuation")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, T_ADDR)
            .edge(2, T_ADDR)
            .root(1);

        let found = chains(&heap, T_ADDR);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], names(&["Root", "Continuation", "Task"]));
        assert_eq!(found[0], found[1]);
    }

    #[test]
    fn test_two_roots_both_reported() {
        let mut heap = GraphHeap::new();
        heap.object(1, "RootA")
            .object(2, "RootB")
            .object(3, "ViaA")
            .object(4, "ViaB")
            .object(T_ADDR, "Task")
            .edge(1, 3)
            .edge(3, T_ADDR)
            .edge(2, 4)
            .edge(4, T_ADDR)
            .root(1)
            .root(2);

        assert_eq!(
            chains(&heap, T_ADDR),
            vec![
                names(&["RootA", "ViaA", "Task"]),
                names(&["RootB", "ViaB", "Task"]),
            ]
        );
    }

    #[test]
    fn test_shared_intermediate_not_deduplicated_across_roots() {
        let mut heap = GraphHeap::new();
        heap.object(1, "RootA")
            .object(2, "RootB")
            .object(3, "Shared")
            .object(T_ADDR, "Task")
            .edge(1, 3)
            .edge(2, 3)
            .edge(3, T_ADDR)
            .root(1)
            .root(2);

        assert_eq!(
            chains(&heap, T_ADDR),
            vec![
                names(&["RootA", "Shared", "Task"]),
                names(&["RootB", "Shared", "Task"]),
            ]
        );
    }

    #[test]
    fn test_diamond_within_one_root_reports_once() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "Left")
            .object(3, "Right")
            .object(4, "Join")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(1, 3)
            .edge(2, 4)
            .edge(3, 4)
            .edge(4, T_ADDR)
            .root(1);

        assert_eq!(
            chains(&heap, T_ADDR),
            vec![names(&["Root", "Left", "Join", "Task"])]
        );
    }

    #[test]
    fn test_target_is_root() {
        let mut heap = GraphHeap::new();
        heap.object(T_ADDR, "Task")
            .object(2, "Self")
            .edge(T_ADDR, 2)
            .edge(2, T_ADDR)
            .root(T_ADDR);

        assert!(chains(&heap, T_ADDR).is_empty());
    }

    #[test]
    fn test_target_root_skipped_other_roots_still_searched() {
        let mut heap = GraphHeap::new();
        heap.object(T_ADDR, "Task")
            .object(1, "Root")
            .edge(1, T_ADDR)
            .root(T_ADDR)
            .root(1);

        assert_eq!(chains(&heap, T_ADDR), vec![names(&["Root", "Task"])]);
    }

    #[test]
    fn test_untyped_object_is_dead_end() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .untyped(2)
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, T_ADDR)
            .root(1);

        assert!(chains(&heap, T_ADDR).is_empty());

        heap.edge(1, T_ADDR);
        assert_eq!(chains(&heap, T_ADDR), vec![names(&["Root", "Task"])]);
    }

    #[test]
    fn test_unresolved_target() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root").untyped(T_ADDR).edge(1, T_ADDR).root(1);
        assert!(chains(&heap, T_ADDR).is_empty());
        assert!(chains(&heap, 12345).is_empty());
    }

    #[test]
    fn test_find_paths_is_lazy() {
        let mut heap = GraphHeap::new();
        heap.object(T_ADDR, "Task");
        for root in 1..=50u64 {
            heap.object(root, "Root").edge(root, T_ADDR).root(root);
        }

        let counting = CountingHeap {
            inner: &heap,
            expanded: Cell::new(0),
        };
        let finder = ReferencePathFinder::new(&counting);
        let mut paths = finder.find_paths(HeapAddress(T_ADDR));
        assert_eq!(counting.expanded.get(), 0);

        let first = paths.next().unwrap();
        assert_eq!(first.root().map(|s| s.address), Some(HeapAddress(1)));
        assert_eq!(counting.expanded.get(), 1);

        assert!(paths.next().is_some());
        assert_eq!(counting.expanded.get(), 2);

        assert_eq!(paths.count(), 48);
        assert_eq!(counting.expanded.get(), 50);
    }

    #[test]
    fn test_cancel_stops_iteration() {
        let mut heap = GraphHeap::new();
        heap.object(T_ADDR, "Task");
        for root in 1..=5u64 {
            heap.object(root, "Root").edge(root, T_ADDR).root(root);
        }

        let flag = Arc::new(AtomicBool::new(false));
        let mut paths = ReferencePathFinder::new(&heap)
            .find_paths(HeapAddress(T_ADDR))
            .with_cancel(flag.clone());
        assert!(paths.next().is_some());
        flag.store(true, Ordering::Relaxed);
        assert!(paths.next().is_none());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut heap = GraphHeap::new();
        heap.object(T_ADDR, "Task").object(500, "Shared").edge(500, T_ADDR);
        for root in 1..=20u64 {
            heap.object(root, "Root").root(root);
            if root % 2 == 0 {
                heap.edge(root, 500);
            } else {
                heap.edge(root, T_ADDR).edge(root, T_ADDR);
            }
        }

        let finder = ReferencePathFinder::new(&heap);
        let sequential: Vec<SearchPath> = finder.find_paths(HeapAddress(T_ADDR)).collect();
        let parallel = finder.par_find_paths(HeapAddress(T_ADDR));
        assert_eq!(sequential.len(), 30);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_search_root_records_addresses() {
        let mut heap = GraphHeap::new();
        heap.object(1, "Root")
            .object(2, "Holder")
            .object(T_ADDR, "Task")
            .edge(1, 2)
            .edge(2, T_ADDR)
            .root(1);

        let roots = heap.roots();
        let paths = ReferencePathFinder::new(&heap).search_root(&roots[0], HeapAddress(T_ADDR));
        assert_eq!(paths.len(), 1);
        let addresses: Vec<u64> = paths[0].steps.iter().map(|s| s.address.get()).collect();
        assert_eq!(addresses, vec![1, 2, T_ADDR]);
        assert_eq!(paths[0].root_kind, RootKind::Stack);
        assert_eq!(
            paths[0].target().map(|s| s.address),
            Some(HeapAddress(T_ADDR))
        );
    }
}
