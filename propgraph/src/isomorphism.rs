// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backtracking (sub)graph isomorphism search over anything that can answer
//! adjacency queries.
//!
//! Both searches are exponential in the worst case. The callback is invoked
//! for every mapping found and ends the search by returning `false`.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Adjacency queries needed by the isomorphism search.
pub trait Adjacency {
    type Vertex: Copy + Ord + Debug;

    fn vertex_list(&self) -> Vec<Self::Vertex>;
    fn is_adjacent(&self, from: Self::Vertex, to: Self::Vertex) -> bool;
    /// Number of incident edges, ignoring edge direction.
    fn degree(&self, vertex: Self::Vertex) -> usize;
    fn is_directed(&self) -> bool;
}

/// A (partial) vertex mapping from the first graph into the second.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping<A: Ord, B: Ord> {
    /// Vertices of the first graph without an image.
    pub unmapped: usize,
    pub forward: BTreeMap<A, B>,
    pub backward: BTreeMap<B, A>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchSummary {
    /// Number of callback invocations.
    pub reported: usize,
    /// Whether the callback ended the search.
    pub stopped: bool,
}

struct Search<'a, G: Adjacency, H: Adjacency, F, C> {
    g: &'a G,
    h: &'a H,
    order: Vec<G::Vertex>,
    candidates: Vec<H::Vertex>,
    equivalent: F,
    callback: C,
    mapping: Mapping<G::Vertex, H::Vertex>,
    allow_unmapped: bool,
    best_unmapped: usize,
    summary: SearchSummary,
}

impl<'a, G, H, F, C> Search<'a, G, H, F, C>
where
    G: Adjacency,
    H: Adjacency,
    F: FnMut(G::Vertex, H::Vertex) -> bool,
    C: FnMut(&Mapping<G::Vertex, H::Vertex>) -> bool,
{
    fn new(g: &'a G, h: &'a H, equivalent: F, callback: C, allow_unmapped: bool) -> Self {
        let mut order = g.vertex_list();
        // most constrained first
        order.sort_by_key(|v| Reverse(g.degree(*v)));
        Self {
            g,
            h,
            order,
            candidates: h.vertex_list(),
            equivalent,
            callback,
            mapping: Mapping {
                unmapped: 0,
                forward: BTreeMap::new(),
                backward: BTreeMap::new(),
            },
            allow_unmapped,
            best_unmapped: usize::MAX,
            summary: SearchSummary::default(),
        }
    }

    fn feasible(&mut self, u: G::Vertex, c: H::Vertex) -> bool {
        if !self.allow_unmapped && self.g.degree(u) != self.h.degree(c) {
            return false;
        }
        if self.g.is_adjacent(u, u) != self.h.is_adjacent(c, c) {
            return false;
        }
        let directed = self.g.is_directed();
        let consistent = self.mapping.forward.iter().all(|(&u2, &c2)| {
            self.g.is_adjacent(u, u2) == self.h.is_adjacent(c, c2)
                && (!directed || self.g.is_adjacent(u2, u) == self.h.is_adjacent(c2, c))
        });
        consistent && (self.equivalent)(u, c)
    }

    fn lower_bound(&self, depth: usize) -> usize {
        let remaining_g = self.order.len() - depth;
        let remaining_h = self.candidates.len() - self.mapping.backward.len();
        self.mapping.unmapped + remaining_g.saturating_sub(remaining_h)
    }

    /// Returns whether to continue searching.
    fn search(&mut self, depth: usize) -> bool {
        if self.allow_unmapped && self.lower_bound(depth) > self.best_unmapped {
            return true;
        }
        if depth == self.order.len() {
            self.best_unmapped = self.mapping.unmapped;
            self.summary.reported += 1;
            if !(self.callback)(&self.mapping) {
                self.summary.stopped = true;
                return false;
            }
            return true;
        }
        let u = self.order[depth];
        for i in 0..self.candidates.len() {
            let c = self.candidates[i];
            if self.mapping.backward.contains_key(&c) || !self.feasible(u, c) {
                continue;
            }
            self.mapping.forward.insert(u, c);
            self.mapping.backward.insert(c, u);
            let proceed = self.search(depth + 1);
            self.mapping.forward.remove(&u);
            self.mapping.backward.remove(&c);
            if !proceed {
                return false;
            }
        }
        if self.allow_unmapped {
            self.mapping.unmapped += 1;
            let proceed = self.search(depth + 1);
            self.mapping.unmapped -= 1;
            return proceed;
        }
        true
    }
}

/// Enumerates complete isomorphisms from `g` onto `h`.
///
/// `equivalent` decides whether a vertex of `g` may be mapped onto a vertex
/// of `h`. Every reported mapping has `unmapped == 0`.
pub fn isomorphism<G, H, F, C>(g: &G, h: &H, equivalent: F, callback: C) -> SearchSummary
where
    G: Adjacency,
    H: Adjacency,
    F: FnMut(G::Vertex, H::Vertex) -> bool,
    C: FnMut(&Mapping<G::Vertex, H::Vertex>) -> bool,
{
    if g.is_directed() != h.is_directed() || g.vertex_list().len() != h.vertex_list().len() {
        return SearchSummary::default();
    }
    let mut search = Search::new(g, h, equivalent, callback, false);
    search.search(0);
    log::trace!("isomorphism search: {:?}", search.summary);
    search.summary
}

/// Enumerates mappings of induced subgraphs of `g` into `h`, leaving vertices
/// of `g` unmapped where no consistent image exists.
///
/// Mappings are reported in order of non-increasing `unmapped` count; a
/// mapping worse than the best one found so far is never reported.
pub fn isomorphism_subgraph<G, H, F, C>(g: &G, h: &H, equivalent: F, callback: C) -> SearchSummary
where
    G: Adjacency,
    H: Adjacency,
    F: FnMut(G::Vertex, H::Vertex) -> bool,
    C: FnMut(&Mapping<G::Vertex, H::Vertex>) -> bool,
{
    if g.is_directed() != h.is_directed() {
        return SearchSummary::default();
    }
    let mut search = Search::new(g, h, equivalent, callback, true);
    search.search(0);
    log::trace!(
        "subgraph isomorphism search: {:?}, best unmapped {}",
        search.summary,
        search.best_unmapped
    );
    search.summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropertyGraph, UndirectedPropertyGraph, VertexDescriptor};
    use std::collections::BTreeSet;

    fn cycle(n: usize, rotate: usize) -> (PropertyGraph<usize, ()>, Vec<VertexDescriptor>) {
        let mut graph = PropertyGraph::new();
        let mut vertices = vec![None; n];
        for k in 0..n {
            let i = (k + rotate) % n;
            vertices[i] = Some(graph.add_vertex(i));
        }
        let vertices = vertices.into_iter().flatten().collect::<Vec<_>>();
        for i in 0..n {
            graph.add_edge(vertices[i], vertices[(i + 1) % n], ()).unwrap();
        }
        (graph, vertices)
    }

    fn edge_set(
        graph: &PropertyGraph<usize, ()>,
    ) -> BTreeSet<(VertexDescriptor, VertexDescriptor)> {
        graph
            .edges()
            .map(|e| graph.edge_endpoints(e).unwrap())
            .collect()
    }

    #[test]
    fn directed_cycle_automorphisms() {
        let (g, _) = cycle(4, 0);
        let (h, _) = cycle(4, 2);
        let h_edges = edge_set(&h);
        let summary = isomorphism(
            &g,
            &h,
            |_, _| true,
            |mapping| {
                assert_eq!(mapping.unmapped, 0);
                let mapped = edge_set(&g)
                    .into_iter()
                    .map(|(a, b)| (mapping.forward[&a], mapping.forward[&b]))
                    .collect::<BTreeSet<_>>();
                assert_eq!(mapped, h_edges);
                true
            },
        );
        // rotations only, direction rules out reflections
        assert_eq!(summary.reported, 4);
        assert!(!summary.stopped);
    }

    #[test]
    fn equivalence_predicate_restricts() {
        let (g, _) = cycle(4, 0);
        let (h, _) = cycle(4, 1);
        let summary = isomorphism(
            &g,
            &h,
            |a, b| g.vertex(a).unwrap() == h.vertex(b).unwrap(),
            |mapping| {
                for (a, b) in &mapping.forward {
                    assert_eq!(g.vertex(*a), h.vertex(*b));
                }
                true
            },
        );
        assert_eq!(summary.reported, 1);
    }

    #[test]
    fn early_termination() {
        let mut g = UndirectedPropertyGraph::<(), ()>::new();
        let v = (0..3).map(|_| g.add_vertex(())).collect::<Vec<_>>();
        g.add_edge(v[0], v[1], ()).unwrap();
        g.add_edge(v[1], v[2], ()).unwrap();
        g.add_edge(v[2], v[0], ()).unwrap();
        let all = isomorphism(&g, &g, |_, _| true, |_| true);
        assert_eq!(all.reported, 6);
        let mut calls = 0;
        let first = isomorphism(
            &g,
            &g,
            |_, _| true,
            |_| {
                calls += 1;
                false
            },
        );
        assert_eq!(calls, 1);
        assert_eq!(first.reported, 1);
        assert!(first.stopped);
    }

    #[test]
    fn subgraph_reports_unmapped() {
        let _logger = env_logger::builder().is_test(true).try_init();
        // path a - b - c is not an induced subgraph of a triangle
        let mut path = UndirectedPropertyGraph::<(), ()>::new();
        let p = (0..3).map(|_| path.add_vertex(())).collect::<Vec<_>>();
        path.add_edge(p[0], p[1], ()).unwrap();
        path.add_edge(p[1], p[2], ()).unwrap();
        let mut triangle = UndirectedPropertyGraph::<(), ()>::new();
        let t = (0..3).map(|_| triangle.add_vertex(())).collect::<Vec<_>>();
        triangle.add_edge(t[0], t[1], ()).unwrap();
        triangle.add_edge(t[1], t[2], ()).unwrap();
        triangle.add_edge(t[2], t[0], ()).unwrap();

        assert_eq!(isomorphism(&path, &triangle, |_, _| true, |_| true).reported, 0);

        let mut best = usize::MAX;
        let summary = isomorphism_subgraph(
            &path,
            &triangle,
            |_, _| true,
            |mapping| {
                assert!(mapping.unmapped <= best);
                best = mapping.unmapped;
                assert_eq!(mapping.forward.len() + mapping.unmapped, 3);
                true
            },
        );
        assert!(summary.reported > 0);
        assert_eq!(best, 1);
    }

    #[test]
    fn subgraph_of_larger_graph() {
        let (small, _) = cycle(3, 0);
        let mut large = PropertyGraph::<usize, ()>::new();
        let v = (0..5).map(|i| large.add_vertex(i)).collect::<Vec<_>>();
        large.add_edge(v[0], v[1], ()).unwrap();
        large.add_edge(v[1], v[2], ()).unwrap();
        large.add_edge(v[2], v[0], ()).unwrap();
        large.add_edge(v[2], v[3], ()).unwrap();
        large.add_edge(v[3], v[4], ()).unwrap();
        let mut complete = 0;
        isomorphism_subgraph(
            &small,
            &large,
            |_, _| true,
            |mapping| {
                if mapping.unmapped == 0 {
                    complete += 1;
                }
                true
            },
        );
        assert_eq!(complete, 3);
    }
}
