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

use petgraph::prelude::*;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::EdgeType;
use std::collections::BTreeMap;
use std::fmt;

use crate::descriptor::{next_graph_id, GraphId};
use crate::isomorphism::{isomorphism, Adjacency};
use crate::{EdgeDescriptor, GraphError, VertexDescriptor};

/// A graph with a property attached to every vertex and every edge.
///
/// Descriptors stay valid until their element is removed, independent of
/// what else is added or removed. There is at most one edge per (source,
/// target) pair. Cloning yields a graph with a new ID, hence descriptors of
/// the original are rejected by the clone and vice versa.
pub struct PropertyGraph<V, E, Ty: EdgeType = Directed> {
    id: GraphId,
    topology: StableGraph<V, E, Ty, u32>,
    vertex_generations: Vec<u32>,
    edge_generations: Vec<u32>,
}

pub type UndirectedPropertyGraph<V, E> = PropertyGraph<V, E, Undirected>;

impl<V, E, Ty: EdgeType> PropertyGraph<V, E, Ty> {
    pub fn new() -> Self {
        Self {
            id: next_graph_id(),
            topology: StableGraph::default(),
            vertex_generations: Vec::new(),
            edge_generations: Vec::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn is_directed(&self) -> bool {
        self.topology.is_directed()
    }

    pub fn vertex_count(&self) -> usize {
        self.topology.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.topology.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.topology.node_count() == 0
    }

    fn vertex_descriptor(&self, index: NodeIndex<u32>) -> VertexDescriptor {
        VertexDescriptor {
            graph: self.id,
            index: index.index() as u32,
            generation: self.vertex_generations[index.index()],
        }
    }

    fn edge_descriptor(&self, index: EdgeIndex<u32>) -> EdgeDescriptor {
        EdgeDescriptor {
            graph: self.id,
            index: index.index() as u32,
            generation: self.edge_generations[index.index()],
        }
    }

    fn node_index(&self, vertex: VertexDescriptor) -> Result<NodeIndex<u32>, GraphError> {
        let index = NodeIndex::new(vertex.index());
        if vertex.graph == self.id
            && self.topology.contains_node(index)
            && self.vertex_generations[vertex.index()] == vertex.generation
        {
            Ok(index)
        } else {
            Err(GraphError::NotFound)
        }
    }

    fn edge_index(&self, edge: EdgeDescriptor) -> Result<EdgeIndex<u32>, GraphError> {
        let index = EdgeIndex::new(edge.index());
        if edge.graph == self.id
            && self.topology.edge_weight(index).is_some()
            && self.edge_generations[edge.index()] == edge.generation
        {
            Ok(index)
        } else {
            Err(GraphError::NotFound)
        }
    }

    pub fn contains_vertex(&self, vertex: VertexDescriptor) -> bool {
        self.node_index(vertex).is_ok()
    }

    pub fn contains_edge(&self, edge: EdgeDescriptor) -> bool {
        self.edge_index(edge).is_ok()
    }

    pub fn add_vertex(&mut self, property: V) -> VertexDescriptor {
        let index = self.topology.add_node(property);
        if index.index() >= self.vertex_generations.len() {
            self.vertex_generations.resize(index.index() + 1, 0);
        }
        self.vertex_descriptor(index)
    }

    /// Adds an edge between two existing vertices. A second edge between the
    /// same pair is rejected with `InvalidTopology`.
    pub fn add_edge(
        &mut self,
        source: VertexDescriptor,
        target: VertexDescriptor,
        property: E,
    ) -> Result<EdgeDescriptor, GraphError> {
        let a = self.node_index(source)?;
        let b = self.node_index(target)?;
        if self.topology.find_edge(a, b).is_some() {
            return Err(GraphError::InvalidTopology);
        }
        let index = self.topology.add_edge(a, b, property);
        if index.index() >= self.edge_generations.len() {
            self.edge_generations.resize(index.index() + 1, 0);
        }
        Ok(self.edge_descriptor(index))
    }

    pub fn remove_vertex(&mut self, vertex: VertexDescriptor) -> Result<V, GraphError> {
        let index = self.node_index(vertex)?;
        if self.topology.neighbors_undirected(index).next().is_some() {
            return Err(GraphError::HasDependentEdges);
        }
        let property = self
            .topology
            .remove_node(index)
            .ok_or(GraphError::NotFound)?;
        self.vertex_generations[index.index()] += 1;
        Ok(property)
    }

    pub fn remove_edge(&mut self, edge: EdgeDescriptor) -> Result<E, GraphError> {
        let index = self.edge_index(edge)?;
        let property = self
            .topology
            .remove_edge(index)
            .ok_or(GraphError::NotFound)?;
        self.edge_generations[index.index()] += 1;
        Ok(property)
    }

    pub fn vertex(&self, vertex: VertexDescriptor) -> Result<&V, GraphError> {
        let index = self.node_index(vertex)?;
        self.topology.node_weight(index).ok_or(GraphError::NotFound)
    }

    pub fn vertex_mut(&mut self, vertex: VertexDescriptor) -> Result<&mut V, GraphError> {
        let index = self.node_index(vertex)?;
        self.topology
            .node_weight_mut(index)
            .ok_or(GraphError::NotFound)
    }

    /// Replaces the property of `vertex`, returning the previous one.
    pub fn set_vertex(&mut self, vertex: VertexDescriptor, property: V) -> Result<V, GraphError> {
        Ok(std::mem::replace(self.vertex_mut(vertex)?, property))
    }

    pub fn edge(&self, edge: EdgeDescriptor) -> Result<&E, GraphError> {
        let index = self.edge_index(edge)?;
        self.topology.edge_weight(index).ok_or(GraphError::NotFound)
    }

    pub fn edge_mut(&mut self, edge: EdgeDescriptor) -> Result<&mut E, GraphError> {
        let index = self.edge_index(edge)?;
        self.topology
            .edge_weight_mut(index)
            .ok_or(GraphError::NotFound)
    }

    pub fn set_edge(&mut self, edge: EdgeDescriptor, property: E) -> Result<E, GraphError> {
        Ok(std::mem::replace(self.edge_mut(edge)?, property))
    }

    pub fn edge_endpoints(
        &self,
        edge: EdgeDescriptor,
    ) -> Result<(VertexDescriptor, VertexDescriptor), GraphError> {
        let index = self.edge_index(edge)?;
        let (a, b) = self
            .topology
            .edge_endpoints(index)
            .ok_or(GraphError::NotFound)?;
        Ok((self.vertex_descriptor(a), self.vertex_descriptor(b)))
    }

    pub fn find_edge(
        &self,
        source: VertexDescriptor,
        target: VertexDescriptor,
    ) -> Option<EdgeDescriptor> {
        let a = self.node_index(source).ok()?;
        let b = self.node_index(target).ok()?;
        self.topology
            .find_edge(a, b)
            .map(|index| self.edge_descriptor(index))
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertexDescriptor> + '_ {
        self.topology
            .node_indices()
            .map(move |index| self.vertex_descriptor(index))
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeDescriptor> + '_ {
        self.topology
            .edge_indices()
            .map(move |index| self.edge_descriptor(index))
    }

    fn edges_directed(
        &self,
        vertex: VertexDescriptor,
        direction: Direction,
    ) -> Result<impl Iterator<Item = EdgeDescriptor> + '_, GraphError> {
        let index = self.node_index(vertex)?;
        Ok(self
            .topology
            .edges_directed(index, direction)
            .map(move |edge| self.edge_descriptor(edge.id())))
    }

    /// Edges leaving `vertex`. For undirected graphs, all incident edges.
    pub fn out_edges(
        &self,
        vertex: VertexDescriptor,
    ) -> Result<impl Iterator<Item = EdgeDescriptor> + '_, GraphError> {
        self.edges_directed(vertex, Direction::Outgoing)
    }

    /// Edges entering `vertex`. For undirected graphs, all incident edges.
    pub fn in_edges(
        &self,
        vertex: VertexDescriptor,
    ) -> Result<impl Iterator<Item = EdgeDescriptor> + '_, GraphError> {
        self.edges_directed(vertex, Direction::Incoming)
    }

    /// Vertices reachable from `vertex` over one edge.
    pub fn adjacent_vertices(
        &self,
        vertex: VertexDescriptor,
    ) -> Result<impl Iterator<Item = VertexDescriptor> + '_, GraphError> {
        let index = self.node_index(vertex)?;
        Ok(self
            .topology
            .neighbors(index)
            .map(move |other| self.vertex_descriptor(other)))
    }

    /// Vertices with an edge towards `vertex`.
    pub fn inv_adjacent_vertices(
        &self,
        vertex: VertexDescriptor,
    ) -> Result<impl Iterator<Item = VertexDescriptor> + '_, GraphError> {
        let index = self.node_index(vertex)?;
        Ok(self
            .topology
            .neighbors_directed(index, Direction::Incoming)
            .map(move |other| self.vertex_descriptor(other)))
    }

    pub fn in_degree(&self, vertex: VertexDescriptor) -> Result<usize, GraphError> {
        Ok(self.in_edges(vertex)?.count())
    }

    pub fn out_degree(&self, vertex: VertexDescriptor) -> Result<usize, GraphError> {
        Ok(self.out_edges(vertex)?.count())
    }

    /// Maps every vertex to the ID of its strongly connected component. IDs
    /// are dense, starting at 0.
    pub fn strong_components(&self) -> BTreeMap<VertexDescriptor, usize> {
        petgraph::algo::tarjan_scc(&self.topology)
            .into_iter()
            .enumerate()
            .flat_map(|(component, members)| {
                members
                    .into_iter()
                    .map(move |index| (index, component))
            })
            .map(|(index, component)| (self.vertex_descriptor(index), component))
            .collect()
    }

    /// Relocates `vertex` by replacing its property and its incoming edges.
    ///
    /// The vertex keeps its descriptor and its outgoing edges. For undirected
    /// graphs, the replaced edges are those added with `vertex` as target;
    /// an input that is already connected through another edge is rejected.
    pub fn relocate_vertex(
        &mut self,
        vertex: VertexDescriptor,
        property: V,
        inputs: Vec<(VertexDescriptor, E)>,
    ) -> Result<(), GraphError> {
        let index = self.node_index(vertex)?;
        let mut sources = Vec::with_capacity(inputs.len());
        for (source, _) in &inputs {
            sources.push(self.node_index(*source)?);
        }
        let stale = self
            .topology
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.id())
            .filter(|edge| {
                self.topology
                    .edge_endpoints(*edge)
                    .map_or(false, |(_, target)| target == index)
            })
            .collect::<Vec<_>>();
        for source in &sources {
            if let Some(existing) = self.topology.find_edge(*source, index) {
                if !stale.contains(&existing) {
                    return Err(GraphError::InvalidTopology);
                }
            }
        }
        sources.sort();
        sources.dedup();
        if sources.len() != inputs.len() {
            return Err(GraphError::InvalidTopology);
        }
        for edge in stale {
            let edge = self.edge_descriptor(edge);
            self.remove_edge(edge)?;
        }
        self.set_vertex(vertex, property)?;
        for (source, edge) in inputs {
            self.add_edge(source, vertex, edge)?;
        }
        Ok(())
    }
}

impl<V: PartialEq, E: PartialEq, Ty: EdgeType> PropertyGraph<V, E, Ty> {
    /// Whether both graphs are equal up to the numbering of their descriptors.
    pub fn equal_except_descriptors(&self, other: &Self) -> bool {
        if self.vertex_count() != other.vertex_count() || self.edge_count() != other.edge_count() {
            return false;
        }
        let mut found = false;
        isomorphism(
            self,
            other,
            |a, b| match (self.vertex(a), other.vertex(b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
            |mapping| {
                found = self.edges().all(|edge| {
                    let (a, b) = match self.edge_endpoints(edge) {
                        Ok(endpoints) => endpoints,
                        Err(_) => return false,
                    };
                    let mapped = other.find_edge(mapping.forward[&a], mapping.forward[&b]);
                    match (mapped, self.edge(edge)) {
                        (Some(mapped), Ok(property)) => other.edge(mapped) == Ok(property),
                        _ => false,
                    }
                });
                !found
            },
        );
        found
    }
}

impl<V, E, Ty: EdgeType> Adjacency for PropertyGraph<V, E, Ty> {
    type Vertex = VertexDescriptor;

    fn vertex_list(&self) -> Vec<VertexDescriptor> {
        self.vertices().collect()
    }

    fn is_adjacent(&self, from: VertexDescriptor, to: VertexDescriptor) -> bool {
        self.find_edge(from, to).is_some()
    }

    fn degree(&self, vertex: VertexDescriptor) -> usize {
        match self.node_index(vertex) {
            Ok(index) => self.topology.neighbors_undirected(index).count(),
            Err(_) => 0,
        }
    }

    fn is_directed(&self) -> bool {
        self.topology.is_directed()
    }
}

impl<V, E, Ty: EdgeType> Default for PropertyGraph<V, E, Ty> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, E: Clone, Ty: EdgeType> Clone for PropertyGraph<V, E, Ty> {
    fn clone(&self) -> Self {
        Self {
            id: next_graph_id(),
            topology: self.topology.clone(),
            vertex_generations: self.vertex_generations.clone(),
            edge_generations: self.edge_generations.clone(),
        }
    }
}

impl<V: fmt::Debug, E: fmt::Debug, Ty: EdgeType> fmt::Debug for PropertyGraph<V, E, Ty> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PropertyGraph")
            .field("id", &self.id)
            .field("topology", &self.topology)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;

    #[test]
    fn add_and_get() {
        let mut graph = PropertyGraph::<&str, usize>::new();
        let a = graph.add_vertex("a");
        let b = graph.add_vertex("b");
        let e = graph.add_edge(a, b, 7).unwrap();
        assert_eq!(graph.vertex(a), Ok(&"a"));
        assert_eq!(graph.edge(e), Ok(&7));
        assert_eq!(graph.edge_endpoints(e), Ok((a, b)));
        assert_eq!(graph.out_edges(a).unwrap().collect::<Vec<_>>(), vec![e]);
        assert_eq!(graph.in_edges(b).unwrap().collect::<Vec<_>>(), vec![e]);
        assert_eq!(graph.in_edges(a).unwrap().count(), 0);
        assert_eq!(graph.adjacent_vertices(a).unwrap().collect::<Vec<_>>(), vec![b]);
        assert_eq!(graph.set_vertex(b, "c"), Ok("b"));
        assert_eq!(graph.vertex(b), Ok(&"c"));
    }

    #[test]
    fn duplicate_edge() {
        let mut graph = PropertyGraph::<(), ()>::new();
        let a = graph.add_vertex(());
        let b = graph.add_vertex(());
        graph.add_edge(a, b, ()).unwrap();
        assert_eq!(graph.add_edge(a, b, ()), Err(GraphError::InvalidTopology));
        // the reverse direction is a different edge
        assert!(graph.add_edge(b, a, ()).is_ok());

        let mut undirected = UndirectedPropertyGraph::<(), ()>::new();
        let a = undirected.add_vertex(());
        let b = undirected.add_vertex(());
        undirected.add_edge(a, b, ()).unwrap();
        assert_eq!(undirected.add_edge(b, a, ()), Err(GraphError::InvalidTopology));
    }

    #[test]
    fn remove_requires_no_edges() {
        let mut graph = PropertyGraph::<u32, ()>::new();
        let a = graph.add_vertex(1);
        let b = graph.add_vertex(2);
        let e = graph.add_edge(a, b, ()).unwrap();
        assert_eq!(graph.remove_vertex(a), Err(GraphError::HasDependentEdges));
        assert_eq!(graph.remove_vertex(b), Err(GraphError::HasDependentEdges));
        graph.remove_edge(e).unwrap();
        assert_eq!(graph.edge(e), Err(GraphError::NotFound));
        assert_eq!(graph.remove_vertex(a), Ok(1));
        assert_eq!(graph.vertex(a), Err(GraphError::NotFound));
        assert_eq!(graph.add_edge(a, b, ()), Err(GraphError::NotFound));
    }

    #[test]
    fn reused_slot_rejects_stale_descriptor() {
        let mut graph = PropertyGraph::<u32, ()>::new();
        let a = graph.add_vertex(1);
        graph.remove_vertex(a).unwrap();
        let b = graph.add_vertex(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(graph.vertex(a), Err(GraphError::NotFound));
        assert_eq!(graph.vertex(b), Ok(&2));
    }

    #[test]
    fn descriptors_stay_valid() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(0x5eed);
        let mut graph = PropertyGraph::<usize, usize>::new();
        let mut alive: Vec<(VertexDescriptor, usize)> = Vec::new();
        let keep = graph.add_vertex(usize::MAX);
        for step in 0..2000 {
            match rng.gen_range(0..3) {
                0 | 1 => alive.push((graph.add_vertex(step), step)),
                _ => {
                    if !alive.is_empty() {
                        let (v, property) = alive.swap_remove(rng.gen_range(0..alive.len()));
                        let edges = graph
                            .in_edges(v)
                            .unwrap()
                            .chain(graph.out_edges(v).unwrap())
                            .collect::<std::collections::BTreeSet<_>>();
                        for e in edges {
                            graph.remove_edge(e).unwrap();
                        }
                        assert_eq!(graph.remove_vertex(v), Ok(property));
                    }
                }
            }
            if alive.len() > 1 && rng.gen_bool(0.5) {
                let (a, _) = alive[rng.gen_range(0..alive.len())];
                let (b, _) = alive[rng.gen_range(0..alive.len())];
                let _ = graph.add_edge(a, b, step);
            }
            assert_eq!(graph.vertex(keep), Ok(&usize::MAX));
        }
        for (v, property) in alive {
            assert_eq!(graph.vertex(v), Ok(&property));
        }
    }

    #[test]
    fn clone_does_not_alias() {
        let mut graph = PropertyGraph::<u32, ()>::new();
        let a = graph.add_vertex(1);
        let mut copy = graph.clone();
        assert_ne!(graph.id(), copy.id());
        assert_eq!(copy.vertex(a), Err(GraphError::NotFound));
        let copied = copy.vertices().next().unwrap();
        copy.set_vertex(copied, 5).unwrap();
        assert_eq!(graph.vertex(a), Ok(&1));
        graph.set_vertex(a, 3).unwrap();
        assert_eq!(copy.vertex(copied), Ok(&5));
        assert!(!graph.contains_vertex(copied));
    }

    #[test]
    fn strong_components() {
        let mut graph = PropertyGraph::<(), ()>::new();
        let v = (0..5).map(|_| graph.add_vertex(())).collect::<Vec<_>>();
        graph.add_edge(v[0], v[1], ()).unwrap();
        graph.add_edge(v[1], v[2], ()).unwrap();
        graph.add_edge(v[2], v[0], ()).unwrap();
        graph.add_edge(v[2], v[3], ()).unwrap();
        graph.add_edge(v[3], v[4], ()).unwrap();
        graph.add_edge(v[4], v[3], ()).unwrap();
        let components = graph.strong_components();
        assert_eq!(components.len(), 5);
        assert_eq!(components[&v[0]], components[&v[1]]);
        assert_eq!(components[&v[1]], components[&v[2]]);
        assert_eq!(components[&v[3]], components[&v[4]]);
        assert_ne!(components[&v[0]], components[&v[3]]);
    }

    #[test]
    fn relocate_replaces_inputs() {
        let mut graph = PropertyGraph::<&str, u8>::new();
        let a = graph.add_vertex("a");
        let b = graph.add_vertex("b");
        let c = graph.add_vertex("c");
        let out = graph.add_vertex("out");
        graph.add_edge(a, c, 0).unwrap();
        graph.add_edge(c, out, 0).unwrap();
        graph.relocate_vertex(c, "c2", vec![(b, 1)]).unwrap();
        assert_eq!(graph.vertex(c), Ok(&"c2"));
        assert!(graph.find_edge(a, c).is_none());
        assert_eq!(graph.edge(graph.find_edge(b, c).unwrap()), Ok(&1));
        assert!(graph.find_edge(c, out).is_some());
        assert_eq!(
            graph.relocate_vertex(c, "c3", vec![(a, 0), (a, 1)]),
            Err(GraphError::InvalidTopology)
        );
        assert_eq!(graph.vertex(c), Ok(&"c2"));
    }

    #[test]
    fn relocate_undirected_keeps_other_edges() {
        let mut graph = UndirectedPropertyGraph::<u32, u8>::new();
        let a = graph.add_vertex(1);
        let b = graph.add_vertex(2);
        let c = graph.add_vertex(3);
        graph.add_edge(c, a, 0).unwrap();
        graph.add_edge(a, b, 0).unwrap();
        // b is already connected to a through an edge a does not receive
        assert_eq!(
            graph.relocate_vertex(a, 42, vec![(b, 1)]),
            Err(GraphError::InvalidTopology)
        );
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.vertex(a), Ok(&1));

        let d = graph.add_vertex(4);
        graph.relocate_vertex(a, 42, vec![(d, 1)]).unwrap();
        assert_eq!(graph.vertex(a), Ok(&42));
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.find_edge(c, a).is_none());
        assert!(graph.find_edge(a, b).is_some());
        assert_eq!(graph.edge(graph.find_edge(d, a).unwrap()), Ok(&1));
    }

    fn build(order: &[usize]) -> PropertyGraph<usize, (usize, usize)> {
        let mut graph = PropertyGraph::new();
        let mut vertices = BTreeMap::new();
        for &i in order {
            vertices.insert(i, graph.add_vertex(i * 10));
        }
        for &i in order {
            let j = (i + 1) % order.len();
            graph.add_edge(vertices[&i], vertices[&j], (i, j)).unwrap();
        }
        graph
    }

    #[test]
    fn equal_except_descriptors() {
        let g = build(&[0, 1, 2, 3]);
        let h = build(&[3, 1, 0, 2]);
        assert!(g.equal_except_descriptors(&h));
        assert!(g.equal_except_descriptors(&g.clone()));

        let mut changed = build(&[0, 1, 2, 3]);
        let e = changed.edges().next().unwrap();
        changed.set_edge(e, (9, 9)).unwrap();
        assert!(!g.equal_except_descriptors(&changed));

        let smaller = build(&[0, 1, 2]);
        assert!(!g.equal_except_descriptors(&smaller));
    }
}
