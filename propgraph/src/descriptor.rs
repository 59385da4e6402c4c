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

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Each property graph has a unique ID. Descriptors carry the ID of the graph
/// that issued them, so a descriptor of one graph never resolves in another,
/// not even in a copy of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GraphId {
    value: usize,
}

impl Display for GraphId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.value)
    }
}

pub(crate) fn next_graph_id() -> GraphId {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let next_value = COUNTER.fetch_add(1, Ordering::Relaxed);
    GraphId { value: next_value }
}

/// Handle to a vertex of a `PropertyGraph`.
///
/// The slot index may be reused after the vertex is removed; the generation
/// tells the old and the new occupant apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexDescriptor {
    pub(crate) graph: GraphId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to an edge of a `PropertyGraph`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeDescriptor {
    pub(crate) graph: GraphId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl VertexDescriptor {
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Slot in the owning graph. Only unique together with the generation.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl EdgeDescriptor {
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl Display for VertexDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "v{}.{}@{}", self.index, self.generation, self.graph)
    }
}

impl Display for EdgeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "e{}.{}@{}", self.index, self.generation, self.graph)
    }
}
