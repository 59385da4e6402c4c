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

//! Generation-checked property graphs on top of `petgraph`.

mod descriptor;
mod error;
mod graph;
mod isomorphism;

pub use crate::descriptor::{EdgeDescriptor, GraphId, VertexDescriptor};
pub use crate::error::GraphError;
pub use crate::graph::{PropertyGraph, UndirectedPropertyGraph};
pub use crate::isomorphism::{
    isomorphism, isomorphism_subgraph, Adjacency, Mapping, SearchSummary,
};
pub use petgraph::{Directed, Direction, Undirected};
