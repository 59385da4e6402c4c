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

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GraphError {
    /// The operation would produce a malformed graph, e.g., a second edge
    /// between the same pair of vertices.
    InvalidTopology,
    /// The descriptor does not (or no longer) refer to an element of this graph.
    NotFound,
    /// A vertex can only be removed after all its edges are gone.
    HasDependentEdges,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidTopology => write!(f, "ERROR: invalid graph topology"),
            Self::NotFound => write!(f, "ERROR: descriptor not found in graph"),
            Self::HasDependentEdges => write!(f, "ERROR: vertex still has edges"),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
