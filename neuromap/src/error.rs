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

use propgraph::GraphError;
use std::fmt;

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// Malformed input to the network builder.
    Validation(String),
    /// Demand exceeds what the fabric offers.
    CapacityExceeded(String),
    /// A router could not find a feasible allocation. Portfolio routers
    /// recover from this by trying the next router.
    UnsuccessfulRouting(String),
    /// The lowered graph does not represent its network.
    InvalidNetworkGraph(String),
    /// The routing result does not belong to the network being lowered.
    InvalidRoutingResult(String),
    /// The network differs from the routed one in a way only a new routing
    /// can accommodate.
    RoutingRequired,
    Graph(GraphError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "ERROR: invalid network: {}", msg),
            Self::CapacityExceeded(msg) => write!(f, "ERROR: capacity exceeded: {}", msg),
            Self::UnsuccessfulRouting(msg) => write!(f, "ERROR: routing failed: {}", msg),
            Self::InvalidNetworkGraph(msg) => write!(f, "ERROR: invalid network graph: {}", msg),
            Self::InvalidRoutingResult(msg) => {
                write!(f, "ERROR: invalid routing result: {}", msg)
            }
            Self::RoutingRequired => write!(f, "ERROR: network requires new routing"),
            Self::Graph(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for Error {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}
