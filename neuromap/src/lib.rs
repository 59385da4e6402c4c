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

//! Lowering of spiking neural networks onto a neuromorphic chip: routing of
//! projections onto synapse drivers and synapse rows, and construction of the
//! graph of configured hardware primitives.

pub mod chip;
mod error;
pub mod graph;
pub mod network;
mod observe;
pub mod routing;

pub use crate::error::Error;
pub use crate::graph::{
    build_network_graph, build_network_graph_with_observer, extract_statistics,
    network_requires_routing, requires_routing, update_network_graph,
    update_network_graph_with_observer, NetworkGraph,
};
pub use crate::network::{ExecutionInstance, Network, NetworkBuilder};
pub use crate::observe::{
    log_observer, Event, LogObserver, Observer, RecordingObserver, SharedObserver,
};
pub use crate::routing::{
    build_connection_routing, verify_routing, GreedyRouter, PortfolioRouter, Router,
    RoutingConstraints, RoutingOptions, RoutingResult,
};
