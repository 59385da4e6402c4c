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

//! Placement of a network's connections onto synapse rows, drivers, labels
//! and crossbar nodes.

use crate::network::Network;
use crate::Error;

pub mod allocator;
mod connection;
mod constraints;
mod greedy;
mod options;
mod portfolio;
mod result;
mod sources;
mod verify;

pub use crate::routing::connection::{
    build_connection_routing, build_connection_weight_split, connection_source, num_synapses,
    ConnectionRouting, ConnectionRoutingResult, InstanceConnectionRouting, Source,
};
pub use crate::routing::constraints::{BusConstraints, RoutingConstraints};
pub use crate::routing::greedy::GreedyRouter;
pub use crate::routing::options::{AllocationPolicy, RoutingOptions};
pub use crate::routing::portfolio::{PortfolioRouter, DEFAULT_BACKTRACKING_BUDGET};
pub use crate::routing::result::{
    InstanceRoutingResult, PlacedConnection, RoutingResult, SynapseDriverConfig, TimingStatistics,
};
pub use crate::routing::verify::verify_routing;

/// Computes a routing result for a whole network.
///
/// Implementations fail with `Error::CapacityExceeded` when the network can
/// never fit the chip and with `Error::UnsuccessfulRouting` when they just
/// did not find a solution. Only the latter is worth retrying with another
/// router.
pub trait Router {
    fn name(&self) -> String;
    fn route(&mut self, network: &Network) -> Result<RoutingResult, Error>;
}
