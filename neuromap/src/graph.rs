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

//! Lowered representation of a network: a graph of hardware primitives and
//! the tables translating network coordinates into its vertices.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use propgraph::{PropertyGraph, VertexDescriptor};

use crate::chip::{Hemisphere, Pad, SpikeLabel};
use crate::network::{
    CompartmentOnNeuron, ExecutionInstance, Network, PlasticityRuleDescriptor,
    PopulationDescriptor, ProjectionDescriptor,
};
use crate::routing::PlacedConnection;
use crate::Error;

mod builder;
mod requires_routing;
mod statistics;
mod update;
mod valid;
mod vertex;

pub use crate::graph::builder::{build_network_graph, build_network_graph_with_observer};
pub use crate::graph::requires_routing::{network_requires_routing, requires_routing};
pub use crate::graph::statistics::{extract_statistics, InstanceStatistics, NetworkGraphStatistics};
pub use crate::graph::update::{
    update_network_graph, update_network_graph_with_observer, GraphPatch,
};
pub use crate::graph::vertex::{Edge, Vertex};

pub type Graph = PropertyGraph<Vertex, Edge>;

/// Location of a value inside a vertex: the vertex and the index into its
/// synapses or neurons.
pub type Slot = (VertexDescriptor, usize);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceTranslation {
    pub event_input_vertex: Option<VertexDescriptor>,
    pub event_output_vertex: Option<VertexDescriptor>,
    pub madc_sample_output_vertex: Option<VertexDescriptor>,
    pub cadc_sample_output_vertices: Vec<VertexDescriptor>,
    pub pad_readout_vertices: BTreeMap<Pad, VertexDescriptor>,
    pub synapse_vertices: BTreeMap<ProjectionDescriptor, BTreeMap<Hemisphere, VertexDescriptor>>,
    pub neuron_vertices: BTreeMap<PopulationDescriptor, BTreeMap<Hemisphere, VertexDescriptor>>,
    pub background_spike_source_vertices:
        BTreeMap<PopulationDescriptor, BTreeMap<Hemisphere, VertexDescriptor>>,
    pub plasticity_rule_vertices: BTreeMap<PlasticityRuleDescriptor, VertexDescriptor>,
    pub plasticity_rule_output_vertices: BTreeMap<PlasticityRuleDescriptor, VertexDescriptor>,
    /// Labels of every source: per population and neuron, per compartment,
    /// one entry per atomic neuron (on-chip), per target hemisphere
    /// (external) or per bus (background).
    pub spike_labels: BTreeMap<
        PopulationDescriptor,
        Vec<BTreeMap<CompartmentOnNeuron, Vec<Option<SpikeLabel>>>>,
    >,
    /// Per projection and connection, the synapse slots in split order.
    pub projections: BTreeMap<ProjectionDescriptor, Vec<Vec<Slot>>>,
    /// Per on-chip population, neuron and compartment, the neuron slots of
    /// its atomic neurons.
    pub populations: BTreeMap<PopulationDescriptor, Vec<BTreeMap<CompartmentOnNeuron, Vec<Slot>>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphTranslation {
    pub execution_instances: BTreeMap<ExecutionInstance, InstanceTranslation>,
}

#[derive(Clone, Debug)]
pub struct NetworkGraph {
    network: Arc<Network>,
    graph: Graph,
    translation: GraphTranslation,
    construction_duration: Duration,
    verification_duration: Duration,
    routing_duration: Duration,
}

impl NetworkGraph {
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn translation(&self) -> &GraphTranslation {
        &self.translation
    }

    pub fn construction_duration(&self) -> Duration {
        self.construction_duration
    }

    pub fn verification_duration(&self) -> Duration {
        self.verification_duration
    }

    pub fn routing_duration(&self) -> Duration {
        self.routing_duration
    }

    fn instance_translation(&self, id: ExecutionInstance) -> Result<&InstanceTranslation, Error> {
        self.translation
            .execution_instances
            .get(&id)
            .ok_or_else(|| Error::Validation(format!("{} not present", id)))
    }

    /// Synapses realizing connection `index` of `projection`, read back from
    /// the graph.
    pub fn placed_connection(
        &self,
        id: ExecutionInstance,
        projection: ProjectionDescriptor,
        index: usize,
    ) -> Result<Vec<PlacedConnection>, Error> {
        let slots = self
            .instance_translation(id)?
            .projections
            .get(&projection)
            .and_then(|connections| connections.get(index))
            .ok_or_else(|| {
                Error::Validation(format!("connection {} of {:?} not present", index, projection))
            })?;
        slots
            .iter()
            .map(|(vertex, slot)| {
                self.graph
                    .vertex(*vertex)?
                    .as_synapse_array_view()
                    .and_then(|synapses| synapses.get(*slot))
                    .copied()
                    .ok_or_else(|| {
                        Error::InvalidNetworkGraph(format!(
                            "slot {} of {} is no synapse",
                            slot, vertex
                        ))
                    })
            })
            .collect()
    }

    pub fn placed_connections(
        &self,
        id: ExecutionInstance,
        projection: ProjectionDescriptor,
    ) -> Result<Vec<Vec<PlacedConnection>>, Error> {
        let num = self
            .instance_translation(id)?
            .projections
            .get(&projection)
            .map(Vec::len)
            .ok_or_else(|| Error::Validation(format!("{:?} not present", projection)))?;
        (0..num)
            .map(|index| self.placed_connection(id, projection, index))
            .collect()
    }
}
