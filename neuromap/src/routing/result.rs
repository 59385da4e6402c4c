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

use std::collections::BTreeMap;
use std::time::Duration;

use crate::chip::{
    CrossbarNodeConfig, CrossbarNodeOnChip, Hemisphere, Mask, NeuronLabel, RowMode,
    SpikeLabel, SynapseDriverOnChip, SynapseLabel, SynapseRowOnChip,
};
use crate::network::{
    CompartmentOnNeuron, ExecutionInstance, PopulationDescriptor, ProjectionDescriptor,
};

/// Labels of the atomic neurons of one neuron, per compartment.
pub type NeuronLabels = BTreeMap<CompartmentOnNeuron, Vec<Option<NeuronLabel>>>;

/// One synapse realizing (a part of) a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedConnection {
    pub weight: u32,
    pub label: SynapseLabel,
    pub row: SynapseRowOnChip,
    /// Column of the target atomic neuron.
    pub column: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SynapseDriverConfig {
    pub mask: Mask,
    pub row_modes: [RowMode; 2],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceRoutingResult {
    /// Per projection and connection, the synapses in split order.
    pub connections: BTreeMap<ProjectionDescriptor, Vec<Vec<PlacedConnection>>>,
    /// Per external population and neuron, the labels to inject its events
    /// with, one per target hemisphere.
    pub external_spike_labels: BTreeMap<PopulationDescriptor, Vec<Vec<SpikeLabel>>>,
    /// Per background population, hemisphere and source, the emitted label.
    pub background_spike_labels:
        BTreeMap<PopulationDescriptor, BTreeMap<Hemisphere, Vec<SpikeLabel>>>,
    /// Per on-chip population and neuron, the label of each atomic neuron,
    /// `None` where the event output stays disabled.
    pub internal_neuron_labels: BTreeMap<PopulationDescriptor, Vec<NeuronLabels>>,
    pub synapse_drivers: BTreeMap<SynapseDriverOnChip, SynapseDriverConfig>,
    pub crossbar_nodes: BTreeMap<CrossbarNodeOnChip, CrossbarNodeConfig>,
}

impl InstanceRoutingResult {
    pub fn num_synapses(&self) -> usize {
        self.connections.values().flatten().map(Vec::len).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingStatistics {
    pub routing: Duration,
    pub verification: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingResult {
    pub execution_instances: BTreeMap<ExecutionInstance, InstanceRoutingResult>,
    pub timing_statistics: TimingStatistics,
}
