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

//! Hardware primitives the lowered graph is made of.

use crate::chip::{
    AtomicNeuron, BusOnChip, CrossbarL2Output, CrossbarNodeConfig, CrossbarNodeOnChip, Hemisphere,
    NeuronEventOutput, NeuronLabel, Pad, ReceptorType, SynapseDriverOnChip,
};
use crate::network::{
    BackgroundSourceConfig, PlasticityRecording, PlasticityTimer, ReadoutSource,
};
use crate::routing::{PlacedConnection, SynapseDriverConfig};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Vertex {
    /// Spike events injected by the host.
    ExternalInput { size: usize },
    /// Merges the host events onto the L2 inputs of the crossbar.
    CrossbarL2Input,
    BackgroundSource {
        bus: BusOnChip,
        config: BackgroundSourceConfig,
        /// Label of source 0; random sources replace the bits in `mask`.
        label: NeuronLabel,
        mask: u16,
    },
    CrossbarNode {
        coordinate: CrossbarNodeOnChip,
        config: CrossbarNodeConfig,
    },
    PadiBus { bus: BusOnChip },
    SynapseDriver {
        coordinate: SynapseDriverOnChip,
        config: SynapseDriverConfig,
    },
    /// Synapses of one projection in one hemisphere.
    SynapseArrayView {
        hemisphere: Hemisphere,
        receptor_type: ReceptorType,
        synapses: Vec<PlacedConnection>,
    },
    /// Neurons of one population in one hemisphere, in population order.
    NeuronView {
        hemisphere: Hemisphere,
        columns: Vec<u16>,
        labels: Vec<Option<NeuronLabel>>,
    },
    NeuronEventOutput { coordinate: NeuronEventOutput },
    CrossbarL2Output { coordinate: CrossbarL2Output },
    /// Spike events returned to the host.
    ExternalOutput,
    MadcReadout {
        neurons: Vec<(AtomicNeuron, ReadoutSource)>,
    },
    CadcReadout {
        hemisphere: Hemisphere,
        neurons: Vec<(AtomicNeuron, ReadoutSource)>,
    },
    PadReadout {
        pad: Pad,
        neuron: AtomicNeuron,
        source: ReadoutSource,
        enable_buffered: bool,
    },
    PlasticityRule {
        kernel: String,
        timer: PlasticityTimer,
        /// Number of synapses of each input synapse view.
        synapse_view_shapes: Vec<usize>,
        /// Number of neurons of each input neuron view.
        neuron_view_shapes: Vec<usize>,
        recording: Option<PlasticityRecording>,
    },
    /// Recorded data of a plasticity rule.
    PlasticityRuleOutput,
}

impl Vertex {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExternalInput { .. } => "ExternalInput",
            Self::CrossbarL2Input => "CrossbarL2Input",
            Self::BackgroundSource { .. } => "BackgroundSource",
            Self::CrossbarNode { .. } => "CrossbarNode",
            Self::PadiBus { .. } => "PadiBus",
            Self::SynapseDriver { .. } => "SynapseDriver",
            Self::SynapseArrayView { .. } => "SynapseArrayView",
            Self::NeuronView { .. } => "NeuronView",
            Self::NeuronEventOutput { .. } => "NeuronEventOutput",
            Self::CrossbarL2Output { .. } => "CrossbarL2Output",
            Self::ExternalOutput => "ExternalOutput",
            Self::MadcReadout { .. } => "MadcReadout",
            Self::CadcReadout { .. } => "CadcReadout",
            Self::PadReadout { .. } => "PadReadout",
            Self::PlasticityRule { .. } => "PlasticityRule",
            Self::PlasticityRuleOutput => "PlasticityRuleOutput",
        }
    }

    pub fn as_synapse_array_view(&self) -> Option<&[PlacedConnection]> {
        match self {
            Self::SynapseArrayView { synapses, .. } => Some(synapses),
            _ => None,
        }
    }

    pub fn as_neuron_view(&self) -> Option<(Hemisphere, &[u16], &[Option<NeuronLabel>])> {
        match self {
            Self::NeuronView {
                hemisphere,
                columns,
                labels,
            } => Some((*hemisphere, columns, labels)),
            _ => None,
        }
    }

    pub fn as_synapse_driver(&self) -> Option<(SynapseDriverOnChip, &SynapseDriverConfig)> {
        match self {
            Self::SynapseDriver { coordinate, config } => Some((*coordinate, config)),
            _ => None,
        }
    }
}

/// Output ports of the source vertex consumed by the target: synapse rows
/// from drivers, neuron columns from synapse and neuron views. Empty for
/// vertices with a single output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Edge {
    pub ports: Vec<u16>,
}

impl Edge {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }

    /// Adds `ports` not yet listed, keeping the list sorted.
    pub fn merge(&mut self, ports: &[u16]) {
        self.ports.extend_from_slice(ports);
        self.ports.sort_unstable();
        self.ports.dedup();
    }
}
