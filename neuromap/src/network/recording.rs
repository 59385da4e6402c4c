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

use crate::chip::Pad;
use crate::network::{CompartmentOnNeuron, PopulationDescriptor};

/// Observable routed to a neuron's readout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadoutSource {
    Membrane,
    ExcitatorySynapticInput,
    InhibitorySynapticInput,
    Adaptation,
}

/// Atomic neuron addressed through the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomicNeuronOnNetwork {
    pub population: PopulationDescriptor,
    pub neuron_on_population: usize,
    pub compartment_on_neuron: CompartmentOnNeuron,
    pub atomic_neuron_on_compartment: usize,
}

impl AtomicNeuronOnNetwork {
    /// First atomic neuron of the first compartment of a neuron.
    pub fn new(population: PopulationDescriptor, neuron_on_population: usize) -> Self {
        Self {
            population,
            neuron_on_population,
            compartment_on_neuron: CompartmentOnNeuron(0),
            atomic_neuron_on_compartment: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedNeuron {
    pub coordinate: AtomicNeuronOnNetwork,
    pub source: ReadoutSource,
}

impl RecordedNeuron {
    pub fn new(coordinate: AtomicNeuronOnNetwork, source: ReadoutSource) -> Self {
        Self { coordinate, source }
    }
}

/// Recording of up to two neurons through the MADC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MadcRecording {
    pub neurons: Vec<RecordedNeuron>,
}

/// Recording of neurons through the column ADCs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CadcRecording {
    pub neurons: Vec<RecordedNeuron>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PadRecordingSource {
    pub neuron: RecordedNeuron,
    pub enable_buffered: bool,
}

/// Neurons connected to the analog output pads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PadRecording {
    pub recordings: BTreeMap<Pad, PadRecordingSource>,
}
