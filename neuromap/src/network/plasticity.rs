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

use crate::network::{
    CompartmentOnNeuron, PopulationDescriptor, ProjectionDescriptor, ReadoutSource,
};

/// Invocation schedule of a plasticity kernel, in clock cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlasticityTimer {
    pub start: u64,
    pub period: u64,
    pub num_periods: usize,
}

/// Population handed to a plasticity kernel together with the readout
/// source of every atomic neuron it wants to observe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlasticityPopulation {
    pub descriptor: PopulationDescriptor,
    pub neuron_readout_sources: Vec<BTreeMap<CompartmentOnNeuron, Vec<Option<ReadoutSource>>>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementType {
    Int8,
    UInt8,
    Int16,
    UInt16,
}

impl ElementType {
    pub fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observable {
    /// One element per synapse of every projection of the rule.
    PerSynapse(ElementType),
    /// One element per atomic neuron of every population of the rule.
    PerNeuron(ElementType),
    Array { element: ElementType, size: usize },
}

/// Data a kernel records while running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlasticityRecording {
    /// Opaque scratchpad contents.
    Raw { scratchpad_memory_size: usize },
    /// Named observables, sampled once per kernel invocation.
    Timed {
        observables: BTreeMap<String, Observable>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlasticityRule {
    pub projections: Vec<ProjectionDescriptor>,
    pub populations: Vec<PlasticityPopulation>,
    pub kernel: String,
    pub timer: PlasticityTimer,
    /// The kernel expects one source per synapse row, with rows in the order
    /// of the presynaptic neurons. Requires dense projections.
    pub enable_requires_one_source_per_row_in_order: bool,
    pub recording: Option<PlasticityRecording>,
}

impl PlasticityRule {
    pub fn new(
        projections: Vec<ProjectionDescriptor>,
        kernel: impl Into<String>,
        timer: PlasticityTimer,
    ) -> Self {
        Self {
            projections,
            populations: Vec::new(),
            kernel: kernel.into(),
            timer,
            enable_requires_one_source_per_row_in_order: false,
            recording: None,
        }
    }
}
