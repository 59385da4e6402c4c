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

//! Abstract description of a spiking network, partitioned into execution
//! instances.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::chip::{AtomicNeuron, Pad};

mod builder;
mod plasticity;
mod population;
mod projection;
mod recording;

pub use builder::{NetworkBuilder, NetworkElement};
pub use plasticity::{
    ElementType, Observable, PlasticityPopulation, PlasticityRecording, PlasticityRule,
    PlasticityTimer,
};
pub use population::{
    BackgroundSourceConfig, BackgroundSourcePopulation, Compartment, CompartmentOnNeuron,
    ExternalSourcePopulation, LogicalNeuron, Neuron, Population, PopulationKind, Receptor,
    SpikeMaster,
};
pub use projection::{Connection, Projection};
pub use recording::{
    AtomicNeuronOnNetwork, CadcRecording, MadcRecording, PadRecording, PadRecordingSource,
    ReadoutSource, RecordedNeuron,
};

/// One sequential use of the chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionInstance(pub usize);

impl fmt::Display for ExecutionInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExecutionInstance({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PopulationDescriptor(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectionDescriptor(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlasticityRuleDescriptor(pub usize);

/// Network elements placed on one execution instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkInstance {
    pub populations: BTreeMap<PopulationDescriptor, PopulationKind>,
    pub projections: BTreeMap<ProjectionDescriptor, Projection>,
    pub madc_recording: Option<MadcRecording>,
    pub cadc_recording: Option<CadcRecording>,
    pub pad_recording: Option<PadRecording>,
    pub plasticity_rules: BTreeMap<PlasticityRuleDescriptor, PlasticityRule>,
}

impl NetworkInstance {
    pub fn internal_population(&self, descriptor: PopulationDescriptor) -> Option<&Population> {
        self.populations
            .get(&descriptor)
            .and_then(PopulationKind::as_internal)
    }

    pub fn internal_populations(
        &self,
    ) -> impl Iterator<Item = (PopulationDescriptor, &Population)> {
        self.populations
            .iter()
            .filter_map(|(d, p)| p.as_internal().map(|p| (*d, p)))
    }

    /// Hardware location of a neuron addressed through the network.
    pub fn resolve(&self, coordinate: &AtomicNeuronOnNetwork) -> Option<AtomicNeuron> {
        self.internal_population(coordinate.population)?
            .neurons
            .get(coordinate.neuron_on_population)?
            .atomic_neuron(
                coordinate.compartment_on_neuron,
                coordinate.atomic_neuron_on_compartment,
            )
    }

    /// Readout source requested for each recorded atomic neuron, by any
    /// recording or plasticity rule. A neuron may appear more than once.
    pub fn readout_sources(&self) -> Vec<(AtomicNeuron, ReadoutSource)> {
        let mut sources = Vec::new();
        let recorded = self
            .madc_recording
            .iter()
            .flat_map(|r| r.neurons.iter())
            .chain(self.cadc_recording.iter().flat_map(|r| r.neurons.iter()))
            .chain(
                self.pad_recording
                    .iter()
                    .flat_map(|r| r.recordings.values().map(|s| &s.neuron)),
            );
        for neuron in recorded {
            if let Some(atomic_neuron) = self.resolve(&neuron.coordinate) {
                sources.push((atomic_neuron, neuron.source));
            }
        }
        for rule in self.plasticity_rules.values() {
            for handle in &rule.populations {
                let population = match self.internal_population(handle.descriptor) {
                    Some(population) => population,
                    None => continue,
                };
                let neurons = population.neurons.iter().zip(&handle.neuron_readout_sources);
                for (neuron, readouts) in neurons {
                    for (compartment, readouts) in readouts {
                        for (i, readout) in readouts.iter().enumerate() {
                            if let (Some(source), Some(atomic_neuron)) =
                                (readout, neuron.atomic_neuron(*compartment, i))
                            {
                                sources.push((atomic_neuron, *source));
                            }
                        }
                    }
                }
            }
        }
        sources
    }

    pub fn recorded_pads(&self) -> BTreeSet<Pad> {
        self.pad_recording
            .iter()
            .flat_map(|r| r.recordings.keys().copied())
            .collect()
    }

    /// Projections whose synapses need one source per row, in order.
    pub fn one_source_per_row_projections(&self) -> BTreeSet<ProjectionDescriptor> {
        self.plasticity_rules
            .values()
            .filter(|rule| rule.enable_requires_one_source_per_row_in_order)
            .flat_map(|rule| rule.projections.iter().copied())
            .collect()
    }
}

/// Immutable network handed to routing and lowering.
#[derive(Clone, Debug, Default)]
pub struct Network {
    pub execution_instances: BTreeMap<ExecutionInstance, NetworkInstance>,
    /// Time spent in the builder to create this network.
    pub construction_duration: Duration,
}

impl PartialEq for Network {
    fn eq(&self, other: &Self) -> bool {
        self.execution_instances == other.execution_instances
    }
}

impl Eq for Network {}
