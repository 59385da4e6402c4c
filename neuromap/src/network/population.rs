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

use std::collections::{BTreeMap, BTreeSet};

use crate::chip::{AtomicNeuron, Hemisphere, ReceptorType, BUSES_PER_HEMISPHERE, SYNAPSE_LABELS};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompartmentOnNeuron(pub usize);

/// Synaptic input site of a compartment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Receptor {
    pub id: u32,
    pub receptor_type: ReceptorType,
}

impl Receptor {
    pub fn new(id: u32, receptor_type: ReceptorType) -> Self {
        Self { id, receptor_type }
    }

    pub fn excitatory() -> Self {
        Self::new(0, ReceptorType::Excitatory)
    }

    pub fn inhibitory() -> Self {
        Self::new(1, ReceptorType::Inhibitory)
    }
}

/// Placement of a (possibly multi-circuit) neuron: atomic neurons per compartment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogicalNeuron {
    pub compartments: BTreeMap<CompartmentOnNeuron, Vec<AtomicNeuron>>,
}

impl LogicalNeuron {
    pub fn single(atomic_neuron: AtomicNeuron) -> Self {
        let mut compartments = BTreeMap::new();
        compartments.insert(CompartmentOnNeuron(0), vec![atomic_neuron]);
        Self { compartments }
    }

    pub fn atomic_neurons(&self) -> impl Iterator<Item = &AtomicNeuron> {
        self.compartments.values().flatten()
    }
}

/// Atomic neuron of a compartment which emits the compartment's spikes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpikeMaster {
    pub neuron_on_compartment: usize,
    pub enable_record_spikes: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Compartment {
    pub spike_master: Option<SpikeMaster>,
    /// Receptors available on each atomic neuron of the compartment.
    pub receptors: Vec<BTreeSet<Receptor>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Neuron {
    pub coordinate: LogicalNeuron,
    pub compartments: BTreeMap<CompartmentOnNeuron, Compartment>,
}

impl Neuron {
    /// A neuron made of one atomic neuron which is its own spike master.
    pub fn single(
        atomic_neuron: AtomicNeuron,
        receptors: BTreeSet<Receptor>,
        enable_record_spikes: bool,
    ) -> Self {
        let mut compartments = BTreeMap::new();
        compartments.insert(
            CompartmentOnNeuron(0),
            Compartment {
                spike_master: Some(SpikeMaster {
                    neuron_on_compartment: 0,
                    enable_record_spikes,
                }),
                receptors: vec![receptors],
            },
        );
        Self {
            coordinate: LogicalNeuron::single(atomic_neuron),
            compartments,
        }
    }

    /// Compartments of placement and description agree, every atomic neuron
    /// has a receptor set and spike masters point to an atomic neuron.
    pub fn valid(&self) -> bool {
        if !self
            .coordinate
            .compartments
            .keys()
            .eq(self.compartments.keys())
        {
            return false;
        }
        self.compartments.iter().all(|(c, compartment)| {
            let size = self.coordinate.compartments[c].len();
            size > 0
                && compartment.receptors.len() == size
                && compartment
                    .spike_master
                    .map_or(true, |master| master.neuron_on_compartment < size)
        })
    }

    pub fn atomic_neuron(
        &self,
        compartment: CompartmentOnNeuron,
        index: usize,
    ) -> Option<AtomicNeuron> {
        self.coordinate
            .compartments
            .get(&compartment)
            .and_then(|atomic_neurons| atomic_neurons.get(index))
            .copied()
    }

    /// Atomic neuron emitting the spikes of `compartment`, if any.
    pub fn spike_master(&self, compartment: CompartmentOnNeuron) -> Option<AtomicNeuron> {
        let master = self.compartments.get(&compartment)?.spike_master?;
        self.atomic_neuron(compartment, master.neuron_on_compartment)
    }

    pub fn records_spikes(&self) -> bool {
        self.compartments.values().any(|compartment| {
            compartment
                .spike_master
                .map_or(false, |master| master.enable_record_spikes)
        })
    }
}

/// Population of on-chip neurons.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Population {
    pub neurons: Vec<Neuron>,
}

impl Population {
    pub fn new(neurons: Vec<Neuron>) -> Self {
        Self { neurons }
    }

    /// Single-circuit neurons, all sharing the same receptors.
    pub fn from_atomic_neurons(
        atomic_neurons: &[AtomicNeuron],
        receptors: &[Receptor],
        enable_record_spikes: bool,
    ) -> Self {
        let receptors = receptors.iter().copied().collect::<BTreeSet<_>>();
        Self::new(
            atomic_neurons
                .iter()
                .map(|atomic_neuron| {
                    Neuron::single(*atomic_neuron, receptors.clone(), enable_record_spikes)
                })
                .collect(),
        )
    }

    pub fn size(&self) -> usize {
        self.neurons.len()
    }

    pub fn valid(&self) -> bool {
        self.neurons.iter().all(Neuron::valid)
    }

    pub fn atomic_neurons(&self) -> impl Iterator<Item = &AtomicNeuron> {
        self.neurons
            .iter()
            .flat_map(|neuron| neuron.coordinate.atomic_neurons())
    }

    pub fn atomic_neurons_unique(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.atomic_neurons().all(|atomic_neuron| seen.insert(*atomic_neuron))
    }

    pub fn hemispheres(&self) -> BTreeSet<Hemisphere> {
        self.atomic_neurons().map(|a| a.hemisphere).collect()
    }
}

/// Off-chip stimulus sources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExternalSourcePopulation {
    pub size: usize,
}

impl ExternalSourcePopulation {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackgroundSourceConfig {
    /// Clock cycles between two events, or between two draws if random.
    pub period: u16,
    /// Probability of an event per draw, in units of 1/256.
    pub rate: u8,
    pub seed: u32,
    /// Draw events and the lower synapse label bits randomly.
    pub enable_random: bool,
}

impl Default for BackgroundSourceConfig {
    fn default() -> Self {
        Self {
            period: 1000,
            rate: 0,
            seed: 0x1234_5678,
            enable_random: false,
        }
    }
}

/// On-chip spike generators, one per listed hemisphere, each feeding a bus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackgroundSourcePopulation {
    pub size: usize,
    /// Bus index used in each hemisphere.
    pub coordinate: BTreeMap<Hemisphere, u8>,
    pub config: BackgroundSourceConfig,
}

impl BackgroundSourcePopulation {
    /// Whether the size fits the generator: a power of two of random labels,
    /// or a single regular source.
    pub fn valid(&self) -> bool {
        let size_ok = if self.config.enable_random {
            self.size.is_power_of_two() && self.size <= SYNAPSE_LABELS
        } else {
            self.size == 1
        };
        size_ok
            && !self.coordinate.is_empty()
            && self
                .coordinate
                .values()
                .all(|&bus| (bus as usize) < BUSES_PER_HEMISPHERE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopulationKind {
    Internal(Population),
    External(ExternalSourcePopulation),
    Background(BackgroundSourcePopulation),
}

impl PopulationKind {
    pub fn size(&self) -> usize {
        match self {
            Self::Internal(population) => population.size(),
            Self::External(population) => population.size,
            Self::Background(population) => population.size,
        }
    }

    pub fn as_internal(&self) -> Option<&Population> {
        match self {
            Self::Internal(population) => Some(population),
            _ => None,
        }
    }

    pub fn as_background(&self) -> Option<&BackgroundSourcePopulation> {
        match self {
            Self::Background(population) => Some(population),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuron_validity() {
        let a = AtomicNeuron::new(Hemisphere::TOP, 3);
        let neuron = Neuron::single(a, [Receptor::excitatory()].iter().copied().collect(), true);
        assert!(neuron.valid());
        assert_eq!(neuron.spike_master(CompartmentOnNeuron(0)), Some(a));
        assert!(neuron.records_spikes());

        let mut missing_receptors = neuron.clone();
        missing_receptors
            .compartments
            .get_mut(&CompartmentOnNeuron(0))
            .unwrap()
            .receptors
            .clear();
        assert!(!missing_receptors.valid());

        let mut bad_master = neuron.clone();
        bad_master
            .compartments
            .get_mut(&CompartmentOnNeuron(0))
            .unwrap()
            .spike_master = Some(SpikeMaster {
            neuron_on_compartment: 1,
            enable_record_spikes: false,
        });
        assert!(!bad_master.valid());

        let mut extra = neuron;
        extra
            .compartments
            .insert(CompartmentOnNeuron(1), Compartment::default());
        assert!(!extra.valid());
    }

    #[test]
    fn background_sizes() {
        let mut population = BackgroundSourcePopulation {
            size: 1,
            coordinate: [(Hemisphere::TOP, 0)].iter().copied().collect(),
            config: BackgroundSourceConfig::default(),
        };
        assert!(population.valid());
        population.size = 2;
        assert!(!population.valid());
        population.config.enable_random = true;
        assert!(population.valid());
        population.size = 3;
        assert!(!population.valid());
        population.size = 128;
        assert!(!population.valid());
        population.size = 4;
        population.coordinate.insert(Hemisphere::BOTTOM, 4);
        assert!(!population.valid());
    }

    #[test]
    fn unique_atomic_neurons() {
        let a = AtomicNeuron::new(Hemisphere::TOP, 0);
        let b = AtomicNeuron::new(Hemisphere::BOTTOM, 0);
        let receptors = [Receptor::excitatory()];
        let distinct = Population::from_atomic_neurons(&[a, b], &receptors, false);
        assert!(distinct.atomic_neurons_unique());
        let repeated = Population::from_atomic_neurons(&[a, a], &receptors, false);
        assert!(!repeated.atomic_neurons_unique());
    }
}
