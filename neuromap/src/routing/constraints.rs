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

//! Demand on synapse rows, drivers and buses derived from the connectivity.

use std::collections::{BTreeMap, BTreeSet};

use crate::chip::{
    AtomicNeuron, BusOnChip, Hemisphere, NeuronEventOutput, ReceptorType, ROWS_PER_BUS,
    ROWS_PER_HEMISPHERE,
};
use crate::network::NetworkInstance;
use crate::routing::connection::{AtomicConnection, Source};
use crate::Error;

/// Everything routed through one bus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusConstraints {
    pub internal_connections: Vec<AtomicConnection>,
    pub background_connections: Vec<AtomicConnection>,
    /// Neurons whose events arrive at the bus and are used there.
    pub neuron_sources: BTreeSet<AtomicNeuron>,
    /// Neurons whose events arrive at the bus only to be recorded. They need
    /// labels no synapse driver of the bus reacts to.
    pub only_recorded_neurons: BTreeSet<AtomicNeuron>,
}

pub struct RoutingConstraints<'a> {
    instance: &'a NetworkInstance,
    connections: Vec<AtomicConnection>,
}

impl<'a> RoutingConstraints<'a> {
    pub fn new(instance: &'a NetworkInstance, connections: Vec<AtomicConnection>) -> Self {
        Self {
            instance,
            connections,
        }
    }

    pub fn instance(&self) -> &'a NetworkInstance {
        self.instance
    }

    pub fn connections(&self) -> &[AtomicConnection] {
        &self.connections
    }

    fn bus_connections(&self) -> impl Iterator<Item = (BusOnChip, &AtomicConnection)> {
        let instance = self.instance;
        self.connections
            .iter()
            .filter_map(move |c| c.bus(instance).map(|bus| (bus, c)))
    }

    pub fn neuron_in_degree(&self) -> BTreeMap<AtomicNeuron, usize> {
        let mut degree = BTreeMap::new();
        for connection in &self.connections {
            *degree.entry(connection.target).or_default() += 1;
        }
        degree
    }

    /// In-degree over the buses of internal and background sources. Buses of
    /// external sources are only known after source distribution.
    pub fn neuron_in_degree_per_bus(&self) -> BTreeMap<AtomicNeuron, BTreeMap<BusOnChip, usize>> {
        let mut degree: BTreeMap<AtomicNeuron, BTreeMap<BusOnChip, usize>> = BTreeMap::new();
        for (bus, connection) in self.bus_connections() {
            *degree
                .entry(connection.target)
                .or_default()
                .entry(bus)
                .or_default() += 1;
        }
        degree
    }

    pub fn neuron_in_degree_per_receptor_type(
        &self,
    ) -> BTreeMap<AtomicNeuron, BTreeMap<ReceptorType, usize>> {
        let mut degree: BTreeMap<AtomicNeuron, BTreeMap<ReceptorType, usize>> = BTreeMap::new();
        for connection in &self.connections {
            *degree
                .entry(connection.target)
                .or_default()
                .entry(connection.receptor_type)
                .or_default() += 1;
        }
        degree
    }

    pub fn neuron_in_degree_per_receptor_type_per_bus(
        &self,
    ) -> BTreeMap<AtomicNeuron, BTreeMap<(BusOnChip, ReceptorType), usize>> {
        let mut degree: BTreeMap<AtomicNeuron, BTreeMap<(BusOnChip, ReceptorType), usize>> =
            BTreeMap::new();
        for (bus, connection) in self.bus_connections() {
            *degree
                .entry(connection.target)
                .or_default()
                .entry((bus, connection.receptor_type))
                .or_default() += 1;
        }
        degree
    }

    /// Rows each bus needs per receptor type: a row drives a single polarity,
    /// so every target needs as many rows of a type as it has inputs of it.
    pub fn num_rows_per_receptor_type_per_bus(
        &self,
    ) -> BTreeMap<BusOnChip, BTreeMap<ReceptorType, usize>> {
        let mut rows: BTreeMap<BusOnChip, BTreeMap<ReceptorType, usize>> = BTreeMap::new();
        for degrees in self.neuron_in_degree_per_receptor_type_per_bus().values() {
            for (&(bus, receptor_type), &degree) in degrees {
                let entry = rows.entry(bus).or_default().entry(receptor_type).or_default();
                *entry = std::cmp::max(*entry, degree);
            }
        }
        rows
    }

    pub fn num_rows_per_bus(&self) -> BTreeMap<BusOnChip, usize> {
        self.num_rows_per_receptor_type_per_bus()
            .into_iter()
            .map(|(bus, rows)| (bus, rows.values().sum()))
            .collect()
    }

    /// Background populations feeding each bus.
    pub fn num_background_sources_per_bus(&self) -> BTreeMap<BusOnChip, usize> {
        let mut sources = BTreeMap::new();
        for background in self
            .instance
            .populations
            .values()
            .filter_map(|p| p.as_background())
        {
            for (hemisphere, index) in &background.coordinate {
                *sources.entry(BusOnChip::new(*hemisphere, *index)).or_default() += 1;
            }
        }
        sources
    }

    /// Spike masters used as source by any connection.
    pub fn source_neurons(&self) -> BTreeSet<AtomicNeuron> {
        self.connections
            .iter()
            .filter_map(|c| match c.source {
                Source::Internal(neuron) => Some(neuron),
                _ => None,
            })
            .collect()
    }

    /// Spike masters recording their spikes.
    pub fn recorded_neurons(&self) -> BTreeSet<AtomicNeuron> {
        let mut recorded = BTreeSet::new();
        for (_, population) in self.instance.internal_populations() {
            for neuron in &population.neurons {
                for (compartment, description) in &neuron.compartments {
                    let records = description
                        .spike_master
                        .map_or(false, |master| master.enable_record_spikes);
                    if let (true, Some(a)) = (records, neuron.spike_master(*compartment)) {
                        recorded.insert(a);
                    }
                }
            }
        }
        recorded
    }

    pub fn bus_constraints(&self) -> BTreeMap<BusOnChip, BusConstraints> {
        let mut constraints: BTreeMap<BusOnChip, BusConstraints> =
            BusOnChip::all().map(|bus| (bus, BusConstraints::default())).collect();
        for (bus, connection) in self.bus_connections() {
            let bus_constraints = constraints.entry(bus).or_default();
            match connection.source {
                Source::Internal(_) => bus_constraints.internal_connections.push(*connection),
                Source::Background { .. } => {
                    bus_constraints.background_connections.push(*connection)
                }
                Source::External { .. } => {}
            }
        }
        let sources = self.source_neurons();
        let recorded = self.recorded_neurons();
        for (bus, bus_constraints) in constraints.iter_mut() {
            let on_bus = |a: &&AtomicNeuron| a.event_output().bus_index() == bus.index;
            bus_constraints.neuron_sources = sources.iter().filter(on_bus).copied().collect();
            bus_constraints.only_recorded_neurons = recorded
                .difference(&sources)
                .filter(on_bus)
                .copied()
                .collect();
        }
        constraints
    }

    /// Connections from external sources into each hemisphere.
    pub fn external_connections(&self) -> BTreeMap<Hemisphere, Vec<AtomicConnection>> {
        let mut connections: BTreeMap<Hemisphere, Vec<AtomicConnection>> = BTreeMap::new();
        for connection in &self.connections {
            if let Source::External { .. } = connection.source {
                connections
                    .entry(connection.target.hemisphere)
                    .or_default()
                    .push(*connection);
            }
        }
        connections
    }

    /// Source and recorded neurons on each event output.
    pub fn neurons_on_event_output(&self) -> BTreeMap<NeuronEventOutput, BTreeSet<AtomicNeuron>> {
        let mut neurons: BTreeMap<NeuronEventOutput, BTreeSet<AtomicNeuron>> = BTreeMap::new();
        for a in self.source_neurons().union(&self.recorded_neurons()) {
            neurons.entry(a.event_output()).or_default().insert(*a);
        }
        neurons
    }

    /// Neurons emitting nothing anyone listens to. Their event output stays
    /// disabled.
    pub fn neither_recorded_nor_source_neurons(&self) -> BTreeSet<AtomicNeuron> {
        let sources = self.source_neurons();
        let recorded = self.recorded_neurons();
        self.instance
            .internal_populations()
            .flat_map(|(_, p)| p.atomic_neurons().copied())
            .filter(|a| !sources.contains(a) && !recorded.contains(a))
            .collect()
    }

    /// Fails fast on demand no allocation can satisfy.
    pub fn check(&self) -> Result<(), Error> {
        for (neuron, degree) in self.neuron_in_degree() {
            if degree > ROWS_PER_HEMISPHERE {
                return Err(Error::CapacityExceeded(format!(
                    "in-degree {} of {} exceeds {} synapse rows",
                    degree, neuron, ROWS_PER_HEMISPHERE
                )));
            }
        }
        for (neuron, degrees) in self.neuron_in_degree_per_bus() {
            for (bus, degree) in degrees {
                if degree > ROWS_PER_BUS {
                    return Err(Error::CapacityExceeded(format!(
                        "in-degree {} of {} on {} exceeds {} synapse rows",
                        degree, neuron, bus, ROWS_PER_BUS
                    )));
                }
            }
        }
        for (bus, rows) in self.num_rows_per_bus() {
            if rows > ROWS_PER_BUS {
                return Err(Error::CapacityExceeded(format!(
                    "{} synapse rows required on {}, only {} available",
                    rows, bus, ROWS_PER_BUS
                )));
            }
        }
        for (bus, sources) in self.num_background_sources_per_bus() {
            if sources > 1 {
                return Err(Error::CapacityExceeded(format!(
                    "{} background sources on {}, only one available",
                    sources, bus
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::*;
    use crate::routing::connection::{build_instance_connection_routing, expand_connections};
    use std::sync::Arc;

    fn constraints_of<T>(network: &Network, f: impl FnOnce(&RoutingConstraints) -> T) -> T {
        let instance = &network.execution_instances[&ExecutionInstance(0)];
        let routing = build_instance_connection_routing(instance).unwrap();
        let connections = expand_connections(instance, &routing).unwrap();
        f(&RoutingConstraints::new(instance, connections))
    }

    fn fan_in(external_size: usize, weight: u32) -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let external = builder.add(ExternalSourcePopulation::new(external_size)).unwrap();
        let internal = builder
            .add(Population::from_atomic_neurons(
                &[AtomicNeuron::new(Hemisphere::TOP, 0)],
                &[Receptor::excitatory()],
                false,
            ))
            .unwrap();
        let connections = (0..external_size).map(|i| Connection::new(i, 0, weight)).collect();
        builder
            .add(Projection::new(Receptor::excitatory(), connections, external, internal))
            .unwrap();
        builder.done()
    }

    fn recurrent(neurons: &[AtomicNeuron], receptor: Receptor) -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let population = builder
            .add(Population::from_atomic_neurons(
                neurons,
                &[Receptor::excitatory(), Receptor::inhibitory()],
                false,
            ))
            .unwrap();
        let n = neurons.len();
        builder
            .add(Projection::all_to_all(receptor, n, n, 1, population, population))
            .unwrap();
        builder.done()
    }

    #[test]
    fn in_degree_at_limit() {
        let _logger = env_logger::builder().is_test(true).try_init();
        constraints_of(&fan_in(ROWS_PER_HEMISPHERE, 1), |constraints| {
            assert_eq!(
                constraints.neuron_in_degree()[&AtomicNeuron::new(Hemisphere::TOP, 0)],
                ROWS_PER_HEMISPHERE
            );
            assert_eq!(constraints.external_connections()[&Hemisphere::TOP].len(), 256);
            assert_eq!(constraints.check(), Ok(()));
        });
    }

    #[test]
    fn in_degree_exceeded() {
        let _logger = env_logger::builder().is_test(true).try_init();
        constraints_of(&fan_in(ROWS_PER_HEMISPHERE + 1, 1), |constraints| {
            assert!(matches!(constraints.check(), Err(Error::CapacityExceeded(_))));
        });
        // split weights count as well
        constraints_of(&fan_in(ROWS_PER_HEMISPHERE / 2 + 1, 100), |constraints| {
            assert!(matches!(constraints.check(), Err(Error::CapacityExceeded(_))));
        });
    }

    #[test]
    fn rows_per_bus() {
        let _logger = env_logger::builder().is_test(true).try_init();
        // event output 0, i.e. bus 0
        let neurons = (0..32)
            .map(|c| AtomicNeuron::new(Hemisphere::TOP, c))
            .collect::<Vec<_>>();
        constraints_of(&recurrent(&neurons, Receptor::inhibitory()), |constraints| {
            let bus = BusOnChip::new(Hemisphere::TOP, 0);
            assert_eq!(constraints.num_rows_per_bus()[&bus], 32);
            let in_degree = constraints.neuron_in_degree_per_receptor_type();
            assert_eq!(in_degree[&neurons[0]][&ReceptorType::Inhibitory], 32);
            assert_eq!(
                constraints.num_rows_per_receptor_type_per_bus()[&bus][&ReceptorType::Inhibitory],
                32
            );
            let bus_constraints = constraints.bus_constraints();
            assert_eq!(bus_constraints[&bus].internal_connections.len(), 32 * 32);
            assert_eq!(bus_constraints[&bus].neuron_sources.len(), 32);
            // the other hemisphere sees the same event outputs
            assert_eq!(
                bus_constraints[&BusOnChip::new(Hemisphere::BOTTOM, 0)]
                    .neuron_sources
                    .len(),
                32
            );
            assert!(bus_constraints[&BusOnChip::new(Hemisphere::TOP, 1)]
                .neuron_sources
                .is_empty());
            assert!(constraints.neither_recorded_nor_source_neurons().is_empty());
            assert_eq!(constraints.check(), Ok(()));
        });

        // 65 sources on bus 0 into every neuron
        let mut neurons = (0..64)
            .map(|i| AtomicNeuron::new(Hemisphere::TOP, (i / 32) * 128 + i % 32))
            .collect::<Vec<_>>();
        neurons.push(AtomicNeuron::new(Hemisphere::BOTTOM, 0));
        constraints_of(&recurrent(&neurons, Receptor::excitatory()), |constraints| {
            assert!(matches!(constraints.check(), Err(Error::CapacityExceeded(_))));
        });
    }

    #[test]
    fn background_sources_per_bus() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut instance = NetworkInstance::default();
        for d in 0..2 {
            instance.populations.insert(
                PopulationDescriptor(d),
                PopulationKind::Background(BackgroundSourcePopulation {
                    size: 1,
                    coordinate: [(Hemisphere::TOP, 2)].iter().copied().collect(),
                    config: BackgroundSourceConfig::default(),
                }),
            );
        }
        let constraints = RoutingConstraints::new(&instance, Vec::new());
        assert_eq!(
            constraints.num_background_sources_per_bus()[&BusOnChip::new(Hemisphere::TOP, 2)],
            2
        );
        assert!(matches!(constraints.check(), Err(Error::CapacityExceeded(_))));
    }

    #[test]
    fn recorded_neurons() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut builder = NetworkBuilder::new();
        let neurons = (0..3)
            .map(|c| AtomicNeuron::new(Hemisphere::TOP, c))
            .collect::<Vec<_>>();
        let recorded = builder
            .add(Population::from_atomic_neurons(&neurons[..2], &[Receptor::excitatory()], true))
            .unwrap();
        let silent = builder
            .add(Population::from_atomic_neurons(&neurons[2..], &[Receptor::excitatory()], false))
            .unwrap();
        builder
            .add(Projection::one_to_one(Receptor::excitatory(), &[1], recorded, silent))
            .unwrap();
        constraints_of(&builder.done(), |constraints| {
            let bus = constraints.bus_constraints()[&BusOnChip::new(Hemisphere::TOP, 0)].clone();
            assert_eq!(bus.neuron_sources, [neurons[0]].iter().copied().collect());
            assert_eq!(bus.only_recorded_neurons, [neurons[1]].iter().copied().collect());
            assert_eq!(
                constraints.neither_recorded_nor_source_neurons(),
                [neurons[2]].iter().copied().collect()
            );
            assert_eq!(constraints.neurons_on_event_output()[&NeuronEventOutput(0)].len(), 2);
        });
    }
}
