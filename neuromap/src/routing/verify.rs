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

//! Event delivery check of a routing result.
//!
//! Every emitter's label is sent through the configured crossbar nodes,
//! synapse drivers and synapse labels. The synapses it activates must be
//! exactly the ones placed for its connections.

use std::collections::{BTreeMap, BTreeSet};

use crate::chip::{
    forwards, BusOnChip, CrossbarInput, RowMode, SpikeLabel, SynapseLabel, SynapseRowOnChip,
    MAX_WEIGHT,
};
use crate::network::{Network, NetworkInstance, PopulationKind};
use crate::routing::connection::{connection_source, Source};
use crate::routing::result::{InstanceRoutingResult, RoutingResult};
use crate::Error;

type Synapse = (SynapseRowOnChip, u16);

fn invalid<T>(message: String) -> Result<T, Error> {
    Err(Error::InvalidRoutingResult(message))
}

pub fn verify_routing(network: &Network, result: &RoutingResult) -> Result<(), Error> {
    if !network
        .execution_instances
        .keys()
        .eq(result.execution_instances.keys())
    {
        return invalid(String::from("execution instances differ"));
    }
    for (id, instance) in &network.execution_instances {
        log::trace!("verifying routing of {}", id);
        verify_instance(instance, &result.execution_instances[id])?;
    }
    Ok(())
}

fn emitters(
    instance: &NetworkInstance,
    result: &InstanceRoutingResult,
) -> Vec<(Source, CrossbarInput, SpikeLabel)> {
    let mut emitters = Vec::new();
    for (descriptor, population) in &instance.populations {
        match population {
            PopulationKind::Internal(population) => {
                let labels = match result.internal_neuron_labels.get(descriptor) {
                    Some(labels) => labels,
                    None => continue,
                };
                for (neuron, labels) in population.neurons.iter().zip(labels) {
                    for (compartment, atomic_neurons) in &neuron.coordinate.compartments {
                        let labels = labels.get(compartment).into_iter().flatten();
                        for (a, label) in atomic_neurons.iter().zip(labels) {
                            if let Some(label) = label {
                                let event_output = a.event_output();
                                emitters.push((
                                    Source::Internal(*a),
                                    event_output.crossbar_input(),
                                    SpikeLabel::internal(event_output, *label),
                                ));
                            }
                        }
                    }
                }
            }
            PopulationKind::External(_) => {
                let labels = result.external_spike_labels.get(descriptor);
                for (index, labels) in labels.into_iter().flatten().enumerate() {
                    for label in labels {
                        let source = Source::External {
                            population: *descriptor,
                            index,
                        };
                        emitters.push((source, label.spl1_address().crossbar_input(), *label));
                    }
                }
            }
            PopulationKind::Background(background) => {
                let labels = result.background_spike_labels.get(descriptor);
                for (hemisphere, labels) in labels.into_iter().flatten() {
                    let bus = match background.coordinate.get(hemisphere) {
                        Some(index) => BusOnChip::new(*hemisphere, *index),
                        None => continue,
                    };
                    for (index, label) in labels.iter().enumerate() {
                        let source = Source::Background {
                            population: *descriptor,
                            index,
                        };
                        emitters.push((source, bus.background_source().crossbar_input(), *label));
                    }
                }
            }
        }
    }
    emitters
}

fn verify_instance(
    instance: &NetworkInstance,
    result: &InstanceRoutingResult,
) -> Result<(), Error> {
    let mut synapses: BTreeMap<Synapse, SynapseLabel> = BTreeMap::new();
    let mut expected: BTreeMap<Source, BTreeSet<Synapse>> = BTreeMap::new();
    for (descriptor, projection) in &instance.projections {
        let placed = match result.connections.get(descriptor) {
            Some(placed) if placed.len() == projection.connections.len() => placed,
            _ => return invalid(format!("placement of {:?} incomplete", descriptor)),
        };
        let mode = RowMode::from(projection.receptor.receptor_type);
        for (i, (connection, placed)) in projection.connections.iter().zip(placed).enumerate() {
            let sum: u32 = placed.iter().map(|p| p.weight).sum();
            if sum != connection.weight || placed.is_empty() {
                return invalid(format!(
                    "connection {} of {:?} realizes weight {} instead of {}",
                    i, descriptor, sum, connection.weight
                ));
            }
            let source = connection_source(instance, *descriptor, i)?;
            for p in placed {
                if p.weight > MAX_WEIGHT {
                    return invalid(format!("synapse weight {} exceeds {}", p.weight, MAX_WEIGHT));
                }
                let driver = p.row.synapse_driver();
                let row_mode = result
                    .synapse_drivers
                    .get(&driver)
                    .map(|config| config.row_modes[(p.row.row % 2) as usize]);
                if row_mode != Some(mode) {
                    return invalid(format!(
                        "row {:?} has mode {:?} instead of {:?}",
                        p.row, row_mode, mode
                    ));
                }
                if synapses.insert((p.row, p.column), p.label).is_some() {
                    return invalid(format!(
                        "synapse at {:?}, column {} used twice",
                        p.row, p.column
                    ));
                }
                expected.entry(source).or_default().insert((p.row, p.column));
            }
        }
    }

    let mut activated: BTreeMap<Source, BTreeSet<Synapse>> = BTreeMap::new();
    for (source, input, label) in emitters(instance, result) {
        let activated = activated.entry(source).or_default();
        let buses = result
            .crossbar_nodes
            .iter()
            .filter(|(node, config)| node.input == input && config.forwards(label))
            .filter_map(|(node, _)| node.output.bus());
        for bus in buses {
            for driver in bus.synapse_drivers() {
                let config = match result.synapse_drivers.get(&driver) {
                    Some(config) if forwards(label.row_select(), config.mask, driver.driver) => {
                        config
                    }
                    _ => continue,
                };
                for (row, mode) in driver.rows().iter().zip(config.row_modes.iter()) {
                    if *mode == RowMode::Disabled {
                        continue;
                    }
                    let hits = synapses
                        .range((*row, 0)..=(*row, u16::MAX))
                        .filter(|(_, l)| **l == label.synapse_label())
                        .map(|(synapse, _)| *synapse);
                    activated.extend(hits);
                }
            }
        }
    }

    for source in expected.keys() {
        if !activated.contains_key(source) {
            return invalid(format!("{:?} has synapses but emits no events", source));
        }
    }
    for (source, activated) in &activated {
        let wanted = expected.get(source).cloned().unwrap_or_default();
        if *activated != wanted {
            return invalid(format!(
                "{:?} activates {} synapse(s) of which {} unexpected, {} expected",
                source,
                activated.len(),
                activated.difference(&wanted).count(),
                wanted.len()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{AtomicNeuron, Hemisphere};
    use crate::network::*;
    use crate::routing::{GreedyRouter, Router};
    use std::sync::Arc;

    fn recurrent() -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let neurons = (0..4u16)
            .map(|i| AtomicNeuron::new(Hemisphere(i as u8 % 2), i * 40))
            .collect::<Vec<_>>();
        let receptors = [Receptor::excitatory(), Receptor::inhibitory()];
        let population = builder
            .add(Population::from_atomic_neurons(&neurons, &receptors, true))
            .unwrap();
        let external = builder.add(ExternalSourcePopulation::new(4)).unwrap();
        builder
            .add(Projection::all_to_all(Receptor::inhibitory(), 4, 4, 80, population, population))
            .unwrap();
        builder
            .add(Projection::one_to_one(
                Receptor::excitatory(),
                &[5, 6, 7, 8],
                external,
                population,
            ))
            .unwrap();
        builder.done()
    }

    fn routed() -> (Arc<Network>, RoutingResult) {
        let network = recurrent();
        let result = GreedyRouter::default().route(&network).unwrap();
        (network, result)
    }

    fn instance(result: &mut RoutingResult) -> &mut InstanceRoutingResult {
        result
            .execution_instances
            .get_mut(&ExecutionInstance(0))
            .unwrap()
    }

    #[test]
    fn routed_network_is_valid() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, result) = routed();
        assert_eq!(verify_routing(&network, &result), Ok(()));
    }

    #[test]
    fn weight_mismatch() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, mut result) = routed();
        let placed = instance(&mut result)
            .connections
            .get_mut(&ProjectionDescriptor(1))
            .unwrap();
        placed[0][0].weight += 1;
        assert!(matches!(
            verify_routing(&network, &result),
            Err(Error::InvalidRoutingResult(_))
        ));
    }

    #[test]
    fn missing_crossbar_node() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, mut result) = routed();
        let nodes = &mut instance(&mut result).crossbar_nodes;
        let first = *nodes
            .keys()
            .find(|node| node.output.bus().is_some())
            .unwrap();
        nodes.remove(&first);
        assert!(matches!(
            verify_routing(&network, &result),
            Err(Error::InvalidRoutingResult(_))
        ));
    }

    #[test]
    fn wrong_row_mode() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, mut result) = routed();
        let instance = instance(&mut result);
        let row = instance.connections[&ProjectionDescriptor(0)][0][0].row;
        let config = instance
            .synapse_drivers
            .get_mut(&row.synapse_driver())
            .unwrap();
        config.row_modes[(row.row % 2) as usize] = RowMode::Excitatory;
        assert!(matches!(
            verify_routing(&network, &result),
            Err(Error::InvalidRoutingResult(_))
        ));
    }

    #[test]
    fn shared_synapse() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, mut result) = routed();
        let placed = instance(&mut result)
            .connections
            .get_mut(&ProjectionDescriptor(0))
            .unwrap();
        let first = placed[0][0];
        placed[1][0].row = first.row;
        placed[1][0].column = first.column;
        assert!(verify_routing(&network, &result).is_err());
    }

    #[test]
    fn foreign_execution_instance() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (network, mut result) = routed();
        let routed = result.execution_instances.remove(&ExecutionInstance(0)).unwrap();
        result.execution_instances.insert(ExecutionInstance(1), routed);
        assert!(verify_routing(&network, &result).is_err());
    }
}
