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

use crate::chip::{AtomicNeuron, RowMode, SpikeLabel, SynapseRowOnChip, MAX_WEIGHT};
use crate::graph::{InstanceTranslation, NetworkGraph, Vertex};
use crate::network::{ExecutionInstance, NetworkInstance, PopulationKind};
use crate::Error;

fn invalid<T>(message: String) -> Result<T, Error> {
    Err(Error::InvalidNetworkGraph(message))
}

impl NetworkGraph {
    /// Whether the graph represents its network.
    pub fn valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(e) => {
                log::debug!("valid(): {}", e);
                false
            }
        }
    }

    /// Re-derives populations, labels, background sources, synapses and
    /// recordings from the graph and compares them with the network.
    pub fn validate(&self) -> Result<(), Error> {
        if !self
            .network
            .execution_instances
            .keys()
            .eq(self.translation.execution_instances.keys())
        {
            return invalid(String::from("execution instances differ from the network's"));
        }
        for (id, instance) in &self.network.execution_instances {
            let translation = &self.translation.execution_instances[id];
            self.validate_spike_labels(instance, translation)?;
            self.validate_populations(instance, translation)?;
            self.validate_background_sources(instance, translation)?;
            self.validate_projections(*id, instance, translation)?;
            self.validate_recordings(instance, translation)?;
        }
        Ok(())
    }

    fn validate_spike_labels(
        &self,
        instance: &NetworkInstance,
        translation: &InstanceTranslation,
    ) -> Result<(), Error> {
        for (descriptor, population) in &instance.populations {
            let size = translation.spike_labels.get(descriptor).map(Vec::len);
            if size != Some(population.size()) {
                return invalid(format!(
                    "{:?} has {:?} spike labels instead of {}",
                    descriptor,
                    size,
                    population.size()
                ));
            }
        }
        let mut unique = BTreeSet::new();
        for (descriptor, population) in instance.internal_populations() {
            let labels = &translation.spike_labels[&descriptor];
            for (n, neuron) in population.neurons.iter().enumerate() {
                for (compartment, config) in &neuron.compartments {
                    let master = match config.spike_master {
                        Some(master) if master.enable_record_spikes => master,
                        _ => continue,
                    };
                    let label = labels[n]
                        .get(compartment)
                        .and_then(|labels| labels.get(master.neuron_on_compartment))
                        .copied()
                        .flatten();
                    if let Some(label) = label {
                        if !unique.insert(label) {
                            return invalid(format!(
                                "label of recorded neuron {} of {:?} not unique",
                                n, descriptor
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_populations(
        &self,
        instance: &NetworkInstance,
        translation: &InstanceTranslation,
    ) -> Result<(), Error> {
        for (descriptor, population) in instance.internal_populations() {
            let vertices = match translation.neuron_vertices.get(&descriptor) {
                Some(vertices) => vertices,
                None => return invalid(format!("no neuron view for {:?}", descriptor)),
            };
            let mut hardware = BTreeSet::new();
            for (hemisphere, vertex) in vertices {
                let (h, columns, _) = match self.graph.vertex(*vertex)?.as_neuron_view() {
                    Some(view) => view,
                    None => return invalid(format!("{} is no neuron view", vertex)),
                };
                if h != *hemisphere {
                    return invalid(format!(
                        "neuron view of {:?} keyed by wrong hemisphere",
                        descriptor
                    ));
                }
                hardware.extend(columns.iter().map(|c| AtomicNeuron::new(h, *c)));
            }
            let abstract_neurons = population.atomic_neurons().copied().collect::<BTreeSet<_>>();
            if abstract_neurons != hardware {
                return invalid(format!("neurons of {:?} differ from its neuron views", descriptor));
            }

            let slots = translation.populations.get(&descriptor);
            let labels = &translation.spike_labels[&descriptor];
            for (n, neuron) in population.neurons.iter().enumerate() {
                for (compartment, atomic_neurons) in &neuron.coordinate.compartments {
                    for (i, atomic_neuron) in atomic_neurons.iter().enumerate() {
                        let slot = slots
                            .and_then(|slots| slots.get(n))
                            .and_then(|slots| slots.get(compartment))
                            .and_then(|slots| slots.get(i));
                        let (vertex, index) = match slot {
                            Some(slot) => *slot,
                            None => {
                                return invalid(format!(
                                    "{} of {:?} not translated",
                                    atomic_neuron, descriptor
                                ))
                            }
                        };
                        let (h, columns, view_labels) =
                            match self.graph.vertex(vertex)?.as_neuron_view() {
                                Some(view) => view,
                                None => return invalid(format!("{} is no neuron view", vertex)),
                            };
                        if h != atomic_neuron.hemisphere
                            || columns.get(index) != Some(&atomic_neuron.column)
                        {
                            return invalid(format!("slot of {} points elsewhere", atomic_neuron));
                        }
                        let actual = view_labels[index]
                            .map(|label| SpikeLabel::internal(atomic_neuron.event_output(), label));
                        let expected = labels[n]
                            .get(compartment)
                            .and_then(|l| l.get(i))
                            .copied()
                            .flatten();
                        if actual != expected {
                            return invalid(format!(
                                "{} emits {:?} instead of {:?}",
                                atomic_neuron, actual, expected
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_background_sources(
        &self,
        instance: &NetworkInstance,
        translation: &InstanceTranslation,
    ) -> Result<(), Error> {
        for (descriptor, population) in &instance.populations {
            let population = match population {
                PopulationKind::Background(population) => population,
                _ => continue,
            };
            let vertices = translation.background_spike_source_vertices.get(descriptor);
            for (entry, (hemisphere, index)) in population.coordinate.iter().enumerate() {
                let vertex = match vertices.and_then(|v| v.get(hemisphere)) {
                    Some(vertex) => self.graph.vertex(*vertex)?,
                    None => {
                        return invalid(format!(
                            "no background source vertex for {:?} on {}",
                            descriptor, hemisphere
                        ))
                    }
                };
                let (bus, config, label, mask) = match vertex {
                    Vertex::BackgroundSource {
                        bus,
                        config,
                        label,
                        mask,
                    } => (bus, config, label, mask),
                    _ => {
                        return invalid(format!(
                            "vertex of {:?} is no background source",
                            descriptor
                        ))
                    }
                };
                if bus.hemisphere != *hemisphere || bus.index != *index {
                    return invalid(format!(
                        "background source of {:?} on {} instead",
                        descriptor, bus
                    ));
                }
                if *config != population.config {
                    return invalid(format!("background source config of {:?} differs", descriptor));
                }
                if config.enable_random && 1usize << mask.count_ones() != population.size {
                    return invalid(format!(
                        "background source mask of {:?} does not match its size",
                        descriptor
                    ));
                }
                for i in 0..population.size {
                    let expected = translation.spike_labels[descriptor][i]
                        .values()
                        .next()
                        .and_then(|labels| labels.get(entry))
                        .copied()
                        .flatten();
                    let expected = match expected {
                        Some(label) => label.neuron_label().0 & !mask,
                        None => {
                            return invalid(format!(
                                "background source {} of {:?} without label",
                                i, descriptor
                            ))
                        }
                    };
                    if label.0 & !mask != expected {
                        return invalid(format!(
                            "background source {} of {:?} emits wrong label",
                            i, descriptor
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_projections(
        &self,
        id: ExecutionInstance,
        instance: &NetworkInstance,
        translation: &InstanceTranslation,
    ) -> Result<(), Error> {
        for (descriptor, projection) in &instance.projections {
            let vertices = match translation.synapse_vertices.get(descriptor) {
                Some(vertices) => vertices,
                None => return invalid(format!("{:?} not represented", descriptor)),
            };
            let mode = RowMode::from(projection.receptor.receptor_type);
            let mut row_modes: BTreeMap<SynapseRowOnChip, RowMode> = BTreeMap::new();
            for vertex in vertices.values() {
                for edge in self.graph.in_edges(*vertex)? {
                    let (driver, _) = self.graph.edge_endpoints(edge)?;
                    let driver = self.graph.vertex(driver)?.as_synapse_driver();
                    if let Some((coordinate, config)) = driver {
                        for (row, mode) in coordinate.rows().iter().zip(config.row_modes.iter()) {
                            row_modes.insert(*row, *mode);
                        }
                    }
                }
            }
            let post = match instance.internal_population(projection.population_post) {
                Some(post) => post,
                None => return invalid(format!("{:?} has no on-chip target", descriptor)),
            };
            let num = translation.projections.get(descriptor).map(Vec::len);
            if num != Some(projection.connections.len()) {
                return invalid(format!("connections of {:?} not translated", descriptor));
            }
            for (i, connection) in projection.connections.iter().enumerate() {
                let placed = self.placed_connection(id, *descriptor, i)?;
                let sum: u32 = placed.iter().map(|p| p.weight).sum();
                if placed.is_empty() || sum != connection.weight {
                    return invalid(format!(
                        "connection {} of {:?} has weight {} instead of {}",
                        i, descriptor, sum, connection.weight
                    ));
                }
                let (index_post, compartment) = connection.index_post;
                let targets = post
                    .neurons
                    .get(index_post)
                    .and_then(|neuron| neuron.coordinate.compartments.get(&compartment))
                    .map(|atomic_neurons| atomic_neurons.iter().copied().collect::<BTreeSet<_>>())
                    .unwrap_or_default();
                for synapse in placed {
                    if synapse.weight > MAX_WEIGHT {
                        return invalid(format!(
                            "synapse weight {} exceeds {}",
                            synapse.weight, MAX_WEIGHT
                        ));
                    }
                    let target = AtomicNeuron::new(synapse.row.hemisphere, synapse.column);
                    if !targets.contains(&target) {
                        return invalid(format!(
                            "connection {} of {:?} targets the wrong neuron",
                            i, descriptor
                        ));
                    }
                    if row_modes.get(&synapse.row) != Some(&mode) {
                        return invalid(format!(
                            "row {:?} of {:?} not in mode {:?}",
                            synapse.row, descriptor, mode
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_recordings(
        &self,
        instance: &NetworkInstance,
        translation: &InstanceTranslation,
    ) -> Result<(), Error> {
        if instance.madc_recording.is_some() != translation.madc_sample_output_vertex.is_some() {
            return invalid(String::from("MADC recording not represented"));
        }
        let cadc = instance
            .cadc_recording
            .as_ref()
            .map_or(false, |recording| !recording.neurons.is_empty());
        if cadc == translation.cadc_sample_output_vertices.is_empty() {
            return invalid(String::from("CADC recording not represented"));
        }
        if !instance
            .recorded_pads()
            .iter()
            .eq(translation.pad_readout_vertices.keys())
        {
            return invalid(String::from("pad recordings not represented"));
        }
        let recorded = instance
            .internal_populations()
            .any(|(_, p)| p.neurons.iter().any(|n| n.records_spikes()));
        if recorded && translation.event_output_vertex.is_none() {
            return invalid(String::from("recorded spikes have no output"));
        }
        for (descriptor, rule) in &instance.plasticity_rules {
            if !translation.plasticity_rule_vertices.contains_key(descriptor) {
                return invalid(format!("{:?} not represented", descriptor));
            }
            let output = translation
                .plasticity_rule_output_vertices
                .contains_key(descriptor);
            if rule.recording.is_some() != output {
                return invalid(format!("recording of {:?} not represented", descriptor));
            }
        }
        Ok(())
    }
}
