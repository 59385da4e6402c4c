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
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::Level;
use propgraph::VertexDescriptor;

use crate::chip::{
    AtomicNeuron, BusOnChip, CrossbarInputKind, CrossbarL2Output, CrossbarNodeOnChip, Hemisphere,
    NeuronEventOutput, SpikeLabel, SynapseDriverOnChip, BUSES,
};
use crate::graph::{
    Edge, Graph, GraphTranslation, InstanceTranslation, NetworkGraph, Slot, Vertex,
};
use crate::network::{
    CompartmentOnNeuron, ExecutionInstance, Network, NetworkInstance, PopulationKind,
    PlasticityRule, ProjectionDescriptor, ReadoutSource, RecordedNeuron,
};
use crate::observe::{log_observer, Event, SharedObserver};
use crate::routing::{
    connection_source, InstanceRoutingResult, PlacedConnection, RoutingResult, Source,
};
use crate::Error;

/// Hardware coordinates whose vertex is shared by everything using them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Resource {
    CrossbarNode(CrossbarNodeOnChip),
    PadiBus(BusOnChip),
    SynapseDriver(SynapseDriverOnChip),
    NeuronEventOutput(NeuronEventOutput),
    CrossbarL2Output(CrossbarL2Output),
}

fn routing_error<T>(message: String) -> Result<T, Error> {
    Err(Error::InvalidRoutingResult(message))
}

fn graph_error<T>(message: String) -> Result<T, Error> {
    Err(Error::InvalidNetworkGraph(message))
}

pub fn build_network_graph(
    network: Arc<Network>,
    routing: &RoutingResult,
) -> Result<NetworkGraph, Error> {
    build_network_graph_with_observer(network, routing, log_observer())
}

/// Lowers every execution instance of `network` using its routing, then
/// checks the graph against the network.
pub fn build_network_graph_with_observer(
    network: Arc<Network>,
    routing: &RoutingResult,
    observer: SharedObserver,
) -> Result<NetworkGraph, Error> {
    let start = Instant::now();
    if !network
        .execution_instances
        .keys()
        .eq(routing.execution_instances.keys())
    {
        return routing_error(String::from("execution instances differ from the network's"));
    }
    let mut graph = Graph::new();
    let mut translation = GraphTranslation::default();
    for (id, instance) in &network.execution_instances {
        let routed = &routing.execution_instances[id];
        let builder = InstanceBuilder::new(*id, instance, routed, &mut graph);
        translation.execution_instances.insert(*id, builder.build()?);
    }
    let mut network_graph = NetworkGraph {
        network,
        graph,
        translation,
        construction_duration: start.elapsed(),
        verification_duration: Duration::ZERO,
        routing_duration: routing.timing_statistics.routing,
    };
    observer.observe(
        Event::new(
            Level::Debug,
            "network_graph",
            format!(
                "built graph with {} vertices and {} edges",
                network_graph.graph.vertex_count(),
                network_graph.graph.edge_count()
            ),
        )
        .with_duration(network_graph.construction_duration),
    );

    let start = Instant::now();
    network_graph.validate()?;
    network_graph.verification_duration = start.elapsed();
    observer.observe(
        Event::new(Level::Debug, "network_graph", "graph matches network")
            .with_duration(network_graph.verification_duration),
    );
    Ok(network_graph)
}

struct InstanceBuilder<'a> {
    id: ExecutionInstance,
    instance: &'a NetworkInstance,
    routing: &'a InstanceRoutingResult,
    graph: &'a mut Graph,
    translation: InstanceTranslation,
    resources: BTreeMap<Resource, VertexDescriptor>,
    l2_input: Option<VertexDescriptor>,
    neurons: BTreeMap<AtomicNeuron, Slot>,
}

impl<'a> InstanceBuilder<'a> {
    fn new(
        id: ExecutionInstance,
        instance: &'a NetworkInstance,
        routing: &'a InstanceRoutingResult,
        graph: &'a mut Graph,
    ) -> Self {
        Self {
            id,
            instance,
            routing,
            graph,
            translation: InstanceTranslation::default(),
            resources: BTreeMap::new(),
            l2_input: None,
            neurons: BTreeMap::new(),
        }
    }

    fn build(mut self) -> Result<InstanceTranslation, Error> {
        log::trace!("lowering {}", self.id);
        self.add_external_input()?;
        self.add_background_spike_sources()?;
        self.add_populations()?;
        self.add_madc_recording()?;
        self.add_cadc_recording()?;
        self.add_pad_recording()?;
        self.add_neuron_event_outputs()?;
        self.add_external_output()?;
        self.add_projections()?;
        self.add_plasticity_rules()?;
        Ok(self.translation)
    }

    /// Connects `source` to `target`, extending the ports of an existing edge.
    fn connect(
        &mut self,
        source: VertexDescriptor,
        target: VertexDescriptor,
        ports: &[u16],
    ) -> Result<(), Error> {
        match self.graph.find_edge(source, target) {
            Some(edge) => self.graph.edge_mut(edge)?.merge(ports),
            None => {
                self.graph.add_edge(source, target, Edge::new(ports.to_vec()))?;
            }
        }
        Ok(())
    }

    /// Vertex of a shared resource, created on first use. Reuse only adds
    /// the new inputs.
    fn resource(
        &mut self,
        key: Resource,
        vertex: impl FnOnce() -> Vertex,
        inputs: &[VertexDescriptor],
    ) -> Result<VertexDescriptor, Error> {
        let descriptor = match self.resources.get(&key) {
            Some(descriptor) => *descriptor,
            None => {
                let descriptor = self.graph.add_vertex(vertex());
                self.resources.insert(key, descriptor);
                descriptor
            }
        };
        for input in inputs {
            self.connect(*input, descriptor, &[])?;
        }
        Ok(descriptor)
    }

    fn add_external_input(&mut self) -> Result<(), Error> {
        let mut size = 0;
        for (descriptor, population) in &self.instance.populations {
            let population = match population {
                PopulationKind::External(population) => population,
                _ => continue,
            };
            size += population.size;
            let labels = self.routing.external_spike_labels.get(descriptor);
            let labels = (0..population.size)
                .map(|i| {
                    let labels = labels
                        .and_then(|labels| labels.get(i))
                        .map(|labels| labels.iter().copied().map(Some).collect::<Vec<_>>())
                        .unwrap_or_default();
                    let mut compartments = BTreeMap::new();
                    compartments.insert(CompartmentOnNeuron(0), labels);
                    compartments
                })
                .collect();
            self.translation.spike_labels.insert(*descriptor, labels);
        }
        if size == 0 {
            return Ok(());
        }
        let input = self.graph.add_vertex(Vertex::ExternalInput { size });
        let l2_input = self.graph.add_vertex(Vertex::CrossbarL2Input);
        self.connect(input, l2_input, &[])?;
        self.translation.event_input_vertex = Some(input);
        self.l2_input = Some(l2_input);
        Ok(())
    }

    fn add_background_spike_sources(&mut self) -> Result<(), Error> {
        for (descriptor, population) in &self.instance.populations {
            let population = match population {
                PopulationKind::Background(population) => population,
                _ => continue,
            };
            let mut labels = vec![BTreeMap::new(); population.size];
            let mut vertices = BTreeMap::new();
            for (h, index) in &population.coordinate {
                let routed = self
                    .routing
                    .background_spike_labels
                    .get(descriptor)
                    .and_then(|labels| labels.get(h))
                    .filter(|labels| labels.len() == population.size);
                let routed = match routed {
                    Some(routed) => routed,
                    None => {
                        return routing_error(format!(
                            "labels of {:?} on {} missing",
                            descriptor, h
                        ))
                    }
                };
                let label = match routed.first() {
                    Some(label) => label.neuron_label(),
                    None => return routing_error(format!("{:?} has no sources", descriptor)),
                };
                let mask = if population.config.enable_random {
                    (population.size - 1) as u16
                } else {
                    0
                };
                let vertex = self.graph.add_vertex(Vertex::BackgroundSource {
                    bus: BusOnChip::new(*h, *index),
                    config: population.config,
                    label,
                    mask,
                });
                vertices.insert(*h, vertex);
                for (compartments, label) in labels.iter_mut().zip(routed) {
                    compartments
                        .entry(CompartmentOnNeuron(0))
                        .or_insert_with(Vec::new)
                        .push(Some(*label));
                }
            }
            self.translation
                .background_spike_source_vertices
                .insert(*descriptor, vertices);
            self.translation.spike_labels.insert(*descriptor, labels);
        }
        Ok(())
    }

    fn add_populations(&mut self) -> Result<(), Error> {
        for (descriptor, population) in self.instance.internal_populations() {
            let routed = match self.routing.internal_neuron_labels.get(&descriptor) {
                Some(routed) if routed.len() == population.neurons.len() => routed,
                _ => return routing_error(format!("neuron labels of {:?} missing", descriptor)),
            };
            // per hemisphere: (neuron, compartment, atomic neuron, label)
            let mut views: BTreeMap<Hemisphere, Vec<_>> = BTreeMap::new();
            let mut spike_labels = Vec::with_capacity(population.neurons.len());
            for (n, (neuron, routed)) in population.neurons.iter().zip(routed).enumerate() {
                let mut compartment_labels = BTreeMap::new();
                for (compartment, atomic_neurons) in &neuron.coordinate.compartments {
                    let routed = routed.get(compartment).map(Vec::as_slice).unwrap_or(&[]);
                    if routed.len() != atomic_neurons.len() {
                        return routing_error(format!(
                            "neuron labels of {:?}, neuron {} incomplete",
                            descriptor, n
                        ));
                    }
                    let labelled = atomic_neurons.iter().zip(routed);
                    for (i, (atomic_neuron, label)) in labelled.enumerate() {
                        views
                            .entry(atomic_neuron.hemisphere)
                            .or_default()
                            .push((n, *compartment, i, *atomic_neuron, *label));
                    }
                    let labels = atomic_neurons
                        .iter()
                        .zip(routed)
                        .map(|(a, label)| {
                            label.map(|label| SpikeLabel::internal(a.event_output(), label))
                        })
                        .collect();
                    compartment_labels.insert(*compartment, labels);
                }
                spike_labels.push(compartment_labels);
            }

            let mut vertices = BTreeMap::new();
            let mut located = BTreeMap::new();
            for (hemisphere, entries) in views {
                let vertex = self.graph.add_vertex(Vertex::NeuronView {
                    hemisphere,
                    columns: entries.iter().map(|e| e.3.column).collect(),
                    labels: entries.iter().map(|e| e.4).collect(),
                });
                vertices.insert(hemisphere, vertex);
                let entries = entries.into_iter().enumerate();
                for (slot, (n, compartment, i, atomic_neuron, _)) in entries {
                    self.neurons.insert(atomic_neuron, (vertex, slot));
                    located.insert((n, compartment, i), (vertex, slot));
                }
            }
            let slots = population
                .neurons
                .iter()
                .enumerate()
                .map(|(n, neuron)| {
                    neuron
                        .coordinate
                        .compartments
                        .iter()
                        .map(|(c, atomic_neurons)| {
                            let slots = (0..atomic_neurons.len())
                                .filter_map(|i| located.get(&(n, *c, i)).copied())
                                .collect::<Vec<Slot>>();
                            (*c, slots)
                        })
                        .collect()
                })
                .collect();
            self.translation.neuron_vertices.insert(descriptor, vertices);
            self.translation.populations.insert(descriptor, slots);
            self.translation.spike_labels.insert(descriptor, spike_labels);
        }
        Ok(())
    }

    /// Neuron view inputs of a readout: one per view, listing the columns.
    fn readout_inputs(
        &self,
        neurons: &[AtomicNeuron],
    ) -> Result<BTreeMap<VertexDescriptor, Vec<u16>>, Error> {
        let mut inputs: BTreeMap<VertexDescriptor, Vec<u16>> = BTreeMap::new();
        for neuron in neurons {
            let (vertex, _) = match self.neurons.get(neuron) {
                Some(slot) => *slot,
                None => return graph_error(format!("no neuron view holds {}", neuron)),
            };
            inputs.entry(vertex).or_default().push(neuron.column);
        }
        Ok(inputs)
    }

    fn resolve(
        &self,
        recorded: &[RecordedNeuron],
    ) -> Result<Vec<(AtomicNeuron, ReadoutSource)>, Error> {
        recorded
            .iter()
            .map(|neuron| {
                self.instance
                    .resolve(&neuron.coordinate)
                    .map(|atomic_neuron| (atomic_neuron, neuron.source))
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "recorded neuron {:?} not present",
                            neuron.coordinate
                        ))
                    })
            })
            .collect()
    }

    fn add_readout(
        &mut self,
        vertex: Vertex,
        neurons: &[AtomicNeuron],
    ) -> Result<VertexDescriptor, Error> {
        let inputs = self.readout_inputs(neurons)?;
        let readout = self.graph.add_vertex(vertex);
        for (input, columns) in inputs {
            self.connect(input, readout, &columns)?;
        }
        Ok(readout)
    }

    fn add_madc_recording(&mut self) -> Result<(), Error> {
        let instance = self.instance;
        let recording = match &instance.madc_recording {
            Some(recording) => recording,
            None => return Ok(()),
        };
        let neurons = self.resolve(&recording.neurons)?;
        let atomic_neurons = neurons.iter().map(|n| n.0).collect::<Vec<_>>();
        let vertex = self.add_readout(Vertex::MadcReadout { neurons }, &atomic_neurons)?;
        self.translation.madc_sample_output_vertex = Some(vertex);
        Ok(())
    }

    fn add_cadc_recording(&mut self) -> Result<(), Error> {
        let instance = self.instance;
        let recording = match &instance.cadc_recording {
            Some(recording) => recording,
            None => return Ok(()),
        };
        let mut per_hemisphere: BTreeMap<Hemisphere, Vec<_>> = BTreeMap::new();
        for neuron in self.resolve(&recording.neurons)? {
            per_hemisphere.entry(neuron.0.hemisphere).or_default().push(neuron);
        }
        for (hemisphere, neurons) in per_hemisphere {
            let atomic_neurons = neurons.iter().map(|n| n.0).collect::<Vec<_>>();
            let readout = Vertex::CadcReadout { hemisphere, neurons };
            let vertex = self.add_readout(readout, &atomic_neurons)?;
            self.translation.cadc_sample_output_vertices.push(vertex);
        }
        Ok(())
    }

    fn add_pad_recording(&mut self) -> Result<(), Error> {
        let instance = self.instance;
        let recording = match &instance.pad_recording {
            Some(recording) => recording,
            None => return Ok(()),
        };
        for (pad, source) in &recording.recordings {
            let (neuron, readout) = self.resolve(&[source.neuron])?[0];
            let vertex = Vertex::PadReadout {
                pad: *pad,
                neuron,
                source: readout,
                enable_buffered: source.enable_buffered,
            };
            let vertex = self.add_readout(vertex, &[neuron])?;
            self.translation.pad_readout_vertices.insert(*pad, vertex);
        }
        Ok(())
    }

    fn add_neuron_event_outputs(&mut self) -> Result<(), Error> {
        let mut outputs: BTreeMap<(VertexDescriptor, NeuronEventOutput), Vec<u16>> =
            BTreeMap::new();
        for vertices in self.translation.neuron_vertices.values() {
            for vertex in vertices.values() {
                let (hemisphere, columns, labels) =
                    match self.graph.vertex(*vertex)?.as_neuron_view() {
                        Some(view) => view,
                        None => return graph_error(format!("{} is no neuron view", vertex)),
                    };
                for (column, label) in columns.iter().zip(labels) {
                    if label.is_some() {
                        let output = AtomicNeuron::new(hemisphere, *column).event_output();
                        outputs.entry((*vertex, output)).or_default().push(*column);
                    }
                }
            }
        }
        for ((view, output), columns) in outputs {
            let vertex = self.resource(
                Resource::NeuronEventOutput(output),
                || Vertex::NeuronEventOutput { coordinate: output },
                &[],
            )?;
            self.connect(view, vertex, &columns)?;
        }
        Ok(())
    }

    fn event_output_vertex(&self, output: NeuronEventOutput) -> Result<VertexDescriptor, Error> {
        match self.resources.get(&Resource::NeuronEventOutput(output)) {
            Some(vertex) => Ok(*vertex),
            None => graph_error(format!("{:?} emits no events", output)),
        }
    }

    fn add_external_output(&mut self) -> Result<(), Error> {
        let recorded = self
            .routing
            .crossbar_nodes
            .iter()
            .filter(|(node, _)| node.output.bus().is_none())
            .map(|(node, config)| (*node, *config))
            .collect::<Vec<_>>();
        if recorded.is_empty() {
            return Ok(());
        }
        let mut l2_outputs = BTreeSet::new();
        for (node, config) in recorded {
            let output = match node.input.kind() {
                CrossbarInputKind::NeuronEventOutput(output) => output,
                kind => return routing_error(format!("{:?} recorded through the crossbar", kind)),
            };
            let source = self.event_output_vertex(output)?;
            let crossbar_node = self.resource(
                Resource::CrossbarNode(node),
                || Vertex::CrossbarNode {
                    coordinate: node,
                    config,
                },
                &[source],
            )?;
            let l2_output = CrossbarL2Output(node.output.0 - BUSES as u8);
            let l2_vertex = self.resource(
                Resource::CrossbarL2Output(l2_output),
                || Vertex::CrossbarL2Output {
                    coordinate: l2_output,
                },
                &[crossbar_node],
            )?;
            l2_outputs.insert(l2_vertex);
        }
        let output = self.graph.add_vertex(Vertex::ExternalOutput);
        for l2_output in l2_outputs {
            self.connect(l2_output, output, &[])?;
        }
        self.translation.event_output_vertex = Some(output);
        Ok(())
    }

    fn presynaptic_vertex_present(&self, descriptor: ProjectionDescriptor) -> bool {
        let pre = self.instance.projections[&descriptor].population_pre;
        match self.instance.populations.get(&pre) {
            Some(PopulationKind::Internal(_)) => {
                self.translation.neuron_vertices.contains_key(&pre)
            }
            Some(PopulationKind::External(_)) => self.l2_input.is_some(),
            Some(PopulationKind::Background(_)) => self
                .translation
                .background_spike_source_vertices
                .contains_key(&pre),
            None => false,
        }
    }

    /// Adds projections once their presynaptic vertices exist, in as many
    /// passes as there are projections at most.
    fn add_projections(&mut self) -> Result<(), Error> {
        let mut pending = self.instance.projections.keys().copied().collect::<Vec<_>>();
        for _ in 0..=self.instance.projections.len() {
            if pending.is_empty() {
                return Ok(());
            }
            let mut next = Vec::new();
            for descriptor in pending {
                if self.presynaptic_vertex_present(descriptor) {
                    self.add_projection(descriptor)?;
                } else {
                    next.push(descriptor);
                }
            }
            pending = next;
        }
        if pending.is_empty() {
            Ok(())
        } else {
            graph_error(format!("presynaptic vertices of {:?} never present", pending))
        }
    }

    /// Vertices feeding `bus` with the events of `sources` through the
    /// crossbar.
    fn add_padi_bus(
        &mut self,
        bus: BusOnChip,
        descriptor: ProjectionDescriptor,
        sources: &BTreeSet<Source>,
    ) -> Result<VertexDescriptor, Error> {
        let pre = self.instance.projections[&descriptor].population_pre;
        let external = matches!(
            self.instance.populations.get(&pre),
            Some(PopulationKind::External(_))
        );
        let event_outputs = sources
            .iter()
            .filter_map(|source| match source {
                Source::Internal(a) => Some(a.event_output()),
                _ => None,
            })
            .collect::<BTreeSet<_>>();
        let nodes = self
            .routing
            .crossbar_nodes
            .iter()
            .filter(|(node, _)| node.output == bus.crossbar_output())
            .map(|(node, config)| (*node, *config))
            .collect::<Vec<_>>();
        let mut inputs = Vec::new();
        for (node, config) in nodes {
            let source = match node.input.kind() {
                CrossbarInputKind::NeuronEventOutput(output) if event_outputs.contains(&output) => {
                    self.event_output_vertex(output)?
                }
                CrossbarInputKind::L2(_) if external => {
                    match self.l2_input {
                        Some(vertex) => vertex,
                        None => return graph_error(String::from("no external input")),
                    }
                }
                CrossbarInputKind::Background(source) if source.bus() == bus => {
                    match self
                        .translation
                        .background_spike_source_vertices
                        .get(&pre)
                        .and_then(|vertices| vertices.get(&bus.hemisphere))
                    {
                        Some(vertex) => *vertex,
                        None => continue,
                    }
                }
                _ => continue,
            };
            let vertex = self.resource(
                Resource::CrossbarNode(node),
                || Vertex::CrossbarNode {
                    coordinate: node,
                    config,
                },
                &[source],
            )?;
            inputs.push(vertex);
        }
        if inputs.is_empty() {
            return routing_error(format!("no crossbar node feeds {} for {:?}", bus, descriptor));
        }
        self.resource(Resource::PadiBus(bus), || Vertex::PadiBus { bus }, &inputs)
    }

    fn add_projection(&mut self, descriptor: ProjectionDescriptor) -> Result<(), Error> {
        let instance = self.instance;
        let projection = &instance.projections[&descriptor];
        let routing = self.routing;
        let placed = match routing.connections.get(&descriptor) {
            Some(placed) if placed.len() == projection.connections.len() => placed,
            _ => return routing_error(format!("placement of {:?} incomplete", descriptor)),
        };
        let mut synapses: BTreeMap<Hemisphere, Vec<PlacedConnection>> = BTreeMap::new();
        let mut sources: BTreeMap<Hemisphere, BTreeSet<Source>> = BTreeMap::new();
        let mut split_slots = Vec::with_capacity(placed.len());
        for (i, placed) in placed.iter().enumerate() {
            let source = connection_source(instance, descriptor, i)?;
            let mut slots = Vec::with_capacity(placed.len());
            for synapse in placed {
                let hemisphere = synapse.row.hemisphere;
                let view = synapses.entry(hemisphere).or_default();
                slots.push((hemisphere, view.len()));
                view.push(*synapse);
                sources.entry(hemisphere).or_default().insert(source);
            }
            split_slots.push(slots);
        }

        let post = projection.population_post;
        let mut vertices = BTreeMap::new();
        for (hemisphere, synapses) in synapses {
            let mut rows: BTreeMap<SynapseDriverOnChip, Vec<u16>> = BTreeMap::new();
            for synapse in &synapses {
                rows.entry(synapse.row.synapse_driver()).or_default().push(synapse.row.row);
            }
            let buses = rows.keys().map(|driver| driver.bus).collect::<BTreeSet<_>>();
            let mut bus_vertices = BTreeMap::new();
            for bus in buses {
                let vertex = self.add_padi_bus(bus, descriptor, &sources[&hemisphere])?;
                bus_vertices.insert(bus, vertex);
            }
            let mut driver_vertices = Vec::with_capacity(rows.len());
            for (driver, mut rows) in rows {
                let config = match routing.synapse_drivers.get(&driver) {
                    Some(config) => *config,
                    None => return routing_error(format!("{:?} not configured", driver)),
                };
                let vertex = self.resource(
                    Resource::SynapseDriver(driver),
                    || Vertex::SynapseDriver {
                        coordinate: driver,
                        config,
                    },
                    &[bus_vertices[&driver.bus]],
                )?;
                rows.sort_unstable();
                rows.dedup();
                driver_vertices.push((vertex, rows));
            }
            let mut columns = synapses.iter().map(|s| s.column).collect::<Vec<_>>();
            columns.sort_unstable();
            columns.dedup();
            let view = self.graph.add_vertex(Vertex::SynapseArrayView {
                hemisphere,
                receptor_type: projection.receptor.receptor_type,
                synapses,
            });
            for (driver, rows) in driver_vertices {
                self.connect(driver, view, &rows)?;
            }
            let neurons = match self
                .translation
                .neuron_vertices
                .get(&post)
                .and_then(|vertices| vertices.get(&hemisphere))
            {
                Some(neurons) => *neurons,
                None => return graph_error(format!("{:?} has no neurons on {}", post, hemisphere)),
            };
            self.connect(view, neurons, &columns)?;
            vertices.insert(hemisphere, view);
        }

        let slots = split_slots
            .into_iter()
            .map(|slots| {
                slots
                    .into_iter()
                    .map(|(hemisphere, slot)| (vertices[&hemisphere], slot))
                    .collect()
            })
            .collect();
        self.translation.projections.insert(descriptor, slots);
        self.translation.synapse_vertices.insert(descriptor, vertices);
        Ok(())
    }

    fn add_plasticity_rules(&mut self) -> Result<(), Error> {
        let instance = self.instance;
        for (descriptor, rule) in &instance.plasticity_rules {
            let (inputs, synapse_view_shapes, neuron_view_shapes) =
                plasticity_rule_inputs(&*self.graph, &self.translation, rule)?;
            let vertex = self.graph.add_vertex(Vertex::PlasticityRule {
                kernel: rule.kernel.clone(),
                timer: rule.timer,
                synapse_view_shapes,
                neuron_view_shapes,
                recording: rule.recording.clone(),
            });
            for input in inputs {
                self.connect(input, vertex, &[])?;
            }
            self.translation.plasticity_rule_vertices.insert(*descriptor, vertex);
            if rule.recording.is_some() {
                let output = self.graph.add_vertex(Vertex::PlasticityRuleOutput);
                self.connect(vertex, output, &[])?;
                self.translation
                    .plasticity_rule_output_vertices
                    .insert(*descriptor, output);
            }
        }
        Ok(())
    }
}

/// Synapse and neuron views a plasticity rule works on, with their shapes.
pub(crate) fn plasticity_rule_inputs(
    graph: &Graph,
    translation: &InstanceTranslation,
    rule: &PlasticityRule,
) -> Result<(Vec<VertexDescriptor>, Vec<usize>, Vec<usize>), Error> {
    let mut inputs = Vec::new();
    let mut synapse_view_shapes = Vec::new();
    let mut neuron_view_shapes = Vec::new();
    for projection in &rule.projections {
        let views = translation.synapse_vertices.get(projection).into_iter().flatten();
        for view in views.map(|(_, view)| *view) {
            let size = graph.vertex(view)?.as_synapse_array_view().map_or(0, <[_]>::len);
            synapse_view_shapes.push(size);
            inputs.push(view);
        }
    }
    for population in &rule.populations {
        let views = translation
            .neuron_vertices
            .get(&population.descriptor)
            .into_iter()
            .flatten();
        for view in views.map(|(_, view)| *view) {
            let size = graph
                .vertex(view)?
                .as_neuron_view()
                .map_or(0, |(_, columns, _)| columns.len());
            neuron_view_shapes.push(size);
            inputs.push(view);
        }
    }
    Ok((inputs, synapse_view_shapes, neuron_view_shapes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::Hemisphere;
    use crate::network::*;
    use crate::observe::RecordingObserver;
    use crate::routing::{GreedyRouter, Router};

    fn feed_forward(weights: &[u32], madc: bool) -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let external = builder.add(ExternalSourcePopulation::new(weights.len())).unwrap();
        let neurons = (0..weights.len() as u16)
            .map(|c| AtomicNeuron::new(Hemisphere::TOP, c))
            .collect::<Vec<_>>();
        let internal = builder
            .add(Population::from_atomic_neurons(&neurons, &[Receptor::excitatory()], true))
            .unwrap();
        builder
            .add(Projection::one_to_one(Receptor::excitatory(), weights, external, internal))
            .unwrap();
        if madc {
            builder
                .add(MadcRecording {
                    neurons: vec![RecordedNeuron::new(
                        AtomicNeuronOnNetwork::new(internal, 0),
                        ReadoutSource::Membrane,
                    )],
                })
                .unwrap();
        }
        builder.done()
    }

    fn lowered(network: Arc<Network>) -> (NetworkGraph, RoutingResult) {
        let routing = GreedyRouter::default().route(&network).unwrap();
        let graph = build_network_graph(network, &routing).unwrap();
        (graph, routing)
    }

    fn vertices_named(graph: &NetworkGraph, name: &str) -> usize {
        graph
            .graph()
            .vertices()
            .filter(|v| graph.graph().vertex(*v).map_or(false, |vertex| vertex.name() == name))
            .count()
    }

    #[test]
    fn feed_forward_weights() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (graph, _) = lowered(feed_forward(&[12, 100], false));
        let placed = graph
            .placed_connections(ExecutionInstance(0), ProjectionDescriptor(0))
            .unwrap();
        let weights = placed
            .iter()
            .map(|synapses| synapses.iter().map(|s| s.weight).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(weights, vec![vec![12], vec![63, 37]]);
        assert_eq!(
            graph
                .placed_connection(ExecutionInstance(0), ProjectionDescriptor(0), 1)
                .unwrap(),
            placed[1]
        );
        assert_eq!(vertices_named(&graph, "ExternalInput"), 1);
        assert_eq!(vertices_named(&graph, "NeuronView"), 1);
        assert_eq!(vertices_named(&graph, "SynapseArrayView"), 1);
        assert!(graph.valid());
    }

    #[test]
    fn translation_matches_routing() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (graph, routing) = lowered(feed_forward(&[5, 70, 130], false));
        let routed = &routing.execution_instances[&ExecutionInstance(0)];
        assert_eq!(
            graph
                .placed_connections(ExecutionInstance(0), ProjectionDescriptor(0))
                .unwrap(),
            routed.connections[&ProjectionDescriptor(0)]
        );
        let translation = &graph.translation().execution_instances[&ExecutionInstance(0)];
        assert!(translation.event_input_vertex.is_some());
        assert_eq!(translation.populations[&PopulationDescriptor(1)].len(), 3);
        assert_eq!(translation.spike_labels[&PopulationDescriptor(0)].len(), 3);
        assert_eq!(
            translation.projections[&ProjectionDescriptor(0)]
                .iter()
                .map(Vec::len)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn deterministic() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (a, _) = lowered(feed_forward(&[12, 100], true));
        let (b, _) = lowered(feed_forward(&[12, 100], true));
        assert!(a.graph().equal_except_descriptors(b.graph()));
        let (c, _) = lowered(feed_forward(&[12, 100], false));
        assert!(!a.graph().equal_except_descriptors(c.graph()));
    }

    #[test]
    fn madc_readout() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (graph, _) = lowered(feed_forward(&[12, 100], true));
        assert_eq!(vertices_named(&graph, "MadcReadout"), 1);
        let translation = &graph.translation().execution_instances[&ExecutionInstance(0)];
        assert!(translation.madc_sample_output_vertex.is_some());
        assert!(graph.valid());
    }

    #[test]
    fn foreign_routing_result() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let network = feed_forward(&[12, 100], false);
        let mut routing = GreedyRouter::default().route(&network).unwrap();
        let instance = routing.execution_instances.remove(&ExecutionInstance(0)).unwrap();
        routing.execution_instances.insert(ExecutionInstance(1), instance);
        assert!(matches!(
            build_network_graph(network, &routing),
            Err(Error::InvalidRoutingResult(_))
        ));
    }

    #[test]
    fn tampered_weight() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut graph, _) = lowered(feed_forward(&[12, 100], false));
        let translation = &graph.translation.execution_instances[&ExecutionInstance(0)];
        let (vertex, slot) = translation.projections[&ProjectionDescriptor(0)][0][0];
        if let Vertex::SynapseArrayView { synapses, .. } = graph.graph.vertex_mut(vertex).unwrap() {
            synapses[slot].weight += 1;
        }
        assert!(!graph.valid());
        assert!(matches!(graph.validate(), Err(Error::InvalidNetworkGraph(_))));
    }

    #[test]
    fn tampered_neuron_label() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let (mut graph, _) = lowered(feed_forward(&[12, 100], false));
        let translation = &graph.translation.execution_instances[&ExecutionInstance(0)];
        let vertex = translation.neuron_vertices[&PopulationDescriptor(1)][&Hemisphere::TOP];
        if let Vertex::NeuronView { labels, .. } = graph.graph.vertex_mut(vertex).unwrap() {
            labels[0] = None;
        }
        assert!(!graph.valid());
    }

    #[test]
    fn observed() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let network = feed_forward(&[12], false);
        let routing = GreedyRouter::default().route(&network).unwrap();
        let observer = Arc::new(RecordingObserver::new());
        build_network_graph_with_observer(network, &routing, observer.clone()).unwrap();
        let events = observer.events_in("network_graph");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.duration.is_some()));
    }
}
