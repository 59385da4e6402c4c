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

//! Differential update of a network graph for a network that needs no new
//! routing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use log::Level;
use propgraph::VertexDescriptor;

use crate::graph::builder::plasticity_rule_inputs;
use crate::graph::{requires_routing, Edge, Graph, InstanceTranslation, NetworkGraph, Vertex};
use crate::network::{Network, NetworkInstance, PopulationKind};
use crate::observe::{log_observer, Event, SharedObserver};
use crate::routing::build_connection_weight_split;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Change {
    vertex: VertexDescriptor,
    property: Vertex,
    /// New incoming edges, replacing all present ones.
    inputs: Option<Vec<(VertexDescriptor, Edge)>>,
}

/// Vertex replacements applied to a graph as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphPatch {
    changes: Vec<Change>,
}

impl GraphPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Replaces the property of `vertex`, keeping its edges.
    pub fn replace(&mut self, vertex: VertexDescriptor, property: Vertex) {
        self.changes.push(Change {
            vertex,
            property,
            inputs: None,
        });
    }

    /// Replaces the property and the incoming edges of `vertex`.
    pub fn relocate(
        &mut self,
        vertex: VertexDescriptor,
        property: Vertex,
        inputs: Vec<(VertexDescriptor, Edge)>,
    ) {
        self.changes.push(Change {
            vertex,
            property,
            inputs: Some(inputs),
        });
    }

    fn check(&self, graph: &Graph) -> Result<(), Error> {
        for change in &self.changes {
            if !graph.contains_vertex(change.vertex) {
                return Err(propgraph::GraphError::NotFound.into());
            }
            if let Some(inputs) = &change.inputs {
                let mut sources = inputs.iter().map(|(source, _)| *source).collect::<Vec<_>>();
                if sources.iter().any(|source| !graph.contains_vertex(*source)) {
                    return Err(propgraph::GraphError::NotFound.into());
                }
                sources.sort();
                sources.dedup();
                if sources.len() != inputs.len() {
                    return Err(propgraph::GraphError::InvalidTopology.into());
                }
            }
        }
        Ok(())
    }

    fn apply_change(graph: &mut Graph, change: Change) -> Result<Change, Error> {
        let previous = graph.vertex(change.vertex)?.clone();
        match change.inputs {
            None => {
                graph.set_vertex(change.vertex, change.property)?;
                Ok(Change {
                    vertex: change.vertex,
                    property: previous,
                    inputs: None,
                })
            }
            Some(inputs) => {
                let mut previous_inputs = Vec::new();
                for edge in graph.in_edges(change.vertex)? {
                    let (source, _) = graph.edge_endpoints(edge)?;
                    previous_inputs.push((source, graph.edge(edge)?.clone()));
                }
                graph.relocate_vertex(change.vertex, change.property, inputs)?;
                Ok(Change {
                    vertex: change.vertex,
                    property: previous,
                    inputs: Some(previous_inputs),
                })
            }
        }
    }

    /// Applies all changes, or none if any of them does not fit `graph`.
    /// Returns the patch restoring the previous state.
    pub fn apply(self, graph: &mut Graph) -> Result<GraphPatch, Error> {
        self.check(graph)?;
        let mut undo = Vec::with_capacity(self.changes.len());
        for change in self.changes {
            match Self::apply_change(graph, change) {
                Ok(inverse) => undo.push(inverse),
                Err(e) => {
                    for inverse in undo.into_iter().rev() {
                        Self::apply_change(graph, inverse)?;
                    }
                    return Err(e);
                }
            }
        }
        undo.reverse();
        Ok(GraphPatch { changes: undo })
    }
}

pub fn update_network_graph(graph: &mut NetworkGraph, network: Arc<Network>) -> Result<(), Error> {
    update_network_graph_with_observer(graph, network, log_observer())
}

/// Rewrites the vertices of `graph` whose properties changed in `network`:
/// synapse weights, background source configurations, pad readout sources
/// and plasticity rule kernels, timers and inputs.
///
/// Fails with `Error::RoutingRequired` if `network` needs a new routing. A
/// failed update leaves the graph untouched.
pub fn update_network_graph_with_observer(
    graph: &mut NetworkGraph,
    network: Arc<Network>,
    observer: SharedObserver,
) -> Result<(), Error> {
    let start = Instant::now();
    if requires_routing(&network, graph) {
        return Err(Error::RoutingRequired);
    }
    let mut patch = GraphPatch::new();
    for (id, instance) in &network.execution_instances {
        let old = &graph.network.execution_instances[id];
        let translation = match graph.translation.execution_instances.get(id) {
            Some(translation) => translation,
            None => return Err(Error::InvalidNetworkGraph(format!("{} not translated", id))),
        };
        update_weights(&graph.graph, instance, old, translation, &mut patch)?;
        update_background_sources(&graph.graph, instance, old, translation, &mut patch)?;
        update_pad_readouts(instance, old, translation, &mut patch)?;
        if instance.plasticity_rules != old.plasticity_rules {
            for (descriptor, rule) in &instance.plasticity_rules {
                let vertex = match translation.plasticity_rule_vertices.get(descriptor) {
                    Some(vertex) => *vertex,
                    None => {
                        return Err(Error::InvalidNetworkGraph(format!(
                            "{:?} not translated",
                            descriptor
                        )))
                    }
                };
                let (inputs, synapse_view_shapes, neuron_view_shapes) =
                    plasticity_rule_inputs(&graph.graph, translation, rule)?;
                let property = Vertex::PlasticityRule {
                    kernel: rule.kernel.clone(),
                    timer: rule.timer,
                    synapse_view_shapes,
                    neuron_view_shapes,
                    recording: rule.recording.clone(),
                };
                let mut inputs = inputs;
                inputs.sort();
                inputs.dedup();
                let inputs = inputs.into_iter().map(|input| (input, Edge::default())).collect();
                patch.relocate(vertex, property, inputs);
            }
        }
    }

    let num_changes = patch.len();
    let undo = patch.apply(&mut graph.graph)?;
    let previous = std::mem::replace(&mut graph.network, network);
    if let Err(e) = graph.validate() {
        undo.apply(&mut graph.graph)?;
        graph.network = previous;
        return Err(e);
    }
    let elapsed = start.elapsed();
    graph.construction_duration += elapsed;
    observer.observe(
        Event::new(
            Level::Debug,
            "update",
            format!("updated {} vertices of the network graph", num_changes),
        )
        .with_duration(elapsed),
    );
    Ok(())
}

fn update_weights(
    graph: &Graph,
    instance: &NetworkInstance,
    old: &NetworkInstance,
    translation: &InstanceTranslation,
    patch: &mut GraphPatch,
) -> Result<(), Error> {
    for (descriptor, projection) in &instance.projections {
        let previous = &old.projections[descriptor];
        let changed = projection
            .connections
            .iter()
            .zip(&previous.connections)
            .enumerate()
            .filter(|(_, (c, p))| c.weight != p.weight)
            .map(|(i, (c, _))| (i, c.weight))
            .collect::<Vec<_>>();
        if changed.is_empty() {
            continue;
        }
        let mut views = BTreeMap::new();
        let synapse_vertices = translation.synapse_vertices.get(descriptor).into_iter().flatten();
        for vertex in synapse_vertices.map(|(_, v)| *v) {
            views.insert(vertex, graph.vertex(vertex)?.clone());
        }
        let slots = match translation.projections.get(descriptor) {
            Some(slots) => slots,
            None => {
                return Err(Error::InvalidNetworkGraph(format!(
                    "{:?} not translated",
                    descriptor
                )))
            }
        };
        for (i, weight) in changed {
            let slots = &slots[i];
            let split = build_connection_weight_split(weight, slots.len())?;
            for ((vertex, slot), weight) in slots.iter().zip(split) {
                let synapse = match views.get_mut(vertex) {
                    Some(Vertex::SynapseArrayView { synapses, .. }) => synapses.get_mut(*slot),
                    _ => None,
                };
                match synapse {
                    Some(synapse) => synapse.weight = weight,
                    None => {
                        return Err(Error::InvalidNetworkGraph(format!(
                            "slot {} of {} is no synapse",
                            slot, vertex
                        )))
                    }
                }
            }
        }
        for (vertex, property) in views {
            patch.replace(vertex, property);
        }
    }
    Ok(())
}

fn update_background_sources(
    graph: &Graph,
    instance: &NetworkInstance,
    old: &NetworkInstance,
    translation: &InstanceTranslation,
    patch: &mut GraphPatch,
) -> Result<(), Error> {
    for (descriptor, population) in &instance.populations {
        let (population, previous) = match (population, &old.populations[descriptor]) {
            (PopulationKind::Background(p), PopulationKind::Background(o)) => (p, o),
            _ => continue,
        };
        if population.config == previous.config {
            continue;
        }
        let vertices = translation.background_spike_source_vertices.get(descriptor);
        for vertex in vertices.into_iter().flatten().map(|(_, v)| *v) {
            if let Vertex::BackgroundSource { bus, label, .. } = graph.vertex(vertex)? {
                let mask = if population.config.enable_random {
                    (population.size - 1) as u16
                } else {
                    0
                };
                let property = Vertex::BackgroundSource {
                    bus: *bus,
                    config: population.config,
                    label: *label,
                    mask,
                };
                patch.replace(vertex, property);
            }
        }
    }
    Ok(())
}

fn update_pad_readouts(
    instance: &NetworkInstance,
    old: &NetworkInstance,
    translation: &InstanceTranslation,
    patch: &mut GraphPatch,
) -> Result<(), Error> {
    let (recording, previous) = match (&instance.pad_recording, &old.pad_recording) {
        (Some(recording), Some(previous)) if recording != previous => (recording, previous),
        _ => return Ok(()),
    };
    for (pad, source) in &recording.recordings {
        if previous.recordings.get(pad) == Some(source) {
            continue;
        }
        let coordinate = source.neuron.coordinate;
        let neuron = instance.resolve(&coordinate).ok_or_else(|| {
            Error::Validation(format!("recorded neuron {:?} not present", coordinate))
        })?;
        let view = translation
            .populations
            .get(&coordinate.population)
            .and_then(|neurons| neurons.get(coordinate.neuron_on_population))
            .and_then(|compartments| compartments.get(&coordinate.compartment_on_neuron))
            .and_then(|slots| slots.get(coordinate.atomic_neuron_on_compartment))
            .map(|(view, _)| *view);
        let (view, vertex) = match (view, translation.pad_readout_vertices.get(pad)) {
            (Some(view), Some(vertex)) => (view, *vertex),
            _ => {
                return Err(Error::InvalidNetworkGraph(format!(
                    "readout of {:?} not translated",
                    pad
                )))
            }
        };
        let property = Vertex::PadReadout {
            pad: *pad,
            neuron,
            source: source.neuron.source,
            enable_buffered: source.enable_buffered,
        };
        patch.relocate(vertex, property, vec![(view, Edge::new(vec![neuron.column]))]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{AtomicNeuron, Hemisphere, Pad};
    use crate::graph::build_network_graph;
    use crate::network::*;
    use crate::routing::{GreedyRouter, Router};

    struct Setup {
        weights: Vec<u32>,
        pad_neuron: Option<usize>,
        kernel: Option<&'static str>,
    }

    impl Setup {
        fn new(weights: &[u32]) -> Self {
            Self {
                weights: weights.to_vec(),
                pad_neuron: None,
                kernel: None,
            }
        }

        fn network(&self) -> Arc<Network> {
            let mut builder = NetworkBuilder::new();
            let external = builder.add(ExternalSourcePopulation::new(self.weights.len())).unwrap();
            let neurons = (0..self.weights.len() as u16)
                .map(|c| AtomicNeuron::new(Hemisphere::TOP, c))
                .collect::<Vec<_>>();
            let internal = builder
                .add(Population::from_atomic_neurons(&neurons, &[Receptor::excitatory()], true))
                .unwrap();
            let projection = builder
                .add(Projection::one_to_one(
                    Receptor::excitatory(),
                    &self.weights,
                    external,
                    internal,
                ))
                .unwrap();
            if let Some(neuron) = self.pad_neuron {
                let mut recording = PadRecording::default();
                recording.recordings.insert(
                    Pad(0),
                    PadRecordingSource {
                        neuron: RecordedNeuron::new(
                            AtomicNeuronOnNetwork::new(internal, neuron),
                            ReadoutSource::Membrane,
                        ),
                        enable_buffered: false,
                    },
                );
                builder.add(recording).unwrap();
            }
            if let Some(kernel) = self.kernel {
                builder
                    .add(PlasticityRule::new(vec![projection], kernel, PlasticityTimer::default()))
                    .unwrap();
            }
            builder.done()
        }
    }

    fn lowered(network: &Arc<Network>) -> NetworkGraph {
        let routing = GreedyRouter::default().route(network).unwrap();
        build_network_graph(network.clone(), &routing).unwrap()
    }

    fn weights(graph: &NetworkGraph) -> Vec<Vec<u32>> {
        let placed = graph
            .placed_connections(ExecutionInstance(0), ProjectionDescriptor(0))
            .unwrap();
        placed
            .iter()
            .map(|connection| connection.iter().map(|synapse| synapse.weight).collect())
            .collect()
    }

    #[test]
    fn weight_update() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut graph = lowered(&Setup::new(&[12, 100]).network());
        assert_eq!(weights(&graph), vec![vec![12], vec![63, 37]]);
        let vertex_count = graph.graph().vertex_count();

        update_network_graph(&mut graph, Setup::new(&[40, 126]).network()).unwrap();
        assert_eq!(weights(&graph), vec![vec![40], vec![63, 63]]);
        assert_eq!(graph.graph().vertex_count(), vertex_count);
        assert!(graph.valid());

        let rebuilt = lowered(&Setup::new(&[40, 126]).network());
        assert!(graph.graph().equal_except_descriptors(rebuilt.graph()));
    }

    #[test]
    fn routing_required() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut graph = lowered(&Setup::new(&[12, 100]).network());
        let before = graph.graph().clone();
        assert_eq!(
            update_network_graph(&mut graph, Setup::new(&[64, 100]).network()),
            Err(Error::RoutingRequired)
        );
        assert!(graph.graph().equal_except_descriptors(&before));
        assert_eq!(weights(&graph), vec![vec![12], vec![63, 37]]);
    }

    #[test]
    fn rejected_patch_leaves_graph_untouched() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut graph = lowered(&Setup::new(&[12, 100]).network());
        let before = graph.graph().clone();
        let vertex = graph.graph().vertices().next().unwrap();
        let property = graph.graph().vertex(vertex).unwrap().clone();

        let mut patch = GraphPatch::new();
        patch.replace(vertex, Vertex::ExternalOutput);
        let inputs = vec![(vertex, Edge::default()), (vertex, Edge::default())];
        patch.relocate(vertex, property, inputs);
        assert_eq!(
            patch.apply(&mut graph.graph),
            Err(Error::Graph(propgraph::GraphError::InvalidTopology))
        );
        assert!(graph.graph().equal_except_descriptors(&before));
    }

    #[test]
    fn inverse_patch_restores() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut graph = lowered(&Setup::new(&[12, 100]).network());
        let before = graph.graph().clone();
        let vertex = graph.graph().vertices().next().unwrap();

        let mut patch = GraphPatch::new();
        patch.replace(vertex, Vertex::ExternalOutput);
        let undo = patch.apply(&mut graph.graph).unwrap();
        assert_eq!(undo.len(), 1);
        assert!(!graph.graph().equal_except_descriptors(&before));
        undo.apply(&mut graph.graph).unwrap();
        assert!(graph.graph().equal_except_descriptors(&before));
    }

    #[test]
    fn plasticity_kernel() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut setup = Setup::new(&[12, 100]);
        setup.kernel = Some("old");
        let mut graph = lowered(&setup.network());
        setup.kernel = Some("new");
        update_network_graph(&mut graph, setup.network()).unwrap();

        let translation = &graph.translation().execution_instances[&ExecutionInstance(0)];
        let vertex = translation.plasticity_rule_vertices[&PlasticityRuleDescriptor(0)];
        match graph.graph().vertex(vertex).unwrap() {
            Vertex::PlasticityRule { kernel, .. } => assert_eq!(kernel, "new"),
            other => panic!("unexpected vertex {:?}", other),
        }
        assert!(graph.graph().equal_except_descriptors(lowered(&setup.network()).graph()));
    }

    #[test]
    fn pad_source() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut setup = Setup::new(&[12, 100]);
        setup.pad_neuron = Some(0);
        let mut graph = lowered(&setup.network());
        setup.pad_neuron = Some(1);
        update_network_graph(&mut graph, setup.network()).unwrap();

        let translation = &graph.translation().execution_instances[&ExecutionInstance(0)];
        let vertex = translation.pad_readout_vertices[&Pad(0)];
        match graph.graph().vertex(vertex).unwrap() {
            Vertex::PadReadout { neuron, .. } => {
                assert_eq!(*neuron, AtomicNeuron::new(Hemisphere::TOP, 1))
            }
            other => panic!("unexpected vertex {:?}", other),
        }
        let edge = graph.graph().in_edges(vertex).unwrap().next().unwrap();
        assert_eq!(graph.graph().edge(edge).unwrap().ports, vec![1]);
        assert!(graph.valid());
    }

    fn background_network(config: BackgroundSourceConfig) -> Arc<Network> {
        let mut builder = NetworkBuilder::new();
        let neurons = [
            AtomicNeuron::new(Hemisphere::TOP, 0),
            AtomicNeuron::new(Hemisphere::TOP, 1),
        ];
        let internal = builder
            .add(Population::from_atomic_neurons(&neurons, &[Receptor::excitatory()], false))
            .unwrap();
        let background = builder
            .add(BackgroundSourcePopulation {
                size: 4,
                coordinate: [(Hemisphere::TOP, 1)].iter().copied().collect(),
                config,
            })
            .unwrap();
        let connections = vec![Connection::new(0, 0, 10), Connection::new(3, 1, 20)];
        builder
            .add(Projection::new(Receptor::excitatory(), connections, background, internal))
            .unwrap();
        builder.done()
    }

    #[test]
    fn background_config() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let old = BackgroundSourceConfig {
            enable_random: true,
            ..Default::default()
        };
        let mut graph = lowered(&background_network(old));
        let new = BackgroundSourceConfig {
            period: 200,
            rate: 128,
            seed: 42,
            enable_random: true,
        };
        let network = background_network(new);
        assert!(!requires_routing(&network, &graph));
        update_network_graph(&mut graph, network.clone()).unwrap();
        assert!(graph.valid());

        let translation = &graph.translation().execution_instances[&ExecutionInstance(0)];
        let vertex = translation.background_spike_source_vertices[&PopulationDescriptor(1)]
            [&Hemisphere::TOP];
        match graph.graph().vertex(vertex).unwrap() {
            Vertex::BackgroundSource { config, mask, .. } => {
                assert_eq!(*config, new);
                assert_eq!(*mask, 3);
            }
            other => panic!("unexpected vertex {:?}", other),
        }
        assert!(graph.graph().equal_except_descriptors(lowered(&network).graph()));
    }
}
