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

use crate::graph::NetworkGraph;
use crate::network::{
    ExecutionInstance, Network, NetworkInstance, PopulationKind, ProjectionDescriptor,
};
use crate::routing::num_synapses;

/// Whether `current` differs from the network `old` was built for in a way
/// an update cannot express.
pub fn requires_routing(current: &Network, old: &NetworkGraph) -> bool {
    let translation = &old.translation().execution_instances;
    differs(current, old.network(), |id, projection, index, weight| {
        let routed = translation
            .get(&id)
            .and_then(|t| t.projections.get(&projection))
            .and_then(|connections| connections.get(index))
            .map_or(0, Vec::len);
        num_synapses(weight) <= routed
    })
}

/// Like `requires_routing`, against the previous network only. Weights fit
/// if they need no more synapses than the previous ones.
pub fn network_requires_routing(current: &Network, old: &Network) -> bool {
    differs(current, old, |id, projection, index, weight| {
        let previous = old
            .execution_instances
            .get(&id)
            .and_then(|instance| instance.projections.get(&projection))
            .and_then(|p| p.connections.get(index))
            .map_or(0, |c| num_synapses(c.weight));
        num_synapses(weight) <= previous
    })
}

fn differs<F>(current: &Network, old: &Network, fits: F) -> bool
where
    F: Fn(ExecutionInstance, ProjectionDescriptor, usize, u32) -> bool,
{
    if !current
        .execution_instances
        .keys()
        .eq(old.execution_instances.keys())
    {
        log::debug!("requires_routing(): execution instances changed");
        return true;
    }
    current.execution_instances.iter().any(|(id, instance)| {
        let reason = instance_differs(*id, instance, &old.execution_instances[id], &fits);
        if let Some(reason) = reason {
            log::debug!("requires_routing(): {} in {}", reason, id);
        }
        reason.is_some()
    })
}

fn populations_match(current: &PopulationKind, old: &PopulationKind) -> bool {
    match (current, old) {
        (PopulationKind::Background(current), PopulationKind::Background(old)) => {
            current.size == old.size && current.coordinate == old.coordinate
        }
        (current, old) => current == old,
    }
}

fn instance_differs<F>(
    id: ExecutionInstance,
    current: &NetworkInstance,
    old: &NetworkInstance,
    fits: &F,
) -> Option<&'static str>
where
    F: Fn(ExecutionInstance, ProjectionDescriptor, usize, u32) -> bool,
{
    if !current.populations.keys().eq(old.populations.keys()) {
        return Some("populations added or removed");
    }
    let populations_changed = current
        .populations
        .iter()
        .any(|(d, p)| !populations_match(p, &old.populations[d]));
    if populations_changed {
        return Some("population changed");
    }

    if !current.projections.keys().eq(old.projections.keys()) {
        return Some("projections added or removed");
    }
    for (descriptor, projection) in &current.projections {
        let previous = &old.projections[descriptor];
        if projection.population_pre != previous.population_pre
            || projection.population_post != previous.population_post
            || projection.receptor != previous.receptor
            || projection.connections.len() != previous.connections.len()
        {
            return Some("projection topology changed");
        }
        let pairs = projection.connections.iter().zip(&previous.connections);
        for (i, (connection, previous)) in pairs.enumerate() {
            if connection.index_pre != previous.index_pre
                || connection.index_post != previous.index_post
            {
                return Some("connection endpoints changed");
            }
            if !fits(id, *descriptor, i, connection.weight) {
                return Some("weight exceeds the routed synapses");
            }
        }
    }

    if current.madc_recording != old.madc_recording {
        return Some("MADC recording changed");
    }
    if current.cadc_recording != old.cadc_recording {
        return Some("CADC recording changed");
    }
    if current.recorded_pads() != old.recorded_pads() {
        return Some("recorded pads changed");
    }

    if !current.plasticity_rules.keys().eq(old.plasticity_rules.keys()) {
        return Some("plasticity rules added or removed");
    }
    for (descriptor, rule) in &current.plasticity_rules {
        let previous = &old.plasticity_rules[descriptor];
        if rule.enable_requires_one_source_per_row_in_order
            != previous.enable_requires_one_source_per_row_in_order
        {
            return Some("one source per row requirement changed");
        }
        if rule.recording != previous.recording {
            return Some("plasticity rule recording changed");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{AtomicNeuron, Hemisphere, Pad};
    use crate::network::*;
    use std::sync::Arc;

    fn network(weights: &[u32], pad: Option<Pad>) -> Arc<Network> {
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
        if let Some(pad) = pad {
            let mut recording = PadRecording::default();
            recording.recordings.insert(
                pad,
                PadRecordingSource {
                    neuron: RecordedNeuron::new(
                        AtomicNeuronOnNetwork::new(internal, 0),
                        ReadoutSource::Membrane,
                    ),
                    enable_buffered: false,
                },
            );
            builder.add(recording).unwrap();
        }
        builder.done()
    }

    #[test]
    fn same_network() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let old = network(&[12, 100], None);
        assert!(!network_requires_routing(&network(&[12, 100], None), &old));
    }

    #[test]
    fn weights_within_routed_synapses() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let old = network(&[12, 100], None);
        assert!(!network_requires_routing(&network(&[63, 126], None), &old));
        assert!(!network_requires_routing(&network(&[0, 64], None), &old));
        assert!(network_requires_routing(&network(&[64, 100], None), &old));
        assert!(network_requires_routing(&network(&[12, 127], None), &old));
    }

    #[test]
    fn topology_changes() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let old = network(&[12, 100], None);
        assert!(network_requires_routing(&network(&[12, 100, 1], None), &old));
        assert!(network_requires_routing(&network(&[12, 100], Some(Pad(0))), &old));
        let with_pad = network(&[12, 100], Some(Pad(0)));
        assert!(!network_requires_routing(&network(&[12, 100], Some(Pad(0))), &with_pad));
        assert!(network_requires_routing(&network(&[12, 100], Some(Pad(1))), &with_pad));
    }
}
