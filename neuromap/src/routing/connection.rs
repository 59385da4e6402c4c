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

//! Expansion of logical connections into connections between atomic neurons.

use num::Integer;
use std::collections::BTreeMap;

use crate::chip::{AtomicNeuron, BusOnChip, ReceptorType, MAX_WEIGHT};
use crate::network::{
    ExecutionInstance, Network, NetworkInstance, PopulationDescriptor, PopulationKind,
    ProjectionDescriptor,
};
use crate::Error;

/// Atomic neurons of a connection's target compartment receiving one
/// synapse each. The same atomic neuron may appear repeatedly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionRouting {
    pub atomic_neurons_on_target_compartment: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceConnectionRouting {
    /// Per projection, one entry per connection in connection order.
    pub projections: BTreeMap<ProjectionDescriptor, Vec<ConnectionRouting>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionRoutingResult {
    pub execution_instances: BTreeMap<ExecutionInstance, InstanceConnectionRouting>,
}

/// Number of synapses needed to realize `weight`. Zero weights still occupy
/// a synapse so that they can be changed later without routing.
pub fn num_synapses(weight: u32) -> usize {
    std::cmp::max(1, Integer::div_ceil(&weight, &MAX_WEIGHT) as usize)
}

/// Splits `weight` onto `num` synapses: full synapses first, then the
/// remainder, then zeros.
///
/// For example, 123 on two synapses becomes `[63, 60]`.
pub fn build_connection_weight_split(weight: u32, num: usize) -> Result<Vec<u32>, Error> {
    if num < num_synapses(weight) {
        return Err(Error::Validation(format!(
            "weight {} does not fit onto {} synapse(s)",
            weight, num
        )));
    }
    let mut remaining = weight;
    Ok((0..num)
        .map(|_| {
            let part = std::cmp::min(remaining, MAX_WEIGHT);
            remaining -= part;
            part
        })
        .collect())
}

pub fn build_connection_routing(network: &Network) -> Result<ConnectionRoutingResult, Error> {
    let mut result = ConnectionRoutingResult::default();
    for (id, instance) in &network.execution_instances {
        result
            .execution_instances
            .insert(*id, build_instance_connection_routing(instance)?);
    }
    Ok(result)
}

/// Distributes the synapses of every connection over the atomic neurons of
/// the target compartment that carry the projection's receptor, always
/// choosing the atomic neuron with the fewest inputs so far.
pub fn build_instance_connection_routing(
    instance: &NetworkInstance,
) -> Result<InstanceConnectionRouting, Error> {
    let mut in_degree: BTreeMap<AtomicNeuron, usize> = BTreeMap::new();
    let mut result = InstanceConnectionRouting::default();
    for (descriptor, projection) in &instance.projections {
        let post = instance
            .internal_population(projection.population_post)
            .ok_or_else(|| Error::Validation(format!("{:?} has no on-chip target", descriptor)))?;
        let reachable = instance
            .populations
            .get(&projection.population_pre)
            .and_then(PopulationKind::as_background)
            .map(|background| background.coordinate.keys().copied().collect::<Vec<_>>());
        let num = projection
            .connections
            .iter()
            .map(|connection| num_synapses(connection.weight))
            .collect::<Vec<_>>();
        let max_num = num.iter().copied().max().unwrap_or(0);
        let mut routing = vec![ConnectionRouting::default(); projection.connections.len()];
        for p in 0..max_num {
            for (i, connection) in projection.connections.iter().enumerate() {
                if num[i] <= p {
                    continue;
                }
                let (index, compartment) = connection.index_post;
                let neuron = &post.neurons[index];
                let receptors = &neuron.compartments[&compartment].receptors;
                let atomic_neurons = &neuron.coordinate.compartments[&compartment];
                let chosen = atomic_neurons
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| receptors[*j].contains(&projection.receptor))
                    .filter(|(_, a)| {
                        reachable
                            .as_ref()
                            .map_or(true, |hemispheres| hemispheres.contains(&a.hemisphere))
                    })
                    // first minimum on ties
                    .min_by_key(|(j, a)| (in_degree.get(*a).copied().unwrap_or(0), *j))
                    .map(|(j, a)| (j, *a));
                let (j, atomic_neuron) = chosen.ok_or_else(|| {
                    Error::Validation(format!(
                        "connection {} of {:?} has no target with matching receptor",
                        i, descriptor
                    ))
                })?;
                *in_degree.entry(atomic_neuron).or_default() += 1;
                routing[i].atomic_neurons_on_target_compartment.push(j);
            }
        }
        result.projections.insert(*descriptor, routing);
    }
    Ok(result)
}

/// Emitter of the events of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    /// Spike master of an on-chip compartment.
    Internal(AtomicNeuron),
    External {
        population: PopulationDescriptor,
        index: usize,
    },
    Background {
        population: PopulationDescriptor,
        index: usize,
    },
}

/// One synapse worth of connection: a part of the weight of a logical
/// connection, delivered from a source to one atomic neuron.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtomicConnection {
    pub projection: ProjectionDescriptor,
    pub connection: usize,
    pub split: usize,
    pub source: Source,
    pub target: AtomicNeuron,
    pub receptor_type: ReceptorType,
    pub weight: u32,
}

impl AtomicConnection {
    /// Bus the connection's events travel on, unless chosen freely
    /// (external sources).
    pub fn bus(&self, instance: &NetworkInstance) -> Option<BusOnChip> {
        match self.source {
            Source::Internal(source) => Some(BusOnChip::new(
                self.target.hemisphere,
                source.event_output().bus_index(),
            )),
            Source::Background { population, .. } => instance
                .populations
                .get(&population)
                .and_then(PopulationKind::as_background)
                .and_then(|background| background.coordinate.get(&self.target.hemisphere))
                .map(|&index| BusOnChip::new(self.target.hemisphere, index)),
            Source::External { .. } => None,
        }
    }
}

/// Emitter of the events of connection `index` of `projection`.
pub fn connection_source(
    instance: &NetworkInstance,
    projection: ProjectionDescriptor,
    index: usize,
) -> Result<Source, Error> {
    let (population, connection) = instance
        .projections
        .get(&projection)
        .and_then(|p| p.connections.get(index).map(|c| (p.population_pre, c)))
        .ok_or_else(|| {
            Error::Validation(format!(
                "connection {} of {:?} not found",
                index, projection
            ))
        })?;
    let (index_pre, compartment_pre) = connection.index_pre;
    match instance.populations.get(&population) {
        Some(PopulationKind::Internal(pre)) => pre
            .neurons
            .get(index_pre)
            .and_then(|neuron| neuron.spike_master(compartment_pre))
            .map(Source::Internal)
            .ok_or_else(|| {
                Error::Validation(format!("source of connection {} has no spike master", index))
            }),
        Some(PopulationKind::External(_)) => Ok(Source::External {
            population,
            index: index_pre,
        }),
        Some(PopulationKind::Background(_)) => Ok(Source::Background {
            population,
            index: index_pre,
        }),
        None => Err(Error::Validation(format!("{:?} not found", population))),
    }
}

/// Lists the atomic connections of all projections, in projection,
/// connection and split order.
pub fn expand_connections(
    instance: &NetworkInstance,
    routing: &InstanceConnectionRouting,
) -> Result<Vec<AtomicConnection>, Error> {
    let mut connections = Vec::new();
    for (descriptor, projection) in &instance.projections {
        let post = instance
            .internal_population(projection.population_post)
            .ok_or_else(|| Error::Validation(format!("{:?} has no on-chip target", descriptor)))?;
        let routed = routing.projections.get(descriptor).ok_or_else(|| {
            Error::InvalidRoutingResult(format!("{:?} missing in connection routing", descriptor))
        })?;
        for (i, (connection, routed)) in projection.connections.iter().zip(routed).enumerate() {
            let source = connection_source(instance, *descriptor, i)?;
            let targets = &routed.atomic_neurons_on_target_compartment;
            let weights = build_connection_weight_split(connection.weight, targets.len())?;
            let (index_post, compartment_post) = connection.index_post;
            for (split, (&j, weight)) in targets.iter().zip(weights).enumerate() {
                let target = post.neurons[index_post]
                    .atomic_neuron(compartment_post, j)
                    .ok_or_else(|| {
                        Error::InvalidRoutingResult(format!(
                            "target {} of connection {} not present",
                            j, i
                        ))
                    })?;
                connections.push(AtomicConnection {
                    projection: *descriptor,
                    connection: i,
                    split,
                    source,
                    target,
                    receptor_type: projection.receptor.receptor_type,
                    weight,
                });
            }
        }
    }
    Ok(connections)
}
