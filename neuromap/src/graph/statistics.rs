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
use std::fmt;
use std::time::Duration;

use itertools::Itertools;

use crate::chip::{
    ATOMIC_NEURONS, COLUMNS_PER_HEMISPHERE, HEMISPHERES, ROWS_PER_HEMISPHERE, SYNAPSE_DRIVERS,
};
use crate::graph::{InstanceTranslation, NetworkGraph, Vertex};
use crate::network::{ExecutionInstance, NetworkInstance};
use crate::Error;

const SYNAPSES: usize = HEMISPHERES * ROWS_PER_HEMISPHERE * COLUMNS_PER_HEMISPHERE;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceStatistics {
    pub populations: usize,
    pub projections: usize,
    pub neurons: usize,
    pub synapses: usize,
    pub synapse_drivers: usize,
    pub neuron_usage: f64,
    pub synapse_usage: f64,
    pub synapse_driver_usage: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkGraphStatistics {
    pub execution_instances: BTreeMap<ExecutionInstance, InstanceStatistics>,
    pub construction_duration: Duration,
    pub verification_duration: Duration,
    pub routing_duration: Duration,
}

impl fmt::Display for NetworkGraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "routing {:?}, construction {:?}, verification {:?}",
            self.routing_duration, self.construction_duration, self.verification_duration
        )?;
        for (id, s) in &self.execution_instances {
            writeln!(
                f,
                "{}: {} populations, {} projections, {} neurons ({:.1}%), {} synapses ({:.1}%), \
                 {} synapse drivers ({:.1}%)",
                id,
                s.populations,
                s.projections,
                s.neurons,
                100. * s.neuron_usage,
                s.synapses,
                100. * s.synapse_usage,
                s.synapse_drivers,
                100. * s.synapse_driver_usage
            )?;
        }
        Ok(())
    }
}

/// Hardware usage of every execution instance of `graph`.
pub fn extract_statistics(graph: &NetworkGraph) -> Result<NetworkGraphStatistics, Error> {
    let mut statistics = NetworkGraphStatistics {
        construction_duration: graph.construction_duration,
        verification_duration: graph.verification_duration,
        routing_duration: graph.routing_duration,
        ..Default::default()
    };
    for (id, instance) in &graph.network.execution_instances {
        let translation = graph.instance_translation(*id)?;
        statistics
            .execution_instances
            .insert(*id, instance_statistics(graph, instance, translation)?);
    }
    Ok(statistics)
}

fn instance_statistics(
    graph: &NetworkGraph,
    instance: &NetworkInstance,
    translation: &InstanceTranslation,
) -> Result<InstanceStatistics, Error> {
    let mut neurons = 0;
    for vertex in translation.neuron_vertices.values().flat_map(|v| v.values()) {
        if let Some((_, columns, _)) = graph.graph.vertex(*vertex)?.as_neuron_view() {
            neurons += columns.len();
        }
    }
    let mut synapses = 0;
    let mut drivers = Vec::new();
    for vertex in translation.synapse_vertices.values().flat_map(|v| v.values()) {
        if let Some(placed) = graph.graph.vertex(*vertex)?.as_synapse_array_view() {
            synapses += placed.len();
        }
        for source in graph.graph.inv_adjacent_vertices(*vertex)? {
            if let Vertex::SynapseDriver { coordinate, .. } = graph.graph.vertex(source)? {
                drivers.push(*coordinate);
            }
        }
    }
    let synapse_drivers = drivers.into_iter().unique().count();
    Ok(InstanceStatistics {
        populations: instance.populations.len(),
        projections: instance.projections.len(),
        neurons,
        synapses,
        synapse_drivers,
        neuron_usage: neurons as f64 / ATOMIC_NEURONS as f64,
        synapse_usage: synapses as f64 / SYNAPSES as f64,
        synapse_driver_usage: synapse_drivers as f64 / SYNAPSE_DRIVERS as f64,
    })
}
