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

//! Routes and lowers a small feed-forward network, then applies a weight
//! update to the lowered graph without routing again.

use std::sync::Arc;

use neuromap::chip::{AtomicNeuron, Hemisphere};
use neuromap::network::{
    ExternalSourcePopulation, Population, ProjectionDescriptor, Projection, Receptor,
};
use neuromap::{
    build_network_graph, extract_statistics, requires_routing, update_network_graph,
    ExecutionInstance, Network, NetworkBuilder, NetworkGraph, PortfolioRouter, Router,
};

fn build_network(weights: &[u32]) -> anyhow::Result<Arc<Network>> {
    let mut builder = NetworkBuilder::new();
    let external = builder.add(ExternalSourcePopulation::new(weights.len()))?;
    let neurons = (0..weights.len() as u16)
        .map(|column| AtomicNeuron::new(Hemisphere::TOP, column))
        .collect::<Vec<_>>();
    let internal = builder.add(Population::from_atomic_neurons(
        &neurons,
        &[Receptor::excitatory()],
        true,
    ))?;
    builder.add(Projection::one_to_one(
        Receptor::excitatory(),
        weights,
        external,
        internal,
    ))?;
    Ok(builder.done())
}

fn weights(graph: &NetworkGraph) -> anyhow::Result<Vec<Vec<u32>>> {
    Ok(graph
        .placed_connections(ExecutionInstance(0), ProjectionDescriptor(0))?
        .iter()
        .map(|synapses| synapses.iter().map(|synapse| synapse.weight).collect())
        .collect())
}

fn run() -> anyhow::Result<()> {
    let network = build_network(&[12, 100])?;
    let mut router = PortfolioRouter::default();
    let routing = router.route(&network)?;
    let mut graph = build_network_graph(network, &routing)?;
    log::info!("routed weights {:?}", weights(&graph)?);
    anyhow::ensure!(weights(&graph)? == vec![vec![12], vec![63, 37]]);
    anyhow::ensure!(graph.valid(), "lowered graph does not match the network");

    let updated = build_network(&[40, 126])?;
    anyhow::ensure!(!requires_routing(&updated, &graph));
    update_network_graph(&mut graph, updated)?;
    log::info!("updated weights {:?}", weights(&graph)?);
    anyhow::ensure!(weights(&graph)? == vec![vec![40], vec![63, 63]]);

    let grown = build_network(&[40, 200])?;
    anyhow::ensure!(requires_routing(&grown, &graph));

    log::info!("{}", extract_statistics(&graph)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    run()
}

#[cfg(test)]
mod tests {
    #[test]
    fn end_to_end() {
        let _logger = env_logger::builder().is_test(true).try_init();
        crate::run().unwrap();
    }
}
