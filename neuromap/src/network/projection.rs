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

use crate::network::{CompartmentOnNeuron, PopulationDescriptor, Receptor};

/// Connection between two compartments, identified by neuron index in the
/// pre- and postsynaptic population.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub index_pre: (usize, CompartmentOnNeuron),
    pub index_post: (usize, CompartmentOnNeuron),
    pub weight: u32,
}

impl Connection {
    /// Connection between the first compartments of two neurons.
    pub fn new(pre: usize, post: usize, weight: u32) -> Self {
        Self {
            index_pre: (pre, CompartmentOnNeuron(0)),
            index_post: (post, CompartmentOnNeuron(0)),
            weight,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    /// Receptor of the postsynaptic compartments all connections target.
    pub receptor: Receptor,
    pub connections: Vec<Connection>,
    pub population_pre: PopulationDescriptor,
    pub population_post: PopulationDescriptor,
}

impl Projection {
    pub fn new(
        receptor: Receptor,
        connections: Vec<Connection>,
        population_pre: PopulationDescriptor,
        population_post: PopulationDescriptor,
    ) -> Self {
        Self {
            receptor,
            connections,
            population_pre,
            population_post,
        }
    }

    /// Connects neuron `i` of the source to neuron `i` of the target.
    pub fn one_to_one(
        receptor: Receptor,
        weights: &[u32],
        population_pre: PopulationDescriptor,
        population_post: PopulationDescriptor,
    ) -> Self {
        let connections = weights
            .iter()
            .enumerate()
            .map(|(i, &weight)| Connection::new(i, i, weight))
            .collect();
        Self::new(receptor, connections, population_pre, population_post)
    }

    /// Every source neuron connects to every target neuron with `weight`.
    pub fn all_to_all(
        receptor: Receptor,
        size_pre: usize,
        size_post: usize,
        weight: u32,
        population_pre: PopulationDescriptor,
        population_post: PopulationDescriptor,
    ) -> Self {
        let mut connections = Vec::with_capacity(size_pre * size_post);
        for pre in 0..size_pre {
            for post in 0..size_post {
                connections.push(Connection::new(pre, post, weight));
            }
        }
        Self::new(receptor, connections, population_pre, population_post)
    }

    /// Whether the connections form a complete matrix, listed row by row.
    pub fn is_dense_in_order(&self) -> bool {
        let mut rows = self
            .connections
            .iter()
            .map(|c| c.index_pre)
            .collect::<Vec<_>>();
        rows.dedup();
        let mut columns = self
            .connections
            .iter()
            .map(|c| c.index_post)
            .collect::<Vec<_>>();
        columns.sort();
        columns.dedup();
        if rows.len() * columns.len() != self.connections.len() {
            return false;
        }
        let key = |c: &Connection| (c.index_pre, c.index_post);
        self.connections
            .windows(2)
            .all(|pair| key(&pair[0]) < key(&pair[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_in_order() {
        let pre = PopulationDescriptor(0);
        let post = PopulationDescriptor(1);
        let dense = Projection::all_to_all(Receptor::excitatory(), 3, 2, 1, pre, post);
        assert!(dense.is_dense_in_order());

        let mut unordered = dense.clone();
        unordered.connections.swap(0, 1);
        assert!(!unordered.is_dense_in_order());

        let mut sparse = dense.clone();
        sparse.connections.pop();
        assert!(!sparse.is_dense_in_order());

        let diagonal = Projection::one_to_one(Receptor::excitatory(), &[1, 1], pre, post);
        assert!(!diagonal.is_dense_in_order());
    }
}
