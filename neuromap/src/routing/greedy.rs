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

use log::Level;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::chip::{
    BusOnChip, CrossbarNodeConfig, CrossbarNodeOnChip, Hemisphere, NeuronLabel, RowMode,
    RowSelect, SpikeLabel, Spl1Address, SynapseDriverOnChip, SynapseLabel, SynapseRowOnChip,
    ROW_SELECT_LABELS,
};
use crate::network::{Network, NetworkInstance, PopulationKind};
use crate::observe::{log_observer, Event, SharedObserver};
use crate::routing::allocator::{Allocation, AllocationRequest, SynapseDriverOnBusManager};
use crate::routing::connection::{build_instance_connection_routing, expand_connections, Source};
use crate::routing::constraints::RoutingConstraints;
use crate::routing::result::{
    InstanceRoutingResult, PlacedConnection, RoutingResult, SynapseDriverConfig,
};
use crate::routing::sources::{group_sources, GroupKind, RowKey, SourceGrouping};
use crate::routing::{verify_routing, Router, RoutingOptions};
use crate::Error;

type BusAllocations = BTreeMap<BusOnChip, Vec<(usize, Allocation)>>;

/// Routes by grouping sources, trying row-select label assignments until
/// the synapse drivers of every bus can be allocated, and placing the
/// synapses onto the allocated rows.
pub struct GreedyRouter {
    options: RoutingOptions,
    observer: SharedObserver,
}

impl Default for GreedyRouter {
    fn default() -> Self {
        Self::new(RoutingOptions::default())
    }
}

impl GreedyRouter {
    pub fn new(options: RoutingOptions) -> Self {
        Self::with_observer(options, log_observer())
    }

    pub fn with_observer(options: RoutingOptions, observer: SharedObserver) -> Self {
        Self { options, observer }
    }

    pub fn options(&self) -> &RoutingOptions {
        &self.options
    }

    pub fn route_instance(
        &self,
        instance: &NetworkInstance,
    ) -> Result<InstanceRoutingResult, Error> {
        let routing = build_instance_connection_routing(instance)?;
        let connections = expand_connections(instance, &routing)?;
        let constraints = RoutingConstraints::new(instance, connections);
        constraints.check()?;
        let grouping = group_sources(&constraints)?;
        log::debug!(
            "{} atomic connections in {} source groups",
            constraints.connections().len(),
            grouping.groups.len()
        );
        let (labels, allocations) = self.allocate(&grouping)?;
        place(&constraints, &grouping, &labels, &allocations)
    }

    /// Tries label sequences `offset + i * stride` over all odd strides,
    /// which keeps the labels on a bus distinct.
    fn allocate(
        &self,
        grouping: &SourceGrouping,
    ) -> Result<(Vec<RowSelect>, BusAllocations), Error> {
        let start = Instant::now();
        let timeout = self.options.allocation_timeout();
        let mut explored = 0;
        for stride in (1..ROW_SELECT_LABELS).step_by(2) {
            for offset in 0..ROW_SELECT_LABELS {
                if let Some(timeout) = timeout {
                    if explored > 0 && start.elapsed() >= timeout {
                        return Err(Error::UnsuccessfulRouting(format!(
                            "no synapse driver allocation within {:?} ({} label assignments)",
                            timeout, explored
                        )));
                    }
                }
                explored += 1;
                let labels = grouping
                    .label_index
                    .iter()
                    .map(|i| RowSelect(((offset + i * stride) % ROW_SELECT_LABELS) as u8))
                    .collect::<Vec<_>>();
                if let Some(allocations) = self.allocate_with(grouping, &labels) {
                    log::debug!(
                        "synapse drivers allocated after {} label assignments in {:?}",
                        explored,
                        start.elapsed()
                    );
                    return Ok((labels, allocations));
                }
            }
        }
        Err(Error::UnsuccessfulRouting(format!(
            "no synapse driver allocation for any of {} label assignments",
            explored
        )))
    }

    fn allocate_with(
        &self,
        grouping: &SourceGrouping,
        labels: &[RowSelect],
    ) -> Option<BusAllocations> {
        let mut result = BusAllocations::new();
        for bus in BusOnChip::all() {
            let groups = grouping.groups_on(bus);
            if groups.is_empty() {
                continue;
            }
            let requests = groups
                .iter()
                .map(|g| AllocationRequest {
                    shapes: grouping.demand(bus, *g).shapes(),
                    label: labels[*g],
                })
                .collect::<Vec<_>>();
            let allocations = SynapseDriverOnBusManager::new()
                .solve(&requests, &self.options.synapse_driver_allocation_policy)?;
            log::trace!("allocated {} requests on {}", requests.len(), bus);
            result.insert(bus, groups.into_iter().zip(allocations).collect());
        }
        Some(result)
    }
}

fn place(
    constraints: &RoutingConstraints,
    grouping: &SourceGrouping,
    labels: &[RowSelect],
    allocations: &BusAllocations,
) -> Result<InstanceRoutingResult, Error> {
    let instance = constraints.instance();
    let mut result = InstanceRoutingResult::default();

    let mut rows: BTreeMap<(BusOnChip, usize, RowKey), SynapseRowOnChip> = BTreeMap::new();
    for (bus, groups) in allocations {
        for (group, allocation) in groups {
            let demand = grouping.demand(*bus, *group);
            let mut shapes = allocation.synapse_drivers.iter();
            for keys in [&demand.dedicated, &demand.shared].iter() {
                if keys.is_empty() {
                    continue;
                }
                let mut drivers = shapes.next().cloned().ok_or_else(|| {
                    Error::UnsuccessfulRouting(format!("allocation on {} misses a shape", bus))
                })?;
                drivers.sort();
                let mut modes = BTreeMap::new();
                let driver_rows = drivers.iter().flat_map(|(driver, mask)| {
                    SynapseDriverOnChip::new(*bus, *driver)
                        .rows()
                        .to_vec()
                        .into_iter()
                        .map(move |row| (row, *mask))
                });
                for (key, (row, _)) in keys.iter().zip(driver_rows) {
                    rows.insert((*bus, *group, *key), row);
                    modes.insert(row, RowMode::from(key.receptor_type()));
                }
                for (driver, mask) in &drivers {
                    let driver = SynapseDriverOnChip::new(*bus, *driver);
                    let [first, second] = driver.rows();
                    let mode = |row: SynapseRowOnChip| {
                        modes.get(&row).copied().unwrap_or(RowMode::Disabled)
                    };
                    result.synapse_drivers.insert(
                        driver,
                        SynapseDriverConfig {
                            mask: *mask,
                            row_modes: [mode(first), mode(second)],
                        },
                    );
                }
            }
        }
    }

    let label_of = |source: Source, hemisphere: Hemisphere| {
        grouping
            .positions
            .get(&(source, hemisphere))
            .map(|(group, position)| {
                NeuronLabel::new(labels[*group], SynapseLabel(*position as u8))
            })
    };

    for (descriptor, projection) in &instance.projections {
        result
            .connections
            .insert(*descriptor, vec![Vec::new(); projection.connections.len()]);
    }
    for (c, placement) in constraints.connections().iter().zip(&grouping.rows) {
        let (group, bus, key) = placement.ok_or_else(|| {
            Error::UnsuccessfulRouting(format!(
                "connection {} of {:?} not grouped",
                c.connection, c.projection
            ))
        })?;
        let row = rows.get(&(bus, group, key)).copied().ok_or_else(|| {
            Error::UnsuccessfulRouting(format!("no row for {:?} on {}", key, bus))
        })?;
        let label = label_of(c.source, c.target.hemisphere).ok_or_else(|| {
            Error::UnsuccessfulRouting(format!("source {:?} without label", c.source))
        })?;
        if let Some(placed) = result
            .connections
            .get_mut(&c.projection)
            .and_then(|connections| connections.get_mut(c.connection))
        {
            placed.push(PlacedConnection {
                weight: c.weight,
                label: label.synapse_label(),
                row,
                column: c.target.column,
            });
        }
        if let Source::Internal(source) = c.source {
            let event_output = source.event_output();
            result.crossbar_nodes.insert(
                CrossbarNodeOnChip::new(
                    BusOnChip::new(c.target.hemisphere, event_output.bus_index()).crossbar_output(),
                    event_output.crossbar_input(),
                ),
                CrossbarNodeConfig::forward_all(),
            );
        }
    }

    for group in &grouping.groups {
        match group.kind {
            GroupKind::External { bus } => {
                result.crossbar_nodes.insert(
                    CrossbarNodeOnChip::new(
                        bus.crossbar_output(),
                        Spl1Address(bus.index).crossbar_input(),
                    ),
                    CrossbarNodeConfig::forward_hemisphere(bus.hemisphere),
                );
            }
            GroupKind::Background { bus, .. } => {
                result.crossbar_nodes.insert(
                    CrossbarNodeOnChip::new(
                        bus.crossbar_output(),
                        bus.background_source().crossbar_input(),
                    ),
                    CrossbarNodeConfig::forward_all(),
                );
            }
            GroupKind::Internal { .. } => {}
        }
    }
    for neuron in constraints.recorded_neurons() {
        let event_output = neuron.event_output();
        result.crossbar_nodes.insert(
            CrossbarNodeOnChip::new(
                event_output.crossbar_l2_output().crossbar_output(),
                event_output.crossbar_input(),
            ),
            CrossbarNodeConfig::forward_all(),
        );
    }

    for (descriptor, population) in &instance.populations {
        match population {
            PopulationKind::Internal(population) => {
                let neurons = population
                    .neurons
                    .iter()
                    .map(|neuron| {
                        neuron
                            .coordinate
                            .compartments
                            .iter()
                            .map(|(compartment, atomic_neurons)| {
                                let labels = atomic_neurons
                                    .iter()
                                    .map(|a| label_of(Source::Internal(*a), a.hemisphere))
                                    .collect();
                                (*compartment, labels)
                            })
                            .collect()
                    })
                    .collect();
                result.internal_neuron_labels.insert(*descriptor, neurons);
            }
            PopulationKind::External(population) => {
                let neurons = (0..population.size)
                    .map(|index| {
                        let source = Source::External {
                            population: *descriptor,
                            index,
                        };
                        Hemisphere::all()
                            .filter_map(|h| {
                                let (group, _) = grouping.positions.get(&(source, h))?;
                                let bus = grouping.groups[*group].buses().first().copied()?;
                                let label = label_of(source, h)?;
                                Some(SpikeLabel::external(h, Spl1Address(bus.index), label))
                            })
                            .collect()
                    })
                    .collect();
                result.external_spike_labels.insert(*descriptor, neurons);
            }
            PopulationKind::Background(population) => {
                let mut per_hemisphere = BTreeMap::new();
                for h in population.coordinate.keys() {
                    let spike_labels = (0..population.size)
                        .filter_map(|index| {
                            let source = Source::Background {
                                population: *descriptor,
                                index,
                            };
                            label_of(source, *h).map(SpikeLabel::background)
                        })
                        .collect::<Vec<_>>();
                    per_hemisphere.insert(*h, spike_labels);
                }
                result.background_spike_labels.insert(*descriptor, per_hemisphere);
            }
        }
    }
    Ok(result)
}

impl Router for GreedyRouter {
    fn name(&self) -> String {
        format!("GreedyRouter({:?})", self.options.synapse_driver_allocation_policy)
    }

    fn route(&mut self, network: &Network) -> Result<RoutingResult, Error> {
        let start = Instant::now();
        let mut result = RoutingResult::default();
        for (id, instance) in &network.execution_instances {
            log::trace!("routing {}", id);
            let routed = self.route_instance(instance).map_err(|e| {
                let message = format!("{} failed on {}: {}", self.name(), id, e);
                self.observer
                    .observe(Event::new(Level::Debug, "routing", message));
                e
            })?;
            result.execution_instances.insert(*id, routed);
        }
        result.timing_statistics.routing = start.elapsed();
        self.observer.observe(
            Event::new(Level::Debug, "routing", format!("{} routed network", self.name()))
                .with_duration(result.timing_statistics.routing),
        );
        if cfg!(feature = "verify-routing") {
            let start = Instant::now();
            verify_routing(network, &result)?;
            result.timing_statistics.verification = start.elapsed();
            self.observer.observe(
                Event::new(Level::Debug, "routing", "routing result verified")
                    .with_duration(result.timing_statistics.verification),
            );
        } else {
            result.timing_statistics.verification = Duration::ZERO;
        }
        Ok(result)
    }
}
