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

//! Grouping of event sources sharing a row-select label, and the synapse
//! rows each group needs on the buses it reaches.

use num::Integer;
use std::collections::{BTreeMap, BTreeSet};

use crate::chip::{
    AtomicNeuron, BusOnChip, Hemisphere, ReceptorType, BUSES_PER_HEMISPHERE,
    ROWS_PER_SYNAPSE_DRIVER, ROW_SELECT_LABELS, SYNAPSE_DRIVERS_PER_BUS, SYNAPSE_LABELS,
};
use crate::network::{PopulationDescriptor, ProjectionDescriptor};
use crate::routing::allocator::Shape;
use crate::routing::connection::{AtomicConnection, Source};
use crate::routing::constraints::RoutingConstraints;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupKind {
    /// Neurons on the event outputs feeding bus `bus_index` of both
    /// hemispheres.
    Internal { bus_index: u8 },
    Background {
        population: PopulationDescriptor,
        bus: BusOnChip,
    },
    /// Off-chip sources entering through the L2 input of `bus`.
    External { bus: BusOnChip },
}

/// Sources sharing one row-select label. The position of a source is its
/// synapse label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceGroup {
    pub kind: GroupKind,
    pub sources: Vec<Source>,
}

impl SourceGroup {
    pub fn buses(&self) -> Vec<BusOnChip> {
        match self.kind {
            GroupKind::Internal { bus_index } => Hemisphere::all()
                .map(|h| BusOnChip::new(h, bus_index))
                .collect(),
            GroupKind::Background { bus, .. } | GroupKind::External { bus } => vec![bus],
        }
    }
}

/// Synapse row a connection is placed on, relative to its group and bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RowKey {
    /// Row holding only synapses of one source of a projection which needs
    /// one source per row.
    Dedicated {
        projection: ProjectionDescriptor,
        source: usize,
        split: usize,
        receptor_type: ReceptorType,
    },
    /// The `slot`-th row of a receptor type shared by all sources of the
    /// group.
    Shared {
        receptor_type: ReceptorType,
        slot: usize,
    },
}

impl RowKey {
    pub fn receptor_type(&self) -> ReceptorType {
        match self {
            Self::Dedicated { receptor_type, .. } | Self::Shared { receptor_type, .. } => {
                *receptor_type
            }
        }
    }
}

/// Rows of a group on one bus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupDemand {
    pub dedicated: BTreeSet<RowKey>,
    pub shared: BTreeSet<RowKey>,
}

impl GroupDemand {
    fn drivers_for(rows: usize) -> usize {
        Integer::div_ceil(&rows, &ROWS_PER_SYNAPSE_DRIVER)
    }

    pub fn num_drivers(&self) -> usize {
        Self::drivers_for(self.dedicated.len()) + Self::drivers_for(self.shared.len())
    }

    /// Dedicated rows need adjacent drivers to stay in source order.
    pub fn shapes(&self) -> Vec<Shape> {
        let mut shapes = Vec::new();
        if !self.dedicated.is_empty() {
            shapes.push(Shape {
                size: Self::drivers_for(self.dedicated.len()),
                contiguous: true,
            });
        }
        if !self.shared.is_empty() {
            shapes.push(Shape {
                size: Self::drivers_for(self.shared.len()),
                contiguous: false,
            });
        }
        shapes
    }
}

/// Row keys for connections of one group arriving on one bus, in order.
fn row_keys<'c>(
    constraints: &RoutingConstraints,
    dedicated_projections: &BTreeSet<ProjectionDescriptor>,
    connections: impl Iterator<Item = &'c AtomicConnection>,
) -> (GroupDemand, Vec<RowKey>) {
    let mut demand = GroupDemand::default();
    let mut slots: BTreeMap<(AtomicNeuron, ReceptorType), usize> = BTreeMap::new();
    let mut keys = Vec::new();
    for c in connections {
        let key = if dedicated_projections.contains(&c.projection) {
            let source = constraints.instance().projections[&c.projection].connections[c.connection]
                .index_pre
                .0;
            let key = RowKey::Dedicated {
                projection: c.projection,
                source,
                split: c.split,
                receptor_type: c.receptor_type,
            };
            demand.dedicated.insert(key);
            key
        } else {
            let slot = slots.entry((c.target, c.receptor_type)).or_default();
            let key = RowKey::Shared {
                receptor_type: c.receptor_type,
                slot: *slot,
            };
            *slot += 1;
            demand.shared.insert(key);
            key
        };
        keys.push(key);
    }
    (demand, keys)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceGrouping {
    pub groups: Vec<SourceGroup>,
    /// Index into the label sequence of every group. Internal groups of a
    /// bus index come first and use the same index in both hemispheres.
    pub label_index: Vec<usize>,
    /// Group and position of a source, per target hemisphere.
    pub positions: BTreeMap<(Source, Hemisphere), (usize, usize)>,
    pub demand: BTreeMap<(BusOnChip, usize), GroupDemand>,
    /// Group, bus and row of every atomic connection, in constraint order.
    pub rows: Vec<Option<(usize, BusOnChip, RowKey)>>,
}

impl SourceGrouping {
    /// Groups whose labels arrive at `bus`, in group order.
    pub fn groups_on(&self, bus: BusOnChip) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.buses().contains(&bus))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn demand(&self, bus: BusOnChip, group: usize) -> GroupDemand {
        self.demand.get(&(bus, group)).cloned().unwrap_or_default()
    }

    fn push(&mut self, group: SourceGroup, hemispheres: &[Hemisphere]) -> usize {
        let index = self.groups.len();
        for (position, source) in group.sources.iter().enumerate() {
            for h in hemispheres {
                self.positions.insert((*source, *h), (index, position));
            }
        }
        self.groups.push(group);
        index
    }

    /// Bus of the group an atomic connection's source belongs to.
    fn locate(&self, c: &AtomicConnection) -> Option<(usize, BusOnChip)> {
        let hemisphere = c.target.hemisphere;
        let (group, _) = *self.positions.get(&(c.source, hemisphere))?;
        let bus = self.groups[group]
            .buses()
            .into_iter()
            .find(|b| b.hemisphere == hemisphere)?;
        Some((group, bus))
    }
}

/// Groups all sources and derives the rows they need.
///
/// Internal sources are grouped per bus index, background sources per
/// population and bus. External sources of each hemisphere are filled into
/// groups bus by bus, as long as the drivers left by the other groups
/// suffice.
pub fn group_sources(constraints: &RoutingConstraints) -> Result<SourceGrouping, Error> {
    let instance = constraints.instance();
    let dedicated = instance.one_source_per_row_projections();
    let mut grouping = SourceGrouping::default();

    let bus_constraints = constraints.bus_constraints();
    for bus_index in 0..BUSES_PER_HEMISPHERE as u8 {
        let mut neurons = BTreeSet::new();
        for h in Hemisphere::all() {
            let bus = &bus_constraints[&BusOnChip::new(h, bus_index)];
            neurons.extend(bus.neuron_sources.iter().copied());
            neurons.extend(bus.only_recorded_neurons.iter().copied());
        }
        let neurons = neurons.into_iter().collect::<Vec<_>>();
        for chunk in neurons.chunks(SYNAPSE_LABELS) {
            let group = SourceGroup {
                kind: GroupKind::Internal { bus_index },
                sources: chunk.iter().map(|a| Source::Internal(*a)).collect(),
            };
            grouping.push(group, &[Hemisphere::TOP, Hemisphere::BOTTOM]);
        }
    }

    for (descriptor, population) in &instance.populations {
        let background = match population.as_background() {
            Some(background) => background,
            None => continue,
        };
        if background.size > SYNAPSE_LABELS {
            return Err(Error::UnsuccessfulRouting(format!(
                "background population {:?} exceeds {} sources",
                descriptor, SYNAPSE_LABELS
            )));
        }
        for (h, index) in &background.coordinate {
            let group = SourceGroup {
                kind: GroupKind::Background {
                    population: *descriptor,
                    bus: BusOnChip::new(*h, *index),
                },
                sources: (0..background.size)
                    .map(|index| Source::Background {
                        population: *descriptor,
                        index,
                    })
                    .collect(),
            };
            grouping.push(group, &[*h]);
        }
    }

    // drivers used by internal and background sources
    let mut on_bus: BTreeMap<(BusOnChip, usize), Vec<usize>> = BTreeMap::new();
    let mut external: BTreeMap<Hemisphere, BTreeMap<Source, Vec<usize>>> = BTreeMap::new();
    for (i, c) in constraints.connections().iter().enumerate() {
        match c.source {
            Source::External { .. } => external
                .entry(c.target.hemisphere)
                .or_default()
                .entry(c.source)
                .or_default()
                .push(i),
            _ => {
                let (group, bus) = grouping.locate(c).ok_or_else(|| {
                    Error::UnsuccessfulRouting(format!("source {:?} not grouped", c.source))
                })?;
                on_bus.entry((bus, group)).or_default().push(i);
            }
        }
    }
    let demand_of = |indices: &[usize]| {
        row_keys(
            constraints,
            &dedicated,
            indices.iter().map(|i| &constraints.connections()[*i]),
        )
        .0
    };
    let mut used: BTreeMap<BusOnChip, usize> = BTreeMap::new();
    for ((bus, _), indices) in &on_bus {
        *used.entry(*bus).or_default() += demand_of(indices.as_slice()).num_drivers();
    }

    for (hemisphere, sources) in &external {
        let mut bus_index = 0;
        let mut current: Vec<(Source, &Vec<usize>)> = Vec::new();
        let remaining = |bus_index: u8, used: &BTreeMap<BusOnChip, usize>| {
            let bus = BusOnChip::new(*hemisphere, bus_index);
            SYNAPSE_DRIVERS_PER_BUS.saturating_sub(used.get(&bus).copied().unwrap_or(0))
        };
        let indices_of = |group: &[(Source, &Vec<usize>)]| {
            let mut indices = group.iter().flat_map(|(_, i)| i.iter().copied()).collect::<Vec<_>>();
            indices.sort_unstable();
            indices
        };
        let mut groups = Vec::new();
        for (source, indices) in sources {
            let mut candidate = current.clone();
            candidate.push((*source, indices));
            if candidate.len() <= SYNAPSE_LABELS
                && demand_of(&indices_of(&candidate[..])[..]).num_drivers()
                    <= remaining(bus_index, &used)
            {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                let bus = BusOnChip::new(*hemisphere, bus_index);
                let demand = demand_of(&indices_of(&current[..])[..]);
                *used.entry(bus).or_default() += demand.num_drivers();
                groups.push((bus, std::mem::take(&mut current)));
            }
            while demand_of(indices.as_slice()).num_drivers() > remaining(bus_index, &used) {
                bus_index += 1;
                if bus_index as usize == BUSES_PER_HEMISPHERE {
                    return Err(Error::UnsuccessfulRouting(format!(
                        "no bus of {} left for external source {:?}",
                        hemisphere, source
                    )));
                }
            }
            current.push((*source, indices));
        }
        if !current.is_empty() {
            let bus = BusOnChip::new(*hemisphere, bus_index);
            *used.entry(bus).or_default() += demand_of(&indices_of(&current[..])[..]).num_drivers();
            groups.push((bus, current));
        }
        for (bus, members) in groups {
            let indices = indices_of(&members[..]);
            let group = SourceGroup {
                kind: GroupKind::External { bus },
                sources: members.iter().map(|(s, _)| *s).collect(),
            };
            let index = grouping.push(group, &[*hemisphere]);
            on_bus.insert((bus, index), indices);
        }
    }

    let mut next_index: BTreeMap<BusOnChip, usize> = BTreeMap::new();
    for group in &grouping.groups {
        if let GroupKind::Internal { bus_index } = group.kind {
            for h in Hemisphere::all() {
                *next_index.entry(BusOnChip::new(h, bus_index)).or_default() += 1;
            }
        }
    }
    let mut internal_index: BTreeMap<u8, usize> = BTreeMap::new();
    for group in &grouping.groups {
        let index = match group.kind {
            GroupKind::Internal { bus_index } => {
                let index = internal_index.entry(bus_index).or_default();
                *index += 1;
                *index - 1
            }
            GroupKind::Background { bus, .. } | GroupKind::External { bus } => {
                let index = next_index.entry(bus).or_default();
                *index += 1;
                *index - 1
            }
        };
        grouping.label_index.push(index);
    }
    for (bus, count) in &next_index {
        if *count > ROW_SELECT_LABELS {
            return Err(Error::UnsuccessfulRouting(format!(
                "{} source groups on {}, only {} row-select labels",
                count, bus, ROW_SELECT_LABELS
            )));
        }
    }

    grouping.rows = vec![None; constraints.connections().len()];
    for ((bus, group), indices) in &on_bus {
        let (demand, keys) = row_keys(
            constraints,
            &dedicated,
            indices.iter().map(|i| &constraints.connections()[*i]),
        );
        for (i, key) in indices.iter().zip(keys) {
            grouping.rows[*i] = Some((*group, *bus, key));
        }
        grouping.demand.insert((*bus, *group), demand);
    }
    Ok(grouping)
}
