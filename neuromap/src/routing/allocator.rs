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

//! Assignment of the synapse drivers of one bus to groups of sources.
//!
//! Every request names the row-select label its events carry and the shapes
//! of driver sets it needs. A driver serves a request when its compare mask
//! lets the request's label pass and blocks the labels of all other requests.

use bitvec::array::BitArray;
use bitvec::order::Lsb0;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::chip::{
    forwards, Mask, RowSelect, SynapseDriverOnBus, ROW_SELECT_LABELS, SYNAPSE_DRIVERS_PER_BUS,
};
use crate::routing::options::AllocationPolicy;

pub type DriverSet = BitArray<[u32; 1], Lsb0>;

/// Number of search steps between two looks at the clock.
const TIMEOUT_CHECK_DIVISOR: usize = 10000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub size: usize,
    /// The drivers have to be adjacent.
    pub contiguous: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    pub shapes: Vec<Shape>,
    pub label: RowSelect,
}

impl AllocationRequest {
    pub fn size(&self) -> usize {
        self.shapes.iter().map(|s| s.size).sum()
    }

    /// Whether the order in which shapes are filled can decide success.
    pub fn is_sensitive_for_shape_allocation_order(&self) -> bool {
        self.shapes.iter().any(|s| s.contiguous)
            && self.shapes.windows(2).any(|pair| pair[0] != pair[1])
    }
}

/// Drivers handed to a request, per shape, with the mask isolating it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    pub synapse_drivers: Vec<Vec<(SynapseDriverOnBus, Mask)>>,
}

/// Masks isolating each request from all others.
pub type IsolatingMasks = Vec<Vec<Mask>>;

/// Requests each driver can serve, with the first isolating mask matching it.
pub type IsolatedSynapseDrivers = BTreeMap<SynapseDriverOnBus, Vec<(usize, Mask)>>;

#[derive(Clone, Debug, Default)]
pub struct SynapseDriverOnBusManager {
    unavailable: DriverSet,
}

impl SynapseDriverOnBusManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unavailable(drivers: impl IntoIterator<Item = SynapseDriverOnBus>) -> Self {
        let mut unavailable = DriverSet::ZERO;
        for driver in drivers {
            unavailable.set(driver.value(), true);
        }
        Self { unavailable }
    }

    pub fn is_available(&self, driver: SynapseDriverOnBus) -> bool {
        !self.unavailable[driver.value()]
    }

    pub fn num_available(&self) -> usize {
        SYNAPSE_DRIVERS_PER_BUS - self.unavailable[..SYNAPSE_DRIVERS_PER_BUS].count_ones()
    }

    /// Finds drivers for all requests, in request order, or `None` if the
    /// requests can't be served.
    pub fn solve(
        &self,
        requests: &[AllocationRequest],
        policy: &AllocationPolicy,
    ) -> Option<Vec<Allocation>> {
        let start = Instant::now();
        if !has_unique_labels(requests) {
            log::debug!("requests don't have unique labels");
            return None;
        }
        let requested: usize = requests.iter().map(AllocationRequest::size).sum();
        if requested > self.num_available() {
            log::debug!(
                "{} drivers requested, only {} available",
                requested,
                self.num_available()
            );
            return None;
        }
        let masks = generate_isolating_masks(requests);
        if !masks.iter().all(|m| !m.is_empty()) {
            log::debug!("requests can't be isolated");
            return None;
        }
        let isolated = self.generate_isolated_synapse_drivers(&masks, requests);
        if !can_be_placed_individually(&isolated, requests) {
            log::debug!("requests can't be placed individually");
            return None;
        }
        let allocations = match policy {
            AllocationPolicy::Greedy {
                enable_exclusive_first,
            } => allocate_greedy(requests, &isolated, *enable_exclusive_first),
            AllocationPolicy::Backtracking { max_duration_ms } => {
                let max_duration = max_duration_ms.map(Duration::from_millis);
                match allocate_backtracking(requests, &isolated, max_duration) {
                    Some(allocations) if valid(&allocations, requests) => allocations,
                    _ => {
                        log::debug!("backtracking found nothing, falling back to greedy");
                        allocate_greedy(requests, &isolated, true)
                    }
                }
            }
        };
        log::trace!(
            "allocation of {} requests took {:?}",
            requests.len(),
            start.elapsed()
        );
        if valid(&allocations, requests) {
            Some(allocations)
        } else {
            None
        }
    }

    pub fn generate_isolated_synapse_drivers(
        &self,
        masks: &IsolatingMasks,
        requests: &[AllocationRequest],
    ) -> IsolatedSynapseDrivers {
        let mut isolated = IsolatedSynapseDrivers::new();
        for driver in SynapseDriverOnBus::all().filter(|d| self.is_available(*d)) {
            for (i, request_masks) in masks.iter().enumerate() {
                if let Some(mask) = request_masks
                    .iter()
                    .find(|m| forwards(requests[i].label, **m, driver))
                {
                    isolated.entry(driver).or_default().push((i, *mask));
                }
            }
        }
        isolated
    }
}

pub fn has_unique_labels(requests: &[AllocationRequest]) -> bool {
    let labels = requests.iter().map(|r| r.label).collect::<BTreeSet<_>>();
    labels.len() == requests.len()
}

pub fn generate_isolating_masks(requests: &[AllocationRequest]) -> IsolatingMasks {
    let mut masks = vec![Vec::new(); requests.len()];
    for mask in (0..ROW_SELECT_LABELS as u8).map(Mask) {
        for (i, request) in requests.iter().enumerate() {
            let masked = request.label.0 & mask.0;
            let isolated = requests
                .iter()
                .enumerate()
                .all(|(j, other)| j == i || other.label.0 & mask.0 != masked);
            if isolated {
                masks[i].push(mask);
            }
        }
    }
    masks
}

fn drivers_of(
    isolated: &IsolatedSynapseDrivers,
    i: usize,
) -> impl Iterator<Item = SynapseDriverOnBus> + '_ {
    isolated
        .iter()
        .filter(move |(_, entries)| entries.iter().any(|(j, _)| *j == i))
        .map(|(driver, _)| *driver)
}

/// Every shape on its own finds enough drivers, ignoring the others.
pub fn can_be_placed_individually(
    isolated: &IsolatedSynapseDrivers,
    requests: &[AllocationRequest],
) -> bool {
    requests.iter().enumerate().all(|(i, request)| {
        request.shapes.iter().all(|shape| {
            if shape.contiguous {
                longest_run(drivers_of(isolated, i)) >= shape.size
            } else {
                drivers_of(isolated, i).count() >= shape.size
            }
        })
    })
}

fn longest_run(drivers: impl Iterator<Item = SynapseDriverOnBus>) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut last: Option<SynapseDriverOnBus> = None;
    for driver in drivers {
        current = match last {
            Some(l) if l.0 + 1 == driver.0 => current + 1,
            _ => 1,
        };
        longest = std::cmp::max(longest, current);
        last = Some(driver);
    }
    longest
}

pub fn is_contiguous(drivers: &BTreeSet<SynapseDriverOnBus>) -> bool {
    match (drivers.iter().next(), drivers.iter().next_back()) {
        (Some(first), Some(last)) => (last.0 - first.0) as usize == drivers.len() - 1,
        _ => true,
    }
}

fn mask_for(
    isolated: &IsolatedSynapseDrivers,
    driver: SynapseDriverOnBus,
    i: usize,
) -> Option<Mask> {
    isolated
        .get(&driver)?
        .iter()
        .find(|(j, _)| *j == i)
        .map(|(_, mask)| *mask)
}

/// First fit over the drivers, largest request first. Contiguous shapes take
/// the first run of free drivers long enough, all at once.
pub fn allocate_greedy(
    requests: &[AllocationRequest],
    isolated: &IsolatedSynapseDrivers,
    exclusive_first: bool,
) -> Vec<Allocation> {
    let mut allocations = requests
        .iter()
        .map(|r| Allocation {
            synapse_drivers: vec![Vec::new(); r.shapes.len()],
        })
        .collect::<Vec<_>>();
    let mut order = (0..requests.len()).collect::<Vec<_>>();
    order.sort_by_key(|i| std::cmp::Reverse(requests[*i].size()));

    let mut used = DriverSet::ZERO;
    let mut fill = |exclusive: bool, used: &mut DriverSet| {
        for &i in &order {
            for (j, shape) in requests[i].shapes.iter().enumerate() {
                let allocated = &mut allocations[i].synapse_drivers[j];
                if allocated.len() == shape.size {
                    continue;
                }
                let candidates = isolated
                    .iter()
                    .filter(|(driver, _)| !used[driver.value()])
                    .filter(|(_, entries)| !exclusive || entries.len() == 1)
                    .filter_map(|(driver, _)| mask_for(isolated, *driver, i).map(|m| (*driver, m)))
                    .collect::<Vec<_>>();
                if shape.contiguous {
                    let run = candidates
                        .windows(shape.size)
                        .find(|w| w.windows(2).all(|p| p[0].0 .0 + 1 == p[1].0 .0));
                    if let Some(run) = run {
                        allocated.extend_from_slice(run);
                    }
                } else {
                    let missing = shape.size - allocated.len();
                    allocated.extend(candidates.into_iter().take(missing));
                }
                for (driver, _) in allocated.iter() {
                    used.set(driver.value(), true);
                }
            }
        }
    };
    if exclusive_first {
        fill(true, &mut used);
    }
    fill(false, &mut used);
    allocations
}

struct Backtracking<'a> {
    requests: &'a [AllocationRequest],
    /// Drivers able to serve anything, with the requests they can serve.
    positions: Vec<(SynapseDriverOnBus, Vec<(usize, Mask)>)>,
    requested: Vec<usize>,
    /// Positions from index on able to serve each request.
    open: Vec<Vec<usize>>,
    assigned: Vec<Vec<(SynapseDriverOnBus, Mask)>>,
    start: Instant,
    max_duration: Option<Duration>,
    iterations: usize,
    stopped: bool,
}

impl<'a> Backtracking<'a> {
    fn new(
        requests: &'a [AllocationRequest],
        isolated: &IsolatedSynapseDrivers,
        max_duration: Option<Duration>,
    ) -> Self {
        let positions = isolated
            .iter()
            .map(|(driver, entries)| (*driver, entries.clone()))
            .collect::<Vec<_>>();
        let mut open = vec![vec![0; requests.len()]; positions.len() + 1];
        for p in (0..positions.len()).rev() {
            open[p] = open[p + 1].clone();
            for (i, _) in &positions[p].1 {
                open[p][*i] += 1;
            }
        }
        Self {
            requests,
            positions,
            requested: requests.iter().map(AllocationRequest::size).collect(),
            open,
            assigned: vec![Vec::new(); requests.len()],
            start: Instant::now(),
            max_duration,
            iterations: 0,
            stopped: false,
        }
    }

    fn timed_out(&mut self) -> bool {
        if let Some(max_duration) = self.max_duration {
            if self.iterations % TIMEOUT_CHECK_DIVISOR == 0
                && self.start.elapsed() >= max_duration
            {
                self.stopped = true;
            }
        }
        self.iterations += 1;
        self.stopped
    }

    fn reject(&self, position: usize) -> bool {
        for (i, request) in self.requests.iter().enumerate() {
            let assigned = &self.assigned[i];
            if assigned.len() > self.requested[i] {
                return true;
            }
            if assigned.len() + self.open[position][i] < self.requested[i] {
                return true;
            }
            // shapes are filled in order by ascending drivers
            let mut offset = 0;
            for shape in &request.shapes {
                if offset >= assigned.len() {
                    break;
                }
                let end = std::cmp::min(offset + shape.size, assigned.len());
                if shape.contiguous {
                    let local = &assigned[offset..end];
                    if let (Some(first), Some(last)) = (local.first(), local.last()) {
                        if (last.0 .0 - first.0 .0) as usize != local.len() - 1 {
                            return true;
                        }
                    }
                }
                offset += shape.size;
            }
        }
        false
    }

    fn accept(&self) -> bool {
        self.assigned
            .iter()
            .zip(&self.requested)
            .all(|(assigned, requested)| assigned.len() == *requested)
    }

    fn output(&self) -> Vec<Allocation> {
        self.requests
            .iter()
            .zip(&self.assigned)
            .map(|(request, assigned)| {
                let mut rest = assigned.as_slice();
                let synapse_drivers = request
                    .shapes
                    .iter()
                    .map(|shape| {
                        let (head, tail) = rest.split_at(shape.size);
                        rest = tail;
                        head.to_vec()
                    })
                    .collect();
                Allocation { synapse_drivers }
            })
            .collect()
    }

    fn search(&mut self, position: usize) -> Option<Vec<Allocation>> {
        if self.timed_out() || self.reject(position) {
            return None;
        }
        if self.accept() {
            return Some(self.output());
        }
        if position == self.positions.len() {
            return None;
        }
        let (driver, entries) = self.positions[position].clone();
        for (i, mask) in entries {
            self.assigned[i].push((driver, mask));
            let found = self.search(position + 1);
            self.assigned[i].pop();
            if found.is_some() || self.stopped {
                return found;
            }
        }
        self.search(position + 1)
    }
}

/// Depth-first search over the drivers in ascending order, trying each
/// request the driver can serve and then leaving it unused. The first
/// complete allocation found is returned. Gives `None` when the search space
/// is exhausted or `max_duration` elapsed.
pub fn allocate_backtracking(
    requests: &[AllocationRequest],
    isolated: &IsolatedSynapseDrivers,
    max_duration: Option<Duration>,
) -> Option<Vec<Allocation>> {
    let mut search = Backtracking::new(requests, isolated, max_duration);
    let found = search.search(0);
    log::trace!(
        "backtracking explored {} candidates (stopped: {})",
        search.iterations,
        search.stopped
    );
    found
}

/// Sizes and contiguity as requested, each driver used at most once, and
/// only drivers isolating their request.
pub fn valid(allocations: &[Allocation], requests: &[AllocationRequest]) -> bool {
    if allocations.len() != requests.len() {
        return false;
    }
    let mut used = BTreeSet::new();
    for (i, (allocation, request)) in allocations.iter().zip(requests).enumerate() {
        if allocation.synapse_drivers.len() != request.shapes.len() {
            return false;
        }
        for (drivers, shape) in allocation.synapse_drivers.iter().zip(&request.shapes) {
            let unique = drivers.iter().map(|(d, _)| *d).collect::<BTreeSet<_>>();
            if unique.len() != drivers.len() || unique.len() != shape.size {
                return false;
            }
            if shape.contiguous && !is_contiguous(&unique) {
                return false;
            }
            for (driver, mask) in drivers {
                if !used.insert(*driver) || !forwards(request.label, *mask, *driver) {
                    return false;
                }
                let leaks = requests
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && forwards(other.label, *mask, *driver));
                if leaks {
                    return false;
                }
            }
        }
    }
    true
}
