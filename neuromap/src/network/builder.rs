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
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chip::{AtomicNeuron, MADC_NEURONS, PADS};
use crate::network::*;
use crate::observe::{log_observer, Event, SharedObserver};
use crate::Error;

/// Anything that can be added to a network.
pub trait NetworkElement {
    type Descriptor;

    /// Validates `self` against what is already in `instance` and stores it.
    fn add_to(
        self,
        instance: &mut NetworkInstance,
    ) -> Result<Self::Descriptor, Error>;
}

/// Accumulates network elements, validating each one when it is added.
pub struct NetworkBuilder {
    execution_instances: BTreeMap<ExecutionInstance, NetworkInstance>,
    duration: Duration,
    observer: SharedObserver,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::with_observer(log_observer())
    }

    pub fn with_observer(observer: SharedObserver) -> Self {
        Self {
            execution_instances: BTreeMap::new(),
            duration: Duration::ZERO,
            observer,
        }
    }

    /// Adds `element` to the default execution instance.
    pub fn add<T: NetworkElement>(&mut self, element: T) -> Result<T::Descriptor, Error> {
        self.add_to_instance(element, ExecutionInstance::default())
    }

    pub fn add_to_instance<T: NetworkElement>(
        &mut self,
        element: T,
        instance: ExecutionInstance,
    ) -> Result<T::Descriptor, Error> {
        let start = Instant::now();
        let network_instance = self.execution_instances.entry(instance).or_default();
        let descriptor = element.add_to(network_instance);
        if network_instance == &NetworkInstance::default() {
            // nothing added yet, don't create the instance on failure
            self.execution_instances.remove(&instance);
        }
        let elapsed = start.elapsed();
        self.duration += elapsed;
        match &descriptor {
            Ok(_) => log::trace!(
                "add(): added {} to {} in {:?}",
                std::any::type_name::<T>(),
                instance,
                elapsed
            ),
            Err(e) => log::debug!("add(): rejected {}: {}", std::any::type_name::<T>(), e),
        }
        descriptor
    }

    /// Moves the accumulated elements into a network and resets the builder.
    pub fn done(&mut self) -> Arc<Network> {
        let network = Network {
            execution_instances: std::mem::take(&mut self.execution_instances),
            construction_duration: std::mem::replace(&mut self.duration, Duration::ZERO),
        };
        self.observer.observe(
            Event::new(
                Level::Debug,
                "network_builder",
                format!(
                    "done(): built network with {} execution instance(s)",
                    network.execution_instances.len()
                ),
            )
            .with_duration(network.construction_duration),
        );
        Arc::new(network)
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, Error> {
    Err(Error::Validation(msg.into()))
}

fn next_key<K: Copy, V>(
    map: &BTreeMap<K, V>,
    make: impl Fn(usize) -> K,
    index: impl Fn(&K) -> usize,
) -> K {
    make(map.keys().next_back().map_or(0, |k| index(k) + 1))
}

fn next_population(instance: &NetworkInstance) -> PopulationDescriptor {
    next_key(&instance.populations, PopulationDescriptor, |d| d.0)
}

impl NetworkElement for Population {
    type Descriptor = PopulationDescriptor;

    fn add_to(self, instance: &mut NetworkInstance) -> Result<PopulationDescriptor, Error> {
        if !self.valid() {
            return invalid("population shape not valid");
        }
        if let Some(a) = self.atomic_neurons().find(|a| !a.is_valid()) {
            return invalid(format!("{} out of range", a));
        }
        if !self.atomic_neurons_unique() {
            return invalid("atomic neurons of population not unique");
        }
        let used = instance
            .internal_populations()
            .flat_map(|(_, p)| p.atomic_neurons().copied())
            .collect::<BTreeSet<AtomicNeuron>>();
        if let Some(a) = self.atomic_neurons().find(|a| used.contains(a)) {
            return invalid(format!("{} already used by another population", a));
        }
        let descriptor = next_population(instance);
        instance
            .populations
            .insert(descriptor, PopulationKind::Internal(self));
        Ok(descriptor)
    }
}

impl NetworkElement for ExternalSourcePopulation {
    type Descriptor = PopulationDescriptor;

    fn add_to(self, instance: &mut NetworkInstance) -> Result<PopulationDescriptor, Error> {
        let descriptor = next_population(instance);
        instance
            .populations
            .insert(descriptor, PopulationKind::External(self));
        Ok(descriptor)
    }
}

impl NetworkElement for BackgroundSourcePopulation {
    type Descriptor = PopulationDescriptor;

    fn add_to(self, instance: &mut NetworkInstance) -> Result<PopulationDescriptor, Error> {
        if !self.valid() {
            return invalid(format!(
                "background source population not valid (size {}, random {}, coordinate {:?})",
                self.size, self.config.enable_random, self.coordinate
            ));
        }
        for other in instance
            .populations
            .values()
            .filter_map(PopulationKind::as_background)
        {
            for (hemisphere, bus) in &self.coordinate {
                if other.coordinate.get(hemisphere) == Some(bus) {
                    return invalid(format!(
                        "background source on bus {} of {} already in use",
                        bus, hemisphere
                    ));
                }
            }
        }
        let descriptor = next_population(instance);
        instance
            .populations
            .insert(descriptor, PopulationKind::Background(self));
        Ok(descriptor)
    }
}

fn check_connection(
    instance: &NetworkInstance,
    projection: &Projection,
    connection: &Connection,
) -> Result<(), Error> {
    let pre = &instance.populations[&projection.population_pre];
    let post = instance
        .internal_population(projection.population_post)
        .ok_or_else(|| Error::Validation("projection target is not an on-chip population".into()))?;
    let (index_pre, compartment_pre) = connection.index_pre;
    let (index_post, compartment_post) = connection.index_post;
    if index_pre >= pre.size() {
        return invalid(format!("connection source index {} out of range", index_pre));
    }
    if index_post >= post.size() {
        return invalid(format!("connection target index {} out of range", index_post));
    }
    match pre {
        PopulationKind::Internal(population) => {
            let neuron = &population.neurons[index_pre];
            if !neuron.compartments.contains_key(&compartment_pre) {
                return invalid(format!(
                    "connection source compartment {:?} not present",
                    compartment_pre
                ));
            }
            if neuron.spike_master(compartment_pre).is_none() {
                return invalid("connection source compartment has no spike master");
            }
        }
        _ => {
            if compartment_pre != CompartmentOnNeuron(0) {
                return invalid("connection source compartment of off-chip population must be 0");
            }
        }
    }
    let target = &post.neurons[index_post];
    let compartment = target
        .compartments
        .get(&compartment_post)
        .ok_or_else(|| {
            Error::Validation(format!(
                "connection target compartment {:?} not present",
                compartment_post
            ))
        })?;
    let atomic_neurons = &target.coordinate.compartments[&compartment_post];
    let mut candidates = compartment
        .receptors
        .iter()
        .zip(atomic_neurons)
        .filter(|(receptors, _)| receptors.contains(&projection.receptor))
        .map(|(_, atomic_neuron)| *atomic_neuron)
        .peekable();
    if candidates.peek().is_none() {
        return invalid(format!(
            "receptor {:?} not available on connection target compartment",
            projection.receptor
        ));
    }
    if let PopulationKind::Background(background) = pre {
        if !candidates.any(|a| background.coordinate.contains_key(&a.hemisphere)) {
            return invalid("background source cannot reach connection target");
        }
    }
    Ok(())
}

impl NetworkElement for Projection {
    type Descriptor = ProjectionDescriptor;

    fn add_to(self, instance: &mut NetworkInstance) -> Result<ProjectionDescriptor, Error> {
        if !instance.populations.contains_key(&self.population_pre) {
            return invalid(format!("{:?} not present", self.population_pre));
        }
        if !instance.populations.contains_key(&self.population_post) {
            return invalid(format!("{:?} not present", self.population_post));
        }
        let mut pairs = BTreeSet::new();
        for connection in &self.connections {
            check_connection(instance, &self, connection)?;
            if !pairs.insert((connection.index_pre, connection.index_post)) {
                return invalid(format!(
                    "connection {:?} -> {:?} not unique",
                    connection.index_pre, connection.index_post
                ));
            }
        }
        let descriptor = next_key(&instance.projections, ProjectionDescriptor, |d| d.0);
        instance.projections.insert(descriptor, self);
        Ok(descriptor)
    }
}

fn resolve_recorded(
    instance: &NetworkInstance,
    neuron: &RecordedNeuron,
) -> Result<AtomicNeuron, Error> {
    instance.resolve(&neuron.coordinate).ok_or_else(|| {
        Error::Validation(format!("recorded neuron {:?} not present", neuron.coordinate))
    })
}

/// Fails if any of `requested` asks for a different readout source than
/// already requested for the same atomic neuron, by `existing` or within
/// `requested` itself.
fn check_readout_conflicts(
    existing: Vec<(AtomicNeuron, ReadoutSource)>,
    requested: &[(AtomicNeuron, ReadoutSource)],
) -> Result<(), Error> {
    let mut sources = BTreeMap::new();
    for (atomic_neuron, source) in existing.iter().chain(requested) {
        if let Some(previous) = sources.insert(*atomic_neuron, *source) {
            if previous != *source {
                return invalid(format!(
                    "readout source of {} conflicts: {:?} vs. {:?}",
                    atomic_neuron, previous, source
                ));
            }
        }
    }
    Ok(())
}

fn resolve_all(
    instance: &NetworkInstance,
    neurons: &[RecordedNeuron],
) -> Result<Vec<(AtomicNeuron, ReadoutSource)>, Error> {
    neurons
        .iter()
        .map(|n| -> Result<_, Error> { Ok((resolve_recorded(instance, n)?, n.source)) })
        .collect()
}

impl NetworkElement for MadcRecording {
    type Descriptor = ();

    fn add_to(self, instance: &mut NetworkInstance) -> Result<(), Error> {
        if instance.madc_recording.is_some() {
            return invalid("only one MADC recording per execution instance allowed");
        }
        if self.neurons.is_empty() || self.neurons.len() > MADC_NEURONS {
            return invalid(format!(
                "MADC records 1 to {} neurons, not {}",
                MADC_NEURONS,
                self.neurons.len()
            ));
        }
        let requested = resolve_all(instance, &self.neurons)?;
        if requested.len() == 2 && requested[0].0 == requested[1].0 {
            return invalid("MADC recording neurons not unique");
        }
        check_readout_conflicts(instance.readout_sources(), &requested)?;
        instance.madc_recording = Some(self);
        Ok(())
    }
}

impl NetworkElement for CadcRecording {
    type Descriptor = ();

    fn add_to(self, instance: &mut NetworkInstance) -> Result<(), Error> {
        if instance.cadc_recording.is_some() {
            return invalid("only one CADC recording per execution instance allowed");
        }
        let requested = resolve_all(instance, &self.neurons)?;
        let unique = requested.iter().map(|(a, _)| a).collect::<BTreeSet<_>>();
        if unique.len() != requested.len() {
            return invalid("CADC recording neurons not unique");
        }
        check_readout_conflicts(instance.readout_sources(), &requested)?;
        instance.cadc_recording = Some(self);
        Ok(())
    }
}

impl NetworkElement for PadRecording {
    type Descriptor = ();

    fn add_to(self, instance: &mut NetworkInstance) -> Result<(), Error> {
        if instance.pad_recording.is_some() {
            return invalid("only one pad recording per execution instance allowed");
        }
        if let Some(pad) = self.recordings.keys().find(|pad| pad.0 as usize >= PADS) {
            return invalid(format!("{:?} out of range", pad));
        }
        let neurons = self
            .recordings
            .values()
            .map(|r| r.neuron)
            .collect::<Vec<_>>();
        let requested = resolve_all(instance, &neurons)?;
        check_readout_conflicts(instance.readout_sources(), &requested)?;
        instance.pad_recording = Some(self);
        Ok(())
    }
}

fn check_in_order_sources(
    instance: &NetworkInstance,
    projection: &Projection,
) -> Result<(), Error> {
    if !projection.is_dense_in_order() {
        return invalid("projection of plasticity rule not dense and in order");
    }
    let population = match instance.internal_population(projection.population_pre) {
        Some(population) => population,
        None => return Ok(()),
    };
    let mut sources = projection
        .connections
        .iter()
        .map(|c| c.index_pre)
        .collect::<Vec<_>>();
    sources.dedup();
    let keys = sources
        .iter()
        .filter_map(|(index, compartment)| population.neurons[*index].spike_master(*compartment))
        .map(|a| (a.event_output().bus_index(), a))
        .collect::<Vec<_>>();
    if keys.windows(2).any(|pair| pair[0] > pair[1]) {
        return invalid("sources of in-order projection not sorted by bus and neuron");
    }
    Ok(())
}

impl NetworkElement for PlasticityRule {
    type Descriptor = PlasticityRuleDescriptor;

    fn add_to(self, instance: &mut NetworkInstance) -> Result<PlasticityRuleDescriptor, Error> {
        for descriptor in &self.projections {
            let projection = match instance.projections.get(descriptor) {
                Some(projection) => projection,
                None => {
                    return invalid(format!(
                        "projection {:?} of plasticity rule not present",
                        descriptor
                    ))
                }
            };
            if self.enable_requires_one_source_per_row_in_order {
                check_in_order_sources(instance, projection)?;
            }
        }
        let mut requested = Vec::new();
        for handle in &self.populations {
            let population = instance
                .internal_population(handle.descriptor)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "population {:?} of plasticity rule not on-chip",
                        handle.descriptor
                    ))
                })?;
            if handle.neuron_readout_sources.len() != population.size() {
                return invalid("plasticity rule readout sources do not match population size");
            }
            let neurons = population.neurons.iter().zip(&handle.neuron_readout_sources);
            for (neuron, readouts) in neurons {
                if !readouts.keys().eq(neuron.coordinate.compartments.keys()) {
                    return invalid("plasticity rule readout sources do not match compartments");
                }
                for (compartment, sources) in readouts {
                    if sources.len() != neuron.coordinate.compartments[compartment].len() {
                        return invalid(
                            "plasticity rule readout sources do not match atomic neurons",
                        );
                    }
                    for (i, source) in sources.iter().enumerate() {
                        let atomic_neuron = neuron.atomic_neuron(*compartment, i);
                        if let (Some(source), Some(a)) = (source, atomic_neuron) {
                            requested.push((a, *source));
                        }
                    }
                }
            }
        }
        check_readout_conflicts(instance.readout_sources(), &requested)?;
        let descriptor = next_key(&instance.plasticity_rules, PlasticityRuleDescriptor, |d| d.0);
        instance.plasticity_rules.insert(descriptor, self);
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{Hemisphere, Pad};
    use crate::observe::RecordingObserver;

    fn neurons(hemisphere: Hemisphere, columns: std::ops::Range<u16>) -> Vec<AtomicNeuron> {
        columns.map(|c| AtomicNeuron::new(hemisphere, c)).collect()
    }

    fn population(columns: std::ops::Range<u16>) -> Population {
        Population::from_atomic_neurons(
            &neurons(Hemisphere::TOP, columns),
            &[Receptor::excitatory()],
            true,
        )
    }

    #[test]
    fn population_overlap() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut builder = NetworkBuilder::new();
        assert_eq!(builder.add(population(0..4)), Ok(PopulationDescriptor(0)));
        assert!(matches!(builder.add(population(3..5)), Err(Error::Validation(_))));
        assert_eq!(builder.add(population(4..6)), Ok(PopulationDescriptor(1)));
        // other execution instances are independent
        assert_eq!(
            builder.add_to_instance(population(0..4), ExecutionInstance(1)),
            Ok(PopulationDescriptor(0))
        );
        let out_of_range = Population::from_atomic_neurons(
            &[AtomicNeuron::new(Hemisphere::TOP, 256)],
            &[Receptor::excitatory()],
            false,
        );
        assert!(builder.add(out_of_range).is_err());
    }

    #[test]
    fn projection_checks() {
        let mut builder = NetworkBuilder::new();
        let external = builder.add(ExternalSourcePopulation::new(2)).unwrap();
        let internal = builder.add(population(0..2)).unwrap();

        let inhibitory = Receptor::inhibitory();
        let missing_receptor = Projection::one_to_one(inhibitory, &[1, 1], external, internal);
        assert!(matches!(builder.add(missing_receptor), Err(Error::Validation(_))));

        let excitatory = Receptor::excitatory();
        let out_of_range = Projection::one_to_one(excitatory, &[1, 1, 1], external, internal);
        assert!(builder.add(out_of_range).is_err());

        let mut duplicate = Projection::one_to_one(excitatory, &[1, 1], external, internal);
        duplicate.connections.push(Connection::new(0, 0, 5));
        assert!(builder.add(duplicate).is_err());

        let mut compartment = Projection::one_to_one(excitatory, &[1], external, internal);
        compartment.connections[0].index_pre.1 = CompartmentOnNeuron(1);
        assert!(builder.add(compartment).is_err());

        let to_external = Projection::one_to_one(Receptor::excitatory(), &[1], internal, external);
        assert!(builder.add(to_external).is_err());

        let missing_population =
            Projection::one_to_one(Receptor::excitatory(), &[1], PopulationDescriptor(7), internal);
        assert!(builder.add(missing_population).is_err());

        let valid = Projection::one_to_one(Receptor::excitatory(), &[1, 100], external, internal);
        assert_eq!(builder.add(valid), Ok(ProjectionDescriptor(0)));
    }

    #[test]
    fn background_sources() {
        let mut builder = NetworkBuilder::new();
        let internal = builder.add(population(0..2)).unwrap();
        let background = BackgroundSourcePopulation {
            size: 1,
            coordinate: [(Hemisphere::BOTTOM, 2)].iter().copied().collect(),
            config: BackgroundSourceConfig::default(),
        };
        let descriptor = builder.add(background.clone()).unwrap();
        assert!(builder.add(background).is_err());

        // neurons live on the top hemisphere only
        let unreachable =
            Projection::one_to_one(Receptor::excitatory(), &[1], descriptor, internal);
        assert!(matches!(builder.add(unreachable), Err(Error::Validation(_))));
    }

    #[test]
    fn readout_conflicts() {
        let mut builder = NetworkBuilder::new();
        let internal = builder.add(population(0..2)).unwrap();
        let neuron = AtomicNeuronOnNetwork::new(internal, 0);
        builder
            .add(MadcRecording {
                neurons: vec![RecordedNeuron::new(neuron, ReadoutSource::Membrane)],
            })
            .unwrap();
        assert!(builder
            .add(MadcRecording {
                neurons: vec![RecordedNeuron::new(neuron, ReadoutSource::Membrane)],
            })
            .is_err());
        assert!(builder
            .add(CadcRecording {
                neurons: vec![RecordedNeuron::new(neuron, ReadoutSource::Adaptation)],
            })
            .is_err());
        let mut pads = PadRecording::default();
        pads.recordings.insert(
            Pad(0),
            PadRecordingSource {
                neuron: RecordedNeuron::new(
                    AtomicNeuronOnNetwork::new(internal, 5),
                    ReadoutSource::Membrane,
                ),
                enable_buffered: false,
            },
        );
        assert!(builder.add(pads.clone()).is_err());
        pads.recordings.get_mut(&Pad(0)).unwrap().neuron.coordinate = neuron;
        assert!(builder.add(pads).is_ok());
        builder
            .add(CadcRecording {
                neurons: vec![
                    RecordedNeuron::new(neuron, ReadoutSource::Membrane),
                    RecordedNeuron::new(
                        AtomicNeuronOnNetwork::new(internal, 1),
                        ReadoutSource::ExcitatorySynapticInput,
                    ),
                ],
            })
            .unwrap();
    }

    #[test]
    fn plasticity_rule_requirements() {
        let mut builder = NetworkBuilder::new();
        let pre = builder.add(population(0..2)).unwrap();
        let post = builder.add(population(2..4)).unwrap();
        let dense = builder
            .add(Projection::all_to_all(Receptor::excitatory(), 2, 2, 1, pre, post))
            .unwrap();
        let diagonal = builder
            .add(Projection::one_to_one(Receptor::excitatory(), &[1, 1], post, pre))
            .unwrap();

        let mut rule = PlasticityRule::new(vec![dense], "kernel", PlasticityTimer::default());
        rule.enable_requires_one_source_per_row_in_order = true;
        assert_eq!(builder.add(rule.clone()), Ok(PlasticityRuleDescriptor(0)));

        rule.projections.push(diagonal);
        assert!(builder.add(rule.clone()).is_err());
        rule.enable_requires_one_source_per_row_in_order = false;
        rule.populations.push(PlasticityPopulation {
            descriptor: post,
            neuron_readout_sources: vec![BTreeMap::new()],
        });
        assert!(builder.add(rule.clone()).is_err());
        rule.populations[0].neuron_readout_sources = (0..2)
            .map(|_| {
                [(CompartmentOnNeuron(0), vec![Some(ReadoutSource::Membrane)])]
                    .iter()
                    .cloned()
                    .collect()
            })
            .collect();
        assert_eq!(builder.add(rule), Ok(PlasticityRuleDescriptor(1)));
    }

    #[test]
    fn done_resets() {
        let observer = Arc::new(RecordingObserver::new());
        let mut builder = NetworkBuilder::with_observer(observer.clone());
        builder.add(population(0..2)).unwrap();
        let network = builder.done();
        assert_eq!(network.execution_instances.len(), 1);
        assert_eq!(
            network.execution_instances[&ExecutionInstance(0)].populations.len(),
            1
        );
        assert!(builder.done().execution_instances.is_empty());
        let events = observer.events_in("network_builder");
        assert_eq!(events.len(), 2);
        assert!(events[0].duration.is_some());
    }
}
