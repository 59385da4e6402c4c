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

//! Coordinates and capacities of the chip fabric, as far as routing needs to
//! reason about them.
//!
//! The chip has two hemispheres. Each hemisphere has a synapse array of 256
//! rows by 256 columns, 128 synapse drivers (two rows each) and four PADI
//! buses. A bus serves every fourth synapse driver. Neurons emit events on one
//! of eight event outputs, 32 neuron columns each; event output `e` is wired
//! to bus `e % 4` of both hemispheres through the crossbar.

use std::fmt;

pub const HEMISPHERES: usize = 2;
pub const BUSES_PER_HEMISPHERE: usize = 4;
pub const BUSES: usize = HEMISPHERES * BUSES_PER_HEMISPHERE;
pub const SYNAPSE_DRIVERS_PER_BUS: usize = 32;
pub const ROWS_PER_SYNAPSE_DRIVER: usize = 2;
pub const ROWS_PER_BUS: usize = SYNAPSE_DRIVERS_PER_BUS * ROWS_PER_SYNAPSE_DRIVER;
pub const ROWS_PER_HEMISPHERE: usize = ROWS_PER_BUS * BUSES_PER_HEMISPHERE;
pub const SYNAPSE_DRIVERS: usize = SYNAPSE_DRIVERS_PER_BUS * BUSES;
pub const COLUMNS_PER_HEMISPHERE: usize = 256;
pub const ATOMIC_NEURONS: usize = COLUMNS_PER_HEMISPHERE * HEMISPHERES;
pub const NEURON_EVENT_OUTPUTS: usize = 8;
pub const COLUMNS_PER_EVENT_OUTPUT: usize = 32;
pub const SPL1_ADDRESSES: usize = 4;
pub const BACKGROUND_SOURCES: usize = HEMISPHERES * BUSES_PER_HEMISPHERE;

/// Largest weight a single synapse can hold.
pub const MAX_WEIGHT: u32 = 63;
/// Number of distinct synapse labels, i.e., sources one synapse row can tell apart.
pub const SYNAPSE_LABELS: usize = 64;
/// Number of distinct row select labels on a bus.
pub const ROW_SELECT_LABELS: usize = 32;

pub const MADC_NEURONS: usize = 2;
pub const PADS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hemisphere(pub u8);

impl Hemisphere {
    pub const TOP: Hemisphere = Hemisphere(0);
    pub const BOTTOM: Hemisphere = Hemisphere(1);

    pub fn all() -> impl Iterator<Item = Hemisphere> {
        (0..HEMISPHERES as u8).map(Hemisphere)
    }

    pub fn value(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hemisphere({})", self.0)
    }
}

/// A single neuron circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomicNeuron {
    pub hemisphere: Hemisphere,
    pub column: u16,
}

impl AtomicNeuron {
    pub fn new(hemisphere: Hemisphere, column: u16) -> Self {
        Self { hemisphere, column }
    }

    pub fn is_valid(&self) -> bool {
        self.hemisphere.value() < HEMISPHERES && (self.column as usize) < COLUMNS_PER_HEMISPHERE
    }

    /// Both hemispheres share the event output of a column.
    pub fn event_output(&self) -> NeuronEventOutput {
        NeuronEventOutput((self.column as usize / COLUMNS_PER_EVENT_OUTPUT) as u8)
    }

    /// Index into a chip-wide enumeration of atomic neurons.
    pub fn enum_value(&self) -> usize {
        self.hemisphere.value() * COLUMNS_PER_HEMISPHERE + self.column as usize
    }
}

impl fmt::Display for AtomicNeuron {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AtomicNeuron({}, {})", self.hemisphere.0, self.column)
    }
}

/// Output of the neuron backend towards the crossbar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeuronEventOutput(pub u8);

impl NeuronEventOutput {
    pub fn all() -> impl Iterator<Item = NeuronEventOutput> {
        (0..NEURON_EVENT_OUTPUTS as u8).map(NeuronEventOutput)
    }

    /// Index of the buses (in both hemispheres) this output is wired to.
    pub fn bus_index(&self) -> u8 {
        self.0 % BUSES_PER_HEMISPHERE as u8
    }

    pub fn crossbar_input(&self) -> CrossbarInput {
        CrossbarInput(self.0)
    }

    /// L2 output used to record the events of this output.
    pub fn crossbar_l2_output(&self) -> CrossbarL2Output {
        CrossbarL2Output(self.0 % SPL1_ADDRESSES as u8)
    }

    pub fn columns(&self) -> std::ops::Range<u16> {
        let first = self.0 as u16 * COLUMNS_PER_EVENT_OUTPUT as u16;
        first..first + COLUMNS_PER_EVENT_OUTPUT as u16
    }
}

/// PADI bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusOnChip {
    pub hemisphere: Hemisphere,
    pub index: u8,
}

impl BusOnChip {
    pub fn new(hemisphere: Hemisphere, index: u8) -> Self {
        Self { hemisphere, index }
    }

    pub fn all() -> impl Iterator<Item = BusOnChip> {
        Hemisphere::all().flat_map(|hemisphere| {
            (0..BUSES_PER_HEMISPHERE as u8).map(move |index| BusOnChip::new(hemisphere, index))
        })
    }

    pub fn enum_value(&self) -> usize {
        self.hemisphere.value() * BUSES_PER_HEMISPHERE + self.index as usize
    }

    pub fn crossbar_output(&self) -> CrossbarOutput {
        CrossbarOutput(self.enum_value() as u8)
    }

    pub fn background_source(&self) -> BackgroundSourceOnChip {
        BackgroundSourceOnChip(self.enum_value() as u8)
    }

    pub fn synapse_drivers(&self) -> impl Iterator<Item = SynapseDriverOnChip> {
        let bus = *self;
        (0..SYNAPSE_DRIVERS_PER_BUS as u8)
            .map(move |driver| SynapseDriverOnChip::new(bus, SynapseDriverOnBus(driver)))
    }
}

impl fmt::Display for BusOnChip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bus({}, {})", self.hemisphere.0, self.index)
    }
}

/// Synapse driver relative to its bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynapseDriverOnBus(pub u8);

impl SynapseDriverOnBus {
    pub fn all() -> impl Iterator<Item = SynapseDriverOnBus> {
        (0..SYNAPSE_DRIVERS_PER_BUS as u8).map(SynapseDriverOnBus)
    }

    pub fn value(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynapseDriverOnChip {
    pub bus: BusOnChip,
    pub driver: SynapseDriverOnBus,
}

impl SynapseDriverOnChip {
    pub fn new(bus: BusOnChip, driver: SynapseDriverOnBus) -> Self {
        Self { bus, driver }
    }

    /// The two synapse rows driven by this driver.
    pub fn rows(&self) -> [SynapseRowOnChip; ROWS_PER_SYNAPSE_DRIVER] {
        let on_hemisphere =
            self.driver.value() * BUSES_PER_HEMISPHERE + self.bus.index as usize;
        let first = (on_hemisphere * ROWS_PER_SYNAPSE_DRIVER) as u16;
        [
            SynapseRowOnChip::new(self.bus.hemisphere, first),
            SynapseRowOnChip::new(self.bus.hemisphere, first + 1),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynapseRowOnChip {
    pub hemisphere: Hemisphere,
    pub row: u16,
}

impl SynapseRowOnChip {
    pub fn new(hemisphere: Hemisphere, row: u16) -> Self {
        Self { hemisphere, row }
    }

    pub fn synapse_driver(&self) -> SynapseDriverOnChip {
        let on_hemisphere = self.row as usize / ROWS_PER_SYNAPSE_DRIVER;
        SynapseDriverOnChip::new(
            BusOnChip::new(
                self.hemisphere,
                (on_hemisphere % BUSES_PER_HEMISPHERE) as u8,
            ),
            SynapseDriverOnBus((on_hemisphere / BUSES_PER_HEMISPHERE) as u8),
        )
    }
}

/// 5-bit label compared by synapse drivers against their own index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowSelect(pub u8);

/// 5-bit row select compare mask of a synapse driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mask(pub u8);

/// Whether a driver configured with `mask` forwards events carrying `label`.
pub fn forwards(label: RowSelect, mask: Mask, driver: SynapseDriverOnBus) -> bool {
    (label.0 & mask.0) == (driver.0 & mask.0)
}

/// 6-bit label matched by each synapse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynapseLabel(pub u8);

/// Address emitted by a neuron: row select in bits 6..11, synapse label in bits 0..6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeuronLabel(pub u16);

impl NeuronLabel {
    pub fn new(row_select: RowSelect, synapse_label: SynapseLabel) -> Self {
        Self(((row_select.0 as u16 & 0x1f) << 6) | (synapse_label.0 as u16 & 0x3f))
    }

    pub fn row_select(&self) -> RowSelect {
        RowSelect(((self.0 >> 6) & 0x1f) as u8)
    }

    pub fn synapse_label(&self) -> SynapseLabel {
        SynapseLabel((self.0 & 0x3f) as u8)
    }
}

/// Full event label on the crossbar.
///
/// Bits 0..11 hold the neuron label, bits 11..13 the SPL1 address and bit 13
/// the hemisphere for external and background events or the upper half of
/// the event outputs for neuron events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpikeLabel(pub u16);

pub const SPIKE_LABEL_HEMISPHERE_BIT: u16 = 1 << 13;
const SPL1_SHIFT: u16 = 11;

impl SpikeLabel {
    pub fn internal(event_output: NeuronEventOutput, label: NeuronLabel) -> Self {
        Self(((event_output.0 as u16) << SPL1_SHIFT) | label.0)
    }

    pub fn external(hemisphere: Hemisphere, spl1: Spl1Address, label: NeuronLabel) -> Self {
        Self(
            ((hemisphere.0 as u16) << 13) | ((spl1.0 as u16 & 0x3) << SPL1_SHIFT) | label.0,
        )
    }

    /// Label of a background source, which feeds a single bus directly.
    pub fn background(label: NeuronLabel) -> Self {
        Self(label.0)
    }

    pub fn neuron_label(&self) -> NeuronLabel {
        NeuronLabel(self.0 & 0x7ff)
    }

    pub fn spl1_address(&self) -> Spl1Address {
        Spl1Address(((self.0 >> SPL1_SHIFT) & 0x3) as u8)
    }

    pub fn row_select(&self) -> RowSelect {
        self.neuron_label().row_select()
    }

    pub fn synapse_label(&self) -> SynapseLabel {
        self.neuron_label().synapse_label()
    }
}

impl fmt::Display for SpikeLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SpikeLabel({:#06x})", self.0)
    }
}

/// Address of an L2 input or output channel of the crossbar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Spl1Address(pub u8);

impl Spl1Address {
    pub fn crossbar_input(&self) -> CrossbarInput {
        CrossbarInput(NEURON_EVENT_OUTPUTS as u8 + self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossbarL2Output(pub u8);

impl CrossbarL2Output {
    pub fn crossbar_output(&self) -> CrossbarOutput {
        CrossbarOutput(BUSES as u8 + self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackgroundSourceOnChip(pub u8);

impl BackgroundSourceOnChip {
    pub fn bus(&self) -> BusOnChip {
        BusOnChip::new(
            Hemisphere(self.0 / BUSES_PER_HEMISPHERE as u8),
            self.0 % BUSES_PER_HEMISPHERE as u8,
        )
    }

    pub fn crossbar_input(&self) -> CrossbarInput {
        CrossbarInput((NEURON_EVENT_OUTPUTS + SPL1_ADDRESSES) as u8 + self.0)
    }
}

/// Crossbar inputs: neuron event outputs, then L2 inputs, then background sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossbarInput(pub u8);

/// Origin of the events entering the crossbar at an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossbarInputKind {
    NeuronEventOutput(NeuronEventOutput),
    L2(Spl1Address),
    Background(BackgroundSourceOnChip),
}

impl CrossbarInput {
    pub fn kind(&self) -> CrossbarInputKind {
        let value = self.0 as usize;
        if value < NEURON_EVENT_OUTPUTS {
            CrossbarInputKind::NeuronEventOutput(NeuronEventOutput(self.0))
        } else if value < NEURON_EVENT_OUTPUTS + SPL1_ADDRESSES {
            CrossbarInputKind::L2(Spl1Address((value - NEURON_EVENT_OUTPUTS) as u8))
        } else {
            CrossbarInputKind::Background(BackgroundSourceOnChip(
                (value - NEURON_EVENT_OUTPUTS - SPL1_ADDRESSES) as u8,
            ))
        }
    }
}

/// Crossbar outputs: buses, then L2 outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossbarOutput(pub u8);

impl CrossbarOutput {
    pub fn bus(&self) -> Option<BusOnChip> {
        if (self.0 as usize) < BUSES {
            Some(BusOnChip::new(
                Hemisphere(self.0 / BUSES_PER_HEMISPHERE as u8),
                self.0 % BUSES_PER_HEMISPHERE as u8,
            ))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossbarNodeOnChip {
    pub output: CrossbarOutput,
    pub input: CrossbarInput,
}

impl CrossbarNodeOnChip {
    pub fn new(output: CrossbarOutput, input: CrossbarInput) -> Self {
        Self { output, input }
    }
}

/// A crossbar node passes an event if `label & mask == target`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CrossbarNodeConfig {
    pub mask: u16,
    pub target: u16,
}

impl CrossbarNodeConfig {
    pub fn forward_all() -> Self {
        Self { mask: 0, target: 0 }
    }

    pub fn forward_hemisphere(hemisphere: Hemisphere) -> Self {
        Self {
            mask: SPIKE_LABEL_HEMISPHERE_BIT,
            target: (hemisphere.0 as u16) << 13,
        }
    }

    pub fn forwards(&self, label: SpikeLabel) -> bool {
        (label.0 & self.mask) == self.target
    }
}

/// Polarity of a synaptic input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReceptorType {
    Excitatory,
    Inhibitory,
}

impl ReceptorType {
    pub fn all() -> impl Iterator<Item = ReceptorType> {
        vec![ReceptorType::Excitatory, ReceptorType::Inhibitory].into_iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowMode {
    Disabled,
    Excitatory,
    Inhibitory,
}

impl From<ReceptorType> for RowMode {
    fn from(receptor_type: ReceptorType) -> Self {
        match receptor_type {
            ReceptorType::Excitatory => RowMode::Excitatory,
            ReceptorType::Inhibitory => RowMode::Inhibitory,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pad(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_rows_round_trip() {
        for bus in BusOnChip::all() {
            for driver in bus.synapse_drivers() {
                for row in driver.rows().iter() {
                    assert!((row.row as usize) < ROWS_PER_HEMISPHERE);
                    assert_eq!(row.synapse_driver(), driver);
                }
            }
        }
        let bus = BusOnChip::new(Hemisphere::TOP, 1);
        let driver = SynapseDriverOnChip::new(bus, SynapseDriverOnBus(2));
        assert_eq!(driver.rows()[0].row, 18);
        assert_eq!(driver.rows()[1].row, 19);
    }

    #[test]
    fn labels() {
        let label = NeuronLabel::new(RowSelect(17), SynapseLabel(42));
        assert_eq!(label.row_select(), RowSelect(17));
        assert_eq!(label.synapse_label(), SynapseLabel(42));

        let external = SpikeLabel::external(Hemisphere::BOTTOM, Spl1Address(3), label);
        assert_eq!(external.neuron_label(), label);
        assert_eq!(external.spl1_address(), Spl1Address(3));
        assert!(CrossbarNodeConfig::forward_hemisphere(Hemisphere::BOTTOM).forwards(external));
        assert!(!CrossbarNodeConfig::forward_hemisphere(Hemisphere::TOP).forwards(external));

        let internal = SpikeLabel::internal(NeuronEventOutput(6), label);
        assert_eq!(internal.spl1_address(), Spl1Address(2));
        assert_eq!(internal.neuron_label(), label);
    }

    #[test]
    fn crossbar_inputs() {
        for e in NeuronEventOutput::all() {
            assert_eq!(
                e.crossbar_input().kind(),
                CrossbarInputKind::NeuronEventOutput(e)
            );
        }
        assert_eq!(
            Spl1Address(1).crossbar_input().kind(),
            CrossbarInputKind::L2(Spl1Address(1))
        );
        let bus = BusOnChip::new(Hemisphere::BOTTOM, 2);
        assert_eq!(bus.background_source().bus(), bus);
        assert_eq!(
            bus.background_source().crossbar_input().kind(),
            CrossbarInputKind::Background(bus.background_source())
        );
        assert_eq!(bus.crossbar_output().bus(), Some(bus));
        assert_eq!(CrossbarL2Output(0).crossbar_output().bus(), None);
    }

    #[test]
    fn driver_forwarding() {
        assert!(forwards(RowSelect(5), Mask(0), SynapseDriverOnBus(30)));
        assert!(forwards(RowSelect(5), Mask(0b11), SynapseDriverOnBus(1)));
        assert!(!forwards(RowSelect(5), Mask(0b11), SynapseDriverOnBus(2)));
        assert!(forwards(RowSelect(5), Mask(0b11111), SynapseDriverOnBus(5)));
    }
}
