//! Bus channel configurations.
//!
//! A [`BusesLayout`] is the ordered set of input and output buses a session
//! or a plugin exposes. Bus 0 is the main bus; input bus 1, when present, is
//! the sidechain.

use serde::{Deserialize, Serialize};

/// A single bus's channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSet {
    Mono,
    Stereo,
    Discrete(u16),
}

impl ChannelSet {
    /// Pick the conventional set for a channel count.
    pub fn of(channels: u16) -> Self {
        match channels {
            1 => ChannelSet::Mono,
            2 => ChannelSet::Stereo,
            n => ChannelSet::Discrete(n),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ChannelSet::Mono => 1,
            ChannelSet::Stereo => 2,
            ChannelSet::Discrete(n) => *n as usize,
        }
    }
}

/// Ordered input and output buses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusesLayout {
    pub input_buses: Vec<ChannelSet>,
    pub output_buses: Vec<ChannelSet>,
}

impl BusesLayout {
    /// Build the session layout from declared channel counts: a main input
    /// bus, an optional sidechain input bus, and a main output bus. Zero
    /// counts produce no bus.
    pub fn session(channels_in: u16, channels_out: u16, channels_sc: u16) -> Self {
        let mut layout = BusesLayout::default();
        if channels_in > 0 {
            layout.input_buses.push(ChannelSet::of(channels_in));
        }
        if channels_sc > 0 {
            layout.input_buses.push(ChannelSet::of(channels_sc));
        }
        if channels_out > 0 {
            layout.output_buses.push(ChannelSet::of(channels_out));
        }
        layout
    }

    pub fn main_input_channels(&self) -> usize {
        self.input_buses.first().map_or(0, ChannelSet::size)
    }

    pub fn main_output_channels(&self) -> usize {
        self.output_buses.first().map_or(0, ChannelSet::size)
    }

    /// The sidechain bus, if the layout carries one.
    pub fn sidechain(&self) -> Option<ChannelSet> {
        self.input_buses.get(1).copied()
    }

    pub fn total_input_channels(&self) -> usize {
        self.input_buses.iter().map(ChannelSet::size).sum()
    }

    pub fn total_output_channels(&self) -> usize {
        self.output_buses.iter().map(ChannelSet::size).sum()
    }
}
