//! Active-channel mask and channel mapping.
//!
//! A client may declare more channels than it actually uses in a session. The
//! mask records which declared channels are live; the mapper packs the
//! client's (densely transmitted) active channels into their declared slots
//! of the chain's working buffer and unpacks the result on the way back.

use crate::buffer::AudioBuffer;
use serde::{Deserialize, Serialize};

/// Bitset over the declared input+sidechain and output channels.
///
/// Bit `i` covers input channel `i` for `i < num_inputs`, and output channel
/// `i - num_inputs` above that. Sessions without an input stage (instrument
/// chains) mark every input inactive via `with_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveChannelMask {
    bits: u64,
    num_inputs: usize,
    num_outputs: usize,
    with_input: bool,
}

impl ActiveChannelMask {
    pub fn new(bits: u64) -> Self {
        Self {
            bits,
            num_inputs: 0,
            num_outputs: 0,
            with_input: true,
        }
    }

    /// Mask with every declared channel active.
    pub fn all_active(num_inputs: usize, num_outputs: usize) -> Self {
        let mut mask = Self::new(u64::MAX);
        mask.set_num_channels(num_inputs, num_outputs);
        mask
    }

    pub fn set_with_input(&mut self, with_input: bool) {
        self.with_input = with_input;
    }

    pub fn set_num_channels(&mut self, num_inputs: usize, num_outputs: usize) {
        self.num_inputs = num_inputs;
        self.num_outputs = num_outputs;
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn input_active(&self, ch: usize) -> bool {
        self.with_input && ch < self.num_inputs && self.bit(ch)
    }

    pub fn output_active(&self, ch: usize) -> bool {
        ch < self.num_outputs && self.bit(self.num_inputs + ch)
    }

    /// Number of active channels on one side.
    pub fn num_active(&self, input: bool) -> usize {
        if input {
            (0..self.num_inputs).filter(|&ch| self.input_active(ch)).count()
        } else {
            (0..self.num_outputs).filter(|&ch| self.output_active(ch)).count()
        }
    }

    fn bit(&self, idx: usize) -> bool {
        idx < u64::BITS as usize && (self.bits >> idx) & 1 == 1
    }
}

/// Pack/unpack between the client buffer and the chain's working buffer.
///
/// The client transmits only active channels, densely, in ascending declared
/// order; the chain expects every declared channel at its declared index.
#[derive(Debug, Clone, Default)]
pub struct ChannelMapper {
    /// (client channel, working channel) pairs for the input direction.
    input_map: Vec<(usize, usize)>,
    /// (working channel, client channel) pairs for the output direction.
    output_map: Vec<(usize, usize)>,
}

impl ChannelMapper {
    pub fn new(mask: &ActiveChannelMask) -> Self {
        let mut mapper = ChannelMapper::default();
        mapper.create_mapping(mask);
        mapper
    }

    pub fn create_mapping(&mut self, mask: &ActiveChannelMask) {
        self.input_map.clear();
        self.output_map.clear();
        let mut src = 0;
        for ch in 0..mask.num_inputs() {
            if mask.input_active(ch) {
                self.input_map.push((src, ch));
                src += 1;
            }
        }
        let mut dst = 0;
        for ch in 0..mask.num_outputs() {
            if mask.output_active(ch) {
                self.output_map.push((ch, dst));
                dst += 1;
            }
        }
    }

    /// Copy active client channels into their working-buffer slots.
    pub fn map<T: Copy + Default>(&self, src: &AudioBuffer<T>, dst: &mut AudioBuffer<T>) {
        for &(s, d) in &self.input_map {
            if s < src.channels() && d < dst.channels() {
                let samples = src.samples().min(dst.samples());
                dst.channel_mut(d)[..samples].copy_from_slice(&src.channel(s)[..samples]);
            }
        }
    }

    /// Copy working-buffer output channels back into the client buffer.
    pub fn map_reverse<T: Copy + Default>(&self, src: &AudioBuffer<T>, dst: &mut AudioBuffer<T>) {
        for &(s, d) in &self.output_map {
            if s < src.channels() && d < dst.channels() {
                let samples = src.samples().min(dst.samples());
                dst.channel_mut(d)[..samples].copy_from_slice(&src.channel(s)[..samples]);
            }
        }
    }
}
