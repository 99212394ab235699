//! Owned multi-channel audio buffers.
//!
//! The working buffers the chain processes in place, and the payload type
//! carried by wire frames. Resizing preserves existing content and zero-fills
//! new space so a persistent working buffer can grow across blocks without
//! reallocating on every block.

use serde::{Deserialize, Serialize};

/// A channels × samples block of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer<T> {
    data: Vec<Vec<T>>,
    num_samples: usize,
}

impl<T: Copy + Default> AudioBuffer<T> {
    /// Create a zero-filled buffer.
    pub fn new(channels: usize, samples: usize) -> Self {
        Self {
            data: (0..channels).map(|_| vec![T::default(); samples]).collect(),
            num_samples: samples,
        }
    }

    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            num_samples: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.data.len()
    }

    pub fn samples(&self) -> usize {
        self.num_samples
    }

    pub fn channel(&self, ch: usize) -> &[T] {
        &self.data[ch]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [T] {
        &mut self.data[ch]
    }

    /// Resize to `channels` × `samples`, keeping existing content and
    /// zero-filling anything new. Only reallocates when dimensions change.
    pub fn resize(&mut self, channels: usize, samples: usize) {
        if self.data.len() == channels && self.num_samples == samples {
            return;
        }
        self.data.resize_with(channels, Vec::new);
        for ch in &mut self.data {
            ch.resize(samples, T::default());
        }
        self.num_samples = samples;
    }

    /// Zero every sample.
    pub fn clear(&mut self) {
        for ch in &mut self.data {
            ch.fill(T::default());
        }
    }

    /// Zero a single channel.
    pub fn clear_channel(&mut self, ch: usize) {
        if let Some(ch) = self.data.get_mut(ch) {
            ch.fill(T::default());
        }
    }
}

impl AudioBuffer<f32> {
    /// Overwrite with a narrowed copy of a double-precision buffer.
    pub fn copy_from_f64(&mut self, src: &AudioBuffer<f64>) {
        self.resize(src.channels(), src.samples());
        for (dst, src) in self.data.iter_mut().zip(&src.data) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = *s as f32;
            }
        }
    }
}

impl AudioBuffer<f64> {
    /// Overwrite with a widened copy of a single-precision buffer.
    pub fn copy_from_f32(&mut self, src: &AudioBuffer<f32>) {
        self.resize(src.channels(), src.samples());
        for (dst, src) in self.data.iter_mut().zip(&src.data) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = f64::from(*s);
            }
        }
    }
}
