//! Integration test crate for RawClip.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It writes synthetic clips to disk and drives them through the clip
//! context, the worker pool and the decoder together.

#[cfg(test)]
mod support;

#[cfg(test)]
mod playback;

#[cfg(test)]
mod resilience;
