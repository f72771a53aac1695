//! Sensor sampling seam: synchronous sources, scoped acquisition, cancellation
//!
//! Cameras and microphones live outside the core. The core pulls one sample
//! per tick and holds a device only for the duration of a sampling burst.

use crate::error::AuthError;
use crate::vision::{BoundingBox, GrayRegion};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One pull from a source. `NoData` must be returned instead of blocking.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample<T> {
    Data(T),
    NoData,
}

/// Synchronous pull-based sensor
pub trait SamplingSource<T> {
    /// Open the underlying device
    fn acquire(&mut self) -> Result<()>;

    /// Pull one sample; never blocks indefinitely
    fn next_sample(&mut self) -> Sample<T>;

    /// Close the underlying device. Must be safe to call after a failed acquire.
    fn release(&mut self);

    /// Show a prompt to the subject (e.g. a challenge phrase)
    fn prompt(&mut self, _message: &str) {}
}

/// Holds a source open for one burst and releases it on every exit path
pub struct SamplingGuard<'a, T, S: SamplingSource<T> + ?Sized> {
    source: &'a mut S,
    label: &'static str,
    _sample: PhantomData<T>,
}

impl<'a, T, S: SamplingSource<T> + ?Sized> SamplingGuard<'a, T, S> {
    pub fn acquire(source: &'a mut S, label: &'static str) -> Result<Self, AuthError> {
        if let Err(e) = source.acquire() {
            source.release();
            log::error!("Failed to acquire {}: {:#}", label, e);
            return Err(AuthError::ResourceUnavailable(format!("{}: {:#}", label, e)));
        }
        log::debug!("{} acquired", label);
        Ok(Self {
            source,
            label,
            _sample: PhantomData,
        })
    }

    pub fn next_sample(&mut self) -> Sample<T> {
        self.source.next_sample()
    }

    pub fn prompt(&mut self, message: &str) {
        self.source.prompt(message);
    }
}

impl<T, S: SamplingSource<T> + ?Sized> Drop for SamplingGuard<'_, T, S> {
    fn drop(&mut self) {
        self.source.release();
        log::debug!("{} released", self.label);
    }
}

/// Cooperative cancellation flag shared between caller and session
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time source for vote gaps and deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Replays pre-recorded samples, then reports `NoData`.
///
/// Tracks acquire/release calls so callers can confirm devices were let go.
pub struct ReplaySource<T> {
    samples: VecDeque<Sample<T>>,
    fail_acquire: bool,
    held: Arc<AtomicBool>,
    acquisitions: Arc<AtomicUsize>,
    prompts: Vec<String>,
}

impl<T> ReplaySource<T> {
    pub fn new(samples: impl IntoIterator<Item = Sample<T>>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            fail_acquire: false,
            held: Arc::new(AtomicBool::new(false)),
            acquisitions: Arc::new(AtomicUsize::new(0)),
            prompts: Vec::new(),
        }
    }

    pub fn from_data(items: impl IntoIterator<Item = T>) -> Self {
        Self::new(items.into_iter().map(Sample::Data))
    }

    /// Source whose device can never be opened
    pub fn unavailable() -> Self {
        let mut source = Self::new(Vec::new());
        source.fail_acquire = true;
        source
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl<T> SamplingSource<T> for ReplaySource<T> {
    fn acquire(&mut self) -> Result<()> {
        if self.fail_acquire {
            anyhow::bail!("device not present");
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_sample(&mut self) -> Sample<T> {
        self.samples.pop_front().unwrap_or(Sample::NoData)
    }

    fn release(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }

    fn prompt(&mut self, message: &str) {
        self.prompts.push(message.to_string());
    }
}

/// Turns a full-frame source into a region source by cropping a square
/// around a tracked face box
pub struct CroppingSource<S> {
    inner: S,
    bbox: BoundingBox,
    size: usize,
}

impl<S: SamplingSource<GrayRegion>> CroppingSource<S> {
    pub fn new(inner: S, bbox: BoundingBox, size: usize) -> Self {
        Self { inner, bbox, size }
    }

    /// Update the tracked location between bursts
    pub fn track(&mut self, bbox: BoundingBox) {
        self.bbox = bbox;
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: SamplingSource<GrayRegion>> SamplingSource<GrayRegion> for CroppingSource<S> {
    fn acquire(&mut self) -> Result<()> {
        self.inner.acquire()
    }

    fn next_sample(&mut self) -> Sample<GrayRegion> {
        match self.inner.next_sample() {
            Sample::Data(frame) => match frame.crop_centered(&self.bbox, self.size) {
                Some(region) => Sample::Data(region),
                // Zero-size crop is reported as an empty region so liveness aborts
                None => Sample::Data(GrayRegion::empty()),
            },
            Sample::NoData => Sample::NoData,
        }
    }

    fn release(&mut self) {
        self.inner.release();
    }

    fn prompt(&mut self, message: &str) {
        self.inner.prompt(message);
    }
}
