// src/core/host/availability.rs

//! Per-host exponential-backoff availability evaluation.

use crate::core::errors::WrapperError;
use crate::core::host::HostAvailability;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_SECS: u64 = 30;

/// Tracks consecutive NOT_AVAILABLE reports for one host and re-opens the host
/// for a retry once `2^count * initial_backoff` has elapsed. After
/// `max_retries` consecutive failures the host stays NOT_AVAILABLE regardless
/// of elapsed time.
#[derive(Debug)]
pub struct ExponentialBackoffAvailabilityStrategy {
    max_retries: u32,
    initial_backoff: Duration,
    not_available_count: AtomicU32,
    last_changed: Mutex<Instant>,
}

impl ExponentialBackoffAvailabilityStrategy {
    pub fn new(max_retries: u32, initial_backoff_secs: u64) -> Result<Self, WrapperError> {
        if max_retries < 1 {
            return Err(WrapperError::IllegalArgument(
                "hostAvailabilityStrategyMaxRetries must be at least 1".into(),
            ));
        }
        if initial_backoff_secs < 1 {
            return Err(WrapperError::IllegalArgument(
                "hostAvailabilityStrategyInitialBackoffTimeSec must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_retries,
            initial_backoff: Duration::from_secs(initial_backoff_secs),
            not_available_count: AtomicU32::new(0),
            last_changed: Mutex::new(Instant::now()),
        })
    }

    /// Records an observation. AVAILABLE resets the failure count;
    /// NOT_AVAILABLE increments it and stamps the transition time.
    pub fn set_host_availability(&self, availability: HostAvailability) {
        match availability {
            HostAvailability::Available => {
                self.not_available_count.store(0, Ordering::SeqCst);
            }
            HostAvailability::NotAvailable => {
                self.not_available_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        *self.last_changed.lock() = Instant::now();
    }

    /// Filters a raw availability report through the backoff window.
    pub fn host_availability(&self, raw: HostAvailability) -> HostAvailability {
        if raw == HostAvailability::Available {
            return HostAvailability::Available;
        }

        let count = self.not_available_count.load(Ordering::SeqCst);
        if count >= self.max_retries {
            return HostAvailability::NotAvailable;
        }

        let elapsed = self.last_changed.lock().elapsed();
        if elapsed >= self.retry_delay(count) {
            // The backoff window has passed, permit a retry.
            return HostAvailability::Available;
        }

        raw
    }

    /// The wait before the host becomes retryable after `count` consecutive
    /// failures.
    pub fn retry_delay(&self, count: u32) -> Duration {
        // Saturate the shift so a pathological count cannot overflow.
        let factor = 1u64.checked_shl(count).unwrap_or(u64::MAX);
        self.initial_backoff
            .checked_mul(factor.min(u32::MAX as u64) as u32)
            .unwrap_or(Duration::MAX)
    }

    pub fn not_available_count(&self) -> u32 {
        self.not_available_count.load(Ordering::SeqCst)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
