//! Port allocation pool of one local interface
//!
//! Ports are tracked in a bitmap guarded by a mutex. A granted port is held
//! by a [`PortGuard`] and returns to the pool when the guard is dropped, so a
//! socket that is torn down (or never finishes construction) cannot leak it.
//!
//! Range allocation walks start candidates in randomized order.

use crate::error::{CoreError, Result};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;

/// Pool of ports in `min..=max`.
pub struct PortPool {
    label: String,
    min: u16,
    max: u16,
    used: Mutex<Vec<u64>>,
}

impl fmt::Debug for PortPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortPool")
            .field("label", &self.label)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

impl PortPool {
    /// Create a pool over `min..=max`.
    ///
    /// `label` names the owning interface in errors.
    pub fn new(label: impl Into<String>, min: u16, max: u16) -> Arc<Self> {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let slots = (max - min) as usize + 1;
        Arc::new(PortPool {
            label: label.into(),
            min,
            max,
            used: Mutex::new(vec![0; (slots + 63) / 64]),
        })
    }

    /// Lowest port of the pool.
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Highest port of the pool.
    pub fn max(&self) -> u16 {
        self.max
    }

    fn slot(&self, port: u16) -> Option<(usize, u64)> {
        if port < self.min || port > self.max {
            return None;
        }
        let off = (port - self.min) as usize;
        Some((off / 64, 1u64 << (off % 64)))
    }

    /// Grant exactly `port`.
    ///
    /// Fails if the port is outside the pool or already in use.
    pub fn acquire(self: &Arc<Self>, port: u16) -> Result<PortGuard> {
        let (word, bit) = self.slot(port).ok_or_else(|| self.unavailable(port))?;
        let mut used = self.used.lock();
        if used[word] & bit != 0 {
            return Err(self.unavailable(port));
        }
        used[word] |= bit;
        Ok(PortGuard {
            pool: Arc::clone(self),
            port,
        })
    }

    /// Grant `count` consecutive ports.
    ///
    /// Start candidates are tried in random order so that concurrent callers
    /// spread over the range.
    pub fn acquire_range(self: &Arc<Self>, count: u16) -> Result<Vec<PortGuard>> {
        let span = (self.max - self.min) as u32 + 1;
        if count == 0 || count as u32 > span {
            return Err(self.exhausted(count));
        }
        let mut starts: Vec<u16> = (self.min..=self.max - (count - 1)).collect();
        starts.shuffle(&mut rand::thread_rng());

        let mut used = self.used.lock();
        for start in starts {
            let block = start as u32..start as u32 + count as u32;
            let free = block.clone().all(|p| match self.slot(p as u16) {
                Some((w, b)) => used[w] & b == 0,
                None => false,
            });
            if !free {
                continue;
            }
            let mut guards = Vec::with_capacity(count as usize);
            for port in block.map(|p| p as u16) {
                if let Some((w, b)) = self.slot(port) {
                    used[w] |= b;
                }
                guards.push(PortGuard {
                    pool: Arc::clone(self),
                    port,
                });
            }
            return Ok(guards);
        }
        Err(self.exhausted(count))
    }

    /// Whether `port` is currently granted.
    pub fn in_use(&self, port: u16) -> bool {
        match self.slot(port) {
            Some((w, b)) => self.used.lock()[w] & b != 0,
            None => false,
        }
    }

    /// Free ports, in randomized order.
    pub fn free_ports(&self) -> Vec<u16> {
        let used = self.used.lock();
        let mut free: Vec<u16> = (self.min..=self.max)
            .filter(|p| match self.slot(*p) {
                Some((w, b)) => used[w] & b == 0,
                None => false,
            })
            .collect();
        drop(used);
        free.shuffle(&mut rand::thread_rng());
        free
    }

    /// Number of free ports.
    pub fn available(&self) -> usize {
        let slots = (self.max - self.min) as usize + 1;
        let taken: u32 = self.used.lock().iter().map(|w| w.count_ones()).sum();
        slots - taken as usize
    }

    fn release(&self, port: u16) {
        if let Some((w, b)) = self.slot(port) {
            self.used.lock()[w] &= !b;
        }
    }

    fn unavailable(&self, port: u16) -> CoreError {
        CoreError::PortUnavailable {
            port,
            interface: self.label.clone(),
        }
    }

    fn exhausted(&self, count: u16) -> CoreError {
        CoreError::PortRangeExhausted {
            count,
            interface: self.label.clone(),
        }
    }
}

/// A granted port. Released back to its pool on drop.
pub struct PortGuard {
    pool: Arc<PortPool>,
    port: u16,
}

impl PortGuard {
    /// The granted port number.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for PortGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortGuard({}:{})", self.pool.label, self.port)
    }
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}
