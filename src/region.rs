//! Restricted region configuration.
//!
//! A `Region` is an immutable value. Operators change the active region by
//! replacing it wholesale through a `SharedRegion` handle; sessions pick up
//! the new value before their next frame and never reinterpret past frames.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Axis-aligned rectangle in frame pixel space (inclusive bounds).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        Self { x1, y1, x2, y2 }.validated()
    }

    /// Reject degenerate or inverted rectangles.
    pub fn validated(self) -> Result<Self> {
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(anyhow!(
                "region must satisfy x1 < x2 and y1 < y2 (got {},{} -> {},{})",
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(self)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self {
            x1: 100,
            y1: 150,
            x2: 400,
            y2: 400,
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}

#[derive(Clone, Copy, Debug)]
struct Versioned {
    version: u64,
    region: Region,
}

/// Thread-safe handle to the active region.
///
/// Cloning the handle shares the underlying value. Writers replace the whole
/// region under the lock, so readers never observe a partially updated value.
#[derive(Clone, Debug)]
pub struct SharedRegion {
    inner: Arc<RwLock<Versioned>>,
}

impl SharedRegion {
    pub fn new(region: Region) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Versioned { version: 0, region })),
        }
    }

    /// Swap in a new region. Returns the new version number.
    pub fn replace(&self, region: Region) -> Result<u64> {
        let region = region.validated()?;
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("region lock poisoned"))?;
        guard.version += 1;
        guard.region = region;
        log::info!("region updated to {} (version {})", region, guard.version);
        Ok(guard.version)
    }

    /// Current region and its version.
    pub fn snapshot(&self) -> Result<(u64, Region)> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("region lock poisoned"))?;
        Ok((guard.version, guard.region))
    }
}

impl Default for SharedRegion {
    fn default() -> Self {
        Self::new(Region::default())
    }
}
