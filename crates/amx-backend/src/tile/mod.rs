//! Tile register configuration.
//!
//! Everything that touches tile registers goes through [`TileUnit`], so the
//! rest of the backend is independent of the instruction set.

pub mod config;
#[cfg(target_arch = "x86_64")]
pub mod hardware;
pub mod state;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

pub use config::{TileCfg, TileGeometry, GEMM_GEOMETRY, NUM_TILES};
#[cfg(target_arch = "x86_64")]
pub use hardware::HardwareTiles;
pub use state::TileConfigState;

/// Narrow interface over the tile register file of the calling thread.
pub trait TileUnit: Send + Sync + Debug {
    /// Ask the operating system for permission to use tile state.
    fn request_permission(&self) -> bool;

    /// Program the calling thread's tile registers with `geometry`.
    fn load_config(&self, geometry: &TileGeometry);

    /// Read back the calling thread's current configuration.
    fn store_config(&self) -> TileGeometry;
}

/// Software stand-in for the tile register file.
///
/// Keeps one configuration per thread, like the hardware does, and counts
/// every load so callers can observe reprogramming.
#[derive(Debug)]
pub struct EmulatedTiles {
    granted: bool,
    loads: AtomicUsize,
    registers: Mutex<HashMap<ThreadId, TileGeometry>>,
}

impl EmulatedTiles {
    pub fn new() -> Self {
        EmulatedTiles {
            granted: true,
            loads: AtomicUsize::new(0),
            registers: Mutex::new(HashMap::new()),
        }
    }

    /// A unit whose permission request is refused.
    pub fn denied() -> Self {
        EmulatedTiles {
            granted: false,
            ..Self::new()
        }
    }

    /// Number of `load_config` calls so far, across all threads.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Drop the calling thread's configuration, as `tilerelease` would.
    pub fn release(&self) {
        if let Ok(mut regs) = self.registers.lock() {
            regs.remove(&thread::current().id());
        }
    }
}

impl Default for EmulatedTiles {
    fn default() -> Self {
        Self::new()
    }
}

impl TileUnit for EmulatedTiles {
    fn request_permission(&self) -> bool {
        self.granted
    }

    fn load_config(&self, geometry: &TileGeometry) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut regs) = self.registers.lock() {
            regs.insert(thread::current().id(), *geometry);
        }
    }

    fn store_config(&self) -> TileGeometry {
        self.registers
            .lock()
            .ok()
            .and_then(|regs| regs.get(&thread::current().id()).copied())
            .unwrap_or_default()
    }
}
