use std::cell::RefCell;
use std::marker::PhantomData;

use super::config::TileGeometry;
use super::TileUnit;

/// Per-thread cache of the tile geometry last loaded on this thread.
///
/// Reprogramming tile registers is slow, and the hot path runs the same
/// kernel geometry over and over, so a load is only issued when the
/// requested geometry differs from what this thread last loaded or the
/// hardware no longer holds it.
///
/// The type is neither `Send` nor `Sync`: tile registers belong to a
/// thread, and so does this cache.
#[derive(Debug, Default)]
pub struct TileConfigState {
    current: Option<TileGeometry>,
    _thread_bound: PhantomData<*const ()>,
}

thread_local! {
    static THREAD_STATE: RefCell<TileConfigState> = const { RefCell::new(TileConfigState::new()) };
}

impl TileConfigState {
    pub const fn new() -> Self {
        TileConfigState {
            current: None,
            _thread_bound: PhantomData,
        }
    }

    /// Geometry loaded by the last `ensure_configured`, if any.
    pub fn current(&self) -> Option<&TileGeometry> {
        self.current.as_ref()
    }

    /// Make sure `unit` holds `required` on the calling thread.
    ///
    /// Returns true when the registers were (re)programmed.
    pub fn ensure_configured(&mut self, unit: &dyn TileUnit, required: &TileGeometry) -> bool {
        if self.current.as_ref() == Some(required) && unit.store_config() == *required {
            return false;
        }
        unit.load_config(required);
        self.current = Some(*required);
        log::trace!("tile registers programmed: {:?}", required);
        true
    }

    /// Run `f` with the calling thread's own state.
    pub fn with_thread<R>(f: impl FnOnce(&mut TileConfigState) -> R) -> R {
        THREAD_STATE.with(|state| f(&mut state.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::config::GEMM_GEOMETRY;
    use crate::tile::EmulatedTiles;

    #[test]
    fn test_second_call_is_noop() {
        let unit = EmulatedTiles::new();
        let mut state = TileConfigState::new();
        assert!(state.current().is_none());
        assert!(state.ensure_configured(&unit, &GEMM_GEOMETRY));
        assert!(!state.ensure_configured(&unit, &GEMM_GEOMETRY));
        assert_eq!(unit.loads(), 1);
        assert_eq!(state.current(), Some(&GEMM_GEOMETRY));
    }

    #[test]
    fn test_changed_geometry_reprograms() {
        let unit = EmulatedTiles::new();
        let mut state = TileConfigState::new();
        let mut other = GEMM_GEOMETRY;
        other.rows[0] = 16;
        state.ensure_configured(&unit, &GEMM_GEOMETRY);
        assert!(state.ensure_configured(&unit, &other));
        assert!(state.ensure_configured(&unit, &GEMM_GEOMETRY));
        assert_eq!(unit.loads(), 3);
    }

    #[test]
    fn test_column_change_alone_reprograms() {
        let unit = EmulatedTiles::new();
        let mut state = TileConfigState::new();
        let mut other = GEMM_GEOMETRY;
        other.colsb[7] = 32;
        state.ensure_configured(&unit, &GEMM_GEOMETRY);
        assert!(state.ensure_configured(&unit, &other));
        assert_eq!(unit.loads(), 2);
    }

    #[test]
    fn test_external_release_reprograms() {
        let unit = EmulatedTiles::new();
        let mut state = TileConfigState::new();
        state.ensure_configured(&unit, &GEMM_GEOMETRY);
        unit.release();
        assert!(state.ensure_configured(&unit, &GEMM_GEOMETRY));
        assert_eq!(unit.loads(), 2);
    }

    #[test]
    fn test_fresh_state_programs_even_if_hardware_matches() {
        let unit = EmulatedTiles::new();
        TileConfigState::new().ensure_configured(&unit, &GEMM_GEOMETRY);
        assert!(TileConfigState::new().ensure_configured(&unit, &GEMM_GEOMETRY));
        assert_eq!(unit.loads(), 2);
    }

    #[test]
    fn test_thread_states_are_independent() {
        let unit = EmulatedTiles::new();
        TileConfigState::with_thread(|s| s.ensure_configured(&unit, &GEMM_GEOMETRY));
        let programmed_elsewhere = std::thread::scope(|scope| {
            scope
                .spawn(|| TileConfigState::with_thread(|s| s.ensure_configured(&unit, &GEMM_GEOMETRY)))
                .join()
                .unwrap()
        });
        assert!(programmed_elsewhere);
        assert!(!TileConfigState::with_thread(|s| s.ensure_configured(&unit, &GEMM_GEOMETRY)));
        assert_eq!(unit.loads(), 2);
    }
}
