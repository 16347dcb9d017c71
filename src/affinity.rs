use std::sync::{Mutex, PoisonError};

use log::error;

use crate::cpuset::CpuSet;
use crate::error::{CorescanError, Result};
use crate::probe::{cpu_info, platform};

/// Which tier of cores the next affinity change should target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowersaveMode {
    /// Every logical core
    #[default]
    All,
    /// Efficiency cores only
    Little,
    /// Performance cores only
    Big,
}

impl PowersaveMode {
    /// Decode the wire value used by callers: 0 = all, 1 = little, 2 = big
    pub fn from_mode(mode: i32) -> Option<Self> {
        match mode {
            0 => Some(PowersaveMode::All),
            1 => Some(PowersaveMode::Little),
            2 => Some(PowersaveMode::Big),
            _ => None,
        }
    }

    pub fn as_mode(self) -> i32 {
        match self {
            PowersaveMode::All => 0,
            PowersaveMode::Little => 1,
            PowersaveMode::Big => 2,
        }
    }
}

// The last successfully applied mode. Applying and recording happen under
// one lock so concurrent set_powersave calls serialize.
static POWERSAVE: Mutex<PowersaveMode> = Mutex::new(PowersaveMode::All);

/// The last powersave mode that was successfully applied
pub fn powersave() -> PowersaveMode {
    *POWERSAVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The cached core mask for a powersave mode.
///
/// An out-of-range mode logs an error and returns the all-cores mask rather
/// than failing: callers pass these masks straight to affinity syscalls and
/// an empty mask would un-schedule them entirely.
pub fn thread_affinity_mask(mode: i32) -> CpuSet {
    let topo = &cpu_info().topology;
    match PowersaveMode::from_mode(mode) {
        Some(PowersaveMode::All) => topo.all,
        Some(PowersaveMode::Little) => topo.little,
        Some(PowersaveMode::Big) => topo.big,
        None => {
            error!("invalid powersave mode {mode}, using the all-cores mask");
            topo.all
        }
    }
}

/// Pin the calling thread to `set`.
///
/// With the `thread-pool` feature the mask is also replicated onto every
/// rayon worker; the call succeeds only if every worker's syscall succeeds.
pub fn set_thread_affinity(set: &CpuSet) -> Result<()> {
    platform().set_thread_affinity(set)?;
    #[cfg(feature = "thread-pool")]
    set_pool_thread_affinity(set)?;
    Ok(())
}

/// Current affinity mask of the calling thread, where the OS can report it
pub fn thread_affinity() -> Option<CpuSet> {
    platform().thread_affinity()
}

/// Replicate an affinity mask onto every worker of the global rayon pool
#[cfg(feature = "thread-pool")]
pub fn set_pool_thread_affinity(set: &CpuSet) -> Result<()> {
    let results = rayon::broadcast(|ctx| apply_worker_affinity(set, ctx.index()));
    results.into_iter().collect()
}

#[cfg(all(feature = "thread-pool", any(target_os = "macos", target_os = "ios")))]
fn apply_worker_affinity(set: &CpuSet, worker: usize) -> Result<()> {
    // One affinity tag shared by several threads does not map them to
    // distinct cores; hand each worker its own core round-robin instead.
    let cores: Vec<usize> = set.iter().collect();
    if cores.is_empty() {
        return Err(CorescanError::affinity("empty affinity mask"));
    }
    let single: CpuSet = [cores[worker % cores.len()]].into_iter().collect();
    platform().set_thread_affinity(&single)
}

#[cfg(all(feature = "thread-pool", not(any(target_os = "macos", target_os = "ios"))))]
fn apply_worker_affinity(set: &CpuSet, _worker: usize) -> Result<()> {
    platform().set_thread_affinity(set)
}

/// Apply a powersave preset: resolve the tier mask, pin to it, and record
/// the mode. A failed apply leaves the recorded mode untouched so callers
/// can detect that the change did not take effect.
pub fn set_powersave(mode: PowersaveMode) -> Result<()> {
    let mut current = POWERSAVE.lock().unwrap_or_else(PoisonError::into_inner);
    let mask = thread_affinity_mask(mode.as_mode());
    set_thread_affinity(&mask)?;
    *current = mode;
    Ok(())
}

/// Integer-mode variant of [`set_powersave`]; rejects values outside {0, 1, 2}
pub fn set_powersave_mode(mode: i32) -> Result<()> {
    match PowersaveMode::from_mode(mode) {
        Some(mode) => set_powersave(mode),
        None => Err(CorescanError::invalid_powersave_mode(mode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::cpu_count;

    #[test]
    fn mode_wire_roundtrip() {
        for mode in 0..3 {
            assert_eq!(PowersaveMode::from_mode(mode).unwrap().as_mode(), mode);
        }
        assert!(PowersaveMode::from_mode(3).is_none());
        assert!(PowersaveMode::from_mode(-1).is_none());
    }

    #[test]
    fn masks_never_exceed_core_count() {
        for mode in 0..3 {
            assert!(thread_affinity_mask(mode).num_enabled() <= cpu_count());
        }
    }

    #[test]
    fn invalid_mode_fails_open_to_all_cores() {
        let all = thread_affinity_mask(0);
        assert_eq!(thread_affinity_mask(9), all);
        assert_eq!(all.num_enabled(), cpu_count());
    }

    #[test]
    fn tier_masks_partition_on_symmetric_hardware() {
        let little = thread_affinity_mask(1);
        let big = thread_affinity_mask(2);
        assert!(little.num_enabled() + big.num_enabled() <= cpu_count());
        if little.is_empty() {
            assert_eq!(big.num_enabled(), cpu_count());
        }
    }

    #[test]
    fn out_of_range_powersave_is_rejected_and_state_kept() {
        let before = powersave();
        let err = set_powersave_mode(3).unwrap_err();
        assert!(matches!(
            err,
            CorescanError::InvalidPowersaveMode { mode: 3 }
        ));
        assert_eq!(powersave(), before);
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn powersave_all_applies_and_records() {
        set_powersave_mode(0).unwrap();
        assert_eq!(powersave(), PowersaveMode::All);
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn empty_mask_is_rejected_by_the_kernel() {
        assert!(set_thread_affinity(&CpuSet::new()).is_err());
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn pin_and_restore_current_thread() {
        let Some(original) = thread_affinity() else {
            return;
        };
        let first = original.first().expect("affinity mask cannot be empty");

        let single: CpuSet = [first].into_iter().collect();
        set_thread_affinity(&single).unwrap();
        assert_eq!(thread_affinity().unwrap().iter().collect::<Vec<_>>(), vec![first]);

        set_thread_affinity(&original).unwrap();
    }
}
