use crate::cpuset::CpuSet;
use crate::error::{CorescanError, Result};

use super::cache::{self, CacheInfo};
use super::identity::CpuIdentity;
use super::isa::IsaSupport;
use super::topology::{self, Topology};
use super::SystemProbe;

/// Conservative fallback for platforms without a dedicated probe.
///
/// Reports a flat topology from the sysinfo crate, detects only what the
/// architecture guarantees, and refuses affinity changes.
pub struct GenericProbe;

impl SystemProbe for GenericProbe {
    fn topology(&self) -> Topology {
        let logical = topology::fallback_logical_count();
        let mut topo = Topology::symmetric(logical);
        if let Some(physical) = sysinfo::System::physical_core_count() {
            topo.physical = physical.clamp(1, logical);
        }
        topo
    }

    fn isa(&self, _topo: &Topology) -> IsaSupport {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            super::isa::detect_x86()
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            IsaSupport::default()
        }
    }

    fn caches(&self, _topo: &Topology, isa: &IsaSupport) -> CacheInfo {
        CacheInfo {
            l2: cache::fallback_l2_size(isa),
            l3: 0,
        }
    }

    fn identity(&self) -> CpuIdentity {
        CpuIdentity::read()
    }

    fn set_thread_affinity(&self, _set: &CpuSet) -> Result<()> {
        Err(CorescanError::affinity(
            "thread affinity is not supported on this platform",
        ))
    }

    fn thread_affinity(&self) -> Option<CpuSet> {
        None
    }
}
