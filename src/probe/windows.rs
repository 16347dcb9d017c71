use std::mem;

use windows_sys::Win32::System::Power::CallNtPowerInformation;
use windows_sys::Win32::System::SystemInformation::{
    GetLogicalProcessorInformation, GetSystemInfo, RelationCache, RelationProcessorCore,
    SYSTEM_INFO, SYSTEM_LOGICAL_PROCESSOR_INFORMATION,
};
use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

use crate::cpuset::CpuSet;
use crate::error::{CorescanError, Result};

use super::cache::{self, CacheInfo};
use super::identity::CpuIdentity;
use super::isa::IsaSupport;
use super::topology::{classify_tiers, Topology};
use super::SystemProbe;

/// Probe backed by the Win32 system-information APIs
pub struct WindowsProbe;

// POWER_INFORMATION_LEVEL::ProcessorInformation
const PROCESSOR_INFORMATION: i32 = 11;

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct ProcessorPowerInformation {
    number: u32,
    max_mhz: u32,
    current_mhz: u32,
    mhz_limit: u32,
    max_idle_state: u32,
    current_idle_state: u32,
}

impl SystemProbe for WindowsProbe {
    fn topology(&self) -> Topology {
        let logical = logical_count().max(1);
        let entries = logical_processor_information();

        let mut physical = 0;
        let mut smt = CpuSet::new();
        let mut core_group = vec![0usize; logical];
        for entry in &entries {
            if entry.Relationship != RelationProcessorCore {
                continue;
            }
            let mask = entry.ProcessorMask;
            for core in 0..usize::BITS as usize {
                if core < logical && mask & (1 << core) != 0 {
                    core_group[core] = physical;
                    if mask.count_ones() > 1 {
                        smt.enable(core);
                    }
                }
            }
            physical += 1;
        }
        let physical = if physical == 0 {
            // no core relations at all: assume no SMT
            core_group = (0..logical).collect();
            logical
        } else {
            physical.min(logical)
        };

        let max_freq_khz = per_core_max_khz(logical);
        let (little, big) = classify_tiers(&max_freq_khz, &smt);

        Topology {
            logical,
            physical,
            all: CpuSet::all_up_to(logical),
            little,
            big,
            smt,
            core_group,
            max_freq_khz,
        }
    }

    fn isa(&self, _topo: &Topology) -> IsaSupport {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            super::isa::detect_x86()
        }
        #[cfg(target_arch = "aarch64")]
        {
            detect_aarch64_opcode()
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            IsaSupport::default()
        }
    }

    fn caches(&self, _topo: &Topology, isa: &IsaSupport) -> CacheInfo {
        // CacheUnified = 0, CacheData = 2
        let mut caches = CacheInfo::default();
        for entry in logical_processor_information() {
            if entry.Relationship != RelationCache {
                continue;
            }
            let descriptor = unsafe { entry.Anonymous.Cache };
            if descriptor.Type != 0 && descriptor.Type != 2 {
                continue;
            }
            let size = descriptor.Size as usize;
            match descriptor.Level {
                2 => caches.l2 = caches.l2.max(size),
                3 => caches.l3 = caches.l3.max(size),
                _ => {}
            }
        }
        if caches.l2 == 0 {
            caches.l2 = cache::fallback_l2_size(isa);
        }
        caches
    }

    fn identity(&self) -> CpuIdentity {
        CpuIdentity::read()
    }

    fn set_thread_affinity(&self, set: &CpuSet) -> Result<()> {
        let mask = set.low_word() as usize;
        if mask == 0 {
            return Err(CorescanError::affinity("empty affinity mask"));
        }
        let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), mask) };
        if previous == 0 {
            return Err(CorescanError::affinity_os("SetThreadAffinityMask"));
        }
        Ok(())
    }

    fn thread_affinity(&self) -> Option<CpuSet> {
        None
    }
}

fn logical_count() -> usize {
    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    info.dwNumberOfProcessors as usize
}

/// All RelationProcessorCore/RelationCache records, empty on failure
fn logical_processor_information() -> Vec<SYSTEM_LOGICAL_PROCESSOR_INFORMATION> {
    let mut len: u32 = 0;
    unsafe { GetLogicalProcessorInformation(std::ptr::null_mut(), &mut len) };
    if len == 0 {
        return Vec::new();
    }

    let entry_size = mem::size_of::<SYSTEM_LOGICAL_PROCESSOR_INFORMATION>();
    let mut entries: Vec<SYSTEM_LOGICAL_PROCESSOR_INFORMATION> =
        vec![unsafe { mem::zeroed() }; len as usize / entry_size];
    let ok = unsafe { GetLogicalProcessorInformation(entries.as_mut_ptr(), &mut len) };
    if ok == 0 {
        log::warn!("GetLogicalProcessorInformation failed, topology will be flat");
        return Vec::new();
    }
    entries.truncate(len as usize / entry_size);
    entries
}

/// Per-core max frequency via the power-management interface, kHz
fn per_core_max_khz(logical: usize) -> Vec<u64> {
    let mut buf = vec![ProcessorPowerInformation::default(); logical];
    let size = (buf.len() * mem::size_of::<ProcessorPowerInformation>()) as u32;
    let status = unsafe {
        CallNtPowerInformation(
            PROCESSOR_INFORMATION,
            std::ptr::null(),
            0,
            buf.as_mut_ptr() as *mut _,
            size,
        )
    };
    if status != 0 {
        log::debug!("CallNtPowerInformation returned {status}, frequencies unknown");
        return vec![0; logical];
    }

    let mut freqs = vec![0u64; logical];
    for info in buf {
        let core = info.number as usize;
        if core < logical {
            freqs[core] = info.max_mhz as u64 * 1000;
        }
    }
    freqs
}

/// Windows exposes no hwcap equivalent; AArch64 features are confirmed by
/// executing one candidate instruction each under the trap handler
#[cfg(target_arch = "aarch64")]
fn detect_aarch64_opcode() -> IsaSupport {
    use super::opcode::{self, aarch64 as insn};

    let supported = |code: &[u8]| opcode::opcode_faults(code).map(|faults| !faults).unwrap_or(false);

    let mut isa = IsaSupport::default();
    isa.arm_neon = true;
    isa.arm_vfpv4 = true;
    isa.arm_asimdhp = supported(&insn::ASIMDHP_FADD);
    isa.arm_asimddp = supported(&insn::ASIMDDP_SDOT);
    isa.arm_asimdfhm = supported(&insn::ASIMDFHM_FMLAL);
    isa.arm_bf16 = supported(&insn::BF16_BFMMLA);
    isa.arm_i8mm = supported(&insn::I8MM_SMMLA);
    isa
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_end_to_end() {
        let probe = WindowsProbe;
        let topo = probe.topology();
        assert!(topo.logical >= 1);
        assert!(topo.physical <= topo.logical);
        if topo.little.is_empty() {
            assert_eq!(topo.big.num_enabled(), topo.logical);
        }

        let isa = probe.isa(&topo);
        let caches = probe.caches(&topo, &isa);
        assert!(caches.l2 > 0);
    }
}
