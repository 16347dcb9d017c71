pub mod affinity;
pub mod cpuset;
pub mod error;
pub mod probe;
pub mod report;
pub mod utils;

pub use affinity::{
    PowersaveMode, powersave, set_powersave, set_powersave_mode, set_thread_affinity,
    thread_affinity, thread_affinity_mask,
};
pub use cpuset::CpuSet;
pub use error::{CorescanError, Result};
pub use probe::{
    CpuInfo, big_cpu_count, cpu_count, cpu_info, cpu_level2_cache_size, cpu_level3_cache_size,
    identity, is_current_thread_running_on_efficiency_core, isa, little_cpu_count,
    physical_big_cpu_count, physical_cpu_count, physical_little_cpu_count,
};
