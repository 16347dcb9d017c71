use crate::cpuset::CpuSet;

/// Core layout discovered at initialization
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Logical core count, never less than 1
    pub logical: usize,
    /// Physical core count, clamped to the logical count
    pub physical: usize,
    /// Every logical core
    pub all: CpuSet,
    /// Efficiency-tier cores; empty on symmetric hardware
    pub little: CpuSet,
    /// Performance-tier cores; equals `all` on symmetric hardware
    pub big: CpuSet,
    /// Logical cores that share a physical core with at least one sibling
    pub smt: CpuSet,
    /// Physical-core group id per logical core
    pub core_group: Vec<usize>,
    /// Per-core maximum frequency in kHz, 0 when unknown
    pub max_freq_khz: Vec<u64>,
}

impl Topology {
    /// Topology for hardware with no detectable big/little split
    pub fn symmetric(logical: usize) -> Self {
        let logical = logical.max(1);
        let all = CpuSet::all_up_to(logical);
        Self {
            logical,
            physical: logical,
            all,
            little: CpuSet::new(),
            big: all,
            smt: CpuSet::new(),
            core_group: (0..logical).collect(),
            max_freq_khz: vec![0; logical],
        }
    }

    /// Count distinct physical cores covered by `mask`
    pub fn distinct_physical(&self, mask: &CpuSet) -> usize {
        let mut seen = vec![false; self.logical];
        let mut count = 0;
        for core in mask.iter() {
            let Some(group) = self.core_group.get(core).copied() else {
                continue;
            };
            if group < seen.len() && !seen[group] {
                seen[group] = true;
                count += 1;
            }
        }
        count
    }

    /// A core to sample shared-cache sizes from: first big core, else core 0
    pub fn representative_big_core(&self) -> usize {
        self.big.first().unwrap_or(0)
    }
}

/// Count `processor :` entries in /proc/cpuinfo text
pub fn count_processor_lines(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|line| {
            line.split_once(':')
                .map(|(key, _)| key.trim() == "processor")
                .unwrap_or(false)
        })
        .count()
}

/// Parse a sysfs hex cpumask such as `00000000,00000003` into a `CpuSet`.
///
/// Groups are 32-bit words, most significant first.
pub fn parse_hex_cpu_mask(text: &str) -> Option<CpuSet> {
    let groups: Vec<u32> = text
        .trim()
        .split(',')
        .map(|group| u32::from_str_radix(group.trim(), 16))
        .collect::<Result<_, _>>()
        .ok()?;
    if groups.is_empty() {
        return None;
    }

    let mut set = CpuSet::new();
    for (idx, group) in groups.iter().rev().enumerate() {
        for bit in 0..32 {
            if group & (1 << bit) != 0 {
                set.enable(idx * 32 + bit);
            }
        }
    }
    Some(set)
}

/// Group logical cores into physical cores from their sibling masks.
///
/// Returns the per-core group id, the set of SMT cores, and the physical core
/// count. A core with an unreadable mask gets a group of its own.
pub fn group_by_siblings(masks: &[Option<CpuSet>], logical: usize) -> (Vec<usize>, CpuSet, usize) {
    let mut group_of_first: Vec<(usize, usize)> = Vec::new(); // (first sibling, group id)
    let mut core_group = vec![0; logical];
    let mut groups = 0;

    for core in 0..logical {
        let first = masks
            .get(core)
            .and_then(|mask| mask.as_ref())
            .and_then(|mask| mask.first())
            .unwrap_or(core);
        match group_of_first.iter().find(|(f, _)| *f == first) {
            Some((_, group)) => core_group[core] = *group,
            None => {
                group_of_first.push((first, groups));
                core_group[core] = groups;
                groups += 1;
            }
        }
    }

    let mut smt = CpuSet::new();
    for core in 0..logical {
        let members = core_group.iter().filter(|g| **g == core_group[core]).count();
        if members > 1 {
            smt.enable(core);
        }
    }

    (core_group, smt, groups.max(1))
}

/// Split cores into little/big tiers by maximum frequency.
///
/// The frequency midpoint between the slowest and fastest core is the tier
/// boundary. A core with unknown frequency and any SMT sibling is always big:
/// SMT threads are never true efficiency cores, and an unreadable core must
/// not shrink the performance tier.
pub fn classify_tiers(freqs: &[u64], smt: &CpuSet) -> (CpuSet, CpuSet) {
    let logical = freqs.len().max(1);
    let known: Vec<u64> = freqs.iter().copied().filter(|f| *f > 0).collect();

    let all = CpuSet::all_up_to(logical);
    let Some(max) = known.iter().max().copied() else {
        return (CpuSet::new(), all);
    };
    let min = known.iter().min().copied().unwrap_or(max);
    let median = (min + max) / 2;
    if median == max {
        // all cores report the same frequency: symmetric hardware
        return (CpuSet::new(), all);
    }

    let mut little = CpuSet::new();
    let mut big = CpuSet::new();
    for (core, freq) in freqs.iter().enumerate() {
        if *freq > 0 && *freq < median && !smt.is_enabled(core) {
            little.enable(core);
        } else {
            big.enable(core);
        }
    }
    (little, big)
}

/// Max frequency listed in a cpufreq `time_in_state` table (kHz)
pub fn parse_time_in_state_max_khz(text: &str) -> Option<u64> {
    text.lines()
        .filter_map(|line| {
            line.split_whitespace()
                .next()
                .and_then(|freq| freq.parse::<u64>().ok())
        })
        .max()
}

/// Logical core count from the system probe library, floor 1
pub fn fallback_logical_count() -> usize {
    let system = sysinfo::System::new_all();
    system.cpus().len().max(1)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod sysfs {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn cpu_dir(core: usize) -> PathBuf {
        PathBuf::from(format!("/sys/devices/system/cpu/cpu{core}"))
    }

    /// Maximum frequency of `core` in kHz, 0 if undiscoverable.
    ///
    /// Tries the two historical `time_in_state` layouts before falling back
    /// to `cpuinfo_max_freq`.
    pub fn max_freq_khz(core: usize) -> u64 {
        let stats_paths = [
            PathBuf::from(format!(
                "/sys/devices/system/cpu/cpufreq/stats/cpu{core}/time_in_state"
            )),
            cpu_dir(core).join("cpufreq/stats/time_in_state"),
        ];
        for path in stats_paths {
            if let Ok(text) = fs::read_to_string(&path)
                && let Some(khz) = parse_time_in_state_max_khz(&text)
            {
                return khz;
            }
        }

        fs::read_to_string(cpu_dir(core).join("cpufreq/cpuinfo_max_freq"))
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Sibling mask of `core` from the topology directory
    pub fn sibling_mask(core: usize) -> Option<CpuSet> {
        let text = fs::read_to_string(cpu_dir(core).join("topology/thread_siblings")).ok()?;
        parse_hex_cpu_mask(&text)
    }

    /// Full Linux/Android topology probe
    pub fn detect() -> Topology {
        let logical = fs::read_to_string("/proc/cpuinfo")
            .map(|text| count_processor_lines(&text))
            .ok()
            .filter(|count| *count > 0)
            .unwrap_or_else(|| {
                log::warn!("/proc/cpuinfo unreadable, falling back to sysinfo core count");
                fallback_logical_count()
            })
            .max(1);

        let masks: Vec<Option<CpuSet>> = (0..logical).map(sibling_mask).collect();
        let (core_group, smt, physical) = group_by_siblings(&masks, logical);
        let physical = physical.min(logical);

        let max_freq_khz: Vec<u64> = (0..logical).map(max_freq_khz).collect();
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
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_CORE_CPUINFO: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Celeron(R) CPU
flags\t\t: fpu vme de pse
";

    #[test]
    fn counts_processor_lines() {
        assert_eq!(count_processor_lines(SINGLE_CORE_CPUINFO), 1);

        let eight: String = (0..8).map(|i| format!("processor\t: {i}\n")).collect();
        assert_eq!(count_processor_lines(&eight), 8);

        // "processor" must be the whole key, not a prefix of another key
        assert_eq!(count_processor_lines("processors\t: 4\n"), 0);
        assert_eq!(count_processor_lines(""), 0);
    }

    #[test]
    fn parses_hex_masks() {
        let set = parse_hex_cpu_mask("00000003").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1]);

        let set = parse_hex_cpu_mask("00000001,00000000").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![32]);

        assert!(parse_hex_cpu_mask("not hex").is_none());
        assert!(parse_hex_cpu_mask("").is_none());
    }

    #[test]
    fn sibling_dedup_detects_smt() {
        // 4 logical cores, 2 physical: {0,2} and {1,3} (interleaved siblings)
        let pair_a = parse_hex_cpu_mask("00000005");
        let pair_b = parse_hex_cpu_mask("0000000a");
        let masks = vec![pair_a, pair_b, pair_a, pair_b];
        let (groups, smt, physical) = group_by_siblings(&masks, 4);

        assert_eq!(physical, 2);
        assert_eq!(groups[0], groups[2]);
        assert_eq!(groups[1], groups[3]);
        assert_ne!(groups[0], groups[1]);
        assert_eq!(smt.num_enabled(), 4);
    }

    #[test]
    fn sibling_dedup_without_masks_assumes_no_smt() {
        let masks = vec![None, None, None, None];
        let (_, smt, physical) = group_by_siblings(&masks, 4);
        assert_eq!(physical, 4);
        assert!(smt.is_empty());
    }

    #[test]
    fn classifies_four_little_four_big() {
        let freqs = vec![
            1_800_000, 1_800_000, 1_800_000, 1_800_000, 2_800_000, 2_800_000, 2_800_000, 2_800_000,
        ];
        let (little, big) = classify_tiers(&freqs, &CpuSet::new());
        assert_eq!(little.num_enabled(), 4);
        assert_eq!(big.num_enabled(), 4);
        assert_eq!(little.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(big.iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn uniform_frequency_is_symmetric() {
        let freqs = vec![3_000_000; 8];
        let (little, big) = classify_tiers(&freqs, &CpuSet::new());
        assert!(little.is_empty());
        assert_eq!(big.num_enabled(), 8);
    }

    #[test]
    fn unknown_frequencies_default_to_big() {
        let (little, big) = classify_tiers(&[0, 0], &CpuSet::new());
        assert!(little.is_empty());
        assert_eq!(big.num_enabled(), 2);

        // one unreadable core among a split: it lands in the big tier
        let (little, big) = classify_tiers(&[1_800_000, 0, 2_800_000], &CpuSet::new());
        assert_eq!(little.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(big.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn smt_cores_are_never_little() {
        let mut smt = CpuSet::new();
        smt.enable(0);
        let (little, big) = classify_tiers(&[1_800_000, 1_800_000, 2_800_000], &smt);
        assert!(!little.is_enabled(0));
        assert!(big.is_enabled(0));
        assert!(little.is_enabled(1));
    }

    #[test]
    fn parses_time_in_state() {
        let table = "1800000 12345\n2208000 999\n648000 100000\n";
        assert_eq!(parse_time_in_state_max_khz(table), Some(2_208_000));
        assert_eq!(parse_time_in_state_max_khz(""), None);
        assert_eq!(parse_time_in_state_max_khz("garbage\n"), None);
    }

    #[test]
    fn single_core_topology_invariants() {
        let cpuinfo = SINGLE_CORE_CPUINFO;
        let logical = count_processor_lines(cpuinfo);
        assert_eq!(logical, 1);

        let (groups, smt, physical) = group_by_siblings(&[None], logical);
        assert_eq!(physical, 1);
        assert_eq!(groups, vec![0]);

        let (little, big) = classify_tiers(&[0], &smt);
        assert_eq!(little.num_enabled(), 0);
        assert_eq!(big.num_enabled(), 1);
    }

    #[test]
    fn distinct_physical_counts_groups() {
        let topo = Topology {
            logical: 4,
            physical: 2,
            all: CpuSet::all_up_to(4),
            little: CpuSet::new(),
            big: CpuSet::all_up_to(4),
            smt: CpuSet::all_up_to(4),
            core_group: vec![0, 0, 1, 1],
            max_freq_khz: vec![0; 4],
        };
        assert_eq!(topo.distinct_physical(&CpuSet::all_up_to(4)), 2);
        let pair: CpuSet = [0, 1].into_iter().collect();
        assert_eq!(topo.distinct_physical(&pair), 1);
    }

    #[test]
    fn symmetric_topology_invariants() {
        let topo = Topology::symmetric(4);
        assert_eq!(topo.logical, 4);
        assert_eq!(topo.physical, 4);
        assert!(topo.little.is_empty());
        assert_eq!(topo.big.num_enabled(), topo.logical);
        assert_eq!(topo.representative_big_core(), 0);
    }
}
