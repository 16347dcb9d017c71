use serde::Serialize;

use crate::affinity;
use crate::probe::{self, cpu_info};
use crate::utils::format::{format_bytes, format_khz};

/// Snapshot of everything the probers detected, for display or JSON export
#[derive(Debug, Serialize)]
pub struct Report {
    pub vendor: String,
    pub model_name: String,
    pub hardware: String,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub little_cores: usize,
    pub big_cores: usize,
    pub physical_little_cores: usize,
    pub physical_big_cores: usize,
    pub little_mask: Vec<usize>,
    pub big_mask: Vec<usize>,
    pub smt_cores: usize,
    pub max_freq_khz: Vec<u64>,
    pub l2_cache_bytes: usize,
    pub l3_cache_bytes: usize,
    pub powersave_mode: i32,
    pub extensions: Vec<&'static str>,
    pub on_efficiency_core: bool,
}

impl Report {
    pub fn collect() -> Self {
        let info = cpu_info();
        let topo = &info.topology;

        Report {
            vendor: info.identity.vendor.clone(),
            model_name: info.identity.model_name.clone(),
            hardware: info.identity.hardware.clone(),
            logical_cores: topo.logical,
            physical_cores: topo.physical,
            little_cores: topo.little.num_enabled(),
            big_cores: topo.big.num_enabled(),
            physical_little_cores: probe::physical_little_cpu_count(),
            physical_big_cores: probe::physical_big_cpu_count(),
            little_mask: topo.little.iter().collect(),
            big_mask: topo.big.iter().collect(),
            smt_cores: topo.smt.num_enabled(),
            max_freq_khz: topo.max_freq_khz.clone(),
            l2_cache_bytes: info.caches.l2,
            l3_cache_bytes: info.caches.l3,
            powersave_mode: affinity::powersave().as_mode(),
            extensions: info.isa.enabled_names(),
            on_efficiency_core: probe::is_current_thread_running_on_efficiency_core(),
        }
    }

    /// Human-readable rendition for the terminal
    pub fn render(&self) -> String {
        let mut out = String::new();

        let model = if self.model_name.is_empty() {
            self.hardware.clone()
        } else {
            self.model_name.clone()
        };
        if !model.is_empty() || !self.vendor.is_empty() {
            out.push_str(&format!("CPU:        {} ({})\n", model, self.vendor));
        }

        out.push_str(&format!(
            "Cores:      {} logical, {} physical\n",
            self.logical_cores, self.physical_cores
        ));

        if self.little_cores == 0 {
            out.push_str("Tiers:      symmetric (no big/little split)\n");
        } else {
            out.push_str(&format!(
                "Tiers:      {} little {:?}, {} big {:?}\n",
                self.little_cores, self.little_mask, self.big_cores, self.big_mask
            ));
        }

        if self.smt_cores > 0 {
            out.push_str(&format!("SMT:        {} logical cores\n", self.smt_cores));
        }

        if let Some(max) = self.max_freq_khz.iter().copied().max()
            && max > 0
        {
            out.push_str(&format!("Max clock:  {}\n", format_khz(max)));
        }

        out.push_str(&format!(
            "L2 cache:   {} per core\n",
            format_bytes(self.l2_cache_bytes as u64)
        ));
        if self.l3_cache_bytes > 0 {
            out.push_str(&format!(
                "L3 cache:   {}\n",
                format_bytes(self.l3_cache_bytes as u64)
            ));
        }

        let powersave = match self.powersave_mode {
            1 => "little",
            2 => "big",
            _ => "all",
        };
        out.push_str(&format!("Powersave:  {powersave}\n"));

        if self.extensions.is_empty() {
            out.push_str("Extensions: none detected\n");
        } else {
            out.push_str(&format!("Extensions: {}\n", self.extensions.join(" ")));
        }

        if self.on_efficiency_core {
            out.push_str("Note:       currently scheduled on an efficiency core\n");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_matches_probe_state() {
        let report = Report::collect();
        assert!(report.logical_cores >= 1);
        assert!(report.physical_cores <= report.logical_cores);
        assert_eq!(report.little_mask.len(), report.little_cores);
        assert_eq!(report.big_mask.len(), report.big_cores);
        assert!(report.l2_cache_bytes > 0);
    }

    #[test]
    fn renders_core_lines() {
        let report = Report::collect();
        let text = report.render();
        assert!(text.contains("Cores:"));
        assert!(text.contains("L2 cache:"));
        assert!(text.contains("Powersave:"));
    }

    #[test]
    fn serializes_to_json() {
        let report = Report::collect();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"logical_cores\""));
        assert!(json.contains("\"extensions\""));
    }
}
