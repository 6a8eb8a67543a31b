// SPDX-License-Identifier: GPL-2.0

//! Core selection: which logical CPUs get an active loop.

use anyhow::{bail, Result};
use bitvec::prelude::*;
use sscanf::sscanf;

/// One flag per logical CPU, true when the CPU was selected for a worker.
/// The length is fixed at the host's online CPU count for the whole run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoreSet {
    mask: BitVec<u64, Lsb0>,
}

impl CoreSet {
    /// The default selection: every online CPU.
    pub fn all(nr_cpus: usize) -> Self {
        Self {
            mask: bitvec![u64, Lsb0; 1; nr_cpus],
        }
    }

    /// Parse a core-list pattern ("0-3,7,11-13") into a selection.
    ///
    /// A descending range is accepted and normalized ("5-2" selects 2-5).
    /// Any malformed token or index outside `0..nr_cpus` rejects the whole
    /// pattern; no partial selection escapes.
    pub fn from_cpulist(pattern: &str, nr_cpus: usize) -> Result<Self> {
        let mut mask = bitvec![u64, Lsb0; 0; nr_cpus];
        for group in pattern.split(',') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let (start, end) = match sscanf!(group, "{usize}-{usize}") {
                Ok((a, b)) => (a.min(b), a.max(b)),
                Err(_) => match sscanf!(group, "{usize}") {
                    Ok(cpu) => (cpu, cpu),
                    Err(_) => bail!("invalid core list token '{}'", group),
                },
            };
            if end >= nr_cpus {
                bail!(
                    "invalid core number {} (host has CPUs 0-{})",
                    end,
                    nr_cpus - 1
                );
            }
            for cpu in start..=end {
                mask.set(cpu, true);
            }
        }
        Ok(Self { mask })
    }

    /// Total number of CPU slots in the set (selected or not).
    pub fn nr_cpus(&self) -> usize {
        self.mask.len()
    }

    /// Number of selected CPUs, i.e. the number of workers to launch.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Test whether the given CPU is selected.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        self.mask.get(cpu).map(|bit| *bit).unwrap_or(false)
    }

    /// Iterate over the selected CPU indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }
}
