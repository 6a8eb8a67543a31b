// SPDX-License-Identifier: GPL-2.0

//! Minimal host probe: how many logical CPUs are online right now.

use anyhow::{bail, Result};

/// Number of online logical CPUs, as reported by the OS. Queried once at
/// startup; the rest of the run trusts this count and never re-checks it.
pub fn nr_cpus_online() -> Result<usize> {
    let nr_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if nr_cpus < 1 {
        bail!("unable to query the number of online CPUs");
    }
    Ok(nr_cpus as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_reports_at_least_one_cpu() {
        assert!(nr_cpus_online().unwrap() >= 1);
    }
}
