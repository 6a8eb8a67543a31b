// SPDX-License-Identifier: GPL-2.0

//! Realtime escalation: the confirmation gate and the process-wide policy
//! switch behind it.

use std::io;
use std::io::BufRead;
use std::io::Write;

use anyhow::{bail, Context, Result};
use log::info;

const PROMPT: &str =
    "Running a realtime loop may freeze the whole system. Are you sure you want to continue (y/n)? [N] ";

/// A requested realtime scheduling policy with its priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtPolicy {
    Fifo(i32),
    RoundRobin(i32),
}

impl RtPolicy {
    /// Build the policy selection from the two priority flags. The priority
    /// is validated against the platform range for the chosen policy.
    pub fn from_opts(fifo: Option<i32>, rr: Option<i32>) -> Result<Option<Self>> {
        let policy = match (fifo, rr) {
            (Some(_), Some(_)) => bail!("can't set FIFO and RR priorities at the same time"),
            (Some(priority), None) => Self::Fifo(priority),
            (None, Some(priority)) => Self::RoundRobin(priority),
            (None, None) => return Ok(None),
        };
        policy.check_priority()?;
        Ok(Some(policy))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Fifo(_) => "FIFO",
            Self::RoundRobin(_) => "Round-Robin",
        }
    }

    fn raw(&self) -> (libc::c_int, i32) {
        match *self {
            Self::Fifo(priority) => (libc::SCHED_FIFO, priority),
            Self::RoundRobin(priority) => (libc::SCHED_RR, priority),
        }
    }

    fn check_priority(&self) -> Result<()> {
        let (policy, priority) = self.raw();
        let min = unsafe { libc::sched_get_priority_min(policy) };
        let max = unsafe { libc::sched_get_priority_max(policy) };
        if min < 0 || max < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("unable to query the {} priority range", self.name()));
        }
        if priority < min || priority > max {
            bail!(
                "invalid {} priority {} (valid range: {}-{})",
                self.name(),
                priority,
                min,
                max
            );
        }
        Ok(())
    }

    /// Switch the whole process to this realtime policy.
    fn apply(&self) -> Result<()> {
        let (policy, priority) = self.raw();
        let param = libc::sched_param {
            sched_priority: priority,
        };
        if unsafe { libc::sched_setscheduler(0, policy, &param) } != 0 {
            return Err(io::Error::last_os_error()).with_context(|| {
                format!(
                    "unable to get realtime {} priority (are you root, or did you use `sudo`?)",
                    self.name()
                )
            });
        }
        info!("running with realtime {} priority {}", self.name(), priority);
        Ok(())
    }
}

/// Gate in front of the policy switch. Realtime loops can freeze the host,
/// so an interactive ack on the terminal is required unless `-y` was given.
pub fn escalate(policy: RtPolicy, assume_yes: bool) -> Result<()> {
    if !assume_yes && !confirm(&mut io::stdin().lock(), &mut io::stderr())? {
        bail!("realtime escalation declined");
    }
    policy.apply()
}

/// Ask until the answer starts with y/Y (confirm) or n/N (decline). End of
/// input counts as a decline.
fn confirm<R: BufRead, W: Write>(answers: &mut R, prompt: &mut W) -> Result<bool> {
    loop {
        write!(prompt, "{PROMPT}")?;
        prompt.flush()?;

        let mut answer = String::new();
        if answers.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.chars().next() {
            Some('y') | Some('Y') => return Ok(true),
            Some('n') | Some('N') => return Ok(false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_confirm(input: &str) -> (bool, String) {
        let mut prompt = Vec::new();
        let confirmed = confirm(&mut Cursor::new(input), &mut prompt).unwrap();
        (confirmed, String::from_utf8(prompt).unwrap())
    }

    #[test]
    fn first_char_decides() {
        assert!(run_confirm("y\n").0);
        assert!(run_confirm("Yes please\n").0);
        assert!(!run_confirm("n\n").0);
        assert!(!run_confirm("Never\n").0);
    }

    #[test]
    fn end_of_input_declines() {
        assert!(!run_confirm("").0);
    }

    #[test]
    fn other_answers_reprompt() {
        let (confirmed, prompt) = run_confirm("maybe\n\ny\n");
        assert!(confirmed);
        assert_eq!(prompt.matches("freeze the whole system").count(), 3);
    }

    #[test]
    fn neither_flag_means_no_policy() {
        assert_eq!(RtPolicy::from_opts(None, None).unwrap(), None);
    }

    #[test]
    fn both_flags_conflict() {
        assert!(RtPolicy::from_opts(Some(30), Some(30)).is_err());
    }

    #[test]
    fn priority_must_be_in_platform_range() {
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        assert_eq!(
            RtPolicy::from_opts(Some(min), None).unwrap(),
            Some(RtPolicy::Fifo(min))
        );
        assert_eq!(
            RtPolicy::from_opts(None, Some(max)).unwrap(),
            Some(RtPolicy::RoundRobin(max))
        );
        assert!(RtPolicy::from_opts(Some(min - 1), None).is_err());
        assert!(RtPolicy::from_opts(Some(max + 1), None).is_err());
        assert!(RtPolicy::from_opts(None, Some(max + 1)).is_err());
    }
}
