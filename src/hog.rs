// SPDX-License-Identifier: GPL-2.0

//! Worker launch and the busy-loop workload itself.
//!
//! One thread is pinned per selected CPU. All workers meet at a start
//! rendezvous after pinning, so the loops begin within the same short
//! window instead of staggered by thread-creation latency.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};

use crate::cpulist::CoreSet;
use crate::rt::{self, RtPolicy};

/// Iterations of the counting loop between two deadline checks.
const COUNT_BATCH: u64 = 100_000_000;

/// Everything a run needs beyond the core selection. Built once by option
/// parsing, immutable afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub duration: Duration,
    pub policy: Option<RtPolicy>,
    pub assume_yes: bool,
}

/// Start rendezvous shared by the workers of one run.
///
/// Workers arrive after pinning and spin until every party arrived. Any
/// failure (a CPU that cannot be pinned, a thread that cannot be spawned)
/// aborts the rendezvous instead of exiting the process from a worker: all
/// waiters are released empty-handed and the coordinator turns the abort
/// into a failed run.
struct Rendezvous {
    parties: usize,
    arrived: AtomicUsize,
    aborted: AtomicBool,
}

impl Rendezvous {
    fn new(parties: usize) -> Self {
        Self {
            parties,
            arrived: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    /// Register arrival and wait for the others. Returns false if the run
    /// was aborted while waiting.
    fn wait(&self) -> bool {
        self.arrived.fetch_add(1, Ordering::AcqRel);
        loop {
            if self.aborted.load(Ordering::Acquire) {
                return false;
            }
            if self.arrived.load(Ordering::Acquire) >= self.parties {
                return true;
            }
            hint::spin_loop();
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Run the whole load: escalate if requested, then one worker per selected
/// core until the configured duration has elapsed everywhere.
pub fn run(cores: &CoreSet, cfg: &RunConfig) -> Result<()> {
    if let Some(policy) = cfg.policy {
        rt::escalate(policy, cfg.assume_yes)?;
    }

    let duration = cfg.duration;
    launch(cores, pin_to_cpu, move || burn(duration))
}

fn pin_to_cpu(cpu: usize) -> bool {
    core_affinity::set_for_current(core_affinity::CoreId { id: cpu })
}

/// The workload: count to COUNT_BATCH, check the clock, repeat until the
/// deadline. No I/O, no syscalls and no yields inside a batch; black_box
/// keeps the counting from being folded away.
fn burn(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        let mut count: u64 = 0;
        while count < COUNT_BATCH {
            count = hint::black_box(count + 1);
        }
    }
}

fn worker<P, W>(cpu: usize, rendezvous: &Rendezvous, pin: &P, work: &W)
where
    P: Fn(usize) -> bool,
    W: Fn(),
{
    if !pin(cpu) {
        error!("unable to put a worker on CPU #{cpu}");
        rendezvous.abort();
        return;
    }
    debug!("worker pinned on CPU #{cpu}");

    if rendezvous.wait() {
        work();
    }
}

/// Spawn one worker per selected core and wait for all of them. `pin` and
/// `work` are injected so the synchronization protocol can be exercised
/// without touching real CPU affinity.
fn launch<P, W>(cores: &CoreSet, pin: P, work: W) -> Result<()>
where
    P: Fn(usize) -> bool + Sync,
    W: Fn() + Sync,
{
    let nr_workers = cores.weight();
    if nr_workers == 0 {
        info!("no core selected, nothing to do");
        return Ok(());
    }

    let rendezvous = Rendezvous::new(nr_workers);

    let spawn_failure = crossbeam_utils::thread::scope(|s| {
        let rendezvous = &rendezvous;
        let pin = &pin;
        let work = &work;

        let mut handles = Vec::with_capacity(nr_workers);
        let mut failure = None;
        for cpu in cores.iter() {
            let builder = s.builder().name(format!("hog-{cpu}"));
            match builder.spawn(move |_| worker(cpu, rendezvous, pin, work)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Release workers already spinning at the rendezvous,
                    // then join them before reporting.
                    rendezvous.abort();
                    failure = Some((cpu, err));
                    break;
                }
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        failure
    })
    .map_err(|_| anyhow!("a worker thread panicked"))?;

    if let Some((cpu, err)) = spawn_failure {
        return Err(err).with_context(|| format!("unable to start a worker for CPU #{cpu}"));
    }
    if rendezvous.is_aborted() {
        bail!("a worker could not be pinned to its CPU");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn cores(pattern: &str, nr_cpus: usize) -> CoreSet {
        CoreSet::from_cpulist(pattern, nr_cpus).unwrap()
    }

    #[test]
    fn zero_selected_cores_is_a_noop() {
        let pins = AtomicUsize::new(0);
        let works = AtomicUsize::new(0);
        launch(
            &cores("", 4),
            |_| {
                pins.fetch_add(1, Ordering::SeqCst);
                true
            },
            || {
                works.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        assert_eq!(pins.load(Ordering::SeqCst), 0);
        assert_eq!(works.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_worker_per_selected_core() {
        let pinned = Mutex::new(Vec::new());
        let works = AtomicUsize::new(0);
        launch(
            &cores("0,2-3", 4),
            |cpu| {
                pinned.lock().unwrap().push(cpu);
                true
            },
            || {
                works.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        let mut pinned = pinned.into_inner().unwrap();
        pinned.sort_unstable();
        assert_eq!(pinned, vec![0, 2, 3]);
        assert_eq!(works.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn every_pin_happens_before_any_loop_starts() {
        #[derive(Debug, PartialEq)]
        enum Event {
            Pin,
            Loop,
        }
        let events = Mutex::new(Vec::new());
        launch(
            &cores("0-3", 8),
            |_| {
                events.lock().unwrap().push(Event::Pin);
                true
            },
            || {
                events.lock().unwrap().push(Event::Loop);
            },
        )
        .unwrap();
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 8);
        assert!(events[..4].iter().all(|event| *event == Event::Pin));
        assert!(events[4..].iter().all(|event| *event == Event::Loop));
    }

    #[test]
    fn pin_failure_fails_the_whole_run() {
        let works = AtomicUsize::new(0);
        let result = launch(
            &cores("0-3", 4),
            |cpu| cpu != 2,
            || {
                works.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(result.is_err());
        assert_eq!(works.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rendezvous_releases_on_last_arrival() {
        let rendezvous = Rendezvous::new(3);
        crossbeam_utils::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|_| assert!(rendezvous.wait()));
            }
        })
        .unwrap();
        assert!(!rendezvous.is_aborted());
    }

    #[test]
    fn rendezvous_abort_releases_waiters() {
        let rendezvous = Rendezvous::new(2);
        crossbeam_utils::thread::scope(|s| {
            let waiter = s.spawn(|_| rendezvous.wait());
            rendezvous.abort();
            assert!(!waiter.join().unwrap());
        })
        .unwrap();
    }

    #[test]
    fn burn_lasts_at_least_the_requested_duration() {
        let start = Instant::now();
        burn(Duration::from_millis(1));
        assert!(start.elapsed() >= Duration::from_millis(1));
    }
}
