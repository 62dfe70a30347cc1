//! Background CPU/memory sampler for the resource-usage unit.
//!
//! The sampler is a plain OS thread polling `sysinfo`. It shares a stop flag
//! with the foreground and is owned by a [`SamplerGuard`]: dropping the guard
//! (normal return, error, or unwinding panic) signals the stop flag and waits
//! at most `join_timeout` for the thread to acknowledge. The unit therefore
//! never outlives its sampler and never hangs on one.
//!
//! What gets sampled is decided per reading through a [`TargetPid`]: the
//! current process until an operation reports a spawned child, then that
//! child plus all of its descendants.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use sysinfo::{Pid, Process, ProcessesToUpdate, System};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

/// Granularity at which a sleeping sampler checks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Parent links followed before giving up on a process tree walk.
const MAX_TREE_DEPTH: usize = 64;

/// One reading of the sampled process tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Percent of one core summed over the tree; can exceed 100 on
    /// multi-core hosts.
    pub cpu_percent: f64,
    /// Resident memory in bytes summed over the tree.
    pub memory_bytes: u64,
}

/// Pid of the process an operation spawned, shared with the sampler thread.
/// Unset means the operation runs inside this process.
#[derive(Debug, Clone, Default)]
pub struct TargetPid(Arc<AtomicU32>);

impl TargetPid {
    pub fn set(&self, pid: u32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

pub struct SamplerGuard {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<Sample>>>,
    done: Option<mpsc::Receiver<()>>,
    handle: Option<thread::JoinHandle<()>>,
    join_timeout: Duration,
}

impl SamplerGuard {
    /// Spawn the sampler thread.
    ///
    /// `running` is set for as long as the thread is alive; callers may keep
    /// a clone to observe shutdown.
    pub fn start(
        interval: Duration,
        join_timeout: Duration,
        running: Arc<AtomicBool>,
        target: TargetPid,
    ) -> Result<Self> {
        let own_pid = sysinfo::get_current_pid()
            .map_err(|e| anyhow::anyhow!("cannot determine current pid: {}", e))?;

        let stop = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        running.store(true, Ordering::SeqCst);
        let thread_stop = stop.clone();
        let thread_running = running.clone();
        let thread_samples = samples.clone();

        let spawned = thread::Builder::new()
            .name("probebench-sampler".to_string())
            .spawn(move || {
                sample_loop(own_pid, &target, interval, &thread_stop, &thread_samples);
                thread_running.store(false, Ordering::SeqCst);
                let _ = tx.send(());
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                return Err(e).context("Failed to spawn sampler thread");
            }
        };

        debug!(interval_ms = interval.as_millis() as u64, "Sampler started");
        Ok(Self {
            stop,
            running,
            samples,
            done: Some(rx),
            handle: Some(handle),
            join_timeout,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the sampler and return everything it collected.
    ///
    /// Blocks for up to `join_timeout`; async callers use [`Self::finish`].
    pub fn stop(mut self) -> Vec<Sample> {
        self.shutdown();
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.clone()
    }

    /// [`Self::stop`] on the blocking pool, keeping runtime workers free.
    pub async fn finish(self) -> Vec<Sample> {
        let samples = self.samples.clone();
        match tokio::task::spawn_blocking(move || self.stop()).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Sampler shutdown task failed: {}", e);
                let samples = samples.lock().unwrap_or_else(|e| e.into_inner());
                samples.clone()
            }
        }
    }

    fn shutdown(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        match done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                // The thread is past its last statement; joining is immediate.
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!("Sampler thread panicked");
                    }
                }
                debug!("Sampler stopped");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Leave it detached; it exits at its next flag check.
                self.handle.take();
                warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Sampler did not stop in time; detaching"
                );
            }
        }
    }
}

impl Drop for SamplerGuard {
    fn drop(&mut self) {
        if self.done.is_none() {
            return;
        }
        // Reached on error and unwind paths, possibly on a runtime worker.
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.shutdown())
            }
            _ => self.shutdown(),
        }
    }
}

fn sample_loop(
    own_pid: Pid,
    target: &TargetPid,
    interval: Duration,
    stop: &AtomicBool,
    out: &Mutex<Vec<Sample>>,
) {
    let mut sys = System::new();
    while !stop.load(Ordering::SeqCst) {
        let sample = match target.get() {
            Some(child) => {
                // Descendants can appear at any time, so refresh everything.
                sys.refresh_processes(ProcessesToUpdate::All, true);
                tree_sample(&sys, Pid::from_u32(child))
            }
            None => {
                sys.refresh_processes(ProcessesToUpdate::Some(&[own_pid]), true);
                sys.process(own_pid).map(process_sample)
            }
        };
        if let Some(sample) = sample {
            out.lock().unwrap_or_else(|e| e.into_inner()).push(sample);
        }
        interruptible_sleep(interval, stop);
    }
}

fn process_sample(process: &Process) -> Sample {
    Sample {
        cpu_percent: f64::from(process.cpu_usage()),
        memory_bytes: process.memory(),
    }
}

/// Usage of `root` plus every live descendant. `None` once `root` is gone.
fn tree_sample(sys: &System, root: Pid) -> Option<Sample> {
    let mut total = process_sample(sys.process(root)?);
    for (pid, process) in sys.processes() {
        if *pid != root && descends_from(sys, process, root) {
            let sample = process_sample(process);
            total.cpu_percent += sample.cpu_percent;
            total.memory_bytes += sample.memory_bytes;
        }
    }
    Some(total)
}

fn descends_from(sys: &System, process: &Process, root: Pid) -> bool {
    let mut parent = process.parent();
    for _ in 0..MAX_TREE_DEPTH {
        match parent {
            Some(pid) if pid == root => return true,
            Some(pid) => parent = sys.process(pid).and_then(Process::parent),
            None => return false,
        }
    }
    false
}

fn interruptible_sleep(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(STOP_POLL);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sampler_collects_and_stops() {
        let running = Arc::new(AtomicBool::new(false));
        let guard = SamplerGuard::start(
            Duration::from_millis(20),
            Duration::from_secs(1),
            running.clone(),
            TargetPid::default(),
        )
        .unwrap();
        assert!(guard.is_running());
        thread::sleep(Duration::from_millis(120));
        let samples = guard.stop();
        assert!(!running.load(Ordering::SeqCst));
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.memory_bytes > 0));
    }

    #[test]
    fn test_drop_stops_sampler_on_panic() {
        let running = Arc::new(AtomicBool::new(false));
        let flag = running.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = SamplerGuard::start(
                Duration::from_millis(100),
                Duration::from_secs(1),
                flag,
                TargetPid::default(),
            )
            .unwrap();
            panic!("foreground failed");
        });
        assert!(result.is_err());
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_is_prompt_with_long_interval() {
        let running = Arc::new(AtomicBool::new(false));
        let guard = SamplerGuard::start(
            Duration::from_secs(10),
            Duration::from_secs(1),
            running.clone(),
            TargetPid::default(),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(30));
        let clock = Instant::now();
        drop(guard);
        assert!(clock.elapsed() < Duration::from_secs(1));
        assert!(!running.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_tree_is_sampled() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "sleep 2 & wait"])
            .spawn()
            .unwrap();
        let target = TargetPid::default();
        target.set(child.id());

        let running = Arc::new(AtomicBool::new(false));
        let guard = SamplerGuard::start(
            Duration::from_millis(20),
            Duration::from_secs(1),
            running,
            target,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(200));
        let samples = guard.stop();
        child.kill().ok();
        child.wait().ok();

        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.memory_bytes > 0));
    }

    #[test]
    fn test_gone_target_yields_no_samples() {
        let target = TargetPid::default();
        assert_eq!(target.get(), None);
        // No process carries this pid.
        target.set(u32::MAX - 1);
        let running = Arc::new(AtomicBool::new(false));
        let guard = SamplerGuard::start(
            Duration::from_millis(10),
            Duration::from_secs(1),
            running,
            target,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        assert!(guard.stop().is_empty());
    }

    #[tokio::test]
    async fn test_finish_joins_off_runtime() {
        let running = Arc::new(AtomicBool::new(false));
        let guard = SamplerGuard::start(
            Duration::from_millis(10),
            Duration::from_secs(1),
            running.clone(),
            TargetPid::default(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (samples, ticks) = crate::probes::testing::with_yield_count(guard.finish()).await;
        assert!(ticks > 0);
        assert!(!samples.is_empty());
        assert!(!running.load(Ordering::SeqCst));
    }
}
