//! Performance probes: response time, throughput, resource usage.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::operation::Operation;
use super::sampler::{SamplerGuard, TargetPid};
use crate::assert;
use crate::stats::TimeSeries;
use crate::unit::{TestUnit, UnitContext, UnitError};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Calls the operation `iterations` times, one after another, and fails when
/// the mean latency exceeds `max_mean_ms`.
///
/// Metadata: `iterations`, `errors`, `mean_ms`, `min_ms`, `max_ms`, `p95_ms`.
pub struct ResponseTimeProbe {
    name: String,
    operation: Arc<dyn Operation>,
    iterations: usize,
    max_mean_ms: f64,
    timeout: Option<Duration>,
}

impl ResponseTimeProbe {
    pub fn new(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            iterations: 10,
            max_mean_ms: 1000.0,
            timeout: None,
        }
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn max_mean_ms(mut self, max_mean_ms: f64) -> Self {
        self.max_mean_ms = max_mean_ms;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl TestUnit for ResponseTimeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let mut latencies = TimeSeries::default();
        let mut errors = 0usize;
        let mut last_error = None;

        for i in 0..self.iterations {
            let start = Instant::now();
            let outcome = self.operation.call().await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            match outcome {
                Ok(()) => latencies.push(elapsed_ms),
                Err(e) => {
                    warn!(probe = %self.name, iteration = i, "Operation failed: {:#}", e);
                    errors += 1;
                    last_error = Some(e);
                }
            }
        }

        ctx.record("iterations", self.iterations);
        ctx.record("errors", errors);

        if latencies.is_empty() {
            let cause = last_error
                .map(|e| format!("{:#}", e))
                .unwrap_or_else(|| "no iterations ran".to_string());
            return Err(UnitError::other(format!(
                "all {} iterations of {} failed: {}",
                self.iterations,
                self.operation.describe(),
                cause
            )));
        }

        let mean = latencies.mean();
        ctx.record("mean_ms", mean);
        ctx.record("min_ms", latencies.min());
        ctx.record("max_ms", latencies.max());
        ctx.record("p95_ms", latencies.percentile(95.0));
        ctx.record("max_mean_ms", self.max_mean_ms);
        debug!(probe = %self.name, mean_ms = mean, "Response time measured");

        assert::assert_at_most(mean, self.max_mean_ms, "mean response time (ms)")?;
        Ok(())
    }
}

/// Calls the operation back to back for `window` and fails when completions
/// per second fall below `min_tps`.
///
/// Throughput is `operations / actual elapsed`, so an iteration that overruns
/// the window lowers the figure instead of inflating it.
///
/// Metadata: `operations`, `errors`, `elapsed_s`, `window_s`, `tps`.
pub struct ThroughputProbe {
    name: String,
    operation: Arc<dyn Operation>,
    window: Duration,
    min_tps: f64,
    timeout: Option<Duration>,
}

impl ThroughputProbe {
    pub fn new(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            window: Duration::from_secs(5),
            min_tps: 1.0,
            timeout: None,
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn min_tps(mut self, min_tps: f64) -> Self {
        self.min_tps = min_tps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl TestUnit for ThroughputProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let start = Instant::now();
        let mut completed = 0u64;
        let mut errors = 0u64;

        while start.elapsed() < self.window {
            match self.operation.call().await {
                Ok(()) => completed += 1,
                Err(e) => {
                    errors += 1;
                    debug!(probe = %self.name, "Operation failed: {:#}", e);
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        let tps = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };

        ctx.record("operations", completed);
        ctx.record("errors", errors);
        ctx.record("elapsed_s", elapsed);
        ctx.record("window_s", self.window.as_secs_f64());
        ctx.record("tps", tps);
        ctx.record("min_tps", self.min_tps);
        debug!(probe = %self.name, tps, completed, "Throughput measured");

        assert::assert_at_least(tps, self.min_tps, "throughput (ops/s)")?;
        Ok(())
    }
}

/// Runs the operation once while a background sampler records CPU and
/// resident memory; fails when either peak exceeds its limit.
///
/// An operation that spawns a process (e.g. [`super::CommandOperation`]) is
/// measured through that process and its descendants; anything else is
/// measured through the current process.
///
/// Metadata: `samples`, `cpu_max`, `cpu_avg`, `memory_max_mb`, and
/// `target_pid` when a child process was sampled.
pub struct ResourceUsageProbe {
    name: String,
    operation: Arc<dyn Operation>,
    interval: Duration,
    join_timeout: Duration,
    max_cpu_percent: f64,
    max_memory_mb: f64,
    timeout: Option<Duration>,
    running: Arc<AtomicBool>,
}

impl ResourceUsageProbe {
    pub fn new(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            interval: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
            max_cpu_percent: 100.0,
            max_memory_mb: 1024.0,
            timeout: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn max_cpu_percent(mut self, max_cpu_percent: f64) -> Self {
        self.max_cpu_percent = max_cpu_percent;
        self
    }

    pub fn max_memory_mb(mut self, max_memory_mb: f64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set while the background sampler thread is alive.
    pub fn sampler_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

#[async_trait::async_trait]
impl TestUnit for ResourceUsageProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let target = TargetPid::default();
        let sampler = SamplerGuard::start(
            self.interval,
            self.join_timeout,
            self.running.clone(),
            target.clone(),
        )?;

        // A panic in the operation unwinds through `sampler`'s Drop.
        let outcome = self.operation.call_tracked(&target).await;
        let samples = sampler.finish().await;

        let cpu = TimeSeries::new(samples.iter().map(|s| s.cpu_percent).collect());
        let memory_max_mb = samples
            .iter()
            .map(|s| s.memory_bytes as f64 / BYTES_PER_MB)
            .fold(0.0, f64::max);
        let cpu_max = if cpu.is_empty() { 0.0 } else { cpu.max() };

        ctx.record("samples", samples.len());
        ctx.record("cpu_max", cpu_max);
        ctx.record("cpu_avg", cpu.mean());
        ctx.record("memory_max_mb", memory_max_mb);
        if let Some(pid) = target.get() {
            ctx.record("target_pid", u64::from(pid));
        }

        outcome.map_err(|e| {
            UnitError::other(format!("{} failed: {:#}", self.operation.describe(), e))
        })?;

        assert::assert_at_most(cpu_max, self.max_cpu_percent, "peak CPU (%)")?;
        assert::assert_at_most(memory_max_mb, self.max_memory_mb, "peak memory (MB)")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::operation::from_fn;
    use crate::runner::{Runner, RunnerOptions};
    use crate::unit::{execute, Scalar, TestStatus};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tokio::time::Instant as TokioInstant;

    fn sleeping_op(ms: u64) -> Arc<dyn Operation> {
        from_fn("sleep", move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    /// Completes exactly one call per `period` on average, catching up after
    /// scheduler jitter.
    fn paced_op(period: Duration) -> Arc<dyn Operation> {
        let next: Arc<Mutex<Option<TokioInstant>>> = Arc::new(Mutex::new(None));
        from_fn("paced", move || {
            let next = next.clone();
            async move {
                let deadline = {
                    let mut slot = next.lock().unwrap();
                    let base = slot.unwrap_or_else(TokioInstant::now);
                    let deadline = base + period;
                    *slot = Some(deadline);
                    deadline
                };
                tokio::time::sleep_until(deadline).await;
                Ok(())
            }
        })
    }

    async fn run_unit(unit: &mut dyn TestUnit) -> crate::unit::UnitRecord {
        let ctx = UnitContext::new();
        execute(unit, &ctx, Duration::from_secs(30)).await
    }

    #[tokio::test]
    async fn test_response_time_records_stats() {
        let mut probe = ResponseTimeProbe::new("latency", sleeping_op(5))
            .iterations(4)
            .max_mean_ms(1000.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["iterations"], Scalar::Int(4));
        let mean = record.metric("mean_ms").unwrap();
        assert!(mean >= 5.0);
        assert!(record.metric("max_ms").unwrap() >= mean);
        assert!(record.metric("min_ms").unwrap() <= mean);
    }

    #[tokio::test]
    async fn test_response_time_threshold_fails() {
        let mut probe = ResponseTimeProbe::new("slow", sleeping_op(20))
            .iterations(2)
            .max_mean_ms(1.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert!(record.error_message.unwrap().contains("mean response time"));
    }

    #[tokio::test]
    async fn test_response_time_all_errors_is_error() {
        let op = from_fn("broken", || async { Err::<(), _>(anyhow::anyhow!("refused")) });
        let mut probe = ResponseTimeProbe::new("down", op).iterations(3);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Error);
        assert!(record.error_message.unwrap().contains("refused"));
        assert_eq!(record.metadata["errors"], Scalar::Int(3));
    }

    #[tokio::test]
    async fn test_throughput_below_threshold_fails() {
        // 500 ops/s for 2s against a 1000 ops/s floor.
        let mut probe = ThroughputProbe::new("tps", paced_op(Duration::from_millis(2)))
            .window(Duration::from_secs(2))
            .min_tps(1000.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Failed);
        let tps = record.metric("tps").unwrap();
        assert!((450.0..=550.0).contains(&tps), "tps was {}", tps);
        assert!(record.metric("elapsed_s").unwrap() >= 2.0);
    }

    #[tokio::test]
    async fn test_throughput_passes_above_threshold() {
        let mut probe = ThroughputProbe::new("tps", paced_op(Duration::from_millis(2)))
            .window(Duration::from_millis(300))
            .min_tps(100.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_resource_usage_passes_and_stops_sampler() {
        let mut probe = ResourceUsageProbe::new("resources", sleeping_op(250))
            .interval(Duration::from_millis(20))
            .max_cpu_percent(10_000.0)
            .max_memory_mb(1_000_000.0);
        let flag = probe.sampler_flag();
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(record.metric("samples").unwrap() >= 1.0);
        assert!(record.metric("memory_max_mb").unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_resource_usage_memory_limit_fails() {
        let mut probe = ResourceUsageProbe::new("resources", sleeping_op(100))
            .interval(Duration::from_millis(10))
            .max_cpu_percent(10_000.0)
            .max_memory_mb(0.001);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert!(record.error_message.unwrap().contains("peak memory"));
    }

    #[tokio::test]
    async fn test_sampler_stopped_when_operation_errors() {
        let op = from_fn("fails", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(anyhow::anyhow!("target crashed"))
        });
        let mut probe = ResourceUsageProbe::new("resources", op).interval(Duration::from_millis(10));
        let flag = probe.sampler_flag();
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Error);
        assert!(record.error_message.unwrap().contains("target crashed"));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sampler_stopped_when_operation_panics() {
        let op = from_fn("panics", || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            panic!("target exploded");
            Ok::<(), anyhow::Error>(())
        });
        let probe = ResourceUsageProbe::new("resources", op).interval(Duration::from_millis(10));
        let flag = probe.sampler_flag();
        let runner = Runner::new(RunnerOptions::default());
        let result = runner.run("panic", vec![Box::new(probe)], false).await;
        assert_eq!(result.units[0].status, TestStatus::Error);
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resource_usage_samples_spawned_command() {
        use crate::probes::CommandOperation;

        let op = CommandOperation::new("sh", vec!["-c".into(), "sleep 0.5".into()]);
        let mut probe = ResourceUsageProbe::new("child", Arc::new(op))
            .interval(Duration::from_millis(20))
            .max_cpu_percent(10_000.0)
            .max_memory_mb(1_000_000.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Passed);
        let pid = record.metric("target_pid").unwrap();
        assert_ne!(pid, f64::from(std::process::id()));
        assert!(record.metric("samples").unwrap() >= 1.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_over_memory_limit_fails() {
        use crate::probes::CommandOperation;

        let has_python = std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !has_python {
            eprintln!("python3 not available; skipping");
            return;
        }

        // Touches every byte, so the allocation is resident.
        let script = "import time; b = b'x' * (300 * 1024 * 1024); time.sleep(1.5)";
        let op = CommandOperation::new("python3", vec!["-c".into(), script.into()]);
        let mut probe = ResourceUsageProbe::new("hungry-child", Arc::new(op))
            .interval(Duration::from_millis(50))
            .max_cpu_percent(10_000.0)
            .max_memory_mb(150.0);
        let record = run_unit(&mut probe).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert!(record.metric("memory_max_mb").unwrap() > 150.0);
        assert!(record.error_message.unwrap().contains("peak memory"));
    }
}
