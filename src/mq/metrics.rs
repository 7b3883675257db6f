// src/mq/metrics.rs

//! Throughput and latency counters a bridge republishes under `_metrics`.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::{
    // ---
    domain::Payload,
    Result,
};

/// Reserved topic name for metrics.
pub const METRICS_TOPIC: &str = "_metrics";

/// Bytes per pixel assumed when turning binary blob sizes into megapixels.
const BYTES_PER_PIXEL: f64 = 3.0;

/// Weight of the newest sample in the latency averages.
const LATENCY_ALPHA: f64 = 0.1;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// One metrics snapshot, serialized as the `_metrics` metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    // ---
    /// Wall-clock time of the snapshot, seconds since the unix epoch.
    pub ts: f64,
    /// Envelopes sent per second since the previous snapshot.
    pub fps: f64,
    /// CPU use of this process since the previous snapshot, in percent of
    /// one core.
    pub cpu: f64,
    /// Resident memory of this process in MiB.
    pub mem: f64,
    /// Average milliseconds spent waiting in `recv`.
    pub lat_in: f64,
    /// Average milliseconds spent waiting in `send`.
    pub lat_out: f64,
    /// Whole seconds since the bridge started.
    pub uptime_count: u64,
    /// Envelopes sent since start.
    pub frame_count: u64,
    /// Megapixels of binary payload sent since start.
    pub megapx_count: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Rolling counters behind [`MetricsRecord`].
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    interval: Duration,
    extra: Map<String, Value>,
    frame_count: u64,
    megapx_count: f64,
    window_start: Instant,
    window_frames: u64,
    lat_in: f64,
    lat_out: f64,
    last_refresh: Option<Instant>,
    snapshot: Option<MetricsRecord>,
    usage: ProcessUsage,
}

/// CPU and memory sampler for the current process.
#[derive(Debug)]
struct ProcessUsage {
    system: System,
    pid: Option<Pid>,
}

impl ProcessUsage {
    // ---
    fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// `(cpu percent, resident MiB)`. Zeros when the process cannot be read.
    fn sample(&mut self) -> (f64, f64) {
        // ---
        let Some(pid) = self.pid else {
            return (0.0, 0.0);
        };
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        self.system.process(pid).map_or((0.0, 0.0), |process| {
            (
                f64::from(process.cpu_usage()),
                process.memory() as f64 / BYTES_PER_MIB,
            )
        })
    }
}

impl Metrics {
    // ---
    pub fn new(interval: Duration, extra: Map<String, Value>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            interval,
            extra,
            frame_count: 0,
            megapx_count: 0.0,
            window_start: now,
            window_frames: 0,
            lat_in: 0.0,
            lat_out: 0.0,
            last_refresh: None,
            snapshot: None,
            usage: ProcessUsage::new(),
        }
    }

    /// Record time spent in a `recv` that delivered.
    pub fn on_recv(&mut self, waited: Duration) {
        self.lat_in = ema(self.lat_in, waited);
    }

    /// Record one sent envelope carrying `data_bytes` of binary payload.
    pub fn on_send(&mut self, data_bytes: usize, waited: Duration) {
        // ---
        self.frame_count += 1;
        self.window_frames += 1;
        self.megapx_count += data_bytes as f64 / BYTES_PER_PIXEL / 1e6;
        self.lat_out = ema(self.lat_out, waited);
    }

    /// Take a new snapshot if `interval` has passed since the last one.
    /// Returns true when a snapshot was taken.
    pub fn refresh(&mut self, now: Instant) -> bool {
        // ---
        if self
            .last_refresh
            .is_some_and(|last| now.duration_since(last) < self.interval)
        {
            return false;
        }

        let window = now.duration_since(self.window_start).as_secs_f64();
        let fps = if window > 0.0 {
            self.window_frames as f64 / window
        } else {
            0.0
        };
        let (cpu, mem) = self.usage.sample();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        self.snapshot = Some(MetricsRecord {
            ts,
            fps,
            cpu,
            mem,
            lat_in: self.lat_in,
            lat_out: self.lat_out,
            uptime_count: now.duration_since(self.started).as_secs(),
            frame_count: self.frame_count,
            megapx_count: self.megapx_count,
            extra: self.extra.clone(),
        });
        self.window_start = now;
        self.window_frames = 0;
        self.last_refresh = Some(now);
        true
    }

    pub fn snapshot(&self) -> Option<&MetricsRecord> {
        self.snapshot.as_ref()
    }

    /// Latest snapshot as a `_metrics` payload.
    pub fn payload(&self) -> Result<Option<Payload>> {
        self.snapshot.as_ref().map(Payload::json).transpose()
    }
}

fn ema(avg: f64, sample: Duration) -> f64 {
    // ---
    let ms = sample.as_secs_f64() * 1000.0;
    if avg == 0.0 {
        ms
    } else {
        avg + LATENCY_ALPHA * (ms - avg)
    }
}
