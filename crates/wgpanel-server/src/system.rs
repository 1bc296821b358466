//! Host Metrics Sampler
//!
//! A background thread refreshes CPU and network counters on a fixed
//! interval and publishes the latest values through atomics, so status
//! reads never touch `sysinfo` directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Networks, System};
use tracing::{debug, info};
use wgpanel_core::{SystemMetrics, SystemProbe};

/// How often the host is sampled
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Latest sample, shared with the sampling thread
#[derive(Debug, Default)]
struct Sample {
    /// f32 bits
    cpu_load: AtomicU32,
    network_speed: AtomicU64,
}

/// Background CPU and network sampler
pub struct SystemSampler {
    sample: Arc<Sample>,
    running: Arc<AtomicBool>,
    interval: Duration,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            sample: Arc::new(Sample::default()),
            running: Arc::new(AtomicBool::new(false)),
            interval,
        }
    }

    /// Start the sampling thread. Calling it twice is a no-op.
    pub fn start(&self) -> std::io::Result<Option<thread::JoinHandle<()>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let running = self.running.clone();
        let sample = self.sample.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("system-sampler".to_string())
            .spawn(move || {
                info!("System sampler started");

                let mut system = System::new();
                let mut networks = Networks::new_with_refreshed_list();
                system.refresh_cpu_usage();
                let mut last = Instant::now();

                while running.load(Ordering::Relaxed) {
                    thread::sleep(interval);

                    system.refresh_cpu_usage();
                    networks.refresh(true);

                    let elapsed = last.elapsed().as_secs_f64().max(f64::EPSILON);
                    last = Instant::now();

                    let bytes: u64 = networks
                        .iter()
                        .map(|(_, data)| data.received().saturating_add(data.transmitted()))
                        .fold(0, u64::saturating_add);
                    let speed = (bytes as f64 / elapsed) as u64;
                    let cpu = system.global_cpu_usage();

                    sample.cpu_load.store(cpu.to_bits(), Ordering::Relaxed);
                    sample.network_speed.store(speed, Ordering::Relaxed);
                    debug!(cpu_load = cpu, network_speed = speed, "Sampled host");
                }

                info!("System sampler stopped");
            })?;

        Ok(Some(handle))
    }

    /// Signal the sampling thread to exit after its current interval
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SystemSampler {
    fn sample(&self) -> SystemMetrics {
        SystemMetrics {
            cpu_load: f32::from_bits(self.sample.cpu_load.load(Ordering::Relaxed)),
            network_speed: self.sample.network_speed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SystemSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstarted_sampler_reports_zero() {
        let sampler = SystemSampler::new();

        assert_eq!(sampler.sample(), SystemMetrics::default());
    }

    #[test]
    fn test_sampler_publishes() {
        let sampler = SystemSampler::with_interval(Duration::from_millis(20));
        let handle = sampler.start().unwrap().unwrap();
        assert!(sampler.start().unwrap().is_none());

        thread::sleep(Duration::from_millis(120));
        sampler.stop();
        handle.join().unwrap();

        let metrics = sampler.sample();
        assert!(metrics.cpu_load >= 0.0);
        assert!(metrics.cpu_load.is_finite());
    }
}
