//! Resource Usage Monitoring
//!
//! Tracks CPU and memory of the classifier while a batch runs. The
//! subprocess is a `bash` wrapper, so usage is summed over the whole
//! process tree below it.

use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, System};

/// Parent links followed before giving up on a process.
const MAX_TREE_DEPTH: usize = 64;

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage summed over the tree (0-100 per core)
    pub cpu_usage: f32,
    /// Memory usage in megabytes
    pub memory_mb: u64,
    /// Processes alive in the tree
    pub processes: usize,
}

/// Monitors the resource usage of a process and its descendants.
///
/// # Example
///
/// ```rust,ignore
/// use cryorunner::monitoring::ResourceMonitor;
///
/// let mut child = std::process::Command::new("sleep").arg("2").spawn()?;
/// let mut monitor = ResourceMonitor::for_process(child.id());
///
/// while child.try_wait()?.is_none() {
///     monitor.sample();
///     std::thread::sleep(std::time::Duration::from_millis(500));
/// }
///
/// println!("{}", monitor.get_summary());
/// ```
pub struct ResourceMonitor {
    system: System,
    root: Pid,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    /// Creates a monitor for the tree rooted at `pid`.
    pub fn for_process(pid: u32) -> Self {
        Self {
            system: System::new(),
            root: Pid::from_u32(pid),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample.
    ///
    /// The first call performs CPU warmup (required for accurate readings).
    /// Subsequent calls are rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        // First call: warmup
        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        let mut cpu = 0.0;
        let mut memory = 0;
        let mut processes = 0;

        for (pid, process) in self.system.processes() {
            if self.in_tree(*pid) {
                cpu += process.cpu_usage();
                memory += process.memory();
                processes += 1;
            }
        }

        if processes > 0 {
            self.samples.push(ResourceSample {
                timestamp: now,
                cpu_usage: cpu,
                memory_mb: memory / (1024 * 1024),
                processes,
            });
        }
    }

    /// Whether `pid` is the root or one of its descendants.
    fn in_tree(&self, pid: Pid) -> bool {
        let mut current = Some(pid);
        for _ in 0..MAX_TREE_DEPTH {
            match current {
                Some(p) if p == self.root => return true,
                Some(p) => current = self.system.process(p).and_then(|proc_| proc_.parent()),
                None => return false,
            }
        }
        false
    }

    /// Returns a human-readable summary of resource usage.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let max_processes = self.samples.iter().map(|s| s.processes).max().unwrap_or(0);

        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Peak Processes: {}\n  Samples: {}",
            self.average_cpu(),
            self.peak_memory_mb(),
            max_processes,
            self.samples.len()
        )
    }

    /// Returns all collected samples.
    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    /// Returns the peak memory usage in MB.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    /// Returns the average CPU usage.
    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }
}
