//! Measurement collection and reporting for benchmark runs.

use std::io::{self, Write};

/// Aggregated metrics for one measured run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub gc_time_ns: u64,
    pub gc_calls: usize,
    pub max_gc_ns: u64,
    pub avg_mem_bytes: usize,
    pub peak_mem_bytes: usize,
    pub peak_objects: usize,
}

/// Receives every GC measurement of one run through the C callback.
#[derive(Debug, Default)]
pub struct MeasurementCollector {
    measurements: Vec<u64>,
    total_ns: u64,
    max_ns: u64,
    mem_total: u128,
    peak_mem: usize,
    peak_objects: usize,
}

impl MeasurementCollector {
    pub fn record(&mut self, ns: u64, _kind: u32, bytes: usize, objects: usize) {
        self.measurements.push(ns);
        self.total_ns += ns;
        self.max_ns = self.max_ns.max(ns);
        self.mem_total += bytes as u128;
        self.peak_mem = self.peak_mem.max(bytes);
        self.peak_objects = self.peak_objects.max(objects);
    }

    pub fn finish(self) -> (RunResult, Vec<u64>) {
        let calls = self.measurements.len();
        let avg_mem = if calls == 0 {
            0
        } else {
            (self.mem_total / calls as u128) as usize
        };
        let result = RunResult {
            gc_time_ns: self.total_ns,
            gc_calls: calls,
            max_gc_ns: self.max_ns,
            avg_mem_bytes: avg_mem,
            peak_mem_bytes: self.peak_mem,
            peak_objects: self.peak_objects,
        };
        (result, self.measurements)
    }
}

/// Index-based percentile over a sorted slice, matching
/// `sorted[(p / 100) * (len - 1)]`.
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64) as usize;
    sorted[idx]
}

pub fn normalized_jitter(p50: u64, p99: u64) -> f64 {
    if p50 == 0 {
        0.0
    } else {
        (p99 - p50) as f64 / p50 as f64
    }
}

#[derive(Debug)]
pub struct Summary {
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub jitter: f64,
    pub avg_mem_bytes: usize,
    pub peak_mem_bytes: usize,
}

pub fn summarize(runs: &[RunResult], all_measurements: &mut Vec<u64>) -> Summary {
    all_measurements.sort_unstable();
    let p50_ns = percentile(all_measurements, 50.0);
    let p99_ns = percentile(all_measurements, 99.0);
    let avg_mem_bytes = if runs.is_empty() {
        0
    } else {
        runs.iter().map(|r| r.avg_mem_bytes as u128).sum::<u128>() as usize
            / runs.len()
    };
    let peak_mem_bytes =
        runs.iter().map(|r| r.peak_mem_bytes).max().unwrap_or(0);
    Summary {
        p50_ns,
        p99_ns,
        jitter: normalized_jitter(p50_ns, p99_ns),
        avg_mem_bytes,
        peak_mem_bytes,
    }
}

/// One row per run, then a comment line with the aggregate statistics.
pub fn write_csv<W: Write>(
    out: &mut W,
    runs: &[RunResult],
    summary: &Summary,
) -> io::Result<()> {
    writeln!(
        out,
        "run,gc_time_ns,gc_calls,max_gc_ns,avg_mem_bytes,peak_mem_bytes,peak_objects"
    )?;
    for (i, r) in runs.iter().enumerate() {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            i + 1,
            r.gc_time_ns,
            r.gc_calls,
            r.max_gc_ns,
            r.avg_mem_bytes,
            r.peak_mem_bytes,
            r.peak_objects
        )?;
    }
    writeln!(
        out,
        "#p50_ns={},p99_ns={},jitter={:.4},avg_mem={},peak_mem={}",
        summary.p50_ns,
        summary.p99_ns,
        summary.jitter,
        summary.avg_mem_bytes,
        summary.peak_mem_bytes
    )
}

pub fn print_summary(name: &str, runs: &[RunResult], summary: &Summary) {
    println!();
    println!("{}", "=".repeat(50));
    println!("GC Benchmark Summary: {name}");
    println!("{}", "=".repeat(50));
    println!("Number of runs: {}", runs.len());
    println!();
    println!(
        "{:<6}{:<18}{:<12}{:<14}{:<14}",
        "Run", "Total (ns)", "Calls", "Max (ns)", "Peak objs"
    );
    println!("{}", "-".repeat(64));
    for (i, r) in runs.iter().enumerate() {
        println!(
            "{:<6}{:<18}{:<12}{:<14}{:<14}",
            i + 1,
            r.gc_time_ns,
            r.gc_calls,
            r.max_gc_ns,
            r.peak_objects
        );
    }
    println!("{}", "-".repeat(64));
    println!("P50 (across all GC calls): {} ns", summary.p50_ns);
    println!("P99 (across all GC calls): {} ns", summary.p99_ns);
    println!("Normalized Jitter (P99-P50)/P50: {:.4}", summary.jitter);
}
