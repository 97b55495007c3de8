//! Benchmark driver: loads a workload cdylib, runs warmup and measured
//! passes with a GC-measurement callback installed, then prints a summary
//! and writes the per-run CSV.

mod harness;

use std::ffi::{c_char, CString};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use thiserror::Error;

use harness::{
    print_summary, summarize, write_csv, MeasurementCollector, RunResult,
};
use revier::RegionKind;

type EntryFn = unsafe extern "C" fn(u32, i32, *const *const c_char) -> i32;
type RawGcCallback = extern "C" fn(u64, u32, usize, usize);
type InstallFn = unsafe extern "C" fn(Option<RawGcCallback>);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Trace,
    Rc,
    Arena,
}

impl From<KindArg> for RegionKind {
    fn from(kind: KindArg) -> RegionKind {
        match kind {
            KindArg::Trace => RegionKind::Trace,
            KindArg::Rc => RegionKind::Rc,
            KindArg::Arena => RegionKind::Arena,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "benchmarker",
    about = "Runs a workload library against the region runtime and reports GC metrics"
)]
struct Cli {
    /// Workload cdylib exporting `run_benchmark`
    library: PathBuf,

    /// Number of measured runs
    #[arg(long, default_value_t = 5)]
    runs: usize,

    /// Number of untimed warmup runs
    #[arg(long = "warmup_runs", default_value_t = 0)]
    warmup_runs: usize,

    /// Region strategy handed to the workload
    #[arg(long, value_enum, default_value_t = KindArg::Trace)]
    kind: KindArg,

    /// Write the CSV here instead of stdout
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Passthrough arguments for the workload
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[derive(Debug, Error)]
enum HarnessError {
    #[error("failed to load workload library: {0}")]
    Load(libloading::Error),
    #[error("failed to resolve workload symbol: {0}")]
    Symbol(libloading::Error),
    #[error("argument contains a NUL byte")]
    BadArgument,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

static COLLECTOR: Mutex<Option<MeasurementCollector>> = Mutex::new(None);

extern "C" fn record_measurement(ns: u64, kind: u32, bytes: usize, objects: usize) {
    if let Some(collector) = COLLECTOR.lock().as_mut() {
        collector.record(ns, kind, bytes, objects);
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("benchmarker: {err}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<u8, HarnessError> {
    // SAFETY: loading a workload library is inherently trusting its
    // initializers; that is this tool's job.
    let library =
        unsafe { Library::new(&cli.library) }.map_err(HarnessError::Load)?;
    // SAFETY: signature fixed by the workload ABI.
    let entry: Symbol<EntryFn> = unsafe { library.get(b"run_benchmark") }
        .map_err(HarnessError::Symbol)?;
    // SAFETY: as above.
    let install: Option<Symbol<InstallFn>> =
        unsafe { library.get(b"install_gc_callback") }.ok();
    if install.is_none() {
        tracing::warn!("workload exports no install_gc_callback; metrics will be empty");
    }

    let mut argv_storage = Vec::with_capacity(cli.args.len() + 1);
    argv_storage.push(
        CString::new(cli.library.to_string_lossy().into_owned())
            .map_err(|_| HarnessError::BadArgument)?,
    );
    for arg in &cli.args {
        argv_storage
            .push(CString::new(arg.as_str()).map_err(|_| HarnessError::BadArgument)?);
    }
    let argv: Vec<*const c_char> =
        argv_storage.iter().map(|s| s.as_ptr()).collect();
    let kind = RegionKind::from(cli.kind).as_u32();

    let invoke = |label: &str, index: usize| -> i32 {
        println!("--- {label} {} ---", index + 1);
        *COLLECTOR.lock() = Some(MeasurementCollector::default());
        if let Some(install) = &install {
            // SAFETY: ABI contract with the workload library.
            unsafe { install(Some(record_measurement)) };
        }
        // SAFETY: entry matches the workload ABI; argv outlives the call.
        let code = unsafe { entry(kind, argv.len() as i32, argv.as_ptr()) };
        if let Some(install) = &install {
            // SAFETY: as above.
            unsafe { install(None) };
        }
        code
    };

    if cli.warmup_runs > 0 {
        println!("=== Warmup Phase ({} runs) ===", cli.warmup_runs);
        for i in 0..cli.warmup_runs {
            let code = invoke("Warmup", i);
            COLLECTOR.lock().take();
            if code != 0 {
                return Ok(code.clamp(0, u8::MAX as i32) as u8);
            }
        }
    }

    println!("=== Measurement Phase ({} runs) ===", cli.runs);
    let mut runs: Vec<RunResult> = Vec::with_capacity(cli.runs);
    let mut all_measurements: Vec<u64> = Vec::new();
    for i in 0..cli.runs {
        let code = invoke("Benchmark Run", i);
        let collector = COLLECTOR.lock().take().unwrap_or_default();
        if code != 0 {
            return Ok(code.clamp(0, u8::MAX as i32) as u8);
        }
        let (result, measurements) = collector.finish();
        println!(
            "Run {} - Total GC time: {} ns ({} calls, max: {} ns)",
            i + 1,
            result.gc_time_ns,
            result.gc_calls,
            result.max_gc_ns
        );
        all_measurements.extend(measurements);
        runs.push(result);
    }

    let summary = summarize(&runs, &mut all_measurements);
    print_summary(&cli.library.to_string_lossy(), &runs, &summary);

    match &cli.csv {
        Some(path) => {
            let mut file = File::create(path)?;
            write_csv(&mut file, &runs, &summary)?;
            println!("CSV written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            write_csv(&mut stdout.lock(), &runs, &summary)?;
        }
    }
    Ok(0)
}
