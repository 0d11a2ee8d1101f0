//! Benchmark application
//!
//! Loads the settings, calibrates the clock, opens one session per thread and
//! runs every covered operation over every test vector. Results go to the
//! console, and optionally to JSON, CSV and SVG files.

pub mod plot;

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{info, warn};

use crate::error::{BenchError, Result};
use crate::executor::{Executor, TestCaseResult};
use crate::operation::{BenchmarkOperation, TestVector};
use crate::operations::{self, FixedLatencyOperation, GenerateRandomOperation, SoftSession, XorDeriveOperation};
use crate::report::ResultReport;
use crate::stats::timer_precision::{calibrate_once, DEFAULT_TIMER_SAMPLES};
use crate::ui::console;
use crate::utils::helpers::{parse_coverage, parse_vector_sizes, threaded_label};

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "appsettings.json";
/// Overrides [`SETTINGS_FILE`].
pub const SETTINGS_ENV: &str = "TOKEN_BENCH_SETTINGS";

const FIXED_LATENCY: Duration = Duration::from_millis(1);
const XOR_KEY_LABEL: &str = "xor-key";
const XOR_KEY_LEN: usize = 32;
const RNG_LABEL: &str = "rng";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    #[serde(rename = "Threads", deserialize_with = "validate_positive_usize")]
    pub threads: usize,
    #[serde(rename = "Iterations", deserialize_with = "validate_positive_usize")]
    pub iterations: usize,
    #[serde(rename = "SkipIterations")]
    pub skip_iterations: usize,
    #[serde(rename = "Vectors")]
    pub vectors: String,
    #[serde(rename = "Coverage")]
    pub coverage: String,
    #[serde(rename = "TimerSamples", deserialize_with = "validate_positive_usize")]
    pub timer_samples: usize,
    #[serde(rename = "GenerateSessionKeys")]
    pub generate_session_keys: bool,
    #[serde(rename = "Datapoints")]
    pub datapoints: bool,
    #[serde(rename = "JsonFile", skip_serializing_if = "Option::is_none")]
    pub json_file: Option<PathBuf>,
    #[serde(rename = "CsvFile", skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<PathBuf>,
    #[serde(rename = "PlotFile", skip_serializing_if = "Option::is_none")]
    pub plot_file: Option<PathBuf>,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            threads: 1,
            iterations: 200,
            skip_iterations: 0,
            vectors: "8,16,64,256,1024,4096".to_string(),
            coverage: "fixed,xorder,rand".to_string(),
            timer_samples: DEFAULT_TIMER_SAMPLES,
            generate_session_keys: true,
            datapoints: false,
            json_file: None,
            csv_file: None,
            plot_file: None,
        }
    }
}

fn validate_positive_usize<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = usize::deserialize(deserializer)?;
    if value > 0 {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("Value must be positive"))
    }
}

impl BenchmarkSettings {
    /// `$TOKEN_BENCH_SETTINGS`, or `appsettings.json`.
    pub fn path() -> PathBuf {
        env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
    }

    /// A missing file gives the defaults; an unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| BenchError::Config(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.vector_sizes()?;
        if self.covered().is_empty() {
            return Err(BenchError::Config("coverage list is empty".to_string()));
        }
        Ok(())
    }

    pub fn vector_sizes(&self) -> Result<Vec<usize>> {
        parse_vector_sizes(&self.vectors)
    }

    pub fn covered(&self) -> BTreeSet<String> {
        parse_coverage(&self.coverage)
    }

    pub fn test_vectors(&self) -> Result<Vec<TestVector>> {
        Ok(self.vector_sizes()?.into_iter().map(TestVector::zeroed).collect())
    }
}

// ============================================================================
// HOST INFORMATION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HostFacts {
    pub os: String,
    pub cpu: String,
    pub logical_cpus: usize,
    pub memory_mib: u64,
}

impl HostFacts {
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let fallback_brand = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            os: os_info::get().to_string(),
            cpu: cpu_brand().unwrap_or(fallback_brand),
            logical_cpus: sys.cpus().len(),
            memory_mib: sys.total_memory() / (1024 * 1024),
        }
    }

    pub fn record(&self, report: &mut ResultReport) {
        report.add("host.os", self.os.as_str());
        report.add("host.cpu", self.cpu.as_str());
        report.add("host.logical cpus", self.logical_cpus);
        report.add("host.memory.value", self.memory_mib);
        report.add("host.memory.unit", "MiB");
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn cpu_brand() -> Option<String> {
    raw_cpuid::CpuId::new()
        .get_processor_brand_string()
        .map(|brand| brand.as_str().trim().to_string())
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn cpu_brand() -> Option<String> {
    None
}

// ============================================================================
// SESSIONS AND OPERATIONS
// ============================================================================

/// One session per thread, provisioned with the keys the covered operations
/// look up.
pub fn open_sessions(settings: &BenchmarkSettings) -> Vec<SoftSession> {
    let seed: u64 = rand::random();
    let sessions = SoftSession::open_many(settings.threads, seed);
    if settings.covered().contains(operations::XORDER) {
        for (th, session) in sessions.iter().enumerate() {
            let thread = settings.generate_session_keys.then_some(th);
            session.generate_key(&threaded_label(XOR_KEY_LABEL, thread), XOR_KEY_LEN);
        }
    }
    sessions
}

/// Operations named in the coverage list, in a fixed order.
pub fn covered_operations(settings: &BenchmarkSettings) -> Vec<Box<dyn BenchmarkOperation<SoftSession>>> {
    let covered = settings.covered();
    for unknown in covered
        .iter()
        .filter(|name| ![operations::FIXED, operations::XORDER, operations::RAND].contains(&name.as_str()))
    {
        warn!(operation = %unknown, "unknown operation in coverage list, skipped");
    }

    let mut selected: Vec<Box<dyn BenchmarkOperation<SoftSession>>> = Vec::new();
    if covered.contains(operations::FIXED) {
        selected.push(Box::new(FixedLatencyOperation::new(FIXED_LATENCY)));
    }
    if covered.contains(operations::XORDER) {
        selected.push(Box::new(XorDeriveOperation::new(XOR_KEY_LABEL)));
    }
    if covered.contains(operations::RAND) {
        selected.push(Box::new(GenerateRandomOperation::new(RNG_LABEL)));
    }
    selected
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Serialize)]
struct DatapointRow<'a> {
    benchmark: &'a str,
    label: &'a str,
    vector: &'a str,
    thread: usize,
    iteration: usize,
    latency_ms: f64,
}

/// Every latency sample of `case`, one CSV row each.
pub fn write_datapoints<W: std::io::Write>(writer: &mut csv::Writer<W>, case: &TestCaseResult) -> Result<()> {
    for (thread, samples) in case.run.per_thread.iter().enumerate() {
        for (iteration, &latency_ms) in samples.iter().enumerate() {
            writer.serialize(DatapointRow {
                benchmark: &case.operation,
                label: &case.label,
                vector: &case.vector,
                thread,
                iteration,
                latency_ms,
            })?;
        }
    }
    Ok(())
}

/// `<stem>-<operation>-<vector>.<ext>` next to `base`.
pub fn case_plot_path(base: &Path, case: &TestCaseResult) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("latency");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("svg");
    base.with_file_name(format!("{}-{}-{}.{}", stem, case.operation, case.vector, ext))
}

fn write_json(path: &Path, document: &ResultReport) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(document)?)?;
    info!(path = %path.display(), "JSON report written");
    Ok(())
}

// ============================================================================
// MAIN BENCHMARK FLOW
// ============================================================================

pub async fn run_benchmark() -> Result<()> {
    let separator = "=".repeat(60);
    println!("\n{}", separator);
    println!("{:^60}", "Security Token Benchmark".bold().cyan());
    println!("{}\n", separator);

    let settings_path = BenchmarkSettings::path();
    let settings = match BenchmarkSettings::load(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "❌ Configuration Error:".bold().red(), e);
            return Err(e);
        }
    };

    // System information block
    let host = HostFacts::collect();
    println!("{}", "System Information".bold().yellow());
    println!("━━━━━━━━━━━━━━━━━━━");
    println!("▸ OS: {}", host.os);
    println!("▸ CPU: {} ({} logical)", host.cpu, host.logical_cpus);
    println!("▸ Memory: {} MiB", host.memory_mib);
    if settings.threads > host.logical_cpus {
        warn!(
            threads = settings.threads,
            logical_cpus = host.logical_cpus,
            "more threads than logical CPUs, latencies will include scheduling"
        );
    }

    let timer = match calibrate_once(settings.timer_samples) {
        Ok(timer) => timer,
        Err(e) => {
            eprintln!("{} {}", "❌ Timer calibration failed:".bold().red(), e);
            return Err(e);
        }
    };
    println!(
        "▸ Timer resolution: {} (epsilon {:.6} ms)\n",
        timer.as_measure(),
        timer.epsilon_ms()
    );

    println!("{}", "Benchmark Parameters".bold().yellow());
    println!("━━━━━━━━━━━━━━━━━━━");
    println!("▸ Threads: {}", settings.threads);
    println!("▸ Iterations/thread: {} (+{} skipped)", settings.iterations, settings.skip_iterations);
    println!("▸ Vectors: {}", settings.vectors);
    println!("▸ Coverage: {}\n", settings.coverage);

    let vectors = settings.test_vectors()?;
    let operations = covered_operations(&settings);
    if operations.is_empty() {
        return Err(BenchError::Config(format!("nothing to run for coverage '{}'", settings.coverage)));
    }

    let sessions = open_sessions(&settings);
    let executor = Executor::new(&sessions, settings.threads, timer)?
        .with_session_keys(settings.generate_session_keys)
        .with_datapoints(settings.datapoints);

    let mut csv_writer = match &settings.csv_file {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };

    let pb = ProgressBar::new((operations.len() * vectors.len()) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} test cases {wide_msg}")
            .map_err(|e| BenchError::Config(e.to_string()))?
            .progress_chars("##-"),
    );

    let mut per_threads = ResultReport::new();
    let mut failed_cases = 0usize;

    for operation in &operations {
        let mut report = ResultReport::new();
        let mut output_error = None;

        let run = tokio::task::block_in_place(|| {
            executor.benchmark_with(
                operation.as_ref(),
                settings.iterations,
                settings.skip_iterations,
                &vectors,
                |case| {
                    pb.set_message(format!("{} {}", case.operation, case.vector));
                    pb.suspend(|| console::print_case(case));
                    case.record(&mut report);
                    if !case.is_success() {
                        failed_cases += 1;
                    }
                    if output_error.is_none() {
                        output_error = export_case(case, csv_writer.as_mut(), settings.plot_file.as_deref()).err();
                    }
                    pb.inc(1);
                },
            )
        });
        if let Err(e) = run {
            pb.abandon_with_message("aborted");
            eprintln!("\n{} {}", "❌ BENCHMARK FAILED:".bold().red(), e);
            return Err(e);
        }
        if let Some(e) = output_error {
            pb.abandon_with_message("output failed");
            return Err(e);
        }

        per_threads.add_child(&format!("{} using {}", operation.name(), operation.label()), report);
    }
    pb.finish_with_message("completed");

    if let Some(writer) = csv_writer.as_mut() {
        writer.flush()?;
        if let Some(path) = &settings.csv_file {
            info!(path = %path.display(), "datapoints written");
        }
    }

    if let Some(path) = &settings.json_file {
        let mut document = ResultReport::new();
        document.add("version", crate::VERSION);
        host.record(&mut document);
        document.add_child(&format!("{} thread-s", settings.threads), per_threads);
        write_json(path, &document)?;
        println!("▸ Results saved to {}", path.display());
    }

    if failed_cases == 0 {
        println!("\n{}", "✅ Benchmark complete".bold().green());
    } else {
        println!(
            "\n{} {} test case(s) returned an error code",
            "⚠ Benchmark complete:".bold().yellow(),
            failed_cases
        );
    }
    Ok(())
}

fn export_case<W: std::io::Write>(
    case: &TestCaseResult,
    csv_writer: Option<&mut csv::Writer<W>>,
    plot_base: Option<&Path>,
) -> Result<()> {
    if let Some(writer) = csv_writer {
        write_datapoints(writer, case)?;
    }
    if let (Some(base), Some(stats)) = (plot_base, &case.run.statistics) {
        let path = case_plot_path(base, case);
        let title = format!("{} using {} on {}", case.operation, case.label, case.vector);
        plot::draw_latency_histogram(&path, &title, &case.run.samples(), stats)?;
        info!(path = %path.display(), "histogram written");
    }
    Ok(())
}
