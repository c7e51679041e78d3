//! DirectGMA command-line driver.
//!
//! The binary is a thin wrapper over [`execute`]; the modules are public so
//! integration tests can exercise argument merging and report rendering.

pub mod args;
pub mod exit;
pub mod logging;
pub mod output;

use anyhow::{Context, Result};
use args::{Backend, Cli};
use console::style;
use directgma::{run_all, BenchConfig, ComputeApi, SimApi, SimSpec, TrialReport};
use output::{OutputFormat, ReportWriter};
use std::io::Write;
use tracing::info;

/// Resolve the configuration, run every trial on the selected backend and
/// write the reports to `out`.
pub fn execute<W: Write>(cli: &Cli, out: W) -> Result<Vec<TrialReport>> {
    let config = cli.bench_config()?;
    info!(
        "backend={} mode={} timing={} warmup={} iterations={} sizes={:?} orientations={}",
        cli.backend,
        config.mode,
        config.effective_timing(),
        config.warmup,
        config.effective_iterations(),
        config.sizes,
        config.orientations
    );
    if cli.format == OutputFormat::Text {
        eprintln!(
            "{} {} transfers, {} timing, {} iteration(s) per trial",
            style("DirectGMA").bold().cyan(),
            config.mode,
            config.effective_timing(),
            config.effective_iterations()
        );
    }

    let mut writer = ReportWriter::new(cli.format, out);
    match cli.backend {
        Backend::Sim => {
            let mut spec = SimSpec::amd_pair();
            if let Some(gibps) = cli.sim_bandwidth_gibps {
                anyhow::ensure!(gibps > 0.0, "--sim-bandwidth-gibps must be positive, got {gibps}");
                spec.copy_bandwidth = gibps * directgma::report::GIB;
            }
            drive(&SimApi::new(spec), &config, &mut writer)
        }
        Backend::OpenCl => run_opencl(&config, &mut writer),
    }
}

#[cfg(feature = "opencl-runtime")]
fn run_opencl<W: Write>(config: &BenchConfig, writer: &mut ReportWriter<W>) -> Result<Vec<TrialReport>> {
    drive(&directgma::ClApi::new(), config, writer)
}

#[cfg(not(feature = "opencl-runtime"))]
fn run_opencl<W: Write>(_config: &BenchConfig, _writer: &mut ReportWriter<W>) -> Result<Vec<TrialReport>> {
    anyhow::bail!("this build has no OpenCL backend; rebuild with `--features opencl-runtime`")
}

fn drive<A: ComputeApi, W: Write>(
    api: &A,
    config: &BenchConfig,
    writer: &mut ReportWriter<W>,
) -> Result<Vec<TrialReport>> {
    let mut write_error = None;
    let reports = run_all(api, config, |report| {
        if write_error.is_none() {
            write_error = writer.trial(report).err();
        }
    })
    .context("benchmark run failed")?;
    if let Some(e) = write_error {
        return Err(e).context("failed to write report");
    }
    writer.finish(&reports)?;
    Ok(reports)
}
