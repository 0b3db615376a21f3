use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use velofit::{analyze, split_rows, RawSample, RunAnalysis};

#[derive(Parser, Debug)]
#[command(author, version, about = "Constant-velocity fitting for position logs", long_about = None)]
struct Cli {
    /// Position logs to analyze (`H:MM:SS.mmm -> Ncm` lines)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path for fit summaries (`-` for stdout)
    #[arg(short, long, default_value = "fits.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON summary path
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Duplicate each input as a two-column .csv next to it
    #[arg(long, action = ArgAction::SetTrue)]
    keep_csv: bool,

    /// Directory for plot artifacts (defaults next to each input)
    #[arg(long, value_hint = ValueHint::DirPath)]
    plot_dir: Option<PathBuf>,

    /// Emit SVG plots instead of PNG
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Clone, Debug, Serialize)]
struct FitSummary {
    file: String,
    samples: usize,
    slope: f64,
    intercept_cm_per_ms: f64,
    mean_velocity_cm_per_s: f64,
}

impl FitSummary {
    fn new(path: &Path, analysis: &RunAnalysis) -> Self {
        Self {
            file: path.display().to_string(),
            samples: analysis.times_ms.len(),
            slope: analysis.slope(),
            intercept_cm_per_ms: analysis.fit.intercept,
            mean_velocity_cm_per_s: analysis.mean_velocity() * 1000.0,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    run(cli)
}

fn run(args: Cli) -> Result<()> {
    let inputs: Vec<(usize, PathBuf)> = args.inputs.iter().cloned().enumerate().collect();

    // Every file's pipeline is independent, so the batch fans out freely.
    let mut outcomes: Vec<(usize, PathBuf, Result<RunAnalysis>)> = inputs
        .par_iter()
        .map(|(file_id, path)| (*file_id, path.clone(), analyze_file(path, args.keep_csv)))
        .collect();
    outcomes.sort_by_key(|(file_id, _, _)| *file_id);

    let mut summaries = Vec::new();
    let mut analyses = Vec::new();
    for (_, path, outcome) in outcomes {
        match outcome {
            Ok(analysis) => {
                info!(
                    "{}: {} samples, slope {:.3e}, mean velocity {:.3} cm/s",
                    path.display(),
                    analysis.times_ms.len(),
                    analysis.slope(),
                    analysis.mean_velocity() * 1000.0
                );
                summaries.push(FitSummary::new(&path, &analysis));
                analyses.push((path, analysis));
            }
            Err(err) => warn!("skipping {}: {:#}", path.display(), err),
        }
    }

    if summaries.is_empty() {
        return Err(anyhow!("no input file produced a usable fit"));
    }

    if args.output.as_os_str() == "-" {
        write_summary_stdout(&summaries)?;
    } else {
        write_summary_csv(&summaries, &args.output)?;
        info!("Wrote fit summary CSV: {}", args.output.display());
    }

    if let Some(json_path) = args.json.as_ref() {
        let text = serde_json::to_string_pretty(&summaries)?;
        fs::write(json_path, text)
            .with_context(|| format!("failed to write {}", json_path.display()))?;
        info!("Wrote JSON summary: {}", json_path.display());
    }

    if !args.no_plot {
        let kind = if args.svg { ChartKind::Svg } else { ChartKind::Png };
        for (input, analysis) in &analyses {
            let path = plot_path(input, args.plot_dir.as_deref(), kind);
            if let Err(err) = render_chart_guard(analysis, &path, kind) {
                warn!("Skipping plot render ({}): {}", path.display(), err);
            } else {
                info!("Wrote plot: {}", path.display());
            }
        }
    }

    Ok(())
}

fn analyze_file(path: &Path, keep_csv: bool) -> Result<RunAnalysis> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let rows = split_rows(&text).with_context(|| format!("failed to parse {}", path.display()))?;

    if keep_csv {
        let csv_path = path.with_extension("csv");
        write_intermediate_csv(&rows, &csv_path)?;
    }

    analyze(&rows).with_context(|| format!("analysis failed for {}", path.display()))
}

/// Duplicate the raw log in two-column tabular form, no header row.
fn write_intermediate_csv(rows: &[RawSample], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.write_record([row.timestamp.as_str(), row.position.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_summary_stdout(summaries: &[FitSummary]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_summary_rows(summaries, &mut writer)
}

fn write_summary_csv(summaries: &[FitSummary], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_summary_rows(summaries, &mut writer)
}

fn write_summary_rows<W: Write>(
    summaries: &[FitSummary],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "file",
        "samples",
        "slope",
        "intercept_cm_per_ms",
        "mean_velocity_cm_per_s",
    ])?;

    for summary in summaries {
        writer.write_record([
            summary.file.clone(),
            summary.samples.to_string(),
            format!("{:.9e}", summary.slope),
            format!("{:.6}", summary.intercept_cm_per_ms),
            format!("{:.3}", summary.mean_velocity_cm_per_s),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

fn plot_path(input: &Path, dir: Option<&Path>, kind: ChartKind) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("run");
    let ext = match kind {
        ChartKind::Png => "png",
        ChartKind::Svg => "svg",
    };
    let name = format!("{}_velocity.{}", stem, ext);
    match dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

fn render_chart_guard(analysis: &RunAnalysis, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render =
        || -> Result<(), String> { render_chart(analysis, path, kind).map_err(|e| e.to_string()) };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(analysis: &RunAnalysis, path: &Path, kind: ChartKind) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, analysis)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, analysis)
        }
    }
}

fn draw_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    analysis: &RunAnalysis,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let times: Vec<f64> = analysis.times_ms.iter().map(|&t| t as f64).collect();
    let x_max = times.last().copied().unwrap_or(1.0).max(1.0);

    let mut y_lo = f64::INFINITY;
    let mut y_hi = f64::NEG_INFINITY;
    for v in analysis.velocity.iter().chain(analysis.fit.fitted.iter()) {
        y_lo = y_lo.min(*v);
        y_hi = y_hi.max(*v);
    }
    if !y_lo.is_finite() || !y_hi.is_finite() {
        y_lo = 0.0;
        y_hi = 1.0;
    }
    let pad = ((y_hi - y_lo) * 0.1).max(1e-6);

    let mut chart = ChartBuilder::on(&root)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0..x_max, (y_lo - pad)..(y_hi + pad))?;

    chart
        .configure_mesh()
        .x_desc("time (ms)")
        .y_desc("velocity (cm/ms)")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.4}", v))
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            18.0,
            FontStyle::Normal,
        ))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            times.iter().copied().zip(analysis.velocity.iter().copied()),
            &RGBColor(30, 144, 255),
        ))?
        .label("Velocity")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], &RGBColor(30, 144, 255)));

    chart
        .draw_series(LineSeries::new(
            times
                .iter()
                .copied()
                .zip(analysis.fit.fitted.iter().copied()),
            &RGBColor(200, 0, 0),
        ))?
        .label("Fit")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], &RGBColor(200, 0, 0)));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}
