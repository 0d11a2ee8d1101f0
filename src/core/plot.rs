//! Latency histogram
//!
//! SVG rendering of the pooled latencies of one test case, with the p95 and
//! p99 marks drawn over the bars.

use std::path::Path;

use plotters::prelude::*;

use crate::error::{BenchError, Result};
use crate::stats::AggregateStatistics;

pub const DEFAULT_BINS: usize = 40;

/// Equal-width bins over `[min, max]`. Returns the lower edge, the bin width
/// and the counts. A zero range gets a nominal width so every sample lands in
/// the first bin.
pub fn histogram(samples: &[f64], bins: usize) -> Option<(f64, f64, Vec<u32>)> {
    if samples.is_empty() || bins == 0 {
        return None;
    }
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let width = if range > 0.0 { range / bins as f64 } else { 1e-3 };

    let mut counts = vec![0u32; bins];
    for &v in samples {
        let bin = ((v - min) / width).floor() as usize;
        counts[bin.min(bins - 1)] += 1;
    }
    Some((min, width, counts))
}

fn plot_err<E: std::fmt::Display>(e: E) -> BenchError {
    BenchError::Plot(e.to_string())
}

pub fn draw_latency_histogram(
    output_path: &Path,
    title: &str,
    latencies_ms: &[f64],
    stats: &AggregateStatistics,
) -> Result<()> {
    let (min_val, bin_width, counts) = histogram(latencies_ms, DEFAULT_BINS)
        .ok_or_else(|| BenchError::Plot("no latency samples to draw".to_string()))?;
    let max_val = min_val + bin_width * DEFAULT_BINS as f64;
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1);
    let y_top = (max_count as f64 * 1.1).ceil() as u32;

    let root = SVGBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(min_val..max_val, 0u32..y_top)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .y_desc("Frequency")
        .x_desc("Latency (ms)")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(counts.iter().enumerate().map(|(i, &count)| {
            let x0 = min_val + i as f64 * bin_width;
            Rectangle::new([(x0, 0), (x0 + bin_width, count)], BLUE.mix(0.7).filled())
        }))
        .map_err(plot_err)?;

    for (mark, color) in [(stats.p95, RGBColor(255, 165, 0)), (stats.p99, RED)] {
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(mark, 0), (mark, max_count)],
                color.stroke_width(2),
            )))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}
