//! Tier bar chart using Plotters

use crate::error::{ClvError, Result};
use crate::segment::{Tier, TierSummary};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::fs;
use std::path::Path;
use tracing::info;

pub const CHART_SIZE: (u32, u32) = (900, 700);
pub const CHART_TITLE: &str = "Mean Value by Customer Category";
pub const X_AXIS_LABEL: &str = "Customer Category";
pub const Y_AXIS_LABEL: &str = "Mean Value";

const GOLD: RGBColor = RGBColor(255, 215, 0);
const SILVER: RGBColor = RGBColor(192, 192, 192);
const BROWN: RGBColor = RGBColor(165, 42, 42);

/// Bar color for a tier
pub fn tier_color(tier: Tier) -> RGBColor {
    match tier {
        Tier::Diamond => BLUE,
        Tier::Gold => GOLD,
        Tier::Silver => SILVER,
        Tier::Bronze => BROWN,
    }
}

fn render_err<E: std::fmt::Display>(err: E) -> ClvError {
    ClvError::Render(err.to_string())
}

/// Save the mean CLV of every tier as an SVG bar chart, best tier first
pub fn render_tier_chart(output_path: &Path, tiers: &[TierSummary]) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let root = SVGBackend::new(output_path, CHART_SIZE).into_drawing_area();
    draw_tier_chart(&root, tiers)?;
    root.present().map_err(render_err)?;

    info!(path = %output_path.display(), "saved tier chart");
    Ok(())
}

/// Draw the tier chart on any drawing area
pub fn draw_tier_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    tiers: &[TierSummary],
) -> Result<()> {
    if tiers.is_empty() {
        return Err(ClvError::Render("no tiers to draw".to_string()));
    }

    let n = tiers.len() as u32;
    let max_mean = tiers.iter().map(|t| t.mean_clv).fold(0.0, f64::max);
    let y_max = if max_mean > 0.0 { max_mean * 1.1 } else { 1.0 };
    let labels: Vec<&str> = tiers.iter().map(|t| t.tier.label()).collect();

    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(root)
        .caption(CHART_TITLE, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d((0u32..n).into_segmented(), 0f64..y_max)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(tiers.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::Exact(i) | SegmentValue::CenterOf(i) => {
                labels.get(*i as usize).copied().unwrap_or_default().to_string()
            }
            SegmentValue::Last => String::new(),
        })
        .x_desc(X_AXIS_LABEL)
        .y_desc(Y_AXIS_LABEL)
        .axis_desc_style(("sans-serif", 18))
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(tiers.iter().enumerate().map(|(i, t)| {
            let i = i as u32;
            let mut bar = Rectangle::new(
                [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), t.mean_clv)],
                tier_color(t.tier).filled(),
            );
            bar.set_margin(0, 0, 15, 15);
            bar
        }))
        .map_err(render_err)?;

    Ok(())
}
