//! Per-drug SVG chart: closing stock bars, daily sales, the two rolling sums
//! behind the reorder limits, and the limits themselves as flat lines.

use crate::engine::DailySeries;
use crate::error::{Result, StockLimitsError};
use crate::ledger::DrugBasicInfo;
use crate::rolling::RollingStats;
use crate::tiering::Classification;
use crate::utils::sanitize_file_stem;
use log::debug;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

const CHART_SIZE: (u32, u32) = (1600, 700);

pub fn chart_file_name(file_stem: &str, basic_info: &DrugBasicInfo) -> String {
    format!(
        "{}.svg",
        sanitize_file_stem(&format!(
            "{}_{}_{}",
            file_stem, basic_info.name, basic_info.specification
        ))
    )
}

pub struct ChartInput<'a> {
    pub file_stem: &'a str,
    pub basic_info: &'a DrugBasicInfo,
    pub series: &'a DailySeries,
    pub stats: &'a RollingStats,
    pub classification: &'a Classification,
}

pub fn render_drug_chart(export_dir: &Path, input: &ChartInput<'_>) -> Result<PathBuf> {
    std::fs::create_dir_all(export_dir)?;
    let path = export_dir.join(chart_file_name(input.file_stem, input.basic_info));

    draw(&path, input).map_err(|e| StockLimitsError::Export {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;

    debug!("Rendered chart {}", path.display());
    Ok(path)
}

fn draw(
    path: &Path,
    input: &ChartInput<'_>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dates = input.series.dates();
    let sales = input.series.sales();
    let stock = input.series.closing_stock();
    let c = input.classification;

    let upper_sums = rolling_sums_for(input.stats, c.upper_window);
    let lower_sums = rolling_sums_for(input.stats, c.lower_window);

    let y_max = sales
        .iter()
        .chain(stock.iter().flatten())
        .chain(upper_sums.iter())
        .chain(lower_sums.iter())
        .chain([c.upper_limit, c.lower_limit].iter())
        .copied()
        .filter(|v| v.is_finite())
        .fold(1.0_f64, f64::max)
        * 1.1;
    let x_max = dates.len().max(1) as f64;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let caption = format!(
        "{} {} 库存与销量分析 ({})",
        input.basic_info.name, input.basic_info.specification, c.label
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..x_max - 0.5, 0.0..y_max)?;

    let date_label = |x: &f64| -> String {
        let idx = x.round();
        if idx < 0.0 {
            return String::new();
        }
        dates
            .get(idx as usize)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("日期")
        .y_desc("数量")
        .x_labels(12)
        .x_label_formatter(&date_label)
        .draw()?;

    let bar_color = RGBColor(173, 216, 230);
    chart
        .draw_series(stock.iter().enumerate().filter_map(|(i, s)| {
            s.map(|s| {
                let x = i as f64;
                Rectangle::new([(x - 0.4, 0.0), (x + 0.4, s)], bar_color.filled())
            })
        }))?
        .label("当日库存")
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], bar_color.filled()));

    let lines: [(String, &[f64], RGBColor); 3] = [
        ("当日销量".to_string(), sales.as_slice(), RED),
        (format!("近{}日销量", c.upper_window), upper_sums.as_slice(), RGBColor(255, 165, 0)),
        (format!("近{}日销量", c.lower_window), lower_sums.as_slice(), RGBColor(0, 128, 0)),
    ];
    for (label, values, color) in lines {
        if values.is_empty() {
            continue;
        }
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(i, v)| (i as f64, *v)),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    let limits = [
        (format!("拟设上限 {:.2}", c.upper_limit), c.upper_limit, MAGENTA),
        (format!("拟设下限 {:.2}", c.lower_limit), c.lower_limit, BLUE),
    ];
    for (label, level, color) in limits {
        chart
            .draw_series(LineSeries::new(
                vec![(-0.5, level), (x_max - 0.5, level)],
                color.stroke_width(2),
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn rolling_sums_for(stats: &RollingStats, window: usize) -> Vec<f64> {
    stats
        .window(window)
        .map(|w| w.sums.clone())
        .unwrap_or_default()
}
