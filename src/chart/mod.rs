//! Trend chart: a serializable description and an SVG renderer.

use crate::models::{SeriesTable, Variable, YearRange};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 450.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 120.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;
const Y_TICKS: usize = 5;

/// One plotted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub label: String,
    pub color: String,
    /// One value per year; `None` is a gap.
    pub values: Vec<Option<f64>>,
}

/// Line chart of both variables against year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub line_width: u32,
    pub point_size: u32,
    pub years: Vec<i32>,
    pub series: Vec<ChartSeries>,
}

impl ChartSpec {
    pub fn from_table(table: &SeriesTable, years: YearRange) -> Self {
        Self {
            title: format!("ET and NDVI Trend ({}–{})", years.start(), years.end()),
            x_label: "Year".to_string(),
            y_label: "Value".to_string(),
            line_width: 2,
            point_size: 4,
            years: table.records.iter().map(|r| r.year).collect(),
            series: Variable::ALL
                .iter()
                .map(|&variable| ChartSeries {
                    label: variable.name().to_string(),
                    color: variable.chart_color().to_string(),
                    values: table.column(variable),
                })
                .collect(),
        }
    }

    /// Lowest and highest plotted value, padded when flat.
    fn value_bounds(&self) -> (f64, f64) {
        let values = self
            .series
            .iter()
            .flat_map(|s| s.values.iter().flatten().copied());
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

        if !min.is_finite() || !max.is_finite() {
            (0.0, 1.0)
        } else if min == max {
            (min - 1.0, max + 1.0)
        } else {
            (min, max)
        }
    }

    /// Render the chart as a standalone SVG document.
    pub fn render_svg(&self) -> String {
        let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let (y_min, y_max) = self.value_bounds();

        let n = self.years.len();
        let x_at = |i: usize| -> f64 {
            if n <= 1 {
                MARGIN_LEFT + plot_w / 2.0
            } else {
                MARGIN_LEFT + plot_w * i as f64 / (n - 1) as f64
            }
        };
        let y_at = |v: f64| -> f64 { MARGIN_TOP + plot_h * (y_max - v) / (y_max - y_min) };

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = WIDTH,
            h = HEIGHT
        );
        let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="28" text-anchor="middle" font-family="sans-serif" font-size="18">{}</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            escape(&self.title)
        );

        // Axes
        let x_axis_y = MARGIN_TOP + plot_h;
        let _ = writeln!(
            svg,
            r#"<line x1="{l}" y1="{b:.1}" x2="{r:.1}" y2="{b:.1}" stroke="black"/>"#,
            l = MARGIN_LEFT,
            b = x_axis_y,
            r = MARGIN_LEFT + plot_w
        );
        let _ = writeln!(
            svg,
            r#"<line x1="{l}" y1="{t}" x2="{l}" y2="{b:.1}" stroke="black"/>"#,
            l = MARGIN_LEFT,
            t = MARGIN_TOP,
            b = x_axis_y
        );

        let label_every = (n / 12).max(1);
        for (i, year) in self.years.iter().enumerate() {
            let x = x_at(i);
            let _ = writeln!(
                svg,
                r#"<line x1="{x:.1}" y1="{b:.1}" x2="{x:.1}" y2="{t:.1}" stroke="black"/>"#,
                b = x_axis_y,
                t = x_axis_y + 5.0
            );
            if i % label_every == 0 {
                let _ = writeln!(
                    svg,
                    r#"<text x="{x:.1}" y="{y:.1}" text-anchor="middle" font-family="sans-serif" font-size="11">{year}</text>"#,
                    y = x_axis_y + 18.0
                );
            }
        }

        for tick in 0..=Y_TICKS {
            let v = y_min + (y_max - y_min) * tick as f64 / Y_TICKS as f64;
            let y = y_at(v);
            let _ = writeln!(
                svg,
                r##"<line x1="{l}" y1="{y:.1}" x2="{r:.1}" y2="{y:.1}" stroke="#dddddd"/>"##,
                l = MARGIN_LEFT,
                r = MARGIN_LEFT + plot_w
            );
            let _ = writeln!(
                svg,
                r#"<text x="{x:.1}" y="{ty:.1}" text-anchor="end" font-family="sans-serif" font-size="11">{}</text>"#,
                format_tick(v),
                x = MARGIN_LEFT - 6.0,
                ty = y + 4.0
            );
        }

        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="sans-serif" font-size="13">{}</text>"#,
            MARGIN_LEFT + plot_w / 2.0,
            HEIGHT - 15.0,
            escape(&self.x_label)
        );
        let _ = writeln!(
            svg,
            r#"<text x="18" y="{y:.1}" text-anchor="middle" font-family="sans-serif" font-size="13" transform="rotate(-90 18 {y:.1})">{}</text>"#,
            escape(&self.y_label),
            y = MARGIN_TOP + plot_h / 2.0
        );

        for (index, series) in self.series.iter().enumerate() {
            let color = escape(&series.color);

            // Lines break at gaps.
            let mut run: Vec<(f64, f64)> = Vec::new();
            let mut segments: Vec<Vec<(f64, f64)>> = Vec::new();
            for (i, value) in series.values.iter().enumerate() {
                match value {
                    Some(v) => run.push((x_at(i), y_at(*v))),
                    None if !run.is_empty() => segments.push(std::mem::take(&mut run)),
                    None => {}
                }
            }
            if !run.is_empty() {
                segments.push(run);
            }

            for segment in segments.iter().filter(|s| s.len() > 1) {
                let points: Vec<String> = segment
                    .iter()
                    .map(|(x, y)| format!("{:.1},{:.1}", x, y))
                    .collect();
                let _ = writeln!(
                    svg,
                    r#"<polyline fill="none" stroke="{}" stroke-width="{}" points="{}"/>"#,
                    color,
                    self.line_width,
                    points.join(" ")
                );
            }
            for (x, y) in segments.iter().flatten() {
                let _ = writeln!(
                    svg,
                    r#"<circle cx="{:.1}" cy="{:.1}" r="{}" fill="{}"/>"#,
                    x, y, self.point_size, color
                );
            }

            let legend_x = WIDTH - MARGIN_RIGHT + 15.0;
            let legend_y = MARGIN_TOP + 10.0 + 22.0 * index as f64;
            let _ = writeln!(
                svg,
                r#"<line x1="{:.1}" y1="{ly:.1}" x2="{:.1}" y2="{ly:.1}" stroke="{}" stroke-width="{}"/>"#,
                legend_x,
                legend_x + 20.0,
                color,
                self.line_width,
                ly = legend_y
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="12">{}</text>"#,
                legend_x + 26.0,
                legend_y + 4.0,
                escape(&series.label)
            );
        }

        svg.push_str("</svg>\n");
        svg
    }
}

fn format_tick(v: f64) -> String {
    if v.abs() >= 100.0 {
        format!("{:.0}", v)
    } else if v.abs() >= 1.0 {
        format!("{:.1}", v)
    } else {
        format!("{:.2}", v)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
