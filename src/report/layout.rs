//! Fixed-layout prediction report
//!
//! The layout is built once from the latest prediction and can be rendered
//! either as an HTML fragment (preview) or as SVG (input to rasterization).

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use html_escape::encode_text;
use serde::Serialize;

use super::currency::format_currency;
use crate::error::{InsightError, InsightResult};
use crate::location::Selection;
use crate::prediction::Prediction;

pub const REPORT_TITLE: &str = "RBK Insight - Prediction Report";

/// Canvas width in CSS pixels
pub const REPORT_WIDTH: u32 = 1000;

const PADDING: u32 = 24;
const BAR_ROW_HEIGHT: u32 = 28;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportBar {
    pub feature: String,
    pub value: f64,
    /// Share of the largest absolute contribution, in [0, 100]
    pub width_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportLayout {
    pub title: String,
    pub generated_at: String,
    pub amount: String,
    pub state: String,
    pub mandal: String,
    pub rbk: String,
    pub season: String,
    pub quantity: f64,
    pub farmers: u32,
    pub bars: Vec<ReportBar>,
}

impl ReportLayout {
    /// Fails with `ExportPrecondition` until a prediction with an amount
    /// exists.
    pub fn build(
        selection: &Selection,
        prediction: Option<&Prediction>,
        generated_at: DateTime<Utc>,
    ) -> InsightResult<Self> {
        let prediction = prediction
            .filter(|p| p.amount.is_some_and(|amount| amount != 0.0))
            .ok_or_else(|| InsightError::ExportPrecondition("Generate a prediction first".into()))?;

        let max_abs = prediction
            .contributions
            .values()
            .fold(0.0_f64, |max, v| max.max(v.abs()));

        let bars = prediction
            .contributions
            .iter()
            .map(|(feature, value)| ReportBar {
                feature: feature.clone(),
                value: *value,
                width_pct: bar_width(*value, max_abs),
            })
            .collect();

        Ok(Self {
            title: REPORT_TITLE.to_string(),
            generated_at: generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            amount: format_currency(prediction.amount),
            state: selection.state.clone(),
            mandal: selection.mandal.clone(),
            rbk: selection.rbk.clone(),
            season: selection.season.to_string(),
            quantity: selection.quantity,
            farmers: selection.farmer_count,
            bars,
        })
    }

    /// Canvas height in CSS pixels for the SVG rendering.
    pub fn height(&self) -> u32 {
        PADDING * 2 + 60 + 40 + 130 + 40 + 60 + 40 + self.bars.len() as u32 * BAR_ROW_HEIGHT
    }

    pub fn to_html(&self) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            r#"<div style="padding:24px; font-family:Inter, sans-serif; width:{width}px;">
  <div style="display:flex; justify-content:space-between; align-items:center;">
    <h1 style="font-size:24px; margin:0;">{title}</h1>
    <div style="font-size:12px; color:#444;">Generated: {generated}</div>
  </div>
  <hr style="margin:12px 0;" />
  <h2 style="font-size:18px;">Prediction</h2>
  <div style="display:flex; gap:24px; margin-bottom:16px;">
    <div style="flex:1; background:#eef2ff; padding:12px; border-radius:8px;">
      <div style="font-size:12px; color:#374151;">Predicted Amount</div>
      <div style="font-size:26px; font-weight:700; color:#064e3b;">{amount}</div>
    </div>
    <div style="flex:1; background:#f0fdf4; padding:12px; border-radius:8px;">
      <div style="font-size:12px; color:#374151;">Location</div>
      <div style="font-size:14px;">State: {state}</div>
      <div style="font-size:14px;">Mandal: {mandal}</div>
      <div style="font-size:14px;">RBK: {rbk}</div>
    </div>
  </div>
  <h3 style="font-size:16px;">Input Parameters</h3>
  <div style="display:flex; gap:12px; margin-bottom:16px;">
    <div style="background:#fff; padding:8px; border-radius:6px;">Season: {season}</div>
    <div style="background:#fff; padding:8px; border-radius:6px;">Qty (MTs): {qty}</div>
    <div style="background:#fff; padding:8px; border-radius:6px;">Farmers: {farmers}</div>
  </div>
  <h3 style="font-size:16px;">Feature contributions (SHAP)</h3>
  <div style="margin-bottom:12px;">
"#,
            width = REPORT_WIDTH,
            title = encode_text(&self.title),
            generated = encode_text(&self.generated_at),
            amount = encode_text(&self.amount),
            state = encode_text(&self.state),
            mandal = encode_text(&self.mandal),
            rbk = encode_text(&self.rbk),
            season = encode_text(&self.season),
            qty = self.quantity,
            farmers = self.farmers,
        );
        for bar in &self.bars {
            let _ = write!(
                html,
                r#"    <div style="display:flex; align-items:center; margin-bottom:8px;">
      <div style="width:200px;">{feature}</div>
      <div style="flex:1; background:#e6eef8; height:10px; border-radius:6px; margin:0 8px;">
        <div style="height:100%; background:#2563eb; width:{width:.2}%; border-radius:6px;"></div>
      </div>
      <div style="width:60px; text-align:right;">{value:.2}</div>
    </div>
"#,
                feature = encode_text(&bar.feature),
                width = bar.width_pct,
                value = bar.value,
            );
        }
        html.push_str("  </div>\n</div>\n");
        html
    }

    pub fn to_svg(&self) -> String {
        let width = REPORT_WIDTH;
        let height = self.height();
        let inner = width - PADDING * 2;
        let card = (inner - 24) / 2;
        let mut svg = String::new();

        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="Inter, sans-serif">"#
        );
        let _ = writeln!(svg, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);

        let mut y = PADDING + 28;
        let _ = writeln!(
            svg,
            r##"<text x="{PADDING}" y="{y}" font-size="24" font-weight="700" fill="#111827">{}</text>"##,
            encode_text(&self.title)
        );
        let _ = writeln!(
            svg,
            r##"<text x="{}" y="{y}" font-size="12" fill="#444444" text-anchor="end">Generated: {}</text>"##,
            width - PADDING,
            encode_text(&self.generated_at)
        );
        y += 20;
        let _ = writeln!(
            svg,
            r##"<line x1="{PADDING}" y1="{y}" x2="{}" y2="{y}" stroke="#d1d5db"/>"##,
            width - PADDING
        );

        y += 40;
        let _ = writeln!(svg, r##"<text x="{PADDING}" y="{y}" font-size="18" font-weight="600">Prediction</text>"##);
        y += 14;
        let right = PADDING + card + 24;
        let _ = writeln!(
            svg,
            r##"<rect x="{PADDING}" y="{y}" width="{card}" height="110" rx="8" fill="#eef2ff"/>
<text x="{}" y="{}" font-size="12" fill="#374151">Predicted Amount</text>
<text x="{}" y="{}" font-size="26" font-weight="700" fill="#064e3b">{}</text>
<rect x="{right}" y="{y}" width="{card}" height="110" rx="8" fill="#f0fdf4"/>
<text x="{}" y="{}" font-size="12" fill="#374151">Location</text>
<text x="{}" y="{}" font-size="14">State: {}</text>
<text x="{}" y="{}" font-size="14">Mandal: {}</text>
<text x="{}" y="{}" font-size="14">RBK: {}</text>"##,
            PADDING + 12,
            y + 24,
            PADDING + 12,
            y + 62,
            encode_text(&self.amount),
            right + 12,
            y + 24,
            right + 12,
            y + 48,
            encode_text(&self.state),
            right + 12,
            y + 70,
            encode_text(&self.mandal),
            right + 12,
            y + 92,
            encode_text(&self.rbk),
        );

        y += 110 + 40;
        let _ = writeln!(svg, r##"<text x="{PADDING}" y="{y}" font-size="16" font-weight="600">Input Parameters</text>"##);
        y += 12;
        let inputs = [
            format!("Season: {}", self.season),
            format!("Qty (MTs): {}", self.quantity),
            format!("Farmers: {}", self.farmers),
        ];
        let mut x = PADDING;
        for label in &inputs {
            let box_width = 24 + label.chars().count() as u32 * 8;
            let _ = writeln!(
                svg,
                r##"<rect x="{x}" y="{y}" width="{box_width}" height="32" rx="6" fill="#f9fafb" stroke="#e5e7eb"/>
<text x="{}" y="{}" font-size="14">{}</text>"##,
                x + 12,
                y + 21,
                encode_text(label)
            );
            x += box_width + 12;
        }

        y += 32 + 40;
        let _ = writeln!(
            svg,
            r##"<text x="{PADDING}" y="{y}" font-size="16" font-weight="600">Feature contributions (SHAP)</text>"##
        );
        y += 16;
        let track_x = PADDING + 200 + 8;
        let track_width = inner - 200 - 60 - 16;
        for bar in &self.bars {
            let filled = (track_width as f64 * bar.width_pct / 100.0).round();
            let _ = writeln!(
                svg,
                r##"<text x="{PADDING}" y="{}" font-size="13">{}</text>
<rect x="{track_x}" y="{}" width="{track_width}" height="10" rx="5" fill="#e6eef8"/>
<rect x="{track_x}" y="{}" width="{filled}" height="10" rx="5" fill="#2563eb"/>
<text x="{}" y="{}" font-size="13" text-anchor="end">{:.2}</text>"##,
                y + 14,
                encode_text(&bar.feature),
                y + 5,
                y + 5,
                width - PADDING,
                y + 14,
                bar.value,
            );
            y += BAR_ROW_HEIGHT;
        }

        svg.push_str("</svg>\n");
        svg
    }
}

/// `value / max_abs` as a percentage, clamped to [0, 100].
pub fn bar_width(value: f64, max_abs: f64) -> f64 {
    if max_abs > 0.0 && value.is_finite() {
        (value / max_abs * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
