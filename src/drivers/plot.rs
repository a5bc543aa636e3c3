use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::coord::Shift;
use plotters::prelude::LineSeries;
use plotters::prelude::*;

use crate::drivers::error::{AnalysisError, PlotError};
use crate::types::{CutoffResult, SweepDataset};

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub gain_color: RGBColor,
    pub phase_color: RGBColor,
    pub reference_color: RGBColor,
    /// Captions, axis labels and legends. Needs a system font.
    pub annotate: bool,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 700,
            background: RGBColor(0xf0, 0xf0, 0xf0),
            gain_color: RGBColor(0x00, 0x79, 0x8c),
            phase_color: RGBColor(0xd1, 0x49, 0x5b),
            reference_color: RGBColor(0x30, 0x30, 0x30),
            annotate: true,
        }
    }
}

impl PlotStyle {
    /// Curves and grid only, no text.
    pub fn plain() -> Self {
        Self {
            annotate: false,
            ..Self::default()
        }
    }
}

struct Panel<'a> {
    title: &'a str,
    y_desc: &'a str,
    values: Vec<f64>,
    reference: f64,
    color: RGBColor,
}

/// Gain (top) and phase (bottom) against log frequency, each with a reference
/// line through the cutoff point.
pub fn render_bode_png(
    dataset: &SweepDataset,
    cutoff: &CutoffResult,
    style: &PlotStyle,
) -> Result<Vec<u8>, PlotError> {
    if dataset.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            rows: dataset.len(),
        }
        .into());
    }
    let freqs = dataset.frequencies_hz();
    if freqs.iter().any(|f| !(*f > 0.0)) {
        return Err(PlotError::Plot(
            "log frequency axis needs positive frequencies".into(),
        ));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let panels = root.split_evenly((2, 1));
        let gain = Panel {
            title: "Frequency Response",
            y_desc: "Gain (dB)",
            values: dataset.gains_db(),
            reference: cutoff.cutoff_gain_db,
            color: style.gain_color,
        };
        let phase = Panel {
            title: "Phase Response",
            y_desc: "Phase (Deg)",
            values: dataset.phases_deg(),
            reference: cutoff.cutoff_phase_deg,
            color: style.phase_color,
        };
        draw_panel(&panels[0], &freqs, &gain, cutoff, style)?;
        draw_panel(&panels[1], &freqs, &phase, cutoff, style)?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

pub fn save_bode_png(
    path: &Path,
    dataset: &SweepDataset,
    cutoff: &CutoffResult,
    style: &PlotStyle,
) -> Result<(), PlotError> {
    let png = render_bode_png(dataset, cutoff, style)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PlotError::Plot(e.to_string()))?;
    }
    std::fs::write(path, png).map_err(|e| PlotError::Plot(e.to_string()))?;
    log::info!("Bode plot image saved to path: {}", path.display());
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    freqs: &[f64],
    panel: &Panel<'_>,
    cutoff: &CutoffResult,
    style: &PlotStyle,
) -> Result<(), PlotError> {
    let (f_min, f_max) = bounds(freqs.iter().copied(), 0.0);
    let (y_min, y_max) = bounds(
        panel.values.iter().copied().chain(std::iter::once(panel.reference)),
        1.0,
    );
    let (f_min, f_max) = if f_max > f_min {
        (f_min, f_max)
    } else {
        (f_min * 0.9, f_max * 1.1)
    };

    let mut builder = ChartBuilder::on(area);
    builder.margin(10);
    if style.annotate {
        builder
            .caption(panel.title, ("sans-serif", 20).into_font().color(&panel.color))
            .set_label_area_size(LabelAreaPosition::Left, 55)
            .set_label_area_size(LabelAreaPosition::Bottom, 40);
    }
    let mut chart = builder.build_cartesian_2d((f_min..f_max).log_scale(), y_min..y_max)?;

    let mut mesh = chart.configure_mesh();
    mesh.light_line_style(&BLACK.mix(0.08));
    if style.annotate {
        mesh.x_desc("Frequency (Hz)").y_desc(panel.y_desc);
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    let color = panel.color;
    let series = freqs.iter().copied().zip(panel.values.iter().copied());
    let curve = chart.draw_series(LineSeries::new(series, &color))?;
    if style.annotate {
        curve
            .label(panel.y_desc)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    let reference_color = style.reference_color;
    let reference = chart.draw_series(LineSeries::new(
        vec![(f_min, panel.reference), (f_max, panel.reference)],
        &reference_color.mix(0.6),
    ))?;
    if style.annotate {
        reference
            .label(format!("cutoff {:.0} Hz", cutoff.cutoff_freq_hz))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &reference_color));
    }
    chart.draw_series(std::iter::once(Circle::new(
        (cutoff.cutoff_freq_hz, panel.reference),
        4,
        color.filled(),
    )))?;

    if style.annotate {
        chart
            .configure_series_labels()
            .border_style(&BLACK.mix(0.2))
            .background_style(&style.background)
            .draw()?;
    }
    Ok(())
}

/// Min/max of `values`, padded by a tenth of the span (at least `min_pad`).
fn bounds(values: impl Iterator<Item = f64>, min_pad: f64) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if min_pad == 0.0 {
        return (lo, hi);
    }
    let pad = ((hi - lo) * 0.1).max(min_pad);
    (lo - pad, hi + pad)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, PlotError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| PlotError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::analyzer::BodeAnalyzer;
    use crate::types::{MeasurementSample, SweepStepResult};

    fn low_pass() -> SweepDataset {
        (0..20)
            .map(|k| {
                let f = 100.0 * 1.3f64.powi(k);
                let ratio = 1.0 / (1.0 + (f / 1000.0).powi(2)).sqrt();
                SweepStepResult::from_sample(MeasurementSample {
                    input_freq_hz: f,
                    input_ampl_vpp: 1.0,
                    output_freq_hz: f,
                    output_ampl_vpp: ratio,
                    phase_diff_deg: -(f / 1000.0).atan().to_degrees(),
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn renders_png_without_text() {
        let data = low_pass();
        let cutoff = BodeAnalyzer::cutoff(&data).unwrap();
        let png = render_bode_png(&data, &cutoff, &PlotStyle::plain()).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn refuses_single_row() {
        let data: SweepDataset = low_pass().iter().take(1).copied().collect();
        let cutoff = BodeAnalyzer::cutoff(&low_pass()).unwrap();
        assert!(matches!(
            render_bode_png(&data, &cutoff, &PlotStyle::plain()),
            Err(PlotError::Analysis(AnalysisError::InsufficientData { rows: 1 }))
        ));
    }

    #[test]
    fn padding_never_collapses_axis() {
        let (lo, hi) = bounds([-3.0, -3.0].into_iter(), 1.0);
        assert!(hi - lo >= 2.0);
    }
}
