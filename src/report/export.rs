//! Report rasterization, pagination and PDF assembly.

use std::sync::Arc;

use image::{imageops, DynamicImage, RgbaImage};
use printpdf::{Image, ImageTransform, Mm, PdfDocument};
use resvg::{tiny_skia, usvg};
use tracing::{debug, info};

use super::layout::ReportLayout;
use crate::error::{InsightError, InsightResult};

/// Physical page size in millimetres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PageSize {
    pub const A4_PORTRAIT: PageSize = PageSize {
        width_mm: 210.0,
        height_mm: 297.0,
    };
}

/// One horizontal band of the rasterized report placed on one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlice {
    pub top_px: u32,
    pub height_px: u32,
    pub height_mm: f32,
}

/// Fit an image of `width_px` × `height_px` to the page width (aspect ratio
/// preserved) and cut it into page-high bands.
pub fn paginate(width_px: u32, height_px: u32, page: PageSize) -> Vec<PageSlice> {
    if width_px == 0 || height_px == 0 {
        return Vec::new();
    }
    let mm_per_px = page.width_mm / width_px as f32;
    let page_px = ((page.height_mm / mm_per_px).floor() as u32).max(1);

    let mut slices = Vec::new();
    let mut top = 0;
    while top < height_px {
        let height = page_px.min(height_px - top);
        slices.push(PageSlice {
            top_px: top,
            height_px: height,
            height_mm: height as f32 * mm_per_px,
        });
        top += height;
    }
    slices
}

pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, layout: &ReportLayout) -> InsightResult<RgbaImage>;
}

pub trait PdfAssembler: Send + Sync {
    /// `image` is the full report; `slices` say which band goes on which page.
    fn assemble(&self, title: &str, image: &RgbaImage, slices: &[PageSlice], page: PageSize)
        -> InsightResult<Vec<u8>>;
}

/// Renders the SVG form of the layout with resvg.
pub struct SvgRasterizer {
    scale: f32,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl SvgRasterizer {
    pub fn new(scale: f32) -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        debug!("Report rasterizer loaded {} font faces", fontdb.len());
        Self {
            scale,
            fontdb: Arc::new(fontdb),
        }
    }
}

impl Default for SvgRasterizer {
    fn default() -> Self {
        Self::new(2.0)
    }
}

impl Rasterizer for SvgRasterizer {
    fn rasterize(&self, layout: &ReportLayout) -> InsightResult<RgbaImage> {
        let options = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..usvg::Options::default()
        };
        let tree = usvg::Tree::from_str(&layout.to_svg(), &options)
            .map_err(|e| InsightError::Render(format!("invalid report svg: {e}")))?;

        let size = tree.size();
        let width = (size.width() * self.scale).ceil() as u32;
        let height = (size.height() * self.scale).ceil() as u32;
        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| InsightError::Render(format!("cannot allocate {}x{} canvas", width, height)))?;
        pixmap.fill(tiny_skia::Color::WHITE);
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(self.scale, self.scale),
            &mut pixmap.as_mut(),
        );

        RgbaImage::from_raw(width, height, pixmap.take())
            .ok_or_else(|| InsightError::Render("rasterized buffer has unexpected size".into()))
    }
}

/// One image per page, placed at the top edge and scaled to page width.
#[derive(Default)]
pub struct ImagePdfAssembler;

impl PdfAssembler for ImagePdfAssembler {
    fn assemble(
        &self,
        title: &str,
        image: &RgbaImage,
        slices: &[PageSlice],
        page: PageSize,
    ) -> InsightResult<Vec<u8>> {
        let width_px = image.width();
        // dots-per-inch that makes `width_px` span the page width
        let dpi = width_px as f32 * 25.4 / page.width_mm;

        let (doc, first_page, first_layer) =
            PdfDocument::new(title, Mm(page.width_mm), Mm(page.height_mm), "Layer 1");

        for (index, slice) in slices.iter().enumerate() {
            let (page_index, layer_index) = if index == 0 {
                (first_page, first_layer)
            } else {
                doc.add_page(Mm(page.width_mm), Mm(page.height_mm), "Layer 1")
            };
            let layer = doc.get_page(page_index).get_layer(layer_index);

            let band = imageops::crop_imm(image, 0, slice.top_px, width_px, slice.height_px).to_image();
            let rgb = DynamicImage::ImageRgba8(band).to_rgb8();
            Image::from_dynamic_image(&DynamicImage::ImageRgb8(rgb)).add_to_layer(
                layer,
                ImageTransform {
                    translate_x: Some(Mm(0.0)),
                    translate_y: Some(Mm(page.height_mm - slice.height_mm)),
                    dpi: Some(dpi),
                    ..Default::default()
                },
            );
        }

        doc.save_to_bytes()
            .map_err(|e| InsightError::Render(format!("pdf assembly failed: {e}")))
    }
}

/// A finished, downloadable report
#[derive(Debug, Clone)]
pub struct ReportFile {
    pub file_name: String,
    pub pages: usize,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ReportExporter {
    rasterizer: Arc<dyn Rasterizer>,
    assembler: Arc<dyn PdfAssembler>,
    page: PageSize,
}

impl ReportExporter {
    pub fn new(rasterizer: Arc<dyn Rasterizer>, assembler: Arc<dyn PdfAssembler>, page: PageSize) -> Self {
        Self {
            rasterizer,
            assembler,
            page,
        }
    }

    pub fn file_name(rbk: &str) -> String {
        let stem = if rbk.trim().is_empty() { "report" } else { rbk.trim() };
        format!("RBK_Prediction_{}.pdf", stem)
    }

    /// CPU bound; call from a blocking context.
    pub fn export(&self, layout: &ReportLayout) -> InsightResult<ReportFile> {
        let image = self.rasterizer.rasterize(layout)?;
        let slices = paginate(image.width(), image.height(), self.page);
        if slices.is_empty() {
            return Err(InsightError::Render("report rasterized to an empty image".into()));
        }
        let bytes = self.assembler.assemble(&layout.title, &image, &slices, self.page)?;
        info!(
            "Report exported: {} page(s), {} bytes for rbk '{}'",
            slices.len(),
            bytes.len(),
            layout.rbk
        );
        Ok(ReportFile {
            file_name: Self::file_name(&layout.rbk),
            pages: slices.len(),
            bytes,
        })
    }
}

impl Default for ReportExporter {
    fn default() -> Self {
        Self::new(
            Arc::new(SvgRasterizer::default()),
            Arc::new(ImagePdfAssembler),
            PageSize::A4_PORTRAIT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Selection;
    use crate::prediction::Prediction;
    use chrono::Utc;

    fn layout(features: usize) -> ReportLayout {
        let prediction = Prediction {
            amount: Some(42000.0),
            contributions: (0..features).map(|i| (format!("feature_{}", i), i as f64 - 3.0)).collect(),
        };
        let selection = Selection {
            state: "Guntur".into(),
            mandal: "Tenali".into(),
            rbk: "Kollur".into(),
            ..Selection::default()
        };
        ReportLayout::build(&selection, Some(&prediction), Utc::now()).unwrap()
    }

    /// Flat grey canvas sized like the real SVG at scale 2
    struct BlankRasterizer;

    impl Rasterizer for BlankRasterizer {
        fn rasterize(&self, layout: &ReportLayout) -> InsightResult<RgbaImage> {
            Ok(RgbaImage::from_pixel(2000, layout.height() * 2, image::Rgba([200, 200, 200, 255])))
        }
    }

    #[test]
    fn test_paginate_single_page() {
        let slices = paginate(2000, 1000, PageSize::A4_PORTRAIT);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].height_px, 1000);
        assert!((slices[0].height_mm - 105.0).abs() < 0.01);
    }

    #[test]
    fn test_paginate_splits_tall_images() {
        // 297mm at 210mm/2000px is 2828 px per page
        let slices = paginate(2000, 6000, PageSize::A4_PORTRAIT);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].height_px, 2828);
        assert_eq!(slices[1].top_px, 2828);
        assert_eq!(slices.iter().map(|s| s.height_px).sum::<u32>(), 6000);
        assert!(slices.iter().all(|s| s.height_mm <= 297.0 + f32::EPSILON));
    }

    #[test]
    fn test_paginate_degenerate() {
        assert!(paginate(0, 100, PageSize::A4_PORTRAIT).is_empty());
        assert!(paginate(100, 0, PageSize::A4_PORTRAIT).is_empty());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(ReportExporter::file_name("Kollur"), "RBK_Prediction_Kollur.pdf");
        assert_eq!(ReportExporter::file_name(""), "RBK_Prediction_report.pdf");
    }

    #[test]
    fn test_export_produces_pdf() {
        let exporter = ReportExporter::new(
            Arc::new(BlankRasterizer),
            Arc::new(ImagePdfAssembler),
            PageSize::A4_PORTRAIT,
        );
        let file = exporter.export(&layout(4)).unwrap();
        assert_eq!(file.pages, 1);
        assert!(file.bytes.starts_with(b"%PDF"));
        assert_eq!(file.file_name, "RBK_Prediction_Kollur.pdf");
    }

    #[test]
    fn test_long_reports_span_pages() {
        let exporter = ReportExporter::new(
            Arc::new(BlankRasterizer),
            Arc::new(ImagePdfAssembler),
            PageSize::A4_PORTRAIT,
        );
        let file = exporter.export(&layout(120)).unwrap();
        assert!(file.pages > 1);
    }

    #[test]
    fn test_svg_rasterizer_output_size() {
        let layout = layout(3);
        let image = SvgRasterizer::new(2.0).rasterize(&layout).unwrap();
        assert_eq!(image.width(), 2000);
        assert_eq!(image.height(), layout.height() * 2);
    }
}
