//! Report Module
//!
//! Currency formatting, the fixed report layout, and export of that layout
//! to a paginated, image-based PDF.

pub mod currency;
pub mod export;
pub mod layout;

pub use currency::format_currency;
pub use export::{
    paginate, ImagePdfAssembler, PageSize, PageSlice, PdfAssembler, Rasterizer, ReportExporter, ReportFile,
    SvgRasterizer,
};
pub use layout::{ReportBar, ReportLayout};
