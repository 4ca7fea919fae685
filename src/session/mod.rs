//! Session Module
//!
//! The single dashboard session: UI state, notice policy, and the handle the
//! server drives.

pub mod dashboard;
pub mod notice;

pub use dashboard::{Dashboard, DashboardEvent, DashboardSession, HistoryRow, InputsUpdate, SessionSnapshot, SubmitOutcome};
pub use notice::{Notice, NoticeBoard, NoticeLevel};
