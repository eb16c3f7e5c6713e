pub mod gallery;
pub mod ledger;

pub use gallery::{FileOutcome, FileReport, Gallery, GalleryStore, RebuildReport};
pub use ledger::{AttendanceLedger, AttendanceRecord, MarkOutcome};
