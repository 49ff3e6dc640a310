//! Clients for external collaborator services.
//!
//! Each capability the engine consumes is a trait with a reqwest-backed
//! implementation, so tests can substitute stubs. Every call carries a
//! bounded timeout; callers treat failures as degradable and fall back
//! rather than propagate.

pub mod media;
pub mod ner;
pub mod ocr;
pub mod vision;

pub use media::{HttpMediaStore, MediaStore};
pub use ner::{EntityLabel, EntitySpan, HttpNerService, NerService};
pub use ocr::{HttpOcrEngine, OcrEngine, OcrExtraction, OcrRegion};
pub use vision::{HttpVisionAnalyzer, VisionAnalyzer};
