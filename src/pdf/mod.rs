pub mod resolver;
pub mod trust;

pub use resolver::{ExternalIds, PdfHints, PdfUrlResolver};
pub use trust::TrustPolicy;
