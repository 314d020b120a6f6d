pub mod detector;
pub mod fingerprint;
pub mod tag;
pub mod types;

pub use detector::{ChangeDetector, Cycle, DetectorState};
pub use fingerprint::{fingerprint, Fingerprint};
pub use tag::{expand, TagTemplate};
pub use types::{ChangeEvent, ChangeOperation, PrimaryKey, Row, Value};
