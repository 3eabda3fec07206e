pub mod columns;
pub mod field_parser;
pub mod record_normalizer;
pub mod timestamp;

pub use columns::{Column, ColumnMap};
pub use record_normalizer::{
    normalize_document, DocumentParseError, NormalizedDocument, NormalizedRow,
    ReadingConventions, RecordNormalizer, RowOutcome, SkipReason,
};
pub use timestamp::{MalformedTimestamp, TimeNormalizer};
