mod records;
mod symbol;
mod timestamp;

pub use records::{MetalRateRecord, QuoteRecord, RawRecord};
pub use symbol::Symbol;
pub use timestamp::{format_date, parse_date, UtcDateTime};
