pub mod aggregate;
pub mod bucket;
pub mod buffer;
mod collector;
mod error;
pub mod flush;
pub mod link;
pub mod observation;
pub mod reader;
pub mod settings;
pub mod store;

pub use aggregate::Summary;
pub use buffer::Admission;
pub use collector::{Collector, CollectorOptions};
pub use error::{AggregationError, Error, Result};
pub use link::LinkId;
pub use observation::RawObservation;
