//! Append-only, time-indexed datagram container.

pub mod config;
pub mod index;
pub mod io;
pub mod layout;
pub mod rate;
pub mod reader;
pub mod record;
pub mod types;
pub mod writer;


pub use config::{ReaderOptions, TimelineConfig, WriterOptions};
pub use index::{Checkpoint, Index};
pub use io::{FileSource, MappedSource, PositionalRead};
pub use rate::RateAdapter;
pub use reader::{Cursor, Datagrams, RangeQuery, RangeRead, TimelineInfo, TimelineReader};
pub use record::{Datagram, RECORD_HEADER_SIZE};
pub use types::*;
pub use writer::{TimelineWriter, WriterSummary};
