pub mod engine;
pub mod parser;
pub mod types;

pub use engine::{derive_seed, expand, ContentLibrary};
pub use parser::{load_schedule_file, parse_duration, parse_schedule_str, ScheduleParseError};
pub use types::{ContentOrder, ContentRef, ParsedSchedule, PlayoutItem, PlayoutItemKind, SequenceOp};
