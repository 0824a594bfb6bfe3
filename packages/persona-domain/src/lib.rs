//! Pure pipeline logic: export parsing, conversation sampling, prompt formatting, the profile
//! schema, progress mapping and conversation chunking. Nothing in this crate performs I/O.

pub mod chunking;
pub mod conversation;
pub mod export;
pub mod profile;
pub mod progress;
pub mod prompt;
pub mod sampling;
pub mod time_serde;

pub use conversation::{ExportSummary, Message, ParsedConversation, Role};
pub use profile::{NOT_ENOUGH_DATA, ProfileSections, QuickPassResult};
pub use progress::{ProgressView, map_progress};
pub use sampling::{SampleParams, sample};
