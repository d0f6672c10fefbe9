//! Core types for the `fieldlog` crate.
//!
//! Farmers report field activity over WhatsApp as text or voice notes. A
//! language model extracts structured records from each message; the
//! conversation engine in this crate decides whether a turn continues the
//! farmer's open record or starts a new one, merges partial data across
//! turns, and confirms a record once every required field is filled.

pub mod channel;
pub mod completeness;
pub mod config;
pub mod daemon;
pub mod extract;
pub mod lifecycle;
pub mod llm;
pub mod merge;
pub mod record;
pub mod reply;
pub mod router;
pub mod schema;
pub mod store;
pub mod transcribe;

pub use channel::{Channel, IncomingMessage, TwilioChannel};
pub use completeness::{Completeness, OCCURRED_AT_FIELD, evaluate};
pub use config::Settings;
pub use extract::{ExistingRecordContext, ExtractionRequest, Extractor, LlmExtractor};
pub use lifecycle::{Logbook, NewRecord, TurnOutcome};
pub use llm::{ChatModel, OllamaChat, ScriptedChat};
pub use merge::{apply_followup, merge_data, merge_transcript};
pub use record::{
    Candidate, Farmer, MessageDirection, Quality, Record, RecordType, SourceInfo, StoredMessage,
};
pub use reply::{ReplyContext, ReplyPlan, plan_reply};
pub use router::{RouteDecision, route};
pub use schema::required_fields;
pub use store::{FileStore, InMemoryStore, RecordFilter, RecordStore};
pub use transcribe::{Transcriber, Transcription, WhisperHttp};
