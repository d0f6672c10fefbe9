use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::{Channel, IncomingMessage};
use crate::completeness::evaluate;
use crate::extract::{ExistingRecordContext, ExtractionRequest, Extractor};
use crate::llm::ChatModel;
use crate::merge::apply_followup;
use crate::record::{Candidate, Farmer, Record, RecordType, SourceInfo, StoredMessage, parse_occurred_at};
use crate::reply::{self, APOLOGY_DOWNLOAD, APOLOGY_TRANSCRIPTION, ReplyPlan};
use crate::router::{RouteDecision, route};
use crate::store::RecordStore;
use crate::transcribe::Transcriber;

/// Result of processing one inbound message.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The record created or updated this turn, if any.
    pub record: Option<Record>,
    /// True when the turn created a new record rather than continuing one.
    pub created: bool,
    /// Text sent back to the farmer.
    pub reply: String,
}

/// Input for manually creating a record outside the message flow.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub farmer_id: Uuid,
    pub record_type: RecordType,
    pub occurred_at: Option<NaiveDate>,
    pub data: Map<String, Value>,
    pub source: SourceInfo,
    pub confidence: f32,
    pub quality_notes: Option<String>,
    pub raw_transcript: String,
}

/// Orchestrates one inbound message end-to-end: farmer resolution, message
/// persistence, transcription, extraction, routing, merge, completeness and
/// the reply hand-off.
///
/// All collaborators are injected once at construction and shared across
/// turns. Turns for the same farmer are serialized by a per-farmer lock, so
/// the open-record read-then-write sequence cannot race; different farmers
/// proceed in parallel.
pub struct Logbook {
    store: Arc<dyn RecordStore>,
    extractor: Arc<dyn Extractor>,
    transcriber: Arc<dyn Transcriber>,
    channel: Arc<dyn Channel>,
    chat: Arc<dyn ChatModel>,
    farmer_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Logbook {
    pub fn new(
        store: Arc<dyn RecordStore>,
        extractor: Arc<dyn Extractor>,
        transcriber: Arc<dyn Transcriber>,
        channel: Arc<dyn Channel>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            extractor,
            transcriber,
            channel,
            chat,
            farmer_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Access the underlying store, e.g. for operator queries.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    async fn farmer_lock(&self, external_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.farmer_locks.lock().await;
        locks
            .entry(external_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn resolve_farmer(&self, incoming: &IncomingMessage) -> anyhow::Result<Farmer> {
        if let Some(farmer) = self.store.farmer_by_external_id(&incoming.from).await? {
            return Ok(farmer);
        }
        let name = incoming
            .profile_name
            .clone()
            .unwrap_or_else(|| incoming.from.clone());
        let farmer = Farmer::new(&incoming.from, name);
        self.store.insert_farmer(&farmer).await?;
        info!(external_id = %farmer.external_id, "created new farmer");
        Ok(farmer)
    }

    async fn send_reply(&self, farmer: &Farmer, text: &str) {
        self.channel.send(&farmer.external_id, text).await;
        let outbound = StoredMessage::outbound(farmer.id, text);
        if let Err(e) = self.store.insert_message(&outbound).await {
            warn!(?e, "failed to log outbound message");
        }
    }

    /// Degrade a failed provider call to a canned apology. The inbound
    /// message is still marked processed so replays do not loop.
    async fn degrade(
        &self,
        farmer: &Farmer,
        message: &StoredMessage,
        apology: &'static str,
    ) -> anyhow::Result<TurnOutcome> {
        self.store.mark_processed(message.id).await?;
        self.send_reply(farmer, apology).await;
        Ok(TurnOutcome {
            record: None,
            created: false,
            reply: apology.to_owned(),
        })
    }

    /// Process one inbound message end-to-end and reply to the farmer.
    ///
    /// Returns `None` for turns that produce no reply: replayed provider
    /// sids and messages without usable content.
    pub async fn handle_inbound(
        &self,
        incoming: IncomingMessage,
    ) -> anyhow::Result<Option<TurnOutcome>> {
        let lock = self.farmer_lock(&incoming.from).await;
        let _guard = lock.lock().await;

        let farmer = self.resolve_farmer(&incoming).await?;

        let mut message = StoredMessage::inbound(farmer.id, &incoming.sid);
        message.body = incoming.body.clone();
        message.media_url = incoming.media_url.clone();
        if !self.store.insert_message(&message).await? {
            info!(sid = %incoming.sid, "duplicate provider sid, ignoring replay");
            return Ok(None);
        }

        let mut input_mode = "text";
        let transcript = if incoming.is_voice() && incoming.media_url.is_some() {
            input_mode = "voice";
            let media_url = incoming.media_url.as_deref().unwrap_or_default();
            let audio = match self.channel.download_media(media_url).await {
                Ok(audio) => audio,
                Err(e) => {
                    warn!(?e, "failed to download voice media");
                    return self.degrade(&farmer, &message, APOLOGY_DOWNLOAD).await.map(Some);
                }
            };
            match self.transcriber.transcribe(&audio, None).await {
                Ok(transcription) => {
                    info!(chars = transcription.text.len(), "voice message transcribed");
                    transcription.text
                }
                Err(e) => {
                    warn!(?e, "transcription failed");
                    return self
                        .degrade(&farmer, &message, APOLOGY_TRANSCRIPTION)
                        .await
                        .map(Some);
                }
            }
        } else if let Some(body) = incoming.body.as_deref().filter(|b| !b.is_empty()) {
            body.to_owned()
        } else {
            warn!(sid = %incoming.sid, "message carried no usable content");
            self.store.mark_processed(message.id).await?;
            return Ok(None);
        };

        let pending = self.store.latest_open_record(farmer.id).await?;
        if let Some(open) = &pending {
            info!(record = %open.id, "found open record, updating instead of creating");
        }
        let existing_record = pending.as_ref().map(|r| ExistingRecordContext {
            record_type: r.record_type,
            data: r.data.clone(),
            missing_fields: r.missing_fields.clone(),
            occurred_at: r.occurred_at_str(),
        });

        let request = ExtractionRequest {
            transcript: transcript.clone(),
            farmer_id: farmer.external_id.clone(),
            farmer_name: farmer.name.clone(),
            input_mode: input_mode.to_owned(),
            current_date: Utc::now().date_naive(),
            existing_record,
        };
        let candidates = match self.extractor.extract(&request).await {
            Ok(candidates) => candidates,
            Err(e) => {
                // Treated as zero candidates: the turn degrades to the
                // retry apology further down.
                warn!(?e, "extraction failed");
                Vec::new()
            }
        };

        let (record, created) = match route(pending, candidates) {
            RouteDecision::Continue {
                mut target,
                candidate,
            } => {
                apply_followup(&mut target, &candidate, &transcript);
                let verdict = evaluate(
                    target.record_type,
                    target.occurred_at_str().as_deref(),
                    &target.data,
                );
                target.needs_followup = verdict.needs_followup;
                target.confirmed = verdict.confirmable();
                target.missing_fields = verdict.missing_fields;
                self.store.update_record(&target).await?;
                info!(record = %target.id, confirmed = target.confirmed, "updated record");
                (Some(*target), false)
            }
            RouteDecision::Start { candidate } => {
                let record =
                    build_record(&farmer, Some(message.id), candidate, input_mode, &transcript);
                self.store.insert_record(&record).await?;
                info!(
                    record = %record.id,
                    record_type = record.record_type.as_str(),
                    needs_followup = record.needs_followup,
                    "created record"
                );
                (Some(record), true)
            }
            RouteDecision::Nothing => (None, false),
        };

        self.store.mark_processed(message.id).await?;

        let plan = reply::plan_reply(record.as_ref(), &farmer.name);
        if let ReplyPlan::Apology(_) = &plan {
            info!("no records extracted, sending retry apology");
        }
        let text = reply::generate(self.chat.as_ref(), &plan).await;
        self.send_reply(&farmer, &text).await;

        Ok(Some(TurnOutcome {
            record,
            created,
            reply: text,
        }))
    }

    /// Manually create a record for an existing farmer, outside the message
    /// flow. Fails without writing when the farmer does not exist.
    pub async fn create_record(&self, new: NewRecord) -> anyhow::Result<Record> {
        self.store
            .farmer(new.farmer_id)
            .await?
            .context("farmer not found")?;

        let occurred_str = new.occurred_at.map(|d| d.to_string());
        let verdict = evaluate(new.record_type, occurred_str.as_deref(), &new.data);
        let record = Record {
            id: Uuid::new_v4(),
            farmer_id: new.farmer_id,
            message_id: None,
            record_type: new.record_type,
            occurred_at: new.occurred_at,
            data: new.data,
            source: new.source,
            confidence: new.confidence,
            needs_followup: verdict.needs_followup,
            confirmed: verdict.confirmable(),
            missing_fields: verdict.missing_fields,
            quality_notes: new.quality_notes,
            raw_transcript: new.raw_transcript,
            created_at: Utc::now(),
        };
        self.store.insert_record(&record).await?;
        Ok(record)
    }
}

/// Build a fresh record from the first extracted candidate of a turn.
///
/// The server-side completeness verdict is unioned with the extractor's own
/// missing-field report; the follow-up flags derive from the union so they
/// stay consistent with `missing_fields`.
fn build_record(
    farmer: &Farmer,
    message_id: Option<Uuid>,
    candidate: Candidate,
    input_mode: &str,
    transcript: &str,
) -> Record {
    let occurred_at = parse_occurred_at(candidate.occurred_at.as_deref());
    let occurred_str = occurred_at.map(|d| d.to_string());
    let verdict = evaluate(candidate.record_type, occurred_str.as_deref(), &candidate.data);

    let mut missing_fields = verdict.missing_fields;
    for field in candidate.quality.missing_fields {
        if !missing_fields.contains(&field) {
            missing_fields.push(field);
        }
    }
    let needs_followup = !missing_fields.is_empty();

    let mut source = candidate.source;
    source.input_mode = input_mode.to_owned();

    Record {
        id: Uuid::new_v4(),
        farmer_id: farmer.id,
        message_id,
        record_type: candidate.record_type,
        occurred_at,
        data: candidate.data,
        source,
        confidence: candidate.quality.confidence,
        missing_fields,
        needs_followup,
        confirmed: !needs_followup,
        quality_notes: candidate.quality.notes,
        raw_transcript: transcript.to_owned(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedChat;
    use crate::record::{MessageDirection, Quality};
    use crate::reply::APOLOGY_NO_RECORDS;
    use crate::store::InMemoryStore;
    use crate::transcribe::{Transcriber, Transcription};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct StubExtractor {
        batches: StdMutex<VecDeque<anyhow::Result<Vec<Candidate>>>>,
    }

    impl StubExtractor {
        fn new(batches: impl IntoIterator<Item = anyhow::Result<Vec<Candidate>>>) -> Self {
            Self {
                batches: StdMutex::new(batches.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn extract(&self, _request: &ExtractionRequest) -> anyhow::Result<Vec<Candidate>> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct StubTranscriber {
        text: Option<String>,
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(
            &self,
            _audio: &[u8],
            _language_hint: Option<&str>,
        ) -> anyhow::Result<Transcription> {
            match &self.text {
                Some(text) => Ok(Transcription {
                    text: text.clone(),
                    language: Some("en".into()),
                    duration: Some(3.2),
                }),
                None => Err(anyhow::anyhow!("transcription backend offline")),
            }
        }
    }

    struct RecordingChannel {
        sent: StdMutex<Vec<(String, String)>>,
        media: Option<Vec<u8>>,
    }

    impl RecordingChannel {
        fn new(media: Option<Vec<u8>>) -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                media,
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        async fn send(&self, to: &str, body: &str) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_owned(), body.to_owned()));
            true
        }

        async fn download_media(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
            self.media
                .clone()
                .ok_or_else(|| anyhow::anyhow!("media gone"))
        }
    }

    fn irrigation_candidate(data: &[(&str, Value)], occurred_at: Option<&str>) -> Candidate {
        Candidate {
            record_type: RecordType::Irrigation,
            occurred_at: occurred_at.map(str::to_owned),
            source: SourceInfo {
                language: "en".into(),
                ..SourceInfo::default()
            },
            data: data
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
            quality: Quality {
                confidence: 0.9,
                ..Quality::default()
            },
        }
    }

    fn text_message(sid: &str, body: &str) -> IncomingMessage {
        IncomingMessage {
            sid: sid.into(),
            from: "whatsapp:+628123".into(),
            to: "whatsapp:+14155238886".into(),
            body: Some(body.into()),
            num_media: 0,
            media_url: None,
            media_content_type: None,
            profile_name: Some("Ana".into()),
        }
    }

    fn voice_message(sid: &str) -> IncomingMessage {
        IncomingMessage {
            sid: sid.into(),
            from: "whatsapp:+628123".into(),
            to: "whatsapp:+14155238886".into(),
            body: None,
            num_media: 1,
            media_url: Some("https://media.example/abc".into()),
            media_content_type: Some("audio/ogg".into()),
            profile_name: Some("Ana".into()),
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        channel: Arc<RecordingChannel>,
        logbook: Logbook,
    }

    fn harness(
        batches: Vec<anyhow::Result<Vec<Candidate>>>,
        transcriber: StubTranscriber,
        media: Option<Vec<u8>>,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let channel = Arc::new(RecordingChannel::new(media));
        let logbook = Logbook::new(
            store.clone(),
            Arc::new(StubExtractor::new(batches)),
            Arc::new(transcriber),
            channel.clone(),
            Arc::new(ScriptedChat::repeating("please tell me more")),
        );
        Harness {
            store,
            channel,
            logbook,
        }
    }

    fn inbound_messages(store: &InMemoryStore) -> Vec<StoredMessage> {
        store
            .messages_snapshot()
            .into_iter()
            .filter(|m| m.direction == MessageDirection::Inbound)
            .collect()
    }

    #[tokio::test]
    async fn text_turn_creates_record_and_replies() {
        let h = harness(
            vec![Ok(vec![irrigation_candidate(
                &[("crop", json!("tomato"))],
                Some("2026-08-01"),
            )])],
            StubTranscriber { text: None },
            None,
        );

        let outcome = h
            .logbook
            .handle_inbound(text_message("SM1", "watered the tomatoes yesterday"))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.created);
        let record = outcome.record.unwrap();
        assert_eq!(record.record_type, RecordType::Irrigation);
        assert!(record.needs_followup);
        assert!(record.missing_fields.contains(&"water_amount".to_owned()));
        assert_eq!(record.raw_transcript, "watered the tomatoes yesterday");
        assert_eq!(record.source.input_mode, "text");

        // Farmer created, inbound processed, reply sent and logged outbound.
        let farmer = h
            .store
            .farmer_by_external_id("whatsapp:+628123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(farmer.name, "Ana");
        assert!(inbound_messages(&h.store)[0].processed);
        assert_eq!(h.channel.sent().len(), 1);
        assert_eq!(h.channel.sent()[0].1, "please tell me more");
        assert_eq!(h.store.message_count(), 2);
    }

    #[tokio::test]
    async fn followup_turn_confirms_open_record() {
        let h = harness(
            vec![
                Ok(vec![irrigation_candidate(
                    &[
                        ("crop", json!("tomato")),
                        ("variety", json!("roma")),
                        ("plot_or_row", json!("3")),
                        ("rainfall", json!("none")),
                        ("farmer_perspective", json!("looked dry")),
                    ],
                    Some("2026-08-01"),
                )]),
                Ok(vec![irrigation_candidate(
                    &[("water_amount", json!("20 liters"))],
                    None,
                )]),
            ],
            StubTranscriber { text: None },
            None,
        );

        let first = h
            .logbook
            .handle_inbound(text_message("SM1", "watered plot 3 yesterday"))
            .await
            .unwrap()
            .unwrap();
        let first_record = first.record.unwrap();
        assert!(first.created);
        assert_eq!(first_record.missing_fields, vec!["water_amount"]);

        let second = h
            .logbook
            .handle_inbound(text_message("SM2", "about 20 liters"))
            .await
            .unwrap()
            .unwrap();
        assert!(!second.created);
        let updated = second.record.unwrap();
        assert_eq!(updated.id, first_record.id);
        assert!(updated.confirmed);
        assert!(!updated.needs_followup);
        assert!(updated.missing_fields.is_empty());
        assert_eq!(updated.data["water_amount"], json!("20 liters"));
        assert_eq!(updated.data["crop"], json!("tomato"));
        assert!(updated.raw_transcript.contains("---"));
        assert_eq!(h.store.record_count(), 1);
    }

    #[tokio::test]
    async fn two_candidates_without_open_record_create_one_record() {
        let h = harness(
            vec![Ok(vec![
                irrigation_candidate(&[("crop", json!("tomato"))], None),
                Candidate {
                    record_type: RecordType::ChemicalSpray,
                    occurred_at: None,
                    source: SourceInfo::default(),
                    data: Map::new(),
                    quality: Quality::default(),
                },
            ])],
            StubTranscriber { text: None },
            None,
        );

        let outcome = h
            .logbook
            .handle_inbound(text_message("SM1", "watered and sprayed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            outcome.record.unwrap().record_type,
            RecordType::Irrigation
        );
        assert_eq!(h.store.record_count(), 1);
    }

    #[tokio::test]
    async fn transcription_failure_degrades_to_apology() {
        let h = harness(
            vec![Ok(vec![irrigation_candidate(&[], None)])],
            StubTranscriber { text: None },
            Some(b"ogg bytes".to_vec()),
        );

        let outcome = h
            .logbook
            .handle_inbound(voice_message("SM1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.reply, APOLOGY_TRANSCRIPTION);
        assert!(outcome.record.is_none());
        assert_eq!(h.store.record_count(), 0);
        // Still marked processed so the webhook replay does not loop.
        assert!(inbound_messages(&h.store)[0].processed);
        assert_eq!(h.channel.sent()[0].1, APOLOGY_TRANSCRIPTION);
    }

    #[tokio::test]
    async fn media_download_failure_degrades_to_apology() {
        let h = harness(vec![], StubTranscriber { text: None }, None);

        let outcome = h
            .logbook
            .handle_inbound(voice_message("SM1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reply, APOLOGY_DOWNLOAD);
        assert!(inbound_messages(&h.store)[0].processed);
    }

    #[tokio::test]
    async fn voice_turn_records_voice_input_mode() {
        let h = harness(
            vec![Ok(vec![irrigation_candidate(&[("crop", json!("rice"))], None)])],
            StubTranscriber {
                text: Some("watered the rice".into()),
            },
            Some(b"ogg bytes".to_vec()),
        );

        let outcome = h
            .logbook
            .handle_inbound(voice_message("SM1"))
            .await
            .unwrap()
            .unwrap();
        let record = outcome.record.unwrap();
        assert_eq!(record.source.input_mode, "voice");
        assert_eq!(record.raw_transcript, "watered the rice");
    }

    #[tokio::test]
    async fn zero_candidates_sends_retry_apology() {
        let h = harness(vec![Ok(Vec::new())], StubTranscriber { text: None }, None);

        let outcome = h
            .logbook
            .handle_inbound(text_message("SM1", "hello?"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reply, APOLOGY_NO_RECORDS);
        assert!(outcome.record.is_none());
        assert!(inbound_messages(&h.store)[0].processed);
    }

    #[tokio::test]
    async fn extraction_failure_degrades_like_zero_candidates() {
        let h = harness(
            vec![Err(anyhow::anyhow!("provider unavailable"))],
            StubTranscriber { text: None },
            None,
        );

        let outcome = h
            .logbook
            .handle_inbound(text_message("SM1", "sprayed the field"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.reply, APOLOGY_NO_RECORDS);
        assert!(inbound_messages(&h.store)[0].processed);
        assert_eq!(h.store.record_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_sid_is_ignored() {
        let h = harness(
            vec![
                Ok(vec![irrigation_candidate(&[("crop", json!("tomato"))], None)]),
                Ok(vec![irrigation_candidate(&[("crop", json!("rice"))], None)]),
            ],
            StubTranscriber { text: None },
            None,
        );

        let first = h
            .logbook
            .handle_inbound(text_message("SM1", "watered the tomatoes"))
            .await
            .unwrap();
        assert!(first.is_some());

        let replay = h
            .logbook
            .handle_inbound(text_message("SM1", "watered the tomatoes"))
            .await
            .unwrap();
        assert!(replay.is_none());
        assert_eq!(h.store.record_count(), 1);
        assert_eq!(h.channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_processed_without_reply() {
        let h = harness(vec![], StubTranscriber { text: None }, None);
        let mut incoming = text_message("SM1", "");
        incoming.body = Some(String::new());

        let outcome = h.logbook.handle_inbound(incoming).await.unwrap();
        assert!(outcome.is_none());
        assert!(h.channel.sent().is_empty());
        assert!(inbound_messages(&h.store)[0].processed);
    }

    #[tokio::test]
    async fn manual_create_requires_existing_farmer() {
        let h = harness(vec![], StubTranscriber { text: None }, None);

        let missing = h
            .logbook
            .create_record(NewRecord {
                farmer_id: Uuid::new_v4(),
                record_type: RecordType::Irrigation,
                occurred_at: None,
                data: Map::new(),
                source: SourceInfo::default(),
                confidence: 0.0,
                quality_notes: None,
                raw_transcript: String::new(),
            })
            .await;
        assert!(missing.is_err());
        assert_eq!(h.store.record_count(), 0);

        let farmer = Farmer::new("whatsapp:+628123", "Ana");
        h.store.insert_farmer(&farmer).await.unwrap();
        let record = h
            .logbook
            .create_record(NewRecord {
                farmer_id: farmer.id,
                record_type: RecordType::Unknown,
                occurred_at: chrono::NaiveDate::from_ymd_opt(2026, 8, 1),
                data: Map::new(),
                source: SourceInfo::default(),
                confidence: 0.5,
                quality_notes: None,
                raw_transcript: "manual entry".into(),
            })
            .await
            .unwrap();
        assert!(record.confirmed);
        assert_eq!(h.store.record_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_turns_from_one_farmer_share_one_record() {
        let h = harness(
            vec![
                Ok(vec![irrigation_candidate(&[("crop", json!("tomato"))], None)]),
                Ok(vec![irrigation_candidate(&[("variety", json!("roma"))], None)]),
            ],
            StubTranscriber { text: None },
            None,
        );

        // Both turns race on the open-record lookup; the per-farmer lock
        // serializes them so the second merges instead of creating.
        let (a, b) = tokio::join!(
            h.logbook.handle_inbound(text_message("SM1", "watered the tomatoes")),
            h.logbook.handle_inbound(text_message("SM2", "they are romas")),
        );
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
        assert_eq!(h.store.record_count(), 1);

        let farmer = h
            .store
            .farmer_by_external_id("whatsapp:+628123")
            .await
            .unwrap()
            .unwrap();
        let open = h.store.latest_open_record(farmer.id).await.unwrap().unwrap();
        assert_eq!(open.data["crop"], json!("tomato"));
        assert_eq!(open.data["variety"], json!("roma"));
    }

    #[tokio::test]
    async fn extractor_reported_missing_fields_are_unioned() {
        let mut candidate = irrigation_candidate(
            &[
                ("crop", json!("tomato")),
                ("variety", json!("roma")),
                ("plot_or_row", json!("3")),
                ("water_amount", json!("20 liters")),
                ("rainfall", json!("none")),
                ("farmer_perspective", json!("fine")),
            ],
            Some("2026-08-01"),
        );
        candidate.quality.missing_fields = vec!["sprayer_condition".into()];
        let h = harness(vec![Ok(vec![candidate])], StubTranscriber { text: None }, None);

        let outcome = h
            .logbook
            .handle_inbound(text_message("SM1", "full report"))
            .await
            .unwrap()
            .unwrap();
        let record = outcome.record.unwrap();
        // The union keeps the extractor's doubt and the flags stay
        // consistent with missing_fields.
        assert_eq!(record.missing_fields, vec!["sprayer_condition"]);
        assert!(record.needs_followup);
        assert!(!record.confirmed);
    }
}
