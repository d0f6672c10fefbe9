use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::trace;
use uuid::Uuid;

use crate::record::{Farmer, Record, RecordType, StoredMessage};

/// Filters for the record listing query. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub farmer_id: Option<Uuid>,
    pub record_type: Option<RecordType>,
    pub needs_followup: Option<bool>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub offset: usize,
    /// Zero means no limit.
    pub limit: usize,
}

impl RecordFilter {
    fn matches(&self, record: &Record) -> bool {
        if self.farmer_id.is_some_and(|id| id != record.farmer_id) {
            return false;
        }
        if self.record_type.is_some_and(|ty| ty != record.record_type) {
            return false;
        }
        if self
            .needs_followup
            .is_some_and(|nf| nf != record.needs_followup)
        {
            return false;
        }
        if let Some(from) = self.date_from {
            if record.occurred_at.is_none_or(|d| d < from) {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if record.occurred_at.is_none_or(|d| d > to) {
                return false;
            }
        }
        true
    }
}

/// Durable storage for farmer, message and record entities.
///
/// Implementations must keep `Farmer::external_id` and
/// `StoredMessage::provider_sid` unique.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_farmer(&self, farmer: &Farmer) -> anyhow::Result<()>;
    async fn update_farmer(&self, farmer: &Farmer) -> anyhow::Result<()>;
    async fn farmer(&self, id: Uuid) -> anyhow::Result<Option<Farmer>>;
    async fn farmer_by_external_id(&self, external_id: &str) -> anyhow::Result<Option<Farmer>>;
    /// Substring search over name and external id, oldest first.
    async fn list_farmers(&self, search: Option<&str>) -> anyhow::Result<Vec<Farmer>>;

    /// Insert a message. Returns `false` without writing when a message with
    /// the same provider sid already exists, making webhook replays no-ops.
    async fn insert_message(&self, message: &StoredMessage) -> anyhow::Result<bool>;
    async fn mark_processed(&self, message_id: Uuid) -> anyhow::Result<()>;

    async fn insert_record(&self, record: &Record) -> anyhow::Result<()>;
    async fn update_record(&self, record: &Record) -> anyhow::Result<()>;
    async fn record(&self, id: Uuid) -> anyhow::Result<Option<Record>>;
    /// Filtered listing, newest created first.
    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>>;
    /// The farmer's most recently created record that is unconfirmed and
    /// awaiting follow-up. This is the continuation target for routing.
    async fn latest_open_record(&self, farmer_id: Uuid) -> anyhow::Result<Option<Record>>;
}

fn sort_newest_first(records: &mut [Record]) {
    records.sort_by_key(|r| std::cmp::Reverse(r.created_at));
}

fn apply_page(records: Vec<Record>, offset: usize, limit: usize) -> Vec<Record> {
    let iter = records.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}

fn farmer_matches(farmer: &Farmer, search: Option<&str>) -> bool {
    match search {
        Some(needle) => {
            let needle = needle.to_lowercase();
            farmer.name.to_lowercase().contains(&needle)
                || farmer.external_id.to_lowercase().contains(&needle)
        }
        None => true,
    }
}

/// Volatile store mimicking the durable API. Used in tests and as the
/// reference semantics for [`FileStore`].
#[derive(Default)]
pub struct InMemoryStore {
    farmers: Mutex<HashMap<Uuid, Farmer>>,
    messages: Mutex<HashMap<Uuid, StoredMessage>>,
    records: Mutex<HashMap<Uuid, Record>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_farmer(&self, farmer: &Farmer) -> anyhow::Result<()> {
        let mut farmers = self.farmers.lock().unwrap();
        if farmers
            .values()
            .any(|f| f.external_id == farmer.external_id)
        {
            return Err(anyhow!(
                "farmer with external id {} already exists",
                farmer.external_id
            ));
        }
        farmers.insert(farmer.id, farmer.clone());
        Ok(())
    }

    async fn update_farmer(&self, farmer: &Farmer) -> anyhow::Result<()> {
        let mut farmers = self.farmers.lock().unwrap();
        if !farmers.contains_key(&farmer.id) {
            return Err(anyhow!("farmer not found"));
        }
        farmers.insert(farmer.id, farmer.clone());
        Ok(())
    }

    async fn farmer(&self, id: Uuid) -> anyhow::Result<Option<Farmer>> {
        Ok(self.farmers.lock().unwrap().get(&id).cloned())
    }

    async fn farmer_by_external_id(&self, external_id: &str) -> anyhow::Result<Option<Farmer>> {
        Ok(self
            .farmers
            .lock()
            .unwrap()
            .values()
            .find(|f| f.external_id == external_id)
            .cloned())
    }

    async fn list_farmers(&self, search: Option<&str>) -> anyhow::Result<Vec<Farmer>> {
        let mut farmers: Vec<_> = self
            .farmers
            .lock()
            .unwrap()
            .values()
            .filter(|f| farmer_matches(f, search))
            .cloned()
            .collect();
        farmers.sort_by_key(|f| f.created_at);
        Ok(farmers)
    }

    async fn insert_message(&self, message: &StoredMessage) -> anyhow::Result<bool> {
        let mut messages = self.messages.lock().unwrap();
        if messages
            .values()
            .any(|m| m.provider_sid == message.provider_sid)
        {
            return Ok(false);
        }
        messages.insert(message.id, message.clone());
        Ok(true)
    }

    async fn mark_processed(&self, message_id: Uuid) -> anyhow::Result<()> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .get_mut(&message_id)
            .ok_or_else(|| anyhow!("message not found"))?;
        message.processed = true;
        Ok(())
    }

    async fn insert_record(&self, record: &Record) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn update_record(&self, record: &Record) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(&record.id) {
            return Err(anyhow!("record not found"));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn record(&self, id: Uuid) -> anyhow::Result<Option<Record>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(apply_page(records, filter.offset, filter.limit))
    }

    async fn latest_open_record(&self, farmer_id: Uuid) -> anyhow::Result<Option<Record>> {
        let mut open: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.farmer_id == farmer_id && r.is_open())
            .cloned()
            .collect();
        sort_newest_first(&mut open);
        Ok(open.into_iter().next())
    }
}

#[cfg(test)]
impl InMemoryStore {
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn messages_snapshot(&self) -> Vec<StoredMessage> {
        self.messages.lock().unwrap().values().cloned().collect()
    }
}

#[derive(Default)]
struct FileState {
    farmers: HashMap<Uuid, Farmer>,
    messages: HashMap<Uuid, StoredMessage>,
    records: HashMap<Uuid, Record>,
}

/// Append-only JSONL store. One file per entity kind under `dir`; every
/// insert or update appends the full entity, and the newest line per id wins
/// on reload.
pub struct FileStore {
    dir: PathBuf,
    state: tokio::sync::Mutex<FileState>,
}

impl FileStore {
    /// Open a store rooted at `dir`, replaying any existing log files.
    pub async fn open(dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating store dir {}", dir.display()))?;
        let mut state = FileState::default();
        for line in read_lines(&dir.join("farmers.jsonl")).await? {
            if let Ok(farmer) = serde_json::from_str::<Farmer>(&line) {
                state.farmers.insert(farmer.id, farmer);
            }
        }
        for line in read_lines(&dir.join("messages.jsonl")).await? {
            if let Ok(message) = serde_json::from_str::<StoredMessage>(&line) {
                state.messages.insert(message.id, message);
            }
        }
        for line in read_lines(&dir.join("records.jsonl")).await? {
            if let Ok(record) = serde_json::from_str::<Record>(&line) {
                state.records.insert(record.id, record);
            }
        }
        Ok(Self {
            dir,
            state: tokio::sync::Mutex::new(state),
        })
    }

    async fn append<T: Serialize>(&self, kind: &str, entity: &T) -> anyhow::Result<()> {
        let path = self.dir.join(format!("{kind}.jsonl"));
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await?;
        let line = serde_json::to_string(entity)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        trace!(kind, "appended entity");
        Ok(())
    }
}

async fn read_lines(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(data.lines().map(str::to_owned).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn insert_farmer(&self, farmer: &Farmer) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state
            .farmers
            .values()
            .any(|f| f.external_id == farmer.external_id)
        {
            return Err(anyhow!(
                "farmer with external id {} already exists",
                farmer.external_id
            ));
        }
        self.append("farmers", farmer).await?;
        state.farmers.insert(farmer.id, farmer.clone());
        Ok(())
    }

    async fn update_farmer(&self, farmer: &Farmer) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.farmers.contains_key(&farmer.id) {
            return Err(anyhow!("farmer not found"));
        }
        self.append("farmers", farmer).await?;
        state.farmers.insert(farmer.id, farmer.clone());
        Ok(())
    }

    async fn farmer(&self, id: Uuid) -> anyhow::Result<Option<Farmer>> {
        Ok(self.state.lock().await.farmers.get(&id).cloned())
    }

    async fn farmer_by_external_id(&self, external_id: &str) -> anyhow::Result<Option<Farmer>> {
        Ok(self
            .state
            .lock()
            .await
            .farmers
            .values()
            .find(|f| f.external_id == external_id)
            .cloned())
    }

    async fn list_farmers(&self, search: Option<&str>) -> anyhow::Result<Vec<Farmer>> {
        let state = self.state.lock().await;
        let mut farmers: Vec<_> = state
            .farmers
            .values()
            .filter(|f| farmer_matches(f, search))
            .cloned()
            .collect();
        farmers.sort_by_key(|f| f.created_at);
        Ok(farmers)
    }

    async fn insert_message(&self, message: &StoredMessage) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state
            .messages
            .values()
            .any(|m| m.provider_sid == message.provider_sid)
        {
            return Ok(false);
        }
        self.append("messages", message).await?;
        state.messages.insert(message.id, message.clone());
        Ok(true)
    }

    async fn mark_processed(&self, message_id: Uuid) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let mut message = state
            .messages
            .get(&message_id)
            .cloned()
            .ok_or_else(|| anyhow!("message not found"))?;
        message.processed = true;
        self.append("messages", &message).await?;
        state.messages.insert(message_id, message);
        Ok(())
    }

    async fn insert_record(&self, record: &Record) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        self.append("records", record).await?;
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_record(&self, record: &Record) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&record.id) {
            return Err(anyhow!("record not found"));
        }
        self.append("records", record).await?;
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn record(&self, id: Uuid) -> anyhow::Result<Option<Record>> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(apply_page(records, filter.offset, filter.limit))
    }

    async fn latest_open_record(&self, farmer_id: Uuid) -> anyhow::Result<Option<Record>> {
        let state = self.state.lock().await;
        let mut open: Vec<_> = state
            .records
            .values()
            .filter(|r| r.farmer_id == farmer_id && r.is_open())
            .cloned()
            .collect();
        sort_newest_first(&mut open);
        Ok(open.into_iter().next())
    }
}
