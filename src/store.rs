use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::record::RoomRecord;

const ACCESS_KEY_HEADER: &str = "X-Master-Key";
const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Backing document store. It only knows how to hand out the latest record
/// and how to replace it wholesale.
pub trait RecordStore: Send + Sync {
    fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError>;
    fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError>;

    /// Block until every accepted write has reached the backing store and
    /// report whether the last one landed. Synchronous stores have nothing
    /// to wait for.
    fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    /// Failure of the most recent write that completed after `replace`
    /// returned, if it failed. Does not block.
    fn last_write_error(&self) -> Option<String> {
        None
    }
}

/// JSONBin-style HTTP document store.
#[derive(Debug, Clone)]
pub struct JsonBinStore {
    client: Client,
    bin_url: String,
    access_key: String,
}

impl JsonBinStore {
    pub fn new(base_url: &str, bin_id: &str, access_key: &str) -> Result<Self, PersistenceError> {
        if base_url.trim().is_empty() {
            return Err(PersistenceError::NotConfigured("missing store url"));
        }
        if bin_id.trim().is_empty() {
            return Err(PersistenceError::NotConfigured("missing bin id"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, base_url, bin_id, access_key))
    }

    fn with_client(client: Client, base_url: &str, bin_id: &str, access_key: &str) -> Self {
        Self {
            client,
            bin_url: bin_url(base_url, bin_id),
            access_key: access_key.to_string(),
        }
    }
}

fn bin_url(base_url: &str, bin_id: &str) -> String {
    format!("{}/{}", base_url.trim().trim_end_matches('/'), bin_id.trim())
}

/// The read endpoint wraps the document as `{"record": ...}`.
fn unwrap_envelope(body: &Value) -> RoomRecord {
    RoomRecord::from_value(body.get("record").unwrap_or(body))
}

impl RecordStore for JsonBinStore {
    fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError> {
        let url = format!("{}/latest", self.bin_url);
        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .send()?;
        if !resp.status().is_success() {
            return Err(PersistenceError::Http(resp.status().as_u16()));
        }
        let body: Value = resp.json()?;
        Ok(unwrap_envelope(&body))
    }

    fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        debug!("PUT {}", self.bin_url);
        let resp = self
            .client
            .put(&self.bin_url)
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .json(record)
            .send()?;
        if !resp.status().is_success() {
            return Err(PersistenceError::Http(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Keeps the record in a local JSON file. A missing file reads as an empty
/// record.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl RecordStore for FileRecordStore {
    fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(RoomRecord::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RoomRecord::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(record)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    document: Value,
    writes: Vec<RoomRecord>,
    offline: bool,
}

/// In-process store, cloneable so a test can keep a handle and inspect the
/// writes the engine issued.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw document, as the remote side would hold it.
    pub fn with_document(document: Value) -> Self {
        let store = Self::default();
        store.lock().document = document;
        store
    }

    /// Every record written so far, oldest first.
    pub fn writes(&self) -> Vec<RoomRecord> {
        self.lock().writes.clone()
    }

    pub fn document(&self) -> Value {
        self.lock().document.clone()
    }

    /// While offline every read and write fails.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn offline_error() -> PersistenceError {
    io::Error::new(io::ErrorKind::ConnectionRefused, "store offline").into()
}

impl RecordStore for MemoryStore {
    fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError> {
        let state = self.lock();
        if state.offline {
            return Err(offline_error());
        }
        Ok(RoomRecord::from_value(&state.document))
    }

    fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.document = serde_json::to_value(record)?;
        state.writes.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WriterState {
    /// Snapshots accepted by `replace` and not yet written or superseded.
    pending: usize,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct WriterShared {
    state: Mutex<WriterState>,
    drained: Condvar,
}

impl WriterShared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_drained(&self) -> MutexGuard<'_, WriterState> {
        let state = self.lock();
        self.drained
            .wait_while(state, |s| s.pending > 0)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands writes to a worker thread so callers never wait on the backing
/// store. Snapshots queued while a write is in flight collapse into the most
/// recent one. The outcome of the last write is kept for
/// [`RecordStore::last_write_error`] and [`RecordStore::flush`].
///
/// Reads wait for queued writes to land first, so a fetch never returns a
/// record older than what was handed to `replace`. Dropping the wrapper also
/// waits for them.
pub struct BackgroundStore<S: RecordStore + 'static> {
    inner: Arc<S>,
    shared: Arc<WriterShared>,
    tx: Option<Sender<RoomRecord>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: RecordStore + 'static> BackgroundStore<S> {
    pub fn new(inner: S) -> Self {
        let inner = Arc::new(inner);
        let shared = Arc::new(WriterShared::default());
        let (tx, rx) = mpsc::channel::<RoomRecord>();
        let writer = Arc::clone(&inner);
        let status = Arc::clone(&shared);

        let worker = thread::spawn(move || {
            while let Ok(mut record) = rx.recv() {
                let mut taken = 1;
                while let Ok(newer) = rx.try_recv() {
                    record = newer;
                    taken += 1;
                }
                let outcome = writer.replace(&record);

                let mut state = status.lock();
                match outcome {
                    Ok(()) => {
                        debug!("record written");
                        state.failure = None;
                    }
                    Err(err) => {
                        warn!("record write failed, remote copy is stale: {}", err);
                        state.failure = Some(err.to_string());
                    }
                }
                state.pending = state.pending.saturating_sub(taken);
                if state.pending == 0 {
                    status.drained.notify_all();
                }
            }
            info!("background writer stopped");
        });

        Self {
            inner,
            shared,
            tx: Some(tx),
            worker: Some(worker),
        }
    }
}

impl<S: RecordStore + 'static> RecordStore for BackgroundStore<S> {
    fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError> {
        drop(self.shared.wait_drained());
        self.inner.fetch_latest()
    }

    fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
        let tx = self.tx.as_ref().ok_or(PersistenceError::WriterClosed)?;
        self.shared.lock().pending += 1;
        if tx.send(record.clone()).is_err() {
            let mut state = self.shared.lock();
            state.pending = state.pending.saturating_sub(1);
            return Err(PersistenceError::WriterClosed);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        match &self.shared.wait_drained().failure {
            Some(reason) => Err(PersistenceError::Background(reason.clone())),
            None => Ok(()),
        }
    }

    fn last_write_error(&self) -> Option<String> {
        self.shared.lock().failure.clone()
    }
}

impl<S: RecordStore + 'static> Drop for BackgroundStore<S> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("background writer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DayKey;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use tempfile::tempdir;

    fn booked_record(time: &str) -> RoomRecord {
        let mut record = RoomRecord::default();
        let day: DayKey = "2024-06-01".parse().unwrap();
        record.bookings.reserve(day, time, &["Alice"]).unwrap();
        record
    }

    #[test]
    fn bin_url_joins_cleanly() {
        assert_eq!(bin_url("https://api.jsonbin.io/v3/b/", "abc"), "https://api.jsonbin.io/v3/b/abc");
        assert_eq!(bin_url("https://api.jsonbin.io/v3/b", " abc "), "https://api.jsonbin.io/v3/b/abc");
    }

    #[test]
    fn envelope_is_unwrapped() {
        let body = json!({
            "record": { "scores": [], "bookings": { "2024-06-01": [{ "time": "10:00", "name": "A" }] } },
            "metadata": { "id": "abc", "private": true }
        });
        let record = unwrap_envelope(&body);
        assert_eq!(record.bookings.days().count(), 1);

        let bare = json!({ "scores": [{ "name": "A", "result": "Won" }] });
        assert_eq!(unwrap_envelope(&bare).scores.len(), 1);
    }

    #[test]
    fn unconfigured_remote_store_is_refused() {
        assert_matches!(
            JsonBinStore::new("https://api.jsonbin.io/v3/b", "", "key"),
            Err(PersistenceError::NotConfigured(_))
        );
        assert_matches!(JsonBinStore::new("", "abc", "key"), Err(PersistenceError::NotConfigured(_)));
    }

    #[test]
    fn file_store_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let store = FileRecordStore::with_path(dir.path().join("room.json"));
        assert_eq!(store.fetch_latest().unwrap(), RoomRecord::default());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileRecordStore::with_path(dir.path().join("nested").join("room.json"));
        let record = booked_record("10:00");
        store.replace(&record).unwrap();
        assert_eq!(store.fetch_latest().unwrap(), record);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("room.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = FileRecordStore::with_path(&path);
        assert_matches!(store.fetch_latest(), Err(PersistenceError::Decode(_)));
    }

    #[test]
    fn memory_store_offline_fails_both_ways() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert_matches!(store.fetch_latest(), Err(PersistenceError::Io(_)));
        assert_matches!(store.replace(&RoomRecord::default()), Err(PersistenceError::Io(_)));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn background_store_flushes_on_drop() {
        let memory = MemoryStore::new();
        let background = BackgroundStore::new(memory.clone());
        background.replace(&booked_record("10:00")).unwrap();
        background.replace(&booked_record("10:15")).unwrap();
        drop(background);

        let writes = memory.writes();
        assert!(!writes.is_empty() && writes.len() <= 2);
        assert_eq!(writes.last(), Some(&booked_record("10:15")));
    }

    #[test]
    fn background_store_reports_failed_writes() {
        let memory = MemoryStore::new();
        memory.set_offline(true);
        let background = BackgroundStore::new(memory.clone());
        assert!(background.replace(&booked_record("10:00")).is_ok());
        assert_matches!(background.flush(), Err(PersistenceError::Background(_)));
        assert!(background.last_write_error().is_some());
        assert!(memory.writes().is_empty());

        memory.set_offline(false);
        background.replace(&booked_record("10:15")).unwrap();
        background.flush().unwrap();
        assert_eq!(background.last_write_error(), None);
        assert_eq!(memory.writes(), vec![booked_record("10:15")]);
    }

    #[test]
    fn background_store_reads_through() {
        let memory = MemoryStore::with_document(json!({ "scores": [{ "name": "A", "result": "Won" }] }));
        let background = BackgroundStore::new(memory);
        assert_eq!(background.fetch_latest().unwrap().scores.len(), 1);
    }

    /// Takes its time over every write, like a slow network.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl RecordStore for SlowStore {
        fn fetch_latest(&self) -> Result<RoomRecord, PersistenceError> {
            self.inner.fetch_latest()
        }

        fn replace(&self, record: &RoomRecord) -> Result<(), PersistenceError> {
            thread::sleep(self.delay);
            self.inner.replace(record)
        }
    }

    #[test]
    fn background_store_reads_wait_for_queued_writes() {
        let memory = MemoryStore::new();
        let background = BackgroundStore::new(SlowStore {
            inner: memory.clone(),
            delay: Duration::from_millis(200),
        });
        background.replace(&booked_record("10:00")).unwrap();
        assert_eq!(background.fetch_latest().unwrap(), booked_record("10:00"));
        assert_eq!(memory.writes().len(), 1);
    }

    // A one-shot HTTP server: answers a single request with `status` and
    // `body`, and hands back the raw request it saw.
    fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (format!("http://{}/v3/b", addr), handle)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.is_empty() || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        head + "\r\n" + &String::from_utf8_lossy(&body)
    }

    fn local_store(base_url: &str) -> JsonBinStore {
        let client = Client::builder().no_proxy().build().unwrap();
        JsonBinStore::with_client(client, base_url, "room-1", "secret")
    }

    #[test]
    fn remote_fetch_gets_latest_with_access_key() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"record":{"scores":[{"name":"Alice","result":"Won"}],"bookings":{}},"metadata":{"id":"room-1"}}"#,
        );
        let record = local_store(&url).fetch_latest().unwrap();
        assert_eq!(record.scores.len(), 1);

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /v3/b/room-1/latest HTTP/1.1"), "{request}");
        assert!(request.to_ascii_lowercase().contains("x-master-key: secret"), "{request}");
    }

    #[test]
    fn remote_replace_puts_whole_record() {
        let (url, server) = serve_once("200 OK", "{}");
        local_store(&url).replace(&booked_record("10:00")).unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("PUT /v3/b/room-1 HTTP/1.1"), "{request}");
        assert!(request.to_ascii_lowercase().contains("x-master-key: secret"), "{request}");
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));

        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["bookings"]["2024-06-01"][0]["name"], "Alice");
        assert_eq!(sent["scores"], json!([]));
    }

    #[test]
    fn remote_error_status_is_reported() {
        let (url, server) = serve_once("401 Unauthorized", r#"{"message":"bad key"}"#);
        assert_matches!(local_store(&url).fetch_latest(), Err(PersistenceError::Http(401)));
        server.join().unwrap();

        let (url, server) = serve_once("500 Internal Server Error", "{}");
        assert_matches!(
            local_store(&url).replace(&RoomRecord::default()),
            Err(PersistenceError::Http(500))
        );
        server.join().unwrap();
    }
}
