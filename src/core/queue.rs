use crate::core::credential::SharedCredential;
use crate::core::error::UploadError;
use crate::core::events::QueueEvent;
use crate::core::model::*;
use crate::core::store::SqliteStore;
use crate::plugins::registry::{ByteTransport, ProgressFn, SessionNegotiator};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Ordered upload queue. Items go through negotiation and transport one at a
/// time, in enqueue order.
#[derive(Clone)]
pub struct UploadQueue {
    negotiator: Arc<dyn SessionNegotiator>,
    transport: Arc<dyn ByteTransport>,
    credential: Arc<SharedCredential>,
    ledger: Option<SqliteStore>,
    items: Arc<Mutex<Vec<QueueItem>>>,
    running: Arc<AtomicBool>,
    event_tx: broadcast::Sender<QueueEvent>,
}

/// Clears the running flag even if the pass is dropped mid-flight.
struct RunGuard<'a>(&'a UploadQueue);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.emit(QueueEvent::QueueRunning { running: false });
    }
}

impl UploadQueue {
    pub fn new(
        negotiator: Arc<dyn SessionNegotiator>,
        transport: Arc<dyn ByteTransport>,
        credential: Arc<SharedCredential>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        debug!(negotiator = negotiator.name(), transport = transport.name(), "upload queue created");
        Self {
            negotiator,
            transport,
            credential,
            ledger: None,
            items: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    pub fn with_ledger(mut self, ledger: SqliteStore) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, evt: QueueEvent) {
        let _ = self.event_tx.send(evt);
    }

    fn lock_items(items: &Mutex<Vec<QueueItem>>) -> MutexGuard<'_, Vec<QueueItem>> {
        items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_item<R>(&self, id: ItemId, f: impl FnOnce(&mut QueueItem) -> R) -> Option<R> {
        let mut items = Self::lock_items(&self.items);
        items.iter_mut().find(|it| it.id == id).map(f)
    }

    pub fn enqueue(&self, payload: FilePayload, visibility: Visibility) -> ItemId {
        let item = QueueItem::new(payload, visibility);
        let id = item.id;
        let evt = QueueEvent::ItemAdded {
            item_id: id,
            name: item.payload.name.clone(),
            size: item.payload.size,
            visibility,
        };
        Self::lock_items(&self.items).push(item);
        self.emit(evt);
        id
    }

    /// Adds local files; with `videos_only`, anything not typed `video/*` is dropped.
    /// Unreadable paths are reported and skipped.
    pub async fn enqueue_files(&self, paths: &[PathBuf], visibility: Visibility, videos_only: bool) -> Vec<ItemId> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            let payload = match FilePayload::from_path(path).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "cannot queue file");
                    self.emit(QueueEvent::Info {
                        scope: "enqueue".to_string(),
                        message: format!("cannot read {}: {:#}", path.display(), e),
                    });
                    continue;
                }
            };
            if videos_only && !payload.is_video() {
                warn!(path = %path.display(), "skipping non-video file");
                self.emit(QueueEvent::Info {
                    scope: "enqueue".to_string(),
                    message: format!("not a video, ignored: {}", path.display()),
                });
                continue;
            }
            ids.push(self.enqueue(payload, visibility));
        }
        ids
    }

    /// Only queued items can be removed.
    pub fn remove(&self, id: ItemId) -> bool {
        let removed = {
            let mut items = Self::lock_items(&self.items);
            match items.iter().position(|it| it.id == id && it.status == ItemStatus::Queued) {
                Some(idx) => {
                    items.remove(idx);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.emit(QueueEvent::ItemRemoved { item_id: id });
        }
        removed
    }

    pub fn set_visibility(&self, id: ItemId, visibility: Visibility) -> bool {
        let changed = self
            .with_item(id, |it| {
                if it.status != ItemStatus::Queued || it.visibility_locked {
                    return false;
                }
                it.visibility = visibility;
                true
            })
            .unwrap_or(false);
        if changed {
            self.emit(QueueEvent::VisibilityChanged { item_id: id, visibility });
        }
        changed
    }

    pub fn snapshot(&self) -> Vec<QueueItem> {
        Self::lock_items(&self.items).clone()
    }

    pub fn get(&self, id: ItemId) -> Option<QueueItem> {
        Self::lock_items(&self.items).iter().find(|it| it.id == id).cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `(done, total)`
    pub fn counts(&self) -> (usize, usize) {
        let items = Self::lock_items(&self.items);
        let done = items.iter().filter(|it| it.status == ItemStatus::Done).count();
        (done, items.len())
    }

    pub async fn can_start(&self) -> bool {
        let (_, total) = self.counts();
        total > 0 && !self.is_running() && self.credential.is_authorized().await
    }

    /// Runs every queued item in order. A second call while a pass is in
    /// progress returns immediately. Item failures are recorded, never returned.
    pub async fn start_all(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("start_all ignored: queue already running");
            return;
        }
        let _guard = RunGuard(self);
        self.emit(QueueEvent::QueueRunning { running: true });
        info!("upload pass started");

        while let Some(id) = self.next_queued() {
            self.process(id).await;
        }

        let (done, total) = self.counts();
        info!(done, total, "upload pass finished");
    }

    /// Re-queues an errored item and starts a pass. No-op while running.
    pub async fn retry(&self, id: ItemId) -> bool {
        if self.is_running() {
            return false;
        }
        let reset = self
            .with_item(id, |it| {
                if it.status != ItemStatus::Error {
                    return false;
                }
                it.status = ItemStatus::Queued;
                it.progress = 0.0;
                it.error_message = None;
                true
            })
            .unwrap_or(false);
        if !reset {
            return false;
        }

        self.emit(QueueEvent::ItemStatusChanged { item_id: id, status: ItemStatus::Queued });
        self.start_all().await;
        true
    }

    fn next_queued(&self) -> Option<ItemId> {
        Self::lock_items(&self.items)
            .iter()
            .find(|it| it.status == ItemStatus::Queued)
            .map(|it| it.id)
    }

    async fn process(&self, id: ItemId) {
        if self.skip_if_recorded(id).await {
            return;
        }

        let mut refreshed = false;
        let outcome = loop {
            let Some(req) = self.begin_attempt(id) else {
                return;
            };

            match self.attempt(&req).await {
                Ok(video) => break Ok((req, video)),
                Err(e) => {
                    let eligible = e.is_unauthorized() || self.signed_out(&e).await;
                    if refreshed || !eligible {
                        break Err(e);
                    }
                    refreshed = true;
                    warn!(item = %id, error = %e, "unauthorized, refreshing credential");
                    if let Err(refresh_err) = self.credential.refresh().await {
                        warn!(item = %id, error = %refresh_err, "credential refresh failed");
                        break Err(e);
                    }
                }
            }
        };

        match outcome {
            Ok((req, video)) => self.finish_done(req, video).await,
            Err(e) => self.finish_error(id, e),
        }
    }

    /// A missing token is refreshed the same way a rejected one is.
    async fn signed_out(&self, e: &UploadError) -> bool {
        matches!(e, UploadError::Authentication { retryable: false }) && !self.credential.is_authorized().await
    }

    /// Moves the item to `Uploading` with zeroed progress and returns what the
    /// plugins need. `None` if the item disappeared.
    fn begin_attempt(&self, id: ItemId) -> Option<UploadRequest> {
        let req = self.with_item(id, |it| {
            if !matches!(it.status, ItemStatus::Queued | ItemStatus::Uploading) {
                return None;
            }
            it.status = ItemStatus::Uploading;
            it.progress = 0.0;
            it.error_message = None;
            it.visibility_locked = true;
            Some(it.request())
        })??;
        self.emit(QueueEvent::ItemStatusChanged { item_id: id, status: ItemStatus::Uploading });
        self.emit(QueueEvent::Progress { item_id: id, sent: 0, total: req.payload.size, percent: 0.0 });
        Some(req)
    }

    async fn attempt(&self, req: &UploadRequest) -> Result<UploadedVideo, UploadError> {
        let token = self.credential.current().await;
        let session = self.negotiator.open(req, &token).await?;
        debug!(item = %req.item_id, %session, "upload session opened");
        self.transport.send(req, &session, self.progress_sink(req.item_id)).await
    }

    fn progress_sink(&self, id: ItemId) -> ProgressFn {
        let items = self.items.clone();
        let tx = self.event_tx.clone();
        Arc::new(move |sent: u64, total: u64| {
            let percent = if total == 0 {
                100.0
            } else {
                (sent as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
            };
            let applied = {
                let mut items = Self::lock_items(&items);
                match items.iter_mut().find(|it| it.id == id) {
                    Some(it) if it.status == ItemStatus::Uploading && percent > it.progress => {
                        it.progress = percent;
                        true
                    }
                    _ => false,
                }
            };
            if applied {
                let _ = tx.send(QueueEvent::Progress { item_id: id, sent, total, percent });
            }
        })
    }

    async fn finish_done(&self, req: UploadRequest, video: UploadedVideo) {
        let id = req.item_id;
        self.with_item(id, |it| {
            it.status = ItemStatus::Done;
            it.progress = 100.0;
            it.video_id = video.id.clone();
        });
        self.emit(QueueEvent::Progress {
            item_id: id,
            sent: req.payload.size,
            total: req.payload.size,
            percent: 100.0,
        });
        self.emit(QueueEvent::ItemStatusChanged { item_id: id, status: ItemStatus::Done });
        info!(item = %id, name = %req.payload.name, video = ?video.id, "upload complete");

        if let (Some(ledger), Some(video_id)) = (&self.ledger, video.id.as_deref()) {
            if let Err(e) = ledger
                .record_upload(&req.payload.path, req.payload.size, video_id, req.visibility)
                .await
            {
                warn!(item = %id, error = %format!("{:#}", e), "could not record upload in ledger");
            }
        }
    }

    fn finish_error(&self, id: ItemId, e: UploadError) {
        let message = e.to_string();
        let name = self
            .with_item(id, |it| {
                it.status = ItemStatus::Error;
                it.error_message = Some(message.clone());
                it.payload.name.clone()
            })
            .unwrap_or_default();
        warn!(item = %id, name = %name, error = %message, "upload failed");
        self.emit(QueueEvent::Error { scope: format!("item({})", name), message });
        self.emit(QueueEvent::ItemStatusChanged { item_id: id, status: ItemStatus::Error });
    }

    /// Files the ledger already knows become `Skipped` without touching the network.
    async fn skip_if_recorded(&self, id: ItemId) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };
        let Some(payload) = self.get(id).map(|it| it.payload) else {
            return false;
        };

        let record = match ledger.find_upload(&payload.path, payload.size).await {
            Ok(r) => r,
            Err(e) => {
                warn!(item = %id, error = %format!("{:#}", e), "ledger lookup failed");
                return false;
            }
        };
        let Some(record) = record else {
            return false;
        };

        let skipped = self
            .with_item(id, |it| {
                if it.status != ItemStatus::Queued {
                    return false;
                }
                it.status = ItemStatus::Skipped;
                it.visibility_locked = true;
                it.video_id = Some(record.video_id.clone());
                true
            })
            .unwrap_or(false);
        if skipped {
            info!(item = %id, video = %record.video_id, "already uploaded, skipping");
            self.emit(QueueEvent::Info {
                scope: format!("item({})", payload.name),
                message: format!("already uploaded as {}", record.video_id),
            });
            self.emit(QueueEvent::ItemStatusChanged { item_id: id, status: ItemStatus::Skipped });
        }
        // Removed during the lookup also means there is nothing left to do.
        skipped || self.get(id).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::registry::CredentialProvider;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeNegotiator {
        log: Log,
        failures: Mutex<VecDeque<UploadError>>,
        seen: Mutex<Vec<(String, Visibility)>>,
    }

    impl FakeNegotiator {
        fn new(log: Log) -> Arc<Self> {
            Arc::new(Self { log, failures: Mutex::new(VecDeque::new()), seen: Mutex::new(vec![]) })
        }

        fn fail_next(&self, e: UploadError) {
            self.failures.lock().unwrap().push_back(e);
        }

        fn opens(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SessionNegotiator for FakeNegotiator {
        fn name(&self) -> &'static str {
            "fake-negotiator"
        }

        async fn open(&self, req: &UploadRequest, token: &str) -> Result<SessionLocation, UploadError> {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(format!("open:{}", req.payload.name));
            self.seen.lock().unwrap().push((token.to_string(), req.visibility));
            if token.is_empty() {
                return Err(UploadError::Authentication { retryable: false });
            }
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(SessionLocation(Url::parse("https://upload.test/session").unwrap()))
        }
    }

    struct FakeTransport {
        log: Log,
        failures: Mutex<VecDeque<UploadError>>,
    }

    impl FakeTransport {
        fn new(log: Log) -> Arc<Self> {
            Arc::new(Self { log, failures: Mutex::new(VecDeque::new()) })
        }

        fn fail_next(&self, e: UploadError) {
            self.failures.lock().unwrap().push_back(e);
        }
    }

    #[async_trait]
    impl ByteTransport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake-transport"
        }

        async fn send(
            &self,
            req: &UploadRequest,
            _session: &SessionLocation,
            progress: ProgressFn,
        ) -> Result<UploadedVideo, UploadError> {
            self.log.lock().unwrap().push(format!("send:{}", req.payload.name));
            let total = req.payload.size;
            progress(total / 4, total);
            tokio::task::yield_now().await;
            progress(total / 2, total);
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            progress(total, total);
            Ok(UploadedVideo::from_json(serde_json::json!({ "id": format!("vid-{}", req.payload.name) })))
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        issued: AtomicUsize,
        invalidated: AtomicUsize,
        interactive_calls: AtomicUsize,
        refuse_interactive: bool,
        /// Interactive calls refused before the provider starts issuing again.
        refuse_first_interactive: usize,
    }

    #[async_trait]
    impl CredentialProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake-provider"
        }

        async fn get_token(&self, interactive: bool) -> Result<String, UploadError> {
            if interactive {
                let n = self.interactive_calls.fetch_add(1, Ordering::SeqCst);
                if self.refuse_interactive || n < self.refuse_first_interactive {
                    return Err(UploadError::Credential("user closed the sign-in prompt".into()));
                }
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }

        async fn invalidate(&self, _token: &str) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        queue: UploadQueue,
        negotiator: Arc<FakeNegotiator>,
        transport: Arc<FakeTransport>,
        provider: Arc<FakeProvider>,
        log: Log,
    }

    async fn harness_with(provider: FakeProvider, sign_in: bool) -> Harness {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let negotiator = FakeNegotiator::new(log.clone());
        let transport = FakeTransport::new(log.clone());
        let provider = Arc::new(provider);
        let credential = Arc::new(SharedCredential::new(provider.clone()));
        if sign_in {
            assert!(credential.try_silent().await);
        }
        let queue = UploadQueue::new(negotiator.clone(), transport.clone(), credential);
        Harness { queue, negotiator, transport, provider, log }
    }

    async fn harness() -> Harness {
        harness_with(FakeProvider::default(), true).await
    }

    fn payload(name: &str, size: u64) -> FilePayload {
        FilePayload {
            path: PathBuf::from(format!("/videos/{name}")),
            name: name.to_string(),
            size,
            content_type: Some("video/mp4".to_string()),
        }
    }

    #[tokio::test]
    async fn enqueue_starts_queued_without_uploading() {
        let h = harness().await;
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.progress, 0.0);
        assert_eq!(h.negotiator.opens(), 0);
        assert_eq!(h.queue.counts(), (0, 1));
    }

    #[tokio::test]
    async fn remove_targets_only_the_queued_item() {
        let h = harness().await;
        let a = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        let b = h.queue.enqueue(payload("b.mp4", 10), Visibility::Private);
        let c = h.queue.enqueue(payload("c.mp4", 10), Visibility::Private);

        assert!(h.queue.remove(b));
        let ids: Vec<_> = h.queue.snapshot().iter().map(|it| it.id).collect();
        assert_eq!(ids, vec![a, c]);

        assert!(!h.queue.remove(b));
    }

    #[tokio::test]
    async fn remove_is_noop_once_item_left_queue() {
        let h = harness().await;
        let a = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        h.queue.start_all().await;

        assert!(!h.queue.remove(a));
        assert_eq!(h.queue.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_start_all_uploads_each_item_once() {
        let h = harness().await;
        h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        h.queue.enqueue(payload("b.mp4", 10), Visibility::Private);

        tokio::join!(h.queue.start_all(), h.queue.start_all());

        assert_eq!(h.negotiator.opens(), 2);
        assert_eq!(
            *h.log.lock().unwrap(),
            vec!["open:a.mp4", "send:a.mp4", "open:b.mp4", "send:b.mp4"]
        );
        assert!(!h.queue.is_running());
    }

    #[tokio::test]
    async fn items_upload_strictly_in_enqueue_order() {
        let h = harness().await;
        h.queue.enqueue(payload("A.mp4", 5 * 1024 * 1024), Visibility::Private);
        h.queue.enqueue(payload("B.mp4", 2 * 1024 * 1024), Visibility::Private);

        h.queue.start_all().await;

        assert_eq!(
            *h.log.lock().unwrap(),
            vec!["open:A.mp4", "send:A.mp4", "open:B.mp4", "send:B.mp4"]
        );
        assert!(h.queue.snapshot().iter().all(|it| it.status == ItemStatus::Done));
        assert_eq!(h.queue.counts(), (2, 2));
    }

    #[tokio::test]
    async fn completed_transfer_reports_full_progress() {
        let h = harness().await;
        let mut rx = h.queue.subscribe();
        let id = h.queue.enqueue(payload("a.mp4", 1000), Visibility::Private);

        h.queue.start_all().await;

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Done);
        assert_eq!(item.progress, 100.0);
        assert_eq!(item.video_id.as_deref(), Some("vid-a.mp4"));

        let mut percents = vec![];
        while let Ok(evt) = rx.try_recv() {
            if let QueueEvent::Progress { item_id, percent, .. } = evt {
                if item_id == id {
                    percents.push(percent);
                }
            }
        }
        assert_eq!(percents.first(), Some(&0.0));
        assert_eq!(percents.last(), Some(&100.0));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn unlisted_visibility_reaches_negotiator() {
        let h = harness().await;
        h.queue.enqueue(payload("a.mp4", 10), Visibility::Unlisted);

        h.queue.start_all().await;

        let seen = h.negotiator.seen.lock().unwrap();
        assert_eq!(seen[0].1, Visibility::Unlisted);
        assert_eq!(seen[0].1.as_str(), "unlisted");
    }

    #[tokio::test]
    async fn session_401_refreshes_once_and_retries() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        assert_eq!(h.queue.get(id).unwrap().status, ItemStatus::Done);
        assert_eq!(h.negotiator.opens(), 2);
        assert_eq!(h.provider.invalidated.load(Ordering::SeqCst), 1);
        let tokens: Vec<_> = h.negotiator.seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(tokens, vec!["token-1", "token-2"]);
    }

    #[tokio::test]
    async fn second_401_is_terminal() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert!(item.error_message.unwrap().contains("401"));
        assert_eq!(h.negotiator.opens(), 2);
        assert_eq!(h.provider.invalidated.load(Ordering::SeqCst), 1);
        // startup token plus exactly one refresh
        assert_eq!(h.provider.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transport_401_uses_the_same_retry() {
        let h = harness().await;
        let mut rx = h.queue.subscribe();
        h.transport.fail_next(UploadError::Authentication { retryable: true });
        let id = h.queue.enqueue(payload("a.mp4", 1000), Visibility::Private);

        h.queue.start_all().await;

        assert_eq!(h.queue.get(id).unwrap().status, ItemStatus::Done);
        assert_eq!(h.negotiator.opens(), 2);
        assert_eq!(h.provider.invalidated.load(Ordering::SeqCst), 1);

        let mut percents = vec![];
        while let Ok(evt) = rx.try_recv() {
            if let QueueEvent::Progress { item_id, percent, .. } = evt {
                if item_id == id {
                    percents.push(percent);
                }
            }
        }
        // each attempt starts again from zero
        let starts: Vec<usize> = percents
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0], 0);
        let (first, second) = percents.split_at(starts[1]);
        assert_eq!(first, &[0.0, 25.0, 50.0]);
        assert!(second.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(second.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn failed_refresh_records_original_error() {
        let provider = FakeProvider { refuse_interactive: true, ..FakeProvider::default() };
        let h = harness_with(provider, true).await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert!(item.error_message.unwrap().contains("401"));
        assert_eq!(h.negotiator.opens(), 1);
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::INTERNAL_SERVER_ERROR });
        let c = h.queue.enqueue(payload("c.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        let item = h.queue.get(c).unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert!(item.error_message.unwrap().contains("500"));
        assert_eq!(h.provider.invalidated.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Protocol("no upload session URI returned".into()));
        let a = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        let b = h.queue.enqueue(payload("b.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        assert_eq!(h.queue.get(a).unwrap().status, ItemStatus::Error);
        assert_eq!(h.queue.get(b).unwrap().status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn signed_out_queue_signs_in_once_per_item() {
        let h = harness_with(FakeProvider::default(), false).await;
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        assert!(!h.queue.can_start().await);

        h.queue.start_all().await;

        assert_eq!(h.queue.get(id).unwrap().status, ItemStatus::Done);
        let tokens: Vec<_> = h.negotiator.seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(tokens, vec!["", "token-1"]);
        assert_eq!(h.provider.invalidated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signed_out_item_fails_when_sign_in_is_refused() {
        let provider = FakeProvider { refuse_interactive: true, ..FakeProvider::default() };
        let h = harness_with(provider, false).await;
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.error_message.as_deref(), Some("not authenticated"));
        assert_eq!(h.negotiator.opens(), 1);
        assert_eq!(h.provider.interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_does_not_poison_later_items() {
        let provider = FakeProvider { refuse_first_interactive: 1, ..FakeProvider::default() };
        let h = harness_with(provider, true).await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::UNAUTHORIZED });
        let a = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        let b = h.queue.enqueue(payload("b.mp4", 10), Visibility::Private);

        h.queue.start_all().await;

        let item_a = h.queue.get(a).unwrap();
        assert_eq!(item_a.status, ItemStatus::Error);
        assert!(item_a.error_message.unwrap().contains("401"));
        // b still holds the old token, gets its own refresh and succeeds
        assert_eq!(h.queue.get(b).unwrap().status, ItemStatus::Done);
        let tokens: Vec<_> = h.negotiator.seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(tokens, vec!["token-1", "token-1", "token-2"]);
        assert_eq!(h.provider.interactive_calls.load(Ordering::SeqCst), 2);

        assert!(h.queue.retry(a).await);
        assert_eq!(h.queue.get(a).unwrap().status, ItemStatus::Done);
        assert_eq!(h.provider.interactive_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_of_done_item_is_noop() {
        let h = harness().await;
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        h.queue.start_all().await;

        assert!(!h.queue.retry(id).await);
        assert_eq!(h.queue.get(id).unwrap().status, ItemStatus::Done);
        assert_eq!(h.negotiator.opens(), 1);
    }

    #[tokio::test]
    async fn retry_requeues_errored_item_and_runs_it() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Session { status: StatusCode::INTERNAL_SERVER_ERROR });
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Unlisted);
        h.queue.start_all().await;
        assert_eq!(h.queue.get(id).unwrap().status, ItemStatus::Error);

        assert!(h.queue.retry(id).await);

        let item = h.queue.get(id).unwrap();
        assert_eq!(item.status, ItemStatus::Done);
        assert!(item.error_message.is_none());
        assert_eq!(h.negotiator.opens(), 2);
    }

    #[tokio::test]
    async fn retry_while_running_is_ignored() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Timeout);
        let a = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);
        h.queue.start_all().await;

        h.queue.running.store(true, Ordering::SeqCst);
        assert!(!h.queue.retry(a).await);
        assert_eq!(h.queue.get(a).unwrap().status, ItemStatus::Error);
    }

    #[tokio::test]
    async fn visibility_freezes_after_first_start() {
        let h = harness().await;
        h.negotiator.fail_next(UploadError::Timeout);
        let id = h.queue.enqueue(payload("a.mp4", 10), Visibility::Private);

        assert!(h.queue.set_visibility(id, Visibility::Public));
        h.queue.start_all().await;
        assert!(!h.queue.set_visibility(id, Visibility::Unlisted));

        // queued again, as after a retry: still frozen
        h.queue.with_item(id, |it| it.status = ItemStatus::Queued);
        assert!(!h.queue.set_visibility(id, Visibility::Unlisted));
        assert_eq!(h.queue.get(id).unwrap().visibility, Visibility::Public);
    }

    #[tokio::test]
    async fn recorded_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SqliteStore::open(&dir.path().join("ledger.sqlite")).await.unwrap();
        let done_before = payload("old.mp4", 10);
        ledger
            .record_upload(&done_before.path, done_before.size, "vid-old", Visibility::Private)
            .await
            .unwrap();

        let h = harness().await;
        let queue = h.queue.clone().with_ledger(ledger.clone());
        let old = queue.enqueue(done_before, Visibility::Private);
        let new = queue.enqueue(payload("new.mp4", 10), Visibility::Private);

        queue.start_all().await;

        let old = queue.get(old).unwrap();
        assert_eq!(old.status, ItemStatus::Skipped);
        assert_eq!(old.video_id.as_deref(), Some("vid-old"));
        assert_eq!(queue.get(new).unwrap().status, ItemStatus::Done);
        assert_eq!(*h.log.lock().unwrap(), vec!["open:new.mp4", "send:new.mp4"]);

        let p = payload("new.mp4", 10);
        let rec = ledger.find_upload(&p.path, p.size).await.unwrap().unwrap();
        assert_eq!(rec.video_id, "vid-new.mp4");
    }

    #[tokio::test]
    async fn enqueue_files_filters_non_videos() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        let text = dir.path().join("notes.txt");
        std::fs::write(&video, b"0123").unwrap();
        std::fs::write(&text, b"hi").unwrap();

        let h = harness().await;
        let ids = h
            .queue
            .enqueue_files(&[video.clone(), text.clone()], Visibility::Private, true)
            .await;
        assert_eq!(ids.len(), 1);
        assert_eq!(h.queue.get(ids[0]).unwrap().payload.size, 4);

        let ids = h.queue.enqueue_files(&[text], Visibility::Private, false).await;
        assert_eq!(ids.len(), 1);
        assert_eq!(h.queue.counts(), (0, 2));
    }

    #[tokio::test]
    async fn enqueue_files_reports_unreadable_paths_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.mp4");
        let last = dir.path().join("c.mp4");
        std::fs::write(&first, b"0123").unwrap();
        std::fs::write(&last, b"01").unwrap();
        let missing = dir.path().join("b.mp4");

        let h = harness().await;
        let mut rx = h.queue.subscribe();
        let ids = h
            .queue
            .enqueue_files(&[first, missing.clone(), last], Visibility::Private, true)
            .await;

        assert_eq!(ids.len(), 2);
        let names: Vec<_> = h.queue.snapshot().into_iter().map(|it| it.payload.name).collect();
        assert_eq!(names, vec!["a.mp4", "c.mp4"]);

        let mut notices = vec![];
        while let Ok(evt) = rx.try_recv() {
            if let QueueEvent::Info { message, .. } = evt {
                notices.push(message);
            }
        }
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains(&missing.display().to_string()));

        h.queue.start_all().await;
        assert_eq!(h.queue.counts(), (2, 2));
    }
}
