//! Blob uploads and downloads.
//!
//! A transfer is correlated by up to three tokens, one per token class: the
//! terminal token resolved exactly once by the end or failure message, an
//! optional progress token fired for every progress report, and an optional
//! preview token resolved when preview information arrives.
//! Finished blobs are cached by id so a repeated download is answered locally.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info, trace, warn};

use order_shared::{BlobDescriptor, BlobId, BlobPreview, ClientMessage, CorrelationToken};

use crate::error::{Result, TransferFailure};
use crate::events::{emit_event, ClientEvent};
use crate::registry::{Registry, TokenClass};
use crate::session::Session;

pub type TransferResult<T> = std::result::Result<T, TransferFailure>;

pub type UploadCallback = Box<dyn FnOnce(&mut Session, TransferResult<BlobId>) + Send>;
pub type DownloadCallback = Box<dyn FnOnce(&mut Session, TransferResult<BlobDescriptor>) + Send>;
/// Called with `(sent, total)` bytes.
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;
pub type PreviewCallback = Box<dyn FnOnce(&mut Session, BlobPreview) + Send>;
/// Answer to an info-only download: the preview, or why there is none.
pub type PreviewOnlyCallback = Box<dyn FnOnce(&mut Session, TransferResult<BlobPreview>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Registered, request not yet handed to the transport.
    Idle,
    InFlight,
    Completed,
    Failed,
}

/// Snapshot of an outstanding transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub direction: TransferDirection,
    pub state: TransferState,
    pub progress: u64,
    pub max: u64,
}

enum OnEnd {
    Upload(UploadCallback),
    Download(DownloadCallback),
    /// Info-only download; the preview is the whole answer.
    PreviewOnly(PreviewOnlyCallback),
}

struct Transfer {
    direction: TransferDirection,
    state: TransferState,
    progress: u64,
    max: u64,
    progress_token: Option<CorrelationToken>,
    preview_token: Option<CorrelationToken>,
    on_end: OnEnd,
}

struct ProgressSlot {
    transfer: CorrelationToken,
    callback: ProgressCallback,
}

struct PreviewSlot {
    transfer: CorrelationToken,
    /// Empty for info-only downloads, which answer through their terminal callback.
    callback: Option<PreviewCallback>,
}

enum PreviewDelivery {
    /// Preview ahead of the payload.
    Early(PreviewCallback),
    /// Preview that ends an info-only download.
    Final(PreviewOnlyCallback),
}

/// Tokens allocated for one transfer request.
#[derive(Debug, Clone, Copy)]
struct TransferTokens {
    transfer: CorrelationToken,
    progress: Option<CorrelationToken>,
    preview: Option<CorrelationToken>,
}

pub struct TransferManager {
    blobs: HashMap<BlobId, BlobDescriptor>,
    transfers: Registry<Transfer>,
    progress: Registry<ProgressSlot>,
    previews: Registry<PreviewSlot>,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            blobs: HashMap::new(),
            transfers: Registry::new(TokenClass::Transfer),
            progress: Registry::new(TokenClass::Progress),
            previews: Registry::new(TokenClass::Preview),
        }
    }

    pub fn cached(&self, id: BlobId) -> Option<&BlobDescriptor> {
        self.blobs.get(&id)
    }

    /// Number of transfers that have not ended yet.
    pub fn outstanding(&self) -> usize {
        self.transfers.len()
    }

    pub fn status(&self, token: CorrelationToken) -> Option<TransferStatus> {
        self.transfers.get(token).map(|t| TransferStatus {
            direction: t.direction,
            state: t.state,
            progress: t.progress,
            max: t.max,
        })
    }

    fn begin(
        &mut self,
        direction: TransferDirection,
        on_end: OnEnd,
        on_progress: Option<ProgressCallback>,
        on_preview: Option<PreviewCallback>,
    ) -> TransferTokens {
        let wants_preview = on_preview.is_some() || matches!(on_end, OnEnd::PreviewOnly(_));
        let transfer = self.transfers.insert(Transfer {
            direction,
            state: TransferState::Idle,
            progress: 0,
            max: 0,
            progress_token: None,
            preview_token: None,
            on_end,
        });
        let progress = self
            .progress
            .register(on_progress.map(|callback| ProgressSlot { transfer, callback }));
        let preview = self.previews.register(wants_preview.then(|| PreviewSlot {
            transfer,
            callback: on_preview,
        }));

        if let Some(t) = self.transfers.get_mut(transfer) {
            t.progress_token = progress;
            t.preview_token = preview;
        }
        TransferTokens {
            transfer,
            progress,
            preview,
        }
    }

    fn started(&mut self, token: CorrelationToken) {
        if let Some(t) = self.transfers.get_mut(token) {
            t.state = TransferState::InFlight;
        }
    }

    /// Forget a transfer whose request never reached the transport.
    fn abort(&mut self, token: CorrelationToken) {
        if let Some(transfer) = self.transfers.resolve(token) {
            self.release(&transfer);
        }
    }

    fn release(&mut self, transfer: &Transfer) {
        if let Some(t) = transfer.progress_token {
            self.progress.resolve(t);
        }
        if let Some(t) = transfer.preview_token {
            self.previews.resolve(t);
        }
    }

    /// Record a progress report and fire the progress callback. Reports that
    /// move backwards are ignored.
    pub(crate) fn on_progress(&mut self, token: CorrelationToken, progress: u64, max: u64) {
        let slot = match self.progress.get_mut(token) {
            Some(s) => s,
            None => {
                warn!(token = %token, "Progress for unknown transfer");
                return;
            }
        };
        let transfer = match self.transfers.get_mut(slot.transfer) {
            Some(t) => t,
            None => return,
        };
        if progress < transfer.progress {
            debug!(token = %token, progress, last = transfer.progress, "Ignoring progress regression");
            return;
        }
        transfer.progress = progress;
        transfer.max = max;
        trace!(token = %token, progress, max, "Transfer progress");
        (slot.callback)(progress, max);
    }

    fn take_preview(&mut self, token: CorrelationToken) -> Option<PreviewDelivery> {
        let slot = self.previews.resolve(token)?;
        let preview_only = match self.transfers.get_mut(slot.transfer) {
            Some(t) => {
                t.preview_token = None;
                matches!(t.on_end, OnEnd::PreviewOnly(_))
            }
            None => false,
        };
        if !preview_only {
            return slot.callback.map(PreviewDelivery::Early);
        }
        match self.transfers.resolve(slot.transfer)?.on_end {
            OnEnd::PreviewOnly(callback) => Some(PreviewDelivery::Final(callback)),
            _ => None,
        }
    }

    /// Resolve the terminal token, seeding the cache on success.
    fn finish(
        &mut self,
        token: CorrelationToken,
        outcome: &TransferResult<BlobDescriptor>,
    ) -> Option<Transfer> {
        let mut transfer = self.transfers.resolve(token)?;
        self.release(&transfer);
        match outcome {
            Ok(blob) => {
                transfer.state = TransferState::Completed;
                self.blobs.insert(blob.id, blob.clone());
            }
            Err(_) => transfer.state = TransferState::Failed,
        }
        Some(transfer)
    }

    /// Drop every transfer and cached blob. Returns how many transfers were dropped.
    pub fn clear(&mut self) -> usize {
        self.blobs.clear();
        self.progress.clear();
        self.previews.clear();
        self.transfers.clear()
    }
}

impl Session {
    pub fn blob(&self, id: BlobId) -> Option<&BlobDescriptor> {
        self.transfers.cached(id)
    }

    pub fn transfer_status(&self, token: CorrelationToken) -> Option<TransferStatus> {
        self.transfers.status(token)
    }

    /// Upload a local file. `on_end` receives the new blob id.
    pub fn upload<F>(
        &mut self,
        path: impl Into<PathBuf>,
        on_end: F,
        on_progress: Option<ProgressCallback>,
    ) -> Result<CorrelationToken>
    where
        F: FnOnce(&mut Session, TransferResult<BlobId>) + Send + 'static,
    {
        let path = path.into();
        let tokens = self.transfers.begin(
            TransferDirection::Upload,
            OnEnd::Upload(Box::new(on_end)),
            on_progress,
            None,
        );
        debug!(token = %tokens.transfer, path = %path.display(), "Starting upload");
        self.send_transfer(
            tokens.transfer,
            ClientMessage::BlobUpload {
                path,
                token: tokens.transfer,
                progress_token: tokens.progress,
            },
        )?;
        Ok(tokens.transfer)
    }

    /// Download a blob. A blob downloaded earlier is answered from the cache
    /// unless `force` is set or a preview was asked for.
    /// Returns the terminal token, or `None` on a cache hit.
    pub fn download<F>(
        &mut self,
        id: BlobId,
        on_end: F,
        on_preview: Option<PreviewCallback>,
        force: bool,
    ) -> Result<Option<CorrelationToken>>
    where
        F: FnOnce(&mut Session, TransferResult<BlobDescriptor>) + Send + 'static,
    {
        if !force && on_preview.is_none() {
            if let Some(blob) = self.transfers.cached(id).cloned() {
                trace!(blob = %id, "Blob cache hit");
                on_end(self, Ok(blob));
                return Ok(None);
            }
        }

        let tokens = self.transfers.begin(
            TransferDirection::Download,
            OnEnd::Download(Box::new(on_end)),
            None,
            on_preview,
        );
        debug!(token = %tokens.transfer, blob = %id, "Starting download");
        self.send_transfer(
            tokens.transfer,
            ClientMessage::BlobDownload {
                id,
                token: tokens.transfer,
                preview_token: tokens.preview,
                actually_download: true,
            },
        )?;
        Ok(Some(tokens.transfer))
    }

    /// Fetch only a blob's preview information, without its payload.
    /// `on_preview` fires exactly once, with the preview or the failure.
    pub fn download_preview<F>(&mut self, id: BlobId, on_preview: F) -> Result<CorrelationToken>
    where
        F: FnOnce(&mut Session, TransferResult<BlobPreview>) + Send + 'static,
    {
        let tokens = self.transfers.begin(
            TransferDirection::Download,
            OnEnd::PreviewOnly(Box::new(on_preview)),
            None,
            None,
        );
        debug!(token = %tokens.transfer, blob = %id, "Requesting blob preview");
        self.send_transfer(
            tokens.transfer,
            ClientMessage::BlobDownload {
                id,
                token: tokens.transfer,
                preview_token: tokens.preview,
                actually_download: false,
            },
        )?;
        Ok(tokens.transfer)
    }

    fn send_transfer(&mut self, token: CorrelationToken, message: ClientMessage) -> Result<()> {
        if let Err(e) = self.transport.send(message) {
            self.transfers.abort(token);
            return Err(e.into());
        }
        self.transfers.started(token);
        Ok(())
    }

    pub(crate) fn on_preview(&mut self, token: CorrelationToken, preview: BlobPreview) {
        match self.transfers.take_preview(token) {
            Some(PreviewDelivery::Early(callback)) => callback(self, preview),
            Some(PreviewDelivery::Final(callback)) => {
                debug!(token = %token, "Blob preview received");
                callback(self, Ok(preview));
            }
            None => warn!(token = %token, "Preview for unknown transfer"),
        }
    }

    /// Apply an end or failure message. `expected` is the direction an end
    /// message implies; failures carry none.
    pub(crate) fn on_transfer_end(
        &mut self,
        token: CorrelationToken,
        expected: Option<TransferDirection>,
        outcome: TransferResult<BlobDescriptor>,
    ) {
        if let (Some(expected), Some(status)) = (expected, self.transfers.status(token)) {
            if status.direction != expected {
                warn!(
                    token = %token,
                    expected = ?expected,
                    actual = ?status.direction,
                    "Transfer end does not match transfer direction"
                );
                return;
            }
        }

        let transfer = match self.transfers.finish(token, &outcome) {
            Some(t) => t,
            None => {
                warn!(token = %token, "Transfer end for unknown token");
                return;
            }
        };

        match &outcome {
            Ok(blob) => {
                info!(
                    blob = %blob.id,
                    direction = ?transfer.direction,
                    state = ?transfer.state,
                    length = blob.length,
                    "Transfer completed"
                );
                emit_event(&self.events, ClientEvent::BlobReady { id: blob.id });
            }
            Err(e) => warn!(
                token = %token,
                direction = ?transfer.direction,
                state = ?transfer.state,
                error = %e,
                "Transfer failed"
            ),
        }

        match transfer.on_end {
            OnEnd::Upload(callback) => callback(self, outcome.map(|blob| blob.id)),
            OnEnd::Download(callback) => callback(self, outcome),
            OnEnd::PreviewOnly(callback) => {
                let outcome: TransferResult<BlobPreview> = outcome.and_then(|_| {
                    Err(TransferFailure {
                        reason: "transfer ended without preview information".into(),
                    })
                });
                callback(self, outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use order_shared::ServerMessage;

    use super::*;
    use crate::session::testing::{test_session, Sent};

    fn descriptor(id: u64) -> BlobDescriptor {
        BlobDescriptor {
            id: BlobId(id),
            path: PathBuf::from(format!("/tmp/blobs/{id}")),
            length: 2048,
        }
    }

    fn preview() -> BlobPreview {
        BlobPreview {
            name: "photo.jpg".into(),
            size: "800x600".into(),
            preview: "LEHV6nWB2yk8".into(),
            hash: vec![0xab; 4],
            length: 2048,
        }
    }

    fn download_count(sent: &Sent) -> usize {
        sent.lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, ClientMessage::BlobDownload { .. }))
            .count()
    }

    type Slot<T> = Arc<Mutex<Vec<T>>>;

    fn record<T: Send + 'static>(
        slot: &Slot<T>,
    ) -> impl FnOnce(&mut Session, T) + Send + 'static {
        let slot = slot.clone();
        move |_: &mut Session, value: T| slot.lock().unwrap().push(value)
    }

    #[test]
    fn test_download_then_cache_hit() {
        let (mut session, sent, _events) = test_session();
        let results: Slot<TransferResult<BlobDescriptor>> = Slot::default();

        let token = session
            .download(BlobId(42), record(&results), None, false)
            .unwrap()
            .unwrap();
        session
            .dispatch(ServerMessage::DownloadEnd {
                token,
                blob: descriptor(42),
            })
            .unwrap();

        let second = session
            .download(BlobId(42), record(&results), None, false)
            .unwrap();

        assert_eq!(second, None);
        assert_eq!(download_count(&sent), 1);
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Ok(descriptor(42)));
    }

    #[test]
    fn test_force_or_preview_bypasses_cache() {
        let (mut session, sent, _events) = test_session();
        let results: Slot<TransferResult<BlobDescriptor>> = Slot::default();
        let token = session
            .download(BlobId(42), record(&results), None, false)
            .unwrap()
            .unwrap();
        session
            .dispatch(ServerMessage::DownloadEnd {
                token,
                blob: descriptor(42),
            })
            .unwrap();

        session
            .download(BlobId(42), record(&results), None, true)
            .unwrap();
        let on_preview: PreviewCallback = Box::new(|_: &mut Session, _: BlobPreview| {});
        session
            .download(BlobId(42), record(&results), Some(on_preview), false)
            .unwrap();

        assert_eq!(download_count(&sent), 3);
    }

    #[test]
    fn test_preview_before_end() {
        let (mut session, sent, _events) = test_session();
        let previews: Slot<BlobPreview> = Slot::default();
        let ends: Slot<TransferResult<BlobDescriptor>> = Slot::default();

        let preview_cb: PreviewCallback = Box::new(record(&previews));
        let token = session
            .download(BlobId(7), record(&ends), Some(preview_cb), false)
            .unwrap()
            .unwrap();

        let preview_token = match &sent.lock().unwrap()[0] {
            ClientMessage::BlobDownload {
                preview_token,
                actually_download,
                ..
            } => {
                assert!(*actually_download);
                preview_token.unwrap()
            }
            other => panic!("unexpected message {other:?}"),
        };

        session
            .dispatch(ServerMessage::PreviewAvailable {
                token: preview_token,
                preview: preview(),
            })
            .unwrap();
        assert_eq!(previews.lock().unwrap().len(), 1);
        assert!(ends.lock().unwrap().is_empty());
        assert_eq!(
            session.transfer_status(token).unwrap().state,
            TransferState::InFlight
        );

        session
            .dispatch(ServerMessage::DownloadEnd {
                token,
                blob: descriptor(7),
            })
            .unwrap();
        assert_eq!(ends.lock().unwrap().len(), 1);
        assert_eq!(session.transfers.outstanding(), 0);
    }

    #[test]
    fn test_upload_progress_and_end() {
        let (mut session, sent, mut events) = test_session();
        let reports: Slot<(u64, u64)> = Slot::default();
        let ids: Slot<TransferResult<BlobId>> = Slot::default();

        let sink = reports.clone();
        let on_progress: ProgressCallback =
            Box::new(move |done: u64, total: u64| sink.lock().unwrap().push((done, total)));
        let token = session
            .upload("/home/me/cat.png", record(&ids), Some(on_progress))
            .unwrap();

        let progress_token = match &sent.lock().unwrap()[0] {
            ClientMessage::BlobUpload { progress_token, .. } => progress_token.unwrap(),
            other => panic!("unexpected message {other:?}"),
        };
        assert_ne!(progress_token, token);

        for progress in [100, 50, 400] {
            session
                .dispatch(ServerMessage::UploadProgress {
                    token: progress_token,
                    progress,
                    max: 400,
                })
                .unwrap();
        }
        // the regression to 50 is dropped
        assert_eq!(*reports.lock().unwrap(), vec![(100, 400), (400, 400)]);
        assert_eq!(session.transfer_status(token).unwrap().progress, 400);

        session
            .dispatch(ServerMessage::UploadEnd {
                token,
                blob: descriptor(99),
            })
            .unwrap();

        assert_eq!(*ids.lock().unwrap(), vec![Ok(BlobId(99))]);
        assert!(session.blob(BlobId(99)).is_some());
        assert_eq!(events.try_recv().unwrap(), ClientEvent::BlobReady { id: BlobId(99) });

        // progress after the end is ignored
        session
            .dispatch(ServerMessage::UploadProgress {
                token: progress_token,
                progress: 500,
                max: 500,
            })
            .unwrap();
        assert_eq!(reports.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_transfer_fires_terminal_once() {
        let (mut session, _sent, _events) = test_session();
        let results: Slot<TransferResult<BlobDescriptor>> = Slot::default();
        let token = session
            .download(BlobId(5), record(&results), None, false)
            .unwrap()
            .unwrap();

        for _ in 0..2 {
            session
                .dispatch(ServerMessage::TransferFailed {
                    token,
                    reason: "not found".into(),
                })
                .unwrap();
        }

        let results = results.lock().unwrap();
        assert_eq!(
            *results,
            vec![Err(TransferFailure {
                reason: "not found".into()
            })]
        );
        assert!(session.blob(BlobId(5)).is_none());
    }

    #[test]
    fn test_preview_only_download() {
        let (mut session, sent, _events) = test_session();
        let previews: Slot<TransferResult<BlobPreview>> = Slot::default();

        session.download_preview(BlobId(3), record(&previews)).unwrap();
        let preview_token = match &sent.lock().unwrap()[0] {
            ClientMessage::BlobDownload {
                preview_token,
                actually_download,
                ..
            } => {
                assert!(!*actually_download);
                preview_token.unwrap()
            }
            other => panic!("unexpected message {other:?}"),
        };

        session
            .dispatch(ServerMessage::PreviewAvailable {
                token: preview_token,
                preview: preview(),
            })
            .unwrap();

        let previews = previews.lock().unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].as_ref().unwrap().dimensions(), Some((800, 600)));
        assert_eq!(session.transfers.outstanding(), 0);
    }

    #[test]
    fn test_preview_only_failure_reports_error() {
        let (mut session, sent, _events) = test_session();
        let previews: Slot<TransferResult<BlobPreview>> = Slot::default();

        let token = session.download_preview(BlobId(3), record(&previews)).unwrap();
        let preview_token = match &sent.lock().unwrap()[0] {
            ClientMessage::BlobDownload { preview_token, .. } => preview_token.unwrap(),
            other => panic!("unexpected message {other:?}"),
        };

        session
            .dispatch(ServerMessage::TransferFailed {
                token,
                reason: "no such blob".into(),
            })
            .unwrap();
        assert_eq!(
            *previews.lock().unwrap(),
            vec![Err(TransferFailure {
                reason: "no such blob".into()
            })]
        );
        assert_eq!(session.transfers.outstanding(), 0);

        // a late preview finds nothing to answer
        session
            .dispatch(ServerMessage::PreviewAvailable {
                token: preview_token,
                preview: preview(),
            })
            .unwrap();
        assert_eq!(previews.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_end_for_wrong_direction_is_ignored() {
        let (mut session, _sent, _events) = test_session();
        let results: Slot<TransferResult<BlobDescriptor>> = Slot::default();
        let token = session
            .download(BlobId(8), record(&results), None, false)
            .unwrap()
            .unwrap();

        session
            .dispatch(ServerMessage::UploadEnd {
                token,
                blob: descriptor(8),
            })
            .unwrap();
        assert!(results.lock().unwrap().is_empty());
        assert!(session.blob(BlobId(8)).is_none());
        assert_eq!(
            session.transfer_status(token).unwrap().state,
            TransferState::InFlight
        );

        session
            .dispatch(ServerMessage::DownloadEnd {
                token,
                blob: descriptor(8),
            })
            .unwrap();
        assert_eq!(*results.lock().unwrap(), vec![Ok(descriptor(8))]);
    }

    #[test]
    fn test_tokens_of_concurrent_transfers_are_distinct() {
        let (mut session, sent, _events) = test_session();
        let ids: Slot<TransferResult<BlobId>> = Slot::default();
        let ends: Slot<TransferResult<BlobDescriptor>> = Slot::default();
        let previews: Slot<BlobPreview> = Slot::default();

        let on_progress: ProgressCallback = Box::new(|_: u64, _: u64| {});
        let upload = session
            .upload("/home/me/a.txt", record(&ids), Some(on_progress))
            .unwrap();
        let preview_cb: PreviewCallback = Box::new(record(&previews));
        let download = session
            .download(BlobId(9), record(&ends), Some(preview_cb), false)
            .unwrap()
            .unwrap();

        let mut tokens = HashSet::from([upload, download]);
        for message in sent.lock().unwrap().iter() {
            match message {
                ClientMessage::BlobUpload { progress_token, .. } => {
                    assert!(tokens.insert(progress_token.unwrap()))
                }
                ClientMessage::BlobDownload { preview_token, .. } => {
                    assert!(tokens.insert(preview_token.unwrap()))
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(tokens.len(), 4);

        // a preview addressed with the upload's terminal token matches nothing
        session
            .dispatch(ServerMessage::PreviewAvailable {
                token: upload,
                preview: preview(),
            })
            .unwrap();
        assert!(previews.lock().unwrap().is_empty());
        assert_eq!(session.transfers.outstanding(), 2);
    }

    #[test]
    fn test_session_reset_drops_transfers() {
        let (mut session, _sent, _events) = test_session();
        let results: Slot<TransferResult<BlobDescriptor>> = Slot::default();
        let token = session
            .download(BlobId(1), record(&results), None, false)
            .unwrap()
            .unwrap();

        session.dispatch(ServerMessage::SessionStarted).unwrap();
        session
            .dispatch(ServerMessage::DownloadEnd {
                token,
                blob: descriptor(1),
            })
            .unwrap();

        assert!(results.lock().unwrap().is_empty());
        assert!(session.blob(BlobId(1)).is_none());
    }
}
