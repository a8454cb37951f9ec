use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde_json::Value;
use stylist_contracts::events::{SessionLog, StudioEvent};
use stylist_contracts::history::{GenerationResult, HistoryStore, SaveTarget};
use stylist_contracts::modal::{ModalKind, ModalPresentation};
use stylist_contracts::operation::{GenerationPhase, OperationKind};
use stylist_contracts::photo::{PhotoInput, PhotoSlot};
use stylist_contracts::quota::{QuotaLedger, RedeemOutcome};
use stylist_contracts::store::{JsonFileStore, KeyValueStore, StateBatch};

use crate::animation::{FrameToggle, BEFORE_AFTER_INTERVAL};
use crate::codec::encode_file;
use crate::config::StudioConfig;
use crate::error::{RemoteCallError, StudioError, ValidationError};
use crate::prompts::{
    compose_generation_prompt, ANALYZING_LABEL, DESCRIBE_SYSTEM_PROMPT, DESCRIBE_USER_PROMPT,
    GENERATING_LABEL, SUGGESTION_SYSTEM_PROMPT, SUGGESTION_USER_PROMPT,
};
use crate::proxy::{
    extract_image_data, extract_text, image_request_payload, text_request_payload,
    HttpProxyClient, InlineImage, ProxyTransport, TargetApi,
};
use crate::watermark::apply_watermark;

pub const ERROR_HEADING: &str = "Error";
pub const SUGGESTIONS_HEADING: &str = "Hairstyle suggestions";
pub const HISTORY_ITEM_HEADING: &str = "Generated look";
pub const BEFORE_AFTER_HEADING: &str = "Before/After animation";

/// Receives each before/after frame as a display source. Runs on the ticker
/// thread and must not call back into the studio.
pub type FrameRenderer = Box<dyn FnMut(&str) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub label: String,
    pub phase: GenerationPhase,
}

/// Single-flight slot shared by every remote-calling operation. A second
/// `begin` while one is outstanding is rejected, never queued.
#[derive(Debug, Default)]
pub struct OperationSlot {
    current: Mutex<Option<PendingOperation>>,
}

impl OperationSlot {
    pub fn begin(
        &self,
        kind: OperationKind,
        label: &str,
    ) -> Result<OperationGuard<'_>, ValidationError> {
        let mut current = lock(&self.current);
        if let Some(active) = current.as_ref() {
            return Err(ValidationError::Busy {
                label: active.label.clone(),
            });
        }
        *current = Some(PendingOperation {
            kind,
            label: label.to_string(),
            phase: GenerationPhase::Validating,
        });
        Ok(OperationGuard { slot: self })
    }

    pub fn snapshot(&self) -> Option<PendingOperation> {
        lock(&self.current).clone()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.current).is_some()
    }

    pub fn phase(&self) -> GenerationPhase {
        lock(&self.current)
            .as_ref()
            .map(|active| active.phase)
            .unwrap_or(GenerationPhase::Idle)
    }
}

/// Holds the slot for one operation; dropping it returns the slot to idle.
pub struct OperationGuard<'a> {
    slot: &'a OperationSlot,
}

impl OperationGuard<'_> {
    fn advance(&self, phase: GenerationPhase) {
        if let Some(active) = lock(&self.slot.current).as_mut() {
            active.phase = phase;
        }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.slot.current) = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioStatus {
    pub pending: Option<PendingOperation>,
    pub quota: QuotaLedger,
    pub history_len: usize,
    pub selected_count: usize,
    pub prompt: String,
    pub subject_ready: bool,
    pub style_ready: bool,
    pub has_result: bool,
}

#[derive(Default)]
struct SessionState {
    subject: PhotoInput,
    style: PhotoInput,
    prompt: String,
    current: Option<GenerationResult>,
    quota: QuotaLedger,
    history: HistoryStore,
    modal: Option<ModalPresentation>,
    animation: Option<FrameToggle>,
}

impl SessionState {
    fn photo(&self, slot: PhotoSlot) -> &PhotoInput {
        match slot {
            PhotoSlot::Subject => &self.subject,
            PhotoSlot::Style => &self.style,
        }
    }

    fn photo_mut(&mut self, slot: PhotoSlot) -> &mut PhotoInput {
        match slot {
            PhotoSlot::Subject => &mut self.subject,
            PhotoSlot::Style => &mut self.style,
        }
    }

    /// Replaces the modal and hands back any running animation so the caller
    /// can stop it after releasing the state lock.
    fn open_modal(&mut self, modal: ModalPresentation) -> Option<FrameToggle> {
        self.modal = Some(modal);
        self.animation.take()
    }

    fn animation_modal_open(&self) -> bool {
        self.modal
            .as_ref()
            .is_some_and(|modal| modal.kind == ModalKind::Animation)
    }

    /// The before/after frames went stale: close their modal and hand back
    /// the ticker for the caller to stop after unlocking.
    fn retire_animation(&mut self) -> Option<FrameToggle> {
        if self.animation_modal_open() {
            self.modal = None;
        }
        self.animation.take()
    }
}

/// The hairstyle studio session: photo slots, prompt, result, quota, history
/// and modal, coordinated around one outstanding remote operation.
pub struct Studio {
    transport: Box<dyn ProxyTransport>,
    store: Mutex<Box<dyn KeyValueStore>>,
    log: SessionLog,
    slot: OperationSlot,
    state: Mutex<SessionState>,
}

impl Studio {
    pub fn new(
        transport: Box<dyn ProxyTransport>,
        mut store: Box<dyn KeyValueStore>,
        log: SessionLog,
    ) -> Self {
        let quota = QuotaLedger::load(store.as_mut());
        let history = HistoryStore::load(store.as_mut());
        let _ = log.record(&StudioEvent::SessionStarted {
            quota,
            history_len: history.len(),
        });
        Self {
            transport,
            store: Mutex::new(store),
            log,
            slot: OperationSlot::default(),
            state: Mutex::new(SessionState {
                quota,
                history,
                ..SessionState::default()
            }),
        }
    }

    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        let transport = HttpProxyClient::new(config.proxy_url.clone(), config.request_timeout)?;
        Ok(Self::new(
            Box::new(transport),
            Box::new(JsonFileStore::new(&config.state_path)),
            SessionLog::for_new_session(&config.events_path),
        ))
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn select_photo(&self, slot: PhotoSlot, path: &Path) -> Result<(), StudioError> {
        let encoded = match encode_file(path) {
            Ok(encoded) => encoded,
            Err(err) => {
                self.record(StudioEvent::PhotoRejected {
                    slot,
                    path: path.display().to_string(),
                });
                return Err(self.surface(err.into()));
            }
        };

        let mut photo = PhotoInput::pending(path);
        photo.encoded = Some(encoded.data);
        photo.mime_type = Some(encoded.mime_type.clone());

        let mut state = self.lock_state();
        *state.photo_mut(slot) = photo;
        let stale = if slot == PhotoSlot::Subject {
            state.retire_animation()
        } else {
            None
        };
        drop(state);
        drop(stale);

        self.record(StudioEvent::PhotoSelected {
            slot,
            mime_type: encoded.mime_type,
        });
        Ok(())
    }

    pub fn photo(&self, slot: PhotoSlot) -> PhotoInput {
        self.lock_state().photo(slot).clone()
    }

    pub fn set_prompt(&self, text: &str) {
        self.lock_state().prompt = text.to_string();
    }

    pub fn prompt(&self) -> String {
        self.lock_state().prompt.clone()
    }

    /// Runs one generation: validate, call the proxy, watermark, commit.
    ///
    /// Guard failures and remote failures leave quota and history untouched;
    /// quota and history each change exactly once per success.
    pub fn generate(&self) -> Result<GenerationResult, StudioError> {
        let guard = self
            .slot
            .begin(OperationKind::Generate, GENERATING_LABEL)
            .map_err(|err| self.surface(err.into()))?;
        self.enter(&guard, OperationKind::Generate, GenerationPhase::Validating);

        let payload = generation_payload(&self.lock_state());
        let payload = payload.map_err(|err| self.surface(err.into()))?;

        self.enter(&guard, OperationKind::Generate, GenerationPhase::Calling);
        let raw = self
            .transport
            .call(TargetApi::Image, &payload)
            .and_then(|response| extract_image_data(&response))
            .map_err(|err| self.surface(err.into()))?;

        self.enter(&guard, OperationKind::Generate, GenerationPhase::Watermarking);
        let outcome = apply_watermark(&raw);
        if let Some(reason) = outcome.fallback_reason.as_deref() {
            self.record(StudioEvent::WatermarkFallback {
                reason: reason.to_string(),
            });
        }

        self.enter(&guard, OperationKind::Generate, GenerationPhase::Committing);
        let result = GenerationResult::new(outcome.data_url);
        let mut state = self.lock_state();
        state.current = Some(result.clone());
        state.quota.record_generation();
        state.history.record(result.clone());
        self.persist(&state.quota, Some(&state.history));
        let quota = state.quota;
        let history_len = state.history.len();
        let stale = state.retire_animation();
        drop(state);
        drop(stale);

        self.record(StudioEvent::GenerationCommitted {
            quota,
            history_len,
            watermarked: outcome.fallback_reason.is_none(),
        });
        drop(guard);
        Ok(result)
    }

    /// Asks for styles that suit the subject photo and shows them in a text
    /// modal.
    pub fn suggest_styles(&self) -> Result<String, StudioError> {
        let advice = self.advise(
            OperationKind::Suggest,
            PhotoSlot::Subject,
            SUGGESTION_SYSTEM_PROMPT,
            SUGGESTION_USER_PROMPT,
        )?;
        let stale = self
            .lock_state()
            .open_modal(ModalPresentation::text(SUGGESTIONS_HEADING, advice.clone()));
        drop(stale);
        Ok(advice)
    }

    /// Describes the hairstyle on the style photo and puts the description
    /// into the prompt.
    pub fn describe_style(&self) -> Result<String, StudioError> {
        let description = self.advise(
            OperationKind::Describe,
            PhotoSlot::Style,
            DESCRIBE_SYSTEM_PROMPT,
            DESCRIBE_USER_PROMPT,
        )?;
        self.lock_state().prompt = description.clone();
        Ok(description)
    }

    fn advise(
        &self,
        kind: OperationKind,
        slot: PhotoSlot,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, StudioError> {
        let guard = self
            .slot
            .begin(kind, ANALYZING_LABEL)
            .map_err(|err| self.surface(err.into()))?;
        self.enter(&guard, kind, GenerationPhase::Validating);

        let payload = advice_payload(&self.lock_state(), slot, system_prompt, user_prompt);
        let payload = payload.ok_or_else(|| self.surface(ValidationError::MissingPhoto.into()))?;

        self.enter(&guard, kind, GenerationPhase::Calling);
        let text = self
            .transport
            .call(TargetApi::Text, &payload)
            .and_then(|response| extract_text(&response))
            .map_err(|err| self.surface(err.into()))?;
        self.record(StudioEvent::AdviceReady {
            operation: kind,
            chars: text.chars().count(),
        });
        drop(guard);
        Ok(text)
    }

    pub fn redeem(&self, code: &str) -> RedeemOutcome {
        let mut state = self.lock_state();
        let outcome = state.quota.redeem(code);
        if outcome.is_success() {
            self.persist(&state.quota, None);
        }
        let quota = state.quota;
        let stale = state.open_modal(ModalPresentation::text(
            outcome.heading(),
            outcome.message(),
        ));
        drop(state);
        drop(stale);

        self.record(StudioEvent::CodeRedeemed {
            accepted: outcome.is_success(),
            quota,
        });
        outcome
    }

    /// Flips selection of the history entry at `index`. `None` when there is
    /// no such entry.
    pub fn toggle_selection(&self, index: usize) -> Option<bool> {
        let mut state = self.lock_state();
        let entry = state.history.get(index)?.clone();
        Some(state.history.toggle_selection(&entry))
    }

    /// Selects the history entry at `index` without ever deselecting it.
    /// `Some(false)` when it was already selected, `None` when there is no
    /// such entry.
    pub fn select(&self, index: usize) -> Option<bool> {
        let mut state = self.lock_state();
        let entry = state.history.get(index)?.clone();
        Some(state.history.select(&entry))
    }

    pub fn is_selected(&self, index: usize) -> bool {
        let state = self.lock_state();
        state
            .history
            .get(index)
            .map(|entry| state.history.is_selected(entry))
            .unwrap_or(false)
    }

    pub fn export_selected(&self, target: &mut dyn SaveTarget) -> Result<Vec<PathBuf>> {
        let stamp_ms = chrono::Utc::now().timestamp_millis();
        let saved = self.lock_state().history.export_selected(target, stamp_ms)?;
        if !saved.is_empty() {
            self.record(StudioEvent::HistoryExported { count: saved.len() });
        }
        Ok(saved)
    }

    pub fn show_history_item(&self, index: usize) -> Result<ModalPresentation, StudioError> {
        let mut state = self.lock_state();
        let entry = state.history.get(index).cloned();
        let Some(entry) = entry else {
            drop(state);
            return Err(self.surface(ValidationError::NothingToShow.into()));
        };
        let modal = ModalPresentation::image(HISTORY_ITEM_HEADING, entry.data_url());
        let stale = state.open_modal(modal.clone());
        drop(state);
        drop(stale);
        Ok(modal)
    }

    /// Opens the before/after modal and starts alternating the subject photo
    /// with the current result until the modal closes.
    pub fn open_before_after(&self, renderer: FrameRenderer) -> Result<(), StudioError> {
        let mut state = self.lock_state();
        let before = state.subject.display_source();
        let after = state.current.as_ref().map(|result| result.data_url().to_string());
        let (Some(before), Some(after)) = (before, after) else {
            drop(state);
            return Err(self.surface(ValidationError::NothingToShow.into()));
        };
        let stale = state.open_modal(ModalPresentation::animation(BEFORE_AFTER_HEADING));
        drop(state);
        drop(stale);

        let toggle = match FrameToggle::start([before, after], BEFORE_AFTER_INTERVAL, renderer) {
            Ok(toggle) => toggle,
            Err(err) => {
                self.record(StudioEvent::AnimationUnavailable {
                    error: err.to_string(),
                });
                return Ok(());
            }
        };

        // Another call may have replaced the modal while the ticker started.
        let mut state = self.lock_state();
        let discarded = if state.animation_modal_open() {
            state.animation.replace(toggle)
        } else {
            Some(toggle)
        };
        drop(state);
        drop(discarded);
        Ok(())
    }

    pub fn animation_running(&self) -> bool {
        self.lock_state()
            .animation
            .as_ref()
            .map(FrameToggle::is_running)
            .unwrap_or(false)
    }

    pub fn close_modal(&self) {
        let mut state = self.lock_state();
        state.modal = None;
        let stale = state.animation.take();
        drop(state);
        drop(stale);
    }

    pub fn modal(&self) -> Option<ModalPresentation> {
        self.lock_state().modal.clone()
    }

    /// Clears both photos, the prompt, the current result, the history and
    /// the selection in one step. Quota is kept.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        let cleared = state.history.len();
        state.subject = PhotoInput::default();
        state.style = PhotoInput::default();
        state.prompt.clear();
        state.current = None;
        state.history.clear();
        state.modal = None;
        let stale = state.animation.take();
        self.persist(&state.quota, Some(&state.history));
        drop(state);
        drop(stale);

        if cleared > 0 {
            self.record(StudioEvent::HistoryCleared { entries: cleared });
        }
        self.record(StudioEvent::SessionReset);
    }

    pub fn current_result(&self) -> Option<GenerationResult> {
        self.lock_state().current.clone()
    }

    pub fn history(&self) -> Vec<GenerationResult> {
        self.lock_state().history.entries().to_vec()
    }

    pub fn quota(&self) -> QuotaLedger {
        self.lock_state().quota
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Whether the generate control should be enabled: idle, subject photo
    /// present, something to aim for (prompt or style photo), quota left.
    pub fn ready_to_generate(&self) -> bool {
        if self.slot.is_busy() {
            return false;
        }
        let state = self.lock_state();
        state.subject.source.is_some()
            && (!state.prompt.trim().is_empty() || state.style.source.is_some())
            && state.quota.can_generate()
    }

    pub fn status(&self) -> StudioStatus {
        let pending = self.slot.snapshot();
        let state = self.lock_state();
        StudioStatus {
            pending,
            quota: state.quota,
            history_len: state.history.len(),
            selected_count: state.history.selected_count(),
            prompt: state.prompt.clone(),
            subject_ready: state.subject.is_ready(),
            style_ready: state.style.is_ready(),
            has_result: state.current.is_some(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    fn enter(&self, guard: &OperationGuard<'_>, kind: OperationKind, phase: GenerationPhase) {
        guard.advance(phase);
        self.record(StudioEvent::PhaseEntered {
            operation: kind,
            phase,
        });
    }

    /// Shows `err` in the error modal, logs it, and hands it back.
    fn surface(&self, err: StudioError) -> StudioError {
        let message = err.user_message();
        let kind = err.kind().to_string();
        let event = match &err {
            StudioError::Validation(_) => StudioEvent::OperationRejected {
                kind,
                message: message.clone(),
            },
            StudioError::Remote(RemoteCallError::Status { status, .. }) => {
                StudioEvent::OperationFailed {
                    kind,
                    message: message.clone(),
                    status: Some(*status),
                }
            }
            StudioError::Transcode(_) | StudioError::Remote(_) => StudioEvent::OperationFailed {
                kind,
                message: message.clone(),
                status: None,
            },
        };
        let stale = self
            .lock_state()
            .open_modal(ModalPresentation::text(ERROR_HEADING, message));
        drop(stale);
        self.record(event);
        err
    }

    /// Writes the quota, and the history when given, as one commit.
    fn persist(&self, quota: &QuotaLedger, history: Option<&HistoryStore>) {
        let mut batch = StateBatch::new();
        quota.stage(&mut batch);
        if let Some(history) = history {
            history.stage(&mut batch);
        }
        let result = lock(&self.store).commit(batch);
        if let Err(err) = result {
            self.record(StudioEvent::StatePersistFailed {
                error: format!("{err:#}"),
            });
        }
    }

    fn record(&self, event: StudioEvent) {
        let _ = self.log.record(&event);
    }
}

fn advice_payload(
    state: &SessionState,
    slot: PhotoSlot,
    system_prompt: &str,
    user_prompt: &str,
) -> Option<Value> {
    let photo = state.photo(slot);
    let data = photo.encoded.as_deref()?;
    Some(text_request_payload(
        system_prompt,
        user_prompt,
        InlineImage {
            data,
            mime_type: photo.mime_type(),
        },
    ))
}

/// Checks the generate preconditions in order: subject photo, then quota.
fn generation_payload(state: &SessionState) -> Result<Value, ValidationError> {
    let subject = state
        .subject
        .encoded
        .as_deref()
        .ok_or(ValidationError::MissingSubjectPhoto)?;
    if !state.quota.can_generate() {
        return Err(ValidationError::QuotaExhausted {
            cap: state.quota.cap,
        });
    }
    let style = state.style.encoded.as_deref().map(|data| InlineImage {
        data,
        mime_type: state.style.mime_type(),
    });
    Ok(image_request_payload(
        &compose_generation_prompt(&state.prompt),
        InlineImage {
            data: subject,
            mime_type: state.subject.mime_type(),
        },
        style,
    ))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::json;
    use stylist_contracts::store::{
        MemoryStore, GENERATION_COUNT_KEY, GENERATION_HISTORY_KEY, MAX_GENERATIONS_KEY,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::codec::DISPLAY_SOURCE_PREFIX;
    use crate::export::DirectorySaver;

    type Scripted = Result<Value, RemoteCallError>;

    #[derive(Clone, Default)]
    struct FakeTransport {
        responses: Arc<Mutex<VecDeque<Scripted>>>,
        calls: Arc<Mutex<Vec<(TargetApi, Value)>>>,
    }

    impl FakeTransport {
        fn scripted(responses: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into_iter().collect())),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<(TargetApi, Value)> {
            lock(&self.calls).clone()
        }
    }

    impl ProxyTransport for FakeTransport {
        fn call(&self, target: TargetApi, payload: &Value) -> Result<Value, RemoteCallError> {
            lock(&self.calls).push((target, payload.clone()));
            lock(&self.responses)
                .pop_front()
                .unwrap_or_else(|| Err(RemoteCallError::Transport("no scripted response".into())))
        }
    }

    /// Parks inside `call` until released, so a second operation can race it.
    struct BlockingTransport {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
        calls: Arc<Mutex<usize>>,
        response: Value,
    }

    impl ProxyTransport for BlockingTransport {
        fn call(&self, _target: TargetApi, _payload: &Value) -> Result<Value, RemoteCallError> {
            *lock(&self.calls) += 1;
            let _ = self.entered.send(());
            let _ = lock(&self.release).recv();
            Ok(self.response.clone())
        }
    }

    fn png_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([40, 30, 20]))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    fn image_response() -> anyhow::Result<Value> {
        Ok(json!({"candidates": [{"content": {"parts": [
            {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(png_bytes(64, 48)?)}}
        ]}}]}))
    }

    fn text_response(text: &str) -> Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    struct Fixture {
        temp: TempDir,
        studio: Studio,
    }

    impl Fixture {
        fn new(
            transport: impl ProxyTransport + 'static,
            store: impl KeyValueStore + 'static,
        ) -> anyhow::Result<Self> {
            let temp = tempfile::tempdir()?;
            let log = SessionLog::new(temp.path().join("events.jsonl"), "test-session");
            let studio = Studio::new(Box::new(transport), Box::new(store), log);
            Ok(Self { temp, studio })
        }

        fn photo(&self, name: &str) -> anyhow::Result<PathBuf> {
            let path = self.temp.path().join(name);
            fs::write(&path, png_bytes(8, 8)?)?;
            Ok(path)
        }

        fn with_subject(self) -> anyhow::Result<Self> {
            let path = self.photo("me.png")?;
            self.studio.select_photo(PhotoSlot::Subject, &path)?;
            Ok(self)
        }

        fn event_types(&self) -> anyhow::Result<Vec<String>> {
            self.studio.log().recorded_types()
        }
    }

    /// Memory store that remembers the size of every committed batch.
    #[derive(Clone, Default)]
    struct CountingStore {
        inner: Arc<Mutex<MemoryStore>>,
        commits: Arc<Mutex<Vec<usize>>>,
    }

    impl KeyValueStore for CountingStore {
        fn get(&mut self, key: &str) -> Option<Value> {
            lock(&self.inner).get(key)
        }

        fn commit(&mut self, batch: StateBatch) -> anyhow::Result<()> {
            lock(&self.commits).push(batch.len());
            lock(&self.inner).commit(batch)
        }
    }

    /// Opens before/after on a studio that already has a result and waits for
    /// the first frame.
    fn start_before_after(fx: &Fixture) -> anyhow::Result<()> {
        let (frame_tx, frame_rx) = mpsc::channel::<String>();
        fx.studio.open_before_after(Box::new(move |frame: &str| {
            let _ = frame_tx.send(frame.to_string());
        }))?;
        frame_rx.recv_timeout(Duration::from_secs(5))?;
        assert!(fx.studio.animation_running());
        Ok(())
    }

    fn used_store(used: u64) -> MemoryStore {
        MemoryStore::with_values([
            (GENERATION_COUNT_KEY.to_string(), json!(used)),
            (MAX_GENERATIONS_KEY.to_string(), json!(10)),
        ])
    }

    #[test]
    fn operation_slot_is_single_flight() {
        let slot = OperationSlot::default();
        assert_eq!(slot.phase(), GenerationPhase::Idle);

        let guard = slot.begin(OperationKind::Suggest, ANALYZING_LABEL);
        assert!(guard.is_ok());
        assert_eq!(slot.phase(), GenerationPhase::Validating);
        assert_eq!(
            slot.begin(OperationKind::Generate, GENERATING_LABEL).err(),
            Some(ValidationError::Busy {
                label: ANALYZING_LABEL.to_string()
            })
        );

        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.begin(OperationKind::Generate, GENERATING_LABEL).is_ok());
    }

    #[test]
    fn generate_commits_result_quota_and_history_once() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport.clone(), MemoryStore::new())?.with_subject()?;
        fx.studio.set_prompt("short red bob");

        let result = fx.studio.generate()?;

        assert!(result.data_url().starts_with(DISPLAY_SOURCE_PREFIX));
        assert_eq!(fx.studio.current_result(), Some(result.clone()));
        assert_eq!(fx.studio.history(), vec![result]);
        assert_eq!(fx.studio.quota().used, 1);
        assert!(!fx.studio.is_busy());
        assert_eq!(fx.studio.status().pending, None);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, TargetApi::Image);
        let prompt = calls[0].1["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        assert!(prompt.ends_with("CLIENT REQUEST: short red bob"));

        let phases: Vec<String> = fx
            .event_types()?
            .into_iter()
            .filter(|kind| kind != "photo_selected")
            .collect();
        assert_eq!(
            phases,
            vec![
                "session_started",
                "generation_phase",
                "generation_phase",
                "generation_phase",
                "generation_phase",
                "generation_committed",
            ]
        );
        Ok(())
    }

    #[test]
    fn quota_blocks_generation_without_calling_the_proxy() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?), Ok(image_response()?)]);
        let fx = Fixture::new(transport.clone(), used_store(9))?.with_subject()?;
        fx.studio.set_prompt("curls");
        assert!(fx.studio.ready_to_generate());

        fx.studio.generate()?;
        assert_eq!(fx.studio.quota().used, 10);
        assert!(!fx.studio.ready_to_generate());

        let err = fx.studio.generate().err();
        assert!(matches!(
            err,
            Some(StudioError::Validation(ValidationError::QuotaExhausted { cap: 10 }))
        ));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(fx.studio.quota().used, 10);
        assert_eq!(fx.studio.history().len(), 1);
        assert_eq!(
            fx.studio.modal().map(|modal| modal.heading),
            Some(ERROR_HEADING.to_string())
        );
        Ok(())
    }

    #[test]
    fn missing_subject_photo_is_rejected_before_any_call() -> anyhow::Result<()> {
        let transport = FakeTransport::default();
        let fx = Fixture::new(transport.clone(), MemoryStore::new())?;
        fx.studio.set_prompt("anything");

        let err = fx.studio.generate().err().map(|err| err.user_message());
        assert_eq!(err.as_deref(), Some("Please upload your photo."));
        assert!(transport.calls().is_empty());
        assert!(!fx.studio.is_busy());
        Ok(())
    }

    #[test]
    fn response_without_image_changes_nothing() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(text_response("I cannot do that"))]);
        let fx = Fixture::new(transport, used_store(3))?.with_subject()?;

        let err = fx.studio.generate().err();
        assert!(matches!(
            err,
            Some(StudioError::Remote(RemoteCallError::NoImageReturned))
        ));
        assert_eq!(fx.studio.quota().used, 3);
        assert!(fx.studio.history().is_empty());
        assert_eq!(fx.studio.current_result(), None);
        assert!(!fx.studio.is_busy());

        let modal = fx.studio.modal();
        assert_eq!(modal.as_ref().map(|modal| modal.kind), Some(ModalKind::Text));
        assert!(modal
            .map(|modal| modal.body.contains("no image returned"))
            .unwrap_or(false));
        assert!(fx.event_types()?.contains(&"operation_failed".to_string()));
        Ok(())
    }

    #[test]
    fn proxy_error_message_is_shown_verbatim() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Err(RemoteCallError::Status {
            status: 400,
            message: "API key not valid".to_string(),
        })]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;

        assert!(fx.studio.generate().is_err());
        assert_eq!(
            fx.studio.modal().map(|modal| modal.body),
            Some("API key not valid".to_string())
        );
        Ok(())
    }

    #[test]
    fn unlimited_code_lifts_the_cap_and_freezes_usage() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, used_store(10))?.with_subject()?;
        assert!(fx.studio.generate().is_err());

        assert_eq!(fx.studio.redeem("stilist"), RedeemOutcome::Unlimited);
        assert_eq!(
            fx.studio.modal().map(|modal| modal.heading),
            Some("Success!".to_string())
        );

        fx.studio.generate()?;
        assert_eq!(fx.studio.quota().used, 10);
        assert!(fx.studio.quota().unlimited);
        Ok(())
    }

    #[test]
    fn invalid_code_shows_error_and_keeps_quota() -> anyhow::Result<()> {
        let fx = Fixture::new(FakeTransport::default(), MemoryStore::new())?;
        assert_eq!(fx.studio.redeem("FREE"), RedeemOutcome::Invalid);
        assert_eq!(fx.studio.quota(), QuotaLedger::default());
        assert_eq!(
            fx.studio.modal().map(|modal| modal.heading),
            Some(ERROR_HEADING.to_string())
        );
        Ok(())
    }

    #[test]
    fn second_operation_is_rejected_while_one_is_in_flight() -> anyhow::Result<()> {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let calls = Arc::new(Mutex::new(0usize));
        let transport = BlockingTransport {
            entered: entered_tx,
            release: Mutex::new(release_rx),
            calls: Arc::clone(&calls),
            response: image_response()?,
        };
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        let style = fx.photo("style.png")?;
        fx.studio.select_photo(PhotoSlot::Style, &style)?;
        let studio = Arc::new(fx.studio);

        let worker = {
            let studio = Arc::clone(&studio);
            thread::spawn(move || studio.generate().map(|_| ()))
        };
        entered_rx.recv_timeout(Duration::from_secs(5))?;

        assert!(studio.is_busy());
        assert!(!studio.ready_to_generate());
        assert_eq!(
            studio.status().pending.map(|op| (op.kind, op.phase)),
            Some((OperationKind::Generate, GenerationPhase::Calling))
        );
        for err in [studio.suggest_styles().err(), studio.describe_style().err()] {
            assert!(matches!(
                err,
                Some(StudioError::Validation(ValidationError::Busy { .. }))
            ));
        }
        assert_eq!(*lock(&calls), 1);

        release_tx.send(())?;
        let outcome = worker.join();
        assert!(matches!(outcome, Ok(Ok(()))));
        assert!(!studio.is_busy());
        assert_eq!(studio.quota().used, 1);
        Ok(())
    }

    #[test]
    fn suggestions_open_a_text_modal_with_bullets() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(text_response("* Pixie cut\n* Long layers"))]);
        let fx = Fixture::new(transport.clone(), MemoryStore::new())?.with_subject()?;

        let advice = fx.studio.suggest_styles()?;
        assert_eq!(advice, "* Pixie cut\n* Long layers");

        let modal = fx.studio.modal();
        assert_eq!(
            modal.as_ref().map(|modal| modal.heading.as_str()),
            Some(SUGGESTIONS_HEADING)
        );
        assert_eq!(
            modal.map(|modal| modal.rendered_body()),
            Some("• Pixie cut\n• Long layers".to_string())
        );
        assert_eq!(transport.calls()[0].0, TargetApi::Text);
        assert_eq!(fx.studio.quota().used, 0);
        Ok(())
    }

    #[test]
    fn describe_style_fills_the_prompt() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(text_response("Sleek platinum lob."))]);
        let fx = Fixture::new(transport, MemoryStore::new())?;
        let style = fx.photo("style.png")?;
        fx.studio.select_photo(PhotoSlot::Style, &style)?;
        fx.studio.set_prompt("old text");

        fx.studio.describe_style()?;
        assert_eq!(fx.studio.prompt(), "Sleek platinum lob.");
        assert_eq!(fx.studio.modal(), None);
        Ok(())
    }

    #[test]
    fn advice_without_photo_asks_for_one() -> anyhow::Result<()> {
        let transport = FakeTransport::default();
        let fx = Fixture::new(transport.clone(), MemoryStore::new())?;

        for err in [fx.studio.suggest_styles().err(), fx.studio.describe_style().err()] {
            assert_eq!(
                err.map(|err| err.user_message()).as_deref(),
                Some("Please upload a photo first.")
            );
        }
        assert!(transport.calls().is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_photo_keeps_previous_slot() -> anyhow::Result<()> {
        let fx = Fixture::new(FakeTransport::default(), MemoryStore::new())?.with_subject()?;
        let before = fx.studio.photo(PhotoSlot::Subject);

        let missing = fx.temp.path().join("gone.jpg");
        assert!(matches!(
            fx.studio.select_photo(PhotoSlot::Subject, &missing),
            Err(StudioError::Transcode(_))
        ));
        assert_eq!(fx.studio.photo(PhotoSlot::Subject), before);
        assert!(fx.event_types()?.contains(&"photo_rejected".to_string()));
        Ok(())
    }

    #[test]
    fn reset_clears_session_but_keeps_quota() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.set_prompt("braids");
        fx.studio.generate()?;
        assert_eq!(fx.studio.toggle_selection(0), Some(true));
        fx.studio.show_history_item(0)?;

        fx.studio.reset();

        let status = fx.studio.status();
        assert!(!status.subject_ready && !status.style_ready && !status.has_result);
        assert_eq!(status.prompt, "");
        assert_eq!(status.history_len, 0);
        assert_eq!(status.selected_count, 0);
        assert_eq!(status.quota.used, 1);
        assert_eq!(fx.studio.photo(PhotoSlot::Subject), PhotoInput::default());
        assert_eq!(fx.studio.modal(), None);

        let types = fx.event_types()?;
        assert!(types.ends_with(&["history_cleared".to_string(), "session_reset".to_string()]));
        Ok(())
    }

    #[test]
    fn export_saves_selected_history_items() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?), Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;
        fx.studio.set_prompt("waves");
        fx.studio.generate()?;

        assert_eq!(fx.studio.toggle_selection(1), Some(true));
        assert!(fx.studio.is_selected(1));
        assert_eq!(fx.studio.toggle_selection(7), None);

        let mut saver = DirectorySaver::new(fx.temp.path().join("exports"));
        let saved = fx.studio.export_selected(&mut saver)?;
        assert_eq!(saved.len(), 1);
        let name = saved[0]
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        assert!(name.starts_with("miss-slivki-ai-style-") && name.ends_with("-1.png"));
        assert!(image::open(&saved[0]).is_ok());
        Ok(())
    }

    #[test]
    fn history_item_requires_an_entry() -> anyhow::Result<()> {
        let fx = Fixture::new(FakeTransport::default(), MemoryStore::new())?;
        assert!(matches!(
            fx.studio.show_history_item(0),
            Err(StudioError::Validation(ValidationError::NothingToShow))
        ));
        Ok(())
    }

    #[test]
    fn before_after_runs_until_the_modal_closes() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        assert!(fx.studio.open_before_after(Box::new(|_: &str| {})).is_err());

        fx.studio.generate()?;
        let (frame_tx, frame_rx) = mpsc::channel::<String>();
        fx.studio.open_before_after(Box::new(move |frame: &str| {
            let _ = frame_tx.send(frame.to_string());
        }))?;

        let first = frame_rx.recv_timeout(Duration::from_secs(5))?;
        assert!(first.starts_with("data:image/png;base64,"));
        assert!(fx.studio.animation_running());
        assert_eq!(
            fx.studio.modal().map(|modal| modal.kind),
            Some(ModalKind::Animation)
        );

        fx.studio.close_modal();
        assert!(!fx.studio.animation_running());
        assert_eq!(fx.studio.modal(), None);
        Ok(())
    }

    #[test]
    fn new_result_stops_before_after() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?), Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;
        start_before_after(&fx)?;

        fx.studio.generate()?;
        assert!(!fx.studio.animation_running());
        assert_eq!(fx.studio.modal(), None);
        Ok(())
    }

    #[test]
    fn new_subject_photo_stops_before_after_and_closes_it() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;
        start_before_after(&fx)?;

        let style = fx.photo("style.png")?;
        fx.studio.select_photo(PhotoSlot::Style, &style)?;
        assert!(fx.studio.animation_running());

        let other = fx.photo("other.png")?;
        fx.studio.select_photo(PhotoSlot::Subject, &other)?;
        assert!(!fx.studio.animation_running());
        assert_eq!(fx.studio.modal(), None);
        Ok(())
    }

    #[test]
    fn failing_operation_replaces_before_after_with_the_error() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;
        start_before_after(&fx)?;

        assert!(matches!(
            fx.studio.suggest_styles(),
            Err(StudioError::Remote(RemoteCallError::Transport(_)))
        ));
        assert!(!fx.studio.animation_running());
        assert_eq!(
            fx.studio.modal().map(|modal| (modal.kind, modal.heading)),
            Some((ModalKind::Text, ERROR_HEADING.to_string()))
        );
        Ok(())
    }

    #[test]
    fn reset_stops_before_after() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;
        start_before_after(&fx)?;

        fx.studio.reset();
        assert!(!fx.studio.animation_running());
        assert_eq!(fx.studio.modal(), None);
        Ok(())
    }

    #[test]
    fn reopening_before_after_replaces_the_ticker() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;

        let (first_tx, first_rx) = mpsc::channel::<String>();
        fx.studio.open_before_after(Box::new(move |frame: &str| {
            let _ = first_tx.send(frame.to_string());
        }))?;
        first_rx.recv_timeout(Duration::from_secs(5))?;

        let (second_tx, second_rx) = mpsc::channel::<String>();
        fx.studio.open_before_after(Box::new(move |frame: &str| {
            let _ = second_tx.send(frame.to_string());
        }))?;

        // The old ticker has been joined, so its renderer is gone.
        while first_rx.try_recv().is_ok() {}
        assert!(matches!(
            first_rx.recv_timeout(Duration::from_secs(1)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
        second_rx.recv_timeout(Duration::from_secs(5))?;
        assert!(fx.studio.animation_running());
        assert_eq!(
            fx.studio.modal().map(|modal| modal.kind),
            Some(ModalKind::Animation)
        );
        Ok(())
    }

    #[test]
    fn select_never_deselects() -> anyhow::Result<()> {
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, MemoryStore::new())?.with_subject()?;
        fx.studio.generate()?;

        assert_eq!(fx.studio.select(0), Some(true));
        assert_eq!(fx.studio.select(0), Some(false));
        assert!(fx.studio.is_selected(0));
        assert_eq!(fx.studio.select(3), None);
        Ok(())
    }

    #[test]
    fn commit_writes_quota_and_history_together() -> anyhow::Result<()> {
        let store = CountingStore::default();
        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let fx = Fixture::new(transport, store.clone())?.with_subject()?;

        fx.studio.generate()?;

        assert_eq!(*lock(&store.commits), vec![4]);
        let rows = lock(&store.inner).get(GENERATION_HISTORY_KEY);
        assert_eq!(rows.and_then(|rows| rows.as_array().map(Vec::len)), Some(1));
        assert_eq!(lock(&store.inner).get(GENERATION_COUNT_KEY), Some(json!(1)));
        Ok(())
    }

    #[test]
    fn state_survives_a_restart() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state_path = temp.path().join("state.json");
        let photo = temp.path().join("me.png");
        fs::write(&photo, png_bytes(8, 8)?)?;
        let log = || SessionLog::new(temp.path().join("events.jsonl"), "s");

        let transport = FakeTransport::scripted([Ok(image_response()?)]);
        let first = Studio::new(
            Box::new(transport),
            Box::new(JsonFileStore::new(&state_path)),
            log(),
        );
        first.select_photo(PhotoSlot::Subject, &photo)?;
        first.redeem("TEST30");
        let result = first.generate()?;
        drop(first);

        let second = Studio::new(
            Box::new(FakeTransport::default()),
            Box::new(JsonFileStore::new(&state_path)),
            log(),
        );
        assert_eq!(
            second.quota(),
            QuotaLedger {
                used: 1,
                cap: 40,
                unlimited: false
            }
        );
        assert_eq!(second.history(), vec![result]);
        assert_eq!(second.current_result(), None);
        Ok(())
    }
}
