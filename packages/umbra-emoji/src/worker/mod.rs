//! # Background Loading Coordinator
//!
//! Runs dataset imports on a background worker so the caller's task never
//! waits on the network, and falls back to importing inline when no worker
//! can be had.
//!
//! ## State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        COORDINATOR STATES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Uninitialized                                                         │
//! │       │ initialize()                                                   │
//! │       ▼                                                                 │
//! │  Spawning ──── spawn fails ─────────────┐                              │
//! │       │                                  │                              │
//! │       ├──── no ready ack in time ───────┤                              │
//! │       │                                  ▼                              │
//! │       │ ready ack                    Degraded                          │
//! │       ▼                              (imports run inline,              │
//! │     Ready                             initial sequence replayed)       │
//! │  (imports sent as                                                      │
//! │   fire-and-forget commands)                                            │
//! │                                                                         │
//! │  Initial sequence: custom, current locale, en (if different)           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The worker owns its own [`Loader`] and a private [`LoadedLocales`]; it
//! shares nothing with the coordinator but the database file and reports
//! every finished import back as a [`WorkerEvent`].

mod protocol;

pub use protocol::{SpawnedWorker, WorkerCommand, WorkerEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::locale::{ImportGuard, LoadedLocales, Locale, LocaleOrCustom, DEFAULT_LOCALE};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// `initialize` not called yet
    Uninitialized,
    /// Waiting for the worker to report ready
    Spawning,
    /// Imports go to the worker
    Ready,
    /// Imports run inline
    Degraded,
}

/// Starts background workers
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker running imports with `loader` and reporting on `events`
    fn spawn(
        &self,
        loader: Loader,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<SpawnedWorker>;
}

/// Spawns the worker as a task on the current tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioWorkerSpawner;

impl WorkerSpawner for TokioWorkerSpawner {
    fn spawn(
        &self,
        loader: Loader,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<SpawnedWorker> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::WorkerUnavailable(e.to_string()))?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready) = oneshot::channel();
        runtime.spawn(run_worker(loader, command_rx, events, ready_tx));

        Ok(SpawnedWorker { commands, ready })
    }
}

/// Worker event loop
async fn run_worker(
    loader: Loader,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    ready: oneshot::Sender<()>,
) {
    tracing::info!("Emoji worker started");
    let _ = ready.send(());

    while let Some(command) = commands.recv().await {
        let key = match command {
            WorkerCommand::Load(key) => key,
            WorkerCommand::Shutdown => break,
        };

        let event = match loader.load(key).await {
            Ok(outcome) => {
                tracing::debug!("Worker finished {} import: {:?}", key, outcome);
                WorkerEvent::Loaded(key)
            }
            Err(e) => {
                tracing::warn!("Worker failed to import {}: {}", key, e);
                WorkerEvent::Failed {
                    key,
                    error: e.to_string(),
                }
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }

    tracing::info!("Emoji worker stopped");
}

/// Callback run after a partition finished loading
pub type LoadedListener = Arc<dyn Fn(LocaleOrCustom) + Send + Sync>;

/// In-flight markers held on the coordinator side for commands sent to the
/// worker, released when the matching event comes back
type PendingImports = Arc<Mutex<HashMap<LocaleOrCustom, Vec<ImportGuard>>>>;

/// Background loading coordinator
pub struct LoadCoordinator {
    loader: Loader,
    spawner: Arc<dyn WorkerSpawner>,
    timeout: Duration,
    state: Mutex<CoordinatorState>,
    worker: Mutex<Option<mpsc::UnboundedSender<WorkerCommand>>>,
    pending: PendingImports,
    listener: Option<LoadedListener>,
}

impl LoadCoordinator {
    /// Create a coordinator; `loader` is used for inline imports and its
    /// loaded-locale set is the one updated from worker events
    pub fn new(loader: Loader, spawner: Arc<dyn WorkerSpawner>, timeout: Duration) -> Self {
        Self {
            loader,
            spawner,
            timeout,
            state: Mutex::new(CoordinatorState::Uninitialized),
            worker: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            listener: None,
        }
    }

    /// Run `listener` whenever a partition finishes loading
    pub fn on_loaded(mut self, listener: LoadedListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Current state
    pub fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    fn set_state(&self, state: CoordinatorState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::info!("Emoji loader {:?} → {:?}", previous, state);
        }
    }

    fn loaded(&self) -> &LoadedLocales {
        self.loader.database().loaded()
    }

    /// Start the worker and kick off the initial imports.
    ///
    /// Never fails: an unavailable or unresponsive worker leaves the
    /// coordinator `Degraded` with the initial sequence already run inline.
    pub async fn initialize(&self, current_locale: Locale) -> CoordinatorState {
        if self.state() != CoordinatorState::Uninitialized {
            tracing::warn!("Emoji loader already initialized");
            return self.state();
        }
        self.set_state(CoordinatorState::Spawning);

        let initial = initial_sequence(current_locale);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker_loader = self
            .loader
            .with_database(self.loader.database().with_loaded(LoadedLocales::new()));

        let worker = match self.spawner.spawn(worker_loader, event_tx) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!("Emoji worker unavailable, loading inline: {}", e);
                self.degrade(&initial).await;
                return self.state();
            }
        };

        match self.await_ready(worker.ready).await {
            Ok(()) => {
                tokio::spawn(forward_events(
                    event_rx,
                    self.loaded().clone(),
                    self.pending.clone(),
                    self.listener.clone(),
                ));
                *self.worker.lock() = Some(worker.commands);
                self.set_state(CoordinatorState::Ready);

                for key in initial {
                    if let Err(e) = self.send(key) {
                        tracing::warn!("Failed to queue {} import: {}", key, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}, loading inline", e);
                // Dropping the command sender lets a late worker wind down
                drop(worker.commands);
                self.degrade(&initial).await;
            }
        }

        self.state()
    }

    /// Wait for the worker's ready acknowledgement, at most `timeout`
    async fn await_ready(&self, ready: oneshot::Receiver<()>) -> Result<()> {
        match tokio::time::timeout(self.timeout, ready).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::WorkerUnavailable(
                "emoji worker exited before becoming ready".to_string(),
            )),
            Err(_) => Err(Error::Timeout(format!(
                "emoji worker not ready after {:?}",
                self.timeout
            ))),
        }
    }

    /// Load a locale after initialization, on the worker when it is ready
    /// and inline otherwise.
    pub async fn load_locale(&self, locale: Locale) -> Result<()> {
        if self.state() == CoordinatorState::Ready {
            match self.send(locale.into()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Emoji worker gone, loading inline: {}", e);
                    self.worker.lock().take();
                    self.set_state(CoordinatorState::Degraded);
                }
            }
        }

        self.loader.import_locale(locale, true).await?;
        self.notify(locale.into());
        Ok(())
    }

    /// Stop the worker, if any
    pub fn shutdown(&self) {
        if let Some(commands) = self.worker.lock().take() {
            let _ = commands.send(WorkerCommand::Shutdown);
        }
    }

    fn send(&self, key: LocaleOrCustom) -> Result<()> {
        let worker = self.worker.lock();
        let commands = worker
            .as_ref()
            .ok_or_else(|| Error::WorkerUnavailable("no worker".into()))?;

        // Registered before sending so the worker's event always finds it
        let guard = self.loaded().begin_import(key);
        self.pending.lock().entry(key).or_default().push(guard);

        if commands.send(WorkerCommand::Load(key)).is_err() {
            if let Some(guards) = self.pending.lock().get_mut(&key) {
                guards.pop();
            }
            return Err(Error::WorkerUnavailable("worker channel closed".into()));
        }
        Ok(())
    }

    async fn degrade(&self, initial: &[LocaleOrCustom]) {
        self.set_state(CoordinatorState::Degraded);
        for key in initial {
            match self.loader.load(*key).await {
                Ok(_) => self.notify(*key),
                Err(e) => tracing::warn!("Inline import of {} failed: {}", key, e),
            }
        }
    }

    fn notify(&self, key: LocaleOrCustom) {
        if let Some(listener) = &self.listener {
            listener(key);
        }
    }
}

impl Drop for LoadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Custom set, the current locale, then `en` when different
fn initial_sequence(current_locale: Locale) -> Vec<LocaleOrCustom> {
    let mut sequence = vec![LocaleOrCustom::Custom, current_locale.into()];
    if current_locale != DEFAULT_LOCALE {
        sequence.push(DEFAULT_LOCALE.into());
    }
    sequence
}

/// Apply worker events to the coordinator-side state
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    loaded: LoadedLocales,
    pending: PendingImports,
    listener: Option<LoadedListener>,
) {
    while let Some(event) = events.recv().await {
        let key = event.key();
        match &event {
            WorkerEvent::Loaded(LocaleOrCustom::Locale(locale)) => loaded.mark_loaded(*locale),
            WorkerEvent::Loaded(LocaleOrCustom::Custom) => {
                tracing::debug!("Custom emoji loaded by worker");
            }
            WorkerEvent::Failed { error, .. } => {
                tracing::warn!("Background import of {} failed: {}", key, error);
            }
        }

        if let Some(guards) = pending.lock().get_mut(&key) {
            guards.pop();
        }
        if let (WorkerEvent::Loaded(_), Some(listener)) = (&event, &listener) {
            listener(key);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{english_dataset, loader_with, MockFetcher};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSpawner;

    impl WorkerSpawner for FailingSpawner {
        fn spawn(
            &self,
            _loader: Loader,
            _events: mpsc::UnboundedSender<WorkerEvent>,
        ) -> Result<SpawnedWorker> {
            Err(Error::WorkerUnavailable("workers disabled".into()))
        }
    }

    /// Spawns a worker that never acknowledges
    #[derive(Default)]
    struct SilentSpawner {
        ready: Mutex<Vec<oneshot::Sender<()>>>,
        commands: Mutex<Vec<mpsc::UnboundedReceiver<WorkerCommand>>>,
    }

    impl WorkerSpawner for SilentSpawner {
        fn spawn(
            &self,
            _loader: Loader,
            _events: mpsc::UnboundedSender<WorkerEvent>,
        ) -> Result<SpawnedWorker> {
            let (commands, command_rx) = mpsc::unbounded_channel();
            let (ready_tx, ready) = oneshot::channel();
            self.ready.lock().push(ready_tx);
            self.commands.lock().push(command_rx);
            Ok(SpawnedWorker { commands, ready })
        }
    }

    fn fetcher_for(loader: &Loader, fetcher: &MockFetcher) {
        fetcher.respond(&loader.custom_emoji_url(), json!([]), None);
        fetcher.respond(&loader.locale_url(DEFAULT_LOCALE), english_dataset(), None);
        fetcher.respond(&loader.shortcodes_url(DEFAULT_LOCALE), json!({}), None);
    }

    fn setup() -> (Loader, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::default());
        let loader = loader_with(fetcher.clone());
        fetcher_for(&loader, &fetcher);
        (loader, fetcher)
    }

    async fn wait_for(loaded: &LoadedLocales, locale: Locale) -> bool {
        for _ in 0..200 {
            if loaded.contains(locale) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_initial_sequence() {
        let fr = Locale::parse("fr").unwrap();
        assert_eq!(
            initial_sequence(fr),
            vec![LocaleOrCustom::Custom, fr.into(), DEFAULT_LOCALE.into()]
        );
        assert_eq!(
            initial_sequence(DEFAULT_LOCALE),
            vec![LocaleOrCustom::Custom, DEFAULT_LOCALE.into()]
        );
    }

    #[test]
    fn test_tokio_spawner_needs_runtime() {
        let (loader, _) = setup();
        let (events, _rx) = mpsc::unbounded_channel();
        let err = TokioWorkerSpawner.spawn(loader, events).unwrap_err();
        assert!(matches!(err, Error::WorkerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure_degrades_and_loads_inline() {
        let (loader, fetcher) = setup();
        let loaded = loader.database().loaded().clone();
        let coordinator =
            LoadCoordinator::new(loader, Arc::new(FailingSpawner), Duration::from_secs(1));

        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        let state = coordinator.initialize(DEFAULT_LOCALE).await;

        assert_eq!(state, CoordinatorState::Degraded);
        assert!(loaded.contains(DEFAULT_LOCALE));
        // custom + compact + shortcodes
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_ready_timeout_degrades_and_replays() {
        let (loader, _) = setup();
        let loaded = loader.database().loaded().clone();
        let spawner = Arc::new(SilentSpawner::default());
        let coordinator =
            LoadCoordinator::new(loader, spawner.clone(), Duration::from_millis(20));

        let state = coordinator.initialize(DEFAULT_LOCALE).await;
        assert_eq!(state, CoordinatorState::Degraded);
        assert!(loaded.contains(DEFAULT_LOCALE));

        // A late acknowledgement is ignored
        for ready in spawner.ready.lock().drain(..) {
            let _ = ready.send(());
        }
        assert_eq!(coordinator.state(), CoordinatorState::Degraded);
    }

    #[tokio::test]
    async fn test_await_ready_errors() {
        let (loader, _) = setup();
        let coordinator = LoadCoordinator::new(
            loader,
            Arc::new(SilentSpawner::default()),
            Duration::from_millis(10),
        );

        let (_tx, rx) = oneshot::channel();
        let err = coordinator.await_ready(rx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_recoverable());

        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let err = coordinator.await_ready(rx).await.unwrap_err();
        assert!(matches!(err, Error::WorkerUnavailable(_)));

        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        assert!(coordinator.await_ready(rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_prompt_ack_reaches_ready() {
        let (loader, _) = setup();
        let loaded = loader.database().loaded().clone();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let coordinator = LoadCoordinator::new(
            loader.clone(),
            Arc::new(TokioWorkerSpawner),
            Duration::from_secs(1),
        )
        .on_loaded(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let state = coordinator.initialize(DEFAULT_LOCALE).await;
        assert_eq!(state, CoordinatorState::Ready);

        // The worker reports back and the coordinator-side set follows
        assert!(wait_for(&loaded, DEFAULT_LOCALE).await);
        assert!(loader.database().count_rows(DEFAULT_LOCALE).unwrap() > 0);
        for _ in 0..200 {
            if notified.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert!(!loaded.is_importing(LocaleOrCustom::Custom));
    }

    #[tokio::test]
    async fn test_load_locale_routes_to_worker() {
        let (loader, fetcher) = setup();
        let de = Locale::parse("de").unwrap();
        fetcher.respond(&loader.locale_url(de), english_dataset(), None);
        fetcher.respond(&loader.shortcodes_url(de), json!({}), None);
        let loaded = loader.database().loaded().clone();

        let coordinator =
            LoadCoordinator::new(loader, Arc::new(TokioWorkerSpawner), Duration::from_secs(1));
        coordinator.initialize(DEFAULT_LOCALE).await;

        coordinator.load_locale(de).await.unwrap();
        assert!(wait_for(&loaded, de).await);
    }

    #[tokio::test]
    async fn test_degraded_load_locale_surfaces_errors() {
        let (loader, fetcher) = setup();
        let de = Locale::parse("de").unwrap();
        fetcher.fail(&loader.locale_url(de), 503);

        let coordinator =
            LoadCoordinator::new(loader, Arc::new(FailingSpawner), Duration::from_secs(1));
        coordinator.initialize(DEFAULT_LOCALE).await;

        let err = coordinator.load_locale(de).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_initialize_twice_is_noop() {
        let (loader, fetcher) = setup();
        let coordinator =
            LoadCoordinator::new(loader, Arc::new(FailingSpawner), Duration::from_secs(1));
        coordinator.initialize(DEFAULT_LOCALE).await;
        let calls = fetcher.calls();

        assert_eq!(coordinator.initialize(DEFAULT_LOCALE).await, CoordinatorState::Degraded);
        assert_eq!(fetcher.calls(), calls);
    }
}
