//! Mapping engine task with statum state machine
//!
//! All access to the store and the runtime flags goes through one tokio task.
//! Device inputs and management requests share a single mpsc queue and are
//! served strictly in the order they were sent; every request is answered
//! over its own oneshot channel. The engine therefore has exactly one writer,
//! whatever the number of callers.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//!  (create)        (load session)  (loop)     (final save)
//! ```
//!
//! # Architecture
//!
//! ```text
//! ControlInput ──┐
//!                ├──► queue ──► [EngineTask<Active>] ──► Notifier (events)
//! EngineRequest ─┘                     │
//!        ▲                             ▼
//!        └──── oneshot reply    MappingRepository (load/save)
//! ```

use crate::controller::{Control, ControlInput};
use crate::events::{EngineEvent, Notifier};
use crate::learning::{CompletionOptions, DefaultSettings, LearnKind, LearningError, LearningState};
use crate::mapping::adapter::{CommandAdapter, TargetAdapter};
use crate::mapping::engine::DispatchReport;
use crate::mapping::error::{HandleError, StoreError};
use crate::mapping::manager::MappingEngineManager;
use crate::mapping::types::{Mapping, MappingId, MappingPatch, MappingType, Target, WidgetTarget};
use crate::persistence::{MappingRepository, MappingSnapshot};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<T>;

/// Predicate telling whether a host node still exists.
pub type NodeExists = Box<dyn Fn(&str) -> bool + Send>;

/// Single-field edits of an existing mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingEdit {
    Range { min: Option<f64>, max: Option<f64> },
    Type(MappingType),
    StepSize(Option<f64>),
    Inverted(bool),
}

/// Requests served by the engine task
pub enum EngineRequest {
    Dispatch { input: ControlInput, reply: Reply<DispatchReport> },
    AddMapping { mapping: Mapping, reply: Reply<Result<MappingId, StoreError>> },
    UpdateMapping { id: MappingId, patch: MappingPatch, reply: Reply<Result<(), StoreError>> },
    EditMapping { id: MappingId, edit: MappingEdit, reply: Reply<Result<(), StoreError>> },
    DeleteMapping { id: MappingId, reply: Reply<Result<Mapping, StoreError>> },
    GetMapping { id: MappingId, reply: Reply<Option<Mapping>> },
    /// `None` lists the active profile
    ListMappings { profile: Option<String>, reply: Reply<Vec<Mapping>> },
    MappingsForTarget { target: Target, reply: Reply<Vec<Mapping>> },
    SetActiveProfile { profile: String, reply: Reply<()> },
    ActiveProfile { reply: Reply<String> },
    AvailableProfiles { reply: Reply<Vec<String>> },
    PruneWidgetTargets { node_exists: NodeExists, reply: Reply<Vec<MappingId>> },
    StartLearning { kind: LearnKind, target: Target, reply: Reply<()> },
    StartQuickLearning { widget: WidgetTarget, defaults: Option<DefaultSettings>, reply: Reply<()> },
    SelectControl { control: Control, reply: Reply<Result<(), LearningError>> },
    CompleteLearning { options: CompletionOptions, reply: Reply<Result<MappingId, LearningError>> },
    CancelLearning { reply: Reply<bool> },
    LearningState { reply: Reply<LearningState> },
    Snapshot { reply: Reply<MappingSnapshot> },
    Save { reply: Reply<Result<(), String>> },
}

/// One entry of the engine queue
pub enum EngineMessage {
    Input(ControlInput),
    Request(EngineRequest),
}

/// Queue size and timing of the engine task
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Shared by inputs and requests
    pub queue_capacity: usize,
    /// `None` disables periodic saving; the final save on shutdown still runs
    pub autosave_interval: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            autosave_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// States for the engine task lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum EngineTaskState {
    Initializing, // Channels and collaborators wired
    Configured,   // Session loaded into the store
    Active,       // Serving inputs and requests
    Deactivating, // Final save in progress
    Deactivated,  // Fully stopped
}

#[machine]
pub struct EngineTask<S: EngineTaskState> {
    manager: MappingEngineManager,
    repository: Arc<dyn MappingRepository>,
    notifier: Notifier,
    queue_rx: mpsc::Receiver<EngineMessage>,
    autosave_interval: Option<Duration>,
    cancel: CancellationToken,
}

impl<S: EngineTaskState> EngineTask<S> {
    /// Writes the current snapshot if anything changed since the last save.
    async fn save(&mut self) -> Result<(), String> {
        let snapshot = self.manager.engine().snapshot();
        let count = snapshot.mappings.len();
        let repository = self.repository.clone();

        match repository.save(&snapshot).await {
            Ok(()) => {
                self.manager.engine_mut().mark_saved();
                self.notifier.emit(EngineEvent::MappingsSaved {
                    session: repository.session().to_string(),
                    count,
                });
                Ok(())
            }
            Err(e) => {
                error!("Failed to save mappings: {}", e);
                Err(e.to_string())
            }
        }
    }
}

impl EngineTask<Initializing> {
    pub fn create(
        manager: MappingEngineManager,
        repository: Arc<dyn MappingRepository>,
        notifier: Notifier,
        queue_rx: mpsc::Receiver<EngineMessage>,
        autosave_interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        info!("Initializing engine task for session {}", repository.session());

        Self::new(
            manager,
            repository,
            notifier,
            queue_rx,
            autosave_interval,
            cancel,
        )
    }

    /// Loads the session into the store and transitions to Configured.
    ///
    /// A session that cannot be read leaves the store empty; the engine
    /// still starts.
    pub async fn configure(mut self) -> EngineTask<Configured> {
        let repository = self.repository.clone();

        match repository.load().await {
            Ok(Some(snapshot)) => {
                let count = self.manager.engine_mut().restore(snapshot);
                self.notifier.emit(EngineEvent::MappingsLoaded {
                    session: repository.session().to_string(),
                    count,
                });
            }
            Ok(None) => {
                info!("No saved mappings for session {}", repository.session());
            }
            Err(e) => {
                warn!(
                    "Could not load session {}, starting empty: {}",
                    repository.session(),
                    e
                );
            }
        }

        self.transition()
    }
}

impl EngineTask<Configured> {
    pub fn activate(self) -> EngineTask<Active> {
        info!("Activating engine task");
        self.transition()
    }
}

enum Wake {
    Input(ControlInput),
    Request(EngineRequest),
    Autosave,
    Closed,
    Stop,
}

impl EngineTask<Active> {
    /// Main loop; runs until the cancellation token fires or the queue is
    /// closed.
    pub async fn run_until_shutdown(mut self) -> EngineTask<Deactivating> {
        info!("Starting engine loop");

        let period = self.autosave_interval.unwrap_or(Duration::from_secs(3600));
        let autosave_enabled = self.autosave_interval.is_some();
        let mut autosave = interval_at(Instant::now() + period, period);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Stop,
                _ = autosave.tick(), if autosave_enabled => Wake::Autosave,
                message = self.queue_rx.recv() => match message {
                    Some(EngineMessage::Input(input)) => Wake::Input(input),
                    Some(EngineMessage::Request(request)) => Wake::Request(request),
                    None => Wake::Closed,
                },
            };

            match wake {
                Wake::Input(input) => {
                    self.manager.handle_input(&input);
                }
                Wake::Request(request) => self.handle_request(request).await,
                Wake::Autosave => {
                    if self.manager.engine().is_dirty() {
                        debug!("Autosaving mappings");
                        let _ = self.save().await;
                    }
                }
                Wake::Closed => {
                    info!("Engine queue closed");
                    break;
                }
                Wake::Stop => {
                    info!("Shutdown signal received for engine task");
                    break;
                }
            }
        }

        info!("Transitioning to Deactivating state");
        self.transition()
    }

    async fn handle_request(&mut self, request: EngineRequest) {
        // A dropped reply receiver only means the caller stopped waiting
        match request {
            EngineRequest::Dispatch { input, reply } => {
                let _ = reply.send(self.manager.handle_input(&input));
            }
            EngineRequest::AddMapping { mapping, reply } => {
                let _ = reply.send(self.manager.engine_mut().add_mapping(mapping));
            }
            EngineRequest::UpdateMapping { id, patch, reply } => {
                let _ = reply.send(self.manager.engine_mut().update_mapping(&id, patch));
            }
            EngineRequest::EditMapping { id, edit, reply } => {
                let engine = self.manager.engine_mut();
                let result = match edit {
                    MappingEdit::Range { min, max } => engine.set_range(&id, min, max),
                    MappingEdit::Type(mapping_type) => engine.set_mapping_type(&id, mapping_type),
                    MappingEdit::StepSize(step) => engine.set_step_size(&id, step),
                    MappingEdit::Inverted(inverted) => engine.set_inverted(&id, inverted),
                };
                let _ = reply.send(result);
            }
            EngineRequest::DeleteMapping { id, reply } => {
                let _ = reply.send(self.manager.engine_mut().delete_mapping(&id));
            }
            EngineRequest::GetMapping { id, reply } => {
                let _ = reply.send(self.manager.engine().mapping(&id).cloned());
            }
            EngineRequest::ListMappings { profile, reply } => {
                let engine = self.manager.engine();
                let mappings = match profile {
                    Some(profile) => engine.mappings_for_profile(&profile),
                    None => engine.mappings(),
                };
                let _ = reply.send(mappings.into_iter().cloned().collect());
            }
            EngineRequest::MappingsForTarget { target, reply } => {
                let mappings = self.manager.engine().mappings_for_target(&target);
                let _ = reply.send(mappings.into_iter().cloned().collect());
            }
            EngineRequest::SetActiveProfile { profile, reply } => {
                self.manager.engine_mut().set_active_profile(profile);
                let _ = reply.send(());
            }
            EngineRequest::ActiveProfile { reply } => {
                let _ = reply.send(self.manager.engine().active_profile().to_string());
            }
            EngineRequest::AvailableProfiles { reply } => {
                let _ = reply.send(self.manager.engine().available_profiles());
            }
            EngineRequest::PruneWidgetTargets { node_exists, reply } => {
                let removed = self.manager.engine_mut().prune_widget_targets(node_exists);
                let _ = reply.send(removed);
            }
            EngineRequest::StartLearning { kind, target, reply } => {
                self.manager.start_learning(kind, target);
                let _ = reply.send(());
            }
            EngineRequest::StartQuickLearning {
                widget,
                defaults,
                reply,
            } => {
                match defaults {
                    Some(defaults) => self.manager.start_quick_learning_with(widget, defaults),
                    None => self.manager.start_quick_learning(widget),
                }
                let _ = reply.send(());
            }
            EngineRequest::SelectControl { control, reply } => {
                let _ = reply.send(self.manager.select_control(control));
            }
            EngineRequest::CompleteLearning { options, reply } => {
                let _ = reply.send(self.manager.complete_learning(options));
            }
            EngineRequest::CancelLearning { reply } => {
                let _ = reply.send(self.manager.cancel_learning());
            }
            EngineRequest::LearningState { reply } => {
                let _ = reply.send(self.manager.learning_state());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.manager.engine().snapshot());
            }
            EngineRequest::Save { reply } => {
                let result = self.save().await;
                let _ = reply.send(result);
            }
        }
    }
}

impl EngineTask<Deactivating> {
    /// Ends any learning session, saves pending changes and transitions to
    /// Deactivated.
    pub async fn shutdown(mut self) -> EngineTask<Deactivated> {
        info!("Shutting down engine task");

        self.manager.cancel_learning();
        if self.manager.engine().is_dirty() {
            if let Err(e) = self.save().await {
                warn!("Final save failed: {}", e);
            }
        }

        info!("Engine task shut down successfully");
        self.transition()
    }
}

impl EngineTask<Deactivated> {}

/// Handle for the engine task
///
/// Cheap to share by reference; every method is a message to the task.
/// Dropping the handle stops the task.
pub struct MappingEngineHandle {
    queue_tx: mpsc::Sender<EngineMessage>,
    notifier: Notifier,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl MappingEngineHandle {
    /// Loads the session, then starts the engine loop in a tokio task.
    pub async fn spawn(
        targets: Box<dyn TargetAdapter>,
        commands: Box<dyn CommandAdapter>,
        repository: Arc<dyn MappingRepository>,
        notifier: Notifier,
        options: EngineOptions,
    ) -> Result<Self, HandleError> {
        if options.queue_capacity == 0 {
            return Err(HandleError::InitializationError(
                "Queue capacity must be positive".to_string(),
            ));
        }

        let (queue_tx, queue_rx) = mpsc::channel(options.queue_capacity);
        let cancel = CancellationToken::new();

        let manager = MappingEngineManager::new(targets, commands, notifier.clone());
        let task = EngineTask::create(
            manager,
            repository,
            notifier.clone(),
            queue_rx,
            options.autosave_interval,
            cancel.clone(),
        )
        .configure()
        .await
        .activate();

        let task_handle = tokio::spawn(async move {
            debug!("Spawning running engine task");
            let deactivating = task.run_until_shutdown().await;
            let _ = deactivating.shutdown().await;
        });

        info!("Mapping engine started");
        Ok(Self {
            queue_tx,
            notifier,
            cancel,
            task_handle: Some(task_handle),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Queues a device input, waiting for room in the queue.
    pub async fn send_input(&self, input: ControlInput) -> Result<(), HandleError> {
        self.queue_tx
            .send(EngineMessage::Input(input))
            .await
            .map_err(|e| HandleError::ChannelError(format!("Failed to queue input: {}", e)))
    }

    /// Queues a device input without waiting; fails if the queue is full.
    pub fn try_send_input(&self, input: ControlInput) -> Result<(), HandleError> {
        self.queue_tx
            .try_send(EngineMessage::Input(input))
            .map_err(|e| HandleError::ChannelError(format!("Failed to queue input: {}", e)))
    }

    /// Dispatches one input and waits for the result.
    pub async fn dispatch(&self, input: ControlInput) -> Result<DispatchReport, HandleError> {
        self.request(|reply| EngineRequest::Dispatch { input, reply }).await
    }

    pub async fn add_mapping(&self, mapping: Mapping) -> Result<MappingId, HandleError> {
        Ok(self
            .request(|reply| EngineRequest::AddMapping { mapping, reply })
            .await??)
    }

    pub async fn update_mapping(&self, id: MappingId, patch: MappingPatch) -> Result<(), HandleError> {
        Ok(self
            .request(|reply| EngineRequest::UpdateMapping { id, patch, reply })
            .await??)
    }

    pub async fn edit_mapping(&self, id: MappingId, edit: MappingEdit) -> Result<(), HandleError> {
        Ok(self
            .request(|reply| EngineRequest::EditMapping { id, edit, reply })
            .await??)
    }

    pub async fn set_range(&self, id: MappingId, min: Option<f64>, max: Option<f64>) -> Result<(), HandleError> {
        self.edit_mapping(id, MappingEdit::Range { min, max }).await
    }

    pub async fn set_mapping_type(&self, id: MappingId, mapping_type: MappingType) -> Result<(), HandleError> {
        self.edit_mapping(id, MappingEdit::Type(mapping_type)).await
    }

    pub async fn set_step_size(&self, id: MappingId, step: Option<f64>) -> Result<(), HandleError> {
        self.edit_mapping(id, MappingEdit::StepSize(step)).await
    }

    pub async fn set_inverted(&self, id: MappingId, inverted: bool) -> Result<(), HandleError> {
        self.edit_mapping(id, MappingEdit::Inverted(inverted)).await
    }

    pub async fn delete_mapping(&self, id: MappingId) -> Result<Mapping, HandleError> {
        Ok(self
            .request(|reply| EngineRequest::DeleteMapping { id, reply })
            .await??)
    }

    pub async fn mapping(&self, id: MappingId) -> Result<Option<Mapping>, HandleError> {
        self.request(|reply| EngineRequest::GetMapping { id, reply }).await
    }

    /// Mappings of the active profile.
    pub async fn mappings(&self) -> Result<Vec<Mapping>, HandleError> {
        self.request(|reply| EngineRequest::ListMappings { profile: None, reply })
            .await
    }

    pub async fn mappings_for_profile(&self, profile: impl Into<String>) -> Result<Vec<Mapping>, HandleError> {
        let profile = Some(profile.into());
        self.request(|reply| EngineRequest::ListMappings { profile, reply })
            .await
    }

    pub async fn mappings_for_target(&self, target: Target) -> Result<Vec<Mapping>, HandleError> {
        self.request(|reply| EngineRequest::MappingsForTarget { target, reply })
            .await
    }

    pub async fn set_active_profile(&self, profile: impl Into<String>) -> Result<(), HandleError> {
        let profile = profile.into();
        self.request(|reply| EngineRequest::SetActiveProfile { profile, reply })
            .await
    }

    pub async fn active_profile(&self) -> Result<String, HandleError> {
        self.request(|reply| EngineRequest::ActiveProfile { reply }).await
    }

    pub async fn available_profiles(&self) -> Result<Vec<String>, HandleError> {
        self.request(|reply| EngineRequest::AvailableProfiles { reply })
            .await
    }

    pub async fn prune_widget_targets<F>(&self, node_exists: F) -> Result<Vec<MappingId>, HandleError>
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        let node_exists: NodeExists = Box::new(node_exists);
        self.request(|reply| EngineRequest::PruneWidgetTargets { node_exists, reply })
            .await
    }

    pub async fn start_learning(&self, kind: LearnKind, target: Target) -> Result<(), HandleError> {
        self.request(|reply| EngineRequest::StartLearning { kind, target, reply })
            .await
    }

    /// Quick learning; `defaults` of `None` derives them from the widget.
    pub async fn start_quick_learning(
        &self,
        widget: WidgetTarget,
        defaults: Option<DefaultSettings>,
    ) -> Result<(), HandleError> {
        self.request(|reply| EngineRequest::StartQuickLearning {
            widget,
            defaults,
            reply,
        })
        .await
    }

    pub async fn select_control(&self, control: Control) -> Result<(), HandleError> {
        Ok(self
            .request(|reply| EngineRequest::SelectControl { control, reply })
            .await??)
    }

    pub async fn complete_learning(&self, options: CompletionOptions) -> Result<MappingId, HandleError> {
        Ok(self
            .request(|reply| EngineRequest::CompleteLearning { options, reply })
            .await??)
    }

    pub async fn cancel_learning(&self) -> Result<bool, HandleError> {
        self.request(|reply| EngineRequest::CancelLearning { reply })
            .await
    }

    pub async fn learning_state(&self) -> Result<LearningState, HandleError> {
        self.request(|reply| EngineRequest::LearningState { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<MappingSnapshot, HandleError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await
    }

    pub async fn save(&self) -> Result<(), HandleError> {
        self.request(|reply| EngineRequest::Save { reply })
            .await?
            .map_err(HandleError::Persistence)
    }

    /// Stops the task and waits for its final save.
    pub async fn shutdown(&mut self) -> Result<(), HandleError> {
        debug!("Sending shutdown signal to engine task");
        self.cancel.cancel();

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Engine task panicked: {}", e);
                HandleError::TaskError(format!("Engine task panicked: {}", e))
            }),
            None => {
                debug!("Engine task already shut down");
                Ok(())
            }
        }
    }

    async fn request<T, F>(&self, build: F) -> Result<T, HandleError>
    where
        F: FnOnce(Reply<T>) -> EngineRequest,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue_tx
            .send(EngineMessage::Request(build(reply_tx)))
            .await
            .map_err(|_| HandleError::ChannelError("Engine task is not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| HandleError::ChannelError("Engine task dropped the request".to_string()))
    }
}

impl Drop for MappingEngineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
