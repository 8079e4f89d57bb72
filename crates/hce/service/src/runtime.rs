//! Tokio runtime around [`HceService`].
//!
//! One task drains the event queue in order (the single logical dispatch
//! thread). It only stages changes under the resolution lock; a second task
//! performs the rebuilds, so frames never wait on a routing commit. Requests
//! arriving while a rebuild runs collapse into one follow-up rebuild, after
//! which any owed dispatcher notices are queued behind the frames already
//! waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hce_dispatch::{HostEvent, NfcFEvent};
use hce_types::{HandlerInfo, UserId};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{ServiceError, ServiceResult};
use crate::service::{HceService, PendingNotice, PreferenceChange, TimerRequest};

/// Everything the outside world can push into the service.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Host(HostEvent),
    NfcF(NfcFEvent),
    HandlersChanged {
        user: UserId,
        handlers: Vec<HandlerInfo>,
    },
    Preference(PreferenceChange),
    UserSwitched(UserId),
    ControllerEnabled,
    ControllerDisabled,
    RoutingTableCleared,
    /// Queued by the rebuild worker once a staged change is published.
    Notice(PendingNotice),
}

/// Handle to a running service runtime.
pub struct RuntimeHandle {
    events: mpsc::Sender<ServiceEvent>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    pub async fn send(&self, event: ServiceEvent) -> ServiceResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| ServiceError::Stopped)
    }

    /// Stop both tasks and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Runtime task failed");
            }
        }
        info!("Card emulation runtime stopped");
    }
}

/// Field-off timer; arming bumps the generation so older timers fire into nothing.
struct FieldOffTimer {
    generation: Arc<AtomicU64>,
    events: mpsc::Sender<ServiceEvent>,
}

impl FieldOffTimer {
    fn apply(&self, request: TimerRequest) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let TimerRequest::Arm(delay) = request {
            let current = self.generation.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if current.load(Ordering::SeqCst) == generation {
                    let _ = events.send(ServiceEvent::Host(HostEvent::FieldOffTimeout)).await;
                }
            });
        }
    }
}

/// Rebuild requests from the dispatch task and the notices owed after them.
#[derive(Default)]
struct RebuildQueue {
    wake: Notify,
    notices: Mutex<Vec<PendingNotice>>,
}

impl RebuildQueue {
    fn request(&self, notice: Option<PendingNotice>) {
        if let Some(notice) = notice {
            self.notices.lock().push(notice);
        }
        self.wake.notify_one();
    }

    fn take_notices(&self) -> Vec<PendingNotice> {
        std::mem::take(&mut *self.notices.lock())
    }
}

/// Spawn the dispatch loop and the rebuild worker.
pub fn spawn(service: Arc<HceService>, buffer: usize) -> RuntimeHandle {
    let (events_tx, mut events_rx) = mpsc::channel(buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rebuild = Arc::new(RebuildQueue::default());

    let worker = {
        let service = service.clone();
        let rebuild = rebuild.clone();
        let events = events_tx.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rebuild.wake.notified() => {
                        // Taken first: every notice here belongs to a change this rebuild covers.
                        let notices = rebuild.take_notices();
                        let report = service.rebuild();
                        debug!(version = report.version, routing = ?report.routing, "Rebuild finished");
                        for notice in notices {
                            if events.send(ServiceEvent::Notice(notice)).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let dispatch = {
        let timer = FieldOffTimer {
            generation: Arc::new(AtomicU64::new(0)),
            events: events_tx.clone(),
        };
        let mut shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = events_rx.recv() => {
                        handle_event(&service, &rebuild, &timer, event).await;
                    }
                    _ = shutdown.changed() => break,
                    else => break,
                }
            }
        })
    };

    info!(buffer, "Card emulation runtime started");
    RuntimeHandle {
        events: events_tx,
        shutdown_tx,
        tasks: vec![dispatch, worker],
    }
}

async fn handle_event(
    service: &HceService,
    rebuild: &RebuildQueue,
    timer: &FieldOffTimer,
    event: ServiceEvent,
) {
    match event {
        ServiceEvent::Host(event) => {
            let timer_request = match event {
                HostEvent::Activated => service.on_activation(),
                HostEvent::Deactivated => {
                    let (timer_request, notice) = service.stage_deactivation();
                    if notice.is_some() {
                        rebuild.request(notice);
                    }
                    timer_request
                }
                other => service.handle_host_event(other),
            };
            if let Some(request) = timer_request {
                timer.apply(request);
            }
        }
        ServiceEvent::NfcF(event) => service.handle_nfcf_event(event),
        ServiceEvent::HandlersChanged { user, handlers } => {
            service.stage_handler_set(user, handlers);
            rebuild.request(None);
        }
        ServiceEvent::Preference(change) => {
            if let Some(notice) = service.stage_preference_change(&change) {
                rebuild.request(Some(notice));
                if let Err(e) = service.persist_preference(&change).await {
                    error!(error = %e, "Failed to persist preference");
                }
            }
        }
        ServiceEvent::UserSwitched(user) => {
            rebuild.request(Some(service.stage_user_switch(user)));
        }
        ServiceEvent::ControllerEnabled => {
            service.engine().stage_controller_enabled();
            rebuild.request(None);
        }
        ServiceEvent::ControllerDisabled => service.on_controller_disabled(),
        ServiceEvent::RoutingTableCleared => {
            service.engine().stage_routing_table_cleared();
            rebuild.request(None);
        }
        ServiceEvent::Notice(notice) => service.notify_dispatchers(notice),
    }
}

