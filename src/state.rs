use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::engine::resolver::AssignmentResolver;
use crate::engine::session::{self, SessionCommands, SessionHandle, TrackingContext};
use crate::error::AppError;
use crate::map::scene_factory;
use crate::observability::metrics::Metrics;
use crate::routing::OsrmRouter;
use crate::view::{TrackingRequest, TrackingView};

pub struct AppState {
    pub sessions: DashMap<Uuid, SessionHandle>,
    pub context: Arc<TrackingContext>,
    pub event_buffer_size: usize,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(context: TrackingContext, event_buffer_size: usize) -> Self {
        let metrics = context.metrics.clone();
        Self {
            sessions: DashMap::new(),
            context: Arc::new(context),
            event_buffer_size,
            metrics,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let metrics = Metrics::new();
        let backend = BackendClient::new(&config.api_base, config.api_token.clone())
            .map_err(|err| AppError::Internal(err.to_string()))?;
        let router = OsrmRouter::new(&config.routing_host, config.route_timeout)
            .map_err(|err| AppError::Internal(err.to_string()))?
            .with_metrics(metrics.clone());

        let context = TrackingContext {
            resolver: AssignmentResolver::new(backend.clone(), metrics.clone()),
            locations: Arc::new(backend),
            router: Arc::new(router),
            surfaces: scene_factory(),
            map: config.map.clone(),
            poll_interval: config.poll_interval,
            metrics,
        };

        Ok(Self::new(context, config.event_buffer_size))
    }

    pub fn mount(&self, request: TrackingRequest) -> TrackingView {
        let handle = session::mount(self.context.clone(), request, self.event_buffer_size);
        let view = handle.view();
        self.sessions.insert(handle.id(), handle);
        view
    }

    pub fn view(&self, id: Uuid) -> Option<TrackingView> {
        self.sessions.get(&id).map(|session| {
            session.touch();
            session.view()
        })
    }

    pub fn commands(&self, id: Uuid) -> Option<SessionCommands> {
        self.sessions.get(&id).map(|session| {
            session.touch();
            session.commands()
        })
    }

    pub async fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= idle_timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for id in idle {
            // Re-checked under the shard lock: a read since the scan keeps it.
            let removed = self
                .sessions
                .remove_if(&id, |_, session| session.idle_for() >= idle_timeout);
            if let Some((_, handle)) = removed {
                handle.unmount().await;
                info!(session_id = %id, "idle tracking session evicted");
                evicted += 1;
            }
        }
        evicted
    }

    pub async fn unmount(&self, id: Uuid) -> bool {
        match self.sessions.remove(&id) {
            Some((_, handle)) => {
                handle.unmount().await;
                true
            }
            None => false,
        }
    }

    pub async fn unmount_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            self.unmount(*id).await;
        }
        info!(sessions = ids.len(), "all tracking sessions unmounted");
    }
}
