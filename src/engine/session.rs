use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::LocationSource;
use crate::config::MapSettings;
use crate::engine::poller::{fetch_fix, start_polling};
use crate::engine::renderer::{apply_routes, plan_routes, RoutePlan};
use crate::engine::resolver::{AssignmentResolver, ResolveRequest};
use crate::error::{AppError, MapError};
use crate::geo::haversine_km;
use crate::map::{MapControl, MapView, SurfaceFactory};
use crate::models::assignment::Assignment;
use crate::models::position::Position;
use crate::observability::metrics::Metrics;
use crate::routing::RouteProvider;
use crate::view::{AssignmentDetails, MapPanel, Phase, TrackingRequest, TrackingView};

pub struct TrackingContext {
    pub resolver: AssignmentResolver,
    pub locations: Arc<dyn LocationSource>,
    pub router: Arc<dyn RouteProvider>,
    pub surfaces: SurfaceFactory,
    pub map: MapSettings,
    pub poll_interval: Duration,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Retry,
    Control(MapControl),
}

pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<TrackingView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    activity: Arc<Activity>,
}

#[derive(Debug)]
struct Activity {
    started: Instant,
    last_seen_ms: AtomicU64,
    watchers: AtomicUsize,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            watchers: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(now, Ordering::Relaxed);
    }
}

pub struct WatchLease {
    activity: Arc<Activity>,
}

impl Drop for WatchLease {
    fn drop(&mut self) {
        self.activity.watchers.fetch_sub(1, Ordering::Relaxed);
        self.activity.touch();
    }
}

#[derive(Clone)]
pub struct SessionCommands {
    id: Uuid,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionCommands {
    pub async fn send(&self, command: SessionCommand) -> Result<(), AppError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AppError::Gone(format!("session {} has ended", self.id)))
    }

    pub async fn retry(&self) -> Result<(), AppError> {
        self.send(SessionCommand::Retry).await
    }

    pub async fn control(&self, control: MapControl) -> Result<(), AppError> {
        self.send(SessionCommand::Control(control)).await
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn view(&self) -> TrackingView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingView> {
        self.view.clone()
    }

    pub fn touch(&self) {
        self.activity.touch();
    }

    pub fn watch(&self) -> WatchLease {
        self.activity.watchers.fetch_add(1, Ordering::Relaxed);
        WatchLease {
            activity: self.activity.clone(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        if self.activity.watchers.load(Ordering::Relaxed) > 0 {
            return Duration::ZERO;
        }
        let last_seen = Duration::from_millis(self.activity.last_seen_ms.load(Ordering::Relaxed));
        self.activity.started.elapsed().saturating_sub(last_seen)
    }

    pub fn commands(&self) -> SessionCommands {
        SessionCommands {
            id: self.id,
            tx: self.commands.clone(),
        }
    }

    pub async fn unmount(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(session_id = %self.id, error = %err, "session task ended abnormally");
        }
    }
}

pub fn mount(
    context: Arc<TrackingContext>,
    request: TrackingRequest,
    command_buffer: usize,
) -> SessionHandle {
    let id = Uuid::new_v4();
    let (commands_tx, commands_rx) = mpsc::channel(command_buffer.max(1));
    let (view_tx, view_rx) = watch::channel(TrackingView::new(id, &request, Phase::Loading));
    let cancel = CancellationToken::new();

    let session = Session {
        id,
        context,
        request,
        cancel: cancel.clone(),
        view: view_tx,
        commands: commands_rx,
    };
    let task = tokio::spawn(session.run());

    SessionHandle {
        id,
        commands: commands_tx,
        view: view_rx,
        cancel,
        task,
        activity: Arc::new(Activity::new()),
    }
}

enum Exit {
    Retry,
    Closed,
}

struct Session {
    id: Uuid,
    context: Arc<TrackingContext>,
    request: TrackingRequest,
    cancel: CancellationToken,
    view: watch::Sender<TrackingView>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl Session {
    async fn run(mut self) {
        self.context.metrics.active_sessions.inc();
        info!(session_id = %self.id, courier_id = ?self.request.courier_id, "tracking session mounted");

        loop {
            match self.mount_once().await {
                Exit::Retry => {
                    info!(session_id = %self.id, "retrying tracking session");
                }
                Exit::Closed => break,
            }
        }

        self.context.metrics.active_sessions.dec();
        info!(session_id = %self.id, "tracking session unmounted");
    }

    fn publish(&self, phase: Phase) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.view
            .send_replace(TrackingView::new(self.id, &self.request, phase));
    }

    async fn mount_once(&mut self) -> Exit {
        self.publish(Phase::Loading);

        // The widget container needs a moment to be laid out before map work starts.
        tokio::select! {
            _ = self.cancel.cancelled() => return Exit::Closed,
            _ = tokio::time::sleep(self.context.map.init_delay) => {}
        }

        let request = ResolveRequest::new(
            self.request.courier_id.as_deref(),
            self.request.assignment_id.as_deref(),
            &self.request.role,
        );
        let resolved = tokio::select! {
            _ = self.cancel.cancelled() => return Exit::Closed,
            resolved = self.context.resolver.resolve(&request) => resolved,
        };

        match resolved {
            Ok(assignment) => self.track(assignment).await,
            Err(err) => {
                info!(session_id = %self.id, error = %err, "no assignment to track");
                self.publish(Phase::not_found(&err, &self.request));
                self.wait_for_retry().await
            }
        }
    }

    async fn wait_for_retry(&mut self) -> Exit {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Closed,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Retry) => return Exit::Retry,
                    Some(SessionCommand::Control(control)) => {
                        debug!(session_id = %self.id, ?control, "map control ignored without a map");
                    }
                    None => return Exit::Closed,
                },
            }
        }
    }

    async fn track(&mut self, assignment: Assignment) -> Exit {
        let tracking_id = assignment
            .id
            .clone()
            .or_else(|| self.request.assignment_id.clone())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let mut tracker = Tracker::new(
            assignment,
            MapView::new(self.context.map.clone(), self.context.surfaces.clone()),
            self.context.router.clone(),
        );

        let Some(tracking_id) = tracking_id else {
            warn!(session_id = %self.id, "assignment has no id, location cannot be polled");
            self.publish(tracker.phase());
            return self.wait_for_retry().await;
        };

        let initial = tokio::select! {
            _ = self.cancel.cancelled() => return Exit::Closed,
            fix = fetch_fix(self.context.locations.as_ref(), &tracking_id, &self.context.metrics) => fix,
        };
        if let Some(fix) = initial.clone() {
            tracker.on_fix(fix);
        }
        self.publish(tracker.phase());

        let (fixes_tx, mut fixes) = watch::channel(initial);
        let poller = start_polling(
            self.context.locations.clone(),
            tracking_id,
            self.context.poll_interval,
            fixes_tx,
            self.cancel.child_token(),
            self.context.metrics.clone(),
        );
        let mut polling = true;

        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Exit::Closed,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Retry) => break Exit::Retry,
                    Some(SessionCommand::Control(control)) => {
                        tracker.control(control);
                        self.publish(tracker.phase());
                    }
                    None => break Exit::Closed,
                },
                changed = fixes.changed(), if polling => {
                    if changed.is_err() {
                        polling = false;
                        continue;
                    }
                    let fix = fixes.borrow_and_update().clone();
                    if let Some(fix) = fix {
                        tracker.on_fix(fix);
                        self.publish(tracker.phase());
                    }
                }
                plan = tracker.next_plan(), if tracker.has_pending() => {
                    tracker.apply(plan);
                    self.publish(tracker.phase());
                }
            }
        };

        poller.stop().await;
        tracker.dispose();
        exit
    }
}

struct Tracker {
    assignment: Assignment,
    position: Option<Position>,
    map: MapView,
    router: Arc<dyn RouteProvider>,
    generation: u64,
    drawn: u64,
    jobs: FuturesUnordered<BoxFuture<'static, RoutePlan>>,
}

impl Tracker {
    fn new(assignment: Assignment, map: MapView, router: Arc<dyn RouteProvider>) -> Self {
        Self {
            assignment,
            position: None,
            map,
            router,
            generation: 0,
            drawn: 0,
            jobs: FuturesUnordered::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.jobs.is_empty()
    }

    // Earlier jobs keep running: a slow router still gets its result drawn unless a
    // newer plan has been drawn first.
    fn on_fix(&mut self, fix: Position) {
        self.position = Some(fix.clone());

        let placed = if self.map.is_initialized() {
            self.map.update_current(&fix)
        } else {
            self.map.initialize(&self.assignment, &fix)
        };
        if let Err(err) = placed {
            warn!(error = %err, "failed to place current location");
            if err == MapError::Unavailable || !self.map.is_initialized() {
                self.jobs = FuturesUnordered::new();
                return;
            }
        }

        self.generation += 1;
        let router = self.router.clone();
        let assignment = self.assignment.clone();
        let generation = self.generation;
        self.jobs.push(
            async move { plan_routes(router.as_ref(), &assignment, Some(&fix), generation).await }
                .boxed(),
        );
    }

    async fn next_plan(&mut self) -> RoutePlan {
        match self.jobs.next().await {
            Some(plan) => plan,
            None => std::future::pending().await,
        }
    }

    fn apply(&mut self, plan: RoutePlan) {
        if plan.generation <= self.drawn {
            debug!(
                stale = plan.generation,
                drawn = self.drawn,
                "discarding route plan for an older fix"
            );
            return;
        }
        self.drawn = plan.generation;
        if let Err(err) = apply_routes(&mut self.map, plan) {
            warn!(error = %err, "failed to draw routes");
        }
    }

    fn control(&mut self, control: MapControl) {
        match self
            .map
            .control(control, Some(&self.assignment), self.position.as_ref())
        {
            Ok(()) => {}
            Err(MapError::NotInitialized) => debug!(?control, "map control before first fix"),
            Err(err) => warn!(?control, error = %err, "map control failed"),
        }
    }

    fn dispose(&mut self) {
        self.jobs = FuturesUnordered::new();
        self.map.dispose();
    }

    fn phase(&self) -> Phase {
        let map = if self.map.is_unavailable() {
            MapPanel::Unavailable {
                message: MapError::Unavailable.to_string(),
                retry: true,
            }
        } else {
            match self.map.snapshot() {
                Some(snapshot) => MapPanel::Live(snapshot),
                None => MapPanel::WaitingForLocation,
            }
        };

        let dropoff_distance_km = match (&self.position, self.assignment.destination()) {
            (Some(position), Some(destination)) => Some(haversine_km(&position.point, &destination)),
            _ => None,
        };

        Phase::Tracking {
            details: AssignmentDetails::from(&self.assignment),
            assignment: Box::new(self.assignment.clone()),
            position: self.position.clone(),
            dropoff_distance_km,
            map,
        }
    }
}
