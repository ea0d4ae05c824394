use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::distance::{DistanceProvider, HaversineEstimator};
use crate::engine::queue::{QueueManager, SharedQueue};
use crate::engine::ranking::{price_candidates, rank_candidates};
use crate::engine::watcher::{AssignmentDecision, AssignmentWatcher};
use crate::error::DispatchError;
use crate::models::assignment::{AssignmentStatus, OrderAssignment};
use crate::models::driver::DriverWithDistance;
use crate::models::order::{Order, OrderStatus};
use crate::notify::{Notifier, PushMessage, RealtimeEvent};
use crate::observability::metrics::Metrics;
use crate::repository::{AssignmentRepository, LocationRepository, OrderRepository};

#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub locations: Arc<dyn LocationRepository>,
}

#[derive(Debug)]
enum RoundOutcome {
    Accepted(Uuid),
    Exhausted,
    NoCandidates,
}

#[derive(Debug)]
enum OfferOutcome {
    Accepted,
    Rejected,
    TimedOut,
}

/// Runs the search-offer-wait-retry protocol for orders and takes driver
/// responses.
///
/// One search runs per order. Within a search, offers are strictly
/// sequential: a new assignment is created only after the previous one
/// was accepted, rejected or timed out. Driver responses and the offer
/// deadline race through compare-and-swap updates on the assignment row,
/// so exactly one of them settles each offer.
pub struct AssignmentService {
    repos: Repositories,
    distance: Arc<dyn DistanceProvider>,
    fallback: HaversineEstimator,
    watcher: Arc<AssignmentWatcher>,
    queues: Arc<QueueManager>,
    notifier: Notifier,
    metrics: Metrics,
    config: DispatchConfig,
}

impl AssignmentService {
    pub fn new(
        repos: Repositories,
        distance: Arc<dyn DistanceProvider>,
        notifier: Notifier,
        metrics: Metrics,
        config: DispatchConfig,
    ) -> Self {
        Self {
            repos,
            distance,
            fallback: HaversineEstimator,
            watcher: Arc::new(AssignmentWatcher::new()),
            queues: Arc::new(QueueManager::new()),
            notifier,
            metrics,
            config,
        }
    }

    pub fn watcher(&self) -> &AssignmentWatcher {
        &self.watcher
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Launches the search for `order_id` in the background.
    ///
    /// The search runs in its own task so that a panic inside it is caught
    /// here; any abnormal end leaves the order in `no_driver_available`
    /// with no pending offers rather than stuck mid-search.
    pub fn spawn_assignment(self: &Arc<Self>, order_id: Uuid) -> JoinHandle<()> {
        let service = Arc::clone(self);

        tokio::spawn(async move {
            service.metrics.active_searches.inc();
            let started = Instant::now();

            let search = {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.assign_order_to_driver(order_id).await })
            };

            let result = match search.await {
                Ok(result) => result,
                Err(err) => {
                    error!(order_id = %order_id, error = %err, "driver search task crashed");
                    Err(DispatchError::SearchAborted(order_id))
                }
            };

            service.metrics.active_searches.dec();
            let outcome = match &result {
                Ok(_) => "accepted",
                Err(DispatchError::NoDriverAvailable(_)) => "no_driver",
                Err(DispatchError::OrderCancelled(_)) => "cancelled",
                Err(_) => "failed",
            };
            service
                .metrics
                .record_search(outcome, started.elapsed().as_secs_f64());

            match result {
                Ok(driver_id) => {
                    info!(order_id = %order_id, driver_id = %driver_id, "driver search finished")
                }
                Err(err @ DispatchError::NoDriverAvailable(_))
                | Err(err @ DispatchError::OrderCancelled(_)) => {
                    info!(order_id = %order_id, reason = %err, "driver search ended")
                }
                Err(err) => {
                    error!(order_id = %order_id, error = %err, "driver search failed");
                    service.abandon_search(order_id).await;
                }
            }
        })
    }

    /// Searches until a driver accepts, the order is cancelled, or the
    /// search budget runs out. Returns the accepting driver.
    pub async fn assign_order_to_driver(&self, order_id: Uuid) -> Result<Uuid, DispatchError> {
        let order = self
            .repos
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(DispatchError::OrderNotFound(order_id))?;

        if order.status == OrderStatus::Cancelled {
            return Err(DispatchError::OrderCancelled(order_id));
        }

        let searchable = [
            OrderStatus::Pending,
            OrderStatus::SearchingDriver,
            OrderStatus::NoDriverAvailable,
        ];
        if !self
            .repos
            .orders
            .update_status_if(order_id, &searchable, OrderStatus::SearchingDriver)
            .await?
        {
            return Err(DispatchError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::SearchingDriver,
            });
        }

        info!(order_id = %order_id, "driver search started");
        self.notifier.broadcast_order(
            order_id,
            &RealtimeEvent::OrderStatusChanged {
                order_id,
                status: OrderStatus::SearchingDriver,
            },
        );

        let started = Instant::now();
        let mut round = 0u32;

        while started.elapsed() < self.config.max_search_time {
            round += 1;

            match self.run_search_round(order_id, round).await {
                Ok(RoundOutcome::Accepted(driver_id)) => return Ok(driver_id),
                Ok(RoundOutcome::Exhausted) => {
                    info!(order_id = %order_id, round, "every candidate declined or timed out")
                }
                Ok(RoundOutcome::NoCandidates) => {
                    info!(order_id = %order_id, round, "no eligible drivers in range")
                }
                Err(err) if err.is_transient() => {
                    warn!(order_id = %order_id, round, error = %err, "search round failed; retrying")
                }
                Err(err) => return Err(err),
            }

            sleep(self.config.retry_interval).await;
        }

        self.give_up(order_id).await
    }

    async fn run_search_round(
        &self,
        order_id: Uuid,
        round: u32,
    ) -> Result<RoundOutcome, DispatchError> {
        let order = self
            .repos
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(DispatchError::OrderNotFound(order_id))?;

        if order.status == OrderStatus::Cancelled {
            info!(order_id = %order_id, round, "order cancelled; stopping search");
            return Err(DispatchError::OrderCancelled(order_id));
        }

        let nearby = self
            .repos
            .locations
            .find_available_drivers_within_radius(order.pickup, self.config.radius_km)
            .await?;
        if nearby.is_empty() {
            return Ok(RoundOutcome::NoCandidates);
        }

        let priced =
            price_candidates(self.distance.as_ref(), &self.fallback, nearby, order.pickup).await;
        if priced.used_fallback {
            self.metrics.distance_fallbacks_total.inc();
        }

        let excluded: HashSet<Uuid> = self
            .repos
            .assignments
            .get_rejected_driver_ids_by_order_id(order_id)
            .await?
            .into_iter()
            .collect();

        let candidates = rank_candidates(priced.candidates, &excluded, self.config.max_queue_size);
        if candidates.is_empty() {
            return Ok(RoundOutcome::NoCandidates);
        }

        info!(
            order_id = %order_id,
            round,
            candidates = candidates.len(),
            excluded = excluded.len(),
            "offering order"
        );

        let queue = self.queues.create_queue(order_id, candidates);
        let outcome = self.offer_sequentially(&order, &queue).await;
        self.queues.remove_queue(order_id);

        match &outcome {
            Ok(RoundOutcome::Accepted(_)) => {}
            Ok(_) => self.release_order(order_id).await,
            Err(_) => {
                self.expire_open_offers(order_id).await;
                self.release_order(order_id).await;
            }
        }

        outcome
    }

    async fn offer_sequentially(
        &self,
        order: &Order,
        queue: &SharedQueue,
    ) -> Result<RoundOutcome, DispatchError> {
        loop {
            let next = queue.lock().next();
            let Some(candidate) = next else {
                return Ok(RoundOutcome::Exhausted);
            };

            match self.offer_to_driver(order, &candidate, queue).await? {
                OfferOutcome::Accepted => {
                    self.metrics.record_offer("accepted");
                    queue.lock().mark_accepted();
                    self.queues.remove_queue(order.id);
                    self.finalize_acceptance(order, candidate.driver_id).await?;
                    return Ok(RoundOutcome::Accepted(candidate.driver_id));
                }
                OfferOutcome::Rejected => self.metrics.record_offer("rejected"),
                OfferOutcome::TimedOut => self.metrics.record_offer("timeout"),
            }
        }
    }

    async fn offer_to_driver(
        &self,
        order: &Order,
        candidate: &DriverWithDistance,
        queue: &SharedQueue,
    ) -> Result<OfferOutcome, DispatchError> {
        let attempt = self
            .repos
            .assignments
            .get_next_attempt_number(order.id)
            .await?;
        let assignment = OrderAssignment::offer(
            order.id,
            candidate,
            attempt,
            self.config.radius_km,
            self.config.offer_timeout,
        );

        // The order is claimed before the row is written, so a cancelled
        // order never records an offer nobody received.
        if !self
            .repos
            .orders
            .assign_driver(order.id, candidate.driver_id)
            .await?
        {
            return Err(self.left_search(order.id).await);
        }

        // Registered before the row exists so an instant answer cannot be missed.
        let handle = self.watcher.watch(assignment.id);

        if let Err(err) = self.repos.assignments.create(assignment.clone()).await {
            self.watcher.unwatch(assignment.id);
            return Err(err.into());
        }
        queue.lock().set_assignment_id(assignment.id);

        info!(
            order_id = %order.id,
            driver_id = %candidate.driver_id,
            assignment_id = %assignment.id,
            attempt,
            distance_km = candidate.distance_km,
            estimated = candidate.estimated,
            "offer sent"
        );
        self.notify_offer(order, &assignment);

        let decision = match timeout(self.config.offer_timeout, handle.recv()).await {
            Ok(Some(decision)) => decision,
            Ok(None) => AssignmentDecision::Error("watch closed without a decision".to_string()),
            Err(_) => {
                self.watcher.unwatch(assignment.id);
                AssignmentDecision::Timeout
            }
        };

        self.settle_offer(&assignment, decision).await
    }

    /// Turns the watcher's decision into an outcome. For timeouts and errors
    /// the row is moved to `timeout` only if it is still pending; otherwise
    /// whatever response won the race is honored.
    async fn settle_offer(
        &self,
        assignment: &OrderAssignment,
        decision: AssignmentDecision,
    ) -> Result<OfferOutcome, DispatchError> {
        match decision {
            AssignmentDecision::Accepted => Ok(OfferOutcome::Accepted),
            AssignmentDecision::Rejected { reason } => {
                info!(
                    assignment_id = %assignment.id,
                    driver_id = %assignment.driver_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "offer rejected"
                );
                Ok(OfferOutcome::Rejected)
            }
            AssignmentDecision::Error(message) => {
                warn!(assignment_id = %assignment.id, error = %message, "offer watch failed");
                self.time_out_offer(assignment).await
            }
            AssignmentDecision::Timeout => self.time_out_offer(assignment).await,
        }
    }

    async fn time_out_offer(&self, assignment: &OrderAssignment) -> Result<OfferOutcome, DispatchError> {
        if self
            .repos
            .assignments
            .update_status(assignment.id, AssignmentStatus::Timeout)
            .await?
        {
            info!(
                assignment_id = %assignment.id,
                driver_id = %assignment.driver_id,
                "offer timed out"
            );
            return Ok(OfferOutcome::TimedOut);
        }

        let stored = self.repos.assignments.find_by_id(assignment.id).await?;
        Ok(match stored.map(|row| row.status) {
            Some(AssignmentStatus::Accepted) => OfferOutcome::Accepted,
            Some(AssignmentStatus::Rejected) => OfferOutcome::Rejected,
            _ => OfferOutcome::TimedOut,
        })
    }

    async fn finalize_acceptance(&self, order: &Order, driver_id: Uuid) -> Result<(), DispatchError> {
        match self.repos.orders.update_accepted(order.id, driver_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(order_id = %order.id, driver_id = %driver_id, "order left the search before acceptance was recorded");
                self.notifier.send_to_user(
                    driver_id,
                    &RealtimeEvent::OrderStatusChanged {
                        order_id: order.id,
                        status: OrderStatus::Cancelled,
                    },
                );
                return Err(self.left_search(order.id).await);
            }
            Err(source) => {
                return Err(DispatchError::AcceptanceNotRecorded {
                    order_id: order.id,
                    source,
                });
            }
        }

        match self.repos.assignments.expire_pending_by_order_id(order.id).await {
            Ok(0) => {}
            Ok(expired) => info!(order_id = %order.id, expired, "expired sibling offers"),
            Err(err) => warn!(order_id = %order.id, error = %err, "failed to expire sibling offers"),
        }

        info!(order_id = %order.id, driver_id = %driver_id, "order accepted");

        let event = RealtimeEvent::OrderAccepted {
            order_id: order.id,
            driver_id,
        };
        self.notifier.broadcast_order(order.id, &event);
        self.notifier.send_to_user(order.merchant_id, &event);
        Ok(())
    }

    async fn give_up(&self, order_id: Uuid) -> Result<Uuid, DispatchError> {
        self.queues.remove_queue(order_id);

        let moved = self
            .repos
            .orders
            .update_status_if(
                order_id,
                &[OrderStatus::SearchingDriver, OrderStatus::Assigned],
                OrderStatus::NoDriverAvailable,
            )
            .await?;
        if !moved {
            return Err(self.left_search(order_id).await);
        }

        warn!(
            order_id = %order_id,
            budget_secs = self.config.max_search_time.as_secs(),
            "no driver accepted within search budget"
        );
        self.notifier.broadcast_order(
            order_id,
            &RealtimeEvent::OrderStatusChanged {
                order_id,
                status: OrderStatus::NoDriverAvailable,
            },
        );

        Err(DispatchError::NoDriverAvailable(order_id))
    }

    /// Explains why an order refused a search-time write.
    async fn left_search(&self, order_id: Uuid) -> DispatchError {
        match self.repos.orders.find_by_id(order_id).await {
            Ok(Some(order)) if order.status == OrderStatus::Cancelled => {
                DispatchError::OrderCancelled(order_id)
            }
            Ok(Some(order)) => DispatchError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Assigned,
            },
            Ok(None) => DispatchError::OrderNotFound(order_id),
            Err(err) => err.into(),
        }
    }

    async fn release_order(&self, order_id: Uuid) {
        if let Err(err) = self.repos.orders.unassign_driver(order_id).await {
            warn!(order_id = %order_id, error = %err, "failed to release order after round");
        }
    }

    async fn expire_open_offers(&self, order_id: Uuid) {
        if let Err(err) = self
            .repos
            .assignments
            .expire_pending_by_order_id(order_id)
            .await
        {
            warn!(order_id = %order_id, error = %err, "failed to expire open offers");
        }
    }

    async fn abandon_search(&self, order_id: Uuid) {
        self.queues.remove_queue(order_id);
        self.expire_open_offers(order_id).await;

        let open = [
            OrderStatus::Pending,
            OrderStatus::SearchingDriver,
            OrderStatus::Assigned,
        ];
        match self
            .repos
            .orders
            .update_status_if(order_id, &open, OrderStatus::NoDriverAvailable)
            .await
        {
            Ok(true) => self.notifier.broadcast_order(
                order_id,
                &RealtimeEvent::OrderStatusChanged {
                    order_id,
                    status: OrderStatus::NoDriverAvailable,
                },
            ),
            Ok(false) => {}
            Err(err) => error!(order_id = %order_id, error = %err, "failed to close abandoned search"),
        }
    }

    fn notify_offer(&self, order: &Order, assignment: &OrderAssignment) {
        let event = RealtimeEvent::NewOrderOffer {
            order_id: order.id,
            assignment_id: assignment.id,
            pickup: order.pickup,
            pickup_address: order.pickup_address.clone(),
            delivery: order.delivery,
            delivery_address: order.delivery_address.clone(),
            total_cents: order.total_cents,
            distance_km: assignment.distance_km,
            eta_minutes: assignment.eta_minutes,
            expires_at: assignment.expires_at,
        };
        self.notifier.send_to_user(assignment.driver_id, &event);

        self.notifier.push_detached(
            assignment.driver_id,
            PushMessage {
                title: "New delivery request".to_string(),
                body: format!(
                    "{:.1} km to pickup, about {} min",
                    assignment.distance_km, assignment.eta_minutes
                ),
                data: json!({
                    "order_id": order.id,
                    "assignment_id": assignment.id,
                    "expires_at": assignment.expires_at,
                }),
            },
        );
    }

    /// Driver accepts their pending offer for `order_id`. Fails if there is
    /// no pending offer (already answered, timed out, or given to someone
    /// else) or if the offer's deadline has passed.
    pub async fn accept_order(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<OrderAssignment, DispatchError> {
        let mut assignment = self.pending_assignment(order_id, driver_id).await?;

        if !self
            .repos
            .assignments
            .update_status(assignment.id, AssignmentStatus::Accepted)
            .await?
        {
            return Err(DispatchError::AssignmentNotPending(assignment.id));
        }

        self.watcher.notify_accepted(assignment.id);
        info!(order_id = %order_id, driver_id = %driver_id, assignment_id = %assignment.id, "driver accepted offer");

        assignment.status = AssignmentStatus::Accepted;
        assignment.responded_at = Some(Utc::now());
        Ok(assignment)
    }

    pub async fn reject_order(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderAssignment, DispatchError> {
        let mut assignment = self.pending_assignment(order_id, driver_id).await?;

        if !self
            .repos
            .assignments
            .update_status_with_reason(assignment.id, AssignmentStatus::Rejected, reason.clone())
            .await?
        {
            return Err(DispatchError::AssignmentNotPending(assignment.id));
        }

        self.watcher.notify_rejected(assignment.id, reason.clone());
        info!(order_id = %order_id, driver_id = %driver_id, assignment_id = %assignment.id, "driver rejected offer");

        assignment.status = AssignmentStatus::Rejected;
        assignment.responded_at = Some(Utc::now());
        assignment.rejection_reason = reason;
        Ok(assignment)
    }

    async fn pending_assignment(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<OrderAssignment, DispatchError> {
        let assignment = self
            .repos
            .assignments
            .find_pending_by_order_and_driver(order_id, driver_id)
            .await?
            .ok_or(DispatchError::AssignmentNotFound { order_id, driver_id })?;

        if assignment.is_expired_at(Utc::now()) {
            if self
                .repos
                .assignments
                .update_status(assignment.id, AssignmentStatus::Timeout)
                .await?
            {
                self.watcher.notify_timeout(assignment.id);
            }
            return Err(DispatchError::AssignmentExpired(assignment.id));
        }

        Ok(assignment)
    }

    /// Offers currently waiting on this driver, oldest first.
    pub async fn get_pending_assignments_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<OrderAssignment>, DispatchError> {
        let now = Utc::now();
        Ok(self
            .repos
            .assignments
            .find_pending_by_driver(driver_id)
            .await?
            .into_iter()
            .filter(|assignment| !assignment.is_expired_at(now))
            .collect())
    }

    /// Times out `pending` rows whose deadline passed without anyone
    /// settling them, e.g. after a crash mid-offer. Wakes any loop still
    /// waiting on them.
    pub async fn expire_stale_assignments(&self) -> Result<usize, DispatchError> {
        let stale = self
            .repos
            .assignments
            .find_stale_pending(Utc::now())
            .await?;

        let mut expired = 0;
        for assignment in stale {
            if self
                .repos
                .assignments
                .update_status(assignment.id, AssignmentStatus::Timeout)
                .await?
            {
                self.watcher.notify_timeout(assignment.id);
                expired += 1;
            }
        }

        if expired > 0 {
            info!(expired, "timed out stale offers");
        }
        Ok(expired)
    }
}
