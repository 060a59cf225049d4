//! Real-time ride status fanout.
//!
//! Every rider and every chair owns one bounded event queue, created on first
//! reference and kept for the life of the process. Publishing never blocks:
//! when a queue is full the new event is dropped and counted. A later real
//! event supersedes whatever was lost, so subscribers converge on the latest
//! status even if they miss an intermediate one.
//!
//! Each subscription is a lazy stream. It yields one empty snapshot right
//! away (connected, nothing to report yet), then one enriched snapshot per
//! queued event, skipping an event identical to the last one delivered. The
//! stream ends when it is dropped.

use super::registry::Registry;
use crate::domain::chair::ChairStats;
use crate::domain::coordinate::Coordinate;
use crate::domain::fare::Fare;
use crate::domain::ids::{ChairId, RideId, UserId};
use crate::domain::ride::{Ride, RideStatus};
use crate::error::Result;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    pub ride: Ride,
    pub status: RideStatus,
}

/// Fixed-capacity queue with non-blocking enqueue.
pub struct EventQueue {
    sender: mpsc::Sender<NotifyEvent>,
    receiver: Mutex<mpsc::Receiver<NotifyEvent>>,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues without waiting. Returns false if the event was dropped.
    pub fn try_push(&self, event: NotifyEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Waits for the next event. `None` only if the queue has been torn down.
    pub async fn next(&self) -> Option<NotifyEvent> {
        self.receiver.lock().await.recv().await
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct NotificationHub {
    riders: Registry<UserId, Arc<EventQueue>>,
    chairs: Registry<ChairId, Arc<EventQueue>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            riders: Registry::new(),
            chairs: Registry::new(),
            capacity,
        }
    }

    pub fn rider_queue(&self, user_id: &UserId) -> Arc<EventQueue> {
        self.riders
            .get_or_insert_with(user_id.clone(), || Arc::new(EventQueue::new(self.capacity)))
    }

    pub fn chair_queue(&self, chair_id: &ChairId) -> Arc<EventQueue> {
        self.chairs
            .get_or_insert_with(chair_id.clone(), || Arc::new(EventQueue::new(self.capacity)))
    }

    /// Sends `status` for `ride` to both its rider and its chair. Rides
    /// without a chair have nobody to pair with yet and are not published.
    pub fn publish(&self, ride: &Ride, status: RideStatus) {
        let Some(chair_id) = &ride.chair_id else {
            warn!(ride_id = %ride.id, %status, "ride has no chair, notification skipped");
            return;
        };
        let event = NotifyEvent {
            ride: ride.clone(),
            status,
        };
        if !self.chair_queue(chair_id).try_push(event.clone()) {
            warn!(chair_id = %chair_id, ride_id = %ride.id, %status, "dropped chair notification");
        }
        if !self.rider_queue(&ride.user_id).try_push(event) {
            warn!(user_id = %ride.user_id, ride_id = %ride.id, %status, "dropped rider notification");
        }
    }

    /// Total events dropped across all queues.
    pub fn dropped_events(&self) -> u64 {
        let mut total = 0;
        for queue in self.riders_and_chairs() {
            total += queue.dropped();
        }
        total
    }

    fn riders_and_chairs(&self) -> Vec<Arc<EventQueue>> {
        self.riders
            .values()
            .into_iter()
            .chain(self.chairs.values())
            .collect()
    }
}

/// Wire frame for one subscription message. `data` is `None` only for the
/// initial frame sent on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub data: Option<T>,
}

impl<T> Snapshot<T> {
    pub fn empty() -> Self {
        Self { data: None }
    }

    pub fn of(data: T) -> Self {
        Self { data: Some(data) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderNotification {
    pub ride_id: RideId,
    pub pickup_coordinate: Coordinate,
    pub destination_coordinate: Coordinate,
    pub fare: Fare,
    pub status: RideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chair: Option<AssignedChair>,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedChair {
    pub id: ChairId,
    pub name: String,
    pub model: String,
    pub stats: ChairStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChairNotification {
    pub ride_id: RideId,
    pub user: Rider,
    pub pickup_coordinate: Coordinate,
    pub destination_coordinate: Coordinate,
    pub status: RideStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rider {
    pub id: UserId,
    pub name: String,
}

/// Remembers the last delivered (ride, status) pair.
#[derive(Debug, Default)]
struct LastDelivered(Option<(RideId, RideStatus)>);

impl LastDelivered {
    fn is_repeat(&self, event: &NotifyEvent) -> bool {
        matches!(&self.0, Some((ride_id, status)) if *ride_id == event.ride.id && *status == event.status)
    }

    fn record(&mut self, event: &NotifyEvent) {
        self.0 = Some((event.ride.id.clone(), event.status));
    }
}

enum Phase {
    Connect,
    Deliver,
    Closed,
}

struct Delivery<F> {
    queue: Arc<EventQueue>,
    enrich: F,
    last: LastDelivered,
    phase: Phase,
}

/// Builds the delivery loop for one subscriber.
///
/// `enrich` turns a raw event into the subscriber-facing payload. If it
/// fails, the error is yielded and the stream ends.
pub fn delivery_stream<T, F, Fut>(queue: Arc<EventQueue>, enrich: F) -> BoxStream<'static, Result<Snapshot<T>>>
where
    T: Send + 'static,
    F: FnMut(NotifyEvent) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let state = Delivery {
        queue,
        enrich,
        last: LastDelivered::default(),
        phase: Phase::Connect,
    };
    stream::unfold(state, |mut state| async move {
        match state.phase {
            Phase::Connect => {
                state.phase = Phase::Deliver;
                Some((Ok(Snapshot::empty()), state))
            }
            Phase::Closed => None,
            Phase::Deliver => loop {
                let event = state.queue.next().await?;
                if state.last.is_repeat(&event) {
                    debug!(ride_id = %event.ride.id, status = %event.status, "suppressed repeated notification");
                    continue;
                }
                match (state.enrich)(event.clone()).await {
                    Ok(data) => {
                        state.last.record(&event);
                        return Some((Ok(Snapshot::of(data)), state));
                    }
                    Err(err) => {
                        warn!(ride_id = %event.ride.id, error = %err, "failed to build notification");
                        state.phase = Phase::Closed;
                        return Some((Err(err), state));
                    }
                }
            },
        }
    })
    .boxed()
}
