use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Instant};

use crate::bus::{Envelope, Header, Message, MessageQueue};
use crate::{Error, Event};

/// Timings of a [MemoryQueue].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long [receive](MessageQueue::receive) waits for a message before returning `None`.
    pub wait: Duration,
    /// How long a received message stays hidden before it is delivered again.
    pub reservation: Duration,
    /// How long a released message stays hidden before it is delivered again.
    pub release_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(30),
            reservation: Duration::from_secs(60),
            release_delay: Duration::from_secs(3),
        }
    }
}

impl QueueSettings {
    /// Settings without delays: an empty receive returns at once and released messages are ready
    /// immediately.
    pub fn immediate() -> Self {
        Self {
            wait: Duration::ZERO,
            release_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// The number of messages of a [MemoryQueue] in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages that can be received now.
    pub ready: usize,
    /// Messages received and neither acknowledged nor released.
    pub reserved: usize,
    /// Released messages waiting for their delay to elapse.
    pub delayed: usize,
}

enum Reserved {
    Message(Message),
    /// Nothing is ready; a hidden message becomes ready at the given instant, if any.
    Nothing(Option<Instant>),
}

struct Reservation {
    body: String,
    expires: Instant,
}

#[derive(Default)]
struct QueueState {
    next_receipt: u64,
    ready: VecDeque<String>,
    reserved: HashMap<u64, Reservation>,
    delayed: Vec<(Instant, String)>,
    closed: bool,
}

impl QueueState {
    /// Makes delayed messages whose delay elapsed and expired reservations ready again.
    fn promote(&mut self, now: Instant) {
        let (due, pending) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition::<Vec<_>, _>(|(at, _)| *at <= now);
        self.delayed = pending;
        self.ready.extend(due.into_iter().map(|(_, body)| body));

        let expired: Vec<u64> = self
            .reserved
            .iter()
            .filter(|(_, reservation)| reservation.expires <= now)
            .map(|(receipt, _)| *receipt)
            .collect();
        for receipt in expired {
            if let Some(reservation) = self.reserved.remove(&receipt) {
                log::debug!("Reservation {receipt} expired, delivering the message again");
                self.ready.push_back(reservation.body);
            }
        }
    }

    /// The next instant a hidden message becomes ready.
    fn next_due(&self) -> Option<Instant> {
        let delayed = self.delayed.iter().map(|(at, _)| *at);
        let reserved = self.reserved.values().map(|reservation| reservation.expires);
        delayed.chain(reserved).min()
    }
}

/// A message queue held in memory, with the reservation semantics of hosted queues.
///
/// Messages are stored as serialized [envelopes](Envelope). A message that cannot be decoded when
/// it is received is dropped.
pub struct MemoryQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Sends an event with message attributes.
    pub async fn send_with_header(&self, event: &Event, header: Header) -> Result<(), Error> {
        let body = Envelope::seal(event, header)?.to_json()?;
        self.send_raw(body).await
    }

    /// Sends an already serialized envelope.
    pub async fn send_raw(&self, body: impl Into<String>) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::QueueClosed);
        }
        state.ready.push_back(body.into());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Counts the messages in each state.
    pub async fn stats(&self) -> QueueStats {
        let mut state = self.state.lock().await;
        state.promote(Instant::now());
        QueueStats {
            ready: state.ready.len(),
            reserved: state.reserved.len(),
            delayed: state.delayed.len(),
        }
    }

    /// Closes the queue: pending and future receives fail with [Error::QueueClosed].
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    async fn reserve(&self) -> Result<Reserved, Error> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::QueueClosed);
        }
        let now = Instant::now();
        state.promote(now);
        while let Some(body) = state.ready.pop_front() {
            let opened = Envelope::from_json(&body)
                .and_then(|envelope| Ok((envelope.open()?, envelope.header)));
            match opened {
                Ok((event, header)) => {
                    state.next_receipt += 1;
                    let receipt = state.next_receipt;
                    let expires = now + self.settings.reservation;
                    state.reserved.insert(receipt, Reservation { body, expires });
                    return Ok(Reserved::Message(Message::new(receipt, header, event)));
                }
                Err(error) => log::warn!("Dropping malformed message: {error}"),
            }
        }
        Ok(Reserved::Nothing(state.next_due()))
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive(&self) -> Result<Option<Message>, Error> {
        let deadline = Instant::now() + self.settings.wait;
        loop {
            let next_due = match self.reserve().await? {
                Reserved::Message(message) => return Ok(Some(message)),
                Reserved::Nothing(next_due) => next_due,
            };
            if Instant::now() >= deadline {
                log::debug!("No message received within {:?}", self.settings.wait);
                return Ok(None);
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            let _ = time::timeout_at(wake, self.notify.notified()).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), Error> {
        self.state
            .lock()
            .await
            .reserved
            .remove(&message.receipt())
            .map(|_| ())
            .ok_or(Error::UnknownReceipt(message.receipt()))
    }

    async fn nack(&self, message: &Message) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let reservation = state
            .reserved
            .remove(&message.receipt())
            .ok_or(Error::UnknownReceipt(message.receipt()))?;
        let due = Instant::now() + self.settings.release_delay;
        state.delayed.push((due, reservation.body));
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn send(&self, event: &Event) -> Result<(), Error> {
        self.send_with_header(event, Header::new()).await
    }
}
