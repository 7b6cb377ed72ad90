//! Synthetic chat workload generation.
//!
//! Each simulated user walks a two-state lifecycle: an idle user always
//! joins, an active user either leaves or keeps talking.

use std::collections::HashMap;

use chat_protocol::MessageType;
use chrono::Utc;
use rand::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WorkloadConfig;
use crate::request::Request;

/// Message bodies. Only their presence and size matter to the service.
pub const MESSAGE_CORPUS: [&str; 50] = [
    "Hello everyone",
    "Anyone around?",
    "Good morning",
    "Good evening",
    "brb",
    "Back again",
    "What is the plan for today?",
    "Lunch at noon?",
    "Deploy went fine",
    "Rolling back now",
    "Can someone review my change?",
    "Looks good to me",
    "Ship it",
    "Not yet, tests are red",
    "Flaky test again",
    "Retrying the build",
    "Coffee time",
    "Meeting in five",
    "Running late",
    "On my way",
    "Thanks!",
    "No problem",
    "Interesting idea",
    "Let me check",
    "Found the bug",
    "It was a race condition",
    "Cache miss storm",
    "Queue is backing up",
    "Latency spiked at 3pm",
    "Throughput looks stable",
    "p99 is creeping up",
    "Scaling out the pool",
    "Connection reset by peer",
    "Timeouts on room 7",
    "All green now",
    "Weekend plans?",
    "Hiking if it does not rain",
    "Reading a good book",
    "Watching the match",
    "See you tomorrow",
    "Good night",
    "Ping",
    "Pong",
    "Testing one two",
    "Load test in progress",
    "Ignore this message",
    "Little's Law holds",
    "Arrival rate equals concurrency over latency",
    "Backpressure works",
    "Bye",
];

/// Lifecycle of a simulated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserState {
    #[default]
    Idle,
    Active,
}

/// Produces a finite stream of chat requests.
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: StdRng,
    user_states: HashMap<u32, UserState>,
}

impl WorkloadGenerator {
    /// Create a new generator.
    ///
    /// A zero `user_id_range` or `room_count` is raised to 1.
    pub fn new(mut config: WorkloadConfig) -> Self {
        config.user_id_range = config.user_id_range.max(1);
        config.room_count = config.room_count.max(1);

        // Use seed if provided for reproducible tests, otherwise use entropy
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            rng,
            user_states: HashMap::new(),
        }
    }

    /// Current lifecycle state of a user.
    pub fn state_of(&self, user_id: u32) -> UserState {
        self.user_states.get(&user_id).copied().unwrap_or_default()
    }

    /// Number of users seen so far.
    pub fn users_seen(&self) -> usize {
        self.user_states.len()
    }

    /// Generate the next request and advance the user's state.
    pub fn next_request(&mut self) -> Request {
        let user_id = self.rng.gen_range(1..=self.config.user_id_range);
        let room_id = self.rng.gen_range(1..=self.config.room_count);

        let state = self.user_states.entry(user_id).or_default();
        let kind = match *state {
            UserState::Idle => {
                *state = UserState::Active;
                MessageType::Join
            }
            UserState::Active => {
                if self.rng.gen::<f64>() < self.config.leave_probability {
                    *state = UserState::Idle;
                    MessageType::Leave
                } else {
                    MessageType::Text
                }
            }
        };

        let message = MESSAGE_CORPUS
            .choose(&mut self.rng)
            .copied()
            .unwrap_or_default();

        Request {
            user_id,
            username: format!("user{}", user_id),
            message: message.to_string(),
            timestamp: Utc::now(),
            kind,
            room_id: room_id.to_string(),
        }
    }

    /// Push exactly `total` requests into `output`, then close it.
    ///
    /// Blocks on a full queue. Returns the number of requests delivered,
    /// which is short of `total` only if every receiver went away.
    pub async fn run(mut self, total: u64, output: mpsc::Sender<Request>) -> u64 {
        let mut sent = 0;
        while sent < total {
            let request = self.next_request();
            if output.send(request).await.is_err() {
                warn!(sent, total, "Request queue closed early, stopping generator");
                break;
            }
            sent += 1;
        }
        debug!(sent, users = self.user_states.len(), "Generator finished");
        // `output` drops here, closing the queue
        sent
    }

    /// Run the generator on its own task behind a bounded queue.
    pub fn spawn(self, total: u64) -> (JoinHandle<u64>, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let handle = tokio::spawn(self.run(total, tx));
        (handle, rx)
    }
}
