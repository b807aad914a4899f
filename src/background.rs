use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;
use crate::config::ReceiverConfig;
use crate::receiver::Receiver;

/// Adaptive backoff for polling: poll eagerly while polls are productive, and sleep for
///  exponentially increasing intervals after a run of unproductive polls.
pub struct PollBackoff {
    num_idle_polls: usize,
    delay: Duration,

    config_idle_polls_before_backoff: usize,
    config_initial_delay: Duration,
    config_max_delay: Duration,
    config_factor_eighths: u32,
}

impl PollBackoff {
    pub fn new(config: &ReceiverConfig) -> Self {
        let result = PollBackoff {
            num_idle_polls: 0,
            delay: config.initial_idle_delay,
            config_idle_polls_before_backoff: config.idle_polls_before_backoff,
            config_initial_delay: config.initial_idle_delay,
            config_max_delay: config.max_idle_delay,
            config_factor_eighths: config.idle_delay_factor_eighths,
        };

        assert!(result.config_factor_eighths >= 8);

        result
    }

    /// Registers the outcome of a poll, returning the time to sleep before the next poll
    ///  (`None` to poll again right away).
    #[must_use]
    pub fn on_poll(&mut self, was_productive: bool) -> Option<Duration> {
        if was_productive {
            self.num_idle_polls = 0;
            self.delay = self.config_initial_delay;
            return None;
        }

        self.num_idle_polls += 1;
        if self.num_idle_polls <= self.config_idle_polls_before_backoff {
            return None;
        }

        let result = self.delay;
        self.delay = match self.delay.checked_mul(self.config_factor_eighths) {
            Some(d) => min(d / 8, self.config_max_delay),
            None => self.config_max_delay,
        };
        Some(result)
    }
}

/// Spawns a task that polls the receiver until it is aborted. Productive polls are followed by
///  a yield to give other tasks on the runtime a chance, unproductive polls by a backoff delay.
pub fn spawn_poll_worker(receiver: Arc<Receiver>, config: Arc<ReceiverConfig>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = PollBackoff::new(&config);
        loop {
            match backoff.on_poll(receiver.poll()) {
                None => tokio::task::yield_now().await,
                Some(delay) => {
                    trace!("idle - sleeping for {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    })
}
