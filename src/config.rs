use std::time::Duration;
use anyhow::bail;

pub struct ReceiverConfig {
    /// This is the upper bound for the payload size a header may declare. A header declaring
    ///  more is not received at all: its connection completes on the first receive step with
    ///  a protocol violation that is handed to the dispatcher.
    pub max_payload_size: usize,

    /// The number of poll workers spawned by a `ReceiverEndpoint`. Each worker calls `poll()` in
    ///  a loop, so this is the maximum number of concurrent pollers.
    pub num_poll_workers: usize,

    /// A poll worker keeps polling eagerly (only yielding to other tasks) for this number of
    ///  consecutive unproductive polls before it starts sleeping between polls.
    pub idle_polls_before_backoff: usize,
    pub initial_idle_delay: Duration,
    pub max_idle_delay: Duration,
    /// growth factor of the idle delay per unproductive poll, in eighths (i.e. 16 doubles it)
    pub idle_delay_factor_eighths: u32,
}

impl ReceiverConfig {
    pub fn default_config() -> ReceiverConfig {
        ReceiverConfig {
            max_payload_size: 64*1024*1024,
            num_poll_workers: 2,
            idle_polls_before_backoff: 16,
            initial_idle_delay: Duration::from_micros(50),
            max_idle_delay: Duration::from_millis(5),
            idle_delay_factor_eighths: 16,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payload_size == 0 {
            bail!("Maximum payload size must be positive");
        }
        if self.num_poll_workers == 0 {
            bail!("At least one poll worker is required");
        }
        if self.idle_delay_factor_eighths < 8 {
            bail!("Idle delay factor must be at least 8/8, i.e. delays must not shrink");
        }
        if self.initial_idle_delay > self.max_idle_delay {
            bail!("Initial idle delay is bigger than the maximum idle delay");
        }

        Ok(())
    }
}
