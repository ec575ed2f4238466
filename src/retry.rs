use std::time::Duration;

use crate::errors::Error;
use crate::options::Options;

/// What the engine should do with a failed call or connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Surface the error to the caller.
    Fail,
    /// Re-send on the same endpoint after the delay.
    Retry(Duration),
    /// Advance to the next endpoint, reconnect and re-send after the delay.
    FailOverAndRetry(Duration),
}

/// Whether the failed step was connection establishment or an application
/// call. A connect that keeps timing out is worth abandoning for a standby
/// sooner than a slow call would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Call,
}

/// Retry decision logic. Selected once per `connect` from the options and
/// the shape of the endpoint list; consulted with per-call counters.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Fail on the first error.
    NoRetry,
    /// Fixed delay against a single endpoint.
    FixedDelay { delay: Duration, max_retries: u64 },
    /// Fixed delay plus endpoint failover with bounded exponential backoff.
    FixedDelayWithFailover {
        delay: Duration,
        max_retries: u64,
        max_failovers: u64,
        sleep_base: Duration,
        sleep_max: Duration,
    },
}

fn failover_delay(base: Duration, max: Duration, failovers: u64) -> Duration {
    let shift = failovers.min(32) as u32;
    base.checked_mul(1u32 << shift.min(31)).map_or(max, |d| d.min(max))
}

impl RetryPolicy {
    /// Pick the policy the way the engine does on `connect`: failover
    /// machinery only makes sense with somewhere to fail over to.
    pub fn from_options(options: &Options, endpoint_count: usize) -> Self {
        let delay = options.retry_delay();
        let max_retries = match options.max_rpc_retries {
            -1 => u64::MAX,
            n => n.max(0) as u64,
        };
        if endpoint_count > 1 {
            RetryPolicy::FixedDelayWithFailover {
                delay,
                max_retries,
                max_failovers: u64::from(options.failover_max_attempts),
                sleep_base: Duration::from_millis(options.failover_sleep_base_ms),
                sleep_max: Duration::from_millis(options.failover_sleep_max_ms),
            }
        } else if options.max_rpc_retries != 0 {
            RetryPolicy::FixedDelay { delay, max_retries }
        } else {
            RetryPolicy::NoRetry
        }
    }

    /// Decide what to do after a failure, given how often this call has
    /// already been retried and failed over.
    pub fn should_retry(
        &self,
        error: &Error,
        retries: u64,
        failovers: u64,
        op: Operation,
    ) -> RetryAction {
        if !error.is_retryable() {
            return RetryAction::Fail;
        }
        match *self {
            RetryPolicy::NoRetry => RetryAction::Fail,
            RetryPolicy::FixedDelay { delay, max_retries } => {
                // Without a standby a failed handshake will just fail again.
                if matches!(error, Error::HandshakeFailed(_)) {
                    return RetryAction::Fail;
                }
                if retries + failovers >= max_retries {
                    RetryAction::Fail
                } else {
                    RetryAction::Retry(delay)
                }
            }
            RetryPolicy::FixedDelayWithFailover {
                delay,
                max_retries,
                max_failovers,
                sleep_base,
                sleep_max,
            } => {
                let backoff = failover_delay(sleep_base, sleep_max, failovers);
                if failovers < max_failovers {
                    // An unresponsive or mis-speaking server is a reason to
                    // try the standby rather than to keep knocking.
                    let prefers_failover = matches!(error, Error::HandshakeFailed(_))
                        || (matches!(error, Error::Timeout) && op == Operation::Connect);
                    if prefers_failover {
                        return RetryAction::FailOverAndRetry(backoff);
                    }
                }
                if retries < max_retries && failovers < max_failovers {
                    RetryAction::Retry(delay)
                } else if retries >= max_retries && failovers < max_failovers {
                    RetryAction::FailOverAndRetry(backoff)
                } else if retries <= max_retries && failovers == max_failovers {
                    // One last plain retry on the connection we ended up on.
                    RetryAction::Retry(delay)
                } else {
                    RetryAction::Fail
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportKind;

    fn reset() -> Error {
        Error::Transport(TransportKind::ConnectionReset)
    }

    #[test]
    fn no_retry_always_fails() {
        let policy = RetryPolicy::NoRetry;
        assert_eq!(
            policy.should_retry(&reset(), 0, 0, Operation::Call),
            RetryAction::Fail
        );
    }

    #[test]
    fn fixed_delay_counts_down_then_fails() {
        let policy = RetryPolicy::FixedDelay {
            delay: Duration::from_millis(5),
            max_retries: 2,
        };
        assert_eq!(
            policy.should_retry(&reset(), 0, 0, Operation::Call),
            RetryAction::Retry(Duration::from_millis(5))
        );
        assert_eq!(
            policy.should_retry(&reset(), 1, 0, Operation::Call),
            RetryAction::Retry(Duration::from_millis(5))
        );
        assert_eq!(
            policy.should_retry(&reset(), 2, 0, Operation::Call),
            RetryAction::Fail
        );
    }

    #[test]
    fn non_retryable_errors_short_circuit() {
        let policy = RetryPolicy::FixedDelay {
            delay: Duration::ZERO,
            max_retries: 100,
        };
        for error in [
            Error::Canceled,
            Error::Shutdown,
            Error::AuthFailed("no".into()),
            Error::Protocol("bad frame".into()),
        ] {
            assert_eq!(
                policy.should_retry(&error, 0, 0, Operation::Call),
                RetryAction::Fail
            );
        }
    }

    #[test]
    fn handshake_failure_needs_a_standby() {
        let single = RetryPolicy::FixedDelay {
            delay: Duration::ZERO,
            max_retries: 10,
        };
        let err = Error::HandshakeFailed("version mismatch".into());
        assert_eq!(
            single.should_retry(&err, 0, 0, Operation::Connect),
            RetryAction::Fail
        );

        let ha = RetryPolicy::FixedDelayWithFailover {
            delay: Duration::ZERO,
            max_retries: 10,
            max_failovers: 2,
            sleep_base: Duration::from_millis(100),
            sleep_max: Duration::from_millis(400),
        };
        assert_eq!(
            ha.should_retry(&err, 0, 0, Operation::Connect),
            RetryAction::FailOverAndRetry(Duration::from_millis(100))
        );
    }

    #[test]
    fn failover_backoff_is_bounded() {
        let ha = RetryPolicy::FixedDelayWithFailover {
            delay: Duration::ZERO,
            max_retries: 0,
            max_failovers: 10,
            sleep_base: Duration::from_millis(100),
            sleep_max: Duration::from_millis(450),
        };
        // retries exhausted immediately, so every transport error fails over
        let actions: Vec<_> = (0..4)
            .map(|failovers| ha.should_retry(&reset(), 0, failovers, Operation::Call))
            .collect();
        assert_eq!(
            actions,
            vec![
                RetryAction::FailOverAndRetry(Duration::from_millis(100)),
                RetryAction::FailOverAndRetry(Duration::from_millis(200)),
                RetryAction::FailOverAndRetry(Duration::from_millis(400)),
                RetryAction::FailOverAndRetry(Duration::from_millis(450)),
            ]
        );
    }

    #[test]
    fn connect_timeout_prefers_the_standby() {
        let ha = RetryPolicy::FixedDelayWithFailover {
            delay: Duration::from_millis(1),
            max_retries: 10,
            max_failovers: 2,
            sleep_base: Duration::from_millis(10),
            sleep_max: Duration::from_millis(10),
        };
        assert_eq!(
            ha.should_retry(&Error::Timeout, 0, 0, Operation::Connect),
            RetryAction::FailOverAndRetry(Duration::from_millis(10))
        );
        // a slow call on a healthy connection retries in place first
        assert_eq!(
            ha.should_retry(&Error::Timeout, 0, 0, Operation::Call),
            RetryAction::Retry(Duration::from_millis(1))
        );
    }

    #[test]
    fn last_retry_after_failover_budget() {
        let ha = RetryPolicy::FixedDelayWithFailover {
            delay: Duration::from_millis(1),
            max_retries: 3,
            max_failovers: 1,
            sleep_base: Duration::from_millis(1),
            sleep_max: Duration::from_millis(1),
        };
        assert_eq!(
            ha.should_retry(&reset(), 1, 1, Operation::Call),
            RetryAction::Retry(Duration::from_millis(1))
        );
        assert_eq!(
            ha.should_retry(&reset(), 4, 1, Operation::Call),
            RetryAction::Fail
        );
    }

    #[test]
    fn infinite_retries_from_options() {
        let mut options = Options::default();
        options.max_rpc_retries = -1;
        options.rpc_retry_delay_ms = 0;
        let policy = RetryPolicy::from_options(&options, 1);
        assert_eq!(
            policy.should_retry(&reset(), 1_000_000, 0, Operation::Call),
            RetryAction::Retry(Duration::ZERO)
        );
    }

    #[test]
    fn policy_selection() {
        let mut options = Options::default();
        assert!(matches!(
            RetryPolicy::from_options(&options, 1),
            RetryPolicy::NoRetry
        ));
        options.max_rpc_retries = 3;
        assert!(matches!(
            RetryPolicy::from_options(&options, 1),
            RetryPolicy::FixedDelay { .. }
        ));
        assert!(matches!(
            RetryPolicy::from_options(&options, 2),
            RetryPolicy::FixedDelayWithFailover { .. }
        ));
    }
}
