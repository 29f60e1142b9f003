pub mod contacts;
pub mod email;

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::core::connectors::{ConnectorError, ErrorKind};

pub(crate) const EMAIL_CURSOR: &str = "email";
pub(crate) const CONTACT_CURSOR: &str = "contact";

#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Users polled concurrently within one cycle.
    pub concurrency: usize,
    /// Ceiling for one user's iteration; a hung connector call forfeits only
    /// that user's slot in the cycle.
    pub per_user_timeout: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_user_timeout: Duration::from_secs(20),
        }
    }
}

/// Run one poll cycle over the user set with bounded concurrency and a
/// per-user timeout. Every per-user failure is terminal-logged here; nothing
/// escapes to stop the cycle or the interval timer driving it.
pub(crate) async fn fan_out<F, Fut>(
    poller: &'static str,
    users: Vec<String>,
    settings: &PollerSettings,
    poll_user: F,
) where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let concurrency = settings.concurrency.max(1);
    for batch in users.chunks(concurrency) {
        let mut joins = JoinSet::new();
        for user in batch {
            let user = user.clone();
            let poll_user = poll_user.clone();
            let timeout = settings.per_user_timeout;
            joins.spawn(async move {
                let outcome = tokio::time::timeout(timeout, poll_user(user.clone())).await;
                (user, outcome)
            });
        }

        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => {}
                Ok((user, Ok(Err(e)))) => log_poll_error(poller, &user, &e),
                Ok((user, Err(_))) => {
                    warn!("[{}] iteration timed out for user {}; skipping", poller, user);
                }
                Err(e) => error!("[{}] poll task panicked: {}", poller, e),
            }
        }
    }
}

/// Auth expiry gets its own log line; the handling is identical
/// (skip this user, keep polling the rest).
pub(crate) fn log_poll_error(poller: &str, user_id: &str, err: &anyhow::Error) {
    match err.downcast_ref::<ConnectorError>().map(|c| c.kind) {
        Some(ErrorKind::AuthExpired) => {
            warn!(
                "[{}] credentials expired for user {}; skipping until refreshed: {}",
                poller, user_id, err
            );
        }
        Some(ErrorKind::RateLimited) => {
            warn!("[{}] rate limited for user {}; skipping this cycle: {}", poller, user_id, err);
        }
        _ => {
            warn!("[{}] iteration failed for user {}: {}", poller, user_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn one_failing_user_does_not_stop_the_cycle() {
        let polled = Arc::new(AtomicUsize::new(0));
        let polled_in = polled.clone();

        fan_out(
            "test-poller",
            vec!["bad".to_string(), "good-1".to_string(), "good-2".to_string()],
            &PollerSettings::default(),
            move |user| {
                let polled = polled_in.clone();
                async move {
                    if user == "bad" {
                        return Err(anyhow!("boom"));
                    }
                    polled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(polled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hung_user_is_cut_off_by_the_timeout() {
        let polled = Arc::new(AtomicUsize::new(0));
        let polled_in = polled.clone();
        let settings = PollerSettings {
            concurrency: 1,
            per_user_timeout: Duration::from_millis(50),
        };

        fan_out(
            "test-poller",
            vec!["stuck".to_string(), "fine".to_string()],
            &settings,
            move |user| {
                let polled = polled_in.clone();
                async move {
                    if user == "stuck" {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    polled.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(polled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_user_set_is_a_noop() {
        fan_out("test-poller", Vec::new(), &PollerSettings::default(), |_| async {
            Ok(())
        })
        .await;
    }
}
