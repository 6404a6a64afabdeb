use std::time::Duration;

use tokio::time;
use tracing::{info, instrument, warn};

use crate::ServerError;

const BASE_DELAY_MS: f64 = 250.0;
const GROWTH: f64 = 1.3;
/// Attempts after which the delay stops growing.
const GROWING_ATTEMPTS: u32 = 5;
pub const MAX_ATTEMPTS: u32 = 8;

/// Delay after the `attempt`-th failed probe, counting from zero.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(GROWING_ATTEMPTS) + 1;
    Duration::from_millis((BASE_DELAY_MS * GROWTH.powi(exponent as i32)) as u64)
}

/// Poll `url` until it answers, backing off between failures.
#[instrument(level = "trace")]
pub async fn wait_until_healthy(url: &str) -> Result<(), ServerError> {
    let client = reqwest::Client::new();

    for attempt in 0..MAX_ATTEMPTS {
        match client.get(url).send().await {
            Ok(response) => {
                info!("Lobby reachable at {} ({})", url, response.status());
                return Ok(());
            }
            Err(e) => {
                let delay = backoff_delay(attempt);
                warn!(
                    "Health check {} of {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    MAX_ATTEMPTS,
                    e,
                    delay
                );
                time::sleep(delay).await;
            }
        }
    }

    Err(ServerError::Unreachable {
        url: url.to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_plateaus() {
        let first = backoff_delay(0).as_millis();
        assert!((324..=325).contains(&first));
        assert!(backoff_delay(1) > backoff_delay(0));
        assert!(backoff_delay(4) > backoff_delay(3));
        assert_eq!(backoff_delay(5), backoff_delay(7));
    }

    #[tokio::test]
    async fn unreachable_lobby_fails_after_bounded_attempts() {
        let result = wait_until_healthy("http://127.0.0.1:9/socket/status").await;

        assert!(matches!(
            result,
            Err(ServerError::Unreachable {
                attempts: MAX_ATTEMPTS,
                ..
            })
        ));
    }
}
