//! # Handshake retry loop.
//!
//! Adapts the supervisor's per-attempt policy to one [`ProtocolClient`]:
//! ```text
//! loop {
//!   ├─► attempt += 1
//!   ├─► timeout(per_attempt, client.initialize())
//!   │     ├─► Ok                 → done
//!   │     ├─► auth challenge     → give up now (caller decides NeedsAuth)
//!   │     └─► Err / timed out    → last_err
//!   ├─► attempt == ceiling       → give up
//!   └─► sleep(backoff.next(attempt - 1)), aborted by cancel
//! }
//! ```
//!
//! ## Rules
//! - Attempts run sequentially; a slow attempt is bounded by its own timeout only.
//! - Cancellation (process exited, stop requested) is honoured between attempts.

use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ProtocolClient;
use crate::error::ClientError;
use crate::policies::BackoffPolicy;

/// Retry parameters for one handshake.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandshakePlan {
    pub(crate) attempts: u32,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) per_attempt: Duration,
}

/// Why a handshake gave up.
#[derive(Debug)]
pub(crate) struct HandshakeFailure {
    pub(crate) attempts: u32,
    pub(crate) error: ClientError,
}

/// Runs `initialize` until it succeeds or the plan is exhausted.
pub(crate) async fn handshake(
    server: &str,
    client: &dyn ProtocolClient,
    plan: HandshakePlan,
    cancel: &CancellationToken,
) -> Result<u32, HandshakeFailure> {
    let ceiling = plan.attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(server, attempt, ceiling, "handshake attempt");

        let error = match time::timeout(plan.per_attempt, client.initialize()).await {
            Ok(Ok(())) => return Ok(attempt),
            Ok(Err(e)) => e,
            Err(_elapsed) => ClientError::Timeout(plan.per_attempt),
        };

        if error.is_auth_challenge() || attempt >= ceiling || cancel.is_cancelled() {
            return Err(HandshakeFailure {
                attempts: attempt,
                error,
            });
        }

        let delay = plan.backoff.next(attempt - 1);
        warn!(server, attempt, ?delay, error = %error, "handshake failed; retrying");

        select! {
            _ = time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return Err(HandshakeFailure { attempts: attempt, error });
            }
        }
    }
}
