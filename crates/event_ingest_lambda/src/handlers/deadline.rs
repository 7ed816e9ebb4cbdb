use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn deadline_from_epoch_ms(deadline_ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(deadline_ms)
}

/// Time left before `deadline`, minus the reserved `margin`. Saturates at zero.
pub fn remaining_budget(deadline: SystemTime, now: SystemTime, margin: Duration) -> Duration {
    deadline
        .duration_since(now)
        .unwrap_or(Duration::ZERO)
        .saturating_sub(margin)
}

/// Cancels its token once the budget runs out. Dropping the guard stops the timer.
pub struct DeadlineGuard {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl DeadlineGuard {
    pub fn start(budget: Duration) -> Self {
        let token = CancellationToken::new();
        let expired = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            warn!(
                budget_ms = budget.as_millis() as u64,
                "invocation deadline reached, cancelling in-flight work"
            );
            expired.cancel();
        });
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
