//! Proactive renewal ahead of access token expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{ErrorKind, RefreshErrorKind};
use crate::jwt::{decode_claims, Claims};
use crate::refresh::RefreshCoordinator;
use crate::state::SessionPublisher;

/// Default margin between a scheduled renewal and the token's expiry.
pub const DEFAULT_LEAD_TIME: Duration = Duration::from_secs(60);

/// Shortest gap between two scheduled renewals. A renewed token that is
/// already due (undecodable, or expiring inside the lead time) waits this long
/// instead of firing straight away.
pub const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait before renewing a token with the given claims.
///
/// Undecodable tokens count as expired and renew immediately. A decodable
/// payload without an `exp` claim is never scheduled.
pub fn fire_delay(claims: Option<&Claims>, now: DateTime<Utc>, lead_time: Duration) -> Option<Duration> {
    let Some(claims) = claims else {
        return Some(Duration::ZERO);
    };
    let expires_at = claims.expires_at()?;
    let fire_at = TimeDelta::from_std(lead_time)
        .ok()
        .and_then(|lead_time| expires_at.checked_sub_signed(lead_time))
        .unwrap_or(now);
    Some((fire_at - now).to_std().unwrap_or(Duration::ZERO))
}

struct ArmedTimer {
    epoch: u64,
    // Dropping the sender wakes and ends the timer task.
    _cancel: oneshot::Sender<()>,
}

/// One-shot timer that renews the current access token before it expires.
///
/// At most one timer is live. Arming cancels the previous timer first.
pub struct ExpiryScheduler {
    coordinator: Arc<RefreshCoordinator>,
    publisher: Arc<SessionPublisher>,
    lead_time: Duration,
    slot: Mutex<Option<ArmedTimer>>,
    epoch: AtomicU64,
    last_renewal: Mutex<Option<Instant>>,
}

impl ExpiryScheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        publisher: Arc<SessionPublisher>,
        lead_time: Duration,
    ) -> Self {
        Self {
            coordinator,
            publisher,
            lead_time,
            slot: Mutex::new(None),
            epoch: AtomicU64::new(0),
            last_renewal: Mutex::new(None),
        }
    }

    /// Replaces the live timer with one derived from `access_token`.
    pub fn arm(self: &Arc<Self>, access_token: &SecretString) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.timer_slot();
        slot.take();

        let claims = decode_claims(access_token.expose_secret());
        let Some(delay) = fire_delay(claims.as_ref(), Utc::now(), self.lead_time) else {
            debug!("Access token carries no expiry, renewal left to 401 handling");
            return;
        };
        let delay = match self.until_next_renewal_allowed() {
            Some(wait) if wait > delay => {
                warn!(
                    "Last renewal was recent, holding the next one for {}s",
                    wait.as_secs()
                );
                wait
            }
            _ => delay,
        };
        debug!("Scheduling token renewal in {}s", delay.as_secs());

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        *slot = Some(ArmedTimer {
            epoch,
            _cancel: cancel_tx,
        });
        drop(slot);

        let scheduler = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx => return,
            }
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.fire(epoch).await;
            }
        });
    }

    /// Cancels the live timer, if any.
    pub fn cancel(&self) {
        if self.timer_slot().take().is_some() {
            debug!("Cancelled scheduled token renewal");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer_slot().is_some()
    }

    /// Keeps the timer in step with committed access tokens until the channel
    /// closes or the scheduler is dropped.
    pub fn follow(self: &Arc<Self>, mut tokens: watch::Receiver<Option<SecretString>>) -> JoinHandle<()> {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let current = tokens.borrow_and_update().clone();
                let Some(strong) = scheduler.upgrade() else {
                    break;
                };
                match current {
                    Some(access_token) => strong.arm(&access_token),
                    None => strong.cancel(),
                }
                drop(strong);

                if tokens.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn fire(&self, epoch: u64) {
        {
            let mut slot = self.timer_slot();
            if slot.as_ref().map(|timer| timer.epoch) != Some(epoch) {
                return;
            }
            slot.take();
        }
        *self.renewal_slot() = Some(Instant::now());

        debug!("Access token is close to expiry, renewing");
        match self.coordinator.refresh_access_token().await {
            Ok(_) => {}
            Err(e) if e.error_kind == ErrorKind::Refresh(RefreshErrorKind::Superseded) => {
                debug!("Scheduled renewal outlived its session");
            }
            Err(e) => {
                warn!("Scheduled token renewal failed: {}", e);
                if self.publisher.is_authenticated() {
                    self.coordinator.end_session().await;
                }
            }
        }
    }

    /// Time left before another scheduled renewal may run, if any.
    fn until_next_renewal_allowed(&self) -> Option<Duration> {
        let last = (*self.renewal_slot())?;
        MIN_RENEWAL_INTERVAL.checked_sub(last.elapsed())
    }

    fn renewal_slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_renewal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<ArmedTimer>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
