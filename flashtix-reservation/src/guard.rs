use flashtix_core::{AcquireOutcome, LeaseStore, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub enum Acquisition {
    Acquired(LeaseGuard),
    Held { holder: Option<String> },
}

/// Scoped ownership of a freshly acquired lease.
///
/// While armed, dropping the guard releases the lease on the current tokio
/// runtime. This covers early returns and a caller abandoning the future
/// mid-flight. `commit` disarms it once the lease should outlive the call.
pub struct LeaseGuard {
    leases: Arc<dyn LeaseStore>,
    key: String,
    holder: String,
    armed: bool,
}

impl LeaseGuard {
    pub async fn acquire(
        leases: Arc<dyn LeaseStore>,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<Acquisition> {
        match leases.acquire(key, holder, ttl).await? {
            AcquireOutcome::Acquired => Ok(Acquisition::Acquired(LeaseGuard {
                leases,
                key: key.to_string(),
                holder: holder.to_string(),
                armed: true,
            })),
            AcquireOutcome::AlreadyHeld { holder } => Ok(Acquisition::Held { holder }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Keeps the lease alive past the guard.
    pub fn commit(mut self) {
        self.armed = false;
    }

    /// Best-effort compensating release. A failure is logged and left to TTL
    /// expiry plus the reconciler.
    pub async fn release(mut self) {
        self.armed = false;
        match self.leases.release_held(&self.key, &self.holder).await {
            Ok(_) => debug!("Compensating release of lease {}", self.key),
            Err(e) => warn!("Compensating release of lease {} failed, relying on TTL: {}", self.key, e),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let leases = Arc::clone(&self.leases);
        let key = std::mem::take(&mut self.key);
        let holder = std::mem::take(&mut self.holder);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = leases.release_held(&key, &holder).await {
                        warn!("Release of abandoned lease {} failed, relying on TTL: {}", key, e);
                    } else {
                        debug!("Released abandoned lease {}", key);
                    }
                });
            }
            Err(_) => warn!("No runtime to release abandoned lease {}, relying on TTL", key),
        }
    }
}
