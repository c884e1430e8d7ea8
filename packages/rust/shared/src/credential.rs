//! In-memory API key holder with idle expiry, plus log scrubbing.
//!
//! The key is never written to disk or to the artifact store. Every read
//! refreshes the idle clock; once the idle period elapses without a read the
//! key is dropped and callers get a credential error.

use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::{RoutePlannerError, Result};

/// Default idle period after which the key is forgotten.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Held {
    key: String,
    last_access: Instant,
}

/// Scoped credential cache with explicit idle expiry.
#[derive(Debug)]
pub struct ApiKeyVault {
    idle_timeout: Duration,
    inner: Mutex<Option<Held>>,
}

impl Default for ApiKeyVault {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl ApiKeyVault {
    /// Create an empty vault with the given idle period.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            inner: Mutex::new(None),
        }
    }

    /// Store a key. A blank key clears the vault.
    pub fn set(&self, key: &str) {
        let trimmed = key.trim();
        let mut guard = self.lock();
        *guard = if trimmed.is_empty() {
            None
        } else {
            Some(Held {
                key: trimmed.to_string(),
                last_access: Instant::now(),
            })
        };
    }

    /// Read the key, refreshing the idle clock. Returns `None` once expired.
    pub fn get(&self) -> Option<String> {
        let mut guard = self.lock();
        let now = Instant::now();
        match guard.as_mut() {
            Some(held) if now.duration_since(held.last_access) < self.idle_timeout => {
                held.last_access = now;
                Some(held.key.clone())
            }
            Some(_) => {
                tracing::debug!("API key expired after idle period");
                *guard = None;
                None
            }
            None => None,
        }
    }

    /// Read the key or fail with a credential error.
    pub fn require(&self) -> Result<String> {
        self.get().ok_or_else(|| {
            RoutePlannerError::Credential("API key missing, blank, or expired".into())
        })
    }

    /// Forget the key immediately.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Held>> {
        // A poisoned lock only means another reader panicked; the data is a plain string.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

static API_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(apiKey=)([^&\s]+)").expect("api key regex"));

/// Mask `apiKey=` values so URLs can be logged.
pub fn scrub_url(url: &str) -> String {
    API_KEY_RE.replace_all(url, "${1}****").into_owned()
}
