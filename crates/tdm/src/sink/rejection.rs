// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change-rejection callback slot.
//!
//! One slot exists per [`TdmContext`](crate::context::TdmContext) and is shared
//! by every sink created from it. Only one callback can be registered at a
//! time; sinks invoke it concurrently.

use crate::error::{Result, TdmError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Callback receiving the rejection status and the sink version at the time.
pub type ChangeRejectionCallback = dyn Fn(u16, Option<u64>) + Send + Sync;

#[derive(Default)]
pub struct ChangeRejectionSlot {
    callback: RwLock<Option<Arc<ChangeRejectionCallback>>>,
}

impl fmt::Debug for ChangeRejectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRejectionSlot")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl ChangeRejectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(u16, Option<u64>) + Send + Sync + 'static,
    {
        let mut slot = self.callback.write();
        if slot.is_some() {
            return Err(TdmError::AlreadyRegistered);
        }
        *slot = Some(Arc::new(callback));
        Ok(())
    }

    /// Remove the callback; returns whether one was registered.
    pub fn unregister(&self) -> bool {
        self.callback.write().take().is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.callback.read().is_some()
    }

    /// Invoke the callback if present; returns whether it ran.
    pub fn invoke(&self, status: u16, version: Option<u64>) -> bool {
        // Clone out so the callback runs without the lock held.
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => {
                callback(status, version);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_single_registration() {
        let slot = ChangeRejectionSlot::new();
        assert!(!slot.invoke(1, None));

        let seen = Arc::new(AtomicU64::new(0));
        let seen_cb = Arc::clone(&seen);
        slot.register(move |status, version| {
            seen_cb.store((u64::from(status) << 32) | version.unwrap_or(0), Ordering::SeqCst);
        })
        .expect("register");
        assert!(matches!(
            slot.register(|_, _| {}),
            Err(TdmError::AlreadyRegistered)
        ));

        assert!(slot.invoke(7, Some(9)));
        assert_eq!(seen.load(Ordering::SeqCst), (7 << 32) | 9);

        assert!(slot.unregister());
        assert!(!slot.unregister());
        slot.register(|_, _| {}).expect("register again");
    }
}
