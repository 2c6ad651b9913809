// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide TDM state.
//!
//! A [`TdmContext`] is created once at start-up and handed to every client,
//! sink and source by `Arc`. It owns the single change-rejection slot and the
//! notification engine shared by all data sources.

use crate::config::TdmConfig;
use crate::notify::NotificationEngine;
use crate::sink::ChangeRejectionSlot;
use std::sync::Arc;

#[derive(Debug)]
pub struct TdmContext {
    config: TdmConfig,
    rejection: Arc<ChangeRejectionSlot>,
    notifications: Arc<NotificationEngine>,
}

impl Default for TdmContext {
    fn default() -> Self {
        Self::new(TdmConfig::default())
    }
}

impl TdmContext {
    pub fn new(config: TdmConfig) -> Self {
        log::debug!(
            "[TdmContext::new] update payload {} bytes, leaf {} bytes, {:?} versions",
            config.max_update_payload,
            config.max_leaf_size,
            config.version_policy
        );
        Self {
            config,
            rejection: Arc::new(ChangeRejectionSlot::new()),
            notifications: Arc::new(NotificationEngine::new()),
        }
    }

    pub fn config(&self) -> &TdmConfig {
        &self.config
    }

    /// The change-rejection slot shared by every sink.
    pub fn rejection_slot(&self) -> &Arc<ChangeRejectionSlot> {
        &self.rejection
    }

    pub fn notification_engine(&self) -> &Arc<NotificationEngine> {
        &self.notifications
    }
}
