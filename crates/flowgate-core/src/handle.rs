//! Limiter handle - versioned configuration with whole-pair swap.
//!
//! The handle is constructed by the host at startup and passed by
//! reference into whatever serves requests. Settings are immutable data;
//! applying new settings installs a freshly built engine (and with it a
//! fresh counter/client pair) atomically. Nothing is patched in place,
//! so counts produced under different window semantics never mix.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::LimiterSettings;
use crate::engine::DecisionEngine;

struct Active {
    settings: LimiterSettings,
    engine: Arc<DecisionEngine>,
}

/// Owner of the live (settings, engine) pair.
pub struct LimiterHandle {
    active: RwLock<Active>,
}

impl LimiterHandle {
    pub fn new(settings: LimiterSettings, engine: Arc<DecisionEngine>) -> Self {
        Self {
            active: RwLock::new(Active { settings, engine }),
        }
    }

    /// The currently installed engine.
    pub fn engine(&self) -> Arc<DecisionEngine> {
        self.active.read().engine.clone()
    }

    pub fn settings(&self) -> LimiterSettings {
        self.active.read().settings.clone()
    }

    /// Structural equality against the live settings. Callers use this
    /// to skip rebuilding when nothing changed.
    pub fn is_active(&self, settings: &LimiterSettings) -> bool {
        self.active.read().settings == *settings
    }

    /// Install a rebuilt engine for `settings`. Returns `false` (and
    /// drops the candidate) when equal settings are already active; the
    /// equality check runs under the write lock, so two concurrent
    /// installs of the same settings swap exactly once.
    pub fn install(&self, settings: LimiterSettings, engine: Arc<DecisionEngine>) -> bool {
        let mut active = self.active.write();
        if active.settings == settings {
            return false;
        }
        *active = Active { settings, engine };
        true
    }
}
