//! Global emergency stop. When engaged, the executor denies every tool
//! call before any other check runs.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct EmergencyStop {
    engaged: AtomicBool,
}

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        if !self.engaged.swap(true, Ordering::SeqCst) {
            tracing::error!("emergency stop engaged: all tool execution halted");
        }
    }

    pub fn release(&self) {
        if self.engaged.swap(false, Ordering::SeqCst) {
            tracing::warn!("emergency stop released");
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}
