//! Provider registry and failover rotation.
//!
//! Providers are held in ascending `priority` order. The agent loop walks
//! the rotation: a provider whose API key cannot be resolved is skipped,
//! and the first usable provider becomes *sticky* for the remainder of
//! the loop.

use std::sync::Arc;

use owlia_domain::error::{Error, Result};

use crate::traits::LlmProvider;

/// One registered provider plus its failover metadata.
#[derive(Clone)]
pub struct ProviderEntry {
    pub id: String,
    /// Lower number = tried first.
    pub priority: u32,
    /// Environment variable holding the API key; `None` means no key is
    /// required (CLI providers).
    pub api_key_env: Option<String>,
    pub provider: Arc<dyn LlmProvider>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

/// Holds all instantiated providers sorted by priority.
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new(mut entries: Vec<ProviderEntry>) -> Self {
        entries.sort_by_key(|e| e.priority);
        for entry in &entries {
            tracing::info!(
                provider_id = %entry.id,
                priority = entry.priority,
                "registered LLM provider"
            );
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Resolve the API key for an entry. An entry without a configured key
    /// env resolves trivially; a configured but unset/empty env var fails.
    pub fn resolve_api_key(&self, entry: &ProviderEntry) -> Result<()> {
        match &entry.api_key_env {
            None => Ok(()),
            Some(env) => match std::env::var(env) {
                Ok(v) if !v.trim().is_empty() => Ok(()),
                _ => Err(Error::Auth(format!(
                    "provider '{}': API key env '{env}' is unset (run auth setup)",
                    entry.id
                ))),
            },
        }
    }

    /// Begin a failover rotation for one agent loop.
    pub fn rotation(&self) -> FailoverRotation<'_> {
        FailoverRotation {
            registry: self,
            sticky: None,
        }
    }
}

/// Walks the registry in priority order, skipping providers whose key
/// resolution fails; the first success sticks.
pub struct FailoverRotation<'a> {
    registry: &'a ProviderRegistry,
    sticky: Option<usize>,
}

impl FailoverRotation<'_> {
    /// The provider to use for the next turn.
    pub fn current(&mut self) -> Result<&ProviderEntry> {
        if let Some(idx) = self.sticky {
            return Ok(&self.registry.entries[idx]);
        }

        let mut last_err = None;
        for (idx, entry) in self.registry.entries.iter().enumerate() {
            match self.registry.resolve_api_key(entry) {
                Ok(()) => {
                    if idx > 0 {
                        tracing::info!(
                            provider_id = %entry.id,
                            skipped = idx,
                            "provider failover selected a lower-priority provider"
                        );
                    }
                    self.sticky = Some(idx);
                    return Ok(&self.registry.entries[idx]);
                }
                Err(e) => {
                    tracing::warn!(provider_id = %entry.id, error = %e, "provider unavailable, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Config("no LLM providers configured".into())))
    }
}
