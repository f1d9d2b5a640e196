//! TTL'd action-definition cache.
//!
//! Refreshes happen at most once per TTL, and immediately when the
//! requested source flips (catalog ↔ studio). A failed load falls back to
//! the alternate source once; if both fail the previous cache is kept so
//! one flaky tick never empties the catalog.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use huginn_core::ActionDefinition;
use huginn_store::{ActionProvider, DefinitionSource};

pub struct DefinitionCache {
    provider: Arc<dyn ActionProvider>,
    ttl: Duration,
    definitions: Vec<ActionDefinition>,
    /// Source the cached definitions were loaded from (or requested from,
    /// after a failed refresh).
    loaded_from: Option<DefinitionSource>,
    last_refresh: Option<DateTime<Utc>>,
}

impl DefinitionCache {
    pub fn new(provider: Arc<dyn ActionProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            definitions: Vec::new(),
            loaded_from: None,
            last_refresh: None,
        }
    }

    /// The cached definitions; possibly stale if the last refresh failed.
    pub fn definitions(&self) -> &[ActionDefinition] {
        &self.definitions
    }

    fn is_fresh(&self, source: DefinitionSource, now: DateTime<Utc>) -> bool {
        if self.loaded_from != Some(source) {
            return false;
        }
        match self.last_refresh {
            Some(at) => now.signed_duration_since(at).to_std().is_ok_and(|d| d < self.ttl),
            None => false,
        }
    }

    /// Reload from `source` if the cache is stale or the source changed.
    ///
    /// `last_refresh` advances after every attempt, success or not, so a
    /// persistently failing source is retried once per TTL rather than
    /// every tick.
    pub async fn refresh_if_needed(&mut self, source: DefinitionSource, now: DateTime<Utc>) {
        if self.is_fresh(source, now) {
            return;
        }
        if self.loaded_from.is_some_and(|s| s != source) {
            info!(from = %source.alternate(), to = %source, "definition source changed, reloading");
        }

        match self.provider.list_from(source).await {
            Ok(defs) => {
                debug!(%source, count = defs.len(), "refreshed action definitions");
                self.definitions = defs;
            }
            Err(err) => {
                let fallback = source.alternate();
                warn!(%source, %err, fallback = %fallback, "definition source failed, trying fallback");
                match self.provider.list_from(fallback).await {
                    Ok(defs) => {
                        info!(%fallback, count = defs.len(), "loaded definitions from fallback source");
                        self.definitions = defs;
                    }
                    Err(fallback_err) => {
                        error!(
                            %source,
                            %fallback_err,
                            cached = self.definitions.len(),
                            "both definition sources failed, keeping stale cache"
                        );
                    }
                }
            }
        }

        self.loaded_from = Some(source);
        self.last_refresh = Some(now);
    }
}
