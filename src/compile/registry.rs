//! Process-wide registry of compiled session caches.
//!
//! Attempts of the same question share one [`SessionCache`]. Entries are keyed
//! by question name plus a fingerprint of its definition, so an edited question
//! is recompiled rather than served stale.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;

use super::{SessionCache, SessionCompiler};
use crate::error::{CompileResult, QuestionError};
use crate::question::Question;

/// Concurrent map from question fingerprint to compiled cache.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: DashMap<String, Arc<SessionCache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cache for `question`, compiling it on first use.
    pub fn get_or_compile(&self, question: &Question) -> CompileResult<Arc<SessionCache>> {
        let key = fingerprint(question)?;
        if let Some(cache) = self.caches.get(&key) {
            return Ok(Arc::clone(cache.value()));
        }

        let compiled = Arc::new(SessionCompiler::compile(question)?);
        tracing::info!(question = %question.name, key = %key, "session cache compiled");
        // Another thread may have compiled concurrently; keep whichever landed first.
        let entry = self.caches.entry(key).or_insert(compiled);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop every cached compilation of the named question.
    pub fn invalidate(&self, question: &str) -> usize {
        let prefix = format!("{question}#");
        let before = self.caches.len();
        self.caches.retain(|key, _| !key.starts_with(&prefix));
        before - self.caches.len()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

fn fingerprint(question: &Question) -> CompileResult<String> {
    let canonical = serde_json::to_string(question).map_err(|e| QuestionError::Parse {
        message: format!("cannot fingerprint question: {e}"),
    })?;
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    Ok(format!("{}#{:016x}", question.name, hasher.finish()))
}
