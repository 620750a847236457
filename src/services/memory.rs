//! In-process service implementations.
//!
//! Useful for tests and for running the engine without a backend. Stores
//! are `Arc<RwLock<HashMap>>` backed, thread-safe and cheaply cloneable;
//! contents are lost when the last clone is dropped.

use super::{CorrectionService, KnowledgeStore, SessionStore, SpeechSynthesizer};
use crate::error::{EngineError, Result};
use crate::registration::{Article, NewArticle};
use crate::session::{SessionId, SessionStatus, Turn};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A session as held by [`MemorySessionStore`].
#[derive(Debug, Clone)]
pub struct StoredSession {
    /// Mode tag.
    pub mode: String,
    /// Appended turns.
    pub turns: Vec<Turn>,
    /// Lifecycle status.
    pub status: SessionStatus,
}

/// In-memory session store.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, StoredSession>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored session.
    pub async fn get(&self, id: &str) -> Option<StoredSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, mode: &str) -> Result<SessionId> {
        let id = generate_id("sess");
        self.sessions.write().await.insert(
            id.clone(),
            StoredSession {
                mode: mode.to_owned(),
                turns: Vec::new(),
                status: SessionStatus::Active,
            },
        );
        Ok(id)
    }

    async fn append_messages(&self, id: &str, turns: &[Turn]) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::Session(format!("session not found: {id}")))?;
        if session.status == SessionStatus::Completed {
            return Err(EngineError::Session(format!("session {id} is completed")));
        }
        session.turns.extend_from_slice(turns);
        Ok(())
    }

    async fn complete_session(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::Session(format!("session not found: {id}")))?;
        session.status = SessionStatus::Completed;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

/// In-memory knowledge store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKnowledgeStore {
    articles: Arc<RwLock<HashMap<String, Article>>>,
    invalidations: Arc<AtomicUsize>,
}

impl MemoryKnowledgeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored articles.
    pub async fn all(&self) -> Vec<Article> {
        self.articles.read().await.values().cloned().collect()
    }

    /// How many times the cache was invalidated.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn create(&self, article: &NewArticle) -> Result<String> {
        if article.title.trim().is_empty() {
            return Err(EngineError::Knowledge("article title is empty".into()));
        }
        let id = generate_id("kn");
        self.articles.write().await.insert(
            id.clone(),
            Article {
                id: id.clone(),
                fields: article.clone(),
            },
        );
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Article> {
        self.articles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Knowledge(format!("article not found: {id}")))
    }

    fn invalidate_cache(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Correction service that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCorrection;

#[async_trait]
impl CorrectionService for PassthroughCorrection {
    async fn correct(&self, text: &str) -> Result<String> {
        Ok(text.to_owned())
    }
}

/// Synthesizer that "plays" instantly without producing sound.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn speak(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}
