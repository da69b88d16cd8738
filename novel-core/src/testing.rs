//! Testing utilities for the narrative engine.
//!
//! This module provides deterministic stand-ins for the collaborators:
//! - `ScriptedGenerator` replays scripted replies and chunk streams
//! - `MemoryIndex` is an in-memory retrieval index with failure injection
//! - `TestNovel` seeds a store with a novel, a volume and a few chapters

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::model::{Chapter, NovelId, VolumeId};
use crate::provider::{
    ChunkStream, Generated, GenerationRequest, Generator, IndexHealth, ProviderError,
    RetrievalIndex, TokenUsage,
};
use crate::store::{NewChapter, Store};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One scripted generator call.
#[derive(Debug, Clone)]
pub enum Script {
    /// A complete reply; streamed as a single chunk.
    Reply(String),
    /// A reply delivered as these chunks; joined for blocking calls.
    Chunks(Vec<String>),
    /// The call itself fails.
    Fail(ProviderError),
    /// Some chunks, then a mid-stream error.
    ChunksThenFail(Vec<String>, ProviderError),
    /// Some chunks, then the stream never yields again.
    ChunksThenHang(Vec<String>),
}

/// A generator that returns scripted responses in order.
///
/// Use this for deterministic tests without API calls. Every request is
/// recorded so prompts can be asserted on.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
    cancel_hook: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: Script) -> Self {
        lock(&self.scripts).push_back(script);
        self
    }

    /// Queue a complete reply.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.with_script(Script::Reply(text.into()))
    }

    /// Queue a chunked reply.
    pub fn with_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_script(Script::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    pub fn with_failure(self, error: ProviderError) -> Self {
        self.with_script(Script::Fail(error))
    }

    /// Cancel `token` as soon as the `n`th chunk of the next stream has been
    /// handed out, simulating a user pressing stop mid-generation.
    pub fn cancel_after(self, n: usize, token: CancellationToken) -> Self {
        *lock(&self.cancel_hook) = Some((n, token));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.scripts).len()
    }

    fn next_script(&self, request: GenerationRequest) -> Result<Script, ProviderError> {
        lock(&self.requests).push(request);
        lock(&self.scripts)
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("no scripted response left".into()))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<Generated, ProviderError> {
        let content = match self.next_script(request)? {
            Script::Reply(text) => text,
            Script::Chunks(chunks) | Script::ChunksThenHang(chunks) => chunks.concat(),
            Script::Fail(e) | Script::ChunksThenFail(_, e) => return Err(e),
        };
        Ok(Generated {
            usage: TokenUsage {
                input_tokens: 0,
                output_tokens: content.chars().count(),
            },
            content,
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkStream, ProviderError> {
        let (chunks, tail, hang) = match self.next_script(request)? {
            Script::Reply(text) => (vec![text], None, false),
            Script::Chunks(chunks) => (chunks, None, false),
            Script::Fail(e) => return Err(e),
            Script::ChunksThenFail(chunks, e) => (chunks, Some(e), false),
            Script::ChunksThenHang(chunks) => (chunks, None, true),
        };
        let hook = lock(&self.cancel_hook).take();

        let items: Vec<Result<String, ProviderError>> =
            chunks.into_iter().map(Ok).chain(tail.map(Err)).collect();

        // The hook fires as the nth item is polled, not when the stream is built.
        let base = stream::iter(items).enumerate().map(move |(i, item)| {
            if let Some((n, token)) = &hook {
                if i + 1 == *n {
                    token.cancel();
                }
            }
            item
        });
        if hang {
            Ok(Box::pin(base.chain(stream::pending())))
        } else {
            Ok(Box::pin(base))
        }
    }
}

/// A document stored in a [`MemoryIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub id: String,
    pub content: String,
    pub description: String,
}

/// An in-memory retrieval index.
///
/// Queries return the fixed answer if one is set, otherwise every stored
/// document that shares a word with the query.
#[derive(Default)]
pub struct MemoryIndex {
    documents: Mutex<Vec<IndexedDocument>>,
    answer: Option<String>,
    fail_next: Mutex<Option<String>>,
    queries: Mutex<Vec<String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::default()
        }
    }

    /// Make the next call fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *lock(&self.fail_next) = Some(reason.into());
    }

    pub fn documents(&self) -> Vec<IndexedDocument> {
        lock(&self.documents).clone()
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    fn injected_failure(&self) -> Result<(), ProviderError> {
        match lock(&self.fail_next).take() {
            Some(reason) => Err(ProviderError::Request(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RetrievalIndex for MemoryIndex {
    async fn upload(&self, content: &str, description: &str) -> Result<String, ProviderError> {
        self.injected_failure()?;
        let mut documents = lock(&self.documents);
        let id = format!("doc-{}", documents.len() + 1);
        documents.push(IndexedDocument {
            id: id.clone(),
            content: content.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn query(&self, text: &str, _mode: &str) -> Result<String, ProviderError> {
        self.injected_failure()?;
        lock(&self.queries).push(text.to_string());
        if let Some(answer) = &self.answer {
            return Ok(answer.clone());
        }
        let words: Vec<&str> = text.split_whitespace().collect();
        let hits: Vec<String> = lock(&self.documents)
            .iter()
            .filter(|d| words.iter().any(|w| d.content.contains(w)))
            .map(|d| d.content.clone())
            .collect();
        Ok(hits.join("\n\n"))
    }

    async fn health(&self) -> Result<IndexHealth, ProviderError> {
        self.injected_failure()?;
        Ok(IndexHealth {
            healthy: true,
            detail: "healthy".to_string(),
        })
    }
}

/// A store seeded with one novel and one volume.
pub struct TestNovel {
    pub store: Arc<Store>,
    pub novel_id: NovelId,
    pub volume_id: VolumeId,
}

impl TestNovel {
    /// An in-memory store with an empty novel.
    pub fn new() -> crate::error::Result<Self> {
        let store = Arc::new(Store::open_in_memory()?);
        let novel = store.create_novel("The Salt Road", "fantasy", "A courier crosses a drowned empire.")?;
        let volume = store.create_volume(novel.id, "Book One", 1)?;
        Ok(Self {
            store,
            novel_id: novel.id,
            volume_id: volume.id,
        })
    }

    /// Write chapter `number` directly, bypassing generation.
    pub fn write_chapter(&self, number: u32, content: &str) -> crate::error::Result<Chapter> {
        self.store.insert_generated_chapter(NewChapter {
            novel_id: self.novel_id,
            volume_id: Some(self.volume_id),
            plan_id: None,
            number,
            title: format!("Chapter {number}"),
            content: content.to_string(),
            outline: String::new(),
        })
    }

    pub fn chapter_count(&self) -> usize {
        self.store
            .list_chapters(self.novel_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new()
            .with_chunks(["a", "b"])
            .with_reply("whole");

        let mut chunks = generator
            .stream(GenerationRequest::new(Vec::new()))
            .await
            .unwrap();
        let mut collected = String::new();
        while let Some(chunk) = chunks.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "ab");

        let reply = generator
            .generate(GenerationRequest::new(Vec::new()))
            .await
            .unwrap();
        assert_eq!(reply.content, "whole");
        assert_eq!(generator.requests().len(), 2);
        assert!(generator
            .generate(GenerationRequest::new(Vec::new()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancel_hook_fires_on_nth_chunk() {
        let token = CancellationToken::new();
        let generator = ScriptedGenerator::new()
            .with_chunks(["one", "two", "three"])
            .cancel_after(2, token.clone());
        let mut chunks = generator
            .stream(GenerationRequest::new(Vec::new()))
            .await
            .unwrap();

        chunks.next().await;
        assert!(!token.is_cancelled());
        chunks.next().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_memory_index_failure_is_one_shot() {
        let index = MemoryIndex::new();
        index.upload("Lin crossed the salt flats", "ch1").await.unwrap();
        index.fail_next("offline");
        assert!(index.query("salt", "hybrid").await.is_err());
        assert_eq!(
            index.query("salt", "hybrid").await.unwrap(),
            "Lin crossed the salt flats"
        );
        assert!(index.query("ocean", "hybrid").await.unwrap().is_empty());
    }
}
