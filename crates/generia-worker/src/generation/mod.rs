// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generation strategies.
//!
//! A strategy turns `(world, prompt, count, existing authors, randomness)`
//! into entities. Strategies hold no state between tasks and never touch the
//! store; the worker persists what they yield. Randomness is always passed
//! in, so the same seed and inputs give the same output.

pub mod posts;
pub mod users;

use std::collections::HashMap;
use std::sync::Arc;

use generia_core::{NewAiPost, NewAiUser, TaskType};
use rand::{Rng, RngCore};
use thiserror::Error;

pub use self::posts::PostStrategy;
pub use self::users::UserStrategy;

/// Errors raised before a strategy produces anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Posts need at least one AI user to author them.
    #[error("No AI users found for world {world_id}")]
    NoAuthors {
        /// World that has no AI users yet.
        world_id: String,
    },
}

/// Inputs to a strategy for one task.
#[derive(Debug, Clone)]
pub struct GenerationContext<'a> {
    pub world_id: &'a str,
    pub prompt: &'a str,
    pub count: usize,
    /// AI user ids of the world in creation order. Empty unless the
    /// strategy [requires authors](GenerationStrategy::requires_authors).
    pub authors: &'a [String],
}

/// One generated entity, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedEntity {
    User(NewAiUser),
    Post(NewAiPost),
}

impl GeneratedEntity {
    pub fn id(&self) -> &str {
        match self {
            Self::User(user) => &user.id,
            Self::Post(post) => &post.id,
        }
    }

    /// Noun used in log lines and result messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Post(_) => "post",
        }
    }
}

/// Yields a task's entities one at a time.
///
/// The worker persists each entity and checks for cancellation before
/// asking for the next one.
pub trait EntityGenerator: Send {
    /// Next entity, or `None` once `count` entities have been produced.
    fn next_entity(&mut self, rng: &mut dyn RngCore) -> Option<GeneratedEntity>;

    /// Entities still to be produced.
    fn remaining(&self) -> usize;
}

/// A per-task-type content generator.
pub trait GenerationStrategy: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Whether [`GenerationContext::authors`] must be loaded for this strategy.
    fn requires_authors(&self) -> bool {
        false
    }

    /// Check prerequisites and return a generator for `ctx.count` entities.
    fn start(&self, ctx: &GenerationContext<'_>)
    -> Result<Box<dyn EntityGenerator>, GenerationError>;

    /// Success message stored in the task result.
    fn completion_message(&self, generated: usize) -> String;

    /// Produce every entity at once.
    fn generate(
        &self,
        ctx: &GenerationContext<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<GeneratedEntity>, GenerationError> {
        let mut generator = self.start(ctx)?;
        let mut entities = Vec::with_capacity(generator.remaining().min(PREALLOCATE_LIMIT));
        while let Some(entity) = generator.next_entity(rng) {
            entities.push(entity);
        }
        Ok(entities)
    }
}

/// Strategies keyed by task type.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<TaskType, Arc<dyn GenerationStrategy>>,
}

impl StrategyRegistry {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the user and post strategies.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_strategy(Arc::new(UserStrategy))
            .with_strategy(Arc::new(PostStrategy))
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn GenerationStrategy>) -> Self {
        self.strategies.insert(strategy.task_type(), strategy);
        self
    }

    /// Look up the strategy for a stored task type string.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn GenerationStrategy>> {
        let task_type: TaskType = task_type.parse().ok()?;
        self.strategies.get(&task_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Upper bound on up-front allocation sized by a task's count.
pub(crate) const PREALLOCATE_LIMIT: usize = 1024;

/// Entity id drawn from the injected rng so seeded runs are reproducible.
pub(crate) fn random_id(rng: &mut dyn RngCore) -> String {
    let bytes: [u8; 16] = rng.r#gen();
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

/// A random run of `len` consecutive words, or `None` when there are not
/// more than `len` words.
pub(crate) fn random_window(words: &[&str], len: usize, rng: &mut dyn RngCore) -> Option<String> {
    if words.len() <= len {
        return None;
    }
    let start = rng.gen_range(0..words.len() - len);
    Some(words[start..start + len].join(" "))
}
