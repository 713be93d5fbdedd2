// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AI user generation.

use std::collections::HashSet;

use generia_core::{NewAiUser, TaskType};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use super::{
    EntityGenerator, GeneratedEntity, GenerationContext, GenerationError, GenerationStrategy,
    PREALLOCATE_LIMIT, random_id, random_window,
};

const PREFIXES: [&str; 40] = [
    "cyber", "neon", "flux", "pixel", "synth", "vapor", "retro", "future", "space", "star",
    "astro", "cosmo", "lunar", "solar", "galaxy", "nebula", "orbit", "quantum", "atom", "data",
    "glitch", "bit", "byte", "tech", "digital", "virtual", "electric", "spark", "surge", "wave",
    "echo", "pulse", "signal", "code", "algo", "crypto", "nexus", "matrix", "vector", "grid",
];

const SUFFIXES: [&str; 40] = [
    "runner", "racer", "rider", "walker", "drifter", "hunter", "seeker", "finder", "watcher",
    "gazer", "dreamer", "thinker", "maker", "builder", "crafter", "weaver", "smith", "wright",
    "mind", "soul", "heart", "spirit", "ghost", "phantom", "shadow", "light", "flame", "spark",
    "glow", "shine", "wave", "storm", "cloud", "rain", "wind", "breeze", "quake", "shock",
    "blast", "burst",
];

/// Random draws before falling back to a counter suffix.
const MAX_NAME_ATTEMPTS: usize = 32;

/// Words of the prompt quoted in a user description.
const DESCRIPTION_WORDS: usize = 10;

/// Generates AI users with `prefix_suffix` usernames.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStrategy;

impl GenerationStrategy for UserStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Users
    }

    fn start(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<Box<dyn EntityGenerator>, GenerationError> {
        Ok(Box::new(UserGenerator {
            world_id: ctx.world_id.to_string(),
            prompt: ctx.prompt.to_string(),
            remaining: ctx.count,
            taken: HashSet::with_capacity(ctx.count.min(PREALLOCATE_LIMIT)),
        }))
    }

    fn completion_message(&self, generated: usize) -> String {
        format!("Generated {} AI users", generated)
    }
}

struct UserGenerator {
    world_id: String,
    prompt: String,
    remaining: usize,
    taken: HashSet<String>,
}

impl UserGenerator {
    fn draw_username(rng: &mut dyn RngCore) -> String {
        let prefix = PREFIXES.choose(rng).copied().unwrap_or("cyber");
        let suffix = SUFFIXES.choose(rng).copied().unwrap_or("runner");
        // 3 in 10 names carry a number.
        if rng.gen_range(0..10) > 6 {
            format!("{}_{}{}", prefix, suffix, rng.gen_range(0..1000))
        } else {
            format!("{}_{}", prefix, suffix)
        }
    }

    fn unique_username(&mut self, rng: &mut dyn RngCore) -> String {
        let mut candidate = Self::draw_username(rng);
        for _ in 1..MAX_NAME_ATTEMPTS {
            if !self.taken.contains(&candidate) {
                break;
            }
            candidate = Self::draw_username(rng);
        }

        let mut username = candidate.clone();
        let mut n = self.taken.len();
        while self.taken.contains(&username) {
            username = format!("{}_{}", candidate, n);
            n += 1;
        }
        self.taken.insert(username.clone());
        username
    }

    fn description(&self, rng: &mut dyn RngCore) -> String {
        let words: Vec<&str> = self.prompt.split_whitespace().collect();
        match random_window(&words, DESCRIPTION_WORDS, rng) {
            Some(excerpt) => format!("A user from the world of {}", excerpt),
            None => format!("A user from {}", self.prompt),
        }
    }
}

impl EntityGenerator for UserGenerator {
    fn next_entity(&mut self, rng: &mut dyn RngCore) -> Option<GeneratedEntity> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let id = random_id(rng);
        let username = self.unique_username(rng);
        let description = self.description(rng);

        Some(GeneratedEntity::User(NewAiUser {
            id,
            world_id: self.world_id.clone(),
            username,
            description,
        }))
    }

    fn remaining(&self) -> usize {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn users(prompt: &str, count: usize, seed: u64) -> Vec<NewAiUser> {
        let ctx = GenerationContext {
            world_id: "world-1",
            prompt,
            count,
            authors: &[],
        };
        UserStrategy
            .generate(&ctx, &mut StdRng::seed_from_u64(seed))
            .unwrap()
            .into_iter()
            .map(|e| match e {
                GeneratedEntity::User(u) => u,
                other => panic!("expected user, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_generates_exactly_n_unique_usernames() {
        for n in [0, 1, 5, 40, 200] {
            let batch = users("a neon city", n, n as u64);
            assert_eq!(batch.len(), n);

            let names: HashSet<_> = batch.iter().map(|u| u.username.as_str()).collect();
            assert_eq!(names.len(), n, "duplicate usernames in batch of {n}");

            let ids: HashSet<_> = batch.iter().map(|u| u.id.as_str()).collect();
            assert_eq!(ids.len(), n);
        }
    }

    #[test]
    fn test_username_shape() {
        for user in users("p", 100, 42) {
            let (prefix, rest) = user.username.split_once('_').unwrap();
            assert!(PREFIXES.contains(&prefix), "bad prefix in {}", user.username);
            let suffix = rest.trim_end_matches(|c: char| c.is_ascii_digit() || c == '_');
            assert!(SUFFIXES.contains(&suffix), "bad suffix in {}", user.username);
            assert_eq!(user.world_id, "world-1");
        }
    }

    #[test]
    fn test_some_usernames_carry_numbers() {
        let numbered = users("p", 200, 7)
            .iter()
            .filter(|u| u.username.ends_with(|c: char| c.is_ascii_digit()))
            .count();
        assert!(numbered > 0 && numbered < 200);
    }

    #[test]
    fn test_short_prompt_description() {
        let batch = users("a quiet desert town", 3, 1);
        for user in batch {
            assert_eq!(user.description, "A user from a quiet desert town");
        }
    }

    #[test]
    fn test_long_prompt_description_uses_ten_word_excerpt() {
        let prompt = "one two three four five six seven eight nine ten eleven twelve thirteen";
        for user in users(prompt, 10, 5) {
            let excerpt = user
                .description
                .strip_prefix("A user from the world of ")
                .unwrap();
            assert_eq!(excerpt.split(' ').count(), 10);
            assert!(prompt.contains(excerpt));
        }
    }

    #[test]
    fn test_same_seed_same_users() {
        assert_eq!(users("p q r", 10, 99), users("p q r", 10, 99));
        assert_ne!(users("p q r", 10, 99), users("p q r", 10, 100));
    }
}
