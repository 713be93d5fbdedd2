// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! AI post generation.
//!
//! Authors are assigned round-robin over the world's AI users in creation
//! order, so `count` posts spread as evenly as possible.

use generia_core::{NewAiPost, TaskType};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use super::{
    EntityGenerator, GeneratedEntity, GenerationContext, GenerationError, GenerationStrategy,
    random_id, random_window,
};

const CAPTION_TEMPLATES: [&str; 10] = [
    "Just another day in {}",
    "Can't believe I'm seeing {} right now",
    "This is what {} looks like up close",
    "Amazing view of {} today",
    "Exploring {} with friends",
    "Found this hidden spot in {}",
    "The beauty of {} never ceases to amaze me",
    "First time visiting {}",
    "What do you think about {}?",
    "My favorite part of {}",
];

const IMAGE_TEMPLATES: [&str; 5] = [
    "A photo of {}, detailed, realistic",
    "High quality image of {}, 4K, detailed",
    "Cinematic view of {}, dramatic lighting",
    "Wide angle shot of {}, photorealistic",
    "Detailed scene from {}, professional photography",
];

const SUBJECT_WORDS: usize = 3;
const MAX_HASHTAGS: usize = 4;

/// Generates AI posts authored by existing AI users.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostStrategy;

impl GenerationStrategy for PostStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Posts
    }

    fn requires_authors(&self) -> bool {
        true
    }

    fn start(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> Result<Box<dyn EntityGenerator>, GenerationError> {
        if ctx.authors.is_empty() {
            return Err(GenerationError::NoAuthors {
                world_id: ctx.world_id.to_string(),
            });
        }

        Ok(Box::new(PostGenerator {
            world_id: ctx.world_id.to_string(),
            prompt: ctx.prompt.to_string(),
            hashtag_words: hashtag_words(ctx.prompt),
            authors: ctx.authors.to_vec(),
            next_author: 0,
            remaining: ctx.count,
        }))
    }

    fn completion_message(&self, generated: usize) -> String {
        format!("Generated {} AI posts", generated)
    }
}

struct PostGenerator {
    world_id: String,
    prompt: String,
    hashtag_words: Vec<String>,
    authors: Vec<String>,
    next_author: usize,
    remaining: usize,
}

impl PostGenerator {
    fn caption(&self, rng: &mut dyn RngCore) -> String {
        let words: Vec<&str> = self.prompt.split_whitespace().collect();
        let subject =
            random_window(&words, SUBJECT_WORDS, rng).unwrap_or_else(|| self.prompt.clone());
        let template = CAPTION_TEMPLATES.choose(rng).copied().unwrap_or("{}");
        let mut caption = template.replacen("{}", &subject, 1);

        // 4 in 10 captions get hashtags.
        if rng.gen_range(0..10) > 5 && !self.hashtag_words.is_empty() {
            let wanted = rng.gen_range(1..=MAX_HASHTAGS);
            let tags: Vec<String> = self
                .hashtag_words
                .choose_multiple(rng, wanted)
                .map(|w| format!("#{}", w))
                .collect();
            caption.push_str("\n\n");
            caption.push_str(&tags.join(" "));
        }
        caption
    }

    fn image_prompt(&self, rng: &mut dyn RngCore) -> String {
        let template = IMAGE_TEMPLATES.choose(rng).copied().unwrap_or("{}");
        template.replacen("{}", &self.prompt, 1)
    }
}

impl EntityGenerator for PostGenerator {
    fn next_entity(&mut self, rng: &mut dyn RngCore) -> Option<GeneratedEntity> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let user_id = self.authors[self.next_author % self.authors.len()].clone();
        self.next_author += 1;

        let id = random_id(rng);
        let media_id = format!("placeholder-{}", &id[..8]);
        let caption = self.caption(rng);
        let image_prompt = self.image_prompt(rng);

        Some(GeneratedEntity::Post(NewAiPost {
            id,
            world_id: self.world_id.clone(),
            user_id,
            caption,
            media_id,
            image_prompt,
        }))
    }

    fn remaining(&self) -> usize {
        self.remaining
    }
}

/// Distinct lowercased prompt words longer than three characters, with
/// punctuation stripped, in first-seen order.
fn hashtag_words(prompt: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for raw in prompt.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if word.chars().count() > 3 && !words.contains(&word) {
            words.push(word);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn posts(prompt: &str, count: usize, authors: &[String], seed: u64) -> Vec<NewAiPost> {
        let ctx = GenerationContext {
            world_id: "world-1",
            prompt,
            count,
            authors,
        };
        PostStrategy
            .generate(&ctx, &mut StdRng::seed_from_u64(seed))
            .unwrap()
            .into_iter()
            .map(|e| match e {
                GeneratedEntity::Post(p) => p,
                other => panic!("expected post, got {other:?}"),
            })
            .collect()
    }

    fn authors(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user-{i}")).collect()
    }

    #[test]
    fn test_fails_fast_without_authors() {
        let ctx = GenerationContext {
            world_id: "world-9",
            prompt: "p",
            count: 5,
            authors: &[],
        };
        let err = PostStrategy.start(&ctx).err().unwrap();
        assert_eq!(
            err,
            GenerationError::NoAuthors {
                world_id: "world-9".to_string()
            }
        );
        assert_eq!(err.to_string(), "No AI users found for world world-9");
    }

    #[test]
    fn test_round_robin_authors() {
        let authors = authors(3);
        let batch = posts("a b", 7, &authors, 1);
        let assigned: Vec<&str> = batch.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(
            assigned,
            vec!["user-0", "user-1", "user-2", "user-0", "user-1", "user-2", "user-0"]
        );
    }

    #[test]
    fn test_media_placeholder_uses_post_id_prefix() {
        for post in posts("p", 5, &authors(1), 2) {
            assert_eq!(post.media_id, format!("placeholder-{}", &post.id[..8]));
        }
    }

    #[test]
    fn test_caption_subject_and_hashtags() {
        let prompt = "Glowing mushrooms, ancient ruins and a silver river";
        let batch = posts(prompt, 100, &authors(2), 3);
        let allowed_tags = hashtag_words(prompt);

        let mut with_tags = 0;
        for post in &batch {
            let (body, tags) = match post.caption.split_once("\n\n") {
                Some((body, tags)) => (body, Some(tags)),
                None => (post.caption.as_str(), None),
            };
            assert!(
                CAPTION_TEMPLATES.iter().any(|t| {
                    let (head, tail) = t.split_once("{}").unwrap();
                    body.starts_with(head) && body.ends_with(tail)
                }),
                "caption does not match a template: {body}"
            );
            if let Some(tags) = tags {
                with_tags += 1;
                let tags: Vec<&str> = tags.split(' ').collect();
                assert!((1..=MAX_HASHTAGS).contains(&tags.len()));
                for tag in tags {
                    let word = tag.strip_prefix('#').unwrap();
                    assert!(allowed_tags.iter().any(|w| w == word), "unexpected tag {tag}");
                }
            }
        }
        assert!(with_tags > 0 && with_tags < batch.len());
    }

    #[test]
    fn test_short_prompt_is_whole_subject() {
        for post in posts("tiny moon", 10, &authors(1), 4) {
            let body = post.caption.split("\n\n").next().unwrap();
            assert!(body.contains("tiny moon"));
        }
    }

    #[test]
    fn test_image_prompt_from_template() {
        for post in posts("deep sea city", 10, &authors(1), 5) {
            assert!(
                IMAGE_TEMPLATES
                    .iter()
                    .any(|t| post.image_prompt == t.replacen("{}", "deep sea city", 1))
            );
        }
    }

    #[test]
    fn test_hashtag_words() {
        assert_eq!(
            hashtag_words("The Neon-lit city, of DREAMS and neon"),
            vec!["neonlit", "city", "dreams", "neon"]
        );
        assert!(hashtag_words("a an the").is_empty());
    }
}
