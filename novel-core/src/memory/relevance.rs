//! Deterministic relevance ranking of characters and world settings.
//!
//! Scores are plain integers so ties are common; the ordering is made total
//! with explicit tie-breaks, never by input order.

use serde::Serialize;
use std::cmp::Ordering;

use crate::model::{Character, WorldSetting};
use crate::text::mentions;

/// Bonus for an entity named verbatim in the outline.
pub const MENTION_BONUS: i64 = 100;

/// Bonus for a setting related to one of the recent chapters.
pub const RECENT_SETTING_BONUS: i64 = 20;

/// Recency ceiling for characters: a character seen in the previous
/// chapter scores 9, ten or more chapters back scores 0.
pub const RECENCY_CEILING: i64 = 10;

/// An entry selected by the ranker, with the score it earned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked<T> {
    pub item: T,
    pub score: i64,
}

/// `max(0, 10 - (target - last))`, or 0 when `last` is unknown.
pub fn recency_bonus(target: u32, last_appearance: Option<u32>) -> i64 {
    match last_appearance {
        Some(last) => (RECENCY_CEILING - (i64::from(target) - i64::from(last))).max(0),
        None => 0,
    }
}

/// `Some` sorts before `None`; among `Some`, `ord` decides.
fn known_first(a: Option<u32>, b: Option<u32>, ord: impl Fn(u32, u32) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => ord(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ranks story memory against the outline of a target chapter.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceRanker {
    top_k: usize,
    setting_window: u32,
}

impl Default for RelevanceRanker {
    fn default() -> Self {
        Self::new(12, 3)
    }
}

impl RelevanceRanker {
    pub fn new(top_k: usize, setting_window: u32) -> Self {
        Self {
            top_k,
            setting_window,
        }
    }

    pub fn character_score(&self, outline: &str, target: u32, character: &Character) -> i64 {
        let mention = if mentions(outline, &character.name) {
            MENTION_BONUS
        } else {
            0
        };
        mention + recency_bonus(target, character.last_appearance)
    }

    pub fn setting_score(&self, outline: &str, target: u32, setting: &WorldSetting) -> i64 {
        let mention = if mentions(outline, &setting.title) {
            MENTION_BONUS
        } else {
            0
        };
        let recent = if self.is_recent(target, &setting.related_chapters) {
            RECENT_SETTING_BONUS
        } else {
            0
        };
        mention + recent
    }

    /// Whether any chapter falls in `[target - window, target - 1]`.
    fn is_recent(&self, target: u32, chapters: &[u32]) -> bool {
        // Chapter numbers start at 1.
        let low = target.saturating_sub(self.setting_window).max(1);
        chapters.iter().any(|&c| c >= low && c < target)
    }

    /// Top-K characters: score desc, last appearance desc, first appearance
    /// asc (unknowns last), then name and id.
    pub fn rank_characters(
        &self,
        outline: &str,
        target: u32,
        pool: &[Character],
    ) -> Vec<Ranked<Character>> {
        let mut ranked: Vec<Ranked<Character>> = pool
            .iter()
            .map(|c| Ranked {
                score: self.character_score(outline, target, c),
                item: c.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| {
                    known_first(a.item.last_appearance, b.item.last_appearance, |x, y| {
                        y.cmp(&x)
                    })
                })
                .then_with(|| {
                    known_first(a.item.first_appearance, b.item.first_appearance, |x, y| {
                        x.cmp(&y)
                    })
                })
                .then_with(|| a.item.name.cmp(&b.item.name))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        ranked.truncate(self.top_k);

        tracing::debug!(
            target_chapter = target,
            pool = pool.len(),
            selected = ranked.len(),
            "ranked characters"
        );
        ranked
    }

    /// Top-K settings: score desc, newest first, then title.
    pub fn rank_settings(
        &self,
        outline: &str,
        target: u32,
        pool: &[WorldSetting],
    ) -> Vec<Ranked<WorldSetting>> {
        let mut ranked: Vec<Ranked<WorldSetting>> = pool
            .iter()
            .map(|s| Ranked {
                score: self.setting_score(outline, target, s),
                item: s.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.item.created_at.cmp(&a.item.created_at))
                .then_with(|| a.item.title.cmp(&b.item.title))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        ranked.truncate(self.top_k);

        tracing::debug!(
            target_chapter = target,
            pool = pool.len(),
            selected = ranked.len(),
            "ranked settings"
        );
        ranked
    }
}
