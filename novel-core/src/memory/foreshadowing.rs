//! Lifecycle scheduling of foreshadowing threads for a target chapter.

use serde::Serialize;

use crate::model::Foreshadowing;
use crate::text::mentions;

/// Bonus for a background thread whose title or content appears in the outline.
pub const OUTLINE_MENTION_BONUS: i64 = 100;

/// Where each unrevealed thread stands relative to the target chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForeshadowingPlan {
    /// Reveal is near: hint, do not reveal.
    pub buildup: Vec<Foreshadowing>,
    /// Reveal is due or overdue: resolve or advance.
    pub due_for_reveal: Vec<Foreshadowing>,
    /// Everything else, capped: avoid contradicting it.
    pub background: Vec<Foreshadowing>,
}

impl ForeshadowingPlan {
    pub fn is_empty(&self) -> bool {
        self.buildup.is_empty() && self.due_for_reveal.is_empty() && self.background.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Buildup,
    Due,
    Background,
}

/// Classifies threads into buildup, due and background buckets.
#[derive(Debug, Clone, Copy)]
pub struct ForeshadowingScheduler {
    buildup_window: u32,
    max_background: usize,
}

impl Default for ForeshadowingScheduler {
    fn default() -> Self {
        Self::new(5, 6)
    }
}

impl ForeshadowingScheduler {
    pub fn new(buildup_window: u32, max_background: usize) -> Self {
        Self {
            buildup_window,
            max_background,
        }
    }

    fn bucket(&self, item: &Foreshadowing, target: u32) -> Bucket {
        let Some(reveal) = item.planned_reveal_chapter else {
            return Bucket::Background;
        };
        let target = i64::from(target);
        let reveal = i64::from(reveal);
        if reveal <= target {
            Bucket::Due
        } else if reveal - i64::from(self.buildup_window) <= target {
            Bucket::Buildup
        } else {
            Bucket::Background
        }
    }

    /// Background rank: outline mention bonus plus the planted chapter, so
    /// mentioned and more recently planted threads come first.
    pub fn background_score(&self, item: &Foreshadowing, outline: &str) -> i64 {
        let bonus = if mentions(outline, &item.title) || mentions(outline, &item.content) {
            OUTLINE_MENTION_BONUS
        } else {
            0
        };
        bonus + i64::from(item.planted_chapter)
    }

    /// Split `items` for chapter `target`. Revealed items are ignored.
    pub fn schedule(&self, items: &[Foreshadowing], target: u32, outline: &str) -> ForeshadowingPlan {
        let mut plan = ForeshadowingPlan::default();
        let mut background = Vec::new();

        for item in items.iter().filter(|i| !i.revealed) {
            match self.bucket(item, target) {
                Bucket::Buildup => plan.buildup.push(item.clone()),
                Bucket::Due => plan.due_for_reveal.push(item.clone()),
                Bucket::Background => {
                    background.push((self.background_score(item, outline), item.clone()))
                }
            }
        }

        let by_reveal = |a: &Foreshadowing, b: &Foreshadowing| {
            a.planned_reveal_chapter
                .cmp(&b.planned_reveal_chapter)
                .then_with(|| a.title.cmp(&b.title))
        };
        plan.buildup.sort_by(by_reveal);
        plan.due_for_reveal.sort_by(by_reveal);

        background.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.title.cmp(&b.title)));
        plan.background = background
            .into_iter()
            .take(self.max_background)
            .map(|(_, item)| item)
            .collect();

        tracing::debug!(
            target_chapter = target,
            buildup = plan.buildup.len(),
            due = plan.due_for_reveal.len(),
            background = plan.background.len(),
            "foreshadowing scheduled"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ForeshadowingId, NovelId};
    use chrono::Utc;

    fn item(title: &str, planted: u32, reveal: Option<u32>) -> Foreshadowing {
        Foreshadowing {
            id: ForeshadowingId::new(),
            novel_id: NovelId::new(),
            title: title.into(),
            content: String::new(),
            planted_chapter: planted,
            planned_reveal_chapter: reveal,
            revealed: false,
            revealed_chapter: None,
            created_at: Utc::now(),
        }
    }

    fn titles(items: &[Foreshadowing]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn test_bucket_boundaries() {
        let scheduler = ForeshadowingScheduler::default();
        let items = vec![
            item("edge-of-window", 1, Some(15)), // 15 - 5 = 10 <= 10 < 15
            item("just-outside", 1, Some(16)),   // 16 - 5 = 11 > 10
            item("due-now", 1, Some(10)),
            item("overdue", 1, Some(3)),
            item("unplanned", 1, None),
        ];
        let plan = scheduler.schedule(&items, 10, "");
        assert_eq!(titles(&plan.buildup), vec!["edge-of-window"]);
        assert_eq!(titles(&plan.due_for_reveal), vec!["overdue", "due-now"]);
        assert_eq!(titles(&plan.background), vec!["just-outside", "unplanned"]);
    }

    #[test]
    fn test_buckets_are_disjoint_for_every_target() {
        let scheduler = ForeshadowingScheduler::new(5, 100);
        let items: Vec<Foreshadowing> = (1..=30)
            .map(|r| item(&format!("r{r}"), 1, Some(r)))
            .chain(std::iter::once(item("none", 1, None)))
            .collect();
        for target in 1..=35 {
            let plan = scheduler.schedule(&items, target, "");
            let total = plan.buildup.len() + plan.due_for_reveal.len() + plan.background.len();
            assert_eq!(total, items.len(), "target {target}");
            for i in &plan.buildup {
                let r = i.planned_reveal_chapter.unwrap();
                assert!(r > target && r <= target + 5);
            }
            for i in &plan.due_for_reveal {
                assert!(i.planned_reveal_chapter.unwrap() <= target);
            }
        }
    }

    #[test]
    fn test_small_reveal_does_not_underflow() {
        let scheduler = ForeshadowingScheduler::new(5, 6);
        let plan = scheduler.schedule(&[item("early", 1, Some(2))], 1, "");
        assert_eq!(titles(&plan.buildup), vec!["early"]);
    }

    #[test]
    fn test_revealed_items_ignored() {
        let scheduler = ForeshadowingScheduler::default();
        let mut done = item("done", 1, Some(5));
        done.revealed = true;
        done.revealed_chapter = Some(5);
        assert!(scheduler.schedule(&[done], 5, "").is_empty());
    }

    #[test]
    fn test_background_ranking_and_cap() {
        let scheduler = ForeshadowingScheduler::new(5, 2);
        let mut sealed = item("The sealed door", 2, None);
        sealed.content = "a door nobody opens".into();
        let items = vec![
            item("Recent thread", 40, None),
            item("Old thread", 3, None),
            sealed,
        ];
        let plan = scheduler.schedule(&items, 41, "Lin finds a door nobody opens");
        assert_eq!(titles(&plan.background), vec!["The sealed door", "Recent thread"]);
    }
}
