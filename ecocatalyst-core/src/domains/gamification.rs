use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;

use super::{attach, report, Domain};
use crate::cache::{unbounded_query, CollectionSpec, EntityCache, Patch, RemotePath, Shape};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::Owner;
use crate::local::Namespace;
use crate::models::{
    Achievement, AchievementCategory, LeaderboardEntry, RequirementType, UserAchievement,
    UserAchievementPatch, UserStats, UserStatsPatch,
};
use crate::reconcile::{
    entity_from_record, evaluate_achievement, level_for_points, next_streak, parse_leaderboard,
    SnapshotHook, SubscriptionSet,
};
use crate::remote::{last_segment, Query, Snapshot};
use crate::status::DomainStatus;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

fn cheapest_first(a: &Achievement, b: &Achievement) -> Ordering {
    a.points.cmp(&b.points).then_with(|| a.id.cmp(&b.id))
}

fn by_achievement(a: &UserAchievement, b: &UserAchievement) -> Ordering {
    a.achievement_id.cmp(&b.achievement_id)
}

fn single(_: &UserStats, _: &UserStats) -> Ordering {
    Ordering::Equal
}

pub const ACHIEVEMENTS: CollectionSpec<Achievement> = CollectionSpec {
    namespace: Namespace::Achievements,
    remote: RemotePath::Shared("achievements"),
    shape: Shape::Collection,
    order: cheapest_first,
    query: unbounded_query,
    local_capacity: None,
};

pub const USER_ACHIEVEMENTS: CollectionSpec<UserAchievement> = CollectionSpec {
    namespace: Namespace::UserAchievements,
    remote: RemotePath::PerOwner("userAchievements"),
    shape: Shape::Collection,
    order: by_achievement,
    query: unbounded_query,
    local_capacity: None,
};

pub const STATS: CollectionSpec<UserStats> = CollectionSpec {
    namespace: Namespace::UserStats,
    remote: RemotePath::PerOwner("userStats"),
    shape: Shape::Record,
    order: single,
    query: unbounded_query,
    local_capacity: Some(1),
};

/// Achievements, per-user progress, stats and the leaderboard.
pub struct GamificationService {
    ctx: SyncContext,
    status: Arc<DomainStatus>,
    achievements: Arc<EntityCache<Achievement>>,
    user_achievements: Arc<EntityCache<UserAchievement>>,
    stats: Arc<EntityCache<UserStats>>,
    leaderboard: Mutex<Vec<LeaderboardEntry>>,
    catalogue: SubscriptionSet,
    subscriptions: SubscriptionSet,
}

impl GamificationService {
    pub fn new(ctx: SyncContext) -> Self {
        let status = Arc::new(DomainStatus::new("gamification"));
        Self {
            achievements: EntityCache::new(ACHIEVEMENTS, ctx.clone(), status.clone()),
            user_achievements: EntityCache::new(USER_ACHIEVEMENTS, ctx.clone(), status.clone()),
            stats: EntityCache::new(STATS, ctx.clone(), status.clone()),
            ctx,
            status,
            leaderboard: Mutex::new(Vec::new()),
            catalogue: SubscriptionSet::new(),
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub fn achievements_cache(&self) -> &Arc<EntityCache<Achievement>> {
        &self.achievements
    }

    pub fn user_achievements_cache(&self) -> &Arc<EntityCache<UserAchievement>> {
        &self.user_achievements
    }

    pub fn stats_cache(&self) -> &Arc<EntityCache<UserStats>> {
        &self.stats
    }

    pub fn achievements(&self) -> Arc<Vec<Achievement>> {
        self.achievements.items()
    }

    pub fn user_achievements(&self) -> Arc<Vec<UserAchievement>> {
        self.user_achievements.items()
    }

    /// Stats of the current owner. Without a user, defaults stand in until
    /// the first activity is recorded.
    pub fn user_stats(&self) -> Option<UserStats> {
        let owner = self.ctx.identity.current();
        match self.stats.first() {
            Some(stats) => Some(stats),
            None if owner.is_anonymous() => Some(UserStats::initial(owner.id(), self.ctx.now())),
            None => None,
        }
    }

    pub fn achievement_by_id(&self, id: &str) -> Option<Achievement> {
        self.achievements.find_by_id(id)
    }

    pub fn achievements_by_category(&self, category: AchievementCategory) -> Vec<Achievement> {
        self.achievements.filter(|a| a.category == category)
    }

    pub fn completed_achievements(&self) -> Vec<(Achievement, UserAchievement)> {
        self.joined(|progress| progress.is_complete())
    }

    pub fn in_progress_achievements(&self) -> Vec<(Achievement, UserAchievement)> {
        self.joined(|progress| progress.progress > 0 && !progress.is_complete())
    }

    fn joined(&self, keep: impl Fn(&UserAchievement) -> bool) -> Vec<(Achievement, UserAchievement)> {
        self.user_achievements
            .filter(keep)
            .into_iter()
            .filter_map(|progress| {
                self.achievements
                    .find_by_id(&progress.achievement_id)
                    .map(|achievement| (achievement, progress))
            })
            .collect()
    }

    /// Re-evaluates every achievement against the current stats and returns
    /// the ones completed by this evaluation.
    pub async fn check_achievements(&self) -> Vec<UserAchievement> {
        let owner = self.ctx.identity.current();
        let result = match self.current_stats(&owner).await {
            Ok(stats) => self.award(&owner, stats).await,
            Err(e) => Err(e),
        };
        report(
            &self.status,
            "Failed to check achievements. Please try again.",
            result,
        )
        .unwrap_or_default()
    }

    /// Every completion is followed at once by the stats write carrying
    /// its points.
    async fn award(&self, owner: &Owner, mut stats: UserStats) -> SyncResult<Vec<UserAchievement>> {
        let now = self.ctx.now();
        let mut completed = Vec::new();

        for achievement in self.achievements.items().iter() {
            let existing = self
                .user_achievements
                .find(|progress| progress.achievement_id == achievement.id);
            if existing.as_ref().is_some_and(UserAchievement::is_complete) {
                continue;
            }

            let evaluation = evaluate_achievement(achievement, &stats);
            let completed_at = if evaluation.all_met { now } else { 0 };
            let record = match existing {
                Some(current) if evaluation.progress > current.progress => {
                    self.user_achievements
                        .update(
                            &current.id,
                            UserAchievementPatch {
                                progress: Some(evaluation.progress),
                                completed_at: Some(completed_at),
                            },
                        )
                        .await?
                }
                None if evaluation.progress > 0 => {
                    self.store_progress(
                        owner,
                        UserAchievement {
                            id: String::new(),
                            user_id: owner.id().to_string(),
                            achievement_id: achievement.id.clone(),
                            completed_at,
                            progress: evaluation.progress,
                        },
                    )
                    .await?
                }
                _ => continue,
            };

            if evaluation.all_met {
                tracing::info!(achievement = %achievement.id, points = achievement.points, "Achievement completed");
                stats.total_points += achievement.points;
                stats.level = level_for_points(stats.total_points);
                stats.updated_at = now;
                self.persist_stats(owner, stats.clone()).await?;
                completed.push(record);
            }
        }

        Ok(completed)
    }

    async fn store_progress(&self, owner: &Owner, mut record: UserAchievement) -> SyncResult<UserAchievement> {
        if owner.is_anonymous() {
            record.id = format!("{}_{}", owner.id(), record.achievement_id);
            self.user_achievements.upsert_local(record.clone()).await;
            Ok(record)
        } else {
            self.user_achievements.push_record(record).await
        }
    }

    /// Merges `patch` into the stats, recomputes the level and, when
    /// `lastActive` moved, the streak. Achievements are re-checked afterwards.
    pub async fn update_user_stats(&self, patch: UserStatsPatch) -> bool {
        let owner = self.ctx.identity.current();
        let result = self.modify_stats(&owner, |_| patch).await;
        let updated = report(
            &self.status,
            "Failed to update user stats. Please try again.",
            result,
        )
        .is_some();
        if updated {
            self.check_achievements().await;
        }
        updated
    }

    /// Stamps activity now and adds `value` to the counter measured by `kind`.
    pub async fn record_activity(&self, kind: RequirementType, value: f64) -> bool {
        let owner = self.ctx.identity.current();
        let now = self.ctx.now();
        let result = self
            .modify_stats(&owner, |stats| {
                let mut patch = UserStatsPatch {
                    last_active: Some(now),
                    ..Default::default()
                };
                match kind {
                    RequirementType::ScanProducts => {
                        patch.products_scanned = Some(stats.products_scanned + value)
                    }
                    RequirementType::UseAlternatives => {
                        patch.eco_alternatives_used = Some(stats.eco_alternatives_used + value)
                    }
                    RequirementType::ReduceCarbon => {
                        patch.carbon_saved = Some(stats.carbon_saved + value)
                    }
                    RequirementType::ConsecutiveDays => {
                        patch.consecutive_days = Some(stats.consecutive_days + value as i64)
                    }
                    RequirementType::CompleteDietDays | RequirementType::ShareResults => {}
                }
                patch
            })
            .await;
        let recorded = report(
            &self.status,
            "Failed to record activity. Please try again.",
            result,
        )
        .is_some();
        if recorded {
            self.check_achievements().await;
        }
        recorded
    }

    async fn modify_stats(
        &self,
        owner: &Owner,
        build: impl FnOnce(&UserStats) -> UserStatsPatch + Send,
    ) -> SyncResult<UserStats> {
        let now = self.ctx.now();
        let mut stats = self.current_stats(owner).await?;
        let previous = stats.last_active;
        let patch = build(&stats);
        let touched = patch.last_active.is_some();

        patch.apply_to(&mut stats, now);
        stats.level = level_for_points(stats.total_points);
        if touched {
            stats.consecutive_days = next_streak(
                stats.consecutive_days,
                previous,
                stats.last_active,
                &self.ctx.calendar,
            );
        }
        self.persist_stats(owner, stats.clone()).await?;
        Ok(stats)
    }

    /// Latest stats: the remote record when connected, the cached record (or
    /// defaults) otherwise.
    async fn current_stats(&self, owner: &Owner) -> SyncResult<UserStats> {
        let now = self.ctx.now();
        let Some(path) = self.stats.write_base(owner) else {
            return Ok(self
                .stats
                .first()
                .unwrap_or_else(|| UserStats::initial(owner.id(), now)));
        };
        match self.ctx.remote.read_once(&path, None).await? {
            Some(record) => entity_from_record(last_segment(&path), record).map_err(|e| {
                SyncError::InvalidRecord {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            }),
            None => Ok(UserStats::initial(owner.id(), now)),
        }
    }

    async fn persist_stats(&self, owner: &Owner, stats: UserStats) -> SyncResult<()> {
        if owner.is_anonymous() {
            self.stats.upsert_local(stats).await;
            Ok(())
        } else {
            self.stats.write_owned_record(owner, stats).await.map(|_| ())
        }
    }

    /// Top `limit` users by points. Answers are kept until the identity
    /// changes.
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        {
            let memo = self.lock_leaderboard();
            if !memo.is_empty() && memo.len() >= limit {
                return memo[..limit].to_vec();
            }
        }
        let query = Query::new()
            .order_by_child("totalPoints")
            .limit_to_last(limit);
        let result = self
            .ctx
            .remote
            .read_once("userStats", Some(query))
            .await
            .map_err(SyncError::from);
        let Some(data) = report(
            &self.status,
            "Failed to get leaderboard. Please try again.",
            result,
        ) else {
            return Vec::new();
        };
        let mut entries = data.map(|data| parse_leaderboard(&data)).unwrap_or_default();
        entries.truncate(limit);
        *self.lock_leaderboard() = entries.clone();
        entries
    }

    fn lock_leaderboard(&self) -> MutexGuard<'_, Vec<LeaderboardEntry>> {
        self.leaderboard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes initial stats the first time a connected user has none.
    fn initial_stats_hook(&self, owner: &Owner) -> SnapshotHook {
        let cache = self.stats.clone();
        let owner = owner.clone();
        Arc::new(move |snapshot: Snapshot| {
            let cache = cache.clone();
            let owner = owner.clone();
            async move {
                if !snapshot.is_empty() || owner.is_anonymous() {
                    return;
                }
                let stats = UserStats::initial(owner.id(), cache.context().now());
                match cache.write_owned_record(&owner, stats).await {
                    Ok(_) => tracing::info!(owner = %owner, "Created initial user stats"),
                    Err(e) => cache
                        .status()
                        .fail("Failed to create user stats. Please try again.", &e),
                }
            }
            .boxed()
        })
    }
}

#[async_trait]
impl Domain for GamificationService {
    fn name(&self) -> &'static str {
        "gamification"
    }

    fn status(&self) -> &DomainStatus {
        &self.status
    }

    async fn start(&self) {
        self.achievements.warm_start().await;
        self.user_achievements.warm_start().await;
        self.stats.warm_start().await;
        if self.catalogue.is_empty() {
            attach(&self.catalogue, &self.achievements, &Owner::Anonymous, None).await;
        }
    }

    async fn bind_identity(&self, owner: &Owner) {
        self.subscriptions.cancel_all().await;
        self.lock_leaderboard().clear();
        self.user_achievements.evict_foreign(owner).await;
        self.stats.evict_foreign(owner).await;
        attach(&self.subscriptions, &self.user_achievements, owner, None).await;
        let hook = self.initial_stats_hook(owner);
        attach(&self.subscriptions, &self.stats, owner, Some(hook)).await;
    }

    async fn shutdown(&self) {
        self.subscriptions.cancel_all().await;
        self.catalogue.cancel_all().await;
    }
}
