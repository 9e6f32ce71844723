//! Point-in-time view of a user's balance and completion state.

use serde::{Deserialize, Serialize};

use crate::{CompletionRecord, RewardKind, User, UserId};

/// Completion flags exposed to presentation code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlags {
    /// Onboarding finished.
    pub onboarding_completed: bool,
    /// Keyword task done.
    pub keyword_completed: bool,
    /// Quiz done.
    pub quiz_completed: bool,
    /// Channel subscription rewarded.
    pub subscription_completed: bool,
}

/// Balance and completion state of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The user.
    pub user_id: UserId,
    /// Current balance.
    pub balance: i64,
    /// Completion flags.
    pub flags: SnapshotFlags,
    /// Taps accepted today.
    pub taps_today: u32,
    /// Taps left today.
    pub remaining_taps_today: u32,
    /// Distinct users referred.
    pub referral_count: u64,
}

impl Snapshot {
    /// Assemble a snapshot from ledger reads.
    #[must_use]
    pub fn from_parts(
        user: &User,
        completions: &[CompletionRecord],
        taps_today: u32,
        daily_tap_cap: u32,
        referral_count: u64,
    ) -> Self {
        let has = |kind: &RewardKind| completions.iter().any(|c| &c.reward_kind == kind);
        Self {
            user_id: user.user_id.clone(),
            balance: user.points,
            flags: SnapshotFlags {
                onboarding_completed: user.onboarding_completed,
                keyword_completed: user.keyword_completed,
                quiz_completed: has(&RewardKind::Quiz),
                subscription_completed: has(&RewardKind::ChannelSubscription),
            },
            taps_today,
            remaining_taps_today: daily_tap_cap.saturating_sub(taps_today),
            referral_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserProfile;
    use chrono::Utc;

    #[test]
    fn derives_flags_from_completions() {
        let user = User::new(&UserProfile::new(UserId::generate()), Utc::now());
        let completions = vec![CompletionRecord {
            user_id: user.user_id.clone(),
            reward_kind: RewardKind::Quiz,
            points_awarded: 200,
            completed_at: Utc::now(),
        }];

        let snapshot = Snapshot::from_parts(&user, &completions, 3, 10, 2);
        assert!(snapshot.flags.quiz_completed);
        assert!(!snapshot.flags.subscription_completed);
        assert_eq!(snapshot.remaining_taps_today, 7);
        assert_eq!(snapshot.referral_count, 2);
    }
}
