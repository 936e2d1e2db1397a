use crate::schema::*;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use validator::ValidationError;

/// A closed set of string values stored in a `VARCHAR` column.
pub trait Choice: Sized + Copy + 'static {
    const VALUES: &'static [&'static str];

    fn parse(s: &str) -> Option<Self>;
    fn as_str(&self) -> &'static str;

    /// Field validator for request bodies: `#[validate(custom(function = "Rank::check"))]`.
    fn check(value: &str) -> Result<(), ValidationError> {
        crate::validation::choice::<Self>(value)
    }
}

macro_rules! choice {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl Choice for $name {
            const VALUES: &'static [&'static str] = &[$($value),+];

            fn parse(s: &str) -> Option<Self> {
                match s {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }
    };
}

choice!(Rank {
    Cadet => "cadet",
    Pilot => "pilot",
    Navigator => "navigator",
    Commander => "commander",
    Admiral => "admiral",
});

choice!(ClubCategory {
    Technical => "technical",
    Cultural => "cultural",
    Sports => "sports",
    Academic => "academic",
    Social => "social",
    Other => "other",
});

choice!(MemberRole {
    Member => "member",
    Moderator => "moderator",
    Admin => "admin",
});

choice!(EventMode {
    Online => "online",
    Offline => "offline",
    Hybrid => "hybrid",
});

choice!(EventStatus {
    Upcoming => "upcoming",
    Ongoing => "ongoing",
    Completed => "completed",
    Cancelled => "cancelled",
});

choice!(AchievementCategory {
    Participation => "participation",
    Contribution => "contribution",
    Leadership => "leadership",
    Skill => "skill",
    Special => "special",
});

choice!(Rarity {
    Common => "common",
    Rare => "rare",
    Epic => "epic",
    Legendary => "legendary",
});

choice!(TeamCategory {
    Faculty => "faculty",
    Core => "core",
    Lead => "lead",
    Member => "member",
});

choice!(TeamStatus {
    Active => "active",
    Alumni => "alumni",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub rank: String,
    pub points: i32,
    pub contributions: i32,
    pub projects: i32,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
    pub portfolio: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Club {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub gradient: String,
    pub category: String,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(belongs_to(Club))]
#[diesel(belongs_to(User))]
#[diesel(table_name = club_members)]
#[serde(rename_all = "camelCase")]
pub struct ClubMember {
    #[serde(skip)]
    pub id: i32,
    #[serde(skip)]
    pub club_id: i32,
    pub user_id: i32,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub club_id: i32,
    pub date: DateTime<Utc>,
    pub time: String,
    pub duration: i32,
    pub location: String,
    pub mode: String,
    pub status: String,
    pub max_participants: Option<i32>,
    pub images: Vec<String>,
    pub tags: Vec<String>,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_full(&self, participant_count: usize) -> bool {
        self.spots_left(participant_count) == Some(0)
    }

    /// `None` when the event has no participant cap.
    pub fn spots_left(&self, participant_count: usize) -> Option<i64> {
        self.max_participants
            .map(|max| (i64::from(max) - participant_count as i64).max(0))
    }

    pub fn accepts_registrations(&self) -> bool {
        !matches!(
            EventStatus::parse(&self.status),
            Some(EventStatus::Completed | EventStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Event))]
#[diesel(belongs_to(User))]
#[diesel(table_name = event_participants)]
pub struct EventParticipant {
    pub id: i32,
    pub event_id: i32,
    pub user_id: i32,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub rarity: String,
    pub points: i32,
    pub criteria: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Queryable, QueryableByName, Identifiable, Associations, Serialize,
)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Achievement))]
#[diesel(table_name = user_achievements)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub id: i32,
    pub user_id: i32,
    pub achievement_id: i32,
    pub progress: i32,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: i32,
    pub name: String,
    pub role: String,
    pub category: String,
    pub year: Option<String>,
    pub branch: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
    pub twitter: Option<String>,
    pub email: Option<String>,
    pub status: String,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub color: String,
    pub priority: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub link: Option<String>,
    #[serde(rename = "order")]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notice {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now)
    }

    pub fn should_display_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedEmail {
    pub id: i32,
    pub email: String,
    pub added_by: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
