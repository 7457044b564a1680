//! Creator profile, completeness scoring and patch merging

use crate::providers::{BlogAnalysis, HashtagResearch, InstagramProfileAnalysis};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Profile fields that count toward completeness and gate workflow phases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    Niche,
    Platform,
    TargetAudience,
    BrandVoice,
    BusinessType,
    Goals,
    Instagram,
}

impl ProfileField {
    /// Canonical order
    pub const ALL: &[ProfileField] = &[
        ProfileField::Name,
        ProfileField::Niche,
        ProfileField::Platform,
        ProfileField::TargetAudience,
        ProfileField::BrandVoice,
        ProfileField::BusinessType,
        ProfileField::Goals,
        ProfileField::Instagram,
    ];

    /// Contribution to the completeness score; weights sum to 100
    pub fn weight(&self) -> u8 {
        match self {
            ProfileField::Name => 15,
            ProfileField::Niche => 20,
            ProfileField::Platform => 15,
            ProfileField::TargetAudience => 15,
            ProfileField::BrandVoice => 10,
            ProfileField::BusinessType => 10,
            ProfileField::Goals => 10,
            ProfileField::Instagram => 5,
        }
    }

    /// Question used when asking the user for this field
    pub fn discovery_prompt(&self) -> &'static str {
        match self {
            ProfileField::Name => "What should I call you?",
            ProfileField::Niche => "What niche or topics do you create content about?",
            ProfileField::Platform => "Which platforms do you publish on?",
            ProfileField::TargetAudience => "Who is your target audience?",
            ProfileField::BrandVoice => "How would you describe your brand voice?",
            ProfileField::BusinessType => "Are you a solo creator, a business, or an agency?",
            ProfileField::Goals => "What are your main goals for the next few months?",
            ProfileField::Instagram => "What is your Instagram handle?",
        }
    }

    /// Lenient parse of the names a classifier tends to emit
    /// ("firstName", "niches", "target audience", ...).
    pub fn parse_loose(raw: &str) -> Option<ProfileField> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "name" | "firstname" | "fullname" | "lastname" => Some(ProfileField::Name),
            "niche" | "niches" | "topic" | "topics" => Some(ProfileField::Niche),
            "platform" | "platforms" => Some(ProfileField::Platform),
            "targetaudience" | "audience" => Some(ProfileField::TargetAudience),
            "brandvoice" | "voice" | "tone" => Some(ProfileField::BrandVoice),
            "businesstype" | "business" => Some(ProfileField::BusinessType),
            "goals" | "goal" => Some(ProfileField::Goals),
            "instagram" | "instagramhandle" | "handle" => Some(ProfileField::Instagram),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProfileField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProfileField::Name => "name",
            ProfileField::Niche => "niche",
            ProfileField::Platform => "platform",
            ProfileField::TargetAudience => "target_audience",
            ProfileField::BrandVoice => "brand_voice",
            ProfileField::BusinessType => "business_type",
            ProfileField::Goals => "goals",
            ProfileField::Instagram => "instagram",
        };
        write!(f, "{s}")
    }
}

/// Free-form extension data attached to a profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_pillars: Vec<String>,
    /// Analysis of the user's own Instagram account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram: Option<InstagramProfileAnalysis>,
    /// Competitor analyses keyed by normalized handle
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub competitors: BTreeMap<String, InstagramProfileAnalysis>,
    /// Hashtag research keyed by normalized tag
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashtag_research: BTreeMap<String, HashtagResearch>,
    /// Blog analyses keyed by domain
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blog_analyses: BTreeMap<String, BlogAnalysis>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-user creator profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: UserId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub niches: Vec<String>,
    pub platforms: Vec<String>,
    /// Normalized (lower-case, no `@`) own handle
    pub instagram_handle: Option<String>,
    pub extension: ProfileExtension,
    /// Derived; kept in sync by [`Profile::refresh_completeness`]
    pub completeness_score: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether an Instagram analysis was filed as the user's own account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstagramOwnership {
    Own,
    Competitor,
}

fn present(s: &Option<String>) -> bool {
    s.as_ref().is_some_and(|v| !v.trim().is_empty())
}

/// Trim, drop a leading `@`, lower-case
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_lowercase()
}

impl Profile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            first_name: None,
            last_name: None,
            niches: Vec::new(),
            platforms: Vec::new(),
            instagram_handle: None,
            extension: ProfileExtension::default(),
            completeness_score: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has(&self, field: ProfileField) -> bool {
        let ext = &self.extension;
        match field {
            ProfileField::Name => present(&self.first_name),
            ProfileField::Niche => self.niches.iter().any(|n| !n.trim().is_empty()),
            ProfileField::Platform => self.platforms.iter().any(|p| !p.trim().is_empty()),
            ProfileField::TargetAudience => present(&ext.target_audience),
            ProfileField::BrandVoice => present(&ext.brand_voice),
            ProfileField::BusinessType => present(&ext.business_type),
            ProfileField::Goals => ext.goals.iter().any(|g| !g.trim().is_empty()),
            ProfileField::Instagram => present(&self.instagram_handle),
        }
    }

    pub fn populated_fields(&self) -> BTreeSet<ProfileField> {
        ProfileField::ALL
            .iter()
            .copied()
            .filter(|f| self.has(*f))
            .collect()
    }

    /// Completeness score (0-100) derived purely from field presence
    pub fn compute_completeness(&self) -> u8 {
        let total: u32 = self
            .populated_fields()
            .iter()
            .map(|f| f.weight() as u32)
            .sum();
        total.min(100) as u8
    }

    pub fn refresh_completeness(&mut self) {
        self.completeness_score = self.compute_completeness();
    }

    /// Merge a patch in place. Scalars are overwritten by non-empty values;
    /// list fields take a case-insensitive union keeping existing spelling.
    /// Returns the fields whose value changed.
    pub fn apply_patch(&mut self, patch: &ProfilePatch) -> Vec<ProfileField> {
        let before = self.clone();

        set_scalar(&mut self.first_name, &patch.first_name);
        set_scalar(&mut self.last_name, &patch.last_name);
        merge_unique(&mut self.niches, &patch.niches);
        merge_unique(&mut self.platforms, &patch.platforms);
        if let Some(handle) = patch.instagram_handle.as_deref() {
            let handle = normalize_handle(handle);
            if !handle.is_empty() {
                self.set_own_handle(&handle);
            }
        }

        let ext = &mut self.extension;
        set_scalar(&mut ext.target_audience, &patch.target_audience);
        set_scalar(&mut ext.brand_voice, &patch.brand_voice);
        set_scalar(&mut ext.business_type, &patch.business_type);
        merge_unique(&mut ext.goals, &patch.goals);
        merge_unique(&mut ext.content_pillars, &patch.content_pillars);

        self.refresh_completeness();

        let changed: Vec<ProfileField> = ProfileField::ALL
            .iter()
            .copied()
            .filter(|f| field_value(&before, *f) != field_value(self, *f))
            .collect();
        if *self != before {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// A username is the user's own when it matches the stored handle, or
    /// when no handle is stored yet (first analysis defaults to own).
    pub fn is_own_handle(&self, username: &str) -> bool {
        match self.instagram_handle.as_deref() {
            Some(own) => own == normalize_handle(username),
            None => true,
        }
    }

    /// File an Instagram analysis as own profile or competitor.
    pub fn record_instagram_analysis(
        &mut self,
        analysis: InstagramProfileAnalysis,
    ) -> InstagramOwnership {
        let username = normalize_handle(&analysis.username);
        let ownership = if self.is_own_handle(&username) {
            self.set_own_handle(&username);
            self.extension.instagram = Some(analysis);
            InstagramOwnership::Own
        } else {
            self.extension.competitors.insert(username, analysis);
            InstagramOwnership::Competitor
        };
        self.refresh_completeness();
        self.updated_at = Utc::now();
        ownership
    }

    /// Set the own handle. A competitor entry filed under that handle is
    /// promoted to the own-profile analysis; a previous own analysis for a
    /// different account moves to the competitor map.
    pub fn set_own_handle(&mut self, handle: &str) {
        let handle = normalize_handle(handle);
        if self.instagram_handle.as_deref() == Some(handle.as_str()) {
            return;
        }
        if let Some(previous) = self.extension.instagram.take() {
            let previous_handle = normalize_handle(&previous.username);
            if previous_handle == handle {
                self.extension.instagram = Some(previous);
            } else {
                self.extension.competitors.insert(previous_handle, previous);
            }
        }
        if let Some(migrated) = self.extension.competitors.remove(&handle) {
            tracing::info!(user = %self.user_id, handle = %handle, "promoting competitor analysis to own profile");
            self.extension.instagram = Some(migrated);
        }
        self.instagram_handle = Some(handle);
    }

    /// Plain-text snapshot for the generation prompt
    pub fn snapshot(&self) -> String {
        let mut lines = Vec::new();
        let name = match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            _ => None,
        };
        if let Some(name) = name {
            lines.push(format!("- Name: {name}"));
        }
        if !self.niches.is_empty() {
            lines.push(format!("- Niches: {}", self.niches.join(", ")));
        }
        if !self.platforms.is_empty() {
            lines.push(format!("- Platforms: {}", self.platforms.join(", ")));
        }
        if let Some(handle) = &self.instagram_handle {
            lines.push(format!("- Instagram: @{handle}"));
        }
        let ext = &self.extension;
        if let Some(v) = &ext.target_audience {
            lines.push(format!("- Target audience: {v}"));
        }
        if let Some(v) = &ext.brand_voice {
            lines.push(format!("- Brand voice: {v}"));
        }
        if let Some(v) = &ext.business_type {
            lines.push(format!("- Business type: {v}"));
        }
        if !ext.goals.is_empty() {
            lines.push(format!("- Goals: {}", ext.goals.join("; ")));
        }
        if !ext.content_pillars.is_empty() {
            lines.push(format!("- Content pillars: {}", ext.content_pillars.join(", ")));
        }
        if let Some(ig) = &ext.instagram {
            lines.push(format!("- Own account: {}", ig.summary()));
        }
        if !ext.competitors.is_empty() {
            let names: Vec<String> = ext.competitors.keys().map(|k| format!("@{k}")).collect();
            lines.push(format!("- Tracked competitors: {}", names.join(", ")));
        }
        lines.push(format!("- Profile completeness: {}%", self.completeness_score));
        lines.join("\n")
    }
}

fn field_value(profile: &Profile, field: ProfileField) -> String {
    let ext = &profile.extension;
    match field {
        ProfileField::Name => format!("{:?}{:?}", profile.first_name, profile.last_name),
        ProfileField::Niche => profile.niches.join("|"),
        ProfileField::Platform => profile.platforms.join("|"),
        ProfileField::TargetAudience => format!("{:?}", ext.target_audience),
        ProfileField::BrandVoice => format!("{:?}", ext.brand_voice),
        ProfileField::BusinessType => format!("{:?}", ext.business_type),
        ProfileField::Goals => ext.goals.join("|"),
        ProfileField::Instagram => format!("{:?}", profile.instagram_handle),
    }
}

fn set_scalar(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *target = Some(v.to_string());
    }
}

/// Case-insensitive union; existing entries keep their spelling and order.
pub fn merge_unique(existing: &mut Vec<String>, incoming: &[String]) {
    for item in incoming {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let lower = item.to_lowercase();
        if !existing.iter().any(|e| e.to_lowercase() == lower) {
            existing.push(item.to_string());
        }
    }
}

/// Field updates extracted from a turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, alias = "first_name", alias = "name")]
    pub first_name: Option<String>,
    #[serde(default, alias = "last_name")]
    pub last_name: Option<String>,
    #[serde(default, alias = "niche", deserialize_with = "string_list")]
    pub niches: Vec<String>,
    #[serde(default, alias = "platform", deserialize_with = "string_list")]
    pub platforms: Vec<String>,
    #[serde(default, alias = "instagram_handle", alias = "instagram")]
    pub instagram_handle: Option<String>,
    #[serde(default, alias = "target_audience")]
    pub target_audience: Option<String>,
    #[serde(default, alias = "brand_voice")]
    pub brand_voice: Option<String>,
    #[serde(default, alias = "business_type")]
    pub business_type: Option<String>,
    #[serde(default, alias = "goal", deserialize_with = "string_list")]
    pub goals: Vec<String>,
    #[serde(default, alias = "content_pillars", deserialize_with = "string_list")]
    pub content_pillars: Vec<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }
}

/// Accepts `"a, b"`, `["a", "b"]` or `null`.
fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}
