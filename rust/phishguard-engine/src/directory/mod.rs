//! External directory collaborators: audience and course/template resolution.
//!
//! Group/user management and course CRUD live outside this engine. They are
//! consumed through two narrow traits, with a static in-memory
//! implementation for embedded deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attack-simulation template attached to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackTemplate {
    /// Template name as known by the campaign platform.
    pub name: String,
    /// URL the simulated phish points at.
    pub target_url: String,
    /// Landing-page identifier on the campaign platform.
    pub landing_page: String,
    /// Sending-profile identifier on the campaign platform.
    pub sending_profile: String,
}

/// Course metadata the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    /// Course identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Follow-up simulation template. Not every course carries one.
    pub template: Option<AttackTemplate>,
}

/// Resolves audience references to concrete users and display names.
#[async_trait]
pub trait AudienceResolver: Send + Sync {
    /// Deduplicated union of all group members plus direct users.
    ///
    /// Any unknown group or user id fails the whole resolution.
    async fn resolve_users(
        &self,
        group_ids: &[Uuid],
        user_ids: &[Uuid],
    ) -> anyhow::Result<Vec<Uuid>>;

    /// Display names for the given groups, in input order.
    async fn group_names(&self, group_ids: &[Uuid]) -> anyhow::Result<Vec<String>>;
}

/// Looks up courses and their attack-simulation templates.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Fetch a course by id, or `None` when it does not exist.
    async fn course(&self, course_id: Uuid) -> anyhow::Result<Option<CourseInfo>>;
}

/// Seed data for [`StaticDirectory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    /// Groups with their members.
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
    /// Users known outside any group.
    #[serde(default)]
    pub users: Vec<Uuid>,
    /// Course catalog.
    #[serde(default)]
    pub courses: Vec<CourseInfo>,
}

/// One seeded group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    /// Group identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Member user ids.
    pub members: Vec<Uuid>,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    groups: HashMap<Uuid, GroupSeed>,
    users: HashSet<Uuid>,
    courses: HashMap<Uuid, CourseInfo>,
}

/// In-memory directory for embedded deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
}

impl StaticDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from seed data.
    #[must_use]
    pub fn from_seed(seed: DirectorySeed) -> Self {
        let directory = Self::new();
        {
            let mut inner = directory.inner.write();
            for group in seed.groups {
                inner.users.extend(group.members.iter().copied());
                inner.groups.insert(group.id, group);
            }
            inner.users.extend(seed.users);
            for course in seed.courses {
                inner.courses.insert(course.id, course);
            }
        }
        directory
    }

    /// Register a group with its members.
    pub fn add_group(&self, id: Uuid, name: impl Into<String>, members: Vec<Uuid>) {
        let mut inner = self.inner.write();
        inner.users.extend(members.iter().copied());
        inner.groups.insert(
            id,
            GroupSeed {
                id,
                name: name.into(),
                members,
            },
        );
    }

    /// Register a user.
    pub fn add_user(&self, id: Uuid) {
        self.inner.write().users.insert(id);
    }

    /// Register a course.
    pub fn add_course(&self, course: CourseInfo) {
        self.inner.write().courses.insert(course.id, course);
    }
}

#[async_trait]
impl AudienceResolver for StaticDirectory {
    async fn resolve_users(
        &self,
        group_ids: &[Uuid],
        user_ids: &[Uuid],
    ) -> anyhow::Result<Vec<Uuid>> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for group_id in group_ids {
            let group = inner
                .groups
                .get(group_id)
                .ok_or_else(|| anyhow::anyhow!("unknown group: {group_id}"))?;
            for member in &group.members {
                if seen.insert(*member) {
                    resolved.push(*member);
                }
            }
        }
        for user_id in user_ids {
            if !inner.users.contains(user_id) {
                anyhow::bail!("unknown user: {user_id}");
            }
            if seen.insert(*user_id) {
                resolved.push(*user_id);
            }
        }
        Ok(resolved)
    }

    async fn group_names(&self, group_ids: &[Uuid]) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.read();
        group_ids
            .iter()
            .map(|id| {
                inner
                    .groups
                    .get(id)
                    .map(|g| g.name.clone())
                    .ok_or_else(|| anyhow::anyhow!("unknown group: {id}"))
            })
            .collect()
    }
}

#[async_trait]
impl CourseCatalog for StaticDirectory {
    async fn course(&self, course_id: Uuid) -> anyhow::Result<Option<CourseInfo>> {
        Ok(self.inner.read().courses.get(&course_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolution_deduplicates_across_groups_and_direct_users() {
        let directory = StaticDirectory::new();
        let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        directory.add_group(g1, "Finance", vec![u1, u2]);
        directory.add_group(g2, "Engineering", vec![u2, u3]);

        let users = directory.resolve_users(&[g1, g2], &[u1]).await.unwrap();
        assert_eq!(users, vec![u1, u2, u3]);
    }

    #[tokio::test]
    async fn unknown_group_fails_resolution() {
        let directory = StaticDirectory::new();
        let err = directory
            .resolve_users(&[Uuid::new_v4()], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown group"));
    }

    #[tokio::test]
    async fn unknown_user_fails_resolution() {
        let directory = StaticDirectory::new();
        let err = directory
            .resolve_users(&[], &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown user"));
    }

    #[tokio::test]
    async fn group_names_preserve_input_order() {
        let directory = StaticDirectory::new();
        let g1 = Uuid::new_v4();
        let g2 = Uuid::new_v4();
        directory.add_group(g1, "Sales", vec![Uuid::new_v4()]);
        directory.add_group(g2, "Support", vec![Uuid::new_v4()]);

        let names = directory.group_names(&[g2, g1]).await.unwrap();
        assert_eq!(names, vec!["Support".to_string(), "Sales".to_string()]);
    }
}
