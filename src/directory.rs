//! Collaborator interfaces the engine reads through
//!
//! The owning records (offers, interviews) and the person directory live in
//! the surrounding application. The engine only needs to describe an entity,
//! write its instance id back, and expand approver roles into people.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Context, ContextValue, EntityType};

/// Human-readable label plus any routing attributes the owner knows about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub label: String,
    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub attributes: Context,
}

impl DisplayInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attributes: Context::new(),
        }
    }

    /// Label used when the owner no longer knows the entity
    pub fn unknown(entity_type: EntityType, entity_id: &str) -> Self {
        Self::new(format!("{} {}", entity_type, entity_id))
    }
}

/// A person who can hold approver roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Person {
    pub fn holds(&self, role: &str) -> bool {
        self.active && self.roles.iter().any(|r| r == role)
    }
}

/// Owning-record capability: describe an entity and link it to its instance
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn describe(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<DisplayInfo>>;

    async fn attach_instance(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        instance_id: Uuid,
    ) -> Result<()>;
}

/// Person directory capability
#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn get_person(&self, person_id: &str) -> Result<Option<Person>>;

    /// Active people holding `role`
    async fn persons_with_role(&self, role: &str) -> Result<Vec<Person>>;
}

/// An owning record known to the in-process directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityRecord {
    Offer {
        id: String,
        candidate_name: String,
        job_title: String,
        salary: f64,
        #[serde(default)]
        department: Option<String>,
        #[serde(default)]
        position_level: Option<String>,
        #[serde(default)]
        approval_instance_id: Option<Uuid>,
    },
    Interview {
        id: String,
        candidate_name: String,
        job_title: String,
        #[serde(default)]
        department: Option<String>,
        #[serde(default)]
        approval_instance_id: Option<Uuid>,
    },
}

impl EntityRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityRecord::Offer { .. } => EntityType::Offer,
            EntityRecord::Interview { .. } => EntityType::Interview,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRecord::Offer { id, .. } | EntityRecord::Interview { id, .. } => id,
        }
    }

    pub fn approval_instance_id(&self) -> Option<Uuid> {
        match self {
            EntityRecord::Offer {
                approval_instance_id,
                ..
            }
            | EntityRecord::Interview {
                approval_instance_id,
                ..
            } => *approval_instance_id,
        }
    }

    fn set_approval_instance_id(&mut self, instance_id: Uuid) {
        match self {
            EntityRecord::Offer {
                approval_instance_id,
                ..
            }
            | EntityRecord::Interview {
                approval_instance_id,
                ..
            } => *approval_instance_id = Some(instance_id),
        }
    }

    pub fn describe(&self) -> DisplayInfo {
        match self {
            EntityRecord::Offer {
                candidate_name,
                job_title,
                salary,
                department,
                position_level,
                ..
            } => {
                let mut info = DisplayInfo::new(format!("Offer: {} ({})", candidate_name, job_title));
                info.attributes
                    .insert("salary".into(), ContextValue::Number(*salary));
                if let Some(department) = department {
                    info.attributes
                        .insert("department".into(), ContextValue::Text(department.clone()));
                }
                if let Some(level) = position_level {
                    info.attributes
                        .insert("position_level".into(), ContextValue::Text(level.clone()));
                }
                info
            }
            EntityRecord::Interview {
                candidate_name,
                job_title,
                department,
                ..
            } => {
                let mut info =
                    DisplayInfo::new(format!("Interview: {} ({})", candidate_name, job_title));
                if let Some(department) = department {
                    info.attributes
                        .insert("department".into(), ContextValue::Text(department.clone()));
                }
                info
            }
        }
    }
}

/// JSON seed for the in-process directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub persons: Vec<Person>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
}

/// In-process directory used by the demo server and tests
#[derive(Default)]
pub struct InMemoryDirectory {
    persons: RwLock<HashMap<String, Person>>,
    entities: RwLock<HashMap<(EntityType, String), EntityRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let persons = seed
            .persons
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let entities = seed
            .entities
            .into_iter()
            .map(|e| ((e.entity_type(), e.id().to_string()), e))
            .collect();
        Self {
            persons: RwLock::new(persons),
            entities: RwLock::new(entities),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read {}: {}", path.display(), e)))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid directory seed: {}", e)))?;
        Ok(Self::from_seed(seed))
    }

    pub async fn add_person(&self, person: Person) {
        let mut persons = self.persons.write().await;
        persons.insert(person.id.clone(), person);
    }

    pub async fn add_entity(&self, record: EntityRecord) {
        let mut entities = self.entities.write().await;
        entities.insert((record.entity_type(), record.id().to_string()), record);
    }

    pub async fn get_entity(&self, entity_type: EntityType, entity_id: &str) -> Option<EntityRecord> {
        let entities = self.entities.read().await;
        entities.get(&(entity_type, entity_id.to_string())).cloned()
    }
}

#[async_trait]
impl EntityDirectory for InMemoryDirectory {
    async fn describe(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<DisplayInfo>> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(&(entity_type, entity_id.to_string()))
            .map(EntityRecord::describe))
    }

    async fn attach_instance(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        instance_id: Uuid,
    ) -> Result<()> {
        let mut entities = self.entities.write().await;
        let record = entities
            .get_mut(&(entity_type, entity_id.to_string()))
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", entity_type, entity_id)))?;
        record.set_approval_instance_id(instance_id);
        Ok(())
    }
}

#[async_trait]
impl PersonDirectory for InMemoryDirectory {
    async fn get_person(&self, person_id: &str) -> Result<Option<Person>> {
        let persons = self.persons.read().await;
        Ok(persons.get(person_id).cloned())
    }

    async fn persons_with_role(&self, role: &str) -> Result<Vec<Person>> {
        let persons = self.persons.read().await;
        let mut holders: Vec<Person> = persons.values().filter(|p| p.holds(role)).cloned().collect();
        holders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(holders)
    }
}
