//! Delegation records
//!
//! Created and revoked by HR administration; read-only to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// What a delegation covers, from most to least specific
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DelegationScope {
    /// Only steps of instances running this template
    Workflow(String),
    /// Only steps of instances whose `department` context matches
    Department(String),
    /// Everything the delegator would approve
    Blanket,
}

impl DelegationScope {
    pub fn kind(&self) -> &'static str {
        match self {
            DelegationScope::Workflow(_) => "workflow",
            DelegationScope::Department(_) => "department",
            DelegationScope::Blanket => "blanket",
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            DelegationScope::Workflow(v) | DelegationScope::Department(v) => Some(v),
            DelegationScope::Blanket => None,
        }
    }

    /// Higher is narrower
    pub fn specificity(&self) -> u8 {
        match self {
            DelegationScope::Workflow(_) => 2,
            DelegationScope::Department(_) => 1,
            DelegationScope::Blanket => 0,
        }
    }

    pub fn from_parts(kind: &str, value: Option<String>) -> std::result::Result<Self, String> {
        match (kind, value) {
            ("workflow", Some(v)) => Ok(DelegationScope::Workflow(v)),
            ("department", Some(v)) => Ok(DelegationScope::Department(v)),
            ("blanket", _) => Ok(DelegationScope::Blanket),
            (kind, _) => Err(format!("Invalid delegation scope: {}", kind)),
        }
    }
}

/// A time-boxed reassignment of approval authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    /// Person whose authority is being handed over
    pub delegator: String,
    /// Person acting in the delegator's place
    pub delegate: String,
    pub scope: DelegationScope,
    pub starts_at: DateTime<Utc>,
    /// Open-ended when `None`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub active: bool,
}

impl Delegation {
    /// In effect when active and `at` falls within `[starts_at, ends_at]`
    pub fn in_effect(&self, at: DateTime<Utc>) -> bool {
        self.active && self.starts_at <= at && self.ends_at.map_or(true, |end| at <= end)
    }
}

/// Request to record a new delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDelegation {
    pub delegator: String,
    pub delegate: String,
    pub scope: DelegationScope,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
}

impl NewDelegation {
    pub fn new(
        delegator: impl Into<String>,
        delegate: impl Into<String>,
        scope: DelegationScope,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            delegator: delegator.into(),
            delegate: delegate.into(),
            scope,
            starts_at,
            ends_at: None,
            reason: String::new(),
        }
    }

    pub fn until(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.delegator.trim().is_empty() || self.delegate.trim().is_empty() {
            return Err(AppError::BadRequest(
                "delegator and delegate are required".to_string(),
            ));
        }
        if self.delegator == self.delegate {
            return Err(AppError::BadRequest(
                "a person cannot delegate to themselves".to_string(),
            ));
        }
        if let Some(end) = self.ends_at {
            if end < self.starts_at {
                return Err(AppError::BadRequest(
                    "delegation ends before it starts".to_string(),
                ));
            }
        }
        if self.scope.value().map_or(false, |v| v.trim().is_empty()) {
            return Err(AppError::BadRequest(format!(
                "{} scope needs a value",
                self.scope.kind()
            )));
        }
        Ok(())
    }

    pub fn into_delegation(self) -> Delegation {
        Delegation {
            id: Uuid::new_v4(),
            delegator: self.delegator,
            delegate: self.delegate,
            scope: self.scope,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            reason: self.reason,
            active: true,
        }
    }
}
