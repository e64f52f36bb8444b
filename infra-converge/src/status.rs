//! Status reporting.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::Disposition;

/// Outcome of the last reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionState {
    Ready,
    /// Cleared by the next successful attempt.
    TransientFailure,
    /// Stays until an operator fixes the declaration.
    TerminalFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    pub state: ConditionState,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl StatusCondition {
    pub fn ready() -> Self {
        Self {
            state: ConditionState::Ready,
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn failed(disposition: Disposition, message: impl Into<String>) -> Self {
        let state = match disposition {
            Disposition::Terminal => ConditionState::TerminalFailure,
            Disposition::Transient(_) => ConditionState::TransientFailure,
        };
        Self {
            state,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConditionState::Ready
    }
}

/// Addresses published after a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerAddresses {
    pub primary: Option<Ipv4Addr>,
    /// One entry per secondary load balancer, in declaration order; `None`
    /// while a secondary has no IPv4.
    pub extras: Vec<Option<Ipv4Addr>>,
}

/// Where cluster status is written (custom resource status, ...).
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_addresses(&self, cluster: &str, addresses: &LoadBalancerAddresses) -> Result<()>;

    async fn set_condition(&self, cluster: &str, condition: StatusCondition) -> Result<()>;
}
