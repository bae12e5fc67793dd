//! Closed status vocabularies for the two coordinated workflows plus the
//! brokerage order status mapping (C1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl AnalysisStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Error | AnalysisStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Running => "running",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Error => "error",
            AnalysisStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "running" => Ok(AnalysisStatus::Running),
            "completed" => Ok(AnalysisStatus::Completed),
            "error" => Ok(AnalysisStatus::Error),
            "cancelled" => Ok(AnalysisStatus::Cancelled),
            other => anyhow::bail!("unknown analysis status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl RebalanceStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RebalanceStatus::Completed | RebalanceStatus::Cancelled | RebalanceStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RebalanceStatus::Pending => "pending",
            RebalanceStatus::Running => "running",
            RebalanceStatus::Completed => "completed",
            RebalanceStatus::Cancelled => "cancelled",
            RebalanceStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for RebalanceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RebalanceStatus::Pending),
            "running" => Ok(RebalanceStatus::Running),
            "completed" => Ok(RebalanceStatus::Completed),
            "cancelled" => Ok(RebalanceStatus::Cancelled),
            "error" => Ok(RebalanceStatus::Error),
            other => anyhow::bail!("unknown rebalance status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOrderStatus {
    Pending,
    Approved,
    Rejected,
}

impl TradeOrderStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TradeOrderStatus::Approved | TradeOrderStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeOrderStatus::Pending => "pending",
            TradeOrderStatus::Approved => "approved",
            TradeOrderStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for TradeOrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeOrderStatus::Pending),
            "approved" => Ok(TradeOrderStatus::Approved),
            "rejected" => Ok(TradeOrderStatus::Rejected),
            other => anyhow::bail!("unknown trade order status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepStatus {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
    Cancelled,
}

impl AgentStepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStepStatus::Pending => "pending",
            AgentStepStatus::Running => "running",
            AgentStepStatus::Completed => "completed",
            AgentStepStatus::Error => "error",
            AgentStepStatus::Skipped => "skipped",
            AgentStepStatus::Cancelled => "cancelled",
        }
    }
}

/// Brokerage order status strings, as returned verbatim by Alpaca.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    DoneForDay,
    PendingNew,
    Other,
}

impl BrokerOrderStatus {
    pub fn from_alpaca(s: &str) -> Self {
        match s {
            "new" => BrokerOrderStatus::New,
            "partially_filled" => BrokerOrderStatus::PartiallyFilled,
            "filled" => BrokerOrderStatus::Filled,
            "canceled" => BrokerOrderStatus::Canceled,
            "expired" => BrokerOrderStatus::Expired,
            "rejected" => BrokerOrderStatus::Rejected,
            "done_for_day" => BrokerOrderStatus::DoneForDay,
            "pending_new" => BrokerOrderStatus::PendingNew,
            _ => BrokerOrderStatus::Other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::Filled
                | BrokerOrderStatus::Canceled
                | BrokerOrderStatus::Expired
                | BrokerOrderStatus::Rejected
                | BrokerOrderStatus::DoneForDay
        )
    }

    pub fn is_filled(self) -> bool {
        matches!(self, BrokerOrderStatus::Filled | BrokerOrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
    Pending,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Buy => "BUY",
            Decision::Sell => "SELL",
            Decision::Hold => "HOLD",
            Decision::Pending => "PENDING",
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Decision::Buy),
            "SELL" => Ok(Decision::Sell),
            "HOLD" => Ok(Decision::Hold),
            "PENDING" => Ok(Decision::Pending),
            other => anyhow::bail!("unknown decision: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_status_finished_set() {
        assert!(AnalysisStatus::Completed.is_finished());
        assert!(AnalysisStatus::Error.is_finished());
        assert!(AnalysisStatus::Cancelled.is_finished());
        assert!(!AnalysisStatus::Running.is_finished());
        assert!(!AnalysisStatus::Pending.is_finished());
    }

    #[test]
    fn broker_order_terminal_set() {
        assert!(BrokerOrderStatus::Filled.is_terminal());
        assert!(BrokerOrderStatus::Canceled.is_terminal());
        assert!(BrokerOrderStatus::Expired.is_terminal());
        assert!(BrokerOrderStatus::Rejected.is_terminal());
        assert!(BrokerOrderStatus::DoneForDay.is_terminal());
        assert!(!BrokerOrderStatus::New.is_terminal());
        assert!(!BrokerOrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn broker_order_filled_set() {
        assert!(BrokerOrderStatus::Filled.is_filled());
        assert!(BrokerOrderStatus::PartiallyFilled.is_filled());
        assert!(!BrokerOrderStatus::New.is_filled());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["pending", "running", "completed", "error", "cancelled"] {
            let parsed: AnalysisStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }
}
