use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderType {
    Corrective,
    Preventive,
}

impl WorkOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderType::Corrective => "corrective",
            WorkOrderType::Preventive => "preventive",
        }
    }

    pub fn all() -> &'static [WorkOrderType] {
        &[WorkOrderType::Corrective, WorkOrderType::Preventive]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Draft,
    Open,
    Assigned,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Draft => "draft",
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::Assigned => "assigned",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::OnHold => "on_hold",
            WorkOrderStatus::Completed => "completed",
            WorkOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn all() -> &'static [WorkOrderStatus] {
        &[
            WorkOrderStatus::Draft,
            WorkOrderStatus::Open,
            WorkOrderStatus::Assigned,
            WorkOrderStatus::InProgress,
            WorkOrderStatus::OnHold,
            WorkOrderStatus::Completed,
            WorkOrderStatus::Cancelled,
        ]
    }

    /// Completed and cancelled orders accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkOrderStatus::Completed | WorkOrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn all() -> &'static [Priority] {
        &[
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Critical,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResultStatus {
    Pending,
    Pass,
    Fail,
    Skipped,
}

impl TaskResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResultStatus::Pending => "pending",
            TaskResultStatus::Pass => "pass",
            TaskResultStatus::Fail => "fail",
            TaskResultStatus::Skipped => "skipped",
        }
    }
}

// ============================================================================
// Assets & people
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub serial_number: Option<String>,
    pub status: Option<String>,
    pub system_id: Option<String>,
    pub equipment_type_id: Option<String>,
}

/// Application-level user record. `id` is the key work orders must reference;
/// `user_id` is the authentication identity and is not a valid FK target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

// ============================================================================
// Work orders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: String,
    #[serde(rename = "type")]
    pub work_type: WorkOrderType,
    pub title: String,
    pub status: WorkOrderStatus,
    pub priority: Priority,
    pub asset_id: Option<String>,
    pub system_id: Option<String>,
    pub pm_template_id: Option<String>,
    pub requested_by: Option<String>,
    pub assigned_to: Option<String>,
    pub actual_hours: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkOrder {
    pub id: String,
    #[serde(rename = "type")]
    pub work_type: WorkOrderType,
    pub title: String,
    pub status: WorkOrderStatus,
    pub priority: Priority,
    pub asset_id: Option<String>,
    pub system_id: Option<String>,
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkOrderTask {
    pub work_order_id: String,
    pub step_number: i32,
    pub description: String,
    pub result_status: TaskResultStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkOrderHistory {
    pub work_order_id: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkOrderComment {
    pub work_order_id: String,
    pub author_id: Option<String>,
    pub body: String,
}

// ============================================================================
// REST error body
// ============================================================================

/// Error body returned by the hosted REST layer on a failed request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostgrestError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestError {
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_order_type_serializes_under_type_key() {
        let wo = NewWorkOrder {
            id: "WO-1".to_string(),
            work_type: WorkOrderType::Preventive,
            title: "Check pump".to_string(),
            status: WorkOrderStatus::Open,
            priority: Priority::High,
            asset_id: None,
            system_id: None,
            requested_by: Some("p-1".to_string()),
        };
        let value = serde_json::to_value(&wo).unwrap();
        assert_eq!(value["type"], "preventive");
        assert_eq!(value["status"], "open");
        assert_eq!(value["priority"], "high");
    }

    #[test]
    fn status_strings_match_serde_names() {
        for status in WorkOrderStatus::all() {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
        }
        assert!(WorkOrderStatus::Cancelled.is_terminal());
        assert!(!WorkOrderStatus::OnHold.is_terminal());
    }

    #[test]
    fn postgrest_error_tolerates_missing_fields() {
        let err: PostgrestError = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(err.code(), "");
        assert_eq!(err.message, "boom");
    }
}
