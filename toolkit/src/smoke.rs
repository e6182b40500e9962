//! Live read-modify-verify-cleanup exercise of the work order tables.
//!
//! Nothing here runs inside a transaction. Rows created along the way are
//! deleted again in reverse order whether or not the steps succeeded; a
//! failed delete is reported as orphaned data.

use std::future::Future;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use shared::{
    Asset, NewWorkOrder, NewWorkOrderComment, NewWorkOrderHistory, NewWorkOrderTask, Priority,
    TaskResultStatus, UserProfile, WorkOrder, WorkOrderStatus, WorkOrderType,
};

use crate::client::{Filters, Query, RestClient, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeStep {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmokeReport {
    pub work_order_id: Option<String>,
    pub steps: Vec<SmokeStep>,
    pub cleanup: Vec<SmokeStep>,
    /// Cleanup was skipped on request.
    pub kept: bool,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        !self.steps.is_empty()
            && self.steps.iter().all(|s| s.passed)
            && self.cleanup.iter().all(|s| s.passed)
    }

    pub fn orphaned(&self) -> Vec<&SmokeStep> {
        self.cleanup.iter().filter(|s| !s.passed).collect()
    }
}

pub async fn run_work_order_smoke(client: &RestClient, keep: bool) -> SmokeReport {
    let mut report = SmokeReport::default();
    let mut created: Vec<(&'static str, Filters)> = Vec::new();

    exercise(client, &mut report, &mut created).await;

    if keep {
        report.kept = true;
        return report;
    }

    for (table, filters) in created.into_iter().rev() {
        let outcome = client.delete(table, &filters).await;
        report.cleanup.push(match outcome {
            Ok(rows) => SmokeStep {
                name: table,
                passed: true,
                detail: format!("removed {} row(s)", rows.len()),
            },
            Err(e) => SmokeStep {
                name: table,
                passed: false,
                detail: format!("orphaned test rows left behind: {}", e),
            },
        });
    }

    report
}

async fn exercise(
    client: &RestClient,
    report: &mut SmokeReport,
    created: &mut Vec<(&'static str, Filters)>,
) {
    let Some(asset) = step(&mut report.steps, "pick an asset", async {
        let asset: Asset = first_row(client, "assets", "id,system_id").await?;
        let detail = format!("asset {}", asset.id);
        Ok::<_, String>((asset, detail))
    })
    .await
    else {
        return;
    };

    let Some(profile) = step(&mut report.steps, "pick a user profile", async {
        let profile: UserProfile = first_row(client, "user_profiles", "id,user_id").await?;
        let detail = format!("profile {}", profile.id);
        Ok::<_, String>((profile, detail))
    })
    .await
    else {
        return;
    };

    let wo_id = format!("WO-SMOKE-{}", Utc::now().format("%Y%m%d%H%M%S%3f"));
    report.work_order_id = Some(wo_id.clone());
    let by_wo = || Filters::new().eq("work_order_id", &wo_id);

    let new_wo = NewWorkOrder {
        id: wo_id.clone(),
        work_type: WorkOrderType::Corrective,
        title: "Smoke test work order".to_string(),
        status: WorkOrderStatus::Open,
        priority: Priority::Low,
        asset_id: Some(asset.id.clone()),
        system_id: asset.system_id.clone(),
        requested_by: Some(profile.id.clone()),
    };
    let inserted = step(&mut report.steps, "create work order", async {
        client
            .insert("work_orders", &new_wo)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<_, String>(((), format!("{} requested by profile {}", wo_id, profile.id)))
    })
    .await;
    if inserted.is_none() {
        return;
    }
    created.push(("work_orders", Filters::new().eq("id", &wo_id)));

    let task = NewWorkOrderTask {
        work_order_id: wo_id.clone(),
        step_number: 1,
        description: "Inspect and record condition".to_string(),
        result_status: TaskResultStatus::Pending,
    };
    let inserted = step(&mut report.steps, "add task", async {
        client
            .insert("work_order_tasks", &task)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<_, String>(((), "task 1 added".to_string()))
    })
    .await;
    if inserted.is_none() {
        return;
    }
    created.push(("work_order_tasks", by_wo()));

    let updated = step(&mut report.steps, "start work order", async {
        let now = Utc::now();
        client
            .update(
                "work_orders",
                &Filters::new().eq("id", &wo_id),
                &json!({
                    "status": WorkOrderStatus::InProgress,
                    "started_at": now,
                    "updated_at": now,
                }),
            )
            .await
            .map_err(|e| e.to_string())?;

        let rows = client
            .select(
                "work_orders",
                &Query::new().filters(Filters::new().eq("id", &wo_id)).limit(1),
            )
            .await
            .map_err(|e| e.to_string())?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| "work order vanished after update".to_string())?;
        let wo: WorkOrder = decode(row)?;
        if wo.status != WorkOrderStatus::InProgress {
            return Err(format!("status reads back as '{}'", wo.status.as_str()));
        }
        if wo.started_at.is_none() {
            return Err("started_at was not stored".to_string());
        }
        Ok::<_, String>(((), "status verified as in_progress".to_string()))
    })
    .await;
    if updated.is_none() {
        return;
    }

    let history = NewWorkOrderHistory {
        work_order_id: wo_id.clone(),
        field_name: "status".to_string(),
        old_value: Some(WorkOrderStatus::Open.as_str().to_string()),
        new_value: Some(WorkOrderStatus::InProgress.as_str().to_string()),
        changed_by: Some(profile.id.clone()),
    };
    let inserted = step(&mut report.steps, "record history", async {
        client
            .insert("work_order_history", &history)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<_, String>(((), "status change recorded".to_string()))
    })
    .await;
    if inserted.is_none() {
        return;
    }
    created.push(("work_order_history", by_wo()));

    let comment = NewWorkOrderComment {
        work_order_id: wo_id.clone(),
        author_id: Some(profile.id.clone()),
        body: "Automated smoke test comment".to_string(),
    };
    let inserted = step(&mut report.steps, "add comment", async {
        client
            .insert("work_order_comments", &comment)
            .await
            .map_err(|e| e.to_string())?;
        Ok::<_, String>(((), "comment added".to_string()))
    })
    .await;
    if inserted.is_some() {
        created.push(("work_order_comments", by_wo()));
    }
}

/// Await one step and record its outcome.
async fn step<T, F>(steps: &mut Vec<SmokeStep>, name: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<(T, String), String>>,
{
    match fut.await {
        Ok((value, detail)) => {
            steps.push(SmokeStep {
                name,
                passed: true,
                detail,
            });
            Some(value)
        }
        Err(detail) => {
            tracing::warn!(step = name, %detail, "smoke step failed");
            steps.push(SmokeStep {
                name,
                passed: false,
                detail,
            });
            None
        }
    }
}

async fn first_row<T: DeserializeOwned>(
    client: &RestClient,
    table: &str,
    columns: &str,
) -> Result<T, String> {
    let rows = client
        .select(table, &Query::new().select(columns).limit(1))
        .await
        .map_err(|e| e.to_string())?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| format!("{} has no rows", table))?;
    decode(row)
}

fn decode<T: DeserializeOwned>(row: Row) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| e.to_string())
}
