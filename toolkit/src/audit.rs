//! Checks that work orders point at profile ids, not auth identity ids.

use shared::UserProfile;

use crate::client::{Query, RestClient, Row};
use crate::error::{DbError, DbResult};
use crate::export::{fetch_all, fetch_all_with};
use crate::probe::id_text;

const USER_COLUMNS: &[&str] = &["requested_by", "assigned_to"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Matches a `user_profiles.id`.
    Ok,
    /// Matches a profile's auth `user_id`; should be `profile_id`.
    AuthIdentity { profile_id: String },
    Dangling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub work_order_id: String,
    pub column: &'static str,
    pub value: String,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub work_orders_checked: usize,
    pub references_checked: usize,
    pub ok: usize,
    /// Everything that is not [`ReferenceKind::Ok`].
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&ReferenceKind) -> bool) -> usize {
        self.findings.iter().filter(|f| pred(&f.kind)).count()
    }
}

pub fn classify(value: &str, profiles: &[UserProfile]) -> ReferenceKind {
    if profiles.iter().any(|p| p.id == value) {
        return ReferenceKind::Ok;
    }
    match profiles
        .iter()
        .find(|p| p.user_id.as_deref() == Some(value))
    {
        Some(p) => ReferenceKind::AuthIdentity {
            profile_id: p.id.clone(),
        },
        None => ReferenceKind::Dangling,
    }
}

/// Classify every user reference of `work_orders` against `profiles`.
pub fn audit_rows(work_orders: &[Row], profiles: &[UserProfile]) -> AuditReport {
    let mut report = AuditReport {
        work_orders_checked: work_orders.len(),
        ..AuditReport::default()
    };

    for row in work_orders {
        let work_order_id = row.get("id").and_then(id_text).unwrap_or_default();
        for &column in USER_COLUMNS {
            let Some(value) = row.get(column).and_then(id_text) else {
                continue;
            };
            report.references_checked += 1;
            match classify(&value, profiles) {
                ReferenceKind::Ok => report.ok += 1,
                kind => report.findings.push(Finding {
                    work_order_id: work_order_id.clone(),
                    column,
                    value,
                    kind,
                }),
            }
        }
    }

    report
}

pub async fn audit_profile_references(client: &RestClient, page_size: usize) -> DbResult<AuditReport> {
    let profiles: Vec<UserProfile> = fetch_all(client, "user_profiles", page_size)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(serde_json::Value::Object(row)))
        .collect::<Result<_, _>>()
        .map_err(|e| DbError::Decode(format!("user_profiles: {}", e)))?;

    // Only the columns that exist on this deployment.
    let mut select = vec!["id"];
    for &column in USER_COLUMNS {
        match client
            .select("work_orders", &Query::new().select(column).limit(1))
            .await
        {
            Ok(_) => select.push(column),
            Err(DbError::MissingColumn { .. }) => {
                tracing::warn!(column, "work_orders has no such column; skipped")
            }
            Err(e) => return Err(e),
        }
    }

    let work_orders = fetch_all_with(
        client,
        "work_orders",
        Query::new().select(select.join(",")),
        page_size,
    )
    .await?;

    tracing::info!(
        profiles = profiles.len(),
        work_orders = work_orders.len(),
        "auditing user references"
    );
    Ok(audit_rows(&work_orders, &profiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(id: &str, user_id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            user_id: Some(user_id.to_string()),
            email: None,
            full_name: None,
        }
    }

    #[test]
    fn classifies_profile_auth_and_dangling_ids() {
        let profiles = vec![profile("p-1", "auth-1")];
        assert_eq!(classify("p-1", &profiles), ReferenceKind::Ok);
        assert_eq!(
            classify("auth-1", &profiles),
            ReferenceKind::AuthIdentity {
                profile_id: "p-1".to_string()
            }
        );
        assert_eq!(classify("nobody", &profiles), ReferenceKind::Dangling);
    }

    #[test]
    fn audit_counts_every_non_null_reference() {
        let profiles = vec![profile("p-1", "auth-1"), profile("p-2", "auth-2")];
        let rows: Vec<Row> = [
            json!({"id": "WO-1", "requested_by": "p-1", "assigned_to": "auth-2"}),
            json!({"id": "WO-2", "requested_by": "ghost", "assigned_to": null}),
        ]
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let report = audit_rows(&rows, &profiles);
        assert_eq!(report.work_orders_checked, 2);
        assert_eq!(report.references_checked, 3);
        assert_eq!(report.ok, 1);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].work_order_id, "WO-1");
        assert_eq!(report.findings[0].column, "assigned_to");
        assert_eq!(
            report.count(|k| matches!(k, ReferenceKind::Dangling)),
            1
        );
        assert!(!report.is_clean());
    }
}
