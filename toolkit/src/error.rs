//! Error taxonomy for requests against the hosted REST layer.

use shared::PostgrestError;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// The relation does not exist (or is not exposed).
    #[error("table '{table}' does not exist: {message}")]
    MissingRelation { table: String, message: String },

    /// The table exists but a referenced column does not.
    #[error("column '{column}' missing on '{table}': {message}")]
    MissingColumn {
        table: String,
        column: String,
        message: String,
    },

    /// No foreign key links the two tables.
    #[error("no relationship between '{table}' and '{target}': {message}")]
    MissingRelationship {
        table: String,
        target: String,
        message: String,
    },

    /// The requested RPC is not installed or the key may not call it.
    #[error("function '{function}' unavailable: {message}")]
    CapabilityUnavailable { function: String, message: String },

    #[error("request failed ({status}{}): {message}", code_suffix(.code))]
    Request {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(c) if !c.is_empty() => format!(", {}", c),
        _ => String::new(),
    }
}

/// What a request was aimed at, used to attach names to classified errors.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Table(&'a str),
    Function(&'a str),
}

impl DbError {
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, DbError::MissingRelation { .. })
    }

    pub fn is_missing_column(&self) -> bool {
        matches!(self, DbError::MissingColumn { .. })
    }

    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, DbError::CapabilityUnavailable { .. })
    }

    pub fn unfiltered(table: &str) -> Self {
        DbError::Request {
            status: 0,
            code: Some("UNFILTERED".to_string()),
            message: format!("refusing to modify every row of '{}' without a filter", table),
        }
    }

    /// Map a failed response onto the taxonomy.
    pub fn classify(status: u16, body: &PostgrestError, target: Target<'_>) -> Self {
        let message = if body.message.is_empty() {
            format!("HTTP {}", status)
        } else {
            body.message.clone()
        };

        match (body.code(), target) {
            ("42P01" | "PGRST205", Target::Table(table)) => DbError::MissingRelation {
                table: table.to_string(),
                message,
            },
            ("42703" | "PGRST204", Target::Table(table)) => DbError::MissingColumn {
                table: table.to_string(),
                column: extract_column(&body.message).unwrap_or_default(),
                message,
            },
            ("PGRST200", Target::Table(table)) => DbError::MissingRelationship {
                table: table.to_string(),
                target: extract_relationship_target(body).unwrap_or_default(),
                message,
            },
            ("PGRST202" | "42883" | "42501", Target::Function(function)) => {
                DbError::CapabilityUnavailable {
                    function: function.to_string(),
                    message,
                }
            }
            (_, Target::Function(function)) if status == 401 || status == 403 || status == 404 => {
                DbError::CapabilityUnavailable {
                    function: function.to_string(),
                    message,
                }
            }
            (code, _) => DbError::Request {
                status,
                code: (!code.is_empty()).then(|| code.to_string()),
                message,
            },
        }
    }
}

/// Pull the column name out of messages such as
/// `column work_orders.actual_hours does not exist` or
/// `Could not find the 'actual_hours' column of 'work_orders' in the schema cache`.
pub fn extract_column(message: &str) -> Option<String> {
    if let Some(rest) = message.strip_prefix("column ") {
        let name = rest.split_whitespace().next()?;
        let name = name.rsplit('.').next()?;
        return Some(name.trim_matches('"').to_string());
    }
    if let Some(start) = message.find("the '") {
        let rest = &message[start + 5..];
        let end = rest.find('\'')?;
        return Some(rest[..end].to_string());
    }
    None
}

/// `PGRST200` names the embedded table in `details` as `... and 'user_profiles' ...`.
fn extract_relationship_target(body: &PostgrestError) -> Option<String> {
    let text = body.details.as_deref().unwrap_or(&body.message);
    let idx = text.find("and '")?;
    let rest = &text[idx + 5..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str, message: &str) -> PostgrestError {
        PostgrestError {
            code: Some(code.to_string()),
            message: message.to_string(),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn classifies_missing_relation_codes() {
        for code in ["42P01", "PGRST205"] {
            let err = DbError::classify(404, &body(code, "relation missing"), Target::Table("wo"));
            assert!(err.is_missing_relation(), "{} should be a missing relation", code);
        }
    }

    #[test]
    fn classifies_missing_column_and_extracts_name() {
        let err = DbError::classify(
            400,
            &body("42703", "column work_orders.actual_hours does not exist"),
            Target::Table("work_orders"),
        );
        match err {
            DbError::MissingColumn { table, column, .. } => {
                assert_eq!(table, "work_orders");
                assert_eq!(column, "actual_hours");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = DbError::classify(
            400,
            &body(
                "PGRST204",
                "Could not find the 'is_critical' column of 'work_order_tasks' in the schema cache",
            ),
            Target::Table("work_order_tasks"),
        );
        assert!(matches!(err, DbError::MissingColumn { ref column, .. } if column == "is_critical"));
    }

    #[test]
    fn classifies_rpc_capability_errors() {
        let err = DbError::classify(
            404,
            &body("PGRST202", "Could not find the function public.exec_sql(sql)"),
            Target::Function("exec_sql"),
        );
        assert!(err.is_capability_unavailable());

        let err = DbError::classify(403, &PostgrestError::default(), Target::Function("exec_sql"));
        assert!(err.is_capability_unavailable());
    }

    #[test]
    fn relationship_error_names_target() {
        let mut b = body("PGRST200", "Could not find a relationship");
        b.details = Some(
            "Searched for a foreign key relationship between 'work_orders' and 'user_profiles'"
                .to_string(),
        );
        let err = DbError::classify(400, &b, Target::Table("work_orders"));
        assert!(
            matches!(err, DbError::MissingRelationship { ref target, .. } if target == "user_profiles")
        );
    }

    #[test]
    fn other_failures_keep_status_and_code() {
        let err = DbError::classify(500, &body("XX000", "boom"), Target::Table("assets"));
        assert_eq!(err.to_string(), "request failed (500, XX000): boom");

        let err = DbError::classify(502, &PostgrestError::default(), Target::Table("assets"));
        assert_eq!(err.to_string(), "request failed (502): HTTP 502");
    }
}
