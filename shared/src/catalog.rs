//! Expected schema of the CMMS database.
//!
//! The REST surface gives no access to the system catalogs, so this is the
//! reference the probes compare against and the source of any SQL handed to
//! an operator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
    pub default: Option<&'static str>,
    /// `(table, column)` this column references, if any.
    pub references: Option<(&'static str, &'static str)>,
}

impl ColumnDef {
    const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            nullable: true,
            default: None,
            references: None,
        }
    }

    const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    const fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    /// Column definition as it appears inside `CREATE TABLE` / `ADD COLUMN`.
    pub fn sql_fragment(&self) -> String {
        column_sql(
            self.name,
            self.sql_type,
            self.nullable,
            self.default,
            self.references,
        )
    }
}

/// `name type [NOT NULL] [DEFAULT expr] [REFERENCES table(column)]`.
pub fn column_sql(
    name: &str,
    sql_type: &str,
    nullable: bool,
    default: Option<&str>,
    references: Option<(&str, &str)>,
) -> String {
    let mut out = format!("{} {}", name, sql_type);
    if !nullable {
        out.push_str(" NOT NULL");
    }
    if let Some(default) = default {
        out.push_str(" DEFAULT ");
        out.push_str(default);
    }
    if let Some((table, column)) = references {
        out.push_str(&format!(" REFERENCES {}({})", table, column));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub description: &'static str,
    pub columns: &'static [ColumnDef],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn create_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.name == "id" {
                    format!("  {} PRIMARY KEY", c.sql_fragment())
                } else {
                    format!("  {}", c.sql_fragment())
                }
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            self.name,
            cols.join(",\n")
        )
    }
}

const UUID_PK: ColumnDef = ColumnDef::new("id", "uuid")
    .not_null()
    .default("gen_random_uuid()");
const CREATED_AT: ColumnDef = ColumnDef::new("created_at", "timestamptz")
    .not_null()
    .default("now()");
const UPDATED_AT: ColumnDef = ColumnDef::new("updated_at", "timestamptz")
    .not_null()
    .default("now()");

pub const COMPANIES: TableDef = TableDef {
    name: "companies",
    description: "Companies owning plant systems",
    columns: &[
        UUID_PK,
        ColumnDef::new("name", "text").not_null(),
        ColumnDef::new("code", "text"),
        CREATED_AT,
    ],
};

pub const LOCATIONS: TableDef = TableDef {
    name: "locations",
    description: "Physical sites",
    columns: &[UUID_PK, ColumnDef::new("name", "text").not_null(), CREATED_AT],
};

pub const SYSTEMS: TableDef = TableDef {
    name: "systems",
    description: "Plant and process areas",
    columns: &[
        UUID_PK,
        ColumnDef::new("name", "text").not_null(),
        ColumnDef::new("name_en", "text"),
        ColumnDef::new("company_id", "uuid")
            .not_null()
            .references("companies", "id"),
        ColumnDef::new("location_id", "uuid").references("locations", "id"),
        CREATED_AT,
    ],
};

pub const EQUIPMENT_TYPES: TableDef = TableDef {
    name: "equipment_types",
    description: "Catalog of machine categories",
    columns: &[
        UUID_PK,
        ColumnDef::new("name", "text").not_null(),
        ColumnDef::new("name_en", "text"),
        CREATED_AT,
    ],
};

pub const ASSETS: TableDef = TableDef {
    name: "assets",
    description: "Individual machines",
    columns: &[
        UUID_PK,
        ColumnDef::new("serial_number", "text"),
        ColumnDef::new("status", "text").default("'active'"),
        ColumnDef::new("system_id", "uuid").references("systems", "id"),
        ColumnDef::new("equipment_type_id", "uuid").references("equipment_types", "id"),
        CREATED_AT,
    ],
};

pub const USER_PROFILES: TableDef = TableDef {
    name: "user_profiles",
    description: "Application user records (distinct from auth identities)",
    columns: &[
        UUID_PK,
        ColumnDef::new("user_id", "uuid"),
        ColumnDef::new("email", "text"),
        ColumnDef::new("full_name", "text"),
        CREATED_AT,
    ],
};

pub const PM_TEMPLATES: TableDef = TableDef {
    name: "pm_templates",
    description: "Preventive maintenance checklist definitions",
    columns: &[
        UUID_PK,
        ColumnDef::new("name", "text").not_null(),
        ColumnDef::new("company_id", "uuid").references("companies", "id"),
        ColumnDef::new("system_id", "uuid").references("systems", "id"),
        ColumnDef::new("equipment_type_id", "uuid").references("equipment_types", "id"),
        ColumnDef::new("estimated_duration", "integer"),
        CREATED_AT,
    ],
};

pub const PM_TEMPLATE_DETAILS: TableDef = TableDef {
    name: "pm_template_details",
    description: "Ordered steps of a PM template",
    columns: &[
        UUID_PK,
        ColumnDef::new("pm_template_id", "uuid")
            .not_null()
            .references("pm_templates", "id"),
        ColumnDef::new("step_number", "integer").not_null(),
        ColumnDef::new("description", "text").not_null(),
        ColumnDef::new("input_type", "text").not_null().default("'text'"),
        ColumnDef::new("min_value", "numeric"),
        ColumnDef::new("max_value", "numeric"),
        ColumnDef::new("expected_value", "text"),
        ColumnDef::new("is_critical", "boolean").not_null().default("false"),
    ],
};

pub const WORK_ORDERS: TableDef = TableDef {
    name: "work_orders",
    description: "Corrective and preventive work orders",
    columns: &[
        ColumnDef::new("id", "text").not_null(),
        ColumnDef::new("type", "text").not_null(),
        ColumnDef::new("title", "text").not_null(),
        ColumnDef::new("status", "text").not_null().default("'open'"),
        ColumnDef::new("priority", "text").not_null().default("'medium'"),
        ColumnDef::new("asset_id", "uuid").references("assets", "id"),
        ColumnDef::new("system_id", "uuid").references("systems", "id"),
        ColumnDef::new("pm_template_id", "uuid").references("pm_templates", "id"),
        ColumnDef::new("requested_by", "uuid").references("user_profiles", "id"),
        ColumnDef::new("assigned_to", "uuid").references("user_profiles", "id"),
        ColumnDef::new("actual_hours", "numeric"),
        CREATED_AT,
        ColumnDef::new("started_at", "timestamptz"),
        ColumnDef::new("completed_at", "timestamptz"),
        UPDATED_AT,
    ],
};

pub const WORK_ORDER_TASKS: TableDef = TableDef {
    name: "work_order_tasks",
    description: "Steps of a work order",
    columns: &[
        UUID_PK,
        ColumnDef::new("work_order_id", "text")
            .not_null()
            .references("work_orders", "id"),
        ColumnDef::new("pm_template_detail_id", "uuid").references("pm_template_details", "id"),
        ColumnDef::new("step_number", "integer").not_null(),
        ColumnDef::new("description", "text").not_null(),
        ColumnDef::new("result_value", "text"),
        ColumnDef::new("result_status", "text").default("'pending'"),
        ColumnDef::new("is_critical", "boolean").not_null().default("false"),
        ColumnDef::new("completed_at", "timestamptz"),
        CREATED_AT,
        UPDATED_AT,
    ],
};

pub const WORK_ORDER_HISTORY: TableDef = TableDef {
    name: "work_order_history",
    description: "Append-only field-level audit of work order changes",
    columns: &[
        UUID_PK,
        ColumnDef::new("work_order_id", "text")
            .not_null()
            .references("work_orders", "id"),
        ColumnDef::new("field_name", "text").not_null(),
        ColumnDef::new("old_value", "text"),
        ColumnDef::new("new_value", "text"),
        ColumnDef::new("changed_by", "uuid").references("user_profiles", "id"),
        ColumnDef::new("changed_at", "timestamptz").not_null().default("now()"),
    ],
};

pub const WORK_ORDER_COMMENTS: TableDef = TableDef {
    name: "work_order_comments",
    description: "Discussion entries on a work order",
    columns: &[
        UUID_PK,
        ColumnDef::new("work_order_id", "text")
            .not_null()
            .references("work_orders", "id"),
        ColumnDef::new("author_id", "uuid").references("user_profiles", "id"),
        ColumnDef::new("body", "text").not_null(),
        CREATED_AT,
    ],
};

pub const WORK_ORDER_ATTACHMENTS: TableDef = TableDef {
    name: "work_order_attachments",
    description: "File metadata attached to a work order",
    columns: &[
        UUID_PK,
        ColumnDef::new("work_order_id", "text")
            .not_null()
            .references("work_orders", "id"),
        ColumnDef::new("file_name", "text").not_null(),
        ColumnDef::new("file_path", "text").not_null(),
        ColumnDef::new("content_type", "text"),
        ColumnDef::new("size_bytes", "bigint"),
        ColumnDef::new("uploaded_by", "uuid").references("user_profiles", "id"),
        CREATED_AT,
    ],
};

/// Every known table, parents before children.
pub const CATALOG: &[TableDef] = &[
    COMPANIES,
    LOCATIONS,
    SYSTEMS,
    EQUIPMENT_TYPES,
    ASSETS,
    USER_PROFILES,
    PM_TEMPLATES,
    PM_TEMPLATE_DETAILS,
    WORK_ORDERS,
    WORK_ORDER_TASKS,
    WORK_ORDER_HISTORY,
    WORK_ORDER_COMMENTS,
    WORK_ORDER_ATTACHMENTS,
];

pub fn table(name: &str) -> Option<&'static TableDef> {
    CATALOG.iter().find(|t| t.name == name)
}

pub fn table_names() -> Vec<&'static str> {
    CATALOG.iter().map(|t| t.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let mut names = table_names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn references_point_at_earlier_tables() {
        for (idx, t) in CATALOG.iter().enumerate() {
            for col in t.columns {
                if let Some((target, target_col)) = col.references {
                    let pos = CATALOG.iter().position(|c| c.name == target);
                    assert!(
                        pos.map(|p| p < idx).unwrap_or(false),
                        "{}.{} references {} which is not declared earlier",
                        t.name,
                        col.name,
                        target
                    );
                    assert!(table(target).unwrap().column(target_col).is_some());
                }
            }
        }
    }

    #[test]
    fn create_sql_marks_primary_key_and_references() {
        let sql = WORK_ORDER_COMMENTS.create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS work_order_comments ("));
        assert!(sql.contains("id uuid NOT NULL DEFAULT gen_random_uuid() PRIMARY KEY"));
        assert!(sql.contains("author_id uuid REFERENCES user_profiles(id)"));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn work_order_user_columns_reference_profile_id() {
        for name in ["requested_by", "assigned_to"] {
            let col = WORK_ORDERS.column(name).unwrap();
            assert_eq!(col.references, Some(("user_profiles", "id")));
        }
    }
}
