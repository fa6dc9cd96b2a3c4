use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        resource: Resource,
    },
    DeleteResource {
        id: ResourceId,
    },
    SetResourceStatus {
        resource_id: ResourceId,
        status: ResourceStatus,
    },
    InsertBooking {
        resource_id: ResourceId,
        date: NaiveDate,
        range: TimeRange,
        purpose: String,
        requested_by: String,
    },
    InsertTimetableEntry {
        resource_id: ResourceId,
        weekday: Weekday,
        range: TimeRange,
        subject: String,
        faculty: String,
        audience: AudienceScope,
    },
    InsertEvent {
        resource_id: ResourceId,
        date: NaiveDate,
        range: TimeRange,
        title: String,
        organizer: String,
        audience: AudienceScope,
    },
    DeleteCommitment {
        id: CommitmentId,
    },
    SelectCommitments {
        resource_id: Option<ResourceId>,
    },
    SelectResources {
        id: Option<ResourceId>,
    },
    SelectConflicts {
        resource_id: Option<ResourceId>,
    },
    InsertFaculty {
        id: FacultyId,
        name: Option<String>,
        capacity_points: Option<u32>,
    },
    SetFacultyCapacity {
        faculty_id: FacultyId,
        capacity_points: u32,
    },
    InsertAllocation {
        faculty_id: FacultyId,
        event_id: EventId,
        points: Option<u32>,
    },
    DeleteAllocation {
        faculty_id: FacultyId,
        event_id: EventId,
    },
    SelectWorkload {
        faculty_id: Option<FacultyId>,
    },
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: expected at most {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{table}: missing value for {column}")]
    MissingColumn { table: &'static str, column: &'static str },
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── Column layouts ────────────────────────────────────────────
// Positional VALUES follow these orders when no column list is given.

const RESOURCE_COLUMNS: &[&str] = &["id", "name", "kind", "capacity", "location", "status"];
const RESOURCE_STATUS_COLUMNS: &[&str] = &["resource_id", "status"];
const BOOKING_COLUMNS: &[&str] = &["resource_id", "date", "start", "end", "purpose", "requested_by"];
const TIMETABLE_COLUMNS: &[&str] = &["resource_id", "weekday", "start", "end", "subject", "faculty", "audience"];
const EVENT_COLUMNS: &[&str] = &["resource_id", "date", "start", "end", "title", "organizer", "audience"];
const FACULTY_COLUMNS: &[&str] = &["id", "name", "capacity_points"];
const FACULTY_CAPACITY_COLUMNS: &[&str] = &["faculty_id", "capacity_points"];
const ALLOCATION_COLUMNS: &[&str] = &["faculty_id", "event_id", "points"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "resources" => {
            let row = Row::bind("resources", RESOURCE_COLUMNS, &insert.columns, &values)?;
            let kind = row.required("kind")?;
            let status = match row.optional("status") {
                Some(expr) => parse_enum("status", expr, ResourceStatus::parse)?,
                None => ResourceStatus::Available,
            };
            Ok(Command::InsertResource {
                resource: Resource {
                    id: parse_text("id", row.required("id")?)?,
                    name: parse_text("name", row.required("name")?)?,
                    kind: parse_enum("kind", kind, ResourceKind::parse)?,
                    capacity: parse_u32("capacity", row.required("capacity")?)?,
                    location: row
                        .optional("location")
                        .map(|e| parse_text("location", e))
                        .transpose()?
                        .unwrap_or_default(),
                    status,
                },
            })
        }
        "resource_status" => {
            let row = Row::bind("resource_status", RESOURCE_STATUS_COLUMNS, &insert.columns, &values)?;
            Ok(Command::SetResourceStatus {
                resource_id: parse_text("resource_id", row.required("resource_id")?)?,
                status: parse_enum("status", row.required("status")?, ResourceStatus::parse)?,
            })
        }
        "bookings" => {
            let row = Row::bind("bookings", BOOKING_COLUMNS, &insert.columns, &values)?;
            Ok(Command::InsertBooking {
                resource_id: parse_text("resource_id", row.required("resource_id")?)?,
                date: parse_date("date", row.required("date")?)?,
                range: row.range()?,
                purpose: parse_text("purpose", row.required("purpose")?)?,
                requested_by: parse_text("requested_by", row.required("requested_by")?)?,
            })
        }
        "timetable" => {
            let row = Row::bind("timetable", TIMETABLE_COLUMNS, &insert.columns, &values)?;
            Ok(Command::InsertTimetableEntry {
                resource_id: parse_text("resource_id", row.required("resource_id")?)?,
                weekday: parse_enum("weekday", row.required("weekday")?, Weekday::parse)?,
                range: row.range()?,
                subject: parse_text("subject", row.required("subject")?)?,
                faculty: parse_text("faculty", row.required("faculty")?)?,
                audience: row.audience()?,
            })
        }
        "events" => {
            let row = Row::bind("events", EVENT_COLUMNS, &insert.columns, &values)?;
            Ok(Command::InsertEvent {
                resource_id: parse_text("resource_id", row.required("resource_id")?)?,
                date: parse_date("date", row.required("date")?)?,
                range: row.range()?,
                title: parse_text("title", row.required("title")?)?,
                organizer: parse_text("organizer", row.required("organizer")?)?,
                audience: row.audience()?,
            })
        }
        "faculty" => {
            let row = Row::bind("faculty", FACULTY_COLUMNS, &insert.columns, &values)?;
            Ok(Command::InsertFaculty {
                id: parse_text("id", row.required("id")?)?,
                name: row.optional("name").map(|e| parse_text("name", e)).transpose()?,
                capacity_points: row
                    .optional("capacity_points")
                    .map(|e| parse_u32("capacity_points", e))
                    .transpose()?,
            })
        }
        "faculty_capacity" => {
            let row = Row::bind("faculty_capacity", FACULTY_CAPACITY_COLUMNS, &insert.columns, &values)?;
            Ok(Command::SetFacultyCapacity {
                faculty_id: parse_text("faculty_id", row.required("faculty_id")?)?,
                capacity_points: parse_u32("capacity_points", row.required("capacity_points")?)?,
            })
        }
        "allocations" => {
            let row = Row::bind("allocations", ALLOCATION_COLUMNS, &insert.columns, &values)?;
            Ok(Command::InsertAllocation {
                faculty_id: parse_text("faculty_id", row.required("faculty_id")?)?,
                event_id: parse_text("event_id", row.required("event_id")?)?,
                points: row.optional("points").map(|e| parse_u32("points", e)).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_equalities(delete.selection.as_ref())?;

    match table.as_str() {
        "commitments" => {
            check_filters("commitments", &filters, &["id"])?;
            let id = find_filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?;
            Ok(Command::DeleteCommitment { id: parse_ulid("id", id)? })
        }
        "resources" => {
            check_filters("resources", &filters, &["id"])?;
            let id = find_filter(&filters, "id").ok_or(SqlError::MissingFilter("id"))?;
            Ok(Command::DeleteResource { id: parse_text("id", id)? })
        }
        "allocations" => {
            check_filters("allocations", &filters, &["faculty_id", "event_id"])?;
            let faculty_id =
                find_filter(&filters, "faculty_id").ok_or(SqlError::MissingFilter("faculty_id"))?;
            let event_id =
                find_filter(&filters, "event_id").ok_or(SqlError::MissingFilter("event_id"))?;
            Ok(Command::DeleteAllocation {
                faculty_id: parse_text("faculty_id", faculty_id)?,
                event_id: parse_text("event_id", event_id)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_equalities(select.selection.as_ref())?;
    // Each table filters on exactly one column.
    let text_filter = |table: &'static str, column: &'static str| {
        check_filters(table, &filters, &[column])?;
        find_filter(&filters, column)
            .map(|e| parse_text(column, e))
            .transpose()
    };

    match table.as_str() {
        "commitments" => Ok(Command::SelectCommitments {
            resource_id: text_filter("commitments", "resource_id")?,
        }),
        "resources" => Ok(Command::SelectResources {
            id: text_filter("resources", "id")?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            resource_id: text_filter("conflicts", "resource_id")?,
        }),
        "workload" => Ok(Command::SelectWorkload {
            faculty_id: text_filter("workload", "faculty_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Row binding ───────────────────────────────────────────────

/// One VALUES row keyed by column name. NULL values count as absent.
struct Row<'a> {
    table: &'static str,
    fields: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn bind(
        table: &'static str,
        layout: &[&str],
        columns: &[ast::Ident],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            if values.len() > layout.len() {
                return Err(SqlError::WrongArity(table, layout.len(), values.len()));
            }
            layout.iter().map(|c| c.to_string()).collect()
        } else {
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            let names: Vec<String> = columns.iter().map(|c| c.value.to_lowercase()).collect();
            if let Some(unknown) = names.iter().find(|n| !layout.contains(&n.as_str())) {
                return Err(SqlError::UnknownColumn {
                    table,
                    column: unknown.clone(),
                });
            }
            names
        };
        Ok(Self {
            table,
            fields: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
            .filter(|expr| !matches!(extract_value(expr), Some(Value::Null)))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(column).ok_or(SqlError::MissingColumn {
            table: self.table,
            column,
        })
    }

    fn range(&self) -> Result<TimeRange, SqlError> {
        Ok(TimeRange::new(
            parse_minutes("start", self.required("start")?)?,
            parse_minutes("end", self.required("end")?)?,
        ))
    }

    fn audience(&self) -> Result<AudienceScope, SqlError> {
        match self.optional("audience") {
            Some(expr) => parse_enum("audience", expr, AudienceScope::parse),
            None => Ok(AudienceScope::All),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Flatten `a = 1 AND b = 2` into `[(a, 1), (b, 2)]`. Anything else is refused.
fn where_equalities(selection: Option<&Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_equalities(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_equalities(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

/// Refuse filters on columns the table cannot be narrowed by.
fn check_filters(
    table: &'static str,
    filters: &[(String, Expr)],
    allowed: &[&str],
) -> Result<(), SqlError> {
    match filters.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
        Some((column, _)) => Err(SqlError::UnknownColumn {
            table,
            column: column.clone(),
        }),
        None => Ok(()),
    }
}

fn find_filter<'a>(filters: &'a [(String, Expr)], column: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == column).map(|(_, e)| e)
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn invalid(column: &str, reason: impl Into<String>) -> SqlError {
    SqlError::InvalidValue {
        column: column.to_string(),
        reason: reason.into(),
    }
}

/// A string or bare number as text.
fn parse_text(column: &str, expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s))
        | Some(Value::DoubleQuotedString(s))
        | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(invalid(column, format!("expected text, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value for {column}, got {expr}"))),
    }
}

fn parse_i64(column: &str, expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(column, expr)?);
    }
    let text = parse_text(column, expr)?;
    text.trim()
        .parse()
        .map_err(|e| invalid(column, format!("bad integer {text:?}: {e}")))
}

fn parse_u32(column: &str, expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(column, expr)?;
    u32::try_from(v).map_err(|_| invalid(column, format!("{v} out of range")))
}

/// Minutes since midnight, given as a number or as `'HH:MM'`.
fn parse_minutes(column: &str, expr: &Expr) -> Result<Minutes, SqlError> {
    let text = parse_text(column, expr)?;
    if text.contains(':') {
        return parse_hhmm(&text).ok_or_else(|| invalid(column, format!("bad time {text:?}")));
    }
    let v = parse_i64(column, expr)?;
    Minutes::try_from(v).map_err(|_| invalid(column, format!("{v} out of range")))
}

fn parse_date(column: &str, expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = parse_text(column, expr)?;
    text.trim()
        .parse()
        .map_err(|e| invalid(column, format!("bad date {text:?}: {e}")))
}

fn parse_ulid(column: &str, expr: &Expr) -> Result<Ulid, SqlError> {
    let text = parse_text(column, expr)?;
    Ulid::from_string(&text).map_err(|e| invalid(column, format!("bad ULID: {e}")))
}

fn parse_enum<T>(column: &str, expr: &Expr, parse: impl Fn(&str) -> Option<T>) -> Result<T, SqlError> {
    let text = parse_text(column, expr)?;
    parse(&text).ok_or_else(|| invalid(column, format!("unrecognised {text:?}")))
}
