use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal as PgPortal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::EngineError;
use crate::facade::Portal;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct SlotguardHandler {
    portal: Arc<Portal>,
    query_parser: Arc<SlotguardQueryParser>,
}

impl SlotguardHandler {
    pub fn new(portal: Arc<Portal>) -> Self {
        Self {
            portal,
            query_parser: Arc::new(SlotguardQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str, format: &Format) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let portal = &self.portal;
        match cmd {
            Command::InsertResource { resource } => {
                portal.register_resource(resource).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                portal.remove_resource(&id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetResourceStatus {
                resource_id,
                status,
            } => {
                let resource = portal
                    .set_resource_status(&resource_id, status)
                    .await
                    .map_err(engine_err)?;
                resource_rows(vec![resource], format)
            }
            Command::InsertBooking {
                resource_id,
                date,
                range,
                purpose,
                requested_by,
            } => {
                let id = portal
                    .book_resource(&resource_id, date, range, &purpose, &requested_by)
                    .await
                    .map_err(engine_err)?;
                admission_rows(id, &[], format)
            }
            Command::InsertTimetableEntry {
                resource_id,
                weekday,
                range,
                subject,
                faculty,
                audience,
            } => {
                let admission = portal
                    .add_timetable_entry(&resource_id, weekday, range, &subject, &faculty, audience)
                    .await
                    .map_err(engine_err)?;
                admission_rows(admission.commitment.id, &admission.warnings, format)
            }
            Command::InsertEvent {
                resource_id,
                date,
                range,
                title,
                organizer,
                audience,
            } => {
                let admission = portal
                    .add_event_commitment(&resource_id, date, range, &title, &organizer, audience)
                    .await
                    .map_err(engine_err)?;
                admission_rows(admission.commitment.id, &admission.warnings, format)
            }
            Command::DeleteCommitment { id } => {
                portal.remove_commitment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectCommitments { resource_id } => {
                let commitments = portal
                    .commitments(resource_id.as_deref())
                    .await
                    .map_err(engine_err)?;
                commitment_rows(commitments, format)
            }
            Command::SelectResources { id } => {
                let resources = match id {
                    Some(id) => vec![portal.resource(&id).await.map_err(engine_err)?],
                    None => portal.list_resources().await,
                };
                resource_rows(resources, format)
            }
            Command::SelectConflicts { resource_id } => {
                let groups = portal
                    .weekly_conflict_report(resource_id.as_deref())
                    .await
                    .map_err(engine_err)?;
                conflict_rows(groups, format)
            }
            Command::InsertFaculty {
                id,
                name,
                capacity_points,
            } => {
                portal
                    .register_faculty(&id, name, capacity_points)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetFacultyCapacity {
                faculty_id,
                capacity_points,
            } => {
                let snapshot = portal
                    .set_faculty_capacity(&faculty_id, capacity_points)
                    .await
                    .map_err(engine_err)?;
                workload_rows(vec![snapshot], format)
            }
            Command::InsertAllocation {
                faculty_id,
                event_id,
                points,
            } => {
                let snapshot = portal
                    .allocate_faculty_to_event(&faculty_id, &event_id, points)
                    .await
                    .map_err(engine_err)?;
                workload_rows(vec![snapshot], format)
            }
            Command::DeleteAllocation {
                faculty_id,
                event_id,
            } => {
                let snapshot = portal
                    .deallocate_faculty_from_event(&faculty_id, &event_id)
                    .await
                    .map_err(engine_err)?;
                workload_rows(vec![snapshot], format)
            }
            Command::SelectWorkload { faculty_id } => {
                let snapshots = match faculty_id {
                    Some(id) => vec![portal.faculty_workload(&id).await.map_err(engine_err)?],
                    None => portal.faculty_workloads().await,
                };
                workload_rows(snapshots, format)
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn admission_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("conflicts_with")]
}

fn commitment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("resource_id"),
        text_field("day"),
        text_field("start"),
        text_field("end"),
        text_field("recurring"),
        text_field("purpose"),
        text_field("owner"),
        text_field("audience"),
        text_field("source"),
    ]
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("kind"),
        int_field("capacity"),
        text_field("location"),
        text_field("status"),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        text_field("resource_id"),
        text_field("day"),
        text_field("window_start"),
        text_field("window_end"),
        int_field("size"),
        text_field("commitment_ids"),
        text_field("commitments"),
    ]
}

fn workload_schema() -> Vec<FieldInfo> {
    vec![
        text_field("faculty_id"),
        int_field("allocated_points"),
        int_field("capacity_points"),
        int_field("utilization_percent"),
        text_field("band"),
        text_field("assigned_event_ids"),
    ]
}

/// Apply the client's requested result formats column by column.
fn with_format(schema: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    schema
        .into_iter()
        .enumerate()
        .map(|(i, field)| {
            let field_format = match format {
                Format::UnifiedText => FieldFormat::Text,
                Format::UnifiedBinary => FieldFormat::Binary,
                Format::Individual(codes) => codes
                    .get(i)
                    .map_or(FieldFormat::Text, |code| FieldFormat::from(*code)),
            };
            FieldInfo::new(
                field.name().to_string(),
                None,
                None,
                field.datatype().clone(),
                field_format,
            )
        })
        .collect()
}

/// Result columns for a statement, from its verb and table alone so that
/// statements with unbound `$n` parameters can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let norm = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    let table = |prefix: &str| {
        norm.find(prefix).map(|i| {
            norm[i + prefix.len()..]
                .trim_start()
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .next()
                .unwrap_or("")
                .to_string()
        })
    };
    if norm.starts_with("SELECT") {
        return match table("FROM ").as_deref() {
            Some("COMMITMENTS") => commitment_schema(),
            Some("RESOURCES") => resource_schema(),
            Some("CONFLICTS") => conflict_schema(),
            Some("WORKLOAD") => workload_schema(),
            _ => vec![],
        };
    }
    if norm.starts_with("INSERT") {
        return match table("INTO ").as_deref() {
            Some("BOOKINGS") | Some("TIMETABLE") | Some("EVENTS") => admission_schema(),
            Some("RESOURCE_STATUS") => resource_schema(),
            Some("ALLOCATIONS") | Some("FACULTY_CAPACITY") => workload_schema(),
            _ => vec![],
        };
    }
    if norm.starts_with("DELETE") && table("FROM ").as_deref() == Some("ALLOCATIONS") {
        return workload_schema();
    }
    vec![]
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn join_ids(commitments: &[Commitment]) -> String {
    commitments
        .iter()
        .map(|c| c.id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn admission_rows(id: CommitmentId, warnings: &[Commitment], format: &Format) -> PgWireResult<Vec<Response>> {
    query_response(with_format(admission_schema(), format), vec![(id, warnings)], |enc, (id, warnings)| {
        enc.encode_field(&id.to_string())?;
        enc.encode_field(&join_ids(warnings))
    })
}

fn commitment_rows(commitments: Vec<Commitment>, format: &Format) -> PgWireResult<Vec<Response>> {
    query_response(with_format(commitment_schema(), format), commitments, |enc, c| {
        let range = c.range();
        enc.encode_field(&c.id.to_string())?;
        enc.encode_field(&c.resource_id)?;
        enc.encode_field(&c.slot.day_key().to_string())?;
        enc.encode_field(&format_hhmm(range.start))?;
        enc.encode_field(&format_hhmm(range.end))?;
        enc.encode_field(&c.slot.is_recurring().to_string())?;
        enc.encode_field(&c.purpose)?;
        enc.encode_field(&c.owner_name)?;
        enc.encode_field(&c.audience.to_string())?;
        enc.encode_field(&c.source.to_string())
    })
}

fn resource_rows(resources: Vec<Resource>, format: &Format) -> PgWireResult<Vec<Response>> {
    query_response(with_format(resource_schema(), format), resources, |enc, r| {
        enc.encode_field(&r.id)?;
        enc.encode_field(&r.name)?;
        enc.encode_field(&r.kind.to_string())?;
        enc.encode_field(&i64::from(r.capacity))?;
        enc.encode_field(&r.location)?;
        enc.encode_field(&r.status.to_string())
    })
}

fn conflict_rows(groups: Vec<ConflictGroup>, format: &Format) -> PgWireResult<Vec<Response>> {
    query_response(with_format(conflict_schema(), format), groups, |enc, g| {
        let detail = serde_json::to_string(&g.commitments)
            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
        enc.encode_field(&g.resource_id)?;
        enc.encode_field(&g.day.to_string())?;
        enc.encode_field(&format_hhmm(g.window.start))?;
        enc.encode_field(&format_hhmm(g.window.end))?;
        enc.encode_field(&(g.commitments.len() as i64))?;
        enc.encode_field(&join_ids(&g.commitments))?;
        enc.encode_field(&detail)
    })
}

fn workload_rows(snapshots: Vec<WorkloadSnapshot>, format: &Format) -> PgWireResult<Vec<Response>> {
    query_response(with_format(workload_schema(), format), snapshots, |enc, s| {
        let events = serde_json::to_string(&s.assigned_event_ids)
            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
        enc.encode_field(&s.faculty_id)?;
        enc.encode_field(&i64::from(s.allocated_points))?;
        enc.encode_field(&i64::from(s.capacity_points))?;
        enc.encode_field(&i64::from(s.utilization_percent))?;
        enc.encode_field(&s.band.to_string())?;
        enc.encode_field(&events)
    })
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for SlotguardHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotguardQueryParser;

#[async_trait]
impl QueryParser for SlotguardQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let schema = result_schema(stmt);
        Ok(match column_format {
            Some(format) => with_format(schema, format),
            None => schema,
        })
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotguardHandler {
    type Statement = String;
    type QueryParser = SlotguardQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &PgPortal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql, &portal.result_column_format).await?;
        responses
            .pop()
            .ok_or_else(|| PgWireError::ApiError("statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &PgPortal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(with_format(
            result_schema(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Param(usize, &'a str),
}

/// Split SQL into literal text and `$N` placeholders in one left-to-right
/// pass. A `$` inside single-quoted strings or double-quoted identifiers is
/// text, not a placeholder.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let end = i + 1 + bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                match sql[i + 1..end].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                        pieces.push(Piece::Param(n, &sql[i..end]));
                        text_start = end;
                        i = end;
                    }
                    _ => i += 1,
                }
            }
            None => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n, _) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Replace each placeholder with its bound value as a quoted literal (text
/// format). Values are inserted once, so their contents are never rescanned.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n, raw) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => out.push_str(raw),
            },
        }
    }
    out
}

fn substitute_params(portal: &PgPortal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotguardFactory {
    handler: Arc<SlotguardHandler>,
    noop: Arc<NoopHandler>,
}

impl SlotguardFactory {
    pub fn new(portal: Arc<Portal>) -> Self {
        Self {
            handler: Arc::new(SlotguardHandler::new(portal)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotguardFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    portal: Arc<Portal>,
    tls_acceptor: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls_acceptor, SlotguardFactory::new(portal)).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate_for_engine(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::ResourceUnavailable { .. } => "55000",
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyAssigned { .. } | EngineError::AlreadyExists(_) => "23505",
        EngineError::NotAssigned { .. } | EngineError::NotFound(_) => "P0002",
        EngineError::OverCapacity { .. } | EngineError::LimitExceeded(_) => "54000",
        EngineError::HasCommitments(_) => "23503",
        EngineError::WalError(_) => "58030",
    }
}

fn sqlstate_for_sql(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn { .. } => "42703",
        SqlError::InvalidValue { .. } => "22023",
        SqlError::Unsupported(_) => "0A000",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::WrongArity(..)
        | SqlError::MissingColumn { .. }
        | SqlError::MissingFilter(_) => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate_for_engine(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate_for_sql(&e).into(),
        e.to_string(),
    )))
}
