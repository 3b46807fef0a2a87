use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Access, ParkdAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, FORBIDDEN_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct ParkdHandler {
    engine: Arc<Engine>,
    access: Arc<Access>,
    query_parser: Arc<ParkdQueryParser>,
}

impl ParkdHandler {
    pub fn new(engine: Arc<Engine>, access: Arc<Access>) -> Self {
        Self {
            engine,
            access,
            query_parser: Arc::new(ParkdQueryParser),
        }
    }

    /// The login name is the identity: look it up (registering it on first
    /// sight) and attach the configured role.
    async fn identity<C: ClientInfo>(&self, client: &C) -> PgWireResult<Identity> {
        let username = client.metadata().get("user").cloned().ok_or_else(|| {
            user_error("28000", "no user in startup parameters".to_string())
        })?;
        let user_id = self
            .engine
            .resolve_user(&username)
            .await
            .map_err(|e| user_error("28000", format!("cannot resolve user {username}: {e}")))?;
        Ok(Identity {
            user_id,
            role: self.access.role_for(&username),
        })
    }

    /// Parse, authorize and run one statement, recording RED metrics.
    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let caller = self.identity(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, caller: &Identity, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertLot { id, name, location, total_slots } => {
                require_admin(caller, "create lots")?;
                engine
                    .create_lot(id, name, location, total_slots)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateLot { id, patch } => {
                require_admin(caller, "update lots")?;
                engine.update_lot(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteLot { id } => {
                require_admin(caller, "delete lots")?;
                engine.delete_lot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSlot { id, lot_id, number } => {
                require_admin(caller, "create slots")?;
                engine.create_slot(id, lot_id, number).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateSlotStatus { id, status } => {
                require_admin(caller, "override slot status")?;
                engine.set_slot_status(id, status).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteSlot { id } => {
                require_admin(caller, "delete slots")?;
                engine.delete_slot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::Reserve { id, slot_id } => {
                engine.reserve(caller, id, slot_id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::CheckIn { id } => {
                engine.check_in(caller, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::CheckOut { id } => {
                engine.check_out(caller, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::Cancel { id } => {
                engine.cancel(caller, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectLots { id } => {
                let lots = match id {
                    Some(id) => vec![engine.get_lot(id).await.map_err(engine_err)?],
                    None => engine.list_lots().await,
                };
                query_response(lots_schema(), lots.iter().map(encode_lot))
            }
            Command::SelectSlots { id, lot_id } => {
                let mut slots = match id {
                    Some(id) => vec![engine.get_slot(id).await.map_err(engine_err)?],
                    None => engine.list_slots(lot_id).await.map_err(engine_err)?,
                };
                if let Some(lot_id) = lot_id {
                    slots.retain(|s| s.lot_id == lot_id);
                }
                query_response(slots_schema(), slots.iter().map(encode_slot))
            }
            Command::SelectBookings { id } => {
                let bookings = match id {
                    Some(id) => vec![engine.get_booking(caller, id).await.map_err(engine_err)?],
                    None => engine.list_bookings(caller).await,
                };
                query_response(bookings_schema(), bookings.iter().map(encode_booking))
            }
            Command::SelectStatistics => {
                require_admin(caller, "read statistics")?;
                let stats = engine.statistics().await;
                query_response(statistics_schema(), stats.per_lot.iter().map(encode_lot_statistics))
            }
            Command::SelectOccupancy => {
                require_admin(caller, "read statistics")?;
                let stats = engine.statistics().await;
                query_response(occupancy_schema(), std::iter::once(encode_occupancy(&stats.overall)))
            }
            Command::SelectUsers => {
                require_admin(caller, "list users")?;
                let users = engine.list_users();
                query_response(users_schema(), users.iter().map(encode_user))
            }
        }
    }
}

fn require_admin(caller: &Identity, action: &str) -> PgWireResult<()> {
    if caller.is_admin() {
        return Ok(());
    }
    metrics::counter!(FORBIDDEN_TOTAL).increment(1);
    tracing::warn!("user {} denied: {action} requires admin", caller.user_id);
    Err(user_error("42501", format!("permission denied: {action} requires admin")))
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn lots_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("location", Type::VARCHAR),
        field("total_slots", Type::INT8),
        field("available_slots", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("lot_id", Type::VARCHAR),
        field("slot_number", Type::INT8),
        field("status", Type::VARCHAR),
        field("last_updated", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_id", Type::VARCHAR),
        field("username", Type::VARCHAR),
        field("lot_id", Type::VARCHAR),
        field("lot_name", Type::VARCHAR),
        field("slot_id", Type::VARCHAR),
        field("slot_number", Type::INT8),
        field("status", Type::VARCHAR),
        field("checkin_time", Type::INT8),
        field("checkout_time", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn statistics_schema() -> Vec<FieldInfo> {
    vec![
        field("lot_id", Type::VARCHAR),
        field("lot_name", Type::VARCHAR),
        field("total_slots", Type::INT8),
        field("available", Type::INT8),
        field("occupied", Type::INT8),
        field("reserved", Type::INT8),
        field("occupancy_percentage", Type::VARCHAR),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        field("total_slots", Type::INT8),
        field("available", Type::INT8),
        field("occupied", Type::INT8),
        field("reserved", Type::INT8),
        field("occupancy_percentage", Type::VARCHAR),
    ]
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("username", Type::VARCHAR),
        field("registered_at", Type::INT8),
    ]
}

/// Result columns for a statement, by the table it selects from.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("lots") => lots_schema(),
        Some("slots") => slots_schema(),
        Some("bookings") => bookings_schema(),
        Some("statistics") => statistics_schema(),
        Some("occupancy") => occupancy_schema(),
        Some("users") => users_schema(),
        _ => vec![],
    }
}

/// Values of one row, in schema order.
enum Cell {
    Text(Option<String>),
    Int(Option<i64>),
}

fn query_response(
    schema: Vec<FieldInfo>,
    rows: impl Iterator<Item = Vec<Cell>>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = rows
        .map(|cells| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for cell in cells {
                match cell {
                    Cell::Text(v) => encoder.encode_field(&v)?,
                    Cell::Int(v) => encoder.encode_field(&v)?,
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn text(s: impl ToString) -> Cell {
    Cell::Text(Some(s.to_string()))
}

fn int(n: impl Into<i64>) -> Cell {
    Cell::Int(Some(n.into()))
}

fn encode_lot(lot: &LotInfo) -> Vec<Cell> {
    vec![
        text(lot.id),
        text(&lot.name),
        Cell::Text(lot.location.clone()),
        int(lot.total_slots),
        int(lot.available_slots),
        int(lot.created_at),
    ]
}

fn encode_slot(slot: &Slot) -> Vec<Cell> {
    vec![
        text(slot.id),
        text(slot.lot_id),
        int(slot.number),
        text(slot.status.as_str()),
        int(slot.last_updated),
    ]
}

fn encode_booking(view: &BookingView) -> Vec<Cell> {
    let b = &view.booking;
    vec![
        text(b.id),
        text(b.user_id),
        Cell::Text(view.username.clone()),
        text(b.lot_id),
        text(&view.lot_name),
        text(b.slot_id),
        Cell::Int(view.slot_number.map(i64::from)),
        text(b.status.as_str()),
        Cell::Int(b.checkin_time),
        Cell::Int(b.checkout_time),
        int(b.created_at),
    ]
}

fn encode_lot_statistics(s: &LotStatistics) -> Vec<Cell> {
    vec![
        text(s.lot_id),
        text(&s.lot_name),
        int(s.total_slots),
        int(s.available),
        int(s.occupied),
        int(s.reserved),
        text(&s.occupancy_percentage),
    ]
}

fn encode_occupancy(o: &OverallStatistics) -> Vec<Cell> {
    vec![
        count(o.total_slots),
        count(o.available),
        count(o.occupied),
        count(o.reserved),
        text(&o.occupancy_percentage),
    ]
}

fn encode_user(u: &User) -> Vec<Cell> {
    vec![text(u.id), text(&u.username), int(u.registered_at)]
}

fn count(n: u64) -> Cell {
    Cell::Int(Some(i64::try_from(n).unwrap_or(i64::MAX)))
}

#[async_trait]
impl SimpleQueryHandler for ParkdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkdQueryParser;

#[async_trait]
impl QueryParser for ParkdQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkdHandler {
    type Statement = String;
    type QueryParser = ParkdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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
            schema_for_sql(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Byte ranges and indexes of the `$N` placeholders outside quoted text.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // An escaped '' closes and reopens the literal at once.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if let Ok(n) = sql[start + 1..j].parse::<usize>() {
                    found.push((start, j, n));
                    i = j;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Replace each `$N` in `sql` with the N-th value as a quoted literal, in a
/// single pass over the original text. Values are never rescanned, so a
/// value containing `$1` stays literal. Unbound placeholders are left as is.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[last..start]);
        match param {
            Some(text) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        last = end;
    }
    out.push_str(&sql[last..]);
    out
}

/// Substitute bound parameter values (text format) into the statement.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ParkdFactory {
    handler: Arc<ParkdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ParkdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ParkdFactory {
    pub fn new(engine: Arc<Engine>, access: Arc<Access>) -> Self {
        let auth_source = ParkdAuthSource::new(access.password.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ParkdHandler::new(engine, access)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    access: Arc<Access>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = ParkdFactory::new(engine, access);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error("P0001", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM lots"), 0);
        assert_eq!(count_params("INSERT INTO bookings (id, slot_id) VALUES ($1, $2)"), 2);
        assert_eq!(count_params("UPDATE lots SET name = $2 WHERE id = $10"), 10);
        assert_eq!(count_params("SELECT '$' FROM lots"), 0);
    }

    #[test]
    fn bind_params_single_pass() {
        let sql = "INSERT INTO lots (id, name, location, total_slots) VALUES ($1, $2, $3, 2)";
        let params = vec![
            Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string()),
            Some("O'Hare".to_string()),
            Some("Bay $1".to_string()),
        ];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO lots (id, name, location, total_slots) \
             VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'O''Hare', 'Bay $1', 2)"
        );
    }

    #[test]
    fn bind_params_skips_quoted_text_and_handles_null() {
        let sql = "UPDATE lots SET name = '$1', location = $2 WHERE id = $1";
        let params = vec![Some("x".to_string()), None];
        assert_eq!(
            bind_params(sql, &params),
            "UPDATE lots SET name = '$1', location = NULL WHERE id = 'x'"
        );
        assert_eq!(bind_params("SELECT $10", &params), "SELECT $10");
    }

    #[test]
    fn schema_follows_selected_table() {
        assert_eq!(schema_for_sql("SELECT * FROM lots").len(), 6);
        assert_eq!(schema_for_sql("SELECT * FROM slots WHERE lot_id = $1").len(), 5);
        assert_eq!(schema_for_sql("SELECT * FROM bookings").len(), 11);
        assert_eq!(schema_for_sql("SELECT * FROM statistics").len(), 7);
        assert_eq!(schema_for_sql("SELECT * FROM occupancy").len(), 5);
        assert_eq!(schema_for_sql("SELECT * FROM users").len(), 3);
        assert!(schema_for_sql("DELETE FROM lots WHERE id = $1").is_empty());
    }

    #[test]
    fn encoders_match_schemas() {
        let lot = LotInfo {
            id: ulid::Ulid::new(),
            name: "North".into(),
            location: None,
            total_slots: 3,
            available_slots: 2,
            created_at: 0,
        };
        assert_eq!(encode_lot(&lot).len(), lots_schema().len());

        let view = BookingView {
            booking: Booking {
                id: ulid::Ulid::new(),
                user_id: ulid::Ulid::new(),
                lot_id: lot.id,
                slot_id: ulid::Ulid::new(),
                status: BookingStatus::Reserved,
                checkin_time: None,
                checkout_time: None,
                created_at: 0,
            },
            username: Some("alice".into()),
            lot_name: "North".into(),
            slot_number: Some(1),
        };
        assert_eq!(encode_booking(&view).len(), bookings_schema().len());

        let overall = OverallStatistics {
            total_slots: 10,
            available: 5,
            occupied: 3,
            reserved: 2,
            occupancy_percentage: "50.00".into(),
        };
        assert_eq!(encode_occupancy(&overall).len(), occupancy_schema().len());
    }

    #[test]
    fn forbidden_for_plain_users() {
        let user = Identity::user(ulid::Ulid::new());
        assert!(require_admin(&user, "list users").is_err());
        assert!(require_admin(&Identity::admin(ulid::Ulid::new()), "list users").is_ok());
    }
}
