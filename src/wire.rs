use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{BatchResult, Engine, EngineError};
use crate::inventory::{InventoryError, InventoryManager};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ResultShape};

pub struct AssetdHandler {
    inventories: Arc<InventoryManager>,
    query_parser: Arc<AssetdQueryParser>,
}

impl AssetdHandler {
    pub fn new(inventories: Arc<InventoryManager>) -> Self {
        Self {
            inventories,
            query_parser: Arc::new(AssetdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.inventories
            .get_or_create(&db)
            .map(|inventory| inventory.engine.clone())
            .map_err(inventory_err)
    }

    /// Execute with RED metrics.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUser { id, name, email } => {
                engine.register_user(id, name, email).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertAsset { id, tag, category, capacity } => {
                engine
                    .register_asset(id, tag, category, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::ResizeSeats { asset_id, total } => {
                engine.resize_seats(asset_id, total).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SetStatus { asset_id, hold } => {
                engine.set_hold(asset_id, hold).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::Allocate { asset_id, holder_id, remarks } => {
                engine
                    .allocate(asset_id, holder_id, remarks)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AllocateMany { asset_id, holder_ids, remarks } => {
                let result = engine
                    .allocate_many(asset_id, &holder_ids, remarks)
                    .await
                    .map_err(engine_err)?;
                batch_response(&result)
            }
            Command::RequestReturn { asset_id, holder_id, remarks } => {
                engine
                    .request_return(asset_id, holder_id, remarks)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::AcknowledgeReturn { asset_id, holder_id } => {
                engine
                    .acknowledge_return(asset_id, holder_id)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::CompleteReturn { asset_id, holder_id, remarks, mode } => {
                engine
                    .complete_return(asset_id, holder_id, remarks, mode)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::ReturnMany { asset_id, holder_ids, remarks, mode } => {
                let result = engine
                    .return_many(asset_id, &holder_ids, remarks, mode)
                    .await
                    .map_err(engine_err)?;
                batch_response(&result)
            }
            Command::SelectAssets => {
                let schema = Arc::new(assets_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_assets()
                    .await
                    .iter()
                    .map(|asset| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&asset.id.to_string())?;
                        encoder.encode_field(&asset.tag)?;
                        encoder.encode_field(&asset.category.as_str())?;
                        encoder.encode_field(&asset.capacity.is_shareable())?;
                        encoder.encode_field(&i64::from(asset.capacity.total()))?;
                        encoder.encode_field(&i64::from(asset.used_licenses))?;
                        encoder.encode_field(&asset.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectUsers => {
                let schema = Arc::new(users_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_users()
                    .iter()
                    .map(|user| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&user.id.to_string())?;
                        encoder.encode_field(&user.name)?;
                        encoder.encode_field(&user.email)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSeats { asset_id } => {
                let asset = engine.get_asset(asset_id).await.map_err(engine_err)?;
                let occ = engine.occupancy(asset_id).await.map_err(engine_err)?;
                let schema = Arc::new(seats_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&asset_id.to_string())?;
                encoder.encode_field(&asset.tag)?;
                encoder.encode_field(&i64::from(occ.total_licenses))?;
                encoder.encode_field(&i64::from(occ.used_licenses))?;
                encoder.encode_field(&i64::from(occ.available_seats()))?;
                encoder.encode_field(&occ.status.as_str())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectCurrentHolders { asset_id } => {
                let records = engine.current_holders(asset_id).await.map_err(engine_err)?;
                records_response(&records)
            }
            Command::SelectAllocations { asset_id } => {
                let records = engine.allocation_history(asset_id).await.map_err(engine_err)?;
                records_response(&records)
            }
            Command::SelectOverdueReturns => {
                let threshold = self.inventories.overdue_after_ms();
                let records = engine.overdue_returns(now_ms(), threshold).await;
                records_response(&records)
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn assets_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("asset_tag", Type::VARCHAR),
        field("category", Type::VARCHAR),
        field("shareable", Type::BOOL),
        field("total_licenses", Type::INT8),
        field("used_licenses", Type::INT8),
        field("status", Type::VARCHAR),
    ]
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
    ]
}

fn seats_schema() -> Vec<FieldInfo> {
    vec![
        field("asset_id", Type::VARCHAR),
        field("asset_tag", Type::VARCHAR),
        field("total_licenses", Type::INT8),
        field("used_licenses", Type::INT8),
        field("available_seats", Type::INT8),
        field("status", Type::VARCHAR),
    ]
}

fn records_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("asset_id", Type::VARCHAR),
        field("holder_id", Type::VARCHAR),
        field("allocated_at", Type::INT8),
        field("returned_at", Type::INT8),
        field("return_status", Type::VARCHAR),
        field("return_requested_at", Type::INT8),
        field("return_request_remarks", Type::VARCHAR),
        field("acknowledged_at", Type::INT8),
        field("remarks", Type::VARCHAR),
        field("return_remarks", Type::VARCHAR),
        field("forced", Type::BOOL),
    ]
}

fn batch_schema() -> Vec<FieldInfo> {
    vec![
        field("holder_id", Type::VARCHAR),
        field("allocation_id", Type::VARCHAR),
        field("error", Type::VARCHAR),
    ]
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::None => vec![],
        ResultShape::Assets => assets_schema(),
        ResultShape::Users => users_schema(),
        ResultShape::Seats => seats_schema(),
        ResultShape::Records => records_schema(),
        ResultShape::BatchOutcome => batch_schema(),
    }
}

fn encode_record(schema: &Arc<Vec<FieldInfo>>, r: &AllocationRecord) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.asset_id.to_string())?;
    encoder.encode_field(&r.holder_id.to_string())?;
    encoder.encode_field(&r.allocated_at)?;
    encoder.encode_field(&r.returned_at)?;
    encoder.encode_field(&r.return_status.as_str())?;
    encoder.encode_field(&r.return_requested_at)?;
    encoder.encode_field(&r.return_request_remarks)?;
    encoder.encode_field(&r.acknowledged_at)?;
    encoder.encode_field(&r.remarks)?;
    encoder.encode_field(&r.return_remarks)?;
    encoder.encode_field(&r.forced)?;
    Ok(encoder.take_row())
}

fn records_response(records: &[AllocationRecord]) -> PgWireResult<Response> {
    let schema = Arc::new(records_schema());
    let rows: Vec<PgWireResult<DataRow>> = records.iter().map(|r| encode_record(&schema, r)).collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// One row per holder: successes first, then failures with their error text.
fn batch_response(result: &BatchResult) -> PgWireResult<Response> {
    let schema = Arc::new(batch_schema());
    let mut rows: Vec<PgWireResult<DataRow>> = Vec::with_capacity(result.attempted());
    for record in &result.succeeded {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&record.holder_id.to_string())?;
        encoder.encode_field(&Some(record.id.to_string()))?;
        encoder.encode_field(&None::<String>)?;
        rows.push(Ok(encoder.take_row()));
    }
    for failure in &result.failed {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&failure.holder_id.to_string())?;
        encoder.encode_field(&None::<String>)?;
        encoder.encode_field(&Some(failure.error.to_string()))?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for AssetdHandler {
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
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AssetdQueryParser;

#[async_trait]
impl QueryParser for AssetdQueryParser {
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
        Ok(schema_for(sql::result_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AssetdHandler {
    type Statement = String;
    type QueryParser = AssetdQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
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
        let schema = schema_for(sql::result_shape(&target.statement));
        Ok(DescribeStatementResponse::new(param_types, schema))
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
        let schema = schema_for(sql::result_shape(&target.statement.statement));
        Ok(DescribePortalResponse::new(schema))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared password for every user and inventory.
#[derive(Debug)]
pub struct AssetdAuthSource {
    password: String,
}

impl AssetdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AssetdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AssetdFactory {
    handler: Arc<AssetdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AssetdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AssetdFactory {
    pub fn new(inventories: Arc<InventoryManager>, password: String) -> Self {
        let auth_source = AssetdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AssetdHandler::new(inventories)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AssetdFactory {
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
    inventories: Arc<InventoryManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(AssetdFactory::new(inventories, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

fn inventory_err(e: InventoryError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "08006".into(),
        format!("inventory error: {e}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM assets"), 0);
        assert_eq!(count_params("INSERT INTO allocations VALUES ($1, $2, $3)"), 3);
        assert_eq!(count_params("INSERT INTO allocations VALUES ($2, $1), ($2, $10)"), 10);
    }

    #[test]
    fn schemas_match_result_shapes() {
        assert_eq!(schema_for(ResultShape::None).len(), 0);
        assert_eq!(schema_for(ResultShape::Records).len(), 12);
        assert_eq!(schema_for(ResultShape::BatchOutcome).len(), 3);
    }
}
