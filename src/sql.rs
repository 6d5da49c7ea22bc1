use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        name: String,
        email: Option<String>,
    },
    InsertAsset {
        id: Ulid,
        tag: String,
        category: Category,
        capacity: Capacity,
    },
    ResizeSeats {
        asset_id: Ulid,
        total: u32,
    },
    /// `hold: None` lifts any hold (status 'AVAILABLE').
    SetStatus {
        asset_id: Ulid,
        hold: Option<AdminHold>,
    },
    Allocate {
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: Option<String>,
    },
    AllocateMany {
        asset_id: Ulid,
        holder_ids: Vec<Ulid>,
        remarks: Option<String>,
    },
    RequestReturn {
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: String,
    },
    AcknowledgeReturn {
        asset_id: Ulid,
        holder_id: Ulid,
    },
    CompleteReturn {
        asset_id: Ulid,
        holder_id: Ulid,
        remarks: Option<String>,
        mode: ReturnMode,
    },
    ReturnMany {
        asset_id: Ulid,
        holder_ids: Vec<Ulid>,
        remarks: Option<String>,
        mode: ReturnMode,
    },
    SelectAssets,
    SelectUsers,
    SelectSeats {
        asset_id: Ulid,
    },
    SelectCurrentHolders {
        asset_id: Ulid,
    },
    SelectAllocations {
        asset_id: Ulid,
    },
    SelectOverdueReturns,
}

/// Columns a statement answers with, known before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    None,
    Assets,
    Users,
    Seats,
    Records,
    /// One row per holder of a multi-row allocate/return.
    BatchOutcome,
}

impl Command {
    pub fn result_shape(&self) -> ResultShape {
        match self {
            Command::SelectAssets => ResultShape::Assets,
            Command::SelectUsers => ResultShape::Users,
            Command::SelectSeats { .. } => ResultShape::Seats,
            Command::SelectCurrentHolders { .. }
            | Command::SelectAllocations { .. }
            | Command::SelectOverdueReturns => ResultShape::Records,
            Command::AllocateMany { .. } | Command::ReturnMany { .. } => ResultShape::BatchOutcome,
            _ => ResultShape::None,
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Shape of the result for a statement that may still hold `$n` placeholders.
pub fn result_shape(sql: &str) -> ResultShape {
    match parse_statement(sql) {
        Ok(Statement::Query(query)) => match select_table(&query).as_deref() {
            Ok("assets") => ResultShape::Assets,
            Ok("users") => ResultShape::Users,
            Ok("seats") => ResultShape::Seats,
            Ok("current_holders" | "allocations" | "overdue_returns") => ResultShape::Records,
            _ => ResultShape::None,
        },
        Ok(Statement::Insert(insert)) => {
            let batchable = matches!(
                insert_table_name(&insert).as_deref(),
                Ok("allocations" | "returns" | "forced_returns")
            );
            let rows = extract_all_insert_rows(&insert).map(|r| r.len()).unwrap_or(0);
            if batchable && rows > 1 {
                ResultShape::BatchOutcome
            } else {
                ResultShape::None
            }
        }
        _ => ResultShape::None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let values = extract_insert_values(insert, "users", 2)?;
            Ok(Command::InsertUser {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                email: optional(&values, 2, parse_string_or_null)?,
            })
        }
        "assets" => {
            let values = extract_insert_values(insert, "assets", 3)?;
            let capacity = match optional(&values, 3, parse_u32_or_null)? {
                Some(total) => Capacity::SharedSeats { total },
                None => Capacity::SingleOwner,
            };
            let category = parse_string(&values[2])?;
            Ok(Command::InsertAsset {
                id: parse_ulid(&values[0])?,
                tag: parse_string(&values[1])?,
                category: category.parse().map_err(|e: ParseLabelError| SqlError::Parse(e.to_string()))?,
                capacity,
            })
        }
        "seats" => {
            let values = extract_insert_values(insert, "seats", 2)?;
            Ok(Command::ResizeSeats {
                asset_id: parse_ulid(&values[0])?,
                total: parse_u32(&values[1])?,
            })
        }
        "status_overrides" => {
            let values = extract_insert_values(insert, "status_overrides", 2)?;
            let status: AssetStatus = parse_string(&values[1])?
                .parse()
                .map_err(|e: ParseLabelError| SqlError::Parse(e.to_string()))?;
            let hold = match status {
                AssetStatus::Available => None,
                AssetStatus::Maintenance => Some(AdminHold::Maintenance),
                AssetStatus::Retired => Some(AdminHold::Retired),
                AssetStatus::Allocated => {
                    return Err(SqlError::Parse("ALLOCATED is derived from allocations and cannot be set".into()));
                }
            };
            Ok(Command::SetStatus { asset_id: parse_ulid(&values[0])?, hold })
        }
        "allocations" => {
            let (asset_id, holder_ids, remarks) = parse_holder_rows(insert, "allocations")?;
            Ok(match holder_ids.as_slice() {
                [holder_id] => Command::Allocate { asset_id, holder_id: *holder_id, remarks },
                _ => Command::AllocateMany { asset_id, holder_ids, remarks },
            })
        }
        "return_requests" => {
            let values = extract_insert_values(insert, "return_requests", 3)?;
            Ok(Command::RequestReturn {
                asset_id: parse_ulid(&values[0])?,
                holder_id: parse_ulid(&values[1])?,
                remarks: parse_string(&values[2])?,
            })
        }
        "return_acknowledgements" => {
            let values = extract_insert_values(insert, "return_acknowledgements", 2)?;
            Ok(Command::AcknowledgeReturn {
                asset_id: parse_ulid(&values[0])?,
                holder_id: parse_ulid(&values[1])?,
            })
        }
        "returns" | "forced_returns" => {
            let mode = if table == "forced_returns" { ReturnMode::Forced } else { ReturnMode::Standard };
            let label = if mode == ReturnMode::Forced { "forced_returns" } else { "returns" };
            let (asset_id, holder_ids, remarks) = parse_holder_rows(insert, label)?;
            Ok(match holder_ids.as_slice() {
                [holder_id] => Command::CompleteReturn { asset_id, holder_id: *holder_id, remarks, mode },
                _ => Command::ReturnMany { asset_id, holder_ids, remarks, mode },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(asset_id, holder_id, remarks?)` rows. Multi-row inserts must name one
/// asset and carry the same remarks throughout.
fn parse_holder_rows(
    insert: &ast::Insert,
    table: &'static str,
) -> Result<(Ulid, Vec<Ulid>, Option<String>), SqlError> {
    let rows = extract_all_insert_rows(insert)?;
    let mut asset_id = None;
    let mut remarks = None;
    let mut holder_ids = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() < 2 {
            return Err(SqlError::WrongArity(table, 2, row.len()));
        }
        let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let row_asset = parse_ulid(&row[0]).map_err(row_err)?;
        let row_remarks = optional(row, 2, parse_string_or_null).map_err(row_err)?;
        if i == 0 {
            asset_id = Some(row_asset);
            remarks = row_remarks;
        } else if asset_id != Some(row_asset) || remarks != row_remarks {
            return Err(SqlError::Parse(format!(
                "row {i}: multi-row {table} must share asset_id and remarks"
            )));
        }
        holder_ids.push(parse_ulid(&row[1]).map_err(row_err)?);
    }
    let asset_id = asset_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
    Ok((asset_id, holder_ids, remarks))
}

fn select_table(query: &ast::Query) -> Result<String, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    table_factor_name(&from.relation)
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table(query)?;
    let selection = match query.body.as_ref() {
        SetExpr::Select(s) => s.selection.as_ref(),
        _ => None,
    };

    match table.as_str() {
        "assets" => Ok(Command::SelectAssets),
        "users" => Ok(Command::SelectUsers),
        "overdue_returns" => Ok(Command::SelectOverdueReturns),
        "seats" => Ok(Command::SelectSeats { asset_id: extract_where_asset_id(selection)? }),
        "current_holders" => Ok(Command::SelectCurrentHolders {
            asset_id: extract_where_asset_id(selection)?,
        }),
        "allocations" => Ok(Command::SelectAllocations {
            asset_id: extract_where_asset_id(selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_where_asset_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut found = None;
    if let Some(expr) = selection {
        collect_asset_id(expr, &mut found)?;
    }
    found.ok_or(SqlError::MissingFilter("asset_id"))
}

fn collect_asset_id(expr: &Expr, found: &mut Option<Ulid>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_asset_id(left, found)?;
                collect_asset_id(right, found)?;
            }
            ast::BinaryOperator::Eq if expr_column_name(left).as_deref() == Some("asset_id") => {
                *found = Some(parse_ulid(right)?);
            }
            _ => {}
        }
    }
    Ok(())
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// First VALUES row, which must carry at least `min` columns.
fn extract_insert_values(
    insert: &ast::Insert,
    table: &'static str,
    min: usize,
) -> Result<Vec<Expr>, SqlError> {
    let mut rows = extract_all_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = rows.swap_remove(0);
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(values)
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
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

/// Parse column `idx` if present; a missing trailing column reads as NULL.
fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(idx).map_or(Ok(None), parse)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_u32(expr)?)),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_user() {
        let sql = format!("INSERT INTO users (id, name, email) VALUES ('{A}', 'Alice', 'alice@example.com')");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                id: ulid(A),
                name: "Alice".into(),
                email: Some("alice@example.com".into()),
            }
        );
    }

    #[test]
    fn parse_insert_user_without_email() {
        let sql = format!("INSERT INTO users (id, name) VALUES ('{A}', 'Bob')");
        match parse_sql(&sql).unwrap() {
            Command::InsertUser { email, .. } => assert_eq!(email, None),
            cmd => panic!("expected InsertUser, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_single_owner_asset() {
        let sql = format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{A}', 'LAPTOP-07', 'hardware', NULL)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAsset {
                id: ulid(A),
                tag: "LAPTOP-07".into(),
                category: Category::Hardware,
                capacity: Capacity::SingleOwner,
            }
        );
    }

    #[test]
    fn parse_insert_shared_asset() {
        let sql = format!(
            "INSERT INTO assets (id, asset_tag, category, total_licenses) VALUES ('{A}', 'OFFICE365', 'SOFTWARE', 25)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAsset { capacity, category, .. } => {
                assert_eq!(capacity, Capacity::SharedSeats { total: 25 });
                assert_eq!(category, Category::Software);
            }
            cmd => panic!("expected InsertAsset, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_asset_rejects_unknown_category() {
        let sql = format!("INSERT INTO assets VALUES ('{A}', 'X', 'furniture', NULL)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_resize_and_status() {
        let sql = format!("INSERT INTO seats (asset_id, total_licenses) VALUES ('{A}', 30)");
        assert_eq!(parse_sql(&sql).unwrap(), Command::ResizeSeats { asset_id: ulid(A), total: 30 });

        let sql = format!("INSERT INTO status_overrides (asset_id, status) VALUES ('{A}', 'maintenance')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetStatus { asset_id: ulid(A), hold: Some(AdminHold::Maintenance) }
        );

        let sql = format!("INSERT INTO status_overrides (asset_id, status) VALUES ('{A}', 'AVAILABLE')");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SetStatus { asset_id: ulid(A), hold: None });

        let sql = format!("INSERT INTO status_overrides (asset_id, status) VALUES ('{A}', 'ALLOCATED')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_single_allocation() {
        let sql = format!("INSERT INTO allocations (asset_id, holder_id, remarks) VALUES ('{A}', '{B}', 'onboarding')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Allocate {
                asset_id: ulid(A),
                holder_id: ulid(B),
                remarks: Some("onboarding".into()),
            }
        );
    }

    #[test]
    fn parse_multi_row_allocation_is_a_batch() {
        let sql = format!("INSERT INTO allocations (asset_id, holder_id) VALUES ('{A}', '{B}'), ('{A}', '{C}')");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(cmd.result_shape(), ResultShape::BatchOutcome);
        assert_eq!(
            cmd,
            Command::AllocateMany {
                asset_id: ulid(A),
                holder_ids: vec![ulid(B), ulid(C)],
                remarks: None,
            }
        );
    }

    #[test]
    fn multi_row_allocation_must_share_asset() {
        let sql = format!("INSERT INTO allocations (asset_id, holder_id) VALUES ('{A}', '{B}'), ('{C}', '{B}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_return_workflow_tables() {
        let sql = format!("INSERT INTO return_requests (asset_id, holder_id, remarks) VALUES ('{A}', '{B}', 'needs upgrade')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RequestReturn {
                asset_id: ulid(A),
                holder_id: ulid(B),
                remarks: "needs upgrade".into(),
            }
        );

        let sql = format!("INSERT INTO return_acknowledgements (asset_id, holder_id) VALUES ('{A}', '{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::AcknowledgeReturn { asset_id: ulid(A), holder_id: ulid(B) }
        );

        let sql = format!("INSERT INTO returns (asset_id, holder_id) VALUES ('{A}', '{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CompleteReturn {
                asset_id: ulid(A),
                holder_id: ulid(B),
                remarks: None,
                mode: ReturnMode::Standard,
            }
        );

        let sql = format!(
            "INSERT INTO forced_returns (asset_id, holder_id, remarks) VALUES ('{A}', '{B}', 'audit'), ('{A}', '{C}', 'audit')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ReturnMany {
                asset_id: ulid(A),
                holder_ids: vec![ulid(B), ulid(C)],
                remarks: Some("audit".into()),
                mode: ReturnMode::Forced,
            }
        );
    }

    #[test]
    fn return_request_needs_remarks() {
        let sql = format!("INSERT INTO return_requests (asset_id, holder_id) VALUES ('{A}', '{B}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("return_requests", 3, 2))));
    }

    #[test]
    fn parse_selects() {
        assert_eq!(parse_sql("SELECT * FROM assets").unwrap(), Command::SelectAssets);
        assert_eq!(parse_sql("SELECT * FROM users").unwrap(), Command::SelectUsers);
        assert_eq!(parse_sql("SELECT * FROM overdue_returns").unwrap(), Command::SelectOverdueReturns);

        let sql = format!("SELECT * FROM current_holders WHERE asset_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectCurrentHolders { asset_id: ulid(A) });

        let sql = format!("SELECT * FROM seats WHERE asset_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectSeats { asset_id: ulid(A) });

        let sql = format!("SELECT * FROM allocations WHERE 1 = 1 AND asset_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectAllocations { asset_id: ulid(A) });
    }

    #[test]
    fn select_requires_asset_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM current_holders"),
            Err(SqlError::MissingFilter("asset_id"))
        ));
    }

    #[test]
    fn result_shape_with_placeholders() {
        assert_eq!(result_shape("SELECT * FROM seats WHERE asset_id = $1"), ResultShape::Seats);
        assert_eq!(result_shape("SELECT * FROM allocations WHERE asset_id = $1"), ResultShape::Records);
        assert_eq!(
            result_shape("INSERT INTO allocations (asset_id, holder_id) VALUES ($1, $2), ($1, $3)"),
            ResultShape::BatchOutcome
        );
        assert_eq!(
            result_shape("INSERT INTO allocations (asset_id, holder_id) VALUES ($1, $2)"),
            ResultShape::None
        );
        assert_eq!(result_shape("not sql"), ResultShape::None);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn bad_ulid_is_a_parse_error() {
        let sql = "INSERT INTO return_acknowledgements VALUES ('nope', 'nope')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }
}
