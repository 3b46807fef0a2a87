use std::collections::HashMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLot {
        id: Ulid,
        name: String,
        location: Option<String>,
        total_slots: u32,
    },
    UpdateLot {
        id: Ulid,
        patch: LotPatch,
    },
    DeleteLot {
        id: Ulid,
    },
    InsertSlot {
        id: Ulid,
        lot_id: Ulid,
        number: u32,
    },
    UpdateSlotStatus {
        id: Ulid,
        status: SlotStatus,
    },
    DeleteSlot {
        id: Ulid,
    },
    Reserve {
        id: Ulid,
        slot_id: Ulid,
    },
    CheckIn {
        id: Ulid,
    },
    CheckOut {
        id: Ulid,
    },
    Cancel {
        id: Ulid,
    },
    SelectLots {
        id: Option<Ulid>,
    },
    SelectSlots {
        id: Option<Ulid>,
        lot_id: Option<Ulid>,
    },
    SelectBookings {
        id: Option<Ulid>,
    },
    SelectStatistics,
    SelectOccupancy,
    SelectUsers,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported(format!("{} statements in one query", stmts.len())));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            let table = table_factor_name(&table.relation)?;
            parse_update(&table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, without interpreting its filters. Used to
/// describe result columns for statements that still carry `$n` parameters.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        _ => None,
    }
}

const LOT_COLUMNS: &[&str] = &["id", "name", "location", "total_slots"];
const SLOT_COLUMNS: &[&str] = &["id", "lot_id", "slot_number"];
const BOOKING_COLUMNS: &[&str] = &["id", "slot_id"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "lots" => {
            let row = insert_row(insert, "lots", LOT_COLUMNS)?;
            Ok(Command::InsertLot {
                id: parse_ulid(required(&row, "id")?)?,
                name: parse_string(required(&row, "name")?)?,
                location: match row.get("location") {
                    Some(expr) => parse_string_or_null(expr)?,
                    None => None,
                },
                total_slots: parse_u32(required(&row, "total_slots")?)?,
            })
        }
        "slots" => {
            let row = insert_row(insert, "slots", SLOT_COLUMNS)?;
            Ok(Command::InsertSlot {
                id: parse_ulid(required(&row, "id")?)?,
                lot_id: parse_ulid(required(&row, "lot_id")?)?,
                number: parse_u32(required(&row, "slot_number")?)?,
            })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            Ok(Command::Reserve {
                id: parse_ulid(required(&row, "id")?)?,
                slot_id: parse_ulid(required(&row, "slot_id")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &str,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let id = extract_where_id(selection)?;
    let mut set = HashMap::new();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.insert(column, &assignment.value);
    }

    match table {
        "lots" => {
            let mut patch = LotPatch::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => patch.name = Some(parse_string(value)?),
                    "location" => patch.location = Some(parse_string_or_null(value)?),
                    _ => return Err(SqlError::Unsupported(format!("cannot update lots.{column}"))),
                }
            }
            Ok(Command::UpdateLot { id, patch })
        }
        "slots" => {
            let status = only_status(set, "slots")?;
            let status = SlotStatus::parse(&status).ok_or(SqlError::BadStatus(status))?;
            Ok(Command::UpdateSlotStatus { id, status })
        }
        "bookings" => {
            let status = only_status(set, "bookings")?;
            match BookingStatus::parse(&status) {
                Some(BookingStatus::Occupied) => Ok(Command::CheckIn { id }),
                Some(BookingStatus::Completed) => Ok(Command::CheckOut { id }),
                Some(BookingStatus::Cancelled) => Ok(Command::Cancel { id }),
                // Bookings are only ever created RESERVED.
                Some(BookingStatus::Reserved) | None => Err(SqlError::BadStatus(status)),
            }
        }
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

/// `UPDATE <table> SET status = '...'` and nothing else.
fn only_status(set: HashMap<String, &Expr>, table: &'static str) -> Result<String, SqlError> {
    if let Some(column) = set.keys().find(|c| c.as_str() != "status") {
        return Err(SqlError::Unsupported(format!("cannot update {table}.{column}")));
    }
    let value = set.get("status").ok_or(SqlError::MissingColumn("status"))?;
    parse_string(value)
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "lots" => Ok(Command::DeleteLot { id }),
        "slots" => Ok(Command::DeleteSlot { id }),
        // Bookings end through UPDATE ... SET status, never by deletion.
        "bookings" => Err(SqlError::Unsupported("DELETE FROM bookings".into())),
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

    let mut filters = HashMap::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    let mut filter = |column: &str| -> Result<Option<Ulid>, SqlError> {
        filters.remove(column).map(parse_ulid).transpose()
    };

    let cmd = match table.as_str() {
        "lots" => Command::SelectLots { id: filter("id")? },
        "slots" => Command::SelectSlots {
            id: filter("id")?,
            lot_id: filter("lot_id")?,
        },
        "bookings" => Command::SelectBookings { id: filter("id")? },
        "statistics" => Command::SelectStatistics,
        "occupancy" => Command::SelectOccupancy,
        "users" => Command::SelectUsers,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    if let Some(column) = filters.keys().next() {
        return Err(SqlError::Unsupported(format!("filter on {table}.{column}")));
    }
    Ok(cmd)
}

/// Collect `column = value` terms joined by AND.
fn extract_eq_filters<'a>(expr: &'a Expr, out: &mut HashMap<String, &'a Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            extract_eq_filters(left, out)?;
            extract_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.insert(column, right.as_ref());
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, out),
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
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

/// The single VALUES row keyed by column name. Without a column list the
/// values are taken in `default_columns` order.
fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<HashMap<String, Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns.iter().take(values.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    if let Some(unknown) = columns.iter().find(|c| !default_columns.contains(&c.as_str())) {
        return Err(SqlError::Unsupported(format!("column {table}.{unknown}")));
    }
    Ok(columns.into_iter().zip(values.iter().cloned()).collect())
}

fn required<'a>(row: &'a HashMap<String, Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    row.get(column).ok_or(SqlError::MissingColumn(column))
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadStatus(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadStatus(s) => write!(f, "bad status: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    #[test]
    fn parse_insert_lot() {
        let sql = format!("INSERT INTO lots (id, name, location, total_slots) VALUES ('{ID}', 'North', 'Gate B', 40)");
        match parse_sql(&sql).unwrap() {
            Command::InsertLot { id, name, location, total_slots } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "North");
                assert_eq!(location.as_deref(), Some("Gate B"));
                assert_eq!(total_slots, 40);
            }
            cmd => panic!("expected InsertLot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_lot_columns_in_any_order() {
        let sql = format!("INSERT INTO lots (total_slots, id, name) VALUES (3, '{ID}', 'Small')");
        match parse_sql(&sql).unwrap() {
            Command::InsertLot { name, location, total_slots, .. } => {
                assert_eq!(name, "Small");
                assert_eq!(location, None);
                assert_eq!(total_slots, 3);
            }
            cmd => panic!("expected InsertLot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_lot_positional_with_null_location() {
        let sql = format!("INSERT INTO lots VALUES ('{ID}', 'North', NULL, 5)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertLot { location: None, total_slots: 5, .. }
        ));
    }

    #[test]
    fn parse_insert_lot_missing_total() {
        let sql = format!("INSERT INTO lots (id, name) VALUES ('{ID}', 'North')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("total_slots"))));
    }

    #[test]
    fn parse_insert_arity_mismatch() {
        let sql = format!("INSERT INTO slots (id, lot_id, slot_number) VALUES ('{ID}', '{OTHER}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("slots", 3, 2))));
    }

    #[test]
    fn parse_insert_negative_total_rejected() {
        let sql = format!("INSERT INTO lots (id, name, total_slots) VALUES ('{ID}', 'North', -1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_slot() {
        let sql = format!("INSERT INTO slots (id, lot_id, slot_number) VALUES ('{ID}', '{OTHER}', 12)");
        match parse_sql(&sql).unwrap() {
            Command::InsertSlot { id, lot_id, number } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(lot_id.to_string(), OTHER);
                assert_eq!(number, 12);
            }
            cmd => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_reserves() {
        let sql = format!("INSERT INTO bookings (id, slot_id) VALUES ('{ID}', '{OTHER}')");
        match parse_sql(&sql).unwrap() {
            Command::Reserve { id, slot_id } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(slot_id.to_string(), OTHER);
            }
            cmd => panic!("expected Reserve, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = format!("INSERT INTO bookings (id, slot_id) VALUES ('{ID}', '{OTHER}'), ('{OTHER}', '{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_lot() {
        let sql = format!("UPDATE lots SET name = 'South', location = NULL WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateLot { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.name.as_deref(), Some("South"));
                assert_eq!(patch.location, Some(None));
            }
            cmd => panic!("expected UpdateLot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_lot_total_is_fixed() {
        let sql = format!("UPDATE lots SET total_slots = 9 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_slot_status() {
        let sql = format!("UPDATE slots SET status = 'occupied' WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::UpdateSlotStatus { status: SlotStatus::Occupied, .. }
        ));
        let sql = format!("UPDATE slots SET status = 'BROKEN' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadStatus(_))));
    }

    #[test]
    fn parse_update_booking_transitions() {
        let cases = [
            ("OCCUPIED", "check_in"),
            ("COMPLETED", "check_out"),
            ("CANCELLED", "cancel"),
        ];
        for (status, expected) in cases {
            let sql = format!("UPDATE bookings SET status = '{status}' WHERE id = '{ID}'");
            let got = match parse_sql(&sql).unwrap() {
                Command::CheckIn { .. } => "check_in",
                Command::CheckOut { .. } => "check_out",
                Command::Cancel { .. } => "cancel",
                cmd => panic!("unexpected {cmd:?}"),
            };
            assert_eq!(got, expected);
        }
        let sql = format!("UPDATE bookings SET status = 'RESERVED' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadStatus(_))));
    }

    #[test]
    fn parse_update_requires_id() {
        assert!(matches!(
            parse_sql("UPDATE slots SET status = 'AVAILABLE'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_delete_lot_and_slot() {
        let sql = format!("DELETE FROM lots WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteLot { .. }));
        let sql = format!("DELETE FROM slots WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteSlot { .. }));
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_selects() {
        assert_eq!(parse_sql("SELECT * FROM lots").unwrap(), Command::SelectLots { id: None });
        assert_eq!(parse_sql("SELECT * FROM statistics").unwrap(), Command::SelectStatistics);
        assert_eq!(parse_sql("SELECT * FROM occupancy").unwrap(), Command::SelectOccupancy);
        assert_eq!(parse_sql("select * from USERS").unwrap(), Command::SelectUsers);

        let sql = format!("SELECT * FROM slots WHERE lot_id = '{OTHER}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectSlots { id, lot_id } => {
                assert_eq!(id, None);
                assert_eq!(lot_id.map(|l| l.to_string()).as_deref(), Some(OTHER));
            }
            cmd => panic!("expected SelectSlots, got {cmd:?}"),
        }

        let sql = format!("SELECT * FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectBookings { id: Some(_) }));
    }

    #[test]
    fn parse_select_unknown_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM lots WHERE name = 'North'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM slots WHERE slot_number > 3"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql("SELECT * FROM payments"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_listen_unsupported() {
        assert!(parse_sql("LISTEN lot_updates").is_err());
    }

    #[test]
    fn parse_bad_ulid() {
        let sql = "DELETE FROM lots WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn select_table_with_placeholders() {
        assert_eq!(select_table("SELECT * FROM slots WHERE lot_id = $1").as_deref(), Some("slots"));
        assert_eq!(select_table("SELECT * FROM Statistics").as_deref(), Some("statistics"));
        assert_eq!(select_table("UPDATE bookings SET status = $1 WHERE id = $2"), None);
        assert_eq!(select_table("not sql"), None);
    }

    #[test]
    fn parse_multiple_statements_rejected() {
        let sql = format!("DELETE FROM slots WHERE id = '{ID}'; DELETE FROM lots WHERE id = '{OTHER}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
