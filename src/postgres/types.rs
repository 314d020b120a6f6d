use crate::cdc::{Row, Value};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row as PgRow;

/// Converts a driver row into a [`Row`], keeping column order.
pub fn convert_row(row: &PgRow) -> Result<Row> {
    let mut converted = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = convert_value(row, idx, column.name(), column.type_())?;
        converted.insert(column.name(), value);
    }
    Ok(converted)
}

/// Whether [`convert_row`] reads this type directly.
pub fn is_supported(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
            | Type::JSON
            | Type::JSONB
            | Type::UUID
            | Type::TIMESTAMPTZ
            | Type::TIMESTAMP
            | Type::DATE
            | Type::TIME
    )
}

/// Wraps `query` so every column of a type [`convert_row`] cannot read is
/// cast to text by the server, in its usual output form.
///
/// `columns` are the `(name, type)` pairs of the prepared query. Returns
/// `None` when every column is already readable.
pub fn text_projection(query: &str, columns: &[(&str, &Type)]) -> Option<String> {
    if columns.iter().all(|(_, ty)| is_supported(ty)) {
        return None;
    }

    // positional aliases keep duplicate column names apart
    let aliases: Vec<String> = (1..=columns.len()).map(|i| format!("c{}", i)).collect();
    let projection = columns
        .iter()
        .zip(&aliases)
        .map(|((name, ty), alias)| {
            if is_supported(ty) {
                format!("{} AS {}", alias, quote_ident(name))
            } else {
                format!("{}::text AS {}", alias, quote_ident(name))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let inner = query.trim().trim_end_matches(';').trim_end();

    Some(format!(
        "SELECT {} FROM ({}) AS pg_poller_rows({})",
        projection,
        inner,
        aliases.join(", ")
    ))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn convert_value(row: &PgRow, idx: usize, name: &str, ty: &Type) -> Result<Value> {
    let value: Value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.into(),
        Type::INT2 => get::<i16>(row, idx)?.map(i64::from).into(),
        Type::INT4 => get::<i32>(row, idx)?.map(i64::from).into(),
        Type::INT8 => get::<i64>(row, idx)?.into(),
        Type::OID => get::<u32>(row, idx)?.map(i64::from).into(),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(f64::from).into(),
        Type::FLOAT8 => get::<f64>(row, idx)?.into(),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.into()
        }
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?
            .map(|json| json.to_string())
            .into(),
        Type::UUID => get::<uuid::Uuid>(row, idx)?
            .map(|uuid| uuid.to_string())
            .into(),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.into(),
        // timestamp without time zone is taken as UTC
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?
            .map(|ts| ts.and_utc())
            .into(),
        Type::DATE => get::<NaiveDate>(row, idx)?
            .map(|d| d.format("%Y-%m-%d").to_string())
            .into(),
        Type::TIME => get::<NaiveTime>(row, idx)?
            .map(|t| t.format("%H:%M:%S%.f").to_string())
            .into(),
        _ => {
            return Err(Error::UnsupportedType {
                column: name.to_string(),
                type_name: ty.name().to_string(),
            })
        }
    };
    Ok(value)
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>> {
    Ok(row.try_get::<_, Option<T>>(idx)?)
}
