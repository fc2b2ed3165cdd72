// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 db-tunnel Contributors

// Tunnel verification
//
// Opens one short-lived MySQL connection through the forwarded local port
// and runs one query. Assumes the tunnel is already up; there is no retry
// loop and no polling. Only a timeout maps to `Ok(false)` -- authentication
// failures, a wrong schema, or a malformed query propagate as errors so the
// caller can tell a dead tunnel from a misconfigured database.

use std::time::Duration;

use sqlx::mysql::{MySqlColumn, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sink::StatusSink;

/// Query used when the caller does not supply one.
pub const DEFAULT_VERIFY_QUERY: &str = "SELECT 1;";

/// Default connect-and-query timeout.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for one verification attempt.
///
/// No host field: with the tunnel up, the database answers on the loopback
/// address at the forwarded port.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub db_port: u16,
    pub db_username: String,
    pub db_password: String,
    pub db_name: String,
    pub timeout: Duration,
    pub sql: String,
}

impl VerifyRequest {
    pub fn new(db_port: u16, db_username: &str, db_password: &str, db_name: &str) -> Self {
        Self {
            db_port,
            db_username: db_username.to_string(),
            db_password: db_password.to_string(),
            db_name: db_name.to_string(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
            sql: DEFAULT_VERIFY_QUERY.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = sql.to_string();
        self
    }
}

/// Run one query through the tunnel and report whether it succeeded.
///
/// Returns `Ok(false)` when the attempt exceeds the request timeout,
/// `Ok(true)` on success (writing the first result row, if any, to the sink
/// as a key-value mapping), and an error for every other database failure.
pub async fn verify_tunnel(request: &VerifyRequest, sink: &dyn StatusSink) -> Result<bool> {
    sink.line("Test SSH tunnel connection, a printed record means that it works:");
    sink.line("");

    let options = MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(request.db_port)
        .username(&request.db_username)
        .password(&request.db_password)
        .database(&request.db_name);

    let attempt = async {
        let mut conn = MySqlConnection::connect_with(&options).await?;
        let row = sqlx::query(&request.sql).fetch_optional(&mut conn).await?;
        conn.close().await?;
        Ok::<_, sqlx::Error>(row)
    };

    match tokio::time::timeout(request.timeout, attempt).await {
        Err(_elapsed) => {
            debug!(
                "Verification timed out after {:?} on port {}",
                request.timeout, request.db_port
            );
            Ok(false)
        }
        Ok(Err(e)) => Err(Error::Database(e)),
        Ok(Ok(row)) => {
            if let Some(row) = row {
                sink.line(&render_row(&row));
            }
            Ok(true)
        }
    }
}

/// Format a row as `{name: value, ...}`, mirroring how the first record is
/// presented to a human checking the tunnel.
fn render_row(row: &MySqlRow) -> String {
    let cells: Vec<String> = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{}: {}", col.name(), render_cell(row, i, col)))
        .collect();
    format!("{{{}}}", cells.join(", "))
}

/// Decode one cell as text. Tries the common scalar types in order and
/// falls back to the column's type name for anything exotic.
fn render_cell(row: &MySqlRow, index: usize, col: &MySqlColumn) -> String {
    if let Ok(raw) = row.try_get_raw(index) {
        if raw.is_null() {
            return "NULL".to_string();
        }
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return format!("{:?}", v);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return v.to_string();
    }
    format!("<{}>", col.type_info().name())
}
