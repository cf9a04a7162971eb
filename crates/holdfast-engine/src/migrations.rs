// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for the holdfast engine.
//!
//! Embedded migrations that can be run programmatically; products
//! embedding the engine call these to set up the schema.

use sqlx::migrate::MigrateError;

/// SQLite migrator with all engine migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call
/// multiple times; already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
