//! SQLite connection setup and bootstrap DDL.

use std::path::Path;

use log::debug;
use rusqlite::Connection;

use crate::{descriptor::DatasetDescriptor, error::LoadError, sink::quote_table_name};

pub const BOOKKEEPING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS periodos (
    id TEXT PRIMARY KEY,
    data_inicio DATE NOT NULL,
    data_fim DATE NOT NULL
);
CREATE TABLE IF NOT EXISTS unidades_geograficas (
    id TEXT PRIMARY KEY,
    id_sus TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS capturas_agendamentos (
    operacao_id TEXT NOT NULL,
    uf_sigla TEXT NOT NULL,
    unidade_geografica_id TEXT NOT NULL,
    periodo_id TEXT NOT NULL,
    periodo_data_inicio DATE NOT NULL,
    tabela_destino TEXT NOT NULL,
    parametros TEXT
);
CREATE TABLE IF NOT EXISTS capturas_historico (
    operacao_id TEXT NOT NULL,
    periodo_id TEXT NOT NULL,
    unidade_geografica_id TEXT NOT NULL,
    criacao_data TEXT NOT NULL,
    PRIMARY KEY (operacao_id, periodo_id, unidade_geografica_id)
);
"#;

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    debug!("Opened database {path:?}");
    Ok(conn)
}

pub fn bootstrap(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(BOOKKEEPING_DDL)
}

/// `CREATE TABLE` for a dataset's canonical schema; `id` is the primary key.
pub fn destination_ddl(descriptor: &DatasetDescriptor, destination: &str) -> Result<String, LoadError> {
    let table = quote_table_name(destination)?;
    let columns = descriptor
        .columns
        .iter()
        .map(|column| {
            let mut definition = format!("    \"{}\" {}", column.name, column.ty.sql_type());
            if column.name == crate::descriptor::ID_COLUMN {
                definition.push_str(" PRIMARY KEY");
            } else if !column.ty.is_nullable() {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect::<Vec<_>>()
        .join(",\n");
    Ok(format!("CREATE TABLE IF NOT EXISTS {table} (\n{columns}\n);"))
}

pub fn create_destination(
    conn: &Connection,
    descriptor: &DatasetDescriptor,
    destination: &str,
) -> crate::error::Result<()> {
    let ddl = destination_ddl(descriptor, destination)?;
    conn.execute_batch(&ddl)?;
    debug!("Ensured destination table {destination} for {}", descriptor.name);
    Ok(())
}

pub fn count_rows(conn: &Connection, destination: &str) -> crate::error::Result<i64> {
    let table = quote_table_name(destination)?;
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        bootstrap(&conn).unwrap();
        bootstrap(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'capturas_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn destination_ddl_follows_descriptor() {
        let descriptor = crate::catalog::Catalog::builtin()
            .unwrap()
            .get("sihsus_aih_rd")
            .unwrap();
        let ddl = destination_ddl(&descriptor, "aih_rd").unwrap();
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"aih_rd\""));
        assert!(ddl.contains("\"id\" TEXT PRIMARY KEY"));
        assert!(ddl.contains("\"uti_diarias\" INTEGER NOT NULL"));
        assert!(ddl.contains("\"obito\" BOOLEAN,"));

        let conn = Connection::open_in_memory().unwrap();
        create_destination(&conn, &descriptor, "aih_rd").unwrap();
        assert_eq!(count_rows(&conn, "aih_rd").unwrap(), 0);
    }
}
