#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use datasus_etl::{
    catalog::Catalog,
    descriptor::DatasetDescriptor,
    extract::{RawBatch, SourceLocator, extract},
    store,
};
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

pub const OPERATION_ID: &str = "69bb7a34-05a8-4d9d-bc7e-c4e9e9722ece";
pub const DESTINATION: &str = "aih_rd";
pub const SAMPLE_FILE: &str = "RDSE2108_sample.csv";
/// File name the AIH-RD descriptor renders for SE, August 2021.
pub const SOURCE_FILE: &str = "RDSE2108.csv";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn aih_rd() -> std::sync::Arc<DatasetDescriptor> {
    Catalog::builtin()
        .expect("built-in catalog")
        .get("sihsus_aih_rd")
        .expect("aih-rd descriptor")
}

/// The whole sample fixture as one batch.
pub fn sample_batch() -> RawBatch {
    let descriptor = aih_rd();
    let locator = SourceLocator::File(fixture_path(SAMPLE_FILE));
    extract(&locator, &descriptor.source, 1_000)
        .expect("open sample")
        .next()
        .expect("one batch")
        .expect("decode sample")
}

/// Scratch directory holding a source root and a SQLite database.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.path().join("warehouse.sqlite")
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, contents).expect("write temp file");
        path
    }

    /// Places the sample fixture where the descriptor template expects it.
    pub fn stage_sample(&self) -> PathBuf {
        let contents = fs::read(fixture_path(SAMPLE_FILE)).expect("read sample fixture");
        self.write(SOURCE_FILE, &contents)
    }

    /// Bootstrapped database with dimensions, the destination table and one
    /// pending AIH-RD capture for SE, August 2021.
    pub fn seeded_database(&self) -> Connection {
        let conn = store::open(&self.database_path()).expect("open database");
        seed(&conn);
        conn
    }
}

pub fn seed(conn: &Connection) {
    store::bootstrap(conn).expect("bootstrap");
    conn.execute_batch(
        r#"INSERT INTO periodos VALUES
               ('2021-08', '2021-08-01', '2021-08-31'),
               ('2021-09', '2021-09-01', '2021-09-30'),
               ('2021', '2021-01-01', '2021-12-31');
           INSERT INTO unidades_geograficas VALUES
               ('geo-se', '28'),
               ('geo-aracaju', '280030'),
               ('geo-aquidaba', '280020');"#,
    )
    .expect("seed dimensions");
    schedule(conn, "2021-08", "2021-08-01", None);
    store::create_destination(conn, &aih_rd(), DESTINATION).expect("create destination");
}

pub fn schedule(conn: &Connection, periodo_id: &str, start: &str, parametros: Option<&str>) {
    conn.execute(
        "INSERT INTO capturas_agendamentos VALUES (?1, 'SE', 'geo-se', ?2, ?3, ?4, ?5)",
        rusqlite::params![OPERATION_ID, periodo_id, start, DESTINATION, parametros],
    )
    .expect("schedule capture");
}

pub fn row_count(conn: &Connection, table: &str) -> i64 {
    store::count_rows(conn, table).expect("count rows")
}

/// Header plus `rows` copies of the fixture's first row, with `munic_mov`
/// written into the MUNIC_MOV column.
pub fn repeated_rows(rows: usize, munic_mov: &str) -> String {
    let sample = fs::read(fixture_path(SAMPLE_FILE)).expect("read sample fixture");
    let text = encoding_rs::WINDOWS_1252.decode(&sample).0.into_owned();
    let mut lines = text.lines();
    let header = lines.next().expect("header").to_string();
    let first = lines.next().expect("first row");
    let position = header
        .split(',')
        .position(|h| h == "MUNIC_MOV")
        .expect("MUNIC_MOV column");
    let row = first
        .split(',')
        .enumerate()
        .map(|(i, cell)| if i == position { munic_mov } else { cell })
        .collect::<Vec<_>>()
        .join(",");
    let mut out = header;
    out.push('\n');
    for _ in 0..rows {
        out.push_str(&row);
        out.push('\n');
    }
    out
}
