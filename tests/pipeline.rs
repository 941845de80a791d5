mod common;

use chrono::{NaiveDate, TimeZone};
use common::{DESTINATION, OPERATION_ID, TestWorkspace, aih_rd, row_count, sample_batch, schedule};
use datasus_etl::{
    data::{Value, brasilia},
    pipeline::{CaptureRequest, PipelineOptions, capture},
    resolve::Dimensions,
    schedule::{history_count, pending_entries},
    scheduler::{Operation, RunOptions, run},
    sink::{LoadStatus, load},
    transform::{TransformContext, transform},
};

fn operation(workspace: &TestWorkspace) -> Operation {
    Operation {
        id: OPERATION_ID.to_string(),
        descriptor: aih_rd(),
        source_root: workspace.path().display().to_string(),
    }
}

fn options() -> RunOptions {
    RunOptions {
        timestamp: Some(brasilia().with_ymd_and_hms(2021, 10, 1, 6, 0, 0).unwrap()),
        ..RunOptions::default()
    }
}

#[test]
fn scheduled_capture_loads_once() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    let operations = [operation(&workspace)];

    let first = run(&mut conn, &operations, &options()).expect("first run");
    assert!(first.is_success());
    assert_eq!(first.done.len(), 1);
    assert_eq!(first.rows_loaded(), 3);
    assert_eq!(row_count(&conn, DESTINATION), 3);
    assert_eq!(history_count(&conn, OPERATION_ID).unwrap(), 1);

    let second = run(&mut conn, &operations, &options()).expect("second run");
    assert!(second.done.is_empty());
    assert_eq!(row_count(&conn, DESTINATION), 3);
    assert_eq!(history_count(&conn, OPERATION_ID).unwrap(), 1);
}

#[test]
fn loaded_rows_carry_resolved_dimensions() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    run(&mut conn, &[operation(&workspace)], &options()).expect("run");

    let mut statement = conn
        .prepare(
            "SELECT unidade_geografica_id, periodo_id, periodo_data_inicio, obito, valor_total
               FROM aih_rd ORDER BY valor_total DESC",
        )
        .unwrap();
    let rows = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, NaiveDate>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].0, "geo-aracaju");
    assert_eq!(rows[0].1, "2021-08");
    assert_eq!(rows[0].2, NaiveDate::from_ymd_opt(2021, 8, 1).unwrap());
    assert!(!rows[0].3);
    assert!((rows[0].4 - 1234.56).abs() < 1e-9);
    assert!(rows.iter().any(|row| row.0 == "geo-aquidaba"));
}

#[test]
fn dry_run_rolls_everything_back() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    schedule(&conn, "2021-09", "2021-09-01", None);

    let summary = run(
        &mut conn,
        &[operation(&workspace)],
        &RunOptions {
            dry_run: true,
            ..options()
        },
    )
    .expect("dry run");
    assert!(summary.dry_run);
    assert_eq!(summary.done.len(), 1);
    assert_eq!(summary.rows_loaded(), 3);
    assert_eq!(row_count(&conn, DESTINATION), 0);
    assert_eq!(history_count(&conn, OPERATION_ID).unwrap(), 0);
    assert_eq!(pending_entries(&conn, OPERATION_ID).unwrap().len(), 2);
}

#[test]
fn failed_capture_stays_pending_and_the_run_continues() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    // No RDSE2107.csv exists, and July sorts before August.
    schedule(&conn, "2021", "2021-07-01", None);

    let summary = run(&mut conn, &[operation(&workspace)], &options()).expect("run");
    assert!(!summary.is_success());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].periodo_id, "2021");
    assert_eq!(summary.failed[0].kind, "extraction");
    assert_eq!(summary.done.len(), 1);
    assert_eq!(row_count(&conn, DESTINATION), 3);

    let pending = pending_entries(&conn, OPERATION_ID).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].periodo_id, "2021");
}

#[test]
fn scheduled_conditions_filter_raw_rows() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    conn.execute("DELETE FROM capturas_agendamentos", []).unwrap();
    schedule(
        &conn,
        "2021-08",
        "2021-08-01",
        Some(r#"{"condicoes": "MUNIC_MOV == 280020"}"#),
    );

    let summary = run(&mut conn, &[operation(&workspace)], &options()).expect("run");
    assert_eq!(summary.rows_loaded(), 1);
    let geography: String = conn
        .query_row("SELECT unidade_geografica_id FROM aih_rd", [], |row| row.get(0))
        .unwrap();
    assert_eq!(geography, "geo-aquidaba");
}

#[test]
fn row_limit_stops_after_the_batch_that_crosses_it() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    let dimensions = Dimensions::load(&conn).unwrap();
    let context = TransformContext::new(&dimensions, &dimensions);
    let descriptor = aih_rd();
    let request = CaptureRequest::new(
        "se",
        NaiveDate::from_ymd_opt(2021, 8, 1).unwrap(),
        DESTINATION,
        workspace.path().display().to_string(),
    );

    let mut tx = conn.transaction().unwrap();
    let report = capture(
        &mut tx,
        &descriptor,
        &request,
        &context,
        PipelineOptions {
            batch_size: 1,
            row_limit: Some(1),
        },
    )
    .expect("capture");
    tx.rollback().unwrap();

    assert!(report.truncated);
    assert_eq!(report.batches, 2);
    assert_eq!(report.rows_loaded, 2);
}

#[test]
fn failing_batch_leaves_no_rows_behind() {
    let workspace = TestWorkspace::new();
    let mut conn = workspace.seeded_database();
    let dimensions = Dimensions::load(&conn).unwrap();
    let context = TransformContext::new(&dimensions, &dimensions);
    let mut batch = transform(&aih_rd(), &sample_batch(), &context).expect("transform");
    let id = batch.column_index("id").unwrap();
    batch.rows[2][id] = batch.rows[0][id].clone();
    assert!(matches!(batch.rows[2][id], Some(Value::String(_))));

    let mut tx = conn.transaction().unwrap();
    let status = load(&mut tx, DESTINATION, &batch);
    assert!(matches!(status, LoadStatus::Failed { .. }));
    assert_eq!(status.code(), 1);
    tx.commit().unwrap();
    assert_eq!(row_count(&conn, DESTINATION), 0);
}

#[test]
fn malformed_parameters_fail_only_their_entry() {
    let workspace = TestWorkspace::new();
    workspace.stage_sample();
    let mut conn = workspace.seeded_database();
    schedule(&conn, "2021-09", "2021-09-01", Some("not json"));

    let summary = run(&mut conn, &[operation(&workspace)], &options()).expect("run");
    assert_eq!(summary.done.len(), 1);
    assert_eq!(summary.done[0].periodo_id, "2021-08");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].periodo_id, "2021-09");
    assert_eq!(summary.failed[0].kind, "config");
    assert!(summary.failed[0].message.contains("parametros"));
    assert_eq!(row_count(&conn, DESTINATION), 3);

    let pending = pending_entries(&conn, OPERATION_ID).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].periodo_id, "2021-09");
}

#[test]
fn header_only_extract_missing_a_core_column_is_rejected() {
    let workspace = TestWorkspace::new();
    let sample = std::fs::read(common::fixture_path(common::SAMPLE_FILE)).unwrap();
    let header = sample.split(|b| *b == b'\n').next().unwrap();
    let trimmed = String::from_utf8_lossy(header)
        .trim_end()
        .split(',')
        .filter(|column| *column != "DIAG_PRINC")
        .collect::<Vec<_>>()
        .join(",");
    workspace.write(common::SOURCE_FILE, format!("{trimmed}\n").as_bytes());
    let mut conn = workspace.seeded_database();

    let summary = run(&mut conn, &[operation(&workspace)], &options()).expect("run");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].kind, "mapping");
    assert!(summary.failed[0].message.contains("DIAG_PRINC"));
    assert_eq!(history_count(&conn, OPERATION_ID).unwrap(), 0);
}
