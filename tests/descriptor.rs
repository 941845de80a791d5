mod common;

use common::{aih_rd, fixture_path, SAMPLE_FILE};
use datasus_etl::{
    catalog::Catalog,
    descriptor::{DatasetDescriptor, SemanticType, undocumented_placeholder},
    error::MappingError,
    io_utils::{read_header, resolve_encoding},
};

fn sample_header() -> Vec<String> {
    let encoding = resolve_encoding(Some("latin1")).expect("latin1");
    read_header(&fixture_path(SAMPLE_FILE), b',', encoding).expect("sample header")
}

#[test]
fn builtin_descriptor_covers_the_sample_extract() {
    let descriptor = aih_rd();
    let header = sample_header();
    assert_eq!(header.len(), 113);
    descriptor.validate(header.as_slice()).expect("every column mapped");
    descriptor.check_mandatory(header.as_slice()).expect("every core column present");
}

#[test]
fn optional_columns_may_be_absent_from_older_extracts() {
    let descriptor = aih_rd();
    let core = descriptor.mandatory_raw_columns().collect::<Vec<_>>();
    assert_eq!(core.len(), 66);
    descriptor.validate(core.as_slice()).expect("core columns mapped");
    descriptor.check_mandatory(core.as_slice()).expect("core columns present");
}

#[test]
fn missing_core_column_is_reported_by_name() {
    let descriptor = aih_rd();
    let header = sample_header()
        .into_iter()
        .filter(|h| h != "DIAG_PRINC")
        .collect::<Vec<_>>();
    let err = descriptor.check_mandatory(header.as_slice()).unwrap_err();
    assert_eq!(
        err,
        MappingError::MissingColumns {
            dataset: "sihsus_aih_rd".to_string(),
            columns: vec!["DIAG_PRINC".to_string()],
        }
    );
}

#[test]
fn undocumented_column_gets_a_placeholder_suggestion() {
    let descriptor = aih_rd();
    let mut header = sample_header();
    header.push("Val_Extra".to_string());
    let err = descriptor.validate(header.as_slice()).unwrap_err();
    let MappingError::UnmappedColumns { columns, .. } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(columns, vec!["VAL_EXTRA".to_string()]);
    assert_eq!(undocumented_placeholder(&columns[0]), "_nao_documentado_val_extra");
}

#[test]
fn declared_types_follow_the_warehouse_schema() {
    let descriptor = aih_rd();
    assert_eq!(descriptor.type_of("id"), Some(SemanticType::String));
    assert_eq!(descriptor.type_of("periodo_data_inicio"), Some(SemanticType::Date));
    assert_eq!(descriptor.type_of("criacao_data"), Some(SemanticType::Timestamp));
    assert_eq!(descriptor.type_of("valor_total"), Some(SemanticType::Decimal));
    assert_eq!(descriptor.type_of("usuario_idade"), Some(SemanticType::Integer));
    assert_eq!(descriptor.type_of("obito"), Some(SemanticType::Boolean));
    assert_eq!(descriptor.type_of("processamento_periodo_ano_inicio"), None);
}

#[test]
fn yaml_export_reloads_into_an_equal_descriptor() {
    let descriptor = aih_rd();
    let text = descriptor.to_yaml_string().expect("serialize");
    let reloaded = DatasetDescriptor::from_yaml_str(&text).expect("reload");
    assert_eq!(reloaded.mapping, descriptor.mapping);
    assert_eq!(reloaded.columns, descriptor.columns);
}

#[test]
fn catalog_refuses_a_second_descriptor_with_the_same_name() {
    let mut catalog = Catalog::builtin().expect("builtin");
    let text = aih_rd().to_yaml_string().expect("serialize");
    let err = catalog
        .register(DatasetDescriptor::from_yaml_str(&text).expect("reload"))
        .unwrap_err();
    assert!(matches!(err, MappingError::Duplicate { what: "dataset", .. }));
    assert!(catalog.get("sihsus_aih_sp").is_err());
}
