//! End-to-end scenarios over synthetic files: a BIFF8 workbook inside
//! a CFB container, an xlsx archive, and the probe chain itself.

mod common;

use std::io::Write;

use loquat::{Collection, Error, Registry, Source, ValueType};

fn write_temp(bytes: &[u8], suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    file
}

fn type_names(types: &[ValueType]) -> Vec<&'static str> {
    types.iter().map(|t| t.as_str()).collect()
}

#[test]
fn cfb_streams_yield_declared_sizes() {
    // one mini-FAT stream with a ragged tail, one FAT stream
    let small: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    let large: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let bytes = common::build_cfb(&[("Small", &small), ("Large", &large)]);

    let mut doc = loquat::cfb::Document::open(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(doc.list_streams(), vec!["Small", "Large"]);
    assert_eq!(doc.open_stream("Small").unwrap().into_inner(), small);
    assert_eq!(doc.open_stream("Large").unwrap().into_inner(), large);
}

fn basic_xls_bytes() -> Vec<u8> {
    let globals = vec![
        common::date1904(false),
        common::xf(0),
        common::sst(&["Hello"]),
    ];
    let sheet = vec![
        common::label_sst(0, 0, 0, 0),
        common::rk_int(0, 1, 0, 42),
        common::number(0, 2, 0, 3.14),
    ];
    let stream = common::build_workbook_stream(&globals, &[("Sheet1", sheet)]);
    common::build_cfb(&[("Workbook", &stream)])
}

#[test]
fn xls_basic_workbook() {
    let file = write_temp(&basic_xls_bytes(), ".xls");
    let mut source = loquat::open(file.path()).unwrap();
    assert_eq!(source.list(), vec!["Sheet1"]);

    let sheet = source.get("Sheet1").unwrap();
    assert!(!sheet.is_empty());
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["Hello", "42", "3.14"]);
    assert_eq!(
        type_names(&sheet.types()),
        vec!["string", "integer", "float"]
    );
    assert!(!sheet.next_row());
    assert!(sheet.err().is_none());
}

#[test]
fn xls_get_unknown_sheet() {
    let file = write_temp(&basic_xls_bytes(), ".xls");
    let mut source = loquat::open(file.path()).unwrap();
    match source.get("NoSuchSheet") {
        Err(Error::SheetNotFound(name)) => assert_eq!(name, "NoSuchSheet"),
        other => panic!("expected SheetNotFound, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn xls_merged_range_sentinels() {
    let globals = vec![common::xf(0), common::sst(&["value"])];
    let sheet = vec![
        common::label_sst(0, 0, 0, 0),
        common::merged_cells(&[(0, 1, 0, 2)]),
    ];
    let stream = common::build_workbook_stream(&globals, &[("Merged", sheet)]);
    let file = write_temp(&common::build_cfb(&[("Workbook", &stream)]), ".xls");

    let mut source = loquat::open(file.path()).unwrap();
    let sheet = source.get("Merged").unwrap();
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["value", "→", "⇥"]);
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["↓", "→", "⤓"]);
    assert!(!sheet.next_row());
}

#[test]
fn xls_multiple_sheets_and_bools() {
    let globals = vec![common::xf(0), common::sst(&["a", "b"])];
    let first = vec![common::label_sst(0, 0, 0, 0)];
    let second = vec![
        common::label_sst(0, 0, 0, 1),
        common::boolerr_bool(1, 0, 0, true),
    ];
    let stream =
        common::build_workbook_stream(&globals, &[("One", first), ("Two", second)]);
    let file = write_temp(&common::build_cfb(&[("Workbook", &stream)]), ".xls");

    let mut source = loquat::open(file.path()).unwrap();
    assert_eq!(source.list(), vec!["One", "Two"]);

    let two = source.get("Two").unwrap();
    assert!(two.next_row());
    assert_eq!(two.strings(), vec!["b"]);
    assert!(two.next_row());
    assert_eq!(two.strings(), vec!["true"]);
    assert_eq!(type_names(&two.types()), vec!["boolean"]);

    // a cached sheet iterates again from the top
    let one = source.get("One").unwrap();
    assert!(one.next_row());
    assert_eq!(one.strings(), vec!["a"]);
}

const PLAIN_STYLES: &str = r#"<?xml version="1.0"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14"/></cellXfs>
</styleSheet>"#;

#[test]
fn xlsx_date_cell_with_builtin_format() {
    let sheet_xml = r#"<?xml version="1.0"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData><row r="1"><c r="A1" s="1"><v>44197</v></c></row></sheetData>
</worksheet>"#;
    let bytes = common::build_xlsx(PLAIN_STYLES, None, sheet_xml);
    let file = write_temp(&bytes, ".xlsx");

    let mut source = loquat::open(file.path()).unwrap();
    assert_eq!(source.list(), vec!["Sheet1"]);
    let sheet = source.get("Sheet1").unwrap();
    assert!(sheet.next_row());
    assert_eq!(type_names(&sheet.types()), vec!["date"]);
    assert_eq!(sheet.strings(), vec!["1/1/2021"]);
    assert_eq!(sheet.formats(), vec!["m/d/yyyy"]);
}

#[test]
fn xlsx_shared_strings_and_merge() {
    let sst = r#"<?xml version="1.0"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1" uniqueCount="1">
<si><t>top left</t></si>
</sst>"#;
    let sheet_xml = r#"<?xml version="1.0"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="D1"><v>9</v></c></row>
</sheetData>
<mergeCells count="1"><mergeCell ref="A1:C2"/></mergeCells>
</worksheet>"#;
    let bytes = common::build_xlsx(PLAIN_STYLES, Some(sst), sheet_xml);
    let file = write_temp(&bytes, ".xlsx");

    let mut source = loquat::open(file.path()).unwrap();
    let sheet = source.get("Sheet1").unwrap();
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["top left", "→", "⇥", "9"]);
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["↓", "→", "⤓"]);
}

#[test]
fn probe_chain_rejects_corrupt_signature() {
    // flip the first magic byte: the CFB probe rejects, the zip probe
    // rejects, and binary bytes are not text either
    let mut bytes = basic_xls_bytes();
    bytes[0] ^= 0xFF;
    let file = write_temp(&bytes, ".xls");
    let err = loquat::open(file.path()).unwrap_err();
    assert!(matches!(err, Error::UnknownFormat));
}

#[test]
fn probing_is_deterministic() {
    let file = write_temp(&basic_xls_bytes(), ".xls");
    for _ in 0..2 {
        let mut source = loquat::open(file.path()).unwrap();
        assert_eq!(source.list(), vec!["Sheet1"]);
        source.close().unwrap();
    }
}

#[test]
fn registry_without_backends_knows_nothing() {
    let file = write_temp(&basic_xls_bytes(), ".xls");
    let registry = Registry::new();
    assert!(matches!(
        registry.open(file.path()),
        Err(Error::UnknownFormat)
    ));
}

#[test]
fn open_reader_buffers_the_stream() {
    let bytes = basic_xls_bytes();
    let mut source = loquat::open_reader(std::io::Cursor::new(bytes)).unwrap();
    let sheet = source.get("Sheet1").unwrap();
    assert!(sheet.next_row());
    assert_eq!(sheet.strings(), vec!["Hello", "42", "3.14"]);
}

#[test]
fn open_file_probes_through_handles() {
    let file = write_temp(&basic_xls_bytes(), ".xls");
    let handle = std::fs::File::open(file.path()).unwrap();
    let mut source = loquat::open_file(handle).unwrap();
    assert_eq!(source.list(), vec!["Sheet1"]);
}

#[test]
fn csv_blank_row_filtering_is_the_callers_business() {
    let file = write_temp(b"a,b\n,,\nc\n", ".csv");
    let mut source = loquat::open(file.path()).unwrap();
    let names = source.list();
    let rows = source.get(&names[0]).unwrap();

    let mut kept = Vec::new();
    while rows.next_row() {
        let strings = rows.strings();
        // skipBlanks lives in the caller, not the core
        if strings.iter().all(|s| s.is_empty()) {
            continue;
        }
        kept.push(strings);
    }
    assert_eq!(kept, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
}
