use mmt_attendance::attendance::{AttendanceCode, AttendanceRecord};
use mmt_attendance::generator::{generate, GenerationContext, SignatureOptions};
use mmt_attendance::{extractor, layout, template, Participant, TargetMonth};

fn participant() -> Participant {
    Participant {
        id: "p1".into(),
        first_name: "Jean".into(),
        last_name: "Dupont".into(),
        interruption_mmt: true,
        interruption_date: Some("2025-06-20".into()),
        ..Default::default()
    }
}

fn record(date: &str, am: AttendanceCode, pm: AttendanceCode, comment: &str) -> AttendanceRecord {
    AttendanceRecord::new("c1", date, "p1", am, pm, comment)
}

/// A form already carrying the fields the generator does not write.
fn uploaded_form() -> Vec<u8> {
    template::blank_form_with(&[
        ("1.2", "Dupont"),
        ("1.3", "Jean"),
        ("1.68", "MARKET0625"),
        ("1.49", "01.06.2025"),
        ("1.48", "31.12.2025"),
        ("1.46", "80%"),
        ("Textfeld 61", "756.1234.5678.97"),
    ])
    .unwrap()
}

#[test]
fn generated_form_reads_back() {
    let template = uploaded_form();
    let person = participant();
    let records = vec![
        record("2025-06-02", AttendanceCode::X, AttendanceCode::X, ""),
        record("2025-06-03", AttendanceCode::G, AttendanceCode::G, "mariage"),
        record("2025-06-10", AttendanceCode::B, AttendanceCode::X, "décès"),
    ];
    let month = TargetMonth::new(2025, 6).unwrap();
    let signature = SignatureOptions { date: Some("30.06.2025".into()), is_correction: true, image: None };

    let ctx = GenerationContext::new(&person, &records, &template, month)
        .with_signature(signature)
        .with_flatten(false);
    let generated = generate(&ctx).unwrap();
    assert!(generated.warnings.is_empty(), "{:?}", generated.warnings);

    let parsed = extractor::parse(&generated.bytes, "export.pdf").unwrap();
    assert_eq!(parsed.last_name, "Dupont");
    assert_eq!(parsed.first_name, "Jean");
    assert_eq!(parsed.course_type, "MARKET0625");
    assert_eq!(parsed.date_start, "2025-06-01");
    assert_eq!(parsed.date_end, "2025-12-31");
    assert_eq!(parsed.work_percent, 80);
    assert_eq!(parsed.avs_number, "756.1234.5678.97");
    assert_eq!(parsed.month_year, "062025");
    assert_eq!(parsed.signature_date, "30062025");
    assert_eq!(parsed.signature_place, layout::DEFAULT_LOCATION);
    assert!(parsed.is_correction);
    assert!(parsed.was_interrupted);
    assert_eq!(parsed.interruption_date, "2025-06-20");
    assert_eq!(parsed.comments, "03.06 \"mariage\" / 10.06 \"décès\"");

    let days: Vec<u32> = parsed.attendance_by_day.keys().copied().collect();
    assert_eq!(days, vec![2, 3, 10]);
    assert_eq!(parsed.attendance_by_day[&3].am, "G");
    assert_eq!(parsed.attendance_by_day[&10].am, "B");
    assert_eq!(parsed.attendance_by_day[&10].pm, "X");

    let back = Participant::from_parsed(&parsed);
    assert!(back.same_person(&person.first_name, &person.last_name));
    assert_eq!(back.interruption_mmt, person.interruption_mmt);
    assert_eq!(back.interruption_date, person.interruption_date);
}

#[test]
fn february_leaves_last_three_days_blank() {
    let template = uploaded_form();
    let person = Participant { interruption_mmt: false, ..participant() };
    let records: Vec<AttendanceRecord> = (1..=28)
        .map(|day| record(&format!("2025-02-{day:02}"), AttendanceCode::X, AttendanceCode::O, ""))
        .collect();
    let month = TargetMonth::new(2025, 2).unwrap();

    let ctx = GenerationContext::new(&person, &records, &template, month).with_flatten(false);
    let parsed = extractor::parse(&generate(&ctx).unwrap().bytes, "export.pdf").unwrap();

    assert_eq!(parsed.attendance_by_day.len(), 28);
    assert!(parsed.attendance_by_day.keys().all(|day| *day <= 28));
    assert!(!parsed.was_interrupted);
}

#[test]
fn filename_fallback_fills_identity() {
    let blank = template::blank_form().unwrap();
    let parsed = extractor::parse(&blank, "uploads/FORM_MARKET0625_DupontJean_202506.pdf").unwrap();

    assert_eq!(parsed.course_type, "MARKET0625");
    assert_eq!(parsed.last_name, "Dupont");
    assert_eq!(parsed.first_name, "Jean");
    assert_eq!(parsed.date_start, "2025-06-01");
    assert_eq!(parsed.date_end, "2025-06-30");
}

#[test]
fn flattened_export_cannot_be_reimported() {
    let template = uploaded_form();
    let person = participant();
    let month = TargetMonth::new(2025, 6).unwrap();
    let generated = generate(&GenerationContext::new(&person, &[], &template, month)).unwrap();

    let err = extractor::parse(&generated.bytes, "flat.pdf").unwrap_err();
    assert_eq!(err.file_name(), "flat.pdf");
}
