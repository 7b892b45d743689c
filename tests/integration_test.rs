use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_mmt-attendance"))
}

fn output_dir() -> &'static Path {
    Path::new("tests/output")
}

fn setup() {
    fs::create_dir_all(output_dir()).expect("Failed to create output directory");
}

fn cleanup_file(name: &str) {
    let path = output_dir().join(name);
    if path.exists() {
        fs::remove_file(&path).ok();
    }
}

/// Run with a JSON database inside `dir`.
fn run_with_db(dir: &TempDir, args: &[&str]) -> Output {
    let db = dir.path().join("db.json");
    cargo_bin()
        .arg("--db")
        .arg(&db)
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_form(dir: &Path, name: &str, values: &[(&str, &str)]) -> PathBuf {
    let bytes = mmt_attendance::template::blank_form_with(values).expect("Failed to build form");
    let path = dir.join(name);
    fs::write(&path, bytes).expect("Failed to write form");
    path
}

#[test]
fn test_blank_template() {
    setup();
    let output_file = "test-blank-template.pdf";
    cleanup_file(output_file);

    let output = cargo_bin()
        .args(["blank-template", "-o", &format!("tests/output/{}", output_file)])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Command failed: {:?}", output);

    let path = output_dir().join(output_file);
    assert!(path.exists(), "PDF file was not created");

    let metadata = fs::metadata(&path).expect("Failed to get file metadata");
    assert!(metadata.len() > 1000, "PDF file is too small, likely empty or corrupt");
}

#[test]
fn test_codes_lists_all_codes() {
    let output = cargo_bin().arg("codes").output().expect("Failed to execute command");
    assert!(output.status.success(), "Command failed: {:?}", output);

    let text = stdout(&output);
    assert_eq!(text.lines().count(), 11);
    assert_eq!(text.matches("comment required").count(), 1);
    assert!(text.lines().any(|l| l.starts_with('G') && l.contains("comment required")));
}

#[test]
fn test_inspect_falls_back_to_file_name() {
    setup();
    let output_file = "FORM_MARKET0625_DupontJean_202506.pdf";
    cleanup_file(output_file);
    let path = write_form(output_dir(), output_file, &[]);

    let output = cargo_bin()
        .arg("inspect")
        .arg(&path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Command failed: {:?}", output);

    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("inspect prints JSON");
    assert_eq!(parsed["lastName"], "Dupont");
    assert_eq!(parsed["firstName"], "Jean");
    assert_eq!(parsed["courseType"], "MARKET0625");
    assert_eq!(parsed["dateStart"], "2025-06-01");
    assert_eq!(parsed["dateEnd"], "2025-06-30");
    assert_eq!(parsed["workPercent"], 100);
}

#[test]
fn test_inspect_without_identity_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_form(dir.path(), "scan.pdf", &[]);

    let output = cargo_bin().arg("inspect").arg(&path).output().expect("Failed to execute command");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("scan.pdf"), "{}", stderr(&output));
}

#[test]
fn test_import_then_export() {
    let dir = TempDir::new().unwrap();
    let form = write_form(
        dir.path(),
        "dupont.pdf",
        &[("1.2", "Dupont"), ("1.3", "Jean"), ("1.68", "MARKET0625"), ("1.48", "31.12.2099")],
    );

    let output = run_with_db(&dir, &["import", form.to_str().unwrap()]);
    assert!(output.status.success(), "Import failed: {:?}", output);
    assert!(stdout(&output).contains("1 succeeded, 0 failed"));

    // Importing the same person again updates instead of duplicating.
    let output = run_with_db(&dir, &["import", form.to_str().unwrap()]);
    assert!(output.status.success(), "Import failed: {:?}", output);

    let output = run_with_db(&dir, &["participants"]);
    let listing = stdout(&output);
    assert_eq!(listing.lines().count(), 1, "{}", listing);
    let id = listing.split_whitespace().next().unwrap().to_string();

    let out_dir = dir.path().join("out");
    let output = run_with_db(
        &dir,
        &[
            "export",
            "-p", &id,
            "-m", "2025-06",
            "--signature-date", "30.06.2025",
            "-o", out_dir.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "Export failed: {:?}", output);

    let exported = out_dir.join("MMT_Dupont_Jean_2025-06.pdf");
    assert!(exported.exists(), "PDF file was not created");
    assert!(fs::metadata(&exported).unwrap().len() > 1000);
}

#[test]
fn test_import_reports_failures() {
    let dir = TempDir::new().unwrap();
    let garbage = dir.path().join("broken.pdf");
    fs::write(&garbage, b"not a pdf").unwrap();

    let output = run_with_db(&dir, &["import", garbage.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stdout(&output).contains("0 succeeded, 1 failed"));
    assert!(stdout(&output).contains("broken.pdf"));
}

#[test]
fn test_invalid_month_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_with_db(&dir, &["export-batch", "-m", "2025-13", "-o", dir.path().to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid month"), "{}", stderr(&output));
}

#[test]
fn test_invalid_signature_date_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_with_db(
        &dir,
        &["export-batch", "-m", "2025-06", "--signature-date", "2025-06-30", "-o", dir.path().to_str().unwrap()],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid date format"), "{}", stderr(&output));
}

#[test]
fn test_record_requires_comment_for_g() {
    let dir = TempDir::new().unwrap();
    let output = run_with_db(&dir, &["new-class", "-n", "Groupe A"]);
    assert!(output.status.success(), "Command failed: {:?}", output);
    let class_id = stdout(&output).trim().to_string();

    let entries = dir.path().join("entries.json");
    fs::write(
        &entries,
        r#"[{"participantId": "p1", "participantName": "Jean Dupont", "morningCode": "G", "afternoonCode": "X"}]"#,
    )
    .unwrap();
    let output = run_with_db(
        &dir,
        &["record", "--class", &class_id, "-d", "2025-06-02", "-e", entries.to_str().unwrap()],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Jean Dupont"), "{}", stderr(&output));

    fs::write(
        &entries,
        r#"[{"participantId": "p1", "participantName": "Jean Dupont", "morningCode": "G", "afternoonCode": "X", "comment": "mariage"}]"#,
    )
    .unwrap();
    let output = run_with_db(
        &dir,
        &["record", "--class", &class_id, "-d", "2025-06-02", "-e", entries.to_str().unwrap(), "--checked"],
    );
    assert!(output.status.success(), "Command failed: {:?}", output);

    let db: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("db.json")).unwrap()).unwrap();
    assert_eq!(db["attendance"][0]["morningCode"], "G");
    assert_eq!(db["attendance"][0]["comment"], "mariage");
    assert_eq!(db["attendanceChecks"][0]["checked"], true);
}

#[test]
fn test_import_keeps_going_past_missing_file() {
    let dir = TempDir::new().unwrap();
    let good = write_form(dir.path(), "good.pdf", &[("1.2", "Dupont"), ("1.3", "Jean"), ("1.48", "31.12.2099")]);
    let missing = dir.path().join("missing.pdf");

    let output = run_with_db(&dir, &["import", good.to_str().unwrap(), missing.to_str().unwrap()]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("1 succeeded, 1 failed"), "{}", text);
    assert!(text.contains("missing.pdf"), "{}", text);

    let output = run_with_db(&dir, &["participants"]);
    assert_eq!(stdout(&output).lines().count(), 1);
}

#[test]
fn test_export_batch_merge_writes_group_report() {
    let dir = TempDir::new().unwrap();
    for (name, last, office) in [("a.pdf", "Muller", "Unia"), ("b.pdf", "Berger", "Syna")] {
        let form = write_form(dir.path(), name, &[("1.2", last), ("1.3", "Anna"), ("1.141", office), ("1.48", "31.12.2099")]);
        let output = run_with_db(&dir, &["import", form.to_str().unwrap()]);
        assert!(output.status.success(), "Import failed: {:?}", output);
    }

    let out_dir = dir.path().join("out");
    let output = run_with_db(
        &dir,
        &["export-batch", "--merge", "--no-class", "-m", "2025-06", "-o", out_dir.to_str().unwrap()],
    );
    assert!(output.status.success(), "Export failed: {:?}", output);
    assert!(stdout(&output).contains("2 succeeded, 0 failed"));

    let report = out_dir.join("MMT_Export_Groupe_2025-06.pdf");
    assert!(report.exists(), "report was not created");
    assert!(!out_dir.join("MMT_Muller_Anna_2025-06.pdf").exists());
}
