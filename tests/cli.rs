//! Black-box tests against the built `actx` binary.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn actx_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_actx"))
}

fn write_config(root: &Path) -> PathBuf {
    let data = root.join("data");
    let config = format!(
        r#"
[db]
path = '{}'

[storage]
upload_dir = '{}'

[index]
path = '{}'

[embedding]
provider = "hashing"
dims = 32

[retrieval]
default_k = 3
"#,
        data.join("actx.sqlite").display(),
        data.join("uploads").display(),
        data.join("index/vectors.idx").display(),
    );
    let path = root.join("actx.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(actx_bin())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run actx")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_docx(path: &Path, paragraphs: &[&str]) {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
}

#[test]
fn init_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    for _ in 0..2 {
        let output = run(&config, &["init"]);
        assert!(output.status.success(), "{:?}", output);
        assert!(stdout(&output).contains("Database initialized"));
    }
    assert!(tmp.path().join("data/actx.sqlite").exists());
}

#[test]
fn ingest_directory_then_retrieve() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    write_docx(
        &docs.join("treasury.docx"),
        &["Bank reconciliations were two months overdue at the treasury unit."],
    );
    write_docx(
        &docs.join("hr.docx"),
        &["Overtime claims lacked supervisor signatures."],
    );
    std::fs::write(docs.join("notes.txt"), "ignored").unwrap();

    let output = run(
        &config,
        &[
            "ingest",
            docs.to_str().unwrap(),
            "--source-unit",
            "Head Office",
            "--year",
            "2024",
            "--tags",
            r#"{"cycle":"Q1"}"#,
        ],
    );
    assert!(output.status.success(), "{:?}", output);
    let out = stdout(&output);
    assert_eq!(out.matches("created").count(), 2, "{}", out);

    // Second run: every file is a duplicate.
    let output = run(&config, &["ingest", docs.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).matches("duplicate").count(), 2);

    let output = run(
        &config,
        &[
            "retrieve",
            "Bank reconciliations were two months overdue at the treasury unit.",
            "-k",
            "1",
            "--json",
        ],
    );
    assert!(output.status.success(), "{:?}", output);
    let citations: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let citations = citations.as_array().unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["filename"], "treasury.docx");
    assert!(citations[0]["page"].is_null());

    let output = run(&config, &["documents"]);
    let out = stdout(&output);
    assert!(out.contains("treasury.docx") && out.contains("hr.docx"));
    assert!(out.contains("Head Office"));

    let output = run(&config, &["check"]);
    assert!(output.status.success(), "{:?}", output);
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["chunks"], 2);
    assert_eq!(report["mappings"], 2);
}

#[test]
fn unsupported_explicit_file_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    let file = tmp.path().join("memo.txt");
    std::fs::write(&file, "plain text").unwrap();

    let output = run(&config, &["ingest", file.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn generate_falls_back_to_heuristic() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let output = run(
        &config,
        &["generate", "--system", "Be brief.", "Summarize the procurement findings"],
    );
    assert!(output.status.success(), "{:?}", output);
    let out = stdout(&output);
    assert!(out.starts_with("(Fallback)"));
    assert!(out.contains("- Summarize the procurement findings"));
}

#[test]
fn embed_prints_configured_dimension() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let output = run(&config, &["embed", "cash count", "fixed assets"]);
    assert!(output.status.success(), "{:?}", output);
    let vectors: Vec<Vec<f32>> = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(vectors.len(), 2);
    assert!(vectors.iter().all(|v| v.len() == 32));
}
