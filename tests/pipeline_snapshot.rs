//! End-to-end pipeline tests over generated archive fixtures
//!
//! Each test builds one or more capture archives in a temporary directory,
//! runs the full pipeline with a scripted runner standing in for the
//! external collaborators, and asserts on the produced cache tree, TAL
//! directory and run report.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate};
use rpki_replay::{Config, Pipeline, ScriptedRunner};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

// =============================================================================
// Test helpers
// =============================================================================

const DATE: &str = "2019-04-01";

/// Arbitrary but valid-looking DER prefix bytes
const DER_ANCHOR: &[u8] = &[0x30, 0x82, 0x01, 0x0a, 0x02, 0x82, 0x01, 0x01];

fn process_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 4, 1).unwrap()
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new(ignore_tals: &[&str]) -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("archives")).unwrap();
        let fixture = Self { root };
        fixture.write_config(ignore_tals);
        fixture
    }

    fn write_config(&self, ignore_tals: &[&str]) {
        let ignore: Vec<String> = ignore_tals.iter().map(|t| format!("\"{}\"", t)).collect();
        let toml = format!(
            r#"
            [archive]
            dir = "{root}/archives"

            [cache]
            unvalidated_dir = "{root}/cache"
            tal_dir = "{root}/tals"
            ignore_tals = [{ignore}]
            "#,
            root = self.root.path().display(),
            ignore = ignore.join(", ")
        );
        fs::write(self.root.path().join("replay.toml"), toml).unwrap();
    }

    fn config(&self) -> Config {
        Config::from_file(&self.root.path().join("replay.toml")).unwrap()
    }

    fn cache(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    fn tals(&self) -> PathBuf {
        self.root.path().join("tals")
    }

    fn add_archive(&self, name: &str, entries: &[(&str, &[u8], u64)]) {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data, mtime) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mtime(*mtime);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        let bytes = builder.into_inner().unwrap();
        fs::write(self.root.path().join("archives").join(name), bytes).unwrap();
    }
}

/// PEM public-key output as the inspector collaborator would print it
fn pem_pubkey(key: &[u8]) -> Vec<u8> {
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    let encoded = STANDARD.encode(key);
    for chunk in encoded.as_bytes().chunks(60) {
        pem.push_str(std::str::from_utf8(chunk).unwrap());
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem.into_bytes()
}

/// Relative paths of all regular files under `root`, sorted
fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string()
        })
        .collect();
    files.sort();
    files
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn single_authority_end_to_end() {
    let fixture = Fixture::new(&[]);
    let t1 = 1_554_076_800u64;
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[
            ("capture/unvalidated/foo/x/obj1.cer", b"object-one", t1),
            ("capture/foo.tal.cer", DER_ANCHOR, 100),
        ],
    );

    let key = vec![0xA5u8; 70];
    let runner = ScriptedRunner::new();
    runner.push_success(&pem_pubkey(&key)); // key extraction
    runner.push_success(b""); // validator

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.archives_processed, 1);
    assert_eq!(report.objects_extracted, 1);
    assert_eq!(report.trust_anchors_installed, 1);
    assert_eq!(report.tals_written, 1);
    assert_eq!(report.watermark, DateTime::from_timestamp(t1 as i64, 0).unwrap());
    assert_eq!(report.validator_status, Some(0));

    // Cache layout
    assert_eq!(
        fs::read(fixture.cache().join("foo/x/obj1.cer")).unwrap(),
        b"object-one"
    );
    // Binary anchors are stored byte-identical
    assert_eq!(fs::read(fixture.cache().join("foo/ta/ta.cer")).unwrap(), DER_ANCHOR);

    // TAL layout
    let tal = fs::read_to_string(fixture.tals().join("foo.tal")).unwrap();
    let mut lines = tal.lines();
    assert_eq!(lines.next(), Some("rsync://foo/ta/ta.cer"));
    assert_eq!(lines.next(), Some(""));
    let body: String = lines.collect();
    assert_eq!(STANDARD.decode(body).unwrap(), key);

    // Validator got the watermark as its forced "now"
    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    let validator_call = &calls[1];
    assert_eq!(validator_call.program, "routinator");
    let now_pos = validator_call
        .args
        .iter()
        .position(|a| a == "--current-time")
        .unwrap();
    assert_eq!(validator_call.args[now_pos + 1], "2019-04-01T00:00:00Z");
}

#[test]
fn pem_anchor_is_normalized_before_install() {
    let fixture = Fixture::new(&[]);
    let pem_anchor = b"-----BEGIN CERTIFICATE-----\nMIIBCg==\n-----END CERTIFICATE-----\n";
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[
            ("unvalidated/foo/obj.cer", b"obj", 500),
            ("foo.tal.cer", pem_anchor, 100),
        ],
    );

    let reencoded = vec![0x30, 0x09, 0x01, 0x02];
    let runner = ScriptedRunner::new();
    runner.push_success(&reencoded); // PEM -> DER
    runner.push_success(&pem_pubkey(&[1u8; 40])); // key extraction
    runner.push_success(b""); // validator

    let config = fixture.config();
    Pipeline::new(&config, &runner).run(process_date()).unwrap();

    let stored = fs::read(fixture.cache().join("foo/ta/ta.cer")).unwrap();
    assert_eq!(stored, reencoded);
    assert_ne!(stored.as_slice(), &pem_anchor[..]);

    let calls = runner.calls();
    assert_eq!(calls[0].args[..2], ["x509".to_string(), "-inform".to_string()]);
    assert_eq!(calls[0].stdin, pem_anchor);
}

#[test]
fn duplicate_trust_anchor_aborts_without_persisting_either() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[
            ("unvalidated/foo/obj.cer", b"obj", 500),
            ("foo.tal.cer", DER_ANCHOR, 100),
            ("extra/foo.tal.cer", b"second-candidate", 101),
        ],
    );

    let runner = ScriptedRunner::new();
    let config = fixture.config();
    let err = Pipeline::new(&config, &runner).run(process_date()).unwrap_err();

    assert_eq!(err.exit_code(), 30);
    assert!(err.to_string().contains("duplicate trust anchor"));

    // No TA slot, no TAL, no collaborator ran
    assert!(!fixture.cache().join("foo/ta").exists());
    assert!(tree(&fixture.tals()).is_empty());
    assert!(runner.calls().is_empty());
}

#[test]
fn missing_trust_anchor_warns_but_keeps_objects() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[("unvalidated/foo/obj.cer", b"kept", 500)],
    );

    let runner = ScriptedRunner::new();
    runner.push_success(b""); // validator

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.objects_extracted, 1);
    assert_eq!(report.trust_anchors_installed, 0);
    assert_eq!(report.tals_written, 0);
    assert_eq!(fs::read(fixture.cache().join("foo/obj.cer")).unwrap(), b"kept");
    assert!(tree(&fixture.tals()).is_empty());
}

#[test]
fn irrelevant_archive_leaves_output_roots_unchanged() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("junk-{}.tar", DATE),
        &[
            ("capture/README", b"nothing to see", 900),
            ("capture/logs/run.txt", b"noise", 901),
        ],
    );

    let runner = ScriptedRunner::new();
    runner.push_success(b""); // validator

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.objects_extracted, 0);
    assert_eq!(report.watermark, DateTime::UNIX_EPOCH);
    assert!(tree(&fixture.cache()).is_empty());
    assert!(tree(&fixture.tals()).is_empty());
}

#[test]
fn ignored_authority_contributes_objects_but_no_trust_point() {
    let fixture = Fixture::new(&["bar"]);
    fixture.add_archive(
        &format!("bar-{}.tar", DATE),
        &[
            ("unvalidated/bar/obj.roa", b"still-cached", 700),
            ("bar.tal.cer", DER_ANCHOR, 100),
        ],
    );

    let runner = ScriptedRunner::new();
    runner.push_success(b""); // validator only

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.objects_extracted, 1);
    assert_eq!(report.trust_anchors_installed, 0);
    assert_eq!(
        fs::read(fixture.cache().join("bar/obj.roa")).unwrap(),
        b"still-cached"
    );
    assert!(!fixture.cache().join("bar/ta").exists());
    assert!(tree(&fixture.tals()).is_empty());

    // The only collaborator invocation is the validator itself
    assert_eq!(runner.calls().len(), 1);
    assert_eq!(runner.calls()[0].program, "routinator");
}

#[test]
fn watermark_is_max_mtime_across_archives() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("alpha-{}.tar", DATE),
        &[
            ("unvalidated/alpha/a.cer", b"a", 1_000),
            ("unvalidated/alpha/b.cer", b"b", 5_000),
            ("alpha.tal.cer", DER_ANCHOR, 999_999),
        ],
    );
    fixture.add_archive(
        &format!("beta-{}.tar", DATE),
        &[
            ("unvalidated/beta/c.cer", b"c", 3_000),
            ("beta.tal.cer", DER_ANCHOR, 100),
        ],
    );

    let runner = ScriptedRunner::new();
    runner.push_success(&pem_pubkey(&[1u8; 32])); // alpha key
    runner.push_success(&pem_pubkey(&[2u8; 32])); // beta key
    runner.push_success(b""); // validator

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.archives_processed, 2);
    assert_eq!(report.objects_extracted, 3);
    // The anchor's own mtime (999_999) must not move the watermark
    assert_eq!(report.watermark, DateTime::from_timestamp(5_000, 0).unwrap());
}

#[test]
fn historical_layout_variants_coexist() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("rpki.apnic-iana.{}.tar", DATE),
        &[
            ("unvalidated/apnic/iana/obj.cer", b"iana", 100),
            ("apnic.tal.cer", DER_ANCHOR, 1),
        ],
    );
    fixture.add_archive(
        &format!("rpki.apnic-ripe.{}.tar", DATE),
        &[
            ("unvalidated/apnic/ripe/obj.cer", b"ripe", 200),
            ("apnic.tal.cer", DER_ANCHOR, 2),
        ],
    );

    let runner = ScriptedRunner::new();
    runner.push_success(&pem_pubkey(&[3u8; 32]));
    runner.push_success(&pem_pubkey(&[4u8; 32]));
    runner.push_success(b""); // validator

    let config = fixture.config();
    let report = Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(report.trust_anchors_installed, 2);
    assert_eq!(report.tals_written, 2);

    // Two distinct TA files under the same authority slot
    assert!(fixture.cache().join("apnic/ta/ta-apnic-iana.cer").exists());
    assert!(fixture.cache().join("apnic/ta/ta-apnic-ripe.cer").exists());

    // Two distinct TALs with matching retrieval URIs
    let iana = fs::read_to_string(fixture.tals().join("apnic-apnic-iana.tal")).unwrap();
    let ripe = fs::read_to_string(fixture.tals().join("apnic-apnic-ripe.tal")).unwrap();
    assert!(iana.starts_with("rsync://apnic/ta/ta-apnic-iana.cer\n\n"));
    assert!(ripe.starts_with("rsync://apnic/ta/ta-apnic-ripe.cer\n\n"));
}

#[test]
fn run_starts_from_clean_roots() {
    let fixture = Fixture::new(&[]);
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[("unvalidated/foo/obj.cer", b"fresh", 100)],
    );

    // Stale state from an earlier run
    fs::create_dir_all(fixture.cache().join("stale/ta")).unwrap();
    fs::write(fixture.cache().join("stale/ta/ta.cer"), b"old").unwrap();
    fs::create_dir_all(fixture.tals()).unwrap();
    fs::write(fixture.tals().join("stale.tal"), b"old").unwrap();

    let runner = ScriptedRunner::new();
    runner.push_success(b""); // validator

    let config = fixture.config();
    Pipeline::new(&config, &runner).run(process_date()).unwrap();

    assert_eq!(tree(&fixture.cache()), vec!["foo/obj.cer".to_string()]);
    assert!(tree(&fixture.tals()).is_empty());
}

#[test]
fn reencoder_failure_aborts_the_run() {
    let fixture = Fixture::new(&[]);
    let pem_anchor = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
    fixture.add_archive(
        &format!("foo-{}.tar", DATE),
        &[
            ("unvalidated/foo/obj.cer", b"obj", 100),
            ("foo.tal.cer", pem_anchor, 100),
        ],
    );

    let runner = ScriptedRunner::new();
    runner.push_failure(1, b"unable to load certificate");

    let config = fixture.config();
    let err = Pipeline::new(&config, &runner).run(process_date()).unwrap_err();

    assert_eq!(err.exit_code(), 40);
    assert!(err.to_string().contains("normalize trust anchor"));
    assert!(!fixture.cache().join("foo/ta").exists());
}
