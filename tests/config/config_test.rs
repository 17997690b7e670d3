//! Coverage for config parsing, validation and kernel wiring.

use std::io::Write;

use agent_immune::config::{load_config, Config};
use agent_immune::ledger::LedgerLine;
use agent_immune::{ActionRequest, ComplianceKernel, Decision, RiskCategory};

fn parse(toml_str: &str) -> Config {
    toml::from_str(toml_str).expect("should parse")
}

#[test]
fn full_config_parses() {
    let config = parse(
        r#"
agent_id = "trader-7"
strict = true

[thresholds]
approve_with_logging = 25
require_confirmation = 60
block = 85
memory_penalty = 15
publish = 95
confirm_categories = ["FINANCIAL", "DESTRUCTIVE"]

[memory]
similarity_threshold = 0.7

[external]
timeout_ms = 500

[ledger]
endpoint = "https://ledger.example.com"

[registry]
endpoint = "https://registry.example.com"
refresh_interval_secs = 60

[storage]
db_path = "/var/lib/agent-immune/state.db"

[[classifier.patterns]]
category = "DESTRUCTIVE"
label = "custom:shred"
regex = "\\bshred\\b"
"#,
    );

    assert_eq!(config.agent_id, "trader-7");
    assert!(config.strict);
    assert_eq!(config.thresholds.block, 85);
    assert_eq!(config.thresholds.publish, 95);
    assert_eq!(
        config.thresholds.confirm_categories,
        vec![RiskCategory::Financial, RiskCategory::Destructive]
    );
    assert_eq!(config.external.timeout_ms, 500);
    assert_eq!(config.registry.refresh_interval_secs, 60);
    assert_eq!(config.classifier.patterns.len(), 1);
    assert_eq!(config.classifier.patterns[0].category, RiskCategory::Destructive);
    assert!(config.validate().is_ok());
}

#[test]
fn out_of_order_thresholds_are_rejected() {
    let config = parse(
        r#"
[thresholds]
approve_with_logging = 50
require_confirmation = 40
"#,
    );
    let err = config.validate().expect_err("should reject");
    assert!(err.to_string().contains("strictly increasing"));
}

#[test]
fn similarity_threshold_must_be_a_fraction() {
    for bad in ["0.0", "1.5"] {
        let config = parse(&format!("[memory]\nsimilarity_threshold = {bad}\n"));
        assert!(config.validate().is_err(), "{bad} should be rejected");
    }
}

#[test]
fn endpoints_must_be_http_urls() {
    let config = parse("[ledger]\nendpoint = \"ftp://ledger.example.com\"\n");
    assert!(config.validate().is_err());
    let config = parse("[registry]\nendpoint = \"not a url\"\n");
    assert!(config.validate().is_err());
}

#[test]
fn broken_pattern_is_rejected() {
    let config = parse(
        r#"
[[classifier.patterns]]
category = "FINANCIAL"
label = "custom:broken"
regex = "(unclosed"
"#,
    );
    let err = config.validate().expect_err("should reject");
    assert!(format!("{err:#}").contains("custom:broken"));
}

#[test]
fn unknown_category_fails_to_parse() {
    let result: Result<Config, _> = toml::from_str(
        r#"
[thresholds]
confirm_categories = ["LUNAR"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn load_config_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "agent_id = \"from-file\"\n[external]\ntimeout_ms = 750").expect("write");

    let config = load_config(file.path()).expect("load");
    assert_eq!(config.agent_id, "from-file");
    assert_eq!(config.external.timeout_ms, 750);
}

#[test]
fn load_config_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "agent_id = \"  \"").expect("write");
    assert!(load_config(file.path()).is_err());
}

#[tokio::test]
async fn kernel_from_config_uses_file_ledger_and_custom_patterns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger_path = dir.path().join("ledger.jsonl");
    let mut config = parse(
        r#"
agent_id = "configured"

[[classifier.patterns]]
category = "DESTRUCTIVE"
label = "custom:shred"
regex = "\\bshred\\b"
"#,
    );
    config.storage.db_path = Some(dir.path().join("state.db"));
    config.ledger.jsonl_path = Some(ledger_path.clone());

    let kernel = ComplianceKernel::from_config(&config).await.expect("kernel");
    assert_eq!(kernel.agent_id(), "configured");

    let verdict = kernel
        .process(ActionRequest::new("shred secrets.bin"))
        .await
        .expect("valid request");
    assert_eq!(verdict.category, RiskCategory::Destructive);
    assert_eq!(verdict.decision, Decision::RequireConfirmation);
    assert!(verdict.matched_patterns.contains(&"custom:shred".to_owned()));

    let contents = std::fs::read_to_string(&ledger_path).expect("ledger written");
    let line: LedgerLine = serde_json::from_str(contents.trim()).expect("one line");
    assert_eq!(line.record.agent_id, "configured");
    assert_eq!(verdict.audit_reference().map(|r| r.0.starts_with("ledger-")), Some(true));
}

#[tokio::test]
async fn invalid_config_does_not_build_kernel() {
    let mut config = Config::default();
    config.thresholds.block = 10;
    assert!(ComplianceKernel::from_config(&config).await.is_err());
}
