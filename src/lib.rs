//! Reads a Snyk test report in json format and creates one Github issue per
//! vulnerability. An empty report still files a single issue saying no
//! vulnerabilities were found.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

type Result<T> = anyhow::Result<T>;

pub const GITHUB_API: &str = "https://api.github.com";

const DEFAULT_PACING: Duration = Duration::from_secs(1);

/// Reads the results of a Snyk test and creates github issues
#[derive(Parser)]
#[command(version)]
pub struct Cli {
    /// json file to read
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Github repo name in format "owner/repo"
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Github auth token
    #[arg(short, long)]
    pub token: Option<String>,
}

impl Cli {
    /// Enforces the required flags, first missing one wins. The parser itself
    /// treats them all as optional so the diagnostics stay per-flag.
    pub fn into_config(self) -> Result<RunConfig> {
        let Some(file) = self.file else {
            anyhow::bail!(
                "Error: Snyk test results file not specified. Please include -f <filename> argument"
            );
        };
        let Some(repo) = self.repo else {
            anyhow::bail!(
                "Error: Github repo not specified. Please include -r <repo name> argument"
            );
        };
        let Some(token) = self.token else {
            anyhow::bail!("Error: Github token not specified. Please include -t <token> argument");
        };
        Ok(RunConfig {
            file,
            repo,
            token,
            api_base: GITHUB_API.to_string(),
            pacing: DEFAULT_PACING,
        })
    }
}

/// Immutable for the whole run, passed explicitly to everything that needs it.
#[derive(Debug)]
pub struct RunConfig {
    pub file: PathBuf,
    pub repo: String,
    pub token: String,
    pub api_base: String,
    pub pacing: Duration,
}

/// A parsed scan report. An empty document (object or array) means the scan
/// came back clean; otherwise the records are kept raw so a malformed one can
/// be reported on its own without sinking the rest.
pub enum ScanReport {
    Clean,
    Findings(Vec<Value>),
}

pub fn load_report(path: &Path) -> Result<ScanReport> {
    let text = fs::read_to_string(path)?;
    parse_report(&text)
}

pub fn parse_report(text: &str) -> Result<ScanReport> {
    let doc: Value = serde_json::from_str(text)?;
    let empty = match &doc {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(ScanReport::Clean);
    }
    // Non-empty reports must carry the vulnerabilities array. Anything else is
    // fatal rather than silently treated as clean.
    let Some(vulns) = doc.get("vulnerabilities").and_then(Value::as_array) else {
        anyhow::bail!("report is not empty but has no vulnerabilities array");
    };
    Ok(ScanReport::Findings(vulns.clone()))
}

#[derive(Debug, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: String,
    pub title: String,
    #[serde(rename = "packageName")]
    pub package_name: String,
    pub version: String,
}

impl VulnerabilityRecord {
    /// Typed decode of one raw record. Extra fields are ignored; a missing
    /// required field fails the whole record.
    pub fn decode(value: Value) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Debug, Serialize)]
pub struct IssuePayload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl IssuePayload {
    pub fn for_vulnerability(vuln: &VulnerabilityRecord) -> Self {
        IssuePayload {
            title: format!("Snyk: Vulnerability Found: {}", vuln.title),
            body: Some(format!(
                "Title: {}\nID: {}\nPackage Name: {}\nPackage Version: {}",
                vuln.title, vuln.id, vuln.package_name, vuln.version
            )),
        }
    }

    pub fn clean() -> Self {
        IssuePayload {
            title: "Snyk: No Security Issues Found".to_string(),
            body: None,
        }
    }
}

fn issues_url(api_base: &str, repo: &str) -> String {
    format!("{}/repos/{}/issues", api_base, repo)
}

fn make_client(token: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {}", token))?;
    headers.insert("Authorization", value);
    let client = Client::builder()
        .user_agent("snyk-issues")
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Either the request completed (with whatever status the tracker returned)
/// or it never produced a response at all.
async fn post_issue(
    client: &Client,
    config: &RunConfig,
    payload: &IssuePayload,
) -> std::result::Result<StatusCode, reqwest::Error> {
    let url = issues_url(&config.api_base, &config.repo);
    log::debug!("making request to {url}");
    let resp = client.post(&url).json(payload).send().await?;
    Ok(resp.status())
}

/// Files one issue. A present record gets the vulnerability payload, an
/// absent one gets the fixed "no issues found" payload. All outcomes are
/// reported on the console; none escape the call.
pub async fn submit_issue(client: &Client, config: &RunConfig, record: Option<&VulnerabilityRecord>) {
    let payload = match record {
        Some(vuln) => {
            println!();
            println!("Vulnerability:");
            println!("ID: {}", vuln.id);
            println!("Title: {}", vuln.title);
            println!("Package Name: {}", vuln.package_name);
            println!("Package Version: {}", vuln.version);
            println!();
            IssuePayload::for_vulnerability(vuln)
        }
        None => IssuePayload::clean(),
    };
    match post_issue(client, config, &payload).await {
        Ok(status) if status.is_success() => {
            println!("Issue created successfully: Status {}", status.as_u16());
            tokio::time::sleep(config.pacing).await;
        }
        Ok(status) => {
            println!("Error: Issue creation failure. Status {}", status.as_u16());
            tokio::time::sleep(config.pacing).await;
        }
        // No response exists here, so there is no status to report.
        Err(err) => {
            eprintln!("Error: Request timed out or failed: {err}");
        }
    }
}

pub async fn run(config: &RunConfig) -> Result<()> {
    let client = make_client(&config.token)?;
    let report = load_report(&config.file)?;
    match report {
        ScanReport::Clean => {
            log::info!("no vulnerabilities in report, filing placeholder issue");
            submit_issue(&client, config, None).await;
        }
        ScanReport::Findings(records) => {
            log::info!("report holds {} records", records.len());
            for value in records {
                match VulnerabilityRecord::decode(value) {
                    Ok(record) => submit_issue(&client, config, Some(&record)).await,
                    Err(err) => {
                        log::debug!("record decode failed: {err}");
                        eprintln!(
                            "Error: Vulnerability report is missing required data, it needs id, title, packageName and version"
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_cli() -> Cli {
        Cli {
            file: Some("report.json".into()),
            repo: Some("octo/site".into()),
            token: Some("t0ken".into()),
        }
    }

    #[test]
    fn empty_object_report_is_clean() {
        assert!(matches!(parse_report("{}").unwrap(), ScanReport::Clean));
    }

    #[test]
    fn empty_array_report_is_clean() {
        assert!(matches!(parse_report("[]").unwrap(), ScanReport::Clean));
    }

    #[test]
    fn findings_keep_file_order() {
        let text = r#"{"vulnerabilities":[{"id":"SNYK-1"},{"id":"SNYK-2"}]}"#;
        let ScanReport::Findings(records) = parse_report(text).unwrap() else {
            panic!("expected findings");
        };
        let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["SNYK-1", "SNYK-2"]);
    }

    #[test]
    fn non_empty_report_without_vulnerabilities_is_fatal() {
        assert!(parse_report(r#"{"ok": true}"#).is_err());
    }

    #[test]
    fn invalid_json_is_fatal() {
        assert!(parse_report("not json").is_err());
    }

    #[test]
    fn record_decode_ignores_extra_fields() {
        let record = VulnerabilityRecord::decode(json!({
            "id": "SNYK-1",
            "title": "Prototype Pollution",
            "packageName": "lodash",
            "version": "4.17.10",
            "severity": "high",
            "cvssScore": 7.3,
        }))
        .unwrap();
        assert_eq!(record.id, "SNYK-1");
        assert_eq!(record.package_name, "lodash");
    }

    #[test]
    fn record_missing_version_fails_decode() {
        let res = VulnerabilityRecord::decode(json!({
            "id": "SNYK-1",
            "title": "Prototype Pollution",
            "packageName": "lodash",
        }));
        assert!(res.is_err());
    }

    #[test]
    fn vulnerability_payload_embeds_all_fields() {
        let record = VulnerabilityRecord {
            id: "SNYK-1".into(),
            title: "Prototype Pollution".into(),
            package_name: "lodash".into(),
            version: "4.17.10".into(),
        };
        let payload = IssuePayload::for_vulnerability(&record);
        assert_eq!(payload.title, "Snyk: Vulnerability Found: Prototype Pollution");
        let body = payload.body.unwrap();
        for needle in ["Prototype Pollution", "SNYK-1", "lodash", "4.17.10"] {
            assert!(body.contains(needle), "body missing {needle}: {body}");
        }
    }

    #[test]
    fn clean_payload_serializes_without_body_key() {
        let value = serde_json::to_value(IssuePayload::clean()).unwrap();
        assert_eq!(value, json!({"title": "Snyk: No Security Issues Found"}));
    }

    #[test]
    fn missing_file_flag_is_rejected_first() {
        let cli = Cli { file: None, repo: None, token: None };
        let err = cli.into_config().unwrap_err().to_string();
        assert!(err.contains("-f"), "unexpected message: {err}");
    }

    #[test]
    fn missing_repo_flag_is_rejected() {
        let cli = Cli { repo: None, ..full_cli() };
        let err = cli.into_config().unwrap_err().to_string();
        assert!(err.contains("-r"), "unexpected message: {err}");
    }

    #[test]
    fn missing_token_flag_is_rejected() {
        let cli = Cli { token: None, ..full_cli() };
        let err = cli.into_config().unwrap_err().to_string();
        assert!(err.contains("-t"), "unexpected message: {err}");
    }

    #[test]
    fn all_flags_present_resolves_with_defaults() {
        let config = full_cli().into_config().unwrap();
        assert_eq!(config.repo, "octo/site");
        assert_eq!(config.api_base, GITHUB_API);
        assert_eq!(config.pacing, Duration::from_secs(1));
    }

    #[test]
    fn issues_url_composition() {
        assert_eq!(
            issues_url("https://api.github.com", "octo/site"),
            "https://api.github.com/repos/octo/site/issues"
        );
    }
}
