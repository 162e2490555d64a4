//! Integration tests for the tabulator CLI.

use std::path::PathBuf;
use std::process::{Command, Output};

fn test_data_dir() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path
}

/// Run the CLI against the test model, without picking up a user config.
fn tabulator(args: &[&str]) -> Output {
    let data = test_data_dir();
    Command::new(env!("CARGO_BIN_EXE_tabulator"))
        .arg("--model")
        .arg(data.join("model.yaml"))
        .arg("--config")
        .arg(data.join("no-config.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .current_dir(&data)
        .output()
        .expect("Failed to execute command")
}

fn words(text: &str) -> Vec<Vec<&str>> {
    text.lines()
        .map(|line| line.split_whitespace().collect())
        .filter(|line: &Vec<&str>| !line.is_empty())
        .collect()
}

#[test]
fn test_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_tabulator"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Federated concept queries"));
}

#[test]
fn test_concepts() {
    let output = tabulator(&["concepts"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("article (Identifier)"));
    assert!(stdout.contains("weather (Identifier)"));
    assert!(stdout.contains("Total: 5 concepts"));
}

#[test]
fn test_route_goes_through_article() {
    let output = tabulator(&["route", "date", "project"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Route (2 hops)"));
    assert!(stdout.contains("via news.articles"));
    assert!(stdout.contains("via news.projects"));
    assert!(stdout.contains("Total cost: 3"));
}

#[test]
fn test_list_query() {
    let output = tabulator(&["--quiet", "query", "recent.yaml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        words(&stdout),
        vec![
            vec!["article", "project"],
            vec!["4", "Sports"],
            vec!["3", "Sports"],
        ]
    );
}

#[test]
fn test_list_query_json() {
    let output = tabulator(&["query", "recent.yaml", "--format", "json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["columns"], serde_json::json!(["article", "project"]));
    assert_eq!(json["rows"][0], serde_json::json!([4, "Sports"]));
}

#[test]
fn test_pivot_query() {
    let output = tabulator(&["query", "authors.json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        words(&stdout),
        vec![
            vec!["author", "Elections", "Sports"],
            vec!["alice", "1", "1"],
            vec!["bob", "1"],
            vec!["carol", "1"],
        ]
    );
}

#[test]
fn test_profile_goes_to_stderr() {
    let output = tabulator(&["query", "recent.yaml", "--profile"]);
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("profile: 2 rows"));
}

#[test]
fn test_unknown_concept_suggestion() {
    let output = tabulator(&["query", "typo.toml"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown concept 'artcle'"));
    assert!(stderr.contains("Did you mean 'article'?"));
}

#[test]
fn test_no_route_hint() {
    let output = tabulator(&["query", "unreachable.yaml"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No route connects article, weather"));
    assert!(stderr.contains("'weather' has no mappings."));
}

#[test]
fn test_missing_query_file() {
    let output = tabulator(&["query", "nope.yaml"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read 'nope.yaml': file not found"));
}

#[test]
fn test_completions() {
    let output = Command::new(env!("CARGO_BIN_EXE_tabulator"))
        .args(["completions", "bash"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("tabulator"));
}
