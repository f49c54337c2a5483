use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

const CATALOG: &str = r#"{
    "elements": [
        {"id": 500, "record_identifier": "PPN123", "logid": "LOG_0000", "docstruct_type": "monograph"},
        {"id": 501, "record_identifier": "PPN123", "logid": "LOG_0001", "docstruct_type": "chapter", "parent": 500, "first_page": 3},
        {"id": 502, "record_identifier": "PPN123", "logid": "LOG_0002", "docstruct_type": "chapter", "parent": 500, "first_page": 7},
        {"id": 700, "record_identifier": "PPN_DELETED", "docstruct_type": "monograph", "deleted": true},
        {"id": 900, "record_identifier": "PPN_MOVED", "docstruct_type": "monograph", "access_conditions": ["moving"]}
    ],
    "pages": {
        "PPN123": [
            {"order": 1}, {"order": 2}, {"order": 3, "owner": 501}, {"order": 4, "owner": 501},
            {"order": 5, "owner": 501}, {"order": 6, "owner": 501}, {"order": 7, "owner": 502},
            {"order": 8, "owner": 502}
        ]
    },
    "licenses": [
        {"name": "moving", "open": true, "redirect_url": "https://example.org/moved"}
    ]
}"#;

const CONFIG: &str = r#"
base_url = "https://viewer.example.org/viewer"

[docstruct_navigation]
default = ["chapter"]
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("catalog.json"), CATALOG).unwrap();
        fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn folio(&self) -> Command {
        let mut cmd = Command::cargo_bin("folio").unwrap();
        cmd.env("HOME", self.path())
            .env("XDG_DATA_HOME", self.path().join("data"))
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(self.path().join("config.toml"));
        cmd
    }

    fn open(&self, identifier: &str, extra: &[&str]) -> assert_cmd::assert::Assert {
        self.folio()
            .arg("open")
            .arg(self.path().join("catalog.json"))
            .arg(identifier)
            .args(extra)
            .assert()
    }
}

fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

#[test]
fn opens_record_on_requested_spread() {
    let workspace = Workspace::new();
    let assert = workspace.open("PPN123", &["--page", "4-5"]).success();
    let report = json(&assert.get_output().stdout);

    assert_eq!(report["state"]["record_identifier"], "PPN123");
    assert_eq!(report["state"]["page_spec"], "4-5");
    assert_eq!(report["state"]["double_page_mode"], true);
    assert_eq!(report["state"]["current_element_id"], 501);
    assert_eq!(
        report["urls"]["next"],
        "https://viewer.example.org/viewer/object/PPN123/6-7/"
    );
    assert_eq!(
        report["urls"]["next_docstruct"],
        "https://viewer.example.org/viewer/object/PPN123/7/LOG_0002/"
    );
}

#[test]
fn logid_selects_structure_element() {
    let workspace = Workspace::new();
    let assert = workspace
        .open("PPN123", &["--logid", "LOG_0002", "--view", "image"])
        .success();
    let report = json(&assert.get_output().stdout);

    assert_eq!(report["state"]["current_element_id"], 502);
    assert_eq!(report["state"]["current_logid"], "LOG_0002");
    assert_eq!(
        report["urls"]["previous_docstruct"],
        "https://viewer.example.org/viewer/image/PPN123/3/LOG_0001/"
    );
}

#[test]
fn double_page_switch_adapts_page_request() {
    let workspace = Workspace::new();
    let assert = workspace
        .open("PPN123", &["--page", "4", "--double-page", "true"])
        .success();
    let report = json(&assert.get_output().stdout);
    assert_eq!(report["state"]["double_page_mode"], true);
    assert_eq!(report["state"]["page_spec"], "4-5");
}

#[test]
fn redirect_is_reported() {
    let workspace = Workspace::new();
    let assert = workspace.open("PPN_MOVED", &[]).success();
    let report = json(&assert.get_output().stdout);
    assert_eq!(report["redirect"], "https://example.org/moved");
}

#[test]
fn missing_and_deleted_records_fail() {
    let workspace = Workspace::new();
    let assert = workspace.open("PPN999", &[]).failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("record not found: PPN999"), "{stderr}");

    let assert = workspace.open("PPN_DELETED", &[]).failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("record deleted: PPN_DELETED"), "{stderr}");
}

#[test]
fn invalid_page_is_rejected() {
    let workspace = Workspace::new();
    let assert = workspace.open("PPN123", &["--page", "five"]).failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("invalid input"), "{stderr}");
}

#[test]
fn reversed_range_is_normalized() {
    let workspace = Workspace::new();
    let assert = workspace.open("PPN123", &["--page", "5-4"]).success();
    let report = json(&assert.get_output().stdout);
    assert_eq!(report["state"]["page_spec"], "4-5");
    assert_eq!(report["state"]["double_page_mode"], true);

    let assert = workspace.open("PPN123", &["--page", "4 - 5"]).failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("invalid input"), "{stderr}");
}
