#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

fn xmmlink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xmmlink"));
    cmd.arg("--log-level").arg("error");
    cmd
}

#[test]
fn decode_prints_values_as_json() {
    let output = xmmlink()
        .args(["--format", "json", "decode"])
        .arg("02 01 05  55 03 02 04 00 00 00 04 02 04 00 00 00 01 61 62 63 00")
        .output()
        .expect("decode should run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be json");
    let values = json["values"].as_array().expect("values array");
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["kind"], "int");
    assert_eq!(values[0]["value"], "0x5");
    assert_eq!(values[1]["kind"], "string");
    assert_eq!(values[1]["value"], "abc");
    assert!(json.get("undecoded").is_none());
}

#[test]
fn decode_reports_trailing_garbage() {
    let output = xmmlink()
        .args(["--format", "json", "decode", "020101ff"])
        .output()
        .expect("decode should run");

    assert_eq!(output.status.code(), Some(60));
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be json");
    assert_eq!(json["undecoded"], "ff");
}

#[test]
fn decode_rejects_bad_hex() {
    let output = xmmlink()
        .args(["decode", "0x"])
        .output()
        .expect("decode should run");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid hex"));
}

#[test]
fn up_without_device_is_transport_error() {
    let output = xmmlink()
        .args(["up", "--apn", "example.apn", "--rpc-device", "/nonexistent/xmm0/rpc"])
        .output()
        .expect("up should run");

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("/nonexistent/xmm0/rpc"));
}

#[test]
fn call_with_unknown_command_is_usage_error() {
    let output = xmmlink()
        .args(["call", "UtaNoSuchReq"])
        .output()
        .expect("call should run");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = xmmlink().arg("version").output().expect("version should run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("xmmlink {}", env!("CARGO_PKG_VERSION"))
    );
}
