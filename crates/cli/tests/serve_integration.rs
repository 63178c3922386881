//! Integration tests for the `paraf serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with a
//! seeded directory and rule set, makes raw HTTP requests, and verifies
//! the responses. Seeded users carry pinned ids so requests can pass them
//! in `X-Actor-Id`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tempfile::TempDir;

const STAF_ID: &str = "11111111-1111-4111-8111-111111111111";
const MANAJER_ID: &str = "22222222-2222-4222-8222-222222222222";
const GM_ID: &str = "33333333-3333-4333-8333-333333333333";
const UNIT_ID: &str = "44444444-4444-4444-8444-444444444444";

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel `cargo test --workspace`
/// runs don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

fn seed_json() -> String {
    format!(
        r#"{{
        "roles": [{{"name": "Staf"}}, {{"name": "Manajer"}}, {{"name": "GM"}}],
        "units": [{{"id": "{UNIT_ID}", "name": "Bagian Umum"}}],
        "users": [
            {{"id": "{STAF_ID}", "name": "Budi", "role": "Staf", "unit": "Bagian Umum"}},
            {{"id": "{MANAJER_ID}", "name": "Sari", "role": "Manajer", "unit": "Bagian Umum"}},
            {{"id": "{GM_ID}", "name": "Dewi", "role": "GM", "unit": "Bagian Umum"}}
        ],
        "rules": [{{
            "name": "standar",
            "minAmount": "0",
            "maxAmount": "50000000",
            "steps": [
                {{"stepOrder": 1, "stepType": "CREATE", "role": "Staf"}},
                {{"stepOrder": 2, "stepType": "REVIEW", "role": "Manajer"}},
                {{"stepOrder": 3, "stepType": "APPROVE", "role": "GM"}}
            ]
        }}]
    }}"#
    )
}

struct Server {
    child: Child,
    port: u16,
    dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Start `paraf serve` on a fresh port with the standard seed.
fn start_server() -> Server {
    let port = next_port();
    let dir = TempDir::new().expect("temp dir");
    let seed_path = dir.path().join("seed.json");
    std::fs::write(&seed_path, seed_json()).expect("write seed");
    let letters_dir = dir.path().join("letters");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_paraf"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--letters-dir")
        .arg(&letters_dir)
        .arg("--seed")
        .arg(&seed_path);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start paraf serve");
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return Server {
                child,
                port,
                dir,
            };
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        child,
        port,
        dir,
    }
}

/// Send a raw HTTP request and return (status, headers, body).
fn request(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let request_head = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
        method,
        path,
        port,
        header_lines,
        body.len()
    );
    stream.write_all(request_head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    parse_response(&response)
}

fn get(port: u16, path: &str) -> (u16, String, Vec<u8>) {
    request(port, "GET", path, &[], &[])
}

fn get_as(port: u16, actor: &str, path: &str) -> (u16, String, Vec<u8>) {
    request(port, "GET", path, &[("X-Actor-Id", actor)], &[])
}

fn post_json(port: u16, actor: &str, path: &str, body: &str) -> (u16, String, Vec<u8>) {
    request(
        port,
        "POST",
        path,
        &[
            ("X-Actor-Id", actor),
            ("Content-Type", "application/json"),
        ],
        body.as_bytes(),
    )
}

fn parse_response(raw: &[u8]) -> (u16, String, Vec<u8>) {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(raw.len());
    let headers = String::from_utf8_lossy(&raw[..split]).to_string();
    let mut body = raw.get(split + 4..).unwrap_or(&[]).to_vec();

    let status = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    if headers
        .to_lowercase()
        .contains("transfer-encoding: chunked")
    {
        body = decode_chunked(&body);
    }
    (status, headers, body)
}

fn decode_chunked(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut rest = data;
    while let Some(line_end) = rest.windows(2).position(|w| w == b"\r\n") {
        let size_str = String::from_utf8_lossy(&rest[..line_end]);
        let size = match usize::from_str_radix(size_str.trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > rest.len() {
            break;
        }
        result.extend_from_slice(&rest[chunk_start..chunk_end]);
        rest = rest.get(chunk_end + 2..).unwrap_or(&[]);
    }
    result
}

fn json_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        panic!(
            "invalid JSON body: {} ({})",
            String::from_utf8_lossy(body),
            e
        )
    })
}

/// Build a multipart body for a letter submission.
fn letter_multipart(
    boundary: &str,
    fields: &[(&str, &str)],
    file: Option<&[u8]>,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"letter_file\"; \
                 filename=\"surat.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn submit_letter(port: u16, nominal: &str) -> (u16, serde_json::Value) {
    let boundary = "ParafTestBoundary";
    let body = letter_multipart(
        boundary,
        &[
            ("letterNumber", "001/SPB/2025"),
            ("letterAbout", "pengadaan ATK"),
            ("nominal", nominal),
            ("incomingLetterDate", "2025-03-01"),
            ("unitId", UNIT_ID),
        ],
        Some(b"%PDF-1.4 test letter"),
    );
    let (status, _, resp) = request(
        port,
        "POST",
        "/admin/procurements",
        &[
            ("X-Actor-Id", STAF_ID),
            (
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            ),
        ],
        &body,
    );
    (status, json_body(&resp))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn health_is_public() {
    let server = start_server();
    let (status, _, body) = get(server.port, "/health");
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["status"], "ok");
}

#[test]
fn unknown_route_returns_error_envelope() {
    let server = start_server();
    let (status, _, body) = get(server.port, "/no/such/route");
    assert_eq!(status, 404);
    assert_eq!(json_body(&body)["code"], "NOT_FOUND");
}

#[test]
fn admin_requires_actor_header() {
    let server = start_server();
    let (status, _, body) = get(server.port, "/admin/rules");
    assert_eq!(status, 401);
    assert_eq!(json_body(&body)["code"], "UNAUTHORIZED_ACTOR");

    let (status, _, body) = get_as(
        server.port,
        "99999999-9999-4999-8999-999999999999",
        "/admin/rules",
    );
    assert_eq!(status, 403);
    assert_eq!(json_body(&body)["code"], "UNAUTHORIZED_ACTOR");
}

#[test]
fn seeded_rules_list_with_pagination_envelope() {
    let server = start_server();
    let (status, _, body) = get_as(server.port, STAF_ID, "/admin/rules");
    assert_eq!(status, 200);
    let json = json_body(&body);
    let items = json["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "standar");
    assert_eq!(items[0]["minAmount"], "0");
    assert_eq!(json["data"]["pagination"]["total_data"], 1);
}

#[test]
fn full_approval_workflow_over_http() {
    let server = start_server();

    let (status, submitted) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200, "submit failed: {}", submitted);
    let letter = &submitted["data"];
    assert_eq!(letter["status"], "PENDING_REVIEW");
    assert_eq!(letter["currentStep"], "REVIEW");
    assert_eq!(letter["nominal"], "10000000");
    // Single manajer holds the REVIEW role, so the approver is named.
    assert_eq!(letter["currentApprover"]["name"], "Sari");
    let id = letter["id"].as_str().unwrap().to_string();

    // Stored letter file is publicly downloadable as a PDF.
    let file_name = letter["letterFile"].as_str().unwrap().to_string();
    let (status, headers, bytes) = get(server.port, &format!("/letters/{}", file_name));
    assert_eq!(status, 200);
    assert!(headers.to_lowercase().contains("application/pdf"));
    assert!(bytes.starts_with(b"%PDF-"));

    // Manajer approves at REVIEW.
    let (status, _, body) = post_json(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "APPROVE"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["currentStep"], "APPROVE");

    // GM approves at APPROVE: terminal.
    let (status, _, body) = post_json(
        server.port,
        GM_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "APPROVE"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["status"], "APPROVED");

    // Public progress view carries the whole timeline.
    let (status, _, body) = get(server.port, &format!("/progress/{}", id));
    assert_eq!(status, 200);
    let progress = json_body(&body);
    let actions: Vec<&str> = progress["data"]["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["CREATED", "SUBMITTED", "REVIEWED", "APPROVED"]);

    // The manajer's decision history contains the letter.
    let (status, _, body) = get_as(server.port, MANAJER_ID, "/admin/procurements/history");
    assert_eq!(status, 200);
    let history = json_body(&body);
    assert_eq!(history["data"]["pagination"]["total_data"], 1);
    assert_eq!(history["data"]["items"][0]["id"], id.as_str());

    // Unit dashboard counts the approval.
    let (status, _, body) = get_as(server.port, STAF_ID, "/admin/dashboard");
    assert_eq!(status, 200);
    let dashboard = json_body(&body);
    assert_eq!(dashboard["data"]["total_in_unit"], 1);
    assert_eq!(dashboard["data"]["total_approved"], 1);
}

#[test]
fn rejection_requires_comment() {
    let server = start_server();
    let (status, submitted) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200);
    let id = submitted["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = post_json(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "REJECT"}"#,
    );
    assert_eq!(status, 400);
    assert_eq!(json_body(&body)["code"], "VALIDATION_ERROR");

    let (status, _, body) = post_json(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "REJECT", "comment": "anggaran habis"}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["status"], "REJECTED");
}

#[test]
fn uncovered_nominal_returns_422() {
    let server = start_server();
    let (status, body) = submit_letter(server.port, "60000000");
    assert_eq!(status, 422);
    assert_eq!(body["code"], "NO_MATCHING_RULE");
}

#[test]
fn wrong_step_role_returns_403() {
    let server = start_server();
    let (status, submitted) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200);
    let id = submitted["data"]["id"].as_str().unwrap().to_string();

    // GM may not act while the letter sits at REVIEW.
    let (status, _, body) = post_json(
        server.port,
        GM_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "APPROVE"}"#,
    );
    assert_eq!(status, 403);
    assert_eq!(json_body(&body)["code"], "UNAUTHORIZED_ACTOR");
}

#[test]
fn non_pdf_upload_rejected() {
    let server = start_server();
    let boundary = "ParafTestBoundary";
    let body = letter_multipart(
        boundary,
        &[
            ("letterNumber", "002/SPB/2025"),
            ("letterAbout", "pengadaan ATK"),
            ("nominal", "10000000"),
            ("incomingLetterDate", "2025-03-01"),
            ("unitId", UNIT_ID),
        ],
        Some(b"plain text, not a pdf"),
    );
    let (status, _, resp) = request(
        server.port,
        "POST",
        "/admin/procurements",
        &[
            ("X-Actor-Id", STAF_ID),
            (
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            ),
        ],
        &body,
    );
    assert_eq!(status, 400);
    assert_eq!(json_body(&resp)["code"], "VALIDATION_ERROR");
}

#[test]
fn letter_file_traversal_is_not_found() {
    let server = start_server();
    let (status, _, _) = get(server.port, "/letters/..%2Fseed.json");
    // Either the router or the store sanitization refuses it.
    assert!(status == 400 || status == 404, "got {}", status);
}

#[test]
fn overlapping_rule_create_returns_409() {
    let server = start_server();
    let (status, _, body) = post_json(
        server.port,
        GM_ID,
        "/admin/rules",
        r#"{
            "name": "tabrakan",
            "minAmount": "50000000",
            "maxAmount": null,
            "steps": [
                {"stepOrder": 1, "stepType": "CREATE", "roleId": "11111111-1111-4111-8111-111111111111"},
                {"stepOrder": 2, "stepType": "REVIEW", "roleId": "11111111-1111-4111-8111-111111111111"},
                {"stepOrder": 3, "stepType": "APPROVE", "roleId": "11111111-1111-4111-8111-111111111111"}
            ]
        }"#,
    );
    // The referenced role ids do not exist, so this is a 404; with real
    // role ids the shared boundary point yields a 409. Exercise both.
    assert_eq!(status, 404, "{}", String::from_utf8_lossy(&body));

    // Fetch a real role id, then retry with it.
    let (_, _, roles_body) = get_as(server.port, GM_ID, "/admin/roles");
    let roles = json_body(&roles_body);
    let role_id = roles["data"]["items"][0]["id"].as_str().unwrap().to_string();
    let draft = format!(
        r#"{{
            "name": "tabrakan",
            "minAmount": "50000000",
            "maxAmount": null,
            "steps": [
                {{"stepOrder": 1, "stepType": "CREATE", "roleId": "{role_id}"}},
                {{"stepOrder": 2, "stepType": "REVIEW", "roleId": "{role_id}"}},
                {{"stepOrder": 3, "stepType": "APPROVE", "roleId": "{role_id}"}}
            ]
        }}"#
    );
    let (status, _, body) = post_json(server.port, GM_ID, "/admin/rules", &draft);
    assert_eq!(status, 409, "{}", String::from_utf8_lossy(&body));
    assert_eq!(json_body(&body)["code"], "AMBIGUOUS_RULE");
}

#[test]
fn revision_loop_over_http() {
    let server = start_server();
    let (status, submitted) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200);
    let id = submitted["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = post_json(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements/decision/{}", id),
        r#"{"decision": "REQUEST_REVISION", "comment": "perbaiki nominal"}"#,
    );
    assert_eq!(status, 200);
    let revised = json_body(&body);
    assert_eq!(revised["data"]["status"], "NEEDS_REVISION");
    // The creator now owes the revision.
    assert_eq!(revised["data"]["currentApprover"]["name"], "Budi");

    // Creator resubmits with an edited nominal, no new file.
    let boundary = "ParafTestBoundary";
    let resubmit_body = letter_multipart(
        boundary,
        &[
            ("letterNumber", "001/SPB/2025"),
            ("letterAbout", "pengadaan ATK"),
            ("nominal", "12000000"),
            ("incomingLetterDate", "2025-03-01"),
            ("unitId", UNIT_ID),
        ],
        None,
    );
    let (status, _, body) = request(
        server.port,
        "PUT",
        &format!("/admin/procurements/{}", id),
        &[
            ("X-Actor-Id", STAF_ID),
            (
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            ),
        ],
        &resubmit_body,
    );
    assert_eq!(status, 200, "{}", String::from_utf8_lossy(&body));
    let resubmitted = json_body(&body);
    assert_eq!(resubmitted["data"]["status"], "PENDING_REVIEW");
    assert_eq!(resubmitted["data"]["currentStep"], "REVIEW");
    assert_eq!(resubmitted["data"]["nominal"], "12000000");
}

#[test]
fn list_letters_filters_by_creator() {
    let server = start_server();
    let (status, _) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200);

    let (status, _, body) = get_as(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements?createdBy={}", STAF_ID),
    );
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["pagination"]["total_data"], 1);

    // Nobody else has created a letter.
    let (status, _, body) = get_as(
        server.port,
        MANAJER_ID,
        &format!("/admin/procurements?createdBy={}", GM_ID),
    );
    assert_eq!(status, 200);
    assert_eq!(json_body(&body)["data"]["pagination"]["total_data"], 0);
}

#[test]
fn failed_submission_leaves_no_stored_file() {
    let server = start_server();

    // No rule covers this nominal, so the letter never commits.
    let (status, body) = submit_letter(server.port, "60000000");
    assert_eq!(status, 422, "{}", body);

    let letters_dir = server.dir.path().join("letters");
    let stored: Vec<_> = std::fs::read_dir(&letters_dir)
        .expect("letters dir")
        .collect();
    assert!(stored.is_empty(), "orphaned files: {:?}", stored);

    // A committed submission does persist its file.
    let (status, _) = submit_letter(server.port, "10000000");
    assert_eq!(status, 200);
    assert_eq!(std::fs::read_dir(&letters_dir).expect("letters dir").count(), 1);
}
