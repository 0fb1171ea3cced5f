//! `admin-httpd` — the operator-facing HTTP API (component C8).
//!
//! The vendored `http` crate's request/response types depend on a `Headers`
//! collection that never made it into this workspace's copy (`request.rs`
//! and `response.rs` both reference it, but no module defines it), so this
//! binary is a small `std::net` listener instead: one thread per connection,
//! per spec.md §5's "thread-per-service is sufficient" concurrency model,
//! parsing just enough of HTTP/1.1 to serve `collector_admin::http`'s fixed
//! route set.

extern crate collector_admin;
extern crate collector_db;
#[macro_use]
extern crate macros;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use collector_admin::http::{AdminService, Permissions, NO_CACHE_HEADER};
use collector_db::Db;
use common::errors::*;

#[derive(Args)]
struct Args {
    #[arg(default = 8443)]
    port: u16,
}

fn data_dir() -> PathBuf {
    std::env::var("IVXV_ADMIN_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/ivxv/management"))
}

struct ParsedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

fn parse_request(stream: &TcpStream) -> Result<ParsedRequest> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.trim().split(' ');
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(ParsedRequest { method, path, headers })
}

fn read_body(stream: &mut TcpStream, headers: &HashMap<String, String>) -> Result<Vec<u8>> {
    let len: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut buf = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut buf)?;
    }
    Ok(buf)
}

fn write_response(stream: &mut TcpStream, status: u16, reason: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        NO_CACHE_HEADER.0,
        NO_CACHE_HEADER.1,
        body,
    );
    stream.write_all(response.as_bytes())?;
    Ok(())
}

fn handle_connection(mut stream: TcpStream, service: Arc<AdminService>) {
    let result = (|| -> Result<()> {
        let req = parse_request(&stream)?;
        let body = read_body(&mut stream, &req.headers)?;
        let client_cn = req.headers.get("x-ssl-client-cn").map(|s| s.as_str());

        let (status, reason, payload) = route(&service, &req.method, &req.path, client_cn, &body);
        write_response(&mut stream, status, reason, &payload)
    })();

    if let Err(e) = result {
        eprintln!("admin-httpd: connection error: {}", e);
    }
}

fn route(
    service: &AdminService,
    method: &str,
    path: &str,
    client_cn: Option<&str>,
    body: &[u8],
) -> (u16, &'static str, String) {
    match (method, path) {
        ("GET", "/context.json") => (200, "OK", service.context(client_cn)),
        ("GET", "/eventlog") => match service.eventlog() {
            Ok(json) => (200, "OK", json),
            Err(e) => (500, "Internal Server Error", error_body(&e)),
        },
        ("POST", "/download-ballot-box") => {
            (200, "OK", service.download_ballot_box().to_json())
        }
        ("POST", "/download-consolidated-ballot-box") => {
            (200, "OK", service.download_consolidated_ballot_box().to_json())
        }
        ("GET", "/ballot-box-state") => match service.ballot_box_state() {
            Ok(json) => (200, "OK", json),
            Err(e) => (500, "Internal Server Error", error_body(&e)),
        },
        ("POST", "/skip-voters-list") => {
            let changeset: u32 = path_query_param(path, "changeset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            (200, "OK", service.skip_voters_list(changeset).to_json())
        }
        ("POST", "/download-processor-input") => match service.download_processor_input() {
            Ok(bytes) => (200, "OK", String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => (500, "Internal Server Error", error_body(&e)),
        },
        ("POST", "/download-voting-sessions") => match service.download_voting_sessions() {
            Ok(csv) => (200, "OK", csv),
            Err(e) => (500, "Internal Server Error", error_body(&e)),
        },
        ("POST", "/download-voter-detail-stats") => match service.download_voter_detail_stats() {
            Ok(stats) => (200, "OK", stats),
            Err(e) => (500, "Internal Server Error", error_body(&e)),
        },
        ("POST", "/upload-config") => {
            let cmd_type = path_query_param(path, "type").unwrap_or_else(|| "technical".to_string());
            let upload_dir = data_dir().join("upload");
            if let Err(e) = std::fs::create_dir_all(&upload_dir) {
                return (500, "Internal Server Error", error_body(&e.into()));
            }
            let saved_path = upload_dir.join(format!("upload-{}.bdoc", cmd_type));
            if let Err(e) = std::fs::write(&saved_path, body) {
                return (500, "Internal Server Error", error_body(&e.into()));
            }
            let envelope = service.upload_config(&cmd_type, &saved_path);
            (200, "OK", envelope.to_json())
        }
        _ => (404, "Not Found", r#"{"success":false,"message":"not found"}"#.to_string()),
    }
}

fn path_query_param(path: &str, key: &str) -> Option<String> {
    let (_, query) = path.split_once('?')?;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn error_body(e: &Error) -> String {
    format!(r#"{{"success":false,"message":{:?}}}"#, e.to_string())
}

fn run() -> Result<()> {
    let args = common::args::parse_args::<Args>()?;

    let db = Arc::new(Db::open(data_dir().join("db").join("ivxv-management.db")));
    let permissions = Permissions::load(&data_dir().join("admin-ui-permissions"))?;
    let service = Arc::new(AdminService {
        db,
        permissions,
        event_log_path: collector_admin::event_log::path_under(&data_dir()),
        export_dir: data_dir(),
    });

    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    println!("admin-httpd listening on :{}", args.port);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("admin-httpd: accept failed: {}", e);
                continue;
            }
        };
        let service = service.clone();
        std::thread::spawn(move || handle_connection(stream, service));
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("admin-httpd: {}", e);
        std::process::exit(1);
    }
}
