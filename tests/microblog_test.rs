//! Microblog adapter transport behavior against a local HTTP server:
//! search failures degrade to an empty result and never skip the rest
//! of a sweep, and replies demand a post id from the platform.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use aviary::config::MicroblogSection;
use aviary::credentials::MicroblogCredentials;
use aviary::microblog::MicroblogAdapter;
use aviary::responder::{Responder, ResponderError};

/// Responder double with a fixed answer.
struct StaticResponder;

#[async_trait::async_trait]
impl Responder for StaticResponder {
    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        Ok("hello".to_owned())
    }
}

/// Serve a fixed response to every request, recording request lines.
fn spawn_server(
    status_line: &'static str,
    body: &'static str,
) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() {
                    break;
                }
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap_or(0);
                }
            }
            if content_length > 0 {
                let mut body_buf = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body_buf);
            }

            seen.lock()
                .expect("request log")
                .push(request_line.trim_end().to_owned());

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = reader.get_mut().write_all(response.as_bytes());
        }
    });

    (format!("http://{addr}"), requests)
}

fn make_adapter(accounts: Vec<String>) -> MicroblogAdapter {
    let credentials = MicroblogCredentials {
        api_key: "ck".to_owned(),
        api_secret: "cs".to_owned(),
        access_token: "at".to_owned(),
        access_secret: "as".to_owned(),
        rapidapi_key: "rk".to_owned(),
    };
    let section = MicroblogSection {
        accounts,
        ..MicroblogSection::default()
    };
    MicroblogAdapter::new(&credentials, &section, Arc::new(StaticResponder))
}

#[tokio::test]
async fn failed_search_degrades_to_no_mentions() {
    let (base, requests) = spawn_server("403 Forbidden", r#"{"message":"quota exceeded"}"#);
    let adapter = make_adapter(vec!["@acme".to_owned()]).with_search_base(base);

    let mentions = adapter.search_mentions("@acme").await;

    assert!(mentions.is_empty(), "search failure must yield no mentions");
    assert_eq!(
        requests.lock().expect("request log").len(),
        1,
        "non-429 search failures are not retried"
    );
}

#[tokio::test]
async fn sweep_visits_every_account_despite_failures() {
    let (base, requests) = spawn_server("403 Forbidden", r#"{"message":"quota exceeded"}"#);
    let adapter =
        make_adapter(vec!["@first".to_owned(), "@second".to_owned()]).with_search_base(base);

    adapter.sweep().await;

    let seen = requests.lock().expect("request log");
    assert_eq!(seen.len(), 2, "a failing account must not end the sweep");
    assert!(seen[0].contains("query=%40first"), "first request: {}", seen[0]);
    assert!(seen[1].contains("query=%40second"), "second request: {}", seen[1]);
}

#[tokio::test]
async fn reply_returns_the_created_post_id() {
    let (base, _requests) = spawn_server("201 Created", r#"{"data":{"id":"999"}}"#);
    let adapter = make_adapter(Vec::new()).with_api_base(base);

    let id = adapter.reply("123", "hello there").await;

    assert_eq!(id.as_deref(), Some("999"));
}

#[tokio::test]
async fn reply_without_post_id_is_a_delivery_failure() {
    let (base, requests) = spawn_server("201 Created", r#"{"data":{}}"#);
    let adapter = make_adapter(Vec::new()).with_api_base(base);

    let id = adapter.reply("123", "hello there").await;

    assert!(id.is_none(), "a success body without data.id is not a delivery");
    assert_eq!(
        requests.lock().expect("request log").len(),
        1,
        "a malformed success body is not retried"
    );
}
