// InfluxDB 1.x HTTP client: just enough for creating/dropping the database and writing points.
//
// The client is a scoped resource.  It is created (and the server pinged) before anything is
// written, handed to the batch sink, and released when the sink is dropped, whether the run ended
// well or not.

use anyhow::{bail, Context, Result};
use iotoplog::{MetricPoint, PointWriter};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

pub struct InfluxClient {
    client: Client,
    base_url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

// The shape of a /query response.  Errors can be at the top level (bad request) or per statement
// (with a 200 status).
#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatementResult {
    error: Option<String>,
}

// The shape of a /write error response.
#[derive(Deserialize)]
struct WriteError {
    error: String,
}

impl InfluxClient {
    /// Create the client and check that the server answers.

    pub fn connect(config: &InfluxConfig) -> Result<InfluxClient> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let c = InfluxClient {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        };
        c.ping()?;
        debug!("Connected to {}", c.base_url);
        Ok(c)
    }

    pub fn ping(&self) -> Result<()> {
        let url = format!("{}/ping", self.base_url);
        let r = self
            .authorize(self.client.get(&url))
            .send()
            .with_context(|| format!("Could not reach InfluxDB at {}", self.base_url))?;
        if !r.status().is_success() {
            bail!("InfluxDB at {} answered ping with {}", self.base_url, r.status());
        }
        Ok(())
    }

    pub fn create_database(&self) -> Result<()> {
        self.query(&format!("CREATE DATABASE {}", quote_ident(&self.database)))
    }

    pub fn drop_database(&self) -> Result<()> {
        self.query(&format!("DROP DATABASE {}", quote_ident(&self.database)))
    }

    fn query(&self, q: &str) -> Result<()> {
        debug!("Query: {q}");
        let url = format!("{}/query?q={}", self.base_url, urlencoding::encode(q));
        let r = self
            .authorize(self.client.post(&url))
            .send()
            .with_context(|| format!("Query failed: {q}"))?;
        let status = r.status();
        let body = r.text().unwrap_or_default();
        let parsed = serde_json::from_str::<QueryResponse>(&body).unwrap_or_default();
        if let Some(e) = parsed.error {
            bail!("Query failed: {q}: {e}");
        }
        if let Some(e) = parsed.results.into_iter().find_map(|r| r.error) {
            bail!("Query failed: {q}: {e}");
        }
        if !status.is_success() {
            bail!("Query failed: {q}: {status}");
        }
        Ok(())
    }

    /// Write newline-separated line protocol to the database, in one request.

    pub fn write_lines(&self, body: String) -> Result<()> {
        let url = format!(
            "{}/write?db={}&precision=ns",
            self.base_url,
            urlencoding::encode(&self.database)
        );
        let r = self
            .authorize(self.client.post(&url))
            .body(body)
            .send()
            .with_context(|| format!("Could not write to InfluxDB at {}", self.base_url))?;
        check_write(r)
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.username {
            Some(ref u) => rb.basic_auth(u, self.password.as_ref()),
            None => rb,
        }
    }
}

impl PointWriter for InfluxClient {
    fn write_points(&mut self, points: &[MetricPoint]) -> Result<()> {
        let mut body = String::new();
        for p in points {
            writeln!(body, "{p}")?;
        }
        self.write_lines(body)
    }
}

impl Drop for InfluxClient {
    fn drop(&mut self) {
        debug!("Closing connection to {}", self.base_url);
    }
}

fn check_write(r: Response) -> Result<()> {
    let status = r.status();
    if status == StatusCode::NO_CONTENT || status == StatusCode::OK {
        return Ok(());
    }
    let body = r.text().unwrap_or_default();
    match serde_json::from_str::<WriteError>(&body) {
        Ok(e) => bail!("Write rejected ({status}): {}", e.error),
        Err(_) => bail!("Write rejected ({status})"),
    }
}

// InfluxQL identifier quoting.
fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
use mockito::Matcher;

#[cfg(test)]
pub fn test_config(server: &mockito::Server, database: &str) -> InfluxConfig {
    let hp = server.host_with_port();
    let (host, port) = hp.split_once(':').unwrap();
    InfluxConfig {
        host: host.to_string(),
        port: port.parse().unwrap(),
        database: database.to_string(),
        ssl: false,
        username: None,
        password: None,
        timeout: Duration::from_secs(5),
    }
}

#[test]
fn test_quote_ident() {
    assert!(quote_ident("iotop") == "\"iotop\"");
    assert!(quote_ident("a\"b") == "\"a\\\"b\"");
}

#[test]
fn test_base_url() {
    let mut c = InfluxConfig {
        host: "db.example.org".to_string(),
        port: 8086,
        database: "iotop".to_string(),
        ssl: false,
        username: None,
        password: None,
        timeout: Duration::from_secs(1),
    };
    assert!(c.base_url() == "http://db.example.org:8086");
    c.ssl = true;
    assert!(c.base_url() == "https://db.example.org:8086");
}

#[test]
fn test_connect_and_create() {
    let mut server = mockito::Server::new();
    let ping = server.mock("GET", "/ping").with_status(204).create();
    let drop_db = server
        .mock("POST", "/query")
        .match_query(Matcher::UrlEncoded("q".into(), "DROP DATABASE \"iotop\"".into()))
        .with_status(200)
        .with_body(r#"{"results":[{"statement_id":0}]}"#)
        .create();
    let create = server
        .mock("POST", "/query")
        .match_query(Matcher::UrlEncoded("q".into(), "CREATE DATABASE \"iotop\"".into()))
        .with_status(200)
        .with_body(r#"{"results":[{"statement_id":0}]}"#)
        .create();

    let client = InfluxClient::connect(&test_config(&server, "iotop")).unwrap();
    client.drop_database().unwrap();
    client.create_database().unwrap();
    ping.assert();
    drop_db.assert();
    create.assert();
}

#[test]
fn test_query_error() {
    let mut server = mockito::Server::new();
    let _ping = server.mock("GET", "/ping").with_status(204).create();
    let _query = server
        .mock("POST", "/query")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"results":[{"statement_id":0,"error":"database name required"}]}"#)
        .create();
    let client = InfluxClient::connect(&test_config(&server, "iotop")).unwrap();
    let e = client.create_database().unwrap_err();
    assert!(e.to_string().contains("database name required"));
}

#[test]
fn test_write_points() {
    let mut server = mockito::Server::new();
    let _ping = server.mock("GET", "/ping").with_status(204).create();
    let write = server
        .mock("POST", "/write")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("db".into(), "iotop".into()),
            Matcher::UrlEncoded("precision".into(), "ns".into()),
        ]))
        .match_body("iotop,hostname=h,user=u,command=c diskread=0.0,diskwrite=1.5,swapin=0.0,io=2.0 10\n")
        .with_status(204)
        .create();

    let mut client = InfluxClient::connect(&test_config(&server, "iotop")).unwrap();
    let p = MetricPoint {
        measurement: iotoplog::MEASUREMENT,
        tags: [
            ("hostname", "h".to_string()),
            ("user", "u".to_string()),
            ("command", "c".to_string()),
        ],
        fields: [("diskread", 0.0), ("diskwrite", 1.5), ("swapin", 0.0), ("io", 2.0)],
        timestamp: iotoplog::ResolvedTimestamp::from_nanos(10),
    };
    client.write_points(&[p]).unwrap();
    write.assert();
}

#[test]
fn test_write_rejected() {
    let mut server = mockito::Server::new();
    let _ping = server.mock("GET", "/ping").with_status(204).create();
    let _write = server
        .mock("POST", "/write")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"error":"unable to parse 'x': missing fields"}"#)
        .create();
    let client = InfluxClient::connect(&test_config(&server, "iotop")).unwrap();
    let e = client.write_lines("x\n".to_string()).unwrap_err();
    assert!(e.to_string().contains("missing fields"));
    assert!(e.to_string().contains("400"));
}

#[test]
fn test_ping_fails() {
    // No mocks, so the server answers everything with 501.
    let server = mockito::Server::new();
    let e = InfluxClient::connect(&test_config(&server, "iotop")).err().unwrap();
    assert!(e.to_string().contains("answered ping"));
}
