use crate::cli::app_config::Cli;
use crate::http::pool::ConnectionPool;
use crate::timing::{TimingRecorder, TimingReport};
use crate::tls::client_config;
use anyhow::{anyhow, Context};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, HOST, LOCATION, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Request, StatusCode, Uri, Version};
use serde::Serialize;
use std::io::Write as WriteStd;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const MAX_REDIRECTS: u8 = 10;

/// One timed request attempt and what it brought back.
#[derive(Debug)]
pub struct Attempt {
    pub url: Url,
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub report: TimingReport,
}

#[derive(Serialize)]
struct AttemptSummary<'a> {
    url: &'a str,
    status: u16,
    body_bytes: usize,
    timings: &'a TimingReport,
}

impl Attempt {
    fn summary(&self) -> AttemptSummary<'_> {
        AttemptSummary {
            url: self.url.as_str(),
            status: self.status.as_u16(),
            body_bytes: self.body.len(),
            timings: &self.report,
        }
    }
}

pub async fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    let tls = client_config(cli)?;
    let mut pool = ConnectionPool::new(tls);

    for i in 0..cli.repeat {
        if cli.repeat > 1 {
            debug!("Attempt {}/{}", i + 1, cli.repeat);
        }
        let hops = http_request_with_redirects(cli, &mut pool).await?;
        for hop in &hops {
            print_attempt(cli, hop)?;
        }
        if let Some(last) = hops.last() {
            handle_body(cli, last)?;
        }
    }
    Ok(())
}

/// Sends the request, following redirects when asked to. Every hop is a
/// separate attempt with its own timings.
pub async fn http_request_with_redirects(
    cli: &Cli,
    pool: &mut ConnectionPool,
) -> Result<Vec<Attempt>, anyhow::Error> {
    let mut current_url: Url = cli.url.parse().context("Failed to parse URL")?;
    let mut hops = Vec::new();

    for i in 0..=MAX_REDIRECTS {
        let hop = attempt(cli, pool, &current_url).await?;

        if !(cli.follow_redirects && hop.status.is_redirection()) {
            hops.push(hop);
            return Ok(hops);
        }

        let location = hop
            .headers
            .get(LOCATION)
            .ok_or(anyhow!("Redirect response missing 'location' header"))?;
        current_url = current_url.join(location.to_str()?)?;
        debug!("Redirecting to: {current_url} ({}/{MAX_REDIRECTS})", i + 1);
        hops.push(hop);
    }

    Err(anyhow!(
        "Exceeded maximum number of redirects ({MAX_REDIRECTS})"
    ))
}

/// Runs one attempt: acquire a connection, send, read the whole body, then
/// finalize the timings.
pub async fn attempt(
    cli: &Cli,
    pool: &mut ConnectionPool,
    url: &Url,
) -> Result<Attempt, anyhow::Error> {
    let uri: Uri = url.as_str().parse()?;
    let request = build_request(cli, &uri)?;

    let recorder = TimingRecorder::new().into_shared();
    let trace = recorder.trace_handle();

    let exchange = async {
        let mut conn = pool.acquire(&uri, &trace).await?;
        let res = conn
            .sender
            .send_request(request)
            .await
            .context("Failed to execute request")?;
        let (parts, incoming) = res.into_parts();
        let body = incoming
            .collect()
            .await
            .context("Failed to read response body")?
            .to_bytes();
        Ok::<_, anyhow::Error>((conn, parts, body))
    };
    let result = timeout(Duration::from_secs(cli.max_time), exchange).await;
    recorder.end_now();

    let (conn, parts, body) = match result {
        Ok(exchange) => exchange?,
        Err(_) => {
            debug!("Partial timings: {}", recorder.report());
            return Err(anyhow!(
                "Request timed out after {} seconds",
                cli.max_time
            ));
        }
    };
    pool.release(conn);

    if cli.verbosity >= 1 {
        debug!("< {:?} {}", parts.version, parts.status);
        for (key, value) in parts.headers.iter() {
            debug!("< {}: {}", key, value.to_str().unwrap_or("<binary>"));
        }
        debug!("<");
    }

    Ok(Attempt {
        url: url.clone(),
        version: parts.version,
        status: parts.status,
        headers: parts.headers,
        body,
        report: recorder.report(),
    })
}

fn build_request(cli: &Cli, uri: &Uri) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut content_type_option = None;

    if cli.body_option.is_some() {
        method = String::from("POST");
        content_type_option = Some(String::from("application/x-www-form-urlencoded"));
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }

    // The connection is already bound to the authority: origin-form target.
    let target = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let mut request_builder = Request::builder().method(method.as_str()).uri(target);

    let mut header_map = http::HeaderMap::new();
    let authority = uri.authority().ok_or(anyhow!("uri has no host: {}", uri))?;
    header_map.insert(HOST, HeaderValue::from_str(authority.as_str())?);
    if let Some(content_type) = content_type_option {
        header_map.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type)?);
    }
    header_map.insert(ACCEPT, HeaderValue::from_str("*/*")?);
    let user_agent = cli
        .user_agent_option
        .as_deref()
        .unwrap_or(concat!("reqstat/", env!("CARGO_PKG_VERSION")));
    header_map.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        if split.len() == 2 {
            header_map.insert(
                HeaderName::from_str(split[0])?,
                HeaderValue::from_str(split[1].trim_start())?,
            );
        } else {
            return Err(anyhow!("header error: '{}'", x));
        }
    }

    for (key, val) in header_map {
        request_builder = request_builder.header(key.ok_or(anyhow!("Key is null"))?, val);
    }

    let body = cli
        .body_option
        .as_ref()
        .map_or(Bytes::new(), |b| Bytes::from(b.clone()));
    let request = request_builder.body(Full::new(body))?;

    if cli.verbosity >= 1 {
        debug!(
            "> {} {} {:?}",
            request.method(),
            request.uri(),
            request.version()
        );
        for (key, value) in request.headers().iter() {
            debug!("> {}: {}", key, value.to_str()?);
        }
        debug!(">");
    }

    Ok(request)
}

fn print_attempt(cli: &Cli, attempt: &Attempt) -> Result<(), anyhow::Error> {
    let mut out = std::io::stdout().lock();
    if cli.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&attempt.summary())?)?;
        return Ok(());
    }

    writeln!(out, "{}", attempt.url)?;
    writeln!(out, "{:?} {}", attempt.version, attempt.status)?;
    for (key, value) in attempt.headers.iter() {
        writeln!(out, "{}: {}", key, value.to_str().unwrap_or("<binary>"))?;
    }
    writeln!(out)?;
    if attempt.report.is_reused {
        writeln!(out, "Connection re-used")?;
    }
    writeln!(out, "{}", attempt.report.timeline())?;
    if cli.verbosity >= 1 {
        writeln!(out, "{:#}", attempt.report)?;
    }
    out.flush()?;
    Ok(())
}

fn handle_body(cli: &Cli, attempt: &Attempt) -> Result<(), anyhow::Error> {
    match cli.file_path_option.as_ref() {
        Some(file_path) => {
            std::fs::write(file_path, &attempt.body)
                .with_context(|| format!("Failed to write body to file: {}", file_path))?;
            info!("Body stored in: {}", file_path);
        }
        None if !cli.json => {
            info!("Body discarded ({} bytes)", attempt.body.len());
        }
        None => {}
    }
    Ok(())
}
