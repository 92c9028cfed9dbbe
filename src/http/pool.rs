use crate::http::traced_connector::dial;
use crate::http::traced_io::{AttemptSlot, TracedIo};
use crate::timing::{GotConnInfo, TraceHandle};
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::Uri;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// One idle HTTP/1 connection per `scheme://authority`.
pub struct ConnectionPool {
    tls: Arc<ClientConfig>,
    idle: HashMap<String, PooledConnection>,
}

/// A connection checked out for one attempt.
pub struct PooledConnection {
    key: String,
    pub sender: SendRequest<Full<Bytes>>,
    slot: AttemptSlot,
}

impl ConnectionPool {
    pub fn new(tls: Arc<ClientConfig>) -> Self {
        Self {
            tls,
            idle: HashMap::new(),
        }
    }

    /// Hands out a live pooled connection for `uri`, or dials a new one.
    /// Either way `trace` is told which it got.
    pub async fn acquire(
        &mut self,
        uri: &Uri,
        trace: &TraceHandle,
    ) -> Result<PooledConnection, anyhow::Error> {
        let key = pool_key(uri)?;

        if let Some(mut conn) = self.idle.remove(&key) {
            if !conn.sender.is_closed() && conn.sender.ready().await.is_ok() {
                debug!("Re-using existing connection to {}", key);
                conn.slot.attach(trace.clone());
                trace.emit(|t| t.got_conn(GotConnInfo { reused: true }));
                return Ok(conn);
            }
            debug!("Pooled connection to {} was closed", key);
        }

        let slot = AttemptSlot::new();
        slot.attach(trace.clone());
        let stream = dial(uri, &self.tls, trace).await?;
        let io = TokioIo::new(TracedIo::new(stream, slot.clone()));

        let (sender, conn) = http1::handshake(io)
            .instrument(info_span!("Http Handshake"))
            .await?;
        let span = info_span!("connection", remote = %key);
        tokio::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection failed: {:?}", err);
                }
            }
            .instrument(span),
        );

        trace.emit(|t| t.got_conn(GotConnInfo { reused: false }));
        Ok(PooledConnection { key, sender, slot })
    }

    /// Returns a connection whose response body has been fully read.
    pub fn release(&mut self, conn: PooledConnection) {
        conn.slot.detach();
        if conn.sender.is_closed() {
            return;
        }
        self.idle.insert(conn.key.clone(), conn);
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

fn pool_key(uri: &Uri) -> Result<String, anyhow::Error> {
    let scheme = uri.scheme_str().unwrap_or("http");
    let authority = uri
        .authority()
        .ok_or(anyhow!("uri has no authority: {}", uri))?;
    let port = authority
        .port_u16()
        .unwrap_or(if scheme == "https" { 443 } else { 80 });
    Ok(format!("{}://{}:{}", scheme, authority.host(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_share_a_key() {
        let a: Uri = "http://example.com/a".parse().unwrap();
        let b: Uri = "http://example.com:80/b?c=d".parse().unwrap();
        let c: Uri = "https://example.com/".parse().unwrap();
        assert_eq!(pool_key(&a).unwrap(), pool_key(&b).unwrap());
        assert_eq!(pool_key(&c).unwrap(), "https://example.com:443");
        assert_ne!(pool_key(&a).unwrap(), pool_key(&c).unwrap());
    }

    #[test]
    fn relative_uri_has_no_key() {
        let uri: Uri = "/only/a/path".parse().unwrap();
        assert!(pool_key(&uri).is_err());
    }
}
