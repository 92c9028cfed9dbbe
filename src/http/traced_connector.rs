use crate::timing::TraceHandle;
use crate::tls::cert_verifier::log_peer_certificate;
use anyhow::Context as _;
use hyper::Uri;
use rustls::ClientConfig;
use std::io::IoSlice;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A dialed connection, TLS-wrapped for `https` targets.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Resolves, connects and (for https) handshakes to the target of `uri`,
/// reporting every phase to `trace`.
pub async fn dial(
    uri: &Uri,
    tls: &Arc<ClientConfig>,
    trace: &TraceHandle,
) -> Result<MaybeTlsStream, anyhow::Error> {
    let host = uri.host().ok_or(anyhow!("uri has no host: {}", uri))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let https = uri.scheme_str() == Some("https");
    let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

    let addrs = resolve(host, port, trace).await?;

    trace.emit(|t| t.connect_start());
    let stream = connect(&addrs).await;
    trace.emit(|t| t.connect_done());
    let stream = stream?;
    debug!(
        "Connected to {} ({})",
        host,
        stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    );

    if !https {
        return Ok(MaybeTlsStream::Plain(stream));
    }

    let domain = pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| anyhow!("Invalid TLS server name {}: {}", host, e))?;
    let connector = TlsConnector::from(tls.clone());

    trace.emit(|t| t.tls_handshake_start());
    let tls_stream = connector.connect(domain, stream).await;
    trace.emit(|t| t.tls_handshake_done());
    let tls_stream = tls_stream.with_context(|| format!("TLS handshake with {} failed", host))?;

    let (_, session) = tls_stream.get_ref();
    debug!(
        "TLS established: {:?} {:?}",
        session.protocol_version(),
        session.negotiated_cipher_suite().map(|s| s.suite())
    );
    if let Some(end_entity) = session.peer_certificates().and_then(|certs| certs.first()) {
        log_peer_certificate(end_entity);
    }

    Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
}

async fn resolve(
    host: &str,
    port: u16,
    trace: &TraceHandle,
) -> Result<Vec<SocketAddr>, anyhow::Error> {
    // A literal address needs no lookup; the recorder backfills the phase.
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    debug!("Resolving DNS for: {}", host);
    trace.emit(|t| t.dns_start());
    let lookup = tokio::net::lookup_host((host, port)).await;
    trace.emit(|t| t.dns_done());

    let addresses: Vec<SocketAddr> = lookup
        .with_context(|| format!("Failed to resolve {}", host))?
        .collect();
    if addresses.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(anyhow!("No IP addresses found for host {}", host));
    }

    for (i, addr) in addresses.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }
    Ok(addresses)
}

/// Tries each address in turn, keeping the last failure.
async fn connect(addrs: &[SocketAddr]) -> Result<TcpStream, anyhow::Error> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(anyhow::Error::new(e).context(format!("Failed to connect to {}", addr)));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("No address to connect to")))
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            MaybeTlsStream::Plain(s) => s.is_write_vectored(),
            MaybeTlsStream::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{ManualClock, Trace, TimingRecorder};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Events(Vec<&'static str>);

    impl Trace for Events {
        fn dns_start(&mut self) {
            self.0.push("dns_start");
        }
        fn dns_done(&mut self) {
            self.0.push("dns_done");
        }
        fn connect_start(&mut self) {
            self.0.push("connect_start");
        }
        fn connect_done(&mut self) {
            self.0.push("connect_done");
        }
        fn tls_handshake_start(&mut self) {
            self.0.push("tls_start");
        }
        fn tls_handshake_done(&mut self) {
            self.0.push("tls_done");
        }
    }

    fn tls() -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth(),
        )
    }

    #[tokio::test]
    async fn literal_address_skips_lookup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        let events = Arc::new(Mutex::new(Events::default()));

        let stream = dial(&uri, &tls(), &TraceHandle::new(events.clone()))
            .await
            .unwrap();

        assert!(matches!(stream, MaybeTlsStream::Plain(_)));
        assert_eq!(
            events.lock().unwrap().0,
            vec!["connect_start", "connect_done"]
        );
    }

    #[tokio::test]
    async fn hostname_is_resolved_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let uri: Uri = format!("http://localhost:{}/", port).parse().unwrap();
        let events = Arc::new(Mutex::new(Events::default()));

        // localhost may also resolve to ::1, which nothing listens on; the
        // dialer falls through to the next address.
        dial(&uri, &tls(), &TraceHandle::new(events.clone()))
            .await
            .unwrap();

        assert_eq!(
            events.lock().unwrap().0,
            vec!["dns_start", "dns_done", "connect_start", "connect_done"]
        );
    }

    #[tokio::test]
    async fn refused_connection_still_closes_the_phase() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let uri: Uri = format!("http://{}/", addr).parse().unwrap();

        let clock = Arc::new(ManualClock::new());
        let shared = TimingRecorder::with_clock(clock.clone()).into_shared();
        let err = dial(&uri, &tls(), &shared.trace_handle()).await.unwrap_err();
        shared.end_now();

        assert!(format!("{err:#}").contains("Failed to connect"));
        assert!(!shared.report().is_tls);
    }

    #[tokio::test]
    async fn insecure_handshake_with_self_signed_server() {
        use crate::cli::app_config::Cli;
        use clap::Parser;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio_rustls::TlsAcceptor;

        let mut cert_pem: &[u8] = include_bytes!("../tls/testdata/localhost.crt");
        let mut key_pem: &[u8] = include_bytes!("../tls/testdata/localhost.key");
        let certs = rustls_pemfile::certs(&mut cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut key_pem).unwrap().unwrap();
        let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(stream).await.unwrap();
            let mut buf = [0u8; 4];
            tls.read_exact(&mut buf).await.unwrap();
            tls.write_all(&buf).await.unwrap();
            tls.flush().await.unwrap();
        });

        let uri: Uri = format!("https://localhost:{}/", port).parse().unwrap();
        let cli = Cli::parse_from(["reqstat", "-k", "-v", "https://localhost/"]);
        let config = crate::tls::client_config(&cli).unwrap();
        let events = Arc::new(Mutex::new(Events::default()));

        let mut stream = dial(&uri, &config, &TraceHandle::new(events.clone()))
            .await
            .unwrap();
        assert!(matches!(stream, MaybeTlsStream::Tls(_)));
        assert_eq!(
            events.lock().unwrap().0,
            vec![
                "dns_start",
                "dns_done",
                "connect_start",
                "connect_done",
                "tls_start",
                "tls_done"
            ]
        );

        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut echo = [0u8; 4];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");
    }
}
