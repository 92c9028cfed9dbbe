use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{DigitallySignedStruct, Error, SignatureScheme};
use std::sync::Arc;
use x509_parser::parse_x509_certificate;

/// `--insecure`: any server certificate is accepted. Handshake signatures are
/// still checked so the session keys belong to whoever presented the chain.
#[derive(Debug)]
pub struct InsecureVerifier {
    provider: Arc<CryptoProvider>,
}

impl InsecureVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        trace!("Skipping certificate validation for {:?}", server_name);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Logs subject, issuer, validity and SANs of the peer's leaf certificate.
///
/// Called once the handshake is done so the parsing never lands inside the
/// measured TLS phase.
pub fn log_peer_certificate(end_entity: &CertificateDer<'_>) {
    if !enabled!(tracing::Level::DEBUG) {
        return;
    }
    match parse_x509_certificate(end_entity.as_ref()) {
        Ok((_, cert)) => {
            debug!("* Server certificate:");
            debug!("*  subject: {}", cert.subject());
            debug!("*  issuer: {}", cert.issuer());
            debug!(
                "*  validity: {} - {}",
                cert.validity().not_before,
                cert.validity().not_after
            );
            if let Ok(Some(san)) = cert.tbs_certificate.subject_alternative_name() {
                for name in &san.value.general_names {
                    debug!("*  subjectAltName: {}", name);
                }
            }
        }
        Err(e) => error!("Failed to parse server certificate: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::crypto::ring::default_provider;

    const LOCALHOST_CERT: &[u8] = include_bytes!("testdata/localhost.crt");

    fn localhost_cert() -> CertificateDer<'static> {
        rustls_pemfile::certs(&mut &*LOCALHOST_CERT)
            .next()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn any_certificate_is_accepted() {
        let verifier = InsecureVerifier::new(Arc::new(default_provider()));
        let name = ServerName::try_from("not-the-cert-name.example").unwrap();
        let verified = verifier.verify_server_cert(
            &localhost_cert(),
            &[],
            &name,
            &[],
            UnixTime::now(),
        );
        assert!(verified.is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn unparsable_certificate_is_only_logged() {
        log_peer_certificate(&CertificateDer::from(vec![0x30, 0x03, 0x01]));
        log_peer_certificate(&localhost_cert());
    }
}
