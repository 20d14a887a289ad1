//! TLS connector for TDS connections.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{TlsConfig, is_managed_endpoint};
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// A certificate verifier that accepts any server certificate.
///
/// Only reachable for on-premises hosts with `trust_server_certificate`;
/// managed endpoints refuse this path before it is built.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// TLS connector wrapping the TDS pre-login handshake dance.
pub struct TlsConnector {
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector for the given host and configuration.
    ///
    /// Fails with [`TlsError::VerificationRequired`] when
    /// `trust_server_certificate` is requested for a managed Azure endpoint.
    pub fn new(config: &TlsConfig, host: &str) -> Result<Self, TlsError> {
        let client_config = if config.trust_server_certificate {
            if is_managed_endpoint(host) {
                return Err(TlsError::VerificationRequired(host.to_string()));
            }
            tracing::warn!(
                host,
                "server certificate verification disabled; connection is open to interception"
            );
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth()
        } else {
            let root_store = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Perform the TLS handshake tunneled in TDS pre-login packets.
    ///
    /// The returned stream still wraps the transport in the pre-login shim;
    /// the shim is switched to pass-through once the handshake completes, so
    /// all later traffic is plain TLS records.
    pub async fn connect_with_prelogin<S>(
        &self,
        transport: S,
        host: &str,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TlsError::InvalidServerName(host.to_string()))?;

        let wrapped = TlsPreloginWrapper::new(transport);
        let mut stream = self.inner.connect(server_name, wrapped).await?;

        stream.get_mut().0.handshake_complete();
        tracing::debug!(host, "TLS handshake completed inside pre-login framing");

        Ok(stream)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_rejected_for_managed_endpoints() {
        let config = TlsConfig::new().trust_server_certificate(true);
        let result = TlsConnector::new(&config, "prod.database.windows.net");
        assert!(matches!(result, Err(TlsError::VerificationRequired(_))));
    }

    #[test]
    fn trust_allowed_on_prem() {
        let config = TlsConfig::new().trust_server_certificate(true);
        assert!(TlsConnector::new(&config, "sql01.corp.local").is_ok());
    }

    #[test]
    fn default_verifies() {
        assert!(TlsConnector::new(&TlsConfig::new(), "prod.database.windows.net").is_ok());
    }
}
