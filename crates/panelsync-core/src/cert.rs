// ── Certificate renewal boundary ──
//
// How a certificate is actually obtained (ACME, DNS provider, external
// tooling) lives behind `CertRenewer`. The node-info monitor only decides
// when to ask.

use crate::config::CertConfig;
use crate::error::CoreError;

/// Renews the certificate described by a node's [`CertConfig`].
///
/// Renewal may block on external tooling; the controller runs it on the
/// blocking pool.
pub trait CertRenewer: Send + Sync {
    fn renew(&self, cert: &CertConfig) -> Result<(), CoreError>;
}

/// Renewer that does nothing, for nodes without managed certificates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRenewer;

impl CertRenewer for NoopRenewer {
    fn renew(&self, _cert: &CertConfig) -> Result<(), CoreError> {
        Ok(())
    }
}
