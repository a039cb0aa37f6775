// Copyright 2026 The takyr Developers
// This file is part of the takyr library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::SslSection;

use anyhow::{bail, Context, Result};
use takyr_certdb::SerialNumber;
use tokio_rustls::{
    rustls::{
        self,
        pki_types::{CertificateDer, PrivateKeyDer},
        server::WebPkiClientVerifier,
        RootCertStore,
        ServerConfig,
    },
    TlsAcceptor,
};
use x509_parser::prelude::FromDer;

use std::{fs::File, io, path::Path, sync::Arc};

/// The identity presented by a peer certificate: the CommonName is the
/// canonical user identity, the serial is what revocation matches on.
#[derive(Clone, Debug)]
pub struct PeerIdentity {
    pub common_name: Option<String>,
    pub serial: SerialNumber,
}

/// Builds the TLS acceptor from the `[ssl]` section.
pub fn build_acceptor(ssl: &SslSection) -> Result<TlsAcceptor> {
    // The process-wide provider; a second install is a no-op.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    if let Some(key_pw) = &ssl.key_pw {
        if !key_pw.is_empty() {
            bail!(
                "Encrypted private keys are not supported; decrypt {} and clear ssl.key_pw",
                ssl.key.display()
            );
        }
    }

    let certs = load_certs(&ssl.cert)
        .with_context(|| format!("Unable to load the server certificate {}", ssl.cert.display()))?;
    let key = load_key(&ssl.key)
        .with_context(|| format!("Unable to load the server key {}", ssl.key.display()))?;

    let builder = if ssl.ca.as_os_str().is_empty() || !ssl.ca.exists() {
        if ssl.client_cert_required {
            bail!("ssl.client_cert_required is set but the CA {} is unreadable", ssl.ca.display());
        }
        info!("Clients will not need to present a certificate");
        ServerConfig::builder().with_no_client_auth()
    } else {
        info!("Loading CA certificate from {}", ssl.ca.display());
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&ssl.ca)
            .with_context(|| format!("Unable to load the CA bundle {}", ssl.ca.display()))?
        {
            roots.add(cert).context("Unable to add a CA certificate to the trust store")?;
        }

        let verifier = WebPkiClientVerifier::builder(Arc::new(roots));
        let verifier = match ssl.client_cert_required {
            true => verifier.build(),
            false => {
                info!("Clients will not need to present a certificate");
                verifier.allow_unauthenticated().build()
            }
        }
        .context("Unable to build the client certificate verifier")?;
        ServerConfig::builder().with_client_cert_verifier(verifier)
    };

    let config = builder
        .with_single_cert(certs, key)
        .context("Unable to assemble the TLS server configuration")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Extracts the peer identity from the presented certificate chain, if any.
pub fn peer_identity(certs: Option<&[CertificateDer<'_>]>) -> Option<PeerIdentity> {
    let leaf = certs?.first()?;
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(leaf.as_ref())
        .map_err(|error| warn!("Unable to parse the peer certificate: {error}"))
        .ok()?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|name| name.as_str().ok())
        .map(str::to_string);

    Some(PeerIdentity { common_name, serial: SerialNumber::from_bytes(cert.raw_serial()) })
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut io::BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut io::BufReader::new(File::open(path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found"))
}
