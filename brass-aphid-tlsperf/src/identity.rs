//! Certificate and key material for the shared secure-context.

use std::path::{Path, PathBuf};

use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    ssl::{SslContextBuilder, SslFiletype},
    x509::{X509NameBuilder, X509},
};

use crate::error::Error;

pub const SELF_SIGNED_COMMON_NAME: &str = "tlsperf.localhost";
const SELF_SIGNED_VALIDITY_DAYS: u32 = 365;

/// Key type used when generating a self-signed identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::EnumIter, clap::ValueEnum)]
pub enum SigType {
    #[default]
    Rsa2048,
    Rsa3072,
    Ecdsa256,
    Ecdsa384,
}

impl SigType {
    pub fn description(&self) -> &'static str {
        match self {
            SigType::Rsa2048 => "RSA-2048",
            SigType::Rsa3072 => "RSA-3072",
            SigType::Ecdsa256 => "ECDSA-P256",
            SigType::Ecdsa384 => "ECDSA-P384",
        }
    }

    fn generate_key(&self) -> Result<PKey<Private>, ErrorStack> {
        match self {
            SigType::Rsa2048 => PKey::from_rsa(Rsa::generate(2048)?),
            SigType::Rsa3072 => PKey::from_rsa(Rsa::generate(3072)?),
            SigType::Ecdsa256 => Self::ec_key(Nid::X9_62_PRIME256V1),
            SigType::Ecdsa384 => Self::ec_key(Nid::SECP384R1),
        }
    }

    fn ec_key(curve: Nid) -> Result<PKey<Private>, ErrorStack> {
        let group = EcGroup::from_curve_name(curve)?;
        PKey::from_ec_key(EcKey::generate(&group)?)
    }
}

/// Where the certificate and private key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A PEM file holding the certificate chain and the private key.
    PemFile(PathBuf),
    /// A freshly generated self-signed certificate.
    SelfSigned(SigType),
}

impl Default for Identity {
    fn default() -> Self {
        Identity::SelfSigned(SigType::default())
    }
}

impl Identity {
    pub fn describe(&self) -> String {
        match self {
            Identity::PemFile(path) => path.display().to_string(),
            Identity::SelfSigned(sig_type) => format!("selfsigned {}", sig_type.description()),
        }
    }

    pub(crate) fn install(&self, builder: &mut SslContextBuilder) -> Result<(), Error> {
        match self {
            Identity::PemFile(path) => install_pem_file(builder, path),
            Identity::SelfSigned(sig_type) => {
                let identity = SelfSignedCert::generate(*sig_type).map_err(|e| {
                    Error::config(format!("failed to generate self-signed certificate: {e}"))
                })?;
                identity
                    .install(builder)
                    .map_err(|e| Error::config(format!("failed to set self-signed certificate: {e}")))
            }
        }
    }
}

fn install_pem_file(builder: &mut SslContextBuilder, path: &Path) -> Result<(), Error> {
    // OpenSSL reports a missing file as an opaque error stack, so check first
    // to keep the OS error code.
    std::fs::metadata(path)
        .map_err(|e| Error::config_io(format!("unable to read {}", path.display()), e))?;

    builder
        .set_certificate_chain_file(path)
        .map_err(|e| Error::config(format!("no certificate chain in {}: {e}", path.display())))?;
    builder
        .set_private_key_file(path, SslFiletype::PEM)
        .map_err(|e| Error::config(format!("no private key in {}: {e}", path.display())))?;
    builder.check_private_key().map_err(|e| {
        Error::config(format!(
            "private key does not match certificate in {}: {e}",
            path.display()
        ))
    })
}

pub struct SelfSignedCert {
    pub certificate: X509,
    pub key: PKey<Private>,
}

impl SelfSignedCert {
    pub fn generate(sig_type: SigType) -> Result<Self, ErrorStack> {
        let key = sig_type.generate_key()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, SELF_SIGNED_COMMON_NAME)?;
        let name = name.build();

        let serial = {
            let mut serial = BigNum::new()?;
            serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
            serial.to_asn1_integer()?
        };

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(SELF_SIGNED_VALIDITY_DAYS)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.sign(&key, MessageDigest::sha256())?;

        Ok(Self {
            certificate: builder.build(),
            key,
        })
    }

    /// Certificate followed by the PKCS#8 private key, the layout that
    /// [`Identity::PemFile`] expects.
    pub fn to_pem(&self) -> Result<Vec<u8>, ErrorStack> {
        let mut pem = self.certificate.to_pem()?;
        pem.extend(self.key.private_key_to_pem_pkcs8()?);
        Ok(pem)
    }

    fn install(&self, builder: &mut SslContextBuilder) -> Result<(), ErrorStack> {
        builder.set_certificate(&self.certificate)?;
        builder.set_private_key(&self.key)?;
        builder.check_private_key()
    }
}
