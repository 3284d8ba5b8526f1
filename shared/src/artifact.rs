//! Printable artifact kinds and collision-free file names

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Every PDF the system renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Invoice,
    PurchaseInvoice,
    PurchaseOrder,
    Prescription,
    Eticket,
    Receipt,
    Production,
}

impl ArtifactKind {
    /// File name prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Invoice => "i",
            ArtifactKind::PurchaseInvoice => "pi",
            ArtifactKind::PurchaseOrder => "poi",
            ArtifactKind::Prescription => "p",
            ArtifactKind::Eticket => "e",
            ArtifactKind::Receipt => "r",
            ArtifactKind::Production => "prod",
        }
    }

    /// Directory under `static/pdf/`
    pub fn directory(&self) -> &'static str {
        match self {
            ArtifactKind::Invoice => "invoice",
            ArtifactKind::PurchaseInvoice => "purchase-invoice",
            ArtifactKind::PurchaseOrder => "purchase-order",
            ArtifactKind::Prescription => "prescription",
            ArtifactKind::Eticket => "eticket",
            ArtifactKind::Receipt => "receipt",
            ArtifactKind::Production => "production",
        }
    }
}

/// Random alphanumeric code of `len` characters from the thread-local CSPRNG
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Candidate file name `{prefix}-{8alnum}-{8alnum}.pdf`.
///
/// Callers must still check the owning store and draw again on collision.
pub fn candidate_artifact_name(kind: ArtifactKind) -> String {
    format!(
        "{}-{}-{}.pdf",
        kind.prefix(),
        random_alphanumeric(8),
        random_alphanumeric(8)
    )
}

/// Check whether `name` is shaped like a name produced for `kind`
pub fn is_artifact_name(kind: ArtifactKind, name: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(kind.prefix())
        .and_then(|r| r.strip_prefix('-'))
        .and_then(|r| r.strip_suffix(".pdf"))
    else {
        return false;
    };
    let mut parts = rest.split('-');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(a), Some(b), None)
            if a.len() == 8
                && b.len() == 8
                && a.chars().chain(b.chars()).all(|c| c.is_ascii_alphanumeric())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_name_shape() {
        for kind in [
            ArtifactKind::Invoice,
            ArtifactKind::PurchaseInvoice,
            ArtifactKind::PurchaseOrder,
            ArtifactKind::Prescription,
            ArtifactKind::Eticket,
            ArtifactKind::Receipt,
            ArtifactKind::Production,
        ] {
            let name = candidate_artifact_name(kind);
            assert!(is_artifact_name(kind, &name), "{name}");
        }
    }

    #[test]
    fn test_prefix_must_match_kind() {
        let name = candidate_artifact_name(ArtifactKind::PurchaseOrder);
        assert!(!is_artifact_name(ArtifactKind::PurchaseInvoice, &name));
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(!is_artifact_name(ArtifactKind::Invoice, "i-abc-def.pdf"));
        assert!(!is_artifact_name(ArtifactKind::Invoice, "i-abcdefgh-abcdefgh.txt"));
        assert!(!is_artifact_name(ArtifactKind::Invoice, "i-abcdefgh-abcdefgh-x.pdf"));
        assert!(is_artifact_name(ArtifactKind::Invoice, "i-abcdefgh-ABCD1234.pdf"));
    }
}
