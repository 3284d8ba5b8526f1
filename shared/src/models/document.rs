//! Document kinds and audit actions

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;

/// The document types that move stock or reference it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    PurchaseInvoice,
    PurchaseOrder,
    SalesInvoice,
    Prescription,
    Production,
}

impl DocumentKind {
    /// Entity tag written to the audit log
    pub fn entity(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseInvoice => "purchase-invoice",
            DocumentKind::PurchaseOrder => "purchase-order",
            DocumentKind::SalesInvoice => "invoice",
            DocumentKind::Prescription => "prescription",
            DocumentKind::Production => "production",
        }
    }

    /// Artifact rendered for the document header
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            DocumentKind::PurchaseInvoice => ArtifactKind::PurchaseInvoice,
            DocumentKind::PurchaseOrder => ArtifactKind::PurchaseOrder,
            DocumentKind::SalesInvoice => ArtifactKind::Invoice,
            DocumentKind::Prescription => ArtifactKind::Prescription,
            DocumentKind::Production => ArtifactKind::Production,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseInvoice => "Purchase Invoice",
            DocumentKind::PurchaseOrder => "Purchase Order",
            DocumentKind::SalesInvoice => "Invoice",
            DocumentKind::Prescription => "Prescription",
            DocumentKind::Production => "Production",
        }
    }
}

/// Mutating actions recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Modify,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Modify => "modify",
            AuditAction::Delete => "delete",
        }
    }
}
