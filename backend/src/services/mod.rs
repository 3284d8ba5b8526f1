//! Business logic services for the pharmacy backend

pub mod artifact;
pub mod audit;
pub mod auth;
pub mod catalog;
pub mod document;
pub mod medicine;
pub mod prescription;
pub mod production;
pub mod purchase_invoice;
pub mod purchase_order;
pub mod recipe;
pub mod reconciler;
pub mod renderer;
pub mod sales_invoice;
pub mod stock;
pub mod unit;
pub mod user;

pub use auth::AuthService;
pub use catalog::CatalogService;
pub use medicine::MedicineService;
pub use prescription::PrescriptionService;
pub use production::ProductionService;
pub use purchase_invoice::PurchaseInvoiceService;
pub use purchase_order::PurchaseOrderService;
pub use recipe::RecipeService;
pub use sales_invoice::SalesInvoiceService;
pub use user::UserService;
