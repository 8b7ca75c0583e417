//! Typed wrappers around the Inventory Hub endpoint families.

pub mod configs;
pub mod dashboard;
pub mod invoices;
pub mod receiving;
pub mod suppliers;

pub use configs::ConfigClient;
pub use dashboard::DashboardClient;
pub use invoices::InvoicesClient;
pub use receiving::{ReceivingApi, ReceivingClient};
pub use suppliers::SuppliersClient;
