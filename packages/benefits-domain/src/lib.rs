pub mod access;
pub mod pricing;
pub mod router;
