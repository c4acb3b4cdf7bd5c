pub mod capture;
pub mod session;
