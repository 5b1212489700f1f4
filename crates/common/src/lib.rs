pub mod audit;
pub mod limited;
pub mod limits;

pub use audit::AuditLog;
pub use limited::LimitedWriter;
