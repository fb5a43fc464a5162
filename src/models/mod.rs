// Models module - persisted entity representations

pub mod hold;
pub mod operation_log;
pub mod order;
pub mod ticket;
pub mod tier;

pub use hold::Hold;
pub use operation_log::OperationLogEntry;
pub use order::Order;
pub use ticket::Ticket;
pub use tier::TicketTier;
