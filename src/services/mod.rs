// Services module - Business logic

pub mod consumption;
pub mod hold_manager;
