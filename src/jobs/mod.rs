// Jobs module - Background maintenance tasks

pub mod hold_expirer;
