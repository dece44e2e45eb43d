pub mod console;
pub mod scheduler;
pub mod source;
