pub mod chemistry;
pub mod scenario;
pub mod spec;
pub mod template;
pub mod value;
