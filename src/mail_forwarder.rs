pub mod compose;
pub mod mask;
pub mod smtp;
