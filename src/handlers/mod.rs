pub mod producer;
pub mod subscribe;
