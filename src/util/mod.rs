pub(crate) mod hash;
pub(crate) mod lock;
pub mod time;
