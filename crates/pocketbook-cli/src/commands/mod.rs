pub mod add;
pub mod common;
pub mod delete;
pub mod list;
pub mod logout;
pub mod status;
pub mod sync;
pub mod update;
