pub mod adjudicate;
pub mod approve;
pub mod show;
