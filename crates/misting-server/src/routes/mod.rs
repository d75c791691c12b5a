pub mod events;
pub mod pages;
pub mod session;
pub mod switch;
pub mod temp;
