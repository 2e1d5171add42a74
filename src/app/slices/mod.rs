pub mod auth;
pub mod checklist;
pub mod pages;
