pub mod auth_form;
pub mod conversations;
pub mod feed;
pub mod search;
pub mod session;
