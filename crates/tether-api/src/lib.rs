pub mod auth;
pub mod conversations;
pub mod invitations;
pub mod middleware;
pub mod users;
