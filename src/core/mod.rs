pub mod config;
pub mod middleware;
pub mod rbac;
pub mod shared;
