//! Session lifecycle and per-user session indices on top of Redis.

pub mod config;
pub mod error;
pub mod router;
pub mod state;

pub mod backend {
    pub mod kv;
    pub mod memory;
    pub mod redis_backend;
    pub mod sentinel;
}

pub mod models {
    pub mod session;
}

pub mod services {
    pub mod sessions;
}

pub mod handlers {
    pub mod sessions;
}

pub mod middleware_layer {
    pub mod admin;
    pub mod auth;
}

pub mod validation {
    pub mod session;
}
