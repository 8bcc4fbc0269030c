// Encryption of credential secrets at rest
pub mod vault;

// Ephemeral TTL state shared between processes
pub mod store;

// OAuth provider client and CSRF states
pub mod oauth;

// Encrypted credential records
pub mod credentials;

// Authorization code handoff records
pub mod handoff;

// User records and account deletion
pub mod users;

// Request-time credential check
pub mod guard;

// Gates in front of bot handlers
pub mod middleware;

// Public callback HTTP API
pub mod api;

// Bot command handling
pub mod bot;

// Startup configuration
pub mod config;
