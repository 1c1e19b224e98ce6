//! Silent access token injection for web content behind a reverse proxy
//!
//! Applications that render intranet content published through an
//! authenticating reverse proxy must present an access token with every
//! request to the proxy origin, but the content itself knows nothing about
//! tokens. This crate wires up everything needed to attach them:
//!
//! * an [`AuthService`] that signs the user in, registers the account with the
//!   app-protection subsystem (an [`EnrollmentGate`]), and waits until the
//!   proxy can be reached;
//! * a [`RequestInterceptor`][proxauth_reqwest::RequestInterceptor] for the
//!   requests the browser engine makes on its own;
//! * an [`InPageScript`][proxauth_reqwest::InPageScript] and its
//!   [`ScriptBridge`][proxauth_reqwest::ScriptBridge] for the requests page
//!   scripts make.
//!
//! All of them share a single token cache, so at most one token request per
//! scope set is ever in flight.
//!
//! ```no_run
//! use proxauth::{AuthService, InMemoryGate, ProxyConfig};
//! use proxauth_tokens::sources::ConstTokenSource;
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::from_json_str(r#"{
//!     "proxy_origin": "https://intranet-contoso.msappproxy.net",
//!     "proxy_scope": "https://intranet-contoso.msappproxy.net/user_impersonation",
//!     "sign_in_scopes": ["User.Read"]
//! }"#)?;
//!
//! let service = AuthService::new(config, ConstTokenSource::new("token"), InMemoryGate::default())?;
//!
//! let account = service.sign_in(&()).await?;
//! service.wait_for_proxy_access_ready().await?;
//!
//! let interceptor = service.interceptor()?;
//! let bridge = service.script_bridge();
//! let script = service.in_page_script();
//! # let _ = (account, interceptor, bridge, script);
//!
//! // ... render content ...
//!
//! service.sign_out().await?;
//! # Ok(()) }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod config;
mod error;
pub mod gate;
mod service;

pub use config::{ProxyConfig, Timing};
pub use error::{ConfigError, ReadinessError};
pub use gate::{ComplianceStatus, EnrollmentGate, EnrollmentStatus, GateNotification, InMemoryGate};
pub use service::AuthService;
