//! ISPyB gateway REST service.
//!
//! ## Endpoints
//!
//! Outside the gate:
//!
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//!
//! Through the gate (and mirrored under the legacy prefix):
//!
//! - `GET|POST /auth/login` - Exchange username/password for a bearer token
//! - `POST /auth/logout` - Revoke the presented token
//! - `GET /auth/whoami` - Resolved principal
//! - `GET /admin/policy` - Active rule set
//! - `POST /admin/policy/reload` - Re-read or replace the rule set
//! - `/samples`, `/contacts`, `/phasing` - Resource catalog

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, normalize_path, record_gate_response};
pub use routes::{create_router, register_admin_routes, to_gateway_request};
pub use state::{load_users, Collaborators, GatewayState, RulesSource, StartupError};
