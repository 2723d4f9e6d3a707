//! Request authentication: admission, replay protection and signatures.
//!
//! [`AuthDecisionPipeline`] composes the pieces below into a single
//! [`Verdict`]. The leaf components are plain functions or immutable
//! structs and are safe to share across requests without locking.

pub mod admission;
pub mod context;
pub mod pipeline;
pub mod replay;
pub mod signature;

pub use admission::{AdmissionPolicy, CidrRange};
pub use context::{AuthContext, CredentialFieldError};
pub use pipeline::{AuthDecisionPipeline, DenyReason, Verdict};
pub use replay::{CeilingNoncePolicy, NonceCache, NoncePolicy, NoncePolicyKind, ReplayGuard};
